//! Simulated peripherals
//!
//! Register-exact software models of the blocks the drivers talk to, so the
//! whole submit → start → interrupt → collect path runs without hardware:
//!
//! - [`RegisterFile`]: plain memory-backed register window
//! - [`RecordingBlock`]: wraps any block and logs every access, the oracle
//!   for register-level conformance tests
//! - [`SimSquarer`], [`SimAxiDma`], [`SimTimer`], [`SimFir`]: device models
//! - [`SimPlatform`]: one interrupt line with the devices wired to it
//!
//! Models raise their interrupt line from whichever thread completes the
//! work (the caller's for immediate completion, a helper thread for deferred
//! completion), and never while holding their own register lock.

mod axi_dma;
mod fir;
mod squarer;
mod timer;

pub use axi_dma::SimAxiDma;
pub use fir::SimFir;
pub use squarer::SimSquarer;
pub use timer::SimTimer;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::irq::SharedIrqLine;
use crate::mmio::{RegisterBlock, Registers};
use crate::session::TransferSession;
use crate::strategies::BulkStrategy;
use crate::strategy::StrategyKind;
use periph_chip::Block;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Memory-backed register window with no side effects
#[derive(Debug)]
pub struct RegisterFile {
    words: Vec<AtomicU32>,
}

impl RegisterFile {
    /// Zeroed window of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            words: (0..size.div_ceil(4)).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Set a register directly, bypassing access logging.
    pub fn set(&self, offset: usize, value: u32) {
        self.slot(offset).store(value, Ordering::SeqCst);
    }

    /// Read a register directly, bypassing access logging.
    pub fn get(&self, offset: usize) -> u32 {
        self.slot(offset).load(Ordering::SeqCst)
    }

    fn slot(&self, offset: usize) -> &AtomicU32 {
        assert!(offset % 4 == 0, "unaligned register offset {offset:#x}");
        &self.words[offset / 4]
    }
}

impl RegisterBlock for RegisterFile {
    fn read32(&self, offset: usize) -> u32 {
        self.get(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        self.set(offset, value);
    }
}

/// One logged register access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read of `offset` returning the value
    Read(usize, u32),
    /// Write of the value to `offset`
    Write(usize, u32),
}

/// Register block wrapper that records every access in order
#[derive(Debug)]
pub struct RecordingBlock<B> {
    inner: B,
    log: spin::Mutex<Vec<Access>>,
}

impl<B: RegisterBlock> RecordingBlock<B> {
    /// Record accesses to `inner`.
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            log: spin::Mutex::new(Vec::new()),
        }
    }

    /// The wrapped block
    pub const fn inner(&self) -> &B {
        &self.inner
    }

    /// Drain the log.
    pub fn take(&self) -> Vec<Access> {
        std::mem::take(&mut *self.log.lock())
    }
}

impl<B: RegisterBlock> RegisterBlock for RecordingBlock<B> {
    fn read32(&self, offset: usize) -> u32 {
        let value = self.inner.read32(offset);
        self.log.lock().push(Access::Read(offset, value));
        value
    }

    fn write32(&self, offset: usize, value: u32) {
        self.log.lock().push(Access::Write(offset, value));
        self.inner.write32(offset, value);
    }
}

/// When the simulated DMA engine finishes a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimCompletion {
    /// Inside the LENGTH write that starts it
    Immediate,
    /// On a helper thread after the delay
    Deferred(Duration),
    /// Only when [`SimAxiDma::complete`] is called
    Manual,
    /// With a slave error and the error interrupt instead of completion
    Fault,
}

/// A simulated board: one shared interrupt line, a squarer data port, an
/// AXI DMA engine, a SmartTimer and a FIR filter
#[derive(Debug, Clone)]
pub struct SimPlatform {
    line: Arc<SharedIrqLine>,
    squarer: Arc<SimSquarer>,
    dma: SimAxiDma,
    timer: SimTimer,
    fir: SimFir,
}

impl SimPlatform {
    /// Interrupt number the simulated devices share
    pub const IRQ: u32 = 61;

    /// Build the platform with the DMA engine completing per `mode`.
    pub fn new(mode: SimCompletion) -> Self {
        let line = SharedIrqLine::new(Self::IRQ);
        let timer = SimTimer::new();
        timer.connect(&line);
        let fir = SimFir::new();
        fir.connect(&line);
        tracing::debug!("simulated platform on irq {}", Self::IRQ);
        Self {
            squarer: Arc::new(SimSquarer::new()),
            dma: SimAxiDma::new(mode, line.clone()),
            timer,
            fir,
            line,
        }
    }

    /// Open a transfer session using `kind`.
    ///
    /// # Errors
    ///
    /// Returns error if the session cannot be created with `config`.
    pub fn open(&self, kind: StrategyKind, config: SessionConfig) -> Result<TransferSession> {
        match kind {
            StrategyKind::Scalar => TransferSession::scalar(self.registers(Block::Squarer), config),
            StrategyKind::Bulk => {
                let regs = self.registers(Block::AxiDma);
                let mut signal = BulkStrategy::completion_signal(regs.clone())?;
                signal.attach(&self.line);
                TransferSession::bulk(regs, signal, config)
            }
        }
    }

    /// Register interface for `block`
    pub fn registers(&self, block: Block) -> Registers {
        match block {
            Block::Squarer => Registers::new(self.squarer.clone()),
            Block::AxiDma => Registers::new(Arc::new(self.dma.clone())),
            Block::SmartTimer => Registers::new(Arc::new(self.timer.clone())),
            Block::Fir => Registers::new(Arc::new(self.fir.clone())),
        }
    }

    /// The shared interrupt line
    pub fn line(&self) -> &Arc<SharedIrqLine> {
        &self.line
    }

    /// The DMA engine model
    pub const fn dma(&self) -> &SimAxiDma {
        &self.dma
    }

    /// The timer model
    pub const fn timer(&self) -> &SimTimer {
        &self.timer
    }

    /// The FIR model
    pub const fn fir(&self) -> &SimFir {
        &self.fir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_order() {
        let rec = RecordingBlock::new(RegisterFile::new(16));
        rec.write32(4, 7);
        assert_eq!(rec.read32(4), 7);
        assert_eq!(rec.take(), vec![Access::Write(4, 7), Access::Read(4, 7)]);
        assert!(rec.take().is_empty());
    }

    #[test]
    fn test_platform_blocks_share_one_line() {
        let platform = SimPlatform::new(SimCompletion::Immediate);
        let config = SessionConfig::default().with_max_elements(8);
        let _bulk = platform.open(StrategyKind::Bulk, config).expect("bulk");
        assert_eq!(platform.line().handler_count(), 1);
        assert_eq!(platform.line().number(), SimPlatform::IRQ);
    }
}
