//! Bulk strategy: AXI DMA in direct register mode
//!
//! ```text
//! attach:  MM2S_DMACR, S2MM_DMACR ← RS | IOC_IRQ_EN | ERR_IRQ_EN
//! begin:   fence(Release)
//!          MM2S_SA/SA_MSB ← input bus addr,  MM2S_LENGTH ← n × 2
//!          S2MM_DA/DA_MSB ← output bus addr, S2MM_LENGTH ← n × 4
//! irq:     S2MM_DMASR.IOC_IRQ (or ERR_IRQ) → CompletionSignal
//! finish:  fence(Acquire), DMASR error bits on either channel → Fault
//! abort:   RS ← 0 on both channels, poll HALTED; S2MM IOC/ERR may
//!          stay latched (see completion_latched)
//! reset:   DMACR.RESET pulse on both channels, poll until clear, re-enable
//! ```
//!
//! Only the S2MM channel's completion is reported through the signal; the
//! transfer is done once the last result has landed in memory.

use crate::completion::CompletionSignal;
use crate::dma::{BulkDescriptor, SampleBuffers};
use crate::error::{PeriphError, Result};
use crate::mmio::Registers;
use crate::strategy::{StrategyKind, TransferStrategy};
use periph_chip::regs::axi_dma::{self, dmacr, dmasr, fields};
use periph_chip::RegisterField;
use std::sync::atomic::{fence, Ordering};

/// Bounded status poll, in the shape used for every DMA handshake
struct PollConfig<'a> {
    field: RegisterField,
    want: u32,
    max_polls: u32,
    yield_interval: u32,
    timeout_msg: &'a str,
}

/// DMA transfers through an AXI DMA engine
#[derive(Debug)]
pub struct BulkStrategy {
    regs: Registers,
    halt_poll_limit: u32,
    running: bool,
}

impl BulkStrategy {
    /// Take over the engine behind `regs` and start both channels.
    pub fn new(regs: Registers, halt_poll_limit: u32) -> Self {
        let mut strategy = Self {
            regs,
            halt_poll_limit,
            running: false,
        };
        strategy.enable_channels();
        strategy
    }

    /// Completion signal watching the S2MM channel's IOC and error bits.
    ///
    /// # Errors
    ///
    /// Propagates field validation errors from [`CompletionSignal::new`].
    pub fn completion_signal(regs: Registers) -> Result<CompletionSignal> {
        CompletionSignal::new(regs, fields::S2MM_IOC, Some(fields::S2MM_ERR))
    }

    fn enable_channels(&mut self) {
        let ctrl = dmacr::RS | dmacr::IOC_IRQ_EN | dmacr::ERR_IRQ_EN;
        self.regs.write_word(axi_dma::MM2S_DMACR, ctrl);
        self.regs.write_word(axi_dma::S2MM_DMACR, ctrl);
        self.running = true;
        tracing::debug!("AXI DMA channels running");
    }

    fn poll(&self, cfg: PollConfig<'_>) -> Result<u32> {
        let PollConfig {
            field,
            want,
            max_polls,
            yield_interval,
            timeout_msg,
        } = cfg;
        for i in 0..max_polls {
            if self.regs.read(field) == want {
                return Ok(i + 1);
            }
            if i % yield_interval == 0 {
                std::thread::yield_now();
            }
        }
        Err(PeriphError::transfer_failed(timeout_msg))
    }

    fn halt(&mut self) -> Result<()> {
        self.regs.write(fields::MM2S_RS, 0);
        self.regs.write(fields::S2MM_RS, 0);
        self.running = false;

        for (halted, name) in [(fields::MM2S_HALTED, "MM2S"), (fields::S2MM_HALTED, "S2MM")] {
            let polls = self.poll(PollConfig {
                field: halted,
                want: 1,
                max_polls: self.halt_poll_limit,
                yield_interval: 1_000,
                timeout_msg: &format!("{name} channel did not halt"),
            })?;
            tracing::debug!("{name} halted after {polls} polls");
        }
        Ok(())
    }

    fn channel_errors(&self) -> Option<(u32, &'static str)> {
        for (offset, name) in [
            (axi_dma::MM2S_DMASR, "MM2S"),
            (axi_dma::S2MM_DMASR, "S2MM"),
        ] {
            let status = self.regs.read_word(offset);
            if status & dmasr::ANY_ERR != 0 {
                return Some((status, name));
            }
        }
        None
    }
}

fn describe_error(status: u32) -> &'static str {
    if status & dmasr::DMA_DEC_ERR != 0 {
        "decode error"
    } else if status & dmasr::DMA_SLV_ERR != 0 {
        "slave error"
    } else {
        "internal error"
    }
}

impl TransferStrategy for BulkStrategy {
    fn begin(&mut self, buffers: &mut SampleBuffers, length: usize) -> Result<()> {
        let desc = BulkDescriptor::new(buffers, length)?;
        if !self.running {
            self.enable_channels();
        }

        // MM2S completion is not wired to the line; clear whatever the last
        // transfer left there
        self.regs.write_word(axi_dma::MM2S_DMASR, dmasr::W1C_MASK);

        // Input samples must be visible to the engine before it is armed
        fence(Ordering::Release);

        self.regs
            .write_addr64(fields::MM2S_SA, fields::MM2S_SA_MSB, desc.src);
        self.regs.write(fields::MM2S_LENGTH, desc.in_bytes);
        self.regs
            .write_addr64(fields::S2MM_DA, fields::S2MM_DA_MSB, desc.dst);
        self.regs.write(fields::S2MM_LENGTH, desc.out_bytes);

        tracing::debug!(
            "DMA armed: src={:#x} ({} B) dst={:#x} ({} B)",
            desc.src,
            desc.in_bytes,
            desc.dst,
            desc.out_bytes
        );
        Ok(())
    }

    fn is_synchronous(&self) -> bool {
        false
    }

    fn finish(&mut self) -> Result<()> {
        fence(Ordering::Acquire);
        match self.channel_errors() {
            Some((status, name)) => {
                tracing::warn!("{name} DMASR={status:#010x} after transfer");
                Err(PeriphError::fault(
                    status,
                    format!("{name} {}", describe_error(status)),
                ))
            }
            None => Ok(()),
        }
    }

    fn abort(&mut self) -> Result<()> {
        tracing::warn!("abandoning in-flight DMA transfer");
        self.halt()
    }

    fn completion_latched(&self) -> bool {
        self.regs.read_word(axi_dma::S2MM_DMASR) & dmasr::W1C_MASK != 0
    }

    fn reset(&mut self) -> Result<()> {
        self.regs.pulse(fields::MM2S_RESET);
        self.regs.pulse(fields::S2MM_RESET);
        for (reset, name) in [(fields::MM2S_RESET, "MM2S"), (fields::S2MM_RESET, "S2MM")] {
            self.poll(PollConfig {
                field: reset,
                want: 0,
                max_polls: self.halt_poll_limit,
                yield_interval: 1_000,
                timeout_msg: &format!("{name} reset did not complete"),
            })?;
        }
        self.running = false;
        self.enable_channels();
        tracing::info!("AXI DMA reset");
        Ok(())
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Bulk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimAxiDma, SimCompletion};
    use crate::SharedIrqLine;
    use std::sync::Arc;

    fn engine(mode: SimCompletion) -> (BulkStrategy, SimAxiDma) {
        let dma = SimAxiDma::new(mode, SharedIrqLine::new(0));
        let strategy = BulkStrategy::new(Registers::new(Arc::new(dma.clone())), 1_000);
        (strategy, dma)
    }

    #[test]
    fn test_attach_starts_channels() {
        let (_strategy, dma) = engine(SimCompletion::Manual);
        let ctrl = dma.peek(axi_dma::S2MM_DMACR);
        assert_eq!(ctrl & dmacr::RS, dmacr::RS);
        assert_ne!(ctrl & dmacr::IOC_IRQ_EN, 0);
        assert_eq!(dma.peek(axi_dma::S2MM_DMASR) & dmasr::HALTED, 0);
    }

    #[test]
    fn test_begin_programs_both_channels() {
        let (mut strategy, dma) = engine(SimCompletion::Manual);
        let mut buffers = SampleBuffers::new(8).expect("alloc");
        strategy.begin(&mut buffers, 5).expect("begin");

        assert_eq!(dma.peek(axi_dma::MM2S_LENGTH), 10);
        assert_eq!(dma.peek(axi_dma::S2MM_LENGTH), 20);
        let src = u64::from(dma.peek(axi_dma::MM2S_SA))
            | (u64::from(dma.peek(axi_dma::MM2S_SA_MSB)) << 32);
        assert_eq!(src, buffers.input_buffer().bus_addr());
        assert!(dma.is_busy());
    }

    #[test]
    fn test_abort_halts_engine() {
        let (mut strategy, dma) = engine(SimCompletion::Manual);
        let mut buffers = SampleBuffers::new(8).expect("alloc");
        strategy.begin(&mut buffers, 8).expect("begin");
        strategy.abort().expect("halt");
        assert!(!dma.is_busy());
        assert_ne!(dma.peek(axi_dma::MM2S_DMASR) & dmasr::HALTED, 0);
        assert_ne!(dma.peek(axi_dma::S2MM_DMASR) & dmasr::HALTED, 0);
    }

    #[test]
    fn test_completion_survives_halt() {
        let (mut strategy, dma) = engine(SimCompletion::Manual);
        let mut buffers = SampleBuffers::new(4).expect("alloc");
        strategy.begin(&mut buffers, 4).expect("begin");
        assert!(!strategy.completion_latched());

        assert!(dma.complete());
        strategy.abort().expect("halt");
        assert!(strategy.completion_latched(), "halting does not clear IOC");
    }

    #[test]
    fn test_finish_reports_slave_error() {
        let (mut strategy, _dma) = engine(SimCompletion::Fault);
        let mut buffers = SampleBuffers::new(4).expect("alloc");
        strategy.begin(&mut buffers, 4).expect("begin");
        let err = strategy.finish().expect_err("fault");
        assert!(matches!(err, PeriphError::Fault { .. }));

        strategy.reset().expect("reset");
        assert!(strategy.finish().is_ok());
    }
}
