//! AXI DMA engine model (direct register mode) with a squarer in the stream
//!
//! MM2S reads `i16` samples from the source address, the squarer in the
//! stream path squares them, S2MM writes `i32` results at the destination.
//! A transfer launches once both LENGTH registers have been written while
//! both channels are running.
//!
//! ```text
//! DMACR  RS=0 → HALTED=1, any queued transfer is dropped
//!        RESET=1 → both channels back to reset state (bit reads back 0)
//! DMASR  IOC_IRQ / ERR_IRQ are W1C; error bits clear only on reset
//! ```
//!
//! Bus addresses are host virtual addresses (identity mapping), matching
//! [`DmaBuffer`](crate::DmaBuffer).

use super::SimCompletion;
use crate::irq::SharedIrqLine;
use crate::mmio::RegisterBlock;
use periph_chip::regs::axi_dma::{self, dmacr, dmasr};
use periph_chip::Block;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
struct Channel {
    cr: u32,
    sr: u32,
    addr: u32,
    addr_msb: u32,
    length: u32,
    armed: bool,
}

impl Channel {
    const RESET: Self = Self {
        cr: 0,
        sr: dmasr::HALTED,
        addr: 0,
        addr_msb: 0,
        length: 0,
        armed: false,
    };

    const fn running(&self) -> bool {
        self.cr & dmacr::RS != 0
    }

    const fn bus_addr(&self) -> u64 {
        ((self.addr_msb as u64) << 32) | self.addr as u64
    }
}

#[derive(Debug, Clone, Copy)]
struct Job {
    src: u64,
    dst: u64,
    in_bytes: u32,
    out_bytes: u32,
    generation: u64,
}

#[derive(Debug)]
struct Engine {
    mm2s: Channel,
    s2mm: Channel,
    job: Option<Job>,
    generation: u64,
}

impl Engine {
    const fn new() -> Self {
        Self {
            mm2s: Channel::RESET,
            s2mm: Channel::RESET,
            job: None,
            generation: 0,
        }
    }

    fn drop_job(&mut self) {
        if self.job.take().is_some() {
            tracing::debug!("sim dma: queued transfer dropped");
        }
        self.generation += 1;
        self.mm2s.armed = false;
        self.s2mm.armed = false;
    }

    fn reset(&mut self) {
        self.drop_job();
        self.mm2s = Channel::RESET;
        self.s2mm = Channel::RESET;
    }

    fn channel(&mut self, offset: usize) -> &mut Channel {
        if offset < axi_dma::S2MM_DMACR {
            &mut self.mm2s
        } else {
            &mut self.s2mm
        }
    }

    /// Move the data and post completion. Returns whether the line should
    /// be raised.
    fn run(&mut self, job: Job) -> bool {
        let samples = (job.in_bytes as usize / 2).min(job.out_bytes as usize / 4);
        // SAFETY: bus addresses are identity-mapped DmaBuffer allocations. Invariants:
        // (1) the owning session does not touch or free them while the transfer is
        // queued; (2) halting drops the job under this lock before buffers are freed;
        // (3) lengths were bounded by the buffer sizes when the descriptor was built.
        unsafe {
            let src = job.src as *const i16;
            let dst = job.dst as *mut i32;
            for i in 0..samples {
                let x = i32::from(src.add(i).read_volatile());
                dst.add(i).write_volatile(x * x);
            }
        }
        self.job = None;
        self.mm2s.sr |= dmasr::IOC_IRQ | dmasr::IDLE;
        self.s2mm.sr |= dmasr::IOC_IRQ | dmasr::IDLE;
        self.s2mm.cr & dmacr::IOC_IRQ_EN != 0
    }

    fn fail(&mut self) -> bool {
        self.job = None;
        self.s2mm.sr |= dmasr::DMA_SLV_ERR | dmasr::ERR_IRQ | dmasr::HALTED;
        self.s2mm.cr &= !dmacr::RS;
        self.s2mm.cr & dmacr::ERR_IRQ_EN != 0
    }
}

struct Inner {
    engine: spin::Mutex<Engine>,
    mode: SimCompletion,
    line: Arc<SharedIrqLine>,
    transfers: AtomicU64,
}

/// Simulated AXI DMA engine feeding a squarer
#[derive(Clone)]
pub struct SimAxiDma {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SimAxiDma {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimAxiDma")
            .field("mode", &self.inner.mode)
            .field("irq", &self.inner.line.number())
            .field("transfers", &self.transfers())
            .finish_non_exhaustive()
    }
}

impl SimAxiDma {
    /// Engine in reset state (both channels halted) raising `line`.
    pub fn new(mode: SimCompletion, line: Arc<SharedIrqLine>) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine: spin::Mutex::new(Engine::new()),
                mode,
                line,
                transfers: AtomicU64::new(0),
            }),
        }
    }

    /// Register value without side effects
    pub fn peek(&self, offset: usize) -> u32 {
        self.read32(offset)
    }

    /// A launched transfer has not completed yet
    pub fn is_busy(&self) -> bool {
        self.inner.engine.lock().job.is_some()
    }

    /// Transfers completed so far
    pub fn transfers(&self) -> u64 {
        self.inner.transfers.load(Ordering::Relaxed)
    }

    /// Finish the queued transfer now. Returns `false` if none was queued.
    pub fn complete(&self) -> bool {
        let raise = {
            let mut engine = self.inner.engine.lock();
            let queued = engine.job;
            match queued {
                Some(job) => engine.run(job),
                None => return false,
            }
        };
        self.finished(raise);
        true
    }

    fn finished(&self, raise: bool) {
        self.inner.transfers.fetch_add(1, Ordering::Relaxed);
        if raise {
            self.inner.line.raise();
        }
    }

    /// Both LENGTHs written: queue the transfer and complete it per mode.
    fn launch(&self, engine: &mut Engine) -> Option<bool> {
        let job = Job {
            src: engine.mm2s.bus_addr(),
            dst: engine.s2mm.bus_addr(),
            in_bytes: engine.mm2s.length,
            out_bytes: engine.s2mm.length,
            generation: engine.generation,
        };
        engine.mm2s.armed = false;
        engine.s2mm.armed = false;
        engine.mm2s.sr &= !dmasr::IDLE;
        engine.s2mm.sr &= !dmasr::IDLE;
        engine.job = Some(job);
        tracing::trace!("sim dma: {} → {} bytes queued", job.in_bytes, job.out_bytes);

        match self.inner.mode {
            SimCompletion::Immediate => Some(engine.run(job)),
            SimCompletion::Fault => {
                tracing::debug!("sim dma: injecting slave error");
                Some(engine.fail())
            }
            SimCompletion::Manual => None,
            SimCompletion::Deferred(delay) => {
                let dma = self.clone();
                let spawned = std::thread::Builder::new()
                    .name("sim-dma".into())
                    .spawn(move || {
                        std::thread::sleep(delay);
                        let raise = {
                            let mut engine = dma.inner.engine.lock();
                            let queued = engine.job;
                            match queued {
                                Some(job) if job.generation == engine.generation => {
                                    Some(engine.run(job))
                                }
                                _ => None,
                            }
                        };
                        if let Some(raise) = raise {
                            dma.finished(raise);
                        }
                    });
                if let Err(e) = spawned {
                    tracing::error!("sim dma: completion thread not started: {e}");
                }
                None
            }
        }
    }
}

impl RegisterBlock for SimAxiDma {
    fn read32(&self, offset: usize) -> u32 {
        let mut engine = self.inner.engine.lock();
        let rel = offset % axi_dma::S2MM_DMACR;
        let channel = engine.channel(offset);
        match rel {
            0x00 => channel.cr,
            0x04 => channel.sr,
            0x18 => channel.addr,
            0x1C => channel.addr_msb,
            0x28 => channel.length,
            _ if offset < Block::AxiDma.size() => 0,
            _ => panic!("AXI DMA has no register at {offset:#x}"),
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        let raise = {
            let mut engine = self.inner.engine.lock();
            let rel = offset % axi_dma::S2MM_DMACR;
            match rel {
                0x00 if value & dmacr::RESET != 0 => {
                    engine.reset();
                    None
                }
                0x00 => {
                    let channel = engine.channel(offset);
                    channel.cr = value;
                    if channel.running() {
                        channel.sr &= !dmasr::HALTED;
                        None
                    } else {
                        channel.sr |= dmasr::HALTED;
                        engine.drop_job();
                        None
                    }
                }
                0x04 => {
                    engine.channel(offset).sr &= !(value & dmasr::W1C_MASK);
                    None
                }
                0x18 => {
                    engine.channel(offset).addr = value;
                    None
                }
                0x1C => {
                    engine.channel(offset).addr_msb = value;
                    None
                }
                0x28 => {
                    let channel = engine.channel(offset);
                    if !channel.running() {
                        tracing::warn!("sim dma: LENGTH write to halted channel ignored");
                        return;
                    }
                    channel.length = value & axi_dma::MAX_LENGTH;
                    channel.armed = true;
                    if engine.mm2s.armed && engine.s2mm.armed {
                        self.launch(&mut engine)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        if let Some(raise) = raise {
            self.finished(raise);
        }
    }
}
