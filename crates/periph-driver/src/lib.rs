//! Interrupt-driven transfer sessions for memory-mapped peripherals.
//!
//! A producer stages input, starts a transfer, and a consumer blocks until the
//! hardware reports completion through its interrupt. The same
//! submit → start → collect contract covers a per-sample register loop and a
//! DMA engine that signals completion asynchronously.
//!
//! # Layers
//!
//! ```text
//! TransferSession      slow lock: buffers, staged length, phase
//!   └─ TransferStrategy   ScalarStrategy (squarer port) | BulkStrategy (AXI DMA)
//! SmartTimer, FirFilter  single-block drivers over a CompletionSignal
//! CompletionSignal     fast lock: count/pending/faulted + waiters
//!   └─ CompletionIrq      on_interrupt(): read STATUS, W1C ack, wake
//! SharedIrqLine        fan-out to every handler on one interrupt
//!   └─ IrqPump            UIO device → raise()      (or a sim device)
//! Registers            typed fields, W1C/W1P semantics over a RegisterBlock
//!   └─ MappedRegion       mmap of /dev/uioN or /dev/mem  (or sim::*)
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use periph_driver::sim::{SimCompletion, SimPlatform};
//! use periph_driver::{SessionConfig, StrategyKind};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let platform = SimPlatform::new(SimCompletion::Immediate);
//! let session = platform.open(StrategyKind::Bulk, SessionConfig::from_env())?;
//!
//! session.submit_input(&[3, -5, 7])?;
//! session.start()?;
//! let mut out = [0i32; 3];
//! let n = session.read(&mut out)?;
//! assert_eq!(&out[..n], &[9, 25, 49]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod completion;
mod config;
mod dma;
mod error;
mod fir;
mod irq;
pub mod mmio;
mod session;
pub mod sim;
pub mod strategies;
mod strategy;
mod timer;
pub mod uio;

pub use completion::{CancelToken, CompletionIrq, CompletionSignal, CompletionState, WaitOutcome};
pub use config::{SessionConfig, ENV_MAX_ELEMENTS, ENV_TIMEOUT_MS};
pub use dma::{BulkDescriptor, DmaBuffer, SampleBuffers};
pub use error::{PeriphError, Result};
pub use fir::FirFilter;
pub use irq::{IrqHandler, IrqReturn, IrqSubscription, SharedIrqLine};
pub use mmio::{MappedRegion, RegisterBlock, Registers};
pub use session::{TransferPhase, TransferSession};
pub use strategies::{BulkStrategy, ScalarStrategy};
pub use strategy::{StrategyKind, TransferStrategy};
pub use timer::SmartTimer;
pub use uio::{IrqPump, UioDevice};

/// Register model (re-exported from periph-chip).
pub mod chip {
    pub use periph_chip::{regs, Block, FieldSemantics, RegisterField};
}

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        CancelToken, CompletionSignal, PeriphError, Registers, Result, SessionConfig,
        StrategyKind, TransferSession, TransferStrategy,
    };
}
