//! Transfer strategy abstraction
//!
//! A strategy moves the staged input through the accelerator and leaves the
//! results in the session's output buffer. The session does not care how:
//!
//! - **Scalar**: one register round-trip per sample, finished before `begin`
//!   returns
//! - **Bulk**: DMA descriptors programmed into the engine, finished when the
//!   completion signal fires
//!
//! Tests substitute their own implementation to drive the session directly.

use crate::dma::SampleBuffers;
use crate::error::Result;
use std::fmt::Debug;

/// How a [`TransferSession`](crate::TransferSession) moves data through the hardware
pub trait TransferStrategy: Debug + Send {
    /// Start processing the first `length` samples of `buffers`.
    ///
    /// Synchronous strategies have written every output sample when this
    /// returns. Asynchronous strategies have only armed the hardware; the
    /// session must not touch `buffers` until the completion signal reports
    /// the transfer.
    ///
    /// # Errors
    ///
    /// Returns error if the hardware cannot be programmed.
    fn begin(&mut self, buffers: &mut SampleBuffers, length: usize) -> Result<()>;

    /// True if `begin` completes the transfer itself (no completion signal)
    fn is_synchronous(&self) -> bool;

    /// Called once the completion for the last `begin` has been consumed,
    /// before results are read.
    ///
    /// # Errors
    ///
    /// Returns `Fault` if the hardware reported a transfer error.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// Abandon an in-flight transfer: stop the hardware from touching the
    /// buffers. Called on timeout and when the session is dropped.
    ///
    /// # Errors
    ///
    /// Returns error if the engine does not stop.
    fn abort(&mut self) -> Result<()> {
        Ok(())
    }

    /// Whether the hardware still holds an unacknowledged completion for the
    /// last `begin`. Checked after `abort` so the session can drain it.
    fn completion_latched(&self) -> bool {
        false
    }

    /// Bring the hardware back to a usable state after a fault.
    ///
    /// # Errors
    ///
    /// Returns error if the reset does not complete.
    fn reset(&mut self) -> Result<()>;

    /// Strategy identifier for diagnostics
    fn kind(&self) -> StrategyKind;
}

/// Strategy identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// Per-sample register I/O
    Scalar,
    /// DMA with completion interrupt
    Bulk,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar => write!(f, "scalar"),
            Self::Bulk => write!(f, "bulk"),
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = crate::PeriphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "scalar" | "mmio" => Ok(Self::Scalar),
            "bulk" | "dma" => Ok(Self::Bulk),
            other => Err(crate::PeriphError::invalid_config(format!(
                "unknown strategy '{other}' (expected scalar or bulk)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!("scalar".parse::<StrategyKind>().ok(), Some(StrategyKind::Scalar));
        assert_eq!("DMA".parse::<StrategyKind>().ok(), Some(StrategyKind::Bulk));
        assert!("pio".parse::<StrategyKind>().is_err());
        assert_eq!(StrategyKind::Bulk.to_string(), "bulk");
    }
}
