//! Session configuration
//!
//! Defaults match the values the platform drivers were tuned with: a one
//! second completion timeout and room for 256 Ki samples per transfer.
//! Every value can be overridden programmatically with the `with_*` builders
//! or from the environment with [`SessionConfig::from_env`].

use periph_chip::regs::squarer;
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable overriding the completion timeout (milliseconds)
pub const ENV_TIMEOUT_MS: &str = "PERIPH_TIMEOUT_MS";
/// Environment variable overriding the session capacity (samples)
pub const ENV_MAX_ELEMENTS: &str = "PERIPH_MAX_ELEMENTS";

/// Tunables for a [`TransferSession`](crate::TransferSession)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Default bound for `read`, the blocking collect
    pub timeout: Duration,
    /// Capacity of the input/output buffers in samples
    pub max_elements: usize,
    /// Status polls allowed while waiting for a DMA channel to halt
    pub halt_poll_limit: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            max_elements: squarer::MAX_SAMPLES,
            halt_poll_limit: 100_000,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `PERIPH_TIMEOUT_MS` / `PERIPH_MAX_ELEMENTS`.
    ///
    /// Unparseable or out-of-range values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_number(ENV_TIMEOUT_MS) {
            config.timeout = Duration::from_millis(ms);
            info!("{ENV_TIMEOUT_MS}: completion timeout {ms}ms");
        }

        if let Some(n) = env_number(ENV_MAX_ELEMENTS) {
            match usize::try_from(n) {
                Ok(n) if (1..=squarer::MAX_SAMPLES).contains(&n) => {
                    config.max_elements = n;
                    info!("{ENV_MAX_ELEMENTS}: capacity {n} samples");
                }
                _ => warn!(
                    "{ENV_MAX_ELEMENTS}={n} outside 1..={}, keeping {}",
                    squarer::MAX_SAMPLES,
                    config.max_elements
                ),
            }
        }

        config
    }

    /// Set the default collect timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the buffer capacity in samples.
    #[must_use]
    pub const fn with_max_elements(mut self, max_elements: usize) -> Self {
        self.max_elements = max_elements;
        self
    }

    /// Set the halt poll budget used when abandoning a DMA transfer.
    #[must_use]
    pub const fn with_halt_poll_limit(mut self, polls: u32) -> Self {
        self.halt_poll_limit = polls;
        self
    }

    /// Check the values are usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the capacity is zero or above the squarer
    /// limit, or if the halt poll budget is zero.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_elements == 0 || self.max_elements > squarer::MAX_SAMPLES {
            return Err(crate::PeriphError::invalid_config(format!(
                "max_elements {} outside 1..={}",
                self.max_elements,
                squarer::MAX_SAMPLES
            )));
        }
        if self.halt_poll_limit == 0 {
            return Err(crate::PeriphError::invalid_config(
                "halt_poll_limit must be non-zero",
            ));
        }
        Ok(())
    }
}

fn env_number(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Ignoring {name}={raw:?}: {e}");
            None
        }
    }
}
