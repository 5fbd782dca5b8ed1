//! SmartTimer: period/duty timer with a wrap interrupt
//!
//! The timer raises STATUS.WRAP each time its counter passes PERIOD. A
//! [`CompletionSignal`] watching WRAP turns those interrupts into a wrap
//! count, and [`SmartTimer::wait_wrap`] blocks for the next one:
//!
//! ```text
//! target = wrap_count + 1
//! wait until wrap_count >= target     (one wrap that happens after the call)
//! ```
//!
//! PERIOD and DUTY are shadowed while the timer runs; writes made while
//! enabled commit at the next wrap, and STATUS.UPD_PENDING reads 1 meanwhile.

use crate::completion::{CancelToken, CompletionIrq, CompletionSignal, WaitOutcome};
use crate::error::{PeriphError, Result};
use crate::irq::SharedIrqLine;
use crate::mmio::Registers;
use periph_chip::regs::timer::{self, fields};
use std::sync::Arc;
use std::time::Duration;

/// Driver for one SmartTimer instance
#[derive(Debug)]
pub struct SmartTimer {
    regs: Registers,
    signal: CompletionSignal,
    cancel: CancelToken,
}

impl SmartTimer {
    /// Bind to the timer behind `regs`. The timer's interrupt is not
    /// subscribed until [`attach`](Self::attach).
    ///
    /// # Errors
    ///
    /// Propagates [`CompletionSignal::new`] errors.
    pub fn new(regs: Registers) -> Result<Self> {
        let signal = CompletionSignal::new(regs.clone(), fields::WRAP, None)?;
        Ok(Self {
            regs,
            signal,
            cancel: CancelToken::new(),
        })
    }

    /// Subscribe the wrap interrupt to `line`.
    pub fn attach(&mut self, line: &Arc<SharedIrqLine>) {
        self.signal.attach(line);
    }

    /// Interrupt-side handle, for delivering interrupts without a line
    pub fn irq_handle(&self) -> CompletionIrq {
        self.signal.irq_handle()
    }

    /// Program PERIOD and DUTY.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `duty` exceeds `period` or `period` is zero.
    pub fn configure(&self, period: u32, duty: u32) -> Result<()> {
        if period == 0 || duty > period {
            return Err(PeriphError::invalid_config(format!(
                "duty {duty} / period {period} out of range"
            )));
        }
        self.regs.write(fields::PERIOD, period);
        self.regs.write(fields::DUTY, duty);
        tracing::debug!(
            "timer period={period} duty={duty}{}",
            if self.update_pending() { " (pending)" } else { "" }
        );
        Ok(())
    }

    /// Start counting.
    pub fn enable(&self) {
        self.regs.write(fields::EN, 1);
        tracing::info!("timer enabled, period={}", self.period());
    }

    /// Stop counting.
    pub fn disable(&self) {
        self.regs.write(fields::EN, 0);
        tracing::info!("timer disabled after {} wraps", self.wrap_count());
    }

    /// Clear the counter.
    pub fn reset_counter(&self) {
        self.regs.pulse(fields::RST);
    }

    /// Whether the timer is counting
    pub fn is_enabled(&self) -> bool {
        self.regs.read(fields::EN) == 1
    }

    /// Current PERIOD register
    pub fn period(&self) -> u32 {
        self.regs.read(fields::PERIOD)
    }

    /// Current DUTY register
    pub fn duty(&self) -> u32 {
        self.regs.read(fields::DUTY)
    }

    /// A PERIOD/DUTY write is waiting for the next wrap to commit
    pub fn update_pending(&self) -> bool {
        self.regs.read(fields::UPD_PENDING) == 1
    }

    /// Raw STATUS word
    pub fn status(&self) -> u32 {
        self.regs.read_word(timer::STATUS)
    }

    /// Wraps observed since attach
    pub fn wrap_count(&self) -> u64 {
        self.signal.count()
    }

    /// Block until the next wrap and return the new wrap count.
    ///
    /// # Errors
    ///
    /// - `Timeout` if no wrap arrives within `timeout`
    /// - `Cancelled` if [`cancel`](Self::cancel) was called
    pub fn wait_wrap(&self, timeout: Duration) -> Result<u64> {
        let target = self.signal.count() + 1;
        match self.signal.wait_for_next(target, timeout, &self.cancel) {
            WaitOutcome::Ready => Ok(self.signal.take_completion().count),
            WaitOutcome::TimedOut => Err(PeriphError::timeout(timeout)),
            WaitOutcome::Cancelled => Err(PeriphError::Cancelled),
        }
    }

    /// Cancel a blocked [`wait_wrap`](Self::wait_wrap).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimTimer;

    fn fixture() -> (SmartTimer, SimTimer) {
        let sim = SimTimer::new();
        let timer = SmartTimer::new(Registers::new(Arc::new(sim.clone()))).expect("timer");
        (timer, sim)
    }

    #[test]
    fn test_reset_values() {
        let (timer, _sim) = fixture();
        assert_eq!(timer.period(), timer::PERIOD_RESET);
        assert_eq!(timer.duty(), timer::DUTY_RESET);
        assert!(!timer.is_enabled());
    }

    #[test]
    fn test_configure_rejects_duty_above_period() {
        let (timer, _sim) = fixture();
        assert!(timer.configure(100, 101).is_err());
        assert!(timer.configure(0, 0).is_err());
        timer.configure(100, 50).expect("configure");
        assert_eq!(timer.period(), 100);
    }

    #[test]
    fn test_shadowed_update_while_enabled() {
        let (timer, sim) = fixture();
        timer.enable();
        timer.configure(500, 250).expect("configure");
        assert!(timer.update_pending());
        assert_eq!(timer.period(), timer::PERIOD_RESET);

        sim.wrap();
        assert!(!timer.update_pending());
        assert_eq!(timer.period(), 500);
    }

    #[test]
    fn test_wait_wrap_counts() {
        let (mut timer, sim) = fixture();
        let line = SharedIrqLine::new(3);
        sim.connect(&line);
        timer.attach(&line);
        timer.enable();

        let driver = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            sim.wrap();
        });
        assert_eq!(timer.wait_wrap(Duration::from_secs(5)).expect("wrap"), 1);
        driver.join().expect("sim thread");
        assert_eq!(timer.status() & timer::status::WRAP, 0);
    }

    #[test]
    fn test_wait_wrap_timeout() {
        let (timer, _sim) = fixture();
        let err = timer.wait_wrap(Duration::from_millis(10)).expect_err("no wrap");
        assert!(matches!(err, PeriphError::Timeout { duration_ms: 10 }));
    }
}
