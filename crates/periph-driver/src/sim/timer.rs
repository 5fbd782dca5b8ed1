//! SmartTimer model
//!
//! Time does not advance on its own; [`SimTimer::wrap`] stands in for the
//! counter passing PERIOD. Everything else follows the register map:
//! PERIOD/DUTY shadowing while enabled, WRAP as a level interrupt until
//! acknowledged with W1C.

use crate::irq::SharedIrqLine;
use crate::mmio::RegisterBlock;
use periph_chip::regs::timer::{self, ctrl, status};
use std::sync::Arc;

#[derive(Debug)]
struct TimerRegs {
    ctrl: u32,
    status: u32,
    period: u32,
    duty: u32,
    shadow: Option<(u32, u32)>,
    counter: u32,
}

impl TimerRegs {
    const fn reset() -> Self {
        Self {
            ctrl: 0,
            status: 0,
            period: timer::PERIOD_RESET,
            duty: timer::DUTY_RESET,
            shadow: None,
            counter: 0,
        }
    }

    const fn enabled(&self) -> bool {
        self.ctrl & ctrl::EN != 0
    }

    fn stage(&mut self, period: Option<u32>, duty: Option<u32>) {
        if self.enabled() {
            let (p, d) = self.shadow.unwrap_or((self.period, self.duty));
            self.shadow = Some((period.unwrap_or(p), duty.unwrap_or(d)));
            self.status |= status::UPD_PENDING;
        } else {
            self.period = period.unwrap_or(self.period);
            self.duty = duty.unwrap_or(self.duty);
        }
    }
}

#[derive(Debug)]
struct Inner {
    regs: spin::Mutex<TimerRegs>,
    line: spin::Mutex<Option<Arc<SharedIrqLine>>>,
}

/// Simulated SmartTimer
#[derive(Debug, Clone)]
pub struct SimTimer {
    inner: Arc<Inner>,
}

impl Default for SimTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTimer {
    /// Timer in reset state, not connected to any line
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                regs: spin::Mutex::new(TimerRegs::reset()),
                line: spin::Mutex::new(None),
            }),
        }
    }

    /// Drive `line` with the wrap interrupt.
    pub fn connect(&self, line: &Arc<SharedIrqLine>) {
        *self.inner.line.lock() = Some(line.clone());
    }

    /// The counter wrapped: commit shadowed PERIOD/DUTY, set WRAP and raise
    /// the line. Does nothing while disabled; returns whether it wrapped.
    pub fn wrap(&self) -> bool {
        {
            let mut regs = self.inner.regs.lock();
            if !regs.enabled() {
                return false;
            }
            if let Some((period, duty)) = regs.shadow.take() {
                regs.period = period;
                regs.duty = duty;
                regs.status &= !status::UPD_PENDING;
            }
            regs.counter = 0;
            regs.status |= status::WRAP;
        }
        let line = self.inner.line.lock().clone();
        if let Some(line) = line {
            line.raise();
        }
        true
    }

    /// Advance the counter by `cycles`, wrapping each time it passes PERIOD.
    /// Returns the number of wraps.
    pub fn tick(&self, cycles: u32) -> u32 {
        let mut wraps = 0;
        for _ in 0..cycles {
            let wrapped = {
                let mut regs = self.inner.regs.lock();
                if !regs.enabled() {
                    break;
                }
                regs.counter += 1;
                regs.counter > regs.period
            };
            if wrapped && self.wrap() {
                wraps += 1;
            }
        }
        wraps
    }
}

impl RegisterBlock for SimTimer {
    fn read32(&self, offset: usize) -> u32 {
        let regs = self.inner.regs.lock();
        match offset {
            timer::CTRL => regs.ctrl,
            timer::STATUS => regs.status,
            timer::PERIOD => regs.period,
            timer::DUTY => regs.duty,
            _ => panic!("SmartTimer has no register at {offset:#x}"),
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        let mut regs = self.inner.regs.lock();
        match offset {
            timer::CTRL => {
                if value & ctrl::RST != 0 {
                    regs.counter = 0;
                }
                regs.ctrl = value & ctrl::EN;
                if !regs.enabled() {
                    if let Some((period, duty)) = regs.shadow.take() {
                        regs.period = period;
                        regs.duty = duty;
                        regs.status &= !status::UPD_PENDING;
                    }
                }
            }
            timer::STATUS => regs.status &= !(value & status::WRAP),
            timer::PERIOD => regs.stage(Some(value), None),
            timer::DUTY => regs.stage(None, Some(value)),
            _ => panic!("SmartTimer has no register at {offset:#x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_is_w1c() {
        let sim = SimTimer::new();
        sim.write32(timer::CTRL, ctrl::EN);
        assert!(sim.wrap());
        assert_eq!(sim.read32(timer::STATUS) & status::WRAP, status::WRAP);
        sim.write32(timer::STATUS, 0);
        assert_eq!(sim.read32(timer::STATUS) & status::WRAP, status::WRAP);
        sim.write32(timer::STATUS, status::WRAP);
        assert_eq!(sim.read32(timer::STATUS), 0);
    }

    #[test]
    fn test_rst_reads_back_zero() {
        let sim = SimTimer::new();
        sim.write32(timer::CTRL, ctrl::EN | ctrl::RST);
        assert_eq!(sim.read32(timer::CTRL), ctrl::EN);
    }

    #[test]
    fn test_tick_wraps_past_period() {
        let sim = SimTimer::new();
        sim.write32(timer::PERIOD, 3);
        sim.write32(timer::CTRL, ctrl::EN);
        assert_eq!(sim.tick(8), 2);
        assert_eq!(sim.tick(8), 2);
    }

    #[test]
    fn test_disabled_timer_does_not_wrap() {
        let sim = SimTimer::new();
        assert!(!sim.wrap());
        assert_eq!(sim.tick(1_000), 0);
    }
}
