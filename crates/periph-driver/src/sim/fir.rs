//! FIR filter model: four Q15 taps, up to 32 samples, DONE interrupt

use crate::irq::SharedIrqLine;
use crate::mmio::RegisterBlock;
use periph_chip::regs::fir::{self, ctrl, status};
use std::sync::Arc;

#[derive(Debug)]
struct FirRegs {
    ctrl: u32,
    status: u32,
    len: u32,
    coeff: [u32; fir::NTAPS],
    data_in: [u32; fir::MAX_LEN],
    data_out: [u32; fir::MAX_LEN],
}

impl FirRegs {
    const fn reset() -> Self {
        Self {
            ctrl: 0,
            status: 0,
            len: 0,
            coeff: [0; fir::NTAPS],
            data_in: [0; fir::MAX_LEN],
            data_out: [0; fir::MAX_LEN],
        }
    }

    /// y[n] = sat16(Σ c[k]·x[n-k] >> 15)
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn run(&mut self) {
        let len = (self.len as usize).min(fir::MAX_LEN);
        for n in 0..len {
            let acc: i64 = (0..fir::NTAPS)
                .filter(|&k| k <= n)
                .map(|k| i64::from(q15(self.coeff[k])) * i64::from(q15(self.data_in[n - k])))
                .sum();
            let y = (acc >> 15).clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16;
            self.data_out[n] = u32::from(y as u16);
        }
        self.status |= status::DONE;
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn q15(raw: u32) -> i16 {
    raw as u16 as i16
}

#[derive(Debug)]
struct Inner {
    regs: spin::Mutex<FirRegs>,
    line: spin::Mutex<Option<Arc<SharedIrqLine>>>,
}

/// Simulated FIR filter
#[derive(Debug, Clone)]
pub struct SimFir {
    inner: Arc<Inner>,
}

impl Default for SimFir {
    fn default() -> Self {
        Self::new()
    }
}

impl SimFir {
    /// Filter in reset state, not connected to any line
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                regs: spin::Mutex::new(FirRegs::reset()),
                line: spin::Mutex::new(None),
            }),
        }
    }

    /// Drive `line` with the DONE interrupt.
    pub fn connect(&self, line: &Arc<SharedIrqLine>) {
        *self.inner.line.lock() = Some(line.clone());
    }
}

impl RegisterBlock for SimFir {
    fn read32(&self, offset: usize) -> u32 {
        let regs = self.inner.regs.lock();
        match offset {
            fir::CTRL => regs.ctrl,
            fir::STATUS => regs.status,
            fir::LEN => regs.len,
            o if (fir::COEFF0..fir::coeff(fir::NTAPS)).contains(&o) => {
                regs.coeff[(o - fir::COEFF0) / fir::STRIDE]
            }
            o if (fir::DATA_IN..fir::data_in(fir::MAX_LEN)).contains(&o) => {
                regs.data_in[(o - fir::DATA_IN) / fir::STRIDE]
            }
            o if (fir::DATA_OUT..fir::data_out(fir::MAX_LEN)).contains(&o) => {
                regs.data_out[(o - fir::DATA_OUT) / fir::STRIDE]
            }
            _ => 0,
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        let done = {
            let mut regs = self.inner.regs.lock();
            match offset {
                fir::CTRL => {
                    if value & ctrl::RESET != 0 {
                        *regs = FirRegs::reset();
                    }
                    regs.ctrl = value & ctrl::EN;
                    if value & ctrl::START != 0 && value & ctrl::EN != 0 {
                        regs.run();
                        true
                    } else {
                        false
                    }
                }
                fir::STATUS => {
                    regs.status &= !(value & status::DONE);
                    false
                }
                fir::LEN => {
                    regs.len = value & 0xFFFF;
                    false
                }
                o if (fir::COEFF0..fir::coeff(fir::NTAPS)).contains(&o) => {
                    regs.coeff[(o - fir::COEFF0) / fir::STRIDE] = value & 0xFFFF;
                    false
                }
                o if (fir::DATA_IN..fir::data_in(fir::MAX_LEN)).contains(&o) => {
                    regs.data_in[(o - fir::DATA_IN) / fir::STRIDE] = value & 0xFFFF;
                    false
                }
                _ => false,
            }
        };
        if done {
            let line = self.inner.line.lock().clone();
            if let Some(line) = line {
                line.raise();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_filter() {
        let sim = SimFir::new();
        sim.write32(fir::coeff(0), 0x7FFF);
        for (i, x) in [100u32, 200, 300].iter().enumerate() {
            sim.write32(fir::data_in(i), *x);
        }
        sim.write32(fir::LEN, 3);
        sim.write32(fir::CTRL, ctrl::EN | ctrl::START);

        assert_eq!(sim.read32(fir::STATUS), status::DONE);
        assert_eq!(sim.read32(fir::CTRL), ctrl::EN);
        assert_eq!(sim.read32(fir::data_out(0)), 99);
        assert_eq!(sim.read32(fir::data_out(2)), 299);
    }

    #[test]
    fn test_start_without_enable_does_nothing() {
        let sim = SimFir::new();
        sim.write32(fir::LEN, 1);
        sim.write32(fir::CTRL, ctrl::START);
        assert_eq!(sim.read32(fir::STATUS), 0);
    }
}
