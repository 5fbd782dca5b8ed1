//! FIR filter: four Q15 taps over a block of up to 32 samples
//!
//! One run of the filter:
//!
//! ```text
//! DATA_IN[0..n] ← samples
//! LEN ← n, CTRL.EN ← 1
//! target = completions + 1
//! CTRL.START pulse                    (W1P)
//! wait until completions >= target    (DONE interrupt, acked W1C)
//! samples ← DATA_OUT[0..n] as i16
//! ```
//!
//! The filter may share its interrupt line with other blocks; the
//! [`CompletionSignal`] over STATUS.DONE claims only its own interrupts.

use crate::completion::{CancelToken, CompletionIrq, CompletionSignal, WaitOutcome};
use crate::error::{PeriphError, Result};
use crate::irq::SharedIrqLine;
use crate::mmio::Registers;
use periph_chip::regs::fir::{self, fields};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Driver for one FIR filter instance
#[derive(Debug)]
pub struct FirFilter {
    regs: Registers,
    signal: CompletionSignal,
    cancel: CancelToken,
    /// Serializes runs and tap updates
    op: Mutex<()>,
}

impl FirFilter {
    /// Bind to the filter behind `regs`. The DONE interrupt is not
    /// subscribed until [`attach`](Self::attach).
    ///
    /// # Errors
    ///
    /// Propagates [`CompletionSignal::new`] errors.
    pub fn new(regs: Registers) -> Result<Self> {
        let signal = CompletionSignal::new(regs.clone(), fields::DONE, None)?;
        Ok(Self {
            regs,
            signal,
            cancel: CancelToken::new(),
            op: Mutex::new(()),
        })
    }

    /// Subscribe the DONE interrupt to `line`.
    pub fn attach(&mut self, line: &Arc<SharedIrqLine>) {
        self.signal.attach(line);
    }

    /// Interrupt-side handle
    pub fn irq_handle(&self) -> CompletionIrq {
        self.signal.irq_handle()
    }

    /// Load the filter taps. Taps past `taps.len()` are zeroed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for more than [`fir::NTAPS`] taps.
    #[allow(clippy::cast_sign_loss)]
    pub fn set_taps(&self, taps: &[i16]) -> Result<()> {
        if taps.len() > fir::NTAPS {
            return Err(PeriphError::invalid_config(format!(
                "{} taps, filter has {}",
                taps.len(),
                fir::NTAPS
            )));
        }
        let _op = self.op.lock().unwrap_or_else(PoisonError::into_inner);
        for tap in 0..fir::NTAPS {
            let q15 = taps.get(tap).copied().unwrap_or(0);
            self.regs.write_word(fir::coeff(tap), u32::from(q15 as u16));
        }
        tracing::debug!("fir taps {taps:?}");
        Ok(())
    }

    /// Taps as currently loaded in the coefficient registers
    #[allow(clippy::cast_possible_truncation)]
    pub fn taps(&self) -> [i16; fir::NTAPS] {
        let mut taps = [0i16; fir::NTAPS];
        for (tap, q15) in taps.iter_mut().enumerate() {
            *q15 = self.regs.read_word(fir::coeff(tap)) as u16 as i16;
        }
        taps
    }

    /// Filter `input` and write the results to `output`.
    ///
    /// Returns the number of samples written, `min(input.len(), output.len())`.
    ///
    /// # Errors
    ///
    /// - `EmptyInput` / `TooLarge` unless `input` holds 1 to [`fir::MAX_LEN`] samples
    /// - `Timeout` if DONE does not arrive within `timeout`
    /// - `Cancelled` if [`cancel`](Self::cancel) was called
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn filter(&self, input: &[i16], output: &mut [i16], timeout: Duration) -> Result<usize> {
        if input.is_empty() {
            return Err(PeriphError::EmptyInput);
        }
        if input.len() > fir::MAX_LEN {
            return Err(PeriphError::TooLarge {
                len: input.len(),
                max: fir::MAX_LEN,
            });
        }

        let _op = self.op.lock().unwrap_or_else(PoisonError::into_inner);
        for (i, &x) in input.iter().enumerate() {
            self.regs.write_word(fir::data_in(i), u32::from(x as u16));
        }
        self.regs.write(fields::LEN, input.len() as u32);
        self.regs.write(fields::EN, 1);

        let stale = self.signal.take_completion();
        if stale.pending {
            tracing::warn!("fir: discarding completion left from an earlier run");
        }
        let target = stale.count + 1;
        self.regs.pulse(fields::START);
        tracing::trace!("fir: started {} samples, target {target}", input.len());

        match self.signal.wait_for_next(target, timeout, &self.cancel) {
            WaitOutcome::Ready => {
                self.signal.take_completion();
            }
            WaitOutcome::TimedOut => return Err(PeriphError::timeout(timeout)),
            WaitOutcome::Cancelled => return Err(PeriphError::Cancelled),
        }

        let len = (self.regs.read(fields::LEN) as usize).min(fir::MAX_LEN);
        let n = len.min(output.len());
        for (i, y) in output[..n].iter_mut().enumerate() {
            *y = (self.regs.read_word(fir::data_out(i)) & 0xFFFF) as u16 as i16;
        }
        Ok(n)
    }

    /// Zero LEN and pulse the datapath reset. Taps return to zero.
    pub fn reset(&self) {
        let _op = self.op.lock().unwrap_or_else(PoisonError::into_inner);
        self.regs.write(fields::LEN, 0);
        self.regs.pulse(fields::RESET);
        tracing::info!("fir reset");
    }

    /// Runs finished since attach
    pub fn completions(&self) -> u64 {
        self.signal.count()
    }

    /// Raw STATUS word
    pub fn status(&self) -> u32 {
        self.regs.read_word(fir::STATUS)
    }

    /// Cancel a blocked [`filter`](Self::filter).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimFir;

    fn fixture() -> (FirFilter, Arc<SharedIrqLine>) {
        let sim = SimFir::new();
        let line = SharedIrqLine::new(5);
        sim.connect(&line);
        let mut filter = FirFilter::new(Registers::new(Arc::new(sim))).expect("filter");
        filter.attach(&line);
        (filter, line)
    }

    #[test]
    fn test_identity_tap() {
        let (filter, _line) = fixture();
        filter.set_taps(&[0x7FFF]).expect("taps");
        let mut out = [0i16; 3];
        let n = filter
            .filter(&[100, -200, 300], &mut out, Duration::from_secs(1))
            .expect("filter");
        assert_eq!(n, 3);
        assert_eq!(out, [99, -200, 299]);
        assert_eq!(filter.completions(), 1);
        assert_eq!(filter.status() & fir::status::DONE, 0);
    }

    #[test]
    fn test_moving_average() {
        let (filter, _line) = fixture();
        filter.set_taps(&[0x2000; 4]).expect("taps");
        assert_eq!(filter.taps(), [0x2000; 4]);
        let mut out = [0i16; 5];
        filter
            .filter(&[400; 5], &mut out, Duration::from_secs(1))
            .expect("filter");
        assert_eq!(out, [100, 200, 300, 400, 400]);
    }

    #[test]
    fn test_short_output_buffer() {
        let (filter, _line) = fixture();
        filter.set_taps(&[0x4000]).expect("taps");
        let mut out = [0i16; 2];
        let n = filter
            .filter(&[8, 16, 32, 64], &mut out, Duration::from_secs(1))
            .expect("filter");
        assert_eq!(n, 2);
        assert_eq!(out, [4, 8]);
    }

    #[test]
    fn test_rejects_bad_lengths() {
        let (filter, _line) = fixture();
        let mut out = [0i16; fir::MAX_LEN + 1];
        assert!(matches!(
            filter.filter(&[], &mut out, Duration::from_secs(1)),
            Err(PeriphError::EmptyInput)
        ));
        assert!(matches!(
            filter.filter(&[0; fir::MAX_LEN + 1], &mut out, Duration::from_secs(1)),
            Err(PeriphError::TooLarge { len: 33, max: 32 })
        ));
        assert!(filter.set_taps(&[1; fir::NTAPS + 1]).is_err());
    }

    #[test]
    fn test_unattached_filter_times_out() {
        let filter = FirFilter::new(Registers::new(Arc::new(SimFir::new()))).expect("filter");
        let mut out = [0i16; 1];
        let err = filter
            .filter(&[1], &mut out, Duration::from_millis(10))
            .expect_err("no interrupt");
        assert!(matches!(err, PeriphError::Timeout { duration_ms: 10 }));

        // DONE stays latched until an interrupt is delivered
        assert_eq!(filter.status() & fir::status::DONE, fir::status::DONE);
        filter.irq_handle().on_interrupt();
        assert_eq!(filter.completions(), 1);
    }

    #[test]
    fn test_reset_clears_taps() {
        let (filter, _line) = fixture();
        filter.set_taps(&[1, 2, 3, 4]).expect("taps");
        filter.reset();
        assert_eq!(filter.taps(), [0; 4]);
    }
}
