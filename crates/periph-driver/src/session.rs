//! Transfer session: the process-context half of a transfer
//!
//! A session owns the input/output buffer pair, the staged length and the
//! transfer phase, all behind one mutex (the "slow lock"). The lock is held
//! for the whole of `collect`, including the blocking wait, so nothing can
//! touch the buffers while the hardware owns them.
//!
//! ```text
//!            submit_input                start                 collect
//!  Idle(0) ─────────────► Idle(n) ─────────────► InFlight{t} ──────────► Idle(n)
//!                          │  ▲   (sync strategy)                 │
//!                          │  └──── Completed ◄──┘                │ timeout: abort
//!                          │                                      ▼
//!                          │                      fault ──► Faulted ── reset ──► Idle(0)
//! ```
//!
//! `InFlight` and `Completed` are "busy": a second `start` or `submit_input`
//! waits on the `idle` condition variable until the pending `collect` has
//! taken the results.

use crate::completion::{CancelToken, CompletionSignal, CompletionState, WaitOutcome};
use crate::config::SessionConfig;
use crate::dma::SampleBuffers;
use crate::error::{PeriphError, Result};
use crate::mmio::Registers;
use crate::strategies::{BulkStrategy, ScalarStrategy};
use crate::strategy::{StrategyKind, TransferStrategy};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Where a session is in its transfer cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// No transfer outstanding; input may or may not be staged
    Idle,
    /// A synchronous transfer finished, results not yet collected
    Completed,
    /// Hardware owns the buffers until completion `target` is observed
    InFlight {
        /// Completion count that marks this transfer done
        target: u64,
    },
    /// The hardware reported an error; `reset` is required
    Faulted,
}

impl TransferPhase {
    const fn is_busy(self) -> bool {
        matches!(self, Self::Completed | Self::InFlight { .. })
    }
}

/// State protected by the slow lock
#[derive(Debug)]
struct SessionState {
    buffers: SampleBuffers,
    length: usize,
    phase: TransferPhase,
    strategy: Box<dyn TransferStrategy>,
}

/// Submit/start/collect front end over one accelerator
#[derive(Debug)]
pub struct TransferSession {
    state: Mutex<SessionState>,
    idle: Condvar,
    signal: Option<CompletionSignal>,
    cancel: CancelToken,
    config: SessionConfig,
    sync_runs: AtomicU64,
    kind: StrategyKind,
}

impl TransferSession {
    /// Session over the squarer data port.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or buffers cannot be
    /// allocated.
    pub fn scalar(regs: Registers, config: SessionConfig) -> Result<Self> {
        Self::new(Box::new(ScalarStrategy::new(regs)), None, config)
    }

    /// Session over an AXI DMA engine whose completion interrupt feeds
    /// `signal`.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or buffers cannot be
    /// allocated.
    pub fn bulk(dma: Registers, signal: CompletionSignal, config: SessionConfig) -> Result<Self> {
        let strategy = BulkStrategy::new(dma, config.halt_poll_limit);
        Self::new(Box::new(strategy), Some(signal), config)
    }

    /// Session over any strategy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration fails validation or an
    /// asynchronous strategy is given no completion signal.
    pub fn new(
        strategy: Box<dyn TransferStrategy>,
        signal: Option<CompletionSignal>,
        config: SessionConfig,
    ) -> Result<Self> {
        config.validate()?;
        if !strategy.is_synchronous() && signal.is_none() {
            return Err(PeriphError::invalid_config(format!(
                "{} strategy needs a completion signal",
                strategy.kind()
            )));
        }
        if let Some(signal) = &signal {
            if !signal.is_attached() {
                tracing::warn!("completion signal is not attached to an interrupt line");
            }
        }

        let buffers = SampleBuffers::new(config.max_elements)?;
        let kind = strategy.kind();
        tracing::info!(
            "{kind} transfer session: capacity {} samples, timeout {:?}",
            config.max_elements,
            config.timeout
        );

        Ok(Self {
            state: Mutex::new(SessionState {
                buffers,
                length: 0,
                phase: TransferPhase::Idle,
                strategy,
            }),
            idle: Condvar::new(),
            signal,
            cancel: CancelToken::new(),
            config,
            sync_runs: AtomicU64::new(0),
            kind,
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until no started transfer is waiting to be collected.
    fn lock_idle(&self) -> MutexGuard<'_, SessionState> {
        let mut state = self.lock();
        while state.phase.is_busy() {
            tracing::debug!("waiting for outstanding transfer to be collected");
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state
    }

    fn settle(&self, state: &mut SessionState, phase: TransferPhase) {
        state.phase = phase;
        self.idle.notify_all();
    }

    /// Stage `data` as the next transfer's input. Starts nothing.
    ///
    /// Returns the number of samples staged. Waits if a started transfer has
    /// not been collected yet.
    ///
    /// # Errors
    ///
    /// - `EmptyInput` / `TooLarge` before anything is touched
    /// - `NeedsReset` if the session is faulted
    pub fn submit_input(&self, data: &[i16]) -> Result<usize> {
        if data.is_empty() {
            return Err(PeriphError::EmptyInput);
        }
        if data.len() > self.config.max_elements {
            return Err(PeriphError::TooLarge {
                len: data.len(),
                max: self.config.max_elements,
            });
        }

        let mut state = self.lock_idle();
        if state.phase == TransferPhase::Faulted {
            return Err(PeriphError::NeedsReset);
        }
        state.buffers.input_mut()[..data.len()].copy_from_slice(data);
        state.length = data.len();
        tracing::debug!("staged {} samples", data.len());
        Ok(data.len())
    }

    /// Start processing the staged input.
    ///
    /// Synchronous strategies finish here; asynchronous ones arm the next
    /// completion and return. Waits if a previous transfer has not been
    /// collected yet.
    ///
    /// # Errors
    ///
    /// - `NoDataStaged` if nothing was submitted
    /// - `NeedsReset` if the session is faulted
    /// - strategy errors from programming the hardware
    pub fn start(&self) -> Result<()> {
        let mut guard = self.lock_idle();
        let state = &mut *guard;
        if state.phase == TransferPhase::Faulted {
            return Err(PeriphError::NeedsReset);
        }
        if state.length == 0 {
            return Err(PeriphError::NoDataStaged);
        }

        let length = state.length;
        match &self.signal {
            Some(signal) if !state.strategy.is_synchronous() => {
                let previous = signal.take_completion();
                if previous.pending {
                    tracing::warn!("discarding stale completion #{}", previous.count);
                }
                let target = previous.count + 1;
                state.strategy.begin(&mut state.buffers, length)?;
                state.phase = TransferPhase::InFlight { target };
                tracing::debug!("started {length} samples, awaiting completion #{target}");
            }
            _ => {
                state.strategy.begin(&mut state.buffers, length)?;
                state.phase = TransferPhase::Completed;
                self.sync_runs.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Copy the results of the last `start` into `out`.
    ///
    /// Returns the number of samples copied, `min(out.len(), staged)`, or 0
    /// if there is no started transfer to collect. Blocks up to `timeout` for
    /// an asynchronous transfer.
    ///
    /// # Errors
    ///
    /// - `Timeout`: the transfer was abandoned, the engine halted and any
    ///   completion it had latched consumed; input stays staged and `start`
    ///   may be retried
    /// - `Cancelled`: the transfer is still in flight; collect again to keep
    ///   waiting for it
    /// - `Fault`: the hardware reported an error; the session needs `reset`
    /// - `NeedsReset` if already faulted
    pub fn collect(&self, out: &mut [i32], timeout: Duration) -> Result<usize> {
        let mut guard = self.lock();
        let state = &mut *guard;

        match state.phase {
            TransferPhase::Faulted => Err(PeriphError::NeedsReset),
            TransferPhase::Idle => Ok(0),
            TransferPhase::Completed => {
                let n = copy_results(&state.buffers, state.length, out);
                self.settle(state, TransferPhase::Idle);
                Ok(n)
            }
            TransferPhase::InFlight { target } => {
                let Some(signal) = &self.signal else {
                    return Err(PeriphError::invalid_config(
                        "in flight without a completion signal",
                    ));
                };

                match signal.wait_for_next(target, timeout, &self.cancel) {
                    WaitOutcome::Ready => {
                        let completion = signal.take_completion();
                        if let Err(e) = state.strategy.finish() {
                            self.settle(state, TransferPhase::Faulted);
                            return Err(e);
                        }
                        if completion.faulted {
                            self.settle(state, TransferPhase::Faulted);
                            return Err(PeriphError::fault(
                                completion.error_status,
                                "error interrupt",
                            ));
                        }
                        let n = copy_results(&state.buffers, state.length, out);
                        self.settle(state, TransferPhase::Idle);
                        Ok(n)
                    }
                    WaitOutcome::TimedOut => {
                        tracing::warn!("no completion #{target} within {timeout:?}");
                        let next = match state.strategy.abort() {
                            Ok(()) => {
                                // The engine is stopped; a completion it latched
                                // before stopping must not satisfy the next start
                                if state.strategy.completion_latched() {
                                    tracing::debug!("draining completion of abandoned transfer");
                                    signal.irq_handle().on_interrupt();
                                }
                                signal.take_completion();
                                TransferPhase::Idle
                            }
                            Err(e) => {
                                tracing::error!("engine did not stop: {e}");
                                TransferPhase::Faulted
                            }
                        };
                        self.settle(state, next);
                        Err(PeriphError::timeout(timeout))
                    }
                    WaitOutcome::Cancelled => {
                        tracing::debug!("wait for completion #{target} cancelled");
                        Err(PeriphError::Cancelled)
                    }
                }
            }
        }
    }

    /// [`collect`](Self::collect) with the configured timeout.
    ///
    /// # Errors
    ///
    /// Same as `collect`.
    pub fn read(&self, out: &mut [i32]) -> Result<usize> {
        self.collect(out, self.config.timeout)
    }

    /// Recover from a fault (or abandon anything outstanding): halt and
    /// reset the engine, drop staged input and any unconsumed completion.
    ///
    /// # Errors
    ///
    /// Returns error if the engine does not come out of reset.
    pub fn reset(&self) -> Result<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let TransferPhase::InFlight { .. } = state.phase {
            state.strategy.abort()?;
        }
        state.strategy.reset()?;
        if let Some(signal) = &self.signal {
            signal.take_completion();
        }
        state.length = 0;
        self.settle(state, TransferPhase::Idle);
        tracing::info!("{} session reset", self.kind);
        Ok(())
    }

    /// Token that cancels a blocked `collect` from another thread
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Cancel a blocked `collect`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Completions observed so far (synchronous runs for scalar sessions)
    pub fn completions(&self) -> u64 {
        self.signal
            .as_ref()
            .map_or_else(|| self.sync_runs.load(Ordering::Relaxed), CompletionSignal::count)
    }

    /// Completion signal state, for asynchronous sessions
    pub fn completion_state(&self) -> Option<CompletionState> {
        self.signal.as_ref().map(CompletionSignal::state)
    }

    /// Which strategy moves the data
    pub const fn strategy_kind(&self) -> StrategyKind {
        self.kind
    }

    /// Samples currently staged. Waits for the slow lock, so it blocks while
    /// a `collect` is waiting.
    pub fn staged_len(&self) -> usize {
        self.lock().length
    }

    /// Current phase. Blocks like [`staged_len`](Self::staged_len).
    pub fn phase(&self) -> TransferPhase {
        self.lock().phase
    }

    /// Capacity in samples
    pub const fn capacity(&self) -> usize {
        self.config.max_elements
    }

    /// Session configuration
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }
}

fn copy_results(buffers: &SampleBuffers, length: usize, out: &mut [i32]) -> usize {
    let n = out.len().min(length);
    out[..n].copy_from_slice(&buffers.output()[..n]);
    n
}

impl Drop for TransferSession {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let TransferPhase::InFlight { target } = state.phase {
            tracing::warn!("dropping session with completion #{target} outstanding");
            if let Err(e) = state.strategy.abort() {
                tracing::error!("engine did not stop before buffers were freed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimSquarer;
    use std::sync::Arc;

    fn scalar_session() -> TransferSession {
        let regs = Registers::new(Arc::new(SimSquarer::new()));
        TransferSession::scalar(regs, SessionConfig::default().with_max_elements(16))
            .expect("session")
    }

    #[test]
    fn test_caller_errors_mutate_nothing() {
        let session = scalar_session();
        assert!(matches!(session.submit_input(&[]), Err(PeriphError::EmptyInput)));
        assert!(matches!(
            session.submit_input(&[1; 17]),
            Err(PeriphError::TooLarge { len: 17, max: 16 })
        ));
        assert_eq!(session.staged_len(), 0);
        assert!(matches!(session.start(), Err(PeriphError::NoDataStaged)));
    }

    #[test]
    fn test_scalar_one_shot() {
        let session = scalar_session();
        session.submit_input(&[3, -5, 7]).expect("submit");
        session.start().expect("start");
        assert_eq!(session.phase(), TransferPhase::Completed);

        let mut out = [0i32; 3];
        assert_eq!(session.read(&mut out).expect("collect"), 3);
        assert_eq!(out, [9, 25, 49]);
        assert_eq!(session.read(&mut out).expect("eof"), 0);
        assert_eq!(session.completions(), 1);
    }

    #[test]
    fn test_short_output_buffer() {
        let session = scalar_session();
        session.submit_input(&[1, 2, 3, 4]).expect("submit");
        session.start().expect("start");
        let mut out = [0i32; 2];
        assert_eq!(session.read(&mut out).expect("collect"), 2);
        assert_eq!(out, [1, 4]);
    }

    #[test]
    fn test_async_strategy_requires_signal() {
        let dma = crate::sim::SimAxiDma::new(
            crate::sim::SimCompletion::Immediate,
            crate::SharedIrqLine::new(0),
        );
        let strategy = BulkStrategy::new(Registers::new(Arc::new(dma)), 10);
        let err = TransferSession::new(Box::new(strategy), None, SessionConfig::default())
            .expect_err("no signal");
        assert!(matches!(err, PeriphError::InvalidConfig { .. }));
    }
}
