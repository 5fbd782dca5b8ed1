//! Completion signal: interrupt-side acknowledgment and process-side waiting
//!
//! The signal owns the only state shared between interrupt context and the
//! process context, a [`CompletionState`] plus the list of blocked waiters,
//! both behind one spin lock (the "fast lock"). That lock is held for a few
//! loads and stores at a time, never across a sleep, and its guard never
//! leaves this module.
//!
//! ```text
//! process context                       interrupt context
//! ───────────────                       ─────────────────
//! wait_for_next(target)                 CompletionIrq::on_interrupt()
//!   lock: count >= target? ─ yes ─► Ready   read STATUS
//!   lock: register waiter                 done|error clear → NotMine
//!   park_timeout ◄───────── unpark ──     W1C exactly the observed bits
//!   lock: count >= target? ─ yes ─► Ready   lock: count += 1, pending = true
//!   cancelled? ─► Cancelled               unpark waiters with target <= count
//!   deadline?  ─► TimedOut                Handled
//! ```
//!
//! The capabilities are split: [`CompletionSignal`] is held by the session and
//! can wait, snapshot and consume completions; [`CompletionIrq`] is what gets
//! subscribed to the interrupt line and can do nothing but `on_interrupt`.

use crate::error::{PeriphError, Result};
use crate::irq::{IrqHandler, IrqReturn, IrqSubscription, SharedIrqLine};
use crate::mmio::Registers;
use periph_chip::{FieldSemantics, RegisterField};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

/// Snapshot of the completion counter and flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionState {
    /// Completions observed since the signal was created; never decreases
    pub count: u64,
    /// A completion has been observed and not yet consumed
    pub pending: bool,
    /// The last unconsumed completion reported an error
    pub faulted: bool,
    /// Status word read by the interrupt that reported the error, 0 if none
    pub error_status: u32,
}

/// Result of [`CompletionSignal::wait_for_next`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The counter reached the target
    Ready,
    /// The timeout elapsed first
    TimedOut,
    /// A cancellation request was delivered (and consumed)
    Cancelled,
}

// ── Fast lock contents ──────────────────────────────────────────────────────

#[derive(Debug)]
struct Waiter {
    id: u64,
    target: u64,
    thread: Thread,
}

#[derive(Debug, Default)]
struct Fast {
    state: CompletionState,
    /// Sorted by target, ties in registration order
    waiters: Vec<Waiter>,
    next_id: u64,
}

impl Fast {
    fn register(&mut self, target: u64, thread: Thread) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let at = self.waiters.partition_point(|w| w.target <= target);
        self.waiters.insert(at, Waiter { id, target, thread });
        id
    }

    fn remove(&mut self, id: u64) {
        if let Some(at) = self.waiters.iter().position(|w| w.id == id) {
            self.waiters.remove(at);
        }
    }

    /// Remove and hand out every waiter whose target has been reached,
    /// lowest target first. Does not allocate.
    fn release_ready(&mut self, mut wake: impl FnMut(&Waiter)) {
        let count = self.state.count;
        let ready = self.waiters.partition_point(|w| w.target <= count);
        for waiter in self.waiters.drain(..ready) {
            wake(&waiter);
        }
    }
}

struct Shared {
    regs: Registers,
    status: usize,
    done: u32,
    error: u32,
    fast: spin::Mutex<Fast>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("status", &format_args!("{:#x}", self.status))
            .field("done", &format_args!("{:#x}", self.done))
            .field("error", &format_args!("{:#x}", self.error))
            .finish_non_exhaustive()
    }
}

// ── Interrupt side ──────────────────────────────────────────────────────────

/// Interrupt-context half of a completion signal
#[derive(Debug, Clone)]
pub struct CompletionIrq {
    shared: Arc<Shared>,
}

impl CompletionIrq {
    /// Check the status register and, if the completion (or error) bit is
    /// set, acknowledge it and record one completion.
    ///
    /// Never blocks on process context, never allocates, never touches
    /// transfer buffers.
    pub fn on_interrupt(&self) -> IrqReturn {
        let shared = &*self.shared;
        let status = shared.regs.read_word(shared.status);
        let observed = status & (shared.done | shared.error);
        if observed == 0 {
            return IrqReturn::NotMine;
        }

        // Pure W1C: exactly the bits we saw, no read-modify-write
        shared.regs.write_word(shared.status, observed);

        let faulted = observed & shared.error != 0;
        if faulted {
            tracing::warn!("completion reported error, status={status:#010x}");
        }

        let mut fast = shared.fast.lock();
        fast.state.count += 1;
        fast.state.pending = true;
        if faulted {
            fast.state.faulted = true;
            fast.state.error_status = status;
        }
        tracing::trace!("completion {}", fast.state.count);
        fast.release_ready(|w| w.thread.unpark());
        IrqReturn::Handled
    }
}

impl IrqHandler for CompletionIrq {
    fn handle(&self) -> IrqReturn {
        self.on_interrupt()
    }
}

// ── Process side ────────────────────────────────────────────────────────────

/// Process-context half of a completion signal
///
/// Created per device binding; dropping it detaches the interrupt side from
/// its line.
#[derive(Debug)]
pub struct CompletionSignal {
    shared: Arc<Shared>,
    subscription: Option<IrqSubscription>,
}

impl CompletionSignal {
    /// Observe `done` (and optionally `error`) in a status register.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if either field is not W1C, or if `error` lives
    /// in a different register than `done`.
    pub fn new(regs: Registers, done: RegisterField, error: Option<RegisterField>) -> Result<Self> {
        if done.semantics() != FieldSemantics::WriteOneToClear {
            return Err(PeriphError::invalid_config(format!(
                "completion field at {:#x} is {}, not W1C",
                done.offset(),
                done.semantics()
            )));
        }
        let error_mask = match error {
            None => 0,
            Some(e) if e.offset() != done.offset() => {
                return Err(PeriphError::invalid_config(
                    "error field must share the completion status register",
                ))
            }
            Some(e) if e.semantics() != FieldSemantics::WriteOneToClear => {
                return Err(PeriphError::invalid_config(format!(
                    "error field is {}, not W1C",
                    e.semantics()
                )))
            }
            Some(e) => e.mask(),
        };

        Ok(Self {
            shared: Arc::new(Shared {
                regs,
                status: done.offset(),
                done: done.mask(),
                error: error_mask,
                fast: spin::Mutex::new(Fast::default()),
            }),
            subscription: None,
        })
    }

    /// Interrupt-side capability for this signal.
    pub fn irq_handle(&self) -> CompletionIrq {
        CompletionIrq {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Subscribe the interrupt side to `line`, replacing any previous
    /// subscription.
    pub fn attach(&mut self, line: &Arc<SharedIrqLine>) {
        let handler: Arc<dyn IrqHandler> = Arc::new(self.irq_handle());
        self.subscription = Some(line.subscribe(handler));
        tracing::debug!("completion signal attached to irq {}", line.number());
    }

    /// Unsubscribe from the current line, if any.
    pub fn detach(&mut self) {
        self.subscription = None;
    }

    /// Whether the interrupt side is subscribed to a line
    pub const fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    /// Current completion count
    pub fn count(&self) -> u64 {
        self.shared.fast.lock().state.count
    }

    /// Current state snapshot
    pub fn state(&self) -> CompletionState {
        self.shared.fast.lock().state
    }

    /// Consume one completion: clear `pending` and the error flags,
    /// returning the state as it was.
    pub fn take_completion(&self) -> CompletionState {
        let mut fast = self.shared.fast.lock();
        let snapshot = fast.state;
        fast.state.pending = false;
        fast.state.faulted = false;
        fast.state.error_status = 0;
        snapshot
    }

    /// Number of threads currently blocked in [`wait_for_next`](Self::wait_for_next)
    pub fn waiters(&self) -> usize {
        self.shared.fast.lock().waiters.len()
    }

    /// Block until the completion count reaches `target`, `timeout` elapses,
    /// or `cancel` is triggered.
    ///
    /// A count already at or past `target` returns `Ready` at once. A
    /// completion that lands between registration and sleeping is not lost:
    /// the waiter is on the list before the count is rechecked.
    ///
    /// A `timeout` too large to form a deadline (`Duration::MAX`) waits
    /// without one.
    pub fn wait_for_next(&self, target: u64, timeout: Duration, cancel: &CancelToken) -> WaitOutcome {
        let deadline = Instant::now().checked_add(timeout);
        let me = thread::current();
        let ticket = cancel.bind(me.clone());

        let id = {
            let mut fast = self.shared.fast.lock();
            if fast.state.count >= target {
                drop(fast);
                cancel.unbind(ticket);
                return WaitOutcome::Ready;
            }
            fast.register(target, me)
        };

        let outcome = loop {
            if self.shared.fast.lock().state.count >= target {
                break WaitOutcome::Ready;
            }
            if cancel.consume() {
                break WaitOutcome::Cancelled;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break WaitOutcome::TimedOut;
                    }
                    thread::park_timeout(deadline - now);
                }
                None => thread::park(),
            }
        };

        self.shared.fast.lock().remove(id);
        cancel.unbind(ticket);
        tracing::trace!("wait for completion {target}: {outcome:?}");
        outcome
    }
}

// ── Cancellation ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Bound {
    threads: Vec<(u64, Thread)>,
    next_ticket: u64,
}

#[derive(Debug, Default)]
struct CancelInner {
    requested: AtomicBool,
    bound: spin::Mutex<Bound>,
}

/// Cancels a blocked [`CompletionSignal::wait_for_next`] from another thread
///
/// A request stays latched until a wait observes it and returns
/// [`WaitOutcome::Cancelled`]; the next wait then proceeds normally. Several
/// threads may wait with the same token: `cancel` wakes all of them and one
/// request cancels exactly one wait.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    /// New token with no request latched
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake the waiting threads, if any.
    pub fn cancel(&self) {
        self.inner.requested.store(true, Ordering::Release);
        for (_, thread) in &self.inner.bound.lock().threads {
            thread.unpark();
        }
    }

    /// Whether a request is latched
    pub fn is_cancelled(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    fn consume(&self) -> bool {
        self.inner.requested.swap(false, Ordering::AcqRel)
    }

    fn bind(&self, thread: Thread) -> u64 {
        let mut bound = self.inner.bound.lock();
        let ticket = bound.next_ticket;
        bound.next_ticket += 1;
        bound.threads.push((ticket, thread));
        ticket
    }

    fn unbind(&self, ticket: u64) {
        let mut bound = self.inner.bound.lock();
        if let Some(at) = bound.threads.iter().position(|(t, _)| *t == ticket) {
            bound.threads.swap_remove(at);
        }
    }

    /// Threads currently waiting with this token
    pub fn bound_waiters(&self) -> usize {
        self.inner.bound.lock().threads.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Access, RecordingBlock, RegisterFile};
    use periph_chip::regs::{axi_dma, fir};
    use periph_chip::Block;

    fn fir_signal() -> (CompletionSignal, Arc<RecordingBlock<RegisterFile>>) {
        let rec = Arc::new(RecordingBlock::new(RegisterFile::new(Block::Fir.size())));
        let signal = CompletionSignal::new(Registers::new(rec.clone()), fir::fields::DONE, None)
            .expect("signal");
        (signal, rec)
    }

    #[test]
    fn test_not_mine_touches_nothing() {
        let (signal, rec) = fir_signal();
        assert_eq!(signal.irq_handle().on_interrupt(), IrqReturn::NotMine);
        assert_eq!(rec.take(), vec![Access::Read(fir::STATUS, 0)]);
        assert_eq!(signal.state(), CompletionState::default());
    }

    #[test]
    fn test_handled_acks_exactly_observed_bits() {
        let (signal, rec) = fir_signal();
        rec.inner().set(fir::STATUS, fir::status::DONE);
        assert_eq!(signal.irq_handle().on_interrupt(), IrqReturn::Handled);
        assert_eq!(
            rec.take(),
            vec![
                Access::Read(fir::STATUS, fir::status::DONE),
                Access::Write(fir::STATUS, fir::status::DONE),
            ]
        );
        let state = signal.state();
        assert_eq!(state.count, 1);
        assert!(state.pending);
        assert!(!state.faulted);
    }

    #[test]
    fn test_error_bit_marks_fault() {
        let rec = Arc::new(RecordingBlock::new(RegisterFile::new(Block::AxiDma.size())));
        let signal = CompletionSignal::new(
            Registers::new(rec.clone()),
            axi_dma::fields::S2MM_IOC,
            Some(axi_dma::fields::S2MM_ERR),
        )
        .expect("signal");
        rec.inner()
            .set(axi_dma::S2MM_DMASR, axi_dma::dmasr::ERR_IRQ | axi_dma::dmasr::DMA_SLV_ERR);

        assert_eq!(signal.irq_handle().on_interrupt(), IrqReturn::Handled);
        let writes: Vec<_> = rec
            .take()
            .into_iter()
            .filter(|a| matches!(a, Access::Write(..)))
            .collect();
        assert_eq!(writes, vec![Access::Write(axi_dma::S2MM_DMASR, axi_dma::dmasr::ERR_IRQ)]);

        let taken = signal.take_completion();
        assert!(taken.pending && taken.faulted);
        assert_eq!(
            taken.error_status,
            axi_dma::dmasr::ERR_IRQ | axi_dma::dmasr::DMA_SLV_ERR
        );
        let after = signal.state();
        assert!(!after.pending && !after.faulted);
        assert_eq!(after.error_status, 0);
        assert_eq!(after.count, 1);
    }

    #[test]
    fn test_rejects_non_w1c_field() {
        let regs = Registers::new(Arc::new(RegisterFile::new(Block::Fir.size())));
        let err = CompletionSignal::new(regs, fir::fields::START, None).expect_err("W1P field");
        assert!(matches!(err, PeriphError::InvalidConfig { .. }));
    }

    #[test]
    fn test_release_ready_in_target_order() {
        let mut fast = Fast::default();
        let me = thread::current();
        for target in [3, 1, 2, 1] {
            fast.register(target, me.clone());
        }
        fast.state.count = 2;

        let mut woken = Vec::new();
        fast.release_ready(|w| woken.push(w.target));
        assert_eq!(woken, vec![1, 1, 2]);
        assert_eq!(fast.waiters.iter().map(|w| w.target).collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_wait_ready_immediately_when_reached() {
        let (signal, rec) = fir_signal();
        rec.inner().set(fir::STATUS, fir::status::DONE);
        signal.irq_handle().on_interrupt();
        let outcome = signal.wait_for_next(1, Duration::ZERO, &CancelToken::new());
        assert_eq!(outcome, WaitOutcome::Ready);
    }

    #[test]
    fn test_wait_times_out() {
        let (signal, _rec) = fir_signal();
        let start = Instant::now();
        let outcome = signal.wait_for_next(1, Duration::from_millis(20), &CancelToken::new());
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(signal.waiters(), 0);
    }

    #[test]
    fn test_wait_woken_by_interrupt() {
        let (signal, rec) = fir_signal();
        let irq = signal.irq_handle();
        let fire = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            rec.inner().set(fir::STATUS, fir::status::DONE);
            irq.on_interrupt()
        });
        let outcome = signal.wait_for_next(1, Duration::from_secs(5), &CancelToken::new());
        assert_eq!(outcome, WaitOutcome::Ready);
        assert_eq!(fire.join().expect("irq thread"), IrqReturn::Handled);
    }

    #[test]
    fn test_cancel_is_consumed() {
        let (signal, _rec) = fir_signal();
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(
            signal.wait_for_next(1, Duration::from_secs(5), &token),
            WaitOutcome::Cancelled
        );
        assert!(!token.is_cancelled());
        assert_eq!(
            signal.wait_for_next(1, Duration::from_millis(5), &token),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn test_unbounded_timeout_waits_for_interrupt() {
        let (signal, rec) = fir_signal();
        let irq = signal.irq_handle();
        let fire = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            rec.inner().set(fir::STATUS, fir::status::DONE);
            irq.on_interrupt()
        });
        let outcome = signal.wait_for_next(1, Duration::MAX, &CancelToken::new());
        assert_eq!(outcome, WaitOutcome::Ready);
        assert_eq!(fire.join().expect("irq thread"), IrqReturn::Handled);
    }

    #[test]
    fn test_shared_token_still_wakes_remaining_waiter() {
        let (signal, rec) = fir_signal();
        let signal = Arc::new(signal);
        let token = CancelToken::new();

        let long = {
            let signal = signal.clone();
            let token = token.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let outcome = signal.wait_for_next(5, Duration::from_secs(10), &token);
                (outcome, started.elapsed())
            })
        };
        while signal.waiters() == 0 {
            thread::yield_now();
        }

        // A second wait on the same token comes and goes
        rec.inner().set(fir::STATUS, fir::status::DONE);
        signal.irq_handle().on_interrupt();
        assert_eq!(
            signal.wait_for_next(1, Duration::from_secs(1), &token),
            WaitOutcome::Ready
        );
        assert_eq!(token.bound_waiters(), 1);

        token.cancel();
        let (outcome, elapsed) = long.join().expect("waiter");
        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert!(elapsed < Duration::from_secs(5));
    }
}
