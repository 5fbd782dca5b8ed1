//! Shared interrupt lines
//!
//! A [`SharedIrqLine`] is one interrupt input with any number of subscribed
//! handlers, the way level-triggered peripherals share a single line on the
//! platform interrupt controller. Raising the line offers the interrupt to
//! every handler; each one checks its own status register and either claims
//! it ([`IrqReturn::Handled`]) or declines ([`IrqReturn::NotMine`]).
//!
//! ```text
//! UIO pump / sim device ── raise() ──► handler A ── NotMine
//!                                  └─► handler B ── Handled
//!                                      (unclaimed raises count as spurious)
//! ```
//!
//! Handlers run on the raising thread. They must not block or allocate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Result of offering an interrupt to a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// The handler's device raised the interrupt and it was acknowledged
    Handled,
    /// Not this device; nothing was touched
    NotMine,
}

/// An interrupt-context handler
pub trait IrqHandler: Send + Sync {
    /// Inspect the device and acknowledge the interrupt if it is ours.
    fn handle(&self) -> IrqReturn;
}

type HandlerList = Vec<(u64, Arc<dyn IrqHandler>)>;

/// One interrupt line shared by several devices
pub struct SharedIrqLine {
    number: u32,
    handlers: spin::RwLock<HandlerList>,
    next_id: AtomicU64,
    raised: AtomicU64,
    spurious: AtomicU64,
}

impl std::fmt::Debug for SharedIrqLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedIrqLine")
            .field("number", &self.number)
            .field("handlers", &self.handlers.read().len())
            .field("raised", &self.raised())
            .field("spurious", &self.spurious())
            .finish()
    }
}

impl SharedIrqLine {
    /// Create line `number` with no handlers.
    pub fn new(number: u32) -> Arc<Self> {
        Arc::new(Self {
            number,
            handlers: spin::RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            raised: AtomicU64::new(0),
            spurious: AtomicU64::new(0),
        })
    }

    /// Interrupt number
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// Subscribe `handler`. The handler stays registered until the returned
    /// subscription is dropped.
    pub fn subscribe(self: &Arc<Self>, handler: Arc<dyn IrqHandler>) -> IrqSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().push((id, handler));
        tracing::debug!("irq {}: handler {id} subscribed", self.number);
        IrqSubscription {
            line: Arc::clone(self),
            id,
        }
    }

    /// Deliver one interrupt to every subscribed handler.
    ///
    /// Returns `true` if at least one handler claimed it.
    pub fn raise(&self) -> bool {
        self.raised.fetch_add(1, Ordering::Relaxed);
        let handlers = self.handlers.read();
        let mut claimed = false;
        for (_, handler) in handlers.iter() {
            if handler.handle() == IrqReturn::Handled {
                claimed = true;
            }
        }
        drop(handlers);

        if !claimed {
            self.spurious.fetch_add(1, Ordering::Relaxed);
        }
        claimed
    }

    /// Number of registered handlers
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Total raises
    pub fn raised(&self) -> u64 {
        self.raised.load(Ordering::Relaxed)
    }

    /// Raises no handler claimed
    pub fn spurious(&self) -> u64 {
        self.spurious.load(Ordering::Relaxed)
    }

    fn unsubscribe(&self, id: u64) {
        self.handlers.write().retain(|(hid, _)| *hid != id);
        tracing::debug!("irq {}: handler {id} unsubscribed", self.number);
    }
}

/// Registration of a handler on a [`SharedIrqLine`]; unsubscribes on drop
#[derive(Debug)]
#[must_use = "dropping the subscription detaches the handler"]
pub struct IrqSubscription {
    line: Arc<SharedIrqLine>,
    id: u64,
}

impl IrqSubscription {
    /// The line this subscription is on
    pub fn line(&self) -> &Arc<SharedIrqLine> {
        &self.line
    }
}

impl Drop for IrqSubscription {
    fn drop(&mut self) {
        self.line.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct Flag {
        asserted: AtomicBool,
        seen: AtomicU64,
    }

    impl IrqHandler for Flag {
        fn handle(&self) -> IrqReturn {
            self.seen.fetch_add(1, Ordering::Relaxed);
            if self.asserted.swap(false, Ordering::AcqRel) {
                IrqReturn::Handled
            } else {
                IrqReturn::NotMine
            }
        }
    }

    fn flag() -> Arc<Flag> {
        Arc::new(Flag {
            asserted: AtomicBool::new(false),
            seen: AtomicU64::new(0),
        })
    }

    #[test]
    fn test_every_handler_sees_the_raise() {
        let line = SharedIrqLine::new(5);
        let a = flag();
        let b = flag();
        let _sa = line.subscribe(a.clone());
        let _sb = line.subscribe(b.clone());

        b.asserted.store(true, Ordering::Release);
        assert!(line.raise());
        assert_eq!(a.seen.load(Ordering::Relaxed), 1);
        assert_eq!(b.seen.load(Ordering::Relaxed), 1);
        assert_eq!(line.spurious(), 0);
    }

    #[test]
    fn test_unclaimed_raise_is_spurious() {
        let line = SharedIrqLine::new(0);
        let _s = line.subscribe(flag());
        assert!(!line.raise());
        assert_eq!(line.spurious(), 1);
        assert_eq!(line.raised(), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let line = SharedIrqLine::new(0);
        let a = flag();
        let sub = line.subscribe(a.clone());
        assert_eq!(line.handler_count(), 1);
        drop(sub);
        assert_eq!(line.handler_count(), 0);
        line.raise();
        assert_eq!(a.seen.load(Ordering::Relaxed), 0);
    }
}
