//! Shared wait-queue plumbing
//!
//! A [`WaitNode`] is a single-resolution slot shared between a FIFO queue and
//! one suspended acquirer. Thread-blocking waiters are bridged into the same
//! queue as polled futures through an unpark [`Waker`], so both styles share
//! one enqueue order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Wake, Waker};
use std::thread::Thread;

/// Resolution state of a queued waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitState {
    /// Queued; the stored waker fires on resolution
    Waiting,
    /// A permit was handed over but not yet claimed by the waiter
    Granted,
    /// The owning semaphore was closed while this waiter was queued
    Closed,
    /// The granted permit was claimed; terminal
    Claimed,
}

#[derive(Debug)]
struct NodeInner {
    state: WaitState,
    waker: Option<Waker>,
}

/// Single-resolution waiter slot.
///
/// State transitions out of `Waiting` happen while the owning component holds
/// its critical section; the wake itself always runs after that section is
/// released, which is why [`WaitNode::resolve`] hands the waker back instead
/// of firing it.
#[derive(Debug)]
pub(crate) struct WaitNode {
    inner: Mutex<NodeInner>,
}

impl WaitNode {
    pub(crate) fn new(waker: Waker) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(NodeInner {
                state: WaitState::Waiting,
                waker: Some(waker),
            }),
        })
    }

    /// Resolve a waiting node, returning the waker to fire once the caller
    /// has left its critical section.
    pub(crate) fn resolve(&self, state: WaitState) -> Option<Waker> {
        let mut inner = self.lock();
        debug_assert_eq!(inner.state, WaitState::Waiting, "waiter resolved twice");
        inner.state = state;
        inner.waker.take()
    }

    /// Claim a granted permit if one was handed over.
    ///
    /// Returns the state observed before the claim: `Granted` means the
    /// caller now owns the permit; `Waiting` and `Closed` are unchanged.
    pub(crate) fn try_claim(&self) -> WaitState {
        let mut inner = self.lock();
        if inner.state == WaitState::Granted {
            inner.state = WaitState::Claimed;
            WaitState::Granted
        } else {
            inner.state
        }
    }

    /// Refresh the stored waker on re-poll
    pub(crate) fn update_waker(&self, waker: &Waker) {
        let mut inner = self.lock();
        match &inner.waker {
            Some(existing) if existing.will_wake(waker) => {}
            _ => inner.waker = Some(waker.clone()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NodeInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct ThreadUnparker {
    thread: Thread,
}

impl Wake for ThreadUnparker {
    fn wake(self: Arc<Self>) {
        self.thread.unpark();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.thread.unpark();
    }
}

/// Waker that unparks the calling thread.
///
/// Lets a parked thread stand in the same FIFO queue as suspended futures;
/// the unpark token is sticky, so a wake between the waiter's state check and
/// its `park` call is never lost.
pub(crate) fn current_thread_waker() -> Waker {
    Waker::from(Arc::new(ThreadUnparker {
        thread: std::thread::current(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::Waker;

    #[test]
    fn resolve_hands_back_waker_once() {
        let node = WaitNode::new(Waker::noop().clone());
        assert!(node.resolve(WaitState::Granted).is_some());
        assert_eq!(node.try_claim(), WaitState::Granted);
        // claimed is terminal
        assert_eq!(node.try_claim(), WaitState::Claimed);
    }

    #[test]
    fn claim_leaves_waiting_node_untouched() {
        let node = WaitNode::new(Waker::noop().clone());
        assert_eq!(node.try_claim(), WaitState::Waiting);
        assert!(node.resolve(WaitState::Closed).is_some());
        assert_eq!(node.try_claim(), WaitState::Closed);
    }

    #[test]
    fn thread_waker_unparks_parked_thread() {
        let waker = current_thread_waker();
        waker.wake();
        // sticky unpark token: park returns immediately instead of hanging
        std::thread::park();
    }
}
