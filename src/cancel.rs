//! Cooperative cancellation
//!
//! A [`CancelToken`] is a cloneable flag shared between the caller that may
//! cancel and the operations that should observe it. Pending acquire, send
//! and receive futures check the token at every poll and register their waker
//! with it, so `cancel()` wakes them promptly instead of waiting for the next
//! unrelated wakeup.
//!
//! Registrations are keyed slots: a waiter holds its [`WakerKey`] for as long
//! as it is pending and vacates the slot when it completes or is dropped, so
//! a long-lived token shared across many operations does not accumulate
//! stale wakers. Vacated slots are reused by later registrations.
//!
//! Dropping a pending future is the other cancellation path and has the same
//! effect: the waiter is withdrawn from its queue and any permit that was
//! already handed over is re-offered, never leaked.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Waker;

/// Handle to one registered waker slot, held by the pending operation
#[derive(Debug, Clone, Copy)]
pub(crate) struct WakerKey(usize);

#[derive(Debug, Default)]
struct TokenState {
    cancelled: bool,
    /// Waker per pending registration; `None` slots are vacated and reusable
    wakers: Vec<Option<Waker>>,
}

/// Cloneable cancellation signal.
///
/// All clones observe the same flag. Cancellation is one-way and idempotent;
/// a cancelled token stays cancelled.
///
/// # Example
///
/// ```
/// use fair_sync::CancelToken;
///
/// let token = CancelToken::new();
/// let observer = token.clone();
/// assert!(!observer.is_cancelled());
///
/// token.cancel();
/// assert!(observer.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Mutex<TokenState>>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once `cancel` has been called on any clone
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Set the flag and wake every registered waiter. Idempotent.
    pub fn cancel(&self) {
        let wakers = {
            let mut state = self.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            std::mem::take(&mut state.wakers)
        };
        for waker in wakers.into_iter().flatten() {
            waker.wake();
        }
    }

    /// Register a waker to fire on cancellation.
    ///
    /// Returns the slot key the caller must hand back via
    /// [`deregister`](Self::deregister) once the operation settles. If the
    /// token is already cancelled the waker fires immediately and nothing is
    /// registered.
    pub(crate) fn register(&self, waker: &Waker) -> Option<WakerKey> {
        let key = {
            let mut state = self.lock();
            if state.cancelled {
                None
            } else {
                match state.wakers.iter().position(Option::is_none) {
                    Some(index) => {
                        state.wakers[index] = Some(waker.clone());
                        Some(WakerKey(index))
                    }
                    None => {
                        state.wakers.push(Some(waker.clone()));
                        Some(WakerKey(state.wakers.len() - 1))
                    }
                }
            }
        };
        if key.is_none() {
            waker.wake_by_ref();
        }
        key
    }

    /// Refresh the waker stored under `key` on re-poll.
    ///
    /// Fires the waker instead if the token was cancelled in the meantime,
    /// so a wakeup racing the registration is never lost.
    pub(crate) fn update(&self, key: WakerKey, waker: &Waker) {
        let fire = {
            let mut state = self.lock();
            if state.cancelled {
                true
            } else {
                if let Some(slot) = state.wakers.get_mut(key.0) {
                    match slot {
                        Some(existing) if existing.will_wake(waker) => {}
                        _ => *slot = Some(waker.clone()),
                    }
                }
                false
            }
        };
        if fire {
            waker.wake_by_ref();
        }
    }

    /// Vacate a registration slot once its operation completed or was
    /// dropped. The slot is reused by later registrations.
    pub(crate) fn deregister(&self, key: WakerKey) {
        let mut state = self.lock();
        if let Some(slot) = state.wakers.get_mut(key.0) {
            *slot = None;
        }
    }

    /// (live, allocated) waker slot counts, for leak assertions
    #[cfg(test)]
    pub(crate) fn waker_slots(&self) -> (usize, usize) {
        let state = self.lock();
        let live = state.wakers.iter().filter(|slot| slot.is_some()).count();
        (live, state.wakers.len())
    }

    fn lock(&self) -> MutexGuard<'_, TokenState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
