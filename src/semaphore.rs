//! Fair counting semaphore with blocking and async acquisition
//!
//! The semaphore tracks `(count, max)` permits behind one short critical
//! section and keeps a strict FIFO queue of waiters. Parked threads and
//! suspended futures share the same queue, ordered purely by enqueue time,
//! so the two call styles can be mixed freely on one instance.
//!
//! A released permit is handed directly to the head waiter instead of being
//! returned to the count, which is what makes the ordering strict: a fresh
//! `try_acquire` can never overtake a queued waiter because the count stays
//! at zero while the queue is non-empty.
//!
//! # Example
//!
//! ```
//! use fair_sync::Semaphore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sem = Semaphore::new(2, 2)?;
//!
//! let permit = sem.try_acquire()?;
//! assert_eq!(sem.available_permits(), 1);
//!
//! // Permit returns to the semaphore when dropped
//! drop(permit);
//! assert_eq!(sem.available_permits(), 2);
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use crate::cancel::{CancelToken, WakerKey};
use crate::error::{AcquireError, InvalidArgument, ReleaseError, TryAcquireError};
use crate::wait::{self, WaitNode, WaitState};

/// A fair counting semaphore.
///
/// Cloning is cheap and hands out another reference to the same shared
/// state; clone the semaphore into each producer or worker instead of
/// wrapping it in another `Arc`.
///
/// # Example
///
/// ```
/// use fair_sync::Semaphore;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let sem = Semaphore::new(1, 1)?;
/// let worker = sem.clone();
///
/// let permit = worker.try_acquire()?;
/// assert_eq!(sem.available_permits(), 0);
/// drop(permit);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Semaphore {
    inner: Arc<SemaphoreInner>,
}

#[derive(Debug)]
struct SemaphoreInner {
    /// Upper bound `count` may return to on release
    max: usize,
    state: Mutex<SemState>,
}

#[derive(Debug)]
struct SemState {
    /// Available permits; stays 0 while `waiters` is non-empty
    count: usize,
    closed: bool,
    /// FIFO queue of unresolved waiters
    waiters: VecDeque<Arc<WaitNode>>,
}

impl Semaphore {
    /// Create a semaphore with `initial` available permits and a `max` bound.
    ///
    /// `max` must be at least 1 and `initial` must not exceed it; violations
    /// fail with [`InvalidArgument`] before any shared state exists.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidArgument`] if `max == 0` or `initial > max`.
    pub fn new(initial: usize, max: usize) -> Result<Self, InvalidArgument> {
        if max == 0 {
            return Err(InvalidArgument("semaphore max must be at least 1"));
        }
        if initial > max {
            return Err(InvalidArgument("initial permits must not exceed max"));
        }
        Ok(Self {
            inner: Arc::new(SemaphoreInner {
                max,
                state: Mutex::new(SemState {
                    count: initial,
                    closed: false,
                    waiters: VecDeque::new(),
                }),
            }),
        })
    }

    /// Acquire a permit, suspending the task until one is granted.
    ///
    /// The returned future is cancel-safe: abandoning it (via `cancel` or by
    /// dropping it) withdraws the waiter from the queue, and a permit that
    /// was already handed over is re-offered to the next waiter rather than
    /// leaked.
    ///
    /// # Errors
    ///
    /// Resolves to [`AcquireError::Closed`] if the semaphore is closed
    /// before or while waiting, and [`AcquireError::Cancelled`] if `cancel`
    /// fires first.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use fair_sync::{CancelToken, Semaphore};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let sem = Semaphore::new(8, 8)?;
    /// let cancel = CancelToken::new();
    ///
    /// let permit = sem.acquire(&cancel).await?;
    /// // bounded work here
    /// drop(permit);
    /// # Ok(())
    /// # }
    /// ```
    pub fn acquire(&self, cancel: &CancelToken) -> AcquireFuture<'_> {
        AcquireFuture {
            semaphore: self,
            cancel: cancel.clone(),
            node: None,
            registration: None,
        }
    }

    /// Acquire a permit, parking the calling thread until one is granted.
    ///
    /// Blocked threads take their place in the same FIFO queue as suspended
    /// tasks. Must not be called from an async executor thread.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::Closed`] if the semaphore is closed before or
    /// while waiting.
    pub fn blocking_acquire(&self) -> Result<Permit, AcquireError> {
        self.blocking_acquire_inner(None)
    }

    /// Like [`blocking_acquire`](Self::blocking_acquire) with a deadline.
    ///
    /// # Errors
    ///
    /// Deadline expiry behaves exactly like an external cancellation: the
    /// waiter is withdrawn without consuming a permit and the call returns
    /// [`AcquireError::Cancelled`].
    pub fn blocking_acquire_timeout(&self, timeout: Duration) -> Result<Permit, AcquireError> {
        self.blocking_acquire_inner(Instant::now().checked_add(timeout))
    }

    fn blocking_acquire_inner(&self, deadline: Option<Instant>) -> Result<Permit, AcquireError> {
        let node = {
            let mut state = self.lock();
            if state.closed {
                return Err(AcquireError::Closed);
            }
            if state.count > 0 && state.waiters.is_empty() {
                state.count -= 1;
                return Ok(Permit::new(self.clone()));
            }
            let node = WaitNode::new(wait::current_thread_waker());
            state.waiters.push_back(Arc::clone(&node));
            node
        };

        loop {
            match node.try_claim() {
                WaitState::Granted => return Ok(Permit::new(self.clone())),
                WaitState::Closed => return Err(AcquireError::Closed),
                _ => {}
            }

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let mut state = self.lock();
                        if let Some(pos) =
                            state.waiters.iter().position(|n| Arc::ptr_eq(n, &node))
                        {
                            state.waiters.remove(pos);
                            return Err(AcquireError::Cancelled);
                        }
                        // Resolved while we were checking the clock; the next
                        // iteration claims the outcome.
                        continue;
                    }
                    std::thread::park_timeout(deadline - now);
                }
                None => std::thread::park(),
            }
        }
    }

    /// Acquire a permit without waiting.
    ///
    /// Fails with `NoPermits` whenever earlier waiters are queued; the queue
    /// always wins.
    ///
    /// # Errors
    ///
    /// Returns [`TryAcquireError::Closed`] after [`close`](Self::close),
    /// otherwise [`TryAcquireError::NoPermits`] when none are available.
    pub fn try_acquire(&self) -> Result<Permit, TryAcquireError> {
        let mut state = self.lock();
        if state.closed {
            return Err(TryAcquireError::Closed);
        }
        if state.count == 0 || !state.waiters.is_empty() {
            return Err(TryAcquireError::NoPermits);
        }
        state.count -= 1;
        drop(state);
        Ok(Permit::new(self.clone()))
    }

    /// Manually release one permit.
    ///
    /// If waiters are queued the permit is handed directly to the head
    /// waiter and the count stays at zero. Otherwise the count is
    /// incremented; incrementing past `max` is a double-release bug and
    /// fails loudly with [`ReleaseError::Overflow`] instead of being
    /// clamped.
    ///
    /// Pairs with [`Permit::forget`] for callers that manage release
    /// manually instead of through the RAII guard.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::Closed`] after [`close`](Self::close) and
    /// [`ReleaseError::Overflow`] when the count is already at `max`.
    pub fn release(&self) -> Result<(), ReleaseError> {
        let waker = {
            let mut state = self.lock();
            if state.closed {
                return Err(ReleaseError::Closed);
            }
            match state.waiters.pop_front() {
                Some(node) => node.resolve(WaitState::Granted),
                None => {
                    if state.count == self.inner.max {
                        return Err(ReleaseError::Overflow);
                    }
                    state.count += 1;
                    return Ok(());
                }
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }

    /// Return a permit that is known to be outstanding.
    ///
    /// Used by `Permit::drop` and by re-offers after a grant/cancel race;
    /// overflow is impossible on this path because every caller holds a
    /// permit obtained from a successful acquire.
    pub(crate) fn release_permit(&self) {
        let waker = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            match state.waiters.pop_front() {
                Some(node) => node.resolve(WaitState::Granted),
                None => {
                    debug_assert!(state.count < self.inner.max, "permit released twice");
                    if state.count < self.inner.max {
                        state.count += 1;
                    }
                    return;
                }
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Close the semaphore, failing all queued waiters with `Closed`.
    ///
    /// Waiters are resolved in FIFO order and woken outside the critical
    /// section. Every subsequent acquire fails fast. Idempotent.
    pub fn close(&self) {
        let wakers: Vec<Waker> = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state
                .waiters
                .drain(..)
                .filter_map(|node| node.resolve(WaitState::Closed))
                .collect()
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// Snapshot of the available permit count.
    ///
    /// Advisory only: under concurrency the value may be stale immediately
    /// after it is read.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.lock().count
    }

    /// The configured maximum permit count
    #[must_use]
    pub fn max_permits(&self) -> usize {
        self.inner.max
    }

    /// Returns true once [`close`](Self::close) has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, SemState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// RAII guard for one acquired permit.
///
/// Dropping the guard returns the permit on every exit path, including
/// panics and early returns. Call [`forget`](Permit::forget) to take over
/// manual release via [`Semaphore::release`].
#[derive(Debug)]
#[must_use = "permit is returned to the semaphore immediately if not held"]
pub struct Permit {
    semaphore: Semaphore,
}

impl Permit {
    fn new(semaphore: Semaphore) -> Self {
        Self { semaphore }
    }

    /// Drop the guard without returning the permit.
    ///
    /// The caller becomes responsible for a matching
    /// [`Semaphore::release`], or for deliberately retiring the permit.
    pub fn forget(self) {
        std::mem::forget(self);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.semaphore.release_permit();
    }
}

/// Future returned by [`Semaphore::acquire`].
///
/// The first poll either takes a permit from the count or enqueues a
/// waiter; later polls claim the handed-over permit once a release resolves
/// the node. Dropping the future withdraws the waiter and re-offers any
/// permit that was granted in the meantime.
#[must_use = "futures do nothing unless awaited"]
pub struct AcquireFuture<'a> {
    semaphore: &'a Semaphore,
    cancel: CancelToken,
    node: Option<Arc<WaitNode>>,
    /// Waker slot held with the cancel token while pending
    registration: Option<WakerKey>,
}

impl AcquireFuture<'_> {
    /// Vacate the cancel-token waker slot once this wait settles
    fn clear_registration(&mut self) {
        if let Some(key) = self.registration.take() {
            self.cancel.deregister(key);
        }
    }

    /// Withdraw from the queue, or re-offer a permit granted after the
    /// waiter stopped caring.
    fn abandon(&mut self) {
        self.clear_registration();
        let Some(node) = self.node.take() else {
            return;
        };
        let granted = {
            let mut state = self.semaphore.lock();
            if let Some(pos) = state.waiters.iter().position(|n| Arc::ptr_eq(n, &node)) {
                state.waiters.remove(pos);
                return;
            }
            // Already dequeued: a concurrent release resolved this node
            // under the same lock, so its state is settled by now.
            node.try_claim() == WaitState::Granted
        };
        if granted {
            self.semaphore.release_permit();
        }
    }
}

impl Future for AcquireFuture<'_> {
    type Output = Result<Permit, AcquireError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.cancel.is_cancelled() {
            this.abandon();
            return Poll::Ready(Err(AcquireError::Cancelled));
        }

        match &this.node {
            None => {
                let mut state = this.semaphore.lock();
                if state.closed {
                    return Poll::Ready(Err(AcquireError::Closed));
                }
                if state.count > 0 && state.waiters.is_empty() {
                    state.count -= 1;
                    drop(state);
                    return Poll::Ready(Ok(Permit::new(this.semaphore.clone())));
                }
                let node = WaitNode::new(cx.waker().clone());
                state.waiters.push_back(Arc::clone(&node));
                drop(state);
                this.node = Some(node);
                this.registration = this.cancel.register(cx.waker());
                Poll::Pending
            }
            Some(node) => match node.try_claim() {
                WaitState::Granted => {
                    this.node = None;
                    this.clear_registration();
                    Poll::Ready(Ok(Permit::new(this.semaphore.clone())))
                }
                WaitState::Closed => {
                    this.node = None;
                    this.clear_registration();
                    Poll::Ready(Err(AcquireError::Closed))
                }
                _ => {
                    node.update_waker(cx.waker());
                    match this.registration {
                        Some(key) => this.cancel.update(key, cx.waker()),
                        None => this.registration = this.cancel.register(cx.waker()),
                    }
                    Poll::Pending
                }
            },
        }
    }
}

impl Drop for AcquireFuture<'_> {
    fn drop(&mut self) {
        self.abandon();
    }
}
