//! Bounded FIFO channel for producer/consumer handoff
//!
//! Capacity accounting is done entirely by two [`Semaphore`]s: `slots`
//! tracks free buffer space and `items` tracks values ready to consume. A
//! send moves one permit from `slots` to `items` with the value in between;
//! a receive moves it back. The buffer itself is touched only inside one
//! narrow critical section, and the channel holds no other lock.
//!
//! Producers declare end-of-input with [`BoundedChannel::complete`]: the
//! buffered values drain in order and receivers then observe `Ok(None)`
//! instead of blocking forever. [`BoundedChannel::abort`] tears everything
//! down immediately and discards the buffer.
//!
//! # Example
//!
//! ```rust,no_run
//! use fair_sync::{BoundedChannel, CancelToken};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = BoundedChannel::new(8)?;
//! let cancel = CancelToken::new();
//!
//! queue.send("job", &cancel).await.map_err(|_| "rejected")?;
//! queue.complete();
//!
//! while let Some(job) = queue.recv(&cancel).await? {
//!     println!("{job}");
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{
    AcquireError, InvalidArgument, RecvError, SendError, TryAcquireError, TryRecvError,
    TrySendError,
};
use crate::semaphore::{Permit, Semaphore};

/// A bounded multi-producer, multi-consumer FIFO queue.
///
/// Cloning hands out another handle to the same channel; any handle may
/// send, receive, complete or abort. Values are delivered in insertion
/// order, and a full channel exerts backpressure by suspending senders
/// until a receiver frees a slot.
pub struct BoundedChannel<T> {
    inner: Arc<ChannelInner<T>>,
}

impl<T> Clone for BoundedChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ChannelInner<T> {
    capacity: usize,
    /// Free buffer capacity; senders acquire, receivers release
    slots: Semaphore,
    /// Buffered values ready to consume; receivers acquire, senders release
    items: Semaphore,
    state: Mutex<ChanState<T>>,
}

struct ChanState<T> {
    buffer: VecDeque<T>,
    completed: bool,
    aborted: bool,
}

impl<T> BoundedChannel<T> {
    /// Create a channel that buffers at most `capacity` values.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidArgument`] if `capacity == 0`.
    pub fn new(capacity: usize) -> Result<Self, InvalidArgument> {
        if capacity == 0 {
            return Err(InvalidArgument("channel capacity must be at least 1"));
        }
        Ok(Self {
            inner: Arc::new(ChannelInner {
                capacity,
                slots: Semaphore::new(capacity, capacity)?,
                items: Semaphore::new(0, capacity)?,
                state: Mutex::new(ChanState {
                    buffer: VecDeque::with_capacity(capacity),
                    completed: false,
                    aborted: false,
                }),
            }),
        })
    }

    /// Send a value, suspending while the channel is full.
    ///
    /// The completed flag is checked again after the slot is granted: a
    /// sender that was parked on a full channel when [`complete`] fired is
    /// refused and its slot returned, so completion never admits new values.
    ///
    /// [`complete`]: Self::complete
    ///
    /// # Errors
    ///
    /// Returns the value inside [`SendError::Closed`] once the channel is
    /// completed or aborted, or [`SendError::Cancelled`] if `cancel` fires
    /// while waiting for a slot.
    pub async fn send(&self, value: T, cancel: &CancelToken) -> Result<(), SendError<T>> {
        if self.is_shut() {
            return Err(SendError::Closed(value));
        }
        match self.inner.slots.acquire(cancel).await {
            Ok(permit) => self
                .push_with_slot(value, permit)
                .map_err(SendError::Closed),
            Err(AcquireError::Closed) => Err(SendError::Closed(value)),
            Err(AcquireError::Cancelled) => Err(SendError::Cancelled(value)),
        }
    }

    /// Send a value, parking the calling thread while the channel is full
    ///
    /// # Errors
    ///
    /// Same outcomes as [`send`](Self::send), minus cancellation.
    pub fn blocking_send(&self, value: T) -> Result<(), SendError<T>> {
        if self.is_shut() {
            return Err(SendError::Closed(value));
        }
        match self.inner.slots.blocking_acquire() {
            Ok(permit) => self
                .push_with_slot(value, permit)
                .map_err(SendError::Closed),
            Err(AcquireError::Closed) => Err(SendError::Closed(value)),
            Err(AcquireError::Cancelled) => Err(SendError::Cancelled(value)),
        }
    }

    /// Like [`blocking_send`](Self::blocking_send) with a deadline; expiry
    /// behaves as a cancellation.
    ///
    /// # Errors
    ///
    /// [`SendError::Cancelled`] on deadline expiry, otherwise as
    /// [`send`](Self::send).
    pub fn blocking_send_timeout(&self, value: T, timeout: Duration) -> Result<(), SendError<T>> {
        if self.is_shut() {
            return Err(SendError::Closed(value));
        }
        match self.inner.slots.blocking_acquire_timeout(timeout) {
            Ok(permit) => self
                .push_with_slot(value, permit)
                .map_err(SendError::Closed),
            Err(AcquireError::Closed) => Err(SendError::Closed(value)),
            Err(AcquireError::Cancelled) => Err(SendError::Cancelled(value)),
        }
    }

    /// Send a value without waiting
    ///
    /// # Errors
    ///
    /// [`TrySendError::Full`] when no slot is free right now,
    /// [`TrySendError::Closed`] once completed or aborted.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        if self.is_shut() {
            return Err(TrySendError::Closed(value));
        }
        match self.inner.slots.try_acquire() {
            Ok(permit) => self
                .push_with_slot(value, permit)
                .map_err(TrySendError::Closed),
            Err(TryAcquireError::NoPermits) => Err(TrySendError::Full(value)),
            Err(TryAcquireError::Closed) => Err(TrySendError::Closed(value)),
        }
    }

    /// Receive the next value, suspending while the channel is empty.
    ///
    /// `Ok(None)` is the terminal end-of-stream signal: the producer side
    /// completed and every buffered value has been drained. It is not an
    /// error and every subsequent call returns it again.
    ///
    /// # Errors
    ///
    /// [`RecvError::Closed`] after [`abort`](Self::abort),
    /// [`RecvError::Cancelled`] if `cancel` fires while waiting.
    pub async fn recv(&self, cancel: &CancelToken) -> Result<Option<T>, RecvError> {
        match self.inner.items.acquire(cancel).await {
            Ok(permit) => {
                permit.forget();
                self.pop_granted()
            }
            Err(AcquireError::Closed) => self.drain_after_close(),
            Err(AcquireError::Cancelled) => Err(RecvError::Cancelled),
        }
    }

    /// Receive the next value, parking the calling thread while empty
    ///
    /// # Errors
    ///
    /// Same outcomes as [`recv`](Self::recv), minus cancellation.
    pub fn blocking_recv(&self) -> Result<Option<T>, RecvError> {
        match self.inner.items.blocking_acquire() {
            Ok(permit) => {
                permit.forget();
                self.pop_granted()
            }
            Err(AcquireError::Closed) => self.drain_after_close(),
            Err(AcquireError::Cancelled) => Err(RecvError::Cancelled),
        }
    }

    /// Like [`blocking_recv`](Self::blocking_recv) with a deadline; expiry
    /// behaves as a cancellation.
    ///
    /// # Errors
    ///
    /// [`RecvError::Cancelled`] on deadline expiry, otherwise as
    /// [`recv`](Self::recv).
    pub fn blocking_recv_timeout(&self, timeout: Duration) -> Result<Option<T>, RecvError> {
        match self.inner.items.blocking_acquire_timeout(timeout) {
            Ok(permit) => {
                permit.forget();
                self.pop_granted()
            }
            Err(AcquireError::Closed) => self.drain_after_close(),
            Err(AcquireError::Cancelled) => Err(RecvError::Cancelled),
        }
    }

    /// Receive a value without waiting.
    ///
    /// `Ok(None)` is the same terminal signal as for [`recv`](Self::recv);
    /// `Err(Empty)` means only that nothing is buffered right now.
    ///
    /// # Errors
    ///
    /// [`TryRecvError::Empty`] when the buffer is empty but the channel is
    /// still open, [`TryRecvError::Closed`] after [`abort`](Self::abort).
    pub fn try_recv(&self) -> Result<Option<T>, TryRecvError> {
        match self.inner.items.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.pop_granted().map_err(|_| TryRecvError::Closed)
            }
            Err(TryAcquireError::NoPermits) => Err(TryRecvError::Empty),
            Err(TryAcquireError::Closed) => {
                self.drain_after_close().map_err(|_| TryRecvError::Closed)
            }
        }
    }

    /// Declare that no further values will be sent. Idempotent.
    ///
    /// Buffered values remain receivable in order; once drained, receivers
    /// observe `Ok(None)`. Senders are refused from this point on, but the
    /// slot semaphore stays open so the drain can return capacity to any
    /// producer still parked on it.
    pub fn complete(&self) {
        {
            let mut state = self.lock();
            if state.completed || state.aborted {
                return;
            }
            state.completed = true;
        }
        self.inner.items.close();
    }

    /// Tear the channel down, discarding buffered values. Idempotent.
    ///
    /// Both semaphores close, so every parked producer and consumer
    /// unblocks with a `Closed` outcome.
    pub fn abort(&self) {
        let discarded = {
            let mut state = self.lock();
            if state.aborted {
                return;
            }
            state.aborted = true;
            std::mem::take(&mut state.buffer)
        };
        self.inner.slots.close();
        self.inner.items.close();
        drop(discarded);
    }

    /// Number of values currently buffered (advisory snapshot)
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Returns true when nothing is buffered right now
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().buffer.is_empty()
    }

    /// The configured buffer capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Returns true once [`complete`](Self::complete) has been called
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.lock().completed
    }

    /// Returns true once [`abort`](Self::abort) has been called
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }

    /// Buffer the value under a granted slot permit.
    ///
    /// Re-checks the shutdown flags after the grant; on refusal the slot is
    /// returned and the value handed back. On success the permit transfers
    /// to the buffered value (released again when it is received) and one
    /// item permit is published.
    fn push_with_slot(&self, value: T, permit: Permit) -> Result<(), T> {
        {
            let mut state = self.lock();
            if state.completed || state.aborted {
                drop(state);
                drop(permit);
                return Err(value);
            }
            state.buffer.push_back(value);
            debug_assert!(state.buffer.len() <= self.inner.capacity);
        }
        permit.forget();
        // A no-op if `complete` closed the items semaphore in the meantime;
        // the value is then picked up by the drain path instead.
        self.inner.items.release_permit();
        Ok(())
    }

    /// Pop a value that an item permit was granted for.
    ///
    /// The buffer can only be missing the value if `abort` discarded it
    /// between the grant and the pop.
    fn pop_granted(&self) -> Result<Option<T>, RecvError> {
        let value = {
            let mut state = self.lock();
            state.buffer.pop_front()
        };
        match value {
            Some(value) => {
                self.inner.slots.release_permit();
                Ok(Some(value))
            }
            None => Err(RecvError::Closed),
        }
    }

    /// Receive path once the items semaphore is closed: drain what is left
    /// after `complete`, report end-of-stream when empty, fail after
    /// `abort`.
    fn drain_after_close(&self) -> Result<Option<T>, RecvError> {
        let value = {
            let mut state = self.lock();
            if state.aborted {
                return Err(RecvError::Closed);
            }
            state.buffer.pop_front()
        };
        match value {
            Some(value) => {
                self.inner.slots.release_permit();
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn is_shut(&self) -> bool {
        let state = self.lock();
        state.completed || state.aborted
    }

    fn lock(&self) -> MutexGuard<'_, ChanState<T>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_validates_capacity() {
        assert!(BoundedChannel::<u32>::new(0).is_err());
        let chan = BoundedChannel::<u32>::new(4).unwrap();
        assert_eq!(chan.capacity(), 4);
        assert_eq!(chan.len(), 0);
        assert!(chan.is_empty());
    }

    #[test]
    fn try_send_fills_to_capacity_then_reports_full() {
        let chan = BoundedChannel::new(2).unwrap();
        chan.try_send(1).unwrap();
        chan.try_send(2).unwrap();
        assert_eq!(chan.len(), 2);
        assert_eq!(chan.try_send(3).unwrap_err(), TrySendError::Full(3));
    }

    #[test]
    fn try_recv_observes_fifo_order() {
        let chan = BoundedChannel::new(3).unwrap();
        chan.try_send('a').unwrap();
        chan.try_send('b').unwrap();

        assert_eq!(chan.try_recv().unwrap(), Some('a'));
        assert_eq!(chan.try_recv().unwrap(), Some('b'));
        assert_eq!(chan.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[test]
    fn complete_rejects_new_sends_and_drains_buffer() {
        let chan = BoundedChannel::new(4).unwrap();
        chan.try_send(10).unwrap();
        chan.try_send(20).unwrap();

        chan.complete();
        chan.complete();
        assert!(chan.is_completed());
        assert_eq!(chan.try_send(30).unwrap_err(), TrySendError::Closed(30));

        assert_eq!(chan.try_recv().unwrap(), Some(10));
        assert_eq!(chan.try_recv().unwrap(), Some(20));
        // drained: terminal end-of-stream, not an error
        assert_eq!(chan.try_recv().unwrap(), None);
        assert_eq!(chan.try_recv().unwrap(), None);
    }

    #[test]
    fn abort_discards_buffer_and_fails_receivers() {
        let chan = BoundedChannel::new(4).unwrap();
        chan.try_send(1).unwrap();
        chan.try_send(2).unwrap();

        chan.abort();
        assert!(chan.is_aborted());
        assert_eq!(chan.len(), 0);
        assert_eq!(chan.try_send(3).unwrap_err(), TrySendError::Closed(3));
        assert_eq!(chan.try_recv().unwrap_err(), TryRecvError::Closed);
        assert_eq!(chan.blocking_recv().unwrap_err(), RecvError::Closed);
    }

    #[test]
    fn blocking_recv_timeout_expires_as_cancellation() {
        let chan = BoundedChannel::<u8>::new(1).unwrap();
        let err = chan
            .blocking_recv_timeout(Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(err, RecvError::Cancelled);
        // the channel is still usable afterwards
        chan.try_send(7).unwrap();
        assert_eq!(chan.blocking_recv().unwrap(), Some(7));
    }

    #[test]
    fn send_error_hands_the_value_back() {
        let chan = BoundedChannel::new(1).unwrap();
        chan.complete();
        let err = chan.blocking_send(String::from("lost")).unwrap_err();
        assert_eq!(err.into_inner(), "lost");
    }
}
