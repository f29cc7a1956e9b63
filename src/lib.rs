//! Fair producer/consumer coordination primitives
//!
//! This crate provides two bounded, cancellable synchronization primitives
//! built around one strict FIFO wait-queue:
//!
//! - [`Semaphore`] - counting semaphore with `(initial, max)` bounds,
//!   blocking and async acquisition over the same queue, RAII permits and a
//!   close path that fails all waiters
//! - [`BoundedChannel`] - bounded FIFO queue for concurrent producers and
//!   consumers, with backpressure, graceful completion and abort
//!
//! The library is runtime-agnostic: async acquisition is a hand-rolled
//! [`Future`](std::future::Future) that works under any executor, and the
//! blocking variants park plain threads. Both waiter styles may be mixed on
//! one instance and are served strictly in arrival order.
//!
//! # Example
//!
//! ```rust,no_run
//! use fair_sync::{BoundedChannel, CancelToken};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = BoundedChannel::new(16)?;
//! let cancel = CancelToken::new();
//!
//! // Producers share a clone of the handle
//! let producer = queue.clone();
//! let feeder = async move {
//!     for job in 0..100 {
//!         if producer.send(job, &CancelToken::new()).await.is_err() {
//!             break;
//!         }
//!     }
//!     producer.complete();
//! };
//!
//! // `Ok(None)` means the producer side completed and the buffer drained
//! let drainer = async {
//!     while let Some(job) = queue.recv(&cancel).await? {
//!         println!("processing {job}");
//!     }
//!     Ok::<(), fair_sync::RecvError>(())
//! };
//!
//! futures::join!(feeder, drainer);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod channel;
pub mod error;
pub mod semaphore;
mod wait;

// Re-export the public surface
pub use cancel::CancelToken;
pub use channel::BoundedChannel;
pub use error::{
    AcquireError, InvalidArgument, RecvError, ReleaseError, SendError, TryAcquireError,
    TryRecvError, TrySendError,
};
pub use semaphore::{AcquireFuture, Permit, Semaphore};
