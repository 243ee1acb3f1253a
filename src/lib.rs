//! A thread-safe, resettable cell for lazily started async computations.
//!
//! [`AsyncLazy<T>`] wraps a factory that produces a value asynchronously. The
//! first caller to touch the cell invokes the factory; every caller, concurrent
//! or later, receives the same [`LazyTask<T>`] and therefore the same outcome.
//! The outcome, whether a value, an error, or a cancellation, stays cached until
//! the cell is explicitly [reset](AsyncLazy::reset).
//!
//! # Features
//!
//! - **Lock-free fast path**: Once the task exists, handing it out is a couple
//!   of atomic operations.
//! - **Parked slow path**: Callers racing to create the task serialize on a
//!   small futex-based gate, so the factory runs at most once per generation.
//! - **Four factory shapes**: Plain or cancellation-aware, returning a future
//!   or a [`ValueTask`] that can complete without allocating.
//! - **No synchronous failures**: Panics and cancellations raised while the
//!   factory is called are captured into the returned task.
//! - **Resettable**: [`AsyncLazy::reset`] forgets the cached task without
//!   canceling it.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use async_lazy::AsyncLazy;
//!
//! # futures::executor::block_on(async {
//! let calls = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&calls);
//! let config = AsyncLazy::from_task(move || {
//!    counter.fetch_add(1, Ordering::SeqCst);
//!    async { Ok("production".to_string()) }
//! });
//!
//! let first = config.acquire();
//! let second = config.acquire();
//! assert!(first.ptr_eq(&second));
//! assert_eq!(first.await.unwrap(), "production");
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//!
//! config.reset();
//! assert!(!config.is_value_created());
//! assert_eq!(config.get().await.unwrap(), "production");
//! assert_eq!(calls.load(Ordering::SeqCst), 2);
//! # });
//! ```
//!
//! # Feature flags
//!
//! - `rt-tokio` (default): [`Factory::spawned`] and [`AsyncLazy::spawned`],
//!   which run the computation as a tokio task so it progresses without
//!   being awaited.

/// Terminal error states.
mod error;

/// Factory shapes and dispatch.
mod factory;

/// Creation gate.
mod gate;

/// The lazy cell itself.
mod lazy;

/// Atomic storage for the current task.
mod slot;

/// Shared task handle.
mod task;

pub use error::{BoxError, FactoryPanic, LazyError};
pub use factory::{Factory, ValueTask};
pub use lazy::AsyncLazy;
pub use task::{LazyTask, TaskFuture, TaskResult, TaskStatus};
pub use tokio_util::sync::CancellationToken;
