//! Resettable lazy cell around a shared asynchronous computation.
//!
//! This module provides [`AsyncLazy<T>`], a thread-safe cell that starts its
//! factory on first access and hands every caller the same [`LazyTask<T>`].
//! Whatever the task ends up with (a value, an error, or a cancellation) stays
//! cached until [`AsyncLazy::reset`] opens a new generation.
//!
//! Reads never take a lock. Only a caller that finds the slot empty takes the
//! creation gate, checks the slot again, and invokes the factory, so the
//! factory runs at most once per generation no matter how many threads race
//! for it.

use core::fmt;
use core::future::{Future, IntoFuture};
use core::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::LazyError;
use crate::factory::{Factory, ValueTask};
use crate::gate::Gate;
use crate::slot::TaskSlot;
use crate::task::{LazyTask, TaskFuture, TaskResult};

/// A thread-safe cell that lazily starts one shared async computation.
///
/// The factory is fixed at construction. The first call to
/// [`acquire`](Self::acquire) (or an `.await` on `&cell`) invokes it and stores
/// the resulting task; every later call in the same generation returns a clone
/// of that very task, without re-invoking the factory and without locking.
///
/// Failures are cached like values: a faulted or canceled task remains the
/// cell's answer until [`reset`](Self::reset) is called.
///
/// ```rust
/// # futures::executor::block_on(async {
/// use async_lazy::AsyncLazy;
///
/// let cell: AsyncLazy<i32> = AsyncLazy::from_task(|| async { Ok(6 * 7) });
/// assert!(!cell.is_value_created());
///
/// assert_eq!((&cell).await.unwrap(), 42);
/// assert_eq!(cell.try_peek_completed(), Some(42));
/// # });
/// ```
pub struct AsyncLazy<T> {
   factory: Factory<T>,
   slot: TaskSlot<T>,
   gate: Gate,
   generation: AtomicU64,
}

impl<T> AsyncLazy<T> {
   /// Creates an empty cell around `factory`.
   #[inline]
   #[must_use]
   pub const fn new(factory: Factory<T>) -> Self {
      Self {
         factory,
         slot: TaskSlot::new(),
         gate: Gate::new(),
         generation: AtomicU64::new(0),
      }
   }

   /// Creates a cell whose factory returns a future.
   #[must_use]
   pub fn from_task<F, Fut>(f: F) -> Self
   where
      F: Fn() -> Fut + Send + Sync + 'static,
      Fut: Future<Output = TaskResult<T>> + Send + 'static,
   {
      Self::new(Factory::task(f))
   }

   /// Creates a cell whose factory receives the caller's cancellation token.
   #[must_use]
   pub fn from_cancelable_task<F, Fut>(f: F) -> Self
   where
      F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
      Fut: Future<Output = TaskResult<T>> + Send + 'static,
   {
      Self::new(Factory::cancelable_task(f))
   }

   /// Creates a cell whose factory returns a [`ValueTask`].
   #[must_use]
   pub fn from_value_task<F>(f: F) -> Self
   where
      F: Fn() -> ValueTask<T> + Send + Sync + 'static,
   {
      Self::new(Factory::value_task(f))
   }

   /// Creates a cell whose factory receives the caller's cancellation token
   /// and returns a [`ValueTask`].
   #[must_use]
   pub fn from_cancelable_value_task<F>(f: F) -> Self
   where
      F: Fn(CancellationToken) -> ValueTask<T> + Send + Sync + 'static,
   {
      Self::new(Factory::cancelable_value_task(f))
   }

   /// Returns the factory this cell was built with.
   #[inline]
   pub fn factory(&self) -> &Factory<T> {
      &self.factory
   }

   /// Checks whether the current generation has a task, in any state.
   ///
   /// This method never blocks.
   #[inline]
   pub fn is_value_created(&self) -> bool {
      self.slot.is_populated()
   }

   /// Number of resets so far; identifies the current generation.
   #[inline]
   pub fn generation(&self) -> u64 {
      self.generation.load(Ordering::Acquire)
   }

   /// Drops the cached task and opens a new generation.
   ///
   /// The old computation is not canceled. Anyone still holding its handle can
   /// await it as before; the cell simply forgets about it, and the next
   /// [`acquire`](Self::acquire) invokes the factory again.
   pub fn reset(&self) {
      let guard = self.gate.lock();
      let previous = self.slot.take();
      let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
      drop(guard);
      debug!(generation, had_task = previous.is_some(), "lazy cell reset");
      // Released outside the gate; dropping a task may run arbitrary drop glue.
      drop(previous);
   }
}

#[cfg(feature = "rt-tokio")]
impl<T: Send + 'static> AsyncLazy<T> {
   /// Creates a cell whose computation runs as a tokio task of its own.
   ///
   /// See [`Factory::spawned`].
   #[must_use]
   pub fn spawned<F, Fut>(f: F) -> Self
   where
      F: Fn() -> Fut + Send + Sync + 'static,
      Fut: Future<Output = TaskResult<T>> + Send + 'static,
   {
      Self::new(Factory::spawned(f))
   }
}

impl<T> AsyncLazy<T>
where
   T: Clone + Send + Sync + 'static,
{
   /// Returns the current generation's task, starting it if needed.
   ///
   /// Never blocks on the computation itself; the only wait is the short
   /// critical section in which another caller is invoking the factory.
   #[inline]
   pub fn acquire(&self) -> LazyTask<T> {
      match self.slot.load() {
         Some(task) => task,
         None => self.create(None),
      }
   }

   /// Like [`acquire`](Self::acquire), forwarding `token` to a
   /// cancellation-aware factory.
   ///
   /// If the slot is empty and `token` is already canceled, a canceled task
   /// is returned without touching the cell. The check is best effort: a
   /// caller whose token is canceled while another caller is creating the
   /// task may still receive the shared task. Canceling `token` later never
   /// cancels the shared computation.
   #[inline]
   pub fn acquire_with(&self, token: &CancellationToken) -> LazyTask<T> {
      match self.slot.load() {
         Some(task) => task,
         None => self.create(Some(token)),
      }
   }

   /// Awaits the current generation's task.
   ///
   /// Equivalent to `self.acquire().await`.
   #[inline]
   pub fn get(&self) -> TaskFuture<T> {
      self.acquire().into_future()
   }

   /// Returns the value if the current task ran to completion.
   ///
   /// Returns `None` when the cell is empty or its task is still pending,
   /// faulted, or canceled. This method never blocks.
   pub fn try_peek_completed(&self) -> Option<T> {
      self.slot.load()?.value().cloned()
   }

   /// Cold path of `acquire`.
   #[cold]
   fn create(&self, token: Option<&CancellationToken>) -> LazyTask<T> {
      if let Some(token) = token.filter(|token| token.is_cancelled()) {
         trace!("token already canceled, skipping creation");
         return LazyTask::canceled(Some(token.clone()));
      }

      let guard = self.gate.lock();
      if let Some(task) = self.slot.load() {
         // Another caller populated the slot while we waited.
         return task;
      }

      trace!(generation = self.generation(), "invoking lazy factory");
      let forwarded = token.cloned().unwrap_or_else(CancellationToken::new);
      let task = self.factory.invoke(&forwarded, token);
      self.slot.store(task.clone());
      drop(guard);
      task
   }
}

impl<'a, T> IntoFuture for &'a AsyncLazy<T>
where
   T: Clone + Send + Sync + 'static,
{
   type Output = Result<T, LazyError>;
   type IntoFuture = TaskFuture<T>;

   fn into_future(self) -> Self::IntoFuture {
      self.get()
   }
}

impl<T> fmt::Debug for AsyncLazy<T> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let mut d = f.debug_struct("AsyncLazy");
      d.field("factory", &self.factory);
      d.field("generation", &self.generation());
      match self.slot.load() {
         Some(task) => d.field("slot", &task.status()),
         None => d.field("slot", &format_args!("<empty>")),
      };
      d.finish()
   }
}
