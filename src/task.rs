//! Shared handle to a lazily started computation.
//!
//! A [`LazyTask<T>`] is what an [`AsyncLazy`](crate::AsyncLazy) hands out. All
//! clones refer to the same underlying computation, so awaiting any of them
//! observes the same outcome, and [`LazyTask::ptr_eq`] tells whether two
//! handles are the same instance.
//!
//! A task is backed either by an already-known result, which needs nothing
//! beyond the handle itself, or by a boxed future wrapped in
//! [`futures::future::Shared`] so that any number of awaiters can poll it.
//! A panic inside that future is caught at the poll boundary and settles the
//! task as faulted, so every awaiter (and every `peek`) sees the same outcome.

use core::fmt;
use core::future::{Future, IntoFuture};
use core::pin::Pin;
use core::task::{Context, Poll};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::LazyError;

/// Outcome delivered by awaiting a [`LazyTask`].
pub type TaskResult<T> = Result<T, LazyError>;

/// Coarse state of a [`LazyTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
   /// The computation has not produced an outcome yet.
   Pending,
   /// The computation produced a value.
   RanToCompletion,
   /// The computation failed.
   Faulted,
   /// The computation was canceled.
   Canceled,
}

impl TaskStatus {
   /// Returns `true` for every state except [`TaskStatus::Pending`].
   pub fn is_terminal(self) -> bool {
      self != Self::Pending
   }

   fn of<T>(result: &TaskResult<T>) -> Self {
      match result {
         Ok(_) => Self::RanToCompletion,
         Err(LazyError::Faulted(_)) => Self::Faulted,
         Err(LazyError::Canceled(_)) => Self::Canceled,
      }
   }
}

pub(crate) enum TaskCore<T> {
   Completed(TaskResult<T>),
   Running(Shared<BoxFuture<'static, TaskResult<T>>>),
}

/// A cloneable handle to a single, shared asynchronous computation.
pub struct LazyTask<T> {
   core: Arc<TaskCore<T>>,
}

impl<T> LazyTask<T> {
   /// A task that already holds `result`.
   pub fn from_result(result: TaskResult<T>) -> Self {
      Self {
         core: Arc::new(TaskCore::Completed(result)),
      }
   }

   /// A task that already ran to completion with `value`.
   pub fn completed(value: T) -> Self {
      Self::from_result(Ok(value))
   }

   /// A task that already failed with `err`.
   pub fn faulted(err: LazyError) -> Self {
      Self::from_result(Err(err))
   }

   /// A task that was already canceled, optionally through `token`.
   pub fn canceled(token: Option<CancellationToken>) -> Self {
      Self::from_result(Err(LazyError::Canceled(token)))
   }

   /// Returns the task's current state without blocking.
   ///
   /// A running task only advances while it is awaited (or, for spawned
   /// factories, while the runtime drives it), so this may report `Pending`
   /// for a computation that has nobody polling it.
   pub fn status(&self) -> TaskStatus {
      self.peek().map_or(TaskStatus::Pending, TaskStatus::of)
   }

   /// Returns the outcome if the task has reached a terminal state.
   pub fn peek(&self) -> Option<&TaskResult<T>> {
      match &*self.core {
         TaskCore::Completed(result) => Some(result),
         TaskCore::Running(shared) => shared.peek(),
      }
   }

   /// Returns the value if the task ran to completion.
   pub fn value(&self) -> Option<&T> {
      self.peek().and_then(|result| result.as_ref().ok())
   }

   /// Returns `true` if both handles refer to the same computation.
   pub fn ptr_eq(&self, other: &Self) -> bool {
      Arc::ptr_eq(&self.core, &other.core)
   }

   /// Leaks the handle into a raw pointer owning one strong reference.
   pub(crate) fn into_raw(self) -> *const TaskCore<T> {
      Arc::into_raw(self.core)
   }

   /// Reclaims a handle leaked with [`LazyTask::into_raw`].
   ///
   /// # Safety
   ///
   /// `ptr` must come from `into_raw` and carry a strong reference that is
   /// transferred to the returned handle.
   pub(crate) unsafe fn from_raw(ptr: *const TaskCore<T>) -> Self {
      Self {
         core: unsafe { Arc::from_raw(ptr) },
      }
   }
}

impl<T> LazyTask<T>
where
   T: Clone + Send + Sync + 'static,
{
   /// A task driven by `future`, shared between every clone of the handle.
   ///
   /// If `future` panics while being polled, the task settles as faulted.
   pub fn from_future<F>(future: F) -> Self
   where
      F: Future<Output = TaskResult<T>> + Send + 'static,
   {
      Self::from_boxed(future.boxed(), None)
   }

   /// Shares `future`, settling a panic into an error and giving untokened
   /// cancellations `fallback_token`.
   pub(crate) fn from_boxed(
      future: BoxFuture<'static, TaskResult<T>>,
      fallback_token: Option<CancellationToken>,
   ) -> Self {
      let settled = AssertUnwindSafe(future).catch_unwind().map(move |outcome| {
         let result = outcome.unwrap_or_else(|payload| {
            let err = LazyError::from_panic(payload);
            debug!(error = %err, "shared computation panicked");
            Err(err)
         });
         result.map_err(|err| err.or_token(fallback_token.as_ref()))
      });
      Self {
         core: Arc::new(TaskCore::Running(settled.boxed().shared())),
      }
   }
}

impl<T> Clone for LazyTask<T> {
   #[inline]
   fn clone(&self) -> Self {
      Self {
         core: Arc::clone(&self.core),
      }
   }
}

impl<T> fmt::Debug for LazyTask<T> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("LazyTask")
         .field("status", &self.status())
         .finish_non_exhaustive()
   }
}

impl<T: Clone> IntoFuture for LazyTask<T> {
   type Output = TaskResult<T>;
   type IntoFuture = TaskFuture<T>;

   fn into_future(self) -> Self::IntoFuture {
      let inner = match &*self.core {
         TaskCore::Completed(result) => Waiting::Ready(Some(result.clone())),
         TaskCore::Running(shared) => Waiting::Shared(shared.clone()),
      };
      TaskFuture { inner }
   }
}

impl<T: Clone> IntoFuture for &LazyTask<T> {
   type Output = TaskResult<T>;
   type IntoFuture = TaskFuture<T>;

   fn into_future(self) -> Self::IntoFuture {
      self.clone().into_future()
   }
}

enum Waiting<T> {
   Ready(Option<TaskResult<T>>),
   Shared(Shared<BoxFuture<'static, TaskResult<T>>>),
}

/// Future returned by awaiting a [`LazyTask`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct TaskFuture<T> {
   inner: Waiting<T>,
}

// The result is moved out, never pinned in place, and `Shared` is `Unpin`.
impl<T> Unpin for TaskFuture<T> {}

impl<T: Clone> Future for TaskFuture<T> {
   type Output = TaskResult<T>;

   fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
      match &mut self.get_mut().inner {
         Waiting::Ready(result) => Poll::Ready(
            result
               .take()
               .expect("TaskFuture polled after completion"),
         ),
         Waiting::Shared(shared) => shared.poll_unpin(cx),
      }
   }
}
