//! Factory shapes and the dispatcher that turns them into tasks.
//!
//! An [`AsyncLazy`](crate::AsyncLazy) is built around exactly one [`Factory`],
//! which comes in four shapes: a plain async producer, a cancellation-aware
//! async producer, and the "lightweight" versions of both, which return a
//! [`ValueTask`] and may finish without allocating anything.
//!
//! [`Factory::invoke`] runs the factory inside an unwind boundary and always
//! returns a task. A panic is captured into a faulted (or canceled) task
//! whether it is raised by the factory call, by the first poll of a
//! lightweight computation, or later while the shared future runs.

use core::fmt;
use core::future::Future;
use core::task::{Context, Poll};
use std::panic::{self, AssertUnwindSafe};

use futures::future::{BoxFuture, FutureExt};
use futures::task::noop_waker_ref;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::LazyError;
use crate::task::{LazyTask, TaskResult};

/// Result of a lightweight producer.
///
/// `Ready` carries an outcome that was known at call time and costs no
/// allocation; `Pending` carries the boxed computation otherwise.
pub enum ValueTask<T> {
   /// The outcome, known when the producer returned.
   Ready(TaskResult<T>),
   /// A computation that may still be running.
   Pending(BoxFuture<'static, TaskResult<T>>),
}

impl<T> ValueTask<T> {
   /// A value available immediately.
   pub fn ready(value: T) -> Self {
      Self::Ready(Ok(value))
   }

   /// A failure known immediately.
   pub fn failed(err: LazyError) -> Self {
      Self::Ready(Err(err))
   }

   /// Wraps a computation that still has to run.
   pub fn pending<F>(future: F) -> Self
   where
      F: Future<Output = TaskResult<T>> + Send + 'static,
   {
      Self::Pending(future.boxed())
   }
}

impl<T> From<TaskResult<T>> for ValueTask<T> {
   fn from(result: TaskResult<T>) -> Self {
      Self::Ready(result)
   }
}

impl<T> fmt::Debug for ValueTask<T> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Self::Ready(Ok(_)) => f.write_str("ValueTask::Ready(Ok(..))"),
         Self::Ready(Err(err)) => write!(f, "ValueTask::Ready(Err({err:?}))"),
         Self::Pending(_) => f.write_str("ValueTask::Pending(..)"),
      }
   }
}

type TaskFn<T> = Box<dyn Fn() -> BoxFuture<'static, TaskResult<T>> + Send + Sync>;
type CancelableTaskFn<T> =
   Box<dyn Fn(CancellationToken) -> BoxFuture<'static, TaskResult<T>> + Send + Sync>;
type ValueTaskFn<T> = Box<dyn Fn() -> ValueTask<T> + Send + Sync>;
type CancelableValueTaskFn<T> = Box<dyn Fn(CancellationToken) -> ValueTask<T> + Send + Sync>;

/// The producer an [`AsyncLazy`](crate::AsyncLazy) calls once per generation.
pub enum Factory<T> {
   /// Returns a future producing the value.
   Task(TaskFn<T>),
   /// Receives the caller's cancellation token and returns a future.
   CancelableTask(CancelableTaskFn<T>),
   /// Returns a [`ValueTask`], which may already hold the outcome.
   ValueTask(ValueTaskFn<T>),
   /// Receives the caller's cancellation token and returns a [`ValueTask`].
   CancelableValueTask(CancelableValueTaskFn<T>),
}

impl<T> Factory<T> {
   /// Wraps a producer that returns a future.
   pub fn task<F, Fut>(f: F) -> Self
   where
      F: Fn() -> Fut + Send + Sync + 'static,
      Fut: Future<Output = TaskResult<T>> + Send + 'static,
   {
      Self::Task(Box::new(move || f().boxed()))
   }

   /// Wraps a producer that receives the caller's token and returns a future.
   pub fn cancelable_task<F, Fut>(f: F) -> Self
   where
      F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
      Fut: Future<Output = TaskResult<T>> + Send + 'static,
   {
      Self::CancelableTask(Box::new(move |token| f(token).boxed()))
   }

   /// Wraps a producer that returns a [`ValueTask`].
   pub fn value_task<F>(f: F) -> Self
   where
      F: Fn() -> ValueTask<T> + Send + Sync + 'static,
   {
      Self::ValueTask(Box::new(f))
   }

   /// Wraps a producer that receives the caller's token and returns a
   /// [`ValueTask`].
   pub fn cancelable_value_task<F>(f: F) -> Self
   where
      F: Fn(CancellationToken) -> ValueTask<T> + Send + Sync + 'static,
   {
      Self::CancelableValueTask(Box::new(f))
   }

   /// Returns `true` if the factory receives the caller's cancellation token.
   pub fn is_cancelable(&self) -> bool {
      matches!(self, Self::CancelableTask(_) | Self::CancelableValueTask(_))
   }
}

#[cfg(feature = "rt-tokio")]
impl<T: Send + 'static> Factory<T> {
   /// Runs each produced future as its own tokio task.
   ///
   /// The computation then makes progress on the runtime whether or not
   /// anyone awaits the handle, and keeps running after a reset. The factory
   /// must be invoked from within a runtime; if it is not, the spawn failure
   /// is captured as a fault like any other synchronous panic.
   pub fn spawned<F, Fut>(f: F) -> Self
   where
      F: Fn() -> Fut + Send + Sync + 'static,
      Fut: Future<Output = TaskResult<T>> + Send + 'static,
   {
      Self::task(move || {
         let handle = tokio::spawn(f());
         async move {
            match handle.await {
               Ok(result) => result,
               Err(err) if err.is_panic() => Err(LazyError::from_panic(err.into_panic())),
               Err(_) => Err(LazyError::canceled()),
            }
         }
      })
   }
}

impl<T> Factory<T>
where
   T: Clone + Send + Sync + 'static,
{
   /// Calls the factory and normalizes whatever it produced into a task.
   ///
   /// `token` is forwarded to cancellation-aware shapes; `caller_token` is the
   /// token the caller actually supplied, adopted by untokened cancellations.
   pub(crate) fn invoke(
      &self,
      token: &CancellationToken,
      caller_token: Option<&CancellationToken>,
   ) -> LazyTask<T> {
      let launched = panic::catch_unwind(AssertUnwindSafe(|| match self {
         Self::CancelableValueTask(f) => Launch::Value(f(token.clone())),
         Self::ValueTask(f) => Launch::Value(f()),
         Self::CancelableTask(f) => Launch::Task(f(token.clone())),
         Self::Task(f) => Launch::Task(f()),
      }));

      match launched {
         Ok(Launch::Task(future)) => LazyTask::from_boxed(future, caller_token.cloned()),
         Ok(Launch::Value(ValueTask::Ready(result))) => {
            LazyTask::from_result(result.map_err(|err| err.or_token(caller_token)))
         }
         Ok(Launch::Value(ValueTask::Pending(future))) => Self::adapt(future, caller_token),
         Err(payload) => {
            let err = LazyError::from_panic(payload).or_token(caller_token);
            debug!(error = %err, "factory panicked before returning a task");
            LazyTask::from_result(Err(err))
         }
      }
   }

   /// Adapts a pending lightweight computation, skipping the shared wrapper
   /// when its first poll already finishes.
   fn adapt(
      mut future: BoxFuture<'static, TaskResult<T>>,
      caller_token: Option<&CancellationToken>,
   ) -> LazyTask<T> {
      let mut cx = Context::from_waker(noop_waker_ref());
      let polled = panic::catch_unwind(AssertUnwindSafe(|| future.poll_unpin(&mut cx)));
      match polled {
         Ok(Poll::Ready(result)) => {
            LazyTask::from_result(result.map_err(|err| err.or_token(caller_token)))
         }
         Ok(Poll::Pending) => LazyTask::from_boxed(future, caller_token.cloned()),
         Err(payload) => {
            let err = LazyError::from_panic(payload).or_token(caller_token);
            debug!(error = %err, "lightweight factory panicked on its first poll");
            LazyTask::from_result(Err(err))
         }
      }
   }
}

enum Launch<T> {
   Task(BoxFuture<'static, TaskResult<T>>),
   Value(ValueTask<T>),
}

impl<T> fmt::Debug for Factory<T> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let kind = match self {
         Self::Task(_) => "Task",
         Self::CancelableTask(_) => "CancelableTask",
         Self::ValueTask(_) => "ValueTask",
         Self::CancelableValueTask(_) => "CancelableValueTask",
      };
      f.debug_tuple("Factory").field(&format_args!("{kind}")).finish()
   }
}
