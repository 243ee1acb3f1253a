use std::future::IntoFuture;
use std::panic;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_lazy::{
   AsyncLazy, CancellationToken, Factory, FactoryPanic, LazyError, LazyTask, TaskStatus, ValueTask,
};
use futures::future::{self, FutureExt};

#[tokio::test]
async fn test_precanceled_token_with_cancelable_factory() {
   let calls = Arc::new(AtomicUsize::new(0));
   let counter = Arc::clone(&calls);
   let cell: AsyncLazy<i32> = AsyncLazy::from_cancelable_value_task(move |token| {
      counter.fetch_add(1, Ordering::SeqCst);
      if token.is_cancelled() {
         ValueTask::failed(LazyError::canceled())
      } else {
         ValueTask::ready(1)
      }
   });

   let token = CancellationToken::new();
   token.cancel();

   let err = cell.acquire_with(&token).await.unwrap_err();
   assert!(err.is_canceled());
   assert_eq!(cell.try_peek_completed(), None);

   // The pre-gate check answered without touching the cell.
   assert!(!cell.is_value_created());
   assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_precanceled_token_carries_caller_token() {
   let cell: AsyncLazy<i32> = AsyncLazy::from_task(|| async { Ok(1) });
   let token = CancellationToken::new();
   token.cancel();

   let task = cell.acquire_with(&token);
   assert_eq!(task.status(), TaskStatus::Canceled);
   let err = task.await.unwrap_err();
   assert!(err.token().is_some_and(CancellationToken::is_cancelled));
}

#[tokio::test]
async fn test_populated_slot_ignores_canceled_token() {
   let cell: AsyncLazy<i32> = AsyncLazy::from_task(|| async { Ok(5) });
   let first = cell.acquire();
   assert_eq!(first.clone().await.unwrap(), 5);

   let token = CancellationToken::new();
   token.cancel();
   let second = cell.acquire_with(&token);
   assert!(first.ptr_eq(&second));
   assert_eq!(second.await.unwrap(), 5);
}

#[tokio::test]
async fn test_synchronous_cancellation_adopts_caller_token() {
   let token = CancellationToken::new();
   let cell: AsyncLazy<i32> = AsyncLazy::from_cancelable_value_task(|token| {
      // The factory decides to give up on its own.
      token.cancel();
      ValueTask::failed(LazyError::canceled())
   });

   let err = cell.acquire_with(&token).await.unwrap_err();
   assert!(err.is_canceled());
   assert!(token.is_cancelled());
   assert!(err.token().is_some_and(CancellationToken::is_cancelled));
   assert!(cell.is_value_created());
   assert_eq!(cell.try_peek_completed(), None);
}

#[tokio::test]
async fn test_synchronous_cancellation_keeps_own_token() {
   let own = CancellationToken::new();
   let factory_token = own.clone();
   let cell: AsyncLazy<i32> = AsyncLazy::from_value_task(move || {
      factory_token.cancel();
      ValueTask::failed(LazyError::canceled_by(factory_token.clone()))
   });

   let caller = CancellationToken::new();
   let err = cell.acquire_with(&caller).await.unwrap_err();
   assert!(err.is_canceled());
   assert!(!caller.is_cancelled());
   assert!(err.token().is_some_and(CancellationToken::is_cancelled));
}

#[tokio::test]
async fn test_cancellation_by_unwinding() {
   let cell: AsyncLazy<i32> = AsyncLazy::from_value_task(|| {
      panic::panic_any(LazyError::canceled());
   });
   let task = cell.acquire();
   assert_eq!(task.status(), TaskStatus::Canceled);
   // No caller token was supplied, so there is none to adopt.
   assert!(task.await.unwrap_err().token().is_none());
}

#[tokio::test]
async fn test_cancelable_task_receives_caller_token() {
   let seen = Arc::new(AtomicUsize::new(0));
   let observed = Arc::clone(&seen);
   let cell = AsyncLazy::from_cancelable_task(move |token: CancellationToken| {
      let observed = Arc::clone(&observed);
      async move {
         if token.is_cancelled() {
            observed.fetch_add(1, Ordering::SeqCst);
         }
         Ok(token.is_cancelled())
      }
   });

   let token = CancellationToken::new();
   let task = cell.acquire_with(&token);

   // Cancelling after creation reaches the factory's computation, but the
   // cell keeps handing out the same task.
   token.cancel();
   assert_eq!(task.await.unwrap(), true);
   assert_eq!(seen.load(Ordering::SeqCst), 1);
   assert!(cell.acquire().ptr_eq(&cell.acquire_with(&token)));
}

#[tokio::test]
async fn test_cancelable_factory_without_token_gets_live_token() {
   let cell = AsyncLazy::from_cancelable_task(|token: CancellationToken| async move {
      Ok(token.is_cancelled())
   });
   assert_eq!(cell.get().await.unwrap(), false);
}

#[tokio::test]
async fn test_downstream_cancellation() {
   let cell: AsyncLazy<i32> = AsyncLazy::from_cancelable_task(|token: CancellationToken| async move {
      token.cancelled().await;
      Err(LazyError::canceled_by(token))
   });

   let token = CancellationToken::new();
   let task = cell.acquire_with(&token);
   assert_eq!(task.status(), TaskStatus::Pending);

   token.cancel();
   let err = task.clone().await.unwrap_err();
   assert!(err.is_canceled());
   assert_eq!(task.status(), TaskStatus::Canceled);
   assert_eq!(cell.try_peek_completed(), None);
}

#[tokio::test]
async fn test_value_task_pending_that_is_already_done() {
   let cell: AsyncLazy<i32> = AsyncLazy::from_value_task(|| ValueTask::pending(async { Ok(9) }));
   // The first poll inside the gate finished it.
   let task = cell.acquire();
   assert_eq!(task.status(), TaskStatus::RanToCompletion);
   assert_eq!(cell.try_peek_completed(), Some(9));
}

#[tokio::test]
async fn test_value_task_pending_is_shared() {
   let (tx, rx) = futures::channel::oneshot::channel::<u32>();
   let rx = std::sync::Mutex::new(Some(rx));
   let cell: AsyncLazy<u32> = AsyncLazy::from_value_task(move || {
      let rx = rx.lock().unwrap().take().expect("factory invoked twice");
      ValueTask::pending(async move { rx.await.map_err(LazyError::fault) })
   });

   let first = cell.acquire();
   let second = cell.acquire();
   assert!(first.ptr_eq(&second));
   assert_eq!(first.status(), TaskStatus::Pending);

   tx.send(11).unwrap();
   let (a, b) = future::join(first.into_future(), second.into_future()).await;
   assert_eq!(a.unwrap(), 11);
   assert_eq!(b.unwrap(), 11);
}

async fn explode() -> Result<i32, LazyError> {
   panic!("boom on first poll")
}

#[tokio::test]
async fn test_value_task_first_poll_panic_is_fault() {
   let cell = AsyncLazy::from_value_task(|| ValueTask::pending(explode()));
   let err = cell.get().await.unwrap_err();
   assert!(err.is_faulted());
   assert_eq!(err.to_string(), "boom on first poll");
}

async fn explode_after_yield() -> Result<i32, LazyError> {
   tokio::task::yield_now().await;
   panic!("boom after yield")
}

async fn cancel_after_yield() -> Result<i32, LazyError> {
   tokio::task::yield_now().await;
   panic::panic_any(LazyError::canceled())
}

async fn settle(task: LazyTask<i32>) -> (TaskStatus, String) {
   let err = task.clone().await.unwrap_err();
   (task.status(), err.to_string())
}

#[tokio::test]
async fn test_value_task_panic_matches_task_panic() {
   let value_task: AsyncLazy<i32> = AsyncLazy::from_value_task(|| ValueTask::pending(explode()));
   let task: AsyncLazy<i32> = AsyncLazy::from_task(explode);
   let first_poll = settle(value_task.acquire()).await;
   assert_eq!(first_poll, settle(task.acquire()).await);
   assert_eq!(first_poll, (TaskStatus::Faulted, String::from("boom on first poll")));

   // Panicking on a later poll takes the shared path and ends up the same way.
   let value_task: AsyncLazy<i32> =
      AsyncLazy::from_value_task(|| ValueTask::pending(explode_after_yield()));
   let task: AsyncLazy<i32> = AsyncLazy::from_task(explode_after_yield);
   let later_poll = settle(value_task.acquire()).await;
   assert_eq!(later_poll, settle(task.acquire()).await);
   assert_eq!(later_poll, (TaskStatus::Faulted, String::from("boom after yield")));
   assert_eq!(value_task.acquire().status(), TaskStatus::Faulted);
}

#[tokio::test]
async fn test_late_cancellation_adopts_caller_token() {
   let token = CancellationToken::new();
   for cell in [
      AsyncLazy::from_value_task(|| ValueTask::pending(cancel_after_yield())),
      AsyncLazy::from_task(cancel_after_yield),
   ] {
      let task = cell.acquire_with(&token);
      assert_eq!(task.status(), TaskStatus::Pending);
      let err = task.clone().await.unwrap_err();
      assert!(err.is_canceled());
      assert!(err.token().is_some());
      assert_eq!(task.status(), TaskStatus::Canceled);
   }

   // Without a caller token the cancellation stays untokened.
   let cell = AsyncLazy::from_task(cancel_after_yield);
   assert!(cell.get().await.unwrap_err().token().is_none());
}

#[tokio::test]
async fn test_panic_payload_is_factory_panic() {
   let cell: AsyncLazy<i32> = AsyncLazy::from_value_task(|| panic!("{} {}", "formatted", 1));
   let err = cell.get().await.unwrap_err();
   let LazyError::Faulted(source) = &err else {
      panic!("expected a fault, got {err:?}");
   };
   let captured = source
      .downcast_ref::<FactoryPanic>()
      .expect("panic should be captured as FactoryPanic");
   assert_eq!(captured.message(), "formatted 1");
}

#[tokio::test]
async fn test_factory_kinds() {
   let task: Factory<u8> = Factory::task(|| async { Ok(1) });
   let cancelable: Factory<u8> = Factory::cancelable_task(|_| async { Ok(2) });
   let value: Factory<u8> = Factory::value_task(|| ValueTask::ready(3));
   let cancelable_value: Factory<u8> = Factory::cancelable_value_task(|_| ValueTask::ready(4));

   assert!(!task.is_cancelable());
   assert!(cancelable.is_cancelable());
   assert!(!value.is_cancelable());
   assert!(cancelable_value.is_cancelable());
   assert_eq!(format!("{cancelable_value:?}"), "Factory(CancelableValueTask)");

   let mut results = Vec::new();
   for factory in [task, cancelable, value, cancelable_value] {
      let cancelable = factory.is_cancelable();
      let cell = AsyncLazy::new(factory);
      assert_eq!(cell.factory().is_cancelable(), cancelable);
      results.push(cell.get().await.unwrap());
   }
   assert_eq!(results, [1, 2, 3, 4]);
}

#[tokio::test]
async fn test_task_constructors() {
   assert_eq!(LazyTask::completed(1).await.unwrap(), 1);
   assert_eq!(LazyTask::<i32>::faulted(LazyError::fault("x")).status(), TaskStatus::Faulted);
   assert_eq!(LazyTask::<i32>::canceled(None).status(), TaskStatus::Canceled);
   assert!(TaskStatus::Canceled.is_terminal());
   assert!(!TaskStatus::Pending.is_terminal());

   let running = LazyTask::from_future(async { Ok::<_, LazyError>(3) });
   assert_eq!(running.status(), TaskStatus::Pending);
   assert_eq!((&running).await.unwrap(), 3);
   assert_eq!(running.value(), Some(&3));
   assert!(matches!(running.peek(), Some(Ok(3))));
}

#[test]
fn test_shared_future_result_is_seen_by_peek_from_other_thread() {
   let cell = Arc::new(AsyncLazy::from_task(|| future::ready(Ok(String::from("ok"))).boxed()));
   let worker = Arc::clone(&cell);
   std::thread::spawn(move || futures::executor::block_on(worker.get()).unwrap())
      .join()
      .unwrap();
   assert_eq!(cell.try_peek_completed().as_deref(), Some("ok"));
}
