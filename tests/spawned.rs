#![cfg(feature = "rt-tokio")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_lazy::{AsyncLazy, LazyError, TaskStatus};
use tokio::sync::oneshot;
use tokio::time::{sleep, Duration};

#[tokio::test]
async fn test_spawned_runs_without_awaiting() {
   let calls = Arc::new(AtomicUsize::new(0));
   let counter = Arc::clone(&calls);
   let cell: AsyncLazy<i32> = AsyncLazy::spawned(move || {
      let counter = Arc::clone(&counter);
      async move {
         counter.fetch_add(1, Ordering::SeqCst);
         Ok(42)
      }
   });

   let task = cell.acquire();
   // Nobody polls the handle; the runtime drives the work on its own.
   while calls.load(Ordering::SeqCst) == 0 {
      sleep(Duration::from_millis(1)).await;
   }
   assert_eq!(task.await.unwrap(), 42);
   assert_eq!(cell.try_peek_completed(), Some(42));
}

#[tokio::test]
async fn test_spawned_orphan_finishes_after_reset() {
   let (tx, rx) = oneshot::channel::<&'static str>();
   let tx = std::sync::Mutex::new(Some(tx));
   let cell = AsyncLazy::spawned(move || {
      let tx = tx.lock().unwrap().take();
      async move {
         sleep(Duration::from_millis(10)).await;
         if let Some(tx) = tx {
            let _ = tx.send("first generation finished");
         }
         Ok(())
      }
   });

   drop(cell.acquire());
   cell.reset();
   drop(cell);

   // The work outlives both the handle and the cell.
   assert_eq!(rx.await.unwrap(), "first generation finished");
}

async fn fail_in_task() -> Result<u8, LazyError> {
   panic!("spawned failure")
}

#[tokio::test]
async fn test_spawned_panic_is_fault() {
   let cell = AsyncLazy::spawned(fail_in_task);
   let task = cell.acquire();
   let err = task.clone().await.unwrap_err();
   assert!(err.is_faulted());
   assert_eq!(err.to_string(), "spawned failure");
   assert_eq!(task.status(), TaskStatus::Faulted);
}

#[test]
fn test_spawned_outside_runtime_is_fault() {
   let cell: AsyncLazy<u8> = AsyncLazy::spawned(|| async { Ok(1) });
   // `tokio::spawn` panics without a runtime; the cell captures it.
   let task = cell.acquire();
   assert_eq!(task.status(), TaskStatus::Faulted);
   let err = futures::executor::block_on(cell.get()).unwrap_err();
   assert!(matches!(err, LazyError::Faulted(_)));
}
