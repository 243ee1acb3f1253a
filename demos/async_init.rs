use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_lazy::AsyncLazy;
use tokio::time::{sleep, Duration};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

#[tokio::main]
async fn main() {
   let data = Arc::new(AsyncLazy::from_task(|| async {
      // This async block runs only once
      COUNTER.fetch_add(1, Ordering::Relaxed);
      println!("Initializing async data...");
      sleep(Duration::from_millis(50)).await;
      Ok("Async expensive data".to_string())
   }));

   let tasks: Vec<_> = (0..5)
      .map(|_| {
         let data = Arc::clone(&data);
         tokio::spawn(async move {
            println!("Task access: {}", data.get().await.unwrap());
         })
      })
      .collect();

   for t in tasks {
      t.await.unwrap();
   }

   assert_eq!(data.try_peek_completed().as_deref(), Some("Async expensive data"));
   assert_eq!(COUNTER.load(Ordering::Relaxed), 1); // Initializer ran only once
   println!("Final async data: {}", data.get().await.unwrap());
}
