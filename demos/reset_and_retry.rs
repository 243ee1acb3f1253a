use std::sync::atomic::{AtomicUsize, Ordering};

use async_lazy::{AsyncLazy, LazyError, ValueTask};

static ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

fn connect() -> ValueTask<u16> {
   match ATTEMPTS.fetch_add(1, Ordering::Relaxed) {
      0 => ValueTask::failed(LazyError::fault("connection refused")),
      _ => ValueTask::pending(async { Ok(8080) }),
   }
}

#[tokio::main]
async fn main() {
   let port = AsyncLazy::from_value_task(connect);

   // The failure is cached for the whole generation.
   for _ in 0..3 {
      match port.get().await {
         Ok(port) => println!("Connected on {port}"),
         Err(err) => println!("Cached failure: {err}"),
      }
   }

   // Resetting opens a new generation and the next access retries.
   port.reset();
   println!("Connected on {}", port.get().await.unwrap());
   assert_eq!(ATTEMPTS.load(Ordering::Relaxed), 2);
}
