//! Atomic slot holding the current generation's task.
//!
//! The slot owns one strong reference to a [`LazyTask`] through a raw pointer
//! in an `AtomicPtr`, so emptiness can be checked with a single load and a
//! populated slot can be cloned out without taking a lock.
//!
//! Cloning out of the slot races with `take`: a reader may load the pointer
//! just before it is swapped out and then bump the count of an `Arc` that the
//! writer is about to release. Readers therefore announce themselves in
//! `readers` for the few instructions between the load and the increment, and
//! `take` waits for that count to drain before handing the old reference back.
//!
//! The emptiness check (`is_populated`) is a single load. Cloning out is not:
//! every `load` also does a `fetch_add`/`fetch_sub` pair on `readers`, so
//! readers hammering one cell from many cores contend on that cache line.

use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::task::{LazyTask, TaskCore};

pub(crate) struct TaskSlot<T> {
   ptr: AtomicPtr<TaskCore<T>>,
   readers: AtomicUsize,
   _owns: PhantomData<LazyTask<T>>,
}

impl<T> TaskSlot<T> {
   pub(crate) const fn new() -> Self {
      Self {
         ptr: AtomicPtr::new(ptr::null_mut()),
         readers: AtomicUsize::new(0),
         _owns: PhantomData,
      }
   }

   #[inline]
   pub(crate) fn is_populated(&self) -> bool {
      !self.ptr.load(Ordering::Acquire).is_null()
   }

   /// Clones the stored task out of the slot, if any.
   #[inline]
   pub(crate) fn load(&self) -> Option<LazyTask<T>> {
      self.readers.fetch_add(1, Ordering::SeqCst);
      let raw = self.ptr.load(Ordering::SeqCst);
      let task = if raw.is_null() {
         None
      } else {
         // SAFETY: `raw` came from `LazyTask::into_raw` and its reference
         // cannot be released while `readers` is non-zero (see `take`).
         unsafe {
            Arc::increment_strong_count(raw.cast_const());
            Some(LazyTask::from_raw(raw.cast_const()))
         }
      };
      self.readers.fetch_sub(1, Ordering::Release);
      task
   }

   /// Stores `task` into an empty slot.
   ///
   /// Must be called with the creation gate held.
   #[inline]
   pub(crate) fn store(&self, task: LazyTask<T>) {
      let raw = task.into_raw().cast_mut();
      let prev = self.ptr.swap(raw, Ordering::SeqCst);
      debug_assert!(prev.is_null(), "populated a non-empty slot");
      if !prev.is_null() {
         drop(self.reclaim(prev));
      }
   }

   /// Empties the slot, returning the task it held.
   #[inline]
   pub(crate) fn take(&self) -> Option<LazyTask<T>> {
      let prev = self.ptr.swap(ptr::null_mut(), Ordering::SeqCst);
      if prev.is_null() {
         None
      } else {
         Some(self.reclaim(prev))
      }
   }

   /// Turns a pointer that was swapped out of the slot back into a handle once
   /// no reader can still be about to clone it.
   fn reclaim(&self, raw: *mut TaskCore<T>) -> LazyTask<T> {
      let mut spins = 0u32;
      while self.readers.load(Ordering::SeqCst) != 0 {
         if spins < 64 {
            core::hint::spin_loop();
            spins += 1;
         } else {
            std::thread::yield_now();
         }
      }
      // SAFETY: `raw` was swapped out of the slot, so this is the only owner
      // of the slot's reference, and every reader that saw it has already
      // taken its own.
      unsafe { LazyTask::from_raw(raw.cast_const()) }
   }
}

impl<T> Drop for TaskSlot<T> {
   fn drop(&mut self) {
      let raw = *self.ptr.get_mut();
      if !raw.is_null() {
         // SAFETY: Exclusive access; the slot owns this reference.
         drop(unsafe { LazyTask::from_raw(raw.cast_const()) });
      }
   }
}
