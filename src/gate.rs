//! Creation gate for lazy cells.
//!
//! A small parking mutex guarding the create-if-absent transaction of
//! [`AsyncLazy`](crate::AsyncLazy). Readers never touch it; only callers that
//! found the slot empty, and `reset`, serialize through it.
//!
//! The state is packed into a single `AtomicU8`:
//! - Bit 0: LOCKED - A caller is inside the critical section
//! - Bit 1: WAITING - At least one thread is parked on the gate
//! - Bits 2-7: EPOCH - Bumped on every unlock so parked threads notice release
//!
//! Blocking goes through `parking_lot_core`'s futex-style park/unpark, keyed on
//! the address of the atomic.

use core::sync::atomic::{AtomicU8, Ordering};

use parking_lot_core::{DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};

/// Mutual exclusion for slot population.
#[repr(transparent)]
pub(crate) struct Gate(AtomicU8);

impl Gate {
   /// Bit flag: Gate is held.
   const LOCKED: u8 = 1;
   /// Bit flag: At least one thread is parked waiting for the gate.
   const WAITING: u8 = 2;
   /// Start of epoch bits.
   const EPOCH_1: u8 = 4;
   /// Mask for epoch bits.
   const EPOCH_MASK: u8 = !(Self::LOCKED | Self::WAITING);

   #[inline(always)]
   const fn next_epoch(current_state: u8) -> u8 {
      (current_state & Self::EPOCH_MASK).wrapping_add(Self::EPOCH_1) & Self::EPOCH_MASK
   }

   /// Creates an open gate.
   #[inline]
   pub(crate) const fn new() -> Self {
      Self(AtomicU8::new(0))
   }

   #[inline]
   fn notify_all(&self) {
      // SAFETY: The same address (the atomic) is used for park and unpark.
      unsafe {
         parking_lot_core::unpark_all(self.0.as_ptr() as usize, DEFAULT_UNPARK_TOKEN);
      }
   }

   /// Parks until the state differs from `expected_state`.
   #[inline]
   fn wait(&self, expected_state: u8) {
      // SAFETY: See `notify_all`.
      unsafe {
         // The validate closure runs under the bucket lock, so an unlock that
         // lands between our CAS and this call is not missed.
         let _ = parking_lot_core::park(
            self.0.as_ptr() as usize,
            || self.0.load(Ordering::Acquire) == expected_state,
            || {},
            |_, _| {},
            DEFAULT_PARK_TOKEN,
            None,
         );
      }
   }

   /// Single attempt at taking the gate.
   ///
   /// Returns the guard on success, or the observed state (with WAITING set)
   /// when the gate is held by someone else.
   #[inline]
   fn lock_step(&self) -> Result<GateGuard<'_>, u8> {
      loop {
         let current_state = self.0.load(Ordering::Relaxed);

         if current_state & Self::LOCKED == 0 {
            match self.0.compare_exchange_weak(
               current_state,
               current_state | Self::LOCKED,
               Ordering::Acquire,
               Ordering::Relaxed,
            ) {
               Ok(_) => return Ok(GateGuard { gate: self }),
               Err(_) => {
                  core::hint::spin_loop();
                  continue;
               }
            }
         }

         if current_state & Self::WAITING == 0 {
            let new_state = current_state | Self::WAITING;
            match self.0.compare_exchange_weak(
               current_state,
               new_state,
               Ordering::Relaxed,
               Ordering::Relaxed,
            ) {
               Ok(_) => return Err(new_state),
               Err(_) => {
                  core::hint::spin_loop();
                  continue;
               }
            }
         }

         return Err(current_state);
      }
   }

   /// Takes the gate, parking the current thread while it is held elsewhere.
   #[inline]
   pub(crate) fn lock(&self) -> GateGuard<'_> {
      let mut observed = match self.lock_step() {
         Ok(guard) => return guard,
         Err(state) => state,
      };
      loop {
         self.wait(observed);
         match self.lock_step() {
            Ok(guard) => return guard,
            Err(state) => observed = state,
         }
      }
   }

   /// Releases the gate, bumping the epoch and waking parked threads.
   #[inline]
   fn unlock(&self) {
      let current_state = self.0.load(Ordering::Relaxed);
      let prev_state = self.0.swap(Self::next_epoch(current_state), Ordering::Release);
      debug_assert!(prev_state & Self::LOCKED != 0, "unlocking an open gate");
      if prev_state & Self::WAITING != 0 {
         self.notify_all();
      }
   }
}

/// RAII guard for [`Gate`]. Dropping it opens the gate again.
pub(crate) struct GateGuard<'a> {
   gate: &'a Gate,
}

impl Drop for GateGuard<'_> {
   #[inline(always)]
   fn drop(&mut self) {
      self.gate.unlock();
   }
}
