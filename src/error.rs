//! Terminal failure states of a lazy computation.

use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Boxed error accepted by [`LazyError::fault`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Why a [`LazyTask`](crate::LazyTask) did not run to completion.
///
/// The error is cheap to clone, since every caller awaiting a shared task
/// receives its own copy of the same outcome.
#[derive(Debug, Clone, Error)]
pub enum LazyError {
   /// The factory, or the computation it started, failed.
   #[error(transparent)]
   Faulted(Arc<dyn StdError + Send + Sync + 'static>),

   /// The computation was canceled, optionally through a specific token.
   #[error("the operation was canceled")]
   Canceled(Option<CancellationToken>),
}

impl LazyError {
   /// Wraps an arbitrary error as a fault.
   pub fn fault<E>(err: E) -> Self
   where
      E: Into<BoxError>,
   {
      Self::Faulted(Arc::from(err.into()))
   }

   /// A cancellation not tied to any particular token.
   ///
   /// When such a cancellation is captured while a cell is being populated,
   /// it adopts the token the caller supplied to `acquire_with`.
   pub const fn canceled() -> Self {
      Self::Canceled(None)
   }

   /// A cancellation triggered through `token`.
   pub fn canceled_by(token: CancellationToken) -> Self {
      Self::Canceled(Some(token))
   }

   /// Returns `true` for [`LazyError::Faulted`].
   pub fn is_faulted(&self) -> bool {
      matches!(self, Self::Faulted(_))
   }

   /// Returns `true` for [`LazyError::Canceled`].
   pub fn is_canceled(&self) -> bool {
      matches!(self, Self::Canceled(_))
   }

   /// The token behind a cancellation, if one is known.
   pub fn token(&self) -> Option<&CancellationToken> {
      match self {
         Self::Canceled(token) => token.as_ref(),
         Self::Faulted(_) => None,
      }
   }

   /// Fills in `fallback` for cancellations that carry no token of their own.
   pub(crate) fn or_token(self, fallback: Option<&CancellationToken>) -> Self {
      match (self, fallback) {
         (Self::Canceled(None), Some(token)) => Self::Canceled(Some(token.clone())),
         (err, _) => err,
      }
   }

   /// Converts a captured panic payload into a terminal error.
   ///
   /// A payload that already is a `LazyError` is taken as-is; this is how a
   /// factory signals cancellation by unwinding.
   pub(crate) fn from_panic(payload: Box<dyn Any + Send + 'static>) -> Self {
      let payload = match payload.downcast::<LazyError>() {
         Ok(err) => return *err,
         Err(payload) => payload,
      };
      let message = if let Some(msg) = payload.downcast_ref::<&'static str>() {
         (*msg).to_owned()
      } else if let Some(msg) = payload.downcast_ref::<String>() {
         msg.clone()
      } else {
         "factory panicked".to_owned()
      };
      Self::fault(FactoryPanic { message })
   }
}

/// A panic raised by a factory, captured as an error.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FactoryPanic {
   message: String,
}

impl FactoryPanic {
   /// The panic message, or a placeholder for non-string payloads.
   pub fn message(&self) -> &str {
      &self.message
   }
}
