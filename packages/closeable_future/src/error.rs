use std::any::Any;
use std::error::Error as StdError;

use thiserror::Error;

/// A type-erased, thread-safe error value.
///
/// Close callbacks and close handlers may fail with any error type; failures are carried in this
/// form and can be recovered with [`downcast_ref`][dyn StdError::downcast_ref] or
/// [`downcast`][Box::downcast].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A close callback or close handler panicked instead of returning.
///
/// A panic payload is not an error value, so it is wrapped in this type (keeping the panic
/// message, if it had one) when it is aggregated into a [`CloseError`].
#[derive(Debug, Error)]
#[error("close callback panicked: {message}")]
pub struct CallbackPanicked {
    message: String,
}

impl CallbackPanicked {
    pub(crate) fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_owned()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "<non-string panic payload>".to_owned()
        };

        Self { message }
    }

    /// The message the callback panicked with.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// One or more close callbacks failed.
///
/// The first failure is the primary error and keeps its own type. Every later failure from the
/// same close operation is attached as a suppressed error, in the order in which it happened.
/// Nothing is dropped and nothing is reported twice.
#[derive(Debug, Error)]
#[error("close failed: {primary} ({} more suppressed)", .suppressed.len())]
pub struct CloseError {
    #[source]
    primary: BoxError,

    suppressed: Vec<BoxError>,
}

impl CloseError {
    /// Turns the first failure of a close operation into the aggregate.
    ///
    /// A failure that already is a [`CloseError`] (e.g. from closing a nested resource) is
    /// adopted as-is, so its own suppressed list continues to grow.
    pub(crate) fn from_primary(primary: BoxError) -> Self {
        match primary.downcast::<Self>() {
            Ok(nested) => *nested,
            Err(primary) => Self {
                primary,
                suppressed: Vec::new(),
            },
        }
    }

    pub(crate) fn add_suppressed(&mut self, error: BoxError) {
        self.suppressed.push(error);
    }

    /// The first failure that occurred.
    #[must_use]
    pub fn primary(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.primary.as_ref()
    }

    /// Every failure after the first, in the order in which they occurred.
    #[must_use]
    pub fn suppressed(&self) -> &[BoxError] {
        &self.suppressed
    }

    /// Splits the aggregate into the primary failure and the suppressed failures.
    #[must_use]
    pub fn into_parts(self) -> (BoxError, Vec<BoxError>) {
        (self.primary, self.suppressed)
    }
}

/// Waiting for the outcome of a completion did not produce a value.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum AwaitError<E> {
    /// The completion was completed with an error.
    #[error("completed with an error: {0}")]
    Failed(E),

    /// The completion was not completed before the timeout elapsed.
    #[error("timed out waiting for completion")]
    TimedOut,
}
