use std::time::Duration;

use crate::{AwaitError, CloseError};

/// Something that holds resources released by an explicit, idempotent close.
///
/// Two variants implement this:
///
/// * [`CloseableFuture`][crate::CloseableFuture] is closable natively and runs its registered
///   close callbacks;
/// * [`CloseableStage`][crate::CloseableStage] adapts an arbitrary stage plus a close handler.
///
/// The trait is object safe, so either variant can be held as `Box<dyn Closeable + Send + Sync>`.
pub trait Closeable {
    /// Closes the resource.
    ///
    /// Only the first call has an effect. Every later call, including calls racing with the
    /// first one, returns `Ok(())` without doing anything.
    ///
    /// # Errors
    ///
    /// Returns a [`CloseError`] if any part of the close logic failed. Failures never stop the
    /// remaining close logic from running.
    fn close(&self) -> Result<(), CloseError>;

    /// Whether [`close()`][Self::close] has been called (or the resource was created closed).
    fn is_closed(&self) -> bool;
}

/// Something that eventually holds a `Result<T, E>` that can be read any number of times.
pub trait Completable<T, E> {
    /// Returns the outcome if it is already known, without blocking.
    fn try_get(&self) -> Option<Result<T, E>>;

    /// Blocks the calling thread until the outcome is known.
    ///
    /// # Errors
    ///
    /// Returns the error the stage was completed with.
    fn get(&self) -> Result<T, E>;

    /// Blocks the calling thread until the outcome is known or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`AwaitError::Failed`] if the stage was completed with an error and
    /// [`AwaitError::TimedOut`] if it was not completed in time.
    fn get_timeout(&self, timeout: Duration) -> Result<T, AwaitError<E>>;
}

/// Waits for the outcome of `stage`, optionally bounded by `timeout`.
///
/// `None` or a zero duration waits without a bound; any other duration is a timeout.
///
/// # Errors
///
/// Returns [`AwaitError::Failed`] if the stage was completed with an error and
/// [`AwaitError::TimedOut`] if a timeout was given and elapsed first.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use closeable_future::{AwaitError, Completion, await_result};
///
/// let done = Completion::<u32, String>::succeeded(1);
/// assert_eq!(await_result(&done, None), Ok(1));
///
/// let pending = Completion::<u32, String>::new();
/// assert_eq!(
///     await_result(&pending, Some(Duration::from_millis(1))),
///     Err(AwaitError::TimedOut)
/// );
/// ```
pub fn await_result<T, E, C>(stage: &C, timeout: Option<Duration>) -> Result<T, AwaitError<E>>
where
    C: Completable<T, E> + ?Sized,
{
    match timeout {
        Some(timeout) if !timeout.is_zero() => stage.get_timeout(timeout),
        _ => stage.get().map_err(AwaitError::Failed),
    }
}
