use std::any::type_name;
use std::convert::Infallible;
use std::fmt;
use std::time::Duration;

use tracing::trace;

use crate::{
    AwaitError, BoxError, CloseChain, CloseError, Closeable, Completable, Completion, Registration,
    Suppress, Wait,
};

/// A single-assignment result that can also be closed, releasing resources tied to it.
///
/// Completing and closing are independent. Completing assigns the outcome (see [`Completion`]).
/// Closing runs every callback registered through [`when_closed()`][Self::when_closed] or
/// [`try_when_closed()`][Self::try_when_closed], newest first, exactly once. Callbacks registered
/// after the future has been closed run immediately, on the registering thread.
///
/// Registration and closing never block and may race freely with each other; no callback is
/// ever lost or run twice.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use closeable_future::CloseableFuture;
///
/// let released = Arc::new(AtomicUsize::new(0));
/// let future = CloseableFuture::<u32, String>::new();
///
/// future.when_closed({
///     let released = Arc::clone(&released);
///     move || {
///         released.fetch_add(1, Ordering::Relaxed);
///     }
/// });
///
/// future.complete(42);
/// assert_eq!(future.get(), Ok(42));
///
/// future.close().unwrap();
/// future.close().unwrap();
///
/// assert_eq!(released.load(Ordering::Relaxed), 1);
/// ```
pub struct CloseableFuture<T, E> {
    completion: Completion<T, E>,
    chain: CloseChain,
}

impl<T, E> CloseableFuture<T, E> {
    /// Creates a future that is neither completed nor closed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            completion: Completion::new(),
            chain: CloseChain::new(),
        }
    }

    /// Creates a future that is already completed with `value` and already closed.
    ///
    /// Every callback registered on it runs immediately.
    #[must_use]
    pub fn succeeded(value: T) -> Self {
        Self {
            completion: Completion::succeeded(value),
            chain: CloseChain::closed(),
        }
    }

    /// Creates a future that is already completed with `error` and already closed.
    ///
    /// Every callback registered on it runs immediately.
    #[must_use]
    pub fn failed(error: E) -> Self {
        Self {
            completion: Completion::failed(error),
            chain: CloseChain::closed(),
        }
    }

    /// Completes the future with `value`.
    ///
    /// Returns `false` if the future was already completed.
    pub fn complete(&self, value: T) -> bool {
        self.completion.complete(value)
    }

    /// Completes the future with `error`.
    ///
    /// Returns `false` if the future was already completed.
    pub fn fail(&self, error: E) -> bool {
        self.completion.fail(error)
    }

    /// Whether the future has been completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    /// Returns a future that resolves to the outcome once it is assigned.
    #[must_use]
    pub fn wait(&self) -> Wait<T, E> {
        self.completion.wait()
    }

    /// The completion that holds the outcome.
    ///
    /// Clone it to hand a producer a way to complete the future without giving it the ability
    /// to close it.
    #[must_use]
    pub fn completion(&self) -> &Completion<T, E> {
        &self.completion
    }

    /// Registers a callback to run when the future is closed.
    ///
    /// If the future is already closed, `callback` runs before this call returns.
    pub fn when_closed<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let result = self.try_when_closed(move || {
            callback();
            Ok::<(), Infallible>(())
        });

        if let Err(error) = result {
            unreachable!("an infallible close callback reported a failure: {error}");
        }
    }

    /// Registers a fallible callback to run when the future is closed.
    ///
    /// A failure of a callback that is registered in time is reported by the
    /// [`close()`][Self::close] call that runs it.
    ///
    /// # Errors
    ///
    /// If the future is already closed, `callback` runs before this call returns and its failure
    /// (if any) is returned here. A panic in such a callback is not caught.
    pub fn try_when_closed<F, E2>(&self, callback: F) -> Result<(), BoxError>
    where
        F: FnOnce() -> Result<(), E2> + Send + 'static,
        E2: Into<BoxError>,
    {
        match self
            .chain
            .push(Box::new(move || callback().map_err(Into::into)))
        {
            Registration::Registered => Ok(()),
            Registration::Closed(action) => {
                trace!("future already closed, running close callback inline");
                action()
            }
        }
    }

    /// Closes the future, running every registered callback.
    ///
    /// Only the first call does anything. It runs the callbacks on the calling thread, newest
    /// first. A callback that fails or panics does not prevent the remaining callbacks from
    /// running. Concurrent and later calls return `Ok(())` immediately, even while the first
    /// call is still running callbacks.
    ///
    /// Closing does not complete the future.
    ///
    /// # Errors
    ///
    /// Returns a [`CloseError`] if any callback failed or panicked. The first failure (in
    /// execution order) is the primary error; the rest are attached as suppressed.
    pub fn close(&self) -> Result<(), CloseError> {
        let drain = self.chain.drain();

        if !drain.was_first() {
            return Ok(());
        }

        let mut suppress = Suppress::new();
        let mut callbacks: usize = 0;

        for action in drain {
            suppress.run(action);
            callbacks = callbacks.wrapping_add(1);
        }

        trace!(callbacks, failures = suppress.len(), "future closed");

        suppress.finish()
    }

    /// Whether the future has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.chain.is_closed()
    }
}

impl<T, E> CloseableFuture<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Returns the outcome if it has been assigned, without blocking.
    #[must_use]
    pub fn try_get(&self) -> Option<Result<T, E>> {
        self.completion.try_get()
    }

    /// Blocks until the outcome is assigned and returns it.
    ///
    /// # Errors
    ///
    /// Returns the error the future was completed with.
    pub fn get(&self) -> Result<T, E> {
        self.completion.get()
    }

    /// Blocks until the outcome is assigned or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`AwaitError::Failed`] if the future was completed with an error and
    /// [`AwaitError::TimedOut`] if it was not completed in time.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, AwaitError<E>> {
        self.completion.get_timeout(timeout)
    }
}

impl<T, E> Closeable for CloseableFuture<T, E> {
    fn close(&self) -> Result<(), CloseError> {
        Self::close(self)
    }

    fn is_closed(&self) -> bool {
        Self::is_closed(self)
    }
}

impl<T, E> Completable<T, E> for CloseableFuture<T, E>
where
    T: Clone,
    E: Clone,
{
    fn try_get(&self) -> Option<Result<T, E>> {
        Self::try_get(self)
    }

    fn get(&self) -> Result<T, E> {
        Self::get(self)
    }

    fn get_timeout(&self, timeout: Duration) -> Result<T, AwaitError<E>> {
        Self::get_timeout(self, timeout)
    }
}

impl<T, E> Default for CloseableFuture<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for CloseableFuture<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("completion", &self.completion)
            .field("chain", &self.chain)
            .finish()
    }
}
