use std::any::type_name;
use std::cell::UnsafeCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use tracing::trace;

use crate::{AwaitError, BoxError, CloseAction, CloseError, Closeable, Completable, Suppress};

/// Makes any stage closable by pairing it with a close handler.
///
/// The stage itself is not touched by closing; the handler runs instead, at most once, on the
/// thread that closes first. If the stage is a [`Future`] or a [`Completable`], the wrapper is
/// one as well and forwards to it.
///
/// # Example
///
/// ```rust
/// use std::io;
///
/// use closeable_future::{Closeable, CloseableStage, Completion};
///
/// let stage = CloseableStage::with_close_handler(Completion::<u32, String>::succeeded(3), || {
///     Err(io::Error::other("socket already gone"))
/// });
///
/// assert_eq!(stage.stage().get(), Ok(3));
///
/// let error = stage.close().unwrap_err();
/// assert_eq!(error.primary().to_string(), "socket already gone");
///
/// // The handler does not run again.
/// stage.close().unwrap();
/// ```
pub struct CloseableStage<S> {
    stage: S,

    closed: AtomicBool,

    // Taken only by the thread that flips `closed` from false to true.
    handler: UnsafeCell<Option<CloseAction>>,
}

// SAFETY: The only shared access to `handler` happens in `close()`, after winning the
// compare-exchange on `closed`, which at most one thread ever does. The handler itself is `Send`,
// so moving it out on that thread is fine.
unsafe impl<S: Sync> Sync for CloseableStage<S> {}

impl<S> CloseableStage<S> {
    /// Wraps `stage` with a handler that does nothing.
    #[must_use]
    pub fn new(stage: S) -> Self {
        Self::from_parts(stage, None)
    }

    /// Wraps `stage` with a handler that runs when the wrapper is first closed.
    #[must_use]
    pub fn with_close_handler<H, E2>(stage: S, handler: H) -> Self
    where
        H: FnOnce() -> Result<(), E2> + Send + 'static,
        E2: Into<BoxError>,
    {
        Self::from_parts(stage, Some(Box::new(move || handler().map_err(Into::into))))
    }

    fn from_parts(stage: S, handler: Option<CloseAction>) -> Self {
        Self {
            stage,
            closed: AtomicBool::new(false),
            handler: UnsafeCell::new(handler),
        }
    }

    /// Runs the close handler if this is the first call.
    ///
    /// # Errors
    ///
    /// Returns a [`CloseError`] if the handler failed or panicked.
    pub fn close(&self) -> Result<(), CloseError> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        // SAFETY: We won the compare-exchange above, so no other thread will ever touch the
        // handler again and no earlier access can still be in progress.
        let handler = unsafe { (*self.handler.get()).take() };

        let Some(handler) = handler else {
            return Ok(());
        };

        trace!(stage = type_name::<S>(), "running close handler");

        let mut suppress = Suppress::new();
        suppress.run(handler);
        suppress.finish()
    }

    /// Whether the wrapper has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The wrapped stage.
    #[must_use]
    pub fn stage(&self) -> &S {
        &self.stage
    }

    /// Unwraps the stage. A handler that has not run yet is dropped without running.
    #[must_use]
    pub fn into_inner(self) -> S {
        self.stage
    }
}

impl<S> Future for CloseableStage<S>
where
    S: Future,
{
    type Output = S::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: We never move out of `self`, only access its stage field. The wrapper has no
        // `Drop` implementation and only hands out shared references to the stage otherwise.
        let stage = unsafe { self.map_unchecked_mut(|this| &mut this.stage) };

        stage.poll(cx)
    }
}

impl<S, T, E> Completable<T, E> for CloseableStage<S>
where
    S: Completable<T, E>,
{
    fn try_get(&self) -> Option<Result<T, E>> {
        self.stage.try_get()
    }

    fn get(&self) -> Result<T, E> {
        self.stage.get()
    }

    fn get_timeout(&self, timeout: Duration) -> Result<T, AwaitError<E>> {
        self.stage.get_timeout(timeout)
    }
}

impl<S> Closeable for CloseableStage<S> {
    fn close(&self) -> Result<(), CloseError> {
        Self::close(self)
    }

    fn is_closed(&self) -> bool {
        Self::is_closed(self)
    }
}

impl<S> fmt::Debug for CloseableStage<S>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("stage", &self.stage)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
