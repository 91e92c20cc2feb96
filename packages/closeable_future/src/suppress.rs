use std::panic::{self, AssertUnwindSafe};

use crate::{BoxError, CallbackPanicked, CloseError, Closeable};

/// Runs independent cleanup steps, collecting their failures instead of stopping at the first.
///
/// Every step runs regardless of whether earlier steps failed or panicked. At the end,
/// [`finish()`][Self::finish] combines the collected failures into at most one [`CloseError`]:
/// the first failure becomes the primary error, every later one is attached as suppressed.
///
/// # Example
///
/// ```rust
/// use std::io;
///
/// use closeable_future::Suppress;
///
/// let mut suppress = Suppress::new();
///
/// suppress.run(|| Err(io::Error::other("flush failed")));
/// suppress.run(|| Ok::<(), io::Error>(()));
/// suppress.run(|| Err(io::Error::other("unlink failed")));
///
/// let error = suppress.finish().unwrap_err();
/// assert_eq!(error.primary().to_string(), "flush failed");
/// assert_eq!(error.suppressed().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct Suppress {
    failures: Vec<BoxError>,
}

impl Suppress {
    /// Creates a collector without any failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs a fallible step, recording its error or panic.
    ///
    /// A panic is caught and recorded as [`CallbackPanicked`]; it does not unwind further.
    pub fn run<F, E>(&mut self, step: F)
    where
        F: FnOnce() -> Result<(), E>,
        E: Into<BoxError>,
    {
        // The step is consumed by the call, so nothing it captured can be observed
        // in a broken state after a panic.
        match panic::catch_unwind(AssertUnwindSafe(step)) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => self.record(error),
            Err(payload) => self.record(CallbackPanicked::from_payload(payload.as_ref())),
        }
    }

    /// Closes `resource`, recording any failure.
    pub fn close<C>(&mut self, resource: &C)
    where
        C: Closeable + ?Sized,
    {
        self.run(|| resource.close());
    }

    /// Closes every resource in order, recording failures and continuing past them.
    pub fn close_all<'a, I, C>(&mut self, resources: I)
    where
        I: IntoIterator<Item = &'a C>,
        C: Closeable + ?Sized + 'a,
    {
        for resource in resources {
            self.close(resource);
        }
    }

    /// Records a failure that was obtained elsewhere.
    pub fn record(&mut self, error: impl Into<BoxError>) {
        self.failures.push(error.into());
    }

    /// Whether any failure has been recorded.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// The number of failures recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Whether no failure has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Combines the recorded failures into a single result.
    ///
    /// # Errors
    ///
    /// Returns a [`CloseError`] if at least one failure was recorded. Its primary error is the
    /// first recorded failure (keeping its concrete type) and its suppressed errors are the
    /// remaining failures, in recording order.
    pub fn finish(self) -> Result<(), CloseError> {
        let mut failures = self.failures.into_iter();

        let Some(first) = failures.next() else {
            return Ok(());
        };

        let mut error = CloseError::from_primary(first);

        for failure in failures {
            error.add_suppressed(failure);
        }

        Err(error)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::CloseableStage;

    #[test]
    fn nothing_recorded_is_ok() {
        let mut suppress = Suppress::new();

        suppress.run(|| Ok::<(), io::Error>(()));

        assert!(suppress.is_empty());
        suppress.finish().unwrap();
    }

    #[test]
    fn later_steps_run_after_failure() {
        let ran = AtomicUsize::new(0);
        let mut suppress = Suppress::new();

        suppress.run(|| {
            ran.fetch_add(1, Ordering::Relaxed);
            Err(io::Error::other("first"))
        });
        suppress.run(|| {
            ran.fetch_add(1, Ordering::Relaxed);
            Ok::<(), io::Error>(())
        });

        assert_eq!(ran.load(Ordering::Relaxed), 2);
        assert!(suppress.has_failures());
        assert_eq!(suppress.len(), 1);
    }

    #[test]
    fn first_failure_is_primary_and_keeps_type() {
        let mut suppress = Suppress::new();

        suppress.run(|| Err(io::Error::new(io::ErrorKind::NotFound, "first")));
        suppress.run(|| Err::<(), _>("second"));
        suppress.run(|| Err::<(), _>("third"));

        let error = suppress.finish().unwrap_err();

        let primary = error.primary().downcast_ref::<io::Error>().unwrap();
        assert_eq!(primary.kind(), io::ErrorKind::NotFound);

        let suppressed = error
            .suppressed()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        assert_eq!(suppressed, vec!["second", "third"]);
    }

    #[test]
    fn panic_is_wrapped() {
        let mut suppress = Suppress::new();

        suppress.run(|| -> Result<(), io::Error> { panic!("kaboom") });
        suppress.run(|| Err::<(), _>("after panic"));

        let error = suppress.finish().unwrap_err();

        let panicked = error
            .primary()
            .downcast_ref::<CallbackPanicked>()
            .expect("a panic must be wrapped in CallbackPanicked");
        assert_eq!(panicked.message(), "kaboom");
        assert_eq!(error.suppressed().len(), 1);
    }

    #[test]
    fn record_adds_failure() {
        let mut suppress = Suppress::new();

        suppress.record("recorded");

        assert_eq!(
            suppress.finish().unwrap_err().primary().to_string(),
            "recorded"
        );
    }

    #[test]
    fn close_all_closes_everything() {
        let closed = Arc::new(AtomicUsize::new(0));

        let stages = (0..3)
            .map(|index| {
                let closed = Arc::clone(&closed);
                CloseableStage::with_close_handler(index, move || {
                    closed.fetch_add(1, Ordering::Relaxed);

                    if index == 1 {
                        Err("stage 1 refused to close")
                    } else {
                        Ok(())
                    }
                })
            })
            .collect::<Vec<_>>();

        let mut suppress = Suppress::new();
        suppress.close_all(&stages);

        assert_eq!(closed.load(Ordering::Relaxed), 3);

        let error = suppress.finish().unwrap_err();
        assert_eq!(error.primary().to_string(), "stage 1 refused to close");
        assert!(error.suppressed().is_empty());
    }
}
