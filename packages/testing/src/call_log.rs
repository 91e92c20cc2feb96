use std::fmt;
use std::sync::{Arc, Mutex};

const ERR_POISONED_LOCK: &str = "call log lock poisoned - a recording callback panicked mid-push";

/// Thread-safe record of callback invocations, identified by caller-chosen numbers.
///
/// Cloning the log yields another handle to the same record, so a clone can be moved into each
/// callback while the test keeps its own handle for the assertions.
///
/// # Example
///
/// ```rust
/// use testing::CallLog;
///
/// let log = CallLog::new();
///
/// let first = log.recorder(1);
/// let second = log.recorder(2);
///
/// second();
/// first();
///
/// assert_eq!(log.calls(), vec![2, 1]);
/// ```
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<usize>>>,
}

impl CallLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `id` to the log.
    ///
    /// # Panics
    ///
    /// Panics if another recorder panicked while holding the lock.
    pub fn record(&self, id: usize) {
        self.calls.lock().expect(ERR_POISONED_LOCK).push(id);
    }

    /// Returns a callback that appends `id` to the log when invoked.
    #[must_use]
    pub fn recorder(&self, id: usize) -> impl FnOnce() + Send + 'static {
        let log = self.clone();
        move || log.record(id)
    }

    /// Returns the recorded ids in invocation order.
    ///
    /// # Panics
    ///
    /// Panics if a recorder panicked while holding the lock.
    #[must_use]
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().expect(ERR_POISONED_LOCK).clone()
    }

    /// Returns how many times `id` was recorded.
    #[must_use]
    pub fn count_of(&self, id: usize) -> usize {
        self.calls().into_iter().filter(|call| *call == id).count()
    }

    /// Returns the total number of recorded invocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.lock().expect(ERR_POISONED_LOCK).len()
    }

    /// Whether nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for CallLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallLog")
            .field("calls", &self.calls())
            .finish()
    }
}
