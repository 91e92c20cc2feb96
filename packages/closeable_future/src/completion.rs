use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crate::{AwaitError, Completable, ERR_POISONED_LOCK};

#[derive(Debug)]
enum State<T, E> {
    /// Not completed yet. Holds the waker of every [`Wait`] future that is still waiting,
    /// keyed so that a dropped future can take its own waker back out.
    Pending {
        waiters: Vec<(u64, Waker)>,
        next_key: u64,
    },

    /// Completed, successfully or with an error. Final.
    Done(Result<T, E>),
}

#[derive(Debug)]
struct Shared<T, E> {
    state: Mutex<State<T, E>>,

    // Signaled once, when the state becomes `Done`.
    completed: Condvar,
}

/// A result that is assigned at most once and can be read by any number of readers.
///
/// The first call to [`complete()`][Self::complete] or [`fail()`][Self::fail] decides the
/// outcome; later calls have no effect. Readers can peek ([`try_get()`][Self::try_get]), block
/// ([`get()`][Self::get], [`get_timeout()`][Self::get_timeout]) or await ([`wait()`][Self::wait]).
/// Each reader receives its own clone of the outcome.
///
/// Cloning a `Completion` yields another handle to the same result.
///
/// # Example
///
/// ```rust
/// use std::thread;
///
/// use closeable_future::Completion;
///
/// let completion = Completion::<u32, String>::new();
///
/// let producer = completion.clone();
/// thread::spawn(move || {
///     producer.complete(42);
/// });
///
/// assert_eq!(completion.get(), Ok(42));
/// ```
pub struct Completion<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Completion<T, E> {
    /// Creates a completion that has not been completed yet.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(State::Pending {
            waiters: Vec::new(),
            next_key: 0,
        })
    }

    /// Creates a completion that is already completed with `value`.
    #[must_use]
    pub fn succeeded(value: T) -> Self {
        Self::with_state(State::Done(Ok(value)))
    }

    /// Creates a completion that is already completed with `error`.
    #[must_use]
    pub fn failed(error: E) -> Self {
        Self::with_state(State::Done(Err(error)))
    }

    fn with_state(state: State<T, E>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                completed: Condvar::new(),
            }),
        }
    }

    /// Completes with `value`.
    ///
    /// Returns `false` (and drops `value`) if the completion was already completed.
    pub fn complete(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Completes with `error`.
    ///
    /// Returns `false` (and drops `error`) if the completion was already completed.
    pub fn fail(&self, error: E) -> bool {
        self.settle(Err(error))
    }

    #[cfg_attr(test, mutants::skip)] // Critical primitive - causes test timeouts if tampered.
    fn settle(&self, outcome: Result<T, E>) -> bool {
        let wakers = {
            let mut state = self.lock();

            let State::Pending { waiters, .. } = &mut *state else {
                return false;
            };

            let waiters = mem::take(waiters);
            *state = State::Done(outcome);
            waiters
        };

        self.shared.completed.notify_all();

        // We wake outside the lock so a woken task does not immediately contend with us.
        for (_, waker) in wakers {
            waker.wake();
        }

        true
    }

    /// Whether the completion has been completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(*self.lock(), State::Done(_))
    }

    /// Returns a future that resolves to the outcome once the completion is completed.
    ///
    /// Any number of these futures may exist at the same time; all of them are woken when the
    /// outcome is assigned. A future that is dropped before then stops being tracked.
    #[must_use]
    pub fn wait(&self) -> Wait<T, E> {
        Wait {
            shared: Arc::clone(&self.shared),
            key: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T, E>> {
        self.shared.state.lock().expect(ERR_POISONED_LOCK)
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        match &*self.lock() {
            State::Pending { waiters, .. } => waiters.len(),
            State::Done(_) => 0,
        }
    }
}

impl<T, E> Completion<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Returns the outcome if the completion has been completed, without blocking.
    #[must_use]
    pub fn try_get(&self) -> Option<Result<T, E>> {
        match &*self.lock() {
            State::Done(outcome) => Some(outcome.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Blocks the calling thread until the completion is completed and returns the outcome.
    ///
    /// # Errors
    ///
    /// Returns the error the completion was completed with.
    pub fn get(&self) -> Result<T, E> {
        let state = self
            .shared
            .completed
            .wait_while(self.lock(), |state| {
                matches!(state, State::Pending { .. })
            })
            .expect(ERR_POISONED_LOCK);

        match &*state {
            State::Done(outcome) => outcome.clone(),
            State::Pending { .. } => {
                unreachable!("wait_while only returns once the state is Done")
            }
        }
    }

    /// Blocks the calling thread until the completion is completed or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`AwaitError::Failed`] with the error the completion was completed with, or
    /// [`AwaitError::TimedOut`] if it was not completed in time.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, AwaitError<E>> {
        let (state, _) = self
            .shared
            .completed
            .wait_timeout_while(self.lock(), timeout, |state| {
                matches!(state, State::Pending { .. })
            })
            .expect(ERR_POISONED_LOCK);

        match &*state {
            State::Done(Ok(value)) => Ok(value.clone()),
            State::Done(Err(error)) => Err(AwaitError::Failed(error.clone())),
            State::Pending { .. } => Err(AwaitError::TimedOut),
        }
    }
}

impl<T, E> Completable<T, E> for Completion<T, E>
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

impl<T, E> Clone for Completion<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> Default for Completion<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for Completion<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

/// Resolves to the outcome of a [`Completion`].
///
/// Created by [`Completion::wait()`].
pub struct Wait<T, E> {
    shared: Arc<Shared<T, E>>,

    // Identifies our entry in the waiter list once we have been polled while pending.
    key: Option<u64>,
}

impl<T, E> Future for Wait<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, E>;

    #[cfg_attr(test, mutants::skip)] // Critical for code execution to occur in async contexts.
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // `Wait` is `Unpin`, so we can work with it as a plain mutable reference.
        let this = self.get_mut();
        let mut state = this.shared.state.lock().expect(ERR_POISONED_LOCK);

        match &mut *state {
            State::Done(outcome) => Poll::Ready(outcome.clone()),
            State::Pending { waiters, next_key } => {
                let existing = this
                    .key
                    .and_then(|key| waiters.iter_mut().find(|(entry, _)| *entry == key));

                if let Some((_, waker)) = existing {
                    if !waker.will_wake(cx.waker()) {
                        waker.clone_from(cx.waker());
                    }
                } else {
                    let key = *next_key;
                    *next_key = next_key.wrapping_add(1);

                    waiters.push((key, cx.waker().clone()));
                    this.key = Some(key);
                }

                Poll::Pending
            }
        }
    }
}

impl<T, E> Drop for Wait<T, E> {
    fn drop(&mut self) {
        let Some(key) = self.key else {
            return;
        };

        // A poisoned lock is reported by the next reader; panicking here could abort.
        let Ok(mut state) = self.shared.state.lock() else {
            return;
        };

        if let State::Pending { waiters, .. } = &mut *state {
            waiters.retain(|(entry, _)| *entry != key);
        }
    }
}

impl<T, E> fmt::Debug for Wait<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>()).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::pin::pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;
    use std::thread;

    use futures::executor::block_on;
    use static_assertions::assert_impl_all;
    use testing::with_watchdog;

    use super::*;

    assert_impl_all!(Completion<u32, String>: Send, Sync, Clone);
    assert_impl_all!(Wait<u32, String>: Send, Sync, Unpin);

    struct CountingWaker {
        wakes: AtomicUsize,
    }

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.wakes.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn new_is_pending() {
        let completion = Completion::<u32, String>::new();

        assert!(!completion.is_done());
        assert_eq!(completion.try_get(), None);
    }

    #[test]
    fn first_completion_wins() {
        let completion = Completion::<u32, String>::new();

        assert!(completion.complete(1));
        assert!(!completion.complete(2));
        assert!(!completion.fail("too late".to_owned()));

        assert_eq!(completion.try_get(), Some(Ok(1)));
        assert_eq!(completion.get(), Ok(1));
    }

    #[test]
    fn failure_is_observed_by_every_reader() {
        let completion = Completion::<u32, String>::new();
        let other = completion.clone();

        assert!(completion.fail("broken".to_owned()));

        assert_eq!(completion.get(), Err("broken".to_owned()));
        assert_eq!(other.get(), Err("broken".to_owned()));
    }

    #[test]
    fn pre_completed_constructors() {
        assert_eq!(Completion::<u32, String>::succeeded(7).get(), Ok(7));
        assert_eq!(
            Completion::<u32, String>::failed("no".to_owned()).try_get(),
            Some(Err("no".to_owned()))
        );
    }

    #[test]
    fn get_timeout_times_out_when_pending() {
        let completion = Completion::<u32, String>::new();

        assert_eq!(
            completion.get_timeout(Duration::from_millis(10)),
            Err(AwaitError::TimedOut)
        );
    }

    #[test]
    fn get_timeout_reports_failure() {
        let completion = Completion::<u32, String>::failed("no".to_owned());

        assert_eq!(
            completion.get_timeout(Duration::from_millis(10)),
            Err(AwaitError::Failed("no".to_owned()))
        );
    }

    #[test]
    fn get_blocks_until_completed_on_other_thread() {
        with_watchdog(|| {
            let completion = Completion::<u32, String>::new();

            let producer = completion.clone();
            let handle = thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                producer.complete(42)
            });

            assert_eq!(completion.get(), Ok(42));
            assert!(handle.join().unwrap());
        });
    }

    #[test]
    fn get_timeout_returns_value_completed_in_time() {
        with_watchdog(|| {
            let completion = Completion::<u32, String>::new();

            let producer = completion.clone();
            let handle = thread::spawn(move || producer.complete(5));

            assert_eq!(completion.get_timeout(Duration::from_secs(5)), Ok(5));
            handle.join().unwrap();
        });
    }

    #[test]
    fn wait_resolves_when_already_done() {
        let completion = Completion::<u32, String>::succeeded(3);

        assert_eq!(block_on(completion.wait()), Ok(3));
    }

    #[test]
    fn wait_wakes_every_pending_waiter_once() {
        let completion = Completion::<u32, String>::new();

        let first_counter = Arc::new(CountingWaker {
            wakes: AtomicUsize::new(0),
        });
        let first_waker = Waker::from(Arc::clone(&first_counter));
        let mut first_cx = Context::from_waker(&first_waker);

        let second_counter = Arc::new(CountingWaker {
            wakes: AtomicUsize::new(0),
        });
        let second_waker = Waker::from(Arc::clone(&second_counter));
        let mut second_cx = Context::from_waker(&second_waker);

        let mut first = pin!(completion.wait());
        let mut second = pin!(completion.wait());

        assert!(first.as_mut().poll(&mut first_cx).is_pending());
        assert!(first.as_mut().poll(&mut first_cx).is_pending());
        assert!(second.as_mut().poll(&mut second_cx).is_pending());

        completion.complete(9);

        // Polling twice with the same waker registers it only once.
        assert_eq!(first_counter.wakes.load(Ordering::Relaxed), 1);
        assert_eq!(second_counter.wakes.load(Ordering::Relaxed), 1);

        assert_eq!(first.as_mut().poll(&mut first_cx), Poll::Ready(Ok(9)));
        assert_eq!(second.as_mut().poll(&mut second_cx), Poll::Ready(Ok(9)));
    }

    #[test]
    fn dropped_wait_releases_its_waker() {
        let completion = Completion::<u32, String>::new();

        let counter = Arc::new(CountingWaker {
            wakes: AtomicUsize::new(0),
        });
        let waker = Waker::from(Arc::clone(&counter));
        let mut cx = Context::from_waker(&waker);

        for _ in 0..10 {
            let mut wait = pin!(completion.wait());
            assert!(wait.as_mut().poll(&mut cx).is_pending());
            assert_eq!(completion.waiter_count(), 1);
        }

        assert_eq!(completion.waiter_count(), 0);

        let mut kept = pin!(completion.wait());
        assert!(kept.as_mut().poll(&mut cx).is_pending());

        {
            let mut dropped = pin!(completion.wait());
            assert!(dropped.as_mut().poll(&mut cx).is_pending());
            assert_eq!(completion.waiter_count(), 2);
        }

        assert_eq!(completion.waiter_count(), 1);

        completion.complete(1);

        assert_eq!(counter.wakes.load(Ordering::Relaxed), 1);
        assert_eq!(kept.as_mut().poll(&mut cx), Poll::Ready(Ok(1)));
    }

    #[test]
    fn wait_follows_waker_change() {
        let completion = Completion::<u32, String>::new();

        let first_counter = Arc::new(CountingWaker {
            wakes: AtomicUsize::new(0),
        });
        let first_waker = Waker::from(Arc::clone(&first_counter));

        let second_counter = Arc::new(CountingWaker {
            wakes: AtomicUsize::new(0),
        });
        let second_waker = Waker::from(Arc::clone(&second_counter));

        let mut wait = pin!(completion.wait());
        assert!(
            wait.as_mut()
                .poll(&mut Context::from_waker(&first_waker))
                .is_pending()
        );
        assert!(
            wait.as_mut()
                .poll(&mut Context::from_waker(&second_waker))
                .is_pending()
        );
        assert_eq!(completion.waiter_count(), 1);

        completion.complete(2);

        assert_eq!(first_counter.wakes.load(Ordering::Relaxed), 0);
        assert_eq!(second_counter.wakes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn debug_reports_done() {
        let completion = Completion::<u32, String>::succeeded(1);

        assert!(format!("{completion:?}").contains("done: true"));
    }

    #[test]
    fn wait_across_threads() {
        with_watchdog(|| {
            let completion = Completion::<String, String>::new();

            let producer = completion.clone();
            let handle = thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                producer.complete("hello".to_owned());
            });

            assert_eq!(block_on(completion.wait()), Ok("hello".to_owned()));
            handle.join().unwrap();
        });
    }
}
