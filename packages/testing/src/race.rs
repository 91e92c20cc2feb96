use std::sync::{Arc, Barrier};
use std::thread;

/// Runs `f` on `threads` threads that are all released at the same instant.
///
/// Each thread receives its index (`0..threads`). The results are returned in index order once
/// every thread has finished.
///
/// # Panics
///
/// Resumes the panic of any thread that panicked.
///
/// # Example
///
/// ```rust
/// use testing::race;
///
/// let squares = race(4, |index| index * index);
/// assert_eq!(squares, vec![0, 1, 4, 9]);
/// ```
pub fn race<F, R>(threads: usize, f: F) -> Vec<R>
where
    F: Fn(usize) -> R + Send + Sync + 'static,
    R: Send + 'static,
{
    let barrier = Arc::new(Barrier::new(threads));
    let f = Arc::new(f);

    let handles = (0..threads)
        .map(|index| {
            let barrier = Arc::clone(&barrier);
            let f = Arc::clone(&f);

            thread::spawn(move || {
                barrier.wait();
                f(index)
            })
        })
        .collect::<Vec<_>>();

    handles
        .into_iter()
        .map(|handle| match handle.join() {
            Ok(result) => result,
            Err(e) => std::panic::resume_unwind(e),
        })
        .collect()
}
