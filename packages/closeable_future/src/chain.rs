//! Lock-free stack of pending close callbacks.
//!
//! The chain is a singly linked list of heap-allocated nodes whose head lives in an
//! [`AtomicPtr`]. It has two phases:
//!
//! * open - the head is null or points at the most recently registered node;
//! * closed - the head is the address of a static sentinel node and stays that way forever.
//!
//! Registration pushes onto the head with a compare-exchange loop. Closing exchanges the head
//! with the sentinel in a single atomic swap. Whoever receives a non-sentinel head from that swap
//! is the only thread that will ever see those nodes again, so ownership of the whole list passes
//! to it without further synchronization. A push that observes the sentinel never publishes its
//! node and instead hands the callback back to the caller.
//!
//! Nodes are never removed individually and no node is published after the sentinel, so a stale
//! head pointer can never be reused by a successful compare-exchange (no ABA). The sentinel is
//! only compared by address; it is never dereferenced.

use std::any::type_name;
use std::fmt;
use std::iter::FusedIterator;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::BoxError;

/// A type-erased close callback, as stored in a [`CloseChain`].
pub type CloseAction = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

struct Node {
    next: *mut Node,

    // Always `Some` for registered nodes; `None` only in the sentinel.
    action: Option<CloseAction>,
}

struct Sentinel(Node);

// SAFETY: The sentinel is only ever used for its address. No thread reads or writes through it.
unsafe impl Sync for Sentinel {}

static SENTINEL: Sentinel = Sentinel(Node {
    next: ptr::null_mut(),
    action: None,
});

fn sentinel() -> *mut Node {
    ptr::from_ref(&SENTINEL.0).cast_mut()
}

/// Outcome of [`CloseChain::push()`].
#[must_use = "a closed chain hands the action back and it must be run by the caller"]
#[non_exhaustive]
pub enum Registration {
    /// The action was linked into the chain and will run when the chain is drained.
    Registered,

    /// The chain was already closed. The action was not linked; it is returned so the caller
    /// can run it immediately.
    Closed(CloseAction),
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered => f.write_str("Registered"),
            Self::Closed(_) => f.debug_tuple("Closed").finish_non_exhaustive(),
        }
    }
}

/// A lock-free, drain-once stack of close callbacks.
///
/// Actions pushed before the chain is drained are yielded by the (single) successful
/// [`drain()`][Self::drain], newest first. Actions pushed after that are handed back to the
/// pusher. Every action ends up in exactly one of the two places.
///
/// The chain never invokes an action itself and never blocks.
///
/// # Example
///
/// ```rust
/// use closeable_future::{BoxError, CloseChain, Registration};
///
/// let chain = CloseChain::new();
///
/// assert!(matches!(
///     chain.push(Box::new(|| Ok::<(), BoxError>(()))),
///     Registration::Registered
/// ));
///
/// let drain = chain.drain();
/// assert!(drain.was_first());
/// assert_eq!(drain.count(), 1);
///
/// assert!(matches!(
///     chain.push(Box::new(|| Ok::<(), BoxError>(()))),
///     Registration::Closed(_)
/// ));
/// assert!(!chain.drain().was_first());
/// ```
pub struct CloseChain {
    head: AtomicPtr<Node>,
}

impl CloseChain {
    /// Creates an open chain without any registered actions.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Creates a chain that is already closed.
    ///
    /// Every push is handed straight back and every drain is empty.
    #[must_use]
    pub fn closed() -> Self {
        Self {
            head: AtomicPtr::new(sentinel()),
        }
    }

    /// Whether the chain has been drained (or was created closed).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.head.load(Ordering::Acquire) == sentinel()
    }

    /// Links `action` into the chain, unless the chain is already closed.
    ///
    /// If the chain is closed - including when it gets closed concurrently while this call is
    /// retrying - the action is returned in [`Registration::Closed`] and the caller is
    /// responsible for running it.
    #[cfg_attr(test, mutants::skip)] // Critical - mutation can cause lost callbacks and hangs.
    pub fn push(&self, action: CloseAction) -> Registration {
        let node = Box::into_raw(Box::new(Node {
            next: ptr::null_mut(),
            action: Some(action),
        }));

        let mut current = self.head.load(Ordering::Acquire);

        loop {
            if current == sentinel() {
                // SAFETY: The node came from `Box::into_raw()` above and was never published,
                // so we are still its only owner.
                let node = unsafe { Box::from_raw(node) };

                let Some(action) = node.action else {
                    unreachable!("a freshly created registration node always carries its action");
                };

                return Registration::Closed(action);
            }

            // SAFETY: The node is not published yet, so nobody else can be accessing it.
            unsafe {
                (*node).next = current;
            }

            // Release publishes the node contents to whoever later drains the chain.
            match self.head.compare_exchange_weak(
                current,
                node,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return Registration::Registered,
                Err(actual) => current = actual,
            }
        }
    }

    /// Closes the chain and takes ownership of every registered action.
    ///
    /// Only the first call on a chain gets [`Drain::was_first()`] of `true` and a non-empty
    /// sequence; every other call (concurrent or later) gets an empty drain.
    #[cfg_attr(test, mutants::skip)] // Critical - mutation can cause double invocation.
    pub fn drain(&self) -> Drain {
        // Acquire pairs with the Release in `push()`, making every node we now own visible.
        let previous = self.head.swap(sentinel(), Ordering::AcqRel);

        if previous == sentinel() {
            Drain {
                next: ptr::null_mut(),
                was_first: false,
            }
        } else {
            Drain {
                next: previous,
                was_first: true,
            }
        }
    }
}

impl Default for CloseChain {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CloseChain {
    fn drop(&mut self) {
        let head = *self.head.get_mut();

        if head != sentinel() {
            // Never closed - release the nodes. The actions are dropped without running.
            drop(Drain {
                next: head,
                was_first: true,
            });
        }
    }
}

impl fmt::Debug for CloseChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// The actions taken out of a [`CloseChain`] by [`CloseChain::drain()`].
///
/// Yields the actions newest first. Actions that are not iterated are dropped without running
/// when the drain is dropped.
pub struct Drain {
    // Exclusively owned list of nodes, or null when exhausted.
    next: *mut Node,

    was_first: bool,
}

impl Drain {
    /// Whether this drain is the one that closed the chain.
    #[must_use]
    pub fn was_first(&self) -> bool {
        self.was_first
    }
}

impl Iterator for Drain {
    type Item = CloseAction;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.next.is_null() {
            // SAFETY: Every non-null pointer in the list came from `Box::into_raw()` in `push()`
            // and ownership was transferred to us by the swap in `drain()`. We unlink the node
            // before yielding, so it is freed exactly once.
            let node = unsafe { Box::from_raw(self.next) };

            self.next = node.next;

            if let Some(action) = node.action {
                return Some(action);
            }
        }

        None
    }
}

impl FusedIterator for Drain {}

impl Drop for Drain {
    fn drop(&mut self) {
        self.for_each(drop);
    }
}

impl fmt::Debug for Drain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("was_first", &self.was_first)
            .field("exhausted", &self.next.is_null())
            .finish_non_exhaustive()
    }
}
