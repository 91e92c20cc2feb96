#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Single-assignment futures that can be closed, running registered close callbacks exactly once.
//!
//! A [`CloseableFuture`] combines two independent things:
//!
//! * a [`Completion`], a result that is assigned at most once and can be read by any number of
//!   readers, blocking or async;
//! * a [`CloseChain`], a lock-free stack of close callbacks that is drained exactly once.
//!
//! Callbacks registered with [`CloseableFuture::when_closed()`] before the future is closed run
//! on the closing thread, newest first. Callbacks registered afterwards run immediately, on the
//! registering thread. Registration and closing may race from any number of threads without
//! locks; every callback runs exactly once.
//!
//! Closing never stops at the first failing callback. Every callback runs and the failures are
//! combined into one [`CloseError`]: the first failure is the primary error and keeps its type,
//! later failures are attached as suppressed errors. The same aggregation is available to your
//! own cleanup code through [`Suppress`].
//!
//! Arbitrary stages that are not closable by themselves can be paired with a close handler via
//! [`CloseableStage`]. Both variants implement [`Closeable`], so they can be closed uniformly.
//!
//! # Example
//!
//! ```rust
//! use std::io;
//!
//! use closeable_future::CloseableFuture;
//!
//! let future = CloseableFuture::<String, io::ErrorKind>::new();
//!
//! future.when_closed(|| println!("first registered, runs last"));
//! future
//!     .try_when_closed(|| Err(io::Error::other("could not release buffer")))
//!     .unwrap();
//! future.when_closed(|| println!("last registered, runs first"));
//!
//! future.complete("payload".to_owned());
//! assert_eq!(future.get().unwrap(), "payload");
//!
//! let error = future.close().unwrap_err();
//! assert_eq!(error.primary().to_string(), "could not release buffer");
//!
//! // Closed futures run new callbacks immediately.
//! future.when_closed(|| println!("runs right away"));
//! ```
//!
//! # Logging
//!
//! The crate emits [`tracing`](https://docs.rs/tracing) events at the `TRACE` level when a
//! future is closed, when a callback runs inline because it was registered too late and when a
//! stage close handler runs. Failures are never logged; they are always returned.

mod chain;
mod closeable;
mod closeable_future;
mod closeable_stage;
mod completion;
mod constants;
mod error;
mod suppress;

pub use chain::*;
pub use closeable::*;
pub use closeable_future::*;
pub use closeable_stage::*;
pub use completion::*;
pub(crate) use constants::*;
pub use error::*;
pub use suppress::*;
