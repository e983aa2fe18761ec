//! Thread confinement for event-loop-bound APIs.
//!
//! Windowing libraries only allow some calls (creating windows and surfaces,
//! polling events, destroying windows) on the thread that runs the event loop.
//! This crate lets worker threads hand such calls to that thread:
//!
//! - [`MainThreadQueue`] lives on the main thread and drains queued jobs.
//! - [`MainThreadHandle`] is cloned into workers; [`MainThreadHandle::run_sync`]
//!   blocks until the main thread ran the closure and returns its value.
//! - A [`Wake`] implementation nudges a sleeping event loop after each push.
//! - [`ActiveWindows`] tells the main loop when every worker has finished.
//!
//! ```
//! use dear_main_thread::MainThreadQueue;
//!
//! let queue = MainThreadQueue::<String>::new(|| true);
//! let handle = queue.handle();
//!
//! let worker = std::thread::spawn(move || handle.run_sync(|name: &String| name.len()));
//!
//! // Main loop: wait for work, then drain it.
//! let name = String::from("main");
//! while !worker.is_finished() {
//!     queue.run_pending(&name);
//!     std::thread::yield_now();
//! }
//! assert_eq!(worker.join().unwrap(), Ok(4));
//! ```

mod active;
mod error;
mod queue;

pub use active::{ActiveGuard, ActiveWindows};
pub use error::{MainThreadError, MainThreadResult};
pub use queue::{Job, MainThreadHandle, MainThreadQueue, Wake};
