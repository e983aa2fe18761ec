//! dear-threaded-ash: several Dear ImGui windows, one thread each
//!
//! Every OS window is driven by its own worker thread that owns the window's
//! Dear ImGui context, winit platform glue, Vulkan renderer and swapchain.
//! All windows share one Vulkan instance, device and graphics queue.
//!
//! Threading rules
//! - Window and surface creation, size queries, platform-window updates and
//!   window destruction run on the event-loop thread through
//!   [`dear_main_thread`] jobs.
//! - Dear ImGui has one global current context; [`gate::WindowContext`]
//!   serialises activation across threads.
//! - Queue submission and presentation hold [`vulkan::SharedVulkan::lock_queue`].
//!
//! Quickstart
//! ```no_run
//! use dear_threaded_ash::{RunnerConfig, run};
//!
//! fn main() {
//!     dear_threaded_ash::logging::init_tracing();
//!     let config = RunnerConfig {
//!         window_count: 2,
//!         ..Default::default()
//!     };
//!     run(config).unwrap();
//! }
//! ```

pub mod app;
pub mod config;
pub mod demo_ui;
pub mod error;
pub mod gate;
pub mod logging;
pub mod viewports;
pub mod vulkan;
pub mod window;

pub use app::{EventRouter, MainApp, MainThread, MainThreadEvent, RoutedEvent, run};
pub use config::{PresentPolicy, RunnerConfig};
pub use error::{AppError, AppResult};
