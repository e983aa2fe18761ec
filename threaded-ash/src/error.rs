//! Error types for the threaded runner.

use dear_main_thread::MainThreadError;
use thiserror::Error;

/// Result type for runner operations.
pub type AppResult<T> = Result<T, AppError>;

/// Errors that can occur while setting up or driving the windows.
#[derive(Debug, Error)]
pub enum AppError {
    /// Vulkan API error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),

    /// The Vulkan loader library could not be found or loaded.
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// No physical device was reported by the instance.
    #[error("No Vulkan physical device available")]
    NoPhysicalDevice,

    /// The selected device has no queue family with graphics support.
    #[error("No graphics queue family on the selected device")]
    NoGraphicsQueue,

    /// The graphics queue cannot present to a window surface.
    #[error("No WSI support on the selected device/queue family")]
    NoPresentSupport,

    /// Renderer backend error.
    #[error("Renderer error: {0}")]
    Renderer(#[from] dear_imgui_ash::RendererError),

    /// Dear ImGui error.
    #[error("Dear ImGui error: {0}")]
    Imgui(String),

    /// Another Dear ImGui context was active when ours needed to be.
    #[error("Dear ImGui context could not be activated: another context is current")]
    ContextBusy,

    /// Event loop creation or run failure.
    #[error("Event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),

    /// OS window creation failure.
    #[error("Window creation error: {0}")]
    Window(#[from] winit::error::OsError),

    /// Raw window/display handle unavailable.
    #[error("Window handle error: {0}")]
    Handle(#[from] raw_window_handle::HandleError),

    /// Hand-off to the main thread failed.
    #[error("Main thread unavailable: {0}")]
    MainThread(#[from] MainThreadError),

    /// String with an interior NUL passed to Vulkan.
    #[error("Invalid C string: {0}")]
    Nul(#[from] std::ffi::NulError),

    /// Rejected configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A window worker thread could not be spawned.
    #[error("Failed to spawn window thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// A window worker thread panicked.
    #[error("Window worker {0} panicked")]
    WorkerPanicked(usize),
}
