//! ImGui platform windows ("viewports") for a window thread.
//!
//! Dragging an ImGui window out of its host makes ImGui open an OS window of
//! its own. Creating, moving and destroying those windows needs the event
//! loop, so [`update_platform_windows`] runs on the main thread while the
//! calling thread keeps its context current behind the gate. Rendering them
//! stays on the window thread, on the locked queue.
//!
//! The ash backend keeps one process-wide renderer for its viewport callbacks;
//! [`attach_renderer`] points it at the calling window's renderer and must run
//! under the gate before any call that may reach those callbacks.

use std::sync::Arc;

use dear_imgui_ash::{AshRenderer, multi_viewport as ash_viewports};
use dear_imgui_rs::{ConfigFlags, Context, StyleColor};
use dear_imgui_winit::multi_viewport as winit_viewports;
use tracing::{trace, warn};
use winit::window::Window;

use crate::app::MainThread;
use crate::error::AppResult;
use crate::vulkan::SharedVulkan;

/// Whether the context has platform windows switched on.
pub fn enabled(ctx: &Context) -> bool {
    ctx.io().config_flags().contains(ConfigFlags::VIEWPORTS_ENABLE)
}

/// Square corners and an opaque background, so platform windows look like
/// regular ones. Does nothing while viewports are off.
pub fn apply_style(ctx: &mut Context) {
    if !enabled(ctx) {
        return;
    }
    let style = ctx.style_mut();
    style.set_window_rounding(0.0);
    let [r, g, b, _] = style.color(StyleColor::WindowBg);
    style.set_color(StyleColor::WindowBg, [r, g, b, 1.0]);
}

/// Installs the winit platform callbacks and registers `window` as the main
/// viewport. `window` must outlive the context's platform windows.
pub fn init_platform(ctx: &mut Context, window: &Window) {
    winit_viewports::init_multi_viewport_support(ctx, window);
}

/// Points the backend's viewport callbacks at this window's renderer.
pub fn attach_renderer(renderer: &mut AshRenderer, ctx: &mut Context, vulkan: &SharedVulkan) {
    let queue = *vulkan.lock_queue();
    let family = vulkan.queue_family_index();
    ash_viewports::enable(
        renderer,
        ctx,
        vulkan.entry().clone(),
        vulkan.instance().clone(),
        vulkan.physical_device(),
        queue,
        family,
        family,
    );
}

/// The current context, handed to the main thread for one job.
struct CurrentContext(*mut Context);

// SAFETY: the owning thread holds the gate and blocks in `run_sync` until the
// job that uses the pointer has returned, so the context is never touched by
// two threads at once and outlives the job.
unsafe impl Send for CurrentContext {}

impl CurrentContext {
    // A method, so closures capture the whole wrapper and not the raw field.
    fn get(&self) -> *mut Context {
        self.0
    }
}

/// Creates, moves and destroys the context's platform windows on the main
/// thread. Call under the gate, after [`attach_renderer`].
pub fn update_platform_windows(
    main: &MainThread,
    ctx: &mut Context,
    vulkan: &Arc<SharedVulkan>,
) -> AppResult<()> {
    let current = CurrentContext(ctx);
    let vulkan = vulkan.clone();
    main.run_sync(move |event_loop| {
        let _frame = winit_viewports::set_event_loop_for_frame(event_loop);
        // Swapchain rebuilds inside the backend wait for the device.
        let _queue = vulkan.lock_queue();
        // SAFETY: see `CurrentContext`.
        let ctx = unsafe { &mut *current.get() };
        ctx.update_platform_windows();
    })?;
    trace!("Platform windows updated");
    Ok(())
}

/// Draws and presents every platform window of the context.
pub fn render_platform_windows(ctx: &mut Context, vulkan: &SharedVulkan) {
    let _queue = vulkan.lock_queue();
    ctx.render_platform_windows_default();
}

/// Destroys the context's platform windows and detaches the backend
/// callbacks. Call under the gate before the renderer is dropped.
pub fn shutdown(
    main: &MainThread,
    renderer: &mut AshRenderer,
    ctx: &mut Context,
    vulkan: &Arc<SharedVulkan>,
) {
    attach_renderer(renderer, ctx, vulkan);
    let shared = vulkan.clone();
    let destroyed = main.run_sync(move |_| {
        let _queue = shared.lock_queue();
        winit_viewports::shutdown_multi_viewport_support();
    });
    if let Err(e) = destroyed {
        warn!("Destroying platform windows off the event loop: {e}");
        let _queue = vulkan.lock_queue();
        winit_viewports::shutdown_multi_viewport_support();
    }
    ash_viewports::disable(ctx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::WindowContext;

    fn context_with(flags: ConfigFlags) -> WindowContext {
        WindowContext::new("viewports", move |ctx| {
            let io = ctx.io_mut();
            io.set_config_flags(io.config_flags() | flags);
            Ok(())
        })
        .unwrap()
    }

    #[test]
    fn platform_window_style_is_square_and_opaque() {
        let mut ctx = context_with(ConfigFlags::VIEWPORTS_ENABLE);
        let (rounding, alpha) = ctx
            .with_active(|ctx| {
                ctx.style_mut().set_color(StyleColor::WindowBg, [0.1, 0.2, 0.3, 0.5]);
                apply_style(ctx);
                let style = ctx.style();
                (style.window_rounding(), style.color(StyleColor::WindowBg)[3])
            })
            .unwrap();
        assert_eq!(rounding, 0.0);
        assert_eq!(alpha, 1.0);
    }

    #[test]
    fn style_is_untouched_without_viewports() {
        let mut ctx = context_with(ConfigFlags::DOCKING_ENABLE);
        let (before, after) = ctx
            .with_active(|ctx| {
                ctx.style_mut().set_window_rounding(7.0);
                let before = ctx.style().color(StyleColor::WindowBg);
                apply_style(ctx);
                (before, ctx.style().color(StyleColor::WindowBg))
            })
            .unwrap();
        assert_eq!(before, after);
        assert_eq!(
            ctx.with_active(|ctx| ctx.style().window_rounding()).unwrap(),
            7.0
        );
    }
}
