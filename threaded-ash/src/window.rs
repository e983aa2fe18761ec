//! One OS window driven by its own thread.
//!
//! The thread owns the window's Dear ImGui context, platform glue, renderer and
//! swapchain. Window and surface creation, size queries, platform-window
//! updates and teardown are handed to the event-loop thread; ImGui calls go
//! through the context gate; queue submission and presentation go through the
//! shared queue lock.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

use ash::vk;
use dear_imgui_ash::{AshRenderer, Options as AshOptions};
use dear_imgui_winit::{HiDpiMode, WinitPlatform};
use dear_main_thread::ActiveGuard;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, error, info, info_span, warn};
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::window::WindowId;
use winit::keyboard::{Key, NamedKey};
use winit::window::Window;

use crate::app::{EventRouter, MainThread, RoutedEvent};
use crate::config::RunnerConfig;
use crate::demo_ui::DemoUi;
use crate::error::{AppError, AppResult};
use crate::gate::WindowContext;
use crate::vulkan::SharedVulkan;
use crate::vulkan::swapchain::{FRAMES_IN_FLIGHT, WindowTarget};
use crate::vulkan::premultiplied_clear;
use crate::viewports;

/// How long a minimised window waits for events before polling its size again.
const MINIMIZED_POLL: Duration = Duration::from_millis(16);

struct OsWindow {
    window: Arc<Window>,
    surface: vk::SurfaceKHR,
}

// Fields drop in declaration order; `release_gui` handles the renderer first.
struct Gui {
    platform: WinitPlatform,
    renderer: AshRenderer,
    context: WindowContext,
    target: WindowTarget,
    demo: DemoUi,
    minimized: bool,
}

/// What a window does after its frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameControl {
    Continue,
    Close,
}

/// Close request carried by a window event, if any.
pub fn requests_close(event: &WindowEvent) -> bool {
    match event {
        WindowEvent::CloseRequested => true,
        WindowEvent::KeyboardInput {
            event:
                KeyEvent {
                    logical_key: Key::Named(NamedKey::Escape),
                    state: ElementState::Pressed,
                    ..
                },
            ..
        } => true,
        _ => false,
    }
}

/// Events reported for the thread's own OS window, as opposed to its
/// platform windows.
fn own_events(pending: &[RoutedEvent], id: WindowId) -> impl Iterator<Item = &WindowEvent> {
    pending
        .iter()
        .filter(move |(window_id, _)| *window_id == id)
        .map(|(_, event)| event)
}

/// Whether the event invalidates the swapchain.
pub fn requires_rebuild(event: &WindowEvent) -> bool {
    matches!(
        event,
        WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. }
    )
}

pub struct ThreadWindow {
    index: usize,
    config: RunnerConfig,
    vulkan: Arc<SharedVulkan>,
    main: MainThread,
    router: EventRouter,
}

impl ThreadWindow {
    pub fn new(
        index: usize,
        config: RunnerConfig,
        vulkan: Arc<SharedVulkan>,
        main: MainThread,
        router: EventRouter,
    ) -> Self {
        Self {
            index,
            config,
            vulkan,
            main,
            router,
        }
    }

    /// Thread body: set up, render until closed, tear down.
    ///
    /// `guard` is released last, after the OS window is gone.
    pub fn run(self, guard: ActiveGuard) -> AppResult<()> {
        let window_no = self.index + 1;
        let _span = info_span!("window", index = window_no).entered();
        info!("Window thread started");

        let (events_tx, events) = mpsc::channel();
        let result = self.full_setup(events_tx).and_then(|(os, mut gui)| {
            let rendered = loop {
                match self.one_frame(&os, &events, &mut gui) {
                    Ok(FrameControl::Continue) => {}
                    Ok(FrameControl::Close) => break Ok(()),
                    Err(AppError::MainThread(e)) => {
                        info!("Event loop gone, closing: {e}");
                        break Ok(());
                    }
                    Err(e) => break Err(e),
                }
            };
            self.release_gui(gui);
            self.close(os);
            rendered
        });

        match &result {
            Ok(()) => info!("Window closed"),
            Err(e) => error!("Window thread stopped: {e}"),
        }
        drop(guard);
        result
    }

    fn full_setup(&self, events: Sender<RoutedEvent>) -> AppResult<(OsWindow, Gui)> {
        let os = self.open_os_window(events)?;
        match self.setup_gui(&os) {
            Ok(gui) => Ok((os, gui)),
            Err(e) => {
                self.close(os);
                Err(e)
            }
        }
    }

    /// Creates the OS window and its surface on the event-loop thread and
    /// registers the window's event channel.
    fn open_os_window(&self, events: Sender<RoutedEvent>) -> AppResult<OsWindow> {
        let title = self.config.title_for(self.index);
        let (width, height) = self.config.window_size;
        let vulkan = self.vulkan.clone();
        let router = self.router.clone();

        let os = self.main.run_sync(move |event_loop| -> AppResult<OsWindow> {
            let attributes = Window::default_attributes()
                .with_title(title)
                .with_inner_size(LogicalSize::new(width, height));
            let window = Arc::new(event_loop.create_window(attributes)?);
            let surface = vulkan.create_surface(
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
            )?;
            router.register(window.id(), events);
            Ok(OsWindow { window, surface })
        })??;
        debug!(id = ?os.window.id(), "OS window created");
        Ok(os)
    }

    fn setup_gui(&self, os: &OsWindow) -> AppResult<Gui> {
        let size = self.framebuffer_size(os)?;
        let target = WindowTarget::new(
            self.vulkan.clone(),
            os.surface,
            self.config.present,
            size.width,
            size.height,
        )?;

        let window = &os.window;
        let flags = self.config.config_flags();
        let ini = self.config.ini_filename_for(self.index);
        let mut platform = None;
        let mut context = WindowContext::new(self.config.title_for(self.index), |ctx| {
            ctx.set_ini_filename(ini)
                .map_err(|e| AppError::Imgui(e.to_string()))?;
            let io = ctx.io_mut();
            io.set_config_flags(io.config_flags() | flags);
            viewports::apply_style(ctx);

            let mut winit_platform = WinitPlatform::new(ctx);
            winit_platform.attach_window(window, HiDpiMode::Default, ctx);
            if viewports::enabled(ctx) {
                viewports::init_platform(ctx, window);
            }
            platform = Some(winit_platform);
            Ok(())
        })?;
        let platform =
            platform.ok_or_else(|| AppError::Imgui("platform was not attached".to_string()))?;

        let vulkan = &self.vulkan;
        let options = AshOptions {
            in_flight_frames: FRAMES_IN_FLIGHT,
            max_textures: self.config.max_textures,
            framebuffer_srgb: false,
            ..Default::default()
        };
        let renderer = context.with_active(|ctx| {
            // Font atlas upload is submitted on the shared queue.
            let queue = vulkan.lock_queue();
            AshRenderer::with_default_allocator(
                vulkan.instance(),
                vulkan.physical_device(),
                vulkan.device().clone(),
                *queue,
                target.command_pool(),
                target.render_pass(),
                ctx,
                Some(options),
            )
        })??;

        debug!(
            format = ?target.surface_format().format,
            present_mode = ?target.present_mode(),
            images = target.image_count(),
            "Window ready"
        );
        Ok(Gui {
            platform,
            renderer,
            context,
            target,
            demo: DemoUi::new(self.index, self.config.clear_color),
            minimized: size.width == 0 || size.height == 0,
        })
    }

    /// Renders one frame. Returns [`FrameControl::Close`] once the window was
    /// asked to close.
    fn one_frame(
        &self,
        os: &OsWindow,
        events: &Receiver<RoutedEvent>,
        gui: &mut Gui,
    ) -> AppResult<FrameControl> {
        let mut pending = Vec::new();
        if gui.minimized {
            match events.recv_timeout(MINIMIZED_POLL) {
                Ok(event) => pending.push(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(FrameControl::Close),
            }
        }
        loop {
            match events.try_recv() {
                Ok(event) => pending.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Ok(FrameControl::Close),
            }
        }

        let id = os.window.id();
        if own_events(&pending, id).any(requests_close) {
            return Ok(FrameControl::Close);
        }
        if own_events(&pending, id).any(requires_rebuild) {
            gui.target.mark_dirty();
        }

        if gui.target.needs_rebuild() {
            let size = self.framebuffer_size(os)?;
            gui.minimized = !gui.target.rebuild(size.width, size.height)?;
        }

        let image = if gui.minimized {
            None
        } else {
            gui.target.acquire()?
        };

        let Gui {
            platform,
            renderer,
            context,
            target,
            demo,
            ..
        } = gui;
        let window = &os.window;
        let vulkan = &self.vulkan;
        let main = &self.main;
        context.with_active(|ctx| -> AppResult<()> {
            let with_viewports = viewports::enabled(ctx);
            for (window_id, event) in pending {
                let event = Event::<()>::WindowEvent { window_id, event };
                if with_viewports {
                    // Also feeds events of this context's platform windows.
                    dear_imgui_winit::multi_viewport::handle_event_with_multi_viewport(
                        platform, ctx, window, &event,
                    );
                } else if window_id == id {
                    platform.handle_event(ctx, window, &event);
                }
            }

            platform.prepare_frame(window, ctx);
            let ui = ctx.frame();
            demo.draw(ui);
            platform.prepare_render_with_ui(ui, window);
            let draw_data = ctx.render();

            if let Some(image) = image {
                target.record(image, demo.clear_color(), |cmd| {
                    // Texture uploads inside `cmd_draw` submit on the shared queue.
                    let _queue = vulkan.lock_queue();
                    renderer.cmd_draw(cmd, draw_data)?;
                    Ok(())
                })?;
            }

            if with_viewports {
                renderer.set_viewport_clear_color(premultiplied_clear(demo.clear_color()));
                viewports::attach_renderer(renderer, ctx, vulkan);
                viewports::update_platform_windows(main, ctx, vulkan)?;
                viewports::render_platform_windows(ctx, vulkan);
            }
            Ok(())
        })??;

        if let Some(image) = image {
            target.submit_and_present(image)?;
        }
        Ok(FrameControl::Continue)
    }

    fn framebuffer_size(&self, os: &OsWindow) -> AppResult<PhysicalSize<u32>> {
        let window = os.window.clone();
        Ok(self.main.run_sync(move |_| window.inner_size())?)
    }

    /// Destroys the platform windows, the renderer and the context while the
    /// gate and queue lock are held, then the swapchain resources.
    fn release_gui(&self, gui: Gui) {
        let Gui {
            platform,
            renderer,
            context: mut imgui,
            target,
            ..
        } = gui;
        let vulkan = &self.vulkan;
        let main = &self.main;

        let mut renderer = Some(renderer);
        if let Err(e) = imgui.with_active(|ctx| {
            if let Some(renderer) = renderer.as_mut()
                && viewports::enabled(ctx)
            {
                viewports::shutdown(main, renderer, ctx, vulkan);
            }
            let _queue = vulkan.lock_queue();
            drop(renderer.take());
        }) {
            warn!("Releasing renderer outside the gate: {e}");
        }
        if let Some(renderer) = renderer.take() {
            let _queue = vulkan.lock_queue();
            drop(renderer);
        }

        drop(platform);
        drop(imgui);
        drop(target);
    }

    /// Unregisters the window's events, destroys its surface and drops the OS
    /// window on the event-loop thread.
    fn close(&self, os: OsWindow) {
        let OsWindow { window, surface } = os;
        let id = window.id();
        let vulkan = self.vulkan.clone();
        let router = self.router.clone();

        let closed = self.main.run_sync(move |_| {
            router.unregister(id);
            vulkan.destroy_surface(surface);
            drop(window);
        });
        if let Err(e) = closed {
            // The event loop is gone; nothing else can use the surface now.
            warn!("Closing window off the event loop: {e}");
            self.router.unregister(id);
            self.vulkan.destroy_surface(surface);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_requests_stop_the_window() {
        assert!(requests_close(&WindowEvent::CloseRequested));
        assert!(!requests_close(&WindowEvent::Focused(false)));
        assert!(!requests_close(&WindowEvent::Resized(PhysicalSize::new(
            10, 10
        ))));
    }

    #[test]
    fn only_the_own_window_can_close_the_thread() {
        let own = WindowId::from(1u64);
        let popup = WindowId::from(9u64);
        let pending = vec![
            (popup, WindowEvent::CloseRequested),
            (own, WindowEvent::Focused(true)),
        ];
        assert!(!own_events(&pending, own).any(requests_close));
        assert_eq!(own_events(&pending, own).count(), 1);

        let pending = vec![(own, WindowEvent::CloseRequested)];
        assert!(own_events(&pending, own).any(requests_close));
    }

    #[test]
    fn size_changes_rebuild_the_swapchain() {
        assert!(requires_rebuild(&WindowEvent::Resized(PhysicalSize::new(
            0, 0
        ))));
        assert!(!requires_rebuild(&WindowEvent::CloseRequested));
        assert!(!requires_rebuild(&WindowEvent::Occluded(true)));
    }
}
