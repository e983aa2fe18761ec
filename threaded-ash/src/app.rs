//! The event-loop side: owns the winit loop, runs jobs queued by window
//! threads and forwards each window's events to the thread that drives it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use dear_main_thread::{ActiveWindows, MainThreadHandle, MainThreadQueue};
use parking_lot::Mutex;
use raw_window_handle::HasDisplayHandle;
use tracing::{debug, error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::{StartCause, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop, EventLoopProxy};
use winit::window::WindowId;

use crate::config::RunnerConfig;
use crate::error::{AppError, AppResult};
use crate::vulkan::SharedVulkan;
use crate::window::ThreadWindow;

/// Handle window threads use to run closures on the event-loop thread.
pub type MainThread = MainThreadHandle<ActiveEventLoop>;

/// User event sent through the loop proxy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MainThreadEvent {
    /// A job was queued or a window thread finished.
    Wake,
}

/// A window event together with the OS window it was reported for.
pub type RoutedEvent = (WindowId, WindowEvent);

/// Maps OS windows to the channel of the thread that owns them.
///
/// Platform windows that ImGui opens for a context are not registered; their
/// events are broadcast and each thread keeps the ones for its own viewports.
#[derive(Clone, Default)]
pub struct EventRouter {
    routes: Arc<Mutex<HashMap<WindowId, Sender<RoutedEvent>>>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: WindowId, events: Sender<RoutedEvent>) {
        self.routes.lock().insert(id, events);
    }

    pub fn unregister(&self, id: WindowId) -> bool {
        self.routes.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: WindowId) -> bool {
        self.routes.lock().contains_key(&id)
    }

    /// Forwards `event` to the owner of `id`; a route whose receiver is gone
    /// is dropped.
    pub fn route(&self, id: WindowId, event: WindowEvent) -> bool {
        let mut routes = self.routes.lock();
        let Some(sender) = routes.get(&id) else {
            return false;
        };
        if sender.send((id, event)).is_ok() {
            return true;
        }
        routes.remove(&id);
        false
    }

    /// Sends `event` to every registered thread. Returns how many got it.
    pub fn broadcast(&self, id: WindowId, event: WindowEvent) -> usize {
        let mut routes = self.routes.lock();
        routes.retain(|_, sender| sender.send((id, event.clone())).is_ok());
        routes.len()
    }

    /// Drops every route. Threads still rendering see their channel
    /// disconnect and close.
    pub fn clear(&self) -> usize {
        let mut routes = self.routes.lock();
        let dropped = routes.len();
        routes.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.routes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("windows", &self.len())
            .finish()
    }
}

struct Worker {
    index: usize,
    handle: JoinHandle<AppResult<()>>,
}

/// State owned by the event-loop thread.
pub struct MainApp {
    config: RunnerConfig,
    queue: MainThreadQueue<ActiveEventLoop>,
    active: ActiveWindows,
    router: EventRouter,
    vulkan: Option<Arc<SharedVulkan>>,
    workers: Vec<Worker>,
    started: bool,
    error: Option<AppError>,
}

impl MainApp {
    pub fn new(config: RunnerConfig, proxy: EventLoopProxy<MainThreadEvent>) -> Self {
        let proxy = Mutex::new(proxy);
        let queue =
            MainThreadQueue::new(move || proxy.lock().send_event(MainThreadEvent::Wake).is_ok());
        let active = ActiveWindows::new(queue.waker());
        Self {
            config,
            queue,
            active,
            router: EventRouter::new(),
            vulkan: None,
            workers: Vec::new(),
            started: false,
            error: None,
        }
    }

    /// Creates the shared device and spawns one thread per window.
    fn start(&mut self, event_loop: &ActiveEventLoop) -> AppResult<()> {
        let display = event_loop.display_handle()?.as_raw();
        let vulkan = Arc::new(SharedVulkan::new(display, &self.config)?);
        self.vulkan = Some(vulkan.clone());

        for index in 0..self.config.window_count {
            // Registered before spawning so the loop cannot see zero windows
            // while a thread is still starting.
            let guard = self.active.register();
            let window = ThreadWindow::new(
                index,
                self.config.clone(),
                vulkan.clone(),
                self.queue.handle(),
                self.router.clone(),
            );
            let handle = thread::Builder::new()
                .name(format!("imgui-window-{}", index + 1))
                .spawn(move || window.run(guard))?;
            self.workers.push(Worker { index, handle });
        }
        info!(windows = self.config.window_count, "Window threads started");
        Ok(())
    }

    fn pump(&mut self, event_loop: &ActiveEventLoop) {
        let ran = self.queue.run_pending(event_loop);
        if ran > 0 {
            debug!(ran, "Ran main-thread jobs");
        }
        if self.started && self.active.is_idle() && !event_loop.exiting() {
            info!("All windows closed");
            event_loop.exit();
        }
    }

    fn disconnect_windows(&self) {
        let dropped = self.router.clear();
        if dropped > 0 {
            debug!(windows = dropped, "Disconnected window threads");
        }
    }

    /// Closes the job queue, joins every window thread and tears down the
    /// device. Returns the first error seen.
    pub fn finish(mut self) -> AppResult<()> {
        self.queue.close();
        self.disconnect_windows();

        let mut first = self.error.take();
        for Worker { index, handle } in self.workers.drain(..) {
            let result = match handle.join() {
                Ok(result) => result,
                Err(_) => Err(AppError::WorkerPanicked(index)),
            };
            if let Err(e) = result {
                error!(window = index + 1, "Window thread failed: {e}");
                first.get_or_insert(e);
            }
        }

        // Last reference once every window thread is gone.
        drop(self.vulkan.take());
        first.map_or(Ok(()), Err)
    }
}

impl ApplicationHandler<MainThreadEvent> for MainApp {
    fn new_events(&mut self, event_loop: &ActiveEventLoop, cause: StartCause) {
        if cause == StartCause::Init {
            event_loop.set_control_flow(ControlFlow::Wait);
        }
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.started {
            return;
        }
        self.started = true;
        if let Err(e) = self.start(event_loop) {
            error!("Failed to start window threads: {e}");
            self.error = Some(e);
            self.queue.close();
            event_loop.exit();
        }
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, _event: MainThreadEvent) {
        self.pump(event_loop);
    }

    fn window_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.router.contains(window_id) {
            self.router.route(window_id, event);
        } else if self.config.viewports_enabled() {
            self.router.broadcast(window_id, event);
        } else {
            debug!(?window_id, "Event for a window without a thread");
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        self.pump(event_loop);
    }

    fn exiting(&mut self, event_loop: &ActiveEventLoop) {
        // Jobs queued between the last pump and exit still need an answer.
        self.queue.run_pending(event_loop);
        if !self.active.is_idle() {
            warn!(
                windows = self.active.count(),
                "Event loop exiting with windows still open"
            );
            self.disconnect_windows();
        }
    }
}

/// Runs the threaded demo until every window is closed.
pub fn run(config: RunnerConfig) -> AppResult<()> {
    config.validate()?;
    let event_loop = EventLoop::<MainThreadEvent>::with_user_event().build()?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = MainApp::new(config, event_loop.create_proxy());
    let ran = event_loop.run_app(&mut app);
    let finished = app.finish();
    ran?;
    finished
}
