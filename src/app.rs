use anyhow::{Context, Result};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Fullscreen, Window, WindowId};

use crate::config::{AppConfig, AppConfigOverrides};
use crate::input::PointerInput;
use crate::loader::GltfFileLoader;
use crate::renderer::WgpuEngine;
use crate::responsive::ViewportSize;
use crate::viewport::{FrameHandle, FrameScheduler, ViewportSession};

pub const DEFAULT_CONFIG_PATH: &str = "config/app.json";

#[derive(Default)]
struct FrameQueue {
    next: u64,
    pending: Option<FrameHandle>,
    window: Option<Arc<Window>>,
}

/// Frame scheduler backed by `Window::request_redraw`. At most one handle is pending; the
/// app claims it when the matching `RedrawRequested` arrives.
#[derive(Clone, Default)]
pub struct RedrawScheduler {
    queue: Rc<RefCell<FrameQueue>>,
}

impl RedrawScheduler {
    fn bind_window(&self, window: Arc<Window>) {
        self.queue.borrow_mut().window = Some(window);
    }

    fn take_due(&self) -> Option<FrameHandle> {
        self.queue.borrow_mut().pending.take()
    }
}

impl FrameScheduler for RedrawScheduler {
    fn request_frame(&mut self) -> FrameHandle {
        let mut queue = self.queue.borrow_mut();
        queue.next += 1;
        let handle = FrameHandle(queue.next);
        queue.pending = Some(handle);
        if let Some(window) = queue.window.as_ref() {
            window.request_redraw();
        }
        handle
    }

    fn cancel_frame(&mut self, handle: FrameHandle) {
        let mut queue = self.queue.borrow_mut();
        if queue.pending == Some(handle) {
            queue.pending = None;
        }
    }
}

pub async fn run(config: AppConfig) -> Result<()> {
    let event_loop = EventLoop::new().context("Failed to create winit event loop")?;
    event_loop.set_control_flow(ControlFlow::Wait);
    let mut app = App::new(config);
    event_loop.run_app(&mut app).context("Event loop execution failed")?;
    app.finish()
}

pub async fn run_with_overrides(config_path: Option<PathBuf>, overrides: AppConfigOverrides) -> Result<()> {
    let mut config = match config_path {
        Some(path) => AppConfig::load(&path)?,
        None => AppConfig::load_or_default(DEFAULT_CONFIG_PATH),
    };
    if !overrides.is_empty() {
        log::info!("Applying CLI overrides: {}", overrides.applied_fields().join(", "));
    }
    config.apply_overrides(&overrides);
    run(config).await
}

pub struct App {
    config: AppConfig,
    scheduler: RedrawScheduler,
    loader: GltfFileLoader,
    session: Option<ViewportSession<WgpuEngine, RedrawScheduler>>,
    window: Option<Arc<Window>>,
    input: PointerInput,
    fatal: Option<anyhow::Error>,
    should_close: bool,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            scheduler: RedrawScheduler::default(),
            loader: GltfFileLoader::new(),
            session: None,
            window: None,
            input: PointerInput::new(),
            fatal: None,
            should_close: false,
        }
    }

    fn create_window(&self, event_loop: &ActiveEventLoop) -> Option<Arc<Window>> {
        let window_cfg = &self.config.window;
        let mut attrs = Window::default_attributes()
            .with_title(window_cfg.title.clone())
            .with_inner_size(PhysicalSize::new(window_cfg.width, window_cfg.height));
        if window_cfg.fullscreen {
            attrs = attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        match event_loop.create_window(attrs) {
            Ok(window) => Some(Arc::new(window)),
            Err(err) => {
                log::error!("Failed to create window: {err:?}");
                None
            }
        }
    }

    fn shutdown(&mut self) {
        self.should_close = true;
        if let Some(mut session) = self.session.take() {
            let report = session.dispose();
            log::debug!("Shutdown report: {report:?}");
        }
        self.window = None;
    }

    /// Error that ended the event loop, if any.
    pub fn finish(self) -> Result<()> {
        match self.fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.session.is_some() || self.should_close {
            return;
        }
        let window = self.create_window(event_loop);
        if let Some(window) = window.as_ref() {
            self.scheduler.bind_window(window.clone());
        }
        let engine = WgpuEngine::new(self.config.window.vsync);
        let mut session = ViewportSession::new(self.config.clone(), engine, self.scheduler.clone());
        if let Err(err) = session.mount(window.clone(), &mut self.loader) {
            log::error!("Viewport initialization failed: {err:?}");
            self.fatal = Some(err);
            self.should_close = true;
            event_loop.exit();
            return;
        }
        self.window = window;
        self.session = Some(session);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        let Some(window) = self.window.clone() else {
            return;
        };
        if window.id() != id {
            return;
        }
        match &event {
            WindowEvent::CloseRequested => {
                self.shutdown();
                event_loop.exit();
                return;
            }
            WindowEvent::KeyboardInput { event: KeyEvent { logical_key, state, .. }, .. } => {
                if matches!(logical_key, Key::Named(NamedKey::Escape)) && *state == ElementState::Pressed {
                    self.shutdown();
                    event_loop.exit();
                }
                return;
            }
            _ => {}
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match &event {
            WindowEvent::Resized(size) => {
                session.handle_resize(ViewportSize::new(*size, window.scale_factor()));
            }
            WindowEvent::RedrawRequested => {
                if let Some(handle) = self.scheduler.take_due() {
                    session.run_frame(handle);
                }
            }
            _ => {
                if let Some(pointer) = self.input.translate(&event) {
                    session.handle_pointer(&pointer);
                }
            }
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_close {
            event_loop.exit();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}
