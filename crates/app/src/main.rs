//! Subpass - Main Entry Point
//!
//! Opens a window, renders an optional model through the two-subpass
//! deferred-composite renderer and spins it until the window is closed.
//!
//! Usage: `subpass [config.toml]` (defaults to `subpass.toml`).

use std::path::PathBuf;

use anyhow::{Context, Result};
use glam::Mat4;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use subpass_core::{Config, Timer};
use subpass_platform::Window;
use subpass_renderer::{ModelId, Renderer};

const DEFAULT_CONFIG_PATH: &str = "subpass.toml";

/// Model spin, in degrees per second.
const SPIN_DEGREES_PER_SEC: f32 = 10.0;

struct App {
    config: Config,
    // Dropped before the window so the surface goes first.
    renderer: Option<Renderer>,
    window: Option<Window>,
    model: Option<ModelId>,
    angle: f32,
    timer: Timer,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            model: None,
            angle: 0.0,
            timer: Timer::new(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window =
            Window::new(event_loop, &self.config.window).context("Failed to create window")?;
        let mut renderer =
            Renderer::init(&window, &self.config).context("Failed to initialize renderer")?;

        if let Some(path) = &self.config.renderer.model {
            let id = renderer
                .create_model(path)
                .with_context(|| format!("Failed to load model {}", path.display()))?;
            self.model = Some(id);
        }

        self.renderer = Some(renderer);
        self.window = Some(window);
        self.timer = Timer::new();
        Ok(())
    }

    fn frame(&mut self) -> Result<()> {
        let delta = self.timer.delta_secs();
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };

        if let Some(id) = self.model {
            self.angle = (self.angle + SPIN_DEGREES_PER_SEC * delta) % 360.0;
            renderer.update_model(id, Mat4::from_rotation_y(self.angle.to_radians()))?;
        }
        renderer.draw_frame()?;
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(renderer) = self.renderer.take()
            && let Err(e) = renderer.shutdown()
        {
            error!("Renderer shutdown failed: {}", e);
        }
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match self.init(event_loop) {
            Ok(()) => info!("Initialization complete, entering main loop"),
            Err(e) => {
                error!("{:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.frame() {
                    error!("Frame failed: {:#}", e);
                    self.shutdown();
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    subpass_core::init_logging();

    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    info!("Starting subpass ({})", config.window.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
