// =============================================================================
// VULKAN SAMPLES - triangle, uniform buffer, texture mapping
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (window, close, fixed-rate timer)             │
// │    └── FrameLoop (spin angle, single teardown)                  │
// │          └── Renderer (swapchain, pipeline, buffers, sync)      │
// │                └── DeviceContext (instance, surface, device)    │
// │                      └── Gpu trait -> VulkanGpu (ash)           │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Timer tick fires (tick_hz)
// 2. Acquire swapchain image
// 3. Write the MVP into that image's uniform buffer
// 4. Submit pre-recorded commands, wait on the fence
// 5. Present
//
// =============================================================================

mod assets;
mod backend;
mod config;
mod error;
mod renderer;
mod scene;

use anyhow::{Context, Result};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};
use winit::{
    application::ApplicationHandler,
    event::{StartCause, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowAttributes},
};

use assets::Assets;
use backend::{DeviceOptions, VulkanGpu};
use config::Config;
use renderer::{FrameLoop, LoopEvent, RenderSettings, Renderer};
use scene::Sample;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting Vulkan samples");
    log::info!(
        "Sample: {:?}, window {}x{}, present mode {}, {} frame(s) in flight",
        config.sample.kind,
        config.window.width,
        config.window.height,
        config.graphics.present_mode,
        config.graphics.frames_in_flight
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.setup_error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Initialize logging, optionally redirected into a file so validation
/// messages survive the window closing
fn init_logging(config: &Config) {
    log_builder(config).init();
}

fn log_builder(config: &Config) -> env_logger::Builder {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    // RUST_LOG overrides the default level
    builder.parse_default_env();

    if config.debug.log_to_file {
        match open_log_file(Path::new(&config.debug.log_file)) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            // No logger yet; stderr is the only place left to say so
            Err(e) => eprintln!("Failed to open log file {}: {}; logging to stderr", config.debug.log_file, e),
        }
    }
    builder
}

/// Truncate the log file and write the session banner
fn open_log_file(path: &Path) -> std::io::Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    writeln!(file, "=== Vulkan Samples Log ===")?;
    writeln!(file, "Started: {:?}", SystemTime::now())?;
    writeln!(file)?;
    Ok(file)
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    tick_interval: Duration,
    next_tick: Instant,

    // Dropped in declaration order: the loop (and its GPU) before the window
    frames: Option<FrameLoop<VulkanGpu>>,
    window: Option<Window>,

    /// Reported from `main` once the event loop has exited
    setup_error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        let tick_interval = Duration::from_secs_f64(1.0 / config.graphics.tick_hz.max(1) as f64);
        Self {
            config,
            tick_interval,
            next_tick: Instant::now(),
            frames: None,
            window: None,
            setup_error: None,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_vulkan(&self, window: &Window) -> Result<FrameLoop<VulkanGpu>> {
        let mut gpu = VulkanGpu::load()?;

        let display = window.raw_display_handle();
        let raw_window = window.raw_window_handle();
        let required_extensions = VulkanGpu::required_extensions(display)
            .context("Failed to query window-system instance extensions")?;

        let device_options = DeviceOptions {
            app_name: c"vk-samples",
            required_extensions: &required_extensions,
            debug_messenger: self.config.debug.debug_messenger,
            validation_layers: self.config.debug.validation_layers,
        };

        let renderer = Renderer::new(
            &mut gpu,
            &device_options,
            |gpu, instance| gpu.create_window_surface(instance, display, raw_window),
            Sample::new(self.config.sample.kind),
            &Assets::embedded(),
            &RenderSettings::from_config(&self.config),
        )
        .context("Failed to set up the renderer")?;

        Ok(FrameLoop::new(gpu, renderer))
    }

    fn shutdown(&mut self) {
        if let Some(frames) = self.frames.as_mut() {
            frames.drive([LoopEvent::Shutdown]);
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_resizable(false)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => w,
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.setup_error = Some(e.into());
                event_loop.exit();
                return;
            }
        };

        match self.init_vulkan(&window) {
            Ok(frames) => self.frames = Some(frames),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:?}", e);
                self.setup_error = Some(e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
        self.next_tick = Instant::now() + self.tick_interval;
        event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_tick));
    }

    /// Fixed-rate timer: one frame per elapsed interval
    fn new_events(&mut self, event_loop: &ActiveEventLoop, cause: StartCause) {
        if !matches!(cause, StartCause::ResumeTimeReached { .. }) {
            return;
        }

        let running = self
            .frames
            .as_mut()
            .is_some_and(|frames| frames.drive([LoopEvent::Tick]));
        if !running {
            // Shut down already; stop scheduling ticks
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }

        self.next_tick += self.tick_interval;
        let now = Instant::now();
        if self.next_tick < now {
            // Fell behind; don't try to catch up
            self.next_tick = now + self.tick_interval;
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_tick));
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    self.shutdown();
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}
