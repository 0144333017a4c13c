// =============================================================================
// SKYVIEW - Vulkan scene viewer
// =============================================================================
//
// Renders a small fixed scene (three boxes, a chalet, mountain scenery and a
// skybox) and lets you fly around it.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit event loop, input, cameras, frame timing)           │
// │    └── Renderer                                                 │
// │          ├── FrameLoop (swapchain recreation state machine)     │
// │          └── RenderContext (device, static + frame resources)   │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Tick the frame clock, record FPS and the frame log row
// 2. Apply held keys and mouse motion to the camera rig
// 3. Acquire, update uniforms, submit, present
// 4. Wait for the present queue
//
// CONTROLS:
//   WASD   move the free camera          mouse  look around
//   F      free camera                   1-4    fixed viewpoints
//   Esc    quit
//
// =============================================================================

mod assets;
mod backend;
mod camera;
mod config;
mod error;
mod frame_log;
mod input;
mod lifecycle;
mod renderer;
mod scene;

use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{DeviceEvent, DeviceId, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{CursorGrabMode, Window, WindowAttributes, WindowId},
};

use camera::CameraRig;
use config::Config;
use frame_log::{FrameLog, FrameTimer};
use input::InputState;
use lifecycle::FrameOutcome;
use renderer::Renderer;
use scene::FrameUniforms;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> ExitCode {
    init_logging();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();
    log::info!("Starting skyview");
    log::info!(
        "Window: {}x{}, validation {}",
        config.window.width,
        config.window.height,
        if config.validation_enabled() { "on" } else { "off" }
    );

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config)?;
    event_loop.run_app(&mut app).context("Event loop failed")?;

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// RUST_LOG overrides the default level
fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();
    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,

    // ─────────────────────────────────────────────────────────────────────────
    // WINDOW & RENDERER
    // ─────────────────────────────────────────────────────────────────────────
    /// Dropped before the window
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    /// Set while the window has no area; nothing is drawn
    minimized: bool,
    /// Last swapchain generation the camera aspect was taken from
    swapchain_generation: u64,

    // ─────────────────────────────────────────────────────────────────────────
    // INPUT & CAMERAS
    // ─────────────────────────────────────────────────────────────────────────
    rig: CameraRig,
    input: InputState,

    // ─────────────────────────────────────────────────────────────────────────
    // FRAME TIMING
    // ─────────────────────────────────────────────────────────────────────────
    timer: FrameTimer<BufWriter<File>>,
    last_title_update: Instant,

    /// First fatal error; the event loop exits once it is set
    error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Result<Self> {
        let frame_log = if config.debug.frame_log {
            Some(FrameLog::create(&config.debug.frame_log_file)?)
        } else {
            None
        };
        let aspect = config.window.width as f32 / config.window.height.max(1) as f32;

        Ok(Self {
            renderer: None,
            window: None,
            minimized: false,
            swapchain_generation: 0,
            rig: CameraRig::new(aspect),
            input: InputState::default(),
            timer: FrameTimer::new(frame_log),
            last_title_update: Instant::now(),
            error: None,
            config,
        })
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(self.config.window.resizable);

        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .context("Failed to create window")?,
        );

        let renderer = Renderer::new(window.clone(), &self.config)?;
        if let Some(aspect) = renderer.aspect_ratio() {
            self.rig.set_aspect(aspect);
        }
        self.swapchain_generation = renderer.generation();

        grab_cursor(&window);

        self.renderer = Some(renderer);
        self.window = Some(window);
        self.timer.restart();
        Ok(())
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    fn redraw(&mut self) -> Result<()> {
        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref()) else {
            return Ok(());
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Timing, one sample per loop iteration
        // ─────────────────────────────────────────────────────────────────────
        let (frame_time, fps) = self.timer.sample()?;

        if self.minimized {
            return Ok(());
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Move the cameras
        // ─────────────────────────────────────────────────────────────────────
        self.input.apply(
            &mut self.rig,
            &self.config.camera,
            window.inner_size().width,
            frame_time,
        );

        let camera = self.rig.active_camera();
        let uniforms = FrameUniforms {
            view: camera.view(),
            projection: camera.projection(),
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Draw
        // ─────────────────────────────────────────────────────────────────────
        let outcome = renderer.draw_frame(&uniforms)?;

        // New swapchain, possibly a new shape
        if renderer.generation() != self.swapchain_generation {
            self.swapchain_generation = renderer.generation();
            if let Some(aspect) = renderer.aspect_ratio() {
                self.rig.set_aspect(aspect);
            }
        }

        if outcome == FrameOutcome::Skipped {
            return Ok(());
        }

        // Update title every second
        if self.config.debug.show_fps && self.last_title_update.elapsed().as_secs_f32() >= 1.0 {
            window.set_title(&format!(
                "{} - {:.0} FPS ({:.2}ms)",
                self.config.window.title,
                fps,
                frame_time * 1000.0
            ));
            self.last_title_update = Instant::now();
        }

        Ok(())
    }
}

/// Keep the pointer inside the window and hide it. Not every platform
/// supports both grab modes, so failure only warns.
fn grab_cursor(window: &Window) {
    let grabbed = window
        .set_cursor_grab(CursorGrabMode::Confined)
        .or_else(|_| window.set_cursor_grab(CursorGrabMode::Locked));
    if let Err(e) = grabbed {
        log::warn!("Could not grab cursor: {}", e);
    }
    window.set_cursor_visible(false);
}

fn release_cursor(window: &Window) {
    if let Err(e) = window.set_cursor_grab(CursorGrabMode::None) {
        log::warn!("Could not release cursor: {}", e);
    }
    window.set_cursor_visible(true);
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

        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e.context("Failed to initialize renderer"));
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                let minimized = size.width == 0 || size.height == 0;
                if self.minimized && !minimized {
                    // Time spent minimized must not reach the camera
                    self.timer.restart();
                }
                self.minimized = minimized;
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.notify_resized();
                }
            }

            WindowEvent::Focused(focused) => {
                if let Some(ref window) = self.window {
                    if focused {
                        grab_cursor(window);
                    } else {
                        release_cursor(window);
                    }
                }
                // Key releases that happen elsewhere never reach us
                if !focused {
                    self.input.clear();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    if key == KeyCode::Escape && event.state.is_pressed() {
                        log::info!("ESC pressed, exiting...");
                        event_loop.exit();
                    } else {
                        self.input.key(key, event.state.is_pressed());
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e);
                }
            }

            _ => {}
        }
    }

    /// Raw motion keeps working while the cursor is grabbed
    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _id: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta: (dx, dy) } = event {
            self.input.mouse_moved(dx, dy);
        }
    }

    /// Request continuous redraws for maximum FPS.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Vulkan objects go while the window still exists
        self.renderer = None;

        if let Err(e) = self.timer.flush() {
            log::warn!("{:#}", e);
        }
    }
}
