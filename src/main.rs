// =============================================================================
// WEAVE RENDERER - winit front end for the frame core
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (window, input)                               │
// │    └── FrameLoop (Running / Minimized / ResizePending / Quit)   │
// │          └── Renderer (swapchain manager, frame ring,           │
// │                │       immediate commander, deletion stack)     │
// │                └── VulkanDevice (ash + gpu-allocator)           │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Window events become LoopEvents
// 2. Wait on the current slot's fence, release its transients
// 3. Acquire swapchain image
// 4. Record (BackgroundPass) and submit
// 5. Present, rebuild the swapchain if it went stale
//
// =============================================================================

use std::fs::File;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use ash::vk;
use weave::backend::background::BackgroundPass;
use weave::backend::VulkanDevice;
use weave::config::Config;
use weave::render_loop::{FrameLoop, LoopEvent, LoopState, Step};
use weave::renderer::{Renderer, RendererSettings};
use weave::scene::SceneData;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config)?;
    log::info!("Starting Weave renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    if app.failed {
        anyhow::bail!("renderer stopped after a fatal error");
    }
    Ok(())
}

/// Initialize env_logger from `[debug] log_filter`, `RUST_LOG` wins if set
fn init_logging(config: &Config) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&config.debug.log_filter);
    builder.parse_default_env();

    if config.debug.log_to_file {
        let file = File::create(&config.debug.log_file)
            .with_context(|| format!("Failed to create log file {}", config.debug.log_file))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("Failed to initialize logger")?;
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,

    // Dropped before the window: renderer teardown still needs the surface
    pass: Option<BackgroundPass>,
    renderer: Option<Renderer<VulkanDevice>>,
    frame_loop: FrameLoop,

    started: Instant,
    fps: FpsCounter,
    failed: bool,
}

impl App {
    fn new(config: Config) -> Self {
        let frame_loop = FrameLoop::new(Duration::from_millis(config.frames.minimized_sleep_ms));
        Self {
            is_fullscreen: config.window.fullscreen,
            config,
            window: None,
            pass: None,
            renderer: None,
            frame_loop,
            started: Instant::now(),
            fps: FpsCounter::new(),
            failed: false,
        }
    }

    /// Create device, renderer and the background pass for `window`
    fn init_vulkan(&mut self, window: &Window) -> Result<()> {
        log::info!("Initializing Vulkan...");

        // Enable validation layers based on config (and debug build)
        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let device = VulkanDevice::new(
            window,
            &self.config.window.title,
            enable_validation,
            self.config.get_present_mode(),
        )?;

        let size = window.inner_size();
        let settings = RendererSettings::from_config(
            &self.config,
            vk::Extent2D {
                width: size.width,
                height: size.height,
            },
        );
        let mut renderer = Renderer::new(device, &settings).context("Failed to create renderer")?;
        let pass = BackgroundPass::new(&mut renderer, self.config.graphics.clear_color)
            .context("Failed to create background pass")?;

        self.renderer = Some(renderer);
        self.pass = Some(pass);

        log::info!("Vulkan initialized successfully!");
        Ok(())
    }

    /// Run one loop iteration and act on its result
    fn tick(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(renderer), Some(pass)) = (self.renderer.as_mut(), self.pass.as_mut()) else {
            return;
        };

        let extent = renderer.swapchain().extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let scene = SceneData::orbit(self.started.elapsed().as_secs_f32() * 0.5, aspect, 5.0);

        match self.frame_loop.step(renderer, pass, &scene) {
            Ok(Step::Drew) => self.update_fps(),
            Ok(Step::Skipped) | Ok(Step::Recreated) => {}
            Ok(Step::Idle(duration)) => {
                event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + duration));
            }
            Ok(Step::Exit) => {
                renderer.shutdown();
                event_loop.exit();
            }
            Err(err) => {
                log::error!("Fatal render error: {}", err);
                renderer.shutdown();
                self.failed = true;
                event_loop.exit();
            }
        }
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            self.frame_loop.request_resize();
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        if let Some((fps, frame_ms)) = self.fps.frame(Instant::now()) {
            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title, fps, frame_ms, mode
                ));
            }
        }
    }
}

/// Frame counter that reports once per second
struct FpsCounter {
    frame_count: u32,
    last_frame_time: Instant,
    last_report: Instant,
}

impl FpsCounter {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            frame_count: 0,
            last_frame_time: now,
            last_report: now,
        }
    }

    /// Count a frame; returns (fps, last frame ms) when a second has passed
    fn frame(&mut self, now: Instant) -> Option<(f32, f32)> {
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_report).as_secs_f32();
        if elapsed < 1.0 {
            return None;
        }

        let fps = self.frame_count as f32 / elapsed;
        self.frame_count = 0;
        self.last_report = now;
        Some((fps, frame_time * 1000.0))
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

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.failed = true;
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_vulkan(&window) {
            log::error!("Failed to initialize Vulkan: {:?}", e);
            self.failed = true;
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: winit::window::WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.frame_loop.handle_event(LoopEvent::Quit);
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.frame_loop.handle_event(LoopEvent::Resized {
                    width: size.width,
                    height: size.height,
                });
            }

            WindowEvent::Occluded(occluded) => {
                self.frame_loop.handle_event(if occluded {
                    LoopEvent::Minimized
                } else {
                    LoopEvent::Restored
                });
            }

            WindowEvent::RedrawRequested => self.tick(event_loop),

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                self.frame_loop.handle_event(LoopEvent::Quit);
                            }
                            KeyCode::F11 => self.toggle_fullscreen(),
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Drawing states ask for a redraw; the others are stepped directly since
    /// a minimized window gets no redraw events.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        match self.frame_loop.state() {
            LoopState::Minimized | LoopState::ShuttingDown => self.tick(event_loop),
            LoopState::Running | LoopState::ResizePending => {
                event_loop.set_control_flow(ControlFlow::Poll);
                if let Some(ref window) = self.window {
                    window.request_redraw();
                }
            }
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        self.pass = None;
        if let Some(mut renderer) = self.renderer.take() {
            renderer.shutdown();
        }
        log::info!("Cleanup complete");
    }
}
