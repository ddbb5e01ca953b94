use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use lumina::audio::capture::AudioCapture;
use lumina::audio::signal::SignalProcessor;
use lumina::audio::spectrum::SpectrumAnalyzer;
use lumina::cli::Cli;
use lumina::render::gpu::GpuContext;
use lumina::render::pipeline::RenderPipeline;
use lumina::scheduler::PresetScheduler;
use lumina::{config, effects};

struct App {
    title: String,
    width: u32,
    height: u32,

    window: Option<Arc<Window>>,
    gpu: Option<GpuContext>,
    pipeline: Option<RenderPipeline>,

    capture: Option<AudioCapture>,
    analyzer: Option<SpectrumAnalyzer>,
    processor: SignalProcessor,
    scheduler: PresetScheduler,

    last_frame: Instant,
    track_changed: bool,
}

impl App {
    fn new(cli: &Cli) -> Result<Self> {
        let sources = effects::builtin_effects();
        let presets = effects::default_presets();
        for preset in &presets {
            anyhow::ensure!(
                preset.effect < sources.len(),
                "preset '{}' references effect {} but only {} effects exist",
                preset.name,
                preset.effect,
                sources.len()
            );
        }

        let mut scheduler = PresetScheduler::new(presets, cli.cycle, cli.transition)?;
        if let Some(ref wanted) = cli.preset {
            let index = resolve_preset(&scheduler, wanted)?;
            scheduler.force_select(index);
        }

        let capture = if cli.no_audio {
            log::info!("Audio capture disabled; running on a silent signal");
            None
        } else {
            match AudioCapture::new() {
                Ok(capture) => Some(capture),
                Err(err) => {
                    log::warn!("audio capture unavailable: {:#}; running on a silent signal", err);
                    None
                }
            }
        };
        let analyzer = capture
            .as_ref()
            .map(|capture| SpectrumAnalyzer::new(cli.fft_size, capture.sample_rate()));

        Ok(Self {
            title: "lumina".to_string(),
            width: cli.width,
            height: cli.height,
            window: None,
            gpu: None,
            pipeline: None,
            capture,
            analyzer,
            processor: SignalProcessor::new(),
            scheduler,
            last_frame: Instant::now(),
            track_changed: false,
        })
    }

    fn render_frame(&mut self) {
        let Some(gpu) = self.gpu.as_mut() else { return };
        let Some(pipeline) = self.pipeline.as_mut() else { return };

        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32();
        self.last_frame = now;

        if let (Some(capture), Some(analyzer)) = (&self.capture, &mut self.analyzer) {
            analyzer.update(capture);
        }
        let spectrum = self.analyzer.as_ref().map(|a| a.frame());
        self.processor.update(dt, spectrum);
        let signal = self.processor.signal();

        // The scheduler advances on the same clamped delta the signal used.
        let frame = self
            .scheduler
            .update(signal.dt, signal.beat, std::mem::take(&mut self.track_changed));

        // The animation feed a text-overlay layer would consume.
        log::trace!(
            "overlay: time={:.2} energy={:.2} beat={:.2}",
            signal.time,
            signal.energy,
            signal.beat
        );

        let surface_frame = match gpu.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                gpu.resize(gpu.config.width, gpu.config.height);
                return;
            }
            Err(err) => {
                log::error!("failed to acquire the surface frame: {}", err);
                return;
            }
        };
        let view = surface_frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        pipeline.render_frame(&gpu.device, &gpu.queue, signal, &frame, &view);
        surface_frame.present();
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, code: KeyCode) {
        match code {
            KeyCode::Escape => event_loop.exit(),
            KeyCode::ArrowRight => self.scheduler.cycle(1),
            KeyCode::ArrowLeft => self.scheduler.cycle(-1),
            KeyCode::KeyT => {
                // Simulated track change; a host player would also hand the
                // new title/artist to its text overlay here.
                log::info!("track change");
                self.track_changed = true;
            }
            _ => {
                if let Some(index) = digit_index(code) {
                    self.scheduler.force_select(index);
                }
            }
        }
    }
}

impl ApplicationHandler for App {
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title(&self.title)
            .with_inner_size(winit::dpi::LogicalSize::new(self.width, self.height));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("failed to create the window: {}", err);
                event_loop.exit();
                return;
            }
        };

        let gpu = match GpuContext::new(Arc::clone(&window)) {
            Ok(gpu) => gpu,
            Err(err) => {
                log::error!("GPU initialization failed: {}", err);
                event_loop.exit();
                return;
            }
        };

        let pipeline = match RenderPipeline::new(
            &gpu.device,
            gpu.surface_format(),
            gpu.config.width,
            gpu.config.height,
            effects::builtin_effects(),
        ) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                log::error!("render pipeline initialization failed: {}", err);
                event_loop.exit();
                return;
            }
        };

        log::info!("Controls: arrows cycle presets, 1-8 select, T simulates a track change, Esc quits");

        self.window = Some(window);
        self.gpu = Some(gpu);
        self.pipeline = Some(pipeline);
        self.last_frame = Instant::now();
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let (Some(gpu), Some(pipeline)) = (self.gpu.as_mut(), self.pipeline.as_mut()) {
                    gpu.resize(size.width, size.height);
                    pipeline.resize(&gpu.device, size.width, size.height);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        state: ElementState::Pressed,
                        physical_key: PhysicalKey::Code(code),
                        repeat: false,
                        ..
                    },
                ..
            } => self.handle_key(event_loop, code),
            WindowEvent::RedrawRequested => self.render_frame(),
            _ => {}
        }
    }
}

fn digit_index(code: KeyCode) -> Option<usize> {
    match code {
        KeyCode::Digit1 => Some(0),
        KeyCode::Digit2 => Some(1),
        KeyCode::Digit3 => Some(2),
        KeyCode::Digit4 => Some(3),
        KeyCode::Digit5 => Some(4),
        KeyCode::Digit6 => Some(5),
        KeyCode::Digit7 => Some(6),
        KeyCode::Digit8 => Some(7),
        KeyCode::Digit9 => Some(8),
        _ => None,
    }
}

fn resolve_preset(scheduler: &PresetScheduler, wanted: &str) -> Result<usize> {
    if let Ok(index) = wanted.parse::<usize>() {
        anyhow::ensure!(
            index < scheduler.presets().len(),
            "preset index {} out of range (0-{})",
            index,
            scheduler.presets().len() - 1
        );
        return Ok(index);
    }
    scheduler
        .presets()
        .iter()
        .position(|preset| preset.name.eq_ignore_ascii_case(wanted))
        .ok_or_else(|| {
            let names: Vec<&str> = scheduler.presets().iter().map(|p| p.name).collect();
            anyhow::anyhow!("unknown preset '{}'. Available: {:?}", wanted, names)
        })
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect lumina.toml / global config
    let config_path = cli.config.clone().or_else(|| {
        let local = std::path::PathBuf::from("lumina.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("lumina").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    });
    if let Some(ref path) = config_path {
        if let Some(cfg) = config::load_config(path) {
            log::info!("Loaded config from {}", path.display());
            // Merge: config values apply only when CLI is at its default
            if cli.width == 1280 { cli.width = cfg.window.width; }
            if cli.height == 720 { cli.height = cfg.window.height; }
            if cli.cycle == 30.0 { cli.cycle = cfg.scheduler.cycle_seconds; }
            if cli.transition == 2.0 { cli.transition = cfg.scheduler.transition_seconds; }
            if cli.fft_size == 2048 { cli.fft_size = cfg.audio.fft_size; }
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }

    anyhow::ensure!(
        cli.fft_size.is_power_of_two() && cli.fft_size >= 128,
        "fft size must be a power of two >= 128, got {}",
        cli.fft_size
    );

    if cli.list_presets {
        let sources = effects::builtin_effects();
        println!("Built-in presets:");
        for (i, preset) in effects::default_presets().iter().enumerate() {
            println!(
                "  [{}] {:<22} effect={:<8} decay={:.2} zoom={:.3} rotation={:+.2}",
                i,
                preset.name,
                sources[preset.effect].name,
                preset.feedback.decay,
                preset.feedback.zoom,
                preset.feedback.rotation
            );
        }
        return Ok(());
    }

    log::info!("lumina - real-time audio-reactive visual synthesizer");
    log::info!("Window: {}x{}", cli.width, cli.height);
    log::info!(
        "Scheduler: {}s cycle, {}s crossfade",
        cli.cycle,
        cli.transition
    );

    let mut app = App::new(&cli)?;
    let event_loop = EventLoop::new()?;
    event_loop.run_app(&mut app)?;
    Ok(())
}
