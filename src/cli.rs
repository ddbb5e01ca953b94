use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lumina", about = "Real-time audio-reactive visual synthesizer")]
pub struct Cli {
    /// Starting preset (name or index)
    #[arg(short, long)]
    pub preset: Option<String>,

    /// Window width in pixels
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    /// Window height in pixels
    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// Seconds between automatic preset switches
    #[arg(long, default_value_t = 30.0)]
    pub cycle: f32,

    /// Crossfade duration in seconds
    #[arg(long, default_value_t = 2.0)]
    pub transition: f32,

    /// FFT size (power of two)
    #[arg(long, default_value_t = 2048)]
    pub fft_size: usize,

    /// Run without audio capture (all-zero signal)
    #[arg(long)]
    pub no_audio: bool,

    /// List built-in presets and exit
    #[arg(long)]
    pub list_presets: bool,

    /// Config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
