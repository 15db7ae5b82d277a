use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use renderer::AdapterPreference;

#[derive(Parser, Debug)]
#[command(
    name = "shadebox",
    author,
    version,
    about = "Headless GLSL sandbox with hot reload and program introspection"
)]
pub struct Cli {
    /// Session file (`shadebox.toml`). Falls back to `./shadebox.toml`, then
    /// the user config directory.
    #[arg(value_name = "CONFIG", env = "SHADEBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Compile and reflect every shader in the session without a GPU, then exit.
    #[arg(long)]
    pub check: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Stop after this many frames (runs until `quit` otherwise).
    #[arg(long, value_name = "COUNT")]
    pub frames: Option<u64>,

    /// Override the off-screen target size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<[u32; 2]>,

    /// Frame rate cap (0=uncapped).
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f32>,

    /// How often watched files are checked for changes (e.g. `250ms`).
    #[arg(long, value_name = "DURATION", value_parser = parse_poll_interval)]
    pub poll_interval: Option<Duration>,

    /// Write the last rendered frame to this PNG path on exit.
    #[arg(long, value_name = "PATH")]
    pub snapshot: Option<PathBuf>,

    /// Do not read commands from stdin.
    #[arg(long)]
    pub no_console: bool,

    /// Adapter selection: `low-power`, `high-performance`, or `fallback`.
    #[arg(
        long,
        value_name = "ADAPTER",
        value_parser = parse_adapter,
        default_value = "low-power"
    )]
    pub adapter: AdapterPreference,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<[u32; 2], String> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width '{}'", w.trim()))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height '{}'", h.trim()))?;
    if width == 0 || height == 0 {
        return Err("size must be non-zero".to_string());
    }
    Ok([width, height])
}

pub fn parse_poll_interval(value: &str) -> Result<Duration, String> {
    let interval = humantime::parse_duration(value.trim())
        .map_err(|err| format!("invalid duration '{}': {err}", value.trim()))?;
    if interval.is_zero() {
        return Err("poll interval must be greater than zero".to_string());
    }
    Ok(interval)
}

pub fn parse_adapter(value: &str) -> Result<AdapterPreference, String> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "low-power" | "low" | "default" => Ok(AdapterPreference::LowPower),
        "high-performance" | "high" | "discrete" => Ok(AdapterPreference::HighPerformance),
        "fallback" | "software" => Ok(AdapterPreference::Fallback),
        other => Err(format!(
            "unknown adapter '{other}'; expected low-power, high-performance, or fallback"
        )),
    }
}
