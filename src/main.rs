// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use edge_viewer::backends::camera::CameraBackendType;
use edge_viewer::config::Config;
use edge_viewer::constants::{APP_NAME, VERSION};
use edge_viewer::gpu::GpuBackendType;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser)]
#[command(name = "edge-viewer")]
#[command(about = "Live camera preview with edge detection")]
#[command(version = VERSION)]
#[command(subcommand_required = false)]
struct Cli {
    /// Camera backend: pipewire, v4l2 or test-pattern
    #[arg(short, long, global = true)]
    backend: Option<CameraBackendType>,

    /// Camera index to use (from 'edge-viewer list')
    #[arg(short, long, global = true)]
    camera: Option<usize>,

    /// Render on the CPU instead of the GPU
    #[arg(long, global = true)]
    software: bool,

    /// Start with edge detection enabled
    #[arg(short, long, global = true)]
    edges: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the preview in the terminal (default)
    Terminal,

    /// List available cameras
    List,

    /// Run the pipeline headless and report the frame rate
    Bench {
        /// Benchmark duration in seconds
        #[arg(short, long, default_value = "10")]
        seconds: u64,
    },
}

impl Cli {
    /// Command-line flags override the loaded configuration for this run
    fn apply(&self, config: &mut Config) {
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(camera) = self.camera {
            config.camera_index = camera;
        }
        if self.software {
            config.gpu_backend = GpuBackendType::Software;
        }
        if self.edges {
            config.start_with_edges = true;
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let terminal_mode = matches!(cli.command, None | Some(Commands::Terminal));

    init_logging(terminal_mode);

    let mut config = Config::load();
    cli.apply(&mut config);
    config.validate()?;

    match cli.command {
        None | Some(Commands::Terminal) => edge_viewer::terminal::run(&config),
        Some(Commands::List) => cli::list_cameras(&config),
        Some(Commands::Bench { seconds }) => cli::bench(&config, seconds),
    }
}

/// Initialize logging
///
/// Set RUST_LOG to control the level, e.g. RUST_LOG=edge_viewer=debug. In
/// terminal mode output goes to a log file so it does not tear the UI.
fn init_logging(terminal_mode: bool) {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    if terminal_mode
        && let Some(path) = log_file_path()
        && let Some(file) = open_log_file(&path)
    {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_target(true)
            .with_level(true)
            .with_ansi(false)
            .with_writer(file)
            .init();
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();
}

/// `<state_dir>/edge-viewer/edge-viewer.log`, or the cache dir where there is
/// no state dir
fn log_file_path() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::cache_dir)
        .map(|dir| dir.join(APP_NAME).join(format!("{}.log", APP_NAME)))
}

fn open_log_file(path: &Path) -> Option<std::sync::Mutex<std::fs::File>> {
    let parent = path.parent()?;
    std::fs::create_dir_all(parent).ok()?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .ok()
        .map(std::sync::Mutex::new)
}
