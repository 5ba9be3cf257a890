// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! - Listing the cameras of the configured backend
//! - Running the preview pipeline headless and reporting its frame rate

use edge_viewer::app::PreviewApp;
use edge_viewer::backends::camera::create_backend;
use edge_viewer::config::Config;
use edge_viewer::render::format_fps;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// List all cameras of the configured backend
pub fn list_cameras(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let backend = create_backend(config.backend, config.test_pattern_fps);
    let cameras = backend.enumerate_cameras()?;

    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras ({}):", config.backend);
    println!();
    for (index, camera) in cameras.iter().enumerate() {
        let marker = if index == config.camera_index { "*" } else { " " };
        println!("  {}[{}] {}", marker, index, camera.name);
        if !camera.id.is_empty() {
            println!("      Id: {}", camera.id);
        }
        if camera.rotation.degrees() != 0 {
            println!("      Rotation: {}", camera.rotation);
        }
    }
    println!();
    println!("Preview size: {}", config.preview_size());

    Ok(())
}

/// Run the preview pipeline without a display for `seconds`, printing every
/// FPS emission
pub fn bench(config: &Config, seconds: u64) -> Result<(), Box<dyn std::error::Error>> {
    let mut app = PreviewApp::new(config)?;
    println!(
        "Benchmarking {} for {}s ({} mode, {} device)",
        config.backend,
        seconds,
        if config.start_with_edges { "edges" } else { "raw" },
        config.gpu_backend.display_name()
    );
    println!("Press Ctrl+C to stop early");

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    app.resume()?;

    let start = Instant::now();
    let target_duration = Duration::from_secs(seconds);
    while start.elapsed() < target_duration {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }
        if let Some(rate) = app.poll() {
            println!("{}", format_fps(rate));
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    app.poll();

    let stats = app.host_stats();
    let delivered = app.frames_delivered();
    if let Some(status) = app.status() {
        println!("Status: {}", status);
    }
    app.pause()?;

    let elapsed = start.elapsed().as_secs_f64();
    println!();
    println!("Frames delivered: {}", delivered);
    println!("Frames drawn:     {}", stats.drawn);
    println!("Frames skipped:   {}", stats.skipped);
    println!("Empty wakes:      {}", stats.idle);
    if elapsed > 0.0 {
        println!(
            "Average:          {:.2} fps",
            stats.drawn as f64 / elapsed
        );
    }

    Ok(())
}
