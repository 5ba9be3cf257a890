// SPDX-License-Identifier: GPL-3.0-only

//! Frame-rate accounting for rendered frames

use std::time::{Duration, Instant};

use tracing::debug;

use crate::constants::fps::WINDOW;

/// Turns frame-completion timestamps into a rate, emitted once per window.
///
/// The first frame only seeds the window start. After that every frame is
/// counted, and when at least one window has elapsed since the window start the
/// meter emits `count / elapsed` and starts a new window at that frame.
#[derive(Debug, Clone)]
pub struct FpsMeter {
    window: Duration,
    window_start: Option<Instant>,
    frames: u32,
    last_rate: Option<f64>,
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsMeter {
    pub fn new() -> Self {
        Self::with_window(WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            window_start: None,
            frames: 0,
            last_rate: None,
        }
    }

    /// Record a rendered frame; returns the rate when a window completes
    pub fn on_frame_rendered(&mut self, timestamp: Instant) -> Option<f64> {
        let Some(start) = self.window_start else {
            self.window_start = Some(timestamp);
            return None;
        };

        self.frames += 1;
        let elapsed = timestamp.saturating_duration_since(start);
        if elapsed < self.window {
            return None;
        }

        let rate = self.frames as f64 / elapsed.as_secs_f64();
        debug!(frames = self.frames, rate, "FPS window complete");
        self.frames = 0;
        self.window_start = Some(timestamp);
        self.last_rate = Some(rate);
        Some(rate)
    }

    /// Most recently emitted rate
    pub fn last_rate(&self) -> Option<f64> {
        self.last_rate
    }

    /// Forget the current window; the next frame seeds a new one
    pub fn reset(&mut self) {
        self.window_start = None;
        self.frames = 0;
    }
}

/// Readout text for a rate
pub fn format_fps(rate: f64) -> String {
    format!("FPS: {:.2}", rate)
}
