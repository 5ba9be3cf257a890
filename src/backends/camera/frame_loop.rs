// SPDX-License-Identifier: GPL-3.0-only

//! Frame producing threads
//!
//! Synthetic sources run one closure per frame on their own thread. A
//! [`FrameLoop`] owns that thread; once [`FrameLoop::shutdown`] returns the
//! closure has run for the last time, so nothing it produces outlives the
//! session that started it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::errors::CameraError;

/// Longest single sleep while waiting for the next frame slot
const MAX_SLEEP: Duration = Duration::from_millis(20);

/// What the loop body wants next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Stop,
}

pub struct FrameLoop {
    name: String,
    keep_running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FrameLoop {
    /// Run `body` back to back on a thread called `name` until it returns
    /// [`LoopAction::Stop`] or the loop is shut down
    pub fn spawn<F>(name: &str, mut body: F) -> Result<Self, CameraError>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let keep_running = Arc::new(AtomicBool::new(true));
        let running = Arc::clone(&keep_running);
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %thread_name, "Frame loop started");
                while running.load(Ordering::SeqCst) {
                    if body() == LoopAction::Stop {
                        debug!(name = %thread_name, "Frame loop body finished");
                        break;
                    }
                }
                debug!(name = %thread_name, "Frame loop exiting");
            })
            .map_err(|e| CameraError::Backend(format!("failed to spawn {}: {}", name, e)))?;

        info!(name = %name, "Frame loop spawned");
        Ok(Self {
            name: name.to_string(),
            keep_running,
            handle: Some(handle),
        })
    }

    /// Run `body` once per `interval` on a fixed schedule. A late frame
    /// shortens the following wait; one more than an interval late restarts
    /// the schedule.
    pub fn paced<F>(name: &str, interval: Duration, mut body: F) -> Result<Self, CameraError>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let mut due = Instant::now();
        Self::spawn(name, move || {
            let now = Instant::now();
            if now < due {
                thread::sleep((due - now).min(MAX_SLEEP));
                return LoopAction::Continue;
            }
            due += interval;
            if due < now {
                due = now + interval;
            }
            body()
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the thread to stop without waiting for it
    pub fn signal_stop(&self) {
        self.keep_running.store(false, Ordering::SeqCst);
    }

    /// Stop the thread and wait until it has exited
    pub fn shutdown(&mut self) {
        self.signal_stop();
        self.wait();
    }

    /// Wait for the body to finish on its own
    pub fn wait(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.join().is_err() {
            warn!(name = %self.name, "Frame loop panicked");
        } else {
            debug!(name = %self.name, "Frame loop joined");
        }
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
