// SPDX-License-Identifier: GPL-3.0-only

//! Dedicated thread running camera callbacks in order

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::errors::CameraError;

type Job = Box<dyn FnOnce() + Send>;

enum Message {
    Run(Job),
    Quit,
}

/// Cloneable entry point for posting work to a [`BackgroundWorker`]
#[derive(Clone)]
pub struct WorkerHandle {
    sender: Sender<Message>,
}

impl WorkerHandle {
    /// Queue `job`; `false` once the worker has quit
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.sender.send(Message::Run(Box::new(job))).is_ok()
    }
}

/// A named thread draining a job queue.
///
/// Jobs run one at a time in posting order. [`quit_safely`](Self::quit_safely)
/// lets every job posted before it finish, then joins the thread.
pub struct BackgroundWorker {
    name: String,
    handle: WorkerHandle,
    thread: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    pub fn start(name: &str) -> Result<Self, CameraError> {
        let (sender, receiver) = mpsc::channel();
        let thread_name = name.to_string();
        let thread = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run(&thread_name, receiver))
            .map_err(|e| CameraError::Backend(format!("failed to start {}: {}", name, e)))?;

        info!(name, "Background worker started");
        Ok(Self {
            name: name.to_string(),
            handle: WorkerHandle { sender },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.handle.post(job)
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Finish queued jobs, then stop and join the thread
    pub fn quit_safely(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.handle.sender.send(Message::Quit).is_err() {
            debug!(name = %self.name, "Worker already gone");
        }
        if thread.join().is_err() {
            warn!(name = %self.name, "Background worker panicked");
        } else {
            info!(name = %self.name, "Background worker stopped");
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.quit_safely();
    }
}

fn run(name: &str, receiver: Receiver<Message>) {
    debug!(name, "Background worker running");
    for message in receiver {
        match message {
            Message::Run(job) => job(),
            Message::Quit => break,
        }
    }
    debug!(name, "Background worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_jobs_run_in_order_before_quit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut worker = BackgroundWorker::start("test-worker").unwrap();
        for i in 0..5 {
            let log = Arc::clone(&log);
            assert!(worker.post(move || {
                thread::sleep(Duration::from_millis(2));
                log.lock().unwrap().push(i);
            }));
        }
        worker.quit_safely();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(!worker.is_running());
    }

    #[test]
    fn test_post_after_quit_is_rejected() {
        let mut worker = BackgroundWorker::start("test-worker").unwrap();
        let handle = worker.handle();
        worker.quit_safely();
        assert!(!handle.post(|| {}));
    }

    #[test]
    fn test_jobs_run_on_named_thread() {
        let seen = Arc::new(Mutex::new(None));
        let mut worker = BackgroundWorker::start("named-worker").unwrap();
        let sink = Arc::clone(&seen);
        worker.post(move || {
            *sink.lock().unwrap() = thread::current().name().map(str::to_string);
        });
        worker.quit_safely();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("named-worker"));
    }
}
