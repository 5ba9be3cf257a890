// SPDX-License-Identifier: GPL-3.0-only

//! Raw/processed display mode shared between the UI and the render thread

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::constants::labels;

/// What the preview shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessingMode {
    /// Camera frames as captured
    #[default]
    Raw,
    /// Output of the edge detector
    Edges,
}

impl ProcessingMode {
    pub fn toggled(self) -> Self {
        match self {
            ProcessingMode::Raw => ProcessingMode::Edges,
            ProcessingMode::Edges => ProcessingMode::Raw,
        }
    }

    /// Toggle label, naming the action the toggle performs next
    pub fn toggle_label(self) -> &'static str {
        match self {
            ProcessingMode::Raw => labels::SHOW_EDGES,
            ProcessingMode::Edges => labels::SHOW_RAW,
        }
    }

    pub fn is_processed(self) -> bool {
        self == ProcessingMode::Edges
    }
}

/// Single-writer (UI), single-reader (render thread) mode flag.
///
/// The flag only gates behaviour, so a relaxed load per frame is enough.
#[derive(Debug, Clone, Default)]
pub struct ProcessingModeFlag(Arc<AtomicBool>);

impl ProcessingModeFlag {
    pub fn new(mode: ProcessingMode) -> Self {
        Self(Arc::new(AtomicBool::new(mode.is_processed())))
    }

    pub fn get(&self) -> ProcessingMode {
        if self.0.load(Ordering::Relaxed) {
            ProcessingMode::Edges
        } else {
            ProcessingMode::Raw
        }
    }

    pub fn set(&self, mode: ProcessingMode) {
        self.0.store(mode.is_processed(), Ordering::Relaxed);
    }

    /// Flip the mode and return the new one
    pub fn toggle(&self) -> ProcessingMode {
        let previous = self.0.fetch_xor(true, Ordering::Relaxed);
        if previous {
            ProcessingMode::Raw
        } else {
            ProcessingMode::Edges
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_twice_is_identity() {
        for start in [ProcessingMode::Raw, ProcessingMode::Edges] {
            let flag = ProcessingModeFlag::new(start);
            flag.toggle();
            flag.toggle();
            assert_eq!(flag.get(), start);
        }
    }

    #[test]
    fn test_toggle_returns_new_mode() {
        let flag = ProcessingModeFlag::default();
        assert_eq!(flag.get(), ProcessingMode::Raw);
        assert_eq!(flag.toggle(), ProcessingMode::Edges);
        assert_eq!(flag.get(), ProcessingMode::Edges);
    }

    #[test]
    fn test_labels_name_next_action() {
        assert_eq!(ProcessingMode::Raw.toggle_label(), "Show Edges");
        assert_eq!(ProcessingMode::Edges.toggle_label(), "Show Raw");
    }

    #[test]
    fn test_clones_share_state() {
        let ui = ProcessingModeFlag::default();
        let render = ui.clone();
        ui.set(ProcessingMode::Edges);
        assert_eq!(render.get(), ProcessingMode::Edges);
    }
}
