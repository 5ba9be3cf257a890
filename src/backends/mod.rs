// SPDX-License-Identifier: MPL-2.0

//! Backend abstraction layer for camera capture
//!
//! The backend layer hides how frames are obtained. Everything above it sees
//! a [`camera::CameraBackend`] producing RGBA frames into a preview surface:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              App / Render Layer              │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌──────────────────┐  ┌────────────────┐   │
//! │  │     Camera       │  │  Test pattern  │   │
//! │  │ (PipeWire/V4L2)  │  │  (synthetic)   │   │
//! │  └──────────────────┘  └────────────────┘   │
//! └─────────────────────────────────────────────┘
//! ```

pub mod camera;
