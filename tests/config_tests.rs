// SPDX-License-Identifier: MPL-2.0

//! Integration tests for configuration module

use edge_viewer::Config;
use edge_viewer::backends::camera::{CameraBackendType, PreviewSize};
use edge_viewer::gpu::GpuBackendType;

fn temp_config_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir()
        .join(format!("edge-viewer-{}-{}", name, uuid::Uuid::new_v4()))
        .join("config.json")
}

#[test]
fn test_config_default() {
    let config = Config::default();

    assert!(!config.mirror_preview, "Mirror preview is off by default");
    assert!(!config.start_with_edges, "Raw frames are shown first");
    assert_eq!(config.camera_index, 0);
    assert_eq!(config.backend, CameraBackendType::PipeWire);
    assert_eq!(config.gpu_backend, GpuBackendType::Wgpu);
    assert_eq!(config.preview_size(), PreviewSize::new(1280, 720));
    assert_eq!(config.edge_low_threshold, 80.0);
    assert_eq!(config.edge_high_threshold, 100.0);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_round_trip() {
    let path = temp_config_path("round-trip");
    let config = Config {
        backend: CameraBackendType::TestPattern,
        camera_index: 2,
        start_with_edges: true,
        gpu_backend: GpuBackendType::Software,
        ..Config::default()
    };
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path);
    assert_eq!(loaded, config);

    std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
}

#[test]
fn test_missing_config_gives_defaults() {
    let path = temp_config_path("missing");
    assert_eq!(Config::load_from(&path), Config::default());
}

#[test]
fn test_corrupt_config_gives_defaults() {
    let path = temp_config_path("corrupt");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{ not json").unwrap();

    assert_eq!(Config::load_from(&path), Config::default());

    std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
}

#[test]
fn test_partial_config_fills_defaults() {
    let path = temp_config_path("partial");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, r#"{ "start_with_edges": true }"#).unwrap();

    let loaded = Config::load_from(&path);
    assert!(loaded.start_with_edges);
    assert_eq!(loaded.preview_size(), Config::default().preview_size());

    std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
}

#[test]
fn test_config_validation() {
    let empty_preview = Config {
        preview_width: 0,
        ..Config::default()
    };
    assert!(empty_preview.validate().is_err());

    let inverted = Config {
        edge_low_threshold: 120.0,
        edge_high_threshold: 100.0,
        ..Config::default()
    };
    assert!(inverted.validate().is_err());

    let stalled = Config {
        test_pattern_fps: 0,
        ..Config::default()
    };
    assert!(stalled.validate().is_err());
}
