// SPDX-License-Identifier: MPL-2.0

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-env-changed=EDGE_VIEWER_VERSION");

    // Packagers may pin the version explicitly
    let version = match std::env::var("EDGE_VIEWER_VERSION") {
        Ok(v) if !v.is_empty() => v,
        _ => describe_version(),
    };

    println!("cargo::rustc-env=EDGE_VIEWER_VERSION={}", version);
}

/// Crate version with the short commit hash appended when building from git
fn describe_version() -> String {
    let base = env!("CARGO_PKG_VERSION");
    match short_commit_hash() {
        Some(hash) => format!("{}-{}", base, hash),
        None => base.to_string(),
    }
}

fn short_commit_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;

    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}
