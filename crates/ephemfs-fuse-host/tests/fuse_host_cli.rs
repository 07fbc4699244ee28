// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The binary's argument handling, exercised without mounting anything.

use std::process::Command;

fn host() -> Command {
    Command::new(env!("CARGO_BIN_EXE_ephemfs-fuse-host"))
}

#[test]
fn help_succeeds_without_mounting() {
    let output = host().arg("--help").output().expect("able to execute ephemfs-fuse-host");
    assert!(output.status.success(), "--help should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("MOUNT_POINT"), "{stdout}");
}

#[test]
fn missing_mount_point_exits_with_one() {
    let output = host().output().expect("able to execute ephemfs-fuse-host");
    assert_eq!(output.status.code(), Some(1));
    assert!(!output.stderr.is_empty(), "usage goes to stderr");
}

#[test]
fn extra_arguments_exit_with_one() {
    let output = host().args(["/tmp/a", "/tmp/b"]).output().expect("able to execute ephemfs-fuse-host");
    assert_eq!(output.status.code(), Some(1));
}
