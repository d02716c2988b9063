#![cfg(target_os = "linux")]

//! Counts the descriptors of the test process, so it needs a test binary of
//! its own.

use rtspawn_core::{ErrorCode, SpawnFlags};
use rtspawn_unix::{UnixSpawnActions, spawn, spawn_detached};
use std::path::Path;

fn open_fd_count() -> usize {
    std::fs::read_dir("/proc/self/fd")
        .map(|dir| dir.count())
        .unwrap_or_default()
}

/// Test that rejected launches do not leave descriptors behind
#[test]
fn test_rejected_spawns_leak_nothing() {
    let sh = Path::new("/bin/sh");
    let args = ["-c", "true"];
    let before = open_fd_count();

    let err = spawn(sh, &args, SpawnFlags::DETACHED | SpawnFlags::STDOUT_PIPE, None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidFlag);

    let err = spawn(sh, &args, SpawnFlags::DETACHED, None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let err = spawn_detached(sh, &args, SpawnFlags::STDERR_KEEP, None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidFlag);

    let environ = ["NO_VALUE"];
    let mut actions = UnixSpawnActions::new();
    actions.set_environ(&environ);
    let flags = SpawnFlags::STDIN_PIPE | SpawnFlags::STDOUT_PIPE | SpawnFlags::STDERR_PIPE;
    let err = spawn(sh, &args, flags, Some(&mut actions)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let err = spawn(sh, &["bad\0arg"], flags, None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    assert_eq!(open_fd_count(), before);
}
