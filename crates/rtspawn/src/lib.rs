//! Cross-platform child process spawning.
//!
//! The platform launcher (fork/exec on Unix, `CreateProcessW` on Windows)
//! is picked at compile time; the free functions here forward to it.
//! Platform specific extras stay reachable through [`sys`].

mod platform;

pub use platform::*;
pub use rtspawn_core::*;

#[cfg(unix)]
pub use rtspawn_unix as sys;
#[cfg(windows)]
pub use rtspawn_windows as sys;

use std::ffi::OsStr;
use std::path::Path;

/// Start `program` with `args` and return a handle to it
pub fn spawn<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
    flags: SpawnFlags,
    actions: Option<&mut PlatformActions<'_>>,
) -> Result<PlatformProcess> {
    PlatformSpawner::spawn(program, args, flags, actions)
}

/// Start `program`, wait for it and return how it ended
pub fn spawn_and_wait<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
    flags: SpawnFlags,
    actions: Option<&mut PlatformActions<'_>>,
) -> Result<ExitState> {
    PlatformSpawner::spawn_and_wait(program, args, flags, actions)
}

/// Start `program` fully detached from the caller; no handle is returned
pub fn spawn_detached<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
    flags: SpawnFlags,
    actions: Option<&mut PlatformActions<'_>>,
) -> Result<()> {
    PlatformSpawner::spawn_detached(program, args, flags, actions)
}

/// Run `launch` with actions carrying the environment settings of `config`
fn with_config_actions<T>(
    config: &SpawnConfig,
    launch: impl FnOnce(Option<&mut PlatformActions<'_>>) -> Result<T>,
) -> Result<T> {
    let changes = config.env_change_refs();
    let environ = config.environ_refs();
    if changes.is_empty() && environ.is_none() {
        return launch(None);
    }

    let mut actions = PlatformActions::new();
    if !changes.is_empty() {
        actions.set_env_changes(&changes);
    }
    if let Some(environ) = &environ {
        actions.set_environ(environ);
    }
    launch(Some(&mut actions))
}

/// Spawn the process described by `config`
pub fn spawn_config(config: &SpawnConfig) -> Result<PlatformProcess> {
    config.validate(true)?;
    with_config_actions(config, |actions| {
        spawn(&config.program, &config.args, config.flags, actions)
    })
}

/// Spawn the process described by `config` detached
pub fn spawn_config_detached(config: &SpawnConfig) -> Result<()> {
    config.validate(false)?;
    with_config_actions(config, |actions| {
        spawn_detached(&config.program, &config.args, config.flags, actions)
    })
}
