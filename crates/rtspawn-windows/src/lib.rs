//! Windows process launcher built on `CreateProcessW`.
//!
//! Command-line quoting and environment-block encoding do not touch the
//! OS and are available on every platform.

pub mod cmdline;
pub mod env_block;

#[cfg(windows)]
mod actions;
#[cfg(windows)]
mod pipe;
#[cfg(windows)]
mod process;
#[cfg(windows)]
mod spawn;

#[cfg(windows)]
pub use windows_impl::*;

#[cfg(windows)]
mod windows_impl {
    pub use crate::actions::WindowsSpawnActions;
    pub use crate::pipe::{make_pipe, make_pipe_stream, open_stream};
    pub use crate::process::{TERMINATE_EXIT_CODE, WindowsProcess, WindowsReply, WindowsRequest};
    pub use crate::spawn::{MAX_INHERITED_HANDLES, spawn, spawn_detached};

    use rtspawn_core::{Result, SpawnFlags, Spawner};
    use std::ffi::OsStr;
    use std::path::Path;

    /// [`Spawner`] implementation for Windows
    pub struct WindowsSpawner;

    impl Spawner for WindowsSpawner {
        type Process = WindowsProcess;
        type Actions<'a> = WindowsSpawnActions<'a>;

        fn spawn<S: AsRef<OsStr>>(
            program: &Path,
            args: &[S],
            flags: SpawnFlags,
            actions: Option<&mut WindowsSpawnActions<'_>>,
        ) -> Result<WindowsProcess> {
            spawn(program, args, flags, actions)
        }

        fn spawn_detached<S: AsRef<OsStr>>(
            program: &Path,
            args: &[S],
            flags: SpawnFlags,
            actions: Option<&mut WindowsSpawnActions<'_>>,
        ) -> Result<()> {
            spawn_detached(program, args, flags, actions)
        }

        fn platform_name() -> &'static str {
            "Windows"
        }
    }
}
