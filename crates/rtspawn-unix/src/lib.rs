//! POSIX process launcher built on `fork` and `exec`.

#[cfg(unix)]
mod actions;
#[cfg(unix)]
mod fds;
#[cfg(unix)]
mod pipe;
#[cfg(unix)]
mod process;
#[cfg(unix)]
mod spawn;

#[cfg(unix)]
pub use unix_impl::*;

#[cfg(unix)]
mod unix_impl {
    pub use crate::actions::UnixSpawnActions;
    pub use crate::fds::{FdSweep, close_all_fds, max_fds};
    pub use crate::pipe::{make_pipe, make_pipe_stream, open_stream};
    pub use crate::process::{UnixProcess, UnixReply, UnixRequest, decode_wait_status};
    pub use crate::spawn::{spawn, spawn_detached};
    pub use nix::sys::signal::Signal;
    pub use nix::unistd::Pid;

    use rtspawn_core::{Result, SpawnFlags, Spawner};
    use std::ffi::OsStr;
    use std::path::Path;

    /// [`Spawner`] implementation for POSIX systems
    pub struct UnixSpawner;

    impl Spawner for UnixSpawner {
        type Process = UnixProcess;
        type Actions<'a> = UnixSpawnActions<'a>;

        fn spawn<S: AsRef<OsStr>>(
            program: &Path,
            args: &[S],
            flags: SpawnFlags,
            actions: Option<&mut UnixSpawnActions<'_>>,
        ) -> Result<UnixProcess> {
            spawn(program, args, flags, actions)
        }

        fn spawn_detached<S: AsRef<OsStr>>(
            program: &Path,
            args: &[S],
            flags: SpawnFlags,
            actions: Option<&mut UnixSpawnActions<'_>>,
        ) -> Result<()> {
            spawn_detached(program, args, flags, actions)
        }

        fn platform_name() -> &'static str {
            "Unix"
        }
    }
}
