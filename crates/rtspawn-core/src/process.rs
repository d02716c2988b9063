use crate::error::{Result, SpawnError};
use crate::flags::SpawnFlags;
use std::ffi::OsStr;
use std::path::Path;

/// Numeric identifier of a process
pub type ProcessId = u32;

/// Decomposed termination status of a child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    /// Process exited normally with the given exit code
    Exited(i32),
    /// Process was killed by the given signal (POSIX only)
    Signaled(i32),
}

impl ExitState {
    pub fn success(&self) -> bool {
        matches!(self, ExitState::Exited(0))
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitState::Exited(code) => Some(*code),
            ExitState::Signaled(_) => None,
        }
    }

    pub fn signal(&self) -> Option<i32> {
        match self {
            ExitState::Signaled(sig) => Some(*sig),
            ExitState::Exited(_) => None,
        }
    }

    /// Exit code if the process exited normally, `-1` otherwise
    pub fn exit_id(&self) -> i32 {
        self.code().unwrap_or(-1)
    }
}

/// Handle to a spawned child process.
///
/// The handle owns the OS process identity and the parent-side ends of any
/// pipes created for it. Dropping a handle whose process has not terminated
/// yet requests termination and blocks until the process is gone, so the
/// abstraction never leaks processes or handles.
pub trait Process {
    /// Platform specific control request
    type Request;
    /// Reply matching a [`Process::Request`]
    type Reply;

    /// Numeric process id
    fn id(&self) -> ProcessId;

    /// Program this process was started from
    fn program(&self) -> &Path;

    /// True once a wait has observed the exit
    fn is_terminated(&self) -> bool;

    /// Wait for the process to exit.
    ///
    /// With `block == false` this polls once and returns
    /// [`SpawnError::Timeout`] while the process is still running. Once the
    /// process has terminated every further call succeeds immediately.
    fn wait(&mut self, block: bool) -> Result<()>;

    /// Ask the process to terminate without waiting for it
    fn terminate(&mut self) -> Result<()>;

    /// Exit status cached by the first successful wait
    fn exit_state(&self) -> Result<ExitState>;

    /// Run a single control request
    fn ctl(&mut self, request: Self::Request) -> Result<Self::Reply>;

    /// Explicit release; same as dropping the handle
    fn release(self)
    where
        Self: Sized,
    {
        drop(self)
    }
}

/// Wait on several processes in order, skipping the ones that already
/// terminated and stopping at the first failure.
pub fn wait_list<'p, P, I>(processes: I, block: bool) -> Result<()>
where
    P: Process + 'p,
    I: IntoIterator<Item = &'p mut P>,
{
    for process in processes {
        if process.is_terminated() {
            continue;
        }
        process.wait(block)?;
    }
    Ok(())
}

/// Platform process launcher
pub trait Spawner {
    type Process: Process;
    type Actions<'a>;

    /// Spawn `program` with `args` and return a handle to it
    fn spawn<S: AsRef<OsStr>>(
        program: &Path,
        args: &[S],
        flags: SpawnFlags,
        actions: Option<&mut Self::Actions<'_>>,
    ) -> Result<Self::Process>;

    /// Spawn a fire-and-forget process; no handle is returned
    fn spawn_detached<S: AsRef<OsStr>>(
        program: &Path,
        args: &[S],
        flags: SpawnFlags,
        actions: Option<&mut Self::Actions<'_>>,
    ) -> Result<()>;

    /// Spawn, block until the child exits and return only its status
    fn spawn_and_wait<S: AsRef<OsStr>>(
        program: &Path,
        args: &[S],
        flags: SpawnFlags,
        actions: Option<&mut Self::Actions<'_>>,
    ) -> Result<ExitState> {
        if flags.is_detached() {
            return Err(SpawnError::InvalidArgument(
                "use spawn_detached for detached processes".to_string(),
            ));
        }
        let mut process = Self::spawn(program, args, flags, actions)?;
        process.wait(true)?;
        process.exit_state()
    }

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}

/// Reject an empty program before any resource is allocated
pub fn validate_program(program: &Path) -> Result<()> {
    if program.as_os_str().is_empty() {
        return Err(SpawnError::InvalidArgument(
            "program name is required".to_string(),
        ));
    }
    Ok(())
}
