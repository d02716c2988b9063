use crate::pipe::open_stream;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use rtspawn_core::{
    ExitState, Process, ProcessId, ProcessStreams, Result, SpawnError, StdStream, StreamMode,
};
use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// `waitpid` that retries on `EINTR`; returns the reaped pid (0 while the
/// child still runs under `WNOHANG`) and the raw status
pub(crate) fn waitpid_retry(pid: Pid, options: libc::c_int) -> io::Result<(libc::pid_t, libc::c_int)> {
    let mut status: libc::c_int = 0;
    loop {
        // SAFETY: `status` is a valid out pointer for the duration of the call.
        let ret = unsafe { libc::waitpid(pid.as_raw(), &mut status, options) };
        if ret != -1 {
            return Ok((ret, status));
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Decompose a raw `waitpid` status
pub fn decode_wait_status(status: libc::c_int) -> Result<ExitState> {
    if libc::WIFEXITED(status) {
        Ok(ExitState::Exited(libc::WEXITSTATUS(status)))
    } else if libc::WIFSIGNALED(status) {
        Ok(ExitState::Signaled(libc::WTERMSIG(status)))
    } else {
        Err(SpawnError::General(format!(
            "wait status {status:#x} is neither an exit nor a signal"
        )))
    }
}

/// Control requests understood by [`UnixProcess::ctl`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnixRequest {
    Nop,
    /// Numeric process id
    GetProcId,
    /// Exit code, or `-1` when the process was killed by a signal
    GetExitId,
    GetPid,
    /// Raw and decomposed wait status
    GetWaitStatus,
    /// Send an arbitrary signal
    Kill(Signal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnixReply {
    Done,
    ProcId(ProcessId),
    ExitId(i32),
    Pid(Pid),
    WaitStatus { raw: libc::c_int, state: ExitState },
}

/// Handle to a child created by [`crate::spawn`]
#[derive(Debug)]
pub struct UnixProcess {
    pid: Pid,
    program: PathBuf,
    stdio: [Option<OwnedFd>; 3],
    /// Raw status, set by the first wait that observes the exit
    wstatus: Option<libc::c_int>,
}

impl UnixProcess {
    pub(crate) fn new(pid: Pid, program: PathBuf, stdio: [Option<OwnedFd>; 3]) -> Self {
        Self {
            pid,
            program,
            stdio,
            wstatus: None,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Raw `waitpid` status of a terminated process
    pub fn raw_status(&self) -> Result<libc::c_int> {
        self.wstatus.ok_or(SpawnError::Unfinished)
    }

    /// Send `signal` to the child.
    ///
    /// Signalling a process that has already been reaped is a no-op: its pid
    /// may belong to someone else by now.
    pub fn kill(&self, signal: Signal) -> Result<()> {
        if self.wstatus.is_some() {
            return Ok(());
        }
        signal::kill(self.pid, signal).map_err(|errno| {
            let context = format!("sending {signal} to process {}", self.pid);
            match errno {
                Errno::EPERM => SpawnError::Forbidden(context),
                errno => SpawnError::os(context, errno.into()),
            }
        })
    }

    /// Parent-side descriptor of a piped stream, still owned by the handle
    pub fn stdio_fd(&self, stream: StdStream) -> Option<BorrowedFd<'_>> {
        self.stdio[stream.index()].as_ref().map(|fd| fd.as_fd())
    }

    /// Move the parent-side descriptor of one stream to the caller
    pub fn take_fd(&mut self, stream: StdStream) -> Option<OwnedFd> {
        self.stdio[stream.index()].take()
    }

    /// Move all parent-side descriptors to the caller
    pub fn take_fds(&mut self) -> [Option<OwnedFd>; 3] {
        std::mem::take(&mut self.stdio)
    }

    /// Move all parent-side descriptors to the caller, wrapped in streams
    pub fn take_streams(&mut self, nonblock: bool) -> Result<ProcessStreams> {
        let mut streams: [Option<_>; 3] = [None, None, None];
        for (stream, fd) in StdStream::ALL.into_iter().zip(self.take_fds()) {
            if let Some(fd) = fd {
                let mode = StreamMode::for_stream(stream, nonblock);
                streams[stream.index()] = Some(open_stream(fd, mode)?);
            }
        }
        Ok(ProcessStreams::from_array(streams))
    }
}

impl Process for UnixProcess {
    type Request = UnixRequest;
    type Reply = UnixReply;

    fn id(&self) -> ProcessId {
        self.pid.as_raw() as ProcessId
    }

    fn program(&self) -> &Path {
        &self.program
    }

    fn is_terminated(&self) -> bool {
        self.wstatus.is_some()
    }

    fn wait(&mut self, block: bool) -> Result<()> {
        if self.wstatus.is_some() {
            return Ok(());
        }

        let options = if block { 0 } else { libc::WNOHANG };
        match waitpid_retry(self.pid, options) {
            Ok((0, _)) => Err(SpawnError::Timeout),
            Ok((_, status)) => {
                self.wstatus = Some(status);
                Ok(())
            }
            Err(e) => {
                info!(pid = self.pid.as_raw(), error = %e, "waiting for process failed");
                Err(SpawnError::os(format!("waiting for process {}", self.pid), e))
            }
        }
    }

    fn terminate(&mut self) -> Result<()> {
        self.kill(Signal::SIGTERM)
    }

    fn exit_state(&self) -> Result<ExitState> {
        decode_wait_status(self.raw_status()?)
    }

    fn ctl(&mut self, request: UnixRequest) -> Result<UnixReply> {
        match request {
            UnixRequest::Nop => Ok(UnixReply::Done),
            UnixRequest::GetProcId => Ok(UnixReply::ProcId(self.id())),
            UnixRequest::GetExitId => Ok(UnixReply::ExitId(self.exit_state()?.exit_id())),
            UnixRequest::GetPid => Ok(UnixReply::Pid(self.pid)),
            UnixRequest::GetWaitStatus => {
                let raw = self.raw_status()?;
                Ok(UnixReply::WaitStatus {
                    raw,
                    state: decode_wait_status(raw)?,
                })
            }
            UnixRequest::Kill(signal) => self.kill(signal).map(|()| UnixReply::Done),
        }
    }
}

impl Drop for UnixProcess {
    fn drop(&mut self) {
        if self.wstatus.is_some() {
            return;
        }
        if let Err(e) = self.terminate() {
            warn!(pid = self.pid.as_raw(), error = %e, "failed to terminate process on release");
        }
        if let Err(e) = self.wait(true) {
            warn!(pid = self.pid.as_raw(), error = %e, "failed to reap process on release");
        }
    }
}
