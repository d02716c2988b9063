use crate::pipe::{open_stream, raw};
use rtspawn_core::{
    ExitState, Process, ProcessId, ProcessStreams, Result, SpawnError, StdStream, StreamMode,
};
use std::os::windows::io::{AsHandle, BorrowedHandle, OwnedHandle};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use windows::Win32::Foundation::{WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::System::Threading::{
    GetExitCodeProcess, INFINITE, TerminateProcess, WaitForSingleObject,
};

/// Exit code given to a process stopped by [`Process::terminate`]
pub const TERMINATE_EXIT_CODE: u32 = 1;

/// Control requests understood by [`WindowsProcess::ctl`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowsRequest {
    Nop,
    GetProcId,
    GetExitId,
    /// Raw `GetExitCodeProcess` value
    GetExitCode,
    /// Move the process handle to the caller; waiting and termination are
    /// then the caller's business and [`Process::wait`] fails with
    /// `InvalidArgument`
    TakeProcessHandle,
    /// `TerminateProcess` with a caller chosen exit code
    KillWithExitCode(u32),
}

#[derive(Debug)]
pub enum WindowsReply {
    Done,
    ProcId(ProcessId),
    ExitId(i32),
    ExitCode(u32),
    ProcessHandle(OwnedHandle),
}

/// Handle to a child created by [`crate::spawn`]
#[derive(Debug)]
pub struct WindowsProcess {
    handle: Option<OwnedHandle>,
    pid: ProcessId,
    program: PathBuf,
    stdio: [Option<OwnedHandle>; 3],
    exit_code: Option<u32>,
}

impl WindowsProcess {
    pub(crate) fn new(
        handle: OwnedHandle,
        pid: ProcessId,
        program: PathBuf,
        stdio: [Option<OwnedHandle>; 3],
    ) -> Self {
        Self {
            handle: Some(handle),
            pid,
            program,
            stdio,
            exit_code: None,
        }
    }

    /// Process handle, unless it was moved out with `TakeProcessHandle`
    pub fn process_handle(&self) -> Option<BorrowedHandle<'_>> {
        self.handle.as_ref().map(|h| h.as_handle())
    }

    pub fn exit_code(&self) -> Result<u32> {
        self.exit_code.ok_or(SpawnError::Unfinished)
    }

    /// Stop the process with `code` as its exit code; a no-op once the
    /// process is known to have terminated.
    pub fn kill(&self, code: u32) -> Result<()> {
        if self.exit_code.is_some() {
            return Ok(());
        }
        let Some(handle) = &self.handle else {
            return Ok(());
        };
        unsafe { TerminateProcess(raw(handle), code) }.map_err(|e| {
            info!(pid = self.pid, error = %e, "TerminateProcess failed");
            SpawnError::os(format!("terminating process {}", self.pid), e.into())
        })
    }

    /// Parent-side end of a piped stream, still owned by the handle
    pub fn stdio_handle(&self, stream: StdStream) -> Option<BorrowedHandle<'_>> {
        self.stdio[stream.index()].as_ref().map(|h| h.as_handle())
    }

    pub fn take_handle(&mut self, stream: StdStream) -> Option<OwnedHandle> {
        self.stdio[stream.index()].take()
    }

    /// Move all parent-side stream handles to the caller
    pub fn take_handles(&mut self) -> [Option<OwnedHandle>; 3] {
        std::mem::take(&mut self.stdio)
    }

    /// Move all parent-side stream handles to the caller, wrapped in streams
    pub fn take_streams(&mut self, nonblock: bool) -> Result<ProcessStreams> {
        let mut streams: [Option<_>; 3] = [None, None, None];
        for (stream, handle) in StdStream::ALL.into_iter().zip(self.take_handles()) {
            if let Some(handle) = handle {
                let mode = StreamMode::for_stream(stream, nonblock);
                streams[stream.index()] = Some(open_stream(handle, mode)?);
            }
        }
        Ok(ProcessStreams::from_array(streams))
    }
}

impl Process for WindowsProcess {
    type Request = WindowsRequest;
    type Reply = WindowsReply;

    fn id(&self) -> ProcessId {
        self.pid
    }

    fn program(&self) -> &Path {
        &self.program
    }

    fn is_terminated(&self) -> bool {
        self.exit_code.is_some()
    }

    fn wait(&mut self, block: bool) -> Result<()> {
        if self.exit_code.is_some() {
            return Ok(());
        }
        let Some(handle) = &self.handle else {
            return Err(SpawnError::InvalidArgument(
                "process handle was taken, cannot wait".to_string(),
            ));
        };

        let timeout = if block { INFINITE } else { 0 };
        let event = unsafe { WaitForSingleObject(raw(handle), timeout) };
        if event == WAIT_OBJECT_0 {
            let mut code = 0u32;
            unsafe { GetExitCodeProcess(raw(handle), &mut code) }.map_err(|e| {
                info!(pid = self.pid, error = %e, "GetExitCodeProcess failed");
                SpawnError::os(format!("reading exit code of process {}", self.pid), e.into())
            })?;
            self.exit_code = Some(code);
            Ok(())
        } else if event == WAIT_TIMEOUT {
            Err(SpawnError::Timeout)
        } else if event == WAIT_FAILED {
            let err = SpawnError::last_os_error(format!("waiting for process {}", self.pid));
            info!(pid = self.pid, error = %err, "waiting for process failed");
            Err(err)
        } else {
            Err(SpawnError::General(format!(
                "unexpected wait result {:#x} for process {}",
                event.0, self.pid
            )))
        }
    }

    fn terminate(&mut self) -> Result<()> {
        self.kill(TERMINATE_EXIT_CODE)
    }

    fn exit_state(&self) -> Result<ExitState> {
        Ok(ExitState::Exited(self.exit_code()? as i32))
    }

    fn ctl(&mut self, request: WindowsRequest) -> Result<WindowsReply> {
        match request {
            WindowsRequest::Nop => Ok(WindowsReply::Done),
            WindowsRequest::GetProcId => Ok(WindowsReply::ProcId(self.pid)),
            WindowsRequest::GetExitId => Ok(WindowsReply::ExitId(self.exit_state()?.exit_id())),
            WindowsRequest::GetExitCode => Ok(WindowsReply::ExitCode(self.exit_code()?)),
            WindowsRequest::TakeProcessHandle => self
                .handle
                .take()
                .map(WindowsReply::ProcessHandle)
                .ok_or_else(|| {
                    SpawnError::InvalidArgument("process handle was already taken".to_string())
                }),
            WindowsRequest::KillWithExitCode(code) => self.kill(code).map(|()| WindowsReply::Done),
        }
    }
}

impl Drop for WindowsProcess {
    fn drop(&mut self) {
        if self.exit_code.is_some() || self.handle.is_none() {
            return;
        }
        if let Err(e) = self.terminate() {
            warn!(pid = self.pid, error = %e, "failed to terminate process on release");
        }
        if let Err(e) = self.wait(true) {
            warn!(pid = self.pid, error = %e, "failed to wait for process on release");
        }
    }
}
