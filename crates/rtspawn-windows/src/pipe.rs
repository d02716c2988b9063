use rtspawn_core::{PipeDirection, PipeStream, Result, SpawnError, StreamMode};
use std::fs::File;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use tracing::{debug, info};
use windows::Win32::Foundation::{
    DUPLICATE_SAME_ACCESS, DuplicateHandle, GENERIC_READ, GENERIC_WRITE, HANDLE,
    HANDLE_FLAG_INHERIT, HANDLE_FLAGS, SetHandleInformation,
};
use windows::Win32::Security::SECURITY_ATTRIBUTES;
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::Pipes::{
    CreatePipe, PIPE_NOWAIT, PIPE_READMODE_BYTE, SetNamedPipeHandleState,
};
use windows::Win32::System::Threading::GetCurrentProcess;
use windows::core::w;

pub(crate) fn raw(handle: &impl AsRawHandle) -> HANDLE {
    HANDLE(handle.as_raw_handle())
}

/// Take ownership of a handle returned by a successful API call.
///
/// # Safety
///
/// `handle` must be open and owned by nobody else.
pub(crate) unsafe fn owned(handle: HANDLE) -> OwnedHandle {
    unsafe { OwnedHandle::from_raw_handle(handle.0) }
}

/// Security attributes that make a new handle inheritable
pub(crate) fn inheritable_attributes() -> SECURITY_ATTRIBUTES {
    SECURITY_ATTRIBUTES {
        nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: std::ptr::null_mut(),
        bInheritHandle: true.into(),
    }
}

fn clear_inherit(handle: &OwnedHandle) -> Result<()> {
    unsafe { SetHandleInformation(raw(handle), HANDLE_FLAG_INHERIT.0, HANDLE_FLAGS(0)) }
        .map_err(|e| SpawnError::os("SetHandleInformation failed", e.into()))
}

/// Create a pipe and return `(read, write)`.
///
/// Both ends start out inheritable; the end the child must not see loses
/// `HANDLE_FLAG_INHERIT` before the handles are returned.
pub fn make_pipe(direction: PipeDirection) -> Result<(OwnedHandle, OwnedHandle)> {
    let attributes = inheritable_attributes();
    let mut read = HANDLE::default();
    let mut write = HANDLE::default();
    unsafe { CreatePipe(&mut read, &mut write, Some(&attributes as *const _), 0) }.map_err(|e| {
        info!(error = %e, "error creating a pipe");
        SpawnError::os("error creating a pipe", e.into())
    })?;
    // SAFETY: CreatePipe succeeded and handed us both ends.
    let (read, write) = unsafe { (owned(read), owned(write)) };

    if !direction.read_inheritable() {
        clear_inherit(&read)?;
    }
    if !direction.write_inheritable() {
        clear_inherit(&write)?;
    }
    Ok((read, write))
}

/// Wrap an owned pipe end in a buffered stream.
///
/// A non-blocking stream switches the pipe to `PIPE_NOWAIT`, so reads on
/// an empty pipe fail instead of waiting.
pub fn open_stream(handle: OwnedHandle, mode: StreamMode) -> Result<PipeStream> {
    if mode.nonblock {
        let pipe_mode = PIPE_READMODE_BYTE | PIPE_NOWAIT;
        unsafe { SetNamedPipeHandleState(raw(&handle), Some(&pipe_mode as *const _), None, None) }
            .map_err(|e| SpawnError::os("failed to make the pipe non-blocking", e.into()))?;
    }
    Ok(PipeStream::new(File::from(handle), mode))
}

/// Create a pipe whose parent-side end is wrapped in a stream; returns the
/// stream and the inheritable end meant for the child.
pub fn make_pipe_stream(
    direction: PipeDirection,
    nonblock: bool,
) -> Result<(PipeStream, OwnedHandle)> {
    let (read, write) = make_pipe(direction)?;
    let (parent, child, mode) = match direction {
        PipeDirection::Inbound => (read, write, StreamMode::READ),
        PipeDirection::Outbound => (write, read, StreamMode::WRITE),
        PipeDirection::Both => {
            return Err(SpawnError::InvalidArgument(
                "a pipe stream needs an inbound or outbound direction".to_string(),
            ));
        }
    };

    let stream = open_stream(parent, mode.with_nonblock(nonblock)).inspect_err(|e| {
        info!(error = %e, "error creating a stream for a pipe");
    })?;
    Ok((stream, child))
}

/// Inheritable handle to the `nul` device
pub(crate) fn open_null(for_write: bool) -> Result<OwnedHandle> {
    let access = if for_write { GENERIC_WRITE } else { GENERIC_READ };
    let attributes = inheritable_attributes();
    let handle = unsafe {
        CreateFileW(
            w!("nul"),
            access.0,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            Some(&attributes as *const _),
            OPEN_EXISTING,
            FILE_ATTRIBUTE_NORMAL,
            None,
        )
    }
    .map_err(|e| {
        debug!(error = %e, "can't open 'nul'");
        SpawnError::os("failed to open 'nul'", e.into())
    })?;
    // SAFETY: CreateFileW succeeded.
    Ok(unsafe { owned(handle) })
}

/// Inheritable duplicate of `handle` in the current process
pub(crate) fn duplicate_inheritable(handle: HANDLE) -> Result<OwnedHandle> {
    let mut target = HANDLE::default();
    unsafe {
        let process = GetCurrentProcess();
        DuplicateHandle(
            process,
            handle,
            process,
            &mut target,
            0,
            true,
            DUPLICATE_SAME_ACCESS,
        )
    }
    .map_err(|e| SpawnError::os("DuplicateHandle failed", e.into()))?;
    // SAFETY: DuplicateHandle succeeded and the duplicate is ours.
    Ok(unsafe { owned(target) })
}
