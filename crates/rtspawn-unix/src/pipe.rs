use crate::fds::{set_cloexec, set_nonblocking};
use nix::sys::socket::{AddressFamily, SockFlag, SockType, socketpair};
use rtspawn_core::{PipeDirection, PipeStream, Result, SpawnError, StreamMode};
use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, OwnedFd};
use tracing::info;

/// Pipe with both ends close-on-exec
pub(crate) fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
    #[cfg(not(target_vendor = "apple"))]
    let pair = nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC);
    #[cfg(target_vendor = "apple")]
    let pair = nix::unistd::pipe();

    let (read, write) = pair.map_err(|errno| {
        info!(error = %errno, "error creating a pipe");
        SpawnError::os("error creating a pipe", errno.into())
    })?;

    #[cfg(target_vendor = "apple")]
    {
        set_cloexec(read.as_fd(), true)?;
        set_cloexec(write.as_fd(), true)?;
    }
    Ok((read, write))
}

/// Create a pipe and return `(read, write)`.
///
/// `direction` selects which end a child may inherit; the other end is
/// marked close-on-exec.
pub fn make_pipe(direction: PipeDirection) -> Result<(OwnedFd, OwnedFd)> {
    let (read, write) = cloexec_pipe()?;
    if direction.read_inheritable() {
        set_cloexec(read.as_fd(), false)?;
    }
    if direction.write_inheritable() {
        set_cloexec(write.as_fd(), false)?;
    }
    Ok((read, write))
}

/// Wrap an owned descriptor in a buffered stream
pub fn open_stream(fd: OwnedFd, mode: StreamMode) -> Result<PipeStream> {
    if mode.nonblock {
        set_nonblocking(fd.as_fd())?;
    }
    Ok(PipeStream::new(File::from(fd), mode))
}

/// Create a pipe whose parent-side end is wrapped in a stream.
///
/// Returns the stream and the descriptor meant for the child. An
/// [`PipeDirection::Inbound`] pipe yields a read stream, an
/// [`PipeDirection::Outbound`] pipe a write stream.
pub fn make_pipe_stream(direction: PipeDirection, nonblock: bool) -> Result<(PipeStream, OwnedFd)> {
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

/// Connected pair of local stream sockets, both close-on-exec
pub(crate) fn make_socketpair() -> Result<(OwnedFd, OwnedFd)> {
    let (parent, child) = socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::empty(),
    )
    .map_err(|errno| {
        info!(error = %errno, "error creating a socket pair");
        SpawnError::os("error creating a socket pair", errno.into())
    })?;
    set_cloexec(parent.as_fd(), true)?;
    set_cloexec(child.as_fd(), true)?;
    Ok((parent, child))
}

/// `/dev/null` opened read-only for stdin, write-only otherwise
pub(crate) fn open_null(for_write: bool) -> Result<OwnedFd> {
    OpenOptions::new()
        .read(!for_write)
        .write(for_write)
        .open("/dev/null")
        .map(OwnedFd::from)
        .map_err(|e| SpawnError::os("failed to open '/dev/null'", e))
}
