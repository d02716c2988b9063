use crate::error::{Result, SpawnError};
use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Flags accepted by the process launcher
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct SpawnFlags: u32 {
        const STDIN_PIPE          = 1 << 0;
        const STDOUT_PIPE         = 1 << 1;
        const STDERR_PIPE         = 1 << 2;
        const STDIN_KEEP          = 1 << 3;
        const STDOUT_KEEP         = 1 << 4;
        const STDERR_KEEP         = 1 << 5;
        /// Share one duplex socket between the child's stdin and stdout
        const STDINOUT_SOCKETPAIR = 1 << 6;
        const DETACHED            = 1 << 7;
        /// Windows: create the child without a console window
        const NO_CONSOLE          = 1 << 8;
        /// Windows: let the child take the foreground window
        const ALLOW_SET_FG        = 1 << 9;
        /// POSIX detached spawn: skip the real/effective uid guard
        const NO_EUID_CHECK       = 1 << 10;

        const STDFDS_SETTING = Self::STDIN_PIPE.bits()
            | Self::STDOUT_PIPE.bits()
            | Self::STDERR_PIPE.bits()
            | Self::STDIN_KEEP.bits()
            | Self::STDOUT_KEEP.bits()
            | Self::STDERR_KEEP.bits()
            | Self::STDINOUT_SOCKETPAIR.bits();
    }
}

/// One of the three standard streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdStream {
    Stdin,
    Stdout,
    Stderr,
}

impl StdStream {
    pub const ALL: [StdStream; 3] = [StdStream::Stdin, StdStream::Stdout, StdStream::Stderr];

    /// Conventional descriptor number (0, 1 or 2)
    pub fn index(self) -> usize {
        match self {
            StdStream::Stdin => 0,
            StdStream::Stdout => 1,
            StdStream::Stderr => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StdStream::Stdin => "stdin",
            StdStream::Stdout => "stdout",
            StdStream::Stderr => "stderr",
        }
    }

    /// The child reads from stdin and writes to the other two
    pub fn child_writes(self) -> bool {
        !matches!(self, StdStream::Stdin)
    }
}

/// How the launcher connects one standard stream of the child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioMode {
    /// Connected to the null device
    Null,
    /// Inherits the parent's stream unchanged
    Keep,
    /// Connected to a fresh pipe; the parent keeps the other end
    Pipe,
}

impl SpawnFlags {
    fn pipe_flag(stream: StdStream) -> SpawnFlags {
        match stream {
            StdStream::Stdin => SpawnFlags::STDIN_PIPE,
            StdStream::Stdout => SpawnFlags::STDOUT_PIPE,
            StdStream::Stderr => SpawnFlags::STDERR_PIPE,
        }
    }

    fn keep_flag(stream: StdStream) -> SpawnFlags {
        match stream {
            StdStream::Stdin => SpawnFlags::STDIN_KEEP,
            StdStream::Stdout => SpawnFlags::STDOUT_KEEP,
            StdStream::Stderr => SpawnFlags::STDERR_KEEP,
        }
    }

    pub fn stdio_mode(self, stream: StdStream) -> StdioMode {
        if self.contains(Self::pipe_flag(stream)) {
            StdioMode::Pipe
        } else if self.contains(Self::keep_flag(stream)) {
            StdioMode::Keep
        } else {
            StdioMode::Null
        }
    }

    pub fn is_detached(self) -> bool {
        self.contains(SpawnFlags::DETACHED)
    }

    /// Reject contradictory combinations before any OS resource is touched.
    ///
    /// `want_handle` tells whether the caller expects a process handle back.
    pub fn validate(self, want_handle: bool) -> Result<()> {
        if self.is_detached() {
            if self.intersects(SpawnFlags::STDFDS_SETTING) {
                return Err(SpawnError::InvalidFlag(
                    "DETACHED cannot be combined with stdio flags".to_string(),
                ));
            }
            if want_handle {
                return Err(SpawnError::InvalidArgument(
                    "a detached process has no process handle".to_string(),
                ));
            }
            return Ok(());
        }

        for stream in StdStream::ALL {
            if self.contains(Self::pipe_flag(stream) | Self::keep_flag(stream)) {
                return Err(SpawnError::InvalidFlag(format!(
                    "{} cannot be both piped and kept",
                    stream.name()
                )));
            }
        }

        if self.contains(SpawnFlags::STDINOUT_SOCKETPAIR) {
            let conflicting = SpawnFlags::STDIN_PIPE
                | SpawnFlags::STDIN_KEEP
                | SpawnFlags::STDOUT_PIPE
                | SpawnFlags::STDOUT_KEEP;
            if self.intersects(conflicting) {
                return Err(SpawnError::InvalidFlag(
                    "STDINOUT_SOCKETPAIR already decides stdin and stdout".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    #[test]
    fn test_stdio_modes() {
        let flags = SpawnFlags::STDIN_KEEP | SpawnFlags::STDOUT_PIPE;
        assert_eq!(flags.stdio_mode(StdStream::Stdin), StdioMode::Keep);
        assert_eq!(flags.stdio_mode(StdStream::Stdout), StdioMode::Pipe);
        assert_eq!(flags.stdio_mode(StdStream::Stderr), StdioMode::Null);
    }

    #[test]
    fn test_detached_rejects_stdio_flags() {
        for stdio in SpawnFlags::STDFDS_SETTING.iter() {
            let err = (SpawnFlags::DETACHED | stdio).validate(false).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidFlag);
        }
    }

    #[test]
    fn test_detached_rejects_handle_request() {
        let err = SpawnFlags::DETACHED.validate(true).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(SpawnFlags::DETACHED.validate(false).is_ok());
        assert!(
            (SpawnFlags::DETACHED | SpawnFlags::NO_EUID_CHECK)
                .validate(false)
                .is_ok()
        );
    }

    #[test]
    fn test_pipe_and_keep_conflict() {
        let err = (SpawnFlags::STDERR_PIPE | SpawnFlags::STDERR_KEEP)
            .validate(true)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFlag);

        let err = (SpawnFlags::STDINOUT_SOCKETPAIR | SpawnFlags::STDOUT_PIPE)
            .validate(true)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFlag);

        assert!(
            (SpawnFlags::STDINOUT_SOCKETPAIR | SpawnFlags::STDERR_PIPE)
                .validate(true)
                .is_ok()
        );
    }

    #[test]
    fn test_serialization() {
        let flags = SpawnFlags::STDIN_KEEP | SpawnFlags::STDOUT_PIPE;
        let json = serde_json::to_string(&flags).unwrap();
        let deserialized: SpawnFlags = serde_json::from_str(&json).unwrap();
        assert_eq!(flags, deserialized);
    }
}
