use thiserror::Error;

/// Exit code used by a forked child that failed before reaching `exec`
pub const EXEC_FAILURE_EXIT_CODE: i32 = 127;

/// Portable error codes reported by every fallible spawn operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    General,
    InvalidArgument,
    InvalidFlag,
    InvalidValue,
    TooLarge,
    Forbidden,
    Timeout,
    Unfinished,
    NotSupported,
    /// Operating system failure carrying the raw `errno` / `GetLastError` value
    System(i32),
}

/// Error type for spawn, pipe and process operations
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid flag combination: {0}")]
    InvalidFlag(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Resource limit exceeded: {0}")]
    TooLarge(String),

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Process is still running")]
    Timeout,

    #[error("Process has not terminated yet")]
    Unfinished,

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("{context}: {source}")]
    Os {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unexpected failure: {0}")]
    General(String),
}

pub type Result<T, E = SpawnError> = std::result::Result<T, E>;

impl SpawnError {
    pub fn os(context: impl Into<String>, source: std::io::Error) -> Self {
        SpawnError::Os {
            context: context.into(),
            source,
        }
    }

    /// Capture `errno` / `GetLastError` right after a failed system call
    pub fn last_os_error(context: impl Into<String>) -> Self {
        Self::os(context, std::io::Error::last_os_error())
    }

    pub fn code(&self) -> ErrorCode {
        ErrorCode::from(self)
    }

    /// A non-blocking wait found the process still running
    pub fn is_timeout(&self) -> bool {
        matches!(self, SpawnError::Timeout)
    }

    /// Check if repeating the same call can never succeed
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SpawnError::InvalidArgument(_)
                | SpawnError::InvalidFlag(_)
                | SpawnError::InvalidValue(_)
                | SpawnError::NotSupported(_)
        )
    }
}

impl From<&SpawnError> for ErrorCode {
    fn from(err: &SpawnError) -> Self {
        match err {
            SpawnError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            SpawnError::InvalidFlag(_) => ErrorCode::InvalidFlag,
            SpawnError::InvalidValue(_) => ErrorCode::InvalidValue,
            SpawnError::TooLarge(_) => ErrorCode::TooLarge,
            SpawnError::Forbidden(_) => ErrorCode::Forbidden,
            SpawnError::Timeout => ErrorCode::Timeout,
            SpawnError::Unfinished => ErrorCode::Unfinished,
            SpawnError::NotSupported(_) => ErrorCode::NotSupported,
            SpawnError::Os { source, .. } => match source.raw_os_error() {
                Some(raw) => ErrorCode::System(raw),
                None => ErrorCode::General,
            },
            SpawnError::General(_) => ErrorCode::General,
        }
    }
}

impl From<std::io::Error> for SpawnError {
    fn from(source: std::io::Error) -> Self {
        SpawnError::os("I/O error", source)
    }
}
