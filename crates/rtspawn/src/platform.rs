//! Compile-time selection of the platform launcher.

use rtspawn_core::Spawner;

#[cfg(unix)]
pub use rtspawn_unix::{make_pipe, make_pipe_stream, open_stream};
#[cfg(windows)]
pub use rtspawn_windows::{make_pipe, make_pipe_stream, open_stream};

/// Launcher for the platform this crate was built for
#[cfg(unix)]
pub type PlatformSpawner = rtspawn_unix::UnixSpawner;
#[cfg(windows)]
pub type PlatformSpawner = rtspawn_windows::WindowsSpawner;

#[cfg(not(any(unix, windows)))]
compile_error!("Unsupported platform: only Unix and Windows are currently supported");

#[cfg(unix)]
pub type PlatformProcess = rtspawn_unix::UnixProcess;
#[cfg(windows)]
pub type PlatformProcess = rtspawn_windows::WindowsProcess;

#[cfg(unix)]
pub type PlatformActions<'a> = rtspawn_unix::UnixSpawnActions<'a>;
#[cfg(windows)]
pub type PlatformActions<'a> = rtspawn_windows::WindowsSpawnActions<'a>;

/// Owned pipe end handed out by [`make_pipe`]
#[cfg(unix)]
pub type PipeEnd = std::os::fd::OwnedFd;
#[cfg(windows)]
pub type PipeEnd = std::os::windows::io::OwnedHandle;

pub fn platform_name() -> &'static str {
    PlatformSpawner::platform_name()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_name() {
        #[cfg(unix)]
        assert_eq!(platform_name(), "Unix");
        #[cfg(windows)]
        assert_eq!(platform_name(), "Windows");
    }
}
