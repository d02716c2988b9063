use nix::fcntl::{FcntlArg, FdFlag, OFlag, fcntl};
use nix::sys::resource::{Resource, getrlimit};
use nix::unistd::{SysconfVar, sysconf};
use rtspawn_core::{Result, SpawnError};
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};

/// Upper bound used when neither the limits nor `sysconf` give a usable value
const FALLBACK_MAX_FDS: RawFd = 256;

pub(crate) fn set_cloexec(fd: BorrowedFd<'_>, cloexec: bool) -> Result<()> {
    let update = || -> nix::Result<()> {
        let previous = FdFlag::from_bits_retain(fcntl(fd, FcntlArg::F_GETFD)?);
        let mut flags = previous;
        flags.set(FdFlag::FD_CLOEXEC, cloexec);
        if flags != previous {
            fcntl(fd, FcntlArg::F_SETFD(flags))?;
        }
        Ok(())
    };
    update().map_err(|e| {
        SpawnError::os(format!("fcntl(F_SETFD) on fd {}", fd.as_raw_fd()), e.into())
    })
}

pub(crate) fn set_nonblocking(fd: BorrowedFd<'_>) -> Result<()> {
    let update = || -> nix::Result<()> {
        let flags = OFlag::from_bits_retain(fcntl(fd, FcntlArg::F_GETFL)?);
        if !flags.contains(OFlag::O_NONBLOCK) {
            fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
        }
        Ok(())
    };
    update().map_err(|e| {
        SpawnError::os(format!("fcntl(F_SETFL) on fd {}", fd.as_raw_fd()), e.into())
    })
}

/// Number of descriptors a process may have open.
///
/// Tries the hard `RLIMIT_NOFILE` limit, then `sysconf(_SC_OPEN_MAX)`, then
/// a fixed 256. Descriptors above a lowered soft limit stay open, so only
/// the hard limit bounds them. An unlimited or `i32::MAX` limit is treated
/// as bogus.
pub fn max_fds() -> RawFd {
    let usable = |n: RawFd| n > 0 && n != RawFd::MAX;

    getrlimit(Resource::RLIMIT_NOFILE)
        .ok()
        .filter(|(_, hard)| *hard != libc::RLIM_INFINITY)
        .and_then(|(_, hard)| RawFd::try_from(hard).ok())
        .filter(|n| usable(*n))
        .or_else(|| {
            sysconf(SysconfVar::OPEN_MAX)
                .ok()
                .flatten()
                .and_then(|n| RawFd::try_from(n).ok())
                .filter(|n| usable(*n))
        })
        .unwrap_or(FALLBACK_MAX_FDS)
}

/// Highest descriptor currently open, read from `/proc/self/fd`
fn highest_open_fd() -> Option<RawFd> {
    let dir = std::fs::read_dir("/proc/self/fd").ok()?;
    dir.filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse::<RawFd>().ok())
        .max()
}

/// A descriptor sweep planned in the parent and executed in the child.
///
/// Everything that allocates (sorting the exception list, reading
/// `/proc/self/fd`) happens in [`FdSweep::prepare`]; [`FdSweep::run`] only
/// issues `close` calls and is safe to use between `fork` and `exec`.
#[derive(Debug, Clone)]
pub struct FdSweep {
    first: RawFd,
    last: RawFd,
    except: Vec<RawFd>,
}

impl FdSweep {
    pub fn prepare(first: RawFd, except: &[RawFd]) -> Self {
        let mut except = except.to_vec();
        except.sort_unstable();
        except.dedup();

        let last = highest_open_fd().unwrap_or_else(|| max_fds() - 1);
        Self {
            first,
            last,
            except,
        }
    }

    /// Descriptors the sweep leaves open
    pub fn except(&self) -> &[RawFd] {
        &self.except
    }

    /// Close every descriptor from `first` up to the planned bound that is
    /// not in the exception list. Errors from `close` are ignored.
    ///
    /// # Safety
    ///
    /// Closes descriptors that other owners in this process may still use.
    /// Only call this in a freshly forked child or when no other code holds
    /// descriptors in the swept range.
    pub unsafe fn run(&self) {
        let mut fd = self.first;
        while fd <= self.last {
            if self.except.binary_search(&fd).is_err() {
                unsafe {
                    libc::close(fd);
                }
            }
            fd += 1;
        }
    }
}

/// Close all descriptors starting at `first` except the ones listed.
///
/// # Safety
///
/// See [`FdSweep::run`].
pub unsafe fn close_all_fds(first: RawFd, except: &[RawFd]) {
    let sweep = FdSweep::prepare(first, except);
    unsafe { sweep.run() }
}
