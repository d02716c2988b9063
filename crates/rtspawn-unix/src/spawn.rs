use crate::actions::UnixSpawnActions;
use crate::fds::FdSweep;
use crate::pipe::{cloexec_pipe, make_socketpair, open_null};
use crate::process::{UnixProcess, waitpid_retry};
use nix::unistd::{AccessFlags, ForkResult, access, fork, geteuid, getuid};
use rtspawn_core::{
    EXEC_FAILURE_EXIT_CODE, Environment, Result, SpawnError, SpawnFlags, StdStream, StdioMode,
    validate_program,
};
use std::ffi::{CString, OsStr};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::raw::c_char;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use tracing::info;

/// NULL-terminated array of C strings that owns its storage
struct CStringArray {
    _owned: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl CStringArray {
    fn new(owned: Vec<CString>) -> Self {
        let mut ptrs: Vec<*const c_char> = owned.iter().map(|s| s.as_ptr()).collect();
        ptrs.push(ptr::null());
        Self {
            _owned: owned,
            ptrs,
        }
    }

    fn as_ptr(&self) -> *const *const c_char {
        self.ptrs.as_ptr()
    }
}

fn to_cstring(bytes: &[u8], what: &str) -> Result<CString> {
    CString::new(bytes).map_err(|_| {
        SpawnError::InvalidArgument(format!("{what} contains an interior NUL byte"))
    })
}

/// Everything `exec` needs, converted before forking
struct ExecPlan {
    path: CString,
    argv: CStringArray,
    envp: Option<CStringArray>,
}

impl ExecPlan {
    fn new<S: AsRef<OsStr>>(
        program: &Path,
        args: &[S],
        actions: Option<&UnixSpawnActions<'_>>,
    ) -> Result<Self> {
        let path = to_cstring(program.as_os_str().as_bytes(), "program path")?;

        let arg0 = program.file_name().unwrap_or(program.as_os_str());
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(to_cstring(arg0.as_bytes(), "program name")?);
        for arg in args {
            argv.push(to_cstring(arg.as_ref().as_bytes(), "argument")?);
        }

        let environment = match actions {
            Some(actions) => actions.env_source()?.resolve(None)?,
            None => None,
        };
        let envp = environment.as_ref().map(env_to_cstrings).transpose()?;

        Ok(Self {
            path,
            argv: CStringArray::new(argv),
            envp,
        })
    }
}

fn env_to_cstrings(env: &Environment) -> Result<CStringArray> {
    env.iter()
        .map(|(name, value)| {
            let mut entry = Vec::with_capacity(name.len() + value.len() + 1);
            entry.extend_from_slice(name.as_bytes());
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            to_cstring(&entry, "environment entry")
        })
        .collect::<Result<Vec<_>>>()
        .map(CStringArray::new)
}

/// Standard stream wiring decided in the parent before forking
struct StdioPlan {
    /// Descriptor each of the child's standard streams is connected to
    targets: [RawFd; 3],
    /// Descriptors opened only for the child; closed in the parent after fork
    child_owned: Vec<OwnedFd>,
    /// Ends the parent keeps
    parent: [Option<OwnedFd>; 3],
}

impl StdioPlan {
    fn prepare(flags: SpawnFlags, actions: Option<&UnixSpawnActions<'_>>) -> Result<Self> {
        let mut plan = StdioPlan {
            targets: [-1; 3],
            child_owned: Vec::new(),
            parent: [None, None, None],
        };

        if flags.contains(SpawnFlags::STDINOUT_SOCKETPAIR) {
            let (parent, child) = make_socketpair()?;
            let reader = parent
                .try_clone()
                .map_err(|e| SpawnError::os("error duplicating a socket", e))?;
            plan.targets[StdStream::Stdin.index()] = child.as_raw_fd();
            plan.targets[StdStream::Stdout.index()] = child.as_raw_fd();
            plan.child_owned.push(child);
            plan.parent[StdStream::Stdin.index()] = Some(parent);
            plan.parent[StdStream::Stdout.index()] = Some(reader);
        }

        for stream in StdStream::ALL {
            let i = stream.index();
            let redirect = actions
                .and_then(|a| a.redirect(stream))
                .map(|fd| fd.as_raw_fd());

            if plan.targets[i] == -1 {
                match flags.stdio_mode(stream) {
                    StdioMode::Pipe => {
                        let (read, write) = cloexec_pipe()?;
                        let (parent, child) = if stream.child_writes() {
                            (read, write)
                        } else {
                            (write, read)
                        };
                        plan.targets[i] = child.as_raw_fd();
                        plan.child_owned.push(child);
                        plan.parent[i] = Some(parent);
                    }
                    StdioMode::Keep => plan.targets[i] = i as RawFd,
                    StdioMode::Null if redirect.is_some() => {}
                    StdioMode::Null => {
                        let null = open_null(stream.child_writes())?;
                        plan.targets[i] = null.as_raw_fd();
                        plan.child_owned.push(null);
                    }
                }
            }

            // The redirect only rewires the child; a requested pipe still
            // hands its parent end out, with the unused child end closed
            // on exec.
            if let Some(fd) = redirect {
                plan.targets[i] = fd;
            }
        }
        Ok(plan)
    }
}

fn inherit_list(actions: Option<&UnixSpawnActions<'_>>) -> Vec<RawFd> {
    actions
        .map(|a| a.inherit().iter().map(|fd| fd.as_raw_fd()).collect())
        .unwrap_or_default()
}

/// Retry `f` while it fails with `EINTR`; returns `false` on any other error
fn retry_eintr(mut f: impl FnMut() -> libc::c_int) -> bool {
    loop {
        if f() != -1 {
            return true;
        }
        if std::io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
            return false;
        }
    }
}

unsafe fn clear_cloexec_raw(fd: RawFd) -> bool {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        flags != -1 && libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) != -1
    }
}

/// Body of the forked child. Never returns.
///
/// Only async-signal-safe calls are made here: everything that allocates was
/// prepared by the parent.
unsafe fn exec_child(
    exec: &ExecPlan,
    mut targets: [RawFd; 3],
    inherit: &[RawFd],
    sweep: &FdSweep,
    atfork: Option<&mut Box<dyn FnMut() + '_>>,
) -> ! {
    unsafe {
        // A source that is itself a standard descriptor would be clobbered
        // by an earlier dup2; move it out of the way first.
        for (i, fd) in targets.iter_mut().enumerate() {
            if (0..=2).contains(&*fd) && *fd != i as RawFd {
                let moved = libc::fcntl(*fd, libc::F_DUPFD_CLOEXEC, 3);
                if moved == -1 {
                    libc::_exit(EXEC_FAILURE_EXIT_CODE);
                }
                *fd = moved;
            }
        }

        for (i, &fd) in targets.iter().enumerate() {
            let target = i as RawFd;
            if fd == target {
                // A standard descriptor the parent has closed stays closed
                clear_cloexec_raw(fd);
            } else if !retry_eintr(|| libc::dup2(fd, target)) {
                libc::_exit(EXEC_FAILURE_EXIT_CODE);
            }
        }

        sweep.run();
        for &fd in inherit.iter().filter(|fd| **fd > 2) {
            if !clear_cloexec_raw(fd) {
                libc::_exit(EXEC_FAILURE_EXIT_CODE);
            }
        }

        libc::signal(libc::SIGPIPE, libc::SIG_DFL);

        if let Some(callback) = atfork {
            callback();
        }

        match &exec.envp {
            Some(envp) => libc::execve(exec.path.as_ptr(), exec.argv.as_ptr(), envp.as_ptr()),
            None => libc::execv(exec.path.as_ptr(), exec.argv.as_ptr()),
        };
        libc::_exit(EXEC_FAILURE_EXIT_CODE)
    }
}

/// Spawn `program` and return a handle to the running child.
///
/// `program` is used as given, no `PATH` search is done. The child's
/// `argv[0]` is the last component of `program`.
pub fn spawn<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
    flags: SpawnFlags,
    actions: Option<&mut UnixSpawnActions<'_>>,
) -> Result<UnixProcess> {
    validate_program(program)?;
    flags.validate(true)?;

    let mut actions = actions;
    let exec = ExecPlan::new(program, args, actions.as_deref())?;
    let stdio = StdioPlan::prepare(flags, actions.as_deref())?;
    let inherit = inherit_list(actions.as_deref());
    let sweep = FdSweep::prepare(3, &inherit);

    // SAFETY: the child only runs `exec_child`, which sticks to
    // async-signal-safe calls.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => unsafe {
            let atfork = actions.as_deref_mut().and_then(|a| a.atfork_mut());
            exec_child(&exec, stdio.targets, &inherit, &sweep, atfork)
        },
        Ok(ForkResult::Parent { child }) => {
            drop(stdio.child_owned);
            info!(
                pid = child.as_raw(),
                program = %program.display(),
                flags = ?flags,
                "spawned process"
            );
            Ok(UnixProcess::new(child, program.to_path_buf(), stdio.parent))
        }
        Err(errno) => {
            info!(error = %errno, program = %program.display(), "error forking process");
            Err(SpawnError::os("error forking process", errno.into()))
        }
    }
}

/// Spawn a daemon-style process that is reparented to init.
///
/// The child starts a new session, changes to `/` and forks again; only
/// the intermediate child is reaped here. Standard streams go to
/// `/dev/null` unless redirected through `actions`.
pub fn spawn_detached<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
    flags: SpawnFlags,
    actions: Option<&mut UnixSpawnActions<'_>>,
) -> Result<()> {
    validate_program(program)?;
    (flags | SpawnFlags::DETACHED).validate(false)?;

    if !flags.contains(SpawnFlags::NO_EUID_CHECK) && getuid() != geteuid() {
        return Err(SpawnError::Forbidden(
            "refusing to spawn a detached process with differing real and effective uid"
                .to_string(),
        ));
    }

    access(program, AccessFlags::X_OK).map_err(|errno| {
        SpawnError::os(
            format!("'{}' is not executable", program.display()),
            errno.into(),
        )
    })?;

    let mut actions = actions;
    let exec = ExecPlan::new(program, args, actions.as_deref())?;
    let stdio = StdioPlan::prepare(SpawnFlags::empty(), actions.as_deref())?;
    let inherit = inherit_list(actions.as_deref());
    let sweep = FdSweep::prepare(3, &inherit);

    // SAFETY: as in `spawn`; the intermediate child only calls setsid,
    // chdir, fork and _exit.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => unsafe {
            if libc::setsid() == -1 || libc::chdir(c"/".as_ptr()) == -1 {
                libc::_exit(1);
            }
            match libc::fork() {
                -1 => libc::_exit(1),
                0 => {
                    let atfork = actions.as_deref_mut().and_then(|a| a.atfork_mut());
                    exec_child(&exec, stdio.targets, &inherit, &sweep, atfork)
                }
                _ => libc::_exit(0),
            }
        },
        Ok(ForkResult::Parent { child }) => {
            drop(stdio.child_owned);
            waitpid_retry(child, 0).map_err(|e| {
                info!(error = %e, pid = child.as_raw(), "waitpid failed for detached process");
                SpawnError::os("waiting for the intermediate process", e)
            })?;
            info!(program = %program.display(), "spawned detached process");
            Ok(())
        }
        Err(errno) => {
            info!(error = %errno, program = %program.display(), "error forking process");
            Err(SpawnError::os("error forking process", errno.into()))
        }
    }
}
