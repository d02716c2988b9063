use crate::actions::WindowsSpawnActions;
use crate::cmdline::build_command_line;
use crate::env_block::{env_block_for, wide_nul};
use crate::pipe::{duplicate_inheritable, make_pipe, open_null, owned, raw};
use crate::process::WindowsProcess;
use rtspawn_core::{
    EnvSource, PipeDirection, Result, SpawnError, SpawnFlags, StdStream, StdioMode,
    validate_program,
};
use std::ffi::{OsStr, c_void};
use std::os::windows::io::{AsRawHandle, OwnedHandle};
use std::path::Path;
use tracing::info;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::Console::{
    GetStdHandle, STD_ERROR_HANDLE, STD_HANDLE, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
};
use windows::Win32::System::Threading::{
    CREATE_DEFAULT_ERROR_MODE, CREATE_NEW_PROCESS_GROUP, CREATE_SUSPENDED,
    CREATE_UNICODE_ENVIRONMENT, CreateProcessW, DETACHED_PROCESS, DeleteProcThreadAttributeList,
    EXTENDED_STARTUPINFO_PRESENT, GetCurrentProcess, GetPriorityClass,
    InitializeProcThreadAttributeList, LPPROC_THREAD_ATTRIBUTE_LIST, PROCESS_CREATION_FLAGS,
    PROCESS_INFORMATION, ResumeThread, STARTF_USESHOWWINDOW, STARTF_USESTDHANDLES,
    STARTUPINFOEXW, STARTUPINFOW, UpdateProcThreadAttribute,
};
use windows::Win32::UI::WindowsAndMessaging::{
    ASFW_ANY, AllowSetForegroundWindow, SW_HIDE, SW_MINIMIZE,
};
use windows::core::{PCWSTR, PWSTR};

/// Handles a child can inherit through an explicit handle list
pub const MAX_INHERITED_HANDLES: usize = 32;

const PROC_THREAD_ATTRIBUTE_HANDLE_LIST: usize = 0x0002_0002;

fn std_handle_id(stream: StdStream) -> STD_HANDLE {
    match stream {
        StdStream::Stdin => STD_INPUT_HANDLE,
        StdStream::Stdout => STD_OUTPUT_HANDLE,
        StdStream::Stderr => STD_ERROR_HANDLE,
    }
}

/// Inheritable duplicate of one of our own standard handles; `None` when
/// the current process has no such handle.
fn keep_std_handle(stream: StdStream) -> Result<Option<OwnedHandle>> {
    match unsafe { GetStdHandle(std_handle_id(stream)) } {
        Ok(handle) if !handle.is_invalid() && !handle.0.is_null() => {
            duplicate_inheritable(handle).map(Some)
        }
        _ => Ok(None),
    }
}

/// Standard handles for the child plus the parent-side pipe ends
#[derive(Debug, Default)]
struct StdioPlan {
    child: [Option<OwnedHandle>; 3],
    parent: [Option<OwnedHandle>; 3],
}

impl StdioPlan {
    /// Resolve all three streams; dropping a partially built plan closes
    /// every handle created so far.
    ///
    /// A detached launch only gets the redirected streams.
    fn prepare(flags: SpawnFlags, actions: Option<&WindowsSpawnActions<'_>>) -> Result<Self> {
        if flags.contains(SpawnFlags::STDINOUT_SOCKETPAIR) {
            return Err(SpawnError::NotSupported(
                "socket pairs are not available for Windows children".to_string(),
            ));
        }

        let mut plan = Self::default();
        for stream in StdStream::ALL {
            let slot = stream.index();
            let redirect = actions.and_then(|a| a.redirect(stream));

            if !flags.is_detached() {
                match flags.stdio_mode(stream) {
                    StdioMode::Pipe => {
                        let (read, write) = make_pipe(PipeDirection::for_stream(stream))?;
                        let (parent, child) = if stream.child_writes() {
                            (read, write)
                        } else {
                            (write, read)
                        };
                        plan.parent[slot] = Some(parent);
                        plan.child[slot] = Some(child);
                    }
                    _ if redirect.is_some() => {}
                    StdioMode::Keep => plan.child[slot] = keep_std_handle(stream)?,
                    StdioMode::Null => plan.child[slot] = Some(open_null(stream.child_writes())?),
                }
            }

            // Replacing the child end closes it; the parent end of a
            // requested pipe is still handed out.
            if let Some(handle) = redirect {
                plan.child[slot] = Some(duplicate_inheritable(HANDLE(handle.as_raw_handle()))?);
            }
        }
        Ok(plan)
    }

    fn has_std_handles(&self) -> bool {
        self.child.iter().any(Option::is_some)
    }

    fn child_raw(&self, stream: StdStream) -> HANDLE {
        self.child[stream.index()]
            .as_ref()
            .map(raw)
            .unwrap_or_default()
    }
}

/// Every handle the child may inherit: its standard handles first, then
/// the caller's list, without duplicates and capped at
/// [`MAX_INHERITED_HANDLES`].
fn inherit_handles(stdio: &StdioPlan, actions: Option<&WindowsSpawnActions<'_>>) -> Vec<HANDLE> {
    let extra = actions
        .map(|a| a.inherit())
        .unwrap_or_default()
        .iter()
        .map(|h| HANDLE(h.as_raw_handle()));
    let candidates = stdio.child.iter().flatten().map(raw).chain(extra);

    let mut handles: Vec<HANDLE> = Vec::new();
    for handle in candidates {
        if handles.contains(&handle) {
            continue;
        }
        if handles.len() == MAX_INHERITED_HANDLES {
            info!(limit = MAX_INHERITED_HANDLES, "too many handles to inherit");
            break;
        }
        handles.push(handle);
    }
    handles
}

/// `PROC_THREAD_ATTRIBUTE_HANDLE_LIST` attribute list owning its backing
/// storage and the handle array it points into
struct HandleList {
    storage: Vec<usize>,
    handles: Box<[HANDLE]>,
}

impl HandleList {
    fn new(handles: Vec<HANDLE>) -> Result<Self> {
        let mut size = 0usize;
        // Sizing call: fails with ERROR_INSUFFICIENT_BUFFER after filling `size`
        let _ = unsafe { InitializeProcThreadAttributeList(None, 1, None, &mut size) };
        let mut storage = vec![0usize; size.div_ceil(std::mem::size_of::<usize>())];
        let list = LPPROC_THREAD_ATTRIBUTE_LIST(storage.as_mut_ptr().cast());
        unsafe { InitializeProcThreadAttributeList(Some(list), 1, None, &mut size) }
            .map_err(|e| SpawnError::os("InitializeProcThreadAttributeList failed", e.into()))?;

        let mut this = Self {
            storage,
            handles: handles.into_boxed_slice(),
        };
        unsafe {
            UpdateProcThreadAttribute(
                this.as_raw(),
                0,
                PROC_THREAD_ATTRIBUTE_HANDLE_LIST,
                Some(this.handles.as_ptr().cast::<c_void>()),
                std::mem::size_of_val(&*this.handles),
                None,
                None,
            )
        }
        .map_err(|e| SpawnError::os("UpdateProcThreadAttribute failed", e.into()))?;
        Ok(this)
    }

    fn as_raw(&mut self) -> LPPROC_THREAD_ATTRIBUTE_LIST {
        LPPROC_THREAD_ATTRIBUTE_LIST(self.storage.as_mut_ptr().cast())
    }
}

impl Drop for HandleList {
    fn drop(&mut self) {
        unsafe { DeleteProcThreadAttributeList(self.as_raw()) };
    }
}

/// Everything `CreateProcessW` needs, built before the call
struct Launch<'p> {
    program: &'p Path,
    application: Vec<u16>,
    cmdline: Vec<u16>,
    env_block: Option<Vec<u16>>,
    stdio: StdioPlan,
    handle_list: Option<HandleList>,
}

impl<'p> Launch<'p> {
    fn prepare<S: AsRef<OsStr>>(
        program: &'p Path,
        args: &[S],
        flags: SpawnFlags,
        actions: Option<&WindowsSpawnActions<'_>>,
    ) -> Result<Self> {
        let cmdline = build_command_line(program.as_os_str(), args);
        let source = actions.map_or(Ok(EnvSource::Inherit), |a| a.env_source())?;
        let env_block = env_block_for(source)?;

        let stdio = StdioPlan::prepare(flags, actions)?;
        let handles = inherit_handles(&stdio, actions);
        let handle_list = if handles.is_empty() {
            None
        } else {
            Some(HandleList::new(handles)?)
        };

        Ok(Self {
            program,
            application: wide_nul(program.as_os_str()),
            cmdline: wide_nul(OsStr::new(&cmdline)),
            env_block,
            stdio,
            handle_list,
        })
    }

    /// Create the process suspended and return its process information
    fn create(&mut self, mut creation: PROCESS_CREATION_FLAGS, show: u16) -> Result<PROCESS_INFORMATION> {
        creation |= CREATE_DEFAULT_ERROR_MODE
            | PROCESS_CREATION_FLAGS(unsafe { GetPriorityClass(GetCurrentProcess()) });
        if self.env_block.is_some() {
            creation |= CREATE_UNICODE_ENVIRONMENT;
        }

        let mut startup = STARTUPINFOEXW::default();
        startup.StartupInfo.dwFlags = STARTF_USESHOWWINDOW;
        startup.StartupInfo.wShowWindow = show;
        if self.stdio.has_std_handles() {
            startup.StartupInfo.dwFlags |= STARTF_USESTDHANDLES;
            startup.StartupInfo.hStdInput = self.stdio.child_raw(StdStream::Stdin);
            startup.StartupInfo.hStdOutput = self.stdio.child_raw(StdStream::Stdout);
            startup.StartupInfo.hStdError = self.stdio.child_raw(StdStream::Stderr);
        }
        let inherit = match self.handle_list.as_mut() {
            Some(list) => {
                creation |= EXTENDED_STARTUPINFO_PRESENT;
                startup.lpAttributeList = list.as_raw();
                startup.StartupInfo.cb = std::mem::size_of::<STARTUPINFOEXW>() as u32;
                true
            }
            None => {
                startup.StartupInfo.cb = std::mem::size_of::<STARTUPINFOW>() as u32;
                false
            }
        };

        let environment = self
            .env_block
            .as_ref()
            .map(|block| block.as_ptr().cast::<c_void>());
        let mut info = PROCESS_INFORMATION::default();
        unsafe {
            CreateProcessW(
                PCWSTR(self.application.as_ptr()),
                Some(PWSTR(self.cmdline.as_mut_ptr())),
                None,
                None,
                inherit,
                creation,
                environment,
                PCWSTR::null(),
                &startup.StartupInfo,
                &mut info,
            )
        }
        .map_err(|e| {
            info!(error = %e, program = %self.program.display(), "CreateProcess failed");
            SpawnError::os(
                format!("failed to create process '{}'", self.program.display()),
                e.into(),
            )
        })?;
        Ok(info)
    }
}

/// Start `program` with `args` and return a handle to the new process.
///
/// `program` must name the executable file itself; no search path is
/// consulted. The child is created suspended and resumed once the
/// foreground permission has been granted.
pub fn spawn<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
    flags: SpawnFlags,
    actions: Option<&mut WindowsSpawnActions<'_>>,
) -> Result<WindowsProcess> {
    validate_program(program)?;
    flags.validate(true)?;

    let mut launch = Launch::prepare(program, args, flags, actions.as_deref())?;
    let mut creation = CREATE_SUSPENDED;
    if flags.contains(SpawnFlags::NO_CONSOLE) {
        creation |= DETACHED_PROCESS;
    }
    let info = launch.create(creation, SW_HIDE.0 as u16)?;

    // SAFETY: CreateProcessW succeeded and both handles are ours.
    let (process, thread) = unsafe { (owned(info.hProcess), owned(info.hThread)) };

    if flags.contains(SpawnFlags::ALLOW_SET_FG) {
        if let Err(e) = unsafe { AllowSetForegroundWindow(ASFW_ANY) } {
            info!(error = %e, "AllowSetForegroundWindow failed");
        }
    }
    let Launch { stdio, .. } = launch;
    drop(stdio.child);
    let child = WindowsProcess::new(
        process,
        info.dwProcessId,
        program.to_path_buf(),
        stdio.parent,
    );

    if unsafe { ResumeThread(raw(&thread)) } == u32::MAX {
        let err = SpawnError::last_os_error("failed to resume the new process");
        info!(pid = info.dwProcessId, error = %err, "ResumeThread failed");
        // Dropping the handle terminates the suspended child
        return Err(err);
    }
    drop(thread);

    info!(
        pid = info.dwProcessId,
        program = %program.display(),
        flags = ?flags,
        "spawned process"
    );
    Ok(child)
}

/// Start a process in its own process group without a console; both
/// returned handles are closed at once.
pub fn spawn_detached<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
    flags: SpawnFlags,
    actions: Option<&mut WindowsSpawnActions<'_>>,
) -> Result<()> {
    validate_program(program)?;
    let flags = flags | SpawnFlags::DETACHED;
    flags.validate(false)?;

    let mut launch = Launch::prepare(program, args, flags, actions.as_deref())?;
    let info = launch.create(
        CREATE_NEW_PROCESS_GROUP | DETACHED_PROCESS,
        SW_MINIMIZE.0 as u16,
    )?;
    // SAFETY: CreateProcessW succeeded; closing both handles releases them.
    drop(unsafe { (owned(info.hProcess), owned(info.hThread)) });

    info!(
        pid = info.dwProcessId,
        program = %program.display(),
        "spawned detached process"
    );
    Ok(())
}
