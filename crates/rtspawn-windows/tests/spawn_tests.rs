#![cfg(windows)]

use rtspawn_core::{ErrorCode, ExitState, Process, SpawnFlags, Spawner, StdStream, wait_list};
use rtspawn_windows::{
    TERMINATE_EXIT_CODE, WindowsReply, WindowsRequest, WindowsSpawnActions, WindowsSpawner, spawn,
    spawn_detached,
};
use std::io::{Read, Seek, Write};
use std::os::windows::io::AsHandle;
use std::path::PathBuf;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_file(true)
        .with_thread_ids(false)
        .with_target(false)
        .with_line_number(true)
        .try_init();
}

fn cmd() -> PathBuf {
    let root = std::env::var_os("SystemRoot").unwrap_or_else(|| r"C:\Windows".into());
    PathBuf::from(root).join("System32").join("cmd.exe")
}

fn read_stdout(process: &mut rtspawn_windows::WindowsProcess) -> anyhow::Result<String> {
    let mut output = String::new();
    process
        .take_streams(false)?
        .stdout
        .expect("stdout is piped")
        .read_to_string(&mut output)?;
    Ok(output)
}

#[test]
fn test_pipe_echo() -> anyhow::Result<()> {
    init_tracing();

    let flags = SpawnFlags::STDIN_PIPE | SpawnFlags::STDOUT_PIPE;
    let mut process = spawn(&cmd(), &["/d", "/q", "/c", "findstr", ".*"], flags, None)?;
    let mut streams = process.take_streams(false)?;

    let mut stdin = streams.stdin.take().expect("stdin is piped");
    stdin.write_all(b"hello\r\n")?;
    drop(stdin);

    let mut output = String::new();
    streams
        .stdout
        .as_mut()
        .expect("stdout is piped")
        .read_to_string(&mut output)?;
    process.wait(true)?;
    assert_eq!(output.trim_end(), "hello");
    assert_eq!(process.exit_state()?, ExitState::Exited(0));
    Ok(())
}

#[test]
fn test_exit_code_and_requests() -> anyhow::Result<()> {
    init_tracing();

    let mut process = spawn(&cmd(), &["/d", "/c", "exit 3"], SpawnFlags::empty(), None)?;
    assert!(matches!(process.ctl(WindowsRequest::Nop)?, WindowsReply::Done));
    assert!(matches!(
        process.ctl(WindowsRequest::GetProcId)?,
        WindowsReply::ProcId(id) if id == process.id()
    ));

    process.wait(true)?;
    process.wait(false)?;
    assert!(matches!(process.ctl(WindowsRequest::GetExitCode)?, WindowsReply::ExitCode(3)));
    assert!(matches!(process.ctl(WindowsRequest::GetExitId)?, WindowsReply::ExitId(3)));
    Ok(())
}

#[test]
fn test_nonblocking_wait_and_terminate() -> anyhow::Result<()> {
    init_tracing();

    let mut process = spawn(
        &cmd(),
        &["/d", "/c", "ping -n 30 127.0.0.1 >nul"],
        SpawnFlags::empty(),
        None,
    )?;
    assert!(process.wait(false).unwrap_err().is_timeout());
    assert_eq!(
        process.ctl(WindowsRequest::GetExitCode).unwrap_err().code(),
        ErrorCode::Unfinished
    );

    process.terminate()?;
    process.wait(true)?;
    assert_eq!(process.exit_state()?, ExitState::Exited(TERMINATE_EXIT_CODE as i32));
    Ok(())
}

#[test]
fn test_kill_with_exit_code() -> anyhow::Result<()> {
    init_tracing();

    let mut process = spawn(
        &cmd(),
        &["/d", "/c", "ping -n 30 127.0.0.1 >nul"],
        SpawnFlags::empty(),
        None,
    )?;
    process.ctl(WindowsRequest::KillWithExitCode(42))?;
    process.wait(true)?;
    assert_eq!(process.exit_code()?, 42);

    // Killing a terminated process changes nothing
    process.ctl(WindowsRequest::KillWithExitCode(7))?;
    assert_eq!(process.exit_code()?, 42);
    Ok(())
}

#[test]
fn test_take_process_handle() -> anyhow::Result<()> {
    init_tracing();

    let mut process = spawn(&cmd(), &["/d", "/c", "exit 0"], SpawnFlags::empty(), None)?;
    let WindowsReply::ProcessHandle(handle) = process.ctl(WindowsRequest::TakeProcessHandle)?
    else {
        panic!("expected the process handle");
    };
    assert!(process.process_handle().is_none());
    assert_eq!(
        process.ctl(WindowsRequest::TakeProcessHandle).unwrap_err().code(),
        ErrorCode::InvalidArgument
    );
    assert_eq!(process.wait(true).unwrap_err().code(), ErrorCode::InvalidArgument);
    assert!(!process.is_terminated());
    drop(process);
    drop(handle);
    Ok(())
}

#[test]
fn test_environment_changes() -> anyhow::Result<()> {
    init_tracing();

    let changes = ["RTSPAWN_A=one", "RTSPAWN_B=two", "RTSPAWN_A=three", "RTSPAWN_B"];
    let mut actions = WindowsSpawnActions::new();
    actions.set_env_changes(&changes);

    let mut process = spawn(
        &cmd(),
        &["/d", "/c", "echo %RTSPAWN_A%-%RTSPAWN_B%"],
        SpawnFlags::STDOUT_PIPE,
        Some(&mut actions),
    )?;
    let output = read_stdout(&mut process)?;
    process.wait(true)?;
    assert_eq!(output.trim_end(), "three-%RTSPAWN_B%");
    Ok(())
}

#[test]
fn test_explicit_redirect_wins() -> anyhow::Result<()> {
    init_tracing();

    let mut file = tempfile::tempfile()?;
    let mut actions = WindowsSpawnActions::new();
    actions.set_redirect(None, Some(file.as_handle()), None);

    let mut process = spawn(
        &cmd(),
        &["/d", "/c", "echo redirected"],
        SpawnFlags::STDOUT_PIPE,
        Some(&mut actions),
    )?;
    drop(actions);
    assert!(process.stdio_handle(StdStream::Stdout).is_some());

    // The pipe exists but the child writes to the file, so it only sees EOF
    let mut piped = String::new();
    process
        .take_streams(false)?
        .stdout
        .expect("stdout pipe is still created")
        .read_to_string(&mut piped)?;
    process.wait(true)?;
    assert_eq!(piped, "");

    let mut output = String::new();
    file.rewind()?;
    file.read_to_string(&mut output)?;
    assert_eq!(output.trim_end(), "redirected");
    Ok(())
}

#[test]
fn test_rejected_requests() {
    init_tracing();

    let err = spawn(&cmd(), &["/c", "exit 0"], SpawnFlags::STDINOUT_SOCKETPAIR, None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotSupported);

    let err = spawn(&cmd(), &["/c", "exit 0"], SpawnFlags::DETACHED, None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let err = spawn_detached(&cmd(), &["/c", "exit 0"], SpawnFlags::STDOUT_PIPE, None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidFlag);

    let changes = ["A=1"];
    let environ = ["B=2"];
    let mut actions = WindowsSpawnActions::new();
    actions.set_env_changes(&changes);
    actions.set_environ(&environ);
    let err = spawn(&cmd(), &["/c", "exit 0"], SpawnFlags::empty(), Some(&mut actions)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[test]
fn test_spawn_and_wait_and_wait_list() -> anyhow::Result<()> {
    init_tracing();

    let state = WindowsSpawner::spawn_and_wait(&cmd(), &["/d", "/c", "exit 7"], SpawnFlags::empty(), None)?;
    assert_eq!(state, ExitState::Exited(7));
    assert_eq!(WindowsSpawner::platform_name(), "Windows");

    let mut processes = (1..=3)
        .map(|code| {
            let script = format!("exit {code}");
            spawn(&cmd(), &["/d", "/c", script.as_str()], SpawnFlags::empty(), None)
        })
        .collect::<Result<Vec<_>, _>>()?;
    wait_list(processes.iter_mut(), true)?;
    let codes: Vec<_> = processes
        .iter()
        .map(|p| p.exit_state().map(|s| s.exit_id()))
        .collect::<Result<_, _>>()?;
    assert_eq!(codes, [1, 2, 3]);
    Ok(())
}

#[test]
fn test_detached_spawn_writes_marker() -> anyhow::Result<()> {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let marker = dir.path().join("marker.txt");
    let script = format!("echo detached>{}", marker.display());
    spawn_detached(&cmd(), &["/d", "/c", script.as_str()], SpawnFlags::empty(), None)?;

    for _ in 0..100 {
        if std::fs::read_to_string(&marker).is_ok_and(|s| s.contains("detached")) {
            return Ok(());
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
    anyhow::bail!("detached process never wrote {}", marker.display())
}
