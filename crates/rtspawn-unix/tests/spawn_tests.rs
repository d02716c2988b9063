#![cfg(unix)]

use rtspawn_core::{
    ErrorCode, ExitState, PipeDirection, Process, SpawnFlags, Spawner, StdStream, wait_list,
};
use rtspawn_unix::{
    Signal, UnixReply, UnixRequest, UnixSpawnActions, UnixSpawner, make_pipe, spawn,
};
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::path::Path;
use std::time::{Duration, Instant};
use sysinfo::{ProcessesToUpdate, System};

const SH: &str = "/bin/sh";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_file(true)
        .with_thread_ids(false)
        .with_target(false)
        .with_line_number(true)
        .try_init();
}

/// Test round-tripping data through a child's stdin and stdout pipes
#[test]
fn test_pipe_echo_through_cat() -> anyhow::Result<()> {
    init_tracing();

    let flags = SpawnFlags::STDIN_PIPE | SpawnFlags::STDOUT_PIPE;
    let mut process = spawn(Path::new(SH), &["-c", "cat"], flags, None)?;
    let mut streams = process.take_streams(false)?;

    let mut stdin = streams.stdin.take().expect("stdin is piped");
    stdin.write_all(b"hello")?;
    drop(stdin);

    let mut output = String::new();
    streams
        .stdout
        .as_mut()
        .expect("stdout is piped")
        .read_to_string(&mut output)?;
    assert!(streams.stderr.is_none());

    process.wait(true)?;
    assert_eq!(output, "hello");
    assert_eq!(process.exit_state()?, ExitState::Exited(0));
    Ok(())
}

#[test]
fn test_socketpair_shares_stdin_and_stdout() -> anyhow::Result<()> {
    init_tracing();

    let mut process = spawn(
        Path::new(SH),
        &["-c", "read line; echo got:$line"],
        SpawnFlags::STDINOUT_SOCKETPAIR,
        None,
    )?;
    let [stdin, stdout, stderr] = process.take_fds();
    assert!(stderr.is_none());

    let mut writer = File::from(stdin.expect("socket end for writing"));
    let mut reader = File::from(stdout.expect("socket end for reading"));
    writer.write_all(b"ping\n")?;

    let mut output = String::new();
    reader.read_to_string(&mut output)?;
    process.wait(true)?;
    assert_eq!(output, "got:ping\n");
    Ok(())
}

#[test]
fn test_nonblocking_wait_reports_timeout() -> anyhow::Result<()> {
    init_tracing();

    let mut process = spawn(Path::new(SH), &["-c", "exec sleep 5"], SpawnFlags::empty(), None)?;
    let err = process.wait(false).unwrap_err();
    assert!(err.is_timeout());
    assert!(!process.is_terminated());
    assert_eq!(process.exit_state().unwrap_err().code(), ErrorCode::Unfinished);

    process.terminate()?;
    process.wait(true)?;
    assert_eq!(
        process.exit_state()?,
        ExitState::Signaled(Signal::SIGTERM as i32)
    );
    Ok(())
}

#[test]
fn test_wait_is_idempotent() -> anyhow::Result<()> {
    init_tracing();

    let mut process = spawn(Path::new(SH), &["-c", "exit 3"], SpawnFlags::empty(), None)?;
    process.wait(true)?;
    process.wait(true)?;
    process.wait(false)?;

    assert!(process.is_terminated());
    assert_eq!(process.exit_state()?, ExitState::Exited(3));
    assert_eq!(process.ctl(UnixRequest::GetExitId)?, UnixReply::ExitId(3));
    match process.ctl(UnixRequest::GetWaitStatus)? {
        UnixReply::WaitStatus { raw, state } => {
            assert_eq!(state, ExitState::Exited(3));
            assert_eq!(raw, 3 << 8);
        }
        other => panic!("unexpected reply {other:?}"),
    }
    Ok(())
}

#[test]
fn test_ctl_requests() -> anyhow::Result<()> {
    init_tracing();

    let mut process = spawn(Path::new(SH), &["-c", "exec sleep 5"], SpawnFlags::empty(), None)?;
    assert_eq!(process.ctl(UnixRequest::Nop)?, UnixReply::Done);
    assert_eq!(process.ctl(UnixRequest::GetPid)?, UnixReply::Pid(process.pid()));
    assert_eq!(
        process.ctl(UnixRequest::GetProcId)?,
        UnixReply::ProcId(process.id())
    );
    assert_eq!(
        process.ctl(UnixRequest::GetExitId).unwrap_err().code(),
        ErrorCode::Unfinished
    );

    process.ctl(UnixRequest::Kill(Signal::SIGKILL))?;
    process.wait(true)?;
    assert_eq!(process.exit_state()?.signal(), Some(Signal::SIGKILL as i32));
    assert_eq!(process.ctl(UnixRequest::GetExitId)?, UnixReply::ExitId(-1));
    Ok(())
}

#[test]
fn test_exec_failure_exits_127() -> anyhow::Result<()> {
    init_tracing();

    let mut process = spawn(
        Path::new("/nonexistent/rtspawn-missing"),
        &[] as &[&str],
        SpawnFlags::empty(),
        None,
    )?;
    process.wait(true)?;
    assert_eq!(process.exit_state()?, ExitState::Exited(127));
    Ok(())
}

#[test]
fn test_argv0_is_basename() -> anyhow::Result<()> {
    init_tracing();

    let mut process = spawn(Path::new(SH), &["-c", "echo $0"], SpawnFlags::STDOUT_PIPE, None)?;
    let mut output = String::new();
    process
        .take_streams(false)?
        .stdout
        .expect("stdout is piped")
        .read_to_string(&mut output)?;
    process.wait(true)?;
    assert_eq!(output.trim(), "sh");
    Ok(())
}

#[test]
fn test_extra_inherited_descriptor() -> anyhow::Result<()> {
    init_tracing();

    let (side_read, side_write) = make_pipe(PipeDirection::Inbound)?;
    let (_leak_read, leak_write) = make_pipe(PipeDirection::Both)?;

    let inherit = [side_write.as_fd()];
    let mut actions = UnixSpawnActions::new();
    actions.set_inherit(&inherit);

    let side = side_write.as_raw_fd().to_string();
    let leak = leak_write.as_raw_fd().to_string();
    let script = "echo side >&$0; { echo leak >&$1; } 2>/dev/null || echo closed";
    let mut process = spawn(
        Path::new(SH),
        &["-c", script, side.as_str(), leak.as_str()],
        SpawnFlags::STDOUT_PIPE,
        Some(&mut actions),
    )?;
    drop(actions);
    drop(side_write);

    let mut side_output = String::new();
    File::from(side_read).read_to_string(&mut side_output)?;
    let mut stdout = String::new();
    process
        .take_streams(false)?
        .stdout
        .expect("stdout is piped")
        .read_to_string(&mut stdout)?;
    process.wait(true)?;

    assert_eq!(side_output, "side\n");
    assert_eq!(stdout, "closed\n");
    Ok(())
}

#[test]
fn test_explicit_redirect_wins() -> anyhow::Result<()> {
    init_tracing();

    let mut file = tempfile::tempfile()?;
    let mut actions = UnixSpawnActions::new();
    actions.set_redirect(None, Some(file.as_fd()), None);

    let mut process = spawn(
        Path::new(SH),
        &["-c", "echo redirected"],
        SpawnFlags::STDOUT_PIPE,
        Some(&mut actions),
    )?;
    drop(actions);
    assert!(process.stdio_fd(StdStream::Stdout).is_some());

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
    assert_eq!(output, "redirected\n");
    Ok(())
}

#[test]
fn test_atfork_runs_in_child() -> anyhow::Result<()> {
    init_tracing();

    let (read, write) = make_pipe(PipeDirection::Inbound)?;
    let raw = write.as_raw_fd();
    let inherit = [write.as_fd()];
    let mut actions = UnixSpawnActions::new();
    actions.set_inherit(&inherit);
    unsafe {
        actions.set_atfork(move || {
            libc::write(raw, b"x".as_ptr().cast(), 1);
        });
    }

    let mut process = spawn(Path::new(SH), &["-c", "exit 0"], SpawnFlags::empty(), Some(&mut actions))?;
    drop(actions);
    drop(write);
    process.wait(true)?;

    let mut marker = Vec::new();
    File::from(read).read_to_end(&mut marker)?;
    assert_eq!(marker, b"x");
    Ok(())
}

#[test]
fn test_spawn_and_wait_returns_status() -> anyhow::Result<()> {
    init_tracing();

    let state = UnixSpawner::spawn_and_wait(
        Path::new(SH),
        &["-c", "exit 7"],
        SpawnFlags::empty(),
        None,
    )?;
    assert_eq!(state, ExitState::Exited(7));
    assert_eq!(UnixSpawner::platform_name(), "Unix");
    Ok(())
}

#[test]
fn test_wait_list_waits_for_all() -> anyhow::Result<()> {
    init_tracing();

    let mut processes = (1..=3)
        .map(|code| {
            let script = format!("exit {code}");
            spawn(Path::new(SH), &["-c", script.as_str()], SpawnFlags::empty(), None)
        })
        .collect::<Result<Vec<_>, _>>()?;
    processes[1].wait(true)?;

    wait_list(processes.iter_mut(), true)?;
    let codes: Vec<_> = processes
        .iter()
        .map(|p| p.exit_state().map(|s| s.exit_id()))
        .collect::<Result<_, _>>()?;
    assert_eq!(codes, [1, 2, 3]);
    Ok(())
}

/// Test that releasing a running child terminates it and blocks until it is reaped
#[test]
fn test_release_reaps_running_child() -> anyhow::Result<()> {
    init_tracing();

    let process = spawn(
        Path::new(SH),
        &["-c", "trap '' TERM; sleep 1"],
        SpawnFlags::empty(),
        None,
    )?;
    let pid = sysinfo::Pid::from_u32(process.id());

    // Give the shell time to install the trap
    std::thread::sleep(Duration::from_millis(200));
    let started = Instant::now();
    process.release();
    assert!(started.elapsed() >= Duration::from_millis(300));

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    assert!(system.process(pid).is_none());
    Ok(())
}

#[test]
fn test_invalid_flags_rejected() {
    init_tracing();

    let err = spawn(
        Path::new(SH),
        &["-c", "true"],
        SpawnFlags::DETACHED,
        None,
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let err = spawn(
        Path::new(SH),
        &["-c", "true"],
        SpawnFlags::STDIN_PIPE | SpawnFlags::STDIN_KEEP,
        None,
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidFlag);

    let err = spawn(Path::new(""), &["x"], SpawnFlags::empty(), None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}
