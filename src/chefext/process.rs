// src/chefext/process.rs — Shell composition and launch-and-abandon spawning
// Maintained by the chef-extension contributors | © 2025 | MIT licensed
// A detached child outlives this process; nothing here ever waits on it.

use std::process::{Command, ExitStatus, Stdio};

use super::error::{EnableError, Result};
use super::platform::PlatformKind;

/// Starts a shell command line as an independent process and returns its pid.
pub trait Spawner {
    fn spawn_detached(&self, command_line: &str) -> Result<u32>;
}

#[derive(Debug, Clone, Copy)]
pub struct ShellSpawner {
    kind: PlatformKind,
}

impl ShellSpawner {
    pub fn new(kind: PlatformKind) -> Self {
        ShellSpawner { kind }
    }
}

impl Spawner for ShellSpawner {
    fn spawn_detached(&self, command_line: &str) -> Result<u32> {
        let mut cmd = shell(self.kind, command_line);
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        detach(&mut cmd);

        let child = cmd.spawn().map_err(|source| EnableError::Spawn {
            command: command_line.to_string(),
            source,
        })?;
        let pid = child.id();
        // Dropping `Child` neither kills nor reaps; the process keeps running on its own.
        drop(child);
        tracing::info!(pid, command = command_line, "spawned detached process");
        Ok(pid)
    }
}

/// Runs a command line through the platform shell and waits for it.
pub fn run_to_completion(kind: PlatformKind, command_line: &str) -> Result<ExitStatus> {
    shell(kind, command_line).status().map_err(|source| EnableError::Spawn {
        command: command_line.to_string(),
        source,
    })
}

/// Runs a command line and captures stdout. Non-zero exit is returned to the caller untouched.
pub fn capture_stdout(kind: PlatformKind, command_line: &str) -> Result<(ExitStatus, String)> {
    let out = shell(kind, command_line)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| EnableError::Spawn { command: command_line.to_string(), source })?;
    if !out.stderr.is_empty() {
        tracing::debug!(stderr = %String::from_utf8_lossy(&out.stderr), "command stderr");
    }
    Ok((out.status, String::from_utf8_lossy(&out.stdout).into_owned()))
}

fn shell(kind: PlatformKind, command_line: &str) -> Command {
    match kind {
        PlatformKind::Windows => {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C");
            push_raw(&mut cmd, command_line);
            cmd
        }
        PlatformKind::Posix => {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command_line);
            cmd
        }
    }
}

#[cfg(windows)]
fn push_raw(cmd: &mut Command, command_line: &str) {
    use std::os::windows::process::CommandExt;
    // cmd.exe does its own parsing; quoting it again would break `&&`.
    cmd.raw_arg(command_line);
}

#[cfg(not(windows))]
fn push_raw(cmd: &mut Command, command_line: &str) {
    cmd.arg(command_line);
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_cmd: &mut Command) {}
