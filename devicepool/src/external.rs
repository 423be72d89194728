// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The `Runner` boundary: everything the pool needs to shell out to the outside world
//! (timed commands, backgrounded subprocesses, sleeps) without hard-coding a specific
//! process-spawning library. A `tokio::process`-backed implementation is provided as the
//! default; tests supply a fake.

use std::time::Duration;

use async_trait::async_trait;

/// Bounded timeout for `fastboot` commands (probe and `fastboot devices`).
pub const FASTBOOT_TIMEOUT: Duration = Duration::from_secs(60);
/// Bounded timeout for a single `adb connect` attempt.
pub const ADB_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// The outcome of a timed external command.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub status_ok: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { status_ok: true, stdout: stdout.into(), stderr: String::new() }
    }

    #[must_use]
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self { status_ok: false, stdout: String::new(), stderr: stderr.into() }
    }
}

/// A handle to a backgrounded process, e.g. a launched emulator. Replacement for the
/// original's reflection-based pid extraction: the pid is exposed directly by the
/// `Runner` that created this process (see the design notes).
#[async_trait]
pub trait Process: Send + Sync + std::fmt::Debug {
    /// The OS pid, when the `Runner` was able to determine one.
    fn pid(&self) -> Option<u32>;

    /// Non-blocking check: `Some(true)` if still running, `Some(false)` if it already
    /// exited, `None` if the check itself failed.
    async fn is_alive(&self) -> Option<bool>;

    /// Orderly shutdown request (e.g. the PTY/process abstraction's `kill()`).
    async fn destroy(&self) -> std::io::Result<()>;

    /// Best-effort `kill -9 <pid>`. Absence of a pid is logged by the caller, not
    /// treated as fatal here.
    async fn kill_hard(&self) -> std::io::Result<()>;
}

/// Everything the pool needs from the outside world to run commands and manage
/// subprocesses.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Runs `argv` to completion, killing it if `timeout` elapses first.
    async fn run_timed_cmd(&self, timeout: Duration, argv: &[&str]) -> CmdOutput;

    /// Spawns `argv` as a long-lived background process (an emulator).
    async fn run_in_background(
        &self,
        argv: &[&str],
    ) -> std::io::Result<Box<dyn Process>>;

    /// Cooperative sleep, so fakes can skip real wall-clock delays in tests.
    async fn sleep(&self, duration: Duration);
}

/// `Runner` implementation backed by `tokio::process` for both timed commands and
/// backgrounded subprocesses (emulator launches).
#[derive(Debug, Default)]
pub struct SystemRunner;

#[async_trait]
impl Runner for SystemRunner {
    async fn run_timed_cmd(&self, timeout: Duration, argv: &[&str]) -> CmdOutput {
        let Some((program, args)) = argv.split_first() else {
            return CmdOutput::failed("empty argv");
        };
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args);
        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => CmdOutput {
                status_ok: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Ok(Err(e)) => CmdOutput::failed(e.to_string()),
            Err(_) => CmdOutput::failed("timed out"),
        }
    }

    async fn run_in_background(
        &self,
        argv: &[&str],
    ) -> std::io::Result<Box<dyn Process>> {
        let Some((program, args)) = argv.split_first() else {
            return Err(std::io::Error::other("empty argv"));
        };
        let child = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(false)
            .spawn()?;
        Ok(Box::new(TokioProcess { child: tokio::sync::Mutex::new(child) }))
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug)]
struct TokioProcess {
    child: tokio::sync::Mutex<tokio::process::Child>,
}

#[async_trait]
impl Process for TokioProcess {
    fn pid(&self) -> Option<u32> {
        // `try_lock` never blocks the caller; a pid is immutable for the process's
        // lifetime so contention here would only ever be momentary.
        self.child.try_lock().ok().and_then(|c| c.id())
    }

    async fn is_alive(&self) -> Option<bool> {
        let mut child = self.child.lock().await;
        match child.try_wait() {
            Ok(Some(_)) => Some(false),
            Ok(None) => Some(true),
            Err(_) => None,
        }
    }

    async fn destroy(&self) -> std::io::Result<()> {
        self.child.lock().await.start_kill()
    }

    async fn kill_hard(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            let Some(pid) = self.pid() else {
                return Err(std::io::Error::other("no pid to kill -9"));
            };
            tokio::process::Command::new("kill")
                .args(["-9", &pid.to_string()])
                .status()
                .await
                .map(|_| ())
        }
        #[cfg(not(unix))]
        {
            Err(std::io::Error::other("kill -9 is unix-only"))
        }
    }
}

/// Parses `fastboot devices` output: each matching line's first capture group is a
/// serial. Bit-exact with the spec's regex.
#[must_use]
pub fn parse_fastboot_devices(stdout: &str) -> Vec<String> {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"([\w\d]+)\s+fastboot\s*").unwrap());
    re.captures_iter(stdout)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// `adb connect <ip:port>` succeeds iff stdout starts with `connected to <ip:port>`.
#[must_use]
pub fn adb_connect_succeeded(stdout: &str, ip_and_port: &str) -> bool {
    stdout.starts_with(&format!("connected to {ip_and_port}"))
}
