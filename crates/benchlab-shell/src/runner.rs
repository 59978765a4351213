//! Command execution behind a narrow trait.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use benchlab_core::{CampaignError, Result};
use tracing::debug;

use crate::asyncproc::AsyncProcess;

/// Environment variables for a command. `BTreeMap` keeps iteration
/// deterministic, which matters when an env-materializing wrapper turns the
/// map into argv tokens.
pub type EnvMap = BTreeMap<String, String>;

/// One command to execute, with its failure policy.
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: EnvMap,
    pub timeout: Option<Duration>,
    /// Exit codes tolerated in addition to zero.
    pub ignore_exit_codes: Vec<i32>,
    /// Tolerate any exit status; captured output is still returned.
    pub ignore_any_exit_code: bool,
}

impl ExecRequest {
    pub fn new(argv: Vec<String>) -> Self {
        ExecRequest {
            argv,
            ..Default::default()
        }
    }

    pub fn pretty_command(&self) -> String {
        self.argv.join(" ")
    }

    fn status_ok(&self, code: i32) -> bool {
        code == 0 || self.ignore_any_exit_code || self.ignore_exit_codes.contains(&code)
    }
}

/// Execution backend for one target platform.
///
/// `execute` blocks and returns the captured stdout; `spawn_background`
/// launches a detached process whose output is drained later through the
/// returned [`AsyncProcess`]. The copy/remove helpers exist for remote
/// targets, where wrapper-written files are staged in a local scratch tree
/// during the run and copied back afterwards.
pub trait CommandRunner: Send + Sync {
    fn execute(&self, request: &ExecRequest) -> Result<String>;

    fn spawn_background(
        &self,
        request: &ExecRequest,
        stdout_path: &Path,
        stderr_path: &Path,
    ) -> Result<AsyncProcess>;

    /// Whether the target filesystem is the local one. Non-local targets get
    /// scratch-directory staging for per-run artifacts.
    fn is_local(&self) -> bool {
        true
    }

    fn make_dirs(&self, path: &Path) -> Result<()>;

    /// Copy a finished run's staged artifacts back to the canonical
    /// directory on the host.
    fn copy_to_host(&self, src: &Path, dst: &Path) -> Result<()>;

    fn remove_recursive(&self, path: &Path) -> Result<()>;
}

/// Runs commands on the local machine via `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRunner;

impl LocalRunner {
    fn command(request: &ExecRequest) -> Result<Command> {
        if request.argv.is_empty() {
            return Err(CampaignError::config("cannot execute an empty command"));
        }
        let mut cmd = Command::new(&request.argv[0]);
        cmd.args(&request.argv[1..]);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }
        Ok(cmd)
    }
}

impl CommandRunner for LocalRunner {
    fn execute(&self, request: &ExecRequest) -> Result<String> {
        debug!(command = %request.pretty_command(), "executing");
        let mut cmd = Self::command(request)?;
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        if let Some(timeout) = request.timeout {
            let deadline = Instant::now() + timeout;
            loop {
                if child.try_wait()?.is_some() {
                    break;
                }
                if Instant::now() >= deadline {
                    child.kill()?;
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        }
        let output = child.wait_with_output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let code = output.status.code().unwrap_or(-1);

        if request.status_ok(code) {
            Ok(stdout)
        } else {
            Err(CampaignError::Execution {
                command: request.pretty_command(),
                code,
                output: stdout,
            })
        }
    }

    fn spawn_background(
        &self,
        request: &ExecRequest,
        stdout_path: &Path,
        stderr_path: &Path,
    ) -> Result<AsyncProcess> {
        debug!(command = %request.pretty_command(), "spawning in background");
        let cmd = Self::command(request)?;
        AsyncProcess::spawn(cmd, request.pretty_command(), stdout_path, stderr_path)
    }

    fn make_dirs(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn copy_to_host(&self, src: &Path, dst: &Path) -> Result<()> {
        copy_tree(src, dst)
    }

    fn remove_recursive(&self, path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_dir_all(path)?;
        }
        Ok(())
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Best-effort hostname of the local machine, used for result-file naming
/// and the automatic `hostname` constant column.
pub fn hostname() -> String {
    if let Ok(name) = fs::read_to_string("/proc/sys/kernel/hostname") {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
