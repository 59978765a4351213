//! Handle for a detached, still-running benchmark process.
//!
//! A benchmark with command attachments runs asynchronously: the launch call
//! returns an [`AsyncProcess`] immediately, attachments operate on the live
//! handle, and the scheduler drains the final output afterwards through
//! [`AsyncProcess::output`]. Stdout and stderr are redirected to files in the
//! run's record directory so attachments can inspect them mid-flight.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use benchlab_core::{CampaignError, Result};

#[derive(Debug)]
pub struct AsyncProcess {
    child: Child,
    command: String,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
    exit_code: Option<i32>,
}

impl AsyncProcess {
    pub(crate) fn spawn(
        mut cmd: Command,
        command: String,
        stdout_path: &Path,
        stderr_path: &Path,
    ) -> Result<AsyncProcess> {
        if let Some(parent) = stdout_path.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Some(parent) = stderr_path.parent() {
            fs::create_dir_all(parent)?;
        }
        cmd.stdout(File::create(stdout_path)?);
        cmd.stderr(File::create(stderr_path)?);
        let child = cmd.spawn()?;
        Ok(AsyncProcess {
            child,
            command,
            stdout_path: stdout_path.to_path_buf(),
            stderr_path: stderr_path.to_path_buf(),
            exit_code: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// The command line this process was launched with.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn stdout_path(&self) -> &Path {
        &self.stdout_path
    }

    pub fn stderr_path(&self) -> &Path {
        &self.stderr_path
    }

    /// Whether the process is still running.
    pub fn is_running(&mut self) -> Result<bool> {
        if self.exit_code.is_some() {
            return Ok(false);
        }
        match self.child.try_wait()? {
            Some(status) => {
                self.exit_code = Some(status.code().unwrap_or(-1));
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Terminate the process if it is still alive.
    pub fn kill(&mut self) -> Result<()> {
        if self.is_running()? {
            self.child.kill()?;
        }
        Ok(())
    }

    /// Block until exit and return the exit code.
    pub fn wait(&mut self) -> Result<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }
        let status = self.child.wait()?;
        let code = status.code().unwrap_or(-1);
        self.exit_code = Some(code);
        Ok(code)
    }

    /// Block until exit and return the captured stdout. A non-zero exit is
    /// fatal here; attachments that expect failures should wait and inspect
    /// the files themselves.
    pub fn output(&mut self) -> Result<String> {
        let code = self.wait()?;
        let stdout = fs::read_to_string(&self.stdout_path)?;
        if code == 0 {
            Ok(stdout)
        } else {
            Err(CampaignError::Execution {
                command: self.command.clone(),
                code,
                output: stdout,
            })
        }
    }
}
