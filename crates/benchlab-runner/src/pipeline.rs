//! Command composition applied to every measured benchmark command.
//!
//! The pipeline folds the shared-library preload environment and the
//! declared wrapper chain over the benchmark's raw command, then dispatches
//! to the execution backend: blocking for plain runs, detached when command
//! attachments are configured, or a debug escape hatch that prepares a gdb
//! session instead of measuring anything.

use std::fs;
use std::path::PathBuf;

use benchlab_core::{CampaignError, Result, RunScope};
use benchlab_shell::{CommandRunner, EnvMap, ExecRequest};
use benchlab_wrappers::{preload_environment, wrap_command, CommandWrapper, SharedLib};
use tracing::info;

use crate::benchmark::RunOutcome;

pub struct ExecPipeline<'a> {
    pub(crate) runner: &'a dyn CommandRunner,
    pub(crate) wrappers: &'a [Box<dyn CommandWrapper>],
    pub(crate) shared_libs: &'a [Box<dyn SharedLib>],
    pub(crate) asynchronous: bool,
    pub(crate) debug: bool,
}

impl<'a> ExecPipeline<'a> {
    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner
    }

    /// Fold the preload environment and the wrapper chain over a raw command.
    /// Preload entries override same-named entries of the base environment;
    /// the wrapper chain then sees the merged result.
    pub fn compose(
        &self,
        argv: Vec<String>,
        base_env: EnvMap,
        scope: &RunScope,
    ) -> (Vec<String>, EnvMap) {
        let mut env = base_env;
        for (name, value) in preload_environment(self.shared_libs, scope) {
            env.insert(name, value);
        }
        wrap_command(self.wrappers, argv, env, scope)
    }

    /// Run one measured benchmark command. The request carries the raw argv
    /// and base environment; composition happens here so a benchmark cannot
    /// accidentally bypass the configured wrappers.
    pub fn run_bench_command(
        &self,
        scope: &RunScope,
        mut request: ExecRequest,
    ) -> Result<RunOutcome> {
        if self.debug {
            return self.debug_session(scope, &request);
        }

        let (argv, env) = self.compose(
            std::mem::take(&mut request.argv),
            std::mem::take(&mut request.env),
            scope,
        );
        request.argv = argv;
        request.env = env;

        if self.asynchronous {
            let dir = scope
                .record_data_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir);
            let stdout_path = dir.join("cmd_stdout.txt");
            let stderr_path = dir.join("cmd_stderr.txt");
            let process = self
                .runner
                .spawn_background(&request, &stdout_path, &stderr_path)?;
            Ok(RunOutcome::Async(process))
        } else {
            Ok(RunOutcome::Sync(self.runner.execute(&request)?))
        }
    }

    /// Write a gdb script reproducing the unwrapped command, then abort the
    /// campaign. Wrappers are deliberately left out so the debugged process
    /// is the plain benchmark.
    fn debug_session(&self, scope: &RunScope, request: &ExecRequest) -> Result<RunOutcome> {
        let dir: PathBuf = request
            .cwd
            .clone()
            .or_else(|| scope.record_data_dir.clone())
            .unwrap_or_else(std::env::temp_dir);
        fs::create_dir_all(&dir)?;

        let mut script = String::new();
        for (name, value) in &request.env {
            script.push_str(&format!("set environment {name} {value}\n"));
        }
        if let Some(program) = request.argv.first() {
            script.push_str(&format!("file {program}\n"));
        }
        if request.argv.len() > 1 {
            script.push_str(&format!("set args {}\n", request.argv[1..].join(" ")));
        }
        fs::write(dir.join(".gdbinit"), script)?;

        info!(
            dir = %dir.display(),
            "gdb script written; cd there and launch `gdb` to reproduce the session"
        );
        Err(CampaignError::DebugSessionDone)
    }
}
