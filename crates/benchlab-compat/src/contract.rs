//! The staged benchmark contract.
//!
//! A staged benchmark splits its life cycle into four explicit phases:
//! `fetch` (acquire sources or data, once per campaign), `build` (once per
//! build group), `run` (once per timed run) and `collect` (turn the run into
//! result fields). Each phase declares the parameters it consumes up front,
//! so the engine can validate a campaign's variable space before anything
//! executes, and each phase receives the accumulated outputs of the phases
//! before it through a [`StepSession`].

use std::path::{Path, PathBuf};

use benchlab_core::{Record, Result, Value};
use benchlab_shell::EnvMap;

/// One declared parameter of a phase.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    /// Value bound when the campaign does not provide the parameter;
    /// parameters without a default are required.
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>) -> ParamSpec {
        ParamSpec {
            name: name.into(),
            default: None,
        }
    }

    pub fn with_default(name: impl Into<String>, default: Value) -> ParamSpec {
        ParamSpec {
            name: name.into(),
            default: Some(default),
        }
    }
}

/// What `fetch` produced: the source checkout (if any) and fields carried
/// into every result row.
#[derive(Debug, Clone, Default)]
pub struct FetchOutput {
    pub src_dir: Option<PathBuf>,
    pub data: Record,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub data: Record,
}

/// One command execution inside the run phase.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunPhaseOutput {
    pub executions: Vec<ExecOutput>,
}

impl RunPhaseOutput {
    pub fn from_stdout(stdout: String) -> RunPhaseOutput {
        RunPhaseOutput {
            executions: vec![ExecOutput { stdout }],
        }
    }

    /// Stdout of the last execution; the scheduler treats it as the run's
    /// output.
    pub fn final_stdout(&self) -> &str {
        self.executions
            .last()
            .map(|e| e.stdout.as_str())
            .unwrap_or("")
    }
}

/// Phase outputs accumulated so far, threaded from one phase to the next.
#[derive(Debug, Clone, Default)]
pub struct StepSession {
    pub fetch: Option<FetchOutput>,
    pub build: Option<BuildOutput>,
    pub run: Option<RunPhaseOutput>,
}

/// The command primitive a phase executes through. During the run phase it
/// is the measured pipeline (wrappers and preloads applied); elsewhere it is
/// the plain execution backend. Commands issued through any other channel
/// bypass the campaign's composition.
pub trait StageExec {
    fn exec(&self, argv: &[String], cwd: Option<&Path>, env: &EnvMap) -> Result<String>;
}

pub struct StageContext<'a> {
    pub exec: &'a dyn StageExec,
    /// Declared parameters bound for this phase, defaults included.
    pub args: &'a Record,
    /// The subset of `args` that came from declared defaults.
    pub defaults_used: &'a Record,
    pub record_dir: Option<&'a Path>,
    pub duration_s: Option<u64>,
    pub session: &'a StepSession,
}

pub trait StagedBenchmark: Send {
    fn name(&self) -> &str;

    fn fetch_params(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    fn build_params(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    fn run_params(&self) -> Vec<ParamSpec>;

    fn collect_params(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    fn fetch(&mut self, _ctx: &StageContext<'_>) -> Result<FetchOutput> {
        Ok(FetchOutput::default())
    }

    fn build(&mut self, _ctx: &StageContext<'_>) -> Result<BuildOutput> {
        Ok(BuildOutput::default())
    }

    fn run(&mut self, ctx: &StageContext<'_>) -> Result<RunPhaseOutput>;

    /// Result rows for one run. The default keeps the parameter columns
    /// only.
    fn collect(&mut self, _ctx: &StageContext<'_>) -> Result<Vec<Record>> {
        Ok(vec![Record::new()])
    }
}
