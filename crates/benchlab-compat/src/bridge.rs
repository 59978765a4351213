//! Bridge from the staged contract onto the campaign engine's benchmark
//! trait.
//!
//! The bridge maps phases onto scheduler steps: `fetch` runs once during
//! bootstrap (its parameters must be single-valued in the campaign space),
//! `build` runs per build group with the fetch session, `run` per timed run
//! with the measured execution pipeline, and `collect` during output
//! parsing. Command attachments rely on asynchronous launches the staged
//! contract does not express, so campaigns that declare both are rejected
//! up front.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use benchlab_core::{CampaignError, Record, Result, VariableSpace};
use benchlab_runner::{
    Benchmark, BuildContext, Campaign, CampaignParams, CollectContext, CommandAttachment,
    ExecPipeline, Harness, PostRunHook, PreRunHook, RowFields, RunContext, RunOutcome,
};
use benchlab_shell::{CommandRunner, EnvMap, ExecRequest};
use benchlab_wrappers::{CommandWrapper, SharedLib};
use tracing::debug;

use crate::contract::{StageExec, StagedBenchmark, StepSession};
use crate::stepper;

/// Plain execution, used by every phase outside the timed run.
struct RawExec<'a> {
    runner: &'a dyn CommandRunner,
}

impl StageExec for RawExec<'_> {
    fn exec(&self, argv: &[String], cwd: Option<&Path>, env: &EnvMap) -> Result<String> {
        let mut request = ExecRequest::new(argv.to_vec());
        request.cwd = cwd.map(Path::to_path_buf);
        request.env = env.clone();
        self.runner.execute(&request)
    }
}

/// Execution inside the timed run: every command goes through the campaign's
/// wrapper and preload composition.
struct MeasuredExec<'a> {
    pipeline: &'a ExecPipeline<'a>,
    scope: &'a benchlab_core::RunScope,
}

impl StageExec for MeasuredExec<'_> {
    fn exec(&self, argv: &[String], cwd: Option<&Path>, env: &EnvMap) -> Result<String> {
        let mut request = ExecRequest::new(argv.to_vec());
        request.cwd = cwd.map(Path::to_path_buf);
        request.env = env.clone();
        match self.pipeline.run_bench_command(self.scope, request)? {
            RunOutcome::Sync(output) => Ok(output),
            RunOutcome::Async(_) => Err(CampaignError::config(
                "staged benchmarks cannot launch asynchronously",
            )),
        }
    }
}

/// A staged benchmark adapted to the campaign engine.
pub struct BridgedBenchmark {
    inner: Box<dyn StagedBenchmark>,
    runner: Arc<dyn CommandRunner>,
    fetch_session: Option<StepSession>,
    build_session: Option<StepSession>,
    run_session: Option<StepSession>,
    src_dir: Option<PathBuf>,
}

impl BridgedBenchmark {
    pub fn new(inner: Box<dyn StagedBenchmark>, runner: Arc<dyn CommandRunner>) -> BridgedBenchmark {
        BridgedBenchmark {
            inner,
            runner,
            fetch_session: None,
            build_session: None,
            run_session: None,
            src_dir: None,
        }
    }

    /// Run the fetch phase once, before the campaign starts. Fetch
    /// parameters may appear in the variable space only with a single
    /// candidate value: fetching happens before any point is enumerated, so
    /// varying them has no meaning.
    pub fn bootstrap(&mut self, space: &VariableSpace) -> Result<()> {
        let mut fetch_args = Record::new();
        for spec in self.inner.fetch_params() {
            if let Some(values) = space.get(&spec.name) {
                if values.len() != 1 {
                    return Err(CampaignError::config(format!(
                        "fetch parameter `{}` must be single-valued, got {} candidates",
                        spec.name,
                        values.len()
                    )));
                }
                fetch_args.insert(spec.name.clone(), values[0].clone());
            }
        }

        debug!(benchmark = self.inner.name(), "fetching sources");
        let exec = RawExec {
            runner: self.runner.as_ref(),
        };
        let session = stepper::fetch_step(self.inner.as_mut(), &fetch_args, &exec, None)?;
        self.src_dir = session.fetch.as_ref().and_then(|f| f.src_dir.clone());
        self.fetch_session = Some(session);
        Ok(())
    }

    fn scope_args(scope: &benchlab_core::RunScope) -> Record {
        let mut args = Record::new();
        for source in [
            &scope.other_vars,
            &scope.lib_vars,
            &scope.build_vars,
            &scope.run_vars,
        ] {
            for (name, value) in source.iter() {
                args.insert(name.clone(), value.clone());
            }
        }
        args
    }
}

impl Benchmark for BridgedBenchmark {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn bench_src_path(&self) -> Option<&Path> {
        self.src_dir.as_deref()
    }

    fn build_var_names(&self) -> Vec<String> {
        self.inner
            .build_params()
            .into_iter()
            .map(|spec| spec.name)
            .collect()
    }

    fn run_var_names(&self) -> Vec<String> {
        self.inner
            .run_params()
            .into_iter()
            .map(|spec| spec.name)
            .collect()
    }

    fn build(&mut self, build_vars: &Record, ctx: &BuildContext<'_>) -> Result<()> {
        let session = self
            .fetch_session
            .clone()
            .ok_or_else(|| CampaignError::config("bridged benchmark was not bootstrapped"))?;
        let exec = RawExec { runner: ctx.runner };
        let session =
            stepper::build_step(self.inner.as_mut(), session, build_vars, &exec, None)?;
        self.build_session = Some(session);
        Ok(())
    }

    fn single_run(&mut self, ctx: &RunContext<'_>) -> Result<RunOutcome> {
        let session = self
            .build_session
            .clone()
            .ok_or_else(|| CampaignError::config("staged run phase invoked before build"))?;
        let exec = MeasuredExec {
            pipeline: ctx.exec,
            scope: ctx.scope,
        };
        let session = stepper::run_step(
            self.inner.as_mut(),
            session,
            &Self::scope_args(ctx.scope),
            &exec,
            ctx.scope.record_data_dir.as_deref(),
            ctx.duration_s,
        )?;
        let stdout = session
            .run
            .as_ref()
            .map(|run| run.final_stdout().to_string())
            .unwrap_or_default();
        self.run_session = Some(session);
        Ok(RunOutcome::Sync(stdout))
    }

    fn parse_output(&mut self, _output: &str, ctx: &CollectContext<'_>) -> Result<Vec<RowFields>> {
        let session = self
            .run_session
            .clone()
            .ok_or_else(|| CampaignError::config("staged collect phase invoked before run"))?;
        let exec = RawExec { runner: ctx.runner };
        let rows = stepper::collect_step(
            self.inner.as_mut(),
            &session,
            &Self::scope_args(ctx.scope),
            &exec,
            ctx.scope.record_data_dir.as_deref(),
            ctx.duration_s,
        )?;

        // Fields carried by the earlier phases land under the collected
        // fields; later phases win on name conflicts.
        let mut base = Record::new();
        if let Some(fetch) = &session.fetch {
            for (name, value) in &fetch.data {
                base.insert(name.clone(), value.clone());
            }
        }
        if let Some(build) = &session.build {
            for (name, value) in &build.data {
                base.insert(name.clone(), value.clone());
            }
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let mut line = base.clone();
                for (name, value) in row {
                    line.insert(name, value);
                }
                line
            })
            .collect())
    }
}

/// Extras attached to a staged campaign. Attachments are listed here only to
/// be rejected with a clear error instead of silently never firing.
#[derive(Default)]
pub struct BridgeSetup {
    pub wrappers: Vec<Box<dyn CommandWrapper>>,
    pub shared_libs: Vec<Box<dyn SharedLib>>,
    pub pre_run_hooks: Vec<Box<dyn PreRunHook>>,
    pub post_run_hooks: Vec<Box<dyn PostRunHook>>,
    pub attachments: Vec<Box<dyn CommandAttachment>>,
}

/// Build a Cartesian-product campaign around a staged benchmark: bootstrap
/// the fetch phase, then wire the bridged benchmark into a harness.
pub fn staged_campaign(
    name: impl Into<String>,
    staged: Box<dyn StagedBenchmark>,
    runner: Arc<dyn CommandRunner>,
    space: &VariableSpace,
    setup: BridgeSetup,
    params: CampaignParams,
) -> Result<Campaign> {
    if !setup.attachments.is_empty() {
        return Err(CampaignError::config(
            "command attachments are not supported with staged benchmarks",
        ));
    }

    let mut bridged = BridgedBenchmark::new(staged, Arc::clone(&runner));
    bridged.bootstrap(space)?;

    let harness = Harness::new(Box::new(bridged), runner)
        .with_command_wrappers(setup.wrappers)
        .with_shared_libs(setup.shared_libs)
        .with_pre_run_hooks(setup.pre_run_hooks)
        .with_post_run_hooks(setup.post_run_hooks);

    Campaign::cartesian_product(name, harness, space, params)
}
