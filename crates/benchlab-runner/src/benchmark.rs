//! The benchmark contract and its per-phase contexts.

use std::path::Path;

use benchlab_core::{Record, Result, RunScope};
use benchlab_shell::{AsyncProcess, CommandRunner};

use crate::pipeline::ExecPipeline;

/// Fields parsed out of one result row, merged over the parameter skeleton.
pub type RowFields = Record;

/// What a single run produced: a finished command's output, or a live
/// process handle when command attachments are configured.
#[derive(Debug)]
pub enum RunOutcome {
    Sync(String),
    Async(AsyncProcess),
}

/// Context for the build-side phases (prebuild, clean, build).
pub struct BuildContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub constants: &'a Record,
    /// Intended duration of a single timed run, when the campaign fixes one.
    pub duration_s: Option<u64>,
}

/// Context for a single timed run. Commands meant to be measured go through
/// [`RunContext::exec`], which applies the configured shared-library preloads
/// and command wrappers.
pub struct RunContext<'a> {
    pub scope: &'a RunScope,
    pub constants: &'a Record,
    pub duration_s: Option<u64>,
    pub exec: &'a ExecPipeline<'a>,
}

/// Context for output parsing, after any remote artifacts have been staged
/// back. The record directory in `scope` is the canonical local one.
pub struct CollectContext<'a> {
    pub scope: &'a RunScope,
    pub runner: &'a dyn CommandRunner,
    pub duration_s: Option<u64>,
}

/// A parametrized benchmark.
///
/// The scheduler drives this through a fixed sequence: `prebuild` once, then
/// per build group `clean` + `build`, then per parameter point and repetition
/// `single_run` + `parse_output`. Variables a benchmark declares as build
/// variables select the build grouping; run variables reach `single_run`
/// through the scope; everything else rides along as "other" variables.
pub trait Benchmark: Send {
    fn name(&self) -> &str;

    /// Source checkout of the benchmark, for provenance metadata.
    fn bench_src_path(&self) -> Option<&Path> {
        None
    }

    fn build_var_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn run_var_names(&self) -> Vec<String>;

    /// Whether a parameter point is worth executing. Called on the build
    /// projection before building a group, and on the full row (constants
    /// and repetition included) before each run.
    fn valid_parameters(&self, _point: &Record) -> bool {
        true
    }

    /// Build step independent of the build variables, run once per campaign.
    /// Returns how long it took when the campaign should record it.
    fn prebuild(&mut self, _ctx: &BuildContext<'_>) -> Result<Option<f64>> {
        Ok(None)
    }

    fn clean(&mut self, _ctx: &BuildContext<'_>) -> Result<()> {
        Ok(())
    }

    fn build(&mut self, _build_vars: &Record, _ctx: &BuildContext<'_>) -> Result<()> {
        Ok(())
    }

    fn single_run(&mut self, ctx: &RunContext<'_>) -> Result<RunOutcome>;

    /// Turn one run's raw output into result rows. Zero rows means the run
    /// contributes nothing to the result file; several rows all share the
    /// run's parameter columns.
    fn parse_output(&mut self, output: &str, ctx: &CollectContext<'_>) -> Result<Vec<RowFields>>;
}

/// Runs before each timed run, once the scope (and record directory) for the
/// run is known. Failing the hook aborts the campaign.
pub trait PreRunHook: Send + Sync {
    fn before_run(&self, scope: &RunScope) -> Result<()>;
}

impl<F> PreRunHook for F
where
    F: Fn(&RunScope) -> Result<()> + Send + Sync,
{
    fn before_run(&self, scope: &RunScope) -> Result<()> {
        self(scope)
    }
}

/// Runs after parsing; may return extra fields merged into every row of the
/// run.
pub trait PostRunHook: Send + Sync {
    fn after_run(
        &self,
        rows: &[RowFields],
        record_data_dir: Option<&Path>,
    ) -> Result<Option<RowFields>>;
}

impl<F> PostRunHook for F
where
    F: Fn(&[RowFields], Option<&Path>) -> Result<Option<RowFields>> + Send + Sync,
{
    fn after_run(
        &self,
        rows: &[RowFields],
        record_data_dir: Option<&Path>,
    ) -> Result<Option<RowFields>> {
        self(rows, record_data_dir)
    }
}

/// Operates on the live benchmark process while it runs. Declaring at least
/// one attachment switches the benchmark launch to asynchronous mode.
pub trait CommandAttachment: Send + Sync {
    fn attach(&self, process: &mut AsyncProcess, record_data_dir: Option<&Path>) -> Result<()>;
}

impl<F> CommandAttachment for F
where
    F: Fn(&mut AsyncProcess, Option<&Path>) -> Result<()> + Send + Sync,
{
    fn attach(&self, process: &mut AsyncProcess, record_data_dir: Option<&Path>) -> Result<()> {
        self(process, record_data_dir)
    }
}
