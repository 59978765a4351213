//! Campaign scheduler: drives a configured benchmark through every parameter
//! point, repetition by repetition, writing result rows as they appear.
//!
//! Ordering rules the rest of the system depends on:
//! - points run in declared record order, grouped so each distinct
//!   build-variable projection builds exactly once;
//! - within a point, repetitions run 1..=nb_runs, and an invalid full row
//!   stops the remaining repetitions of that point only;
//! - rows are appended as soon as a run finishes, so an interrupted campaign
//!   keeps everything it completed.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use benchlab_core::{
    display_value, group_by_build_vars, partition, seconds_pretty, CampaignError, Record, Result,
    RunScope, VariableNameSets,
};
use benchlab_shell::{CommandRunner, ExecRequest};
use benchlab_wrappers::{CommandWrapper, SharedLib};
use chrono::{DateTime, Local};
use serde_json::json;
use tracing::{debug, info};

use crate::barrier::StartBarrier;
use crate::benchmark::{
    Benchmark, CollectContext, CommandAttachment, PostRunHook, PreRunHook, RunContext, RunOutcome,
};
use crate::cache::{self, CachedRow};
use crate::pipeline::ExecPipeline;
use crate::sink::{write_record_file, ResultSink, CSV_SEPARATOR};

/// Pretty-translation tables: variable name -> rendered value -> label.
pub type PrettyTables = BTreeMap<String, BTreeMap<String, String>>;

/// Everything a campaign fixes before running.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub experiment_name: String,
    pub csv_output_path: PathBuf,
    /// Root of the per-run record directories; `None` disables them.
    pub base_data_dir: Option<PathBuf>,
    pub benchmark_duration_seconds: Option<u64>,
    pub nb_runs: usize,
    pub constants: Record,
    pub variables: Vec<Record>,
    pub pretty: PrettyTables,
    pub debug: bool,
    /// Upper bound on per-thread result columns; defaults to four times the
    /// CPU count to allow over-subscription.
    pub max_threads: Option<usize>,
}

impl RunConfig {
    fn max_thread_columns(&self) -> usize {
        self.max_threads.unwrap_or_else(|| {
            4 * std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Unconfigured,
    Configured,
    Done,
}

/// Owns the benchmark plus its configured wrappers, shared libraries, hooks
/// and execution backend. One-shot: configure once, run once.
pub struct Harness {
    bench: Box<dyn Benchmark>,
    runner: Arc<dyn CommandRunner>,
    wrappers: Vec<Box<dyn CommandWrapper>>,
    shared_libs: Vec<Box<dyn SharedLib>>,
    pre_run_hooks: Vec<Box<dyn PreRunHook>>,
    post_run_hooks: Vec<Box<dyn PostRunHook>>,
    attachments: Vec<Box<dyn CommandAttachment>>,
    config: Option<RunConfig>,
    state: EngineState,
    total_runs: Option<usize>,
}

impl Harness {
    pub fn new(bench: Box<dyn Benchmark>, runner: Arc<dyn CommandRunner>) -> Harness {
        Harness {
            bench,
            runner,
            wrappers: Vec::new(),
            shared_libs: Vec::new(),
            pre_run_hooks: Vec::new(),
            post_run_hooks: Vec::new(),
            attachments: Vec::new(),
            config: None,
            state: EngineState::Unconfigured,
            total_runs: None,
        }
    }

    pub fn with_command_wrappers(mut self, wrappers: Vec<Box<dyn CommandWrapper>>) -> Harness {
        self.wrappers = wrappers;
        self
    }

    pub fn with_shared_libs(mut self, shared_libs: Vec<Box<dyn SharedLib>>) -> Harness {
        self.shared_libs = shared_libs;
        self
    }

    pub fn with_pre_run_hooks(mut self, hooks: Vec<Box<dyn PreRunHook>>) -> Harness {
        self.pre_run_hooks = hooks;
        self
    }

    pub fn with_post_run_hooks(mut self, hooks: Vec<Box<dyn PostRunHook>>) -> Harness {
        self.post_run_hooks = hooks;
        self
    }

    pub fn with_command_attachments(
        mut self,
        attachments: Vec<Box<dyn CommandAttachment>>,
    ) -> Harness {
        self.attachments = attachments;
        self
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Bind the campaign parameters. Rejected once already configured: the
    /// scheduler is one-shot and silently rebinding half-way would corrupt
    /// the result file.
    pub fn configure(&mut self, config: RunConfig) -> Result<()> {
        if self.state != EngineState::Unconfigured {
            return Err(CampaignError::config("harness is already configured"));
        }
        self.config = Some(config);
        self.state = EngineState::Configured;
        Ok(())
    }

    fn config(&self) -> Result<&RunConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| CampaignError::config("harness must be configured first"))
    }

    /// Number of runs the campaign will perform: valid parameter points
    /// times repetitions. Memoized, it is queried once per run for progress
    /// reporting.
    pub fn total_nb_runs(&mut self) -> Result<usize> {
        if let Some(total) = self.total_runs {
            return Ok(total);
        }
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| CampaignError::config("harness must be configured first"))?;
        let total = count_total_runs(self.bench.as_ref(), config);
        self.total_runs = Some(total);
        Ok(total)
    }

    pub fn expected_total_duration_seconds(&mut self) -> Result<Option<u64>> {
        let duration = self.config()?.benchmark_duration_seconds;
        let total = self.total_nb_runs()?;
        Ok(duration.map(|d| d * total as u64))
    }

    /// Run the whole campaign. `other_campaigns_seconds` feeds the remaining
    /// suite time into the progress estimate; the optional barrier aligns
    /// the start of every timed run across parallel campaigns; `continuing`
    /// enables the result cache.
    pub fn run(
        &mut self,
        other_campaigns_seconds: u64,
        barrier: Option<&StartBarrier>,
        continuing: bool,
    ) -> Result<()> {
        match self.state {
            EngineState::Configured => {}
            EngineState::Unconfigured => {
                return Err(CampaignError::config("harness must be configured first"))
            }
            EngineState::Done => {
                return Err(CampaignError::config("campaign has already run"))
            }
        }
        let total = self.total_nb_runs()?;
        self.state = EngineState::Done;
        self.run_inner(other_campaigns_seconds, barrier, continuing, total)
    }

    fn run_inner(
        &mut self,
        other_campaigns_seconds: u64,
        barrier: Option<&StartBarrier>,
        continuing: bool,
        total: usize,
    ) -> Result<()> {
        let Harness {
            bench,
            runner,
            wrappers,
            shared_libs,
            pre_run_hooks,
            post_run_hooks,
            attachments,
            config,
            ..
        } = self;
        let config = config
            .as_ref()
            .ok_or_else(|| CampaignError::config("harness must be configured first"))?;

        let name_sets = VariableNameSets {
            build: bench.build_var_names(),
            run: bench.run_var_names(),
            lib: shared_libs
                .iter()
                .flat_map(|lib| lib.rebuild_var_names())
                .collect(),
        };

        for shared_lib in shared_libs.iter() {
            shared_lib.configure()?;
        }

        let build_ctx = crate::benchmark::BuildContext {
            runner: runner.as_ref(),
            constants: &config.constants,
            duration_s: config.benchmark_duration_seconds,
        };
        let prebuild_seconds = bench.prebuild(&build_ctx)?;

        let expected_seconds = config.benchmark_duration_seconds.map(|d| d * total as u64);
        info!(
            total_runs = total,
            expected_seconds = expected_seconds,
            "campaign starting"
        );

        let sink = ResultSink::new(&config.csv_output_path);
        let start_time = Local::now();
        let timer = Instant::now();

        let (mut executions, print_comments_header) = if continuing {
            cache::load_execution_set(&config.csv_output_path)?
        } else {
            (Vec::new(), true)
        };

        if print_comments_header {
            write_metadata_header(
                &sink,
                bench.as_ref(),
                runner.as_ref(),
                config,
                &start_time,
                expected_seconds,
            )?;
            if let Some(seconds) = prebuild_seconds {
                sink.comment(&format!("prebuild_duration_seconds: {seconds}"))?;
                sink.comment(&format!(
                    "prebuild_duration_pretty: {}",
                    seconds_pretty(seconds)
                ))?;
            }
        }

        let mut progress = Progress {
            total,
            done: 0,
            first_line_printed: false,
        };

        // Libraries with variables baked into their binary rebuild once per
        // distinct combination, before any benchmark build group runs.
        for shared_lib in shared_libs.iter() {
            let rebuild_names = shared_lib.rebuild_var_names();
            if rebuild_names.is_empty() {
                continue;
            }
            shared_lib.clean()?;
            for lib_group in group_by_build_vars(&rebuild_names, &config.variables) {
                shared_lib.rebuild(&lib_group.build_vars)?;
            }
        }

        let env = RunEnv {
            config,
            name_sets: &name_sets,
            runner,
            wrappers,
            shared_libs,
            attachments,
            pre_run_hooks,
            post_run_hooks,
            sink: &sink,
            barrier,
            continuing,
            other_campaigns_seconds,
        };

        let groups = group_by_build_vars(&name_sets.build, &config.variables);
        for group in &groups {
            if !bench.valid_parameters(&group.build_vars) {
                debug!(build_vars = ?group.build_vars, "invalid build projection, skipping group");
                continue;
            }
            bench.clean(&build_ctx)?;
            bench.build(&group.build_vars, &build_ctx)?;

            for record in &group.members {
                cache::retain_parameter_keys(&mut executions, record, &config.constants);
                run_point(bench.as_mut(), &env, record, &executions, &mut progress)?;
            }
        }

        let total_duration = timer.elapsed().as_secs_f64();
        sink.comment(&format!("total_duration_seconds: {total_duration}"))?;
        sink.comment(&format!(
            "total_duration_pretty: {}",
            seconds_pretty(total_duration)
        ))?;

        info!(
            results = %config.csv_output_path.display(),
            runs_done = progress.done,
            "campaign done"
        );
        Ok(())
    }
}

struct Progress {
    total: usize,
    done: usize,
    /// Shared between the header writer and the resume marker: once set,
    /// neither is emitted again.
    first_line_printed: bool,
}

struct RunEnv<'a> {
    config: &'a RunConfig,
    name_sets: &'a VariableNameSets,
    runner: &'a Arc<dyn CommandRunner>,
    wrappers: &'a [Box<dyn CommandWrapper>],
    shared_libs: &'a [Box<dyn SharedLib>],
    attachments: &'a [Box<dyn CommandAttachment>],
    pre_run_hooks: &'a [Box<dyn PreRunHook>],
    post_run_hooks: &'a [Box<dyn PostRunHook>],
    sink: &'a ResultSink,
    barrier: Option<&'a StartBarrier>,
    continuing: bool,
    other_campaigns_seconds: u64,
}

fn count_total_runs(bench: &dyn Benchmark, config: &RunConfig) -> usize {
    let valid_points = config
        .variables
        .iter()
        .filter(|record| bench.valid_parameters(record))
        .count();
    valid_points * config.nb_runs
}

/// All repetitions of one parameter point.
fn run_point(
    bench: &mut dyn Benchmark,
    env: &RunEnv<'_>,
    record: &Record,
    executions: &[CachedRow],
    progress: &mut Progress,
) -> Result<()> {
    let split = partition(record, env.name_sets);
    let rep_digits = env.config.nb_runs.to_string().len();

    for rep in 1..=env.config.nb_runs {
        let record_data_dir = record_data_dir(env.config, record, rep, rep_digits)?;

        let mut row = Record::new();
        row.insert("experiment_name".into(), json!(env.config.experiment_name));
        row.insert("benchmark_name".into(), json!(bench.name()));
        for (name, value) in &env.config.constants {
            row.insert(name.clone(), value.clone());
        }
        for source in [&split.build, &split.run, &split.lib, &split.other] {
            for (name, value) in source {
                row.insert(name.clone(), value.clone());
            }
        }

        let mut pretty_columns: Vec<(String, String)> = Vec::new();
        for (var, table) in &env.config.pretty {
            if let Some(value) = row.get(var) {
                let rendered = display_value(value);
                let label = table.get(&rendered).cloned().unwrap_or(rendered);
                pretty_columns.push((format!("{var}_pretty"), format!("\"{label}\"")));
            }
        }
        for (name, label) in pretty_columns {
            row.insert(name, json!(label));
        }
        row.insert("rep".into(), json!(rep));

        // Validity is re-checked on the full row: a point can become invalid
        // only together with its constants, and then all remaining
        // repetitions of this point are pointless too.
        if !bench.valid_parameters(&row) {
            debug!(rep, "parameter point invalid, stopping its repetitions");
            break;
        }

        log_progress(
            progress,
            env.config.benchmark_duration_seconds,
            env.other_campaigns_seconds,
        );

        let candidate: CachedRow = row
            .iter()
            .map(|(name, value)| (name.clone(), display_value(value)))
            .collect();
        if env.continuing && cache::is_cached(&candidate, executions) {
            info!("run already in the result file, skipping");
            progress.done += 1;
            if !progress.first_line_printed {
                progress.first_line_printed = true;
                env.sink.comment("Continuing campaign execution")?;
            }
            continue;
        }

        // On a remote target, wrappers write their files into a local
        // scratch tree that is copied back once the run finishes.
        let effective_dir = match &record_data_dir {
            Some(dir) if !env.runner.is_local() => {
                let staged = staged_record_dir(dir);
                env.runner.make_dirs(&staged)?;
                Some(staged)
            }
            other => other.clone(),
        };

        let scope = RunScope {
            build_vars: split.build.clone(),
            run_vars: split.run.clone(),
            lib_vars: split.lib.clone(),
            other_vars: split.other.clone(),
            record_data_dir: effective_dir.clone(),
        };

        for hook in env.pre_run_hooks {
            hook.before_run(&scope)?;
        }

        if let Some(barrier) = env.barrier {
            if barrier.wait() {
                barrier.reset();
            }
        }

        let pipeline = ExecPipeline {
            runner: env.runner.as_ref(),
            wrappers: env.wrappers,
            shared_libs: env.shared_libs,
            asynchronous: !env.attachments.is_empty(),
            debug: env.config.debug,
        };
        let run_ctx = RunContext {
            scope: &scope,
            constants: &env.config.constants,
            duration_s: env.config.benchmark_duration_seconds,
            exec: &pipeline,
        };
        let outcome = bench.single_run(&run_ctx)?;

        let output = match outcome {
            RunOutcome::Sync(output) => output,
            RunOutcome::Async(mut process) => {
                for attachment in env.attachments {
                    attachment.attach(&mut process, record_data_dir.as_deref())?;
                }
                process.output()?
            }
        };

        if !env.runner.is_local() {
            if let (Some(staged), Some(canonical)) = (&effective_dir, &record_data_dir) {
                env.runner.copy_to_host(staged, canonical)?;
                env.runner.remove_recursive(&scratch_prefix())?;
            }
        }

        let mut collect_scope = scope.clone();
        collect_scope.record_data_dir = record_data_dir.clone();
        let collect_ctx = CollectContext {
            scope: &collect_scope,
            runner: env.runner.as_ref(),
            duration_s: env.config.benchmark_duration_seconds,
        };
        let parsed = bench.parse_output(&output, &collect_ctx)?;
        progress.done += 1;

        let mut lines: Vec<Record> = parsed
            .into_iter()
            .map(|fields| {
                let mut line = row.clone();
                for (name, value) in fields {
                    line.insert(name, value);
                }
                line
            })
            .collect();

        for hook in env.post_run_hooks {
            if let Some(extra) = hook.after_run(&lines, record_data_dir.as_deref())? {
                for line in &mut lines {
                    for (name, value) in &extra {
                        line.insert(name.clone(), value.clone());
                    }
                }
            }
        }

        write_record_file(
            record_data_dir.as_deref(),
            "experiment_results.json",
            &format!("{}\n", serde_json::to_string_pretty(&lines)?),
        )?;

        for line in &lines {
            if !progress.first_line_printed {
                env.sink
                    .line(&padded_header(line, env.config.max_thread_columns()))?;
                progress.first_line_printed = true;
            }
            let cells: Vec<String> = line.values().map(display_value).collect();
            env.sink.line(&cells.join(CSV_SEPARATOR))?;
        }
    }

    Ok(())
}

fn record_data_dir(
    config: &RunConfig,
    record: &Record,
    rep: usize,
    rep_digits: usize,
) -> Result<Option<PathBuf>> {
    let Some(base) = &config.base_data_dir else {
        return Ok(None);
    };
    let mut dir = base.clone();
    for (name, value) in record {
        dir.push(format!("{name}-{}", display_value(value)));
    }
    dir.push(format!("run-{rep:0rep_digits$}"));
    fs::create_dir_all(&dir)?;
    Ok(Some(dir))
}

fn scratch_prefix() -> PathBuf {
    PathBuf::from("/tmp/benchlab_record")
}

fn staged_record_dir(record_data_dir: &std::path::Path) -> PathBuf {
    let relative = record_data_dir
        .strip_prefix("/")
        .unwrap_or(record_data_dir);
    scratch_prefix().join(relative)
}

/// The one-time column header; existing `thread_N` columns are padded up to
/// the configured bound so later rows with more threads still fit.
fn padded_header(line: &Record, max_threads: usize) -> String {
    let mut columns: Vec<String> = line.keys().cloned().collect();
    let current_max = line
        .keys()
        .filter_map(|c| c.strip_prefix("thread_")?.parse::<usize>().ok())
        .max();
    if let Some(current_max) = current_max {
        for t in current_max + 1..max_threads {
            columns.push(format!("thread_{t}"));
        }
    }
    columns.join(CSV_SEPARATOR)
}

fn log_progress(progress: &Progress, duration_s: Option<u64>, other_campaigns_seconds: u64) {
    match duration_s {
        Some(duration) => {
            let remaining = (progress.total - progress.done) as u64 * duration;
            let full_remaining = remaining + other_campaigns_seconds;
            info!(
                run = progress.done + 1,
                total = progress.total,
                remaining_pretty = %seconds_pretty(remaining as f64),
                suite_remaining_pretty = %seconds_pretty(full_remaining as f64),
                "starting run"
            );
        }
        None => info!(run = progress.done + 1, total = progress.total, "starting run"),
    }
}

fn write_metadata_header(
    sink: &ResultSink,
    bench: &dyn Benchmark,
    runner: &dyn CommandRunner,
    config: &RunConfig,
    start_time: &DateTime<Local>,
    expected_seconds: Option<u64>,
) -> Result<()> {
    sink.comment(&format!(
        "benchmark_campaign_name: {}",
        config.experiment_name
    ))?;
    sink.comment(&format!(
        "benchmark_duration_seconds: {}",
        config
            .benchmark_duration_seconds
            .map_or("None".to_string(), |d| d.to_string())
    ))?;
    sink.comment(&format!("nb_runs: {}", config.nb_runs))?;
    sink.comment(&format!("date: {}", start_time.format("%Y-%m-%d %H:%M:%S%.6f %z")))?;
    sink.comment(&format!("date_val: {}", start_time.format("%Y%m%d_%H%M%S")))?;

    if let Some(src) = bench.bench_src_path() {
        let branch = git_output(runner, src, &["rev-parse", "--abbrev-ref", "HEAD"]);
        let sha = git_output(runner, src, &["rev-parse", "HEAD"]);
        sink.comment(&format!("git_branch: {branch}"))?;
        sink.comment(&format!("git_sha: {sha}"))?;
    }

    let kernel = runner
        .execute(&ExecRequest::new(vec!["uname".into(), "-a".into()]))
        .map(|out| out.trim().to_string())
        .unwrap_or_else(|_| "N/A".to_string());
    sink.comment(&format!("kernel: {kernel}"))?;

    if let Some(expected) = expected_seconds {
        sink.comment(&format!("expected_duration_seconds: {expected}"))?;
        sink.comment(&format!(
            "expected_duration_pretty: {}",
            seconds_pretty(expected as f64)
        ))?;
    }
    Ok(())
}

fn git_output(runner: &dyn CommandRunner, src: &std::path::Path, args: &[&str]) -> String {
    if !src.exists() {
        return "N/A".to_string();
    }
    let mut argv = vec!["git".to_string()];
    argv.extend(args.iter().map(|a| a.to_string()));
    let mut request = ExecRequest::new(argv);
    request.cwd = Some(src.to_path_buf());
    match runner.execute(&request) {
        Ok(output) => output.trim().to_string(),
        Err(_) => "N/A".to_string(),
    }
}
