//! Campaign construction and suite coordination.
//!
//! A campaign binds a harness to a concrete set of parameter records and a
//! dated result file. Suites run several campaigns sequentially with
//! remaining-time estimates, or in parallel with a shared start barrier.

use std::fs;
use std::path::{Path, PathBuf};

use benchlab_core::{
    cartesian_product, check_constants_disjoint, seconds_pretty, CampaignError, Record, Result,
    VariableSpace,
};
use benchlab_shell::hostname;
use chrono::Local;
use serde_json::json;
use tracing::{info, warn};

use crate::barrier::StartBarrier;
use crate::cache::locate_latest_result_file;
use crate::harness::{Harness, PrettyTables, RunConfig};

/// Knobs shared by all campaign constructors.
#[derive(Debug, Clone)]
pub struct CampaignParams {
    pub nb_runs: usize,
    pub constants: Record,
    pub benchmark_duration_seconds: Option<u64>,
    /// Where result files land; defaults to `results/`.
    pub results_dir: Option<PathBuf>,
    pub pretty: PrettyTables,
    pub debug: bool,
    /// Create a per-run record directory tree next to the result file.
    pub enable_data_dir: bool,
    /// Resume the newest matching result file instead of starting fresh.
    pub continuing: bool,
    pub max_threads: Option<usize>,
}

impl Default for CampaignParams {
    fn default() -> CampaignParams {
        CampaignParams {
            nb_runs: 1,
            constants: Record::new(),
            benchmark_duration_seconds: None,
            results_dir: None,
            pretty: PrettyTables::new(),
            debug: false,
            enable_data_dir: false,
            continuing: false,
            max_threads: None,
        }
    }
}

pub struct Campaign {
    name: String,
    harness: Harness,
    csv_output_path: PathBuf,
    continuing: bool,
}

impl std::fmt::Debug for Campaign {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Campaign")
            .field("name", &self.name)
            .field("csv_output_path", &self.csv_output_path)
            .field("continuing", &self.continuing)
            .finish_non_exhaustive()
    }
}

impl Campaign {
    /// Campaign over an explicit list of parameter records, run in order.
    pub fn iterate_variables(
        name: impl Into<String>,
        mut harness: Harness,
        variables: Vec<Record>,
        params: CampaignParams,
    ) -> Result<Campaign> {
        let name = name.into();
        let host = hostname();

        // Host identity columns come first; user constants may override.
        let mut constants = Record::new();
        constants.insert("hostname".into(), json!(host.clone()));
        constants.insert("architecture".into(), json!(std::env::consts::ARCH));
        for (key, value) in params.constants {
            constants.insert(key, value);
        }

        check_constants_disjoint(&constants, &variables)?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let results_dir = params
            .results_dir
            .unwrap_or_else(|| PathBuf::from("results"));
        let mut csv_output_path =
            results_dir.join(format!("benchmark_{host}_{name}_{stamp}.csv"));

        if params.continuing {
            if let Some(previous) = locate_latest_result_file(&csv_output_path)? {
                info!(file = %previous.display(), "resuming previous result file");
                csv_output_path = previous;
            }
        }

        let base_data_dir = if params.enable_data_dir {
            let dir = csv_output_path.with_extension("");
            fs::create_dir_all(&dir)?;
            Some(dir)
        } else {
            None
        };

        harness.configure(RunConfig {
            experiment_name: name.clone(),
            csv_output_path: csv_output_path.clone(),
            base_data_dir,
            benchmark_duration_seconds: params.benchmark_duration_seconds,
            nb_runs: params.nb_runs,
            constants,
            variables,
            pretty: params.pretty,
            debug: params.debug,
            max_threads: params.max_threads,
        })?;

        Ok(Campaign {
            name,
            harness,
            csv_output_path,
            continuing: params.continuing,
        })
    }

    /// Campaign over the Cartesian product of a declared variable space.
    pub fn cartesian_product(
        name: impl Into<String>,
        harness: Harness,
        space: &VariableSpace,
        params: CampaignParams,
    ) -> Result<Campaign> {
        Campaign::iterate_variables(name, harness, cartesian_product(space), params)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn csv_output_path(&self) -> &Path {
        &self.csv_output_path
    }

    pub fn duration_seconds(&mut self) -> Result<Option<u64>> {
        self.harness.expected_total_duration_seconds()
    }

    pub fn run(&mut self) -> Result<()> {
        self.campaign_run(0, None)
    }

    /// Run with suite context: remaining time of the campaigns that follow,
    /// and the start barrier when running in parallel with others.
    pub fn campaign_run(
        &mut self,
        other_campaigns_seconds: u64,
        barrier: Option<&StartBarrier>,
    ) -> Result<()> {
        if let Some(parent) = self.csv_output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.harness
            .run(other_campaigns_seconds, barrier, self.continuing)
    }
}

pub struct CampaignSuite {
    campaigns: Vec<Campaign>,
}

impl CampaignSuite {
    pub fn new(campaigns: Vec<Campaign>) -> CampaignSuite {
        CampaignSuite { campaigns }
    }

    pub fn durations(&mut self) -> Result<Vec<Option<u64>>> {
        self.campaigns
            .iter_mut()
            .map(|campaign| campaign.duration_seconds())
            .collect()
    }

    pub fn print_durations(&mut self) -> Result<()> {
        let durations = self.durations()?;
        for (campaign, duration) in self.campaigns.iter().zip(durations) {
            match duration {
                Some(seconds) => info!(
                    campaign = %campaign.name(),
                    seconds,
                    pretty = %seconds_pretty(seconds as f64),
                    "expected campaign duration"
                ),
                None => info!(
                    campaign = %campaign.name(),
                    "expected campaign duration unknown"
                ),
            }
        }
        Ok(())
    }

    pub fn run_suite(&mut self, parallel: bool) -> Result<()> {
        if parallel {
            self.run_parallel()
        } else {
            self.run_sequential()
        }
    }

    /// Campaigns one after another. When every campaign knows its expected
    /// duration, each one gets the total remaining time of those after it
    /// for its progress estimate.
    fn run_sequential(&mut self) -> Result<()> {
        let durations = self.durations()?;
        let known: Option<Vec<u64>> = durations.into_iter().collect();

        let mut remaining_after = vec![0u64; self.campaigns.len()];
        if let Some(durations) = known {
            let mut acc = 0u64;
            for index in (0..durations.len()).rev() {
                remaining_after[index] = acc;
                acc += durations[index];
            }
        }

        for (campaign, remaining) in self.campaigns.iter_mut().zip(remaining_after) {
            campaign.campaign_run(remaining, None)?;
        }
        Ok(())
    }

    /// All campaigns at once, one thread each, sharing a start barrier so
    /// every timed run begins simultaneously across campaigns. A failing
    /// campaign does not stop its siblings; the first error is reported
    /// after all of them finish.
    fn run_parallel(&mut self) -> Result<()> {
        let barrier = StartBarrier::new(self.campaigns.len());

        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .campaigns
                .iter_mut()
                .map(|campaign| {
                    let barrier = &barrier;
                    scope.spawn(move || {
                        let name = campaign.name().to_string();
                        (name, campaign.campaign_run(0, Some(barrier)))
                    })
                })
                .collect();

            let mut first_error = None;
            for handle in handles {
                match handle.join() {
                    Ok((_, Ok(()))) => {}
                    Ok((name, Err(error))) => {
                        warn!(campaign = %name, %error, "campaign failed");
                        if first_error.is_none() {
                            first_error = Some(error);
                        }
                    }
                    Err(_) => {
                        if first_error.is_none() {
                            first_error =
                                Some(CampaignError::config("campaign thread panicked"));
                        }
                    }
                }
            }
            match first_error {
                Some(error) => Err(error),
                None => Ok(()),
            }
        })
    }
}
