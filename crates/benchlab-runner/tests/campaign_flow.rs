//! End-to-end campaign scenarios against a real local shell.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use benchlab_core::{Record, Result, RunScope, Value, VariableSpace};
use benchlab_runner::{
    Benchmark, BuildContext, Campaign, CampaignParams, CampaignSuite, CollectContext,
    CommandAttachment, Harness, RowFields, RunContext, RunOutcome,
};
use benchlab_shell::{AsyncProcess, CommandRunner, ExecRequest, LocalRunner};
use benchlab_wrappers::{PreloadContribution, SharedLib};
use serde_json::json;

#[derive(Default)]
struct Counters {
    cleans: usize,
    builds: usize,
    runs: usize,
}

struct EchoBench {
    counters: Arc<Mutex<Counters>>,
    /// Full-row predicate, consulted by the scheduler before each run.
    invalid: Option<fn(&Record) -> bool>,
}

impl EchoBench {
    fn new(counters: Arc<Mutex<Counters>>) -> EchoBench {
        EchoBench {
            counters,
            invalid: None,
        }
    }
}

impl Benchmark for EchoBench {
    fn name(&self) -> &str {
        "echobench"
    }

    fn build_var_names(&self) -> Vec<String> {
        vec!["a".into()]
    }

    fn run_var_names(&self) -> Vec<String> {
        vec!["c".into()]
    }

    fn valid_parameters(&self, point: &Record) -> bool {
        match self.invalid {
            Some(predicate) => !predicate(point),
            None => true,
        }
    }

    fn clean(&mut self, _ctx: &BuildContext<'_>) -> Result<()> {
        self.counters.lock().unwrap().cleans += 1;
        Ok(())
    }

    fn build(&mut self, build_vars: &Record, _ctx: &BuildContext<'_>) -> Result<()> {
        assert!(build_vars.contains_key("a"));
        self.counters.lock().unwrap().builds += 1;
        Ok(())
    }

    fn single_run(&mut self, ctx: &RunContext<'_>) -> Result<RunOutcome> {
        self.counters.lock().unwrap().runs += 1;
        let c = ctx.scope.var("c").and_then(Value::as_i64).unwrap();
        let request = ExecRequest::new(vec![
            "sh".into(),
            "-c".into(),
            format!("echo result={}", c * 10),
        ]);
        ctx.exec.run_bench_command(ctx.scope, request)
    }

    fn parse_output(&mut self, output: &str, _ctx: &CollectContext<'_>) -> Result<Vec<RowFields>> {
        let value: i64 = output.trim().trim_start_matches("result=").parse().unwrap();
        let mut fields = RowFields::new();
        fields.insert("result".into(), json!(value));
        Ok(vec![fields])
    }
}

fn space() -> VariableSpace {
    let mut space = VariableSpace::new();
    space.insert("a".into(), vec![json!(1), json!(2)]);
    space.insert("c".into(), vec![json!(10), json!(20)]);
    space
}

fn data_lines(path: &Path) -> (Vec<String>, Vec<String>) {
    let content = fs::read_to_string(path).unwrap();
    let mut comments = Vec::new();
    let mut data = Vec::new();
    for line in content.lines() {
        if line.starts_with('#') {
            comments.push(line.to_string());
        } else if !line.trim().is_empty() {
            data.push(line.to_string());
        }
    }
    (comments, data)
}

#[test]
fn campaign_builds_once_per_group_and_writes_one_row_per_run() {
    let dir = tempfile::tempdir().unwrap();
    let counters = Arc::new(Mutex::new(Counters::default()));
    let harness = Harness::new(
        Box::new(EchoBench::new(Arc::clone(&counters))),
        Arc::new(LocalRunner),
    );

    let mut params = CampaignParams {
        nb_runs: 2,
        results_dir: Some(dir.path().to_path_buf()),
        ..CampaignParams::default()
    };
    params
        .pretty
        .entry("a".into())
        .or_default()
        .insert("1".into(), "one".into());

    let mut campaign = Campaign::cartesian_product("demo", harness, &space(), params).unwrap();
    campaign.run().unwrap();

    let counts = counters.lock().unwrap();
    assert_eq!(counts.cleans, 2);
    assert_eq!(counts.builds, 2);
    assert_eq!(counts.runs, 8);

    let (comments, data) = data_lines(campaign.csv_output_path());
    assert!(comments
        .iter()
        .any(|c| c.contains("benchmark_campaign_name: demo")));
    assert!(comments.iter().any(|c| c.contains("nb_runs: 2")));

    // One header plus one row per run, in point-then-repetition order.
    assert_eq!(data.len(), 1 + 8);
    let header: Vec<&str> = data[0].split(';').collect();
    assert_eq!(
        &header[..4],
        &["experiment_name", "benchmark_name", "hostname", "architecture"]
    );
    assert!(header.contains(&"a"));
    assert!(header.contains(&"a_pretty"));
    assert!(header.contains(&"rep"));
    assert!(header.contains(&"result"));

    let first_row: Vec<&str> = data[1].split(';').collect();
    let column = |name: &str| header.iter().position(|h| *h == name).unwrap();
    assert_eq!(first_row[column("experiment_name")], "demo");
    assert_eq!(first_row[column("a")], "1");
    assert_eq!(first_row[column("a_pretty")], "\"one\"");
    assert_eq!(first_row[column("c")], "10");
    assert_eq!(first_row[column("rep")], "1");
    assert_eq!(first_row[column("result")], "100");

    // Repetitions vary fastest, then c, then the build variable a.
    let reps: Vec<&str> = data[1..].iter().map(|l| l.split(';').nth(column("rep")).unwrap()).collect();
    assert_eq!(reps, vec!["1", "2", "1", "2", "1", "2", "1", "2"]);
}

#[test]
fn resumed_campaign_skips_every_cached_run() {
    let dir = tempfile::tempdir().unwrap();

    let first = Arc::new(Mutex::new(Counters::default()));
    let harness = Harness::new(
        Box::new(EchoBench::new(Arc::clone(&first))),
        Arc::new(LocalRunner),
    );
    let mut campaign = Campaign::cartesian_product(
        "resume",
        harness,
        &space(),
        CampaignParams {
            nb_runs: 2,
            results_dir: Some(dir.path().to_path_buf()),
            ..CampaignParams::default()
        },
    )
    .unwrap();
    campaign.run().unwrap();
    assert_eq!(first.lock().unwrap().runs, 8);

    let second = Arc::new(Mutex::new(Counters::default()));
    let harness = Harness::new(
        Box::new(EchoBench::new(Arc::clone(&second))),
        Arc::new(LocalRunner),
    );
    let mut resumed = Campaign::cartesian_product(
        "resume",
        harness,
        &space(),
        CampaignParams {
            nb_runs: 2,
            results_dir: Some(dir.path().to_path_buf()),
            continuing: true,
            ..CampaignParams::default()
        },
    )
    .unwrap();
    assert_eq!(resumed.csv_output_path(), campaign.csv_output_path());
    resumed.run().unwrap();

    // Builds still happen per group; no run is repeated.
    let counts = second.lock().unwrap();
    assert_eq!(counts.builds, 2);
    assert_eq!(counts.runs, 0);

    let (comments, data) = data_lines(campaign.csv_output_path());
    assert!(comments
        .iter()
        .any(|c| c.contains("Continuing campaign execution")));
    // Still a single header and the original eight rows.
    assert_eq!(data.len(), 1 + 8);
}

#[test]
fn invalid_full_row_stops_remaining_repetitions_of_that_point_only() {
    let dir = tempfile::tempdir().unwrap();
    let counters = Arc::new(Mutex::new(Counters::default()));
    let mut bench = EchoBench::new(Arc::clone(&counters));
    bench.invalid = Some(|point: &Record| {
        // Repetitions beyond the first are invalid for a == 1.
        matches!(
            (point.get("a").and_then(Value::as_i64), point.get("rep").and_then(Value::as_i64)),
            (Some(1), Some(rep)) if rep >= 2
        )
    });

    let mut space = VariableSpace::new();
    space.insert("a".into(), vec![json!(1), json!(2)]);
    space.insert("c".into(), vec![json!(10)]);

    let harness = Harness::new(Box::new(bench), Arc::new(LocalRunner));
    let mut campaign = Campaign::cartesian_product(
        "validity",
        harness,
        &space,
        CampaignParams {
            nb_runs: 3,
            results_dir: Some(dir.path().to_path_buf()),
            ..CampaignParams::default()
        },
    )
    .unwrap();
    campaign.run().unwrap();

    // a=1 runs only rep 1; a=2 runs all three repetitions.
    assert_eq!(counters.lock().unwrap().runs, 1 + 3);
    let (_, data) = data_lines(campaign.csv_output_path());
    assert_eq!(data.len(), 1 + 4);
}

#[test]
fn attachments_turn_the_run_asynchronous() {
    let dir = tempfile::tempdir().unwrap();
    let counters = Arc::new(Mutex::new(Counters::default()));
    let attached = Arc::new(AtomicUsize::new(0));

    let seen = Arc::clone(&attached);
    let attachment: Box<dyn CommandAttachment> = Box::new(
        move |process: &mut AsyncProcess, _dir: Option<&Path>| -> Result<()> {
            seen.fetch_add(1, Ordering::SeqCst);
            // The handle is live while the benchmark runs.
            let _ = process.pid();
            Ok(())
        },
    );

    let harness = Harness::new(
        Box::new(EchoBench::new(Arc::clone(&counters))),
        Arc::new(LocalRunner),
    )
    .with_command_attachments(vec![attachment]);

    let mut space = VariableSpace::new();
    space.insert("a".into(), vec![json!(1)]);
    space.insert("c".into(), vec![json!(10), json!(20)]);

    let mut campaign = Campaign::cartesian_product(
        "attached",
        harness,
        &space,
        CampaignParams {
            results_dir: Some(dir.path().to_path_buf()),
            enable_data_dir: true,
            ..CampaignParams::default()
        },
    )
    .unwrap();
    campaign.run().unwrap();

    assert_eq!(attached.load(Ordering::SeqCst), 2);
    let (_, data) = data_lines(campaign.csv_output_path());
    assert_eq!(data.len(), 1 + 2);

    // Record directories hold the drained stdout and the JSON record.
    let base = campaign.csv_output_path().with_extension("");
    let run_dir = base.join("a-1").join("c-10").join("run-1");
    assert!(run_dir.join("cmd_stdout.txt").exists());
    assert!(run_dir.join("experiment_results.json").exists());
}

#[test]
fn listed_records_run_in_declared_order() {
    let dir = tempfile::tempdir().unwrap();
    let counters = Arc::new(Mutex::new(Counters::default()));
    let harness = Harness::new(
        Box::new(EchoBench::new(Arc::clone(&counters))),
        Arc::new(LocalRunner),
    );

    // Explicitly listed points, deliberately not in product or sorted order.
    let records: Vec<Record> = [(2, 20), (2, 10), (1, 10)]
        .iter()
        .map(|(a, c)| {
            let mut rec = Record::new();
            rec.insert("a".into(), json!(a));
            rec.insert("c".into(), json!(c));
            rec
        })
        .collect();

    let mut campaign = Campaign::iterate_variables(
        "listed",
        harness,
        records,
        CampaignParams {
            results_dir: Some(dir.path().to_path_buf()),
            ..CampaignParams::default()
        },
    )
    .unwrap();
    campaign.run().unwrap();

    assert_eq!(counters.lock().unwrap().builds, 2);

    let (_, data) = data_lines(campaign.csv_output_path());
    assert_eq!(data.len(), 1 + 3);
    let header: Vec<&str> = data[0].split(';').collect();
    let column = |name: &str| header.iter().position(|h| *h == name).unwrap();
    let points: Vec<(String, String)> = data[1..]
        .iter()
        .map(|line| {
            let cells: Vec<&str> = line.split(';').collect();
            (cells[column("a")].to_string(), cells[column("c")].to_string())
        })
        .collect();
    assert_eq!(
        points,
        vec![
            ("2".to_string(), "20".to_string()),
            ("2".to_string(), "10".to_string()),
            ("1".to_string(), "10".to_string()),
        ]
    );
}

#[test]
fn shared_library_rebuilds_once_per_declared_variable_group() {
    struct LockLib {
        cleans: Arc<AtomicUsize>,
        /// Lock name and how many benchmark runs had happened at rebuild time.
        rebuilds: Arc<Mutex<Vec<(String, usize)>>>,
        runs: Arc<Mutex<Counters>>,
    }

    impl SharedLib for LockLib {
        fn rebuild_var_names(&self) -> Vec<String> {
            vec!["lock".into()]
        }

        fn clean(&self) -> Result<()> {
            self.cleans.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn rebuild(&self, vars: &Record) -> Result<()> {
            let runs_so_far = self.runs.lock().unwrap().runs;
            self.rebuilds
                .lock()
                .unwrap()
                .push((vars["lock"].as_str().unwrap().to_string(), runs_so_far));
            Ok(())
        }

        fn preload(&self, _scope: &RunScope) -> PreloadContribution {
            PreloadContribution::default()
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let counters = Arc::new(Mutex::new(Counters::default()));
    let cleans = Arc::new(AtomicUsize::new(0));
    let rebuilds = Arc::new(Mutex::new(Vec::new()));

    let harness = Harness::new(
        Box::new(EchoBench::new(Arc::clone(&counters))),
        Arc::new(LocalRunner),
    )
    .with_shared_libs(vec![Box::new(LockLib {
        cleans: Arc::clone(&cleans),
        rebuilds: Arc::clone(&rebuilds),
        runs: Arc::clone(&counters),
    })]);

    let mut space = VariableSpace::new();
    space.insert("a".into(), vec![json!(1)]);
    space.insert("lock".into(), vec![json!("cas"), json!("ticket")]);
    space.insert("c".into(), vec![json!(10)]);

    let mut campaign = Campaign::cartesian_product(
        "locks",
        harness,
        &space,
        CampaignParams {
            results_dir: Some(dir.path().to_path_buf()),
            ..CampaignParams::default()
        },
    )
    .unwrap();
    campaign.run().unwrap();

    // One clean, then one rebuild per distinct lock, all before any run.
    assert_eq!(cleans.load(Ordering::SeqCst), 1);
    assert_eq!(
        *rebuilds.lock().unwrap(),
        vec![("cas".to_string(), 0), ("ticket".to_string(), 0)]
    );

    let counts = counters.lock().unwrap();
    assert_eq!(counts.builds, 1);
    assert_eq!(counts.runs, 2);

    let (_, data) = data_lines(campaign.csv_output_path());
    assert_eq!(data.len(), 1 + 2);
    let header: Vec<&str> = data[0].split(';').collect();
    let column = |name: &str| header.iter().position(|h| *h == name).unwrap();
    let locks: Vec<&str> = data[1..]
        .iter()
        .map(|line| line.split(';').nth(column("lock")).unwrap())
        .collect();
    assert_eq!(locks, vec!["cas", "ticket"]);
}

#[test]
fn parallel_suite_runs_all_campaigns_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let mut space = VariableSpace::new();
    space.insert("a".into(), vec![json!(1)]);
    space.insert("c".into(), vec![json!(10), json!(20)]);

    let mut campaigns = Vec::new();
    for name in ["left", "right"] {
        let harness = Harness::new(
            Box::new(EchoBench::new(Arc::new(Mutex::new(Counters::default())))),
            Arc::new(LocalRunner),
        );
        campaigns.push(
            Campaign::cartesian_product(
                name,
                harness,
                &space,
                CampaignParams {
                    results_dir: Some(dir.path().to_path_buf()),
                    ..CampaignParams::default()
                },
            )
            .unwrap(),
        );
    }

    let paths: Vec<_> = campaigns
        .iter()
        .map(|c| c.csv_output_path().to_path_buf())
        .collect();
    CampaignSuite::new(campaigns).run_suite(true).unwrap();

    for path in paths {
        let (_, data) = data_lines(&path);
        assert_eq!(data.len(), 1 + 2);
    }
}
