//! Phase invocation: bind declared parameters, call the phase, thread the
//! session forward.

use std::path::Path;

use benchlab_core::{CampaignError, Record, Result};

use crate::contract::{ParamSpec, StageContext, StageExec, StagedBenchmark, StepSession};

/// Bind a phase's declared parameters against the available values. Returns
/// the bound arguments plus the subset that came from defaults. Every
/// required parameter must be present; all missing names are reported in
/// one error.
pub fn bind_step_args(
    step: &str,
    specs: &[ParamSpec],
    available: &Record,
) -> Result<(Record, Record)> {
    let mut bound = Record::new();
    let mut defaults_used = Record::new();
    let mut missing = Vec::new();

    for spec in specs {
        match available.get(&spec.name) {
            Some(value) => {
                bound.insert(spec.name.clone(), value.clone());
            }
            None => match &spec.default {
                Some(default) => {
                    bound.insert(spec.name.clone(), default.clone());
                    defaults_used.insert(spec.name.clone(), default.clone());
                }
                None => missing.push(spec.name.clone()),
            },
        }
    }

    if missing.is_empty() {
        Ok((bound, defaults_used))
    } else {
        Err(CampaignError::MissingStepArg {
            step: step.to_string(),
            missing,
        })
    }
}

pub fn fetch_step(
    bench: &mut dyn StagedBenchmark,
    available: &Record,
    exec: &dyn StageExec,
    record_dir: Option<&Path>,
) -> Result<StepSession> {
    let (args, defaults_used) = bind_step_args("fetch", &bench.fetch_params(), available)?;
    let mut session = StepSession::default();
    let output = bench.fetch(&StageContext {
        exec,
        args: &args,
        defaults_used: &defaults_used,
        record_dir,
        duration_s: None,
        session: &session,
    })?;
    session.fetch = Some(output);
    Ok(session)
}

pub fn build_step(
    bench: &mut dyn StagedBenchmark,
    mut session: StepSession,
    available: &Record,
    exec: &dyn StageExec,
    record_dir: Option<&Path>,
) -> Result<StepSession> {
    let (args, defaults_used) = bind_step_args("build", &bench.build_params(), available)?;
    let output = bench.build(&StageContext {
        exec,
        args: &args,
        defaults_used: &defaults_used,
        record_dir,
        duration_s: None,
        session: &session,
    })?;
    session.build = Some(output);
    Ok(session)
}

pub fn run_step(
    bench: &mut dyn StagedBenchmark,
    mut session: StepSession,
    available: &Record,
    exec: &dyn StageExec,
    record_dir: Option<&Path>,
    duration_s: Option<u64>,
) -> Result<StepSession> {
    let (args, defaults_used) = bind_step_args("run", &bench.run_params(), available)?;
    let output = bench.run(&StageContext {
        exec,
        args: &args,
        defaults_used: &defaults_used,
        record_dir,
        duration_s,
        session: &session,
    })?;
    session.run = Some(output);
    Ok(session)
}

pub fn collect_step(
    bench: &mut dyn StagedBenchmark,
    session: &StepSession,
    available: &Record,
    exec: &dyn StageExec,
    record_dir: Option<&Path>,
    duration_s: Option<u64>,
) -> Result<Vec<Record>> {
    let (args, defaults_used) = bind_step_args("collect", &bench.collect_params(), available)?;
    bench.collect(&StageContext {
        exec,
        args: &args,
        defaults_used: &defaults_used,
        record_dir,
        duration_s,
        session,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn binding_collects_all_missing_names() {
        let specs = vec![
            ParamSpec::required("n"),
            ParamSpec::required("mode"),
            ParamSpec::with_default("scale", json!(1)),
        ];
        let err = bind_step_args("run", &specs, &Record::new()).unwrap_err();
        match err {
            CampaignError::MissingStepArg { step, missing } => {
                assert_eq!(step, "run");
                assert_eq!(missing, vec!["n".to_string(), "mode".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn defaults_fill_in_and_are_reported() {
        let specs = vec![
            ParamSpec::required("n"),
            ParamSpec::with_default("scale", json!(2)),
        ];
        let mut available = Record::new();
        available.insert("n".into(), json!(7));
        available.insert("unrelated".into(), json!("ignored"));

        let (args, defaults_used) = bind_step_args("run", &specs, &available).unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(args["n"], json!(7));
        assert_eq!(args["scale"], json!(2));
        assert_eq!(defaults_used.len(), 1);
        assert!(defaults_used.contains_key("scale"));
    }

    #[test]
    fn provided_value_beats_default() {
        let specs = vec![ParamSpec::with_default("scale", json!(2))];
        let mut available = Record::new();
        available.insert("scale".into(), json!(9));
        let (args, defaults_used) = bind_step_args("run", &specs, &available).unwrap();
        assert_eq!(args["scale"], json!(9));
        assert!(defaults_used.is_empty());
    }
}
