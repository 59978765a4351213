//! Compatibility layer for staged benchmarks: a four-phase contract with
//! declared parameters, and a bridge running it on the campaign engine.

pub mod bridge;
pub mod contract;
pub mod stepper;

pub use bridge::{staged_campaign, BridgeSetup, BridgedBenchmark};
pub use contract::{
    BuildOutput, ExecOutput, FetchOutput, ParamSpec, RunPhaseOutput, StageContext, StageExec,
    StagedBenchmark, StepSession,
};
pub use stepper::{bind_step_args, build_step, collect_step, fetch_step, run_step};
