//! Campaign execution engine: the benchmark contract, the scheduler that
//! drives parameter points through build/run/collect, the resumable result
//! cache, and suite-level coordination of several campaigns.

pub mod barrier;
pub mod benchmark;
pub mod cache;
pub mod campaign;
pub mod harness;
pub mod pipeline;
pub mod sink;

pub use barrier::StartBarrier;
pub use benchmark::{
    Benchmark, BuildContext, CollectContext, CommandAttachment, PostRunHook, PreRunHook,
    RowFields, RunContext, RunOutcome,
};
pub use campaign::{Campaign, CampaignParams, CampaignSuite};
pub use harness::{Harness, PrettyTables, RunConfig};
pub use pipeline::ExecPipeline;
pub use sink::{ResultSink, CSV_SEPARATOR};
