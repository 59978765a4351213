//! Core data model for benchlab campaigns: parameter records, variable-space
//! enumeration, build/run partitioning and the shared error taxonomy.

pub mod error;
pub mod space;
pub mod timefmt;

pub use error::{CampaignError, Result};
pub use space::{
    cartesian_product, check_constants_disjoint, display_value, group_by_build_vars, partition,
    BuildGroup, Partitioned, Record, RunScope, Value, VariableNameSets, VariableSpace,
};
pub use timefmt::seconds_pretty;
