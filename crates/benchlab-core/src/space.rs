//! Parameter records, variable-space enumeration and build grouping.
//!
//! A campaign explores a space of named variables. Each point of the space is
//! a [`Record`]: an insertion-ordered mapping from variable name to value.
//! Order is semantically significant twice over: the Cartesian expansion of a
//! declared space follows declaration order (rightmost-declared variable
//! varies fastest), and the result-file column layout is the key order of the
//! first emitted row.

use std::path::PathBuf;

use indexmap::IndexMap;

use crate::error::{CampaignError, Result};

/// A variable value. Strings, numbers and lists are the common cases.
pub type Value = serde_json::Value;

/// One point of the parameter space: ordered name -> value.
pub type Record = IndexMap<String, Value>;

/// A declared space: ordered name -> candidate values.
pub type VariableSpace = IndexMap<String, Vec<Value>>;

/// Render a value the way it appears in a result-file cell.
///
/// Strings render bare (no JSON quoting) and lists render as `[a, b]`, so
/// that a cell written by one campaign run compares string-equal when read
/// back by a resuming run.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(display_value).collect();
            format!("[{}]", inner.join(", "))
        }
        other => other.to_string(),
    }
}

/// Expand a declared variable space into the ordered sequence of records of
/// its Cartesian product.
///
/// Variables with an empty candidate list are dropped before expansion. The
/// product follows odometer semantics: the rightmost-declared variable varies
/// fastest.
pub fn cartesian_product(space: &VariableSpace) -> Vec<Record> {
    let non_empty: Vec<(&String, &Vec<Value>)> =
        space.iter().filter(|(_, values)| !values.is_empty()).collect();

    if non_empty.is_empty() {
        return Vec::new();
    }

    let total: usize = non_empty.iter().map(|(_, values)| values.len()).product();
    let mut records = Vec::with_capacity(total);
    let mut odometer = vec![0usize; non_empty.len()];

    loop {
        let mut record = Record::new();
        for (pos, (name, values)) in non_empty.iter().enumerate() {
            record.insert((*name).clone(), values[odometer[pos]].clone());
        }
        records.push(record);

        // Advance the rightmost digit, carrying leftwards.
        let mut pos = non_empty.len();
        loop {
            if pos == 0 {
                return records;
            }
            pos -= 1;
            odometer[pos] += 1;
            if odometer[pos] < non_empty[pos].1.len() {
                break;
            }
            odometer[pos] = 0;
        }
    }
}

/// Fail if a declared constant name collides with a variable name. Constants
/// and variables become result-file columns and must be disjoint key sets.
pub fn check_constants_disjoint(constants: &Record, records: &[Record]) -> Result<()> {
    let mut common: Vec<&str> = Vec::new();
    for name in constants.keys() {
        if records.iter().any(|r| r.contains_key(name)) && !common.contains(&name.as_str()) {
            common.push(name);
        }
    }
    if common.is_empty() {
        Ok(())
    } else {
        Err(CampaignError::config(format!(
            "duplicate names in both constants and variables: {}",
            common.join(", ")
        )))
    }
}

/// The partition contract a benchmark declares over its parameter names.
#[derive(Debug, Clone, Default)]
pub struct VariableNameSets {
    pub build: Vec<String>,
    pub run: Vec<String>,
    /// Variables consumed by a preloaded shared library's rebuild step, when
    /// the configured library set declares any.
    pub lib: Vec<String>,
}

/// A record split into build, run, library and remaining variables.
#[derive(Debug, Clone, Default)]
pub struct Partitioned {
    pub build: Record,
    pub run: Record,
    pub lib: Record,
    pub other: Record,
}

/// Partition a record according to the benchmark's declared name sets.
/// "Other" collects every key that belongs to none of the declared sets.
pub fn partition(record: &Record, names: &VariableNameSets) -> Partitioned {
    let mut split = Partitioned::default();
    for name in &names.build {
        if let Some(value) = record.get(name) {
            split.build.insert(name.clone(), value.clone());
        }
    }
    for name in &names.run {
        if let Some(value) = record.get(name) {
            split.run.insert(name.clone(), value.clone());
        }
    }
    for name in &names.lib {
        if let Some(value) = record.get(name) {
            split.lib.insert(name.clone(), value.clone());
        }
    }
    for (name, value) in record {
        if !split.build.contains_key(name)
            && !split.run.contains_key(name)
            && !split.lib.contains_key(name)
        {
            split.other.insert(name.clone(), value.clone());
        }
    }
    split
}

/// Records sharing one build-variable projection. Built at most once per
/// campaign run; if the projection is invalid, no member executes.
#[derive(Debug, Clone)]
pub struct BuildGroup {
    /// Projection of the members onto the declared build-variable names.
    pub build_vars: Record,
    /// Member records in original order; the first one doubles as the
    /// example member for resolving group-level defaults.
    pub members: Vec<Record>,
}

/// Group records by their projection onto the declared build-variable names.
///
/// The group key is the fixed declared name set: a record that omits a build
/// variable simply has no entry for it in its projection. Groups come out in
/// first-seen order and members keep their original relative order.
pub fn group_by_build_vars(build_var_names: &[String], records: &[Record]) -> Vec<BuildGroup> {
    let mut groups: Vec<BuildGroup> = Vec::new();

    for record in records {
        let mut projection = Record::new();
        for name in build_var_names {
            if let Some(value) = record.get(name) {
                projection.insert(name.clone(), value.clone());
            }
        }

        match groups.iter_mut().find(|g| g.build_vars == projection) {
            Some(group) => group.members.push(record.clone()),
            None => groups.push(BuildGroup {
                build_vars: projection,
                members: vec![record.clone()],
            }),
        }
    }

    groups
}

/// Per-run variable scopes handed to wrappers, shared libraries and the
/// benchmark itself. Constructed fresh for every run point; the configured
/// wrappers and libraries are reused read-only across runs.
#[derive(Debug, Clone, Default)]
pub struct RunScope {
    pub build_vars: Record,
    pub run_vars: Record,
    pub lib_vars: Record,
    pub other_vars: Record,
    /// Where this run's artifacts go, when the data directory is enabled.
    pub record_data_dir: Option<PathBuf>,
}

impl RunScope {
    /// Look up a variable across the run, build, library and other scopes,
    /// in that order of precedence.
    pub fn var(&self, name: &str) -> Option<&Value> {
        self.run_vars
            .get(name)
            .or_else(|| self.build_vars.get(name))
            .or_else(|| self.lib_vars.get(name))
            .or_else(|| self.other_vars.get(name))
    }
}
