//! Shared-library injection via the preload environment.
//!
//! Each configured library contributes preload paths and environment entries
//! for the current run. Contributions are aggregated into a single
//! `LD_PRELOAD` value (paths joined with `:`) plus a merged environment,
//! which then seeds the command-wrapper pipeline.

use std::path::{Path, PathBuf};

use benchlab_core::{Record, Result, RunScope};
use benchlab_shell::EnvMap;

pub const LD_PRELOAD_VAR: &str = "LD_PRELOAD";

/// What one shared library asks for on a given run.
#[derive(Debug, Clone, Default)]
pub struct PreloadContribution {
    pub libraries: Vec<PathBuf>,
    pub env: Vec<(String, String)>,
}

/// Declared default for a per-thread instrumentation index variable.
///
/// Libraries that attach per-thread instrumentation often need their index
/// variable offset past the benchmark's background/bookkeeping threads. A
/// library declares the variable and offset explicitly here; the aggregator
/// applies the default only when nothing else set the variable.
#[derive(Debug, Clone)]
pub struct ThreadIndexDefault {
    pub var: String,
    pub offset: u32,
}

/// A shared library preloaded into the benchmark process. Configured once
/// per campaign, queried per run.
pub trait SharedLib: Send + Sync {
    /// One-time preparation (building the library, checking its presence).
    fn configure(&self) -> Result<()> {
        Ok(())
    }

    /// Campaign variables baked into the library binary itself, typically a
    /// lock or instrumentation flavor. Declaring any makes the scheduler
    /// clean the library once and rebuild it once per distinct combination
    /// before the benchmark build groups run.
    fn rebuild_var_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Discard previous rebuild artifacts. Called once per campaign when
    /// [`SharedLib::rebuild_var_names`] declares anything.
    fn clean(&self) -> Result<()> {
        Ok(())
    }

    /// Rebuild the library for one combination of its declared variables.
    fn rebuild(&self, _vars: &Record) -> Result<()> {
        Ok(())
    }

    /// Contribution for the current run.
    fn preload(&self, scope: &RunScope) -> PreloadContribution;

    fn thread_index_default(&self) -> Option<ThreadIndexDefault> {
        None
    }
}

/// Aggregate all shared-library contributions into the starting environment
/// for the wrapper pipeline. Paths join into one `LD_PRELOAD` value; extra
/// entries merge last-wins in declaration order; thread-index defaults apply
/// only to variables still unset after the merge.
pub fn preload_environment(libs: &[Box<dyn SharedLib>], scope: &RunScope) -> EnvMap {
    let mut preloads: Vec<PathBuf> = Vec::new();
    let mut env = EnvMap::new();

    for lib in libs {
        let contribution = lib.preload(scope);
        preloads.extend(contribution.libraries);
        for (name, value) in contribution.env {
            env.insert(name, value);
        }
    }

    if !preloads.is_empty() {
        let joined = preloads
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        env.insert(LD_PRELOAD_VAR.to_string(), joined);
    }

    for lib in libs {
        if let Some(default) = lib.thread_index_default() {
            env.entry(default.var).or_insert_with(|| default.offset.to_string());
        }
    }

    env
}

/// A library that already exists on disk, preloaded as-is with optional
/// fixed environment entries.
#[derive(Debug, Clone)]
pub struct PrecompiledSharedLib {
    pub path: PathBuf,
    pub extra_env: Vec<(String, String)>,
    pub thread_index: Option<ThreadIndexDefault>,
}

impl PrecompiledSharedLib {
    pub fn new(path: impl AsRef<Path>) -> Self {
        PrecompiledSharedLib {
            path: path.as_ref().to_path_buf(),
            extra_env: Vec::new(),
            thread_index: None,
        }
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.push((name.into(), value.into()));
        self
    }

    pub fn with_thread_index(mut self, var: impl Into<String>, offset: u32) -> Self {
        self.thread_index = Some(ThreadIndexDefault {
            var: var.into(),
            offset,
        });
        self
    }
}

impl SharedLib for PrecompiledSharedLib {
    fn preload(&self, _scope: &RunScope) -> PreloadContribution {
        PreloadContribution {
            libraries: vec![self.path.clone()],
            env: self.extra_env.clone(),
        }
    }

    fn thread_index_default(&self) -> Option<ThreadIndexDefault> {
        self.thread_index.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contributions_aggregate_into_one_preload_value() {
        let libs: Vec<Box<dyn SharedLib>> = vec![
            Box::new(PrecompiledSharedLib::new("/lib/a.so").with_env("A_MODE", "fast")),
            Box::new(PrecompiledSharedLib::new("/lib/b.so").with_env("A_MODE", "slow")),
        ];
        let env = preload_environment(&libs, &RunScope::default());
        assert_eq!(env[LD_PRELOAD_VAR], "/lib/a.so:/lib/b.so");
        // Later-declared contribution wins on conflicts.
        assert_eq!(env["A_MODE"], "slow");
    }

    #[test]
    fn no_libraries_means_no_preload_variable() {
        let env = preload_environment(&[], &RunScope::default());
        assert!(env.is_empty());
    }

    #[test]
    fn thread_index_default_applies_only_when_unset() {
        let libs: Vec<Box<dyn SharedLib>> = vec![Box::new(
            PrecompiledSharedLib::new("/lib/probe.so").with_thread_index("PROBE_FIRST_THREAD", 2),
        )];
        let env = preload_environment(&libs, &RunScope::default());
        assert_eq!(env["PROBE_FIRST_THREAD"], "2");

        let libs: Vec<Box<dyn SharedLib>> = vec![Box::new(
            PrecompiledSharedLib::new("/lib/probe.so")
                .with_env("PROBE_FIRST_THREAD", "0")
                .with_thread_index("PROBE_FIRST_THREAD", 2),
        )];
        let env = preload_environment(&libs, &RunScope::default());
        assert_eq!(env["PROBE_FIRST_THREAD"], "0");
    }
}
