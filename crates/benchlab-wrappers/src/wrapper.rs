//! Composable command wrappers.
//!
//! A wrapper turns a command into another command, typically by prepending a
//! Unix utility that takes a command as input (taskset, numactl, perf, nice,
//! ...). Wrapping a wrapped command is a normal command again, so wrappers
//! chain: for a declared list `[W1, W2, .., Wn]` the chain is folded from the
//! end of the list toward the front, which leaves the final argv as
//! `W1-prefix W2-prefix .. Wn-prefix base-argv`, with the first-declared
//! wrapper as the outermost prefix.

use benchlab_core::{display_value, RunScope};
use benchlab_shell::EnvMap;

/// A composable argv/environment transformer. Configured once per campaign
/// and reused read-only across runs; only the [`RunScope`] changes per run.
pub trait CommandWrapper: Send + Sync {
    /// The argv tokens to prepend to the wrapped command.
    fn command_prefix(&self, _scope: &RunScope) -> Vec<String> {
        Vec::new()
    }

    /// The environment after this wrapper's delta is folded in.
    fn updated_environment(&self, environment: EnvMap) -> EnvMap {
        environment
    }

    /// Wrap one command. The default prepends [`Self::command_prefix`] and
    /// applies [`Self::updated_environment`]; wrappers that need the final
    /// environment (to materialize it into argv, say) override this.
    fn wrap(&self, command: Vec<String>, environment: EnvMap, scope: &RunScope) -> (Vec<String>, EnvMap) {
        let mut wrapped = self.command_prefix(scope);
        wrapped.extend(command);
        (wrapped, self.updated_environment(environment))
    }
}

/// Apply a declared wrapper chain to a base command. Folds right-to-left so
/// the declaration order equals the final prefix order.
pub fn wrap_command(
    wrappers: &[Box<dyn CommandWrapper>],
    command: Vec<String>,
    environment: EnvMap,
    scope: &RunScope,
) -> (Vec<String>, EnvMap) {
    let mut wrapped = command;
    let mut env = environment;
    for wrapper in wrappers.iter().rev() {
        let (next_command, next_env) = wrapper.wrap(wrapped, env, scope);
        wrapped = next_command;
        env = next_env;
    }
    (wrapped, env)
}

/// Wrapper for the `env` utility: materializes the command's environment as
/// `env NAME=VALUE ...` argv tokens and returns an empty residual
/// environment. Useful when the transport cannot carry a process
/// environment. It must see the already-folded environment, so it overrides
/// `wrap` instead of `command_prefix`.
#[derive(Debug, Default)]
pub struct EnvWrapper;

impl CommandWrapper for EnvWrapper {
    fn wrap(&self, command: Vec<String>, environment: EnvMap, _scope: &RunScope) -> (Vec<String>, EnvMap) {
        let mut wrapped = vec!["env".to_string()];
        for (name, value) in &environment {
            wrapped.push(format!("{name}={value}"));
        }
        wrapped.extend(command);
        (wrapped, EnvMap::new())
    }
}

/// Wrapper for the `nice` utility, adjusting the scheduling priority of the
/// benchmark process.
#[derive(Debug)]
pub struct NiceWrapper {
    pub nice_value: i32,
}

impl CommandWrapper for NiceWrapper {
    fn command_prefix(&self, _scope: &RunScope) -> Vec<String> {
        vec![
            "nice".to_string(),
            "-n".to_string(),
            self.nice_value.to_string(),
        ]
    }
}

/// Wrapper for the `taskset` utility, pinning the benchmark to a CPU list
/// taken from a named run variable. When the variable is absent for a run,
/// the wrapper contributes nothing.
#[derive(Debug)]
pub struct TasksetWrapper {
    pub cpu_list_var: String,
}

impl TasksetWrapper {
    pub fn new(cpu_list_var: impl Into<String>) -> Self {
        TasksetWrapper {
            cpu_list_var: cpu_list_var.into(),
        }
    }
}

impl CommandWrapper for TasksetWrapper {
    fn command_prefix(&self, scope: &RunScope) -> Vec<String> {
        match scope.var(&self.cpu_list_var) {
            Some(value) => vec![
                "taskset".to_string(),
                "--cpu-list".to_string(),
                display_value(value),
            ],
            None => Vec::new(),
        }
    }
}
