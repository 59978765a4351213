//! Command composition: wrappers that prefix the benchmark command line and
//! shared libraries injected through the preload environment.

pub mod sharedlib;
pub mod wrapper;

pub use sharedlib::{
    preload_environment, PrecompiledSharedLib, PreloadContribution, SharedLib, ThreadIndexDefault,
    LD_PRELOAD_VAR,
};
pub use wrapper::{wrap_command, CommandWrapper, EnvWrapper, NiceWrapper, TasksetWrapper};
