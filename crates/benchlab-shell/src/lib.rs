//! The narrow seam between the campaign engine and the operating system.
//!
//! The scheduler never spawns processes directly; everything goes through the
//! [`CommandRunner`] trait so that remote or containerized transports can be
//! plugged in without touching the engine. Only a local implementation lives
//! here; transports are external collaborators.

pub mod asyncproc;
pub mod runner;

pub use asyncproc::AsyncProcess;
pub use runner::{hostname, CommandRunner, EnvMap, ExecRequest, LocalRunner};
