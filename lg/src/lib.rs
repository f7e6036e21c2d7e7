//! smoked looking-glass
//!
//! Accepts a diagnostic request (operation + target), validates the target
//! against the operation's rules, runs the matching network tool without a
//! shell, and returns its output.

pub mod config;
pub mod dispatch;
pub mod executor;
pub mod rate_limit;
pub mod registry;
pub mod resolve;
pub mod server;
pub mod validate;

#[cfg(test)]
mod test_logs;

pub use config::{ConfigLookup, Settings};
pub use dispatch::{Dispatcher, Request, Response};
pub use executor::{CommandExecutor, ExecError, ExecLimits, ProcessExecutor};
pub use registry::{ArgToken, OperationDescriptor, Registry};
pub use resolve::{resolve, ResolvedCommand};
pub use validate::{TargetRule, TargetValidator};
