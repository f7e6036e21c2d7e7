//! Argument resolution: descriptor template + target → argument vector
//!
//! The output is always a vector handed straight to the process executor.
//! The target becomes exactly one argument and is never joined into a
//! command string.

use crate::config::ConfigLookup;
use crate::registry::{ArgToken, OperationDescriptor};

/// A concrete command line, ready to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub executable: String,
    pub arguments: Vec<String>,
}

/// Expand the descriptor's template for `target`.
///
/// `{target}` is replaced by the target, `{config:<key>}` by the configured
/// value (empty when unset). When the template has no `{target}`, the target
/// is appended as the last argument.
pub fn resolve(
    descriptor: &OperationDescriptor,
    target: &str,
    config: &dyn ConfigLookup,
) -> ResolvedCommand {
    let mut found = false;
    let mut arguments: Vec<String> = descriptor
        .template()
        .iter()
        .map(|token| match token {
            ArgToken::Literal(s) => s.clone(),
            ArgToken::Target => {
                found = true;
                target.to_string()
            }
            ArgToken::Config(key) => config.get_string(key),
        })
        .collect();

    if !found {
        arguments.push(target.to_string());
    }

    ResolvedCommand {
        executable: descriptor.command().to_string(),
        arguments,
    }
}
