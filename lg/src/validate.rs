//! Target validation
//!
//! A target is accepted when it satisfies at least one of the validation
//! classes an operation declares. Each class is a [`TargetRule`]; new
//! classes are added to the [`TargetValidator`] table by name.

use std::collections::HashMap;
use std::net::IpAddr;

use tracing::warn;

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// A named syntax check for targets
pub trait TargetRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whole-string match; partial matches are failures.
    fn matches(&self, target: &str) -> bool;
}

/// IPv4 or IPv6 literal
pub struct IpRule;

impl TargetRule for IpRule {
    fn name(&self) -> &'static str {
        "ip"
    }

    fn matches(&self, target: &str) -> bool {
        target.parse::<IpAddr>().is_ok()
    }
}

/// DNS hostname: dot-separated labels of ASCII alphanumerics and hyphens
pub struct HostnameRule;

impl TargetRule for HostnameRule {
    fn name(&self) -> &'static str {
        "hostname"
    }

    fn matches(&self, target: &str) -> bool {
        if target.is_empty() || target.len() > MAX_HOSTNAME_LEN {
            return false;
        }
        target.split('.').all(valid_label)
    }
}

fn valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// `address/prefix` for either address family
pub struct CidrRule;

impl TargetRule for CidrRule {
    fn name(&self) -> &'static str {
        "cidr"
    }

    fn matches(&self, target: &str) -> bool {
        let Some((addr, prefix)) = target.split_once('/') else {
            return false;
        };
        let Ok(addr) = addr.parse::<IpAddr>() else {
            return false;
        };
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        let Ok(prefix) = prefix.parse::<u8>() else {
            return false;
        };
        let max = if addr.is_ipv4() { 32 } else { 128 };
        prefix <= max
    }
}

/// Table of validation classes, keyed by class name
pub struct TargetValidator {
    rules: HashMap<&'static str, Box<dyn TargetRule>>,
}

impl TargetValidator {
    /// Empty table; every target fails until rules are added.
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// `ip`, `hostname` and `cidr`.
    pub fn builtin() -> Self {
        Self::empty()
            .with_rule(IpRule)
            .with_rule(HostnameRule)
            .with_rule(CidrRule)
    }

    /// Add (or replace) a class.
    pub fn with_rule<R: TargetRule + 'static>(mut self, rule: R) -> Self {
        self.rules.insert(rule.name(), Box::new(rule));
        self
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.rules.contains_key(class)
    }

    /// True on the first class that matches. Unknown class names never match.
    pub fn is_valid<S: AsRef<str>>(&self, target: &str, classes: &[S]) -> bool {
        classes.iter().any(|class| {
            let class = class.as_ref();
            match self.rules.get(class) {
                Some(rule) => rule.matches(target),
                None => {
                    warn!("Unknown validation class: {class}");
                    false
                }
            }
        })
    }
}

impl Default for TargetValidator {
    fn default() -> Self {
        Self::builtin()
    }
}
