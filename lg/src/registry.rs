//! Operation registry: the diagnostic operations this service can run

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::ConfigLookup;

/// One token of an argument template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgToken {
    Literal(String),
    /// `{target}`
    Target,
    /// `{config:<key>}`
    Config(String),
}

impl ArgToken {
    pub fn parse(token: &str) -> Self {
        if token == "{target}" {
            return ArgToken::Target;
        }
        match token
            .strip_prefix("{config:")
            .and_then(|rest| rest.strip_suffix('}'))
        {
            Some(key) => ArgToken::Config(key.to_string()),
            None => ArgToken::Literal(token.to_string()),
        }
    }
}

impl fmt::Display for ArgToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgToken::Literal(s) => f.write_str(s),
            ArgToken::Target => f.write_str("{target}"),
            ArgToken::Config(key) => write!(f, "{{config:{key}}}"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("operation {0} declares no validation classes")]
    NoValidationClasses(String),
}

/// How to run and validate one diagnostic command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    name: String,
    command: String,
    template: Vec<ArgToken>,
    classes: Vec<String>,
}

impl OperationDescriptor {
    pub fn new(
        name: &str,
        command: &str,
        template: &[&str],
        classes: &[&str],
    ) -> Result<Self, RegistryError> {
        if classes.is_empty() {
            return Err(RegistryError::NoValidationClasses(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            command: command.to_string(),
            template: template.iter().map(|t| ArgToken::parse(t)).collect(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn template(&self) -> &[ArgToken] {
        &self.template
    }

    pub fn validation_classes(&self) -> &[String] {
        &self.classes
    }
}

/// Built-in operations: name, command, argument template, validation classes.
/// None of the templates carry `{target}`, so the target is appended last.
const BUILTIN_OPERATIONS: &[(&str, &str, &[&str], &[&str])] = &[
    ("mtr", "mtr", &["-c", "5", "-r", "-w", "-b"], &["ip", "hostname"]),
    ("traceroute", "traceroute", &["-w", "1", "-q", "1"], &["ip", "hostname"]),
    ("ping", "ping", &["-c", "{config:feature.ping.count}"], &["ip", "hostname"]),
    ("bgp", "birdc", &["-r", "sh", "ro", "all", "for"], &["ip", "cidr"]),
];

/// Immutable name → descriptor table
#[derive(Debug, Default)]
pub struct Registry {
    operations: HashMap<String, OperationDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            operations: HashMap::new(),
        }
    }

    /// Every built-in operation, ignoring feature flags
    pub fn all_builtin() -> Self {
        Self::seeded(|_| true)
    }

    /// Built-in operations whose `feature.<name>` flag is on. Disabled
    /// operations are left out entirely, so they look unknown to callers.
    pub fn builtin(config: &dyn ConfigLookup) -> Self {
        Self::seeded(|name| {
            let enabled = config.feature_enabled(name);
            if !enabled {
                debug!("Operation disabled: {name}");
            }
            enabled
        })
    }

    fn seeded(enabled: impl Fn(&str) -> bool) -> Self {
        let mut reg = Self::new();
        for (name, command, template, classes) in BUILTIN_OPERATIONS {
            if !enabled(name) {
                continue;
            }
            // The static table always declares classes.
            if let Ok(op) = OperationDescriptor::new(name, command, template, classes) {
                reg.register(op);
            }
        }
        reg
    }

    /// Register an operation, replacing any with the same name
    pub fn register(&mut self, op: OperationDescriptor) {
        info!("Registered operation: {} ({})", op.name, op.command);
        self.operations.insert(op.name.clone(), op);
    }

    /// Exact, case-sensitive lookup
    pub fn lookup(&self, name: &str) -> Option<&OperationDescriptor> {
        self.operations.get(name)
    }

    /// Registered operation names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn test_parse_tokens() {
        assert_eq!(ArgToken::parse("{target}"), ArgToken::Target);
        assert_eq!(
            ArgToken::parse("{config:feature.ping.count}"),
            ArgToken::Config("feature.ping.count".into())
        );
        assert_eq!(ArgToken::parse("-c"), ArgToken::Literal("-c".into()));
        // near misses stay literal
        assert_eq!(ArgToken::parse("{target"), ArgToken::Literal("{target".into()));
        assert_eq!(ArgToken::parse("{TARGET}"), ArgToken::Literal("{TARGET}".into()));
        assert_eq!(
            ArgToken::parse("x{config:a}"),
            ArgToken::Literal("x{config:a}".into())
        );
    }

    #[test]
    fn test_token_display() {
        for raw in ["{target}", "{config:feature.ping.count}", "-w"] {
            assert_eq!(ArgToken::parse(raw).to_string(), raw);
        }
    }

    #[test]
    fn test_descriptor_requires_classes() {
        let err = OperationDescriptor::new("noop", "true", &[], &[]).unwrap_err();
        assert_eq!(err, RegistryError::NoValidationClasses("noop".into()));
    }

    #[test]
    fn test_builtin_table() {
        let reg = Registry::all_builtin();
        assert_eq!(reg.names(), vec!["bgp", "mtr", "ping", "traceroute"]);

        let mtr = reg.lookup("mtr").unwrap();
        assert_eq!(mtr.command(), "mtr");
        assert_eq!(
            mtr.template().iter().map(|t| t.to_string()).collect::<Vec<_>>(),
            vec!["-c", "5", "-r", "-w", "-b"]
        );
        assert_eq!(mtr.validation_classes(), ["ip", "hostname"]);

        let bgp = reg.lookup("bgp").unwrap();
        assert_eq!(bgp.command(), "birdc");
        assert_eq!(bgp.validation_classes(), ["ip", "cidr"]);

        let ping = reg.lookup("ping").unwrap();
        assert_eq!(
            ping.template()[1],
            ArgToken::Config("feature.ping.count".into())
        );
    }

    #[test]
    fn test_no_builtin_has_explicit_target() {
        let reg = Registry::all_builtin();
        for name in reg.names() {
            let op = reg.lookup(name).unwrap();
            assert!(!op.template().contains(&ArgToken::Target), "{name}");
            assert!(!op.validation_classes().is_empty(), "{name}");
        }
    }

    #[test]
    fn test_lookup_is_exact() {
        let reg = Registry::all_builtin();
        assert!(reg.lookup("ping").is_some());
        assert!(reg.lookup("PING").is_none());
        assert!(reg.lookup("ping ").is_none());
        assert!(reg.lookup("").is_none());
        assert!(reg.lookup("birdc").is_none());
    }

    #[test]
    fn test_builtin_respects_feature_flags() {
        let reg = Registry::builtin(&Settings::defaults());
        assert_eq!(reg.names(), vec!["mtr", "ping", "traceroute"]);
        assert!(reg.lookup("bgp").is_none());

        let mut settings = Settings::defaults();
        settings.set("feature.bgp", "true").set("feature.mtr", "false");
        let reg = Registry::builtin(&settings);
        assert_eq!(reg.names(), vec!["bgp", "ping", "traceroute"]);
    }

    #[test]
    fn test_disabled_operations_are_never_registered() {
        let (logs, _guard) = crate::test_logs::capture("info");
        let reg = Registry::builtin(&Settings::defaults());
        assert!(reg.lookup("bgp").is_none());

        let output = logs.contents();
        assert!(output.contains("Registered operation: ping (ping)"), "{output}");
        assert!(!output.contains("birdc"), "{output}");
    }

    #[test]
    fn test_register_overwrites_existing() {
        let mut reg = Registry::new();
        reg.register(OperationDescriptor::new("ping", "ping", &["-c", "1"], &["ip"]).unwrap());
        reg.register(OperationDescriptor::new("ping", "ping6", &["-c", "2"], &["ip"]).unwrap());
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup("ping").unwrap().command(), "ping6");
    }

    #[test]
    fn test_empty_registry() {
        let reg = Registry::new();
        assert!(reg.is_empty());
        assert!(reg.names().is_empty());
        assert!(reg.lookup("mtr").is_none());
    }
}
