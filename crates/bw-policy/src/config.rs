//! YAML configuration loader for the Bridgewatch engine.
//!
//! This module loads alert rules, playbooks, and escalation policies from
//! YAML files into validated `bw-core` types. File paths can be overridden
//! through environment variables.

use bw_core::escalation::EscalationPolicySet;
use bw_core::incident::{IncidentCategory, Severity};
use bw_core::playbook::{Playbook, PlaybookPhaseSpec, PlaybookTable};
use bw_core::rules::{AlertRule, RuleMatch, RuleSet};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Environment variable overriding the rules file path.
pub const RULES_PATH_ENV: &str = "BRIDGEWATCH_RULES_PATH";
/// Environment variable overriding the playbooks file path.
pub const PLAYBOOKS_PATH_ENV: &str = "BRIDGEWATCH_PLAYBOOKS_PATH";
/// Environment variable overriding the escalation policies file path.
pub const POLICIES_PATH_ENV: &str = "BRIDGEWATCH_POLICIES_PATH";

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Duplicate rule id: {0}")]
    DuplicateRuleId(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Top-level rules file matching the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    pub rules: Vec<AlertRule>,
}

/// Top-level playbooks file matching the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybooksConfig {
    pub playbooks: Vec<PlaybookConfig>,
}

/// One playbook entry from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookConfig {
    pub category: IncidentCategory,
    pub name: String,
    pub phases: Vec<PlaybookPhaseSpec>,
}

/// Top-level escalation policies file matching the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoliciesConfig {
    pub escalation: EscalationPolicySet,
}

/// Resolved configuration file locations.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub rules: PathBuf,
    pub playbooks: PathBuf,
    pub policies: PathBuf,
}

impl ConfigPaths {
    /// Paths from the environment, falling back to `config/` defaults.
    pub fn from_env() -> Self {
        Self {
            rules: env::var(RULES_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config/rules.yaml")),
            playbooks: env::var(PLAYBOOKS_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config/playbooks.yaml")),
            policies: env::var(POLICIES_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config/policies.yaml")),
        }
    }
}

/// Loads and validates the rules file.
pub fn load_rules(path: impl AsRef<Path>) -> Result<RuleSet, ConfigError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let config: RulesConfig = serde_yaml::from_str(&content)?;
    let rules = validate_rules(config.rules)?;
    info!(path = %path.as_ref().display(), count = rules.len(), "Alert rules loaded");
    Ok(rules)
}

fn validate_rules(rules: Vec<AlertRule>) -> Result<RuleSet, ConfigError> {
    let mut seen = HashSet::new();
    for rule in &rules {
        if rule.id.trim().is_empty() {
            return Err(ConfigError::InvalidValue("rule id must not be empty".to_string()));
        }
        if !seen.insert(rule.id.clone()) {
            return Err(ConfigError::DuplicateRuleId(rule.id.clone()));
        }
        if let RuleMatch::Threshold { count, window_secs, .. } = &rule.matcher {
            if *count == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "rule {}: threshold count must be at least 1",
                    rule.id
                )));
            }
            if *window_secs == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "rule {}: threshold window must be at least 1 second",
                    rule.id
                )));
            }
        }
    }
    Ok(RuleSet::new(rules))
}

/// Loads the playbooks file into a category-keyed table.
pub fn load_playbooks(path: impl AsRef<Path>) -> Result<PlaybookTable, ConfigError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let config: PlaybooksConfig = serde_yaml::from_str(&content)?;

    let mut playbooks = HashMap::new();
    for entry in config.playbooks {
        if entry.phases.is_empty() {
            return Err(ConfigError::InvalidValue(format!(
                "playbook {}: at least one phase is required",
                entry.name
            )));
        }
        if playbooks
            .insert(
                entry.category.clone(),
                Playbook {
                    name: entry.name.clone(),
                    phases: entry.phases,
                },
            )
            .is_some()
        {
            return Err(ConfigError::InvalidValue(format!(
                "duplicate playbook for category {}",
                entry.category
            )));
        }
    }
    info!(path = %path.as_ref().display(), count = playbooks.len(), "Playbooks loaded");
    Ok(PlaybookTable::new(playbooks))
}

/// Loads and validates the escalation policies file.
pub fn load_policies(path: impl AsRef<Path>) -> Result<EscalationPolicySet, ConfigError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let config: PoliciesConfig = serde_yaml::from_str(&content)?;
    let set = config.escalation;

    for severity in [Severity::Critical, Severity::High, Severity::Medium, Severity::Low] {
        let policy = set.for_severity(severity);
        if policy.ack_deadline_secs >= policy.resolution_deadline_secs {
            return Err(ConfigError::InvalidValue(format!(
                "{} policy: ack deadline must be shorter than resolution deadline",
                severity
            )));
        }
    }
    info!(path = %path.as_ref().display(), "Escalation policies loaded");
    Ok(set)
}

/// Built-in rule set used when no rules file is present.
pub fn default_rules() -> RuleSet {
    RuleSet::new(vec![
        AlertRule {
            id: "injection-attempt".to_string(),
            name: "Injection attempt against bridge endpoint".to_string(),
            severity: Severity::Critical,
            category: IncidentCategory::InjectionAttack,
            matcher: RuleMatch::Direct {
                category: "security.injection_attempt".to_string(),
                details: HashMap::new(),
            },
            actions: vec!["block_source_ip".to_string()],
            enabled: true,
        },
        AlertRule {
            id: "auth-failure-burst".to_string(),
            name: "Repeated authentication failures".to_string(),
            severity: Severity::High,
            category: IncidentCategory::AuthenticationAttack,
            matcher: RuleMatch::Threshold {
                category: "auth.failure".to_string(),
                count: 5,
                window_secs: 300,
            },
            actions: vec!["block_source_ip".to_string(), "lock_account".to_string()],
            enabled: true,
        },
        AlertRule {
            id: "unauthorized-config-change".to_string(),
            name: "Unauthorized configuration change".to_string(),
            severity: Severity::Medium,
            category: IncidentCategory::PolicyViolation,
            matcher: RuleMatch::Direct {
                category: "config.change".to_string(),
                details: HashMap::from([(
                    "unauthorized".to_string(),
                    serde_json::Value::Bool(true),
                )]),
            },
            actions: vec!["revert_configuration".to_string()],
            enabled: true,
        },
        AlertRule {
            id: "bulk-export".to_string(),
            name: "Bulk data export outside change window".to_string(),
            severity: Severity::High,
            category: IncidentCategory::DataBreach,
            matcher: RuleMatch::Direct {
                category: "data.bulk_export".to_string(),
                details: HashMap::new(),
            },
            actions: vec!["terminate_sessions".to_string()],
            enabled: true,
        },
    ])
}
