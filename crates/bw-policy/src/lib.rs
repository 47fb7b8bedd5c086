//! # bw-policy
//!
//! Configuration loading for Bridgewatch: alert rules, playbooks, and
//! escalation policies from YAML, validated into `bw-core` types.

pub mod config;

pub use config::{
    default_rules, load_playbooks, load_policies, load_rules, ConfigError, ConfigPaths,
    PlaybookConfig, PlaybooksConfig, PoliciesConfig, RulesConfig,
};
