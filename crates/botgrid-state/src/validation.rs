//! Identifier and configuration validation.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{GridError, GridResult};
use crate::types::WorkloadConfig;

fn workload_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^[A-Z0-9]+[A-Z0-9_-]{1,}[A-Z0-9]+$").expect("static regex is valid")
    })
}

/// Whether `id` is usable as a workload identifier.
///
/// Ids are at least three characters of `[A-Za-z0-9_-]`, starting and
/// ending with an alphanumeric character.
pub fn is_valid_workload_id(id: &str) -> bool {
    workload_id_pattern().is_match(id)
}

/// Reject malformed workload identifiers.
pub fn ensure_valid_workload_id(id: &str) -> GridResult<()> {
    if is_valid_workload_id(id) {
        Ok(())
    } else {
        Err(GridError::validation(format!(
            "workload id \"{id}\" contains invalid characters"
        )))
    }
}

/// Enforce `default_language ∈ languages`.
pub fn ensure_languages(config: &WorkloadConfig) -> GridResult<()> {
    if config.languages_consistent() {
        Ok(())
    } else {
        Err(GridError::ConfigurationInvariant {
            workload_id: config.id.clone(),
            default_language: config.default_language.clone(),
        })
    }
}

/// Build a workload id scoped to a workspace prefix, if the workspace has one.
pub fn prefixed_workload_id(id: &str, prefix: Option<&str>) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{p}__{id}"),
        _ => id.to_string(),
    }
}
