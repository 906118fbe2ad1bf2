//! Domain types for BotGrid.
//!
//! These types represent workload configuration, promotion pipeline state,
//! and per-process health. Everything here is serializable to/from JSON,
//! which is the format used both inside the content store (the workload
//! descriptor) and on the shared health store.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fleet-unique identifier of a workload.
pub type WorkloadId = String;

/// Identifier of a workspace (a group of workloads sharing a pipeline).
pub type WorkspaceId = String;

/// Identifier of a fleet process.
pub type ServerId = String;

/// File that marks a directory of the content store as a workload.
pub const DESCRIPTOR_FILE: &str = "workload.config.json";

/// Workspace used when a workload is not referenced by any workspace.
pub const DEFAULT_WORKSPACE: &str = "default";

// ── Workload ───────────────────────────────────────────────────────

/// Structured configuration of a workload, persisted as its descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadConfig {
    pub id: WorkloadId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(rename = "defaultLanguage", default)]
    pub default_language: String,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub pipeline_status: PipelineStatus,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialog: Option<DialogConfig>,
    /// Fields owned by other subsystems, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkloadConfig {
    /// A fresh, enabled configuration with the given languages.
    pub fn new(id: &str, default_language: &str, languages: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            category: None,
            disabled: false,
            private: false,
            locked: false,
            default_language: default_language.to_string(),
            languages: languages.iter().map(|l| l.to_string()).collect(),
            pipeline_status: PipelineStatus::default(),
            details: Map::new(),
            dialog: None,
            extra: Map::new(),
        }
    }

    /// Whether the default language is one of the supported languages.
    pub fn languages_consistent(&self) -> bool {
        self.languages.iter().any(|l| *l == self.default_language)
    }
}

/// Per-workload dialog settings relevant to lifecycle checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DialogConfig {
    /// Inactivity timeout of a conversation (e.g. "10m").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_interval: Option<String>,
}

// ── Pipeline ───────────────────────────────────────────────────────

/// Where a workload sits in its workspace's promotion pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineStatus {
    #[serde(default)]
    pub current_stage: CurrentStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_request: Option<StageRequest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CurrentStage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub promoted_by: String,
    #[serde(default)]
    pub promoted_on: DateTime<Utc>,
}

/// A pending proposal to move a workload to the next stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageRequest {
    pub id: String,
    pub status: RequestStatus,
    pub requested_on: DateTime<Utc>,
    pub requested_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub approvals: Vec<Approval>,
}

impl StageRequest {
    pub fn pending(stage_id: &str, requested_by: &str) -> Self {
        Self {
            id: stage_id.to_string(),
            status: RequestStatus::Pending,
            requested_on: Utc::now(),
            requested_by: requested_by.to_string(),
            expires_on: None,
            message: None,
            approvals: Vec::new(),
        }
    }

    /// Record an approval. Returns false if the same (email, strategy)
    /// pair had already approved.
    pub fn approve(&mut self, email: &str, strategy: &str) -> bool {
        if self
            .approvals
            .iter()
            .any(|a| a.email == email && a.strategy == strategy)
        {
            return false;
        }
        self.approvals.push(Approval {
            email: email.to_string(),
            strategy: strategy.to_string(),
        });
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub email: String,
    pub strategy: String,
}

/// One step of a workspace's promotion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub action: StageAction,
}

/// How a workload is advanced into a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageAction {
    /// Duplicate the workload under a new identity in the new stage.
    PromoteCopy,
    /// Move the same workload into the new stage.
    PromoteMove,
}

impl StageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageAction::PromoteCopy => "promote_copy",
            StageAction::PromoteMove => "promote_move",
        }
    }

    /// Parse an action name. Unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "promote_copy" => Some(StageAction::PromoteCopy),
            "promote_move" => Some(StageAction::PromoteMove),
            _ => None,
        }
    }
}

impl fmt::Display for StageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A member of a workspace, as passed to stage-change hooks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Collaborator {
    pub email: String,
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

// ── Health ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Disabled,
}

/// Kind of event counted against a workload's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Error,
    Warning,
    Critical,
}

/// Health counters of one workload on one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub status: HealthStatus,
    pub error_count: u64,
    pub warning_count: u64,
    pub critical_count: u64,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            status: HealthStatus::Disabled,
            error_count: 0,
            warning_count: 0,
            critical_count: 0,
        }
    }
}

/// A process's health map, as published to the shared store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub server_id: ServerId,
    pub hostname: String,
    #[serde(rename = "bots")]
    pub workloads: HashMap<WorkloadId, HealthRecord>,
}

// ── Files ──────────────────────────────────────────────────────────

/// A file of a workload's persisted tree, addressed by relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub content: Vec<u8>,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_round_trips_unknown_fields() {
        let raw = r#"{
            "id": "s1",
            "name": "Support",
            "defaultLanguage": "en",
            "languages": ["en", "fr"],
            "imports": {"contentTypes": ["builtin_text"]}
        }"#;
        let cfg: WorkloadConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.default_language, "en");
        assert!(cfg.extra.contains_key("imports"));

        let back = serde_json::to_value(&cfg).unwrap();
        assert_eq!(back["imports"]["contentTypes"][0], "builtin_text");
        assert_eq!(back["defaultLanguage"], "en");
    }

    #[test]
    fn languages_consistency() {
        let ok = WorkloadConfig::new("s1", "en", &["en", "fr"]);
        assert!(ok.languages_consistent());

        let bad = WorkloadConfig::new("s1", "de", &["en", "fr"]);
        assert!(!bad.languages_consistent());
    }

    #[test]
    fn approvals_are_deduplicated() {
        let mut req = StageRequest::pending("staging", "alice");
        assert!(req.approve("alice", "local"));
        assert!(!req.approve("alice", "local"));
        assert!(req.approve("alice", "saml"));
        assert_eq!(req.approvals.len(), 2);
    }

    #[test]
    fn stage_action_names() {
        assert_eq!(StageAction::parse("promote_copy"), Some(StageAction::PromoteCopy));
        assert_eq!(StageAction::parse("promote_move"), Some(StageAction::PromoteMove));
        assert_eq!(StageAction::parse("promote_teleport"), None);

        let stage: Stage =
            serde_json::from_str(r#"{"id":"prod","label":"Production","action":"promote_move"}"#)
                .unwrap();
        assert_eq!(stage.action, StageAction::PromoteMove);
    }

    #[test]
    fn health_snapshot_wire_format() {
        let mut workloads = HashMap::new();
        workloads.insert("s1".to_string(), HealthRecord::default());
        let snap = HealthSnapshot {
            server_id: "node-1".to_string(),
            hostname: "host-a".to_string(),
            workloads,
        };
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["serverId"], "node-1");
        assert_eq!(json["bots"]["s1"]["status"], "disabled");
        assert_eq!(json["bots"]["s1"]["criticalCount"], 0);
    }
}
