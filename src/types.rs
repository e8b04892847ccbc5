use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The whole persisted document. The dashboard owns the JSON shape, so
/// every collection serializes with camelCase keys. Unknown top-level keys
/// written by other dashboard subsystems survive a round-trip via `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Optimistic concurrency stamp, bumped by every committed write.
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub nav: Vec<NavItem>,
    #[serde(default)]
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub preferences: Vec<Preference>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub monitors: Vec<Monitor>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub feed: Vec<FeedEntry>,
    #[serde(default)]
    pub evolution: EvolutionState,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One dashboard navigation item. Owned by the UI layer; the core only
/// lists these in the evolution situational summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavItem {
    pub id: String,
    pub label: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A knowledge fact. Unique on the exact `(entity, predicate, object)`
/// triple; re-inserting only refreshes `last_mentioned`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fact {
    pub id: String,
    pub entity: String,
    pub predicate: String,
    pub object: String,
    pub source: String,
    pub confidence: f64,
    pub extracted_at: DateTime<Utc>,
    pub last_mentioned: DateTime<Utc>,
}

/// A known entity. Unique on `name`, case-insensitive. Re-mentions bump
/// `mention_count`; they never overwrite type/description/properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    pub mention_count: u64,
    pub last_mentioned: DateTime<Utc>,
}

/// A learned preference — the *current* belief for a key, not a history.
/// Unique on `key` globally. Updates replace the value and reinforce
/// confidence by +0.1 (capped at 1.0).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preference {
    pub id: String,
    pub category: String,
    pub key: String,
    pub value: String,
    pub confidence: f64,
    pub learned_at: DateTime<Utc>,
    #[serde(default)]
    pub corrections: u64,
}

/// An entity-to-entity edge. Persisted and returned by search untouched;
/// no mutation path exists in this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub from: String,
    pub to: String,
    pub relation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    Github,
    Web,
}

/// Type-specific monitor settings plus the per-monitor checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Seconds between checks. Informational for external schedulers; the
    /// engine itself checks every enabled monitor each cycle.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
    /// Content fingerprint from the previous web check. None until the
    /// first check primes it.
    #[serde(default)]
    pub last_hash: Option<String>,
}

pub fn default_check_interval() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MonitorKind,
    pub name: String,
    pub config: MonitorConfig,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Immutable once created, except for the `read` flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub monitor_id: String,
    #[serde(rename = "type")]
    pub kind: MonitorKind,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// One activity-feed line, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry {
    pub id: String,
    pub kind: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// The four command namespaces the generator may emit. Only the first two
/// are mechanically safe to execute without review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    #[serde(rename = "MEMORY_CMD")]
    Memory,
    #[serde(rename = "SCOUT_CMD")]
    Scout,
    #[serde(rename = "DASHBOARD_CMD")]
    Dashboard,
    #[serde(rename = "ACTION_CMD")]
    Action,
}

impl ActionKind {
    pub fn is_safe(self) -> bool {
        matches!(self, ActionKind::Memory | ActionKind::Scout)
    }
}

/// One atomic command embedded in an idea.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionBlock {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub action: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdeaStatus {
    Applied,
    Pending,
}

/// A candidate improvement proposed by the generator, after validation
/// and dedup. `hash` is the content hash over (category, title, blocks).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Idea {
    pub id: String,
    pub category: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    pub status: IdeaStatus,
    pub action_blocks: Vec<ActionBlock>,
    pub suggested_at: DateTime<Utc>,
    pub hash: String,
}

pub fn default_priority() -> String {
    "medium".to_string()
}

/// Append-only audit line for an executed idea.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionHistoryEntry {
    pub id: String,
    pub idea_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub executed_at: DateTime<Utc>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionState {
    #[serde(default)]
    pub ideas: Vec<Idea>,
    #[serde(default)]
    pub history: Vec<EvolutionHistoryEntry>,
    /// RFC3339 of the last completed cycle, "" if never run.
    #[serde(default)]
    pub last_run: String,
    /// Rolling dedup hashes, capped independently of `ideas` so a hash can
    /// outlive the idea it belongs to.
    #[serde(default)]
    pub hashes: Vec<String>,
}

impl Default for EvolutionState {
    fn default() -> Self {
        Self {
            ideas: Vec::new(),
            history: Vec::new(),
            last_run: String::new(),
            hashes: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_round_trips_unknown_keys() {
        let raw = r#"{
            "version": 3,
            "facts": [],
            "marketCache": {"AAPL": 123.4},
            "evolution": {"ideas": [], "history": [], "lastRun": "", "hashes": []}
        }"#;
        let doc: Document = serde_json::from_str(raw).unwrap();
        assert_eq!(doc.version, 3);
        assert!(doc.extra.contains_key("marketCache"));

        let out = serde_json::to_string(&doc).unwrap();
        assert!(out.contains("marketCache"));
    }

    #[test]
    fn action_kind_wire_names() {
        let block: ActionBlock = serde_json::from_str(
            r#"{"type": "MEMORY_CMD", "action": "store_fact", "params": {}}"#,
        )
        .unwrap();
        assert_eq!(block.kind, ActionKind::Memory);
        assert!(block.kind.is_safe());

        let block: ActionBlock =
            serde_json::from_str(r#"{"type": "ACTION_CMD", "action": "run", "params": {}}"#)
                .unwrap();
        assert!(!block.kind.is_safe());
    }

    #[test]
    fn monitor_config_defaults() {
        let cfg: MonitorConfig = serde_json::from_str(r#"{"repo": "rust-lang/rust"}"#).unwrap();
        assert_eq!(cfg.check_interval, 3600);
        assert!(cfg.last_check.is_none());
        assert!(cfg.last_hash.is_none());
    }
}
