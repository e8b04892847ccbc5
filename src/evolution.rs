//! The evolution cycle: ask the generator for improvement ideas, dedup them
//! by content hash, auto-apply the mechanically safe subset, queue the rest
//! for human approval, and report a digest.
//!
//! Re-running a cycle against an unchanged situation must converge: the
//! rolling hash list guarantees a re-proposed idea is neither re-applied nor
//! re-queued.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::knowledge::{upsert_fact, upsert_preference};
use crate::monitor::{find_duplicate, new_monitor};
use crate::notify::send_best_effort;
use crate::store::DocumentStore;
use crate::traits::{Notifier, TextGenerator};
use crate::types::{
    default_priority, new_id, ActionBlock, ActionKind, Document, EvolutionHistoryEntry, FeedEntry,
    Idea, IdeaStatus, MonitorKind,
};
use crate::utils::{ellipsize, sha256_hex};

const MAX_HASHES: usize = 100;
const MAX_IDEAS: usize = 50;
const MAX_HISTORY: usize = 50;
/// The evolution path allows a longer feed than the monitor path; the
/// asymmetry is part of the document's observable behavior.
const EVOLUTION_FEED_CAP: usize = 100;
const SUMMARY_FEED_LINES: usize = 10;
const SUMMARY_HISTORY_LINES: usize = 5;
const SUMMARY_ALERT_LINES: usize = 10;

/// Categories that always require approval, even when every action block is
/// mechanically safe — they represent user-facing behavior changes.
const APPROVAL_CATEGORIES: [&str; 2] = ["dashboard", "workflow"];

const GENERATION_INSTRUCTION: &str = "You are the self-improvement engine of a personal \
command-center dashboard. Given the current system state, propose a few concrete, small \
improvements.\n\
Respond with ONLY a JSON array, no prose, no markdown. Each element:\n\
{\"category\": \"memory|scout|dashboard|workflow\", \"title\": \"...\", \"description\": \"...\", \
\"priority\": \"low|medium|high\", \"actionBlocks\": [{\"type\": \"MEMORY_CMD|SCOUT_CMD|DASHBOARD_CMD|ACTION_CMD\", \
\"action\": \"...\", \"params\": {}}]}\n\
Known safe actions: MEMORY_CMD/store_fact {entity, predicate, object}, \
MEMORY_CMD/store_preference {key, value, category?}, \
SCOUT_CMD/add_monitor {type: github|web, name, repo?, url?, checkInterval?}.\n\
An empty array is a valid answer.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub applied: usize,
    pub pending: usize,
    /// Ideas recorded this cycle (applied + pending), after dedup.
    pub ideas: usize,
}

#[derive(Debug, Clone)]
struct PendingIdea {
    title: String,
    category: String,
}

/// One idea candidate as the generator proposes it. `category`, `title`,
/// and `actionBlocks` are required; a candidate missing any of them fails
/// deserialization and is dropped without aborting its siblings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdeaCandidate {
    category: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_priority")]
    priority: String,
    action_blocks: Vec<ActionBlock>,
}

pub struct EvolutionEngine {
    store: Arc<DocumentStore>,
    generator: Arc<dyn TextGenerator>,
    notifier: Arc<dyn Notifier>,
    owner: String,
}

impl EvolutionEngine {
    pub fn new(
        store: Arc<DocumentStore>,
        generator: Arc<dyn TextGenerator>,
        notifier: Arc<dyn Notifier>,
        owner: &str,
    ) -> Self {
        Self {
            store,
            generator,
            notifier,
            owner: owner.to_string(),
        }
    }

    /// One full iteration. Never errors on external failure: an unreachable
    /// generator or unparseable response degrades to a zero-idea cycle that
    /// still stamps `last_run`.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleSummary> {
        let doc = self.store.read();
        let situation = build_situation_summary(&doc, &self.owner);
        drop(doc);

        let response = match self
            .generator
            .generate(GENERATION_INSTRUCTION, &situation)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Idea generation failed, running a zero-idea cycle");
                String::new()
            }
        };
        let candidates = parse_idea_candidates(&response);

        let mut applied: Vec<String> = Vec::new();
        let mut pending: Vec<PendingIdea> = Vec::new();
        self.store.update(|doc| {
            applied.clear();
            pending.clear();
            for candidate in &candidates {
                let hash = idea_hash(candidate);
                if doc.evolution.hashes.contains(&hash) {
                    continue;
                }

                let now = Utc::now();
                let idea_id = new_id();
                let status = if is_auto_appliable(candidate) {
                    let results: Vec<String> = candidate
                        .action_blocks
                        .iter()
                        .map(|block| execute_action(doc, block))
                        .collect();
                    doc.evolution.history.push(EvolutionHistoryEntry {
                        id: new_id(),
                        idea_id: idea_id.clone(),
                        kind: "auto_applied".to_string(),
                        executed_at: now,
                        summary: format!("{}: {}", candidate.title, results.join("; ")),
                    });
                    applied.push(candidate.title.clone());
                    IdeaStatus::Applied
                } else {
                    pending.push(PendingIdea {
                        title: candidate.title.clone(),
                        category: candidate.category.clone(),
                    });
                    IdeaStatus::Pending
                };

                doc.evolution.ideas.push(Idea {
                    id: idea_id,
                    category: candidate.category.clone(),
                    title: candidate.title.clone(),
                    description: candidate.description.clone(),
                    priority: candidate.priority.clone(),
                    status,
                    action_blocks: candidate.action_blocks.clone(),
                    suggested_at: now,
                    hash: hash.clone(),
                });
                doc.evolution.hashes.push(hash);
            }

            trim_to_last(&mut doc.evolution.hashes, MAX_HASHES);
            trim_to_last(&mut doc.evolution.ideas, MAX_IDEAS);
            trim_to_last(&mut doc.evolution.history, MAX_HISTORY);

            doc.feed.insert(
                0,
                FeedEntry {
                    id: new_id(),
                    kind: "evolution".to_string(),
                    text: format!(
                        "Evolution cycle: {} applied, {} pending",
                        applied.len(),
                        pending.len()
                    ),
                    created_at: Utc::now(),
                },
            );
            doc.feed.truncate(EVOLUTION_FEED_CAP);

            doc.evolution.last_run = Utc::now().to_rfc3339();
        })?;

        let digest = render_digest(&applied, &pending);
        send_best_effort(self.notifier.as_ref(), &digest).await;

        let summary = CycleSummary {
            applied: applied.len(),
            pending: pending.len(),
            ideas: applied.len() + pending.len(),
        };
        info!(
            applied = summary.applied,
            pending = summary.pending,
            candidates = candidates.len(),
            "Evolution cycle complete"
        );
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Situational summary and digest rendering
// ---------------------------------------------------------------------------

fn build_situation_summary(doc: &Document, owner: &str) -> String {
    let mut out = String::from("# Current system state\n\n");

    out.push_str("## Navigation\n");
    if doc.nav.is_empty() {
        out.push_str("(default)\n");
    }
    for item in &doc.nav {
        out.push_str(&format!(
            "- {}{}\n",
            item.label,
            if item.enabled { "" } else { " (disabled)" }
        ));
    }

    out.push_str("\n## Enabled monitors\n");
    let enabled: Vec<_> = doc.monitors.iter().filter(|m| m.enabled).collect();
    if enabled.is_empty() {
        out.push_str("(none)\n");
    }
    for monitor in enabled {
        let target = monitor
            .config
            .repo
            .as_deref()
            .or(monitor.config.url.as_deref())
            .unwrap_or("-");
        out.push_str(&format!("- {} → {}\n", monitor.name, target));
    }

    out.push_str(&format!(
        "\n## Knowledge base\nfacts: {}, entities: {}, preferences: {}, relationships: {}\n",
        doc.facts.len(),
        doc.entities.len(),
        doc.preferences.len(),
        doc.relationships.len()
    ));

    out.push_str("\n## Open alerts\n");
    let unread: Vec<_> = doc.alerts.iter().filter(|a| !a.read).collect();
    if unread.is_empty() {
        out.push_str("(none)\n");
    }
    for alert in unread.iter().take(SUMMARY_ALERT_LINES) {
        out.push_str(&format!("- {}\n", ellipsize(&alert.title, 120)));
    }

    out.push_str("\n## Recent activity\n");
    if doc.feed.is_empty() {
        out.push_str("(none)\n");
    }
    for entry in doc.feed.iter().take(SUMMARY_FEED_LINES) {
        out.push_str(&format!("- [{}] {}\n", entry.kind, ellipsize(&entry.text, 120)));
    }

    out.push_str("\n## Known entities\n");
    if doc.entities.is_empty() {
        out.push_str("(none)\n");
    }
    for entity in &doc.entities {
        out.push_str(&format!("- {} ({})\n", entity.name, entity.kind));
    }

    out.push_str("\n## Recent evolution history\n");
    if doc.evolution.history.is_empty() {
        out.push_str("(none)\n");
    }
    for entry in doc.evolution.history.iter().rev().take(SUMMARY_HISTORY_LINES) {
        out.push_str(&format!("- {}\n", ellipsize(&entry.summary, 160)));
    }

    out.push_str(&format!(
        "\nOwner: {}\nLast cycle: {}\n",
        owner,
        if doc.evolution.last_run.is_empty() {
            "never"
        } else {
            &doc.evolution.last_run
        }
    ));

    out
}

fn render_digest(applied: &[String], pending: &[PendingIdea]) -> String {
    if applied.is_empty() && pending.is_empty() {
        return "🧬 Evolution digest\nNo new ideas this cycle.".to_string();
    }

    let mut out = String::from("🧬 Evolution digest\n");

    if !applied.is_empty() {
        out.push_str("\nApplied automatically:\n");
        for title in applied {
            out.push_str(&format!("• {}\n", title));
        }
    }

    if !pending.is_empty() {
        out.push_str("\nAwaiting your approval:\n");
        for (index, idea) in pending.iter().enumerate() {
            out.push_str(&format!("{}. [{}] {}\n", index + 1, idea.category, idea.title));
        }
        out.push_str("\nReply \"apply idea #N\" or \"reject idea #N\".\n");
    }

    out
}

// ---------------------------------------------------------------------------
// Candidate parsing, hashing, classification
// ---------------------------------------------------------------------------

/// Parse the generator response into candidates: direct JSON-array parse
/// first, then the first `[...]` substring (which also covers code-fence
/// wrappers), otherwise zero candidates. Elements that fail validation are
/// dropped individually.
fn parse_idea_candidates(text: &str) -> Vec<IdeaCandidate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let elements = match serde_json::from_str::<Vec<Value>>(trimmed) {
        Ok(elements) => elements,
        Err(_) => match extract_array_substring(trimmed) {
            Some(elements) => elements,
            None => {
                warn!("Generator response carried no parseable JSON array");
                return Vec::new();
            }
        },
    };

    elements
        .into_iter()
        .filter_map(|element| serde_json::from_value::<IdeaCandidate>(element).ok())
        .collect()
}

fn extract_array_substring(text: &str) -> Option<Vec<Value>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Content hash over (category, title, action blocks), order-sensitive over
/// the serialized blocks. The dedup key for the rolling hash list.
fn idea_hash(candidate: &IdeaCandidate) -> String {
    let blocks = serde_json::to_string(&candidate.action_blocks).unwrap_or_default();
    sha256_hex(&format!(
        "{}|{}|{}",
        candidate.category, candidate.title, blocks
    ))
}

/// Safe to apply without review iff every block is a memory/scout command
/// *and* the category is not one of the always-approve ones.
fn is_auto_appliable(candidate: &IdeaCandidate) -> bool {
    if APPROVAL_CATEGORIES.contains(&candidate.category.as_str()) {
        return false;
    }
    candidate.action_blocks.iter().all(|b| b.kind.is_safe())
}

// ---------------------------------------------------------------------------
// Safe-action registry
// ---------------------------------------------------------------------------

/// Handler for one safe action. Total by construction: failures come back
/// as result strings, so one bad block never aborts its siblings or the
/// cycle.
type ActionHandler = fn(&mut Document, &Map<String, Value>) -> String;

fn handler_for(kind: ActionKind, action: &str) -> Option<ActionHandler> {
    match (kind, action) {
        (ActionKind::Memory, "store_fact") => Some(apply_store_fact),
        (ActionKind::Memory, "store_preference") => Some(apply_store_preference),
        (ActionKind::Scout, "add_monitor") => Some(apply_add_monitor),
        _ => None,
    }
}

fn execute_action(doc: &mut Document, block: &ActionBlock) -> String {
    match handler_for(block.kind, &block.action) {
        Some(handler) => handler(doc, &block.params),
        None => format!("skipped: no handler for {:?}/{}", block.kind, block.action),
    }
}

fn str_param<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn apply_store_fact(doc: &mut Document, params: &Map<String, Value>) -> String {
    let (Some(entity), Some(predicate), Some(object)) = (
        str_param(params, "entity"),
        str_param(params, "predicate"),
        str_param(params, "object"),
    ) else {
        return "skipped: store_fact needs entity, predicate, object".to_string();
    };

    let confidence = params.get("confidence").and_then(Value::as_f64);
    if upsert_fact(doc, entity, predicate, object, "evolution", confidence) {
        format!("fact recorded: {} {} {}", entity, predicate, object)
    } else {
        format!("fact already known: {} {} {}", entity, predicate, object)
    }
}

fn apply_store_preference(doc: &mut Document, params: &Map<String, Value>) -> String {
    let (Some(key), Some(value)) = (str_param(params, "key"), str_param(params, "value")) else {
        return "skipped: store_preference needs key, value".to_string();
    };

    let category = str_param(params, "category").unwrap_or("general");
    let confidence = params.get("confidence").and_then(Value::as_f64);
    if upsert_preference(doc, category, key, value, confidence) {
        format!("preference set: {} = {}", key, value)
    } else {
        format!("preference reinforced: {} = {}", key, value)
    }
}

fn apply_add_monitor(doc: &mut Document, params: &Map<String, Value>) -> String {
    let Some(name) = str_param(params, "name") else {
        return "skipped: add_monitor needs a name".to_string();
    };
    let kind = match str_param(params, "type") {
        Some("github") => MonitorKind::Github,
        Some("web") => MonitorKind::Web,
        Some(other) => return format!("skipped: unknown monitor type {}", other),
        None => return "skipped: add_monitor needs a type".to_string(),
    };

    let repo = str_param(params, "repo").map(str::to_string);
    let url = str_param(params, "url").map(str::to_string);
    // The idea path is strict about duplicates; the direct monitor API is
    // not. Keep the asymmetry.
    if let Some(existing) = find_duplicate(doc, name, repo.as_deref(), url.as_deref()) {
        return format!("monitor already exists: {}", existing.name);
    }

    let check_interval = params.get("checkInterval").and_then(Value::as_u64);
    let monitor = new_monitor(kind, name, repo, url, check_interval);
    let result = format!("monitor created: {}", monitor.name);
    doc.monitors.push(monitor);
    result
}

fn trim_to_last<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(0..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(category: &str, title: &str, blocks: &str) -> IdeaCandidate {
        serde_json::from_value(serde_json::json!({
            "category": category,
            "title": title,
            "actionBlocks": serde_json::from_str::<Vec<Value>>(blocks).unwrap(),
        }))
        .unwrap()
    }

    const MEMORY_BLOCK: &str =
        r#"[{"type": "MEMORY_CMD", "action": "store_fact", "params": {"entity": "a", "predicate": "b", "object": "c"}}]"#;

    #[test]
    fn parse_accepts_direct_array() {
        let text = r#"[{"category": "memory", "title": "t", "actionBlocks": []}]"#;
        assert_eq!(parse_idea_candidates(text).len(), 1);
    }

    #[test]
    fn parse_falls_back_to_array_substring() {
        let fenced = "Here you go:\n```json\n[{\"category\": \"memory\", \"title\": \"t\", \"actionBlocks\": []}]\n```\nDone.";
        assert_eq!(parse_idea_candidates(fenced).len(), 1);

        let prose = "Some ideas: [{\"category\": \"scout\", \"title\": \"s\", \"actionBlocks\": []}] hope that helps";
        assert_eq!(parse_idea_candidates(prose).len(), 1);
    }

    #[test]
    fn parse_garbage_yields_zero_candidates() {
        assert!(parse_idea_candidates("").is_empty());
        assert!(parse_idea_candidates("I have no ideas today.").is_empty());
        assert!(parse_idea_candidates("[not json]").is_empty());
    }

    #[test]
    fn candidates_missing_required_fields_are_dropped_individually() {
        let text = r#"[
            {"category": "memory", "title": "keep me", "actionBlocks": []},
            {"title": "no category", "actionBlocks": []},
            {"category": "memory", "actionBlocks": []},
            {"category": "memory", "title": "no blocks"}
        ]"#;
        let parsed = parse_idea_candidates(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].title, "keep me");
    }

    #[test]
    fn idea_hash_is_order_sensitive_over_blocks() {
        let two_blocks = r#"[
            {"type": "MEMORY_CMD", "action": "store_fact", "params": {"entity": "a", "predicate": "p", "object": "o"}},
            {"type": "MEMORY_CMD", "action": "store_preference", "params": {"key": "k", "value": "v"}}
        ]"#;
        let reversed = r#"[
            {"type": "MEMORY_CMD", "action": "store_preference", "params": {"key": "k", "value": "v"}},
            {"type": "MEMORY_CMD", "action": "store_fact", "params": {"entity": "a", "predicate": "p", "object": "o"}}
        ]"#;
        let a = idea_hash(&candidate("memory", "t", two_blocks));
        let b = idea_hash(&candidate("memory", "t", reversed));
        assert_ne!(a, b);

        let again = idea_hash(&candidate("memory", "t", two_blocks));
        assert_eq!(a, again);
    }

    #[test]
    fn category_gate_overrides_block_safety() {
        assert!(is_auto_appliable(&candidate("memory", "t", MEMORY_BLOCK)));
        assert!(!is_auto_appliable(&candidate("dashboard", "t", MEMORY_BLOCK)));
        assert!(!is_auto_appliable(&candidate("workflow", "t", MEMORY_BLOCK)));
    }

    #[test]
    fn unsafe_blocks_force_approval() {
        let mixed = r#"[
            {"type": "MEMORY_CMD", "action": "store_fact", "params": {}},
            {"type": "ACTION_CMD", "action": "restart", "params": {}}
        ]"#;
        assert!(!is_auto_appliable(&candidate("memory", "t", mixed)));
    }

    #[test]
    fn registry_has_exactly_the_safe_handlers() {
        assert!(handler_for(ActionKind::Memory, "store_fact").is_some());
        assert!(handler_for(ActionKind::Memory, "store_preference").is_some());
        assert!(handler_for(ActionKind::Scout, "add_monitor").is_some());
        assert!(handler_for(ActionKind::Memory, "add_monitor").is_none());
        assert!(handler_for(ActionKind::Scout, "store_fact").is_none());
        assert!(handler_for(ActionKind::Dashboard, "anything").is_none());
    }

    #[test]
    fn store_fact_handler_validates_params() {
        let mut doc = Document::default();
        let block: ActionBlock = serde_json::from_str(
            r#"{"type": "MEMORY_CMD", "action": "store_fact", "params": {"entity": "a"}}"#,
        )
        .unwrap();
        let result = execute_action(&mut doc, &block);
        assert!(result.starts_with("skipped:"));
        assert!(doc.facts.is_empty());
    }

    #[test]
    fn add_monitor_handler_rejects_duplicates() {
        let mut doc = Document::default();
        let block: ActionBlock = serde_json::from_str(
            r#"{"type": "SCOUT_CMD", "action": "add_monitor",
                "params": {"type": "web", "name": "docs", "url": "https://docs.rs"}}"#,
        )
        .unwrap();

        assert!(execute_action(&mut doc, &block).starts_with("monitor created"));
        assert!(execute_action(&mut doc, &block).contains("already exists"));
        assert_eq!(doc.monitors.len(), 1);
        assert!(doc.monitors[0].enabled);
        assert_eq!(doc.monitors[0].config.check_interval, 3600);
        assert!(doc.monitors[0].config.last_check.is_none());
        assert!(doc.monitors[0].config.last_hash.is_none());
    }

    #[test]
    fn digest_numbers_pending_from_one() {
        let pending = vec![
            PendingIdea { title: "Dark mode".into(), category: "dashboard".into() },
            PendingIdea { title: "Weekly report".into(), category: "workflow".into() },
        ];
        let digest = render_digest(&["Remember timezone".to_string()], &pending);
        assert!(digest.contains("• Remember timezone"));
        assert!(digest.contains("1. [dashboard] Dark mode"));
        assert!(digest.contains("2. [workflow] Weekly report"));
        assert!(digest.contains("apply idea #N"));
    }

    #[test]
    fn empty_digest_is_explicit() {
        let digest = render_digest(&[], &[]);
        assert!(digest.contains("No new ideas"));
    }

    #[test]
    fn situation_summary_has_fixed_sections() {
        let doc = Document::default();
        let summary = build_situation_summary(&doc, "Younes");
        for header in [
            "# Current system state",
            "## Navigation",
            "## Enabled monitors",
            "## Knowledge base",
            "## Open alerts",
            "## Recent activity",
            "## Known entities",
            "## Recent evolution history",
        ] {
            assert!(summary.contains(header), "missing {header}");
        }
        assert!(summary.contains("Last cycle: never"));
    }

    #[test]
    fn trim_keeps_the_most_recent_tail() {
        let mut items: Vec<u32> = (0..130).collect();
        trim_to_last(&mut items, 100);
        assert_eq!(items.len(), 100);
        assert_eq!(items[0], 30);
        assert_eq!(*items.last().unwrap(), 129);
    }
}
