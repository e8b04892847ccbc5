//! Knowledge base operations over the facts/entities/preferences collections.
//!
//! All mutations are keyed upserts, so applying the same logical change twice
//! converges to the same state as applying it once — the property the
//! unlocked document store relies on.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::store::DocumentStore;
use crate::traits::TextGenerator;
use crate::types::{new_id, Document, Entity, Fact, Preference, Relationship};
use crate::utils::ellipsize;

/// Confidence for a fact when the caller/extractor gives none. Fixed at
/// insert and never adjusted on re-mention — unlike preferences.
pub const DEFAULT_FACT_CONFIDENCE: f64 = 0.7;
/// Starting confidence for a new preference.
pub const DEFAULT_PREFERENCE_CONFIDENCE: f64 = 0.6;
/// Reinforcement added each time an existing preference is restated.
const PREFERENCE_REINFORCEMENT: f64 = 0.1;

const CONTEXT_OWNER_FACTS: usize = 15;
const CONTEXT_OTHER_FACTS: usize = 15;
const CONTEXT_ENTITIES: usize = 10;
const CONTEXT_ALERTS: usize = 10;
const CONTEXT_VALUE_CHARS: usize = 120;

/// Insert a fact unless the exact (entity, predicate, object) triple exists.
/// A duplicate only refreshes `last_mentioned`. Returns true when created.
pub fn upsert_fact(
    doc: &mut Document,
    entity: &str,
    predicate: &str,
    object: &str,
    source: &str,
    confidence: Option<f64>,
) -> bool {
    let now = Utc::now();
    if let Some(existing) = doc
        .facts
        .iter_mut()
        .find(|f| f.entity == entity && f.predicate == predicate && f.object == object)
    {
        existing.last_mentioned = now;
        return false;
    }

    doc.facts.push(Fact {
        id: new_id(),
        entity: entity.to_string(),
        predicate: predicate.to_string(),
        object: object.to_string(),
        source: source.to_string(),
        confidence: confidence
            .unwrap_or(DEFAULT_FACT_CONFIDENCE)
            .clamp(0.0, 1.0),
        extracted_at: now,
        last_mentioned: now,
    });
    true
}

/// Insert or reinforce a preference. The key is global (not per-category).
/// An update replaces the value, adds +0.1 confidence (capped at 1.0),
/// refreshes `learned_at`, and counts a correction when the value actually
/// changed. The incoming confidence is only used on create.
pub fn upsert_preference(
    doc: &mut Document,
    category: &str,
    key: &str,
    value: &str,
    confidence: Option<f64>,
) -> bool {
    let now = Utc::now();
    if let Some(existing) = doc.preferences.iter_mut().find(|p| p.key == key) {
        if existing.value != value {
            existing.corrections += 1;
        }
        existing.value = value.to_string();
        existing.confidence = (existing.confidence + PREFERENCE_REINFORCEMENT).min(1.0);
        existing.learned_at = now;
        return false;
    }

    doc.preferences.push(Preference {
        id: new_id(),
        category: category.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        confidence: confidence
            .unwrap_or(DEFAULT_PREFERENCE_CONFIDENCE)
            .clamp(0.0, 1.0),
        learned_at: now,
        corrections: 0,
    });
    true
}

/// Insert an entity unless one with the same name exists (case-insensitive).
/// Re-mentions bump the counter and timestamp; they never overwrite the
/// stored type, description, or properties.
pub fn upsert_entity(
    doc: &mut Document,
    kind: &str,
    name: &str,
    description: &str,
    properties: Map<String, Value>,
) -> bool {
    let now = Utc::now();
    if let Some(existing) = doc
        .entities
        .iter_mut()
        .find(|e| e.name.eq_ignore_ascii_case(name))
    {
        existing.mention_count += 1;
        existing.last_mentioned = now;
        return false;
    }

    doc.entities.push(Entity {
        id: new_id(),
        kind: kind.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        properties,
        mention_count: 1,
        last_mentioned: now,
    });
    true
}

#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub facts: Vec<Fact>,
    pub entities: Vec<Entity>,
    pub preferences: Vec<Preference>,
    /// Returned untouched — no filtering applies to edges.
    pub relationships: Vec<Relationship>,
}

/// Case-insensitive substring match across the string fields of each
/// collection.
pub fn search(doc: &Document, query: &str) -> SearchResults {
    let needle = query.to_lowercase();
    let hit = |s: &str| s.to_lowercase().contains(&needle);

    SearchResults {
        facts: doc
            .facts
            .iter()
            .filter(|f| hit(&f.entity) || hit(&f.predicate) || hit(&f.object))
            .cloned()
            .collect(),
        entities: doc
            .entities
            .iter()
            .filter(|e| hit(&e.name) || hit(&e.description) || hit(&e.kind))
            .cloned()
            .collect(),
        preferences: doc
            .preferences
            .iter()
            .filter(|p| hit(&p.category) || hit(&p.key) || hit(&p.value))
            .cloned()
            .collect(),
        relationships: doc.relationships.clone(),
    }
}

/// Render the bounded knowledge digest that feeds the next generation
/// prompt. The section headers are fixed: nothing parses this text, but
/// downstream prompts rely on a stable shape.
pub fn build_context_block(doc: &Document, owner: &str) -> String {
    let mut out = String::new();

    let mut owner_facts: Vec<&Fact> = doc
        .facts
        .iter()
        .filter(|f| f.entity.eq_ignore_ascii_case(owner))
        .collect();
    owner_facts.sort_by(|a, b| b.last_mentioned.cmp(&a.last_mentioned));

    out.push_str(&format!("## About {}\n", owner));
    if owner_facts.is_empty() {
        out.push_str("(nothing recorded)\n");
    }
    for fact in owner_facts.iter().take(CONTEXT_OWNER_FACTS) {
        out.push_str(&format!(
            "- {} {}\n",
            fact.predicate,
            ellipsize(&fact.object, CONTEXT_VALUE_CHARS)
        ));
    }

    out.push_str("\n## Preferences\n");
    let style_prefs: Vec<&Preference> = doc
        .preferences
        .iter()
        .filter(|p| p.category == "style" || p.category == "communication")
        .collect();
    if style_prefs.is_empty() {
        out.push_str("(none learned)\n");
    }
    for pref in style_prefs {
        out.push_str(&format!(
            "- [{}] {}: {}\n",
            pref.category,
            pref.key,
            ellipsize(&pref.value, CONTEXT_VALUE_CHARS)
        ));
    }

    out.push_str("\n## Entities\n");
    let mut entities: Vec<&Entity> = doc.entities.iter().collect();
    entities.sort_by(|a, b| b.mention_count.cmp(&a.mention_count));
    if entities.is_empty() {
        out.push_str("(none known)\n");
    }
    for entity in entities.iter().take(CONTEXT_ENTITIES) {
        out.push_str(&format!(
            "- {} ({}) — mentioned {}x\n",
            entity.name, entity.kind, entity.mention_count
        ));
    }

    out.push_str("\n## Facts\n");
    let mut other_facts: Vec<&Fact> = doc
        .facts
        .iter()
        .filter(|f| !f.entity.eq_ignore_ascii_case(owner))
        .collect();
    other_facts.sort_by(|a, b| b.last_mentioned.cmp(&a.last_mentioned));
    if other_facts.is_empty() {
        out.push_str("(none recorded)\n");
    }
    for fact in other_facts.iter().take(CONTEXT_OTHER_FACTS) {
        out.push_str(&format!(
            "- {} {} {}\n",
            fact.entity,
            fact.predicate,
            ellipsize(&fact.object, CONTEXT_VALUE_CHARS)
        ));
    }

    out.push_str("\n## Active Monitors\n");
    let active: Vec<_> = doc.monitors.iter().filter(|m| m.enabled).collect();
    if active.is_empty() {
        out.push_str("(none)\n");
    }
    for monitor in active {
        let target = monitor
            .config
            .repo
            .as_deref()
            .or(monitor.config.url.as_deref())
            .unwrap_or("-");
        out.push_str(&format!("- {} → {}\n", monitor.name, target));
    }

    out.push_str("\n## Unread Alerts\n");
    let unread: Vec<_> = doc.alerts.iter().filter(|a| !a.read).collect();
    if unread.is_empty() {
        out.push_str("(none)\n");
    }
    for alert in unread.iter().take(CONTEXT_ALERTS) {
        out.push_str(&format!("- {}\n", ellipsize(&alert.title, CONTEXT_VALUE_CHARS)));
    }

    out
}

// ---------------------------------------------------------------------------
// Generator-backed extraction
// ---------------------------------------------------------------------------

const EXTRACTION_INSTRUCTION: &str = "You extract durable knowledge from conversations. \
Return ONLY a JSON object with three arrays and no other text:\n\
{\"facts\": [{\"entity\": \"\", \"predicate\": \"\", \"object\": \"\", \"confidence\": 0.0}], \
\"preferences\": [{\"category\": \"\", \"key\": \"\", \"value\": \"\", \"confidence\": 0.0}], \
\"entities\": [{\"type\": \"\", \"name\": \"\", \"description\": \"\"}]}\n\
Only include things worth remembering long-term. Empty arrays are fine.";

#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub role: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub facts_added: usize,
    pub preferences_added: usize,
    pub entities_added: usize,
}

#[derive(Debug, Deserialize, Default)]
struct ExtractedPayload {
    #[serde(default)]
    facts: Vec<Value>,
    #[serde(default)]
    preferences: Vec<Value>,
    #[serde(default)]
    entities: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ExtractedFact {
    entity: String,
    predicate: String,
    object: String,
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ExtractedPreference {
    #[serde(default = "default_category")]
    category: String,
    key: String,
    value: String,
    confidence: Option<f64>,
}

fn default_category() -> String {
    "general".to_string()
}

#[derive(Debug, Deserialize)]
struct ExtractedEntity {
    #[serde(rename = "type", default = "default_entity_kind")]
    kind: String,
    name: String,
    #[serde(default)]
    description: String,
}

fn default_entity_kind() -> String {
    "unknown".to_string()
}

pub struct KnowledgeBase {
    store: Arc<DocumentStore>,
    generator: Arc<dyn TextGenerator>,
}

impl KnowledgeBase {
    pub fn new(store: Arc<DocumentStore>, generator: Arc<dyn TextGenerator>) -> Self {
        Self { store, generator }
    }

    /// Ask the generator for extractable knowledge in `turns` and upsert the
    /// results in bulk. Unreachable generator or unparseable output yields a
    /// zero summary, never an error. Individual malformed candidates are
    /// skipped without aborting their siblings.
    pub async fn extract(&self, turns: &[ConversationTurn]) -> ExtractionSummary {
        if turns.is_empty() {
            return ExtractionSummary::default();
        }

        let transcript: String = turns
            .iter()
            .map(|t| format!("{}: {}\n", t.role, t.text))
            .collect();

        let response = match self
            .generator
            .generate(EXTRACTION_INSTRUCTION, &transcript)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Knowledge extraction call failed, skipping");
                return ExtractionSummary::default();
            }
        };

        let payload = match parse_extraction(&response) {
            Some(p) => p,
            None => {
                warn!("Knowledge extraction returned no parseable JSON object");
                return ExtractionSummary::default();
            }
        };

        let mut summary = ExtractionSummary::default();
        let result = self.store.update(|doc| {
            summary = ExtractionSummary::default();
            for raw in &payload.facts {
                let Ok(fact) = serde_json::from_value::<ExtractedFact>(raw.clone()) else {
                    continue;
                };
                if upsert_fact(
                    doc,
                    &fact.entity,
                    &fact.predicate,
                    &fact.object,
                    "conversation",
                    fact.confidence,
                ) {
                    summary.facts_added += 1;
                }
            }
            for raw in &payload.preferences {
                let Ok(pref) = serde_json::from_value::<ExtractedPreference>(raw.clone()) else {
                    continue;
                };
                if upsert_preference(doc, &pref.category, &pref.key, &pref.value, pref.confidence)
                {
                    summary.preferences_added += 1;
                }
            }
            for raw in &payload.entities {
                let Ok(entity) = serde_json::from_value::<ExtractedEntity>(raw.clone()) else {
                    continue;
                };
                if upsert_entity(doc, &entity.kind, &entity.name, &entity.description, Map::new())
                {
                    summary.entities_added += 1;
                }
            }
        });

        if let Err(e) = result {
            warn!(error = %e, "Knowledge extraction could not be persisted");
            return ExtractionSummary::default();
        }

        info!(
            facts = summary.facts_added,
            preferences = summary.preferences_added,
            entities = summary.entities_added,
            "Knowledge extraction applied"
        );
        summary
    }
}

/// Pull a JSON object out of generator text, tolerating a markdown
/// code-fence wrapper and leading/trailing prose.
fn parse_extraction(text: &str) -> Option<ExtractedPayload> {
    let trimmed = text.trim();
    if let Ok(payload) = serde_json::from_str(trimmed) {
        return Some(payload);
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        if let Some(end) = after[body_start..].find("```") {
            let body = after[body_start..body_start + end].trim();
            if let Ok(payload) = serde_json::from_str(body) {
                return Some(payload);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}
