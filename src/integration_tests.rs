//! End-to-end tests: real engines, tempdir-backed store, scripted externals.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::evolution::{CycleSummary, EvolutionEngine};
use crate::monitor::{new_monitor, MonitorEngine};
use crate::store::DocumentStore;
use crate::testing::{MockEventsSource, MockGenerator, MockNotifier, MockPageSource};
use crate::types::{IdeaStatus, MonitorKind};

struct Harness {
    store: Arc<DocumentStore>,
    generator: Arc<MockGenerator>,
    notifier: Arc<MockNotifier>,
    engine: EvolutionEngine,
    _dir: tempfile::TempDir,
}

fn setup(responses: Vec<String>) -> Harness {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(DocumentStore::new(dir.path().join("document.json")));
    let generator = Arc::new(MockGenerator::with_responses(responses));
    let notifier = Arc::new(MockNotifier::new());
    let engine = EvolutionEngine::new(
        store.clone(),
        generator.clone(),
        notifier.clone(),
        "Younes",
    );
    Harness {
        store,
        generator,
        notifier,
        engine,
        _dir: dir,
    }
}

fn idea(category: &str, title: &str, blocks: Value) -> Value {
    json!({
        "category": category,
        "title": title,
        "description": "x",
        "priority": "low",
        "actionBlocks": blocks,
    })
}

#[tokio::test]
async fn timezone_scenario_applies_one_preference() {
    let response = json!([idea(
        "memory",
        "Remember timezone",
        json!([{
            "type": "MEMORY_CMD",
            "action": "store_preference",
            "params": {"key": "timezone", "value": "CET"},
        }]),
    )])
    .to_string();
    let h = setup(vec![response]);

    let summary = h.engine.run_cycle().await.unwrap();
    assert_eq!(summary, CycleSummary { applied: 1, pending: 0, ideas: 1 });

    let doc = h.store.read();
    assert_eq!(doc.preferences.len(), 1);
    assert_eq!(doc.preferences[0].key, "timezone");
    assert_eq!(doc.preferences[0].value, "CET");
    assert_eq!(doc.evolution.ideas.len(), 1);
    assert_eq!(doc.evolution.ideas[0].status, IdeaStatus::Applied);
    assert_eq!(doc.evolution.history.len(), 1);
    assert!(doc.evolution.history[0].summary.contains("Remember timezone"));

    let sent = h.notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Remember timezone"));
}

#[tokio::test]
async fn identical_generator_response_is_idempotent() {
    let response = json!([idea(
        "memory",
        "Remember editor",
        json!([{
            "type": "MEMORY_CMD",
            "action": "store_fact",
            "params": {"entity": "Younes", "predicate": "uses", "object": "Neovim"},
        }]),
    )])
    .to_string();
    let h = setup(vec![response.clone(), response]);

    let first = h.engine.run_cycle().await.unwrap();
    assert_eq!(first.applied, 1);
    let doc = h.store.read();
    let (ideas, hashes, history) = (
        doc.evolution.ideas.len(),
        doc.evolution.hashes.len(),
        doc.evolution.history.len(),
    );

    // Same candidates again: the hash list blocks re-apply and re-queue.
    let second = h.engine.run_cycle().await.unwrap();
    assert_eq!(second, CycleSummary::default());

    let doc = h.store.read();
    assert_eq!(doc.evolution.ideas.len(), ideas);
    assert_eq!(doc.evolution.hashes.len(), hashes);
    assert_eq!(doc.evolution.history.len(), history);
    assert_eq!(doc.facts.len(), 1);
}

#[tokio::test]
async fn dashboard_category_queues_despite_safe_blocks() {
    let safe_blocks = json!([{
        "type": "MEMORY_CMD",
        "action": "store_fact",
        "params": {"entity": "a", "predicate": "b", "object": "c"},
    }]);
    let response = json!([
        idea("memory", "Safe and applied", safe_blocks.clone()),
        idea("dashboard", "Safe but gated", safe_blocks),
    ])
    .to_string();
    let h = setup(vec![response]);

    let summary = h.engine.run_cycle().await.unwrap();
    assert_eq!(summary, CycleSummary { applied: 1, pending: 1, ideas: 2 });

    let doc = h.store.read();
    let gated = doc
        .evolution
        .ideas
        .iter()
        .find(|i| i.title == "Safe but gated")
        .unwrap();
    assert_eq!(gated.status, IdeaStatus::Pending);
    // The gated idea's blocks never executed: only one fact exists and it
    // came from the applied sibling (same triple, deduped anyway).
    assert_eq!(doc.facts.len(), 1);

    let sent = h.notifier.sent().await;
    assert!(sent[0].contains("1. [dashboard] Safe but gated"));
    assert!(sent[0].contains("apply idea #N"));
}

#[tokio::test]
async fn feed_stays_bounded_at_100_across_cycles() {
    // Queue is empty: every cycle gets the default non-JSON mock response,
    // records zero ideas, and still prepends one feed entry.
    let h = setup(Vec::new());

    for _ in 0..150 {
        h.engine.run_cycle().await.unwrap();
    }

    let doc = h.store.read();
    assert_eq!(doc.feed.len(), 100);
    assert!(doc.feed.iter().all(|entry| entry.kind == "evolution"));
    assert!(!doc.evolution.last_run.is_empty());
}

#[tokio::test]
async fn generator_outage_still_completes_the_cycle() {
    let h = setup(Vec::new());
    h.generator.fail_next();

    let summary = h.engine.run_cycle().await.unwrap();
    assert_eq!(summary, CycleSummary::default());

    let doc = h.store.read();
    assert!(!doc.evolution.last_run.is_empty());
    let sent = h.notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("No new ideas"));
}

#[tokio::test]
async fn digest_failure_does_not_fail_the_cycle() {
    let h = setup(Vec::new());
    h.notifier.fail_next();
    let summary = h.engine.run_cycle().await.unwrap();
    assert_eq!(summary, CycleSummary::default());
    assert!(h.notifier.sent().await.is_empty());
}

#[tokio::test]
async fn dedup_hashes_outlive_trimmed_ideas() {
    // 60 distinct ideas in one response: ideas trim to 50, hashes keep 60.
    let ideas: Vec<Value> = (0..60)
        .map(|i| idea("memory", &format!("Idea {}", i), json!([])))
        .collect();
    let h = setup(vec![
        Value::Array(ideas).to_string(),
        // Re-propose an idea whose Idea record was trimmed away.
        json!([idea("memory", "Idea 3", json!([]))]).to_string(),
    ]);

    let first = h.engine.run_cycle().await.unwrap();
    assert_eq!(first.ideas, 60);
    let doc = h.store.read();
    assert_eq!(doc.evolution.ideas.len(), 50);
    assert_eq!(doc.evolution.hashes.len(), 60);
    assert!(!doc.evolution.ideas.iter().any(|i| i.title == "Idea 3"));

    let second = h.engine.run_cycle().await.unwrap();
    assert_eq!(second, CycleSummary::default());
}

#[tokio::test]
async fn one_bad_block_does_not_abort_its_siblings() {
    let response = json!([idea(
        "memory",
        "Partially valid",
        json!([
            {"type": "MEMORY_CMD", "action": "store_fact", "params": {"entity": "only-entity"}},
            {"type": "MEMORY_CMD", "action": "store_preference",
             "params": {"key": "timezone", "value": "CET"}},
        ]),
    )])
    .to_string();
    let h = setup(vec![response]);

    let summary = h.engine.run_cycle().await.unwrap();
    assert_eq!(summary.applied, 1);

    let doc = h.store.read();
    assert!(doc.facts.is_empty());
    assert_eq!(doc.preferences.len(), 1);
    assert!(doc.evolution.history[0].summary.contains("skipped"));
    assert!(doc.evolution.history[0].summary.contains("preference set"));
}

#[tokio::test]
async fn idea_path_monitor_creation_is_strict() {
    let response = json!([idea(
        "scout",
        "Watch the docs site",
        json!([{
            "type": "SCOUT_CMD",
            "action": "add_monitor",
            "params": {"type": "web", "name": "docs", "url": "https://docs.rs"},
        }]),
    )])
    .to_string();
    let h = setup(vec![response]);

    // A monitor with the same url already exists under another name.
    h.store
        .update(|doc| {
            if doc.monitors.is_empty() {
                doc.monitors.push(new_monitor(
                    MonitorKind::Web,
                    "docs-old",
                    None,
                    Some("https://docs.rs".to_string()),
                    None,
                ));
            }
        })
        .unwrap();

    let summary = h.engine.run_cycle().await.unwrap();
    assert_eq!(summary.applied, 1);

    let doc = h.store.read();
    assert_eq!(doc.monitors.len(), 1);
    assert!(doc.evolution.history[0].summary.contains("already exists"));
}

#[tokio::test]
async fn idea_created_monitor_is_checked_by_the_monitor_engine() {
    let response = json!([idea(
        "scout",
        "Watch the changelog",
        json!([{
            "type": "SCOUT_CMD",
            "action": "add_monitor",
            "params": {"type": "web", "name": "changelog", "url": "https://example.com/log"},
        }]),
    )])
    .to_string();
    let h = setup(vec![response]);
    h.engine.run_cycle().await.unwrap();

    let pages = Arc::new(MockPageSource::new("v1"));
    let monitors = MonitorEngine::new(
        h.store.clone(),
        h.notifier.clone(),
        Arc::new(MockEventsSource::new()),
        pages.clone(),
    );

    // Prime, then change.
    let primed = monitors.run_cycle().await.unwrap();
    assert_eq!(primed.checked, 1);
    assert_eq!(primed.alerts_created, 0);

    pages.set_content("v2");
    let changed = monitors.run_cycle().await.unwrap();
    assert_eq!(changed.alerts_created, 1);

    let doc = h.store.read();
    assert_eq!(doc.alerts.len(), 1);
    assert_eq!(doc.alerts[0].kind, MonitorKind::Web);
}

#[tokio::test]
async fn situation_summary_reaches_the_generator() {
    let h = setup(Vec::new());
    h.store
        .update(|doc| {
            doc.monitors.push(new_monitor(
                MonitorKind::Github,
                "rust-repo",
                Some("rust-lang/rust".to_string()),
                None,
                None,
            ));
        })
        .unwrap();

    h.engine.run_cycle().await.unwrap();

    let calls = h.generator.calls().await;
    assert_eq!(calls.len(), 1);
    assert!(calls[0].system.contains("JSON array"));
    assert!(calls[0].prompt.contains("rust-lang/rust"));
    assert!(calls[0].prompt.contains("## Enabled monitors"));
}
