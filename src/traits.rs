use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Text generator — sends a system instruction + user prompt to an LLM,
/// gets back raw text. The core never inspects the provider, only the text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> anyhow::Result<String>;
}

/// Outbound notification delivery. Fire-and-forget at every call site:
/// a failed send is logged by the caller and dropped, never propagated.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> anyhow::Result<()>;
}

/// One public event on a monitored repository.
#[derive(Debug, Clone)]
pub struct RepoEvent {
    pub event_type: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
    #[allow(dead_code)]
    pub payload: Value,
}

/// Source of recent public events for an `owner/repo` slug.
#[async_trait]
pub trait EventsSource: Send + Sync {
    async fn recent_events(&self, repo: &str) -> anyhow::Result<Vec<RepoEvent>>;
}

/// Source of raw page bodies for web monitors.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<String>;
}
