//! Test infrastructure: mock generator, notifier, and monitor sources.
//!
//! Everything external to the engines is scriptable here, so integration
//! tests exercise the real cycle code against a tempdir-backed store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::traits::{EventsSource, Notifier, PageSource, RepoEvent, TextGenerator};

// ---------------------------------------------------------------------------
// MockGenerator
// ---------------------------------------------------------------------------

/// A recorded call to `MockGenerator::generate()`.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct GeneratorCall {
    pub system: String,
    pub prompt: String,
}

/// Scripted LLM stand-in: returns queued responses FIFO, then a default.
pub struct MockGenerator {
    responses: Mutex<Vec<String>>,
    pub call_log: Mutex<Vec<GeneratorCall>>,
    fail_next: AtomicBool,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::with_responses(Vec::new())
    }

    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_log: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Make the next `generate` call fail with a transport-style error.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub async fn call_count(&self) -> usize {
        self.call_log.lock().await.len()
    }

    #[allow(dead_code)]
    pub async fn calls(&self) -> Vec<GeneratorCall> {
        self.call_log.lock().await.clone()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, system: &str, prompt: &str) -> anyhow::Result<String> {
        self.call_log.lock().await.push(GeneratorCall {
            system: system.to_string(),
            prompt: prompt.to_string(),
        });

        if self.fail_next.swap(false, Ordering::SeqCst) {
            anyhow::bail!("mock generator unreachable");
        }

        let mut responses = self.responses.lock().await;
        if responses.is_empty() {
            Ok("Mock response".to_string())
        } else {
            Ok(responses.remove(0))
        }
    }
}

// ---------------------------------------------------------------------------
// MockNotifier
// ---------------------------------------------------------------------------

/// Captures everything sent through it.
pub struct MockNotifier {
    messages: Mutex<Vec<String>>,
    fail_next: AtomicBool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<String> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, text: &str) -> anyhow::Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            anyhow::bail!("mock notifier unreachable");
        }
        self.messages.lock().await.push(text.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Monitor sources
// ---------------------------------------------------------------------------

/// Scriptable repository-events source.
pub struct MockEventsSource {
    events: StdMutex<Vec<RepoEvent>>,
    fail_next: AtomicBool,
}

impl MockEventsSource {
    pub fn new() -> Self {
        Self {
            events: StdMutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn push_event(&self, event_type: &str, actor: &str, created_at: DateTime<Utc>) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RepoEvent {
                event_type: event_type.to_string(),
                actor: actor.to_string(),
                created_at,
                payload: Value::Null,
            });
    }

    #[allow(dead_code)]
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventsSource for MockEventsSource {
    async fn recent_events(&self, _repo: &str) -> anyhow::Result<Vec<RepoEvent>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            anyhow::bail!("mock events source unreachable");
        }
        Ok(self
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}

/// Scriptable page source with settable content.
pub struct MockPageSource {
    content: StdMutex<String>,
    fail_next: AtomicBool,
}

impl MockPageSource {
    pub fn new(content: &str) -> Self {
        Self {
            content: StdMutex::new(content.to_string()),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn set_content(&self, content: &str) {
        *self.content.lock().unwrap_or_else(|e| e.into_inner()) = content.to_string();
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PageSource for MockPageSource {
    async fn fetch(&self, _url: &str) -> anyhow::Result<String> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            anyhow::bail!("mock page source unreachable");
        }
        Ok(self
            .content
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}
