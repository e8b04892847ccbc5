//! External-source monitors: GitHub repository events and web page
//! fingerprints. Checks run sequentially in document order so outbound
//! request concurrency stays at one and rate limits stay predictable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::notify::send_best_effort;
use crate::store::DocumentStore;
use crate::traits::{EventsSource, Notifier, PageSource, RepoEvent};
use crate::types::{
    new_id, Alert, Document, FeedEntry, Monitor, MonitorConfig, MonitorKind,
};
use crate::utils::sha256_hex;

const MAX_ALERTS: usize = 100;
/// The monitor path trims the shared feed tighter than the evolution path
/// does; both caps are part of the document's observable behavior.
const MONITOR_FEED_CAP: usize = 50;
const MAX_EVENT_LINES: usize = 5;
/// Window for a github monitor's first check, when there is no checkpoint.
const FIRST_RUN_WINDOW_SECS: i64 = 3600;

/// A detected change, rendered for humans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeResult {
    pub title: String,
    pub description: String,
}

/// Outcome of one web check. `new_hash` is carried even without a change so
/// the first run can prime the fingerprint without alerting.
#[derive(Debug, Clone)]
enum WebCheck {
    NoChange { new_hash: String },
    Changed { result: ChangeResult, new_hash: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorCycleSummary {
    pub checked: usize,
    pub alerts_created: usize,
}

pub struct MonitorEngine {
    store: Arc<DocumentStore>,
    notifier: Arc<dyn Notifier>,
    events: Arc<dyn EventsSource>,
    pages: Arc<dyn PageSource>,
}

impl MonitorEngine {
    pub fn new(
        store: Arc<DocumentStore>,
        notifier: Arc<dyn Notifier>,
        events: Arc<dyn EventsSource>,
        pages: Arc<dyn PageSource>,
    ) -> Self {
        Self {
            store,
            notifier,
            events,
            pages,
        }
    }

    /// Create a monitor directly. Unlike the idea-execution path, this does
    /// NOT reject duplicate names/repos/urls; external callers own their own
    /// dedup. The two paths differ intentionally — see `find_duplicate`.
    pub fn create_monitor(
        &self,
        kind: MonitorKind,
        name: &str,
        repo: Option<String>,
        url: Option<String>,
        check_interval: Option<u64>,
    ) -> anyhow::Result<Monitor> {
        let monitor = new_monitor(kind, name, repo, url, check_interval);
        let created = monitor.clone();
        self.store.update(move |doc| {
            if doc.monitors.iter().any(|m| m.id == monitor.id) {
                return;
            }
            doc.monitors.push(monitor.clone());
        })?;
        info!(name = %created.name, kind = ?created.kind, "Monitor created");
        Ok(created)
    }

    /// Check every enabled monitor once, in document array order. Each
    /// monitor's checkpoint refreshes whether or not anything changed; web
    /// fingerprints persist whenever the fetch produced one. Changes become
    /// alerts, feed entries, and a best-effort notification each.
    pub async fn run_cycle(&self) -> anyhow::Result<MonitorCycleSummary> {
        let doc = self.store.read();
        let enabled: Vec<Monitor> = doc.monitors.iter().filter(|m| m.enabled).cloned().collect();
        drop(doc);

        // External fetches first, one at a time; the document write happens
        // once, after the loop.
        struct Outcome {
            monitor_id: String,
            kind: MonitorKind,
            checked_at: DateTime<Utc>,
            new_hash: Option<String>,
            change: Option<ChangeResult>,
        }

        let mut outcomes: Vec<Outcome> = Vec::with_capacity(enabled.len());
        for monitor in &enabled {
            let checked_at = Utc::now();
            let (new_hash, change) = match monitor.kind {
                MonitorKind::Github => (None, self.check_github(monitor).await),
                MonitorKind::Web => match self.check_web(monitor).await {
                    Some(WebCheck::Changed { result, new_hash }) => (Some(new_hash), Some(result)),
                    Some(WebCheck::NoChange { new_hash }) => (Some(new_hash), None),
                    None => (None, None),
                },
            };
            outcomes.push(Outcome {
                monitor_id: monitor.id.clone(),
                kind: monitor.kind,
                checked_at,
                new_hash,
                change,
            });
        }

        let mut alerts_created = 0usize;
        let mut notifications: Vec<String> = Vec::new();
        self.store.update(|doc| {
            alerts_created = 0;
            notifications.clear();
            for outcome in &outcomes {
                let Some(monitor) = doc.monitors.iter_mut().find(|m| m.id == outcome.monitor_id)
                else {
                    continue;
                };
                monitor.config.last_check = Some(outcome.checked_at);
                if let Some(hash) = &outcome.new_hash {
                    monitor.config.last_hash = Some(hash.clone());
                }
                let monitor_name = monitor.name.clone();

                if let Some(change) = &outcome.change {
                    doc.alerts.push(Alert {
                        id: new_id(),
                        monitor_id: outcome.monitor_id.clone(),
                        kind: outcome.kind,
                        title: change.title.clone(),
                        description: change.description.clone(),
                        read: false,
                        created_at: outcome.checked_at,
                    });
                    doc.feed.insert(
                        0,
                        FeedEntry {
                            id: new_id(),
                            kind: "monitor".to_string(),
                            text: format!("{}: {}", monitor_name, change.title),
                            created_at: outcome.checked_at,
                        },
                    );
                    notifications.push(format!("🔔 {}\n{}", change.title, change.description));
                    alerts_created += 1;
                }
            }

            if doc.alerts.len() > MAX_ALERTS {
                let excess = doc.alerts.len() - MAX_ALERTS;
                doc.alerts.drain(0..excess);
            }
            doc.feed.truncate(MONITOR_FEED_CAP);
        })?;

        for text in &notifications {
            send_best_effort(self.notifier.as_ref(), text).await;
        }

        if alerts_created > 0 {
            info!(checked = enabled.len(), alerts = alerts_created, "Monitor cycle found changes");
        }
        Ok(MonitorCycleSummary {
            checked: enabled.len(),
            alerts_created,
        })
    }

    /// Null when the repo has no qualifying events (or the fetch failed) —
    /// quiet repos never alert.
    async fn check_github(&self, monitor: &Monitor) -> Option<ChangeResult> {
        let Some(repo) = monitor.config.repo.as_deref() else {
            warn!(monitor = %monitor.name, "Github monitor has no repo configured");
            return None;
        };

        let events = match self.events.recent_events(repo).await {
            Ok(events) => events,
            Err(e) => {
                warn!(monitor = %monitor.name, repo, error = %e, "Event fetch failed, skipping check");
                return None;
            }
        };

        let cutoff = monitor
            .config
            .last_check
            .unwrap_or_else(|| Utc::now() - chrono::Duration::seconds(FIRST_RUN_WINDOW_SECS));
        let fresh: Vec<&RepoEvent> = events.iter().filter(|e| e.created_at > cutoff).collect();
        if fresh.is_empty() {
            return None;
        }

        let lines: Vec<String> = fresh
            .iter()
            .take(MAX_EVENT_LINES)
            .map(|e| summarize_event(e))
            .collect();
        Some(ChangeResult {
            title: format!("{}: {} new event(s)", repo, fresh.len()),
            description: lines.join("\n"),
        })
    }

    async fn check_web(&self, monitor: &Monitor) -> Option<WebCheck> {
        let Some(url) = monitor.config.url.as_deref() else {
            warn!(monitor = %monitor.name, "Web monitor has no url configured");
            return None;
        };

        let body = match self.pages.fetch(url).await {
            Ok(body) => body,
            Err(e) => {
                warn!(monitor = %monitor.name, url, error = %e, "Page fetch failed, skipping check");
                return None;
            }
        };

        let new_hash = sha256_hex(&body);
        match monitor.config.last_hash.as_deref() {
            Some(previous) if previous != new_hash => Some(WebCheck::Changed {
                result: ChangeResult {
                    title: format!("Content changed: {}", monitor.name),
                    description: format!("{} no longer matches its last fingerprint", url),
                },
                new_hash,
            }),
            // First run primes the fingerprint without alerting; an
            // unchanged page just refreshes it.
            _ => Some(WebCheck::NoChange { new_hash }),
        }
    }
}

/// Strict duplicate probe used by the idea-execution path: an existing
/// monitor with the same name, repo, or url blocks creation there. The
/// direct `create_monitor` API deliberately does not call this.
pub fn find_duplicate<'a>(
    doc: &'a Document,
    name: &str,
    repo: Option<&str>,
    url: Option<&str>,
) -> Option<&'a Monitor> {
    doc.monitors.iter().find(|m| {
        m.name == name
            || (repo.is_some() && m.config.repo.as_deref() == repo)
            || (url.is_some() && m.config.url.as_deref() == url)
    })
}

pub fn new_monitor(
    kind: MonitorKind,
    name: &str,
    repo: Option<String>,
    url: Option<String>,
    check_interval: Option<u64>,
) -> Monitor {
    Monitor {
        id: new_id(),
        kind,
        name: name.to_string(),
        config: MonitorConfig {
            repo,
            url,
            check_interval: check_interval.unwrap_or_else(crate::types::default_check_interval),
            last_check: None,
            last_hash: None,
        },
        enabled: true,
        created_at: Utc::now(),
    }
}

fn summarize_event(event: &RepoEvent) -> String {
    match event.event_type.as_str() {
        "PushEvent" => format!("⬆ {} pushed commits", event.actor),
        "PullRequestEvent" => format!("🔀 {} opened or updated a pull request", event.actor),
        "IssuesEvent" => format!("🐛 {} touched an issue", event.actor),
        "CreateEvent" => format!("🌱 {} created a branch or tag", event.actor),
        "WatchEvent" => format!("⭐ {} starred the repository", event.actor),
        other => format!("{} · {}", event.actor, other),
    }
}

// ---------------------------------------------------------------------------
// HTTP-backed sources
// ---------------------------------------------------------------------------

const GITHUB_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("evolvd/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct RawGithubEvent {
    #[serde(rename = "type")]
    event_type: String,
    actor: RawActor,
    created_at: DateTime<Utc>,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct RawActor {
    login: String,
}

/// Public-events API client. Unauthenticated requests work; a token raises
/// the rate limit.
pub struct GithubEventsSource {
    client: Client,
    token: String,
}

impl GithubEventsSource {
    pub fn new(token: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl EventsSource for GithubEventsSource {
    async fn recent_events(&self, repo: &str) -> anyhow::Result<Vec<RepoEvent>> {
        let url = format!("{}/repos/{}/events?per_page=10", GITHUB_API_BASE, repo);
        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", "2022-11-28");
        if !self.token.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.token));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("github events API returned {} for {}", status, repo);
        }

        let raw: Vec<RawGithubEvent> = response.json().await?;
        Ok(raw
            .into_iter()
            .map(|e| RepoEvent {
                event_type: e.event_type,
                actor: e.actor.login,
                created_at: e.created_at,
                payload: e.payload,
            })
            .collect())
    }
}

/// Plain GET page source for web monitors.
pub struct HttpPageSource {
    client: Client,
}

impl HttpPageSource {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, url: &str) -> anyhow::Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("fetch of {} returned {}", url, status);
        }
        Ok(response.text().await?)
    }
}
