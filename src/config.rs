use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub evolution: EvolutionConfig,
    #[serde(default)]
    pub monitors: MonitorsConfig,
    /// Display name of the document owner; facts attributed to this entity
    /// lead the knowledge context block.
    #[serde(default = "default_owner")]
    pub owner: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    OpenaiCompatible,
    GoogleGenai,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

impl ProviderConfig {
    /// Fill in an unset model with a sensible default for the provider kind.
    pub fn apply_defaults(&mut self) {
        if self.model.is_empty() {
            self.model = match self.kind {
                ProviderKind::OpenaiCompatible => "openai/gpt-4o-mini".to_string(),
                ProviderKind::GoogleGenai => "gemini-2.5-flash".to_string(),
            };
        }
    }
}

/// Where digests and change alerts go. With no bot token configured the
/// daemon falls back to log-only notifications.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotifierConfig {
    #[serde(default)]
    pub telegram_bot_token: String,
    #[serde(default)]
    pub telegram_chat_id: String,
}

impl NotifierConfig {
    pub fn telegram_enabled(&self) -> bool {
        !self.telegram_bot_token.is_empty() && !self.telegram_chat_id.is_empty()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_document_path")]
    pub document_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            document_path: default_document_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvolutionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_evolution_interval_hours")]
    pub interval_hours: u64,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_hours: default_evolution_interval_hours(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_monitor_tick_secs")]
    pub tick_secs: u64,
    /// Optional token for the GitHub events API; unauthenticated requests
    /// work but rate-limit quickly.
    #[serde(default)]
    pub github_token: String,
}

impl Default for MonitorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: default_monitor_tick_secs(),
            github_token: String::new(),
        }
    }
}

fn default_owner() -> String {
    "user".to_string()
}
fn default_document_path() -> String {
    "evolvd.json".to_string()
}
fn default_evolution_interval_hours() -> u64 {
    6
}
fn default_monitor_tick_secs() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&content)?;
        config.provider.apply_defaults();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let mut config: AppConfig = toml::from_str(
            r#"
            [provider]
            api_key = "sk-test"
            "#,
        )
        .unwrap();
        config.provider.apply_defaults();

        assert_eq!(config.provider.kind, ProviderKind::OpenaiCompatible);
        assert_eq!(config.provider.model, "openai/gpt-4o-mini");
        assert_eq!(config.store.document_path, "evolvd.json");
        assert_eq!(config.evolution.interval_hours, 6);
        assert_eq!(config.monitors.tick_secs, 300);
        assert_eq!(config.owner, "user");
        assert!(!config.notifier.telegram_enabled());
    }

    #[test]
    fn full_config_parses() {
        let config: AppConfig = toml::from_str(
            r#"
            owner = "Younes"

            [provider]
            kind = "google_genai"
            api_key = "key"
            model = "gemini-2.5-pro"

            [notifier]
            telegram_bot_token = "123:abc"
            telegram_chat_id = "42"

            [store]
            document_path = "/var/lib/evolvd/document.json"

            [evolution]
            interval_hours = 12

            [monitors]
            tick_secs = 60
            github_token = "ghp_x"
            "#,
        )
        .unwrap();

        assert_eq!(config.provider.kind, ProviderKind::GoogleGenai);
        assert_eq!(config.owner, "Younes");
        assert!(config.notifier.telegram_enabled());
        assert_eq!(config.evolution.interval_hours, 12);
        assert_eq!(config.monitors.github_token, "ghp_x");
    }
}
