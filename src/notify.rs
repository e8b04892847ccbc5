//! Outbound notifications. One delivery target (Telegram) plus a log-only
//! fallback; every caller goes through `send_best_effort`, so a dead
//! notifier degrades to a warning and never aborts a cycle.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::traits::Notifier;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const SEND_TIMEOUT_SECS: u64 = 30;

/// Telegram Bot API `sendMessage` over plain HTTP. Delivery only; inbound
/// Telegram traffic is handled elsewhere.
pub struct TelegramNotifier {
    client: Client,
    bot_token: String,
    chat_id: String,
}

impl Drop for TelegramNotifier {
    fn drop(&mut self) {
        self.bot_token.zeroize();
    }
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) -> anyhow::Result<()> {
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API_BASE, self.bot_token);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": text,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("telegram sendMessage returned {}: {}", status, body);
        }
        debug!(chars = text.len(), "Notification delivered");
        Ok(())
    }
}

/// Fallback when no bot token is configured: notifications land in the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) -> anyhow::Result<()> {
        tracing::info!("notification: {}", text);
        Ok(())
    }
}

/// Deliver `text`, logging and dropping any failure. Notification delivery
/// is fire-and-forget by contract.
pub async fn send_best_effort(notifier: &dyn Notifier, text: &str) {
    if let Err(e) = notifier.notify(text).await {
        warn!(error = %e, "Notification failed, dropping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockNotifier;

    #[tokio::test]
    async fn best_effort_swallows_failures() {
        let notifier = MockNotifier::new();
        notifier.fail_next();
        send_best_effort(&notifier, "will fail").await;
        send_best_effort(&notifier, "will send").await;
        assert_eq!(notifier.sent().await, vec!["will send".to_string()]);
    }
}
