use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error};
use zeroize::Zeroize;

use crate::providers::{validate_base_url, ProviderError};
use crate::traits::TextGenerator;

const REQUEST_TIMEOUT_SECS: u64 = 120;

/// `chat/completions` client for OpenAI-style endpoints (OpenAI, OpenRouter,
/// local llama.cpp/ollama servers).
pub struct OpenAiCompatibleGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl Drop for OpenAiCompatibleGenerator {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

impl OpenAiCompatibleGenerator {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self, String> {
        validate_base_url(base_url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
    async fn generate(&self, system: &str, prompt: &str) -> anyhow::Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
        });

        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %self.model, url = %url, "Calling generator");

        let response = match self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "Generator request failed");
                return Err(ProviderError::network(&e).into());
            }
        };

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            error!(status = %status, "Generator API error: {}", text);
            return Err(ProviderError::from_status(status.as_u16(), &text).into());
        }

        let parsed: Value = serde_json::from_str(&text)?;
        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        if content.is_empty() {
            anyhow::bail!("generator returned an empty completion");
        }
        Ok(content)
    }
}
