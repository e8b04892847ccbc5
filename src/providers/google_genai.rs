use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error};
use zeroize::Zeroize;

use crate::providers::ProviderError;
use crate::traits::TextGenerator;

const GENAI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// `generateContent` client for the Google GenAI API.
pub struct GoogleGenaiGenerator {
    client: Client,
    api_key: String,
    model: String,
}

impl Drop for GoogleGenaiGenerator {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

impl GoogleGenaiGenerator {
    pub fn new(api_key: &str, model: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl TextGenerator for GoogleGenaiGenerator {
    async fn generate(&self, system: &str, prompt: &str) -> anyhow::Result<String> {
        let body = json!({
            "systemInstruction": {"parts": [{"text": system}]},
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
        });

        let url = format!("{}/models/{}:generateContent", GENAI_BASE, self.model);
        debug!(model = %self.model, "Calling generator");

        let response = match self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
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
        let parts = parsed["candidates"][0]["content"]["parts"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        let content: String = parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("");
        if content.is_empty() {
            anyhow::bail!("generator returned an empty completion");
        }
        Ok(content)
    }
}
