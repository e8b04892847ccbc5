mod error;
mod google_genai;
mod openai_compatible;

pub use error::{ProviderError, ProviderErrorKind};
pub use google_genai::GoogleGenaiGenerator;
pub use openai_compatible::OpenAiCompatibleGenerator;

use std::sync::Arc;

use crate::config::{ProviderConfig, ProviderKind};
use crate::traits::TextGenerator;

/// Build the configured generator transport.
pub fn make_generator(config: &ProviderConfig) -> anyhow::Result<Arc<dyn TextGenerator>> {
    let generator: Arc<dyn TextGenerator> = match config.kind {
        ProviderKind::OpenaiCompatible => Arc::new(
            OpenAiCompatibleGenerator::new(&config.base_url, &config.api_key, &config.model)
                .map_err(|e| anyhow::anyhow!(e))?,
        ),
        ProviderKind::GoogleGenai => {
            Arc::new(GoogleGenaiGenerator::new(&config.api_key, &config.model)?)
        }
    };
    Ok(generator)
}

/// HTTPS is required for remote endpoints to protect API keys in transit;
/// plain HTTP is allowed only for localhost (local LLM servers).
pub(crate) fn validate_base_url(base_url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(base_url)
        .map_err(|e| format!("Invalid base_url '{}': {}", base_url, e))?;

    let host = parsed.host_str().unwrap_or("");
    match parsed.scheme() {
        "https" => Ok(()),
        "http" => {
            let is_localhost =
                host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host == "::1";
            if is_localhost {
                tracing::warn!(
                    base_url,
                    "Using unencrypted HTTP for a local LLM server; the API key travels in cleartext"
                );
                Ok(())
            } else {
                Err(format!(
                    "HTTP is not allowed for remote URLs (base_url: '{}'). Use HTTPS.",
                    base_url
                ))
            }
        }
        other => Err(format!(
            "Unsupported URL scheme '{}' in base_url '{}'",
            other, base_url
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_urls_pass_validation() {
        assert!(validate_base_url("https://api.openai.com/v1").is_ok());
    }

    #[test]
    fn http_only_for_localhost() {
        assert!(validate_base_url("http://localhost:11434/v1").is_ok());
        assert!(validate_base_url("http://127.0.0.1:8080/v1").is_ok());
        assert!(validate_base_url("http://example.com/v1").is_err());
    }

    #[test]
    fn odd_schemes_rejected() {
        assert!(validate_base_url("ftp://api.openai.com").is_err());
        assert!(validate_base_url("not a url").is_err());
    }
}
