//! Chat-completion client shared by the estimator and the negotiation
//! engines.
//!
//! The model is treated as an unreliable oracle: callers always have an
//! algorithmic fallback, so every error here is recoverable and the helpers
//! in this crate focus on getting usable JSON out of free-form completions.

use {
    anyhow::{Context, Result, anyhow},
    async_trait::async_trait,
    serde::de::DeserializeOwned,
    std::time::Duration,
    url::Url,
};

const OPENAI_API: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_API: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_COMPLETION_TOKENS: u32 = 200;

/// The narrow completion interface the engines consume. Production code uses
/// [`Client`]; tests substitute scripted oracles.
#[async_trait]
pub trait Completions: Send + Sync {
    async fn complete(&self, system: &str, user: &str, temperature: f64) -> Result<String>;
}

/// Provider is inferred from the model name, mirroring how agents are
/// configured with nothing but a model string.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Provider {
    OpenAi,
    Anthropic,
}

impl Provider {
    fn for_model(model: &str) -> Self {
        if model.to_lowercase().contains("claude") {
            Self::Anthropic
        } else {
            Self::OpenAi
        }
    }

    fn key_variable(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    model: String,
    provider: Provider,
    endpoint: Url,
    api_key: Option<String>,
}

impl Client {
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        let provider = Provider::for_model(&model);
        let endpoint = match provider {
            Provider::OpenAi => OPENAI_API,
            Provider::Anthropic => ANTHROPIC_API,
        };
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
            api_key: std::env::var(provider.key_variable()).ok(),
            endpoint: endpoint.parse().expect("static endpoint URL"),
            model,
            provider,
        }
    }

    /// Points the client at an OpenAI-compatible endpoint, e.g. a local
    /// completion server.
    pub fn with_base_url(mut self, base: Url) -> Self {
        self.endpoint = base;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete_openai(&self, system: &str, user: &str, temperature: f64) -> Result<String> {
        let key = self.api_key.as_deref().context("OPENAI_API_KEY not set")?;
        let body = serde_json::json!({
            "model": self.model,
            "max_completion_tokens": MAX_COMPLETION_TOKENS,
            "temperature": temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        let response: serde_json::Value = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("completion response without content"))
    }

    async fn complete_anthropic(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
    ) -> Result<String> {
        let key = self
            .api_key
            .as_deref()
            .context("ANTHROPIC_API_KEY not set")?;
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_COMPLETION_TOKENS,
            "temperature": temperature,
            "system": system,
            "messages": [{"role": "user", "content": user}],
        });
        let response: serde_json::Value = self
            .http
            .post(self.endpoint.clone())
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("completion response without content"))
    }
}

#[async_trait]
impl Completions for Client {
    async fn complete(&self, system: &str, user: &str, temperature: f64) -> Result<String> {
        match self.provider {
            Provider::OpenAi => self.complete_openai(system, user, temperature).await,
            Provider::Anthropic => self.complete_anthropic(system, user, temperature).await,
        }
    }
}

/// Extracts the first JSON object from a completion and deserializes it.
///
/// Models wrap JSON in markdown code fences or surround it with prose no
/// matter how firmly the prompt forbids it, so this scans for the outermost
/// braces instead of parsing the text as-is.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let mut text = text;
    if let Some(fenced) = text.split("```").nth(1) {
        text = fenced.strip_prefix("json").unwrap_or(fenced);
    }
    let start = text.find('{').context("no JSON object in completion")?;
    let end = text.rfind('}').context("no JSON object in completion")?;
    serde_json::from_str(&text[start..=end]).context("malformed JSON in completion")
}

#[cfg(test)]
mod tests {
    use {super::*, serde::Deserialize};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Decision {
        action: String,
        price: Option<f64>,
    }

    #[test]
    fn extracts_plain_json() {
        let decision: Decision =
            extract_json(r#"{"action": "counter", "price": 24.25}"#).unwrap();
        assert_eq!(decision.action, "counter");
        assert_eq!(decision.price, Some(24.25));
    }

    #[test]
    fn extracts_fenced_json() {
        let text = "Sure, here you go:\n```json\n{\"action\": \"accept\"}\n```\nDeal!";
        let decision: Decision = extract_json(text).unwrap();
        assert_eq!(decision.action, "accept");
        assert_eq!(decision.price, None);
    }

    #[test]
    fn extracts_json_embedded_in_prose() {
        let text = "I think {\"action\": \"counter\", \"price\": 10.0} is fair.";
        let decision: Decision = extract_json(text).unwrap();
        assert_eq!(decision.price, Some(10.0));
    }

    #[test]
    fn rejects_text_without_json() {
        assert!(extract_json::<Decision>("take it or leave it").is_err());
    }

    #[test]
    fn provider_inference() {
        assert_eq!(Provider::for_model("gpt-4o-mini"), Provider::OpenAi);
        assert_eq!(
            Provider::for_model("claude-sonnet-4-5"),
            Provider::Anthropic
        );
    }
}
