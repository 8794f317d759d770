use crate::config::SummaryConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

pub const EMPTY_SUMMARY: &str = "No summary available.";

/// Produces the short blurb shown next to a listing.
///
/// Implementations never fail: when the backing service is unavailable they
/// answer with [`local_summary`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, description: &str) -> String;
}

/// Trimmed description, cut to `max_chars` characters with a trailing ellipsis.
pub fn local_summary(description: &str, max_chars: usize) -> String {
    let trimmed = description.trim();
    if trimmed.is_empty() {
        return EMPTY_SUMMARY.to_string();
    }

    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

pub struct LocalSummarizer {
    max_chars: usize,
}

impl LocalSummarizer {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

impl Default for LocalSummarizer {
    fn default() -> Self {
        Self::new(SummaryConfig::default().max_chars)
    }
}

#[async_trait]
impl Summarizer for LocalSummarizer {
    async fn summarize(&self, description: &str) -> String {
        local_summary(description, self.max_chars)
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
}

/// Completion-style HTTP summarizer.
pub struct HttpSummarizer {
    config: SummaryConfig,
    client: Client,
}

impl HttpSummarizer {
    pub fn new(config: SummaryConfig) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| crate::MarketError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    async fn request_summary(&self, api_key: &str, description: &str) -> Option<String> {
        let prompt = format!("Write a short summary of this book: {}", description);
        let response = match self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&CompletionRequest { prompt: &prompt })
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "summary service unreachable");
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "summary service rejected request");
            return None;
        }

        match response.json::<Value>().await {
            Ok(body) => extract_text(&body),
            Err(e) => {
                tracing::warn!(error = %e, "summary service returned malformed body");
                None
            }
        }
    }
}

/// Reads `choices[0].text`, then a top-level `text`.
fn extract_text(body: &Value) -> Option<String> {
    body.pointer("/choices/0/text")
        .or_else(|| body.get("text"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(&self, description: &str) -> String {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty());

        if let Some(api_key) = api_key {
            if let Some(summary) = self.request_summary(api_key, description).await {
                return summary;
            }
        }

        local_summary(description, self.config.max_chars)
    }
}
