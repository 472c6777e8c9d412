//! ============================================================================
//! Habit Extraction - Utterance to candidates via Anthropic Messages API
//! ============================================================================
//! Sends the utterance with a fixed instruction preamble and expects a JSON
//! array of `{ habit_name, quantity, unit, confidence }` back. The model may
//! wrap the array in a fenced code block; that is stripped before parsing.
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::types::HabitCandidate;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Built-in instruction preamble
pub const HABIT_PROMPT: &str = "You turn short spoken habit logs into structured data.\n\
\n\
Return ONLY a JSON array. Each element is an object with:\n\
- \"habit_name\": short lowercase name of the habit (e.g. \"yoga\", \"water\", \"reading\")\n\
- \"quantity\": a number, or null when the amount was not said\n\
- \"unit\": the unit of the quantity (e.g. \"minutes\", \"glasses\", \"pages\"), or null\n\
- \"confidence\": a number between 0 and 1 saying how sure you are this is a habit log\n\
\n\
One element per habit mentioned. If nothing in the input is a habit, return [].\n\
Do not add commentary.";

/// Text-understanding service: utterance in, candidate habits out
#[async_trait]
pub trait HabitExtractor: Send + Sync {
    /// Errors on transport failure or structurally invalid output.
    /// An empty vector is a valid answer.
    async fn extract(&self, utterance: &str) -> Result<Vec<HabitCandidate>>;
}

/// Extractor backed by the Anthropic Messages API
pub struct ClaudeExtractor {
    client: reqwest::Client,
    api_key: Option<String>,
    api_url: String,
    model: String,
    max_tokens: u32,
    system_prompt: String,
}

impl ClaudeExtractor {
    /// Create an extractor with default endpoint, model and preamble
    pub fn new(api_key: String) -> Self {
        let defaults = AppConfig::default();
        Self {
            client: reqwest::Client::new(),
            api_key: Some(api_key),
            api_url: defaults.anthropic_api_url,
            model: defaults.model,
            max_tokens: defaults.max_tokens,
            system_prompt: HABIT_PROMPT.to_string(),
        }
    }

    /// Build from configuration. A missing API key is reported when extracting,
    /// so read-only commands work without one.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        let system_prompt = match &config.prompt_path {
            Some(path) => {
                info!("Loading extraction prompt from: {}", path);
                std::fs::read_to_string(path)
                    .map_err(|e| anyhow!("Failed to read prompt file {}: {}", path, e))?
            }
            None => HABIT_PROMPT.to_string(),
        };

        if config.anthropic_api_key.is_none() {
            warn!("ANTHROPIC_API_KEY not set - voice logging will fail until it is");
        }

        Ok(Self {
            client,
            api_key: config.anthropic_api_key.clone(),
            api_url: config.anthropic_api_url.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            system_prompt,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Call the messages endpoint and return the first text block
    async fn call_api(&self, utterance: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("ANTHROPIC_API_KEY not set"))?;

        debug!("Calling extraction API with {} chars", utterance.len());

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: self.system_prompt.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: utterance.to_string(),
            }],
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to call extraction API: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Extraction API error {}: {}", status, body));
        }

        let messages_response: MessagesResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse API response: {}", e))?;

        messages_response
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| anyhow!("Empty response from extraction API"))
    }
}

#[async_trait]
impl HabitExtractor for ClaudeExtractor {
    async fn extract(&self, utterance: &str) -> Result<Vec<HabitCandidate>> {
        info!("Extracting habits from utterance");
        let content = self.call_api(utterance).await?;
        let candidates = parse_candidates(&content)?;
        info!("Extracted {} habit candidates", candidates.len());
        Ok(candidates)
    }
}

/// Parse the model's answer into candidates.
/// Nameless entries are dropped; anything that is not a JSON array is an error.
pub fn parse_candidates(content: &str) -> Result<Vec<HabitCandidate>> {
    let cleaned = strip_code_fence(content);
    let parsed: serde_json::Value = serde_json::from_str(cleaned)
        .map_err(|e| anyhow!("Extraction output is not valid JSON: {}", e))?;

    if !parsed.is_array() {
        return Err(anyhow!("Extraction output is not an array"));
    }

    let candidates: Vec<HabitCandidate> = serde_json::from_value(parsed)
        .map_err(|e| anyhow!("Extraction output has malformed entries: {}", e))?;

    let total = candidates.len();
    let named: Vec<HabitCandidate> = candidates
        .into_iter()
        .filter(HabitCandidate::has_name)
        .collect();
    if named.len() < total {
        warn!("Dropped {} extracted habits without a name", total - named.len());
    }

    Ok(named)
}

/// Remove one leading ```lang fence and one trailing ``` fence
fn strip_code_fence(content: &str) -> &str {
    let mut text = content.trim();

    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest.trim_start_matches(|c: char| c.is_alphanumeric() || c == '_');
        text = rest.strip_prefix('\n').unwrap_or(rest);
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest.strip_suffix('\n').unwrap_or(rest);
    }

    text.trim()
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}
