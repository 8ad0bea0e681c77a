use super::{Oracle, OracleError};
use crate::analysis::idea::parse_trade_idea;
use crate::analysis::TradeIdea;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use market_data::ChartArtifact;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini client configuration
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub temperature: f32,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            model: "gemini-1.5-pro".to_string(),
            timeout_seconds: 120,
            temperature: 0.4,
        }
    }
}

/// `generateContent` client sending the prompt plus inline PNG charts
pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| OracleError::Input(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    async fn build_request(
        &self,
        prompt: &str,
        charts: &[ChartArtifact],
    ) -> Result<GenerateRequest, OracleError> {
        let mut parts = Vec::with_capacity(charts.len() + 1);
        parts.push(Part::Text {
            text: prompt.to_string(),
        });

        for chart in charts {
            let bytes = chart.read_bytes().await.map_err(|e| {
                OracleError::Input(format!("{}: {}", chart.path().display(), e))
            })?;
            parts.push(Part::InlineData {
                inline_data: InlineData {
                    mime_type: "image/png".to_string(),
                    data: BASE64.encode(bytes),
                },
            });
        }

        Ok(GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                response_mime_type: "application/json".to_string(),
            },
        })
    }
}

#[async_trait::async_trait]
impl Oracle for GeminiClient {
    async fn evaluate(
        &self,
        prompt: &str,
        charts: &[ChartArtifact],
    ) -> Result<Option<TradeIdea>, OracleError> {
        let request = self.build_request(prompt, charts).await?;

        info!(
            "Calling {} with {} chart(s) (prompt length: {} chars)",
            self.config.model,
            charts.len(),
            prompt.len()
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| OracleError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| OracleError::Transient(e.to_string()))?;
        let parsed: GenerateResponse =
            serde_json::from_str(&body).map_err(|e| OracleError::Malformed {
                reason: format!("unexpected response envelope: {}", e),
                raw: body.clone(),
            })?;

        let text = answer_text(parsed)?;
        debug!("Oracle answer: {}", text);

        parse_trade_idea(&text).map_err(|e| OracleError::Malformed {
            reason: e.to_string(),
            raw: text,
        })
    }
}

fn classify_status(status: StatusCode, body: String) -> OracleError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        OracleError::Transient(format!("HTTP {}: {}", status.as_u16(), body))
    } else {
        OracleError::Rejected {
            status: status.as_u16(),
            message: body,
        }
    }
}

/// Concatenated text of the first candidate, or why there is none
fn answer_text(response: GenerateResponse) -> Result<String, OracleError> {
    if let Some(reason) = response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(OracleError::Blocked(format!("prompt blocked: {}", reason)));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| OracleError::Blocked("no candidates returned".to_string()))?;

    if let Some(reason) = candidate.finish_reason.as_deref() {
        if matches!(
            reason,
            "SAFETY" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" | "RECITATION"
        ) {
            return Err(OracleError::Blocked(format!("finish reason {}", reason)));
        }
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(OracleError::Blocked("empty candidate".to_string()));
    }
    Ok(text)
}

// Request types for Gemini API
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: String,
}

// Response types for Gemini API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}
