use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LLMConfig;
use crate::generation::prompt::{GenerationRequest, CHALLENGE_SEQUENCE, LESSONS_PER_BATCH};
use crate::store::operations::content::ChallengeType;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Text-generation collaborator: one prompt in, JSON-shaped text out.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError>;
}

#[derive(Debug, Clone)]
pub struct LlmProvider {
    config: LLMConfig,
    client: reqwest::Client,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm is disabled")]
    Disabled,
    #[error("llm request timed out")]
    Timeout,
    #[error("llm network error: {0}")]
    Network(String),
    #[error("llm api error: status={status}, message={message}")]
    ApiError { status: u16, message: String },
    #[error("llm misconfigured: {0}")]
    Misconfigured(String),
}

impl LlmProvider {
    pub fn new(config: &LLMConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config: config.clone(),
            client,
        }
    }

    /// Real mode needs an endpoint and a key; checked once at startup.
    pub fn validate_config(config: &LLMConfig) -> Result<(), LlmError> {
        if config.enabled && !config.mock {
            if config.api_key.trim().is_empty() {
                return Err(LlmError::Misconfigured(
                    "LLM_ENABLED=true and LLM_MOCK=false require LLM_API_KEY".to_string(),
                ));
            }
            if config.api_url.trim().is_empty() {
                return Err(LlmError::Misconfigured("LLM_API_URL is empty".to_string()));
            }
        }
        Ok(())
    }

    pub async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        let url = format!("{}/v1/messages", self.config.api_url.trim_end_matches('/'));
        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            messages,
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MessagesResponse = response.json().await.map_err(map_transport_error)?;
        Ok(parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

fn map_transport_error(error: reqwest::Error) -> LlmError {
    if error.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Network(error.to_string())
    }
}

#[async_trait]
impl ContentGenerator for LlmProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        if !self.config.enabled {
            return Err(LlmError::Disabled);
        }
        if self.config.mock {
            return Ok(mock_batch_json(&request.proficiency_level, &request.theme));
        }
        self.chat(vec![ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        }])
        .await
    }
}

fn mock_options(kind: ChallengeType, answer: &str) -> serde_json::Value {
    match kind {
        ChallengeType::Match => serde_json::Value::Array(
            (1..=4)
                .flat_map(|group| {
                    [
                        serde_json::json!({ "text": format!("term {group}"), "correct": true, "matchGroup": group }),
                        serde_json::json!({ "text": format!("meaning {group}"), "correct": true, "matchGroup": group }),
                    ]
                })
                .collect(),
        ),
        ChallengeType::Speak | ChallengeType::Translate | ChallengeType::FillInBlank => {
            serde_json::json!([{ "text": answer, "correct": true }])
        }
        _ => serde_json::json!([
            { "text": format!("{answer} (a)"), "correct": false },
            { "text": answer, "correct": true },
            { "text": format!("{answer} (b)"), "correct": false },
            { "text": format!("{answer} (c)"), "correct": false },
        ]),
    }
}

/// Deterministic, well-formed batch used in mock mode and tests.
pub fn mock_batch_json(level: &str, theme: &str) -> String {
    let lessons: Vec<serde_json::Value> = (1..=LESSONS_PER_BATCH)
        .map(|n| {
            let challenges: Vec<serde_json::Value> = CHALLENGE_SEQUENCE
                .iter()
                .enumerate()
                .map(|(i, kind)| {
                    let answer = format!("{theme} answer {n}.{}", i + 1);
                    serde_json::json!({
                        "type": kind.as_str(),
                        "question": format!("{theme}: question {n}.{}", i + 1),
                        "level": level,
                        "skill_type": "vocabulary",
                        "tags": [theme.to_lowercase()],
                        "estimatedTimeSeconds": 20,
                        "options": mock_options(*kind, &answer),
                    })
                })
                .collect();
            serde_json::json!({
                "title": format!("{theme} {n}"),
                "subject": theme,
                "level": level,
                "tags": [theme.to_lowercase()],
                "challenges": challenges,
            })
        })
        .collect();
    serde_json::json!({ "lessons": lessons }).to_string()
}
