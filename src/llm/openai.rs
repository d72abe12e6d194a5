use super::{Completion, CompletionProvider, CompletionRequest, LlmConfig, LlmError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

// OpenAI chat completion request/response structures
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions client for OpenAI-compatible APIs
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Provider for the configured API key, if there is one
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>, LlmError> {
        match config.api_key.as_deref().filter(|key| !key.is_empty()) {
            Some(key) => Self::new(key.to_string(), config).map(Some),
            None => Ok(None),
        }
    }

    fn build_request<'a>(&'a self, request: &'a CompletionRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        ChatRequest {
            model: &self.model,
            messages,
        }
    }
}

fn parse_response(response: ChatResponse, fallback_model: &str) -> Result<Completion, LlmError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or(LlmError::EmptyResponse)?;

    Ok(Completion {
        content,
        model: response.model.unwrap_or_else(|| fallback_model.to_string()),
    })
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        if request.prompt.trim().is_empty() {
            return Err(LlmError::InvalidRequest {
                message: "prompt must not be empty".to_string(),
            });
        }

        let body = self.build_request(&request);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            if status.as_u16() == 429 {
                warn!("Rate limited by LLM provider");
                return Err(LlmError::RateLimited {
                    message: error_text,
                });
            }

            return Err(LlmError::Provider {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let completion = parse_response(parsed, &self.model)?;
        debug!(
            "Completion received from {} ({} chars)",
            completion.model,
            completion.content.len()
        );
        Ok(completion)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
