use crate::llm_adapter::{GenerationOptions, LlmClient, LlmError};
use async_trait::async_trait;
use clap::ValueEnum;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Hosted platforms serving the OpenAI-compatible chat completions API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum LlmPlatform {
    TogetherAi,
    FireworksAi,
    OpenAi,
}

impl LlmPlatform {
    pub const ALL: [LlmPlatform; 3] = [
        LlmPlatform::TogetherAi,
        LlmPlatform::FireworksAi,
        LlmPlatform::OpenAi,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            LlmPlatform::TogetherAi => "Together AI",
            LlmPlatform::FireworksAi => "Fireworks AI",
            LlmPlatform::OpenAi => "OpenAI",
        }
    }

    pub fn base_url(&self) -> &'static str {
        match self {
            LlmPlatform::TogetherAi => "https://api.together.xyz/v1",
            LlmPlatform::FireworksAi => "https://api.fireworks.ai/inference/v1",
            LlmPlatform::OpenAi => "https://api.openai.com/v1",
        }
    }

    /// Model ids with their short display aliases, strongest first.
    pub fn models(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            LlmPlatform::TogetherAi => &[
                ("meta-llama/Meta-Llama-3.1-405B-Instruct-Turbo", "Llama-3.1-405B"),
                ("meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo", "Llama-3.1-70B"),
                ("meta-llama/Meta-Llama-3.1-8B-Instruct-Turbo", "Llama-3.1-8B"),
                ("mistralai/Mixtral-8x22B-Instruct-v0.1", "Mixtral-8x22B"),
                ("mistralai/Mixtral-8x7B-Instruct-v0.1", "Mixtral-8x7B"),
            ],
            LlmPlatform::FireworksAi => &[
                ("accounts/fireworks/models/llama-v3p1-405b-instruct", "Llama-3.1-405B"),
                ("accounts/fireworks/models/llama-v3p1-70b-instruct", "Llama-3.1-70B"),
                ("accounts/fireworks/models/llama-v3p1-8b-instruct", "Llama-3.1-8B"),
                ("accounts/fireworks/models/mixtral-8x22b-instruct", "Mixtral-8x22B"),
                ("accounts/fireworks/models/mixtral-8x7b-instruct", "Mixtral-8x7B"),
            ],
            LlmPlatform::OpenAi => &[
                ("gpt-4o", "gpt-4o"),
                ("gpt-4-turbo", "gpt-4-turbo"),
                ("gpt-4o-mini", "gpt-4o-mini"),
            ],
        }
    }

    pub fn model_ids(&self) -> Vec<String> {
        self.models().iter().map(|(id, _)| id.to_string()).collect()
    }

    pub fn alias(&self, model: &str) -> Option<&'static str> {
        self.models()
            .iter()
            .find(|(id, _)| *id == model)
            .map(|(_, alias)| *alias)
    }
}

impl fmt::Display for LlmPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(flatten)]
    options: Option<&'a GenerationOptions>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Client for one platform's `/chat/completions` endpoint.
pub struct ChatCompletionClient {
    platform: LlmPlatform,
    api_key: String,
    http: Client,
    base_url: String,
}

impl ChatCompletionClient {
    pub fn new(platform: LlmPlatform, api_key: impl Into<String>) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        Ok(Self {
            platform,
            api_key: api_key.into(),
            http,
            base_url: platform.base_url().to_string(),
        })
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn platform(&self) -> LlmPlatform {
        self.platform
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| LlmError::Authentication(format!("unusable API key: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

/// Map a non-success status onto the retry taxonomy.
pub fn classify_status(status: StatusCode, body: String) -> LlmError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Authentication(body),
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimit(body),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            LlmError::ServiceUnavailable(body)
        }
        other => LlmError::Api {
            status: other.as_u16(),
            body,
        },
    }
}

#[async_trait]
impl LlmClient for ChatCompletionClient {
    fn client_name(&self) -> String {
        self.platform.display_name().to_string()
    }

    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        options: Option<&GenerationOptions>,
    ) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            options,
        };

        debug!(platform = %self.platform, model, "Chat completion request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("response has no message content".to_string()))
    }
}
