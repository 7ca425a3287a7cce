use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Failures reported by a generation backend.
///
/// The first three variants drive the retry protocol; the rest are not
/// modeled by it and end the attempt for that item.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Optional sampling knobs forwarded to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl GenerationOptions {
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Trait for text generation backends
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Get the name of this client
    fn client_name(&self) -> String;

    /// Generate a completion for `prompt` with the given model
    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        options: Option<&GenerationOptions>,
    ) -> Result<String, LlmError>;
}

type Responder = Arc<dyn Fn(&str) -> Result<String, LlmError> + Send + Sync>;

/// One recorded call made against a [`ScriptedLlmClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub model: String,
    pub prompt: String,
}

/// Deterministic client that replays scripted outcomes per model.
///
/// Each model has a queue of outcomes consumed in order. Once the queue is
/// empty the model's responder, then its fallback outcome, answers every call.
pub struct ScriptedLlmClient {
    name: String,
    response_delay_ms: u64,
    queues: Mutex<HashMap<String, VecDeque<Result<String, LlmError>>>>,
    responders: HashMap<String, Responder>,
    fallbacks: HashMap<String, Result<String, LlmError>>,
    default_fallback: Result<String, LlmError>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlmClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response_delay_ms: 0,
            queues: Mutex::new(HashMap::new()),
            responders: HashMap::new(),
            fallbacks: HashMap::new(),
            default_fallback: Err(LlmError::ServiceUnavailable("no scripted response".to_string())),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.response_delay_ms = delay_ms;
        self
    }

    /// Queue outcomes for `model`, returned once each in order.
    pub fn script(mut self, model: &str, outcomes: Vec<Result<String, LlmError>>) -> Self {
        if let Ok(queues) = self.queues.get_mut() {
            queues.entry(model.to_string()).or_default().extend(outcomes);
        }
        self
    }

    /// Compute the outcome for `model` from the prompt once its queue is empty.
    pub fn respond_with<F>(mut self, model: &str, responder: F) -> Self
    where
        F: Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        self.responders.insert(model.to_string(), Arc::new(responder));
        self
    }

    /// Outcome returned for `model` whenever its queue is empty.
    pub fn always(mut self, model: &str, outcome: Result<String, LlmError>) -> Self {
        self.fallbacks.insert(model.to_string(), outcome);
        self
    }

    /// Outcome for models with neither a queue nor a fallback.
    pub fn otherwise(mut self, outcome: Result<String, LlmError>) -> Self {
        self.default_fallback = outcome;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn calls_for(&self, model: &str) -> usize {
        self.calls().iter().filter(|call| call.model == model).count()
    }

    fn next_outcome(&self, model: &str, prompt: &str) -> Result<String, LlmError> {
        let queued = self
            .queues
            .lock()
            .ok()
            .and_then(|mut queues| queues.get_mut(model).and_then(|queue| queue.pop_front()));
        if let Some(outcome) = queued {
            return outcome;
        }
        if let Some(responder) = self.responders.get(model) {
            return responder(prompt);
        }
        self.fallbacks
            .get(model)
            .cloned()
            .unwrap_or_else(|| self.default_fallback.clone())
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn client_name(&self) -> String {
        format!("Scripted LLM Client ({})", self.name)
    }

    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        _options: Option<&GenerationOptions>,
    ) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                model: model.to_string(),
                prompt: prompt.to_string(),
            });
        }

        if self.response_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.response_delay_ms)).await;
        }

        let outcome = self.next_outcome(model, prompt);
        debug!(model, ok = outcome.is_ok(), "Scripted generation");
        outcome
    }
}
