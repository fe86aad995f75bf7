//! LLM client for every chat-completion call made by the service.
//!
//! Speaks the OpenAI-compatible `/chat/completions` protocol, so any gateway
//! exposing that surface can be configured through `LLM_API_URL`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";
const MAX_TOKENS: u32 = 4096;
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("Could not build prompt: {0}")]
    Prompt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Text of the first choice plus accounting for one call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletion {
    pub text: String,
    pub usage: Usage,
    pub finish_reason: Option<String>,
}

impl ChatCompletion {
    fn from_response(response: ChatResponse) -> Result<Self, LlmError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyContent)?;
        let text = choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyContent)?;
        Ok(Self {
            text,
            usage: response.usage,
            finish_reason: choice.finish_reason,
        })
    }

    pub fn is_truncated(&self) -> bool {
        self.finish_reason.as_deref() == Some("length")
    }
}

#[derive(Debug, Default)]
struct UsageCounters {
    prompt: AtomicU64,
    completion: AtomicU64,
    total: AtomicU64,
}

/// Shared chat-completion client. Clones share the cumulative usage counters.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    usage: Arc<UsageCounters>,
}

impl LlmClient {
    pub fn new(
        api_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(120)).build()?,
            endpoint: format!("{}/chat/completions", api_url.trim_end_matches('/')),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.into(),
            usage: Arc::default(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Token usage summed over every successful call made through this client.
    pub fn total_usage(&self) -> Usage {
        Usage {
            prompt_tokens: self.usage.prompt.load(Ordering::Relaxed),
            completion_tokens: self.usage.completion.load(Ordering::Relaxed),
            total_tokens: self.usage.total.load(Ordering::Relaxed),
        }
    }

    fn record_usage(&self, usage: &Usage) {
        self.usage.prompt.fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.usage
            .completion
            .fetch_add(usage.completion_tokens, Ordering::Relaxed);
        self.usage.total.fetch_add(usage.total_tokens, Ordering::Relaxed);
    }

    /// Sends one chat request.
    /// Retries on 429 (rate limit), 5xx, and connection errors with exponential backoff.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatCompletion, LlmError> {
        let request_body = ChatRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages,
        };

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s
                let delay = Duration::from_millis(BASE_BACKOFF_MS * (1 << (attempt - 1)));
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(&self.endpoint).json(&request_body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("LLM API returned {}: {}", status, body);
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiError>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let completion = ChatCompletion::from_response(response.json().await?)?;
            self.record_usage(&completion.usage);

            if completion.is_truncated() {
                warn!(
                    model = %self.model,
                    completion_tokens = completion.usage.completion_tokens,
                    "LLM response truncated at max_tokens"
                );
            }
            debug!(
                "LLM call succeeded: prompt_tokens={}, completion_tokens={}",
                completion.usage.prompt_tokens, completion.usage.completion_tokens
            );

            return Ok(completion);
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    #[test]
    fn test_completion_from_response() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "hi"}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
        }))
        .unwrap();
        let completion = ChatCompletion::from_response(response).unwrap();
        assert_eq!(completion.text, "hi");
        assert_eq!(completion.usage.total_tokens, 4);
        assert!(completion.is_truncated());
    }

    #[test]
    fn test_empty_choices_is_error() {
        let response: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            ChatCompletion::from_response(response),
            Err(LlmError::EmptyContent)
        ));
    }

    #[tokio::test]
    async fn test_chat_accumulates_usage() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "test-model");
                assert_eq!(body["messages"][0]["role"], "system");
                Json(json!({
                    "choices": [{"message": {"content": "summary"}, "finish_reason": "stop"}],
                    "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
                }))
            }),
        );
        let url = serve(router).await;
        let client = LlmClient::new(&url, Some("k".into()), "test-model").unwrap();
        let messages = [ChatMessage::system("sys"), ChatMessage::user("hello")];

        client.chat(&messages).await.unwrap();
        let completion = client.clone().chat(&messages).await.unwrap();

        assert_eq!(completion.text, "summary");
        assert_eq!(client.total_usage().total_tokens, 30);
        assert_eq!(client.total_usage().prompt_tokens, 20);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": {"message": "bad model"}})),
                )
            }),
        );
        let url = serve(router).await;
        let client = LlmClient::new(&url, None, "x").unwrap();

        match client.chat(&[ChatMessage::user("hi")]).await {
            Err(LlmError::Api { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad model");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
        assert_eq!(client.total_usage(), Usage::default());
    }
}
