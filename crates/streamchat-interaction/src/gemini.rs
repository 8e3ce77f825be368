//! GeminiClient - streaming REST client for the Gemini API.
//!
//! Uses `streamGenerateContent?alt=sse`; each SSE event carries a partial
//! `GenerateContentResponse` whose text parts become chunks.

use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode, header::HeaderValue};
use serde::{Deserialize, Serialize};
use streamchat_core::{
    AppConfig, ChunkStream, GenerationConfig, GenerationError, TextGenerator,
};

use crate::sse::{SseEvent, parse_sse_stream};

pub const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Text generator that talks to the Gemini HTTP API.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    initial_backoff: Duration,
}

impl GeminiClient {
    /// Creates a client with the provided API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: BASE_URL.to_string(),
            initial_backoff: INITIAL_BACKOFF,
        }
    }

    /// Builds a client from loaded configuration.
    ///
    /// Fails with [`GenerationError::Config`] when no API key is configured.
    pub fn from_config(config: &AppConfig) -> Result<Self, GenerationError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                GenerationError::Config(
                    "GOOGLE_API_KEY is not set; export it or add it to the environment".into(),
                )
            })?;
        Ok(Self::new(api_key))
    }

    /// Points the client at another endpoint (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Overrides the first retry delay; later retries double it.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    fn build_request(&self, prompt: &str, config: &GenerationConfig) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationParams {
                temperature: config.temperature,
            },
        }
    }

    /// Sends one request.
    ///
    /// On failure, also returns the server's `Retry-After` delay when present.
    async fn send_once(
        &self,
        url: &str,
        body: &GenerateContentRequest,
    ) -> Result<reqwest::Response, (GenerationError, Option<Duration>)> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| {
                let error = GenerationError::Network {
                    message: format!("Gemini API request failed: {err}"),
                    retryable: err.is_connect() || err.is_timeout(),
                };
                (error, None)
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after(response.headers().get("retry-after"));
        let body_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read Gemini error body".to_string());
        Err((map_http_error(status, body_text), retry_after))
    }

    /// Opens the stream, retrying connection failures and retryable statuses.
    async fn open(
        &self,
        url: &str,
        body: &GenerateContentRequest,
        max_retries: u32,
    ) -> Result<reqwest::Response, GenerationError> {
        let mut attempt = 0;
        loop {
            match self.send_once(url, body).await {
                Ok(response) => return Ok(response),
                Err((error, retry_after)) if error.is_retryable() && attempt < max_retries => {
                    let delay = retry_after
                        .map(|delay| delay.min(MAX_BACKOFF))
                        .unwrap_or_else(|| backoff_delay(self.initial_backoff, attempt));
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying Gemini request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err((error, _)) => return Err(error),
            }
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn stream(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<ChunkStream, GenerationError> {
        let url = format!(
            "{}/models/{model}:streamGenerateContent?alt=sse",
            self.base_url,
            model = config.model
        );
        let request = self.build_request(prompt, config);

        let response = self.open(&url, &request, config.max_retries).await?;
        tracing::debug!(model = %config.model, "Gemini stream opened");

        let events = parse_sse_stream(response.bytes_stream());
        Ok(Box::pin(text_chunks(events)))
    }
}

/// Turns Gemini SSE events into text fragments.
///
/// An error payload or a blocked prompt ends the stream with an error;
/// events that fail to decode are skipped.
pub(crate) fn text_chunks<S>(mut events: S) -> impl Stream<Item = Result<String, GenerationError>>
where
    S: Stream<Item = Result<SseEvent, GenerationError>> + Unpin + Send + 'static,
{
    async_stream::stream! {
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(error) => {
                    yield Err(error);
                    break;
                }
            };

            if let Ok(wrapper) = serde_json::from_str::<ErrorWrapper>(&event.data) {
                yield Err(GenerationError::Stream(wrapper.error.describe(&event.data)));
                break;
            }

            let chunk: GenerateContentResponse = match serde_json::from_str(&event.data) {
                Ok(chunk) => chunk,
                Err(err) => {
                    tracing::warn!(error = %err, data = %event.data, "Undecodable Gemini event");
                    yield Err(GenerationError::Parse(format!("Undecodable Gemini event: {err}")));
                    break;
                }
            };

            if let Some(reason) = chunk.prompt_feedback.and_then(|feedback| feedback.block_reason) {
                yield Err(GenerationError::Stream(format!("Prompt blocked: {reason}")));
                break;
            }

            let parts = chunk
                .candidates
                .and_then(|candidates| candidates.into_iter().next())
                .and_then(|candidate| candidate.content)
                .map(|content| content.parts)
                .unwrap_or_default();
            for text in parts.into_iter().filter_map(|part| part.text) {
                if !text.is_empty() {
                    yield Ok(text);
                }
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationParams,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationParams {
    temperature: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize)]
struct PartResponse {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[allow(dead_code)]
    code: Option<i32>,
    message: Option<String>,
    status: Option<String>,
}

impl ErrorBody {
    fn describe(self, raw: &str) -> String {
        let status_text = self.status.unwrap_or_default();
        let msg = self.message.unwrap_or_else(|| raw.to_string());
        if status_text.is_empty() {
            msg
        } else {
            format!("{status_text}: {msg}")
        }
    }
}

fn map_http_error(status: StatusCode, body: String) -> GenerationError {
    let message = serde_json::from_str::<ErrorWrapper>(&body)
        .map(|wrapper| wrapper.error.describe(&body))
        .unwrap_or_else(|_| body.clone());

    let retryable = matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    );

    GenerationError::Http {
        status: status.as_u16(),
        message,
        retryable,
    }
}

fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn backoff_delay(initial: Duration, attempt: u32) -> Duration {
    initial
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn event(data: &str) -> Result<SseEvent, GenerationError> {
        Ok(SseEvent {
            event_type: None,
            data: data.to_string(),
            id: None,
        })
    }

    async fn collect(
        events: Vec<Result<SseEvent, GenerationError>>,
    ) -> Vec<Result<String, GenerationError>> {
        text_chunks(stream::iter(events)).collect().await
    }

    #[tokio::test]
    async fn test_text_parts_become_chunks() {
        let chunks = collect(vec![
            event(r#"{"candidates":[{"content":{"parts":[{"text":"Hi"}],"role":"model"}}]}"#),
            event(r#"{"candidates":[{"content":{"parts":[{"text":" there"},{"text":"!"}]}}]}"#),
            event(r#"{"candidates":[{"finishReason":"STOP"}],"usageMetadata":{"totalTokenCount":3}}"#),
        ])
        .await;

        let texts: Vec<String> = chunks.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["Hi", " there", "!"]);
    }

    #[tokio::test]
    async fn test_undecodable_event_ends_stream_with_parse_error() {
        let chunks = collect(vec![
            event(r#"{"candidates":[{"content":{"parts":[{"text":"A"}]}}]}"#),
            event("{\"candidates\":[{\"content\":"),
            event(r#"{"candidates":[{"content":{"parts":[{"text":"B"}]}}]}"#),
        ])
        .await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref().unwrap(), "A");
        assert!(matches!(
            &chunks[1],
            Err(GenerationError::Parse(message)) if message.starts_with("Undecodable Gemini event")
        ));
    }

    #[test]
    fn test_request_carries_only_user_content() {
        let client = GeminiClient::new("key");
        let request = client.build_request("Hello", &GenerationConfig::default());
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][0]["parts"][0]["text"], "Hello");
        assert!(value.get("systemInstruction").is_none());
        assert!(value["generationConfig"]["temperature"].is_number());
    }

    #[tokio::test]
    async fn test_error_payload_ends_stream() {
        let chunks = collect(vec![
            event(r#"{"candidates":[{"content":{"parts":[{"text":"partial"}]}}]}"#),
            event(r#"{"error":{"code":500,"message":"backend died","status":"INTERNAL"}}"#),
            event(r#"{"candidates":[{"content":{"parts":[{"text":"never"}]}}]}"#),
        ])
        .await;

        assert_eq!(chunks.len(), 2);
        match &chunks[1] {
            Err(GenerationError::Stream(message)) => {
                assert_eq!(message, "INTERNAL: backend died")
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_blocked_prompt_is_error() {
        let chunks = collect(vec![event(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#)]).await;

        assert!(matches!(
            &chunks[..],
            [Err(GenerationError::Stream(message))] if message.contains("SAFETY")
        ));
    }

    #[test]
    fn test_map_http_error_retryability() {
        let body = r#"{"error":{"code":429,"message":"quota","status":"RESOURCE_EXHAUSTED"}}"#;
        let rate_limited = map_http_error(StatusCode::TOO_MANY_REQUESTS, body.to_string());
        assert!(rate_limited.is_retryable());
        assert_eq!(rate_limited.to_string(), "HTTP 429: RESOURCE_EXHAUSTED: quota");

        let bad_request = map_http_error(StatusCode::BAD_REQUEST, "nope".to_string());
        assert!(!bad_request.is_retryable());
        assert_eq!(bad_request.to_string(), "HTTP 400: nope");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let initial = Duration::from_millis(500);
        assert_eq!(backoff_delay(initial, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(initial, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(initial, 10), MAX_BACKOFF);
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let value = HeaderValue::from_static("3");
        assert_eq!(parse_retry_after(Some(&value)), Some(Duration::from_secs(3)));
        let date = HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_retry_after(Some(&date)), None);
    }

    #[test]
    fn test_from_config_requires_key() {
        let mut config = AppConfig::default();
        assert!(matches!(
            GeminiClient::from_config(&config),
            Err(GenerationError::Config(_))
        ));
        config.api_key = Some("key".into());
        assert!(GeminiClient::from_config(&config).is_ok());
    }
}
