//! # LLM Provider Interface
//!
//! A trait-based abstraction for communicating with LLM backends.
//!
//! ## Design
//! - `LlmProvider` trait defines the core interface
//! - Implementations for OpenAI-compatible servers (OpenAI, Groq, Ollama) and Anthropic
//! - `Provider` picks one at runtime from a `ProviderConfig`
//! - Streaming via async streams
//! - Usage tracking

pub mod openai;
pub mod anthropic;

pub use openai::OpenAIProvider;
pub use anthropic::AnthropicProvider;

use crate::error;
use crate::turn::{Speaker, Turn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;

// ============================================================================
// Core Types
// ============================================================================

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        match turn.role() {
            Speaker::User => ChatMessage::user(turn.text()),
            Speaker::Assistant => ChatMessage::assistant(turn.text()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Request parameters for a completion
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub stop: Option<Vec<String>>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }
}

/// Response from a completion request
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub id: String,
    pub model: String,
    pub content: Option<String>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown,
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// A streaming chunk from the model
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Text content delta
    Text(String),
    /// Stream finished
    Done {
        finish_reason: FinishReason,
        usage: Option<Usage>,
    },
    /// Error occurred
    Error(String),
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Error type for provider operations
#[derive(Debug)]
pub enum ProviderError {
    /// Network/connection error
    Network(String),
    /// The HTTP client gave up waiting
    Timeout,
    /// API returned an error
    Api { status: u16, message: String },
    /// Failed to parse response
    Parse(String),
    /// Rate limited
    RateLimited { retry_after: Option<u64> },
    /// Authentication failed
    AuthenticationFailed,
    /// Response carried no text
    EmptyResponse,
    /// Other error
    Other(String),
}

impl ProviderError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }

    /// Map a non-success HTTP status to an error
    pub(crate) fn from_status(status: u16, retry_after: Option<u64>, body: String) -> Self {
        match status {
            429 => Self::RateLimited { retry_after },
            401 | 403 => Self::AuthenticationFailed,
            _ => Self::Api { status, message: body },
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(e) => write!(f, "Network error: {}", e),
            Self::Timeout => write!(f, "Request timed out"),
            Self::Api { status, message } => write!(f, "API error ({}): {}", status, message),
            Self::Parse(e) => write!(f, "Parse error: {}", e),
            Self::RateLimited { retry_after } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after {
                    write!(f, " (retry after {}s)", secs)?;
                }
                Ok(())
            }
            Self::AuthenticationFailed => write!(f, "Authentication failed"),
            Self::EmptyResponse => write!(f, "No content in response"),
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Splits a server-sent event body into complete events.
///
/// Network chunks are buffered as raw bytes and only whole events are decoded,
/// so a multi-byte character cut across two chunks comes out intact.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete event (without its blank-line terminator), if any
    pub(crate) fn next_event(&mut self) -> Option<String> {
        let pos = self.pending.windows(2).position(|w| w == b"\n\n")?;
        let event: Vec<u8> = self.pending.drain(..pos + 2).take(pos).collect();
        Some(String::from_utf8_lossy(&event).into_owned())
    }
}

/// Seconds from a `retry-after` header, if present and numeric
pub(crate) fn retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// The main LLM provider trait
#[allow(async_fn_in_trait)]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "openai", "anthropic")
    fn name(&self) -> &str;

    /// Get the default model
    fn default_model(&self) -> &str;

    /// Send a completion request and get a full response
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Send a completion request and stream the response
    async fn stream(&self, request: CompletionRequest) -> Result<StreamReceiver, ProviderError>;
}

/// Receiver for streaming responses
pub struct StreamReceiver {
    inner: Pin<Box<dyn futures_core::Stream<Item = StreamChunk> + Send>>,
}

impl StreamReceiver {
    pub fn new<S>(stream: S) -> Self
    where
        S: futures_core::Stream<Item = StreamChunk> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Collect all text chunks into a single string
    pub async fn collect_text(self) -> Result<String, ProviderError> {
        Ok(self.collect_with(|_| {}).await?.text)
    }

    /// Collect the whole reply, handing each text delta to `on_text` as it arrives
    pub async fn collect_with<F>(mut self, mut on_text: F) -> Result<StreamedReply, ProviderError>
    where
        F: FnMut(&str),
    {
        use futures_util::StreamExt;

        let mut text = String::new();
        while let Some(chunk) = self.inner.next().await {
            match chunk {
                StreamChunk::Text(t) => {
                    on_text(&t);
                    text.push_str(&t);
                }
                StreamChunk::Done { finish_reason, usage } => {
                    return Ok(StreamedReply { text, finish_reason, usage });
                }
                StreamChunk::Error(e) => return Err(ProviderError::Other(e)),
            }
        }
        Ok(StreamedReply {
            text,
            finish_reason: FinishReason::Unknown,
            usage: None,
        })
    }
}

/// A fully received streaming reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedReply {
    pub text: String,
    pub finish_reason: FinishReason,
    /// Present when the backend reports usage on streams
    pub usage: Option<Usage>,
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Configuration for creating providers
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub headers: HashMap<String, String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    Groq,
    OpenAI,
    Anthropic,
    Ollama,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Groq => "groq",
            ProviderType::OpenAI => "openai",
            ProviderType::Anthropic => "anthropic",
            ProviderType::Ollama => "ollama",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "groq" => Some(ProviderType::Groq),
            "openai" => Some(ProviderType::OpenAI),
            "anthropic" | "claude" => Some(ProviderType::Anthropic),
            "ollama" | "local" => Some(ProviderType::Ollama),
            _ => None,
        }
    }

    /// Environment variable holding the API key, if the provider needs one
    pub fn api_key_var(&self) -> Option<&'static str> {
        match self {
            ProviderType::Groq => Some("GROQ_API_KEY"),
            ProviderType::OpenAI => Some("OPENAI_API_KEY"),
            ProviderType::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderType::Ollama => None,
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProviderConfig {
    /// Groq's OpenAI-compatible endpoint
    pub fn groq(api_key: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::Groq,
            api_key: Some(api_key.into()),
            base_url: Some("https://api.groq.com/openai/v1".into()),
            default_model: Some("llama3-8b-8192".into()),
            headers: HashMap::new(),
            timeout_secs: Some(120),
        }
    }

    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::OpenAI,
            api_key: Some(api_key.into()),
            base_url: Some("https://api.openai.com/v1".into()),
            default_model: Some("gpt-4o-mini".into()),
            headers: HashMap::new(),
            timeout_secs: Some(120),
        }
    }

    pub fn anthropic(api_key: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::Anthropic,
            api_key: Some(api_key.into()),
            base_url: Some("https://api.anthropic.com/v1".into()),
            default_model: Some("claude-sonnet-4-20250514".into()),
            headers: HashMap::new(),
            timeout_secs: Some(120),
        }
    }

    /// Local Ollama server (OpenAI-compatible API)
    pub fn ollama(model: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::Ollama,
            api_key: None,
            base_url: Some("http://localhost:11434/v1".into()),
            default_model: Some(model.into()),
            headers: HashMap::new(),
            timeout_secs: Some(300),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

// ============================================================================
// Runtime provider selection
// ============================================================================

/// Whichever backend the configuration asked for
pub enum Provider {
    OpenAI(OpenAIProvider),
    Anthropic(AnthropicProvider),
}

impl Provider {
    pub fn from_config(config: ProviderConfig) -> error::Result<Self> {
        match config.provider_type {
            ProviderType::Anthropic => Ok(Provider::Anthropic(AnthropicProvider::new(config)?)),
            ProviderType::Groq | ProviderType::OpenAI | ProviderType::Ollama => {
                Ok(Provider::OpenAI(OpenAIProvider::new(config)?))
            }
        }
    }
}

impl LlmProvider for Provider {
    fn name(&self) -> &str {
        match self {
            Provider::OpenAI(p) => p.name(),
            Provider::Anthropic(p) => p.name(),
        }
    }

    fn default_model(&self) -> &str {
        match self {
            Provider::OpenAI(p) => p.default_model(),
            Provider::Anthropic(p) => p.default_model(),
        }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        match self {
            Provider::OpenAI(p) => p.complete(request).await,
            Provider::Anthropic(p) => p.complete(request).await,
        }
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamReceiver, ProviderError> {
        match self {
            Provider::OpenAI(p) => p.stream(request).await,
            Provider::Anthropic(p) => p.stream(request).await,
        }
    }
}

// ============================================================================
// Usage Tracking
// ============================================================================

/// Tracks token usage across multiple calls
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    pub total_calls: usize,
    pub total_prompt_tokens: usize,
    pub total_completion_tokens: usize,
    pub by_model: HashMap<String, Usage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, model: &str, usage: &Usage) {
        self.total_calls += 1;
        self.total_prompt_tokens += usage.prompt_tokens;
        self.total_completion_tokens += usage.completion_tokens;

        let entry = self.by_model.entry(model.to_string()).or_default();
        entry.prompt_tokens += usage.prompt_tokens;
        entry.completion_tokens += usage.completion_tokens;
        entry.total_tokens += usage.total_tokens;
    }

    pub fn total_tokens(&self) -> usize {
        self.total_prompt_tokens + self.total_completion_tokens
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_constructors() {
        let sys = ChatMessage::system("You are helpful");
        assert_eq!(sys.role, Role::System);
        assert_eq!(sys.content, "You are helpful");

        let user = ChatMessage::user("Hello");
        assert_eq!(user.role, Role::User);

        let asst = ChatMessage::assistant("Hi there!");
        assert_eq!(asst.role, Role::Assistant);
    }

    #[test]
    fn test_turn_conversion() {
        let msg = ChatMessage::from(&Turn::user("bme280, lcd1602"));
        assert_eq!(msg, ChatMessage::user("bme280, lcd1602"));

        let msg = ChatMessage::from(&Turn::assistant("ack"));
        assert_eq!(msg.role, Role::Assistant);
    }

    #[test]
    fn test_completion_request_builder() {
        let request = CompletionRequest::new(vec![ChatMessage::user("Hello")])
            .with_model("llama3-8b-8192")
            .with_temperature(0.3);

        assert_eq!(request.model, Some("llama3-8b-8192".into()));
        assert_eq!(request.temperature, Some(0.3));
        assert_eq!(request.max_tokens, None);
    }

    #[test]
    fn test_provider_config() {
        let config = ProviderConfig::groq("gsk-test");
        assert_eq!(config.provider_type, ProviderType::Groq);
        assert_eq!(config.default_model, Some("llama3-8b-8192".into()));

        let config = ProviderConfig::anthropic("sk-ant-test");
        assert_eq!(config.provider_type, ProviderType::Anthropic);
        assert_eq!(config.base_url.as_deref(), Some("https://api.anthropic.com/v1"));

        let config = ProviderConfig::ollama("llama3").with_timeout(10);
        assert_eq!(config.api_key, None);
        assert_eq!(config.timeout_secs, Some(10));
    }

    #[test]
    fn test_provider_type_parse() {
        assert_eq!(ProviderType::parse("GROQ"), Some(ProviderType::Groq));
        assert_eq!(ProviderType::parse("claude"), Some(ProviderType::Anthropic));
        assert_eq!(ProviderType::parse("local"), Some(ProviderType::Ollama));
        assert_eq!(ProviderType::parse("bard"), None);
        assert_eq!(ProviderType::Ollama.api_key_var(), None);
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ProviderError::from_status(429, Some(3), String::new()),
            ProviderError::RateLimited { retry_after: Some(3) }
        ));
        assert!(matches!(
            ProviderError::from_status(401, None, String::new()),
            ProviderError::AuthenticationFailed
        ));
        assert!(matches!(
            ProviderError::from_status(500, None, "boom".into()),
            ProviderError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_provider_from_config() {
        let provider = Provider::from_config(ProviderConfig::groq("gsk-test")).unwrap();
        assert_eq!(provider.name(), "groq");
        assert_eq!(provider.default_model(), "llama3-8b-8192");

        let provider = Provider::from_config(ProviderConfig::anthropic("sk-ant")).unwrap();
        assert_eq!(provider.name(), "anthropic");
    }

    #[test]
    fn test_stream_collect() {
        let chunks = vec![
            StreamChunk::Text("yes".into()),
            StreamChunk::Text("!".into()),
            StreamChunk::Done { finish_reason: FinishReason::Stop, usage: None },
            StreamChunk::Text("ignored".into()),
        ];
        let receiver = StreamReceiver::new(futures_util::stream::iter(chunks));

        let mut seen = Vec::new();
        let reply = tokio_test::block_on(receiver.collect_with(|t| seen.push(t.to_string())))
            .unwrap();
        assert_eq!(reply.text, "yes!");
        assert_eq!(reply.finish_reason, FinishReason::Stop);
        assert_eq!(seen, vec!["yes", "!"]);
    }

    #[test]
    fn test_sse_buffer_split_character() {
        let body = "data: {\"t\": \"25°C\"}\n\ndata: [DONE]\n\n".as_bytes();
        let cut = body.iter().position(|&b| b == 0xC2).unwrap() + 1;

        let mut buffer = SseBuffer::default();
        buffer.push(&body[..cut]);
        assert_eq!(buffer.next_event(), None);

        buffer.push(&body[cut..]);
        assert_eq!(buffer.next_event().as_deref(), Some("data: {\"t\": \"25°C\"}"));
        assert_eq!(buffer.next_event().as_deref(), Some("data: [DONE]"));
        assert_eq!(buffer.next_event(), None);
    }

    #[test]
    fn test_stream_error() {
        let chunks = vec![StreamChunk::Text("par".into()), StreamChunk::Error("reset".into())];
        let receiver = StreamReceiver::new(futures_util::stream::iter(chunks));
        let err = tokio_test::block_on(receiver.collect_text()).unwrap_err();
        assert!(matches!(err, ProviderError::Other(ref m) if m == "reset"));
    }

    #[test]
    fn test_usage_tracker() {
        let mut tracker = UsageTracker::new();

        tracker.track("llama3-8b-8192", &Usage {
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
        });

        tracker.track("llama3-8b-8192", &Usage {
            prompt_tokens: 200,
            completion_tokens: 100,
            total_tokens: 300,
        });

        assert_eq!(tracker.total_calls, 2);
        assert_eq!(tracker.total_prompt_tokens, 300);
        assert_eq!(tracker.total_completion_tokens, 150);
        assert_eq!(tracker.total_tokens(), 450);
        assert_eq!(tracker.by_model["llama3-8b-8192"].total_tokens, 450);
    }
}
