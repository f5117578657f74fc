//! Anthropic Claude provider implementation

use super::*;
use crate::error;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Anthropic Claude provider
pub struct AnthropicProvider {
    client: Client,
    config: ProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> error::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs.unwrap_or(120)))
            .build()
            .map_err(|e| {
                error::Error::config_invalid(format!("failed to create HTTP client: {}", e))
                    .with_operation("anthropic::new")
                    .set_source(e)
            })?;

        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or("https://api.anthropic.com/v1")
    }

    fn build_request(
        &self,
        request: CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::RequestBuilder, ProviderError> {
        let model = request.model.as_deref().unwrap_or(self.default_model());
        let (system, messages) = split_system(&request.messages);

        let api_request = AnthropicRequest {
            model: model.to_string(),
            messages,
            system,
            max_tokens: request.max_tokens.unwrap_or(4096),
            temperature: request.temperature,
            stream: Some(stream),
            stop_sequences: request.stop,
        };

        let api_key = self.config.api_key.as_ref()
            .ok_or(ProviderError::AuthenticationFailed)?;

        tracing::debug!(
            provider = self.name(),
            model = %api_request.model,
            messages = api_request.messages.len(),
            stream,
            "sending messages request"
        );

        let mut req = self.client
            .post(format!("{}/messages", self.base_url()))
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&api_request);

        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        Ok(req)
    }
}

/// Anthropic takes system text as a top-level field, not a message.
/// Several system messages are joined with blank lines.
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system = Vec::new();
    let mut rest = Vec::new();
    for msg in messages {
        match msg.role {
            Role::System => system.push(msg.content.as_str()),
            Role::User | Role::Assistant => rest.push(AnthropicMessage::from(msg)),
        }
    }
    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    (system, rest)
}

fn stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        _ => FinishReason::Unknown,
    }
}

/// Running state of one streamed message. Input tokens come with
/// `message_start`, the stop reason and output tokens with `message_delta`;
/// everything is reported together at `message_stop`.
#[derive(Debug, Default)]
struct StreamTally {
    input_tokens: usize,
    output_tokens: usize,
    stop_reason: Option<FinishReason>,
}

impl StreamTally {
    fn feed(&mut self, event: &str, data: String) -> Option<StreamChunk> {
        match event {
            "message_start" => {
                if let Ok(start) = serde_json::from_str::<MessageStart>(&data) {
                    self.input_tokens = start.message.usage.input_tokens;
                    self.output_tokens = start.message.usage.output_tokens;
                }
                None
            }
            "content_block_delta" => match serde_json::from_str::<ContentBlockDelta>(&data) {
                Ok(ContentBlockDelta { delta: DeltaContent::TextDelta { text } }) => {
                    Some(StreamChunk::Text(text))
                }
                _ => None,
            },
            "message_delta" => {
                if let Ok(delta) = serde_json::from_str::<MessageDelta>(&data) {
                    if let Some(reason) = delta.delta.stop_reason {
                        self.stop_reason = Some(stop_reason(Some(reason.as_str())));
                    }
                    if let Some(usage) = delta.usage {
                        self.output_tokens = usage.output_tokens;
                    }
                }
                None
            }
            "message_stop" => Some(self.finish()),
            "error" => Some(StreamChunk::Error(data)),
            _ => None,
        }
    }

    fn finish(&mut self) -> StreamChunk {
        let usage = (self.input_tokens + self.output_tokens > 0).then(|| Usage {
            prompt_tokens: self.input_tokens,
            completion_tokens: self.output_tokens,
            total_tokens: self.input_tokens + self.output_tokens,
        });
        StreamChunk::Done {
            finish_reason: self.stop_reason.take().unwrap_or(FinishReason::Unknown),
            usage,
        }
    }
}

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or("claude-sonnet-4-20250514")
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let response = self.build_request(request, false)?
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry = retry_after(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, retry, text));
        }

        let api_response: AnthropicResponse = response.json().await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let content: String = api_response
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect();

        let usage = Usage {
            prompt_tokens: api_response.usage.input_tokens,
            completion_tokens: api_response.usage.output_tokens,
            total_tokens: api_response.usage.input_tokens + api_response.usage.output_tokens,
        };

        tracing::debug!(
            provider = self.name(),
            model = %api_response.model,
            completion_tokens = usage.completion_tokens,
            "messages response received"
        );

        Ok(CompletionResponse {
            id: api_response.id,
            model: api_response.model,
            content: if content.is_empty() { None } else { Some(content) },
            finish_reason: stop_reason(api_response.stop_reason.as_deref()),
            usage,
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamReceiver, ProviderError> {
        let response = self.build_request(request, true)?
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry = retry_after(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, retry, text));
        }

        // Create async stream from SSE response
        let stream = async_stream::stream! {
            use futures_util::StreamExt;

            let mut byte_stream = response.bytes_stream();
            let mut buffer = SseBuffer::default();
            let mut tally = StreamTally::default();

            while let Some(chunk_result) = byte_stream.next().await {
                match chunk_result {
                    Ok(bytes) => {
                        buffer.push(&bytes);

                        while let Some(event) = buffer.next_event() {
                            let mut event_type = None;
                            let mut event_data = None;

                            for line in event.lines() {
                                if let Some(t) = line.strip_prefix("event: ") {
                                    event_type = Some(t.to_string());
                                } else if let Some(d) = line.strip_prefix("data: ") {
                                    event_data = Some(d.to_string());
                                }
                            }

                            let (Some(etype), Some(data)) = (event_type, event_data) else {
                                continue;
                            };

                            if let Some(chunk) = tally.feed(&etype, data) {
                                let last = !matches!(chunk, StreamChunk::Text(_));
                                yield chunk;
                                if last {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        yield StreamChunk::Error(e.to_string());
                        return;
                    }
                }
            }

            yield tally.finish();
        };

        Ok(StreamReceiver::new(stream))
    }
}

// ============================================================================
// Anthropic API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

impl From<&ChatMessage> for AnthropicMessage {
    fn from(msg: &ChatMessage) -> Self {
        let role = match msg.role {
            Role::Assistant => "assistant",
            Role::User | Role::System => "user",
        };
        Self {
            role: role.into(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: usize,
    output_tokens: usize,
}

// Streaming types
#[derive(Debug, Deserialize)]
struct MessageStart {
    message: MessageStartBody,
}

#[derive(Debug, Deserialize)]
struct MessageStartBody {
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    delta: DeltaContent,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum DeltaContent {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    delta: MessageDeltaContent,
    usage: Option<DeltaUsage>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaContent {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    output_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_system() {
        let messages = vec![
            ChatMessage::system("persona"),
            ChatMessage::system("step rules"),
            ChatMessage::user("#### bme280, lcd1602 #### #### i2c ####"),
            ChatMessage::assistant("ack"),
        ];
        let (system, rest) = split_system(&messages);
        assert_eq!(system.as_deref(), Some("persona\n\nstep rules"));
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].role, "user");
        assert_eq!(rest[1].role, "assistant");
    }

    #[test]
    fn test_response_decoding() {
        let body = r#"{
            "id": "msg_1",
            "model": "claude-sonnet-4-20250514",
            "content": [
                {"type": "text", "text": "yes"},
                {"type": "thinking", "thinking": "..."}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 40, "output_tokens": 1}
        }"#;
        let resp: AnthropicResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.content.len(), 2);
        assert!(matches!(resp.content[0], ContentBlock::Text { ref text } if text == "yes"));
        assert_eq!(stop_reason(resp.stop_reason.as_deref()), FinishReason::Stop);
    }

    #[test]
    fn test_stream_tally() {
        let mut tally = StreamTally::default();
        let events = [
            ("message_start", r#"{"type": "message_start", "message": {"id": "msg_1", "usage": {"input_tokens": 52, "output_tokens": 1}}}"#),
            ("ping", r#"{"type": "ping"}"#),
            ("content_block_delta", r#"{"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "modify"}}"#),
            ("message_delta", r#"{"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 3}}"#),
        ];

        let mut text = String::new();
        for (event, data) in events {
            match tally.feed(event, data.to_string()) {
                Some(StreamChunk::Text(t)) => text.push_str(&t),
                None => {}
                Some(other) => panic!("unexpected chunk: {:?}", other),
            }
        }
        assert_eq!(text, "modify");

        match tally.feed("message_stop", "{}".to_string()) {
            Some(StreamChunk::Done { finish_reason, usage: Some(usage) }) => {
                assert_eq!(finish_reason, FinishReason::Stop);
                assert_eq!(usage.prompt_tokens, 52);
                assert_eq!(usage.completion_tokens, 3);
                assert_eq!(usage.total_tokens, 55);
            }
            other => panic!("unexpected chunk: {:?}", other),
        }
    }

    #[test]
    fn test_missing_key_is_auth_failure() {
        let mut config = ProviderConfig::anthropic("unused");
        config.api_key = None;
        let provider = AnthropicProvider::new(config).unwrap();
        let err = provider
            .build_request(CompletionRequest::new(vec![ChatMessage::user("hi")]), false)
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed));
    }
}
