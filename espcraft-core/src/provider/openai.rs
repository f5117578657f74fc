//! OpenAI-compatible provider implementation
//!
//! Works with OpenAI, Groq, Ollama, vLLM and other OpenAI-compatible APIs.

use super::*;
use crate::error;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// OpenAI-compatible provider
pub struct OpenAIProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> error::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs.unwrap_or(120)))
            .build()
            .map_err(|e| {
                error::Error::config_invalid(format!("failed to create HTTP client: {}", e))
                    .with_operation("openai::new")
                    .set_source(e)
            })?;

        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or("https://api.openai.com/v1")
    }

    fn build_request(&self, request: CompletionRequest, stream: bool) -> reqwest::RequestBuilder {
        let model = request.model.as_deref().unwrap_or(self.default_model());

        let api_request = OpenAIRequest {
            model: model.to_string(),
            messages: request.messages.iter().map(OpenAIMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: Some(stream),
            stream_options: stream.then_some(StreamOptions { include_usage: true }),
            stop: request.stop,
        };

        tracing::debug!(
            provider = self.name(),
            model = %api_request.model,
            messages = api_request.messages.len(),
            stream,
            "sending chat completion"
        );

        let mut req = self.client
            .post(format!("{}/chat/completions", self.base_url()))
            .json(&api_request);

        if let Some(api_key) = &self.config.api_key {
            if !api_key.is_empty() {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }
        }

        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        req
    }
}

/// Running state of one streamed completion.
///
/// The finish reason arrives on the last content chunk and usage (when the
/// server sends it) on a chunk after that, so `Done` is only emitted at
/// `[DONE]`.
#[derive(Debug, Default)]
struct StreamTally {
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

impl StreamTally {
    fn feed(&mut self, data: &str) -> Vec<StreamChunk> {
        if data == "[DONE]" {
            return vec![self.finish()];
        }
        let Ok(chunk) = serde_json::from_str::<OpenAIStreamChunk>(data) else {
            return Vec::new();
        };

        let usage = chunk.usage.or_else(|| chunk.x_groq.and_then(|x| x.usage));
        if let Some(u) = usage {
            self.usage = Some(Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });
        }

        let mut out = Vec::new();
        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                out.push(StreamChunk::Text(content));
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(finish_reason(Some(reason.as_str())));
            }
        }
        out
    }

    fn finish(&mut self) -> StreamChunk {
        StreamChunk::Done {
            finish_reason: self.finish_reason.take().unwrap_or(FinishReason::Unknown),
            usage: self.usage.take(),
        }
    }
}

fn finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &str {
        self.config.provider_type.as_str()
    }

    fn default_model(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or("gpt-4o-mini")
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let response = self.build_request(request, false)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry = retry_after(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, retry, text));
        }

        let api_response: OpenAIResponse = response.json().await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let choice = api_response.choices.first()
            .ok_or_else(|| ProviderError::Other("No choices in response".into()))?;

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }).unwrap_or_default();

        tracing::debug!(
            provider = self.name(),
            model = %api_response.model,
            completion_tokens = usage.completion_tokens,
            "chat completion received"
        );

        Ok(CompletionResponse {
            id: api_response.id,
            model: api_response.model,
            content: choice.message.content.clone(),
            finish_reason: finish_reason(choice.finish_reason.as_deref()),
            usage,
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamReceiver, ProviderError> {
        let response = self.build_request(request, true)
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
                            for line in event.lines() {
                                let Some(data) = line.strip_prefix("data: ") else {
                                    continue;
                                };
                                for chunk in tally.feed(data) {
                                    let done = matches!(chunk, StreamChunk::Done { .. });
                                    yield chunk;
                                    if done {
                                        return;
                                    }
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

            // connection closed without [DONE]
            yield tally.finish();
        };

        Ok(StreamReceiver::new(stream))
    }
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

impl From<&ChatMessage> for OpenAIMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.as_str().into(),
            content: Some(msg.content.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    id: String,
    model: String,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    usage: Option<OpenAIUsage>,
    /// Groq reports stream usage here instead
    x_groq: Option<GroqExtra>,
}

#[derive(Debug, Deserialize)]
struct GroqExtra {
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_shape() {
        let msg = OpenAIMessage::from(&ChatMessage::system("be brief"));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!({"role": "system", "content": "be brief"}));
    }

    #[test]
    fn test_response_decoding() {
        let body = r#"{
            "id": "chatcmpl-1",
            "model": "llama3-8b-8192",
            "choices": [{"message": {"role": "assistant", "content": "ack"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 1, "total_tokens": 13}
        }"#;
        let resp: OpenAIResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("ack"));
        assert_eq!(finish_reason(resp.choices[0].finish_reason.as_deref()), FinishReason::Stop);
        assert_eq!(resp.usage.unwrap().total_tokens, 13);
    }

    #[test]
    fn test_stream_tally() {
        let mut tally = StreamTally::default();
        assert!(matches!(
            tally.feed(r#"{"choices": [{"delta": {"content": "ye"}, "finish_reason": null}]}"#).as_slice(),
            [StreamChunk::Text(t)] if t == "ye"
        ));
        assert!(tally.feed(r#"{"choices": [{"delta": {"content": "s"}, "finish_reason": "stop"}]}"#).len() == 1);
        assert!(tally
            .feed(r#"{"choices": [], "usage": {"prompt_tokens": 40, "completion_tokens": 1, "total_tokens": 41}}"#)
            .is_empty());
        assert!(tally.feed("not json").is_empty());

        match tally.feed("[DONE]").as_slice() {
            [StreamChunk::Done { finish_reason, usage: Some(usage) }] => {
                assert_eq!(*finish_reason, FinishReason::Stop);
                assert_eq!(usage.total_tokens, 41);
            }
            other => panic!("unexpected chunks: {:?}", other),
        }
    }

    #[test]
    fn test_stream_tally_groq_usage() {
        let mut tally = StreamTally::default();
        tally.feed(r#"{"choices": [{"delta": {}, "finish_reason": "stop"}], "x_groq": {"usage": {"prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11}}}"#);
        let StreamChunk::Done { usage: Some(usage), .. } = tally.finish() else {
            panic!("expected usage");
        };
        assert_eq!(usage.prompt_tokens, 9);
    }

    #[test]
    fn test_name_follows_config() {
        let provider = OpenAIProvider::new(ProviderConfig::ollama("llama3")).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.base_url(), "http://localhost:11434/v1");
    }
}
