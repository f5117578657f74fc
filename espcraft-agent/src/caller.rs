//! Model caller - turns accumulated turns plus an instruction into one reply

use espcraft_core::error::{self, Result};
use espcraft_core::prompts::SYSTEM_PROMPT;
use espcraft_core::{ChatMessage, CompletionRequest, LlmProvider, Turn, Usage, UsageTracker};
use std::sync::Mutex;

/// Anything that can produce the next assistant turn.
///
/// Implementations must not retain or modify `turns`.
#[allow(async_fn_in_trait)]
pub trait ModelCaller: Send + Sync {
    async fn call(&self, turns: &[Turn], instruction: &str) -> Result<Turn>;
}

type TextSink = Box<dyn Fn(&str) + Send + Sync>;

/// `ModelCaller` backed by an [`LlmProvider`]
pub struct ProviderCaller<P> {
    provider: P,
    temperature: Option<f32>,
    on_text: Option<TextSink>,
    usage: Mutex<UsageTracker>,
}

impl<P: LlmProvider> ProviderCaller<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            temperature: None,
            on_text: None,
            usage: Mutex::new(UsageTracker::new()),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Stream replies, handing each text delta to `sink` as it arrives
    pub fn with_streaming<F>(mut self, sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_text = Some(Box::new(sink));
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn is_streaming(&self) -> bool {
        self.on_text.is_some()
    }

    /// Snapshot of token usage so far. Streamed calls count only when the
    /// backend reported usage for them.
    pub fn usage(&self) -> UsageTracker {
        self.usage
            .lock()
            .map(|u| u.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn track(&self, model: &str, usage: &Usage) {
        self.usage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .track(model, usage);
    }

    fn build_request(&self, turns: &[Turn], instruction: &str) -> CompletionRequest {
        let mut messages = Vec::with_capacity(turns.len() + 2);
        messages.push(ChatMessage::system(SYSTEM_PROMPT));
        messages.push(ChatMessage::system(instruction));
        messages.extend(turns.iter().map(ChatMessage::from));

        let request = CompletionRequest::new(messages);
        match self.temperature {
            Some(t) => request.with_temperature(t),
            None => request,
        }
    }
}

impl<P: LlmProvider> ModelCaller for ProviderCaller<P> {
    async fn call(&self, turns: &[Turn], instruction: &str) -> Result<Turn> {
        let request = self.build_request(turns, instruction);
        let name = self.provider.name();

        let text = match &self.on_text {
            Some(sink) => {
                let model = request
                    .model
                    .clone()
                    .unwrap_or_else(|| self.provider.default_model().to_string());
                let receiver = self
                    .provider
                    .stream(request)
                    .await
                    .map_err(|e| error::provider_error(name, e))?;
                let reply = receiver
                    .collect_with(|t| sink(t))
                    .await
                    .map_err(|e| error::provider_error(name, e))?;
                match &reply.usage {
                    Some(usage) => self.track(&model, usage),
                    None => tracing::debug!(provider = name, "stream reported no usage"),
                }
                reply.text
            }
            None => {
                let response = self
                    .provider
                    .complete(request)
                    .await
                    .map_err(|e| error::provider_error(name, e))?;
                self.track(&response.model, &response.usage);
                response.content.unwrap_or_default()
            }
        };

        if text.trim().is_empty() {
            return Err(error::provider_error(name, espcraft_core::ProviderError::EmptyResponse)
                .with_operation("caller::call"));
        }

        Ok(Turn::assistant(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use espcraft_core::{
        CompletionResponse, ErrorKind, FinishReason, ProviderError, Role, StreamChunk,
        StreamReceiver, Usage,
    };
    use std::sync::Arc;

    /// Records the last request and answers with a fixed reply
    struct CountingProvider {
        last: Mutex<Vec<ChatMessage>>,
        reply: Option<String>,
    }

    impl CountingProvider {
        fn new(reply: Option<&str>) -> Self {
            Self {
                last: Mutex::new(Vec::new()),
                reply: reply.map(str::to_string),
            }
        }
    }

    impl LlmProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn default_model(&self) -> &str {
            "count-1"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> std::result::Result<CompletionResponse, ProviderError> {
            *self.last.lock().unwrap() = request.messages;
            Ok(CompletionResponse {
                id: "r1".into(),
                model: "count-1".into(),
                content: self.reply.clone(),
                finish_reason: FinishReason::Stop,
                usage: Usage { prompt_tokens: 10, completion_tokens: 2, total_tokens: 12 },
            })
        }

        async fn stream(
            &self,
            _request: CompletionRequest,
        ) -> std::result::Result<StreamReceiver, ProviderError> {
            let text = self.reply.clone().unwrap_or_default();
            let (a, b) = text.split_at(text.len() / 2);
            Ok(StreamReceiver::new(futures_util::stream::iter(vec![
                StreamChunk::Text(a.to_string()),
                StreamChunk::Text(b.to_string()),
                StreamChunk::Done {
                    finish_reason: FinishReason::Stop,
                    usage: Some(Usage { prompt_tokens: 30, completion_tokens: 2, total_tokens: 32 }),
                },
            ])))
        }
    }

    #[tokio::test]
    async fn test_request_layout() {
        let caller = ProviderCaller::new(CountingProvider::new(Some("ack"))).with_temperature(0.3);
        let turns = vec![Turn::user("#### bme280, mpu6050 #### #### i2c ####")];

        let reply = caller.call(&turns, "collect").await.unwrap();
        assert_eq!(reply, Turn::assistant("ack"));

        let sent = caller.provider().last.lock().unwrap().clone();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].content, SYSTEM_PROMPT);
        assert_eq!(sent[1], ChatMessage::system("collect"));
        assert_eq!(sent[2].role, Role::User);

        let usage = caller.usage();
        assert_eq!(usage.total_calls, 1);
        assert_eq!(usage.total_tokens(), 12);
    }

    #[tokio::test]
    async fn test_empty_reply_is_provider_error() {
        let caller = ProviderCaller::new(CountingProvider::new(None));
        let err = caller.call(&[], "collect").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderFailed);
    }

    #[tokio::test]
    async fn test_streaming_sink() {
        let seen = Arc::new(Mutex::new(String::new()));
        let sink = seen.clone();
        let caller = ProviderCaller::new(CountingProvider::new(Some("different protocol")))
            .with_streaming(move |t| sink.lock().unwrap().push_str(t));
        assert!(caller.is_streaming());

        let reply = caller.call(&[], "validate").await.unwrap();
        assert_eq!(reply.text(), "different protocol");
        assert_eq!(&*seen.lock().unwrap(), "different protocol");

        let usage = caller.usage();
        assert_eq!(usage.total_calls, 1);
        assert_eq!(usage.total_tokens(), 32);
        assert!(usage.by_model.contains_key("count-1"));
    }
}
