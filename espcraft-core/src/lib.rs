//! # espcraft core
//!
//! Building blocks for an ESP32 component compatibility assistant.
//!
//! ## Core Concepts
//! - **Turns**: immutable user/assistant messages
//! - **ConversationState**: append-only turn log plus review/return flags and the current step
//! - **Steps**: collect -> ask review -> validate, with a pure transition function
//! - **Prompts**: system prompt and per-step instructions
//! - **Replies**: best-effort decoding of the JSON the model is asked to produce
//! - **Provider**: trait-based LLM communication (OpenAI-compatible, Anthropic)

pub mod error;
pub mod turn;
pub mod state;
pub mod step;
pub mod prompts;
pub mod reply;
pub mod provider;
pub mod config;

pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use turn::{Speaker, Turn};
pub use state::ConversationState;
pub use step::{interpret_yes_no, transition, ReturnRequest, Step};
pub use reply::{ComponentRequest, Protocol, ValidatedComponent, ValidationReport};
pub use provider::{
    LlmProvider, Provider, ProviderConfig, ProviderType, ProviderError,
    ChatMessage, Role, CompletionRequest, CompletionResponse,
    StreamChunk, StreamReceiver, StreamedReply, FinishReason, Usage, UsageTracker,
    OpenAIProvider, AnthropicProvider,
};
pub use config::{AppConfig, ModelTier, Overrides};
