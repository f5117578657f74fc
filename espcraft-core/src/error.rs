//! espcraft-core error types
//!
//! Re-exports espcraft-error and provides core-specific conveniences.

// Re-export the core error types
pub use espcraft_error::{Error, ErrorKind, ErrorStatus, Result};

use crate::provider::ProviderError;

// =============================================================================
// Core-specific error constructors
// =============================================================================

/// Convert a provider failure into the unified error type.
///
/// The raw `ProviderError` is kept as the source so the Debug output still
/// shows what the HTTP layer saw.
pub fn provider_error(provider: &str, err: ProviderError) -> Error {
    let message = err.to_string();
    let built = match &err {
        ProviderError::Network(_) => Error::new(ErrorKind::NetworkFailed, message),
        ProviderError::Timeout => Error::new(ErrorKind::Timeout, message),
        ProviderError::RateLimited { retry_after } => {
            let e = Error::new(ErrorKind::RateLimited, message);
            match retry_after {
                Some(secs) => e.with_context("retry_after", secs.to_string()),
                None => e,
            }
        }
        ProviderError::AuthenticationFailed => {
            Error::new(ErrorKind::AuthenticationFailed, message)
        }
        ProviderError::Api { status, .. } => {
            let e = Error::new(ErrorKind::ProviderFailed, message)
                .with_context("status", status.to_string());
            if *status >= 500 {
                e.temporary()
            } else {
                e
            }
        }
        ProviderError::Parse(_) | ProviderError::EmptyResponse | ProviderError::Other(_) => {
            Error::new(ErrorKind::ProviderFailed, message)
        }
    };
    built
        .with_operation("provider::call")
        .with_context("provider", provider.to_string())
        .set_source(err)
}

/// Create a ParseFailed error for a model reply
pub fn reply_parse_failed(what: &'static str, reason: impl Into<String>) -> Error {
    Error::parse_failed(reason).with_context("expected", what)
}

/// Create a ConfigInvalid error for a named setting
pub fn config_invalid(key: &'static str, reason: impl Into<String>) -> Error {
    Error::config_invalid(reason).with_context("key", key)
}
