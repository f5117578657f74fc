//! # Conversation turns
//!
//! A turn is one message exchanged between the user and the model. Turns are
//! immutable once created; there are no setters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message in a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    role: Speaker,
    text: String,
}

impl Turn {
    pub fn new(role: Speaker, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Speaker::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Speaker::Assistant, text)
    }

    pub fn role(&self) -> Speaker {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Pretty print the turn to stdout
    pub fn pretty_print(&self) {
        println!("[{}]", self.role.as_str().to_uppercase());
        println!("{}", self.text);
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let t = Turn::user("#### bme280, mpu6050 #### #### i2c ####");
        assert_eq!(t.role(), Speaker::User);
        assert!(t.text().contains("bme280"));

        let t = Turn::assistant("ack");
        assert_eq!(t.role(), Speaker::Assistant);
        assert_eq!(t.text(), "ack");
    }

    #[test]
    fn test_serde_shape() {
        let t = Turn::assistant("ok");
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "text": "ok"}));
    }
}
