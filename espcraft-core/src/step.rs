//! # Conversation steps
//!
//! The conversation moves through three working steps and one terminal step:
//!
//! ```text
//! Collect -> AskReview -> Validate -> Done
//!    ^                       |
//!    +----- "modify" --------+
//! ```
//!
//! [`transition`] is pure: it only looks at the current step and the text of
//! the reply the model just produced.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a conversation currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Gather the component list and protocol
    #[default]
    Collect,
    /// Ask whether the user wants to review compatibility by hand
    AskReview,
    /// Check each component against the protocol
    Validate,
    /// Terminal
    Done,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Collect => "collect",
            Step::AskReview => "ask_review",
            Step::Validate => "validate",
            Step::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Step::Done)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validate-step reply that sends the user back to collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnRequest {
    Modify,
    DifferentProtocol,
}

impl ReturnRequest {
    pub fn keyword(&self) -> &'static str {
        match self {
            ReturnRequest::Modify => "modify",
            ReturnRequest::DifferentProtocol => "different protocol",
        }
    }

    /// Match a whole reply against the return keywords.
    ///
    /// Only surrounding whitespace is ignored; "please modify" is not a match.
    pub fn parse(reply: &str) -> Option<Self> {
        let reply = reply.trim();
        if reply.eq_ignore_ascii_case("modify") {
            Some(ReturnRequest::Modify)
        } else if reply.eq_ignore_ascii_case("different protocol") {
            Some(ReturnRequest::DifferentProtocol)
        } else {
            None
        }
    }
}

/// Permissive yes/no reading of a reply. Anything unrecognized is "no".
pub fn interpret_yes_no(reply: &str) -> bool {
    let word = reply.trim();
    let word = word
        .strip_suffix('.')
        .or_else(|| word.strip_suffix('!'))
        .unwrap_or(word)
        .trim_end();
    word.eq_ignore_ascii_case("yes")
}

/// Next step after the model replied `reply` while in `step`.
///
/// `Done` maps to itself; callers reject advancing a finished conversation
/// before a model call is made.
pub fn transition(step: Step, reply: &str) -> Step {
    match step {
        Step::Collect => Step::AskReview,
        Step::AskReview => Step::Validate,
        Step::Validate => match ReturnRequest::parse(reply) {
            Some(_) => Step::Collect,
            None => Step::Done,
        },
        Step::Done => Step::Done,
    }
}
