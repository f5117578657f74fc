//! # Structured model replies
//!
//! The prompts ask the model to embed JSON (and a CSV table) in its replies.
//! Nothing here trusts the model: every decoder returns a `ParseFailed`
//! error on malformed input and the sequencer picks a safe default.

use crate::error::{self, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════════════
// Protocol
// ═══════════════════════════════════════════════════════════════════════════════

/// Bus the user wants every component on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    I2c,
    Spi,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::I2c => "i2c",
            Protocol::Spi => "spi",
        }
    }

    /// Normalize user or model spelling.
    ///
    /// Case, whitespace, dashes and a handful of common typos are accepted.
    /// `i2s` is a different bus and is rejected.
    pub fn normalize(raw: &str) -> Option<Self> {
        let cleaned: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match cleaned.as_str() {
            "i2c" | "iic" | "i2cbus" | "12c" | "ic2" | "l2c" | "i2" | "iicbus" | "twi" => {
                Some(Protocol::I2c)
            }
            "spi" | "sp1" | "spl" | "psi" | "sip" | "spibus" => Some(Protocol::Spi),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// JSON block extraction
// ═══════════════════════════════════════════════════════════════════════════════

/// Pull the JSON payload out of a reply.
///
/// Preference order: a ```` ```json ```` fence, any fence whose body starts
/// with `{`, then the first balanced `{ ... }` in the text.
pub fn extract_json_block(reply: &str) -> Option<&str> {
    if let Some(body) = reply
        .split("```json")
        .nth(1)
        .and_then(|s| s.split("```").next())
    {
        return Some(body.trim());
    }

    for (i, chunk) in reply.split("```").enumerate() {
        // odd chunks are fence bodies
        if i % 2 == 1 {
            let body = chunk.trim();
            if body.starts_with('{') {
                return Some(body);
            }
        }
    }

    balanced_object(reply)
}

fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// The CSV table from a validation reply, starting at its `Component,` header
pub fn extract_csv_table(reply: &str) -> Option<String> {
    let mut lines = reply
        .lines()
        .map(str::trim)
        .skip_while(|line| !line.to_ascii_lowercase().starts_with("component,"));

    let header = lines.next()?;
    let mut table = vec![header];
    table.extend(lines.take_while(|line| line.contains(',') && !line.starts_with("```")));
    Some(table.join("\n"))
}

fn decode<T: for<'de> Deserialize<'de>>(reply: &str, what: &'static str) -> Result<T> {
    let block = extract_json_block(reply)
        .ok_or_else(|| error::reply_parse_failed(what, "no JSON block in reply"))?;
    serde_json::from_str(block).map_err(|e| {
        error::reply_parse_failed(what, format!("invalid {}: {}", what, e))
            .with_operation("reply::decode")
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Collection step
// ═══════════════════════════════════════════════════════════════════════════════

/// Acknowledged inputs from the collection step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRequest {
    pub component_list: Vec<String>,
    pub protocol: String,
    #[serde(default)]
    pub manual_review_flag: bool,
}

impl ComponentRequest {
    pub fn from_reply(reply: &str) -> Result<Self> {
        decode(reply, "component request")
    }

    pub fn protocol(&self) -> Option<Protocol> {
        Protocol::normalize(&self.protocol)
    }

    /// At least two named modules and a recognized protocol
    pub fn is_complete(&self) -> bool {
        let named = self
            .component_list
            .iter()
            .filter(|c| !c.trim().is_empty())
            .count();
        named >= 2 && self.protocol().is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Validation step
// ═══════════════════════════════════════════════════════════════════════════════

/// Accepts `"Yes"`, `"no"`, `true`, `false`, `null` and an empty string.
/// Only a yes reads as true.
fn yes_no<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Bool(b)) => b,
        Some(Raw::Text(s)) => crate::step::interpret_yes_no(&s),
        None => false,
    })
}

/// Models write `null` for "not applicable"; read it as the empty value.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedComponent {
    pub component: String,
    #[serde(deserialize_with = "null_as_default", default)]
    pub native_protocols: Vec<String>,
    #[serde(deserialize_with = "yes_no", default)]
    pub compatible_with_selected: bool,
    #[serde(deserialize_with = "yes_no", default)]
    pub needs_adapter: bool,
    #[serde(deserialize_with = "null_as_default", default)]
    pub suggested_adapter: String,
    #[serde(deserialize_with = "null_as_default", default)]
    pub notes: String,
}

impl ValidatedComponent {
    pub fn adapter(&self) -> Option<&str> {
        let adapter = self.suggested_adapter.trim();
        if self.needs_adapter && !adapter.is_empty() {
            Some(adapter)
        } else {
            None
        }
    }
}

/// Result of the validation step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    #[serde(default)]
    pub validated_components: Vec<ValidatedComponent>,
    #[serde(deserialize_with = "null_as_default", default)]
    pub protocol: String,
    #[serde(deserialize_with = "yes_no", default)]
    pub manual_review_flag: bool,
    /// CSV table found beside the JSON, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv_table: Option<String>,
    /// Set when the reply could not be decoded and this is the fallback
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unparsed: bool,
}

impl ValidationReport {
    pub fn from_reply(reply: &str) -> Result<Self> {
        let mut report: Self = decode(reply, "validation report")?;
        report.csv_table = extract_csv_table(reply);
        report.unparsed = false;
        Ok(report)
    }

    /// Fallback used when the model reply is unreadable: nothing passed.
    pub fn incompatible(manual_review_flag: bool) -> Self {
        Self {
            validated_components: Vec::new(),
            protocol: String::new(),
            manual_review_flag,
            csv_table: None,
            unparsed: true,
        }
    }

    /// Every listed component works on the selected bus (directly or via adapter).
    /// An empty or unparsed report is never compatible.
    pub fn all_compatible(&self) -> bool {
        !self.unparsed
            && !self.validated_components.is_empty()
            && self
                .validated_components
                .iter()
                .all(|c| c.compatible_with_selected || c.adapter().is_some())
    }

    pub fn adapters(&self) -> impl Iterator<Item = (&str, &str)> {
        self.validated_components
            .iter()
            .filter_map(|c| c.adapter().map(|a| (c.component.as_str(), a)))
    }

    pub fn protocol(&self) -> Option<Protocol> {
        Protocol::normalize(&self.protocol)
    }
}
