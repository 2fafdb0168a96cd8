//! Line-oriented wire records.
//!
//! Every record is one ASCII line with `|` separated fields:
//!
//! ```text
//! K_DOWN|<ordinal>
//! K_UP|<ordinal>
//! L_STICK|<x>|<y>
//! R_STICK|<x>|<y>
//! ```
//!
//! Stick components carry three decimals. Several records may travel in one
//! write.

use std::fmt;
use std::str::FromStr;

use crate::controller::profile::{JoystickType, LogicalKey};
use crate::controller::vector::StickSample;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WireMessage {
    Key { key: LogicalKey, pressed: bool },
    Stick { stick: JoystickType, value: StickSample },
}

impl WireMessage {
    pub fn key(key: LogicalKey, pressed: bool) -> Self {
        WireMessage::Key { key, pressed }
    }

    pub fn stick(stick: JoystickType, value: StickSample) -> Self {
        WireMessage::Stick { stick, value }
    }

    /// Renders the record including its trailing newline.
    pub fn encode(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireMessage::Key { key, pressed } => {
                let tag = if *pressed { "K_DOWN" } else { "K_UP" };
                write!(f, "{}|{}", tag, key.ordinal())
            }
            WireMessage::Stick { stick, value } => {
                let tag = match stick {
                    JoystickType::Left => "L_STICK",
                    JoystickType::Right => "R_STICK",
                };
                write!(f, "{}|{:.3}|{:.3}", tag, value.x, value.y)
            }
        }
    }
}

/// Concatenates records into a single outbound message.
pub fn encode_batch<'a, I>(messages: I) -> String
where
    I: IntoIterator<Item = &'a WireMessage>,
{
    messages.into_iter().map(WireMessage::encode).collect()
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unknown record tag: {0}")]
    UnknownTag(String),

    #[error("Record {tag} expects {expected} fields, got {got}")]
    FieldCount {
        tag: String,
        expected: usize,
        got: usize,
    },

    #[error("Invalid key ordinal: {0}")]
    InvalidOrdinal(String),

    #[error("Invalid stick component: {0}")]
    InvalidComponent(String),
}

impl FromStr for WireMessage {
    type Err = DecodeError;

    /// Parses one record, with or without its newline.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        let parts: Vec<&str> = line.split('|').collect();
        let tag = parts.first().copied().unwrap_or_default();

        let field_count = |expected: usize| {
            if parts.len() == expected {
                Ok(())
            } else {
                Err(DecodeError::FieldCount {
                    tag: tag.to_string(),
                    expected,
                    got: parts.len(),
                })
            }
        };

        match tag {
            "K_DOWN" | "K_UP" => {
                field_count(2)?;
                let raw = parts[1];
                let key = raw
                    .parse::<u8>()
                    .ok()
                    .and_then(LogicalKey::from_ordinal)
                    .ok_or_else(|| DecodeError::InvalidOrdinal(raw.to_string()))?;
                Ok(WireMessage::key(key, tag == "K_DOWN"))
            }
            "L_STICK" | "R_STICK" => {
                field_count(3)?;
                let component = |raw: &str| {
                    raw.parse::<f32>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .ok_or_else(|| DecodeError::InvalidComponent(raw.to_string()))
                };
                let stick = if tag == "L_STICK" {
                    JoystickType::Left
                } else {
                    JoystickType::Right
                };
                Ok(WireMessage::stick(
                    stick,
                    StickSample::new(component(parts[1])?, component(parts[2])?),
                ))
            }
            other => Err(DecodeError::UnknownTag(other.to_string())),
        }
    }
}
