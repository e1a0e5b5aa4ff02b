//! # Key Layout and Member Encoding
//!
//! Producers and the reset worker never talk to each other, so the only thing
//! they share is this layout:
//!
//! - flag: field `<field>` of the mapping named `<namespace>`
//! - due index: one sorted set, member `<namespace>|<field>`, score = due epoch seconds
//! - token: `<token_prefix><namespace>|<field>`, value = due epoch seconds as text

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AlarmError, AlarmResult};

/// Joins namespace and field in a member string.
pub const MEMBER_SEPARATOR: char = '|';

pub const DEFAULT_DUE_INDEX: &str = "alarm:pulse_due";
pub const DEFAULT_TOKEN_PREFIX: &str = "alarm:pulse_token:";

/// Duration used by `pulse_default`.
pub const DEFAULT_PULSE_SECS: f64 = 22.0;

/// Two due timestamps closer than this are the same pulse.
pub const DUE_TOLERANCE_SECS: f64 = 0.001;

/// One alarm: a (namespace, field) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Member {
    namespace: String,
    field: String,
}

impl Member {
    /// Builds a member for writing. Rejects parts that would make the encoding
    /// ambiguous.
    pub fn new(namespace: impl Into<String>, field: impl Into<String>) -> AlarmResult<Self> {
        let namespace = namespace.into();
        let field = field.into();

        let bad = |s: &str| s.is_empty() || s.contains(MEMBER_SEPARATOR);
        if bad(&namespace) || bad(&field) {
            return Err(AlarmError::InvalidMember {
                namespace,
                field,
                separator: MEMBER_SEPARATOR,
            });
        }

        Ok(Self { namespace, field })
    }

    /// Decodes a due-index member. Splits on the first separator only; `None`
    /// means there is no separator at all.
    pub fn parse(encoded: &str) -> Option<Self> {
        let (namespace, field) = encoded.split_once(MEMBER_SEPARATOR)?;
        Some(Self {
            namespace: namespace.to_string(),
            field: field.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn encode(&self) -> String {
        format!("{}{}{}", self.namespace, MEMBER_SEPARATOR, self.field)
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// # Alarm Keys
///
/// Names of the shared structures. Every producer and every worker of one
/// deployment must use the same values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmKeys {
    /// Name of the sorted due index.
    pub due_index: String,
    /// Prefix prepended to the encoded member to form the token key.
    pub token_prefix: String,
}

impl Default for AlarmKeys {
    fn default() -> Self {
        Self {
            due_index: DEFAULT_DUE_INDEX.to_string(),
            token_prefix: DEFAULT_TOKEN_PREFIX.to_string(),
        }
    }
}

impl AlarmKeys {
    pub fn new(due_index: impl Into<String>, token_prefix: impl Into<String>) -> Self {
        Self {
            due_index: due_index.into(),
            token_prefix: token_prefix.into(),
        }
    }

    pub fn token_key(&self, member: &Member) -> String {
        format!("{}{}", self.token_prefix, member)
    }
}

/// Text form of a due timestamp as stored in a token.
pub fn encode_due(due: f64) -> String {
    due.to_string()
}

/// Parses a token value. Anything that is not a finite number is `None`.
pub fn decode_due(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn same_due(a: f64, b: f64) -> bool {
    (a - b).abs() < DUE_TOLERANCE_SECS
}
