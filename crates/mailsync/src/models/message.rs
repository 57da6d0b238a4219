//! Message records ingested from the provider

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider message ID (unique per account)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider thread ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An email address with optional display name
///
/// The address part is always stored lower-cased and trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmailAddress {
    pub name: Option<String>,
    pub email: String,
}

impl EmailAddress {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into().trim().to_lowercase(),
        }
    }

    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into().trim().to_lowercase(),
        }
    }

    /// Parse `Name <addr@example.com>` or a bare `addr@example.com`
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let name = s[..angle_start].trim().trim_matches('"').trim();
            return Self {
                name: (!name.is_empty()).then(|| name.to_string()),
                email: s[angle_start + 1..angle_end].trim().to_lowercase(),
            };
        }

        Self::new(s)
    }

    /// Parse a header holding several comma-separated addresses.
    ///
    /// Commas inside quoted display names do not split.
    pub fn parse_list(s: &str) -> Vec<Self> {
        let mut out = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;

        for c in s.chars() {
            match c {
                '"' => {
                    in_quotes = !in_quotes;
                    current.push(c);
                }
                ',' if !in_quotes => {
                    if !current.trim().is_empty() {
                        out.push(Self::parse(&current));
                    }
                    current.clear();
                }
                _ => current.push(c),
            }
        }
        if !current.trim().is_empty() {
            out.push(Self::parse(&current));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.email.is_empty()
    }
}

/// Message direction relative to the synced mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(Direction::Inbound),
            "outbound" => Some(Direction::Outbound),
            _ => None,
        }
    }
}

/// Normalized message row, written once and never mutated afterwards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub account_id: i64,
    pub remote_id: MessageId,
    pub thread_id: ThreadId,
    pub direction: Direction,
    pub from: EmailAddress,
    pub to: EmailAddress,
    pub subject: String,
    /// Decoded body (HTML preferred over plain text)
    pub body: String,
    pub label_ids: Vec<String>,
    /// Matched contact in the owning organization's directory
    pub contact_id: Option<i64>,
    /// Provider timestamp
    pub received_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
}

impl MessageRecord {
    /// The address on the other side of the conversation
    pub fn counterpart(&self) -> &EmailAddress {
        match self.direction {
            Direction::Inbound => &self.from,
            Direction::Outbound => &self.to,
        }
    }

    /// The synced mailbox's side of the conversation
    pub fn own_address(&self) -> &EmailAddress {
        match self.direction {
            Direction::Inbound => &self.to,
            Direction::Outbound => &self.from,
        }
    }
}
