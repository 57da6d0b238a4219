//! Mailbox account model: credentials plus sync cursor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether the account can currently be synced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    /// Token refresh failed or no refresh token was stored at expiry.
    /// Only a user reconnecting the account clears this.
    Expired,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "expired" => Ok(AccountStatus::Expired),
            other => anyhow::bail!("Unknown account status: {}", other),
        }
    }
}

/// A connected mailbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailboxAccount {
    /// Database primary key
    pub id: i64,
    /// Organization that owns the account
    pub organization_id: String,
    /// The mailbox's own address, lower-cased
    pub email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: DateTime<Utc>,
    /// Provider history position; `None` means the account was never synced
    pub history_id: Option<String>,
    pub status: AccountStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl MailboxAccount {
    /// Create an account as it looks right after the OAuth handshake
    /// (id will be assigned by the store)
    pub fn new(
        organization_id: impl Into<String>,
        email: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        token_expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            organization_id: organization_id.into(),
            email: email.into().trim().to_lowercase(),
            access_token: access_token.into(),
            refresh_token,
            token_expires_at,
            history_id: None,
            status: AccountStatus::Active,
            last_synced_at: None,
        }
    }

    /// True once a history position has been stored
    pub fn has_history(&self) -> bool {
        self.history_id.is_some()
    }

    /// Whether this account's own address is `address` (case-insensitive)
    pub fn is_own_address(&self, address: &str) -> bool {
        self.email.eq_ignore_ascii_case(address.trim())
    }
}
