//! Storage trait definitions

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::models::{AccountStatus, Contact, MailboxAccount, MessageId, MessageRecord};

/// Account credentials and status
///
/// Every write is durable once it returns `Ok`.
pub trait TokenStore: Send + Sync {
    fn get_account(&self, id: i64) -> Result<Option<MailboxAccount>>;

    /// Persist a refreshed access token and mark the account active.
    /// `refresh_token` is only written when the provider rotated it.
    fn save_token(
        &self,
        id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    fn set_status(&self, id: i64, status: AccountStatus) -> Result<()>;
}

/// Per-account history position
pub trait CursorStore: Send + Sync {
    /// Store the new history position and the time of the sync
    fn update_sync_state(&self, id: i64, history_id: &str, synced_at: DateTime<Utc>) -> Result<()>;
}

/// Ingested message records
pub trait MessageStore: Send + Sync {
    /// Which of `ids` are already stored for the account, in one lookup
    fn existing_ids(&self, account_id: i64, ids: &[MessageId]) -> Result<HashSet<MessageId>>;

    /// Insert a new record; fails if the remote ID is already stored
    fn insert_message(&self, record: &MessageRecord) -> Result<()>;

    /// Records for an account, newest first
    fn list_messages(&self, account_id: i64, limit: usize) -> Result<Vec<MessageRecord>>;

    fn count_messages(&self, account_id: i64) -> Result<usize>;
}

/// Read-only view of an organization's contacts
pub trait ContactDirectory: Send + Sync {
    fn contacts_for_organization(&self, organization_id: &str) -> Result<Vec<Contact>>;
}

/// Account and contact creation (used by the CLI and tests; the hosted
/// application owns these rows in production)
pub trait AccountRegistry: Send + Sync {
    /// Insert an account, returning it with its assigned ID
    fn insert_account(&self, account: MailboxAccount) -> Result<MailboxAccount>;

    fn list_accounts(&self) -> Result<Vec<MailboxAccount>>;

    /// Insert a contact, returning it with its assigned ID
    fn insert_contact(&self, contact: Contact) -> Result<Contact>;
}
