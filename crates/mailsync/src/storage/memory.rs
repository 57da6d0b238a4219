//! In-memory storage implementation
//!
//! Backs tests and local experiments. All maps sit behind `RwLock`s so the
//! store can be shared across threads like the SQLite one.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{AccountRegistry, ContactDirectory, CursorStore, MessageStore, TokenStore};
use crate::models::{AccountStatus, Contact, MailboxAccount, MessageId, MessageRecord};

#[derive(Default)]
pub struct InMemoryStore {
    accounts: RwLock<HashMap<i64, MailboxAccount>>,
    /// Keyed by (account_id, remote_id)
    messages: RwLock<HashMap<(i64, String), MessageRecord>>,
    contacts: RwLock<Vec<Contact>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("In-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("In-memory store lock poisoned"))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_account<F>(&self, id: i64, f: F) -> Result<()>
    where
        F: FnOnce(&mut MailboxAccount),
    {
        let mut accounts = write(&self.accounts)?;
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Account {} not found", id))?;
        f(account);
        Ok(())
    }
}

impl TokenStore for InMemoryStore {
    fn get_account(&self, id: i64) -> Result<Option<MailboxAccount>> {
        Ok(read(&self.accounts)?.get(&id).cloned())
    }

    fn save_token(
        &self,
        id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_account(id, |a| {
            a.access_token = access_token.to_string();
            if let Some(rt) = refresh_token {
                a.refresh_token = Some(rt.to_string());
            }
            a.token_expires_at = expires_at;
            a.status = AccountStatus::Active;
        })
    }

    fn set_status(&self, id: i64, status: AccountStatus) -> Result<()> {
        self.with_account(id, |a| a.status = status)
    }
}

impl CursorStore for InMemoryStore {
    fn update_sync_state(&self, id: i64, history_id: &str, synced_at: DateTime<Utc>) -> Result<()> {
        self.with_account(id, |a| {
            a.history_id = Some(history_id.to_string());
            a.last_synced_at = Some(synced_at);
        })
    }
}

impl MessageStore for InMemoryStore {
    fn existing_ids(&self, account_id: i64, ids: &[MessageId]) -> Result<HashSet<MessageId>> {
        let messages = read(&self.messages)?;
        Ok(ids
            .iter()
            .filter(|id| messages.contains_key(&(account_id, id.0.clone())))
            .cloned()
            .collect())
    }

    fn insert_message(&self, record: &MessageRecord) -> Result<()> {
        let mut messages = write(&self.messages)?;
        let key = (record.account_id, record.remote_id.0.clone());
        if messages.contains_key(&key) {
            anyhow::bail!(
                "Message {} already stored for account {}",
                record.remote_id,
                record.account_id
            );
        }
        messages.insert(key, record.clone());
        Ok(())
    }

    fn list_messages(&self, account_id: i64, limit: usize) -> Result<Vec<MessageRecord>> {
        let messages = read(&self.messages)?;
        let mut result: Vec<MessageRecord> = messages
            .values()
            .filter(|m| m.account_id == account_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        result.truncate(limit);
        Ok(result)
    }

    fn count_messages(&self, account_id: i64) -> Result<usize> {
        let messages = read(&self.messages)?;
        Ok(messages.keys().filter(|(acct, _)| *acct == account_id).count())
    }
}

impl ContactDirectory for InMemoryStore {
    fn contacts_for_organization(&self, organization_id: &str) -> Result<Vec<Contact>> {
        Ok(read(&self.contacts)?
            .iter()
            .filter(|c| c.organization_id == organization_id)
            .cloned()
            .collect())
    }
}

impl AccountRegistry for InMemoryStore {
    fn insert_account(&self, mut account: MailboxAccount) -> Result<MailboxAccount> {
        let mut accounts = write(&self.accounts)?;
        account.id = accounts.keys().max().copied().unwrap_or(0) + 1;
        accounts.insert(account.id, account.clone());
        Ok(account)
    }

    fn list_accounts(&self) -> Result<Vec<MailboxAccount>> {
        let mut accounts: Vec<_> = read(&self.accounts)?.values().cloned().collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    fn insert_contact(&self, mut contact: Contact) -> Result<Contact> {
        let mut contacts = write(&self.contacts)?;
        contact.id = contacts.iter().map(|c| c.id).max().unwrap_or(0) + 1;
        contacts.push(contact.clone());
        Ok(contact)
    }
}
