//! Sync orchestration
//!
//! Strategy per run:
//! - no stored history position: list the most recent `page_size` messages
//! - stored position: replay "message added" history since that position
//! - stored position the provider no longer knows: fall back to listing the
//!   most recent messages, as on first sync
//!
//! The new position is written only after every candidate has been
//! processed, so an interrupted run replays the same delta next time.

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use super::dedup::{dedupe_ids, filter_new};
use super::lock::SyncLocks;
use super::matcher::ContactMatcher;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::gmail::{
    DecodeWarning, DecodedMessage, HistoryExpiredError, MailProviderClient, ProviderStatusError,
    TokenManager, TokenRefresher, decode_message, api::GmailMessage,
};
use crate::models::{Direction, EmailAddress, MailboxAccount, MessageId, MessageRecord};
use crate::storage::{ContactDirectory, CursorStore, MessageStore, TokenStore};

/// Tunables for a sync run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Messages listed on first sync and on a forced resync
    pub page_size: usize,
    /// Attempts per message fetch (at least one)
    pub fetch_attempts: u32,
    /// Delay before the second attempt; doubles after each failure
    pub retry_base_delay: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: 50,
            fetch_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            page_size: cfg.effective_page_size(),
            fetch_attempts: cfg.fetch_attempts.max(1),
            ..Self::default()
        }
    }
}

/// How candidate IDs were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Account had never been synced
    Initial,
    /// Delta since the stored history position
    Incremental,
    /// Stored position had expired on the provider side
    FullResync,
}

/// Body-decode warning attached to the message it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageWarning {
    pub message_id: MessageId,
    #[serde(flatten)]
    pub warning: DecodeWarning,
}

/// Outcome of one run
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub account_id: i64,
    pub strategy: SyncStrategy,
    /// New records stored
    pub synced: usize,
    /// Candidates that could not be fetched or stored
    pub errors: usize,
    /// Candidates that needed a full fetch (after dedup)
    pub total: usize,
    pub failed_ids: Vec<MessageId>,
    pub warnings: Vec<MessageWarning>,
    /// Position stored at the end of the run
    pub history_id: String,
    pub duration_ms: u64,
}

/// Candidate IDs for a run plus the position to store afterwards
struct Plan {
    strategy: SyncStrategy,
    candidates: Vec<MessageId>,
    next_history_id: String,
}

/// Drives token upkeep, candidate discovery, fetch, decode and persistence
pub struct SyncEngine {
    tokens: TokenManager,
    accounts: Arc<dyn TokenStore>,
    cursors: Arc<dyn CursorStore>,
    messages: Arc<dyn MessageStore>,
    contacts: Arc<dyn ContactDirectory>,
    provider: Arc<dyn MailProviderClient>,
    locks: SyncLocks,
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(
        accounts: Arc<dyn TokenStore>,
        cursors: Arc<dyn CursorStore>,
        messages: Arc<dyn MessageStore>,
        contacts: Arc<dyn ContactDirectory>,
        provider: Arc<dyn MailProviderClient>,
        refresher: Arc<dyn TokenRefresher>,
        options: SyncOptions,
    ) -> Self {
        Self {
            tokens: TokenManager::new(refresher, accounts.clone()),
            accounts,
            cursors,
            messages,
            contacts,
            provider,
            locks: SyncLocks::new(),
            options,
        }
    }

    /// Build an engine whose storage traits are all served by one store
    pub fn with_store<S>(
        store: Arc<S>,
        provider: Arc<dyn MailProviderClient>,
        refresher: Arc<dyn TokenRefresher>,
        options: SyncOptions,
    ) -> Self
    where
        S: TokenStore + CursorStore + MessageStore + ContactDirectory + 'static,
    {
        Self::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            provider,
            refresher,
            options,
        )
    }

    /// Load an account, checking ownership when a caller organization is given
    pub fn account(
        &self,
        account_id: i64,
        caller_org: Option<&str>,
    ) -> Result<MailboxAccount, SyncError> {
        let account = self
            .accounts
            .get_account(account_id)
            .map_err(SyncError::Storage)?
            .ok_or(SyncError::AccountNotFound(account_id))?;

        if let Some(org) = caller_org
            && org != account.organization_id
        {
            return Err(SyncError::Forbidden);
        }
        Ok(account)
    }

    /// Whether a run for the account is in progress
    pub fn is_syncing(&self, account_id: i64) -> bool {
        self.locks.is_locked(account_id)
    }

    /// Run one sync for `account_id`
    ///
    /// Unknown and foreign accounts are rejected right away. Otherwise blocks
    /// while another run for the same account is in progress.
    pub fn sync_account(
        &self,
        account_id: i64,
        caller_org: Option<&str>,
    ) -> Result<SyncSummary, SyncError> {
        let start = std::time::Instant::now();
        self.account(account_id, caller_org)?;

        let lock = self.locks.lock_for(account_id);
        let result = {
            // A panicked earlier run leaves nothing half-written in the lock itself
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.run_locked(account_id, caller_org, start)
        };
        self.locks.release(account_id, lock);
        result
    }

    /// Body of a run; the caller holds the account's lock
    fn run_locked(
        &self,
        account_id: i64,
        caller_org: Option<&str>,
        start: std::time::Instant,
    ) -> Result<SyncSummary, SyncError> {
        // Reloaded under the lock: a run that just finished may have moved the cursor
        let mut account = self.account(account_id, caller_org)?;
        let access_token = self.tokens.ensure_valid_token(&mut account)?;

        let plan = self.plan(&account, &access_token)?;
        log::info!(
            "Syncing account {} ({:?}, {} candidates)",
            account.id,
            plan.strategy,
            plan.candidates.len()
        );

        let to_fetch = filter_new(self.messages.as_ref(), account.id, plan.candidates)
            .map_err(SyncError::Storage)?;
        let matcher = ContactMatcher::load(self.contacts.as_ref(), &account.organization_id)
            .map_err(SyncError::Storage)?;

        let mut summary = SyncSummary {
            account_id: account.id,
            strategy: plan.strategy,
            synced: 0,
            errors: 0,
            total: to_fetch.len(),
            failed_ids: Vec::new(),
            warnings: Vec::new(),
            history_id: plan.next_history_id,
            duration_ms: 0,
        };

        for id in to_fetch {
            match self.ingest(&account, &access_token, &matcher, &id) {
                Ok(warnings) => {
                    summary.synced += 1;
                    summary.warnings.extend(warnings.into_iter().map(|warning| MessageWarning {
                        message_id: id.clone(),
                        warning,
                    }));
                }
                Err(e) => {
                    log::warn!("Failed to ingest message {}: {:#}", id, e);
                    summary.errors += 1;
                    summary.failed_ids.push(id);
                }
            }
        }

        self.cursors
            .update_sync_state(account.id, &summary.history_id, Utc::now())
            .map_err(SyncError::Storage)?;

        summary.duration_ms = start.elapsed().as_millis() as u64;
        log::info!(
            "Synced account {}: {} stored, {} errors, {} total in {}ms",
            account.id,
            summary.synced,
            summary.errors,
            summary.total,
            summary.duration_ms
        );
        Ok(summary)
    }

    /// Decide the strategy and collect deduplicated candidate IDs
    fn plan(&self, account: &MailboxAccount, access_token: &str) -> Result<Plan, SyncError> {
        let Some(history_id) = account.history_id.as_deref() else {
            return self.recent_messages(access_token, SyncStrategy::Initial);
        };

        match self.provider.list_history(access_token, history_id) {
            Ok(history) => Ok(Plan {
                strategy: SyncStrategy::Incremental,
                candidates: dedupe_ids(history.added_message_ids().into_iter().map(MessageId::new)),
                // An empty delta may omit the position; keep the stored one
                next_history_id: history.history_id.unwrap_or_else(|| history_id.to_string()),
            }),
            Err(e) if e.downcast_ref::<HistoryExpiredError>().is_some() => {
                log::warn!(
                    "History {} expired for account {}, falling back to full resync",
                    history_id,
                    account.id
                );
                self.recent_messages(access_token, SyncStrategy::FullResync)
            }
            Err(e) => Err(SyncError::Provider(e.context("Failed to list history"))),
        }
    }

    /// Most recent messages plus the current position
    ///
    /// The position is read before listing: anything arriving in between
    /// shows up again in the next delta and is dropped by dedup.
    fn recent_messages(&self, access_token: &str, strategy: SyncStrategy) -> Result<Plan, SyncError> {
        let profile = self
            .provider
            .get_profile(access_token)
            .map_err(|e| SyncError::Provider(e.context("Failed to fetch profile")))?;

        let refs = self
            .provider
            .list_messages(access_token, self.options.page_size)
            .map_err(|e| SyncError::Provider(e.context("Failed to list messages")))?;

        Ok(Plan {
            strategy,
            candidates: dedupe_ids(refs.into_iter().map(|r| MessageId::new(r.id))),
            next_history_id: profile.history_id,
        })
    }

    /// Fetch, decode, match and store one message
    fn ingest(
        &self,
        account: &MailboxAccount,
        access_token: &str,
        matcher: &ContactMatcher,
        id: &MessageId,
    ) -> anyhow::Result<Vec<DecodeWarning>> {
        let raw = self.fetch_with_retry(access_token, id)?;
        let decoded = decode_message(&raw);
        for warning in &decoded.warnings {
            log::debug!("Message {}: {:?}", id, warning);
        }

        let (record, warnings) = build_record(account, decoded, matcher);
        self.messages.insert_message(&record)?;
        Ok(warnings)
    }

    /// Fetch with exponential backoff on transient failures
    fn fetch_with_retry(&self, access_token: &str, id: &MessageId) -> anyhow::Result<GmailMessage> {
        let attempts = self.options.fetch_attempts.max(1);
        let mut delay = self.options.retry_base_delay;
        let mut attempt = 1;

        loop {
            match self.provider.get_message(access_token, id) {
                Ok(msg) => return Ok(msg),
                Err(e) => {
                    let permanent = e
                        .downcast_ref::<ProviderStatusError>()
                        .is_some_and(|s| !s.is_transient());
                    if permanent || attempt >= attempts {
                        return Err(e);
                    }
                    log::debug!("Fetch of {} failed (attempt {}): {:#}", id, attempt, e);
                    std::thread::sleep(delay + Duration::from_millis(rand_jitter()));
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }
}

/// Turn a decoded message into the stored record
///
/// Inbound iff the account's own address is any of the To recipients, not
/// only the first one. The stored `to` is then the account's address; for
/// outbound mail it is the first recipient.
fn build_record(
    account: &MailboxAccount,
    decoded: DecodedMessage,
    matcher: &ContactMatcher,
) -> (MessageRecord, Vec<DecodeWarning>) {
    let own = decoded.to.iter().find(|addr| account.is_own_address(&addr.email));

    let (direction, to) = match own {
        Some(addr) => (Direction::Inbound, addr.clone()),
        None => (
            Direction::Outbound,
            decoded.to.first().cloned().unwrap_or_else(EmailAddress::default),
        ),
    };

    let counterpart = match direction {
        Direction::Inbound => &decoded.from.email,
        Direction::Outbound => &to.email,
    };
    let contact_id = matcher.match_contact(counterpart);

    let record = MessageRecord {
        account_id: account.id,
        remote_id: decoded.remote_id,
        thread_id: decoded.thread_id,
        direction,
        from: decoded.from,
        to,
        subject: decoded.subject,
        body: decoded.body,
        label_ids: decoded.label_ids,
        contact_id,
        received_at: decoded.received_at,
        ingested_at: Utc::now(),
    };
    (record, decoded.warnings)
}

/// Random jitter in 0..100ms
fn rand_jitter() -> u64 {
    rand::thread_rng().gen_range(0..100)
}
