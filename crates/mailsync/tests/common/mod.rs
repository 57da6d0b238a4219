//! Shared fakes for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};

use mailsync::gmail::api::{
    GmailMessage, Header, HistoryMessageAdded, HistoryRecord, HistoryResponse, MessageBody,
    MessagePart, MessageRef, ProfileResponse,
};
use mailsync::{
    AccountRegistry, AccountStatus, Contact, ContactDirectory, CursorStore, HistoryExpiredError,
    InMemoryStore, MailProviderClient, MailboxAccount, MessageId, MessageRecord, MessageStore,
    ProviderStatusError, SyncEngine, SyncOptions, TokenRefresher, TokenResponse, TokenStore,
};

pub const OWN_ADDRESS: &str = "me@shop.example";
pub const ORG: &str = "org-1";

/// What the history endpoint answers
#[derive(Clone)]
pub enum HistoryReply {
    Records(HistoryResponse),
    Expired,
    Status(u16),
}

/// Scriptable in-memory provider
pub struct FakeProvider {
    messages: Mutex<HashMap<String, GmailMessage>>,
    /// id -> (status, remaining failures; None = always)
    failures: Mutex<HashMap<String, (u16, Option<u32>)>>,
    listing: Mutex<Vec<MessageRef>>,
    list_status: Mutex<Option<u16>>,
    profile_status: Mutex<Option<u16>>,
    list_delay: Mutex<Duration>,
    history: Mutex<HistoryReply>,
    profile_history_id: Mutex<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            listing: Mutex::new(Vec::new()),
            list_status: Mutex::new(None),
            profile_status: Mutex::new(None),
            list_delay: Mutex::new(Duration::ZERO),
            history: Mutex::new(HistoryReply::Records(HistoryResponse::default())),
            profile_history_id: Mutex::new("P1".to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Make a message fetchable and part of the recent listing
    pub fn add_listed(&self, msg: GmailMessage) {
        self.listing
            .lock()
            .unwrap()
            .push(MessageRef::new(msg.id.clone(), msg.thread_id.clone()));
        self.add_fetchable(msg);
    }

    pub fn add_fetchable(&self, msg: GmailMessage) {
        self.messages.lock().unwrap().insert(msg.id.clone(), msg);
    }

    /// List an ID whose fetch always fails with `status`
    pub fn add_listed_failing(&self, id: &str, status: u16) {
        self.listing.lock().unwrap().push(MessageRef::new(id, "t-fail"));
        self.fail_fetch(id, status, None);
    }

    pub fn fail_fetch(&self, id: &str, status: u16, times: Option<u32>) {
        self.failures
            .lock()
            .unwrap()
            .insert(id.to_string(), (status, times));
    }

    pub fn fail_listing(&self, status: u16) {
        *self.list_status.lock().unwrap() = Some(status);
    }

    pub fn fail_profile(&self, status: u16) {
        *self.profile_status.lock().unwrap() = Some(status);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    pub fn set_history(&self, reply: HistoryReply) {
        *self.history.lock().unwrap() = reply;
    }

    pub fn set_profile_history(&self, id: &str) {
        *self.profile_history_id.lock().unwrap() = id.to_string();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fetch_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("get:").map(String::from))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn status_error(status: u16) -> anyhow::Error {
    anyhow::Error::new(ProviderStatusError { status })
}

impl MailProviderClient for FakeProvider {
    fn list_messages(&self, _access_token: &str, max_results: usize) -> Result<Vec<MessageRef>> {
        self.record("list".to_string());
        std::thread::sleep(*self.list_delay.lock().unwrap());
        if let Some(status) = *self.list_status.lock().unwrap() {
            return Err(status_error(status));
        }
        Ok(self
            .listing
            .lock()
            .unwrap()
            .iter()
            .take(max_results)
            .cloned()
            .collect())
    }

    fn list_history(&self, _access_token: &str, start_history_id: &str) -> Result<HistoryResponse> {
        self.record(format!("history:{}", start_history_id));
        match self.history.lock().unwrap().clone() {
            HistoryReply::Records(resp) => Ok(resp),
            HistoryReply::Expired => Err(HistoryExpiredError.into()),
            HistoryReply::Status(status) => Err(status_error(status)),
        }
    }

    fn get_message(&self, _access_token: &str, id: &MessageId) -> Result<GmailMessage> {
        self.record(format!("get:{}", id));
        let mut failures = self.failures.lock().unwrap();
        if let Some((status, remaining)) = failures.get_mut(id.as_str()) {
            match remaining {
                None => return Err(status_error(*status)),
                Some(n) if *n > 0 => {
                    *n -= 1;
                    return Err(status_error(*status));
                }
                Some(_) => {}
            }
        }
        self.messages
            .lock()
            .unwrap()
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| status_error(404))
    }

    fn get_profile(&self, _access_token: &str) -> Result<ProfileResponse> {
        self.record("profile".to_string());
        if let Some(status) = *self.profile_status.lock().unwrap() {
            return Err(status_error(status));
        }
        Ok(ProfileResponse {
            email_address: OWN_ADDRESS.to_string(),
            messages_total: None,
            threads_total: None,
            history_id: self.profile_history_id.lock().unwrap().clone(),
        })
    }
}

/// Refresher that always hands out the same token
pub struct FakeRefresher {
    pub result: Option<TokenResponse>,
    pub calls: Mutex<usize>,
}

impl FakeRefresher {
    pub fn ok(token: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Some(TokenResponse {
                access_token: token.to_string(),
                expires_in: Some(3600),
                refresh_token: None,
            }),
            calls: Mutex::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            result: None,
            calls: Mutex::new(0),
        })
    }
}

impl TokenRefresher for FakeRefresher {
    fn refresh(&self, _refresh_token: &str) -> Result<TokenResponse> {
        *self.calls.lock().unwrap() += 1;
        self.result
            .clone()
            .ok_or_else(|| anyhow::anyhow!("invalid_grant"))
    }
}

pub fn test_options() -> SyncOptions {
    SyncOptions {
        page_size: 50,
        fetch_attempts: 1,
        retry_base_delay: Duration::from_millis(1),
    }
}

/// A store with one active account whose token is valid for an hour
pub fn store_with_account() -> (Arc<InMemoryStore>, MailboxAccount) {
    let store = Arc::new(InMemoryStore::new());
    let account = store
        .insert_account(MailboxAccount::new(
            ORG,
            OWN_ADDRESS,
            "access",
            Some("refresh".to_string()),
            Utc::now() + chrono::Duration::hours(1),
        ))
        .unwrap();
    (store, account)
}

pub fn engine(
    store: Arc<InMemoryStore>,
    provider: Arc<FakeProvider>,
    refresher: Arc<FakeRefresher>,
) -> SyncEngine {
    SyncEngine::with_store(store, provider, refresher, test_options())
}

pub fn b64(text: &str) -> String {
    URL_SAFE_NO_PAD.encode(text)
}

pub fn b64_bytes(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn leaf(mime: &str, text: &str) -> MessagePart {
    MessagePart {
        mime_type: Some(mime.to_string()),
        body: Some(MessageBody {
            data: Some(b64(text)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn multipart(mime: &str, parts: Vec<MessagePart>) -> MessagePart {
    MessagePart {
        mime_type: Some(mime.to_string()),
        parts: Some(parts),
        ..Default::default()
    }
}

/// Full message with the given addressing and body tree
pub fn message(id: &str, from: &str, to: &str, mut payload: MessagePart) -> GmailMessage {
    payload.headers = Some(vec![
        Header {
            name: "From".to_string(),
            value: from.to_string(),
        },
        Header {
            name: "To".to_string(),
            value: to.to_string(),
        },
        Header {
            name: "Subject".to_string(),
            value: format!("Subject of {}", id),
        },
    ]);
    GmailMessage {
        id: id.to_string(),
        thread_id: format!("thread-{}", id),
        label_ids: Some(vec!["INBOX".to_string()]),
        snippet: String::new(),
        internal_date: Some("1700000000000".to_string()),
        history_id: None,
        payload: Some(payload),
    }
}

/// Simple inbound plain-text message
pub fn inbound(id: &str) -> GmailMessage {
    message(
        id,
        "Customer <customer@example.com>",
        OWN_ADDRESS,
        leaf("text/plain", &format!("body of {}", id)),
    )
}

/// History response with one "added" record per ID
pub fn history_adding(ids: &[&str], history_id: &str) -> HistoryResponse {
    HistoryResponse {
        history: Some(
            ids.iter()
                .enumerate()
                .map(|(i, id)| HistoryRecord {
                    id: format!("rec-{}", i),
                    messages_added: Some(vec![HistoryMessageAdded {
                        message: MessageRef::new(*id, format!("thread-{}", id)),
                    }]),
                })
                .collect(),
        ),
        next_page_token: None,
        history_id: Some(history_id.to_string()),
    }
}

/// Store that rejects inserts of chosen remote IDs and delegates the rest
pub struct RejectingStore {
    pub inner: InMemoryStore,
    rejected: HashSet<String>,
}

impl RejectingStore {
    pub fn new(inner: InMemoryStore, rejected: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            inner,
            rejected: rejected.iter().map(|id| id.to_string()).collect(),
        })
    }
}

impl TokenStore for RejectingStore {
    fn get_account(&self, id: i64) -> Result<Option<MailboxAccount>> {
        self.inner.get_account(id)
    }

    fn save_token(
        &self,
        id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner
            .save_token(id, access_token, refresh_token, expires_at)
    }

    fn set_status(&self, id: i64, status: AccountStatus) -> Result<()> {
        self.inner.set_status(id, status)
    }
}

impl CursorStore for RejectingStore {
    fn update_sync_state(&self, id: i64, history_id: &str, synced_at: DateTime<Utc>) -> Result<()> {
        self.inner.update_sync_state(id, history_id, synced_at)
    }
}

impl MessageStore for RejectingStore {
    fn existing_ids(&self, account_id: i64, ids: &[MessageId]) -> Result<HashSet<MessageId>> {
        self.inner.existing_ids(account_id, ids)
    }

    fn insert_message(&self, record: &MessageRecord) -> Result<()> {
        if self.rejected.contains(record.remote_id.as_str()) {
            anyhow::bail!("disk full while inserting {}", record.remote_id);
        }
        self.inner.insert_message(record)
    }

    fn list_messages(&self, account_id: i64, limit: usize) -> Result<Vec<MessageRecord>> {
        self.inner.list_messages(account_id, limit)
    }

    fn count_messages(&self, account_id: i64) -> Result<usize> {
        self.inner.count_messages(account_id)
    }
}

impl ContactDirectory for RejectingStore {
    fn contacts_for_organization(&self, organization_id: &str) -> Result<Vec<Contact>> {
        self.inner.contacts_for_organization(organization_id)
    }
}
