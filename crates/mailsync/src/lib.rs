//! Mailbox sync engine
//!
//! Mirrors a connected mailbox into the application's own store:
//! - Domain models (MailboxAccount, MessageRecord, Contact)
//! - Gmail API client, OAuth token refresh and MIME decoding
//! - Storage traits with in-memory and SQLite backends
//! - Idempotent, per-account serialized sync engine
//! - HTTP trigger endpoint (`POST /sync/{accountId}`)

pub mod config;
pub mod error;
pub mod gmail;
pub mod models;
pub mod server;
pub mod storage;
pub mod sync;

pub use config::SyncConfig;
pub use error::SyncError;
pub use gmail::{
    DecodeWarning, GmailClient, HistoryExpiredError, MailProviderClient, OAuthClient,
    ProviderStatusError, TokenManager, TokenRefresher, TokenResponse,
};
pub use models::{
    AccountStatus, Contact, Direction, EmailAddress, MailboxAccount, MessageId, MessageRecord,
    ThreadId,
};
pub use server::SyncServer;
pub use storage::{
    AccountRegistry, ContactDirectory, CursorStore, InMemoryStore, MessageStore, SqliteStore,
    TokenStore,
};
pub use sync::{SyncEngine, SyncOptions, SyncStrategy, SyncSummary};
