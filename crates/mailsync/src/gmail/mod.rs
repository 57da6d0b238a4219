//! Gmail API integration
//!
//! This module provides:
//! - The provider seam ([`MailProviderClient`]) and its Gmail implementation
//! - OAuth2 token refresh and the per-account token manager
//! - MIME decoding of full message payloads

mod auth;
mod client;
pub mod mime;

use anyhow::Result;

pub use auth::{OAuthClient, TOKEN_EXPIRY_SKEW_SECS, TokenManager, TokenRefresher, TokenResponse};
pub use client::GmailClient;
pub use mime::{DecodeWarning, DecodedMessage, Part, decode_message};

use crate::models::MessageId;
use api::{GmailMessage, HistoryResponse, MessageRef, ProfileResponse};

/// Error indicating the stored history position is no longer known
/// to the provider
#[derive(Debug, thiserror::Error)]
#[error("History ID expired or invalid")]
pub struct HistoryExpiredError;

/// Non-success HTTP status from a provider call
#[derive(Debug, thiserror::Error)]
#[error("Provider returned HTTP {status}")]
pub struct ProviderStatusError {
    pub status: u16,
}

impl ProviderStatusError {
    /// Server-side or rate-limit failures that may succeed on retry
    pub fn is_transient(&self) -> bool {
        self.status == 429 || self.status >= 500
    }
}

/// Remote mailbox operations needed by the sync engine
///
/// Every method is a blocking network call.
pub trait MailProviderClient: Send + Sync {
    /// List the most recent message stubs, newest first
    fn list_messages(&self, access_token: &str, max_results: usize) -> Result<Vec<MessageRef>>;

    /// All change records since `start_history_id`, across every page
    ///
    /// # Errors
    /// Returns [`HistoryExpiredError`] when the provider no longer knows the
    /// position.
    fn list_history(&self, access_token: &str, start_history_id: &str) -> Result<HistoryResponse>;

    /// Full message (headers and body tree)
    fn get_message(&self, access_token: &str, id: &MessageId) -> Result<GmailMessage>;

    /// Mailbox profile, including the current history position
    fn get_profile(&self, access_token: &str) -> Result<ProfileResponse>;
}

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Response from listing messages
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        #[serde(default)]
        pub thread_id: String,
    }

    impl MessageRef {
        pub fn new(id: impl Into<String>, thread_id: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                thread_id: thread_id.into(),
            }
        }
    }

    /// Full message from Gmail API
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        #[serde(default)]
        pub thread_id: String,
        pub label_ids: Option<Vec<String>>,
        #[serde(default)]
        pub snippet: String,
        /// Milliseconds since epoch, as a string
        pub internal_date: Option<String>,
        pub history_id: Option<String>,
        pub payload: Option<MessagePart>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Clone, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Message body (URL-safe base64 data)
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageBody {
        pub size: Option<u32>,
        pub data: Option<String>,
        pub attachment_id: Option<String>,
    }

    /// A node of the body tree; the top-level payload uses the same shape
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub part_id: Option<String>,
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    /// Response from the history endpoint
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub next_page_token: Option<String>,
        /// Current mailbox position at the time of the call
        pub history_id: Option<String>,
    }

    /// One change record
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub id: String,
        pub messages_added: Option<Vec<HistoryMessageAdded>>,
    }

    #[derive(Debug, Clone, Deserialize, Serialize)]
    pub struct HistoryMessageAdded {
        pub message: MessageRef,
    }

    /// Response from `users/me/profile`
    #[derive(Debug, Clone, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ProfileResponse {
        pub email_address: String,
        pub messages_total: Option<u64>,
        pub threads_total: Option<u64>,
        pub history_id: String,
    }

    impl HistoryResponse {
        /// Message IDs from every "added" event, in provider order,
        /// duplicates included
        pub fn added_message_ids(&self) -> Vec<String> {
            self.history
                .iter()
                .flatten()
                .flat_map(|record| record.messages_added.iter().flatten())
                .map(|added| added.message.id.clone())
                .collect()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_history_added_ids_keep_order_and_duplicates() {
            let json = r#"{
                "history": [
                    { "id": "1", "messagesAdded": [ { "message": { "id": "m3", "threadId": "t3" } } ] },
                    { "id": "2" },
                    { "id": "3", "messagesAdded": [
                        { "message": { "id": "m4", "threadId": "t4" } },
                        { "message": { "id": "m3", "threadId": "t3" } }
                    ] }
                ],
                "historyId": "900"
            }"#;

            let history: HistoryResponse = serde_json::from_str(json).unwrap();
            assert_eq!(history.added_message_ids(), vec!["m3", "m4", "m3"]);
            assert_eq!(history.history_id.as_deref(), Some("900"));
        }

        #[test]
        fn test_empty_history_has_no_ids() {
            let history: HistoryResponse = serde_json::from_str(r#"{ "historyId": "5" }"#).unwrap();
            assert!(history.added_message_ids().is_empty());
        }

        #[test]
        fn test_profile_parse() {
            let json = r#"{ "emailAddress": "me@example.com", "messagesTotal": 10, "historyId": "1234" }"#;
            let profile: ProfileResponse = serde_json::from_str(json).unwrap();
            assert_eq!(profile.history_id, "1234");
            assert_eq!(profile.threads_total, None);
        }
    }
}
