//! Gmail API HTTP client
//!
//! Uses synchronous HTTP (ureq) so a sync run stays a plain blocking call.

use anyhow::{Context, Result};
use std::time::Duration;

use super::api::{GmailMessage, HistoryResponse, ListMessagesResponse, MessageRef, ProfileResponse};
use super::{HistoryExpiredError, MailProviderClient, ProviderStatusError};
use crate::models::MessageId;

/// Gmail REST client; the bearer token is supplied per call
pub struct GmailClient {
    agent: ureq::Agent,
    base_url: String,
}

impl GmailClient {
    /// Gmail API base URL
    pub const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Provider cap on `maxResults`
    const MAX_PAGE_SIZE: usize = 500;

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
        what: &str,
    ) -> Result<T> {
        let mut response = self
            .agent
            .get(url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .call()
            .map_err(|e| request_error(e, what))?;

        response
            .body_mut()
            .read_json()
            .with_context(|| format!("Failed to parse {} response", what))
    }

    fn history_page(
        &self,
        access_token: &str,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryResponse> {
        let mut url = format!(
            "{}/users/me/history?startHistoryId={}&historyTypes=messageAdded",
            self.base_url,
            urlencoding::encode(start_history_id)
        );

        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let response = self
            .agent
            .get(&url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .call();

        match response {
            Ok(mut resp) => resp
                .body_mut()
                .read_json()
                .context("Failed to parse history response"),
            // History ID expired or invalid
            Err(ureq::Error::StatusCode(404)) => Err(HistoryExpiredError.into()),
            Err(e) => Err(request_error(e, "history")),
        }
    }
}

impl MailProviderClient for GmailClient {
    fn list_messages(&self, access_token: &str, max_results: usize) -> Result<Vec<MessageRef>> {
        let url = format!(
            "{}/users/me/messages?maxResults={}",
            self.base_url,
            max_results.clamp(1, Self::MAX_PAGE_SIZE)
        );

        let list: ListMessagesResponse = self.get_json(&url, access_token, "list messages")?;
        Ok(list.messages.unwrap_or_default())
    }

    fn list_history(&self, access_token: &str, start_history_id: &str) -> Result<HistoryResponse> {
        let mut all_records = Vec::new();
        let mut final_history_id = None;
        let mut page_token: Option<String> = None;

        loop {
            let response = self.history_page(access_token, start_history_id, page_token.as_deref())?;

            if let Some(records) = response.history {
                all_records.extend(records);
            }
            if response.history_id.is_some() {
                final_history_id = response.history_id;
            }

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(HistoryResponse {
            history: (!all_records.is_empty()).then_some(all_records),
            next_page_token: None,
            history_id: final_history_id,
        })
    }

    fn get_message(&self, access_token: &str, id: &MessageId) -> Result<GmailMessage> {
        let url = format!(
            "{}/users/me/messages/{}?format=full",
            self.base_url,
            urlencoding::encode(id.as_str())
        );
        self.get_json(&url, access_token, "get message")
    }

    fn get_profile(&self, access_token: &str) -> Result<ProfileResponse> {
        let url = format!("{}/users/me/profile", self.base_url);
        self.get_json(&url, access_token, "profile")
    }
}

/// Turn a ureq failure into an error the sync engine can classify
fn request_error(err: ureq::Error, what: &str) -> anyhow::Error {
    match err {
        ureq::Error::StatusCode(status) => anyhow::Error::new(ProviderStatusError { status })
            .context(format!("Failed to send {} request", what)),
        other => anyhow::Error::new(other).context(format!("Failed to send {} request", what)),
    }
}
