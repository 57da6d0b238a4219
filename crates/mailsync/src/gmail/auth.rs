//! OAuth2 access-token upkeep
//!
//! [`TokenManager`] hands out a usable access token for an account,
//! refreshing it through a [`TokenRefresher`] when it is about to expire and
//! persisting every change of token or status immediately.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::SyncError;
use crate::models::{AccountStatus, MailboxAccount};
use crate::storage::TokenStore;

/// Tokens expiring within this many seconds are refreshed first
pub const TOKEN_EXPIRY_SKEW_SECS: i64 = 60;

/// TTL assumed when the provider omits `expires_in`
const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Longest TTL accepted from the provider (30 days)
const MAX_TOKEN_TTL_SECS: u64 = 30 * 24 * 3600;

/// Token response from the OAuth token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: Option<u64>,
    /// Present only when the provider rotates the refresh token
    pub refresh_token: Option<String>,
}

/// Exchanges a refresh token for a new access token
pub trait TokenRefresher: Send + Sync {
    fn refresh(&self, refresh_token: &str) -> Result<TokenResponse>;
}

/// Refresh-token grant against an OAuth2 token endpoint
pub struct OAuthClient {
    agent: ureq::Agent,
    client_id: String,
    client_secret: String,
    token_url: String,
}

impl OAuthClient {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Self {
            agent,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: token_url.into(),
        }
    }
}

impl TokenRefresher for OAuthClient {
    fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let mut response = self
            .agent
            .post(&self.token_url)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse refresh token response")
    }
}

/// Keeps an account's access token valid
pub struct TokenManager {
    refresher: Arc<dyn TokenRefresher>,
    store: Arc<dyn TokenStore>,
}

impl TokenManager {
    pub fn new(refresher: Arc<dyn TokenRefresher>, store: Arc<dyn TokenStore>) -> Self {
        Self { refresher, store }
    }

    /// Return a usable access token, refreshing if it expires within
    /// [`TOKEN_EXPIRY_SKEW_SECS`]
    ///
    /// `account` is updated in place to mirror what was persisted.
    pub fn ensure_valid_token(&self, account: &mut MailboxAccount) -> Result<String, SyncError> {
        if account.status == AccountStatus::Expired {
            return Err(SyncError::ReauthRequired);
        }

        let now = Utc::now();
        if account.token_expires_at > now + Duration::seconds(TOKEN_EXPIRY_SKEW_SECS) {
            return Ok(account.access_token.clone());
        }

        let Some(refresh_token) = account.refresh_token.clone() else {
            log::warn!("Account {} has no refresh token, marking expired", account.id);
            self.mark_expired(account)?;
            return Err(SyncError::ReauthRequired);
        };

        let token = match self.refresher.refresh(&refresh_token) {
            Ok(token) => token,
            Err(e) => {
                log::warn!("Token refresh failed for account {}: {:#}", account.id, e);
                self.mark_expired(account)?;
                return Err(SyncError::RefreshFailed(format!("{:#}", e)));
            }
        };

        let expires_at = token_expiry(Utc::now(), token.expires_in);

        self.store
            .save_token(
                account.id,
                &token.access_token,
                token.refresh_token.as_deref(),
                expires_at,
            )
            .map_err(SyncError::Storage)?;

        account.access_token = token.access_token;
        if token.refresh_token.is_some() {
            account.refresh_token = token.refresh_token;
        }
        account.token_expires_at = expires_at;
        account.status = AccountStatus::Active;

        log::info!("Refreshed access token for account {}", account.id);
        Ok(account.access_token.clone())
    }

    fn mark_expired(&self, account: &mut MailboxAccount) -> Result<(), SyncError> {
        self.store
            .set_status(account.id, AccountStatus::Expired)
            .map_err(SyncError::Storage)?;
        account.status = AccountStatus::Expired;
        Ok(())
    }
}

/// Absolute expiry of a token granted at `now`
fn token_expiry(now: DateTime<Utc>, expires_in: Option<u64>) -> DateTime<Utc> {
    let ttl = expires_in
        .unwrap_or(DEFAULT_TOKEN_TTL_SECS)
        .min(MAX_TOKEN_TTL_SECS);
    i64::try_from(ttl)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(now)
}
