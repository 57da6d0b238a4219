//! Errors surfaced by a sync run
//!
//! Only run-level failures live here. Per-message problems are counted in
//! [`crate::sync::SyncSummary`] and never abort a run.

/// Run-level sync failure
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Account {0} not found")]
    AccountNotFound(i64),

    #[error("Account belongs to another organization")]
    Forbidden,

    /// No refresh token was stored when the access token expired
    #[error("Reauthentication required")]
    ReauthRequired,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// List, history or profile call failed; nothing was committed
    #[error("Provider request failed: {0:#}")]
    Provider(anyhow::Error),

    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl SyncError {
    /// HTTP status the trigger endpoint answers with
    pub fn status_code(&self) -> u16 {
        match self {
            SyncError::AccountNotFound(_) => 404,
            SyncError::Forbidden => 403,
            SyncError::ReauthRequired | SyncError::RefreshFailed(_) => 401,
            SyncError::Provider(_) => 502,
            SyncError::Storage(_) => 500,
        }
    }

    /// Whether the user has to reconnect the account before syncing again
    pub fn requires_reauth(&self) -> bool {
        matches!(self, SyncError::ReauthRequired | SyncError::RefreshFailed(_))
    }
}
