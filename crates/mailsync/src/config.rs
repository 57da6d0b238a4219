//! Runtime configuration for the sync service
//!
//! Settings are resolved in this order (later wins):
//! 1. Built-in defaults
//! 2. JSON file (`~/.config/mailsync/mailsync.json` or an explicit path)
//! 3. Environment variables (`MAILSYNC_*`)
//!
//! OAuth client credentials may alternatively come from a Google Cloud
//! Console credential file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config filename in the mailsync config directory
pub const CONFIG_FILE: &str = "mailsync.json";

/// Credentials filename in the mailsync config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Hard ceiling the provider applies to `maxResults`
const MAX_PAGE_SIZE: usize = 500;

/// Service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub api_base_url: String,
    pub db_path: Option<PathBuf>,
    pub bind_addr: String,
    /// Messages listed on first sync and on a forced resync
    pub page_size: usize,
    /// Attempts per message fetch before it counts as an error
    pub fetch_attempts: u32,
    pub http_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            api_base_url: "https://gmail.googleapis.com/gmail/v1".to_string(),
            db_path: None,
            bind_addr: "127.0.0.1:8787".to_string(),
            page_size: 50,
            fetch_attempts: 3,
            http_timeout_secs: 30,
        }
    }
}

/// Google Cloud Console credential file format
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl SyncConfig {
    /// Load from an explicit file, or from the config directory when
    /// `path` is `None`, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => config::load_json_file(path)?,
            None if config::config_exists(CONFIG_FILE) => config::load_json(CONFIG_FILE)?,
            None => Self::default(),
        };

        if (cfg.client_id.is_empty() || cfg.client_secret.is_empty())
            && config::config_exists(CREDENTIALS_FILE)
        {
            let creds: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            cfg.apply_credential_file(creds)?;
        }

        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    /// Parse from a JSON string, filling unspecified fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse config JSON")
    }

    /// Fill client credentials from a Google Cloud Console JSON string
    pub fn with_credentials_json(mut self, json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        self.apply_credential_file(creds)?;
        Ok(self)
    }

    fn apply_credential_file(&mut self, creds: GoogleCredentialFile) -> Result<()> {
        // Support both "installed" (desktop) and "web" credential types
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;
        self.client_id = installed.client_id;
        self.client_secret = installed.client_secret;
        Ok(())
    }

    /// Apply `MAILSYNC_*` overrides using the provided lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MAILSYNC_CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = lookup("MAILSYNC_CLIENT_SECRET") {
            self.client_secret = v;
        }
        if let Some(v) = lookup("MAILSYNC_DB_PATH") {
            self.db_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("MAILSYNC_BIND") {
            self.bind_addr = v;
        }
        if let Some(size) = lookup("MAILSYNC_PAGE_SIZE").and_then(|v| v.parse().ok()) {
            self.page_size = size;
        }
    }

    /// Page size clamped to what the provider accepts
    pub fn effective_page_size(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Database path, defaulting to `~/.config/mailsync/mailsync.db`
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(p) => Ok(p.clone()),
            None => config::config_path("mailsync.db").context("Could not determine config directory"),
        }
    }

    /// Whether token refresh can work at all
    pub fn has_client_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.page_size, 50);
        assert_eq!(cfg.fetch_attempts, 3);
        assert_eq!(cfg.bind_addr, "127.0.0.1:8787");
        assert!(!cfg.has_client_credentials());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg = SyncConfig::from_json(r#"{ "page_size": 10, "client_id": "abc" }"#).unwrap();
        assert_eq!(cfg.page_size, 10);
        assert_eq!(cfg.client_id, "abc");
        assert_eq!(cfg.token_url, "https://oauth2.googleapis.com/token");
    }

    #[test]
    fn test_page_size_clamped() {
        let mut cfg = SyncConfig::default();
        cfg.page_size = 0;
        assert_eq!(cfg.effective_page_size(), 1);
        cfg.page_size = 10_000;
        assert_eq!(cfg.effective_page_size(), 500);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("MAILSYNC_CLIENT_ID", "env-id"),
            ("MAILSYNC_CLIENT_SECRET", "env-secret"),
            ("MAILSYNC_BIND", "0.0.0.0:9000"),
            ("MAILSYNC_PAGE_SIZE", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut cfg = SyncConfig::default();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.client_id, "env-id");
        assert_eq!(cfg.client_secret, "env-secret");
        assert_eq!(cfg.bind_addr, "0.0.0.0:9000");
        assert_eq!(cfg.page_size, 50);
        assert!(cfg.db_path.is_none());
    }

    #[test]
    fn test_installed_credentials() {
        let json = r#"{
            "installed": {
                "client_id": "test-client-id.apps.googleusercontent.com",
                "client_secret": "test-secret",
                "token_uri": "https://oauth2.googleapis.com/token"
            }
        }"#;

        let cfg = SyncConfig::default().with_credentials_json(json).unwrap();
        assert_eq!(cfg.client_id, "test-client-id.apps.googleusercontent.com");
        assert_eq!(cfg.client_secret, "test-secret");
    }

    #[test]
    fn test_web_credentials() {
        let json = r#"{ "web": { "client_id": "web-id", "client_secret": "web-secret" } }"#;
        let cfg = SyncConfig::default().with_credentials_json(json).unwrap();
        assert_eq!(cfg.client_id, "web-id");
    }

    #[test]
    fn test_credentials_missing_section() {
        assert!(SyncConfig::default().with_credentials_json(r#"{ "other": {} }"#).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailsync.json");
        std::fs::write(&path, r#"{ "db_path": "/tmp/x.db", "page_size": 25 }"#).unwrap();

        let cfg = SyncConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.page_size, 25);
        assert_eq!(cfg.resolved_db_path().unwrap(), PathBuf::from("/tmp/x.db"));
    }
}
