//! SQLite-backed store for accounts, message records and contacts

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use rusqlite_migration::{M, Migrations};

use super::{AccountRegistry, ContactDirectory, CursorStore, MessageStore, TokenStore};
use crate::models::{
    AccountStatus, Contact, Direction, EmailAddress, MailboxAccount, MessageId, MessageRecord,
    ThreadId,
};

/// SQLite's default host-parameter limit is 999; stay well below it
const EXISTENCE_CHUNK: usize = 500;

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: accounts and messages
        M::up(
            r#"
            CREATE TABLE accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                organization_id TEXT NOT NULL,
                email TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                token_expires_at TEXT NOT NULL,
                history_id TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                last_synced_at TEXT
            );

            CREATE INDEX idx_accounts_org ON accounts(organization_id);

            -- Remote IDs are deduplicated before insert; the UNIQUE
            -- constraint only catches races that slip past that lookup
            CREATE TABLE messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                remote_id TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                direction TEXT NOT NULL,
                from_email TEXT NOT NULL,
                from_name TEXT,
                to_email TEXT NOT NULL,
                to_name TEXT,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                contact_id INTEGER,
                received_at TEXT NOT NULL,
                ingested_at TEXT NOT NULL,
                UNIQUE (account_id, remote_id),
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            );

            CREATE INDEX idx_messages_account_received
                ON messages(account_id, received_at DESC);
            "#,
        ),
        // Migration 2: labels and the contact directory
        M::up(
            r#"
            CREATE TABLE message_labels (
                message_id INTEGER NOT NULL,
                label_id TEXT NOT NULL,
                PRIMARY KEY (message_id, label_id),
                FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
            );

            CREATE TABLE contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                organization_id TEXT NOT NULL,
                email TEXT NOT NULL,
                name TEXT
            );

            CREATE INDEX idx_contacts_org ON contacts(organization_id);
            "#,
        ),
    ])
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and run migrations
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn)
    }

    /// Private in-memory database (tests)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        // WAL lets the UI read while a sync writes
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }

    fn update_account(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(sql, params)?;
        if changed == 0 {
            anyhow::bail!("Account not found");
        }
        Ok(())
    }

    fn labels_for(conn: &Connection, message_row_id: i64) -> Result<Vec<String>> {
        let mut stmt = conn.prepare_cached(
            "SELECT label_id FROM message_labels WHERE message_id = ? ORDER BY label_id",
        )?;
        let labels = stmt
            .query_map([message_row_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(labels)
    }
}

const ACCOUNT_COLUMNS: &str = "id, organization_id, email, access_token, refresh_token, \
     token_expires_at, history_id, status, last_synced_at";

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<(MailboxAccount, String)> {
    let expires_at: String = row.get(5)?;
    let last_synced_at: Option<String> = row.get(8)?;
    let status: String = row.get(7)?;
    let account = MailboxAccount {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        email: row.get(2)?,
        access_token: row.get(3)?,
        refresh_token: row.get(4)?,
        token_expires_at: parse_timestamp(&expires_at),
        history_id: row.get(6)?,
        status: AccountStatus::Active,
        last_synced_at: last_synced_at.as_deref().map(parse_timestamp),
    };
    Ok((account, status))
}

fn finish_account((mut account, status): (MailboxAccount, String)) -> Result<MailboxAccount> {
    account.status = status.parse()?;
    Ok(account)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl TokenStore for SqliteStore {
    fn get_account(&self, id: i64) -> Result<Option<MailboxAccount>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS),
                [id],
                account_from_row,
            )
            .optional()?;
        row.map(finish_account).transpose()
    }

    fn save_token(
        &self,
        id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.update_account(
            "UPDATE accounts
             SET access_token = ?1,
                 refresh_token = COALESCE(?2, refresh_token),
                 token_expires_at = ?3,
                 status = 'active'
             WHERE id = ?4",
            params![access_token, refresh_token, expires_at.to_rfc3339(), id],
        )
        .with_context(|| format!("Failed to save token for account {}", id))
    }

    fn set_status(&self, id: i64, status: AccountStatus) -> Result<()> {
        self.update_account(
            "UPDATE accounts SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )
        .with_context(|| format!("Failed to set status for account {}", id))
    }
}

impl CursorStore for SqliteStore {
    fn update_sync_state(&self, id: i64, history_id: &str, synced_at: DateTime<Utc>) -> Result<()> {
        self.update_account(
            "UPDATE accounts SET history_id = ?1, last_synced_at = ?2 WHERE id = ?3",
            params![history_id, synced_at.to_rfc3339(), id],
        )
        .with_context(|| format!("Failed to update sync state for account {}", id))
    }
}

impl MessageStore for SqliteStore {
    fn existing_ids(&self, account_id: i64, ids: &[MessageId]) -> Result<HashSet<MessageId>> {
        let conn = self.conn()?;
        let mut found = HashSet::new();

        for chunk in ids.chunks(EXISTENCE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT remote_id FROM messages WHERE account_id = ? AND remote_id IN ({})",
                placeholders
            );

            let mut values = Vec::with_capacity(chunk.len() + 1);
            values.push(Value::Integer(account_id));
            values.extend(chunk.iter().map(|id| Value::Text(id.0.clone())));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?;
            for remote_id in rows {
                found.insert(MessageId::new(remote_id?));
            }
        }

        Ok(found)
    }

    fn insert_message(&self, record: &MessageRecord) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO messages (
                account_id, remote_id, thread_id, direction,
                from_email, from_name, to_email, to_name,
                subject, body, contact_id, received_at, ingested_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.account_id,
                record.remote_id.as_str(),
                record.thread_id.as_str(),
                record.direction.as_str(),
                record.from.email,
                record.from.name,
                record.to.email,
                record.to.name,
                record.subject,
                record.body,
                record.contact_id,
                record.received_at.to_rfc3339(),
                record.ingested_at.to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to insert message {}", record.remote_id))?;

        let row_id = tx.last_insert_rowid();
        {
            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO message_labels (message_id, label_id) VALUES (?, ?)")?;
            for label in &record.label_ids {
                stmt.execute(params![row_id, label])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn list_messages(&self, account_id: i64, limit: usize) -> Result<Vec<MessageRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, remote_id, thread_id, direction, from_email, from_name,
                    to_email, to_name, subject, body, contact_id, received_at, ingested_at
             FROM messages
             WHERE account_id = ?1
             ORDER BY received_at DESC
             LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![account_id, limit as i64], |row| {
                let direction: String = row.get(3)?;
                let received_at: String = row.get(11)?;
                let ingested_at: String = row.get(12)?;
                Ok((
                    row.get::<_, i64>(0)?,
                    direction,
                    MessageRecord {
                        account_id,
                        remote_id: MessageId::new(row.get::<_, String>(1)?),
                        thread_id: ThreadId::new(row.get::<_, String>(2)?),
                        direction: Direction::Inbound,
                        from: EmailAddress {
                            email: row.get(4)?,
                            name: row.get(5)?,
                        },
                        to: EmailAddress {
                            email: row.get(6)?,
                            name: row.get(7)?,
                        },
                        subject: row.get(8)?,
                        body: row.get(9)?,
                        label_ids: Vec::new(),
                        contact_id: row.get(10)?,
                        received_at: parse_timestamp(&received_at),
                        ingested_at: parse_timestamp(&ingested_at),
                    },
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(row_id, direction, mut record)| {
                record.direction = Direction::parse(&direction)
                    .with_context(|| format!("Unknown direction {:?}", direction))?;
                record.label_ids = Self::labels_for(&conn, row_id)?;
                Ok(record)
            })
            .collect()
    }

    fn count_messages(&self, account_id: i64) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE account_id = ?",
            [account_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl ContactDirectory for SqliteStore {
    fn contacts_for_organization(&self, organization_id: &str) -> Result<Vec<Contact>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, organization_id, email, name FROM contacts WHERE organization_id = ? ORDER BY id",
        )?;
        let contacts = stmt
            .query_map([organization_id], |row| {
                Ok(Contact {
                    id: row.get(0)?,
                    organization_id: row.get(1)?,
                    email: row.get(2)?,
                    name: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(contacts)
    }
}

impl AccountRegistry for SqliteStore {
    fn insert_account(&self, mut account: MailboxAccount) -> Result<MailboxAccount> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO accounts (
                organization_id, email, access_token, refresh_token,
                token_expires_at, history_id, status, last_synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                account.organization_id,
                account.email,
                account.access_token,
                account.refresh_token,
                account.token_expires_at.to_rfc3339(),
                account.history_id,
                account.status.as_str(),
                account.last_synced_at.map(|t| t.to_rfc3339()),
            ],
        )
        .context("Failed to insert account")?;
        account.id = conn.last_insert_rowid();
        Ok(account)
    }

    fn list_accounts(&self) -> Result<Vec<MailboxAccount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts ORDER BY id",
            ACCOUNT_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], account_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(finish_account).collect()
    }

    fn insert_contact(&self, mut contact: Contact) -> Result<Contact> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO contacts (organization_id, email, name) VALUES (?1, ?2, ?3)",
            params![contact.organization_id, contact.email, contact.name],
        )
        .context("Failed to insert contact")?;
        contact.id = conn.last_insert_rowid();
        Ok(contact)
    }
}
