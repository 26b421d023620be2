//! SQLite-based storage for synced Gmail records

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use rusqlite_migration::{M, Migrations};

use super::traits::{MailStore, PurgeStats};
use crate::models::{
    GmailId, Label, Message, PendingGmailIds, SyncHistory, SyncSetting, ThreadId, ThreadKey,
    ThreadPartial, UserId,
};
use crate::query::{MessageFilter, Page, SortDirection};

/// Partials hydrated per statement, keeping bound parameters well under
/// SQLite's variable limit
const HYDRATE_BATCH: usize = 300;

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Message metadata with zstd-compressed bodies
            -- sent_at is unix milliseconds so MAX() and equality are exact
            CREATE TABLE messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gmail_id TEXT NOT NULL UNIQUE,
                thread_id TEXT NOT NULL,
                history_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                from_ TEXT NOT NULL,
                from_canonical TEXT NOT NULL,
                to_ TEXT NOT NULL,
                to_canonical TEXT NOT NULL,
                sent_at INTEGER NOT NULL,
                subject TEXT NOT NULL,
                snippet TEXT NOT NULL,
                body_text BLOB,  -- zstd compressed
                body_html BLOB,  -- zstd compressed
                domain TEXT NOT NULL,
                flagged INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_messages_thread_user_sent
                ON messages(thread_id, user_id, sent_at);

            -- Labels, scoped per user
            CREATE TABLE labels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                UNIQUE (user_id, name)
            );

            -- Labels on messages (many-to-many)
            CREATE TABLE message_labels (
                message_id INTEGER NOT NULL,
                label_id INTEGER NOT NULL,
                PRIMARY KEY (message_id, label_id),
                FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
                FOREIGN KEY (label_id) REFERENCES labels(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_message_labels_label ON message_labels(label_id);

            -- Latest history cursor per user
            CREATE TABLE sync_history (
                user_id TEXT PRIMARY KEY,
                history_id TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Pending Gmail IDs per user, JSON array, front = next to sync
            CREATE TABLE pending_gmail_ids (
                user_id TEXT PRIMARY KEY,
                gmail_ids TEXT NOT NULL DEFAULT '[]'
            );

            -- Users enabled for sync per domain, JSON array
            CREATE TABLE sync_settings (
                domain TEXT PRIMARY KEY,
                user_ids TEXT NOT NULL DEFAULT '[]'
            );
            "#,
        ),
        // Migration 2: Indexes for filtered thread queries and per-user purges
        M::up(
            r#"
            CREATE INDEX idx_messages_user_id ON messages(user_id);
            CREATE INDEX idx_messages_domain_sent ON messages(domain, sent_at);
            CREATE INDEX idx_labels_name ON labels(name);
            "#,
        ),
    ])
}

/// Columns selected for every message load, in `MessageRow::from_row` order
const MESSAGE_COLUMNS: &str = "m.id, m.gmail_id, m.thread_id, m.history_id, m.user_id,
    m.from_, m.from_canonical, m.to_, m.to_canonical, m.sent_at, m.subject, m.snippet,
    m.body_text, m.body_html, m.domain, m.flagged";

/// A message row before bodies are decompressed and labels attached
struct MessageRow {
    id: i64,
    gmail_id: String,
    thread_id: String,
    history_id: String,
    user_id: String,
    from: String,
    from_canonical: String,
    to: String,
    to_canonical: String,
    sent_at: i64,
    subject: String,
    snippet: String,
    body_text: Option<Vec<u8>>,
    body_html: Option<Vec<u8>>,
    domain: String,
    flagged: bool,
}

impl MessageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            gmail_id: row.get(1)?,
            thread_id: row.get(2)?,
            history_id: row.get(3)?,
            user_id: row.get(4)?,
            from: row.get(5)?,
            from_canonical: row.get(6)?,
            to: row.get(7)?,
            to_canonical: row.get(8)?,
            sent_at: row.get(9)?,
            subject: row.get(10)?,
            snippet: row.get(11)?,
            body_text: row.get(12)?,
            body_html: row.get(13)?,
            domain: row.get(14)?,
            flagged: row.get(15)?,
        })
    }

    fn into_message(self, labels: Vec<Label>) -> Result<Message> {
        Ok(Message {
            id: Some(self.id),
            sent_at: millis_to_datetime(self.sent_at)?,
            body_text: decompress(self.body_text)
                .with_context(|| format!("Failed to decompress body_text of {}", self.gmail_id))?,
            body_html: decompress(self.body_html)
                .with_context(|| format!("Failed to decompress body_html of {}", self.gmail_id))?,
            gmail_id: GmailId::new(self.gmail_id),
            thread_id: ThreadId::new(self.thread_id),
            history_id: self.history_id,
            user_id: UserId::new(self.user_id),
            from: self.from,
            from_canonical: self.from_canonical,
            to: self.to,
            to_canonical: self.to_canonical,
            subject: self.subject,
            snippet: self.snippet,
            domain: self.domain,
            flagged: self.flagged,
            labels,
        })
    }
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| anyhow!("sent_at {millis} is out of range"))
}

/// Compress a body with zstd (level 3 = good balance of speed vs compression)
fn compress(body: Option<&String>) -> Result<Option<Vec<u8>>> {
    body.map(|text| zstd::encode_all(text.as_bytes(), 3))
        .transpose()
        .context("Failed to compress message body")
}

fn decompress(blob: Option<Vec<u8>>) -> Result<Option<String>> {
    let Some(blob) = blob else {
        return Ok(None);
    };
    let bytes = zstd::decode_all(blob.as_slice())?;
    Ok(Some(String::from_utf8(bytes)?))
}

/// Escape `%`, `_` and the escape character itself for `LIKE ... ESCAPE '\'`
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// WHERE clause over `messages m` for a filter, with its bound values
///
/// Always yields a valid clause so callers can append `AND ...`.
fn where_clause(filter: &MessageFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = vec!["1 = 1".to_string()];
    let mut values: Vec<Value> = Vec::new();

    if let Some(flagged) = filter.flagged {
        clauses.push("m.flagged = ?".to_string());
        values.push(Value::Integer(flagged as i64));
    }
    if let Some(names) = &filter.label_names {
        if names.is_empty() {
            // An explicitly empty label set matches nothing
            clauses.push("0 = 1".to_string());
        } else {
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM message_labels ml
                         JOIN labels l ON l.id = ml.label_id
                         WHERE ml.message_id = m.id AND l.name IN ({}))",
                placeholders(names.len())
            ));
            values.extend(names.iter().cloned().map(Value::Text));
        }
    }
    if let Some(user_id) = &filter.user_id {
        clauses.push("m.user_id = ?".to_string());
        values.push(Value::Text(user_id.0.clone()));
    }
    if let Some(from) = &filter.from {
        clauses.push("m.from_ LIKE ? ESCAPE '\\'".to_string());
        values.push(Value::Text(like_pattern(from)));
    }
    if let Some(to) = &filter.to {
        clauses.push("m.to_ LIKE ? ESCAPE '\\'".to_string());
        values.push(Value::Text(like_pattern(to)));
    }
    if let Some(domain) = &filter.domain {
        clauses.push("m.domain = ?".to_string());
        values.push(Value::Text(domain.clone()));
    }

    (clauses.join(" AND "), values)
}

/// LIMIT/OFFSET suffix for a page window
fn page_clause(page: Page) -> String {
    match (page.limit, page.offset) {
        (None, None) => String::new(),
        (Some(limit), None) => format!(" LIMIT {limit}"),
        // SQLite requires a LIMIT before OFFSET; -1 means unbounded
        (None, Some(offset)) => format!(" LIMIT -1 OFFSET {offset}"),
        (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
    }
}

/// SQLite-based mail storage
pub struct SqliteMailStore {
    conn: Mutex<Connection>,
}

impl SqliteMailStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database (nothing is persisted)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        // WAL lets readers proceed during the sync writer's transactions.
        // foreign_keys is required for the message_labels cascades.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
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
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }

    /// Load labels for a message
    fn load_labels(&self, conn: &Connection, message_id: i64) -> Result<Vec<Label>> {
        let mut stmt = conn.prepare_cached(
            "SELECT l.user_id, l.name FROM message_labels ml
             JOIN labels l ON l.id = ml.label_id
             WHERE ml.message_id = ?
             ORDER BY l.user_id, l.name",
        )?;

        let labels = stmt
            .query_map([message_id], |row| {
                Ok(Label {
                    user_id: UserId::new(row.get::<_, String>(0)?),
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(labels)
    }

    /// Insert the label if missing and return its row id
    fn ensure_label(&self, conn: &Connection, label: &Label) -> Result<i64> {
        conn.execute(
            "INSERT INTO labels (user_id, name) VALUES (?, ?)
             ON CONFLICT(user_id, name) DO NOTHING",
            params![label.user_id.as_str(), label.name],
        )?;

        let id = conn.query_row(
            "SELECT id FROM labels WHERE user_id = ? AND name = ?",
            params![label.user_id.as_str(), label.name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Run a message query and attach labels to each row
    fn query_messages(&self, conn: &Connection, sql: &str, values: &[Value]) -> Result<Vec<Message>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), MessageRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| {
                let labels = self.load_labels(conn, row.id)?;
                row.into_message(labels)
            })
            .collect()
    }

    /// Delete rows whose user_id is in the set, returning the count
    fn delete_by_user(
        conn: &Connection,
        table: &str,
        user_ids: &BTreeSet<UserId>,
    ) -> Result<usize> {
        let sql = format!(
            "DELETE FROM {table} WHERE user_id IN ({})",
            placeholders(user_ids.len())
        );
        let deleted = conn
            .execute(&sql, params_from_iter(user_ids.iter().map(UserId::as_str)))
            .with_context(|| format!("Failed to purge {table}"))?;
        Ok(deleted)
    }
}

impl MailStore for SqliteMailStore {
    fn upsert_message(&self, message: Message) -> Result<i64> {
        let body_text = compress(message.body_text.as_ref())?;
        let body_html = compress(message.body_html.as_ref())?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        // ON CONFLICT DO UPDATE keeps the row id (and its label links' target)
        tx.execute(
            "INSERT INTO messages
             (gmail_id, thread_id, history_id, user_id, from_, from_canonical, to_,
              to_canonical, sent_at, subject, snippet, body_text, body_html, domain, flagged)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(gmail_id) DO UPDATE SET
                thread_id = excluded.thread_id,
                history_id = excluded.history_id,
                user_id = excluded.user_id,
                from_ = excluded.from_,
                from_canonical = excluded.from_canonical,
                to_ = excluded.to_,
                to_canonical = excluded.to_canonical,
                sent_at = excluded.sent_at,
                subject = excluded.subject,
                snippet = excluded.snippet,
                body_text = excluded.body_text,
                body_html = excluded.body_html,
                domain = excluded.domain,
                flagged = excluded.flagged",
            params![
                message.gmail_id.as_str(),
                message.thread_id.as_str(),
                message.history_id,
                message.user_id.as_str(),
                message.from,
                message.from_canonical,
                message.to,
                message.to_canonical,
                message.sent_at.timestamp_millis(),
                message.subject,
                message.snippet,
                body_text,
                body_html,
                message.domain,
                message.flagged,
            ],
        )?;

        let id: i64 = tx.query_row(
            "SELECT id FROM messages WHERE gmail_id = ?",
            [message.gmail_id.as_str()],
            |row| row.get(0),
        )?;

        tx.execute("DELETE FROM message_labels WHERE message_id = ?", [id])?;
        for label in &message.labels {
            let label_id = self.ensure_label(&tx, label)?;
            tx.execute(
                "INSERT OR IGNORE INTO message_labels (message_id, label_id) VALUES (?, ?)",
                params![id, label_id],
            )?;
        }

        tx.commit()?;
        Ok(id)
    }

    fn get_message(&self, gmail_id: &GmailId) -> Result<Option<Message>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.gmail_id = ?"),
                [gmail_id.as_str()],
                MessageRow::from_row,
            )
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };

        let labels = self.load_labels(&conn, row.id)?;
        Ok(Some(row.into_message(labels)?))
    }

    fn has_message(&self, gmail_id: &GmailId) -> Result<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM messages WHERE gmail_id = ?)",
            [gmail_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn count_messages(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(usize::try_from(count)?)
    }

    fn upsert_label(&self, label: Label) -> Result<()> {
        let conn = self.conn()?;
        self.ensure_label(&conn, &label)?;
        Ok(())
    }

    fn list_labels(&self, user_id: &UserId) -> Result<Vec<Label>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM labels WHERE user_id = ? ORDER BY name")?;

        let labels = stmt
            .query_map([user_id.as_str()], |row| {
                Ok(Label {
                    user_id: user_id.clone(),
                    name: row.get(0)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(labels)
    }

    fn thread_partials(
        &self,
        filter: &MessageFilter,
        sort: Option<SortDirection>,
        page: Page,
    ) -> Result<Vec<ThreadPartial>> {
        let (where_sql, values) = where_clause(filter);

        let mut sql = format!(
            "SELECT m.thread_id, m.user_id, MAX(m.sent_at) AS latest_sent_at
             FROM messages m
             WHERE {where_sql}
             GROUP BY m.thread_id, m.user_id"
        );
        if let Some(direction) = sort {
            sql.push_str(&format!(" ORDER BY latest_sent_at {}", direction.as_sql()));
        }
        sql.push_str(&page_clause(page));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(thread_id, user_id, latest)| {
                Ok(ThreadPartial::new(
                    ThreadKey::new(thread_id, user_id),
                    millis_to_datetime(latest)?,
                ))
            })
            .collect()
    }

    fn messages_for_partials(
        &self,
        filter: &MessageFilter,
        partials: &[ThreadPartial],
    ) -> Result<Vec<Message>> {
        let (where_sql, filter_values) = where_clause(filter);
        let conn = self.conn()?;
        let mut messages = Vec::new();

        for batch in partials.chunks(HYDRATE_BATCH) {
            let triples = vec!["(m.thread_id = ? AND m.user_id = ? AND m.sent_at = ?)"; batch.len()]
                .join(" OR ");
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 WHERE {where_sql} AND ({triples})
                 ORDER BY m.gmail_id"
            );

            let mut values = filter_values.clone();
            for partial in batch {
                values.push(Value::Text(partial.key.thread_id.0.clone()));
                values.push(Value::Text(partial.key.user_id.0.clone()));
                values.push(Value::Integer(partial.latest_sent_at.timestamp_millis()));
            }

            messages.extend(self.query_messages(&conn, &sql, &values)?);
        }

        Ok(messages)
    }

    fn count_distinct_threads(&self, filter: &MessageFilter) -> Result<usize> {
        let (where_sql, values) = where_clause(filter);
        let sql = format!(
            "SELECT COUNT(*) FROM (
                SELECT DISTINCT m.thread_id, m.user_id FROM messages m WHERE {where_sql}
             )"
        );

        let conn = self.conn()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(usize::try_from(count)?)
    }

    fn get_sync_history(&self, user_id: &UserId) -> Result<Option<SyncHistory>> {
        let conn = self.conn()?;

        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT history_id, updated_at FROM sync_history WHERE user_id = ?",
                [user_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((history_id, updated_at)) = row else {
            return Ok(None);
        };

        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .with_context(|| format!("Invalid updated_at for {user_id}"))?
            .with_timezone(&Utc);

        Ok(Some(SyncHistory {
            user_id: user_id.clone(),
            history_id,
            updated_at,
        }))
    }

    fn save_sync_history(&self, history: SyncHistory) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_history (user_id, history_id, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                history_id = excluded.history_id,
                updated_at = excluded.updated_at",
            params![
                history.user_id.as_str(),
                history.history_id,
                history.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_pending_ids(&self, user_id: &UserId) -> Result<Option<PendingGmailIds>> {
        let conn = self.conn()?;

        let json: Option<String> = conn
            .query_row(
                "SELECT gmail_ids FROM pending_gmail_ids WHERE user_id = ?",
                [user_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(json) = json else {
            return Ok(None);
        };

        let gmail_ids: Vec<GmailId> = serde_json::from_str(&json)
            .with_context(|| format!("Invalid pending ids for {user_id}"))?;
        Ok(Some(PendingGmailIds::new(user_id.clone(), gmail_ids)))
    }

    fn save_pending_ids(&self, pending: PendingGmailIds) -> Result<()> {
        let json = serde_json::to_string(&pending.gmail_ids)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pending_gmail_ids (user_id, gmail_ids) VALUES (?, ?)
             ON CONFLICT(user_id) DO UPDATE SET gmail_ids = excluded.gmail_ids",
            params![pending.user_id.as_str(), json],
        )?;
        Ok(())
    }

    fn get_sync_setting(&self, domain: &str) -> Result<Option<SyncSetting>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT user_ids FROM sync_settings WHERE domain = ?",
                [domain],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|json| parse_sync_setting(domain.to_string(), &json))
            .transpose()
    }

    fn first_sync_setting(&self) -> Result<Option<SyncSetting>> {
        let conn = self.conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT domain, user_ids FROM sync_settings ORDER BY domain LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(domain, json)| parse_sync_setting(domain, &json))
            .transpose()
    }

    fn list_sync_settings(&self) -> Result<Vec<SyncSetting>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT domain, user_ids FROM sync_settings ORDER BY domain")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(domain, json)| parse_sync_setting(domain, &json))
            .collect()
    }

    fn save_sync_setting(&self, setting: SyncSetting) -> Result<()> {
        let json = serde_json::to_string(&setting.user_ids)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_settings (domain, user_ids) VALUES (?, ?)
             ON CONFLICT(domain) DO UPDATE SET user_ids = excluded.user_ids",
            params![setting.domain, json],
        )?;
        Ok(())
    }

    fn delete_sync_setting(&self, domain: &str) -> Result<Option<SyncSetting>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let json: Option<String> = tx
            .query_row(
                "SELECT user_ids FROM sync_settings WHERE domain = ?",
                [domain],
                |row| row.get(0),
            )
            .optional()?;

        let Some(json) = json else {
            return Ok(None);
        };

        let setting = parse_sync_setting(domain.to_string(), &json)?;
        tx.execute("DELETE FROM sync_settings WHERE domain = ?", [domain])?;
        tx.commit()?;

        Ok(Some(setting))
    }

    fn delete_user_data(&self, user_ids: &BTreeSet<UserId>) -> Result<PurgeStats> {
        if user_ids.is_empty() {
            return Ok(PurgeStats::default());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        // Messages first: message_labels rows reference both messages and labels
        let stats = PurgeStats {
            messages: Self::delete_by_user(&tx, "messages", user_ids)?,
            labels: Self::delete_by_user(&tx, "labels", user_ids)?,
            histories: Self::delete_by_user(&tx, "sync_history", user_ids)?,
            pending_ids: Self::delete_by_user(&tx, "pending_gmail_ids", user_ids)?,
        };

        tx.commit()?;
        Ok(stats)
    }

    fn user_ids_with_data(&self) -> Result<BTreeSet<UserId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id FROM messages
             UNION SELECT user_id FROM labels
             UNION SELECT user_id FROM sync_history
             UNION SELECT user_id FROM pending_gmail_ids",
        )?;

        let user_ids = stmt
            .query_map([], |row| Ok(UserId::new(row.get::<_, String>(0)?)))?
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(user_ids)
    }
}

fn parse_sync_setting(domain: String, json: &str) -> Result<SyncSetting> {
    let user_ids: BTreeSet<UserId> = serde_json::from_str(json)
        .with_context(|| format!("Invalid user_ids for sync setting {domain}"))?;
    Ok(SyncSetting { domain, user_ids })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn create_test_store() -> (SqliteMailStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteMailStore::new(dir.path().join("gmail.db")).unwrap();
        (store, dir)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn make_test_message(gmail_id: &str, thread_id: &str, user_id: &str, sent: i64) -> Message {
        Message::builder(gmail_id, thread_id, user_id)
            .history_id("1000")
            .from("Test User <test@example.com>")
            .to("recipient@example.com")
            .subject("Test")
            .snippet("Test snippet")
            .domain("example.com")
            .sent_at(at(sent))
            .labels(["INBOX", "UNREAD"])
            .build()
    }

    #[test]
    fn test_message_crud() {
        let (store, _dir) = create_test_store();

        let message = Message::builder("m1", "t1", "u1")
            .from("Alice <alice@example.com>")
            .body_text(Some("Hello".to_string()))
            .body_html(Some("<p>Hello</p>".to_string()))
            .sent_at(at(10))
            .labels(["INBOX"])
            .build();
        let id = store.upsert_message(message).unwrap();

        let loaded = store.get_message(&GmailId::new("m1")).unwrap().unwrap();
        assert_eq!(loaded.id, Some(id));
        assert_eq!(loaded.from_canonical, "alice@example.com");
        assert_eq!(loaded.body_text.as_deref(), Some("Hello"));
        assert_eq!(loaded.body_html.as_deref(), Some("<p>Hello</p>"));
        assert_eq!(loaded.sent_at, at(10));
        assert_eq!(loaded.labels, vec![Label::new("u1", "INBOX")]);

        assert!(store.has_message(&GmailId::new("m1")).unwrap());
        assert!(!store.has_message(&GmailId::new("m2")).unwrap());
        assert!(store.get_message(&GmailId::new("m2")).unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_labels_and_keeps_id() {
        let (store, _dir) = create_test_store();

        let first = store.upsert_message(make_test_message("m1", "t1", "u1", 1)).unwrap();

        let relabelled = Message::builder("m1", "t1", "u1")
            .sent_at(at(1))
            .labels(["STARRED"])
            .build();
        let second = store.upsert_message(relabelled).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.count_messages().unwrap(), 1);

        let loaded = store.get_message(&GmailId::new("m1")).unwrap().unwrap();
        assert_eq!(loaded.labels, vec![Label::new("u1", "STARRED")]);

        // Labels persist independently of message links
        let names: Vec<String> = store
            .list_labels(&UserId::new("u1"))
            .unwrap()
            .into_iter()
            .map(|l| l.name)
            .collect();
        assert_eq!(names, vec!["INBOX", "STARRED", "UNREAD"]);
    }

    #[test]
    fn test_thread_partials_sort_and_page() {
        let (store, _dir) = create_test_store();
        store.upsert_message(make_test_message("m1", "t1", "u1", 5)).unwrap();
        store.upsert_message(make_test_message("m2", "t1", "u1", 9)).unwrap();
        store.upsert_message(make_test_message("m3", "t2", "u1", 3)).unwrap();
        store.upsert_message(make_test_message("m4", "t3", "u1", 7)).unwrap();

        let desc = store
            .thread_partials(&MessageFilter::new(), Some(SortDirection::Descending), Page::all())
            .unwrap();
        let latest: Vec<i64> = desc.iter().map(|p| p.latest_sent_at.timestamp()).collect();
        assert_eq!(latest, vec![9, 7, 3]);

        let page = store
            .thread_partials(
                &MessageFilter::new(),
                Some(SortDirection::Ascending),
                Page::new(1, 1),
            )
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].key, ThreadKey::new("t3", "u1"));

        let offset_only = store
            .thread_partials(&MessageFilter::new(), Some(SortDirection::Ascending), Page::offset(2))
            .unwrap();
        assert_eq!(offset_only.len(), 1);
        assert_eq!(offset_only[0].key, ThreadKey::new("t1", "u1"));
    }

    #[test]
    fn test_label_filter_and_empty_set() {
        let (store, _dir) = create_test_store();
        store.upsert_message(make_test_message("m1", "t1", "u1", 1)).unwrap();

        let inbox = MessageFilter::new().label_names(["INBOX", "SENT"]);
        assert_eq!(store.count_distinct_threads(&inbox).unwrap(), 1);

        let sent = MessageFilter::new().label_names(["SENT"]);
        assert_eq!(store.count_distinct_threads(&sent).unwrap(), 0);

        let none = MessageFilter::new().label_names(Vec::<String>::new());
        assert_eq!(store.count_distinct_threads(&none).unwrap(), 0);
        assert!(
            store
                .thread_partials(&none, None, Page::all())
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_like_filters_escape_wildcards() {
        let (store, _dir) = create_test_store();
        let message = Message::builder("m1", "t1", "u1")
            .from("100% Deals <deals@shop.com>")
            .to("me_too@example.com")
            .sent_at(at(1))
            .build();
        store.upsert_message(message).unwrap();
        store.upsert_message(make_test_message("m2", "t2", "u1", 2)).unwrap();

        let percent = MessageFilter::new().from("100%");
        assert_eq!(store.count_distinct_threads(&percent).unwrap(), 1);

        let underscore = MessageFilter::new().to("me_");
        assert_eq!(store.count_distinct_threads(&underscore).unwrap(), 1);

        let case = MessageFilter::new().from("DEALS");
        assert_eq!(store.count_distinct_threads(&case).unwrap(), 1);
    }

    #[test]
    fn test_messages_for_partials_batches() {
        let (store, _dir) = create_test_store();
        let mut partials = Vec::new();
        for i in 0..(HYDRATE_BATCH + 5) {
            let thread = format!("t{i}");
            store
                .upsert_message(make_test_message(&format!("m{i}"), &thread, "u1", i as i64))
                .unwrap();
            partials.push(ThreadPartial::new(ThreadKey::new(thread, "u1"), at(i as i64)));
        }

        let messages = store
            .messages_for_partials(&MessageFilter::new(), &partials)
            .unwrap();
        assert_eq!(messages.len(), HYDRATE_BATCH + 5);
        assert!(messages.iter().all(|m| m.labels.len() == 2));
    }

    #[test]
    fn test_sync_history_and_pending_ids() {
        let (store, _dir) = create_test_store();
        let user = UserId::new("u1");

        assert!(store.get_sync_history(&user).unwrap().is_none());
        store.save_sync_history(SyncHistory::new("u1", "12345")).unwrap();
        assert_eq!(
            store.get_sync_history(&user).unwrap().unwrap().history_id,
            "12345"
        );

        assert!(store.get_pending_ids(&user).unwrap().is_none());
        let ids = vec![GmailId::new("c"), GmailId::new("a"), GmailId::new("b")];
        store
            .save_pending_ids(PendingGmailIds::new("u1", ids.clone()))
            .unwrap();
        assert_eq!(store.get_pending_ids(&user).unwrap().unwrap().gmail_ids, ids);
    }

    #[test]
    fn test_sync_settings() {
        let (store, _dir) = create_test_store();
        assert!(store.first_sync_setting().unwrap().is_none());
        assert!(store.get_sync_setting("corp.com").unwrap().is_none());

        store
            .save_sync_setting(SyncSetting::new("corp.com", ["a", "b"]))
            .unwrap();
        store
            .save_sync_setting(SyncSetting::new("corp.com", ["a"]))
            .unwrap();

        let setting = store.get_sync_setting("corp.com").unwrap().unwrap();
        assert_eq!(setting, SyncSetting::new("corp.com", ["a"]));
        assert_eq!(store.list_sync_settings().unwrap().len(), 1);

        let deleted = store.delete_sync_setting("corp.com").unwrap();
        assert_eq!(deleted, Some(setting));
        assert!(store.delete_sync_setting("corp.com").unwrap().is_none());
    }

    #[test]
    fn test_delete_user_data() {
        let (store, _dir) = create_test_store();
        store.upsert_message(make_test_message("m1", "t1", "u1", 1)).unwrap();
        store.upsert_message(make_test_message("m2", "t1", "u2", 1)).unwrap();
        store.save_sync_history(SyncHistory::new("u1", "1")).unwrap();
        store.save_sync_history(SyncHistory::new("u2", "1")).unwrap();
        store
            .save_pending_ids(PendingGmailIds::new("u1", vec![GmailId::new("x")]))
            .unwrap();

        let removed = BTreeSet::from([UserId::new("u1")]);
        let stats = store.delete_user_data(&removed).unwrap();

        assert_eq!(stats.messages, 1);
        assert_eq!(stats.labels, 2);
        assert_eq!(stats.histories, 1);
        assert_eq!(stats.pending_ids, 1);

        assert!(!store.has_message(&GmailId::new("m1")).unwrap());
        let survivor = store.get_message(&GmailId::new("m2")).unwrap().unwrap();
        assert_eq!(survivor.labels.len(), 2);
        assert_eq!(
            store.user_ids_with_data().unwrap(),
            BTreeSet::from([UserId::new("u2")])
        );

        assert!(store.delete_user_data(&removed).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gmail.db");

        {
            let store = SqliteMailStore::new(&path).unwrap();
            store.upsert_message(make_test_message("m1", "t1", "u1", 1)).unwrap();
        }

        let store = SqliteMailStore::new(&path).unwrap();
        assert_eq!(store.count_messages().unwrap(), 1);
    }
}
