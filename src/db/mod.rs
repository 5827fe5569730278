//! Relational message store on SQLite
//!
//! Normalized tables for users, threads, messages, recipients, attachments and
//! labels. Ingestion is keyed on the provider message id: the first write of a
//! message stores the whole entity graph in one transaction, later writes of the
//! same id return the existing row untouched.
//!
//! One logical writer per store. Callers that ingest concurrently must serialize
//! writes themselves.

pub mod schema;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::address::{parse_address, parse_address_list, Mailbox};
use crate::core::dates::parse_date;
use crate::core::message::{AttachmentRecord, Contact, MessageId, MessageRecord};
use crate::core::payload::ProviderMessage;
use crate::core::schema::{MessageFlags, RecipientKind};
use crate::error::{Error, Result};

use self::schema::SCHEMA_SQL;

const DEFAULT_SUBJECT: &str = "No Subject";

const MESSAGE_SELECT: &str = r#"
    SELECT m.id, m.provider_message_id, t.provider_thread_id, u.email, u.name,
           m.subject, m.body_text, m.body_html, m.snippet, m.timestamp, m.in_reply_to,
           m.is_read, m.is_archived, m.is_deleted, m.header_message_id
    FROM messages m
    JOIN threads t ON m.thread_id = t.id
    LEFT JOIN users u ON m.sender_id = u.id
"#;

/// Outcome of [`MessageStore::upsert_message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    /// First sighting: the full entity graph was written
    Inserted(MessageId),
    /// Already stored: nothing was written
    Existing(MessageId),
}

impl Upserted {
    pub fn id(&self) -> MessageId {
        match self {
            Upserted::Inserted(id) | Upserted::Existing(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Upserted::Inserted(_))
    }
}

/// Flags that action handlers may flip
#[derive(Debug, Clone, Copy)]
enum Flag {
    Read,
    Archived,
    Deleted,
}

impl Flag {
    fn column(&self) -> &'static str {
        match self {
            Flag::Read => "is_read",
            Flag::Archived => "is_archived",
            Flag::Deleted => "is_deleted",
        }
    }
}

/// Row counts for status output
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub messages: usize,
    pub threads: usize,
    pub users: usize,
    pub attachments: usize,
    pub labels: usize,
    pub latest_message: Option<DateTime<Utc>>,
}

/// Relational message store
pub struct MessageStore {
    conn: Connection,
}

impl MessageStore {
    /// Open or create database at path
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Store a provider message and everything hanging off it.
    ///
    /// Re-ingesting a known provider id is a no-op returning the existing row;
    /// recipients, attachments and labels are not re-synced. A failure anywhere in
    /// the first write rolls the whole unit back.
    pub fn upsert_message(&self, msg: &ProviderMessage) -> Result<Upserted> {
        if msg.id.trim().is_empty() {
            return Err(Error::InvalidPayload("message has no provider id".into()));
        }

        if let Some(existing) = self.find_message_id(&msg.id)? {
            debug!("Message {} already stored as {}", msg.id, existing);
            return Ok(Upserted::Existing(existing));
        }

        let subject = msg
            .header("Subject")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SUBJECT);
        let sender = parse_address(msg.header("From").unwrap_or(""));
        let date = msg.header("Date").unwrap_or("");
        let timestamp = parse_date(date).unwrap_or_else(|degraded| {
            warn!("Message {}: {}, using now", msg.id, degraded.reason);
            degraded.fallback
        });
        let (body_text, body_html) = msg.bodies();
        let attachments = msg.attachments();
        let flags = MessageFlags::from_labels(&msg.label_ids);
        let raw_data = serde_json::to_string(msg)?;
        let thread_key = if msg.thread_id.is_empty() {
            msg.id.as_str()
        } else {
            msg.thread_id.as_str()
        };
        let now = Utc::now().timestamp();

        let tx = self.conn.unchecked_transaction()?;

        let thread_id = upsert_thread(&tx, thread_key, subject, &msg.snippet, now)?;
        let sender_id = if sender.is_empty() {
            None
        } else {
            Some(upsert_user(&tx, &sender, now)?)
        };

        tx.execute(
            r#"
            INSERT INTO messages
                (provider_message_id, thread_id, sender_id, subject, body_text, body_html,
                 snippet, timestamp, in_reply_to, header_message_id,
                 is_read, is_archived, is_deleted, raw_data, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                msg.id,
                thread_id,
                sender_id,
                subject,
                body_text,
                body_html,
                msg.snippet,
                timestamp.timestamp(),
                msg.header("In-Reply-To"),
                msg.header("Message-ID"),
                flags.is_read,
                flags.is_archived,
                flags.is_deleted,
                raw_data,
                now,
            ],
        )?;
        let message_id = tx.last_insert_rowid();

        for kind in RecipientKind::ALL {
            let Some(value) = msg.header(kind.header_name()) else {
                continue;
            };
            for mailbox in parse_address_list(value) {
                let user_id = upsert_user(&tx, &mailbox, now)?;
                tx.execute(
                    r#"
                    INSERT OR IGNORE INTO recipients (message_id, user_id, kind)
                    VALUES (?1, ?2, ?3)
                    "#,
                    params![message_id, user_id, kind.as_str()],
                )?;
            }
        }

        for attachment in &attachments {
            tx.execute(
                r#"
                INSERT INTO attachments
                    (message_id, filename, content_type, size, provider_attachment_id, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    message_id,
                    attachment.filename,
                    attachment.content_type,
                    attachment.size,
                    attachment.provider_attachment_id,
                    now,
                ],
            )?;
        }

        for label in &msg.label_ids {
            let label_id = ensure_label(&tx, label, now)?;
            tx.execute(
                "INSERT OR IGNORE INTO message_labels (message_id, label_id) VALUES (?1, ?2)",
                params![message_id, label_id],
            )?;
        }

        tx.commit()?;
        info!("Stored message {} as {}", msg.id, message_id);
        Ok(Upserted::Inserted(message_id))
    }

    fn find_message_id(&self, provider_message_id: &str) -> Result<Option<MessageId>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM messages WHERE provider_message_id = ?1",
                params![provider_message_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Full record by surrogate id, `None` when absent
    pub fn get_by_id(&self, id: MessageId) -> Result<Option<MessageRecord>> {
        let sql = format!("{} WHERE m.id = ?1", MESSAGE_SELECT);
        let record = self
            .conn
            .query_row(&sql, params![id], map_message_row)
            .optional()?;

        match record {
            Some(mut record) => {
                self.load_relations(&mut record)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Full record by provider message id, `None` when absent
    pub fn get_by_provider_id(&self, provider_message_id: &str) -> Result<Option<MessageRecord>> {
        match self.find_message_id(provider_message_id)? {
            Some(id) => self.get_by_id(id),
            None => Ok(None),
        }
    }

    /// Hydrate ids in order, skipping any that no longer resolve
    pub fn get_many(&self, ids: &[MessageId]) -> Result<Vec<MessageRecord>> {
        let mut records = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.get_by_id(id)? {
                Some(record) => records.push(record),
                None => debug!("Message {} vanished before hydration", id),
            }
        }
        Ok(records)
    }

    fn load_relations(&self, record: &mut MessageRecord) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT r.kind, u.email, u.name
            FROM recipients r
            JOIN users u ON r.user_id = u.id
            WHERE r.message_id = ?1
            ORDER BY r.id
            "#,
        )?;
        let rows = stmt.query_map(params![record.id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                Contact {
                    email: row.get(1)?,
                    name: non_empty(row.get(2)?),
                },
            ))
        })?;

        let mut recipients: BTreeMap<RecipientKind, Vec<Contact>> = BTreeMap::new();
        for row in rows {
            let (kind, contact) = row?;
            match kind.parse::<RecipientKind>() {
                Ok(kind) => recipients.entry(kind).or_default().push(contact),
                Err(e) => warn!("Message {}: {}", record.id, e),
            }
        }
        record.recipients = recipients;

        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT id, filename, content_type, size, provider_attachment_id
            FROM attachments WHERE message_id = ?1 ORDER BY id
            "#,
        )?;
        record.attachments = stmt
            .query_map(params![record.id], |row| {
                Ok(AttachmentRecord {
                    id: row.get(0)?,
                    filename: row.get(1)?,
                    content_type: row.get(2)?,
                    size: row.get(3)?,
                    provider_attachment_id: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT l.name
            FROM message_labels ml
            JOIN labels l ON ml.label_id = l.id
            WHERE ml.message_id = ?1
            ORDER BY l.name
            "#,
        )?;
        record.labels = stmt
            .query_map(params![record.id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(())
    }

    /// Messages of a thread, oldest first
    pub fn get_thread_messages(&self, provider_thread_id: &str) -> Result<Vec<MessageRecord>> {
        let ids = self.query_ids(
            r#"
            SELECT m.id
            FROM messages m
            JOIN threads t ON m.thread_id = t.id
            WHERE t.provider_thread_id = ?1
            ORDER BY m.timestamp ASC, m.id ASC
            "#,
            params![provider_thread_id],
        )?;
        self.get_many(&ids)
    }

    /// Ids of messages whose subject, body, sender address or sender name
    /// contains `query` (case-insensitive), newest first
    pub fn search_ids_by_text(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MessageId>> {
        let pattern = format!("%{}%", escape_like(query));
        self.query_ids(
            r#"
            SELECT m.id
            FROM messages m
            LEFT JOIN users u ON m.sender_id = u.id
            WHERE m.subject LIKE ?1 ESCAPE '\'
               OR m.body_text LIKE ?1 ESCAPE '\'
               OR u.email LIKE ?1 ESCAPE '\'
               OR u.name LIKE ?1 ESCAPE '\'
            ORDER BY m.timestamp DESC, m.id DESC
            LIMIT ?2 OFFSET ?3
            "#,
            params![pattern, limit as i64, offset as i64],
        )
    }

    pub fn search_by_text(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MessageRecord>> {
        let ids = self.search_ids_by_text(query, limit, offset)?;
        self.get_many(&ids)
    }

    /// Messages carrying `label`, newest first
    pub fn get_by_label(
        &self,
        label: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MessageRecord>> {
        let ids = self.query_ids(
            r#"
            SELECT m.id
            FROM messages m
            JOIN message_labels ml ON m.id = ml.message_id
            JOIN labels l ON ml.label_id = l.id
            WHERE l.name = ?1
            ORDER BY m.timestamp DESC, m.id DESC
            LIMIT ?2 OFFSET ?3
            "#,
            params![label, limit as i64, offset as i64],
        )?;
        self.get_many(&ids)
    }

    fn query_ids(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<MessageId>> {
        let mut stmt = self.conn.prepare(sql)?;
        let ids = stmt
            .query_map(params, |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<MessageId>>>()?;
        Ok(ids)
    }

    // ===== Action handlers =====

    pub fn set_read(&self, id: MessageId, value: bool) -> Result<bool> {
        self.set_flag(id, Flag::Read, value)
    }

    pub fn set_archived(&self, id: MessageId, value: bool) -> Result<bool> {
        self.set_flag(id, Flag::Archived, value)
    }

    /// Soft delete. Rows are never physically removed.
    pub fn set_deleted(&self, id: MessageId, value: bool) -> Result<bool> {
        self.set_flag(id, Flag::Deleted, value)
    }

    fn set_flag(&self, id: MessageId, flag: Flag, value: bool) -> Result<bool> {
        let sql = format!("UPDATE messages SET {} = ?1 WHERE id = ?2", flag.column());
        let changed = self.conn.execute(&sql, params![value, id])?;
        if changed > 0 {
            debug!("Message {}: {} = {}", id, flag.column(), value);
        }
        Ok(changed > 0)
    }

    /// Attach a label; returns false when the message does not exist
    pub fn add_label(&self, id: MessageId, label: &str) -> Result<bool> {
        if !self.message_exists(id)? {
            return Ok(false);
        }
        let label_id = ensure_label(&self.conn, label, Utc::now().timestamp())?;
        self.conn.execute(
            "INSERT OR IGNORE INTO message_labels (message_id, label_id) VALUES (?1, ?2)",
            params![id, label_id],
        )?;
        Ok(true)
    }

    /// Detach a label; returns whether an association was removed
    pub fn remove_label(&self, id: MessageId, label: &str) -> Result<bool> {
        let removed = self.conn.execute(
            r#"
            DELETE FROM message_labels
            WHERE message_id = ?1
              AND label_id = (SELECT id FROM labels WHERE name = ?2)
            "#,
            params![id, label],
        )?;
        Ok(removed > 0)
    }

    pub fn message_exists(&self, id: MessageId) -> Result<bool> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM messages WHERE id = ?1",
                params![id],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    /// Get store statistics
    pub fn stats(&self) -> Result<StoreStats> {
        let count = |table: &str| -> Result<usize> {
            let sql = format!("SELECT COUNT(*) FROM {}", table);
            let n: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        let latest: Option<i64> = self
            .conn
            .query_row("SELECT MAX(timestamp) FROM messages", [], |row| row.get(0))?;

        Ok(StoreStats {
            messages: count("messages")?,
            threads: count("threads")?,
            users: count("users")?,
            attachments: count("attachments")?,
            labels: count("labels")?,
            latest_message: latest.and_then(|ts| DateTime::from_timestamp(ts, 0)),
        })
    }
}

fn upsert_thread(
    conn: &Connection,
    provider_thread_id: &str,
    subject: &str,
    snippet: &str,
    now: i64,
) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM threads WHERE provider_thread_id = ?1",
            params![provider_thread_id],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        conn.execute(
            "UPDATE threads SET last_updated = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        return Ok(id);
    }

    conn.execute(
        r#"
        INSERT INTO threads (provider_thread_id, subject, snippet, last_updated, created_at)
        VALUES (?1, ?2, ?3, ?4, ?4)
        "#,
        params![provider_thread_id, subject, snippet, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Find a user by address or create it. A missing name is filled in later sightings.
fn upsert_user(conn: &Connection, mailbox: &Mailbox, now: i64) -> Result<i64> {
    let existing: Option<(i64, Option<String>)> = conn
        .query_row(
            "SELECT id, name FROM users WHERE email = ?1",
            params![mailbox.email],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match existing {
        Some((id, name)) => {
            if non_empty(name).is_none() && !mailbox.name.is_empty() {
                conn.execute(
                    "UPDATE users SET name = ?1 WHERE id = ?2",
                    params![mailbox.name, id],
                )?;
            }
            Ok(id)
        }
        None => {
            conn.execute(
                "INSERT INTO users (email, name, created_at) VALUES (?1, ?2, ?3)",
                params![mailbox.email, non_empty(Some(mailbox.name.clone())), now],
            )?;
            Ok(conn.last_insert_rowid())
        }
    }
}

fn ensure_label(conn: &Connection, name: &str, now: i64) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO labels (name, created_at) VALUES (?1, ?2)",
        params![name, now],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM labels WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?)
}

fn map_message_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    let sender_email: Option<String> = row.get(3)?;
    let sender_name: Option<String> = row.get(4)?;
    let timestamp: i64 = row.get(9)?;

    Ok(MessageRecord {
        id: row.get(0)?,
        provider_message_id: row.get(1)?,
        provider_thread_id: row.get(2)?,
        sender: sender_email.map(|email| Contact {
            email,
            name: non_empty(sender_name),
        }),
        subject: row.get(5)?,
        body_text: row.get(6)?,
        body_html: row.get(7)?,
        snippet: row.get(8)?,
        timestamp: DateTime::from_timestamp(timestamp, 0).unwrap_or_default(),
        in_reply_to: row.get(10)?,
        message_id_header: row.get(14)?,
        flags: MessageFlags {
            is_read: row.get(11)?,
            is_archived: row.get(12)?,
            is_deleted: row.get(13)?,
        },
        recipients: BTreeMap::new(),
        attachments: Vec::new(),
        labels: Vec::new(),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Make `query` a literal inside a `LIKE ... ESCAPE '\'` pattern
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
