use chrono::{DateTime, Utc};

use crate::error::is_constraint_violation;
use crate::message::Message;
use crate::storage::conversion_failure;
use crate::time_utils;
use crate::{ExchangeError, ExchangeResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Append-only message persistence. Thread semantics live in the
/// negotiation engine; this layer only enforces one root per
/// (listing, initiator) through a unique partial index.
pub struct MessageStore;

fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    let created_str: String = row.get("created_at")?;
    let read_str: Option<String> = row.get("read_at")?;
    Ok(Message {
        id: row.get("id")?,
        thread_id: row.get("thread_id")?,
        sender_org_id: row.get("sender_org_id")?,
        recipient_org_id: row.get("recipient_org_id")?,
        listing_id: row.get("listing_id")?,
        subject: row.get("subject")?,
        body: row.get("body")?,
        created_at: time_utils::from_sqlite(&created_str).map_err(conversion_failure)?,
        read_at: read_str
            .map(|s| time_utils::from_sqlite(&s))
            .transpose()
            .map_err(conversion_failure)?,
    })
}

impl MessageStore {
    pub fn insert(conn: &Connection, msg: &Message) -> ExchangeResult<()> {
        let res = conn.execute(
            "INSERT INTO messages (id, thread_id, sender_org_id, recipient_org_id, listing_id,
                                   subject, body, created_at, read_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                msg.id,
                msg.thread_id,
                msg.sender_org_id,
                msg.recipient_org_id,
                msg.listing_id,
                msg.subject,
                msg.body,
                time_utils::to_sqlite(&msg.created_at),
                msg.read_at.map(|dt| time_utils::to_sqlite(&dt)),
            ],
        );

        match res {
            Ok(_) => {
                tracing::debug!(message_id = %msg.id, thread_id = %msg.thread_id, "Message inserted");
                Ok(())
            }
            Err(e) if msg.is_thread_root() && is_constraint_violation(&e) => {
                Err(ExchangeError::DuplicateThread {
                    listing_id: msg.listing_id.clone(),
                    org_id: msg.sender_org_id.clone(),
                })
            }
            Err(e) => Err(ExchangeError::storage("Insert message failed", e)),
        }
    }

    pub fn get(conn: &Connection, id: &str) -> ExchangeResult<Option<Message>> {
        conn.query_row("SELECT * FROM messages WHERE id = ?1", params![id], message_from_row)
            .optional()
            .map_err(|e| ExchangeError::storage("Get message failed", e))
    }

    /// First message of a thread; its sender/recipient define the pair.
    pub fn thread_root(conn: &Connection, thread_id: &str) -> ExchangeResult<Option<Message>> {
        conn.query_row(
            "SELECT * FROM messages WHERE id = ?1 AND thread_id = ?1",
            params![thread_id],
            message_from_row,
        )
        .optional()
        .map_err(|e| ExchangeError::storage("Get thread root failed", e))
    }

    pub fn find_thread(conn: &Connection, listing_id: &str, initiator_org_id: &str) -> ExchangeResult<Option<Message>> {
        conn.query_row(
            "SELECT * FROM messages
             WHERE listing_id = ?1 AND sender_org_id = ?2 AND id = thread_id",
            params![listing_id, initiator_org_id],
            message_from_row,
        )
        .optional()
        .map_err(|e| ExchangeError::storage("Find thread failed", e))
    }

    /// Whole thread, oldest first.
    pub fn thread_messages(conn: &Connection, thread_id: &str) -> ExchangeResult<Vec<Message>> {
        Self::query(
            conn,
            "SELECT * FROM messages WHERE thread_id = ?1 ORDER BY created_at ASC, rowid ASC",
            &[&thread_id],
        )
    }

    pub fn thread_roots_for_listing(conn: &Connection, listing_id: &str) -> ExchangeResult<Vec<Message>> {
        Self::query(
            conn,
            "SELECT * FROM messages WHERE listing_id = ?1 AND id = thread_id
             ORDER BY created_at ASC, rowid ASC",
            &[&listing_id],
        )
    }

    /// Messages received by an organization, newest first.
    pub fn inbox(conn: &Connection, org_id: &str) -> ExchangeResult<Vec<Message>> {
        Self::query(
            conn,
            "SELECT * FROM messages WHERE recipient_org_id = ?1 ORDER BY created_at DESC, rowid DESC",
            &[&org_id],
        )
    }

    pub fn unread_count(conn: &Connection, org_id: &str) -> ExchangeResult<usize> {
        let c: usize = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE recipient_org_id = ?1 AND read_at IS NULL",
                params![org_id],
                |r| r.get(0),
            )
            .map_err(|e| ExchangeError::storage("Count unread failed", e))?;
        Ok(c)
    }

    /// Most recent message in the thread addressed to `recipient_org_id`.
    pub fn latest_inbound(conn: &Connection, thread_id: &str, recipient_org_id: &str) -> ExchangeResult<Option<Message>> {
        conn.query_row(
            "SELECT * FROM messages WHERE thread_id = ?1 AND recipient_org_id = ?2
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            params![thread_id, recipient_org_id],
            message_from_row,
        )
        .optional()
        .map_err(|e| ExchangeError::storage("Latest inbound failed", e))
    }

    /// Sets `read_at` once. Returns false if it was already set.
    pub fn mark_read(conn: &Connection, message_id: &str, at: DateTime<Utc>) -> ExchangeResult<bool> {
        let changed = conn
            .execute(
                "UPDATE messages SET read_at = ?2 WHERE id = ?1 AND read_at IS NULL",
                params![message_id, time_utils::to_sqlite(&at)],
            )
            .map_err(|e| ExchangeError::storage("Mark read failed", e))?;
        Ok(changed == 1)
    }

    /// Marks every unread message of the thread addressed to `reader_org_id`.
    pub fn mark_thread_read(
        conn: &Connection,
        thread_id: &str,
        reader_org_id: &str,
        at: DateTime<Utc>,
    ) -> ExchangeResult<usize> {
        let changed = conn
            .execute(
                "UPDATE messages SET read_at = ?3
                 WHERE thread_id = ?1 AND recipient_org_id = ?2 AND read_at IS NULL",
                params![thread_id, reader_org_id, time_utils::to_sqlite(&at)],
            )
            .map_err(|e| ExchangeError::storage("Mark thread read failed", e))?;
        Ok(changed)
    }

    fn query(conn: &Connection, sql: &str, args: &[&dyn rusqlite::ToSql]) -> ExchangeResult<Vec<Message>> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| ExchangeError::storage("Prepare message query failed", e))?;

        let messages = stmt
            .query_map(args, message_from_row)
            .map_err(|e| ExchangeError::storage("Message query failed", e))?
            .filter_map(|r| match r {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable message row");
                    None
                }
            })
            .collect();

        Ok(messages)
    }
}
