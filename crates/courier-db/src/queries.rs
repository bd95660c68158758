use anyhow::Result;
use rusqlite::{Connection, Row, params};

use crate::Database;
use crate::models::{ContactRow, MessageMeta, MessageRow, NewMessage, ReactionRow, UserRow};

/// Shared SELECT for feed-shaped message rows: joins the sender's name and
/// the reply target's name/content/image for preview stitching.
const MESSAGE_SELECT: &str = "
    SELECT m.id, m.sender_id, m.recipient_id, m.content, m.image_url, m.media_url, m.media_type,
           m.file_name, m.file_size, m.duration_sec, m.waveform_json, m.reply_to_id,
           m.forwarded_from_id, m.status, m.created_at, m.edited_at, m.deleted_at,
           s.username AS sender_name,
           rs.username AS reply_sender_name,
           rm.content AS reply_content,
           rm.image_url AS reply_image_url
    FROM messages m
    JOIN users s ON s.id = m.sender_id
    LEFT JOIN messages rm ON rm.id = m.reply_to_id
    LEFT JOIN users rs ON rs.id = rm.sender_id";

impl Database {
    // -- Users --

    /// Rows are normally created by the external signup service; this is the
    /// persistence surface it writes through (and what tests seed with).
    pub fn create_user(
        &self,
        username: &str,
        email: &str,
        avatar_url: Option<&str>,
        now: &str,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, email, avatar_url, created_at, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![username, email, avatar_url, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, email, avatar_url, created_at, last_seen
                 FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                        avatar_url: row.get(3)?,
                        created_at: row.get(4)?,
                        last_seen: row.get(5)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn touch_last_seen(&self, id: i64, at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE users SET last_seen = ?1 WHERE id = ?2", params![at, id])?;
            Ok(())
        })
    }

    // -- Friends --

    /// Inserts both directions; duplicate inserts are ignored. Called by the
    /// external friend CRUD.
    pub fn add_friend_pair(&self, a: i64, b: i64, now: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO friends (user_id, friend_id, created_at) VALUES (?1, ?2, ?3)",
                params![a, b, now],
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO friends (user_id, friend_id, created_at) VALUES (?1, ?2, ?3)",
                params![b, a, now],
            )?;
            Ok(())
        })
    }

    pub fn remove_friend_pair(&self, a: i64, b: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM friends WHERE user_id = ?1 AND friend_id = ?2",
                params![a, b],
            )?;
            conn.execute(
                "DELETE FROM friends WHERE user_id = ?1 AND friend_id = ?2",
                params![b, a],
            )?;
            Ok(())
        })
    }

    /// Checks the edge in the direction queried (owner -> peer). Pairs are
    /// written symmetrically, so one direction suffices for access control.
    pub fn are_friends(&self, owner: i64, peer: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let hit = conn
                .query_row(
                    "SELECT 1 FROM friends WHERE user_id = ?1 AND friend_id = ?2",
                    params![owner, peer],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(hit.is_some())
        })
    }

    // -- Messages --

    /// Inserts a validated message and reads the feed-shaped row back within
    /// the same lock hold, so the returned row reflects exactly what was
    /// written with no interleaved writer.
    pub fn insert_message(&self, new: &NewMessage) -> Result<MessageRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (
                    sender_id, recipient_id, content, image_url, media_url, media_type,
                    file_name, file_size, duration_sec, waveform_json, reply_to_id,
                    forwarded_from_id, status, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    new.sender_id,
                    new.recipient_id,
                    new.content,
                    new.image_url,
                    new.media_url,
                    new.media_type,
                    new.file_name,
                    new.file_size,
                    new.duration_sec,
                    new.waveform_json,
                    new.reply_to_id,
                    new.forwarded_from_id,
                    new.status,
                    new.created_at,
                ],
            )?;
            let id = conn.last_insert_rowid();

            let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?1");
            let row = conn.query_row(&sql, [id], map_message_row)?;
            Ok(row)
        })
    }

    pub fn get_message_meta(&self, id: i64) -> Result<Option<MessageMeta>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, sender_id, recipient_id, deleted_at FROM messages WHERE id = ?1",
                [id],
                |row| {
                    Ok(MessageMeta {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                        recipient_id: row.get(2)?,
                        deleted_at: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    /// True iff `id` names a message exchanged between exactly this pair,
    /// in either direction. Reply-link validation.
    pub fn message_between(&self, id: i64, a: i64, b: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let hit = conn
                .query_row(
                    "SELECT 1 FROM messages
                     WHERE id = ?1
                       AND ((sender_id = ?2 AND recipient_id = ?3)
                         OR (sender_id = ?3 AND recipient_id = ?2))",
                    params![id, a, b],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(hit.is_some())
        })
    }

    /// True iff `user` was a party to message `id`. Forward-link validation.
    pub fn message_involving(&self, id: i64, user: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let hit = conn
                .query_row(
                    "SELECT 1 FROM messages
                     WHERE id = ?1 AND (sender_id = ?2 OR recipient_id = ?2)",
                    params![id, user],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(hit.is_some())
        })
    }

    /// Up to `limit` messages between the pair, newest first, excluding rows
    /// the viewer has hidden. `before_id` pages backwards through history.
    pub fn message_page(
        &self,
        viewer: i64,
        peer: i64,
        limit: u32,
        before_id: Option<i64>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let before_clause = if before_id.is_some() { "AND m.id < ?4" } else { "" };
            let sql = format!(
                "{MESSAGE_SELECT}
                 WHERE ((m.sender_id = ?1 AND m.recipient_id = ?2)
                     OR (m.sender_id = ?2 AND m.recipient_id = ?1))
                   AND NOT EXISTS (
                       SELECT 1 FROM message_hidden h
                       WHERE h.message_id = m.id AND h.user_id = ?1
                   )
                   {before_clause}
                 ORDER BY m.id DESC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = match before_id {
                Some(before) => stmt
                    .query_map(params![viewer, peer, limit, before], map_message_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
                None => stmt
                    .query_map(params![viewer, peer, limit], map_message_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            };
            Ok(rows)
        })
    }

    pub fn edit_message(&self, id: i64, content: &str, edited_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET content = ?1, edited_at = ?2 WHERE id = ?3",
                params![content, edited_at, id],
            )?;
            Ok(())
        })
    }

    /// Idempotent per-(message, user) hidden-flag insert.
    pub fn hide_message(&self, message_id: i64, user_id: i64, now: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO message_hidden (message_id, user_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![message_id, user_id, now],
            )?;
            Ok(())
        })
    }

    /// Tombstone: clears content, media, and edit fields, stamps deleted_at,
    /// and sweeps all reactions — a single irreversible logical operation.
    pub fn tombstone_message(&self, id: i64, deleted_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages
                 SET content = '', image_url = NULL, media_url = NULL, media_type = NULL,
                     file_name = NULL, file_size = NULL, duration_sec = NULL,
                     waveform_json = NULL, edited_at = NULL, deleted_at = ?1
                 WHERE id = ?2",
                params![deleted_at, id],
            )?;
            conn.execute(
                "DELETE FROM message_reactions WHERE message_id = ?1",
                [id],
            )?;
            Ok(())
        })
    }

    /// Advances every message in `recipient`'s inbox from `from` to `to` and
    /// returns the affected `(sender_id, message_id)` pairs so status events
    /// can be fanned out per sender. Select and update share one lock hold.
    pub fn advance_status_bulk(
        &self,
        recipient: i64,
        from: &str,
        to: &str,
    ) -> Result<Vec<(i64, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sender_id, id FROM messages WHERE recipient_id = ?1 AND status = ?2",
            )?;
            let affected = stmt
                .query_map(params![recipient, from], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            if !affected.is_empty() {
                conn.execute(
                    "UPDATE messages SET status = ?1 WHERE recipient_id = ?2 AND status = ?3",
                    params![to, recipient, from],
                )?;
            }
            Ok(affected)
        })
    }

    /// Advances all `sender -> recipient` messages that are not yet seen to
    /// `seen`, returning the affected ids. The predicate only ever moves the
    /// status forward, so monotonicity holds even when a row jumps straight
    /// from `sent` to `seen`.
    pub fn mark_pair_seen(&self, sender: i64, recipient: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM messages
                 WHERE sender_id = ?1 AND recipient_id = ?2 AND status != 'seen'",
            )?;
            let ids = stmt
                .query_map(params![sender, recipient], |row| row.get::<_, i64>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            if !ids.is_empty() {
                conn.execute(
                    "UPDATE messages SET status = 'seen'
                     WHERE sender_id = ?1 AND recipient_id = ?2 AND status != 'seen'",
                    params![sender, recipient],
                )?;
            }
            Ok(ids)
        })
    }

    // -- Reactions --

    /// Applies the toggle semantics for one user's reaction and returns the
    /// recomputed, insertion-ordered reaction list for the message:
    /// empty emoji removes, same emoji toggles off, a different emoji
    /// replaces (refreshing its timestamp), otherwise insert.
    pub fn set_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        emoji: &str,
        now: &str,
    ) -> Result<Vec<ReactionRow>> {
        self.with_conn(|conn| {
            let existing: Option<(i64, String)> = conn
                .query_row(
                    "SELECT id, emoji FROM message_reactions
                     WHERE message_id = ?1 AND user_id = ?2",
                    params![message_id, user_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match existing {
                _ if emoji.is_empty() => {
                    conn.execute(
                        "DELETE FROM message_reactions WHERE message_id = ?1 AND user_id = ?2",
                        params![message_id, user_id],
                    )?;
                }
                Some((_, ref current)) if current.as_str() == emoji => {
                    conn.execute(
                        "DELETE FROM message_reactions WHERE message_id = ?1 AND user_id = ?2",
                        params![message_id, user_id],
                    )?;
                }
                Some((id, _)) => {
                    conn.execute(
                        "UPDATE message_reactions SET emoji = ?1, created_at = ?2 WHERE id = ?3",
                        params![emoji, now, id],
                    )?;
                }
                None => {
                    conn.execute(
                        "INSERT INTO message_reactions (message_id, user_id, emoji, created_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![message_id, user_id, emoji, now],
                    )?;
                }
            }

            query_reactions(conn, &[message_id])
        })
    }

    /// Batch-fetch reactions for a set of message ids, insertion order.
    pub fn reactions_for_messages(&self, message_ids: &[i64]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }
        self.with_conn(|conn| query_reactions(conn, message_ids))
    }

    // -- Contacts --

    /// One row per friend: latest visible message preview, last activity
    /// time, unread count, ordered by activity falling back to when the
    /// friendship was created.
    pub fn contacts(&self, viewer: i64) -> Result<Vec<ContactRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.email, u.avatar_url, u.last_seen,
                        (
                          SELECT COALESCE(NULLIF(m.content, ''), m.file_name, '[media]')
                          FROM messages m
                          WHERE ((m.sender_id = u.id AND m.recipient_id = ?1)
                              OR (m.sender_id = ?1 AND m.recipient_id = u.id))
                            AND NOT EXISTS (
                               SELECT 1 FROM message_hidden h
                               WHERE h.message_id = m.id AND h.user_id = ?1
                            )
                          ORDER BY m.id DESC
                          LIMIT 1
                        ) AS last_message,
                        (
                          SELECT m.created_at
                          FROM messages m
                          WHERE ((m.sender_id = u.id AND m.recipient_id = ?1)
                              OR (m.sender_id = ?1 AND m.recipient_id = u.id))
                            AND NOT EXISTS (
                               SELECT 1 FROM message_hidden h
                               WHERE h.message_id = m.id AND h.user_id = ?1
                            )
                          ORDER BY m.id DESC
                          LIMIT 1
                        ) AS last_message_time,
                        (
                          SELECT COUNT(*)
                          FROM messages m
                          WHERE m.sender_id = u.id AND m.recipient_id = ?1
                            AND m.status != 'seen' AND m.deleted_at IS NULL
                            AND NOT EXISTS (
                               SELECT 1 FROM message_hidden h
                               WHERE h.message_id = m.id AND h.user_id = ?1
                            )
                        ) AS unread_count,
                        f.created_at AS friended_at
                 FROM users u
                 JOIN friends f ON f.friend_id = u.id AND f.user_id = ?1
                 WHERE u.id != ?1
                 ORDER BY COALESCE(last_message_time, friended_at) DESC",
            )?;
            let rows = stmt
                .query_map([viewer], |row| {
                    Ok(ContactRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                        avatar_url: row.get(3)?,
                        last_seen: row.get(4)?,
                        last_message: row.get(5)?,
                        last_message_time: row.get(6)?,
                        unread_count: row.get(7)?,
                        friended_at: row.get(8)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn map_message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        recipient_id: row.get(2)?,
        content: row.get(3)?,
        image_url: row.get(4)?,
        media_url: row.get(5)?,
        media_type: row.get(6)?,
        file_name: row.get(7)?,
        file_size: row.get(8)?,
        duration_sec: row.get(9)?,
        waveform_json: row.get(10)?,
        reply_to_id: row.get(11)?,
        forwarded_from_id: row.get(12)?,
        status: row.get(13)?,
        created_at: row.get(14)?,
        edited_at: row.get(15)?,
        deleted_at: row.get(16)?,
        sender_name: row.get(17)?,
        reply_sender_name: row.get(18)?,
        reply_content: row.get(19)?,
        reply_image_url: row.get(20)?,
    })
}

fn query_reactions(conn: &Connection, message_ids: &[i64]) -> Result<Vec<ReactionRow>> {
    let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT r.message_id, r.user_id, u.username, r.emoji
         FROM message_reactions r
         JOIN users u ON u.id = r.user_id
         WHERE r.message_id IN ({})
         ORDER BY r.id ASC",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok(ReactionRow {
                message_id: row.get(0)?,
                user_id: row.get(1)?,
                username: row.get(2)?,
                emoji: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
