use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

use crate::store::repo::{NewReply, ReplyStore};

/// "reply received" classification on fan-out notification rows.
const KIND_REPLY_RECEIVED: &str = "reply_received";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS users (
                id    INTEGER PRIMARY KEY,
                name  TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                role  TEXT NOT NULL DEFAULT 'resident'
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id          INTEGER PRIMARY KEY,
                user_id     INTEGER NOT NULL REFERENCES users(id),
                title       TEXT NOT NULL,
                message     TEXT NOT NULL,
                kind        TEXT NOT NULL DEFAULT 'general',
                related_id  INTEGER,
                is_read     INTEGER NOT NULL DEFAULT 0,
                created_at  INTEGER NOT NULL DEFAULT (strftime('%s','now'))
            );

            CREATE TABLE IF NOT EXISTS replies (
                id              INTEGER PRIMARY KEY,
                notification_id INTEGER NOT NULL REFERENCES notifications(id),
                sender_email    TEXT NOT NULL,
                sender_name     TEXT NOT NULL,
                subject         TEXT NOT NULL,
                body_plain      TEXT NOT NULL,
                body_html       TEXT NOT NULL,
                message_id      TEXT NOT NULL UNIQUE,
                direction       TEXT NOT NULL DEFAULT 'inbound',
                is_read         INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL DEFAULT (strftime('%s','now'))
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_user
                ON notifications(user_id, created_at DESC);
            "#,
        )?;
        Ok(())
    }
}

impl ReplyStore for SqliteStore {
    fn reply_exists(&self, message_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                r#"SELECT id FROM replies WHERE message_id = ?1"#,
                params![message_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert_reply(&self, reply: &NewReply) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO replies (
                notification_id, sender_email, sender_name, subject,
                body_plain, body_html, message_id, direction, is_read
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'inbound', 0)
            "#,
            params![
                reply.notification_id,
                reply.sender_email,
                reply.sender_name,
                reply.subject,
                reply.body_plain,
                reply.body_html,
                reply.message_id,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn find_notification_by_title(&self, email: &str, subject: &str) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                r#"
                SELECT n.id
                FROM notifications n
                JOIN users u ON u.id = n.user_id
                WHERE u.email = ?1 AND instr(n.title, ?2) > 0
                ORDER BY n.created_at DESC, n.id DESC
                LIMIT 1
                "#,
                params![email, subject],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn latest_notification_for(&self, email: &str) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                r#"
                SELECT n.id
                FROM notifications n
                JOIN users u ON u.id = n.user_id
                WHERE u.email = ?1
                ORDER BY n.created_at DESC, n.id DESC
                LIMIT 1
                "#,
                params![email],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn admin_user_ids(&self, limit: usize) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT id FROM users WHERE role = 'admin' ORDER BY id LIMIT ?1"#,
        )?;
        let mut rows = stmt.query(params![limit as i64])?;

        let mut ids = Vec::new();
        while let Some(r) = rows.next()? {
            ids.push(r.get(0)?);
        }
        Ok(ids)
    }

    fn insert_admin_notification(
        &self,
        user_id: i64,
        notification_id: i64,
        title: &str,
        message: &str,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO notifications (user_id, title, message, kind, related_id, is_read)
            VALUES (?1, ?2, ?3, ?4, ?5, 0)
            "#,
            params![user_id, title, message, KIND_REPLY_RECEIVED, notification_id],
        )?;
        Ok(())
    }
}

// Seeding and inspection helpers for tests; users and notifications are
// normally written by the web application, not this subsystem.
#[cfg(test)]
impl SqliteStore {
    pub fn add_user(&self, name: &str, email: &str, role: &str) -> i64 {
        self.conn
            .execute(
                "INSERT INTO users (name, email, role) VALUES (?1, ?2, ?3)",
                params![name, email, role],
            )
            .unwrap();
        self.conn.last_insert_rowid()
    }

    pub fn add_notification(&self, user_id: i64, title: &str, created_at: i64) -> i64 {
        self.conn
            .execute(
                "INSERT INTO notifications (user_id, title, message, created_at)
                 VALUES (?1, ?2, '', ?3)",
                params![user_id, title, created_at],
            )
            .unwrap();
        self.conn.last_insert_rowid()
    }

    pub fn raw(&self) -> &Connection {
        &self.conn
    }
}
