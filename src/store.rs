use crate::{
    chat::StoredRecord,
    conversation::ConversationKey,
    entity::{Identity, Peer},
    error::{PreviewError, Result},
    log::{FriendGraph, MessageLog},
};
use anyhow::Context;
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    ConnectOptions, Row, SqlitePool,
};
use std::{path::Path, str::FromStr};

/// SQLite-backed message log and friend graph.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db_path = db_path.as_ref();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// Private in-memory database. A single connection keeps every query on the same database.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite database")?;

        Ok(Self { pool })
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS log_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                log_key TEXT NOT NULL,
                score INTEGER NOT NULL,
                payload BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_log_entries_key_score ON log_entries(log_key, score DESC, id DESC);

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT,
                image TEXT
            );

            CREATE TABLE IF NOT EXISTS friendships (
                user_id TEXT NOT NULL,
                friend_id TEXT NOT NULL,
                PRIMARY KEY (user_id, friend_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    /// Append a record to a conversation log at the given score.
    pub async fn append(
        &self,
        key: &ConversationKey,
        score: i64,
        record: &StoredRecord,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO log_entries (log_key, score, payload)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(key.log_key())
        .bind(score)
        .bind(record.as_bytes())
        .execute(&self.pool)
        .await
        .context("Failed to append log entry")?;

        Ok(())
    }

    /// Append a record scored with the current time in Unix milliseconds.
    pub async fn append_now(
        &self,
        key: &ConversationKey,
        record: &StoredRecord,
    ) -> anyhow::Result<()> {
        self.append(key, chrono::Utc::now().timestamp_millis(), record)
            .await
    }

    /// Save or update a user's profile.
    pub async fn save_user(&self, peer: &Peer) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, image)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                image = excluded.image
            "#,
        )
        .bind(peer.id.as_str())
        .bind(&peer.display_name)
        .bind(&peer.avatar_ref)
        .execute(&self.pool)
        .await
        .context("Failed to save user")?;

        Ok(())
    }

    /// Record a mutual friendship. Both users are registered if unknown.
    pub async fn add_friendship(&self, a: &Identity, b: &Identity) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        for id in [a, b] {
            sqlx::query("INSERT OR IGNORE INTO users (id) VALUES (?)")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await
                .context("Failed to register user")?;
        }

        for (from, to) in [(a, b), (b, a)] {
            sqlx::query("INSERT OR IGNORE INTO friendships (user_id, friend_id) VALUES (?, ?)")
                .bind(from.as_str())
                .bind(to.as_str())
                .execute(&mut *tx)
                .await
                .context("Failed to save friendship")?;
        }

        tx.commit().await.context("Failed to commit friendship")?;
        Ok(())
    }
}

#[async_trait]
impl MessageLog for Store {
    async fn latest(&self, key: &ConversationKey) -> Result<Option<StoredRecord>> {
        let row = sqlx::query(
            r#"
            SELECT payload
            FROM log_entries
            WHERE log_key = ?
            ORDER BY score DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(key.log_key())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PreviewError::StoreUnavailable(e.to_string()))?;

        match row {
            Some(row) => {
                let payload: Vec<u8> = row
                    .try_get("payload")
                    .map_err(|e| PreviewError::StoreUnavailable(e.to_string()))?;
                Ok(Some(StoredRecord::new(payload)))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl FriendGraph for Store {
    async fn peers_of(&self, user: &Identity) -> Result<Vec<Peer>> {
        let known = sqlx::query("SELECT 1 FROM users WHERE id = ?")
            .bind(user.as_str())
            .fetch_optional(&self.pool)
            .await?;
        if known.is_none() {
            return Err(PreviewError::NotFound(user.to_string()));
        }

        let rows = sqlx::query(
            r#"
            SELECT f.friend_id, u.name, u.image
            FROM friendships f
            LEFT JOIN users u ON u.id = f.friend_id
            WHERE f.user_id = ?
            ORDER BY f.rowid ASC
            "#,
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut peers = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("friend_id")?;
            peers.push(Peer {
                id: Identity::new(id),
                display_name: row.try_get("name")?,
                avatar_ref: row.try_get("image")?,
            });
        }

        Ok(peers)
    }
}
