use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::model::Post;
use crate::plugin::{Plugin, Store};

/// Keeps one row per post in a local SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

/// A stored row, as read back by [`SqliteStore::get`]
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct PostRow {
    pub id: String,
    pub provider: String,
    pub url: String,
    pub author_screen_name: String,
    pub content: String,
    pub category: String,
    pub tags: String,
    pub media_count: i64,
    pub media_urls: String,
}

impl SqliteStore {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        Self::run_migrations(&conn)?;

        info!("Post archive initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                provider TEXT NOT NULL,
                url TEXT NOT NULL,
                author_id TEXT NOT NULL,
                author_screen_name TEXT NOT NULL,
                author_name TEXT NOT NULL,
                author_avatar_url TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                tags TEXT NOT NULL DEFAULT '',
                media_count INTEGER NOT NULL DEFAULT 0,
                media_urls TEXT NOT NULL DEFAULT '',
                saved_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_posts_category
                ON posts(provider, category);
            ",
        )
        .context("Failed to run migrations")?;
        Ok(())
    }

    /// Number of archived posts
    #[cfg(test)]
    pub async fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    #[cfg(test)]
    pub async fn get(&self, id: &str) -> Result<Option<PostRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, provider, url, author_screen_name, content, category, tags,
                    media_count, media_urls
             FROM posts WHERE id = ?1",
        )?;

        let row = stmt
            .query_map(rusqlite::params![id], |row| {
                Ok(PostRow {
                    id: row.get(0)?,
                    provider: row.get(1)?,
                    url: row.get(2)?,
                    author_screen_name: row.get(3)?,
                    content: row.get(4)?,
                    category: row.get(5)?,
                    tags: row.get(6)?,
                    media_count: row.get(7)?,
                    media_urls: row.get(8)?,
                })
            })?
            .next()
            .transpose()?;

        Ok(row)
    }
}

#[async_trait]
impl Plugin for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn save(&self, post: &Post) -> Result<()> {
        let media_urls = post
            .media
            .iter()
            .map(|m| m.url.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let conn = self.conn.lock().await;
        conn.execute(
            "REPLACE INTO posts (id, provider, url, author_id, author_screen_name, author_name,
                                 author_avatar_url, content, created_at, category, tags,
                                 media_count, media_urls)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            rusqlite::params![
                &post.id,
                &post.provider,
                &post.url,
                &post.author.id,
                &post.author.screen_name,
                &post.author.name,
                &post.author.avatar_url,
                &post.content,
                post.timestamp.to_rfc3339(),
                &post.category,
                post.tags.join(" "),
                post.media.len() as i64,
                media_urls,
            ],
        )
        .context("Failed to store post")?;

        debug!("Archived post {}/{}", post.provider, post.id);
        Ok(())
    }
}
