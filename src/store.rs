use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

/// Key layout shared by the rating and comment services.
pub fn likes_key(content_id: &str) -> String {
    format!("likes:{content_id}")
}

pub fn dislikes_key(content_id: &str) -> String {
    format!("dislikes:{content_id}")
}

pub fn user_rating_key(user_id: &str, content_id: &str) -> String {
    format!("user:{user_id}:rating:{content_id}")
}

pub fn comments_key(content_id: &str) -> String {
    format!("comments:{content_id}")
}

pub fn user_comment_rating_key(user_id: &str, comment_id: &str) -> String {
    format!("user:{user_id}:comment:{comment_id}")
}

#[derive(Clone)]
pub struct KvStore {
    path: String,
}

impl KvStore {
    pub fn new(path: &str) -> Result<Self> {
        if path.trim().is_empty() {
            anyhow::bail!("SQLITE_PATH is empty");
        }
        if path != ":memory:" && !path.starts_with("file:") {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create sqlite parent dir for {path}"))?;
            }
        }

        // Note: rusqlite::Connection is not Send/Sync. We keep only a path here
        // and open short-lived connections per operation. WAL keeps this fast
        // enough for the request rates a catalog page produces.
        Ok(Self { path: path.to_string() })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn open_conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).with_context(|| format!("open sqlite {}", self.path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Ok(conn)
    }

    pub fn init_db(&self) -> Result<()> {
        let conn = self.open_conn()?;
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS kv (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_ts REAL
);
"#,
        )?;
        Ok(())
    }

    pub fn ping(&self) -> Result<()> {
        let conn = self.open_conn()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.open_conn()?;
        let v: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?", params![key], |r| r.get(0))
            .optional()?;
        Ok(v)
    }

    pub fn put(&self, key: &str, value: &str, ts: f64) -> Result<()> {
        let conn = self.open_conn()?;
        conn.execute(
            r#"
INSERT INTO kv(key, value, updated_ts)
VALUES(?,?,?)
ON CONFLICT(key) DO UPDATE SET
  value=excluded.value,
  updated_ts=excluded.updated_ts
"#,
            params![key, value, ts],
        )?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        let conn = self.open_conn()?;
        conn.execute("DELETE FROM kv WHERE key = ?", params![key])?;
        Ok(())
    }

    /// Missing counters read as 0; unparsable values also fall back to 0
    /// rather than poisoning every later read.
    pub fn get_counter(&self, key: &str) -> Result<i64> {
        let v = self.get(key)?;
        Ok(v.and_then(|s| s.parse::<i64>().ok()).unwrap_or(0))
    }

    pub fn put_counter(&self, key: &str, value: i64, ts: f64) -> Result<()> {
        self.put(key, &value.max(0).to_string(), ts)
    }

    /// Admin reset. Drops every engagement key: counters, per-user rating
    /// records, and comment trees.
    pub fn clear_engagement_state(&self) -> Result<()> {
        let conn = self.open_conn()?;
        conn.execute("DELETE FROM kv", [])?;
        Ok(())
    }
}
