use super::SessionStore;
use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

const AUTH_TOKEN_KEY: &str = "auth_token";

pub struct SqliteSessionStore {
    conn: Connection,
}

impl SqliteSessionStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open session store at {path}"))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL mode")?;

        let mut store = Self { conn };
        store.migrate()?;

        Ok(store)
    }

    fn migrate(&mut self) -> Result<()> {
        const MIGRATIONS: &[&str] = &[include_str!("../../migrations/0001_create_metadata.sql")];

        let version: u32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .context("Failed to read user_version")?;

        for (i, sql) in MIGRATIONS.iter().enumerate() {
            let target = (i + 1) as u32;
            if version < target {
                info!("Running session store migration: v{} → v{}", target - 1, target);
                self.conn
                    .execute_batch(sql)
                    .with_context(|| format!("Migration v{} → v{} failed", target - 1, target))?;
                self.conn
                    .pragma_update(None, "user_version", target)
                    .with_context(|| format!("Failed to set user_version to {target}"))?;
            }
        }

        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .with_context(|| format!("Failed to query metadata key {key}"))
    }
}

impl SessionStore for SqliteSessionStore {
    fn auth_token(&self) -> Result<Option<String>> {
        self.get(AUTH_TOKEN_KEY)
    }

    fn set_auth_token(&mut self, token: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO metadata (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                updated_at = datetime('now')",
                [AUTH_TOKEN_KEY, token],
            )
            .context("Failed to store auth token")?;

        debug!("Auth token stored");
        Ok(())
    }

    fn clear_auth_token(&mut self) -> Result<()> {
        let removed = self
            .conn
            .execute("DELETE FROM metadata WHERE key = ?1", [AUTH_TOKEN_KEY])
            .context("Failed to clear auth token")?;

        debug!(removed, "Auth token cleared");
        Ok(())
    }
}
