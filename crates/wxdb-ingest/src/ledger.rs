//! Change ledger: which version of each remote item has been harvested
//!
//! Keys are `baseDir/partition/itemName`, values the change token seen when
//! the item was last handed to the queue. Entries are never deleted.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait ChangeLedger: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite; a single atomic statement
    async fn set(&self, key: &str, token: &str) -> Result<()>;
}

/// Ledger in the `harvest_ledger` table
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChangeLedger for PgLedger {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let token: Option<(String,)> =
            sqlx::query_as("SELECT change_token FROM harvest_ledger WHERE item_key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("Failed to read ledger entry {}", key))?;

        Ok(token.map(|(token,)| token))
    }

    async fn set(&self, key: &str, token: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO harvest_ledger (item_key, change_token, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (item_key) DO UPDATE SET
                change_token = EXCLUDED.change_token,
                updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(token)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to write ledger entry {}", key))?;

        Ok(())
    }
}

/// Process-local ledger
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ChangeLedger for MemoryLedger {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("ledger lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, token: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("ledger lock poisoned"))?;
        entries.insert(key.to_string(), token.to_string());
        Ok(())
    }
}
