use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sanad_core::EngineConfig;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingEntry {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Plain key/value settings feeding [`EngineConfig`].
pub trait SettingsRepository: Send + Sync {
    async fn load_settings(&self) -> Result<Vec<SettingEntry>>;
    async fn get_setting(&self, key: &str) -> Result<Option<SettingEntry>>;
    async fn put_setting(&self, key: &str, value: &str) -> Result<()>;
    /// Returns whether the key existed.
    async fn delete_setting(&self, key: &str) -> Result<bool>;
}

/// Builds the engine configuration from every stored setting.
pub async fn load_engine_config<R: SettingsRepository>(repository: &R) -> Result<EngineConfig> {
    let settings = repository.load_settings().await?;
    let config = EngineConfig::from_pairs(
        settings
            .iter()
            .map(|entry| (entry.key.as_str(), entry.value.as_str())),
    )
    .context("stored settings are invalid")?;
    info!(settings = settings.len(), "engine configuration loaded");
    Ok(config)
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    settings: Arc<RwLock<BTreeMap<String, SettingEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsRepository for MemoryStore {
    async fn load_settings(&self) -> Result<Vec<SettingEntry>> {
        Ok(self.settings.read().values().cloned().collect())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<SettingEntry>> {
        Ok(self.settings.read().get(key).cloned())
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        self.settings.write().insert(
            key.to_string(),
            SettingEntry {
                key: key.to_string(),
                value: value.to_string(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete_setting(&self, key: &str) -> Result<bool> {
        Ok(self.settings.write().remove(key).is_some())
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        // Every connection to an in-memory database sees its own empty database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .with_context(|| format!("failed connecting to sqlite at {}", database_url))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed creating settings table")?;

        Ok(())
    }
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> SettingEntry {
    SettingEntry {
        key: row.get("key"),
        value: row.get("value"),
        updated_at: row
            .get::<String, _>("updated_at")
            .parse()
            .unwrap_or_else(|_| Utc::now()),
    }
}

impl SettingsRepository for SqliteStore {
    async fn load_settings(&self) -> Result<Vec<SettingEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT key, value, updated_at
            FROM settings
            ORDER BY key
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(entry_from_row).collect())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<SettingEntry>> {
        let row = sqlx::query("SELECT key, value, updated_at FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(entry_from_row))
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
              value=excluded.value,
              updated_at=excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_setting(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM settings WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    pub async fn sqlite(database_url: &str) -> Result<Self> {
        let sqlite = SqliteStore::connect(database_url).await?;
        Ok(Self::Sqlite(sqlite))
    }
}

impl SettingsRepository for Store {
    async fn load_settings(&self) -> Result<Vec<SettingEntry>> {
        match self {
            Store::Memory(store) => store.load_settings().await,
            Store::Sqlite(store) => store.load_settings().await,
        }
    }

    async fn get_setting(&self, key: &str) -> Result<Option<SettingEntry>> {
        match self {
            Store::Memory(store) => store.get_setting(key).await,
            Store::Sqlite(store) => store.get_setting(key).await,
        }
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        match self {
            Store::Memory(store) => store.put_setting(key, value).await,
            Store::Sqlite(store) => store.put_setting(key, value).await,
        }
    }

    async fn delete_setting(&self, key: &str) -> Result<bool> {
        match self {
            Store::Memory(store) => store.delete_setting(key).await,
            Store::Sqlite(store) => store.delete_setting(key).await,
        }
    }
}
