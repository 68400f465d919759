use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::params;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Db;
use crate::error::Result;
use meter_core::{PersistedUsageRecord, Settings};

/// Storage keys for the durable state blobs.
pub mod keys {
    pub const DATA_USAGE: &str = "dataUsage";
    pub const SERVICE_USAGE_MAP: &str = "serviceUsageMap";
    pub const PAUSED_DOMAINS: &str = "pausedDomains";
    pub const SETTINGS: &str = "settings";
    pub const LAST_RESET_DATE: &str = "lastResetDate";
    pub const LAST_MONTH_USAGE: &str = "lastMonthUsage";
    pub const IS_SETUP_COMPLETE: &str = "isSetupComplete";
}

/// Everything the flush cycle writes in one transaction. Settings are stored
/// separately because they change through their own command, not the flush.
#[derive(Debug, Clone, Default)]
pub struct LedgerBlobs {
    pub usage: BTreeMap<String, PersistedUsageRecord>,
    pub service_usage: BTreeMap<String, Vec<String>>,
    pub paused: Vec<String>,
    pub last_reset: Option<String>,
    pub last_month_usage: u64,
    pub setup_complete: bool,
}

impl Db {
    pub fn get_blob(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM state_blob WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get::<_, String>(0)?))
        } else {
            Ok(None)
        }
    }

    pub fn set_blob(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO state_blob (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
              value = excluded.value,
              updated_at = excluded.updated_at
            "#,
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_blob(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set_blob(key, &serde_json::to_string(value)?)
    }

    pub fn load_settings(&self) -> Result<Settings> {
        Ok(self.get_json(keys::SETTINGS)?.unwrap_or_default())
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.set_json(keys::SETTINGS, settings)
    }

    pub fn load_ledger(&self) -> Result<LedgerBlobs> {
        Ok(LedgerBlobs {
            usage: self.get_json(keys::DATA_USAGE)?.unwrap_or_default(),
            service_usage: self.get_json(keys::SERVICE_USAGE_MAP)?.unwrap_or_default(),
            paused: self.get_json(keys::PAUSED_DOMAINS)?.unwrap_or_default(),
            last_reset: self.get_json(keys::LAST_RESET_DATE)?,
            last_month_usage: self.get_json(keys::LAST_MONTH_USAGE)?.unwrap_or(0),
            setup_complete: self.get_json(keys::IS_SETUP_COMPLETE)?.unwrap_or(false),
        })
    }

    /// Writes the whole ledger in one transaction so a failed flush never
    /// leaves the keys torn between old and new state.
    pub fn save_ledger(&mut self, blobs: &LedgerBlobs) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let entries = [
            (keys::DATA_USAGE, serde_json::to_string(&blobs.usage)?),
            (
                keys::SERVICE_USAGE_MAP,
                serde_json::to_string(&blobs.service_usage)?,
            ),
            (keys::PAUSED_DOMAINS, serde_json::to_string(&blobs.paused)?),
            (
                keys::LAST_MONTH_USAGE,
                serde_json::to_string(&blobs.last_month_usage)?,
            ),
            (
                keys::IS_SETUP_COMPLETE,
                serde_json::to_string(&blobs.setup_complete)?,
            ),
        ];
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO state_blob (key, value, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                  value = excluded.value,
                  updated_at = excluded.updated_at
                "#,
            )?;
            for (key, value) in &entries {
                stmt.execute(params![key, value, now])?;
            }
            match &blobs.last_reset {
                Some(last_reset) => {
                    stmt.execute(params![
                        keys::LAST_RESET_DATE,
                        serde_json::to_string(last_reset)?,
                        now
                    ])?;
                }
                None => {
                    tx.execute(
                        "DELETE FROM state_blob WHERE key = ?1",
                        [keys::LAST_RESET_DATE],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}
