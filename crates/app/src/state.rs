use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::Result;
use meter_core::{PersistedUsageRecord, ServiceUsageMap, UsageRecord};
use meter_db::{Db, LedgerBlobs};

/// All mutable accounting state, owned by the engine. The dirty flag is
/// process-wide: any mutation sets it, only a successful flush clears it.
#[derive(Debug, Default)]
pub struct LedgerState {
    pub usage: HashMap<String, UsageRecord>,
    pub services: ServiceUsageMap,
    pub paused: BTreeSet<String>,
    /// Ephemeral: origins generating traffic from non-foreground tabs.
    pub background: HashMap<String, DateTime<Utc>>,
    pub last_month_usage: u64,
    pub last_reset: Option<DateTime<Utc>>,
    pub setup_complete: bool,
    dirty: bool,
}

impl LedgerState {
    pub fn load(db: &Db) -> Result<Self> {
        let blobs = db.load_ledger()?;
        let last_reset = blobs
            .last_reset
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|parsed| parsed.with_timezone(&Utc));
        Ok(Self {
            usage: blobs
                .usage
                .into_iter()
                .map(|(origin, record)| (origin, record.into()))
                .collect(),
            services: ServiceUsageMap::from_persisted(blobs.service_usage),
            paused: blobs.paused.into_iter().collect(),
            background: HashMap::new(),
            last_month_usage: blobs.last_month_usage,
            last_reset,
            setup_complete: blobs.setup_complete,
            dirty: false,
        })
    }

    pub fn flush(&mut self, db: &mut Db) -> Result<()> {
        let blobs = LedgerBlobs {
            usage: self
                .usage
                .iter()
                .map(|(origin, record)| (origin.clone(), PersistedUsageRecord::from(record)))
                .collect(),
            service_usage: self.services.to_persisted(),
            paused: self.paused.iter().cloned().collect(),
            last_reset: self
                .last_reset
                .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            last_month_usage: self.last_month_usage,
            setup_complete: self.setup_complete,
        };
        db.save_ledger(&blobs)?;
        self.dirty = false;
        Ok(())
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn grand_total(&self) -> u64 {
        self.usage
            .values()
            .fold(0u64, |sum, record| sum.saturating_add(record.total_bytes))
    }
}
