use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub type TabId = i64;

pub const WARNING_THRESHOLD_BYTES: u64 = 500 * 1024 * 1024;
pub const PAUSE_THRESHOLD_BYTES: u64 = 1024 * 1024 * 1024;

/// Rule ids derived from origins stay within `[1, RULE_ID_RANGE]`.
pub const RULE_ID_RANGE: i32 = 100_000;
/// Soft-pause rules live in a disjoint id namespace above the hard range.
pub const SOFT_RULE_ID_OFFSET: i32 = 100_000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageRecord {
    pub total_bytes: u64,
    pub per_request_origin: BTreeMap<String, u64>,
    pub per_tab_bytes: BTreeMap<TabId, u64>,
    pub warned: bool,
    pub paused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdCrossing {
    Warning,
    PausePrompt,
}

impl UsageRecord {
    pub fn add_bytes(&mut self, request_origin: &str, bytes: u64, tab_id: Option<TabId>) {
        self.total_bytes = self.total_bytes.saturating_add(bytes);
        let per_request = self
            .per_request_origin
            .entry(request_origin.to_string())
            .or_insert(0);
        *per_request = per_request.saturating_add(bytes);
        if let Some(tab_id) = tab_id {
            let per_tab = self.per_tab_bytes.entry(tab_id).or_insert(0);
            *per_tab = per_tab.saturating_add(bytes);
        }
    }

    /// Evaluates the fixed thresholds after an update. The pause prompt wins
    /// when a single update crosses both; the warning then fires on the next
    /// update. Each prompt fires at most once per record.
    pub fn threshold_crossing(&mut self) -> Option<ThresholdCrossing> {
        if self.total_bytes > PAUSE_THRESHOLD_BYTES && !self.paused {
            self.paused = true;
            Some(ThresholdCrossing::PausePrompt)
        } else if self.total_bytes > WARNING_THRESHOLD_BYTES && !self.warned {
            self.warned = true;
            Some(ThresholdCrossing::Warning)
        } else {
            None
        }
    }
}

/// Durable form of a usage record. The in-memory record and the stored JSON
/// shape are kept apart so the wire format can stay camelCase and stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedUsageRecord {
    pub total_bytes: u64,
    #[serde(default)]
    pub per_request_origin: BTreeMap<String, u64>,
    #[serde(default)]
    pub per_tab_bytes: BTreeMap<TabId, u64>,
    #[serde(default)]
    pub warned: bool,
    #[serde(default)]
    pub paused: bool,
}

impl From<&UsageRecord> for PersistedUsageRecord {
    fn from(record: &UsageRecord) -> Self {
        Self {
            total_bytes: record.total_bytes,
            per_request_origin: record.per_request_origin.clone(),
            per_tab_bytes: record.per_tab_bytes.clone(),
            warned: record.warned,
            paused: record.paused,
        }
    }
}

impl From<PersistedUsageRecord> for UsageRecord {
    fn from(persisted: PersistedUsageRecord) -> Self {
        Self {
            total_bytes: persisted.total_bytes,
            per_request_origin: persisted.per_request_origin,
            per_tab_bytes: persisted.per_tab_bytes,
            warned: persisted.warned,
            paused: persisted.paused,
        }
    }
}

/// Which first-party origins have been seen using a third-party service
/// origin. Grows within a reset period, cleared on reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceUsageMap {
    entries: HashMap<String, BTreeSet<String>>,
}

impl ServiceUsageMap {
    pub fn record(&mut self, service: &str, consumer: &str) -> bool {
        self.entries
            .entry(service.to_string())
            .or_default()
            .insert(consumer.to_string())
    }

    pub fn consumers(&self, service: &str) -> Option<&BTreeSet<String>> {
        self.entries.get(service)
    }

    /// The singular-user heuristic: an answer only when exactly one consumer
    /// is known for the service.
    pub fn sole_consumer(&self, service: &str) -> Option<&str> {
        let consumers = self.entries.get(service)?;
        if consumers.len() == 1 {
            consumers.iter().next().map(String::as_str)
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn to_persisted(&self) -> BTreeMap<String, Vec<String>> {
        self.entries
            .iter()
            .map(|(service, consumers)| (service.clone(), consumers.iter().cloned().collect()))
            .collect()
    }

    pub fn from_persisted(persisted: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            entries: persisted
                .into_iter()
                .map(|(service, consumers)| (service, consumers.into_iter().collect()))
                .collect(),
        }
    }
}

/// User-configurable settings, stored durably in their wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub reset_day: u32,
    #[serde(rename = "resetPeriod")]
    pub reset_period_days: u32,
    pub soft_pause_enabled: bool,
    pub always_compare: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reset_day: 1,
            reset_period_days: 30,
            soft_pause_enabled: false,
            always_compare: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseContext<'a> {
    pub request_host: &'a str,
    pub initiator_host: Option<&'a str>,
    /// Top-level origin of the owning tab, when the tab still resolves.
    pub tab_origin: Option<&'a str>,
    /// True when the initiator is this service's own origin.
    pub from_self: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribution {
    Responsible(String),
    Discard,
}

/// Resolves the origin responsible for a completed response. Fallback order:
/// owning tab's origin, then the initiator, then the sole known consumer of
/// the request's origin, then the request's own origin. Self-initiated
/// traffic is discarded entirely.
pub fn attribute(ctx: &ResponseContext<'_>, services: &ServiceUsageMap) -> Attribution {
    if ctx.from_self {
        return Attribution::Discard;
    }
    if let Some(tab_origin) = ctx.tab_origin {
        return Attribution::Responsible(tab_origin.to_string());
    }
    if let Some(initiator) = ctx.initiator_host {
        return Attribution::Responsible(initiator.to_string());
    }
    if let Some(consumer) = services.sole_consumer(ctx.request_host) {
        return Attribution::Responsible(consumer.to_string());
    }
    Attribution::Responsible(ctx.request_host.to_string())
}

/// Deterministic rule id for an origin, stable across restarts and bounded to
/// the rule engine's id space. Distinct origins can collide; a collision makes
/// their block rules interfere and is not corrected here.
pub fn rule_id(origin: &str) -> i32 {
    let mut hash: i32 = 0;
    for unit in origin.encode_utf16() {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(unit as i32);
    }
    (hash % RULE_ID_RANGE).abs() + 1
}

pub fn soft_rule_id(origin: &str) -> i32 {
    SOFT_RULE_ID_OFFSET + rule_id(origin)
}
