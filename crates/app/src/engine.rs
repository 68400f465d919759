use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Local, SecondsFormat, Utc};
use serde::Serialize;
use url::Url;

use crate::error::{AppError, Result};
use crate::notify::{LogNotifier, Notice, Notifier};
use crate::rules::{BlockRule, DynamicRules, RuleEngine, hard_block_rule, soft_block_rule};
use crate::scheduler::{Scheduler, Task};
use crate::settings::{self, SettingsUpdate};
use crate::state::LedgerState;
use crate::tabs::TabRegistry;
use crate::util::time::{next_occurrence, parse_wall_clock, period_day, reset_due};
use meter_core::{
    Attribution, ResponseContext, Settings, TabId, ThresholdCrossing, attribute, rule_id,
    soft_rule_id,
};
use meter_db::Db;

/// Background traffic older than this triggers a proactive pause prompt.
pub const BACKGROUND_PROMPT_AFTER_SECS: i64 = 300;
/// Grace period after a deliberate navigation to a paused origin.
pub const REPAUSE_DELAY_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct MeterConfig {
    pub db_path: PathBuf,
    /// Requests initiated by this host are the meter's own and never counted.
    pub self_origin: Option<String>,
}

/// A completed network response, as reported by the observer feed. Sizes come
/// from the content-length header, a proxy rather than an exact count.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub url: String,
    pub initiator: Option<String>,
    pub tab_id: Option<TabId>,
    pub content_length: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum TabEvent {
    /// A committed main-frame navigation.
    Navigated {
        tab_id: TabId,
        url: String,
        window_id: i64,
        active: bool,
        transition: Option<String>,
    },
    Activated {
        tab_id: TabId,
    },
    Removed {
        tab_id: TabId,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainUsage {
    pub domain: String,
    pub total_bytes: u64,
    pub paused: bool,
    pub warned: bool,
    pub per_request_origin: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    pub domains: Vec<DomainUsage>,
    pub total_bytes: u64,
    pub last_period_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_vs_last_period_pct: Option<f64>,
    pub period_day: u32,
    pub period_length_days: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reset: Option<String>,
    pub setup_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TabRef {
    pub tab_id: TabId,
    pub window_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopTab {
    pub tab_id: TabId,
    pub window_id: i64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainTabs {
    pub tabs: Vec<TabRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_tab: Option<TopTab>,
}

/// Single owner of the ledger. Every mutating entry point is a synchronous
/// `&mut self` method, so a multi-step update can never be observed half
/// done from the async boundary above.
pub struct Engine {
    config: MeterConfig,
    state: LedgerState,
    tabs: TabRegistry,
    scheduler: Scheduler,
    rules: Box<dyn RuleEngine>,
    notifier: Box<dyn Notifier>,
    settings: Settings,
}

impl Engine {
    /// Loads all durable state before returning; nothing can reach the engine
    /// until this completes, which is the startup ordering guarantee.
    pub fn new(
        config: MeterConfig,
        rules: Box<dyn RuleEngine>,
        notifier: Box<dyn Notifier>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let db = Db::open(&config.db_path)?;
        let state = LedgerState::load(&db)?;
        let settings = db.load_settings()?;
        let mut engine = Self {
            config,
            state,
            tabs: TabRegistry::default(),
            scheduler: Scheduler::with_defaults(now),
            rules,
            notifier,
            settings,
        };
        engine.reinstall_rules();
        Ok(engine)
    }

    pub fn with_defaults(config: MeterConfig) -> Result<Self> {
        Self::new(
            config,
            Box::new(DynamicRules::new()),
            Box::new(LogNotifier),
            Utc::now(),
        )
    }

    fn db(&self) -> Result<Db> {
        Ok(Db::open(&self.config.db_path)?)
    }

    /// The rule backend starts empty on boot; paused origins get their block
    /// rules re-installed from the durable pause set.
    fn reinstall_rules(&mut self) {
        for origin in self.state.paused.clone() {
            if let Err(err) = self.rules.add_rule(hard_block_rule(&origin)) {
                tracing::warn!(%origin, %err, "failed to reinstall block rule");
            }
        }
    }

    pub fn observe_response(&mut self, event: &ResponseEvent, now: DateTime<Utc>) {
        let Some(request_host) = host_of(&event.url) else {
            return;
        };
        let initiator_host = event.initiator.as_deref().and_then(host_of);
        let from_self = match (&initiator_host, &self.config.self_origin) {
            (Some(initiator), Some(own)) => initiator == own,
            _ => false,
        };
        let tab_origin = event
            .tab_id
            .and_then(|tab_id| self.tabs.origin_of(tab_id))
            .map(str::to_string);

        let ctx = ResponseContext {
            request_host: &request_host,
            initiator_host: initiator_host.as_deref(),
            tab_origin: tab_origin.as_deref(),
            from_self,
        };
        let responsible = match attribute(&ctx, &self.state.services) {
            Attribution::Responsible(origin) => origin,
            Attribution::Discard => return,
        };

        if let Some(tab_origin) = &tab_origin
            && tab_origin != &request_host
            && self.state.services.record(&request_host, tab_origin)
        {
            self.state.mark_dirty();
        }

        if self.state.paused.contains(&responsible) {
            return;
        }

        let bytes = event.content_length.unwrap_or(0);
        if bytes > 0 {
            let crossing;
            let total;
            {
                let record = self.state.usage.entry(responsible.clone()).or_default();
                record.add_bytes(&request_host, bytes, event.tab_id);
                crossing = record.threshold_crossing();
                total = record.total_bytes;
            }
            self.state.mark_dirty();
            match crossing {
                Some(ThresholdCrossing::Warning) => self.notifier.notify(Notice::HighUsage {
                    origin: responsible.clone(),
                    total_bytes: total,
                }),
                Some(ThresholdCrossing::PausePrompt) => {
                    self.notifier.notify(Notice::PauseRecommended {
                        origin: responsible.clone(),
                        total_bytes: total,
                    })
                }
                None => {}
            }
        }

        if let Some(tab_id) = event.tab_id
            && let Some(tab) = self.tabs.get(tab_id)
            && !tab.active
        {
            self.state.background.entry(responsible).or_insert(now);
        }
    }

    pub fn handle_tab_event(&mut self, event: TabEvent, now: DateTime<Utc>) -> Result<()> {
        match event {
            TabEvent::Navigated {
                tab_id,
                url,
                window_id,
                active,
                transition,
            } => {
                let origin = host_of(&url);
                self.tabs.navigated(tab_id, origin.clone(), window_id, active);
                if let Some(origin) = &origin {
                    if active {
                        self.state.background.remove(origin);
                    }
                    let fresh_load =
                        matches!(transition.as_deref(), Some("reload") | Some("start_page"));
                    if fresh_load && self.state.paused.contains(origin) {
                        self.unpause(origin)?;
                        self.scheduler.schedule(
                            now + Duration::seconds(REPAUSE_DELAY_SECS),
                            Task::Repause {
                                origin: origin.clone(),
                            },
                        );
                    }
                }
            }
            TabEvent::Activated { tab_id } => {
                if let Some(origin) = self.tabs.activated(tab_id) {
                    self.state.background.remove(&origin);
                }
            }
            TabEvent::Removed { tab_id } => {
                self.tabs.removed(tab_id);
            }
        }
        self.refresh_soft_pause();
        Ok(())
    }

    /// Idempotent for already-paused origins, but the rule install is always
    /// re-issued so an earlier rule-engine failure gets reconciled.
    pub fn pause(&mut self, origin: &str) -> Result<()> {
        let origin = normalize_origin(origin)?;
        if self.state.paused.insert(origin.clone()) {
            self.state.mark_dirty();
            self.flush()?;
        }
        if let Err(err) = self.rules.add_rule(hard_block_rule(&origin)) {
            tracing::error!(%origin, %err, "failed to install block rule");
            return Err(err.into());
        }
        if let Err(err) = self.rules.remove_rule(soft_rule_id(&origin)) {
            tracing::warn!(%origin, %err, "failed to drop soft rule");
        }
        Ok(())
    }

    pub fn unpause(&mut self, origin: &str) -> Result<()> {
        let origin = normalize_origin(origin)?;
        if self.state.paused.remove(&origin) {
            self.state.mark_dirty();
            self.flush()?;
        }
        if let Err(err) = self.rules.remove_rule(rule_id(&origin)) {
            tracing::error!(%origin, %err, "failed to remove block rule");
            return Err(err.into());
        }
        Ok(())
    }

    pub fn set_auto_pause(&mut self, origin: &str, time: &str, now: DateTime<Utc>) -> Result<()> {
        let origin = normalize_origin(origin)?;
        let at = parse_wall_clock(time)?;
        let first = next_occurrence(now.with_timezone(&Local), at)
            .ok_or_else(|| AppError::InvalidInput(format!("no valid occurrence for {time:?}")))?
            .with_timezone(&Utc);
        self.scheduler
            .cancel(|task| matches!(task, Task::AutoPause { origin: o } if *o == origin));
        self.scheduler
            .schedule_every(first, Duration::days(1), Task::AutoPause { origin });
        Ok(())
    }

    pub fn cancel_auto_pause(&mut self, origin: &str) -> Result<()> {
        let origin = normalize_origin(origin)?;
        self.scheduler
            .cancel(|task| matches!(task, Task::AutoPause { origin: o } if *o == origin));
        Ok(())
    }

    pub fn cancel_all_auto_pause(&mut self) {
        self.scheduler
            .cancel(|task| matches!(task, Task::AutoPause { .. }));
    }

    pub fn toggle_soft_pause(&mut self, enabled: bool) -> Result<()> {
        self.settings.soft_pause_enabled = enabled;
        self.db()?.save_settings(&self.settings)?;
        self.refresh_soft_pause();
        Ok(())
    }

    /// Best-effort overlay: block rules for known origins with no foreground
    /// tab, lifted again as soon as one activates. Never touches the durable
    /// pause set and never fails the caller.
    fn refresh_soft_pause(&mut self) {
        let known: Vec<String> = self.state.usage.keys().cloned().collect();
        for origin in known {
            let wants_rule = self.settings.soft_pause_enabled
                && !self.state.paused.contains(&origin)
                && !self.tabs.has_active_tab(&origin);
            let outcome = if wants_rule {
                self.rules.add_rule(soft_block_rule(&origin))
            } else {
                self.rules.remove_rule(soft_rule_id(&origin))
            };
            if let Err(err) = outcome {
                tracing::warn!(%origin, %err, "soft pause rule update failed");
            }
        }
    }

    pub fn clear_all(&mut self) -> Result<()> {
        for origin in self.state.paused.clone() {
            if let Err(err) = self.rules.remove_rule(rule_id(&origin)) {
                tracing::warn!(%origin, %err, "failed to remove block rule during clear");
            }
        }
        let soft_ids: Vec<i32> = self
            .state
            .usage
            .keys()
            .map(|origin| soft_rule_id(origin))
            .collect();
        for id in soft_ids {
            if let Err(err) = self.rules.remove_rule(id) {
                tracing::warn!(id, %err, "failed to remove soft rule during clear");
            }
        }
        self.state.usage.clear();
        self.state.services.clear();
        self.state.background.clear();
        self.state.paused.clear();
        self.state.last_month_usage = 0;
        self.state.mark_dirty();
        self.flush()
    }

    /// Ends the current usage period: archives the grand total for the
    /// next-period comparison, clears the ledger and the learned service map,
    /// and stamps the new anchor. The pause set survives.
    pub fn reset(&mut self, now: DateTime<Utc>) -> Result<u64> {
        let grand_total = self.state.grand_total();
        self.state.last_month_usage = grand_total;
        self.state.usage.clear();
        self.state.services.clear();
        self.state.background.clear();
        self.state.last_reset = Some(now);
        self.state.mark_dirty();
        self.flush()?;
        Ok(grand_total)
    }

    pub fn flush(&mut self) -> Result<()> {
        if !self.state.is_dirty() {
            return Ok(());
        }
        let mut db = self.db()?;
        self.state.flush(&mut db)
    }

    pub fn put_settings(&mut self, update: &SettingsUpdate, now: DateTime<Utc>) -> Result<Settings> {
        settings::apply_update(&mut self.settings, update)?;
        self.db()?.save_settings(&self.settings)?;
        if !self.state.setup_complete {
            self.state.setup_complete = true;
            if self.state.last_reset.is_none() {
                self.state.last_reset = Some(now);
            }
            self.state.mark_dirty();
            self.flush()?;
        }
        self.refresh_soft_pause();
        Ok(self.settings.clone())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn setup_complete(&self) -> bool {
        self.state.setup_complete
    }

    /// Drains due scheduler tasks. Task failures are logged, never fatal; a
    /// failed flush leaves the dirty flag set for the next cycle.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        for task in self.scheduler.due(now) {
            let outcome = match task {
                Task::Flush => self.flush(),
                Task::BackgroundSweep => {
                    self.sweep_background(now);
                    Ok(())
                }
                Task::ResetCheck => {
                    if reset_due(now, self.state.last_reset, &self.settings) {
                        self.reset(now).map(|_| ())
                    } else {
                        Ok(())
                    }
                }
                Task::AutoPause { origin } | Task::Repause { origin } => self.pause(&origin),
            };
            if let Err(err) = outcome {
                tracing::warn!(%err, "scheduled task failed");
            }
        }
    }

    fn sweep_background(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(BACKGROUND_PROMPT_AFTER_SECS);
        let expired: Vec<(String, DateTime<Utc>)> = self
            .state
            .background
            .iter()
            .filter(|(_, first_seen)| **first_seen < cutoff)
            .map(|(origin, first_seen)| (origin.clone(), *first_seen))
            .collect();
        for (origin, since) in expired {
            self.state.background.remove(&origin);
            self.notifier
                .notify(Notice::BackgroundActivity { origin, since });
        }
    }

    pub fn usage_totals(&self) -> BTreeMap<String, u64> {
        self.state
            .usage
            .iter()
            .map(|(origin, record)| (origin.clone(), record.total_bytes))
            .collect()
    }

    pub fn usage_snapshot(&self, now: DateTime<Utc>) -> UsageSnapshot {
        let mut domains: Vec<DomainUsage> = Vec::new();
        for (origin, record) in &self.state.usage {
            domains.push(DomainUsage {
                domain: origin.clone(),
                total_bytes: record.total_bytes,
                paused: self.state.paused.contains(origin),
                warned: record.warned,
                per_request_origin: record.per_request_origin.clone(),
            });
        }
        for origin in &self.state.paused {
            if !self.state.usage.contains_key(origin) {
                domains.push(DomainUsage {
                    domain: origin.clone(),
                    total_bytes: 0,
                    paused: true,
                    warned: false,
                    per_request_origin: BTreeMap::new(),
                });
            }
        }
        domains.sort_by(|a, b| {
            b.total_bytes
                .cmp(&a.total_bytes)
                .then_with(|| a.domain.cmp(&b.domain))
        });

        let total_bytes = self.state.grand_total();
        let last = self.state.last_month_usage;
        let show_comparison = last > 0 && (self.settings.always_compare || total_bytes > 0);
        let change_vs_last_period_pct = show_comparison
            .then(|| ((total_bytes as f64 - last as f64) / last as f64) * 100.0);

        UsageSnapshot {
            domains,
            total_bytes,
            last_period_bytes: last,
            change_vs_last_period_pct,
            period_day: period_day(now, self.settings.reset_day),
            period_length_days: self.settings.reset_period_days,
            last_reset: self
                .state
                .last_reset
                .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            setup_complete: self.state.setup_complete,
        }
    }

    /// Per-origin open tabs plus the top consumer by that origin's per-tab
    /// byte counters, for the tab-correlation view.
    pub fn tab_info(&self) -> BTreeMap<String, DomainTabs> {
        let mut info = BTreeMap::new();
        for (origin, tabs) in self.tabs.by_origin() {
            let per_tab = self
                .state
                .usage
                .get(&origin)
                .map(|record| record.per_tab_bytes.clone())
                .unwrap_or_default();
            let top_tab = tabs
                .iter()
                .filter_map(|(tab_id, tab)| {
                    per_tab
                        .get(tab_id)
                        .map(|bytes| (*tab_id, tab.window_id, *bytes))
                })
                .max_by_key(|(_, _, bytes)| *bytes)
                .map(|(tab_id, window_id, total_bytes)| TopTab {
                    tab_id,
                    window_id,
                    total_bytes,
                });
            info.insert(
                origin,
                DomainTabs {
                    tabs: tabs
                        .iter()
                        .map(|(tab_id, tab)| TabRef {
                            tab_id: *tab_id,
                            window_id: tab.window_id,
                        })
                        .collect(),
                    top_tab,
                },
            );
        }
        info
    }

    pub fn service_consumers(&self, service: &str) -> Vec<String> {
        self.state
            .services
            .consumers(service)
            .map(|consumers| consumers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn paused_origins(&self) -> Vec<String> {
        self.state.paused.iter().cloned().collect()
    }

    pub fn installed_rules(&self) -> Vec<BlockRule> {
        self.rules.rules()
    }

    pub fn pending_tasks(&self) -> Vec<(DateTime<Utc>, Task)> {
        self.scheduler.pending()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    pub fn background_origins(&self) -> Vec<String> {
        self.state.background.keys().cloned().collect()
    }
}

fn host_of(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
}

fn normalize_origin(origin: &str) -> Result<String> {
    let trimmed = origin.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput("domain is required".to_string()));
    }
    Ok(trimmed.to_ascii_lowercase())
}
