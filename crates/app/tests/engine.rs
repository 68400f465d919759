use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use meter_app::{
    DynamicRules, Engine, MeterConfig, Notice, Notifier, ResponseEvent, RuleEngine, RuleError,
    TabEvent, Task,
};
use meter_app::{BlockRule, scheduler};
use meter_core::{
    PAUSE_THRESHOLD_BYTES, SOFT_RULE_ID_OFFSET, WARNING_THRESHOLD_BYTES, rule_id, soft_rule_id,
};

#[derive(Clone, Default)]
struct RecordingNotifier {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&mut self, notice: Notice) {
        self.notices.lock().expect("notices lock").push(notice);
    }
}

impl RecordingNotifier {
    fn taken(&self) -> Vec<Notice> {
        self.notices.lock().expect("notices lock").clone()
    }
}

/// Rule backend whose updates can be made to fail on demand.
struct FlakyRules {
    inner: DynamicRules,
    failing: Arc<AtomicBool>,
}

impl RuleEngine for FlakyRules {
    fn add_rule(&mut self, rule: BlockRule) -> Result<(), RuleError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RuleError("injected failure".to_string()));
        }
        self.inner.add_rule(rule)
    }

    fn remove_rule(&mut self, id: i32) -> Result<(), RuleError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RuleError("injected failure".to_string()));
        }
        self.inner.remove_rule(id)
    }

    fn rules(&self) -> Vec<BlockRule> {
        self.inner.rules()
    }
}

struct TestEngine {
    _dir: TempDir,
    engine: Engine,
    notifier: RecordingNotifier,
    db_path: PathBuf,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0)
        .single()
        .expect("valid time")
}

fn setup_engine() -> TestEngine {
    let dir = tempfile::tempdir().expect("temp dir");
    let db_path = dir.path().join("meter.sqlite");
    let mut db = meter_db::Db::open(&db_path).expect("open db");
    db.migrate().expect("migrate db");
    drop(db);

    let notifier = RecordingNotifier::default();
    let engine = Engine::new(
        MeterConfig {
            db_path: db_path.clone(),
            self_origin: Some("meter.internal".to_string()),
        },
        Box::new(DynamicRules::new()),
        Box::new(notifier.clone()),
        t0(),
    )
    .expect("engine");
    TestEngine {
        _dir: dir,
        engine,
        notifier,
        db_path,
    }
}

fn response(url: &str, initiator: Option<&str>, tab_id: Option<i64>, bytes: u64) -> ResponseEvent {
    ResponseEvent {
        url: url.to_string(),
        initiator: initiator.map(str::to_string),
        tab_id,
        content_length: Some(bytes),
    }
}

fn open_tab(engine: &mut Engine, tab_id: i64, url: &str, active: bool) {
    engine
        .handle_tab_event(
            TabEvent::Navigated {
                tab_id,
                url: url.to_string(),
                window_id: 1,
                active,
                transition: Some("link".to_string()),
            },
            t0(),
        )
        .expect("tab event");
}

#[test]
fn third_party_traffic_is_attributed_to_the_tab_origin() {
    let mut test = setup_engine();
    let engine = &mut test.engine;
    open_tab(engine, 7, "https://shop.example/cart", true);

    engine.observe_response(
        &response(
            "https://cdn.example/bundle.js",
            Some("https://cdn.example"),
            Some(7),
            2_000_000,
        ),
        t0(),
    );

    let totals = engine.usage_totals();
    assert_eq!(totals.get("shop.example"), Some(&2_000_000));
    assert_eq!(totals.get("cdn.example"), None);
    assert_eq!(
        engine.service_consumers("cdn.example"),
        vec!["shop.example".to_string()]
    );
}

#[test]
fn attribution_falls_back_through_initiator_and_service_map() {
    let mut test = setup_engine();
    let engine = &mut test.engine;

    // Learn cdn.example -> shop.example while the tab is open.
    open_tab(engine, 7, "https://shop.example/", true);
    engine.observe_response(&response("https://cdn.example/a.js", None, Some(7), 100), t0());

    // Tab gone, initiator present: the initiator wins.
    engine
        .handle_tab_event(TabEvent::Removed { tab_id: 7 }, t0())
        .expect("remove tab");
    engine.observe_response(
        &response(
            "https://cdn.example/b.js",
            Some("https://news.example"),
            Some(7),
            200,
        ),
        t0(),
    );
    assert_eq!(engine.usage_totals().get("news.example"), Some(&200));

    // No tab, no initiator: the sole known consumer wins.
    engine.observe_response(&response("https://cdn.example/c.js", None, None, 300), t0());
    assert_eq!(engine.usage_totals().get("shop.example"), Some(&400));

    // Unknown service with no context falls back to itself.
    engine.observe_response(&response("https://tracker.example/px", None, None, 50), t0());
    assert_eq!(engine.usage_totals().get("tracker.example"), Some(&50));
}

#[test]
fn self_initiated_and_unparseable_responses_are_dropped() {
    let mut test = setup_engine();
    let engine = &mut test.engine;

    engine.observe_response(
        &response(
            "https://api.example/poll",
            Some("https://meter.internal"),
            None,
            5_000,
        ),
        t0(),
    );
    engine.observe_response(&response("not a url", None, None, 5_000), t0());

    assert!(engine.usage_totals().is_empty());
    assert!(!engine.is_dirty());
}

#[test]
fn paused_origins_accrue_no_usage() {
    let mut test = setup_engine();
    let engine = &mut test.engine;
    open_tab(engine, 1, "https://shop.example/", true);

    engine.observe_response(&response("https://shop.example/a", None, Some(1), 1_000), t0());
    engine.pause("shop.example").expect("pause");
    engine.observe_response(&response("https://shop.example/b", None, Some(1), 9_999), t0());

    assert_eq!(engine.usage_totals().get("shop.example"), Some(&1_000));
}

#[test]
fn pause_is_idempotent_and_round_trips() {
    let mut test = setup_engine();
    let engine = &mut test.engine;

    engine.pause("ads.example").expect("pause");
    let paused_once = engine.paused_origins();
    let rules_once = engine.installed_rules();

    engine.pause("ads.example").expect("re-pause");
    assert_eq!(engine.paused_origins(), paused_once);
    assert_eq!(engine.installed_rules(), rules_once);
    assert_eq!(rules_once.len(), 1);
    assert_eq!(rules_once[0].id, rule_id("ads.example"));

    engine.unpause("ads.example").expect("unpause");
    assert!(engine.paused_origins().is_empty());
    assert!(engine.installed_rules().is_empty());

    engine.unpause("ads.example").expect("unpause again");
    assert!(engine.paused_origins().is_empty());
}

#[test]
fn empty_domain_is_rejected() {
    let mut test = setup_engine();
    assert!(test.engine.pause("   ").is_err());
}

#[test]
fn threshold_notices_fire_once_per_crossing() {
    let mut test = setup_engine();
    let engine = &mut test.engine;
    open_tab(engine, 1, "https://big.example/", true);

    engine.observe_response(
        &response(
            "https://big.example/blob",
            None,
            Some(1),
            WARNING_THRESHOLD_BYTES + 1,
        ),
        t0(),
    );
    engine.observe_response(&response("https://big.example/blob", None, Some(1), 1), t0());
    engine.observe_response(
        &response(
            "https://big.example/blob",
            None,
            Some(1),
            PAUSE_THRESHOLD_BYTES,
        ),
        t0(),
    );
    engine.observe_response(&response("https://big.example/blob", None, Some(1), 1), t0());

    let notices = test.notifier.taken();
    let warnings = notices
        .iter()
        .filter(|notice| matches!(notice, Notice::HighUsage { .. }))
        .count();
    let prompts = notices
        .iter()
        .filter(|notice| matches!(notice, Notice::PauseRecommended { .. }))
        .count();
    assert_eq!(warnings, 1);
    assert_eq!(prompts, 1);
}

#[test]
fn flush_persists_and_a_new_engine_reloads_state() {
    let mut test = setup_engine();
    {
        let engine = &mut test.engine;
        engine.pause("ads.example").expect("pause");
        open_tab(engine, 1, "https://shop.example/", true);
        engine.observe_response(&response("https://cdn.example/x", None, Some(1), 1_234), t0());
        assert!(engine.is_dirty());

        // The 2s flush task clears the dirty flag.
        engine.tick(t0() + Duration::seconds(scheduler::FLUSH_INTERVAL_SECS));
        assert!(!engine.is_dirty());
    }

    let reloaded = Engine::with_defaults(MeterConfig {
        db_path: test.db_path.clone(),
        self_origin: None,
    })
    .expect("reload engine");
    assert_eq!(reloaded.usage_totals().get("shop.example"), Some(&1_234));
    assert_eq!(reloaded.paused_origins(), vec!["ads.example".to_string()]);
    assert_eq!(
        reloaded.service_consumers("cdn.example"),
        vec!["shop.example".to_string()]
    );
    // Block rules are reinstalled from the durable pause set on startup.
    assert_eq!(reloaded.installed_rules().len(), 1);
}

#[test]
fn reset_archives_totals_and_preserves_the_pause_set() {
    let mut test = setup_engine();
    let engine = &mut test.engine;
    open_tab(engine, 1, "https://shop.example/", true);
    engine.observe_response(&response("https://cdn.example/x", None, Some(1), 5_000), t0());
    engine.pause("ads.example").expect("pause");

    let archived = engine.reset(t0()).expect("reset");
    assert_eq!(archived, 5_000);
    assert!(engine.usage_totals().is_empty());
    assert!(engine.service_consumers("cdn.example").is_empty());
    assert_eq!(engine.paused_origins(), vec!["ads.example".to_string()]);

    let snapshot = engine.usage_snapshot(t0());
    assert_eq!(snapshot.last_period_bytes, 5_000);
    assert!(snapshot.last_reset.is_some());
}

#[test]
fn reset_check_task_resets_when_the_period_elapsed() {
    let mut test = setup_engine();
    let engine = &mut test.engine;

    // Anchor the period via first-time settings save.
    engine
        .put_settings(
            &meter_app::SettingsUpdate {
                reset_day: Some(1),
                reset_period_days: Some(30),
                ..Default::default()
            },
            t0(),
        )
        .expect("settings");
    open_tab(engine, 1, "https://shop.example/", true);
    engine.observe_response(&response("https://shop.example/x", None, Some(1), 700), t0());

    // Well past the period and past the reset day.
    engine.tick(t0() + Duration::days(40));
    assert!(engine.usage_totals().is_empty());
    let snapshot = engine.usage_snapshot(t0() + Duration::days(40));
    assert_eq!(snapshot.last_period_bytes, 700);
}

#[test]
fn background_activity_prompts_after_five_minutes() {
    let mut test = setup_engine();
    let engine = &mut test.engine;
    open_tab(engine, 1, "https://feed.example/", false);

    engine.observe_response(&response("https://feed.example/poll", None, Some(1), 10), t0());
    assert_eq!(engine.background_origins(), vec!["feed.example".to_string()]);

    // One sweep before the deadline: nothing yet.
    engine.tick(t0() + Duration::seconds(scheduler::BACKGROUND_SWEEP_INTERVAL_SECS));
    assert_eq!(engine.background_origins(), vec!["feed.example".to_string()]);

    engine.tick(t0() + Duration::seconds(meter_app::BACKGROUND_PROMPT_AFTER_SECS + 60));
    assert!(engine.background_origins().is_empty());
    assert!(
        test.notifier
            .taken()
            .iter()
            .any(|notice| matches!(notice, Notice::BackgroundActivity { origin, .. } if origin == "feed.example"))
    );
}

#[test]
fn foregrounding_a_tab_clears_its_background_record() {
    let mut test = setup_engine();
    let engine = &mut test.engine;
    open_tab(engine, 1, "https://feed.example/", false);
    engine.observe_response(&response("https://feed.example/poll", None, Some(1), 10), t0());

    engine
        .handle_tab_event(TabEvent::Activated { tab_id: 1 }, t0())
        .expect("activate");
    assert!(engine.background_origins().is_empty());
}

#[test]
fn reloading_a_paused_origin_grants_a_grace_period_then_repauses() {
    let mut test = setup_engine();
    let engine = &mut test.engine;
    engine.pause("shop.example").expect("pause");

    engine
        .handle_tab_event(
            TabEvent::Navigated {
                tab_id: 1,
                url: "https://shop.example/".to_string(),
                window_id: 1,
                active: true,
                transition: Some("reload".to_string()),
            },
            t0(),
        )
        .expect("navigate");

    assert!(engine.paused_origins().is_empty());
    assert!(engine.installed_rules().is_empty());
    assert!(
        engine
            .pending_tasks()
            .iter()
            .any(|(_, task)| matches!(task, Task::Repause { origin } if origin == "shop.example"))
    );

    engine.tick(t0() + Duration::seconds(meter_app::REPAUSE_DELAY_SECS));
    assert_eq!(engine.paused_origins(), vec!["shop.example".to_string()]);
    assert_eq!(engine.installed_rules().len(), 1);
}

#[test]
fn soft_pause_overlays_inactive_origins_only() {
    let mut test = setup_engine();
    let engine = &mut test.engine;
    open_tab(engine, 1, "https://shop.example/", true);
    engine.observe_response(&response("https://shop.example/x", None, Some(1), 100), t0());

    engine.toggle_soft_pause(true).expect("enable soft pause");
    // An active tab exists, so no overlay yet.
    assert!(engine.installed_rules().is_empty());

    // Another window takes focus away in the same window id space.
    engine
        .handle_tab_event(
            TabEvent::Navigated {
                tab_id: 2,
                url: "https://other.example/".to_string(),
                window_id: 1,
                active: true,
                transition: Some("link".to_string()),
            },
            t0(),
        )
        .expect("navigate");

    let rules = engine.installed_rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].id, soft_rule_id("shop.example"));
    assert!(rules[0].id > SOFT_RULE_ID_OFFSET);

    // Activating the origin's tab lifts the overlay again.
    engine
        .handle_tab_event(TabEvent::Activated { tab_id: 1 }, t0())
        .expect("activate");
    assert!(engine.installed_rules().is_empty());
}

#[test]
fn auto_pause_scheduling_validates_and_fires_daily() {
    let mut test = setup_engine();
    let engine = &mut test.engine;

    assert!(engine.set_auto_pause("shop.example", "25:99", t0()).is_err());
    assert!(engine.set_auto_pause("shop.example", "evening", t0()).is_err());

    engine
        .set_auto_pause("shop.example", "22:30", t0())
        .expect("schedule");
    let pending: Vec<Task> = engine
        .pending_tasks()
        .into_iter()
        .map(|(_, task)| task)
        .collect();
    assert!(
        pending
            .iter()
            .any(|task| matches!(task, Task::AutoPause { origin } if origin == "shop.example"))
    );

    // Re-scheduling replaces rather than stacks.
    engine
        .set_auto_pause("shop.example", "23:00", t0())
        .expect("reschedule");
    let count = engine
        .pending_tasks()
        .iter()
        .filter(|(_, task)| matches!(task, Task::AutoPause { origin } if origin == "shop.example"))
        .count();
    assert_eq!(count, 1);

    // A day later the pause has fired.
    engine.tick(t0() + Duration::days(1));
    assert_eq!(engine.paused_origins(), vec!["shop.example".to_string()]);

    engine.cancel_all_auto_pause();
    assert!(
        !engine
            .pending_tasks()
            .iter()
            .any(|(_, task)| matches!(task, Task::AutoPause { .. }))
    );
}

#[test]
fn rule_engine_failure_surfaces_and_is_reconciled_by_the_next_pause() {
    let dir = tempfile::tempdir().expect("temp dir");
    let db_path = dir.path().join("meter.sqlite");
    let mut db = meter_db::Db::open(&db_path).expect("open db");
    db.migrate().expect("migrate db");
    drop(db);

    let failing = Arc::new(AtomicBool::new(true));
    let mut engine = Engine::new(
        MeterConfig {
            db_path,
            self_origin: None,
        },
        Box::new(FlakyRules {
            inner: DynamicRules::new(),
            failing: failing.clone(),
        }),
        Box::new(RecordingNotifier::default()),
        t0(),
    )
    .expect("engine");

    assert!(engine.pause("ads.example").is_err());
    // The pause set is already updated: transiently inconsistent with
    // enforcement until a later call succeeds.
    assert_eq!(engine.paused_origins(), vec!["ads.example".to_string()]);
    assert!(engine.installed_rules().is_empty());

    failing.store(false, Ordering::SeqCst);
    engine.pause("ads.example").expect("retry pause");
    assert_eq!(engine.installed_rules().len(), 1);
}

#[test]
fn clear_all_wipes_usage_and_pauses_but_keeps_settings() {
    let mut test = setup_engine();
    let engine = &mut test.engine;
    engine
        .put_settings(
            &meter_app::SettingsUpdate {
                reset_day: Some(12),
                ..Default::default()
            },
            t0(),
        )
        .expect("settings");
    open_tab(engine, 1, "https://shop.example/", true);
    engine.observe_response(&response("https://shop.example/x", None, Some(1), 400), t0());
    engine.pause("ads.example").expect("pause");

    engine.clear_all().expect("clear");
    assert!(engine.usage_totals().is_empty());
    assert!(engine.paused_origins().is_empty());
    assert!(engine.installed_rules().is_empty());
    assert_eq!(engine.settings().reset_day, 12);

    let snapshot = engine.usage_snapshot(t0());
    assert!(snapshot.setup_complete);
    assert_eq!(snapshot.total_bytes, 0);
    assert_eq!(snapshot.last_period_bytes, 0);
}

#[test]
fn snapshot_lists_paused_origins_without_usage_and_compares_periods() {
    let mut test = setup_engine();
    let engine = &mut test.engine;
    open_tab(engine, 1, "https://shop.example/", true);
    engine.observe_response(&response("https://shop.example/x", None, Some(1), 4_000), t0());
    engine.pause("ads.example").expect("pause");

    engine.reset(t0()).expect("reset");
    engine.observe_response(&response("https://shop.example/x", None, Some(1), 1_000), t0());

    let snapshot = engine.usage_snapshot(t0());
    let domains: Vec<&str> = snapshot
        .domains
        .iter()
        .map(|domain| domain.domain.as_str())
        .collect();
    assert!(domains.contains(&"shop.example"));
    assert!(domains.contains(&"ads.example"));
    let ads = snapshot
        .domains
        .iter()
        .find(|domain| domain.domain == "ads.example")
        .expect("ads row");
    assert!(ads.paused);
    assert_eq!(ads.total_bytes, 0);

    // 1000 now vs 4000 last period: -75%.
    let change = snapshot.change_vs_last_period_pct.expect("comparison");
    assert!((change - -75.0).abs() < 1e-9);
}

#[test]
fn tab_info_reports_open_tabs_and_top_consumer() {
    let mut test = setup_engine();
    let engine = &mut test.engine;
    open_tab(engine, 1, "https://shop.example/", true);
    open_tab(engine, 2, "https://shop.example/other", false);

    engine.observe_response(&response("https://shop.example/a", None, Some(1), 100), t0());
    engine.observe_response(&response("https://shop.example/b", None, Some(2), 900), t0());

    let info = engine.tab_info();
    let shop = info.get("shop.example").expect("shop entry");
    assert_eq!(shop.tabs.len(), 2);
    let top = shop.top_tab.as_ref().expect("top tab");
    assert_eq!(top.tab_id, 2);
    assert_eq!(top.total_bytes, 900);
}
