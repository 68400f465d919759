use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

pub const FLUSH_INTERVAL_SECS: i64 = 2;
pub const BACKGROUND_SWEEP_INTERVAL_SECS: i64 = 60;
pub const RESET_CHECK_INTERVAL_SECS: i64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Flush,
    BackgroundSweep,
    ResetCheck,
    AutoPause { origin: String },
    Repause { origin: String },
}

#[derive(Debug, Clone)]
struct Entry {
    task: Task,
    every: Option<Duration>,
}

/// Pending timed work as an ordered queue. Entries can be listed, cancelled,
/// and drained with a synthetic clock.
#[derive(Debug, Default)]
pub struct Scheduler {
    queue: BTreeMap<(DateTime<Utc>, u64), Entry>,
    seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scheduler carrying the standing maintenance cadence.
    pub fn with_defaults(now: DateTime<Utc>) -> Self {
        let mut scheduler = Self::new();
        let flush = Duration::seconds(FLUSH_INTERVAL_SECS);
        let sweep = Duration::seconds(BACKGROUND_SWEEP_INTERVAL_SECS);
        let reset = Duration::seconds(RESET_CHECK_INTERVAL_SECS);
        scheduler.schedule_every(now + flush, flush, Task::Flush);
        scheduler.schedule_every(now + sweep, sweep, Task::BackgroundSweep);
        scheduler.schedule_every(now + reset, reset, Task::ResetCheck);
        scheduler
    }

    pub fn schedule(&mut self, at: DateTime<Utc>, task: Task) {
        self.insert(at, Entry { task, every: None });
    }

    pub fn schedule_every(&mut self, first_at: DateTime<Utc>, every: Duration, task: Task) {
        self.insert(
            first_at,
            Entry {
                task,
                every: Some(every),
            },
        );
    }

    fn insert(&mut self, at: DateTime<Utc>, entry: Entry) {
        let seq = self.seq;
        self.seq += 1;
        self.queue.insert((at, seq), entry);
    }

    pub fn cancel(&mut self, mut drop_task: impl FnMut(&Task) -> bool) {
        self.queue.retain(|_, entry| !drop_task(&entry.task));
    }

    /// Pops every task due at `now`, re-queueing recurring entries at their
    /// next future fire time (missed intervals are skipped, not replayed).
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<Task> {
        let mut ready = Vec::new();
        loop {
            let key = match self.queue.keys().next() {
                Some(&(at, seq)) if at <= now => (at, seq),
                _ => break,
            };
            if let Some(entry) = self.queue.remove(&key) {
                if let Some(every) = entry.every {
                    let mut next = key.0 + every;
                    while next <= now {
                        next = next + every;
                    }
                    self.insert(
                        next,
                        Entry {
                            task: entry.task.clone(),
                            every: Some(every),
                        },
                    );
                }
                ready.push(entry.task);
            }
        }
        ready
    }

    pub fn pending(&self) -> Vec<(DateTime<Utc>, Task)> {
        self.queue
            .iter()
            .map(|((at, _), entry)| (*at, entry.task.clone()))
            .collect()
    }

    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.queue.keys().next().map(|(at, _)| *at)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, 12, minute, second)
            .single()
            .expect("valid time")
    }

    #[test]
    fn due_returns_nothing_before_fire_time() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(at(1, 0), Task::Flush);
        assert!(scheduler.due(at(0, 59)).is_empty());
        assert_eq!(scheduler.due(at(1, 0)), vec![Task::Flush]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn recurring_tasks_requeue_and_skip_missed_intervals() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_every(at(0, 2), Duration::seconds(2), Task::Flush);

        assert_eq!(scheduler.due(at(0, 2)), vec![Task::Flush]);
        assert_eq!(scheduler.next_fire(), Some(at(0, 4)));

        // A long stall yields one firing, not a backlog.
        assert_eq!(scheduler.due(at(5, 0)), vec![Task::Flush]);
        assert_eq!(scheduler.next_fire(), Some(at(5, 2)));
    }

    #[test]
    fn due_preserves_scheduling_order_at_the_same_instant() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(at(1, 0), Task::BackgroundSweep);
        scheduler.schedule(at(1, 0), Task::ResetCheck);
        assert_eq!(
            scheduler.due(at(1, 0)),
            vec![Task::BackgroundSweep, Task::ResetCheck]
        );
    }

    #[test]
    fn cancel_removes_matching_tasks_only() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_every(at(1, 0), Duration::days(1), Task::AutoPause {
            origin: "a.example".to_string(),
        });
        scheduler.schedule_every(at(2, 0), Duration::days(1), Task::AutoPause {
            origin: "b.example".to_string(),
        });
        scheduler.cancel(|task| matches!(task, Task::AutoPause { origin } if origin == "a.example"));

        let pending: Vec<Task> = scheduler.pending().into_iter().map(|(_, task)| task).collect();
        assert_eq!(
            pending,
            vec![Task::AutoPause {
                origin: "b.example".to_string()
            }]
        );
    }

    #[test]
    fn with_defaults_carries_the_maintenance_cadence() {
        let now = at(0, 0);
        let scheduler = Scheduler::with_defaults(now);
        let pending: Vec<Task> = scheduler.pending().into_iter().map(|(_, task)| task).collect();
        assert_eq!(
            pending,
            vec![Task::Flush, Task::BackgroundSweep, Task::ResetCheck]
        );
    }
}
