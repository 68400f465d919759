use chrono::{DateTime, Utc};

/// Fire-and-forget signals for the notification surface. The pause-related
/// notices are actionable: the consumer is expected to answer with a
/// `pauseDomain` command if the user accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    HighUsage {
        origin: String,
        total_bytes: u64,
    },
    PauseRecommended {
        origin: String,
        total_bytes: u64,
    },
    BackgroundActivity {
        origin: String,
        since: DateTime<Utc>,
    },
}

pub trait Notifier: Send {
    fn notify(&mut self, notice: Notice);
}

/// Default notifier: structured log lines, one per notice.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, notice: Notice) {
        match notice {
            Notice::HighUsage {
                origin,
                total_bytes,
            } => {
                tracing::info!(%origin, total_bytes, "high data usage");
            }
            Notice::PauseRecommended {
                origin,
                total_bytes,
            } => {
                tracing::warn!(%origin, total_bytes, "data limit exceeded, pause recommended");
            }
            Notice::BackgroundActivity { origin, since } => {
                tracing::info!(%origin, %since, "sustained background activity");
            }
        }
    }
}
