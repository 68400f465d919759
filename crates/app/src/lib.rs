pub mod engine;
pub mod error;
pub mod notify;
pub mod rules;
pub mod scheduler;
pub mod settings;
pub mod state;
pub mod tabs;
pub mod util;

pub use engine::{
    BACKGROUND_PROMPT_AFTER_SECS, DomainTabs, DomainUsage, Engine, MeterConfig, REPAUSE_DELAY_SECS,
    ResponseEvent, TabEvent, TabRef, TopTab, UsageSnapshot,
};
pub use error::{ApiError, AppError, Result};
pub use notify::{LogNotifier, Notice, Notifier};
pub use rules::{
    BlockRule, DynamicRules, ResourceType, RuleEngine, RuleError, hard_block_rule, soft_block_rule,
};
pub use scheduler::{Scheduler, Task};
pub use settings::SettingsUpdate;
pub use state::LedgerState;
pub use tabs::TabRegistry;
pub use util::time::{next_occurrence, parse_wall_clock};
