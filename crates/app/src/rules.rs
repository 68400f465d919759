use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use meter_core::{rule_id, soft_rule_id};

#[derive(Debug, thiserror::Error)]
#[error("rule engine rejected the update: {0}")]
pub struct RuleError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    Font,
    Object,
    Xmlhttprequest,
    Ping,
    CspReport,
    Media,
    Other,
}

pub const ALL_RESOURCE_TYPES: &[ResourceType] = &[
    ResourceType::MainFrame,
    ResourceType::SubFrame,
    ResourceType::Stylesheet,
    ResourceType::Script,
    ResourceType::Image,
    ResourceType::Font,
    ResourceType::Object,
    ResourceType::Xmlhttprequest,
    ResourceType::Ping,
    ResourceType::CspReport,
    ResourceType::Media,
    ResourceType::Other,
];

pub const HARD_RULE_PRIORITY: u32 = 2;
pub const SOFT_RULE_PRIORITY: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRule {
    pub id: i32,
    pub priority: u32,
    pub url_filter: String,
    pub resource_types: Vec<ResourceType>,
}

/// The durable block rule installed for an explicitly paused origin.
pub fn hard_block_rule(origin: &str) -> BlockRule {
    BlockRule {
        id: rule_id(origin),
        priority: HARD_RULE_PRIORITY,
        url_filter: format!("||{origin}/"),
        resource_types: ALL_RESOURCE_TYPES.to_vec(),
    }
}

/// The best-effort overlay rule for an origin with no active tab. Leaves
/// `main_frame` out so the user can still navigate to the site, which
/// activates a tab and lifts the rule again.
pub fn soft_block_rule(origin: &str) -> BlockRule {
    BlockRule {
        id: soft_rule_id(origin),
        priority: SOFT_RULE_PRIORITY,
        url_filter: format!("||{origin}/"),
        resource_types: ALL_RESOURCE_TYPES
            .iter()
            .copied()
            .filter(|ty| *ty != ResourceType::MainFrame)
            .collect(),
    }
}

/// The declarative blocking backend. Ids are the only correlation key;
/// removing an id that is not installed is a no-op.
pub trait RuleEngine: Send {
    fn add_rule(&mut self, rule: BlockRule) -> Result<(), RuleError>;
    fn remove_rule(&mut self, id: i32) -> Result<(), RuleError>;
    fn rules(&self) -> Vec<BlockRule>;
}

/// In-process rule set, ordered by id.
#[derive(Debug, Default)]
pub struct DynamicRules {
    rules: BTreeMap<i32, BlockRule>,
}

impl DynamicRules {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RuleEngine for DynamicRules {
    fn add_rule(&mut self, rule: BlockRule) -> Result<(), RuleError> {
        if rule.id <= 0 {
            return Err(RuleError(format!("rule id {} out of range", rule.id)));
        }
        self.rules.insert(rule.id, rule);
        Ok(())
    }

    fn remove_rule(&mut self, id: i32) -> Result<(), RuleError> {
        self.rules.remove(&id);
        Ok(())
    }

    fn rules(&self) -> Vec<BlockRule> {
        self.rules.values().cloned().collect()
    }
}
