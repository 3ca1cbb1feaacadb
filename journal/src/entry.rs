use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of one guard evaluated during a transition attempt.
///
/// Guards are journaled in declared order, including the ones evaluated
/// after an earlier guard already failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardResult {
    /// Guard name as declared in the transition table
    pub name: String,
    pub passed: bool,
    /// Operator-facing reason when the guard failed; never contains PHI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl GuardResult {
    pub fn passed(name: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail: None,
        }
    }

    pub fn failed(name: &str, detail: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail: Some(detail.to_string()),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Workflow,
    Safety,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Applied,
    Rejected,
}

/// One attempted transition, exactly as evaluated.
///
/// State and trigger names are stored as plain strings so the journal does
/// not depend on the engine's types; replay parses them back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Monotonic sequence number assigned by the journal
    pub id: u64,
    /// UTC timestamp with millisecond precision
    pub at: DateTime<Utc>,
    pub from_state: String,
    pub to_state: String,
    pub trigger: String,
    pub guards: Vec<GuardResult>,
    pub operator: String,
    pub category: Category,
    /// Context restored on crash recovery; keys are component-defined
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub outcome: Outcome,
}

/// Entry content as handed to [`crate::Journal::append`]; id and timestamp
/// are assigned at commit.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub from_state: String,
    pub to_state: String,
    pub trigger: String,
    pub guards: Vec<GuardResult>,
    pub operator: String,
    pub category: Category,
    pub metadata: BTreeMap<String, String>,
    pub outcome: Outcome,
}
