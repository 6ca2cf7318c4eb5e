//! Status condition types reported back to the owner of a unit of work.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceIdentifier;

/// Condition type written for every manifest and for the work as a whole.
pub const CONDITION_APPLIED: &str = "Applied";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition.
///
/// `last_transition_time` moves only when `status` changes relative to the
/// previously recorded condition of the same type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl StatusCondition {
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self { type_: type_.into(), status, reason: reason.into(), message: message.into(), last_transition_time: now }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Conditions for a single desired resource, keyed by its identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestCondition {
    pub identifier: ResourceIdentifier,
    #[serde(default)]
    pub conditions: Vec<StatusCondition>,
}

impl ManifestCondition {
    pub fn condition(&self, type_: &str) -> Option<&StatusCondition> {
        find_condition(&self.conditions, type_)
    }
}

/// Long-lived status record of a unit of work: the aggregate conditions plus
/// one entry per desired manifest. This is the only state carried between
/// reconciliation cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkStatus {
    #[serde(default)]
    pub conditions: Vec<StatusCondition>,
    #[serde(default)]
    pub manifest_conditions: Vec<ManifestCondition>,
}

impl WorkStatus {
    pub fn applied(&self) -> Option<&StatusCondition> {
        find_condition(&self.conditions, CONDITION_APPLIED)
    }
}

pub fn find_condition<'a>(conditions: &'a [StatusCondition], type_: &str) -> Option<&'a StatusCondition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(condition: Option<&StatusCondition>) -> bool {
    condition.map(StatusCondition::is_true).unwrap_or(false)
}
