//! Object Lock retention settings and the rule deciding whether they protect
//! an object from deletion.

use crate::errors::{MetabaseError, MetabaseResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Retention mode as stored in `objects.retention_mode`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetentionMode {
    #[default]
    None,
    Compliance,
    Governance,
}

impl RetentionMode {
    pub fn code(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Compliance => 1,
            Self::Governance => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Compliance),
            2 => Some(Self::Governance),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Retention {
    pub mode: RetentionMode,
    pub retain_until: Option<DateTime<Utc>>,
}

impl Retention {
    pub fn compliance(retain_until: DateTime<Utc>) -> Self {
        Self {
            mode: RetentionMode::Compliance,
            retain_until: Some(retain_until),
        }
    }

    pub fn governance(retain_until: DateTime<Utc>) -> Self {
        Self {
            mode: RetentionMode::Governance,
            retain_until: Some(retain_until),
        }
    }

    /// A mode requires a deadline and a deadline requires a mode.
    pub fn verify(&self) -> MetabaseResult<()> {
        match (self.mode, self.retain_until) {
            (RetentionMode::None, None) => Ok(()),
            (RetentionMode::None, Some(_)) => Err(MetabaseError::invalid(
                "retention period specified without a retention mode",
            )),
            (_, None) => Err(MetabaseError::invalid(
                "retention mode specified without a retention period",
            )),
            (_, Some(_)) => Ok(()),
        }
    }

    pub fn is_protected(&self, now: DateTime<Utc>) -> bool {
        is_protected(self, now)
    }
}

/// Whether `retention` forbids deleting its object at `now`.
///
/// Only an unexpired Compliance retention protects. Governance is recorded
/// but never blocks precommit deletion.
pub fn is_protected(retention: &Retention, now: DateTime<Utc>) -> bool {
    match (retention.mode, retention.retain_until) {
        (RetentionMode::Compliance, Some(until)) => until > now,
        _ => false,
    }
}
