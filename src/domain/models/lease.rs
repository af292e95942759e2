//! Resource leases over capacity-constrained inference classes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A granted claim on resource-class capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLease {
    pub id: Uuid,
    pub class: String,
    pub units: u32,
    pub holder: String,
    pub exclusive: bool,
    pub granted_at: DateTime<Utc>,
}

/// A phase's declared need, taken up front before the phase does work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNeed {
    pub class: String,
    #[serde(default = "default_units")]
    pub units: u32,
    #[serde(default)]
    pub exclusive: bool,
}

fn default_units() -> u32 {
    1
}

impl ResourceNeed {
    pub fn shared(class: impl Into<String>, units: u32) -> Self {
        Self {
            class: class.into(),
            units,
            exclusive: false,
        }
    }

    pub fn exclusive(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            units: 1,
            exclusive: true,
        }
    }
}

/// Point-in-time view of one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUtilization {
    pub class: String,
    pub capacity: u32,
    pub in_use: u32,
    pub exclusive_held: bool,
    pub waiting: usize,
}
