use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error text carried by snapshot entries until the first cycle lands.
pub const AWAITING_FIRST_CHECK: &str = "awaiting first check";

/// One monitored endpoint. Loaded once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub name: String,
    pub url: String,
}

/// Outcome of a single probe against a [`Site`].
///
/// `error` is only populated for transport-level failures. A response with a
/// 4xx/5xx status is recorded as down with an empty error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteStatus {
    pub site: Site,
    pub is_up: bool,
    pub response_time_ms: u64,
    pub status_code: u16,
    pub last_checked: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl SiteStatus {
    pub fn placeholder(site: &Site, now: DateTime<Utc>) -> Self {
        Self {
            site: site.clone(),
            is_up: false,
            response_time_ms: 0,
            status_code: 0,
            last_checked: now,
            error: AWAITING_FIRST_CHECK.into(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.error == AWAITING_FIRST_CHECK
    }
}

/// Index-aligned statuses for every configured site, all from the same cycle.
pub type Snapshot = Vec<SiteStatus>;
