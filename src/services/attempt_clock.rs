// Attempt Clock
// Start time of one go-live attempt

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Instant;

/// Captured once when preparation begins; never changes afterwards
#[derive(Debug, Clone)]
pub struct AttemptClock {
    started_at: DateTime<Utc>,
    started: Instant,
}

impl AttemptClock {
    pub fn now() -> Self {
        Self { started_at: Utc::now(), started: Instant::now() }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// ISO-8601 UTC with milliseconds, e.g. `2024-06-04T12:00:00.000Z`
    pub fn iso_string(&self) -> String {
        self.started_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}
