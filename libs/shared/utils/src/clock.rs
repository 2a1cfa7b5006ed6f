use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};

/// Source of "now" for time-dependent business rules.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    current: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(initial: DateTime<Utc>) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = instant;
    }

    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current += by;
        *current
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.read().unwrap_or_else(|e| e.into_inner())
    }
}
