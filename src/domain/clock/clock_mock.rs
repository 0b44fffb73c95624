use chrono::{DateTime, Local, TimeDelta};
use std::sync::{Arc, RwLock};

use crate::domain::clock::clock::{Clock, SharedClock};

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    pub time: Arc<RwLock<DateTime<Local>>>,
}

impl ManualClock {
    pub fn new(time: DateTime<Local>) -> ManualClock {
        ManualClock { time: Arc::new(RwLock::new(time)) }
    }

    pub fn set(&self, time: DateTime<Local>) {
        *self.time.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = time;
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut guard = self.time.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += delta;
    }

    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.time.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
