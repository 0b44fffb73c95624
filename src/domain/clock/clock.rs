use chrono::{DateTime, Local, TimeDelta};
use std::sync::Arc;

/// Wall-clock source used for every trigger and refresh computation.
pub trait Clock: std::fmt::Debug + Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

pub type SharedClock = Arc<dyn Clock>;

/// Local system time, corrected by a known offset against the booking site's
/// server clock. A positive skew means the server runs ahead of this machine.
#[derive(Debug, Clone, Default)]
pub struct SystemClock {
    skew: TimeDelta,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skew_ms(skew_ms: i64) -> Self {
        SystemClock { skew: TimeDelta::milliseconds(skew_ms) }
    }

    pub fn shared(self) -> SharedClock {
        Arc::new(self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now() + self.skew
    }
}

/// A clock that starts at an arbitrary wall time and advances with the tokio
/// timer. Under a paused runtime it jumps forward together with `sleep`, so
/// hour-long waits complete instantly in dry runs and tests.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    base_time: DateTime<Local>,
    base_instant: tokio::time::Instant,
}

impl SimulatedClock {
    pub fn starting_at(base_time: DateTime<Local>) -> Self {
        SimulatedClock { base_time, base_instant: tokio::time::Instant::now() }
    }

    pub fn shared(self) -> SharedClock {
        Arc::new(self)
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> DateTime<Local> {
        let elapsed = tokio::time::Instant::now().saturating_duration_since(self.base_instant);
        TimeDelta::from_std(elapsed)
            .ok()
            .and_then(|delta| self.base_time.checked_add_signed(delta))
            .unwrap_or(self.base_time)
    }
}
