use chrono::{DateTime, Local, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::{Error, Result};

/// Where the early test refresh goes relative to the keep-alive refreshes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestProbe {
    /// Extra refresh ahead of the earliest keep-alive.
    #[default]
    Precede,
    /// The earliest keep-alive is moved to the test instant.
    ReplaceFirstKeepAlive,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefreshConfig {
    pub test_refresh_interval_millis: i64,
    pub refresh_interval_millis: i64,
    pub init_refresh_grace_millis: i64,
    pub keep_alive_interval_minutes: i64,
    pub test_probe: TestProbe,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            test_refresh_interval_millis: 5_000,
            refresh_interval_millis: 500,
            init_refresh_grace_millis: 50,
            keep_alive_interval_minutes: 5,
            test_probe: TestProbe::Precede,
        }
    }
}

/// Refresh cadence for a list that opens at a known instant: sparse
/// keep-alive refreshes until the anchor, dense polling afterwards.
#[derive(Debug, Clone)]
pub struct AdaptiveRefreshScheduler {
    scheduled: VecDeque<DateTime<Local>>,
    refresh_interval: TimeDelta,
}

impl AdaptiveRefreshScheduler {
    pub fn new(anchor: DateTime<Local>, now: DateTime<Local>, config: &RefreshConfig) -> Result<Self> {
        let test_instant = offset(now, millis(config.test_refresh_interval_millis, "testRefreshIntervalMillis")?)?;
        // A non-positive step would never leave the loop.
        let keep_alive = TimeDelta::try_minutes(config.keep_alive_interval_minutes.max(1))
            .ok_or_else(|| Error::InvalidSettings(format!("keepAliveIntervalMinutes out of range: {}", config.keep_alive_interval_minutes)))?;
        let refresh_interval = millis(config.refresh_interval_millis, "refreshIntervalMillis")?;

        let mut descending = Vec::new();
        let mut next = Some(offset(anchor, millis(config.init_refresh_grace_millis, "initRefreshGraceMillis")?)?);
        while let Some(instant) = next.filter(|instant| test_instant < *instant) {
            descending.push(instant);
            next = instant.checked_sub_signed(keep_alive);
        }

        if test_instant < anchor {
            match config.test_probe {
                TestProbe::Precede => descending.push(test_instant),
                TestProbe::ReplaceFirstKeepAlive => match descending.last_mut() {
                    Some(earliest) => *earliest = test_instant,
                    None => descending.push(test_instant),
                },
                TestProbe::Off => {}
            }
        }

        let scheduled: VecDeque<_> = descending.into_iter().rev().collect();
        log::debug!(
            "Refresh schedule: {} planned refreshes up to {}.",
            scheduled.len(),
            scheduled.back().map(|i| i.format("%Y-%m-%d %H:%M:%S%.3f").to_string()).unwrap_or_default()
        );

        Ok(AdaptiveRefreshScheduler { scheduled, refresh_interval })
    }

    /// Delay until the next refresh. Negative when the planned instant has
    /// already passed, which callers treat as "refresh now".
    pub fn next_interval(&mut self, now: DateTime<Local>) -> TimeDelta {
        match self.scheduled.pop_front() {
            Some(instant) => instant - now,
            None => self.refresh_interval,
        }
    }

    pub fn next_interval_in_millis(&mut self, now: DateTime<Local>) -> i64 {
        self.next_interval(now).num_milliseconds()
    }

    /// Planned refreshes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.scheduled.len()
    }

    pub fn scheduled(&self) -> impl Iterator<Item = &DateTime<Local>> {
        self.scheduled.iter()
    }
}

fn millis(value: i64, name: &str) -> Result<TimeDelta> {
    TimeDelta::try_milliseconds(value).ok_or_else(|| Error::InvalidSettings(format!("{} out of range: {}", name, value)))
}

fn offset(instant: DateTime<Local>, delta: TimeDelta) -> Result<DateTime<Local>> {
    instant
        .checked_add_signed(delta)
        .ok_or_else(|| Error::InvalidTime(format!("{} shifted by {} ms is out of range", instant, delta.num_milliseconds())))
}
