use chrono::{DateTime, Local};
use std::time::Duration;

const MILLIS_PER_SECOND: i64 = 1_000;
const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * MILLIS_PER_SECOND;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownMode {
    Stopped,
    /// Shows the local time of day.
    TickingUp,
    /// Shows the time left until the end instant.
    TickingDown,
}

/// Value model of the countdown display. Rendering and tick scheduling are
/// left to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountdownTimer {
    mode: CountdownMode,
    end_instant: Option<DateTime<Local>>,
}

impl Default for CountdownTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl CountdownTimer {
    pub fn new() -> Self {
        CountdownTimer { mode: CountdownMode::Stopped, end_instant: None }
    }

    pub fn mode(&self) -> CountdownMode {
        self.mode
    }

    pub fn end_instant(&self) -> Option<DateTime<Local>> {
        self.end_instant
    }

    pub fn tick_up(&mut self) {
        self.mode = CountdownMode::TickingUp;
    }

    pub fn tick_down(&mut self, end_instant: DateTime<Local>) {
        self.end_instant = Some(end_instant);
        self.mode = CountdownMode::TickingDown;
    }

    pub fn stop(&mut self) {
        self.mode = CountdownMode::Stopped;
    }

    /// Swaps between up and down. Does nothing while stopped or before an end
    /// instant was ever set.
    pub fn toggle(&mut self) {
        if self.end_instant.is_none() {
            return;
        }
        self.mode = match self.mode {
            CountdownMode::TickingUp => CountdownMode::TickingDown,
            CountdownMode::TickingDown => CountdownMode::TickingUp,
            CountdownMode::Stopped => CountdownMode::Stopped,
        };
    }

    /// Milliseconds to display, `None` while stopped.
    pub fn reading(&self, now: DateTime<Local>) -> Option<i64> {
        match (self.mode, self.end_instant) {
            (CountdownMode::Stopped, _) => None,
            (CountdownMode::TickingUp, _) => Some(now.timestamp_millis() + i64::from(now.offset().local_minus_utc()) * MILLIS_PER_SECOND),
            (CountdownMode::TickingDown, Some(end)) => Some((end - now).num_milliseconds()),
            (CountdownMode::TickingDown, None) => None,
        }
    }

    pub fn render(&self, now: DateTime<Local>) -> Option<String> {
        self.reading(now).map(format_hms)
    }

    /// Delay that lands the next tick on a whole second. `None` while stopped.
    pub fn next_tick_delay(&self, now: DateTime<Local>) -> Option<Duration> {
        if self.mode == CountdownMode::Stopped {
            return None;
        }
        let into_second = now.timestamp_millis().rem_euclid(MILLIS_PER_SECOND);
        Some(Duration::from_millis((MILLIS_PER_SECOND - into_second) as u64))
    }
}

/// `hh:mm:ss` with whole days folded away. Negative values wrap like a clock.
pub fn format_hms(millis: i64) -> String {
    let in_day = millis.rem_euclid(MILLIS_PER_DAY);
    let seconds = in_day / MILLIS_PER_SECOND;
    format!("{:02}:{:02}:{:02}", seconds / 3600, (seconds / 60) % 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn at(h: u32, m: u32, s: u32, ms: i64) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 11, 12, h, m, s).unwrap() + TimeDelta::milliseconds(ms)
    }

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(59_999), "00:00:59");
        assert_eq!(format_hms(3_723_000), "01:02:03");
        assert_eq!(format_hms(MILLIS_PER_DAY + 61_000), "00:01:01");
        assert_eq!(format_hms(-1_000), "23:59:59");
    }

    #[test]
    fn test_ticking_down_shows_remaining_time() {
        let mut timer = CountdownTimer::new();
        assert_eq!(timer.render(at(17, 0, 0, 0)), None);

        timer.tick_down(at(17, 59, 59, 300));
        assert_eq!(timer.reading(at(17, 0, 0, 0)), Some(3_599_300));
        assert_eq!(timer.render(at(17, 0, 0, 0)).as_deref(), Some("00:59:59"));
    }

    #[test]
    fn test_ticking_up_shows_time_of_day() {
        let mut timer = CountdownTimer::new();
        timer.tick_up();
        assert_eq!(timer.render(at(9, 30, 15, 250)).as_deref(), Some("09:30:15"));
    }

    #[test]
    fn test_toggle_needs_running_timer_with_end() {
        let mut timer = CountdownTimer::new();
        timer.tick_up();
        timer.toggle();
        assert_eq!(timer.mode(), CountdownMode::TickingUp);

        timer.tick_down(at(18, 0, 0, 0));
        timer.toggle();
        assert_eq!(timer.mode(), CountdownMode::TickingUp);
        timer.toggle();
        assert_eq!(timer.mode(), CountdownMode::TickingDown);

        timer.stop();
        timer.toggle();
        assert_eq!(timer.mode(), CountdownMode::Stopped);
    }

    #[test]
    fn test_ticks_align_to_whole_seconds() {
        let mut timer = CountdownTimer::new();
        assert_eq!(timer.next_tick_delay(at(12, 0, 0, 250)), None);

        timer.tick_up();
        assert_eq!(timer.next_tick_delay(at(12, 0, 0, 250)), Some(Duration::from_millis(750)));
        assert_eq!(timer.next_tick_delay(at(12, 0, 0, 0)), Some(Duration::from_millis(1_000)));
    }
}
