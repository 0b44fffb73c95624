use chrono::{NaiveDate, NaiveTime, TimeDelta, Timelike};

use crate::domain::booking::page::SearchFilters;
use crate::error::{Error, Result};

const HALF_HOUR_SECS: u32 = 30 * 60;

pub fn half_hour_round_down(time: NaiveTime) -> NaiveTime {
    let secs = time.num_seconds_from_midnight();
    NaiveTime::from_num_seconds_from_midnight_opt(secs - secs % HALF_HOUR_SECS, 0).unwrap_or(time)
}

/// Wraps past midnight, so 23:45 rounds up to 00:00.
pub fn half_hour_round_up(time: NaiveTime) -> NaiveTime {
    let down = half_hour_round_down(time);
    if down == time {
        down
    } else {
        down.overflowing_add_signed(TimeDelta::minutes(30)).0
    }
}

/// Accepts `hh:mm AM`, `hh:mmAM` and 24 hour `HH:MM`.
pub fn parse_clock_time(text: &str) -> Result<NaiveTime> {
    let text = text.trim().to_uppercase();
    ["%I:%M %p", "%I:%M%p", "%H:%M"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(&text, format).ok())
        .ok_or_else(|| Error::InvalidTime(format!("'{}' is not a time like 12:45 PM", text)))
}

/// Accepts `dd/MM/yyyy` and ISO `yyyy-MM-dd`.
pub fn parse_date(text: &str) -> Result<NaiveDate> {
    let text = text.trim();
    ["%d/%m/%Y", "%Y-%m-%d"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .ok_or_else(|| Error::InvalidTime(format!("'{}' is not a date like 15/11/2025", text)))
}

/// The search window a slot list is queried with. Its end alternates between
/// two values so that every refresh is a changed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchWindow {
    time_from: NaiveTime,
    time_to: NaiveTime,
    alternate_time_to: NaiveTime,
    current_end: NaiveTime,
}

impl SearchWindow {
    pub fn new(time_from: NaiveTime, time_to: NaiveTime) -> Self {
        let time_from = half_hour_round_down(time_from);
        let time_to = half_hour_round_up(time_to);
        let alternate_time_to = time_to.overflowing_add_signed(TimeDelta::hours(1)).0;

        SearchWindow { time_from, time_to, alternate_time_to, current_end: time_to }
    }

    pub fn time_from(&self) -> NaiveTime {
        self.time_from
    }

    pub fn time_to(&self) -> NaiveTime {
        self.time_to
    }

    pub fn alternate_time_to(&self) -> NaiveTime {
        self.alternate_time_to
    }

    pub fn current_end(&self) -> NaiveTime {
        self.current_end
    }

    /// Switches the window end to the other value and returns it.
    pub fn perturb(&mut self) -> NaiveTime {
        self.current_end = if self.current_end == self.time_to { self.alternate_time_to } else { self.time_to };
        self.current_end
    }

    pub fn filters(&self, location: &str, service: &str, date: NaiveDate) -> SearchFilters {
        SearchFilters {
            location: location.to_string(),
            service: service.to_string(),
            date_from: date,
            date_to: date,
            time_from: self.time_from,
            time_to: self.current_end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_half_hour_rounding() {
        assert_eq!(half_hour_round_down(t(12, 45)), t(12, 30));
        assert_eq!(half_hour_round_down(t(12, 30)), t(12, 30));
        assert_eq!(half_hour_round_down(t(12, 29)), t(12, 0));

        assert_eq!(half_hour_round_up(t(14, 45)), t(15, 0));
        assert_eq!(half_hour_round_up(t(14, 30)), t(14, 30));
        assert_eq!(half_hour_round_up(t(14, 1)), t(14, 30));
        assert_eq!(half_hour_round_up(t(23, 45)), t(0, 0));
    }

    #[test]
    fn test_window_end_alternates() {
        let mut window = SearchWindow::new(t(12, 45), t(14, 45));
        assert_eq!(window.time_from(), t(12, 30));
        assert_eq!(window.current_end(), t(15, 0));
        assert_eq!(window.alternate_time_to(), t(16, 0));

        assert_eq!(window.perturb(), t(16, 0));
        assert_eq!(window.perturb(), t(15, 0));
        assert_eq!(window.perturb(), t(16, 0));
    }

    #[test]
    fn test_filters_cover_a_single_day() {
        let date = NaiveDate::from_ymd_opt(2025, 11, 15).unwrap();
        let filters = SearchWindow::new(t(13, 0), t(15, 0)).filters("Cornell Community Centre", "Drop-In Pickleball: Adults", date);

        assert_eq!(filters.date_from, date);
        assert_eq!(filters.date_to, date);
        assert_eq!(filters.time_from, t(13, 0));
        assert_eq!(filters.time_to, t(15, 0));
    }

    #[test]
    fn test_parse_inputs() {
        assert_eq!(parse_clock_time("12:45 pm").unwrap(), t(12, 45));
        assert_eq!(parse_clock_time("01:00 AM").unwrap(), t(1, 0));
        assert_eq!(parse_clock_time("14:30").unwrap(), t(14, 30));
        assert!(matches!(parse_clock_time("noon"), Err(Error::InvalidTime(_))));

        assert_eq!(parse_date("15/11/2025").unwrap(), NaiveDate::from_ymd_opt(2025, 11, 15).unwrap());
        assert_eq!(parse_date("2025-11-15").unwrap(), NaiveDate::from_ymd_opt(2025, 11, 15).unwrap());
        assert!(parse_date("11/15/2025").is_err());
    }
}
