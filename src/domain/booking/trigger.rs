use chrono::{DateTime, Days, Local, LocalResult, Offset, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::utils::id::ResourceId;

/// How early before the nominal reservation instant a booking may start.
///
/// `lead_days` is the site's booking horizon. `lead_time_millis` deliberately
/// fires before the horizon opens, to absorb the round trip between the click
/// and the server checking its own clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadPolicy {
    pub lead_days: u32,
    pub lead_time_millis: u32,
}

impl Default for LeadPolicy {
    fn default() -> Self {
        LeadPolicy { lead_days: 10, lead_time_millis: 700 }
    }
}

/// What is being booked, as read from the page form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationTarget {
    pub reservation_instant: DateTime<Local>,
    pub selected_resource: Option<ResourceId>,
}

impl ReservationTarget {
    pub fn trigger_instant(&self, policy: &LeadPolicy) -> DateTime<Local> {
        resolve(&self.reservation_instant, policy)
    }
}

/// Computes the first instant a booking attempt is permitted.
///
/// Days are subtracted on the local calendar, so the wall-clock time of day is
/// kept across a DST change. A wall time that falls in a DST gap keeps the
/// offset of `reservation_instant`; an ambiguous one resolves to the earlier
/// instant. Results below the representable range saturate.
pub fn resolve<Tz: TimeZone>(reservation_instant: &DateTime<Tz>, policy: &LeadPolicy) -> DateTime<Tz> {
    let shifted = subtract_calendar_days(reservation_instant, policy.lead_days);

    shifted
        .clone()
        .checked_sub_signed(TimeDelta::milliseconds(i64::from(policy.lead_time_millis)))
        .unwrap_or(shifted)
}

pub fn is_bookable_now<Tz: TimeZone>(trigger_instant: &DateTime<Tz>, now: &DateTime<Tz>) -> bool {
    trigger_instant <= now
}

fn subtract_calendar_days<Tz: TimeZone>(instant: &DateTime<Tz>, days: u32) -> DateTime<Tz> {
    let timezone = instant.timezone();
    let earliest = |timezone: &Tz| DateTime::<Utc>::MIN_UTC.with_timezone(timezone);

    let Some(naive) = instant.naive_local().checked_sub_days(Days::new(u64::from(days))) else {
        return earliest(&timezone);
    };

    match timezone.from_local_datetime(&naive) {
        LocalResult::Single(shifted) => shifted,
        LocalResult::Ambiguous(first, _) => first,
        LocalResult::None => {
            let offset = TimeDelta::seconds(i64::from(instant.offset().fix().local_minus_utc()));
            match naive.checked_sub_signed(offset) {
                Some(utc) => timezone.from_utc_datetime(&utc),
                None => earliest(&timezone),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate};
    use chrono_tz::America::Toronto;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn test_resolve_subtracts_days_and_lead_time() {
        let policy = LeadPolicy { lead_days: 10, lead_time_millis: 700 };
        let trigger = resolve(&local(2025, 11, 22, 18, 0, 0), &policy);

        let expected = NaiveDate::from_ymd_opt(2025, 11, 12).unwrap().and_hms_milli_opt(17, 59, 59, 300).unwrap();
        assert_eq!(trigger.naive_local(), expected);
    }

    #[test]
    fn test_resolve_keeps_wall_time_across_dst_change() {
        // Toronto leaves daylight saving time on 2025-11-02.
        let reservation = Toronto.with_ymd_and_hms(2025, 11, 8, 18, 0, 0).unwrap();
        let policy = LeadPolicy { lead_days: 10, lead_time_millis: 0 };

        let trigger = resolve(&reservation, &policy);

        let expected = NaiveDate::from_ymd_opt(2025, 10, 29).unwrap().and_hms_opt(18, 0, 0).unwrap();
        assert_eq!(trigger.naive_local(), expected);
        assert_eq!(reservation - trigger, TimeDelta::days(10) + TimeDelta::hours(1));
    }

    #[test]
    fn test_resolve_into_dst_gap_keeps_the_original_offset() {
        // 02:30 does not exist in Toronto on 2026-03-08.
        let reservation = Toronto.with_ymd_and_hms(2026, 3, 18, 2, 30, 0).unwrap();
        let policy = LeadPolicy { lead_days: 10, lead_time_millis: 0 };

        let trigger = resolve(&reservation, &policy);

        assert_eq!(trigger.with_timezone(&Utc), Utc.with_ymd_and_hms(2026, 3, 8, 6, 30, 0).unwrap());
        assert_eq!(reservation - trigger, TimeDelta::days(10));
    }

    #[test]
    fn test_resolve_into_repeated_hour_takes_the_earlier_instant() {
        // 01:30 happens twice in Toronto on 2025-11-02.
        let reservation = Toronto.with_ymd_and_hms(2025, 11, 12, 1, 30, 0).unwrap();
        let policy = LeadPolicy { lead_days: 10, lead_time_millis: 0 };

        let trigger = resolve(&reservation, &policy);

        assert_eq!(trigger.naive_local(), NaiveDate::from_ymd_opt(2025, 11, 2).unwrap().and_hms_opt(1, 30, 0).unwrap());
        assert_eq!(trigger.offset().fix().local_minus_utc(), -4 * 3600);
        assert_eq!(reservation - trigger, TimeDelta::days(10) + TimeDelta::hours(1));
    }

    #[test]
    fn test_resolve_with_fixed_offset_is_exact() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let reservation = tz.with_ymd_and_hms(2026, 1, 13, 22, 7, 0).unwrap();
        let policy = LeadPolicy { lead_days: 2, lead_time_millis: 1000 };

        let trigger = resolve(&reservation, &policy);

        assert_eq!(reservation - trigger, TimeDelta::days(2) + TimeDelta::seconds(1));
    }

    #[test]
    fn test_resolve_is_monotonic_in_both_lead_parameters() {
        let reservation = local(2025, 11, 22, 18, 0, 0);
        let mut previous = reservation;

        for lead_days in [0, 1, 7, 10, 30] {
            for lead_time_millis in [0, 100, 700, 1000] {
                let trigger = resolve(&reservation, &LeadPolicy { lead_days, lead_time_millis });
                assert!(trigger <= reservation);
                assert!(trigger <= previous, "more lead must not move the trigger later");
                previous = trigger;
            }
        }
    }

    #[test]
    fn test_zero_lead_is_identity() {
        let reservation = local(2025, 11, 22, 18, 0, 0);
        let policy = LeadPolicy { lead_days: 0, lead_time_millis: 0 };

        assert_eq!(resolve(&reservation, &policy), reservation);
    }

    #[test]
    fn test_is_bookable_now_flips_once() {
        let trigger = local(2025, 11, 12, 17, 59, 59);
        let observations: Vec<bool> =
            (-3..=3).map(|offset| is_bookable_now(&trigger, &(trigger + TimeDelta::milliseconds(offset)))).collect();

        assert_eq!(observations, vec![false, false, false, true, true, true, true]);
    }
}
