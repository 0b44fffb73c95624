use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveTime};

use crate::domain::booking::outcome::AttemptObservation;
use crate::domain::utils::id::ResourceId;
use crate::error::Result;

/// Reservation form fields as the page currently shows them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationFields {
    pub reservation_instant: DateTime<Local>,
    pub selected_resource: Option<ResourceId>,
}

/// The UI surface a booking session drives.
///
/// Implementations translate each call into page interactions. A required
/// element that cannot be found must be reported as
/// [`Error::AdapterUnavailable`](crate::error::Error::AdapterUnavailable).
#[async_trait]
pub trait BookingPage: Send {
    async fn read_reservation_fields(&mut self) -> Result<ReservationFields>;

    /// Resources the page offers for selection, in page order.
    async fn list_candidate_options(&mut self) -> Result<Vec<ResourceId>>;

    /// Fire-and-forget submit for `resource`. The result is observed separately.
    async fn dispatch_attempt(&mut self, resource: &ResourceId) -> Result<()>;

    async fn observe_attempt(&mut self) -> Result<AttemptObservation>;

    /// Returns `false` when the page has no option for `resource`.
    async fn select_resource(&mut self, resource: &ResourceId) -> Result<bool>;

    async fn dismiss_blocking_error(&mut self) -> Result<()>;
}

/// Search filters of a class list page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilters {
    pub location: String,
    pub service: String,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub time_from: NaiveTime,
    pub time_to: NaiveTime,
}

/// A page listing registrable slots that is refreshed by re-querying.
#[async_trait]
pub trait SlotListPage: BookingPage {
    async fn apply_filters(&mut self, filters: &SearchFilters) -> Result<()>;

    async fn is_loading(&mut self) -> Result<bool>;

    /// Looks for a listed slot covering exactly `time_from..time_to`.
    async fn find_matching_slot(&mut self, time_from: NaiveTime, time_to: NaiveTime) -> Result<Option<ResourceId>>;

    /// Rewrites the upper bound of the search window, which re-runs the query.
    async fn set_window_end(&mut self, time_to: NaiveTime) -> Result<()>;
}
