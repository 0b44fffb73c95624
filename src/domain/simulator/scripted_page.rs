use async_trait::async_trait;
use chrono::{Local, LocalResult, NaiveTime, TimeZone};
use std::collections::{HashSet, VecDeque};

use crate::api::scenario_dto::{ReservationDto, ScenarioDto, SlotDto};
use crate::domain::booking::outcome::AttemptObservation;
use crate::domain::booking::page::{BookingPage, ReservationFields, SearchFilters, SlotListPage};
use crate::domain::refresh::search_window::{parse_clock_time, parse_date};
use crate::domain::utils::id::ResourceId;
use crate::error::{Error, Result};

/// Every call a scripted page received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAction {
    ReadFields,
    ListCandidates,
    Dispatch(ResourceId),
    Observe,
    Select(ResourceId),
    Dismiss,
    ApplyFilters(SearchFilters),
    SetWindowEnd(NaiveTime),
}

/// In-process booking page replaying a scenario.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBookingPage {
    fields: Option<ReservationFields>,
    candidates: Vec<ResourceId>,
    unselectable: HashSet<ResourceId>,
    observations: VecDeque<AttemptObservation>,
    actions: Vec<PageAction>,
}

impl ScriptedBookingPage {
    pub fn new(fields: Option<ReservationFields>, candidates: Vec<ResourceId>, observations: Vec<AttemptObservation>) -> Self {
        ScriptedBookingPage { fields, candidates, unselectable: HashSet::new(), observations: observations.into(), actions: Vec::new() }
    }

    pub fn from_dto(dto: &ScenarioDto) -> Result<Self> {
        let fields = dto.reservation.as_ref().map(Self::fields_from_dto).transpose()?;
        let candidates = dto.courts.iter().map(|c| ResourceId::from(c.as_str())).collect();

        let mut page = Self::new(fields, candidates, dto.observations.clone());
        page.unselectable = dto.unselectable_courts.iter().map(|c| ResourceId::from(c.as_str())).collect();
        Ok(page)
    }

    fn fields_from_dto(dto: &ReservationDto) -> Result<ReservationFields> {
        let date = parse_date(&dto.date)?;
        let time = parse_clock_time(&dto.time)?;
        let reservation_instant = match Local.from_local_datetime(&date.and_time(time)) {
            LocalResult::Single(instant) | LocalResult::Ambiguous(instant, _) => instant,
            LocalResult::None => return Err(Error::InvalidTime(format!("{} {} does not exist locally", dto.date, dto.time))),
        };

        Ok(ReservationFields {
            reservation_instant,
            selected_resource: dto.selected_court.as_deref().map(str::trim).filter(|c| !c.is_empty()).map(ResourceId::from),
        })
    }

    pub fn with_unselectable(mut self, resource: impl Into<ResourceId>) -> Self {
        self.unselectable.insert(resource.into());
        self
    }

    pub fn actions(&self) -> &[PageAction] {
        &self.actions
    }

    /// Resources dispatched so far, in order.
    pub fn dispatched(&self) -> Vec<ResourceId> {
        self.actions
            .iter()
            .filter_map(|action| match action {
                PageAction::Dispatch(resource) => Some(resource.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn selected(&self) -> Vec<ResourceId> {
        self.actions
            .iter()
            .filter_map(|action| match action {
                PageAction::Select(resource) => Some(resource.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl BookingPage for ScriptedBookingPage {
    async fn read_reservation_fields(&mut self) -> Result<ReservationFields> {
        self.actions.push(PageAction::ReadFields);
        self.fields.clone().ok_or_else(|| Error::AdapterUnavailable("reservation form not found".to_string()))
    }

    async fn list_candidate_options(&mut self) -> Result<Vec<ResourceId>> {
        self.actions.push(PageAction::ListCandidates);
        Ok(self.candidates.clone())
    }

    async fn dispatch_attempt(&mut self, resource: &ResourceId) -> Result<()> {
        self.actions.push(PageAction::Dispatch(resource.clone()));
        Ok(())
    }

    async fn observe_attempt(&mut self) -> Result<AttemptObservation> {
        self.actions.push(PageAction::Observe);
        self.observations.pop_front().ok_or_else(|| Error::AdapterUnavailable("scenario has no further observations".to_string()))
    }

    async fn select_resource(&mut self, resource: &ResourceId) -> Result<bool> {
        self.actions.push(PageAction::Select(resource.clone()));
        let offered = self.candidates.is_empty() || self.candidates.contains(resource);
        let selectable = offered && !self.unselectable.contains(resource);
        if selectable {
            if let Some(fields) = self.fields.as_mut() {
                fields.selected_resource = Some(resource.clone());
            }
        }
        Ok(selectable)
    }

    async fn dismiss_blocking_error(&mut self) -> Result<()> {
        self.actions.push(PageAction::Dismiss);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedSlot {
    pub id: ResourceId,
    pub time_from: NaiveTime,
    pub time_to: NaiveTime,
    pub listed_after_refreshes: u32,
}

impl TryFrom<&SlotDto> for ScriptedSlot {
    type Error = Error;

    fn try_from(dto: &SlotDto) -> Result<Self> {
        Ok(ScriptedSlot {
            id: ResourceId::from(dto.id.as_str()),
            time_from: parse_clock_time(&dto.time_from)?,
            time_to: parse_clock_time(&dto.time_to)?,
            listed_after_refreshes: dto.listed_after_refreshes,
        })
    }
}

/// Class list page replaying a scenario: each query stays busy for a few
/// loading checks, and slots appear after a number of refreshes.
#[derive(Debug, Clone)]
pub struct ScriptedSlotListPage {
    booking: ScriptedBookingPage,
    slots: Vec<ScriptedSlot>,
    loading_polls: u32,
    loading_left: u32,
    refreshes: u32,
    filters: Option<SearchFilters>,
}

impl ScriptedSlotListPage {
    pub fn new(booking: ScriptedBookingPage, slots: Vec<ScriptedSlot>, loading_polls: u32) -> Self {
        ScriptedSlotListPage { booking, slots, loading_polls, loading_left: loading_polls, refreshes: 0, filters: None }
    }

    pub fn from_dto(dto: &ScenarioDto) -> Result<Self> {
        let booking = ScriptedBookingPage::from_dto(dto)?;
        let (slots, loading_polls) = match &dto.slot_list {
            Some(list) => (list.slots.iter().map(ScriptedSlot::try_from).collect::<Result<Vec<_>>>()?, list.loading_polls),
            None => (Vec::new(), 0),
        };
        Ok(Self::new(booking, slots, loading_polls))
    }

    pub fn booking(&self) -> &ScriptedBookingPage {
        &self.booking
    }

    pub fn refreshes(&self) -> u32 {
        self.refreshes
    }

    pub fn filters(&self) -> Option<&SearchFilters> {
        self.filters.as_ref()
    }
}

#[async_trait]
impl BookingPage for ScriptedSlotListPage {
    async fn read_reservation_fields(&mut self) -> Result<ReservationFields> {
        self.booking.read_reservation_fields().await
    }

    async fn list_candidate_options(&mut self) -> Result<Vec<ResourceId>> {
        self.booking.list_candidate_options().await
    }

    async fn dispatch_attempt(&mut self, resource: &ResourceId) -> Result<()> {
        self.booking.dispatch_attempt(resource).await
    }

    async fn observe_attempt(&mut self) -> Result<AttemptObservation> {
        self.booking.observe_attempt().await
    }

    async fn select_resource(&mut self, resource: &ResourceId) -> Result<bool> {
        self.booking.select_resource(resource).await
    }

    async fn dismiss_blocking_error(&mut self) -> Result<()> {
        self.booking.dismiss_blocking_error().await
    }
}

#[async_trait]
impl SlotListPage for ScriptedSlotListPage {
    async fn apply_filters(&mut self, filters: &SearchFilters) -> Result<()> {
        self.booking.actions.push(PageAction::ApplyFilters(filters.clone()));
        self.filters = Some(filters.clone());
        self.loading_left = self.loading_polls;
        Ok(())
    }

    async fn is_loading(&mut self) -> Result<bool> {
        if self.loading_left > 0 {
            self.loading_left -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    async fn find_matching_slot(&mut self, time_from: NaiveTime, time_to: NaiveTime) -> Result<Option<ResourceId>> {
        if self.filters.is_none() {
            return Err(Error::AdapterUnavailable("class list was never filtered".to_string()));
        }
        Ok(self
            .slots
            .iter()
            .find(|slot| slot.listed_after_refreshes <= self.refreshes && slot.time_from == time_from && slot.time_to == time_to)
            .map(|slot| slot.id.clone()))
    }

    async fn set_window_end(&mut self, time_to: NaiveTime) -> Result<()> {
        self.booking.actions.push(PageAction::SetWindowEnd(time_to));
        let Some(filters) = self.filters.as_mut() else {
            return Err(Error::AdapterUnavailable("class list was never filtered".to_string()));
        };
        filters.time_to = time_to;
        self.refreshes += 1;
        self.loading_left = self.loading_polls;
        Ok(())
    }
}
