use serde::{Deserialize, Serialize};

use crate::domain::booking::outcome::AttemptObservation;

/// A scripted booking site used for dry runs.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ScenarioDto {
    /// Form contents. Missing means the form cannot be found on the page.
    pub reservation: Option<ReservationDto>,

    /// Courts offered in the court drop-down.
    pub courts: Vec<String>,
    pub unselectable_courts: Vec<String>,

    /// Returned one by one for every observation. Running out is reported as
    /// an unavailable page.
    pub observations: Vec<AttemptObservation>,

    pub slot_list: Option<SlotListDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReservationDto {
    /// `dd/MM/yyyy` or `yyyy-MM-dd`.
    pub date: String,
    /// `hh:mm AM` or `HH:MM`.
    pub time: String,
    pub selected_court: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SlotListDto {
    /// Loading checks that report busy after every query.
    pub loading_polls: u32,
    pub slots: Vec<SlotDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SlotDto {
    pub id: String,
    pub time_from: String,
    pub time_to: String,

    /// Refreshes after which the slot shows up in the list.
    #[serde(default)]
    pub listed_after_refreshes: u32,
}
