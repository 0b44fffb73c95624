use std::path::Path;

use crate::api::scenario_dto::ScenarioDto;
use crate::domain::settings::{BookingSettings, DropInSettings, SettingsStore};
use crate::error::Result;
use crate::loader::parser::parse_json_file;

pub mod api;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;

/// Settings of both flows, read through `store`.
pub fn load_settings(store: &SettingsStore) -> Result<(BookingSettings, DropInSettings)> {
    let dto = store.load()?;
    let court = BookingSettings::try_from(dto.court)?;
    let drop_in = DropInSettings::try_from(dto.drop_in)?;
    log::info!(
        "Court settings: lead {} day(s) / {} ms, preferred courts {:?}.",
        court.lead_policy.lead_days,
        court.lead_policy.lead_time_millis,
        court.preferred_order.iter().map(|id| id.as_str()).collect::<Vec<_>>()
    );
    Ok((court, drop_in))
}

pub fn load_scenario(file_path: impl AsRef<Path>) -> Result<ScenarioDto> {
    let scenario = parse_json_file::<ScenarioDto>(file_path.as_ref())?;
    log::info!("Scenario '{}' parsed successfully.", file_path.as_ref().display());
    Ok(scenario)
}
