use serde::{Deserialize, Serialize};

use crate::domain::booking::attempt::AttemptConfig;
use crate::domain::booking::outcome::RetryDisposition;
use crate::domain::refresh::refresh_scheduler::RefreshConfig;
use crate::domain::utils::id::ResourceId;

/// Root of the settings file. Every section falls back to its defaults.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettingsDto {
    pub court: BookingSettingsDto,
    pub drop_in: DropInSettingsDto,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BookingSettingsDto {
    pub reservation_lead_days: u32,
    pub booking_lead_time_millis: u32,
    pub preferred_courts: PreferredCourtsDto,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier_rules: Option<Vec<ClassifierRuleDto>>,

    pub attempt: AttemptConfig,
}

impl Default for BookingSettingsDto {
    fn default() -> Self {
        BookingSettingsDto {
            reservation_lead_days: 10,
            booking_lead_time_millis: 700,
            preferred_courts: PreferredCourtsDto::Text("6, 4, 5".to_string()),
            classifier_rules: None,
            attempt: AttemptConfig::default(),
        }
    }
}

/// Either `"6, 4, 5"` (or `"none"`) as typed into a text field, or a JSON array.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum PreferredCourtsDto {
    List(Vec<String>),
    Text(String),
}

impl PreferredCourtsDto {
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        let names: Vec<&str> = match self {
            PreferredCourtsDto::Text(text) if text.trim().eq_ignore_ascii_case("none") => Vec::new(),
            PreferredCourtsDto::Text(text) => text.split(',').collect(),
            PreferredCourtsDto::List(list) => list.iter().map(String::as_str).collect(),
        };

        names
            .into_iter()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .filter(|name| {
                let numeric = name.bytes().all(|b| b.is_ascii_digit());
                if !numeric {
                    log::warn!("Ignoring preferred court '{}': court numbers only.", name);
                }
                numeric
            })
            .map(ResourceId::from)
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierRuleDto {
    /// Message template; `{name}` placeholders match any non-empty text.
    pub pattern: String,
    pub disposition: RetryDisposition,
    pub reason: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DropInSettingsDto {
    pub location: String,
    pub service: String,
    pub registration_lead_hours: i64,
    pub loading_poll_millis: u64,
    pub refresh: RefreshConfig,
    pub attempt: AttemptConfig,
}

impl Default for DropInSettingsDto {
    fn default() -> Self {
        DropInSettingsDto {
            location: "Cornell Community Centre".to_string(),
            service: "Drop-In Pickleball: Adults".to_string(),
            registration_lead_hours: 21,
            loading_poll_millis: 50,
            refresh: RefreshConfig::default(),
            attempt: AttemptConfig::default(),
        }
    }
}
