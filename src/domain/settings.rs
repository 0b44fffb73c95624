use std::path::{Path, PathBuf};

use crate::api::settings_dto::{AgentSettingsDto, BookingSettingsDto, ClassifierRuleDto, DropInSettingsDto};
use crate::domain::booking::attempt::AttemptConfig;
use crate::domain::booking::outcome::{ClassifierRule, OutcomeClassifier};
use crate::domain::booking::trigger::LeadPolicy;
use crate::domain::refresh::refresh_scheduler::RefreshConfig;
use crate::domain::utils::id::ResourceId;
use crate::error::{Error, Result};
use crate::loader::parser::{parse_json_file, write_json_file};

/// Opening the booking a full day early is never intended.
const MAX_LEAD_TIME_MILLIS: u32 = 24 * 60 * 60 * 1000;

const MAX_REGISTRATION_LEAD_HOURS: i64 = 7 * 24;
const MAX_REFRESH_MILLIS: i64 = 24 * 60 * 60 * 1000;
const MAX_KEEP_ALIVE_MINUTES: i64 = 24 * 60;

fn check_range(name: &str, value: i64, min: i64, max: i64) -> Result<()> {
    if value < min || value > max {
        return Err(Error::InvalidSettings(format!("{} must be within {}..={}, got {}", name, min, max, value)));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct BookingSettings {
    pub lead_policy: LeadPolicy,
    pub preferred_order: Vec<ResourceId>,
    pub classifier: OutcomeClassifier,
    pub attempt: AttemptConfig,
}

impl Default for BookingSettings {
    fn default() -> Self {
        BookingSettings {
            lead_policy: LeadPolicy::default(),
            preferred_order: BookingSettingsDto::default().preferred_courts.resource_ids(),
            classifier: OutcomeClassifier::default(),
            attempt: AttemptConfig::default(),
        }
    }
}

impl TryFrom<BookingSettingsDto> for BookingSettings {
    type Error = Error;

    fn try_from(dto: BookingSettingsDto) -> Result<Self> {
        if dto.booking_lead_time_millis >= MAX_LEAD_TIME_MILLIS {
            return Err(Error::InvalidSettings(format!(
                "bookingLeadTimeMillis must stay below one day, got {}",
                dto.booking_lead_time_millis
            )));
        }
        if dto.attempt.poll_interval_millis == 0 {
            return Err(Error::InvalidSettings("attempt.pollIntervalMillis must be positive".to_string()));
        }

        let classifier = match dto.classifier_rules {
            Some(rules) => OutcomeClassifier::new(rules.into_iter().map(ClassifierRule::try_from).collect::<Result<Vec<_>>>()?),
            None => OutcomeClassifier::default(),
        };

        Ok(BookingSettings {
            lead_policy: LeadPolicy { lead_days: dto.reservation_lead_days, lead_time_millis: dto.booking_lead_time_millis },
            preferred_order: dto.preferred_courts.resource_ids(),
            classifier,
            attempt: dto.attempt,
        })
    }
}

impl TryFrom<ClassifierRuleDto> for ClassifierRule {
    type Error = Error;

    fn try_from(dto: ClassifierRuleDto) -> Result<Self> {
        if dto.pattern.trim().is_empty() {
            return Err(Error::InvalidSettings("classifier rule with an empty pattern".to_string()));
        }
        if dto.reason.trim().is_empty() {
            return Err(Error::InvalidSettings(format!("classifier rule '{}' has no reason label", dto.pattern)));
        }
        Ok(ClassifierRule::new(dto.pattern.trim(), dto.disposition, dto.reason))
    }
}

#[derive(Debug, Clone)]
pub struct DropInSettings {
    pub location: String,
    pub service: String,
    pub registration_lead_hours: i64,
    pub loading_poll_millis: u64,
    pub refresh: RefreshConfig,
    pub attempt: AttemptConfig,
}

impl Default for DropInSettings {
    fn default() -> Self {
        // The defaults are valid by construction.
        let dto = DropInSettingsDto::default();
        DropInSettings {
            location: dto.location,
            service: dto.service,
            registration_lead_hours: dto.registration_lead_hours,
            loading_poll_millis: dto.loading_poll_millis,
            refresh: dto.refresh,
            attempt: dto.attempt,
        }
    }
}

impl TryFrom<DropInSettingsDto> for DropInSettings {
    type Error = Error;

    fn try_from(dto: DropInSettingsDto) -> Result<Self> {
        check_range("registrationLeadHours", dto.registration_lead_hours, 0, MAX_REGISTRATION_LEAD_HOURS)?;
        if dto.loading_poll_millis == 0 || dto.attempt.poll_interval_millis == 0 {
            return Err(Error::InvalidSettings("poll intervals must be positive".to_string()));
        }
        let refresh = &dto.refresh;
        check_range("refresh.testRefreshIntervalMillis", refresh.test_refresh_interval_millis, 0, MAX_REFRESH_MILLIS)?;
        check_range("refresh.refreshIntervalMillis", refresh.refresh_interval_millis, 1, MAX_REFRESH_MILLIS)?;
        check_range("refresh.initRefreshGraceMillis", refresh.init_refresh_grace_millis, 0, MAX_REFRESH_MILLIS)?;
        check_range("refresh.keepAliveIntervalMinutes", refresh.keep_alive_interval_minutes, 1, MAX_KEEP_ALIVE_MINUTES)?;

        Ok(DropInSettings {
            location: dto.location,
            service: dto.service,
            registration_lead_hours: dto.registration_lead_hours,
            loading_poll_millis: dto.loading_poll_millis,
            refresh: dto.refresh,
            attempt: dto.attempt,
        })
    }
}

/// Settings file on disk. A missing file reads as all defaults.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SettingsStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<AgentSettingsDto> {
        if !self.path.exists() {
            log::info!("No settings at '{}', using defaults.", self.path.display());
            return Ok(AgentSettingsDto::default());
        }

        let settings = parse_json_file::<AgentSettingsDto>(&self.path)?;
        log::info!("Settings loaded from '{}'.", self.path.display());
        Ok(settings)
    }

    pub fn save(&self, settings: &AgentSettingsDto) -> Result<()> {
        write_json_file(&self.path, settings)?;
        log::debug!("Settings saved to '{}'.", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::settings_dto::PreferredCourtsDto;
    use crate::domain::booking::outcome::{Outcome, RetryDisposition};

    #[test]
    fn test_missing_keys_fall_back_to_defaults() {
        let dto: AgentSettingsDto = serde_json::from_str(r#"{ "court": { "reservationLeadDays": 7 } }"#).unwrap();
        let settings = BookingSettings::try_from(dto.court).unwrap();

        assert_eq!(settings.lead_policy, LeadPolicy { lead_days: 7, lead_time_millis: 700 });
        assert_eq!(settings.preferred_order, vec![ResourceId::from("6"), ResourceId::from("4"), ResourceId::from("5")]);
        assert_eq!(dto.drop_in.registration_lead_hours, 21);
    }

    #[test]
    fn test_preferred_courts_forms() {
        assert!(PreferredCourtsDto::Text(" None ".to_string()).resource_ids().is_empty());
        assert_eq!(PreferredCourtsDto::Text("3,, 1 ".to_string()).resource_ids(), vec![ResourceId::from("3"), ResourceId::from("1")]);
        assert_eq!(PreferredCourtsDto::Text("6, four, 5, #2".to_string()).resource_ids(), vec![ResourceId::from("6"), ResourceId::from("5")]);
        assert_eq!(PreferredCourtsDto::List(vec!["12".to_string(), "A".to_string()]).resource_ids(), vec![ResourceId::from("12")]);

        let dto: BookingSettingsDto = serde_json::from_str(r#"{ "preferredCourts": ["2", "7"] }"#).unwrap();
        assert_eq!(dto.preferred_courts.resource_ids(), vec![ResourceId::from("2"), ResourceId::from("7")]);
    }

    #[test]
    fn test_custom_classifier_rules_replace_defaults() {
        let dto: BookingSettingsDto = serde_json::from_str(
            r#"{ "classifierRules": [ { "pattern": "Court {court} is held", "disposition": "nextResource", "reason": "held" } ] }"#,
        )
        .unwrap();
        let settings = BookingSettings::try_from(dto).unwrap();

        assert_eq!(settings.classifier.rules().len(), 1);
        assert_eq!(settings.classifier.rules()[0].disposition, RetryDisposition::NextResource);
        assert!(matches!(settings.classifier.classify_message("Court 4 is held"), Outcome::RetryableNextResource(r) if r.label == "held"));
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let dto = BookingSettingsDto { booking_lead_time_millis: 90_000_000, ..BookingSettingsDto::default() };
        assert!(matches!(BookingSettings::try_from(dto), Err(Error::InvalidSettings(_))));

        let rule = ClassifierRuleDto { pattern: "  ".to_string(), disposition: RetryDisposition::Terminal, reason: "x".to_string() };
        assert!(ClassifierRule::try_from(rule).is_err());

        let dto = DropInSettingsDto { registration_lead_hours: -1, ..DropInSettingsDto::default() };
        assert!(DropInSettings::try_from(dto).is_err());
    }

    #[test]
    fn test_refresh_knobs_are_bounded() {
        let parse = |json: &str| DropInSettings::try_from(serde_json::from_str::<DropInSettingsDto>(json).unwrap());

        assert!(matches!(parse(r#"{ "refresh": { "testRefreshIntervalMillis": 9223372036854775807 } }"#), Err(Error::InvalidSettings(_))));
        assert!(parse(r#"{ "refresh": { "testRefreshIntervalMillis": -5 } }"#).is_err());
        assert!(parse(r#"{ "refresh": { "initRefreshGraceMillis": -1 } }"#).is_err());
        assert!(parse(r#"{ "refresh": { "keepAliveIntervalMinutes": 100000 } }"#).is_err());
        assert!(matches!(parse(r#"{ "registrationLeadHours": 9000000000000 }"#), Err(Error::InvalidSettings(_))));

        let accepted = parse(r#"{ "registrationLeadHours": 48, "refresh": { "testRefreshIntervalMillis": 0, "initRefreshGraceMillis": 0 } }"#).unwrap();
        assert_eq!(accepted.registration_lead_hours, 48);
    }
}
