use chrono::{Local, TimeDelta, TimeZone};
use std::path::PathBuf;
use std::time::Duration;

use booking_agent::api::settings_dto::{BookingSettingsDto, PreferredCourtsDto};
use booking_agent::domain::booking::attempt::SessionOutcome;
use booking_agent::domain::booking::outcome::{REASON_NO_LONGER_AVAILABLE, Reason};
use booking_agent::domain::booking::state_machine::{AttemptState, BookingStateMachine};
use booking_agent::domain::clock::clock::SimulatedClock;
use booking_agent::domain::journal::journal::AttemptJournal;
use booking_agent::domain::settings::BookingSettings;
use booking_agent::domain::simulator::scripted_page::ScriptedBookingPage;
use booking_agent::domain::utils::id::ResourceId;
use booking_agent::load_scenario;

fn scenario_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data/scenarios").join(name)
}

fn settings(courts: &str) -> BookingSettings {
    let dto = BookingSettingsDto { preferred_courts: PreferredCourtsDto::Text(courts.to_string()), ..BookingSettingsDto::default() };
    BookingSettings::try_from(dto).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_every_court_taken_ends_with_the_last_message() {
    let scenario = load_scenario(scenario_path("court_all_taken.json")).unwrap();
    let page = ScriptedBookingPage::from_dto(&scenario).unwrap();
    let clock = SimulatedClock::starting_at(Local.with_ymd_and_hms(2025, 11, 12, 17, 55, 0).unwrap()).shared();

    let mut machine = BookingStateMachine::new(page, clock.clone(), settings("4, 5"));
    let plan = machine.schedule_from_page().await.unwrap();
    assert_eq!(plan.trigger_instant, Local.with_ymd_and_hms(2025, 11, 12, 17, 59, 59).unwrap() + TimeDelta::milliseconds(300));

    let outcome = machine.run().await.unwrap();

    assert_eq!(
        outcome,
        SessionOutcome::Failed {
            reason: Reason::new(REASON_NO_LONGER_AVAILABLE, "Court Hard - Court #5 no longer available."),
            resource: Some(ResourceId::from("5")),
            attempts: 3,
        }
    );
    assert_eq!(machine.state(), AttemptState::Failed);
    assert!(clock.now() >= plan.trigger_instant);

    let page = machine.into_page();
    assert_eq!(page.selected(), vec![ResourceId::from("4"), ResourceId::from("5")]);
    assert_eq!(page.dispatched(), vec![ResourceId::from("2"), ResourceId::from("4"), ResourceId::from("5")]);
}

#[tokio::test(start_paused = true)]
async fn test_not_open_yet_is_retried_until_booked_and_journaled() {
    let scenario = load_scenario(scenario_path("court_not_open_yet.json")).unwrap();
    let page = ScriptedBookingPage::from_dto(&scenario).unwrap();
    let clock = SimulatedClock::starting_at(Local.with_ymd_and_hms(2025, 11, 12, 17, 59, 50).unwrap()).shared();

    let journal_path = std::env::temp_dir().join(format!("booking_agent_{}.csv", uuid::Uuid::new_v4()));
    let journal = AttemptJournal::open(Some(journal_path.as_path())).unwrap();

    let mut machine = BookingStateMachine::new(page, clock, settings("6, 4, 5")).with_journal(journal.clone());
    let outcome = machine.book().await.unwrap();
    journal.shutdown();

    assert_eq!(outcome, SessionOutcome::Succeeded { resource: ResourceId::from("6"), attempts: 3 });
    assert!(machine.page().selected().is_empty());

    let contents = std::fs::read_to_string(&journal_path).unwrap();
    let _ = std::fs::remove_file(&journal_path);
    let rows: Vec<&str> = contents.lines().collect();
    assert!(rows[0].starts_with("Time;SessionId;Flow;Event"));
    assert_eq!(rows.iter().filter(|row| row.contains(";Dispatched;")).count(), 3);
    assert_eq!(rows.iter().filter(|row| row.contains(";reservationNotOpenYet;")).count(), 2);
    assert!(rows.last().unwrap().contains(";Terminal;6;3;Succeeded;"));
    assert!(rows.iter().all(|row| *row == rows[0] || row.contains(machine.session_id().as_str())));
}

#[tokio::test(start_paused = true)]
async fn test_two_sessions_run_independently() {
    let scenario = load_scenario(scenario_path("court_not_open_yet.json")).unwrap();
    let clock = SimulatedClock::starting_at(Local.with_ymd_and_hms(2025, 11, 12, 17, 0, 0).unwrap()).shared();

    let mut first = BookingStateMachine::new(ScriptedBookingPage::from_dto(&scenario).unwrap(), clock.clone(), settings("none"));
    let mut second = BookingStateMachine::new(ScriptedBookingPage::from_dto(&scenario).unwrap(), clock.clone(), settings("none"));
    assert_ne!(first.session_id(), second.session_id());

    first.schedule_from_page().await.unwrap();
    second.schedule_from_page().await.unwrap();

    let stop = second.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        stop.stop();
    });

    let (first, second) = tokio::join!(first.run(), second.run());

    assert!(first.unwrap().is_success());
    assert_eq!(second.unwrap(), SessionOutcome::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_missing_form_is_reported_before_scheduling() {
    let page = ScriptedBookingPage::from_dto(&Default::default()).unwrap();
    let clock = SimulatedClock::starting_at(Local::now()).shared();
    let mut machine = BookingStateMachine::new(page, clock, settings("6"));

    let result = machine.schedule_from_page().await;

    assert!(matches!(result, Err(booking_agent::error::Error::AdapterUnavailable(_))));
    assert_eq!(machine.state(), AttemptState::Idle);
}
