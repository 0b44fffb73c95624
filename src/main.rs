use anyhow::{Context, anyhow};
use chrono::{Local, NaiveDateTime, TimeZone};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

use booking_agent::api::settings_dto::PreferredCourtsDto;
use booking_agent::domain::booking::attempt::SessionOutcome;
use booking_agent::domain::booking::state_machine::BookingStateMachine;
use booking_agent::domain::clock::clock::{SharedClock, SimulatedClock, SystemClock};
use booking_agent::domain::countdown::{CountdownTimer, format_hms};
use booking_agent::domain::journal::journal::AttemptJournal;
use booking_agent::domain::refresh::poller::{DropInRequest, RegistrationPoller};
use booking_agent::domain::refresh::search_window::{parse_clock_time, parse_date};
use booking_agent::domain::settings::{BookingSettings, DropInSettings, SettingsStore};
use booking_agent::domain::simulator::scripted_page::{ScriptedBookingPage, ScriptedSlotListPage};
use booking_agent::{load_scenario, logger};

/// Books a court the moment reservations open, or registers for a drop-in class
/// as soon as it is listed. Runs against a scripted page described by a
/// scenario file.
#[derive(Parser, Debug)]
#[command(name = "booking-agent", version)]
struct Cli {
    #[arg(long, default_value = "booking_agent.settings.json")]
    settings: PathBuf,

    /// CSV journal of every attempt. Written to stdout when the path is `-`.
    #[arg(long)]
    journal: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Schedule a court booking for the reservation shown on the page.
    Court(CourtArgs),
    /// Refresh a class list until a drop-in slot can be registered.
    DropIn(DropInArgs),
}

#[derive(Args, Debug)]
struct PageArgs {
    /// Scenario describing the page.
    #[arg(long)]
    scenario: PathBuf,

    /// Simulated wall time to start at, `YYYY-MM-DD HH:MM:SS`. Uses the system clock when absent.
    #[arg(long)]
    clock_start: Option<String>,

    /// Milliseconds the booking site's clock runs ahead of this machine.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    skew_ms: i64,
}

#[derive(Args, Debug)]
struct CourtArgs {
    #[command(flatten)]
    page: PageArgs,

    #[arg(long)]
    lead_days: Option<u32>,

    #[arg(long)]
    lead_time_ms: Option<u32>,

    /// Preferred court order, e.g. "6, 4, 5" or "none".
    #[arg(long)]
    courts: Option<String>,
}

#[derive(Args, Debug)]
struct DropInArgs {
    #[command(flatten)]
    page: PageArgs,

    /// Class date, `dd/MM/yyyy`.
    #[arg(long)]
    date: String,

    /// Class start, e.g. "01:00 PM".
    #[arg(long)]
    from: String,

    /// Class end, e.g. "03:00 PM".
    #[arg(long)]
    to: String,

    #[arg(long)]
    location: Option<String>,

    #[arg(long)]
    service: Option<String>,
}

fn build_clock(args: &PageArgs) -> anyhow::Result<SharedClock> {
    match &args.clock_start {
        Some(start) => {
            let naive = NaiveDateTime::parse_from_str(start, "%Y-%m-%d %H:%M:%S").with_context(|| format!("invalid --clock-start '{}'", start))?;
            let start = Local.from_local_datetime(&naive).earliest().ok_or_else(|| anyhow!("'{}' does not exist locally", start))?;
            log::info!("Using a simulated clock starting at {}.", start.format("%Y-%m-%d %H:%M:%S"));
            Ok(SimulatedClock::starting_at(start).shared())
        }
        None => Ok(SystemClock::with_skew_ms(args.skew_ms).shared()),
    }
}

fn open_journal(path: Option<&PathBuf>) -> anyhow::Result<Option<AttemptJournal>> {
    match path {
        None => Ok(None),
        Some(path) if path.as_os_str() == "-" => Ok(Some(AttemptJournal::open(None)?)),
        Some(path) => Ok(Some(AttemptJournal::open(Some(path.as_path()))?)),
    }
}

/// Redraws the countdown once per second until `done` is cancelled.
fn spawn_countdown(clock: SharedClock, mut timer: CountdownTimer, done: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(delay) = timer.next_tick_delay(clock.now()) {
            tokio::select! {
                _ = done.cancelled() => timer.stop(),
                _ = tokio::time::sleep(delay) => match timer.reading(clock.now()) {
                    Some(remaining) if remaining > 0 => {
                        eprint!("\r{} {}", "Booking starts in".cyan(), format_hms(remaining).bold());
                        let _ = std::io::stderr().flush();
                    }
                    _ => timer.stop(),
                },
            }
        }
        eprintln!();
    })
}

fn print_summary(flow: &str, outcome: &SessionOutcome) -> ExitCode {
    match outcome {
        SessionOutcome::Succeeded { resource, attempts } => {
            println!("{} {} {} after {} attempt(s).", flow.bold(), "booked".green().bold(), resource.as_str().bold(), attempts);
            ExitCode::SUCCESS
        }
        SessionOutcome::Failed { reason, resource, attempts } => {
            println!(
                "{} {} on {} after {} attempt(s): {}",
                flow.bold(),
                "failed".red().bold(),
                resource.as_ref().map(|r| r.as_str()).unwrap_or("-"),
                attempts,
                reason
            );
            ExitCode::FAILURE
        }
        SessionOutcome::Stopped => {
            println!("{} {}", flow.bold(), "stopped".yellow().bold());
            ExitCode::SUCCESS
        }
    }
}

async fn run_court(cli: &Cli, args: &CourtArgs) -> anyhow::Result<ExitCode> {
    let store = SettingsStore::new(&cli.settings);
    let mut dto = store.load()?;
    if let Some(days) = args.lead_days {
        dto.court.reservation_lead_days = days;
    }
    if let Some(millis) = args.lead_time_ms {
        dto.court.booking_lead_time_millis = millis;
    }
    if let Some(courts) = &args.courts {
        dto.court.preferred_courts = PreferredCourtsDto::Text(courts.clone());
    }
    let settings = BookingSettings::try_from(dto.court.clone())?;

    let scenario = load_scenario(&args.page.scenario)?;
    let page = ScriptedBookingPage::from_dto(&scenario)?;
    let clock = build_clock(&args.page)?;
    let journal = open_journal(cli.journal.as_ref())?;

    let mut machine = BookingStateMachine::new(page, clock.clone(), settings);
    if let Some(journal) = journal.clone() {
        machine = machine.with_journal(journal);
    }

    let plan = machine.schedule_from_page().await?;
    store.save(&dto)?;

    if plan.bookable_now {
        println!("{}", "Book Now".green().bold());
    } else {
        println!("{} {}", "Schedule Booking at".cyan(), plan.trigger_instant.format("%Y-%m-%d %H:%M:%S%.3f").to_string().bold());
    }

    let stop = machine.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, stopping the session.");
            stop.stop();
        }
    });

    let done = CancellationToken::new();
    let countdown = if plan.bookable_now {
        None
    } else {
        let mut timer = CountdownTimer::new();
        timer.tick_down(plan.trigger_instant);
        Some(spawn_countdown(clock.clone(), timer, done.clone()))
    };

    let result = machine.run().await;
    done.cancel();
    if let Some(countdown) = countdown {
        let _ = countdown.await;
    }
    if let Some(journal) = journal {
        journal.shutdown();
    }

    Ok(print_summary("Court", &result?))
}

async fn run_drop_in(cli: &Cli, args: &DropInArgs) -> anyhow::Result<ExitCode> {
    let store = SettingsStore::new(&cli.settings);
    let mut dto = store.load()?;
    if let Some(location) = &args.location {
        dto.drop_in.location = location.clone();
    }
    if let Some(service) = &args.service {
        dto.drop_in.service = service.clone();
    }
    let court = BookingSettings::try_from(dto.court.clone())?;
    let settings = DropInSettings::try_from(dto.drop_in.clone())?;

    let request = DropInRequest {
        location: settings.location.clone(),
        service: settings.service.clone(),
        date: parse_date(&args.date)?,
        time_from: parse_clock_time(&args.from)?,
        time_to: parse_clock_time(&args.to)?,
    };

    let scenario = load_scenario(&args.page.scenario)?;
    let page = ScriptedSlotListPage::from_dto(&scenario)?;
    let clock = build_clock(&args.page)?;
    let journal = open_journal(cli.journal.as_ref())?;

    let mut poller = RegistrationPoller::new(page, clock, settings, court.classifier);
    if let Some(journal) = journal.clone() {
        poller = poller.with_journal(journal);
    }
    store.save(&dto)?;

    let stop = poller.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, stopping the refresh loop.");
            stop.stop();
        }
    });

    let result = poller.try_register(&request).await;
    if let Some(journal) = journal {
        journal.shutdown();
    }

    Ok(print_summary("Drop-in", &result?))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logger::init();

    match &cli.command {
        Command::Court(args) => run_court(&cli, args).await,
        Command::DropIn(args) => run_drop_in(&cli, args).await,
    }
}
