use chrono::{DateTime, Local, LocalResult, NaiveDate, NaiveTime, TimeDelta, TimeZone};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::domain::booking::attempt::{AttemptDriver, SessionOutcome};
use crate::domain::booking::fallback::ResourceFallbackQueue;
use crate::domain::booking::outcome::{OutcomeClassifier, REASON_ADAPTER_UNAVAILABLE, Reason};
use crate::domain::booking::page::SlotListPage;
use crate::domain::clock::clock::SharedClock;
use crate::domain::journal::journal::{ANALYTICS_TARGET, AttemptJournal, JournalEvent, JournalField};
use crate::domain::refresh::refresh_scheduler::AdaptiveRefreshScheduler;
use crate::domain::refresh::search_window::SearchWindow;
use crate::domain::settings::DropInSettings;
use crate::domain::utils::id::SessionId;
use crate::error::{Error, Result};

pub const DROP_IN_FLOW: &str = "dropIn";

/// The class a registration is wanted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropInRequest {
    pub location: String,
    pub service: String,
    pub date: NaiveDate,
    pub time_from: NaiveTime,
    pub time_to: NaiveTime,
}

impl DropInRequest {
    pub fn class_start(&self) -> Result<DateTime<Local>> {
        match Local.from_local_datetime(&self.date.and_time(self.time_from)) {
            LocalResult::Single(start) => Ok(start),
            LocalResult::Ambiguous(earliest, _) => Ok(earliest),
            LocalResult::None => Err(Error::InvalidTime(format!("{} {} does not exist in the local time zone", self.date, self.time_from))),
        }
    }

    /// Registration opens a fixed number of hours before the class starts.
    pub fn registration_opens(&self, lead_hours: i64) -> Result<DateTime<Local>> {
        let start = self.class_start()?;
        TimeDelta::try_hours(lead_hours)
            .and_then(|lead| start.checked_sub_signed(lead))
            .ok_or_else(|| Error::InvalidTime(format!("registration opening {} h before {} is out of range", lead_hours, start)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PollerState {
    Loaded,
    Refreshing,
    Registering,
    Registered,
    Failed,
}

#[derive(Debug)]
struct PollerControl {
    state: PollerState,
    cancel: CancellationToken,
}

/// Stops a poller from another task.
#[derive(Debug, Clone)]
pub struct PollerStopHandle {
    control: Arc<Mutex<PollerControl>>,
}

impl PollerStopHandle {
    fn control(&self) -> MutexGuard<'_, PollerControl> {
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ends the refresh loop. Only a refreshing poller can be stopped; once a
    /// slot was found the registration runs to completion.
    pub fn stop(&self) {
        let mut control = self.control();
        if control.state != PollerState::Refreshing {
            return;
        }
        control.cancel.cancel();
        control.state = PollerState::Loaded;
        log::info!("Refreshing stopped.");
    }

    pub fn state(&self) -> PollerState {
        self.control().state
    }
}

/// Drop-in registration: keeps a class list fresh until the wanted slot shows
/// up, then registers for it.
#[derive(Debug)]
pub struct RegistrationPoller<P: SlotListPage> {
    session_id: SessionId,
    page: P,
    clock: SharedClock,
    settings: DropInSettings,
    classifier: OutcomeClassifier,
    stop_handle: PollerStopHandle,
    journal: Option<AttemptJournal>,
}

impl<P: SlotListPage> RegistrationPoller<P> {
    pub fn new(page: P, clock: SharedClock, settings: DropInSettings, classifier: OutcomeClassifier) -> Self {
        RegistrationPoller {
            session_id: SessionId::generate(),
            page,
            clock,
            settings,
            classifier,
            stop_handle: PollerStopHandle {
                control: Arc::new(Mutex::new(PollerControl { state: PollerState::Loaded, cancel: CancellationToken::new() })),
            },
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: AttemptJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn state(&self) -> PollerState {
        self.stop_handle.state()
    }

    pub fn stop_handle(&self) -> PollerStopHandle {
        self.stop_handle.clone()
    }

    pub fn stop(&self) {
        self.stop_handle.stop();
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    pub fn into_page(self) -> P {
        self.page
    }

    fn set_state(&self, state: PollerState) {
        self.stop_handle.control().state = state;
    }

    /// Applies the search filters and refreshes until the requested slot can be
    /// registered, the registration fails, or `stop` is called.
    pub async fn try_register(&mut self, request: &DropInRequest) -> Result<SessionOutcome> {
        let cancel = {
            let mut control = self.stop_handle.control();
            if control.state != PollerState::Loaded {
                return Err(Error::InvalidTransition { action: "register", state: format!("{:?}", control.state) });
            }
            control.cancel = CancellationToken::new();
            control.cancel.clone()
        };

        let anchor = request.registration_opens(self.settings.registration_lead_hours)?;
        let scheduler = AdaptiveRefreshScheduler::new(anchor, self.clock.now(), &self.settings.refresh)?;

        match self.poll(request, anchor, scheduler, &cancel).await {
            Ok(outcome) => {
                self.finish(&outcome);
                Ok(outcome)
            }
            Err(error) => {
                log::error!("Drop-in session {}: page adapter failed: {}", self.session_id, error);
                self.finish(&SessionOutcome::Failed {
                    reason: Reason::new(REASON_ADAPTER_UNAVAILABLE, error.to_string()),
                    resource: None,
                    attempts: 0,
                });
                Err(error)
            }
        }
    }

    async fn poll(
        &mut self,
        request: &DropInRequest,
        anchor: DateTime<Local>,
        mut scheduler: AdaptiveRefreshScheduler,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome> {
        let mut window = SearchWindow::new(request.time_from, request.time_to);
        self.page.apply_filters(&window.filters(&request.location, &request.service, request.date)).await?;

        {
            let mut control = self.stop_handle.control();
            if cancel.is_cancelled() {
                return Ok(SessionOutcome::Stopped);
            }
            control.state = PollerState::Refreshing;
        }

        log::info!(
            "Drop-in session {}: looking for {} {}-{}, registration opens at {} ({} planned refreshes).",
            self.session_id,
            request.date,
            request.time_from.format("%I:%M %p"),
            request.time_to.format("%I:%M %p"),
            anchor.format("%Y-%m-%d %H:%M:%S"),
            scheduler.remaining()
        );

        let mut refreshes: u64 = 0;
        loop {
            if !self.wait_for_loading(cancel).await? {
                return Ok(SessionOutcome::Stopped);
            }

            if let Some(slot) = self.page.find_matching_slot(request.time_from, request.time_to).await? {
                {
                    let mut control = self.stop_handle.control();
                    if cancel.is_cancelled() {
                        return Ok(SessionOutcome::Stopped);
                    }
                    control.state = PollerState::Registering;
                }
                log::info!("Found matching slot {} after {} refresh(es), registering.", slot, refreshes);

                let driver = AttemptDriver {
                    session_id: &self.session_id,
                    flow: DROP_IN_FLOW,
                    classifier: &self.classifier,
                    config: &self.settings.attempt,
                    cancel,
                    journal: self.journal.as_ref(),
                };
                let mut no_fallbacks = ResourceFallbackQueue::default();
                return driver.run(&mut self.page, &mut no_fallbacks, slot).await;
            }

            let delay = scheduler.next_interval(self.clock.now());
            tokio::select! {
                _ = cancel.cancelled() => return Ok(SessionOutcome::Stopped),
                _ = tokio::time::sleep(delay.to_std().unwrap_or(Duration::ZERO)) => {}
            }

            refreshes += 1;
            let window_end = window.perturb();
            log::debug!("Refresh #{}: window end {}.", refreshes, window_end.format("%I:%M %p"));
            self.page.set_window_end(window_end).await?;
        }
    }

    /// `false` when stopped while waiting.
    async fn wait_for_loading(&mut self, cancel: &CancellationToken) -> Result<bool> {
        let poll = Duration::from_millis(self.settings.loading_poll_millis);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(poll) => {}
            }
            if !self.page.is_loading().await? {
                return Ok(true);
            }
        }
    }

    fn finish(&self, outcome: &SessionOutcome) {
        let (state, resource, attempts, reason) = match outcome {
            SessionOutcome::Succeeded { resource, attempts } => (PollerState::Registered, Some(resource), *attempts, None),
            SessionOutcome::Failed { reason, resource, attempts } => (PollerState::Failed, resource.as_ref(), *attempts, Some(reason)),
            SessionOutcome::Stopped => return,
        };
        self.set_state(state);

        tracing::info!(
            target: ANALYTICS_TARGET,
            Session = %self.session_id,
            Flow = DROP_IN_FLOW,
            State = ?state,
            Resource = resource.map(|r| r.as_str()).unwrap_or(""),
            Attempts = attempts,
            Reason = reason.map(|r| r.label.as_str()).unwrap_or(""),
            Message = reason.map(|r| r.message.as_str()).unwrap_or(""),
        );

        if let Some(journal) = &self.journal {
            let mut entry = JournalEvent::new("Terminal");
            entry
                .set(JournalField::SessionId, self.session_id.as_str())
                .set(JournalField::Flow, DROP_IN_FLOW)
                .set(JournalField::Attempt, attempts)
                .set(JournalField::Outcome, format!("{:?}", state));
            if let Some(resource) = resource {
                entry.set(JournalField::Resource, resource.as_str());
            }
            if let Some(reason) = reason {
                entry.set(JournalField::Reason, reason.label.as_str()).set(JournalField::Message, reason.message.as_str());
            }
            journal.record(entry);
        }
    }
}
