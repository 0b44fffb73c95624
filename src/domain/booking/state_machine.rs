use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::domain::booking::attempt::{AttemptConfig, AttemptDriver, SessionOutcome};
use crate::domain::booking::deadline::{DeadlineHandle, DeadlineScheduler};
use crate::domain::booking::fallback::ResourceFallbackQueue;
use crate::domain::booking::outcome::{OutcomeClassifier, REASON_ADAPTER_UNAVAILABLE, REASON_NO_RESOURCE, Reason};
use crate::domain::booking::page::BookingPage;
use crate::domain::booking::trigger::{LeadPolicy, ReservationTarget, is_bookable_now};
use crate::domain::clock::clock::SharedClock;
use crate::domain::journal::journal::{ANALYTICS_TARGET, AttemptJournal, JournalEvent, JournalField};
use crate::domain::settings::BookingSettings;
use crate::domain::utils::id::{ResourceId, SessionId};
use crate::error::{Error, Result};

pub const COURT_FLOW: &str = "court";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AttemptState {
    Idle,
    Scheduled,
    Attempting,
    Succeeded,
    Failed,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptState::Succeeded | AttemptState::Failed)
    }
}

/// What `schedule` decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPlan {
    pub target: ReservationTarget,
    pub trigger_instant: DateTime<Local>,
    pub bookable_now: bool,
    pub fallback_order: Vec<ResourceId>,
}

#[derive(Debug)]
struct Control {
    state: AttemptState,
    cancel: CancellationToken,
    deadline: Option<DeadlineHandle>,
}

/// Shared part of a session that `stop` needs while `run` holds the machine.
#[derive(Debug, Clone)]
pub struct StopHandle {
    session_id: SessionId,
    control: Arc<Mutex<Control>>,
    deadline: DeadlineScheduler,
}

impl StopHandle {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cancels the armed deadline and suppresses any further page action.
    /// An action already dispatched is left to finish. Terminal sessions stay
    /// terminal. Calling it again has no further effect.
    pub fn stop(&self) {
        let mut control = self.control();
        if control.state.is_terminal() {
            return;
        }

        if let Some(handle) = control.deadline.take() {
            self.deadline.cancel(handle);
        }
        control.cancel.cancel();

        if control.state != AttemptState::Idle {
            log::info!("Session {} stopped while {:?}.", self.session_id, control.state);
            control.state = AttemptState::Idle;
        }
    }

    pub fn state(&self) -> AttemptState {
        self.control().state
    }
}

/// One court booking session: waits for the trigger instant, then submits and
/// retries through fallback resources until a terminal outcome.
///
/// ```text
/// Idle --schedule--> Scheduled --deadline--> Attempting --> Succeeded | Failed
///   ^                    |                        |
///   +------ stop --------+------------------------+
/// ```
#[derive(Debug)]
pub struct BookingStateMachine<P: BookingPage> {
    session_id: SessionId,
    page: P,
    clock: SharedClock,
    policy: LeadPolicy,
    preferred_order: Vec<ResourceId>,
    classifier: OutcomeClassifier,
    config: AttemptConfig,
    stop_handle: StopHandle,
    plan: Option<BookingPlan>,
    queue: ResourceFallbackQueue,
    fired: Option<oneshot::Receiver<()>>,
    journal: Option<AttemptJournal>,
}

impl<P: BookingPage> BookingStateMachine<P> {
    pub fn new(page: P, clock: SharedClock, settings: BookingSettings) -> Self {
        let session_id = SessionId::generate();
        let stop_handle = StopHandle {
            session_id: session_id.clone(),
            control: Arc::new(Mutex::new(Control { state: AttemptState::Idle, cancel: CancellationToken::new(), deadline: None })),
            deadline: DeadlineScheduler::new(clock.clone()),
        };

        BookingStateMachine {
            session_id,
            page,
            clock,
            policy: settings.lead_policy,
            preferred_order: settings.preferred_order,
            classifier: settings.classifier,
            config: settings.attempt,
            stop_handle,
            plan: None,
            queue: ResourceFallbackQueue::default(),
            fired: None,
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

    pub fn state(&self) -> AttemptState {
        self.stop_handle.state()
    }

    pub fn plan(&self) -> Option<&BookingPlan> {
        self.plan.as_ref()
    }

    pub fn stop_handle(&self) -> StopHandle {
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

    /// Reads the reservation form and schedules it.
    pub async fn schedule_from_page(&mut self) -> Result<BookingPlan> {
        let fields = self.page.read_reservation_fields().await?;
        let target = ReservationTarget { reservation_instant: fields.reservation_instant, selected_resource: fields.selected_resource };
        self.schedule(target).await
    }

    /// Arms the deadline for `target`. Re-scheduling a scheduled session
    /// replaces the previous deadline.
    pub async fn schedule(&mut self, target: ReservationTarget) -> Result<BookingPlan> {
        let state = self.state();
        if !matches!(state, AttemptState::Idle | AttemptState::Scheduled) {
            return Err(Error::InvalidTransition { action: "schedule", state: format!("{:?}", state) });
        }

        let candidates = self.page.list_candidate_options().await?;
        let mut queue = ResourceFallbackQueue::from_preferred(&self.preferred_order, target.selected_resource.as_ref());
        queue.retain_offered(&candidates);

        let trigger_instant = target.trigger_instant(&self.policy);
        let bookable_now = is_bookable_now(&trigger_instant, &self.clock.now());

        let (tx, rx) = oneshot::channel();
        {
            let mut control = self.stop_handle.control();
            if let Some(previous) = control.deadline.take() {
                self.stop_handle.deadline.cancel(previous);
            }
            control.cancel = CancellationToken::new();
            control.deadline = Some(self.stop_handle.deadline.arm(trigger_instant, move || {
                let _ = tx.send(());
            }));
            control.state = AttemptState::Scheduled;
        }

        let plan = BookingPlan { target, trigger_instant, bookable_now, fallback_order: queue.remaining() };

        if bookable_now {
            log::info!("Session {}: reservation is bookable now, booking immediately.", self.session_id);
        } else {
            log::info!(
                "Session {}: booking scheduled at {} for {} (fallbacks: {:?}).",
                self.session_id,
                trigger_instant.format("%Y-%m-%d %H:%M:%S%.3f"),
                plan.target.reservation_instant.format("%Y-%m-%d %H:%M"),
                plan.fallback_order.iter().map(ResourceId::as_str).collect::<Vec<_>>()
            );
        }

        if let Some(journal) = &self.journal {
            let mut entry = JournalEvent::new("Scheduled");
            entry
                .set(JournalField::SessionId, self.session_id.as_str())
                .set(JournalField::Flow, COURT_FLOW)
                .set(JournalField::Message, trigger_instant.format("%Y-%m-%d %H:%M:%S%.3f").to_string());
            if let Some(selected) = &plan.target.selected_resource {
                entry.set(JournalField::Resource, selected.as_str());
            }
            journal.record(entry);
        }

        self.queue = queue;
        self.fired = Some(rx);
        self.plan = Some(plan.clone());
        Ok(plan)
    }

    /// Waits for the deadline, then books until a terminal outcome or `stop`.
    ///
    /// A failing page adapter ends the session as `Failed` and is returned as
    /// the error.
    pub async fn run(&mut self) -> Result<SessionOutcome> {
        let (state, cancel) = {
            let control = self.stop_handle.control();
            (control.state, control.cancel.clone())
        };
        let (Some(fired), Some(plan)) = (self.fired.take(), self.plan.clone()) else {
            return Err(Error::InvalidTransition { action: "run", state: format!("{:?}", state) });
        };
        if state != AttemptState::Scheduled {
            return Err(Error::InvalidTransition { action: "run", state: format!("{:?}", state) });
        }

        let deadline_reached = tokio::select! {
            fired = fired => fired.is_ok(),
            _ = cancel.cancelled() => false,
        };

        {
            let mut control = self.stop_handle.control();
            if !deadline_reached || cancel.is_cancelled() {
                return Ok(SessionOutcome::Stopped);
            }
            control.deadline = None;
            control.state = AttemptState::Attempting;
        }
        log::info!("Session {}: trigger instant reached, booking starts.", self.session_id);

        let result = self.drive(&plan, &cancel).await;
        if cancel.is_cancelled() {
            log::info!("Session {}: stopped during the attempt, no outcome is reported.", self.session_id);
            return result.map(|_| SessionOutcome::Stopped);
        }

        match result {
            Ok(outcome) => {
                self.finish(&outcome);
                Ok(outcome)
            }
            Err(error) => {
                log::error!("Session {}: page adapter failed: {}", self.session_id, error);
                let outcome = SessionOutcome::Failed {
                    reason: Reason::new(REASON_ADAPTER_UNAVAILABLE, error.to_string()),
                    resource: plan.target.selected_resource.clone(),
                    attempts: 0,
                };
                self.finish(&outcome);
                Err(error)
            }
        }
    }

    /// `schedule_from_page` followed by `run`.
    pub async fn book(&mut self) -> Result<SessionOutcome> {
        self.schedule_from_page().await?;
        self.run().await
    }

    async fn drive(&mut self, plan: &BookingPlan, cancel: &CancellationToken) -> Result<SessionOutcome> {
        let driver = AttemptDriver {
            session_id: &self.session_id,
            flow: COURT_FLOW,
            classifier: &self.classifier,
            config: &self.config,
            cancel,
            journal: self.journal.as_ref(),
        };

        let first = match &plan.target.selected_resource {
            Some(selected) => Some(selected.clone()),
            None => {
                log::info!("No resource selected on the page, picking the first preferred one.");
                driver.select_next_fallback(&mut self.page, &mut self.queue).await?
            }
        };

        match first {
            Some(resource) => driver.run(&mut self.page, &mut self.queue, resource).await,
            None if cancel.is_cancelled() => Ok(SessionOutcome::Stopped),
            None => Ok(SessionOutcome::Failed {
                reason: Reason::new(REASON_NO_RESOURCE, "no resource selected and no preferred resource selectable"),
                resource: None,
                attempts: 0,
            }),
        }
    }

    fn finish(&mut self, outcome: &SessionOutcome) {
        let terminal = match outcome {
            SessionOutcome::Succeeded { .. } => AttemptState::Succeeded,
            SessionOutcome::Failed { .. } => AttemptState::Failed,
            SessionOutcome::Stopped => return,
        };
        {
            let mut control = self.stop_handle.control();
            if control.state != AttemptState::Attempting {
                log::debug!("Session {}: {:?} ignored, session is {:?}.", self.session_id, terminal, control.state);
                return;
            }
            control.state = terminal;
        }

        let (resource, attempts, reason) = match outcome {
            SessionOutcome::Succeeded { resource, attempts } => (Some(resource), *attempts, None),
            SessionOutcome::Failed { reason, resource, attempts } => (resource.as_ref(), *attempts, Some(reason)),
            SessionOutcome::Stopped => (None, 0, None),
        };

        tracing::info!(
            target: ANALYTICS_TARGET,
            Session = %self.session_id,
            Flow = COURT_FLOW,
            State = ?terminal,
            Resource = resource.map(ResourceId::as_str).unwrap_or(""),
            Attempts = attempts,
            Reason = reason.map(|r| r.label.as_str()).unwrap_or(""),
            Message = reason.map(|r| r.message.as_str()).unwrap_or(""),
        );

        if let Some(journal) = &self.journal {
            let mut entry = JournalEvent::new("Terminal");
            entry
                .set(JournalField::SessionId, self.session_id.as_str())
                .set(JournalField::Flow, COURT_FLOW)
                .set(JournalField::Attempt, attempts)
                .set(JournalField::Outcome, format!("{:?}", terminal));
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
