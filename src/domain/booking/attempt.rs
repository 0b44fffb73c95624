use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::domain::booking::fallback::ResourceFallbackQueue;
use crate::domain::booking::outcome::{Outcome, OutcomeClassifier, REASON_RETRY_LIMIT, Reason};
use crate::domain::booking::page::BookingPage;
use crate::domain::journal::journal::{AttemptJournal, JournalEvent, JournalField};
use crate::domain::utils::id::{ResourceId, SessionId};
use crate::error::Result;

/// Tuning of the submit/observe loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttemptConfig {
    /// Delay between two observations of an outstanding attempt.
    pub poll_interval_millis: u64,

    /// Upper bound on re-submits of one resource after "not open yet".
    /// `None` retries until the site answers differently.
    pub max_same_resource_retries: Option<u32>,
}

impl Default for AttemptConfig {
    fn default() -> Self {
        AttemptConfig { poll_interval_millis: 100, max_same_resource_retries: None }
    }
}

impl AttemptConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }
}

/// How a booking session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Succeeded { resource: ResourceId, attempts: u32 },
    Failed { reason: Reason, resource: Option<ResourceId>, attempts: u32 },
    /// `stop()` was called; no classification is reported.
    Stopped,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SessionOutcome::Succeeded { .. })
    }
}

/// Runs the dispatch → observe → classify → retry protocol for one session.
///
/// Only one attempt is ever outstanding: the next dispatch starts after the
/// previous one was classified.
#[derive(Debug, Clone, Copy)]
pub struct AttemptDriver<'a> {
    pub session_id: &'a SessionId,
    pub flow: &'static str,
    pub classifier: &'a OutcomeClassifier,
    pub config: &'a AttemptConfig,
    pub cancel: &'a CancellationToken,
    pub journal: Option<&'a AttemptJournal>,
}

impl AttemptDriver<'_> {
    /// Pops fallbacks until the page accepts one. `None` once the queue is dry.
    pub async fn select_next_fallback<P>(&self, page: &mut P, queue: &mut ResourceFallbackQueue) -> Result<Option<ResourceId>>
    where
        P: BookingPage + ?Sized,
    {
        while let Some(resource) = queue.next() {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            if page.select_resource(&resource).await? {
                log::info!("Selected fallback resource {} ({} left).", resource, queue.len());
                return Ok(Some(resource));
            }
            log::warn!("Fallback resource {} is not selectable, trying the next one.", resource);
        }

        log::info!("No more fallback resources to try.");
        Ok(None)
    }

    pub async fn run<P>(&self, page: &mut P, queue: &mut ResourceFallbackQueue, first: ResourceId) -> Result<SessionOutcome>
    where
        P: BookingPage + ?Sized,
    {
        let mut resource = first;
        let mut attempts: u32 = 0;
        let mut same_resource_retries: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(SessionOutcome::Stopped);
            }

            attempts += 1;
            log::info!("Attempt #{}: submitting resource {}.", attempts, resource);
            page.dispatch_attempt(&resource).await?;
            self.journal_entry("Dispatched", &resource, attempts, |_| {});

            let Some(outcome) = self.await_outcome(page).await? else {
                return Ok(SessionOutcome::Stopped);
            };
            self.journal_entry("Classified", &resource, attempts, |entry| {
                entry.set(JournalField::Outcome, outcome.kind());
                if let Some(reason) = outcome.reason() {
                    entry.set(JournalField::Reason, reason.label.as_str()).set(JournalField::Message, reason.message.as_str());
                }
            });

            match outcome {
                Outcome::Succeeded => {
                    log::info!("Booking of resource {} confirmed after {} attempt(s).", resource, attempts);
                    return Ok(SessionOutcome::Succeeded { resource, attempts });
                }
                Outcome::RetryableSameResource(reason) => {
                    same_resource_retries += 1;
                    if self.config.max_same_resource_retries.is_some_and(|max| same_resource_retries > max) {
                        log::error!("Giving up on resource {} after {} re-submits: {}", resource, same_resource_retries - 1, reason);
                        let reason = Reason::new(REASON_RETRY_LIMIT, reason.message);
                        return Ok(SessionOutcome::Failed { reason, resource: Some(resource), attempts });
                    }
                    log::info!("Not bookable yet, re-submitting resource {}: {}", resource, reason.message);
                    page.dismiss_blocking_error().await?;
                }
                Outcome::RetryableNextResource(reason) => {
                    log::warn!("Resource {} is gone: {}", resource, reason.message);
                    page.dismiss_blocking_error().await?;
                    match self.select_next_fallback(page, queue).await? {
                        Some(next) => {
                            resource = next;
                            same_resource_retries = 0;
                        }
                        None if self.cancel.is_cancelled() => return Ok(SessionOutcome::Stopped),
                        None => return Ok(SessionOutcome::Failed { reason, resource: Some(resource), attempts }),
                    }
                }
                Outcome::NonRetryable(reason) => {
                    log::error!("Non-retryable error for resource {}: {}", resource, reason.message);
                    return Ok(SessionOutcome::Failed { reason, resource: Some(resource), attempts });
                }
            }
        }
    }

    /// Polls the page until the classifier reports a definitive outcome.
    /// `None` when the session was stopped in the meantime.
    async fn await_outcome<P>(&self, page: &mut P) -> Result<Option<Outcome>>
    where
        P: BookingPage + ?Sized,
    {
        let mut polls: u64 = 0;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }

            polls += 1;
            let observation = page.observe_attempt().await?;
            if self.cancel.is_cancelled() {
                log::info!("Session stopped while an attempt was outstanding, ignoring {:?}.", observation);
                return Ok(None);
            }
            match self.classifier.classify(&observation) {
                Some(outcome) => {
                    log::debug!("Classified {:?} as {} after {} poll(s).", observation, outcome.kind(), polls);
                    return Ok(Some(outcome));
                }
                None => log::trace!("Attempt still outstanding: {:?}", observation),
            }
        }
    }

    fn journal_entry(&self, event: &str, resource: &ResourceId, attempt: u32, fill: impl FnOnce(&mut JournalEvent)) {
        if let Some(journal) = self.journal {
            let mut entry = JournalEvent::new(event);
            entry
                .set(JournalField::SessionId, self.session_id.as_str())
                .set(JournalField::Flow, self.flow)
                .set(JournalField::Resource, resource.as_str())
                .set(JournalField::Attempt, attempt);
            fill(&mut entry);
            journal.record(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::booking::outcome::{AttemptObservation, REASON_NO_LONGER_AVAILABLE, REASON_OTHER};
    use crate::domain::simulator::scripted_page::{PageAction, ScriptedBookingPage};

    const NOT_OPEN_YET: &str = "Jane Doe is only allowed to reserve up to 11/21/2025 06:00 PM";

    fn blocking(message: &str) -> AttemptObservation {
        AttemptObservation::BlockingError { message: message.to_string() }
    }

    fn ids(names: &[&str]) -> Vec<ResourceId> {
        names.iter().map(|n| ResourceId::from(*n)).collect()
    }

    struct Fixture {
        session_id: SessionId,
        classifier: OutcomeClassifier,
        config: AttemptConfig,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new(config: AttemptConfig) -> Self {
            Fixture { session_id: SessionId::generate(), classifier: OutcomeClassifier::default(), config, cancel: CancellationToken::new() }
        }

        fn driver(&self) -> AttemptDriver<'_> {
            AttemptDriver {
                session_id: &self.session_id,
                flow: "court",
                classifier: &self.classifier,
                config: &self.config,
                cancel: &self.cancel,
                journal: None,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_open_yet_resubmits_same_resource() {
        let fixture = Fixture::new(AttemptConfig::default());
        let mut page = ScriptedBookingPage::new(
            None,
            Vec::new(),
            vec![AttemptObservation::InFlight, blocking(NOT_OPEN_YET), AttemptObservation::Pending, AttemptObservation::Succeeded],
        );
        let mut queue = ResourceFallbackQueue::from_preferred(&ids(&["4"]), None);

        let outcome = fixture.driver().run(&mut page, &mut queue, ResourceId::from("6")).await.unwrap();

        assert_eq!(outcome, SessionOutcome::Succeeded { resource: ResourceId::from("6"), attempts: 2 });
        assert_eq!(page.dispatched(), ids(&["6", "6"]));
        assert_eq!(page.actions().iter().filter(|a| **a == PageAction::Dismiss).count(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_resource_retries_can_be_capped() {
        let fixture = Fixture::new(AttemptConfig { max_same_resource_retries: Some(1), ..AttemptConfig::default() });
        let mut page = ScriptedBookingPage::new(None, Vec::new(), vec![blocking(NOT_OPEN_YET), blocking(NOT_OPEN_YET)]);
        let mut queue = ResourceFallbackQueue::default();

        let outcome = fixture.driver().run(&mut page, &mut queue, ResourceId::from("6")).await.unwrap();

        match outcome {
            SessionOutcome::Failed { reason, attempts, .. } => {
                assert_eq!(reason.label, REASON_RETRY_LIMIT);
                assert_eq!(reason.message, NOT_OPEN_YET);
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_error_is_terminal_and_keeps_message() {
        let fixture = Fixture::new(AttemptConfig::default());
        let mut page = ScriptedBookingPage::new(None, Vec::new(), vec![blocking("  Your session has expired.  ")]);
        let mut queue = ResourceFallbackQueue::from_preferred(&ids(&["4", "5"]), None);

        let outcome = fixture.driver().run(&mut page, &mut queue, ResourceId::from("6")).await.unwrap();

        assert_eq!(
            outcome,
            SessionOutcome::Failed {
                reason: Reason::new(REASON_OTHER, "Your session has expired."),
                resource: Some(ResourceId::from("6")),
                attempts: 1
            }
        );
        assert!(page.selected().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unselectable_fallbacks_are_skipped() {
        let fixture = Fixture::new(AttemptConfig::default());
        let mut page = ScriptedBookingPage::new(
            None,
            ids(&["4", "5", "6"]),
            vec![blocking("Court Hard - Court #6 no longer available."), AttemptObservation::Succeeded],
        )
        .with_unselectable("4");
        let mut queue = ResourceFallbackQueue::from_preferred(&ids(&["6", "4", "5"]), Some(&ResourceId::from("6")));

        let outcome = fixture.driver().run(&mut page, &mut queue, ResourceId::from("6")).await.unwrap();

        assert_eq!(outcome, SessionOutcome::Succeeded { resource: ResourceId::from("5"), attempts: 2 });
        assert_eq!(page.selected(), ids(&["4", "5"]));
        assert_eq!(page.dispatched(), ids(&["6", "5"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_ends_with_the_unavailable_reason() {
        let fixture = Fixture::new(AttemptConfig::default());
        let mut page = ScriptedBookingPage::new(None, Vec::new(), vec![blocking("Court Hard - Court #6 no longer available.")]);
        let mut queue = ResourceFallbackQueue::default();

        let outcome = fixture.driver().run(&mut page, &mut queue, ResourceId::from("6")).await.unwrap();

        assert!(matches!(outcome, SessionOutcome::Failed { ref reason, .. } if reason.label == REASON_NO_LONGER_AVAILABLE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_driver_dispatches_nothing() {
        let fixture = Fixture::new(AttemptConfig::default());
        fixture.cancel.cancel();
        let mut page = ScriptedBookingPage::new(None, Vec::new(), vec![AttemptObservation::Succeeded]);
        let mut queue = ResourceFallbackQueue::default();

        let outcome = fixture.driver().run(&mut page, &mut queue, ResourceId::from("6")).await.unwrap();

        assert_eq!(outcome, SessionOutcome::Stopped);
        assert!(page.dispatched().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_out_of_page_answers_is_an_adapter_error() {
        let fixture = Fixture::new(AttemptConfig::default());
        let mut page = ScriptedBookingPage::new(None, Vec::new(), vec![AttemptObservation::InFlight]);
        let mut queue = ResourceFallbackQueue::default();

        let result = fixture.driver().run(&mut page, &mut queue, ResourceId::from("6")).await;

        assert!(matches!(result, Err(crate::error::Error::AdapterUnavailable(_))));
    }
}
