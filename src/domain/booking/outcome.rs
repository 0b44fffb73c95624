use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const REASON_NOT_OPEN_YET: &str = "reservationNotOpenYet";
pub const REASON_NO_LONGER_AVAILABLE: &str = "resourceNoLongerAvailable";
pub const REASON_OTHER: &str = "other";
pub const REASON_NO_RESOURCE: &str = "noResourceAvailable";
pub const REASON_RETRY_LIMIT: &str = "retryLimitReached";
pub const REASON_ADAPTER_UNAVAILABLE: &str = "adapterUnavailable";

lazy_static! {
    /// Message shapes produced by the court reservation site.
    pub static ref DEFAULT_RULES: Vec<ClassifierRule> = vec![
        ClassifierRule::new("{name} is only allowed to reserve up to {time}", RetryDisposition::SameResource, REASON_NOT_OPEN_YET),
        ClassifierRule::new("{resource} no longer available.", RetryDisposition::NextResource, REASON_NO_LONGER_AVAILABLE),
    ];
}

/// What the page shows while an attempt is outstanding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AttemptObservation {
    /// The submit control shows its busy spinner.
    InFlight,
    /// No definitive signal yet: the error dialog or the success navigation is still on its way.
    Pending,
    /// A modal error blocks the page.
    BlockingError { message: String },
    /// The page reached its success indicator.
    Succeeded,
}

/// Why an attempt ended the way it did. `message` keeps the page text verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub label: String,
    pub message: String,
}

impl Reason {
    pub fn new(label: impl Into<String>, message: impl Into<String>) -> Self {
        Reason { label: label.into(), message: message.into() }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() { write!(f, "{}", self.label) } else { write!(f, "{} ({})", self.label, self.message) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    RetryableSameResource(Reason),
    RetryableNextResource(Reason),
    NonRetryable(Reason),
}

impl Outcome {
    pub fn reason(&self) -> Option<&Reason> {
        match self {
            Outcome::Succeeded => None,
            Outcome::RetryableSameResource(reason) | Outcome::RetryableNextResource(reason) | Outcome::NonRetryable(reason) => {
                Some(reason)
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "Succeeded",
            Outcome::RetryableSameResource(_) => "RetryableSameResource",
            Outcome::RetryableNextResource(_) => "RetryableNextResource",
            Outcome::NonRetryable(_) => "NonRetryable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RetryDisposition {
    SameResource,
    NextResource,
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture(String),
}

/// A message shape such as `"{resource} no longer available."`.
///
/// Text outside braces must match literally; each `{name}` captures one or
/// more characters. The whole message has to be covered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl MessageTemplate {
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find('{') {
            match rest[open..].find('}') {
                Some(close) => {
                    if open > 0 {
                        segments.push(Segment::Literal(rest[..open].to_string()));
                    }
                    segments.push(Segment::Capture(rest[open + 1..open + close].to_string()));
                    rest = &rest[open + close + 1..];
                }
                None => break,
            }
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        MessageTemplate { source: source.to_string(), segments }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the captured fields when `message` has this shape.
    pub fn captures(&self, message: &str) -> Option<HashMap<String, String>> {
        let mut captures = HashMap::new();
        if Self::match_from(&self.segments, message, &mut captures) { Some(captures) } else { None }
    }

    fn match_from(segments: &[Segment], text: &str, captures: &mut HashMap<String, String>) -> bool {
        let Some((first, rest)) = segments.split_first() else {
            return text.is_empty();
        };

        match first {
            Segment::Literal(literal) => text.strip_prefix(literal.as_str()).is_some_and(|tail| Self::match_from(rest, tail, captures)),
            Segment::Capture(name) => {
                let candidates: Vec<usize> = match rest.first() {
                    None => vec![text.len()],
                    Some(Segment::Literal(literal)) => text.match_indices(literal.as_str()).map(|(at, _)| at).collect(),
                    // Adjacent captures: let the first one take a single character.
                    Some(Segment::Capture(_)) => text.char_indices().nth(1).map(|(at, _)| vec![at]).unwrap_or_default(),
                };

                // Longest first, like a greedy `.+`.
                for end in candidates.into_iter().rev().filter(|end| *end > 0) {
                    if Self::match_from(rest, &text[end..], captures) {
                        captures.insert(name.clone(), text[..end].to_string());
                        return true;
                    }
                }
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierRule {
    pub template: MessageTemplate,
    pub disposition: RetryDisposition,
    pub label: String,
}

impl ClassifierRule {
    pub fn new(template: &str, disposition: RetryDisposition, label: impl Into<String>) -> Self {
        ClassifierRule { template: MessageTemplate::parse(template), disposition, label: label.into() }
    }
}

/// Maps attempt observations to outcomes through an ordered rule table.
///
/// The first rule whose template matches a blocking error message decides;
/// unmatched errors are non-retryable.
#[derive(Debug, Clone)]
pub struct OutcomeClassifier {
    rules: Vec<ClassifierRule>,
}

impl Default for OutcomeClassifier {
    fn default() -> Self {
        OutcomeClassifier { rules: DEFAULT_RULES.clone() }
    }
}

impl OutcomeClassifier {
    pub fn new(rules: Vec<ClassifierRule>) -> Self {
        OutcomeClassifier { rules }
    }

    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }

    /// Returns `None` while the attempt has no definitive result yet.
    pub fn classify(&self, observation: &AttemptObservation) -> Option<Outcome> {
        match observation {
            AttemptObservation::InFlight | AttemptObservation::Pending => None,
            AttemptObservation::Succeeded => Some(Outcome::Succeeded),
            AttemptObservation::BlockingError { message } => Some(self.classify_message(message)),
        }
    }

    pub fn classify_message(&self, message: &str) -> Outcome {
        let trimmed = message.trim();

        for rule in &self.rules {
            if let Some(fields) = rule.template.captures(trimmed) {
                log::debug!("Message {:?} matched '{}' with {:?}", trimmed, rule.template.source(), fields);
                let reason = Reason::new(rule.label.clone(), trimmed);
                return match rule.disposition {
                    RetryDisposition::SameResource => Outcome::RetryableSameResource(reason),
                    RetryDisposition::NextResource => Outcome::RetryableNextResource(reason),
                    RetryDisposition::Terminal => Outcome::NonRetryable(reason),
                };
            }
        }

        Outcome::NonRetryable(Reason::new(REASON_OTHER, trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocking(message: &str) -> AttemptObservation {
        AttemptObservation::BlockingError { message: message.to_string() }
    }

    #[test]
    fn test_not_open_yet_retries_same_resource() {
        let classifier = OutcomeClassifier::default();
        let outcome = classifier.classify(&blocking("John Doe is only allowed to reserve up to 1-13-2026, 10:07 PM"));

        assert_eq!(
            outcome,
            Some(Outcome::RetryableSameResource(Reason::new(
                REASON_NOT_OPEN_YET,
                "John Doe is only allowed to reserve up to 1-13-2026, 10:07 PM"
            )))
        );
    }

    #[test]
    fn test_no_longer_available_moves_to_next_resource() {
        let classifier = OutcomeClassifier::default();
        let outcome = classifier.classify(&blocking("Court Hard - Court #2 no longer available."));

        assert!(matches!(outcome, Some(Outcome::RetryableNextResource(ref r)) if r.label == REASON_NO_LONGER_AVAILABLE));
    }

    #[test]
    fn test_other_errors_are_terminal_and_keep_text() {
        let classifier = OutcomeClassifier::default();

        for message in ["Doubles requires 3 additional players.", "Singles requires 1 additional player.", ""] {
            let outcome = classifier.classify(&blocking(message));
            assert_eq!(outcome, Some(Outcome::NonRetryable(Reason::new(REASON_OTHER, message))));
        }
    }

    #[test]
    fn test_transient_observations_do_not_classify() {
        let classifier = OutcomeClassifier::default();

        assert_eq!(classifier.classify(&AttemptObservation::InFlight), None);
        assert_eq!(classifier.classify(&AttemptObservation::Pending), None);
        assert_eq!(classifier.classify(&AttemptObservation::Succeeded), Some(Outcome::Succeeded));
    }

    #[test]
    fn test_template_captures_fields() {
        let template = MessageTemplate::parse("{name} is only allowed to reserve up to {time}");
        let fields = template.captures("Jane is only allowed to reserve up to 1-13-2026, 10:07 PM").unwrap();

        assert_eq!(fields["name"], "Jane");
        assert_eq!(fields["time"], "1-13-2026, 10:07 PM");
    }

    #[test]
    fn test_template_requires_full_match_and_non_empty_captures() {
        let template = MessageTemplate::parse("{resource} no longer available.");

        assert!(template.captures(" no longer available.").is_none());
        assert!(template.captures("Court #2 no longer available. Sorry").is_none());
        assert!(template.captures("Court #2 is no longer available.").is_some());
    }

    #[test]
    fn test_custom_rules_take_precedence_in_order() {
        let classifier = OutcomeClassifier::new(vec![
            ClassifierRule::new("Too many requests{rest}", RetryDisposition::SameResource, "throttled"),
            ClassifierRule::new("{anything}", RetryDisposition::Terminal, "catchAll"),
        ]);

        assert!(matches!(classifier.classify_message("Too many requests, slow down"), Outcome::RetryableSameResource(r) if r.label == "throttled"));
        assert!(matches!(classifier.classify_message("Court #2 no longer available."), Outcome::NonRetryable(r) if r.label == "catchAll"));
    }
}
