use chrono::Local;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};

use crate::error::Result;

/// Log target of the one-line session summaries.
pub const ANALYTICS_TARGET: &str = "booking_agent::analytics";

/// Columns of the attempt journal, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JournalField {
    /// Local wall time the entry was made, millisecond precision.
    Time,

    SessionId,

    /// `court` or `dropIn`.
    Flow,

    /// What happened, e.g. `Scheduled`, `Dispatched`, `Classified`, `Terminal`.
    Event,

    Resource,

    /// Sequence number of the dispatch within the session.
    Attempt,

    /// Outcome kind or final session state.
    Outcome,

    Reason,

    /// Page text behind the outcome, verbatim.
    Message,
}

impl JournalField {
    pub const ALL: [JournalField; 9] = [
        JournalField::Time,
        JournalField::SessionId,
        JournalField::Flow,
        JournalField::Event,
        JournalField::Resource,
        JournalField::Attempt,
        JournalField::Outcome,
        JournalField::Reason,
        JournalField::Message,
    ];

    pub fn header(&self) -> &'static str {
        match self {
            JournalField::Time => "Time",
            JournalField::SessionId => "SessionId",
            JournalField::Flow => "Flow",
            JournalField::Event => "Event",
            JournalField::Resource => "Resource",
            JournalField::Attempt => "Attempt",
            JournalField::Outcome => "Outcome",
            JournalField::Reason => "Reason",
            JournalField::Message => "Message",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JournalValue {
    Integer(i64),
    Text(String),
}

impl From<i64> for JournalValue {
    fn from(v: i64) -> Self {
        JournalValue::Integer(v)
    }
}

impl From<u32> for JournalValue {
    fn from(v: u32) -> Self {
        JournalValue::Integer(i64::from(v))
    }
}

impl From<String> for JournalValue {
    fn from(v: String) -> Self {
        JournalValue::Text(v)
    }
}

impl From<&str> for JournalValue {
    fn from(v: &str) -> Self {
        JournalValue::Text(v.to_string())
    }
}

impl JournalValue {
    fn render(&self) -> String {
        match self {
            JournalValue::Integer(i) => i.to_string(),
            JournalValue::Text(t) => t.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JournalEvent {
    data: HashMap<JournalField, JournalValue>,
}

impl JournalEvent {
    pub fn new(event: &str) -> Self {
        let mut entry = Self::default();
        entry.set(JournalField::Event, event);
        entry
    }

    pub fn set<V: Into<JournalValue>>(&mut self, field: JournalField, value: V) -> &mut Self {
        self.data.insert(field, value.into());
        self
    }

    pub fn get(&self, field: JournalField) -> Option<&JournalValue> {
        self.data.get(&field)
    }

    fn to_row(&self) -> Vec<String> {
        JournalField::ALL.iter().map(|field| self.data.get(field).map(JournalValue::render).unwrap_or_default()).collect()
    }
}

enum JournalMessage {
    Record(JournalEvent),
    Shutdown,
}

/// Append-only CSV record of every dispatch and outcome.
///
/// Writing happens on a background thread; `record` never blocks a session.
#[derive(Debug, Clone)]
pub struct AttemptJournal {
    sender: mpsc::Sender<JournalMessage>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AttemptJournal {
    /// Opens `path` (stdout when `None`) and starts the writer thread.
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let writer: Box<dyn Write + Send> = match path {
            Some(path) => Box::new(File::create(path)?),
            None => Box::new(io::stdout()),
        };
        Ok(Self::with_writer(writer))
    }

    pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
        let (tx, rx) = mpsc::channel();

        let worker = thread::spawn(move || {
            Self::worker_loop(rx, writer);
        });

        AttemptJournal { sender: tx, worker: Arc::new(Mutex::new(Some(worker))) }
    }

    fn worker_loop(rx: mpsc::Receiver<JournalMessage>, writer: Box<dyn Write + Send>) {
        let mut csv_wtr = csv::WriterBuilder::new().delimiter(b';').from_writer(writer);

        let headers: Vec<&str> = JournalField::ALL.iter().map(JournalField::header).collect();
        if let Err(e) = csv_wtr.write_record(&headers) {
            log::error!("Journal error: failed to write headers: {}", e);
        }

        for msg in rx {
            match msg {
                JournalMessage::Record(event) => {
                    if let Err(e) = csv_wtr.write_record(event.to_row()) {
                        log::error!("Journal error: failed to write record: {}", e);
                    }
                }
                JournalMessage::Shutdown => break,
            }
        }

        let _ = csv_wtr.flush();
    }

    /// Stamps the entry with the current time unless it carries one.
    pub fn record(&self, mut event: JournalEvent) {
        if event.get(JournalField::Time).is_none() {
            event.set(JournalField::Time, Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string());
        }

        // A dead writer thread must not take a booking down with it.
        if self.sender.send(JournalMessage::Record(event)).is_err() {
            log::warn!("Journal writer is gone, entry dropped.");
        }
    }

    /// Stops the writer after everything recorded so far and waits for it.
    /// Later `record` calls are dropped with a warning.
    pub fn shutdown(&self) {
        let _ = self.sender.send(JournalMessage::Shutdown);
        let worker = self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                log::error!("Journal writer thread panicked.");
            }
        }
    }
}
