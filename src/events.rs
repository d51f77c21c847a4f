use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::fmt;
use std::io::Read;
use std::path::Path;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventName {
    CycleStart,
    CycleEnd,
    AsCheck,
    PickCheck,
    AsBlowoffCheck,
    PlaceCheck,
    Other(String),
}

impl EventName {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Cycle_Start" => EventName::CycleStart,
            "Cycle_End" => EventName::CycleEnd,
            "AS_Check" => EventName::AsCheck,
            "Pick_Check" => EventName::PickCheck,
            "AS_Blowoff_Check" => EventName::AsBlowoffCheck,
            "Place_Check" => EventName::PlaceCheck,
            other => EventName::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventName::CycleStart => "Cycle_Start",
            EventName::CycleEnd => "Cycle_End",
            EventName::AsCheck => "AS_Check",
            EventName::PickCheck => "Pick_Check",
            EventName::AsBlowoffCheck => "AS_Blowoff_Check",
            EventName::PlaceCheck => "Place_Check",
            EventName::Other(name) => name,
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One input row as it appears in the CSV log; every field is untrusted text.
#[derive(Debug, Default, Deserialize)]
pub struct RawEventRecord {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub parameter_name: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub machine_id: String,
    pub event_name: EventName,
    /// Empty when the row carried no parameter.
    pub parameter_name: String,
    pub value: Option<f64>,
    pub arrival_seq: u64,
}

impl Event {
    pub fn is_cycle_start(&self) -> bool {
        self.event_name == EventName::CycleStart
    }

    pub fn is_cycle_end(&self) -> bool {
        self.event_name == EventName::CycleEnd
    }

    pub fn is(&self, parameter_name: &str, event_name: &EventName) -> bool {
        self.parameter_name == parameter_name && &self.event_name == event_name
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub rows_read: u64,
    pub rows_dropped: u64,
}

#[derive(Debug, Default)]
pub struct EventIngestor {
    next_seq: u64,
    report: IngestReport,
    events: Vec<Event>,
}

impl EventIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates one raw row and keeps it when it carries a parseable timestamp, a
    /// machine and an event name. Returns whether the row was retained.
    pub fn push(&mut self, raw: RawEventRecord) -> bool {
        self.report.rows_read += 1;
        match parse_record(raw, self.next_seq) {
            Some(event) => {
                self.next_seq += 1;
                self.events.push(event);
                true
            }
            None => {
                self.report.rows_dropped += 1;
                false
            }
        }
    }

    pub fn push_undecodable(&mut self) {
        self.report.rows_read += 1;
        self.report.rows_dropped += 1;
    }

    pub fn finish(self) -> (Vec<Event>, IngestReport) {
        (self.events, self.report)
    }
}

pub fn read_events_csv<R: Read>(reader: R) -> Result<(Vec<Event>, IngestReport)> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut ingestor = EventIngestor::new();

    for (index, row) in csv_reader.deserialize::<RawEventRecord>().enumerate() {
        match row {
            Ok(raw) => {
                if !ingestor.push(raw) {
                    tracing::trace!(row = index + 1, "dropped malformed event row");
                }
            }
            Err(err) if err.is_io_error() => {
                return Err(err).context("failed to read event log");
            }
            Err(err) => {
                tracing::debug!(row = index + 1, error = %err, "dropped undecodable event row");
                ingestor.push_undecodable();
            }
        }
    }

    Ok(ingestor.finish())
}

pub fn read_events_file(path: &Path) -> Result<(Vec<Event>, IngestReport)> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open event log {}", path.display()))?;
    read_events_csv(std::io::BufReader::new(file))
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_record(raw: RawEventRecord, arrival_seq: u64) -> Option<Event> {
    let timestamp = raw.timestamp.as_deref().and_then(parse_timestamp)?;
    let machine_id = non_blank(raw.machine_id)?;
    let event_name = non_blank(raw.event_name)?;
    let parameter_name = non_blank(raw.parameter_name).unwrap_or_default();
    let value = raw
        .value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<f64>().ok());

    Some(Event {
        timestamp,
        machine_id,
        event_name: EventName::parse(&event_name),
        parameter_name,
        value,
        arrival_seq,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
