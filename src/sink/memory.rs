use super::{AppendOutcome, RecordSink, SinkError, EVENTS_TABLE};
use crate::aggregate::HourlySummary;
use crate::pipeline::EnrichedEvent;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

type SummaryKey = (NaiveDate, i32, String);

/// In-process stand-in for the two output tables. The summary table enforces its unique
/// key the way the database does; the events table has none.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<EnrichedEvent>>,
    summaries: Mutex<BTreeMap<SummaryKey, HourlySummary>>,
    fail_events: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_event_writes(&self, fail: bool) {
        self.fail_events.store(fail, Ordering::Relaxed);
    }

    pub fn events(&self) -> Vec<EnrichedEvent> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn summaries(&self) -> Vec<HourlySummary> {
        self.summaries
            .lock()
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl RecordSink for MemorySink {
    async fn append_events(&self, rows: &[EnrichedEvent]) -> Result<u64, SinkError> {
        if self.fail_events.load(Ordering::Relaxed) {
            return Err(SinkError::Database {
                table: EVENTS_TABLE,
                source: sqlx::Error::PoolClosed,
            });
        }
        let mut guard = self.events.lock().expect("events lock");
        guard.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn append_summaries(&self, rows: &[HourlySummary]) -> Result<AppendOutcome, SinkError> {
        let mut guard = self.summaries.lock().expect("summaries lock");
        let mut outcome = AppendOutcome::default();
        for row in rows {
            let key = (row.summary_date, row.hour_of_day, row.machine_id.clone());
            if guard.contains_key(&key) {
                outcome.skipped += 1;
            } else {
                guard.insert(key, row.clone());
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }
}
