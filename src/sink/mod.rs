#[cfg(test)]
mod memory;
mod postgres;

#[cfg(test)]
mod tests;

#[cfg(test)]
pub use memory::MemorySink;
pub use postgres::PgSink;

use crate::aggregate::HourlySummary;
use crate::pipeline::EnrichedEvent;
use std::future::Future;
use thiserror::Error;

pub const EVENTS_TABLE: &str = "processed_machine_events";
pub const SUMMARY_TABLE: &str = "hourly_machine_summary";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("duplicate key writing {table}: {message}")]
    UniqueViolation { table: &'static str, message: String },
    #[error("failed to write {table}: {source}")]
    Database {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl SinkError {
    pub fn from_sqlx(table: &'static str, err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return SinkError::UniqueViolation {
                    table,
                    message: db_err.message().to_string(),
                };
            }
        }
        SinkError::Database { table, source: err }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    pub inserted: u64,
    pub skipped: u64,
}

/// Append-only destination for one batch run's two record sets.
pub trait RecordSink {
    /// Appends enriched events and returns how many rows were written.
    fn append_events(
        &self,
        rows: &[EnrichedEvent],
    ) -> impl Future<Output = Result<u64, SinkError>> + Send;

    /// Appends hourly summaries. Rows whose `(summary_date, hour_of_day, machine_id)`
    /// already exists are skipped rather than failing the write.
    fn append_summaries(
        &self,
        rows: &[HourlySummary],
    ) -> impl Future<Output = Result<AppendOutcome, SinkError>> + Send;
}
