use super::{AppendOutcome, RecordSink, SinkError, EVENTS_TABLE, SUMMARY_TABLE};
use crate::aggregate::HourlySummary;
use crate::pipeline::EnrichedEvent;
use anyhow::Result;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(options: PgConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }
}

impl RecordSink for PgSink {
    async fn append_events(&self, rows: &[EnrichedEvent]) -> Result<u64, SinkError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let started = Instant::now();

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {EVENTS_TABLE} (event_timestamp, machine_id, event_name, parameter_name, \
             value, is_error, cycle_seq, cycle_time_seconds) "
        ));
        builder.push_values(rows.iter(), |mut b, row| {
            b.push_bind(row.event.timestamp)
                .push_bind(&row.event.machine_id)
                .push_bind(row.event.event_name.as_str())
                .push_bind(&row.event.parameter_name)
                .push_bind(row.event.value)
                .push_bind(i32::from(row.is_error))
                .push_bind(i64::from(row.cycle_seq))
                .push_bind(row.cycle_time_seconds);
        });

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|err| SinkError::from_sqlx(EVENTS_TABLE, err))?;
        let written = result.rows_affected();
        tracing::debug!(
            len = rows.len(),
            written,
            micros = started.elapsed().as_micros() as u64,
            "appended enriched events"
        );
        Ok(written)
    }

    async fn append_summaries(&self, rows: &[HourlySummary]) -> Result<AppendOutcome, SinkError> {
        if rows.is_empty() {
            return Ok(AppendOutcome::default());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {SUMMARY_TABLE} (summary_date, hour_of_day, machine_id, \
             avg_pick_force, max_pick_force, min_pick_force, \
             avg_place_force, max_place_force, min_place_force, \
             as_vacuum_error_count, pp_vacuum_error_count, \
             as_release_error_count, pp_release_error_count, \
             pick_force_error_count, place_force_error_count, \
             cycle_count, min_cycle_time_seconds, max_cycle_time_seconds, avg_cycle_time_seconds) "
        ));
        builder.push_values(rows.iter(), |mut b, row| {
            b.push_bind(row.summary_date)
                .push_bind(row.hour_of_day)
                .push_bind(&row.machine_id)
                .push_bind(row.avg_pick_force)
                .push_bind(row.max_pick_force)
                .push_bind(row.min_pick_force)
                .push_bind(row.avg_place_force)
                .push_bind(row.max_place_force)
                .push_bind(row.min_place_force)
                .push_bind(row.as_vacuum_error_count)
                .push_bind(row.pp_vacuum_error_count)
                .push_bind(row.as_release_error_count)
                .push_bind(row.pp_release_error_count)
                .push_bind(row.pick_force_error_count)
                .push_bind(row.place_force_error_count)
                .push_bind(row.cycle_count)
                .push_bind(row.min_cycle_time_seconds)
                .push_bind(row.max_cycle_time_seconds)
                .push_bind(row.avg_cycle_time_seconds);
        });
        builder.push(" ON CONFLICT (summary_date, hour_of_day, machine_id) DO NOTHING");

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|err| SinkError::from_sqlx(SUMMARY_TABLE, err))?;
        let inserted = result.rows_affected();
        Ok(AppendOutcome {
            inserted,
            skipped: (rows.len() as u64).saturating_sub(inserted),
        })
    }
}
