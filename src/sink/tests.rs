use super::{PgSink, RecordSink, SinkError, SUMMARY_TABLE};
use crate::aggregate::HourlySummary;
use crate::events::{Event, EventName};
use crate::pipeline::EnrichedEvent;
use anyhow::Result;
use chrono::{NaiveDate, TimeZone, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::env;

async fn setup_test_pool(database_url: &str, schema: &str) -> Result<PgPool> {
    let admin_pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(database_url)
        .await?;
    sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema))
        .execute(&admin_pool)
        .await?;
    sqlx::query(&format!("CREATE SCHEMA {}", schema))
        .execute(&admin_pool)
        .await?;
    drop(admin_pool);

    let schema_name = schema.to_string();
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .after_connect(move |conn, _meta| {
            let schema = schema_name.clone();
            Box::pin(async move {
                sqlx::query(&format!("SET search_path TO {}", schema))
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE processed_machine_events (
            event_timestamp timestamptz not null,
            machine_id text not null,
            event_name text not null,
            parameter_name text not null,
            value real null,
            is_error integer not null,
            cycle_seq bigint not null,
            cycle_time_seconds real null
        )
        "#,
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        r#"
        CREATE TABLE hourly_machine_summary (
            summary_date date not null,
            hour_of_day integer not null,
            machine_id text not null,
            avg_pick_force real null,
            max_pick_force real null,
            min_pick_force real null,
            avg_place_force real null,
            max_place_force real null,
            min_place_force real null,
            as_vacuum_error_count integer not null default 0,
            pp_vacuum_error_count integer not null default 0,
            as_release_error_count integer not null default 0,
            pp_release_error_count integer not null default 0,
            pick_force_error_count integer not null default 0,
            place_force_error_count integer not null default 0,
            cycle_count integer not null default 0,
            min_cycle_time_seconds real null,
            max_cycle_time_seconds real null,
            avg_cycle_time_seconds real null,
            constraint hourly_machine_summary_pkey primary key (summary_date, hour_of_day, machine_id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    Ok(pool)
}

fn summary_row(hour: i32) -> HourlySummary {
    HourlySummary {
        summary_date: NaiveDate::from_ymd_opt(2024, 10, 16).unwrap(),
        hour_of_day: hour,
        machine_id: "DieBonder_01".to_string(),
        cycle_count: 12,
        min_cycle_time_seconds: 0.601,
        avg_cycle_time_seconds: 0.655,
        max_cycle_time_seconds: 0.7,
        min_pick_force: 61.2,
        avg_pick_force: 88.4,
        max_pick_force: 119.9,
        min_place_force: 0.0,
        avg_place_force: 0.0,
        max_place_force: 0.0,
        as_vacuum_error_count: 1,
        pp_vacuum_error_count: 0,
        as_release_error_count: 0,
        pp_release_error_count: 0,
        pick_force_error_count: 2,
        place_force_error_count: 0,
        total_error_count: 3,
    }
}

#[tokio::test]
async fn test_pg_sink_appends_and_skips_duplicate_summaries() -> Result<()> {
    if env::var("AGGREGATOR_INTEGRATION_TEST").ok().as_deref() != Some("1") {
        return Ok(());
    }
    let database_url = match env::var("AGGREGATOR_TEST_DATABASE_URL") {
        Ok(value) => value,
        Err(_) => return Ok(()),
    };

    let schema = format!("aggregator_test_{}", std::process::id());
    let pool = setup_test_pool(&database_url, &schema).await?;
    let sink = PgSink::new(pool.clone());

    let event = EnrichedEvent {
        event: Event {
            timestamp: Utc.with_ymd_and_hms(2024, 10, 16, 7, 0, 0).unwrap(),
            machine_id: "DieBonder_01".to_string(),
            event_name: EventName::PickCheck,
            parameter_name: "PP_Force".to_string(),
            value: Some(130.5),
            arrival_seq: 3,
        },
        cycle_seq: 1,
        is_error: true,
        cycle_time_seconds: Some(0.655),
    };
    assert_eq!(sink.append_events(&[event.clone()]).await?, 1);
    assert_eq!(sink.append_events(&[event]).await?, 1);
    let (event_rows,): (i64,) =
        sqlx::query_as("SELECT COUNT(*)::bigint FROM processed_machine_events WHERE is_error = 1")
            .fetch_one(&pool)
            .await?;
    assert_eq!(event_rows, 2);

    let first = sink.append_summaries(&[summary_row(7), summary_row(8)]).await?;
    assert_eq!((first.inserted, first.skipped), (2, 0));
    let second = sink.append_summaries(&[summary_row(8), summary_row(9)]).await?;
    assert_eq!((second.inserted, second.skipped), (1, 1));

    let (summary_rows,): (i64,) =
        sqlx::query_as("SELECT COUNT(*)::bigint FROM hourly_machine_summary")
            .fetch_one(&pool)
            .await?;
    assert_eq!(summary_rows, 3);

    sqlx::query("ALTER TABLE hourly_machine_summary RENAME COLUMN cycle_count TO cycles")
        .execute(&pool)
        .await?;
    let err = sink
        .append_summaries(&[summary_row(10)])
        .await
        .expect_err("missing column must fail");
    assert!(matches!(
        err,
        SinkError::Database {
            table: SUMMARY_TABLE,
            ..
        }
    ));

    let admin_pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await?;
    sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema))
        .execute(&admin_pool)
        .await?;

    Ok(())
}

#[test]
fn non_unique_failures_stay_database_errors() {
    let err = SinkError::from_sqlx(SUMMARY_TABLE, sqlx::Error::RowNotFound);
    assert!(matches!(err, SinkError::Database { .. }));
    assert!(err.to_string().contains(SUMMARY_TABLE));
}
