use crate::aggregate::{summarize_hourly, HourlySummary};
use crate::events::{read_events_file, Event, IngestReport};
use crate::segment::{partition_by_machine, round_to, segment_partition, Cycle, SegmentedPartition};
use crate::sink::{RecordSink, SinkError, EVENTS_TABLE, SUMMARY_TABLE};
use crate::thresholds::ThresholdRules;
use anyhow::{Context, Result};
use futures::{StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub struct EnrichedEvent {
    pub event: Event,
    pub cycle_seq: u32,
    pub is_error: bool,
    pub cycle_time_seconds: Option<f64>,
}

#[derive(Debug, Default)]
pub struct BatchOutput {
    pub events: Vec<EnrichedEvent>,
    pub cycles: Vec<Cycle>,
    pub summaries: Vec<HourlySummary>,
    pub partitions: usize,
    pub pre_cycle_events: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct BatchSettings {
    pub partition_workers: usize,
    pub write_batch_size: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    pub ingest: IngestReport,
    pub partitions: usize,
    pub pre_cycle_events: usize,
    pub cycles: usize,
    pub unterminated_cycles: usize,
    pub events_flagged: usize,
    pub events_written: u64,
    pub events_write_failed: bool,
    pub summaries_written: u64,
    pub summaries_skipped: u64,
}

impl RunReport {
    pub fn log(&self) {
        tracing::info!(
            rows_read = self.ingest.rows_read,
            rows_dropped = self.ingest.rows_dropped,
            partitions = self.partitions,
            pre_cycle_events = self.pre_cycle_events,
            cycles = self.cycles,
            unterminated_cycles = self.unterminated_cycles,
            events_flagged = self.events_flagged,
            events_written = self.events_written,
            events_write_failed = self.events_write_failed,
            summaries_written = self.summaries_written,
            summaries_skipped = self.summaries_skipped,
            "batch complete"
        );
    }
}

/// Tags each in-cycle event with its error flag and its cycle's duration.
pub fn enrich_partition(
    mut partition: SegmentedPartition,
    rules: &ThresholdRules,
) -> (Vec<EnrichedEvent>, Vec<Cycle>) {
    let tagged_events = std::mem::take(&mut partition.events);
    let events = tagged_events
        .into_iter()
        .map(|tagged| {
            let is_error = rules.is_error(&tagged.event);
            let cycle_time_seconds = partition
                .cycle(tagged.cycle_seq)
                .and_then(|cycle| cycle.duration_seconds)
                .map(|d| round_to(d, 3));
            EnrichedEvent {
                event: tagged.event,
                cycle_seq: tagged.cycle_seq,
                is_error,
                cycle_time_seconds,
            }
        })
        .collect();

    (events, partition.cycles)
}

/// Segments and evaluates every machine partition on the blocking pool, then builds the
/// hourly rollup. Partition results are consumed in machine order.
pub async fn process_events(
    events: Vec<Event>,
    rules: Arc<ThresholdRules>,
    partition_workers: usize,
) -> Result<BatchOutput> {
    let partitions = partition_by_machine(events);
    let partition_count = partitions.len();

    let results: Vec<(Vec<EnrichedEvent>, Vec<Cycle>, usize)> =
        futures::stream::iter(partitions)
            .map(|(machine_id, events)| {
                let rules = rules.clone();
                let span = tracing::Span::current();
                tokio::task::spawn_blocking(move || {
                    let _entered = span.enter();
                    let segmented = segment_partition(&machine_id, events);
                    let pre_cycle = segmented.pre_cycle_events;
                    if pre_cycle > 0 {
                        tracing::debug!(
                            machine = %segmented.machine_id,
                            pre_cycle,
                            "discarding events before first cycle start"
                        );
                    }
                    let (events, cycles) = enrich_partition(segmented, &rules);
                    (events, cycles, pre_cycle)
                })
            })
            .buffered(partition_workers.max(1))
            .try_collect()
            .await
            .context("partition worker panicked")?;

    let mut output = BatchOutput {
        partitions: partition_count,
        ..BatchOutput::default()
    };
    for (events, cycles, pre_cycle) in results {
        output.events.extend(events);
        output.cycles.extend(cycles);
        output.pre_cycle_events += pre_cycle;
    }
    output.summaries = summarize_hourly(&output.cycles, &output.events);
    Ok(output)
}

/// Appends both record sets. A failed event write is reported and the summary write still
/// runs; summary rows whose key already exists are skipped; any other summary failure is
/// returned.
pub async fn write_outputs<S: RecordSink>(
    sink: &S,
    output: &BatchOutput,
    batch_size: usize,
    report: &mut RunReport,
) -> Result<()> {
    let batch_size = batch_size.max(1);

    for chunk in output.events.chunks(batch_size) {
        match sink.append_events(chunk).await {
            Ok(written) => report.events_written += written,
            Err(err) => {
                report.events_write_failed = true;
                tracing::error!(
                    table = EVENTS_TABLE,
                    error = %err,
                    written = report.events_written,
                    pending = (output.events.len() as u64).saturating_sub(report.events_written),
                    "failed to append enriched events; continuing with hourly summary"
                );
                break;
            }
        }
    }

    for chunk in output.summaries.chunks(batch_size) {
        match sink.append_summaries(chunk).await {
            Ok(outcome) => {
                tracing::debug!(
                    rows = chunk.len(),
                    errors = chunk.iter().map(|s| s.total_error_count).sum::<i64>(),
                    "appended hourly summary batch"
                );
                report.summaries_written += outcome.inserted;
                report.summaries_skipped += outcome.skipped;
                if outcome.skipped > 0 {
                    tracing::warn!(
                        table = SUMMARY_TABLE,
                        skipped = outcome.skipped,
                        "skipped hourly summary rows already present"
                    );
                }
            }
            Err(SinkError::UniqueViolation { message, .. }) => {
                report.summaries_skipped += chunk.len() as u64;
                tracing::warn!(
                    table = SUMMARY_TABLE,
                    rows = chunk.len(),
                    %message,
                    "hourly summary batch already present; skipped"
                );
            }
            Err(err) => {
                return Err(err).context("failed to append hourly summaries");
            }
        }
    }

    Ok(())
}

pub async fn run_batch<S: RecordSink>(
    input_path: &Path,
    rules: ThresholdRules,
    sink: &S,
    settings: BatchSettings,
) -> Result<RunReport> {
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("batch", %run_id, input = %input_path.display());
    run_batch_inner(input_path.to_path_buf(), rules, sink, settings)
        .instrument(span)
        .await
}

async fn run_batch_inner<S: RecordSink>(
    input_path: PathBuf,
    rules: ThresholdRules,
    sink: &S,
    settings: BatchSettings,
) -> Result<RunReport> {
    let started = Instant::now();
    if rules.is_empty() {
        tracing::warn!("no threshold rules configured; no events will be flagged");
    }

    let (events, ingest) = tokio::task::spawn_blocking(move || read_events_file(&input_path))
        .await
        .context("event reader panicked")??;
    if ingest.rows_dropped > 0 {
        tracing::warn!(
            dropped = ingest.rows_dropped,
            read = ingest.rows_read,
            "dropped malformed event rows"
        );
    }
    tracing::info!(events = events.len(), "read event log");

    let output = process_events(events, Arc::new(rules), settings.partition_workers).await?;
    let mut report = RunReport {
        ingest,
        partitions: output.partitions,
        pre_cycle_events: output.pre_cycle_events,
        cycles: output.cycles.len(),
        unterminated_cycles: output.cycles.iter().filter(|c| c.end_ts.is_none()).count(),
        events_flagged: output.events.iter().filter(|e| e.is_error).count(),
        ..RunReport::default()
    };
    if output.pre_cycle_events > 0 {
        tracing::info!(
            events = output.pre_cycle_events,
            "events before the first cycle start were excluded"
        );
    }

    write_outputs(sink, &output, settings.write_batch_size, &mut report).await?;
    tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "batch finished");
    Ok(report)
}
