use crate::events::EventName;
use crate::pipeline::EnrichedEvent;
use crate::segment::{round_to, Cycle};
use crate::thresholds::RuleKey;
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

const FORCE_PARAMETER: &str = "PP_Force";
const DURATION_DECIMALS: i32 = 3;
const FORCE_DECIMALS: i32 = 2;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub summary_date: NaiveDate,
    pub hour_of_day: u32,
    pub machine_id: String,
}

impl BucketKey {
    pub fn for_cycle_start(machine_id: &str, start_ts: DateTime<Utc>) -> Self {
        Self {
            summary_date: start_ts.date_naive(),
            hour_of_day: start_ts.hour(),
            machine_id: machine_id.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct RunningStats {
    count: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl RunningStats {
    fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Rounded `(min, avg, max)`. A side with no values reports zeros.
    fn rounded(&self, decimals: i32) -> (f64, f64, f64) {
        let round = |v: Option<f64>| v.map_or(0.0, |v| round_to(v, decimals));
        (round(self.min), round(self.avg()), round(self.max))
    }
}

#[derive(Clone, Debug, Default)]
pub struct CycleBucket {
    cycle_seqs: BTreeSet<u32>,
    durations: RunningStats,
}

#[derive(Clone, Debug, Default)]
pub struct EventBucket {
    pick_force: RunningStats,
    place_force: RunningStats,
    error_counts: [i64; RuleKey::COUNT],
    total_errors: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HourlySummary {
    pub summary_date: NaiveDate,
    pub hour_of_day: i32,
    pub machine_id: String,
    pub cycle_count: i64,
    pub min_cycle_time_seconds: f64,
    pub avg_cycle_time_seconds: f64,
    pub max_cycle_time_seconds: f64,
    pub min_pick_force: f64,
    pub avg_pick_force: f64,
    pub max_pick_force: f64,
    pub min_place_force: f64,
    pub avg_place_force: f64,
    pub max_place_force: f64,
    pub as_vacuum_error_count: i64,
    pub pp_vacuum_error_count: i64,
    pub as_release_error_count: i64,
    pub pp_release_error_count: i64,
    pub pick_force_error_count: i64,
    pub place_force_error_count: i64,
    pub total_error_count: i64,
}

impl HourlySummary {
    fn empty(key: BucketKey) -> Self {
        Self {
            summary_date: key.summary_date,
            hour_of_day: key.hour_of_day as i32,
            machine_id: key.machine_id,
            cycle_count: 0,
            min_cycle_time_seconds: 0.0,
            avg_cycle_time_seconds: 0.0,
            max_cycle_time_seconds: 0.0,
            min_pick_force: 0.0,
            avg_pick_force: 0.0,
            max_pick_force: 0.0,
            min_place_force: 0.0,
            avg_place_force: 0.0,
            max_place_force: 0.0,
            as_vacuum_error_count: 0,
            pp_vacuum_error_count: 0,
            as_release_error_count: 0,
            pp_release_error_count: 0,
            pick_force_error_count: 0,
            place_force_error_count: 0,
            total_error_count: 0,
        }
    }

    fn apply_cycles(&mut self, bucket: &CycleBucket) {
        self.cycle_count = bucket.cycle_seqs.len() as i64;
        let (min, avg, max) = bucket.durations.rounded(DURATION_DECIMALS);
        self.min_cycle_time_seconds = min;
        self.avg_cycle_time_seconds = avg;
        self.max_cycle_time_seconds = max;
    }

    fn apply_events(&mut self, bucket: &EventBucket) {
        let (min, avg, max) = bucket.pick_force.rounded(FORCE_DECIMALS);
        self.min_pick_force = min;
        self.avg_pick_force = avg;
        self.max_pick_force = max;
        let (min, avg, max) = bucket.place_force.rounded(FORCE_DECIMALS);
        self.min_place_force = min;
        self.avg_place_force = avg;
        self.max_place_force = max;

        let count = |key: RuleKey| bucket.error_counts[key as usize];
        self.as_vacuum_error_count = count(RuleKey::AsVacuumUnits);
        self.pp_vacuum_error_count = count(RuleKey::PpVacuumUnits);
        self.as_release_error_count = count(RuleKey::AsVacuumUnitsRelease);
        self.pp_release_error_count = count(RuleKey::PpVacuumUnitsRelease);
        self.pick_force_error_count = count(RuleKey::PickForce);
        self.place_force_error_count = count(RuleKey::PlaceForce);
        self.total_error_count = bucket.total_errors;
    }
}

/// Buckets cycles by the hour their `Cycle_Start` fell in.
pub fn bucket_cycles<'a>(
    cycles: impl IntoIterator<Item = &'a Cycle>,
) -> BTreeMap<BucketKey, CycleBucket> {
    let mut buckets: BTreeMap<BucketKey, CycleBucket> = BTreeMap::new();
    for cycle in cycles {
        let bucket = buckets
            .entry(BucketKey::for_cycle_start(&cycle.machine_id, cycle.start_ts))
            .or_default();
        bucket.cycle_seqs.insert(cycle.cycle_seq);
        if let Some(duration) = cycle.duration_seconds {
            bucket.durations.record(duration);
        }
    }
    buckets
}

/// Buckets enriched events by the start hour of the cycle they belong to, not by their
/// own timestamp. Events whose cycle is unknown are skipped.
pub fn bucket_events<'a>(
    events: impl IntoIterator<Item = &'a EnrichedEvent>,
    cycle_starts: &HashMap<(&str, u32), DateTime<Utc>>,
) -> BTreeMap<BucketKey, EventBucket> {
    let mut buckets: BTreeMap<BucketKey, EventBucket> = BTreeMap::new();
    for enriched in events {
        let event = &enriched.event;
        let Some(start_ts) = cycle_starts.get(&(event.machine_id.as_str(), enriched.cycle_seq))
        else {
            continue;
        };
        let bucket = buckets
            .entry(BucketKey::for_cycle_start(&event.machine_id, *start_ts))
            .or_default();

        if let Some(value) = event.value {
            if event.is(FORCE_PARAMETER, &EventName::PickCheck) {
                bucket.pick_force.record(value);
            } else if event.is(FORCE_PARAMETER, &EventName::PlaceCheck) {
                bucket.place_force.record(value);
            }
        }

        if enriched.is_error {
            bucket.total_errors += 1;
            for key in RuleKey::ALL {
                if event.is(key.parameter_name(), &key.event_name()) {
                    bucket.error_counts[key as usize] += 1;
                }
            }
        }
    }
    buckets
}

/// Unions both bucket maps. A side with no rows for a bucket contributes zero counts and
/// absent statistics.
pub fn merge_buckets(
    cycles: BTreeMap<BucketKey, CycleBucket>,
    mut events: BTreeMap<BucketKey, EventBucket>,
) -> Vec<HourlySummary> {
    let mut merged: BTreeMap<BucketKey, HourlySummary> = BTreeMap::new();
    for (key, cycle_bucket) in cycles {
        let mut summary = HourlySummary::empty(key.clone());
        summary.apply_cycles(&cycle_bucket);
        if let Some(event_bucket) = events.remove(&key) {
            summary.apply_events(&event_bucket);
        }
        merged.insert(key, summary);
    }
    for (key, event_bucket) in events {
        let mut summary = HourlySummary::empty(key.clone());
        summary.apply_events(&event_bucket);
        merged.insert(key, summary);
    }
    merged.into_values().collect()
}

pub fn summarize_hourly(cycles: &[Cycle], events: &[EnrichedEvent]) -> Vec<HourlySummary> {
    let cycle_starts: HashMap<(&str, u32), DateTime<Utc>> = cycles
        .iter()
        .map(|c| ((c.machine_id.as_str(), c.cycle_seq), c.start_ts))
        .collect();
    merge_buckets(
        bucket_cycles(cycles),
        bucket_events(events, &cycle_starts),
    )
}
