use crate::events::Event;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq)]
pub struct TaggedEvent {
    pub event: Event,
    pub cycle_seq: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cycle {
    pub machine_id: String,
    pub cycle_seq: u32,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
}

/// Output of segmenting one machine's events.
#[derive(Clone, Debug, Default)]
pub struct SegmentedPartition {
    pub machine_id: String,
    /// Events inside a recognized cycle, in `(timestamp, arrival_seq)` order.
    pub events: Vec<TaggedEvent>,
    /// One entry per cycle, ordered by `cycle_seq`.
    pub cycles: Vec<Cycle>,
    pub pre_cycle_events: usize,
}

impl SegmentedPartition {
    pub fn cycle(&self, cycle_seq: u32) -> Option<&Cycle> {
        if cycle_seq == 0 {
            return None;
        }
        self.cycles.get(cycle_seq as usize - 1)
    }
}

#[derive(Debug)]
struct OpenCycle {
    cycle_seq: u32,
    start_ts: DateTime<Utc>,
    end_ts: Option<DateTime<Utc>>,
}

/// Running "which cycle am I in" counter for a single machine partition.
///
/// Events must be fed in `(timestamp, arrival_seq)` order. Every `Cycle_Start` opens a
/// new cycle, whether or not the previous one saw a `Cycle_End`.
#[derive(Debug)]
pub struct CycleSegmenter {
    machine_id: String,
    current_cycle_seq: u32,
    open: Option<OpenCycle>,
    closed: Vec<Cycle>,
}

impl CycleSegmenter {
    pub fn new(machine_id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            current_cycle_seq: 0,
            open: None,
            closed: Vec::new(),
        }
    }

    pub fn observe(&mut self, event: &Event) -> u32 {
        if event.is_cycle_start() {
            self.current_cycle_seq += 1;
            if let Some(previous) = self.open.take() {
                let cycle = self.close(previous);
                self.closed.push(cycle);
            }
            self.open = Some(OpenCycle {
                cycle_seq: self.current_cycle_seq,
                start_ts: event.timestamp,
                end_ts: None,
            });
        } else if event.is_cycle_end() {
            if let Some(open) = self.open.as_mut() {
                if open.end_ts.map(|prev| event.timestamp > prev).unwrap_or(true) {
                    open.end_ts = Some(event.timestamp);
                }
            }
        }
        self.current_cycle_seq
    }

    pub fn finish(mut self) -> Vec<Cycle> {
        if let Some(open) = self.open.take() {
            let cycle = self.close(open);
            self.closed.push(cycle);
        }
        self.closed
    }

    fn close(&self, open: OpenCycle) -> Cycle {
        let duration_seconds = open
            .end_ts
            .map(|end| (end - open.start_ts).num_milliseconds() as f64 / 1000.0);
        Cycle {
            machine_id: self.machine_id.clone(),
            cycle_seq: open.cycle_seq,
            start_ts: open.start_ts,
            end_ts: open.end_ts,
            duration_seconds,
        }
    }
}

/// Splits a batch into per-machine partitions, each holding its events in input order.
pub fn partition_by_machine(events: Vec<Event>) -> BTreeMap<String, Vec<Event>> {
    let mut partitions: BTreeMap<String, Vec<Event>> = BTreeMap::new();
    for event in events {
        partitions
            .entry(event.machine_id.clone())
            .or_default()
            .push(event);
    }
    partitions
}

pub fn segment_partition(machine_id: &str, mut events: Vec<Event>) -> SegmentedPartition {
    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.arrival_seq.cmp(&b.arrival_seq))
    });

    let mut segmenter = CycleSegmenter::new(machine_id);
    let mut tagged = Vec::with_capacity(events.len());
    let mut pre_cycle_events = 0usize;
    for event in events {
        let cycle_seq = segmenter.observe(&event);
        if cycle_seq == 0 {
            pre_cycle_events += 1;
            continue;
        }
        tagged.push(TaggedEvent { event, cycle_seq });
    }

    SegmentedPartition {
        machine_id: machine_id.to_string(),
        events: tagged,
        cycles: segmenter.finish(),
        pre_cycle_events,
    }
}

/// Rounds half away from zero on the value's shortest decimal form, so `1.005` at two
/// places gives `1.01` rather than the binary product's `1.00`.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let Ok(shifted) = format!("{value}e{decimals}").parse::<f64>() else {
        return value;
    };
    format!("{}e{}", shifted.round(), -decimals)
        .parse()
        .unwrap_or(value)
}
