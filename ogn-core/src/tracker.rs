//! Live aircraft table with bounded trails and TTL expiry.
//!
//! Pure logic, no I/O and no timers. The caller supplies `now` (seconds on
//! any monotonic origin) to every call and asks for `next_expiry()` to know
//! when to call `expire()` again. Produces `TrackEvent` outputs that the
//! caller fans out.

use std::cmp::{Ordering, Reverse};
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use serde::Serialize;

use crate::config::TrackerConfig;
use crate::types::PositionReport;

/// Heap entries allowed per live aircraft before stale deadlines are
/// compacted away.
const HEAP_SLACK: usize = 4;

// ---------------------------------------------------------------------------
// Track events (output)
// ---------------------------------------------------------------------------

/// Events emitted by the tracker, in the order they happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackEvent {
    /// Entry created or refreshed; carries the full state after the update.
    Upsert(TrackedAircraft),
    /// Entry expired and was dropped.
    Remove { id: String },
}

impl TrackEvent {
    pub fn id(&self) -> &str {
        match self {
            TrackEvent::Upsert(ac) => &ac.id,
            TrackEvent::Remove { id } => id,
        }
    }
}

// ---------------------------------------------------------------------------
// Aircraft state
// ---------------------------------------------------------------------------

/// State for a single tracked aircraft.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedAircraft {
    pub id: String,
    pub latest: PositionReport,
    /// `(lat, lon)`, oldest first.
    pub trail: VecDeque<(f64, f64)>,
    pub expires_at: f64,
    pub first_seen: f64,
    pub last_seen: f64,
    pub report_count: u64,
    #[serde(skip)]
    generation: u64,
}

impl TrackedAircraft {
    /// Display name: flight number when known, else the station name.
    pub fn name(&self) -> &str {
        self.latest.identity()
    }

    /// Multi-line summary of the latest report.
    pub fn describe(&self) -> String {
        let r = &self.latest;
        let mut lines = vec![
            self.name().to_string(),
            format!("Protocol: {}", r.protocol),
            format!("Altitude: {:.0} m", r.altitude_m),
            format!("Climb: {}", r.climb_rate),
            format!("Course: {}°", r.course_deg),
            format!("Speed: {} knots", r.speed_kts),
        ];
        if let Some(flight) = r.flight_number.as_deref().filter(|f| !f.is_empty()) {
            lines.push(format!("Flight: {flight}"));
        }
        if let Some(squawk) = &r.squawk {
            lines.push(format!("Squawk: {squawk}"));
        }
        lines.join("\n")
    }
}

/// Scheduled expiry. Only the entry whose generation still matches the
/// aircraft's current generation is live; older ones are skipped.
#[derive(Debug)]
struct Deadline {
    at: f64,
    generation: u64,
    id: String,
}

impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Deadline {}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at
            .total_cmp(&other.at)
            .then(self.generation.cmp(&other.generation))
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Track multiple aircraft from decoded reports.
pub struct Tracker {
    aircraft: HashMap<String, TrackedAircraft>,
    deadlines: BinaryHeap<Reverse<Deadline>>,
    generation: u64,
    trail_length: usize,
    ttl: f64,

    // Counters
    pub reports: u64,
    pub ignored: u64,
    pub upserts: u64,
    pub removals: u64,
}

impl Tracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Tracker {
            aircraft: HashMap::new(),
            deadlines: BinaryHeap::new(),
            generation: 0,
            trail_length: config.trail_length.max(1),
            ttl: config.ttl,
            reports: 0,
            ignored: 0,
            upserts: 0,
            removals: 0,
        }
    }

    pub fn ttl(&self) -> f64 {
        self.ttl
    }

    /// Apply one report at time `now`. Returns `None` for reports without a
    /// usable position or identity; those leave the table untouched.
    pub fn on_report(&mut self, report: PositionReport, now: f64) -> Option<TrackEvent> {
        self.reports += 1;
        if !report.is_trackable() {
            self.ignored += 1;
            return None;
        }

        self.generation += 1;
        let generation = self.generation;
        let expires_at = now + self.ttl;
        let point = (report.latitude, report.longitude);
        let id = report.identity().to_string();

        let ac = match self.aircraft.entry(id.clone()) {
            Entry::Occupied(e) => {
                let ac = e.into_mut();
                ac.latest = report;
                ac
            }
            Entry::Vacant(e) => e.insert(TrackedAircraft {
                id: id.clone(),
                latest: report,
                trail: VecDeque::with_capacity(self.trail_length),
                expires_at,
                first_seen: now,
                last_seen: now,
                report_count: 0,
                generation,
            }),
        };

        ac.trail.push_back(point);
        while ac.trail.len() > self.trail_length {
            ac.trail.pop_front();
        }
        ac.expires_at = expires_at;
        ac.last_seen = now;
        ac.report_count += 1;
        ac.generation = generation;
        let snapshot = ac.clone();

        self.deadlines.push(Reverse(Deadline {
            at: expires_at,
            generation,
            id,
        }));
        self.compact();

        self.upserts += 1;
        Some(TrackEvent::Upsert(snapshot))
    }

    /// Remove every entry whose deadline is at or before `now`. Returns one
    /// `Remove` per dropped entry, earliest deadline first.
    pub fn expire(&mut self, now: f64) -> Vec<TrackEvent> {
        let mut events = Vec::new();
        while let Some(Reverse(top)) = self.deadlines.peek() {
            if top.at > now {
                break;
            }
            let Some(Reverse(deadline)) = self.deadlines.pop() else {
                break;
            };
            if self.is_current(&deadline) {
                self.aircraft.remove(&deadline.id);
                self.removals += 1;
                events.push(TrackEvent::Remove { id: deadline.id });
            }
        }
        events
    }

    /// Earliest pending deadline, if any aircraft is live.
    pub fn next_expiry(&mut self) -> Option<f64> {
        while let Some(Reverse(top)) = self.deadlines.peek() {
            if self.is_current(top) {
                return Some(top.at);
            }
            self.deadlines.pop();
        }
        None
    }

    pub fn get(&self, id: &str) -> Option<&TrackedAircraft> {
        self.aircraft.get(id)
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    /// All live aircraft, most recently seen first.
    pub fn snapshot(&self) -> Vec<TrackedAircraft> {
        let mut all: Vec<TrackedAircraft> = self.aircraft.values().cloned().collect();
        all.sort_by(|a, b| {
            b.last_seen
                .total_cmp(&a.last_seen)
                .then_with(|| a.id.cmp(&b.id))
        });
        all
    }

    /// Drop every entry and every scheduled deadline without emitting events.
    pub fn clear(&mut self) {
        self.aircraft.clear();
        self.deadlines.clear();
    }

    fn is_current(&self, deadline: &Deadline) -> bool {
        self.aircraft
            .get(&deadline.id)
            .is_some_and(|ac| ac.generation == deadline.generation)
    }

    fn compact(&mut self) {
        if self.deadlines.len() <= HEAP_SLACK * self.aircraft.len() + 64 {
            return;
        }
        let aircraft = &self.aircraft;
        self.deadlines.retain(|Reverse(d)| {
            aircraft
                .get(&d.id)
                .is_some_and(|ac| ac.generation == d.generation)
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
