//! In-memory GTFS entity tables with idempotent, priority-aware merging.
//!
//! Snapshot files overlap heavily, so every extracted row goes through a
//! first-writer-wins cache. Stop-times are the one exception: a cached row
//! whose stop id is still unqualified is replaced as soon as a row with a
//! platform-qualified id for the same `(trip, sequence)` slot shows up.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::warn;

use crate::ids;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Agency {
    pub agency_id: u32,
    pub agency_name: String,
    pub agency_url: String,
    pub agency_timezone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stop {
    pub stop_id: String,
    pub stop_name: String,
    pub platform_code: String,
    pub stop_lat: Option<f64>,
    pub stop_lon: Option<f64>,
    /// Snapshot file the row was first extracted from, kept for debugging.
    pub stop_source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub route_id: String,
    pub agency_id: u32,
    pub route_short_name: String,
    pub route_long_name: String,
    pub route_desc: String,
    pub route_type: String,
    pub route_color: String,
    pub route_text_color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trip {
    pub trip_id: String,
    pub route_id: String,
    pub service_id: String,
    pub trip_headsign: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopTime {
    pub trip_id: String,
    pub stop_sequence: u32,
    pub arrival_time: String,
    pub departure_time: String,
    pub stop_id: String,
    /// Snapshot file the row was extracted from, kept for debugging.
    pub stop_time_source: String,
    pub pickup_type: u8,
    pub drop_off_type: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct Calendar {
    pub service_id: String,
    pub start_date: String,
    pub end_date: String,
    pub monday: u8,
    pub tuesday: u8,
    pub wednesday: u8,
    pub thursday: u8,
    pub friday: u8,
    pub saturday: u8,
    pub sunday: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalendarDate {
    pub date: String,
    pub service_id: String,
    pub exception_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    pub feed_id: String,
    pub feed_publisher_name: String,
    pub feed_publisher_url: String,
    pub feed_lang: String,
}

/// Accumulates entity rows across all snapshot files of one conversion run.
#[derive(Debug, Default)]
pub struct FeedStore {
    pub agencies: BTreeMap<u32, Agency>,
    pub stops: BTreeMap<String, Stop>,
    pub routes: BTreeMap<String, Route>,
    pub trips: BTreeMap<String, Trip>,
    pub stop_times: BTreeMap<(String, u32), StopTime>,
    pub feed_info: Vec<FeedInfo>,
    pub calendar: Vec<Calendar>,
    pub calendar_dates: Vec<CalendarDate>,
}

impl FeedStore {
    /// Creates a store pre-filled with the fixed feed-info and calendar
    /// content; services and holiday exceptions are not derived from input.
    pub fn new() -> Self {
        let calendar = ["1", "6", "7"]
            .into_iter()
            .map(|service_id| Calendar {
                service_id: service_id.to_string(),
                start_date: "20180601".to_string(),
                end_date: "20181209".to_string(),
                monday: u8::from(service_id == "1"),
                tuesday: u8::from(service_id == "1"),
                wednesday: u8::from(service_id == "1"),
                thursday: u8::from(service_id == "1"),
                friday: u8::from(service_id == "1"),
                saturday: u8::from(service_id == "6"),
                sunday: u8::from(service_id == "7"),
            })
            .collect();

        // German public holidays in the feed period run on the Sunday service.
        let holidays = ["20181003", "20181101", "20181225", "20181226"];
        let calendar_dates = holidays
            .into_iter()
            .flat_map(|date| {
                [
                    CalendarDate {
                        date: date.to_string(),
                        service_id: "7".to_string(),
                        exception_type: "1".to_string(),
                    },
                    CalendarDate {
                        date: date.to_string(),
                        service_id: "1".to_string(),
                        exception_type: "2".to_string(),
                    },
                ]
            })
            .collect();

        Self {
            feed_info: vec![FeedInfo {
                feed_id: "nvbv".to_string(),
                feed_publisher_name: "mfdz".to_string(),
                feed_publisher_url: "http://mfdz.de/".to_string(),
                feed_lang: "de".to_string(),
            }],
            calendar,
            calendar_dates,
            ..Default::default()
        }
    }

    pub fn cache_agency(&mut self, agency: Agency) {
        self.agencies.entry(agency.agency_id).or_insert(agency);
    }

    pub fn cache_stops(&mut self, stops: impl IntoIterator<Item = Stop>) {
        for stop in stops {
            self.stops.entry(stop.stop_id.clone()).or_insert(stop);
        }
    }

    pub fn cache_routes(&mut self, routes: impl IntoIterator<Item = Route>) {
        for route in routes {
            self.routes.entry(route.route_id.clone()).or_insert(route);
        }
    }

    pub fn cache_trips(&mut self, trips: impl IntoIterator<Item = Trip>) {
        for trip in trips {
            self.trips.entry(trip.trip_id.clone()).or_insert(trip);
        }
    }

    /// Merges stop-time rows. First writer wins, except that a row holding
    /// an unqualified stop id is replaced by one with a qualified id for the
    /// same slot; the reverse never happens.
    pub fn cache_stop_times(&mut self, rows: impl IntoIterator<Item = StopTime>) {
        for row in rows {
            let key = (row.trip_id.clone(), row.stop_sequence);
            let upgrade = self.stop_times.get(&key).is_some_and(|existing| {
                !ids::is_qualified(&existing.stop_id) && ids::is_qualified(&row.stop_id)
            });
            if upgrade || !self.stop_times.contains_key(&key) {
                self.stop_times.insert(key, row);
            }
        }
    }

    /// Whether a trip's stop-times were already extracted from an earlier
    /// snapshot (its first sequence slot is occupied).
    pub fn is_trip_extracted(&self, trip_id: &str) -> bool {
        self.stop_times.contains_key(&(trip_id.to_string(), 1))
    }

    pub fn stop_time(&self, trip_id: &str, sequence: u32) -> Option<&StopTime> {
        self.stop_times.get(&(trip_id.to_string(), sequence))
    }

    /// Sequence numbers of a trip's rows whose stop id is still unqualified.
    pub fn unqualified_sequences(&self, trip_id: &str) -> Vec<u32> {
        let mut sequences = Vec::new();
        let mut sequence = 1;
        while let Some(row) = self.stop_time(trip_id, sequence) {
            if !ids::is_qualified(&row.stop_id) {
                sequences.push(sequence);
            }
            sequence += 1;
        }
        sequences
    }

    /// In-place stop id upgrade for one cached stop-time row.
    pub fn set_stop_time_stop_id(&mut self, trip_id: &str, sequence: u32, stop_id: String) {
        if let Some(row) = self.stop_times.get_mut(&(trip_id.to_string(), sequence)) {
            row.stop_id = stop_id;
        }
    }

    /// Discards stops never referenced by a retained stop-time row. Returns
    /// the number of removed stops; references to unknown stops are logged.
    pub fn prune_unused_stops(&mut self) -> usize {
        let mut referenced: HashSet<&str> = HashSet::new();
        for row in self.stop_times.values() {
            let stop_id = row.stop_id.trim();
            if self.stops.contains_key(stop_id) {
                referenced.insert(stop_id);
            } else {
                warn!(stop_id, trip_id = %row.trip_id, "stop-time references an unknown stop");
            }
        }
        let referenced: HashSet<String> = referenced.into_iter().map(str::to_string).collect();
        let before = self.stops.len();
        self.stops.retain(|stop_id, _| referenced.contains(stop_id));
        before - self.stops.len()
    }
}
