//! Extraction of GTFS entity rows from departure-monitor snapshots.
//!
//! One [`Converter`] owns all mutable state of a conversion run: the
//! identifier reconciler, the coordinate normalizer, the agency allocator,
//! the manual override tables, and the entity store. Snapshot files are fed
//! in one at a time; re-seeing the same trip in a later file only patches
//! stop ids and never duplicates rows.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, error, info, warn};

use crate::config::ConvertConfig;
use crate::coords::CoordNormalizer;
use crate::ids::{self, IdOutcome, IdReconciler};
use crate::model::{Departure, DmResponse, TripStop, parse_snapshot};
use crate::modes::{self, ModeInfo, ON_DEMAND_ROUTE_TYPE};
use crate::repair::repair_order;
use crate::store::{Agency, FeedStore, Route, Stop, StopTime, Trip};
use crate::times;

/// Per-file extraction outcome, for batch statistics.
#[derive(Debug, Default)]
pub struct FileReport {
    pub source: String,
    pub departures: usize,
    pub departures_ignored: usize,
    pub stops_skipped: usize,
    pub id_warnings: usize,
}

/// Outcome of a whole directory conversion.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub files_attempted: usize,
    pub files_failed: usize,
    pub stops_pruned: usize,
}

/// Conversion session turning parsed snapshots into canonical entity rows.
pub struct Converter {
    agencies_to_ignore: HashSet<String>,
    stops_to_ignore: HashMap<String, HashSet<String>>,
    stop_id_fixups: HashMap<String, HashMap<String, String>>,
    routes_to_reorder: HashSet<String>,
    ids: IdReconciler,
    coords: CoordNormalizer,
    agency_ids: HashMap<String, u32>,
    agency_counter: u32,
    pub store: FeedStore,
}

impl Converter {
    pub fn new(config: ConvertConfig) -> Self {
        Self {
            agencies_to_ignore: config.agencies_to_ignore.into_iter().collect(),
            stops_to_ignore: config
                .stops_to_ignore
                .into_iter()
                .map(|(route, stops)| (route, stops.into_iter().collect()))
                .collect(),
            stop_id_fixups: config.stop_id_fixups,
            routes_to_reorder: config.routes_to_reorder.into_iter().collect(),
            ids: IdReconciler::new(config.gid_prefix_overrides),
            coords: CoordNormalizer::new(config.fixed_coords),
            agency_ids: HashMap::new(),
            agency_counter: 0,
            store: FeedStore::new(),
        }
    }

    /// Converts every `*.json` snapshot in `dir`, in sorted file order.
    ///
    /// A failing file is logged and skipped; the run continues. Afterwards
    /// stops unreferenced by any retained stop-time are pruned.
    pub fn convert_dir(&mut self, dir: &Path) -> Result<RunSummary> {
        let mut paths: Vec<_> = fs::read_dir(dir)
            .with_context(|| format!("reading snapshot directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut summary = RunSummary::default();
        for path in paths {
            summary.files_attempted += 1;
            info!(file = %path.display(), n = summary.files_attempted, "Loading snapshot");
            match self.convert_file(&path) {
                Ok(report) => debug!(
                    file = %path.display(),
                    departures = report.departures,
                    ignored = report.departures_ignored,
                    skipped_stops = report.stops_skipped,
                    id_warnings = report.id_warnings,
                    "Snapshot converted"
                ),
                Err(e) => {
                    summary.files_failed += 1;
                    error!(file = %path.display(), error = %format!("{e:#}"), "Snapshot conversion failed");
                }
            }
        }

        summary.stops_pruned = self.store.prune_unused_stops();
        info!(
            attempted = summary.files_attempted,
            failed = summary.files_failed,
            pruned_stops = summary.stops_pruned,
            "Conversion finished"
        );
        Ok(summary)
    }

    pub fn convert_file(&mut self, path: &Path) -> Result<FileReport> {
        let bytes =
            fs::read(path).with_context(|| format!("reading snapshot {}", path.display()))?;
        let snapshot = parse_snapshot(&bytes)?;
        self.convert_snapshot(&snapshot, &source_tag(path))
    }

    /// Extracts and caches all entity rows of one parsed snapshot. `source`
    /// tags the emitted rows with their originating file.
    pub fn convert_snapshot(&mut self, snapshot: &DmResponse, source: &str) -> Result<FileReport> {
        let mut report = FileReport {
            source: source.to_string(),
            departures: snapshot.departures.len(),
            ..FileReport::default()
        };

        let point_stops = self.stops_from_points(snapshot, source, &mut report);
        self.store.cache_stops(point_stops);

        let sequence_stops = self.stops_from_sequences(snapshot, source, &mut report);
        self.store.cache_stops(sequence_stops.into_values());

        let routes = self.routes_from_departures(snapshot)?;
        self.store.cache_routes(routes);

        let trips = self.trips_from_departures(snapshot)?;
        self.store.cache_trips(trips);

        let stop_times = self.stop_times_from_departures(snapshot, source)?;
        self.store.cache_stop_times(stop_times);

        report.departures_ignored = report.departures - self.selected_departures(snapshot)?.len();
        Ok(report)
    }

    /// Stops from the `dm/points` list. Points are parent-station aggregates,
    /// so the plain id is used and no platform code is set.
    fn stops_from_points(
        &mut self,
        snapshot: &DmResponse,
        source: &str,
        report: &mut FileReport,
    ) -> Vec<Stop> {
        let mut stops = Vec::new();
        for point in &snapshot.dm.points {
            let stop_id = point.reference.id.clone();
            let coords = match self
                .coords
                .normalize(point.reference.coords.as_deref(), &stop_id)
            {
                Ok(coords) => coords,
                Err(e) => {
                    warn!(stop_id, error = %format!("{e:#}"), "Skipping point with bad coordinates");
                    report.stops_skipped += 1;
                    continue;
                }
            };
            stops.push(Stop {
                stop_id,
                stop_name: point.display_name(),
                platform_code: String::new(),
                stop_lat: coords.map(|c| c.0),
                stop_lon: coords.map(|c| c.1),
                stop_source: source.to_string(),
            });
        }
        stops
    }

    /// Stops from every departure's previous and onward sequences, keyed by
    /// their stable id. The current stop itself is covered by the points.
    fn stops_from_sequences(
        &mut self,
        snapshot: &DmResponse,
        source: &str,
        report: &mut FileReport,
    ) -> HashMap<String, Stop> {
        let mut stops = HashMap::new();
        for departure in &snapshot.departures {
            for trip_stop in departure.prev_stops.iter().chain(&departure.onward_stops) {
                self.collect_sequence_stop(trip_stop, source, &mut stops, report);
            }
        }
        stops
    }

    fn collect_sequence_stop(
        &mut self,
        trip_stop: &TripStop,
        source: &str,
        stops: &mut HashMap<String, Stop>,
        report: &mut FileReport,
    ) {
        let resolved = self.ids.resolve(&trip_stop.reference);
        if resolved.outcome == IdOutcome::Warned {
            report.id_warnings += 1;
        }
        if stops.contains_key(&resolved.id) {
            return;
        }
        let coords = match self
            .coords
            .normalize(trip_stop.reference.coords.as_deref(), &resolved.id)
        {
            Ok(coords) => coords,
            Err(e) => {
                warn!(stop_id = %resolved.id, error = %format!("{e:#}"), "Skipping stop with bad coordinates");
                report.stops_skipped += 1;
                return;
            }
        };
        stops.insert(
            resolved.id.clone(),
            Stop {
                stop_id: resolved.id,
                stop_name: trip_stop.display_name(),
                platform_code: trip_stop.reference.platform.clone().unwrap_or_default(),
                stop_lat: coords.map(|c| c.0),
                stop_lon: coords.map(|c| c.1),
                stop_source: source.to_string(),
            },
        );
    }

    /// Departures that survive the ignore rule, with their mode info.
    ///
    /// An unknown mode code is fatal for the file: it signals an unmodeled
    /// input shape rather than bad data in one record.
    fn selected_departures<'a>(
        &self,
        snapshot: &'a DmResponse,
    ) -> Result<Vec<(&'a Departure, &'static ModeInfo)>> {
        let mut selected = Vec::new();
        for departure in &snapshot.departures {
            let code = departure.mot_code()?;
            let mode = modes::lookup(code).with_context(|| {
                format!(
                    "unknown mode type {code} for route {}",
                    departure.route_id()
                )
            })?;
            if self.should_ignore(departure.network(), mode.route_type) {
                continue;
            }
            selected.push((departure, mode));
        }
        Ok(selected)
    }

    /// Routes from ignored networks are dropped, except on-demand service:
    /// that is unpublished anywhere else, so it is always retained.
    fn should_ignore(&self, network: &str, route_type: &str) -> bool {
        self.agencies_to_ignore.contains(network) && route_type != ON_DEMAND_ROUTE_TYPE
    }

    fn routes_from_departures(&mut self, snapshot: &DmResponse) -> Result<Vec<Route>> {
        let mut routes = Vec::new();
        for (departure, mode) in self.selected_departures(snapshot)? {
            let agency_id = self.agency_id(departure.network());
            let line = &departure.serving_line;

            let mut short_name = line.number.clone();
            if short_name.chars().count() > 6 {
                warn!(route_id = %line.stateless, number = %line.number, "Route short name exceeds 6 chars, truncating");
                short_name = short_name
                    .split(' ')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                if short_name.chars().count() > 6
                    && !short_name.chars().any(|c| c.is_ascii_digit())
                {
                    short_name.clear();
                }
            }

            let long_name = match &line.direction_from {
                Some(origin) => format!("{} - {}", origin, line.direction),
                None => line.direction.clone(),
            };

            routes.push(Route {
                route_id: line.stateless.clone(),
                agency_id,
                route_short_name: short_name,
                route_long_name: long_name,
                route_desc: line.train_desc.clone().unwrap_or_default(),
                route_type: mode.route_type.to_string(),
                route_color: mode.route_color.to_string(),
                route_text_color: mode.route_text_color.to_string(),
            });
        }
        Ok(routes)
    }

    fn trips_from_departures(&mut self, snapshot: &DmResponse) -> Result<Vec<Trip>> {
        let mut trips = Vec::new();
        for (departure, _) in self.selected_departures(snapshot)? {
            trips.push(Trip {
                trip_id: departure.trip_id()?,
                route_id: departure.route_id().to_string(),
                service_id: departure.service_id().to_string(),
                trip_headsign: departure.direction().to_string(),
            });
        }
        Ok(trips)
    }

    fn stop_times_from_departures(
        &mut self,
        snapshot: &DmResponse,
        source: &str,
    ) -> Result<Vec<StopTime>> {
        let mut rows = Vec::new();
        for (departure, mode) in self.selected_departures(snapshot)? {
            rows.extend(self.stop_times_for_trip(departure, mode, source)?);
        }
        Ok(rows)
    }

    /// Two-phase walk over a trip's stop sequences: previous stops, then the
    /// current stop (unless it duplicates a neighbor), then onward stops.
    ///
    /// A trip whose rows are already cached is not re-extracted; only the
    /// late-binding stop id upgrade runs, so re-processing is idempotent.
    fn stop_times_for_trip(
        &mut self,
        departure: &Departure,
        mode: &ModeInfo,
        source: &str,
    ) -> Result<Vec<StopTime>> {
        let trip_id = departure.trip_id()?;

        if self.store.is_trip_extracted(&trip_id) {
            self.upgrade_stop_ids(&trip_id, departure);
            return Ok(Vec::new());
        }

        let start_hour = departure.start_hour()?;
        let on_demand = mode.route_type == ON_DEMAND_ROUTE_TYPE;
        let route_id = departure.route_id();

        let mut rows = self.sequence_stop_times(
            &departure.prev_stops,
            &trip_id,
            route_id,
            0,
            start_hour,
            on_demand,
            source,
        )?;

        // The current stop sometimes already appears as the last previous or
        // first onward stop when a station has multiple served platforms.
        let repeats_prev = departure
            .prev_stops
            .last()
            .is_some_and(|stop| stop.plain_id() == departure.stop_id);
        let repeats_onward = departure
            .onward_stops
            .first()
            .is_some_and(|stop| stop.plain_id() == departure.stop_id);
        if !repeats_prev && !repeats_onward {
            if let Some(row) = self.current_stop_time(
                departure,
                &trip_id,
                rows.len() as u32,
                start_hour,
                on_demand,
                source,
            )? {
                rows.push(row);
            }
        }

        let onward = self.sequence_stop_times(
            &departure.onward_stops,
            &trip_id,
            route_id,
            rows.len() as u32,
            start_hour,
            on_demand,
            source,
        )?;
        rows.extend(onward);

        if self.routes_to_reorder.contains(route_id) {
            rows = repair_order(rows);
            for (idx, row) in rows.iter_mut().enumerate() {
                let sequence = idx as u32 + 1;
                if row.stop_sequence != sequence {
                    row.stop_sequence = sequence;
                }
            }
        }

        Ok(rows)
    }

    #[allow(clippy::too_many_arguments)]
    fn sequence_stop_times(
        &mut self,
        stops: &[TripStop],
        trip_id: &str,
        route_id: &str,
        mut sequence: u32,
        start_hour: u32,
        on_demand: bool,
        source: &str,
    ) -> Result<Vec<StopTime>> {
        let mut rows = Vec::new();
        let mut previous_plain_id: Option<&str> = None;

        for stop in stops {
            // The same stop halting multiple times in a row is an EFA
            // inconsistency; the duplicates would read as time travel.
            if previous_plain_id == Some(stop.plain_id()) {
                continue;
            }
            if self.should_ignore_stop(route_id, stop.plain_id(), trip_id) {
                continue;
            }

            let resolved = self.ids.resolve(&stop.reference);
            let stop_id = self.fixup_stop_id(route_id, resolved.id);
            previous_plain_id = Some(stop.plain_id());
            sequence += 1;

            let (arrival_raw, departure_raw) = match (stop.arrival_raw(), stop.departure_raw()) {
                (Some(arrival), Some(departure)) => (arrival, departure),
                _ => bail!(
                    "stop {} in trip {trip_id} has neither arrival nor departure time",
                    stop.plain_id()
                ),
            };

            rows.push(StopTime {
                trip_id: trip_id.to_string(),
                stop_sequence: sequence,
                arrival_time: gtfs_time(arrival_raw, start_hour)?,
                departure_time: gtfs_time(departure_raw, start_hour)?,
                stop_id,
                stop_time_source: source.to_string(),
                pickup_type: on_demand_flag(on_demand),
                drop_off_type: on_demand_flag(on_demand),
            });
        }
        Ok(rows)
    }

    /// Row for the departure's own stop. The DM response carries no separate
    /// arrival time here, so arrival equals departure.
    fn current_stop_time(
        &mut self,
        departure: &Departure,
        trip_id: &str,
        preceding_rows: u32,
        start_hour: u32,
        on_demand: bool,
        source: &str,
    ) -> Result<Option<StopTime>> {
        let route_id = departure.route_id();
        let stop_id = self.fixup_stop_id(route_id, departure.stop_id.clone());
        if self.should_ignore_stop(route_id, &stop_id, trip_id) {
            return Ok(None);
        }

        let hour_minute = times::gtfs_hour_minute(
            &departure.date_time.hour,
            &departure.date_time.minute,
            Some(start_hour),
        )?;
        let time = format!("{hour_minute}:00");

        Ok(Some(StopTime {
            trip_id: trip_id.to_string(),
            stop_sequence: preceding_rows + 1,
            arrival_time: time.clone(),
            departure_time: time,
            stop_id,
            stop_time_source: source.to_string(),
            pickup_type: on_demand_flag(on_demand),
            drop_off_type: on_demand_flag(on_demand),
        }))
    }

    /// Late-binding upgrade: rewrites cached rows of `trip_id` whose stop id
    /// is still unqualified, using matching neighboring-stop records that
    /// carry a resolvable qualified identifier. Idempotent; qualified ids
    /// are never downgraded.
    fn upgrade_stop_ids(&mut self, trip_id: &str, departure: &Departure) {
        for sequence in self.store.unqualified_sequences(trip_id) {
            let Some(current_id) = self
                .store
                .stop_time(trip_id, sequence)
                .map(|row| row.stop_id.clone())
            else {
                continue;
            };
            let Some(stop) = departure
                .prev_stops
                .iter()
                .chain(&departure.onward_stops)
                .find(|stop| stop.plain_id() == current_id && stop.reference.point_gid.is_some())
            else {
                continue;
            };
            let resolved = self.ids.resolve(&stop.reference);
            if ids::is_qualified(&resolved.id) {
                debug!(trip_id, sequence, from = %current_id, to = %resolved.id, "Upgrading stop id");
                self.store
                    .set_stop_time_stop_id(trip_id, sequence, resolved.id);
            }
        }
    }

    fn fixup_stop_id(&self, route_id: &str, stop_id: String) -> String {
        match self
            .stop_id_fixups
            .get(route_id)
            .and_then(|fixups| fixups.get(&stop_id))
        {
            Some(fixed) => fixed.clone(),
            None => stop_id,
        }
    }

    fn should_ignore_stop(&self, route_id: &str, stop_id: &str, trip_id: &str) -> bool {
        let ignored = self
            .stops_to_ignore
            .get(route_id)
            .is_some_and(|stops| stops.contains(stop_id));
        if ignored {
            warn!(stop_id, trip_id, "Ignoring configured out-of-sequence stop");
        }
        ignored
    }

    /// Maps a network name to its agency id, assigning the next id and
    /// caching the agency row on first sight. Ids are stable for the
    /// lifetime of the session.
    fn agency_id(&mut self, network: &str) -> u32 {
        if let Some(id) = self.agency_ids.get(network) {
            return *id;
        }
        self.agency_counter += 1;
        let id = self.agency_counter;
        self.agency_ids.insert(network.to_string(), id);
        self.store.cache_agency(Agency {
            agency_id: id,
            agency_name: network.to_string(),
            agency_url: "http://unknown/".to_string(),
            agency_timezone: "Europe/Berlin".to_string(),
        });
        id
    }
}

fn on_demand_flag(on_demand: bool) -> u8 {
    if on_demand { 2 } else { 0 }
}

fn gtfs_time(raw: &str, start_hour: u32) -> Result<String> {
    let (hour, minute) = times::split_efa_time(raw)?;
    let hour_minute = times::gtfs_hour_minute(hour, minute, Some(start_hour))?;
    Ok(format!("{hour_minute}:00"))
}

/// Last 20 characters of the file name, used as the per-row source tag.
fn source_tag(path: &Path) -> String {
    let name = path.file_name().and_then(|name| name.to_str()).unwrap_or("");
    let chars: Vec<char> = name.chars().collect();
    let start = chars.len().saturating_sub(20);
    chars[start..].iter().collect()
}
