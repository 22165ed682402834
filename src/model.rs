//! Typed model of one EFA departure-monitor (DM) response.
//!
//! The raw API is inconsistently shaped: fields appear as a single record,
//! a list of records, a wrapper object, or `null`, and scalars switch between
//! strings and numbers across instances. All of that is normalized once, at
//! the parse boundary; downstream code only sees these immutable records.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};

use crate::times;

/// Parses one snapshot file into a typed [`DmResponse`].
///
/// # Errors
///
/// Returns an error for malformed JSON or a missing mandatory structural
/// field; both are fatal for the file being processed.
pub fn parse_snapshot(bytes: &[u8]) -> Result<DmResponse> {
    serde_json::from_slice(bytes).context("malformed DM response")
}

/// One departure-monitor response: the queried stop(s) plus upcoming
/// departures with their full stop sequences.
#[derive(Debug, Deserialize)]
pub struct DmResponse {
    pub dm: DmBlock,
    #[serde(rename = "departureList", deserialize_with = "wrapped_or_list")]
    pub departures: Vec<Departure>,
}

#[derive(Debug, Deserialize)]
pub struct DmBlock {
    #[serde(deserialize_with = "wrapped_or_list")]
    pub points: Vec<Point>,
}

/// A parent-station record from the `dm/points` substructure.
#[derive(Debug, Deserialize)]
pub struct Point {
    #[serde(rename = "ref")]
    pub reference: PointRef,
    #[serde(deserialize_with = "flexible_string")]
    pub name: String,
}

impl Point {
    /// Station name with embedded line breaks flattened.
    pub fn display_name(&self) -> String {
        self.name.replace('\n', " ")
    }
}

#[derive(Debug, Deserialize)]
pub struct PointRef {
    #[serde(deserialize_with = "flexible_string")]
    pub id: String,
    #[serde(default)]
    pub coords: Option<String>,
}

/// One departure record, including the serving line and the previous and
/// onward stop sequences of its trip.
#[derive(Debug, Deserialize)]
pub struct Departure {
    #[serde(rename = "servingLine")]
    pub serving_line: ServingLine,
    #[serde(rename = "dateTime")]
    pub date_time: DateTimeRec,
    #[serde(rename = "stopID", deserialize_with = "flexible_string")]
    pub stop_id: String,
    #[serde(rename = "prevStopSeq", default, deserialize_with = "one_or_many")]
    pub prev_stops: Vec<TripStop>,
    #[serde(rename = "onwardStopSeq", default, deserialize_with = "one_or_many")]
    pub onward_stops: Vec<TripStop>,
}

#[derive(Debug, Deserialize)]
pub struct ServingLine {
    /// Route identifier stable across schedule periods.
    #[serde(deserialize_with = "flexible_string")]
    pub stateless: String,
    #[serde(deserialize_with = "flexible_string")]
    pub number: String,
    pub direction: String,
    #[serde(rename = "directionFrom", default)]
    pub direction_from: Option<String>,
    /// Schedule key, distinguishes trips of the same route and service day.
    #[serde(deserialize_with = "flexible_string")]
    pub key: String,
    #[serde(rename = "motType", deserialize_with = "flexible_string")]
    pub mot_type: String,
    #[serde(rename = "liErgRiProj")]
    pub li_erg_ri_proj: LiErgRiProj,
    #[serde(rename = "itdNoTrain", default, deserialize_with = "train_desc")]
    pub train_desc: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LiErgRiProj {
    pub network: String,
}

#[derive(Debug, Deserialize)]
pub struct DateTimeRec {
    #[serde(deserialize_with = "flexible_string")]
    pub year: String,
    #[serde(deserialize_with = "flexible_string")]
    pub month: String,
    #[serde(deserialize_with = "flexible_string")]
    pub day: String,
    #[serde(deserialize_with = "flexible_string")]
    pub hour: String,
    #[serde(deserialize_with = "flexible_string")]
    pub minute: String,
    #[serde(deserialize_with = "flexible_string")]
    pub weekday: String,
}

/// A neighboring-stop record inside `prevStopSeq`/`onwardStopSeq`.
#[derive(Debug, Deserialize)]
pub struct TripStop {
    #[serde(rename = "ref")]
    pub reference: StopRef,
    #[serde(deserialize_with = "flexible_string")]
    pub name: String,
}

impl TripStop {
    pub fn plain_id(&self) -> &str {
        &self.reference.id
    }

    pub fn display_name(&self) -> String {
        self.name.replace('\n', " ")
    }

    /// Arrival date-time; absent values borrow the departure side.
    pub fn arrival_raw(&self) -> Option<&str> {
        self.reference
            .arr_date_time
            .as_deref()
            .or(self.reference.dep_date_time.as_deref())
    }

    /// Departure date-time; absent values borrow the arrival side.
    pub fn departure_raw(&self) -> Option<&str> {
        self.reference
            .dep_date_time
            .as_deref()
            .or(self.reference.arr_date_time.as_deref())
    }
}

/// The identifier set of one stop record. Which identifiers are present
/// varies between snapshots; see [`crate::ids`] for how they are reconciled.
#[derive(Debug, Deserialize)]
pub struct StopRef {
    #[serde(deserialize_with = "flexible_string")]
    pub id: String,
    #[serde(default)]
    pub gid: Option<String>,
    #[serde(rename = "pointGid", default)]
    pub point_gid: Option<String>,
    #[serde(default, deserialize_with = "opt_flexible_string")]
    pub platform: Option<String>,
    #[serde(default)]
    pub coords: Option<String>,
    #[serde(rename = "arrDateTime", default)]
    pub arr_date_time: Option<String>,
    #[serde(rename = "depDateTime", default)]
    pub dep_date_time: Option<String>,
}

impl Departure {
    pub fn network(&self) -> &str {
        &self.serving_line.li_erg_ri_proj.network
    }

    pub fn route_id(&self) -> &str {
        &self.serving_line.stateless
    }

    pub fn direction(&self) -> &str {
        &self.serving_line.direction
    }

    /// Mode-of-transport code; fatal for the file when unparseable.
    pub fn mot_code(&self) -> Result<u32> {
        self.serving_line
            .mot_type
            .trim()
            .parse()
            .with_context(|| format!("invalid motType {:?}", self.serving_line.mot_type))
    }

    /// Coarse calendar bucket: Sunday maps to service "7", Saturday to "6",
    /// all other weekdays to "1".
    pub fn service_id(&self) -> &'static str {
        match self.date_time.weekday.as_str() {
            "1" => "7",
            "6" => "6",
            _ => "1",
        }
    }

    /// `HH:MM` departure time at the first known stop of this trip: the first
    /// previous stop when one is present, otherwise this departure itself.
    pub fn first_departure_hour_minute(&self) -> Result<String> {
        match self.prev_stops.first() {
            Some(first) => {
                let raw = first.departure_raw().with_context(|| {
                    format!("first previous stop {} has no time", first.plain_id())
                })?;
                let (hour, minute) = times::split_efa_time(raw)?;
                times::gtfs_hour_minute(hour, minute, None)
            }
            None => times::gtfs_hour_minute(&self.date_time.hour, &self.date_time.minute, None),
        }
    }

    /// Hour at the trip's first stop, used for day-rollover detection.
    pub fn start_hour(&self) -> Result<u32> {
        let hour_minute = self.first_departure_hour_minute()?;
        let (hour, _) = hour_minute
            .split_once(':')
            .context("missing colon in converted time")?;
        hour.parse()
            .with_context(|| format!("invalid converted hour {hour_minute:?}"))
    }

    /// Deterministic trip identity: the same logical trip yields the same id
    /// in every snapshot file that mentions it.
    pub fn trip_id(&self) -> Result<String> {
        Ok(format!(
            "{}-{}-{}-{}",
            self.route_id(),
            self.service_id(),
            self.serving_line.key,
            self.first_departure_hour_minute()?
        ))
    }
}

/// Accepts an array, a `null`, or a single wrapper object such as
/// `{"point": {...}}` / `{"departure": {...}}`, and yields a flat list.
fn wrapped_or_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Node<T> {
        Many(Vec<T>),
        Wrapped(BTreeMap<String, T>),
    }

    Ok(match Option::<Node<T>>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Node::Many(list)) => list,
        Some(Node::Wrapped(map)) => map.into_values().collect(),
    })
}

/// Accepts an array, a `null`, or a single bare record, and yields a list.
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Node<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match Option::<Node<T>>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Node::Many(list)) => list,
        Some(Node::One(single)) => vec![single],
    })
}

/// Accepts a JSON string or number; EFA instances disagree on which they emit.
fn flexible_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Text(text) => text,
        Scalar::Int(number) => number.to_string(),
        Scalar::Float(number) => number.to_string(),
    })
}

fn opt_flexible_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Int(i64),
    }

    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|scalar| match scalar {
        Scalar::Text(text) => text,
        Scalar::Int(number) => number.to_string(),
    }))
}

/// `itdNoTrain` is either a plain string or an object with a `name` field.
fn train_desc<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Desc {
        Text(String),
        Record { name: String },
        Other(serde::de::IgnoredAny),
    }

    Ok(
        Option::<Desc>::deserialize(deserializer)?.and_then(|desc| match desc {
            Desc::Text(text) => Some(text),
            Desc::Record { name } => Some(name),
            Desc::Other(_) => None,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn departure_json(weekday: &str, prev_stops: &str) -> String {
        format!(
            r#"{{
                "servingLine": {{
                    "stateless": "34020",
                    "number": "782",
                    "direction": "Nagold",
                    "key": "5",
                    "motType": "6",
                    "liErgRiProj": {{ "network": "vvs" }}
                }},
                "dateTime": {{
                    "year": "2018", "month": "6", "day": "11",
                    "hour": "8", "minute": "15", "weekday": "{weekday}"
                }},
                "stopID": "4071",
                "prevStopSeq": {prev_stops},
                "onwardStopSeq": null
            }}"#
        )
    }

    fn departure(weekday: &str, prev_stops: &str) -> Departure {
        serde_json::from_str(&departure_json(weekday, prev_stops)).unwrap()
    }

    #[test]
    fn test_points_wrapper_object_is_normalized() {
        let json = r#"{
            "dm": { "points": { "point": { "name": "Herrenberg\nBahnhof", "ref": { "id": 4071, "coords": "8867700,48594000" } } } },
            "departureList": null
        }"#;
        let response = parse_snapshot(json.as_bytes()).unwrap();
        assert_eq!(response.dm.points.len(), 1);
        assert_eq!(response.dm.points[0].reference.id, "4071");
        assert_eq!(response.dm.points[0].display_name(), "Herrenberg Bahnhof");
        assert!(response.departures.is_empty());
    }

    #[test]
    fn test_points_list_is_kept() {
        let json = r#"{
            "dm": { "points": [
                { "name": "A", "ref": { "id": "1" } },
                { "name": "B", "ref": { "id": "2" } }
            ] },
            "departureList": []
        }"#;
        let response = parse_snapshot(json.as_bytes()).unwrap();
        assert_eq!(response.dm.points.len(), 2);
        assert_eq!(response.dm.points[1].reference.id, "2");
    }

    #[test]
    fn test_missing_departure_list_is_fatal() {
        let json = r#"{ "dm": { "points": null } }"#;
        assert!(parse_snapshot(json.as_bytes()).is_err());
    }

    #[test]
    fn test_single_stop_record_becomes_singleton() {
        let dep = departure(
            "2",
            r#"{ "name": "X", "ref": { "id": "1", "depDateTime": "20180611 08:00" } }"#,
        );
        assert_eq!(dep.prev_stops.len(), 1);
        assert_eq!(dep.prev_stops[0].plain_id(), "1");
    }

    #[test]
    fn test_service_id_from_weekday() {
        assert_eq!(departure("1", "null").service_id(), "7");
        assert_eq!(departure("6", "null").service_id(), "6");
        assert_eq!(departure("2", "null").service_id(), "1");
        assert_eq!(departure("7", "null").service_id(), "1");
    }

    #[test]
    fn test_trip_id_without_prev_stops_uses_own_time() {
        let dep = departure("1", "null");
        assert_eq!(dep.trip_id().unwrap(), "34020-7-5-08:15");
        assert_eq!(dep.start_hour().unwrap(), 8);
    }

    #[test]
    fn test_trip_id_uses_first_prev_stop_departure() {
        let dep = departure(
            "2",
            r#"[{ "name": "X", "ref": { "id": "1", "depDateTime": "20180611 07:40" } },
               { "name": "Y", "ref": { "id": "2", "depDateTime": "20180611 08:00" } }]"#,
        );
        assert_eq!(dep.trip_id().unwrap(), "34020-1-5-07:40");
        assert_eq!(dep.start_hour().unwrap(), 7);
    }

    #[test]
    fn test_trip_id_is_deterministic_across_snapshots() {
        // The same logical trip seen from two different stops: one snapshot
        // has no previous stops, the other reports the origin's departure.
        let at_origin = departure("1", "null");
        let later = departure(
            "1",
            r#"{ "name": "Origin", "ref": { "id": "4071", "depDateTime": "20180611 08:15" } }"#,
        );
        assert_eq!(at_origin.trip_id().unwrap(), later.trip_id().unwrap());
    }

    #[test]
    fn test_time_fallbacks_between_arrival_and_departure() {
        let dep = departure(
            "2",
            r#"{ "name": "X", "ref": { "id": "1", "arrDateTime": "20180611 07:40" } }"#,
        );
        let stop = &dep.prev_stops[0];
        assert_eq!(stop.arrival_raw(), Some("20180611 07:40"));
        assert_eq!(stop.departure_raw(), Some("20180611 07:40"));
    }

    #[test]
    fn test_train_desc_accepts_string_and_record() {
        let line: ServingLine = serde_json::from_str(
            r#"{
                "stateless": "1", "number": "RB 17", "direction": "X", "key": "2",
                "motType": "0", "liErgRiProj": { "network": "nvbw" },
                "itdNoTrain": { "name": "Regionalbahn" }
            }"#,
        )
        .unwrap();
        assert_eq!(line.train_desc.as_deref(), Some("Regionalbahn"));

        let line: ServingLine = serde_json::from_str(
            r#"{
                "stateless": "1", "number": "RB 17", "direction": "X", "key": "2",
                "motType": "0", "liErgRiProj": { "network": "nvbw" },
                "itdNoTrain": "Regionalbahn"
            }"#,
        )
        .unwrap();
        assert_eq!(line.train_desc.as_deref(), Some("Regionalbahn"));
    }
}
