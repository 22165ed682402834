//! Departure-monitor crawler: fetches DM responses per stop and saves them
//! as the snapshot files the converter consumes.
//!
//! For each stop the crawl paginates through time: a request is issued for
//! the current window position, the response is saved, and the position
//! advances to the latest departure seen, until the window is exhausted or
//! the endpoint stops returning new departures.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{error, info};

use crate::config::CrawlConfig;
use crate::fetch::{BasicClient, fetch_bytes};

pub struct EfaCrawler {
    config: CrawlConfig,
    client: BasicClient,
}

impl EfaCrawler {
    pub fn new(config: CrawlConfig) -> Self {
        Self {
            config,
            client: BasicClient::new(),
        }
    }

    /// Crawls all departures between `start` and `end` for every stop listed
    /// in the configured stops file, writing snapshots into `data_dir`.
    /// A failing stop is logged and skipped; the crawl continues.
    pub async fn load_trips_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        data_dir: &Path,
    ) -> Result<()> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;
        let stops = stops_from_file(
            Path::new(&self.config.stops_file),
            self.config.skip_until_stop.as_deref(),
        )?;
        info!(stops = stops.len(), start = %start, end = %end, "Starting crawl");

        for stop_id in stops {
            if let Err(e) = self.crawl_stop(&stop_id, start, end, data_dir).await {
                error!(stop_id, error = %format!("{e:#}"), "Crawl failed for stop");
            }
        }
        Ok(())
    }

    async fn crawl_stop(
        &self,
        stop_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        data_dir: &Path,
    ) -> Result<()> {
        let mut counter = 1;
        let mut request_time = start;
        let mut previous_last: Option<NaiveDateTime> = None;

        loop {
            let url = self.dm_request_url(stop_id, request_time)?;
            let bytes = fetch_bytes(&self.client, url).await?;
            let response: Value =
                serde_json::from_slice(&bytes).context("DM response is not valid JSON")?;

            let path = data_dir.join(format!("{stop_id}_{counter}.json"));
            std::fs::write(&path, serde_json::to_vec_pretty(&response)?)
                .with_context(|| format!("writing snapshot {}", path.display()))?;
            info!(file = %path.display(), "Snapshot saved");

            sleep(Duration::from_secs_f64(self.config.sleep_interval_secs)).await;

            // Stop when past the window, or when the endpoint repeats itself.
            match max_departure_datetime(&response) {
                None => break,
                Some(last) if last > end || previous_last == Some(last) => break,
                Some(last) => {
                    request_time = last;
                    previous_last = Some(last);
                    counter += 1;
                }
            }
        }
        Ok(())
    }

    fn dm_request_url(&self, stop_id: &str, when: NaiveDateTime) -> Result<reqwest::Url> {
        let itd_date = when.format("%Y%m%d").to_string();
        let itd_time = when.format("%H%M").to_string();
        let params = [
            ("locationServerActive", "1"),
            ("appCache", "true"),
            ("googleAnalytics", "false"),
            ("type_dm", "stop"),
            ("limit", "999999"),
            ("outputFormat", "JSON"),
            ("coordOutputFormat", "WGS84"),
            ("language", "de"),
            ("depType", "stopEvents"),
            ("mode", "direct"),
            ("includeCompleteStopSeq", "1"),
            ("name_dm", stop_id),
            ("itdDate", itd_date.as_str()),
            ("itdTime", itd_time.as_str()),
        ];
        reqwest::Url::parse_with_params(
            &format!("{}XML_DM_REQUEST", self.config.base_url),
            params,
        )
        .with_context(|| format!("invalid base URL {:?}", self.config.base_url))
    }
}

/// Stop ids from the first column of a CSV file. With `skip_until`, all rows
/// before the first occurrence of that id are dropped (resume support).
fn stops_from_file(path: &Path, skip_until: Option<&str>) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading stops file {}", path.display()))?;
    let mut skipping = skip_until.is_some();
    let mut stops = Vec::new();

    for line in content.lines() {
        let stop_id = line
            .split(',')
            .next()
            .unwrap_or("")
            .trim()
            .trim_matches('"');
        if stop_id.is_empty() || stop_id == "stop_id" {
            continue;
        }
        if skipping {
            if Some(stop_id) != skip_until {
                continue;
            }
            skipping = false;
        }
        stops.push(stop_id.to_string());
    }
    Ok(stops)
}

/// Date-time of the last departure in a raw DM response, if any.
fn max_departure_datetime(response: &Value) -> Option<NaiveDateTime> {
    let node = response.get("departureList")?;
    let last = match node {
        Value::Array(list) => list.last()?,
        Value::Object(map) => map.get("departure")?,
        _ => return None,
    };
    let date_time = last.get("dateTime")?;
    let year = int_field(date_time, "year")?;
    let month = int_field(date_time, "month")?;
    let day = int_field(date_time, "day")?;
    let hour = int_field(date_time, "hour")?;
    let minute = int_field(date_time, "minute")?;
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?
        .and_hms_opt(hour as u32, minute as u32, 0)
}

fn int_field(node: &Value, key: &str) -> Option<i64> {
    match node.get(key)? {
        Value::String(text) => text.trim().parse().ok(),
        Value::Number(number) => number.as_i64(),
        _ => None,
    }
}
