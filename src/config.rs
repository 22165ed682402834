//! JSON configuration for conversion runs and for the crawler.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Ignore lists and manual override tables for one conversion run.
///
/// Stored as a plain JSON object on disk:
/// ```json
/// {
///   "agencies_to_ignore": ["ding"],
///   "fixed_coords": { "4071": [48.594, 8.867] },
///   "gid_prefix_overrides": { "de:8111:4071": "de:08111:4071" },
///   "stop_id_fixups": { "34020": { "4071": "de:08111:4071:0:1" } },
///   "stops_to_ignore": { "34020": ["9999"] },
///   "routes_to_reorder": ["34020"]
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Networks whose routes are dropped (on-demand service excepted).
    pub agencies_to_ignore: Vec<String>,
    /// Manual `(lat, lon)` per stop id, overriding decoded coordinates.
    pub fixed_coords: HashMap<String, (f64, f64)>,
    /// Known-bad `pointGid` prefix mapped to the corrected `gid` prefix.
    pub gid_prefix_overrides: HashMap<String, String>,
    /// Per route id: stop id replacements applied to extracted stop-times.
    pub stop_id_fixups: HashMap<String, HashMap<String, String>>,
    /// Per route id: stops dropped from stop sequences (corrupted data).
    pub stops_to_ignore: HashMap<String, Vec<String>>,
    /// Routes whose stop-times need chronological repair.
    pub routes_to_reorder: Vec<String>,
}

impl ConvertConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading convert config {path}"))?;
        serde_json::from_str(&content).with_context(|| format!("parsing convert config {path}"))
    }
}

/// Endpoint and pacing settings for the departure-monitor crawler.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// EFA instance base URL, e.g. `https://www.efa-bw.de/nvbw/`.
    pub base_url: String,
    /// CSV file whose first column lists the stop ids to crawl.
    pub stops_file: String,
    /// Pause between requests, to stay polite towards the endpoint.
    pub sleep_interval_secs: f64,
    /// Resume marker: skip all stops before this one.
    pub skip_until_stop: Option<String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.efa-bw.de/nvbw/".to_string(),
            stops_file: "stops.csv".to_string(),
            sleep_interval_secs: 1.0,
            skip_until_stop: None,
        }
    }
}

impl CrawlConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading crawl config {path}"))?;
        serde_json::from_str(&content).with_context(|| format!("parsing crawl config {path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_config_defaults() {
        let config: ConvertConfig = serde_json::from_str("{}").unwrap();
        assert!(config.agencies_to_ignore.is_empty());
        assert!(config.routes_to_reorder.is_empty());
    }

    #[test]
    fn test_convert_config_parses_tables() {
        let config: ConvertConfig = serde_json::from_str(
            r#"{
                "agencies_to_ignore": ["ding"],
                "fixed_coords": { "4071": [48.594, 8.867] },
                "stops_to_ignore": { "34020": ["9999"] }
            }"#,
        )
        .unwrap();
        assert_eq!(config.agencies_to_ignore, vec!["ding"]);
        assert_eq!(config.fixed_coords["4071"], (48.594, 8.867));
        assert_eq!(config.stops_to_ignore["34020"], vec!["9999"]);
    }

    #[test]
    fn test_crawl_config_defaults() {
        let config: CrawlConfig = serde_json::from_str(r#"{ "base_url": "http://efa.test/" }"#).unwrap();
        assert_eq!(config.base_url, "http://efa.test/");
        assert_eq!(config.stops_file, "stops.csv");
        assert_eq!(config.sleep_interval_secs, 1.0);
    }
}
