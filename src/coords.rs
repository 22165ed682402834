//! Decoding and repair of EFA coordinate pairs.
//!
//! Coordinates arrive as comma-separated integers in millionths of a degree.
//! Some responses emit the pair in (lon, lat) order, others in (lat, lon);
//! within German bounds latitude is always smaller than longitude, which the
//! order heuristic relies on.

use std::collections::HashMap;

use anyhow::{Context, Result};
use tracing::warn;

/// Decodes raw coordinate strings, applying manual per-stop overrides and the
/// axis-order heuristic.
#[derive(Debug, Default)]
pub struct CoordNormalizer {
    overrides: HashMap<String, (f64, f64)>,
}

impl CoordNormalizer {
    pub fn new(overrides: HashMap<String, (f64, f64)>) -> Self {
        Self { overrides }
    }

    /// Returns `(lat, lon)` in decimal degrees, or `None` for absent input.
    ///
    /// A manual override for `stop_id` takes precedence over decoding.
    /// Unparseable input is an error; callers skip the affected record.
    pub fn normalize(&self, raw: Option<&str>, stop_id: &str) -> Result<Option<(f64, f64)>> {
        if let Some(fixed) = self.overrides.get(stop_id) {
            return Ok(Some(*fixed));
        }
        let Some(raw) = raw.filter(|r| !r.is_empty()) else {
            return Ok(None);
        };
        let (first, second) = raw
            .split_once(',')
            .with_context(|| format!("coordinate value {raw:?} is not a comma-separated pair"))?;
        let first: f64 = first
            .trim()
            .parse()
            .with_context(|| format!("invalid coordinate {first:?}"))?;
        let second: f64 = second
            .trim()
            .parse()
            .with_context(|| format!("invalid coordinate {second:?}"))?;
        let first = first / 1_000_000.0;
        let second = second / 1_000_000.0;
        // Expected source order is (lon, lat). If the first value is larger,
        // the pair already arrived as (lat, lon); valid only near German
        // territory.
        if first > second {
            warn!(
                stop_id,
                lat = first,
                lon = second,
                "coordinate pair arrived in (lat, lon) order"
            );
            Ok(Some((first, second)))
        } else {
            Ok(Some((second, first)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> CoordNormalizer {
        CoordNormalizer::default()
    }

    #[test]
    fn test_lon_lat_order_is_flipped() {
        let coords = normalizer().normalize(Some("10500000,48500000"), "1").unwrap();
        assert_eq!(coords, Some((48.5, 10.5)));
    }

    #[test]
    fn test_lat_lon_order_is_kept_with_warning() {
        let coords = normalizer().normalize(Some("48500000,10500000"), "1").unwrap();
        assert_eq!(coords, Some((48.5, 10.5)));
    }

    #[test]
    fn test_equal_values_pass_through() {
        let coords = normalizer().normalize(Some("9000000,9000000"), "1").unwrap();
        assert_eq!(coords, Some((9.0, 9.0)));
    }

    #[test]
    fn test_absent_input() {
        assert_eq!(normalizer().normalize(None, "1").unwrap(), None);
        assert_eq!(normalizer().normalize(Some(""), "1").unwrap(), None);
    }

    #[test]
    fn test_unparseable_pair_is_an_error() {
        assert!(normalizer().normalize(Some("10500000"), "1").is_err());
        assert!(normalizer().normalize(Some("a,b"), "1").is_err());
    }

    #[test]
    fn test_override_takes_precedence() {
        let fixed = HashMap::from([("4071".to_string(), (48.59, 8.87))]);
        let normalizer = CoordNormalizer::new(fixed);
        let coords = normalizer.normalize(Some("10500000,48500000"), "4071").unwrap();
        assert_eq!(coords, Some((48.59, 8.87)));
        // Other stops still decode normally.
        let coords = normalizer.normalize(Some("10500000,48500000"), "1").unwrap();
        assert_eq!(coords, Some((48.5, 10.5)));
    }
}
