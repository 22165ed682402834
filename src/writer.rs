//! CSV serialization of the entity tables and zip bundling.
//!
//! Column layouts come straight from the row structs' field names; the files
//! and their order follow the GTFS reference.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::store::FeedStore;

const FEED_FILES: &[&str] = &[
    "agency.txt",
    "feed_info.txt",
    "routes.txt",
    "trips.txt",
    "calendar.txt",
    "calendar_dates.txt",
    "stops.txt",
    "stop_times.txt",
];

/// Writes the eight GTFS text files to `out_dir` and bundles them into a
/// deflate-compressed zip at `zip_path`.
pub fn export(store: &FeedStore, out_dir: &Path, zip_path: &Path) -> Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;

    write_table(out_dir, "agency.txt", store.agencies.values())?;
    write_table(out_dir, "feed_info.txt", store.feed_info.iter())?;
    write_table(out_dir, "routes.txt", store.routes.values())?;
    write_table(out_dir, "trips.txt", store.trips.values())?;
    write_table(out_dir, "calendar.txt", store.calendar.iter())?;
    write_table(out_dir, "calendar_dates.txt", store.calendar_dates.iter())?;
    write_table(out_dir, "stops.txt", store.stops.values())?;
    write_table(out_dir, "stop_times.txt", store.stop_times.values())?;

    bundle(out_dir, zip_path)?;

    info!(
        zip = %zip_path.display(),
        agencies = store.agencies.len(),
        stops = store.stops.len(),
        routes = store.routes.len(),
        trips = store.trips.len(),
        stop_times = store.stop_times.len(),
        "GTFS feed written"
    );
    Ok(())
}

fn write_table<'a, T: Serialize + 'a>(
    dir: &Path,
    name: &str,
    rows: impl Iterator<Item = &'a T>,
) -> Result<()> {
    let path = dir.join(name);
    let mut writer =
        csv::Writer::from_path(&path).with_context(|| format!("creating {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn bundle(out_dir: &Path, zip_path: &Path) -> Result<()> {
    let file = File::create(zip_path)
        .with_context(|| format!("creating zip file {}", zip_path.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for name in FEED_FILES {
        zip.start_file(*name, options)?;
        let contents = fs::read(out_dir.join(name))?;
        zip.write_all(&contents)?;
    }
    zip.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Stop, StopTime};
    use std::env;

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = env::temp_dir().join(format!("efa2gtfs_{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample_store() -> FeedStore {
        let mut store = FeedStore::new();
        store.cache_stops([Stop {
            stop_id: "de:08115:4073:0:2".to_string(),
            stop_name: "Reinhold-Schick-Platz".to_string(),
            platform_code: "2".to_string(),
            stop_lat: Some(48.59),
            stop_lon: Some(8.86),
            stop_source: "4071_1.json".to_string(),
        }]);
        store.cache_stop_times([StopTime {
            trip_id: "34020-1-5-08:15".to_string(),
            stop_sequence: 1,
            arrival_time: "08:15:00".to_string(),
            departure_time: "08:15:00".to_string(),
            stop_id: "de:08115:4073:0:2".to_string(),
            stop_time_source: "4071_1.json".to_string(),
            pickup_type: 0,
            drop_off_type: 0,
        }]);
        store
    }

    #[test]
    fn test_export_writes_all_files_and_zip() {
        let dir = temp_dir("export");
        let zip_path = dir.join("gtfs.zip");
        export(&sample_store(), &dir, &zip_path).unwrap();

        for name in FEED_FILES {
            assert!(dir.join(name).exists(), "{name} missing");
        }
        assert!(zip_path.exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_stop_table_layout() {
        let dir = temp_dir("layout");
        export(&sample_store(), &dir, &dir.join("gtfs.zip")).unwrap();

        let content = fs::read_to_string(dir.join("stops.txt")).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "stop_id,stop_name,platform_code,stop_lat,stop_lon,stop_source"
        );
        assert_eq!(
            lines.next().unwrap(),
            "de:08115:4073:0:2,Reinhold-Schick-Platz,2,48.59,8.86,4071_1.json"
        );

        let content = fs::read_to_string(dir.join("stop_times.txt")).unwrap();
        assert_eq!(
            content.lines().next().unwrap(),
            "trip_id,stop_sequence,arrival_time,departure_time,stop_id,stop_time_source,pickup_type,drop_off_type"
        );

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_static_calendar_is_written() {
        let dir = temp_dir("calendar");
        export(&FeedStore::new(), &dir, &dir.join("gtfs.zip")).unwrap();

        let content = fs::read_to_string(dir.join("calendar.txt")).unwrap();
        // Header plus the three fixed services.
        assert_eq!(content.lines().count(), 4);
        let content = fs::read_to_string(dir.join("calendar_dates.txt")).unwrap();
        assert_eq!(content.lines().count(), 9);

        fs::remove_dir_all(&dir).unwrap();
    }
}
