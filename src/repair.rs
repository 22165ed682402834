//! Chronological repair of a trip's stop-time sequence.
//!
//! A few routes report their stop sequences out of order across snapshots.
//! For those, the extracted rows are re-sorted into non-decreasing time
//! order before sequence numbers are assigned.

use crate::store::StopTime;

/// Reorders `rows` so that times never decrease along the trip.
///
/// Times are zero-padded `HH:MM:SS` strings with post-midnight hours encoded
/// beyond 23, so lexicographic comparison equals chronological comparison.
///
/// The rule is a stable partial reordering: a row whose arrival is not before
/// the maximum departure placed so far is appended; an out-of-sequence row is
/// inserted before the first placed row whose time window lies after it.
/// Rows with equal times keep their original relative order. Sequence
/// numbers are untouched; the caller renumbers.
pub fn repair_order(rows: Vec<StopTime>) -> Vec<StopTime> {
    let mut ordered: Vec<StopTime> = Vec::with_capacity(rows.len());
    let mut max_departure: Option<String> = None;

    for row in rows {
        let in_sequence = max_departure
            .as_deref()
            .is_none_or(|max| row.arrival_time.as_str() >= max);
        if in_sequence {
            max_departure = Some(row.departure_time.clone());
            ordered.push(row);
        } else {
            let idx = insertion_index(&ordered, &row);
            ordered.insert(idx, row);
        }
    }
    ordered
}

/// First position whose row lies after the new row's time window; the end of
/// the sequence when every placed row overlaps or precedes it.
fn insertion_index(ordered: &[StopTime], row: &StopTime) -> usize {
    ordered
        .iter()
        .position(|placed| {
            placed.arrival_time > row.departure_time || placed.departure_time > row.arrival_time
        })
        .unwrap_or(ordered.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(seq: u32, arrival: &str, departure: &str) -> StopTime {
        StopTime {
            trip_id: "t".to_string(),
            stop_sequence: seq,
            arrival_time: format!("{arrival}:00"),
            departure_time: format!("{departure}:00"),
            stop_id: format!("s{seq}"),
            stop_time_source: String::new(),
            pickup_type: 0,
            drop_off_type: 0,
        }
    }

    fn arrivals(rows: &[StopTime]) -> Vec<&str> {
        rows.iter().map(|r| r.arrival_time.as_str()).collect()
    }

    #[test]
    fn test_in_order_input_is_unchanged() {
        let rows = vec![row(1, "08:00", "08:00"), row(2, "08:10", "08:10")];
        let repaired = repair_order(rows);
        assert_eq!(arrivals(&repaired), vec!["08:00:00", "08:10:00"]);
    }

    #[test]
    fn test_out_of_sequence_row_moves_forward() {
        let rows = vec![
            row(1, "08:10", "08:10"),
            row(2, "08:05", "08:05"),
            row(3, "08:20", "08:20"),
        ];
        let repaired = repair_order(rows);
        assert_eq!(arrivals(&repaired), vec!["08:05:00", "08:10:00", "08:20:00"]);
        // Original sequence numbers are preserved until the caller renumbers.
        assert_eq!(repaired[0].stop_sequence, 2);
    }

    #[test]
    fn test_equal_times_keep_relative_order() {
        let rows = vec![
            row(1, "08:10", "08:10"),
            row(2, "08:00", "08:00"),
            row(3, "08:00", "08:00"),
        ];
        let repaired = repair_order(rows);
        assert_eq!(
            repaired.iter().map(|r| r.stop_sequence).collect::<Vec<_>>(),
            vec![2, 3, 1]
        );
    }

    #[test]
    fn test_post_midnight_hours_compare_chronologically() {
        let rows = vec![
            row(1, "25:10", "25:10"),
            row(2, "24:50", "24:50"),
            row(3, "26:00", "26:00"),
        ];
        let repaired = repair_order(rows);
        assert_eq!(arrivals(&repaired), vec!["24:50:00", "25:10:00", "26:00:00"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(repair_order(Vec::new()).is_empty());
    }
}
