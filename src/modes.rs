//! Fixed mapping from EFA `motType` codes to GTFS extended route types and
//! display colors.
//!
//! The table is part of the data contract with downstream GTFS consumers and
//! must not be changed without coordinating with them. See
//! <https://developers.google.com/transit/gtfs/reference/extended-route-types>.

/// GTFS route type and colors for one EFA mode-of-transport code.
#[derive(Debug, PartialEq, Eq)]
pub struct ModeInfo {
    pub route_type: &'static str,
    pub route_color: &'static str,
    pub route_text_color: &'static str,
}

/// Extended route type for dial-a-ride / demand-and-response service.
pub const ON_DEMAND_ROUTE_TYPE: &str = "715";

const fn mode(route_type: &'static str, color: &'static str, text: &'static str) -> ModeInfo {
    ModeInfo {
        route_type,
        route_color: color,
        route_text_color: text,
    }
}

/// Indexed by `motType`; codes 0..=19.
static MODE_TABLE: [ModeInfo; 20] = [
    mode("100", "8f908f", "FFFFFF"),  // 0: train
    mode("109", "83b23b", "FFFFFF"),  // 1: S-Bahn (suburban railway)
    mode("402", "004DFF", "FFFFFF"),  // 2: U-Bahn (underground)
    mode("403", "004DFF", "FFFFFF"),  // 3: Stadtbahn; runs under and above ground, so urban railway rather than 402
    mode("900", "004DFF", "FFFFFF"),  // 4: tram
    mode("704", "FF0000", "FFFFFF"),  // 5: city bus
    mode("701", "FF0000", "FFFFFF"),  // 6: regional bus
    mode("702", "19ffff", "000000"),  // 7: express bus
    mode("116", "83b23b", "FFFFFF"),  // 8: rack railway / funicular
    mode("1000", "0000FF", "FFFFFF"), // 9: ferry
    mode("715", "FF0000", "FFFFFF"),  // 10: AST / Rufbus (demand and response)
    mode("715", "FF0000", "FFFFFF"),  // 11: also demand and response
    mode("1100", "8f908f", "FFFFFF"), // 12: air service
    mode("106", "8f908f", "FFFFFF"),  // 13: regional rail
    mode("102", "8f908f", "FFFFFF"),  // 14: long-distance rail
    mode("102", "8f908f", "FFFFFF"),  // 15: long-distance rail
    mode("102", "8f908f", "FFFFFF"),  // 16: long-distance rail
    mode("714", "8f908f", "FFFFFF"),  // 17: rail replacement bus
    mode("108", "8f908f", "FFFFFF"),  // 18: rail shuttle
    mode("707", "8f908f", "FFFFFF"),  // 19: Buergerbus (special needs, no better match)
];

/// Looks up route type and colors for an EFA mode code.
///
/// Returns `None` for codes outside the table; callers treat that as a fatal
/// condition for the file being processed, since it signals an unmodeled
/// input shape.
pub fn lookup(code: u32) -> Option<&'static ModeInfo> {
    MODE_TABLE.get(code as usize)
}
