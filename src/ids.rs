//! Reconciliation of the three stop identifier levels the EFA API returns.
//!
//! A stop record may carry a fully qualified platform-level `pointGid`
//! (`de:08111:4071:0:1`), a less specific `gid` (`de:08111:4071`), or only a
//! generic numeric id. Snapshots disagree about which of these is present,
//! and some instances return a `pointGid` that contradicts the `gid`. The
//! [`IdReconciler`] settles on one stable identifier per physical platform
//! that is consistent across snapshot files.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::model::StopRef;

/// How a stable stop id was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdOutcome {
    /// A qualified identifier (`pointGid` or `gid`) was usable directly.
    Qualified,
    /// The `pointGid`/`gid` pair was corrupted but a manual override table
    /// entry reconstructed a qualified identifier.
    QualifiedViaOverride,
    /// No qualified identifier was available, or the pair was corrupted but
    /// the plain id was proven good by an earlier consistent resolution.
    PlainFallback,
    /// Corrupted pair with no remedy; fell back to the plain id with a warning.
    Warned,
}

/// A resolved stable stop id plus its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedId {
    pub id: String,
    pub outcome: IdOutcome,
}

/// A stable id is platform-qualified once it contains colon-separated parts.
pub fn is_qualified(id: &str) -> bool {
    id.contains(':')
}

/// Derives stable cross-snapshot stop identifiers, remembering which plain
/// ids have already resolved cleanly so corrupted later sightings can reuse
/// them.
#[derive(Debug, Default)]
pub struct IdReconciler {
    /// Known-bad `pointGid` prefix, mapped to the corrected `gid` prefix.
    gid_prefix_overrides: HashMap<String, String>,
    /// Plain ids that have resolved consistently at least once.
    known_good: HashSet<String>,
}

impl IdReconciler {
    pub fn new(gid_prefix_overrides: HashMap<String, String>) -> Self {
        Self {
            gid_prefix_overrides,
            known_good: HashSet::new(),
        }
    }

    /// Resolves the stable id for one stop record.
    ///
    /// Priority: `pointGid`, then `gid`, then the plain id. When both
    /// qualified identifiers are present the `pointGid` must start with the
    /// `gid`; a mismatch marks the record as corrupted and goes through the
    /// remediation path.
    pub fn resolve(&mut self, stop: &StopRef) -> ResolvedId {
        match (stop.point_gid.as_deref(), stop.gid.as_deref()) {
            (Some(point_gid), Some(gid)) => {
                if point_gid.starts_with(gid) {
                    self.known_good.insert(stop.id.clone());
                    ResolvedId {
                        id: point_gid.to_string(),
                        outcome: IdOutcome::Qualified,
                    }
                } else {
                    self.remediate(stop, point_gid, gid)
                }
            }
            (Some(point_gid), None) => ResolvedId {
                id: point_gid.to_string(),
                outcome: IdOutcome::Qualified,
            },
            (None, Some(gid)) => ResolvedId {
                id: gid.to_string(),
                outcome: IdOutcome::Qualified,
            },
            (None, None) => ResolvedId {
                id: stop.id.clone(),
                outcome: IdOutcome::PlainFallback,
            },
        }
    }

    fn remediate(&self, stop: &StopRef, point_gid: &str, gid: &str) -> ResolvedId {
        if let Some((prefix, area, platform)) = split_qualified(point_gid) {
            if self.gid_prefix_overrides.get(prefix).map(String::as_str) == Some(gid) {
                return ResolvedId {
                    id: format!("{gid}:{area}:{platform}"),
                    outcome: IdOutcome::QualifiedViaOverride,
                };
            }
        }
        if self.known_good.contains(&stop.id) {
            return ResolvedId {
                id: stop.id.clone(),
                outcome: IdOutcome::PlainFallback,
            };
        }
        warn!(
            point_gid,
            gid,
            stop_id = %stop.id,
            "pointGid does not start with gid, falling back to plain id"
        );
        ResolvedId {
            id: stop.id.clone(),
            outcome: IdOutcome::Warned,
        }
    }
}

/// Splits a qualified id into `(prefix, area, platform)` at the last two
/// colons. `de:08111:4071:0:1` becomes `("de:08111:4071", "0", "1")`.
fn split_qualified(point_gid: &str) -> Option<(&str, &str, &str)> {
    let mut parts = point_gid.rsplitn(3, ':');
    let platform = parts.next()?;
    let area = parts.next()?;
    let prefix = parts.next().filter(|p| !p.is_empty())?;
    Some((prefix, area, platform))
}
