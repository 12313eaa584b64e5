//! Reconstructs one continuous line of travel from a relation's way members.
//!
//! Relation member order is the primary ordering signal: [`MemberOrderStitcher`]
//! walks the fragments in the order given and only fixes orientation.
//! [`EndpointGraphStitcher`] ignores member order beyond picking the seed and
//! greedily follows shared endpoints, for relations whose member list is known
//! to be shuffled. [`StitchStrategy::Auto`] picks between them with a cheap
//! endpoint check before stitching.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::geodesy::{Coordinate, distance};
use crate::model::{StitchedRoute, WayFragment};

/// Maximum per-axis difference, in degrees, for two endpoints to count as shared.
pub const ENDPOINT_TOLERANCE_DEG: f64 = 1e-6;

/// A fragment that did not connect to the line accumulated before it.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuityWarning {
    pub way_id: u64,
    /// Index of the fragment in the input slice.
    pub position: usize,
    /// Distance from the accumulated end to the nearer endpoint of the fragment.
    pub gap_m: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StitchResult {
    pub route: StitchedRoute,
    pub warnings: Vec<ContinuityWarning>,
    pub strategy: StitchStrategy,
}

pub trait Stitcher {
    fn stitch(&self, fragments: &[WayFragment]) -> StitchResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StitchStrategy {
    #[default]
    Auto,
    MemberOrder,
    EndpointGraph,
}

impl StitchStrategy {
    /// Replaces `Auto` with a concrete strategy for these fragments.
    pub fn resolve(self, fragments: &[WayFragment]) -> StitchStrategy {
        match self {
            StitchStrategy::Auto => {
                let defects = member_order_defects(fragments);
                if defects == 0 {
                    StitchStrategy::MemberOrder
                } else {
                    debug!(defects, "Member order is not continuous, using endpoint graph");
                    StitchStrategy::EndpointGraph
                }
            }
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StitchStrategy::Auto => "auto",
            StitchStrategy::MemberOrder => "member-order",
            StitchStrategy::EndpointGraph => "endpoint-graph",
        }
    }
}

impl fmt::Display for StitchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StitchStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(StitchStrategy::Auto),
            "member-order" => Ok(StitchStrategy::MemberOrder),
            "endpoint-graph" => Ok(StitchStrategy::EndpointGraph),
            other => Err(anyhow::anyhow!(
                "unknown stitch strategy '{other}' (expected auto, member-order or endpoint-graph)"
            )),
        }
    }
}

/// Stitches `fragments` with the given strategy.
pub fn stitch(fragments: &[WayFragment], strategy: StitchStrategy) -> StitchResult {
    match strategy.resolve(fragments) {
        StitchStrategy::EndpointGraph => EndpointGraphStitcher.stitch(fragments),
        _ => MemberOrderStitcher.stitch(fragments),
    }
}

/// Counts fragments that would not connect when walked in member order.
pub fn member_order_defects(fragments: &[WayFragment]) -> usize {
    let mut last: Option<Coordinate> = None;
    let mut defects = 0;

    for fragment in fragments {
        let (Some(first), Some(end)) = (fragment.first(), fragment.last()) else {
            continue;
        };
        last = match last {
            None => Some(end),
            Some(l) if first.approx_eq(&l, ENDPOINT_TOLERANCE_DEG) => Some(end),
            Some(l) if end.approx_eq(&l, ENDPOINT_TOLERANCE_DEG) => Some(first),
            Some(_) => {
                defects += 1;
                Some(end)
            }
        };
    }

    defects
}

fn gap_to(last: Coordinate, fragment: &WayFragment) -> f64 {
    let to_first = fragment.first().map_or(f64::INFINITY, |c| distance(last, c));
    let to_end = fragment.last().map_or(f64::INFINITY, |c| distance(last, c));
    to_first.min(to_end)
}

/// Trusts member order and only corrects the orientation of each fragment.
pub struct MemberOrderStitcher;

impl Stitcher for MemberOrderStitcher {
    fn stitch(&self, fragments: &[WayFragment]) -> StitchResult {
        let mut route = StitchedRoute::new();
        let mut warnings = Vec::new();

        for (position, fragment) in fragments.iter().enumerate() {
            let (Some(first), Some(end)) = (fragment.first(), fragment.last()) else {
                continue;
            };
            let Some(last) = route.last() else {
                route.extend(fragment.coords.iter().copied());
                continue;
            };

            if first.approx_eq(&last, ENDPOINT_TOLERANCE_DEG) {
                route.extend(fragment.coords.iter().skip(1).copied());
            } else if end.approx_eq(&last, ENDPOINT_TOLERANCE_DEG) {
                route.extend(fragment.coords.iter().rev().skip(1).copied());
            } else {
                let gap_m = gap_to(last, fragment);
                warn!(way_id = fragment.id, position, gap_m, "Way does not connect to previous way");
                warnings.push(ContinuityWarning {
                    way_id: fragment.id,
                    position,
                    gap_m,
                });
                route.extend(fragment.coords.iter().copied());
            }
        }

        StitchResult {
            route,
            warnings,
            strategy: StitchStrategy::MemberOrder,
        }
    }
}

/// Fixed-point key so that shared OSM nodes hash identically.
fn coord_key(coord: Coordinate) -> (i64, i64) {
    let scale = 1.0 / ENDPOINT_TOLERANCE_DEG;
    ((coord.lon * scale).round() as i64, (coord.lat * scale).round() as i64)
}

/// Treats fragments as edges of an undirected multigraph keyed by endpoint
/// and walks it from the first member, always taking the lowest-indexed
/// unused edge at the current end.
pub struct EndpointGraphStitcher;

impl Stitcher for EndpointGraphStitcher {
    fn stitch(&self, fragments: &[WayFragment]) -> StitchResult {
        let mut route = StitchedRoute::new();
        let mut warnings = Vec::new();

        let mut endpoints: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        let mut used = vec![false; fragments.len()];

        for (idx, fragment) in fragments.iter().enumerate() {
            let (Some(first), Some(end)) = (fragment.first(), fragment.last()) else {
                used[idx] = true;
                continue;
            };
            endpoints.entry(coord_key(first)).or_default().push(idx);
            if coord_key(end) != coord_key(first) {
                endpoints.entry(coord_key(end)).or_default().push(idx);
            }
        }

        while let Some(next) = next_unused(&used) {
            let connected = route.last().and_then(|last| {
                endpoints
                    .get(&coord_key(last))?
                    .iter()
                    .copied()
                    .filter(|&idx| !used[idx])
                    .min()
            });

            let idx = connected.unwrap_or(next);
            let fragment = &fragments[idx];
            used[idx] = true;

            let Some(last) = route.last() else {
                route.extend(fragment.coords.iter().copied());
                continue;
            };

            if connected.is_some() {
                let starts_here = fragment
                    .first()
                    .is_some_and(|c| coord_key(c) == coord_key(last));
                if starts_here {
                    route.extend(fragment.coords.iter().skip(1).copied());
                } else {
                    route.extend(fragment.coords.iter().rev().skip(1).copied());
                }
                continue;
            }

            // Dead end: jump to the next unused member, oriented to minimise the gap.
            let gap_m = gap_to(last, fragment);
            warn!(way_id = fragment.id, position = idx, gap_m, "No unused way continues the route");
            warnings.push(ContinuityWarning {
                way_id: fragment.id,
                position: idx,
                gap_m,
            });
            let reverse = match (fragment.first(), fragment.last()) {
                (Some(first), Some(end)) => distance(last, end) < distance(last, first),
                _ => false,
            };
            if reverse {
                route.extend(fragment.coords.iter().rev().copied());
            } else {
                route.extend(fragment.coords.iter().copied());
            }
        }

        StitchResult {
            route,
            warnings,
            strategy: StitchStrategy::EndpointGraph,
        }
    }
}

fn next_unused(used: &[bool]) -> Option<usize> {
    used.iter().position(|u| !u)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(id: u64, coords: &[(f64, f64)]) -> WayFragment {
        WayFragment::new(
            id,
            None,
            coords.iter().map(|&(lon, lat)| Coordinate::new(lon, lat)).collect(),
        )
    }

    fn coords(route: &StitchedRoute) -> Vec<(f64, f64)> {
        route.coords().iter().map(|c| (c.lon, c.lat)).collect()
    }

    fn chain() -> Vec<WayFragment> {
        vec![
            frag(1, &[(0.0, 0.0), (0.001, 0.0), (0.002, 0.0)]),
            frag(2, &[(0.002, 0.0), (0.002, 0.001)]),
            frag(3, &[(0.002, 0.001), (0.003, 0.001), (0.004, 0.001), (0.004, 0.002)]),
            frag(4, &[(0.004, 0.002), (0.005, 0.002)]),
        ]
    }

    #[test]
    fn test_reversed_second_fragment() {
        let a = frag(1, &[(0.0, 0.0), (1.0, 0.0)]);
        let b = frag(2, &[(2.0, 0.0), (1.0, 0.0)]);
        let result = stitch(&[a, b], StitchStrategy::MemberOrder);
        assert_eq!(coords(&result.route), vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_connected_chain_length() {
        let fragments = chain();
        let total: usize = fragments.iter().map(|f| f.coords.len()).sum();
        let result = stitch(&fragments, StitchStrategy::MemberOrder);
        assert_eq!(result.route.len(), total - (fragments.len() - 1));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_reversing_any_interior_fragment_is_corrected() {
        let expected = stitch(&chain(), StitchStrategy::MemberOrder).route;
        for i in 1..chain().len() {
            let mut fragments = chain();
            fragments[i].coords.reverse();
            let result = stitch(&fragments, StitchStrategy::MemberOrder);
            assert_eq!(result.route, expected, "reversed fragment {i}");
            assert!(result.warnings.is_empty());
        }
    }

    #[test]
    fn test_endpoint_tolerance_absorbs_rounding() {
        let a = frag(1, &[(0.0, 0.0), (0.001, 0.0)]);
        let b = frag(2, &[(0.0010000005, 0.0), (0.002, 0.0)]);
        let result = stitch(&[a, b], StitchStrategy::MemberOrder);
        assert!(result.warnings.is_empty());
        assert_eq!(result.route.len(), 3);
    }

    #[test]
    fn test_disconnected_fragment_is_flagged_not_dropped() {
        let a = frag(1, &[(0.0, 0.0), (0.001, 0.0)]);
        let b = frag(2, &[(0.01, 0.0), (0.011, 0.0)]);
        let result = stitch(&[a, b], StitchStrategy::MemberOrder);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].way_id, 2);
        assert_eq!(result.warnings[0].position, 1);
        assert!((result.warnings[0].gap_m - 1000.75).abs() < 1.0);
        assert_eq!(result.route.len(), 4);
    }

    #[test]
    fn test_closed_way_is_appended_as_is() {
        let a = frag(1, &[(0.0, 0.0), (0.001, 0.0)]);
        let loop_way = frag(2, &[(0.001, 0.0), (0.002, 0.001), (0.001, 0.0)]);
        let result = stitch(&[a, loop_way], StitchStrategy::MemberOrder);
        assert_eq!(
            coords(&result.route),
            vec![(0.0, 0.0), (0.001, 0.0), (0.002, 0.001), (0.001, 0.0)]
        );
    }

    #[test]
    fn test_member_order_defects() {
        assert_eq!(member_order_defects(&chain()), 0);
        let mut shuffled = chain();
        shuffled.swap(1, 3);
        assert!(member_order_defects(&shuffled) > 0);
    }

    #[test]
    fn test_endpoint_graph_recovers_shuffled_order() {
        let expected = stitch(&chain(), StitchStrategy::MemberOrder).route;

        let mut shuffled = chain();
        shuffled.swap(1, 3);
        shuffled[2].coords.reverse();

        let result = stitch(&shuffled, StitchStrategy::EndpointGraph);
        assert_eq!(result.strategy, StitchStrategy::EndpointGraph);
        assert!(result.warnings.is_empty());
        assert_eq!(result.route, expected);
    }

    #[test]
    fn test_endpoint_graph_flags_dead_end_and_continues() {
        let a = frag(1, &[(0.0, 0.0), (0.001, 0.0)]);
        let b = frag(2, &[(0.011, 0.0), (0.01, 0.0)]);
        let result = stitch(&[a, b], StitchStrategy::EndpointGraph);
        assert_eq!(result.warnings.len(), 1);
        // Oriented so the nearer endpoint comes first.
        assert_eq!(
            coords(&result.route),
            vec![(0.0, 0.0), (0.001, 0.0), (0.01, 0.0), (0.011, 0.0)]
        );
    }

    #[test]
    fn test_auto_resolution() {
        assert_eq!(
            StitchStrategy::Auto.resolve(&chain()),
            StitchStrategy::MemberOrder
        );
        let mut shuffled = chain();
        shuffled.swap(1, 3);
        assert_eq!(
            StitchStrategy::Auto.resolve(&shuffled),
            StitchStrategy::EndpointGraph
        );
        let result = stitch(&shuffled, StitchStrategy::Auto);
        assert_eq!(result.strategy, StitchStrategy::EndpointGraph);
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            "endpoint-graph".parse::<StitchStrategy>().unwrap(),
            StitchStrategy::EndpointGraph
        );
        assert!("graph".parse::<StitchStrategy>().is_err());
    }

    #[test]
    fn test_empty_input() {
        let result = stitch(&[], StitchStrategy::Auto);
        assert!(result.route.is_empty());
        assert!(result.warnings.is_empty());
    }
}
