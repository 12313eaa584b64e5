//! Virtual stop synthesis for routes with sparse real stop data.
//!
//! Real stops are placed on the stitched route by projection. Wherever two
//! consecutive real stops are more than [`MAX_SPACING_M`] apart, evenly spaced
//! virtual stops are interpolated between them. Virtual stops that crowd a
//! real stop, or the stop kept just before them, are discarded again.

use std::collections::HashMap;

use tracing::debug;

use crate::geodesy::{Coordinate, distance};
use crate::model::{StitchedRoute, Stop, WayFragment};
use crate::projector::{interpolate, project};

/// Gap between consecutive real stops above which virtual stops are added.
pub const MAX_SPACING_M: f64 = 1000.0;
/// Minimum distance a virtual stop keeps from real stops and from its predecessor.
pub const MIN_SPACING_M: f64 = 250.0;
/// Name given to virtual stops on ways without a name.
pub const UNNAMED_WAY: &str = "Unnamed road";

/// Maps route coordinates to the name of the way they belong to.
///
/// Built once per route from its fragments; the first fragment to mention a
/// coordinate decides its name.
#[derive(Debug, Clone, Default)]
pub struct NameLookup {
    names: HashMap<(u64, u64), String>,
}

impl NameLookup {
    pub fn from_fragments(fragments: &[WayFragment]) -> Self {
        let mut names = HashMap::new();
        for fragment in fragments {
            let name = fragment.name.as_deref().unwrap_or(UNNAMED_WAY);
            for coord in &fragment.coords {
                names
                    .entry(Self::key(*coord))
                    .or_insert_with(|| name.to_string());
            }
        }
        Self { names }
    }

    pub fn name_at(&self, coord: Coordinate) -> &str {
        self.names
            .get(&Self::key(coord))
            .map(String::as_str)
            .unwrap_or(UNNAMED_WAY)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn key(coord: Coordinate) -> (u64, u64) {
        (coord.lon.to_bits(), coord.lat.to_bits())
    }
}

/// A stop together with its position along the route.
#[derive(Debug, Clone)]
struct Placed {
    position: f64,
    stop: Stop,
}

/// Adds virtual stops to `real_stops` along `route`, naming them after the
/// ways in `fragments`.
pub fn synthesize(route: &StitchedRoute, real_stops: &[Stop], fragments: &[WayFragment]) -> Vec<Stop> {
    let names = NameLookup::from_fragments(fragments);
    synthesize_with_names(route, real_stops, &names)
}

/// Same as [`synthesize`] with a prebuilt name lookup.
///
/// The result is ordered along the route and contains every real stop.
/// With fewer than two real stops, or a route too short to project onto,
/// the real stops are returned unchanged.
pub fn synthesize_with_names(
    route: &StitchedRoute,
    real_stops: &[Stop],
    names: &NameLookup,
) -> Vec<Stop> {
    let line = route.coords();
    if line.len() < 2 || real_stops.len() < 2 {
        return real_stops.to_vec();
    }

    let reals: Vec<Placed> = real_stops
        .iter()
        .map(|stop| Placed {
            position: project(stop.coord, line).map_or(0.0, |p| p.fractional_index),
            stop: stop.clone(),
        })
        .collect();

    let mut by_position = reals.clone();
    by_position.sort_by(|a, b| a.position.total_cmp(&b.position));

    let mut candidates = Vec::new();
    for pair in by_position.windows(2) {
        let (from, to) = (&pair[0], &pair[1]);
        let gap_m = distance(from.stop.coord, to.stop.coord);
        if gap_m <= MAX_SPACING_M {
            continue;
        }

        // The last target falls on `to` and is removed by the real-stop filter.
        let n = (gap_m / MAX_SPACING_M).floor() as usize;
        let step = (to.position - from.position) / n as f64;
        for k in 1..=n {
            let position = from.position + step * k as f64;
            let Some(coord) = interpolate(line, position) else {
                continue;
            };
            let vertex = line[(position.floor() as usize).min(line.len() - 1)];
            candidates.push(Placed {
                position,
                stop: Stop::virtual_at(coord, names.name_at(vertex)),
            });
        }
    }

    let generated = candidates.len();
    candidates.retain(|candidate| {
        real_stops
            .iter()
            .all(|real| distance(real.coord, candidate.stop.coord) >= MIN_SPACING_M)
    });
    debug!(
        generated,
        kept = candidates.len(),
        "Virtual stop candidates filtered against real stops"
    );

    let mut merged = reals;
    merged.extend(candidates);
    merged.sort_by(|a, b| a.position.total_cmp(&b.position));

    let mut kept: Vec<Placed> = Vec::with_capacity(merged.len());
    for placed in merged {
        if !placed.stop.is_real {
            let crowded = kept
                .last()
                .is_some_and(|prev| distance(prev.stop.coord, placed.stop.coord) < MIN_SPACING_M);
            if crowded {
                continue;
            }
        }
        kept.push(placed);
    }

    kept.into_iter().map(|p| p.stop).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::EARTH_RADIUS_M;
    use crate::model::StopRole;

    /// Degrees of longitude spanning `metres` along the equator.
    fn deg(metres: f64) -> f64 {
        metres / EARTH_RADIUS_M.to_radians()
    }

    fn vertex(i: usize) -> Coordinate {
        Coordinate::new(i as f64 * deg(500.0001), 0.0)
    }

    /// Eleven vertices along the equator, 500 m apart: 5 km end to end.
    fn straight_route() -> (StitchedRoute, Vec<WayFragment>) {
        let coords: Vec<Coordinate> = (0..=10).map(vertex).collect();
        let fragments = vec![
            WayFragment::new(1, Some("Jalan A".into()), coords[..=5].to_vec()),
            WayFragment::new(2, Some("Jalan B".into()), coords[5..].to_vec()),
        ];
        (StitchedRoute::from(coords), fragments)
    }

    fn real(id: &str, coord: Coordinate) -> Stop {
        Stop::real(id, coord, format!("Halte {id}"), StopRole::Stop)
    }

    fn ends_of(line: &[Coordinate]) -> Vec<Stop> {
        vec![real("a", line[0]), real("b", line[line.len() - 1])]
    }

    #[test]
    fn test_four_virtual_stops_on_five_kilometres() {
        let (route, fragments) = straight_route();
        assert!((route.length_m() - 5000.0).abs() < 0.01);
        let stops = ends_of(route.coords());

        let out = synthesize(&route, &stops, &fragments);

        assert_eq!(out.len(), 6);
        assert_eq!(out.first(), Some(&stops[0]));
        assert_eq!(out.last(), Some(&stops[1]));

        let virtuals: Vec<&Stop> = out.iter().filter(|s| !s.is_real).collect();
        assert_eq!(virtuals.len(), 4);
        for v in &virtuals {
            assert_eq!(v.role, StopRole::Virtual);
            for r in &stops {
                assert!(distance(v.coord, r.coord) >= MIN_SPACING_M);
            }
        }
        for pair in out.windows(2) {
            let gap = distance(pair[0].coord, pair[1].coord);
            assert!((gap - 1000.0).abs() < 0.01, "gap {gap}");
        }
    }

    #[test]
    fn test_virtual_stops_take_way_names() {
        let (route, fragments) = straight_route();
        let stops = ends_of(route.coords());

        let names: Vec<String> = synthesize(&route, &stops, &fragments)
            .into_iter()
            .filter(|s| !s.is_real)
            .map(|s| s.name)
            .collect();

        assert_eq!(names, vec!["Jalan A", "Jalan A", "Jalan B", "Jalan B"]);
    }

    #[test]
    fn test_single_real_stop_is_returned_alone() {
        let (route, fragments) = straight_route();
        let stops = vec![real("a", vertex(0))];
        assert_eq!(synthesize(&route, &stops, &fragments), stops);
    }

    #[test]
    fn test_no_real_stops_yields_nothing() {
        let (route, fragments) = straight_route();
        assert!(synthesize(&route, &[], &fragments).is_empty());
    }

    #[test]
    fn test_short_gap_adds_nothing() {
        let (route, fragments) = straight_route();
        let stops = vec![real("a", vertex(0)), real("b", vertex(1))];
        assert_eq!(synthesize(&route, &stops, &fragments), stops);
    }

    #[test]
    fn test_gap_of_exactly_max_spacing_adds_nothing() {
        let line = vec![Coordinate::new(0.0, 0.0), Coordinate::new(deg(MAX_SPACING_M), 0.0)];
        let stops = ends_of(&line);

        let out = synthesize_with_names(&StitchedRoute::from(line), &stops, &NameLookup::default());

        assert_eq!(out, stops);
    }

    #[test]
    fn test_double_max_spacing_gap_gets_one_midpoint_stop() {
        let line = vec![
            Coordinate::new(0.0, 0.0),
            Coordinate::new(deg(2.0 * MAX_SPACING_M + 0.0001), 0.0),
        ];
        let stops = ends_of(&line);
        let gap = distance(stops[0].coord, stops[1].coord);
        assert!(gap >= 2.0 * MAX_SPACING_M && gap < 2.0 * MAX_SPACING_M + 0.001);

        let out = synthesize_with_names(&StitchedRoute::from(line), &stops, &NameLookup::default());

        assert_eq!(out.len(), 3);
        assert!(!out[1].is_real);
        assert!((distance(stops[0].coord, out[1].coord) - MAX_SPACING_M).abs() < 0.01);
        assert!((distance(out[1].coord, stops[1].coord) - MAX_SPACING_M).abs() < 0.01);
        assert_eq!(out[1].name, UNNAMED_WAY);
    }

    #[test]
    fn test_output_follows_route_order() {
        let (route, fragments) = straight_route();
        // Relation lists the far stop first.
        let stops = vec![real("b", vertex(10)), real("a", vertex(0))];

        let out = synthesize(&route, &stops, &fragments);

        assert_eq!(out.first().map(|s| s.id.as_str()), Some("a"));
        assert_eq!(out.last().map(|s| s.id.as_str()), Some("b"));
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let (route, fragments) = straight_route();
        let stops = vec![
            real("a", vertex(0)),
            real("b", vertex(3)),
            real("c", vertex(10)),
        ];
        let first = synthesize(&route, &stops, &fragments);
        let second = synthesize(&route, &stops, &fragments);
        assert_eq!(first, second);
    }

    /// Out along the equator, 200 m north, then back west.
    fn out_and_back() -> StitchedRoute {
        let lat = 0.0018;
        StitchedRoute::from(vec![
            Coordinate::new(0.0, 0.0),
            Coordinate::new(0.006, 0.0),
            Coordinate::new(0.012, 0.0),
            Coordinate::new(0.018, 0.0),
            Coordinate::new(0.024, 0.0),
            Coordinate::new(0.024, lat),
            Coordinate::new(0.018, lat),
            Coordinate::new(0.012, lat),
            Coordinate::new(0.006, lat),
            Coordinate::new(0.0, lat),
        ])
    }

    #[test]
    fn test_virtual_stop_near_real_stop_is_dropped() {
        let route = out_and_back();
        let stops = vec![
            real("a", Coordinate::new(0.0, 0.0)),
            real("b", Coordinate::new(0.024, 0.0)),
            real("c", Coordinate::new(0.012, 0.0018)),
            real("d", Coordinate::new(0.0, 0.0018)),
        ];

        let out = synthesize_with_names(&route, &stops, &NameLookup::default());

        // The only outbound candidate, at (0.012, 0), sits 200 m from stop c.
        assert!(
            !out.iter()
                .any(|s| !s.is_real && s.coord == Coordinate::new(0.012, 0.0))
        );
        assert_eq!(out, stops);
    }

    #[test]
    fn test_consecutive_spacing_guarantee() {
        let route = out_and_back();
        let stops = vec![
            real("a", Coordinate::new(0.0, 0.0)),
            real("b", Coordinate::new(0.0181, 0.0001)),
            real("c", Coordinate::new(0.024, 0.0018)),
            real("d", Coordinate::new(0.0, 0.0018)),
        ];

        let out = synthesize_with_names(&route, &stops, &NameLookup::default());

        for r in &stops {
            assert!(out.contains(r));
        }
        assert!(out.iter().any(|s| !s.is_real));
        for pair in out.windows(2) {
            if pair[0].is_real && pair[1].is_real {
                continue;
            }
            assert!(distance(pair[0].coord, pair[1].coord) >= MIN_SPACING_M);
        }
    }

    #[test]
    fn test_name_lookup_first_writer_wins() {
        let shared = Coordinate::new(1.0, 1.0);
        let fragments = vec![
            WayFragment::new(1, None, vec![Coordinate::new(0.0, 1.0), shared]),
            WayFragment::new(2, Some("Jalan Dago".into()), vec![shared, Coordinate::new(2.0, 1.0)]),
        ];
        let names = NameLookup::from_fragments(&fragments);
        assert_eq!(names.len(), 3);
        assert_eq!(names.name_at(shared), UNNAMED_WAY);
        assert_eq!(names.name_at(Coordinate::new(2.0, 1.0)), "Jalan Dago");
        assert_eq!(names.name_at(Coordinate::new(9.0, 9.0)), UNNAMED_WAY);
    }
}
