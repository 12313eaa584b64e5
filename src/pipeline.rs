//! Per-route assembly: fetch, stitch, place stops.
//!
//! [`assemble_route`] is the pure part working on already fetched data.
//! [`process_route`] wraps fetching and assembly in a bounded retry loop and
//! reports a [`RouteOutcome`] so the caller can move on to the next route.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{RouteSpec, TransitMode};
use crate::model::{MemberKind, Stop, StitchedRoute, StopRole, WayFragment};
use crate::source::{FetchError, RelationDescriptor, RouteData, RouteSource};
use crate::stitch::{ContinuityWarning, StitchStrategy, stitch};
use crate::synthesize::{NameLookup, synthesize_with_names};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid relation id '{0}'")]
    InvalidRelationId(String),
    #[error("relation {0} not found")]
    RelationNotFound(u64),
    #[error("relation {0} has no usable way members")]
    NoWayMembers(u64),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl RouteError {
    /// Errors that no amount of retrying can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RouteError::InvalidRelationId(_))
    }

    /// Short machine-readable label, used in the run summary.
    pub fn kind(&self) -> &'static str {
        match self {
            RouteError::InvalidRelationId(_) => "invalid_relation_id",
            RouteError::RelationNotFound(_) => "relation_not_found",
            RouteError::NoWayMembers(_) => "no_way_members",
            RouteError::Fetch(_) => "fetch_error",
        }
    }
}

/// Geometry and stop sequence of one route, ready to be written out.
#[derive(Debug, Clone)]
pub struct AssembledRoute {
    pub relation_id: u64,
    pub name: String,
    pub mode: TransitMode,
    pub route: StitchedRoute,
    pub stops: Vec<Stop>,
    pub strategy: StitchStrategy,
    pub continuity_warnings: Vec<ContinuityWarning>,
    pub way_fragments: usize,
    /// Way or stop members referenced by the relation but unusable.
    pub dropped_members: usize,
    pub real_stops: usize,
}

impl AssembledRoute {
    pub fn virtual_stops(&self) -> usize {
        self.stops.iter().filter(|s| !s.is_real).count()
    }
}

#[derive(Debug)]
pub enum RouteOutcome {
    Succeeded { route: AssembledRoute, attempts: u32 },
    FailedAfterRetries { attempts: u32, error: RouteError },
    Fatal { error: RouteError },
}

impl RouteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RouteOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub strategy: StitchStrategy,
    /// Attempts per route, including the first.
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            strategy: StitchStrategy::Auto,
            attempts: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Resolves the relation's way members, in member order, into fragments.
///
/// Platform ways are not part of the path and are ignored. Returns the
/// fragments and the number of members dropped.
fn way_fragments(relation: &RelationDescriptor, data: &RouteData) -> (Vec<WayFragment>, usize) {
    let mut fragments = Vec::new();
    let mut dropped = 0;

    for member in relation
        .members
        .iter()
        .filter(|m| m.kind == MemberKind::Way && !m.is_platform())
    {
        match data.ways.get(&member.id) {
            None => {
                warn!(way_id = member.id, "Way member missing from fetched data, dropping");
                dropped += 1;
            }
            Some(way) if way.geometry.len() < 2 => {
                warn!(
                    way_id = member.id,
                    points = way.geometry.len(),
                    "Way member has no usable geometry, dropping"
                );
                dropped += 1;
            }
            Some(way) => fragments.push(WayFragment::new(
                way.id,
                way.name().map(str::to_string),
                way.geometry.clone(),
            )),
        }
    }

    (fragments, dropped)
}

/// Resolves the relation's stop nodes, in member order.
fn real_stops(relation: &RelationDescriptor, data: &RouteData) -> (Vec<Stop>, usize) {
    let mut stops = Vec::new();
    let mut dropped = 0;

    for member in relation.members.iter().filter(|m| m.kind == MemberKind::Node) {
        let Some(role) = StopRole::from_member_role(&member.role) else {
            continue;
        };
        match data.nodes.get(&member.id) {
            None => {
                warn!(node_id = member.id, "Stop member missing from fetched data, dropping");
                dropped += 1;
            }
            Some(node) => {
                let name = node
                    .tags
                    .get("name")
                    .cloned()
                    .unwrap_or_else(|| format!("Stop {}", node.id));
                stops.push(Stop::real(node.id.to_string(), node.coord, name, role));
            }
        }
    }

    (stops, dropped)
}

/// Builds the route geometry and stop sequence from fetched data.
pub fn assemble_route(
    data: &RouteData,
    spec: &RouteSpec,
    relation_id: u64,
    strategy: StitchStrategy,
) -> Result<AssembledRoute, RouteError> {
    let relation = data
        .relation
        .as_ref()
        .ok_or(RouteError::RelationNotFound(relation_id))?;

    let (fragments, dropped_ways) = way_fragments(relation, data);
    if fragments.is_empty() {
        return Err(RouteError::NoWayMembers(relation_id));
    }
    let (stops, dropped_stops) = real_stops(relation, data);

    let stitched = stitch(&fragments, strategy);
    debug!(
        strategy = %stitched.strategy,
        fragments = fragments.len(),
        coordinates = stitched.route.len(),
        warnings = stitched.warnings.len(),
        "Ways stitched"
    );

    let real_count = stops.len();
    let stops = if spec.mode.synthesizes_virtual_stops() {
        let names = NameLookup::from_fragments(&fragments);
        synthesize_with_names(&stitched.route, &stops, &names)
    } else {
        stops
    };

    let name = if spec.name.is_empty() {
        relation
            .tags
            .get("name")
            .cloned()
            .unwrap_or_else(|| format!("Route {relation_id}"))
    } else {
        spec.name.clone()
    };

    Ok(AssembledRoute {
        relation_id,
        name,
        mode: spec.mode,
        route: stitched.route,
        stops,
        strategy: stitched.strategy,
        continuity_warnings: stitched.warnings,
        way_fragments: fragments.len(),
        dropped_members: dropped_ways + dropped_stops,
        real_stops: real_count,
    })
}

/// Fetches and assembles one route, retrying the whole pipeline up to
/// `options.attempts` times.
#[tracing::instrument(skip_all, fields(relation_id = %spec.relation_id, name = %spec.name))]
pub async fn process_route<S: RouteSource + ?Sized>(
    source: &S,
    spec: &RouteSpec,
    options: &PipelineOptions,
) -> RouteOutcome {
    let Ok(relation_id) = spec.parse_relation_id() else {
        let error = RouteError::InvalidRelationId(spec.relation_id.clone());
        error!(error = %error, "Route configuration is unusable");
        return RouteOutcome::Fatal { error };
    };

    let max_attempts = options.attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match source.fetch_route(relation_id).await {
            Ok(data) => assemble_route(&data, spec, relation_id, options.strategy),
            Err(e) => Err(RouteError::from(e)),
        };

        match result {
            Ok(route) => {
                info!(
                    attempt,
                    coordinates = route.route.len(),
                    stops = route.stops.len(),
                    virtual_stops = route.virtual_stops(),
                    continuity_warnings = route.continuity_warnings.len(),
                    "Route assembled"
                );
                return RouteOutcome::Succeeded {
                    route,
                    attempts: attempt,
                };
            }
            Err(error) if error.is_fatal() => {
                error!(error = %error, "Route failed permanently");
                return RouteOutcome::Fatal { error };
            }
            Err(error) if attempt >= max_attempts => {
                error!(attempts = attempt, error = %error, "Route failed, giving up");
                return RouteOutcome::FailedAfterRetries {
                    attempts: attempt,
                    error,
                };
            }
            Err(error) => {
                warn!(
                    attempt,
                    max_attempts,
                    error = %error,
                    "Route failed, retrying"
                );
                tokio::time::sleep(options.retry_delay).await;
            }
        }
    }
}
