use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::RouteSpec;
use crate::pipeline::{AssembledRoute, RouteOutcome};

/// One row of the run summary: what happened to a single route.
#[derive(Debug, Default, Serialize)]
pub struct RouteStats {
    pub timestamp: DateTime<Utc>,
    pub relation_id: String,
    pub route_name: Option<String>,
    pub mode: Option<String>,

    // geometry
    pub strategy: Option<String>,
    pub way_fragments: usize,
    pub dropped_members: usize,
    pub continuity_warnings: usize,
    pub coordinates: usize,
    pub length_m: f64,

    // stops
    pub real_stops: usize,
    pub virtual_stops: usize,
    pub virtual_ratio: f64,

    pub attempts: u32,

    // error tracking
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl RouteStats {
    pub fn from_route(route: &AssembledRoute, attempts: u32) -> Self {
        RouteStats {
            timestamp: Utc::now(),
            relation_id: route.relation_id.to_string(),
            route_name: Some(route.name.clone()),
            mode: Some(route.mode.to_string()),
            strategy: Some(route.strategy.to_string()),
            way_fragments: route.way_fragments,
            dropped_members: route.dropped_members,
            continuity_warnings: route.continuity_warnings.len(),
            coordinates: route.route.len(),
            length_m: route.route.length_m(),
            real_stops: route.real_stops,
            virtual_stops: route.virtual_stops(),
            virtual_ratio: virtual_ratio(route.real_stops, route.virtual_stops()),
            attempts,
            error_type: None,
            error_message: None,
        }
    }

    /// Create an error record with timestamp and error information
    pub fn from_error(error_type: &str, error_message: &str) -> Self {
        RouteStats {
            timestamp: Utc::now(),
            error_type: Some(error_type.to_string()),
            error_message: Some(error_message.to_string()),
            ..Default::default()
        }
    }

    pub fn from_outcome(spec: &RouteSpec, outcome: &RouteOutcome) -> Self {
        let stats = match outcome {
            RouteOutcome::Succeeded { route, attempts } => Self::from_route(route, *attempts),
            RouteOutcome::FailedAfterRetries { attempts, error } => RouteStats {
                attempts: *attempts,
                ..Self::from_error(error.kind(), &error.to_string())
            },
            RouteOutcome::Fatal { error } => Self::from_error(error.kind(), &error.to_string()),
        };
        stats.with_route_info(spec)
    }

    /// Fill in route metadata from the configuration entry
    pub fn with_route_info(mut self, spec: &RouteSpec) -> Self {
        self.relation_id = spec.relation_id.clone();
        if self.route_name.is_none() && !spec.name.is_empty() {
            self.route_name = Some(spec.name.clone());
        }
        self.mode = Some(spec.mode.to_string());
        self
    }
}

/// Share of the final stop list that was synthesized.
fn virtual_ratio(real_stops: usize, virtual_stops: usize) -> f64 {
    let total = real_stops + virtual_stops;
    if total == 0 {
        0.0
    } else {
        virtual_stops as f64 / total as f64
    }
}
