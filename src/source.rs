//! Boundary to the upstream OSM data provider.
//!
//! [`RouteSource`] is what the orchestrator fetches from; the Overpass client
//! and the offline directory reader in [`crate::overpass`] implement it.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::geodesy::Coordinate;
use crate::model::RelationMember;

#[derive(Debug, Clone, PartialEq)]
pub struct RelationDescriptor {
    pub id: u64,
    pub members: Vec<RelationMember>,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WayDetails {
    pub id: u64,
    pub geometry: Vec<Coordinate>,
    pub tags: HashMap<String, String>,
}

impl WayDetails {
    /// Display name of the way: its `name` tag, else its `ref`.
    pub fn name(&self) -> Option<&str> {
        self.tags
            .get("name")
            .or_else(|| self.tags.get("ref"))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeDetails {
    pub id: u64,
    pub coord: Coordinate,
    pub tags: HashMap<String, String>,
}

/// Everything fetched for one route relation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteData {
    /// `None` when the provider knows no relation with the requested id.
    pub relation: Option<RelationDescriptor>,
    pub ways: HashMap<u64, WayDetails>,
    pub nodes: HashMap<u64, NodeDetails>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid upstream response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read cached response: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Parse(_) | FetchError::Io(_) => false,
        }
    }
}

#[async_trait]
pub trait RouteSource: Send + Sync {
    async fn fetch_route(&self, relation_id: u64) -> Result<RouteData, FetchError>;
}
