//! Route list configuration.
//!
//! Loaded from a JSON file shaped like:
//! ```json
//! {
//!   "categories": [{
//!     "name": "Angkot Kota Bandung",
//!     "agencyId": "ABD",
//!     "mode": "angkot",
//!     "routeGroups": [{
//!       "groupId": "01A",
//!       "name": "Angkot Kota Bandung 01A",
//!       "color": "#1E90FF",
//!       "type": "fixed",
//!       "routes": [{ "name": "Abdul Muis - Cicaheum", "directionId": 0, "relationId": "12345" }]
//!     }]
//!   }]
//! }
//! ```
//! Only groups of type `fixed` describe routes with a fixed path; the rest
//! are reported as skipped.

use std::fmt;
use std::num::ParseIntError;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitMode {
    Angkot,
    Minibus,
    #[default]
    Bus,
    Brt,
    Train,
    Tram,
    Ferry,
    #[serde(other)]
    Other,
}

impl TransitMode {
    /// Informally operated modes whose relations rarely list every stop.
    pub fn synthesizes_virtual_stops(&self) -> bool {
        matches!(self, TransitMode::Angkot | TransitMode::Minibus)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransitMode::Angkot => "angkot",
            TransitMode::Minibus => "minibus",
            TransitMode::Bus => "bus",
            TransitMode::Brt => "brt",
            TransitMode::Train => "train",
            TransitMode::Tram => "tram",
            TransitMode::Ferry => "ferry",
            TransitMode::Other => "other",
        }
    }
}

impl fmt::Display for TransitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransitMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_value(serde_json::Value::String(s.to_lowercase()))?)
    }
}

/// Relation ids appear both as strings and as numbers in route files.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawRelationId {
    Text(String),
    Number(u64),
}

impl From<RawRelationId> for String {
    fn from(raw: RawRelationId) -> Self {
        match raw {
            RawRelationId::Text(s) => s,
            RawRelationId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteEntry {
    pub name: String,
    #[serde(default)]
    pub direction_id: Option<u8>,
    #[serde(deserialize_with = "relation_id_string")]
    pub relation_id: String,
}

fn relation_id_string<'de, D: serde::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    RawRelationId::deserialize(d).map(String::from)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteGroup {
    pub group_id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
}

impl RouteGroup {
    pub fn is_fixed(&self) -> bool {
        self.kind.as_deref() == Some("fixed")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub agency_id: Option<String>,
    #[serde(default)]
    pub mode: TransitMode,
    #[serde(default)]
    pub route_groups: Vec<RouteGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutesFile {
    pub categories: Vec<Category>,
}

/// One route to process, flattened out of its category and group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSpec {
    pub relation_id: String,
    pub name: String,
    pub mode: TransitMode,
    pub category: String,
    pub group_id: Option<String>,
    pub direction_id: Option<u8>,
}

impl RouteSpec {
    pub fn new(relation_id: impl Into<String>, name: impl Into<String>, mode: TransitMode) -> Self {
        Self {
            relation_id: relation_id.into(),
            name: name.into(),
            mode,
            category: String::new(),
            group_id: None,
            direction_id: None,
        }
    }

    pub fn parse_relation_id(&self) -> Result<u64, ParseIntError> {
        self.relation_id.trim().parse()
    }
}

/// A route group left out of processing.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedGroup {
    pub category: String,
    pub group_id: String,
    pub kind: Option<String>,
    pub routes: usize,
}

impl RoutesFile {
    pub fn load(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("failed to read routes file '{path}'"))?;
        Self::from_json(&content).with_context(|| format!("failed to parse routes file '{path}'"))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// All routes of fixed groups, in file order.
    pub fn routes(&self) -> Vec<RouteSpec> {
        self.categories
            .iter()
            .flat_map(|category| {
                category
                    .route_groups
                    .iter()
                    .filter(|group| group.is_fixed())
                    .flat_map(move |group| {
                        group.routes.iter().map(move |route| RouteSpec {
                            relation_id: route.relation_id.clone(),
                            name: route.name.clone(),
                            mode: category.mode,
                            category: category.name.clone(),
                            group_id: Some(group.group_id.clone()),
                            direction_id: route.direction_id,
                        })
                    })
            })
            .collect()
    }

    pub fn skipped_groups(&self) -> Vec<SkippedGroup> {
        self.categories
            .iter()
            .flat_map(|category| {
                category
                    .route_groups
                    .iter()
                    .filter(|group| !group.is_fixed())
                    .map(move |group| SkippedGroup {
                        category: category.name.clone(),
                        group_id: group.group_id.clone(),
                        kind: group.kind.clone(),
                        routes: group.routes.len(),
                    })
            })
            .collect()
    }
}
