//! Core value types shared by the stitcher, projector and synthesizer.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geodesy::Coordinate;

/// One OSM way: an ordered run of at least two coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct WayFragment {
    pub id: u64,
    pub name: Option<String>,
    pub coords: Vec<Coordinate>,
}

impl WayFragment {
    pub fn new(id: u64, name: Option<String>, coords: Vec<Coordinate>) -> Self {
        Self { id, name, coords }
    }

    pub fn first(&self) -> Option<Coordinate> {
        self.coords.first().copied()
    }

    pub fn last(&self) -> Option<Coordinate> {
        self.coords.last().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    Node,
    Way,
    #[serde(other)]
    Other,
}

/// A relation member, kept in the order OSM lists it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RelationMember {
    #[serde(rename = "type")]
    pub kind: MemberKind,
    #[serde(rename = "ref")]
    pub id: u64,
    #[serde(default)]
    pub role: String,
}

impl RelationMember {
    /// Platform members describe where passengers wait, not the path of travel.
    pub fn is_platform(&self) -> bool {
        self.role.starts_with("platform")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopRole {
    Stop,
    StopEntryOnly,
    StopExitOnly,
    Virtual,
}

impl StopRole {
    /// Maps an OSM member role onto a stop role; non-stop roles yield `None`.
    pub fn from_member_role(role: &str) -> Option<Self> {
        match role {
            "stop" => Some(StopRole::Stop),
            "stop_entry_only" => Some(StopRole::StopEntryOnly),
            "stop_exit_only" => Some(StopRole::StopExitOnly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StopRole::Stop => "stop",
            StopRole::StopEntryOnly => "stop_entry_only",
            StopRole::StopExitOnly => "stop_exit_only",
            StopRole::Virtual => "virtual",
        }
    }
}

impl fmt::Display for StopRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub id: String,
    pub coord: Coordinate,
    pub name: String,
    pub role: StopRole,
    pub is_real: bool,
}

impl Stop {
    pub fn real(id: impl Into<String>, coord: Coordinate, name: impl Into<String>, role: StopRole) -> Self {
        Self {
            id: id.into(),
            coord,
            name: name.into(),
            role,
            is_real: true,
        }
    }

    /// Builds a synthesized stop whose id is derived from its rounded position.
    pub fn virtual_at(coord: Coordinate, name: impl Into<String>) -> Self {
        Self {
            id: format!("virtual_{:.6}_{:.6}", coord.lat, coord.lon),
            coord,
            name: name.into(),
            role: StopRole::Virtual,
            is_real: false,
        }
    }
}

/// The full path of a route in one direction, without repeated adjacent points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StitchedRoute {
    coords: Vec<Coordinate>,
}

impl StitchedRoute {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coords(&self) -> &[Coordinate] {
        &self.coords
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    pub fn last(&self) -> Option<Coordinate> {
        self.coords.last().copied()
    }

    /// Appends a point unless it repeats the current last point exactly.
    pub fn push(&mut self, coord: Coordinate) {
        if self.coords.last() != Some(&coord) {
            self.coords.push(coord);
        }
    }

    pub fn extend<I: IntoIterator<Item = Coordinate>>(&mut self, coords: I) {
        for c in coords {
            self.push(c);
        }
    }

    /// Total great-circle length in meters.
    pub fn length_m(&self) -> f64 {
        self.coords
            .windows(2)
            .map(|w| crate::geodesy::distance(w[0], w[1]))
            .sum()
    }
}

impl From<Vec<Coordinate>> for StitchedRoute {
    fn from(coords: Vec<Coordinate>) -> Self {
        let mut route = StitchedRoute::new();
        route.extend(coords);
        route
    }
}
