//! Overpass API implementation of [`RouteSource`].
//!
//! One query per route returns the relation, its member ways with inline
//! geometry and its member nodes. [`DirSource`] reads the same JSON from disk
//! for offline runs.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Method, Request, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::fetch::{HttpClient, RetryPolicy, fetch_bytes, with_backoff};
use crate::geodesy::Coordinate;
use crate::model::RelationMember;
use crate::source::{FetchError, NodeDetails, RelationDescriptor, RouteData, RouteSource, WayDetails};

pub const DEFAULT_ENDPOINT: &str = "https://overpass-api.de/api/interpreter";

/// Overpass QL returning a route relation with its ways (with geometry) and nodes.
pub fn route_query(relation_id: u64) -> String {
    format!(
        "[out:json][timeout:60];\n\
         relation({relation_id})->.route;\n\
         .route out body;\n\
         way(r.route);\n\
         out tags geom;\n\
         node(r.route);\n\
         out body;"
    )
}

#[derive(Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<Element>,
}

#[derive(Deserialize)]
struct LatLon {
    lat: f64,
    lon: f64,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Element {
    Node {
        id: u64,
        lat: f64,
        lon: f64,
        #[serde(default)]
        tags: HashMap<String, String>,
    },
    Way {
        id: u64,
        // Overpass emits null for nodes outside the queried data.
        #[serde(default)]
        geometry: Vec<Option<LatLon>>,
        #[serde(default)]
        tags: HashMap<String, String>,
    },
    Relation {
        id: u64,
        #[serde(default)]
        members: Vec<RelationMember>,
        #[serde(default)]
        tags: HashMap<String, String>,
    },
    #[serde(other)]
    Other,
}

/// Keeps the resolved points of a way and counts the `null` ones.
fn way_geometry(points: Vec<Option<LatLon>>) -> (Vec<Coordinate>, usize) {
    let total = points.len();
    let coords: Vec<Coordinate> = points
        .into_iter()
        .flatten()
        .map(|p| Coordinate::new(p.lon, p.lat))
        .collect();
    let missing = total - coords.len();
    (coords, missing)
}

/// Parses an Overpass JSON response into the pieces of `relation_id`.
pub fn parse_response(bytes: &[u8], relation_id: u64) -> Result<RouteData, FetchError> {
    let response: OverpassResponse = serde_json::from_slice(bytes)?;
    let mut data = RouteData::default();

    for element in response.elements {
        match element {
            Element::Node { id, lat, lon, tags } => {
                data.nodes.insert(
                    id,
                    NodeDetails {
                        id,
                        coord: Coordinate::new(lon, lat),
                        tags,
                    },
                );
            }
            Element::Way { id, geometry, tags } => {
                let (geometry, missing) = way_geometry(geometry);
                if missing > 0 {
                    warn!(
                        way_id = id,
                        missing,
                        kept = geometry.len(),
                        "Way geometry has points without coordinates, joining across them"
                    );
                }
                data.ways.insert(id, WayDetails { id, geometry, tags });
            }
            Element::Relation { id, members, tags } if id == relation_id => {
                data.relation = Some(RelationDescriptor { id, members, tags });
            }
            Element::Relation { .. } | Element::Other => {}
        }
    }

    debug!(
        relation_id,
        found = data.relation.is_some(),
        ways = data.ways.len(),
        nodes = data.nodes.len(),
        "Parsed Overpass response"
    );

    Ok(data)
}

/// Fetches routes from an Overpass endpoint, retrying transient failures.
pub struct OverpassClient<C> {
    client: C,
    endpoint: Url,
    retry: RetryPolicy,
}

impl<C: HttpClient> OverpassClient<C> {
    pub fn new(client: C, endpoint: &str) -> anyhow::Result<Self> {
        let endpoint = endpoint
            .parse::<Url>()
            .with_context(|| format!("invalid Overpass endpoint '{endpoint}'"))?;
        Ok(Self {
            client,
            endpoint,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn request(&self, relation_id: u64) -> Request {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("data", &route_query(relation_id));
        Request::new(Method::GET, url)
    }
}

#[async_trait]
impl<C: HttpClient> RouteSource for OverpassClient<C> {
    async fn fetch_route(&self, relation_id: u64) -> Result<RouteData, FetchError> {
        with_backoff(self.retry, || async move {
            let bytes = fetch_bytes(&self.client, self.request(relation_id)).await?;
            debug!(relation_id, bytes = bytes.len(), "Overpass response received");
            parse_response(&bytes, relation_id)
        })
        .await
    }
}

/// Reads `<dir>/<relation id>.json` files holding saved Overpass responses.
pub struct DirSource {
    dir: PathBuf,
}

impl DirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, relation_id: u64) -> PathBuf {
        self.dir.join(format!("{relation_id}.json"))
    }
}

#[async_trait]
impl RouteSource for DirSource {
    async fn fetch_route(&self, relation_id: u64) -> Result<RouteData, FetchError> {
        let bytes = tokio::fs::read(self.path_for(relation_id)).await?;
        parse_response(&bytes, relation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;
    use crate::model::MemberKind;

    const SAMPLE: &str = r#"{
        "version": 0.6,
        "elements": [
            {"type": "relation", "id": 42, "members": [
                {"type": "way", "ref": 1, "role": ""},
                {"type": "node", "ref": 10, "role": "stop"},
                {"type": "relation", "ref": 7, "role": ""}
            ], "tags": {"name": "Angkot Kalapa - Dago", "route": "bus"}},
            {"type": "relation", "id": 43, "members": []},
            {"type": "way", "id": 1, "nodes": [10, 11, 12],
             "geometry": [{"lat": -6.9, "lon": 107.6}, null, {"lat": -6.91, "lon": 107.61}],
             "tags": {"name": "Jalan Dago"}},
            {"type": "node", "id": 10, "lat": -6.9, "lon": 107.6},
            {"type": "area", "id": 3600000001}
        ]
    }"#;

    #[test]
    fn test_parse_response() {
        let data = parse_response(SAMPLE.as_bytes(), 42).unwrap();

        let relation = data.relation.unwrap();
        assert_eq!(relation.id, 42);
        assert_eq!(relation.members.len(), 3);
        assert_eq!(relation.members[1].kind, MemberKind::Node);
        assert_eq!(relation.members[1].role, "stop");
        assert_eq!(relation.members[2].kind, MemberKind::Other);
        assert_eq!(relation.tags["name"], "Angkot Kalapa - Dago");

        let way = &data.ways[&1];
        assert_eq!(way.geometry.len(), 2);
        assert_eq!(way.geometry[0], Coordinate::new(107.6, -6.9));
        assert_eq!(way.name(), Some("Jalan Dago"));

        assert_eq!(data.nodes[&10].coord, Coordinate::new(107.6, -6.9));
        assert!(data.nodes[&10].tags.is_empty());
    }

    #[test]
    fn test_null_geometry_points_are_counted() {
        let points = vec![
            Some(LatLon { lat: -6.9, lon: 107.6 }),
            None,
            None,
            Some(LatLon { lat: -6.91, lon: 107.61 }),
        ];
        let (coords, missing) = way_geometry(points);
        assert_eq!(missing, 2);
        assert_eq!(
            coords,
            vec![Coordinate::new(107.6, -6.9), Coordinate::new(107.61, -6.91)]
        );

        let (_, missing) = way_geometry(vec![Some(LatLon { lat: 0.0, lon: 0.0 })]);
        assert_eq!(missing, 0);
    }

    #[test]
    fn test_parse_response_without_relation() {
        let data = parse_response(SAMPLE.as_bytes(), 99).unwrap();
        assert!(data.relation.is_none());
    }

    #[test]
    fn test_parse_response_rejects_garbage() {
        let err = parse_response(b"<html>rate limited</html>", 42).unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[test]
    fn test_request_carries_query() {
        let client = OverpassClient::new(BasicClient::new(), DEFAULT_ENDPOINT).unwrap();
        let req = client.request(42);
        assert_eq!(req.method(), &Method::GET);
        let data: String = req
            .url()
            .query_pairs()
            .find(|(k, _)| k == "data")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert!(data.contains("relation(42)"));
        assert!(data.starts_with("[out:json]"));
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(OverpassClient::new(BasicClient::new(), "not a url").is_err());
    }

    #[tokio::test]
    async fn test_dir_source() {
        let dir = std::env::temp_dir().join("osm_transit_routes_dir_source");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("42.json"), SAMPLE).unwrap();

        let source = DirSource::new(&dir);
        let data = source.fetch_route(42).await.unwrap();
        assert!(data.relation.is_some());

        let missing = source.fetch_route(1).await.unwrap_err();
        assert!(matches!(missing, FetchError::Io(_)));
        assert!(!missing.is_transient());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
