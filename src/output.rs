//! Output documents and persistence for assembled routes.
//!
//! Each route is written as two GeoJSON files under its relation id, and a
//! [`RouteStats`] row is appended to the CSV run summary.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use csv::WriterBuilder;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use serde_json::json;
use tracing::{debug, info};

use crate::pipeline::AssembledRoute;
use crate::stats::RouteStats;

pub const WAYS_FILE: &str = "ways.geojson";
pub const STOPS_FILE: &str = "stops.geojson";

fn feature(geometry: Value, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(geometry)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// A collection holding the stitched line as its only feature.
pub fn ways_document(route: &AssembledRoute) -> FeatureCollection {
    let coordinates = route.route.coords().iter().map(|c| c.to_position()).collect();

    let mut properties = JsonObject::new();
    properties.insert("relation_id".to_string(), json!(route.relation_id));
    properties.insert("name".to_string(), json!(route.name));
    properties.insert("mode".to_string(), json!(route.mode.as_str()));
    properties.insert("strategy".to_string(), json!(route.strategy.as_str()));
    properties.insert(
        "continuity_warnings".to_string(),
        json!(route.continuity_warnings.len()),
    );

    FeatureCollection {
        bbox: None,
        features: vec![feature(Value::LineString(coordinates), properties)],
        foreign_members: None,
    }
}

/// One point feature per stop, in route order.
pub fn stops_document(route: &AssembledRoute) -> FeatureCollection {
    let features = route
        .stops
        .iter()
        .enumerate()
        .map(|(sequence, stop)| {
            let mut properties = JsonObject::new();
            properties.insert("id".to_string(), json!(stop.id));
            properties.insert("name".to_string(), json!(stop.name));
            properties.insert("role".to_string(), json!(stop.role.as_str()));
            properties.insert("sequence".to_string(), json!(sequence));
            if !stop.is_real {
                properties.insert("virtual".to_string(), json!(true));
            }
            feature(Value::Point(stop.coord.to_position()), properties)
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Writes both documents to `<output_dir>/<relation id>/` and returns that directory.
pub fn write_route(output_dir: &Path, route: &AssembledRoute) -> Result<PathBuf> {
    let dir = output_dir.join(route.relation_id.to_string());
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create route directory {}", dir.display()))?;

    let ways_path = dir.join(WAYS_FILE);
    std::fs::write(&ways_path, serde_json::to_string_pretty(&ways_document(route))?)
        .with_context(|| format!("failed to write {}", ways_path.display()))?;

    let stops_path = dir.join(STOPS_FILE);
    std::fs::write(&stops_path, serde_json::to_string_pretty(&stops_document(route))?)
        .with_context(|| format!("failed to write {}", stops_path.display()))?;

    debug!(dir = %dir.display(), "Route documents written");
    Ok(dir)
}

/// Logs route statistics as pretty-printed JSON.
pub fn print_json(stats: &RouteStats) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(stats)?);
    Ok(())
}

/// Appends a [`RouteStats`] record as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record(path: &str, stats: &RouteStats) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(stats)?;
    writer.flush()?;

    Ok(())
}
