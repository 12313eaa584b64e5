pub mod config;
pub mod fetch;
pub mod geodesy;
pub mod model;
pub mod output;
pub mod overpass;
pub mod pipeline;
pub mod projector;
pub mod source;
pub mod stats;
pub mod stitch;
pub mod synthesize;
