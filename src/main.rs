//! CLI entry point for the OSM transit route builder.
//!
//! Provides subcommands for building every route listed in a routes file,
//! building a single relation, and inspecting a routes file.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use osm_transit_routes::{
    config::{RouteSpec, RoutesFile, TransitMode},
    fetch::{BasicClient, WithUserAgent},
    output::{append_record, print_json, write_route},
    overpass::{DEFAULT_ENDPOINT, DirSource, OverpassClient},
    pipeline::{PipelineOptions, RouteOutcome, process_route},
    source::RouteSource,
    stats::RouteStats,
    stitch::StitchStrategy,
};
use tracing::Instrument;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "osm_transit_routes")]
#[command(about = "Builds route geometry and stop sequences from OSM route relations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every fixed route listed in a routes file
    Build {
        /// Routes configuration file
        #[arg(long, default_value = "routes.json")]
        routes: String,

        /// Directory receiving one sub-directory per relation
        #[arg(short, long, default_value = "route-data")]
        output_dir: String,

        /// CSV file to append per-route results to
        #[arg(long, default_value = "route-summary.csv")]
        summary: String,

        /// Read saved Overpass responses (<relation id>.json) instead of querying the API
        #[arg(long)]
        source_dir: Option<String>,

        /// Attempts per route before moving on to the next one
        #[arg(long, default_value_t = 3)]
        attempts: u32,

        /// Seconds to wait between attempts of the same route
        #[arg(long, default_value_t = 5)]
        retry_delay_secs: u64,

        /// Way ordering strategy: auto, member-order or endpoint-graph
        #[arg(long, default_value = "auto")]
        stitch: StitchStrategy,

        /// Only build these relation ids (repeatable)
        #[arg(long = "only", value_name = "RELATION_ID")]
        only: Vec<String>,
    },
    /// Build a single route relation
    Route {
        /// OSM relation id
        #[arg(value_name = "RELATION_ID")]
        relation_id: String,

        /// Transit mode; angkot and minibus routes get virtual stops
        #[arg(short, long, default_value = "bus")]
        mode: TransitMode,

        /// Route name written to the output (defaults to the relation's name tag)
        #[arg(long)]
        name: Option<String>,

        /// Directory receiving the relation's sub-directory
        #[arg(short, long, default_value = "route-data")]
        output_dir: String,

        /// Read a saved Overpass response instead of querying the API
        #[arg(long)]
        source_dir: Option<String>,

        /// Way ordering strategy: auto, member-order or endpoint-graph
        #[arg(long, default_value = "auto")]
        stitch: StitchStrategy,
    },
    /// List the routes a routes file would build
    ListRoutes {
        /// Routes configuration file
        #[arg(long, default_value = "routes.json")]
        routes: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/osm_transit_routes.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("osm_transit_routes.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            routes,
            output_dir,
            summary,
            source_dir,
            attempts,
            retry_delay_secs,
            stitch,
            only,
        } => {
            let options = PipelineOptions {
                strategy: stitch,
                attempts,
                retry_delay: Duration::from_secs(retry_delay_secs),
            };
            build_all(&routes, &output_dir, &summary, source_dir, &options, &only).await?;
        }
        Commands::Route {
            relation_id,
            mode,
            name,
            output_dir,
            source_dir,
            stitch,
        } => {
            let source = route_source(source_dir)?;
            let spec = RouteSpec::new(relation_id, name.unwrap_or_default(), mode);
            let options = PipelineOptions {
                strategy: stitch,
                ..Default::default()
            };

            match process_route(source.as_ref(), &spec, &options).await {
                RouteOutcome::Succeeded { route, attempts } => {
                    let dir = write_route(Path::new(&output_dir), &route)?;
                    print_json(&RouteStats::from_route(&route, attempts))?;
                    info!(dir = %dir.display(), "Route written");
                }
                RouteOutcome::FailedAfterRetries { attempts, error } => {
                    bail!("route {} failed after {attempts} attempts: {error}", spec.relation_id);
                }
                RouteOutcome::Fatal { error } => {
                    bail!("route {} cannot be built: {error}", spec.relation_id);
                }
            }
        }
        Commands::ListRoutes { routes } => {
            let file = RoutesFile::load(&routes)?;
            let specs = file.routes();

            for spec in &specs {
                info!(
                    relation_id = %spec.relation_id,
                    name = %spec.name,
                    category = %spec.category,
                    group = spec.group_id.as_deref().unwrap_or(""),
                    mode = %spec.mode,
                    virtual_stops = spec.mode.synthesizes_virtual_stops(),
                    "Route"
                );
            }

            let skipped = file.skipped_groups();
            for group in &skipped {
                info!(
                    category = %group.category,
                    group = %group.group_id,
                    kind = group.kind.as_deref().unwrap_or("none"),
                    routes = group.routes,
                    "Skipping non-fixed route group"
                );
            }

            let mut per_mode: BTreeMap<&str, usize> = BTreeMap::new();
            for spec in &specs {
                *per_mode.entry(spec.mode.as_str()).or_default() += 1;
            }
            let invalid_ids = specs
                .iter()
                .filter(|s| s.parse_relation_id().is_err())
                .count();

            info!(
                total = specs.len(),
                per_mode = ?per_mode,
                skipped_groups = skipped.len(),
                invalid_ids,
                "Route list summary"
            );
        }
    }

    Ok(())
}

/// Picks the Overpass API, or saved responses when `source_dir` is given.
fn route_source(source_dir: Option<String>) -> Result<Box<dyn RouteSource>> {
    if let Some(dir) = source_dir {
        info!(dir = %dir, "Reading saved Overpass responses");
        return Ok(Box::new(DirSource::new(dir)));
    }

    let endpoint =
        std::env::var("OVERPASS_URL").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
    info!(endpoint = %endpoint, "Querying Overpass API");
    let http = WithUserAgent::crate_default(BasicClient::with_timeout(Duration::from_secs(90))?);
    Ok(Box::new(OverpassClient::new(http, &endpoint)?))
}

/// Builds every route from the routes file, one at a time, recording each
/// outcome in the summary CSV. Only a routes file that cannot be loaded stops
/// the run.
#[tracing::instrument(skip(source_dir, options, only))]
async fn build_all(
    routes_path: &str,
    output_dir: &str,
    summary: &str,
    source_dir: Option<String>,
    options: &PipelineOptions,
    only: &[String],
) -> Result<()> {
    let file = RoutesFile::load(routes_path)?;
    let mut routes = file.routes();
    if !only.is_empty() {
        routes.retain(|r| only.contains(&r.relation_id));
    }

    for group in file.skipped_groups() {
        info!(
            category = %group.category,
            group = %group.group_id,
            routes = group.routes,
            "Skipping non-fixed route group"
        );
    }

    info!(
        route_count = routes.len(),
        attempts = options.attempts,
        strategy = %options.strategy,
        "Routes ready for processing"
    );

    let source = route_source(source_dir)?;
    std::fs::create_dir_all(output_dir)?;

    let mut succeeded = 0;
    let mut failed = 0;
    let mut fatal = 0;

    for (index, spec) in routes.iter().enumerate() {
        let route_span = tracing::info_span!(
            "build_route",
            index,
            relation_id = %spec.relation_id,
            mode = %spec.mode,
        );

        let outcome = process_route(source.as_ref(), spec, options)
            .instrument(route_span.clone())
            .await;

        let stats = match &outcome {
            RouteOutcome::Succeeded { route, .. } => {
                match write_route(Path::new(output_dir), route) {
                    Ok(_) => {
                        succeeded += 1;
                        RouteStats::from_outcome(spec, &outcome)
                    }
                    Err(e) => {
                        route_span.in_scope(|| error!(error = %e, "Failed to write route documents"));
                        failed += 1;
                        RouteStats::from_error("write_error", &e.to_string()).with_route_info(spec)
                    }
                }
            }
            RouteOutcome::FailedAfterRetries { .. } => {
                failed += 1;
                RouteStats::from_outcome(spec, &outcome)
            }
            RouteOutcome::Fatal { .. } => {
                fatal += 1;
                RouteStats::from_outcome(spec, &outcome)
            }
        };

        if let Err(e) = append_record(summary, &stats) {
            warn!(error = %e, summary, "Failed to append route summary");
        }
    }

    info!(succeeded, failed, fatal, output_dir, "Finished processing all routes");
    Ok(())
}
