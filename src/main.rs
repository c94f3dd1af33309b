use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use log::{info, warn};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use streetpath::osm::{self, DataSource, OsmData};
use streetpath::{GeoPos, RouteConfig};

#[derive(Debug, thiserror::Error)]
#[error("{0}: {1}")]
struct SourceLoadError(PathBuf, #[source] osm::Error);

#[derive(Debug, thiserror::Error)]
#[error("no street near {0:?}")]
struct NoStreetError(GeoPos);

#[cfg(not(feature = "http"))]
#[derive(Debug, thiserror::Error)]
#[error("no --osm-file provided, and streetpath was built without the \"http\" feature")]
struct NoSourceError;

#[derive(Parser)]
struct Cli {
    /// JSON file with the route endpoints; a random route is picked if it can't be read
    #[arg(long, default_value = "navigation.json")]
    config: PathBuf,

    /// Read map data from an OSM file instead of the Overpass API
    #[arg(long)]
    osm_file: Option<PathBuf>,

    /// Multiplier of edge costs; values below 1 trade optimality for speed
    #[arg(long, default_value_t = 1.0)]
    accuracy: f64,

    /// Ignore turn restrictions
    #[arg(long)]
    no_restrictions: bool,

    /// Allow turning back at junctions
    #[arg(long)]
    u_turns: bool,

    /// Latitude of the center around which random routes are picked
    #[arg(long, default_value_t = 52.2297)]
    center_lat: f64,

    /// Longitude of the center around which random routes are picked
    #[arg(long, default_value_t = 21.0122)]
    center_lon: f64,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    colog::init();
    let cli = Cli::parse();

    let center = GeoPos::new(cli.center_lat, cli.center_lon);
    let route = RouteConfig::load_or_random(&cli.config, center, &mut SmallRng::from_entropy());
    info!("routing from {:?} to {:?}", route.from, route.to);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;

    rt.block_on(route_with_source(&cli, &route))
}

async fn route_with_source(cli: &Cli, route: &RouteConfig) -> Result<(), Box<dyn Error>> {
    match &cli.osm_file {
        Some(path) => {
            let source = osm::MemorySource::from_file(path, osm::FileFormat::Unknown)
                .map_err(|e| SourceLoadError(path.clone(), e))?;
            run(OsmData::new(source), cli, route).await
        }
        None => run_overpass(cli, route).await,
    }
}

#[cfg(feature = "http")]
async fn run_overpass(cli: &Cli, route: &RouteConfig) -> Result<(), Box<dyn Error>> {
    let options = osm::OverpassOptions::default();
    let transport = osm::HttpTransport::from_options(&options)?;
    run(OsmData::new(osm::Overpass::new(transport, options)), cli, route).await
}

#[cfg(not(feature = "http"))]
async fn run_overpass(_: &Cli, _: &RouteConfig) -> Result<(), Box<dyn Error>> {
    Err(Box::new(NoSourceError))
}

async fn run<S: DataSource>(
    data: OsmData<S>,
    cli: &Cli,
    route: &RouteConfig,
) -> Result<(), Box<dyn Error>> {
    let from = closest_street(&data, route.from).await?;
    let to = closest_street(&data, route.to).await?;

    let options = osm::PathfinderOptions {
        accuracy: cli.accuracy,
        turn_restrictions: !cli.no_restrictions,
        u_turns: cli.u_turns,
        ..Default::default()
    };
    let pathfinder = osm::Pathfinder::new(&data, from, to, osm::speed_weighting, options);

    match pathfinder.find().await? {
        Some(path) => {
            info!(
                "found route over {} streets, {:.0} m long",
                path.sections().len(),
                path.length()
            );

            let coordinates = path
                .geo_coordinates()
                .iter()
                .map(|p| [p.lon, p.lat])
                .collect::<Vec<_>>();
            let collection = serde_json::json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "properties": {},
                    "geometry": {
                        "type": "LineString",
                        "coordinates": coordinates,
                    },
                }],
            });
            println!("{}", serde_json::to_string_pretty(&collection)?);
        }
        None => warn!("no route found"),
    }

    Ok(())
}

async fn closest_street<S: DataSource>(
    data: &OsmData<S>,
    pos: GeoPos,
) -> Result<osm::StreetPosition, NoStreetError> {
    data.get_closest_street(&pos, 0.00001, true, Some(osm::DRIVEABLE_STREET_RULE))
        .await
        .map(|c| c.position)
        .ok_or(NoStreetError(pos))
}
