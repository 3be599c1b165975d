use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Service configuration; every flag can also come from its `GEOTERRAIN_*`
/// environment variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "server", about = "Geospatial feature queries and terrain analysis over HTTP")]
pub struct Config {
    #[arg(long, env = "GEOTERRAIN_ADDR", default_value = "0.0.0.0:8008")]
    pub addr: SocketAddr,

    /// Directory holding the category and activity GeoJSON layers.
    #[arg(long, env = "GEOTERRAIN_OSM_DIR", default_value = "data/osm")]
    pub osm_dir: PathBuf,

    /// Searched for the first `*.tif` when `--dem` is not given.
    #[arg(long, env = "GEOTERRAIN_ELEVATION_DIR", default_value = "data/elevation")]
    pub elevation_dir: PathBuf,

    #[arg(long, env = "GEOTERRAIN_DEM")]
    pub dem: Option<PathBuf>,

    /// Overrides the EPSG code reported by gdalinfo.
    #[arg(long, env = "GEOTERRAIN_DEM_EPSG")]
    pub dem_epsg: Option<u16>,

    #[arg(long, env = "GEOTERRAIN_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Parent of the GRASS database and per-job scratch directories.
    #[arg(long, env = "GEOTERRAIN_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    #[arg(long, env = "GEOTERRAIN_GRASS_BIN", default_value = "grass")]
    pub grass_bin: String,

    #[arg(long, env = "GEOTERRAIN_OGR2OGR_BIN", default_value = "ogr2ogr")]
    pub ogr2ogr_bin: String,

    #[arg(long, env = "GEOTERRAIN_GDALINFO_BIN", default_value = "gdalinfo")]
    pub gdalinfo_bin: String,

    /// Projected CRS buffers are computed in.
    #[arg(long, env = "GEOTERRAIN_BUFFER_EPSG", default_value_t = 2154)]
    pub buffer_epsg: u16,

    #[arg(long, env = "GEOTERRAIN_BODY_LIMIT", default_value_t = 17408 * 17408)]
    pub body_limit: usize,
}
