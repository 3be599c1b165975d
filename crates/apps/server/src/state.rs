use std::sync::Arc;

use anyhow::Context;
use compute::{
    CoordinateValidator, DemExtent, GeometryEngine, GrassEngine, Ogr2Ogr, RasterSession,
    TerrainJobRunner,
};
use layers::{load_activities, QueryDispatcher, SpatialIndexStore};
use parking_lot::Mutex;
use runtime::{Metrics, WorkerPool};
use tracing::info;

use crate::config::Config;

/// Engine-side name of the linked DEM raster.
const DEM_RASTER: &str = "dem";

#[derive(Clone)]
pub struct AppState {
    pub queries: QueryDispatcher,
    pub geometry: Arc<GeometryEngine>,
    pub validator: CoordinateValidator,
    pub jobs: TerrainJobRunner,
    pub pool: WorkerPool,
    pub metrics: Arc<Mutex<Metrics>>,
}

impl AppState {
    /// Probe the DEM, bring up the raster engine and load every layer. Any
    /// failure here aborts startup.
    pub async fn bootstrap(config: &Config) -> anyhow::Result<Self> {
        let dem_path = match &config.dem {
            Some(path) => path.clone(),
            None => DemExtent::find_in(&config.elevation_dir)
                .context("no DEM found in the elevation directory")?,
        };
        let dem = Arc::new(
            DemExtent::probe(&config.gdalinfo_bin, &dem_path, config.dem_epsg)
                .await
                .with_context(|| format!("cannot read DEM metadata of {}", dem_path.display()))?,
        );
        let engine = GrassEngine::bootstrap(
            &config.grass_bin,
            config.scratch_dir.as_deref(),
            &dem,
            DEM_RASTER,
        )
        .await
        .context("cannot initialize the GRASS session")?;

        info!("opening OSM layers from {}", config.osm_dir.display());
        let store = SpatialIndexStore::load_dir(&config.osm_dir).context("cannot load layers")?;
        let activities =
            load_activities(&config.osm_dir).context("cannot load activity layers")?;
        let geometry = GeometryEngine::new(config.buffer_epsg)
            .with_context(|| format!("unsupported buffer CRS EPSG:{}", config.buffer_epsg))?;

        let metrics = Arc::new(Mutex::new(Metrics::new()));
        let pool = WorkerPool::new("workers", config.workers);
        let jobs = TerrainJobRunner::new(
            RasterSession::new(Arc::new(engine), Arc::clone(&dem), DEM_RASTER),
            Arc::new(Ogr2Ogr::new(config.ogr2ogr_bin.clone())),
            pool.clone(),
            config.scratch_dir.clone(),
            Arc::clone(&metrics),
        );
        let queries = QueryDispatcher::new(
            Arc::new(store),
            activities,
            pool.clone(),
            Arc::clone(&metrics),
        );

        Ok(Self {
            queries,
            geometry: Arc::new(geometry),
            validator: CoordinateValidator::new(dem),
            jobs,
            pool,
            metrics,
        })
    }
}
