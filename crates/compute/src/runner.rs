//! Terrain job execution.
//!
//! The raster engine's region and DEM binding are process-wide state, so
//! they live in one [`RasterSession`] behind an async mutex. A job holds the
//! lock from region clamping through cleanup:
//!
//! ```text
//! Validated -> RegionClamped -> Computed -> Vectorized -> Reprojected -> Cleaned -> Done | Failed
//! ```
//!
//! Cleanup runs on every exit path: engine rasters named by the job are
//! removed, the region is restored and the job's scratch directory deleted.
//! Cleanup failures are logged and never change the job's outcome. A region
//! that could not be restored stays marked as narrowed, and the next job
//! refuses to run until it is restored.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use formats::{RasterGrid, feature_collection_string, make_feature};
use foundation::bounds::Aabb2;
use foundation::{JobId, ServiceError, ServiceResult};
use geo::{BooleanOps, Geometry, MultiPolygon, Rect, coord, unary_union};
use geojson::{Feature, JsonObject};
use runtime::{Metrics, WorkerPool};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::dem::DemExtent;
use crate::engine::{EngineError, RasterCommand, RasterEngine};
use crate::job::{JobKind, JobRequest, JobState};
use crate::raster::{clamp_incidence, merge_or};
use crate::reproject::Reprojector;
use crate::vectorize::{Shape, polygonize};

const REFRACTION_COEFF: &str = "0.14286";
const VIEWSHED_MEMORY_MB: u32 = 1000;
const SUN_PROCESSES: u32 = 2;

/// The engine together with the DEM it has loaded and its current region.
pub struct RasterSession {
    engine: Arc<dyn RasterEngine>,
    dem: Arc<DemExtent>,
    dem_raster: String,
    narrowed: bool,
}

impl RasterSession {
    /// `dem_raster` is the engine-side name of the linked DEM; the engine's
    /// region must currently be the full DEM extent.
    pub fn new(
        engine: Arc<dyn RasterEngine>,
        dem: Arc<DemExtent>,
        dem_raster: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            dem,
            dem_raster: dem_raster.into(),
            narrowed: false,
        }
    }

    pub fn dem(&self) -> &DemExtent {
        &self.dem
    }

    pub fn is_narrowed(&self) -> bool {
        self.narrowed
    }

    async fn run(&self, command: RasterCommand) -> ServiceResult<String> {
        self.engine.run(command).await.map_err(computation_failed)
    }

    async fn narrow(&mut self, region: &Aabb2) -> ServiceResult<()> {
        // Marked first: a half-applied region change must still be undone.
        self.narrowed = true;
        self.run(RasterCommand::set_region(region, &self.dem))
            .await
            .map(|_| ())
    }

    async fn restore(&mut self) -> Result<(), EngineError> {
        self.engine
            .run(RasterCommand::set_region(&self.dem.bounds(), &self.dem))
            .await?;
        self.narrowed = false;
        Ok(())
    }
}

fn computation_failed(err: EngineError) -> ServiceError {
    ServiceError::ComputationFailed(err.to_string())
}

/// Everything one job must undo, plus its progress.
struct JobContext {
    id: JobId,
    kind: &'static str,
    state: JobState,
    artifacts: Vec<String>,
    scratch_path: PathBuf,
    scratch: Option<TempDir>,
}

impl JobContext {
    fn advance(&mut self, state: JobState) {
        self.state = state;
        info!(job = %self.id, kind = self.kind, state = %self.state, "job state");
    }

    /// Name a new engine raster and queue it for removal. Registered before
    /// the command runs: a module can write its map and still fail.
    fn register(&mut self, prefix: &str) -> String {
        let name = self.id.artifact(prefix);
        self.artifacts.push(name.clone());
        name
    }

    fn scratch_file(&self, name: &str, extension: &str) -> PathBuf {
        self.scratch_path.join(format!("{name}.{extension}"))
    }
}

#[derive(Clone)]
pub struct TerrainJobRunner {
    session: Arc<Mutex<RasterSession>>,
    reprojector: Arc<dyn Reprojector>,
    pool: WorkerPool,
    scratch_root: Option<PathBuf>,
    metrics: Arc<parking_lot::Mutex<Metrics>>,
}

impl TerrainJobRunner {
    pub fn new(
        session: RasterSession,
        reprojector: Arc<dyn Reprojector>,
        pool: WorkerPool,
        scratch_root: Option<PathBuf>,
        metrics: Arc<parking_lot::Mutex<Metrics>>,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            reprojector,
            pool,
            scratch_root,
            metrics,
        }
    }

    pub fn session(&self) -> &Arc<Mutex<RasterSession>> {
        &self.session
    }

    /// Run a validated job on the worker pool and return the result as a
    /// WGS84 GeoJSON FeatureCollection. The job runs to completion, cleanup
    /// included, even if the caller stops waiting.
    pub async fn run(&self, request: JobRequest) -> ServiceResult<String> {
        let runner = self.clone();
        self.pool
            .run(async move { runner.execute(request).await })
            .await
            .map_err(|e| ServiceError::ComputationFailed(e.to_string()))?
    }

    async fn execute(&self, request: JobRequest) -> ServiceResult<String> {
        let started = Instant::now();
        let kind = request.kind.name();
        let mut session = self.session.lock().await;

        if session.narrowed {
            warn!(kind, "raster region still narrowed by an earlier job, restoring");
            if let Err(e) = session.restore().await {
                error!(kind, "cannot restore raster region: {e}");
                self.metrics.lock().inc_counter(format!("job.{kind}.failed"), 1);
                return Err(ServiceError::ComputationFailed(format!(
                    "cannot restore raster region: {e}"
                )));
            }
        }

        let scratch = self.scratch_dir()?;
        let mut job = JobContext {
            id: JobId::new(),
            kind,
            state: JobState::Validated,
            artifacts: Vec::new(),
            scratch_path: scratch.path().to_path_buf(),
            scratch: Some(scratch),
        };
        job.advance(JobState::Validated);

        let outcome = self.pipeline(&mut session, &mut job, &request).await;
        cleanup(&mut session, &mut job).await;
        drop(session);

        let elapsed = started.elapsed();
        {
            let mut metrics = self.metrics.lock();
            metrics.record_duration(format!("job.{kind}.latency_us"), elapsed);
            let result = if outcome.is_ok() { "done" } else { "failed" };
            metrics.inc_counter(format!("job.{kind}.{result}"), 1);
        }
        match &outcome {
            Ok(_) => job.advance(JobState::Done),
            Err(e) => {
                error!(job = %job.id, kind, error_kind = e.kind(), "job failed: {e}");
                job.advance(JobState::Failed);
            }
        }
        outcome
    }

    async fn pipeline(
        &self,
        session: &mut RasterSession,
        job: &mut JobContext,
        request: &JobRequest,
    ) -> ServiceResult<String> {
        if let Some(region) = &request.region {
            session.narrow(region).await?;
            job.advance(JobState::RegionClamped);
        }

        let grid = compute(session, job, &request.kind).await?;
        job.advance(JobState::Computed);

        let kind = request.kind.clone();
        let extent = request.region.unwrap_or_else(|| session.dem.bounds());
        let features = blocking(move || Ok(vectorize(&grid, &kind, &extent))).await?;
        job.advance(JobState::Vectorized);

        let path = job.scratch_file(job.id.as_str(), "geojson");
        tokio::fs::write(&path, feature_collection_string(features))
            .await
            .map_err(|e| {
                ServiceError::ComputationFailed(format!("cannot write {}: {e}", path.display()))
            })?;
        let reprojected = self
            .reprojector
            .to_wgs84(session.dem.epsg, &path)
            .await
            .map_err(|e| ServiceError::ReprojectionFailed(e.to_string()))?;
        job.advance(JobState::Reprojected);
        Ok(reprojected)
    }

    fn scratch_dir(&self) -> ServiceResult<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("terrain-job-");
        match &self.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| ServiceError::ComputationFailed(format!("cannot create scratch directory: {e}")))
    }
}

/// Produce the job's single raster product, exported and decoded.
async fn compute(
    session: &RasterSession,
    job: &mut JobContext,
    kind: &JobKind,
) -> ServiceResult<RasterGrid> {
    let dem = session.dem_raster.clone();
    match kind {
        JobKind::Viewshed {
            observer,
            observer_elevation,
            target_elevation,
        } => {
            let output = job.register("viewshed");
            session
                .run(viewshed(&dem, observer, *observer_elevation, *target_elevation, &output))
                .await?;
            export(session, job, &output).await
        }
        JobKind::ViewshedMulti {
            observers,
            observer_elevation,
            target_elevation,
        } => {
            let mut grids = Vec::with_capacity(observers.len());
            for (i, observer) in observers.iter().enumerate() {
                info!(job = %job.id, "viewshed {}/{}", i + 1, observers.len());
                let output = job.register(&format!("viewshed{i}"));
                session
                    .run(viewshed(&dem, observer, *observer_elevation, *target_elevation, &output))
                    .await?;
                grids.push(export(session, job, &output).await?);
            }
            blocking(move || merge_or(&grids)).await
        }
        JobKind::Sunmask {
            datetime, timezone, ..
        } => {
            let output = job.register("sunmask");
            session
                .run(
                    RasterCommand::new("r.sunmask")
                        .arg("elevation", &dem)
                        .arg("year", datetime.year)
                        .arg("month", datetime.month)
                        .arg("day", datetime.day)
                        .arg("hour", datetime.hour)
                        .arg("minute", datetime.minute)
                        .arg("timezone", timezone)
                        .arg("output", &output),
                )
                .await?;
            export(session, job, &output).await
        }
        JobKind::Sun {
            day_of_year,
            time,
            timezone,
            ..
        } => {
            let longitude = job.register("long");
            session
                .run(
                    RasterCommand::new("r.latlong")
                        .flag('l')
                        .arg("input", &dem)
                        .arg("output", &longitude),
                )
                .await?;

            let output = job.register("incidence");
            session
                .run(
                    RasterCommand::new("r.sun")
                        .arg("elevation", &dem)
                        .arg("long", &longitude)
                        .arg("day", day_of_year)
                        .arg("time", time)
                        .arg("civil_time", timezone)
                        .arg("incidout", &output)
                        .arg("nprocs", SUN_PROCESSES),
                )
                .await?;
            let grid = export(session, job, &output).await?;
            clamp_incidence(&grid)
        }
    }
}

fn viewshed(
    dem: &str,
    observer: &[f64; 2],
    observer_elevation: f64,
    target_elevation: f64,
    output: &str,
) -> RasterCommand {
    RasterCommand::new("r.viewshed")
        .flag('b')
        .arg("input", dem)
        .arg("coordinates", format!("{},{}", observer[0], observer[1]))
        .arg("observer_elevation", observer_elevation)
        .arg("target_elevation", target_elevation)
        .arg("refraction_coeff", REFRACTION_COEFF)
        .arg("memory", VIEWSHED_MEMORY_MB)
        .arg("output", output)
}

async fn export(
    session: &RasterSession,
    job: &JobContext,
    raster: &str,
) -> ServiceResult<RasterGrid> {
    let path = job.scratch_file(raster, "asc");
    session
        .run(RasterCommand::export_ascii(raster, &path))
        .await?;
    blocking(move || {
        RasterGrid::read(&path).map_err(|e| {
            ServiceError::ComputationFailed(format!("cannot decode exported raster: {e}"))
        })
    })
    .await
}

async fn blocking<F, R>(work: F) -> ServiceResult<R>
where
    F: FnOnce() -> ServiceResult<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ServiceError::ComputationFailed(format!("worker task failed: {e}")))?
}

/// Turn the raster product into output features.
fn vectorize(grid: &RasterGrid, kind: &JobKind, extent: &Aabb2) -> Vec<Feature> {
    let property = kind.property();
    match kind {
        JobKind::Sunmask { sun: true, .. } => {
            let shadows: Vec<_> = polygonize(grid, |v| v == 1.0)
                .into_iter()
                .map(|s| s.polygon)
                .collect();
            let shadow = unary_union(&shadows);
            let region = Rect::new(
                coord! {x: extent.min[0], y: extent.min[1]},
                coord! {x: extent.max[0], y: extent.max[1]},
            );
            let lit = MultiPolygon::new(vec![region.to_polygon()]).difference(&shadow);
            vec![make_feature(
                &Geometry::MultiPolygon(lit),
                properties(property, 1.0),
            )]
        }
        JobKind::Sun { sun, .. } => {
            let sunlit = *sun;
            to_features(polygonize(grid, |v| (v == 1.0) == sunlit), property)
        }
        JobKind::Viewshed { .. } | JobKind::ViewshedMulti { .. } | JobKind::Sunmask { .. } => {
            to_features(polygonize(grid, |v| v == 1.0), property)
        }
    }
}

fn to_features(shapes: Vec<Shape>, property: &str) -> Vec<Feature> {
    shapes
        .into_iter()
        .map(|s| make_feature(&Geometry::Polygon(s.polygon), properties(property, s.value)))
        .collect()
}

fn properties(name: &str, value: f64) -> JsonObject {
    let mut props = JsonObject::new();
    props.insert(name.to_string(), serde_json::json!(value));
    props
}

async fn cleanup(session: &mut RasterSession, job: &mut JobContext) {
    for raster in job.artifacts.drain(..).rev() {
        if let Err(e) = session.engine.run(RasterCommand::remove_raster(&raster)).await {
            warn!(job = %job.id, raster = %raster, "cannot remove raster: {e}");
        }
    }
    if session.narrowed
        && let Err(e) = session.restore().await
    {
        error!(job = %job.id, "cannot restore raster region: {e}");
    }
    if let Some(dir) = job.scratch.take()
        && let Err(e) = dir.close()
    {
        warn!(job = %job.id, "cannot remove scratch directory: {e}");
    }
    job.advance(JobState::Cleaned);
}
