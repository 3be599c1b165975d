//! The elevation model every terrain job runs against.

use std::path::{Path, PathBuf};

use foundation::bounds::Aabb2;
use foundation::math::projection::{Crs, CrsError, Transformer};
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

#[derive(Debug, Error)]
pub enum DemError {
    #[error("no DEM (*.tif) found in {0}")]
    NotFound(String),
    #[error("{command} failed: {message}")]
    Command { command: String, message: String },
    #[error("cannot read DEM metadata: {0}")]
    Metadata(String),
    #[error("DEM has no EPSG code; set one explicitly")]
    MissingEpsg,
    #[error(transparent)]
    Crs(#[from] CrsError),
}

/// CRS, resolution and whole-unit bounding rectangle of the DEM.
#[derive(Debug, Clone)]
pub struct DemExtent {
    pub path: PathBuf,
    pub epsg: u16,
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
    pub ewres: f64,
    pub nsres: f64,
    to_dem: Transformer,
}

#[derive(Debug, Deserialize)]
struct GdalInfo {
    #[serde(rename = "geoTransform")]
    geo_transform: [f64; 6],
    size: [u64; 2],
    #[serde(default)]
    stac: Option<GdalStac>,
}

#[derive(Debug, Deserialize)]
struct GdalStac {
    #[serde(rename = "proj:epsg")]
    epsg: Option<u16>,
}

impl DemExtent {
    /// Build from raw bounds (`minx, miny, maxx, maxy`) and resolution. The
    /// rectangle is shrunk inward to whole units.
    pub fn new(
        path: PathBuf,
        epsg: u16,
        bounds: [f64; 4],
        ewres: f64,
        nsres: f64,
    ) -> Result<Self, DemError> {
        let to_dem = Transformer::new(Crs::wgs84()?, Crs::from_epsg(epsg)?);
        let [minx, miny, maxx, maxy] = bounds;
        Ok(Self {
            path,
            epsg,
            north: maxy.floor(),
            south: miny.ceil(),
            east: maxx.floor(),
            west: minx.ceil(),
            ewres,
            nsres,
            to_dem,
        })
    }

    /// Parse `gdalinfo -json` output. `epsg` overrides the code reported in
    /// the metadata.
    pub fn from_gdalinfo(path: PathBuf, json: &str, epsg: Option<u16>) -> Result<Self, DemError> {
        let info: GdalInfo =
            serde_json::from_str(json).map_err(|e| DemError::Metadata(e.to_string()))?;
        let epsg = epsg
            .or_else(|| info.stac.as_ref().and_then(|s| s.epsg))
            .ok_or(DemError::MissingEpsg)?;

        let gt = info.geo_transform;
        let (width, height) = (info.size[0] as f64, info.size[1] as f64);
        if width == 0.0 || height == 0.0 {
            return Err(DemError::Metadata("DEM has zero size".to_string()));
        }
        let x1 = gt[0];
        let x2 = gt[0] + gt[1] * width;
        let y1 = gt[3];
        let y2 = gt[3] + gt[5] * height;

        Self::new(
            path,
            epsg,
            [x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)],
            gt[1].abs(),
            gt[5].abs(),
        )
    }

    /// Run `gdalinfo -json` on `path` and parse the result.
    pub async fn probe(gdalinfo: &str, path: &Path, epsg: Option<u16>) -> Result<Self, DemError> {
        let output = Command::new(gdalinfo)
            .arg("-json")
            .arg(path)
            .output()
            .await
            .map_err(|e| DemError::Command {
                command: gdalinfo.to_string(),
                message: format!("failed to start: {e}"),
            })?;
        if !output.status.success() {
            return Err(DemError::Command {
                command: gdalinfo.to_string(),
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        let dem = Self::from_gdalinfo(
            path.to_path_buf(),
            &String::from_utf8_lossy(&output.stdout),
            epsg,
        )?;
        info!(
            path = %dem.path.display(),
            epsg = dem.epsg,
            n = dem.north,
            s = dem.south,
            e = dem.east,
            w = dem.west,
            "DEM extent loaded"
        );
        Ok(dem)
    }

    /// First `*.tif` in `dir`, in path order.
    pub fn find_in(dir: &Path) -> Result<PathBuf, DemError> {
        let pattern = dir.join("*.tif");
        let mut paths: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| DemError::NotFound(format!("{}: {e}", dir.display())))?
            .filter_map(Result::ok)
            .collect();
        paths.sort();
        paths
            .into_iter()
            .next()
            .ok_or_else(|| DemError::NotFound(dir.display().to_string()))
    }

    /// `(w, s)`–`(e, n)` in DEM coordinates.
    pub fn bounds(&self) -> Aabb2 {
        Aabb2::from_extent(self.west, self.south, self.east, self.north)
    }

    /// WGS84 lon/lat → DEM coordinates.
    pub fn to_dem(&self) -> &Transformer {
        &self.to_dem
    }
}
