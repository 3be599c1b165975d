//! Port for the final DEM CRS → WGS84 transform of job results.

use std::path::Path;

use foundation::math::projection::WGS84_EPSG;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::engine::BoxFuture;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReprojectError {
    #[error("{command} failed to start: {message}")]
    Spawn { command: String, message: String },
    #[error("{stderr}")]
    Failed { stderr: String },
}

pub trait Reprojector: Send + Sync {
    /// Read the GeoJSON FeatureCollection at `input` (coordinates in
    /// `EPSG:source_epsg`) and return it as GeoJSON in WGS84.
    fn to_wgs84<'a>(
        &'a self,
        source_epsg: u16,
        input: &'a Path,
    ) -> BoxFuture<'a, Result<String, ReprojectError>>;
}

/// GDAL's `ogr2ogr`, writing the converted collection to stdout.
#[derive(Debug, Clone)]
pub struct Ogr2Ogr {
    bin: String,
}

impl Ogr2Ogr {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

impl Reprojector for Ogr2Ogr {
    fn to_wgs84<'a>(
        &'a self,
        source_epsg: u16,
        input: &'a Path,
    ) -> BoxFuture<'a, Result<String, ReprojectError>> {
        Box::pin(async move {
            debug!(input = %input.display(), source_epsg, "ogr2ogr");
            let output = Command::new(&self.bin)
                .arg("-s_srs")
                .arg(format!("EPSG:{source_epsg}"))
                .arg("-t_srs")
                .arg(format!("EPSG:{WGS84_EPSG}"))
                .arg("-f")
                .arg("GeoJSON")
                .arg("/dev/stdout")
                .arg(input)
                .output()
                .await
                .map_err(|e| ReprojectError::Spawn {
                    command: self.bin.clone(),
                    message: e.to_string(),
                })?;

            if output.status.success() {
                return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
            }
            Err(ReprojectError::Failed {
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Ogr2Ogr, ReprojectError, Reprojector};
    use std::path::Path;

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let ogr = Ogr2Ogr::new("/nonexistent/ogr2ogr");
        let err = ogr
            .to_wgs84(2154, Path::new("/tmp/none.geojson"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReprojectError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        // `false` ignores its arguments and exits 1 without output.
        let ogr = Ogr2Ogr::new("false");
        let err = ogr
            .to_wgs84(2154, Path::new("/tmp/none.geojson"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ReprojectError::Failed {
                stderr: String::new()
            }
        );
    }
}
