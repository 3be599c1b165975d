//! Port to the external raster GIS engine.
//!
//! The job runner is the only caller. Commands are plain data so tests can
//! substitute an in-memory engine and assert on what was issued.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use foundation::JobId;
use foundation::bounds::Aabb2;
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::dem::DemExtent;

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("{command} failed to start: {message}")]
    Spawn { command: String, message: String },
    #[error("{command} failed: {stderr}")]
    Failed { command: String, stderr: String },
}

/// One engine module invocation: `name [-flags] key=value ...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterCommand {
    pub name: String,
    pub flags: String,
    pub args: Vec<(String, String)>,
}

impl RasterCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: String::new(),
            args: Vec::new(),
        }
    }

    pub fn flag(mut self, flag: char) -> Self {
        self.flags.push(flag);
        self
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.args.push((key.into(), value.to_string()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Command-line words after the module name.
    pub fn to_args(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.args.len() + 1);
        if !self.flags.is_empty() {
            out.push(format!("-{}", self.flags));
        }
        out.extend(self.args.iter().map(|(k, v)| format!("{k}={v}")));
        out
    }

    /// `g.region` to `bounds` at the DEM resolution.
    pub fn set_region(bounds: &Aabb2, dem: &DemExtent) -> Self {
        RasterCommand::new("g.region")
            .arg("n", bounds.max[1])
            .arg("s", bounds.min[1])
            .arg("e", bounds.max[0])
            .arg("w", bounds.min[0])
            .arg("nsres", dem.nsres)
            .arg("ewres", dem.ewres)
    }

    /// Export a raster as a GRASS ASCII grid file.
    pub fn export_ascii(raster: &str, output: &Path) -> Self {
        RasterCommand::new("r.out.ascii")
            .arg("input", raster)
            .arg("output", output.display())
            .arg("null_value", "*")
    }

    pub fn remove_raster(raster: &str) -> Self {
        RasterCommand::new("g.remove")
            .flag('f')
            .arg("type", "raster")
            .arg("name", raster)
    }
}

impl fmt::Display for RasterCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for word in self.to_args() {
            write!(f, " {word}")?;
        }
        Ok(())
    }
}

/// Raster engine port.
///
/// Implementations must be `Send + Sync` for use across async tasks.
pub trait RasterEngine: Send + Sync {
    /// Run one command and return its standard output.
    fn run(&self, command: RasterCommand) -> BoxFuture<'_, Result<String, EngineError>>;
}

/// GRASS GIS driven through `grass <mapset> --exec`.
///
/// The GIS database lives in a temporary directory owned by the engine and
/// removed when it is dropped.
pub struct GrassEngine {
    grass_bin: String,
    mapset: PathBuf,
    _gisdb: TempDir,
}

impl GrassEngine {
    /// Create a throwaway location in the DEM's CRS, link the DEM into it as
    /// `dem_raster` and set the region to the full DEM extent.
    pub async fn bootstrap(
        grass_bin: &str,
        scratch: Option<&Path>,
        dem: &DemExtent,
        dem_raster: &str,
    ) -> Result<Self, EngineError> {
        let spawn_err = |e: std::io::Error| EngineError::Spawn {
            command: grass_bin.to_string(),
            message: e.to_string(),
        };
        let mut builder = tempfile::Builder::new();
        builder.prefix("grassdata");
        let gisdb = match scratch {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
        .map_err(spawn_err)?;

        let location = gisdb.path().join(JobId::new().artifact("location"));
        let output = Command::new(grass_bin)
            .arg("-c")
            .arg(format!("EPSG:{}", dem.epsg))
            .arg("-e")
            .arg(&location)
            .output()
            .await
            .map_err(spawn_err)?;
        if !output.status.success() {
            return Err(EngineError::Failed {
                command: format!("{grass_bin} -c EPSG:{}", dem.epsg),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        info!(location = %location.display(), "created GRASS location");

        let engine = Self {
            grass_bin: grass_bin.to_string(),
            mapset: location.join("PERMANENT"),
            _gisdb: gisdb,
        };
        engine
            .run(
                RasterCommand::new("r.external")
                    .flag('o')
                    .arg("input", dem.path.display())
                    .arg("band", 1)
                    .arg("output", dem_raster),
            )
            .await?;
        engine
            .run(RasterCommand::set_region(&dem.bounds(), dem))
            .await?;
        info!(raster = dem_raster, "DEM linked and region set");
        Ok(engine)
    }
}

impl RasterEngine for GrassEngine {
    fn run(&self, command: RasterCommand) -> BoxFuture<'_, Result<String, EngineError>> {
        Box::pin(async move {
            debug!(%command, "grass --exec");
            let output = Command::new(&self.grass_bin)
                .arg(&self.mapset)
                .arg("--exec")
                .arg(&command.name)
                .args(command.to_args())
                .output()
                .await
                .map_err(|e| EngineError::Spawn {
                    command: command.name.clone(),
                    message: e.to_string(),
                })?;

            if output.status.success() {
                return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
            }
            Err(EngineError::Failed {
                command: command.name,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}
