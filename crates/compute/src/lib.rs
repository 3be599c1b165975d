pub mod dem;
pub mod engine;
pub mod geometry;
pub mod job;
pub mod raster;
pub mod reproject;
pub mod runner;
pub mod validate;
pub mod vectorize;

pub use dem::{DemError, DemExtent};
pub use engine::{EngineError, GrassEngine, RasterCommand, RasterEngine};
pub use geometry::GeometryEngine;
pub use job::{JobKind, JobRequest, JobState};
pub use reproject::{Ogr2Ogr, ReprojectError, Reprojector};
pub use runner::{RasterSession, TerrainJobRunner};
pub use validate::CoordinateValidator;
