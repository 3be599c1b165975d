//! Coordinate reference systems and point transforms.
//!
//! CRS definitions are looked up by EPSG code and evaluated with `proj4rs`.
//! Geographic CRSs take and return degrees; `proj4rs` works in radians, so
//! the conversion happens here and nowhere else.

use std::fmt;
use std::sync::Arc;

use proj4rs::proj::Proj;
use thiserror::Error;

pub const WGS84_EPSG: u16 = 4326;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CrsError {
    #[error("unknown CRS EPSG:{0}")]
    UnknownEpsg(u16),
    #[error("invalid definition for EPSG:{code}: {message}")]
    Definition { code: u16, message: String },
    #[error("cannot transform ({x}, {y}) from EPSG:{from} to EPSG:{to}: {message}")]
    Transform {
        x: f64,
        y: f64,
        from: u16,
        to: u16,
        message: String,
    },
}

/// A coordinate reference system identified by its EPSG code.
#[derive(Clone)]
pub struct Crs {
    epsg: u16,
    definition: &'static str,
    geographic: bool,
    proj: Arc<Proj>,
}

impl Crs {
    pub fn from_epsg(code: u16) -> Result<Self, CrsError> {
        let def = crs_definitions::from_code(code).ok_or(CrsError::UnknownEpsg(code))?;
        let proj = Proj::from_proj_string(def.proj4).map_err(|e| CrsError::Definition {
            code,
            message: format!("{e:?}"),
        })?;
        let geographic =
            def.proj4.contains("+proj=longlat") || def.proj4.contains("+proj=latlong");
        Ok(Crs {
            epsg: code,
            definition: def.proj4,
            geographic,
            proj: Arc::new(proj),
        })
    }

    pub fn wgs84() -> Result<Self, CrsError> {
        Crs::from_epsg(WGS84_EPSG)
    }

    pub fn epsg(&self) -> u16 {
        self.epsg
    }

    pub fn is_geographic(&self) -> bool {
        self.geographic
    }
}

impl fmt::Debug for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crs")
            .field("epsg", &self.epsg)
            .field("definition", &self.definition)
            .finish()
    }
}

/// A fixed source → target point transform.
#[derive(Clone, Debug)]
pub struct Transformer {
    source: Crs,
    target: Crs,
}

impl Transformer {
    pub fn new(source: Crs, target: Crs) -> Self {
        Transformer { source, target }
    }

    pub fn from_epsg(source: u16, target: u16) -> Result<Self, CrsError> {
        Ok(Transformer::new(
            Crs::from_epsg(source)?,
            Crs::from_epsg(target)?,
        ))
    }

    /// The same pair of systems, reversed.
    pub fn inverse(&self) -> Transformer {
        Transformer::new(self.target.clone(), self.source.clone())
    }

    /// Transform one `(x, y)` pair. Geographic coordinates are `(lon, lat)`
    /// in degrees.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), CrsError> {
        if self.source.epsg == self.target.epsg {
            return Ok((x, y));
        }

        let mut point = if self.source.geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        proj4rs::transform::transform(&self.source.proj, &self.target.proj, &mut point).map_err(
            |e| CrsError::Transform {
                x,
                y,
                from: self.source.epsg,
                to: self.target.epsg,
                message: format!("{e:?}"),
            },
        )?;

        let (tx, ty) = if self.target.geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };

        if !tx.is_finite() || !ty.is_finite() {
            return Err(CrsError::Transform {
                x,
                y,
                from: self.source.epsg,
                to: self.target.epsg,
                message: "non-finite result".to_string(),
            });
        }
        Ok((tx, ty))
    }
}

#[cfg(test)]
mod tests {
    use super::{Crs, CrsError, Transformer, WGS84_EPSG};

    fn assert_close(a: f64, b: f64, eps: f64) {
        let diff = (a - b).abs();
        assert!(diff <= eps, "expected {a} ~= {b} (diff {diff})");
    }

    #[test]
    fn identity_transform_is_exact() {
        let t = Transformer::from_epsg(WGS84_EPSG, WGS84_EPSG).unwrap();
        assert_eq!(t.transform(5.5, 45.1).unwrap(), (5.5, 45.1));
    }

    #[test]
    fn lambert93_origin_round_trips() {
        // Lambert-93 false origin: lon 3°E, lat 46.5°N maps to (700000, 6600000).
        let t = Transformer::from_epsg(WGS84_EPSG, 2154).unwrap();
        let (x, y) = t.transform(3.0, 46.5).unwrap();
        assert_close(x, 700_000.0, 1.0);
        assert_close(y, 6_600_000.0, 1.0);

        let (lon, lat) = t.inverse().transform(x, y).unwrap();
        assert_close(lon, 3.0, 1e-7);
        assert_close(lat, 46.5, 1e-7);
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert_eq!(Crs::from_epsg(1).unwrap_err(), CrsError::UnknownEpsg(1));
        assert!(Crs::wgs84().unwrap().is_geographic());
    }
}
