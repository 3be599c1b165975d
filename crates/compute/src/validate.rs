//! Request parameter validation for terrain jobs.
//!
//! Everything here runs on the request path before a job is queued; a
//! rejected parameter never reaches the raster engine.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use foundation::bounds::Aabb2;
use foundation::{ServiceError, ServiceResult};

use crate::dem::DemExtent;

/// Observer positions in DEM coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum Observers {
    /// A bare `lat,lon`.
    Single([f64; 2]),
    /// A parenthesized `(lat,lon),(lat,lon),...` list, even of length one.
    Multiple(Vec<[f64; 2]>),
}

/// Civil date and time fields as sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilDateTime {
    pub year: i64,
    pub month: i64,
    pub day: i64,
    pub hour: i64,
    pub minute: i64,
}

impl CivilDateTime {
    /// Ordinal day (1..=366); impossible dates are rejected.
    pub fn day_of_year(&self) -> ServiceResult<u32> {
        let invalid = || {
            ServiceError::invalid(format!(
                "invalid date {}-{}-{}",
                self.year, self.month, self.day
            ))
        };
        let year = i32::try_from(self.year).map_err(|_| invalid())?;
        let month = u32::try_from(self.month).map_err(|_| invalid())?;
        let day = u32::try_from(self.day).map_err(|_| invalid())?;
        NaiveDate::from_ymd_opt(year, month, day)
            .map(|d| d.ordinal())
            .ok_or_else(invalid)
    }

    /// Hour of day with minutes as a fraction, e.g. 14:30 → 14.5.
    pub fn fractional_hour(&self) -> f64 {
        self.hour as f64 + self.minute as f64 / 60.0
    }
}

#[derive(Debug, Clone)]
pub struct CoordinateValidator {
    dem: Arc<DemExtent>,
}

impl CoordinateValidator {
    pub fn new(dem: Arc<DemExtent>) -> Self {
        Self { dem }
    }

    pub fn dem(&self) -> &DemExtent {
        &self.dem
    }

    /// `xmin,ymin,xmax,ymax` in WGS84 lon/lat → the region in DEM
    /// coordinates. The envelope of the four reprojected corners must lie
    /// strictly inside the DEM extent.
    pub fn validate_region(&self, raw: Option<&str>) -> ServiceResult<Option<Aabb2>> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        let requested: Aabb2 = raw.parse()?;
        if !(requested.min[0] < requested.max[0] && requested.min[1] < requested.max[1]) {
            return Err(ServiceError::invalid(format!(
                "region '{raw}' is empty or inverted"
            )));
        }

        let corners = [
            [requested.min[0], requested.min[1]],
            [requested.max[0], requested.min[1]],
            [requested.max[0], requested.max[1]],
            [requested.min[0], requested.max[1]],
        ];
        let mut projected = Vec::with_capacity(corners.len());
        for [lon, lat] in corners {
            let (x, y) = self
                .dem
                .to_dem()
                .transform(lon, lat)
                .map_err(|e| ServiceError::OutOfBounds(e.to_string()))?;
            projected.push([x, y]);
        }
        let region = Aabb2::enclosing(&projected)
            .ok_or_else(|| ServiceError::invalid(format!("invalid region '{raw}'")))?;

        if !self.dem.bounds().contains_strictly(&region) {
            return Err(ServiceError::OutOfBounds(format!(
                "Requested region [{}, {}, {}, {}] is outside the allowed region {}",
                region.min[0],
                region.min[1],
                region.max[0],
                region.max[1],
                self.allowed()
            )));
        }
        Ok(Some(region))
    }

    /// One `lat,lon` or a list `(lat,lon),(lat,lon),...`, each projected into
    /// DEM coordinates and required to lie strictly inside the extent.
    pub fn validate_points(&self, raw: &str) -> ServiceResult<Observers> {
        let raw = raw.trim();
        if let Some(inner) = raw.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
            let points = inner
                .split("),(")
                .map(|p| self.validate_point(p))
                .collect::<ServiceResult<Vec<_>>>()?;
            return Ok(Observers::Multiple(points));
        }
        Ok(Observers::Single(self.validate_point(raw)?))
    }

    fn validate_point(&self, raw: &str) -> ServiceResult<[f64; 2]> {
        let invalid =
            || ServiceError::invalid(format!("invalid coordinates '{raw}', expected 'lat,lon'"));
        let parts = raw
            .split(',')
            .map(|p| p.trim().parse::<f64>().map_err(|_| invalid()))
            .collect::<ServiceResult<Vec<f64>>>()?;
        let [lat, lon] = parts.as_slice() else {
            return Err(invalid());
        };

        let (x, y) = self
            .dem
            .to_dem()
            .transform(*lon, *lat)
            .map_err(|e| ServiceError::OutOfBounds(e.to_string()))?;
        if !self.dem.bounds().contains_point_strictly(x, y) {
            return Err(ServiceError::OutOfBounds(format!(
                "Requested point [{x}, {y}] is outside the allowed region {}",
                self.allowed()
            )));
        }
        Ok([x, y])
    }

    fn allowed(&self) -> String {
        format!(
            "(xmin={}, xmax={}, ymin={}, ymax={})",
            self.dem.west, self.dem.east, self.dem.south, self.dem.north
        )
    }
}

/// A finite number.
pub fn validate_number(name: &str, raw: &str) -> ServiceResult<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ServiceError::invalid(format!("invalid number '{raw}' for '{name}'")))
}

fn validate_integer(name: &str, raw: &str) -> ServiceResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ServiceError::invalid(format!("invalid integer '{raw}' for '{name}'")))
}

pub fn validate_datetime(
    year: &str,
    month: &str,
    day: &str,
    hour: &str,
    minute: &str,
) -> ServiceResult<CivilDateTime> {
    Ok(CivilDateTime {
        year: validate_integer("year", year)?,
        month: validate_integer("month", month)?,
        day: validate_integer("day", day)?,
        hour: validate_integer("hour", hour)?,
        minute: validate_integer("minute", minute)?,
    })
}

/// Timezone offset in whole hours, 0..=25; absent means 1.
pub fn validate_timezone(raw: Option<&str>) -> ServiceResult<i64> {
    let Some(raw) = raw else {
        return Ok(1);
    };
    let tz = validate_integer("timezone", raw)?;
    if !(0..=25).contains(&tz) {
        return Err(ServiceError::invalid("Invalid timezone"));
    }
    Ok(tz)
}

/// The `sun` flag: absent or `false` (any case) is false, anything else true.
pub fn validate_flag(raw: Option<&str>) -> bool {
    raw.is_some_and(|v| !v.eq_ignore_ascii_case("false"))
}
