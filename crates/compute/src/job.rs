use std::fmt;

use foundation::bounds::Aabb2;

use crate::validate::CivilDateTime;

/// One terrain analysis, fully validated.
#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    Viewshed {
        observer: [f64; 2],
        observer_elevation: f64,
        target_elevation: f64,
    },
    /// Several observers; a cell is visible if any observer sees it.
    ViewshedMulti {
        observers: Vec<[f64; 2]>,
        observer_elevation: f64,
        target_elevation: f64,
    },
    Sunmask {
        datetime: CivilDateTime,
        timezone: i64,
        /// Answer the sunlit area instead of the shadows.
        sun: bool,
    },
    Sun {
        day_of_year: u32,
        /// Fractional hour of day.
        time: f64,
        timezone: i64,
        sun: bool,
    },
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Viewshed { .. } => "viewshed",
            JobKind::ViewshedMulti { .. } => "viewshed_multi",
            JobKind::Sunmask { .. } => "sunmask",
            JobKind::Sun { .. } => "sun",
        }
    }

    /// Name of the single property carried by each output feature.
    pub fn property(&self) -> &'static str {
        match self {
            JobKind::Viewshed { .. } | JobKind::ViewshedMulti { .. } => "visibility",
            JobKind::Sunmask { sun: false, .. } => "shadow",
            JobKind::Sunmask { sun: true, .. } | JobKind::Sun { .. } => "sun",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub kind: JobKind,
    /// Sub-rectangle in DEM coordinates; `None` is the full extent.
    pub region: Option<Aabb2>,
}

/// Progress of a job, logged at each transition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JobState {
    Validated,
    RegionClamped,
    Computed,
    Vectorized,
    Reprojected,
    Cleaned,
    Done,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobState::Validated => "validated",
            JobState::RegionClamped => "region_clamped",
            JobState::Computed => "computed",
            JobState::Vectorized => "vectorized",
            JobState::Reprojected => "reprojected",
            JobState::Cleaned => "cleaned",
            JobState::Done => "done",
            JobState::Failed => "failed",
        })
    }
}
