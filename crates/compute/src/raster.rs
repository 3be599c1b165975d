//! Cell-wise raster transforms applied between export and vectorization.

use formats::RasterGrid;
use foundation::{ServiceError, ServiceResult};

/// Per-cell OR of binary visibility grids: 1 if any grid sees the cell,
/// 0 if none does but at least one has a value, null otherwise.
pub fn merge_or(grids: &[RasterGrid]) -> ServiceResult<RasterGrid> {
    let Some(first) = grids.first() else {
        return Err(ServiceError::ComputationFailed(
            "no rasters to merge".to_string(),
        ));
    };
    if let Some(other) = grids.iter().find(|g| !g.is_aligned_with(first)) {
        return Err(ServiceError::ComputationFailed(format!(
            "cannot merge rasters on different grids ({}x{} vs {}x{})",
            first.rows, first.cols, other.rows, other.cols
        )));
    }

    let cells = (0..first.cells().len())
        .map(|i| {
            let mut merged = f64::NAN;
            for grid in grids {
                let v = grid.cells()[i];
                if v == 1.0 {
                    return 1.0;
                }
                if !v.is_nan() {
                    merged = 0.0;
                }
            }
            merged
        })
        .collect();
    first
        .with_cells(cells)
        .map_err(|e| ServiceError::ComputationFailed(e.to_string()))
}

/// Sun incidence normalized for thresholding: null → 0, values ≥ 1 → 1.
pub fn clamp_incidence(grid: &RasterGrid) -> ServiceResult<RasterGrid> {
    let cells = grid
        .cells()
        .iter()
        .map(|v| {
            if v.is_nan() {
                0.0
            } else if *v >= 1.0 {
                1.0
            } else {
                *v
            }
        })
        .collect();
    grid.with_cells(cells)
        .map_err(|e| ServiceError::ComputationFailed(e.to_string()))
}
