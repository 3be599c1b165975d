//! GRASS ASCII raster grid codec (`r.out.ascii` / `r.in.ascii` format).
//!
//! ```text
//! north: 20
//! south: 0
//! east: 30
//! west: 0
//! rows: 2
//! cols: 3
//! 1 0 *
//! 1 1 0
//! ```
//!
//! Null cells (`*` unless the header declares another `null:` token) decode
//! to NaN and encode back to `*`.

use std::fmt::Write as _;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridError {
    #[error("cannot read {path}: {message}")]
    Io { path: String, message: String },
    #[error("missing header field '{0}'")]
    MissingHeader(&'static str),
    #[error("invalid header line '{0}'")]
    InvalidHeader(String),
    #[error("invalid cell value '{value}' at row {row}")]
    InvalidCell { row: usize, value: String },
    #[error("expected {expected} cells, found {found}")]
    CellCount { expected: usize, found: usize },
    #[error("degenerate grid extent")]
    DegenerateExtent,
}

/// A row-major raster grid; row 0 is the northern edge.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGrid {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
    pub rows: usize,
    pub cols: usize,
    cells: Vec<f64>,
}

impl RasterGrid {
    pub fn new(
        north: f64,
        south: f64,
        east: f64,
        west: f64,
        rows: usize,
        cols: usize,
        cells: Vec<f64>,
    ) -> Result<Self, GridError> {
        if rows * cols != cells.len() {
            return Err(GridError::CellCount {
                expected: rows * cols,
                found: cells.len(),
            });
        }
        if rows == 0 || cols == 0 || north <= south || east <= west {
            return Err(GridError::DegenerateExtent);
        }
        Ok(Self {
            north,
            south,
            east,
            west,
            rows,
            cols,
            cells,
        })
    }

    /// A grid with the same georeferencing as `self` and new cell values.
    pub fn with_cells(&self, cells: Vec<f64>) -> Result<Self, GridError> {
        Self::new(
            self.north, self.south, self.east, self.west, self.rows, self.cols, cells,
        )
    }

    pub fn read(path: &Path) -> Result<Self, GridError> {
        let text = std::fs::read_to_string(path).map_err(|e| GridError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, GridError> {
        let mut north = None;
        let mut south = None;
        let mut east = None;
        let mut west = None;
        let mut rows = None;
        let mut cols = None;
        let mut null_token = "*".to_string();

        let mut lines = text.lines().peekable();
        while let Some(line) = lines.peek() {
            let Some((key, value)) = line.split_once(':') else {
                break;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            let bad = || GridError::InvalidHeader(line.to_string());
            match key.as_str() {
                "north" => north = Some(value.parse::<f64>().map_err(|_| bad())?),
                "south" => south = Some(value.parse::<f64>().map_err(|_| bad())?),
                "east" => east = Some(value.parse::<f64>().map_err(|_| bad())?),
                "west" => west = Some(value.parse::<f64>().map_err(|_| bad())?),
                "rows" => rows = Some(value.parse::<usize>().map_err(|_| bad())?),
                "cols" => cols = Some(value.parse::<usize>().map_err(|_| bad())?),
                "null" => null_token = value.to_string(),
                "type" | "multiplier" => {}
                _ => return Err(bad()),
            }
            lines.next();
        }

        let rows = rows.ok_or(GridError::MissingHeader("rows"))?;
        let cols = cols.ok_or(GridError::MissingHeader("cols"))?;

        let mut cells = Vec::with_capacity(rows * cols);
        for (row, line) in lines.enumerate() {
            for token in line.split_whitespace() {
                if token == null_token || token == "*" {
                    cells.push(f64::NAN);
                    continue;
                }
                let v = token.parse::<f64>().map_err(|_| GridError::InvalidCell {
                    row,
                    value: token.to_string(),
                })?;
                cells.push(v);
            }
        }

        Self::new(
            north.ok_or(GridError::MissingHeader("north"))?,
            south.ok_or(GridError::MissingHeader("south"))?,
            east.ok_or(GridError::MissingHeader("east"))?,
            west.ok_or(GridError::MissingHeader("west"))?,
            rows,
            cols,
            cells,
        )
    }

    pub fn to_ascii_string(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "north: {}", self.north);
        let _ = writeln!(out, "south: {}", self.south);
        let _ = writeln!(out, "east: {}", self.east);
        let _ = writeln!(out, "west: {}", self.west);
        let _ = writeln!(out, "rows: {}", self.rows);
        let _ = writeln!(out, "cols: {}", self.cols);
        for row in self.cells.chunks(self.cols) {
            let line: Vec<String> = row
                .iter()
                .map(|v| {
                    if v.is_nan() {
                        "*".to_string()
                    } else {
                        v.to_string()
                    }
                })
                .collect();
            let _ = writeln!(out, "{}", line.join(" "));
        }
        out
    }

    pub fn cells(&self) -> &[f64] {
        &self.cells
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.cells[row * self.cols + col]
    }

    pub fn ewres(&self) -> f64 {
        (self.east - self.west) / self.cols as f64
    }

    pub fn nsres(&self) -> f64 {
        (self.north - self.south) / self.rows as f64
    }

    /// X of the vertical grid line `col` (0..=cols); the outer lines are exact.
    pub fn x_at(&self, col: usize) -> f64 {
        if col == self.cols {
            self.east
        } else {
            self.west + col as f64 * self.ewres()
        }
    }

    /// Y of the horizontal grid line `row` (0..=rows); the outer lines are exact.
    pub fn y_at(&self, row: usize) -> f64 {
        if row == self.rows {
            self.south
        } else {
            self.north - row as f64 * self.nsres()
        }
    }

    /// Same rows, columns and extent.
    pub fn is_aligned_with(&self, other: &RasterGrid) -> bool {
        self.rows == other.rows
            && self.cols == other.cols
            && self.north == other.north
            && self.south == other.south
            && self.east == other.east
            && self.west == other.west
    }
}

#[cfg(test)]
mod tests {
    use super::{GridError, RasterGrid};

    const SAMPLE: &str = "north: 20\nsouth: 0\neast: 30\nwest: 0\nrows: 2\ncols: 3\n1 0 *\n1 1 0.5\n";

    #[test]
    fn parses_header_and_nulls() {
        let g = RasterGrid::parse(SAMPLE).unwrap();
        assert_eq!((g.rows, g.cols), (2, 3));
        assert_eq!(g.ewres(), 10.0);
        assert_eq!(g.nsres(), 10.0);
        assert_eq!(g.get(0, 0), 1.0);
        assert!(g.get(0, 2).is_nan());
        assert_eq!(g.get(1, 2), 0.5);
        assert_eq!(g.x_at(3), 30.0);
        assert_eq!(g.y_at(2), 0.0);
    }

    #[test]
    fn custom_null_token_and_optional_fields() {
        let text = "north: 1\nsouth: 0\neast: 2\nwest: 0\nrows: 1\ncols: 2\nnull: -9999\ntype: float\n-9999 3\n";
        let g = RasterGrid::parse(text).unwrap();
        assert!(g.get(0, 0).is_nan());
        assert_eq!(g.get(0, 1), 3.0);
    }

    #[test]
    fn encoded_grid_parses_back() {
        let g = RasterGrid::parse(SAMPLE).unwrap();
        let again = RasterGrid::parse(&g.to_ascii_string()).unwrap();
        assert!(again.is_aligned_with(&g));
        assert!(again.get(0, 2).is_nan());
        assert_eq!(again.get(1, 2), 0.5);
    }

    #[test]
    fn rejects_wrong_cell_count_and_missing_header() {
        let short = "north: 1\nsouth: 0\neast: 1\nwest: 0\nrows: 1\ncols: 2\n1\n";
        assert_eq!(
            RasterGrid::parse(short).unwrap_err(),
            GridError::CellCount {
                expected: 2,
                found: 1
            }
        );
        let headless = "north: 1\nsouth: 0\neast: 1\nwest: 0\ncols: 1\n1\n";
        assert_eq!(
            RasterGrid::parse(headless).unwrap_err(),
            GridError::MissingHeader("rows")
        );
    }
}
