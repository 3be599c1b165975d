//! Raster → polygon conversion.
//!
//! Each maximal 4-connected run of cells with the same value becomes one
//! polygon; null cells never produce a polygon. Boundaries are traced along
//! cell edges with the region on the left, so exterior rings come out
//! counter-clockwise and holes clockwise. Where a region touches itself only
//! at a corner, tracing turns right, which splits the boundary into separate
//! rings that share that one vertex.

use std::collections::HashMap;

use formats::RasterGrid;
use foundation::math::precision::same_cell_value;
use geo::{Coord, LineString, Polygon};

/// One vectorized region.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub value: f64,
    pub polygon: Polygon<f64>,
}

const UNLABELED: usize = usize::MAX;

/// Polygons for every region whose value passes `keep`, in row-major order
/// of each region's first cell.
pub fn polygonize(grid: &RasterGrid, keep: impl Fn(f64) -> bool) -> Vec<Shape> {
    let (labels, components) = label_components(grid);
    let mut shapes = Vec::new();
    for (label, cells) in components.iter().enumerate() {
        let value = grid.cells()[cells[0]];
        if !keep(value) {
            continue;
        }
        for polygon in trace_component(grid, &labels, label, cells) {
            shapes.push(Shape { value, polygon });
        }
    }
    shapes
}

fn label_components(grid: &RasterGrid) -> (Vec<usize>, Vec<Vec<usize>>) {
    let (rows, cols) = (grid.rows, grid.cols);
    let values = grid.cells();
    let mut labels = vec![UNLABELED; values.len()];
    let mut components: Vec<Vec<usize>> = Vec::new();

    for seed in 0..values.len() {
        if labels[seed] != UNLABELED || values[seed].is_nan() {
            continue;
        }
        let label = components.len();
        let value = values[seed];
        let mut cells = Vec::new();
        let mut stack = vec![seed];
        labels[seed] = label;

        while let Some(idx) = stack.pop() {
            cells.push(idx);
            let (r, c) = (idx / cols, idx % cols);
            let neighbours = [
                (r > 0).then(|| idx - cols),
                (r + 1 < rows).then(|| idx + cols),
                (c > 0).then(|| idx - 1),
                (c + 1 < cols).then(|| idx + 1),
            ];
            for n in neighbours.into_iter().flatten() {
                if labels[n] == UNLABELED && same_cell_value(values[n], value) {
                    labels[n] = label;
                    stack.push(n);
                }
            }
        }
        cells.sort_unstable();
        components.push(cells);
    }
    (labels, components)
}

/// Grid vertex `(col, row)`; row 0 is the northern edge.
type Vertex = (usize, usize);

#[derive(Debug, Copy, Clone)]
struct Edge {
    from: Vertex,
    to: Vertex,
    dir: (i8, i8),
}

fn trace_component(
    grid: &RasterGrid,
    labels: &[usize],
    label: usize,
    cells: &[usize],
) -> Vec<Polygon<f64>> {
    let (rows, cols) = (grid.rows, grid.cols);
    let inside = |r: usize, c: usize| r < rows && c < cols && labels[r * cols + c] == label;

    let mut edges: Vec<Edge> = Vec::new();
    for &idx in cells {
        let (r, c) = (idx / cols, idx % cols);
        if !inside(r + 1, c) {
            edges.push(Edge {
                from: (c, r + 1),
                to: (c + 1, r + 1),
                dir: (1, 0),
            });
        }
        if !inside(r, c + 1) {
            edges.push(Edge {
                from: (c + 1, r + 1),
                to: (c + 1, r),
                dir: (0, -1),
            });
        }
        if r == 0 || !inside(r - 1, c) {
            edges.push(Edge {
                from: (c + 1, r),
                to: (c, r),
                dir: (-1, 0),
            });
        }
        if c == 0 || !inside(r, c - 1) {
            edges.push(Edge {
                from: (c, r),
                to: (c, r + 1),
                dir: (0, 1),
            });
        }
    }

    let mut outgoing: HashMap<Vertex, Vec<usize>> = HashMap::new();
    for (i, e) in edges.iter().enumerate() {
        outgoing.entry(e.from).or_default().push(i);
    }

    let mut used = vec![false; edges.len()];
    let mut exteriors: Vec<LineString<f64>> = Vec::new();
    let mut holes: Vec<LineString<f64>> = Vec::new();

    for start in 0..edges.len() {
        if used[start] {
            continue;
        }
        let mut corners: Vec<Vertex> = Vec::new();
        let mut current = start;
        let closed = loop {
            used[current] = true;
            let edge = edges[current];
            let Some(next) = next_edge(&edges, &outgoing, &edge) else {
                break false;
            };
            if edges[next].dir != edge.dir {
                corners.push(edge.to);
            }
            if next == start {
                break true;
            }
            current = next;
        };
        if !closed || corners.len() < 4 {
            continue;
        }

        let mut coords: Vec<Coord<f64>> = corners
            .iter()
            .map(|&(c, r)| Coord {
                x: grid.x_at(c),
                y: grid.y_at(r),
            })
            .collect();
        coords.push(coords[0]);
        let ring = LineString::new(coords);
        if signed_area(&ring) > 0.0 {
            exteriors.push(ring);
        } else {
            holes.push(ring);
        }
    }

    assign_holes(exteriors, holes)
}

/// The boundary edge leaving `edge.to`, preferring a right turn, then
/// straight on, then a left turn.
fn next_edge(
    edges: &[Edge],
    outgoing: &HashMap<Vertex, Vec<usize>>,
    edge: &Edge,
) -> Option<usize> {
    let candidates = outgoing.get(&edge.to)?;
    let (dc, dr) = edge.dir;
    let preference = [(-dr, dc), (dc, dr), (dr, -dc)];
    preference.iter().find_map(|dir| {
        candidates
            .iter()
            .copied()
            .find(|&i| edges[i].dir == *dir)
    })
}

fn signed_area(ring: &LineString<f64>) -> f64 {
    let twice: f64 = ring
        .lines()
        .map(|l| l.start.x * l.end.y - l.end.x * l.start.y)
        .sum();
    twice * 0.5
}

fn ring_bounds(ring: &LineString<f64>) -> [f64; 4] {
    ring.coords().fold(
        [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY],
        |b, c| [b[0].min(c.x), b[1].min(c.y), b[2].max(c.x), b[3].max(c.y)],
    )
}

/// Attach each hole to the smallest exterior whose bounds enclose it.
fn assign_holes(exteriors: Vec<LineString<f64>>, holes: Vec<LineString<f64>>) -> Vec<Polygon<f64>> {
    let ext_bounds: Vec<[f64; 4]> = exteriors.iter().map(ring_bounds).collect();
    let ext_areas: Vec<f64> = exteriors.iter().map(signed_area).collect();
    let mut interiors: Vec<Vec<LineString<f64>>> = vec![Vec::new(); exteriors.len()];

    for hole in holes {
        let hb = ring_bounds(&hole);
        let owner = ext_bounds
            .iter()
            .enumerate()
            .filter(|(_, b)| b[0] <= hb[0] && b[1] <= hb[1] && b[2] >= hb[2] && b[3] >= hb[3])
            .min_by(|(a, _), (b, _)| ext_areas[*a].total_cmp(&ext_areas[*b]))
            .map(|(i, _)| i);
        if let Some(i) = owner {
            interiors[i].push(hole);
        }
    }

    exteriors
        .into_iter()
        .zip(interiors)
        .map(|(exterior, interiors)| Polygon::new(exterior, interiors))
        .collect()
}
