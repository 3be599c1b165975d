//! Binary predicates and set operations on client-supplied geometries.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use foundation::math::projection::{CrsError, Transformer, WGS84_EPSG};
use foundation::{ServiceError, ServiceResult};
use geo::{
    BooleanOps, Buffer, Coord, Geometry, LineString, MapCoords, MultiLineString, MultiPolygon,
    Relate,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Predicate {
    Intersects,
    Equals,
    Contains,
    Crosses,
    Overlaps,
    Touches,
    Within,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SetOperation {
    Buffer,
    Intersection,
    Difference,
    SymmetricDifference,
    UnaryUnion,
}

/// What `POST /{op}` names.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GeometryOp {
    Predicate(Predicate),
    Operation(SetOperation),
}

impl FromStr for GeometryOp {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use GeometryOp::{Operation, Predicate as P};
        Ok(match s {
            "intersects" => P(Predicate::Intersects),
            "equals" => P(Predicate::Equals),
            "contains" => P(Predicate::Contains),
            "crosses" => P(Predicate::Crosses),
            "overlaps" => P(Predicate::Overlaps),
            "touches" => P(Predicate::Touches),
            "within" => P(Predicate::Within),
            "buffer" => Operation(SetOperation::Buffer),
            "intersection" => Operation(SetOperation::Intersection),
            "difference" => Operation(SetOperation::Difference),
            "symmetric_difference" => Operation(SetOperation::SymmetricDifference),
            "unary_union" => Operation(SetOperation::UnaryUnion),
            other => return Err(ServiceError::UnknownOperation(other.to_string())),
        })
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Predicate::Intersects => "intersects",
            Predicate::Equals => "equals",
            Predicate::Contains => "contains",
            Predicate::Crosses => "crosses",
            Predicate::Overlaps => "overlaps",
            Predicate::Touches => "touches",
            Predicate::Within => "within",
        })
    }
}

/// `matrix[i][j]` is the predicate applied to `geoms1[i]` and `geoms2[j]`.
pub type PredicateMatrix = BTreeMap<usize, BTreeMap<usize, bool>>;

/// Buffer distances in metres, as sent with `buffer`.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct BufferOptions {
    /// Absent or zero: a plain buffer by `uncertainty`.
    pub distance: Option<f64>,
    pub uncertainty: f64,
}

/// Pure geometry computations; safe to run concurrently.
#[derive(Debug, Clone)]
pub struct GeometryEngine {
    to_metric: Transformer,
    to_wgs84: Transformer,
}

impl GeometryEngine {
    /// `buffer_epsg` is the projected CRS buffers are computed in.
    pub fn new(buffer_epsg: u16) -> Result<Self, CrsError> {
        let to_metric = Transformer::from_epsg(WGS84_EPSG, buffer_epsg)?;
        let to_wgs84 = to_metric.inverse();
        Ok(Self {
            to_metric,
            to_wgs84,
        })
    }

    pub fn predicate_matrix(
        &self,
        predicate: Predicate,
        geoms1: &[Geometry<f64>],
        geoms2: &[Geometry<f64>],
    ) -> PredicateMatrix {
        geoms1
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let row = geoms2
                    .iter()
                    .enumerate()
                    .map(|(j, b)| (j, evaluate(predicate, a, b)))
                    .collect();
                (i, row)
            })
            .collect()
    }

    pub fn operate(
        &self,
        op: SetOperation,
        geoms: &[Geometry<f64>],
        buffer: Option<BufferOptions>,
    ) -> ServiceResult<Geometry<f64>> {
        let result = match op {
            SetOperation::Buffer => {
                let options = buffer.ok_or_else(|| {
                    ServiceError::invalid("missing parameter 'uncertainty'")
                })?;
                self.buffer(geoms, options)?
            }
            SetOperation::UnaryUnion => union_all(polygonal(geoms)?),
            SetOperation::Intersection => {
                let mut polys = polygonal(geoms)?.into_iter();
                let first = polys.next().ok_or_else(|| {
                    ServiceError::invalid("intersection needs at least one geometry")
                })?;
                polys.fold(first, |acc, p| p.intersection(&acc))
            }
            SetOperation::Difference | SetOperation::SymmetricDifference => {
                let polys = polygonal(geoms)?;
                let [a, b, ..] = polys.as_slice() else {
                    return Err(ServiceError::invalid(
                        "difference needs at least two geometries",
                    ));
                };
                if op == SetOperation::Difference {
                    a.difference(b)
                } else {
                    a.xor(b)
                }
            }
        };
        Ok(simplify_collection(result))
    }

    fn buffer(
        &self,
        geoms: &[Geometry<f64>],
        options: BufferOptions,
    ) -> ServiceResult<MultiPolygon<f64>> {
        let mut zones = Vec::with_capacity(geoms.len());
        for geom in geoms {
            let metric = project(geom, &self.to_metric)?;
            let zone = match options.distance {
                Some(d) if d != 0.0 => {
                    let outline = boundary(&metric.buffer(d));
                    Geometry::MultiLineString(outline).buffer(options.uncertainty)
                }
                _ => metric.buffer(options.uncertainty),
            };
            zones.push(zone);
        }
        let merged = union_all(zones);
        match project(&Geometry::MultiPolygon(merged), &self.to_wgs84)? {
            Geometry::MultiPolygon(mp) => Ok(mp),
            _ => Err(ServiceError::ComputationFailed(
                "buffer produced a non-polygonal result".to_string(),
            )),
        }
    }
}

fn evaluate(predicate: Predicate, a: &Geometry<f64>, b: &Geometry<f64>) -> bool {
    let m = a.relate(b);
    match predicate {
        Predicate::Intersects => m.is_intersects(),
        Predicate::Equals => m.is_equal_topo(),
        Predicate::Contains => m.is_contains(),
        Predicate::Crosses => m.is_crosses(),
        Predicate::Overlaps => m.is_overlaps(),
        Predicate::Touches => m.is_touches(),
        Predicate::Within => m.is_within(),
    }
}

fn polygonal(geoms: &[Geometry<f64>]) -> ServiceResult<Vec<MultiPolygon<f64>>> {
    geoms
        .iter()
        .map(|g| match g {
            Geometry::Polygon(p) => Ok(MultiPolygon::new(vec![p.clone()])),
            Geometry::MultiPolygon(mp) => Ok(mp.clone()),
            Geometry::Rect(r) => Ok(MultiPolygon::new(vec![r.to_polygon()])),
            Geometry::Triangle(t) => Ok(MultiPolygon::new(vec![t.to_polygon()])),
            _ => Err(ServiceError::invalid(
                "geometric operations need Polygon or MultiPolygon geometries",
            )),
        })
        .collect()
}

fn union_all(polys: impl IntoIterator<Item = MultiPolygon<f64>>) -> MultiPolygon<f64> {
    polys
        .into_iter()
        .fold(MultiPolygon::new(Vec::new()), |acc, p| acc.union(&p))
}

fn boundary(mp: &MultiPolygon<f64>) -> MultiLineString<f64> {
    let rings: Vec<LineString<f64>> = mp
        .iter()
        .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
        .cloned()
        .collect();
    MultiLineString::new(rings)
}

/// A single polygon is answered as `Polygon`, anything else as `MultiPolygon`.
fn simplify_collection(mut mp: MultiPolygon<f64>) -> Geometry<f64> {
    if mp.0.len() == 1
        && let Some(p) = mp.0.pop()
    {
        return Geometry::Polygon(p);
    }
    Geometry::MultiPolygon(mp)
}

fn project(geom: &Geometry<f64>, transformer: &Transformer) -> ServiceResult<Geometry<f64>> {
    geom.try_map_coords(|c: Coord<f64>| {
        transformer
            .transform(c.x, c.y)
            .map(|(x, y)| Coord { x, y })
    })
    .map_err(|e| ServiceError::ComputationFailed(e.to_string()))
}
