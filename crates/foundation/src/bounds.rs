use std::str::FromStr;

use crate::error::ServiceError;

/// Axis-aligned bounding box in a planar coordinate system.
///
/// Intersection uses closed intervals: boxes that only share an edge or a
/// corner intersect. Containment checks are strict (open interval).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb2 {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl Aabb2 {
    pub fn new(min: [f64; 2], max: [f64; 2]) -> Self {
        Aabb2 { min, max }
    }

    /// Build from `xmin, ymin, xmax, ymax`.
    pub fn from_extent(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Aabb2::new([xmin, ymin], [xmax, ymax])
    }

    /// Smallest box enclosing all `points`, or `None` for an empty slice.
    pub fn enclosing(points: &[[f64; 2]]) -> Option<Self> {
        let first = points.first()?;
        let mut b = Aabb2::new(*first, *first);
        for p in &points[1..] {
            b.min[0] = b.min[0].min(p[0]);
            b.min[1] = b.min[1].min(p[1]);
            b.max[0] = b.max[0].max(p[0]);
            b.max[1] = b.max[1].max(p[1]);
        }
        Some(b)
    }

    pub fn width(&self) -> f64 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> f64 {
        self.max[1] - self.min[1]
    }

    pub fn intersects(&self, other: &Aabb2) -> bool {
        self.min[0] <= other.max[0]
            && self.max[0] >= other.min[0]
            && self.min[1] <= other.max[1]
            && self.max[1] >= other.min[1]
    }

    /// `other` lies inside `self` without touching any edge.
    pub fn contains_strictly(&self, other: &Aabb2) -> bool {
        other.min[0] > self.min[0]
            && other.max[0] < self.max[0]
            && other.min[1] > self.min[1]
            && other.max[1] < self.max[1]
    }

    pub fn contains_point_strictly(&self, x: f64, y: f64) -> bool {
        x > self.min[0] && x < self.max[0] && y > self.min[1] && y < self.max[1]
    }

    pub fn union(&self, other: &Aabb2) -> Aabb2 {
        Aabb2::new(
            [self.min[0].min(other.min[0]), self.min[1].min(other.min[1])],
            [self.max[0].max(other.max[0]), self.max[1].max(other.max[1])],
        )
    }

    pub fn center(&self) -> [f64; 2] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
        ]
    }
}

/// Parses `xmin,ymin,xmax,ymax`: exactly four comma-separated floats.
impl FromStr for Aabb2 {
    type Err = ServiceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            ServiceError::invalid(format!(
                "invalid bounding box '{raw}', expected 'xmin,ymin,xmax,ymax'"
            ))
        };
        let parts = raw
            .split(',')
            .map(|p| p.trim().parse::<f64>().map_err(|_| invalid()))
            .collect::<Result<Vec<f64>, _>>()?;
        match parts.as_slice() {
            [xmin, ymin, xmax, ymax] => Ok(Aabb2::from_extent(*xmin, *ymin, *xmax, *ymax)),
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Aabb2;
    use crate::error::ServiceError;

    #[test]
    fn touching_boxes_intersect() {
        let a = Aabb2::from_extent(0.0, 0.0, 1.0, 1.0);
        let b = Aabb2::from_extent(1.0, 1.0, 2.0, 2.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&Aabb2::from_extent(1.5, 0.0, 2.0, 1.0)));
    }

    #[test]
    fn strict_containment_rejects_shared_edges() {
        let outer = Aabb2::from_extent(0.0, 0.0, 10.0, 10.0);
        assert!(outer.contains_strictly(&Aabb2::from_extent(1.0, 1.0, 9.0, 9.0)));
        assert!(!outer.contains_strictly(&Aabb2::from_extent(0.0, 1.0, 9.0, 9.0)));
        assert!(!outer.contains_strictly(&Aabb2::from_extent(1.0, 1.0, 9.0, 10.0)));
        assert!(!outer.contains_point_strictly(10.0, 5.0));
    }

    #[test]
    fn enclosing_covers_all_points() {
        let b = Aabb2::enclosing(&[[3.0, -1.0], [-2.0, 4.0], [0.0, 0.0]]).unwrap();
        assert_eq!(b, Aabb2::from_extent(-2.0, -1.0, 3.0, 4.0));
        assert!(Aabb2::enclosing(&[]).is_none());
    }

    #[test]
    fn parses_exactly_four_components() {
        let b: Aabb2 = "0, 0,10,10".parse().unwrap();
        assert_eq!(b, Aabb2::from_extent(0.0, 0.0, 10.0, 10.0));
        for bad in ["0,0,10", "0,0,10,10,3", "a,0,1,1", ""] {
            assert!(matches!(
                bad.parse::<Aabb2>(),
                Err(ServiceError::InvalidArgument(_))
            ));
        }
    }
}
