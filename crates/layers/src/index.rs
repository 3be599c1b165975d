use foundation::bounds::Aabb2;
use foundation::math::precision::stable_total_cmp_f64;
use geo::BoundingRect;

/// A deterministic bounding volume hierarchy over the bounding boxes of one
/// feature layer.
///
/// Ordering contract:
/// - `query` returns layer positions in ascending order.
/// - `len()` equals the length of the layer the index was built from;
///   positions without bounds (empty or missing geometry) never match.
#[derive(Debug, Clone, Default)]
pub struct SpatialIndex {
    nodes: Vec<Node>,
    len: usize,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        bounds: Aabb2,
        items: Vec<Item>,
    },
    Internal {
        bounds: Aabb2,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct Item {
    position: usize,
    bounds: Aabb2,
}

const LEAF_MAX: usize = 8;

impl SpatialIndex {
    /// Build from per-position bounds.
    pub fn build(bounds: &[Option<Aabb2>]) -> Self {
        let mut items: Vec<Item> = bounds
            .iter()
            .enumerate()
            .filter_map(|(position, b)| b.map(|bounds| Item { position, bounds }))
            .collect();

        let mut nodes = Vec::new();
        if !items.is_empty() {
            let _root = build_node(&mut nodes, &mut items);
        }
        Self {
            nodes,
            len: bounds.len(),
        }
    }

    pub fn from_geometries(geometries: &[Option<geo::Geometry<f64>>]) -> Self {
        let bounds: Vec<Option<Aabb2>> = geometries
            .iter()
            .map(|g| {
                g.as_ref().and_then(|g| g.bounding_rect()).map(|r| {
                    Aabb2::from_extent(r.min().x, r.min().y, r.max().x, r.max().y)
                })
            })
            .collect();
        Self::build(&bounds)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Positions whose bounds intersect `query` (closed intervals).
    pub fn query(&self, query: &Aabb2) -> Vec<usize> {
        if self.nodes.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<usize> = Vec::new();
        let mut stack: Vec<usize> = vec![0];

        while let Some(idx) = stack.pop() {
            match &self.nodes[idx] {
                Node::Leaf { bounds, items } => {
                    if !bounds.intersects(query) {
                        continue;
                    }
                    hits.extend(
                        items
                            .iter()
                            .filter(|item| item.bounds.intersects(query))
                            .map(|item| item.position),
                    );
                }
                Node::Internal {
                    bounds,
                    left,
                    right,
                } => {
                    if !bounds.intersects(query) {
                        continue;
                    }
                    stack.push(*right);
                    stack.push(*left);
                }
            }
        }

        hits.sort_unstable();
        hits.dedup();
        hits
    }
}

fn build_node(nodes: &mut Vec<Node>, items: &mut [Item]) -> usize {
    let bounds = bounds_for_items(items);
    if items.len() <= LEAF_MAX {
        let idx = nodes.len();
        nodes.push(Node::Leaf {
            bounds,
            items: items.to_vec(),
        });
        return idx;
    }

    let axis = if bounds.width() >= bounds.height() { 0 } else { 1 };
    items.sort_by(|a, b| {
        let ca = a.bounds.center()[axis];
        let cb = b.bounds.center()[axis];
        stable_total_cmp_f64(ca, cb).then_with(|| a.position.cmp(&b.position))
    });

    let mid = items.len() / 2;
    let (left_items, right_items) = items.split_at_mut(mid);

    let idx = nodes.len();
    // Placeholder; patched once both children exist.
    nodes.push(Node::Leaf {
        bounds,
        items: Vec::new(),
    });

    let left = build_node(nodes, left_items);
    let right = build_node(nodes, right_items);

    nodes[idx] = Node::Internal {
        bounds,
        left,
        right,
    };
    idx
}

fn bounds_for_items(items: &[Item]) -> Aabb2 {
    let mut b = items[0].bounds;
    for item in &items[1..] {
        b = b.union(&item.bounds);
    }
    b
}
