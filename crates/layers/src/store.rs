//! Per-category feature layers and their spatial indexes.
//!
//! Each category sits behind its own read/write guard. Readers take the
//! guard once for the whole bbox-then-resolve step, so positions are always
//! resolved against the layer they were computed from. [`SpatialIndexStore::replace`]
//! builds the new layer and index before taking the write guard.

use std::collections::BTreeMap;
use std::path::Path;

use formats::{FeatureSet, FeatureSetError};
use foundation::bounds::Aabb2;
use foundation::{ServiceError, ServiceResult};
use geojson::Feature;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::info;

use crate::category::{Activity, Category};
use crate::index::SpatialIndex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot load layer {category}: {source}")]
    Load {
        category: Category,
        #[source]
        source: FeatureSetError,
    },
    #[error("cannot load activity layer {activity}: {source}")]
    LoadActivity {
        activity: Activity,
        #[source]
        source: FeatureSetError,
    },
}

/// Read every activity layer that has a source file under `dir`.
pub fn load_activities(dir: &Path) -> Result<BTreeMap<Activity, FeatureSet>, StoreError> {
    let mut out = BTreeMap::new();
    for activity in Activity::ALL {
        let Some(file) = activity.source_file() else {
            continue;
        };
        let features = FeatureSet::read(&dir.join(file))
            .map_err(|source| StoreError::LoadActivity { activity, source })?;
        info!(
            activity = activity.name(),
            features = features.len(),
            "loaded activity layer"
        );
        out.insert(activity, features);
    }
    Ok(out)
}

#[derive(Debug)]
struct LayerEntry {
    features: FeatureSet,
    index: SpatialIndex,
}

impl LayerEntry {
    fn build(features: FeatureSet) -> Self {
        let index = SpatialIndex::from_geometries(features.geometries());
        Self { features, index }
    }
}

#[derive(Debug, Default)]
pub struct SpatialIndexStore {
    layers: BTreeMap<Category, RwLock<LayerEntry>>,
}

impl SpatialIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every category from its GeoJSON file under `dir`. Any missing or
    /// malformed file fails the whole load.
    pub fn load_dir(dir: &Path) -> Result<Self, StoreError> {
        let mut store = Self::new();
        for category in Category::ALL {
            let path = dir.join(category.source_file());
            let features = FeatureSet::read(&path)
                .map_err(|source| StoreError::Load { category, source })?;
            info!(
                category = category.name(),
                features = features.len(),
                "loaded layer from {}",
                path.display()
            );
            store.load(category, features);
        }
        Ok(store)
    }

    /// Build the index for `features` and register it under `category`.
    pub fn load(&mut self, category: Category, features: FeatureSet) {
        self.layers
            .insert(category, RwLock::new(LayerEntry::build(features)));
    }

    pub fn categories(&self) -> Vec<Category> {
        self.layers.keys().copied().collect()
    }

    pub fn len(&self, category: Category) -> ServiceResult<usize> {
        Ok(self.entry(category)?.read().features.len())
    }

    /// Positions of features whose bounds intersect `bbox`, ascending.
    pub fn query_bbox(&self, category: Category, bbox: &Aabb2) -> ServiceResult<Vec<usize>> {
        Ok(self.entry(category)?.read().index.query(bbox))
    }

    /// Features at `positions`; positions past the end of the layer are
    /// skipped.
    pub fn resolve(&self, category: Category, positions: &[usize]) -> ServiceResult<Vec<Feature>> {
        let guard = self.entry(category)?.read();
        Ok(positions
            .iter()
            .filter_map(|p| guard.features.feature(*p).cloned())
            .collect())
    }

    /// Bbox query and resolution under one read guard.
    pub fn query_resolved(&self, category: Category, bbox: &Aabb2) -> ServiceResult<Vec<Feature>> {
        self.query_with(category, bbox, |features, positions| {
            positions
                .iter()
                .filter_map(|p| features.feature(*p).cloned())
                .collect()
        })
    }

    /// Run `f` over the candidate positions for `bbox` while the layer is
    /// read-locked.
    pub fn query_with<R>(
        &self,
        category: Category,
        bbox: &Aabb2,
        f: impl FnOnce(&FeatureSet, &[usize]) -> R,
    ) -> ServiceResult<R> {
        let guard = self.entry(category)?.read();
        let positions = guard.index.query(bbox);
        Ok(f(&guard.features, &positions))
    }

    /// Swap in a new layer for an already registered category.
    pub fn replace(&self, category: Category, features: FeatureSet) -> ServiceResult<()> {
        let lock = self.entry(category)?;
        let entry = LayerEntry::build(features);
        let count = entry.features.len();
        *lock.write() = entry;
        info!(category = category.name(), features = count, "layer replaced");
        Ok(())
    }

    fn entry(&self, category: Category) -> ServiceResult<&RwLock<LayerEntry>> {
        self.layers
            .get(&category)
            .ok_or_else(|| ServiceError::UnknownCategory(category.name().to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{SpatialIndexStore, StoreError};
    use crate::category::Category;
    use formats::FeatureSet;
    use foundation::ServiceError;
    use foundation::bounds::Aabb2;
    use serde_json::json;

    pub(crate) fn squares(specs: &[(f64, f64, f64, &str)]) -> FeatureSet {
        let features: Vec<serde_json::Value> = specs
            .iter()
            .map(|(x, y, size, name)| {
                json!({
                    "type": "Feature",
                    "properties": {"name": name},
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[
                            [x, y], [x + size, y], [x + size, y + size], [x, y + size], [x, y]
                        ]]
                    }
                })
            })
            .collect();
        let doc = json!({"type": "FeatureCollection", "features": features});
        FeatureSet::from_geojson_str(&doc.to_string()).unwrap()
    }

    fn names(features: &[geojson::Feature]) -> Vec<String> {
        features
            .iter()
            .map(|f| f.property("name").unwrap().as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn query_then_resolve_matches_one_step_query() {
        let mut store = SpatialIndexStore::new();
        store.load(
            Category::River,
            squares(&[(5.0, 5.0, 1.0, "a"), (20.0, 20.0, 1.0, "b")]),
        );
        let bbox = Aabb2::from_extent(0.0, 0.0, 10.0, 10.0);

        let positions = store.query_bbox(Category::River, &bbox).unwrap();
        assert_eq!(positions, vec![0]);
        let two_step = store.resolve(Category::River, &positions).unwrap();
        let one_step = store.query_resolved(Category::River, &bbox).unwrap();
        assert_eq!(names(&two_step), vec!["a"]);
        assert_eq!(two_step, one_step);
    }

    #[test]
    fn unloaded_category_is_unknown() {
        let store = SpatialIndexStore::new();
        assert_eq!(
            store
                .query_bbox(Category::Peak, &Aabb2::from_extent(0.0, 0.0, 1.0, 1.0))
                .unwrap_err(),
            ServiceError::UnknownCategory("PEAK".to_string())
        );
    }

    #[test]
    fn replace_swaps_layer_and_index_together() {
        let mut store = SpatialIndexStore::new();
        store.load(Category::Lake, squares(&[(0.0, 0.0, 1.0, "old")]));
        store
            .replace(
                Category::Lake,
                squares(&[(50.0, 50.0, 1.0, "far"), (0.5, 0.5, 1.0, "new")]),
            )
            .unwrap();

        let hits = store
            .query_resolved(Category::Lake, &Aabb2::from_extent(0.0, 0.0, 1.0, 1.0))
            .unwrap();
        assert_eq!(names(&hits), vec!["new"]);
        assert_eq!(store.len(Category::Lake).unwrap(), 2);
        assert!(store.replace(Category::Town, squares(&[])).is_err());
    }

    #[test]
    fn readers_never_see_a_half_replaced_layer() {
        let old = || squares(&[(1.0, 1.0, 1.0, "a"), (3.0, 3.0, 1.0, "b")]);
        let new = || {
            squares(&[
                (2.0, 2.0, 1.0, "c"),
                (4.0, 4.0, 1.0, "d"),
                (6.0, 6.0, 1.0, "e"),
            ])
        };
        let mut store = SpatialIndexStore::new();
        store.load(Category::Lake, old());
        let bbox = Aabb2::from_extent(0.0, 0.0, 10.0, 10.0);

        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..200 {
                    let next = if i % 2 == 0 { new() } else { old() };
                    store.replace(Category::Lake, next).unwrap();
                }
            });
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..500 {
                        let hits = names(&store.query_resolved(Category::Lake, &bbox).unwrap());
                        assert!(
                            hits == ["a", "b"] || hits == ["c", "d", "e"],
                            "mixed read: {hits:?}"
                        );
                    }
                });
            }
        });
    }

    #[test]
    fn load_dir_requires_every_layer() {
        let dir = tempfile::tempdir().unwrap();
        let layer = squares(&[(0.0, 0.0, 1.0, "x")]).to_geojson_string();
        for category in Category::ALL.iter().skip(1) {
            std::fs::write(dir.path().join(category.source_file()), &layer).unwrap();
        }
        let err = SpatialIndexStore::load_dir(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Load {
                category: Category::River,
                ..
            }
        ));

        std::fs::write(dir.path().join(Category::River.source_file()), &layer).unwrap();
        let store = SpatialIndexStore::load_dir(dir.path()).unwrap();
        assert_eq!(store.categories(), Category::ALL.to_vec());
    }
}
