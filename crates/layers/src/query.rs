use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use formats::{FeatureSet, parse_geometry};
use foundation::bounds::Aabb2;
use foundation::{ServiceError, ServiceResult};
use geo::{BoundingRect, Intersects};
use geojson::Feature;
use parking_lot::Mutex;
use runtime::{Metrics, WorkerPool};
use tracing::info;

use crate::category::{Activity, Category};
use crate::store::SpatialIndexStore;

/// Answers the three read-only feature queries.
///
/// Category names are checked before any layer is touched. Every answered
/// query logs its latency and result count and records both into the shared
/// metrics registry.
#[derive(Clone)]
pub struct QueryDispatcher {
    store: Arc<SpatialIndexStore>,
    activities: Arc<BTreeMap<Activity, FeatureSet>>,
    pool: WorkerPool,
    metrics: Arc<Mutex<Metrics>>,
}

impl QueryDispatcher {
    pub fn new(
        store: Arc<SpatialIndexStore>,
        activities: BTreeMap<Activity, FeatureSet>,
        pool: WorkerPool,
        metrics: Arc<Mutex<Metrics>>,
    ) -> Self {
        Self {
            store,
            activities: Arc::new(activities),
            pool,
            metrics,
        }
    }

    pub fn store(&self) -> &SpatialIndexStore {
        &self.store
    }

    /// The whole layer of an activity; empty for activities without one.
    pub fn activity_features(&self, name: &str) -> ServiceResult<Vec<Feature>> {
        let started = Instant::now();
        let activity: Activity = name.parse()?;
        let features = self
            .activities
            .get(&activity)
            .map(|set| set.features().to_vec())
            .unwrap_or_default();
        self.observe("activity_features", activity.name(), started, features.len());
        Ok(features)
    }

    /// Features whose bounding box intersects `bbox` (`xmin,ymin,xmax,ymax`).
    pub fn features_in_bbox(&self, category: &str, bbox: &str) -> ServiceResult<Vec<Feature>> {
        let started = Instant::now();
        let category: Category = category.parse()?;
        let bbox: Aabb2 = bbox.parse()?;
        let features = self.store.query_resolved(category, &bbox)?;
        self.observe("features_in_bbox", category.name(), started, features.len());
        Ok(features)
    }

    /// Features whose geometry intersects the GeoJSON `geometry`.
    pub async fn features_intersecting_geometry(
        &self,
        category: &str,
        geometry: &str,
    ) -> ServiceResult<Vec<Feature>> {
        let started = Instant::now();
        let category: Category = category.parse()?;
        let input = parse_geometry(geometry)
            .map_err(|e| ServiceError::invalid(format!("invalid geometry: {e}")))?;

        let Some(rect) = input.bounding_rect() else {
            self.observe("features_intersecting_geometry", category.name(), started, 0);
            return Ok(Vec::new());
        };
        let bbox = Aabb2::from_extent(rect.min().x, rect.min().y, rect.max().x, rect.max().y);

        let store = Arc::clone(&self.store);
        let features = self
            .pool
            .run_blocking(move || {
                store.query_with(category, &bbox, |layer, positions| {
                    positions
                        .iter()
                        .filter(|p| layer.geometry(**p).is_some_and(|g| g.intersects(&input)))
                        .filter_map(|p| layer.feature(*p).cloned())
                        .collect::<Vec<Feature>>()
                })
            })
            .await
            .map_err(|e| ServiceError::ComputationFailed(e.to_string()))??;

        self.observe(
            "features_intersecting_geometry",
            category.name(),
            started,
            features.len(),
        );
        Ok(features)
    }

    fn observe(&self, op: &str, layer: &str, started: Instant, results: usize) {
        let elapsed = started.elapsed();
        info!(
            op,
            layer,
            results,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "query answered"
        );
        let mut metrics = self.metrics.lock();
        metrics.inc_counter(format!("query.{op}.requests"), 1);
        metrics.record_duration(format!("query.{op}.latency_us"), elapsed);
        metrics.record(format!("query.{op}.results"), results as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::QueryDispatcher;
    use crate::category::{Activity, Category};
    use crate::store::SpatialIndexStore;
    use crate::store::tests::squares;
    use foundation::ServiceError;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use runtime::{Metrics, WorkerPool};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn dispatcher() -> QueryDispatcher {
        let mut store = SpatialIndexStore::new();
        store.load(
            Category::River,
            squares(&[(5.0, 5.0, 1.0, "near"), (20.0, 20.0, 1.0, "far")]),
        );
        // The second square's bbox overlaps the triangle's bbox but not the
        // triangle itself.
        store.load(
            Category::Lake,
            squares(&[(0.0, 0.0, 1.0, "corner"), (8.0, 8.0, 1.0, "bbox-only")]),
        );
        let mut activities = BTreeMap::new();
        activities.insert(Activity::Ski, squares(&[(1.0, 1.0, 1.0, "station")]));
        QueryDispatcher::new(
            Arc::new(store),
            activities,
            WorkerPool::new("test", 1),
            Arc::new(Mutex::new(Metrics::new())),
        )
    }

    fn names(features: &[geojson::Feature]) -> Vec<String> {
        features
            .iter()
            .map(|f| f.property("name").unwrap().as_str().unwrap().to_string())
            .collect()
    }

    const TRIANGLE: &str =
        r#"{"type": "Polygon", "coordinates": [[[0, 0], [10, 0], [0, 10], [0, 0]]]}"#;

    #[test]
    fn bbox_query_returns_only_intersecting_features() {
        let d = dispatcher();
        let hits = d.features_in_bbox("RIVER", "0,0,10,10").unwrap();
        assert_eq!(names(&hits), vec!["near"]);
    }

    #[test]
    fn unknown_category_wins_over_malformed_input() {
        let d = dispatcher();
        assert_eq!(
            d.features_in_bbox("VOLCANO", "not,a,bbox").unwrap_err(),
            ServiceError::UnknownCategory("VOLCANO".to_string())
        );
        assert!(matches!(
            d.features_in_bbox("RIVER", "0,0,10").unwrap_err(),
            ServiceError::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn geometry_query_narrows_bbox_candidates() {
        let d = dispatcher();
        let precise = d
            .features_intersecting_geometry("LAKE", TRIANGLE)
            .await
            .unwrap();
        assert_eq!(names(&precise), vec!["corner"]);

        // Every precise hit is also a bbox hit for the geometry's bounds.
        let approximate = d.features_in_bbox("LAKE", "0,0,10,10").unwrap();
        assert_eq!(names(&approximate), vec!["corner", "bbox-only"]);
        assert!(precise.iter().all(|f| approximate.contains(f)));
    }

    #[tokio::test]
    async fn geometry_query_rejects_bad_input() {
        let d = dispatcher();
        assert!(matches!(
            d.features_intersecting_geometry("LAKE", "{").await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert_eq!(
            d.features_intersecting_geometry("lake", TRIANGLE)
                .await
                .unwrap_err(),
            ServiceError::UnknownCategory("lake".to_string())
        );
    }

    #[test]
    fn activity_layers_are_served_whole() {
        let d = dispatcher();
        assert_eq!(names(&d.activity_features("ski").unwrap()), vec!["station"]);
        assert!(d.activity_features("randonnee").unwrap().is_empty());
        assert_eq!(
            d.activity_features("RIVER").unwrap_err(),
            ServiceError::UnknownCategory("RIVER".to_string())
        );
    }

    #[test]
    fn answered_queries_are_counted() {
        let d = dispatcher();
        d.features_in_bbox("RIVER", "0,0,10,10").unwrap();
        d.features_in_bbox("RIVER", "100,100,101,101").unwrap();
        let _ = d.features_in_bbox("NOPE", "0,0,1,1");

        let metrics = d.metrics.lock();
        assert_eq!(metrics.counter("query.features_in_bbox.requests"), 2);
        let results = metrics.histogram("query.features_in_bbox.results").unwrap();
        assert_eq!((results.min, results.max), (0, 1));
    }
}
