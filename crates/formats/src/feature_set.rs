use std::path::Path;

use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use thiserror::Error;

/// A GeoJSON FeatureCollection held both as wire features (attributes
/// preserved for output) and as `geo` geometries (for predicates).
///
/// `features[i]` and `geometries[i]` always describe the same record.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    features: Vec<Feature>,
    geometries: Vec<Option<geo::Geometry<f64>>>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureSetError {
    #[error("cannot read {path}: {message}")]
    Io { path: String, message: String },
    #[error("invalid GeoJSON: {0}")]
    Json(String),
    #[error("expected GeoJSON FeatureCollection")]
    NotAFeatureCollection,
    #[error("expected a GeoJSON geometry")]
    NotAGeometry,
    #[error("invalid feature at index {index}: {reason}")]
    InvalidFeature { index: usize, reason: String },
    #[error("invalid geometry at index {index}: {reason}")]
    InvalidGeometry { index: usize, reason: String },
}

impl FeatureSet {
    pub fn read(path: &Path) -> Result<Self, FeatureSetError> {
        let payload = std::fs::read_to_string(path).map_err(|e| FeatureSetError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_geojson_str(&payload)
    }

    pub fn from_geojson_str(payload: &str) -> Result<Self, FeatureSetError> {
        let geojson: GeoJson = payload
            .parse()
            .map_err(|e: geojson::Error| FeatureSetError::Json(e.to_string()))?;
        match geojson {
            GeoJson::FeatureCollection(fc) => Self::from_features(fc.features),
            _ => Err(FeatureSetError::NotAFeatureCollection),
        }
    }

    pub fn from_features(features: Vec<Feature>) -> Result<Self, FeatureSetError> {
        let mut geometries = Vec::with_capacity(features.len());
        for (index, feature) in features.iter().enumerate() {
            let geometry = match &feature.geometry {
                Some(g) => Some(geo::Geometry::<f64>::try_from(g.value.clone()).map_err(
                    |e| FeatureSetError::InvalidFeature {
                        index,
                        reason: e.to_string(),
                    },
                )?),
                None => None,
            };
            geometries.push(geometry);
        }
        Ok(Self {
            features,
            geometries,
        })
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn feature(&self, position: usize) -> Option<&Feature> {
        self.features.get(position)
    }

    /// `None` both for out-of-range positions and features without geometry.
    pub fn geometry(&self, position: usize) -> Option<&geo::Geometry<f64>> {
        self.geometries.get(position).and_then(|g| g.as_ref())
    }

    pub fn geometries(&self) -> &[Option<geo::Geometry<f64>>] {
        &self.geometries
    }

    pub fn to_geojson_string(&self) -> String {
        feature_collection_string(self.features.iter().cloned())
    }
}

/// Serialize features as a GeoJSON FeatureCollection document.
pub fn feature_collection_string(features: impl IntoIterator<Item = Feature>) -> String {
    GeoJson::FeatureCollection(FeatureCollection {
        bbox: None,
        features: features.into_iter().collect(),
        foreign_members: None,
    })
    .to_string()
}

pub fn to_geojson_geometry(geometry: &geo::Geometry<f64>) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::from(geometry))
}

/// A feature carrying `geometry` and a flat attribute map.
pub fn make_feature(geometry: &geo::Geometry<f64>, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(to_geojson_geometry(geometry)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Parse one GeoJSON geometry object.
pub fn parse_geometry(payload: &str) -> Result<geo::Geometry<f64>, FeatureSetError> {
    let geojson: GeoJson = payload
        .parse()
        .map_err(|e: geojson::Error| FeatureSetError::Json(e.to_string()))?;
    let GeoJson::Geometry(geometry) = geojson else {
        return Err(FeatureSetError::NotAGeometry);
    };
    geo::Geometry::<f64>::try_from(geometry.value).map_err(|e| FeatureSetError::InvalidGeometry {
        index: 0,
        reason: e.to_string(),
    })
}

/// Parse a JSON array of GeoJSON geometry objects.
pub fn parse_geometry_array(payload: &str) -> Result<Vec<geo::Geometry<f64>>, FeatureSetError> {
    let raw: Vec<geojson::Geometry> =
        serde_json::from_str(payload).map_err(|e| FeatureSetError::Json(e.to_string()))?;
    raw.into_iter()
        .enumerate()
        .map(|(index, g)| {
            geo::Geometry::<f64>::try_from(g.value).map_err(|e| FeatureSetError::InvalidGeometry {
                index,
                reason: e.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        FeatureSet, FeatureSetError, feature_collection_string, make_feature, parse_geometry,
        parse_geometry_array,
    };
    use geo::{Geometry, point};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    const RIVERS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"name": "Romanche"},
             "geometry": {"type": "LineString", "coordinates": [[5.0, 45.0], [5.5, 45.2]]}},
            {"type": "Feature", "properties": {"name": "orphan"}, "geometry": null}
        ]
    }"#;

    #[test]
    fn loads_features_and_geometries_in_lockstep() {
        let set = FeatureSet::from_geojson_str(RIVERS).unwrap();
        assert_eq!(set.len(), 2);
        assert!(matches!(set.geometry(0), Some(Geometry::LineString(_))));
        assert!(set.geometry(1).is_none());
        assert_eq!(
            set.feature(0).unwrap().property("name"),
            Some(&json!("Romanche"))
        );
    }

    #[test]
    fn rejects_non_collections() {
        let err = FeatureSet::from_geojson_str(r#"{"type": "Point", "coordinates": [1, 2]}"#)
            .unwrap_err();
        assert_eq!(err, FeatureSetError::NotAFeatureCollection);
        assert!(matches!(
            FeatureSet::from_geojson_str("not json"),
            Err(FeatureSetError::Json(_))
        ));
    }

    #[test]
    fn parses_single_geometry_and_arrays() {
        let g = parse_geometry(r#"{"type": "Point", "coordinates": [1.0, 2.0]}"#).unwrap();
        assert_eq!(g, Geometry::Point(point!(x: 1.0, y: 2.0)));

        let gs = parse_geometry_array(
            r#"[{"type": "Point", "coordinates": [0, 0]},
                {"type": "LineString", "coordinates": [[0, 0], [1, 1]]}]"#,
        )
        .unwrap();
        assert_eq!(gs.len(), 2);

        assert_eq!(
            parse_geometry(r#"{"type": "FeatureCollection", "features": []}"#).unwrap_err(),
            FeatureSetError::NotAGeometry
        );
    }

    #[test]
    fn serializes_collection_with_properties() {
        let mut props = serde_json::Map::new();
        props.insert("visibility".to_string(), json!(1.0));
        let feature = make_feature(&Geometry::Point(point!(x: 3.0, y: 4.0)), props);

        let text = feature_collection_string(vec![feature]);
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], json!("FeatureCollection"));
        assert_eq!(value["features"][0]["properties"]["visibility"], json!(1.0));
        assert_eq!(
            value["features"][0]["geometry"]["coordinates"],
            json!([3.0, 4.0])
        );
    }
}
