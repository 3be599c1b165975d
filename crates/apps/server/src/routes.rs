use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::FormRejection;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use compute::geometry::{BufferOptions, GeometryOp, SetOperation};
use compute::validate::{
    validate_datetime, validate_flag, validate_number, validate_timezone, Observers,
};
use compute::{JobKind, JobRequest};
use formats::{feature_collection_string, parse_geometry_array, to_geojson_geometry};
use foundation::{ServiceError, ServiceResult};
use geo::Geometry;
use layers::Category;
use serde::Deserialize;
use serde_json::json;

use crate::response::{self, reply};
use crate::state::AppState;

type Params = HashMap<String, String>;

pub fn router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/sun", get(sun))
        .route("/sunmask", get(sunmask))
        .route("/viewshed", get(viewshed))
        .route("/activity-features/:category", get(activity_features))
        .route("/features/:category/:bbox", get(features_in_bbox))
        .route("/features/:category", post(features_intersecting))
        .route("/:op", post(geometry_op).get(response::not_found))
        .fallback(response::not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<AppState>) -> Response {
    let dem = state.validator.dem();
    let store = state.queries.store();
    let layers: Vec<_> = store
        .categories()
        .into_iter()
        .map(|c| json!({ "name": c.name(), "features": store.len(c).unwrap_or(0) }))
        .collect();
    let metrics = state.metrics.lock().snapshot();
    Json(json!({
        "status": "ok",
        "dem": {
            "path": dem.path,
            "epsg": dem.epsg,
            "north": dem.north,
            "south": dem.south,
            "east": dem.east,
            "west": dem.west,
            "ewres": dem.ewres,
            "nsres": dem.nsres,
        },
        "workers": { "size": state.pool.size(), "idle": state.pool.idle_slots() },
        "layers": layers,
        "metrics": metrics,
    }))
    .into_response()
}

async fn activity_features(
    State(state): State<AppState>,
    Path(activity): Path<String>,
) -> Response {
    reply(
        state
            .queries
            .activity_features(&activity)
            .map(feature_collection_string),
    )
}

async fn features_in_bbox(
    State(state): State<AppState>,
    Path((category, bbox)): Path<(String, String)>,
) -> Response {
    reply(
        state
            .queries
            .features_in_bbox(&category, &bbox)
            .map(feature_collection_string),
    )
}

#[derive(Debug, Default, Deserialize)]
struct FeatureForm {
    geometry: Option<String>,
}

async fn features_intersecting(
    State(state): State<AppState>,
    Path(category): Path<String>,
    form: Result<Form<FeatureForm>, FormRejection>,
) -> Response {
    reply(intersecting(&state, &category, form).await)
}

async fn intersecting(
    state: &AppState,
    category: &str,
    form: Result<Form<FeatureForm>, FormRejection>,
) -> ServiceResult<String> {
    // An unknown category wins over a malformed body.
    category.parse::<Category>()?;
    let Form(form) = form.map_err(form_rejected)?;
    let geometry = required("geometry", form.geometry.as_deref())?;
    state
        .queries
        .features_intersecting_geometry(category, geometry)
        .await
        .map(feature_collection_string)
}

#[derive(Debug, Default, Deserialize)]
struct GeometryForm {
    geoms: Option<String>,
    geoms1: Option<String>,
    geoms2: Option<String>,
    distance: Option<String>,
    uncertainty: Option<String>,
}

async fn geometry_op(
    State(state): State<AppState>,
    Path(op): Path<String>,
    form: Result<Form<GeometryForm>, FormRejection>,
) -> Response {
    reply(run_geometry_op(&state, &op, form).await)
}

async fn run_geometry_op(
    state: &AppState,
    op: &str,
    form: Result<Form<GeometryForm>, FormRejection>,
) -> ServiceResult<String> {
    let op: GeometryOp = op.parse()?;
    let Form(form) = form.map_err(form_rejected)?;
    let engine = Arc::clone(&state.geometry);

    match op {
        GeometryOp::Predicate(predicate) => {
            let geoms1 = geometries("geoms1", form.geoms1.as_deref())?;
            let geoms2 = geometries("geoms2", form.geoms2.as_deref())?;
            let matrix = state
                .pool
                .run_blocking(move || engine.predicate_matrix(predicate, &geoms1, &geoms2))
                .await
                .map_err(|e| ServiceError::ComputationFailed(e.to_string()))?;
            serde_json::to_string(&matrix)
                .map_err(|e| ServiceError::ComputationFailed(e.to_string()))
        }
        GeometryOp::Operation(operation) => {
            let geoms = geometries("geoms", form.geoms.as_deref())?;
            let buffer = match operation {
                SetOperation::Buffer => Some(buffer_options(&form)?),
                _ => None,
            };
            let geometry = state
                .pool
                .run_blocking(move || engine.operate(operation, &geoms, buffer))
                .await
                .map_err(|e| ServiceError::ComputationFailed(e.to_string()))??;
            serde_json::to_string(&to_geojson_geometry(&geometry))
                .map_err(|e| ServiceError::ComputationFailed(e.to_string()))
        }
    }
}

fn buffer_options(form: &GeometryForm) -> ServiceResult<BufferOptions> {
    let uncertainty = validate_number(
        "uncertainty",
        required("uncertainty", form.uncertainty.as_deref())?,
    )?;
    let distance = form
        .distance
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .map(|d| validate_number("distance", d))
        .transpose()?;
    Ok(BufferOptions {
        distance,
        uncertainty,
    })
}

fn geometries(name: &str, raw: Option<&str>) -> ServiceResult<Vec<Geometry<f64>>> {
    parse_geometry_array(required(name, raw)?)
        .map_err(|e| ServiceError::invalid(format!("invalid '{name}': {e}")))
}

async fn viewshed(State(state): State<AppState>, Query(params): Query<Params>) -> Response {
    match viewshed_request(&state, &params) {
        Ok(request) => reply(state.jobs.run(request).await),
        Err(err) => response::error(err),
    }
}

fn viewshed_request(state: &AppState, params: &Params) -> ServiceResult<JobRequest> {
    let observers = state.validator.validate_points(param(params, "coordinates")?)?;
    let observer_elevation = validate_number("height1", param(params, "height1")?)?;
    let target_elevation = validate_number("height2", param(params, "height2")?)?;
    let region = state.validator.validate_region(optional(params, "region"))?;

    let kind = match observers {
        Observers::Single(observer) => JobKind::Viewshed {
            observer,
            observer_elevation,
            target_elevation,
        },
        Observers::Multiple(observers) => JobKind::ViewshedMulti {
            observers,
            observer_elevation,
            target_elevation,
        },
    };
    Ok(JobRequest { kind, region })
}

async fn sunmask(State(state): State<AppState>, Query(params): Query<Params>) -> Response {
    match sunmask_request(&state, &params) {
        Ok(request) => reply(state.jobs.run(request).await),
        Err(err) => response::error(err),
    }
}

fn sunmask_request(state: &AppState, params: &Params) -> ServiceResult<JobRequest> {
    let datetime = datetime(params)?;
    datetime.day_of_year()?;
    let region = state.validator.validate_region(optional(params, "region"))?;
    let timezone = validate_timezone(optional(params, "timezone"))?;
    let sun = validate_flag(optional(params, "sun"));
    Ok(JobRequest {
        kind: JobKind::Sunmask {
            datetime,
            timezone,
            sun,
        },
        region,
    })
}

async fn sun(State(state): State<AppState>, Query(params): Query<Params>) -> Response {
    match sun_request(&state, &params) {
        Ok(request) => reply(state.jobs.run(request).await),
        Err(err) => response::error(err),
    }
}

fn sun_request(state: &AppState, params: &Params) -> ServiceResult<JobRequest> {
    let datetime = datetime(params)?;
    let day_of_year = datetime.day_of_year()?;
    let region = state.validator.validate_region(optional(params, "region"))?;
    let timezone = validate_timezone(optional(params, "timezone"))?;
    let sun = validate_flag(optional(params, "sun"));
    Ok(JobRequest {
        kind: JobKind::Sun {
            day_of_year,
            time: datetime.fractional_hour(),
            timezone,
            sun,
        },
        region,
    })
}

fn datetime(params: &Params) -> ServiceResult<compute::validate::CivilDateTime> {
    validate_datetime(
        param(params, "year")?,
        param(params, "month")?,
        param(params, "day")?,
        param(params, "hour")?,
        param(params, "minute")?,
    )
}

fn param<'a>(params: &'a Params, name: &str) -> ServiceResult<&'a str> {
    required(name, optional(params, name))
}

fn optional<'a>(params: &'a Params, name: &str) -> Option<&'a str> {
    params.get(name).map(String::as_str)
}

fn required<'a>(name: &str, raw: Option<&'a str>) -> ServiceResult<&'a str> {
    raw.ok_or_else(|| ServiceError::invalid(format!("missing parameter '{name}'")))
}

fn form_rejected(err: FormRejection) -> ServiceError {
    ServiceError::invalid(format!("invalid form data: {err}"))
}

#[cfg(test)]
mod tests {
    use super::router;
    use crate::state::AppState;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use compute::engine::BoxFuture;
    use compute::reproject::ReprojectError;
    use compute::{
        CoordinateValidator, DemExtent, EngineError, GeometryEngine, RasterCommand,
        RasterEngine, RasterSession, Reprojector, TerrainJobRunner,
    };
    use formats::{FeatureSet, RasterGrid};
    use layers::{Category, QueryDispatcher, SpatialIndexStore};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use runtime::{Metrics, WorkerPool};
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tower::ServiceExt;

    const RIVERS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"name": "Romanche"},
             "geometry": {"type": "LineString", "coordinates": [[5.0, 45.0], [5.5, 45.2]]}},
            {"type": "Feature", "properties": {"name": "Drac"},
             "geometry": {"type": "LineString", "coordinates": [[6.0, 46.0], [6.2, 46.1]]}}
        ]
    }"#;

    /// Answers every export with an all-ones grid over the whole DEM.
    #[derive(Default)]
    struct FlatEngine {
        commands: Mutex<Vec<String>>,
    }

    impl RasterEngine for FlatEngine {
        fn run(&self, command: RasterCommand) -> BoxFuture<'_, Result<String, EngineError>> {
            Box::pin(async move {
                self.commands.lock().push(command.name.clone());
                if command.name == "r.out.ascii" {
                    let grid = RasterGrid::new(
                        6_700_000.0,
                        6_500_000.0,
                        800_000.0,
                        600_000.0,
                        2,
                        2,
                        vec![1.0; 4],
                    )
                    .unwrap();
                    std::fs::write(command.get("output").unwrap(), grid.to_ascii_string())
                        .unwrap();
                }
                Ok(String::new())
            })
        }
    }

    struct EchoReprojector;

    impl Reprojector for EchoReprojector {
        fn to_wgs84<'a>(
            &'a self,
            _source_epsg: u16,
            input: &'a Path,
        ) -> BoxFuture<'a, Result<String, ReprojectError>> {
            Box::pin(async move { Ok(std::fs::read_to_string(input).unwrap()) })
        }
    }

    fn app(engine: &Arc<FlatEngine>) -> Router {
        let dem = Arc::new(
            DemExtent::new(
                PathBuf::from("dem.tif"),
                2154,
                [600_000.0, 6_500_000.0, 800_000.0, 6_700_000.0],
                25.0,
                25.0,
            )
            .unwrap(),
        );
        let mut store = SpatialIndexStore::new();
        store.load(
            Category::River,
            FeatureSet::from_geojson_str(RIVERS).unwrap(),
        );
        let metrics = Arc::new(Mutex::new(Metrics::new()));
        let pool = WorkerPool::new("test", 1);
        let jobs = TerrainJobRunner::new(
            RasterSession::new(engine.clone(), Arc::clone(&dem), "dem"),
            Arc::new(EchoReprojector),
            pool.clone(),
            None,
            Arc::clone(&metrics),
        );
        let state = AppState {
            queries: QueryDispatcher::new(
                Arc::new(store),
                BTreeMap::new(),
                pool.clone(),
                Arc::clone(&metrics),
            ),
            geometry: Arc::new(GeometryEngine::new(2154).unwrap()),
            validator: CoordinateValidator::new(dem),
            jobs,
            pool,
            metrics,
        };
        router(state, 1024 * 1024)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn get_json(app: &Router, uri: &str) -> Value {
        let (status, body) = send(app, Request::get(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_str(&body).unwrap()
    }

    async fn post_json(app: &Router, uri: &str, fields: &[(&str, &str)]) -> Value {
        let body = fields
            .iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_str(&body).unwrap()
    }

    fn encode(raw: &str) -> String {
        raw.bytes()
            .map(|b| match b {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => {
                    (b as char).to_string()
                }
                _ => format!("%{b:02X}"),
            })
            .collect()
    }

    fn names(collection: &Value) -> Vec<&str> {
        collection["features"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["properties"]["name"].as_str().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn health_and_unknown_routes() {
        let app = app(&Arc::default());
        let (status, body) = send(&app, Request::get("/healthz").body(Body::empty()).unwrap()).await;
        assert_eq!((status, body.as_str()), (StatusCode::OK, "ok"));

        for uri in ["/nope", "/nope/deeper/still"] {
            let (status, body) = send(&app, Request::get(uri).body(Body::empty()).unwrap()).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, "ERROR 404 !");
        }
    }

    #[tokio::test]
    async fn bbox_query_and_unknown_category() {
        let app = app(&Arc::default());
        let found = get_json(&app, "/features/RIVER/4.9,44.9,5.1,45.1").await;
        assert_eq!(found["type"], json!("FeatureCollection"));
        assert_eq!(names(&found), vec!["Romanche"]);

        let err = get_json(&app, "/features/NOPE/4.9,44.9,5.1,45.1").await;
        assert_eq!(err, json!({"message": "Error : category 'NOPE' not found."}));

        let err = get_json(&app, "/features/RIVER/1,2,3").await;
        assert!(err["message"].as_str().unwrap().starts_with("Error : invalid bounding box"));
    }

    #[tokio::test]
    async fn activity_layers() {
        let app = app(&Arc::default());
        let empty = get_json(&app, "/activity-features/randonnee").await;
        assert_eq!(empty["features"], json!([]));

        let err = get_json(&app, "/activity-features/golf").await;
        assert_eq!(err, json!({"message": "Error : category 'golf' not found."}));
    }

    #[tokio::test]
    async fn posted_geometry_narrows_to_true_intersections() {
        let app = app(&Arc::default());
        let area = r#"{"type": "Polygon", "coordinates": [[[4.9, 44.9], [5.6, 44.9], [5.6, 45.3], [4.9, 45.3], [4.9, 44.9]]]}"#;
        let found = post_json(&app, "/features/RIVER", &[("geometry", area)]).await;
        assert_eq!(names(&found), vec!["Romanche"]);

        let err = post_json(&app, "/features/RIVER", &[("geometry", "{oops")]).await;
        assert!(err["message"].as_str().unwrap().starts_with("Error : invalid geometry"));

        let err = post_json(&app, "/features/NOPE", &[]).await;
        assert_eq!(err, json!({"message": "Error : category 'NOPE' not found."}));
    }

    #[tokio::test]
    async fn predicates_answer_a_matrix() {
        let app = app(&Arc::default());
        let square = r#"[{"type": "Polygon", "coordinates": [[[0, 0], [2, 0], [2, 2], [0, 2], [0, 0]]]}]"#;
        let points = r#"[{"type": "Point", "coordinates": [1, 1]}, {"type": "Point", "coordinates": [5, 5]}]"#;
        let matrix = post_json(&app, "/intersects", &[("geoms1", square), ("geoms2", points)]).await;
        assert_eq!(matrix, json!({"0": {"0": true, "1": false}}));
    }

    #[tokio::test]
    async fn operations_answer_one_geometry() {
        let app = app(&Arc::default());
        let squares = r#"[
            {"type": "Polygon", "coordinates": [[[0, 0], [2, 0], [2, 2], [0, 2], [0, 0]]]},
            {"type": "Polygon", "coordinates": [[[1, 0], [3, 0], [3, 2], [1, 2], [1, 0]]]}
        ]"#;
        let union = post_json(&app, "/unary_union", &[("geoms", squares)]).await;
        assert_eq!(union["type"], json!("Polygon"));

        let err = post_json(&app, "/buffer", &[("geoms", squares)]).await;
        assert_eq!(err, json!({"message": "Error : missing parameter 'uncertainty'"}));

        let err = post_json(&app, "/explode", &[]).await;
        assert_eq!(
            err,
            json!({"message": "Error : binary predicate or geometric operation 'explode' not found."})
        );
    }

    #[tokio::test]
    async fn viewshed_runs_a_job() {
        let engine = Arc::new(FlatEngine::default());
        let app = app(&engine);
        let result = get_json(&app, "/viewshed?coordinates=46.5,3.0&height1=1.8&height2=0").await;
        assert_eq!(result["features"][0]["properties"], json!({"visibility": 1.0}));
        assert!(engine.commands.lock().contains(&"r.viewshed".to_string()));
    }

    #[tokio::test]
    async fn terrain_validation_errors_never_reach_the_engine() {
        let engine = Arc::new(FlatEngine::default());
        let app = app(&engine);

        let outside = get_json(&app, "/viewshed?coordinates=48.85,2.35&height1=1.8&height2=0").await;
        let message = outside["message"].as_str().unwrap();
        assert!(message.starts_with("Error : Requested point"), "{message}");
        assert!(message.ends_with("(xmin=600000, xmax=800000, ymin=6500000, ymax=6700000)"));

        let missing = get_json(&app, "/viewshed?coordinates=46.5,3.0&height2=0").await;
        assert_eq!(missing, json!({"message": "Error : missing parameter 'height1'"}));

        let timezone = get_json(
            &app,
            "/sun?year=2019&month=6&day=21&hour=12&minute=0&timezone=30",
        )
        .await;
        assert_eq!(timezone, json!({"message": "Error : Invalid timezone"}));

        assert!(engine.commands.lock().is_empty());
    }

    #[tokio::test]
    async fn sunmask_sunlit_area_is_one_feature() {
        let app = app(&Arc::default());
        let result = get_json(
            &app,
            "/sunmask?year=2019&month=12&day=21&hour=8&minute=0&sun=true",
        )
        .await;
        let features = result["features"].as_array().unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0]["properties"], json!({"sun": 1.0}));
    }

    #[tokio::test]
    async fn status_reports_layers_and_metrics() {
        let app = app(&Arc::default());
        get_json(&app, "/features/RIVER/4.9,44.9,5.1,45.1").await;

        let status = get_json(&app, "/status").await;
        assert_eq!(status["dem"]["epsg"], json!(2154));
        assert_eq!(status["layers"], json!([{"name": "RIVER", "features": 2}]));
        let counters = status["metrics"]["counters"].as_array().unwrap();
        assert!(counters.contains(&json!(["query.features_in_bbox.requests", 1])));
    }
}
