use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use async_graphql::http::GraphiQLSource;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{self, HeaderName, HeaderValue, Method, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, patch, post},
};
use platform_api::ApiError;
use platform_db::DbPool;
use products_crm::{
    BoardOptions, CrmError, DealPatch, DealQuery, DealView, NewDeal, NewPipeline, StageDraft,
    StageHistoryView, StageView, deals, load_board, move_deal_stage, pipelines, stages,
    transition,
};
use sea_orm::{ConnectionTrait, Statement};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use crate::{config::AppConfig, graphql::SchemaType};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub schema: SchemaType,
    pub config: Arc<AppConfig>,
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    addr: SocketAddr,
}

impl ServeConfig {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::from((host, port)),
        }
    }
}

pub async fn serve(config: ServeConfig, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    info!(%config.addr, "crm server listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    let allow_origin = if allowed.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed)
    };
    CorsLayer::new()
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_origin(allow_origin)
}

pub fn build_router(state: AppState) -> Router {
    let request_id = MakeRequestUuid;
    let header_name = HeaderName::from_static("x-request-id");
    let cors = cors_layer(&state.config.cors_allowed_origins);
    Router::new()
        .route("/health", get(health_handler))
        .route("/pipelines", get(list_pipelines).post(create_pipeline))
        .route(
            "/pipelines/{id}",
            get(pipeline_board).patch(rename_pipeline).delete(delete_pipeline),
        )
        .route("/pipelines/{id}/stages", get(list_stages).post(add_stage))
        .route("/deals", get(list_deals).post(create_deal))
        .route(
            "/deals/{id}",
            get(get_deal).patch(update_deal).delete(delete_deal),
        )
        .route("/deals/{id}/stage", patch(move_stage))
        .route("/deals/{id}/history", get(stage_history))
        .route("/graphql", post(graphql_handler))
        .route("/graphiql", get(graphiql))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(header_name.clone(), request_id))
                .layer(PropagateRequestIdLayer::new(header_name))
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

type HttpResult<T> = Result<T, HttpError>;

/// REST face of [`ApiError`]: status from the error code, `{error: {code, message}}` body.
#[derive(Debug)]
pub struct HttpError(ApiError);

impl HttpError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ApiError::FailedPrecondition(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ApiError> for HttpError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl From<CrmError> for HttpError {
    fn from(err: CrmError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.0.body())).into_response()
    }
}

fn parse_id(raw: &str) -> HttpResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::invalid(format!("invalid id {raw:?}")).into())
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> HttpResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::invalid(rejection.body_text()).into())
}

fn query_params<T>(params: Result<Query<T>, QueryRejection>) -> HttpResult<T> {
    params
        .map(|Query(value)| value)
        .map_err(|rejection| ApiError::invalid(rejection.body_text()).into())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    ok: bool,
    db_ok: bool,
    version: &'static str,
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let backend = state.pool.get_database_backend();
    let db_ok = state
        .pool
        .execute(Statement::from_string(backend, "SELECT 1".to_string()))
        .await
        .is_ok();
    Json(HealthResponse {
        ok: db_ok,
        db_ok,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_pipelines(State(state): State<AppState>) -> HttpResult<Json<serde_json::Value>> {
    let summaries = pipelines::list_pipelines(&state.pool).await?;
    Ok(Json(json!({ "pipelines": summaries })))
}

async fn create_pipeline(
    State(state): State<AppState>,
    payload: Result<Json<NewPipeline>, JsonRejection>,
) -> HttpResult<impl IntoResponse> {
    let input = json_body(payload)?;
    let view = pipelines::create_pipeline(&state.pool, input).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn pipeline_board(
    State(state): State<AppState>,
    Path(id): Path<String>,
    options: Result<Query<BoardOptions>, QueryRejection>,
) -> HttpResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let options = query_params(options)?;
    let board = load_board(&state.pool, id, &options).await?;
    Ok(Json(board))
}

#[derive(Deserialize)]
struct RenamePipeline {
    name: String,
}

async fn rename_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<RenamePipeline>, JsonRejection>,
) -> HttpResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let input = json_body(payload)?;
    let view = pipelines::rename_pipeline(&state.pool, id, &input.name).await?;
    Ok(Json(view))
}

async fn delete_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HttpResult<StatusCode> {
    let id = parse_id(&id)?;
    pipelines::delete_pipeline(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_stages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HttpResult<Json<serde_json::Value>> {
    let id = parse_id(&id)?;
    let models = stages::list_stages(&state.pool, id).await?;
    let views: Vec<StageView> = models.iter().map(StageView::from).collect();
    Ok(Json(json!({ "stages": views })))
}

async fn add_stage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<StageDraft>, JsonRejection>,
) -> HttpResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let draft = json_body(payload)?;
    let model = stages::add_stage(&state.pool, id, draft).await?;
    Ok((StatusCode::CREATED, Json(StageView::from(&model))))
}

async fn list_deals(
    State(state): State<AppState>,
    params: Result<Query<DealQuery>, QueryRejection>,
) -> HttpResult<Json<serde_json::Value>> {
    let query = query_params(params)?;
    let models = deals::list_deals(&state.pool, &query).await?;
    let views: Vec<DealView> = models.into_iter().map(DealView::from).collect();
    Ok(Json(json!({ "deals": views })))
}

async fn create_deal(
    State(state): State<AppState>,
    payload: Result<Json<NewDeal>, JsonRejection>,
) -> HttpResult<impl IntoResponse> {
    let input = json_body(payload)?;
    let model = deals::create_deal(&state.pool, input).await?;
    Ok((StatusCode::CREATED, Json(DealView::from(model))))
}

async fn get_deal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HttpResult<Json<DealView>> {
    let id = parse_id(&id)?;
    let model = deals::get_deal(&state.pool, id).await?;
    Ok(Json(model.into()))
}

async fn update_deal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<DealPatch>, JsonRejection>,
) -> HttpResult<Json<DealView>> {
    let id = parse_id(&id)?;
    let patch = json_body(payload)?;
    let model = deals::update_deal(&state.pool, id, patch).await?;
    Ok(Json(model.into()))
}

async fn delete_deal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HttpResult<StatusCode> {
    let id = parse_id(&id)?;
    deals::delete_deal(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveStage {
    stage_id: Uuid,
    #[serde(default)]
    note: Option<String>,
}

async fn move_stage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<MoveStage>, JsonRejection>,
) -> HttpResult<Json<DealView>> {
    let id = parse_id(&id)?;
    let input = json_body(payload)?;
    let model = move_deal_stage(&state.pool, id, input.stage_id, input.note).await?;
    Ok(Json(model.into()))
}

async fn stage_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> HttpResult<Json<serde_json::Value>> {
    let id = parse_id(&id)?;
    let rows = transition::deal_stage_history(&state.pool, id).await?;
    let history: Vec<StageHistoryView> = rows.into_iter().map(StageHistoryView::from).collect();
    Ok(Json(json!({ "history": history })))
}

async fn graphql_handler(State(state): State<AppState>, request: GraphQLRequest) -> GraphQLResponse {
    state.schema.execute(request.into_inner()).await.into()
}

async fn graphiql() -> Html<String> {
    Html(GraphiQLSource::build().endpoint("/graphql").finish())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    ctrl_c.await;

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use migration::{Migrator, MigratorTrait};
    use platform_db::DatabaseSettings;
    use tower::ServiceExt;

    use crate::graphql::build_schema;

    async fn router() -> Router {
        let pool = platform_db::connect(&DatabaseSettings::sqlite_memory())
            .await
            .unwrap();
        Migrator::up(&pool, None).await.unwrap();
        let config = AppConfig::from_lookup(|_| None).unwrap();
        build_router(AppState {
            schema: build_schema(pool.clone()),
            pool,
            config: Arc::new(config),
        })
    }

    async fn send(
        router: &Router,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn pipeline(router: &Router, name: &str) -> serde_json::Value {
        let (status, body) = send(
            router,
            Method::POST,
            "/pipelines",
            Some(json!({
                "name": name,
                "stages": [{"name": "Lead"}, {"name": "Won", "isWon": true}, {"name": "Lost", "isLost": true}]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    #[tokio::test]
    async fn health_reports_database() {
        let router = router().await;
        let response = router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["dbOk"], true);
    }

    #[tokio::test]
    async fn board_aggregates_deals_per_stage() {
        let router = router().await;
        let p = pipeline(&router, "P").await;
        let id = p["id"].as_str().unwrap().to_string();
        for (title, cents, stage) in [("A", 10_000, 0), ("B", 20_000, 1), ("C", 5_000, 2)] {
            let (status, body) = send(
                &router,
                Method::POST,
                "/deals",
                Some(json!({
                    "title": title,
                    "valueCents": cents,
                    "pipelineId": id,
                    "stageId": p["stages"][stage]["id"],
                })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED, "{body}");
        }

        let (status, board) = send(&router, Method::GET, &format!("/pipelines/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(board["totalDeals"], 3);
        assert_eq!(board["totalValueCents"], 35_000);
        assert_eq!(board["winRate"], 50.0);
        assert_eq!(board["stages"][1]["deals"][0]["title"], "B");

        let (_, listed) = send(&router, Method::GET, "/pipelines", None).await;
        assert_eq!(listed["pipelines"][0]["dealCount"], 3);
    }

    #[tokio::test]
    async fn oversized_deal_value_is_a_bad_request() {
        let router = router().await;
        let p = pipeline(&router, "P").await;
        let (status, body) = send(
            &router,
            Method::POST,
            "/deals",
            Some(json!({"title": "Jumbo", "valueCents": i64::MAX, "pipelineId": p["id"], "probability": 50})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_ARGUMENT");

        let id = p["id"].as_str().unwrap();
        let (status, board) = send(&router, Method::GET, &format!("/pipelines/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(board["totalDeals"], 0);
    }

    #[tokio::test]
    async fn stage_move_rules_surface_as_http_errors() {
        let router = router().await;
        let p = pipeline(&router, "P").await;
        let q = pipeline(&router, "Q").await;
        let (_, deal) = send(
            &router,
            Method::POST,
            "/deals",
            Some(json!({"title": "A", "valueCents": 100, "pipelineId": p["id"]})),
        )
        .await;
        let deal_id = deal["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &router,
            Method::PATCH,
            &format!("/deals/{deal_id}/stage"),
            Some(json!({"stageId": q["stages"][1]["id"]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_ARGUMENT");

        let (status, body) = send(
            &router,
            Method::PATCH,
            &format!("/deals/{}/stage", Uuid::new_v4()),
            Some(json!({"stageId": p["stages"][1]["id"]})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");

        let (status, moved) = send(
            &router,
            Method::PATCH,
            &format!("/deals/{deal_id}/stage"),
            Some(json!({"stageId": p["stages"][1]["id"], "note": "signed"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(moved["actualCloseDate"].is_string());

        let (_, history) =
            send(&router, Method::GET, &format!("/deals/{deal_id}/history"), None).await;
        assert_eq!(history["history"][0]["toStageName"], "Won");
    }

    #[tokio::test]
    async fn pipeline_delete_guard() {
        let router = router().await;
        let busy = pipeline(&router, "Busy").await;
        let idle = pipeline(&router, "Idle").await;
        send(
            &router,
            Method::POST,
            "/deals",
            Some(json!({"title": "A", "valueCents": 100, "pipelineId": busy["id"]})),
        )
        .await;

        let busy_id = busy["id"].as_str().unwrap();
        let (status, body) =
            send(&router, Method::DELETE, &format!("/pipelines/{busy_id}"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "FAILED_PRECONDITION");

        let idle_id = idle["id"].as_str().unwrap();
        let (status, _) =
            send(&router, Method::DELETE, &format!("/pipelines/{idle_id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&router, Method::GET, &format!("/pipelines/{idle_id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_input_is_invalid_argument() {
        let router = router().await;
        let (status, body) = send(&router, Method::GET, "/deals/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_ARGUMENT");

        let (status, body) = send(&router, Method::GET, "/deals?sort=password", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_ARGUMENT");

        let (status, body) = send(
            &router,
            Method::POST,
            "/pipelines",
            Some(json!({"name": "Broken", "stages": [{"name": "Both", "isWon": true, "isLost": true}]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_ARGUMENT");
    }
}
