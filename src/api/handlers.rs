use crate::error::{ErrorKind, ReconError};
use crate::models::{Channel, EnrichOutcome, TagPatch};
use crate::service::Reconciler;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 共享状态
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
}

impl AppState {
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
        }
    }
}

/// 成功响应: `{success, message, ...payload}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub payload: T,
}

/// 失败响应
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub error_kind: ErrorKind,
}

#[derive(Debug, Serialize)]
pub struct TripPayload<T: Serialize> {
    pub trip: T,
}

#[derive(Debug, Serialize)]
pub struct TagPayload<T: Serialize> {
    pub tag: T,
}

#[derive(Debug, Deserialize)]
pub struct CreateTripRequest {
    pub buyer_name: String,
}

/// 照片以 base64 传输
#[derive(Debug, Deserialize)]
pub struct PhotoRequest {
    #[serde(default)]
    pub photo: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TripRequest {
    pub trip_id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct EnrichRequest {
    #[serde(default)]
    pub trip_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BulkCostRequest {
    pub cost: BigDecimal,
}

#[derive(Debug, Deserialize)]
pub struct ProfitabilityQuery {
    pub channel: Option<String>,
    pub barcode: Option<String>,
}

fn status_of(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PreconditionNotMet => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::OracleUnavailable
        | ErrorKind::OracleParseError
        | ErrorKind::ExtractionFailed => StatusCode::BAD_GATEWAY,
        ErrorKind::StorageWriteFailed | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn ok<T: Serialize>(message: String, payload: T) -> Response {
    let response = ApiResponse {
        success: true,
        message,
        payload,
    };
    (StatusCode::OK, Json(response)).into_response()
}

fn fail(e: ReconError) -> Response {
    let kind = e.kind();
    if kind == ErrorKind::Internal {
        tracing::error!("Request failed: {}", e);
    }
    let response = ErrorResponse {
        success: false,
        message: format!("Error: {}", e),
        error_kind: kind,
    };
    (status_of(kind), Json(response)).into_response()
}

fn decode_photo(encoded: &str) -> Result<Vec<u8>, ReconError> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| ReconError::InvalidInput(format!("photo is not valid base64: {}", e)))
}

fn enrich_scope(body: Option<Json<EnrichRequest>>) -> Option<i64> {
    body.and_then(|Json(req)| req.trip_id)
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn create_trip(
    State(state): State<AppState>,
    Json(req): Json<CreateTripRequest>,
) -> Response {
    match state.reconciler.create_trip(&req.buyer_name).await {
        Ok(trip) => ok(format!("Trip {} created", trip.id), TripPayload { trip }),
        Err(e) => fail(e),
    }
}

pub async fn add_tag(
    State(state): State<AppState>,
    Path(trip_id): Path<i64>,
    Json(req): Json<PhotoRequest>,
) -> Response {
    let photo = match req.photo.as_deref().map(decode_photo).transpose() {
        Ok(photo) => photo,
        Err(e) => return fail(e),
    };
    match state.reconciler.add_tag(trip_id, photo).await {
        Ok(tag) => ok(format!("Tag {} added to trip {}", tag.id, trip_id), TagPayload { tag }),
        Err(e) => fail(e),
    }
}

pub async fn attach_receipt(
    State(state): State<AppState>,
    Path(trip_id): Path<i64>,
    Json(req): Json<PhotoRequest>,
) -> Response {
    let photo = match req.photo.as_deref().map(decode_photo) {
        Some(Ok(photo)) => photo,
        Some(Err(e)) => return fail(e),
        None => return fail(ReconError::NoReceiptPhoto(trip_id)),
    };
    match state.reconciler.attach_receipt(trip_id, photo).await {
        Ok(trip) => ok(format!("Receipt attached to trip {}", trip_id), TripPayload { trip }),
        Err(e) => fail(e),
    }
}

/// 提交行程；后台任务不等待
pub async fn submit_trip(State(state): State<AppState>, Path(trip_id): Path<i64>) -> Response {
    match state.reconciler.submit(trip_id).await {
        Ok(submitted) => ok(
            format!(
                "Trip {} submitted, enrichment of {} tags started",
                trip_id, submitted.trip.tag_count
            ),
            TripPayload {
                trip: submitted.trip,
            },
        ),
        Err(e) => fail(e),
    }
}

pub async fn bulk_cost(
    State(state): State<AppState>,
    Path(trip_id): Path<i64>,
    Json(req): Json<BulkCostRequest>,
) -> Response {
    match state.reconciler.bulk_set_cost(trip_id, &req.cost).await {
        Ok(result) => ok(
            format!("Cost {} applied to {} unpriced tags", req.cost, result.updated),
            result,
        ),
        Err(e) => fail(e),
    }
}

pub async fn edit_tag(
    State(state): State<AppState>,
    Path(tag_id): Path<i64>,
    Json(patch): Json<TagPatch>,
) -> Response {
    match state.reconciler.edit_tag(tag_id, &patch).await {
        Ok(tag) => ok(format!("Tag {} updated", tag_id), TagPayload { tag }),
        Err(e) => fail(e),
    }
}

/// 请求体可省略；没有 `trip_id` 时处理所有行程的待识别吊牌
pub async fn enrich(State(state): State<AppState>, body: Option<Json<EnrichRequest>>) -> Response {
    match state.reconciler.enrich(enrich_scope(body)).await {
        Ok(batch) => ok(
            format!(
                "Processed {} tags, {} enriched, {} failed",
                batch.processed,
                batch.count(EnrichOutcome::Enriched),
                batch.count(EnrichOutcome::Failed)
            ),
            batch,
        ),
        Err(e) => fail(e),
    }
}

pub async fn parse_receipt(State(state): State<AppState>, Json(req): Json<TripRequest>) -> Response {
    match state.reconciler.parse_receipt(req.trip_id).await {
        Ok(parsed) => ok(
            format!("Parsed {} line items, total {}", parsed.parsed_count, parsed.total_cost),
            parsed,
        ),
        Err(e) => fail(e),
    }
}

pub async fn match_trip(State(state): State<AppState>, Json(req): Json<TripRequest>) -> Response {
    match state.reconciler.match_trip(req.trip_id).await {
        Ok(stats) => ok(
            format!(
                "Matched {} of {} tags against {} receipt items",
                stats.matched_count, stats.total_tags, stats.total_receipt_items
            ),
            stats,
        ),
        Err(e) => fail(e),
    }
}

pub async fn finalize(State(state): State<AppState>, Json(req): Json<TripRequest>) -> Response {
    match state.reconciler.finalize(req.trip_id).await {
        Ok(result) => ok(
            format!(
                "Finalized trip {}: {} intake rows, {} unpriced",
                result.trip_id, result.inserted_count, result.unpriced_count
            ),
            result,
        ),
        Err(e) => fail(e),
    }
}

pub async fn profitability(
    State(state): State<AppState>,
    Query(query): Query<ProfitabilityQuery>,
) -> Response {
    let channel = match query.channel.as_deref().map(str::parse::<Channel>).transpose() {
        Ok(channel) => channel,
        Err(e) => return fail(ReconError::InvalidInput(e.to_string())),
    };
    match state
        .reconciler
        .profitability(channel, query.barcode.as_deref())
        .await
    {
        Ok(report) => ok(format!("{} valid sales", report.summary.count), report),
        Err(e) => fail(e),
    }
}
