//! HTTP query surface (spec §4.E).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::service::IndexService;

const DEFAULT_LIMIT: usize = 50;

pub fn router(service: Arc<IndexService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/channels/:channel_id/posts/:seq/readers", get(get_readers))
        .route("/read-counts", post(post_read_counts))
        .route("/stats", get(get_stats))
        .with_state(service)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorBody { error: message })).into_response()
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

#[derive(Debug, Deserialize)]
struct ReadersQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ReadersResponse {
    count: u64,
    readers: Vec<String>,
    truncated: bool,
}

async fn get_readers(
    State(service): State<Arc<IndexService>>,
    Path((channel_id, seq)): Path<(String, String)>,
    Query(query): Query<ReadersQuery>,
) -> Result<Json<ReadersResponse>, ApiError> {
    let seq: i64 = seq
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid sequence number: {seq}")))?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);

    let result = service.get_readers_for_seq(&channel_id, seq, limit);
    Ok(Json(ReadersResponse {
        count: result.count,
        readers: result.readers,
        truncated: result.truncated,
    }))
}

#[derive(Debug, Deserialize)]
struct ReadCountsRequest {
    channel_id: String,
    seqs: Vec<i64>,
}

async fn post_read_counts(
    State(service): State<Arc<IndexService>>,
    body: Result<Json<ReadCountsRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<HashMap<String, u64>>, ApiError> {
    let Json(request) = body.map_err(|err| ApiError::BadRequest(format!("invalid request body: {err}")))?;
    if request.channel_id.is_empty() {
        return Err(ApiError::BadRequest("channel_id must not be empty".to_string()));
    }

    let counts = service.get_read_counts(&request.channel_id, &request.seqs);
    let response: HashMap<String, u64> = counts.into_iter().map(|(seq, count)| (seq.to_string(), count)).collect();
    Ok(Json(response))
}

async fn get_stats(State(service): State<Arc<IndexService>>) -> Json<crate::service::ServiceStats> {
    Json(service.get_stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::event::ReadCursorEvent;

    fn service_with_one_reader() -> Arc<IndexService> {
        let service = Arc::new(IndexService::new(1000));
        service.handle_event(&ReadCursorEvent {
            event_type: "channel_read_advanced".to_string(),
            event_id: "e1".to_string(),
            channel_id: "C".to_string(),
            user_id: "U".to_string(),
            prev_last_seq: 0,
            new_last_seq: 150,
            timestamp: 0,
        });
        service
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = router(Arc::new(IndexService::new(1000)));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn s1_get_readers_reflects_point_query() {
        let app = router(service_with_one_reader());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/channels/C/posts/100/readers?limit=10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["readers"][0], "U");
        assert_eq!(body["truncated"], false);
    }

    #[tokio::test]
    async fn s6_unknown_channel_is_200_not_404() {
        let app = router(Arc::new(IndexService::new(1000)));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/channels/missing/posts/1/readers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn invalid_seq_is_400() {
        let app = router(Arc::new(IndexService::new(1000)));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/channels/C/posts/not-a-number/readers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn read_counts_batches_over_http() {
        let app = router(service_with_one_reader());
        let request_body = serde_json::json!({"channel_id": "C", "seqs": [50, 150, 250]}).to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/read-counts")
                    .header("content-type", "application/json")
                    .body(Body::from(request_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["50"], 1);
        assert_eq!(body["150"], 1);
        assert_eq!(body["250"], 0);
    }

    #[tokio::test]
    async fn invalid_body_is_400() {
        let app = router(Arc::new(IndexService::new(1000)));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/read-counts")
                    .header("content-type", "application/json")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stats_reports_channel_count() {
        let app = router(service_with_one_reader());
        let response = app
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["channels_count"], 1);
    }
}
