//! Prediction endpoints (/predict, /predict-video)

use axum::{
    Json, Router,
    extract::{Multipart, State},
    http::StatusCode,
    routing::post,
};
use serde::Serialize;
use std::sync::Arc;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};

use crate::AppState;
use crate::constants::{PREDICT_RATE_LIMIT_BURST, PREDICT_RATE_LIMIT_PERIOD_SECS, PREDICTION_PREFIX};
use crate::domain::recordings;
use crate::models::FrameSequence;
use crate::services::error::{ApiError, LogErr};
use crate::storage::TempUpload;

pub fn routes() -> Router<Arc<AppState>> {
    let rate_limit_config = GovernorConfigBuilder::default()
        .per_second(PREDICT_RATE_LIMIT_PERIOD_SECS)
        .burst_size(PREDICT_RATE_LIMIT_BURST)
        .key_extractor(SmartIpKeyExtractor)
        .finish();

    match rate_limit_config {
        Some(config) => prediction_routes().layer(GovernorLayer {
            config: config.into(),
        }),
        None => {
            tracing::warn!("Invalid rate limit config, prediction routes are unthrottled");
            prediction_routes()
        }
    }
}

fn prediction_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/predict", post(predict))
        .route("/predict-video", post(predict_video))
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    prediction: String,
    label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    record_id: Option<i64>,
}

impl PredictionResponse {
    fn new(label: String, record_id: Option<i64>) -> Self {
        Self {
            prediction: format!("{}{}", PREDICTION_PREFIX, label),
            label,
            record_id,
        }
    }
}

/// POST /predict - classify landmarks captured by the browser client.
/// The sample is stored in the background; a storage failure does not fail
/// the request.
async fn predict(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<FrameSequence>,
) -> Result<Json<PredictionResponse>, ApiError> {
    if payload.is_empty() {
        return Err(ApiError::bad_request("No frames received"));
    }
    let received = payload.len();
    let sequence = state.recognizer.prepare(payload)?;
    let label = state.recognizer.classify(&sequence).await?;
    tracing::info!(frames = received, label = %label, "Prediction from client frames");

    let db = state.db.clone();
    let stored_label = label.clone();
    tokio::spawn(async move {
        match recordings::save_recording(&db, &stored_label, &sequence.frame_data).await {
            Ok(id) => tracing::debug!(record_id = id, "Recording saved"),
            Err(e) => tracing::error!("Failed to save recording: {}", e),
        }
    });

    Ok(Json(PredictionResponse::new(label, None)))
}

/// Reject anything that is not a video or is over the upload limit
fn check_upload(content_type: &str, len: usize, max: usize) -> Result<(), ApiError> {
    if !content_type.starts_with("video/") {
        return Err(ApiError::bad_request(
            "Invalid file type. Please upload a video file.",
        ));
    }
    if len > max {
        return Err(ApiError::bad_request(format!(
            "File too large. Maximum size is {}MB.",
            max / (1024 * 1024)
        )));
    }
    Ok(())
}

/// POST /predict-video - multipart upload with a `video` field
async fn predict_video(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<PredictionResponse>, ApiError> {
    let mut video = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .log_status("Multipart field error", StatusCode::BAD_REQUEST)?
    {
        if field.name() != Some("video") {
            continue;
        }
        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        check_upload(&content_type, 0, state.max_upload_bytes)?;

        let body = field
            .bytes()
            .await
            .log_status("Failed to read video field", StatusCode::BAD_REQUEST)?;
        check_upload(&content_type, body.len(), state.max_upload_bytes)?;
        video = Some((content_type, body));
        break;
    }

    let (content_type, body) =
        video.ok_or_else(|| ApiError::bad_request("Missing multipart field 'video'"))?;

    let upload = TempUpload::write(&body, &content_type)
        .await
        .log_500("Failed to write upload")?;
    tracing::info!(bytes = body.len(), content_type = %content_type, "Video upload received");

    let result = recognize_upload(&state, &upload).await;
    upload.cleanup().await;
    result.map(Json)
}

async fn recognize_upload(
    state: &AppState,
    upload: &TempUpload,
) -> Result<PredictionResponse, ApiError> {
    let sequence = state.recognizer.extract_from_video(upload.path()).await?;
    let label = state.recognizer.classify(&sequence).await?;
    let detected = sequence.frame_data.iter().filter(|f| !f.is_empty()).count();
    tracing::info!(detected, label = %label, "Prediction from uploaded video");

    let record_id = recordings::save_recording(&state.db, &label, &sequence.frame_data)
        .await
        .log_500("Failed to save recording")?;

    Ok(PredictionResponse::new(label, Some(record_id)))
}
