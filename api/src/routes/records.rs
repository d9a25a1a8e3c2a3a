//! Stored recording endpoints

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::AppState;
use crate::domain::recordings::{self, StoredRecording};
use crate::services::error::LogErr;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/all_records", get(all_records))
        .route("/record", get(get_record))
        .route("/delete_record", get(delete_record_query))
        .route("/records/{id}", delete(delete_record))
        .route("/reset", get(reset))
}

#[derive(Debug, Deserialize)]
struct RecordQuery {
    id: i64,
}

fn not_found_message(id: i64) -> Value {
    json!({ "message": format!("No record found with id : {}", id) })
}

/// GET /all_records
async fn all_records(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<StoredRecording>>, StatusCode> {
    let rows = recordings::list_recordings(&state.db)
        .await
        .log_500("List recordings error")?;
    let records = recordings::load_recordings(&state.db, rows)
        .await
        .log_500("Load recordings error")?;
    Ok(Json(records))
}

/// GET /record?id=
async fn get_record(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecordQuery>,
) -> Result<Json<Value>, StatusCode> {
    let Some(row) = recordings::get_recording(&state.db, query.id)
        .await
        .log_500("Get recording error")?
    else {
        return Ok(Json(not_found_message(query.id)));
    };

    let record = recordings::load_recordings(&state.db, vec![row])
        .await
        .log_500("Load recording error")?
        .pop();
    let body = serde_json::to_value(record).log_500("Serialize recording error")?;
    Ok(Json(body))
}

/// GET /delete_record?id= - answers 200 with a message either way
async fn delete_record_query(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecordQuery>,
) -> Result<Json<Value>, StatusCode> {
    let deleted = recordings::delete_recording(&state.db, query.id)
        .await
        .log_500("Delete recording error")?;
    if !deleted {
        return Ok(Json(not_found_message(query.id)));
    }
    Ok(Json(json!({ "message": "Record deleted" })))
}

/// DELETE /records/{id}
async fn delete_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let deleted = recordings::delete_recording(&state.db, id)
        .await
        .log_500("Delete recording error")?;
    if !deleted {
        return Ok((StatusCode::NOT_FOUND, Json(not_found_message(id))));
    }
    tracing::info!(record_id = id, "Recording deleted");
    Ok((StatusCode::OK, Json(json!({ "message": "Record deleted" }))))
}

/// GET /reset - drop every stored recording
async fn reset(State(state): State<Arc<AppState>>) -> Result<Json<Value>, StatusCode> {
    recordings::reset(&state.db)
        .await
        .log_500("Reset error")?;
    tracing::warn!("All recordings removed");
    Ok(Json(json!({ "message": "Database reset successfully" })))
}
