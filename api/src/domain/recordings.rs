//! Recording domain - DB queries for classified samples and their landmarks
//!
//! Single-statement queries use the generic Executor pattern so they work
//! with both `&PgPool` and `&mut PgConnection`. Multi-statement operations
//! take a connection (inserts, inside a transaction) or the pool (reads).

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, PgConnection, PgPool, Postgres};
use std::collections::HashMap;

use crate::models::{FrameRecord, LandmarkPoint, PosePoint};

/// The four per-group landmark tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LandmarkTable {
    Face,
    Pose,
    LeftHand,
    RightHand,
}

impl LandmarkTable {
    pub const ALL: [LandmarkTable; 4] = [
        LandmarkTable::Face,
        LandmarkTable::Pose,
        LandmarkTable::LeftHand,
        LandmarkTable::RightHand,
    ];

    fn as_str(self) -> &'static str {
        match self {
            LandmarkTable::Face => "face_landmarks",
            LandmarkTable::Pose => "pose_landmarks",
            LandmarkTable::LeftHand => "left_hand_landmarks",
            LandmarkTable::RightHand => "right_hand_landmarks",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecordingRow {
    pub id: i64,
    pub prediction_label: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FrameRow {
    pub id: i64,
    pub recording_id: i64,
    pub frame_id: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PointRow {
    pub frame_row_id: i64,
    pub point_index: i32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: Option<f32>,
}

/// A stored sample in the shape served by the record endpoints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecording {
    pub id: i64,
    pub prediction_label: String,
    pub timestamp: DateTime<Utc>,
    pub frames: Vec<FrameRecord>,
}

/// Column-oriented buffer for one UNNEST insert
#[derive(Debug, Default, PartialEq)]
struct PointColumns {
    frame_row_ids: Vec<i64>,
    point_indices: Vec<i32>,
    xs: Vec<f32>,
    ys: Vec<f32>,
    zs: Vec<f32>,
    visibility: Vec<f32>,
}

impl PointColumns {
    fn push_points(&mut self, frame_row_id: i64, points: &[LandmarkPoint]) {
        for (i, p) in points.iter().enumerate() {
            self.push(frame_row_id, i, p.x, p.y, p.z);
        }
    }

    fn push_pose(&mut self, frame_row_id: i64, points: &[PosePoint]) {
        for (i, p) in points.iter().enumerate() {
            self.push(frame_row_id, i, p.x, p.y, p.z);
            self.visibility.push(p.visibility);
        }
    }

    fn push(&mut self, frame_row_id: i64, index: usize, x: f32, y: f32, z: f32) {
        self.frame_row_ids.push(frame_row_id);
        self.point_indices.push(index as i32);
        self.xs.push(x);
        self.ys.push(y);
        self.zs.push(z);
    }

    fn is_empty(&self) -> bool {
        self.frame_row_ids.is_empty()
    }
}

/// Insert a recording with all of its frames and landmarks. Run it inside a
/// transaction so a failure leaves nothing behind.
pub async fn insert_recording(
    conn: &mut PgConnection,
    prediction_label: &str,
    frames: &[FrameRecord],
) -> Result<i64, sqlx::Error> {
    let (recording_id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO recordings (prediction_label)
        VALUES ($1)
        RETURNING id
        "#,
    )
    .bind(prediction_label)
    .fetch_one(&mut *conn)
    .await?;

    let mut face = PointColumns::default();
    let mut pose = PointColumns::default();
    let mut left_hand = PointColumns::default();
    let mut right_hand = PointColumns::default();

    for frame in frames {
        let (frame_row_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO recording_frames (recording_id, frame_id)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(recording_id)
        .bind(i64::from(frame.frame_id))
        .fetch_one(&mut *conn)
        .await?;

        face.push_points(frame_row_id, &frame.face_landmarks);
        pose.push_pose(frame_row_id, &frame.pose_landmarks);
        left_hand.push_points(frame_row_id, &frame.left_hand_landmarks);
        right_hand.push_points(frame_row_id, &frame.right_hand_landmarks);
    }

    insert_points(&mut *conn, LandmarkTable::Face, &face).await?;
    insert_points(&mut *conn, LandmarkTable::Pose, &pose).await?;
    insert_points(&mut *conn, LandmarkTable::LeftHand, &left_hand).await?;
    insert_points(&mut *conn, LandmarkTable::RightHand, &right_hand).await?;

    Ok(recording_id)
}

async fn insert_points(
    conn: &mut PgConnection,
    table: LandmarkTable,
    columns: &PointColumns,
) -> Result<(), sqlx::Error> {
    if columns.is_empty() {
        return Ok(());
    }

    if table == LandmarkTable::Pose {
        sqlx::query(
            r#"
            INSERT INTO pose_landmarks (frame_row_id, point_index, x, y, z, visibility)
            SELECT * FROM UNNEST($1::bigint[], $2::int[], $3::real[], $4::real[], $5::real[], $6::real[])
            "#,
        )
        .bind(&columns.frame_row_ids)
        .bind(&columns.point_indices)
        .bind(&columns.xs)
        .bind(&columns.ys)
        .bind(&columns.zs)
        .bind(&columns.visibility)
        .execute(&mut *conn)
        .await?;
        return Ok(());
    }

    let sql = format!(
        "INSERT INTO {} (frame_row_id, point_index, x, y, z) \
         SELECT * FROM UNNEST($1::bigint[], $2::int[], $3::real[], $4::real[], $5::real[])",
        table.as_str()
    );
    sqlx::query(&sql)
        .bind(&columns.frame_row_ids)
        .bind(&columns.point_indices)
        .bind(&columns.xs)
        .bind(&columns.ys)
        .bind(&columns.zs)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Insert in a single transaction
pub async fn save_recording(
    db: &PgPool,
    prediction_label: &str,
    frames: &[FrameRecord],
) -> Result<i64, sqlx::Error> {
    let mut tx = db.begin().await?;
    let id = insert_recording(&mut *tx, prediction_label, frames).await?;
    tx.commit().await?;
    Ok(id)
}

pub async fn list_recordings<'e, E>(executor: E) -> Result<Vec<RecordingRow>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT id, prediction_label, created_at FROM recordings
        ORDER BY id
        "#,
    )
    .fetch_all(executor)
    .await
}

pub async fn get_recording<'e, E>(executor: E, id: i64) -> Result<Option<RecordingRow>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT id, prediction_label, created_at FROM recordings
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}

pub async fn get_frames<'e, E>(executor: E, recording_ids: &[i64]) -> Result<Vec<FrameRow>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT id, recording_id, frame_id FROM recording_frames
        WHERE recording_id = ANY($1)
        ORDER BY recording_id, frame_id, id
        "#,
    )
    .bind(recording_ids)
    .fetch_all(executor)
    .await
}

pub async fn get_points<'e, E>(
    executor: E,
    table: LandmarkTable,
    frame_row_ids: &[i64],
) -> Result<Vec<PointRow>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let visibility = if table == LandmarkTable::Pose {
        "visibility"
    } else {
        "NULL::real AS visibility"
    };
    let sql = format!(
        "SELECT frame_row_id, point_index, x, y, z, {} FROM {} \
         WHERE frame_row_id = ANY($1) \
         ORDER BY frame_row_id, point_index",
        visibility,
        table.as_str()
    );
    sqlx::query_as(&sql)
        .bind(frame_row_ids)
        .fetch_all(executor)
        .await
}

/// Delete a recording; frames and landmarks go with it. Returns false when
/// no recording had that id.
pub async fn delete_recording<'e, E>(executor: E, id: i64) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM recordings WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove every stored recording and restart ids
pub async fn reset<'e, E>(executor: E) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        TRUNCATE recordings, recording_frames, face_landmarks, pose_landmarks,
                 left_hand_landmarks, right_hand_landmarks
        RESTART IDENTITY CASCADE
        "#,
    )
    .execute(executor)
    .await?;
    Ok(())
}

/// Load frames and landmarks for `recordings` and rebuild the nested shape
pub async fn load_recordings(
    db: &PgPool,
    recordings: Vec<RecordingRow>,
) -> Result<Vec<StoredRecording>, sqlx::Error> {
    if recordings.is_empty() {
        return Ok(Vec::new());
    }

    let recording_ids: Vec<i64> = recordings.iter().map(|r| r.id).collect();
    let frames = get_frames(db, &recording_ids).await?;
    let frame_row_ids: Vec<i64> = frames.iter().map(|f| f.id).collect();

    let mut points = HashMap::new();
    for table in LandmarkTable::ALL {
        points.insert(table, get_points(db, table, &frame_row_ids).await?);
    }

    Ok(assemble_recordings(recordings, frames, points))
}

/// Group flat rows back into records. Frame and point rows must already be
/// ordered; each ends up under its parent in that order.
pub fn assemble_recordings(
    recordings: Vec<RecordingRow>,
    frames: Vec<FrameRow>,
    mut points: HashMap<LandmarkTable, Vec<PointRow>>,
) -> Vec<StoredRecording> {
    let mut by_frame: HashMap<i64, FrameRecord> = HashMap::new();
    for frame in &frames {
        let Ok(frame_id) = u32::try_from(frame.frame_id) else {
            tracing::warn!(row = frame.id, frame_id = frame.frame_id, "Skipping frame with out of range id");
            continue;
        };
        by_frame.insert(frame.id, FrameRecord::empty(frame_id));
    }

    for table in LandmarkTable::ALL {
        for row in points.remove(&table).unwrap_or_default() {
            let Some(record) = by_frame.get_mut(&row.frame_row_id) else {
                continue;
            };
            match table {
                LandmarkTable::Face => record
                    .face_landmarks
                    .push(LandmarkPoint::new(row.x, row.y, row.z)),
                LandmarkTable::Pose => record.pose_landmarks.push(PosePoint::new(
                    row.x,
                    row.y,
                    row.z,
                    row.visibility.unwrap_or(0.0),
                )),
                LandmarkTable::LeftHand => record
                    .left_hand_landmarks
                    .push(LandmarkPoint::new(row.x, row.y, row.z)),
                LandmarkTable::RightHand => record
                    .right_hand_landmarks
                    .push(LandmarkPoint::new(row.x, row.y, row.z)),
            }
        }
    }

    let mut by_recording: HashMap<i64, Vec<FrameRecord>> = HashMap::new();
    for frame in frames {
        if let Some(record) = by_frame.remove(&frame.id) {
            by_recording.entry(frame.recording_id).or_default().push(record);
        }
    }

    recordings
        .into_iter()
        .map(|r| StoredRecording {
            frames: by_recording.remove(&r.id).unwrap_or_default(),
            id: r.id,
            prediction_label: r.prediction_label,
            timestamp: r.created_at,
        })
        .collect()
}
