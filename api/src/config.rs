//! Environment configuration
//!
//! Every knob is an env var with a default. Parsing goes through a lookup
//! function so tests can supply values without touching the process env.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_CLASSIFIER_URL, DEFAULT_COLLABORATOR_TIMEOUT_SECS, DEFAULT_DATABASE_URL,
    DEFAULT_DECODE_SIZE, DEFAULT_EXTRACTION_TIMEOUT_SECS, DEFAULT_FFMPEG_THREADS,
    DEFAULT_LABELS, DEFAULT_LANDMARK_SERVICE_URL, DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT,
    DEFAULT_STATIC_DIR, DEFAULT_TARGET_FRAME_COUNT, MAX_DECODE_SIZE, MAX_VIDEO_UPLOAD_SIZE,
};
use crate::error::ConfigError;
use crate::models::LandmarkGroupSizes;

/// Per-frame decode settings
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeConfig {
    pub width: u32,
    pub height: u32,
    pub ffmpeg_threads: usize,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_DECODE_SIZE,
            height: DEFAULT_DECODE_SIZE,
            ffmpeg_threads: DEFAULT_FFMPEG_THREADS,
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
        }
    }
}

/// Shape of the sample fed to the classifier
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingConfig {
    pub target_frame_count: usize,
    pub landmark_group_sizes: LandmarkGroupSizes,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            target_frame_count: DEFAULT_TARGET_FRAME_COUNT,
            landmark_group_sizes: LandmarkGroupSizes::default(),
        }
    }
}

/// Where the black-box models live
#[derive(Debug, Clone, PartialEq)]
pub struct CollaboratorConfig {
    pub landmark_service_url: String,
    pub classifier_url: String,
    pub labels: Vec<String>,
    /// `(frames, features)` the classifier artifact was trained on
    pub input_shape: (usize, usize),
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub port: u16,
    pub static_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub extraction_timeout: Duration,
    pub sampling: SamplingConfig,
    pub decode: DecodeConfig,
    pub collaborators: CollaboratorConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sizes = LandmarkGroupSizes {
            face: positive(&lookup, "FACE_LANDMARKS", 468),
            pose: positive(&lookup, "POSE_LANDMARKS", 33),
            left_hand: positive(&lookup, "HAND_LANDMARKS", 21),
            right_hand: positive(&lookup, "HAND_LANDMARKS", 21),
        };

        let labels: Vec<String> = lookup("CLASSIFIER_LABELS")
            .unwrap_or_else(|| DEFAULT_LABELS.join(","))
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if labels.is_empty() {
            return Err(ConfigError::invalid(
                "CLASSIFIER_LABELS",
                "at least one label is required",
            ));
        }

        let target_frame_count = positive(&lookup, "TARGET_FRAME_COUNT", DEFAULT_TARGET_FRAME_COUNT);
        if target_frame_count > 10_000 {
            return Err(ConfigError::invalid(
                "TARGET_FRAME_COUNT",
                "must be at most 10000",
            ));
        }

        let width = positive(&lookup, "DECODE_WIDTH", DEFAULT_DECODE_SIZE);
        let height = positive(&lookup, "DECODE_HEIGHT", DEFAULT_DECODE_SIZE);
        for (field, value) in [("DECODE_WIDTH", width), ("DECODE_HEIGHT", height)] {
            if value > MAX_DECODE_SIZE {
                return Err(ConfigError::invalid(
                    field,
                    &format!("must be at most {}", MAX_DECODE_SIZE),
                ));
            }
        }

        let input_shape = match lookup("CLASSIFIER_INPUT_SHAPE") {
            Some(raw) => parse_shape(&raw).ok_or_else(|| {
                ConfigError::invalid("CLASSIFIER_INPUT_SHAPE", "expected <frames>x<features>")
            })?,
            None => (target_frame_count, sizes.feature_len()),
        };

        let config = Config {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            max_connections: positive(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS),
            port: positive(&lookup, "PORT", DEFAULT_PORT),
            static_dir: lookup("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR)),
            max_upload_bytes: positive(&lookup, "MAX_VIDEO_UPLOAD_BYTES", MAX_VIDEO_UPLOAD_SIZE),
            extraction_timeout: Duration::from_secs(positive(
                &lookup,
                "EXTRACTION_TIMEOUT_SECS",
                DEFAULT_EXTRACTION_TIMEOUT_SECS,
            )),
            sampling: SamplingConfig {
                target_frame_count,
                landmark_group_sizes: sizes,
            },
            decode: DecodeConfig {
                width,
                height,
                ffmpeg_threads: positive(&lookup, "FFMPEG_THREADS", DEFAULT_FFMPEG_THREADS),
                ffmpeg_bin: lookup("FFMPEG_BIN").unwrap_or_else(|| "ffmpeg".to_string()),
                ffprobe_bin: lookup("FFPROBE_BIN").unwrap_or_else(|| "ffprobe".to_string()),
            },
            collaborators: CollaboratorConfig {
                landmark_service_url: lookup("LANDMARK_SERVICE_URL")
                    .unwrap_or_else(|| DEFAULT_LANDMARK_SERVICE_URL.to_string()),
                classifier_url: lookup("CLASSIFIER_URL")
                    .unwrap_or_else(|| DEFAULT_CLASSIFIER_URL.to_string()),
                labels,
                input_shape,
                timeout: Duration::from_secs(positive(
                    &lookup,
                    "COLLABORATOR_TIMEOUT_SECS",
                    DEFAULT_COLLABORATOR_TIMEOUT_SECS,
                )),
            },
        };

        Ok(config)
    }
}

/// Parse a positive number, falling back to `default` when unset, zero or
/// unparsable.
fn positive<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + Default,
{
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .filter(|v| *v > T::default())
        .unwrap_or(default)
}

/// Parse `"30x1662"` into `(30, 1662)`
fn parse_shape(raw: &str) -> Option<(usize, usize)> {
    let (frames, features) = raw.trim().split_once(['x', 'X'])?;
    let frames = frames.trim().parse::<usize>().ok().filter(|v| *v > 0)?;
    let features = features.trim().parse::<usize>().ok().filter(|v| *v > 0)?;
    Some((frames, features))
}
