//! Recognition pipeline: video or client frames in, gesture label out

use ndarray::Array2;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{DecodeConfig, SamplingConfig};
use crate::error::{ConfigError, PipelineError};
use crate::frames::{self, FfmpegDecoder, FrameSource};
use crate::models::FrameSequence;
use crate::sampling::{assemble, pad};
use crate::services::classifier::GestureClassifier;
use crate::services::extractor::LandmarkExtractor;

#[derive(Clone)]
pub struct Recognizer {
    sampling: SamplingConfig,
    decode: DecodeConfig,
    extraction_timeout: Duration,
    extractor: Arc<dyn LandmarkExtractor>,
    classifier: Arc<dyn GestureClassifier>,
}

impl Recognizer {
    /// Fails when the classifier's declared input shape does not match the
    /// configured frame count and landmark group sizes.
    pub fn new(
        sampling: SamplingConfig,
        decode: DecodeConfig,
        extraction_timeout: Duration,
        extractor: Arc<dyn LandmarkExtractor>,
        classifier: Arc<dyn GestureClassifier>,
    ) -> Result<Self, ConfigError> {
        let spec = classifier.spec();
        let features = sampling.landmark_group_sizes.feature_len();
        if spec.frames != sampling.target_frame_count || spec.features != features {
            return Err(ConfigError::invalid(
                "CLASSIFIER_INPUT_SHAPE",
                &format!(
                    "model expects ({}, {}) but sampling produces ({}, {})",
                    spec.frames, spec.features, sampling.target_frame_count, features
                ),
            ));
        }

        Ok(Self {
            sampling,
            decode,
            extraction_timeout,
            extractor,
            classifier,
        })
    }

    pub fn target_frame_count(&self) -> usize {
        self.sampling.target_frame_count
    }

    /// Decode `path`, extract landmarks on the sampled frames and pad the
    /// result to the target length. Bounded by the extraction timeout; the
    /// decoder is killed if the budget runs out.
    pub async fn extract_from_video(&self, path: &Path) -> Result<FrameSequence, PipelineError> {
        let started = Instant::now();

        let sequence = tokio::time::timeout(self.extraction_timeout, async {
            let mut decoder = FfmpegDecoder::open(path, &self.decode).await?;
            self.extract_from_source(&mut decoder).await
        })
        .await
        .map_err(|_| PipelineError::Timeout(self.extraction_timeout.as_secs()))??;

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "landmarks extracted from video"
        );
        Ok(sequence)
    }

    /// Run extraction over an opened source and pad the result. The source
    /// is closed before returning. A source that yields no frame at all is
    /// a decode error.
    pub async fn extract_from_source<S>(&self, source: &mut S) -> Result<FrameSequence, PipelineError>
    where
        S: FrameSource + ?Sized,
    {
        let target = self.target_frame_count();
        let result = frames::extract_frame_records(source, self.extractor.as_ref(), target).await;
        source.close().await;

        let records = result?;
        if records.is_empty() {
            return Err(PipelineError::Decode("video contains no frames".to_string()));
        }
        tracing::debug!(
            total_frames = source.total_frames(),
            extracted = records.len(),
            "frames sampled"
        );
        Ok(FrameSequence::new(pad(records, target)))
    }

    /// Normalize a client-submitted sequence: short sequences are padded,
    /// long ones rejected.
    pub fn prepare(&self, sequence: FrameSequence) -> Result<FrameSequence, PipelineError> {
        let target = self.target_frame_count();
        if sequence.len() > target {
            return Err(PipelineError::TooManyFrames {
                got: sequence.len(),
                max: target,
            });
        }
        Ok(FrameSequence::new(pad(sequence.frame_data, target)))
    }

    /// Flatten a padded sequence into the classifier input tensor
    pub fn tensor(&self, sequence: &FrameSequence) -> Result<Array2<f32>, PipelineError> {
        let tensor = assemble(&sequence.frame_data, &self.sampling.landmark_group_sizes);
        self.classifier.spec().check_shape(&tensor)?;
        Ok(tensor)
    }

    pub async fn classify(&self, sequence: &FrameSequence) -> Result<String, PipelineError> {
        let started = Instant::now();
        let tensor = self.tensor(sequence)?;
        let label = self.classifier.classify(&tensor).await?;

        tracing::info!(
            label = %label,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sequence classified"
        );
        Ok(label)
    }
}
