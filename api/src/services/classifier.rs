//! Gesture classifier collaborator
//!
//! The pretrained model is served behind a TF-Serving style REST endpoint:
//! `POST {"instances": [tensor]}` answers `{"predictions": [[score, ...]]}`.
//! The model's expected input shape is declared up front in [`ModelSpec`] and
//! checked before every call.

use async_trait::async_trait;
use ndarray::Array2;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ClassifierError, PipelineError};

/// Input shape and output labels of a classifier artifact
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub frames: usize,
    pub features: usize,
    pub labels: Vec<String>,
}

impl ModelSpec {
    /// Reject tensors whose shape differs from the model input
    pub fn check_shape(&self, tensor: &Array2<f32>) -> Result<(), PipelineError> {
        let (rows, cols) = tensor.dim();
        if rows != self.frames || cols != self.features {
            return Err(PipelineError::ShapeMismatch {
                rows,
                cols,
                expected_rows: self.frames,
                expected_cols: self.features,
            });
        }
        Ok(())
    }
}

/// Pluggable `tensor -> label` model
#[async_trait]
pub trait GestureClassifier: Send + Sync {
    fn spec(&self) -> &ModelSpec;

    async fn classify(&self, tensor: &Array2<f32>) -> Result<String, ClassifierError>;
}

#[derive(Serialize)]
struct PredictRequest {
    instances: Vec<Vec<Vec<f32>>>,
}

#[derive(Deserialize)]
struct PredictResponse {
    predictions: Vec<Vec<f32>>,
}

#[derive(Clone)]
pub struct HttpClassifier {
    url: String,
    spec: ModelSpec,
    http: Client,
}

impl HttpClassifier {
    pub fn new(url: &str, spec: ModelSpec, timeout: Duration) -> Result<Self, ClassifierError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            spec,
            http,
        })
    }
}

#[async_trait]
impl GestureClassifier for HttpClassifier {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    async fn classify(&self, tensor: &Array2<f32>) -> Result<String, ClassifierError> {
        let request = PredictRequest {
            instances: vec![tensor.outer_iter().map(|row| row.to_vec()).collect()],
        };

        let response = self.http.post(&self.url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let body: PredictResponse = response.json().await?;
        let scores = body.predictions.first().ok_or(ClassifierError::Empty)?;
        label_for_scores(scores, &self.spec.labels)
    }
}

/// Label of the highest score; the first maximum wins ties.
pub fn label_for_scores(scores: &[f32], labels: &[String]) -> Result<String, ClassifierError> {
    if scores.len() != labels.len() {
        return Err(ClassifierError::ScoreCount {
            got: scores.len(),
            expected: labels.len(),
        });
    }

    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }

    best.map(|(i, _)| labels[i].clone())
        .ok_or(ClassifierError::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_argmax_label() {
        let l = labels(&["before", "computer", "cool"]);
        assert_eq!(label_for_scores(&[0.1, 0.7, 0.2], &l).unwrap(), "computer");
        assert_eq!(label_for_scores(&[0.4, 0.2, 0.4], &l).unwrap(), "before");
        assert_eq!(label_for_scores(&[f32::NAN, 0.1, 0.0], &l).unwrap(), "computer");
    }

    #[test]
    fn test_score_count_mismatch() {
        let err = label_for_scores(&[0.5, 0.5], &labels(&["a", "b", "c"])).unwrap_err();
        assert!(matches!(err, ClassifierError::ScoreCount { got: 2, expected: 3 }));
    }

    #[test]
    fn test_all_nan_is_empty() {
        let err = label_for_scores(&[f32::NAN], &labels(&["a"])).unwrap_err();
        assert!(matches!(err, ClassifierError::Empty));
    }

    #[test]
    fn test_check_shape() {
        let spec = ModelSpec {
            frames: 30,
            features: 1662,
            labels: labels(&["a"]),
        };
        assert!(spec.check_shape(&Array2::zeros((30, 1662))).is_ok());
        let err = spec.check_shape(&Array2::zeros((29, 1662))).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ShapeMismatch { rows: 29, expected_rows: 30, .. }
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let tensor = Array2::from_shape_vec((2, 3), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let request = PredictRequest {
            instances: vec![tensor.outer_iter().map(|row| row.to_vec()).collect()],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({"instances": [[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]]}));
    }

    #[test]
    fn test_response_parsing() {
        let body: PredictResponse =
            serde_json::from_str(r#"{"predictions": [[0.0, 1.0]]}"#).unwrap();
        assert_eq!(body.predictions, vec![vec![0.0, 1.0]]);
    }
}
