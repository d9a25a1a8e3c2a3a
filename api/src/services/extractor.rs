//! Landmark extractor collaborator
//!
//! The holistic landmark model runs out of process. Each sampled frame is
//! PNG-encoded and posted to the landmark service, which answers with the
//! four optional landmark groups.

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use reqwest::Client;
use std::io::Cursor;
use std::time::Duration;

use crate::error::ExtractorError;
use crate::frames::VideoFrame;
use crate::models::FrameLandmarks;

/// Pluggable per-frame landmark detection
#[async_trait]
pub trait LandmarkExtractor: Send + Sync {
    async fn extract(&self, frame: &VideoFrame) -> Result<FrameLandmarks, ExtractorError>;
}

#[derive(Clone)]
pub struct HttpLandmarkExtractor {
    url: String,
    http: Client,
}

impl HttpLandmarkExtractor {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ExtractorError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            http,
        })
    }
}

#[async_trait]
impl LandmarkExtractor for HttpLandmarkExtractor {
    async fn extract(&self, frame: &VideoFrame) -> Result<FrameLandmarks, ExtractorError> {
        let png = encode_png(frame)?;

        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(png)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractorError::Service {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<FrameLandmarks>().await?)
    }
}

/// Encode a raw RGB24 frame as PNG
pub fn encode_png(frame: &VideoFrame) -> Result<Vec<u8>, ExtractorError> {
    let img = RgbImage::from_raw(frame.width, frame.height, frame.rgb.clone()).ok_or_else(|| {
        ExtractorError::Encode(format!(
            "frame {} has {} bytes, expected {}x{}x3",
            frame.index,
            frame.rgb.len(),
            frame.width,
            frame.height
        ))
    })?;

    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| ExtractorError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}
