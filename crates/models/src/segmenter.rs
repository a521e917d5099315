//! Plant segmentation.
//!
//! [`UnetSegmenter`] talks to a TorchServe-hosted U-Net. The service takes a
//! PNG in the multipart field `data` and answers with one detection object
//! or a list of them:
//!
//! ```json
//! [{ "mask": "<base64 PNG>", "bbox": [x, y, w, h], "score": 0.93,
//!    "lesion_mask": "<base64 PNG>", "has_disease": true }]
//! ```
//!
//! Only `mask` is required. Masks are greyscale and any non-zero pixel is
//! set; a mask whose size differs from the request image is resized back to
//! it. Fractional boxes are widened to whole pixels and clipped to the image.
//! A detection with an empty mask is kept only when it carries a `bbox`.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cropscan_core::error::Service;
use cropscan_core::mask::{BinaryMask, Detection};
use cropscan_core::types::BoundingBox;
use image::{ImageFormat, RgbImage};
use serde::Deserialize;

use crate::error::ModelError;
use crate::http;

/// Grey level at or above which a mask pixel is set.
const MASK_THRESHOLD: u8 = 1;

/// Finds plants in an image.
#[async_trait]
pub trait Segmenter: Send + Sync {
    /// Detect every plant in `image`. No plants is `Ok(vec![])`.
    ///
    /// Masks in the returned detections are aligned to `image`.
    async fn segment(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelError>;

    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// U-Net over HTTP
// ---------------------------------------------------------------------------

/// HTTP client for a U-Net segmentation endpoint.
pub struct UnetSegmenter {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl UnetSegmenter {
    pub fn new(endpoint: String, timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint, timeout)
    }

    /// Reuse an existing [`reqwest::Client`] (and its connection pool).
    pub fn with_client(client: reqwest::Client, endpoint: String, timeout: Duration) -> Self {
        Self {
            client,
            endpoint,
            timeout,
        }
    }
}

#[async_trait]
impl Segmenter for UnetSegmenter {
    async fn segment(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelError> {
        let service = Service::Segmentation;
        let form = http::image_form(service, "data", image, ImageFormat::Png)?;

        tracing::debug!(
            endpoint = %self.endpoint,
            width = image.width(),
            height = image.height(),
            "Requesting segmentation",
        );

        let request = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .multipart(form);
        let response = http::send(service, request).await?;
        let body: SegmentationResponse = http::parse_response(service, response).await?;

        let detections = decode_detections(body, image.width(), image.height())?;
        tracing::debug!(detections = detections.len(), "Segmentation complete");
        Ok(detections)
    }

    fn name(&self) -> &'static str {
        "unet"
    }
}

// ---- wire format ----

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SegmentationResponse {
    Many(Vec<RawDetection>),
    One(RawDetection),
}

#[derive(Debug, Deserialize)]
struct RawDetection {
    mask: String,
    #[serde(default)]
    bbox: Option<[f64; 4]>,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    lesion_mask: Option<String>,
    #[serde(default)]
    has_disease: Option<bool>,
}

fn decode_detections(
    body: SegmentationResponse,
    width: u32,
    height: u32,
) -> Result<Vec<Detection>, ModelError> {
    let raw = match body {
        SegmentationResponse::Many(list) => list,
        SegmentationResponse::One(single) => vec![single],
    };

    let mut detections = Vec::with_capacity(raw.len());
    for (index, item) in raw.into_iter().enumerate() {
        let mask = decode_mask(&item.mask, width, height)?;
        if mask.is_empty() && item.bbox.is_none() {
            return Err(ModelError::rejected(
                Service::Segmentation,
                format!("detection {index} has an empty mask and no bbox"),
            ));
        }

        let mut detection = Detection::new(mask);
        if let Some(bbox) = item.bbox {
            detection = detection.with_bounding_box(decode_bbox(bbox, width, height)?);
        }
        if let Some(score) = item.score {
            detection = detection.with_score(score);
        }
        if let Some(has_disease) = item.has_disease {
            detection = detection.with_has_disease(has_disease);
        }
        if item.has_disease != Some(false) {
            if let Some(encoded) = &item.lesion_mask {
                detection = detection.with_lesion_mask(decode_mask(encoded, width, height)?);
            }
        }
        detections.push(detection);
    }
    Ok(detections)
}

fn decode_mask(encoded: &str, width: u32, height: u32) -> Result<BinaryMask, ModelError> {
    let service = Service::Segmentation;
    let encoded = encoded
        .split_once(";base64,")
        .map_or(encoded, |(_, data)| data);

    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ModelError::rejected(service, format!("mask is not valid base64: {e}")))?;
    let gray = image::load_from_memory(&bytes)
        .map_err(|e| ModelError::rejected(service, format!("mask is not a readable image: {e}")))?
        .to_luma8();

    let mask = BinaryMask::from_luma(&gray, MASK_THRESHOLD);
    if mask.dimensions() != (width, height) {
        tracing::warn!(
            mask_width = mask.width(),
            mask_height = mask.height(),
            width,
            height,
            "Segmentation mask size differs from image, resizing",
        );
        return Ok(mask.resize_nearest(width, height));
    }
    Ok(mask)
}

/// `[x, y, w, h]` in pixels, rounded outwards and clipped to the image.
fn decode_bbox(
    [x, y, w, h]: [f64; 4],
    width: u32,
    height: u32,
) -> Result<BoundingBox, ModelError> {
    let invalid = || {
        ModelError::rejected(
            Service::Segmentation,
            format!("invalid bounding box [{x}, {y}, {w}, {h}]"),
        )
    };
    if [x, y, w, h].iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(invalid());
    }

    let left = x.floor();
    let top = y.floor();
    let right = (x + w).ceil().min(f64::from(width));
    let bottom = (y + h).ceil().min(f64::from(height));
    if right <= left || bottom <= top {
        return Err(invalid());
    }
    Ok(BoundingBox::new(
        left as u32,
        top as u32,
        (right - left) as u32,
        (bottom - top) as u32,
    ))
}
