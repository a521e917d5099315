//! Binary plant masks and the plant instances materialised from them.
//!
//! A segmentation service reports one [`Detection`] per plant. The pipeline
//! turns each detection into a [`PlantInstance`] by checking the mask
//! against the source image and cutting out the masked crop that the
//! captioning service sees.

use std::cmp::Ordering;

use image::{GrayImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::types::BoundingBox;

/// Row-major binary raster, one byte per pixel (0 or 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryMask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl BinaryMask {
    /// An all-zero mask.
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize],
        }
    }

    /// Build a mask by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(u8::from(f(x, y)));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Binarise a greyscale image: pixels at or above `threshold` are set.
    pub fn from_luma(image: &GrayImage, threshold: u8) -> Self {
        Self::from_fn(image.width(), image.height(), |x, y| {
            image.get_pixel(x, y).0[0] >= threshold
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Whether pixel `(x, y)` is set. Out-of-range coordinates read as unset.
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.data[(y as usize) * (self.width as usize) + x as usize] != 0
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if x < self.width && y < self.height {
            self.data[(y as usize) * (self.width as usize) + x as usize] = u8::from(value);
        }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Number of set pixels.
    pub fn count(&self) -> u64 {
        self.data.iter().filter(|&&v| v != 0).count() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|&v| v == 0)
    }

    /// Number of pixels set in both `self` and `other`.
    pub fn intersection_count(&self, other: &BinaryMask) -> u64 {
        if self.dimensions() != other.dimensions() {
            return 0;
        }
        self.data
            .iter()
            .zip(&other.data)
            .filter(|(a, b)| **a != 0 && **b != 0)
            .count() as u64
    }

    /// Tight bounding box around the set pixels, or `None` for an empty mask.
    pub fn nonzero_bounds(&self) -> Option<BoundingBox> {
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0u32;
        let mut max_y = 0u32;
        let mut any = false;

        for y in 0..self.height {
            for x in 0..self.width {
                if self.get(x, y) {
                    any = true;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }

        any.then(|| BoundingBox::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
    }

    /// Nearest-neighbour resample to `width` x `height`.
    pub fn resize_nearest(&self, width: u32, height: u32) -> Self {
        if self.dimensions() == (width, height) {
            return self.clone();
        }
        if self.width == 0 || self.height == 0 {
            return Self::empty(width, height);
        }
        Self::from_fn(width, height, |x, y| {
            let sx = (x as u64 * self.width as u64 / width.max(1) as u64) as u32;
            let sy = (y as u64 * self.height as u64 / height.max(1) as u64) as u32;
            self.get(sx.min(self.width - 1), sy.min(self.height - 1))
        })
    }
}

/// One plant as reported by a segmentation service, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Plant mask aligned to the source image.
    pub mask: BinaryMask,
    /// Box reported by the service; derived from the mask when absent.
    pub bounding_box: Option<BoundingBox>,
    /// Optional secondary mask flagging stressed or damaged tissue.
    pub lesion_mask: Option<BinaryMask>,
    /// Detection confidence, when the service reports one.
    pub score: Option<f32>,
    /// The service's own disease flag for this plant.
    pub has_disease: Option<bool>,
}

impl Detection {
    pub fn new(mask: BinaryMask) -> Self {
        Self {
            mask,
            bounding_box: None,
            lesion_mask: None,
            score: None,
            has_disease: None,
        }
    }

    pub fn with_bounding_box(mut self, bbox: BoundingBox) -> Self {
        self.bounding_box = Some(bbox);
        self
    }

    pub fn with_lesion_mask(mut self, lesion: BinaryMask) -> Self {
        self.lesion_mask = Some(lesion);
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_has_disease(mut self, has_disease: bool) -> Self {
        self.has_disease = Some(has_disease);
        self
    }
}

/// A detected, segmented plant within one image or frame.
///
/// Invariant: `bounding_box` lies inside the source image and contains every
/// set pixel of `mask`. Enforced by [`PlantInstance::from_detection`].
#[derive(Debug, Clone)]
pub struct PlantInstance {
    pub source_frame_index: Option<u64>,
    pub mask: BinaryMask,
    pub lesion_mask: Option<BinaryMask>,
    pub bounding_box: BoundingBox,
    pub score: Option<f32>,
    pub has_disease: Option<bool>,
    /// Bounding-box crop of the source image with unmasked pixels blacked out.
    pub crop: RgbImage,
}

impl PlantInstance {
    /// Validate `detection` against `image` and cut out its crop.
    ///
    /// Any mismatch between the mask, the box and the image is a broken
    /// pipeline invariant and yields [`AnalysisError::Internal`].
    pub fn from_detection(
        image: &RgbImage,
        source_frame_index: Option<u64>,
        detection: Detection,
    ) -> Result<Self, AnalysisError> {
        let (width, height) = image.dimensions();

        if detection.mask.dimensions() != (width, height) {
            return Err(AnalysisError::Internal(format!(
                "mask is {}x{} but source image is {width}x{height}",
                detection.mask.width(),
                detection.mask.height(),
            )));
        }
        if let Some(lesion) = &detection.lesion_mask {
            if lesion.dimensions() != (width, height) {
                return Err(AnalysisError::Internal(format!(
                    "lesion mask is {}x{} but source image is {width}x{height}",
                    lesion.width(),
                    lesion.height(),
                )));
            }
        }

        let mask_bounds = detection.mask.nonzero_bounds();
        let bounding_box = match (detection.bounding_box, mask_bounds) {
            (Some(bbox), _) => bbox,
            (None, Some(bounds)) => bounds,
            (None, None) => {
                return Err(AnalysisError::Internal(
                    "detection has an empty mask and no bounding box".to_string(),
                ))
            }
        };

        if bounding_box.width == 0 || bounding_box.height == 0 {
            return Err(AnalysisError::Internal(format!(
                "degenerate bounding box {bounding_box:?}"
            )));
        }
        if !bounding_box.fits_within(width, height) {
            return Err(AnalysisError::Internal(format!(
                "bounding box {bounding_box:?} exceeds {width}x{height} image"
            )));
        }
        if let Some(bounds) = mask_bounds {
            let contained = bounding_box.contains(bounds.x, bounds.y)
                && bounds.right() <= bounding_box.right()
                && bounds.bottom() <= bounding_box.bottom();
            if !contained {
                return Err(AnalysisError::Internal(format!(
                    "bounding box {bounding_box:?} does not contain mask region {bounds:?}"
                )));
            }
        }

        let crop = masked_crop(image, &detection.mask, bounding_box);

        Ok(Self {
            source_frame_index,
            mask: detection.mask,
            lesion_mask: detection.lesion_mask,
            bounding_box,
            score: detection.score,
            has_disease: detection.has_disease,
            crop,
        })
    }
}

/// Copy the `bbox` region of `image`, blacking out pixels outside `mask`.
fn masked_crop(image: &RgbImage, mask: &BinaryMask, bbox: BoundingBox) -> RgbImage {
    RgbImage::from_fn(bbox.width, bbox.height, |cx, cy| {
        let (sx, sy) = (bbox.x + cx, bbox.y + cy);
        if mask.get(sx, sy) {
            *image.get_pixel(sx, sy)
        } else {
            Rgb([0, 0, 0])
        }
    })
}

/// Sort instances deterministically: highest score first, then top-to-bottom,
/// left-to-right scan order of the bounding box.
pub fn order_instances(instances: &mut [PlantInstance]) {
    instances.sort_by(|a, b| {
        let by_score = match (a.score, b.score) {
            (Some(sa), Some(sb)) => sb.partial_cmp(&sa).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_score
            .then(a.bounding_box.y.cmp(&b.bounding_box.y))
            .then(a.bounding_box.x.cmp(&b.bounding_box.x))
    });
}
