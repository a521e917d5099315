//! Segmentation step: detections in, validated and ordered plant instances out.

use cropscan_core::error::AnalysisError;
use cropscan_core::mask::{order_instances, PlantInstance};
use cropscan_models::{retry_transient, RetryPolicy, Segmenter};
use image::RgbImage;

/// Segment `image` and materialise one [`PlantInstance`] per detection.
///
/// Upstream failures (after retry) come back as the matching
/// [`AnalysisError`] upstream variant. A detection whose mask or box does not
/// fit the image is an [`AnalysisError::Internal`].
///
/// The result is ordered by score, then top-to-bottom, left-to-right.
pub async fn segment_plants(
    segmenter: &dyn Segmenter,
    retry: &RetryPolicy,
    image: &RgbImage,
    frame_index: Option<u64>,
) -> Result<Vec<PlantInstance>, AnalysisError> {
    let detections = retry_transient(retry, || segmenter.segment(image)).await?;

    let mut instances = detections
        .into_iter()
        .map(|detection| PlantInstance::from_detection(image, frame_index, detection))
        .collect::<Result<Vec<_>, _>>()?;
    order_instances(&mut instances);

    tracing::debug!(
        frame_index,
        plants = instances.len(),
        segmenter = segmenter.name(),
        "Segmentation produced plant instances",
    );
    Ok(instances)
}
