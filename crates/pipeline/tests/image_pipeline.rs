mod common;

use std::io::Cursor;
use std::sync::Arc;

use assert_matches::assert_matches;
use common::*;
use cropscan_core::error::{AnalysisError, Service};
use cropscan_core::mask::{BinaryMask, Detection};
use cropscan_core::types::{AnalysisStatus, AnalysisType, ReportStatus};
use cropscan_models::{StubCaptioner, StubReasoner, StubSegmenter};
use cropscan_pipeline::ImageAnalyzer;
use image::{ImageFormat, Rgb, RgbImage};

fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

#[tokio::test]
async fn reports_follow_instance_order_with_measured_area() {
    let clients = Clients::healthy();
    let reports = clients
        .analyzer()
        .analyze_image(&tagged_image(0), AnalysisType::Nutrient)
        .await
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].plant_index, 0);
    assert_eq!(reports[0].bounding_box.x, 0);
    assert_eq!(reports[0].affected_percentage, 25.0);
    assert_eq!(reports[1].plant_index, 1);
    assert_eq!(reports[1].bounding_box.x, 4);
    assert_eq!(reports[1].affected_percentage, 0.0);
    assert_eq!(reports[0].score, Some(0.9));
    assert_eq!(reports[0].has_disease, Some(true));
    assert_eq!(reports[1].score, Some(0.8));
    assert_eq!(reports[1].has_disease, None);

    for report in &reports {
        assert_eq!(report.status, ReportStatus::Success);
        assert!(report.is_consistent());
        assert_eq!(report.frame_index, None);
        assert_eq!(
            report.structured_diagnosis.as_ref().unwrap().general_diagnosis,
            "Early nitrogen deficiency"
        );
    }

    let mut seen = clients.reasoner.seen();
    seen.sort_by(|a, b| a.1.cmp(&b.1));
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].1, "0.0");
    assert_eq!(seen[1].1, "25.0");
    assert!(seen.iter().all(|(caption, _, kind)| {
        caption == "a maize leaf with yellow streaks" && *kind == AnalysisType::Nutrient
    }));
}

#[tokio::test]
async fn repeated_analysis_is_identical_apart_from_ids() {
    let clients = Clients::healthy();
    let analyzer = clients.analyzer();
    let image = tagged_image(7);

    let mut first = analyzer.analyze_image(&image, AnalysisType::Both).await.unwrap();
    let mut second = analyzer.analyze_image(&image, AnalysisType::Both).await.unwrap();
    assert_ne!(first[0].plant_image_id, second[0].plant_image_id);

    for report in first.iter_mut().chain(second.iter_mut()) {
        report.plant_image_id.clear();
    }
    assert_eq!(first, second);
}

#[tokio::test]
async fn unstructured_reasoning_output_still_succeeds() {
    let clients = Clients::new(
        ScriptedSegmenter::new(two_plants()),
        ScriptedCaptioner::new("a leaf"),
        ScriptedReasoner::new("Looks like mild rust. Monitor weekly."),
    );
    let reports = clients
        .analyzer()
        .analyze_image(&tagged_image(0), AnalysisType::Both)
        .await
        .unwrap();

    assert!(reports.iter().all(|r| r.is_success()));
    assert!(reports.iter().all(|r| r.structured_diagnosis.is_none()));
    assert_eq!(
        reports[0].diagnosis.as_deref(),
        Some("Looks like mild rust. Monitor weekly.")
    );
}

#[tokio::test]
async fn caption_rejection_fails_only_that_plant() {
    let clients = Clients::new(
        ScriptedSegmenter::new(two_plants()),
        ScriptedCaptioner::new("a leaf").failing_first(vec![rejected(Service::Captioning)]),
        ScriptedReasoner::new(DIAGNOSIS_JSON),
    );
    let analyzer = clients.analyzer().with_plant_concurrency(1);
    let result = analyzer
        .analyze_image_bytes(
            &png_bytes(&tagged_image(0)),
            Some("field.png".into()),
            AnalysisType::Both,
        )
        .await
        .unwrap();

    assert_eq!(result.status, AnalysisStatus::Partial);
    assert_eq!(result.plants_detected, 2);
    assert_eq!(result.image_filename.as_deref(), Some("field.png"));

    let failed = &result.analysis_results[0];
    assert_eq!(failed.status, ReportStatus::Error);
    assert!(failed.caption.is_none());
    assert!(failed.error_message.as_deref().unwrap().contains("captioning"));
    assert_eq!(failed.affected_percentage, 25.0);
    assert_eq!(failed.has_disease, Some(true));
    assert!(failed.is_consistent());

    assert!(result.analysis_results[1].is_success());
    // Rejections are not retried.
    assert_eq!(clients.captioner.calls(), 2);
}

#[tokio::test]
async fn transient_caption_failure_is_retried() {
    let clients = Clients::new(
        ScriptedSegmenter::new(two_plants()),
        ScriptedCaptioner::new("a leaf").failing_first(vec![unavailable(Service::Captioning)]),
        ScriptedReasoner::new(DIAGNOSIS_JSON),
    );
    let reports = clients
        .analyzer()
        .with_plant_concurrency(1)
        .analyze_image(&tagged_image(0), AnalysisType::Both)
        .await
        .unwrap();

    assert!(reports.iter().all(|r| r.is_success()));
    assert_eq!(clients.captioner.calls(), 3);
}

#[tokio::test]
async fn retry_budget_is_bounded() {
    let clients = Clients::new(
        ScriptedSegmenter::new(two_plants()),
        ScriptedCaptioner::new("a leaf").failing_first(vec![
            unavailable(Service::Captioning),
            unavailable(Service::Captioning),
        ]),
        ScriptedReasoner::new(DIAGNOSIS_JSON),
    );
    let reports = clients
        .analyzer()
        .with_plant_concurrency(1)
        .analyze_image(&tagged_image(0), AnalysisType::Both)
        .await
        .unwrap();

    assert_eq!(reports[0].status, ReportStatus::Error);
    assert!(reports[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("unavailable"));
    assert!(reports[1].is_success());
    assert_eq!(clients.captioner.calls(), 3);
}

#[tokio::test]
async fn every_plant_failing_is_an_error() {
    let clients = Clients::new(
        ScriptedSegmenter::new(two_plants()),
        ScriptedCaptioner::new("a leaf"),
        ScriptedReasoner::new(DIAGNOSIS_JSON).failing_first(vec![
            rejected(Service::Reasoning),
            rejected(Service::Reasoning),
        ]),
    );
    let result = clients
        .analyzer()
        .analyze_image_bytes(&png_bytes(&tagged_image(0)), None, AnalysisType::Disease)
        .await
        .unwrap();

    assert_eq!(result.status, AnalysisStatus::Error);
    assert_eq!(result.plants_detected, 2);
    for report in &result.analysis_results {
        assert!(report.caption.is_none());
        assert!(report.error_message.as_deref().unwrap().contains("reasoning"));
    }
}

#[tokio::test]
async fn no_plants_is_a_success() {
    let clients = Clients::new(
        ScriptedSegmenter::new(Vec::new()),
        ScriptedCaptioner::new("a leaf"),
        ScriptedReasoner::new(DIAGNOSIS_JSON),
    );
    let result = clients
        .analyzer()
        .analyze_image_bytes(&png_bytes(&tagged_image(0)), None, AnalysisType::Both)
        .await
        .unwrap();

    assert_eq!(result.status, AnalysisStatus::Success);
    assert_eq!(result.plants_detected, 0);
    assert!(result.analysis_results.is_empty());
    assert_eq!(clients.captioner.calls(), 0);
}

#[tokio::test]
async fn segmentation_failure_fails_the_call() {
    let clients = Clients::new(
        ScriptedSegmenter::new(two_plants()).failing_first(vec![rejected(Service::Segmentation)]),
        ScriptedCaptioner::new("a leaf"),
        ScriptedReasoner::new(DIAGNOSIS_JSON),
    );
    let err = clients
        .analyzer()
        .analyze_image(&tagged_image(0), AnalysisType::Both)
        .await
        .unwrap_err();

    assert_matches!(
        err,
        AnalysisError::Upstream {
            service: Service::Segmentation,
            ..
        }
    );
    assert_eq!(clients.segmenter.calls(), 1);
    assert_eq!(clients.captioner.calls(), 0);
}

#[tokio::test]
async fn transient_segmentation_failure_is_retried() {
    let clients = Clients::new(
        ScriptedSegmenter::new(two_plants())
            .failing_first(vec![unavailable(Service::Segmentation)]),
        ScriptedCaptioner::new("a leaf"),
        ScriptedReasoner::new(DIAGNOSIS_JSON),
    );
    let reports = clients
        .analyzer()
        .analyze_image(&tagged_image(0), AnalysisType::Both)
        .await
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(clients.segmenter.calls(), 2);
}

#[tokio::test]
async fn mismatched_mask_is_internal() {
    let detection = Detection::new(BinaryMask::from_fn(4, 4, |_, _| true));
    let clients = Clients::new(
        ScriptedSegmenter::new(vec![detection]),
        ScriptedCaptioner::new("a leaf"),
        ScriptedReasoner::new(DIAGNOSIS_JSON),
    );
    let err = clients
        .analyzer()
        .analyze_image(&tagged_image(0), AnalysisType::Both)
        .await
        .unwrap_err();

    assert_matches!(err, AnalysisError::Internal(_));
}

#[tokio::test]
async fn undecodable_bytes_are_rejected_before_segmentation() {
    let clients = Clients::healthy();
    let err = clients
        .analyzer()
        .analyze_image_bytes(b"definitely not a png", None, AnalysisType::Both)
        .await
        .unwrap_err();

    assert_matches!(err, AnalysisError::InvalidParameter(_));
    assert_eq!(clients.segmenter.calls(), 0);
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let clients = Clients::healthy();
    let bytes = png_bytes(&tagged_image(0));
    let err = clients
        .analyzer()
        .with_max_image_bytes(bytes.len() - 1)
        .analyze_image_bytes(&bytes, None, AnalysisType::Both)
        .await
        .unwrap_err();

    assert_matches!(err, AnalysisError::InvalidParameter(_));
}

#[tokio::test]
async fn stub_clients_produce_structured_diagnosis() {
    let image = RgbImage::from_fn(32, 32, |x, _| {
        if x < 8 {
            Rgb([180, 120, 40])
        } else {
            Rgb([30, 160, 30])
        }
    });
    let analyzer = ImageAnalyzer::new(
        Arc::new(StubSegmenter),
        Arc::new(StubCaptioner),
        Arc::new(StubReasoner),
    );
    let result = analyzer
        .analyze_image_bytes(&png_bytes(&image), Some("stub.png".into()), AnalysisType::Both)
        .await
        .unwrap();

    assert_eq!(result.status, AnalysisStatus::Success);
    assert_eq!(result.plants_detected, 1);
    let report = &result.analysis_results[0];
    assert_eq!(report.affected_percentage, 25.0);
    assert!(report.structured_diagnosis.is_some());
}
