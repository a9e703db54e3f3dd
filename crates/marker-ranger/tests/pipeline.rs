use approx::assert_abs_diff_eq;
use image::{DynamicImage, ImageFormat, RgbImage};
use marker_ranger::aruco::builtins::DICT_4X4_50;
use marker_ranger::aruco::render::paint_marker_quad;
use marker_ranger::core::GrayImage;
use marker_ranger::{
    CalibrationPolicy, CalibrationStore, OfferOutcome, PipelineController, PipelineState,
    RangerConfig,
};
use nalgebra::Point2;
use std::io::Cursor;
use std::sync::Arc;

const K_400: [f64; 9] = [400.0, 0.0, 320.0, 0.0, 400.0, 240.0, 0.0, 0.0, 1.0];
const K_800: [f64; 9] = [800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0, 1.0];

/// Quarter-frame marker side in pixels for a 640×480 frame.
fn quarter_side() -> f64 {
    (640.0f64 * 480.0 / 4.0).sqrt().round()
}

/// 640×480 frame with one marker of `side` px centred on the principal point.
fn centred_marker_frame(id: u32, side: f64) -> RgbImage {
    let mut gray = GrayImage::filled(640, 480, 255);
    let (x0, y0) = (320.0 - side / 2.0, 240.0 - side / 2.0);
    let corners = [
        Point2::new(x0, y0),
        Point2::new(x0 + side, y0),
        Point2::new(x0 + side, y0 + side),
        Point2::new(x0, y0 + side),
    ];
    assert!(paint_marker_quad(&mut gray, &DICT_4X4_50, id, 1, &corners));
    let luma = image::GrayImage::from_raw(640, 480, gray.data).expect("buffer size");
    DynamicImage::ImageLuma8(luma).to_rgb8()
}

fn png_bytes(frame: &RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(frame.clone())
        .write_to(&mut out, ImageFormat::Png)
        .expect("png encode");
    out.into_inner()
}

fn config(marker_size_m: f64, policy: CalibrationPolicy) -> RangerConfig {
    RangerConfig {
        marker_size_m,
        calibration_policy: policy,
        waiting_notice_every: 3,
        ..RangerConfig::default()
    }
}

#[test]
fn quarter_frame_marker_distance_matches_pinhole_model() {
    let cfg = config(0.05, CalibrationPolicy::Latch);
    let store = Arc::new(CalibrationStore::new(cfg.calibration_policy));
    store.offer(&K_400, &[0.0; 5]).expect("valid calibration");
    let mut pipeline = PipelineController::new(&cfg, Arc::clone(&store)).expect("valid config");

    let side = quarter_side();
    let processed = pipeline
        .process_frame(&png_bytes(&centred_marker_frame(7, side)))
        .expect("decodable frame");

    assert_eq!(&processed.jpeg[..2], &[0xFF, 0xD8]);
    let report = processed.report;
    assert_eq!(report.state, PipelineState::Ready);
    assert_eq!(report.detections.len(), 1);
    assert_eq!(report.readings.len(), 1);

    let reading = &report.readings[0];
    assert_eq!(reading.marker_id, 7);
    let expected = 400.0 * 0.05 / side;
    assert_abs_diff_eq!(reading.forward, expected, epsilon = 0.02 * expected);
    assert_abs_diff_eq!(reading.lateral, 0.0, epsilon = 1e-3);
    assert_abs_diff_eq!(reading.vertical, 0.0, epsilon = 1e-3);
}

#[test]
fn awaiting_calibration_skips_pose_and_rate_limits_notice() {
    let cfg = config(0.05, CalibrationPolicy::Latch);
    let store = Arc::new(CalibrationStore::new(cfg.calibration_policy));
    let mut pipeline = PipelineController::new(&cfg, Arc::clone(&store)).expect("valid config");
    let frame = centred_marker_frame(3, 200.0);

    let mut notices = Vec::new();
    for _ in 0..7 {
        let mut working = frame.clone();
        let report = pipeline.process_image(&mut working);
        assert_eq!(report.state, PipelineState::AwaitingCalibration);
        assert_eq!(report.detections.len(), 1);
        assert!(report.poses.is_empty());
        assert!(report.readings.is_empty());
        // Outline is still drawn.
        assert_ne!(working, frame);
        notices.push(report.waiting_notice);
    }
    assert_eq!(notices, vec![true, false, false, true, false, false, true]);

    // Offered before the next frame: that frame is processed as ready.
    store.offer(&K_400, &[0.0; 5]).expect("valid calibration");
    let mut working = frame.clone();
    let report = pipeline.process_image(&mut working);
    assert_eq!(report.state, PipelineState::Ready);
    assert_eq!(report.readings.len(), 1);
    assert!(!report.waiting_notice);
}

#[test]
fn frames_without_markers_are_left_untouched() {
    let cfg = config(0.05, CalibrationPolicy::Latch);
    let store = Arc::new(CalibrationStore::new(cfg.calibration_policy));
    store.offer(&K_400, &[0.0; 5]).expect("valid calibration");
    let mut pipeline = PipelineController::new(&cfg, store).expect("valid config");

    let frame = RgbImage::from_pixel(640, 480, image::Rgb([180, 180, 180]));
    let mut working = frame.clone();
    let report = pipeline.process_image(&mut working);
    assert!(report.detections.is_empty());
    assert!(report.poses.is_empty());
    assert!(!report.waiting_notice);
    assert_eq!(working, frame);
}

#[test]
fn zero_matrix_offer_keeps_pipeline_waiting() {
    let cfg = config(0.05, CalibrationPolicy::Continuous);
    let store = Arc::new(CalibrationStore::new(cfg.calibration_policy));
    assert_eq!(store.offer(&[0.0; 9], &[0.0; 4]), Ok(OfferOutcome::Sentinel));
    let mut pipeline = PipelineController::new(&cfg, Arc::clone(&store)).expect("valid config");

    let mut frame = centred_marker_frame(1, 200.0);
    let report = pipeline.process_image(&mut frame);
    assert_eq!(report.state, PipelineState::AwaitingCalibration);
    assert!(report.poses.is_empty());
}

fn forward_after_offers(policy: CalibrationPolicy) -> f64 {
    let cfg = config(0.05, policy);
    let store = Arc::new(CalibrationStore::new(policy));
    let mut pipeline = PipelineController::new(&cfg, Arc::clone(&store)).expect("valid config");
    let frame = centred_marker_frame(5, 240.0);

    store.offer(&K_400, &[0.0; 5]).expect("valid calibration");
    let first = pipeline.process_image(&mut frame.clone()).readings[0].forward;
    assert_abs_diff_eq!(first, 400.0 * 0.05 / 240.0, epsilon = 2e-3);

    store.offer(&K_800, &[0.0; 5]).expect("valid calibration");
    pipeline.process_image(&mut frame.clone()).readings[0].forward
}

#[test]
fn latch_ignores_second_calibration() {
    let forward = forward_after_offers(CalibrationPolicy::Latch);
    assert_abs_diff_eq!(forward, 400.0 * 0.05 / 240.0, epsilon = 2e-3);
}

#[test]
fn continuous_applies_second_calibration() {
    let forward = forward_after_offers(CalibrationPolicy::Continuous);
    assert_abs_diff_eq!(forward, 800.0 * 0.05 / 240.0, epsilon = 4e-3);
}

#[test]
fn forward_decreases_as_marker_grows() {
    let cfg = config(0.05, CalibrationPolicy::Latch);
    let store = Arc::new(CalibrationStore::new(cfg.calibration_policy));
    store.offer(&K_400, &[0.0; 5]).expect("valid calibration");
    let mut pipeline = PipelineController::new(&cfg, store).expect("valid config");

    let forwards: Vec<f64> = [120.0, 180.0, 260.0, 340.0]
        .iter()
        .map(|&side| {
            let report = pipeline.process_image(&mut centred_marker_frame(9, side));
            assert_eq!(report.readings.len(), 1, "side {side}");
            report.readings[0].forward
        })
        .collect();
    for w in forwards.windows(2) {
        assert!(w[1] < w[0], "{forwards:?}");
    }
}
