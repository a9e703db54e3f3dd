use image::{DynamicImage, ImageFormat};
use marker_ranger::aruco::builtins::DICT_4X4_50;
use marker_ranger::aruco::render::paint_marker_quad;
use marker_ranger::core::GrayImage;
use marker_ranger::node::{DirectoryNode, NodeSummary};
use marker_ranger::{CalibrationPolicy, CameraInfo, RangerConfig};
use nalgebra::Point2;
use std::fs;
use std::path::Path;

fn write_marker_png(path: &Path, id: u32) {
    let mut gray = GrayImage::filled(640, 480, 255);
    let corners = [
        Point2::new(220.0, 140.0),
        Point2::new(420.0, 140.0),
        Point2::new(420.0, 340.0),
        Point2::new(220.0, 340.0),
    ];
    assert!(paint_marker_quad(&mut gray, &DICT_4X4_50, id, 1, &corners));
    let luma = image::GrayImage::from_raw(640, 480, gray.data).expect("buffer size");
    DynamicImage::ImageLuma8(luma)
        .save_with_format(path, ImageFormat::Png)
        .expect("write png");
}

fn write_camera_info(path: &Path, f: f64) {
    let info = CameraInfo {
        k: vec![f, 0.0, 320.0, 0.0, f, 240.0, 0.0, 0.0, 1.0],
        d: vec![0.0; 5],
        distortion_model: Some("plumb_bob".to_string()),
    };
    fs::write(path, serde_json::to_string(&info).expect("json")).expect("write camera info");
}

fn readings(node: &DirectoryNode) -> Vec<serde_json::Value> {
    fs::read_to_string(node.readings_path())
        .expect("readings file")
        .lines()
        .map(|l| serde_json::from_str(l).expect("json line"))
        .collect()
}

#[test]
fn frames_before_calibration_get_no_readings() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let node = DirectoryNode::new(dir.path(), RangerConfig::default());
    fs::create_dir_all(node.image_dir()).expect("mkdir images");
    fs::create_dir_all(node.camera_info_dir()).expect("mkdir camera_info");

    write_marker_png(&node.image_dir().join("0001.png"), 4);
    write_camera_info(&node.camera_info_dir().join("0002.json"), 400.0);
    write_marker_png(&node.image_dir().join("0003.png"), 4);

    let summary = node.run().expect("run");
    assert_eq!(
        summary,
        NodeSummary {
            frames_processed: 2,
            frames_dropped: 0,
            readings: 1,
            calibration_messages: 1,
        }
    );

    for name in ["0001.png", "0003.png"] {
        let out = fs::read(node.output_dir().join(name)).expect("annotated output");
        assert_eq!(&out[..2], &[0xFF, 0xD8], "{name} is not a JPEG");
    }

    let lines = readings(&node);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["frame"], "0003.png");
    assert_eq!(lines[0]["marker_id"], 4);
    let forward = lines[0]["forward"].as_f64().expect("forward");
    let expected = 400.0 * RangerConfig::default().marker_size_m / 200.0;
    assert!((forward - expected).abs() < 0.02 * expected, "{forward} vs {expected}");
}

#[test]
fn undecodable_frames_are_dropped_and_replay_continues() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let config = RangerConfig {
        calibration_policy: CalibrationPolicy::Continuous,
        ..RangerConfig::default()
    };
    let node = DirectoryNode::new(dir.path(), config);
    fs::create_dir_all(node.image_dir()).expect("mkdir images");
    fs::create_dir_all(node.camera_info_dir()).expect("mkdir camera_info");

    write_camera_info(&node.camera_info_dir().join("0000.json"), 400.0);
    fs::write(node.image_dir().join("0001.jpg"), b"not an image").expect("write");
    write_marker_png(&node.image_dir().join("0002.png"), 9);
    write_camera_info(&node.camera_info_dir().join("0003.json"), 800.0);
    write_marker_png(&node.image_dir().join("0004.png"), 9);

    let summary = node.run().expect("run");
    assert_eq!(summary.frames_dropped, 1);
    assert_eq!(summary.frames_processed, 2);
    assert_eq!(summary.calibration_messages, 2);
    assert!(!node.output_dir().join("0001.jpg").exists());

    let forwards: Vec<f64> = readings(&node)
        .iter()
        .map(|r| r["forward"].as_f64().expect("forward"))
        .collect();
    assert_eq!(forwards.len(), 2);
    // Second calibration doubles the focal length.
    assert!((forwards[1] / forwards[0] - 2.0).abs() < 0.05, "{forwards:?}");
}

#[test]
fn static_calibration_seeds_the_store() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let config = RangerConfig {
        static_calibration: Some(CameraInfo {
            k: vec![400.0, 0.0, 320.0, 0.0, 400.0, 240.0, 0.0, 0.0, 1.0],
            d: vec![0.0; 4],
            distortion_model: None,
        }),
        ..RangerConfig::default()
    };
    let node = DirectoryNode::new(dir.path(), config);
    fs::create_dir_all(node.image_dir()).expect("mkdir images");
    write_marker_png(&node.image_dir().join("0001.png"), 2);

    let summary = node.run().expect("run");
    assert_eq!(summary.readings, 1);
    assert_eq!(summary.calibration_messages, 0);
}
