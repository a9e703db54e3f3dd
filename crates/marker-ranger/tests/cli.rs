#![cfg(feature = "cli")]

use assert_cmd::Command;
use image::{DynamicImage, ImageFormat};
use marker_ranger::aruco::builtins::DICT_4X4_50;
use marker_ranger::aruco::render::paint_marker_quad;
use marker_ranger::core::GrayImage;
use nalgebra::Point2;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn bin() -> Command {
    Command::cargo_bin("marker-ranger").expect("binary built")
}

fn write_scene(path: &Path) {
    let mut gray = GrayImage::filled(320, 240, 255);
    let corners = [
        Point2::new(100.0, 60.0),
        Point2::new(220.0, 60.0),
        Point2::new(220.0, 180.0),
        Point2::new(100.0, 180.0),
    ];
    assert!(paint_marker_quad(&mut gray, &DICT_4X4_50, 11, 1, &corners));
    let luma = image::GrayImage::from_raw(320, 240, gray.data).expect("buffer size");
    DynamicImage::ImageLuma8(luma)
        .save_with_format(path, ImageFormat::Png)
        .expect("write png");
}

#[test]
fn dictionaries_lists_builtins() {
    bin()
        .arg("dictionaries")
        .assert()
        .success()
        .stdout(predicate::str::contains("DICT_4X4_50"))
        .stdout(predicate::str::contains("DICT_4X4_100"));
}

#[test]
fn detect_without_calibration_reports_awaiting() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let image = dir.path().join("scene.png");
    let out = dir.path().join("annotated.jpg");
    write_scene(&image);

    bin()
        .args(["--log-level", "off", "detect", "--image"])
        .arg(&image)
        .arg("--out")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"awaiting_calibration\""))
        .stdout(predicate::str::contains("\"id\": 11"));

    let jpeg = fs::read(&out).expect("annotated output");
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
}

#[test]
fn detect_with_camera_info_reports_distance() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let image = dir.path().join("scene.png");
    let info = dir.path().join("camera_info.json");
    write_scene(&image);
    fs::write(
        &info,
        r#"{"K": [300, 0, 160, 0, 300, 120, 0, 0, 1], "D": [0, 0, 0, 0, 0]}"#,
    )
    .expect("write camera info");

    let output = bin()
        .args(["--log-level", "off", "detect", "--image"])
        .arg(&image)
        .arg("--camera-info")
        .arg(&info)
        .output()
        .expect("run");
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["state"], "ready");
    let forward = report["readings"][0]["forward"].as_f64().expect("forward");
    let expected = 300.0 * 0.038 / 120.0;
    assert!((forward - expected).abs() < 0.03 * expected, "{forward} vs {expected}");
}

#[test]
fn run_replays_an_empty_root() {
    let dir = tempfile::tempdir().expect("tmp dir");
    bin()
        .args(["--log-level", "off", "run", "--root"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"frames_processed\": 0"));
}

#[test]
fn invalid_config_fails() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let config = dir.path().join("config.json");
    fs::write(&config, r#"{"marker_size_m": -1.0}"#).expect("write config");
    bin()
        .args(["--log-level", "off", "run", "--root"])
        .arg(dir.path())
        .arg("--config")
        .arg(&config)
        .assert()
        .failure();
}
