use marker_ranger_aruco::builtins::{DICT_4X4_100, DICT_4X4_50};
use marker_ranger_aruco::render::paint_marker_quad;
use marker_ranger_aruco::{
    detect_markers, DetectorParams, Dictionary, DictionaryError, DictionarySet, MarkerDetector,
    SearchStrategy,
};
use marker_ranger_core::GrayImage;
use nalgebra::Point2;

fn square(x: f64, y: f64, side: f64) -> [Point2<f64>; 4] {
    [
        Point2::new(x, y),
        Point2::new(x + side, y),
        Point2::new(x + side, y + side),
        Point2::new(x, y + side),
    ]
}

fn scene(markers: &[(Dictionary, u32, [Point2<f64>; 4])]) -> GrayImage {
    let mut img = GrayImage::filled(640, 480, 255);
    for (dict, id, corners) in markers {
        assert!(paint_marker_quad(&mut img, dict, *id, 1, corners));
    }
    img
}

fn assert_corners_close(got: &[Point2<f32>; 4], want: &[Point2<f64>; 4], tol: f64) {
    for (g, w) in got.iter().zip(want) {
        let d = ((g.x as f64 - w.x).powi(2) + (g.y as f64 - w.y).powi(2)).sqrt();
        assert!(d < tol, "corner {g:?} vs {w:?} ({d:.2}px)");
    }
}

#[test]
fn finds_two_markers_in_reading_order() {
    let a = square(79.5, 99.5, 120.0);
    let b = square(379.5, 199.5, 150.0);
    let img = scene(&[(DICT_4X4_50, 17, b), (DICT_4X4_50, 3, a)]);

    let set = DictionarySet::single(DICT_4X4_50);
    let found = detect_markers(&img.view(), &set, &DetectorParams::default(), SearchStrategy::FirstHit);

    let ids: Vec<u32> = found.iter().map(|d| d.marker.id).collect();
    assert_eq!(ids, vec![3, 17]);
    assert!(found.iter().all(|d| d.dictionary == "DICT_4X4_50"));
    assert_corners_close(&found[0].marker.corners, &a, 1.5);
    assert_corners_close(&found[1].marker.corners, &b, 1.5);
}

#[test]
fn first_corner_follows_marker_rotation() {
    // Marker top-left placed at the image bottom-left: a 90° turn.
    let s = square(199.5, 119.5, 180.0);
    let turned = [s[3], s[0], s[1], s[2]];
    let img = scene(&[(DICT_4X4_50, 9, turned)]);

    let det = MarkerDetector::new(&DictionarySet::single(DICT_4X4_50), DetectorParams::default());
    let found = det.detect(&img.view());
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].marker.id, 9);
    assert_corners_close(&found[0].marker.corners, &turned, 1.5);
}

#[test]
fn perspective_marker_is_decoded() {
    let quad = [
        Point2::new(210.0, 140.0),
        Point2::new(410.0, 160.0),
        Point2::new(430.0, 330.0),
        Point2::new(190.0, 350.0),
    ];
    let img = scene(&[(DICT_4X4_50, 42, quad)]);
    let set = DictionarySet::single(DICT_4X4_50);
    let found = detect_markers(&img.view(), &set, &DetectorParams::default(), SearchStrategy::FirstHit);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].marker.id, 42);
    assert_corners_close(&found[0].marker.corners, &quad, 2.5);
}

#[test]
fn empty_frame_yields_nothing() {
    let img = GrayImage::filled(640, 480, 128);
    let set = DictionarySet::from_names(&["DICT_4X4_50", "DICT_4X4_100"]).expect("known");
    assert!(detect_markers(&img.view(), &set, &DetectorParams::default(), SearchStrategy::Union).is_empty());

    let degenerate = GrayImage::filled(0, 0, 0);
    assert!(detect_markers(&degenerate.view(), &set, &DetectorParams::default(), SearchStrategy::Union).is_empty());
}

#[test]
fn first_hit_stops_at_first_productive_dictionary() {
    // id 5 exists in both dictionaries; id 70 only in the larger one.
    let img = scene(&[
        (DICT_4X4_50, 5, square(59.5, 99.5, 150.0)),
        (DICT_4X4_100, 70, square(359.5, 99.5, 150.0)),
    ]);
    let set = DictionarySet::new(vec![DICT_4X4_50, DICT_4X4_100]).expect("non-empty");
    let params = DetectorParams::default();

    let first = detect_markers(&img.view(), &set, &params, SearchStrategy::FirstHit);
    assert_eq!(first.len(), 1);
    assert_eq!((first[0].dictionary_index, first[0].marker.id), (0, 5));

    let union = detect_markers(&img.view(), &set, &params, SearchStrategy::Union);
    let tagged: Vec<(usize, u32)> = union
        .iter()
        .map(|d| (d.dictionary_index, d.marker.id))
        .collect();
    assert_eq!(tagged, vec![(0, 5), (1, 5), (1, 70)]);

    let deduped = MarkerDetector::new(&set, params)
        .with_strategy(SearchStrategy::Union)
        .with_dedup_by_id(true)
        .detect(&img.view());
    let tagged: Vec<(usize, u32)> = deduped
        .iter()
        .map(|d| (d.dictionary_index, d.marker.id))
        .collect();
    assert_eq!(tagged, vec![(0, 5), (1, 70)]);
}

#[test]
fn dedup_keeps_repeated_ids_within_one_dictionary() {
    // Two physical copies of id 5, seen by both dictionaries.
    let img = scene(&[
        (DICT_4X4_50, 5, square(59.5, 99.5, 150.0)),
        (DICT_4X4_50, 5, square(359.5, 99.5, 150.0)),
    ]);
    let set = DictionarySet::new(vec![DICT_4X4_50, DICT_4X4_100]).expect("non-empty");

    for strategy in [SearchStrategy::FirstHit, SearchStrategy::Union] {
        let found = MarkerDetector::new(&set, DetectorParams::default())
            .with_strategy(strategy)
            .with_dedup_by_id(true)
            .detect(&img.view());
        let tagged: Vec<(usize, u32)> = found
            .iter()
            .map(|d| (d.dictionary_index, d.marker.id))
            .collect();
        assert_eq!(tagged, vec![(0, 5), (0, 5)], "{strategy:?}");
    }
}

#[test]
fn first_hit_falls_through_empty_dictionaries() {
    let img = scene(&[(DICT_4X4_100, 88, square(199.5, 139.5, 160.0))]);
    let set = DictionarySet::new(vec![DICT_4X4_50, DICT_4X4_100]).expect("non-empty");
    let found = detect_markers(&img.view(), &set, &DetectorParams::default(), SearchStrategy::FirstHit);
    assert_eq!(found.len(), 1);
    assert_eq!((found[0].dictionary_index, found[0].marker.id), (1, 88));
    assert_eq!(found[0].dictionary, "DICT_4X4_100");
}

#[test]
fn inverted_markers_need_opt_in() {
    let mut img = scene(&[(DICT_4X4_50, 11, square(219.5, 139.5, 180.0))]);
    // Dark background, white border, inverted bits.
    for v in img.data.iter_mut() {
        *v = 255 - *v;
    }
    let set = DictionarySet::single(DICT_4X4_50);

    let plain = detect_markers(&img.view(), &set, &DetectorParams::default(), SearchStrategy::FirstHit);
    assert!(plain.is_empty());

    let params = DetectorParams {
        detect_inverted_marker: true,
        ..DetectorParams::default()
    };
    let found = detect_markers(&img.view(), &set, &params, SearchStrategy::FirstHit);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].marker.id, 11);
    assert!(found[0].marker.inverted);
}

#[test]
fn dictionary_names_are_validated() {
    assert_eq!(
        DictionarySet::from_names(&["DICT_4X4_50", "DICT_9X9_1"]),
        Err(DictionaryError::Unknown("DICT_9X9_1".to_string()))
    );
    let none: [&str; 0] = [];
    assert_eq!(DictionarySet::from_names(&none), Err(DictionaryError::Empty));
}
