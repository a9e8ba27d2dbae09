mod common;

use image::RgbImage;
use std::fs;

use ssd_detection::cli::open_dataset;
use ssd_detection::data::VocImageSet;
use ssd_detection::{DatasetKind, DetectionDataset, SsdError, TrainingConfig};

fn trainval() -> Vec<VocImageSet> {
    vec!["2007:trainval".parse().unwrap()]
}

#[test]
fn voc_tree_is_indexed_and_decoded() {
    let dir = tempfile::tempdir().unwrap();
    common::write_voc(
        dir.path(),
        "trainval",
        &[
            ("000001", &[("dog", 0, [9, 9, 41, 33]), ("person", 1, [1, 1, 10, 10])]),
            ("000002", &[("boat", 1, [1, 1, 10, 10])]),
            ("000003", &[("cat", 0, [1, 1, 64, 48])]),
        ],
    );

    let dataset =
        DetectionDataset::open(DatasetKind::Voc, dir.path(), &trainval(), "unused").unwrap();
    // 000002 only has a difficult object.
    assert_eq!(dataset.len(), 2);
    assert_eq!(dataset.name(), "VOC2007_trainval");
    assert_eq!(dataset.class_names().len(), 20);

    let (img, boxes) = dataset.get(0).unwrap();
    assert_eq!(img.dimensions(), (64, 48));
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].label, 11);
    assert!((boxes[0].xmin - 8.0 / 64.0).abs() < 1e-6);
    assert!((boxes[0].ymax - 32.0 / 48.0).abs() < 1e-6);

    let (_, boxes) = dataset.get(1).unwrap();
    assert_eq!(boxes[0].label, 7);
    assert!(dataset.get(2).is_err());
}

#[test]
fn voc_without_usable_images_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    common::write_voc(dir.path(), "trainval", &[("000001", &[("dog", 1, [1, 1, 5, 5])])]);
    let err = DetectionDataset::open(DatasetKind::Voc, dir.path(), &trainval(), "unused");
    assert!(matches!(err, Err(SsdError::EmptyDataset { .. })));
}

#[test]
fn missing_image_set_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let sets = vec!["2012:trainval".parse().unwrap()];
    match DetectionDataset::open(DatasetKind::Voc, dir.path(), &sets, "unused") {
        Err(SsdError::Io { path, .. }) => assert!(path.ends_with("trainval.txt")),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn coco_tree_is_indexed_and_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let images = dir.path().join("images").join("mini");
    fs::create_dir_all(&images).unwrap();
    fs::create_dir_all(dir.path().join("annotations")).unwrap();
    RgbImage::new(40, 20).save(images.join("a.jpg")).unwrap();

    let json = serde_json::json!({
        "images": [{"id": 1, "file_name": "a.jpg", "width": 40, "height": 20}],
        "annotations": [
            {"image_id": 1, "category_id": 3, "bbox": [4.0, 2.0, 20.0, 10.0]},
            {"image_id": 1, "category_id": 1, "bbox": [0.0, 0.0, 40.0, 20.0]}
        ],
        "categories": [{"id": 1, "name": "person"}, {"id": 3, "name": "car"}]
    });
    fs::write(
        dir.path().join("annotations").join("instances_mini.json"),
        json.to_string(),
    )
    .unwrap();

    let mut config = TrainingConfig {
        dataset: DatasetKind::Coco,
        dataset_root: Some(dir.path().to_path_buf()),
        coco_set: "mini".to_string(),
        ..Default::default()
    };
    let dataset = open_dataset(&mut config).unwrap();
    assert_eq!(dataset.len(), 1);
    assert_eq!(dataset.class_names(), ["person".to_string(), "car".to_string()]);

    let (img, boxes) = dataset.get(0).unwrap();
    assert_eq!(img.dimensions(), (40, 20));
    assert_eq!(boxes.len(), 2);
    assert_eq!(boxes[0].label, 1);
    assert!((boxes[0].xmax - 0.6).abs() < 1e-6);
    assert_eq!(boxes[1].label, 0);
    assert_eq!(config.dataset_root.as_deref(), Some(dir.path()));
}
