//! COCO instances indexing.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::data::dataset::{Annotation, BoxLabel, DetectionDataset};
use crate::error::{Result, SsdError};

#[derive(Debug, Deserialize)]
struct CocoInstances {
    images: Vec<CocoImage>,
    annotations: Vec<CocoAnnotation>,
    categories: Vec<CocoCategory>,
}

#[derive(Debug, Deserialize)]
struct CocoImage {
    id: u64,
    file_name: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct CocoAnnotation {
    image_id: u64,
    category_id: u64,
    #[serde(default)]
    bbox: Option<[f32; 4]>,
}

#[derive(Debug, Deserialize)]
struct CocoCategory {
    id: u64,
    name: String,
}

pub fn load(root: &Path, image_set: &str) -> Result<DetectionDataset> {
    let json_path = root
        .join("annotations")
        .join(format!("instances_{image_set}.json"));
    let raw = fs::read_to_string(&json_path).map_err(|e| SsdError::io(&json_path, e))?;
    let instances: CocoInstances =
        serde_json::from_str(&raw).map_err(|source| SsdError::Json {
            path: json_path.clone(),
            source,
        })?;
    let image_dir = root.join("images").join(image_set);
    let (class_names, samples) = index_instances(instances, &image_dir);
    log::info!(
        "indexed {} samples from COCO {} ({} categories)",
        samples.len(),
        image_set,
        class_names.len()
    );
    Ok(DetectionDataset::new(
        format!("COCO_{image_set}"),
        class_names,
        samples,
    ))
}

fn index_instances(instances: CocoInstances, image_dir: &Path) -> (Vec<String>, Vec<Annotation>) {
    let mut categories = instances.categories;
    categories.sort_by_key(|c| c.id);
    let label_map: HashMap<u64, usize> = categories
        .iter()
        .enumerate()
        .map(|(idx, c)| (c.id, idx))
        .collect();
    let class_names = categories.into_iter().map(|c| c.name).collect();

    let images: HashMap<u64, CocoImage> =
        instances.images.into_iter().map(|img| (img.id, img)).collect();

    // BTreeMap keeps sample order stable across runs.
    let mut per_image: BTreeMap<u64, Vec<BoxLabel>> = BTreeMap::new();
    let mut dropped = 0usize;
    for ann in instances.annotations {
        let (Some(image), Some(&label), Some([x, y, w, h])) = (
            images.get(&ann.image_id),
            label_map.get(&ann.category_id),
            ann.bbox,
        ) else {
            dropped += 1;
            continue;
        };
        if w <= 0.0 || h <= 0.0 || image.width == 0 || image.height == 0 {
            dropped += 1;
            continue;
        }
        let (iw, ih) = (image.width as f32, image.height as f32);
        per_image.entry(ann.image_id).or_default().push(BoxLabel {
            xmin: x / iw,
            ymin: y / ih,
            xmax: (x + w) / iw,
            ymax: (y + h) / ih,
            label,
        });
    }
    if dropped > 0 {
        log::warn!("dropped {dropped} COCO annotations (unknown image/category or empty box)");
    }

    let samples = per_image
        .into_iter()
        .filter_map(|(id, boxes)| {
            images.get(&id).map(|img| Annotation {
                image_path: image_dir.join(&img.file_name),
                boxes,
            })
        })
        .collect();
    (class_names, samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instances() -> CocoInstances {
        serde_json::from_str(
            r#"{
                "images": [
                    {"id": 7, "file_name": "a.jpg", "width": 200, "height": 100},
                    {"id": 9, "file_name": "b.jpg", "width": 50, "height": 50},
                    {"id": 11, "file_name": "unlabeled.jpg", "width": 50, "height": 50}
                ],
                "annotations": [
                    {"image_id": 7, "category_id": 18, "bbox": [20, 10, 100, 50]},
                    {"image_id": 7, "category_id": 1, "bbox": [0, 0, 0, 10]},
                    {"image_id": 9, "category_id": 1, "bbox": [0, 0, 25, 25]},
                    {"image_id": 9, "category_id": 99, "bbox": [0, 0, 25, 25]}
                ],
                "categories": [
                    {"id": 18, "name": "dog"},
                    {"id": 1, "name": "person"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn categories_sorted_by_id() {
        let (names, _) = index_instances(instances(), Path::new("imgs"));
        assert_eq!(names, vec!["person".to_string(), "dog".to_string()]);
    }

    #[test]
    fn only_annotated_images_with_valid_boxes() {
        let (_, samples) = index_instances(instances(), Path::new("imgs"));
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].image_path, Path::new("imgs").join("a.jpg"));
        assert_eq!(samples[0].boxes.len(), 1);
        let b = samples[0].boxes[0];
        assert_eq!(b.label, 1);
        assert!((b.xmin - 0.1).abs() < 1e-6);
        assert!((b.ymax - 0.6).abs() < 1e-6);
        assert_eq!(samples[1].boxes.len(), 1);
        assert_eq!(samples[1].boxes[0].label, 0);
    }
}
