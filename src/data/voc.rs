//! Pascal VOC indexing: image-set lists plus per-image XML annotations.

use std::fs;
use std::path::Path;

use crate::data::config::{VocImageSet, VOC_CLASSES};
use crate::data::dataset::{Annotation, BoxLabel, DetectionDataset};
use crate::error::{Result, SsdError};

pub fn load(root: &Path, image_sets: &[VocImageSet]) -> Result<DetectionDataset> {
    let mut samples = Vec::new();
    let mut skipped = 0usize;

    for image_set in image_sets {
        let year_dir = root.join(format!("VOC{}", image_set.year));
        let list_path = year_dir
            .join("ImageSets")
            .join("Main")
            .join(format!("{}.txt", image_set.set));
        let list = fs::read_to_string(&list_path).map_err(|e| SsdError::io(&list_path, e))?;

        for id in list.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let xml_path = year_dir.join("Annotations").join(format!("{id}.xml"));
            let image_path = year_dir.join("JPEGImages").join(format!("{id}.jpg"));
            let xml = fs::read_to_string(&xml_path).map_err(|e| SsdError::io(&xml_path, e))?;
            let boxes = parse_annotation(&xml, &xml_path, &image_path)?;
            if boxes.is_empty() {
                skipped += 1;
                continue;
            }
            samples.push(Annotation { image_path, boxes });
        }
    }

    if skipped > 0 {
        log::warn!("skipped {skipped} VOC images without non-difficult objects");
    }
    let name = image_sets
        .iter()
        .map(|s| format!("VOC{}_{}", s.year, s.set))
        .collect::<Vec<_>>()
        .join("+");
    log::info!("indexed {} samples from {}", samples.len(), name);

    Ok(DetectionDataset::new(
        name,
        VOC_CLASSES.iter().map(|c| c.to_string()).collect(),
        samples,
    ))
}

/// Parses one VOC annotation, dropping objects flagged `difficult`.
/// Coordinates are 1-based pixels in the file.
pub fn parse_annotation(xml: &str, xml_path: &Path, image_path: &Path) -> Result<Vec<BoxLabel>> {
    let doc = roxmltree::Document::parse(xml).map_err(|source| SsdError::Xml {
        path: xml_path.to_path_buf(),
        source,
    })?;
    let root = doc.root_element();

    let (width, height) = match image_size(&root) {
        Some(size) => size,
        None => image::image_dimensions(image_path)
            .map(|(w, h)| (w as f32, h as f32))
            .map_err(|source| SsdError::Image {
                path: image_path.to_path_buf(),
                source,
            })?,
    };

    let malformed = |reason: String| SsdError::Annotation {
        path: xml_path.to_path_buf(),
        reason,
    };

    let mut boxes = Vec::new();
    for object in root.children().filter(|n| n.has_tag_name("object")) {
        let difficult = child_text(&object, "difficult")
            .and_then(|t| t.parse::<i32>().ok())
            .unwrap_or(0);
        if difficult == 1 {
            continue;
        }

        let name = child_text(&object, "name")
            .map(|n| n.to_lowercase())
            .ok_or_else(|| malformed("object without <name>".into()))?;
        let label = VOC_CLASSES
            .iter()
            .position(|c| *c == name)
            .ok_or_else(|| SsdError::UnknownClass {
                path: xml_path.to_path_buf(),
                name: name.clone(),
            })?;

        let bndbox = object
            .children()
            .find(|n| n.has_tag_name("bndbox"))
            .ok_or_else(|| malformed(format!("object '{name}' without <bndbox>")))?;
        let mut coords = [0.0f32; 4];
        for (slot, tag) in coords.iter_mut().zip(["xmin", "ymin", "xmax", "ymax"]) {
            let value = child_text(&bndbox, tag)
                .and_then(|t| t.parse::<f32>().ok())
                .ok_or_else(|| malformed(format!("missing or invalid <{tag}>")))?;
            *slot = value - 1.0;
        }

        boxes.push(BoxLabel {
            xmin: coords[0] / width,
            ymin: coords[1] / height,
            xmax: coords[2] / width,
            ymax: coords[3] / height,
            label,
        });
    }
    Ok(boxes)
}

fn image_size(root: &roxmltree::Node) -> Option<(f32, f32)> {
    let size = root.children().find(|n| n.has_tag_name("size"))?;
    let width = child_text(&size, "width")?.parse::<f32>().ok()?;
    let height = child_text(&size, "height")?.parse::<f32>().ok()?;
    (width > 0.0 && height > 0.0).then_some((width, height))
}

fn child_text<'a, 'input>(node: &roxmltree::Node<'a, 'input>, tag: &str) -> Option<&'a str> {
    node.children()
        .find(|n| n.has_tag_name(tag))
        .and_then(|n| n.text())
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<annotation>
        <filename>000005.jpg</filename>
        <size><width>500</width><height>375</height><depth>3</depth></size>
        <object>
            <name>chair</name>
            <difficult>0</difficult>
            <bndbox><xmin>263</xmin><ymin>211</ymin><xmax>324</xmax><ymax>339</ymax></bndbox>
        </object>
        <object>
            <name>Chair</name>
            <difficult>1</difficult>
            <bndbox><xmin>5</xmin><ymin>244</ymin><xmax>67</xmax><ymax>374</ymax></bndbox>
        </object>
        <object>
            <name> person </name>
            <bndbox><xmin>1</xmin><ymin>1</ymin><xmax>501</xmax><ymax>376</ymax></bndbox>
        </object>
    </annotation>"#;

    #[test]
    fn parses_and_drops_difficult() {
        let boxes =
            parse_annotation(SAMPLE, Path::new("a.xml"), Path::new("a.jpg")).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].label, 8);
        assert!((boxes[0].xmin - 262.0 / 500.0).abs() < 1e-6);
        assert!((boxes[0].ymax - 338.0 / 375.0).abs() < 1e-6);
        assert_eq!(boxes[1].label, 14);
        assert_eq!(boxes[1].xmin, 0.0);
        assert_eq!(boxes[1].xmax, 1.0);
    }

    #[test]
    fn rejects_unknown_class() {
        let xml = r#"<annotation><size><width>10</width><height>10</height></size>
            <object><name>unicorn</name><bndbox><xmin>1</xmin><ymin>1</ymin><xmax>5</xmax><ymax>5</ymax></bndbox></object>
            </annotation>"#;
        let err = parse_annotation(xml, Path::new("b.xml"), Path::new("b.jpg"));
        assert!(matches!(err, Err(SsdError::UnknownClass { .. })));
    }

    #[test]
    fn rejects_missing_coordinate() {
        let xml = r#"<annotation><size><width>10</width><height>10</height></size>
            <object><name>cat</name><bndbox><xmin>1</xmin><ymin>1</ymin><xmax>5</xmax></bndbox></object>
            </annotation>"#;
        let err = parse_annotation(xml, Path::new("c.xml"), Path::new("c.jpg"));
        assert!(matches!(err, Err(SsdError::Annotation { .. })));
    }
}
