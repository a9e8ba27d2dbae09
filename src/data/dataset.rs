use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::data::config::{DatasetKind, VocImageSet};
use crate::data::{coco, voc};
use crate::error::{Result, SsdError};

/// Ground-truth box in normalized corner coordinates with a 0-based class
/// index (background is not counted).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxLabel {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
    pub label: usize,
}

impl BoxLabel {
    pub fn corners(&self) -> [f32; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }
}

#[derive(Debug, Clone)]
pub struct Annotation {
    pub image_path: PathBuf,
    pub boxes: Vec<BoxLabel>,
}

/// An indexed detection dataset. Annotations are parsed once up front;
/// images are decoded on demand.
#[derive(Debug, Clone)]
pub struct DetectionDataset {
    name: String,
    class_names: Vec<String>,
    samples: Vec<Annotation>,
}

impl DetectionDataset {
    pub fn new(
        name: impl Into<String>,
        class_names: Vec<String>,
        samples: Vec<Annotation>,
    ) -> Self {
        Self {
            name: name.into(),
            class_names,
            samples,
        }
    }

    pub fn voc(root: &Path, image_sets: &[VocImageSet]) -> Result<Self> {
        voc::load(root, image_sets)
    }

    pub fn coco(root: &Path, image_set: &str) -> Result<Self> {
        coco::load(root, image_set)
    }

    pub fn open(
        kind: DatasetKind,
        root: &Path,
        voc_sets: &[VocImageSet],
        coco_set: &str,
    ) -> Result<Self> {
        let dataset = match kind {
            DatasetKind::Voc => Self::voc(root, voc_sets)?,
            DatasetKind::Coco => Self::coco(root, coco_set)?,
        };
        if dataset.is_empty() {
            return Err(SsdError::EmptyDataset {
                name: dataset.name.clone(),
            });
        }
        Ok(dataset)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, idx: usize) -> Result<(RgbImage, Vec<BoxLabel>)> {
        let sample = self.samples.get(idx).ok_or_else(|| SsdError::Annotation {
            path: PathBuf::from(&self.name),
            reason: format!("index {} out of bounds ({} samples)", idx, self.samples.len()),
        })?;
        let img = image::open(&sample.image_path).map_err(|source| SsdError::Image {
            path: sample.image_path.clone(),
            source,
        })?;
        Ok((img.to_rgb8(), sample.boxes.clone()))
    }
}
