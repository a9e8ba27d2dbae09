use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, SsdError};

/// Per-channel pixel means in RGB order, subtracted after augmentation.
pub const MEANS: [f32; 3] = [123.0, 117.0, 104.0];

pub const VOC_CLASSES: [&str; 20] = [
    "aeroplane",
    "bicycle",
    "bird",
    "boat",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "diningtable",
    "dog",
    "horse",
    "motorbike",
    "person",
    "pottedplant",
    "sheep",
    "sofa",
    "train",
    "tvmonitor",
];

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetKind {
    #[value(name = "VOC")]
    #[serde(rename = "VOC")]
    Voc,
    #[value(name = "COCO")]
    #[serde(rename = "COCO")]
    Coco,
}

impl DatasetKind {
    pub fn name(self) -> &'static str {
        match self {
            DatasetKind::Voc => "VOC",
            DatasetKind::Coco => "COCO",
        }
    }

    pub fn preset(self) -> SsdConfig {
        match self {
            DatasetKind::Voc => SsdConfig::voc(),
            DatasetKind::Coco => SsdConfig::coco(),
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Network and schedule geometry for one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsdConfig {
    pub name: String,
    pub num_classes: usize,
    pub lr_steps: Vec<usize>,
    pub max_iter: usize,
    pub feature_maps: Vec<usize>,
    pub min_dim: usize,
    pub steps: Vec<usize>,
    pub min_sizes: Vec<usize>,
    pub max_sizes: Vec<usize>,
    pub aspect_ratios: Vec<Vec<usize>>,
    pub variance: [f32; 2],
    pub clip: bool,
}

impl SsdConfig {
    pub fn voc() -> Self {
        Self {
            name: "VOC".to_string(),
            num_classes: 21,
            lr_steps: vec![80_000, 100_000, 120_000],
            max_iter: 120_000,
            feature_maps: vec![38, 19, 10, 5, 3, 1],
            min_dim: 300,
            steps: vec![8, 16, 32, 64, 100, 300],
            min_sizes: vec![30, 60, 111, 162, 213, 264],
            max_sizes: vec![60, 111, 162, 213, 264, 315],
            aspect_ratios: vec![vec![2], vec![2, 3], vec![2, 3], vec![2, 3], vec![2], vec![2]],
            variance: [0.1, 0.2],
            clip: true,
        }
    }

    pub fn coco() -> Self {
        Self {
            name: "COCO".to_string(),
            num_classes: 81,
            lr_steps: vec![280_000, 360_000, 400_000],
            max_iter: 400_000,
            min_sizes: vec![21, 45, 99, 153, 207, 261],
            max_sizes: vec![45, 99, 153, 207, 261, 315],
            ..Self::voc()
        }
    }

    /// Anchor count per feature-map cell for each source layer.
    pub fn boxes_per_location(&self) -> Vec<usize> {
        self.aspect_ratios.iter().map(|ars| 2 + 2 * ars.len()).collect()
    }
}

/// A `<year>:<set>` pair naming one VOC image list, e.g. `2007:trainval`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VocImageSet {
    pub year: String,
    pub set: String,
}

impl FromStr for VocImageSet {
    type Err = SsdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((year, set)) if !year.trim().is_empty() && !set.trim().is_empty() => Ok(Self {
                year: year.trim().to_string(),
                set: set.trim().to_string(),
            }),
            _ => Err(SsdError::InvalidImageSet(s.to_string())),
        }
    }
}

impl TryFrom<String> for VocImageSet {
    type Error = SsdError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<VocImageSet> for String {
    fn from(value: VocImageSet) -> Self {
        format!("{}:{}", value.year, value.set)
    }
}

pub fn default_voc_sets() -> Vec<VocImageSet> {
    vec![
        VocImageSet {
            year: "2007".into(),
            set: "trainval".into(),
        },
        VocImageSet {
            year: "2012".into(),
            set: "trainval".into(),
        },
    ]
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn default_voc_root() -> PathBuf {
    home_dir().join("data").join("VOCdevkit")
}

pub fn default_coco_root() -> PathBuf {
    home_dir().join("data").join("coco")
}

/// Picks the dataset root, rejecting VOC pointed at the COCO default and
/// COCO without a usable root.
pub fn resolve_dataset_root(
    kind: DatasetKind,
    requested: Option<&Path>,
    coco_default: &Path,
    voc_default: &Path,
) -> Result<PathBuf> {
    match (kind, requested) {
        (DatasetKind::Coco, Some(root)) => Ok(root.to_path_buf()),
        (DatasetKind::Coco, None) => {
            if !coco_default.exists() {
                return Err(SsdError::MissingDatasetRoot {
                    default: coco_default.to_path_buf(),
                });
            }
            log::warn!(
                "Using default COCO dataset_root {} because --dataset-root was not specified",
                coco_default.display()
            );
            Ok(coco_default.to_path_buf())
        }
        (DatasetKind::Voc, Some(root)) if root == coco_default => {
            Err(SsdError::DatasetRootMismatch {
                root: root.to_path_buf(),
            })
        }
        (DatasetKind::Voc, Some(root)) => Ok(root.to_path_buf()),
        (DatasetKind::Voc, None) => Ok(voc_default.to_path_buf()),
    }
}
