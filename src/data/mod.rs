pub mod coco;
pub mod config;
pub mod dataloader;
pub mod dataset;
pub mod transforms;
pub mod voc;

pub use config::{DatasetKind, SsdConfig, VocImageSet, MEANS, VOC_CLASSES};
pub use dataloader::{collate, DetectionBatch, DetectionDataLoader};
pub use dataset::{Annotation, BoxLabel, DetectionDataset};
pub use transforms::{AugmentedSample, SsdAugmentation};
