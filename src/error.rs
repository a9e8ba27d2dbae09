use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SsdError>;

#[derive(Debug, Error)]
pub enum SsdError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("xml parse error at {path}: {source}")]
    Xml {
        path: PathBuf,
        #[source]
        source: roxmltree::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("yaml error at {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("malformed annotation {path}: {reason}")]
    Annotation { path: PathBuf, reason: String },
    #[error("unknown VOC class '{name}' in {path}")]
    UnknownClass { path: PathBuf, name: String },
    #[error("Must specify dataset_root if specifying dataset (default {default} not found)")]
    MissingDatasetRoot { default: PathBuf },
    #[error("Must specify dataset if specifying dataset_root ({root} is the COCO default)")]
    DatasetRootMismatch { root: PathBuf },
    #[error("dataset {name} contains no usable samples")]
    EmptyDataset { name: String },
    #[error("dataset of {len} samples is smaller than batch size {batch_size}")]
    DatasetTooSmall { len: usize, batch_size: usize },
    #[error("{0} must be at least 1")]
    ZeroSetting(&'static str),
    #[error("unknown optimizer '{0}' (expected 'sgd' or 'cosgd')")]
    UnknownOptimizer(String),
    #[error("invalid VOC image set '{0}' (expected <year>:<set>)")]
    InvalidImageSet(String),
    #[error("checkpoint error at {path}: {reason}")]
    Checkpoint { path: PathBuf, reason: String },
    #[error("visdom request failed: {0}")]
    Visdom(#[from] reqwest::Error),
}

impl SsdError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
