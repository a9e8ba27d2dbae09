pub mod cli;
pub mod data;
pub mod error;
pub mod model;
pub mod training;

// Re-exports for convenience
pub use data::{BoxLabel, DatasetKind, DetectionDataLoader, DetectionDataset, SsdConfig};
pub use error::{Result, SsdError};
pub use model::{MultiBoxLoss, PriorBox, Ssd};
pub use training::{Trainer, TrainingConfig};
