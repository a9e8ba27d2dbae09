use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::data::config::default_voc_sets;
use crate::data::{DatasetKind, SsdConfig, VocImageSet};
use crate::error::{Result, SsdError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OptimizerKind {
    /// SGD with momentum, weight decay and a step LR schedule.
    Sgd,
    /// Plain SGD whose step size adapts to the current loss and gradient norm.
    Cosgd,
}

impl OptimizerKind {
    pub fn name(self) -> &'static str {
        match self {
            OptimizerKind::Sgd => "sgd",
            OptimizerKind::Cosgd => "cosgd",
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = SsdError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sgd" => Ok(OptimizerKind::Sgd),
            "cosgd" => Ok(OptimizerKind::Cosgd),
            other => Err(SsdError::UnknownOptimizer(other.to_string())),
        }
    }
}

impl TryFrom<String> for OptimizerKind {
    type Error = SsdError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<OptimizerKind> for String {
    fn from(kind: OptimizerKind) -> Self {
        kind.name().to_string()
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    // Dataset
    pub dataset: DatasetKind,
    pub dataset_root: Option<PathBuf>,
    pub voc_sets: Vec<VocImageSet>,
    pub coco_set: String,
    pub num_workers: usize,
    pub seed: Option<u64>,

    // Model
    pub basenet: String,
    pub resume: Option<PathBuf>,
    pub cuda: bool,

    // Optimization
    pub optimizer: OptimizerKind,
    pub batch_size: usize,
    pub lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub gamma: f64,
    pub start_iter: usize,
    pub max_iter: Option<usize>,

    // Logging
    pub log_interval: usize,
    pub plot_interval: usize,
    pub visdom: bool,
    pub visdom_server: String,
    pub visdom_port: u16,

    // Checkpointing
    pub save_folder: PathBuf,
    pub checkpoint_interval: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetKind::Voc,
            dataset_root: None,
            voc_sets: default_voc_sets(),
            coco_set: "trainval35k".to_string(),
            num_workers: 4,
            seed: None,
            basenet: "vgg16_reducedfc.bin".to_string(),
            resume: None,
            cuda: true,
            optimizer: OptimizerKind::Sgd,
            batch_size: 32,
            lr: 1e-3,
            momentum: 0.9,
            weight_decay: 5e-4,
            gamma: 0.1,
            start_iter: 0,
            max_iter: None,
            log_interval: 10,
            plot_interval: 100,
            visdom: false,
            visdom_server: "http://localhost".to_string(),
            visdom_port: 8097,
            save_folder: PathBuf::from("weights/"),
            checkpoint_interval: 5000,
        }
    }
}

impl TrainingConfig {
    pub fn from_yaml(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SsdError::io(path, e))?;
        let config: Self = serde_yaml::from_str(&content).map_err(|source| SsdError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Batch size and every interval must be positive.
    pub fn validate(&self) -> Result<()> {
        let counts = [
            ("batch_size", self.batch_size),
            ("log_interval", self.log_interval),
            ("plot_interval", self.plot_interval),
            ("checkpoint_interval", self.checkpoint_interval),
        ];
        match counts.into_iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(SsdError::ZeroSetting(name)),
            None => Ok(()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).map_err(|source| SsdError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, yaml).map_err(|e| SsdError::io(path, e))?;
        Ok(())
    }

    /// Dataset preset with the `max_iter` override applied.
    pub fn preset(&self) -> SsdConfig {
        let mut preset = self.dataset.preset();
        if let Some(max_iter) = self.max_iter {
            preset.max_iter = max_iter;
        }
        preset
    }

    /// Experiment name, also used as the visdom environment.
    pub fn xp_name(&self) -> String {
        format!("ssd-{}--eta-{}", self.optimizer, self.lr)
    }

    pub fn basenet_path(&self) -> PathBuf {
        self.save_folder.join(&self.basenet)
    }
}
