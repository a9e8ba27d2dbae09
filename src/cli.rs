use clap::builder::RangedU64ValueParser;
use clap::{ArgAction, Parser};
use std::convert::Infallible;
use std::path::PathBuf;

use crate::data::config::{default_coco_root, default_voc_root, resolve_dataset_root};
use crate::data::{DatasetKind, DetectionDataset, VocImageSet};
use crate::error::Result;
use crate::training::{OptimizerKind, TrainingConfig};

/// `yes`, `true`, `t` and `1` (any case) are true, everything else false.
pub fn str2bool(value: &str) -> std::result::Result<bool, Infallible> {
    Ok(matches!(
        value.to_ascii_lowercase().as_str(),
        "yes" | "true" | "t" | "1"
    ))
}

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Single Shot MultiBox Detector training with burn"
)]
pub struct TrainArgs {
    /// VOC or COCO
    #[arg(long, value_enum, ignore_case = true, default_value_t = DatasetKind::Voc)]
    pub dataset: DatasetKind,

    /// Dataset root directory path
    #[arg(long, alias = "dataset_root")]
    pub dataset_root: Option<PathBuf>,

    /// VOC image sets as <year>:<set>, comma separated
    #[arg(
        long,
        alias = "voc_sets",
        value_delimiter = ',',
        default_value = "2007:trainval,2012:trainval"
    )]
    pub voc_sets: Vec<VocImageSet>,

    /// COCO image set
    #[arg(long, alias = "coco_set", default_value = "trainval35k")]
    pub coco_set: String,

    /// Pretrained base model, relative to the save folder
    #[arg(long, default_value = "vgg16_reducedfc.bin")]
    pub basenet: String,

    /// Batch size for training
    #[arg(
        long,
        alias = "batch_size",
        default_value_t = 32,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub batch_size: u64,

    /// Checkpoint file to resume training from
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Resume training at this iteration
    #[arg(long, alias = "start_iter", default_value_t = 0)]
    pub start_iter: usize,

    /// Number of workers used in data loading
    #[arg(long, alias = "num_workers", default_value_t = 4)]
    pub num_workers: usize,

    /// Use the GPU backend when compiled in
    #[arg(long, default_value = "true", value_parser = str2bool, action = ArgAction::Set)]
    pub cuda: bool,

    /// Optimization method: sgd or cosgd
    #[arg(long = "opt", alias = "optimizer", default_value = "sgd")]
    pub optimizer: OptimizerKind,

    /// Initial learning rate (eta for cosgd)
    #[arg(long, alias = "learning-rate", default_value_t = 1e-3)]
    pub lr: f64,

    /// Momentum value for SGD
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,

    /// Weight decay for SGD
    #[arg(long, alias = "weight_decay", default_value_t = 5e-4)]
    pub weight_decay: f64,

    /// Learning rate decay factor at each step
    #[arg(long, default_value_t = 0.1)]
    pub gamma: f64,

    /// Stream losses to a visdom server
    #[arg(long, default_value = "false", value_parser = str2bool, action = ArgAction::Set)]
    pub visdom: bool,

    #[arg(long, alias = "visdom_server", default_value = "http://localhost")]
    pub visdom_server: String,

    #[arg(long, alias = "visdom_port", default_value_t = 8097)]
    pub visdom_port: u16,

    /// Directory for saving checkpoint models
    #[arg(long, alias = "save_folder", default_value = "weights/")]
    pub save_folder: PathBuf,

    /// Override the preset iteration budget
    #[arg(long, alias = "max_iter")]
    pub max_iter: Option<usize>,

    #[arg(
        long,
        alias = "checkpoint_interval",
        default_value_t = 5000,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub checkpoint_interval: usize,

    #[arg(
        long,
        alias = "log_interval",
        default_value_t = 10,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub log_interval: usize,

    #[arg(
        long,
        alias = "plot_interval",
        default_value_t = 100,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub plot_interval: usize,

    /// Seed for shuffling and augmentation
    #[arg(long)]
    pub seed: Option<u64>,

    /// Load the whole training configuration from YAML, ignoring other flags
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl TrainArgs {
    pub fn into_config(self) -> Result<TrainingConfig> {
        if let Some(path) = &self.config {
            log::info!("Loading config from {}", path.display());
            return TrainingConfig::from_yaml(path);
        }
        Ok(TrainingConfig {
            dataset: self.dataset,
            dataset_root: self.dataset_root,
            voc_sets: self.voc_sets,
            coco_set: self.coco_set,
            num_workers: self.num_workers,
            seed: self.seed,
            basenet: self.basenet,
            resume: self.resume,
            cuda: self.cuda,
            optimizer: self.optimizer,
            batch_size: self.batch_size as usize,
            lr: self.lr,
            momentum: self.momentum,
            weight_decay: self.weight_decay,
            gamma: self.gamma,
            start_iter: self.start_iter,
            max_iter: self.max_iter,
            log_interval: self.log_interval,
            plot_interval: self.plot_interval,
            visdom: self.visdom,
            visdom_server: self.visdom_server,
            visdom_port: self.visdom_port,
            save_folder: self.save_folder,
            checkpoint_interval: self.checkpoint_interval,
        })
    }
}

/// Resolves the dataset root, records it in `config` and indexes the
/// annotations.
pub fn open_dataset(config: &mut TrainingConfig) -> Result<DetectionDataset> {
    let root = resolve_dataset_root(
        config.dataset,
        config.dataset_root.as_deref(),
        &default_coco_root(),
        &default_voc_root(),
    )?;
    log::info!("Loading the dataset from {}...", root.display());
    let dataset =
        DetectionDataset::open(config.dataset, &root, &config.voc_sets, &config.coco_set)?;
    config.dataset_root = Some(root);
    Ok(dataset)
}
