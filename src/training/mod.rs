pub mod checkpoint;
pub mod config;
pub mod metrics;
pub mod optimizer;
pub mod trainer;
pub mod visdom;

pub use checkpoint::CheckpointMeta;
pub use config::{OptimizerKind, TrainingConfig};
pub use metrics::{Average, Experiment, Plotter, Simple, Timer, WindowOptions};
pub use optimizer::{StepSchedule, TrainOptimizer};
pub use trainer::{epoch_plan, EpochMeters, StepOutcome, TrainSummary, Trainer};
pub use visdom::VisdomPlotter;
