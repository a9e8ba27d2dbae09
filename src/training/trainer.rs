use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;

use crate::data::{
    DetectionBatch, DetectionDataLoader, DetectionDataset, SsdAugmentation, SsdConfig, MEANS,
};
use crate::error::{Result, SsdError};
use crate::model::{MultiBoxLoss, PriorBox, Ssd};
use crate::training::checkpoint::{self, CheckpointMeta};
use crate::training::config::{OptimizerKind, TrainingConfig};
use crate::training::metrics::{Average, Experiment, Simple, Timer, WindowOptions};
use crate::training::optimizer::TrainOptimizer;
use crate::training::visdom::VisdomPlotter;

/// Result of one optimizer iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub loss_l: f64,
    pub loss_c: f64,
    pub step_size: f64,
    /// The loss was NaN or infinite and no update was applied.
    pub skipped: bool,
}

impl StepOutcome {
    pub fn loss(&self) -> f64 {
        self.loss_l + self.loss_c
    }
}

#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub iterations: usize,
    pub skipped: usize,
    pub checkpoints: Vec<PathBuf>,
    pub final_checkpoint: PathBuf,
}

/// Per-epoch running averages of the losses and the step size.
#[derive(Debug, Clone, Default)]
pub struct EpochMeters {
    pub loc: Average,
    pub conf: Average,
    pub step_size: Average,
}

impl EpochMeters {
    pub fn reset(&mut self) {
        self.loc.reset();
        self.conf.reset();
        self.step_size.reset();
    }

    /// Losses are weighted by batch size. So is the SGD learning rate; the
    /// adaptive cosgd step counts once per iteration.
    pub fn observe(&mut self, outcome: &StepOutcome, batch_size: usize, kind: OptimizerKind) {
        let weighting = batch_size as f64;
        self.loc.update(outcome.loss_l, weighting);
        self.conf.update(outcome.loss_c, weighting);
        match kind {
            OptimizerKind::Sgd => self.step_size.update(outcome.step_size, weighting),
            OptimizerKind::Cosgd => self.step_size.update(outcome.step_size, 1.0),
        }
    }

    pub fn total(&self) -> f64 {
        self.loc.value() + self.conf.value()
    }
}

/// Epoch/batch counts derived from dataset size and the iteration budget.
pub fn epoch_plan(len: usize, batch_size: usize, max_iter: usize) -> Result<(usize, usize)> {
    let epoch_size = len / batch_size.max(1);
    if epoch_size == 0 {
        return Err(SsdError::DatasetTooSmall { len, batch_size });
    }
    Ok((epoch_size, max_iter / epoch_size))
}

pub struct Trainer<B: AutodiffBackend> {
    pub model: Ssd<B>,
    config: TrainingConfig,
    preset: SsdConfig,
    criterion: MultiBoxLoss,
    priors: PriorBox,
    optimizer: TrainOptimizer<B, Ssd<B>>,
    experiment: Experiment,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Builds the network and restores weights: the full model from
    /// `resume` when given, otherwise the VGG trunk from the base-net file.
    pub fn new(config: TrainingConfig, device: B::Device) -> Result<Self> {
        config.validate()?;
        let preset = config.preset();
        let mut model = Ssd::new(&device, &preset);

        if let Some(resume) = &config.resume {
            log::info!("Resuming training, loading {}...", resume.display());
            model = checkpoint::load(model, resume, &device)?;
        } else {
            let basenet = config.basenet_path();
            log::info!("Loading base network {}...", basenet.display());
            model = checkpoint::load_basenet(model, &basenet, &device)?;
        }

        let criterion = MultiBoxLoss::new(preset.num_classes, preset.variance);
        let priors = PriorBox::new(&preset);
        let optimizer = TrainOptimizer::new(&config, preset.lr_steps.clone());
        let experiment = Experiment::new(config.xp_name(), config.clone());

        let mut trainer = Self {
            model,
            config,
            preset,
            criterion,
            priors,
            optimizer,
            experiment,
            device,
        };
        if trainer.config.visdom {
            trainer.connect_visdom();
        }
        Ok(trainer)
    }

    fn connect_visdom(&mut self) {
        let plotter = VisdomPlotter::new(
            &self.config.visdom_server,
            self.config.visdom_port,
            self.experiment.name.clone(),
        );
        match plotter {
            Ok(plotter) => {
                self.experiment.plot_on(Box::new(plotter));
                self.experiment
                    .set_window_options("Step-Size", WindowOptions { log_y: true });
            }
            Err(e) => log::warn!("visdom disabled: {e}"),
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn preset(&self) -> &SsdConfig {
        &self.preset
    }

    pub fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    /// Forward, loss, backward and one parameter update.
    pub fn train_step(&mut self, iteration: usize, batch: DetectionBatch<B>) -> StepOutcome {
        let (loc, conf) = self.model.forward(batch.images);
        let (loss_l, loss_c) = self
            .criterion
            .forward(loc, conf, &batch.targets, self.priors.as_slice());

        let loc_value = loss_l.clone().into_scalar().elem::<f64>();
        let conf_value = loss_c.clone().into_scalar().elem::<f64>();
        let loss_value = loc_value + conf_value;

        if !loss_value.is_finite() {
            return StepOutcome {
                loss_l: loc_value,
                loss_c: conf_value,
                step_size: 0.0,
                skipped: true,
            };
        }

        let loss = loss_l + loss_c;
        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        let step_size = self
            .optimizer
            .step_size(iteration, loss_value, &self.model, &grads);
        self.model = self.optimizer.step(step_size, self.model.clone(), grads);

        StepOutcome {
            loss_l: loc_value,
            loss_c: conf_value,
            step_size,
            skipped: false,
        }
    }

    pub fn train(&mut self, dataset: DetectionDataset) -> Result<TrainSummary> {
        let save_folder = self.config.save_folder.clone();
        std::fs::create_dir_all(&save_folder).map_err(|e| SsdError::io(&save_folder, e))?;
        self.config.save(&save_folder.join("train_config.yaml"))?;

        let batch_size = self.config.batch_size;
        let max_iter = self.preset.max_iter;
        let budget = max_iter.saturating_sub(self.config.start_iter);
        let (epoch_size, max_epochs) = epoch_plan(dataset.len(), batch_size, budget)?;

        log::info!("Training SSD on: {}", dataset.name());
        log::info!(
            "{} images, {} iterations per epoch, {} epochs, optimizer {}",
            dataset.len(),
            epoch_size,
            max_epochs,
            self.optimizer.kind()
        );
        log::debug!("Using the specified args: {:?}", self.config);

        let mut loader = DetectionDataLoader::<B>::new(
            Arc::new(dataset),
            SsdAugmentation::new(self.preset.min_dim as u32, MEANS),
            batch_size,
            true,
            self.config.num_workers,
            self.config.seed,
            self.device.clone(),
        );

        let mut meters = EpochMeters::default();
        let mut total_loss = Simple::default();
        let mut timer = Timer::default();

        let pb = ProgressBar::new(max_epochs as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut iteration = self.config.start_iter;
        let mut skipped = 0;
        let mut checkpoints = Vec::new();

        'epochs: for epoch in 1..=max_epochs {
            meters.reset();
            loader.reset();

            for batch in loader.by_ref() {
                if iteration >= max_iter {
                    break 'epochs;
                }
                iteration += 1;
                let batch_len = batch.batch_size;

                timer.start();
                let outcome = self.train_step(iteration, batch);
                let elapsed = timer.stop();

                if outcome.skipped {
                    skipped += 1;
                    log::warn!("NaN/Inf loss at iteration {iteration}, skipping update");
                } else {
                    meters.observe(&outcome, batch_len, self.optimizer.kind());
                }

                if iteration % self.config.log_interval == 0 {
                    log::info!("timer: {elapsed:.4} sec.");
                    log::info!("iter {iteration} || Loss: {:.4} ||", outcome.loss());
                    total_loss.update(meters.total());
                    self.experiment.record("Loss", "loc", iteration, meters.loc.value());
                    self.experiment.record("Loss", "conf", iteration, meters.conf.value());
                    self.experiment.record("Loss", "total", iteration, total_loss.value());
                    self.experiment
                        .record("Step-Size", "step_size", iteration, meters.step_size.value());
                }

                if iteration % self.config.plot_interval == 0
                    && self.experiment.is_plotting()
                {
                    self.experiment.flush_plots();
                }

                if iteration % self.config.checkpoint_interval == 0 {
                    log::info!("Saving state, iter: {iteration}");
                    let stem = format!("ssd300_{}_{}", self.config.dataset, iteration);
                    checkpoints.push(self.save(&stem, iteration)?);
                }
            }

            pb.set_message(format!(
                "Epoch {epoch}: loc={:.4} conf={:.4}",
                meters.loc.value(),
                meters.conf.value()
            ));
            pb.inc(1);
        }

        let final_checkpoint = self.save(self.config.dataset.name(), iteration)?;
        self.experiment.flush_plots();
        self.experiment
            .save_json(&save_folder.join(format!("{}.json", self.experiment.name)))?;
        pb.finish_with_message("Training completed!");

        Ok(TrainSummary {
            iterations: iteration,
            skipped,
            checkpoints,
            final_checkpoint,
        })
    }

    pub fn save(&self, stem: &str, iteration: usize) -> Result<PathBuf> {
        let meta = CheckpointMeta {
            model_type: "SSD300".to_string(),
            dataset: self.config.dataset.name().to_string(),
            num_classes: self.model.num_classes(),
            min_dim: self.preset.min_dim,
            iteration,
            checkpoint_name: stem.to_string(),
        };
        checkpoint::save(&self.model, &self.config.save_folder, &meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(loss_l: f64, loss_c: f64, step_size: f64) -> StepOutcome {
        StepOutcome {
            loss_l,
            loss_c,
            step_size,
            skipped: false,
        }
    }

    #[test]
    fn meters_weight_by_batch_and_reset_per_epoch() {
        let mut meters = EpochMeters::default();
        meters.observe(&outcome(1.0, 2.0, 0.1), 1, OptimizerKind::Sgd);
        meters.observe(&outcome(3.0, 4.0, 0.3), 3, OptimizerKind::Sgd);
        assert!((meters.loc.value() - 2.5).abs() < 1e-12);
        assert!((meters.conf.value() - 3.5).abs() < 1e-12);
        assert!((meters.step_size.value() - 0.25).abs() < 1e-12);
        assert!((meters.total() - 6.0).abs() < 1e-12);

        meters.reset();
        assert_eq!(meters.total(), 0.0);
        meters.observe(&outcome(5.0, 1.0, 0.2), 2, OptimizerKind::Sgd);
        assert_eq!(meters.loc.value(), 5.0);
        assert_eq!(meters.step_size.value(), 0.2);
    }

    #[test]
    fn cosgd_step_size_is_unweighted() {
        let mut meters = EpochMeters::default();
        meters.observe(&outcome(1.0, 1.0, 0.1), 1, OptimizerKind::Cosgd);
        meters.observe(&outcome(1.0, 1.0, 0.3), 3, OptimizerKind::Cosgd);
        assert!((meters.step_size.value() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn epoch_plan_floors() {
        assert_eq!(epoch_plan(100, 32, 120_000).unwrap(), (3, 40_000));
        assert_eq!(epoch_plan(10, 3, 7).unwrap(), (3, 2));
        assert!(matches!(
            epoch_plan(5, 32, 100),
            Err(SsdError::DatasetTooSmall { len: 5, batch_size: 32 })
        ));
    }
}
