use burn::module::{AutodiffModule, ModuleVisitor, ParamId};
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsParams, Optimizer, Sgd, SgdConfig};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use std::marker::PhantomData;

use crate::training::config::{OptimizerKind, TrainingConfig};

/// Step decay: `base_lr * gamma^k` where `k` counts the milestones already
/// reached.
#[derive(Debug, Clone)]
pub struct StepSchedule {
    pub base_lr: f64,
    pub gamma: f64,
    pub milestones: Vec<usize>,
}

impl StepSchedule {
    pub fn lr_at(&self, iteration: usize) -> f64 {
        let reached = self.milestones.iter().filter(|&&m| m <= iteration).count();
        self.base_lr * self.gamma.powi(reached as i32)
    }
}

/// Regularizer added to the squared gradient norm in the adaptive step.
const NORM_EPS: f64 = 1e-5;

/// Either momentum SGD on a step schedule or plain SGD with an adaptive
/// step `min(eta, loss / (|g|^2 + eps))`.
pub struct TrainOptimizer<B: AutodiffBackend, M: AutodiffModule<B>> {
    kind: OptimizerKind,
    inner: OptimizerAdaptor<Sgd<B::InnerBackend>, M, B>,
    schedule: StepSchedule,
}

impl<B: AutodiffBackend, M: AutodiffModule<B>> TrainOptimizer<B, M> {
    pub fn new(config: &TrainingConfig, milestones: Vec<usize>) -> Self {
        let sgd = match config.optimizer {
            OptimizerKind::Sgd => SgdConfig::new()
                .with_momentum(Some(MomentumConfig::new().with_momentum(config.momentum)))
                .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay as f32))),
            OptimizerKind::Cosgd => SgdConfig::new(),
        };
        Self {
            kind: config.optimizer,
            inner: sgd.init(),
            schedule: StepSchedule {
                base_lr: config.lr,
                gamma: config.gamma,
                milestones,
            },
        }
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    /// Step size to use for this iteration.
    pub fn step_size(
        &self,
        iteration: usize,
        loss: f64,
        model: &M,
        grads: &GradientsParams,
    ) -> f64 {
        match self.kind {
            OptimizerKind::Sgd => self.schedule.lr_at(iteration),
            OptimizerKind::Cosgd => {
                let eta = self.schedule.base_lr;
                eta.min(loss / (grad_sq_norm::<B, M>(model, grads) + NORM_EPS))
            }
        }
    }

    pub fn step(&mut self, lr: f64, model: M, grads: GradientsParams) -> M {
        self.inner.step(lr, model, grads)
    }
}

struct GradSqNorm<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    total: f64,
    backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradSqNorm<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            self.total += grad.powf_scalar(2.0).sum().into_scalar().elem::<f64>();
        }
    }
}

/// Squared L2 norm of all parameter gradients of `model`.
pub fn grad_sq_norm<B: AutodiffBackend, M: AutodiffModule<B>>(
    model: &M,
    grads: &GradientsParams,
) -> f64 {
    let mut visitor = GradSqNorm::<B> {
        grads,
        total: 0.0,
        backend: PhantomData,
    };
    model.visit(&mut visitor);
    visitor.total
}
