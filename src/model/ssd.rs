use burn::prelude::*;

use super::backbone::Vgg;
use super::blocks::L2Norm;
use super::head::MultiBoxHead;
use super::neck::Extras;
use crate::data::SsdConfig;

#[derive(Module, Debug)]
pub struct Ssd<B: Backend> {
    pub vgg: Vgg<B>,
    pub l2norm: L2Norm<B>,
    pub extras: Extras<B>,
    pub head: MultiBoxHead<B>,
}

impl<B: Backend> Ssd<B> {
    pub fn new(device: &B::Device, cfg: &SsdConfig) -> Self {
        let extra = Extras::<B>::out_channels();
        let sources = [512, 1024, extra[0], extra[1], extra[2], extra[3]];
        Self {
            vgg: Vgg::new(device),
            l2norm: L2Norm::new(device, 512, 20.0),
            extras: Extras::new(device),
            head: MultiBoxHead::new(device, &sources, &cfg.boxes_per_location(), cfg.num_classes),
        }
    }

    /// Raw predictions for training: loc offsets `[B, P, 4]` and class
    /// logits `[B, P, num_classes]`.
    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let (conv4_3, conv7) = self.vgg.forward(x);
        let mut sources = vec![self.l2norm.forward(conv4_3), conv7.clone()];
        sources.extend(self.extras.forward(conv7));
        self.head.forward(sources)
    }

    pub fn num_classes(&self) -> usize {
        self.head.num_classes()
    }
}
