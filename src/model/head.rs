use burn::nn::conv::Conv2d;
use burn::prelude::*;

use crate::model::blocks::{xavier, ConvSpec};

#[derive(Module, Debug)]
pub struct MultiBoxHead<B: Backend> {
    loc: Vec<Conv2d<B>>,
    conf: Vec<Conv2d<B>>,
    num_classes: usize,
}

impl<B: Backend> MultiBoxHead<B> {
    /// One loc and one conf 3x3 predictor per source; `boxes_per_location`
    /// must line up with the prior generator.
    pub fn new(
        device: &B::Device,
        source_channels: &[usize],
        boxes_per_location: &[usize],
        num_classes: usize,
    ) -> Self {
        assert_eq!(
            source_channels.len(),
            boxes_per_location.len(),
            "one anchor count per source layer"
        );
        let (loc, conf) = source_channels
            .iter()
            .zip(boxes_per_location)
            .map(|(&channels, &anchors)| {
                let spec = ConvSpec::same3x3();
                (
                    spec.build(device, channels, anchors * 4, Some(xavier())),
                    spec.build(device, channels, anchors * num_classes, Some(xavier())),
                )
            })
            .unzip();
        Self {
            loc,
            conf,
            num_classes,
        }
    }

    /// Returns `([B, P, 4], [B, P, num_classes])`, priors ordered by source,
    /// then row, column and anchor.
    pub fn forward(&self, sources: Vec<Tensor<B, 4>>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let mut locs = Vec::with_capacity(sources.len());
        let mut confs = Vec::with_capacity(sources.len());
        for ((x, loc), conf) in sources.into_iter().zip(&self.loc).zip(&self.conf) {
            locs.push(flatten(loc.forward(x.clone()), 4));
            confs.push(flatten(conf.forward(x), self.num_classes));
        }
        (Tensor::cat(locs, 1), Tensor::cat(confs, 1))
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// `[B, A*k, H, W]` -> `[B, H*W*A, k]`.
fn flatten<B: Backend>(x: Tensor<B, 4>, k: usize) -> Tensor<B, 3> {
    let [batch, channels, height, width] = x.dims();
    x.permute([0, 2, 3, 1])
        .reshape([batch, height * width * (channels / k), k])
}
