use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;

use crate::model::blocks::{ConvRelu, ConvSpec};

/// VGG16 trunk with the fully connected layers replaced by a dilated
/// conv6 and a pointwise conv7. Returns the conv4_3 and conv7 activations.
#[derive(Module, Debug)]
pub struct Vgg<B: Backend> {
    stage1: Vec<ConvRelu<B>>,
    stage2: Vec<ConvRelu<B>>,
    stage3: Vec<ConvRelu<B>>,
    stage4: Vec<ConvRelu<B>>,
    stage5: Vec<ConvRelu<B>>,
    pool: MaxPool2d,
    // 75 -> 38 at 300px input; padding stands in for ceil mode.
    pool_ceil: MaxPool2d,
    pool5: MaxPool2d,
    conv6: ConvRelu<B>,
    conv7: ConvRelu<B>,
}

fn stage<B: Backend>(
    device: &B::Device,
    in_channels: usize,
    out_channels: usize,
    depth: usize,
) -> Vec<ConvRelu<B>> {
    (0..depth)
        .map(|i| {
            let cin = if i == 0 { in_channels } else { out_channels };
            ConvRelu::new(device, cin, out_channels, ConvSpec::same3x3(), None)
        })
        .collect()
}

impl<B: Backend> Vgg<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            stage1: stage(device, 3, 64, 2),      // 300
            stage2: stage(device, 64, 128, 2),    // 150
            stage3: stage(device, 128, 256, 3),   // 75
            stage4: stage(device, 256, 512, 3),   // 38
            stage5: stage(device, 512, 512, 3),   // 19
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            pool_ceil: MaxPool2dConfig::new([2, 2])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            pool5: MaxPool2dConfig::new([3, 3])
                .with_strides([1, 1])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            conv6: ConvRelu::new(
                device,
                512,
                1024,
                ConvSpec::same3x3().with_padding(6).with_dilation(6),
                None,
            ),
            conv7: ConvRelu::new(device, 1024, 1024, ConvSpec::pointwise(), None),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let x = self.pool.forward(run(&self.stage1, x));
        let x = self.pool.forward(run(&self.stage2, x));
        let x = self.pool_ceil.forward(run(&self.stage3, x));
        let conv4_3 = run(&self.stage4, x);

        let x = self.pool.forward(conv4_3.clone());
        let x = self.pool5.forward(run(&self.stage5, x));
        let conv7 = self.conv7.forward(self.conv6.forward(x));

        (conv4_3, conv7)
    }
}

fn run<B: Backend>(layers: &[ConvRelu<B>], x: Tensor<B, 4>) -> Tensor<B, 4> {
    layers.iter().fold(x, |x, layer| layer.forward(x))
}
