use burn::prelude::*;

use crate::model::blocks::{xavier, ConvRelu, ConvSpec};

/// Extra feature layers appended after conv7. Each pair is a 1x1 channel
/// reduction followed by a 3x3 that shrinks the map; the output of every
/// pair becomes a detection source (10, 5, 3, 1 at 300px input).
#[derive(Module, Debug)]
pub struct Extras<B: Backend> {
    reduce: Vec<ConvRelu<B>>,
    expand: Vec<ConvRelu<B>>,
}

impl<B: Backend> Extras<B> {
    pub fn new(device: &B::Device) -> Self {
        // (in, mid, out, stride, padding)
        let pairs = [
            (1024, 256, 512, 2, 1),
            (512, 128, 256, 2, 1),
            (256, 128, 256, 1, 0),
            (256, 128, 256, 1, 0),
        ];
        let (reduce, expand) = pairs
            .iter()
            .map(|&(cin, mid, cout, stride, padding)| {
                (
                    ConvRelu::new(device, cin, mid, ConvSpec::pointwise(), Some(xavier())),
                    ConvRelu::new(
                        device,
                        mid,
                        cout,
                        ConvSpec::same3x3().with_stride(stride).with_padding(padding),
                        Some(xavier()),
                    ),
                )
            })
            .unzip();
        Self { reduce, expand }
    }

    pub fn out_channels() -> [usize; 4] {
        [512, 256, 256, 256]
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let mut sources = Vec::with_capacity(self.expand.len());
        let mut x = x;
        for (reduce, expand) in self.reduce.iter().zip(&self.expand) {
            x = expand.forward(reduce.forward(x));
            sources.push(x.clone());
        }
        sources
    }
}
