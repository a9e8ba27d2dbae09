use burn::module::Param;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Initializer, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation;

/// Geometry of a single convolution; defaults to 3x3, stride 1, padding 1.
#[derive(Debug, Clone, Copy)]
pub struct ConvSpec {
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
    pub dilation: usize,
}

impl ConvSpec {
    pub fn same3x3() -> Self {
        Self {
            kernel: 3,
            stride: 1,
            padding: 1,
            dilation: 1,
        }
    }

    pub fn pointwise() -> Self {
        Self {
            kernel: 1,
            stride: 1,
            padding: 0,
            dilation: 1,
        }
    }

    pub fn with_stride(self, stride: usize) -> Self {
        Self { stride, ..self }
    }

    pub fn with_padding(self, padding: usize) -> Self {
        Self { padding, ..self }
    }

    pub fn with_dilation(self, dilation: usize) -> Self {
        Self { dilation, ..self }
    }

    pub fn build<B: Backend>(
        &self,
        device: &B::Device,
        in_channels: usize,
        out_channels: usize,
        initializer: Option<Initializer>,
    ) -> Conv2d<B> {
        let mut config = Conv2dConfig::new([in_channels, out_channels], [self.kernel, self.kernel])
            .with_stride([self.stride, self.stride])
            .with_padding(PaddingConfig2d::Explicit(self.padding, self.padding))
            .with_dilation([self.dilation, self.dilation]);
        let Some(initializer) = initializer else {
            return config.init(device);
        };
        // Explicitly initialized layers start with zero bias.
        config = config.with_initializer(initializer);
        let mut conv = config.init(device);
        conv.bias = conv
            .bias
            .map(|_| Param::from_tensor(Tensor::zeros([out_channels], device)));
        conv
    }
}

pub fn xavier() -> Initializer {
    Initializer::XavierUniform { gain: 1.0 }
}

/// Convolution followed by ReLU, the only layer type in the VGG trunk and
/// the extra feature layers.
#[derive(Module, Debug)]
pub struct ConvRelu<B: Backend> {
    conv: Conv2d<B>,
}

impl<B: Backend> ConvRelu<B> {
    pub fn new(
        device: &B::Device,
        in_channels: usize,
        out_channels: usize,
        spec: ConvSpec,
        initializer: Option<Initializer>,
    ) -> Self {
        Self {
            conv: spec.build(device, in_channels, out_channels, initializer),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        activation::relu(self.conv.forward(x))
    }

    #[cfg(test)]
    pub(crate) fn bias(&self) -> Option<Tensor<B, 1>> {
        self.conv.bias.as_ref().map(|bias| bias.val())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    fn bias_values(conv: &Conv2d<NdArray>) -> Vec<f32> {
        conv.bias
            .as_ref()
            .unwrap()
            .val()
            .into_data()
            .to_vec()
            .unwrap()
    }

    #[test]
    fn xavier_layers_start_with_zero_bias() {
        let device = Default::default();
        let conv = ConvSpec::same3x3().build::<NdArray>(&device, 8, 16, Some(xavier()));
        let bias = bias_values(&conv);
        assert_eq!(bias.len(), 16);
        assert!(bias.iter().all(|&b| b == 0.0));

        let weights: Vec<f32> = conv.weight.val().into_data().to_vec().unwrap();
        assert!(weights.iter().any(|&w| w != 0.0));
    }

    #[test]
    fn default_init_keeps_random_bias() {
        let device = Default::default();
        let conv = ConvSpec::pointwise().build::<NdArray>(&device, 64, 32, None);
        assert!(bias_values(&conv).iter().any(|&b| b != 0.0));
    }
}
