use burn::module::Param;
use burn::prelude::*;

/// Channel-wise L2 normalisation with a learned per-channel scale, applied
/// to conv4_3 whose activations are much larger than the deeper sources.
#[derive(Module, Debug)]
pub struct L2Norm<B: Backend> {
    weight: Param<Tensor<B, 1>>,
    channels: usize,
    eps: f64,
}

impl<B: Backend> L2Norm<B> {
    pub fn new(device: &B::Device, channels: usize, scale: f32) -> Self {
        Self {
            weight: Param::from_tensor(Tensor::full([channels], scale, device)),
            channels,
            eps: 1e-10,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let norm = x.clone().powf_scalar(2.0).sum_dim(1).sqrt().add_scalar(self.eps);
        let weight = self.weight.val().reshape([1, self.channels, 1, 1]);
        x.div(norm).mul(weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn rescales_to_unit_norm_times_scale() {
        let device = Default::default();
        let norm = L2Norm::<NdArray>::new(&device, 2, 20.0);
        let x = Tensor::<NdArray, 4>::from_data(
            TensorData::new(vec![3.0f32, 4.0], [1, 2, 1, 1]),
            &device,
        );
        let out: Vec<f32> = norm.forward(x).into_data().to_vec().unwrap();
        assert!((out[0] - 12.0).abs() < 1e-4);
        assert!((out[1] - 16.0).abs() < 1e-4);
    }
}
