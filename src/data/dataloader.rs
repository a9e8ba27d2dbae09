use burn::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::sync::Arc;

use crate::data::dataset::{BoxLabel, DetectionDataset};
use crate::data::transforms::{AugmentedSample, SsdAugmentation};

/// Stacked images plus per-image ground truth, the shape the loss expects.
pub struct DetectionBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Vec<Vec<BoxLabel>>,
    pub batch_size: usize,
}

pub struct DetectionDataLoader<B: Backend> {
    dataset: Arc<DetectionDataset>,
    transform: SsdAugmentation,
    batch_size: usize,
    shuffle: bool,
    device: B::Device,
    indices: Vec<usize>,
    current_idx: usize,
    rng: StdRng,
    epoch_seed: u64,
    pool: Option<rayon::ThreadPool>,
}

impl<B: Backend> DetectionDataLoader<B> {
    pub fn new(
        dataset: Arc<DetectionDataset>,
        transform: SsdAugmentation,
        batch_size: usize,
        shuffle: bool,
        num_workers: usize,
        seed: Option<u64>,
        device: B::Device,
    ) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let pool = if num_workers > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(num_workers)
                .thread_name(|i| format!("ssd-loader-{i}"))
                .build()
                .map_err(|e| log::warn!("falling back to inline loading: {e}"))
                .ok()
        } else {
            None
        };

        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        if shuffle {
            indices.shuffle(&mut rng);
        }
        let epoch_seed = rng.gen();

        Self {
            dataset,
            transform,
            batch_size: batch_size.max(1),
            shuffle,
            device,
            indices,
            current_idx: 0,
            rng,
            epoch_seed,
            pool,
        }
    }

    /// Rewinds for a new epoch, reshuffling when enabled.
    pub fn reset(&mut self) {
        self.current_idx = 0;
        if self.shuffle {
            self.indices.shuffle(&mut self.rng);
        }
        self.epoch_seed = self.rng.gen();
    }

    pub fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    fn load_batch(&self, batch_indices: &[usize]) -> Vec<AugmentedSample> {
        let dataset = &self.dataset;
        let transform = &self.transform;
        let epoch_seed = self.epoch_seed;
        let load = |idx: usize| -> Option<AugmentedSample> {
            let sample_seed = epoch_seed ^ (idx as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
            let mut rng = StdRng::seed_from_u64(sample_seed);
            match dataset.get(idx) {
                Ok((img, boxes)) => Some(transform.apply(&img, &boxes, &mut rng)),
                Err(e) => {
                    log::warn!("skipping sample {idx}: {e}");
                    None
                }
            }
        };

        match &self.pool {
            Some(pool) => pool.install(|| {
                batch_indices
                    .par_iter()
                    .filter_map(|&idx| load(idx))
                    .collect()
            }),
            None => batch_indices.iter().filter_map(|&idx| load(idx)).collect(),
        }
    }
}

impl<B: Backend> Iterator for DetectionDataLoader<B> {
    type Item = DetectionBatch<B>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.current_idx < self.indices.len() {
            let end_idx = (self.current_idx + self.batch_size).min(self.indices.len());
            let samples = self.load_batch(&self.indices[self.current_idx..end_idx]);
            self.current_idx = end_idx;

            if samples.is_empty() {
                continue;
            }
            return Some(collate(samples, self.transform.size as usize, &self.device));
        }
        None
    }
}

/// Stacks images into `[N, 3, size, size]` and keeps boxes per image.
pub fn collate<B: Backend>(
    samples: Vec<AugmentedSample>,
    size: usize,
    device: &B::Device,
) -> DetectionBatch<B> {
    let batch_size = samples.len();
    let mut pixels = Vec::with_capacity(batch_size * 3 * size * size);
    let mut targets = Vec::with_capacity(batch_size);
    for sample in samples {
        pixels.extend_from_slice(&sample.pixels);
        targets.push(sample.boxes);
    }

    let images =
        Tensor::<B, 4>::from_data(TensorData::new(pixels, [batch_size, 3, size, size]), device);

    DetectionBatch {
        images,
        targets,
        batch_size,
    }
}
