use burn::prelude::*;
use burn::tensor::activation::log_softmax;
use rayon::prelude::*;

use crate::data::BoxLabel;
use crate::model::box_utils::{match_priors, MatchedTargets};

/// SSD multibox objective: smooth-L1 over matched priors plus
/// cross-entropy over matched priors and mined hard negatives.
#[derive(Debug, Clone)]
pub struct MultiBoxLoss {
    pub num_classes: usize,
    pub overlap_threshold: f32,
    pub neg_pos_ratio: usize,
    pub variance: [f32; 2],
}

impl MultiBoxLoss {
    pub fn new(num_classes: usize, variance: [f32; 2]) -> Self {
        Self {
            num_classes,
            overlap_threshold: 0.5,
            neg_pos_ratio: 3,
            variance,
        }
    }

    /// `loc` is `[B, P, 4]`, `conf` is `[B, P, C]`. Returns
    /// `(loss_l, loss_c)`, both already divided by the number of positives.
    pub fn forward<B: Backend>(
        &self,
        loc: Tensor<B, 3>,
        conf: Tensor<B, 3>,
        targets: &[Vec<BoxLabel>],
        priors: &[[f32; 4]],
    ) -> (Tensor<B, 1>, Tensor<B, 1>) {
        let device = loc.device();
        let [batch, num_priors, _] = loc.dims();
        debug_assert_eq!(num_priors, priors.len());
        debug_assert_eq!(batch, targets.len());

        let matched: Vec<MatchedTargets> = targets
            .par_iter()
            .map(|truths| match_priors(self.overlap_threshold, truths, priors, self.variance))
            .collect();
        let num_pos: usize = matched.iter().map(MatchedTargets::num_positive).sum();
        let normalizer = num_pos.max(1) as f32;

        let mut loc_t = Vec::with_capacity(batch * num_priors * 4);
        let mut pos_mask = Vec::with_capacity(batch * num_priors * 4);
        let mut conf_t = Vec::with_capacity(batch * num_priors);
        for m in &matched {
            for (offsets, &class) in m.loc.iter().zip(&m.conf) {
                let w = if class > 0 { 1.0 } else { 0.0 };
                loc_t.extend_from_slice(offsets);
                pos_mask.extend_from_slice(&[w; 4]);
                conf_t.push(class as i64);
            }
        }

        // Localization
        let loc_t = Tensor::<B, 3>::from_data(
            TensorData::new(loc_t, [batch, num_priors, 4]),
            &device,
        );
        let pos_mask = Tensor::<B, 3>::from_data(
            TensorData::new(pos_mask, [batch, num_priors, 4]),
            &device,
        );
        let loss_l = (smooth_l1(loc - loc_t) * pos_mask).sum();

        // Confidence
        let labels = Tensor::<B, 3, Int>::from_data(
            TensorData::new(conf_t, [batch, num_priors, 1]),
            &device,
        );
        let per_prior = log_softmax(conf, 2).gather(2, labels).neg();

        let ranking = per_prior
            .clone()
            .detach()
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .unwrap_or_default();
        let mut selected = Vec::with_capacity(batch * num_priors);
        for (b, m) in matched.iter().enumerate() {
            let scores = ranking
                .get(b * num_priors..(b + 1) * num_priors)
                .unwrap_or(&[]);
            let negatives = hard_negatives(scores, &m.conf, self.neg_pos_ratio);
            selected.extend(
                m.conf
                    .iter()
                    .zip(negatives)
                    .map(|(&c, neg)| if c > 0 || neg { 1.0f32 } else { 0.0 }),
            );
        }
        let selected = Tensor::<B, 3>::from_data(
            TensorData::new(selected, [batch, num_priors, 1]),
            &device,
        );
        let loss_c = (per_prior * selected).sum();

        (loss_l / normalizer, loss_c / normalizer)
    }
}

/// `0.5 x^2` inside `|x| < 1`, `|x| - 0.5` outside.
fn smooth_l1<B: Backend, const D: usize>(diff: Tensor<B, D>) -> Tensor<B, D> {
    let abs = diff.abs();
    let quad = abs.clone().clamp_max(1.0);
    quad.clone().powf_scalar(2.0).mul_scalar(0.5) + (abs - quad)
}

/// Picks the background priors with the highest confidence loss, at most
/// `ratio` per positive and never more than `P - 1`.
pub fn hard_negatives(scores: &[f32], conf_t: &[usize], ratio: usize) -> Vec<bool> {
    let num_priors = conf_t.len();
    let num_pos = conf_t.iter().filter(|&&c| c > 0).count();
    let num_neg = (ratio * num_pos).min(num_priors.saturating_sub(1));

    let mut order: Vec<usize> = (0..num_priors).collect();
    let key = |i: usize| {
        if conf_t[i] > 0 {
            0.0
        } else {
            scores.get(i).copied().unwrap_or(0.0)
        }
    };
    order.sort_by(|&a, &b| key(b).total_cmp(&key(a)));

    let mut negatives = vec![false; num_priors];
    for &i in order.iter().take(num_neg) {
        negatives[i] = true;
    }
    negatives
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::box_utils::encode;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn priors() -> Vec<[f32; 4]> {
        vec![
            [0.25, 0.25, 0.5, 0.5],
            [0.75, 0.25, 0.5, 0.5],
            [0.25, 0.75, 0.5, 0.5],
            [0.75, 0.75, 0.5, 0.5],
        ]
    }

    fn truth() -> BoxLabel {
        BoxLabel {
            xmin: 0.05,
            ymin: 0.0,
            xmax: 0.5,
            ymax: 0.45,
            label: 1,
        }
    }

    #[test]
    fn hard_negative_ratio() {
        let conf_t = vec![1, 0, 0, 0, 0, 0, 0, 0];
        let scores = vec![9.0, 0.1, 0.8, 0.3, 0.7, 0.2, 0.05, 0.6];
        let neg = hard_negatives(&scores, &conf_t, 3);
        assert_eq!(neg.iter().filter(|&&n| n).count(), 3);
        assert!(!neg[0]);
        assert!(neg[2] && neg[4] && neg[7]);
    }

    #[test]
    fn hard_negatives_capped_below_prior_count() {
        let conf_t = vec![1, 2, 0, 0];
        let neg = hard_negatives(&[5.0, 5.0, 0.4, 0.2], &conf_t, 3);
        assert_eq!(neg.iter().filter(|&&n| n).count(), 3);
        assert!(neg[2] && neg[3]);
        assert!(hard_negatives(&[0.5; 4], &[0; 4], 3).iter().all(|&n| !n));
    }

    #[test]
    fn confident_correct_prediction_has_small_loss() {
        let device = Default::default();
        let priors = priors();
        let loss = MultiBoxLoss::new(3, [0.1, 0.2]);

        let mut loc = vec![0.0f32; 16];
        loc[..4].copy_from_slice(&encode(&truth().corners(), &priors[0], loss.variance));
        let mut conf = vec![0.0f32; 12];
        for p in 0..4 {
            let class = if p == 0 { 2 } else { 0 };
            conf[p * 3 + class] = 20.0;
        }

        let loc = Tensor::<TestBackend, 3>::from_data(TensorData::new(loc, [1, 4, 4]), &device);
        let conf = Tensor::<TestBackend, 3>::from_data(TensorData::new(conf, [1, 4, 3]), &device);
        let (loss_l, loss_c) = loss.forward(loc, conf, &[vec![truth()]], &priors);

        assert!(loss_l.into_scalar() < 1e-4);
        assert!(loss_c.into_scalar() < 1e-4);
    }

    #[test]
    fn wrong_prediction_is_penalized() {
        let device = Default::default();
        let priors = priors();
        let loss = MultiBoxLoss::new(3, [0.1, 0.2]);

        let loc = Tensor::<TestBackend, 3>::ones([1, 4, 4], &device);
        let conf = Tensor::<TestBackend, 3>::zeros([1, 4, 3], &device);
        let (loss_l, loss_c) = loss.forward(loc, conf, &[vec![truth()]], &priors);

        // Uniform logits over three classes: ln 3 for the positive and each
        // of the three mined negatives, divided by one positive.
        let expected_c = 4.0 * 3f32.ln();
        assert!((loss_c.into_scalar() - expected_c).abs() < 1e-4);
        assert!(loss_l.into_scalar() > 0.0);
    }

    #[test]
    fn no_truths_gives_zero_loss() {
        let device = Default::default();
        let priors = priors();
        let loss = MultiBoxLoss::new(3, [0.1, 0.2]);

        let loc = Tensor::<TestBackend, 3>::ones([2, 4, 4], &device);
        let conf = Tensor::<TestBackend, 3>::zeros([2, 4, 3], &device);
        let (loss_l, loss_c) = loss.forward(loc, conf, &[vec![], vec![]], &priors);
        assert_eq!(loss_l.into_scalar(), 0.0);
        assert_eq!(loss_c.into_scalar(), 0.0);
    }
}
