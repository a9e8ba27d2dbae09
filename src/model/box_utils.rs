//! Prior matching and offset encoding, done on the host before the loss
//! graph is built.

use crate::data::BoxLabel;

/// `[cx, cy, w, h]` -> `[xmin, ymin, xmax, ymax]`.
pub fn point_form(prior: &[f32; 4]) -> [f32; 4] {
    [
        prior[0] - prior[2] / 2.0,
        prior[1] - prior[3] / 2.0,
        prior[0] + prior[2] / 2.0,
        prior[1] + prior[3] / 2.0,
    ]
}

pub fn jaccard(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let iw = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let ih = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = iw * ih;
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Offsets of a matched ground-truth box relative to its prior, scaled by
/// the variances.
pub fn encode(matched: &[f32; 4], prior: &[f32; 4], variance: [f32; 2]) -> [f32; 4] {
    let cx = ((matched[0] + matched[2]) / 2.0 - prior[0]) / (variance[0] * prior[2]);
    let cy = ((matched[1] + matched[3]) / 2.0 - prior[1]) / (variance[0] * prior[3]);
    let w = ((matched[2] - matched[0]) / prior[2]).ln() / variance[1];
    let h = ((matched[3] - matched[1]) / prior[3]).ln() / variance[1];
    [cx, cy, w, h]
}

pub fn decode(loc: &[f32; 4], prior: &[f32; 4], variance: [f32; 2]) -> [f32; 4] {
    let cx = prior[0] + loc[0] * variance[0] * prior[2];
    let cy = prior[1] + loc[1] * variance[0] * prior[3];
    let w = prior[2] * (loc[2] * variance[1]).exp();
    let h = prior[3] * (loc[3] * variance[1]).exp();
    [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
}

/// Per-prior training targets for one image.
#[derive(Debug, Clone)]
pub struct MatchedTargets {
    /// Encoded offsets, zero for background priors.
    pub loc: Vec<[f32; 4]>,
    /// Class per prior, 0 = background, otherwise `label + 1`.
    pub conf: Vec<usize>,
}

impl MatchedTargets {
    pub fn num_positive(&self) -> usize {
        self.conf.iter().filter(|&&c| c > 0).count()
    }
}

/// Assigns each prior the ground truth it overlaps most, keeping only
/// overlaps at or above `threshold`. Every truth additionally claims its
/// single best prior regardless of the threshold.
pub fn match_priors(
    threshold: f32,
    truths: &[BoxLabel],
    priors: &[[f32; 4]],
    variance: [f32; 2],
) -> MatchedTargets {
    let num_priors = priors.len();
    if truths.is_empty() {
        return MatchedTargets {
            loc: vec![[0.0; 4]; num_priors],
            conf: vec![0; num_priors],
        };
    }

    let corners: Vec<[f32; 4]> = priors.iter().map(point_form).collect();
    let mut best_truth_overlap = vec![-1.0f32; num_priors];
    let mut best_truth_idx = vec![0usize; num_priors];
    let mut best_prior_idx = vec![0usize; truths.len()];

    for (t, truth) in truths.iter().enumerate() {
        let truth_corners = truth.corners();
        let mut best = -1.0f32;
        for (p, prior) in corners.iter().enumerate() {
            let overlap = jaccard(&truth_corners, prior);
            if overlap > best_truth_overlap[p] {
                best_truth_overlap[p] = overlap;
                best_truth_idx[p] = t;
            }
            if overlap > best {
                best = overlap;
                best_prior_idx[t] = p;
            }
        }
    }

    for (t, &p) in best_prior_idx.iter().enumerate() {
        best_truth_overlap[p] = 2.0;
        best_truth_idx[p] = t;
    }

    let mut loc = Vec::with_capacity(num_priors);
    let mut conf = Vec::with_capacity(num_priors);
    for p in 0..num_priors {
        let truth = &truths[best_truth_idx[p]];
        if best_truth_overlap[p] < threshold {
            loc.push([0.0; 4]);
            conf.push(0);
        } else {
            loc.push(encode(&truth.corners(), &priors[p], variance));
            conf.push(truth.label + 1);
        }
    }
    MatchedTargets { loc, conf }
}
