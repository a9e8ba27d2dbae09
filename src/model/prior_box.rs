use crate::data::SsdConfig;

/// Default boxes in center form `[cx, cy, w, h]`, normalized to the image.
#[derive(Debug, Clone)]
pub struct PriorBox {
    priors: Vec<[f32; 4]>,
}

impl PriorBox {
    pub fn new(cfg: &SsdConfig) -> Self {
        let image_size = cfg.min_dim as f32;
        let mut priors = Vec::new();

        for (k, &f) in cfg.feature_maps.iter().enumerate() {
            let f_k = image_size / cfg.steps[k] as f32;
            let s_k = cfg.min_sizes[k] as f32 / image_size;
            let s_k_prime = (s_k * (cfg.max_sizes[k] as f32 / image_size)).sqrt();

            for i in 0..f {
                for j in 0..f {
                    let cx = (j as f32 + 0.5) / f_k;
                    let cy = (i as f32 + 0.5) / f_k;

                    priors.push([cx, cy, s_k, s_k]);
                    priors.push([cx, cy, s_k_prime, s_k_prime]);
                    for &ar in &cfg.aspect_ratios[k] {
                        let r = (ar as f32).sqrt();
                        priors.push([cx, cy, s_k * r, s_k / r]);
                        priors.push([cx, cy, s_k / r, s_k * r]);
                    }
                }
            }
        }

        if cfg.clip {
            for prior in &mut priors {
                for v in prior.iter_mut() {
                    *v = v.clamp(0.0, 1.0);
                }
            }
        }
        Self { priors }
    }

    pub fn len(&self) -> usize {
        self.priors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priors.is_empty()
    }

    pub fn as_slice(&self) -> &[[f32; 4]] {
        &self.priors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssd300_has_8732_priors() {
        let priors = PriorBox::new(&SsdConfig::voc());
        assert_eq!(priors.len(), 8732);
        assert_eq!(PriorBox::new(&SsdConfig::coco()).len(), 8732);
    }

    #[test]
    fn first_cell_layout() {
        let cfg = SsdConfig::voc();
        let priors = PriorBox::new(&cfg);
        let p = priors.as_slice();
        let cx = 0.5 / (300.0 / 8.0);
        assert!((p[0][0] - cx).abs() < 1e-6);
        assert!((p[0][2] - 0.1).abs() < 1e-6);
        assert!((p[1][2] - (0.1f32 * 0.2).sqrt()).abs() < 1e-6);
        assert!((p[2][2] - 0.1 * 2f32.sqrt()).abs() < 1e-6);
        assert!((p[3][3] - 0.1 * 2f32.sqrt()).abs() < 1e-6);
        // Second cell moves along x first.
        assert!(p[4][0] > p[0][0]);
        assert_eq!(p[4][1], p[0][1]);
    }

    #[test]
    fn clipped_to_unit_square() {
        let priors = PriorBox::new(&SsdConfig::voc());
        assert!(priors
            .as_slice()
            .iter()
            .all(|p| p.iter().all(|v| (0.0..=1.0).contains(v))));
    }
}
