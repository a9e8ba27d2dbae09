//! Train-time augmentation for SSD.
//!
//! Images travel through the pipeline as `Rgb32FImage` in `[0, 1]` with
//! boxes in absolute pixel corners; the final step scales back to `[0, 255]`,
//! subtracts the channel means and lays the result out as CHW.

use image::imageops::{self, FilterType};
use image::{Rgb, Rgb32FImage, RgbImage};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::data::dataset::BoxLabel;

const CROP_TRIALS: usize = 50;
const CROP_MODES: [Option<f32>; 6] = [
    None,
    Some(0.1),
    Some(0.3),
    Some(0.7),
    Some(0.9),
    Some(f32::NEG_INFINITY),
];

#[derive(Debug, Clone)]
pub struct AugmentedSample {
    /// `[3, size, size]` in CHW order, mean-subtracted.
    pub pixels: Vec<f32>,
    pub boxes: Vec<BoxLabel>,
}

#[derive(Debug, Clone)]
pub struct SsdAugmentation {
    pub size: u32,
    pub means: [f32; 3],
    pub enable: bool,
}

#[derive(Debug, Clone, Copy)]
struct PixelBox {
    corners: [f32; 4],
    label: usize,
}

impl SsdAugmentation {
    pub fn new(size: u32, means: [f32; 3]) -> Self {
        Self {
            size,
            means,
            enable: true,
        }
    }

    /// Resize and mean subtraction only.
    pub fn base(size: u32, means: [f32; 3]) -> Self {
        Self {
            enable: false,
            ..Self::new(size, means)
        }
    }

    pub fn apply<R: Rng + ?Sized>(
        &self,
        img: &RgbImage,
        boxes: &[BoxLabel],
        rng: &mut R,
    ) -> AugmentedSample {
        let mut img = to_float(img);
        let (w, h) = (img.width() as f32, img.height() as f32);
        let mut boxes: Vec<PixelBox> = boxes
            .iter()
            .map(|b| PixelBox {
                corners: [b.xmin * w, b.ymin * h, b.xmax * w, b.ymax * h],
                label: b.label,
            })
            .collect();

        if self.enable {
            photometric_distort(&mut img, rng);
            let mean = Rgb(self.means.map(|m| m / 255.0));
            (img, boxes) = expand(img, boxes, mean, rng);
            (img, boxes) = random_sample_crop(img, boxes, rng);
            (img, boxes) = random_mirror(img, boxes, rng);
        }

        let (w, h) = (img.width() as f32, img.height() as f32);
        let boxes = boxes
            .into_iter()
            .map(|b| BoxLabel {
                xmin: b.corners[0] / w,
                ymin: b.corners[1] / h,
                xmax: b.corners[2] / w,
                ymax: b.corners[3] / h,
                label: b.label,
            })
            .collect();

        let resized = imageops::resize(&img, self.size, self.size, FilterType::Triangle);
        AugmentedSample {
            pixels: to_chw(&resized, self.means),
            boxes,
        }
    }
}

fn to_float(img: &RgbImage) -> Rgb32FImage {
    Rgb32FImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        Rgb([
            p[0] as f32 / 255.0,
            p[1] as f32 / 255.0,
            p[2] as f32 / 255.0,
        ])
    })
}

fn to_chw(img: &Rgb32FImage, means: [f32; 3]) -> Vec<f32> {
    let plane = (img.width() * img.height()) as usize;
    let mut out = vec![0.0f32; plane * 3];
    for (idx, pixel) in img.pixels().enumerate() {
        for c in 0..3 {
            out[c * plane + idx] = pixel[c] * 255.0 - means[c];
        }
    }
    out
}

fn photometric_distort<R: Rng + ?Sized>(img: &mut Rgb32FImage, rng: &mut R) {
    if rng.gen_bool(0.5) {
        let delta = rng.gen_range(-32.0f32..32.0) / 255.0;
        map_pixels(img, |c| c + delta);
    }

    let contrast_first = rng.gen_bool(0.5);
    if contrast_first {
        random_contrast(img, rng);
    }
    if rng.gen_bool(0.5) {
        let factor = rng.gen_range(0.5f32..1.5);
        for pixel in img.pixels_mut() {
            let gray = 0.299 * pixel[0] + 0.587 * pixel[1] + 0.114 * pixel[2];
            for c in 0..3 {
                pixel[c] = gray + (pixel[c] - gray) * factor;
            }
        }
    }
    if !contrast_first {
        random_contrast(img, rng);
    }

    if rng.gen_bool(0.5) {
        let mut order = [0usize, 1, 2];
        order.shuffle(rng);
        for pixel in img.pixels_mut() {
            let src = pixel.0;
            pixel.0 = [src[order[0]], src[order[1]], src[order[2]]];
        }
    }

    map_pixels(img, |c| c.clamp(0.0, 1.0));
}

fn random_contrast<R: Rng + ?Sized>(img: &mut Rgb32FImage, rng: &mut R) {
    if rng.gen_bool(0.5) {
        let alpha = rng.gen_range(0.5f32..1.5);
        map_pixels(img, |c| c * alpha);
    }
}

fn map_pixels(img: &mut Rgb32FImage, f: impl Fn(f32) -> f32) {
    for pixel in img.pixels_mut() {
        pixel.0 = pixel.0.map(&f);
    }
}

/// Zoom out: place the image on a mean-filled canvas up to 4x larger.
fn expand<R: Rng + ?Sized>(
    img: Rgb32FImage,
    boxes: Vec<PixelBox>,
    mean: Rgb<f32>,
    rng: &mut R,
) -> (Rgb32FImage, Vec<PixelBox>) {
    if rng.gen_bool(0.5) {
        return (img, boxes);
    }
    let (w, h) = (img.width() as f32, img.height() as f32);
    let ratio = rng.gen_range(1.0f32..4.0);
    let left = rng.gen_range(0.0..=(w * ratio - w)).floor();
    let top = rng.gen_range(0.0..=(h * ratio - h)).floor();

    let mut canvas = Rgb32FImage::from_pixel((w * ratio) as u32, (h * ratio) as u32, mean);
    imageops::replace(&mut canvas, &img, left as i64, top as i64);

    let boxes = boxes
        .into_iter()
        .map(|mut b| {
            b.corners[0] += left;
            b.corners[1] += top;
            b.corners[2] += left;
            b.corners[3] += top;
            b
        })
        .collect();
    (canvas, boxes)
}

/// Crops a patch whose IoU with every box clears the sampled minimum and
/// keeps the boxes whose centers fall inside it.
fn random_sample_crop<R: Rng + ?Sized>(
    img: Rgb32FImage,
    boxes: Vec<PixelBox>,
    rng: &mut R,
) -> (Rgb32FImage, Vec<PixelBox>) {
    if boxes.is_empty() {
        return (img, boxes);
    }
    let (w, h) = (img.width() as f32, img.height() as f32);

    for _ in 0..CROP_TRIALS {
        let Some(min_iou) = *CROP_MODES.choose(rng).unwrap_or(&None) else {
            return (img, boxes);
        };

        for _ in 0..CROP_TRIALS {
            let cw = rng.gen_range((0.3 * w)..=w).floor().max(1.0);
            let ch = rng.gen_range((0.3 * h)..=h).floor().max(1.0);
            if ch / cw < 0.5 || ch / cw > 2.0 {
                continue;
            }
            let left = rng.gen_range(0.0..=(w - cw)).floor();
            let top = rng.gen_range(0.0..=(h - ch)).floor();
            let rect = [left, top, left + cw, top + ch];

            let min_overlap = boxes
                .iter()
                .map(|b| iou(&b.corners, &rect))
                .fold(f32::INFINITY, f32::min);
            if min_overlap < min_iou {
                continue;
            }

            let kept: Vec<PixelBox> = boxes
                .iter()
                .filter(|b| {
                    let cx = (b.corners[0] + b.corners[2]) / 2.0;
                    let cy = (b.corners[1] + b.corners[3]) / 2.0;
                    rect[0] < cx && cx < rect[2] && rect[1] < cy && cy < rect[3]
                })
                .map(|b| PixelBox {
                    corners: [
                        b.corners[0].max(rect[0]) - rect[0],
                        b.corners[1].max(rect[1]) - rect[1],
                        b.corners[2].min(rect[2]) - rect[0],
                        b.corners[3].min(rect[3]) - rect[1],
                    ],
                    label: b.label,
                })
                .collect();
            if kept.is_empty() {
                continue;
            }

            let cropped =
                imageops::crop_imm(&img, left as u32, top as u32, cw as u32, ch as u32).to_image();
            return (cropped, kept);
        }
    }
    (img, boxes)
}

fn random_mirror<R: Rng + ?Sized>(
    img: Rgb32FImage,
    boxes: Vec<PixelBox>,
    rng: &mut R,
) -> (Rgb32FImage, Vec<PixelBox>) {
    if !rng.gen_bool(0.5) {
        return (img, boxes);
    }
    let w = img.width() as f32;
    let boxes = boxes
        .into_iter()
        .map(|mut b| {
            let (x0, x1) = (b.corners[0], b.corners[2]);
            b.corners[0] = w - x1;
            b.corners[2] = w - x0;
            b
        })
        .collect();
    (imageops::flip_horizontal(&img), boxes)
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let iw = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let ih = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = iw * ih;
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    inter / (area_a + area_b - inter).max(1e-6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn checker(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgb([200, 100, 50])
            } else {
                image::Rgb([10, 20, 30])
            }
        })
    }

    fn boxes() -> Vec<BoxLabel> {
        vec![BoxLabel {
            xmin: 0.25,
            ymin: 0.25,
            xmax: 0.75,
            ymax: 0.75,
            label: 3,
        }]
    }

    #[test]
    fn base_transform_is_deterministic() {
        let aug = SsdAugmentation::base(8, [0.0, 0.0, 0.0]);
        let img = RgbImage::from_pixel(16, 16, image::Rgb([255, 128, 0]));
        let mut rng = StdRng::seed_from_u64(0);
        let out = aug.apply(&img, &boxes(), &mut rng);
        assert_eq!(out.pixels.len(), 3 * 8 * 8);
        assert!((out.pixels[0] - 255.0).abs() < 1e-3);
        assert!((out.pixels[64] - 128.0).abs() < 1e-3);
        assert!(out.pixels[128].abs() < 1e-3);
        assert_eq!(out.boxes, boxes());
    }

    #[test]
    fn augmented_boxes_stay_normalized() {
        let aug = SsdAugmentation::new(32, crate::data::MEANS);
        let img = checker(40, 30);
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let out = aug.apply(&img, &boxes(), &mut rng);
            assert_eq!(out.pixels.len(), 3 * 32 * 32);
            assert!(!out.boxes.is_empty());
            for b in &out.boxes {
                assert!(b.xmin >= 0.0 && b.xmax <= 1.0 + 1e-5, "seed {seed}: {b:?}");
                assert!(b.ymin >= 0.0 && b.ymax <= 1.0 + 1e-5, "seed {seed}: {b:?}");
                assert!(b.xmin < b.xmax && b.ymin < b.ymax);
                assert_eq!(b.label, 3);
            }
        }
    }

    #[test]
    fn mirror_flips_box_coordinates() {
        let img = Rgb32FImage::new(10, 4);
        let boxes = vec![PixelBox {
            corners: [1.0, 0.0, 4.0, 2.0],
            label: 0,
        }];
        // Find a seed whose first draw mirrors.
        let (_, flipped) = (0..32)
            .map(|s| random_mirror(img.clone(), boxes.clone(), &mut StdRng::seed_from_u64(s)))
            .find(|(_, b)| b[0].corners[0] != 1.0)
            .unwrap();
        assert_eq!(flipped[0].corners, [6.0, 0.0, 9.0, 2.0]);
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = [0.0, 0.0, 2.0, 2.0];
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &[3.0, 3.0, 4.0, 4.0]), 0.0);
    }
}
