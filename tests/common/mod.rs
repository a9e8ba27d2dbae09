#![allow(dead_code)]

use burn::module::{Module, ModuleVisitor, ParamId};
use burn::prelude::*;
use image::RgbImage;
use std::fs;
use std::path::Path;

/// Writes a tiny VOC2007 tree under `root`. `objects` holds per-image
/// `(class, difficult, [xmin, ymin, xmax, ymax])` in 1-based pixels.
pub fn write_voc(root: &Path, set: &str, images: &[(&str, &[(&str, u8, [u32; 4])])]) {
    let year = root.join("VOC2007");
    let annotations = year.join("Annotations");
    let jpegs = year.join("JPEGImages");
    let lists = year.join("ImageSets").join("Main");
    for dir in [&annotations, &jpegs, &lists] {
        fs::create_dir_all(dir).unwrap();
    }

    let mut ids = String::new();
    for (id, objects) in images {
        let img =
            RgbImage::from_fn(64, 48, |x, y| image::Rgb([(x * 4) as u8, (y * 5) as u8, 90]));
        img.save(jpegs.join(format!("{id}.jpg"))).unwrap();

        let mut xml = String::from(
            "<annotation><size><width>64</width><height>48</height><depth>3</depth></size>",
        );
        for (name, difficult, [xmin, ymin, xmax, ymax]) in objects.iter() {
            xml.push_str(&format!(
                "<object><name>{name}</name><difficult>{difficult}</difficult>\
                 <bndbox><xmin>{xmin}</xmin><ymin>{ymin}</ymin>\
                 <xmax>{xmax}</xmax><ymax>{ymax}</ymax></bndbox></object>"
            ));
        }
        xml.push_str("</annotation>");
        fs::write(annotations.join(format!("{id}.xml")), xml).unwrap();

        ids.push_str(id);
        ids.push('\n');
    }
    fs::write(lists.join(format!("{set}.txt")), ids).unwrap();
}

/// Two trainable images with one dog and one cat.
pub fn write_small_voc(root: &Path) {
    write_voc(
        root,
        "trainval",
        &[
            ("000001", &[("dog", 0, [9, 9, 41, 33])]),
            ("000002", &[("cat", 0, [17, 5, 60, 44])]),
        ],
    );
}

/// Three trainable images.
pub fn write_three_image_voc(root: &Path) {
    write_voc(
        root,
        "trainval",
        &[
            ("000001", &[("dog", 0, [9, 9, 41, 33])]),
            ("000002", &[("cat", 0, [17, 5, 60, 44])]),
            ("000003", &[("person", 0, [2, 3, 30, 46])]),
        ],
    );
}

/// Sum of every float parameter tensor, in visiting order. Cheap enough to
/// compare whole models before and after an update.
#[derive(Default)]
pub struct ParamSums(pub Vec<f64>);

impl<B: Backend> ModuleVisitor<B> for ParamSums {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.0.push(tensor.clone().sum().into_scalar().elem::<f64>());
    }
}

pub fn param_sums<B: Backend, M: Module<B>>(module: &M) -> Vec<f64> {
    let mut sums = ParamSums::default();
    module.visit(&mut sums);
    sums.0
}
