use burn::prelude::*;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SsdError};
use crate::model::{Ssd, Vgg};

/// JSON sidecar written next to every weights file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub model_type: String,
    pub dataset: String,
    pub num_classes: usize,
    pub min_dim: usize,
    pub iteration: usize,
    pub checkpoint_name: String,
}

fn recorder() -> BinFileRecorder<FullPrecisionSettings> {
    BinFileRecorder::<FullPrecisionSettings>::new()
}

/// Path of the weights file for `stem` inside `dir`.
pub fn weights_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}.bin"))
}

/// Writes `<dir>/<stem>.bin` and `<dir>/<stem>.json`, replacing any
/// previous files of the same name. Returns the weights path.
pub fn save<B: Backend>(model: &Ssd<B>, dir: &Path, meta: &CheckpointMeta) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| SsdError::io(dir, e))?;

    let stem = meta.checkpoint_name.as_str();
    let path = weights_path(dir, stem);
    model
        .clone()
        .save_file(dir.join(stem), &recorder())
        .map_err(|e| SsdError::Checkpoint {
            path: path.clone(),
            reason: format!("{e:?}"),
        })?;

    let meta_path = dir.join(format!("{stem}.json"));
    let json = serde_json::to_string_pretty(meta).map_err(|source| SsdError::Json {
        path: meta_path.clone(),
        source,
    })?;
    std::fs::write(&meta_path, json).map_err(|e| SsdError::io(&meta_path, e))?;

    log::info!("Checkpoint saved: {} ({})", path.display(), meta_path.display());
    Ok(path)
}

pub fn read_meta(path: &Path) -> Result<CheckpointMeta> {
    let meta_path = path.with_extension("json");
    let content = std::fs::read_to_string(&meta_path).map_err(|e| SsdError::io(&meta_path, e))?;
    serde_json::from_str(&content).map_err(|source| SsdError::Json {
        path: meta_path,
        source,
    })
}

/// Loads full-model weights written by [`save`].
pub fn load<B: Backend>(model: Ssd<B>, path: &Path, device: &B::Device) -> Result<Ssd<B>> {
    model
        .load_file(path.to_path_buf(), &recorder(), device)
        .map_err(|e| SsdError::Checkpoint {
            path: path.to_path_buf(),
            reason: format!("{e:?}"),
        })
}

/// Replaces only the VGG trunk with pretrained weights.
pub fn load_basenet<B: Backend>(
    mut model: Ssd<B>,
    path: &Path,
    device: &B::Device,
) -> Result<Ssd<B>> {
    if !path.exists() {
        return Err(SsdError::Checkpoint {
            path: path.to_path_buf(),
            reason: "base network not found".to_string(),
        });
    }
    model.vgg = model
        .vgg
        .load_file(path.to_path_buf(), &recorder(), device)
        .map_err(|e| SsdError::Checkpoint {
            path: path.to_path_buf(),
            reason: format!("{e:?}"),
        })?;
    Ok(model)
}

/// Writes just the VGG trunk, in the format [`load_basenet`] reads.
pub fn save_basenet<B: Backend>(vgg: &Vgg<B>, path: &Path) -> Result<()> {
    vgg.clone()
        .save_file(path.to_path_buf(), &recorder())
        .map_err(|e| SsdError::Checkpoint {
            path: path.to_path_buf(),
            reason: format!("{e:?}"),
        })
}
