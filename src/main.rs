use anyhow::{Context, Result};
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::tensor::backend::AutodiffBackend;
use clap::Parser;

use ssd_detection::cli::{open_dataset, TrainArgs};
use ssd_detection::{DetectionDataset, Trainer, TrainingConfig};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = TrainArgs::parse();
    let mut config = args.into_config().context("failed to build training config")?;

    std::fs::create_dir_all(&config.save_folder).with_context(|| {
        format!("failed to create save folder {}", config.save_folder.display())
    })?;

    let dataset = open_dataset(&mut config).context("failed to load dataset")?;
    log::info!("Dataset {}: {} images", dataset.name(), dataset.len());

    #[cfg(feature = "backend-wgpu")]
    {
        use burn::backend::wgpu::{Wgpu, WgpuDevice};
        if config.cuda {
            return train::<Autodiff<Wgpu>>(config, dataset, WgpuDevice::default());
        }
        log::warn!("A GPU backend is compiled in but --cuda is false; training on the CPU");
    }
    #[cfg(not(feature = "backend-wgpu"))]
    {
        if config.cuda {
            log::warn!(
                "--cuda requested but no GPU backend is compiled in; \
                 rebuild with --features backend-wgpu. Training on the CPU"
            );
        }
    }

    train::<Autodiff<NdArray>>(config, dataset, NdArrayDevice::default())
}

fn train<B: AutodiffBackend>(
    config: TrainingConfig,
    dataset: DetectionDataset,
    device: B::Device,
) -> Result<()> {
    let save_folder = config.save_folder.clone();
    let mut trainer = Trainer::<B>::new(config, device).context("failed to build trainer")?;
    let summary = trainer.train(dataset).context("training failed")?;

    log::info!(
        "Training completed after {} iterations ({} skipped)",
        summary.iterations,
        summary.skipped
    );
    log::info!("Final weights: {}", summary.final_checkpoint.display());
    log::info!("Checkpoints saved in: {}", save_folder.display());
    Ok(())
}
