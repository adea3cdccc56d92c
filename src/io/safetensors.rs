use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::model::GPT;
use crate::tokenizer::GPT2Tokenizer;

/// Save a complete model folder: weights, tokenizer, and config
pub fn save_model_folder<P: AsRef<Path>>(
    varmap: &VarMap,
    tokenizer: &GPT2Tokenizer,
    config: &Config,
    folder_path: P,
) -> Result<()> {
    let folder_path = folder_path.as_ref();

    fs::create_dir_all(folder_path)
        .with_context(|| format!("Failed to create model directory: {}", folder_path.display()))?;

    // Save model weights
    let model_path = folder_path.join("model.safetensors");
    varmap
        .save(&model_path)
        .context("Failed to save model weights")?;

    // Save tokenizer
    tokenizer
        .save_pretrained(folder_path)
        .context("Failed to save tokenizer")?;

    // Save config
    let config_path = folder_path.join("config.json");
    let config_json =
        serde_json::to_string_pretty(config).context("Failed to serialize config to JSON")?;
    fs::write(&config_path, config_json)
        .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

    log::info!("Model folder saved to: {}", folder_path.display());
    Ok(())
}

/// Load a complete model folder
pub fn load_model_folder<P: AsRef<Path>>(
    folder_path: P,
    device: &Device,
) -> Result<(GPT, GPT2Tokenizer, Config)> {
    let folder_path = folder_path.as_ref();

    // Load config
    let config_path = folder_path.join("config.json");
    let config_json = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
    let mut config: Config =
        serde_json::from_str(&config_json).context("Failed to parse config JSON")?;
    config.device = Some(device.clone());

    // Load model weights
    let model_path = folder_path.join("model.safetensors");
    let tensors = candle_core::safetensors::load(&model_path, device)
        .with_context(|| format!("Failed to read model file: {}", model_path.display()))?;
    let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
    let model = GPT::new(&config, vb).context("Failed to build model from saved weights")?;

    // Load tokenizer
    let tokenizer =
        GPT2Tokenizer::from_pretrained(folder_path).context("Failed to load tokenizer")?;

    log::info!("Model folder loaded from: {}", folder_path.display());
    Ok((model, tokenizer, config))
}
