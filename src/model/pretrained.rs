use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use hf_hub::api::sync::Api;
use std::collections::HashMap;

use crate::config::{Config, Gpt2Size};
use crate::model::GPT;
use crate::tokenizer::GPT2Tokenizer;

/// Weight matrices stored in Conv1D layout by the OpenAI checkpoints.
/// HF keeps them as (in_features, out_features); candle's Linear expects
/// (out_features, in_features).
const TRANSPOSED_WEIGHTS: [&str; 4] = [
    "attn.c_attn.weight",
    "attn.c_proj.weight",
    "mlp.c_fc.weight",
    "mlp.c_proj.weight",
];

/// Load a pretrained GPT-2 checkpoint from the Hugging Face hub
///
/// Downloads `model.safetensors` and `tokenizer.json` (cached after the
/// first run), remaps the weights to this crate's layout, and builds the
/// model with the architecture table for the requested size.
pub fn from_hub(size: Gpt2Size, device: &Device) -> Result<(GPT, GPT2Tokenizer, Config)> {
    log::info!("Fetching {} from the hub ({})", size, size.repo_id());

    let api = Api::new().context("Failed to initialize hub API")?;
    let repo = api.model(size.repo_id().to_string());

    let weights_path = repo
        .get("model.safetensors")
        .with_context(|| format!("Failed to download weights for {}", size))?;
    let tokenizer_path = repo
        .get("tokenizer.json")
        .with_context(|| format!("Failed to download tokenizer for {}", size))?;

    log::info!("Loading weights from {}", weights_path.display());
    let mut tensors = candle_core::safetensors::load(&weights_path, device)
        .context("Failed to load safetensors checkpoint")?;
    adapt_gpt2_weights(&mut tensors)?;

    let mut config = Config::gpt2(size);
    config.device = Some(device.clone());

    // VarBuilder checks every tensor shape against the architecture table,
    // so a mismatched checkpoint fails here rather than at forward time
    let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
    let model = GPT::new(&config, vb).context("Failed to build model from checkpoint")?;

    let tokenizer = GPT2Tokenizer::from_file(&tokenizer_path)
        .context("Failed to load pretrained tokenizer")?;

    log::info!(
        "Loaded {} ({:.0}M parameters)",
        size,
        config.param_count_millions()
    );

    Ok((model, tokenizer, config))
}

/// Remap a raw GPT-2 checkpoint into this crate's parameter layout
///
/// Drops the causal-mask buffers that ship with the checkpoint and
/// transposes the Conv1D-layout weight matrices.
pub(crate) fn adapt_gpt2_weights(
    tensors: &mut HashMap<String, Tensor>,
) -> candle_core::Result<()> {
    // The mask buffers are recomputed at model build time
    tensors.retain(|name, _| {
        !name.ends_with(".attn.bias") && !name.ends_with(".attn.masked_bias")
    });

    let to_transpose: Vec<String> = tensors
        .keys()
        .filter(|name| TRANSPOSED_WEIGHTS.iter().any(|s| name.ends_with(s)))
        .cloned()
        .collect();

    for name in to_transpose {
        if let Some(tensor) = tensors.remove(&name) {
            tensors.insert(name, tensor.t()?.contiguous()?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn tensor_map() -> HashMap<String, Tensor> {
        let device = Device::Cpu;
        let mut tensors = HashMap::new();
        tensors.insert(
            "wte.weight".to_string(),
            Tensor::zeros((8, 4), DType::F32, &device).unwrap(),
        );
        tensors.insert(
            "h.0.attn.c_attn.weight".to_string(),
            Tensor::zeros((4, 12), DType::F32, &device).unwrap(),
        );
        tensors.insert(
            "h.0.attn.c_attn.bias".to_string(),
            Tensor::zeros(12, DType::F32, &device).unwrap(),
        );
        tensors.insert(
            "h.0.mlp.c_fc.weight".to_string(),
            Tensor::zeros((4, 16), DType::F32, &device).unwrap(),
        );
        tensors.insert(
            "h.0.attn.bias".to_string(),
            Tensor::zeros((1, 1, 8, 8), DType::F32, &device).unwrap(),
        );
        tensors
    }

    #[test]
    fn test_mask_buffers_dropped() {
        let mut tensors = tensor_map();
        adapt_gpt2_weights(&mut tensors).unwrap();
        assert!(!tensors.contains_key("h.0.attn.bias"));
    }

    #[test]
    fn test_conv1d_weights_transposed() {
        let mut tensors = tensor_map();
        adapt_gpt2_weights(&mut tensors).unwrap();
        assert_eq!(tensors["h.0.attn.c_attn.weight"].dims(), &[12, 4]);
        assert_eq!(tensors["h.0.mlp.c_fc.weight"].dims(), &[16, 4]);
    }

    #[test]
    fn test_projection_bias_and_embeddings_untouched() {
        let mut tensors = tensor_map();
        adapt_gpt2_weights(&mut tensors).unwrap();
        // c_attn.bias ends with "attn.bias" only as a substring, not a
        // path component, and must survive the mask filter
        assert_eq!(tensors["h.0.attn.c_attn.bias"].dims(), &[12]);
        assert_eq!(tensors["wte.weight"].dims(), &[8, 4]);
    }
}
