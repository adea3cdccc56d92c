use anyhow::Result;
use candle_core::{Device, IndexOp, Tensor};
use std::path::Path;

use crate::config::{Config, Gpt2Size};
use crate::io::safetensors;
use crate::model::{self, GPT};
use crate::tokenizer::GPT2Tokenizer;

/// Text generator for inference
pub struct TextGenerator {
    model: GPT,
    tokenizer: GPT2Tokenizer,
    config: Config,
    device: Device,
}

impl TextGenerator {
    /// Build a generator from already constructed parts
    pub fn new(model: GPT, tokenizer: GPT2Tokenizer, config: Config, device: Device) -> Self {
        Self {
            model,
            tokenizer,
            config,
            device,
        }
    }

    /// Load a text generator from a saved model folder
    pub fn load<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let device = Device::cuda_if_available(0)?;
        let (model, tokenizer, config) = safetensors::load_model_folder(model_path, &device)?;

        Ok(Self {
            model,
            tokenizer,
            config,
            device,
        })
    }

    /// Load a pretrained GPT-2 checkpoint from the Hugging Face hub
    pub fn from_hub(size: Gpt2Size) -> Result<Self> {
        let device = Device::cuda_if_available(0)?;
        let (model, tokenizer, config) = model::from_hub(size, &device)?;

        Ok(Self {
            model,
            tokenizer,
            config,
            device,
        })
    }

    /// Encode a prompt, falling back to the BOS token when it is empty
    fn encode_prompt(&self, prompt: &str) -> Result<Vec<u32>> {
        if prompt.is_empty() {
            Ok(vec![self.tokenizer.bos_token_id()])
        } else {
            self.tokenizer.encode(prompt)
        }
    }

    /// Generate text from a prompt, returning prompt and continuation
    pub fn generate(
        &self,
        prompt: &str,
        max_new_tokens: usize,
        temperature: f64,
        top_k: Option<usize>,
    ) -> Result<String> {
        let input_ids = self.encode_prompt(prompt)?;
        let input_ids_i64: Vec<i64> = input_ids.iter().map(|&x| x as i64).collect();

        let input = Tensor::new(input_ids_i64.as_slice(), &self.device)?.unsqueeze(0)?;

        let generated = self
            .model
            .generate(&input, max_new_tokens, temperature, top_k)?;

        let generated_ids: Vec<u32> = generated
            .squeeze(0)?
            .to_vec1::<i64>()?
            .into_iter()
            .map(|x| x as u32)
            .collect();

        let text = self.tokenizer.decode(&generated_ids, true)?;

        Ok(text)
    }

    /// Generate from a prompt and decode only the newly generated tokens
    pub fn generate_continuation(
        &self,
        prompt: &str,
        max_new_tokens: usize,
        temperature: f64,
        top_k: Option<usize>,
    ) -> Result<String> {
        let input_ids = self.encode_prompt(prompt)?;
        let prompt_len = input_ids.len();
        let input_ids_i64: Vec<i64> = input_ids.iter().map(|&x| x as i64).collect();

        let input = Tensor::new(input_ids_i64.as_slice(), &self.device)?.unsqueeze(0)?;

        let generated = self
            .model
            .generate(&input, max_new_tokens, temperature, top_k)?;

        let new_ids: Vec<u32> = generated
            .i((0, prompt_len..))?
            .to_vec1::<i64>()?
            .into_iter()
            .map(|x| x as u32)
            .collect();

        let text = self.tokenizer.decode(&new_ids, true)?;

        Ok(text)
    }

    /// Generate with custom parameters
    pub fn generate_custom(
        &self,
        prompt: &str,
        max_new_tokens: usize,
        temperature: f64,
        top_k: Option<usize>,
        top_p: Option<f32>,
        repetition_penalty: Option<f32>,
    ) -> Result<String> {
        // Only top_k is supported; top_p and repetition_penalty could be
        // added as extensions
        if top_p.is_some() || repetition_penalty.is_some() {
            log::warn!("top_p and repetition_penalty are not yet implemented, using top_k only");
        }

        self.generate(prompt, max_new_tokens, temperature, top_k)
    }

    /// Stream generation token by token
    ///
    /// Stops early when the model emits the EOS token.
    pub fn generate_stream<F>(
        &self,
        prompt: &str,
        max_new_tokens: usize,
        temperature: f64,
        top_k: Option<usize>,
        mut callback: F,
    ) -> Result<String>
    where
        F: FnMut(&str) -> Result<()>,
    {
        let input_ids = self.encode_prompt(prompt)?;
        let input_ids_i64: Vec<i64> = input_ids.iter().map(|&x| x as i64).collect();

        let mut idx = Tensor::new(input_ids_i64.as_slice(), &self.device)?.unsqueeze(0)?;
        let mut generated_tokens = Vec::new();

        for _ in 0..max_new_tokens {
            // One token at a time
            let next = self.model.generate(&idx, 1, temperature, top_k)?;

            let new_token_id = next
                .i((.., next.dims()[1] - 1))?
                .squeeze(0)?
                .to_scalar::<i64>()? as u32;

            if new_token_id == self.tokenizer.eos_token_id() {
                break;
            }

            generated_tokens.push(new_token_id);

            // Decode just the new token
            let token_text = self.tokenizer.decode(&[new_token_id], false)?;
            callback(&token_text)?;

            idx = next;
        }

        // Return the full generated text
        let full_ids: Vec<u32> = input_ids
            .into_iter()
            .chain(generated_tokens.into_iter())
            .collect();

        self.tokenizer.decode(&full_ids, true)
    }

    /// Get model information
    pub fn model_info(&self) -> String {
        format!(
            "Vocab size: {}\nEmbedding dim: {}\nLayers: {}\nHeads: {}\nContext: {}\nParameters: {:.2}M\nDevice: {:?}",
            self.config.vocab_size,
            self.config.n_embd,
            self.config.n_layer,
            self.config.n_head,
            self.config.n_positions,
            self.config.param_count_millions(),
            self.device
        )
    }

    /// Get the device being used
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Get the tokenizer
    pub fn tokenizer(&self) -> &GPT2Tokenizer {
        &self.tokenizer
    }

    /// Get the model configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
