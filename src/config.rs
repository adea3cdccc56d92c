use candle_core::{Device, Result as CandleResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Model size configurations for locally trained chat models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSize {
    #[serde(rename = "12M")]
    Small, // 12M parameters
    #[serde(rename = "33M")]
    Medium, // 33M parameters
    #[serde(rename = "117M")]
    Large, // 117M parameters
}

impl FromStr for ModelSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "12M" | "small" => Ok(ModelSize::Small),
            "33M" | "medium" => Ok(ModelSize::Medium),
            "117M" | "large" => Ok(ModelSize::Large),
            _ => Err(format!("Invalid model size: {}. Use 12M, 33M, or 117M", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelSize::Small => write!(f, "12M"),
            ModelSize::Medium => write!(f, "33M"),
            ModelSize::Large => write!(f, "117M"),
        }
    }
}

/// OpenAI GPT-2 checkpoint families available on the Hugging Face hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gpt2Size {
    #[serde(rename = "gpt2")]
    Base, // 124M parameters
    #[serde(rename = "gpt2-medium")]
    Medium, // 350M parameters
    #[serde(rename = "gpt2-large")]
    Large, // 774M parameters
    #[serde(rename = "gpt2-xl")]
    Xl, // 1558M parameters
}

impl Gpt2Size {
    /// Hub repository id for this checkpoint
    pub fn repo_id(&self) -> &'static str {
        match self {
            Gpt2Size::Base => "openai-community/gpt2",
            Gpt2Size::Medium => "openai-community/gpt2-medium",
            Gpt2Size::Large => "openai-community/gpt2-large",
            Gpt2Size::Xl => "openai-community/gpt2-xl",
        }
    }

    /// (n_layer, n_head, n_embd) for this checkpoint
    pub fn architecture(&self) -> (usize, usize, usize) {
        match self {
            Gpt2Size::Base => (12, 12, 768),
            Gpt2Size::Medium => (24, 16, 1024),
            Gpt2Size::Large => (36, 20, 1280),
            Gpt2Size::Xl => (48, 25, 1600),
        }
    }
}

impl FromStr for Gpt2Size {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gpt2" => Ok(Gpt2Size::Base),
            "gpt2-medium" => Ok(Gpt2Size::Medium),
            "gpt2-large" => Ok(Gpt2Size::Large),
            "gpt2-xl" => Ok(Gpt2Size::Xl),
            _ => Err(format!(
                "Invalid GPT-2 size: {}. Use gpt2, gpt2-medium, gpt2-large, or gpt2-xl",
                s
            )),
        }
    }
}

impl std::fmt::Display for Gpt2Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gpt2Size::Base => write!(f, "gpt2"),
            Gpt2Size::Medium => write!(f, "gpt2-medium"),
            Gpt2Size::Large => write!(f, "gpt2-large"),
            Gpt2Size::Xl => write!(f, "gpt2-xl"),
        }
    }
}

/// Sampling settings for generation and chat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_k: Option<usize>,
    /// Text used to seed generation when no prompt is given
    pub start: String,
    /// Speaker prefix for the human side of a chat transcript
    pub user: String,
    /// Speaker prefix for the model side of a chat transcript
    pub bot: String,
}

impl SamplingConfig {
    /// Apply overrides from command line arguments
    pub fn with_overrides(
        mut self,
        max_new_tokens: Option<usize>,
        temperature: Option<f64>,
        top_k: Option<usize>,
    ) -> Self {
        if let Some(n) = max_new_tokens {
            self.max_new_tokens = n;
        }
        if let Some(t) = temperature {
            self.temperature = t;
        }
        if let Some(k) = top_k {
            self.top_k = if k == 0 { None } else { Some(k) };
        }
        self
    }

    /// Load overrides from environment variables
    pub fn from_env_overrides(self) -> Self {
        let max_new_tokens = std::env::var("GRAMCHAT_MAX_NEW_TOKENS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok());
        let temperature = std::env::var("GRAMCHAT_TEMPERATURE")
            .ok()
            .and_then(|s| s.parse::<f64>().ok());
        let top_k = std::env::var("GRAMCHAT_TOP_K")
            .ok()
            .and_then(|s| s.parse::<usize>().ok());

        self.with_overrides(max_new_tokens, temperature, top_k)
    }

    /// Log current sampling settings
    pub fn log_settings(&self) {
        log::info!("Sampling settings:");
        log::info!("  Max new tokens: {}", self.max_new_tokens);
        log::info!("  Temperature: {}", self.temperature);
        match self.top_k {
            Some(k) => log::info!("  Top-k: {}", k),
            None => log::info!("  Top-k: disabled"),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig {
            max_new_tokens: 200,
            temperature: 0.8,
            top_k: Some(40),
            start: "\n".to_string(),
            user: "User".to_string(),
            bot: "Bot".to_string(),
        }
    }
}

/// Main configuration struct for the model and training
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Model architecture
    pub vocab_size: usize,
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
    pub n_positions: usize,

    // Training settings
    pub batch_size: usize,
    pub learning_rate: f32,
    pub weight_decay: f32,
    pub num_epochs: usize,
    pub dropout: f32,

    // Data settings
    pub max_length: usize,

    // Other settings
    pub seed: u64,

    // Device configuration (not serialized)
    #[serde(skip)]
    pub device: Option<Device>,
}

impl Config {
    /// Create a new configuration with the specified model size
    pub fn new(model_size: ModelSize, seed: u64) -> Self {
        let (n_embd, n_layer, n_head) = match model_size {
            ModelSize::Small => (384, 6, 6),   // 12M params
            ModelSize::Medium => (512, 8, 8),  // 33M params
            ModelSize::Large => (768, 12, 12), // 117M params
        };

        Config {
            // Model architecture
            vocab_size: 50257, // GPT-2 tokenizer vocab size
            n_embd,
            n_layer,
            n_head,
            n_positions: 512,

            // Training settings
            batch_size: 2,
            learning_rate: 3e-4_f32,
            weight_decay: 0.01_f32,
            num_epochs: 20,
            dropout: 0.1_f32,

            // Data settings
            max_length: 128,

            // Other settings
            seed,
            device: None,
        }
    }

    /// Create the configuration matching an OpenAI GPT-2 checkpoint
    pub fn gpt2(size: Gpt2Size) -> Self {
        let (n_layer, n_head, n_embd) = size.architecture();

        Config {
            vocab_size: 50257, // always 50257 for GPT-2 checkpoints
            n_embd,
            n_layer,
            n_head,
            n_positions: 1024, // always 1024 for GPT-2 checkpoints

            batch_size: 1,
            learning_rate: 3e-4_f32,
            weight_decay: 0.01_f32,
            num_epochs: 0,
            dropout: 0.0_f32, // inference only

            max_length: 1024,

            seed: 42,
            device: None,
        }
    }

    /// Get the device for computation
    pub fn device(&self) -> &Device {
        self.device.as_ref().expect("Device not initialized")
    }

    /// Initialize and get the device reference
    pub fn init_device(&mut self) -> CandleResult<&Device> {
        if self.device.is_none() {
            self.device = Some(Device::cuda_if_available(0)?);
        }
        Ok(self.device.as_ref().unwrap())
    }

    /// Get parameter count in millions
    pub fn param_count_millions(&self) -> f32 {
        let embeddings = self.vocab_size * self.n_embd + self.n_positions * self.n_embd;
        let attention = self.n_layer * (3 * self.n_embd * self.n_embd + self.n_embd * self.n_embd);
        let mlp = self.n_layer * (2 * self.n_embd * 4 * self.n_embd);
        let layer_norm = self.n_layer * 2 * self.n_embd + self.n_embd;
        // lm_head is not counted: it shares weights with the token embedding

        let total = embeddings + attention + mlp + layer_norm;
        total as f32 / 1_000_000.0
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(ModelSize::Small, 42)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_size_from_str() {
        assert_eq!("12M".parse::<ModelSize>().unwrap(), ModelSize::Small);
        assert_eq!("medium".parse::<ModelSize>().unwrap(), ModelSize::Medium);
        assert!("7B".parse::<ModelSize>().is_err());
    }

    #[test]
    fn test_gpt2_size_from_str() {
        assert_eq!("gpt2".parse::<Gpt2Size>().unwrap(), Gpt2Size::Base);
        assert_eq!("GPT2-XL".parse::<Gpt2Size>().unwrap(), Gpt2Size::Xl);
        assert!("gpt3".parse::<Gpt2Size>().is_err());
    }

    #[test]
    fn test_gpt2_architecture_table() {
        let config = Config::gpt2(Gpt2Size::Base);
        assert_eq!(config.n_layer, 12);
        assert_eq!(config.n_head, 12);
        assert_eq!(config.n_embd, 768);
        assert_eq!(config.vocab_size, 50257);
        assert_eq!(config.n_positions, 1024);

        let config = Config::gpt2(Gpt2Size::Xl);
        assert_eq!(config.n_layer, 48);
        assert_eq!(config.n_embd, 1600);
    }

    #[test]
    fn test_param_count_roughly_matches_size() {
        let config = Config::new(ModelSize::Small, 42);
        let count = config.param_count_millions();
        assert!(count > 10.0 && count < 35.0, "unexpected count: {}", count);
    }

    #[test]
    fn test_sampling_overrides() {
        let sampling = SamplingConfig::default().with_overrides(Some(64), Some(1.2), Some(0));
        assert_eq!(sampling.max_new_tokens, 64);
        assert_eq!(sampling.temperature, 1.2);
        assert_eq!(sampling.top_k, None);
    }
}
