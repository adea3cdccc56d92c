pub mod config;
pub mod data;
pub mod inference;
pub mod io;
pub mod model;
pub mod tokenizer;
pub mod training;

pub use config::{Config, Gpt2Size, ModelSize, SamplingConfig};
pub use inference::chat::ChatSession;
pub use inference::generator::TextGenerator;
pub use model::gpt::GPT;
pub use tokenizer::gpt2::GPT2Tokenizer;

/// Custom error type for GramChat
#[derive(thiserror::Error, Debug)]
pub enum GramChatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Hub error: {0}")]
    Hub(#[from] hf_hub::api::sync::ApiError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, GramChatError>;
