pub mod gpt2;

pub use gpt2::GPT2Tokenizer;
