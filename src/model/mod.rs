pub mod attention;
pub mod block;
pub mod gpt;
pub mod pretrained;

pub use gpt::GPT;
pub use pretrained::from_hub;
