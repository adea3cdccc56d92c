pub mod chat;
pub mod generator;

pub use chat::ChatSession;
pub use generator::TextGenerator;
