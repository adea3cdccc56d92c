pub mod dataset;

pub use dataset::{DataLoader, TextDataset};
