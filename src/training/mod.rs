pub mod trainer;

pub use trainer::{run_training, train_model, TrainingResult};
