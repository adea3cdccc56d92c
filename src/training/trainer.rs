use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use chrono::Local;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::Config;
use crate::data::TextDataset;
use crate::io::safetensors;
use crate::model::GPT;
use crate::tokenizer::GPT2Tokenizer;

/// Training result information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResult {
    pub model_path: PathBuf,
    pub final_loss: f32,
    pub training_time_seconds: f64,
}

/// Metadata saved next to the trained weights
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelInfo {
    corpus: String,
    final_loss: f32,
    training_time_seconds: f64,
    creation_date: String,
}

/// Train a chat model on a plain-text corpus and save it
pub fn run_training(corpus_path: &Path, config: &Config, output_dir: &Path) -> Result<TrainingResult> {
    let start_time = Instant::now();

    println!("\n{}", "Starting GramChat training...".bright_cyan());

    // Initialize tokenizer
    println!("{}", "[Step 1/5] Loading tokenizer".bright_green());
    let tokenizer = GPT2Tokenizer::new().context(
        "Failed to initialize GPT2 tokenizer - ensure you have internet access for first-time download",
    )?;

    // Load corpus
    println!(
        "\n{}",
        format!("[Step 2/5] Reading corpus from {}", corpus_path.display()).bright_green()
    );
    let text = std::fs::read_to_string(corpus_path)
        .with_context(|| format!("Failed to read corpus file: {}", corpus_path.display()))?;

    let mut config_mut = config.clone();
    let device = config_mut
        .init_device()
        .context("Failed to initialize compute device")?
        .clone();

    let dataset = TextDataset::new(
        std::slice::from_ref(&text),
        &tokenizer,
        config.max_length,
        &device,
    )
    .context("Failed to create text dataset")?;

    println!("Dataset created with {} samples", dataset.len());

    // Initialize model with VarMap
    println!("\n{}", "[Step 3/5] Initializing model".bright_green());
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = GPT::new(config, vb).context("Failed to initialize GPT model")?;

    println!(
        "Model initialized with {:.2}M parameters",
        config.param_count_millions()
    );

    // Train model
    println!("\n{}", "[Step 4/5] Training model".bright_green());
    let final_loss =
        train_model(&model, &dataset, config, &varmap).context("Failed during model training")?;

    // Quick sanity generations before saving
    test_generation(&model, &tokenizer, &device).context("Failed during generation test")?;

    // Save everything
    println!("\n{}", "[Step 5/5] Saving model".bright_green());

    let corpus_stem = corpus_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("corpus");
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let folder_path = output_dir.join(format!("{}_{}", corpus_stem, timestamp));

    safetensors::save_model_folder(&varmap, &tokenizer, config, &folder_path)?;

    let info = ModelInfo {
        corpus: corpus_path.display().to_string(),
        final_loss,
        training_time_seconds: start_time.elapsed().as_secs_f64(),
        creation_date: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    };
    let info_path = folder_path.join("model_info.json");
    std::fs::write(&info_path, serde_json::to_string_pretty(&info)?)
        .with_context(|| format!("Failed to write model info: {}", info_path.display()))?;

    Ok(TrainingResult {
        model_path: folder_path,
        final_loss,
        training_time_seconds: start_time.elapsed().as_secs_f64(),
    })
}

/// Train the model using Candle's training pattern
pub fn train_model(
    model: &GPT,
    dataset: &TextDataset,
    config: &Config,
    varmap: &VarMap,
) -> Result<f32> {
    // Initialize AdamW optimizer with all model parameters
    let params = ParamsAdamW {
        lr: config.learning_rate as f64,
        beta1: 0.9,
        beta2: 0.999,
        eps: 1e-8,
        weight_decay: config.weight_decay as f64,
    };

    let mut optimizer =
        AdamW::new(varmap.all_vars(), params).context("Failed to create AdamW optimizer")?;

    let mut dataloader = dataset.dataloader(config.batch_size, true)?;

    let total_steps = config.num_epochs * dataloader.len();
    let pb = ProgressBar::new(total_steps as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} steps | Loss: {msg} | ETA: {eta}")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut step = 0;
    let mut recent_losses = Vec::new();
    let mut final_loss = 0.0;

    for epoch in 0..config.num_epochs {
        let mut epoch_loss = 0.0;
        let mut num_batches = 0;

        dataloader.reset(true);

        for batch_result in &mut dataloader {
            let (x, y) = batch_result?;

            // Forward pass
            let (_logits, loss) = model.forward(&x, Some(&y), true)?;

            if let Some(loss_tensor) = loss {
                // Backward pass and parameter update
                optimizer.backward_step(&loss_tensor)?;

                // Track loss
                let loss_val = loss_tensor.to_scalar::<f32>()?;
                epoch_loss += loss_val;
                num_batches += 1;

                // Keep track of recent losses for smoothed display
                recent_losses.push(loss_val);
                if recent_losses.len() > 10 {
                    recent_losses.remove(0);
                }
                let smoothed_loss = recent_losses.iter().sum::<f32>() / recent_losses.len() as f32;

                pb.set_position(step as u64);
                pb.set_message(format!("{:.4}", smoothed_loss));

                final_loss = smoothed_loss;
            }

            step += 1;
        }

        let avg_loss = epoch_loss / num_batches as f32;

        // Display epoch summary every 5 epochs or at start/end
        if (epoch + 1) % 5 == 0 || epoch == 0 || epoch == config.num_epochs - 1 {
            pb.println(format!(
                "Epoch {}/{} - Average loss: {:.4} - Learning rate: {:.2e}",
                epoch + 1,
                config.num_epochs,
                avg_loss,
                config.learning_rate
            ));
        }
    }

    pb.finish_with_message(format!("Training complete - Final loss: {:.4}", final_loss));

    Ok(final_loss)
}

/// Test the model with some generations
fn test_generation(model: &GPT, tokenizer: &GPT2Tokenizer, device: &Device) -> Result<()> {
    let test_prompts = vec!["", "The", "Today"];

    println!("\nTest generations:");
    for (i, prompt) in test_prompts.iter().enumerate() {
        let start_ids = if prompt.is_empty() {
            vec![tokenizer.bos_token_id()]
        } else {
            tokenizer.encode(prompt)?
        };

        let start_ids_i64: Vec<i64> = start_ids.iter().map(|&x| x as i64).collect();

        let input = Tensor::new(start_ids_i64.as_slice(), device)?.unsqueeze(0)?;
        let generated = model.generate(&input, 30, 0.8, Some(40))?;

        let generated_ids: Vec<u32> = generated
            .squeeze(0)?
            .to_vec1::<i64>()?
            .into_iter()
            .map(|x| x as u32)
            .collect();

        let text = tokenizer.decode(&generated_ids, true)?;
        println!("Test {}: {}", i + 1, text);
    }

    Ok(())
}
