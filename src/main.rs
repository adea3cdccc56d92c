use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::{theme::ColorfulTheme, Input};
use std::io::Write;
use std::path::PathBuf;

mod config;
mod data;
mod inference;
mod io;
mod model;
mod tokenizer;
mod training;

use crate::config::{Config, Gpt2Size, ModelSize, SamplingConfig};
use crate::inference::{ChatSession, TextGenerator};

#[derive(Parser)]
#[command(
    name = "gramchat",
    version = "0.1.0",
    about = "Chat with a GPT-2 style language model",
    long_about = "GramChat - Chat with GPT-2 style language models on Candle\n\
                  \n\
                  Examples:\n\
                    # Chat with the pretrained GPT-2 checkpoint\n\
                    gramchat chat --pretrained gpt2\n\
                    \n\
                    # Chat with a locally trained model, seeded from a chat log\n\
                    gramchat chat --model-path models/family_20240123 --seed-file history.txt\n\
                    \n\
                    # One-shot sampling\n\
                    gramchat sample --pretrained gpt2 --prompt \"The meaning of life is\"\n\
                    \n\
                    # Train a small model on a chat corpus\n\
                    gramchat train --corpus chats.txt --model-size 12M"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat with a model
    Chat {
        /// Path to a locally trained model directory
        #[arg(short, long)]
        model_path: Option<PathBuf>,

        /// Pretrained GPT-2 checkpoint to load from the hub
        #[arg(long)]
        pretrained: Option<Gpt2Size>,

        /// Text file used to seed the conversation transcript
        #[arg(long)]
        seed_file: Option<PathBuf>,

        /// Maximum tokens to generate per reply
        #[arg(long)]
        max_new_tokens: Option<usize>,

        /// Temperature for sampling
        #[arg(long)]
        temperature: Option<f64>,

        /// Top-k sampling parameter (0 disables filtering)
        #[arg(long)]
        top_k: Option<usize>,

        /// Speaker name for the human side
        #[arg(long, default_value = "User")]
        user: String,

        /// Speaker name for the model side
        #[arg(long, default_value = "Bot")]
        bot: String,
    },

    /// Generate text from a prompt
    Sample {
        /// Path to a locally trained model directory
        #[arg(short, long)]
        model_path: Option<PathBuf>,

        /// Pretrained GPT-2 checkpoint to load from the hub
        #[arg(long)]
        pretrained: Option<Gpt2Size>,

        /// Initial prompt for generation
        #[arg(short, long)]
        prompt: Option<String>,

        /// Maximum tokens to generate
        #[arg(long, default_value = "100")]
        max_new_tokens: usize,

        /// Temperature for sampling
        #[arg(long, default_value = "0.8")]
        temperature: f64,

        /// Top-k sampling parameter (0 disables filtering)
        #[arg(long, default_value = "40")]
        top_k: usize,

        /// Number of samples to generate
        #[arg(long, default_value = "1")]
        num_samples: usize,

        /// Stream tokens as they are generated
        #[arg(long)]
        stream: bool,
    },

    /// Train a chat model on a plain-text corpus
    Train {
        /// Path to the training corpus (plain text)
        #[arg(short, long)]
        corpus: PathBuf,

        /// Model size (12M, 33M, or 117M)
        #[arg(long, default_value = "12M")]
        model_size: ModelSize,

        /// Number of training epochs
        #[arg(long, default_value = "20")]
        epochs: usize,

        /// Batch size for training
        #[arg(long, default_value = "2")]
        batch_size: usize,

        /// Learning rate
        #[arg(long, default_value = "0.0003")]
        learning_rate: f64,

        /// Training window length in tokens
        #[arg(long, default_value = "128")]
        max_length: usize,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output directory for models
        #[arg(long, default_value = "models")]
        output_dir: PathBuf,
    },

    /// Show information about a model
    Info {
        /// Path to a locally trained model directory
        #[arg(short, long)]
        model_path: Option<PathBuf>,

        /// Pretrained GPT-2 checkpoint to inspect
        #[arg(long)]
        pretrained: Option<Gpt2Size>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    println!("{}", "=".repeat(60).bright_blue());
    println!(
        "{}",
        "GramChat - Chat with GPT-2 style language models"
            .bright_white()
            .bold()
    );
    println!("{}", "Version 0.1.0 - Rust + Candle Edition".bright_white());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    match cli.command {
        Commands::Chat {
            model_path,
            pretrained,
            seed_file,
            max_new_tokens,
            temperature,
            top_k,
            user,
            bot,
        } => {
            let generator = build_generator(model_path, pretrained)?;

            let mut sampling = SamplingConfig::default()
                .from_env_overrides()
                .with_overrides(max_new_tokens, temperature, top_k);
            sampling.user = user;
            sampling.bot = bot;
            sampling.log_settings();

            chat_mode(generator, sampling, seed_file)?;
        }

        Commands::Sample {
            model_path,
            pretrained,
            prompt,
            max_new_tokens,
            temperature,
            top_k,
            num_samples,
            stream,
        } => {
            let generator = build_generator(model_path, pretrained)?;
            let prompt = prompt.unwrap_or_default();
            let top_k = if top_k == 0 { None } else { Some(top_k) };

            for i in 0..num_samples {
                if num_samples > 1 {
                    println!("{}", format!("--- Sample {} ---", i + 1).bright_yellow());
                }

                if stream {
                    generator.generate_stream(
                        &prompt,
                        max_new_tokens,
                        temperature,
                        top_k,
                        |token| {
                            print!("{}", token);
                            std::io::stdout().flush()?;
                            Ok(())
                        },
                    )?;
                    println!();
                } else {
                    let text =
                        generator.generate(&prompt, max_new_tokens, temperature, top_k)?;
                    println!("{}", text);
                }
            }
        }

        Commands::Train {
            corpus,
            model_size,
            epochs,
            batch_size,
            learning_rate,
            max_length,
            seed,
            output_dir,
        } => {
            let mut config = Config::new(model_size, seed);
            config.num_epochs = epochs;
            config.batch_size = batch_size;
            config.learning_rate = learning_rate as f32;
            config.max_length = max_length;
            config.init_device()?;

            let result = training::run_training(&corpus, &config, &output_dir)?;

            println!("\n{}", "Training finished!".bright_green().bold());
            println!("Model saved to: {}", result.model_path.display());
            println!("Final loss: {:.4}", result.final_loss);
            println!(
                "Training time: {:.1}s",
                result.training_time_seconds
            );
        }

        Commands::Info {
            model_path,
            pretrained,
        } => {
            let generator = build_generator(model_path, pretrained)?;
            println!("{}", generator.model_info());
        }
    }

    Ok(())
}

/// Build a generator from either a local model folder or a hub checkpoint
fn build_generator(
    model_path: Option<PathBuf>,
    pretrained: Option<Gpt2Size>,
) -> Result<TextGenerator> {
    match (model_path, pretrained) {
        (Some(path), None) => {
            println!("{}", format!("Loading model from {}", path.display()).bright_yellow());
            TextGenerator::load(path)
        }
        (None, Some(size)) => {
            println!("{}", format!("Loading {} from the hub", size).bright_yellow());
            TextGenerator::from_hub(size)
        }
        (None, None) => {
            println!("{}", "Loading gpt2 from the hub".bright_yellow());
            TextGenerator::from_hub(Gpt2Size::Base)
        }
        (Some(_), Some(_)) => Err(anyhow!(
            "Use either --model-path or --pretrained, not both"
        )),
    }
}

/// Interactive chat REPL
fn chat_mode(
    generator: TextGenerator,
    sampling: SamplingConfig,
    seed_file: Option<PathBuf>,
) -> Result<()> {
    let user = sampling.user.clone();
    let bot = sampling.bot.clone();

    let mut session = ChatSession::new(generator, sampling);
    if let Some(path) = seed_file {
        session.seed_from_file(&path)?;
        println!(
            "{}",
            format!("Transcript seeded from {}", path.display()).bright_yellow()
        );
    }

    println!(
        "{}",
        "Type 'quit' to exit; press Enter to let the model continue the transcript".bright_black()
    );
    println!();

    loop {
        let input: String = Input::with_theme(&ColorfulTheme::default())
            .with_prompt(&user)
            .allow_empty(true)
            .interact_text()?;
        let input = input.trim();

        if input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit") {
            println!("{}", "Goodbye!".bright_cyan());
            break;
        }

        if input.is_empty() {
            // The model writes the next message on the user's side of the
            // transcript, as when sampling from a seeded chat log
            let message = session.next_message()?;
            println!("{}: {}", user.bright_cyan(), message);
            continue;
        }

        let reply = session.reply(input)?;
        println!("{}: {}", bot.bright_green(), reply);
    }

    Ok(())
}
