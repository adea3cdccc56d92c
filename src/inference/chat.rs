use anyhow::Result;
use std::path::Path;

use crate::config::SamplingConfig;
use crate::inference::generator::TextGenerator;

/// Chat session over a running transcript
///
/// The transcript is a plain-text dialogue in the `"Speaker: message"`
/// format the model is conditioned on. Every turn appends to the transcript,
/// the model completes it, and only the first generated message is kept.
pub struct ChatSession {
    generator: TextGenerator,
    sampling: SamplingConfig,
    transcript: String,
}

impl ChatSession {
    pub fn new(generator: TextGenerator, sampling: SamplingConfig) -> Self {
        let transcript = sampling.start.clone();
        Self {
            generator,
            sampling,
            transcript,
        }
    }

    /// Seed the transcript from a text file, e.g. an exported chat history
    pub fn seed_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let mut text = std::fs::read_to_string(path.as_ref())?;
        if !text.ends_with('\n') {
            text.push('\n');
        }
        log::info!(
            "Seeded transcript with {} bytes from {}",
            text.len(),
            path.as_ref().display()
        );
        self.transcript = text;
        Ok(())
    }

    /// Current transcript text
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Append a user message and let the model answer
    ///
    /// The reply is cut at the first newline so a single turn never spans
    /// multiple transcript messages.
    pub fn reply(&mut self, message: &str) -> Result<String> {
        self.transcript
            .push_str(&turn_prefix(&self.sampling.user, message, &self.sampling.bot));

        let completion = self.complete()?;
        let reply = first_message(&completion).trim_end().to_string();

        self.transcript.push_str(&reply);
        self.transcript.push('\n');

        Ok(reply)
    }

    /// Continue a seeded transcript with the next message on the user side
    ///
    /// This matches sampling from a model trained on raw chat logs: the
    /// transcript is extended with the user prefix and the model predicts
    /// the message that would follow.
    pub fn next_message(&mut self) -> Result<String> {
        self.transcript
            .push_str(&format!("{}: ", self.sampling.user));

        let completion = self.complete()?;
        let message = first_message(&completion).trim_end().to_string();

        self.transcript.push_str(&message);
        self.transcript.push('\n');

        Ok(message)
    }

    fn complete(&self) -> Result<String> {
        self.generator.generate_continuation(
            &self.transcript,
            self.sampling.max_new_tokens,
            self.sampling.temperature,
            self.sampling.top_k,
        )
    }
}

/// Transcript fragment for one user turn followed by the bot prefix
fn turn_prefix(user: &str, message: &str, bot: &str) -> String {
    format!("{}: {}\n{}: ", user, message, bot)
}

/// First message of a multi-line completion
fn first_message(text: &str) -> &str {
    text.split('\n').next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::inference::generator::TextGenerator;
    use crate::model::GPT;
    use crate::tokenizer::GPT2Tokenizer;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};
    use std::collections::HashMap;
    use tokenizers::models::wordlevel::WordLevel;
    use tokenizers::Tokenizer;

    // A randomly initialized model over a tiny word-level vocabulary, so
    // sessions can run without any downloads
    fn tiny_session() -> ChatSession {
        let device = Device::Cpu;

        let mut config = Config::default();
        config.vocab_size = 32;
        config.n_embd = 16;
        config.n_layer = 2;
        config.n_head = 2;
        config.n_positions = 32;
        config.dropout = 0.0;
        config.device = Some(device.clone());

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = GPT::new(&config, vb).unwrap();

        let vocab: HashMap<String, u32> = (0..32u32).map(|i| (format!("w{}", i), i)).collect();
        let wordlevel = WordLevel::builder()
            .vocab(vocab)
            .unk_token("w0".to_string())
            .build()
            .unwrap();
        let tokenizer = GPT2Tokenizer::from_tokenizer(Tokenizer::new(wordlevel));

        let generator = TextGenerator::new(model, tokenizer, config, device);

        let mut sampling = SamplingConfig::default();
        sampling.max_new_tokens = 3;
        sampling.temperature = 1.0;
        sampling.top_k = None;

        ChatSession::new(generator, sampling)
    }

    #[test]
    fn test_reply_appends_turn_to_transcript() {
        let mut session = tiny_session();
        let reply = session.reply("hello").unwrap();

        assert!(session.transcript().contains("User: hello\nBot: "));
        assert!(session.transcript().ends_with(&format!("{}\n", reply)));
        assert!(!reply.contains('\n'));
    }

    #[test]
    fn test_next_message_continues_user_side() {
        let mut session = tiny_session();
        let message = session.next_message().unwrap();

        assert!(session.transcript().starts_with("\nUser: "));
        assert!(session.transcript().ends_with(&format!("{}\n", message)));
    }

    #[test]
    fn test_seed_from_file_replaces_transcript() {
        let mut session = tiny_session();

        let path = std::env::temp_dir().join(format!("chat_seed_{}.txt", std::process::id()));
        std::fs::write(&path, "Alice: hi\nBob: hey").unwrap();

        session.seed_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        // A trailing newline is added so the next turn starts a fresh line
        assert_eq!(session.transcript(), "Alice: hi\nBob: hey\n");
    }

    #[test]
    fn test_turn_prefix_format() {
        let prefix = turn_prefix("User", "hello there", "Bot");
        assert_eq!(prefix, "User: hello there\nBot: ");
    }

    #[test]
    fn test_first_message_cuts_at_newline() {
        assert_eq!(first_message("hi!\nUser: and then"), "hi!");
    }

    #[test]
    fn test_first_message_single_line() {
        assert_eq!(first_message("just one line"), "just one line");
    }

    #[test]
    fn test_first_message_empty_completion() {
        assert_eq!(first_message(""), "");
        assert_eq!(first_message("\n\n"), "");
    }
}
