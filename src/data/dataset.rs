use anyhow::{ensure, Result};
use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::tokenizer::GPT2Tokenizer;

/// Sliding-window next-token dataset over a tokenized corpus
pub struct TextDataset {
    tokens: Vec<i64>,
    max_length: usize,
    device: Device,
    pad_token_id: i64,
}

impl TextDataset {
    /// Create a new dataset from text samples
    pub fn new(
        texts: &[String],
        tokenizer: &GPT2Tokenizer,
        max_length: usize,
        device: &Device,
    ) -> Result<Self> {
        let mut all_tokens = Vec::new();

        for text in texts {
            let encoded = tokenizer.encode(text)?;
            all_tokens.extend(encoded.iter().map(|&x| x as i64));
        }

        log::info!("Created dataset with {} tokens", all_tokens.len());

        Ok(Self::from_tokens(
            all_tokens,
            max_length,
            device,
            tokenizer.pad_token_id() as i64,
        ))
    }

    /// Create a dataset from an already tokenized corpus
    pub fn from_tokens(
        tokens: Vec<i64>,
        max_length: usize,
        device: &Device,
        pad_token_id: i64,
    ) -> Self {
        Self {
            tokens,
            max_length,
            device: device.clone(),
            pad_token_id,
        }
    }

    /// Get the number of samples in the dataset
    pub fn len(&self) -> usize {
        if self.tokens.len() > self.max_length {
            self.tokens.len() - self.max_length
        } else {
            1
        }
    }

    /// Check if dataset is empty
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Get a (input, target) sample at the given index
    pub fn get(&self, idx: usize) -> Result<(Tensor, Tensor)> {
        let chunk: Vec<i64> = if idx + self.max_length + 1 <= self.tokens.len() {
            self.tokens[idx..idx + self.max_length + 1].to_vec()
        } else {
            // Pad if necessary
            let mut chunk = self.tokens[idx..].to_vec();
            let pad_len = self.max_length + 1 - chunk.len();
            chunk.extend(vec![self.pad_token_id; pad_len]);
            chunk
        };

        let x = Tensor::from_slice(&chunk[..self.max_length], (self.max_length,), &self.device)?;
        let y = Tensor::from_slice(&chunk[1..], (self.max_length,), &self.device)?;

        Ok((x, y))
    }

    /// Create a dataloader with the specified batch size
    pub fn dataloader(&self, batch_size: usize, shuffle: bool) -> Result<DataLoader> {
        ensure!(batch_size > 0, "batch size must be at least 1");
        Ok(DataLoader::new(self, batch_size, shuffle))
    }
}

/// Mini-batch iterator with optional shuffling
pub struct DataLoader<'a> {
    dataset: &'a TextDataset,
    batch_size: usize,
    indices: Vec<usize>,
    current_idx: usize,
    shuffle: bool,
}

impl<'a> DataLoader<'a> {
    fn new(dataset: &'a TextDataset, batch_size: usize, shuffle: bool) -> Self {
        let indices: Vec<usize> = (0..dataset.len()).collect();

        let mut loader = Self {
            dataset,
            batch_size,
            indices,
            current_idx: 0,
            shuffle,
        };

        if shuffle {
            loader.shuffle_indices();
        }

        loader
    }

    /// Shuffle the indices
    fn shuffle_indices(&mut self) {
        self.indices.shuffle(&mut thread_rng());
    }

    /// Get the number of batches
    pub fn len(&self) -> usize {
        (self.dataset.len() + self.batch_size - 1) / self.batch_size
    }

    /// Reset the dataloader
    pub fn reset(&mut self, shuffle: bool) {
        self.current_idx = 0;
        if shuffle || self.shuffle {
            self.shuffle_indices();
        }
    }

    /// Check if dataloader is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> Iterator for DataLoader<'a> {
    type Item = Result<(Tensor, Tensor)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_idx >= self.indices.len() {
            return None;
        }

        let batch_end = (self.current_idx + self.batch_size).min(self.indices.len());
        let batch_indices = &self.indices[self.current_idx..batch_end];

        let mut x_batch = Vec::new();
        let mut y_batch = Vec::new();

        for &idx in batch_indices {
            match self.dataset.get(idx) {
                Ok((x, y)) => {
                    x_batch.push(x);
                    y_batch.push(y);
                }
                Err(e) => return Some(Err(e)),
            }
        }

        self.current_idx = batch_end;

        // Stack into batch tensors
        match (Tensor::stack(&x_batch, 0), Tensor::stack(&y_batch, 0)) {
            (Ok(x), Ok(y)) => Some(Ok((x, y))),
            (Err(e), _) | (_, Err(e)) => Some(Err(e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dataset() -> TextDataset {
        let tokens: Vec<i64> = (0..20).collect();
        TextDataset::from_tokens(tokens, 8, &Device::Cpu, 50256)
    }

    #[test]
    fn test_len_counts_windows() {
        let dataset = sample_dataset();
        assert_eq!(dataset.len(), 12);
    }

    #[test]
    fn test_get_shifts_targets_by_one() {
        let dataset = sample_dataset();
        let (x, y) = dataset.get(3).unwrap();

        let x: Vec<i64> = x.to_vec1().unwrap();
        let y: Vec<i64> = y.to_vec1().unwrap();

        assert_eq!(x, vec![3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(y, vec![4, 5, 6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_get_pads_at_corpus_end() {
        let dataset = sample_dataset();
        let (x, y) = dataset.get(dataset.len() - 1).unwrap();

        let x: Vec<i64> = x.to_vec1().unwrap();
        let y: Vec<i64> = y.to_vec1().unwrap();

        assert_eq!(x.len(), 8);
        assert_eq!(y[y.len() - 1], 50256);
    }

    #[test]
    fn test_dataloader_batches() {
        let dataset = sample_dataset();
        let loader = dataset.dataloader(5, false).unwrap();
        assert_eq!(loader.len(), 3);

        let batches: Vec<_> = loader.collect();
        assert_eq!(batches.len(), 3);

        let (x, y) = batches[0].as_ref().unwrap().clone();
        assert_eq!(x.dims(), &[5, 8]);
        assert_eq!(y.dims(), &[5, 8]);
    }

    #[test]
    fn test_dataloader_rejects_zero_batch_size() {
        let dataset = sample_dataset();
        assert!(dataset.dataloader(0, false).is_err());
    }
}
