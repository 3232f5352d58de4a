use std::collections::VecDeque;

use crate::kernel::level::SampleBlock;

/// Splits the captured stream into the two views the session needs: the most
/// recent analysis window for the meter, and PCM16 chunks for capture.
#[derive(Debug)]
pub struct AudioTap {
    gain: f32,
    block_size: usize,
    window: VecDeque<f32>,
    chunk: Vec<i16>,
}

impl AudioTap {
    pub fn new(block_size: usize, gain: f32) -> Self {
        Self {
            gain,
            block_size,
            window: VecDeque::with_capacity(block_size),
            chunk: Vec::new(),
        }
    }

    /// Apply gain and feed both views. Amplified samples are clipped to [-1, 1].
    pub fn ingest(&mut self, samples: &[f32]) {
        for &raw in samples {
            let sample = (raw * self.gain).clamp(-1.0, 1.0);
            if self.window.len() == self.block_size {
                self.window.pop_front();
            }
            self.window.push_back(sample);
            self.chunk.push((sample * i16::MAX as f32) as i16);
        }
    }

    /// The latest `block_size` samples (fewer right after start).
    pub fn block(&self) -> SampleBlock {
        SampleBlock::Float(self.window.iter().copied().collect())
    }

    /// Everything ingested since the previous call, as PCM16 LE bytes.
    pub fn take_chunk(&mut self) -> Option<Vec<u8>> {
        if self.chunk.is_empty() {
            return None;
        }
        let bytes = self.chunk.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.chunk.clear();
        Some(bytes)
    }

    pub fn buffered_samples(&self) -> usize {
        self.chunk.len()
    }
}
