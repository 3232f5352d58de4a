pub mod capture;
pub mod processing;

use thiserror::Error;

pub use capture::CpalSource;
pub use processing::AudioTap;

use crate::kernel::encoding::ContentType;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("audio source disconnected: {0}")]
    Disconnected(String),
}

/// A live mono sample stream owned by one session.
pub trait AudioSource {
    fn sample_rate(&self) -> u32;

    /// Move every sample captured since the last call into `out`.
    fn drain(&mut self, out: &mut Vec<f32>) -> Result<usize, SourceError>;

    /// Clip encodings this source can feed, default first.
    fn encodings(&self) -> Vec<ContentType> {
        vec![
            ContentType::wav(self.sample_rate(), 1),
            ContentType::raw_pcm(self.sample_rate(), 1),
        ]
    }
}
