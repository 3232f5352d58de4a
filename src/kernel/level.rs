use super::time::Timestamp;

/// Calibration constant that lifts `20*log10(rms)` into a 0..120 room-noise range.
pub const DEFAULT_DB_OFFSET: f64 = 115.0;

/// One analysis window of samples taken at a sampling tick.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBlock {
    /// Unsigned byte-domain samples, 128 is the zero line.
    Bytes(Vec<u8>),
    /// Normalized samples in [-1, 1].
    Float(Vec<f32>),
}

impl SampleBlock {
    pub fn len(&self) -> usize {
        match self {
            SampleBlock::Bytes(b) => b.len(),
            SampleBlock::Float(f) => f.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A sample that can be mapped onto a signed amplitude.
pub trait Sample: Copy {
    fn amplitude(self) -> f64;
}

impl Sample for u8 {
    fn amplitude(self) -> f64 {
        (self as f64 / 128.0) - 1.0
    }
}

impl Sample for f32 {
    fn amplitude(self) -> f64 {
        self as f64
    }
}

impl Sample for i16 {
    fn amplitude(self) -> f64 {
        self as f64 / i16::MAX as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoudnessReading {
    pub value: u32,
    pub at: Timestamp,
    /// Instantaneous comparison against the threshold, without debounce.
    pub above_threshold: bool,
}

/// Full-band RMS level estimate on a relative dB scale.
#[derive(Debug, Clone, Copy)]
pub struct LevelMeter {
    offset: f64,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(DEFAULT_DB_OFFSET)
    }
}

impl LevelMeter {
    pub fn new(offset: f64) -> Self {
        Self { offset }
    }

    pub fn estimate(&self, block: &SampleBlock) -> u32 {
        match block {
            SampleBlock::Bytes(b) => self.estimate_samples(b),
            SampleBlock::Float(f) => self.estimate_samples(f),
        }
    }

    pub fn estimate_samples<S: Sample>(&self, samples: &[S]) -> u32 {
        if samples.is_empty() {
            return 0;
        }

        let sq_sum: f64 = samples
            .iter()
            .map(|&s| {
                let a = s.amplitude();
                a * a
            })
            .sum();
        let rms = (sq_sum / samples.len() as f64).sqrt();

        // log10(0) is -inf; digital silence reads as 0.
        if !rms.is_finite() || rms <= 0.0 {
            return 0;
        }

        let db = (20.0 * rms.log10() + self.offset).round();
        if db.is_finite() && db > 0.0 {
            db as u32
        } else {
            0
        }
    }
}

/// Estimate with the default calibration offset.
pub fn estimate(block: &SampleBlock) -> u32 {
    LevelMeter::default().estimate(block)
}
