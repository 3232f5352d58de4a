use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use super::{AudioSource, SourceError};

/// Microphone input through cpal, mixed down to mono and handed across an
/// SPSC ring buffer to whoever drains it.
pub struct CpalSource {
    _stream: cpal::Stream,
    consumer: HeapCons<f32>,
    failed: Arc<AtomicBool>,
    sample_rate: u32,
}

impl CpalSource {
    /// Open the default input device. `buffer_secs` sizes the ring buffer; it
    /// only needs to outlast one sampling tick plus scheduling jitter.
    pub fn open(buffer_secs: f32) -> Result<Self, anyhow::Error> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("No input device available"))?;

        info!("Audio Input Device: {}", device.name().unwrap_or_default());

        // Prefer 16 kHz to keep clips small, then common hardware rates.
        let target_rates = [16000, 48000, 44100];
        let mut selected_config = None;
        for &rate in &target_rates {
            for config_range in device.supported_input_configs()? {
                if config_range.min_sample_rate().0 <= rate && config_range.max_sample_rate().0 >= rate {
                    selected_config = Some(config_range.with_sample_rate(cpal::SampleRate(rate)));
                    break;
                }
            }
            if selected_config.is_some() {
                break;
            }
        }

        let config = match selected_config {
            Some(c) => c,
            None => device.default_input_config()?,
        };
        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;

        info!("Audio Config Selected: Rate={}Hz, Channels={}", sample_rate, channels);

        let capacity = ((sample_rate as f32 * buffer_secs) as usize).max(4096);
        let (mut producer, consumer) = HeapRb::<f32>::new(capacity).split();

        let failed = Arc::new(AtomicBool::new(false));
        let failed_flag = failed.clone();
        let err_fn = move |err| {
            error!("an error occurred on stream: {}", err);
            failed_flag.store(true, Ordering::SeqCst);
        };

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config.into(),
                move |data: &[f32], _: &_| write_frames(data, channels, |s| s, &mut producer),
                err_fn,
                None,
            )?,
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config.into(),
                move |data: &[i16], _: &_| {
                    write_frames(data, channels, |s| s as f32 / i16::MAX as f32, &mut producer)
                },
                err_fn,
                None,
            )?,
            other => return Err(anyhow::anyhow!("Unsupported sample format: {:?}", other)),
        };

        stream.play()?;

        Ok(Self {
            _stream: stream,
            consumer,
            failed,
            sample_rate,
        })
    }
}

impl AudioSource for CpalSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn drain(&mut self, out: &mut Vec<f32>) -> Result<usize, SourceError> {
        if self.failed.load(Ordering::SeqCst) {
            return Err(SourceError::Disconnected("input stream reported an error".into()));
        }
        let before = out.len();
        out.extend(self.consumer.pop_iter());
        Ok(out.len() - before)
    }
}

// Interleaved frames in, mono out. When the consumer lags, samples are dropped.
fn write_frames<T, P>(input: &[T], channels: usize, to_f32: impl Fn(T) -> f32, producer: &mut P)
where
    T: Copy,
    P: Producer<Item = f32>,
{
    let channels = channels.max(1);
    for frame in input.chunks(channels) {
        let sum: f32 = frame.iter().map(|&s| to_f32(s)).sum();
        let _ = producer.try_push(sum / frame.len() as f32);
    }
}
