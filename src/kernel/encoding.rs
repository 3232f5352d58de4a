use std::fmt;
use std::io::Cursor;
use tracing::warn;

/// Container the capture path produces. Chunks are always PCM16 LE; the
/// container decides what finalize wraps around the concatenated body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Wav,
    RawPcm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentType {
    pub container: Container,
    pub sample_rate: u32,
    pub channels: u16,
}

impl ContentType {
    pub fn wav(sample_rate: u32, channels: u16) -> Self {
        Self { container: Container::Wav, sample_rate, channels }
    }

    pub fn raw_pcm(sample_rate: u32, channels: u16) -> Self {
        Self { container: Container::RawPcm, sample_rate, channels }
    }

    pub fn mime(&self) -> String {
        match self.container {
            Container::Wav => "audio/wav".to_string(),
            Container::RawPcm => format!("audio/L16;rate={};channels={}", self.sample_rate, self.channels),
        }
    }

    /// Whether a preference such as `audio/wav` or `audio/L16` names this type.
    /// Parameters on the preference are ignored; the source dictates them.
    pub fn matches(&self, preference: &str) -> bool {
        let essence = preference.split(';').next().unwrap_or("").trim();
        match self.container {
            Container::Wav => {
                essence.eq_ignore_ascii_case("audio/wav") || essence.eq_ignore_ascii_case("audio/x-wav")
            }
            Container::RawPcm => essence.eq_ignore_ascii_case("audio/L16"),
        }
    }

    /// Turn the concatenated chunk body into a self-contained blob.
    /// Returns the blob and the type it actually carries; a failed WAV seal
    /// degrades to raw PCM instead of losing the capture.
    pub fn seal(&self, pcm: Vec<u8>) -> (Vec<u8>, ContentType) {
        match self.container {
            Container::RawPcm => (pcm, *self),
            Container::Wav => match wrap_wav(&pcm, self.sample_rate, self.channels) {
                Ok(bytes) => (bytes, *self),
                Err(e) => {
                    warn!("WAV sealing failed, keeping raw PCM: {}", e);
                    (pcm, ContentType::raw_pcm(self.sample_rate, self.channels))
                }
            },
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mime())
    }
}

fn wrap_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for pair in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Outcome of matching preferences against what the chunk source can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiated {
    Preferred(ContentType),
    /// No preference was supported; the source's own default is used.
    Fallback(ContentType),
    /// Nothing available, capture is off for this session.
    Disabled,
}

impl Negotiated {
    pub fn content_type(&self) -> Option<ContentType> {
        match self {
            Negotiated::Preferred(ct) | Negotiated::Fallback(ct) => Some(*ct),
            Negotiated::Disabled => None,
        }
    }
}

pub fn negotiate<S: AsRef<str>>(preferences: &[S], supported: &[ContentType]) -> Negotiated {
    for pref in preferences {
        if let Some(ct) = supported.iter().find(|ct| ct.matches(pref.as_ref())) {
            return Negotiated::Preferred(*ct);
        }
    }
    match supported.first() {
        Some(ct) => Negotiated::Fallback(*ct),
        None => Negotiated::Disabled,
    }
}

/// Filename extension for a stored content-type tag.
pub fn extension_for(mime: &str) -> &'static str {
    let lower = mime.to_ascii_lowercase();
    if lower.contains("mp4") {
        "m4a"
    } else if lower.contains("webm") {
        "webm"
    } else if lower.contains("wav") {
        "wav"
    } else if lower.contains("l16") {
        "pcm"
    } else {
        "ogg"
    }
}
