//! Frame types passed between pipeline stages.
//!
//! `InboundFrame` is whatever the media channel delivers. `PcmFrame` is the
//! single fixed format every stage after the resampler works with:
//! mono, s16, 16 kHz, 20 ms.

/// Sample rate of every `PcmFrame` (Hz).
pub const PCM_SAMPLE_RATE: u32 = 16_000;
/// Samples per `PcmFrame` (20 ms at 16 kHz).
pub const PCM_FRAME_SAMPLES: usize = 320;
/// Nominal duration of one `PcmFrame` in milliseconds.
pub const PCM_FRAME_MS: u64 = 20;

/// Raw sample storage of an inbound frame.
#[derive(Debug, Clone)]
pub enum InboundSamples {
    /// Signed 16-bit PCM.
    S16(Vec<i16>),
    /// Float PCM in [-1.0, 1.0].
    F32(Vec<f32>),
}

impl InboundSamples {
    pub fn len(&self) -> usize {
        match self {
            InboundSamples::S16(s) => s.len(),
            InboundSamples::F32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample at `idx` as f32 in [-1.0, 1.0].
    fn get_f32(&self, idx: usize) -> f32 {
        match self {
            InboundSamples::S16(s) => s[idx] as f32 / 32_768.0,
            InboundSamples::F32(s) => s[idx],
        }
    }
}

/// Channel arrangement of a multi-channel inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    /// `L R L R ...`
    Interleaved,
    /// `L L L ... R R R ...`
    Planar,
}

/// An audio frame as received from the media channel, in any format.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub samples: InboundSamples,
    pub sample_rate: u32,
    pub channels: u16,
    pub layout: ChannelLayout,
}

impl InboundFrame {
    /// Interleaved s16 frame (the common wire format).
    pub fn s16(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: InboundSamples::S16(samples),
            sample_rate,
            channels,
            layout: ChannelLayout::Interleaved,
        }
    }

    /// Interleaved f32 frame.
    pub fn f32(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: InboundSamples::F32(samples),
            sample_rate,
            channels,
            layout: ChannelLayout::Interleaved,
        }
    }

    /// Decode little-endian s16 bytes into an interleaved frame.
    ///
    /// A trailing odd byte is ignored.
    pub fn from_s16le_bytes(bytes: &[u8], sample_rate: u32, channels: u16) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        Self::s16(samples, sample_rate, channels)
    }

    /// Number of samples per channel, or `None` if the sample count does not
    /// divide evenly across channels.
    pub fn frames_per_channel(&self) -> Option<usize> {
        let channels = self.channels as usize;
        if channels == 0 || self.samples.len() % channels != 0 {
            return None;
        }
        Some(self.samples.len() / channels)
    }

    /// Average all channels into one mono f32 signal.
    ///
    /// Callers must validate the frame with `frames_per_channel` first.
    pub(crate) fn downmix_mono(&self) -> Vec<f32> {
        let channels = self.channels.max(1) as usize;
        let per_channel = self.samples.len() / channels;
        if channels == 1 {
            return (0..per_channel).map(|i| self.samples.get_f32(i)).collect();
        }
        let scale = 1.0 / channels as f32;
        (0..per_channel)
            .map(|i| {
                let sum: f32 = (0..channels)
                    .map(|c| {
                        let idx = match self.layout {
                            ChannelLayout::Interleaved => i * channels + c,
                            ChannelLayout::Planar => c * per_channel + i,
                        };
                        self.samples.get_f32(idx)
                    })
                    .sum();
                sum * scale
            })
            .collect()
    }
}

/// One 20 ms block of mono 16 kHz s16 PCM.
///
/// Immutable once built; moved from stage to stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame {
    samples: Vec<i16>,
}

impl PcmFrame {
    /// Build a frame from exactly `PCM_FRAME_SAMPLES` samples.
    pub fn new(samples: Vec<i16>) -> Option<Self> {
        (samples.len() == PCM_FRAME_SAMPLES).then_some(Self { samples })
    }

    /// Build a frame from up to `PCM_FRAME_SAMPLES` samples, zero-padding the tail.
    pub fn padded(mut samples: Vec<i16>) -> Self {
        samples.resize(PCM_FRAME_SAMPLES, 0);
        Self { samples }
    }

    /// A frame of digital silence.
    pub fn silence() -> Self {
        Self {
            samples: vec![0; PCM_FRAME_SAMPLES],
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Little-endian byte encoding (640 bytes).
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0)
    }

    /// Root-mean-square level in [0.0, 1.0].
    pub fn rms(&self) -> f32 {
        rms_i16(&self.samples)
    }
}

/// Root-mean-square of s16 samples, normalised to [0.0, 1.0].
pub fn rms_i16(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / 32_768.0;
            v * v
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// Convert a float sample to s16 with rounding and clipping.
///
/// Inverse of the `/ 32768` scaling applied to s16 input, so s16 samples
/// survive the float path unchanged.
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32_768.0).round().clamp(-32_768.0, 32_767.0) as i16
}
