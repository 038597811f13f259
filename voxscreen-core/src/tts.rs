//! Speech synthesis.
//!
//! `SpeechSynthesizer` turns reply text into 16 kHz mono s16 PCM. Conversion
//! from the engine's native rate is the synthesizer's job; callers only ever
//! see playback-ready samples.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use hound::{SampleFormat, WavReader};
use serde::Serialize;
use tracing::{debug, warn};

use crate::audio::frame::{f32_to_i16, InboundFrame, PCM_SAMPLE_RATE};
use crate::audio::resample::resample_buffer;
use crate::error::{Result, VoxscreenError};

/// Default silence substituted for a failed synthesis.
pub const DEFAULT_FALLBACK_SILENCE: Duration = Duration::from_millis(500);

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Render `text` as 16 kHz mono s16 PCM.
    async fn synthesize(&self, text: &str) -> Result<Vec<i16>>;
}

/// What `synthesize_or_silence` produced.
#[derive(Debug)]
pub enum Synthesized {
    Speech(Vec<i16>),
    /// Synthesis failed; `silence` stands in for the reply.
    Fallback { silence: Vec<i16>, error: VoxscreenError },
}

/// Synthesize, substituting `fallback` worth of silence on failure.
pub async fn synthesize_or_silence(
    synthesizer: &dyn SpeechSynthesizer,
    text: &str,
    fallback: Duration,
) -> Synthesized {
    match synthesizer.synthesize(text).await {
        Ok(pcm) => Synthesized::Speech(pcm),
        Err(error) => {
            let samples = (fallback.as_secs_f64() * PCM_SAMPLE_RATE as f64).round() as usize;
            Synthesized::Fallback {
                silence: vec![0; samples],
                error,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpSynthesizerConfig {
    pub url: String,
    pub speaker: String,
    /// Rate the engine renders at.
    pub sample_rate: u32,
    pub timeout: Duration,
}

impl Default for HttpSynthesizerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8020/tts".into(),
            speaker: "xenia".into(),
            sample_rate: 48_000,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    speaker: &'a str,
    sample_rate: u32,
}

/// Talks to a synthesis engine that answers with a WAV body.
pub struct HttpSynthesizer {
    config: HttpSynthesizerConfig,
    http: reqwest::Client,
}

impl HttpSynthesizer {
    pub fn new(config: HttpSynthesizerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| VoxscreenError::Config(format!("http client: {e}")))?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<i16>> {
        let request = SynthesisRequest {
            text,
            speaker: &self.config.speaker,
            sample_rate: self.config.sample_rate,
        };
        let body = self
            .http
            .post(&self.config.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| VoxscreenError::Synthesis(e.to_string()))?
            .error_for_status()
            .map_err(|e| VoxscreenError::Synthesis(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| VoxscreenError::Synthesis(e.to_string()))?;

        let pcm = decode_wav(&body)?;
        debug!(chars = text.len(), samples = pcm.len(), "synthesized reply");
        Ok(pcm)
    }
}

/// Decode a WAV body into 16 kHz mono s16.
pub fn decode_wav(bytes: &[u8]) -> Result<Vec<i16>> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| VoxscreenError::Synthesis(format!("bad wav: {e}")))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, _) => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| VoxscreenError::Synthesis(format!("wav samples: {e}")))?,
        (SampleFormat::Int, bits) => {
            // Full scale follows the declared depth: 128 for 8-bit, 32768 for 16-bit.
            let scale = (1i64 << (bits.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| VoxscreenError::Synthesis(format!("wav samples: {e}")))?
        }
    };

    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(VoxscreenError::Synthesis("wav header has no channels or rate".into()));
    }
    if interleaved.len() % spec.channels as usize != 0 {
        warn!(samples = interleaved.len(), channels = spec.channels, "truncated wav body");
    }
    let usable = interleaved.len() - interleaved.len() % spec.channels as usize;
    let mut interleaved = interleaved;
    interleaved.truncate(usable);

    let mono = InboundFrame::f32(interleaved, spec.sample_rate, spec.channels).downmix_mono();
    let resampled = resample_buffer(&mono, spec.sample_rate, PCM_SAMPLE_RATE)?;
    Ok(resampled.into_iter().map(f32_to_i16).collect())
}
