//! Sample-rate conversion.
//!
//! Browsers usually send 48 kHz audio while the recognizer and the VAD run
//! at 16 kHz mono s16. `RateConverter` owns one rubato `FastFixedIn` session
//! for a fixed rate pair and `FrameResampler` slices its output into 20 ms
//! `PcmFrame`s. Equal rates skip rubato entirely.
//!
//! ```ignore
//! let mut resampler = FrameResampler::new();
//! for frame in resampler.push(inbound)? {
//!     link.send(&frame).await?;
//! }
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, warn};

use crate::audio::frame::{f32_to_i16, InboundFrame, PcmFrame, PCM_FRAME_SAMPLES, PCM_SAMPLE_RATE};
use crate::error::{Result, VoxscreenError};

/// Mono f32 converter between two fixed rates.
pub struct RateConverter {
    session: Option<FastFixedIn<f32>>,
    /// Input not yet forming a whole block.
    carry: Vec<f32>,
    block: usize,
    scratch: Vec<Vec<f32>>,
    from_hz: u32,
    to_hz: u32,
}

impl RateConverter {
    /// `block` is the number of input samples rubato consumes per call.
    ///
    /// # Errors
    /// `VoxscreenError::Resampler` for a zero rate or block, or when rubato
    /// rejects the ratio.
    pub fn new(from_hz: u32, to_hz: u32, block: usize) -> Result<Self> {
        if from_hz == 0 || to_hz == 0 || block == 0 {
            return Err(VoxscreenError::Resampler(format!(
                "invalid converter shape: {from_hz} Hz -> {to_hz} Hz, block {block}"
            )));
        }

        let (session, scratch) = if from_hz == to_hz {
            (None, Vec::new())
        } else {
            let session = FastFixedIn::<f32>::new(
                to_hz as f64 / from_hz as f64,
                1.0,
                PolynomialDegree::Cubic,
                block,
                1,
            )
            .map_err(|e| VoxscreenError::Resampler(format!("resampler init: {e}")))?;
            let scratch = vec![vec![0f32; session.output_frames_max()]];
            debug!(from_hz, to_hz, block, "rate converter created");
            (Some(session), scratch)
        };

        Ok(Self {
            session,
            carry: Vec::new(),
            block,
            scratch,
            from_hz,
            to_hz,
        })
    }

    /// Convert `samples`, keeping any partial block for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(session) = self.session.as_mut() else {
            return samples.to_vec();
        };
        self.carry.extend_from_slice(samples);

        let blocks = self.carry.len() / self.block;
        let mut out = Vec::with_capacity(blocks * self.scratch[0].len());
        for block in self.carry.chunks_exact(self.block) {
            match session.process_into_buffer(&[block], &mut self.scratch, None) {
                Ok((_, written)) => out.extend_from_slice(&self.scratch[0][..written]),
                Err(e) => warn!(from_hz = self.from_hz, "rubato rejected a block: {e}"),
            }
        }
        self.carry.drain(..blocks * self.block);
        out
    }

    /// Flush the carried partial block, zero-padded, trimmed to the length
    /// the real samples map to. For the end of a finite buffer.
    pub fn finish(&mut self) -> Vec<f32> {
        if self.session.is_none() || self.carry.is_empty() {
            self.carry.clear();
            return Vec::new();
        }
        let carried = self.carry.len();
        let expected = (carried as u64 * self.to_hz as u64 / self.from_hz as u64) as usize;
        let mut out = self.process(&vec![0.0; self.block - carried]);
        out.truncate(expected);
        out
    }

    pub fn is_passthrough(&self) -> bool {
        self.session.is_none()
    }

    pub fn input_rate(&self) -> u32 {
        self.from_hz
    }
}

/// Resample a complete mono buffer in one go.
pub fn resample_buffer(samples: &[f32], input_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    // 20 ms chunks keep the rubato session small for any rate.
    let chunk = (input_rate as usize / 50).max(1);
    let mut rc = RateConverter::new(input_rate, target_rate, chunk)?;
    let mut out = rc.process(samples);
    out.extend(rc.finish());
    Ok(out)
}

/// Normalises arbitrary inbound frames into fixed 20 ms 16 kHz mono s16 frames.
pub struct FrameResampler {
    converter: Option<RateConverter>,
    /// Converted samples not yet forming a full `PcmFrame`.
    pending: Vec<f32>,
}

impl FrameResampler {
    pub fn new() -> Self {
        Self {
            converter: None,
            pending: Vec::with_capacity(PCM_FRAME_SAMPLES * 2),
        }
    }

    /// Push one inbound frame, returning every complete `PcmFrame` it yields.
    ///
    /// # Errors
    /// `VoxscreenError::MalformedFrame` when the frame has no rate, no channels,
    /// or a sample count that does not divide across its channels. Nothing is
    /// buffered from a rejected frame.
    pub fn push(&mut self, frame: InboundFrame) -> Result<Vec<PcmFrame>> {
        if frame.sample_rate == 0 {
            return Err(VoxscreenError::MalformedFrame("sample rate is zero".into()));
        }
        if frame.frames_per_channel().is_none() {
            return Err(VoxscreenError::MalformedFrame(format!(
                "{} samples do not divide across {} channels",
                frame.samples.len(),
                frame.channels
            )));
        }

        let mono = frame.downmix_mono();
        let converter = self.converter_for(frame.sample_rate)?;
        let converted = converter.process(&mono);
        self.pending.extend_from_slice(&converted);

        let mut out = Vec::with_capacity(self.pending.len() / PCM_FRAME_SAMPLES);
        while self.pending.len() >= PCM_FRAME_SAMPLES {
            let samples: Vec<i16> = self.pending[..PCM_FRAME_SAMPLES]
                .iter()
                .map(|&s| f32_to_i16(s))
                .collect();
            self.pending.drain(..PCM_FRAME_SAMPLES);
            if let Some(pcm) = PcmFrame::new(samples) {
                out.push(pcm);
            }
        }
        Ok(out)
    }

    /// Samples buffered towards the next frame.
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    fn converter_for(&mut self, input_rate: u32) -> Result<&mut RateConverter> {
        let stale = self
            .converter
            .as_ref()
            .map(|c| c.input_rate() != input_rate)
            .unwrap_or(true);
        if stale {
            // Audio the old converter still holds belongs ahead of the new rate.
            if let Some(mut old) = self.converter.take() {
                let tail = old.finish();
                debug!(
                    from = old.input_rate(),
                    input_rate,
                    flushed = tail.len(),
                    "inbound sample rate changed, rebuilding converter"
                );
                self.pending.extend_from_slice(&tail);
            }
            let chunk = (input_rate as usize / 50).max(1);
            self.converter = Some(RateConverter::new(input_rate, PCM_SAMPLE_RATE, chunk)?);
        }
        self.converter
            .as_mut()
            .ok_or_else(|| VoxscreenError::Resampler("converter missing".into()))
    }
}

impl Default for FrameResampler {
    fn default() -> Self {
        Self::new()
    }
}
