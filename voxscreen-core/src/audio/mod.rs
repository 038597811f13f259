//! Audio formats and normalisation.
//!
//! Everything downstream of `FrameResampler` sees only `PcmFrame`:
//! mono, signed 16-bit, 16 kHz, 320 samples.

pub mod frame;
pub mod resample;

pub use frame::{InboundFrame, PcmFrame, PCM_FRAME_MS, PCM_FRAME_SAMPLES, PCM_SAMPLE_RATE};
pub use resample::{FrameResampler, RateConverter};
