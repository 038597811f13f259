//! Voice Activity Detection (VAD).
//!
//! The `VoiceActivityDetector` trait is the extensibility point: `EnergyVad`
//! is the default, `SileroVad` (feature `onnx`) is the neural option.
//! `VoiceActivityGate` is what the pipeline calls; it guards the detector so
//! that bad input or detector faults always read as "not speech".

pub mod energy;

#[cfg(feature = "onnx")]
pub mod silero;

#[cfg(feature = "onnx")]
pub use silero::SileroVad;

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

use crate::audio::frame::{PcmFrame, PCM_FRAME_SAMPLES};

/// Whether a given audio frame contains speech or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    Speech,
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

/// Trait for all VAD implementations.
///
/// Implementors may be stateful (hangover counters, RNN hidden states, etc.).
pub trait VoiceActivityDetector: Send + 'static {
    /// Analyse one 20 ms frame and return a speech/silence decision.
    fn classify(&mut self, frame: &PcmFrame) -> VadDecision;

    /// Reset any internal state.
    fn reset(&mut self);
}

/// Builds one detector per session.
pub type VadFactory = std::sync::Arc<dyn Fn() -> Box<dyn VoiceActivityDetector> + Send + Sync>;

/// Speech/silence classifier the pipeline talks to.
pub struct VoiceActivityGate {
    detector: Box<dyn VoiceActivityDetector>,
}

impl VoiceActivityGate {
    pub fn new(detector: Box<dyn VoiceActivityDetector>) -> Self {
        Self { detector }
    }

    /// `true` when the frame holds speech.
    ///
    /// Never fails: a frame of the wrong size or a panicking detector yields
    /// `false`, which the caller counts as silence.
    pub fn classify(&mut self, frame: &PcmFrame) -> bool {
        if frame.samples().len() != PCM_FRAME_SAMPLES {
            return false;
        }
        let detector = &mut self.detector;
        match catch_unwind(AssertUnwindSafe(|| detector.classify(frame))) {
            Ok(decision) => decision.is_speech(),
            Err(_) => {
                error!("VAD detector panicked; treating frame as silence");
                self.detector.reset();
                false
            }
        }
    }
}
