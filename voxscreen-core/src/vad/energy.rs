//! RMS-threshold detector with a short hangover.
//!
//! A frame whose normalised RMS reaches `threshold` is speech and re-arms the
//! hangover. Quieter frames stay speech while hangover remains, so trailing
//! consonants are not cut off and the silence counter starts a little late.

use super::{VadDecision, VoiceActivityDetector};
use crate::audio::frame::PcmFrame;

#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold: f32,
    hangover: u32,
    remaining: u32,
}

impl EnergyVad {
    /// `threshold` is an RMS level in `[0, 1]`; `hangover` is counted in
    /// 20 ms frames.
    pub fn new(threshold: f32, hangover: u32) -> Self {
        Self {
            threshold,
            hangover,
            remaining: 0,
        }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(0.02, 4)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, frame: &PcmFrame) -> VadDecision {
        if frame.rms() >= self.threshold {
            self.remaining = self.hangover;
            return VadDecision::Speech;
        }
        match self.remaining.checked_sub(1) {
            Some(left) => {
                self.remaining = left;
                VadDecision::Speech
            }
            None => VadDecision::Silence,
        }
    }

    fn reset(&mut self) {
        self.remaining = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::rms_i16;

    fn level(amplitude: i16) -> PcmFrame {
        PcmFrame::padded(vec![amplitude; 320])
    }

    fn run(vad: &mut EnergyVad, frames: &[PcmFrame]) -> Vec<VadDecision> {
        frames.iter().map(|f| vad.classify(f)).collect()
    }

    #[test]
    fn quiet_room_noise_is_silence() {
        let mut vad = EnergyVad::new(0.02, 0);
        // ~0.006 RMS
        assert_eq!(vad.classify(&level(200)), VadDecision::Silence);
        assert_eq!(vad.classify(&PcmFrame::silence()), VadDecision::Silence);
    }

    #[test]
    fn hangover_trails_the_last_loud_frame() {
        use VadDecision::{Silence, Speech};
        let mut vad = EnergyVad::new(0.02, 2);
        let frames = [
            level(9_000),
            PcmFrame::silence(),
            PcmFrame::silence(),
            PcmFrame::silence(),
            level(9_000),
            PcmFrame::silence(),
        ];
        assert_eq!(
            run(&mut vad, &frames),
            vec![Speech, Speech, Speech, Silence, Speech, Speech]
        );
    }

    #[test]
    fn reset_drops_pending_hangover() {
        let mut vad = EnergyVad::default();
        vad.classify(&level(9_000));
        vad.reset();
        assert_eq!(vad.classify(&PcmFrame::silence()), VadDecision::Silence);
    }

    #[test]
    fn full_scale_square_wave_has_half_rms() {
        let samples: Vec<i16> = (0..320).map(|i| if i % 2 == 0 { 16_384 } else { -16_384 }).collect();
        assert!((rms_i16(&samples) - 0.5).abs() < 1e-4);
    }
}
