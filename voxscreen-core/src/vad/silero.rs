//! Silero VAD v5 neural voice activity detector.
//!
//! Wraps the Silero VAD ONNX model published at
//! <https://github.com/snakers4/silero-vad>.
//!
//! ## Model I/O (v5)
//!
//! | Name     | Shape       | DType | Direction |
//! |----------|-------------|-------|-----------|
//! | `input`  | `[1, 576]`  | f32   | in        |
//! | `sr`     | `[1]`       | i64   | in        |
//! | `state`  | `[2,1,128]` | f32   | in/out    |
//! | `output` | `[1, 1]`    | f32   | out       |
//! | `stateN` | `[2,1,128]` | f32   | out       |
//!
//! The model consumes 512-sample windows prefixed by the last 64 samples of
//! the previous window. The pipeline delivers 320-sample frames, so samples
//! are carried across calls and each frame reports the decision of the most
//! recently completed window.

use ndarray::{Array1, Array2, Array3};
use ort::session::builder::SessionBuilder;
use ort::session::Session;
use ort::value::Value;
use tracing::{error, info};

use super::{VadDecision, VoiceActivityDetector};
use crate::{
    audio::frame::PcmFrame,
    error::{Result, VoxscreenError},
};

/// New samples per model call at 16 kHz (32 ms).
const WINDOW: usize = 512;
/// Samples of the previous window prepended as context.
const CONTEXT: usize = 64;
/// GRU state: 2 layers × 1 batch × 128 units.
const STATE_SIZE: usize = 256;

fn onnx_err(e: impl std::fmt::Display) -> VoxscreenError {
    VoxscreenError::OnnxSession(e.to_string())
}

/// Neural VAD backed by the Silero v5 ONNX model.
pub struct SileroVad {
    session: Session,
    state: Vec<f32>,
    context: Vec<f32>,
    threshold: f32,
    input_buf: Vec<f32>,
    last_decision: VadDecision,
}

impl SileroVad {
    /// Load the model from `path` with the given speech-probability `threshold`.
    pub fn new(path: impl AsRef<std::path::Path>, threshold: f32) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(VoxscreenError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let session = SessionBuilder::new()
            .map_err(onnx_err)?
            .commit_from_file(path)
            .map_err(onnx_err)?;

        info!(?path, threshold, "SileroVad loaded");

        Ok(Self {
            session,
            state: vec![0.0; STATE_SIZE],
            context: vec![0.0; CONTEXT],
            threshold,
            input_buf: Vec::with_capacity(WINDOW * 2),
            last_decision: VadDecision::Silence,
        })
    }

    /// Run one window through the model, carrying state and context; returns
    /// the speech probability.
    fn run_window(&mut self, window: &[f32]) -> Result<f32> {
        let mut input = Vec::with_capacity(CONTEXT + WINDOW);
        input.extend_from_slice(&self.context);
        input.extend_from_slice(window);

        let input = Array2::<f32>::from_shape_vec((1, CONTEXT + WINDOW), input).map_err(onnx_err)?;
        let sr = Array1::<i64>::from_elem(1, 16_000);
        let state = Array3::<f32>::from_shape_vec((2, 1, 128), self.state.clone()).map_err(onnx_err)?;

        let outputs = self
            .session
            .run(ort::inputs![
                "input" => Value::from_array(input).map_err(onnx_err)?,
                "sr" => Value::from_array(sr).map_err(onnx_err)?,
                "state" => Value::from_array(state).map_err(onnx_err)?,
            ])
            .map_err(onnx_err)?;

        let (_, prob) = outputs["output"]
            .try_extract_tensor::<f32>()
            .map_err(onnx_err)?;
        let (_, next_state) = outputs["stateN"]
            .try_extract_tensor::<f32>()
            .map_err(onnx_err)?;
        self.state = next_state.to_vec();
        self.context.copy_from_slice(&window[WINDOW - CONTEXT..]);

        Ok(prob.first().copied().unwrap_or(0.0))
    }
}

impl VoiceActivityDetector for SileroVad {
    fn classify(&mut self, frame: &PcmFrame) -> VadDecision {
        self.input_buf
            .extend(frame.samples().iter().map(|&s| s as f32 / 32_768.0));

        while self.input_buf.len() >= WINDOW {
            let window: Vec<f32> = self.input_buf.drain(..WINDOW).collect();
            self.last_decision = match self.run_window(&window) {
                Ok(prob) if prob >= self.threshold => VadDecision::Speech,
                Ok(_) => VadDecision::Silence,
                Err(e) => {
                    error!("SileroVad inference error: {e}");
                    VadDecision::Silence
                }
            };
        }

        self.last_decision
    }

    fn reset(&mut self) {
        self.state.iter_mut().for_each(|v| *v = 0.0);
        self.context.iter_mut().for_each(|v| *v = 0.0);
        self.input_buf.clear();
        self.last_decision = VadDecision::Silence;
    }
}
