use std::path::Path;

use anyhow::Result;

use crate::error::InferenceError;
use crate::preprocess::ModelInput;

/// A loaded single-stage detector.
///
/// # Contract
///
/// `infer` receives a `[1, 3, S, S]` planar RGB tensor with values in `[0, 1]`
/// (where `S == input_size()`) and returns the first output tensor flattened
/// row-major: `N` anchors of `4 box + 1 objectness + num_classes()` values,
/// boxes center-format in input pixel space.
///
/// Implementations MUST NOT:
/// - Retain the input tensor beyond the call
/// - Perform network I/O
pub trait InferenceModel: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Side length of the square input.
    fn input_size(&self) -> u32;

    /// Number of class scores per anchor.
    fn num_classes(&self) -> usize;

    fn infer(&mut self, input: &ModelInput) -> Result<Vec<f32>, InferenceError>;

    /// Optional warm-up hook, run once after loading.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Turns a model artifact on disk into a runnable `InferenceModel`.
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn InferenceModel>>;
}
