#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{InferenceModel, ModelLoader};
use crate::detect::model::{COCO_CLASS_COUNT, MODEL_INPUT_SIZE};
use crate::error::{InferenceError, ModelOutputError};
use crate::preprocess::ModelInput;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract-based ONNX detector.
///
/// Loads a local single-stage detector with a fixed `[1, 3, S, S]` input and
/// runs it on the CPU. No network I/O happens here; downloads are the model
/// resource's concern.
pub struct TractModel {
    plan: Plan,
    input_size: u32,
    num_classes: usize,
}

impl TractModel {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        num_classes: usize,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let plan = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            plan,
            input_size,
            num_classes,
        })
    }

    fn build_input(&self, input: &ModelInput) -> Result<Tensor> {
        let side = self.input_size as usize;
        let array = tract_ndarray::Array4::from_shape_vec((1, 3, side, side), input.data.clone())
            .context("model input does not match the declared input shape")?;
        Ok(array.into_tensor())
    }
}

impl InferenceModel for TractModel {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn infer(&mut self, input: &ModelInput) -> Result<Vec<f32>, InferenceError> {
        let tensor = self.build_input(input).map_err(InferenceError::Failed)?;
        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")
            .map_err(InferenceError::Failed)?;
        let output = outputs.first().ok_or(ModelOutputError::MissingOutput)?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|_| ModelOutputError::WrongDatumType)?;
        Ok(view.iter().copied().collect())
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size as usize;
        let blank = ModelInput {
            size: self.input_size,
            data: vec![0.0; 3 * side * side],
        };
        self.infer(&blank)
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("warm-up inference failed: {}", e))
    }
}

/// Loads ONNX artifacts with tract.
#[derive(Clone, Debug)]
pub struct TractLoader {
    pub input_size: u32,
    pub num_classes: usize,
}

impl Default for TractLoader {
    fn default() -> Self {
        Self {
            input_size: MODEL_INPUT_SIZE,
            num_classes: COCO_CLASS_COUNT,
        }
    }
}

impl ModelLoader for TractLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn InferenceModel>> {
        Ok(Box::new(TractModel::load(
            path,
            self.input_size,
            self.num_classes,
        )?))
    }
}
