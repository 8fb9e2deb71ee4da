//! Model-based strategy: tensor in, decoded animal candidates out.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use anyhow::anyhow;

use super::backend::InferenceModel;
use super::result::{BoundingBox, Candidate};
use crate::error::{InferenceError, ModelOutputError};
use crate::frame::PixelBuffer;
use crate::preprocess::to_model_input;

/// Input side length of the bundled 80-class detector.
pub const MODEL_INPUT_SIZE: u32 = 640;
/// Class count of the bundled detector (COCO).
pub const COCO_CLASS_COUNT: usize = 80;
/// Values per anchor preceding the class scores: `cx, cy, w, h, objectness`.
pub const ANCHOR_HEADER_LEN: usize = 5;

/// COCO class ids reported as animals, with their labels.
pub const ANIMAL_CLASSES: &[(usize, &str)] = &[
    (14, "bird"),
    (15, "cat"),
    (16, "dog"),
    (17, "horse"),
    (18, "sheep"),
    (19, "cow"),
    (20, "elephant"),
    (21, "bear"),
    (22, "zebra"),
    (23, "giraffe"),
];

/// Shared, cloneable handle to a loaded model.
///
/// The model sits behind a mutex; an inference that overruns its timeout keeps
/// holding it, and later ticks see `InferenceError::Busy` until it finishes.
#[derive(Clone)]
pub struct ModelHandle {
    name: &'static str,
    input_size: u32,
    num_classes: usize,
    model: Arc<Mutex<Box<dyn InferenceModel>>>,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("name", &self.name)
            .field("input_size", &self.input_size)
            .field("num_classes", &self.num_classes)
            .finish()
    }
}

impl ModelHandle {
    pub fn new(model: Box<dyn InferenceModel>) -> Self {
        Self {
            name: model.name(),
            input_size: model.input_size(),
            num_classes: model.num_classes(),
            model: Arc::new(Mutex::new(model)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Run inference on a helper thread, giving up after `timeout`.
    pub fn infer_with_timeout(
        &self,
        frame: &PixelBuffer,
        timeout: Duration,
    ) -> Result<Vec<f32>, InferenceError> {
        let input = to_model_input(frame, self.input_size);
        let model = Arc::clone(&self.model);
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let result = match model.try_lock() {
                Ok(mut guard) => guard.infer(&input),
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().infer(&input),
                Err(TryLockError::WouldBlock) => Err(InferenceError::Busy),
            };
            let _ = tx.send(result);
        });
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(InferenceError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(InferenceError::Failed(anyhow!(
                "inference thread exited without a result"
            ))),
        }
    }
}

/// Model strategy for one tick.
pub struct ModelDetector<'a> {
    handle: &'a ModelHandle,
    timeout: Duration,
}

impl<'a> ModelDetector<'a> {
    pub fn new(handle: &'a ModelHandle, timeout: Duration) -> Self {
        Self { handle, timeout }
    }

    pub fn detect(
        &self,
        frame: &PixelBuffer,
        threshold: f32,
    ) -> Result<Vec<Candidate>, InferenceError> {
        let output = self.handle.infer_with_timeout(frame, self.timeout)?;
        let candidates = decode_output(
            &output,
            self.handle.num_classes(),
            self.handle.input_size(),
            threshold,
            ANIMAL_CLASSES,
        )?;
        Ok(candidates)
    }
}

/// Decode flat per-anchor records into normalized candidates.
///
/// Anchors below `threshold` objectness, below `threshold` combined
/// (objectness x best class score) confidence, or whose best class is not in
/// `classes` are dropped.
pub fn decode_output(
    output: &[f32],
    num_classes: usize,
    input_size: u32,
    threshold: f32,
    classes: &[(usize, &str)],
) -> Result<Vec<Candidate>, ModelOutputError> {
    let record = ANCHOR_HEADER_LEN + num_classes;
    if num_classes == 0 || output.len() % record != 0 {
        return Err(ModelOutputError::MisalignedOutput {
            len: output.len(),
            record,
        });
    }
    let scale = input_size as f32;
    let mut candidates = Vec::new();
    for anchor in output.chunks_exact(record) {
        let objectness = anchor[4];
        if objectness < threshold {
            continue;
        }
        let Some((class_id, class_score)) = anchor[ANCHOR_HEADER_LEN..]
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, score)| match best {
                Some((_, top)) if top >= score => best,
                _ => Some((i, score)),
            })
        else {
            continue;
        };
        let confidence = objectness * class_score;
        if confidence < threshold {
            continue;
        }
        let Some(&(_, label)) = classes.iter().find(|(id, _)| *id == class_id) else {
            continue;
        };
        let bbox = BoundingBox::from_center(
            anchor[0] / scale,
            anchor[1] / scale,
            anchor[2] / scale,
            anchor[3] / scale,
        )
        .clamped();
        candidates.push(Candidate::new(label, confidence, bbox));
    }
    Ok(candidates)
}
