mod backend;
pub mod backends;
pub mod heuristic;
pub mod model;
pub mod model_resource;
pub mod postprocess;
mod result;
mod strategy;

pub use backend::{InferenceModel, ModelLoader};
pub use heuristic::{HeuristicDetector, HeuristicScores};
pub use model::{ModelDetector, ModelHandle, ANIMAL_CLASSES};
pub use model_resource::{download_model, ModelResource, ModelState};
pub use postprocess::{iou, nms, postprocess};
pub use result::{BoundingBox, Candidate, Detection};
pub use strategy::{Strategy, StrategyKind};
