use serde::Serialize;

use super::model::ModelHandle;
use super::model_resource::ModelResource;

/// Detection strategy for a single tick.
#[derive(Clone, Debug)]
pub enum Strategy {
    Heuristic,
    Model(ModelHandle),
}

/// Strategy discriminant, for status reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Heuristic,
    Model,
}

impl Strategy {
    /// Choose for this tick: the model when it is ready, the heuristic otherwise.
    /// Called every tick so a model that finishes loading mid-run is adopted.
    pub fn select(models: &ModelResource) -> Self {
        match models.current() {
            Some(handle) => Strategy::Model(handle),
            None => Strategy::Heuristic,
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Heuristic => StrategyKind::Heuristic,
            Strategy::Model(_) => StrategyKind::Model,
        }
    }
}
