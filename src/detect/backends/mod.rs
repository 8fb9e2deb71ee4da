#[cfg(feature = "backend-tract")]
pub mod tract;

#[cfg(feature = "backend-tract")]
pub use tract::{TractLoader, TractModel};

use std::sync::Arc;

use super::backend::ModelLoader;

/// The loader compiled into this build, if any.
pub fn default_loader() -> Option<Arc<dyn ModelLoader>> {
    #[cfg(feature = "backend-tract")]
    {
        Some(Arc::new(TractLoader::default()))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        None
    }
}
