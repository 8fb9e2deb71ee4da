//! Asynchronously loadable model artifact.
//!
//! State machine:
//!
//! ```text
//! NotRequested --request_load--> Downloading --> Loading --> Ready
//!                     |               |             |
//!                     +---------------+-------------+--> Failed --request_load--> ...
//! ```
//!
//! `Downloading` is skipped when the artifact already exists on disk. Loading
//! happens on a background thread so service startup never waits on it; the
//! scheduler picks the model up on the first tick after it turns `Ready`.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use super::backend::{InferenceModel, ModelLoader};
use super::model::ModelHandle;
use crate::config::ModelSettings;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Observable load progress, reported through the service status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelState {
    NotRequested,
    Downloading,
    Loading,
    Ready { backend: String },
    Failed { reason: String },
}

struct Inner {
    state: ModelState,
    handle: Option<ModelHandle>,
}

/// The detector model, as a resource that may or may not be available yet.
pub struct ModelResource {
    settings: ModelSettings,
    loader: Option<Arc<dyn ModelLoader>>,
    inner: Mutex<Inner>,
}

impl ModelResource {
    pub fn new(settings: ModelSettings, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            settings,
            loader: Some(loader),
            inner: Mutex::new(Inner {
                state: ModelState::NotRequested,
                handle: None,
            }),
        }
    }

    /// A resource with no loader: the service always runs heuristically.
    pub fn unavailable() -> Self {
        Self {
            settings: ModelSettings {
                path: Default::default(),
                download_url: None,
            },
            loader: None,
            inner: Mutex::new(Inner {
                state: ModelState::NotRequested,
                handle: None,
            }),
        }
    }

    /// Adopt an already-constructed model.
    pub fn install(&self, model: Box<dyn InferenceModel>) {
        let handle = ModelHandle::new(model);
        let mut inner = self.lock();
        inner.state = ModelState::Ready {
            backend: handle.name().to_string(),
        };
        inner.handle = Some(handle);
    }

    pub fn state(&self) -> ModelState {
        self.lock().state.clone()
    }

    /// The loaded model, if ready.
    pub fn current(&self) -> Option<ModelHandle> {
        self.lock().handle.clone()
    }

    /// Start loading in the background. Returns false when there is nothing to
    /// do: no loader, or a load already in progress or complete.
    pub fn request_load(self: &Arc<Self>) -> bool {
        let Some(loader) = self.loader.clone() else {
            log::info!("model loading unavailable; heuristic detection only");
            return false;
        };
        {
            let mut inner = self.lock();
            match inner.state {
                ModelState::NotRequested | ModelState::Failed { .. } => {
                    inner.state = if self.settings.path.exists() {
                        ModelState::Loading
                    } else {
                        ModelState::Downloading
                    };
                }
                _ => return false,
            }
        }
        let resource = Arc::clone(self);
        std::thread::spawn(move || {
            let outcome = resource.fetch_and_load(loader.as_ref());
            let mut inner = resource.lock();
            match outcome {
                Ok(handle) => {
                    log::info!(
                        "model {} ready ({} backend, {}px input)",
                        resource.settings.path.display(),
                        handle.name(),
                        handle.input_size()
                    );
                    inner.state = ModelState::Ready {
                        backend: handle.name().to_string(),
                    };
                    inner.handle = Some(handle);
                }
                Err(err) => {
                    log::error!("model load failed: {:#}", err);
                    inner.state = ModelState::Failed {
                        reason: format!("{:#}", err),
                    };
                }
            }
        });
        true
    }

    fn fetch_and_load(&self, loader: &dyn ModelLoader) -> Result<ModelHandle> {
        let path = &self.settings.path;
        if !path.exists() {
            let url = self.settings.download_url.as_deref().ok_or_else(|| {
                anyhow!("model file {} missing and no download url", path.display())
            })?;
            log::info!("downloading model from {}", url);
            download_model(url, path)?;
            self.lock().state = ModelState::Loading;
        }
        let mut model = loader.load(path)?;
        model.warm_up().context("model warm-up")?;
        Ok(ModelHandle::new(model))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Download `url` to `dest`, writing to a sibling `.part` file first.
pub fn download_model(url: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create model directory {}", parent.display()))?;
    }
    let response = ureq::AgentBuilder::new()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .get(url)
        .call()
        .with_context(|| format!("download model from {}", url))?;
    let partial = dest.with_extension("part");
    let saved = write_partial(response.into_reader(), &partial, url).and_then(|written| {
        std::fs::rename(&partial, dest)
            .with_context(|| format!("move model into place at {}", dest.display()))?;
        Ok(written)
    });
    match saved {
        Ok(written) => {
            log::info!("model saved to {} ({} bytes)", dest.display(), written);
            Ok(())
        }
        Err(err) => {
            let _ = std::fs::remove_file(&partial);
            Err(err)
        }
    }
}

fn write_partial(mut body: impl io::Read, partial: &Path, url: &str) -> Result<u64> {
    let mut file =
        File::create(partial).with_context(|| format!("create {}", partial.display()))?;
    let written =
        io::copy(&mut body, &mut file).with_context(|| format!("write {}", partial.display()))?;
    if written == 0 {
        return Err(anyhow!("model download from {} was empty", url));
    }
    file.sync_all().context("flush model file")?;
    Ok(written)
}
