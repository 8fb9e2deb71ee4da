//! Scheduler and lifecycle controller.
//!
//! ```text
//! Idle --start--> Running --stop--> Idle
//!                    |
//!                    +--(failure_limit consecutive fetch failures)--> Error --stop--> Idle
//! ```
//!
//! Each `start` spawns one scheduler thread that owns a fresh `Pipeline`; ticks
//! on that thread run strictly one after another. `stop` drops the thread's
//! wake-up channel and raises its cancel flag, then waits for any delivery in
//! progress to finish, so no subscriber hears from a run after `stop` returns.
//! The thread itself is not joined: a fetch or inference still in flight runs
//! to its own timeout and its result is discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;

use crate::config::{Settings, SettingsUpdate, WatchConfig};
use crate::detect::backends::default_loader;
use crate::detect::{Detection, ModelResource, ModelState, Strategy, StrategyKind};
use crate::error::ServiceError;
use crate::ingest::{FrameSource, SnapshotSource};
use crate::notify::{NotificationBus, SubscriptionId};
use crate::pipeline::Pipeline;

const DEFAULT_FAILURE_LIMIT: u32 = 5;
const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Idle,
    Running,
    Error,
}

/// Read-only snapshot returned by `status`.
#[derive(Clone, Debug, Serialize)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub last_error: Option<String>,
    /// Incremented on every successful `start`.
    pub generation: u64,
    pub ticks_processed: u64,
    pub frames_analyzed: u64,
    pub detections_published: u64,
    /// Epoch milliseconds of the last published batch.
    pub last_detection_ms: Option<u64>,
    pub subscriber_count: usize,
    pub model: ModelState,
    pub last_strategy: Option<StrategyKind>,
    pub settings: Settings,
}

/// `{success, message}` reply for a route layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
}

impl ControlResponse {
    pub fn from_result(result: Result<(), ServiceError>, on_success: &str) -> Self {
        match result {
            Ok(()) => Self {
                success: true,
                message: on_success.to_string(),
            },
            Err(err) => err.into(),
        }
    }
}

impl From<ServiceError> for ControlResponse {
    fn from(err: ServiceError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
        }
    }
}

/// Policy knobs that are fixed for the lifetime of a service.
#[derive(Clone, Debug)]
pub struct ServiceOptions {
    /// Consecutive failed fetches that move a running service to `Error`.
    pub failure_limit: u32,
    pub inference_timeout: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            failure_limit: DEFAULT_FAILURE_LIMIT,
            inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
        }
    }
}

#[derive(Default)]
struct Counters {
    ticks_processed: u64,
    frames_analyzed: u64,
    detections_published: u64,
    last_detection_ms: Option<u64>,
    last_strategy: Option<StrategyKind>,
}

struct Control {
    state: ServiceState,
    settings: Settings,
    last_error: Option<String>,
    generation: u64,
    counters: Counters,
}

struct Shared {
    source: Arc<dyn FrameSource>,
    models: Arc<ModelResource>,
    bus: NotificationBus,
    options: ServiceOptions,
    control: Mutex<Control>,
    /// Held for the duration of each `publish`; `stop` takes it to wait one out.
    delivery: Mutex<()>,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn delivery(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Worker {
    cancel: Arc<AtomicBool>,
    // Dropping the sender wakes the scheduler thread and ends its loop.
    _wake: Sender<()>,
    thread: JoinHandle<()>,
}

impl Worker {
    fn thread_id(&self) -> ThreadId {
        self.thread.thread().id()
    }

    fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

/// A periodic detection service bound to one camera.
///
/// Independent instances share nothing; each owns its settings, its state,
/// its subscriber registry and, while running, its scheduler thread.
pub struct DetectionService {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl DetectionService {
    /// Heuristic-only service.
    pub fn new(settings: Settings, source: Arc<dyn FrameSource>) -> Self {
        Self::with_options(
            settings,
            source,
            Arc::new(ModelResource::unavailable()),
            ServiceOptions::default(),
        )
    }

    pub fn with_options(
        settings: Settings,
        source: Arc<dyn FrameSource>,
        models: Arc<ModelResource>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                models,
                bus: NotificationBus::new(),
                options,
                control: Mutex::new(Control {
                    state: ServiceState::Idle,
                    settings,
                    last_error: None,
                    generation: 0,
                    counters: Counters::default(),
                }),
                delivery: Mutex::new(()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// HTTP snapshot source plus whichever model backend this build carries.
    pub fn from_config(config: &WatchConfig) -> Self {
        let models = match default_loader() {
            Some(loader) => ModelResource::new(config.model.clone(), loader),
            None => ModelResource::unavailable(),
        };
        Self::with_options(
            config.settings.clone(),
            Arc::new(SnapshotSource::default()),
            Arc::new(models),
            ServiceOptions {
                failure_limit: config.failure_limit,
                ..ServiceOptions::default()
            },
        )
    }

    /// Probe the camera once, then begin ticking every `poll_interval_ms`.
    pub fn start(&self) -> Result<(), ServiceError> {
        let settings = {
            let control = self.shared.control();
            match control.state {
                ServiceState::Running => return Err(ServiceError::AlreadyRunning),
                ServiceState::Error => return Err(ServiceError::Faulted),
                ServiceState::Idle => {}
            }
            control.settings.clone()
        };
        settings
            .validate()
            .map_err(|e| ServiceError::InvalidSettings(e.to_string()))?;

        let probe = self
            .shared
            .source
            .fetch_frame(&settings.camera_url)
            .map_err(|err| {
                log::warn!("camera probe against {} failed: {}", settings.camera_url, err);
                ServiceError::CameraUnreachable(err)
            })?;
        log::info!(
            "camera probe ok: {} bytes from {}",
            probe.byte_len(),
            probe.source_url
        );

        let mut control = self.shared.control();
        if control.state != ServiceState::Idle {
            return Err(ServiceError::AlreadyRunning);
        }
        let generation = control.generation + 1;
        let worker = spawn_worker(Arc::clone(&self.shared), generation, &control.settings)
            .map_err(ServiceError::Spawn)?;
        control.generation = generation;
        control.state = ServiceState::Running;
        control.last_error = None;
        log::info!(
            "detection service started (run {}, every {} ms)",
            generation,
            control.settings.poll_interval_ms
        );
        // Installed under the control lock so a concurrent stop always finds it.
        if let Some(stale) = self.worker().replace(worker) {
            stale.cancel();
        }
        Ok(())
    }

    /// Cancel the scheduler and return to `Idle`.
    ///
    /// Safe to call from inside a subscriber callback; the in-progress
    /// delivery completes but nothing after it does.
    pub fn stop(&self) -> Result<(), ServiceError> {
        let worker = {
            let mut control = self.shared.control();
            if control.state == ServiceState::Idle {
                return Err(ServiceError::NotRunning);
            }
            let worker = self.worker().take();
            if let Some(worker) = &worker {
                worker.cancel();
            }
            control.state = ServiceState::Idle;
            worker
        };

        if let Some(worker) = worker {
            if worker.thread_id() != std::thread::current().id() {
                drop(self.shared.delivery());
            }
        }
        log::info!("detection service stopped");
        Ok(())
    }

    /// Apply a partial settings update.
    ///
    /// A changed camera URL or poll interval on a running service triggers a
    /// `stop` and `start`, which also resets the cooldown and the motion
    /// reference frame. If the restart probe fails the service stays `Idle`
    /// with the new settings.
    pub fn update_settings(&self, update: SettingsUpdate) -> Result<(), ServiceError> {
        let restart = {
            let mut control = self.shared.control();
            let merged = update.merged_with(&control.settings);
            merged
                .validate()
                .map_err(|e| ServiceError::InvalidSettings(e.to_string()))?;
            let restart = control.state == ServiceState::Running
                && update.requires_restart(&control.settings);
            control.settings = merged;
            restart
        };
        if restart {
            log::info!("camera settings changed; restarting detection service");
            self.stop()?;
            self.start()?;
        }
        Ok(())
    }

    pub fn status(&self) -> ServiceStatus {
        let control = self.shared.control();
        ServiceStatus {
            state: control.state,
            last_error: control.last_error.clone(),
            generation: control.generation,
            ticks_processed: control.counters.ticks_processed,
            frames_analyzed: control.counters.frames_analyzed,
            detections_published: control.counters.detections_published,
            last_detection_ms: control.counters.last_detection_ms,
            subscriber_count: self.shared.bus.subscriber_count(),
            model: self.shared.models.state(),
            last_strategy: control.counters.last_strategy,
            settings: control.settings.clone(),
        }
    }

    pub fn state(&self) -> ServiceState {
        self.shared.control().state
    }

    pub fn settings(&self) -> Settings {
        self.shared.control().settings.clone()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&[Detection]) -> Result<()> + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.bus.unsubscribe(id)
    }

    pub fn models(&self) -> &Arc<ModelResource> {
        &self.shared.models
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DetectionService {
    fn drop(&mut self) {
        if let Some(worker) = self.worker().take() {
            worker.cancel();
        }
    }
}

fn spawn_worker(
    shared: Arc<Shared>,
    generation: u64,
    settings: &Settings,
) -> std::io::Result<Worker> {
    let cancel = Arc::new(AtomicBool::new(false));
    let (wake, wait) = mpsc::channel();
    let run = Run {
        pipeline: Pipeline::new(settings, shared.options.inference_timeout),
        shared,
        generation,
        cancel: Arc::clone(&cancel),
        consecutive_failures: 0,
    };
    let interval = settings.poll_interval();
    let thread = std::thread::Builder::new()
        .name(format!("watch-scheduler-{}", generation))
        .spawn(move || run.scheduler_loop(wait, interval))?;
    Ok(Worker {
        cancel,
        _wake: wake,
        thread,
    })
}

enum TickFlow {
    Continue,
    Halt,
}

/// State owned by one scheduler thread.
struct Run {
    shared: Arc<Shared>,
    pipeline: Pipeline,
    generation: u64,
    cancel: Arc<AtomicBool>,
    consecutive_failures: u32,
}

impl Run {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// True while this run is the service's current, running generation.
    fn owns(&self, control: &Control) -> bool {
        control.generation == self.generation && control.state == ServiceState::Running
    }

    fn scheduler_loop(mut self, wait: Receiver<()>, interval: Duration) {
        let mut next_tick = Instant::now() + interval;
        loop {
            let remaining = next_tick.saturating_duration_since(Instant::now());
            match wait.recv_timeout(remaining) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            if self.cancelled() {
                break;
            }
            if let TickFlow::Halt = self.tick() {
                break;
            }
            // A tick that overran the interval starts the next one immediately,
            // never more than one to catch up.
            next_tick = (next_tick + interval).max(Instant::now());
        }
        log::debug!("scheduler run {} exited", self.generation);
    }

    fn tick(&mut self) -> TickFlow {
        let settings = self.shared.control().settings.clone();

        let frame = match self.shared.source.fetch_frame(&settings.camera_url) {
            Ok(frame) => {
                self.consecutive_failures = 0;
                frame
            }
            Err(err) => return self.fetch_failed(err.to_string()),
        };

        let strategy = Strategy::select(&self.shared.models);
        let outcome = self
            .pipeline
            .process(&frame, &settings, &strategy, Instant::now());
        if self.cancelled() {
            return TickFlow::Halt;
        }

        let mut published = 0;
        if !outcome.detections.is_empty() {
            let _delivery = self.shared.delivery();
            if self.cancelled() {
                return TickFlow::Halt;
            }
            let report = self.shared.bus.publish(&outcome.detections);
            log::info!(
                "published {} detection(s) via {:?} to {} subscriber(s) ({} failed)",
                outcome.detections.len(),
                outcome.strategy,
                report.delivered,
                report.failed
            );
            published = outcome.detections.len() as u64;
        }

        let mut control = self.shared.control();
        if !self.owns(&control) {
            return TickFlow::Halt;
        }
        let counters = &mut control.counters;
        counters.ticks_processed += 1;
        counters.frames_analyzed += 1;
        counters.last_strategy = Some(outcome.strategy);
        if published > 0 {
            counters.detections_published += published;
            counters.last_detection_ms = Some(frame.timestamp_ms());
        }
        TickFlow::Continue
    }

    fn fetch_failed(&mut self, reason: String) -> TickFlow {
        self.consecutive_failures += 1;
        let limit = self.shared.options.failure_limit;
        log::warn!(
            "tick skipped: {} ({}/{} consecutive failures)",
            reason,
            self.consecutive_failures,
            limit
        );

        let mut control = self.shared.control();
        if !self.owns(&control) || self.cancelled() {
            return TickFlow::Halt;
        }
        control.counters.ticks_processed += 1;
        if self.consecutive_failures < limit {
            return TickFlow::Continue;
        }
        control.state = ServiceState::Error;
        control.last_error = Some(format!(
            "camera unreachable for {} consecutive ticks: {}",
            self.consecutive_failures, reason
        ));
        log::error!(
            "detection service entering error state after {} failed fetches",
            self.consecutive_failures
        );
        TickFlow::Halt
    }
}
