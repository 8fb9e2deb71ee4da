use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use image::{ImageFormat, Rgb, RgbImage};

use wildlife_watch::detect::model::COCO_CLASS_COUNT;
use wildlife_watch::error::InferenceError;
use wildlife_watch::preprocess::ModelInput;
use wildlife_watch::{
    DetectionService, FetchError, Frame, FrameSource, InferenceModel, ModelResource,
    ServiceError, ServiceOptions, ServiceState, Settings, SettingsUpdate, StrategyKind,
};

/// Serves the same PNG every call; `fails(n)` decides whether call `n` errors.
/// Call 0 is the start-up camera probe.
struct ScriptedSource {
    frame: Vec<u8>,
    fails: fn(usize) -> bool,
    calls: AtomicUsize,
}

impl ScriptedSource {
    fn scripted(fails: fn(usize) -> bool) -> Arc<Self> {
        Arc::new(Self {
            frame: png([140, 90, 45]),
            fails,
            calls: AtomicUsize::new(0),
        })
    }

    fn healthy() -> Arc<Self> {
        Self::scripted(|_| false)
    }

    fn failing_after_probe() -> Arc<Self> {
        Self::scripted(|n| n >= 1)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FrameSource for ScriptedSource {
    fn fetch_frame(&self, base_url: &str) -> Result<Frame, FetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if (self.fails)(n) {
            return Err(FetchError::NoReachableEndpoint {
                base_url: base_url.to_string(),
                attempts: 5,
            });
        }
        Ok(Frame::new(self.frame.clone(), base_url))
    }
}

struct DeerModel;

impl InferenceModel for DeerModel {
    fn name(&self) -> &'static str {
        "deer-model"
    }
    fn input_size(&self) -> u32 {
        64
    }
    fn num_classes(&self) -> usize {
        COCO_CLASS_COUNT
    }
    fn infer(&mut self, _input: &ModelInput) -> Result<Vec<f32>, InferenceError> {
        let mut record = vec![32.0, 32.0, 16.0, 16.0, 0.9];
        let mut scores = vec![0.0; COCO_CLASS_COUNT];
        scores[19] = 0.95;
        record.extend(scores);
        Ok(record)
    }
}

fn png(rgb: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(48, 32, Rgb(rgb));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

fn fast_settings(cooldown_ms: u64) -> Settings {
    Settings {
        camera_url: "http://camera.test".to_string(),
        poll_interval_ms: 20,
        confidence_threshold: 0.05,
        cooldown_ms,
        ..Settings::default()
    }
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    done()
}

fn counting_subscriber(service: &DetectionService) -> Arc<AtomicUsize> {
    let batches = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&batches);
    service.subscribe(move |detections| {
        assert!(!detections.is_empty());
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    batches
}

#[test]
fn second_start_fails_and_leaves_state_unchanged() {
    let service = DetectionService::new(fast_settings(0), ScriptedSource::healthy());
    service.start().expect("first start");
    let before = service.status();

    assert!(matches!(service.start(), Err(ServiceError::AlreadyRunning)));
    let after = service.status();
    assert_eq!(after.state, ServiceState::Running);
    assert_eq!(after.generation, before.generation);

    service.stop().expect("stop");
    assert_eq!(service.state(), ServiceState::Idle);
    assert!(matches!(service.stop(), Err(ServiceError::NotRunning)));
}

#[test]
fn cooldown_allows_one_batch_per_window() {
    let service = DetectionService::new(fast_settings(60_000), ScriptedSource::healthy());
    let batches = counting_subscriber(&service);
    service.start().expect("start");

    assert!(wait_until(Duration::from_secs(5), || {
        service.status().ticks_processed >= 6
    }));
    assert_eq!(batches.load(Ordering::SeqCst), 1);

    let status = service.status();
    assert_eq!(status.detections_published, 1);
    assert!(status.last_detection_ms.is_some());
    assert_eq!(status.last_strategy, Some(StrategyKind::Heuristic));
    service.stop().expect("stop");
}

#[test]
fn model_becoming_ready_is_adopted_mid_run() {
    let models = Arc::new(ModelResource::unavailable());
    let service = DetectionService::with_options(
        fast_settings(0),
        ScriptedSource::healthy(),
        Arc::clone(&models),
        ServiceOptions::default(),
    );
    let classes = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = Arc::clone(&classes);
    service.subscribe(move |detections| {
        seen.lock().unwrap().extend(detections.iter().map(|d| d.class.clone()));
        Ok(())
    });
    service.start().expect("start");

    assert!(wait_until(Duration::from_secs(5), || {
        service.status().last_strategy == Some(StrategyKind::Heuristic)
    }));
    models.install(Box::new(DeerModel));
    assert!(wait_until(Duration::from_secs(5), || {
        classes.lock().unwrap().iter().any(|c| c == "cow")
    }));
    assert_eq!(service.status().last_strategy, Some(StrategyKind::Model));
    service.stop().expect("stop");
}

#[test]
fn interval_change_restarts_running_service() {
    let source = ScriptedSource::healthy();
    let service = DetectionService::new(fast_settings(0), source.clone());
    service.start().expect("start");
    let probes_before = source.calls();
    assert_eq!(service.status().generation, 1);

    service
        .update_settings(SettingsUpdate {
            poll_interval_ms: Some(5_000),
            ..SettingsUpdate::default()
        })
        .expect("update");

    let status = service.status();
    assert_eq!(status.state, ServiceState::Running);
    assert_eq!(status.generation, 2);
    assert_eq!(status.settings.poll_interval_ms, 5_000);
    assert!(source.calls() > probes_before);

    // A threshold-only change applies in place.
    service
        .update_settings(SettingsUpdate {
            confidence_threshold: Some(0.9),
            ..SettingsUpdate::default()
        })
        .expect("update");
    assert_eq!(service.status().generation, 2);
    service.stop().expect("stop");
}

#[test]
fn repeated_fetch_failures_enter_error_state() {
    let service = DetectionService::with_options(
        fast_settings(0),
        ScriptedSource::failing_after_probe(),
        Arc::new(ModelResource::unavailable()),
        ServiceOptions {
            failure_limit: 3,
            ..ServiceOptions::default()
        },
    );
    service.start().expect("probe succeeds");

    assert!(wait_until(Duration::from_secs(5), || {
        service.state() == ServiceState::Error
    }));
    let status = service.status();
    assert_eq!(status.ticks_processed, 3);
    assert!(status.last_error.is_some());

    assert!(matches!(service.start(), Err(ServiceError::Faulted)));
    service.stop().expect("stop from error");
    assert_eq!(service.state(), ServiceState::Idle);
}

#[test]
fn fetch_failures_under_limit_keep_running() {
    let source = ScriptedSource::scripted(|n| n == 2 || n == 3);
    let service = DetectionService::with_options(
        fast_settings(0),
        source.clone(),
        Arc::new(ModelResource::unavailable()),
        ServiceOptions {
            failure_limit: 5,
            ..ServiceOptions::default()
        },
    );
    service.start().expect("start");

    assert!(wait_until(Duration::from_secs(5), || {
        service.status().ticks_processed >= 5
    }));
    let status = service.status();
    assert_eq!(status.state, ServiceState::Running);
    assert!(status.last_error.is_none());
    // Failed ticks count as processed but analyze nothing.
    assert_eq!(status.ticks_processed - status.frames_analyzed, 2);
    assert!(source.calls() > 4);
    service.stop().expect("stop");
}

#[test]
fn restart_reopens_the_cooldown_window() {
    let service = DetectionService::new(fast_settings(60_000), ScriptedSource::healthy());
    let batches = counting_subscriber(&service);
    service.start().expect("start");
    assert!(wait_until(Duration::from_secs(5), || {
        batches.load(Ordering::SeqCst) == 1
    }));
    let first_batch = Instant::now();

    service
        .update_settings(SettingsUpdate {
            poll_interval_ms: Some(30),
            ..SettingsUpdate::default()
        })
        .expect("update");

    assert!(wait_until(Duration::from_secs(5), || {
        batches.load(Ordering::SeqCst) == 2
    }));
    assert!(first_batch.elapsed() < Duration::from_secs(60));
    assert_eq!(service.status().generation, 2);
    service.stop().expect("stop");
}

#[test]
fn unreachable_camera_fails_start() {
    let service = DetectionService::new(fast_settings(0), ScriptedSource::failing_after_probe());
    service.start().expect("probe succeeds");
    service.stop().expect("stop");

    // The scripted camera is now dead for every call, probes included.
    assert!(matches!(
        service.start(),
        Err(ServiceError::CameraUnreachable(_))
    ));
    assert_eq!(service.state(), ServiceState::Idle);
}

#[test]
fn failing_subscribers_do_not_stop_delivery() {
    let service = DetectionService::new(fast_settings(0), ScriptedSource::healthy());
    service.subscribe(|_| Err(anyhow!("webhook down")));
    service.subscribe(|_| panic!("broken subscriber"));
    let batches = counting_subscriber(&service);
    service.start().expect("start");

    assert!(wait_until(Duration::from_secs(5), || {
        batches.load(Ordering::SeqCst) >= 2
    }));
    assert_eq!(service.state(), ServiceState::Running);
    assert_eq!(service.status().subscriber_count, 3);
    service.stop().expect("stop");
}

#[test]
fn nothing_is_delivered_after_stop() {
    let service = Arc::new(DetectionService::new(
        fast_settings(0),
        ScriptedSource::healthy(),
    ));
    let handle: Weak<DetectionService> = Arc::downgrade(&service);
    let batches = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&batches);
    service.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(service) = handle.upgrade() {
            service.stop()?;
        }
        Ok(())
    });
    service.start().expect("start");

    assert!(wait_until(Duration::from_secs(5), || {
        service.state() == ServiceState::Idle
    }));
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(batches.load(Ordering::SeqCst), 1);
}

#[test]
fn instances_are_independent() {
    let a = DetectionService::new(fast_settings(0), ScriptedSource::healthy());
    let b = DetectionService::new(fast_settings(0), ScriptedSource::healthy());
    a.start().expect("start a");
    assert_eq!(b.state(), ServiceState::Idle);
    b.subscribe(|_| Ok(()));
    assert_eq!(a.status().subscriber_count, 0);
    a.stop().expect("stop a");
}
