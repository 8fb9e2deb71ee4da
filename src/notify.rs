//! Detection fan-out.
//!
//! Subscribers are kept in a registry keyed by `SubscriptionId`. `publish`
//! snapshots the registry before delivering, so callbacks may subscribe or
//! unsubscribe (themselves included) without disturbing the batch in flight.
//! A callback that returns an error or panics is logged and skipped; the
//! remaining subscribers still receive the batch.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use serde::Serialize;

use crate::detect::Detection;

type Callback = Arc<dyn Fn(&[Detection]) -> Result<()> + Send + Sync>;

/// Opaque handle returned by `subscribe`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SubscriptionId(u64);

/// Outcome of one `publish`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: BTreeMap<SubscriptionId, Callback>,
}

/// Observer registry for confirmed detections.
#[derive(Default)]
pub struct NotificationBus {
    registry: Mutex<Registry>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&[Detection]) -> Result<()> + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry.subscribers.insert(id, Arc::new(callback));
        id
    }

    /// Remove a subscriber. Returns false if the handle was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().subscribers.remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Deliver `detections` to every subscriber registered at call time.
    pub fn publish(&self, detections: &[Detection]) -> DeliveryReport {
        let snapshot: Vec<(SubscriptionId, Callback)> = self
            .lock()
            .subscribers
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        let mut report = DeliveryReport::default();
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(detections))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    log::warn!("subscriber {:?} failed: {:#}", id, err);
                    report.failed += 1;
                }
                Err(_) => {
                    log::error!("subscriber {:?} panicked during delivery", id);
                    report.failed += 1;
                }
            }
        }
        report
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
