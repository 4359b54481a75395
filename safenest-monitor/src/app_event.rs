//! Events for the embedding application layer (e.g. a UI).
//!
//! These are independent of notification delivery. The bus queues them
//! until the app layer drains it, so an event raised while no UI is running
//! is still seen when one attaches. Delivery is at-least-once; consumers
//! treat repeated `fallDetected` events idempotently.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::tracing::prelude::*;

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::IntoStaticStr,
)]
#[serde(tag = "event")]
pub enum AppEvent {
    /// A fall was detected. `escalated` is false when the check-in window
    /// opens and true once the emergency alert has gone out.
    #[serde(rename = "fallDetected")]
    #[strum(serialize = "fallDetected")]
    FallDetected { escalated: bool },

    /// One-tap SOS from the home-screen widget. Not produced by the state
    /// machine.
    #[serde(rename = "widgetSOS")]
    #[strum(serialize = "widgetSOS")]
    WidgetSos,
}

impl AppEvent {
    /// The `event` tag this variant is serialized with.
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// Bounded FIFO of pending app-layer events. Cloning shares the queue.
#[derive(Debug, Clone)]
pub struct AppEventBus {
    inner: Arc<Mutex<VecDeque<AppEvent>>>,
    capacity: usize,
}

impl AppEventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    /// Queue an event. When full, the oldest event is discarded.
    pub fn publish(&self, event: AppEvent) {
        let mut queue = self.inner.lock();
        if queue.len() == self.capacity {
            if let Some(dropped) = queue.pop_front() {
                warn!(event = dropped.name(), "App event queue full, dropping oldest");
            }
        }
        debug!(event = event.name(), "App event queued");
        queue.push_back(event);
    }

    /// Route a widget SOS to the app layer.
    pub fn trigger_sos(&self) {
        info!("SOS triggered from widget");
        self.publish(AppEvent::WidgetSos);
    }

    /// Take every pending event, oldest first.
    pub fn drain(&self) -> Vec<AppEvent> {
        self.inner.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
