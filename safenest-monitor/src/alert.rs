//! Outbound effects of the state machine.
//!
//! The core decides *when* to alert; an [`AlertSink`] decides *how*. Sink
//! calls must not block: implementations hand the work to a queue and
//! report failure only when the hand-off itself fails.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::app_event::{AppEvent, AppEventBus};
use crate::tracing::prelude::*;

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("notification delivery failed: {0}")]
    DeliveryFailed(String),
}

pub trait AlertSink: Send {
    /// Post a cancellable "are you okay?" notification offering an
    /// acknowledge action.
    fn notify_check_in(&mut self) -> Result<(), AlertError>;

    /// Remove the check-in notification. Sent after an acknowledge and,
    /// ahead of the emergency, on escalation.
    fn dismiss_check_in(&mut self) -> Result<(), AlertError>;

    /// Post a non-dismissable high-priority alert and ask for the host
    /// application to come to the foreground with the fall-detected flag.
    fn notify_emergency(&mut self) -> Result<(), AlertError>;

    /// Inform the app layer, independently of notifications.
    fn notify_app_layer(&mut self, event: AppEvent) -> Result<(), AlertError>;
}

impl<T: AlertSink + ?Sized> AlertSink for Box<T> {
    fn notify_check_in(&mut self) -> Result<(), AlertError> {
        (**self).notify_check_in()
    }

    fn dismiss_check_in(&mut self) -> Result<(), AlertError> {
        (**self).dismiss_check_in()
    }

    fn notify_emergency(&mut self) -> Result<(), AlertError> {
        (**self).notify_emergency()
    }

    fn notify_app_layer(&mut self, event: AppEvent) -> Result<(), AlertError> {
        (**self).notify_app_layer(event)
    }
}

/// A concrete notification or launch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Alert {
    CheckIn,
    DismissCheckIn,
    Emergency,
    LaunchApp { fall_detected: bool },
}

/// Sink that forwards alerts to a bounded channel and app-layer events to
/// an [`AppEventBus`].
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    alerts: mpsc::Sender<Alert>,
    app_events: AppEventBus,
}

impl ChannelAlertSink {
    pub fn new(alerts: mpsc::Sender<Alert>, app_events: AppEventBus) -> Self {
        Self { alerts, app_events }
    }

    fn send(&self, alert: Alert) -> Result<(), AlertError> {
        let name: &str = alert.as_ref();
        self.alerts
            .try_send(alert)
            .map_err(|e| AlertError::DeliveryFailed(format!("{name}: {e}")))
    }
}

impl AlertSink for ChannelAlertSink {
    fn notify_check_in(&mut self) -> Result<(), AlertError> {
        self.send(Alert::CheckIn)
    }

    fn dismiss_check_in(&mut self) -> Result<(), AlertError> {
        self.send(Alert::DismissCheckIn)
    }

    fn notify_emergency(&mut self) -> Result<(), AlertError> {
        // Both halves are attempted even if the first one fails.
        let emergency = self.send(Alert::Emergency);
        let launch = self.send(Alert::LaunchApp {
            fall_detected: true,
        });
        emergency.and(launch)
    }

    fn notify_app_layer(&mut self, event: AppEvent) -> Result<(), AlertError> {
        self.app_events.publish(event);
        Ok(())
    }
}

/// Anything an [`AlertSink`] was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Alert(Alert),
    App(AppEvent),
}

/// Sink that records effects in memory.
///
/// Clones share the record, so a caller can keep one clone for inspection
/// while the state machine owns another. Used by the replay tool and tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingAlertSink {
    effects: Arc<Mutex<Vec<Effect>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn effects(&self) -> Vec<Effect> {
        self.effects.lock().clone()
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<Effect> {
        std::mem::take(&mut *self.effects.lock())
    }

    pub fn count(&self, effect: &Effect) -> usize {
        self.effects.lock().iter().filter(|e| *e == effect).count()
    }

    /// While failing, every call returns an error and records nothing.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, effects: &[Effect]) -> Result<(), AlertError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AlertError::DeliveryFailed("sink unavailable".into()));
        }
        self.effects.lock().extend_from_slice(effects);
        Ok(())
    }
}

impl AlertSink for RecordingAlertSink {
    fn notify_check_in(&mut self) -> Result<(), AlertError> {
        self.record(&[Effect::Alert(Alert::CheckIn)])
    }

    fn dismiss_check_in(&mut self) -> Result<(), AlertError> {
        self.record(&[Effect::Alert(Alert::DismissCheckIn)])
    }

    fn notify_emergency(&mut self) -> Result<(), AlertError> {
        self.record(&[
            Effect::Alert(Alert::Emergency),
            Effect::Alert(Alert::LaunchApp {
                fall_detected: true,
            }),
        ])
    }

    fn notify_app_layer(&mut self, event: AppEvent) -> Result<(), AlertError> {
        self.record(&[Effect::App(event)])
    }
}

/// Consume alerts until the channel closes.
///
/// Each alert is logged; when `hook` is set it is also run with the alert
/// name in `SAFENEST_ALERT`. Hook failures are logged and otherwise
/// ignored.
pub async fn dispatch(mut alerts: mpsc::Receiver<Alert>, hook: Option<PathBuf>) {
    while let Some(alert) = alerts.recv().await {
        match alert {
            Alert::Emergency => warn!("FALL DETECTED: no response, emergency alert raised"),
            Alert::CheckIn => info!("Check-in: are you okay?"),
            Alert::DismissCheckIn => info!("Check-in dismissed"),
            Alert::LaunchApp { fall_detected } => {
                info!(fall_detected, "Requesting app launch")
            }
        }

        if let Some(hook) = &hook {
            let name: &str = alert.as_ref();
            let mut command = Command::new(hook);
            command.env("SAFENEST_ALERT", name);
            if let Alert::LaunchApp { fall_detected } = alert {
                command.env("SAFENEST_FALL_DETECTED", fall_detected.to_string());
            }
            match command.status().await {
                Ok(status) if status.success() => {}
                Ok(status) => warn!(hook = %hook.display(), %status, "Alert hook failed"),
                Err(e) => warn!(hook = %hook.display(), error = %e, "Alert hook could not run"),
            }
        }
    }

    debug!("Alert channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_alerts_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let bus = AppEventBus::new(4);
        let mut sink = ChannelAlertSink::new(tx, bus.clone());

        sink.notify_check_in().unwrap();
        sink.notify_emergency().unwrap();
        sink.notify_app_layer(AppEvent::FallDetected { escalated: true })
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), Alert::CheckIn);
        assert_eq!(rx.try_recv().unwrap(), Alert::Emergency);
        assert_eq!(
            rx.try_recv().unwrap(),
            Alert::LaunchApp {
                fall_detected: true
            }
        );
        assert_eq!(bus.drain(), vec![AppEvent::FallDetected { escalated: true }]);
    }

    #[test]
    fn full_channel_is_a_delivery_failure() {
        let (tx, _rx) = mpsc::channel(1);
        let mut sink = ChannelAlertSink::new(tx, AppEventBus::new(4));

        sink.notify_check_in().unwrap();
        let err = sink.dismiss_check_in().unwrap_err();
        assert!(err.to_string().contains("dismiss_check_in"));
    }

    #[test]
    fn closed_channel_is_a_delivery_failure() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let mut sink = ChannelAlertSink::new(tx, AppEventBus::new(4));

        assert!(sink.notify_emergency().is_err());
    }

    #[tokio::test]
    async fn dispatch_returns_when_channel_closes() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Alert::CheckIn).await.unwrap();
        drop(tx);

        dispatch(rx, None).await;
    }
}
