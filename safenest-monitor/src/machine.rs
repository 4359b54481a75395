//! The fall-detection state machine.
//!
//! # State Machine
//!
//! ```text
//!            Impact                            acknowledge()
//!   Idle ────────────► AwaitingConfirmation ───────────────► Idle
//!    ▲   check-in,            │                 cancel timer,
//!    │   arm timer            │ timer fired     dismiss check-in
//!    │                        ▼
//!    └──────────────────── Escalated
//!          (transient: retract check-in, emergency alert, launch app)
//! ```
//!
//! The machine is synchronous and owns all of its state. It must be driven
//! from a single execution context: samples, acknowledgements and timer
//! fires are applied one at a time in arrival order (see
//! [`session`](crate::session)).
//!
//! While a window is open exactly one escalation handle is live. Escalation
//! clears it, so a late acknowledge finds the machine idle and is a no-op.
//! A failed alert delivery is logged and counted but never blocks a
//! transition.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::alert::{AlertError, AlertSink};
use crate::app_event::AppEvent;
use crate::config::MonitorConfig;
use crate::detector::{Classification, DetectorConfig, DetectorState, ImpactDetector};
use crate::sensor::Sample;
use crate::timer::{EscalationTimer, TimerHandle};
use crate::tracing::prelude::*;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    AwaitingConfirmation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Idle -> AwaitingConfirmation
    CheckInOpened,

    /// AwaitingConfirmation -> Idle, acknowledged
    Resolved,

    /// AwaitingConfirmation -> Idle, emergency raised
    Escalated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleOutcome {
    pub classification: Classification,
    pub transition: Option<Transition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MachineStats {
    pub impacts: u64,
    pub escalations: u64,
    pub acknowledgements: u64,
    pub low_movement_samples: u64,
    pub failed_deliveries: u64,
}

pub struct FallStateMachine<T, A> {
    detector: ImpactDetector,
    timer: T,
    alerts: A,
    escalation_delay: Duration,
    pending: Option<TimerHandle>,
    stats: MachineStats,
}

impl<T: EscalationTimer, A: AlertSink> FallStateMachine<T, A> {
    pub fn new(config: &MonitorConfig, timer: T, alerts: A) -> Self {
        Self {
            detector: ImpactDetector::new(DetectorConfig::from(config)),
            timer,
            alerts,
            escalation_delay: config.escalation_delay,
            pending: None,
            stats: MachineStats::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        if self.detector.state().awaiting_response {
            Phase::AwaitingConfirmation
        } else {
            Phase::Idle
        }
    }

    pub fn detector_state(&self) -> &DetectorState {
        self.detector.state()
    }

    pub fn stats(&self) -> MachineStats {
        self.stats
    }

    /// The live escalation handle, if a check-in window is open.
    pub fn pending_escalation(&self) -> Option<TimerHandle> {
        self.pending
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    pub fn alerts(&self) -> &A {
        &self.alerts
    }

    pub fn on_sample(&mut self, sample: &Sample) -> SampleOutcome {
        let magnitude = sample.magnitude();
        let classification = self.detector.classify(magnitude, sample.timestamp);

        let transition = match classification {
            Classification::Impact => Some(self.open_check_in(magnitude)),
            Classification::LowMovement => {
                self.stats.low_movement_samples += 1;
                None
            }
            Classification::Idle => None,
        };

        SampleOutcome {
            classification,
            transition,
        }
    }

    /// The user confirmed they are okay. A no-op unless a window is open.
    pub fn acknowledge(&mut self) -> Option<Transition> {
        if !self.detector.resolve() {
            debug!("Acknowledge with no open check-in, ignoring");
            return None;
        }

        if let Some(handle) = self.pending.take() {
            self.timer.cancel(handle);
        }
        self.deliver("dismiss_check_in", |a| a.dismiss_check_in());
        self.stats.acknowledgements += 1;

        info!("User acknowledged they're okay");
        Some(Transition::Resolved)
    }

    /// An escalation timer fired. Handles other than the live one are stale
    /// (cancelled or superseded) and ignored.
    pub fn on_timer_fired(&mut self, handle: TimerHandle) -> Option<Transition> {
        if self.pending != Some(handle) {
            debug!(timer = handle.id(), "Ignoring stale escalation timer");
            return None;
        }
        self.pending = None;
        Some(self.escalate())
    }

    /// Abandon any open window, e.g. when monitoring stops. Raises nothing.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.pending.take() {
            self.timer.cancel(handle);
        }
        if self.detector.resolve() {
            info!("Monitoring stopped with a check-in open; escalation cancelled");
        }
    }

    fn open_check_in(&mut self, magnitude: f32) -> Transition {
        self.stats.impacts += 1;
        info!(magnitude = %magnitude, "Impact detected, asking for check-in");

        if let Some(stale) = self.pending.take() {
            self.timer.cancel(stale);
        }

        self.deliver("fall_detected", |a| {
            a.notify_app_layer(AppEvent::FallDetected { escalated: false })
        });
        self.deliver("check_in", |a| a.notify_check_in());

        match self.timer.schedule(self.escalation_delay) {
            Ok(handle) => {
                debug!(
                    timer = handle.id(),
                    delay_ms = self.escalation_delay.as_millis() as u64,
                    "Escalation scheduled"
                );
                self.pending = Some(handle);
                Transition::CheckInOpened
            }
            Err(e) => {
                // Without a timer nobody would ever close this window.
                error!(error = %e, "Cannot arm escalation timer, escalating now");
                self.escalate()
            }
        }
    }

    fn escalate(&mut self) -> Transition {
        self.detector.resolve();
        self.stats.escalations += 1;
        warn!("No response within window, escalating");

        self.deliver("fall_detected", |a| {
            a.notify_app_layer(AppEvent::FallDetected { escalated: true })
        });
        self.deliver("dismiss_check_in", |a| a.dismiss_check_in());
        self.deliver("emergency", |a| a.notify_emergency());

        Transition::Escalated
    }

    fn deliver(&mut self, effect: &'static str, f: impl FnOnce(&mut A) -> Result<(), AlertError>) {
        if let Err(e) = f(&mut self.alerts) {
            self.stats.failed_deliveries += 1;
            warn!(effect, error = %e, "Alert delivery failed");
        }
    }
}
