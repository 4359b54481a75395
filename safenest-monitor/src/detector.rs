//! Threshold impact classifier with cooldown suppression.
//!
//! # Classification
//!
//! ```text
//!   magnitude > impact threshold          awaiting response,
//!   not awaiting, cooldown elapsed        magnitude < low threshold,
//!            │                            within inactivity window
//!            ▼                                     │
//!         Impact                                   ▼
//!   (arms awaiting_response,                 LowMovement
//!    stamps impact + alert time)
//!
//!   everything else ─────────────────────────► Idle
//! ```
//!
//! The detector only mutates [`DetectorState`]. Scheduling the escalation
//! and notifying anyone is the state machine's job.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::MonitorConfig;
use crate::tracing::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// High-confidence impact; a check-in window must open.
    Impact,

    /// Stillness shortly after an impact. Informational only.
    LowMovement,

    Idle,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Magnitude (m/s²) above which a sample counts as an impact.
    pub impact_threshold: f32,

    /// Magnitude (m/s²) below which a post-impact sample counts as stillness.
    pub low_acceleration_threshold: f32,

    /// How long after an impact stillness is still attributed to it.
    pub inactivity_window: Duration,

    /// Minimum spacing between two alerts, measured from the last alert.
    pub cooldown: Duration,
}

impl From<&MonitorConfig> for DetectorConfig {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            impact_threshold: config.impact_threshold,
            low_acceleration_threshold: config.low_acceleration_threshold,
            inactivity_window: config.inactivity_window,
            cooldown: config.cooldown,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorState {
    /// Time of the impact being confirmed. Cleared once it is older than the
    /// inactivity window, while `awaiting_response` stays set.
    pub last_impact_time: Option<Instant>,

    /// Time of the last alert. Never moves backwards.
    pub last_alert_time: Option<Instant>,

    /// A check-in window is open (or escalation has not yet reset it).
    pub awaiting_response: bool,
}

#[derive(Debug)]
pub struct ImpactDetector {
    config: DetectorConfig,
    state: DetectorState,
}

impl ImpactDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            state: DetectorState::default(),
        }
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    /// Classify one magnitude reading taken at `now`.
    ///
    /// On [`Classification::Impact`] the state is armed before returning, so
    /// a second impact-level sample in the same tick is already suppressed.
    pub fn classify(&mut self, magnitude: f32, now: Instant) -> Classification {
        if magnitude > self.config.impact_threshold && !self.state.awaiting_response {
            if let Some(last_alert) = self.state.last_alert_time {
                let since = now.saturating_duration_since(last_alert);
                if since < self.config.cooldown {
                    debug!(
                        magnitude = %magnitude,
                        since_last_alert_ms = since.as_millis() as u64,
                        "Impact ignored (cooldown)"
                    );
                    return Classification::Idle;
                }
            }

            self.state.last_impact_time = Some(now);
            self.state.last_alert_time = Some(match self.state.last_alert_time {
                Some(previous) => previous.max(now),
                None => now,
            });
            self.state.awaiting_response = true;
            return Classification::Impact;
        }

        if self.state.awaiting_response {
            if let Some(last_impact) = self.state.last_impact_time {
                let dt = now.saturating_duration_since(last_impact);
                if dt > self.config.inactivity_window {
                    trace!("Impact older than inactivity window, clearing");
                    self.state.last_impact_time = None;
                } else if magnitude < self.config.low_acceleration_threshold {
                    debug!(magnitude = %magnitude, "Low movement after impact");
                    return Classification::LowMovement;
                }
            }
        }

        Classification::Idle
    }

    /// Close the check-in window. Returns whether one was open.
    ///
    /// The alert time is kept, so the cooldown still applies afterwards.
    pub fn resolve(&mut self) -> bool {
        let was_awaiting = self.state.awaiting_response;
        self.state.awaiting_response = false;
        self.state.last_impact_time = None;
        was_awaiting
    }
}
