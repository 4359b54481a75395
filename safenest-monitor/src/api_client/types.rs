//! API data transfer objects.
//!
//! These types define the API contract shared between the server and
//! clients.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::machine::{MachineStats, Phase};
use crate::sensor::SamplingRate;

/// Snapshot of the monitoring session.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct MonitorState {
    /// True between `start` and `stop`, even if the sensor is unavailable.
    pub monitoring: bool,
    pub phase: Phase,
    pub escalation_pending: bool,
    pub sensor: SensorStatus,
    /// Rate the accelerometer actually registered at.
    pub sampling_rate: Option<SamplingRate>,
    pub stats: MachineStats,
    /// Samples discarded because the session queue was full.
    pub dropped_samples: u64,
}

/// Accelerometer registration status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SensorStatus {
    #[default]
    Inactive,
    Active,
    /// Registered, but only at the fallback rate.
    Degraded,
    /// No accelerometer. Monitoring runs but classifies nothing.
    Unavailable,
}

/// Result of an acknowledge request.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct AcknowledgeResponse {
    /// False if no check-in window was open.
    pub resolved: bool,
}
