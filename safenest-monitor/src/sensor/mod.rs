//! Accelerometer samples and the sources that produce them.
//!
//! A source pushes [`Sample`]s into a [`SampleSink`] at a platform-determined
//! rate. The sink never blocks: when the consumer is behind, samples are
//! dropped rather than stalling the producer. Gaps and irregular intervals
//! are expected and tolerated downstream.

pub mod iio;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::tracing::prelude::*;

/// One tri-axial acceleration reading in m/s².
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub timestamp: Instant,
}

impl Sample {
    pub fn new(x: f32, y: f32, z: f32, timestamp: Instant) -> Self {
        Self { x, y, z, timestamp }
    }

    /// Euclidean norm of the acceleration vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// False if any axis is NaN or infinite (sensor glitch).
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Requested delivery rate, mirroring the usual mobile sensor delay classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SamplingRate {
    Fastest,
    Game,
    Normal,
}

impl SamplingRate {
    /// Nominal interval between samples.
    pub fn period(&self) -> Duration {
        match self {
            SamplingRate::Fastest => Duration::from_millis(5),
            SamplingRate::Game => Duration::from_millis(20),
            SamplingRate::Normal => Duration::from_millis(200),
        }
    }

    pub fn hz(&self) -> u32 {
        (1000 / self.period().as_millis()) as u32
    }
}

impl fmt::Display for SamplingRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingRate::Fastest => write!(f, "fastest"),
            SamplingRate::Game => write!(f, "game"),
            SamplingRate::Normal => write!(f, "normal"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("no accelerometer available: {0}")]
    Unavailable(String),

    #[error("permission denied registering at {rate} rate")]
    PermissionDenied { rate: SamplingRate },

    #[error("sensor I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Non-blocking destination for samples.
///
/// Wraps whatever queue the consumer uses. [`push`](Self::push) returns
/// false when the sample was dropped.
#[derive(Clone)]
pub struct SampleSink(Arc<dyn Fn(Sample) -> bool + Send + Sync>);

impl SampleSink {
    pub fn new(push: impl Fn(Sample) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(push))
    }

    pub fn push(&self, sample: Sample) -> bool {
        (self.0)(sample)
    }
}

impl fmt::Debug for SampleSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SampleSink")
    }
}

/// Live registration with a source.
///
/// Dropping the subscription unsubscribes. The source's producer watches the
/// token and stops delivering once it is cancelled.
#[derive(Debug)]
pub struct SensorSubscription {
    token: CancellationToken,
    rate: SamplingRate,
}

impl SensorSubscription {
    pub fn new(token: CancellationToken, rate: SamplingRate) -> Self {
        Self { token, rate }
    }

    pub fn rate(&self) -> SamplingRate {
        self.rate
    }
}

impl Drop for SensorSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// A push-style accelerometer feed.
#[async_trait]
pub trait AccelerometerSource: Send {
    /// Start delivering samples into `sink` at roughly `rate`.
    ///
    /// Resolves once the source has accepted or refused the rate, so a
    /// refusal can be retried at another one.
    async fn subscribe(
        &mut self,
        rate: SamplingRate,
        sink: SampleSink,
    ) -> Result<SensorSubscription, SensorError>;
}

/// Subscribe at `preferred`, retrying once at `fallback` if the high rate is
/// refused for lack of permission.
///
/// Any other failure, including a refusal at the fallback rate, is returned
/// to the caller, which is expected to keep running without samples.
pub async fn subscribe_with_fallback<S: AccelerometerSource + ?Sized>(
    source: &mut S,
    preferred: SamplingRate,
    fallback: SamplingRate,
    sink: SampleSink,
) -> Result<SensorSubscription, SensorError> {
    match source.subscribe(preferred, sink.clone()).await {
        Ok(subscription) => {
            debug!(rate = %preferred, "Accelerometer registered");
            Ok(subscription)
        }
        Err(SensorError::PermissionDenied { .. }) if fallback != preferred => {
            warn!(
                preferred = %preferred,
                fallback = %fallback,
                "Sensor registration refused; falling back to lower rate"
            );
            let subscription = source.subscribe(fallback, sink).await?;
            debug!(rate = %fallback, "Accelerometer registered (fallback)");
            Ok(subscription)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Source that refuses every rate listed in `denied`.
    struct PickySource {
        denied: Vec<SamplingRate>,
        unavailable: bool,
        attempts: Vec<SamplingRate>,
    }

    #[async_trait]
    impl AccelerometerSource for PickySource {
        async fn subscribe(
            &mut self,
            rate: SamplingRate,
            _sink: SampleSink,
        ) -> Result<SensorSubscription, SensorError> {
            self.attempts.push(rate);
            if self.unavailable {
                return Err(SensorError::Unavailable("none".into()));
            }
            if self.denied.contains(&rate) {
                return Err(SensorError::PermissionDenied { rate });
            }
            Ok(SensorSubscription::new(CancellationToken::new(), rate))
        }
    }

    fn null_sink() -> SampleSink {
        SampleSink::new(|_| true)
    }

    #[test]
    fn should_compute_magnitude() {
        let sample = Sample::new(3.0, 4.0, 12.0, Instant::now());
        assert_eq!(sample.magnitude(), 13.0);
    }

    #[test]
    fn should_flag_non_finite_samples() {
        let now = Instant::now();
        assert!(Sample::new(0.0, 9.8, 0.0, now).is_finite());
        assert!(!Sample::new(f32::NAN, 9.8, 0.0, now).is_finite());
        assert!(!Sample::new(0.0, f32::INFINITY, 0.0, now).is_finite());
    }

    #[test]
    fn should_report_nominal_rates() {
        assert_eq!(SamplingRate::Game.hz(), 50);
        assert_eq!(SamplingRate::Normal.hz(), 5);
        assert_eq!(SamplingRate::Fastest.hz(), 200);
    }

    #[tokio::test]
    async fn should_register_at_preferred_rate_when_allowed() {
        let mut source = PickySource {
            denied: vec![],
            unavailable: false,
            attempts: vec![],
        };

        let sub = subscribe_with_fallback(
            &mut source,
            SamplingRate::Game,
            SamplingRate::Normal,
            null_sink(),
        )
        .await
        .unwrap();

        assert_eq!(sub.rate(), SamplingRate::Game);
        assert_eq!(source.attempts, vec![SamplingRate::Game]);
    }

    #[tokio::test]
    async fn should_fall_back_on_permission_denied() {
        let mut source = PickySource {
            denied: vec![SamplingRate::Game],
            unavailable: false,
            attempts: vec![],
        };

        let sub = subscribe_with_fallback(
            &mut source,
            SamplingRate::Game,
            SamplingRate::Normal,
            null_sink(),
        )
        .await
        .unwrap();

        assert_eq!(sub.rate(), SamplingRate::Normal);
        assert_eq!(
            source.attempts,
            vec![SamplingRate::Game, SamplingRate::Normal]
        );
    }

    #[tokio::test]
    async fn should_give_up_when_fallback_also_refused() {
        let mut source = PickySource {
            denied: vec![SamplingRate::Game, SamplingRate::Normal],
            unavailable: false,
            attempts: vec![],
        };

        let result = subscribe_with_fallback(
            &mut source,
            SamplingRate::Game,
            SamplingRate::Normal,
            null_sink(),
        )
        .await;

        assert!(matches!(
            result,
            Err(SensorError::PermissionDenied {
                rate: SamplingRate::Normal
            })
        ));
    }

    #[tokio::test]
    async fn should_not_retry_when_unavailable() {
        let mut source = PickySource {
            denied: vec![],
            unavailable: true,
            attempts: vec![],
        };

        let result = subscribe_with_fallback(
            &mut source,
            SamplingRate::Game,
            SamplingRate::Normal,
            null_sink(),
        )
        .await;

        assert!(matches!(result, Err(SensorError::Unavailable(_))));
        assert_eq!(source.attempts.len(), 1);
    }

    #[test]
    fn dropping_subscription_cancels_its_token() {
        let token = CancellationToken::new();
        let sub = SensorSubscription::new(token.clone(), SamplingRate::Game);
        assert!(!token.is_cancelled());

        drop(sub);
        assert!(token.is_cancelled());
    }
}
