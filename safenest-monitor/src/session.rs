//! Monitoring session actor.
//!
//! A [`Session`] owns the [`FallStateMachine`], the accelerometer
//! subscription and the keep-alive guard. Everything that can change
//! detector state (samples, escalation timer fires and the
//! start/stop/acknowledge commands) arrives on a single bounded queue and
//! is applied in arrival order on the session task. Nothing else touches
//! the machine, so no transition ever runs concurrently with another.
//!
//! Samples are offered to the queue without waiting and are dropped (and
//! counted) when it is full. Commands and timer fires wait for space.
//!
//! Callers talk to the session through the cloneable [`Monitor`] handle.
//! Each command is idempotent: starting a running session, stopping a
//! stopped one or acknowledging with no check-in open changes nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::alert::AlertSink;
use crate::api_client::types::{MonitorState, SensorStatus};
use crate::config::MonitorConfig;
use crate::detector::Classification;
use crate::error::{Error, Result};
use crate::keep_alive::{KeepAliveGuard, WakeLock};
use crate::machine::FallStateMachine;
use crate::sensor::{
    AccelerometerSource, Sample, SampleSink, SensorSubscription, subscribe_with_fallback,
};
use crate::timer::{TimerHandle, TokioTimer};
use crate::tracing::prelude::*;

enum Event {
    Sample(Sample),
    TimerFired(TimerHandle),
    Command(Command),
}

enum Command {
    Start { reply: oneshot::Sender<MonitorState> },
    Stop { reply: oneshot::Sender<MonitorState> },
    Acknowledge { reply: oneshot::Sender<bool> },
    Snapshot { reply: oneshot::Sender<MonitorState> },
}

/// Resources held between `start` and `stop`. Dropping this unsubscribes
/// from the sensor and releases the wake lock.
struct ActiveMonitoring {
    subscription: Option<SensorSubscription>,
    sensor: SensorStatus,
    _keep_alive: Option<KeepAliveGuard>,
}

pub struct Session<S, A> {
    config: MonitorConfig,
    machine: FallStateMachine<TokioTimer<Event>, A>,
    source: S,
    wake_lock: Arc<dyn WakeLock>,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    active: Option<ActiveMonitoring>,
    dropped: Arc<AtomicU64>,
    state_tx: watch::Sender<MonitorState>,
}

impl<S: AccelerometerSource, A: AlertSink> Session<S, A> {
    pub fn new(
        config: MonitorConfig,
        source: S,
        alerts: A,
        wake_lock: Arc<dyn WakeLock>,
    ) -> (Self, Monitor) {
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity);
        let (state_tx, state_rx) = watch::channel(MonitorState::default());
        let timer = TokioTimer::new(events_tx.clone(), Event::TimerFired);
        let machine = FallStateMachine::new(&config, timer, alerts);

        let monitor = Monitor {
            events_tx: events_tx.clone(),
            state_rx,
        };
        let session = Self {
            config,
            machine,
            source,
            wake_lock,
            events_tx,
            events_rx,
            active: None,
            dropped: Arc::new(AtomicU64::new(0)),
            state_tx,
        };
        (session, monitor)
    }

    /// Process events until `shutdown` is cancelled. Monitoring is stopped
    /// on the way out, so any open check-in is abandoned without escalating.
    pub async fn run(mut self, shutdown: CancellationToken) {
        debug!("Monitoring session running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    break;
                }
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => self.handle(event).await,
                        None => break,
                    }
                }
            }
        }

        self.stop_monitoring();
        self.publish();
        debug!("Monitoring session exited");
    }

    async fn handle(&mut self, event: Event) {
        match event {
            Event::Sample(sample) => {
                self.on_sample(sample);
                self.publish();
            }
            Event::TimerFired(handle) => {
                self.machine.on_timer_fired(handle);
                self.publish();
            }
            Event::Command(command) => self.on_command(command).await,
        }
    }

    // State is published before replying, so a caller that awaited the
    // reply never reads an older snapshot from the watch channel.
    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Start { reply } => {
                self.start_monitoring().await;
                let _ = reply.send(self.publish());
            }
            Command::Stop { reply } => {
                self.stop_monitoring();
                let _ = reply.send(self.publish());
            }
            Command::Acknowledge { reply } => {
                let resolved = self.machine.acknowledge().is_some();
                self.publish();
                let _ = reply.send(resolved);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.publish());
            }
        }
    }

    fn on_sample(&mut self, sample: Sample) {
        if self.active.is_none() {
            trace!("Sample arrived while stopped, ignoring");
            return;
        }
        if !sample.is_finite() {
            debug!(x = %sample.x, y = %sample.y, z = %sample.z, "Dropping non-finite sample");
            return;
        }

        let outcome = self.machine.on_sample(&sample);
        if outcome.classification == Classification::LowMovement {
            trace!(magnitude = %sample.magnitude(), "Low movement during check-in");
        }
    }

    async fn start_monitoring(&mut self) {
        if self.active.is_some() {
            debug!("Monitoring already running");
            return;
        }

        let keep_alive = match KeepAliveGuard::acquire(Arc::clone(&self.wake_lock)) {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!(error = %e, "Cannot hold wake lock, samples may stop while suspended");
                None
            }
        };

        let sink = self.sample_sink();
        let preferred = self.config.preferred_rate;
        let (subscription, sensor) = match subscribe_with_fallback(
            &mut self.source,
            preferred,
            self.config.fallback_rate,
            sink,
        )
        .await
        {
            Ok(subscription) => {
                let status = if subscription.rate() == preferred {
                    SensorStatus::Active
                } else {
                    SensorStatus::Degraded
                };
                (Some(subscription), status)
            }
            Err(e) => {
                error!(error = %e, "Accelerometer unavailable, monitoring is inert");
                (None, SensorStatus::Unavailable)
            }
        };

        info!(
            sensor = ?sensor,
            rate = ?subscription.as_ref().map(|s| s.rate()),
            "Fall detection monitoring started"
        );

        self.active = Some(ActiveMonitoring {
            subscription,
            sensor,
            _keep_alive: keep_alive,
        });
    }

    fn stop_monitoring(&mut self) {
        let Some(active) = self.active.take() else {
            debug!("Monitoring already stopped");
            return;
        };

        self.machine.shutdown();
        drop(active);
        info!("Fall detection monitoring stopped");
    }

    fn sample_sink(&self) -> SampleSink {
        let tx = self.events_tx.clone();
        let dropped = Arc::clone(&self.dropped);

        SampleSink::new(move |sample| match tx.try_send(Event::Sample(sample)) {
            Ok(()) => true,
            Err(_) => {
                let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if total.is_power_of_two() {
                    warn!(dropped = total, "Session queue full, dropping samples");
                }
                false
            }
        })
    }

    fn snapshot(&self) -> MonitorState {
        let active = self.active.as_ref();

        MonitorState {
            monitoring: active.is_some(),
            phase: self.machine.phase(),
            escalation_pending: self.machine.pending_escalation().is_some(),
            sensor: active.map_or(SensorStatus::Inactive, |a| a.sensor),
            sampling_rate: active
                .and_then(|a| a.subscription.as_ref())
                .map(|s| s.rate()),
            stats: self.machine.stats(),
            dropped_samples: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn publish(&self) -> MonitorState {
        let next = self.snapshot();
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        next
    }
}

/// Handle for controlling a running [`Session`].
#[derive(Clone)]
pub struct Monitor {
    events_tx: mpsc::Sender<Event>,
    state_rx: watch::Receiver<MonitorState>,
}

impl Monitor {
    pub async fn start(&self) -> Result<MonitorState> {
        self.request(|reply| Command::Start { reply }).await
    }

    pub async fn stop(&self) -> Result<MonitorState> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Returns true if this closed an open check-in window.
    pub async fn acknowledge(&self) -> Result<bool> {
        self.request(|reply| Command::Acknowledge { reply }).await
    }

    /// Snapshot taken after every event queued ahead of this request has
    /// been applied.
    pub async fn refresh(&self) -> Result<MonitorState> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Most recently published snapshot, without a round trip.
    pub fn state(&self) -> MonitorState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.state_rx.clone()
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.events_tx
            .send(Event::Command(command(tx)))
            .await
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)
    }
}
