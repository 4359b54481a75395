//! Fall detection monitor daemon.
//!
//! Reads the accelerometer, runs the monitoring session and serves the
//! control API. Monitoring resumes automatically when it was enabled before
//! the daemon last stopped.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use safenest_monitor::alert::{self, ChannelAlertSink};
use safenest_monitor::api::{self, SharedState};
use safenest_monitor::app_event::AppEventBus;
use safenest_monitor::config::DaemonConfig;
use safenest_monitor::keep_alive::{NoopWakeLock, SysfsWakeLock, WakeLock};
use safenest_monitor::prefs::PreferenceStore;
use safenest_monitor::sensor::iio::{IIO_DEVICES_ROOT, IioAccelerometer};
use safenest_monitor::session::Session;
use safenest_monitor::tracing::prelude::*;

const ALERT_QUEUE_CAPACITY: usize = 32;

#[tokio::main]
async fn main() -> Result<()> {
    safenest_monitor::tracing::init_journald_or_stdout();

    let config = DaemonConfig::from_env().context("invalid configuration")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        api = %config.api_bind,
        "Starting SafeNest monitor"
    );

    let source = match &config.iio_device {
        Some(device) => {
            info!(device = %device.display(), "Using configured IIO accelerometer");
            IioAccelerometer::new(device.clone())
        }
        None => IioAccelerometer::discover(IIO_DEVICES_ROOT),
    };

    let sysfs_lock = SysfsWakeLock::new(config.wake_lock_name.clone());
    let wake_lock: Arc<dyn WakeLock> = if sysfs_lock.is_supported() {
        Arc::new(sysfs_lock)
    } else {
        debug!("Kernel wake locks not supported, running without one");
        Arc::new(NoopWakeLock)
    };

    let app_events = AppEventBus::new(config.monitor.app_event_queue_capacity);
    let (alert_tx, alert_rx) = mpsc::channel(ALERT_QUEUE_CAPACITY);
    let dispatcher = tokio::spawn(alert::dispatch(alert_rx, config.alert_hook.clone()));
    let alerts = ChannelAlertSink::new(alert_tx, app_events.clone());

    let shutdown = CancellationToken::new();
    let (session, monitor) = Session::new(config.monitor.clone(), source, alerts, wake_lock);
    let session_task = tokio::spawn(session.run(shutdown.clone()));

    let prefs = Arc::new(PreferenceStore::new(config.prefs_path.clone()));
    if prefs.is_enabled().await {
        info!("Monitoring was enabled before restart, resuming");
        monitor.start().await?;
    }

    let state = SharedState {
        monitor,
        app_events,
        prefs,
    };
    let mut api_task = tokio::spawn(api::serve(config.api_bind, state, shutdown.clone()));

    let early_exit = tokio::select! {
        result = shutdown_signal() => {
            result.context("failed to install signal handlers")?;
            info!("Shutdown requested");
            None
        }
        result = &mut api_task => Some(result),
    };

    shutdown.cancel();
    let api_result = match early_exit {
        Some(result) => result,
        None => api_task.await,
    };

    session_task.await?;
    // The session owned the last alert sender, so the dispatcher drains and
    // exits.
    dispatcher.await?;

    api_result?.context("API server failed")?;
    info!("Stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}
