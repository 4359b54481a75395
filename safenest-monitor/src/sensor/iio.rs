//! Linux Industrial I/O (IIO) accelerometer source.
//!
//! Reads `in_accel_{x,y,z}_raw` from an IIO device directory under
//! `/sys/bus/iio/devices` and scales them by `in_accel_scale`. Sysfs offers
//! no push interface without buffers and triggers, so samples are polled on
//! a tokio interval at the requested rate.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{AccelerometerSource, Sample, SampleSink, SamplingRate, SensorError, SensorSubscription};
use crate::tracing::prelude::*;

pub const IIO_DEVICES_ROOT: &str = "/sys/bus/iio/devices";

const SAMPLING_FREQUENCY: &str = "sampling_frequency";
const ACCEL_SCALE: &str = "in_accel_scale";
const AXES: [&str; 3] = ["in_accel_x_raw", "in_accel_y_raw", "in_accel_z_raw"];

#[derive(Debug, Clone)]
pub struct IioAccelerometer {
    device: Option<PathBuf>,
}

impl IioAccelerometer {
    /// Use a specific device directory, e.g. `/sys/bus/iio/devices/iio:device0`.
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: Some(device.into()),
        }
    }

    /// Find the first device under `root` that exposes accelerometer
    /// channels. Subscribing to the result fails with
    /// [`SensorError::Unavailable`] when nothing was found.
    pub fn discover(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let device = match std::fs::read_dir(root) {
            Ok(entries) => {
                let mut candidates: Vec<PathBuf> = entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.join(AXES[0]).is_file())
                    .collect();
                candidates.sort();
                candidates.into_iter().next()
            }
            Err(e) => {
                debug!(root = %root.display(), error = %e, "No IIO devices directory");
                None
            }
        };

        match &device {
            Some(dir) => info!(device = %dir.display(), "Found IIO accelerometer"),
            None => warn!(root = %root.display(), "No IIO accelerometer found"),
        }

        Self { device }
    }

    pub fn device(&self) -> Option<&Path> {
        self.device.as_deref()
    }

    async fn set_sampling_frequency(dir: &Path, rate: SamplingRate) -> Result<(), SensorError> {
        let path = dir.join(SAMPLING_FREQUENCY);
        match fs::write(&path, rate.hz().to_string()).await {
            Ok(()) => Ok(()),
            // Fixed-rate devices do not expose the attribute.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(device = %dir.display(), "Device has no sampling_frequency attribute");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                Err(SensorError::PermissionDenied { rate })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_scale(dir: &Path) -> io::Result<f32> {
        match fs::read_to_string(dir.join(ACCEL_SCALE)).await {
            Ok(text) => parse_value(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(1.0),
            Err(e) => Err(e),
        }
    }
}

fn parse_value(text: &str) -> io::Result<f32> {
    text.trim()
        .parse::<f32>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

async fn read_axes(dir: &Path, scale: f32) -> io::Result<[f32; 3]> {
    let mut values = [0.0; 3];
    for (value, axis) in values.iter_mut().zip(AXES) {
        let text = fs::read_to_string(dir.join(axis)).await?;
        *value = parse_value(&text)? * scale;
    }
    Ok(values)
}

async fn has_channels(dir: &Path) -> bool {
    fs::metadata(dir.join(AXES[0]))
        .await
        .is_ok_and(|meta| meta.is_file())
}

#[async_trait]
impl AccelerometerSource for IioAccelerometer {
    async fn subscribe(
        &mut self,
        rate: SamplingRate,
        sink: SampleSink,
    ) -> Result<SensorSubscription, SensorError> {
        let Some(dir) = self.device.clone() else {
            return Err(SensorError::Unavailable("no IIO device".into()));
        };
        if !has_channels(&dir).await {
            return Err(SensorError::Unavailable(format!(
                "{} has no accelerometer channels",
                dir.display()
            )));
        }

        Self::set_sampling_frequency(&dir, rate).await?;
        let scale = Self::read_scale(&dir).await?;

        let token = CancellationToken::new();
        let stop = token.clone();

        tokio::spawn(async move {
            let mut interval = time::interval(rate.period());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut failing = false;

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {
                        match read_axes(&dir, scale).await {
                            Ok([x, y, z]) => {
                                failing = false;
                                sink.push(Sample::new(x, y, z, Instant::now()));
                            }
                            Err(e) => {
                                // Log the first failure of a run, then stay quiet
                                // until a read succeeds again.
                                if !failing {
                                    warn!(device = %dir.display(), error = %e, "Accelerometer read failed");
                                    failing = true;
                                }
                            }
                        }
                    }
                }
            }

            trace!(device = %dir.display(), "IIO poller stopped");
        });

        Ok(SensorSubscription::new(token, rate))
    }
}
