//! Runtime configuration.
//!
//! Defaults are the reference tuning. Each field can be overridden from the
//! environment (`SAFENEST_*`), which is how the daemon is configured under
//! systemd.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::sensor::SamplingRate;

/// Upper bound for every configured delay and window.
pub const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Impact threshold (m/s²). Roughly 4g; ordinary movement and setting
    /// the device down stay well below it.
    pub impact_threshold: f32,

    /// Post-impact stillness threshold (m/s²).
    pub low_acceleration_threshold: f32,

    /// Window after an impact in which stillness is attributed to it.
    pub inactivity_window: Duration,

    /// Minimum spacing between alerts. The check-in copy mentions 15
    /// seconds; that is the escalation window, not this value.
    pub cooldown: Duration,

    /// How long the user has to acknowledge a check-in before escalation.
    pub escalation_delay: Duration,

    /// Sampling rate requested first.
    pub preferred_rate: SamplingRate,

    /// Sampling rate used when the preferred one is refused.
    pub fallback_rate: SamplingRate,

    /// Capacity of the session's event queue. Samples beyond it are dropped.
    pub event_queue_capacity: usize,

    /// App-layer events kept while no UI drains them.
    pub app_event_queue_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            impact_threshold: 40.0,
            low_acceleration_threshold: 5.0,
            inactivity_window: Duration::from_millis(1_000),
            cooldown: Duration::from_millis(5_000),
            escalation_delay: Duration::from_millis(15_000),
            preferred_rate: SamplingRate::Game,
            fallback_rate: SamplingRate::Normal,
            event_queue_capacity: 256,
            app_event_queue_capacity: 64,
        }
    }
}

impl MonitorConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<f32>("SAFENEST_IMPACT_THRESHOLD")? {
            config.impact_threshold = v;
        }
        if let Some(v) = env_parse::<f32>("SAFENEST_LOW_ACCELERATION_THRESHOLD")? {
            config.low_acceleration_threshold = v;
        }
        if let Some(ms) = env_parse::<u64>("SAFENEST_COOLDOWN_MS")? {
            config.cooldown = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("SAFENEST_ESCALATION_DELAY_MS")? {
            config.escalation_delay = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.impact_threshold > 0.0) {
            return Err(ConfigError::Invalid(
                "impact threshold must be positive".into(),
            ));
        }
        if !(self.low_acceleration_threshold > 0.0) {
            return Err(ConfigError::Invalid(
                "low acceleration threshold must be positive".into(),
            ));
        }
        if self.low_acceleration_threshold >= self.impact_threshold {
            return Err(ConfigError::Invalid(format!(
                "low acceleration threshold ({}) must be below impact threshold ({})",
                self.low_acceleration_threshold, self.impact_threshold
            )));
        }
        if self.escalation_delay.is_zero() {
            return Err(ConfigError::Invalid(
                "escalation delay must be non-zero".into(),
            ));
        }
        for (name, value) in [
            ("inactivity window", self.inactivity_window),
            ("cooldown", self.cooldown),
            ("escalation delay", self.escalation_delay),
        ] {
            if value > MAX_DELAY {
                return Err(ConfigError::Invalid(format!(
                    "{name} of {value:?} exceeds the {MAX_DELAY:?} limit"
                )));
            }
        }
        if self.event_queue_capacity == 0 || self.app_event_queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue capacities must be non-zero".into()));
        }
        Ok(())
    }
}

/// Daemon-level settings around the monitor itself.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub monitor: MonitorConfig,

    /// Address the HTTP API listens on.
    pub api_bind: SocketAddr,

    /// Where the "monitoring enabled" flag is persisted.
    pub prefs_path: PathBuf,

    /// IIO device directory. Discovered when unset.
    pub iio_device: Option<PathBuf>,

    /// Kernel wake lock name.
    pub wake_lock_name: String,

    /// Executable run for each alert, receiving it in `SAFENEST_ALERT`.
    pub alert_hook: Option<PathBuf>,
}

pub const DEFAULT_API_BIND: &str = "127.0.0.1:7786";
const DEFAULT_PREFS_PATH: &str = "/var/lib/safenest/prefs.json";
const DEFAULT_WAKE_LOCK: &str = "safenest-fall-detection";

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            api_bind: SocketAddr::from(([127, 0, 0, 1], 7786)),
            prefs_path: PathBuf::from(DEFAULT_PREFS_PATH),
            iio_device: None,
            wake_lock_name: DEFAULT_WAKE_LOCK.to_string(),
            alert_hook: None,
        }
    }
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self {
            monitor: MonitorConfig::from_env()?,
            ..Self::default()
        };

        if let Some(addr) = env_parse::<SocketAddr>("SAFENEST_API_BIND")? {
            config.api_bind = addr;
        }
        if let Some(path) = env_parse::<PathBuf>("SAFENEST_PREFS_PATH")? {
            config.prefs_path = path;
        }
        config.iio_device = env_parse::<PathBuf>("SAFENEST_IIO_DEVICE")?;
        if let Some(name) = env_parse::<String>("SAFENEST_WAKE_LOCK")? {
            config.wake_lock_name = name;
        }
        config.alert_hook = env_parse::<PathBuf>("SAFENEST_ALERT_HOOK")?;

        Ok(config)
    }
}

/// Parse an environment variable, treating unset or empty as absent.
fn env_parse<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(None),
    }
}
