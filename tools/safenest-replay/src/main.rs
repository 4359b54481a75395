//! Replay accelerometer captures through the fall detection state machine.
//!
//! Useful for tuning thresholds against real recordings: every check-in,
//! acknowledgement and escalation is printed on a timeline, followed by a
//! summary.

mod capture;
mod replay;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use safenest_monitor::config::MonitorConfig;

use crate::replay::{Mark, Report};

#[derive(Parser, Debug)]
#[command(name = "safenest-replay", version, about)]
struct Args {
    /// Capture file (CSV: timestamp_ms,x,y,z)
    capture: PathBuf,

    /// Acknowledge the check-in at this time (ms); repeatable
    #[arg(long = "ack-at-ms", value_name = "MS")]
    ack_at_ms: Vec<u64>,

    /// Keep the clock running until this time (ms)
    #[arg(long, value_name = "MS")]
    until_ms: Option<u64>,

    /// Impact threshold in m/s²
    #[arg(long)]
    impact_threshold: Option<f32>,

    /// Low-movement threshold in m/s²
    #[arg(long)]
    low_threshold: Option<f32>,

    /// Cooldown between alerts (ms)
    #[arg(long, value_name = "MS")]
    cooldown_ms: Option<u64>,

    /// Delay before escalating an unanswered check-in (ms)
    #[arg(long, value_name = "MS")]
    escalation_delay_ms: Option<u64>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

impl Args {
    fn monitor_config(&self) -> Result<MonitorConfig> {
        let mut config = MonitorConfig::default();
        if let Some(threshold) = self.impact_threshold {
            config.impact_threshold = threshold;
        }
        if let Some(threshold) = self.low_threshold {
            config.low_acceleration_threshold = threshold;
        }
        if let Some(ms) = self.cooldown_ms {
            config.cooldown = Duration::from_millis(ms);
        }
        if let Some(ms) = self.escalation_delay_ms {
            config.escalation_delay = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.no_color {
        colored::control::set_override(false);
    }

    let config = args.monitor_config()?;
    let rows = capture::load(&args.capture)
        .with_context(|| format!("reading {}", args.capture.display()))?;
    tracing::debug!(rows = rows.len(), acks = args.ack_at_ms.len(), "Capture loaded");

    let report = replay::run(&config, &rows, &args.ack_at_ms, args.until_ms);

    print_timeline(&report);
    print_summary(&report, &config);
    Ok(())
}

fn timestamp(ms: u64) -> String {
    format!("{:>10.3}s", ms as f64 / 1000.0)
}

fn print_timeline(report: &Report) {
    if report.timeline.is_empty() {
        println!("{}", "No impacts detected".dimmed());
        return;
    }

    for entry in &report.timeline {
        let at = timestamp(entry.at_ms);
        match entry.mark {
            Mark::CheckInOpened { magnitude } => println!(
                "{} {} (magnitude {:.1} m/s²)",
                at,
                "CHECK-IN".yellow().bold(),
                magnitude
            ),
            Mark::Acknowledged => println!("{} {}", at, "ACKNOWLEDGED".green()),
            Mark::AcknowledgeIgnored => {
                println!("{} {}", at, "acknowledge ignored (no check-in)".dimmed())
            }
            Mark::Escalated => println!("{} {}", at, "EMERGENCY".red().bold()),
        }
    }
}

fn print_summary(report: &Report, config: &MonitorConfig) {
    println!();
    println!(
        "Thresholds: impact > {} m/s², low < {} m/s², cooldown {} ms, escalation {} ms",
        config.impact_threshold,
        config.low_acceleration_threshold,
        config.cooldown.as_millis(),
        config.escalation_delay.as_millis()
    );
    println!(
        "Samples: {} replayed, {} skipped",
        report.samples, report.skipped
    );
    println!(
        "Impacts: {}  Acknowledged: {}  Escalations: {}  Low-movement samples: {}",
        report.stats.impacts,
        report.stats.acknowledgements,
        report.stats.escalations,
        report.stats.low_movement_samples
    );
    if report.emergencies() > 0 {
        println!(
            "{}",
            format!("Emergency alerts raised: {}", report.emergencies()).red()
        );
    }
    if report.awaiting_at_end {
        println!("{}", "Check-in still open when replay ended".yellow());
    }
}
