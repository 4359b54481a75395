//! Offline replay of a capture through the fall detection state machine.
//!
//! The machine runs on a [`ManualTimer`], so a capture spanning minutes
//! replays instantly and deterministically. Escalations are reported at
//! their deadline, not at the next sample.

use std::time::Duration;

use safenest_monitor::alert::{Alert, Effect, RecordingAlertSink};
use safenest_monitor::config::MonitorConfig;
use safenest_monitor::machine::{FallStateMachine, MachineStats, Transition};
use safenest_monitor::sensor::Sample;
use safenest_monitor::timer::ManualTimer;
use safenest_monitor::tracing::prelude::*;
use tokio::time::Instant;

use crate::capture::CaptureRow;

/// Furthest the replay clock is run past its start.
const HORIZON: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mark {
    CheckInOpened { magnitude: f32 },
    Acknowledged,
    AcknowledgeIgnored,
    Escalated,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineEntry {
    pub at_ms: u64,
    pub mark: Mark,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub timeline: Vec<TimelineEntry>,
    pub stats: MachineStats,
    pub effects: Vec<Effect>,
    pub samples: usize,
    pub skipped: usize,
    /// Still waiting for a response when the replay ended.
    pub awaiting_at_end: bool,
}

impl Report {
    pub fn emergencies(&self) -> usize {
        self.effects
            .iter()
            .filter(|e| **e == Effect::Alert(Alert::Emergency))
            .count()
    }
}

enum Input<'a> {
    Sample(&'a CaptureRow),
    Acknowledge,
}

struct Replayer {
    machine: FallStateMachine<ManualTimer, RecordingAlertSink>,
    t0: Instant,
    timeline: Vec<TimelineEntry>,
}

impl Replayer {
    fn at(&self, ms: u64) -> Instant {
        self.t0 + Duration::from_millis(ms).min(HORIZON)
    }

    fn ms(&self, instant: Instant) -> u64 {
        instant.saturating_duration_since(self.t0).as_millis() as u64
    }

    fn mark(&mut self, at_ms: u64, mark: Mark) {
        self.timeline.push(TimelineEntry { at_ms, mark });
    }

    /// Run the clock up to `at_ms`, firing a due escalation on the way.
    fn advance(&mut self, at_ms: u64) {
        let now = self.at(at_ms);
        if let Some(deadline) = self.machine.timer().deadline().filter(|d| *d <= now) {
            if let Some(handle) = self.machine.timer_mut().advance_to(deadline) {
                if self.machine.on_timer_fired(handle) == Some(Transition::Escalated) {
                    let at = self.ms(deadline);
                    self.mark(at, Mark::Escalated);
                }
            }
        }
        self.machine.timer_mut().advance_to(now);
    }

    fn apply(&mut self, at_ms: u64, input: Input<'_>) -> bool {
        self.advance(at_ms);

        match input {
            Input::Sample(row) => {
                let sample = Sample::new(row.x, row.y, row.z, self.at(at_ms));
                if !sample.is_finite() {
                    warn!(at_ms, "Skipping non-finite sample");
                    return false;
                }
                let outcome = self.machine.on_sample(&sample);
                match outcome.transition {
                    Some(Transition::CheckInOpened) => self.mark(
                        at_ms,
                        Mark::CheckInOpened {
                            magnitude: sample.magnitude(),
                        },
                    ),
                    // Timer could not be armed.
                    Some(Transition::Escalated) => self.mark(at_ms, Mark::Escalated),
                    Some(Transition::Resolved) | None => {}
                }
            }
            Input::Acknowledge => {
                let mark = match self.machine.acknowledge() {
                    Some(_) => Mark::Acknowledged,
                    None => Mark::AcknowledgeIgnored,
                };
                self.mark(at_ms, mark);
            }
        }
        true
    }
}

/// Replay `rows`, acknowledging at each of `acks_ms`, then run the clock
/// to `until_ms` (default: last input plus the escalation delay).
pub fn run(
    config: &MonitorConfig,
    rows: &[CaptureRow],
    acks_ms: &[u64],
    until_ms: Option<u64>,
) -> Report {
    let t0 = Instant::now();
    let alerts = RecordingAlertSink::new();
    let mut replayer = Replayer {
        machine: FallStateMachine::new(config, ManualTimer::new(t0), alerts.clone()),
        t0,
        timeline: Vec::new(),
    };

    let mut acks = acks_ms.to_vec();
    acks.sort_unstable();

    // Samples and acknowledgements merged by time; a sample wins a tie.
    let mut inputs: Vec<(u64, Input<'_>)> = rows
        .iter()
        .map(|row| (row.timestamp_ms, Input::Sample(row)))
        .chain(acks.iter().map(|&ms| (ms, Input::Acknowledge)))
        .collect();
    inputs.sort_by_key(|(ms, input)| (*ms, matches!(input, Input::Acknowledge)));

    let last_ms = inputs.last().map_or(0, |(ms, _)| *ms);
    let mut samples = 0;
    let mut skipped = 0;
    for (at_ms, input) in inputs {
        let is_sample = matches!(input, Input::Sample(_));
        let applied = replayer.apply(at_ms, input);
        if is_sample {
            if applied {
                samples += 1;
            } else {
                skipped += 1;
            }
        }
    }

    let delay_ms = u64::try_from(config.escalation_delay.as_millis()).unwrap_or(u64::MAX);
    let default_end = last_ms.saturating_add(delay_ms);
    replayer.advance(until_ms.unwrap_or(default_end));

    Report {
        awaiting_at_end: replayer.machine.detector_state().awaiting_response,
        stats: replayer.machine.stats(),
        timeline: replayer.timeline,
        effects: alerts.effects(),
        samples,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(samples: &[(u64, f32)]) -> Vec<CaptureRow> {
        samples
            .iter()
            .map(|&(timestamp_ms, magnitude)| CaptureRow {
                timestamp_ms,
                x: 0.0,
                y: 0.0,
                z: magnitude,
            })
            .collect()
    }

    fn marks(report: &Report) -> Vec<(u64, Mark)> {
        report.timeline.iter().map(|e| (e.at_ms, e.mark)).collect()
    }

    const FALL: &[(u64, f32)] = &[(0, 2.0), (10, 3.0), (20, 45.0), (30, 2.0), (1020, 2.0)];

    #[test]
    fn should_resolve_when_acknowledged_in_time() {
        let report = run(&MonitorConfig::default(), &rows(FALL), &[5000], None);

        assert_eq!(
            marks(&report),
            vec![
                (20, Mark::CheckInOpened { magnitude: 45.0 }),
                (5000, Mark::Acknowledged),
            ]
        );
        assert_eq!(report.emergencies(), 0);
        assert!(!report.awaiting_at_end);
    }

    #[test]
    fn should_escalate_at_deadline_without_acknowledge() {
        let report = run(&MonitorConfig::default(), &rows(FALL), &[], None);

        assert_eq!(
            marks(&report),
            vec![
                (20, Mark::CheckInOpened { magnitude: 45.0 }),
                (15_020, Mark::Escalated),
            ]
        );
        assert_eq!(report.emergencies(), 1);
        assert_eq!(report.stats.escalations, 1);
    }

    #[test]
    fn should_report_open_window_when_cut_short() {
        let report = run(&MonitorConfig::default(), &rows(FALL), &[], Some(2000));

        assert_eq!(report.emergencies(), 0);
        assert!(report.awaiting_at_end);
    }

    #[test]
    fn should_suppress_impact_within_cooldown() {
        let report = run(
            &MonitorConfig::default(),
            &rows(&[(0, 45.0), (2000, 45.0)]),
            &[100],
            None,
        );

        assert_eq!(report.stats.impacts, 1);
        assert_eq!(
            marks(&report),
            vec![
                (0, Mark::CheckInOpened { magnitude: 45.0 }),
                (100, Mark::Acknowledged),
            ]
        );
    }

    #[test]
    fn should_note_late_acknowledge_as_ignored() {
        let report = run(&MonitorConfig::default(), &rows(&[(0, 45.0)]), &[20_000], None);

        assert_eq!(
            marks(&report),
            vec![
                (0, Mark::CheckInOpened { magnitude: 45.0 }),
                (15_000, Mark::Escalated),
                (20_000, Mark::AcknowledgeIgnored),
            ]
        );
        assert_eq!(report.emergencies(), 1);
    }

    #[test]
    fn should_skip_non_finite_samples() {
        let report = run(
            &MonitorConfig::default(),
            &rows(&[(0, f32::NAN), (10, 2.0)]),
            &[],
            None,
        );

        assert_eq!(report.samples, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.timeline.is_empty());
    }

    #[test]
    fn should_survive_unbounded_escalation_delay() {
        let config = MonitorConfig {
            escalation_delay: Duration::from_millis(u64::MAX),
            ..MonitorConfig::default()
        };

        let report = run(&config, &rows(&[(10, 1.0)]), &[], None);
        assert_eq!(report.samples, 1);
        assert!(report.timeline.is_empty());

        let report = run(&config, &rows(&[(0, 45.0)]), &[], Some(u64::MAX));
        assert_eq!(report.stats.impacts, 1);
        assert!(report.emergencies() <= 1);
    }
}
