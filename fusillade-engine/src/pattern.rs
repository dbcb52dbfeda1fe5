// fusillade-engine: Load pattern phases
//
// A schedule is a list of phases advancing monotonically in wall-clock
// time. The scheduler samples rate_at() at a fine granularity and feeds
// the result to the rate limiter, so ramps approximate their nominal
// integral.

use fusillade_config::{LoadPattern, LoadStep};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    Constant,
    Ramp,
    Step,
    /// Semantically a constant hold; distinguished for reporting
    Spike,
}

/// One resolved segment of the load schedule
#[derive(Debug, Clone)]
pub struct Phase {
    pub kind: PhaseKind,
    pub from_rps: f64,
    pub to_rps: f64,
    pub duration: Duration,
}

impl Phase {
    fn rate_at(&self, into: Duration) -> f64 {
        match self.kind {
            PhaseKind::Ramp => {
                let frac = (into.as_secs_f64() / self.duration.as_secs_f64()).min(1.0);
                self.from_rps + (self.to_rps - self.from_rps) * frac
            }
            _ => self.from_rps,
        }
    }
}

/// The full phase sequence of a run
#[derive(Debug, Clone)]
pub struct PatternSchedule {
    phases: Vec<Phase>,
}

impl PatternSchedule {
    /// Resolve configured patterns; None when none are configured
    pub fn from_config(patterns: &[LoadPattern]) -> Option<Self> {
        if patterns.is_empty() {
            return None;
        }

        let mut phases = Vec::new();
        for pattern in patterns {
            match pattern {
                LoadPattern::Constant { rps, duration_s } => phases.push(Phase {
                    kind: PhaseKind::Constant,
                    from_rps: *rps,
                    to_rps: *rps,
                    duration: Duration::from_secs(*duration_s),
                }),
                LoadPattern::Spike { rps, duration_s } => phases.push(Phase {
                    kind: PhaseKind::Spike,
                    from_rps: *rps,
                    to_rps: *rps,
                    duration: Duration::from_secs(*duration_s),
                }),
                LoadPattern::Ramp {
                    from_rps,
                    to_rps,
                    duration_s,
                } => phases.push(Phase {
                    kind: PhaseKind::Ramp,
                    from_rps: *from_rps,
                    to_rps: *to_rps,
                    duration: Duration::from_secs(*duration_s),
                }),
                LoadPattern::Step { steps } => {
                    for LoadStep { rps, duration_s } in steps {
                        phases.push(Phase {
                            kind: PhaseKind::Step,
                            from_rps: *rps,
                            to_rps: *rps,
                            duration: Duration::from_secs(*duration_s),
                        });
                    }
                }
            }
        }
        Some(Self { phases })
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Sum of all phase durations
    pub fn total_duration(&self) -> Duration {
        self.phases.iter().map(|p| p.duration).sum()
    }

    /// Target rate at an instant into the run; None once all phases are
    /// consumed
    pub fn rate_at(&self, elapsed: Duration) -> Option<f64> {
        let mut offset = Duration::ZERO;
        for phase in &self.phases {
            let end = offset + phase.duration;
            if elapsed < end {
                return Some(phase.rate_at(elapsed - offset));
            }
            offset = end;
        }
        None
    }
}
