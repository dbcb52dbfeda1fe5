// fusillade-engine: Rate limiter and arrival-time model
//
// Admission is arrival-scheduled: each acquire takes the next arrival
// slot and sleeps until it. Uniform arrivals space slots by 1/R; Poisson
// arrivals draw exponential gaps with mean 1/R, so variance is unbounded
// and tolerated.

use crate::error::{EngineError, EngineResult};
use fusillade_config::ArrivalModel;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

struct LimiterState {
    /// Requests per second; 0 disables gating
    rate: f64,
    model: ArrivalModel,
    next_arrival: Option<Instant>,
    rng: StdRng,
}

/// Token-bucket style admission gate shared by all workers
pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(rate: Option<f64>, model: ArrivalModel) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                rate: rate.unwrap_or(0.0),
                model,
                next_arrival: None,
                rng: StdRng::from_entropy(),
            }),
        }
    }

    /// Current instantaneous rate (requests/second)
    pub fn rate(&self) -> f64 {
        self.state.lock().rate
    }

    /// Update the instantaneous rate; the pattern sequencer calls this
    /// while ramps are in progress
    pub fn set_rate(&self, rate: f64) {
        self.state.lock().rate = rate.max(0.0);
    }

    /// Wait for the next arrival slot
    pub async fn acquire(&self, cancel: &CancellationToken) -> EngineResult<()> {
        let slot = {
            let mut state = self.state.lock();
            if state.rate <= 0.0 {
                state.next_arrival = None;
                None
            } else {
                let interval = match state.model {
                    ArrivalModel::Uniform => Duration::from_secs_f64(1.0 / state.rate),
                    ArrivalModel::Poisson => {
                        let exp = Exp::new(state.rate).map_err(|e| {
                            EngineError::ConfigInvalid(format!("bad arrival rate: {}", e))
                        })?;
                        Duration::from_secs_f64(exp.sample(&mut state.rng))
                    }
                };
                let now = Instant::now();
                let slot = match state.next_arrival {
                    Some(next) if next > now => next,
                    _ => now,
                };
                state.next_arrival = Some(slot + interval);
                Some(slot)
            }
        };

        if let Some(slot) = slot {
            let now = Instant::now();
            if slot > now {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(slot)) => {}
                }
            }
        }
        Ok(())
    }
}
