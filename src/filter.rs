use crate::pose::AngleVector;
use log::*;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterConfig {
    /// How long the last fresh vector is held before falling back to the default pose.
    pub staleness_timeout: Duration,
    /// Smallest per-value change in degrees that is worth sending.
    pub change_threshold: i32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            staleness_timeout: Duration::from_millis(700),
            change_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TelemetryState {
    last_valid: Option<(AngleVector, Instant)>,
    last_sent: Option<AngleVector>,
}

impl TelemetryState {
    pub fn last_valid(&self) -> Option<&AngleVector> {
        self.last_valid.as_ref().map(|(vector, _)| vector)
    }

    pub fn last_sent(&self) -> Option<&AngleVector> {
        self.last_sent.as_ref()
    }
}

/// Where the vector of a tick came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Held,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickDecision {
    pub vector: AngleVector,
    pub freshness: Freshness,
    pub transmit: bool,
}

/// Decides each tick what the actuator should see and whether it needs to
/// be told again.
#[derive(Debug, Clone, Default)]
pub struct TelemetryFilter {
    config: FilterConfig,
    state: TelemetryState,
}

impl TelemetryFilter {
    pub fn new(config: FilterConfig) -> Self {
        TelemetryFilter {
            config,
            state: TelemetryState::default(),
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn state(&self) -> &TelemetryState {
        &self.state
    }

    pub fn tick(&mut self, candidate: &AngleVector, now: Instant) -> TickDecision {
        let (vector, freshness) = if is_fresh(candidate) {
            self.state.last_valid = Some((candidate.clone(), now));
            (candidate.clone(), Freshness::Fresh)
        } else {
            match &self.state.last_valid {
                Some((held, captured))
                    if now.saturating_duration_since(*captured) < self.config.staleness_timeout =>
                {
                    (held.clone(), Freshness::Held)
                }
                _ => (AngleVector::default_pose(), Freshness::Fallback),
            }
        };

        let transmit = match &self.state.last_sent {
            None => true,
            Some(sent) => differs(sent, &vector, self.config.change_threshold),
        };
        if transmit {
            self.state.last_sent = Some(vector.clone());
        } else {
            trace!("Change below threshold, not sending");
        }

        TickDecision {
            vector,
            freshness,
            transmit,
        }
    }

    /// Makes the next tick send regardless of the threshold, used after a
    /// failed delivery.
    pub fn forget_sent(&mut self) {
        self.state.last_sent = None;
    }

    pub fn reset(&mut self) {
        self.state = TelemetryState::default();
    }
}

fn is_fresh(candidate: &AngleVector) -> bool {
    candidate.is_well_formed() && candidate.values().iter().any(|value| *value != 0)
}

fn differs(sent: &AngleVector, vector: &AngleVector, threshold: i32) -> bool {
    sent.len() != vector.len()
        || sent
            .values()
            .iter()
            .zip(vector.values())
            .any(|(a, b)| a.abs_diff(*b) >= threshold.unsigned_abs())
}
