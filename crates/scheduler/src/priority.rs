//! Priority classification and urgency decay.
//!
//! A pure mapping from an alert to its priority class and decay curve.
//! Decay is data-driven (per-kind hold/horizon parameters), never
//! behavior attached to event subtypes, and scores are recomputed on
//! every scheduling pass rather than cached.

use chrono::Duration;
use nova_core::config::{ClassifierConfig, KindPolicy};
use nova_core::{Alert, PriorityClass};

/// Piecewise-linear urgency falloff.
///
/// Urgency is 1.0 until `hold` after arrival, then falls linearly to 0
/// at `horizon`. Monotonically non-increasing by construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayCurve {
    hold: Duration,
    horizon: Duration,
}

impl DecayCurve {
    pub fn new(hold: Duration, horizon: Duration) -> Self {
        // A degenerate horizon collapses to a step function at `hold`.
        let horizon = horizon.max(hold);
        Self { hold, horizon }
    }

    /// Urgency multiplier in [0, 1] for the given alert age.
    pub fn factor(&self, age: Duration) -> f64 {
        if age <= self.hold {
            return 1.0;
        }
        if age >= self.horizon {
            return 0.0;
        }
        let span = (self.horizon - self.hold).num_milliseconds() as f64;
        let past = (age - self.hold).num_milliseconds() as f64;
        1.0 - past / span
    }
}

/// The classifier's verdict for one alert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Priority {
    pub class: PriorityClass,
    pub decay: DecayCurve,
}

impl Priority {
    /// Time-varying contention score: base class weight times decayed
    /// urgency.
    pub fn score(&self, age: Duration) -> f64 {
        self.class.weight() * self.decay.factor(age)
    }
}

fn demote(class: PriorityClass) -> PriorityClass {
    match class {
        PriorityClass::Critical => PriorityClass::High,
        PriorityClass::High => PriorityClass::Normal,
        PriorityClass::Normal | PriorityClass::Low => PriorityClass::Low,
    }
}

/// Pure classifier: `Alert -> (class, decay curve)`.
pub struct PriorityClassifier {
    config: ClassifierConfig,
}

impl PriorityClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, alert: &Alert) -> Priority {
        let policy = self.config.kinds.get(&alert.kind);

        let (mut class, hold, mut horizon) = match policy {
            Some(KindPolicy {
                class,
                decay_hold_secs,
                decay_horizon_secs,
                ..
            }) => (
                *class,
                Duration::seconds(*decay_hold_secs as i64),
                Duration::seconds(*decay_horizon_secs as i64),
            ),
            // Unrecognized kinds are observable but never win contention.
            None => (PriorityClass::Low, Duration::zero(), Duration::days(1)),
        };

        if let (Some(floor), Some(snr)) =
            (policy.and_then(|p| p.significance_floor), alert.significance)
        {
            if snr < floor {
                class = demote(class);
            }
        }

        // Urgency must reach 0 at or before the alert's expiry.
        if let Some(expires_at) = alert.expires_at {
            let to_expiry = expires_at - alert.received_at;
            if to_expiry < horizon {
                horizon = to_expiry.max(Duration::zero());
            }
        }

        Priority {
            class,
            decay: DecayCurve::new(hold.min(horizon), horizon),
        }
    }
}
