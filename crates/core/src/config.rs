//! Configuration for the Nova service.
//!
//! All contention and backoff parameters are policy, not semantics, so
//! every one of them is a config field with a default. A deployment can
//! run from a TOML file or entirely from defaults.

use crate::types::{EventKind, PriorityClass};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NovaConfig {
    pub feed: FeedConfig,
    pub classifier: ClassifierConfig,
    pub scheduler: SchedulerPolicy,
    pub dispatch: DispatchPolicy,
    pub archive: ArchiveConfig,
    pub ops: OpsConfig,
    pub telescopes: Vec<TelescopeConfig>,
}

/// Alert feed consumption parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Broker address (`host:port`) serving newline-delimited JSON
    /// notices. Unset means no live feed; the node still serves the
    /// ops surface.
    pub endpoint: Option<String>,
    /// Dedup retention window in seconds. Notices older than this are
    /// assumed final and are not re-checked.
    pub dedup_window_secs: u64,
    /// First reconnect delay after a feed disconnect, milliseconds.
    pub reconnect_base_ms: u64,
    /// Reconnect delay ceiling, milliseconds.
    pub reconnect_cap_ms: u64,
    /// Two triggers within this angular distance...
    pub duplicate_match_radius_deg: f64,
    /// ...and this many seconds of each other are the same transient.
    pub duplicate_match_window_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            dedup_window_secs: 86_400,
            reconnect_base_ms: 1_000,
            reconnect_cap_ms: 300_000,
            duplicate_match_radius_deg: 0.5,
            duplicate_match_window_secs: 1_800,
        }
    }
}

/// Per-event-kind classification policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindPolicy {
    /// Priority class when significance meets the floor (or none is
    /// reported).
    pub class: PriorityClass,
    /// Below this significance the alert is demoted one class.
    pub significance_floor: Option<f64>,
    /// Urgency stays at 1.0 for this many seconds after arrival.
    pub decay_hold_secs: u64,
    /// Urgency reaches 0 this many seconds after arrival.
    pub decay_horizon_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub kinds: HashMap<EventKind, KindPolicy>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        let mut kinds = HashMap::new();
        kinds.insert(
            EventKind::GammaRayBurst,
            KindPolicy {
                class: PriorityClass::Critical,
                significance_floor: None,
                decay_hold_secs: 300,
                decay_horizon_secs: 21_600,
            },
        );
        kinds.insert(
            EventKind::GravitationalWave,
            KindPolicy {
                class: PriorityClass::Critical,
                significance_floor: None,
                decay_hold_secs: 600,
                decay_horizon_secs: 86_400,
            },
        );
        kinds.insert(
            EventKind::FastXrayTransient,
            KindPolicy {
                class: PriorityClass::High,
                significance_floor: Some(7.0),
                decay_hold_secs: 600,
                decay_horizon_secs: 43_200,
            },
        );
        kinds.insert(
            EventKind::SupernovaCandidate,
            KindPolicy {
                class: PriorityClass::Normal,
                significance_floor: None,
                decay_hold_secs: 3_600,
                decay_horizon_secs: 604_800,
            },
        );
        Self { kinds }
    }
}

/// Follow-up observation policy for one event kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpPolicy {
    pub early: EpochPolicy,
    /// Fast transients also get a late-time epoch; slow ones may not.
    pub late: Option<EpochPolicy>,
}

/// One follow-up epoch: when to observe and with what.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochPolicy {
    /// Window opens this many seconds after the alert arrives.
    pub delay_secs: u64,
    /// Window length in seconds.
    pub window_secs: u64,
    pub instrument: String,
    pub filter: Option<String>,
    pub exposure_secs: f64,
    pub exposure_count: u32,
}

/// Scheduling engine policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerPolicy {
    /// Capacity of the scheduling request queue. Full queue drops ticks,
    /// never alert or feedback requests.
    pub request_queue_capacity: usize,
    /// Capacity of the engine -> dispatcher handoff queue.
    pub dispatch_queue_capacity: usize,
    /// Periodic re-evaluation interval, seconds.
    pub tick_interval_secs: u64,
    /// Reservation-conflict retries within one pass.
    pub conflict_retries: u32,
    /// Execution failures tolerated before a task is terminally failed.
    pub retry_budget: u32,
    /// Preemptions tolerated before a task is pinned.
    pub preemption_bound: u32,
    /// Follow-up epochs per event kind.
    pub follow_up: HashMap<EventKind, FollowUpPolicy>,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        let imaging = |delay_secs, window_secs, exposure_secs, exposure_count| EpochPolicy {
            delay_secs,
            window_secs,
            instrument: "optical-imager".to_string(),
            filter: Some("r".to_string()),
            exposure_secs,
            exposure_count,
        };

        let mut follow_up = HashMap::new();
        follow_up.insert(
            EventKind::GammaRayBurst,
            FollowUpPolicy {
                early: imaging(0, 3_600, 30.0, 10),
                late: Some(imaging(21_600, 86_400, 120.0, 5)),
            },
        );
        follow_up.insert(
            EventKind::GravitationalWave,
            FollowUpPolicy {
                early: imaging(0, 7_200, 60.0, 5),
                late: None,
            },
        );
        follow_up.insert(
            EventKind::FastXrayTransient,
            FollowUpPolicy {
                early: imaging(0, 3_600, 60.0, 5),
                late: Some(imaging(43_200, 86_400, 180.0, 3)),
            },
        );
        follow_up.insert(
            EventKind::SupernovaCandidate,
            FollowUpPolicy {
                early: imaging(0, 86_400, 120.0, 3),
                late: None,
            },
        );

        Self {
            request_queue_capacity: 256,
            dispatch_queue_capacity: 64,
            tick_interval_secs: 30,
            conflict_retries: 3,
            retry_budget: 3,
            preemption_bound: 2,
            follow_up,
        }
    }
}

/// Dispatcher policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchPolicy {
    /// Submission attempts before the task is marked failed.
    pub submission_retries: u32,
    /// Base delay between submission attempts, milliseconds.
    pub submission_backoff_ms: u64,
    /// A dispatched task silent for longer than this is a timeout.
    pub max_observation_secs: u64,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            submission_retries: 3,
            submission_backoff_ms: 2_000,
            max_observation_secs: 14_400,
        }
    }
}

/// History store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// SQLite file path, or `:memory:`.
    pub path: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            path: "nova.db".to_string(),
        }
    }
}

/// Operational HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub port: u16,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self { port: 8098 }
    }
}

/// Static description of one telescope, from network discovery or the
/// deployment config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelescopeConfig {
    pub id: String,
    /// Instruments this telescope can serve.
    pub instruments: Vec<String>,
    /// Filters available across those instruments.
    pub filters: Vec<String>,
    /// Base URL of the telescope's control endpoint. Without one the
    /// telescope is schedulable but every submission is rejected.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl NovaConfig {
    /// Load configuration from a TOML file. Missing sections take their
    /// defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}
