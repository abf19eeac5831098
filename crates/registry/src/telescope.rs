//! Per-telescope state: capabilities, availability, reservation queue.

use crate::error::RegistryError;
use crate::visibility::VisibilityModel;
use crate::FeasibilityConstraints;
use chrono::{DateTime, Utc};
use nova_core::{InstrumentConfig, TaskId, TelescopeId, TimeWindow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Whether a telescope can currently take work.
///
/// Supplied externally: weather and fault signals from the feedback
/// monitor, maintenance and offline from operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    WeatherHold,
    Maintenance,
    Offline,
}

impl Availability {
    pub fn accepts_work(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Availability::Available => "available",
            Availability::WeatherHold => "weather_hold",
            Availability::Maintenance => "maintenance",
            Availability::Offline => "offline",
        };
        write!(f, "{s}")
    }
}

/// Instrument/filter capability set of one telescope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    instruments: HashSet<String>,
    filters: HashSet<String>,
}

impl Capabilities {
    pub fn new<I, F>(instruments: I, filters: F) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            instruments: instruments.into_iter().map(Into::into).collect(),
            filters: filters.into_iter().map(Into::into).collect(),
        }
    }

    /// True if this telescope can serve the requested configuration.
    pub fn supports(&self, config: &InstrumentConfig) -> bool {
        if !self.instruments.contains(&config.instrument) {
            return false;
        }
        match &config.filter {
            Some(filter) => self.filters.contains(filter),
            None => true,
        }
    }
}

/// A committed binding of a task to a telescope time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub task: TaskId,
    pub window: TimeWindow,
}

/// Ops-surface view of one telescope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelescopeSnapshot {
    pub id: TelescopeId,
    pub availability: Availability,
    pub queue_depth: usize,
    /// Start of the next reserved window, if any.
    pub next_window_start: Option<DateTime<Utc>>,
}

struct TelescopeInner {
    availability: Availability,
    /// Reservations keyed by window start; starts are unique because
    /// windows never overlap.
    reservations: BTreeMap<DateTime<Utc>, Reservation>,
}

/// One telescope. Reservation state is serialized behind `inner`.
pub(crate) struct Telescope {
    id: TelescopeId,
    capabilities: Capabilities,
    visibility: Arc<dyn VisibilityModel>,
    inner: Mutex<TelescopeInner>,
}

impl Telescope {
    pub(crate) fn new(
        id: TelescopeId,
        capabilities: Capabilities,
        visibility: Arc<dyn VisibilityModel>,
    ) -> Self {
        Self {
            id,
            capabilities,
            visibility,
            inner: Mutex::new(TelescopeInner {
                availability: Availability::Available,
                reservations: BTreeMap::new(),
            }),
        }
    }

    pub(crate) fn id(&self) -> &TelescopeId {
        &self.id
    }

    pub(crate) async fn reserve(
        &self,
        window: TimeWindow,
        task: TaskId,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().await;
        if inner.reservations.values().any(|r| r.window.overlaps(&window)) {
            return Err(RegistryError::conflict(self.id.clone(), task, window));
        }
        inner.reservations.insert(window.start, Reservation { task, window });
        Ok(())
    }

    /// Returns true if a reservation was actually removed.
    pub(crate) async fn release(&self, task: TaskId) -> bool {
        let mut inner = self.inner.lock().await;
        let start = inner
            .reservations
            .iter()
            .find(|(_, r)| r.task == task)
            .map(|(start, _)| *start);
        match start {
            Some(start) => {
                inner.reservations.remove(&start);
                true
            }
            None => false,
        }
    }

    /// Earliest window on this telescope satisfying the constraints, or
    /// `None` if capability, availability, or visibility rules it out.
    pub(crate) async fn earliest_fit(
        &self,
        constraints: &FeasibilityConstraints<'_>,
    ) -> Option<TimeWindow> {
        if !self.capabilities.supports(constraints.instrument) {
            return None;
        }

        let inner = self.inner.lock().await;
        if !inner.availability.accepts_work() {
            return None;
        }

        let visible = self.visibility.feasible_window(
            constraints.target,
            &constraints.valid_window,
            constraints.min_duration,
        )?;
        let feasible = visible.intersect(&constraints.valid_window)?;
        if feasible.duration() < constraints.min_duration {
            return None;
        }

        // Walk the reservation queue in time order looking for the first
        // gap inside `feasible` long enough for the request.
        let mut cursor = feasible.start;
        for reservation in inner.reservations.values() {
            if reservation.window.end <= cursor {
                continue;
            }
            if reservation.window.start >= feasible.end {
                break;
            }
            let gap_end = reservation.window.start.min(feasible.end);
            if gap_end - cursor >= constraints.min_duration {
                return TimeWindow::new(cursor, gap_end);
            }
            cursor = cursor.max(reservation.window.end);
        }

        if feasible.end - cursor >= constraints.min_duration {
            return TimeWindow::new(cursor, feasible.end);
        }
        None
    }

    pub(crate) async fn set_availability(&self, availability: Availability) -> Availability {
        let mut inner = self.inner.lock().await;
        std::mem::replace(&mut inner.availability, availability)
    }

    pub(crate) async fn availability(&self) -> Availability {
        self.inner.lock().await.availability
    }

    pub(crate) async fn queue(&self) -> Vec<Reservation> {
        self.inner.lock().await.reservations.values().copied().collect()
    }

    pub(crate) async fn snapshot(&self) -> TelescopeSnapshot {
        let inner = self.inner.lock().await;
        TelescopeSnapshot {
            id: self.id.clone(),
            availability: inner.availability,
            queue_depth: inner.reservations.len(),
            next_window_start: inner.reservations.keys().next().copied(),
        }
    }
}
