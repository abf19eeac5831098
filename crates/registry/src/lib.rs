//! Resource registry: authoritative live state of the telescope network.
//!
//! The registry owns per-telescope availability, capability sets, and
//! reservation queues. All mutation goes through `reserve`, `release`,
//! and `set_availability`; reservation state for a given telescope is
//! serialized behind that telescope's own mutex, so scheduling passes
//! touching disjoint telescopes proceed concurrently while the
//! non-overlap invariant holds under races.

mod error;
mod telescope;
mod visibility;

pub use error::RegistryError;
pub use telescope::{Availability, Capabilities, Reservation, TelescopeSnapshot};
pub use visibility::{AlwaysVisible, UptimeTable, VisibilityModel};

use chrono::Duration;
use nova_core::{InstrumentConfig, SkyPosition, TaskId, TelescopeId, TimeWindow};
use std::collections::HashMap;
use std::sync::Arc;
use telescope::Telescope;
use tracing::{debug, info};

/// A feasible placement produced by [`ResourceRegistry::query_feasible`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub telescope: TelescopeId,
    /// Earliest free window on that telescope able to hold the request.
    pub window: TimeWindow,
}

/// Constraints a placement must satisfy.
#[derive(Debug, Clone)]
pub struct FeasibilityConstraints<'a> {
    pub target: &'a SkyPosition,
    pub instrument: &'a InstrumentConfig,
    /// The task's earliest/latest valid execution interval.
    pub valid_window: TimeWindow,
    /// Minimum contiguous time the placement needs.
    pub min_duration: Duration,
}

/// Registry of every telescope in the follow-up network.
///
/// The telescope set is fixed at startup (from discovery or deployment
/// config); per-telescope state is interior-mutable behind each
/// telescope's own lock.
pub struct ResourceRegistry {
    telescopes: HashMap<TelescopeId, Arc<Telescope>>,
}

impl ResourceRegistry {
    /// Build a registry from discovered telescopes.
    pub fn new(
        telescopes: impl IntoIterator<Item = (TelescopeId, Capabilities, Arc<dyn VisibilityModel>)>,
    ) -> Self {
        let telescopes: HashMap<_, _> = telescopes
            .into_iter()
            .map(|(id, caps, vis)| {
                let scope = Arc::new(Telescope::new(id.clone(), caps, vis));
                (id, scope)
            })
            .collect();
        info!(count = telescopes.len(), "resource registry initialized");
        Self { telescopes }
    }

    fn telescope(&self, id: &TelescopeId) -> Result<&Arc<Telescope>, RegistryError> {
        self.telescopes
            .get(id)
            .ok_or_else(|| RegistryError::UnknownTelescope(id.clone()))
    }

    /// Atomically check the non-overlap invariant and commit a
    /// reservation, or fail with [`RegistryError::Conflict`] if the
    /// window is no longer free.
    pub async fn reserve(
        &self,
        id: &TelescopeId,
        window: TimeWindow,
        task: TaskId,
    ) -> Result<(), RegistryError> {
        let scope = self.telescope(id)?;
        scope.reserve(window, task).await?;
        debug!(telescope = %id, task = %task, start = %window.start, "reservation committed");
        Ok(())
    }

    /// Remove a task's reservation. Idempotent: releasing a task that
    /// holds no reservation is a no-op.
    pub async fn release(&self, id: &TelescopeId, task: TaskId) -> Result<(), RegistryError> {
        let scope = self.telescope(id)?;
        if scope.release(task).await {
            debug!(telescope = %id, task = %task, "reservation released");
        }
        Ok(())
    }

    /// Feasible `(telescope, window)` candidates for the constraints,
    /// sorted by soonest window start (telescope id breaks ties so the
    /// ordering is deterministic). Telescopes failing the capability or
    /// availability filter are excluded entirely.
    pub async fn query_feasible(
        &self,
        constraints: &FeasibilityConstraints<'_>,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for scope in self.telescopes.values() {
            if let Some(window) = scope.earliest_fit(constraints).await {
                candidates.push(Candidate {
                    telescope: scope.id().clone(),
                    window,
                });
            }
        }
        candidates.sort_by(|a, b| {
            a.window
                .start
                .cmp(&b.window.start)
                .then_with(|| a.telescope.cmp(&b.telescope))
        });
        candidates
    }

    /// Update a telescope's availability (feedback monitor or manual
    /// override).
    pub async fn set_availability(
        &self,
        id: &TelescopeId,
        availability: Availability,
    ) -> Result<(), RegistryError> {
        let scope = self.telescope(id)?;
        let previous = scope.set_availability(availability).await;
        if previous != availability {
            info!(telescope = %id, from = %previous, to = %availability, "availability changed");
        }
        Ok(())
    }

    pub async fn availability(&self, id: &TelescopeId) -> Result<Availability, RegistryError> {
        Ok(self.telescope(id)?.availability().await)
    }

    /// Ordered reservation queue for one telescope.
    pub async fn queue(&self, id: &TelescopeId) -> Result<Vec<Reservation>, RegistryError> {
        Ok(self.telescope(id)?.queue().await)
    }

    /// Point-in-time view of every telescope, for the ops surface.
    pub async fn snapshot(&self) -> Vec<TelescopeSnapshot> {
        let mut snapshots = Vec::with_capacity(self.telescopes.len());
        for scope in self.telescopes.values() {
            snapshots.push(scope.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    pub fn telescope_ids(&self) -> Vec<TelescopeId> {
        let mut ids: Vec<_> = self.telescopes.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, id: &TelescopeId) -> bool {
        self.telescopes.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn w(start: i64, end: i64) -> TimeWindow {
        TimeWindow::new(t(start), t(end)).unwrap()
    }

    fn imager() -> InstrumentConfig {
        InstrumentConfig {
            instrument: "optical-imager".into(),
            filter: Some("r".into()),
            exposure_secs: 60.0,
            exposure_count: 5,
        }
    }

    fn caps() -> Capabilities {
        Capabilities::new(["optical-imager"], ["r", "g"])
    }

    fn registry_of(ids: &[&str]) -> ResourceRegistry {
        ResourceRegistry::new(ids.iter().map(|id| {
            (
                TelescopeId::new(*id),
                caps(),
                Arc::new(AlwaysVisible) as Arc<dyn VisibilityModel>,
            )
        }))
    }

    fn constraints<'a>(
        target: &'a SkyPosition,
        instrument: &'a InstrumentConfig,
        valid: TimeWindow,
    ) -> FeasibilityConstraints<'a> {
        FeasibilityConstraints {
            target,
            instrument,
            valid_window: valid,
            min_duration: Duration::seconds(300),
        }
    }

    #[tokio::test]
    async fn reserve_rejects_overlap() {
        let registry = registry_of(&["prompt-5"]);
        let id = TelescopeId::new("prompt-5");

        registry.reserve(&id, w(0, 600), TaskId::new()).await.unwrap();

        let clash = registry.reserve(&id, w(300, 900), TaskId::new()).await;
        assert!(matches!(clash, Err(RegistryError::Conflict { .. })));

        // Adjacent window is fine (half-open intervals)
        registry.reserve(&id, w(600, 1200), TaskId::new()).await.unwrap();
    }

    #[tokio::test]
    async fn release_frees_the_window() {
        let registry = registry_of(&["prompt-5"]);
        let id = TelescopeId::new("prompt-5");
        let task = TaskId::new();

        registry.reserve(&id, w(0, 600), task).await.unwrap();
        registry.release(&id, task).await.unwrap();
        registry.reserve(&id, w(0, 600), TaskId::new()).await.unwrap();
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let registry = registry_of(&["prompt-5"]);
        let id = TelescopeId::new("prompt-5");
        registry.release(&id, TaskId::new()).await.unwrap();
    }

    #[tokio::test]
    async fn query_skips_unavailable_telescopes() {
        let registry = registry_of(&["prompt-5", "prompt-6"]);
        registry
            .set_availability(&TelescopeId::new("prompt-5"), Availability::WeatherHold)
            .await
            .unwrap();

        let target = SkyPosition::new(150.0, 20.0, 0.05);
        let instrument = imager();
        let found = registry
            .query_feasible(&constraints(&target, &instrument, w(0, 3600)))
            .await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].telescope, TelescopeId::new("prompt-6"));
    }

    #[tokio::test]
    async fn query_skips_incapable_telescopes() {
        let registry = ResourceRegistry::new([
            (
                TelescopeId::new("radio-1"),
                Capabilities::new(["radio-receiver"], [] as [&str; 0]),
                Arc::new(AlwaysVisible) as Arc<dyn VisibilityModel>,
            ),
            (
                TelescopeId::new("prompt-5"),
                caps(),
                Arc::new(AlwaysVisible) as Arc<dyn VisibilityModel>,
            ),
        ]);

        let target = SkyPosition::new(150.0, 20.0, 0.05);
        let instrument = imager();
        let found = registry
            .query_feasible(&constraints(&target, &instrument, w(0, 3600)))
            .await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].telescope, TelescopeId::new("prompt-5"));
    }

    #[tokio::test]
    async fn query_places_after_existing_reservations() {
        let registry = registry_of(&["prompt-5"]);
        let id = TelescopeId::new("prompt-5");
        registry.reserve(&id, w(0, 1800), TaskId::new()).await.unwrap();

        let target = SkyPosition::new(150.0, 20.0, 0.05);
        let instrument = imager();
        let found = registry
            .query_feasible(&constraints(&target, &instrument, w(0, 3600)))
            .await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].window.start, t(1800));
    }

    #[tokio::test]
    async fn query_is_deterministically_ordered() {
        let registry = registry_of(&["b-scope", "a-scope"]);
        let target = SkyPosition::new(150.0, 20.0, 0.05);
        let instrument = imager();
        let found = registry
            .query_feasible(&constraints(&target, &instrument, w(0, 3600)))
            .await;

        // Same window start on both, so telescope id breaks the tie
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].telescope, TelescopeId::new("a-scope"));
        assert_eq!(found[1].telescope, TelescopeId::new("b-scope"));
    }

    #[tokio::test]
    async fn unknown_telescope_is_an_error() {
        let registry = registry_of(&["prompt-5"]);
        let missing = TelescopeId::new("nope");
        assert!(matches!(
            registry.reserve(&missing, w(0, 600), TaskId::new()).await,
            Err(RegistryError::UnknownTelescope(_))
        ));
    }
}
