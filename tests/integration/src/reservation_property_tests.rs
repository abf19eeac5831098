//! Randomized checks of the reservation non-overlap invariant.

use chrono::{Duration as Delta, TimeZone, Utc};
use nova_core::{TaskId, TelescopeId, TimeWindow};
use nova_registry::{AlwaysVisible, Capabilities, ResourceRegistry, VisibilityModel};
use proptest::prelude::*;
use std::sync::Arc;

fn window(start: i64, len: i64) -> TimeWindow {
    let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    TimeWindow::new(t0 + Delta::seconds(start), t0 + Delta::seconds(start + len))
        .expect("positive length")
}

fn single_scope() -> (ResourceRegistry, TelescopeId) {
    let id = TelescopeId::new("prompt-5");
    let registry = ResourceRegistry::new([(
        id.clone(),
        Capabilities::new(["optical-imager"], ["r"]),
        Arc::new(AlwaysVisible) as Arc<dyn VisibilityModel>,
    )]);
    (registry, id)
}

proptest! {
    #[test]
    fn accepted_reservations_never_overlap(
        requests in prop::collection::vec((0i64..10_000, 1i64..600), 1..60)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let (registry, id) = single_scope();
            let mut accepted: Vec<TimeWindow> = Vec::new();
            for (start, len) in requests {
                let w = window(start, len);
                if registry.reserve(&id, w, TaskId::new()).await.is_ok() {
                    accepted.push(w);
                }
            }
            for (i, a) in accepted.iter().enumerate() {
                for b in &accepted[i + 1..] {
                    prop_assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn released_windows_are_reusable(
        requests in prop::collection::vec((0i64..10_000, 1i64..600), 1..40)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let (registry, id) = single_scope();
            let mut held: Vec<(TaskId, TimeWindow)> = Vec::new();
            for (start, len) in requests {
                let task = TaskId::new();
                let w = window(start, len);
                if registry.reserve(&id, w, task).await.is_ok() {
                    held.push((task, w));
                }
            }
            for (task, _) in &held {
                registry.release(&id, *task).await.unwrap();
            }
            // Every window that was accepted before is free again
            for (_, w) in held {
                prop_assert!(registry.reserve(&id, w, TaskId::new()).await.is_ok());
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
