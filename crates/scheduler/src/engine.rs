//! The scheduling engine: assignment, contention, preemption, expiry.

use crate::priority::PriorityClassifier;
use crate::{AbortReason, DispatchCommand, ScheduleRequest, TaskEvent};
use chrono::{DateTime, Duration, Utc};
use nova_core::config::SchedulerPolicy;
use nova_core::{
    Alert, AlertId, InstrumentConfig, ObservationTask, TaskId, TaskState, TelescopeId, TimeWindow,
};
use nova_registry::{FeasibilityConstraints, RegistryError, ResourceRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// The scheduling core.
///
/// Owns every [`ObservationTask`] from creation to a terminal state.
/// Driven by one request at a time from the bounded scheduling queue;
/// per-telescope reservation mutation is additionally serialized inside
/// the registry, so passes touching disjoint telescopes can overlap
/// with ops-surface reads.
pub struct SchedulingEngine {
    policy: SchedulerPolicy,
    classifier: PriorityClassifier,
    registry: Arc<ResourceRegistry>,
    alerts: HashMap<AlertId, Alert>,
    tasks: HashMap<TaskId, ObservationTask>,
    dispatch_tx: mpsc::Sender<DispatchCommand>,
    audit_tx: Option<mpsc::Sender<TaskEvent>>,
}

impl SchedulingEngine {
    pub fn new(
        policy: SchedulerPolicy,
        classifier: PriorityClassifier,
        registry: Arc<ResourceRegistry>,
        dispatch_tx: mpsc::Sender<DispatchCommand>,
        audit_tx: Option<mpsc::Sender<TaskEvent>>,
    ) -> Self {
        Self {
            policy,
            classifier,
            registry,
            alerts: HashMap::new(),
            tasks: HashMap::new(),
            dispatch_tx,
            audit_tx,
        }
    }

    /// Process requests until the queue closes.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ScheduleRequest>) {
        info!("scheduling engine started");
        while let Some(request) = rx.recv().await {
            self.handle(request, Utc::now()).await;
        }
        info!("scheduling engine stopped");
    }

    /// Handle a single request at an explicit instant. Public so tests
    /// can drive the engine with a fixed clock.
    pub async fn handle(&mut self, request: ScheduleRequest, now: DateTime<Utc>) {
        match request {
            ScheduleRequest::AlertArrived(alert) => self.on_alert(alert, now).await,
            ScheduleRequest::AlertUpdated(alert) => self.on_alert_update(alert, now).await,
            ScheduleRequest::AlertRetracted(id) => self.on_retraction(&id, now).await,
            ScheduleRequest::Cancel(task) => {
                self.cancel_task(task, now, "manual cancellation").await
            }
            ScheduleRequest::Tick => self.run_pass(now).await,
            ScheduleRequest::Dispatched(task) => self.on_dispatched(task, now),
            ScheduleRequest::SubmissionFailed(task) => {
                self.on_execution_failure(task, "submission retries exhausted", now)
                    .await
            }
            ScheduleRequest::Completed(task) => self.on_completed(task, now).await,
            ScheduleRequest::Aborted { task, reason } => {
                let reason_str = match reason {
                    AbortReason::Weather => "weather abort",
                    AbortReason::Fault => "telescope fault",
                    AbortReason::Timeout => "observation timeout",
                };
                self.on_execution_failure(task, reason_str, now).await
            }
        }
    }

    /// Read access for the ops surface and tests.
    pub fn task(&self, id: TaskId) -> Option<&ObservationTask> {
        self.tasks.get(&id)
    }

    pub fn tasks_for_alert(&self, alert: &AlertId) -> Vec<&ObservationTask> {
        let mut tasks: Vec<_> = self
            .tasks
            .values()
            .filter(|t| &t.alert_id == alert)
            .collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    // ---- alert handling ----

    async fn on_alert(&mut self, alert: Alert, now: DateTime<Utc>) {
        if self.alerts.contains_key(&alert.id) {
            // The ingestor dedups; a re-arrival here is a revision.
            return Box::pin(self.on_alert_update(alert, now)).await;
        }

        info!(alert = %alert.id, kind = %alert.kind, "alert arrived");
        let spawn_tasks = alert.astrophysical && alert.duplicate_of.is_none();
        if !alert.astrophysical {
            info!(alert = %alert.id, "not astrophysical, no follow-up");
        }
        if let Some(original) = &alert.duplicate_of {
            info!(alert = %alert.id, original = %original, "duplicate transient, already followed up");
        }

        if spawn_tasks {
            for task in self.derive_tasks(&alert) {
                debug!(task = %task.id, alert = %alert.id, epoch = %task.epoch, "task created");
                self.emit(TaskEvent {
                    task: task.id,
                    alert: alert.id.clone(),
                    from: None,
                    to: TaskState::Pending,
                    telescope: None,
                    at: now,
                });
                self.tasks.insert(task.id, task);
            }
        }
        self.alerts.insert(alert.id.clone(), alert);
        self.run_pass(now).await;
    }

    /// Build the follow-up tasks for an alert from the per-kind epoch
    /// policy. Windows are clamped to the alert's expiry.
    fn derive_tasks(&self, alert: &Alert) -> Vec<ObservationTask> {
        let Some(policy) = self.policy.follow_up.get(&alert.kind) else {
            debug!(alert = %alert.id, kind = %alert.kind, "no follow-up policy for kind");
            return Vec::new();
        };

        let epochs = [
            Some((nova_core::FollowUpEpoch::Early, &policy.early)),
            policy
                .late
                .as_ref()
                .map(|late| (nova_core::FollowUpEpoch::Late, late)),
        ];

        let mut tasks = Vec::new();
        for (epoch, plan) in epochs.into_iter().flatten() {
            let start = alert.received_at + Duration::seconds(plan.delay_secs as i64);
            let mut end = start + Duration::seconds(plan.window_secs as i64);
            if let Some(expires_at) = alert.expires_at {
                end = end.min(expires_at);
            }
            let Some(window) = TimeWindow::new(start, end) else {
                debug!(alert = %alert.id, epoch = %epoch, "epoch window empty after expiry clamp");
                continue;
            };
            tasks.push(ObservationTask::new(
                alert.id.clone(),
                alert.position,
                InstrumentConfig {
                    instrument: plan.instrument.clone(),
                    filter: plan.filter.clone(),
                    exposure_secs: plan.exposure_secs,
                    exposure_count: plan.exposure_count,
                },
                window,
                epoch,
                alert.received_at,
            ));
        }
        tasks
    }

    async fn on_alert_update(&mut self, revised: Alert, now: DateTime<Utc>) {
        let Some(known) = self.alerts.get(&revised.id) else {
            // Revision for a trigger we never saw (dedup window gap):
            // treat it as a fresh arrival.
            return self.on_alert(revised, now).await;
        };

        let retracted = known.astrophysical && !revised.astrophysical;
        info!(alert = %revised.id, retracted, "alert revised");
        self.alerts.insert(revised.id.clone(), revised.clone());

        if retracted {
            return self.on_retraction(&revised.id.clone(), now).await;
        }

        // Retarget everything not yet in flight.
        let ids: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| {
                t.alert_id == revised.id
                    && matches!(t.state, TaskState::Pending | TaskState::Assigned)
            })
            .map(|t| t.id)
            .collect();
        for id in ids {
            let resubmit = match self.tasks.get_mut(&id) {
                Some(task) => {
                    task.target = revised.position;
                    debug!(task = %id, "target coordinates revised");
                    (task.state == TaskState::Assigned).then(|| task.clone())
                }
                None => None,
            };
            // An assigned task has a queued submission carrying the old
            // coordinates; replace it.
            if let Some(task) = resubmit {
                if self.dispatch_tx.send(DispatchCommand::Submit(task)).await.is_err() {
                    error!(task = %id, "dispatcher gone, revised submission not handed off");
                }
            }
        }
        self.run_pass(now).await;
    }

    async fn on_retraction(&mut self, alert: &AlertId, now: DateTime<Utc>) {
        info!(alert = %alert, "alert retracted, cancelling follow-up");
        let ids: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| &t.alert_id == alert && !t.state.is_terminal())
            .map(|t| t.id)
            .collect();
        for id in ids {
            self.cancel_task(id, now, "alert retracted").await;
        }
    }

    async fn cancel_task(&mut self, id: TaskId, now: DateTime<Utc>, reason: &str) {
        let Some(task) = self.tasks.get(&id) else {
            debug!(task = %id, "cancel for unknown task");
            return;
        };
        match task.state {
            TaskState::Pending | TaskState::Assigned => {
                let telescope = task.assigned_to.clone();
                if let Some(scope) = &telescope {
                    if let Err(err) = self.registry.release(scope, id).await {
                        warn!(task = %id, error = %err, "release on cancel failed");
                    }
                    // The dispatcher holds a queued submission for every
                    // assigned task; pull it back.
                    let recall = DispatchCommand::Recall {
                        task: id,
                        telescope: scope.clone(),
                    };
                    if self.dispatch_tx.send(recall).await.is_err() {
                        error!(task = %id, "dispatcher gone, recall not sent");
                    }
                }
                self.apply_transition(id, TaskState::Cancelled, now);
                info!(task = %id, reason, "task cancelled");
            }
            TaskState::Dispatched => {
                // Cannot recall an in-progress observation; record the
                // request and ask the network to try.
                let telescope = task.assigned_to.clone();
                if let Some(task) = self.tasks.get_mut(&id) {
                    task.cancel_requested = true;
                }
                warn!(task = %id, reason, "cancellation after dispatch, recall is best-effort");
                if let Some(scope) = telescope {
                    let recall = DispatchCommand::Recall {
                        task: id,
                        telescope: scope,
                    };
                    if self.dispatch_tx.send(recall).await.is_err() {
                        error!(task = %id, "dispatcher gone, recall not sent");
                    }
                }
            }
            _ => debug!(task = %id, state = %task.state, "cancel on terminal task ignored"),
        }
    }

    // ---- execution feedback ----

    fn on_dispatched(&mut self, id: TaskId, now: DateTime<Utc>) {
        if self.tasks.get(&id).is_some_and(|t| t.state == TaskState::Assigned) {
            self.apply_transition(id, TaskState::Dispatched, now);
        } else {
            warn!(task = %id, "dispatch ack for task not in assigned state");
        }
    }

    async fn on_completed(&mut self, id: TaskId, now: DateTime<Utc>) {
        let Some(task) = self.tasks.get(&id) else {
            warn!(task = %id, "completion for unknown task");
            return;
        };
        if task.state != TaskState::Dispatched {
            warn!(task = %id, state = %task.state, "completion for task not in flight");
            return;
        }
        self.release_assignment(id).await;
        self.apply_transition(id, TaskState::Completed, now);
        info!(task = %id, "observation completed");
    }

    async fn on_execution_failure(&mut self, id: TaskId, reason: &str, now: DateTime<Utc>) {
        let Some(task) = self.tasks.get(&id) else {
            warn!(task = %id, "failure for unknown task");
            return;
        };
        if !matches!(task.state, TaskState::Assigned | TaskState::Dispatched) {
            warn!(task = %id, state = %task.state, "failure for task not in flight");
            return;
        }

        let cancel_requested = task.cancel_requested;
        self.release_assignment(id).await;
        self.apply_transition(id, TaskState::Failed, now);

        // A cancellation was pending; the abort honors it, so the task
        // must not come back.
        if cancel_requested {
            info!(task = %id, reason, "cancelled task aborted, not re-queued");
            return;
        }

        let attempt = match self.tasks.get_mut(&id) {
            Some(task) => {
                task.retries += 1;
                task.retries
            }
            None => return,
        };
        if attempt <= self.policy.retry_budget {
            self.apply_transition(id, TaskState::Pending, now);
            info!(task = %id, reason, attempt, "task failed, re-queued for scheduling");
            self.run_pass(now).await;
        } else {
            error!(task = %id, reason, failures = attempt, "retry budget exhausted, task terminally failed");
        }
    }

    async fn release_assignment(&mut self, id: TaskId) {
        let telescope = self.tasks.get(&id).and_then(|t| t.assigned_to.clone());
        if let Some(scope) = telescope {
            if let Err(err) = self.registry.release(&scope, id).await {
                warn!(task = %id, telescope = %scope, error = %err, "reservation release failed");
            }
        }
    }

    // ---- the scheduling pass ----

    /// One full pass: expire overdue tasks, then place every pending
    /// task in deterministic priority order.
    pub async fn run_pass(&mut self, now: DateTime<Utc>) {
        self.expire_overdue(now).await;

        let mut pending: Vec<(TaskId, f64)> = self
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Pending)
            .map(|t| (t.id, self.score_of(t, now)))
            .collect();
        // Highest score first; the stable task-id key makes identical
        // inputs produce identical assignments.
        pending.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut displaced = Vec::new();
        for (id, score) in pending {
            let mut bumped = self.place_task(id, score, now, true).await;
            displaced.append(&mut bumped);
        }

        // Tasks displaced by preemption get one placement attempt in the
        // same pass, without further preemption (no cascades).
        for id in displaced {
            let score = match self.tasks.get(&id) {
                Some(task) if task.state == TaskState::Pending => self.score_of(task, now),
                _ => continue,
            };
            let _ = self.place_task(id, score, now, false).await;
        }
    }

    async fn expire_overdue(&mut self, now: DateTime<Utc>) {
        let overdue: Vec<(TaskId, Option<TelescopeId>)> = self
            .tasks
            .values()
            .filter(|t| !t.state.is_terminal() && t.window_closed(now))
            .map(|t| {
                let queued = (t.state == TaskState::Assigned)
                    .then(|| t.assigned_to.clone())
                    .flatten();
                (t.id, queued)
            })
            .collect();
        for (id, queued) in overdue {
            self.release_assignment(id).await;
            if let Some(telescope) = queued {
                let recall = DispatchCommand::Recall { task: id, telescope };
                let _ = self.dispatch_tx.send(recall).await;
            }
            self.apply_transition(id, TaskState::Expired, now);
            info!(task = %id, "valid window closed, task expired");
        }
    }

    fn score_of(&self, task: &ObservationTask, now: DateTime<Utc>) -> f64 {
        match self.alerts.get(&task.alert_id) {
            Some(alert) => self.classifier.classify(alert).score(alert.age(now)),
            None => 0.0,
        }
    }

    /// Attempt to place one pending task. Returns any tasks displaced
    /// by preemption (they are back in `Pending`).
    async fn place_task(
        &mut self,
        id: TaskId,
        score: f64,
        now: DateTime<Utc>,
        allow_preemption: bool,
    ) -> Vec<TaskId> {
        let Some(task) = self.tasks.get(&id) else {
            return Vec::new();
        };
        let target = task.target;
        let instrument = task.instrument.clone();
        let valid_window = task.valid_window;
        let min_duration = instrument.total_exposure();

        // Placement can only use what is left of the valid window.
        let Some(effective) = TimeWindow::new(valid_window.start.max(now), valid_window.end)
        else {
            self.apply_transition(id, TaskState::Expired, now);
            info!(task = %id, "no usable window remains, task expired");
            return Vec::new();
        };

        for attempt in 0..=self.policy.conflict_retries {
            let constraints = FeasibilityConstraints {
                target: &target,
                instrument: &instrument,
                valid_window: effective,
                min_duration,
            };
            let candidates = self.registry.query_feasible(&constraints).await;

            let Some(candidate) = candidates.first() else {
                if allow_preemption {
                    return self.try_preempt(id, score, &constraints, now).await;
                }
                debug!(task = %id, "no feasible candidate");
                return Vec::new();
            };

            let Some(slice) = TimeWindow::new(
                candidate.window.start,
                candidate.window.start + min_duration,
            ) else {
                return Vec::new();
            };

            match self.registry.reserve(&candidate.telescope, slice, id).await {
                Ok(()) => {
                    let telescope = candidate.telescope.clone();
                    self.commit_assignment(id, telescope, slice, now).await;
                    return Vec::new();
                }
                Err(RegistryError::Conflict { .. }) => {
                    // Lost a race against a higher-priority reservation
                    // in this pass; re-query and retry.
                    debug!(task = %id, attempt, "reservation conflict, re-querying");
                    continue;
                }
                Err(err) => {
                    warn!(task = %id, error = %err, "reservation failed");
                    return Vec::new();
                }
            }
        }
        warn!(task = %id, "conflict retries exhausted, deferring to next pass");
        Vec::new()
    }

    async fn commit_assignment(
        &mut self,
        id: TaskId,
        telescope: TelescopeId,
        window: TimeWindow,
        now: DateTime<Utc>,
    ) {
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        if let Err(err) = task.assign(telescope.clone(), window) {
            error!(task = %id, error = %err, "assignment transition failed");
            let _ = self.registry.release(&telescope, id).await;
            return;
        }
        let assigned = task.clone();
        info!(
            task = %id,
            telescope = %telescope,
            start = %window.start,
            "task assigned"
        );
        self.emit(TaskEvent {
            task: id,
            alert: assigned.alert_id.clone(),
            from: Some(TaskState::Pending),
            to: TaskState::Assigned,
            telescope: Some(telescope),
            at: now,
        });
        if self.dispatch_tx.send(DispatchCommand::Submit(assigned)).await.is_err() {
            error!(task = %id, "dispatcher gone, assignment not handed off");
        }
    }

    /// Look for an assigned (not dispatched, not pinned) task with a
    /// strictly lower score whose reservation, once released, opens a
    /// feasible window for the preemptor.
    async fn try_preempt(
        &mut self,
        preemptor: TaskId,
        score: f64,
        constraints: &FeasibilityConstraints<'_>,
        now: DateTime<Utc>,
    ) -> Vec<TaskId> {
        // Victims ordered cheapest-first, then by id for determinism.
        let mut victims: Vec<(TaskId, f64)> = self
            .tasks
            .values()
            .filter(|t| {
                t.state == TaskState::Assigned
                    && !t.pinned
                    && t.id != preemptor
                    && t.reserved_window
                        .is_some_and(|w| w.overlaps(&constraints.valid_window))
            })
            .map(|t| (t.id, self.score_of(t, now)))
            .filter(|(_, victim_score)| *victim_score < score)
            .collect();
        victims.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        for (victim_id, _) in victims {
            let Some(victim) = self.tasks.get(&victim_id) else {
                continue;
            };
            let (Some(scope), Some(victim_window)) =
                (victim.assigned_to.clone(), victim.reserved_window)
            else {
                continue;
            };

            if let Err(err) = self.registry.release(&scope, victim_id).await {
                warn!(task = %victim_id, error = %err, "victim release failed");
                continue;
            }

            let candidates = self.registry.query_feasible(constraints).await;
            let reopened = candidates.iter().find(|c| c.telescope == scope);
            let Some(candidate) = reopened else {
                // Releasing this victim did not help; put it back. The
                // engine is the only reservation writer, so this cannot
                // conflict.
                if let Err(err) = self.registry.reserve(&scope, victim_window, victim_id).await {
                    error!(task = %victim_id, error = %err, "victim rollback failed");
                }
                continue;
            };

            let Some(slice) = TimeWindow::new(
                candidate.window.start,
                candidate.window.start + constraints.min_duration,
            ) else {
                continue;
            };
            if self.registry.reserve(&scope, slice, preemptor).await.is_err() {
                if let Err(err) = self.registry.reserve(&scope, victim_window, victim_id).await {
                    error!(task = %victim_id, error = %err, "victim rollback failed");
                }
                continue;
            }

            // Commit: displace the victim, then bind the preemptor.
            let alert = victim.alert_id.clone();
            if let Some(victim) = self.tasks.get_mut(&victim_id) {
                if victim.return_to_pending().is_err() {
                    continue;
                }
                victim.preemptions += 1;
                if victim.preemptions >= self.policy.preemption_bound {
                    victim.pinned = true;
                    info!(task = %victim_id, preemptions = victim.preemptions, "task pinned, exempt from further preemption");
                }
            }
            info!(task = %victim_id, by = %preemptor, telescope = %scope, "task preempted");
            let recall = DispatchCommand::Recall {
                task: victim_id,
                telescope: scope.clone(),
            };
            if self.dispatch_tx.send(recall).await.is_err() {
                error!(task = %victim_id, "dispatcher gone, recall not sent");
            }
            self.emit(TaskEvent {
                task: victim_id,
                alert,
                from: Some(TaskState::Assigned),
                to: TaskState::Pending,
                telescope: None,
                at: now,
            });
            self.commit_assignment(preemptor, scope, slice, now).await;
            return vec![victim_id];
        }
        Vec::new()
    }

    // ---- bookkeeping ----

    fn apply_transition(&mut self, id: TaskId, next: TaskState, now: DateTime<Utc>) {
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        let from = task.state;
        if let Err(err) = task.transition(next) {
            error!(task = %id, error = %err, "illegal transition rejected");
            return;
        }
        let event = TaskEvent {
            task: id,
            alert: task.alert_id.clone(),
            from: Some(from),
            to: next,
            telescope: task.assigned_to.clone(),
            at: now,
        };
        self.emit(event);
    }

    fn emit(&self, event: TaskEvent) {
        if let Some(tx) = &self.audit_tx {
            if let Err(err) = tx.try_send(event) {
                warn!(error = %err, "audit event dropped");
            }
        }
    }
}
