//! The processor: cognitive-state FSM, round loop, and the runtime
//! control surface.
//!
//! One logical scheduler polls the ready-thought queue for this
//! occurrence and runs up to N thoughts through the pipeline
//! concurrently; within a thought the pipeline is strictly sequential.
//! Between polls the loop maintains backpressure watermarks and reacts
//! to shutdown. Pause/single-step act at pipeline step boundaries via
//! the shared [`StepGate`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use ciris_buses::runtime_control::RuntimeControlService;
use ciris_registry::{Lifecycle, ServiceHealth, ServiceMetric};
use ciris_domain::audit::AuditKind;
use ciris_domain::cognitive::CognitiveState;
use ciris_domain::config::RuntimeConfig;
use ciris_domain::pipeline::{StepOutcome, SystemSnapshot};
use ciris_domain::task::{TaskStatus, Thought, ThoughtState};
use ciris_domain::{Error, Result};
use ciris_persistence::{AuditLog, Storage};
use ciris_pipeline::{Pipeline, RoundResult, SnapshotSource, StepGate};

use crate::telemetry::ThoughtMetrics;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared live view of the processor: cognitive state, pause flag,
/// in-flight counts. Both the pipeline (context snapshots) and the gate
/// (intake decisions) read it.
pub struct RuntimeStatus {
    occurrence_id: String,
    round_deadline_secs: u64,
    state: RwLock<CognitiveState>,
    active_thoughts: AtomicU32,
    intake_paused: AtomicBool,
    gate: Arc<StepGate>,
}

impl RuntimeStatus {
    pub fn new(occurrence_id: impl Into<String>, round_deadline_secs: u64, gate: Arc<StepGate>) -> Self {
        Self {
            occurrence_id: occurrence_id.into(),
            round_deadline_secs,
            state: RwLock::new(CognitiveState::Wakeup),
            active_thoughts: AtomicU32::new(0),
            intake_paused: AtomicBool::new(false),
            gate,
        }
    }

    pub fn occurrence_id(&self) -> &str {
        &self.occurrence_id
    }

    pub fn cognitive_state(&self) -> CognitiveState {
        *self.state.read()
    }

    /// Transition the FSM. Disabled states (PLAY, SOLITUDE, DREAM) and
    /// illegal edges are refused.
    pub fn transition(&self, next: CognitiveState) -> Result<()> {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            return Err(Error::Validation(format!(
                "refusing cognitive transition {} -> {next}",
                *state
            )));
        }
        tracing::info!(from = %*state, to = %next, "cognitive transition");
        *state = next;
        Ok(())
    }

    /// General intake is open only in WORK, below the high-water mark.
    pub fn intake_open(&self) -> bool {
        self.cognitive_state() == CognitiveState::Work
            && !self.intake_paused.load(Ordering::SeqCst)
    }

    pub fn set_intake_paused(&self, paused: bool) {
        self.intake_paused.store(paused, Ordering::SeqCst);
    }

    pub fn intake_paused(&self) -> bool {
        self.intake_paused.load(Ordering::SeqCst)
    }

    pub fn active_thoughts(&self) -> u32 {
        self.active_thoughts.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }
}

impl SnapshotSource for RuntimeStatus {
    fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot {
            occurrence_id: self.occurrence_id.clone(),
            cognitive_state: self.cognitive_state(),
            paused: self.gate.is_paused(),
            active_tasks: self.active_thoughts(),
            round_deadline_secs: self.round_deadline_secs,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Processor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Processor {
    storage: Arc<Storage>,
    audit: Arc<AuditLog>,
    pipeline: Arc<Pipeline>,
    status: Arc<RuntimeStatus>,
    metrics: Arc<ThoughtMetrics>,
    config: RuntimeConfig,
    cancel: CancellationToken,
    slots: Arc<Semaphore>,
}

impl Processor {
    pub fn new(
        storage: Arc<Storage>,
        audit: Arc<AuditLog>,
        pipeline: Arc<Pipeline>,
        status: Arc<RuntimeStatus>,
        metrics: Arc<ThoughtMetrics>,
        config: RuntimeConfig,
        cancel: CancellationToken,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_thoughts));
        Self {
            storage,
            audit,
            pipeline,
            status,
            metrics,
            config,
            cancel,
            slots,
        }
    }

    pub fn status(&self) -> &Arc<RuntimeStatus> {
        &self.status
    }

    /// Confirm identity at the end of WAKEUP and enter WORK.
    pub fn confirm_identity(&self) -> Result<()> {
        self.status.transition(CognitiveState::Work)
    }

    /// The round loop. Runs until shutdown, then drains.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            occurrence_id = %self.status.occurrence_id(),
            workers = self.config.max_concurrent_thoughts,
            "processor round loop starting"
        );

        while !self.cancel.is_cancelled() {
            let picked = match self.poll_once().await {
                Ok(picked) => picked,
                Err(e) => {
                    if matches!(e, Error::Fatal(_)) {
                        tracing::error!(error = %e, "fatal error in round loop; shutting down");
                        self.cancel.cancel();
                        break;
                    }
                    tracing::warn!(error = %e, "round loop poll failed");
                    0
                }
            };

            if picked == 0 {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(self.config.idle_poll_ms)) => {}
                }
            }
        }

        self.drain().await;
    }

    /// One poll: pick up to the free worker slots, spawn rounds, update
    /// the backpressure flag. Returns how many thoughts were picked.
    async fn poll_once(&self) -> Result<usize> {
        // Backpressure watermarks over the ready queue depth.
        let depth = self
            .storage
            .ready_thoughts(self.status.occurrence_id(), self.config.queue_high_water as u32 + 1)
            .await?
            .len();
        if depth > self.config.queue_high_water {
            if !self.status.intake_paused() {
                tracing::warn!(depth, "ready queue above high-water mark; pausing intake");
                self.status.set_intake_paused(true);
            }
        } else if depth <= self.config.queue_low_water && self.status.intake_paused() {
            tracing::info!(depth, "ready queue at low-water mark; resuming intake");
            self.status.set_intake_paused(false);
        }

        let free = self.slots.available_permits();
        if free == 0 {
            return Ok(0);
        }
        let ready = self
            .storage
            .ready_thoughts(self.status.occurrence_id(), free as u32)
            .await?;

        let mut picked = 0;
        for mut thought in ready {
            let permit = match self.slots.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };
            // Claim before spawning so no other poll picks it up.
            thought.state = ThoughtState::InFlight;
            self.storage.update_thought(&thought).await?;

            picked += 1;
            let processor = self.clone_refs();
            tokio::spawn(async move {
                let _slot = permit;
                processor.run_one(thought).await;
            });
        }
        Ok(picked)
    }

    fn clone_refs(&self) -> ProcessorWorker {
        ProcessorWorker {
            storage: self.storage.clone(),
            pipeline: self.pipeline.clone(),
            status: self.status.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Wait for in-flight thoughts, then defer still-live tasks and
    /// preserve state.
    async fn drain(&self) {
        tracing::info!("draining processor");
        let _all = self
            .slots
            .acquire_many(self.config.max_concurrent_thoughts as u32)
            .await;

        let live = match self
            .storage
            .list_tasks(self.status.occurrence_id(), Some(TaskStatus::Active), 1000)
            .await
        {
            Ok(mut active) => {
                if let Ok(pending) = self
                    .storage
                    .list_tasks(self.status.occurrence_id(), Some(TaskStatus::Pending), 1000)
                    .await
                {
                    active.extend(pending);
                }
                active
            }
            Err(e) => {
                tracing::warn!(error = %e, "drain: could not list live tasks");
                Vec::new()
            }
        };

        for mut task in live {
            task.status = TaskStatus::Deferred;
            task.outcome_reason = Some("shutdown".into());
            if let Err(e) = self.storage.update_task(&task).await {
                tracing::warn!(task_id = %task.task_id, error = %e, "drain: defer failed");
            }
        }

        if let Err(e) = self
            .audit
            .append(
                AuditKind::Control,
                &serde_json::json!({"event": "processor_drained"}),
            )
            .await
        {
            tracing::warn!(error = %e, "drain: audit append failed");
        }
        tracing::info!("processor drained; state preserved");
    }
}

#[async_trait]
impl Lifecycle for Processor {
    fn name(&self) -> &str {
        "processor"
    }

    async fn start(&self) -> ciris_domain::Result<()> {
        // Identity confirmation ends WAKEUP; refused while first-run
        // setup is incomplete (the caller gates on that).
        self.confirm_identity()
    }

    async fn stop(&self) -> ciris_domain::Result<()> {
        self.cancel.cancel();
        Ok(())
    }

    fn health(&self) -> ServiceHealth {
        if self.cancel.is_cancelled() {
            return ServiceHealth::Unhealthy {
                detail: "shutting down".into(),
            };
        }
        if self.status.intake_paused() {
            return ServiceHealth::Degraded {
                detail: "intake paused (queue backpressure)".into(),
            };
        }
        ServiceHealth::Healthy
    }

    fn metrics(&self) -> Vec<ServiceMetric> {
        let snapshot = self.metrics.snapshot();
        vec![
            ServiceMetric::new("seconds_per_thought", snapshot.seconds_per_thought),
            ServiceMetric::new("active_thoughts", self.status.active_thoughts() as f64),
            ServiceMetric::new("thoughts_total", snapshot.thoughts_total as f64),
        ]
    }
}

/// The per-thought slice of the processor moved into worker tasks.
struct ProcessorWorker {
    storage: Arc<Storage>,
    pipeline: Arc<Pipeline>,
    status: Arc<RuntimeStatus>,
    metrics: Arc<ThoughtMetrics>,
}

impl ProcessorWorker {
    async fn run_one(&self, mut thought: Thought) {
        let mut task = match self.storage.get_task(thought.task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tracing::warn!(thought_id = %thought.thought_id, "thought without task");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "task load failed");
                return;
            }
        };
        // Occurrence isolation: never acknowledge another occurrence's
        // task, even if it reaches the queue.
        if task.occurrence_id != self.status.occurrence_id() {
            tracing::warn!(task_id = %task.task_id, "foreign occurrence task skipped");
            return;
        }
        if task.status.is_terminal() {
            return;
        }

        self.status.active_thoughts.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        let result = self.pipeline.run_round(&mut task, &mut thought).await;
        self.status.active_thoughts.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(RoundResult::Completed(outcome)) => {
                self.metrics.record_thought(started.elapsed().as_secs_f64());
                if outcome.terminal {
                    self.metrics.record_task_completed();
                }
            }
            Ok(RoundResult::Interrupted) => {
                tracing::info!(task_id = %task.task_id, "round interrupted by shutdown");
            }
            Err(e) => {
                tracing::error!(task_id = %task.task_id, error = %e, "round failed");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime control provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The processor's implementation of the Runtime Control Bus provider.
pub struct ProcessorControl {
    gate: Arc<StepGate>,
    status: Arc<RuntimeStatus>,
    audit: Arc<AuditLog>,
    cancel: CancellationToken,
}

impl ProcessorControl {
    pub fn new(
        gate: Arc<StepGate>,
        status: Arc<RuntimeStatus>,
        audit: Arc<AuditLog>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gate,
            status,
            audit,
            cancel,
        }
    }

    async fn audit_control(&self, event: &str, detail: Option<&str>) {
        if let Err(e) = self
            .audit
            .append(
                AuditKind::Control,
                &serde_json::json!({"event": event, "detail": detail}),
            )
            .await
        {
            tracing::warn!(error = %e, "control audit append failed");
        }
    }
}

#[async_trait]
impl RuntimeControlService for ProcessorControl {
    async fn pause(&self) -> Result<()> {
        self.gate.pause();
        self.audit_control("pause", None).await;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.gate.resume();
        self.audit_control("resume", None).await;
        Ok(())
    }

    async fn single_step(&self) -> Result<StepOutcome> {
        let outcome = self.gate.single_step(Duration::from_secs(30)).await?;
        self.audit_control("single_step", Some(outcome.step().as_str()))
            .await;
        Ok(outcome)
    }

    async fn shutdown(&self, reason: &str) -> Result<()> {
        // Already shutting down: idempotent.
        if self.status.cognitive_state() != CognitiveState::Shutdown {
            self.status.transition(CognitiveState::Shutdown)?;
        }
        self.audit_control("shutdown", Some(reason)).await;
        self.cancel.cancel();
        // Wake anything parked at a step boundary so it can observe the
        // cancellation.
        self.gate.resume();
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_starts_in_wakeup_with_closed_intake() {
        let status = RuntimeStatus::new("occ-1", 60, Arc::new(StepGate::new()));
        assert_eq!(status.cognitive_state(), CognitiveState::Wakeup);
        assert!(!status.intake_open());
    }

    #[test]
    fn wakeup_to_work_opens_intake() {
        let status = RuntimeStatus::new("occ-1", 60, Arc::new(StepGate::new()));
        status.transition(CognitiveState::Work).unwrap();
        assert!(status.intake_open());
    }

    #[test]
    fn reserved_states_are_refused() {
        let status = RuntimeStatus::new("occ-1", 60, Arc::new(StepGate::new()));
        status.transition(CognitiveState::Work).unwrap();
        for state in [
            CognitiveState::Play,
            CognitiveState::Solitude,
            CognitiveState::Dream,
        ] {
            let err = status.transition(state).unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
        assert_eq!(status.cognitive_state(), CognitiveState::Work);
    }

    #[test]
    fn backpressure_flag_gates_intake() {
        let status = RuntimeStatus::new("occ-1", 60, Arc::new(StepGate::new()));
        status.transition(CognitiveState::Work).unwrap();
        status.set_intake_paused(true);
        assert!(!status.intake_open());
        status.set_intake_paused(false);
        assert!(status.intake_open());
    }

    #[test]
    fn snapshot_reflects_state() {
        let gate = Arc::new(StepGate::new());
        let status = RuntimeStatus::new("occ-1", 45, gate.clone());
        status.transition(CognitiveState::Work).unwrap();
        gate.pause();

        let snap = status.snapshot();
        assert_eq!(snap.occurrence_id, "occ-1");
        assert_eq!(snap.cognitive_state, CognitiveState::Work);
        assert!(snap.paused);
        assert_eq!(snap.round_deadline_secs, 45);
    }
}
