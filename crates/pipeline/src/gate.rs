//! The step gate: pause and single-step at step boundaries.
//!
//! The runner calls [`StepGate::checkpoint`] before every step point.
//! While paused, the checkpoint blocks until either a resume or a
//! single-step ticket arrives; each ticket admits exactly one step. The
//! outcome of every executed step is published so a single-step caller
//! receives the typed result of the step it released — including its
//! failure.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::{broadcast, Notify};

use ciris_domain::pipeline::StepOutcome;
use ciris_domain::{Error, Result};

pub struct StepGate {
    paused: AtomicBool,
    /// Outstanding single-step tickets, each admitting one step.
    tickets: AtomicUsize,
    wake: Notify,
    outcomes: broadcast::Sender<StepOutcome>,
}

impl Default for StepGate {
    fn default() -> Self {
        Self::new()
    }
}

impl StepGate {
    pub fn new() -> Self {
        let (outcomes, _) = broadcast::channel(64);
        Self {
            paused: AtomicBool::new(false),
            tickets: AtomicUsize::new(0),
            wake: Notify::new(),
            outcomes,
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.tickets.store(0, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Block while paused, unless a single-step ticket admits one step.
    /// Called by the runner before every step point.
    pub async fn checkpoint(&self) {
        loop {
            if !self.is_paused() {
                return;
            }
            if self.try_take_ticket() {
                return;
            }
            self.wake.notified().await;
        }
    }

    fn try_take_ticket(&self) -> bool {
        let mut current = self.tickets.load(Ordering::SeqCst);
        while current > 0 {
            match self.tickets.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
        false
    }

    /// Publish the typed outcome of a just-executed step.
    pub fn publish(&self, outcome: StepOutcome) {
        let _ = self.outcomes.send(outcome);
    }

    /// Release exactly one step and return its outcome.
    ///
    /// Errors when the gate is not paused (single-step is a debugging
    /// operation over a frozen pipeline) or when no thought executes a
    /// step within the wait window.
    pub async fn single_step(&self, wait: std::time::Duration) -> Result<StepOutcome> {
        if !self.is_paused() {
            return Err(Error::Validation(
                "single-step requires the processor to be paused".into(),
            ));
        }
        let mut rx = self.outcomes.subscribe();
        self.tickets.fetch_add(1, Ordering::SeqCst);
        self.wake.notify_waiters();

        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(Error::Fatal("step outcome channel closed".into())),
            Err(_) => Err(Error::Timeout("single_step: no thought advanced".into())),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ciris_domain::pipeline::StepPoint;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn checkpoint_is_transparent_while_running() {
        let gate = StepGate::new();
        // Must return immediately.
        tokio::time::timeout(Duration::from_millis(50), gate.checkpoint())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn pause_blocks_checkpoint_until_resume() {
        let gate = Arc::new(StepGate::new());
        gate.pause();

        let waiting = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.checkpoint().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        gate.resume();
        tokio::time::timeout(Duration::from_millis(100), waiting)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn single_step_releases_one_checkpoint_and_returns_outcome() {
        let gate = Arc::new(StepGate::new());
        gate.pause();

        let worker = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.checkpoint().await;
                gate.publish(StepOutcome::StartRound { round: 3 });
                // Second checkpoint blocks again: one ticket = one step.
                gate.checkpoint().await;
                gate.publish(StepOutcome::ActionRecorded);
            })
        };

        let outcome = gate
            .single_step(Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::StartRound { round: 3 });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!worker.is_finished());

        let outcome = gate
            .single_step(Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(outcome.step(), StepPoint::ActionComplete);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn single_step_propagates_step_failure() {
        let gate = Arc::new(StepGate::new());
        gate.pause();

        let worker = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.checkpoint().await;
                gate.publish(StepOutcome::Failed {
                    at: StepPoint::PerformDmas,
                    error: "llm timeout".into(),
                });
            })
        };

        let outcome = gate
            .single_step(Duration::from_millis(500))
            .await
            .unwrap();
        assert!(outcome.is_failure());
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn single_step_while_running_is_an_error() {
        let gate = StepGate::new();
        let err = gate
            .single_step(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn single_step_times_out_with_no_inflight_thought() {
        let gate = StepGate::new();
        gate.pause();
        let err = gate
            .single_step(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
