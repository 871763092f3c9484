//! Background coordinator that drives policy evaluation.
//!
//! Exactly one worker runs between `start` and `stop`; both are idempotent.
//! The worker wakes on a fixed interval or on an explicit trigger, with at
//! most one trigger queued at a time. Listing and evaluation errors are
//! logged and swallowed so a single poisoned policy cannot halt the loop.

use super::{ActionExecutor, Engine, MetricProvider, PolicyStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;

pub struct PolicyManager {
    engine: Arc<Engine>,
    store: Arc<dyn PolicyStore>,
    eval_interval: Duration,
    parent_cancel: Option<watch::Receiver<bool>>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    running: bool,
    trigger_tx: Option<mpsc::Sender<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl PolicyManager {
    pub fn new(
        metrics: Arc<dyn MetricProvider>,
        executor: Arc<dyn ActionExecutor>,
        store: Arc<dyn PolicyStore>,
        eval_interval: Duration,
    ) -> Self {
        Self {
            engine: Arc::new(Engine::new(metrics, executor)),
            store,
            eval_interval,
            parent_cancel: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Attach a parent cancellation signal, distinct from the administrative
    /// stop: either one ends the worker.
    pub fn with_parent_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.parent_cancel = Some(cancel);
        self
    }

    /// Launch the worker. A second start while running is a no-op.
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        if inner.running {
            return;
        }
        inner.running = true;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // Capacity one: a trigger arriving while one is pending coalesces.
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        inner.shutdown_tx = Some(shutdown_tx);
        inner.trigger_tx = Some(trigger_tx);

        let worker = Worker {
            engine: Arc::clone(&self.engine),
            store: Arc::clone(&self.store),
            interval: self.eval_interval,
            parent_cancel: self.parent_cancel.clone(),
        };
        inner.handle = Some(tokio::spawn(worker.run(shutdown_rx, trigger_rx)));
    }

    /// Signal the worker and wait for its exit. A second stop is a no-op.
    pub async fn stop(&self) {
        let handle = {
            let mut inner = self.inner.lock();
            if !inner.running {
                return;
            }
            inner.running = false;
            if let Some(shutdown_tx) = inner.shutdown_tx.take() {
                let _ = shutdown_tx.send(true);
            }
            inner.trigger_tx = None;
            inner.handle.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Non-blocking evaluation hint; coalesced if one is already pending.
    pub fn trigger_evaluation(&self) {
        let inner = self.inner.lock();
        if let Some(trigger_tx) = &inner.trigger_tx {
            let _ = trigger_tx.try_send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }
}

struct Worker {
    engine: Arc<Engine>,
    store: Arc<dyn PolicyStore>,
    interval: Duration,
    parent_cancel: Option<watch::Receiver<bool>>,
}

impl Worker {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>, mut trigger: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick of a tokio interval fires immediately; consume it so
        // evaluation starts one interval after launch.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = parent_cancelled(&mut self.parent_cancel) => break,
                _ = ticker.tick() => self.evaluate().await,
                _ = trigger.recv() => self.evaluate().await,
            }
        }
    }

    async fn evaluate(&self) {
        let policies = match self.store.list().await {
            Ok(policies) => policies,
            Err(err) => {
                warn!(error = %err, "failed to list policies");
                return;
            }
        };
        if let Err(err) = self.engine.evaluate_policies(&policies).await {
            warn!(error = %err, "failed to evaluate policies");
        }
    }
}

async fn parent_cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    match cancel {
        // A dropped sender also counts as cancellation.
        Some(rx) => {
            let _ = rx.changed().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::policy::{
        Action, Condition, Conditions, InMemoryPolicyStore, Operator, Policy, PolicyType,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    struct HighCpu;

    #[async_trait]
    impl MetricProvider for HighCpu {
        async fn get_metric(&self, name: &str) -> Result<f64> {
            match name {
                "cpu_usage" => Ok(90.0),
                _ => Err(Error::not_found(format!("metric {name} not found"))),
            }
        }
    }

    #[derive(Default)]
    struct CountingExecutor {
        executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ActionExecutor for CountingExecutor {
        async fn execute_action(&self, action: &Action) -> Result<()> {
            self.executed.lock().push(action.action_type.clone());
            Ok(())
        }
    }

    async fn store_with_high_cpu_policy() -> Arc<InMemoryPolicyStore> {
        let store = Arc::new(InMemoryPolicyStore::new());
        let mut policy = Policy {
            id: Uuid::new_v4(),
            name: "high-cpu".to_string(),
            description: String::new(),
            policy_type: PolicyType::LoadBalancing,
            priority: 1,
            conditions: Conditions {
                all: vec![Condition {
                    metric: "cpu_usage".to_string(),
                    operator: Operator::Gt,
                    value: json!(80.0),
                }],
                any: Vec::new(),
            },
            actions: vec![Action {
                action_type: "notify_admin".to_string(),
                strategy: None,
                constraints: serde_json::Map::new(),
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.store(&mut policy).await.unwrap();
        store
    }

    #[tokio::test]
    async fn periodic_evaluation_executes_actions() {
        let executor = Arc::new(CountingExecutor::default());
        let store = store_with_high_cpu_policy().await;
        let manager = PolicyManager::new(
            Arc::new(HighCpu),
            executor.clone(),
            store,
            Duration::from_millis(100),
        );

        manager.start();
        manager.start(); // double start is a no-op
        tokio::time::sleep(Duration::from_millis(350)).await;
        manager.stop().await;
        manager.stop().await; // double stop is a no-op

        let executed = executor.executed.lock().clone();
        assert!(executed.len() >= 2, "expected >= 2 executions, got {executed:?}");
        assert!(executed.iter().all(|a| a == "notify_admin"));
    }

    #[tokio::test]
    async fn trigger_forces_an_evaluation_between_ticks() {
        let executor = Arc::new(CountingExecutor::default());
        let store = store_with_high_cpu_policy().await;
        let manager = PolicyManager::new(
            Arc::new(HighCpu),
            executor.clone(),
            store,
            Duration::from_secs(3600),
        );

        manager.start();
        manager.trigger_evaluation();
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.stop().await;

        assert_eq!(executor.executed.lock().len(), 1);
    }

    #[tokio::test]
    async fn parent_cancel_ends_the_worker() {
        let executor = Arc::new(CountingExecutor::default());
        let store = store_with_high_cpu_policy().await;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let manager = PolicyManager::new(
            Arc::new(HighCpu),
            executor,
            store,
            Duration::from_millis(50),
        )
        .with_parent_cancel(cancel_rx);

        manager.start();
        cancel_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // The worker is gone; stop still completes immediately.
        manager.stop().await;
    }

    #[tokio::test]
    async fn trigger_before_start_is_ignored() {
        let executor = Arc::new(CountingExecutor::default());
        let store = store_with_high_cpu_policy().await;
        let manager = PolicyManager::new(
            Arc::new(HighCpu),
            executor.clone(),
            store,
            Duration::from_secs(3600),
        );
        manager.trigger_evaluation();
        assert!(!manager.is_running());
        assert!(executor.executed.lock().is_empty());
    }
}
