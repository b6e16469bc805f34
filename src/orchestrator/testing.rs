//! Test doubles shared by the orchestrator tests.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::config::CURRENT_SCHEMA_VERSION;
use crate::error::{Result, StackError};
use crate::model::Urn;
use crate::stack::{ResultCode, StackEngine, StackReference, StackResult};
use crate::state::{EnvironmentState, LocalStateStore, StateManager, StateStore};

use super::base::Orchestrator;
use super::evaluator::MockConstructEvaluator;
use super::progress::ProgressReporter;

pub fn urn(id: &str) -> Urn {
    Urn::parse(&format!("urn:acme:shop:dev:web:construct/klotho.aws.Thing:{id}"))
        .expect("valid urn")
}

/// Engine that records calls instead of provisioning anything.
///
/// Calls are labelled `"<operation> <resource id>"`.
#[derive(Debug, Default)]
pub struct FakeEngine {
    calls: Mutex<Vec<String>>,
    stacks: Mutex<Vec<StackReference>>,
    failures: Mutex<HashSet<String>>,
    panics: HashSet<String>,
    failed_results: HashSet<String>,
    outputs: BTreeMap<String, BTreeMap<String, Value>>,
    resources: BTreeMap<String, BTreeMap<String, Value>>,
    delay_ms: u64,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeEngine {
    pub fn with_output(mut self, stack: &str, key: &str, value: &str) -> Self {
        self.outputs
            .entry(stack.to_string())
            .or_default()
            .insert(key.to_string(), json!(value));
        self
    }

    /// Publishes a resource with stable identity `id` from `stack`'s snapshot.
    pub fn with_resource(mut self, stack: &str, id: &str, outputs: Value) -> Self {
        self.resources
            .entry(stack.to_string())
            .or_default()
            .insert(id.to_string(), outputs);
        self
    }

    pub fn failing(self, operation: &str, stack: &str) -> Self {
        self.failures
            .lock()
            .expect("lock")
            .insert(format!("{operation} {stack}"));
        self
    }

    pub fn panicking(mut self, operation: &str, stack: &str) -> Self {
        self.panics.insert(format!("{operation} {stack}"));
        self
    }

    /// Makes `up` of `stack` run to completion but report a failed result.
    pub fn not_converging(mut self, stack: &str) -> Self {
        self.failed_results.insert(stack.to_string());
        self
    }

    pub const fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn clear_failures(&self) {
        self.failures.lock().expect("lock").clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    /// Every stack reference the engine was handed, in call order.
    pub fn stacks(&self) -> Vec<StackReference> {
        self.stacks.lock().expect("lock").clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn label(stack: &StackReference) -> &str {
        &stack.construct_urn.resource_id
    }

    async fn record(&self, operation: &str, stack: &StackReference) -> Result<()> {
        let call = format!("{operation} {}", Self::label(stack));
        self.calls.lock().expect("lock").push(call.clone());
        self.stacks.lock().expect("lock").push(stack.clone());

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        assert!(!self.panics.contains(&call), "simulated panic in {call}");
        if self.failures.lock().expect("lock").contains(&call) {
            return Err(StackError::CommandFailed {
                command: operation.to_string(),
                stack: stack.name.clone(),
                message: String::from("error: simulated failure"),
            }
            .into());
        }
        Ok(())
    }

    fn snapshot(&self, stack: &StackReference) -> Value {
        let label = Self::label(stack);
        let outputs = self.outputs.get(label).cloned().unwrap_or_default();
        let published = self.resources.get(label).cloned().unwrap_or_default();

        let mut resources = vec![json!({
            "urn": format!("urn:pulumi:{0}::{0}::pulumi:pulumi:Stack::{0}", stack.name),
            "type": "pulumi:pulumi:Stack",
            "outputs": {
                "$outputs": outputs,
                "$urns": published
                    .keys()
                    .map(|id| (id.clone(), json!(handle(stack, id))))
                    .collect::<serde_json::Map<_, _>>(),
            }
        })];
        for (id, outputs) in published {
            resources.push(json!({
                "urn": handle(stack, &id),
                "type": "aws:fake:Resource",
                "outputs": outputs,
            }));
        }
        json!({ "version": 3, "deployment": { "resources": resources } })
    }
}

fn handle(stack: &StackReference, id: &str) -> String {
    format!("urn:pulumi:{0}::{0}::aws:fake:Resource::{id}", stack.name)
}

#[async_trait]
impl StackEngine for FakeEngine {
    async fn preview(
        &self,
        stack: &StackReference,
        _progress: &ProgressReporter,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.record("preview", stack).await
    }

    async fn compile(
        &self,
        stack: &StackReference,
        _progress: &ProgressReporter,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.record("compile", stack).await
    }

    async fn up(
        &self,
        stack: &StackReference,
        _progress: &ProgressReporter,
        _cancel: &CancellationToken,
    ) -> Result<StackResult> {
        self.record("up", stack).await?;
        if self.failed_results.contains(Self::label(stack)) {
            return Ok(StackResult {
                result: ResultCode::Failed,
                snapshot: Value::Null,
            });
        }
        Ok(StackResult {
            result: ResultCode::Succeeded,
            snapshot: self.snapshot(stack),
        })
    }

    async fn destroy(
        &self,
        stack: &StackReference,
        _progress: &ProgressReporter,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.record("destroy", stack).await
    }

    async fn export_state(
        &self,
        stack: &StackReference,
        _progress: &ProgressReporter,
        _cancel: &CancellationToken,
    ) -> Result<Value> {
        Ok(self.snapshot(stack))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// A temp state directory, a fake engine and a pass-through evaluator.
pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub dir: TempDir,
    store: Arc<LocalStateStore>,
}

impl Harness {
    pub fn new(engine: FakeEngine) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let store = Arc::new(LocalStateStore::with_state_path(dir.path().join("state.json")));
        Self {
            engine: Arc::new(engine),
            dir,
            store,
        }
    }

    fn evaluator() -> MockConstructEvaluator {
        let mut evaluator = MockConstructEvaluator::new();
        evaluator
            .expect_evaluate()
            .returning(|_, _, out_dir, _, _| Ok(out_dir.to_path_buf()));
        evaluator
    }

    fn with_state(&self, state: EnvironmentState, evaluator: MockConstructEvaluator) -> Orchestrator {
        let store: Arc<dyn StateStore> = self.store.clone();
        Orchestrator::new(
            Arc::new(StateManager::new(store, state)),
            self.engine.clone(),
            Arc::new(evaluator),
            self.dir.path().join("out"),
        )
    }

    fn empty_state() -> EnvironmentState {
        EnvironmentState::new(
            CURRENT_SCHEMA_VERSION,
            Urn::parse("urn:acme:shop:dev:web").expect("valid urn"),
            "dev",
            "us-east-1",
        )
    }

    /// Builds an orchestrator over an empty state document.
    pub fn build(&self) -> Orchestrator {
        self.with_state(Self::empty_state(), Self::evaluator())
    }

    /// Builds an orchestrator over an empty state document with a custom evaluator.
    pub fn build_with_evaluator(&self, evaluator: MockConstructEvaluator) -> Orchestrator {
        self.with_state(Self::empty_state(), evaluator)
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        Arc::new(self.build())
    }

    /// Builds an orchestrator over whatever was last saved.
    pub async fn reloaded_orchestrator(&self) -> Arc<Orchestrator> {
        let state = self.saved_state().await;
        Arc::new(self.with_state(state, Self::evaluator()))
    }

    pub async fn stored_state(&self) -> Option<EnvironmentState> {
        self.store.load().await.expect("load state")
    }

    pub async fn saved_state(&self) -> EnvironmentState {
        self.stored_state().await.expect("state was saved")
    }
}
