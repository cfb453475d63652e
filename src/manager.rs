//! Flow Manager: the DAG executor. Fans out start nodes, awaits
//! predecessors, invokes callers, propagates errors, and launches the
//! compensating rollback subtree: a concurrent `tokio::spawn`-per-node
//! fan-out/fan-in executor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::caller::Caller;
use crate::error::{ExecutionError, RollbackError};
use crate::store::ReferenceStore;
use crate::tracker::Tracker;

/// The ambient context threaded through every `Do`/hook call: a run
/// correlation id, the cancellation channel, and a small bag of
/// request-scoped metadata. Interior-mutable so concurrent node tasks can
/// share one instance.
pub struct Context {
    run_id: String,
    started_at: chrono::DateTime<chrono::Utc>,
    metadata: RwLock<HashMap<String, String>>,
    cancelled: AtomicBool,
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Context {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: chrono::Utc::now(),
            metadata: RwLock::new(HashMap::new()),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Wall-clock time elapsed since this context was created, for
    /// completion-time logging.
    pub fn elapsed(&self) -> chrono::Duration {
        chrono::Utc::now() - self.started_at
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.write().unwrap().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.metadata.read().unwrap().get(key).cloned()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A lifecycle hook: `BeforeDo`/`AfterDo`/`BeforeRollback`/`AfterRollback`.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn call(&self, ctx: &Context, store: &ReferenceStore) -> anyhow::Result<()>;
}

/// A post-execution function run against the store once the forward pass
/// completes without error (a flow's post-execution "Stack").
#[async_trait]
pub trait StackFn: Send + Sync {
    async fn call(&self, store: &ReferenceStore) -> anyhow::Result<()>;
}

/// An async condition variable counting in-flight node tasks, equivalent
/// to a `sync.WaitGroup`: `add` before spawning, `done` when a task exits,
/// `wait` blocks until the count returns to zero.
struct WaitGroup {
    count: AtomicIsize,
    notify: Notify,
}

impl WaitGroup {
    fn new() -> Self {
        WaitGroup {
            count: AtomicIsize::new(0),
            notify: Notify::new(),
        }
    }

    fn add(&self, n: isize) {
        self.count.fetch_add(n, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.count.load(Ordering::SeqCst) <= 0 {
                return;
            }
            notified.await;
        }
    }
}

/// A node wired for execution: the caller adapter plus the computed
/// `Previous`/`Next` edges (indices into the owning `Manager::nodes`).
pub struct RuntimeNode {
    pub name: String,
    pub call: Option<Arc<dyn Caller>>,
    pub rollback: Option<Arc<dyn Caller>>,
    pub previous: Vec<usize>,
    pub next: Vec<usize>,
}

impl RuntimeNode {
    pub fn new(name: impl Into<String>) -> Self {
        RuntimeNode {
            name: name.into(),
            call: None,
            rollback: None,
            previous: Vec::new(),
            next: Vec::new(),
        }
    }
}

/// The DAG executor for one flow. Built once per flow (or proxy) and
/// reused across invocations; each `do_flow` call is a fresh run against
/// its own `Tracker` and `ReferenceStore`.
pub struct Manager {
    pub flow_name: String,
    nodes: Vec<RuntimeNode>,
    starting: Vec<usize>,
    before_do: Option<Arc<dyn Hook>>,
    after_do: Option<Arc<dyn Hook>>,
    before_rollback: Option<Arc<dyn Hook>>,
    after_rollback: Option<Arc<dyn Hook>>,
    stack: Vec<Arc<dyn StackFn>>,
}

impl Manager {
    pub fn new(flow_name: impl Into<String>, nodes: Vec<RuntimeNode>) -> Self {
        let starting = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.previous.is_empty())
            .map(|(i, _)| i)
            .collect();

        Manager {
            flow_name: flow_name.into(),
            nodes,
            starting,
            before_do: None,
            after_do: None,
            before_rollback: None,
            after_rollback: None,
            stack: Vec::new(),
        }
    }

    pub fn with_before_do(mut self, hook: Arc<dyn Hook>) -> Self {
        self.before_do = Some(hook);
        self
    }

    pub fn with_after_do(mut self, hook: Arc<dyn Hook>) -> Self {
        self.after_do = Some(hook);
        self
    }

    pub fn with_before_rollback(mut self, hook: Arc<dyn Hook>) -> Self {
        self.before_rollback = Some(hook);
        self
    }

    pub fn with_after_rollback(mut self, hook: Arc<dyn Hook>) -> Self {
        self.after_rollback = Some(hook);
        self
    }

    pub fn with_stack(mut self, stack: Vec<Arc<dyn StackFn>>) -> Self {
        self.stack = stack;
        self
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// `Do(ctx, store)`: the forward execution protocol — fan out to start
    /// nodes, let dependents unblock as predecessors finish, barrier on the
    /// last one, then run the stack or roll back.
    pub async fn do_flow(
        self: &Arc<Self>,
        ctx: Arc<Context>,
        store: Arc<ReferenceStore>,
    ) -> Result<(), ExecutionError> {
        info!(flow = %self.flow_name, run_id = %ctx.run_id(), nodes = self.nodes.len(), "starting flow");

        if let Some(hook) = &self.before_do {
            if let Err(source) = hook.call(&ctx, &store).await {
                return Err(ExecutionError::HookFailed {
                    hook: "before_do",
                    source,
                });
            }
        }

        let previous_counts: Vec<usize> = self.nodes.iter().map(|n| n.previous.len()).collect();
        let tracker = Arc::new(Tracker::new(&previous_counts));
        let error_slot: Arc<Mutex<Option<ExecutionError>>> = Arc::new(Mutex::new(None));
        let wg = Arc::new(WaitGroup::new());

        for &start in &self.starting {
            if tracker.try_schedule(start) {
                wg.add(1);
                tokio::spawn(Self::run_node(
                    self.clone(),
                    start,
                    ctx.clone(),
                    store.clone(),
                    tracker.clone(),
                    error_slot.clone(),
                    wg.clone(),
                ));
            }
        }

        wg.wait().await;

        let mut error = error_slot.lock().unwrap().take();

        if error.is_none() {
            for (index, stack_fn) in self.stack.iter().enumerate() {
                if let Err(source) = stack_fn.call(&store).await {
                    error = Some(ExecutionError::StoreFunctionFailed { index, source });
                    break;
                }
            }
        } else {
            let reached: Vec<bool> = (0..self.nodes.len()).map(|i| tracker.reached(i)).collect();

            if let Some(hook) = &self.before_rollback {
                if let Err(source) = hook.call(&ctx, &store).await {
                    warn!(flow = %self.flow_name, run_id = %ctx.run_id(), %source, "before_rollback hook failed");
                }
            }

            for rollback_error in self.revert(&reached, &ctx, &store).await {
                warn!(flow = %self.flow_name, run_id = %ctx.run_id(), node = %rollback_error.node, error = %rollback_error.source, "rollback failed");
            }

            if let Some(hook) = &self.after_rollback {
                if let Err(source) = hook.call(&ctx, &store).await {
                    warn!(flow = %self.flow_name, run_id = %ctx.run_id(), %source, "after_rollback hook failed");
                }
            }
        }

        if let Some(hook) = &self.after_do {
            if let Err(source) = hook.call(&ctx, &store).await {
                // The forward-phase error wins when both an earlier
                // failure and AfterDo's error exist.
                if error.is_none() {
                    error = Some(ExecutionError::HookFailed {
                        hook: "after_do",
                        source,
                    });
                }
            }
        }

        info!(
            flow = %self.flow_name,
            run_id = %ctx.run_id(),
            elapsed_ms = ctx.elapsed().num_milliseconds(),
            ok = error.is_none(),
            "flow finished"
        );

        match error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn run_node(
        manager: Arc<Manager>,
        node: usize,
        ctx: Arc<Context>,
        store: Arc<ReferenceStore>,
        tracker: Arc<Tracker>,
        error_slot: Arc<Mutex<Option<ExecutionError>>>,
        wg: Arc<WaitGroup>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
        let name = manager.nodes[node].name.clone();
        info!(node = %name, run_id = %ctx.run_id(), "running node");

        let outcome = match &manager.nodes[node].call {
            Some(caller) => caller.do_call(&ctx, &store).await,
            None => Ok(()),
        };

        match outcome {
            Ok(()) => {
                info!(node = %name, run_id = %ctx.run_id(), "node succeeded");
                tracker.mark_reached(node);

                let next = manager.nodes[node].next.clone();
                for successor in next {
                    if tracker.decrement(successor) == 0 {
                        let has_error = error_slot.lock().unwrap().is_some();
                        if !has_error && tracker.try_schedule(successor) {
                            wg.add(1);
                            tokio::spawn(Self::run_node(
                                manager.clone(),
                                successor,
                                ctx.clone(),
                                store.clone(),
                                tracker.clone(),
                                error_slot.clone(),
                                wg.clone(),
                            ));
                        }
                    }
                }
            }
            Err(source) => {
                warn!(node = %name, run_id = %ctx.run_id(), %source, "node failed");
                let mut slot = error_slot.lock().unwrap();
                if slot.is_none() {
                    *slot = Some(ExecutionError::NodeCallFailed {
                        node: name,
                        source,
                    });
                }
            }
        }

        wg.done();
        })
    }

    /// `Revert(tracker, store)`: walks backwards from every node reached in
    /// the forward pass, invoking `Rollback.Do` on each node once all of
    /// its own reached successors have finished rolling back (the fan-in
    /// mirror of forward execution). Run once the forward barrier has
    /// drained, so the `reached` set is final and bookkeeping is accurate.
    async fn revert(
        &self,
        reached: &[bool],
        ctx: &Arc<Context>,
        store: &Arc<ReferenceStore>,
    ) -> Vec<RollbackError> {
        let pending_counts: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                if !reached[i] {
                    return 0;
                }
                node.next.iter().filter(|&&succ| reached[succ]).count()
            })
            .collect();

        let revert_tracker = Arc::new(Tracker::new(&pending_counts));
        let errors: Arc<Mutex<Vec<RollbackError>>> = Arc::new(Mutex::new(Vec::new()));
        let wg = Arc::new(WaitGroup::new());

        let leaves: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| reached[i] && pending_counts[i] == 0)
            .collect();

        for leaf in leaves {
            if revert_tracker.try_schedule(leaf) {
                wg.add(1);
                tokio::spawn(Self::run_revert(
                    self.node_snapshot(),
                    leaf,
                    ctx.clone(),
                    store.clone(),
                    reached.to_vec(),
                    revert_tracker.clone(),
                    errors.clone(),
                    wg.clone(),
                ));
            }
        }

        wg.wait().await;
        // Every task pushes its error before calling `wg.done()`, so by the
        // time `wait()` observes the count hitting zero every push has
        // already landed in the mutex — draining through the lock avoids
        // racing `Arc::try_unwrap` against a sibling task's still-in-flight
        // clone of `errors`, which could otherwise fail the unwrap and
        // silently discard already-collected errors.
        let drained = std::mem::take(&mut *errors.lock().unwrap());
        drained
    }

    /// Clones the rollback-relevant shape of every node (name, rollback
    /// caller, previous edges) so the revert subtree can be spawned as
    /// `'static` tasks without borrowing `self`.
    fn node_snapshot(&self) -> Arc<Vec<RevertNode>> {
        Arc::new(
            self.nodes
                .iter()
                .map(|n| RevertNode {
                    name: n.name.clone(),
                    rollback: n.rollback.clone(),
                    previous: n.previous.clone(),
                })
                .collect(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn run_revert(
        nodes: Arc<Vec<RevertNode>>,
        node: usize,
        ctx: Arc<Context>,
        store: Arc<ReferenceStore>,
        reached: Vec<bool>,
        tracker: Arc<Tracker>,
        errors: Arc<Mutex<Vec<RollbackError>>>,
        wg: Arc<WaitGroup>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
        let name = nodes[node].name.clone();

        if let Some(rollback) = &nodes[node].rollback {
            info!(node = %name, "rolling back node");
            if let Err(source) = rollback.do_call(&ctx, &store).await {
                errors.lock().unwrap().push(RollbackError { node: name.clone(), source });
            }
        }

        let previous = nodes[node].previous.clone();
        for predecessor in previous {
            if reached[predecessor] && tracker.decrement(predecessor) == 0 && tracker.try_schedule(predecessor) {
                wg.add(1);
                tokio::spawn(Self::run_revert(
                    nodes.clone(),
                    predecessor,
                    ctx.clone(),
                    store.clone(),
                    reached.clone(),
                    tracker.clone(),
                    errors.clone(),
                    wg.clone(),
                ));
            }
        }

        wg.done();
        })
    }
}

struct RevertNode {
    name: String,
    rollback: Option<Arc<dyn Caller>>,
    previous: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caller::StubCaller;
    use std::sync::atomic::AtomicUsize;

    /// Counts invocations in addition to delegating to a `StubCaller`, so
    /// tests can assert exactly-once / rollback-locality without poking at
    /// the store.
    struct CountingCaller {
        delegate: StubCaller,
        counter: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Caller for CountingCaller {
        async fn do_call(&self, ctx: &Context, store: &ReferenceStore) -> anyhow::Result<()> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            self.delegate.do_call(ctx, store).await
        }
    }

    fn counting(name: &str, counter: &Arc<AtomicUsize>, fail: bool) -> Arc<dyn Caller> {
        Arc::new(CountingCaller {
            delegate: if fail {
                StubCaller::failing(name)
            } else {
                StubCaller::new(name)
            },
            counter: counter.clone(),
        })
    }

    /// Builds a diamond DAG: `first -> {second, third} -> fourth`.
    fn diamond(
        call_counter: &Arc<AtomicUsize>,
        rollback_counter: &Arc<AtomicUsize>,
        fail_third: bool,
    ) -> Manager {
        let mut nodes = vec![
            RuntimeNode::new("first"),
            RuntimeNode::new("second"),
            RuntimeNode::new("third"),
            RuntimeNode::new("fourth"),
        ];

        nodes[0].call = Some(counting("first", call_counter, false));
        nodes[0].rollback = Some(counting("first", rollback_counter, false));
        nodes[0].next = vec![1, 2];

        nodes[1].call = Some(counting("second", call_counter, false));
        nodes[1].rollback = Some(counting("second", rollback_counter, false));
        nodes[1].previous = vec![0];
        nodes[1].next = vec![3];

        nodes[2].call = Some(counting("third", call_counter, fail_third));
        nodes[2].rollback = Some(counting("third", rollback_counter, false));
        nodes[2].previous = vec![0];
        nodes[2].next = vec![3];

        nodes[3].call = Some(counting("fourth", call_counter, false));
        nodes[3].rollback = Some(counting("fourth", rollback_counter, false));
        nodes[3].previous = vec![1, 2];

        Manager::new("diamond", nodes)
    }

    #[tokio::test]
    async fn diamond_dag_all_succeed_runs_every_node_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let rollbacks = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(diamond(&calls, &rollbacks, false));

        let result = manager
            .do_flow(Arc::new(Context::new()), Arc::new(ReferenceStore::new()))
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(rollbacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn diamond_dag_failure_at_third_rolls_back_completed_predecessors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let rollbacks = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(diamond(&calls, &rollbacks, true));

        let result = manager
            .do_flow(Arc::new(Context::new()), Arc::new(ReferenceStore::new()))
            .await;

        assert!(result.is_err());
        // first, second, and third's own (failing) call all ran; fourth
        // never runs because it depends on third, which never reaches.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // only first and second reached successfully, so only they roll
        // back — third failed so was never "reached", fourth never ran.
        assert_eq!(rollbacks.load(Ordering::SeqCst), 2);
    }

    struct FnHook<F>(F);

    #[async_trait]
    impl<F> Hook for FnHook<F>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync,
    {
        async fn call(&self, _ctx: &Context, _store: &ReferenceStore) -> anyhow::Result<()> {
            (self.0)()
        }
    }

    #[tokio::test]
    async fn before_do_error_prevents_any_node_from_running() {
        let calls = Arc::new(AtomicUsize::new(0));
        let rollbacks = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(
            diamond(&calls, &rollbacks, false)
                .with_before_do(Arc::new(FnHook(|| anyhow::bail!("blocked")))),
        );

        let result = manager
            .do_flow(Arc::new(Context::new()), Arc::new(ReferenceStore::new()))
            .await;

        assert!(matches!(result, Err(ExecutionError::HookFailed { hook: "before_do", .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn after_do_error_surfaces_when_forward_pass_succeeded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let rollbacks = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(
            diamond(&calls, &rollbacks, false)
                .with_after_do(Arc::new(FnHook(|| anyhow::bail!("after failed")))),
        );

        let result = manager
            .do_flow(Arc::new(Context::new()), Arc::new(ReferenceStore::new()))
            .await;

        assert!(matches!(result, Err(ExecutionError::HookFailed { hook: "after_do", .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn forward_error_wins_over_after_do_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let rollbacks = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(
            diamond(&calls, &rollbacks, true)
                .with_after_do(Arc::new(FnHook(|| anyhow::bail!("after failed too")))),
        );

        let result = manager
            .do_flow(Arc::new(Context::new()), Arc::new(ReferenceStore::new()))
            .await;

        match result {
            Err(ExecutionError::NodeCallFailed { node, .. }) => assert_eq!(node, "third"),
            other => panic!("expected the forward-phase error to win, got {other:?}"),
        }
    }

    struct RecordingStackFn {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl StackFn for RecordingStackFn {
        async fn call(&self, _store: &ReferenceStore) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(self.label);
            if self.fail {
                anyhow::bail!("stack function '{}' failed", self.label);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn stack_functions_run_in_order_and_keep_earlier_side_effects_on_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let rollbacks = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(Mutex::new(Vec::new()));

        let stack: Vec<Arc<dyn StackFn>> = vec![
            Arc::new(RecordingStackFn { label: "a", log: log.clone(), fail: false }),
            Arc::new(RecordingStackFn { label: "b", log: log.clone(), fail: false }),
            Arc::new(RecordingStackFn { label: "c", log: log.clone(), fail: true }),
        ];

        let manager = Arc::new(diamond(&calls, &rollbacks, false).with_stack(stack));

        let result = manager
            .do_flow(Arc::new(Context::new()), Arc::new(ReferenceStore::new()))
            .await;

        assert!(matches!(result, Err(ExecutionError::StoreFunctionFailed { index: 2, .. })));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }
}
