//! The per-node context: identity, lifecycle state, and wrapped primitives.
//!
//! A `Ctx` is a cheap handle on the node's shared core. Every capability
//! bound to a node observes the same core; the parent link is weak and
//! lookup-only, so the context tree is a tree of owners downward and
//! references upward, never a cycle.
//!
//! Mutation is confined to the node's own execution frame and to capabilities
//! holding a handle. The merged hook set and override chains are installed
//! once after composition and immutable afterwards.

use crate::capability::CapabilitySet;
use crate::compose::Composite;
use crate::driver::{Driver, Signal};
use crate::errors::EngineError;
use crate::hooks::HookSet;
use crate::options::OptionSet;
use crate::overrides::{ChainSet, SlotArgs, SlotName, SlotValue};
use crate::plan::Params;
use crate::report::{Outcome, PanicRecord};
use crate::report::Collector;
use std::panic::panic_any;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::Instant;

/// Classification of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// The suite root.
    Suite,
    /// A regular top-level test; `base` is the raw registered name.
    Test { base: String },
    /// One generated combination of a parametrized test.
    Case { base: String, params: Params },
    /// An ad-hoc named sub-block.
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    None,
    Soft,
    Fatal,
}

/// Control-flow unwind payloads for fail-now/skip-now. Recognized at the
/// node boundary and never recorded as panics.
pub(crate) enum Bailout {
    FailNow,
    SkipNow,
}

impl Default for Failure {
    fn default() -> Self {
        Failure::None
    }
}

#[derive(Debug, Default)]
pub(crate) struct NodeState {
    running: bool,
    failure: Failure,
    skip: Option<String>,
    panic: Option<PanicRecord>,
    detail: Option<String>,
    deferred: bool,
}

/// A node's merged behavior, computed once after composition.
pub(crate) struct Effective {
    pub(crate) hooks: HookSet,
    pub(crate) chains: ChainSet,
}

/// Release gate for a node's parallel children: deferred children wait here
/// until every sequential sibling has been dispatched.
pub(crate) struct Gate {
    released: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            released: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn release(&self) {
        let mut released = self.released.lock().unwrap_or_else(PoisonError::into_inner);
        *released = true;
        self.cv.notify_all();
    }

    pub(crate) fn wait(&self) {
        let mut released = self.released.lock().unwrap_or_else(PoisonError::into_inner);
        while !*released {
            released = match self.cv.wait(released) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

pub(crate) struct ContextCore {
    parent: Option<Weak<ContextCore>>,
    depth: usize,
    name: String,
    suite_name: String,
    kind: NodeKind,
    /// Options visible to this node's capability initializers.
    scope_opts: OptionSet,
    /// Options flowing into child scopes.
    propagated: OptionSet,
    state: Mutex<NodeState>,
    effective: OnceLock<Effective>,
    pub(crate) driver: Arc<dyn Driver>,
    pub(crate) collector: Arc<Collector>,
    pub(crate) shape: Arc<CapabilitySet>,
    caps: Mutex<Option<Composite>>,
    /// Gate for this node's own parallel children.
    pub(crate) gate: Arc<Gate>,
    deferred_children: Mutex<Vec<JoinHandle<()>>>,
    /// Channel to the frame that dispatched this node; `None` at the root.
    signal: Option<Sender<Signal>>,
    parent_gate: Option<Arc<Gate>>,
}

/// Handle on one execution node in the test tree.
#[derive(Clone)]
pub struct Ctx {
    pub(crate) core: Arc<ContextCore>,
}

impl Ctx {
    pub(crate) fn root(
        name: &str,
        scope_opts: OptionSet,
        driver: Arc<dyn Driver>,
        collector: Arc<Collector>,
        shape: Arc<CapabilitySet>,
    ) -> Ctx {
        let propagated = scope_opts.propagating();
        Ctx {
            core: Arc::new(ContextCore {
                parent: None,
                depth: 0,
                name: name.to_string(),
                suite_name: name.to_string(),
                kind: NodeKind::Suite,
                scope_opts,
                propagated,
                state: Mutex::new(NodeState::default()),
                effective: OnceLock::new(),
                driver,
                collector,
                shape,
                caps: Mutex::new(None),
                gate: Arc::new(Gate::new()),
                deferred_children: Mutex::new(Vec::new()),
                signal: None,
                parent_gate: None,
            }),
        }
    }

    pub(crate) fn child(
        parent: &Ctx,
        name: &str,
        kind: NodeKind,
        extra_opts: OptionSet,
        signal: Sender<Signal>,
    ) -> Ctx {
        let mut scope_opts = parent.core.propagated.clone();
        scope_opts.extend(&extra_opts);
        let mut propagated = parent.core.propagated.clone();
        propagated.extend(&extra_opts.propagating());
        Ctx {
            core: Arc::new(ContextCore {
                parent: Some(Arc::downgrade(&parent.core)),
                depth: parent.core.depth + 1,
                name: name.to_string(),
                suite_name: parent.core.suite_name.clone(),
                kind,
                scope_opts,
                propagated,
                state: Mutex::new(NodeState::default()),
                effective: OnceLock::new(),
                driver: parent.core.driver.clone(),
                collector: parent.core.collector.clone(),
                shape: parent.core.shape.clone(),
                caps: Mutex::new(None),
                gate: Arc::new(Gate::new()),
                deferred_children: Mutex::new(Vec::new()),
                signal: Some(signal),
                parent_gate: Some(parent.core.gate.clone()),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn depth(&self) -> usize {
        self.core.depth
    }

    /// The suite name, own or inherited from the nearest ancestor.
    pub fn suite_name(&self) -> &str {
        &self.core.suite_name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.core.kind
    }

    /// The parent node, if it is still live. Lookup-only; a child never owns
    /// its parent.
    pub fn parent(&self) -> Option<Ctx> {
        self.core
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|core| Ctx { core })
    }

    /// Full node path, ancestor names joined with '/'.
    pub fn path(&self) -> String {
        match self.parent() {
            Some(parent) => format!("{}/{}", parent.path(), self.core.name),
            None => self.core.name.clone(),
        }
    }

    /// Options in scope at this node.
    pub fn options(&self) -> &OptionSet {
        &self.core.scope_opts
    }

    /// True when both handles refer to the same node.
    pub fn same_node(&self, other: &Ctx) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    // ------------------------------------------------------------------
    // Lifecycle state
    // ------------------------------------------------------------------

    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.core
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn mark_running(&self) {
        self.state().running = true;
    }

    /// True while the node's execution frame is live.
    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub(crate) fn record_soft_fail(&self) {
        let mut state = self.state();
        if state.failure == Failure::None {
            state.failure = Failure::Soft;
        }
    }

    pub(crate) fn record_fatal(&self) {
        self.state().failure = Failure::Fatal;
    }

    pub(crate) fn record_skip(&self, reason: &str) {
        let mut state = self.state();
        if state.skip.is_none() {
            state.skip = Some(reason.to_string());
        }
    }

    pub(crate) fn record_panic(&self, record: PanicRecord) {
        let mut state = self.state();
        state.failure = Failure::Fatal;
        state.panic = Some(record);
    }

    pub(crate) fn record_config_error(&self, error: &EngineError) {
        let mut state = self.state();
        state.failure = Failure::Fatal;
        state.detail = Some(error.to_string());
    }

    /// True once a fatal failure or skip means the body must not run.
    pub(crate) fn halted(&self) -> bool {
        let state = self.state();
        state.failure == Failure::Fatal || state.skip.is_some()
    }

    /// Terminal outcome. A node skipped after already failing reports the
    /// failure, not the skip.
    pub fn outcome(&self) -> Outcome {
        let state = self.state();
        match state.failure {
            Failure::Fatal => Outcome::FatalFailed,
            Failure::Soft => Outcome::SoftFailed,
            Failure::None if state.skip.is_some() => Outcome::Skipped,
            Failure::None => Outcome::Passed,
        }
    }

    pub fn failed(&self) -> bool {
        matches!(self.outcome(), Outcome::SoftFailed | Outcome::FatalFailed)
    }

    pub(crate) fn snapshot(&self) -> (Outcome, Option<String>, Option<PanicRecord>, Option<String>) {
        let state = self.state();
        let outcome = match state.failure {
            Failure::Fatal => Outcome::FatalFailed,
            Failure::Soft => Outcome::SoftFailed,
            Failure::None if state.skip.is_some() => Outcome::Skipped,
            Failure::None => Outcome::Passed,
        };
        (
            outcome,
            state.skip.clone(),
            state.panic.clone(),
            state.detail.clone(),
        )
    }

    // ------------------------------------------------------------------
    // Composition wiring
    // ------------------------------------------------------------------

    pub(crate) fn install(&self, effective: Effective, composite: Composite) {
        let _ = self.core.effective.set(effective);
        *self.core.caps.lock().unwrap_or_else(PoisonError::into_inner) = Some(composite);
    }

    pub(crate) fn effective(&self) -> Option<&Effective> {
        self.core.effective.get()
    }

    pub(crate) fn caps_guard(&self) -> MutexGuard<'_, Option<Composite>> {
        self.core.caps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Child coordination
    // ------------------------------------------------------------------

    pub(crate) fn stash_deferred(&self, handle: JoinHandle<()>) {
        self.core
            .deferred_children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Opens the sibling gate and joins every deferred child. Called when a
    /// node's body has completed, before its own teardown hooks.
    pub(crate) fn release_and_join_children(&self) {
        self.core.gate.release();
        let handles = std::mem::take(
            &mut *self
                .core
                .deferred_children
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            let _ = handle.join();
        }
    }

    pub(crate) fn send_signal(&self, signal: Signal) {
        if let Some(tx) = &self.core.signal {
            let _ = tx.send(signal);
        }
    }

    // ------------------------------------------------------------------
    // Wrapped primitives
    // ------------------------------------------------------------------

    /// Logs a message through the node's override chain.
    pub fn log(&self, message: &str) {
        self.invoke(SlotName::Log, SlotArgs::Message(message.to_string()));
    }

    /// Records a soft failure; the body keeps running.
    pub fn fail(&self) {
        self.invoke(SlotName::Fail, SlotArgs::None);
    }

    /// Records a fatal failure and unwinds the current body. An interceptor
    /// that swallows the primitive suppresses the unwind.
    pub fn fail_now(&self) {
        self.invoke(SlotName::FailNow, SlotArgs::None);
    }

    /// Marks the node skipped; the body keeps running.
    pub fn skip(&self, reason: &str) {
        self.invoke(SlotName::Skip, SlotArgs::Message(reason.to_string()));
    }

    /// Marks the node skipped and unwinds the current body.
    pub fn skip_now(&self, reason: &str) {
        self.invoke(SlotName::SkipNow, SlotArgs::Message(reason.to_string()));
    }

    /// Marks this node eligible to run concurrently with its siblings and
    /// suspends until every sequential sibling has been dispatched.
    ///
    /// Honored at nesting depth 1 and depth 3 or deeper. At depth exactly 2
    /// the scheduler cannot guarantee that teardown completes before control
    /// returns to the caller, so the request is logged and ignored; the node
    /// runs sequentially.
    pub fn parallel(&self) {
        self.invoke(SlotName::Parallel, SlotArgs::None);
    }

    pub fn set_env(&self, key: &str, value: &str) {
        self.invoke(
            SlotName::SetEnv,
            SlotArgs::Env {
                key: key.to_string(),
                value: value.to_string(),
            },
        );
    }

    /// A fresh scratch directory for this node.
    pub fn temp_dir(&self) -> PathBuf {
        match self.invoke(SlotName::TempDir, SlotArgs::None) {
            SlotValue::Dir(path) => path,
            _ => std::env::temp_dir(),
        }
    }

    /// The run deadline, if one is configured.
    pub fn deadline(&self) -> Option<Instant> {
        match self.invoke(SlotName::Deadline, SlotArgs::None) {
            SlotValue::Deadline(deadline) => deadline,
            _ => None,
        }
    }

    fn invoke(&self, slot: SlotName, args: SlotArgs) -> SlotValue {
        let primitive = move |ctx: &Ctx, args: SlotArgs| primitive(slot, ctx, args);
        match self.core.effective.get() {
            Some(effective) => effective.chains.invoke(slot, self, args, &primitive),
            // Before composition completes, calls go straight to the
            // primitive.
            None => primitive(self, args),
        }
    }

    pub(crate) fn defer_parallel(&self) {
        if self.core.depth == 2 {
            self.log("parallel is not honored at nesting depth 2; running sequentially");
            return;
        }
        {
            let mut state = self.state();
            if state.deferred {
                return;
            }
            state.deferred = true;
        }
        if let (Some(tx), Some(gate)) = (&self.core.signal, &self.core.parent_gate) {
            let _ = tx.send(Signal::Deferred);
            gate.wait();
        }
    }
}

/// Terminal implementations each override chain ends at.
fn primitive(slot: SlotName, ctx: &Ctx, args: SlotArgs) -> SlotValue {
    match slot {
        SlotName::Log => {
            let path = ctx.path();
            ctx.core.driver.log(&path, args.message());
            SlotValue::Unit
        }
        SlotName::Fail => {
            ctx.record_soft_fail();
            SlotValue::Unit
        }
        SlotName::FailNow => {
            ctx.record_fatal();
            panic_any(Bailout::FailNow)
        }
        SlotName::Skip => {
            ctx.record_skip(args.message());
            SlotValue::Unit
        }
        SlotName::SkipNow => {
            ctx.record_skip(args.message());
            panic_any(Bailout::SkipNow)
        }
        SlotName::Parallel => {
            ctx.defer_parallel();
            SlotValue::Unit
        }
        SlotName::SetEnv => {
            if let SlotArgs::Env { key, value } = &args {
                ctx.core.driver.set_env(key, value);
            }
            SlotValue::Unit
        }
        SlotName::TempDir => SlotValue::Dir(ctx.core.driver.temp_dir()),
        SlotName::Deadline => SlotValue::Deadline(ctx.core.driver.deadline()),
    }
}
