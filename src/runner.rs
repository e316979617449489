//! The execution scheduler.
//!
//! Walks the built plan, creates one node per planned test, composes the
//! node's capabilities, runs the merged hooks around the body with panic
//! recovery, and enforces the parallelism and nesting constraints.
//!
//! The whole run is wrapped in a synthetic parent frame: after the last
//! planned test has been dispatched, the root's sibling gate opens, deferred
//! parallel nodes resume, and the frame joins them all before any after-all
//! hook fires.
//!
//! Panic recovery installs a process panic hook once. The hook records a
//! backtrace at the panic site into a thread-local slot and stays quiet for
//! panics raised inside a scheduler frame (they are recovered and reported
//! through the node); panics elsewhere in the process fall through to the
//! previously installed hook.

use crate::capability::CapabilitySet;
use crate::compose::compose;
use crate::context::{Bailout, Ctx, Effective, NodeKind};
use crate::driver::{Driver, RunOutcome, Signal, ThreadDriver};
use crate::errors::EngineError;
use crate::hooks::{HookSet, Stage};
use crate::options::{Defaults, OptionSet};
use crate::overrides::ChainSet;
use crate::plan::{build_plan, PlanPatch, PlannedTest, Runnable};
use crate::report::{Collector, NodeReport, Outcome, PanicRecord, RunReport};
use crate::suite::{LifecycleFn, Suite};
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Once};

// ============================================================================
// PANIC RECOVERY
// ============================================================================

static PANIC_CAPTURE: Once = Once::new();

thread_local! {
    static IN_FRAME: Cell<bool> = const { Cell::new(false) };
    static LAST_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn install_panic_capture() {
    PANIC_CAPTURE.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            // Control-flow unwinds carry no diagnostic value.
            if info.payload().downcast_ref::<Bailout>().is_some() {
                return;
            }
            if IN_FRAME.with(Cell::get) {
                LAST_TRACE.with(|slot| {
                    *slot.borrow_mut() = Some(Backtrace::force_capture().to_string());
                });
                return;
            }
            previous(info);
        }));
    });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs user code with panic recovery. Returns false when the closure
/// unwound, whether from a genuine panic (recorded on the node) or a
/// fail-now/skip-now bailout (already recorded by the primitive).
fn catch_user<F: FnOnce()>(ctx: &Ctx, f: F) -> bool {
    install_panic_capture();
    IN_FRAME.with(|flag| flag.set(true));
    let result = catch_unwind(AssertUnwindSafe(f));
    IN_FRAME.with(|flag| flag.set(false));
    match result {
        Ok(()) => true,
        Err(payload) => {
            if payload.downcast_ref::<Bailout>().is_none() {
                let value = panic_message(payload.as_ref());
                let trace = LAST_TRACE
                    .with(|slot| slot.borrow_mut().take())
                    .unwrap_or_default();
                ctx.record_panic(PanicRecord { value, trace });
            }
            false
        }
    }
}

// ============================================================================
// NODE FRAMES
// ============================================================================

/// What a node executes between its capability hooks.
enum NodePayload<S> {
    /// A planned top-level test: a fresh suite-state clone plus the
    /// suite-level each hooks, which fire only at this depth.
    SuiteTest {
        state: S,
        before: Option<LifecycleFn<S>>,
        after: Option<LifecycleFn<S>>,
        run: Runnable<S>,
    },
    /// An ad-hoc named sub-block; only capability-level hooks apply.
    Block(Box<dyn FnOnce(&Ctx) + Send>),
}

/// Runs the merged hooks for one stage. Soft failures continue the stage; a
/// bailout or panic in a hook ends it.
fn run_stage(ctx: &Ctx, stage: Stage) {
    if let Some(effective) = ctx.effective() {
        for hook in effective.hooks.stage(stage) {
            if !catch_user(ctx, || (hook.run)(ctx)) {
                break;
            }
        }
    }
}

/// The complete lifecycle of one node, executed on its own thread.
fn exec_frame<S>(ctx: &Ctx, parent: Option<&Ctx>, payload: NodePayload<S>) {
    ctx.mark_running();

    let composed = {
        let guard = parent.map(|p| p.caps_guard());
        let parent_composite = guard.as_ref().and_then(|g| g.as_ref());
        compose(&ctx.core.shape, ctx, parent_composite, ctx.options())
    };
    match composed {
        Ok((composite, descriptors)) => {
            let effective = Effective {
                hooks: HookSet::merged(descriptors.iter().map(|d| &d.hooks)),
                chains: ChainSet::merged(descriptors.iter().map(|d| &d.overrides)),
            };
            ctx.install(effective, composite);
        }
        Err(error) => {
            // Configuration error: abort this node immediately.
            ctx.record_config_error(&error);
            finish(ctx);
            return;
        }
    }

    run_stage(ctx, Stage::BeforeEach);

    match payload {
        NodePayload::SuiteTest {
            state,
            before,
            after,
            run,
        } => {
            let mut state = state;
            if !ctx.halted() {
                if let Some(hook) = &before {
                    catch_user(ctx, || hook(&mut state, ctx));
                }
            }
            if !ctx.halted() {
                catch_user(ctx, || match &run {
                    Runnable::Suite { body } => body(&mut state, ctx),
                    Runnable::Case { body, params } => body(&mut state, ctx, params),
                    Runnable::Free { body } => body(ctx),
                });
            }
            ctx.release_and_join_children();
            if let Some(hook) = &after {
                catch_user(ctx, || hook(&mut state, ctx));
            }
        }
        NodePayload::Block(body) => {
            if !ctx.halted() {
                catch_user(ctx, || body(ctx));
            }
            ctx.release_and_join_children();
        }
    }

    run_stage(ctx, Stage::AfterEach);
    finish(ctx);
}

/// Records the node's terminal state and releases whoever dispatched it.
fn finish(ctx: &Ctx) {
    let (outcome, skip_reason, panic, detail) = ctx.snapshot();
    ctx.core.collector.push(NodeReport {
        name: ctx.path(),
        outcome,
        skip_reason,
        panic,
        detail,
    });
    ctx.send_signal(Signal::Done(outcome == Outcome::Passed));
}

/// Creates a child node and runs it through the host primitive; a deferred
/// child parks its handle on the dispatching node.
fn dispatch_child<S: Send + 'static>(
    parent: &Ctx,
    name: &str,
    kind: NodeKind,
    options: OptionSet,
    payload: NodePayload<S>,
) -> bool {
    let (tx, rx) = mpsc::channel();
    let child = Ctx::child(parent, name, kind, options, tx);
    let parent_handle = parent.clone();
    let frame_ctx = child;
    let body: Box<dyn FnOnce() + Send> =
        Box::new(move || exec_frame(&frame_ctx, Some(&parent_handle), payload));
    match parent.core.driver.run(name, body, rx) {
        RunOutcome::Completed(passed) => passed,
        RunOutcome::Deferred(handle) => {
            parent.stash_deferred(handle);
            true
        }
    }
}

impl Ctx {
    /// Runs a named sub-block as a child node, blocking until it completes
    /// or defers itself. Capability-level before/after hooks fire for the
    /// block; suite-level BeforeEach/AfterEach do not.
    pub fn block(&self, name: &str, body: impl FnOnce(&Ctx) + Send + 'static) -> bool {
        self.block_with_options(name, OptionSet::default(), body)
    }

    /// Like [`Ctx::block`], passing extra options into the child scope.
    pub fn block_with_options(
        &self,
        name: &str,
        options: OptionSet,
        body: impl FnOnce(&Ctx) + Send + 'static,
    ) -> bool {
        dispatch_child::<()>(
            self,
            name,
            NodeKind::Block,
            options,
            NodePayload::Block(Box::new(body)),
        )
    }
}

// ============================================================================
// ENGINE ENTRY POINT
// ============================================================================

/// Orchestrates a whole run: plan build, root composition, dispatch, report.
pub struct Engine<S> {
    suite: Suite<S>,
    shape: Arc<CapabilitySet>,
    driver: Arc<dyn Driver>,
    defaults: Arc<Defaults>,
    root_options: OptionSet,
}

impl<S: Clone + Send + 'static> Engine<S> {
    pub fn new(suite: Suite<S>, shape: CapabilitySet) -> Self {
        Self {
            suite,
            shape: Arc::new(shape),
            driver: Arc::new(ThreadDriver::default()),
            defaults: Arc::new(Defaults::new()),
            root_options: OptionSet::new(),
        }
    }

    /// Supplies the process-wide default options object.
    pub fn with_defaults(mut self, defaults: Arc<Defaults>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = driver;
        self
    }

    /// Options passed at the root scope, after the process defaults.
    pub fn with_options(mut self, options: OptionSet) -> Self {
        self.root_options = options;
        self
    }

    /// Builds the plan and executes it.
    ///
    /// Configuration errors detected before execution (suite or shape
    /// declaration problems, case-source resolution) return `Err`; test
    /// failures, skips, and panics are recorded in the report.
    pub fn run(self) -> Result<RunReport, EngineError> {
        self.shape.validate()?;
        self.suite.validate()?;
        install_panic_capture();

        let collector = Arc::new(Collector::default());
        let mut scope = self.defaults.snapshot();
        scope.extend(&self.root_options);
        let root = Ctx::root(
            self.suite.name(),
            scope,
            self.driver.clone(),
            collector.clone(),
            self.shape.clone(),
        );

        let (composite, descriptors) = compose(&self.shape, &root, None, root.options())?;
        let patches: Vec<PlanPatch> = descriptors.iter().map(|d| d.plan.clone()).collect();
        let effective = Effective {
            hooks: HookSet::merged(descriptors.iter().map(|d| &d.hooks)),
            chains: ChainSet::merged(descriptors.iter().map(|d| &d.overrides)),
        };
        root.install(effective, composite);

        let plan = build_plan(&self.suite, &patches)?;

        let (before_all, before_each, after_each, after_all) = self.suite.lifecycle();
        let mut proto = self.suite.take_state();

        root.mark_running();
        run_stage(&root, Stage::BeforeAll);
        if !root.halted() {
            if let Some(hook) = &before_all {
                catch_user(&root, || hook(&mut proto, &root));
            }
        }

        if !root.halted() {
            for planned in plan {
                let PlannedTest { name, kind, run } = planned;
                let (before, after) = match &run {
                    // Capability-contributed extras are not suite methods;
                    // the suite-level each hooks do not apply to them.
                    Runnable::Free { .. } => (None, None),
                    _ => (before_each.clone(), after_each.clone()),
                };
                let payload = NodePayload::SuiteTest {
                    state: proto.clone(),
                    before,
                    after,
                    run,
                };
                dispatch_child(&root, &name, kind, OptionSet::default(), payload);
            }
        }

        // Synthetic wrapper: every child, including parallel ones, finishes
        // before any after-all runs.
        root.release_and_join_children();

        if let Some(hook) = &after_all {
            catch_user(&root, || hook(&mut proto, &root));
        }
        run_stage(&root, Stage::AfterAll);
        finish(&root);

        Ok(RunReport {
            nodes: collector.drain(),
        })
    }
}
