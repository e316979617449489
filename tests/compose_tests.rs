// Composition engine behavior: shared context binding, inner-first
// initialization, parent pairing, and per-scope option visibility.

mod common;

use common::Journal;
use gantry::capability::{Capability, CapabilitySet};
use gantry::context::Ctx;
use gantry::errors::EngineError;
use gantry::options::{Opt, OptionSet};
use gantry::report::Outcome;
use gantry::suite::Suite;
use gantry::Engine;
use std::any::Any;
use std::sync::{Arc, Mutex};

/// A capability that journals its bind and init calls. `inner` components are
/// walked and initialized by the engine.
struct Probe {
    label: &'static str,
    journal: Journal,
    ctx: Option<Ctx>,
    inner: Vec<Probe>,
}

impl Probe {
    fn leaf(label: &'static str, journal: &Journal) -> Self {
        Self {
            label,
            journal: journal.clone(),
            ctx: None,
            inner: Vec::new(),
        }
    }

    fn with_inner(label: &'static str, journal: &Journal, inner: Vec<Probe>) -> Self {
        Self {
            inner,
            ..Self::leaf(label, journal)
        }
    }
}

impl Capability for Probe {
    fn bind(&mut self, ctx: &Ctx) {
        self.journal
            .push(format!("bind {} d{} {}", self.label, ctx.depth(), ctx.path()));
        self.ctx = Some(ctx.clone());
    }

    fn init(
        &mut self,
        parent: Option<&dyn Capability>,
        _options: &OptionSet,
    ) -> Result<(), EngineError> {
        let depth = self.ctx.as_ref().map(Ctx::depth).unwrap_or(0);
        let parent_label = parent
            .and_then(|p| p.as_any().downcast_ref::<Probe>())
            .map(|p| p.label)
            .unwrap_or("-");
        self.journal
            .push(format!("init {} d{} parent={}", self.label, depth, parent_label));
        Ok(())
    }

    fn nested(&self) -> Vec<&dyn Capability> {
        self.inner.iter().map(|c| c as &dyn Capability).collect()
    }

    fn nested_mut(&mut self) -> Vec<&mut dyn Capability> {
        self.inner
            .iter_mut()
            .map(|c| c as &mut dyn Capability)
            .collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn nested_components_initialize_inner_first() {
    let journal = Journal::new();
    let j = journal.clone();
    let mut shape = CapabilitySet::new();
    shape.register("outer", move || {
        Probe::with_inner(
            "outer",
            &j,
            vec![
                Probe::with_inner("a", &j, vec![Probe::leaf("a1", &j)]),
                Probe::leaf("b", &j),
            ],
        )
    });

    let suite = Suite::new("S", ());
    Engine::new(suite, shape).run().unwrap();

    // Bind is pre-order; init drains the schedule back-to-front.
    assert_eq!(
        journal.with_prefix("bind"),
        vec![
            "bind outer d0 S",
            "bind a d0 S",
            "bind a1 d0 S",
            "bind b d0 S",
        ]
    );
    assert_eq!(
        journal.with_prefix("init"),
        vec![
            "init b d0 parent=-",
            "init a1 d0 parent=-",
            "init a d0 parent=-",
            "init outer d0 parent=-",
        ]
    );
}

/// Stashes every context it is bound with into a shared list.
struct CtxStash {
    seen: Arc<Mutex<Vec<Ctx>>>,
}

impl Capability for CtxStash {
    fn bind(&mut self, ctx: &Ctx) {
        self.seen.lock().unwrap().push(ctx.clone());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn every_component_of_a_node_observes_the_same_context() {
    let seen: Arc<Mutex<Vec<Ctx>>> = Arc::default();
    let s1 = seen.clone();
    let s2 = seen.clone();
    let mut shape = CapabilitySet::new();
    shape.register("left", move || CtxStash { seen: s1.clone() });
    shape.register("right", move || CtxStash { seen: s2.clone() });

    let mut suite = Suite::new("S", ());
    suite.test("T", |_state, _ctx| {});
    Engine::new(suite, shape).run().unwrap();

    // Bind order: left then right at the root, then at the test node. Both
    // slots of a node hold handles on the identical context instance.
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    assert!(seen[0].same_node(&seen[1]));
    assert!(seen[2].same_node(&seen[3]));
    assert!(!seen[0].same_node(&seen[2]));
    assert_eq!(seen[0].path(), "S");
    assert_eq!(seen[2].path(), "S/T");
}

#[test]
fn init_receives_the_parent_component_of_its_own_slot() {
    let journal = Journal::new();
    let j = journal.clone();
    let mut shape = CapabilitySet::new();
    shape.register("outer", move || {
        Probe::with_inner("outer", &j, vec![Probe::leaf("a", &j)])
    });

    let mut suite = Suite::new("S", ());
    suite.test("T", |_state, _ctx| {});
    Engine::new(suite, shape).run().unwrap();

    assert_eq!(
        journal.with_prefix("init"),
        vec![
            // Root: no parent node, so no parent component.
            "init a d0 parent=-",
            "init outer d0 parent=-",
            // Test node: paired by position within the same slot.
            "init a d1 parent=a",
            "init outer d1 parent=outer",
        ]
    );
}

struct OptProbe {
    journal: Journal,
    ctx: Option<Ctx>,
}

impl Capability for OptProbe {
    fn bind(&mut self, ctx: &Ctx) {
        self.ctx = Some(ctx.clone());
    }

    fn init(
        &mut self,
        _parent: Option<&dyn Capability>,
        options: &OptionSet,
    ) -> Result<(), EngineError> {
        let depth = self.ctx.as_ref().map(Ctx::depth).unwrap_or(0);
        self.journal.push(format!(
            "opts d{} deep={} local={}",
            depth,
            options.contains("deep"),
            options.contains("local")
        ));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn propagating_options_reach_deeper_scopes_and_local_ones_do_not() {
    let journal = Journal::new();
    let j = journal.clone();
    let mut shape = CapabilitySet::new();
    shape.register("opts", move || OptProbe {
        journal: j.clone(),
        ctx: None,
    });

    let mut suite = Suite::new("S", ());
    suite.test("T", |_state, _ctx| {});

    let mut options = OptionSet::new();
    options.push(Opt::propagated("deep", true));
    options.push(Opt::new("local", 1i64));

    Engine::new(suite, shape)
        .with_options(options)
        .run()
        .unwrap();

    assert_eq!(
        journal.with_prefix("opts"),
        vec!["opts d0 deep=true local=true", "opts d1 deep=true local=false"]
    );
}

#[test]
fn duplicate_slot_names_are_a_configuration_error() {
    let mut shape = CapabilitySet::new();
    shape.register("dup", || Probe::leaf("x", &Journal::new()));
    shape.register("dup", || Probe::leaf("y", &Journal::new()));

    let result = Engine::new(Suite::new("S", ()), shape).run();
    assert!(matches!(result, Err(EngineError::DuplicateSlot { .. })));
}

/// Rejects its node during `init` when bound to the test named "A".
struct FaultyInit {
    ctx: Option<Ctx>,
}

impl Capability for FaultyInit {
    fn bind(&mut self, ctx: &Ctx) {
        self.ctx = Some(ctx.clone());
    }

    fn init(
        &mut self,
        _parent: Option<&dyn Capability>,
        _options: &OptionSet,
    ) -> Result<(), EngineError> {
        if self.ctx.as_ref().map(Ctx::name) == Some("A") {
            return Err(EngineError::CapabilityInit {
                message: "resource unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn a_failing_init_aborts_only_its_own_node() {
    let journal = Journal::new();
    let mut shape = CapabilitySet::new();
    shape.register("faulty", || FaultyInit { ctx: None });

    let mut suite = Suite::new("S", ());
    let j = journal.clone();
    suite.test("A", move |_state, _ctx| j.push("body A"));
    let j = journal.clone();
    suite.test("B", move |_state, _ctx| j.push("body B"));

    let report = Engine::new(suite, shape).run().unwrap();

    let a = report.node("S/A").unwrap();
    assert_eq!(a.outcome, Outcome::FatalFailed);
    assert!(
        a.detail.as_deref().unwrap_or("").contains("resource unavailable"),
        "detail: {:?}",
        a.detail
    );

    // The sibling and the root are untouched, and A's body never ran.
    assert_eq!(report.node("S/B").unwrap().outcome, Outcome::Passed);
    assert_eq!(report.node("S").unwrap().outcome, Outcome::Passed);
    assert_eq!(journal.events(), vec!["body B"]);
}

struct Inert;

impl Capability for Inert {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Grows an extra nested component below the root, diverging from the
/// parent composite's layout.
struct Shifty {
    inner: Vec<Inert>,
}

impl Capability for Shifty {
    fn bind(&mut self, ctx: &Ctx) {
        if ctx.depth() == 1 {
            self.inner.push(Inert);
        }
    }

    fn nested(&self) -> Vec<&dyn Capability> {
        self.inner.iter().map(|c| c as &dyn Capability).collect()
    }

    fn nested_mut(&mut self) -> Vec<&mut dyn Capability> {
        self.inner
            .iter_mut()
            .map(|c| c as &mut dyn Capability)
            .collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn a_layout_diverging_from_the_parent_fails_the_node_fatally() {
    let journal = Journal::new();
    let mut shape = CapabilitySet::new();
    shape.register("shifty", || Shifty { inner: Vec::new() });

    let mut suite = Suite::new("S", ());
    let j = journal.clone();
    suite.test("T", move |_state, _ctx| j.push("body T"));

    let report = Engine::new(suite, shape).run().unwrap();

    let t = report.node("S/T").unwrap();
    assert_eq!(t.outcome, Outcome::FatalFailed);
    assert!(
        t.detail.as_deref().unwrap_or("").contains("shape mismatch"),
        "detail: {:?}",
        t.detail
    );
    assert_eq!(report.node("S").unwrap().outcome, Outcome::Passed);
    assert!(journal.events().is_empty());
}

#[test]
fn block_context_links_back_to_its_parent_node() {
    let mut suite = Suite::new("S", ());
    suite.test("T", |_state, ctx| {
        let outer = ctx.clone();
        assert!(ctx.same_node(&outer));
        ctx.block("B", move |inner| {
            assert_eq!(inner.depth(), 2);
            assert_eq!(inner.path(), "S/T/B");
            let parent = inner.parent();
            assert!(parent.map(|p| p.same_node(&outer)).unwrap_or(false));
        });
    });

    let report = Engine::new(suite, CapabilitySet::new()).run().unwrap();
    assert!(report.succeeded(), "report: {:?}", report.nodes);
}
