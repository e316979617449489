// Plan building: deterministic cartesian expansion, case-source validation,
// and capability-contributed plan patches.

mod common;

use common::{Contributor, Journal};
use gantry::capability::{CapabilitySet, Descriptor};
use gantry::errors::EngineError;
use gantry::suite::Suite;
use gantry::value::{Kind, Value};
use gantry::Engine;

#[test]
fn parametrized_tests_expand_to_the_full_cartesian_product() {
    let journal = Journal::new();
    let j = journal.clone();

    let mut suite = Suite::new("S", ());
    suite.case_source("mode", |_state| {
        vec![Value::from("a"), Value::from("b")]
    });
    suite.case_source("size", |_state| {
        vec![Value::from(1i64), Value::from(2i64), Value::from(3i64)]
    });
    suite.test_cases(
        "Combos",
        &[("size", Kind::Int), ("mode", Kind::Str)],
        move |_state, ctx, params| {
            let fields: Vec<&str> = params.fields().collect();
            assert_eq!(fields, vec!["mode", "size"]);
            j.push(format!(
                "{} mode={} size={}",
                ctx.name(),
                params.str("mode"),
                params.int("size")
            ));
        },
    );

    let report = Engine::new(suite, CapabilitySet::new()).run().unwrap();
    assert!(report.succeeded(), "report: {:?}", report.nodes);

    // Fields sort ascending; the last sorted field varies fastest.
    assert_eq!(
        journal.events(),
        vec![
            "Combos/Case 0 mode=a size=1",
            "Combos/Case 1 mode=a size=2",
            "Combos/Case 2 mode=a size=3",
            "Combos/Case 3 mode=b size=1",
            "Combos/Case 4 mode=b size=2",
            "Combos/Case 5 mode=b size=3",
        ]
    );

    let names: Vec<&str> = report.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names[0], "S/Combos/Case 0");
    assert_eq!(names[5], "S/Combos/Case 5");
    assert_eq!(names[6], "S");
}

#[test]
fn an_empty_case_source_yields_no_subtests() {
    let mut suite = Suite::new("S", ());
    suite.case_source("n", |_state| Vec::new());
    suite.test_cases("Empty", &[("n", Kind::Int)], |_state, _ctx, _params| {
        panic!("must not run");
    });
    suite.test("R", |_state, _ctx| {});

    let report = Engine::new(suite, CapabilitySet::new()).run().unwrap();
    assert_eq!(report.passed(), 2);
    assert!(report.node("S/R").is_some());
    assert!(report.nodes.iter().all(|n| !n.name.starts_with("S/Empty")));
}

#[test]
fn a_missing_case_source_fails_the_plan_build() {
    let mut suite = Suite::new("S", ());
    suite.test_cases("T", &[("absent", Kind::Int)], |_state, _ctx, _params| {});

    let result = Engine::new(suite, CapabilitySet::new()).run();
    assert!(matches!(
        result,
        Err(EngineError::MissingCaseSource { .. })
    ));
}

#[test]
fn a_kind_mismatch_fails_the_plan_build() {
    let mut suite = Suite::new("S", ());
    suite.case_source("n", |_state| vec![Value::from("not an int")]);
    suite.test_cases("T", &[("n", Kind::Int)], |_state, _ctx, _params| {});

    let result = Engine::new(suite, CapabilitySet::new()).run();
    assert!(matches!(result, Err(EngineError::CaseKindMismatch { .. })));
}

#[test]
fn a_source_mixing_element_kinds_fails_the_plan_build() {
    let mut suite = Suite::new("S", ());
    suite.case_source("n", |_state| vec![Value::from(1i64), Value::from(true)]);
    suite.test_cases("T", &[("n", Kind::Int)], |_state, _ctx, _params| {});

    let result = Engine::new(suite, CapabilitySet::new()).run();
    assert!(matches!(result, Err(EngineError::MixedCaseKinds { .. })));
}

#[test]
fn duplicate_registrations_are_configuration_errors() {
    let mut suite = Suite::new("S", ());
    suite.test("T", |_state, _ctx| {});
    suite.test("T", |_state, _ctx| {});
    assert!(matches!(
        Engine::new(suite, CapabilitySet::new()).run(),
        Err(EngineError::DuplicateTest { .. })
    ));

    let mut suite = Suite::new("S", ());
    suite.case_source("n", |_state| Vec::new());
    suite.case_source("n", |_state| Vec::new());
    assert!(matches!(
        Engine::new(suite, CapabilitySet::new()).run(),
        Err(EngineError::DuplicateCaseSource { .. })
    ));
}

#[test]
fn plan_patches_add_rename_and_reorder_tests() {
    let journal = Journal::new();

    let mut descriptor = Descriptor::default();
    let j = journal.clone();
    descriptor.plan.add_test("Extra", move |_ctx| j.push("body Extra"));
    descriptor.plan.rename(|name| format!("X:{}", name));
    descriptor.plan.modify(|mut entries| {
        entries.reverse();
        entries
    });

    let mut shape = CapabilitySet::new();
    shape.register("patch", move || Contributor::new(descriptor.clone()));

    let j = journal.clone();
    let mut suite = Suite::new("S", ());
    suite.before_each(move |_state, ctx| j.push(format!("sbe {}", ctx.name())));
    let j = journal.clone();
    suite.test("T1", move |_state, _ctx| j.push("body T1"));
    let j = journal.clone();
    suite.test("T2", move |_state, _ctx| j.push("body T2"));

    let report = Engine::new(suite, shape).run().unwrap();
    assert!(report.succeeded(), "report: {:?}", report.nodes);

    // Extras append after suite tests, renames thread over everything, and
    // the modifier reverses execution order.
    let names: Vec<&str> = report.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["S/X:Extra", "S/X:T2", "S/X:T1", "S"]);

    assert_eq!(journal.with_prefix("body"), vec!["body Extra", "body T2", "body T1"]);
    // Suite-level each hooks do not wrap capability-contributed extras.
    assert_eq!(journal.with_prefix("sbe"), vec!["sbe X:T2", "sbe X:T1"]);
}
