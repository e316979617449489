//! The test plan builder.
//!
//! Takes a suite's registered case sources and test definitions, expands
//! every parametrized test into a cartesian product of named cases, and
//! applies capability-contributed plan patches (add, rename, modify) before
//! the scheduler sees the list.
//!
//! Expansion is deterministic for fixed case-source outputs: parameter fields
//! are ordered by sorting field names ascending, with the last sorted field
//! varying fastest; combinations are named "Case 0", "Case 1", and so on in
//! that order. A zero-length case source yields zero combinations and zero
//! generated subtests, which is not an error.

use crate::context::{Ctx, NodeKind};
use crate::errors::EngineError;
use crate::suite::Suite;
use crate::value::{Kind, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type CaseSourceFn<S> = Arc<dyn Fn(&S) -> Vec<Value> + Send + Sync>;
pub type TestFn<S> = Arc<dyn Fn(&mut S, &Ctx) + Send + Sync>;
pub type ParamTestFn<S> = Arc<dyn Fn(&mut S, &Ctx, &Params) + Send + Sync>;
pub type FreeTestFn = Arc<dyn Fn(&Ctx) + Send + Sync>;
pub type RenameFn = Arc<dyn Fn(&str) -> String + Send + Sync>;
pub type ModifyFn = Arc<dyn Fn(Vec<PlanEntry>) -> Vec<PlanEntry> + Send + Sync>;

/// Resolved parameter values for one generated case, keyed by field name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params {
    values: BTreeMap<String, Value>,
}

impl Params {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Field names in sorted order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn bool(&self, field: &str) -> bool {
        match self.get(field).and_then(Value::as_bool) {
            Some(b) => b,
            None => panic!("parameter field '{}' is not a declared Bool", field),
        }
    }

    pub fn int(&self, field: &str) -> i64 {
        match self.get(field).and_then(Value::as_int) {
            Some(n) => n,
            None => panic!("parameter field '{}' is not a declared Int", field),
        }
    }

    pub fn float(&self, field: &str) -> f64 {
        match self.get(field).and_then(Value::as_float) {
            Some(x) => x,
            None => panic!("parameter field '{}' is not a declared Float", field),
        }
    }

    pub fn str(&self, field: &str) -> &str {
        match self.get(field).and_then(Value::as_str) {
            Some(s) => s,
            None => panic!("parameter field '{}' is not a declared Str", field),
        }
    }

    pub(crate) fn insert(&mut self, field: String, value: Value) {
        self.values.insert(field, value);
    }
}

/// A suite-registered test definition, before expansion.
pub(crate) enum TestDef<S> {
    Regular {
        name: String,
        body: TestFn<S>,
    },
    Parametrized {
        name: String,
        /// Declared parameter fields and their element kinds.
        fields: Vec<(String, Kind)>,
        body: ParamTestFn<S>,
    },
}

impl<S> TestDef<S> {
    pub(crate) fn name(&self) -> &str {
        match self {
            TestDef::Regular { name, .. } => name,
            TestDef::Parametrized { name, .. } => name,
        }
    }
}

/// How a planned test executes once the scheduler reaches it.
pub(crate) enum Runnable<S> {
    Suite { body: TestFn<S> },
    Case { body: ParamTestFn<S>, params: Params },
    Free { body: FreeTestFn },
}

impl<S> Clone for Runnable<S> {
    fn clone(&self) -> Self {
        match self {
            Runnable::Suite { body } => Runnable::Suite { body: body.clone() },
            Runnable::Case { body, params } => Runnable::Case {
                body: body.clone(),
                params: params.clone(),
            },
            Runnable::Free { body } => Runnable::Free { body: body.clone() },
        }
    }
}

/// One entry of the final plan: a name and a runnable.
pub(crate) struct PlannedTest<S> {
    pub(crate) name: String,
    pub(crate) kind: NodeKind,
    pub(crate) run: Runnable<S>,
}

impl<S> Clone for PlannedTest<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind.clone(),
            run: self.run.clone(),
        }
    }
}

/// The reduced view plan modifiers operate on: a name plus an opaque token
/// identifying the underlying runnable. Modifiers may reorder, remove, or
/// duplicate entries; the returned list replaces the plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub name: String,
    pub(crate) token: usize,
}

/// An extra test contributed by a capability. Extras have no suite state, so
/// their bodies receive only the node context.
#[derive(Clone)]
pub struct ExtraTest {
    pub name: String,
    pub(crate) body: FreeTestFn,
}

/// A capability's plan contribution: extra tests, renamers, and generic
/// modifiers, composed across capabilities in discovery order.
#[derive(Clone, Default)]
pub struct PlanPatch {
    pub(crate) extras: Vec<ExtraTest>,
    pub(crate) renames: Vec<RenameFn>,
    pub(crate) modifiers: Vec<ModifyFn>,
}

impl PlanPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_test(&mut self, name: &str, body: impl Fn(&Ctx) + Send + Sync + 'static) -> &mut Self {
        self.extras.push(ExtraTest {
            name: name.to_string(),
            body: Arc::new(body),
        });
        self
    }

    /// Threads every planned name through `f`.
    pub fn rename(&mut self, f: impl Fn(&str) -> String + Send + Sync + 'static) -> &mut Self {
        self.renames.push(Arc::new(f));
        self
    }

    /// Receives a detached copy of the planned-test list; the returned list
    /// replaces it.
    pub fn modify(
        &mut self,
        f: impl Fn(Vec<PlanEntry>) -> Vec<PlanEntry> + Send + Sync + 'static,
    ) -> &mut Self {
        self.modifiers.push(Arc::new(f));
        self
    }
}

/// Builds the ordered planned-test list for a suite, then applies patches.
pub(crate) fn build_plan<S>(
    suite: &Suite<S>,
    patches: &[PlanPatch],
) -> Result<Vec<PlannedTest<S>>, EngineError> {
    let mut planned: Vec<PlannedTest<S>> = Vec::new();

    for def in suite.tests() {
        match def {
            TestDef::Regular { name, body } => planned.push(PlannedTest {
                name: name.clone(),
                kind: NodeKind::Test { base: name.clone() },
                run: Runnable::Suite { body: body.clone() },
            }),
            TestDef::Parametrized { name, fields, body } => {
                expand_cases(suite, name, fields, body, &mut planned)?;
            }
        }
    }

    for patch in patches {
        for extra in &patch.extras {
            planned.push(PlannedTest {
                name: extra.name.clone(),
                kind: NodeKind::Test {
                    base: extra.name.clone(),
                },
                run: Runnable::Free {
                    body: extra.body.clone(),
                },
            });
        }
    }

    for patch in patches {
        for rename in &patch.renames {
            for test in planned.iter_mut() {
                test.name = rename(&test.name);
            }
        }
    }

    let has_modifiers = patches.iter().any(|p| !p.modifiers.is_empty());
    if has_modifiers {
        let mut view: Vec<PlanEntry> = planned
            .iter()
            .enumerate()
            .map(|(token, test)| PlanEntry {
                name: test.name.clone(),
                token,
            })
            .collect();
        for patch in patches {
            for modify in &patch.modifiers {
                view = modify(view);
            }
        }
        let rebuilt: Vec<PlannedTest<S>> = view
            .into_iter()
            .filter_map(|entry| {
                planned.get(entry.token).map(|test| PlannedTest {
                    name: entry.name,
                    kind: test.kind.clone(),
                    run: test.run.clone(),
                })
            })
            .collect();
        planned = rebuilt;
    }

    Ok(planned)
}

/// Resolves the case sources for one parametrized test and emits one planned
/// subtest per combination.
fn expand_cases<S>(
    suite: &Suite<S>,
    test_name: &str,
    fields: &[(String, Kind)],
    body: &ParamTestFn<S>,
    out: &mut Vec<PlannedTest<S>>,
) -> Result<(), EngineError> {
    // Field order is fixed by sorting names ascending; the last sorted field
    // varies fastest.
    let mut ordered: Vec<&(String, Kind)> = fields.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0));

    let mut columns: Vec<(&str, Vec<Value>)> = Vec::new();
    for (field, declared) in ordered {
        let source = suite
            .case_source_fn(field)
            .ok_or_else(|| EngineError::MissingCaseSource {
                test: test_name.to_string(),
                case_source: field.clone(),
            })?;
        let values = source(suite.state());
        if let Some(first) = values.first() {
            if let Some(other) = values.iter().find(|v| v.kind() != first.kind()) {
                return Err(EngineError::MixedCaseKinds {
                    case_source: field.clone(),
                    first: first.kind(),
                    other: other.kind(),
                });
            }
            if first.kind() != *declared {
                return Err(EngineError::CaseKindMismatch {
                    test: test_name.to_string(),
                    field: field.clone(),
                    case_source: field.clone(),
                    expected: *declared,
                    found: first.kind(),
                });
            }
        }
        columns.push((field, values));
    }

    if columns.iter().any(|(_, values)| values.is_empty()) {
        return Ok(());
    }

    let total: usize = columns.iter().map(|(_, values)| values.len()).product();
    for index in 0..total {
        let mut params = Params::default();
        let mut remainder = index;
        for (field, values) in columns.iter().rev() {
            let i = remainder % values.len();
            remainder /= values.len();
            params.insert(field.to_string(), values[i].clone());
        }
        out.push(PlannedTest {
            name: format!("{}/Case {}", test_name, index),
            kind: NodeKind::Case {
                base: test_name.to_string(),
                params: params.clone(),
            },
            run: Runnable::Case {
                body: body.clone(),
                params,
            },
        });
    }
    Ok(())
}
