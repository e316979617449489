//! Suite declaration: explicit registration of case sources, tests, and
//! lifecycle hooks.
//!
//! Suite authors register everything by name and function reference; there is
//! no runtime scanning of method names. Suite state `S` is created once for
//! the whole run and cloned before each top-level test, so concurrent tests
//! never share mutable state unless the clone intentionally shares a
//! sub-structure. `Clone` is the self-clone contract: deriving it gives the
//! default deep clone, a manual impl overrides it.

use crate::context::Ctx;
use crate::errors::EngineError;
use crate::plan::{CaseSourceFn, ParamTestFn, Params, TestDef};
use crate::value::{Kind, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type LifecycleFn<S> = Arc<dyn Fn(&mut S, &Ctx) + Send + Sync>;

/// A declaratively defined test suite over user state `S`.
pub struct Suite<S> {
    name: String,
    state: S,
    cases: BTreeMap<String, CaseSourceFn<S>>,
    tests: Vec<TestDef<S>>,
    duplicate_tests: Vec<String>,
    duplicate_cases: Vec<String>,
    pub(crate) before_all: Option<LifecycleFn<S>>,
    pub(crate) before_each: Option<LifecycleFn<S>>,
    pub(crate) after_each: Option<LifecycleFn<S>>,
    pub(crate) after_all: Option<LifecycleFn<S>>,
}

impl<S> Suite<S> {
    pub fn new(name: &str, state: S) -> Self {
        Self {
            name: name.to_string(),
            state,
            cases: BTreeMap::new(),
            tests: Vec::new(),
            duplicate_tests: Vec::new(),
            duplicate_cases: Vec::new(),
            before_all: None,
            before_each: None,
            after_each: None,
            after_all: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a named provider of parameter values. The source is invoked
    /// once per containing test's case resolution and must yield values of a
    /// single element kind.
    pub fn case_source(
        &mut self,
        name: &str,
        f: impl Fn(&S) -> Vec<Value> + Send + Sync + 'static,
    ) -> &mut Self {
        if self.cases.insert(name.to_string(), Arc::new(f)).is_some() {
            self.duplicate_cases.push(name.to_string());
        }
        self
    }

    /// Registers a regular test.
    pub fn test(
        &mut self,
        name: &str,
        body: impl Fn(&mut S, &Ctx) + Send + Sync + 'static,
    ) -> &mut Self {
        self.push_test(TestDef::Regular {
            name: name.to_string(),
            body: Arc::new(body),
        });
        self
    }

    /// Registers a parametrized test. Every declared field must have a
    /// same-named case source with a matching element kind; the plan builder
    /// rejects the suite otherwise.
    pub fn test_cases(
        &mut self,
        name: &str,
        fields: &[(&str, Kind)],
        body: impl Fn(&mut S, &Ctx, &Params) + Send + Sync + 'static,
    ) -> &mut Self {
        self.push_test(TestDef::Parametrized {
            name: name.to_string(),
            fields: fields
                .iter()
                .map(|(f, k)| (f.to_string(), *k))
                .collect(),
            body: Arc::new(body) as ParamTestFn<S>,
        });
        self
    }

    pub fn before_all(&mut self, f: impl Fn(&mut S, &Ctx) + Send + Sync + 'static) -> &mut Self {
        self.before_all = Some(Arc::new(f));
        self
    }

    pub fn before_each(&mut self, f: impl Fn(&mut S, &Ctx) + Send + Sync + 'static) -> &mut Self {
        self.before_each = Some(Arc::new(f));
        self
    }

    pub fn after_each(&mut self, f: impl Fn(&mut S, &Ctx) + Send + Sync + 'static) -> &mut Self {
        self.after_each = Some(Arc::new(f));
        self
    }

    pub fn after_all(&mut self, f: impl Fn(&mut S, &Ctx) + Send + Sync + 'static) -> &mut Self {
        self.after_all = Some(Arc::new(f));
        self
    }

    fn push_test(&mut self, def: TestDef<S>) {
        if self.tests.iter().any(|t| t.name() == def.name()) {
            self.duplicate_tests.push(def.name().to_string());
        }
        self.tests.push(def);
    }

    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        if let Some(name) = self.duplicate_tests.first() {
            return Err(EngineError::DuplicateTest {
                suite: self.name.clone(),
                name: name.clone(),
            });
        }
        if let Some(name) = self.duplicate_cases.first() {
            return Err(EngineError::DuplicateCaseSource {
                suite: self.name.clone(),
                name: name.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn state(&self) -> &S {
        &self.state
    }

    pub(crate) fn take_state(self) -> S {
        self.state
    }

    pub(crate) fn tests(&self) -> &[TestDef<S>] {
        &self.tests
    }

    pub(crate) fn case_source_fn(&self, name: &str) -> Option<&CaseSourceFn<S>> {
        self.cases.get(name)
    }

    pub(crate) fn lifecycle(
        &self,
    ) -> (
        Option<LifecycleFn<S>>,
        Option<LifecycleFn<S>>,
        Option<LifecycleFn<S>>,
        Option<LifecycleFn<S>>,
    ) {
        (
            self.before_all.clone(),
            self.before_each.clone(),
            self.after_each.clone(),
            self.after_all.clone(),
        )
    }
}
