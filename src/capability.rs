//! The capability contract and the declared composition shape.
//!
//! A capability is an independently authored component that contributes
//! lifecycle hooks, behavior interceptors, and plan modifications to every
//! node of a run. Instead of a reflective walk over an aggregate type, the
//! composite shape is declared explicitly: a [`CapabilitySet`] is an ordered
//! list of named slots, each slot a factory producing a fresh component per
//! node. A component may itself expose nested sub-components, which the
//! composition engine walks and initializes inner-first.
//!
//! Both contracts are optional: `init` defaults to a no-op and `descriptor`
//! to "contributes nothing", so a plain marker component is a valid
//! capability.

use crate::context::Ctx;
use crate::errors::EngineError;
use crate::hooks::HookSet;
use crate::options::OptionSet;
use crate::overrides::OverrideSet;
use crate::plan::PlanPatch;
use std::any::Any;
use std::sync::Arc;

/// One pluggable component. Instances are fresh per node, owned exclusively
/// by the node that created them, and never outlive it.
pub trait Capability: Any + Send {
    /// Called during the structural walk, before any `init` runs. A component
    /// that needs the node's context keeps a clone; every component of a node
    /// observes the same context.
    fn bind(&mut self, _ctx: &Ctx) {}

    /// Called once per node after structural wiring, inner components before
    /// outer ones. `parent` is the corresponding component of the parent
    /// node's composite, or `None` at the root; it is always fully
    /// constructed. `options` is the option list in scope at the node.
    fn init(
        &mut self,
        _parent: Option<&dyn Capability>,
        _options: &OptionSet,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    /// The capability's contribution to the node: plan modifiers, hooks, and
    /// overrides. Called once per node after every `init` has run.
    fn descriptor(&self) -> Option<Descriptor> {
        None
    }

    /// Nested sub-components, in declaration order. The layout must be the
    /// same for every instance a slot's factory produces.
    fn nested(&self) -> Vec<&dyn Capability> {
        Vec::new()
    }

    fn nested_mut(&mut self) -> Vec<&mut dyn Capability> {
        Vec::new()
    }

    /// Downcast support so `init` can recover its concrete parent type.
    fn as_any(&self) -> &dyn Any;
}

/// Immutable value a live capability produces once per node.
#[derive(Clone, Default)]
pub struct Descriptor {
    pub hooks: HookSet,
    pub overrides: OverrideSet,
    pub plan: PlanPatch,
}

pub type BuildFn = Arc<dyn Fn() -> Box<dyn Capability> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Slot {
    pub(crate) name: String,
    pub(crate) build: BuildFn,
}

/// The declared composite shape: an explicit ordered list of named capability
/// slots, shared by every node of a run.
#[derive(Clone, Default)]
pub struct CapabilitySet {
    slots: Vec<Slot>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a capability slot. Discovery order follows registration
    /// order.
    pub fn register<C, F>(&mut self, name: &str, build: F) -> &mut Self
    where
        C: Capability + 'static,
        F: Fn() -> C + Send + Sync + 'static,
    {
        self.slots.push(Slot {
            name: name.to_string(),
            build: Arc::new(move || Box::new(build())),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Duplicate slot names are a configuration error: the parent-pairing
    /// walk identifies components positionally and by slot name.
    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        for (i, slot) in self.slots.iter().enumerate() {
            if self.slots[..i].iter().any(|s| s.name == slot.name) {
                return Err(EngineError::DuplicateSlot {
                    slot: slot.name.clone(),
                });
            }
        }
        Ok(())
    }
}
