//! The capability composition engine.
//!
//! Per node, composition builds a fresh component per declared slot, walks
//! the component tree pre-order binding the node's shared context, then
//! drains a LIFO initialization schedule so nested components initialize
//! before the components that embed them. Each `init` call is paired with the
//! corresponding component of the parent node's composite, resolved by
//! position; the pairing guarantees an `init` always observes a fully
//! constructed parent component of its own type. After every `init` has run,
//! the fully built tree is scanned for descriptors, de-duplicated by
//! component identity.
//!
//! Shape divergence between a node and its parent composite is a
//! configuration error, detected immediately and never retried.

use crate::capability::{Capability, CapabilitySet, Descriptor};
use crate::context::Ctx;
use crate::errors::EngineError;
use crate::options::OptionSet;
use std::collections::HashSet;

/// A node's wired capability instances, index-aligned with the declared
/// slots. Owned by the node's context and dropped with it.
pub(crate) struct Composite {
    pub(crate) components: Vec<Box<dyn Capability>>,
}

/// Builds and initializes the composite for one node.
pub(crate) fn compose(
    shape: &CapabilitySet,
    ctx: &Ctx,
    parent: Option<&Composite>,
    options: &OptionSet,
) -> Result<(Composite, Vec<Descriptor>), EngineError> {
    let mut components: Vec<Box<dyn Capability>> =
        shape.slots().iter().map(|slot| (slot.build)()).collect();

    // Pre-order walk: bind the shared context and record the init schedule as
    // index paths. Draining the schedule back-to-front yields inner-first
    // initialization.
    let mut schedule: Vec<Vec<usize>> = Vec::new();
    for (i, component) in components.iter_mut().enumerate() {
        bind_walk(component.as_mut(), ctx, &mut vec![i], &mut schedule);
    }

    while let Some(path) = schedule.pop() {
        let slot_name = &shape.slots()[path[0]].name;
        let parent_component = match parent {
            Some(p) => Some(resolve(
                p.components[path[0]].as_ref(),
                &path[1..],
                slot_name,
                &path,
            )?),
            None => None,
        };
        let component = resolve_mut(
            components[path[0]].as_mut(),
            &path[1..],
            slot_name,
            &path,
        )?;
        component.init(parent_component, options)?;
    }

    // Descriptor scan over the fully built instance; a component reachable
    // through more than one path is registered once.
    let mut seen: HashSet<*const ()> = HashSet::new();
    let mut descriptors = Vec::new();
    for component in &components {
        scan(component.as_ref(), &mut seen, &mut descriptors);
    }

    Ok((Composite { components }, descriptors))
}

fn bind_walk(
    component: &mut dyn Capability,
    ctx: &Ctx,
    path: &mut Vec<usize>,
    schedule: &mut Vec<Vec<usize>>,
) {
    component.bind(ctx);
    schedule.push(path.clone());
    for (i, child) in component.nested_mut().into_iter().enumerate() {
        path.push(i);
        bind_walk(child, ctx, path, schedule);
        path.pop();
    }
}

fn resolve<'a>(
    component: &'a dyn Capability,
    rest: &[usize],
    slot: &str,
    full_path: &[usize],
) -> Result<&'a dyn Capability, EngineError> {
    match rest.split_first() {
        None => Ok(component),
        Some((&index, tail)) => {
            let children = component.nested();
            match children.get(index) {
                Some(child) => resolve(*child, tail, slot, full_path),
                None => Err(shape_mismatch(slot, full_path, index)),
            }
        }
    }
}

fn resolve_mut<'a>(
    component: &'a mut dyn Capability,
    rest: &[usize],
    slot: &str,
    full_path: &[usize],
) -> Result<&'a mut dyn Capability, EngineError> {
    match rest.split_first() {
        None => Ok(component),
        Some((&index, tail)) => {
            let mut children = component.nested_mut();
            if index >= children.len() {
                return Err(shape_mismatch(slot, full_path, index));
            }
            resolve_mut(children.swap_remove(index), tail, slot, full_path)
        }
    }
}

fn shape_mismatch(slot: &str, path: &[usize], index: usize) -> EngineError {
    let rendered = path
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(".");
    EngineError::ShapeMismatch {
        slot: slot.to_string(),
        path: rendered,
        index,
    }
}

fn scan(component: &dyn Capability, seen: &mut HashSet<*const ()>, out: &mut Vec<Descriptor>) {
    let identity = component as *const dyn Capability as *const ();
    if seen.insert(identity) {
        if let Some(descriptor) = component.descriptor() {
            out.push(descriptor);
        }
    }
    for child in component.nested() {
        scan(child, seen, out);
    }
}
