//! Behavior override slots and interceptor chains.
//!
//! Every host primitive a node exposes (log, fail, skip, parallel, and so on)
//! is invoked through a named slot. Capabilities contribute interceptors to a
//! slot; per node, the interceptors fold around the primitive in discovery
//! order, with the first-discovered capability's interceptor outermost. An
//! interceptor decides whether and when to call its wrapped `next`, which
//! terminates at the primitive implementation.

use crate::context::Ctx;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// The named behavior slots a node exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotName {
    Log,
    Fail,
    FailNow,
    Skip,
    SkipNow,
    Parallel,
    SetEnv,
    TempDir,
    Deadline,
}

/// Arguments handed to a slot invocation.
#[derive(Debug, Clone)]
pub enum SlotArgs {
    None,
    Message(String),
    Env { key: String, value: String },
}

impl SlotArgs {
    /// The message payload, or empty for argument-less slots.
    pub fn message(&self) -> &str {
        match self {
            SlotArgs::Message(m) => m,
            _ => "",
        }
    }
}

/// Result of a slot invocation. Most slots return `Unit`.
#[derive(Debug)]
pub enum SlotValue {
    Unit,
    Dir(PathBuf),
    Deadline(Option<Instant>),
}

pub type Interceptor = Arc<dyn Fn(&Ctx, SlotArgs, &Next<'_>) -> SlotValue + Send + Sync>;

/// The remainder of an interceptor chain, ending at the primitive.
pub struct Next<'a> {
    pub(crate) rest: &'a [Interceptor],
    pub(crate) primitive: &'a dyn Fn(&Ctx, SlotArgs) -> SlotValue,
}

impl Next<'_> {
    /// Invokes the next interceptor in the chain, or the primitive if none
    /// remain.
    pub fn call(&self, ctx: &Ctx, args: SlotArgs) -> SlotValue {
        match self.rest.split_first() {
            Some((head, rest)) => head(
                ctx,
                args,
                &Next {
                    rest,
                    primitive: self.primitive,
                },
            ),
            None => (self.primitive)(ctx, args),
        }
    }
}

/// Interceptors contributed by one capability, in registration order.
#[derive(Clone, Default)]
pub struct OverrideSet {
    entries: Vec<(SlotName, Interceptor)>,
}

impl OverrideSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intercept(
        &mut self,
        slot: SlotName,
        f: impl Fn(&Ctx, SlotArgs, &Next<'_>) -> SlotValue + Send + Sync + 'static,
    ) -> &mut Self {
        self.entries.push((slot, Arc::new(f)));
        self
    }

    fn iter(&self) -> impl Iterator<Item = &(SlotName, Interceptor)> {
        self.entries.iter()
    }
}

/// A node's merged override chains, immutable once computed.
#[derive(Clone, Default)]
pub struct ChainSet {
    chains: HashMap<SlotName, Vec<Interceptor>>,
}

impl ChainSet {
    /// Folds capability override sets in discovery order; the first-discovered
    /// interceptor for a slot becomes the outermost wrapper.
    pub(crate) fn merged<'a>(sets: impl Iterator<Item = &'a OverrideSet>) -> ChainSet {
        let mut chains: HashMap<SlotName, Vec<Interceptor>> = HashMap::new();
        for set in sets {
            for (slot, interceptor) in set.iter() {
                chains.entry(*slot).or_default().push(interceptor.clone());
            }
        }
        ChainSet { chains }
    }

    /// Invokes a slot through its chain, terminating at `primitive`.
    pub(crate) fn invoke(
        &self,
        slot: SlotName,
        ctx: &Ctx,
        args: SlotArgs,
        primitive: &dyn Fn(&Ctx, SlotArgs) -> SlotValue,
    ) -> SlotValue {
        let rest = self.chains.get(&slot).map(Vec::as_slice).unwrap_or(&[]);
        Next { rest, primitive }.call(ctx, args)
    }
}
