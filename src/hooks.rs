//! Lifecycle hooks and the priority merge.
//!
//! Each capability contributes callbacks per lifecycle stage. A node's
//! effective hook set concatenates every capability's callbacks for a stage in
//! capability-discovery order and stable-sorts them by priority ascending, so
//! equal priorities preserve discovery order. The merged set is computed once
//! per node and never mutated afterwards.

use crate::context::Ctx;
use std::sync::Arc;

/// Total-order key for hook scheduling. Lower runs earlier.
pub type Priority = i32;

/// Reserved sentinel: run before every neutrally prioritized hook.
pub const TRY_FIRST: Priority = i32::MIN;
/// Reserved sentinel: run after every neutrally prioritized hook.
pub const TRY_LAST: Priority = i32::MAX;
/// The neutral default priority.
pub const NEUTRAL: Priority = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    BeforeAll,
    BeforeEach,
    AfterEach,
    AfterAll,
}

pub type HookFn = Arc<dyn Fn(&Ctx) + Send + Sync>;

#[derive(Clone)]
pub struct Hook {
    pub priority: Priority,
    pub run: HookFn,
}

impl Hook {
    pub fn new(f: impl Fn(&Ctx) + Send + Sync + 'static) -> Self {
        Self::with_priority(NEUTRAL, f)
    }

    pub fn with_priority(priority: Priority, f: impl Fn(&Ctx) + Send + Sync + 'static) -> Self {
        Self {
            priority,
            run: Arc::new(f),
        }
    }
}

/// Per-stage ordered hook lists contributed by one capability, or the merged
/// effective set of a node.
#[derive(Clone, Default)]
pub struct HookSet {
    before_all: Vec<Hook>,
    before_each: Vec<Hook>,
    after_each: Vec<Hook>,
    after_all: Vec<Hook>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, stage: Stage, hook: Hook) -> &mut Self {
        self.stage_mut(stage).push(hook);
        self
    }

    pub fn before_all(&mut self, f: impl Fn(&Ctx) + Send + Sync + 'static) -> &mut Self {
        self.add(Stage::BeforeAll, Hook::new(f))
    }

    pub fn before_each(&mut self, f: impl Fn(&Ctx) + Send + Sync + 'static) -> &mut Self {
        self.add(Stage::BeforeEach, Hook::new(f))
    }

    pub fn after_each(&mut self, f: impl Fn(&Ctx) + Send + Sync + 'static) -> &mut Self {
        self.add(Stage::AfterEach, Hook::new(f))
    }

    pub fn after_all(&mut self, f: impl Fn(&Ctx) + Send + Sync + 'static) -> &mut Self {
        self.add(Stage::AfterAll, Hook::new(f))
    }

    pub fn stage(&self, stage: Stage) -> &[Hook] {
        match stage {
            Stage::BeforeAll => &self.before_all,
            Stage::BeforeEach => &self.before_each,
            Stage::AfterEach => &self.after_each,
            Stage::AfterAll => &self.after_all,
        }
    }

    fn stage_mut(&mut self, stage: Stage) -> &mut Vec<Hook> {
        match stage {
            Stage::BeforeAll => &mut self.before_all,
            Stage::BeforeEach => &mut self.before_each,
            Stage::AfterEach => &mut self.after_each,
            Stage::AfterAll => &mut self.after_all,
        }
    }

    /// Merges capability hook sets in discovery order.
    ///
    /// Stable sort: ties keep the order the contributing capabilities were
    /// discovered in.
    pub(crate) fn merged<'a>(sets: impl Iterator<Item = &'a HookSet>) -> HookSet {
        let mut merged = HookSet::default();
        for set in sets {
            for stage in [
                Stage::BeforeAll,
                Stage::BeforeEach,
                Stage::AfterEach,
                Stage::AfterAll,
            ] {
                merged
                    .stage_mut(stage)
                    .extend(set.stage(stage).iter().cloned());
            }
        }
        for stage in [
            Stage::BeforeAll,
            Stage::BeforeEach,
            Stage::AfterEach,
            Stage::AfterAll,
        ] {
            merged.stage_mut(stage).sort_by_key(|h| h.priority);
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> HookFn {
        Arc::new(|_ctx: &Ctx| {})
    }

    #[test]
    fn merge_is_stable_on_equal_priority() {
        let mut a = HookSet::new();
        a.add(
            Stage::BeforeEach,
            Hook {
                priority: NEUTRAL,
                run: noop(),
            },
        );
        let mut b = HookSet::new();
        b.add(
            Stage::BeforeEach,
            Hook {
                priority: TRY_FIRST,
                run: noop(),
            },
        );
        b.add(
            Stage::BeforeEach,
            Hook {
                priority: NEUTRAL,
                run: noop(),
            },
        );
        let merged = HookSet::merged([&a, &b].into_iter());
        let priorities: Vec<Priority> = merged
            .stage(Stage::BeforeEach)
            .iter()
            .map(|h| h.priority)
            .collect();
        assert_eq!(priorities, vec![TRY_FIRST, NEUTRAL, NEUTRAL]);
        // First neutral hook is the one from `a`, discovered first.
        assert!(Arc::ptr_eq(
            &merged.stage(Stage::BeforeEach)[1].run,
            &a.stage(Stage::BeforeEach)[0].run
        ));
    }
}
