//! Node options and process-wide defaults.
//!
//! Options are key/value pairs passed to a node when it is created. An option
//! marked `propagate` is visible to capability initializers at the node where
//! it was passed and at every deeper node; a non-propagating option is visible
//! only at its own node.
//!
//! Process-wide default options are held by [`Defaults`]: an explicitly
//! constructed object passed into the engine entry point, guarded by a single
//! read-write lock and append-only during normal operation. There is no
//! ambient global option state.

use crate::value::Value;
use im::Vector;
use std::sync::{PoisonError, RwLock};

/// A single option: key, value, and whether it propagates to deeper nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Opt {
    pub key: String,
    pub value: Value,
    pub propagate: bool,
}

impl Opt {
    /// Creates a non-propagating option.
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            propagate: false,
        }
    }

    /// Creates an option visible at this node and every deeper node.
    pub fn propagated(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            propagate: true,
        }
    }
}

/// An ordered list of options. Inherited scopes share structure, so cloning a
/// set per node is cheap.
#[derive(Debug, Clone, Default)]
pub struct OptionSet {
    opts: Vector<Opt>,
}

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, opt: Opt) {
        self.opts.push_back(opt);
    }

    /// Looks up an option by key; the most recently appended entry wins.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.opts
            .iter()
            .rev()
            .find(|o| o.key == key)
            .map(|o| &o.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Opt> {
        self.opts.iter()
    }

    pub fn len(&self) -> usize {
        self.opts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opts.is_empty()
    }

    pub(crate) fn extend(&mut self, other: &OptionSet) {
        for opt in other.iter() {
            self.opts.push_back(opt.clone());
        }
    }

    /// The subset that flows into child scopes.
    pub(crate) fn propagating(&self) -> OptionSet {
        OptionSet {
            opts: self.opts.iter().filter(|o| o.propagate).cloned().collect(),
        }
    }
}

impl FromIterator<Opt> for OptionSet {
    fn from_iter<I: IntoIterator<Item = Opt>>(iter: I) -> Self {
        OptionSet {
            opts: iter.into_iter().collect(),
        }
    }
}

/// Process-wide default options, prepended to the root scope of every run.
///
/// Append-only: entries are never removed or rewritten once added.
#[derive(Debug, Default)]
pub struct Defaults {
    opts: RwLock<Vector<Opt>>,
}

impl Defaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a default option. Safe to call from multiple threads.
    pub fn append(&self, opt: Opt) {
        self.opts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(opt);
    }

    /// A point-in-time copy of the current defaults.
    pub fn snapshot(&self) -> OptionSet {
        OptionSet {
            opts: self
                .opts
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_entry_wins_on_lookup() {
        let mut set = OptionSet::new();
        set.push(Opt::new("k", 1i64));
        set.push(Opt::new("k", 2i64));
        assert_eq!(set.get("k"), Some(&Value::Int(2)));
    }

    #[test]
    fn propagating_filters_by_flag() {
        let mut set = OptionSet::new();
        set.push(Opt::new("local", true));
        set.push(Opt::propagated("deep", true));
        let p = set.propagating();
        assert!(p.contains("deep"));
        assert!(!p.contains("local"));
    }

    #[test]
    fn defaults_are_append_only_snapshots() {
        let defaults = Defaults::new();
        defaults.append(Opt::propagated("trace", true));
        let before = defaults.snapshot();
        defaults.append(Opt::new("late", 1i64));
        assert_eq!(before.len(), 1);
        assert_eq!(defaults.snapshot().len(), 2);
    }
}
