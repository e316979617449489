// Shared fixtures for the integration tests.

use gantry::capability::{Capability, Descriptor};
use std::any::Any;
use std::sync::{Arc, Mutex};

/// A shared, thread-safe event journal. Suites, hooks, and capabilities
/// append to it; tests assert on the recorded sequence.
#[derive(Clone, Default)]
pub struct Journal {
    events: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Events starting with `prefix`, in recorded order.
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

/// A capability that contributes a fixed descriptor and nothing else. Handy
/// for tests that only care about hooks, overrides, or plan patches.
pub struct Contributor {
    descriptor: Descriptor,
}

impl Contributor {
    pub fn new(descriptor: Descriptor) -> Self {
        Self { descriptor }
    }
}

impl Capability for Contributor {
    fn descriptor(&self) -> Option<Descriptor> {
        Some(self.descriptor.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
