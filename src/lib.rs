pub use crate::capability::{Capability, CapabilitySet, Descriptor};
pub use crate::context::{Ctx, NodeKind};
pub use crate::errors::EngineError;
pub use crate::options::{Defaults, Opt, OptionSet};
pub use crate::report::{NodeReport, Outcome, RunReport};
pub use crate::runner::Engine;
pub use crate::suite::Suite;
pub use crate::value::{Kind, Value};

pub mod capability;
pub(crate) mod compose;
pub mod context;
pub mod driver;
pub mod errors;
pub mod hooks;
pub mod options;
pub mod overrides;
pub mod plan;
pub mod report;
pub mod runner;
pub mod suite;
pub mod value;
