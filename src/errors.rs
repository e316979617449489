//! Gantry configuration errors.
//!
//! Everything in this module is a *configuration* error: a mistake in how a
//! suite or capability set was declared, detected at plan-build or node
//! construction time. Configuration errors are fatal for the node that hit
//! them, never retried, and never silently ignored.
//!
//! Test failures, skips, and recovered panics are not errors in this sense;
//! they are recorded on the node and surfaced through the run report.

use crate::value::Kind;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("test '{test}' requires case source '{case_source}', which is not registered")]
    #[diagnostic(
        code(gantry::plan::missing_case_source),
        help("register the source with Suite::case_source before adding the parametrized test")
    )]
    MissingCaseSource { test: String, case_source: String },

    #[error(
        "case source '{case_source}' produced a {found} value, but field '{field}' of test '{test}' is declared {expected}"
    )]
    #[diagnostic(code(gantry::plan::case_kind_mismatch))]
    CaseKindMismatch {
        test: String,
        field: String,
        case_source: String,
        expected: Kind,
        found: Kind,
    },

    #[error("case source '{case_source}' mixes element kinds ({first} and {other})")]
    #[diagnostic(
        code(gantry::plan::mixed_case_kinds),
        help("a case source must return an ordered sequence of a single element kind")
    )]
    MixedCaseKinds {
        case_source: String,
        first: Kind,
        other: Kind,
    },

    #[error("duplicate test name '{name}' registered on suite '{suite}'")]
    #[diagnostic(code(gantry::suite::duplicate_test))]
    DuplicateTest { suite: String, name: String },

    #[error("duplicate case source '{name}' registered on suite '{suite}'")]
    #[diagnostic(code(gantry::suite::duplicate_case_source))]
    DuplicateCaseSource { suite: String, name: String },

    #[error("duplicate capability slot '{slot}'")]
    #[diagnostic(code(gantry::compose::duplicate_slot))]
    DuplicateSlot { slot: String },

    /// A capability's `init` refused the node's configuration.
    #[error("capability initialization failed: {message}")]
    #[diagnostic(code(gantry::compose::capability_init))]
    CapabilityInit { message: String },

    #[error(
        "capability shape mismatch under slot '{slot}': component at [{path}] has no nested component {index}"
    )]
    #[diagnostic(
        code(gantry::compose::shape_mismatch),
        help("a capability's nested component layout must not depend on per-node state")
    )]
    ShapeMismatch {
        slot: String,
        path: String,
        index: usize,
    },
}

/// Renders a configuration error with full miette diagnostics.
pub fn render_error(error: EngineError) -> String {
    let report = miette::Report::new(error);
    format!("{report:?}")
}

/// Prints a configuration error to stderr with full miette diagnostics.
///
/// Use this for user-facing display when a run aborts before execution.
pub fn print_error(error: EngineError) {
    eprintln!("{}", render_error(error));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_diagnostics_carry_code_and_help() {
        let error = EngineError::MissingCaseSource {
            test: "T".to_string(),
            case_source: "sizes".to_string(),
        };
        let rendered = render_error(error);
        assert!(rendered.contains("missing_case_source"), "{rendered}");
        assert!(rendered.contains("requires case source 'sizes'"), "{rendered}");
        assert!(rendered.contains("help"), "{rendered}");

        print_error(EngineError::DuplicateSlot {
            slot: "fs".to_string(),
        });
    }
}
