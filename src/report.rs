//! Per-node outcome records and the run summary.
//!
//! The engine itself owns no persisted state; the report is an in-memory
//! structure keyed by node name that reporting capabilities may serialize.
//! Printing follows the pass/fail/skip summary style with colored terminal
//! output when attached to a TTY.

use serde::Serialize;
use std::sync::{Mutex, PoisonError};

/// Terminal outcome of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Passed,
    SoftFailed,
    FatalFailed,
    Skipped,
}

/// A recovered panic: the rendered payload and the stack captured at the
/// panic site.
#[derive(Debug, Clone, Serialize)]
pub struct PanicRecord {
    pub value: String,
    pub trace: String,
}

/// The record one node leaves behind when its frame finishes.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    /// Full node path, ancestors joined with '/'.
    pub name: String,
    pub outcome: Outcome,
    pub skip_reason: Option<String>,
    pub panic: Option<PanicRecord>,
    /// Configuration-error text, when node construction failed.
    pub detail: Option<String>,
}

/// Thread-safe sink the scheduler pushes node records into; parallel nodes
/// record in completion order.
#[derive(Debug, Default)]
pub struct Collector {
    records: Mutex<Vec<NodeReport>>,
}

impl Collector {
    pub(crate) fn push(&self, record: NodeReport) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    pub(crate) fn drain(&self) -> Vec<NodeReport> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

// Color constants for terminal output
const RESET: &str = "\x1b[0m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";

/// The final report for a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub nodes: Vec<NodeReport>,
}

impl RunReport {
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn passed(&self) -> usize {
        self.count(Outcome::Passed)
    }

    pub fn soft_failed(&self) -> usize {
        self.count(Outcome::SoftFailed)
    }

    pub fn fatal_failed(&self) -> usize {
        self.count(Outcome::FatalFailed)
    }

    pub fn skipped(&self) -> usize {
        self.count(Outcome::Skipped)
    }

    /// True when no node failed, softly or fatally.
    pub fn succeeded(&self) -> bool {
        self.soft_failed() == 0 && self.fatal_failed() == 0
    }

    fn count(&self, outcome: Outcome) -> usize {
        self.nodes.iter().filter(|n| n.outcome == outcome).count()
    }

    /// Serializes the report for reporting capabilities that persist results.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Prints the report to stderr, colored when stderr is a terminal.
    pub fn print_default(&self) {
        self.print(atty::is(atty::Stream::Stderr));
    }

    pub fn print(&self, use_colors: bool) {
        eprint!("{}", self.render(use_colors));
    }

    /// Renders the per-node lines and the summary; ANSI colors are embedded
    /// when `use_colors` is set.
    pub fn render(&self, use_colors: bool) -> String {
        use std::fmt::Write as _;

        let colorize = |text: &str, color: &str| {
            if use_colors {
                format!("{}{}{}", color, text, RESET)
            } else {
                text.to_string()
            }
        };

        let mut out = String::new();
        for node in &self.nodes {
            match node.outcome {
                Outcome::Passed => {
                    let _ = writeln!(out, "{}: {}", colorize("PASS", GREEN), node.name);
                }
                Outcome::Skipped => {
                    let reason = node.skip_reason.as_deref().unwrap_or("skipped");
                    let _ = writeln!(
                        out,
                        "{}: {} ({})",
                        colorize("SKIP", YELLOW),
                        node.name,
                        reason
                    );
                }
                Outcome::SoftFailed | Outcome::FatalFailed => {
                    let _ = writeln!(out, "{}: {}", colorize("FAIL", RED), node.name);
                    if let Some(detail) = &node.detail {
                        let _ = writeln!(out, "  Error: {}", detail);
                    }
                    if let Some(panic) = &node.panic {
                        let _ = writeln!(out, "  Panic: {}", panic.value);
                    }
                }
            }
        }

        let _ = writeln!(
            out,
            "\nRun summary: total {}, {} {}, {} {}, {} {}, {} {}",
            self.nodes.len(),
            colorize("passed", GREEN),
            self.passed(),
            colorize("failed", RED),
            self.soft_failed(),
            colorize("failed fatally", RED),
            self.fatal_failed(),
            colorize("skipped", YELLOW),
            self.skipped(),
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RunReport {
        RunReport {
            nodes: vec![
                NodeReport {
                    name: "S/T".to_string(),
                    outcome: Outcome::Passed,
                    skip_reason: None,
                    panic: None,
                    detail: None,
                },
                NodeReport {
                    name: "S/F".to_string(),
                    outcome: Outcome::FatalFailed,
                    skip_reason: None,
                    panic: Some(PanicRecord {
                        value: "boom".to_string(),
                        trace: String::new(),
                    }),
                    detail: None,
                },
                NodeReport {
                    name: "S/K".to_string(),
                    outcome: Outcome::Skipped,
                    skip_reason: Some("later".to_string()),
                    panic: None,
                    detail: None,
                },
            ],
        }
    }

    #[test]
    fn render_without_colors_is_plain_text() {
        let text = sample().render(false);
        assert!(text.contains("PASS: S/T"), "{text}");
        assert!(text.contains("FAIL: S/F"), "{text}");
        assert!(text.contains("  Panic: boom"), "{text}");
        assert!(text.contains("SKIP: S/K (later)"), "{text}");
        assert!(text.contains("Run summary: total 3"), "{text}");
        assert!(!text.contains('\x1b'), "{text}");
    }

    #[test]
    fn render_with_colors_embeds_ansi_codes() {
        let text = sample().render(true);
        assert!(text.contains(GREEN), "{text}");
        assert!(text.contains(RED), "{text}");
        assert!(text.contains(YELLOW), "{text}");
    }
}
