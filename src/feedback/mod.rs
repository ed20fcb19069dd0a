//! Structured Feedback Module
//!
//! Machine-readable output of a middle-end run:
//! - Ordered optimizer pass trace with an aggregate summary
//! - JSON error reports for failed compilation units
//! - Per-unit statistics
#![allow(dead_code)]

use serde::{Deserialize, Serialize};

use crate::utils::{Error, Span};

// ==================== Optimizer Trace ====================

/// One record per declared pass, in declared order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassTrace {
    pub name: String,
    pub enabled: bool,
    pub changed: bool,
    pub change_count: usize,
    pub elapsed_ms: f64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl PassTrace {
    /// Entry for a pass that did not run
    pub fn skipped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: false,
            changed: false,
            change_count: 0,
            elapsed_ms: 0.0,
            warnings: Vec::new(),
        }
    }
}

/// Trace plus summary of one optimizer run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub opt_level: u8,
    pub target_lang: String,
    /// Logical OR over all passes
    pub changed: bool,
    /// Sum over all passes
    pub change_count: usize,
    pub elapsed_ms: f64,
    pub warnings: Vec<String>,
    /// Override sets, sorted
    pub enabled_passes: Vec<String>,
    pub disabled_passes: Vec<String>,
    pub trace: Vec<PassTrace>,
}

impl OptimizationReport {
    pub fn new(opt_level: u8, target_lang: &str) -> Self {
        Self {
            opt_level,
            target_lang: target_lang.to_string(),
            changed: false,
            change_count: 0,
            elapsed_ms: 0.0,
            warnings: Vec::new(),
            enabled_passes: Vec::new(),
            disabled_passes: Vec::new(),
            trace: Vec::new(),
        }
    }

    /// Append a trace entry and fold it into the summary
    pub fn record(&mut self, entry: PassTrace) {
        if entry.enabled {
            self.changed |= entry.changed;
            self.change_count += entry.change_count;
            self.elapsed_ms += entry.elapsed_ms;
            self.warnings.extend(entry.warnings.iter().cloned());
        }
        self.trace.push(entry);
    }

    /// Trace entry of a pass by name
    pub fn find(&self, name: &str) -> Option<&PassTrace> {
        self.trace.iter().find(|entry| entry.name == name)
    }

    /// Human-readable trace
    pub fn render_trace(&self) -> String {
        let mut out = String::new();
        out.push_str("east3_optimizer_trace:\n");
        out.push_str(&format!("  opt_level: {}\n", self.opt_level));
        out.push_str(&format!("  target_lang: {}\n", self.target_lang));
        out.push_str("  passes:\n");
        if self.trace.is_empty() {
            out.push_str("    - (none)\n");
        }
        for entry in &self.trace {
            out.push_str(&format!(
                "    - {} enabled={} changed={} count={} elapsed_ms={:.3}\n",
                entry.name, entry.enabled, entry.changed, entry.change_count, entry.elapsed_ms
            ));
        }
        out.push_str("  summary:\n");
        out.push_str(&format!("    changed: {}\n", self.changed));
        out.push_str(&format!("    change_count: {}\n", self.change_count));
        out.push_str(&format!("    elapsed_ms: {:.3}\n", self.elapsed_ms));
        if self.warnings.is_empty() {
            out.push_str("    warnings: []\n");
        } else {
            out.push_str("    warnings:\n");
            for warning in &self.warnings {
                out.push_str(&format!("      - {}\n", warning));
            }
        }
        out
    }

    /// Output as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

// ==================== Structured Error Report ====================

/// A structured error report for a failed unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Error code (e.g., "E0101")
    pub code: String,

    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    pub location: Option<Location>,

    /// Suggested fixes
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Aborted the unit; no output was written
    Fatal,
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub message: String,

    /// Confidence in this suggestion (0.0 - 1.0)
    pub confidence: f64,
}

impl ErrorReport {
    /// Create an error report from a middle-end error
    pub fn from_error(error: &Error, file_name: &str) -> Self {
        let (code, suggestions) = generate_error_info(error);
        Self {
            code: code.to_string(),
            severity: if error.is_fatal_for_unit() { Severity::Fatal } else { Severity::Error },
            message: error.to_string(),
            location: Some(Location { file: file_name.to_string(), span: None }),
            suggestions,
        }
    }

    /// Create a warning report, e.g. from a pass warning
    pub fn warning(code: &str, message: &str, location: Option<Location>) -> Self {
        Self {
            code: code.to_string(),
            severity: Severity::Warning,
            message: message.to_string(),
            location,
            suggestions: vec![],
        }
    }
}

fn suggest(message: impl Into<String>, confidence: f64) -> Suggestion {
    Suggestion { message: message.into(), confidence }
}

/// Error code and fix suggestions per error kind
fn generate_error_info(error: &Error) -> (&'static str, Vec<Suggestion>) {
    match error {
        // ========== Configuration ==========
        Error::InvalidOptLevel(_) => ("E0101", vec![suggest("Use an opt level of 0, 1 or 2", 0.9)]),
        Error::InvalidPassToken(token) => {
            let mut suggestions = vec![suggest("Write overrides as +PassName or -PassName", 0.9)];
            let name = token.trim_start_matches(['+', '-']);
            if !name.is_empty() && !token.starts_with(['+', '-']) {
                suggestions.insert(0, suggest(format!("Did you mean '+{}'?", name), 0.7));
            }
            ("E0102", suggestions)
        }

        // ========== Optimizer ==========
        Error::PassContract { pass, .. } => (
            "E0201",
            vec![suggest(format!("Disable the pass with --opt-pass=-{}", pass), 0.6)],
        ),
        Error::RewriteBudgetExceeded { pass, .. } => (
            "E0202",
            vec![
                suggest(format!("Disable the pass with --opt-pass=-{}", pass), 0.6),
                suggest("Lower the opt level", 0.4),
            ],
        ),

        // ========== Stages ==========
        Error::MalformedRoot(_) => ("E0301", vec![suggest("Provide a module-shaped stage-2 tree", 0.8)]),
        Error::StageMismatch { expected, .. } => (
            "E0302",
            vec![suggest(format!("Run the stage pipeline up to stage {} first", expected), 0.7)],
        ),

        // ========== Types ==========
        Error::UnknownTypeId(_) => (
            "E0401",
            vec![suggest("Register the class before referring to it", 0.5)],
        ),

        // ========== Serialization ==========
        Error::Json(_) => ("E0501", vec![suggest("Check that the input is valid JSON", 0.8)]),
    }
}

// ==================== Unit Feedback ====================

/// Outcome of one compilation unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitFeedback {
    pub success: bool,

    pub source_file: String,

    pub diagnostics: Vec<ErrorReport>,

    pub stats: UnitStats,

    pub optimization: Option<OptimizationReport>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitStats {
    pub lower_time_ms: f64,
    pub optimize_time_ms: f64,
    pub total_time_ms: f64,
    /// Top-level statements after lowering
    pub stmt_count: usize,
    /// Classes registered while lowering
    pub class_count: usize,
}

impl UnitFeedback {
    pub fn success(source_file: String, stats: UnitStats, optimization: OptimizationReport) -> Self {
        let diagnostics = optimization
            .warnings
            .iter()
            .map(|w| {
                ErrorReport::warning(
                    "W0001",
                    w,
                    Some(Location { file: source_file.clone(), span: None }),
                )
            })
            .collect();
        Self {
            success: true,
            source_file,
            diagnostics,
            stats,
            optimization: Some(optimization),
        }
    }

    pub fn failure(source_file: String, error: &Error, stats: UnitStats) -> Self {
        let report = ErrorReport::from_error(error, &source_file);
        Self {
            success: false,
            source_file,
            diagnostics: vec![report],
            stats,
            optimization: None,
        }
    }

    /// Output as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Output as compact JSON (one line per unit)
    pub fn to_json_compact(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ran(name: &str, count: usize, elapsed_ms: f64) -> PassTrace {
        PassTrace {
            name: name.to_string(),
            enabled: true,
            changed: count > 0,
            change_count: count,
            elapsed_ms,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_summary_folds_enabled_entries() {
        let mut report = OptimizationReport::new(1, "cpp");
        report.record(ran("A", 2, 0.5));
        report.record(PassTrace::skipped("B"));
        report.record(ran("C", 0, 0.25));
        assert!(report.changed);
        assert_eq!(report.change_count, 2);
        assert_eq!(report.elapsed_ms, 0.75);
        assert_eq!(report.trace.len(), 3);
        assert!(!report.find("B").unwrap().enabled);
    }

    #[test]
    fn test_render_trace_format() {
        let mut report = OptimizationReport::new(2, "rs");
        report.record(ran("RangeForCanonicalizationPass", 1, 0.0));
        report.record(PassTrace::skipped("NoOpCastCleanupPass"));
        let text = report.render_trace();
        let expected = "\
east3_optimizer_trace:
  opt_level: 2
  target_lang: rs
  passes:
    - RangeForCanonicalizationPass enabled=true changed=true count=1 elapsed_ms=0.000
    - NoOpCastCleanupPass enabled=false changed=false count=0 elapsed_ms=0.000
  summary:
    changed: true
    change_count: 1
    elapsed_ms: 0.000
    warnings: []
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_error_report_codes() {
        let report = ErrorReport::from_error(&Error::InvalidPassToken("Foo".to_string()), "a.json");
        assert_eq!(report.code, "E0102");
        assert_eq!(report.severity, Severity::Error);
        assert_eq!(report.suggestions[0].message, "Did you mean '+Foo'?");
        let report = ErrorReport::from_error(&Error::MalformedRoot("x".to_string()), "a.json");
        assert_eq!(report.code, "E0301");
        assert_eq!(report.severity, Severity::Fatal);
    }

    #[test]
    fn test_failure_feedback_json() {
        let feedback = UnitFeedback::failure(
            "unit.json".to_string(),
            &Error::StageMismatch { expected: 2, got: 3 },
            UnitStats::default(),
        );
        let json = feedback.to_json_compact();
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("E0302"));
    }
}
