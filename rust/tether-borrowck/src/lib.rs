//! Tether ownership and borrow checking
//!
//! Runs after type checking and before code generation. Each function body
//! is walked once (loops a bounded number of times) against a read-only
//! [`TypeRegistry`]; ownership, borrow and lifetime violations come back as
//! structured [`Diagnostic`]s. Code generation must not proceed while any
//! diagnostic is present: see [`AnalysisResult::into_result`].

pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod logging;

pub use compiler::ast::Program;
pub use compiler::borrowck::{AnalysisDriver, BindingSummary, FunctionSummary};
pub use compiler::state::OwnershipState;
pub use compiler::types::{MoveSemantics, RegistryError, TypeRegistry, TypeRegistryBuilder};
pub use config::{AnalysisOptions, ConfigError, LoopStrategy};
pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};

use compiler::ast::FnDef;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BorrowckError {
    #[error("borrow check failed with {} error(s): {}", .0.len(), summarize(.0))]
    Rejected(Vec<Diagnostic>),
}

impl BorrowckError {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            BorrowckError::Rejected(diags) => diags,
        }
    }
}

fn summarize(diags: &[Diagnostic]) -> String {
    diags
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ── Results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Every function's diagnostics, in source order.
    pub diagnostics: Vec<Diagnostic>,
    pub functions: Vec<FunctionSummary>,
}

impl AnalysisResult {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSummary> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Gate for code generation: the summaries if the program is clean.
    pub fn into_result(self) -> Result<Vec<FunctionSummary>, BorrowckError> {
        if self.diagnostics.is_empty() {
            Ok(self.functions)
        } else {
            Err(BorrowckError::Rejected(self.diagnostics))
        }
    }
}

// ── Entry points ────────────────────────────────────────────────────

/// Check every function of `program` with default options.
pub fn analyze(program: &Program, registry: &TypeRegistry) -> AnalysisResult {
    analyze_with(program, registry, &AnalysisOptions::default())
}

/// Check every function of `program`. Functions are independent; with
/// `options.parallel` they run on the rayon pool, and results keep source
/// order either way.
pub fn analyze_with(
    program: &Program,
    registry: &TypeRegistry,
    options: &AnalysisOptions,
) -> AnalysisResult {
    log::debug!(
        "borrow-checking {} function(s){}",
        program.functions.len(),
        if options.parallel { " in parallel" } else { "" }
    );
    let per_function: Vec<(FunctionSummary, Vec<Diagnostic>)> = if options.parallel {
        program
            .functions
            .par_iter()
            .map(|f| analyze_function(f, registry, options))
            .collect()
    } else {
        program
            .functions
            .iter()
            .map(|f| analyze_function(f, registry, options))
            .collect()
    };

    let mut result = AnalysisResult::default();
    for (summary, diags) in per_function {
        result.functions.push(summary);
        result.diagnostics.extend(diags);
    }
    if !result.is_ok() {
        log::debug!("{} diagnostic(s) in total", result.diagnostics.len());
    }
    result
}

fn analyze_function(
    f: &FnDef,
    registry: &TypeRegistry,
    options: &AnalysisOptions,
) -> (FunctionSummary, Vec<Diagnostic>) {
    let mut driver = AnalysisDriver::new(registry, options);
    let summary = driver.analyze_function(f);
    (summary, driver.into_diagnostics())
}
