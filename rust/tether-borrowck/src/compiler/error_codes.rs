//! Stable error codes for borrow-check diagnostics.
//!
//! Code range E0400–E0499 is reserved for ownership and borrow errors; the
//! remaining ranges belong to the other compiler passes.

use crate::diagnostics::DiagnosticKind;

pub fn code_for(kind: DiagnosticKind) -> &'static str {
    match kind {
        DiagnosticKind::UseAfterMove => "E0401",
        DiagnosticKind::ConflictingBorrow => "E0402",
        DiagnosticKind::CannotBorrow => "E0403",
        DiagnosticKind::CannotBorrowMut => "E0404",
        DiagnosticKind::DanglingReference => "E0405",
        DiagnosticKind::LifetimeViolation => "E0406",
        DiagnosticKind::PartialMoveConflict => "E0407",
        DiagnosticKind::MoveWhileBorrowed => "E0408",
        DiagnosticKind::AssignWhileBorrowed => "E0409",
        DiagnosticKind::CannotMove => "E0410",
    }
}

/// Reverse lookup, for consumers that only persisted the code.
pub fn kind_for(code: &str) -> Option<DiagnosticKind> {
    use strum::IntoEnumIterator;
    DiagnosticKind::iter().find(|k| code_for(*k) == code)
}
