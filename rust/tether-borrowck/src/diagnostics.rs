//! Structured borrow-check diagnostics.
//!
//! Diagnostics are plain data: a kind, the variable they concern, a primary
//! location and, when an earlier event explains the violation, a secondary
//! location. Rendering to text is left to the consumer; the `Display` impl is
//! a one-line summary for logs and test failures.

use crate::compiler::error_codes;
use crate::compiler::span::Span;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use strum_macros::{Display, EnumIter, IntoStaticStr};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    IntoStaticStr,
)]
pub enum DiagnosticKind {
    /// Read of a moved or conditionally moved value.
    UseAfterMove,
    /// Mutable borrow overlapping any other live borrow.
    ConflictingBorrow,
    /// Shared borrow (or read) of a moved source, or a read while mutably borrowed.
    CannotBorrow,
    /// Mutable borrow of a moved, immutable or otherwise invalid source.
    CannotBorrowMut,
    /// A returned reference points into the returning function's frame.
    DanglingReference,
    /// Any other unsatisfiable lifetime constraint.
    LifetimeViolation,
    /// Whole-value use of an aggregate with a moved field.
    PartialMoveConflict,
    MoveWhileBorrowed,
    AssignWhileBorrowed,
    /// Move of a NonMovable value, or a move out from behind a reference.
    CannotMove,
}

impl DiagnosticKind {
    /// Kinds rooted in the ownership state of a value. These take precedence
    /// over lifetime kinds reported at the same location.
    pub fn is_move_class(self) -> bool {
        matches!(
            self,
            DiagnosticKind::UseAfterMove
                | DiagnosticKind::PartialMoveConflict
                | DiagnosticKind::CannotBorrow
                | DiagnosticKind::CannotBorrowMut
        )
    }

    pub fn is_lifetime_class(self) -> bool {
        matches!(
            self,
            DiagnosticKind::DanglingReference | DiagnosticKind::LifetimeViolation
        )
    }

    pub fn code(self) -> &'static str {
        error_codes::code_for(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Variable (or place path) the diagnostic is about.
    pub subject: String,
    pub message: String,
    pub primary: Span,
    pub secondary: Option<Span>,
}

impl Diagnostic {
    pub fn new(
        kind: DiagnosticKind,
        subject: impl Into<String>,
        message: impl Into<String>,
        primary: Span,
    ) -> Self {
        Self {
            kind,
            subject: subject.into(),
            message: message.into(),
            primary,
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, span: Span) -> Self {
        self.secondary = Some(span);
        self
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// The earliest event this diagnostic is rooted in.
    fn root(&self) -> Span {
        if self.kind.is_move_class() {
            self.secondary.unwrap_or(self.primary)
        } else {
            self.primary
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error[{}]: {} (line {})", self.code(), self.message, self.primary.line)?;
        if let Some(sec) = self.secondary {
            write!(f, " (see line {})", sec.line)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Ordered diagnostic accumulator.
///
/// Suppresses repeats of the same violation (same kind, subject and root
/// event) and drops lifetime diagnostics at a location that already carries
/// an ownership diagnostic. Everything else is kept in emission order.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    items: Vec<Diagnostic>,
    seen: HashSet<(DiagnosticKind, String, Span)>,
    dedup: bool,
}

impl DiagnosticSink {
    pub fn new(dedup: bool) -> Self {
        Self {
            items: Vec::new(),
            seen: HashSet::new(),
            dedup,
        }
    }

    /// Returns `true` if the diagnostic was recorded.
    pub fn push(&mut self, diag: Diagnostic) -> bool {
        if diag.kind.is_lifetime_class()
            && self
                .items
                .iter()
                .any(|d| d.kind.is_move_class() && d.primary.overlaps(&diag.primary))
        {
            log::trace!("suppressing {} at {}: ownership error takes precedence", diag.kind, diag.primary);
            return false;
        }
        if self.dedup {
            let key = (diag.kind, diag.subject.clone(), diag.root());
            if !self.seen.insert(key) {
                log::trace!("suppressing repeated {} for `{}`", diag.kind, diag.subject);
                return false;
            }
        }
        log::debug!("{}", diag);
        self.items.push(diag);
        true
    }

    pub fn extend(&mut self, diags: impl IntoIterator<Item = Diagnostic>) {
        for d in diags {
            self.push(d);
        }
    }

    pub fn contains(&self, diag: &Diagnostic) -> bool {
        self.items.contains(diag)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}
