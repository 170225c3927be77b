//! Per-binding ownership tracking.
//!
//! Every `let`, parameter and pattern binding gets its own [`BindingId`];
//! names resolve to the innermost live binding, so an inner shadow never
//! disturbs the outer binding it hides. States evolve through
//! [`state::transition`](crate::compiler::state::transition).
//!
//! Conditional control flow uses an explicit snapshot stack: `branch_save`
//! before the first arm, `branch_restore` before each later arm, and
//! `branch_merge` with the final state of every arm that reaches the join.

use crate::compiler::ast::TypeRef;
use crate::compiler::lifetimes::ScopeId;
use crate::compiler::span::Span;
use crate::compiler::state::{dotted, transition, Event, OwnershipState, Violation};
use crate::compiler::types::MoveSemantics;
use crate::diagnostics::{Diagnostic, DiagnosticKind};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindingId(pub u32);

#[derive(Debug, Clone)]
pub struct Binding {
    pub id: BindingId,
    pub name: String,
    pub scope: ScopeId,
    pub ty: TypeRef,
    pub semantics: MoveSemantics,
    pub mutable: bool,
    pub declared_at: Span,
    pub state: OwnershipState,
}

/// One successful move, kept for two-location diagnostics and for consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRecord {
    pub binding: BindingId,
    pub place: String,
    pub span: Span,
}

/// States of every live binding at one program point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    states: BTreeMap<BindingId, OwnershipState>,
}

impl StateSnapshot {
    pub fn get(&self, id: BindingId) -> Option<&OwnershipState> {
        self.states.get(&id)
    }

    /// Join of several path states. Bindings missing from a later snapshot
    /// keep the value from the earlier ones.
    pub fn merge<'a>(snapshots: impl IntoIterator<Item = &'a StateSnapshot>) -> Option<StateSnapshot> {
        let mut iter = snapshots.into_iter();
        let mut merged = iter.next()?.clone();
        for snap in iter {
            for (id, state) in merged.states.iter_mut() {
                if let Some(other) = snap.states.get(id) {
                    *state = state.join(other);
                }
            }
        }
        Some(merged)
    }
}

#[derive(Debug, Default)]
pub struct MoveTracker {
    bindings: Vec<Binding>,
    /// Shadow stacks: name → live bindings, innermost last.
    names: HashMap<String, Vec<BindingId>>,
    history: Vec<MoveRecord>,
    /// Pre-branch snapshots, indexed by branch depth.
    branches: Vec<StateSnapshot>,
}

impl MoveTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Declarations ────────────────────────────────────────────

    /// Introduce a new binding. Reference-typed bindings start out as
    /// `Borrowed`/`BorrowedMut`, everything else as `Initialized`.
    pub fn declare(
        &mut self,
        name: &str,
        scope: ScopeId,
        ty: TypeRef,
        semantics: MoveSemantics,
        mutable: bool,
        span: Span,
    ) -> BindingId {
        let id = BindingId(self.bindings.len() as u32);
        let state = initial_state(&ty);
        self.bindings.push(Binding {
            id,
            name: name.to_string(),
            scope,
            ty,
            semantics,
            mutable,
            declared_at: span,
            state,
        });
        self.names.entry(name.to_string()).or_default().push(id);
        id
    }

    pub fn resolve(&self, name: &str) -> Option<BindingId> {
        self.names.get(name).and_then(|stack| stack.last().copied())
    }

    pub fn binding(&self, id: BindingId) -> &Binding {
        &self.bindings[id.0 as usize]
    }

    /// Bindings currently visible by name, in declaration order.
    pub fn visible(&self) -> Vec<&Binding> {
        let mut ids: Vec<BindingId> = self
            .names
            .values()
            .filter_map(|stack| stack.last().copied())
            .collect();
        ids.sort();
        ids.into_iter().map(|id| self.binding(id)).collect()
    }

    /// Forget every binding declared in `scope`; outer shadows become visible again.
    pub fn exit_scope(&mut self, scope: ScopeId) {
        let bindings = &self.bindings;
        self.names.retain(|_, stack| {
            stack.retain(|id| bindings[id.0 as usize].scope != scope);
            !stack.is_empty()
        });
    }

    // ── Events ──────────────────────────────────────────────────

    /// Read of `path` within the binding. Fails if the place was moved.
    pub fn check_use(&self, id: BindingId, path: &[String], span: Span) -> Result<(), Diagnostic> {
        let binding = self.binding(id);
        let (_, violation) = transition(&binding.state, Event::Read { path, span });
        match violation {
            None => Ok(()),
            Some(v) => Err(self.violation_diag(binding, path, span, v, "use")),
        }
    }

    /// By-value transfer of the whole binding. `semantics` is that of the
    /// value being transferred; Copy values only need to be readable.
    pub fn record_move(
        &mut self,
        id: BindingId,
        semantics: MoveSemantics,
        span: Span,
    ) -> Result<(), Diagnostic> {
        self.record_field_move(id, &[], semantics, span)
    }

    /// By-value transfer of a field path. Marks only that path moved and the
    /// binding `PartiallyMoved`.
    pub fn record_field_move(
        &mut self,
        id: BindingId,
        path: &[String],
        semantics: MoveSemantics,
        span: Span,
    ) -> Result<(), Diagnostic> {
        match semantics {
            MoveSemantics::Copy => return self.check_use(id, path, span),
            MoveSemantics::NonMovable => {
                let binding = self.binding(id);
                let place = place_name(&binding.name, path);
                return Err(Diagnostic::new(
                    DiagnosticKind::CannotMove,
                    place.clone(),
                    format!("cannot move `{}`: its type is not movable", place),
                    span,
                )
                .with_secondary(binding.declared_at));
            }
            MoveSemantics::Move => {}
        }
        let binding = self.binding(id);
        let (next, violation) = transition(&binding.state, Event::Move { path, span });
        if let Some(v) = violation {
            return Err(self.violation_diag(binding, path, span, v, "move"));
        }
        log::trace!("moved `{}` at {}", place_name(&binding.name, path), span);
        self.history.push(MoveRecord {
            binding: id,
            place: place_name(&binding.name, path),
            span,
        });
        self.bindings[id.0 as usize].state = next;
        Ok(())
    }

    /// Overwrite the whole binding with a fresh value.
    pub fn reinitialize(&mut self, id: BindingId, span: Span) {
        let binding = &mut self.bindings[id.0 as usize];
        log::trace!("reinitialized `{}` at {}", binding.name, span);
        binding.state = initial_state(&binding.ty);
    }

    /// Overwrite one field path, restoring it if it had been moved.
    pub fn restore_field(
        &mut self,
        id: BindingId,
        path: &[String],
        span: Span,
    ) -> Result<(), Diagnostic> {
        let binding = self.binding(id);
        let (next, violation) = transition(&binding.state, Event::Reinit { path });
        if let Some(v) = violation {
            return Err(self.violation_diag(binding, path, span, v, "assign to part"));
        }
        self.bindings[id.0 as usize].state = next;
        Ok(())
    }

    // ── Branches ────────────────────────────────────────────────

    pub fn capture(&self) -> StateSnapshot {
        let states = self
            .names
            .values()
            .flatten()
            .map(|id| (*id, self.binding(*id).state.clone()))
            .collect();
        StateSnapshot { states }
    }

    pub fn apply(&mut self, snapshot: &StateSnapshot) {
        for (id, state) in &snapshot.states {
            self.bindings[id.0 as usize].state = state.clone();
        }
    }

    /// Push the pre-branch state. Returns the branch depth.
    pub fn branch_save(&mut self) -> usize {
        self.branches.push(self.capture());
        self.branches.len()
    }

    /// Reset to the innermost pre-branch state before analysing another arm.
    pub fn branch_restore(&mut self) {
        if let Some(snapshot) = self.branches.last().cloned() {
            self.apply(&snapshot);
        }
    }

    /// Pop the innermost branch and install the join of the arm states that
    /// reach the join point. With no such arms the pre-branch state is
    /// restored and `false` is returned: code after the branch is unreachable.
    pub fn branch_merge(&mut self, arms: &[StateSnapshot]) -> bool {
        let pre = self.branches.pop().unwrap_or_default();
        match StateSnapshot::merge(arms) {
            Some(merged) => {
                log::trace!("merged {} arm state(s)", arms.len());
                self.apply(&merged);
                true
            }
            None => {
                self.apply(&pre);
                false
            }
        }
    }

    pub fn branch_depth(&self) -> usize {
        self.branches.len()
    }

    // ── Queries ─────────────────────────────────────────────────

    pub fn is_moved(&self, name: &str) -> bool {
        self.resolve(name)
            .map(|id| self.binding(id).state.is_moved())
            .unwrap_or(false)
    }

    pub fn get_ownership_state(&self, name: &str) -> Option<&OwnershipState> {
        self.resolve(name).map(|id| &self.binding(id).state)
    }

    pub fn history(&self) -> &[MoveRecord] {
        &self.history
    }

    /// Moves recorded against one binding, oldest first.
    pub fn moves_of(&self, id: BindingId) -> impl Iterator<Item = &MoveRecord> {
        self.history.iter().filter(move |r| r.binding == id)
    }

    fn violation_diag(
        &self,
        binding: &Binding,
        path: &[String],
        span: Span,
        violation: Violation,
        action: &str,
    ) -> Diagnostic {
        let place = place_name(&binding.name, path);
        // Partial writes name the value they land in, not the field.
        let shown = if action == "assign to part" {
            binding.name.as_str()
        } else {
            place.as_str()
        };
        match violation {
            Violation::UseAfterMove {
                moved_at,
                conditional,
            } => {
                let message = if conditional {
                    format!("{} of possibly moved value `{}`", action, shown)
                } else if action == "move" {
                    format!("cannot move from moved value `{}`", place)
                } else {
                    format!("{} of moved value `{}`", action, shown)
                };
                Diagnostic::new(DiagnosticKind::UseAfterMove, place, message, span)
                    .with_secondary(moved_at)
            }
            Violation::PartialMove { field, moved_at } => Diagnostic::new(
                DiagnosticKind::PartialMoveConflict,
                place.clone(),
                format!(
                    "{} of partially moved value `{}`: field `{}.{}` was moved",
                    action, place, binding.name, field
                ),
                span,
            )
            .with_secondary(moved_at),
        }
    }
}

fn initial_state(ty: &TypeRef) -> OwnershipState {
    match ty {
        TypeRef::Ref { mutable: true, .. } => OwnershipState::BorrowedMut,
        TypeRef::Ref { mutable: false, .. } => OwnershipState::Borrowed,
        TypeRef::Named(_) => OwnershipState::Initialized,
    }
}

fn place_name(base: &str, path: &[String]) -> String {
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}.{}", base, dotted(path))
    }
}
