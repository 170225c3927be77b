//! Borrow checking driver.
//!
//! Walks one function body depth-first in source order and dispatches each
//! binding, move, borrow, assignment and return to the [`MoveTracker`] and
//! the [`LifetimeTracker`]. Every statement runs inside a temporary scope so
//! that borrows nobody keeps are released when the statement ends.
//!
//! Control flow:
//! - `if`/`match` arms start from the same pre-branch state; the arms that
//!   reach the join are merged.
//! - loops are re-analysed from the merge of the entry state and the state
//!   at the end of each pass (and at each `continue`) until the entry state
//!   is stable or the pass limit is reached.
//! - statements after `return`/`break`/`continue` are not analysed.
//!
//! Diagnostics are recorded and the walk carries on; nothing aborts.

use crate::compiler::ast::*;
use crate::compiler::lifetimes::{
    Access, BorrowId, BorrowRequest, BorrowSnapshot, Constraint, ConstraintKind, LifetimeId,
    LifetimeTracker, Region, ScopeId, ScopeKind,
};
use crate::compiler::moves::{BindingId, MoveTracker, StateSnapshot};
use crate::compiler::span::Span;
use crate::compiler::state::OwnershipState;
use crate::compiler::types::{MoveSemantics, TypeRegistry};
use crate::config::AnalysisOptions;
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

// ── Core types ──────────────────────────────────────────────────────

/// Whether control reaches the end of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Diverge,
}

/// How an expression's value is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ctx {
    /// Taken by value: Move-typed places are moved.
    Value,
    /// Only inspected (conditions, operands, match subjects).
    Read,
}

/// What an evaluated expression carries besides its type.
#[derive(Debug, Default)]
struct ValueInfo {
    /// Storage lifetimes the value may point into.
    origins: BTreeSet<LifetimeId>,
    /// Borrows created by the expression, not yet held by any binding.
    borrows: Vec<BorrowId>,
    /// Bindings whose held borrows flow into the value; `true` when moved.
    carried: Vec<(BindingId, bool)>,
}

impl ValueInfo {
    fn absorb(&mut self, other: ValueInfo) {
        self.origins.extend(other.origins);
        self.borrows.extend(other.borrows);
        self.carried.extend(other.carried);
    }
}

/// Both trackers' state at one program point.
#[derive(Debug, Clone)]
struct FlowState {
    moves: StateSnapshot,
    borrows: BorrowSnapshot,
}

impl FlowState {
    fn merge(states: &[FlowState]) -> Option<FlowState> {
        Some(FlowState {
            moves: StateSnapshot::merge(states.iter().map(|s| &s.moves))?,
            borrows: BorrowSnapshot::merge(states.iter().map(|s| &s.borrows))?,
        })
    }

    fn equivalent(&self, other: &FlowState) -> bool {
        self.moves == other.moves && self.borrows.equivalent(&other.borrows)
    }
}

#[derive(Debug, Default)]
struct LoopFrame {
    breaks: Vec<FlowState>,
    continues: Vec<FlowState>,
}

enum LoopHead<'a> {
    While(&'a Expr),
    Loop,
    For {
        var: &'a str,
        ty: &'a TypeRef,
        span: Span,
        origins: BTreeSet<LifetimeId>,
    },
}

struct FnContext {
    caller: ScopeId,
    /// Lifetime the signature promises for the returned reference, if any.
    ret_region: Option<LifetimeId>,
    /// Returns `&T` with `T` not itself a reference.
    returns_single_ref: bool,
}

/// Why a place cannot be mutated.
enum Immutable {
    NotDeclaredMut,
    BehindSharedRef,
}

// ── Results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSummary {
    pub name: String,
    pub semantics: MoveSemantics,
    pub state: OwnershipState,
    pub mutably_borrowed: bool,
}

/// Ownership facts of a function's bindings at the end of its body, for
/// code generation to choose between copy, move and reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSummary {
    pub name: String,
    pub bindings: Vec<BindingSummary>,
}

impl FunctionSummary {
    pub fn binding(&self, name: &str) -> Option<&BindingSummary> {
        self.bindings.iter().rev().find(|b| b.name == name)
    }

    pub fn is_moved(&self, name: &str) -> bool {
        self.binding(name).map_or(false, |b| b.state.is_moved())
    }

    pub fn has_mutable_borrow(&self, name: &str) -> bool {
        self.binding(name).map_or(false, |b| b.mutably_borrowed)
    }

    pub fn get_ownership_state(&self, name: &str) -> Option<&OwnershipState> {
        self.binding(name).map(|b| &b.state)
    }
}

// ── The driver ──────────────────────────────────────────────────────

/// Borrow checker for one function at a time. Owns its trackers; shares
/// only the read-only type registry.
pub struct AnalysisDriver<'r> {
    registry: &'r TypeRegistry,
    options: AnalysisOptions,
    lifetimes: LifetimeTracker,
    moves: MoveTracker,
    sink: DiagnosticSink,
    /// Innermost scopes that own bindings (temporaries excluded).
    binding_scopes: Vec<ScopeId>,
    loops: Vec<LoopFrame>,
    func: Option<FnContext>,
}

impl<'r> AnalysisDriver<'r> {
    pub fn new(registry: &'r TypeRegistry, options: &AnalysisOptions) -> Self {
        Self {
            registry,
            options: options.clone(),
            lifetimes: LifetimeTracker::new(),
            moves: MoveTracker::new(),
            sink: DiagnosticSink::new(options.dedup_diagnostics),
            binding_scopes: Vec::new(),
            loops: Vec::new(),
            func: None,
        }
    }

    // ── Public entry points ─────────────────────────────────────

    /// Analyse a whole function. Diagnostics accumulate in the driver.
    pub fn analyze_function(&mut self, f: &FnDef) -> FunctionSummary {
        let (caller, body) = self.enter_function(f);
        self.check_stmts(&f.body.stmts);
        self.finish_function(&f.name, caller, body)
    }

    /// Open the caller frame and the body scope, declare the parameters.
    /// Returns `(caller, body)` for [`finish_function`](Self::finish_function).
    pub fn enter_function(&mut self, f: &FnDef) -> (ScopeId, ScopeId) {
        log::debug!("borrow-checking `{}`", f.name);
        self.lifetimes = LifetimeTracker::new();
        self.moves = MoveTracker::new();
        self.binding_scopes.clear();
        self.loops.clear();

        let caller = self.enter_scope(ScopeKind::Caller);
        let mut named: HashMap<String, LifetimeId> = HashMap::new();
        for label in &f.lifetimes {
            let lt = self.lifetimes.create_universal(caller, Some(label));
            named.insert(label.clone(), lt);
        }
        for bound in &f.bounds {
            let longer = self.universal(&mut named, caller, &bound.longer);
            let shorter = self.universal(&mut named, caller, &bound.shorter);
            self.lifetimes.declare_bound(longer, shorter);
        }

        let body = self.enter_scope(ScopeKind::Function);
        let mut param_regions = Vec::new();
        for p in &f.params {
            let id = self.declare(&p.name, p.ty.clone(), p.mutable, p.span);
            if p.ty.is_ref() {
                let region = match p.ty.lifetime_label() {
                    Some(label) => self.universal(&mut named, caller, label),
                    None => self.lifetimes.create_universal(caller, None),
                };
                self.lifetimes.set_origins(id, BTreeSet::from([region]));
                param_regions.push(region);
            }
        }

        let ret_region = match &f.return_type {
            Some(ty) if ty.is_ref() => match ty.lifetime_label() {
                Some(label) => Some(self.universal(&mut named, caller, label)),
                None if param_regions.len() == 1 => Some(param_regions[0]),
                None => None,
            },
            _ => None,
        };
        let returns_single_ref = match &f.return_type {
            Some(TypeRef::Ref { inner, .. }) => !inner.is_ref(),
            _ => false,
        };
        self.func = Some(FnContext {
            caller,
            ret_region,
            returns_single_ref,
        });
        (caller, body)
    }

    /// Record the summary, then close the body and caller scopes.
    pub fn finish_function(&mut self, name: &str, caller: ScopeId, body: ScopeId) -> FunctionSummary {
        let summary = self.summarize(name);
        self.exit_scope(body);
        self.exit_scope(caller);
        self.func = None;
        log::debug!("`{}`: {} diagnostic(s) so far", name, self.sink.len());
        summary
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.sink.as_slice()
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.sink.into_vec()
    }

    // ── Queries ─────────────────────────────────────────────────

    pub fn is_moved(&self, name: &str) -> bool {
        self.moves.is_moved(name)
    }

    pub fn has_mutable_borrow(&self, name: &str) -> bool {
        self.moves
            .resolve(name)
            .map_or(false, |id| self.lifetimes.has_mutable_borrow(id))
    }

    pub fn get_ownership_state(&self, name: &str) -> Option<&OwnershipState> {
        self.moves.get_ownership_state(name)
    }

    fn summarize(&self, name: &str) -> FunctionSummary {
        let bindings = self
            .moves
            .visible()
            .into_iter()
            .map(|b| BindingSummary {
                name: b.name.clone(),
                semantics: b.semantics,
                state: b.state.clone(),
                mutably_borrowed: self.lifetimes.has_mutable_borrow(b.id),
            })
            .collect();
        FunctionSummary {
            name: name.to_string(),
            bindings,
        }
    }

    // ── Scopes and bindings ─────────────────────────────────────

    fn enter_scope(&mut self, kind: ScopeKind) -> ScopeId {
        let scope = self.lifetimes.enter_scope(kind);
        if kind != ScopeKind::Temporary {
            self.binding_scopes.push(scope);
        }
        scope
    }

    fn exit_scope(&mut self, scope: ScopeId) {
        let diags = self.lifetimes.exit_scope(scope);
        for d in diags {
            self.emit(d);
        }
        self.moves.exit_scope(scope);
        if self.binding_scopes.last() == Some(&scope) {
            self.binding_scopes.pop();
        }
    }

    fn in_temporary<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let scope = self.enter_scope(ScopeKind::Temporary);
        let result = f(self);
        self.exit_scope(scope);
        result
    }

    fn current_scope(&self) -> ScopeId {
        self.lifetimes.current_scope().unwrap_or(ScopeId(0))
    }

    fn declare(&mut self, name: &str, ty: TypeRef, mutable: bool, span: Span) -> BindingId {
        let scope = self.binding_scopes.last().copied().unwrap_or(ScopeId(0));
        let semantics = self.registry.classify_ref(&ty);
        let id = self.moves.declare(name, scope, ty, semantics, mutable, span);
        self.lifetimes.declare_storage(id, scope);
        id
    }

    fn universal(
        &mut self,
        named: &mut HashMap<String, LifetimeId>,
        caller: ScopeId,
        label: &str,
    ) -> LifetimeId {
        if let Some(lt) = named.get(label) {
            return *lt;
        }
        let lt = self.lifetimes.create_universal(caller, Some(label));
        named.insert(label.to_string(), lt);
        lt
    }

    /// Store a value's references and borrows in `holder`. `replace` drops
    /// the origins the holder had before (whole-binding writes).
    fn bind_value(&mut self, holder: BindingId, value: ValueInfo, replace: bool) {
        let scope = self.moves.binding(holder).scope;
        for b in value.borrows {
            self.lifetimes.attach(b, holder, scope);
        }
        for (from, moved) in value.carried {
            if from == holder {
                continue;
            }
            if moved {
                self.lifetimes.transfer_borrows(from, holder, scope);
            } else {
                self.lifetimes.share_borrows(from, holder, scope);
            }
        }
        if replace {
            self.lifetimes.set_origins(holder, value.origins);
        } else {
            self.lifetimes.add_origins(holder, &value.origins);
        }
    }

    fn emit(&mut self, diag: Diagnostic) {
        // Loop bodies are analysed more than once.
        if !self.loops.is_empty() && self.sink.contains(&diag) {
            return;
        }
        self.sink.push(diag);
    }

    // ── Statements ──────────────────────────────────────────────

    /// Check statements in order, stopping at the first one that diverges.
    /// Without [`enter_function`](Self::enter_function), a detached scope is
    /// opened to hold the bindings.
    pub fn check_stmts(&mut self, stmts: &[Stmt]) -> Flow {
        if self.lifetimes.current_scope().is_none() {
            log::warn!("statements checked outside a function; opening a detached scope");
            self.enter_scope(ScopeKind::Function);
        }
        for stmt in stmts {
            if self.check_stmt(stmt) == Flow::Diverge {
                return Flow::Diverge;
            }
        }
        Flow::Continue
    }

    fn check_block(&mut self, block: &Block) -> Flow {
        let scope = self.enter_scope(ScopeKind::Block);
        let flow = self.check_stmts(&block.stmts);
        self.exit_scope(scope);
        flow
    }

    fn check_stmt(&mut self, stmt: &Stmt) -> Flow {
        match stmt {
            Stmt::Let(s) => {
                self.in_temporary(|this| this.check_let(s));
                Flow::Continue
            }
            Stmt::Assign(s) => {
                self.in_temporary(|this| this.check_assign(s));
                Flow::Continue
            }
            Stmt::Expr(s) => {
                self.in_temporary(|this| {
                    this.eval(&s.expr, Ctx::Value);
                });
                Flow::Continue
            }
            Stmt::Return(s) => {
                self.in_temporary(|this| this.check_return(s));
                Flow::Diverge
            }
            Stmt::If(s) => self.check_if(s),
            Stmt::Match(s) => self.check_match(s),
            Stmt::While(s) => self.run_loop(LoopHead::While(&s.condition), &s.body),
            Stmt::Loop(s) => self.run_loop(LoopHead::Loop, &s.body),
            Stmt::For(s) => {
                let temp = self.enter_scope(ScopeKind::Temporary);
                let iter = self.eval(&s.iter, Ctx::Value);
                let head = LoopHead::For {
                    var: &s.var,
                    ty: &s.var_ty,
                    span: s.span,
                    origins: iter.origins,
                };
                let flow = self.run_loop(head, &s.body);
                self.exit_scope(temp);
                flow
            }
            Stmt::Block(b) => self.check_block(b),
            Stmt::Break(span) => {
                let state = self.capture();
                match self.loops.last_mut() {
                    Some(frame) => frame.breaks.push(state),
                    None => log::warn!("`break` outside of a loop at {}", span),
                }
                Flow::Diverge
            }
            Stmt::Continue(span) => {
                let state = self.capture();
                match self.loops.last_mut() {
                    Some(frame) => frame.continues.push(state),
                    None => log::warn!("`continue` outside of a loop at {}", span),
                }
                Flow::Diverge
            }
        }
    }

    fn check_let(&mut self, s: &LetStmt) {
        let value = self.eval(&s.value, Ctx::Value);
        let id = self.declare(&s.name, s.ty.clone(), s.mutable, s.span);
        self.bind_value(id, value, true);
    }

    fn check_assign(&mut self, s: &AssignStmt) {
        let target = &s.target;
        let Some(id) = self.moves.resolve(&target.base) else {
            log::warn!("assignment to unresolved `{}` at {}", target.base, s.span);
            self.eval(&s.value, Ctx::Value);
            return;
        };
        let whole = target.is_whole();
        if whole && !mentions(&s.value, &target.base) {
            self.lifetimes.release_held_by(id);
        }
        let value = self.eval(&s.value, Ctx::Value);

        let name = target.to_string();
        if let Some(reason) = self.immutability(id, &target.fields) {
            let binding = self.moves.binding(id);
            let message = match reason {
                Immutable::NotDeclaredMut if whole => {
                    format!("cannot assign twice to immutable variable `{}`", name)
                }
                Immutable::NotDeclaredMut => format!(
                    "cannot assign to `{}`, as `{}` is not declared as mutable",
                    name, binding.name
                ),
                Immutable::BehindSharedRef => {
                    format!("cannot assign to `{}`, which is behind a `&` reference", name)
                }
            };
            let diag = Diagnostic::new(DiagnosticKind::CannotBorrowMut, name.clone(), message, s.span)
                .with_secondary(binding.declared_at);
            self.emit(diag);
        }
        if let Err(d) = self
            .lifetimes
            .check_access(id, &name, &target.fields, Access::Write, s.span)
        {
            self.emit(d);
        }

        if whole {
            self.lifetimes.release_held_by(id);
            self.moves.reinitialize(id, s.span);
        } else if let Err(d) = self.moves.restore_field(id, &target.fields, s.span) {
            self.emit(d);
        }

        if let Some(storage) = self.lifetimes.storage_of(id) {
            for origin in &value.origins {
                let Some(owner) = self.lifetimes.lifetime(*origin).owner else {
                    continue;
                };
                let source = self.moves.binding(owner);
                let diag = Diagnostic::new(
                    DiagnosticKind::LifetimeViolation,
                    source.name.clone(),
                    format!("`{}` does not live long enough", source.name),
                    s.span,
                )
                .with_secondary(source.declared_at);
                self.lifetimes.add_constraint(
                    Constraint::new(
                        ConstraintKind::Outlives {
                            longer: *origin,
                            shorter: storage,
                        },
                        s.span,
                    )
                    .reporting(diag),
                );
            }
        }
        self.bind_value(id, value, whole);
    }

    fn check_return(&mut self, s: &ReturnStmt) {
        let Some(expr) = &s.value else {
            return;
        };
        let Some((caller, ret_region, single)) = self
            .func
            .as_ref()
            .map(|f| (f.caller, f.ret_region, f.returns_single_ref))
        else {
            self.eval(expr, Ctx::Value);
            return;
        };
        let mut value = self.eval(expr, Ctx::Value);
        if let (true, Expr::Borrow { place, .. }) = (single, expr) {
            // `&r` of a reference coerces to a reborrow of `*r`.
            if let Some(id) = self.moves.resolve(&place.base) {
                let (ty, _, _) = self.place_info(id, &place.fields);
                if ty.as_ref().map_or(false, TypeRef::is_ref) {
                    value.origins = self.lifetimes.origins_of(id);
                }
            }
        }
        for origin in &value.origins {
            let origin = *origin;
            let contained = match self.lifetimes.lifetime(origin).owner {
                Some(owner) => {
                    let local = self.moves.binding(owner);
                    Diagnostic::new(
                        DiagnosticKind::DanglingReference,
                        local.name.clone(),
                        format!("cannot return reference to local variable `{}`", local.name),
                        s.span,
                    )
                    .with_secondary(local.declared_at)
                }
                None => Diagnostic::new(
                    DiagnosticKind::DanglingReference,
                    "",
                    "returns a reference to data owned by the current function",
                    s.span,
                ),
            };
            self.lifetimes.add_constraint(
                Constraint::new(
                    ConstraintKind::ScopeContained {
                        lifetime: origin,
                        boundary: caller,
                    },
                    s.span,
                )
                .reporting(contained),
            );

            if let Some(ret) = ret_region {
                if self.lifetimes.is_universal(origin) {
                    let (have, want) = (self.region_name(origin), self.region_name(ret));
                    let diag = Diagnostic::new(
                        DiagnosticKind::LifetimeViolation,
                        have.clone(),
                        format!(
                            "lifetime may not live long enough: returning data with lifetime `{}` where `{}` is required",
                            have, want
                        ),
                        s.span,
                    );
                    self.lifetimes.add_constraint(
                        Constraint::new(
                            ConstraintKind::Outlives {
                                longer: origin,
                                shorter: ret,
                            },
                            s.span,
                        )
                        .reporting(diag),
                    );
                }
            }
        }
    }

    fn region_name(&self, lt: LifetimeId) -> String {
        match &self.lifetimes.lifetime(lt).region {
            Region::Universal { label: Some(l) } => format!("'{}", l),
            Region::Universal { label: None } => "'_".to_string(),
            Region::Local => "'local".to_string(),
        }
    }

    // ── Branches ────────────────────────────────────────────────

    fn capture(&self) -> FlowState {
        FlowState {
            moves: self.moves.capture(),
            borrows: self.lifetimes.snapshot(),
        }
    }

    fn apply(&mut self, state: &FlowState) {
        self.moves.apply(&state.moves);
        self.lifetimes.restore(&state.borrows);
    }

    fn branch_save(&mut self) {
        self.moves.branch_save();
        self.lifetimes.branch_save();
    }

    fn branch_restore(&mut self) {
        self.moves.branch_restore();
        self.lifetimes.branch_restore();
    }

    fn branch_merge(&mut self, arms: &[FlowState]) -> Flow {
        let moves: Vec<StateSnapshot> = arms.iter().map(|a| a.moves.clone()).collect();
        let borrows: Vec<BorrowSnapshot> = arms.iter().map(|a| a.borrows.clone()).collect();
        let reached = self.moves.branch_merge(&moves);
        self.lifetimes.branch_merge(&borrows);
        log::trace!("branch join: {} arm(s) reach it", arms.len());
        if reached {
            Flow::Continue
        } else {
            Flow::Diverge
        }
    }

    fn check_if(&mut self, s: &IfStmt) -> Flow {
        self.in_temporary(|this| {
            this.eval(&s.condition, Ctx::Read);
        });
        self.branch_save();
        let mut reaching = Vec::new();
        if self.check_block(&s.then_body) == Flow::Continue {
            reaching.push(self.capture());
        }
        self.branch_restore();
        match &s.else_body {
            Some(else_body) => {
                if self.check_block(else_body) == Flow::Continue {
                    reaching.push(self.capture());
                }
            }
            None => reaching.push(self.capture()),
        }
        self.branch_merge(&reaching)
    }

    fn check_match(&mut self, s: &MatchStmt) -> Flow {
        // Temporaries of the subject live until the end of the match.
        let temp = self.enter_scope(ScopeKind::Temporary);
        let subject = self.eval(&s.subject, Ctx::Read);
        let subject_place = match &s.subject {
            Expr::Place(p) => Some(p),
            _ => None,
        };

        self.branch_save();
        let mut reaching = Vec::new();
        for (i, arm) in s.arms.iter().enumerate() {
            if i > 0 {
                self.branch_restore();
            }
            let scope = self.enter_scope(ScopeKind::Block);
            let binds_by_value = arm
                .bindings
                .iter()
                .any(|b| self.registry.classify_ref(&b.ty) == MoveSemantics::Move);
            if binds_by_value {
                if let Some(place) = subject_place {
                    self.move_subject(place);
                }
            }
            let mut ref_bindings = Vec::new();
            for b in &arm.bindings {
                let id = self.declare(&b.name, b.ty.clone(), b.mutable, b.span);
                if b.ty.is_ref() {
                    ref_bindings.push((id, b.ty.is_mut_ref()));
                }
            }
            self.bind_arm_refs(subject_place, &subject, &ref_bindings);
            let flow = self.check_block(&arm.body);
            self.exit_scope(scope);
            if flow == Flow::Continue {
                reaching.push(self.capture());
            }
        }
        let flow = self.branch_merge(&reaching);
        self.exit_scope(temp);
        flow
    }

    /// Reference bindings of an arm borrow the subject place. The first one
    /// holds the borrow, the rest share it.
    fn bind_arm_refs(
        &mut self,
        subject_place: Option<&Place>,
        subject: &ValueInfo,
        refs: &[(BindingId, bool)],
    ) {
        let Some(&(first, _)) = refs.first() else {
            return;
        };
        let borrowed = match subject_place {
            Some(place) => self.borrow_subject(place, refs.iter().any(|&(_, m)| m)),
            None => None,
        };
        let Some(value) = borrowed else {
            for &(id, _) in refs {
                self.lifetimes.set_origins(id, subject.origins.clone());
            }
            return;
        };
        self.bind_value(first, value, true);
        let origins = self.lifetimes.origins_of(first);
        for &(id, _) in &refs[1..] {
            let scope = self.moves.binding(id).scope;
            self.lifetimes.share_borrows(first, id, scope);
            self.lifetimes.set_origins(id, origins.clone());
        }
    }

    /// Borrow an owned match subject for by-reference arm bindings. A
    /// subject that is itself a reference, or already failed its read, is
    /// left alone.
    fn borrow_subject(&mut self, place: &Place, mutable: bool) -> Option<ValueInfo> {
        let id = self.moves.resolve(&place.base)?;
        let (ty, _, _) = self.place_info(id, &place.fields);
        if ty.as_ref().map_or(true, TypeRef::is_ref) {
            return None;
        }
        if self.moves.check_use(id, &place.fields, place.span).is_err() {
            return None;
        }
        Some(self.eval_borrow(place, mutable, place.span))
    }

    fn move_subject(&mut self, place: &Place) {
        let Some(id) = self.moves.resolve(&place.base) else {
            return;
        };
        let (_, semantics, behind_ref) = self.place_info(id, &place.fields);
        if semantics == MoveSemantics::Copy {
            return;
        }
        if behind_ref {
            let diag = self.cannot_move_out(id, place);
            self.emit(diag);
        } else {
            self.move_place(id, place, semantics);
        }
    }

    // ── Loops ───────────────────────────────────────────────────

    fn run_loop(&mut self, head: LoopHead<'_>, body: &Block) -> Flow {
        let limit = self.options.loop_pass_limit();
        let entry0 = self.capture();
        let mut entry = entry0.clone();
        let mut breaks = Vec::new();

        for pass in 1..=limit {
            self.apply(&entry);
            self.loops.push(LoopFrame::default());
            let flow = self.loop_pass(&head, body);
            let frame = self.loops.pop().unwrap_or_default();

            let mut ends = vec![entry0.clone()];
            if flow == Flow::Continue {
                ends.push(self.capture());
            }
            ends.extend(frame.continues);
            breaks = frame.breaks;

            let next = FlowState::merge(&ends).unwrap_or_else(|| entry0.clone());
            let stable = next.equivalent(&entry);
            entry = next;
            log::trace!("loop pass {}: entry state {}", pass, if stable { "stable" } else { "changed" });
            if stable {
                break;
            }
        }

        match head {
            LoopHead::Loop => match FlowState::merge(&breaks) {
                Some(after) => {
                    self.apply(&after);
                    Flow::Continue
                }
                None => {
                    self.apply(&entry);
                    Flow::Diverge
                }
            },
            _ => {
                let mut exits = vec![entry];
                exits.extend(breaks);
                if let Some(after) = FlowState::merge(&exits) {
                    self.apply(&after);
                }
                Flow::Continue
            }
        }
    }

    fn loop_pass(&mut self, head: &LoopHead<'_>, body: &Block) -> Flow {
        match head {
            LoopHead::While(cond) => {
                self.in_temporary(|this| {
                    this.eval(cond, Ctx::Read);
                });
                self.check_block(body)
            }
            LoopHead::Loop => self.check_block(body),
            LoopHead::For {
                var,
                ty,
                span,
                origins,
            } => {
                let scope = self.enter_scope(ScopeKind::Block);
                let id = self.declare(var, (*ty).clone(), false, *span);
                if ty.is_ref() {
                    self.lifetimes.set_origins(id, origins.clone());
                }
                let flow = self.check_block(body);
                self.exit_scope(scope);
                flow
            }
        }
    }

    // ── Expressions ─────────────────────────────────────────────

    fn eval(&mut self, expr: &Expr, ctx: Ctx) -> ValueInfo {
        match expr {
            Expr::Literal(..) => ValueInfo::default(),
            Expr::Place(place) => self.eval_place(place, ctx),
            Expr::Borrow {
                mutable,
                place,
                span,
            } => self.eval_borrow(place, *mutable, *span),
            Expr::Call { args, .. } => {
                // Results carry no references: signatures are not consulted.
                for arg in args {
                    self.eval(arg, Ctx::Value);
                }
                ValueInfo::default()
            }
            Expr::Binary { lhs, rhs, .. } => {
                self.eval(lhs, Ctx::Read);
                self.eval(rhs, Ctx::Read);
                ValueInfo::default()
            }
            Expr::StructLit { fields, .. } => {
                let mut value = ValueInfo::default();
                for (_, e) in fields {
                    value.absorb(self.eval(e, Ctx::Value));
                }
                value
            }
        }
    }

    /// Type of the place, its move semantics, and whether it is reached
    /// through a reference.
    fn place_info(&self, id: BindingId, fields: &[String]) -> (Option<TypeRef>, MoveSemantics, bool) {
        let binding = self.moves.binding(id);
        if fields.is_empty() {
            return (Some(binding.ty.clone()), binding.semantics, false);
        }
        let mut ty = Some(&binding.ty);
        let mut behind_ref = false;
        for field in fields {
            let Some(current) = ty else {
                break;
            };
            if current.is_ref() {
                behind_ref = true;
            }
            ty = self.registry.field_type(current, field);
        }
        let semantics = ty
            .map(|t| self.registry.classify_ref(t))
            .unwrap_or(MoveSemantics::Move);
        (ty.cloned(), semantics, behind_ref)
    }

    /// Whether the place may be written or mutably borrowed. The innermost
    /// reference on the path decides; without one, the binding's `mut` does.
    fn immutability(&self, id: BindingId, fields: &[String]) -> Option<Immutable> {
        let binding = self.moves.binding(id);
        let mut ty = Some(&binding.ty);
        let mut through_ref = None;
        for field in fields {
            let Some(current) = ty else {
                break;
            };
            if let TypeRef::Ref { mutable, .. } = current {
                through_ref = Some(*mutable);
            }
            ty = self.registry.field_type(current, field);
        }
        match through_ref {
            Some(true) => None,
            Some(false) => Some(Immutable::BehindSharedRef),
            None if binding.mutable => None,
            None => Some(Immutable::NotDeclaredMut),
        }
    }

    fn eval_place(&mut self, place: &Place, ctx: Ctx) -> ValueInfo {
        let Some(id) = self.moves.resolve(&place.base) else {
            log::warn!("unresolved name `{}` at {}", place.base, place.span);
            return ValueInfo::default();
        };
        let (ty, semantics, behind_ref) = self.place_info(id, &place.fields);
        let moving = ctx == Ctx::Value && semantics != MoveSemantics::Copy;

        let usable = if !moving {
            self.read_place(id, place)
        } else if behind_ref {
            let diag = self.cannot_move_out(id, place);
            self.emit(diag);
            false
        } else {
            self.move_place(id, place, semantics)
        };

        // A value that was already gone carries nothing further.
        let mut value = ValueInfo::default();
        if !usable {
            return value;
        }
        let origins = self.lifetimes.origins_of(id);
        let carries_refs = ty.as_ref().map_or(false, TypeRef::is_ref) || !origins.is_empty();
        if carries_refs {
            value.origins = origins;
            value.carried.push((id, moving && place.is_whole()));
        }
        value
    }

    /// Returns `false` when the place no longer holds a value.
    fn read_place(&mut self, id: BindingId, place: &Place) -> bool {
        if let Err(d) = self.moves.check_use(id, &place.fields, place.span) {
            self.emit(d);
            return false;
        }
        let name = place.to_string();
        if let Err(d) = self
            .lifetimes
            .check_access(id, &name, &place.fields, Access::Read, place.span)
        {
            self.emit(d);
        }
        true
    }

    /// Returns `false` when the place was already moved.
    fn move_place(&mut self, id: BindingId, place: &Place, semantics: MoveSemantics) -> bool {
        if let Err(d) = self
            .moves
            .record_field_move(id, &place.fields, semantics, place.span)
        {
            self.emit(d);
            return false;
        }
        let name = place.to_string();
        if let Err(d) = self
            .lifetimes
            .check_access(id, &name, &place.fields, Access::Move, place.span)
        {
            self.emit(d);
        }
        true
    }

    fn cannot_move_out(&self, id: BindingId, place: &Place) -> Diagnostic {
        let name = place.to_string();
        Diagnostic::new(
            DiagnosticKind::CannotMove,
            name.clone(),
            format!("cannot move out of `{}`, which is behind a reference", name),
            place.span,
        )
        .with_secondary(self.moves.binding(id).declared_at)
    }

    fn eval_borrow(&mut self, place: &Place, mutable: bool, span: Span) -> ValueInfo {
        let Some(id) = self.moves.resolve(&place.base) else {
            log::warn!("unresolved name `{}` at {}", place.base, place.span);
            return ValueInfo::default();
        };
        let name = place.to_string();
        let kind = if mutable {
            DiagnosticKind::CannotBorrowMut
        } else {
            DiagnosticKind::CannotBorrow
        };

        if let Err(moved) = self.moves.check_use(id, &place.fields, span) {
            let what = if moved.kind == DiagnosticKind::PartialMoveConflict {
                "partially moved"
            } else {
                "moved"
            };
            let how = if mutable { "mutable borrow" } else { "borrow" };
            let diag = Diagnostic::new(kind, name.clone(), format!("{} of {} value `{}`", how, what, name), span)
                .with_secondary(moved.secondary.unwrap_or(moved.primary));
            self.emit(diag);
            return ValueInfo::default();
        }

        if mutable {
            if let Some(reason) = self.immutability(id, &place.fields) {
                let binding = self.moves.binding(id);
                let message = match reason {
                    Immutable::NotDeclaredMut => format!(
                        "cannot borrow `{}` as mutable, as `{}` is not declared as mutable",
                        name, binding.name
                    ),
                    Immutable::BehindSharedRef => format!(
                        "cannot borrow `{}` as mutable, as it is behind a `&` reference",
                        name
                    ),
                };
                let diag = Diagnostic::new(kind, name.clone(), message, span)
                    .with_secondary(binding.declared_at);
                self.emit(diag);
                return ValueInfo::default();
            }
        }

        let request = BorrowRequest {
            source: id,
            place: &name,
            path: &place.fields,
            mutable,
            scope: self.current_scope(),
            span,
        };
        match self.lifetimes.create_borrow(request) {
            Ok(borrow) => {
                let (_, _, behind_ref) = self.place_info(id, &place.fields);
                let origins = if behind_ref {
                    self.lifetimes.origins_of(id)
                } else {
                    self.lifetimes.storage_of(id).into_iter().collect()
                };
                ValueInfo {
                    origins,
                    borrows: vec![borrow],
                    carried: Vec::new(),
                }
            }
            Err(d) => {
                self.emit(d);
                ValueInfo::default()
            }
        }
    }
}

/// The expression reads `name` somewhere.
fn mentions(expr: &Expr, name: &str) -> bool {
    match expr {
        Expr::Literal(..) => false,
        Expr::Place(p) | Expr::Borrow { place: p, .. } => p.base == name,
        Expr::Call { args, .. } => args.iter().any(|a| mentions(a, name)),
        Expr::Binary { lhs, rhs, .. } => mentions(lhs, name) || mentions(rhs, name),
        Expr::StructLit { fields, .. } => fields.iter().any(|(_, e)| mentions(e, name)),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
