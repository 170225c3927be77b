//! Scopes, lifetimes, live borrows and lifetime constraints.
//!
//! Scopes form a tree that is entered and exited in stack order. Every
//! binding owns a *storage* lifetime allocated in its declaring scope;
//! signature lifetimes are *universal* and live in the per-function caller
//! frame. Borrows stay in the active registry until their scope (or the
//! scope of the borrowed binding) exits, so conflicts are judged by whether
//! the other borrow is still live, not by where it appears in the source.
//!
//! Constraints are evaluated when the scope of their anchoring lifetime
//! exits, innermost first.

use crate::compiler::moves::BindingId;
use crate::compiler::span::Span;
use crate::diagnostics::{Diagnostic, DiagnosticKind};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

// ── Identifiers ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LifetimeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BorrowId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeKind {
    /// Encloses a function body; owns the signature's lifetimes.
    Caller,
    Function,
    Block,
    /// Statement-local scope holding temporaries.
    Temporary,
}

#[derive(Debug, Clone)]
struct ScopeFrame {
    parent: Option<ScopeId>,
    kind: ScopeKind,
}

// ── Lifetimes ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Region {
    /// Ends when its scope exits.
    Local,
    /// Chosen by the caller; outlives the whole function body.
    Universal { label: Option<String> },
}

#[derive(Debug, Clone)]
pub struct LifetimeInfo {
    pub scope: ScopeId,
    pub region: Region,
    /// Binding whose storage this lifetime describes, if any.
    pub owner: Option<BindingId>,
}

// ── Borrows ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Borrow {
    pub id: BorrowId,
    /// Binding that holds the reference. `None` while it is a temporary.
    pub holder: Option<BindingId>,
    pub source: BindingId,
    /// Display name of the borrowed place (`p.x`).
    pub place: String,
    pub path: Vec<String>,
    pub lifetime: LifetimeId,
    pub mutable: bool,
    pub scope: ScopeId,
    pub span: Span,
}

#[derive(Debug, Clone, Copy)]
pub struct BorrowRequest<'a> {
    pub source: BindingId,
    pub place: &'a str,
    pub path: &'a [String],
    pub mutable: bool,
    pub scope: ScopeId,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Move,
}

/// One path is a prefix of the other.
fn overlaps(a: &[String], b: &[String]) -> bool {
    a.iter().zip(b).all(|(x, y)| x == y)
}

// ── Constraints ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintKind {
    Outlives {
        longer: LifetimeId,
        shorter: LifetimeId,
    },
    Equal(LifetimeId, LifetimeId),
    /// The lifetime may not escape past `boundary`.
    ScopeContained {
        lifetime: LifetimeId,
        boundary: ScopeId,
    },
}

impl ConstraintKind {
    /// The lifetime whose scope exit triggers evaluation.
    fn anchor(&self) -> LifetimeId {
        match self {
            ConstraintKind::Outlives { longer, .. } => *longer,
            ConstraintKind::Equal(a, _) => *a,
            ConstraintKind::ScopeContained { lifetime, .. } => *lifetime,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub span: Span,
    /// Reported if the constraint does not hold.
    pub on_failure: Diagnostic,
}

impl Constraint {
    pub fn new(kind: ConstraintKind, span: Span) -> Self {
        Self {
            kind,
            span,
            on_failure: Diagnostic::new(
                DiagnosticKind::LifetimeViolation,
                "",
                "lifetime constraint is not satisfied",
                span,
            ),
        }
    }

    pub fn reporting(mut self, diag: Diagnostic) -> Self {
        self.on_failure = diag;
        self
    }
}

// ── Snapshots ───────────────────────────────────────────────────────

/// Live borrows and reference origins at one program point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BorrowSnapshot {
    borrows: BTreeMap<BorrowId, Borrow>,
    origins: BTreeMap<BindingId, BTreeSet<LifetimeId>>,
}

impl BorrowSnapshot {
    /// Union of several path states: a borrow live on any path is live.
    pub fn merge<'a>(snapshots: impl IntoIterator<Item = &'a BorrowSnapshot>) -> Option<BorrowSnapshot> {
        let mut iter = snapshots.into_iter();
        let mut merged = iter.next()?.clone();
        for snap in iter {
            for (id, borrow) in &snap.borrows {
                merged.borrows.entry(*id).or_insert_with(|| borrow.clone());
            }
            for (binding, set) in &snap.origins {
                merged
                    .origins
                    .entry(*binding)
                    .or_default()
                    .extend(set.iter().copied());
            }
        }
        Some(merged)
    }

    /// Same origins and the same borrows up to identity. Loop analysis re-creates
    /// borrows with fresh ids on every pass, so ids are ignored.
    pub fn equivalent(&self, other: &BorrowSnapshot) -> bool {
        fn shape(s: &BorrowSnapshot) -> Vec<(BindingId, &[String], bool, Option<BindingId>, Span)> {
            let mut v: Vec<_> = s
                .borrows
                .values()
                .map(|b| (b.source, b.path.as_slice(), b.mutable, b.holder, b.span))
                .collect();
            v.sort();
            v
        }
        self.origins == other.origins && shape(self) == shape(other)
    }
}

// ── Tracker ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct LifetimeTracker {
    scopes: Vec<ScopeFrame>,
    live: Vec<ScopeId>,
    lifetimes: Vec<LifetimeInfo>,
    storage: HashMap<BindingId, LifetimeId>,
    /// `'a: 'b` edges between universal lifetimes.
    bounds: HashMap<LifetimeId, Vec<LifetimeId>>,
    active: BTreeMap<BorrowId, Borrow>,
    next_borrow: u32,
    origins: BTreeMap<BindingId, BTreeSet<LifetimeId>>,
    constraints: Vec<Constraint>,
    branches: Vec<BorrowSnapshot>,
}

impl LifetimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Scopes ──────────────────────────────────────────────────

    pub fn enter_scope(&mut self, kind: ScopeKind) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeFrame {
            parent: self.live.last().copied(),
            kind,
        });
        self.live.push(id);
        log::trace!("enter {:?} scope {}", kind, id.0);
        id
    }

    /// Pop `scope` (and anything still open inside it). Evaluates the
    /// constraints anchored in each popped scope and releases its borrows.
    pub fn exit_scope(&mut self, scope: ScopeId) -> Vec<Diagnostic> {
        let Some(pos) = self.live.iter().rposition(|s| *s == scope) else {
            log::warn!("exit of scope {} which is not open", scope.0);
            return Vec::new();
        };
        let closing: Vec<ScopeId> = self.live.drain(pos..).rev().collect();
        let mut diags = Vec::new();
        for s in closing {
            diags.extend(self.close(s));
        }
        diags
    }

    fn close(&mut self, scope: ScopeId) -> Vec<Diagnostic> {
        let (due, pending): (Vec<Constraint>, Vec<Constraint>) = std::mem::take(&mut self.constraints)
            .into_iter()
            .partition(|c| self.lifetimes[c.kind.anchor().0 as usize].scope == scope);
        self.constraints = pending;

        let diags: Vec<Diagnostic> = due
            .into_iter()
            .rev()
            .filter(|c| !self.satisfied(&c.kind))
            .map(|c| c.on_failure)
            .collect();

        let storage = &self.storage;
        let lifetimes = &self.lifetimes;
        let before = self.active.len();
        self.active.retain(|_, b| {
            let source_scope = storage
                .get(&b.source)
                .map(|lt| lifetimes[lt.0 as usize].scope);
            b.scope != scope && source_scope != Some(scope)
        });
        let kind = self.scopes.get(scope.0 as usize).map(|f| f.kind);
        log::trace!(
            "exit {:?} scope {}: {} borrow(s) released, {} constraint failure(s)",
            kind,
            scope.0,
            before - self.active.len(),
            diags.len()
        );
        diags
    }

    pub fn current_scope(&self) -> Option<ScopeId> {
        self.live.last().copied()
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scopes.get(scope.0 as usize).and_then(|f| f.parent)
    }

    pub fn is_live(&self, scope: ScopeId) -> bool {
        self.live.contains(&scope)
    }

    /// `ancestor` encloses (or is) `scope`.
    pub fn is_ancestor_or_equal(&self, ancestor: ScopeId, scope: ScopeId) -> bool {
        let mut current = Some(scope);
        while let Some(s) = current {
            if s == ancestor {
                return true;
            }
            current = self.parent(s);
        }
        false
    }

    // ── Lifetimes ───────────────────────────────────────────────

    pub fn create_lifetime(&mut self, scope: ScopeId) -> LifetimeId {
        self.alloc(scope, Region::Local, None)
    }

    pub fn create_universal(&mut self, scope: ScopeId, label: Option<&str>) -> LifetimeId {
        self.alloc(
            scope,
            Region::Universal {
                label: label.map(str::to_string),
            },
            None,
        )
    }

    /// Allocate the storage lifetime of a binding declared in `scope`.
    pub fn declare_storage(&mut self, binding: BindingId, scope: ScopeId) -> LifetimeId {
        let lt = self.alloc(scope, Region::Local, Some(binding));
        self.storage.insert(binding, lt);
        lt
    }

    fn alloc(&mut self, scope: ScopeId, region: Region, owner: Option<BindingId>) -> LifetimeId {
        let id = LifetimeId(self.lifetimes.len() as u32);
        self.lifetimes.push(LifetimeInfo {
            scope,
            region,
            owner,
        });
        id
    }

    /// Record `'longer: 'shorter`.
    pub fn declare_bound(&mut self, longer: LifetimeId, shorter: LifetimeId) {
        self.bounds.entry(longer).or_default().push(shorter);
    }

    pub fn lifetime(&self, id: LifetimeId) -> &LifetimeInfo {
        &self.lifetimes[id.0 as usize]
    }

    pub fn storage_of(&self, binding: BindingId) -> Option<LifetimeId> {
        self.storage.get(&binding).copied()
    }

    pub fn is_universal(&self, id: LifetimeId) -> bool {
        matches!(self.lifetime(id).region, Region::Universal { .. })
    }

    // ── Borrows ─────────────────────────────────────────────────

    /// Register a borrow, or report the live borrow it conflicts with.
    pub fn create_borrow(&mut self, req: BorrowRequest<'_>) -> Result<BorrowId, Diagnostic> {
        let conflict = self.active.values().find(|b| {
            b.source == req.source && overlaps(&b.path, req.path) && (req.mutable || b.mutable)
        });
        if let Some(other) = conflict {
            let message = match (req.mutable, other.mutable) {
                (true, true) => format!(
                    "cannot borrow `{}` as mutable more than once at a time",
                    req.place
                ),
                (true, false) => format!(
                    "cannot borrow `{}` as mutable because it is also borrowed as immutable",
                    req.place
                ),
                _ => format!(
                    "cannot borrow `{}` as immutable because it is also borrowed as mutable",
                    req.place
                ),
            };
            return Err(Diagnostic::new(
                DiagnosticKind::ConflictingBorrow,
                req.place,
                message,
                req.span,
            )
            .with_secondary(other.span));
        }

        let id = BorrowId(self.next_borrow);
        self.next_borrow += 1;
        let lifetime = self.create_lifetime(req.scope);
        self.active.insert(
            id,
            Borrow {
                id,
                holder: None,
                source: req.source,
                place: req.place.to_string(),
                path: req.path.to_vec(),
                lifetime,
                mutable: req.mutable,
                scope: req.scope,
                span: req.span,
            },
        );
        log::trace!(
            "borrow {} of `{}` ({}) at {}",
            id.0,
            req.place,
            if req.mutable { "mut" } else { "shared" },
            req.span
        );
        Ok(id)
    }

    /// Whether `access` to the place is compatible with the live borrows.
    pub fn check_access(
        &self,
        source: BindingId,
        place: &str,
        path: &[String],
        access: Access,
        span: Span,
    ) -> Result<(), Diagnostic> {
        let blocking = self.active.values().find(|b| {
            b.source == source
                && overlaps(&b.path, path)
                && (b.mutable || access != Access::Read)
        });
        let Some(other) = blocking else {
            return Ok(());
        };
        let (kind, message) = match access {
            Access::Read => (
                DiagnosticKind::CannotBorrow,
                format!("cannot use `{}` because it was mutably borrowed", place),
            ),
            Access::Write => (
                DiagnosticKind::AssignWhileBorrowed,
                format!("cannot assign to `{}` because it is borrowed", place),
            ),
            Access::Move => (
                DiagnosticKind::MoveWhileBorrowed,
                format!("cannot move out of `{}` because it is borrowed", place),
            ),
        };
        Err(Diagnostic::new(kind, place, message, span).with_secondary(other.span))
    }

    /// Hand a borrow to the binding that stores the reference; it now lives
    /// as long as that binding's scope.
    pub fn attach(&mut self, borrow: BorrowId, holder: BindingId, scope: ScopeId) {
        if let Some(b) = self.active.get_mut(&borrow) {
            b.holder = Some(holder);
            b.scope = scope;
            self.lifetimes[b.lifetime.0 as usize].scope = scope;
        }
    }

    /// Release every borrow held by `holder`. Returns how many were live.
    pub fn release_held_by(&mut self, holder: BindingId) -> usize {
        let before = self.active.len();
        self.active.retain(|_, b| b.holder != Some(holder));
        before - self.active.len()
    }

    /// A shared reference was copied: `to` now holds copies of `from`'s borrows.
    pub fn share_borrows(&mut self, from: BindingId, to: BindingId, scope: ScopeId) {
        let held: Vec<Borrow> = self
            .active
            .values()
            .filter(|b| b.holder == Some(from))
            .cloned()
            .collect();
        for mut b in held {
            let id = BorrowId(self.next_borrow);
            self.next_borrow += 1;
            b.id = id;
            b.holder = Some(to);
            b.scope = scope;
            b.lifetime = self.create_lifetime(scope);
            self.active.insert(id, b);
        }
    }

    /// A mutable reference was moved: its borrows now belong to `to`.
    pub fn transfer_borrows(&mut self, from: BindingId, to: BindingId, scope: ScopeId) {
        for b in self.active.values_mut() {
            if b.holder == Some(from) {
                b.holder = Some(to);
                b.scope = scope;
                self.lifetimes[b.lifetime.0 as usize].scope = scope;
            }
        }
    }

    pub fn has_mutable_borrow(&self, binding: BindingId) -> bool {
        self.active.values().any(|b| b.source == binding && b.mutable)
    }

    pub fn active_borrows_of(&self, binding: BindingId) -> impl Iterator<Item = &Borrow> {
        self.active.values().filter(move |b| b.source == binding)
    }

    pub fn borrow(&self, id: BorrowId) -> Option<&Borrow> {
        self.active.get(&id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    // ── Origins ─────────────────────────────────────────────────

    pub fn set_origins(&mut self, binding: BindingId, origins: BTreeSet<LifetimeId>) {
        if origins.is_empty() {
            self.origins.remove(&binding);
        } else {
            self.origins.insert(binding, origins);
        }
    }

    pub fn add_origins(&mut self, binding: BindingId, origins: &BTreeSet<LifetimeId>) {
        if !origins.is_empty() {
            self.origins
                .entry(binding)
                .or_default()
                .extend(origins.iter().copied());
        }
    }

    /// Storage lifetimes the references in `binding` may point into.
    pub fn origins_of(&self, binding: BindingId) -> BTreeSet<LifetimeId> {
        self.origins.get(&binding).cloned().unwrap_or_default()
    }

    // ── Constraints ─────────────────────────────────────────────

    pub fn add_constraint(&mut self, constraint: Constraint) {
        if !self.constraints.contains(&constraint) {
            self.constraints.push(constraint);
        }
    }

    pub fn pending_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Evaluate every pending constraint without discharging any.
    pub fn check_constraints(&self) -> Vec<Diagnostic> {
        self.constraints
            .iter()
            .rev()
            .filter(|c| !self.satisfied(&c.kind))
            .map(|c| c.on_failure.clone())
            .collect()
    }

    pub fn satisfied(&self, kind: &ConstraintKind) -> bool {
        match kind {
            ConstraintKind::Outlives { longer, shorter } => self.outlives(*longer, *shorter),
            ConstraintKind::Equal(a, b) => self.equal(*a, *b),
            ConstraintKind::ScopeContained { lifetime, boundary } => {
                self.is_ancestor_or_equal(self.lifetime(*lifetime).scope, *boundary)
            }
        }
    }

    pub fn outlives(&self, a: LifetimeId, b: LifetimeId) -> bool {
        if a == b {
            return true;
        }
        let (la, lb) = (self.lifetime(a), self.lifetime(b));
        match (&la.region, &lb.region) {
            (Region::Universal { label: Some(l) }, _) if l == "static" => true,
            (Region::Universal { .. }, Region::Universal { .. }) => self.implied(a, b),
            (Region::Universal { .. }, Region::Local) => true,
            (Region::Local, _) => self.is_ancestor_or_equal(la.scope, lb.scope),
        }
    }

    pub fn equal(&self, a: LifetimeId, b: LifetimeId) -> bool {
        if a == b {
            return true;
        }
        let (la, lb) = (self.lifetime(a), self.lifetime(b));
        match (&la.region, &lb.region) {
            (Region::Universal { .. }, Region::Universal { .. }) => {
                self.implied(a, b) && self.implied(b, a)
            }
            (Region::Local, Region::Local) => la.scope == lb.scope,
            _ => false,
        }
    }

    /// `'a: 'b` follows from the declared bounds.
    fn implied(&self, a: LifetimeId, b: LifetimeId) -> bool {
        let mut stack = vec![a];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if current == b {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(next) = self.bounds.get(&current) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }

    // ── Branches ────────────────────────────────────────────────

    pub fn snapshot(&self) -> BorrowSnapshot {
        BorrowSnapshot {
            borrows: self.active.clone(),
            origins: self.origins.clone(),
        }
    }

    /// Install a snapshot. Borrows whose scope (or borrowed binding) is no
    /// longer open are dropped, as they would have been on the path that
    /// left those scopes.
    pub fn restore(&mut self, snapshot: &BorrowSnapshot) {
        let mut active = snapshot.borrows.clone();
        active.retain(|_, b| {
            let source_live = self
                .storage
                .get(&b.source)
                .map(|lt| self.is_live(self.lifetime(*lt).scope))
                .unwrap_or(true);
            self.is_live(b.scope) && source_live
        });
        self.active = active;
        self.origins = snapshot.origins.clone();
    }

    pub fn branch_save(&mut self) -> usize {
        self.branches.push(self.snapshot());
        self.branches.len()
    }

    pub fn branch_restore(&mut self) {
        if let Some(snapshot) = self.branches.last().cloned() {
            self.restore(&snapshot);
        }
    }

    /// Pop the innermost branch and install the union of the arm states
    /// that reach the join. `false` if no arm does.
    pub fn branch_merge(&mut self, arms: &[BorrowSnapshot]) -> bool {
        let pre = self.branches.pop().unwrap_or_default();
        match BorrowSnapshot::merge(arms) {
            Some(merged) => {
                self.restore(&merged);
                true
            }
            None => {
                self.restore(&pre);
                false
            }
        }
    }
}
