//! Typed syntax tree consumed by the borrow checker.
//!
//! The tree arrives already parsed, name-resolved and type-checked: every
//! `let` and parameter carries its resolved [`TypeRef`], and call targets are
//! plain names. Nothing in this module performs inference.

use crate::compiler::span::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Types ───────────────────────────────────────────────────────────

/// Resolved nominal type, keyed by its fully qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub String);

impl TypeId {
    pub fn new(name: impl Into<String>) -> Self {
        TypeId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TypeId {
    fn from(name: &str) -> Self {
        TypeId(name.to_string())
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The type of a binding, as written in its (resolved) annotation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Named(TypeId),
    Ref {
        mutable: bool,
        /// Named lifetime (`'a`), without the leading quote.
        lifetime: Option<String>,
        inner: Box<TypeRef>,
    },
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(TypeId::new(name))
    }

    pub fn shared(inner: TypeRef) -> Self {
        TypeRef::Ref {
            mutable: false,
            lifetime: None,
            inner: Box::new(inner),
        }
    }

    pub fn unique(inner: TypeRef) -> Self {
        TypeRef::Ref {
            mutable: true,
            lifetime: None,
            inner: Box::new(inner),
        }
    }

    /// Attach a lifetime label. No-op on non-reference types.
    pub fn with_lifetime(self, label: impl Into<String>) -> Self {
        match self {
            TypeRef::Ref { mutable, inner, .. } => TypeRef::Ref {
                mutable,
                lifetime: Some(label.into()),
                inner,
            },
            other => other,
        }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, TypeRef::Ref { .. })
    }

    pub fn is_mut_ref(&self) -> bool {
        matches!(self, TypeRef::Ref { mutable: true, .. })
    }

    pub fn lifetime_label(&self) -> Option<&str> {
        match self {
            TypeRef::Ref { lifetime, .. } => lifetime.as_deref(),
            TypeRef::Named(_) => None,
        }
    }

    /// Strip every reference layer.
    pub fn pointee(&self) -> &TypeRef {
        match self {
            TypeRef::Ref { inner, .. } => inner.pointee(),
            named => named,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(id) => write!(f, "{}", id),
            TypeRef::Ref {
                mutable,
                lifetime,
                inner,
            } => {
                f.write_str("&")?;
                if let Some(l) = lifetime {
                    write!(f, "'{} ", l)?;
                }
                if *mutable {
                    f.write_str("mut ")?;
                }
                write!(f, "{}", inner)
            }
        }
    }
}

// ── Items ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<FnDef>,
}

/// `'longer: 'shorter` in a function signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifetimeBound {
    pub longer: String,
    pub shorter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FnDef {
    pub name: String,
    /// Declared lifetime parameters, without quotes.
    pub lifetimes: Vec<String>,
    pub bounds: Vec<LifetimeBound>,
    pub params: Vec<Param>,
    pub return_type: Option<TypeRef>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeRef,
    pub mutable: bool,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>, span: Span) -> Self {
        Self { stmts, span }
    }
}

// ── Statements ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    Let(LetStmt),
    Assign(AssignStmt),
    Expr(ExprStmt),
    Return(ReturnStmt),
    If(IfStmt),
    Match(MatchStmt),
    While(WhileStmt),
    Loop(LoopStmt),
    For(ForStmt),
    Block(Block),
    Break(Span),
    Continue(Span),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Let(s) => s.span,
            Stmt::Assign(s) => s.span,
            Stmt::Expr(s) => s.span,
            Stmt::Return(s) => s.span,
            Stmt::If(s) => s.span,
            Stmt::Match(s) => s.span,
            Stmt::While(s) => s.span,
            Stmt::Loop(s) => s.span,
            Stmt::For(s) => s.span,
            Stmt::Block(b) => b.span,
            Stmt::Break(span) | Stmt::Continue(span) => *span,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LetStmt {
    pub name: String,
    pub mutable: bool,
    pub ty: TypeRef,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignStmt {
    pub target: Place,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExprStmt {
    pub expr: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnStmt {
    pub value: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfStmt {
    pub condition: Expr,
    pub then_body: Block,
    pub else_body: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchStmt {
    pub subject: Expr,
    pub arms: Vec<MatchArm>,
    pub span: Span,
}

/// One arm of a `match`. `bindings` are the names the arm's pattern binds,
/// destructured by value out of the subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchArm {
    pub bindings: Vec<Param>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhileStmt {
    pub condition: Expr,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopStmt {
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForStmt {
    pub var: String,
    pub var_ty: TypeRef,
    pub iter: Expr,
    pub body: Block,
    pub span: Span,
}

// ── Expressions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Unit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// An lvalue path: a local name followed by zero or more field projections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Place {
    pub base: String,
    pub fields: Vec<String>,
    pub span: Span,
}

impl Place {
    pub fn var(base: impl Into<String>, span: Span) -> Self {
        Self {
            base: base.into(),
            fields: Vec::new(),
            span,
        }
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(name.into());
        self
    }

    pub fn is_whole(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)?;
        for field in &self.fields {
            write!(f, ".{}", field)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal, Span),
    Place(Place),
    Borrow {
        mutable: bool,
        place: Place,
        span: Span,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
        span: Span,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
    StructLit {
        ty: TypeId,
        fields: Vec<(String, Expr)>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal(_, span) => *span,
            Expr::Place(p) => p.span,
            Expr::Borrow { span, .. }
            | Expr::Call { span, .. }
            | Expr::Binary { span, .. }
            | Expr::StructLit { span, .. } => *span,
        }
    }
}
