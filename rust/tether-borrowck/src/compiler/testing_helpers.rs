//! Tree builders, assertion helpers and a deterministic program generator.
//!
//! The borrow checker consumes an already-typed tree, so tests and benches
//! build that tree directly. Every builder takes the source line it should
//! report diagnostics against.

use crate::compiler::ast::*;
use crate::compiler::borrowck::AnalysisDriver;
use crate::compiler::span::Span;
use crate::compiler::types::{MoveSemantics, RegistryError, TypeRegistry, TypeRegistryBuilder};
use crate::config::AnalysisOptions;
use crate::diagnostics::{Diagnostic, DiagnosticKind};

// ════════════════════════════════════════════════════════════════════
// Types
// ════════════════════════════════════════════════════════════════════

pub fn ty(name: &str) -> TypeRef {
    TypeRef::named(name)
}

pub fn ref_ty(inner: TypeRef) -> TypeRef {
    TypeRef::shared(inner)
}

pub fn mut_ref_ty(inner: TypeRef) -> TypeRef {
    TypeRef::unique(inner)
}

/// Built-ins plus `Point { x: i32, y: i32 }` (Copy), `Person { name: String,
/// age: u32 }`, `Pair { a: String, b: String }`, `Holder { r: &i32 }` and a
/// NonMovable `Pinned`.
pub fn sample_registry() -> TypeRegistry {
    build_sample_registry().unwrap_or_else(|e| {
        log::warn!("sample registry: {}", e);
        TypeRegistry::with_builtins()
    })
}

fn build_sample_registry() -> Result<TypeRegistry, RegistryError> {
    let mut b = TypeRegistryBuilder::new();
    b.register_struct(
        "Point",
        vec![("x".into(), ty("i32")), ("y".into(), ty("i32"))],
        true,
    )?
    .register_struct(
        "Person",
        vec![("name".into(), ty("String")), ("age".into(), ty("u32"))],
        false,
    )?
    .register_struct(
        "Pair",
        vec![("a".into(), ty("String")), ("b".into(), ty("String"))],
        false,
    )?
    .register_struct("Holder", vec![("r".into(), ref_ty(ty("i32")))], false)?
    .register_type("Pinned", MoveSemantics::NonMovable)?;
    Ok(b.build())
}

// ════════════════════════════════════════════════════════════════════
// Expressions
// ════════════════════════════════════════════════════════════════════

pub fn place(base: &str, fields: &[&str], line: usize) -> Place {
    let mut p = Place::var(base, Span::line(line));
    for f in fields {
        p = p.field(*f);
    }
    p
}

pub fn var(name: &str, line: usize) -> Expr {
    Expr::Place(place(name, &[], line))
}

pub fn field(base: &str, fields: &[&str], line: usize) -> Expr {
    Expr::Place(place(base, fields, line))
}

pub fn int(value: i64, line: usize) -> Expr {
    Expr::Literal(Literal::Int(value), Span::line(line))
}

pub fn string(value: &str, line: usize) -> Expr {
    Expr::Literal(Literal::Str(value.to_string()), Span::line(line))
}

pub fn boolean(value: bool, line: usize) -> Expr {
    Expr::Literal(Literal::Bool(value), Span::line(line))
}

pub fn borrow(name: &str, line: usize) -> Expr {
    borrow_place(name, &[], false, line)
}

pub fn borrow_mut(name: &str, line: usize) -> Expr {
    borrow_place(name, &[], true, line)
}

pub fn borrow_place(base: &str, fields: &[&str], mutable: bool, line: usize) -> Expr {
    Expr::Borrow {
        mutable,
        place: place(base, fields, line),
        span: Span::line(line),
    }
}

pub fn call(callee: &str, args: Vec<Expr>, line: usize) -> Expr {
    Expr::Call {
        callee: callee.to_string(),
        args,
        span: Span::line(line),
    }
}

pub fn binary(op: BinOp, lhs: Expr, rhs: Expr, line: usize) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        span: Span::line(line),
    }
}

pub fn struct_lit(name: &str, fields: Vec<(&str, Expr)>, line: usize) -> Expr {
    Expr::StructLit {
        ty: TypeId::from(name),
        fields: fields
            .into_iter()
            .map(|(n, e)| (n.to_string(), e))
            .collect(),
        span: Span::line(line),
    }
}

// ════════════════════════════════════════════════════════════════════
// Statements
// ════════════════════════════════════════════════════════════════════

pub fn bind(name: &str, ty: TypeRef, value: Expr, line: usize) -> Stmt {
    Stmt::Let(LetStmt {
        name: name.to_string(),
        mutable: false,
        ty,
        value,
        span: Span::line(line),
    })
}

pub fn bind_mut(name: &str, ty: TypeRef, value: Expr, line: usize) -> Stmt {
    Stmt::Let(LetStmt {
        name: name.to_string(),
        mutable: true,
        ty,
        value,
        span: Span::line(line),
    })
}

pub fn assign(target: Place, value: Expr, line: usize) -> Stmt {
    Stmt::Assign(AssignStmt {
        target,
        value,
        span: Span::line(line),
    })
}

pub fn expr_stmt(expr: Expr, line: usize) -> Stmt {
    Stmt::Expr(ExprStmt {
        expr,
        span: Span::line(line),
    })
}

/// `use(name);`: passes the value to a call, which moves Move-typed values.
pub fn use_var(name: &str, line: usize) -> Stmt {
    expr_stmt(call("use", vec![var(name, line)], line), line)
}

/// `inspect(&name);`: a temporary shared borrow.
pub fn inspect(name: &str, line: usize) -> Stmt {
    expr_stmt(call("inspect", vec![borrow(name, line)], line), line)
}

pub fn ret(value: Expr, line: usize) -> Stmt {
    Stmt::Return(ReturnStmt {
        value: Some(value),
        span: Span::line(line),
    })
}

pub fn ret_unit(line: usize) -> Stmt {
    Stmt::Return(ReturnStmt {
        value: None,
        span: Span::line(line),
    })
}

pub fn block(stmts: Vec<Stmt>) -> Block {
    let span = stmts.first().map(|s| s.span()).unwrap_or_else(Span::dummy);
    Block::new(stmts, span)
}

pub fn nested(stmts: Vec<Stmt>) -> Stmt {
    Stmt::Block(block(stmts))
}

pub fn if_then(cond: Expr, then_body: Vec<Stmt>, line: usize) -> Stmt {
    Stmt::If(IfStmt {
        condition: cond,
        then_body: block(then_body),
        else_body: None,
        span: Span::line(line),
    })
}

pub fn if_else(cond: Expr, then_body: Vec<Stmt>, else_body: Vec<Stmt>, line: usize) -> Stmt {
    Stmt::If(IfStmt {
        condition: cond,
        then_body: block(then_body),
        else_body: Some(block(else_body)),
        span: Span::line(line),
    })
}

pub fn while_loop(cond: Expr, body: Vec<Stmt>, line: usize) -> Stmt {
    Stmt::While(WhileStmt {
        condition: cond,
        body: block(body),
        span: Span::line(line),
    })
}

pub fn loop_forever(body: Vec<Stmt>, line: usize) -> Stmt {
    Stmt::Loop(LoopStmt {
        body: block(body),
        span: Span::line(line),
    })
}

pub fn for_in(var: &str, var_ty: TypeRef, iter: Expr, body: Vec<Stmt>, line: usize) -> Stmt {
    Stmt::For(ForStmt {
        var: var.to_string(),
        var_ty,
        iter,
        body: block(body),
        span: Span::line(line),
    })
}

pub fn brk(line: usize) -> Stmt {
    Stmt::Break(Span::line(line))
}

pub fn cont(line: usize) -> Stmt {
    Stmt::Continue(Span::line(line))
}

pub fn match_on(subject: Expr, arms: Vec<MatchArm>, line: usize) -> Stmt {
    Stmt::Match(MatchStmt {
        subject,
        arms,
        span: Span::line(line),
    })
}

pub fn arm(bindings: Vec<Param>, body: Vec<Stmt>, line: usize) -> MatchArm {
    MatchArm {
        bindings,
        body: block(body),
        span: Span::line(line),
    }
}

// ════════════════════════════════════════════════════════════════════
// Items
// ════════════════════════════════════════════════════════════════════

pub fn param(name: &str, ty: TypeRef) -> Param {
    Param {
        name: name.to_string(),
        ty,
        mutable: false,
        span: Span::line(1),
    }
}

pub fn mut_param(name: &str, ty: TypeRef) -> Param {
    Param {
        mutable: true,
        ..param(name, ty)
    }
}

pub fn func(name: &str, params: Vec<Param>, return_type: Option<TypeRef>, body: Vec<Stmt>) -> FnDef {
    FnDef {
        name: name.to_string(),
        lifetimes: Vec::new(),
        bounds: Vec::new(),
        params,
        return_type,
        body: block(body),
        span: Span::line(1),
    }
}

/// `func` with declared lifetime parameters and `'longer: 'shorter` bounds.
pub fn generic_func(
    name: &str,
    lifetimes: &[&str],
    bounds: &[(&str, &str)],
    params: Vec<Param>,
    return_type: Option<TypeRef>,
    body: Vec<Stmt>,
) -> FnDef {
    FnDef {
        lifetimes: lifetimes.iter().map(|l| l.to_string()).collect(),
        bounds: bounds
            .iter()
            .map(|(l, s)| LifetimeBound {
                longer: l.to_string(),
                shorter: s.to_string(),
            })
            .collect(),
        ..func(name, params, return_type, body)
    }
}

/// `fn main() { <body> }`
pub fn main_fn(body: Vec<Stmt>) -> FnDef {
    func("main", Vec::new(), None, body)
}

pub fn program(functions: Vec<FnDef>) -> Program {
    Program { functions }
}

// ════════════════════════════════════════════════════════════════════
// Assertions
// ════════════════════════════════════════════════════════════════════

/// Analyse one function against [`sample_registry`] with default options.
pub fn check_fn(f: &FnDef) -> Vec<Diagnostic> {
    check_fn_with(f, &AnalysisOptions::default())
}

pub fn check_fn_with(f: &FnDef, options: &AnalysisOptions) -> Vec<Diagnostic> {
    let registry = sample_registry();
    let mut driver = AnalysisDriver::new(&registry, options);
    driver.analyze_function(f);
    driver.into_diagnostics()
}

pub fn check_body(body: Vec<Stmt>) -> Vec<Diagnostic> {
    check_fn(&main_fn(body))
}

pub fn count(diags: &[Diagnostic], kind: DiagnosticKind) -> usize {
    diags.iter().filter(|d| d.kind == kind).count()
}

pub fn kinds(diags: &[Diagnostic]) -> Vec<DiagnosticKind> {
    diags.iter().map(|d| d.kind).collect()
}

pub fn assert_clean(diags: &[Diagnostic]) {
    assert!(
        diags.is_empty(),
        "expected no diagnostics, got:\n{}",
        render(diags)
    );
}

/// Exactly the given kinds, in order.
pub fn assert_kinds(diags: &[Diagnostic], expected: &[DiagnosticKind]) {
    assert_eq!(
        kinds(diags),
        expected,
        "unexpected diagnostics:\n{}",
        render(diags)
    );
}

pub fn assert_has(diags: &[Diagnostic], pred: impl Fn(&Diagnostic) -> bool) {
    assert!(
        diags.iter().any(pred),
        "expected a matching diagnostic, got:\n{}",
        render(diags)
    );
}

pub fn render(diags: &[Diagnostic]) -> String {
    diags
        .iter()
        .map(|d| format!("  {}", d))
        .collect::<Vec<_>>()
        .join("\n")
}

// ════════════════════════════════════════════════════════════════════
// SimpleRng: deterministic xorshift64 PRNG
// ════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    /// Zero seeds are remapped to avoid the degenerate all-zero state.
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            0x5EED_DEAD_BEEF_CAFE
        } else {
            seed
        };
        SimpleRng { state }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Random usize in `[0, max)`.
    pub fn next_usize(&mut self, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        (self.next_u64() as usize) % max
    }

    pub fn next_bool(&mut self) -> bool {
        self.next_u64() & 1 == 1
    }

    /// `true` with probability `percent`/100.
    pub fn chance(&mut self, percent: usize) -> bool {
        self.next_usize(100) < percent
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            None
        } else {
            Some(&items[self.next_usize(items.len())])
        }
    }
}

// ════════════════════════════════════════════════════════════════════
// Program generator
// ════════════════════════════════════════════════════════════════════

/// Shape of generated programs.
#[derive(Debug, Clone)]
pub struct GenConfig {
    pub functions: usize,
    pub stmts_per_block: usize,
    pub max_depth: usize,
    /// Only Copy values and shared borrows: such programs are always clean.
    pub copy_only: bool,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            functions: 4,
            stmts_per_block: 8,
            max_depth: 3,
            copy_only: false,
        }
    }
}

/// Deterministic random program generator. Same seed, same program.
pub struct ProgramGen {
    rng: SimpleRng,
    config: GenConfig,
    line: usize,
    counter: usize,
    /// Names in scope per block: (name, is_string, is_mut).
    scopes: Vec<Vec<(String, bool, bool)>>,
}

impl ProgramGen {
    pub fn new(seed: u64, config: GenConfig) -> Self {
        Self {
            rng: SimpleRng::new(seed),
            config,
            line: 1,
            counter: 0,
            scopes: Vec::new(),
        }
    }

    pub fn generate(&mut self) -> Program {
        let functions = (0..self.config.functions)
            .map(|i| {
                self.scopes.clear();
                self.line += 1;
                let body = self.gen_block(0);
                func(&format!("f{}", i), Vec::new(), None, body)
            })
            .collect();
        program(functions)
    }

    fn next_line(&mut self) -> usize {
        self.line += 1;
        self.line
    }

    fn fresh(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{}{}", prefix, self.counter)
    }

    fn visible(&self, strings: bool) -> Vec<(String, bool)> {
        self.scopes
            .iter()
            .flatten()
            .filter(|(_, s, _)| *s == strings)
            .map(|(n, _, m)| (n.clone(), *m))
            .collect()
    }

    fn declare(&mut self, name: &str, is_string: bool, is_mut: bool) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((name.to_string(), is_string, is_mut));
        }
    }

    fn gen_block(&mut self, depth: usize) -> Vec<Stmt> {
        self.scopes.push(Vec::new());
        let n = 1 + self.rng.next_usize(self.config.stmts_per_block);
        let stmts = (0..n).map(|_| self.gen_stmt(depth)).collect();
        self.scopes.pop();
        stmts
    }

    fn gen_cond(&mut self, line: usize) -> Expr {
        let ints = self.visible(false);
        match self.rng.pick(&ints).cloned() {
            Some((name, _)) => binary(BinOp::Lt, var(&name, line), int(10, line), line),
            None => boolean(true, line),
        }
    }

    fn gen_stmt(&mut self, depth: usize) -> Stmt {
        let line = self.next_line();
        let roll = self.rng.next_usize(100);
        let nest = depth < self.config.max_depth;
        match roll {
            0..=24 => {
                let name = self.fresh("n");
                let ints = self.visible(false);
                let value = match self.rng.pick(&ints).cloned() {
                    Some((src, _)) if self.rng.next_bool() => var(&src, line),
                    _ => int(self.rng.next_usize(100) as i64, line),
                };
                let is_mut = !self.config.copy_only && self.rng.chance(30);
                self.declare(&name, false, is_mut);
                if is_mut {
                    bind_mut(&name, ty("i32"), value, line)
                } else {
                    bind(&name, ty("i32"), value, line)
                }
            }
            25..=39 if !self.config.copy_only => {
                let name = self.fresh("s");
                let strings = self.visible(true);
                let value = match self.rng.pick(&strings).cloned() {
                    Some((src, _)) if self.rng.chance(40) => var(&src, line),
                    _ => string("text", line),
                };
                self.declare(&name, true, false);
                bind(&name, ty("String"), value, line)
            }
            40..=54 => {
                let strings = !self.config.copy_only && self.rng.next_bool();
                let pool = self.visible(strings);
                let pointee = if strings { "String" } else { "i32" };
                match self.rng.pick(&pool).cloned() {
                    Some((src, is_mut)) => {
                        let name = self.fresh("r");
                        let mutable = is_mut && !self.config.copy_only && self.rng.chance(40);
                        let (t, e) = if mutable {
                            (mut_ref_ty(ty(pointee)), borrow_mut(&src, line))
                        } else {
                            (ref_ty(ty(pointee)), borrow(&src, line))
                        };
                        bind(&name, t, e, line)
                    }
                    None => expr_stmt(int(0, line), line),
                }
            }
            55..=64 => {
                let pool = if self.config.copy_only {
                    self.visible(false)
                } else {
                    self.visible(true)
                };
                match self.rng.pick(&pool).cloned() {
                    Some((src, _)) if self.config.copy_only => inspect(&src, line),
                    Some((src, _)) => use_var(&src, line),
                    None => expr_stmt(int(0, line), line),
                }
            }
            65..=79 if nest => {
                let cond = self.gen_cond(line);
                let then_body = self.gen_block(depth + 1);
                if self.rng.next_bool() {
                    let else_body = self.gen_block(depth + 1);
                    if_else(cond, then_body, else_body, line)
                } else {
                    if_then(cond, then_body, line)
                }
            }
            80..=89 if nest => {
                let cond = self.gen_cond(line);
                let body = self.gen_block(depth + 1);
                while_loop(cond, body, line)
            }
            90..=99 if nest => nested(self.gen_block(depth + 1)),
            _ => {
                let name = self.fresh("c");
                self.declare(&name, false, false);
                bind(&name, ty("i32"), int(1, line), line)
            }
        }
    }
}
