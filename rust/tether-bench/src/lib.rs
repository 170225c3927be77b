//! Workloads for the borrow checker benchmarks.
//!
//! Everything is built in memory from the deterministic program generator
//! plus a few hand-shaped stress programs, so runs are reproducible without
//! a corpus on disk.

use tether_borrowck::compiler::ast::{Program, Stmt};
use tether_borrowck::compiler::testing_helpers::*;

/// A named program to benchmark.
pub struct Workload {
    pub label: &'static str,
    pub program: Program,
}

impl Workload {
    /// Total statements, nested bodies included. Used as criterion throughput.
    pub fn stmt_count(&self) -> usize {
        self.program
            .functions
            .iter()
            .map(|f| count_stmts(&f.body.stmts))
            .sum()
    }
}

fn count_stmts(stmts: &[Stmt]) -> usize {
    stmts
        .iter()
        .map(|s| {
            1 + match s {
                Stmt::If(s) => {
                    count_stmts(&s.then_body.stmts)
                        + s.else_body.as_ref().map_or(0, |b| count_stmts(&b.stmts))
                }
                Stmt::Match(s) => s.arms.iter().map(|a| count_stmts(&a.body.stmts)).sum(),
                Stmt::While(s) => count_stmts(&s.body.stmts),
                Stmt::Loop(s) => count_stmts(&s.body.stmts),
                Stmt::For(s) => count_stmts(&s.body.stmts),
                Stmt::Block(b) => count_stmts(&b.stmts),
                _ => 0,
            }
        })
        .sum()
}

/// Generated programs of increasing size.
pub fn generated_corpus() -> Vec<Workload> {
    let sizes: [(&'static str, usize, usize); 4] = [
        ("tiny", 4, 6),
        ("small", 16, 8),
        ("medium", 64, 10),
        ("large", 256, 12),
    ];
    sizes
        .iter()
        .map(|&(label, functions, stmts_per_block)| Workload {
            label,
            program: ProgramGen::new(
                0x7E7E_u64 + functions as u64,
                GenConfig {
                    functions,
                    stmts_per_block,
                    ..GenConfig::default()
                },
            )
            .generate(),
        })
        .collect()
}

/// One function: `n` strings, each moved into the next binding.
pub fn move_chain(n: usize) -> Program {
    let mut body = vec![bind("s0", ty("String"), string("seed", 1), 1)];
    for i in 1..=n {
        body.push(bind(
            &format!("s{}", i),
            ty("String"),
            var(&format!("s{}", i - 1), i + 1),
            i + 1,
        ));
    }
    program(vec![main_fn(body)])
}

/// One function: `n` live shared borrows of the same value, then a read.
pub fn borrow_fan(n: usize) -> Program {
    let mut body = vec![bind("x", ty("String"), string("seed", 1), 1)];
    for i in 1..=n {
        body.push(bind(
            &format!("r{}", i),
            ref_ty(ty("String")),
            borrow("x", i + 1),
            i + 1,
        ));
    }
    body.push(inspect("x", n + 2));
    program(vec![main_fn(body)])
}

/// `depth` nested `while` loops around a single move, the worst case for
/// loop re-analysis.
pub fn nested_loops(depth: usize) -> Program {
    let inner_line = depth + 2;
    let mut body = vec![use_var("s", inner_line)];
    for level in (0..depth).rev() {
        body = vec![while_loop(boolean(true, level + 2), body, level + 2)];
    }
    let mut stmts = vec![bind("s", ty("String"), string("seed", 1), 1)];
    stmts.extend(body);
    program(vec![main_fn(stmts)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_borrowck::{analyze, DiagnosticKind};

    #[test]
    fn corpus_spans_small_to_large() {
        let corpus = generated_corpus();
        assert_eq!(corpus.len(), 4);
        let counts: Vec<usize> = corpus.iter().map(Workload::stmt_count).collect();
        assert!(counts[0] < counts[3], "{:?}", counts);
    }

    #[test]
    fn stress_programs_have_expected_outcomes() {
        let registry = sample_registry();
        assert!(analyze(&move_chain(50), &registry).is_ok());
        assert!(analyze(&borrow_fan(50), &registry).is_ok());
        let looped = analyze(&nested_loops(5), &registry);
        assert_eq!(
            count(&looped.diagnostics, DiagnosticKind::UseAfterMove),
            1,
            "{}",
            render(&looped.diagnostics)
        );
    }
}
