//! Borrow conflicts, reference provenance and signature lifetimes.

use tether_borrowck::compiler::ast::{Expr, FnDef, Place, ReturnStmt, Stmt};
use tether_borrowck::compiler::span::Span;
use tether_borrowck::compiler::testing_helpers::*;
use tether_borrowck::{analyze, Diagnostic, DiagnosticKind};

use DiagnosticKind::*;

fn check(f: FnDef) -> Vec<Diagnostic> {
    tether_borrowck::logging::init_test();
    analyze(&program(vec![f]), &sample_registry()).diagnostics
}

fn check_main(body: Vec<Stmt>) -> Vec<Diagnostic> {
    check(main_fn(body))
}

// ═══════════════════════════════════════════════════════════════════
// Live-range conflicts
// ═══════════════════════════════════════════════════════════════════

#[test]
fn conflict_is_judged_by_liveness_not_order() {
    // The shared borrow at line 2 is still held by `r` when line 4 runs.
    let diags = check_main(vec![
        bind_mut("x", ty("i32"), int(0, 1), 1),
        bind("r", ref_ty(ty("i32")), borrow("x", 2), 2),
        inspect("x", 3),
        expr_stmt(call("bump", vec![borrow_mut("x", 4)], 4), 4),
    ]);
    assert_kinds(&diags, &[ConflictingBorrow]);
    assert_eq!(diags[0].primary.line, 4);
    assert_eq!(diags[0].secondary.map(|s| s.line), Some(2));
}

#[test]
fn sequential_temporary_mutable_borrows_are_clean() {
    assert_clean(&check_main(vec![
        bind_mut("v", ty("Vec"), call("vec", vec![], 1), 1),
        expr_stmt(call("push", vec![borrow_mut("v", 2), int(1, 2)], 2), 2),
        expr_stmt(call("push", vec![borrow_mut("v", 3), int(2, 3)], 3), 3),
        inspect("v", 4),
    ]));
}

#[test]
fn shared_borrow_of_moved_field_owner() {
    let diags = check_main(vec![
        bind(
            "pair",
            ty("Pair"),
            struct_lit("Pair", vec![("a", string("x", 1)), ("b", string("y", 1))], 1),
            1,
        ),
        bind("a", ty("String"), field("pair", &["a"], 2), 2),
        bind("r", ref_ty(ty("Pair")), borrow("pair", 3), 3),
        bind("rb", ref_ty(ty("String")), borrow_place("pair", &["b"], false, 4), 4),
    ]);
    assert_kinds(&diags, &[CannotBorrow]);
    assert_eq!(diags[0].primary.line, 3);
    assert!(diags[0].message.contains("partially moved"), "{}", render(&diags));
}

#[test]
fn moving_field_while_sibling_is_borrowed() {
    assert_clean(&check_main(vec![
        bind(
            "pair",
            ty("Pair"),
            struct_lit("Pair", vec![("a", string("x", 1)), ("b", string("y", 1))], 1),
            1,
        ),
        bind("rb", ref_ty(ty("String")), borrow_place("pair", &["b"], false, 2), 2),
        bind("a", ty("String"), field("pair", &["a"], 3), 3),
        inspect("rb", 4),
    ]));
}

#[test]
fn moving_field_while_it_is_borrowed() {
    let diags = check_main(vec![
        bind(
            "pair",
            ty("Pair"),
            struct_lit("Pair", vec![("a", string("x", 1)), ("b", string("y", 1))], 1),
            1,
        ),
        bind("r", ref_ty(ty("Pair")), borrow("pair", 2), 2),
        bind("a", ty("String"), field("pair", &["a"], 3), 3),
    ]);
    assert_kinds(&diags, &[MoveWhileBorrowed]);
}

#[test]
fn assigning_field_while_whole_is_borrowed() {
    let diags = check_main(vec![
        bind_mut(
            "p",
            ty("Point"),
            struct_lit("Point", vec![("x", int(0, 1)), ("y", int(0, 1))], 1),
            1,
        ),
        bind("r", ref_ty(ty("Point")), borrow("p", 2), 2),
        assign(place("p", &["x"], 3), int(5, 3), 3),
    ]);
    assert_kinds(&diags, &[AssignWhileBorrowed]);
    assert_eq!(diags[0].subject, "p.x");
}

#[test]
fn assign_field_of_immutable_binding() {
    let diags = check_main(vec![
        bind(
            "p",
            ty("Point"),
            struct_lit("Point", vec![("x", int(0, 1)), ("y", int(0, 1))], 1),
            1,
        ),
        assign(place("p", &["x"], 2), int(5, 2), 2),
    ]);
    assert_kinds(&diags, &[CannotBorrowMut]);
    assert!(diags[0].message.contains("not declared as mutable"));
    assert_eq!(diags[0].secondary.map(|s| s.line), Some(1));
}

#[test]
fn assign_through_shared_reference_parameter() {
    let f = func(
        "reset",
        vec![param("p", ref_ty(ty("Point")))],
        None,
        vec![assign(place("p", &["x"], 2), int(0, 2), 2)],
    );
    let diags = check(f);
    assert_kinds(&diags, &[CannotBorrowMut]);
    assert!(diags[0].message.contains("behind a `&` reference"));
}

#[test]
fn mutable_parameter_binding_may_be_reassigned() {
    let f = func(
        "count",
        vec![mut_param("n", ty("i32"))],
        None,
        vec![assign(place("n", &[], 2), int(0, 2), 2)],
    );
    assert_clean(&check(f));
}

#[test]
fn moving_out_of_mutable_reference_parameter() {
    let f = func(
        "steal",
        vec![param("p", mut_ref_ty(ty("Person")))],
        Some(ty("String")),
        vec![ret(field("p", &["name"], 2), 2)],
    );
    assert_kinds(&check(f), &[CannotMove]);
}

// ═══════════════════════════════════════════════════════════════════
// Reference provenance
// ═══════════════════════════════════════════════════════════════════

#[test]
fn copy_of_reference_outliving_its_source_block() {
    let diags = check_main(vec![
        bind_mut("keep", ref_ty(ty("i32")), int(0, 1), 1),
        nested(vec![
            bind("y", ty("i32"), int(1, 3), 3),
            bind("r", ref_ty(ty("i32")), borrow("y", 4), 4),
            assign(place("keep", &[], 5), var("r", 5), 5),
        ]),
    ]);
    assert_kinds(&diags, &[LifetimeViolation]);
    assert_eq!(diags[0].subject, "y");
    assert!(diags[0].message.contains("does not live long enough"));
}

#[test]
fn struct_holding_reference_to_inner_value() {
    let diags = check_main(vec![
        bind_mut("h", ty("Holder"), struct_lit("Holder", vec![("r", int(0, 1))], 1), 1),
        nested(vec![
            bind("y", ty("i32"), int(1, 3), 3),
            assign(
                place("h", &[], 4),
                struct_lit("Holder", vec![("r", borrow("y", 4))], 4),
                4,
            ),
        ]),
    ]);
    assert_kinds(&diags, &[LifetimeViolation]);
}

#[test]
fn field_assignment_of_inner_reference() {
    let diags = check_main(vec![
        bind_mut("h", ty("Holder"), struct_lit("Holder", vec![("r", int(0, 1))], 1), 1),
        nested(vec![
            bind("y", ty("i32"), int(1, 3), 3),
            assign(place("h", &["r"], 4), borrow("y", 4), 4),
        ]),
    ]);
    assert_kinds(&diags, &[LifetimeViolation]);
}

#[test]
fn returning_struct_copied_reference_from_parameter() {
    let f = func(
        "first",
        vec![param("h", ref_ty(ty("Holder")))],
        Some(ref_ty(ty("i32"))),
        vec![ret(field("h", &["r"], 2), 2)],
    );
    assert_clean(&check(f));
}

#[test]
fn returning_reference_through_local_copy_of_local() {
    let f = func(
        "f",
        Vec::new(),
        Some(ref_ty(ty("i32"))),
        vec![
            bind("x", ty("i32"), int(1, 2), 2),
            bind("r", ref_ty(ty("i32")), borrow("x", 3), 3),
            bind("r2", ref_ty(ty("i32")), var("r", 4), 4),
            ret(var("r2", 5), 5),
        ],
    );
    let diags = check(f);
    assert_kinds(&diags, &[DanglingReference]);
    assert_eq!(diags[0].subject, "x");
    assert_eq!(diags[0].primary.line, 5);
}

#[test]
fn returning_owned_value_is_clean() {
    let f = func(
        "make",
        Vec::new(),
        Some(ty("String")),
        vec![bind("s", ty("String"), string("x", 2), 2), ret(var("s", 3), 3)],
    );
    assert_clean(&check(f));
}

#[test]
fn dangling_error_is_suppressed_by_move_error_at_same_site() {
    let f = func(
        "f",
        Vec::new(),
        Some(ref_ty(ty("String"))),
        vec![
            bind("s", ty("String"), string("x", 2), 2),
            use_var("s", 3),
            ret(borrow("s", 4), 4),
        ],
    );
    let diags = check(f);
    assert_kinds(&diags, &[CannotBorrow]);
}

#[test]
fn move_error_on_returned_operand_outranks_dangling_reference() {
    // `return p;` at 5:5 (bytes 40..49); the operand `p` at 5:12 (bytes 47..48).
    let returned = Stmt::Return(ReturnStmt {
        value: Some(Expr::Place(Place {
            base: "p".to_string(),
            fields: Vec::new(),
            span: Span::new(47, 48, 5, 12),
        })),
        span: Span::new(40, 49, 5, 5),
    });
    let f = func(
        "f",
        Vec::new(),
        Some(mut_ref_ty(ty("i32"))),
        vec![
            bind_mut("x", ty("i32"), int(1, 2), 2),
            bind("p", mut_ref_ty(ty("i32")), borrow_mut("x", 3), 3),
            bind("q", mut_ref_ty(ty("i32")), var("p", 4), 4),
            returned,
        ],
    );
    let diags = check(f);
    assert_kinds(&diags, &[UseAfterMove]);
    assert_eq!(diags[0].subject, "p");
    assert_eq!(diags[0].primary.col, 12);
    assert_eq!(diags[0].secondary.map(|s| s.line), Some(4));
}

#[test]
fn returning_by_reference_match_binding_of_local() {
    let f = func(
        "f",
        Vec::new(),
        Some(ref_ty(ty("String"))),
        vec![
            bind("s", ty("String"), string("a", 2), 2),
            match_on(
                var("s", 3),
                vec![arm(
                    vec![param("t", ref_ty(ty("String")))],
                    vec![ret(var("t", 4), 4)],
                    4,
                )],
                3,
            ),
        ],
    );
    let diags = check(f);
    assert_kinds(&diags, &[DanglingReference]);
    assert_eq!(diags[0].subject, "s");
    assert_eq!(diags[0].primary.line, 4);
}

// ═══════════════════════════════════════════════════════════════════
// Signature lifetimes
// ═══════════════════════════════════════════════════════════════════

fn longest(bounds: &[(&str, &str)], returns: &str) -> FnDef {
    generic_func(
        "longest",
        &["a", "b"],
        bounds,
        vec![
            param("x", ref_ty(ty("String")).with_lifetime("a")),
            param("y", ref_ty(ty("String")).with_lifetime("b")),
        ],
        Some(ref_ty(ty("String")).with_lifetime("a")),
        vec![ret(var(returns, 2), 2)],
    )
}

#[test]
fn returning_parameter_with_promised_lifetime() {
    assert_clean(&check(longest(&[], "x")));
}

#[test]
fn returning_parameter_with_unrelated_lifetime() {
    let diags = check(longest(&[], "y"));
    assert_kinds(&diags, &[LifetimeViolation]);
    assert!(diags[0].message.contains("'b"), "{}", render(&diags));
    assert!(diags[0].message.contains("'a"), "{}", render(&diags));
}

#[test]
fn bound_in_the_wrong_direction_does_not_help() {
    assert_kinds(&check(longest(&[("a", "b")], "y")), &[LifetimeViolation]);
}

#[test]
fn transitive_bounds_are_followed() {
    let f = generic_func(
        "pick",
        &["a", "b", "c"],
        &[("c", "b"), ("b", "a")],
        vec![
            param("x", ref_ty(ty("i32")).with_lifetime("a")),
            param("z", ref_ty(ty("i32")).with_lifetime("c")),
        ],
        Some(ref_ty(ty("i32")).with_lifetime("a")),
        vec![ret(var("z", 2), 2)],
    );
    assert_clean(&check(f));
}

#[test]
fn static_reference_may_be_returned_anywhere() {
    let f = generic_func(
        "get",
        &["a"],
        &[],
        vec![
            param("x", ref_ty(ty("i32")).with_lifetime("a")),
            param("g", ref_ty(ty("i32")).with_lifetime("static")),
        ],
        Some(ref_ty(ty("i32")).with_lifetime("a")),
        vec![ret(var("g", 2), 2)],
    );
    assert_clean(&check(f));
}

#[test]
fn elided_return_lifetime_with_one_reference_parameter() {
    let f = func(
        "name",
        vec![param("p", ref_ty(ty("Person"))), param("n", ty("i32"))],
        Some(ref_ty(ty("String"))),
        vec![ret(borrow_place("p", &["name"], false, 2), 2)],
    );
    assert_clean(&check(f));
}

#[test]
fn unelidable_return_lifetime_accepts_any_parameter() {
    let f = func(
        "either",
        vec![param("x", ref_ty(ty("i32"))), param("y", ref_ty(ty("i32")))],
        Some(ref_ty(ty("i32"))),
        vec![if_else(
            boolean(true, 2),
            vec![ret(var("x", 3), 3)],
            vec![ret(var("y", 5), 5)],
            2,
        )],
    );
    assert_clean(&check(f));
}
