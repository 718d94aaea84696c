//! Switch lowering: fall-through under both dispatch strategies

use crate::support::{build::*, compile, run};
use brio_core::{CaseValue, EnumDecl, EnumMember, Expr, Stmt, SwitchCase};
use brio_emitter::Instr;

fn bump_by(name: &str, amount: i32) -> Stmt {
    set_global(name, add(Expr::Global(name.to_string()), int(amount)))
}

/// A switch whose first arm lacks `break` and falls into the second.
fn switch_body(values: [i64; 3], scrutinee: i32) -> Vec<Stmt> {
    vec![
        set_global("g0", int(0)),
        Stmt::Switch {
            scrutinee: int(scrutinee),
            cases: vec![
                SwitchCase {
                    value: Some(CaseValue::Int(values[0])),
                    // No break: falls through into the next arm.
                    body: vec![bump_by("g0", 1)],
                },
                SwitchCase {
                    value: Some(CaseValue::Int(values[1])),
                    body: vec![bump_by("g0", 10), Stmt::Break],
                },
                SwitchCase {
                    value: Some(CaseValue::Int(values[2])),
                    body: vec![bump_by("g0", 100), Stmt::Break],
                },
                SwitchCase {
                    value: None,
                    body: vec![bump_by("g0", 1000)],
                },
            ],
        },
    ]
}

fn main_uses_jump_table(body: Vec<Stmt>) -> bool {
    let unit = compile(program_with_globals(1, body));
    let main = unit.functions.iter().find(|f| f.name == "main").unwrap();
    main.code
        .iter()
        .any(|i| matches!(i, Instr::JumpTable { .. }))
}

#[test]
fn test_dense_cases_use_a_jump_table() {
    assert!(main_uses_jump_table(switch_body([1, 2, 3], 1)));
}

#[test]
fn test_sparse_cases_use_a_compare_chain() {
    assert!(!main_uses_jump_table(switch_body([1, 50, 900], 1)));
}

#[test]
fn test_fall_through_under_jump_table() {
    // Hitting the first arm runs the second too (no break between them).
    let interp = run(program_with_globals(1, switch_body([1, 2, 3], 1)));
    assert_eq!(interp.global_int(0), 11);
}

#[test]
fn test_fall_through_under_compare_chain() {
    // Identical observable behavior with the other strategy.
    let interp = run(program_with_globals(1, switch_body([1, 50, 900], 1)));
    assert_eq!(interp.global_int(0), 11);
}

#[test]
fn test_break_stops_fall_through() {
    let interp = run(program_with_globals(1, switch_body([1, 2, 3], 2)));
    assert_eq!(interp.global_int(0), 10);
    let interp = run(program_with_globals(1, switch_body([1, 50, 900], 50)));
    assert_eq!(interp.global_int(0), 10);
}

#[test]
fn test_unmatched_value_runs_default() {
    let interp = run(program_with_globals(1, switch_body([1, 2, 3], 42)));
    assert_eq!(interp.global_int(0), 1000);
    let interp = run(program_with_globals(1, switch_body([1, 50, 900], 42)));
    assert_eq!(interp.global_int(0), 1000);
}

#[test]
fn test_switch_over_enum_members() {
    // Member values are allocated at emission; the second member gets 1.
    let mut program = program_with_globals(
        1,
        vec![Stmt::Switch {
            scrutinee: Expr::EnumRef {
                enum_id: brio_core::EnumId(0),
                member: 1,
            },
            cases: vec![
                SwitchCase {
                    value: Some(CaseValue::Enum(brio_core::EnumId(0), 0)),
                    body: vec![set_global("g0", int(1)), Stmt::Break],
                },
                SwitchCase {
                    value: Some(CaseValue::Enum(brio_core::EnumId(0), 1)),
                    body: vec![set_global("g0", int(2)), Stmt::Break],
                },
            ],
        }],
    );
    program.enums.push(EnumDecl {
        name: "Dir".into(),
        is_bitmask: false,
        start: None,
        members: vec![
            EnumMember {
                name: "North".into(),
                value: None,
            },
            EnumMember {
                name: "South".into(),
                value: None,
            },
        ],
    });
    let interp = run(program);
    assert_eq!(interp.global_int(0), 2);
}
