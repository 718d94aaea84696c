//! Ownership-count balance under early returns, loops, throws and captures
//!
//! The static verifier already ran during `compile`; these tests execute
//! the programs and check the dynamic side: every allocation is released
//! (live count zero after shutdown) and no count ever goes negative (the
//! interpreter panics on double release).

use crate::support::{build::*, run};
use brio_core::{BinOp, CatchClause, Expr, FunctionDecl, Stmt, Ty};

#[test]
fn test_heap_locals_released_on_every_return_path() {
    let mut program = program_with_globals(
        1,
        vec![set_global(
            "g0",
            add(
                call("f", vec![Expr::Bool(true)]),
                call("f", vec![Expr::Bool(false)]),
            ),
        )],
    );
    program.functions.push(FunctionDecl::new(
        "f",
        vec![param("flag", Ty::Bool)],
        Ty::Number,
        vec![
            let_("s", Ty::String, string("hello")),
            Stmt::If {
                cond: local("flag"),
                then_branch: vec![Stmt::Return(Some(int(1)))],
                else_branch: None,
            },
            let_("t", Ty::String, add(local("s"), string("!"))),
            Stmt::Return(Some(int(2))),
        ],
    ));
    let mut interp = run(program);
    assert_eq!(interp.global_int(0), 3);
    interp.shutdown();
    assert_eq!(interp.live_objects(), 0);
}

#[test]
fn test_loop_reassignment_releases_previous_value() {
    // Each concatenation frees the string it replaces.
    let program = program_with_globals(
        1,
        vec![
            let_("s", Ty::String, string("a")),
            let_("i", Ty::Number, int(0)),
            Stmt::While {
                cond: Expr::binary(BinOp::Lt, local("i"), int(5)),
                body: vec![
                    assign("s", add(local("s"), string("b"))),
                    assign("i", add(local("i"), int(1))),
                ],
            },
            set_flag("g0", Expr::binary(BinOp::Eq, local("s"), string("abbbbb"))),
        ],
    );
    let mut interp = run(program);
    assert_eq!(interp.global_int(0), 1);
    interp.shutdown();
    assert_eq!(interp.live_objects(), 0);
}

#[test]
fn test_throw_releases_locals_and_temporaries() {
    let mut program = program_with_globals(
        2,
        vec![Stmt::Try {
            body: vec![set_global("g0", call("g", Vec::new()))],
            catch: Some(CatchClause {
                name: "e".into(),
                body: vec![set_global("g1", int(1))],
            }),
            finally: None,
        }],
    );
    program.functions.push(FunctionDecl::new(
        "g",
        Vec::new(),
        Ty::Number,
        vec![
            let_("s", Ty::String, string("data")),
            // A live owned temporary at the throw site: the concat result
            // is mid-expression when the throw unwinds.
            let_("t", Ty::String, add(local("s"), call("boom", Vec::new()))),
            Stmt::Return(Some(int(0))),
        ],
    ));
    program.functions.push(FunctionDecl::new(
        "boom",
        Vec::new(),
        Ty::String,
        vec![Stmt::Throw(string("E"))],
    ));
    let mut interp = run(program);
    assert_eq!(interp.global_int(1), 1);
    interp.shutdown();
    assert_eq!(interp.live_objects(), 0);
}

#[test]
fn test_capture_cells_released_with_their_holders() {
    let program = program_with_globals(
        1,
        vec![
            let_("n", Ty::Number, int(1)),
            let_(
                "f",
                Ty::Function,
                lambda(
                    Vec::new(),
                    Ty::Number,
                    vec![Stmt::Return(Some(local("n")))],
                ),
            ),
            set_global(
                "g0",
                Expr::CallValue {
                    callee: Box::new(local("f")),
                    args: Vec::new(),
                },
            ),
        ],
    );
    let mut interp = run(program);
    assert_eq!(interp.global_int(0), 1);
    interp.shutdown();
    assert_eq!(interp.live_objects(), 0, "closure record and cell must be freed");
}

#[test]
fn test_string_arguments_transfer_into_callee() {
    let mut program = program_with_globals(
        1,
        vec![set_flag(
            "g0",
            Expr::binary(
                BinOp::Eq,
                call("shout", vec![string("hey")]),
                string("hey!"),
            ),
        )],
    );
    program.functions.push(FunctionDecl::new(
        "shout",
        vec![param("s", Ty::String)],
        Ty::String,
        vec![Stmt::Return(Some(add(local("s"), string("!"))))],
    ));
    let mut interp = run(program);
    assert_eq!(interp.global_int(0), 1);
    interp.shutdown();
    assert_eq!(interp.live_objects(), 0);
}

#[test]
fn test_object_graph_released_recursively() {
    use brio_core::{ClassDecl, ClassId, FieldDecl, LValue};
    let mut program = program_with_globals(
        0,
        vec![
            let_("h", Ty::Class(ClassId(0)), Expr::New {
                class: ClassId(0),
                args: Vec::new(),
            }),
            Stmt::Assign {
                target: LValue::Field {
                    obj: local("h"),
                    field: "label".into(),
                },
                value: string("holder"),
            },
        ],
    );
    program.classes = vec![ClassDecl {
        name: "Holder".into(),
        parent: None,
        implements: Vec::new(),
        fields: vec![FieldDecl {
            name: "label".into(),
            ty: Ty::String,
        }],
        methods: Vec::new(),
        ctor: None,
    }];
    let mut interp = run(program);
    interp.shutdown();
    // Dropping the object releases the string its field owned.
    assert_eq!(interp.live_objects(), 0);
}
