//! Closures, capture cells and background fibers

use crate::support::{build::*, run};
use brio_core::{Expr, Stmt, Ty};

#[test]
fn test_closure_mutates_captured_local() {
    // let n = 0; let f = () => { n = n + 1 }; f(); f(); g0 = n
    let program = program_with_globals(
        1,
        vec![
            let_("n", Ty::Number, int(0)),
            let_(
                "f",
                Ty::Function,
                lambda(
                    Vec::new(),
                    Ty::Void,
                    vec![assign("n", add(local("n"), int(1)))],
                ),
            ),
            Stmt::Expr(Expr::CallValue {
                callee: Box::new(local("f")),
                args: Vec::new(),
            }),
            Stmt::Expr(Expr::CallValue {
                callee: Box::new(local("f")),
                args: Vec::new(),
            }),
            set_global("g0", local("n")),
        ],
    );
    let mut interp = run(program);
    assert_eq!(interp.global_int(0), 2);
    interp.shutdown();
    assert_eq!(interp.live_objects(), 0);
}

#[test]
fn test_two_closures_share_one_cell() {
    // let n = 10; inc = () => { n = n + 5 }; get = () => n; inc(); g0 = get()
    let program = program_with_globals(
        1,
        vec![
            let_("n", Ty::Number, int(10)),
            let_(
                "inc",
                Ty::Function,
                lambda(
                    Vec::new(),
                    Ty::Void,
                    vec![assign("n", add(local("n"), int(5)))],
                ),
            ),
            let_(
                "get",
                Ty::Function,
                lambda(
                    Vec::new(),
                    Ty::Number,
                    vec![Stmt::Return(Some(local("n")))],
                ),
            ),
            Stmt::Expr(Expr::CallValue {
                callee: Box::new(local("inc")),
                args: Vec::new(),
            }),
            set_global(
                "g0",
                Expr::CallValue {
                    callee: Box::new(local("get")),
                    args: Vec::new(),
                },
            ),
        ],
    );
    let mut interp = run(program);
    assert_eq!(interp.global_int(0), 15);
    interp.shutdown();
    assert_eq!(interp.live_objects(), 0);
}

#[test]
fn test_lambda_mixes_params_and_captures() {
    // let base = 100; let f = (d) => base + d; g0 = f(7)
    let program = program_with_globals(
        1,
        vec![
            let_("base", Ty::Number, int(100)),
            let_(
                "f",
                Ty::Function,
                lambda(
                    vec![param("d", Ty::Number)],
                    Ty::Number,
                    vec![Stmt::Return(Some(add(local("base"), local("d"))))],
                ),
            ),
            set_global(
                "g0",
                Expr::CallValue {
                    callee: Box::new(local("f")),
                    args: vec![int(7)],
                },
            ),
        ],
    );
    let mut interp = run(program);
    assert_eq!(interp.global_int(0), 107);
    interp.shutdown();
    assert_eq!(interp.live_objects(), 0);
}

#[test]
fn test_background_fiber_captures_by_reference() {
    // let x = 1; background { g0 = x }; x = 2
    // The fiber runs after main completes, so a by-reference capture
    // observes the final value, not a snapshot.
    let program = program_with_globals(
        1,
        vec![
            let_("x", Ty::Number, int(1)),
            Stmt::Background(vec![set_global("g0", local("x"))]),
            assign("x", int(2)),
        ],
    );
    let mut interp = run(program);
    assert_eq!(interp.global_int(0), 2);
    interp.shutdown();
    assert_eq!(interp.live_objects(), 0);
}

#[test]
fn test_two_fibers_share_a_cell() {
    // Both fibers bump the same captured counter.
    let program = program_with_globals(
        1,
        vec![
            let_("n", Ty::Number, int(0)),
            Stmt::Background(vec![assign("n", add(local("n"), int(1)))]),
            Stmt::Background(vec![
                assign("n", add(local("n"), int(1))),
                set_global("g0", local("n")),
            ]),
        ],
    );
    let mut interp = run(program);
    assert_eq!(interp.global_int(0), 2);
    interp.shutdown();
    assert_eq!(interp.live_objects(), 0);
}

#[test]
fn test_generic_function_emitted_once() {
    use brio_core::{FunctionDecl, Param, Program};
    let mut program = Program::default();
    program.globals.push(global("g0", Ty::Number));
    program.globals.push(global("g1", Ty::Number));
    program.functions.push(FunctionDecl {
        name: "pick".into(),
        type_params: vec!["T".into()],
        params: vec![
            Param {
                name: "a".into(),
                ty: Ty::TypeParam("T".into()),
            },
            Param {
                name: "b".into(),
                ty: Ty::TypeParam("T".into()),
            },
        ],
        ret: Ty::TypeParam("T".into()),
        body: vec![Stmt::Return(Some(local("b")))],
    });
    program.functions.push(FunctionDecl::new(
        "main",
        Vec::new(),
        Ty::Void,
        vec![
            set_global("g0", call("pick", vec![int(1), int(2)])),
            let_("s", Ty::Any, call("pick", vec![string("x"), string("y")])),
            set_flag(
                "g1",
                Expr::binary(brio_core::BinOp::Eq, local("s"), string("y")),
            ),
        ],
    ));

    // Erasure: one body serves every instantiation.
    let unit = crate::support::compile(program.clone());
    assert_eq!(
        unit.functions.iter().filter(|f| f.name == "pick").count(),
        1
    );

    let mut interp = run(program);
    assert_eq!(interp.global_int(0), 2);
    assert_eq!(interp.global_int(1), 1);
    interp.shutdown();
    assert_eq!(interp.live_objects(), 0);
}
