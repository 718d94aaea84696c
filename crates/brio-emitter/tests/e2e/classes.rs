//! Class layout, dispatch, interfaces and instanceof

use crate::support::{build::*, compile, run};
use brio_core::{
    BinOp, ClassDecl, ClassId, Expr, FieldDecl, FunctionDecl, InterfaceDecl, InterfaceId, LValue,
    MethodSig, Program, Stmt, Ty,
};
use brio_emitter::Instr;

fn method(name: &str, ret: Ty, body: Vec<Stmt>) -> FunctionDecl {
    FunctionDecl::new(name, Vec::new(), ret, body)
}

fn ret_int(v: i32) -> Vec<Stmt> {
    vec![Stmt::Return(Some(int(v)))]
}

/// Base/Loud pair: `speak` is overridden, `quiet` is not.
fn speak_classes() -> Vec<ClassDecl> {
    vec![
        ClassDecl {
            name: "Base".into(),
            parent: None,
            implements: Vec::new(),
            fields: Vec::new(),
            methods: vec![
                method("speak", Ty::Number, ret_int(1)),
                method("quiet", Ty::Number, ret_int(7)),
            ],
            ctor: None,
        },
        ClassDecl {
            name: "Loud".into(),
            parent: Some(ClassId(0)),
            implements: Vec::new(),
            fields: Vec::new(),
            methods: vec![method("speak", Ty::Number, ret_int(2))],
            ctor: None,
        },
    ]
}

fn method_call(recv: Expr, name: &str) -> Expr {
    Expr::MethodCall {
        recv: Box::new(recv),
        method: name.to_string(),
        args: Vec::new(),
    }
}

#[test]
fn test_virtual_dispatch_through_base_reference() {
    let mut program = program_with_globals(
        1,
        vec![
            // Statically Base, dynamically Loud.
            let_("b", Ty::Class(ClassId(0)), Expr::New {
                class: ClassId(1),
                args: Vec::new(),
            }),
            set_global("g0", method_call(local("b"), "speak")),
        ],
    );
    program.classes = speak_classes();
    let mut interp = run(program);
    assert_eq!(interp.global_int(0), 2);
    interp.shutdown();
    assert_eq!(interp.live_objects(), 0);
}

#[test]
fn test_unoverridden_method_compiles_to_direct_call() {
    let mut program = program_with_globals(
        1,
        vec![
            let_("b", Ty::Class(ClassId(0)), Expr::New {
                class: ClassId(0),
                args: Vec::new(),
            }),
            set_global("g0", method_call(local("b"), "quiet")),
        ],
    );
    program.classes = speak_classes();

    let unit = compile(program.clone());
    let main = unit.functions.iter().find(|f| f.name == "main").unwrap();
    let has_virtual = main
        .code
        .iter()
        .any(|i| matches!(i, Instr::CallVirtual { .. }));
    let has_direct = main.code.iter().any(|i| matches!(i, Instr::Call { .. }));
    assert!(!has_virtual, "quiet is never overridden");
    assert!(has_direct);

    let interp = run(program);
    assert_eq!(interp.global_int(0), 7);
}

#[test]
fn test_overridden_method_compiles_to_vtable_call() {
    let mut program = program_with_globals(
        1,
        vec![
            let_("b", Ty::Class(ClassId(0)), Expr::New {
                class: ClassId(1),
                args: Vec::new(),
            }),
            set_global("g0", method_call(local("b"), "speak")),
        ],
    );
    program.classes = speak_classes();
    let unit = compile(program);
    let main = unit.functions.iter().find(|f| f.name == "main").unwrap();
    assert!(main
        .code
        .iter()
        .any(|i| matches!(i, Instr::CallVirtual { .. })));
}

#[test]
fn test_interface_dispatch() {
    let mut program = program_with_globals(
        1,
        vec![
            let_("g", Ty::Interface(InterfaceId(0)), Expr::New {
                class: ClassId(1),
                args: Vec::new(),
            }),
            set_global("g0", method_call(local("g"), "greet")),
        ],
    );
    program.interfaces.push(InterfaceDecl {
        name: "Greeter".into(),
        methods: vec![MethodSig {
            name: "greet".into(),
            params: Vec::new(),
            ret: Ty::Number,
        }],
    });
    program.classes = vec![
        ClassDecl {
            name: "En".into(),
            parent: None,
            implements: vec![InterfaceId(0)],
            fields: Vec::new(),
            methods: vec![method("greet", Ty::Number, ret_int(1))],
            ctor: None,
        },
        ClassDecl {
            name: "Fr".into(),
            parent: None,
            implements: vec![InterfaceId(0)],
            fields: Vec::new(),
            methods: vec![method("greet", Ty::Number, ret_int(2))],
            ctor: None,
        },
    ];
    let mut interp = run(program);
    assert_eq!(interp.global_int(0), 2);
    interp.shutdown();
    assert_eq!(interp.live_objects(), 0);
}

#[test]
fn test_instanceof_walks_parent_chain() {
    let mut program = program_with_globals(
        3,
        vec![
            let_("d", Ty::Class(ClassId(0)), Expr::New {
                class: ClassId(1),
                args: Vec::new(),
            }),
            set_flag("g0", Expr::InstanceOf {
                expr: Box::new(local("d")),
                class: ClassId(0),
            }),
            set_flag("g1", Expr::InstanceOf {
                expr: Box::new(local("d")),
                class: ClassId(2),
            }),
            // Base is not an instance of the subclass.
            let_("b", Ty::Class(ClassId(0)), Expr::New {
                class: ClassId(0),
                args: Vec::new(),
            }),
            set_flag("g2", Expr::InstanceOf {
                expr: Box::new(local("b")),
                class: ClassId(1),
            }),
        ],
    );
    program.classes = vec![
        ClassDecl {
            name: "Base".into(),
            parent: None,
            implements: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            ctor: None,
        },
        ClassDecl {
            name: "Derived".into(),
            parent: Some(ClassId(0)),
            implements: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            ctor: None,
        },
        ClassDecl {
            name: "Unrelated".into(),
            parent: None,
            implements: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            ctor: None,
        },
    ];
    let interp = run(program);
    assert_eq!(interp.global_int(0), 1);
    assert_eq!(interp.global_int(1), 0);
    assert_eq!(interp.global_int(2), 0);
}

#[test]
fn test_instanceof_is_false_for_null_and_primitives() {
    let mut program = program_with_globals(
        3,
        vec![
            let_("n", Ty::Any, Expr::Null),
            set_flag("g0", Expr::InstanceOf {
                expr: Box::new(local("n")),
                class: ClassId(0),
            }),
            set_flag("g1", Expr::InstanceOf {
                expr: Box::new(int(42)),
                class: ClassId(0),
            }),
            set_flag("g2", Expr::InstanceOf {
                expr: Box::new(Expr::Bool(true)),
                class: ClassId(0),
            }),
        ],
    );
    program.classes = vec![ClassDecl {
        name: "AnyClass".into(),
        parent: None,
        implements: Vec::new(),
        fields: Vec::new(),
        methods: Vec::new(),
        ctor: None,
    }];
    let interp = run(program);
    // Never raises, always false.
    assert_eq!(interp.global_int(0), 0);
    assert_eq!(interp.global_int(1), 0);
    assert_eq!(interp.global_int(2), 0);
}

#[test]
fn test_constructor_initializes_fields() {
    let mut program = program_with_globals(
        1,
        vec![
            let_("p", Ty::Class(ClassId(0)), Expr::New {
                class: ClassId(0),
                args: vec![int(3), int(4)],
            }),
            set_global("g0", method_call(local("p"), "sum")),
        ],
    );
    program.classes = vec![ClassDecl {
        name: "Point".into(),
        parent: None,
        implements: Vec::new(),
        fields: vec![
            FieldDecl {
                name: "x".into(),
                ty: Ty::Number,
            },
            FieldDecl {
                name: "y".into(),
                ty: Ty::Number,
            },
        ],
        methods: vec![method(
            "sum",
            Ty::Number,
            vec![Stmt::Return(Some(Expr::binary(
                BinOp::Add,
                Expr::Field {
                    obj: Box::new(Expr::This),
                    field: "x".into(),
                },
                Expr::Field {
                    obj: Box::new(Expr::This),
                    field: "y".into(),
                },
            )))],
        )],
        ctor: Some(FunctionDecl::new(
            "constructor",
            vec![param("a", Ty::Number), param("b", Ty::Number)],
            Ty::Void,
            vec![
                Stmt::Assign {
                    target: LValue::Field {
                        obj: Expr::This,
                        field: "x".into(),
                    },
                    value: local("a"),
                },
                Stmt::Assign {
                    target: LValue::Field {
                        obj: Expr::This,
                        field: "y".into(),
                    },
                    value: local("b"),
                },
            ],
        )),
    }];
    let mut interp = run(program);
    assert_eq!(interp.global_int(0), 7);
    interp.shutdown();
    assert_eq!(interp.live_objects(), 0);
}

#[test]
fn test_inherited_field_through_subclass() {
    let mut program = program_with_globals(
        1,
        vec![
            let_("d", Ty::Class(ClassId(1)), Expr::New {
                class: ClassId(1),
                args: Vec::new(),
            }),
            Stmt::Assign {
                target: LValue::Field {
                    obj: local("d"),
                    field: "name".into(),
                },
                value: string("rex"),
            },
            set_flag(
                "g0",
                Expr::binary(BinOp::Eq, method_call(local("d"), "label"), string("rex")),
            ),
        ],
    );
    program.classes = vec![
        ClassDecl {
            name: "Animal".into(),
            parent: None,
            implements: Vec::new(),
            fields: vec![FieldDecl {
                name: "name".into(),
                ty: Ty::String,
            }],
            methods: Vec::new(),
            ctor: None,
        },
        ClassDecl {
            name: "Dog".into(),
            parent: Some(ClassId(0)),
            implements: Vec::new(),
            fields: vec![FieldDecl {
                name: "tag".into(),
                ty: Ty::Number,
            }],
            methods: vec![method(
                "label",
                Ty::String,
                vec![Stmt::Return(Some(Expr::Field {
                    obj: Box::new(Expr::This),
                    field: "name".into(),
                }))],
            )],
            ctor: None,
        },
    ];
    let mut interp = run(program);
    assert_eq!(interp.global_int(0), 1);
    interp.shutdown();
    assert_eq!(interp.live_objects(), 0);
}

/// Plumbing check: arrays of strings with element stores release the
/// replaced value.
#[test]
fn test_array_elements() {
    let program = {
        let mut p = Program::default();
        p.globals.push(global("g0", Ty::Number));
        p.functions.push(FunctionDecl::new(
            "main",
            Vec::new(),
            Ty::Void,
            vec![
                let_(
                    "arr",
                    Ty::Array(Box::new(Ty::String)),
                    Expr::ArrayLit {
                        elem_ty: Ty::String,
                        elems: vec![string("a"), string("b")],
                    },
                ),
                Stmt::Assign {
                    target: LValue::Index {
                        array: local("arr"),
                        index: int(0),
                    },
                    value: string("c"),
                },
                set_flag(
                    "g0",
                    Expr::binary(
                        BinOp::Eq,
                        Expr::Index {
                            array: Box::new(local("arr")),
                            index: Box::new(int(0)),
                        },
                        string("c"),
                    ),
                ),
            ],
        ));
        p
    };
    let mut interp = run(program);
    assert_eq!(interp.global_int(0), 1);
    interp.shutdown();
    assert_eq!(interp.live_objects(), 0);
}
