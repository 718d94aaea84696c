//! AST → instruction-stream lowering
//!
//! One pass over the checked program: a registry step reserves function
//! indices for every top-level function, method and constructor (lambdas
//! and background fibers reserve theirs as they are reached), then each
//! body is lowered against its own frame. Generic declarations are lowered
//! exactly once with their type parameters erased to the uniform heap
//! representation.

mod expr;
mod stmt;

use crate::classes::ClassTable;
use crate::enums::EnumTable;
use crate::error::{EmitError, EmitResult};
use crate::frame::{captured_locals, FrameAllocator};
use crate::ir::{ConstantPool, EmitUnit, EmittedFunction, Instr, Label, Loc, ProtectedRegion};
use brio_core::{
    Block, CatchClause, ClassId, FunctionDecl, OwnerKind, Param, Program, Stmt, TargetInfo, Ty,
};
use brio_literals::{encode_tagged, Tagged};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

/// Pending completion routed through a `finally` block.
pub(crate) const MODE_FALL: i32 = 0;
pub(crate) const MODE_RETURN: i32 = 1;
pub(crate) const MODE_BREAK: i32 = 2;
pub(crate) const MODE_CONTINUE: i32 = 3;
pub(crate) const MODE_RETHROW: i32 = 4;

/// An enclosing loop or switch, for `break`/`continue` resolution.
pub(crate) struct LoopCtx {
    pub break_label: Label,
    /// `None` for switches: `continue` skips them.
    pub continue_label: Option<Label>,
    /// Depth of the finally stack at loop entry; a break crossing frames
    /// above this depth must run their finalizers on the way out.
    pub finally_depth: usize,
}

/// Where a routed break/continue eventually lands.
#[derive(Clone, Copy)]
pub(crate) struct RouteTarget {
    pub label: Label,
    pub finally_depth: usize,
}

/// One enclosing `try`/`finally` during lowering.
pub(crate) struct FinallyCtx {
    pub fin_label: Label,
    pub mode_slot: Loc,
    pub pending_slot: Loc,
    pub return_used: bool,
    pub break_route: Option<RouteTarget>,
    pub continue_route: Option<RouteTarget>,
}

/// State for the function currently being lowered.
pub(crate) struct FuncCtx {
    pub name: String,
    pub frame: FrameAllocator,
    pub code: Vec<Instr>,
    pub regions: Vec<ProtectedRegion>,
    next_label: u32,
    pub ret_ty: Ty,
    pub ret_slot: Option<Loc>,
    pub exc_slot: Option<u16>,
    pub epilogue: Label,
    pub loops: Vec<LoopCtx>,
    pub finallys: Vec<FinallyCtx>,
    /// Ordered capture list of a lambda body; `Loc::Captured(i)` addresses
    /// the i-th entry's cell.
    pub captures: Vec<(String, Ty)>,
    pub this_class: Option<ClassId>,
    pub param_count: u16,
    /// Control slots holding counted values (exception, pendings), released
    /// in the epilogue.
    pub counted_control: Vec<u16>,
    /// Pre-reserved (mode, pending) slot pairs, one per try-with-finally,
    /// consumed in lowering order.
    pub finally_slots: VecDeque<(u16, u16)>,
}

impl FuncCtx {
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn emit(&mut self, instr: Instr) {
        self.code.push(instr);
    }

    pub fn bind(&mut self, label: Label) {
        self.code.push(Instr::Label(label));
    }
}

/// Lowers a whole program to an [`EmitUnit`].
pub struct Lowering<'a> {
    pub(crate) program: &'a Program,
    pub(crate) target: &'a TargetInfo,
    pub(crate) enums: EnumTable,
    pub(crate) classes: ClassTable,
    pub(crate) pool: ConstantPool,
    functions: Vec<Option<EmittedFunction>>,
    pub(crate) func_index: FxHashMap<String, u32>,
    pub(crate) func_sigs: Vec<(Vec<Ty>, Ty)>,
    pub(crate) globals: FxHashMap<String, (u16, Ty)>,
}

impl<'a> Lowering<'a> {
    pub fn lower_program(program: &'a Program, target: &'a TargetInfo) -> EmitResult<EmitUnit> {
        let enums = EnumTable::build(program)?;

        // Registry pass: reserve indices for top-level functions, then
        // methods and constructors, so call sites and vtables can refer to
        // bodies before they are lowered.
        let mut func_index = FxHashMap::default();
        let mut func_sigs = Vec::new();
        let mut method_funcs: FxHashMap<(u32, String), u32> = FxHashMap::default();
        let mut next: u32 = 0;
        for decl in &program.functions {
            func_index.insert(decl.name.clone(), next);
            func_sigs.push(signature(decl));
            next += 1;
        }
        for (ci, class) in program.classes.iter().enumerate() {
            for method in &class.methods {
                method_funcs.insert((ci as u32, method.name.clone()), next);
                func_sigs.push(signature(method));
                next += 1;
            }
            if let Some(ctor) = &class.ctor {
                method_funcs.insert((ci as u32, "constructor".to_string()), next);
                func_sigs.push(signature(ctor));
                next += 1;
            }
        }

        let classes = ClassTable::build(program, &method_funcs)?;

        let mut globals = FxHashMap::default();
        for (i, g) in program.globals.iter().enumerate() {
            globals.insert(g.name.clone(), (i as u16, g.ty.erased()));
        }

        let mut lowering = Lowering {
            program,
            target,
            enums,
            classes,
            pool: ConstantPool::new(),
            functions: (0..next).map(|_| None).collect(),
            func_index,
            func_sigs,
            globals,
        };

        let entry = *lowering
            .func_index
            .get("main")
            .ok_or(EmitError::MissingEntry)?;

        for (i, decl) in program.functions.iter().enumerate() {
            let is_entry = i as u32 == entry;
            let lowered = lowering.lower_function(decl, None, &[], is_entry)?;
            lowering.functions[i] = Some(lowered);
        }
        for (ci, class) in program.classes.iter().enumerate() {
            for method in &class.methods {
                let index = method_funcs[&(ci as u32, method.name.clone())] as usize;
                let lowered =
                    lowering.lower_function(method, Some(ClassId(ci as u32)), &[], false)?;
                lowering.functions[index] = Some(lowered);
            }
            if let Some(ctor) = &class.ctor {
                let index = method_funcs[&(ci as u32, "constructor".to_string())] as usize;
                let lowered =
                    lowering.lower_function(ctor, Some(ClassId(ci as u32)), &[], false)?;
                lowering.functions[index] = Some(lowered);
            }
        }

        let functions = lowering
            .functions
            .into_iter()
            .enumerate()
            .map(|(i, f)| {
                f.ok_or_else(|| EmitError::internal(format!("function {} never lowered", i)))
            })
            .collect::<EmitResult<Vec<_>>>()?;

        Ok(EmitUnit {
            functions,
            classes: lowering.classes.layouts().to_vec(),
            constants: lowering.pool,
            global_count: program.globals.len() as u16,
            entry,
        })
    }

    /// Reserve an index for a lambda or fiber body lowered on the fly.
    pub(crate) fn reserve_function(&mut self, params: &[Param], ret: &Ty) -> u32 {
        let index = self.functions.len() as u32;
        self.functions.push(None);
        self.func_sigs
            .push((params.iter().map(|p| p.ty.erased()).collect(), ret.erased()));
        index
    }

    pub(crate) fn finish_function(&mut self, index: u32, func: EmittedFunction) {
        self.functions[index as usize] = Some(func);
    }

    /// Lower one function-like body. `captures` is the ordered outer-local
    /// list for lambda bodies; `this_class` is set for methods and
    /// constructors (whose `this` travels as the leading parameter).
    pub(crate) fn lower_function(
        &mut self,
        decl: &FunctionDecl,
        this_class: Option<ClassId>,
        captures: &[(String, Ty)],
        is_entry: bool,
    ) -> EmitResult<EmittedFunction> {
        let captured = captured_locals(&decl.params, &decl.body);
        let mut frame = FrameAllocator::new(&decl.name, self.target.register_count);

        // Parameters first: `this`, then declared parameters.
        let mut param_count: u16 = 0;
        if let Some(class) = this_class {
            frame.declare_param("this", Ty::Class(class), false)?;
            param_count += 1;
        }
        let mut boxed_params = Vec::new();
        for p in &decl.params {
            let is_captured = captured.contains(&p.name);
            frame.declare_param(&p.name, p.ty.erased(), is_captured)?;
            if is_captured {
                boxed_params.push(p.name.clone());
            }
            param_count += 1;
        }

        // Named locals: every `let` and `catch` binding in the body.
        for (name, ty) in collect_locals(&decl.body) {
            if frame.lookup(&name).is_none() {
                frame.declare_local(&name, ty.erased(), captured.contains(&name))?;
            }
        }

        // Control slots.
        let ret_ty = decl.ret.erased();
        let ret_slot = if ret_ty != Ty::Void {
            Some(Loc::Frame(frame.reserve_slot()?))
        } else {
            None
        };
        let try_count = count_trys(&decl.body);
        let finally_count = count_finallys(&decl.body);
        let exc_slot = if try_count > 0 {
            Some(frame.reserve_slot()?)
        } else {
            None
        };
        let mut finally_slots = VecDeque::new();
        let mut counted_control = Vec::new();
        if let Some(slot) = exc_slot {
            counted_control.push(slot);
        }
        for _ in 0..finally_count {
            let mode = frame.reserve_slot()?;
            let pending = frame.reserve_slot()?;
            counted_control.push(pending);
            finally_slots.push_back((mode, pending));
        }
        frame.begin_temps();

        let mut ctx = FuncCtx {
            name: decl.name.clone(),
            frame,
            code: Vec::new(),
            regions: Vec::new(),
            next_label: 0,
            ret_ty,
            ret_slot,
            exc_slot,
            epilogue: Label(0),
            loops: Vec::new(),
            finallys: Vec::new(),
            captures: captures.to_vec(),
            this_class,
            param_count,
            counted_control,
            finally_slots,
        };
        ctx.epilogue = ctx.new_label();

        // Prologue: box captured parameters into cells.
        for name in boxed_params {
            let slot = ctx
                .frame
                .lookup(&name)
                .map(|s| s.loc)
                .ok_or_else(|| EmitError::internal(format!("lost param {}", name)))?;
            let cell = ctx.frame.alloc_temp()?;
            ctx.emit(Instr::NewCell { dst: cell });
            ctx.emit(Instr::StoreCell {
                cell,
                src: slot,
            });
            ctx.emit(Instr::Move {
                dst: slot,
                src: cell,
            });
            ctx.frame.free_temp(cell);
        }

        // The entry function runs global initializers before its own body.
        if is_entry {
            self.lower_global_inits(&mut ctx)?;
        }

        self.lower_block(&mut ctx, &decl.body)?;

        // Fall off the end: route through the epilogue.
        ctx.emit(Instr::Jump {
            target: ctx.epilogue,
        });
        let epilogue = ctx.epilogue;
        ctx.bind(epilogue);
        self.emit_epilogue(&mut ctx);
        let ret_src = ctx.ret_slot;
        ctx.emit(Instr::Ret { src: ret_src });

        Ok(EmittedFunction {
            name: decl.name.clone(),
            param_count: ctx.param_count,
            reg_count: ctx.frame.reg_count(),
            frame_size: ctx.frame.frame_size(),
            temp_base: ctx.frame.temp_base(),
            capture_count: ctx.captures.len() as u16,
            exc_slot: ctx.exc_slot,
            code: ctx.code,
            regions: ctx.regions,
        })
    }

    /// Release every counted value the frame still holds: heap-typed named
    /// locals (a captured local's slot holds its cell, itself counted) and
    /// the counted control slots. Slots are null-initialized and releases
    /// are ownership-guarded, so paths that never assigned a slot are safe.
    fn emit_epilogue(&mut self, ctx: &mut FuncCtx) {
        let mut slots: Vec<(Loc, OwnerKind)> = Vec::new();
        for (_, slot) in ctx.frame.named_slots() {
            if slot.captured || slot.ty.is_heap() {
                let why = if matches!(slot.loc, Loc::Frame(s) if s < ctx.param_count) {
                    OwnerKind::Param
                } else {
                    OwnerKind::Local
                };
                slots.push((slot.loc, why));
            }
        }
        for &slot in &ctx.counted_control {
            slots.push((Loc::Frame(slot), OwnerKind::Local));
        }
        // Deterministic order keeps the emitted stream stable across runs.
        slots.sort_by_key(|(loc, _)| match *loc {
            Loc::Reg(r) => (0u8, r as u16),
            Loc::Frame(s) => (1, s),
            Loc::Captured(c) => (2, c),
        });
        for (loc, why) in slots {
            ctx.emit(Instr::Decr { loc, why });
        }
    }

    fn lower_global_inits(&mut self, ctx: &mut FuncCtx) -> EmitResult<()> {
        for (i, g) in self.program.globals.iter().enumerate() {
            if let Some(init) = g.init.clone() {
                let (value, _) = self.eval(ctx, &init)?;
                ctx.emit(Instr::StoreGlobal {
                    index: i as u16,
                    src: value,
                });
                ctx.frame.free_temp(value);
            }
        }
        Ok(())
    }

    /// Pre-encoded tagged word for an integer constant.
    pub(crate) fn tagged_int(&self, value: i64) -> EmitResult<u32> {
        if !brio_literals::fits_tagged_int(value) {
            return Err(EmitError::encoding(format!(
                "constant {} exceeds the tagged integer range",
                value
            )));
        }
        Ok(encode_tagged(Tagged::Int(value as i32)))
    }

    pub(crate) fn emit_load_int(&self, ctx: &mut FuncCtx, dst: Loc, value: i32) {
        ctx.emit(Instr::LoadTagged {
            dst,
            word: encode_tagged(Tagged::Int(value)),
        });
    }
}

fn signature(decl: &FunctionDecl) -> (Vec<Ty>, Ty) {
    (
        decl.params.iter().map(|p| p.ty.erased()).collect(),
        decl.ret.erased(),
    )
}

/// All `let` and `catch` bindings of a body, with declared types, not
/// descending into nested lambdas (those are separate frames).
fn collect_locals(body: &Block) -> Vec<(String, Ty)> {
    let mut out = Vec::new();
    collect_block(body, &mut out);
    out
}

fn collect_block(block: &Block, out: &mut Vec<(String, Ty)>) {
    for stmt in block {
        match stmt {
            Stmt::Let { name, ty, .. } => out.push((name.clone(), ty.clone())),
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                collect_block(then_branch, out);
                if let Some(b) = else_branch {
                    collect_block(b, out);
                }
            }
            Stmt::While { body, .. } => collect_block(body, out),
            Stmt::Switch { cases, .. } => {
                for case in cases {
                    collect_block(&case.body, out);
                }
            }
            Stmt::Try {
                body,
                catch,
                finally,
            } => {
                collect_block(body, out);
                if let Some(CatchClause { name, body }) = catch {
                    out.push((name.clone(), Ty::Any));
                    collect_block(body, out);
                }
                if let Some(f) = finally {
                    collect_block(f, out);
                }
            }
            Stmt::Block(b) => collect_block(b, out),
            _ => {}
        }
    }
}

fn count_trys(block: &Block) -> usize {
    let mut n = 0;
    walk_trys(block, &mut |_has_finally| n += 1);
    n
}

fn count_finallys(block: &Block) -> usize {
    let mut n = 0;
    walk_trys(block, &mut |has_finally| {
        if has_finally {
            n += 1;
        }
    });
    n
}

fn walk_trys(block: &Block, f: &mut impl FnMut(bool)) {
    for stmt in block {
        match stmt {
            Stmt::Try {
                body,
                catch,
                finally,
            } => {
                f(finally.is_some());
                // A try with both clauses desugars to a catch nested inside
                // a finally, which needs a region of its own.
                if finally.is_some() && catch.is_some() {
                    f(false);
                }
                walk_trys(body, f);
                if let Some(c) = catch {
                    walk_trys(&c.body, f);
                }
                if let Some(fin) = finally {
                    walk_trys(fin, f);
                }
            }
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                walk_trys(then_branch, f);
                if let Some(b) = else_branch {
                    walk_trys(b, f);
                }
            }
            Stmt::While { body, .. } => walk_trys(body, f),
            Stmt::Switch { cases, .. } => {
                for case in cases {
                    walk_trys(&case.body, f);
                }
            }
            Stmt::Block(b) => walk_trys(b, f),
            _ => {}
        }
    }
}
