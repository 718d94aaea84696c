//! Expression lowering
//!
//! `eval` produces each value in a freshly allocated temporary. For heap
//! types the temporary *owns* the value: literals and variable reads pair
//! the borrowed load with an increment, allocations are born owned, and
//! call results arrive owned from the callee. Consumers either transfer
//! that ownership (argument passing, stores, return, throw) or release it
//! with a decrement; `release_temp` is the release-and-free path.

use super::{FuncCtx, Lowering};
use crate::error::{EmitError, EmitResult};
use crate::frame::free_variables;
use crate::ir::{Builtin, FuncRef, Instr, Loc};
use brio_core::{BinOp, Block, ClassId, Expr, FunctionDecl, OwnerKind, Param, Ty, UnOp};
use brio_literals::{encode_tagged, Tagged};

/// Where a name resolves inside the function being lowered.
pub(crate) enum VarPlace {
    /// A local or parameter of this frame.
    Slot { loc: Loc, ty: Ty, captured: bool },
    /// A capture cell of the running closure.
    Capture { index: u16, ty: Ty },
    /// A program-level variable.
    Global { index: u16, ty: Ty },
}

impl<'a> Lowering<'a> {
    pub(crate) fn resolve_var(&self, ctx: &FuncCtx, name: &str) -> EmitResult<VarPlace> {
        if let Some(slot) = ctx.frame.lookup(name) {
            return Ok(VarPlace::Slot {
                loc: slot.loc,
                ty: slot.ty.clone(),
                captured: slot.captured,
            });
        }
        if let Some(index) = ctx.captures.iter().position(|(n, _)| n == name) {
            return Ok(VarPlace::Capture {
                index: index as u16,
                ty: ctx.captures[index].1.clone(),
            });
        }
        if let Some((index, ty)) = self.globals.get(name) {
            return Ok(VarPlace::Global {
                index: *index,
                ty: ty.clone(),
            });
        }
        Err(EmitError::UndefinedVariable {
            name: name.to_string(),
        })
    }

    /// Release an owned temporary and return its slot to the pool.
    pub(crate) fn release_temp(&mut self, ctx: &mut FuncCtx, loc: Loc, ty: &Ty) {
        if ty.is_heap() {
            ctx.emit(Instr::Decr {
                loc,
                why: OwnerKind::Temp,
            });
        }
        ctx.frame.free_temp(loc);
    }

    /// Evaluate an expression into an owned temporary.
    pub(crate) fn eval(&mut self, ctx: &mut FuncCtx, expr: &Expr) -> EmitResult<(Loc, Ty)> {
        match expr {
            Expr::Int(v) => {
                let dst = ctx.frame.alloc_temp()?;
                self.emit_load_int(ctx, dst, *v);
                Ok((dst, Ty::Number))
            }
            Expr::Bool(v) => {
                let dst = ctx.frame.alloc_temp()?;
                ctx.emit(Instr::LoadTagged {
                    dst,
                    word: encode_tagged(Tagged::Bool(*v)),
                });
                Ok((dst, Ty::Bool))
            }
            Expr::Null => {
                let dst = ctx.frame.alloc_temp()?;
                ctx.emit(Instr::LoadTagged {
                    dst,
                    word: encode_tagged(Tagged::Null),
                });
                Ok((dst, Ty::Null))
            }
            Expr::Str(s) => {
                let index = self.pool.add_string(s)?;
                let dst = ctx.frame.alloc_temp()?;
                ctx.emit(Instr::LoadConst { dst, index });
                ctx.emit(Instr::Incr {
                    loc: dst,
                    why: OwnerKind::Temp,
                });
                Ok((dst, Ty::String))
            }
            Expr::Image(lit) => {
                let bytes = brio_literals::encode_image(lit.width, lit.height, lit.bpp, |x, y| {
                    lit.pixels[y as usize * lit.width as usize + x as usize]
                });
                let index = self.pool.add_image(bytes)?;
                let dst = ctx.frame.alloc_temp()?;
                ctx.emit(Instr::LoadConst { dst, index });
                ctx.emit(Instr::Incr {
                    loc: dst,
                    why: OwnerKind::Temp,
                });
                Ok((dst, Ty::Image))
            }
            Expr::Local(name) => self.eval_var(ctx, name),
            Expr::Global(name) => self.eval_var(ctx, name),
            Expr::This => {
                let slot = ctx
                    .frame
                    .lookup("this")
                    .ok_or_else(|| EmitError::UndefinedVariable {
                        name: "this".to_string(),
                    })?;
                let (loc, ty) = (slot.loc, slot.ty.clone());
                let dst = ctx.frame.alloc_temp()?;
                ctx.emit(Instr::Move { dst, src: loc });
                ctx.emit(Instr::Incr {
                    loc: dst,
                    why: OwnerKind::Temp,
                });
                Ok((dst, ty))
            }
            Expr::ArrayLit { elem_ty, elems } => {
                let dst = ctx.frame.alloc_temp()?;
                ctx.emit(Instr::NewArray {
                    dst,
                    len: elems.len() as u16,
                });
                for (i, elem) in elems.iter().enumerate() {
                    let (value, _) = self.eval(ctx, elem)?;
                    let index = ctx.frame.alloc_temp()?;
                    self.emit_load_int(ctx, index, i as i32);
                    ctx.emit(Instr::StoreElem {
                        array: dst,
                        index,
                        src: value,
                    });
                    ctx.frame.free_temp(index);
                    ctx.frame.free_temp(value);
                }
                Ok((dst, Ty::Array(Box::new(elem_ty.erased()))))
            }
            Expr::Index { array, index } => {
                let array_ty = self.type_of(ctx, array)?;
                let elem_ty = match &array_ty {
                    Ty::Array(inner) => inner.as_ref().clone(),
                    Ty::Any => Ty::Any,
                    other => {
                        return Err(EmitError::internal(format!(
                            "indexing a non-array {}",
                            other
                        )))
                    }
                };
                let (arr, _) = self.eval(ctx, array)?;
                let (idx, idx_ty) = self.eval(ctx, index)?;
                let dst = ctx.frame.alloc_temp()?;
                ctx.emit(Instr::LoadElem {
                    dst,
                    array: arr,
                    index: idx,
                });
                if elem_ty.is_heap() {
                    ctx.emit(Instr::Incr {
                        loc: dst,
                        why: OwnerKind::Temp,
                    });
                }
                self.release_temp(ctx, idx, &idx_ty);
                self.release_temp(ctx, arr, &array_ty);
                Ok((dst, elem_ty))
            }
            Expr::Unary { op, operand } => {
                let (src, src_ty) = self.eval(ctx, operand)?;
                let dst = ctx.frame.alloc_temp()?;
                ctx.emit(Instr::Un { op: *op, dst, src });
                self.release_temp(ctx, src, &src_ty);
                let ty = match op {
                    UnOp::Not => Ty::Bool,
                    UnOp::Neg | UnOp::BitNot => Ty::Number,
                };
                Ok((dst, ty))
            }
            Expr::Binary { op, lhs, rhs } => self.eval_binary(ctx, *op, lhs, rhs),
            Expr::Call { func, args, .. } => self.eval_call(ctx, func, args),
            Expr::CallValue { callee, args } => {
                let (closure, closure_ty) = self.eval(ctx, callee)?;
                let arg_locs = self.eval_args(ctx, args)?;
                let dst = ctx.frame.alloc_temp()?;
                ctx.emit(Instr::CallClosure {
                    dst: Some(dst),
                    closure,
                    args: arg_locs.clone(),
                    counted_result: true,
                });
                for loc in arg_locs {
                    ctx.frame.free_temp(loc);
                }
                self.release_temp(ctx, closure, &closure_ty);
                Ok((dst, Ty::Any))
            }
            Expr::MethodCall { recv, method, args } => self.eval_method(ctx, recv, method, args),
            Expr::New { class, args } => self.eval_new(ctx, *class, args),
            Expr::Field { obj, field } => {
                let obj_ty = self.type_of(ctx, obj)?;
                let class = match obj_ty {
                    Ty::Class(c) => c,
                    ref other => {
                        return Err(EmitError::UnknownField {
                            class: other.to_string(),
                            field: field.clone(),
                        })
                    }
                };
                let slot = self
                    .classes
                    .field(class, field)
                    .ok_or_else(|| EmitError::UnknownField {
                        class: self
                            .classes
                            .layout(class)
                            .map(|l| l.name.clone())
                            .unwrap_or_default(),
                        field: field.clone(),
                    })?;
                let (offset, field_ty) = (slot.offset, slot.ty.erased());
                let (objloc, _) = self.eval(ctx, obj)?;
                let dst = ctx.frame.alloc_temp()?;
                ctx.emit(Instr::LoadField {
                    dst,
                    obj: objloc,
                    offset,
                });
                if field_ty.is_heap() {
                    ctx.emit(Instr::Incr {
                        loc: dst,
                        why: OwnerKind::Temp,
                    });
                }
                self.release_temp(ctx, objloc, &obj_ty);
                Ok((dst, field_ty))
            }
            Expr::Lambda { params, ret, body } => {
                let dst = self.lower_closure(ctx, params, ret, body)?;
                Ok((dst, Ty::Function))
            }
            Expr::InstanceOf { expr, class } => {
                let ty = self.type_of(ctx, expr)?;
                let dynamic = matches!(
                    ty,
                    Ty::Class(_) | Ty::Interface(_) | Ty::Any | Ty::Null | Ty::TypeParam(_)
                );
                let (src, src_ty) = self.eval(ctx, expr)?;
                let dst = ctx.frame.alloc_temp()?;
                if dynamic {
                    ctx.emit(Instr::InstanceOf {
                        dst,
                        src,
                        class: *class,
                    });
                } else {
                    // A primitive operand is never an instance; evaluate for
                    // effect and fold the answer.
                    ctx.emit(Instr::LoadTagged {
                        dst,
                        word: encode_tagged(Tagged::Bool(false)),
                    });
                }
                self.release_temp(ctx, src, &src_ty);
                Ok((dst, Ty::Bool))
            }
            Expr::EnumRef { enum_id, member } => {
                let value = self.enums.value(*enum_id, *member).ok_or_else(|| {
                    EmitError::internal(format!("unresolved enum member {}#{}", enum_id, member))
                })?;
                let word = self.tagged_int(value)?;
                let dst = ctx.frame.alloc_temp()?;
                ctx.emit(Instr::LoadTagged { dst, word });
                Ok((dst, Ty::Enum(*enum_id)))
            }
            Expr::Cast { expr, ty } => {
                // Representation-preserving, but the ownership obligation
                // follows the static type the consumer sees.
                let (loc, src_ty) = self.eval(ctx, expr)?;
                let target = ty.erased();
                if target.is_heap() && !src_ty.is_heap() {
                    ctx.emit(Instr::Incr {
                        loc,
                        why: OwnerKind::Temp,
                    });
                } else if !target.is_heap() && src_ty.is_heap() {
                    ctx.emit(Instr::Decr {
                        loc,
                        why: OwnerKind::Temp,
                    });
                }
                Ok((loc, target))
            }
        }
    }

    fn eval_var(&mut self, ctx: &mut FuncCtx, name: &str) -> EmitResult<(Loc, Ty)> {
        let place = self.resolve_var(ctx, name)?;
        let dst = ctx.frame.alloc_temp()?;
        let ty = match place {
            VarPlace::Slot { loc, ty, captured } => {
                if captured {
                    ctx.emit(Instr::LoadCell { dst, cell: loc });
                } else {
                    ctx.emit(Instr::Move { dst, src: loc });
                }
                ty
            }
            VarPlace::Capture { index, ty } => {
                ctx.emit(Instr::LoadCell {
                    dst,
                    cell: Loc::Captured(index),
                });
                ty
            }
            VarPlace::Global { index, ty } => {
                ctx.emit(Instr::LoadGlobal { dst, index });
                ty
            }
        };
        if ty.is_heap() {
            ctx.emit(Instr::Incr {
                loc: dst,
                why: OwnerKind::Temp,
            });
        }
        Ok((dst, ty))
    }

    fn eval_binary(
        &mut self,
        ctx: &mut FuncCtx,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> EmitResult<(Loc, Ty)> {
        // Short-circuit forms evaluate the right side conditionally.
        if matches!(op, BinOp::And | BinOp::Or) {
            let done = ctx.new_label();
            let (lv, lty) = self.eval(ctx, lhs)?;
            let dst = ctx.frame.alloc_temp()?;
            ctx.emit(Instr::Move { dst, src: lv });
            self.release_temp(ctx, lv, &lty);
            ctx.emit(Instr::JumpIf {
                cond: dst,
                if_true: matches!(op, BinOp::Or),
                target: done,
            });
            let (rv, rty) = self.eval(ctx, rhs)?;
            ctx.emit(Instr::Move { dst, src: rv });
            self.release_temp(ctx, rv, &rty);
            ctx.bind(done);
            return Ok((dst, Ty::Bool));
        }

        let lty = self.type_of(ctx, lhs)?;
        let rty = self.type_of(ctx, rhs)?;
        let stringly = lty == Ty::String || rty == Ty::String;

        // String concatenation and equality go through the runtime.
        if stringly && matches!(op, BinOp::Add | BinOp::Eq | BinOp::Ne) {
            let (lv, _) = self.eval(ctx, lhs)?;
            let (rv, _) = self.eval(ctx, rhs)?;
            let dst = ctx.frame.alloc_temp()?;
            let (builtin, counted) = if op == BinOp::Add {
                (Builtin::StringConcat, true)
            } else {
                (Builtin::StringEquals, false)
            };
            ctx.emit(Instr::Call {
                dst: Some(dst),
                func: FuncRef::Builtin(builtin),
                args: vec![lv, rv],
                counted_result: counted,
            });
            ctx.frame.free_temp(lv);
            ctx.frame.free_temp(rv);
            if op == BinOp::Ne {
                ctx.emit(Instr::Un {
                    op: UnOp::Not,
                    dst,
                    src: dst,
                });
            }
            let ty = if op == BinOp::Add { Ty::String } else { Ty::Bool };
            return Ok((dst, ty));
        }

        let (lv, _) = self.eval(ctx, lhs)?;
        let (rv, _) = self.eval(ctx, rhs)?;
        let dst = ctx.frame.alloc_temp()?;
        ctx.emit(Instr::Bin {
            op,
            dst,
            lhs: lv,
            rhs: rv,
        });
        self.release_temp(ctx, lv, &lty);
        self.release_temp(ctx, rv, &rty);
        let ty = match op {
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => Ty::Bool,
            _ => Ty::Number,
        };
        Ok((dst, ty))
    }

    fn eval_args(&mut self, ctx: &mut FuncCtx, args: &[Expr]) -> EmitResult<Vec<Loc>> {
        let mut locs = Vec::with_capacity(args.len());
        for arg in args {
            let (loc, _) = self.eval(ctx, arg)?;
            locs.push(loc);
        }
        Ok(locs)
    }

    fn eval_call(&mut self, ctx: &mut FuncCtx, func: &str, args: &[Expr]) -> EmitResult<(Loc, Ty)> {
        let index = *self
            .func_index
            .get(func)
            .ok_or_else(|| EmitError::UndefinedFunction {
                name: func.to_string(),
            })?;
        let ret = self.func_sigs[index as usize].1.clone();
        let arg_locs = self.eval_args(ctx, args)?;
        let dst = ctx.frame.alloc_temp()?;
        let returns_value = ret != Ty::Void;
        ctx.emit(Instr::Call {
            dst: returns_value.then_some(dst),
            func: FuncRef::Index(index),
            args: arg_locs.clone(),
            counted_result: ret.is_heap(),
        });
        for loc in arg_locs {
            ctx.frame.free_temp(loc);
        }
        if !returns_value {
            // Statement position discards this; keep the slot defined.
            ctx.emit(Instr::LoadTagged {
                dst,
                word: encode_tagged(Tagged::Undefined),
            });
        }
        Ok((dst, ret))
    }

    fn eval_method(
        &mut self,
        ctx: &mut FuncCtx,
        recv: &Expr,
        method: &str,
        args: &[Expr],
    ) -> EmitResult<(Loc, Ty)> {
        let recv_ty = self.type_of(ctx, recv)?;
        let (recv_loc, _) = self.eval(ctx, recv)?;
        let arg_locs = self.eval_args(ctx, args)?;
        let dst = ctx.frame.alloc_temp()?;

        let ret = match &recv_ty {
            Ty::Class(class) => {
                let slot = self
                    .classes
                    .vtable_slot(*class, method)
                    .ok_or_else(|| EmitError::UnknownMethod {
                        class: recv_ty.to_string(),
                        method: method.to_string(),
                    })?;
                let ret = self
                    .classes
                    .method_ret(self.program, *class, method)
                    .map(|t| t.erased())
                    .unwrap_or(Ty::Any);
                if self.classes.overridden_below(*class, method) {
                    // The receiver may be any subclass at runtime; dispatch
                    // through the vtable slot.
                    ctx.emit(Instr::CallVirtual {
                        dst: Some(dst),
                        recv: recv_loc,
                        slot,
                        args: arg_locs.clone(),
                        counted_result: ret.is_heap(),
                    });
                } else {
                    let func = self
                        .classes
                        .layout(*class)
                        .and_then(|l| l.vtable.get(slot as usize))
                        .map(|s| s.func)
                        .ok_or_else(|| EmitError::internal("vtable slot out of range"))?;
                    let mut all_args = vec![recv_loc];
                    all_args.extend(arg_locs.iter().copied());
                    ctx.emit(Instr::Call {
                        dst: Some(dst),
                        func,
                        args: all_args,
                        counted_result: ret.is_heap(),
                    });
                }
                ret
            }
            Ty::Interface(_) | Ty::Any => {
                let member = self.classes.iface_member(method).ok_or_else(|| {
                    EmitError::UnknownMethod {
                        class: recv_ty.to_string(),
                        method: method.to_string(),
                    }
                })?;
                let ret = self.interface_ret(method).unwrap_or(Ty::Any);
                ctx.emit(Instr::CallInterface {
                    dst: Some(dst),
                    recv: recv_loc,
                    member,
                    args: arg_locs.clone(),
                    counted_result: ret.is_heap(),
                });
                ret
            }
            other => {
                return Err(EmitError::UnknownMethod {
                    class: other.to_string(),
                    method: method.to_string(),
                })
            }
        };

        ctx.frame.free_temp(recv_loc);
        for loc in arg_locs {
            ctx.frame.free_temp(loc);
        }
        if ret == Ty::Void {
            ctx.emit(Instr::LoadTagged {
                dst,
                word: encode_tagged(Tagged::Undefined),
            });
        }
        Ok((dst, ret))
    }

    fn eval_new(&mut self, ctx: &mut FuncCtx, class: ClassId, args: &[Expr]) -> EmitResult<(Loc, Ty)> {
        let dst = ctx.frame.alloc_temp()?;
        ctx.emit(Instr::New { dst, class });
        let ctor = self.classes.layout(class).and_then(|l| l.ctor);
        if let Some(ctor) = ctor {
            // The constructor consumes its own `this` reference: ownership
            // of the fresh instance moves to the copy handed to the
            // constructor, and the result temporary takes a count of its
            // own.
            let this_copy = ctx.frame.alloc_temp()?;
            ctx.emit(Instr::Move {
                dst: this_copy,
                src: dst,
            });
            ctx.emit(Instr::Incr {
                loc: dst,
                why: OwnerKind::Temp,
            });
            let mut all_args = vec![this_copy];
            let arg_locs = self.eval_args(ctx, args)?;
            all_args.extend(arg_locs.iter().copied());
            ctx.emit(Instr::Call {
                dst: None,
                func: ctor,
                args: all_args,
                counted_result: false,
            });
            ctx.frame.free_temp(this_copy);
            for loc in arg_locs {
                ctx.frame.free_temp(loc);
            }
        }
        Ok((dst, Ty::Class(class)))
    }

    /// Lower a lambda or background body into its own function, wiring the
    /// capture cells, and build the closure record.
    pub(crate) fn lower_closure(
        &mut self,
        ctx: &mut FuncCtx,
        params: &[Param],
        ret: &Ty,
        body: &Block,
    ) -> EmitResult<Loc> {
        let mut cells = Vec::new();
        let mut capture_tys = Vec::new();
        for name in free_variables(params, body) {
            match self.resolve_var(ctx, &name)? {
                VarPlace::Slot { loc, ty, captured } => {
                    if !captured {
                        return Err(EmitError::internal(format!(
                            "captured local {} was not boxed",
                            name
                        )));
                    }
                    cells.push(loc);
                    capture_tys.push((name, ty));
                }
                VarPlace::Capture { index, ty } => {
                    cells.push(Loc::Captured(index));
                    capture_tys.push((name, ty));
                }
                // Globals are addressed directly, not captured.
                VarPlace::Global { .. } => {}
            }
        }

        let index = self.reserve_function(params, ret);
        let decl = FunctionDecl {
            name: format!("{}$fn{}", ctx.name, index),
            type_params: Vec::new(),
            params: params.to_vec(),
            ret: ret.clone(),
            body: body.to_vec(),
        };
        let lowered = self.lower_function(&decl, None, &capture_tys, false)?;
        self.finish_function(index, lowered);

        // The record takes one reference per captured cell.
        for cell in &cells {
            ctx.emit(Instr::Incr {
                loc: *cell,
                why: OwnerKind::Cell,
            });
        }
        let dst = ctx.frame.alloc_temp()?;
        ctx.emit(Instr::MakeClosure {
            dst,
            func: FuncRef::Index(index),
            cells,
        });
        Ok(dst)
    }

    fn interface_ret(&self, method: &str) -> Option<Ty> {
        self.program
            .interfaces
            .iter()
            .flat_map(|i| i.methods.iter())
            .find(|m| m.name == method)
            .map(|m| m.ret.erased())
    }

    /// Static type of an expression, with generics already erased.
    pub(crate) fn type_of(&self, ctx: &FuncCtx, expr: &Expr) -> EmitResult<Ty> {
        let ty = match expr {
            Expr::Int(_) => Ty::Number,
            Expr::Bool(_) => Ty::Bool,
            Expr::Str(_) => Ty::String,
            Expr::Null => Ty::Null,
            Expr::Image(_) => Ty::Image,
            Expr::Local(name) | Expr::Global(name) => match self.resolve_var(ctx, name)? {
                VarPlace::Slot { ty, .. }
                | VarPlace::Capture { ty, .. }
                | VarPlace::Global { ty, .. } => ty,
            },
            Expr::This => ctx
                .this_class
                .map(Ty::Class)
                .ok_or_else(|| EmitError::UndefinedVariable {
                    name: "this".to_string(),
                })?,
            Expr::ArrayLit { elem_ty, .. } => Ty::Array(Box::new(elem_ty.erased())),
            Expr::Index { array, .. } => match self.type_of(ctx, array)? {
                Ty::Array(inner) => *inner,
                _ => Ty::Any,
            },
            Expr::Unary { op, .. } => match op {
                UnOp::Not => Ty::Bool,
                _ => Ty::Number,
            },
            Expr::Binary { op, lhs, rhs } => match op {
                BinOp::Eq
                | BinOp::Ne
                | BinOp::Lt
                | BinOp::Le
                | BinOp::Gt
                | BinOp::Ge
                | BinOp::And
                | BinOp::Or => Ty::Bool,
                BinOp::Add => {
                    if self.type_of(ctx, lhs)? == Ty::String
                        || self.type_of(ctx, rhs)? == Ty::String
                    {
                        Ty::String
                    } else {
                        Ty::Number
                    }
                }
                _ => Ty::Number,
            },
            Expr::Call { func, .. } => {
                let index =
                    *self
                        .func_index
                        .get(func)
                        .ok_or_else(|| EmitError::UndefinedFunction {
                            name: func.clone(),
                        })?;
                self.func_sigs[index as usize].1.clone()
            }
            Expr::CallValue { .. } => Ty::Any,
            Expr::MethodCall { recv, method, .. } => match self.type_of(ctx, recv)? {
                Ty::Class(class) => self
                    .classes
                    .method_ret(self.program, class, method)
                    .map(|t| t.erased())
                    .unwrap_or(Ty::Any),
                _ => self.interface_ret(method).unwrap_or(Ty::Any),
            },
            Expr::New { class, .. } => Ty::Class(*class),
            Expr::Field { obj, field } => match self.type_of(ctx, obj)? {
                Ty::Class(class) => self
                    .classes
                    .field(class, field)
                    .map(|f| f.ty.erased())
                    .unwrap_or(Ty::Any),
                _ => Ty::Any,
            },
            Expr::Lambda { .. } => Ty::Function,
            Expr::InstanceOf { .. } => Ty::Bool,
            Expr::EnumRef { enum_id, .. } => Ty::Enum(*enum_id),
            Expr::Cast { ty, .. } => ty.erased(),
        };
        Ok(ty)
    }
}
