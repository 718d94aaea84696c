//! Statement lowering
//!
//! Control flow compiles against labels resolved later by the backends.
//! `try` blocks become protected regions; a `finally` block is emitted once
//! and every exit path (fall-through, return, break/continue, unwind) is
//! routed through it with a completion mode recorded in a control slot, so
//! the finalizer runs exactly once per traversal and a finalizer that
//! throws replaces the pending completion.

use super::expr::VarPlace;
use super::{
    FinallyCtx, FuncCtx, LoopCtx, Lowering, RouteTarget, MODE_BREAK, MODE_CONTINUE, MODE_FALL,
    MODE_RETHROW, MODE_RETURN,
};
use crate::error::{EmitError, EmitResult};
use crate::ir::{Instr, Label, Loc, ProtectedRegion};
use brio_core::{Block, CaseValue, CatchClause, Expr, LValue, OwnerKind, Stmt, SwitchCase, Ty};

enum Route {
    Return,
    Break(RouteTarget),
    Continue(RouteTarget),
    Rethrow,
}

impl<'a> Lowering<'a> {
    pub(crate) fn lower_block(&mut self, ctx: &mut FuncCtx, block: &Block) -> EmitResult<()> {
        for stmt in block {
            self.lower_stmt(ctx, stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, ctx: &mut FuncCtx, stmt: &Stmt) -> EmitResult<()> {
        match stmt {
            Stmt::Let { name, init, .. } => self.lower_let(ctx, name, init.as_ref()),
            Stmt::Assign { target, value } => self.lower_assign(ctx, target, value),
            Stmt::Expr(expr) => {
                let (loc, ty) = self.eval(ctx, expr)?;
                self.release_temp(ctx, loc, &ty);
                Ok(())
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => self.lower_if(ctx, cond, then_branch, else_branch.as_ref()),
            Stmt::While { cond, body } => self.lower_while(ctx, cond, body),
            Stmt::Break => self.lower_break(ctx),
            Stmt::Continue => self.lower_continue(ctx),
            Stmt::Return(value) => self.lower_return(ctx, value.as_ref()),
            Stmt::Switch { scrutinee, cases } => self.lower_switch(ctx, scrutinee, cases),
            Stmt::Try {
                body,
                catch,
                finally,
            } => self.lower_try(ctx, body, catch.as_ref(), finally.as_ref()),
            Stmt::Throw(expr) => {
                let (loc, _) = self.eval(ctx, expr)?;
                ctx.emit(Instr::Throw { src: loc });
                ctx.frame.free_temp(loc);
                Ok(())
            }
            Stmt::Background(body) => {
                let closure = self.lower_closure(ctx, &[], &Ty::Void, body)?;
                ctx.emit(Instr::Spawn { closure });
                ctx.frame.free_temp(closure);
                Ok(())
            }
            Stmt::Block(block) => self.lower_block(ctx, block),
        }
    }

    fn lower_let(&mut self, ctx: &mut FuncCtx, name: &str, init: Option<&Expr>) -> EmitResult<()> {
        let slot = ctx
            .frame
            .lookup(name)
            .cloned()
            .ok_or_else(|| EmitError::internal(format!("undeclared local {}", name)))?;
        if slot.captured {
            // The local lives in a fresh cell for each execution of the
            // declaration, so each loop iteration captures independently.
            let cell = ctx.frame.alloc_temp()?;
            ctx.emit(Instr::NewCell { dst: cell });
            ctx.emit(Instr::Decr {
                loc: slot.loc,
                why: OwnerKind::Local,
            });
            ctx.emit(Instr::Move {
                dst: slot.loc,
                src: cell,
            });
            ctx.frame.free_temp(cell);
            if let Some(init) = init {
                let (value, _) = self.eval(ctx, init)?;
                ctx.emit(Instr::StoreCell {
                    cell: slot.loc,
                    src: value,
                });
                ctx.frame.free_temp(value);
            }
        } else if let Some(init) = init {
            let (value, _) = self.eval(ctx, init)?;
            if slot.ty.is_heap() {
                ctx.emit(Instr::Decr {
                    loc: slot.loc,
                    why: OwnerKind::Local,
                });
            }
            ctx.emit(Instr::Move {
                dst: slot.loc,
                src: value,
            });
            ctx.frame.free_temp(value);
        }
        Ok(())
    }

    fn lower_assign(&mut self, ctx: &mut FuncCtx, target: &LValue, value: &Expr) -> EmitResult<()> {
        match target {
            LValue::Local(name) | LValue::Global(name) => {
                let (v, _) = self.eval(ctx, value)?;
                match self.resolve_var(ctx, name)? {
                    VarPlace::Slot { loc, ty, captured } => {
                        if captured {
                            self.release_cell_content(ctx, loc, &ty)?;
                            ctx.emit(Instr::StoreCell { cell: loc, src: v });
                        } else {
                            if ty.is_heap() {
                                ctx.emit(Instr::Decr {
                                    loc,
                                    why: OwnerKind::Local,
                                });
                            }
                            ctx.emit(Instr::Move { dst: loc, src: v });
                        }
                    }
                    VarPlace::Capture { index, ty } => {
                        let cell = Loc::Captured(index);
                        self.release_cell_content(ctx, cell, &ty)?;
                        ctx.emit(Instr::StoreCell { cell, src: v });
                    }
                    VarPlace::Global { index, ty } => {
                        if ty.is_heap() {
                            let old = ctx.frame.alloc_temp()?;
                            ctx.emit(Instr::LoadGlobal { dst: old, index });
                            ctx.emit(Instr::Decr {
                                loc: old,
                                why: OwnerKind::Global,
                            });
                            ctx.frame.free_temp(old);
                        }
                        ctx.emit(Instr::StoreGlobal { index, src: v });
                    }
                }
                ctx.frame.free_temp(v);
                Ok(())
            }
            LValue::Field { obj, field } => {
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
                        class: obj_ty.to_string(),
                        field: field.clone(),
                    })?;
                let (offset, field_ty) = (slot.offset, slot.ty.erased());
                let (o, _) = self.eval(ctx, obj)?;
                let (v, _) = self.eval(ctx, value)?;
                if field_ty.is_heap() {
                    let old = ctx.frame.alloc_temp()?;
                    ctx.emit(Instr::LoadField {
                        dst: old,
                        obj: o,
                        offset,
                    });
                    ctx.emit(Instr::Decr {
                        loc: old,
                        why: OwnerKind::Field,
                    });
                    ctx.frame.free_temp(old);
                }
                ctx.emit(Instr::StoreField {
                    obj: o,
                    offset,
                    src: v,
                });
                ctx.frame.free_temp(v);
                self.release_temp(ctx, o, &obj_ty);
                Ok(())
            }
            LValue::Index { array, index } => {
                let array_ty = self.type_of(ctx, array)?;
                let elem_heap = match &array_ty {
                    Ty::Array(inner) => inner.is_heap(),
                    _ => true,
                };
                let (a, _) = self.eval(ctx, array)?;
                let (i, i_ty) = self.eval(ctx, index)?;
                let (v, _) = self.eval(ctx, value)?;
                if elem_heap {
                    let old = ctx.frame.alloc_temp()?;
                    ctx.emit(Instr::LoadElem {
                        dst: old,
                        array: a,
                        index: i,
                    });
                    ctx.emit(Instr::Decr {
                        loc: old,
                        why: OwnerKind::Field,
                    });
                    ctx.frame.free_temp(old);
                }
                ctx.emit(Instr::StoreElem {
                    array: a,
                    index: i,
                    src: v,
                });
                ctx.frame.free_temp(v);
                self.release_temp(ctx, i, &i_ty);
                self.release_temp(ctx, a, &array_ty);
                Ok(())
            }
        }
    }

    /// Release a cell's current content before overwriting it.
    fn release_cell_content(&mut self, ctx: &mut FuncCtx, cell: Loc, ty: &Ty) -> EmitResult<()> {
        if !ty.is_heap() {
            return Ok(());
        }
        let old = ctx.frame.alloc_temp()?;
        ctx.emit(Instr::LoadCell { dst: old, cell });
        ctx.emit(Instr::Decr {
            loc: old,
            why: OwnerKind::Cell,
        });
        ctx.frame.free_temp(old);
        Ok(())
    }

    fn lower_if(
        &mut self,
        ctx: &mut FuncCtx,
        cond: &Expr,
        then_branch: &Block,
        else_branch: Option<&Block>,
    ) -> EmitResult<()> {
        let lend = ctx.new_label();
        let (c, _) = self.eval(ctx, cond)?;
        match else_branch {
            Some(else_branch) => {
                let lelse = ctx.new_label();
                ctx.emit(Instr::JumpIf {
                    cond: c,
                    if_true: false,
                    target: lelse,
                });
                ctx.frame.free_temp(c);
                self.lower_block(ctx, then_branch)?;
                ctx.emit(Instr::Jump { target: lend });
                ctx.bind(lelse);
                self.lower_block(ctx, else_branch)?;
            }
            None => {
                ctx.emit(Instr::JumpIf {
                    cond: c,
                    if_true: false,
                    target: lend,
                });
                ctx.frame.free_temp(c);
                self.lower_block(ctx, then_branch)?;
            }
        }
        ctx.bind(lend);
        Ok(())
    }

    fn lower_while(&mut self, ctx: &mut FuncCtx, cond: &Expr, body: &Block) -> EmitResult<()> {
        let top = ctx.new_label();
        let end = ctx.new_label();
        ctx.bind(top);
        let (c, _) = self.eval(ctx, cond)?;
        ctx.emit(Instr::JumpIf {
            cond: c,
            if_true: false,
            target: end,
        });
        ctx.frame.free_temp(c);
        ctx.loops.push(LoopCtx {
            break_label: end,
            continue_label: Some(top),
            finally_depth: ctx.finallys.len(),
        });
        self.lower_block(ctx, body)?;
        ctx.loops.pop();
        ctx.emit(Instr::Jump { target: top });
        ctx.bind(end);
        Ok(())
    }

    fn lower_break(&mut self, ctx: &mut FuncCtx) -> EmitResult<()> {
        let target = match ctx.loops.last() {
            Some(l) => RouteTarget {
                label: l.break_label,
                finally_depth: l.finally_depth,
            },
            None => return Err(EmitError::InvalidBreak),
        };
        if ctx.finallys.len() > target.finally_depth {
            self.enter_finalizer(ctx, MODE_BREAK, |frame| frame.break_route = Some(target))
        } else {
            ctx.emit(Instr::Jump {
                target: target.label,
            });
            Ok(())
        }
    }

    fn lower_continue(&mut self, ctx: &mut FuncCtx) -> EmitResult<()> {
        let target = ctx
            .loops
            .iter()
            .rev()
            .find_map(|l| {
                l.continue_label.map(|label| RouteTarget {
                    label,
                    finally_depth: l.finally_depth,
                })
            })
            .ok_or(EmitError::InvalidContinue)?;
        if ctx.finallys.len() > target.finally_depth {
            self.enter_finalizer(ctx, MODE_CONTINUE, |frame| {
                frame.continue_route = Some(target)
            })
        } else {
            ctx.emit(Instr::Jump {
                target: target.label,
            });
            Ok(())
        }
    }

    fn lower_return(&mut self, ctx: &mut FuncCtx, value: Option<&Expr>) -> EmitResult<()> {
        if let Some(expr) = value {
            let (v, _) = self.eval(ctx, expr)?;
            let ret_slot = ctx
                .ret_slot
                .ok_or_else(|| EmitError::internal("return value in a void function"))?;
            if ctx.ret_ty.is_heap() {
                // The slot may hold an earlier pending return routed
                // through a finalizer.
                ctx.emit(Instr::Decr {
                    loc: ret_slot,
                    why: OwnerKind::Local,
                });
            }
            ctx.emit(Instr::Move {
                dst: ret_slot,
                src: v,
            });
            ctx.frame.free_temp(v);
        }
        if !ctx.finallys.is_empty() {
            self.enter_finalizer(ctx, MODE_RETURN, |frame| frame.return_used = true)
        } else {
            let target = ctx.epilogue;
            ctx.emit(Instr::Jump { target });
            Ok(())
        }
    }

    /// Set the innermost finalizer's mode slot and jump to it.
    fn enter_finalizer(
        &mut self,
        ctx: &mut FuncCtx,
        mode: i32,
        mark: impl FnOnce(&mut FinallyCtx),
    ) -> EmitResult<()> {
        let frame = ctx
            .finallys
            .last_mut()
            .ok_or_else(|| EmitError::internal("no enclosing finalizer"))?;
        mark(frame);
        let (mode_slot, fin) = (frame.mode_slot, frame.fin_label);
        let word = self.tagged_int(mode as i64)?;
        ctx.emit(Instr::LoadTagged {
            dst: mode_slot,
            word,
        });
        ctx.emit(Instr::Jump { target: fin });
        Ok(())
    }

    fn lower_switch(
        &mut self,
        ctx: &mut FuncCtx,
        scrutinee: &Expr,
        cases: &[SwitchCase],
    ) -> EmitResult<()> {
        let end = ctx.new_label();
        let (scrut, scrut_ty) = self.eval(ctx, scrutinee)?;
        // Discriminants are immediates; give up ownership before dispatch
        // jumps away (the word itself stays readable).
        if scrut_ty.is_heap() {
            ctx.emit(Instr::Decr {
                loc: scrut,
                why: OwnerKind::Temp,
            });
        }

        // Resolve each arm's discriminant and give it a body label.
        let mut arms: Vec<(Option<i64>, Label)> = Vec::with_capacity(cases.len());
        let mut default_label = None;
        for case in cases {
            let label = ctx.new_label();
            let value = match case.value {
                Some(CaseValue::Int(v)) => Some(v),
                Some(CaseValue::Enum(id, member)) => {
                    Some(self.enums.value(id, member).ok_or_else(|| {
                        EmitError::internal(format!("unresolved enum member {}#{}", id, member))
                    })?)
                }
                None => {
                    default_label = Some(label);
                    None
                }
            };
            arms.push((value, label));
        }
        let miss = default_label.unwrap_or(end);

        let values: Vec<i64> = arms.iter().filter_map(|(v, _)| *v).collect();
        if let Some((base, span)) = dense_span(&values) {
            // Small dense discriminants dispatch through a table. The body
            // layout below is shared with the compare chain, so observable
            // fall-through cannot differ between strategies.
            let mut targets = vec![miss; span];
            for (value, label) in &arms {
                if let Some(v) = value {
                    targets[(v - base) as usize] = *label;
                }
            }
            ctx.emit(Instr::JumpTable {
                scrutinee: scrut,
                base: base as i32,
                targets,
                default: miss,
            });
        } else {
            for (value, label) in &arms {
                if let Some(v) = value {
                    let word = self.tagged_int(*v)?;
                    let case_val = ctx.frame.alloc_temp()?;
                    ctx.emit(Instr::LoadTagged {
                        dst: case_val,
                        word,
                    });
                    let hit = ctx.frame.alloc_temp()?;
                    ctx.emit(Instr::Bin {
                        op: brio_core::BinOp::Eq,
                        dst: hit,
                        lhs: scrut,
                        rhs: case_val,
                    });
                    ctx.emit(Instr::JumpIf {
                        cond: hit,
                        if_true: true,
                        target: *label,
                    });
                    ctx.frame.free_temp(hit);
                    ctx.frame.free_temp(case_val);
                }
            }
            ctx.emit(Instr::Jump { target: miss });
        }
        ctx.frame.free_temp(scrut);

        // Case bodies in source order with no implicit jumps between them:
        // an arm that does not break or return falls into the next body.
        ctx.loops.push(LoopCtx {
            break_label: end,
            continue_label: None,
            finally_depth: ctx.finallys.len(),
        });
        for (case, (_, label)) in cases.iter().zip(&arms) {
            ctx.bind(*label);
            self.lower_block(ctx, &case.body)?;
        }
        ctx.loops.pop();
        ctx.bind(end);
        Ok(())
    }

    fn lower_try(
        &mut self,
        ctx: &mut FuncCtx,
        body: &Block,
        catch: Option<&CatchClause>,
        finally: Option<&Block>,
    ) -> EmitResult<()> {
        match (catch, finally) {
            (Some(catch), Some(finally)) => {
                // Desugar: the catch nests inside the finalizer's region, so
                // an exception raised in the catch body still runs the
                // finalizer.
                let inner = vec![Stmt::Try {
                    body: body.to_vec(),
                    catch: Some(catch.clone()),
                    finally: None,
                }];
                self.lower_try_finally(ctx, &inner, finally)
            }
            (Some(catch), None) => self.lower_try_catch(ctx, body, catch),
            (None, Some(finally)) => self.lower_try_finally(ctx, body, finally),
            (None, None) => self.lower_block(ctx, body),
        }
    }

    fn exc_loc(&self, ctx: &FuncCtx) -> EmitResult<Loc> {
        ctx.exc_slot
            .map(Loc::Frame)
            .ok_or_else(|| EmitError::internal("protected region without an exception slot"))
    }

    fn lower_try_catch(
        &mut self,
        ctx: &mut FuncCtx,
        body: &Block,
        catch: &CatchClause,
    ) -> EmitResult<()> {
        let start = ctx.new_label();
        let end = ctx.new_label();
        let handler = ctx.new_label();
        let done = ctx.new_label();

        ctx.bind(start);
        self.lower_block(ctx, body)?;
        ctx.bind(end);
        ctx.emit(Instr::Jump { target: done });

        ctx.bind(handler);
        let exc = self.exc_loc(ctx)?;
        let slot = ctx
            .frame
            .lookup(&catch.name)
            .cloned()
            .ok_or_else(|| EmitError::internal(format!("undeclared catch binding {}", catch.name)))?;
        if slot.captured {
            let cell = ctx.frame.alloc_temp()?;
            ctx.emit(Instr::NewCell { dst: cell });
            ctx.emit(Instr::Decr {
                loc: slot.loc,
                why: OwnerKind::Local,
            });
            ctx.emit(Instr::Move {
                dst: slot.loc,
                src: cell,
            });
            ctx.frame.free_temp(cell);
            ctx.emit(Instr::StoreCell {
                cell: slot.loc,
                src: exc,
            });
        } else {
            ctx.emit(Instr::Decr {
                loc: slot.loc,
                why: OwnerKind::Local,
            });
            ctx.emit(Instr::Move {
                dst: slot.loc,
                src: exc,
            });
        }
        self.lower_block(ctx, &catch.body)?;
        ctx.bind(done);

        ctx.regions.push(ProtectedRegion {
            start,
            end,
            handler,
        });
        Ok(())
    }

    fn lower_try_finally(
        &mut self,
        ctx: &mut FuncCtx,
        body: &Block,
        finally: &Block,
    ) -> EmitResult<()> {
        let (mode_slot, pending_slot) = ctx
            .finally_slots
            .pop_front()
            .ok_or_else(|| EmitError::internal("finalizer slots exhausted"))?;
        let mode = Loc::Frame(mode_slot);
        let pending = Loc::Frame(pending_slot);

        let start = ctx.new_label();
        let end = ctx.new_label();
        let handler = ctx.new_label();
        let fin = ctx.new_label();
        let done = ctx.new_label();

        ctx.finallys.push(FinallyCtx {
            fin_label: fin,
            mode_slot: mode,
            pending_slot: pending,
            return_used: false,
            break_route: None,
            continue_route: None,
        });

        ctx.bind(start);
        self.lower_block(ctx, body)?;
        ctx.bind(end);
        let fall_word = self.tagged_int(MODE_FALL as i64)?;
        ctx.emit(Instr::LoadTagged {
            dst: mode,
            word: fall_word,
        });
        ctx.emit(Instr::Jump { target: fin });

        // Unwind entry: park the in-flight exception and replay it after
        // the finalizer, unless the finalizer itself completes abruptly.
        ctx.bind(handler);
        let exc = self.exc_loc(ctx)?;
        ctx.emit(Instr::Move {
            dst: pending,
            src: exc,
        });
        let rethrow_word = self.tagged_int(MODE_RETHROW as i64)?;
        ctx.emit(Instr::LoadTagged {
            dst: mode,
            word: rethrow_word,
        });
        ctx.emit(Instr::Jump { target: fin });

        ctx.regions.push(ProtectedRegion {
            start,
            end,
            handler,
        });

        let frame = ctx
            .finallys
            .pop()
            .ok_or_else(|| EmitError::internal("finalizer stack underflow"))?;

        ctx.bind(fin);
        self.lower_block(ctx, finally)?;
        self.emit_finally_dispatch(ctx, frame, done)?;
        ctx.bind(done);
        Ok(())
    }

    /// Route the recorded completion out of a finished finalizer.
    fn emit_finally_dispatch(
        &mut self,
        ctx: &mut FuncCtx,
        frame: FinallyCtx,
        done: Label,
    ) -> EmitResult<()> {
        let mut routes: Vec<(Label, Route)> = Vec::new();
        if frame.return_used {
            routes.push((ctx.new_label(), Route::Return));
        }
        if let Some(target) = frame.break_route {
            routes.push((ctx.new_label(), Route::Break(target)));
        }
        if let Some(target) = frame.continue_route {
            routes.push((ctx.new_label(), Route::Continue(target)));
        }
        routes.push((ctx.new_label(), Route::Rethrow));

        for (label, route) in &routes {
            let mode_value = match route {
                Route::Return => MODE_RETURN,
                Route::Break(_) => MODE_BREAK,
                Route::Continue(_) => MODE_CONTINUE,
                Route::Rethrow => MODE_RETHROW,
            };
            let word = self.tagged_int(mode_value as i64)?;
            let expected = ctx.frame.alloc_temp()?;
            ctx.emit(Instr::LoadTagged {
                dst: expected,
                word,
            });
            let hit = ctx.frame.alloc_temp()?;
            ctx.emit(Instr::Bin {
                op: brio_core::BinOp::Eq,
                dst: hit,
                lhs: frame.mode_slot,
                rhs: expected,
            });
            ctx.emit(Instr::JumpIf {
                cond: hit,
                if_true: true,
                target: *label,
            });
            ctx.frame.free_temp(hit);
            ctx.frame.free_temp(expected);
        }
        // Mode 0: normal completion.
        ctx.emit(Instr::Jump { target: done });

        for (label, route) in routes {
            ctx.bind(label);
            match route {
                Route::Return => {
                    if ctx.finallys.is_empty() {
                        let target = ctx.epilogue;
                        ctx.emit(Instr::Jump { target });
                    } else {
                        self.enter_finalizer(ctx, MODE_RETURN, |outer| outer.return_used = true)?;
                    }
                }
                Route::Break(target) => {
                    if ctx.finallys.len() > target.finally_depth {
                        self.enter_finalizer(ctx, MODE_BREAK, |outer| {
                            outer.break_route = Some(target)
                        })?;
                    } else {
                        ctx.emit(Instr::Jump {
                            target: target.label,
                        });
                    }
                }
                Route::Continue(target) => {
                    if ctx.finallys.len() > target.finally_depth {
                        self.enter_finalizer(ctx, MODE_CONTINUE, |outer| {
                            outer.continue_route = Some(target)
                        })?;
                    } else {
                        ctx.emit(Instr::Jump {
                            target: target.label,
                        });
                    }
                }
                Route::Rethrow => {
                    ctx.emit(Instr::Throw {
                        src: frame.pending_slot,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Jump-table strategy test: at least three distinct discriminants whose
/// span is small and dense.
fn dense_span(values: &[i64]) -> Option<(i64, usize)> {
    if values.len() < 3 {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.len() != values.len() {
        return None;
    }
    let (min, max) = (sorted[0], sorted[sorted.len() - 1]);
    let span = (max - min + 1) as usize;
    if span <= 128 && span <= 2 * values.len() {
        Some((min, span))
    } else {
        None
    }
}
