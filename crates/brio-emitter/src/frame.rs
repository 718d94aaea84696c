//! Frame layout and capture analysis
//!
//! Every function gets a fixed-size frame computed at emission time; there
//! is no dynamic stack growth on the embedded target. Named locals are
//! assigned a register or a frame slot; a local captured by a closure is
//! never assigned a register; its slot holds a heap cell reference from
//! declaration onward, because the captured storage must outlive the frame.
//!
//! Frame layout, low to high: parameter slots, named local slots (spilled
//! past the register file), control slots (return value, exception,
//! per-`try` completion bookkeeping), then expression temporaries. The
//! temporary area starting at `temp_base` is the region the balance
//! verifier polices strictly.

use crate::error::{EmitError, EmitResult};
use crate::ir::Loc;
use brio_core::{Block, Expr, LValue, Stmt, Ty};
use rustc_hash::{FxHashMap, FxHashSet};

const MAX_FRAME: usize = 4096;

/// Where a named local lives and what it holds.
#[derive(Debug, Clone)]
pub struct Slot {
    pub loc: Loc,
    pub ty: Ty,
    /// Captured locals hold a cell reference rather than the value.
    pub captured: bool,
}

/// Allocates registers, frame slots and temporaries for one function.
#[derive(Debug)]
pub struct FrameAllocator {
    name: String,
    register_count: u8,
    next_reg: u8,
    next_slot: u16,
    temp_base: u16,
    temp_next: u16,
    temp_free: Vec<u16>,
    max_slot: u16,
    named: FxHashMap<String, Slot>,
}

impl FrameAllocator {
    pub fn new(name: &str, register_count: u8) -> Self {
        Self {
            name: name.to_string(),
            register_count,
            next_reg: 0,
            next_slot: 0,
            temp_base: 0,
            temp_next: 0,
            temp_free: Vec::new(),
            max_slot: 0,
            named: FxHashMap::default(),
        }
    }

    fn bump_slot(&mut self) -> EmitResult<u16> {
        if self.next_slot as usize >= MAX_FRAME {
            return Err(EmitError::TooManyLocals {
                function: self.name.clone(),
            });
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        self.max_slot = self.max_slot.max(self.next_slot);
        Ok(slot)
    }

    /// Parameters always occupy the leading frame slots so the call
    /// sequence can copy arguments with one block move.
    pub fn declare_param(&mut self, name: &str, ty: Ty, captured: bool) -> EmitResult<Loc> {
        let loc = Loc::Frame(self.bump_slot()?);
        self.named.insert(
            name.to_string(),
            Slot {
                loc,
                ty,
                captured,
            },
        );
        Ok(loc)
    }

    /// Declare a named local. Non-captured locals prefer registers.
    pub fn declare_local(&mut self, name: &str, ty: Ty, captured: bool) -> EmitResult<Loc> {
        let loc = if !captured && self.next_reg < self.register_count {
            let reg = self.next_reg;
            self.next_reg += 1;
            Loc::Reg(reg)
        } else {
            Loc::Frame(self.bump_slot()?)
        };
        self.named.insert(
            name.to_string(),
            Slot {
                loc,
                ty,
                captured,
            },
        );
        Ok(loc)
    }

    /// Reserve an anonymous control slot (exception, return, exit mode).
    pub fn reserve_slot(&mut self) -> EmitResult<u16> {
        self.bump_slot()
    }

    /// Close the named/control area; temporaries start here.
    pub fn begin_temps(&mut self) {
        self.temp_base = self.next_slot;
        self.temp_next = self.next_slot;
    }

    /// Allocate an expression temporary, reusing freed slots.
    pub fn alloc_temp(&mut self) -> EmitResult<Loc> {
        if let Some(slot) = self.temp_free.pop() {
            return Ok(Loc::Frame(slot));
        }
        if self.temp_next as usize >= MAX_FRAME {
            return Err(EmitError::TooManyLocals {
                function: self.name.clone(),
            });
        }
        let slot = self.temp_next;
        self.temp_next += 1;
        self.max_slot = self.max_slot.max(self.temp_next);
        Ok(Loc::Frame(slot))
    }

    /// Return a temporary to the free pool.
    pub fn free_temp(&mut self, loc: Loc) {
        if let Loc::Frame(slot) = loc {
            if slot >= self.temp_base {
                self.temp_free.push(slot);
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Slot> {
        self.named.get(name)
    }

    pub fn named_slots(&self) -> impl Iterator<Item = (&String, &Slot)> {
        self.named.iter()
    }

    pub fn frame_size(&self) -> u16 {
        self.max_slot
    }

    pub fn reg_count(&self) -> u8 {
        self.next_reg
    }

    pub fn temp_base(&self) -> u16 {
        self.temp_base
    }
}

/// Names bound by a function-like body: parameters, `let`s and `catch`
/// bindings, not descending into nested lambdas.
fn collect_bindings(params: &[brio_core::Param], body: &Block, out: &mut FxHashSet<String>) {
    for p in params {
        out.insert(p.name.clone());
    }
    collect_block_bindings(body, out);
}

fn collect_block_bindings(block: &Block, out: &mut FxHashSet<String>) {
    for stmt in block {
        match stmt {
            Stmt::Let { name, .. } => {
                out.insert(name.clone());
            }
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                collect_block_bindings(then_branch, out);
                if let Some(b) = else_branch {
                    collect_block_bindings(b, out);
                }
            }
            Stmt::While { body, .. } => collect_block_bindings(body, out),
            Stmt::Switch { cases, .. } => {
                for case in cases {
                    collect_block_bindings(&case.body, out);
                }
            }
            Stmt::Try {
                body,
                catch,
                finally,
            } => {
                collect_block_bindings(body, out);
                if let Some(c) = catch {
                    out.insert(c.name.clone());
                    collect_block_bindings(&c.body, out);
                }
                if let Some(f) = finally {
                    collect_block_bindings(f, out);
                }
            }
            Stmt::Block(b) => collect_block_bindings(b, out),
            _ => {}
        }
    }
}

/// Free variables of a function-like body: locals referenced but not bound,
/// in first-reference order. Free variables of nested lambdas propagate
/// outward, so a doubly-nested capture boxes the whole chain.
pub fn free_variables(params: &[brio_core::Param], body: &Block) -> Vec<String> {
    let mut bound = FxHashSet::default();
    collect_bindings(params, body, &mut bound);
    let mut free = Vec::new();
    let mut seen = FxHashSet::default();
    walk_block_free(body, &bound, &mut free, &mut seen);
    free
}

fn note_free(
    name: &str,
    bound: &FxHashSet<String>,
    free: &mut Vec<String>,
    seen: &mut FxHashSet<String>,
) {
    if !bound.contains(name) && seen.insert(name.to_string()) {
        free.push(name.to_string());
    }
}

fn walk_block_free(
    block: &Block,
    bound: &FxHashSet<String>,
    free: &mut Vec<String>,
    seen: &mut FxHashSet<String>,
) {
    for stmt in block {
        walk_stmt_free(stmt, bound, free, seen);
    }
}

fn walk_stmt_free(
    stmt: &Stmt,
    bound: &FxHashSet<String>,
    free: &mut Vec<String>,
    seen: &mut FxHashSet<String>,
) {
    match stmt {
        Stmt::Let { init, .. } => {
            if let Some(e) = init {
                walk_expr_free(e, bound, free, seen);
            }
        }
        Stmt::Assign { target, value } => {
            match target {
                LValue::Local(name) => note_free(name, bound, free, seen),
                LValue::Global(_) => {}
                LValue::Field { obj, .. } => walk_expr_free(obj, bound, free, seen),
                LValue::Index { array, index } => {
                    walk_expr_free(array, bound, free, seen);
                    walk_expr_free(index, bound, free, seen);
                }
            }
            walk_expr_free(value, bound, free, seen);
        }
        Stmt::Expr(e) | Stmt::Throw(e) => walk_expr_free(e, bound, free, seen),
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => {
            walk_expr_free(cond, bound, free, seen);
            walk_block_free(then_branch, bound, free, seen);
            if let Some(b) = else_branch {
                walk_block_free(b, bound, free, seen);
            }
        }
        Stmt::While { cond, body } => {
            walk_expr_free(cond, bound, free, seen);
            walk_block_free(body, bound, free, seen);
        }
        Stmt::Return(Some(e)) => walk_expr_free(e, bound, free, seen),
        Stmt::Switch { scrutinee, cases } => {
            walk_expr_free(scrutinee, bound, free, seen);
            for case in cases {
                walk_block_free(&case.body, bound, free, seen);
            }
        }
        Stmt::Try {
            body,
            catch,
            finally,
        } => {
            walk_block_free(body, bound, free, seen);
            if let Some(c) = catch {
                walk_block_free(&c.body, bound, free, seen);
            }
            if let Some(f) = finally {
                walk_block_free(f, bound, free, seen);
            }
        }
        Stmt::Background(body) => {
            // The fiber body is a nested function; its free variables are
            // free here too unless bound in this frame.
            for name in free_variables(&[], body) {
                note_free(&name, bound, free, seen);
            }
        }
        Stmt::Block(b) => walk_block_free(b, bound, free, seen),
        Stmt::Return(None) | Stmt::Break | Stmt::Continue => {}
    }
}

fn walk_expr_free(
    expr: &Expr,
    bound: &FxHashSet<String>,
    free: &mut Vec<String>,
    seen: &mut FxHashSet<String>,
) {
    match expr {
        Expr::Local(name) => note_free(name, bound, free, seen),
        Expr::Lambda { params, body, .. } => {
            for name in free_variables(params, body) {
                note_free(&name, bound, free, seen);
            }
        }
        Expr::Unary { operand, .. } => walk_expr_free(operand, bound, free, seen),
        Expr::Binary { lhs, rhs, .. } => {
            walk_expr_free(lhs, bound, free, seen);
            walk_expr_free(rhs, bound, free, seen);
        }
        Expr::Call { args, .. } => {
            for a in args {
                walk_expr_free(a, bound, free, seen);
            }
        }
        Expr::CallValue { callee, args } => {
            walk_expr_free(callee, bound, free, seen);
            for a in args {
                walk_expr_free(a, bound, free, seen);
            }
        }
        Expr::MethodCall { recv, args, .. } => {
            walk_expr_free(recv, bound, free, seen);
            for a in args {
                walk_expr_free(a, bound, free, seen);
            }
        }
        Expr::New { args, .. } => {
            for a in args {
                walk_expr_free(a, bound, free, seen);
            }
        }
        Expr::Field { obj, .. } => walk_expr_free(obj, bound, free, seen),
        Expr::Index { array, index } => {
            walk_expr_free(array, bound, free, seen);
            walk_expr_free(index, bound, free, seen);
        }
        Expr::ArrayLit { elems, .. } => {
            for e in elems {
                walk_expr_free(e, bound, free, seen);
            }
        }
        Expr::InstanceOf { expr, .. } => walk_expr_free(expr, bound, free, seen),
        Expr::Cast { expr, .. } => walk_expr_free(expr, bound, free, seen),
        Expr::Int(_)
        | Expr::Bool(_)
        | Expr::Str(_)
        | Expr::Null
        | Expr::Image(_)
        | Expr::Global(_)
        | Expr::This
        | Expr::EnumRef { .. } => {}
    }
}

/// Locals of a function captured by any nested lambda or background fiber.
pub fn captured_locals(params: &[brio_core::Param], body: &Block) -> FxHashSet<String> {
    let mut declared = FxHashSet::default();
    collect_bindings(params, body, &mut declared);

    let mut captured = FxHashSet::default();
    collect_captures(body, &declared, &mut captured);
    captured
}

fn collect_captures(block: &Block, declared: &FxHashSet<String>, captured: &mut FxHashSet<String>) {
    visit_lambdas(block, &mut |params, body| {
        for name in free_variables(params, body) {
            if declared.contains(&name) {
                captured.insert(name);
            }
        }
    });
}

/// Visit every directly-nested lambda or background body of a block.
fn visit_lambdas(block: &Block, f: &mut impl FnMut(&[brio_core::Param], &Block)) {
    for stmt in block {
        visit_stmt_lambdas(stmt, f);
    }
}

fn visit_stmt_lambdas(stmt: &Stmt, f: &mut impl FnMut(&[brio_core::Param], &Block)) {
    match stmt {
        Stmt::Let { init: Some(e), .. } | Stmt::Expr(e) | Stmt::Throw(e) => visit_expr_lambdas(e, f),
        Stmt::Assign { target, value } => {
            match target {
                LValue::Field { obj, .. } => visit_expr_lambdas(obj, f),
                LValue::Index { array, index } => {
                    visit_expr_lambdas(array, f);
                    visit_expr_lambdas(index, f);
                }
                _ => {}
            }
            visit_expr_lambdas(value, f);
        }
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => {
            visit_expr_lambdas(cond, f);
            visit_lambdas(then_branch, f);
            if let Some(b) = else_branch {
                visit_lambdas(b, f);
            }
        }
        Stmt::While { cond, body } => {
            visit_expr_lambdas(cond, f);
            visit_lambdas(body, f);
        }
        Stmt::Return(Some(e)) => visit_expr_lambdas(e, f),
        Stmt::Switch { scrutinee, cases } => {
            visit_expr_lambdas(scrutinee, f);
            for case in cases {
                visit_lambdas(&case.body, f);
            }
        }
        Stmt::Try {
            body,
            catch,
            finally,
        } => {
            visit_lambdas(body, f);
            if let Some(c) = catch {
                visit_lambdas(&c.body, f);
            }
            if let Some(fin) = finally {
                visit_lambdas(fin, f);
            }
        }
        Stmt::Background(body) => f(&[], body),
        Stmt::Block(b) => visit_lambdas(b, f),
        _ => {}
    }
}

fn visit_expr_lambdas(expr: &Expr, f: &mut impl FnMut(&[brio_core::Param], &Block)) {
    match expr {
        Expr::Lambda { params, body, .. } => f(params, body),
        Expr::Unary { operand, .. } => visit_expr_lambdas(operand, f),
        Expr::Binary { lhs, rhs, .. } => {
            visit_expr_lambdas(lhs, f);
            visit_expr_lambdas(rhs, f);
        }
        Expr::Call { args, .. } | Expr::New { args, .. } => {
            for a in args {
                visit_expr_lambdas(a, f);
            }
        }
        Expr::CallValue { callee, args } => {
            visit_expr_lambdas(callee, f);
            for a in args {
                visit_expr_lambdas(a, f);
            }
        }
        Expr::MethodCall { recv, args, .. } => {
            visit_expr_lambdas(recv, f);
            for a in args {
                visit_expr_lambdas(a, f);
            }
        }
        Expr::Field { obj, .. } => visit_expr_lambdas(obj, f),
        Expr::Index { array, index } => {
            visit_expr_lambdas(array, f);
            visit_expr_lambdas(index, f);
        }
        Expr::ArrayLit { elems, .. } => {
            for e in elems {
                visit_expr_lambdas(e, f);
            }
        }
        Expr::InstanceOf { expr, .. } | Expr::Cast { expr, .. } => visit_expr_lambdas(expr, f),
        _ => {}
    }
}
