//! Shared harness: a reference interpreter for the emitted instruction
//! stream.
//!
//! The interpreter executes an [`EmitUnit`] the way the embedded runtime
//! would: frames with registers and slots, capture cells, a cooperative
//! fiber queue, protected-region unwinding, and, crucially, live
//! ownership counts on every heap object. A frame tracks which of its
//! locations currently own a count; releasing without owning or freeing an
//! object twice panics the test, and `live_objects()` exposes what is still
//! allocated so tests can assert the reference-count arithmetic balanced.

use brio_core::{BinOp, CheckedProgram, Program, TargetInfo, UnOp};
use brio_emitter::{Builtin, Constant, EmitUnit, Emitter, FuncRef, Instr, Label, Loc};
use brio_literals::{decode_tagged, Tagged};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

/// Lower and verify a program, panicking on any emitter error.
pub fn compile(program: Program) -> EmitUnit {
    let checked = CheckedProgram {
        files: Vec::new(),
        symbols: Default::default(),
        program,
    };
    Emitter::compile_unit(&checked, &TargetInfo::bytecode()).expect("emission failed")
}

/// Compile, run to completion (main plus all fibers), panic on an uncaught
/// exception, and return the interpreter for inspection.
pub fn run(program: Program) -> Interp {
    let mut interp = Interp::new(compile(program));
    if let Err(exc) = interp.run() {
        panic!("uncaught exception: {:?}", exc);
    }
    interp
}

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Int(i32),
    Bool(bool),
    Ref(usize),
}

#[derive(Debug)]
enum HeapData {
    Str(String),
    Array(Vec<Value>),
    Object { class: u32, fields: Vec<Value> },
    Cell(Value),
    Closure { func: u32, cells: Vec<usize> },
    Image(Vec<u8>),
}

#[derive(Debug)]
struct HeapObj {
    count: i32,
    data: HeapData,
}

struct Frame {
    regs: Vec<Value>,
    slots: Vec<Value>,
    cells: Vec<usize>,
    owned: FxHashSet<Loc>,
}

struct FuncImage {
    labels: FxHashMap<Label, usize>,
    /// (start, end, handler) as instruction indices.
    regions: Vec<(usize, usize, usize)>,
}

pub struct Interp {
    unit: EmitUnit,
    images: Vec<FuncImage>,
    heap: Vec<Option<HeapObj>>,
    globals: Vec<Value>,
    const_refs: Vec<usize>,
    fibers: VecDeque<usize>,
}

impl Interp {
    pub fn new(unit: EmitUnit) -> Self {
        let images = unit
            .functions
            .iter()
            .map(|f| {
                let labels = f.label_positions().expect("duplicate label");
                let regions = f
                    .regions
                    .iter()
                    .map(|r| (labels[&r.start], labels[&r.end], labels[&r.handler]))
                    .collect();
                FuncImage { labels, regions }
            })
            .collect();
        let globals = vec![Value::Null; unit.global_count as usize];
        let mut interp = Interp {
            images,
            heap: Vec::new(),
            globals,
            const_refs: Vec::new(),
            fibers: VecDeque::new(),
            unit,
        };
        // The pool owns one count on each constant.
        for constant in interp.unit.constants.clone().iter() {
            let data = match constant {
                Constant::Str(s) => HeapData::Str(s.clone()),
                Constant::Image(bytes) => HeapData::Image(bytes.clone()),
            };
            let id = interp.alloc(data);
            interp.const_refs.push(id);
        }
        interp
    }

    // ===== Heap =====

    fn alloc(&mut self, data: HeapData) -> usize {
        self.heap.push(Some(HeapObj { count: 1, data }));
        self.heap.len() - 1
    }

    fn obj(&self, id: usize) -> &HeapObj {
        self.heap[id].as_ref().expect("use after free")
    }

    fn incr_ref(&mut self, id: usize) {
        self.heap[id].as_mut().expect("incr on freed object").count += 1;
    }

    fn decr_ref(&mut self, id: usize) {
        let obj = self.heap[id].as_mut().expect("decr on freed object");
        obj.count -= 1;
        assert!(obj.count >= 0, "ownership count went negative");
        if obj.count == 0 {
            let dead = self.heap[id].take().expect("double free");
            // Compound values release each owned sub-value recursively.
            match dead.data {
                HeapData::Array(elems) => {
                    for value in elems {
                        self.release_value(&value);
                    }
                }
                HeapData::Object { fields, .. } => {
                    for value in fields {
                        self.release_value(&value);
                    }
                }
                HeapData::Cell(value) => self.release_value(&value),
                HeapData::Closure { cells, .. } => {
                    for cell in cells {
                        self.decr_ref(cell);
                    }
                }
                HeapData::Str(_) | HeapData::Image(_) => {}
            }
        }
    }

    fn release_value(&mut self, value: &Value) {
        if let Value::Ref(id) = value {
            self.decr_ref(*id);
        }
    }

    /// Heap objects still allocated. Zero after `shutdown` proves every
    /// increment met its decrement.
    pub fn live_objects(&self) -> usize {
        self.heap.iter().filter(|slot| slot.is_some()).count()
    }

    /// Release the program-lifetime owners: globals and the constant pool.
    pub fn shutdown(&mut self) {
        let globals = std::mem::take(&mut self.globals);
        for value in &globals {
            self.release_value(value);
        }
        let consts = std::mem::take(&mut self.const_refs);
        for id in consts {
            self.decr_ref(id);
        }
    }

    // ===== Observation =====

    pub fn global(&self, index: usize) -> &Value {
        &self.globals[index]
    }

    pub fn global_int(&self, index: usize) -> i32 {
        match &self.globals[index] {
            Value::Int(v) => *v,
            other => panic!("global {} is {:?}, not an int", index, other),
        }
    }

    pub fn str_of(&self, value: &Value) -> Option<String> {
        match value {
            Value::Ref(id) => match &self.obj(*id).data {
                HeapData::Str(s) => Some(s.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    // ===== Execution =====

    pub fn run(&mut self) -> Result<Value, Value> {
        let entry = self.unit.entry as usize;
        let result = self.run_function(entry, Vec::new(), Vec::new())?;
        // Fibers interleave only at yield points; in this reference
        // implementation each fiber runs to completion after main.
        while let Some(record) = self.fibers.pop_front() {
            let (func, cells) = match &self.obj(record).data {
                HeapData::Closure { func, cells } => (*func as usize, cells.clone()),
                other => panic!("spawned a non-closure: {:?}", other),
            };
            let run = self.run_function(func, Vec::new(), cells);
            // The run queue owns the record for the fiber's duration.
            self.decr_ref(record);
            run?;
        }
        Ok(result)
    }

    fn run_function(
        &mut self,
        func_index: usize,
        args: Vec<Value>,
        cells: Vec<usize>,
    ) -> Result<Value, Value> {
        let func = &self.unit.functions[func_index];
        assert_eq!(
            args.len(),
            func.param_count as usize,
            "arity mismatch calling {}",
            func.name
        );
        let mut frame = Frame {
            regs: vec![Value::Null; func.reg_count as usize],
            slots: vec![Value::Null; func.frame_size as usize],
            cells,
            owned: FxHashSet::default(),
        };
        for (i, value) in args.into_iter().enumerate() {
            if matches!(value, Value::Ref(_)) {
                frame.owned.insert(Loc::Frame(i as u16));
            }
            frame.slots[i] = value;
        }

        let code = self.unit.functions[func_index].code.clone();
        let mut ip = 0usize;

        loop {
            if ip >= code.len() {
                panic!("fell off the end of {}", self.unit.functions[func_index].name);
            }
            let instr = &code[ip];
            match self.step(func_index, &mut frame, instr) {
                Ok(Step::Next) => ip += 1,
                Ok(Step::Goto(target)) => {
                    ip = self.images[func_index].labels[&target];
                }
                Ok(Step::Return(value)) => {
                    assert!(
                        frame.owned.is_empty(),
                        "{} leaked {:?} at return",
                        self.unit.functions[func_index].name,
                        frame.owned
                    );
                    return Ok(value);
                }
                Err(exc) => match self.find_handler(func_index, ip) {
                    Some(handler) => {
                        // The unwinder releases in-flight temporaries and
                        // delivers the exception in the designated slot.
                        self.release_temps(func_index, &mut frame);
                        let exc_slot = self.unit.functions[func_index]
                            .exc_slot
                            .expect("handler without an exception slot");
                        if matches!(exc, Value::Ref(_)) {
                            frame.owned.insert(Loc::Frame(exc_slot));
                        }
                        frame.slots[exc_slot as usize] = exc;
                        ip = handler;
                    }
                    None => {
                        // Unwinding out of the frame releases everything it
                        // still owns.
                        let owned: Vec<Loc> = frame.owned.drain().collect();
                        for loc in owned {
                            let value = get(&frame, loc);
                            self.release_value(&value);
                        }
                        return Err(exc);
                    }
                },
            }
        }
    }

    fn find_handler(&self, func_index: usize, ip: usize) -> Option<usize> {
        self.images[func_index]
            .regions
            .iter()
            .filter(|(start, end, _)| *start <= ip && ip < *end)
            .min_by_key(|(start, end, _)| end - start)
            .map(|(_, _, handler)| *handler)
    }

    fn release_temps(&mut self, func_index: usize, frame: &mut Frame) {
        let temp_base = self.unit.functions[func_index].temp_base;
        let temps: Vec<Loc> = frame
            .owned
            .iter()
            .filter(|loc| matches!(loc, Loc::Frame(s) if *s >= temp_base))
            .copied()
            .collect();
        for loc in temps {
            frame.owned.remove(&loc);
            let value = get(frame, loc);
            self.release_value(&value);
        }
    }

    fn step(
        &mut self,
        func_index: usize,
        frame: &mut Frame,
        instr: &Instr,
    ) -> Result<Step, Value> {
        match instr {
            Instr::Label(_) => Ok(Step::Next),

            Instr::LoadTagged { dst, word } => {
                let value = match decode_tagged(*word) {
                    Tagged::Int(v) => Value::Int(v),
                    Tagged::Bool(b) => Value::Bool(b),
                    Tagged::Null => Value::Null,
                    Tagged::Undefined => Value::Undefined,
                    Tagged::Ref(_) => panic!("emitter produced a pointer literal"),
                };
                set(frame, *dst, value);
                Ok(Step::Next)
            }
            Instr::LoadConst { dst, index } => {
                let id = self.const_refs[*index as usize];
                set(frame, *dst, Value::Ref(id));
                Ok(Step::Next)
            }
            Instr::Move { dst, src } => {
                let value = get(frame, *src);
                set(frame, *dst, value);
                if frame.owned.remove(src) {
                    frame.owned.insert(*dst);
                }
                Ok(Step::Next)
            }

            Instr::Bin { op, dst, lhs, rhs } => {
                let value = self.binary(*op, get(frame, *lhs), get(frame, *rhs));
                set(frame, *dst, value);
                Ok(Step::Next)
            }
            Instr::Un { op, dst, src } => {
                let value = match (op, get(frame, *src)) {
                    (UnOp::Not, Value::Bool(b)) => Value::Bool(!b),
                    (UnOp::Neg, Value::Int(v)) => Value::Int(-v),
                    (UnOp::BitNot, Value::Int(v)) => Value::Int(!v),
                    (op, v) => panic!("unary {:?} on {:?}", op, v),
                };
                set(frame, *dst, value);
                Ok(Step::Next)
            }

            Instr::Jump { target } => Ok(Step::Goto(*target)),
            Instr::JumpIf {
                cond,
                if_true,
                target,
            } => {
                let taken = match get(frame, *cond) {
                    Value::Bool(b) => b == *if_true,
                    other => panic!("branch on non-boolean {:?}", other),
                };
                if taken {
                    Ok(Step::Goto(*target))
                } else {
                    Ok(Step::Next)
                }
            }
            Instr::JumpTable {
                scrutinee,
                base,
                targets,
                default,
            } => {
                let v = match get(frame, *scrutinee) {
                    Value::Int(v) => v,
                    other => panic!("jump table on {:?}", other),
                };
                let index = v - base;
                let target = if index >= 0 && (index as usize) < targets.len() {
                    targets[index as usize]
                } else {
                    *default
                };
                Ok(Step::Goto(target))
            }

            Instr::Call {
                dst,
                func,
                args,
                counted_result,
            } => {
                let arg_values = self.take_args(frame, args);
                let result = match func {
                    FuncRef::Builtin(b) => self.builtin(*b, arg_values),
                    FuncRef::Index(i) => self.run_function(*i as usize, arg_values, Vec::new())?,
                };
                self.finish_call(frame, *dst, *counted_result, result);
                Ok(Step::Next)
            }
            Instr::CallVirtual {
                dst,
                recv,
                slot,
                args,
                counted_result,
            } => {
                let recv_value = get(frame, *recv);
                let class = self.class_of(&recv_value);
                let func = match self.unit.classes[class as usize].vtable[*slot as usize].func {
                    FuncRef::Index(i) => i as usize,
                    FuncRef::Builtin(_) => panic!("builtin in a vtable"),
                };
                frame.owned.remove(recv);
                let mut arg_values = vec![recv_value];
                arg_values.extend(self.take_args(frame, args));
                let result = self.run_function(func, arg_values, Vec::new())?;
                self.finish_call(frame, *dst, *counted_result, result);
                Ok(Step::Next)
            }
            Instr::CallInterface {
                dst,
                recv,
                member,
                args,
                counted_result,
            } => {
                let recv_value = get(frame, *recv);
                let class = self.class_of(&recv_value);
                let layout = &self.unit.classes[class as usize];
                let slot = layout
                    .itable
                    .iter()
                    .find(|(m, _)| m == member)
                    .map(|(_, slot)| *slot)
                    .unwrap_or_else(|| {
                        panic!("{} lacks interface member {}", layout.name, member)
                    });
                let func = match layout.vtable[slot as usize].func {
                    FuncRef::Index(i) => i as usize,
                    FuncRef::Builtin(_) => panic!("builtin in a vtable"),
                };
                frame.owned.remove(recv);
                let mut arg_values = vec![recv_value];
                arg_values.extend(self.take_args(frame, args));
                let result = self.run_function(func, arg_values, Vec::new())?;
                self.finish_call(frame, *dst, *counted_result, result);
                Ok(Step::Next)
            }
            Instr::CallClosure {
                dst,
                closure,
                args,
                counted_result,
            } => {
                let (func, cells) = match get(frame, *closure) {
                    Value::Ref(id) => match &self.obj(id).data {
                        HeapData::Closure { func, cells } => (*func as usize, cells.clone()),
                        other => panic!("called a non-closure: {:?}", other),
                    },
                    other => panic!("called a non-reference: {:?}", other),
                };
                let arg_values = self.take_args(frame, args);
                let result = self.run_function(func, arg_values, cells)?;
                self.finish_call(frame, *dst, *counted_result, result);
                Ok(Step::Next)
            }
            Instr::Ret { src } => {
                let value = match src {
                    Some(src) => {
                        frame.owned.remove(src);
                        get(frame, *src)
                    }
                    None => Value::Undefined,
                };
                Ok(Step::Return(value))
            }

            Instr::New { dst, class } => {
                let field_count = self.unit.classes[class.0 as usize].fields.len();
                let id = self.alloc(HeapData::Object {
                    class: class.0,
                    fields: vec![Value::Null; field_count],
                });
                set(frame, *dst, Value::Ref(id));
                frame.owned.insert(*dst);
                Ok(Step::Next)
            }
            Instr::LoadField { dst, obj, offset } => {
                let value = match get(frame, *obj) {
                    Value::Ref(id) => match &self.obj(id).data {
                        HeapData::Object { fields, .. } => fields[*offset as usize].clone(),
                        other => panic!("field read on {:?}", other),
                    },
                    other => panic!("field read on {:?}", other),
                };
                set(frame, *dst, value);
                Ok(Step::Next)
            }
            Instr::StoreField { obj, offset, src } => {
                let value = get(frame, *src);
                frame.owned.remove(src);
                match get(frame, *obj) {
                    Value::Ref(id) => {
                        match &mut self.heap[id].as_mut().expect("store to freed object").data {
                            HeapData::Object { fields, .. } => {
                                fields[*offset as usize] = value;
                            }
                            other => panic!("field write on {:?}", other),
                        }
                    }
                    other => panic!("field write on {:?}", other),
                }
                Ok(Step::Next)
            }
            Instr::InstanceOf { dst, src, class } => {
                let result = match get(frame, *src) {
                    Value::Ref(id) => match &self.obj(id).data {
                        HeapData::Object { class: actual, .. } => {
                            self.walks_to(*actual, class.0)
                        }
                        _ => false,
                    },
                    // null, undefined and primitives are never instances.
                    _ => false,
                };
                set(frame, *dst, Value::Bool(result));
                Ok(Step::Next)
            }

            Instr::NewArray { dst, len } => {
                let id = self.alloc(HeapData::Array(vec![Value::Null; *len as usize]));
                set(frame, *dst, Value::Ref(id));
                frame.owned.insert(*dst);
                Ok(Step::Next)
            }
            Instr::LoadElem { dst, array, index } => {
                let i = self.index_of(get(frame, *index));
                let value = match get(frame, *array) {
                    Value::Ref(id) => match &self.obj(id).data {
                        HeapData::Array(elems) => elems[i].clone(),
                        other => panic!("element read on {:?}", other),
                    },
                    other => panic!("element read on {:?}", other),
                };
                set(frame, *dst, value);
                Ok(Step::Next)
            }
            Instr::StoreElem { array, index, src } => {
                let i = self.index_of(get(frame, *index));
                let value = get(frame, *src);
                frame.owned.remove(src);
                match get(frame, *array) {
                    Value::Ref(id) => {
                        match &mut self.heap[id].as_mut().expect("store to freed array").data {
                            HeapData::Array(elems) => elems[i] = value,
                            other => panic!("element write on {:?}", other),
                        }
                    }
                    other => panic!("element write on {:?}", other),
                }
                Ok(Step::Next)
            }

            Instr::LoadGlobal { dst, index } => {
                let value = self.globals[*index as usize].clone();
                set(frame, *dst, value);
                Ok(Step::Next)
            }
            Instr::StoreGlobal { index, src } => {
                let value = get(frame, *src);
                frame.owned.remove(src);
                self.globals[*index as usize] = value;
                Ok(Step::Next)
            }

            Instr::NewCell { dst } => {
                let id = self.alloc(HeapData::Cell(Value::Null));
                set(frame, *dst, Value::Ref(id));
                frame.owned.insert(*dst);
                Ok(Step::Next)
            }
            Instr::LoadCell { dst, cell } => {
                let value = match get(frame, *cell) {
                    Value::Ref(id) => match &self.obj(id).data {
                        HeapData::Cell(value) => value.clone(),
                        other => panic!("cell read on {:?}", other),
                    },
                    other => panic!("cell read on {:?}", other),
                };
                set(frame, *dst, value);
                Ok(Step::Next)
            }
            Instr::StoreCell { cell, src } => {
                let value = get(frame, *src);
                frame.owned.remove(src);
                match get(frame, *cell) {
                    Value::Ref(id) => {
                        match &mut self.heap[id].as_mut().expect("store to freed cell").data {
                            HeapData::Cell(content) => *content = value,
                            other => panic!("cell write on {:?}", other),
                        }
                    }
                    other => panic!("cell write on {:?}", other),
                }
                Ok(Step::Next)
            }
            Instr::MakeClosure { dst, func, cells } => {
                let func = match func {
                    FuncRef::Index(i) => *i,
                    FuncRef::Builtin(_) => panic!("closure over a builtin"),
                };
                let cell_ids: Vec<usize> = cells
                    .iter()
                    .map(|loc| match get(frame, *loc) {
                        Value::Ref(id) => id,
                        other => panic!("captured a non-cell: {:?}", other),
                    })
                    .collect();
                let id = self.alloc(HeapData::Closure {
                    func,
                    cells: cell_ids,
                });
                set(frame, *dst, Value::Ref(id));
                frame.owned.insert(*dst);
                Ok(Step::Next)
            }
            Instr::Spawn { closure } => {
                match get(frame, *closure) {
                    Value::Ref(id) => {
                        frame.owned.remove(closure);
                        self.fibers.push_back(id);
                    }
                    other => panic!("spawned {:?}", other),
                }
                Ok(Step::Next)
            }

            Instr::Incr { loc, why } => {
                let value = get(frame, *loc);
                if let Value::Ref(id) = value {
                    self.incr_ref(id);
                    if why.is_frame_owner() {
                        frame.owned.insert(*loc);
                    }
                }
                Ok(Step::Next)
            }
            Instr::Decr { loc, why } => {
                if why.is_frame_owner() {
                    // Frame releases are ownership-guarded: slots are
                    // null-initialized, so a path that never assigned is a
                    // no-op.
                    if frame.owned.remove(loc) {
                        let value = get(frame, *loc);
                        self.release_value(&value);
                    }
                } else {
                    // External release through a borrowed reference.
                    let value = get(frame, *loc);
                    self.release_value(&value);
                }
                Ok(Step::Next)
            }

            Instr::Throw { src } => {
                frame.owned.remove(src);
                Err(get(frame, *src))
            }
        }
    }

    fn take_args(&mut self, frame: &mut Frame, args: &[Loc]) -> Vec<Value> {
        args.iter()
            .map(|loc| {
                frame.owned.remove(loc);
                get(frame, *loc)
            })
            .collect()
    }

    fn finish_call(&mut self, frame: &mut Frame, dst: Option<Loc>, counted: bool, result: Value) {
        if let Some(dst) = dst {
            if counted && matches!(result, Value::Ref(_)) {
                frame.owned.insert(dst);
            }
            set(frame, dst, result);
        } else {
            // An unclaimed counted result would leak; void calls return
            // undefined.
            self.release_value(&result);
        }
    }

    fn builtin(&mut self, builtin: Builtin, args: Vec<Value>) -> Value {
        match builtin {
            Builtin::StringConcat => {
                let a = self.str_of(&args[0]).expect("concat on non-string");
                let b = self.str_of(&args[1]).expect("concat on non-string");
                for arg in &args {
                    self.release_value(arg);
                }
                let id = self.alloc(HeapData::Str(format!("{}{}", a, b)));
                Value::Ref(id)
            }
            Builtin::StringEquals => {
                let a = self.str_of(&args[0]);
                let b = self.str_of(&args[1]);
                for arg in &args {
                    self.release_value(arg);
                }
                Value::Bool(a.is_some() && a == b)
            }
            Builtin::FiberYield => {
                for arg in &args {
                    self.release_value(arg);
                }
                Value::Undefined
            }
        }
    }

    fn binary(&self, op: BinOp, lhs: Value, rhs: Value) -> Value {
        use Value::*;
        match (op, &lhs, &rhs) {
            (BinOp::Add, Int(a), Int(b)) => Int(a.wrapping_add(*b)),
            (BinOp::Sub, Int(a), Int(b)) => Int(a.wrapping_sub(*b)),
            (BinOp::Mul, Int(a), Int(b)) => Int(a.wrapping_mul(*b)),
            (BinOp::Div, Int(a), Int(b)) => Int(a.wrapping_div(*b)),
            (BinOp::Mod, Int(a), Int(b)) => Int(a.wrapping_rem(*b)),
            (BinOp::BitAnd, Int(a), Int(b)) => Int(a & b),
            (BinOp::BitOr, Int(a), Int(b)) => Int(a | b),
            (BinOp::BitXor, Int(a), Int(b)) => Int(a ^ b),
            (BinOp::Shl, Int(a), Int(b)) => Int(a << (b & 31)),
            (BinOp::Shr, Int(a), Int(b)) => Int(a >> (b & 31)),
            (BinOp::Lt, Int(a), Int(b)) => Bool(a < b),
            (BinOp::Le, Int(a), Int(b)) => Bool(a <= b),
            (BinOp::Gt, Int(a), Int(b)) => Bool(a > b),
            (BinOp::Ge, Int(a), Int(b)) => Bool(a >= b),
            (BinOp::Eq, a, b) => Bool(a == b),
            (BinOp::Ne, a, b) => Bool(a != b),
            (op, a, b) => panic!("binary {:?} on {:?} and {:?}", op, a, b),
        }
    }

    fn class_of(&self, value: &Value) -> u32 {
        match value {
            Value::Ref(id) => match &self.obj(*id).data {
                HeapData::Object { class, .. } => *class,
                other => panic!("dispatch on {:?}", other),
            },
            other => panic!("dispatch on {:?}", other),
        }
    }

    fn walks_to(&self, mut class: u32, target: u32) -> bool {
        loop {
            if class == target {
                return true;
            }
            match self.unit.classes[class as usize].parent {
                Some(parent) => class = parent.0,
                None => return false,
            }
        }
    }

    fn index_of(&self, value: Value) -> usize {
        match value {
            Value::Int(v) if v >= 0 => v as usize,
            other => panic!("array index {:?}", other),
        }
    }
}

enum Step {
    Next,
    Goto(Label),
    Return(Value),
}

fn get(frame: &Frame, loc: Loc) -> Value {
    match loc {
        Loc::Reg(r) => frame.regs[r as usize].clone(),
        Loc::Frame(s) => frame.slots[s as usize].clone(),
        Loc::Captured(c) => Value::Ref(frame.cells[c as usize]),
    }
}

fn set(frame: &mut Frame, loc: Loc, value: Value) {
    match loc {
        Loc::Reg(r) => frame.regs[r as usize] = value,
        Loc::Frame(s) => frame.slots[s as usize] = value,
        Loc::Captured(_) => panic!("capture cells are not writable locations"),
    }
}

/// Extension trait: which ownership kinds describe the frame itself.
trait OwnerKindExt {
    fn is_frame_owner(&self) -> bool;
}

impl OwnerKindExt for brio_core::OwnerKind {
    fn is_frame_owner(&self) -> bool {
        use brio_core::OwnerKind::*;
        matches!(self, Local | Param | Temp)
    }
}

// ===== AST construction helpers =====

pub mod build {
    use brio_core::*;

    pub fn int(v: i32) -> Expr {
        Expr::Int(v)
    }

    pub fn local(name: &str) -> Expr {
        Expr::Local(name.to_string())
    }

    pub fn string(s: &str) -> Expr {
        Expr::Str(s.to_string())
    }

    pub fn let_(name: &str, ty: Ty, init: Expr) -> Stmt {
        Stmt::Let {
            name: name.to_string(),
            ty,
            init: Some(init),
        }
    }

    pub fn assign(name: &str, value: Expr) -> Stmt {
        Stmt::Assign {
            target: LValue::Local(name.to_string()),
            value,
        }
    }

    pub fn set_global(name: &str, value: Expr) -> Stmt {
        Stmt::Assign {
            target: LValue::Global(name.to_string()),
            value,
        }
    }

    pub fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(op, lhs, rhs)
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Expr {
        bin(BinOp::Add, lhs, rhs)
    }

    pub fn call(func: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            func: func.to_string(),
            type_args: Vec::new(),
            args,
        }
    }

    pub fn lambda(params: Vec<Param>, ret: Ty, body: Block) -> Expr {
        Expr::Lambda { params, ret, body }
    }

    pub fn param(name: &str, ty: Ty) -> Param {
        Param {
            name: name.to_string(),
            ty,
        }
    }

    pub fn global(name: &str, ty: Ty) -> GlobalDecl {
        GlobalDecl {
            name: name.to_string(),
            ty,
            init: None,
        }
    }

    /// `if cond { gN = 1 } else { gN = 0 }`, the observation idiom for
    /// boolean outcomes.
    pub fn set_flag(global_name: &str, cond: Expr) -> Stmt {
        Stmt::If {
            cond,
            then_branch: vec![set_global(global_name, int(1))],
            else_branch: Some(vec![set_global(global_name, int(0))]),
        }
    }

    /// A program with the given `main` body and int-typed globals `g0..gN`,
    /// each initialized to zero before `main`'s own body runs.
    pub fn program_with_globals(globals: usize, main_body: Block) -> Program {
        let mut program = Program::default();
        for i in 0..globals {
            program.globals.push(GlobalDecl {
                name: format!("g{}", i),
                ty: Ty::Number,
                init: Some(Expr::Int(0)),
            });
        }
        program
            .functions
            .push(FunctionDecl::new("main", Vec::new(), Ty::Void, main_body));
        program
    }
}
