//! Static reference-count balance verification
//!
//! The emitter must insert exactly one increment per ownership gain and one
//! decrement per release. Named locals are safe by construction: slots are
//! null-initialized and released in the single function epilogue (or by the
//! unwinder), so a missed path cannot double-free. Expression temporaries
//! are where insertion bugs would live, so this pass symbolically executes
//! the instruction stream over the branch and protected-region tables and
//! proves that every temporary's gains and releases balance on every path:
//!
//! - a temporary is never overwritten or re-gained while it still owns a
//!   value (leak),
//! - a temporary is never released or transferred without owning (double
//!   free),
//! - control-flow joins agree on which temporaries are owned,
//! - no temporary owns a value at `Ret` (the returned value has been
//!   transferred by then),
//! - handler entry assumes the unwinder has released in-flight temporaries.
//!
//! A violation is an [`EmitError::Internal`]: a defect of the emitter, never
//! user-triggerable, and grounds to abort emission rather than ship a
//! silently-wrong binary.

use crate::error::{EmitError, EmitResult};
use crate::ir::{EmittedFunction, Instr, Label, Loc};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// Owned-temporary state at one program point.
type State = BTreeSet<u16>;

struct Verifier<'a> {
    func: &'a EmittedFunction,
    labels: FxHashMap<Label, usize>,
    /// State recorded at each label's instruction index.
    at_label: FxHashMap<usize, State>,
    worklist: Vec<(usize, State)>,
}

/// Check one lowered function. See the module docs for the guarantees.
pub fn verify_balance(func: &EmittedFunction) -> EmitResult<()> {
    let labels = func.label_positions()?;
    let mut verifier = Verifier {
        func,
        labels,
        at_label: FxHashMap::default(),
        worklist: vec![(0, State::new())],
    };

    // Handlers are entered by the unwinder with all temporaries released.
    for region in &func.regions {
        let target = verifier.resolve(region.handler)?;
        verifier.worklist.push((target, State::new()));
    }

    while let Some((index, state)) = verifier.worklist.pop() {
        verifier.run_from(index, state)?;
    }
    Ok(())
}

impl<'a> Verifier<'a> {
    fn resolve(&self, label: Label) -> EmitResult<usize> {
        self.labels
            .get(&label)
            .copied()
            .ok_or_else(|| self.defect(format!("unbound label {}", label)))
    }

    fn defect(&self, message: String) -> EmitError {
        EmitError::internal(format!("{}: {}", self.func.name, message))
    }

    fn temp(&self, loc: Loc) -> Option<u16> {
        match loc {
            Loc::Frame(slot) if slot >= self.func.temp_base => Some(slot),
            _ => None,
        }
    }

    fn gain(&self, state: &mut State, loc: Loc) -> EmitResult<()> {
        if let Some(slot) = self.temp(loc) {
            if !state.insert(slot) {
                return Err(self.defect(format!("temp s{} gained while already owned", slot)));
            }
        }
        Ok(())
    }

    /// Ownership leaves the temporary (transfer to another holder).
    fn clear(&self, state: &mut State, loc: Loc) {
        if let Some(slot) = self.temp(loc) {
            state.remove(&slot);
        }
    }

    /// Explicit release; requires ownership.
    fn lose(&self, state: &mut State, loc: Loc) -> EmitResult<()> {
        if let Some(slot) = self.temp(loc) {
            if !state.remove(&slot) {
                return Err(self.defect(format!("temp s{} released without ownership", slot)));
            }
        }
        Ok(())
    }

    /// Writing a borrowed or immediate value over an owned temp is a leak.
    fn overwrite(&self, state: &State, loc: Loc) -> EmitResult<()> {
        if let Some(slot) = self.temp(loc) {
            if state.contains(&slot) {
                return Err(self.defect(format!("owned temp s{} overwritten (leak)", slot)));
            }
        }
        Ok(())
    }

    fn branch(&mut self, target: Label, state: &State) -> EmitResult<()> {
        let index = self.resolve(target)?;
        match self.at_label.get(&index) {
            Some(previous) => {
                if previous != state {
                    return Err(self.defect(format!(
                        "join at {} disagrees on owned temps: {:?} vs {:?}",
                        target, previous, state
                    )));
                }
            }
            None => {
                self.at_label.insert(index, state.clone());
                self.worklist.push((index, state.clone()));
            }
        }
        Ok(())
    }

    fn run_from(&mut self, mut index: usize, mut state: State) -> EmitResult<()> {
        while index < self.func.code.len() {
            // Clone keeps the borrow checker happy while we mutate the
            // worklist below.
            let instr = self.func.code[index].clone();
            match instr {
                Instr::Label(_) => match self.at_label.get(&index) {
                    Some(previous) => {
                        if *previous != state {
                            return Err(self.defect(format!(
                                "fallthrough join disagrees on owned temps at instr {}",
                                index
                            )));
                        }
                    }
                    None => {
                        self.at_label.insert(index, state.clone());
                    }
                },
                Instr::LoadTagged { dst, .. }
                | Instr::LoadConst { dst, .. }
                | Instr::LoadField { dst, .. }
                | Instr::LoadElem { dst, .. }
                | Instr::LoadGlobal { dst, .. }
                | Instr::LoadCell { dst, .. }
                | Instr::Bin { dst, .. }
                | Instr::Un { dst, .. }
                | Instr::InstanceOf { dst, .. } => self.overwrite(&state, dst)?,

                Instr::Move { dst, src } => {
                    if self.temp(src).is_some_and(|s| state.contains(&s)) {
                        self.overwrite(&state, dst)?;
                        self.clear(&mut state, src);
                        self.gain(&mut state, dst)?;
                    } else {
                        self.overwrite(&state, dst)?;
                    }
                }

                Instr::New { dst, .. }
                | Instr::NewArray { dst, .. }
                | Instr::NewCell { dst }
                | Instr::MakeClosure { dst, .. } => {
                    self.overwrite(&state, dst)?;
                    self.gain(&mut state, dst)?;
                }

                Instr::Call {
                    dst,
                    args,
                    counted_result,
                    ..
                } => {
                    for arg in &args {
                        self.clear(&mut state, *arg);
                    }
                    self.call_result(&mut state, dst, counted_result)?;
                }
                Instr::CallVirtual {
                    dst,
                    recv,
                    args,
                    counted_result,
                    ..
                }
                | Instr::CallInterface {
                    dst,
                    recv,
                    args,
                    counted_result,
                    ..
                } => {
                    self.clear(&mut state, recv);
                    for arg in &args {
                        self.clear(&mut state, *arg);
                    }
                    self.call_result(&mut state, dst, counted_result)?;
                }
                Instr::CallClosure {
                    dst,
                    args,
                    counted_result,
                    ..
                } => {
                    for arg in &args {
                        self.clear(&mut state, *arg);
                    }
                    self.call_result(&mut state, dst, counted_result)?;
                }

                Instr::StoreField { src, .. }
                | Instr::StoreElem { src, .. }
                | Instr::StoreGlobal { src, .. }
                | Instr::StoreCell { src, .. } => self.clear(&mut state, src),

                Instr::Spawn { closure } => self.clear(&mut state, closure),

                Instr::Incr { loc, why } => {
                    use brio_core::OwnerKind;
                    match why {
                        // External gain (closure record or container); no
                        // frame obligation.
                        OwnerKind::Cell | OwnerKind::Field | OwnerKind::Global => {}
                        _ => self.gain(&mut state, loc)?,
                    }
                }
                Instr::Decr { loc, .. } => {
                    if self.temp(loc).is_some() {
                        self.lose(&mut state, loc)?;
                    }
                }

                Instr::Jump { target } => {
                    self.branch(target, &state)?;
                    return Ok(());
                }
                Instr::JumpIf { target, .. } => {
                    self.branch(target, &state)?;
                }
                Instr::JumpTable {
                    ref targets,
                    default,
                    ..
                } => {
                    for t in targets {
                        self.branch(*t, &state)?;
                    }
                    self.branch(default, &state)?;
                    return Ok(());
                }

                Instr::Ret { src } => {
                    if let Some(src) = src {
                        self.clear(&mut state, src);
                    }
                    if !state.is_empty() {
                        return Err(self.defect(format!(
                            "temps {:?} still owned at return",
                            state
                        )));
                    }
                    return Ok(());
                }
                Instr::Throw { src } => {
                    self.clear(&mut state, src);
                    // The unwinder releases remaining temporaries.
                    return Ok(());
                }
            }
            index += 1;
        }
        Err(self.defect("control flow runs off the end of the body".into()))
    }

    fn call_result(
        &self,
        state: &mut State,
        dst: Option<Loc>,
        counted_result: bool,
    ) -> EmitResult<()> {
        if let Some(dst) = dst {
            self.overwrite(state, dst)?;
            if counted_result {
                self.gain(state, dst)?;
            }
        }
        Ok(())
    }
}
