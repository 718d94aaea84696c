//! Class and interface layouts
//!
//! A class layout is plain data built once at emission time: the full field
//! list with offsets, the virtual dispatch table, the interface table, and
//! the parent id. The parent link is weak (an id, never an owning
//! reference). Layout invariant: a subclass's field list is its parent's
//! list with new fields appended, so code compiled against the parent works
//! unchanged on subclass instances; its vtable overrides parent slots in
//! place and appends new slots.

use crate::error::{EmitError, EmitResult};
use crate::ir::FuncRef;
use brio_core::{ClassId, Program, Ty};
use rustc_hash::FxHashMap;

/// A field with its resolved offset.
#[derive(Debug, Clone)]
pub struct FieldSlot {
    pub name: String,
    pub ty: Ty,
    pub offset: u16,
}

/// One virtual dispatch slot.
#[derive(Debug, Clone)]
pub struct VtableSlot {
    pub name: String,
    pub func: FuncRef,
}

/// Complete layout of one class.
#[derive(Debug, Clone)]
pub struct ClassLayout {
    pub id: ClassId,
    pub name: String,
    /// Weak parent link.
    pub parent: Option<ClassId>,
    /// Parent fields first, own fields appended.
    pub fields: Vec<FieldSlot>,
    /// Parent slots (overridden in place where redeclared), own appended.
    pub vtable: Vec<VtableSlot>,
    /// Interface member id → vtable slot, for every interface this class or
    /// an ancestor implements.
    pub itable: Vec<(u16, u16)>,
    /// Constructor, own or inherited.
    pub ctor: Option<FuncRef>,
}

/// All layouts of a unit plus the global interface member numbering.
#[derive(Debug, Default)]
pub struct ClassTable {
    layouts: Vec<ClassLayout>,
    iface_members: FxHashMap<String, u16>,
}

impl ClassTable {
    /// Build every layout. `method_funcs` maps `(class index, method name)`
    /// to the function index lowering reserved for that body; constructors
    /// are keyed by the method name `"constructor"`.
    pub fn build(
        program: &Program,
        method_funcs: &FxHashMap<(u32, String), u32>,
    ) -> EmitResult<Self> {
        let mut table = ClassTable::default();

        // Interface methods get stable global member ids, shared by every
        // implementing class.
        for iface in &program.interfaces {
            for sig in &iface.methods {
                let next = table.iface_members.len() as u16;
                table.iface_members.entry(sig.name.clone()).or_insert(next);
            }
        }

        for index in Self::topo_order(program)? {
            let decl = &program.classes[index];
            let id = ClassId(index as u32);
            let (mut fields, mut vtable) = match decl.parent {
                Some(parent) => {
                    let parent_layout = table
                        .layouts
                        .iter()
                        .find(|l| l.id == parent)
                        .ok_or_else(|| EmitError::internal(format!(
                            "parent {} of {} not yet laid out",
                            parent, decl.name
                        )))?;
                    (parent_layout.fields.clone(), parent_layout.vtable.clone())
                }
                None => (Vec::new(), Vec::new()),
            };

            for field in &decl.fields {
                let offset = fields.len() as u16;
                fields.push(FieldSlot {
                    name: field.name.clone(),
                    ty: field.ty.clone(),
                    offset,
                });
            }

            for method in &decl.methods {
                let func_index = method_funcs
                    .get(&(id.0, method.name.clone()))
                    .ok_or_else(|| EmitError::internal(format!(
                        "no function reserved for {}.{}",
                        decl.name, method.name
                    )))?;
                let func = FuncRef::Index(*func_index);
                match vtable.iter_mut().find(|slot| slot.name == method.name) {
                    Some(slot) => slot.func = func,
                    None => vtable.push(VtableSlot {
                        name: method.name.clone(),
                        func,
                    }),
                }
            }

            let ctor = match method_funcs.get(&(id.0, "constructor".to_string())) {
                Some(func_index) => Some(FuncRef::Index(*func_index)),
                None => decl
                    .parent
                    .and_then(|p| table.layouts.iter().find(|l| l.id == p))
                    .and_then(|l| l.ctor),
            };

            let mut layout = ClassLayout {
                id,
                name: decl.name.clone(),
                parent: decl.parent,
                fields,
                vtable,
                itable: Vec::new(),
                ctor,
            };

            // Resolve interface members against the finished vtable,
            // including interfaces inherited from ancestors.
            let mut seen = Vec::new();
            let mut cursor = Some(index);
            while let Some(ci) = cursor {
                let c = &program.classes[ci];
                for iface_id in &c.implements {
                    let iface = program.interface(*iface_id).ok_or_else(|| {
                        EmitError::internal(format!("missing interface {}", iface_id))
                    })?;
                    for sig in &iface.methods {
                        let member = table.iface_members[&sig.name];
                        if seen.contains(&member) {
                            continue;
                        }
                        let slot = layout
                            .vtable
                            .iter()
                            .position(|s| s.name == sig.name)
                            .ok_or_else(|| EmitError::UnknownMethod {
                                class: decl.name.clone(),
                                method: sig.name.clone(),
                            })?;
                        layout.itable.push((member, slot as u16));
                        seen.push(member);
                    }
                }
                cursor = c.parent.map(|p| p.0 as usize);
            }

            table.layouts.push(layout);
        }

        // Restore declaration order for id-based lookup.
        table.layouts.sort_by_key(|l| l.id.0);
        Ok(table)
    }

    /// Parent-before-child emission order; reports inheritance cycles.
    fn topo_order(program: &Program) -> EmitResult<Vec<usize>> {
        let n = program.classes.len();
        let mut order = Vec::with_capacity(n);
        let mut state = vec![0u8; n]; // 0 unvisited, 1 visiting, 2 done
        for root in 0..n {
            let mut chain = Vec::new();
            let mut i = root;
            loop {
                match state[i] {
                    2 => break,
                    1 => {
                        return Err(EmitError::InheritanceCycle {
                            class: program.classes[i].name.clone(),
                        })
                    }
                    _ => {}
                }
                state[i] = 1;
                chain.push(i);
                match program.classes[i].parent {
                    Some(p) => i = p.0 as usize,
                    None => break,
                }
            }
            for &i in chain.iter().rev() {
                state[i] = 2;
                order.push(i);
            }
        }
        Ok(order)
    }

    pub fn layout(&self, id: ClassId) -> Option<&ClassLayout> {
        self.layouts.get(id.0 as usize)
    }

    pub fn layouts(&self) -> &[ClassLayout] {
        &self.layouts
    }

    /// Walk the parent chain: is `actual` the target class or a subclass?
    pub fn is_instance(&self, actual: ClassId, target: ClassId) -> bool {
        let mut cursor = Some(actual);
        while let Some(id) = cursor {
            if id == target {
                return true;
            }
            cursor = self.layout(id).and_then(|l| l.parent);
        }
        false
    }

    /// Field slot by name, searching the full (inherited) list.
    pub fn field(&self, class: ClassId, name: &str) -> Option<&FieldSlot> {
        self.layout(class)?.fields.iter().find(|f| f.name == name)
    }

    /// Vtable slot index of a method.
    pub fn vtable_slot(&self, class: ClassId, method: &str) -> Option<u16> {
        self.layout(class)?
            .vtable
            .iter()
            .position(|s| s.name == method)
            .map(|i| i as u16)
    }

    /// Global interface member id for a method name.
    pub fn iface_member(&self, method: &str) -> Option<u16> {
        self.iface_members.get(method).copied()
    }

    /// Does any subclass of `class` override `method`? When none does the
    /// call site may be compiled as a direct call.
    pub fn overridden_below(&self, class: ClassId, method: &str) -> bool {
        self.layouts.iter().any(|l| {
            l.id != class
                && self.is_instance(l.id, class)
                && l.parent.is_some_and(|_| {
                    // Only a redeclaration in this class counts; inherited
                    // slots are shared with the parent.
                    self.declares_method(l.id, method)
                })
        })
    }

    fn declares_method(&self, class: ClassId, method: &str) -> bool {
        let Some(layout) = self.layout(class) else {
            return false;
        };
        let Some(slot) = layout.vtable.iter().find(|s| s.name == method) else {
            return false;
        };
        match layout.parent.and_then(|p| self.layout(p)) {
            Some(parent) => parent
                .vtable
                .iter()
                .find(|s| s.name == method)
                .map(|s| s.func != slot.func)
                .unwrap_or(true),
            None => true,
        }
    }

    /// Method return type, searching the declaration chain.
    pub fn method_ret(&self, program: &Program, class: ClassId, method: &str) -> Option<Ty> {
        let mut cursor = Some(class);
        while let Some(id) = cursor {
            let decl = program.class(id)?;
            if let Some(m) = decl.methods.iter().find(|m| m.name == method) {
                return Some(m.ret.clone());
            }
            cursor = decl.parent;
        }
        None
    }
}
