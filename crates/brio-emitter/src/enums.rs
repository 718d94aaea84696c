//! Enum constant allocation
//!
//! Enum members are compile-time integers; no enum object exists at
//! runtime. Members with explicit values keep them; the rest are allocated
//! here, skipping any value already taken.

use crate::error::EmitResult;
use brio_core::{EnumId, Program};
use rustc_hash::FxHashMap;

/// Pick the next free value given the values already assigned.
///
/// Plain enums count up from `start` (default 0); bit-mask enums take
/// successive powers of two.
pub fn allocate_enum_value(existing: &[i64], is_bitmask: bool, start: Option<i64>) -> i64 {
    if is_bitmask {
        let mut candidate = start.unwrap_or(1).max(1);
        // Round up to a power of two.
        while candidate & (candidate - 1) != 0 {
            candidate += 1;
        }
        while existing.contains(&candidate) {
            candidate <<= 1;
        }
        candidate
    } else {
        let mut candidate = start.unwrap_or(0);
        while existing.contains(&candidate) {
            candidate += 1;
        }
        candidate
    }
}

/// Resolved value of every enum member in a program.
#[derive(Debug, Default)]
pub struct EnumTable {
    values: FxHashMap<(EnumId, u32), i64>,
}

impl EnumTable {
    /// Allocate all member values. Explicit values are claimed first so
    /// later automatic members skip them regardless of declaration order.
    pub fn build(program: &Program) -> EmitResult<Self> {
        let mut table = EnumTable::default();
        for (index, decl) in program.enums.iter().enumerate() {
            let id = EnumId(index as u32);
            let mut taken: Vec<i64> = decl.members.iter().filter_map(|m| m.value).collect();
            for (member_index, member) in decl.members.iter().enumerate() {
                let value = match member.value {
                    Some(v) => v,
                    None => {
                        let v = allocate_enum_value(&taken, decl.is_bitmask, decl.start);
                        taken.push(v);
                        v
                    }
                };
                table.values.insert((id, member_index as u32), value);
            }
        }
        Ok(table)
    }

    /// Value of a member; `None` only for ids the program never declared.
    pub fn value(&self, enum_id: EnumId, member: u32) -> Option<i64> {
        self.values.get(&(enum_id, member)).copied()
    }
}
