//! Runtime memory-model contract
//!
//! The embedded target has no tracing collector; every heap value carries a
//! count of live owners and storage is released the moment the count reaches
//! zero. This module states the contract every emitted instruction sequence
//! must honor. The emitter enforces it by inserting exactly one increment
//! per ownership gain and one decrement per release, and by statically
//! verifying that the arithmetic balances along every control-flow path.
//!
//! The rules:
//!
//! - Storing a heap value into a local, global, field or capture cell gains
//!   one owner; so does passing it by value into a parameter.
//! - A local or parameter going out of scope, a location being reassigned,
//!   and a temporary being discarded each release one owner.
//! - When a count reaches zero the value's storage is released and each
//!   owned sub-value is released recursively (the runtime's job, not the
//!   emitter's).
//! - Ownership is by reference for all heap types; no user-visible object is
//!   ever moved in place.
//! - Parent and other back-links inside class layouts are weak: stored as
//!   plain ids, never counted, so layout chains cannot form cycles of
//!   owners.
//! - Capture cells shared between a frame and its closures are themselves
//!   counted values; the last holder to release a cell releases the captured
//!   value inside it.
//! - A cancelled fiber releases every cell and local it currently owns by
//!   the normal decrement rules; cancellation never leaks or double-frees.

use serde::{Deserialize, Serialize};

/// The kind of holder gaining or releasing ownership of a heap value.
///
/// Carried on emitted count adjustments for diagnostics: when the static
/// balance check fails, the offending transfer kind names the broken rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerKind {
    /// A frame-resident local variable.
    Local,
    /// A by-value parameter of the callee.
    Param,
    /// A field of a class instance.
    Field,
    /// A heap capture cell shared with closures.
    Cell,
    /// A program-level variable.
    Global,
    /// An expression temporary.
    Temp,
}

impl std::fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OwnerKind::Local => "local",
            OwnerKind::Param => "param",
            OwnerKind::Field => "field",
            OwnerKind::Cell => "cell",
            OwnerKind::Global => "global",
            OwnerKind::Temp => "temp",
        };
        f.write_str(s)
    }
}
