//! Instruction-graph entity references.
//!
//! The allocator needs to reference blocks, instructions, and loops of the
//! function it is allocating for. These references are not implemented as
//! Rust references both because ownership and mutability rules make that
//! impractical for a graph, and because 64-bit pointers take up a lot of
//! space; we want a compact in-memory representation. Instead, entity
//! references are structs wrapping a `u32` index into a table in the `Graph`
//! main data structure. There is a separate index type for each entity type,
//! so we don't lose type safety.

use crate::entity::entity_impl;

/// An opaque reference to a basic block in a function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An opaque reference to an instruction.
///
/// An instruction defines at most one SSA value, so an `Inst` doubles as a
/// reference to the value it defines.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// An opaque reference to loop information attached to a loop header.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(u32);
entity_impl!(LoopId, "loop");

/// An opaque reference to a live interval in the interval arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntervalId(u32);
entity_impl!(IntervalId, "int");
