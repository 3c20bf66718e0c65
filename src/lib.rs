//! SSA register allocation library.
//!
//! Given a control-flow graph in Static Single Assignment form, together with
//! per-instruction location constraints supplied by a backend code generator,
//! this crate decides where every SSA value lives during execution, either in
//! one of the target's physical registers or in a stack spill slot, and
//! rewrites the program with the parallel moves needed to honor those choices
//! across splits, block boundaries, and phi merges.
//!
//! Two interchangeable strategies are provided behind one entry point: a
//! classical linear-scan allocator and a Chaitin-Briggs style graph-coloring
//! allocator with iterative move coalescing. Both consume the same liveness
//! representation (live intervals with ranges, uses, and safepoints) and feed
//! a common resolver that materializes moves and finalizes the stack frame.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub use cranelift_entity as entity;

pub mod bitset;
pub mod codegen;
pub mod ir;
pub mod linear_order;
pub mod liveness;
pub mod liverange;
pub mod regalloc;

#[cfg(test)]
pub(crate) mod test_util;

pub use crate::regalloc::{RegisterAllocator, Strategy};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
