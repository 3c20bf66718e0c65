//! Instruction-graph model: entities, types, locations, and the graph itself.

pub mod entities;
pub mod graph;
pub mod locations;
pub mod types;

pub use self::entities::{Block, Inst, IntervalId, LoopId};
pub use self::graph::{Graph, InstKind, MoveOperands, ParallelMove};
pub use self::locations::{CallKind, Location, LocationSummary, Policy, RegisterSet, VREG_SIZE};
pub use self::types::Type;
