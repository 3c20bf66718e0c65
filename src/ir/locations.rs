//! Locations and per-instruction location summaries.
//!
//! A `Location` describes where a value lives at some program point: a
//! register, a register pair, a stack slot, a constant, or a yet-unallocated
//! placeholder carrying the policy the allocator must satisfy. A
//! `LocationSummary` aggregates the locations of one instruction's inputs,
//! temporaries, and output, and is the contract between the backend code
//! generator and the register allocator: the backend seeds it with
//! constraints, the allocator rewrites it with concrete assignments.

use crate::bitset::BitVector;
use crate::ir::entities::Inst;

/// Size in bytes of one stack slot. 64-bit values occupy two.
pub const VREG_SIZE: usize = 4;

/// Allocation policy for an unallocated location.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Policy {
    /// Any location (register or stack) will do.
    Any,
    /// Must be in a core register.
    RequiresRegister,
    /// Must be in a floating-point register.
    RequiresFpuRegister,
    /// The output must reuse the location of the first input.
    SameAsFirstInput,
}

/// Where a value lives.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Location {
    /// No location. Used for unused inputs and instructions without output.
    Invalid,
    /// A core register.
    Register(usize),
    /// A floating-point register.
    FpuRegister(usize),
    /// Two core registers holding the low and high halves of a wide value.
    RegisterPair(usize, usize),
    /// Two floating-point registers holding the halves of a wide value.
    FpuRegisterPair(usize, usize),
    /// A single stack slot, as a byte offset.
    StackSlot(usize),
    /// Two consecutive stack slots, as a byte offset.
    DoubleStackSlot(usize),
    /// Four consecutive stack slots for a vector value, as a byte offset.
    SimdStackSlot(usize),
    /// The value is a constant defined by the given instruction and can be
    /// rematerialized at any point.
    Constant(Inst),
    /// Not yet allocated; the policy constrains what the allocator may pick.
    Unallocated(Policy),
}

impl Location {
    /// Is this anything other than `Invalid`?
    pub fn is_valid(self) -> bool {
        self != Location::Invalid
    }

    /// Is this an unallocated placeholder?
    pub fn is_unallocated(self) -> bool {
        match self {
            Location::Unallocated(_) => true,
            _ => false,
        }
    }

    /// The policy of an unallocated location.
    pub fn policy(self) -> Policy {
        match self {
            Location::Unallocated(policy) => policy,
            _ => panic!("policy() on allocated location {:?}", self),
        }
    }

    /// Is this a single core register?
    pub fn is_register(self) -> bool {
        match self {
            Location::Register(_) => true,
            _ => false,
        }
    }

    /// Is this a single floating-point register?
    pub fn is_fpu_register(self) -> bool {
        match self {
            Location::FpuRegister(_) => true,
            _ => false,
        }
    }

    /// Is this a register pair (core or floating-point)?
    pub fn is_pair(self) -> bool {
        match self {
            Location::RegisterPair(_, _) | Location::FpuRegisterPair(_, _) => true,
            _ => false,
        }
    }

    /// Is this any kind of register location?
    pub fn is_register_kind(self) -> bool {
        self.is_register() || self.is_fpu_register() || self.is_pair()
    }

    /// Is this a single stack slot?
    pub fn is_stack_slot(self) -> bool {
        match self {
            Location::StackSlot(_) => true,
            _ => false,
        }
    }

    /// Is this a double stack slot?
    pub fn is_double_stack_slot(self) -> bool {
        match self {
            Location::DoubleStackSlot(_) => true,
            _ => false,
        }
    }

    /// Is this a constant?
    pub fn is_constant(self) -> bool {
        match self {
            Location::Constant(_) => true,
            _ => false,
        }
    }

    /// The register number of a single-register location.
    pub fn reg(self) -> usize {
        match self {
            Location::Register(r) | Location::FpuRegister(r) => r,
            _ => panic!("reg() on {:?}", self),
        }
    }

    /// The low register of a pair.
    pub fn low(self) -> usize {
        match self {
            Location::RegisterPair(lo, _) | Location::FpuRegisterPair(lo, _) => lo,
            _ => panic!("low() on {:?}", self),
        }
    }

    /// The high register of a pair.
    pub fn high(self) -> usize {
        match self {
            Location::RegisterPair(_, hi) | Location::FpuRegisterPair(_, hi) => hi,
            _ => panic!("high() on {:?}", self),
        }
    }

    /// The register of a single-register location, or the low register of a
    /// pair.
    pub fn register_or_low(self) -> usize {
        match self {
            Location::Register(r) | Location::FpuRegister(r) => r,
            Location::RegisterPair(lo, _) | Location::FpuRegisterPair(lo, _) => lo,
            _ => panic!("register_or_low() on {:?}", self),
        }
    }

    /// The byte offset of a stack location.
    pub fn stack_index(self) -> usize {
        match self {
            Location::StackSlot(i) | Location::DoubleStackSlot(i) | Location::SimdStackSlot(i) => i,
            _ => panic!("stack_index() on {:?}", self),
        }
    }

    /// The location of the low half of a wide location.
    pub fn to_low(self) -> Location {
        match self {
            Location::RegisterPair(lo, _) => Location::Register(lo),
            Location::FpuRegisterPair(lo, _) => Location::FpuRegister(lo),
            Location::DoubleStackSlot(i) => Location::StackSlot(i),
            _ => panic!("to_low() on {:?}", self),
        }
    }

    /// The location of the high half of a wide location.
    pub fn to_high(self) -> Location {
        match self {
            Location::RegisterPair(_, hi) => Location::Register(hi),
            Location::FpuRegisterPair(_, hi) => Location::FpuRegister(hi),
            Location::DoubleStackSlot(i) => Location::StackSlot(i + VREG_SIZE),
            _ => panic!("to_high() on {:?}", self),
        }
    }

    /// Does an unallocated location demand some kind of register?
    pub fn requires_register_kind(self) -> bool {
        match self {
            Location::Unallocated(Policy::RequiresRegister)
            | Location::Unallocated(Policy::RequiresFpuRegister) => true,
            _ => false,
        }
    }
}

/// How an instruction interacts with the runtime.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CallKind {
    /// Never calls out; caller-save registers survive it.
    NoCall,
    /// Calls the runtime only on its slow path.
    CallOnSlowPath,
    /// Calls the runtime on the main path and may also call on a slow path.
    CallOnMainAndSlowPath,
    /// Calls the runtime on the main path only.
    CallOnMainOnly,
}

/// Registers recorded live across a safepoint, one mask per bank.
#[derive(Clone, Debug, Default)]
pub struct RegisterSet {
    core: u64,
    fp: u64,
}

impl RegisterSet {
    /// Record a single-register location as live.
    pub fn add(&mut self, location: Location) {
        match location {
            Location::Register(r) => self.core |= 1 << r,
            Location::FpuRegister(r) => self.fp |= 1 << r,
            _ => panic!("cannot record {:?} as a live register", location),
        }
    }

    /// Is the given core register recorded live?
    pub fn contains_core_register(&self, reg: usize) -> bool {
        (self.core & (1 << reg)) != 0
    }

    /// Is the given floating-point register recorded live?
    pub fn contains_fp_register(&self, reg: usize) -> bool {
        (self.fp & (1 << reg)) != 0
    }

    /// Number of live core registers.
    pub fn num_core_registers(&self) -> usize {
        self.core.count_ones() as usize
    }

    /// Number of live floating-point registers.
    pub fn num_fp_registers(&self) -> usize {
        self.fp.count_ones() as usize
    }
}

/// The locations of one instruction's operands, plus the safepoint
/// information the resolver records once allocation is complete.
#[derive(Clone, Debug)]
pub struct LocationSummary {
    inputs: Vec<Location>,
    temps: Vec<Location>,
    output: Location,
    call_kind: CallKind,
    output_overlaps: bool,
    // Safepoint bookkeeping, filled in by the resolver.
    live_registers: RegisterSet,
    register_mask: u64,
    stack_mask: BitVector,
}

impl LocationSummary {
    /// Create a summary with no operands and the given call kind.
    pub fn new(call_kind: CallKind) -> Self {
        Self {
            inputs: Vec::new(),
            temps: Vec::new(),
            output: Location::Invalid,
            call_kind,
            output_overlaps: true,
            live_registers: RegisterSet::default(),
            register_mask: 0,
            stack_mask: BitVector::new(),
        }
    }

    /// Append an input location.
    pub fn add_input(&mut self, location: Location) {
        self.inputs.push(location);
    }

    /// The location of input `index`.
    pub fn in_at(&self, index: usize) -> Location {
        self.inputs[index]
    }

    /// Overwrite the location of input `index`.
    pub fn set_in_at(&mut self, index: usize, location: Location) {
        self.inputs[index] = location;
    }

    /// Number of inputs.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Append a temporary location.
    pub fn add_temp(&mut self, location: Location) {
        self.temps.push(location);
    }

    /// The location of temporary `index`.
    pub fn temp_at(&self, index: usize) -> Location {
        self.temps[index]
    }

    /// Overwrite the location of temporary `index`.
    pub fn set_temp_at(&mut self, index: usize, location: Location) {
        self.temps[index] = location;
    }

    /// Number of temporaries.
    pub fn temp_count(&self) -> usize {
        self.temps.len()
    }

    /// The output location.
    pub fn out(&self) -> Location {
        self.output
    }

    /// Set the output location.
    pub fn set_out(&mut self, location: Location) {
        self.output = location;
    }

    /// Declare whether the output may share a register with a dying input.
    ///
    /// When `false`, the allocator is free to assign the output the register
    /// of an input that dies at this instruction.
    pub fn set_output_overlaps(&mut self, overlaps: bool) {
        self.output_overlaps = overlaps;
    }

    /// May the output overlap with the inputs?
    pub fn output_can_overlap_with_inputs(&self) -> bool {
        self.output_overlaps
    }

    /// Does this instruction call on its main path?
    pub fn will_call(&self) -> bool {
        match self.call_kind {
            CallKind::CallOnMainAndSlowPath | CallKind::CallOnMainOnly => true,
            _ => false,
        }
    }

    /// Does this instruction call only on a slow path?
    pub fn only_calls_on_slow_path(&self) -> bool {
        self.call_kind == CallKind::CallOnSlowPath
    }

    /// Does this instruction call on both the main path and a slow path?
    pub fn calls_on_main_and_slow_path(&self) -> bool {
        self.call_kind == CallKind::CallOnMainAndSlowPath
    }

    /// Can the runtime inspect live values at this instruction?
    pub fn needs_safepoint(&self) -> bool {
        self.call_kind != CallKind::NoCall
    }

    /// Is input `index` pinned to a specific register?
    pub fn is_fixed_input(&self, index: usize) -> bool {
        self.inputs[index].is_register_kind()
    }

    /// Must the output reuse the location of input `index`?
    pub fn output_uses_same_as(&self, index: usize) -> bool {
        index == 0 && self.output == Location::Unallocated(Policy::SameAsFirstInput)
    }

    /// Record a register as live across this safepoint.
    pub fn add_live_register(&mut self, location: Location) {
        self.live_registers.add(location);
    }

    /// The registers recorded live across this safepoint.
    pub fn live_registers(&self) -> &RegisterSet {
        &self.live_registers
    }

    /// Mark a core register as holding a heap reference at this safepoint.
    pub fn set_register_bit(&mut self, reg: usize) {
        self.register_mask |= 1 << reg;
    }

    /// The mask of core registers holding heap references.
    pub fn register_mask(&self) -> u64 {
        self.register_mask
    }

    /// Mark a stack slot as holding a heap reference at this safepoint.
    pub fn set_stack_bit(&mut self, slot: usize) {
        self.stack_mask.set_bit(slot);
    }

    /// Is the given stack slot marked as holding a heap reference?
    pub fn has_stack_bit(&self, slot: usize) -> bool {
        self.stack_mask.is_bit_set(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_halves() {
        let pair = Location::RegisterPair(2, 3);
        assert_eq!(pair.to_low(), Location::Register(2));
        assert_eq!(pair.to_high(), Location::Register(3));
        assert_eq!(pair.register_or_low(), 2);
        assert!(pair.is_register_kind());
        assert!(!pair.is_register());

        let slot = Location::DoubleStackSlot(16);
        assert_eq!(slot.to_low(), Location::StackSlot(16));
        assert_eq!(slot.to_high(), Location::StackSlot(20));
    }

    #[test]
    fn same_as_first_input() {
        let mut locations = LocationSummary::new(CallKind::NoCall);
        locations.add_input(Location::Unallocated(Policy::RequiresRegister));
        locations.add_input(Location::Unallocated(Policy::Any));
        locations.set_out(Location::Unallocated(Policy::SameAsFirstInput));
        assert!(locations.output_uses_same_as(0));
        assert!(!locations.output_uses_same_as(1));
        assert!(!locations.is_fixed_input(0));
        locations.set_in_at(0, Location::Register(4));
        assert!(locations.is_fixed_input(0));
    }
}
