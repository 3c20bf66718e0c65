//! The code-generator contract.
//!
//! The register allocator is a library invoked by a compiler driver; the
//! backend code generator is the one component it talks back to. The
//! `CodeGenerator` trait is that narrow interface: register-file shape,
//! calling-convention queries, and the single publish call through which the
//! allocator hands the backend its frame layout.

use crate::ir::{Block, Location, LocationSummary, Type};

/// Target and frame knowledge supplied by the backend code generator.
pub trait CodeGenerator {
    /// Number of core registers in the target's register file.
    fn num_core_registers(&self) -> usize;

    /// Number of floating-point registers in the target's register file.
    fn num_fp_registers(&self) -> usize;

    /// Is this core register globally unusable for the current function
    /// (stack pointer, thread register, ...)?
    fn is_blocked_core(&self, reg: usize) -> bool;

    /// Is this floating-point register globally unusable?
    fn is_blocked_fp(&self, reg: usize) -> bool;

    /// Is this core register callee-save under the target's convention?
    fn is_core_callee_save(&self, reg: usize) -> bool;

    /// Is this floating-point register callee-save?
    fn is_fp_callee_save(&self, reg: usize) -> bool;

    /// Does a value of this type occupy two consecutive registers?
    fn needs_two_registers(&self, ty: Type) -> bool;

    /// Size in bytes of a core register spill.
    fn word_size(&self) -> usize;

    /// Size in bytes of a floating-point register spill.
    fn fp_spill_slot_size(&self) -> usize;

    /// Number of registers a slow path must spill around the given
    /// safepoint, for one register bank.
    fn num_slow_path_spills(&self, locations: &LocationSummary, core_registers: bool) -> usize;

    /// The single publish-to-backend call: spill-slot count, worst-case
    /// safepoint spill size, reserved outgoing-argument slots, and the block
    /// order code will be emitted in. The backend derives the frame size.
    fn initialize_code_generation(
        &mut self,
        spill_slots: usize,
        max_safepoint_spill_size: usize,
        reserved_out_slots: usize,
        linear_order: &[Block],
    );

    /// Frame size in bytes. Valid after `initialize_code_generation`.
    fn frame_size(&self) -> usize;

    /// Record that a register was handed out, so the backend can compute its
    /// callee-save spill masks.
    fn add_allocated_register(&mut self, location: Location);

    /// Must 64-bit moves be decomposed into two 32-bit moves?
    fn should_split_long_moves(&self) -> bool;

    /// The stack slot (byte offset, pre-frame-adjustment) of the parameter
    /// with the given index.
    fn stack_slot_of_parameter(&self, parameter_index: usize) -> usize;
}
