//! Shared test support: a small graph builder and a configurable target
//! description, standing in for a real backend.

use crate::codegen::CodeGenerator;
use crate::ir::{
    Block, CallKind, Graph, Inst, InstKind, Location, LocationSummary, Policy, Type, VREG_SIZE,
};
use crate::liveness::Liveness;

/// A target description with a configurable register file.
pub struct TestCodeGenerator {
    pub num_core: usize,
    pub num_fp: usize,
    pub blocked_core: Vec<bool>,
    pub blocked_fp: Vec<bool>,
    pub callee_save_core: Vec<bool>,
    pub callee_save_fp: Vec<bool>,
    /// Whether 64-bit values need two consecutive registers.
    pub pairs_for_wide: bool,
    pub split_long_moves: bool,
    pub frame_size: usize,
    pub allocated: Vec<Location>,
    /// (spill_slots, max_safepoint_spill_size, reserved_out_slots) as
    /// published by the resolver.
    pub initialized: Option<(usize, usize, usize)>,
}

impl TestCodeGenerator {
    pub fn new(num_core: usize, num_fp: usize) -> Self {
        Self {
            num_core,
            num_fp,
            blocked_core: vec![false; num_core],
            blocked_fp: vec![false; num_fp],
            callee_save_core: vec![false; num_core],
            callee_save_fp: vec![false; num_fp],
            pairs_for_wide: false,
            split_long_moves: false,
            frame_size: 0,
            allocated: Vec::new(),
            initialized: None,
        }
    }

    pub fn core_only(num_core: usize) -> Self {
        Self::new(num_core, 0)
    }

    /// A 32-bit-style target where wide values occupy register pairs.
    pub fn with_pairs(num_core: usize, num_fp: usize) -> Self {
        let mut codegen = Self::new(num_core, num_fp);
        codegen.pairs_for_wide = true;
        codegen
    }
}

impl CodeGenerator for TestCodeGenerator {
    fn num_core_registers(&self) -> usize {
        self.num_core
    }

    fn num_fp_registers(&self) -> usize {
        self.num_fp
    }

    fn is_blocked_core(&self, reg: usize) -> bool {
        self.blocked_core[reg]
    }

    fn is_blocked_fp(&self, reg: usize) -> bool {
        self.blocked_fp[reg]
    }

    fn is_core_callee_save(&self, reg: usize) -> bool {
        self.callee_save_core[reg]
    }

    fn is_fp_callee_save(&self, reg: usize) -> bool {
        self.callee_save_fp[reg]
    }

    fn needs_two_registers(&self, ty: Type) -> bool {
        self.pairs_for_wide && ty.is_wide()
    }

    fn word_size(&self) -> usize {
        VREG_SIZE
    }

    fn fp_spill_slot_size(&self) -> usize {
        2 * VREG_SIZE
    }

    fn num_slow_path_spills(&self, locations: &LocationSummary, core_registers: bool) -> usize {
        let live = locations.live_registers();
        if core_registers {
            (0..self.num_core)
                .filter(|&r| live.contains_core_register(r) && !self.is_core_callee_save(r))
                .count()
        } else {
            (0..self.num_fp)
                .filter(|&r| live.contains_fp_register(r) && !self.is_fp_callee_save(r))
                .count()
        }
    }

    fn initialize_code_generation(
        &mut self,
        spill_slots: usize,
        max_safepoint_spill_size: usize,
        reserved_out_slots: usize,
        _linear_order: &[Block],
    ) {
        self.initialized = Some((spill_slots, max_safepoint_spill_size, reserved_out_slots));
        // Spills, outs, and the method pointer.
        self.frame_size = (spill_slots + reserved_out_slots + 1) * VREG_SIZE;
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn add_allocated_register(&mut self, location: Location) {
        self.allocated.push(location);
    }

    fn should_split_long_moves(&self) -> bool {
        self.split_long_moves
    }

    fn stack_slot_of_parameter(&self, parameter_index: usize) -> usize {
        parameter_index * VREG_SIZE
    }
}

/// Convenience wrapper for building small test graphs.
pub struct GraphBuilder {
    pub graph: Graph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self { graph: Graph::new() }
    }

    pub fn block(&mut self) -> Block {
        self.graph.add_block()
    }

    pub fn edge(&mut self, from: Block, to: Block) {
        self.graph.add_edge(from, to);
    }

    pub fn set_entry(&mut self, block: Block) {
        self.graph.set_entry_block(block);
    }

    pub fn set_exit(&mut self, block: Block) {
        self.graph.set_exit_block(block);
    }

    /// A value computed into any location.
    pub fn any_value(&mut self, block: Block, ty: Type) -> Inst {
        let inst = self.graph.add_inst(block, InstKind::Plain, ty, &[]);
        let mut locations = LocationSummary::new(CallKind::NoCall);
        locations.set_out(Location::Unallocated(Policy::Any));
        self.graph.set_locations(inst, locations);
        inst
    }

    /// A materializable constant.
    pub fn constant(&mut self, block: Block, ty: Type) -> Inst {
        let inst = self.graph.add_inst(block, InstKind::Constant, ty, &[]);
        let mut locations = LocationSummary::new(CallKind::NoCall);
        locations.set_out(Location::Constant(inst));
        self.graph.set_locations(inst, locations);
        inst
    }

    /// An incoming parameter, passed on the stack.
    pub fn parameter(&mut self, block: Block, index: usize, ty: Type) -> Inst {
        let inst = self.graph.add_inst(block, InstKind::Parameter(index), ty, &[]);
        let mut locations = LocationSummary::new(CallKind::NoCall);
        locations.set_out(Location::StackSlot(index * VREG_SIZE));
        self.graph.set_locations(inst, locations);
        inst
    }

    /// A two-input computation; `policy` constrains both inputs.
    pub fn binop(&mut self, block: Block, ty: Type, a: Inst, b: Inst, policy: Policy) -> Inst {
        let inst = self.graph.add_inst(block, InstKind::Plain, ty, &[a, b]);
        let mut locations = LocationSummary::new(CallKind::NoCall);
        locations.add_input(Location::Unallocated(policy));
        locations.add_input(Location::Unallocated(policy));
        locations.set_out(Location::Unallocated(Policy::Any));
        self.graph.set_locations(inst, locations);
        inst
    }

    /// A phi. `inputs` correspond to the block's predecessors in order.
    pub fn phi(&mut self, block: Block, ty: Type, vreg: u32, inputs: &[Inst]) -> Inst {
        let phi = self.graph.add_phi(block, ty, vreg, inputs);
        let mut locations = LocationSummary::new(CallKind::NoCall);
        for _ in inputs {
            locations.add_input(Location::Unallocated(Policy::Any));
        }
        locations.set_out(Location::Unallocated(Policy::Any));
        self.graph.set_locations(phi, locations);
        phi
    }

    /// An unconditional jump terminator.
    pub fn goto_(&mut self, block: Block) -> Inst {
        self.graph.add_inst(block, InstKind::ControlFlow, Type::Int32, &[])
    }

    /// A conditional branch terminator.
    pub fn if_(&mut self, block: Block, condition: Inst) -> Inst {
        let inst = self.graph.add_inst(block, InstKind::ControlFlow, Type::Int32, &[condition]);
        let mut locations = LocationSummary::new(CallKind::NoCall);
        locations.add_input(Location::Unallocated(Policy::Any));
        self.graph.set_locations(inst, locations);
        inst
    }

    /// A return terminator; the returned value must be in a register of its
    /// bank.
    pub fn ret(&mut self, block: Block, value: Option<Inst>) -> Inst {
        match value {
            None => self.graph.add_inst(block, InstKind::ControlFlow, Type::Int32, &[]),
            Some(value) => {
                let policy = if self.graph.ty(value).is_floating_point() {
                    Policy::RequiresFpuRegister
                } else {
                    Policy::RequiresRegister
                };
                let inst =
                    self.graph.add_inst(block, InstKind::ControlFlow, Type::Int32, &[value]);
                let mut locations = LocationSummary::new(CallKind::NoCall);
                locations.add_input(Location::Unallocated(policy));
                self.graph.set_locations(inst, locations);
                inst
            }
        }
    }

    /// A division-like instruction: first input pinned to register 0, and
    /// the output reusing the first input's register.
    pub fn div_fixed(&mut self, block: Block, a: Inst, b: Inst) -> Inst {
        let inst = self.graph.add_inst(block, InstKind::Plain, Type::Int32, &[a, b]);
        let mut locations = LocationSummary::new(CallKind::NoCall);
        locations.add_input(Location::Register(0));
        locations.add_input(Location::Unallocated(Policy::Any));
        locations.set_out(Location::Unallocated(Policy::SameAsFirstInput));
        self.graph.set_locations(inst, locations);
        inst
    }

    /// Run the CFG analyses and the liveness analysis.
    pub fn finish(mut self) -> (Graph, Liveness) {
        self.graph.analyze();
        let liveness = Liveness::compute(&mut self.graph);
        (self.graph, liveness)
    }

    /// Run only the CFG analyses; the caller drives liveness itself.
    pub fn finish_without_liveness(mut self) -> Graph {
        self.graph.analyze();
        self.graph
    }
}
