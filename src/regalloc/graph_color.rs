//! Graph-coloring register allocation.
//!
//! The allocation problem is modeled as coloring an interference graph with
//! one node per live-interval sibling, `k` colors (the allowed registers),
//! and pre-colored nodes for physical registers. Coloring is optimistic in
//! the Chaitin-Briggs style: nodes are pruned from the graph while low
//! degree nodes remain guaranteed a color, then popped and colored; a node
//! that cannot be colored and requires a register causes its interval to be
//! split at its register uses and the whole attempt to be retried on the
//! sparser graph.
//!
//! Move coalescing is iterative: coalesce opportunities carry a priority
//! equal to the estimated runtime cost of the move they avoid, and are
//! merged with the conservative George (pre-colored) and Briggs (uncolored)
//! tests so that coalescing never turns a colorable graph uncolorable.
//!
//! A pair interval is a single node that needs two adjacent colors; edges
//! touching a pair node weigh 2 so that node degrees keep reflecting color
//! budgets.

use crate::entity::packed_option::PackedOption;
use crate::entity::{entity_impl, PrimaryMap, SecondaryMap};
use crate::bitset::BitVector;
use crate::codegen::CodeGenerator;
use crate::ir::{Graph, Inst, InstKind, IntervalId, Location, Policy, Type, VREG_SIZE};
use crate::liverange::find_matching_use_range;
use crate::liveness::Liveness;
use crate::regalloc::{resolver, split, split_between, validate_intervals};
use core::cmp::Ordering;
use log::debug;
use smallvec::SmallVec;
use std::collections::{BinaryHeap, VecDeque};

/// Highest number of registers supported on any target, so conflict masks
/// fit in a word.
const MAX_NUM_REGS: usize = 32;

// The maximum number of coloring attempts before triggering a debug assert.
// This catches changes that undermine the forward-progress guarantee:
// every failed attempt must split live intervals so that the interference
// graph eventually becomes sparse enough to color. The main threat is
// trying to split short intervals which cannot be split further; that is
// avoided by prioritizing short intervals, so that long intervals are the
// ones split when coloring fails.
const MAX_GRAPH_COLORING_ATTEMPTS_DEBUG: usize = 100;

// We always want to avoid spilling inside loops.
const LOOP_SPILL_WEIGHT_MULTIPLIER: usize = 10;

// Avoiding moves in single-jump blocks avoids jumps to jumps.
const SINGLE_JUMP_BLOCK_WEIGHT_MULTIPLIER: usize = 2;

// Blocks dominating the exit block execute on every path through the
// method.
const DOMINATES_EXIT_BLOCK_WEIGHT_MULTIPLIER: usize = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct NodeId(u32);
entity_impl!(NodeId);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct CoalesceId(u32);
entity_impl!(CoalesceId);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum CoalesceKind {
    /// Prevents moves at interval split points.
    AdjacentSibling,
    /// Prevents moves from a fixed output location.
    FixedOutputSibling,
    /// Prevents moves into a fixed input location.
    FixedInput,
    /// Prevents moves between blocks.
    NonlinearControlFlow,
    /// Prevents phi resolution moves.
    Phi,
    /// Prevents a single input move.
    FirstInput,
    /// May lead to better instruction selection, but not fewer moves.
    AnyInput,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum CoalesceStage {
    /// Currently in the iterative coalescing worklist.
    Worklist,
    /// Not in a worklist, but may be considered again.
    Active,
    /// No longer considered until last-chance coalescing.
    Inactive,
    /// The two nodes interfere, or have already been coalesced.
    Defunct,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum NodeStage {
    Precolored,
    Prunable,
    SimplifyWorklist,
    FreezeWorklist,
    SpillWorklist,
    Pruned,
}

struct CoalesceOpportunity {
    node_a: NodeId,
    node_b: NodeId,
    stage: CoalesceStage,
    priority: usize,
}

// Return the runtime cost of inserting a move at `position`.
fn cost_for_move_at(graph: &Graph, liveness: &Liveness, position: usize) -> usize {
    let block = liveness.block_from_position(graph, position);
    let mut cost = 1;
    if graph.is_single_jump(block) {
        cost *= SINGLE_JUMP_BLOCK_WEIGHT_MULTIPLIER;
    }
    if graph.dominates_exit(block) {
        cost *= DOMINATES_EXIT_BLOCK_WEIGHT_MULTIPLIER;
    }
    for _ in 0..graph.loop_depth(block) {
        cost *= LOOP_SPILL_WEIGHT_MULTIPLIER;
    }
    cost
}

fn compute_coalesce_priority(
    graph: &Graph,
    liveness: &Liveness,
    kind: CoalesceKind,
    position: usize,
) -> usize {
    if kind == CoalesceKind::AnyInput {
        // Affects instruction selection but not moves: lowest priority.
        0
    } else {
        cost_for_move_at(graph, liveness, position)
    }
}

// The estimated cost of spilling a particular live interval.
fn compute_spill_weight(graph: &Graph, liveness: &Liveness, interval: IntervalId) -> f32 {
    let arena = liveness.intervals();
    if arena[interval].has_register() {
        // Intervals with a fixed register cannot be spilled.
        return core::f32::MIN_POSITIVE;
    }

    let length = arena[interval].length();
    if length == 1 {
        // Tiny intervals cannot be split further; give them maximum
        // priority.
        return core::f32::MAX;
    }

    let mut use_weight = 0;
    if arena[interval].defined_by().is_some()
        && arena.definition_requires_register(graph, interval)
    {
        // Cost of spilling at a register definition point.
        use_weight += cost_for_move_at(graph, liveness, arena[interval].start() + 1);
    }

    let start = arena[interval].start();
    let end = arena[interval].end();
    let uses = arena.uses(interval);
    let (lo, hi) = find_matching_use_range(uses, |u| u.position(), start + 1, end + 1);
    for use_ in &uses[lo..hi] {
        if let Some(user) = use_.user() {
            if use_.requires_register(graph) {
                // Cost of spilling at a register use point.
                use_weight +=
                    cost_for_move_at(graph, liveness, graph.lifetime_position(user) - 1);
            }
        }
    }

    // Divide by length to prioritize short intervals: splitting them
    // further does not help.
    use_weight as f32 / length as f32
}

struct InterferenceNode {
    /// Which worklist the node currently belongs to.
    stage: NodeStage,
    interval: IntervalId,
    /// Unsorted adjacency vector; tree and hash sets are too heavy at the
    /// set sizes we see.
    adjacent: SmallVec<[NodeId; 4]>,
    coalesce_opportunities: SmallVec<[CoalesceId; 2]>,
    /// The maximum number of colors this node could interfere with: edges
    /// to pair nodes count twice. Pre-colored nodes have infinite degree.
    out_degree: usize,
    /// Union-find alias; points at the node this one was coalesced into.
    alias: NodeId,
    spill_weight: f32,
    requires_color: bool,
    needs_spill_slot: bool,
    is_pair: bool,
    precolored: bool,
}

impl InterferenceNode {
    fn edge_weight_with(&self, other: &InterferenceNode) -> usize {
        if self.is_pair || other.is_pair {
            2
        } else {
            1
        }
    }
}

// Pruning order: nodes that require a register outrank those that do not,
// then higher spill weight first. The spill worklist pops the *lowest*
// priority node, committing it to pruning early and a worse chance of a
// color; that is the optimistic step.
struct SpillCandidate {
    node: NodeId,
    requires_color: bool,
    spill_weight: f32,
}

impl PartialEq for SpillCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for SpillCandidate {}

impl PartialOrd for SpillCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SpillCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // The heap pops its maximum: order lowest priority as greatest.
        other
            .requires_color
            .cmp(&self.requires_color)
            .then(
                other
                    .spill_weight
                    .partial_cmp(&self.spill_weight)
                    .expect("spill weights are never NaN"),
            )
            .then(other.node.cmp(&self.node))
    }
}

// The coalesce worklist pops the highest priority opportunity.
struct CoalesceCandidate {
    id: CoalesceId,
    priority: usize,
}

impl PartialEq for CoalesceCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for CoalesceCandidate {}

impl PartialOrd for CoalesceCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CoalesceCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(other.id.cmp(&self.id))
    }
}

/// The graph-coloring strategy.
pub struct GraphColorAllocator<'a> {
    graph: &'a mut Graph,
    codegen: &'a mut dyn CodeGenerator,
    liveness: &'a mut Liveness,
    iterative_move_coalescing: bool,
    core_intervals: Vec<IntervalId>,
    fp_intervals: Vec<IntervalId>,
    temp_intervals: Vec<IntervalId>,
    safepoints: Vec<Inst>,
    /// Fixed intervals for every physical register, by register number.
    physical_core_intervals: Vec<IntervalId>,
    physical_fp_intervals: Vec<IntervalId>,
    num_int_spill_slots: usize,
    num_double_spill_slots: usize,
    num_float_spill_slots: usize,
    num_long_spill_slots: usize,
    catch_phi_spill_slot_counter: usize,
    reserved_art_method_slots: usize,
    reserved_out_slots: usize,
}

impl<'a> GraphColorAllocator<'a> {
    /// Create a graph-coloring allocator over the given graph and liveness.
    pub fn new(
        graph: &'a mut Graph,
        codegen: &'a mut dyn CodeGenerator,
        liveness: &'a mut Liveness,
        iterative_move_coalescing: bool,
    ) -> Self {
        let mut physical_core_intervals = Vec::with_capacity(codegen.num_core_registers());
        let mut physical_fp_intervals = Vec::with_capacity(codegen.num_fp_registers());
        let mut core_intervals = Vec::new();
        let mut fp_intervals = Vec::new();
        let max_position = liveness.max_lifetime_position();

        // Physical register live intervals, including globally blocked
        // registers such as the stack pointer.
        for reg in 0..codegen.num_core_registers() {
            let interval = liveness.intervals_mut().make_fixed(reg, Type::Int32);
            physical_core_intervals.push(interval);
            core_intervals.push(interval);
            if codegen.is_blocked_core(reg) {
                liveness.intervals_mut()[interval].add_range(0, max_position);
            }
        }
        for reg in 0..codegen.num_fp_registers() {
            let interval = liveness.intervals_mut().make_fixed(reg, Type::Float32);
            physical_fp_intervals.push(interval);
            fp_intervals.push(interval);
            if codegen.is_blocked_fp(reg) {
                liveness.intervals_mut()[interval].add_range(0, max_position);
            }
        }

        let reserved_art_method_slots = codegen.word_size() / VREG_SIZE;
        let reserved_out_slots = graph.max_out_vregs();
        Self {
            graph,
            codegen,
            liveness,
            iterative_move_coalescing,
            core_intervals,
            fp_intervals,
            temp_intervals: Vec::new(),
            safepoints: Vec::new(),
            physical_core_intervals,
            physical_fp_intervals,
            num_int_spill_slots: 0,
            num_double_spill_slots: 0,
            num_float_spill_slots: 0,
            num_long_spill_slots: 0,
            catch_phi_spill_slot_counter: 0,
            reserved_art_method_slots,
            reserved_out_slots,
        }
    }

    /// Run allocation and resolution.
    pub fn allocate(&mut self) {
        // (1) Collect and prepare live intervals.
        self.process_instructions();

        for &processing_core_regs in &[true, false] {
            let num_registers = if processing_core_regs {
                self.codegen.num_core_registers()
            } else {
                self.codegen.num_fp_registers()
            };

            let mut attempt = 0;
            loop {
                attempt += 1;
                debug_assert!(
                    attempt <= MAX_GRAPH_COLORING_ATTEMPTS_DEBUG,
                    "Exceeded the max number of graph coloring attempts. The allocator is not \
                     making forward progress, most likely because the wrong live intervals are \
                     being prioritized: short intervals must win over long ones, because they \
                     cannot be split further."
                );

                // Every coloring attempt works on fresh data structures, so
                // failed attempts do not accumulate memory.
                let mut iteration = ColoringIteration::new(processing_core_regs, num_registers);

                let intervals = if processing_core_regs {
                    self.core_intervals.clone()
                } else {
                    self.fp_intervals.clone()
                };
                let physical_intervals = if processing_core_regs {
                    self.physical_core_intervals.clone()
                } else {
                    self.physical_fp_intervals.clone()
                };

                // (2) Build the interference graph.
                iteration.build_interference_graph(
                    self.graph,
                    self.liveness,
                    &intervals,
                    &physical_intervals,
                );

                // (3) Add coalesce opportunities. After suspiciously many
                //     attempts, give up on coalescing in case its
                //     heuristics are not conservative.
                if self.iterative_move_coalescing && attempt <= MAX_GRAPH_COLORING_ATTEMPTS_DEBUG {
                    iteration.find_coalesce_opportunities(self.graph, self.liveness);
                }

                // (4) Prune all uncolored nodes.
                iteration.prune_interference_graph(self.liveness);

                // (5) Color pruned nodes based on interferences.
                let successful = iteration.color_interference_graph(
                    self.graph,
                    self.liveness,
                    self.codegen,
                );

                if successful {
                    debug!(
                        "graph color: {} bank colored after {} attempt(s)",
                        if processing_core_regs { "core" } else { "fp" },
                        attempt
                    );
                    self.allocate_spill_slots(&iteration);

                    // Tell the code generator which registers were handed
                    // out. Fixed intervals were reported while processing
                    // instructions.
                    for &node in &iteration.prunable_nodes {
                        let interval = iteration.nodes[node].interval;
                        let arena = self.liveness.intervals();
                        if let Some(reg) = arena[interval].register() {
                            let low = if processing_core_regs {
                                Location::Register(reg)
                            } else {
                                Location::FpuRegister(reg)
                            };
                            let high = if arena.has_high(interval) {
                                let high_reg =
                                    arena[arena.high_of(interval)].register().expect("pair half");
                                Some(if processing_core_regs {
                                    Location::Register(high_reg)
                                } else {
                                    Location::FpuRegister(high_reg)
                                })
                            } else {
                                None
                            };
                            self.codegen.add_allocated_register(low);
                            if let Some(high) = high {
                                self.codegen.add_allocated_register(high);
                            }
                        } else {
                            debug_assert!(
                                !arena.has_high(interval)
                                    || !arena[arena.high_of(interval)].has_register()
                            );
                        }
                    }
                    break;
                }
            }
        }

        // (6) Resolve locations and deconstruct SSA form.
        resolver::resolve(
            self.graph,
            self.codegen,
            self.liveness,
            &self.safepoints,
            self.reserved_art_method_slots + self.reserved_out_slots,
            self.num_int_spill_slots,
            self.num_long_spill_slots,
            self.num_float_spill_slots,
            self.num_double_spill_slots,
            self.catch_phi_spill_slot_counter,
            &self.temp_intervals,
        );

        if cfg!(debug_assertions) {
            self.validate(true);
        }
    }

    /// Check both register banks for conflicting assignments.
    pub fn validate(&self, log_fatal_on_failure: bool) -> bool {
        for &processing_core_regs in &[true, false] {
            let arena = self.liveness.intervals();
            let mut intervals = Vec::new();
            for i in 0..self.liveness.num_ssa_values() {
                let inst = self.liveness.instruction_from_ssa_index(i);
                if let Some(interval) = self.liveness.interval_of(inst) {
                    let is_core = !arena[interval].ty().is_floating_point();
                    if is_core == processing_core_regs {
                        intervals.push(interval);
                    }
                }
            }
            for &temp in &self.temp_intervals {
                let is_core = !arena[temp].ty().is_floating_point();
                if is_core == processing_core_regs {
                    intervals.push(temp);
                }
            }

            let spill_slots = self.num_int_spill_slots
                + self.num_long_spill_slots
                + self.num_float_spill_slots
                + self.num_double_spill_slots
                + self.catch_phi_spill_slot_counter;
            if !validate_intervals(
                self.graph,
                self.liveness,
                self.codegen,
                &intervals,
                spill_slots,
                self.reserved_art_method_slots + self.reserved_out_slots,
                processing_core_regs,
                log_fatal_on_failure,
            ) {
                return false;
            }
        }
        true
    }

    fn process_instructions(&mut self) {
        let order: Vec<_> = self.graph.linear_order().to_vec();
        for &block in order.iter().rev() {
            // The backward walk keeps `add_range` positions decreasing.
            let insts: Vec<Inst> = self.graph.insts(block).to_vec();
            for &inst in insts.iter().rev() {
                self.process_instruction(inst);
            }
            let phis: Vec<Inst> = self.graph.phis(block).to_vec();
            for &phi in &phis {
                self.process_instruction(phi);
            }

            if self.graph.is_catch_block(block) || self.graph.is_irreducible_header(block) {
                // Block all registers at the top of catch blocks and
                // irreducible loop headers, forcing their live-in values to
                // be spilled.
                let position = self.graph.lifetime_start(block);
                self.block_registers(position, position + 1, false);
            }
        }
    }

    fn process_instruction(&mut self, inst: Inst) {
        if self.graph.locations(inst).is_none() {
            return;
        }

        self.check_for_temp_live_intervals(inst);
        self.check_for_safepoint(inst);
        if self.graph.locations(inst).unwrap().will_call() {
            // A call clobbers caller-save registers; fixed intervals keep
            // values out of them across the call.
            let position = self.graph.lifetime_position(inst);
            self.block_registers(position, position + 1, /* caller_save_only */ true);
        }
        self.check_for_fixed_inputs(inst);

        let interval = match self.liveness.interval_of(inst) {
            Some(interval) => interval,
            // Instructions lacking a used output have no live interval.
            None => return,
        };

        // Low intervals act as representatives for their high half.
        debug_assert!(!self.liveness.intervals().is_high(interval));
        if self.codegen.needs_two_registers(self.graph.ty(inst)) {
            self.liveness.intervals_mut().add_high_sibling(interval, false);
        }
        self.add_safepoints_for(inst);
        self.check_for_fixed_output(inst);
        self.allocate_spill_slot_for_catch_phi(inst);

        let is_core = !self.graph.ty(inst).is_floating_point();
        let arena = self.liveness.intervals();
        if arena[interval].has_spill_slot() || self.graph.is_constant(inst) {
            // The value already lives on the stack (e.g. parameters), or is
            // materializable at any point: a register is only needed from
            // just before its first register use.
            if let Some(first_register_use) = arena.first_register_use(self.graph, interval) {
                let start = arena[interval].start();
                let new_interval = split_between(
                    self.graph,
                    self.liveness,
                    interval,
                    start,
                    first_register_use - 1,
                );
                if is_core {
                    self.core_intervals.push(new_interval);
                } else {
                    self.fp_intervals.push(new_interval);
                }
            } else {
                // We won't allocate a register for this value.
            }
        } else if is_core {
            self.core_intervals.push(interval);
        } else {
            self.fp_intervals.push(interval);
        }
    }

    fn check_for_fixed_inputs(&mut self, inst: Inst) {
        // Block the physical registers of fixed inputs. Coalescing the
        // physical register with the input's own interval would be better,
        // but a value can be used in several fixed registers at the same
        // instruction, and fixed inputs of calls are clobbered besides.
        let position = self.graph.lifetime_position(inst);
        let input_count = self.graph.locations(inst).unwrap().input_count();
        for i in 0..input_count {
            let input = self.graph.locations(inst).unwrap().in_at(i);
            if input.is_register() || input.is_fpu_register() {
                self.block_register(input, position, position + 1);
                self.codegen.add_allocated_register(input);
            } else if input.is_pair() {
                self.block_register(input.to_low(), position, position + 1);
                self.block_register(input.to_high(), position, position + 1);
                self.codegen.add_allocated_register(input.to_low());
                self.codegen.add_allocated_register(input.to_high());
            }
        }
    }

    fn check_for_fixed_output(&mut self, inst: Inst) {
        // An instruction with a fixed output gets that register up front,
        // and is split just after its definition so the fixed node creates
        // as few interferences as possible.
        let interval = self.liveness.interval_of(inst).unwrap();
        let position = self.graph.lifetime_position(inst);
        debug_assert!(self.liveness.intervals()[interval].end() - position >= 2);

        let mut out = self.graph.locations(inst).unwrap().out();
        if out.is_unallocated() && out.policy() == Policy::SameAsFirstInput {
            out = self.graph.locations(inst).unwrap().in_at(0);
        }

        if out.is_register() || out.is_fpu_register() {
            self.liveness.intervals_mut()[interval].set_register(out.reg());
            self.codegen.add_allocated_register(out);
            split(self.liveness.intervals_mut(), interval, position + 1);
        } else if out.is_pair() {
            self.liveness.intervals_mut()[interval].set_register(out.low());
            let high = self.liveness.intervals().high_of(interval);
            self.liveness.intervals_mut()[high].set_register(out.high());
            self.codegen.add_allocated_register(out.to_low());
            self.codegen.add_allocated_register(out.to_high());
            split(self.liveness.intervals_mut(), interval, position + 1);
        } else if out.is_stack_slot() || out.is_double_stack_slot() {
            self.liveness.intervals_mut()[interval].set_spill_slot(out.stack_index());
        } else {
            debug_assert!(!out.is_valid() || out.is_unallocated() || out.is_constant());
        }
    }

    fn add_safepoints_for(&mut self, inst: Inst) {
        let interval = self.liveness.interval_of(inst).unwrap();
        for safepoint_index in (0..self.safepoints.len()).rev() {
            let safepoint = self.safepoints[safepoint_index];
            let safepoint_position = self.graph.lifetime_position(safepoint);
            let arena = self.liveness.intervals();
            if safepoint_position == arena[interval].start() {
                // The safepoint is for this instruction; its own location
                // does not need to be saved.
                debug_assert_eq!(safepoint_index, self.safepoints.len() - 1);
                debug_assert_eq!(safepoint, inst);
                continue;
            } else if arena[interval].is_dead_at(safepoint_position) {
                break;
            } else if !arena[interval].covers(safepoint_position) {
                // Hole in the interval.
                continue;
            }
            self.liveness.intervals_mut()[interval].add_safepoint(safepoint, safepoint_position);
        }
        self.liveness.intervals()[interval].reset_search_cache();
    }

    fn check_for_temp_live_intervals(&mut self, inst: Inst) {
        let position = self.graph.lifetime_position(inst);
        let temp_count = self.graph.locations(inst).unwrap().temp_count();
        for i in 0..temp_count {
            let temp = self.graph.locations(inst).unwrap().temp_at(i);
            match temp {
                Location::Register(_) | Location::FpuRegister(_) => {
                    self.block_register(temp, position, position + 1);
                    self.codegen.add_allocated_register(temp);
                }
                Location::Unallocated(Policy::RequiresRegister) => {
                    let interval = self.liveness.intervals_mut().make_temp(Type::Int32);
                    self.liveness.intervals_mut().add_temp_use(self.graph, interval, inst, i);
                    self.core_intervals.push(interval);
                    self.temp_intervals.push(interval);
                }
                Location::Unallocated(Policy::RequiresFpuRegister) => {
                    let interval = self.liveness.intervals_mut().make_temp(Type::Float64);
                    self.liveness.intervals_mut().add_temp_use(self.graph, interval, inst, i);
                    self.fp_intervals.push(interval);
                    self.temp_intervals.push(interval);
                    if self.codegen.needs_two_registers(Type::Float64) {
                        let high = self.liveness.intervals_mut().add_high_sibling(interval, true);
                        self.temp_intervals.push(high);
                    }
                }
                _ => panic!("unexpected policy for temporary location {:?}", temp),
            }
        }
    }

    fn check_for_safepoint(&mut self, inst: Inst) {
        if self.graph.locations(inst).unwrap().needs_safepoint() {
            self.safepoints.push(inst);
        }
    }

    fn allocate_spill_slot_for_catch_phi(&mut self, inst: Inst) {
        if !self.graph.is_catch_phi(inst) {
            return;
        }
        let interval = self.liveness.interval_of(inst).unwrap();
        let block = self.graph.block_of(inst);
        let phis = self.graph.phis(block);
        let index = phis.iter().position(|&p| p == inst).unwrap();
        let previous = if index > 0 { Some(phis[index - 1]) } else { None };

        if let Some(previous) = previous.filter(|&p| self.graph.is_vreg_equivalent(inst, p)) {
            // An equivalent of the previous phi shares its slot.
            let prev_interval = self.liveness.interval_of(previous).unwrap();
            let slot = self.liveness.intervals()[prev_interval]
                .spill_slot()
                .expect("equivalent catch phi not yet assigned");
            self.liveness.intervals_mut()[interval].set_spill_slot(slot);
        } else {
            let slot = self.catch_phi_spill_slot_counter;
            self.liveness.intervals_mut()[interval].set_spill_slot(slot);
            self.catch_phi_spill_slot_counter += self
                .liveness
                .intervals()
                .number_of_spill_slots_needed(self.graph, interval);
        }
    }

    fn block_register(&mut self, location: Location, start: usize, end: usize) {
        debug_assert!(location.is_register() || location.is_fpu_register());
        let reg = location.reg();
        let interval = if location.is_register() {
            self.physical_core_intervals[reg]
        } else {
            self.physical_fp_intervals[reg]
        };
        debug_assert_eq!(self.liveness.intervals()[interval].register(), Some(reg));
        let blocked_by_codegen = if location.is_register() {
            self.codegen.is_blocked_core(reg)
        } else {
            self.codegen.is_blocked_fp(reg)
        };
        if blocked_by_codegen {
            // The whole method already blocks this register; adding a range
            // inside another range would violate add_range's contract.
        } else {
            self.liveness.intervals_mut()[interval].add_range(start, end);
        }
    }

    fn block_registers(&mut self, start: usize, end: usize, caller_save_only: bool) {
        for reg in 0..self.codegen.num_core_registers() {
            if !caller_save_only || !self.codegen.is_core_callee_save(reg) {
                self.block_register(Location::Register(reg), start, end);
            }
        }
        for reg in 0..self.codegen.num_fp_registers() {
            if !caller_save_only || !self.codegen.is_fp_callee_save(reg) {
                self.block_register(Location::FpuRegister(reg), start, end);
            }
        }
    }

    fn allocate_spill_slots(&mut self, iteration: &ColoringIteration) {
        // The resolver organizes the stack by value type, so slots are
        // assigned per type.
        let mut double_intervals = Vec::new();
        let mut long_intervals = Vec::new();
        let mut float_intervals = Vec::new();
        let mut int_intervals = Vec::new();

        // Multiple siblings of one value may request a slot; handle each
        // parent once.
        let mut seen: Vec<IntervalId> = Vec::new();

        for &node in &iteration.prunable_nodes {
            if !iteration.nodes[node].needs_spill_slot {
                continue;
            }
            let arena = self.liveness.intervals();
            let parent = arena.parent(iteration.nodes[node].interval);
            if seen.contains(&parent) {
                continue;
            }
            seen.push(parent);

            let defined_by = arena[parent].defined_by();
            if arena[parent].has_spill_slot() {
                // Already has a slot to reuse.
            } else if let Some(d) = defined_by.filter(|&d| self.graph.is_parameter(d)) {
                // Parameters already have a stack slot.
                let index = match self.graph.kind(d) {
                    InstKind::Parameter(index) => index,
                    _ => unreachable!(),
                };
                let slot = self.codegen.stack_slot_of_parameter(index);
                self.liveness.intervals_mut()[parent].set_spill_slot(slot);
            } else if defined_by.map_or(false, |d| self.graph.is_current_method(d)) {
                // The current method is always at stack slot 0.
                self.liveness.intervals_mut()[parent].set_spill_slot(0);
            } else if defined_by.map_or(false, |d| self.graph.is_constant(d)) {
                // Constants don't need a spill slot; they rematerialize.
            } else {
                match self.liveness.intervals()[iteration.nodes[node].interval].ty() {
                    Type::Float64 => double_intervals.push(parent),
                    Type::Int64 | Type::Uint64 => long_intervals.push(parent),
                    Type::Float32 => float_intervals.push(parent),
                    _ => int_intervals.push(parent),
                }
            }
        }

        let (graph, liveness) = (&*self.graph, &mut *self.liveness);
        color_spill_slots(graph, liveness, &double_intervals, &mut self.num_double_spill_slots);
        color_spill_slots(graph, liveness, &long_intervals, &mut self.num_long_spill_slots);
        color_spill_slots(graph, liveness, &float_intervals, &mut self.num_float_spill_slots);
        color_spill_slots(graph, liveness, &int_intervals, &mut self.num_int_spill_slots);
    }
}

// Spill slots are assigned to all siblings of a value at once, so the
// attempt's interference graph cannot be reused: sweep interval endpoints
// instead and hand each starting parent the lowest free slot, ignoring
// lifetime holes.
fn color_spill_slots(
    graph: &Graph,
    liveness: &mut Liveness,
    intervals: &[IntervalId],
    num_stack_slots_used: &mut usize,
) {
    let mut endpoints: Vec<(usize, bool, IntervalId)> = Vec::with_capacity(intervals.len() * 2);
    for &parent in intervals {
        let arena = liveness.intervals();
        debug_assert!(arena.is_parent(parent));
        debug_assert!(!arena[parent].has_spill_slot());
        let start = arena[parent].start();
        let end = arena[arena.last_sibling(parent)].end();
        debug_assert!(start < end);
        endpoints.push((start, true, parent));
        endpoints.push((end, false, parent));
    }

    // Sort by position, ends before starts; the interval is ignored to keep
    // determinism.
    endpoints.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    let mut taken = BitVector::new();
    for &(position, is_interval_beginning, parent) in &endpoints {
        let needed = liveness.intervals().number_of_spill_slots_needed(graph, parent);

        if is_interval_beginning {
            debug_assert!(!liveness.intervals()[parent].has_spill_slot());
            debug_assert_eq!(position, liveness.intervals()[parent].start());

            // First fit.
            let mut slot = 0;
            while (slot..slot + needed).any(|s| taken.is_bit_set(s)) {
                slot += 1;
            }

            liveness.intervals_mut()[parent].set_spill_slot(slot);

            *num_stack_slots_used = core::cmp::max(*num_stack_slots_used, slot + needed);
            if needed > 1 && *num_stack_slots_used % 2 != 0 {
                // The parallel move resolver requires an even number of
                // slots for pair value types.
                *num_stack_slots_used += 1;
            }

            for s in slot..slot + needed {
                taken.set_bit(s);
            }
        } else {
            let slot = liveness.intervals()[parent].spill_slot().unwrap();
            for s in slot..slot + needed {
                debug_assert!(taken.is_bit_set(s));
                taken.clear_bit(s);
            }
        }
    }
    debug_assert_eq!(taken.count_ones(), 0);
}

fn try_split(liveness: &mut Liveness, interval: IntervalId, position: usize) -> IntervalId {
    let (start, end) = {
        let arena = liveness.intervals();
        (arena[interval].start(), arena[interval].end())
    };
    if start < position && position < end {
        split(liveness.intervals_mut(), interval, position)
    } else {
        interval
    }
}

// Make the interference graph sparser by splitting the interval around each
// of its register uses.
fn split_at_register_uses(graph: &Graph, liveness: &mut Liveness, interval: IntervalId) {
    debug_assert!(!liveness.intervals().is_high(interval));

    let mut interval = interval;

    // Split just after a register definition.
    {
        let arena = liveness.intervals();
        if arena.is_parent(interval)
            && arena[interval].defined_by().is_some()
            && arena.definition_requires_register(graph, interval)
        {
            let start = arena[interval].start();
            interval = try_split(liveness, interval, start + 1);
        }
    }

    // Snapshot the register uses in [start, end] before splitting moves the
    // interval's bounds.
    let window: Vec<usize> = {
        let arena = liveness.intervals();
        let start = arena[interval].start();
        let end = arena[interval].end();
        let uses = arena.uses(interval);
        let (lo, hi) = find_matching_use_range(uses, |u| u.position(), start, end + 1);
        uses[lo..hi]
            .iter()
            .filter(|u| u.requires_register(graph))
            .map(|u| u.position())
            .collect()
    };

    for position in window {
        interval = try_split(liveness, interval, position - 1);
        let at_control_flow = liveness
            .instruction_from_position(position / 2)
            .map_or(false, |at| graph.is_control_flow(at));
        if at_control_flow {
            // At the very end of a basic block we cannot split right at the
            // use; split just after instead.
            interval = try_split(liveness, interval, position + 1);
        } else {
            interval = try_split(liveness, interval, position);
        }
    }
}

// Returns true when `in_node` is an input of the instruction defining
// `out_node`, dying there, and that instruction allows its output to share
// the input's register.
fn check_input_output_can_overlap(
    graph: &Graph,
    liveness: &Liveness,
    nodes: &PrimaryMap<NodeId, InterferenceNode>,
    in_node: NodeId,
    out_node: NodeId,
) -> bool {
    let arena = liveness.intervals();
    let output_interval = nodes[out_node].interval;
    let defined_by = match arena[output_interval].defined_by() {
        Some(defined_by) => defined_by,
        // Not a definition point.
        None => return false,
    };

    let locations = graph.locations(defined_by).expect("definition has no locations");
    if locations.output_can_overlap_with_inputs() {
        return false;
    }

    let input_interval = nodes[in_node].interval;
    let def_position = graph.lifetime_position(defined_by);
    let use_position = def_position + 1;

    if let Some(next_sibling) = arena.next_sibling(input_interval) {
        if arena[next_sibling].start() == use_position {
            // Reusing the input register would clobber the input before it
            // moves into its sibling's location.
            return false;
        }
    }

    if !arena[input_interval].is_dead_at(use_position) && arena[input_interval].covers_slow(use_position) {
        // The input is live after the use position.
        return false;
    }

    for &input in graph.inputs(defined_by) {
        if let Some(parent) = liveness.interval_of(input) {
            if arena.sibling_at(parent, def_position) == Some(input_interval) {
                debug_assert!(arena[input_interval].same_register_kind(&arena[output_interval]));
                return true;
            }
        }
    }

    // `in_node` was not an input of this instruction.
    false
}

// The data structures of a single coloring attempt.
struct ColoringIteration {
    processing_core_regs: bool,
    num_regs: usize,
    nodes: PrimaryMap<NodeId, InterferenceNode>,
    opportunities: PrimaryMap<CoalesceId, CoalesceOpportunity>,
    interval_node: SecondaryMap<IntervalId, PackedOption<NodeId>>,
    /// One canonical node per physical register.
    physical_nodes: Vec<NodeId>,
    /// Uncolored nodes to be pruned.
    prunable_nodes: Vec<NodeId>,
    /// Stack of pruned nodes waiting to be colored.
    pruned_nodes: Vec<NodeId>,
    /// Low-degree, non-move-related nodes, prunable immediately.
    simplify_worklist: VecDeque<NodeId>,
    /// Low-degree, move-related nodes.
    freeze_worklist: VecDeque<NodeId>,
    /// High-degree nodes, pruned worst-first.
    spill_worklist: BinaryHeap<SpillCandidate>,
    /// Pending coalesce opportunities, best-first.
    coalesce_worklist: BinaryHeap<CoalesceCandidate>,
}

impl ColoringIteration {
    fn new(processing_core_regs: bool, num_regs: usize) -> Self {
        Self {
            processing_core_regs,
            num_regs,
            nodes: PrimaryMap::new(),
            opportunities: PrimaryMap::new(),
            interval_node: SecondaryMap::new(),
            physical_nodes: Vec::new(),
            prunable_nodes: Vec::new(),
            pruned_nodes: Vec::new(),
            simplify_worklist: VecDeque::new(),
            freeze_worklist: VecDeque::new(),
            spill_worklist: BinaryHeap::new(),
            coalesce_worklist: BinaryHeap::new(),
        }
    }

    fn new_node(&mut self, graph: &Graph, liveness: &Liveness, interval: IntervalId) -> NodeId {
        let arena = liveness.intervals();
        debug_assert!(
            !arena.is_high(interval),
            "pair nodes are represented by their low interval"
        );
        let precolored = arena[interval].has_register();
        let node = self.nodes.push(InterferenceNode {
            stage: NodeStage::Prunable,
            interval,
            adjacent: SmallVec::new(),
            coalesce_opportunities: SmallVec::new(),
            out_degree: if precolored { usize::max_value() } else { 0 },
            alias: NodeId(0),
            spill_weight: compute_spill_weight(graph, liveness, interval),
            requires_color: arena.requires_register(graph, interval),
            needs_spill_slot: false,
            is_pair: arena.has_high(interval),
            precolored,
        });
        self.nodes[node].alias = node;
        node
    }

    fn is_low_degree(&self, node: NodeId) -> bool {
        self.nodes[node].out_degree < self.num_regs
    }

    fn is_high_degree(&self, node: NodeId) -> bool {
        !self.is_low_degree(node)
    }

    fn build_interference_graph(
        &mut self,
        graph: &Graph,
        liveness: &Liveness,
        intervals: &[IntervalId],
        physical_intervals: &[IntervalId],
    ) {
        debug_assert!(self.prunable_nodes.is_empty());

        // Canonical pre-colored nodes: a single node represents each
        // physical register, whatever fixed intervals point at it.
        for &interval in physical_intervals {
            let node = self.new_node(graph, liveness, interval);
            self.nodes[node].stage = NodeStage::Precolored;
            self.physical_nodes.push(node);
        }

        // Build the graph by ordering range endpoints and doing a linear
        // sweep with a set of currently live nodes: two nodes interfere
        // when both are in the set at once. Endings sort before beginnings
        // at the same position, since those do not conflict.
        let arena = liveness.intervals();
        let mut range_endpoints: Vec<(usize, bool, NodeId)> = Vec::new();

        for &parent in intervals {
            let mut sibling = Some(parent);
            while let Some(current) = sibling {
                sibling = arena.next_sibling(current);
                if arena[current].is_empty() {
                    continue;
                }
                let node = self.new_node(graph, liveness, current);
                self.interval_node[current] = Some(node).into();

                if self.nodes[node].precolored {
                    // Fixed siblings alias the canonical node of their
                    // register.
                    self.nodes[node].stage = NodeStage::Precolored;
                    let physical = self.physical_nodes[arena[current].register().unwrap()];
                    self.nodes[node].alias = physical;
                } else {
                    self.nodes[node].stage = NodeStage::Prunable;
                    self.prunable_nodes.push(node);
                }

                for range in arena[current].ranges() {
                    range_endpoints.push((range.start, true, node));
                    range_endpoints.push((range.end, false, node));
                }
            }
        }

        // The node is deliberately ignored by the comparison, for
        // determinism: the sort is stable.
        range_endpoints.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut live: Vec<NodeId> = Vec::new();
        for &(position, is_range_beginning, node) in &range_endpoints {
            if is_range_beginning {
                let guaranteed_not_interfering_yet =
                    position == arena[self.nodes[node].interval].start();
                for i in 0..live.len() {
                    let conflicting = live[i];
                    debug_assert_ne!(node, conflicting);
                    if check_input_output_can_overlap(graph, liveness, &self.nodes, conflicting, node) {
                        // The instruction defining `node` allows its output
                        // to share a register with this dying input.
                    } else {
                        self.add_potential_interference(
                            liveness,
                            node,
                            conflicting,
                            guaranteed_not_interfering_yet,
                            true,
                        );
                    }
                }
                debug_assert!(!live.contains(&node));
                live.push(node);
            } else {
                let index = live
                    .iter()
                    .position(|&n| n == node)
                    .expect("range ended while not live");
                live.remove(index);
            }
        }
        debug_assert!(live.is_empty());
    }

    fn add_potential_interference(
        &mut self,
        liveness: &Liveness,
        from: NodeId,
        to: NodeId,
        guaranteed_not_interfering_yet: bool,
        both_directions: bool,
    ) {
        if self.nodes[from].precolored {
            // Save space: no outgoing edges from fixed nodes.
        } else if self.nodes[to].precolored {
            // Only one node may represent a given fixed register.
            let arena = liveness.intervals();
            let to_interval = self.nodes[to].interval;
            let physical = self.physical_nodes[arena[to_interval].register().unwrap()];
            self.add_edge(from, physical, /* guaranteed_not_interfering_yet */ false);

            // An uncolored node interfering with a fixed pair also gets an
            // edge to the pair's high node. Making dedicated fixed pair
            // nodes instead would double-count interference with {r1} and
            // {r1, r2}. This remains conservative for pair nodes, but fixed
            // pairs can be unaligned on x86, which complicates the precise
            // treatment.
            if self.nodes[to].is_pair {
                let high_interval = arena.high_of(to_interval);
                let high_node = self.physical_nodes[arena[high_interval].register().unwrap()];
                self.add_edge(from, high_node, false);
            }
        } else {
            // Standard interference between two uncolored nodes.
            self.add_edge(from, to, guaranteed_not_interfering_yet);
        }

        if both_directions {
            self.add_potential_interference(liveness, to, from, guaranteed_not_interfering_yet, false);
        }
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId, guaranteed_not_interfering_yet: bool) {
        debug_assert!(!self.nodes[from].precolored, "fixed nodes have no outgoing edges");
        debug_assert_ne!(from, to, "no self loops in the interference graph");
        debug_assert_eq!(self.nodes[from].alias, from, "cannot add edges to a coalesced node");
        debug_assert_ne!(self.nodes[to].stage, NodeStage::Pruned);
        if guaranteed_not_interfering_yet {
            debug_assert!(!self.nodes[from].adjacent.contains(&to));
        } else if self.nodes[from].adjacent.contains(&to) {
            return;
        }
        let weight = self.nodes[from].edge_weight_with(&self.nodes[to]);
        self.nodes[from].adjacent.push(to);
        self.nodes[from].out_degree += weight;
    }

    fn remove_interference(&mut self, node: NodeId, other: NodeId) {
        debug_assert_eq!(self.nodes[node].alias, node, "cannot remove edges from a coalesced node");
        debug_assert_eq!(
            self.nodes[other].stage,
            NodeStage::Pruned,
            "interferences are only removed when pruning"
        );
        if let Some(index) = self.nodes[node].adjacent.iter().position(|&n| n == other) {
            let weight = self.nodes[node].edge_weight_with(&self.nodes[other]);
            self.nodes[node].adjacent.remove(index);
            self.nodes[node].out_degree -= weight;
        }
    }

    fn contains_interference(&self, node: NodeId, other: NodeId) -> bool {
        self.nodes[node].adjacent.contains(&other)
    }

    fn create_coalesce_opportunity(
        &mut self,
        graph: &Graph,
        liveness: &Liveness,
        a: NodeId,
        b: NodeId,
        kind: CoalesceKind,
        position: usize,
    ) {
        debug_assert_eq!(
            self.nodes[a].is_pair, self.nodes[b].is_pair,
            "nodes of different memory widths should never be coalesced"
        );
        let priority = compute_coalesce_priority(graph, liveness, kind, position);
        let id = self.opportunities.push(CoalesceOpportunity {
            node_a: a,
            node_b: b,
            stage: CoalesceStage::Worklist,
            priority,
        });
        self.nodes[a].coalesce_opportunities.push(id);
        self.nodes[b].coalesce_opportunities.push(id);
        self.coalesce_worklist.push(CoalesceCandidate { id, priority });
    }

    // Coalesce opportunities are found through the interval-to-node map;
    // intervals without nodes (constants, stack arguments) never coalesce
    // since they will not be in registers anyway.
    fn find_coalesce_opportunities(&mut self, graph: &Graph, liveness: &Liveness) {
        debug_assert!(self.coalesce_worklist.is_empty());

        for i in 0..self.prunable_nodes.len() {
            let node = self.prunable_nodes[i];
            let interval = self.nodes[node].interval;
            let arena = liveness.intervals();

            // Coalesce adjacent siblings.
            if let Some(next_sibling) = arena.next_sibling(interval) {
                if arena[interval].end() == arena[next_sibling].start() {
                    if let Some(sibling_node) = self.interval_node[next_sibling].expand() {
                        self.create_coalesce_opportunity(
                            graph,
                            liveness,
                            node,
                            sibling_node,
                            CoalesceKind::AdjacentSibling,
                            arena[interval].end(),
                        );
                    }
                }
            }

            // Coalesce a fixed output with its immediately adjacent sibling.
            let parent = arena.parent(interval);
            if arena[parent].has_register()
                && arena.next_sibling(parent) == Some(interval)
                && arena[parent].end() == arena[interval].start()
            {
                if let Some(parent_node) = self.interval_node[parent].expand() {
                    self.create_coalesce_opportunity(
                        graph,
                        liveness,
                        node,
                        parent_node,
                        CoalesceKind::FixedOutputSibling,
                        arena[parent].end(),
                    );
                }
            }

            // Prevent moves across blocks: a split interval starting at a
            // block boundary can share the location the value has at the
            // end of each predecessor.
            if arena.is_split(interval) && liveness.is_at_block_boundary(arena[interval].start() / 2)
            {
                let block = liveness.block_from_position(graph, arena[interval].start());
                for &predecessor in graph.preds(block) {
                    let position = graph.lifetime_end(predecessor) - 1;
                    if let Some(existing) = arena.sibling_at(parent, position) {
                        if let Some(existing_node) = self.interval_node[existing].expand() {
                            self.create_coalesce_opportunity(
                                graph,
                                liveness,
                                node,
                                existing_node,
                                CoalesceKind::NonlinearControlFlow,
                                position,
                            );
                        }
                    }
                }
            }

            let defined_by = arena[interval].defined_by();

            // Coalesce phi inputs with the phi's output, at the end of the
            // corresponding predecessor.
            if let Some(phi) = defined_by.filter(|&d| graph.is_phi(d)) {
                let block = graph.block_of(phi);
                let preds = graph.preds(block);
                for (input_index, &input) in graph.inputs(phi).iter().enumerate() {
                    let position = graph.lifetime_end(preds[input_index]) - 1;
                    if let Some(input_parent) = liveness.interval_of(input) {
                        if let Some(input_sibling) = arena.sibling_at(input_parent, position) {
                            if let Some(input_node) = self.interval_node[input_sibling].expand() {
                                self.create_coalesce_opportunity(
                                    graph,
                                    liveness,
                                    node,
                                    input_node,
                                    CoalesceKind::Phi,
                                    position,
                                );
                            }
                        }
                    }
                }
            }

            // Coalesce the output with the first input when the output must
            // reuse it.
            if let Some(db) = defined_by {
                let out = graph.locations(db).expect("definition has no locations").out();
                if out.is_unallocated() && out.policy() == Policy::SameAsFirstInput {
                    let start = arena[interval].start();
                    if let Some(input_parent) = liveness.interval_of(graph.inputs(db)[0]) {
                        if let Some(input_sibling) = arena.sibling_at(input_parent, start - 1) {
                            if arena[input_sibling].end() == start {
                                if let Some(input_node) = self.interval_node[input_sibling].expand()
                                {
                                    self.create_coalesce_opportunity(
                                        graph,
                                        liveness,
                                        node,
                                        input_node,
                                        CoalesceKind::FirstInput,
                                        start,
                                    );
                                }
                            }
                        }
                    }
                }
            }

            // An unsplit interval may reuse the registers of the dying
            // inputs of its defining instruction.
            if let Some(db) = defined_by {
                debug_assert!(!arena.is_split(interval));
                let locations = graph.locations(db).expect("definition has no locations");
                if !locations.output_can_overlap_with_inputs() {
                    let def_point = graph.lifetime_position(db);
                    for &input in graph.inputs(db) {
                        if let Some(input_parent) = liveness.interval_of(input) {
                            if let Some(input_sibling) = arena.sibling_at(input_parent, def_point) {
                                if arena.has_high(input_sibling) == arena.has_high(interval) {
                                    if let Some(input_node) =
                                        self.interval_node[input_sibling].expand()
                                    {
                                        self.create_coalesce_opportunity(
                                            graph,
                                            liveness,
                                            node,
                                            input_node,
                                            CoalesceKind::AnyInput,
                                            arena[interval].start(),
                                        );
                                    }
                                }
                            }
                        }
                    }
                }
            }

            // Prevent moves into fixed input locations: coalesce with the
            // canonical node of the fixed register. Uses in
            // (start, end], i.e. [start + 1, end + 1).
            let start = arena[interval].start();
            let end = arena[interval].end();
            let window: Vec<(Inst, usize)> = {
                let uses = arena.uses(interval);
                let (lo, hi) = find_matching_use_range(uses, |u| u.position(), start + 1, end + 1);
                uses[lo..hi]
                    .iter()
                    .filter_map(|u| u.user().map(|user| (user, u.input_index())))
                    .collect()
            };
            for (user, input_index) in window {
                let input = graph
                    .locations(user)
                    .expect("user has no locations")
                    .in_at(input_index);
                // Coalescing with fixed pair nodes is not supported.
                let fixed_node = if input.is_register() && self.processing_core_regs {
                    Some(self.physical_nodes[input.reg()])
                } else if input.is_fpu_register() && !self.processing_core_regs {
                    Some(self.physical_nodes[input.reg()])
                } else {
                    None
                };
                if let Some(fixed_node) = fixed_node {
                    self.create_coalesce_opportunity(
                        graph,
                        liveness,
                        node,
                        fixed_node,
                        CoalesceKind::FixedInput,
                        graph.lifetime_position(user),
                    );
                }
            }
        }
    }

    fn is_move_related(&self, node: NodeId) -> bool {
        self.nodes[node].coalesce_opportunities.iter().any(|&id| {
            let stage = self.opportunities[id].stage;
            stage == CoalesceStage::Worklist || stage == CoalesceStage::Active
        })
    }

    fn prune_interference_graph(&mut self, liveness: &Liveness) {
        debug_assert!(
            self.pruned_nodes.is_empty()
                && self.simplify_worklist.is_empty()
                && self.freeze_worklist.is_empty()
                && self.spill_worklist.is_empty()
        );
        // Low-degree nodes (degree < num_regs) are guaranteed a color; high
        // degree nodes are not.

        for i in 0..self.prunable_nodes.len() {
            let node = self.prunable_nodes[i];
            debug_assert!(!self.nodes[node].precolored, "fixed nodes are never pruned");
            if self.is_low_degree(node) {
                if self.nodes[node].coalesce_opportunities.is_empty() {
                    self.nodes[node].stage = NodeStage::SimplifyWorklist;
                    self.simplify_worklist.push_back(node);
                } else {
                    self.nodes[node].stage = NodeStage::FreezeWorklist;
                    self.freeze_worklist.push_back(node);
                }
            } else {
                self.nodes[node].stage = NodeStage::SpillWorklist;
                self.push_spill_candidate(node);
            }
        }

        // A node is not removed from a worklist when it moves to another;
        // its stage says where it really is.
        loop {
            if let Some(node) = self.simplify_worklist.pop_front() {
                debug_assert_eq!(self.nodes[node].stage, NodeStage::SimplifyWorklist);
                debug_assert!(self.is_low_degree(node), "simplify nodes are low degree");
                debug_assert!(!self.is_move_related(node), "simplify nodes are not move related");
                self.prune_node(node);
            } else if let Some(candidate) = self.coalesce_worklist.pop() {
                if self.opportunities[candidate.id].stage == CoalesceStage::Worklist {
                    self.coalesce(liveness, candidate.id);
                }
            } else if let Some(node) = self.freeze_worklist.pop_front() {
                if self.nodes[node].stage == NodeStage::FreezeWorklist {
                    debug_assert!(self.is_low_degree(node), "freeze nodes are low degree");
                    debug_assert!(self.is_move_related(node), "freeze nodes are move related");
                    self.freeze_moves(node);
                    self.prune_node(node);
                }
            } else if let Some(candidate) = self.spill_worklist.pop() {
                let node = candidate.node;
                if self.nodes[node].stage == NodeStage::SpillWorklist {
                    debug_assert!(self.is_high_degree(node), "spill nodes are high degree");
                    self.freeze_moves(node);
                    self.prune_node(node);
                }
            } else {
                break;
            }
        }
        debug_assert_eq!(self.prunable_nodes.len(), self.pruned_nodes.len());
    }

    fn push_spill_candidate(&mut self, node: NodeId) {
        self.spill_worklist.push(SpillCandidate {
            node,
            requires_color: self.nodes[node].requires_color,
            spill_weight: self.nodes[node].spill_weight,
        });
    }

    fn enable_coalesce_opportunities(&mut self, node: NodeId) {
        for i in 0..self.nodes[node].coalesce_opportunities.len() {
            let id = self.nodes[node].coalesce_opportunities[i];
            if self.opportunities[id].stage == CoalesceStage::Active {
                self.opportunities[id].stage = CoalesceStage::Worklist;
                let priority = self.opportunities[id].priority;
                self.coalesce_worklist.push(CoalesceCandidate { id, priority });
            }
        }
    }

    fn prune_node(&mut self, node: NodeId) {
        debug_assert_ne!(self.nodes[node].stage, NodeStage::Pruned);
        debug_assert!(!self.nodes[node].precolored);
        self.nodes[node].stage = NodeStage::Pruned;
        self.pruned_nodes.push(node);

        let adjacent: SmallVec<[NodeId; 4]> = self.nodes[node].adjacent.clone();
        for adj in adjacent {
            debug_assert_ne!(self.nodes[adj].stage, NodeStage::Pruned, "no interference with pruned nodes");

            if self.nodes[adj].precolored {
                // Pre-colored nodes are never pruned; nothing to update.
                continue;
            }
            let was_high_degree = self.is_high_degree(adj);
            debug_assert!(
                self.contains_interference(adj, node),
                "missing reflexive interference from non-fixed node"
            );
            self.remove_interference(adj, node);

            if was_high_degree && self.is_low_degree(adj) {
                // High-to-low transition: the neighborhood's coalesce
                // opportunities become worth trying again.
                self.enable_coalesce_opportunities(adj);
                let adj_adjacent: SmallVec<[NodeId; 4]> = self.nodes[adj].adjacent.clone();
                for adj_adj in adj_adjacent {
                    self.enable_coalesce_opportunities(adj_adj);
                }

                debug_assert_eq!(self.nodes[adj].stage, NodeStage::SpillWorklist);
                if self.is_move_related(adj) {
                    self.nodes[adj].stage = NodeStage::FreezeWorklist;
                    self.freeze_worklist.push_back(adj);
                } else {
                    self.nodes[adj].stage = NodeStage::SimplifyWorklist;
                    self.simplify_worklist.push_back(adj);
                }
            }
        }
    }

    fn check_transition_from_freeze_worklist(&mut self, node: NodeId) {
        if self.is_low_degree(node) && !self.is_move_related(node) {
            debug_assert_eq!(self.nodes[node].stage, NodeStage::FreezeWorklist);
            self.nodes[node].stage = NodeStage::SimplifyWorklist;
            self.simplify_worklist.push_back(node);
        }
    }

    fn freeze_moves(&mut self, node: NodeId) {
        let opportunities: SmallVec<[CoalesceId; 2]> =
            self.nodes[node].coalesce_opportunities.clone();
        for id in opportunities {
            if self.opportunities[id].stage == CoalesceStage::Defunct {
                // Constrained moves stay constrained; they are skipped by
                // last-chance coalescing.
            } else {
                self.opportunities[id].stage = CoalesceStage::Inactive;
            }
            let node_a = self.opportunities[id].node_a;
            let node_b = self.opportunities[id].node_b;
            let alias_a = self.get_alias(node_a);
            let alias_b = self.get_alias(node_b);
            let other = if alias_a == node { alias_b } else { alias_a };
            if other != node && self.nodes[other].stage == NodeStage::FreezeWorklist {
                debug_assert!(self.is_low_degree(node));
                self.check_transition_from_freeze_worklist(other);
            }
        }
    }

    fn get_alias(&mut self, node: NodeId) -> NodeId {
        let mut root = node;
        while self.nodes[root].alias != root {
            root = self.nodes[root].alias;
        }
        // Flatten the alias chain.
        let mut current = node;
        while current != root {
            let next = self.nodes[current].alias;
            self.nodes[current].alias = root;
            current = next;
        }
        root
    }

    // George: `from` may merge into a pre-colored `into` if every neighbor
    // of `from` is low degree, pre-colored, or already interferes with
    // `into`.
    fn precolored_heuristic(&self, from: NodeId, into: NodeId) -> bool {
        if !self.nodes[into].precolored {
            return false;
        }
        if self.nodes[from].is_pair || self.nodes[into].is_pair {
            // Fixed pairs are two separate fixed nodes; merging with one of
            // them would lose the implicit link to the other.
            return false;
        }

        for &adj in &self.nodes[from].adjacent {
            if self.is_low_degree(adj)
                || self.nodes[adj].precolored
                || self.contains_interference(adj, into)
            {
                // Ok: coalescing cannot endanger this neighbor's color.
            } else {
                return false;
            }
        }
        true
    }

    // Briggs: two uncolored nodes may merge if the combined node has fewer
    // than `num_regs` high-degree neighbors.
    fn uncolored_heuristic(&self, from: NodeId, into: NodeId) -> bool {
        if self.nodes[into].precolored {
            return false;
        }

        // Cap for compile time; the effect on generated code is negligible.
        if self.nodes[from].out_degree + self.nodes[into].out_degree > 2 * self.num_regs {
            return false;
        }

        let mut high_degree_interferences = 0;
        for &adj in &self.nodes[from].adjacent {
            if self.is_high_degree(adj) {
                high_degree_interferences += self.nodes[from].edge_weight_with(&self.nodes[adj]);
            }
        }
        for &adj in &self.nodes[into].adjacent {
            if self.is_high_degree(adj) {
                if self.contains_interference(from, adj) {
                    // Already counted, and the neighbor's degree drops if
                    // coalescing succeeds: it may not count at all. This
                    // extends the textbook Briggs test, conservatively.
                    if self.nodes[adj].out_degree
                        - self.nodes[into].edge_weight_with(&self.nodes[adj])
                        < self.num_regs
                    {
                        high_degree_interferences -=
                            self.nodes[from].edge_weight_with(&self.nodes[adj]);
                    }
                } else {
                    high_degree_interferences +=
                        self.nodes[into].edge_weight_with(&self.nodes[adj]);
                }
            }
        }

        high_degree_interferences < self.num_regs
    }

    fn combine(&mut self, liveness: &Liveness, from: NodeId, into: NodeId) {
        self.nodes[from].alias = into;

        // Move the interferences over.
        let adjacent: SmallVec<[NodeId; 4]> = self.nodes[from].adjacent.clone();
        for adj in adjacent {
            let was_low_degree = self.is_low_degree(adj);
            self.add_potential_interference(liveness, adj, into, false, true);
            if was_low_degree && self.is_high_degree(adj) {
                // Temporary transition to high degree; pruning `from` will
                // lower it again, but worklist state must stay consistent.
                self.nodes[adj].stage = NodeStage::SpillWorklist;
                self.push_spill_candidate(adj);
            }
        }

        // Move the coalesce opportunities over.
        let opportunities: SmallVec<[CoalesceId; 2]> =
            self.nodes[from].coalesce_opportunities.clone();
        for id in opportunities {
            if self.opportunities[id].stage != CoalesceStage::Defunct {
                self.nodes[into].coalesce_opportunities.push(id);
            }
        }
        self.enable_coalesce_opportunities(from);

        self.prune_node(from);
        if self.is_low_degree(into) {
            // `coalesce` checks for a transition to the simplify worklist.
            debug_assert_eq!(self.nodes[into].stage, NodeStage::FreezeWorklist);
        } else if self.nodes[into].stage == NodeStage::FreezeWorklist {
            // Transition to high degree.
            self.nodes[into].stage = NodeStage::SpillWorklist;
            self.push_spill_candidate(into);
        } else {
            debug_assert!(
                self.nodes[into].stage == NodeStage::SpillWorklist
                    || self.nodes[into].stage == NodeStage::Precolored
            );
        }
    }

    fn coalesce(&mut self, liveness: &Liveness, id: CoalesceId) {
        let mut from = self.get_alias(self.opportunities[id].node_a);
        let mut into = self.get_alias(self.opportunities[id].node_b);
        debug_assert_ne!(self.nodes[from].stage, NodeStage::Pruned);
        debug_assert_ne!(self.nodes[into].stage, NodeStage::Pruned);

        if self.nodes[from].precolored {
            // Keep the pre-colored node as the representative.
            core::mem::swap(&mut from, &mut into);
        }

        if from == into {
            // Already coalesced.
            self.opportunities[id].stage = CoalesceStage::Defunct;
            self.check_transition_from_freeze_worklist(from);
        } else if self.nodes[from].precolored || self.contains_interference(from, into) {
            // These nodes interfere.
            self.opportunities[id].stage = CoalesceStage::Defunct;
            self.check_transition_from_freeze_worklist(from);
            self.check_transition_from_freeze_worklist(into);
        } else if self.precolored_heuristic(from, into) || self.uncolored_heuristic(from, into) {
            self.opportunities[id].stage = CoalesceStage::Defunct;
            self.combine(liveness, from, into);
            self.check_transition_from_freeze_worklist(into);
        } else {
            // Not now, maybe later.
            self.opportunities[id].stage = CoalesceStage::Active;
        }
    }

    // A bit per register used by the adjacent nodes, both halves for pairs.
    fn build_conflict_mask(&self, liveness: &Liveness, node: NodeId) -> u32 {
        let arena = liveness.intervals();
        let mut conflict_mask = 0u32;
        for &adjacent in &self.nodes[node].adjacent {
            let conflicting = self.nodes[adjacent].interval;
            if let Some(reg) = arena[conflicting].register() {
                conflict_mask |= 1 << reg;
                if arena.has_high(conflicting) {
                    let high = arena.high_of(conflicting);
                    conflict_mask |= 1 << arena[high].register().expect("pair half not colored");
                }
            } else {
                debug_assert!(
                    !arena.has_high(conflicting)
                        || !arena[arena.high_of(conflicting)].has_register()
                );
            }
        }
        conflict_mask
    }

    // Pop pruned nodes and assign colors; returns false when an interval
    // that requires a register could not be colored, in which case it has
    // been split for the next attempt.
    fn color_interference_graph(
        &mut self,
        graph: &Graph,
        liveness: &mut Liveness,
        codegen: &dyn CodeGenerator,
    ) -> bool {
        debug_assert!(self.num_regs <= MAX_NUM_REGS, "conflict masks are a single word");
        let num_regs = self.num_regs;
        let mut colored_intervals: Vec<IntervalId> = Vec::new();
        let mut successful = true;

        while let Some(node) = self.pruned_nodes.pop() {
            let interval = self.nodes[node].interval;
            let is_pair = self.nodes[node].is_pair;
            let mut reg = 0;

            let alias = self.get_alias(node);
            if alias != node {
                // This node was coalesced with another.
                let alias_interval = self.nodes[alias].interval;
                if let Some(alias_reg) = liveness.intervals()[alias_interval].register() {
                    reg = alias_reg;
                    debug_assert_eq!(
                        self.build_conflict_mask(liveness, node) & (1 << reg),
                        0,
                        "node conflicts with the register it was coalesced into"
                    );
                } else {
                    debug_assert!(
                        false,
                        "move coalescing was not conservative: a node was coalesced into one \
                         that could not be colored"
                    );
                    if self.nodes[node].requires_color {
                        successful = false;
                    }
                    continue;
                }
            } else {
                let conflict_mask = self.build_conflict_mask(liveness, node);
                if is_pair {
                    // Pair intervals are aligned here; only pre-colored
                    // pairs may be unaligned (on x86). Relaxing this would
                    // require heavier edge weights around pair nodes.
                    while reg < num_regs - 1
                        && (conflict_mask & (1 << reg) != 0 || conflict_mask & (1 << (reg + 1)) != 0)
                    {
                        reg += 2;
                    }

                    // Prefer a caller-save pair.
                    let mut i = 0;
                    while i + 1 < num_regs {
                        let low_caller_save = self.is_caller_save(codegen, i);
                        let high_caller_save = self.is_caller_save(codegen, i + 1);
                        if conflict_mask & (1 << i) == 0 && conflict_mask & (1 << (i + 1)) == 0 {
                            if low_caller_save && high_caller_save {
                                reg = i;
                                break;
                            } else if low_caller_save || high_caller_save {
                                // Keep looking for a fully caller-save pair.
                                reg = i;
                            }
                        }
                        i += 2;
                    }
                } else {
                    // Lowest available color first.
                    reg = (!conflict_mask).trailing_zeros() as usize;

                    // Prefer a caller-save register.
                    for i in 0..num_regs {
                        if conflict_mask & (1 << i) == 0 && self.is_caller_save(codegen, i) {
                            reg = i;
                            break;
                        }
                    }
                }

                // Last-chance coalescing: take the partner's color when it
                // fits.
                let opportunities: SmallVec<[CoalesceId; 2]> =
                    self.nodes[node].coalesce_opportunities.clone();
                for id in opportunities {
                    if self.opportunities[id].stage == CoalesceStage::Defunct {
                        continue;
                    }
                    let node_a = self.opportunities[id].node_a;
                    let node_b = self.opportunities[id].node_b;
                    let alias_a = self.get_alias(node_a);
                    let alias_b = self.get_alias(node_b);
                    let other_interval = if alias_a == node {
                        self.nodes[alias_b].interval
                    } else {
                        self.nodes[alias_a].interval
                    };
                    if let Some(coalesce_register) = liveness.intervals()[other_interval].register()
                    {
                        if is_pair {
                            if conflict_mask & (1 << coalesce_register) == 0
                                && conflict_mask & (1 << (coalesce_register + 1)) == 0
                                && coalesce_register % 2 == 0
                            {
                                reg = coalesce_register;
                                break;
                            }
                        } else if conflict_mask & (1 << coalesce_register) == 0 {
                            reg = coalesce_register;
                            break;
                        }
                    }
                }
            }

            let limit = if is_pair { num_regs - 1 } else { num_regs };
            if reg < limit {
                // Assign the color.
                debug_assert!(!liveness.intervals()[interval].has_register());
                liveness.intervals_mut()[interval].set_register(reg);
                colored_intervals.push(interval);
                if is_pair {
                    let high = liveness.intervals().high_of(interval);
                    debug_assert!(!liveness.intervals()[high].has_register());
                    liveness.intervals_mut()[high].set_register(reg + 1);
                    colored_intervals.push(high);
                }
            } else if self.nodes[node].requires_color {
                // The interference graph is too dense to color: make it
                // sparser by splitting this interval, and keep coloring to
                // find any further intervals to split this attempt.
                successful = false;
                split_at_register_uses(graph, liveness, interval);
            } else {
                // Spill.
                self.nodes[node].needs_spill_slot = true;
            }
        }

        // An unsuccessful attempt leaves no assignments behind.
        if !successful {
            for interval in colored_intervals {
                liveness.intervals_mut()[interval].clear_register();
            }
        }

        successful
    }

    fn is_caller_save(&self, codegen: &dyn CodeGenerator, reg: usize) -> bool {
        if self.processing_core_regs {
            !codegen.is_core_callee_save(reg)
        } else {
            !codegen.is_fp_callee_save(reg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CallKind, LocationSummary};
    use crate::test_util::{GraphBuilder, TestCodeGenerator};

    // A single-block graph giving hand-built intervals valid lifetime
    // positions to live at.
    fn carrier() -> (Graph, Liveness) {
        let mut b = GraphBuilder::new();
        let block = b.block();
        b.set_entry(block);
        for _ in 0..8 {
            b.any_value(block, Type::Int32);
        }
        b.ret(block, None);
        let mut graph = b.finish_without_liveness();
        let liveness = Liveness::compute(&mut graph);
        (graph, liveness)
    }

    fn make_interval(liveness: &mut Liveness, start: usize, end: usize) -> IntervalId {
        let id = liveness.intervals_mut().make(Type::Int32, None);
        liveness.intervals_mut()[id].add_range(start, end);
        id
    }

    fn node_of(iteration: &ColoringIteration, interval: IntervalId) -> NodeId {
        iteration.interval_node[interval].expand().expect("interval has no node")
    }

    #[test]
    fn spill_slots_are_reused_after_death() {
        // Two non-overlapping int values must share one spill slot; a third
        // overlapping one must not.
        let (graph, mut liveness) = carrier();
        let a = make_interval(&mut liveness, 2, 6);
        let c = make_interval(&mut liveness, 8, 10);
        let d = make_interval(&mut liveness, 4, 10);

        let mut used = 0;
        color_spill_slots(&graph, &mut liveness, &[a, c, d], &mut used);

        let slot_a = liveness.intervals()[a].spill_slot().unwrap();
        let slot_c = liveness.intervals()[c].spill_slot().unwrap();
        let slot_d = liveness.intervals()[d].spill_slot().unwrap();
        assert_eq!(slot_a, slot_c);
        assert_ne!(slot_a, slot_d);
        assert_eq!(used, 2);
    }

    // A triangle of mutually interfering intervals with two colors: the
    // isolated node goes through the simplify worklist, the triangle
    // through the spill worklist, and pruning one corner drops the other
    // two back to low degree. Optimistic coloring then colors two corners
    // and spills the one pruned earliest.
    #[test]
    fn pruning_transitions_between_worklists() {
        let (graph, mut liveness) = carrier();
        let codegen = TestCodeGenerator::core_only(2);
        let a = make_interval(&mut liveness, 0, 10);
        let b_ = make_interval(&mut liveness, 0, 10);
        let c = make_interval(&mut liveness, 0, 10);
        let d = make_interval(&mut liveness, 12, 14);

        let mut iteration = ColoringIteration::new(true, 2);
        iteration.build_interference_graph(&graph, &liveness, &[a, b_, c, d], &[]);
        let na = node_of(&iteration, a);
        let nb = node_of(&iteration, b_);
        let nc = node_of(&iteration, c);
        let nd = node_of(&iteration, d);
        assert_eq!(iteration.nodes[na].out_degree, 2);
        assert_eq!(iteration.nodes[nb].out_degree, 2);
        assert_eq!(iteration.nodes[nc].out_degree, 2);
        assert_eq!(iteration.nodes[nd].out_degree, 0);

        iteration.prune_interference_graph(&liveness);
        assert_eq!(iteration.pruned_nodes.len(), 4);
        // The low-degree node is simplified before any spill candidate.
        assert_eq!(iteration.pruned_nodes[0], nd);
        for &node in &[na, nb, nc, nd] {
            assert_eq!(iteration.nodes[node].stage, NodeStage::Pruned);
        }

        let successful = iteration.color_interference_graph(&graph, &mut liveness, &codegen);
        assert!(successful);
        let colored = [a, b_, c]
            .iter()
            .filter(|&&i| liveness.intervals()[i].has_register())
            .count();
        assert_eq!(colored, 2);
        let spilled = [na, nb, nc]
            .iter()
            .filter(|&&n| iteration.nodes[n].needs_spill_slot)
            .count();
        assert_eq!(spilled, 1);
        assert!(liveness.intervals()[d].has_register());
    }

    #[test]
    fn george_requires_neighbors_to_know_the_fixed_register() {
        let (graph, mut liveness) = carrier();
        let u = make_interval(&mut liveness, 0, 10);
        let n1 = make_interval(&mut liveness, 0, 10);
        let f0 = liveness.intervals_mut().make_fixed(0, Type::Int32);
        let f1 = liveness.intervals_mut().make_fixed(1, Type::Int32);

        {
            // With one register, n1 is a high-degree neighbor of u that
            // does not interfere with r0: merging u into r0 is unsafe.
            let mut iteration = ColoringIteration::new(true, 1);
            iteration.build_interference_graph(&graph, &liveness, &[u, n1], &[f0, f1]);
            let nu = node_of(&iteration, u);
            let phys0 = iteration.physical_nodes[0];
            assert!(!iteration.precolored_heuristic(nu, phys0));
        }

        {
            // Once r0 is live over the same range, n1 interferes with it
            // already and the merge cannot add interferences.
            liveness.intervals_mut()[f0].add_range(0, 10);
            let mut iteration = ColoringIteration::new(true, 1);
            iteration.build_interference_graph(&graph, &liveness, &[u, n1, f0], &[f0, f1]);
            let nu = node_of(&iteration, u);
            let phys0 = iteration.physical_nodes[0];
            assert!(iteration.precolored_heuristic(nu, phys0));
        }
    }

    #[test]
    fn briggs_counts_high_degree_neighbors_once() {
        let (graph, mut liveness) = carrier();

        {
            // a and b share the high-degree neighbor c; the combined node
            // sees it once, and its degree drops if the merge succeeds.
            let a = make_interval(&mut liveness, 0, 4);
            let b_ = make_interval(&mut liveness, 6, 10);
            let c = make_interval(&mut liveness, 0, 10);
            let mut iteration = ColoringIteration::new(true, 2);
            iteration.build_interference_graph(&graph, &liveness, &[a, b_, c], &[]);
            let na = node_of(&iteration, a);
            let nb = node_of(&iteration, b_);
            let nc = node_of(&iteration, c);
            assert!(iteration.is_high_degree(nc));
            assert!(iteration.uncolored_heuristic(na, nb));
        }

        {
            // The degree-sum cap refuses expensive merges outright.
            let w = make_interval(&mut liveness, 20, 30);
            let x = make_interval(&mut liveness, 20, 30);
            let y = make_interval(&mut liveness, 20, 30);
            let z = make_interval(&mut liveness, 20, 30);
            let mut iteration = ColoringIteration::new(true, 1);
            iteration.build_interference_graph(&graph, &liveness, &[w, x, y, z], &[]);
            let nw = node_of(&iteration, w);
            let nx = node_of(&iteration, x);
            assert_eq!(iteration.nodes[nw].out_degree, 3);
            assert!(!iteration.uncolored_heuristic(nw, nx));
        }
    }

    // Adjacent siblings are move-related, so they enter the freeze
    // worklist, coalesce, and come out of coloring with one register.
    #[test]
    fn adjacent_siblings_coalesce_to_one_register() {
        let mut b = GraphBuilder::new();
        let entry = b.block();
        let body = b.block();
        b.edge(entry, body);
        b.set_entry(entry);
        let value = b.any_value(entry, Type::Int32);
        b.goto_(entry);
        b.ret(body, Some(value));
        let (graph, mut liveness) = b.finish();
        let codegen = TestCodeGenerator::core_only(2);

        let interval = liveness.interval_of(value).unwrap();
        let body_start = graph.lifetime_start(body);
        let sibling = split(liveness.intervals_mut(), interval, body_start);

        let mut iteration = ColoringIteration::new(true, 2);
        iteration.build_interference_graph(&graph, &liveness, &[interval], &[]);
        iteration.find_coalesce_opportunities(&graph, &liveness);

        let parent_node = node_of(&iteration, interval);
        let sibling_node = node_of(&iteration, sibling);
        let mut pairs = Vec::new();
        for id in iteration.opportunities.keys() {
            pairs.push((iteration.opportunities[id].node_a, iteration.opportunities[id].node_b));
        }
        assert!(pairs
            .iter()
            .any(|&(x, y)| (x == parent_node && y == sibling_node)
                || (x == sibling_node && y == parent_node)));

        iteration.prune_interference_graph(&liveness);
        assert_eq!(iteration.pruned_nodes.len(), 2);
        assert!(iteration.color_interference_graph(&graph, &mut liveness, &codegen));

        // Coalesced: the split point costs no move.
        assert!(liveness.intervals()[interval].has_register());
        assert_eq!(
            liveness.intervals()[interval].register(),
            liveness.intervals()[sibling].register()
        );
    }

    #[test]
    fn coalesce_opportunities_for_phis_and_fixed_inputs() {
        let mut b = GraphBuilder::new();
        let entry = b.block();
        let left = b.block();
        let right = b.block();
        let join = b.block();
        b.edge(entry, left);
        b.edge(entry, right);
        b.edge(left, join);
        b.edge(right, join);
        b.set_entry(entry);
        let condition = b.any_value(entry, Type::Int32);
        b.if_(entry, condition);
        let v1 = b.any_value(left, Type::Int32);
        b.goto_(left);
        let v2 = b.any_value(right, Type::Int32);
        b.goto_(right);
        let phi = b.phi(join, Type::Int32, 0, &[v1, v2]);
        let consumer = b.graph.add_inst(join, InstKind::Plain, Type::Int32, &[phi]);
        let mut locations = LocationSummary::new(CallKind::NoCall);
        locations.add_input(Location::Register(1));
        b.graph.set_locations(consumer, locations);
        b.ret(join, None);
        let (graph, mut liveness) = b.finish();

        let v1_interval = liveness.interval_of(v1).unwrap();
        let v2_interval = liveness.interval_of(v2).unwrap();
        let phi_interval = liveness.interval_of(phi).unwrap();
        let f0 = liveness.intervals_mut().make_fixed(0, Type::Int32);
        let f1 = liveness.intervals_mut().make_fixed(1, Type::Int32);

        let mut iteration = ColoringIteration::new(true, 2);
        iteration.build_interference_graph(
            &graph,
            &liveness,
            &[v1_interval, v2_interval, phi_interval],
            &[f0, f1],
        );
        iteration.find_coalesce_opportunities(&graph, &liveness);

        let n1 = node_of(&iteration, v1_interval);
        let n2 = node_of(&iteration, v2_interval);
        let np = node_of(&iteration, phi_interval);
        let mut pairs = Vec::new();
        for id in iteration.opportunities.keys() {
            pairs.push((iteration.opportunities[id].node_a, iteration.opportunities[id].node_b));
        }
        let has_pair = |a: NodeId, b: NodeId| {
            pairs.iter().any(|&(x, y)| (x == a && y == b) || (x == b && y == a))
        };

        // Each phi input coalesces with the phi's output...
        assert!(has_pair(np, n1));
        assert!(has_pair(np, n2));
        // ...and the fixed input use coalesces with its register's node.
        assert!(has_pair(np, iteration.physical_nodes[1]));
    }
}
