//! Register allocation.
//!
//! Two interchangeable strategies sit behind one entry point: the classical
//! linear-scan allocator and the graph-coloring allocator. Both consume the
//! liveness representation, assign registers and spill slots to live
//! intervals, and hand over to the shared resolver which rewrites the
//! program. The validator at the bottom of this module checks, in debug
//! builds, that no two live intervals ever share a register or spill slot.

pub mod graph_color;
pub mod linear_scan;
pub mod resolver;

use crate::bitset::BitVector;
use crate::codegen::CodeGenerator;
use crate::ir::{Graph, IntervalId, VREG_SIZE};
use crate::liverange::Intervals;
use crate::liveness::Liveness;

pub use self::graph_color::GraphColorAllocator;
pub use self::linear_scan::LinearScanAllocator;

/// Which allocation strategy to run.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Strategy {
    /// Classical linear scan with interval splitting.
    LinearScan,
    /// Chaitin-Briggs graph coloring with iterative move coalescing.
    GraphColor,
}

/// A register allocator of either strategy.
pub enum RegisterAllocator<'a> {
    /// The linear-scan strategy.
    LinearScan(LinearScanAllocator<'a>),
    /// The graph-coloring strategy.
    GraphColor(GraphColorAllocator<'a>),
}

impl<'a> RegisterAllocator<'a> {
    /// Create an allocator of the chosen strategy.
    pub fn new(
        strategy: Strategy,
        graph: &'a mut Graph,
        codegen: &'a mut dyn CodeGenerator,
        liveness: &'a mut Liveness,
    ) -> Self {
        match strategy {
            Strategy::LinearScan => {
                RegisterAllocator::LinearScan(LinearScanAllocator::new(graph, codegen, liveness))
            }
            Strategy::GraphColor => RegisterAllocator::GraphColor(GraphColorAllocator::new(
                graph, codegen, liveness, /* iterative_move_coalescing */ true,
            )),
        }
    }

    /// Decide where every SSA value lives and rewrite the program with the
    /// moves needed to honor those choices.
    pub fn allocate(&mut self) {
        match self {
            RegisterAllocator::LinearScan(allocator) => allocator.allocate(),
            RegisterAllocator::GraphColor(allocator) => allocator.allocate(),
        }
    }

    /// Check that no two live intervals share a register or spill slot.
    /// Intended for debug builds and tests.
    pub fn validate(&self, log_fatal_on_failure: bool) -> bool {
        match self {
            RegisterAllocator::LinearScan(allocator) => allocator.validate(log_fatal_on_failure),
            RegisterAllocator::GraphColor(allocator) => allocator.validate(log_fatal_on_failure),
        }
    }
}

/// Split `interval` at `position`, splitting its paired half alongside it.
///
/// Splitting at the interval's start instead clears the register in place:
/// the interval will be handled again as a spill candidate.
pub(crate) fn split(intervals: &mut Intervals, interval: IntervalId, position: usize) -> IntervalId {
    debug_assert!(position >= intervals[interval].start());
    debug_assert!(!intervals[interval].is_dead_at(position));
    if position == intervals[interval].start() {
        // Spill slot will be allocated when handling `interval` again.
        intervals[interval].clear_register();
        if intervals.has_high(interval) {
            let high = intervals.high_of(interval);
            intervals[high].clear_register();
        } else if intervals.has_low(interval) {
            let low = intervals.low_of(interval);
            intervals[low].clear_register();
        }
        interval
    } else {
        let new_interval = intervals
            .split_at(interval, position)
            .expect("interval is live at the split position");
        if intervals.has_high(interval) {
            let high = intervals.high_of(interval);
            let high_split = intervals
                .split_at(high, position)
                .expect("high half is live at the split position");
            intervals.link_pair(new_interval, high_split);
        } else if intervals.has_low(interval) {
            let low = intervals.low_of(interval);
            let low_split = intervals
                .split_at(low, position)
                .expect("low half is live at the split position");
            intervals.link_pair(low_split, new_interval);
        }
        new_interval
    }
}

/// Split `interval` somewhere in `[from, to]`, preferring block boundaries.
///
/// Non-linear control flow forces moves at every branch to the new
/// location. Splitting at the start of a later dominated block, or hoisting
/// the split out of loops that do not contain `from`, lets the split
/// piggy-back on the moves the resolver inserts for block connections, and
/// gives the allocator a chance to keep the register across side paths.
pub(crate) fn split_between(
    graph: &Graph,
    liveness: &mut Liveness,
    interval: IntervalId,
    from: usize,
    to: usize,
) -> IntervalId {
    let block_from = liveness.block_from_position(graph, from);
    let mut block_to = liveness.block_from_position(graph, to);

    // Both positions in the same block: split exactly at `to`.
    if block_from == block_to {
        return split(liveness.intervals_mut(), interval, to);
    }

    if let Some(dominator) = graph.dominator(block_from) {
        for &dominated in graph.dominated_blocks(dominator) {
            let position = graph.lifetime_start(dominated);
            if position > from && graph.lifetime_start(block_to) > position {
                // Even when a candidate is found, keep iterating: dominated
                // blocks are not sorted in liveness order and a closer one
                // may follow.
                block_to = dominated;
                debug_assert_ne!(block_to, block_from);
            }
        }
    }

    // If `to` is in a loop, hoist the split to the outermost loop header
    // that does not contain `from`.
    let mut current_loop = graph.loop_of(block_to);
    while let Some(l) = current_loop {
        let header = graph.loop_header(l);
        if graph.lifetime_start(block_from) >= graph.lifetime_start(header) {
            break;
        }
        block_to = header;
        current_loop = graph.loop_parent(l);
    }

    split(liveness.intervals_mut(), interval, graph.lifetime_start(block_to))
}

/// Check that no two of the given intervals are live in the same register
/// or spill slot at the same position.
///
/// A register conflict is tolerated when the holder is an input whose user
/// explicitly allows output/input sharing; a spill-slot conflict only
/// between parameters and the current-method value, which own their slots.
pub fn validate_intervals(
    graph: &Graph,
    liveness: &Liveness,
    codegen: &dyn CodeGenerator,
    intervals: &[IntervalId],
    number_of_spill_slots: usize,
    number_of_out_slots: usize,
    processing_core_registers: bool,
    log_fatal_on_failure: bool,
) -> bool {
    let number_of_registers = if processing_core_registers {
        codegen.num_core_registers()
    } else {
        codegen.num_fp_registers()
    };
    let arena = liveness.intervals();

    // One bit vector per register and per spill slot; every interval with an
    // assignment populates them from its live ranges.
    let mut liveness_of_values: Vec<BitVector> = (0..number_of_registers + number_of_spill_slots)
        .map(|_| BitVector::new())
        .collect();

    for &start_interval in intervals {
        let mut current = Some(start_interval);
        while let Some(sibling) = current {
            current = arena.next_sibling(sibling);
            if arena[sibling].is_empty() {
                continue;
            }
            let parent = arena.parent(sibling);
            let defined_by = arena[parent].defined_by();
            // Parameters and the current method have their own stack slot.
            let has_own_slot = defined_by
                .map_or(false, |d| graph.is_parameter(d) || graph.is_current_method(d));

            if arena[parent].has_spill_slot() && !has_own_slot {
                let slot = number_of_registers + arena[parent].spill_slot().unwrap() / VREG_SIZE
                    - number_of_out_slots;
                for range in arena[sibling].ranges() {
                    for position in range.start..range.end {
                        if liveness_of_values[slot].is_bit_set(position) {
                            if log_fatal_on_failure {
                                panic!("spill slot conflict at {}", position);
                            }
                            return false;
                        }
                        liveness_of_values[slot].set_bit(position);
                    }
                }
            }

            if let Some(reg) = arena[sibling].register() {
                for range in arena[sibling].ranges() {
                    for position in range.start..range.end {
                        if liveness_of_values[reg].is_bit_set(position) {
                            if liveness.is_using_input_register(graph, sibling)
                                && liveness.can_use_input_register(graph, sibling)
                            {
                                continue;
                            }
                            if log_fatal_on_failure {
                                panic!("register conflict at {} for register {}", position, reg);
                            }
                            return false;
                        }
                        liveness_of_values[reg].set_bit(position);
                    }
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Block, Inst, Location, MoveOperands, Policy, Type};
    use crate::test_util::{GraphBuilder, TestCodeGenerator};

    const STRATEGIES: [Strategy; 2] = [Strategy::LinearScan, Strategy::GraphColor];

    fn allocate(
        strategy: Strategy,
        graph: &mut Graph,
        codegen: &mut TestCodeGenerator,
        liveness: &mut Liveness,
    ) {
        let mut allocator = RegisterAllocator::new(strategy, graph, codegen, liveness);
        allocator.allocate();
        assert!(allocator.validate(false));
    }

    fn all_moves(graph: &Graph) -> Vec<MoveOperands> {
        let mut moves = Vec::new();
        for block in graph.blocks() {
            for parallel_move in graph.parallel_moves(block) {
                moves.extend(parallel_move.moves.iter().cloned());
            }
        }
        moves
    }

    fn build_interval(
        liveness: &mut Liveness,
        ranges: &[[usize; 2]],
        register: Option<usize>,
    ) -> IntervalId {
        let id = liveness.intervals_mut().make(Type::Int32, None);
        for range in ranges.iter().rev() {
            liveness.intervals_mut()[id].add_range(range[0], range[1]);
        }
        if let Some(reg) = register {
            liveness.intervals_mut()[id].set_register(reg);
        }
        id
    }

    fn carrier() -> (Graph, Liveness) {
        // A minimal graph to host hand-built intervals.
        let mut b = GraphBuilder::new();
        let block = b.block();
        b.set_entry(block);
        b.ret(block, None);
        let mut graph = b.finish_without_liveness();
        let liveness = Liveness::compute(&mut graph);
        (graph, liveness)
    }

    #[test]
    fn validate_intervals_detects_register_conflicts() {
        let (graph, mut liveness) = carrier();
        let codegen = TestCodeGenerator::core_only(2);
        let check = |liveness: &Liveness, intervals: &[IntervalId]| {
            validate_intervals(&graph, liveness, &codegen, intervals, 0, 0, true, false)
        };

        // Two intervals over the same range conflict once they share a
        // register.
        let a = build_interval(&mut liveness, &[[0, 42]], Some(0));
        let b = build_interval(&mut liveness, &[[0, 42]], Some(1));
        assert!(check(&liveness, &[a, b]));
        liveness.intervals_mut()[b].set_register(0);
        assert!(!check(&liveness, &[a, b]));

        // Non-intersecting intervals may share.
        let c = build_interval(&mut liveness, &[[0, 42]], Some(0));
        let d = build_interval(&mut liveness, &[[42, 43]], Some(0));
        assert!(check(&liveness, &[c, d]));

        // A lifetime hole is as good as an end.
        let e = build_interval(&mut liveness, &[[0, 42], [45, 48]], Some(0));
        let f = build_interval(&mut liveness, &[[42, 43]], Some(0));
        assert!(check(&liveness, &[e, f]));

        // Overlap through the second range.
        let g = build_interval(&mut liveness, &[[0, 42], [44, 48]], Some(0));
        let h = build_interval(&mut liveness, &[[42, 47]], Some(0));
        assert!(!check(&liveness, &[g, h]));
    }

    #[test]
    fn validate_intervals_checks_each_sibling() {
        let (graph, mut liveness) = carrier();
        let codegen = TestCodeGenerator::core_only(2);

        let a = build_interval(&mut liveness, &[[0, 42], [44, 48]], Some(0));
        let sibling = liveness.intervals_mut().split_at(a, 43).unwrap();
        let b = build_interval(&mut liveness, &[[42, 47]], Some(0));
        // The sibling holds no register yet; only [0, 42) is checked
        // against [42, 47).
        assert!(validate_intervals(&graph, &liveness, &codegen, &[a, b], 0, 0, true, false));

        liveness.intervals_mut()[sibling].set_register(0);
        assert!(!validate_intervals(&graph, &liveness, &codegen, &[a, b], 0, 0, true, false));
    }

    // Three instructions deep, the first value's register requirement moves
    // with each split.
    #[test]
    fn first_register_use_follows_splits() {
        let mut b = GraphBuilder::new();
        let entry = b.block();
        let body = b.block();
        b.edge(entry, body);
        b.set_entry(entry);
        let seed = b.any_value(entry, Type::Int32);
        b.goto_(entry);

        let same_as_first = |b: &mut GraphBuilder, block: Block, x: Inst, y: Inst| -> Inst {
            let inst = b.graph.add_inst(block, crate::ir::InstKind::Plain, Type::Int32, &[x, y]);
            let mut locations = crate::ir::LocationSummary::new(crate::ir::CallKind::NoCall);
            locations.add_input(Location::Unallocated(Policy::RequiresRegister));
            locations.add_input(Location::Unallocated(Policy::Any));
            locations.set_out(Location::Unallocated(Policy::SameAsFirstInput));
            b.graph.set_locations(inst, locations);
            inst
        };

        let first = same_as_first(&mut b, body, seed, seed);
        let _middle = same_as_first(&mut b, body, seed, seed);
        let last = same_as_first(&mut b, body, first, seed);
        b.ret(body, None);

        let (graph, mut liveness) = b.finish();
        let first_position = graph.lifetime_position(first);
        let last_position = graph.lifetime_position(last);

        let interval = liveness.interval_of(first).unwrap();
        assert_eq!(liveness.intervals()[interval].end(), last_position);
        assert!(liveness.intervals().next_sibling(interval).is_none());

        // The definition itself needs a register.
        assert_eq!(
            liveness.intervals().first_register_use(&graph, interval),
            Some(first_position)
        );

        // After splitting, the tail's first register use is the last user.
        let tail = liveness.intervals_mut().split_at(interval, first_position + 2).unwrap();
        assert_eq!(
            liveness.intervals().first_register_use(&graph, tail),
            Some(last_position)
        );

        // Split right before the user: only the new sibling needs a
        // register.
        let tail2 = liveness.intervals_mut().split_at(tail, last_position - 1).unwrap();
        assert_eq!(liveness.intervals().first_register_use(&graph, tail), None);
        assert_eq!(
            liveness.intervals().first_register_use(&graph, tail2),
            Some(last_position)
        );
    }

    // Scenario: an empty body returning one value. The value gets exactly
    // one register, is never split, and no moves are inserted.
    #[test]
    fn return_value_gets_one_register() {
        for &strategy in &STRATEGIES {
            let mut b = GraphBuilder::new();
            let entry = b.block();
            let body = b.block();
            let exit = b.block();
            b.edge(entry, body);
            b.edge(body, exit);
            b.set_entry(entry);
            b.set_exit(exit);
            let zero = b.any_value(entry, Type::Int32);
            b.goto_(entry);
            b.ret(body, Some(zero));
            b.goto_(exit);
            let (mut graph, mut liveness) = b.finish();
            let mut codegen = TestCodeGenerator::core_only(4);

            allocate(strategy, &mut graph, &mut codegen, &mut liveness);

            let interval = liveness.interval_of(zero).unwrap();
            assert!(liveness.intervals()[interval].has_register());
            assert!(liveness.intervals().next_sibling(interval).is_none());
            assert!(all_moves(&graph).is_empty());
            assert!(!codegen.allocated.is_empty());
            assert!(codegen.initialized.is_some());
        }
    }

    // Scenario: a loop-header phi whose value is re-defined in the loop.
    // Hint propagation gives the phi one of its inputs' registers, and the
    // back edge carries no moves.
    #[test]
    fn loop_phi_takes_an_input_register() {
        for &strategy in &STRATEGIES {
            let mut b = GraphBuilder::new();
            let entry = b.block();
            let header = b.block();
            let body = b.block();
            let tail = b.block();
            let exit = b.block();
            b.edge(entry, header);
            b.edge(header, body);
            b.edge(header, tail);
            b.edge(body, header);
            b.edge(tail, exit);
            b.set_entry(entry);
            b.set_exit(exit);

            let v0 = b.any_value(entry, Type::Int32);
            b.goto_(entry);
            let phi = b.phi(header, Type::Int32, 0, &[v0, v0]);
            let condition = b.binop(header, Type::Int32, phi, phi, Policy::Any);
            b.if_(header, condition);
            let v4 = b.any_value(body, Type::Int32);
            b.goto_(body);
            // Patch the back-edge input now that it exists.
            b.graph.set_phi_input(phi, 1, v4);
            let v5 = b.any_value(tail, Type::Int32);
            b.ret(tail, Some(v5));
            b.goto_(exit);

            let (mut graph, mut liveness) = b.finish();
            let mut codegen = TestCodeGenerator::core_only(4);
            allocate(strategy, &mut graph, &mut codegen, &mut liveness);

            let arena = liveness.intervals();
            let phi_reg = arena[liveness.interval_of(phi).unwrap()].register().unwrap();
            let v0_reg = arena[liveness.interval_of(v0).unwrap()].register().unwrap();
            let v4_reg = arena[liveness.interval_of(v4).unwrap()].register().unwrap();
            assert!(phi_reg == v0_reg || phi_reg == v4_reg);

            // No moves on the loop's back edge.
            assert!(graph.parallel_moves(body).is_empty());
        }
    }

    // Scenario: a do-while loop with an induction variable. The increment
    // is live across the back edge together with the phi, so they must get
    // different registers; the returned value is the phi itself.
    #[test]
    fn induction_variable_interferes_with_phi() {
        for &strategy in &STRATEGIES {
            let mut b = GraphBuilder::new();
            let entry = b.block();
            let header = b.block();
            let latch = b.block();
            let ret_block = b.block();
            let exit = b.block();
            b.edge(entry, header);
            b.edge(header, latch);
            b.edge(header, ret_block);
            b.edge(latch, header);
            b.edge(ret_block, exit);
            b.set_entry(entry);
            b.set_exit(exit);

            let v0 = b.any_value(entry, Type::Int32);
            let one = b.any_value(entry, Type::Int32);
            let five = b.any_value(entry, Type::Int32);
            b.goto_(entry);
            let phi = b.phi(header, Type::Int32, 0, &[v0, v0]);
            let increment = b.binop(header, Type::Int32, phi, one, Policy::Any);
            let condition = b.binop(header, Type::Int32, increment, five, Policy::Any);
            b.if_(header, condition);
            b.goto_(latch);
            b.graph.set_phi_input(phi, 1, increment);
            let ret = b.ret(ret_block, Some(phi));
            b.goto_(exit);

            let (mut graph, mut liveness) = b.finish();
            let mut codegen = TestCodeGenerator::core_only(6);
            allocate(strategy, &mut graph, &mut codegen, &mut liveness);

            let arena = liveness.intervals();
            let phi_interval = liveness.interval_of(phi).unwrap();
            let increment_interval = liveness.interval_of(increment).unwrap();
            assert!(arena[phi_interval].has_register());
            assert!(arena[increment_interval].has_register());
            assert_ne!(
                arena[phi_interval].register(),
                arena[increment_interval].register()
            );

            // The return reads the phi's location.
            let ret_input = graph.locations(ret).unwrap().in_at(0);
            assert!(ret_input.is_register());
        }
    }

    // Scenario: a division with its first input pinned to register 0 and
    // its output reusing that register.
    #[test]
    fn fixed_input_and_output_share_register_zero() {
        for &strategy in &STRATEGIES {
            let mut b = GraphBuilder::new();
            let entry = b.block();
            let body = b.block();
            let exit = b.block();
            b.edge(entry, body);
            b.edge(body, exit);
            b.set_entry(entry);
            b.set_exit(exit);

            let dividend = b.any_value(entry, Type::Int32);
            let divisor = b.any_value(entry, Type::Int32);
            b.goto_(entry);
            let quotient = b.div_fixed(body, dividend, divisor);
            b.ret(body, Some(quotient));
            b.goto_(exit);

            let (mut graph, mut liveness) = b.finish();
            let mut codegen = TestCodeGenerator::core_only(4);
            allocate(strategy, &mut graph, &mut codegen, &mut liveness);

            let arena = liveness.intervals();
            // The dividend ends its life in register 0...
            let dividend_interval = liveness.interval_of(dividend).unwrap();
            let div_position = graph.lifetime_position(quotient);
            let last = arena
                .sibling_at(dividend_interval, div_position - 1)
                .expect("dividend not live before the division");
            assert_eq!(arena[last].register(), Some(0));
            // ... and the quotient starts there.
            let quotient_interval = liveness.interval_of(quotient).unwrap();
            assert_eq!(arena[quotient_interval].register(), Some(0));
        }
    }

    // Scenario: more simultaneously live values than registers, with the
    // long-lived one required in a register only at a single late use. The
    // long-lived value is split, spilled around the pressure, and reloaded
    // for the use.
    #[test]
    fn pressure_spills_the_long_lived_value() {
        for &strategy in &STRATEGIES {
            let mut b = GraphBuilder::new();
            let entry = b.block();
            let busy = b.block();
            let ret_block = b.block();
            let exit = b.block();
            b.edge(entry, busy);
            b.edge(busy, ret_block);
            b.edge(ret_block, exit);
            b.set_entry(entry);
            b.set_exit(exit);

            let long_lived = b.any_value(entry, Type::Int32);
            b.goto_(entry);
            let a = b.any_value(busy, Type::Int32);
            let c = b.any_value(busy, Type::Int32);
            b.binop(busy, Type::Int32, a, c, Policy::RequiresRegister);
            b.goto_(busy);
            let ret = b.ret(ret_block, Some(long_lived));
            b.goto_(exit);

            let (mut graph, mut liveness) = b.finish();
            let mut codegen = TestCodeGenerator::core_only(2);
            allocate(strategy, &mut graph, &mut codegen, &mut liveness);

            let arena = liveness.intervals();
            let interval = liveness.interval_of(long_lived).unwrap();
            assert!(arena.next_sibling(interval).is_some(), "interval was never split");
            let slot = arena[interval].spill_slot().expect("no spill slot assigned");

            // The required use reads from a register.
            let use_position = graph.lifetime_position(ret);
            let late = arena
                .sibling_at(interval, use_position)
                .expect("value not live at its use");
            assert!(arena[late].has_register());
            assert!(graph.locations(ret).unwrap().in_at(0).is_register());

            // The value reaches its slot: through an eager store after the
            // definition, or by being defined into the slot directly.
            let moves = all_moves(&graph);
            let stored = moves
                .iter()
                .any(|m| m.destination == Location::StackSlot(slot))
                || graph.locations(long_lived).unwrap().out() == Location::StackSlot(slot);
            assert!(stored, "value never reaches its spill slot");

            // And it is reloaded before the use.
            assert!(moves
                .iter()
                .any(|m| m.source == Location::StackSlot(slot) && m.destination.is_register()));
        }
    }

    // Scenario: a wide floating-point value on a target where such values
    // occupy two consecutive registers.
    #[test]
    fn wide_value_gets_an_aligned_pair() {
        for &strategy in &STRATEGIES {
            let mut b = GraphBuilder::new();
            let entry = b.block();
            let middle = b.block();
            let last = b.block();
            let exit = b.block();
            b.edge(entry, middle);
            b.edge(middle, last);
            b.edge(last, exit);
            b.set_entry(entry);
            b.set_exit(exit);

            let wide = b.any_value(entry, Type::Float64);
            b.goto_(entry);
            b.binop(middle, Type::Int32, wide, wide, Policy::Any);
            b.goto_(middle);
            b.ret(last, Some(wide));
            b.goto_(exit);

            let (mut graph, mut liveness) = b.finish();
            let mut codegen = TestCodeGenerator::with_pairs(2, 4);
            allocate(strategy, &mut graph, &mut codegen, &mut liveness);

            let arena = liveness.intervals();
            let interval = liveness.interval_of(wide).unwrap();
            assert!(arena.has_high(interval));
            let low = arena[interval].register().expect("pair not colored");
            let high = arena[arena.high_of(interval)].register().expect("high half not colored");
            assert_eq!(low % 2, 0, "pair must be aligned");
            assert_eq!(high, low + 1);
            assert_eq!(
                arena.to_location(&graph, interval),
                Location::FpuRegisterPair(low, high)
            );
        }
    }

    // Scenario: a materializable constant is split before its register use
    // and rematerialized rather than copied from a register.
    #[test]
    fn constant_is_materialized_before_its_register_use() {
        for &strategy in &STRATEGIES {
            let mut b = GraphBuilder::new();
            let entry = b.block();
            let body = b.block();
            let exit = b.block();
            b.edge(entry, body);
            b.edge(body, exit);
            b.set_entry(entry);
            b.set_exit(exit);

            let constant = b.constant(entry, Type::Int32);
            b.goto_(entry);
            let ret = b.ret(body, Some(constant));
            b.goto_(exit);

            let (mut graph, mut liveness) = b.finish();
            let mut codegen = TestCodeGenerator::core_only(4);
            allocate(strategy, &mut graph, &mut codegen, &mut liveness);

            let arena = liveness.intervals();
            let interval = liveness.interval_of(constant).unwrap();
            // The head of the chain stays register-less; only the part
            // reaching the use is in a register.
            assert!(!arena[interval].has_register());
            let use_position = graph.lifetime_position(ret);
            let late = arena.sibling_at(interval, use_position).expect("not live at use");
            assert!(arena[late].has_register());

            // The materializing move has a constant source.
            assert!(all_moves(&graph)
                .iter()
                .any(|m| m.source == Location::Constant(constant) && m.destination.is_register()));

            assert!(graph.locations(ret).unwrap().in_at(0).is_register());
        }
    }

    // Environment uses receive locations, and safepoints learn which
    // registers are live across them.
    #[test]
    fn safepoints_record_live_registers_and_env_locations() {
        for &strategy in &STRATEGIES {
            let mut b = GraphBuilder::new();
            let entry = b.block();
            let exit = b.block();
            b.edge(entry, exit);
            b.set_entry(entry);
            b.set_exit(exit);

            let value = b.any_value(entry, Type::Int32);
            let safepoint = b
                .graph
                .add_inst(entry, crate::ir::InstKind::Plain, Type::Int32, &[]);
            let locations = crate::ir::LocationSummary::new(crate::ir::CallKind::CallOnSlowPath);
            b.graph.set_locations(safepoint, locations);
            b.graph.set_environment(safepoint, &[value]);
            // A later use keeps the value live across the safepoint.
            b.ret(entry, Some(value));
            b.goto_(exit);
            b.graph.set_debuggable(true);

            let (mut graph, mut liveness) = b.finish();
            let mut codegen = TestCodeGenerator::core_only(4);
            allocate(strategy, &mut graph, &mut codegen, &mut liveness);

            let arena = liveness.intervals();
            let interval = liveness.interval_of(value).unwrap();
            let reg = arena[interval].register().expect("value not in a register");

            // The environment knows where the value lives.
            assert_eq!(graph.env_location(safepoint, 0), Location::Register(reg));

            // The safepoint records the register as live.
            let locations = graph.locations(safepoint).unwrap();
            assert!(locations.live_registers().contains_core_register(reg));
        }
    }
}
