//! Liveness information consumed by the register allocators.
//!
//! `Liveness` holds the output representation both allocation strategies
//! work from: the live-interval arena, per-block live-in/live-out/kill sets,
//! lifetime numbering, and the position-to-instruction maps. It also
//! contains the producer that populates all of this from a graph:
//!
//! * non-environment uses of an instruction always make it live;
//! * environment uses of a reference-typed value make it live, since the
//!   garbage collector must be able to find it;
//! * when the graph is debuggable, environment uses of primitive values make
//!   them live too; otherwise those uses may end up with no location.

use crate::bitset::BitVector;
use crate::entity::packed_option::PackedOption;
use crate::entity::SecondaryMap;
use crate::ir::{Block, Graph, Inst, InstKind, IntervalId, Policy, Type};
use crate::linear_order;
use crate::liverange::Intervals;

/// Live-in, live-out, and kill sets of one block, indexed by SSA number.
#[derive(Clone, Default)]
struct BlockInfo {
    live_in: BitVector,
    live_out: BitVector,
    kill: BitVector,
}

/// Liveness of every SSA value of one method, plus lifetime numbering.
pub struct Liveness {
    intervals: Intervals,
    interval_of: SecondaryMap<Inst, PackedOption<IntervalId>>,
    block_infos: SecondaryMap<Block, BlockInfo>,
    instructions_from_ssa_index: Vec<Inst>,
    /// One entry per half-open lifetime slot: `None` at block boundaries.
    instructions_from_position: Vec<PackedOption<Inst>>,
    ssa_index: SecondaryMap<Inst, u32>,
}

const NO_SSA_INDEX: u32 = u32::max_value();

impl Liveness {
    /// Linearize the graph, number its instructions, and compute live
    /// intervals and live sets.
    pub fn compute(graph: &mut Graph) -> Liveness {
        linear_order::linearize(graph);
        let mut liveness = Liveness {
            intervals: Intervals::new(),
            interval_of: SecondaryMap::new(),
            block_infos: SecondaryMap::new(),
            instructions_from_ssa_index: Vec::new(),
            instructions_from_position: Vec::new(),
            ssa_index: SecondaryMap::with_default(NO_SSA_INDEX),
        };
        liveness.number_instructions(graph);
        liveness.compute_live_ranges(graph);
        liveness.compute_live_in_and_live_out_sets(graph);
        liveness
    }

    /// The live-interval arena.
    pub fn intervals(&self) -> &Intervals {
        &self.intervals
    }

    /// Mutable access to the live-interval arena.
    pub fn intervals_mut(&mut self) -> &mut Intervals {
        &mut self.intervals
    }

    /// The interval of the value defined by `inst`, if the value is used.
    pub fn interval_of(&self, inst: Inst) -> Option<IntervalId> {
        self.interval_of[inst].expand()
    }

    /// Number of SSA values that received an interval.
    pub fn num_ssa_values(&self) -> usize {
        self.instructions_from_ssa_index.len()
    }

    /// The instruction defining SSA value number `index`.
    pub fn instruction_from_ssa_index(&self, index: usize) -> Inst {
        self.instructions_from_ssa_index[index]
    }

    /// The SSA number of the value defined by `inst`, if any.
    pub fn ssa_index_of(&self, inst: Inst) -> Option<usize> {
        match self.ssa_index[inst] {
            NO_SSA_INDEX => None,
            index => Some(index as usize),
        }
    }

    /// The instruction occupying lifetime slot `index` (that is, lifetime
    /// positions `2 * index` and `2 * index + 1`), or `None` at a block
    /// boundary.
    pub fn instruction_from_position(&self, index: usize) -> Option<Inst> {
        self.instructions_from_position
            .get(index)
            .and_then(|p| p.expand())
    }

    /// Is lifetime slot `index` a block boundary?
    pub fn is_at_block_boundary(&self, index: usize) -> bool {
        self.instruction_from_position(index).is_none()
    }

    /// The block containing the given lifetime position.
    pub fn block_from_position(&self, graph: &Graph, position: usize) -> Block {
        let index = position / 2;
        // At a block boundary, take the block that follows.
        let inst = self
            .instruction_from_position(index)
            .or_else(|| self.instruction_from_position(index + 1))
            .expect("position past the end of the method");
        graph.block_of(inst)
    }

    /// The largest lifetime position of the method.
    pub fn max_lifetime_position(&self) -> usize {
        self.instructions_from_position.len() * 2 - 1
    }

    /// The live-in set of a block, indexed by SSA number.
    pub fn live_in(&self, block: Block) -> &BitVector {
        &self.block_infos[block].live_in
    }

    /// The live-out set of a block, indexed by SSA number.
    pub fn live_out(&self, block: Block) -> &BitVector {
        &self.block_infos[block].live_out
    }

    /// The kill set of a block, indexed by SSA number.
    pub fn kill(&self, block: Block) -> &BitVector {
        &self.block_infos[block].kill
    }

    /// The instruction a temp interval was created for. A temporary shares
    /// its lifetime start with that instruction.
    pub fn temp_user(&self, temp: IntervalId) -> Inst {
        debug_assert!(self.intervals[temp].is_temp());
        self.instruction_from_position(self.intervals[temp].start() / 2)
            .expect("temp not anchored at an instruction")
    }

    /// The index of a temp in its owning instruction's temp list. Stored as
    /// the input index of the temp's single use.
    pub fn temp_index(&self, temp: IntervalId) -> usize {
        debug_assert!(self.intervals[temp].is_temp());
        self.intervals.uses(temp)[0].input_index()
    }

    // ------------------------------------------------------------------
    // Production.
    // ------------------------------------------------------------------

    fn number_instructions(&mut self, graph: &mut Graph) {
        // Mark every instruction whose value is consumed by another
        // instruction, a phi, or an environment.
        let mut has_uses: SecondaryMap<Inst, bool> = SecondaryMap::with_default(false);
        let blocks: Vec<Block> = graph.blocks().collect();
        for &block in &blocks {
            let consumers: Vec<Inst> = graph
                .phis(block)
                .iter()
                .chain(graph.insts(block))
                .cloned()
                .collect();
            for inst in consumers {
                for &input in graph.inputs(inst) {
                    has_uses[input] = true;
                }
                for &value in graph.env_inputs(inst) {
                    has_uses[value] = true;
                }
            }
        }

        let mut ssa_index = 0;
        let mut position = 0;
        let order: Vec<Block> = graph.linear_order().to_vec();
        for &block in &order {
            let start = position;
            let phis: Vec<Inst> = graph.phis(block).to_vec();
            for phi in phis {
                graph.set_lifetime_position(phi, position);
                if has_uses[phi] {
                    self.give_ssa_index(graph, phi, &mut ssa_index);
                }
            }
            // One boundary slot per block, for moves at block entry.
            self.instructions_from_position.push(None.into());
            position += 2;
            let insts: Vec<Inst> = graph.insts(block).to_vec();
            for inst in insts {
                graph.set_lifetime_position(inst, position);
                self.instructions_from_position.push(Some(inst).into());
                if has_uses[inst] {
                    self.give_ssa_index(graph, inst, &mut ssa_index);
                }
                position += 2;
            }
            graph.set_block_lifetime(block, start, position);
        }
    }

    fn give_ssa_index(&mut self, graph: &Graph, inst: Inst, ssa_index: &mut u32) {
        self.ssa_index[inst] = *ssa_index;
        *ssa_index += 1;
        self.instructions_from_ssa_index.push(inst);
        let interval = self.intervals.make(graph.ty(inst), Some(inst));
        self.interval_of[inst] = Some(interval).into();
    }

    fn should_be_live_for_environment(&self, graph: &Graph, env_holder: Inst, value: Inst) -> bool {
        // A value that is not live in compiled code may still be needed by
        // the interpreter after deoptimization.
        if graph.kind(env_holder) == InstKind::Deoptimize {
            return true;
        }
        // A value live at a throwing instruction in a try block may be
        // copied by the exception handler to its catch-phi slot.
        if graph.can_throw(env_holder) && graph.is_try_block(graph.block_of(env_holder)) {
            return true;
        }
        if graph.is_debuggable() {
            return true;
        }
        graph.ty(value) == Type::Reference
    }

    fn compute_live_ranges(&mut self, graph: &Graph) {
        let order: Vec<Block> = graph.linear_order().to_vec();
        for &block in order.iter().rev() {
            let block_start = graph.lifetime_start(block);
            let block_end = graph.lifetime_end(block);
            let mut live = BitVector::new();

            // Start from the live-in sets of the successors, and record the
            // phi inputs flowing out of this block.
            for &succ in graph.succs(block) {
                live.union(&self.block_infos[succ].live_in);
                let pred_index = graph.predecessor_index_of(succ, block);
                if graph.is_catch_block(succ) {
                    // Catch-phi inputs are kept alive through environment
                    // uses; the runtime copies their values into the catch
                    // phi spill slots when an exception is thrown. We only
                    // extend their range over this block.
                    for &phi in graph.phis(succ) {
                        let input = graph.phi_input(phi, pred_index);
                        let id = self.interval_of(input).expect("catch phi input has no interval");
                        self.intervals[id].add_range(block_start, block_end);
                    }
                } else {
                    for &phi in graph.phis(succ) {
                        let input = graph.phi_input(phi, pred_index);
                        let id = self.interval_of(input).expect("phi input has no interval");
                        self.intervals.add_phi_use(graph, id, phi, pred_index, block);
                        // The input dies at the end of this block, not at
                        // the phi's own position.
                        live.set_bit(self.ssa_index_of(input).unwrap());
                    }
                }
            }

            // Cover the whole block for everything live because of
            // successors; definitions below will shorten their own ranges.
            for index in live.indexes().collect::<Vec<_>>() {
                let inst = self.instructions_from_ssa_index[index];
                let id = self.interval_of(inst).unwrap();
                self.intervals[id].add_range(block_start, block_end);
            }

            for &inst in graph.insts(block).iter().rev() {
                if let Some(id) = self.interval_of(inst) {
                    let index = self.ssa_index_of(inst).unwrap();
                    self.block_infos[block].kill.set_bit(index);
                    live.clear_bit(index);
                    self.intervals[id].set_from(graph.lifetime_position(inst));
                }

                // Environment uses come after or at the position of input
                // uses, so process them first.
                for (i, &value) in graph.env_inputs(inst).to_vec().iter().enumerate() {
                    let should_be_live = self.should_be_live_for_environment(graph, inst, value);
                    if should_be_live {
                        live.set_bit(self.ssa_index_of(value).expect("env value has no ssa index"));
                    }
                    let id = self.interval_of(value).expect("env value has no interval");
                    self.intervals
                        .add_use(graph, id, inst, i, true, None, should_be_live);
                }

                for (i, &input) in graph.inputs(inst).to_vec().iter().enumerate() {
                    let has_in_location =
                        graph.locations(inst).map_or(false, |l| l.in_at(i).is_valid());
                    if has_in_location {
                        let id = self.interval_of(input).expect("used input has no interval");
                        self.intervals.add_use(graph, id, inst, i, false, None, false);
                        live.set_bit(self.ssa_index_of(input).unwrap());
                    }
                }
            }

            // Kill phis defined in this block.
            for &phi in graph.phis(block) {
                if let Some(id) = self.interval_of(phi) {
                    let index = self.ssa_index_of(phi).unwrap();
                    self.block_infos[block].kill.set_bit(index);
                    live.clear_bit(index);
                    self.intervals[id].set_from(graph.lifetime_position(phi));
                }
            }

            if let Some(l) = graph.loop_headed_by(block) {
                // Everything live at a loop header stays live across the
                // whole loop.
                let last_position = graph.loop_lifetime_end(l);
                for index in live.indexes().collect::<Vec<_>>() {
                    let inst = self.instructions_from_ssa_index[index];
                    let id = self.interval_of(inst).unwrap();
                    self.intervals[id].add_loop_range(block_start, last_position);
                }
            }

            self.block_infos[block].live_in = live;
        }
    }

    fn compute_live_in_and_live_out_sets(&mut self, graph: &Graph) {
        // The initial per-block pass above does not see backward branches;
        // iterate to a fixed point.
        let post_order: Vec<Block> = graph.reverse_post_order().iter().rev().cloned().collect();
        let mut changed = true;
        while changed {
            changed = false;
            for &block in &post_order {
                let mut live_out = core::mem::replace(&mut self.block_infos[block].live_out, BitVector::new());
                let mut out_changed = false;
                for &succ in graph.succs(block) {
                    out_changed |= live_out.union(&self.block_infos[succ].live_in);
                }
                self.block_infos[block].live_out = live_out;
                if out_changed {
                    // Values live at the start of the block must also be
                    // live at its entry, unless the block defines them.
                    let info = &mut self.block_infos[block];
                    let live_out = info.live_out.clone();
                    let kill = info.kill.clone();
                    if info.live_in.union_if_not_in(&live_out, &kill) {
                        changed = true;
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Register hints.
    // ------------------------------------------------------------------

    /// The first register hint that is free at least until the value in
    /// `free_until`, from the definition site or a use site.
    pub fn find_first_register_hint(
        &self,
        graph: &Graph,
        id: IntervalId,
        free_until: &[usize],
    ) -> Option<usize> {
        let intervals = &self.intervals;
        debug_assert!(!intervals.is_high(id));
        if intervals[id].is_temp() {
            return None;
        }

        if intervals.is_parent(id) && intervals[id].defined_by().is_some() {
            // This is the first interval of the instruction. Try to find a
            // register based on its definition.
            if let Some(hint) = self.find_hint_at_definition(graph, id) {
                if free_until[hint] > intervals[id].start() {
                    return Some(hint);
                }
            }
        }

        let start = intervals[id].start();
        let end = intervals[id].end();
        for use_ in intervals.uses(id) {
            if use_.position() > end {
                break;
            }
            if use_.position() < start || use_.is_synthesized() {
                continue;
            }
            let user = use_.user().unwrap();
            if graph.is_phi(user) {
                // If the phi already has a register, try to use it.
                let phi_interval = self.interval_of(user).unwrap();
                let phi_location = intervals.to_location(graph, phi_interval);
                if intervals[id].same_register_kind_as_location(phi_location) {
                    let reg = phi_location.register_or_low();
                    if free_until[reg] >= use_.position() {
                        return Some(reg);
                    }
                }
                // If the value dies at the phi assignment, it can take the
                // register of a value flowing in from another predecessor.
                let phi_block = graph.block_of(user);
                let preds = graph.preds(phi_block);
                if end == graph.lifetime_end(preds[use_.input_index()]) {
                    for (i, &other) in graph.inputs(user).iter().enumerate() {
                        if i == use_.input_index() {
                            continue;
                        }
                        let other_id = match self.interval_of(other) {
                            Some(other_id) => other_id,
                            None => continue,
                        };
                        let location =
                            intervals.location_at(graph, other_id, graph.lifetime_end(preds[i]) - 1);
                        if location.is_register_kind() {
                            let reg = location.register_or_low();
                            if free_until[reg] >= use_.position() {
                                return Some(reg);
                            }
                        }
                    }
                }
            } else {
                let locations = graph.locations(user).expect("user has no locations");
                let expected = locations.in_at(use_.input_index());
                // The register is blocked at the beginning of the user, so
                // it must be free from one position earlier.
                let position = graph.lifetime_position(user) - 1;
                if intervals[id].same_register_kind_as_location(expected) {
                    let reg = expected.register_or_low();
                    if free_until[reg] >= position {
                        return Some(reg);
                    }
                }
            }
        }
        None
    }

    /// A register hint derived from the definition site: the register of a
    /// phi input dying on its incoming edge, or the register of the first
    /// input of a same-as-first-input instruction.
    pub fn find_hint_at_definition(&self, graph: &Graph, id: IntervalId) -> Option<usize> {
        let intervals = &self.intervals;
        let defined_by = intervals[id].defined_by().expect("interval has no definition");
        if graph.is_phi(defined_by) {
            let block = graph.block_of(defined_by);
            let preds = graph.preds(block);
            for (i, &input) in graph.inputs(defined_by).iter().enumerate() {
                let pred_end = graph.lifetime_end(preds[i]);
                let input_id = match self.interval_of(input) {
                    Some(input_id) => input_id,
                    None => continue,
                };
                if let Some(sibling) = intervals.sibling_at(input_id, pred_end - 1) {
                    // If the input dies at the end of the predecessor, its
                    // register can be reused.
                    if intervals[sibling].end() == pred_end {
                        let location = intervals.to_location(graph, sibling);
                        if location.is_register_kind() {
                            return Some(location.register_or_low());
                        }
                    }
                }
            }
        } else {
            let locations = graph.locations(defined_by).expect("definition has no locations");
            let out = locations.out();
            if out.is_unallocated() && out.policy() == Policy::SameAsFirstInput {
                let first = graph.inputs(defined_by)[0];
                let start = intervals[id].start();
                let input_id = self.interval_of(first)?;
                if let Some(sibling) = intervals.sibling_at(input_id, start - 1) {
                    if intervals[sibling].end() == start {
                        let location = intervals.to_location(graph, sibling);
                        if location.is_register_kind() {
                            return Some(location.register_or_low());
                        }
                    }
                }
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Validation support.
    // ------------------------------------------------------------------

    /// Does this non-split interval share its register with one of the
    /// inputs of its defining instruction?
    pub fn is_using_input_register(&self, graph: &Graph, id: IntervalId) -> bool {
        let intervals = &self.intervals;
        let defined_by = match intervals[id].defined_by() {
            Some(inst) => inst,
            None => return false,
        };
        if intervals.is_split(id) {
            return false;
        }
        let position = graph.lifetime_position(defined_by);
        for &input in graph.inputs(defined_by) {
            // Find the sibling covering the definition point. This runs
            // outside the linear scan, hence `covers_slow`.
            let mut current = self.interval_of(input);
            while let Some(c) = current {
                if intervals[c].covers_slow(position) {
                    break;
                }
                current = intervals.next_sibling(c);
            }
            if let Some(c) = current {
                if intervals[c].same_register_kind(&intervals[id])
                    && intervals[c].register() == intervals[id].register()
                {
                    return true;
                }
            }
        }
        false
    }

    /// Given that [`Liveness::is_using_input_register`] holds, may the
    /// interval safely keep that shared register?
    pub fn can_use_input_register(&self, graph: &Graph, id: IntervalId) -> bool {
        let intervals = &self.intervals;
        debug_assert!(self.is_using_input_register(graph, id));
        let defined_by = intervals[id].defined_by().expect("checked by caller");
        debug_assert!(!intervals.is_split(id));
        let locations = graph.locations(defined_by).expect("definition has no locations");
        if locations.output_can_overlap_with_inputs() {
            return false;
        }
        let position = graph.lifetime_position(defined_by);
        for &input in graph.inputs(defined_by) {
            let mut current = self.interval_of(input);
            while let Some(c) = current {
                if intervals[c].covers_slow(position) {
                    break;
                }
                current = intervals.next_sibling(c);
            }
            if let Some(c) = current {
                if intervals[c].same_register_kind(&intervals[id])
                    && intervals[c].register() == intervals[id].register()
                {
                    // The found input shares the register. It is safe to use
                    // only if the input dies at this instruction.
                    return !intervals[c].covers_slow(position + 1);
                }
            }
        }
        unreachable!("is_using_input_register found no sharing input");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CallKind, Location, LocationSummary};
    use crate::test_util::GraphBuilder;

    // A diamond merging two values into a phi that is then returned.
    fn diamond_with_phi() -> (Graph, Liveness, Inst, Inst, Inst) {
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
        b.ret(join, Some(phi));
        let (graph, liveness) = b.finish();
        (graph, liveness, phi, v1, v2)
    }

    #[test]
    fn environment_liveness_rules() {
        let mut b = GraphBuilder::new();
        let entry = b.block();
        let tryb = b.block();
        b.edge(entry, tryb);
        b.set_entry(entry);
        let int_value = b.any_value(entry, Type::Int32);
        let ref_value = b.any_value(entry, Type::Reference);
        let deopt = b.graph.add_inst(entry, InstKind::Deoptimize, Type::Int32, &[]);
        let plain = b.graph.add_inst(entry, InstKind::Plain, Type::Int32, &[]);
        b.goto_(entry);
        let thrower = b.graph.add_inst(tryb, InstKind::Plain, Type::Int32, &[]);
        b.graph.set_can_throw(thrower);
        b.graph.set_try_block(tryb);
        b.ret(tryb, None);
        let (mut graph, liveness) = b.finish();

        // A deoptimization point keeps everything it observes alive.
        assert!(liveness.should_be_live_for_environment(&graph, deopt, int_value));
        // So does an instruction that may throw into a catch block.
        assert!(liveness.should_be_live_for_environment(&graph, thrower, int_value));
        // References must stay visible to the garbage collector.
        assert!(liveness.should_be_live_for_environment(&graph, plain, ref_value));
        // A primitive observed by an ordinary environment may go dead...
        assert!(!liveness.should_be_live_for_environment(&graph, plain, int_value));
        // ...unless the whole graph is debuggable.
        graph.set_debuggable(true);
        assert!(liveness.should_be_live_for_environment(&graph, plain, int_value));
    }

    #[test]
    fn hint_at_definition_prefers_a_dying_phi_input() {
        let (graph, mut liveness, phi, v1, v2) = diamond_with_phi();
        let phi_interval = liveness.interval_of(phi).unwrap();
        let v1_interval = liveness.interval_of(v1).unwrap();
        let v2_interval = liveness.interval_of(v2).unwrap();

        // No input holds a register yet: no hint.
        assert_eq!(liveness.find_hint_at_definition(&graph, phi_interval), None);

        // An input dying at the end of its predecessor offers its register.
        liveness.intervals_mut()[v1_interval].set_register(3);
        assert_eq!(liveness.find_hint_at_definition(&graph, phi_interval), Some(3));

        // Any input will do, not just the first.
        liveness.intervals_mut()[v1_interval].clear_register();
        liveness.intervals_mut()[v2_interval].set_register(2);
        assert_eq!(liveness.find_hint_at_definition(&graph, phi_interval), Some(2));
    }

    #[test]
    fn hint_at_definition_reuses_the_first_input_register() {
        let mut b = GraphBuilder::new();
        let entry = b.block();
        b.set_entry(entry);
        let x = b.any_value(entry, Type::Int32);
        let y = b.any_value(entry, Type::Int32);
        let s = b.graph.add_inst(entry, InstKind::Plain, Type::Int32, &[x, y]);
        let mut locations = LocationSummary::new(CallKind::NoCall);
        locations.add_input(Location::Unallocated(Policy::RequiresRegister));
        locations.add_input(Location::Unallocated(Policy::Any));
        locations.set_out(Location::Unallocated(Policy::SameAsFirstInput));
        b.graph.set_locations(s, locations);
        b.ret(entry, Some(s));
        let (graph, mut liveness) = b.finish();

        let s_interval = liveness.interval_of(s).unwrap();
        let x_interval = liveness.interval_of(x).unwrap();

        assert_eq!(liveness.find_hint_at_definition(&graph, s_interval), None);

        // The first input dies at the definition; its register is the hint.
        liveness.intervals_mut()[x_interval].set_register(1);
        assert_eq!(liveness.find_hint_at_definition(&graph, s_interval), Some(1));
    }

    #[test]
    fn first_register_hint_from_a_fixed_input_use() {
        let mut b = GraphBuilder::new();
        let entry = b.block();
        b.set_entry(entry);
        let a = b.any_value(entry, Type::Int32);
        let consumer = b.graph.add_inst(entry, InstKind::Plain, Type::Int32, &[a]);
        let mut locations = LocationSummary::new(CallKind::NoCall);
        locations.add_input(Location::Register(2));
        b.graph.set_locations(consumer, locations);
        b.ret(entry, None);
        let (graph, liveness) = b.finish();

        let a_interval = liveness.interval_of(a).unwrap();
        let free = vec![usize::max_value(); 8];
        assert_eq!(
            liveness.find_first_register_hint(&graph, a_interval, &free),
            Some(2)
        );

        // Not when the register is taken before the use.
        let mut blocked = free.clone();
        blocked[2] = 0;
        assert_eq!(
            liveness.find_first_register_hint(&graph, a_interval, &blocked),
            None
        );
    }

    #[test]
    fn first_register_hint_from_phi_locations() {
        let (graph, mut liveness, phi, v1, v2) = diamond_with_phi();
        let phi_interval = liveness.interval_of(phi).unwrap();
        let v1_interval = liveness.interval_of(v1).unwrap();
        let v2_interval = liveness.interval_of(v2).unwrap();
        let free = vec![usize::max_value(); 8];

        // The phi's own register is the best hint for its inputs.
        liveness.intervals_mut()[phi_interval].set_register(5);
        assert_eq!(
            liveness.find_first_register_hint(&graph, v1_interval, &free),
            Some(5)
        );

        // Without it, a value dying on its incoming edge can take the
        // register of the value flowing in from the other predecessor.
        liveness.intervals_mut()[phi_interval].clear_register();
        liveness.intervals_mut()[v2_interval].set_register(4);
        assert_eq!(
            liveness.find_first_register_hint(&graph, v1_interval, &free),
            Some(4)
        );
    }
}
