//! Linear-scan register allocation.
//!
//! A by-the-book linear scan over live intervals sorted by start position,
//! with interval splitting on conflicts. Intervals move between four lists:
//! `unhandled` (not yet seen, sorted by increasing start and scanned from
//! the back), `active` (covering the current position), `inactive` (started
//! but currently in a lifetime hole), and `handled` (finished).
//!
//! Pair values are allocated to aligned register pairs `(r, r + 1)`; the
//! high half trails its low half in the unhandled list so the low half
//! drives the allocation.

use crate::codegen::CodeGenerator;
use crate::ir::{Graph, Inst, InstKind, IntervalId, Location, Policy, Type};
use crate::liverange::Intervals;
use crate::liveness::Liveness;
use crate::regalloc::{resolver, split, split_between, validate_intervals};
use log::debug;

fn high_for_low_register(reg: usize) -> usize {
    reg + 1
}

fn is_low_register(reg: usize) -> bool {
    (reg & 1) == 0
}

const MAX_LIFETIME_POSITION: usize = usize::max_value();

/// The linear-scan strategy.
pub struct LinearScanAllocator<'a> {
    graph: &'a mut Graph,
    codegen: &'a mut dyn CodeGenerator,
    liveness: &'a mut Liveness,
    /// Unhandled core intervals, ordered by decreasing start position.
    unhandled_core: Vec<IntervalId>,
    /// Unhandled floating-point intervals, same ordering.
    unhandled_fp: Vec<IntervalId>,
    handled: Vec<IntervalId>,
    active: Vec<IntervalId>,
    inactive: Vec<IntervalId>,
    /// Fixed intervals for physical registers, indexed by register number.
    physical_core_intervals: Vec<Option<IntervalId>>,
    physical_fp_intervals: Vec<Option<IntervalId>>,
    temp_intervals: Vec<IntervalId>,
    /// Live positions (the end of the using interval) per spill slot, one
    /// pool per value type.
    int_spill_slots: Vec<usize>,
    long_spill_slots: Vec<usize>,
    float_spill_slots: Vec<usize>,
    double_spill_slots: Vec<usize>,
    catch_phi_spill_slots: usize,
    safepoints: Vec<Inst>,
    processing_core_registers: bool,
    number_of_registers: usize,
    reserved_out_slots: usize,
}

fn should_process(processing_core_registers: bool, intervals: &Intervals, interval: IntervalId) -> bool {
    let is_core = !intervals[interval].ty().is_floating_point();
    processing_core_registers == is_core
}

impl<'a> LinearScanAllocator<'a> {
    /// Create a linear-scan allocator over the given graph and liveness.
    pub fn new(
        graph: &'a mut Graph,
        codegen: &'a mut dyn CodeGenerator,
        liveness: &'a mut Liveness,
    ) -> Self {
        let num_core = codegen.num_core_registers();
        let num_fp = codegen.num_fp_registers();
        // The current method pointer reserves out slots alongside call
        // arguments.
        let reserved_out_slots =
            codegen.word_size() / crate::ir::VREG_SIZE + graph.max_out_vregs();
        Self {
            graph,
            codegen,
            liveness,
            unhandled_core: Vec::new(),
            unhandled_fp: Vec::new(),
            handled: Vec::new(),
            active: Vec::new(),
            inactive: Vec::new(),
            physical_core_intervals: vec![None; num_core],
            physical_fp_intervals: vec![None; num_fp],
            temp_intervals: Vec::new(),
            int_spill_slots: Vec::new(),
            long_spill_slots: Vec::new(),
            float_spill_slots: Vec::new(),
            double_spill_slots: Vec::new(),
            catch_phi_spill_slots: 0,
            safepoints: Vec::new(),
            processing_core_registers: false,
            number_of_registers: 0,
            reserved_out_slots,
        }
    }

    /// Run allocation and resolution.
    pub fn allocate(&mut self) {
        self.allocate_registers_internal();
        resolver::resolve(
            self.graph,
            self.codegen,
            self.liveness,
            &self.safepoints,
            self.reserved_out_slots,
            self.int_spill_slots.len(),
            self.long_spill_slots.len(),
            self.float_spill_slots.len(),
            self.double_spill_slots.len(),
            self.catch_phi_spill_slots,
            &self.temp_intervals,
        );

        if cfg!(debug_assertions) {
            self.validate(true);
        }
    }

    /// Check both register banks for conflicting assignments.
    pub fn validate(&self, log_fatal_on_failure: bool) -> bool {
        self.validate_internal(true, log_fatal_on_failure)
            && self.validate_internal(false, log_fatal_on_failure)
    }

    fn validate_internal(&self, processing_core_registers: bool, log_fatal_on_failure: bool) -> bool {
        let arena = self.liveness.intervals();
        let mut intervals = Vec::new();
        for i in 0..self.liveness.num_ssa_values() {
            let inst = self.liveness.instruction_from_ssa_index(i);
            if let Some(interval) = self.liveness.interval_of(inst) {
                if should_process(processing_core_registers, arena, interval) {
                    intervals.push(interval);
                }
            }
        }
        let physical = if processing_core_registers {
            &self.physical_core_intervals
        } else {
            &self.physical_fp_intervals
        };
        for fixed in physical.iter().filter_map(|f| *f) {
            intervals.push(fixed);
        }
        for &temp in &self.temp_intervals {
            if should_process(processing_core_registers, arena, temp) {
                intervals.push(temp);
            }
        }
        validate_intervals(
            self.graph,
            self.liveness,
            self.codegen,
            &intervals,
            self.num_spill_slots(),
            self.reserved_out_slots,
            processing_core_registers,
            log_fatal_on_failure,
        )
    }

    fn num_spill_slots(&self) -> usize {
        self.int_spill_slots.len()
            + self.long_spill_slots.len()
            + self.float_spill_slots.len()
            + self.double_spill_slots.len()
            + self.catch_phi_spill_slots
    }

    fn allocate_registers_internal(&mut self) {
        // Iterate in linear post order, so that the unhandled lists end up
        // sorted and the last added interval has the lowest start position.
        let order: Vec<_> = self.graph.linear_order().to_vec();
        for &block in order.iter().rev() {
            let insts: Vec<Inst> = self.graph.insts(block).to_vec();
            for &inst in insts.iter().rev() {
                self.process_instruction(inst);
            }
            let phis: Vec<Inst> = self.graph.phis(block).to_vec();
            for &phi in &phis {
                self.process_instruction(phi);
            }

            if self.graph.is_catch_block(block) || self.graph.is_irreducible_header(block) {
                // Blocking all registers at the top of catch blocks and
                // irreducible loop headers forces live-in values of these
                // blocks to be spilled.
                let position = self.graph.lifetime_start(block);
                self.block_registers(position, position + 1, false);
            }
        }

        self.number_of_registers = self.codegen.num_core_registers();
        self.processing_core_registers = true;
        for fixed in self.physical_core_intervals.clone().into_iter().filter_map(|f| f) {
            // Fixed intervals go to inactive, not unhandled. They are the
            // only inactive intervals whose start can be after the current
            // interval, and they are never split.
            self.inactive.push(fixed);
        }
        debug!("linear scan: core bank, {} unhandled", self.unhandled_core.len());
        self.linear_scan();

        self.inactive.clear();
        self.active.clear();
        self.handled.clear();

        self.number_of_registers = self.codegen.num_fp_registers();
        self.processing_core_registers = false;
        for fixed in self.physical_fp_intervals.clone().into_iter().filter_map(|f| f) {
            self.inactive.push(fixed);
        }
        debug!("linear scan: fp bank, {} unhandled", self.unhandled_fp.len());
        self.linear_scan();
    }

    fn block_register(&mut self, location: Location, start: usize, end: usize) {
        debug_assert!(location.is_register() || location.is_fpu_register());
        let reg = location.reg();
        let is_core = location.is_register();
        let existing = if is_core {
            self.physical_core_intervals[reg]
        } else {
            self.physical_fp_intervals[reg]
        };
        let interval = match existing {
            Some(interval) => interval,
            None => {
                let ty = if is_core { Type::Int32 } else { Type::Float32 };
                let interval = self.liveness.intervals_mut().make_fixed(reg, ty);
                if is_core {
                    self.physical_core_intervals[reg] = Some(interval);
                } else {
                    self.physical_fp_intervals[reg] = Some(interval);
                }
                interval
            }
        };
        debug_assert_eq!(self.liveness.intervals()[interval].register(), Some(reg));
        self.liveness.intervals_mut()[interval].add_range(start, end);
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

    fn process_instruction(&mut self, inst: Inst) {
        if self.graph.locations(inst).is_none() {
            return;
        }
        let position = self.graph.lifetime_position(inst);

        // Create synthesized intervals for temporaries.
        let temp_count = self.graph.locations(inst).unwrap().temp_count();
        for i in 0..temp_count {
            let temp = self.graph.locations(inst).unwrap().temp_at(i);
            match temp {
                Location::Register(_) | Location::FpuRegister(_) => {
                    self.block_register(temp, position, position + 1);
                    // An explicit temporary register is still an allocation.
                    self.codegen.add_allocated_register(temp);
                }
                Location::Unallocated(Policy::RequiresRegister) => {
                    let interval = self.liveness.intervals_mut().make_temp(Type::Int32);
                    self.temp_intervals.push(interval);
                    self.liveness.intervals_mut().add_temp_use(self.graph, interval, inst, i);
                    self.unhandled_core.push(interval);
                }
                Location::Unallocated(Policy::RequiresFpuRegister) => {
                    let interval = self.liveness.intervals_mut().make_temp(Type::Float64);
                    self.temp_intervals.push(interval);
                    self.liveness.intervals_mut().add_temp_use(self.graph, interval, inst, i);
                    if self.codegen.needs_two_registers(Type::Float64) {
                        let high = self.liveness.intervals_mut().add_high_sibling(interval, true);
                        self.temp_intervals.push(high);
                        self.unhandled_fp.push(high);
                    }
                    self.unhandled_fp.push(interval);
                }
                _ => panic!("unexpected policy for temporary location {:?}", temp),
            }
        }

        let core_register = !self.graph.ty(inst).is_floating_point();

        if self.graph.locations(inst).unwrap().needs_safepoint() {
            self.safepoints.push(inst);
        }

        if self.graph.locations(inst).unwrap().will_call() {
            self.block_registers(position, position + 1, /* caller_save_only */ true);
        }

        let input_count = self.graph.locations(inst).unwrap().input_count();
        for i in 0..input_count {
            let input = self.graph.locations(inst).unwrap().in_at(i);
            if input.is_register() || input.is_fpu_register() {
                self.block_register(input, position, position + 1);
            } else if input.is_pair() {
                self.block_register(input.to_low(), position, position + 1);
                self.block_register(input.to_high(), position, position + 1);
            }
        }

        let current = match self.liveness.interval_of(inst) {
            Some(current) => current,
            None => return,
        };

        {
            let arena = self.liveness.intervals();
            let unhandled = if core_register { &self.unhandled_core } else { &self.unhandled_fp };
            debug_assert!(unhandled
                .last()
                .map_or(true, |&back| arena[current].starts_before_or_at(&arena[back])));
        }

        if self.codegen.needs_two_registers(self.graph.ty(inst)) {
            self.liveness.intervals_mut().add_high_sibling(current, false);
        }

        // Record the safepoints this interval is live across. The safepoint
        // list was collected backwards, so iterating it from the back
        // visits increasing positions.
        for safepoint_index in (0..self.safepoints.len()).rev() {
            let safepoint = self.safepoints[safepoint_index];
            let safepoint_position = self.graph.lifetime_position(safepoint);
            let arena = self.liveness.intervals();
            if safepoint_position == arena[current].start() {
                // The safepoint is for this instruction, so the location of
                // the instruction does not need to be saved.
                debug_assert_eq!(safepoint_index, self.safepoints.len() - 1);
                debug_assert_eq!(safepoint, inst);
                continue;
            } else if arena[current].is_dead_at(safepoint_position) {
                break;
            } else if !arena[current].covers(safepoint_position) {
                // Hole in the interval.
                continue;
            }
            self.liveness.intervals_mut()[current].add_safepoint(safepoint, safepoint_position);
        }
        self.liveness.intervals()[current].reset_search_cache();

        // Some instructions define their output in a fixed register or
        // stack slot. For a fixed register we create a blocking range, and
        // shift the interval's start past it.
        let output = self.graph.locations(inst).unwrap().out();
        if output.is_unallocated() && output.policy() == Policy::SameAsFirstInput {
            let first = self.graph.locations(inst).unwrap().in_at(0);
            if first.is_register() || first.is_fpu_register() {
                self.liveness.intervals_mut()[current].set_from(position + 1);
                self.liveness.intervals_mut()[current].set_register(first.reg());
            } else if first.is_pair() {
                self.liveness.intervals_mut()[current].set_from(position + 1);
                self.liveness.intervals_mut()[current].set_register(first.low());
                let high = self.liveness.intervals().high_of(current);
                self.liveness.intervals_mut()[high].set_register(first.high());
                self.liveness.intervals_mut()[high].set_from(position + 1);
            }
        } else if output.is_register() || output.is_fpu_register() {
            self.liveness.intervals_mut()[current].set_from(position + 1);
            self.liveness.intervals_mut()[current].set_register(output.reg());
            self.block_register(output, position, position + 1);
        } else if output.is_pair() {
            self.liveness.intervals_mut()[current].set_from(position + 1);
            self.liveness.intervals_mut()[current].set_register(output.low());
            let high = self.liveness.intervals().high_of(current);
            self.liveness.intervals_mut()[high].set_register(output.high());
            self.liveness.intervals_mut()[high].set_from(position + 1);
            self.block_register(output.to_low(), position, position + 1);
            self.block_register(output.to_high(), position, position + 1);
        } else if output.is_stack_slot() || output.is_double_stack_slot() {
            self.liveness.intervals_mut()[current].set_spill_slot(output.stack_index());
        } else {
            debug_assert!(!output.is_valid() || output.is_unallocated() || output.is_constant());
        }

        if self.graph.is_catch_phi(inst) {
            self.allocate_spill_slot_for_catch_phi(inst);
        }

        let arena = self.liveness.intervals();
        if arena[current].has_spill_slot() || self.graph.is_constant(inst) {
            // The value already lives on the stack (parameters) or can be
            // materialized at any point (constants): allocate a register
            // only from just before the first use that needs one.
            if let Some(first_register_use) = arena.first_register_use(self.graph, current) {
                let interval_start = arena[current].start();
                let new_interval = split_between(
                    self.graph,
                    self.liveness,
                    current,
                    interval_start,
                    first_register_use - 1,
                );
                let unhandled = if core_register {
                    &mut self.unhandled_core
                } else {
                    &mut self.unhandled_fp
                };
                add_sorted(self.liveness.intervals(), unhandled, new_interval);
            } else {
                // We won't allocate a register for this value.
            }
        } else {
            // Don't push directly: temp or safepoint intervals for this
            // instruction may have been added, and those come first.
            let unhandled = if core_register {
                &mut self.unhandled_core
            } else {
                &mut self.unhandled_fp
            };
            add_sorted(self.liveness.intervals(), unhandled, current);
        }
    }

    fn allocate_spill_slot_for_catch_phi(&mut self, phi: Inst) {
        let interval = self.liveness.interval_of(phi).expect("catch phi has no interval");
        let block = self.graph.block_of(phi);
        let phis = self.graph.phis(block);
        let index = phis.iter().position(|&p| p == phi).unwrap();
        let previous = if index > 0 { Some(phis[index - 1]) } else { None };

        if let Some(previous) = previous.filter(|&p| self.graph.is_vreg_equivalent(phi, p)) {
            // An equivalent of the previous phi: it gets the same slot.
            let prev_interval = self.liveness.interval_of(previous).unwrap();
            let slot = self.liveness.intervals()[prev_interval]
                .spill_slot()
                .expect("equivalent catch phi not yet assigned");
            self.liveness.intervals_mut()[interval].set_spill_slot(slot);
        } else {
            let slot = self.catch_phi_spill_slots;
            self.liveness.intervals_mut()[interval].set_spill_slot(slot);
            self.catch_phi_spill_slots += self
                .liveness
                .intervals()
                .number_of_spill_slots_needed(self.graph, interval);
        }
    }

    fn is_blocked(&self, reg: usize) -> bool {
        if self.processing_core_registers {
            self.codegen.is_blocked_core(reg)
        } else {
            self.codegen.is_blocked_fp(reg)
        }
    }

    fn is_caller_save_register(&self, reg: usize) -> bool {
        if self.processing_core_registers {
            !self.codegen.is_core_callee_save(reg)
        } else {
            !self.codegen.is_fp_callee_save(reg)
        }
    }

    fn linear_scan(&mut self) {
        loop {
            let current = {
                let unhandled = if self.processing_core_registers {
                    &mut self.unhandled_core
                } else {
                    &mut self.unhandled_fp
                };
                match unhandled.pop() {
                    Some(current) => current,
                    None => break,
                }
            };

            {
                let arena = self.liveness.intervals();
                debug_assert!(!arena[current].is_fixed() && !arena[current].has_spill_slot());
                let unhandled = if self.processing_core_registers {
                    &self.unhandled_core
                } else {
                    &self.unhandled_fp
                };
                // Low halves are always processed right before their high.
                debug_assert!(unhandled
                    .last()
                    .map_or(true, |&back| arena[back].start() >= arena[current].start()));
                debug_assert!(
                    !arena.is_low(current) || arena.is_high(*unhandled.last().unwrap())
                );
                debug_assert!(
                    arena.is_low(current)
                        || unhandled.last().map_or(true, |&back| !arena.is_high(back))
                );
            }

            let position = self.liveness.intervals()[current].start();

            // Newly deactivated intervals need no re-check below.
            let old_inactive_len = self.inactive.len();

            // Move dead active intervals to handled, and active intervals
            // with a lifetime hole here to inactive.
            let old_active = core::mem::replace(&mut self.active, Vec::new());
            for interval in old_active {
                if self.liveness.intervals()[interval].is_dead_at(position) {
                    self.handled.push(interval);
                } else if !self.liveness.intervals()[interval].covers(position) {
                    self.inactive.push(interval);
                } else {
                    self.active.push(interval);
                }
            }

            // Move dead inactive intervals to handled, and inactive
            // intervals covering this position back to active.
            let mut index = 0;
            let mut end = old_inactive_len;
            while index < end {
                let interval = self.inactive[index];
                debug_assert!(
                    self.liveness.intervals()[interval].start() < position
                        || self.liveness.intervals()[interval].is_fixed()
                );
                if self.liveness.intervals()[interval].is_dead_at(position) {
                    self.inactive.remove(index);
                    end -= 1;
                    self.handled.push(interval);
                } else if self.liveness.intervals()[interval].covers(position) {
                    self.inactive.remove(index);
                    end -= 1;
                    self.active.push(interval);
                } else {
                    index += 1;
                }
            }

            {
                let arena = self.liveness.intervals();
                if arena.is_high(current) && !arena[arena.low_of(current)].has_register() {
                    debug_assert!(!arena[current].has_register());
                    // Allocating the low half failed; the tail split of the
                    // high half is already queued in unhandled.
                    continue;
                }
            }

            let mut success = self.try_allocate_free_reg(current);
            if !success {
                success = self.allocate_blocked_reg(current);
            }
            if success {
                let reg = self.liveness.intervals()[current].register().unwrap();
                self.codegen.add_allocated_register(if self.processing_core_registers {
                    Location::Register(reg)
                } else {
                    Location::FpuRegister(reg)
                });
                self.active.push(current);
                let arena = self.liveness.intervals();
                if arena.has_high(current) && !arena[arena.high_of(current)].has_register() {
                    let high = arena.high_of(current);
                    self.liveness.intervals_mut()[high].set_register(high_for_low_register(reg));
                }
            }
        }
    }

    // The interval becomes inactive at `position`: its register is free
    // until that interval's next use, or entirely if it is dead.
    fn free_if_not_cover_at(&self, interval: IntervalId, position: usize, free_until: &mut [usize]) {
        let arena = self.liveness.intervals();
        debug_assert!(!arena.is_high(interval));
        if arena[interval].is_dead_at(position) {
            free_until[arena[interval].register().unwrap()] = MAX_LIFETIME_POSITION;
            if arena.has_high(interval) {
                let high = arena.high_of(interval);
                debug_assert!(arena[high].is_dead_at(position));
                free_until[arena[high].register().unwrap()] = MAX_LIFETIME_POSITION;
            }
        } else if !arena[interval].covers_slow(position) {
            let next_use = arena
                .first_use_after(self.graph, interval, position)
                .unwrap_or(MAX_LIFETIME_POSITION);
            free_until[arena[interval].register().unwrap()] = next_use;
            if arena.has_high(interval) {
                let high = arena.high_of(interval);
                debug_assert!(!arena[high].covers_slow(position));
                free_until[arena[high].register().unwrap()] = next_use;
            }
        }
    }

    // Find a free register for the whole of `current`, or for a prefix that
    // we split off. Returns false if no register is free at its start.
    fn try_allocate_free_reg(&mut self, current: IntervalId) -> bool {
        let mut free_until = vec![MAX_LIFETIME_POSITION; self.number_of_registers];

        for &interval in &self.active {
            debug_assert!(self.liveness.intervals()[interval].has_register());
            free_until[self.liveness.intervals()[interval].register().unwrap()] = 0;
        }

        // An unsplit interval starting at an instruction may reuse the
        // registers of that instruction's dying inputs.
        let defined_by = self.liveness.intervals()[current].defined_by();
        if let Some(defined_by) = defined_by {
            if !self.liveness.intervals().is_split(current) {
                let locations = self.graph.locations(defined_by).expect("definition has no locations");
                if !locations.output_can_overlap_with_inputs() && locations.out().is_unallocated() {
                    for (i, &input) in self.graph.inputs(defined_by).iter().enumerate() {
                        if !locations.in_at(i).is_valid() {
                            continue;
                        }
                        if let Some(input_parent) = self.liveness.interval_of(input) {
                            // The last sibling of the input holds its
                            // location at `defined_by`.
                            let arena = self.liveness.intervals();
                            let interval = arena.last_sibling(input_parent);
                            if arena[interval].has_register()
                                && arena[interval].same_register_kind(&arena[current])
                            {
                                // The input stays live until the end of
                                // `defined_by`; probe one position later.
                                debug_assert!(arena[interval]
                                    .covers_slow(self.graph.lifetime_position(defined_by)));
                                let position = self.graph.lifetime_position(defined_by) + 1;
                                self.free_if_not_cover_at(interval, position, &mut free_until);
                            }
                        }
                    }
                }
            }
        }

        // Each inactive interval frees its register only until the next
        // intersection with `current`.
        for &inactive in &self.inactive {
            let arena = self.liveness.intervals();
            debug_assert!(!arena[inactive].is_temp());
            if !arena.is_split(current) && !arena[inactive].is_fixed() {
                // Thanks to SSA, a non-split interval starting in a hole of
                // an inactive interval never intersects with it. Fixed
                // intervals don't come from SSA, hence the guard.
                debug_assert_eq!(
                    arena[inactive].first_intersection_with(&arena[current]),
                    None
                );
                continue;
            }

            debug_assert!(arena[inactive].has_register());
            let reg = arena[inactive].register().unwrap();
            if free_until[reg] == 0 {
                // Already used by an active interval.
                continue;
            }
            if let Some(intersection) = arena[inactive].first_intersection_with(&arena[current]) {
                free_until[reg] = core::cmp::min(free_until[reg], intersection);
            }
        }

        let reg;
        if self.liveness.intervals()[current].has_register() {
            // Some instructions have a fixed register output.
            reg = self.liveness.intervals()[current].register().unwrap();
            if free_until[reg] == 0 {
                debug_assert!(self.liveness.intervals().is_high(current));
                // allocate_blocked_reg will spill the holder.
                return false;
            }
        } else {
            debug_assert!(!self.liveness.intervals().is_high(current));
            let hint = self.liveness.find_first_register_hint(self.graph, current, &free_until);
            let arena = self.liveness.intervals();
            let usable_hint = match hint {
                // If the hint cannot host a pair, just allocate a new one.
                Some(h) => !(arena.is_low(current) && self.is_blocked(high_for_low_register(h))),
                None => false,
            };
            if usable_hint {
                let h = hint.unwrap();
                debug_assert!(!self.is_blocked(h));
                reg = h;
            } else if arena.is_low(current) {
                reg = match self.find_available_register_pair(&free_until, arena[current].start()) {
                    Some(reg) => reg,
                    None => return false,
                };
            } else {
                reg = match self.find_available_register(&free_until, current) {
                    Some(reg) => reg,
                    None => return false,
                };
            }
        }

        // If we could not find a register, we need to spill.
        if free_until[reg] == 0 {
            return false;
        }

        if self.liveness.intervals().is_low(current) {
            // The high half must be available too.
            let arena = self.liveness.intervals();
            let high_reg = arena[arena.high_of(current)]
                .register()
                .unwrap_or_else(|| high_for_low_register(reg));
            if free_until[high_reg] == 0 {
                return false;
            }
        }

        self.liveness.intervals_mut()[current].set_register(reg);
        if !self.liveness.intervals()[current].is_dead_at(free_until[reg]) {
            // The register is only available for a prefix of `current`:
            // split before the position where it becomes unavailable.
            let start = self.liveness.intervals()[current].start();
            let new_interval = split_between(self.graph, self.liveness, current, start, free_until[reg]);
            debug_assert_ne!(new_interval, current);
            debug!("split interval {:?} for register {} availability", current, reg);
            let unhandled = if self.processing_core_registers {
                &mut self.unhandled_core
            } else {
                &mut self.unhandled_fp
            };
            add_sorted(self.liveness.intervals(), unhandled, new_interval);
        }
        true
    }

    // Pick the register pair used farthest in the future.
    fn find_available_register_pair(&self, next_use: &[usize], starting_at: usize) -> Option<usize> {
        let mut reg: Option<usize> = None;
        for i in 0..self.number_of_registers {
            if self.is_blocked(i) || !is_low_register(i) {
                continue;
            }
            let high = high_for_low_register(i);
            if high >= self.number_of_registers || self.is_blocked(high) {
                continue;
            }
            match reg {
                None => {
                    reg = Some(i);
                    if next_use[i] == MAX_LIFETIME_POSITION && next_use[high] == MAX_LIFETIME_POSITION {
                        break;
                    }
                }
                Some(r) => {
                    let existing_high = high_for_low_register(r);
                    if next_use[i] >= next_use[r] && next_use[high] >= next_use[existing_high] {
                        reg = Some(i);
                        if next_use[i] == MAX_LIFETIME_POSITION
                            && next_use[high] == MAX_LIFETIME_POSITION
                        {
                            break;
                        }
                    } else if next_use[r] <= starting_at || next_use[existing_high] <= starting_at {
                        // The current candidate is known unavailable; try a
                        // new one unconditionally.
                        reg = Some(i);
                    }
                }
            }
        }
        reg
    }

    // Pick the free register used farthest in the future, preferring
    // caller-save registers for intervals that do not cross a call.
    fn find_available_register(&self, next_use: &[usize], current: IntervalId) -> Option<usize> {
        let prefers_caller_save = !self.liveness.intervals()[current].has_will_call_safepoint(self.graph);
        let mut reg: Option<usize> = None;
        for i in 0..self.number_of_registers {
            if self.is_blocked(i) {
                continue;
            }

            if next_use[i] == MAX_LIFETIME_POSITION {
                if prefers_caller_save && !self.is_caller_save_register(i) {
                    // Smaller register numbers can give shorter encodings;
                    // keep this candidate only if the previous one was not
                    // fully available, and keep looking for a caller-save.
                    if reg.map_or(true, |r| next_use[r] != MAX_LIFETIME_POSITION) {
                        reg = Some(i);
                    }
                    continue;
                }
                reg = Some(i);
                break;
            }

            match reg {
                None => reg = Some(i),
                Some(r) => {
                    if next_use[i] > next_use[r] {
                        reg = Some(i);
                    }
                }
            }
        }
        reg
    }

    // Split the first active interval that can break a pair-alignment
    // deadlock: a non-pair interval, an unaligned pair, or a pair whose low
    // register is odd.
    fn try_split_non_pair_or_unaligned_pair_interval_at(
        &mut self,
        position: usize,
        first_register_use: usize,
        next_use: &[usize],
    ) -> bool {
        for index in 0..self.active.len() {
            let active = self.active[index];
            let splittable = {
                let arena = self.liveness.intervals();
                debug_assert!(arena[active].has_register());
                if arena[active].is_fixed() || arena.is_high(active) {
                    continue;
                }
                let reg = arena[active].register().unwrap();
                if first_register_use > next_use[reg] {
                    continue;
                }
                let unaligned_pair = arena.is_low(active)
                    && high_for_low_register(reg) != arena[arena.high_of(active)].register().unwrap();
                !arena.is_low(active) || unaligned_pair || !is_low_register(reg)
            };
            if splittable {
                let new_interval = split(self.liveness.intervals_mut(), active, position);
                if new_interval != active {
                    self.handled.push(active);
                }
                remove_interval_and_potential_other_half(
                    self.liveness.intervals(),
                    &mut self.active,
                    index,
                );
                let unhandled = if self.processing_core_registers {
                    &mut self.unhandled_core
                } else {
                    &mut self.unhandled_fp
                };
                add_sorted(self.liveness.intervals(), unhandled, new_interval);
                return true;
            }
        }
        false
    }

    // Find the register used farthest in the future and spill the interval
    // holding it; if the first use of `current` is after that point, spill
    // `current` instead.
    fn allocate_blocked_reg(&mut self, current: IntervalId) -> bool {
        let current_start = self.liveness.intervals()[current].start();
        let first_register_use_opt =
            self.liveness.intervals().first_register_use(self.graph, current);

        if self.liveness.intervals()[current].has_register() {
            // Only the high half of a pair comes here with a register: the
            // low half already reserved it. We still proceed to split the
            // active and inactive holders of that register.
            debug_assert!(self.liveness.intervals().is_high(current));
            debug_assert!(
                first_register_use_opt.is_some()
                    || self.liveness.intervals().next_sibling(current).is_some()
            );
        } else if first_register_use_opt.is_none() {
            self.allocate_spill_slot_for(current);
            return false;
        }
        let first_register_use = first_register_use_opt.unwrap_or(MAX_LIFETIME_POSITION);

        let mut next_use = vec![MAX_LIFETIME_POSITION; self.number_of_registers];

        // For each active interval, find the next use of its register after
        // the start of `current`.
        for &active in &self.active {
            let arena = self.liveness.intervals();
            debug_assert!(arena[active].has_register());
            let reg = arena[active].register().unwrap();
            if arena[active].is_fixed() {
                next_use[reg] = current_start;
            } else if let Some(use_position) =
                arena.first_register_use_after(self.graph, active, current_start)
            {
                next_use[reg] = use_position;
            }
        }

        // Same for inactive intervals, bounded by their next intersection.
        for &inactive in &self.inactive {
            let arena = self.liveness.intervals();
            debug_assert!(!arena[inactive].is_temp());
            if !arena.is_split(current) && !arena[inactive].is_fixed() {
                debug_assert_eq!(
                    arena[inactive].first_intersection_with(&arena[current]),
                    None
                );
                continue;
            }
            debug_assert!(arena[inactive].has_register());
            let reg = arena[inactive].register().unwrap();
            if let Some(intersection) = arena[inactive].first_intersection_with(&arena[current]) {
                if arena[inactive].is_fixed() {
                    next_use[reg] = core::cmp::min(intersection, next_use[reg]);
                } else if let Some(use_position) =
                    arena.first_use_after(self.graph, inactive, current_start)
                {
                    next_use[reg] = core::cmp::min(use_position, next_use[reg]);
                }
            }
        }

        let reg;
        let mut should_spill = false;
        if self.liveness.intervals()[current].has_register() {
            debug_assert!(self.liveness.intervals().is_high(current));
            reg = self.liveness.intervals()[current].register().unwrap();
            // Allocating the low half ensured the high register was free.
            debug_assert!(first_register_use < next_use[reg]);
        } else if self.liveness.intervals().is_low(current) {
            reg = self
                .find_available_register_pair(&next_use, first_register_use)
                .expect("no register pair in the register file");
            should_spill = first_register_use >= next_use[reg]
                || first_register_use >= next_use[high_for_low_register(reg)];
        } else {
            debug_assert!(!self.liveness.intervals().is_high(current));
            reg = self
                .find_available_register(&next_use, current)
                .expect("no unblocked register in the register file");
            should_spill = first_register_use >= next_use[reg];
        }

        if should_spill {
            debug_assert!(!self.liveness.intervals().is_high(current));
            let is_allocation_at_use_site = current_start >= first_register_use - 1;
            if is_allocation_at_use_site {
                if !self.liveness.intervals().is_low(current) {
                    // Splitting `current` here cannot make progress; this
                    // would loop forever, so fail loudly.
                    panic!(
                        "not enough registers available for interval {:?} at {}",
                        current,
                        first_register_use - 1
                    );
                }

                // The allocation is blocked by non-pair intervals or
                // unaligned pair intervals. Split one of them and retry
                // `current` right away.
                let success = self.try_split_non_pair_or_unaligned_pair_interval_at(
                    current_start,
                    first_register_use,
                    &next_use,
                );
                debug_assert!(success);
                {
                    let arena = self.liveness.intervals();
                    let unhandled = if self.processing_core_registers {
                        &self.unhandled_core
                    } else {
                        &self.unhandled_fp
                    };
                    let existing = *unhandled.last().unwrap();
                    debug_assert!(arena.is_high(existing));
                    debug_assert_eq!(arena.low_of(existing), current);
                }
                let unhandled = if self.processing_core_registers {
                    &mut self.unhandled_core
                } else {
                    &mut self.unhandled_fp
                };
                unhandled.push(current);
            } else {
                // First use is after the found register's next use: spill
                // `current` up to just before its first register use.
                self.allocate_spill_slot_for(current);
                let new_interval = split_between(
                    self.graph,
                    self.liveness,
                    current,
                    current_start,
                    first_register_use - 1,
                );
                debug_assert_ne!(new_interval, current);
                debug!("spilled interval {:?}, tail {:?}", current, new_interval);
                let unhandled = if self.processing_core_registers {
                    &mut self.unhandled_core
                } else {
                    &mut self.unhandled_fp
                };
                add_sorted(self.liveness.intervals(), unhandled, new_interval);
            }
            false
        } else {
            // Take the register, and spill the active and inactive
            // intervals holding it.
            self.liveness.intervals_mut()[current].set_register(reg);

            if let Some(index) = self
                .active
                .iter()
                .position(|&a| self.liveness.intervals()[a].register() == Some(reg))
            {
                let active = self.active[index];
                debug_assert!(!self.liveness.intervals()[active].is_fixed());
                let new_interval = split(self.liveness.intervals_mut(), active, current_start);
                if new_interval != active {
                    self.handled.push(active);
                }
                remove_interval_and_potential_other_half(
                    self.liveness.intervals(),
                    &mut self.active,
                    index,
                );
                let unhandled = if self.processing_core_registers {
                    &mut self.unhandled_core
                } else {
                    &mut self.unhandled_fp
                };
                add_sorted(self.liveness.intervals(), unhandled, new_interval);
            }

            let mut index = 0;
            while index < self.inactive.len() {
                let inactive = self.inactive[index];
                let mut erased = false;
                if self.liveness.intervals()[inactive].register() == Some(reg) {
                    let (is_exempt, intersection) = {
                        let arena = self.liveness.intervals();
                        if !arena.is_split(current) && !arena[inactive].is_fixed() {
                            debug_assert_eq!(
                                arena[inactive].first_intersection_with(&arena[current]),
                                None
                            );
                            (true, None)
                        } else {
                            (false, arena[inactive].first_intersection_with(&arena[current]))
                        }
                    };
                    if !is_exempt {
                        if let Some(intersection) = intersection {
                            if self.liveness.intervals()[inactive].is_fixed() {
                                let new_interval =
                                    split(self.liveness.intervals_mut(), current, intersection);
                                debug_assert_ne!(new_interval, current);
                                let unhandled = if self.processing_core_registers {
                                    &mut self.unhandled_core
                                } else {
                                    &mut self.unhandled_fp
                                };
                                add_sorted(self.liveness.intervals(), unhandled, new_interval);
                            } else {
                                // Splitting at the start of `current` in
                                // fact splits at the end of the inactive
                                // interval's lifetime hole.
                                let new_interval =
                                    split(self.liveness.intervals_mut(), inactive, current_start);
                                debug_assert_ne!(new_interval, inactive);
                                index = remove_interval_and_potential_other_half(
                                    self.liveness.intervals(),
                                    &mut self.inactive,
                                    index,
                                );
                                erased = true;
                                self.handled.push(inactive);
                                let unhandled = if self.processing_core_registers {
                                    &mut self.unhandled_core
                                } else {
                                    &mut self.unhandled_fp
                                };
                                add_sorted(self.liveness.intervals(), unhandled, new_interval);
                            }
                        }
                    }
                }
                if !erased {
                    index += 1;
                }
            }

            true
        }
    }

    fn allocate_spill_slot_for(&mut self, interval: IntervalId) {
        {
            let arena = self.liveness.intervals();
            if arena.is_high(interval) {
                // The low half takes care of the spill slot.
                debug_assert!(!arena[arena.low_of(interval)].has_register());
                return;
            }
        }

        let parent = self.liveness.intervals().parent(interval);

        // A value gets one spill slot for its entire lifetime.
        if self.liveness.intervals()[parent].has_spill_slot() {
            return;
        }

        let defined_by = self.liveness.intervals()[parent]
            .defined_by()
            .expect("spilled value has no definition");
        debug_assert!(!self.graph.is_catch_phi(defined_by));

        if let InstKind::Parameter(index) = self.graph.kind(defined_by) {
            // Parameters have their own stack slot.
            let slot = self.codegen.stack_slot_of_parameter(index);
            self.liveness.intervals_mut()[parent].set_spill_slot(slot);
            return;
        }

        if self.graph.is_current_method(defined_by) {
            self.liveness.intervals_mut()[parent].set_spill_slot(0);
            return;
        }

        if self.graph.is_constant(defined_by) {
            // Constants don't need a spill slot; they rematerialize.
            return;
        }

        let parent_start = self.liveness.intervals()[parent].start();
        let needed = self
            .liveness
            .intervals()
            .number_of_spill_slots_needed(self.graph, interval);
        let end = {
            let arena = self.liveness.intervals();
            arena[arena.last_sibling(interval)].end()
        };

        let spill_slots = match self.liveness.intervals()[interval].ty() {
            Type::Float64 => &mut self.double_spill_slots,
            Type::Int64 | Type::Uint64 => &mut self.long_spill_slots,
            Type::Float32 => &mut self.float_spill_slots,
            _ => &mut self.int_spill_slots,
        };

        // First fit: a slot is reusable once its previous tenant's lifetime
        // is over.
        let mut slot = 0;
        while slot < spill_slots.len() {
            let upper = core::cmp::min(slot + needed, spill_slots.len());
            if (slot..upper).all(|s| spill_slots[s] <= parent_start) {
                break;
            }
            slot += 1;
        }

        let upper = slot + needed;
        if upper > spill_slots.len() {
            spill_slots.resize(upper, 0);
        }
        for s in slot..upper {
            spill_slots[s] = end;
        }

        // The actual stack offset is computed during resolution, once the
        // slot counts of every type are known.
        self.liveness.intervals_mut()[parent].set_spill_slot(slot);
    }
}

// Insert `interval` keeping decreasing start order, with a pair's high half
// placed right before its low half so the low is processed first.
fn add_sorted(arena: &Intervals, array: &mut Vec<IntervalId>, interval: IntervalId) {
    debug_assert!(!arena[interval].is_fixed() && !arena[interval].has_spill_slot());
    let mut insert_at = 0;
    for i in (1..=array.len()).rev() {
        let current = array[i - 1];
        if arena[current].starts_after(&arena[interval]) && !arena.is_high(current) {
            insert_at = i;
            break;
        }
    }

    if arena.has_high(interval) {
        array.insert(insert_at, interval);
        array.insert(insert_at, arena.high_of(interval));
    } else if arena.is_high(interval) {
        array.insert(insert_at, arena.low_of(interval));
        array.insert(insert_at, interval);
    } else {
        array.insert(insert_at, interval);
    }
}

// Remove an interval, and its pair half next to it if it has one. Returns
// the index of the element following the removed ones.
fn remove_interval_and_potential_other_half(
    arena: &Intervals,
    intervals: &mut Vec<IntervalId>,
    index: usize,
) -> usize {
    let interval = intervals[index];
    if arena.is_low(interval) {
        debug_assert!(index + 1 < intervals.len());
        debug_assert_eq!(intervals[index + 1], arena.high_of(interval));
        intervals.drain(index..index + 2);
        index
    } else if arena.is_high(interval) {
        debug_assert!(index > 0);
        debug_assert_eq!(intervals[index - 1], arena.low_of(interval));
        intervals.drain(index - 1..index + 1);
        index - 1
    } else {
        intervals.remove(index);
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CallKind, LocationSummary};
    use crate::test_util::TestCodeGenerator;

    // The scan must split the interval it is allocating at the minimum next
    // intersection when inactive intervals share its register.
    #[test]
    fn free_until() {
        let mut graph = Graph::new();
        let entry = graph.add_block();
        let exit = graph.add_block();
        graph.add_edge(entry, exit);
        graph.set_entry_block(entry);
        graph.set_exit_block(exit);
        // Enough instructions to give meaning to positions up to 70.
        let mut first = None;
        for _ in 0..20 {
            let inst = graph.add_inst(entry, InstKind::Plain, Type::Int32, &[]);
            let mut locations = LocationSummary::new(CallKind::NoCall);
            locations.set_out(Location::Unallocated(Policy::Any));
            graph.set_locations(inst, locations);
            first.get_or_insert(inst);
        }
        let user = graph.add_inst(exit, InstKind::ControlFlow, Type::Int32, &[first.unwrap()]);
        let mut locations = LocationSummary::new(CallKind::NoCall);
        locations.add_input(Location::Unallocated(Policy::Any));
        graph.set_locations(user, locations);
        graph.analyze();

        let mut liveness = Liveness::compute(&mut graph);
        let mut codegen = TestCodeGenerator::core_only(1);
        let unhandled = liveness.interval_of(first.unwrap()).unwrap();
        // An artificial long range, so the interval crosses the inactive
        // intervals set up below.
        liveness.intervals_mut()[unhandled].add_loop_range(0, 60);

        // Only a split interval can intersect with inactive intervals.
        let unhandled = split(liveness.intervals_mut(), unhandled, 5);

        let mut allocator = LinearScanAllocator::new(&mut graph, &mut codegen, &mut liveness);
        // Three fixed intervals holding register 0, starting at different
        // positions; the one to pick sits in the middle so the result does
        // not depend on list order.
        for range in &[[40, 50], [20, 30], [60, 70]] {
            let interval = allocator.liveness.intervals_mut().make_fixed(0, Type::Int32);
            allocator.liveness.intervals_mut()[interval].add_range(range[0], range[1]);
            allocator.inactive.push(interval);
        }

        allocator.number_of_registers = 1;
        allocator.processing_core_registers = true;

        assert!(allocator.try_allocate_free_reg(unhandled));

        // The interval was split where the register is next needed.
        assert_eq!(allocator.unhandled_core.len(), 1);
        let tail = allocator.unhandled_core[0];
        assert_eq!(allocator.liveness.intervals()[tail].start(), 20);
    }
}
