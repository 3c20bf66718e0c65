//! Live intervals: the central data structure of register allocation.
//!
//! An interval is a list of disjoint live ranges where an SSA value is live,
//! together with its uses, environment uses, and covered safepoints.
//! Splitting an interval produces *siblings*: later portions of the same
//! value that may be allocated elsewhere. Only the parent interval holds the
//! canonical use lists; siblings view them through position windows.
//!
//! Intervals reference each other a lot (parent, sibling chain, paired
//! high/low half), so they live in an arena, [`Intervals`], and refer to each
//! other with [`IntervalId`] handles instead of pointers.

use crate::entity::packed_option::PackedOption;
use crate::entity::{EntityRef, PrimaryMap};
use crate::ir::{Block, Graph, Inst, IntervalId, Location, Policy, Type};
use core::cell::Cell;
use core::ops::{Index, IndexMut};
use smallvec::SmallVec;

/// A half-open position interval `[start, end)` where a value is live.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LiveRange {
    /// First live position.
    pub start: usize,
    /// First position past the range.
    pub end: usize,
}

impl LiveRange {
    /// Do the two ranges share at least one position?
    pub fn intersects_with(self, other: LiveRange) -> bool {
        (self.start >= other.start && self.start < other.end)
            || (other.start >= self.start && other.start < self.end)
    }

    /// Does this range end at or before `other` begins?
    pub fn is_before(self, other: LiveRange) -> bool {
        self.end <= other.start
    }
}

/// A use of a value at a given position.
///
/// A use without a user instruction is *synthesized*: it pins a value across
/// a loop back edge and never demands a register.
#[derive(Copy, Clone, Debug)]
pub struct UsePosition {
    user: PackedOption<Inst>,
    input_index: usize,
    position: usize,
}

impl UsePosition {
    fn new(user: Inst, input_index: usize, position: usize) -> Self {
        Self {
            user: Some(user).into(),
            input_index,
            position,
        }
    }

    fn synthesized(position: usize) -> Self {
        Self {
            user: None.into(),
            input_index: usize::max_value(),
            position,
        }
    }

    /// The position of the use.
    pub fn position(&self) -> usize {
        self.position
    }

    /// The instruction using the value, unless the use is synthesized.
    pub fn user(&self) -> Option<Inst> {
        self.user.expand()
    }

    /// The input slot of the user this use feeds.
    pub fn input_index(&self) -> usize {
        self.input_index
    }

    /// Is this a synthesized back-edge use?
    pub fn is_synthesized(&self) -> bool {
        self.user.is_none()
    }

    /// Does the user's location summary demand a register for this input?
    pub fn requires_register(&self, graph: &Graph) -> bool {
        match self.user.expand() {
            None => false,
            Some(user) => {
                let location = graph
                    .locations(user)
                    .expect("user has no locations")
                    .in_at(self.input_index);
                location.is_unallocated() && location.requires_register_kind()
            }
        }
    }
}

/// A use of a value by an instruction's environment (debug state).
#[derive(Copy, Clone, Debug)]
pub struct EnvUsePosition {
    user: Inst,
    input_index: usize,
    position: usize,
}

impl EnvUsePosition {
    /// The position of the use.
    pub fn position(&self) -> usize {
        self.position
    }

    /// The instruction whose environment observes the value.
    pub fn user(&self) -> Inst {
        self.user
    }

    /// The environment slot the value occupies.
    pub fn input_index(&self) -> usize {
        self.input_index
    }
}

/// A safepoint covered by an interval.
#[derive(Copy, Clone, Debug)]
pub struct SafepointPosition {
    instruction: Inst,
    position: usize,
}

impl SafepointPosition {
    /// The safepoint instruction.
    pub fn instruction(&self) -> Inst {
        self.instruction
    }

    /// Its lifetime position.
    pub fn position(&self) -> usize {
        self.position
    }
}

/// Find the window of `uses` with positions in `[begin, end)`.
///
/// `uses` must be sorted by position; returns an index range.
pub fn find_matching_use_range<T, F>(uses: &[T], position_of: F, begin: usize, end: usize) -> (usize, usize)
where
    F: Fn(&T) -> usize,
{
    let lo = uses.iter().position(|u| position_of(u) >= begin).unwrap_or(uses.len());
    let hi = uses[lo..]
        .iter()
        .position(|u| position_of(u) >= end)
        .map(|i| lo + i)
        .unwrap_or(uses.len());
    (lo, hi)
}

/// A live interval: the positions where one SSA value must be addressable.
pub struct LiveInterval {
    /// Disjoint ranges, sorted by start.
    ranges: SmallVec<[LiveRange; 2]>,
    /// Index of the first range at or after the current scan position.
    /// `ranges.len()` when the scan has moved past the interval.
    search_start: Cell<usize>,
    /// Safepoints covered by this interval, sorted by position.
    safepoints: SmallVec<[SafepointPosition; 2]>,
    /// Uses, sorted by position. Only the parent's list is meaningful.
    uses: SmallVec<[UsePosition; 4]>,
    /// Environment uses, sorted by position. Parent only.
    env_uses: SmallVec<[EnvUsePosition; 2]>,
    ty: Type,
    next_sibling: PackedOption<IntervalId>,
    parent: IntervalId,
    register: Option<usize>,
    spill_slot: Option<usize>,
    is_fixed: bool,
    is_temp: bool,
    is_high: bool,
    high_or_low: PackedOption<IntervalId>,
    defined_by: PackedOption<Inst>,
}

impl LiveInterval {
    fn raw(ty: Type, defined_by: Option<Inst>, is_fixed: bool, register: Option<usize>, is_temp: bool, is_high: bool) -> Self {
        Self {
            ranges: SmallVec::new(),
            search_start: Cell::new(0),
            safepoints: SmallVec::new(),
            uses: SmallVec::new(),
            env_uses: SmallVec::new(),
            ty,
            next_sibling: None.into(),
            parent: IntervalId::new(0),
            register,
            spill_slot: None,
            is_fixed,
            is_temp,
            is_high,
            high_or_low: None.into(),
            defined_by: defined_by.into(),
        }
    }

    /// The type of the value.
    pub fn ty(&self) -> Type {
        self.ty
    }

    /// Does the value allocate from the floating-point bank?
    pub fn is_floating_point(&self) -> bool {
        self.ty.is_floating_point()
    }

    /// Do the two intervals allocate from the same register bank?
    pub fn same_register_kind(&self, other: &LiveInterval) -> bool {
        self.is_floating_point() == other.is_floating_point()
    }

    /// Does `location` name a register in this interval's bank?
    pub fn same_register_kind_as_location(&self, location: Location) -> bool {
        match location {
            Location::Register(_) | Location::RegisterPair(_, _) => !self.is_floating_point(),
            Location::FpuRegister(_) | Location::FpuRegisterPair(_, _) => self.is_floating_point(),
            _ => false,
        }
    }

    /// Is this a pre-colored interval standing for a physical register?
    pub fn is_fixed(&self) -> bool {
        self.is_fixed
    }

    /// Is this a one-instruction scratch interval?
    pub fn is_temp(&self) -> bool {
        self.is_temp
    }

    /// The instruction defining this value, if any.
    pub fn defined_by(&self) -> Option<Inst> {
        self.defined_by.expand()
    }

    /// The live ranges, sorted by start.
    pub fn ranges(&self) -> &[LiveRange] {
        &self.ranges
    }

    /// First live position.
    pub fn start(&self) -> usize {
        self.ranges.first().expect("empty interval").start
    }

    /// First position past the interval.
    pub fn end(&self) -> usize {
        self.ranges.last().expect("empty interval").end
    }

    /// Total distance between start and end, holes included.
    pub fn length(&self) -> usize {
        self.end() - self.start()
    }

    /// Is the interval empty (no ranges recorded yet)?
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Is the interval over at `position`?
    pub fn is_dead_at(&self, position: usize) -> bool {
        self.end() <= position
    }

    /// Does the interval span `position`, ignoring holes?
    pub fn is_defined_at(&self, position: usize) -> bool {
        self.start() <= position && !self.is_dead_at(position)
    }

    /// The assigned register, if any.
    pub fn register(&self) -> Option<usize> {
        self.register
    }

    /// Has a register been assigned?
    pub fn has_register(&self) -> bool {
        self.register.is_some()
    }

    /// Assign a register.
    pub fn set_register(&mut self, reg: usize) {
        self.register = Some(reg);
    }

    /// Remove the register assignment.
    pub fn clear_register(&mut self) {
        self.register = None;
    }

    /// The assigned spill slot, if any. Canonical on the parent.
    pub fn spill_slot(&self) -> Option<usize> {
        self.spill_slot
    }

    /// Has a spill slot been assigned?
    pub fn has_spill_slot(&self) -> bool {
        self.spill_slot.is_some()
    }

    /// Assign a spill slot.
    pub fn set_spill_slot(&mut self, slot: usize) {
        debug_assert!(!self.is_fixed);
        debug_assert!(!self.is_temp);
        self.spill_slot = Some(slot);
    }

    /// Add `[start, end)` to the interval. Calls must be made in decreasing
    /// position order; the common case extends the first range leftwards.
    pub fn add_range(&mut self, start: usize, end: usize) {
        debug_assert!(start < end);
        if self.ranges.is_empty() {
            self.ranges.push(LiveRange { start, end });
        } else if self.ranges[0].start == end {
            // There is a use in the following block.
            self.ranges[0].start = start;
        } else if self.ranges[0].start == start && self.ranges[0].end == end {
            debug_assert!(self.is_fixed);
        } else {
            debug_assert!(self.ranges[0].start > end);
            // There is a hole in the interval. Create a new range.
            self.ranges.insert(0, LiveRange { start, end });
        }
        self.search_start.set(0);
    }

    /// Make the interval cover an entire loop `[start, end)`, collapsing any
    /// ranges inside the loop into one.
    pub fn add_loop_range(&mut self, start: usize, end: usize) {
        debug_assert!(!self.ranges.is_empty());
        debug_assert!(start <= self.ranges[0].start);
        // Find the range that covers the positions after the loop.
        let mut after_loop = 0;
        while after_loop < self.ranges.len() && self.ranges[after_loop].end < end {
            debug_assert!(start <= self.ranges[after_loop].start);
            after_loop += 1;
        }
        if after_loop == self.ranges.len() {
            // Uses are only in the loop.
            self.ranges.clear();
            self.ranges.push(LiveRange { start, end });
        } else if self.ranges[after_loop].start <= end {
            // There are uses after the loop.
            let kept: SmallVec<[LiveRange; 2]> =
                self.ranges[after_loop..].iter().cloned().collect();
            self.ranges = kept;
            self.ranges[0].start = start;
        } else {
            // The use after the loop is after a lifetime hole.
            debug_assert!(after_loop > 0);
            let kept: SmallVec<[LiveRange; 2]> =
                self.ranges[after_loop..].iter().cloned().collect();
            self.ranges = kept;
            self.ranges.insert(0, LiveRange { start, end });
        }
        self.search_start.set(0);
    }

    /// Pin the start of the first range to the definition position, or give
    /// an instruction without uses its minimal `[from, from + 2)` range.
    pub fn set_from(&mut self, from: usize) {
        if !self.ranges.is_empty() {
            self.ranges[0].start = from;
        } else {
            // Instruction without uses.
            debug_assert!(self.uses.is_empty());
            self.ranges.push(LiveRange { start: from, end: from + 2 });
        }
        self.search_start.set(0);
    }

    /// Record a safepoint covered by this interval. Must be called in
    /// increasing position order.
    pub fn add_safepoint(&mut self, instruction: Inst, position: usize) {
        debug_assert!(self.safepoints.last().map_or(true, |s| s.position < position));
        self.safepoints.push(SafepointPosition { instruction, position });
    }

    /// The safepoints covered by this interval.
    pub fn safepoints(&self) -> &[SafepointPosition] {
        &self.safepoints
    }

    /// Does any covered safepoint call on its main path?
    pub fn has_will_call_safepoint(&self, graph: &Graph) -> bool {
        self.safepoints
            .iter()
            .any(|s| graph.locations(s.instruction).map_or(false, |l| l.will_call()))
    }

    /// Reset the range-search cache to the first range. Must be done before
    /// starting a new scan over the interval.
    pub fn reset_search_cache(&self) {
        self.search_start.set(0);
    }

    // Searches for the first range that either covers `position` or starts
    // after it. `ranges.len()` means no such range. Ranges known to end
    // before `position` can be skipped with `from`.
    fn find_range_at_or_after(&self, position: usize, mut from: usize) -> usize {
        if cfg!(debug_assertions) && from != 0 {
            // If we are not searching the entire list of ranges, make sure
            // we do not skip the range we are searching for.
            if from >= self.ranges.len() {
                debug_assert!(self.is_dead_at(position));
            } else if self.ranges[from].start > position {
                debug_assert_eq!(from, self.find_range_at_or_after(position, 0));
            }
        }
        while from < self.ranges.len() && self.ranges[from].end <= position {
            from += 1;
        }
        from
    }

    /// Does a range of this interval cover `position`?
    ///
    /// The range at or after the current scan position is cached; if
    /// `position` can be smaller than the cache, use
    /// [`LiveInterval::covers_slow`] instead.
    pub fn covers(&self, position: usize) -> bool {
        let candidate = self.find_range_at_or_after(position, self.search_start.get());
        self.search_start.set(candidate);
        candidate < self.ranges.len() && self.ranges[candidate].start <= position
    }

    /// Like [`LiveInterval::covers`], but always rescans from the first
    /// range and leaves the cache alone.
    pub fn covers_slow(&self, position: usize) -> bool {
        let candidate = self.find_range_at_or_after(position, 0);
        candidate < self.ranges.len() && self.ranges[candidate].start <= position
    }

    /// The first position present in a range of both intervals. `other` must
    /// be the interval currently being allocated, so its start is at or
    /// after ours (fixed intervals excepted).
    pub fn first_intersection_with(&self, other: &LiveInterval) -> Option<usize> {
        if self.ranges.is_empty() || other.ranges.is_empty() {
            return None;
        }
        debug_assert!(self.start() <= other.start() || self.is_fixed);
        let mut other_idx = 0;
        let mut my_idx = self.find_range_at_or_after(other.ranges[0].start, self.search_start.get());
        loop {
            if my_idx >= self.ranges.len() {
                return None;
            }
            let mine = self.ranges[my_idx];
            let theirs = other.ranges[other_idx];
            if mine.is_before(theirs) {
                my_idx += 1;
            } else if theirs.is_before(mine) {
                other_idx += 1;
                if other_idx >= other.ranges.len() {
                    return None;
                }
            } else {
                debug_assert!(mine.intersects_with(theirs));
                return Some(core::cmp::max(mine.start, theirs.start));
            }
        }
    }

    /// Does this interval start at or before `other`?
    pub fn starts_before_or_at(&self, other: &LiveInterval) -> bool {
        self.start() <= other.start()
    }

    /// Does this interval start strictly after `other`?
    pub fn starts_after(&self, other: &LiveInterval) -> bool {
        self.start() > other.start()
    }
}

/// The arena owning every live interval of one compilation.
pub struct Intervals {
    data: PrimaryMap<IntervalId, LiveInterval>,
}

impl Index<IntervalId> for Intervals {
    type Output = LiveInterval;
    fn index(&self, id: IntervalId) -> &LiveInterval {
        &self.data[id]
    }
}

impl IndexMut<IntervalId> for Intervals {
    fn index_mut(&mut self, id: IntervalId) -> &mut LiveInterval {
        &mut self.data[id]
    }
}

impl Intervals {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self { data: PrimaryMap::new() }
    }

    /// Create an interval for the value defined by `defined_by`.
    pub fn make(&mut self, ty: Type, defined_by: Option<Inst>) -> IntervalId {
        let id = self.data.push(LiveInterval::raw(ty, defined_by, false, None, false, false));
        self.data[id].parent = id;
        id
    }

    /// Create a pre-colored interval representing a physical register's
    /// blocked ranges.
    pub fn make_fixed(&mut self, reg: usize, ty: Type) -> IntervalId {
        let id = self.data.push(LiveInterval::raw(ty, None, true, Some(reg), false, false));
        self.data[id].parent = id;
        id
    }

    /// Create a scratch interval for one instruction.
    pub fn make_temp(&mut self, ty: Type) -> IntervalId {
        let id = self.data.push(LiveInterval::raw(ty, None, false, None, true, false));
        self.data[id].parent = id;
        id
    }

    /// The parent of an interval (itself if not split).
    pub fn parent(&self, id: IntervalId) -> IntervalId {
        self.data[id].parent
    }

    /// Is this interval its own parent?
    pub fn is_parent(&self, id: IntervalId) -> bool {
        self.data[id].parent == id
    }

    /// Is this interval the result of a split?
    pub fn is_split(&self, id: IntervalId) -> bool {
        !self.is_parent(id)
    }

    /// The sibling following this one in lifetime order.
    pub fn next_sibling(&self, id: IntervalId) -> Option<IntervalId> {
        self.data[id].next_sibling.expand()
    }

    /// The last sibling of the chain.
    pub fn last_sibling(&self, id: IntervalId) -> IntervalId {
        let mut current = id;
        while let Some(next) = self.data[current].next_sibling.expand() {
            current = next;
        }
        current
    }

    /// Walk an interval and its siblings, in lifetime order.
    pub fn siblings<'a>(&'a self, id: IntervalId) -> impl Iterator<Item = IntervalId> + 'a {
        let mut current = Some(id);
        core::iter::from_fn(move || {
            let c = current?;
            current = self.data[c].next_sibling.expand();
            Some(c)
        })
    }

    /// The sibling whose span contains `position`, if any. Note that the
    /// sibling may still have a lifetime hole at `position`.
    pub fn sibling_at(&self, id: IntervalId, position: usize) -> Option<IntervalId> {
        let mut current = Some(id);
        while let Some(c) = current {
            if !self.data[c].is_empty() && self.data[c].is_defined_at(position) {
                return Some(c);
            }
            current = self.data[c].next_sibling.expand();
        }
        None
    }

    /// Does this interval represent the high half of a pair?
    pub fn is_high(&self, id: IntervalId) -> bool {
        self.data[self.data[id].parent].is_high
    }

    /// Does this interval represent the low half of a pair?
    pub fn is_low(&self, id: IntervalId) -> bool {
        !self.is_high(id) && self.data[self.data[id].parent].high_or_low.is_some()
    }

    /// Does this (low) interval have a high half?
    pub fn has_high(&self, id: IntervalId) -> bool {
        self.is_low(id)
    }

    /// Does this (high) interval have a low half?
    pub fn has_low(&self, id: IntervalId) -> bool {
        self.is_high(id)
    }

    /// The high half paired with this low interval.
    pub fn high_of(&self, id: IntervalId) -> IntervalId {
        debug_assert!(self.has_high(id));
        self.data[id].high_or_low.expand().expect("pair half not linked")
    }

    /// The low half paired with this high interval.
    pub fn low_of(&self, id: IntervalId) -> IntervalId {
        debug_assert!(self.has_low(id));
        self.data[id].high_or_low.expand().expect("pair half not linked")
    }

    /// Link two siblings produced by splitting a pair.
    pub fn link_pair(&mut self, low: IntervalId, high: IntervalId) {
        self.data[low].high_or_low = Some(high).into();
        self.data[high].high_or_low = Some(low).into();
    }

    /// Create the high half of a pair interval, duplicating the low half's
    /// ranges and uses.
    pub fn add_high_sibling(&mut self, id: IntervalId, is_temp: bool) -> IntervalId {
        debug_assert!(self.is_parent(id));
        debug_assert!(self.data[id].high_or_low.is_none());
        let ty = self.data[id].ty;
        let defined_by = self.data[id].defined_by.expand();
        let mut high = LiveInterval::raw(ty, defined_by, false, None, is_temp, true);
        high.ranges = self.data[id].ranges.clone();
        high.uses = self.data[id].uses.clone();
        high.env_uses = self.data[id].env_uses.clone();
        let high_id = self.data.push(high);
        self.data[high_id].parent = high_id;
        self.data[high_id].high_or_low = Some(id).into();
        self.data[id].high_or_low = Some(high_id).into();
        high_id
    }

    /// Record the single use of a temp interval.
    pub fn add_temp_use(&mut self, graph: &Graph, id: IntervalId, instruction: Inst, temp_index: usize) {
        debug_assert!(self.data[id].is_temp);
        debug_assert!(self.data[id].uses.is_empty(), "a temporary can only have one user");
        debug_assert!(self.data[id].env_uses.is_empty(), "a temporary cannot have environment user");
        let position = graph.lifetime_position(instruction);
        let interval = &mut self.data[id];
        interval.uses.insert(0, UsePosition::new(instruction, temp_index, position));
        interval.add_range(position, position + 1);
    }

    /// Record a use of an input. Recorded as an environment use when
    /// `is_environment` is set. When `actual_user` is given, the use is
    /// positioned at its lifetime position instead of `instruction`'s.
    pub fn add_use(
        &mut self,
        graph: &Graph,
        id: IntervalId,
        instruction: Inst,
        input_index: usize,
        is_environment: bool,
        actual_user: Option<Inst>,
        keep_alive: bool,
    ) {
        let actual_user = actual_user.unwrap_or(instruction);
        let locations = graph.locations(instruction).expect("user has no locations");

        // Set the use within the instruction.
        let mut position = graph.lifetime_position(actual_user) + 1;
        if !is_environment {
            if locations.is_fixed_input(input_index) || locations.output_uses_same_as(input_index) {
                // For fixed inputs and output same as input, the register
                // allocator requires inputs to die at the instruction, so
                // that input moves use the location of the input just before
                // that instruction.
                debug_assert_eq!(instruction, actual_user);
                position = graph.lifetime_position(actual_user);
            } else if !locations.in_at(input_index).is_valid() {
                return;
            }
        }

        if !is_environment && graph.loop_of(graph.block_of(instruction)).is_some() {
            self.add_back_edge_uses(graph, id, graph.block_of(instruction));
        }

        {
            let interval = &mut self.data[id];
            let front = interval.uses.first().cloned();
            if let Some(front) = front {
                if front.user() == Some(actual_user) && front.position < position {
                    // The user uses the instruction multiple times, and one
                    // use dies before the other. We update the use list so
                    // that the latter is first.
                    debug_assert!(!is_environment);
                    debug_assert!(front.position + 1 == position);
                    let mut insert_at = 0;
                    while insert_at < interval.uses.len() && interval.uses[insert_at].position < position {
                        insert_at += 1;
                    }
                    interval
                        .uses
                        .insert(insert_at, UsePosition::new(instruction, input_index, position));
                    if interval.ranges[0].end == interval.uses[0].position {
                        interval.ranges[0].end = position;
                    }
                    return;
                }
            }

            if is_environment {
                debug_assert!(interval.env_uses.first().map_or(true, |u| position <= u.position));
                interval.env_uses.insert(
                    0,
                    EnvUsePosition {
                        user: instruction,
                        input_index,
                        position,
                    },
                );
            } else {
                debug_assert!(interval.uses.first().map_or(true, |u| position <= u.position));
                interval
                    .uses
                    .insert(0, UsePosition::new(instruction, input_index, position));
            }

            if is_environment && !keep_alive {
                // If this environment use does not keep the instruction
                // live, it does not affect the live range.
                return;
            }

            let start_block_position = graph.lifetime_start(graph.block_of(instruction));
            if interval.ranges.is_empty() {
                // First time we see a use of that interval.
                interval.ranges.push(LiveRange {
                    start: start_block_position,
                    end: position,
                });
                interval.search_start.set(0);
            } else if interval.ranges[0].start == start_block_position {
                // There is a use later in the same block or in a following
                // block; `add_range` has already covered it.
                debug_assert!(position <= interval.ranges[0].end);
            } else {
                debug_assert!(interval.ranges[0].start > position);
                // There is a hole in the interval. Create a new range.
                interval.ranges.insert(
                    0,
                    LiveRange {
                        start: start_block_position,
                        end: position,
                    },
                );
                interval.search_start.set(0);
            }
        }
    }

    /// Record a phi use pinned at the end of the incoming block.
    pub fn add_phi_use(&mut self, graph: &Graph, id: IntervalId, phi: Inst, input_index: usize, block: Block) {
        debug_assert!(graph.is_phi(phi));
        if graph.loop_of(block).is_some() {
            self.add_back_edge_uses(graph, id, block);
        }
        let position = graph.lifetime_end(block);
        self.data[id]
            .uses
            .insert(0, UsePosition::new(phi, input_index, position));
    }

    // Add synthesized uses at the back edge of loops to keep the value alive
    // across them. Called in decreasing liveness order, so insertions happen
    // at the head of the use list; going outward visits increasing
    // positions, so subsequent entries go after the last inserted one.
    fn add_back_edge_uses(&mut self, graph: &Graph, id: IntervalId, block_at_use: Block) {
        debug_assert!(graph.loop_of(block_at_use).is_some());
        if graph.has_irreducible_loops() {
            // Linear order may not be well formed when irreducible loops are
            // present: loop blocks may not be adjacent and a back edge may
            // not be last, which violates assumptions made in this method.
            return;
        }

        let old_first_position = self.data[id].uses.first().map(|u| u.position);
        let defined_by = self.data[id].defined_by.expand().expect("value interval without definition");
        let mut insert_at = 0;
        let mut current_loop = graph.loop_of(block_at_use);
        while let Some(l) = current_loop {
            if graph.lifetime_position(defined_by) >= graph.lifetime_start(graph.loop_header(l)) {
                // This interval is defined in the loop. Stop going outward.
                break;
            }

            // Only the last back edge needs a synthesized use: anything used
            // in the loop will have its use at the last back edge.
            let back_edge_use_position = graph.loop_lifetime_end(l);
            if let Some(first) = old_first_position {
                if first <= back_edge_use_position {
                    // A use in this loop was already recorded, and with it
                    // the back-edge use.
                    debug_assert!(self.has_synthesized_use_at(id, back_edge_use_position));
                    break;
                }
            }

            self.data[id]
                .uses
                .insert(insert_at, UsePosition::synthesized(back_edge_use_position));
            insert_at += 1;
            current_loop = graph.loop_parent(l);
        }
    }

    fn has_synthesized_use_at(&self, id: IntervalId, position: usize) -> bool {
        for use_ in self.uses(id) {
            if use_.position == position && use_.is_synthesized() {
                return true;
            }
            if use_.position > position {
                break;
            }
        }
        false
    }

    /// The canonical use list, held by the parent.
    pub fn uses(&self, id: IntervalId) -> &[UsePosition] {
        &self.data[self.data[id].parent].uses
    }

    /// The canonical environment-use list, held by the parent.
    pub fn env_uses(&self, id: IntervalId) -> &[EnvUsePosition] {
        &self.data[self.data[id].parent].env_uses
    }

    fn is_defining_position(&self, id: IntervalId, position: usize) -> bool {
        self.is_parent(id) && self.data[id].defined_by.is_some() && position == self.data[id].start()
    }

    /// The first use strictly after `position`, the defining position
    /// included if `position` is it.
    pub fn first_use_after(&self, graph: &Graph, id: IntervalId, position: usize) -> Option<usize> {
        let interval = &self.data[id];
        if interval.is_temp {
            return if position == interval.start() { Some(position) } else { None };
        }

        if self.is_defining_position(id, position) {
            debug_assert!(graph
                .locations(interval.defined_by.expand().unwrap())
                .map_or(false, |l| l.out().is_valid()));
            return Some(position);
        }

        let end = interval.end();
        for use_ in self.uses(id) {
            if use_.position > end {
                break;
            }
            if use_.position > position {
                return Some(use_.position);
            }
        }
        None
    }

    /// The first use strictly after `position` whose location summary
    /// demands a register. A defining position counts if the definition
    /// itself requires a register output.
    pub fn first_register_use_after(&self, graph: &Graph, id: IntervalId, position: usize) -> Option<usize> {
        let interval = &self.data[id];
        if interval.is_temp {
            return if position == interval.start() { Some(position) } else { None };
        }

        if self.is_defining_position(id, position) && self.definition_requires_register(graph, id) {
            return Some(position);
        }

        let end = interval.end();
        for use_ in self.uses(id) {
            if use_.position > end {
                break;
            }
            if use_.position > position && use_.requires_register(graph) {
                return Some(use_.position);
            }
        }
        None
    }

    /// The location of the first register use, including a register
    /// definition if applicable.
    pub fn first_register_use(&self, graph: &Graph, id: IntervalId) -> Option<usize> {
        self.first_register_use_after(graph, id, self.data[id].start())
    }

    /// Whether the interval requires a register rather than a stack
    /// location.
    pub fn requires_register(&self, graph: &Graph, id: IntervalId) -> bool {
        !self.data[id].has_register() && self.first_register_use(graph, id).is_some()
    }

    /// Does the instruction defining this value demand a register output,
    /// either explicitly or through a same-as-first-input policy whose first
    /// input is a register?
    pub fn definition_requires_register(&self, graph: &Graph, id: IntervalId) -> bool {
        debug_assert!(self.is_parent(id));
        let defined_by = match self.data[id].defined_by.expand() {
            Some(inst) => inst,
            None => return false,
        };
        let locations = graph.locations(defined_by).expect("definition has no locations");
        let location = locations.out();
        if location.is_unallocated() {
            match location.policy() {
                Policy::RequiresRegister | Policy::RequiresFpuRegister => true,
                Policy::SameAsFirstInput => {
                    let first = locations.in_at(0);
                    first.is_register_kind()
                        || (first.is_unallocated() && first.requires_register_kind())
                }
                Policy::Any => false,
            }
        } else {
            location.is_register() || location.is_fpu_register() || location.is_pair()
        }
    }

    /// Number of spill slots the value occupies: 1 for scalars, 2 for
    /// 64-bit values, 4 for vector values spilled to a SIMD slot.
    pub fn number_of_spill_slots_needed(&self, graph: &Graph, id: IntervalId) -> usize {
        let parent = self.data[id].parent;
        if let Some(defined_by) = self.data[parent].defined_by.expand() {
            if let Some(locations) = graph.locations(defined_by) {
                if let Location::SimdStackSlot(_) = locations.out() {
                    return 4;
                }
            }
        }
        if self.data[parent].ty.is_wide() {
            2
        } else {
            1
        }
    }

    /// Convert the allocation of this interval to a `Location`.
    pub fn to_location(&self, graph: &Graph, id: IntervalId) -> Location {
        debug_assert!(!self.is_high(id));
        let interval = &self.data[id];
        if let Some(reg) = interval.register {
            if self.has_high(id) {
                let high_reg = self.data[self.high_of(id)].register.expect("pair half not colored");
                if interval.is_floating_point() {
                    Location::FpuRegisterPair(reg, high_reg)
                } else {
                    Location::RegisterPair(reg, high_reg)
                }
            } else if interval.is_floating_point() {
                Location::FpuRegister(reg)
            } else {
                Location::Register(reg)
            }
        } else {
            let parent = interval.parent;
            let defined_by = self.data[parent].defined_by.expand();
            if let Some(inst) = defined_by {
                if graph.is_constant(inst) {
                    return graph.locations(inst).expect("constant has no locations").out();
                }
            }
            if let Some(slot) = self.data[parent].spill_slot {
                match self.number_of_spill_slots_needed(graph, id) {
                    1 => Location::StackSlot(slot),
                    2 => Location::DoubleStackSlot(slot),
                    4 => Location::SimdStackSlot(slot),
                    n => panic!("unexpected number of spill slots: {}", n),
                }
            } else {
                Location::Invalid
            }
        }
    }

    /// The location of the value at `position`, following siblings.
    pub fn location_at(&self, graph: &Graph, id: IntervalId, position: usize) -> Location {
        let sibling = self.sibling_at(id, position).expect("no sibling at position");
        self.to_location(graph, sibling)
    }

    /// Split this interval at `position`, leaving `[start, position)` in
    /// place and returning a new sibling covering `[position, end)`.
    /// Returns `None` if the interval is dead at `position`.
    pub fn split_at(&mut self, id: IntervalId, position: usize) -> Option<IntervalId> {
        {
            let interval = &self.data[id];
            debug_assert!(!interval.is_temp);
            debug_assert!(!interval.is_fixed);
            debug_assert!(position > interval.start());
            if interval.end() <= position {
                // This interval dies before `position`, no need to split.
                return None;
            }
        }

        // Distribute safepoints by position.
        let new_safepoints: SmallVec<[SafepointPosition; 2]> = {
            let interval = &mut self.data[id];
            match interval.safepoints.iter().position(|s| s.position >= position) {
                Some(index) => {
                    let tail = interval.safepoints[index..].iter().cloned().collect();
                    interval.safepoints.truncate(index);
                    tail
                }
                None => SmallVec::new(),
            }
        };

        // Split the range list. Either a range covers `position`, or
        // `position` falls in a lifetime hole between two ranges.
        let new_ranges: SmallVec<[LiveRange; 2]> = {
            let interval = &mut self.data[id];
            let index = interval
                .ranges
                .iter()
                .position(|r| r.end > position)
                .expect("no range past the split position");
            if position <= interval.ranges[index].start {
                // Lifetime hole; the range list splits cleanly.
                debug_assert!(index > 0);
                let tail: SmallVec<[LiveRange; 2]> =
                    interval.ranges[index..].iter().cloned().collect();
                interval.ranges.truncate(index);
                if interval.search_start.get() >= index {
                    // Search cache pointed into the new sibling.
                    interval.search_start.set(interval.ranges.len());
                }
                tail
            } else {
                // A range straddles `position`: shorten it here, let the
                // sibling own `[position, end)`.
                let straddler = interval.ranges[index];
                let mut tail: SmallVec<[LiveRange; 2]> =
                    interval.ranges[index..].iter().cloned().collect();
                interval.ranges.truncate(index);
                tail[0].start = position;
                interval.ranges.push(LiveRange {
                    start: straddler.start,
                    end: position,
                });
                if interval.search_start.get() >= index {
                    // Conservatively point the cache at the last kept range.
                    interval.search_start.set(interval.ranges.len() - 1);
                }
                tail
            }
        };

        let ty = self.data[id].ty;
        let parent = self.data[id].parent;
        let old_next = self.data[id].next_sibling;
        let mut sibling = LiveInterval::raw(ty, None, false, None, false, false);
        sibling.ranges = new_ranges;
        sibling.safepoints = new_safepoints;
        sibling.parent = parent;
        sibling.next_sibling = old_next;
        let new_id = self.data.push(sibling);
        self.data[id].next_sibling = Some(new_id).into();
        Some(new_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Type;

    // Build an interval from ranges given in increasing order, mirroring the
    // decreasing-order calls the liveness analysis makes.
    fn build_interval(intervals: &mut Intervals, ranges: &[[usize; 2]]) -> IntervalId {
        let id = intervals.make(Type::Int32, None);
        for range in ranges.iter().rev() {
            intervals[id].add_range(range[0], range[1]);
        }
        id
    }

    fn ranges_equal(interval: &LiveInterval, expected: &[[usize; 2]]) -> bool {
        interval.ranges().len() == expected.len()
            && interval
                .ranges()
                .iter()
                .zip(expected)
                .all(|(r, e)| r.start == e[0] && r.end == e[1])
    }

    #[test]
    fn get_start() {
        let mut intervals = Intervals::new();
        let a = build_interval(&mut intervals, &[[0, 42]]);
        assert_eq!(intervals[a].start(), 0);
        let b = build_interval(&mut intervals, &[[4, 12], [14, 16]]);
        assert_eq!(intervals[b].start(), 4);
    }

    #[test]
    fn is_dead_at() {
        let mut intervals = Intervals::new();
        let a = build_interval(&mut intervals, &[[0, 42]]);
        assert!(intervals[a].is_dead_at(42));
        assert!(intervals[a].is_dead_at(43));
        assert!(!intervals[a].is_dead_at(41));
        assert!(!intervals[a].is_dead_at(0));

        let b = build_interval(&mut intervals, &[[4, 12], [14, 16]]);
        assert!(intervals[b].is_dead_at(16));
        assert!(intervals[b].is_dead_at(32));
        assert!(!intervals[b].is_dead_at(0));
        assert!(!intervals[b].is_dead_at(13));
        assert!(!intervals[b].is_dead_at(15));
    }

    #[test]
    fn covers() {
        let mut intervals = Intervals::new();
        let a = build_interval(&mut intervals, &[[0, 42]]);
        assert!(intervals[a].covers(0));
        assert!(intervals[a].covers(4));
        assert!(intervals[a].covers(41));
        assert!(!intervals[a].covers(42));
        assert!(!intervals[a].covers(54));

        let b = build_interval(&mut intervals, &[[4, 12], [14, 16]]);
        assert!(!intervals[b].covers_slow(0));
        assert!(intervals[b].covers_slow(4));
        assert!(intervals[b].covers_slow(11));
        assert!(!intervals[b].covers_slow(12));
        assert!(!intervals[b].covers_slow(13));
        assert!(intervals[b].covers_slow(14));
        assert!(intervals[b].covers_slow(15));
        assert!(!intervals[b].covers_slow(16));
    }

    #[test]
    fn first_intersection_with() {
        let mut intervals = Intervals::new();
        {
            let a = build_interval(&mut intervals, &[[0, 4], [8, 10]]);
            let b = build_interval(&mut intervals, &[[5, 6]]);
            assert_eq!(intervals[a].first_intersection_with(&intervals[b]), None);
        }
        {
            let a = build_interval(&mut intervals, &[[0, 4], [8, 10]]);
            let b = build_interval(&mut intervals, &[[5, 42]]);
            assert_eq!(intervals[a].first_intersection_with(&intervals[b]), Some(8));
        }
        {
            let a = build_interval(&mut intervals, &[[0, 4], [8, 10]]);
            let b = build_interval(&mut intervals, &[[5, 6], [7, 8], [11, 12]]);
            assert_eq!(intervals[a].first_intersection_with(&intervals[b]), None);
        }
        {
            let a = build_interval(&mut intervals, &[[0, 4], [8, 10]]);
            let b = build_interval(&mut intervals, &[[5, 6], [7, 8], [9, 10]]);
            assert_eq!(intervals[a].first_intersection_with(&intervals[b]), Some(9));
        }
        {
            let a = build_interval(&mut intervals, &[[0, 1], [2, 7], [8, 10]]);
            let b = build_interval(&mut intervals, &[[1, 2], [6, 7], [9, 10]]);
            assert_eq!(intervals[a].first_intersection_with(&intervals[b]), Some(6));
        }
        {
            let a = build_interval(&mut intervals, &[[0, 1], [2, 8], [55, 58]]);
            let b = build_interval(&mut intervals, &[[1, 2], [11, 42], [43, 48], [54, 56]]);
            assert_eq!(intervals[a].first_intersection_with(&intervals[b]), Some(55));
        }
        {
            let a = build_interval(
                &mut intervals,
                &[[0, 1], [2, 8], [15, 18], [27, 32], [41, 53], [54, 60]],
            );
            let b = build_interval(&mut intervals, &[[1, 2], [11, 12], [19, 25], [34, 42], [52, 60]]);
            assert_eq!(intervals[a].first_intersection_with(&intervals[b]), Some(41));
        }
    }

    #[test]
    fn split_at() {
        let mut intervals = Intervals::new();
        {
            // Split within one range.
            let a = build_interval(&mut intervals, &[[0, 4]]);
            let split = intervals.split_at(a, 1).unwrap();
            assert!(ranges_equal(&intervals[a], &[[0, 1]]));
            assert!(ranges_equal(&intervals[split], &[[1, 4]]));
            assert_eq!(intervals.next_sibling(a), Some(split));
            assert_eq!(intervals.parent(split), a);
        }
        {
            // Split just before the end of one range.
            let a = build_interval(&mut intervals, &[[0, 4]]);
            let split = intervals.split_at(a, 3).unwrap();
            assert!(ranges_equal(&intervals[a], &[[0, 3]]));
            assert!(ranges_equal(&intervals[split], &[[3, 4]]));
        }
        {
            // Split within the first range.
            let a = build_interval(&mut intervals, &[[0, 4], [8, 12]]);
            let split = intervals.split_at(a, 1).unwrap();
            assert!(ranges_equal(&intervals[a], &[[0, 1]]));
            assert!(ranges_equal(&intervals[split], &[[1, 4], [8, 12]]));
        }
        {
            // Split in a lifetime hole.
            let a = build_interval(&mut intervals, &[[0, 4], [8, 12]]);
            let split = intervals.split_at(a, 5).unwrap();
            assert!(ranges_equal(&intervals[a], &[[0, 4]]));
            assert!(ranges_equal(&intervals[split], &[[8, 12]]));
        }
        {
            // Split within the second range.
            let a = build_interval(&mut intervals, &[[0, 4], [8, 12]]);
            let split = intervals.split_at(a, 9).unwrap();
            assert!(ranges_equal(&intervals[a], &[[0, 4], [8, 9]]));
            assert!(ranges_equal(&intervals[split], &[[9, 12]]));
        }
        {
            // Split at the beginning of the second range.
            let a = build_interval(&mut intervals, &[[0, 4], [6, 10]]);
            let split = intervals.split_at(a, 6).unwrap();
            assert!(ranges_equal(&intervals[a], &[[0, 4]]));
            assert!(ranges_equal(&intervals[split], &[[6, 10]]));
        }
        {
            // Split at the end of the first range.
            let a = build_interval(&mut intervals, &[[0, 4], [6, 10]]);
            let split = intervals.split_at(a, 4).unwrap();
            assert!(ranges_equal(&intervals[a], &[[0, 4]]));
            assert!(ranges_equal(&intervals[split], &[[6, 10]]));
        }
        {
            // Splitting where the interval is dead returns nothing.
            let a = build_interval(&mut intervals, &[[0, 4]]);
            assert!(intervals.split_at(a, 5).is_none());
            assert!(ranges_equal(&intervals[a], &[[0, 4]]));
        }
    }

    #[test]
    fn split_reconstructs_original_ranges() {
        let mut intervals = Intervals::new();
        let a = build_interval(&mut intervals, &[[0, 4], [8, 12], [14, 20]]);
        let split = intervals.split_at(a, 10).unwrap();
        let mut all: Vec<LiveRange> = intervals[a].ranges().to_vec();
        all.extend_from_slice(intervals[split].ranges());
        let merged: Vec<[usize; 2]> = vec![[0, 4], [8, 10], [10, 12], [14, 20]];
        assert_eq!(all.len(), merged.len());
        for (r, e) in all.iter().zip(&merged) {
            assert_eq!([r.start, r.end], *e);
        }
    }

    #[test]
    fn add_loop_range() {
        let mut intervals = Intervals::new();
        {
            // Only used in the loop.
            let a = build_interval(&mut intervals, &[[0, 4]]);
            intervals[a].add_loop_range(0, 8);
            assert!(ranges_equal(&intervals[a], &[[0, 8]]));
        }
        {
            let a = build_interval(&mut intervals, &[[2, 4]]);
            intervals[a].add_loop_range(0, 8);
            assert!(ranges_equal(&intervals[a], &[[0, 8]]));
        }
        {
            // Used just after the loop.
            let a = build_interval(&mut intervals, &[[2, 4], [8, 10]]);
            intervals[a].add_loop_range(0, 8);
            assert!(ranges_equal(&intervals[a], &[[0, 10]]));
        }
        {
            // Use after the loop is past a lifetime hole.
            let a = build_interval(&mut intervals, &[[2, 4], [10, 12]]);
            intervals[a].add_loop_range(0, 8);
            assert!(ranges_equal(&intervals[a], &[[0, 8], [10, 12]]));
        }
    }

    #[test]
    fn pair_halves_share_shape() {
        let mut intervals = Intervals::new();
        let low = build_interval(&mut intervals, &[[2, 10]]);
        let high = intervals.add_high_sibling(low, false);
        assert!(intervals.is_low(low));
        assert!(intervals.is_high(high));
        assert_eq!(intervals.high_of(low), high);
        assert_eq!(intervals.low_of(high), low);
        assert!(ranges_equal(&intervals[high], &[[2, 10]]));
    }
}
