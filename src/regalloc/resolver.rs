//! Resolution of a finished allocation.
//!
//! Runs after either allocation strategy. Resolution turns interval
//! assignments into a consistent program again: it records live registers
//! and reference masks at safepoints, publishes the frame layout to the
//! code generator, rewrites spill-slot indices into stack offsets, updates
//! every use with its value's location, and inserts the parallel moves
//! needed between split siblings, across block boundaries, and on phi
//! edges.
//!
//! Moves are keyed by lifetime position in the owning block's move buffer:
//! an even position runs before the instruction at that position, an odd
//! one after it. Inserting twice at one position reuses the same parallel
//! move, which keeps move insertion deterministic.
//!
//! Resolution never fails; every check here is an assertion on the
//! allocator's output.

use crate::codegen::CodeGenerator;
use crate::ir::{Block, Graph, Inst, IntervalId, Location, ParallelMove, Policy, Type, VREG_SIZE};
use crate::liverange::{LiveRange, SafepointPosition};
use crate::liveness::Liveness;
use log::debug;

/// Finalize an allocation: safepoints, frame layout, use locations, and
/// connecting moves.
pub fn resolve(
    graph: &mut Graph,
    codegen: &mut dyn CodeGenerator,
    liveness: &mut Liveness,
    safepoints: &[Inst],
    reserved_out_slots: usize,
    int_spill_slots: usize,
    long_spill_slots: usize,
    float_spill_slots: usize,
    double_spill_slots: usize,
    catch_phi_spill_slots: usize,
    temp_intervals: &[IntervalId],
) {
    let spill_slots = int_spill_slots
        + long_spill_slots
        + float_spill_slots
        + double_spill_slots
        + catch_phi_spill_slots;

    // (1) Update safepoints and calculate the size of the spills.
    update_safepoint_live_registers(graph, liveness);
    let maximum_safepoint_spill_size =
        calculate_maximum_safepoint_spill_size(graph, codegen, safepoints);

    // (2) Publish frame size and spill masks to the backend.
    let linear_order: Vec<Block> = graph.linear_order().to_vec();
    codegen.initialize_code_generation(
        spill_slots,
        maximum_safepoint_spill_size,
        reserved_out_slots, // Includes slot(s) for the method pointer.
        &linear_order,
    );
    debug!(
        "resolver: {} spill slots, max safepoint spill {} bytes",
        spill_slots, maximum_safepoint_spill_size
    );

    // (3) Resolve outputs, including stack locations.
    for i in 0..liveness.num_ssa_values() {
        let inst = liveness.instruction_from_ssa_index(i);
        let current = liveness.interval_of(inst).expect("ssa value without interval");
        let location = graph.locations(inst).expect("value without locations").out();

        if graph.is_parameter(inst) {
            // Now that we know the frame size, adjust the parameter's
            // location: its slot lives in the caller's frame.
            if location.is_stack_slot() {
                let adjusted = Location::StackSlot(location.stack_index() + codegen.frame_size());
                liveness.intervals_mut()[current].set_spill_slot(adjusted.stack_index());
                graph.locations_mut(inst).set_out(adjusted);
            } else if location.is_double_stack_slot() {
                let adjusted =
                    Location::DoubleStackSlot(location.stack_index() + codegen.frame_size());
                liveness.intervals_mut()[current].set_spill_slot(adjusted.stack_index());
                graph.locations_mut(inst).set_out(adjusted);
            } else if let Some(slot) = liveness.intervals()[current].spill_slot() {
                liveness.intervals_mut()[current].set_spill_slot(slot + codegen.frame_size());
            }
        } else if graph.is_current_method(inst) {
            // The current method is always at offset 0.
            debug_assert!(liveness.intervals()[current].spill_slot().map_or(true, |s| s == 0));
        } else if graph.is_catch_phi(inst) {
            let slot = liveness.intervals()[current]
                .spill_slot()
                .expect("catch phi without a slot")
                + spill_slots
                + reserved_out_slots
                - catch_phi_spill_slots;
            liveness.intervals_mut()[current].set_spill_slot(slot * VREG_SIZE);
        } else if let Some(slot) = liveness.intervals()[current].spill_slot() {
            // Adjust the slot index now that the per-type counts are known.
            // The stack is laid out as follows:
            //
            //   [parameter slots       ]
            //   [method pointer (caller)]
            //   [entry spill (core)    ]
            //   [entry spill (fp)      ]
            //   [should-deoptimize flag] (optional)
            //   [catch phi spill slots ]
            //   [double spill slots    ]
            //   [long spill slots      ]
            //   [float spill slots     ]
            //   [int/ref spill slots   ]
            //   [maximum out values    ]
            //   [method pointer        ]
            let mut slot = slot;
            match liveness.intervals()[current].ty() {
                Type::Float64 => {
                    slot += long_spill_slots + float_spill_slots + int_spill_slots;
                }
                Type::Int64 | Type::Uint64 => {
                    slot += float_spill_slots + int_spill_slots;
                }
                Type::Float32 => {
                    slot += int_spill_slots;
                }
                _ => {}
            }
            slot += reserved_out_slots;
            liveness.intervals_mut()[current].set_spill_slot(slot * VREG_SIZE);
        }

        let source = liveness.intervals().to_location(graph, current);
        let location = graph.locations(inst).unwrap().out();
        if location.is_unallocated() {
            if location.policy() == Policy::SameAsFirstInput {
                let first = graph.locations(inst).unwrap().in_at(0);
                if first.is_unallocated() {
                    graph.locations_mut(inst).set_in_at(0, source);
                } else {
                    debug_assert_eq!(first, source);
                }
            }
            graph.locations_mut(inst).set_out(source);
        } else {
            debug_assert_eq!(source, location);
        }
    }

    // (4) Connect siblings and resolve uses.
    for i in 0..liveness.num_ssa_values() {
        let inst = liveness.instruction_from_ssa_index(i);
        let interval = liveness.interval_of(inst).unwrap();
        connect_siblings(graph, codegen, liveness, interval);
    }

    // (5) Resolve non-linear control flow across branches. Order does not
    // matter.
    for &block in &linear_order {
        if graph.is_catch_block(block) || graph.is_irreducible_header(block) {
            // Values live at the top of catch blocks and irreducible loop
            // headers were forced to spill; no moves are needed.
            if cfg!(debug_assertions) {
                let arena = liveness.intervals();
                for index in liveness.live_in(block).indexes() {
                    let value = liveness.instruction_from_ssa_index(index);
                    let interval = liveness.interval_of(value).unwrap();
                    let start = graph.lifetime_start(block);
                    // `sibling_at` may land in a lifetime hole; check
                    // actual liveness before asserting.
                    if let Some(sibling) = arena.sibling_at(interval, start) {
                        if arena[sibling].covers_slow(start) {
                            debug_assert!(!arena[sibling].has_register());
                        }
                    }
                }
            }
        } else {
            let live: Vec<usize> = liveness.live_in(block).indexes().collect();
            for index in live {
                let value = liveness.instruction_from_ssa_index(index);
                let interval = liveness.interval_of(value).unwrap();
                let preds: Vec<Block> = graph.preds(block).to_vec();
                for pred in preds {
                    connect_split_siblings(graph, codegen, liveness, interval, pred, block);
                }
            }
        }
    }

    // (6) Resolve phi edges. Order does not matter.
    for &block in &linear_order {
        if graph.is_catch_block(block) {
            // Catch phi values are set at runtime by the exception delivery
            // mechanism.
            continue;
        }
        let phis: Vec<Inst> = graph.phis(block).to_vec();
        for phi in phis {
            let preds: Vec<Block> = graph.preds(block).to_vec();
            for (input_index, &predecessor) in preds.iter().enumerate() {
                debug_assert_eq!(graph.num_normal_successors(predecessor), 1);
                let input = graph.phi_input(phi, input_index);
                let input_interval = liveness.interval_of(input).expect("phi input not live");
                let source = liveness.intervals().location_at(
                    graph,
                    input_interval,
                    graph.lifetime_end(predecessor) - 1,
                );
                let phi_interval = liveness.interval_of(phi).expect("phi not live");
                let destination = liveness.intervals().to_location(graph, phi_interval);
                insert_parallel_move_at_exit_of(graph, codegen, predecessor, phi, source, destination);
            }
        }
    }

    // (7) Resolve temp locations.
    for &temp in temp_intervals {
        if liveness.intervals().is_high(temp) {
            // High halves are handled together with their low half.
            continue;
        }
        let at = liveness.temp_user(temp);
        let temp_index = liveness.temp_index(temp);
        let arena = liveness.intervals();
        let location = match arena[temp].ty() {
            Type::Int32 => Location::Register(arena[temp].register().expect("temp not colored")),
            Type::Float64 => {
                if codegen.needs_two_registers(Type::Float64) {
                    let high = arena.high_of(temp);
                    Location::FpuRegisterPair(
                        arena[temp].register().expect("temp not colored"),
                        arena[high].register().expect("temp pair half not colored"),
                    )
                } else {
                    Location::FpuRegister(arena[temp].register().expect("temp not colored"))
                }
            }
            ty => panic!("unexpected type {} for temporary location", ty),
        };
        graph.locations_mut(at).set_temp_at(temp_index, location);
    }
}

// (Step 1) Record every allocated register live across each safepoint it
// covers. Values held in constants or stack slots contribute nothing here.
fn update_safepoint_live_registers(graph: &mut Graph, liveness: &Liveness) {
    let arena = liveness.intervals();
    for i in 0..liveness.num_ssa_values() {
        let inst = liveness.instruction_from_ssa_index(i);
        let mut current = liveness.interval_of(inst);
        while let Some(sibling) = current {
            current = arena.next_sibling(sibling);
            if !arena[sibling].has_register() {
                continue;
            }
            let source = arena.to_location(graph, sibling);
            for safepoint in arena[sibling].safepoints() {
                debug_assert!(arena[sibling].covers_slow(safepoint.position()));
                let locations = graph.locations_mut(safepoint.instruction());
                match source {
                    Location::Register(_) | Location::FpuRegister(_) => {
                        locations.add_live_register(source);
                    }
                    Location::RegisterPair(_, _) | Location::FpuRegisterPair(_, _) => {
                        locations.add_live_register(source.to_low());
                        locations.add_live_register(source.to_high());
                    }
                    Location::StackSlot(_)
                    | Location::DoubleStackSlot(_)
                    | Location::SimdStackSlot(_)
                    | Location::Constant(_) => {
                        // Nothing to do.
                    }
                    _ => panic!("unexpected location {:?} at a safepoint", source),
                }
            }
        }
    }
}

// (Step 2, first half) The worst-case number of bytes a slow path must
// spill around any safepoint.
fn calculate_maximum_safepoint_spill_size(
    graph: &Graph,
    codegen: &dyn CodeGenerator,
    safepoints: &[Inst],
) -> usize {
    let core_register_spill_size = codegen.word_size();
    let fp_register_spill_size = codegen.fp_spill_slot_size();
    let mut maximum_safepoint_spill_size = 0;
    for &instruction in safepoints {
        let locations = graph.locations(instruction).expect("safepoint without locations");
        if locations.only_calls_on_slow_path() {
            let core_spills = codegen.num_slow_path_spills(locations, /* core_registers */ true);
            let fp_spills = codegen.num_slow_path_spills(locations, /* core_registers */ false);
            let spill_size =
                core_register_spill_size * core_spills + fp_register_spill_size * fp_spills;
            maximum_safepoint_spill_size = core::cmp::max(maximum_safepoint_spill_size, spill_size);
        } else if locations.calls_on_main_and_slow_path() {
            // The main path already clobbers caller-saves; nothing extra to
            // spill on the slow path.
            debug_assert_eq!(0, codegen.num_slow_path_spills(locations, true));
            debug_assert_eq!(0, codegen.num_slow_path_spills(locations, false));
        }
    }
    maximum_safepoint_spill_size
}

#[derive(Copy, Clone)]
struct UseSnapshot {
    user: Option<Inst>,
    input_index: usize,
    position: usize,
}

// (Step 4) Walk the sibling chain of one value: rewrite each use with its
// sibling's location, connect adjacent siblings with a move, and set the
// reference bits of covered safepoints.
fn connect_siblings(
    graph: &mut Graph,
    codegen: &dyn CodeGenerator,
    liveness: &Liveness,
    interval: IntervalId,
) {
    let arena = liveness.intervals();
    let defined_by = arena[interval].defined_by().expect("parent interval without definition");

    if arena[interval].has_spill_slot()
        && arena[interval].has_register()
        && !graph.is_current_method(defined_by)
    {
        // We spill eagerly, so the store must be at the definition. (The
        // current method is spilled unconditionally by the code generator.)
        let slot = arena[interval].spill_slot().unwrap();
        let destination = match arena.number_of_spill_slots_needed(graph, interval) {
            1 => Location::StackSlot(slot),
            2 => Location::DoubleStackSlot(slot),
            4 => Location::SimdStackSlot(slot),
            n => panic!("unexpected number of spill slots: {}", n),
        };
        let source = arena.to_location(graph, interval);
        insert_move_after(graph, codegen, liveness, defined_by, source, destination);
    }

    let uses: Vec<UseSnapshot> = arena
        .uses(interval)
        .iter()
        .map(|u| UseSnapshot {
            user: u.user(),
            input_index: u.input_index(),
            position: u.position(),
        })
        .collect();
    let env_uses: Vec<UseSnapshot> = arena
        .env_uses(interval)
        .iter()
        .map(|u| UseSnapshot {
            user: Some(u.user()),
            input_index: u.input_index(),
            position: u.position(),
        })
        .collect();
    let mut use_index = 0;
    let mut env_use_index = 0;

    // Walk over all siblings, updating locations of use positions, and
    // connecting them when they are adjacent.
    let mut current = Some(interval);
    while let Some(sibling) = current {
        let source = arena.to_location(graph, sibling);
        let ranges: Vec<LiveRange> = arena[sibling].ranges().to_vec();

        for range in ranges {
            // Process uses in the closed interval [start, end].
            let range_begin = range.start;
            let range_end = range.end + 1;

            while use_index < uses.len() && uses[use_index].position < range_begin {
                // Uses in lifetime holes can only be synthesized back-edge
                // uses.
                debug_assert!(uses[use_index].user.is_none());
                use_index += 1;
            }
            while use_index < uses.len() && uses[use_index].position < range_end {
                let use_ = uses[use_index];
                use_index += 1;
                debug_assert!(
                    arena[sibling].covers_slow(use_.position) || use_.position == range.end
                );
                let user = match use_.user {
                    Some(user) => user,
                    None => continue,
                };
                let expected_location = graph
                    .locations(user)
                    .expect("user without locations")
                    .in_at(use_.input_index);
                // The expected location may be invalid if the input is
                // unused (e.g. an intrinsic ignoring an operand).
                if expected_location.is_valid() {
                    if expected_location.is_unallocated() {
                        graph.locations_mut(user).set_in_at(use_.input_index, source);
                    } else if !expected_location.is_constant() {
                        let ty = graph.ty(defined_by);
                        add_input_move_for(graph, codegen, ty, user, source, expected_location);
                    }
                }
            }

            while env_use_index < env_uses.len() && env_uses[env_use_index].position < range_begin {
                env_use_index += 1;
            }
            while env_use_index < env_uses.len() && env_uses[env_use_index].position < range_end {
                let env_use = env_uses[env_use_index];
                env_use_index += 1;
                debug_assert!(
                    arena[sibling].covers_slow(env_use.position) || env_use.position == range.end
                );
                graph.set_env_location(env_use.user.unwrap(), env_use.input_index, source);
            }
        }

        // If the next sibling starts where this one ends and has a
        // register, connect them with a move at the boundary.
        let next_sibling = arena.next_sibling(sibling);
        if let Some(next) = next_sibling {
            if arena[next].has_register() && arena[sibling].end() == arena[next].start() {
                let destination = arena.to_location(graph, next);
                insert_parallel_move_at(
                    graph,
                    codegen,
                    liveness,
                    arena[sibling].end(),
                    defined_by,
                    source,
                    destination,
                );
            }
        }

        let safepoints: Vec<SafepointPosition> = arena[sibling].safepoints().to_vec();
        for safepoint in safepoints {
            debug_assert!(arena[sibling].covers_slow(safepoint.position()));
            if arena[sibling].ty() == Type::Reference {
                // The garbage collector must find the reference both in its
                // spill slot and, if held, in its register.
                let slot = arena[interval].spill_slot();
                let locations = graph.locations_mut(safepoint.instruction());
                if let Some(slot) = slot {
                    locations.set_stack_bit(slot / VREG_SIZE);
                }
                if let Location::Register(reg) = source {
                    locations.set_register_bit(reg);
                }
            }
        }

        current = next_sibling;
    }

    // Anything left can only be synthesized uses.
    debug_assert!(uses[use_index..].iter().all(|u| u.user.is_none()));
}

fn is_materializable_entry_block_instruction_of_graph_with_irreducible_loop(
    graph: &Graph,
    instruction: Inst,
) -> bool {
    graph.has_irreducible_loops()
        && (graph.is_constant(instruction) || graph.is_current_method(instruction))
}

// (Step 5) Make the location of a value at the entry of `to` agree with its
// location at the exit of `from`.
fn connect_split_siblings(
    graph: &mut Graph,
    codegen: &dyn CodeGenerator,
    liveness: &Liveness,
    interval: IntervalId,
    from: Block,
    to: Block,
) {
    let arena = liveness.intervals();
    if arena.next_sibling(interval).is_none() {
        // Nothing to connect: the whole range has one location.
        return;
    }

    // Find the siblings that cover `from` and `to`.
    let destination_position = graph.lifetime_start(to);
    let source_position = graph.lifetime_end(from) - 1;
    let destination_sibling = arena.sibling_at(interval, destination_position);
    let source_sibling = arena.sibling_at(interval, source_position);

    if destination_sibling == source_sibling {
        // The interval was not split across this edge.
        return;
    }

    let defined_by = arena[interval].defined_by().expect("parent interval without definition");
    if graph.has_irreducible_loops()
        && destination_sibling.map_or(true, |d| !arena[d].covers_slow(destination_position))
    {
        // The live-in fixed point found the value live in `to` because it
        // eventually enters an irreducible loop; the interval computation
        // does not reach a fixed point and has no location for it there.
        // The value is a constant or the current method and will simply be
        // rematerialized in the loop.
        debug_assert!(is_materializable_entry_block_instruction_of_graph_with_irreducible_loop(
            graph, defined_by
        ));
        return;
    }
    let destination_sibling = destination_sibling.expect("no sibling covering live-in position");

    if !arena[destination_sibling].has_register() {
        // Values are eagerly spilled: the spill slot already holds the
        // right value.
        return;
    }

    // `sibling_at` does not check for lifetime holes; the only case where
    // the source is inactive at that position is an irreducible-loop graph
    // with a constant or current-method value.
    let location_source;
    if graph.has_irreducible_loops()
        && source_sibling.map_or(true, |s| !arena[s].covers_slow(source_position))
    {
        debug_assert!(is_materializable_entry_block_instruction_of_graph_with_irreducible_loop(
            graph, defined_by
        ));
        if graph.is_constant(defined_by) {
            location_source = graph.locations(defined_by).unwrap().out();
        } else {
            debug_assert!(graph.is_current_method(defined_by));
            let slot = arena[interval].spill_slot().expect("current method without slot");
            location_source = match arena.number_of_spill_slots_needed(graph, interval) {
                1 => Location::StackSlot(slot),
                2 => Location::DoubleStackSlot(slot),
                4 => Location::SimdStackSlot(slot),
                n => panic!("unexpected number of spill slots: {}", n),
            };
        }
    } else {
        let source_sibling = source_sibling.expect("no sibling covering live-out position");
        debug_assert!(arena[source_sibling].covers_slow(source_position));
        debug_assert!(arena[destination_sibling].covers_slow(destination_position));
        location_source = arena.to_location(graph, source_sibling);
    }

    let destination_location = arena.to_location(graph, destination_sibling);

    // With a single successor the move goes at the exit of `from`;
    // otherwise the edge is critical-edge-split and the move goes at the
    // entry of `to`, which then has a single predecessor.
    if graph.num_normal_successors(from) == 1 {
        insert_parallel_move_at_exit_of(graph, codegen, from, defined_by, location_source, destination_location);
    } else {
        debug_assert_eq!(graph.preds(to).len(), 1);
        insert_parallel_move_at_entry_of(graph, codegen, to, defined_by, location_source, destination_location);
    }
}

fn is_valid_destination(destination: Location) -> bool {
    match destination {
        Location::Register(_)
        | Location::RegisterPair(_, _)
        | Location::FpuRegister(_)
        | Location::FpuRegisterPair(_, _)
        | Location::StackSlot(_)
        | Location::DoubleStackSlot(_)
        | Location::SimdStackSlot(_) => true,
        _ => false,
    }
}

fn add_move(
    codegen: &dyn CodeGenerator,
    move_: &mut ParallelMove,
    source: Location,
    destination: Location,
    ty: Type,
    instruction: Option<Inst>,
) {
    if ty == Type::Int64
        && codegen.should_split_long_moves()
        // The parallel move resolver knows how to deal with long constants.
        && !source.is_constant()
    {
        move_.moves.push(crate::ir::MoveOperands {
            source: source.to_low(),
            destination: destination.to_low(),
            ty: Type::Int32,
            instruction: instruction.into(),
        });
        move_.moves.push(crate::ir::MoveOperands {
            source: source.to_high(),
            destination: destination.to_high(),
            ty: Type::Int32,
            instruction: None.into(),
        });
    } else {
        move_.moves.push(crate::ir::MoveOperands {
            source,
            destination,
            ty,
            instruction: instruction.into(),
        });
    }
}

// A move feeding an input of `user`, placed just before it.
fn add_input_move_for(
    graph: &mut Graph,
    codegen: &dyn CodeGenerator,
    ty: Type,
    user: Inst,
    source: Location,
    destination: Location,
) {
    if source == destination {
        return;
    }
    debug_assert!(!graph.is_phi(user));
    let position = graph.lifetime_position(user);
    let block = graph.block_of(user);
    let move_ = graph.parallel_move_at(block, position);
    add_move(codegen, move_, source, destination, ty, None);
}

// A move at an arbitrary lifetime position: before the instruction at an
// even position, after it at an odd one. At an even block boundary the
// move is dropped; block connection handles it.
fn insert_parallel_move_at(
    graph: &mut Graph,
    codegen: &dyn CodeGenerator,
    liveness: &Liveness,
    position: usize,
    instruction: Inst,
    source: Location,
    destination: Location,
) {
    debug_assert!(is_valid_destination(destination), "{:?}", destination);
    if source == destination {
        return;
    }

    let block = match liveness.instruction_from_position(position / 2) {
        None => {
            if position % 2 == 0 {
                // Block boundary: the connection of split siblings across
                // blocks inserts the move.
                return;
            }
            // The move must happen before the first instruction of the
            // next block.
            liveness.block_from_position(graph, position)
        }
        Some(at) => {
            if position % 2 == 1 {
                // Move after the instruction.
                debug_assert!(!graph.is_control_flow(at));
            }
            graph.block_of(at)
        }
    };
    let ty = graph.ty(instruction);
    let move_ = graph.parallel_move_at(block, position);
    add_move(codegen, move_, source, destination, ty, Some(instruction));
}

// A move on the predecessor side of an edge, before the block's terminator.
fn insert_parallel_move_at_exit_of(
    graph: &mut Graph,
    codegen: &dyn CodeGenerator,
    block: Block,
    instruction: Inst,
    source: Location,
    destination: Location,
) {
    debug_assert!(is_valid_destination(destination), "{:?}", destination);
    if source == destination {
        return;
    }

    // Only for blocks with one normal successor: a block ending in a
    // conditional branch cannot host the move, critical edges having been
    // split.
    debug_assert_eq!(graph.num_normal_successors(block), 1);
    let last = *graph.insts(block).last().expect("block without terminator");
    let position = graph.lifetime_position(last);
    let ty = graph.ty(instruction);
    let move_ = graph.parallel_move_at(block, position);
    add_move(codegen, move_, source, destination, ty, Some(instruction));
}

// A move on the successor side of an edge, before everything in the block.
fn insert_parallel_move_at_entry_of(
    graph: &mut Graph,
    codegen: &dyn CodeGenerator,
    block: Block,
    instruction: Inst,
    source: Location,
    destination: Location,
) {
    debug_assert!(is_valid_destination(destination), "{:?}", destination);
    if source == destination {
        return;
    }
    let position = graph.lifetime_start(block);
    let ty = graph.ty(instruction);
    let move_ = graph.parallel_move_at(block, position);
    add_move(codegen, move_, source, destination, ty, Some(instruction));
}

// A move for the output of `instruction`, right after it.
fn insert_move_after(
    graph: &mut Graph,
    codegen: &dyn CodeGenerator,
    _liveness: &Liveness,
    instruction: Inst,
    source: Location,
    destination: Location,
) {
    debug_assert!(is_valid_destination(destination), "{:?}", destination);
    if source == destination {
        return;
    }

    if graph.is_phi(instruction) {
        let block = graph.block_of(instruction);
        insert_parallel_move_at_entry_of(graph, codegen, block, instruction, source, destination);
        return;
    }

    let position = graph.lifetime_position(instruction) + 1;
    let block = graph.block_of(instruction);
    let ty = graph.ty(instruction);
    let move_ = graph.parallel_move_at(block, position);
    add_move(codegen, move_, source, destination, ty, Some(instruction));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regalloc::split;
    use crate::test_util::{GraphBuilder, TestCodeGenerator};

    // entry: value, goto; body: mid, ret value.
    fn two_block_graph() -> (Graph, Liveness, Inst, Inst, Block, Block) {
        let mut b = GraphBuilder::new();
        let entry = b.block();
        let body = b.block();
        b.edge(entry, body);
        b.set_entry(entry);
        let value = b.any_value(entry, Type::Int32);
        b.goto_(entry);
        let mid = b.any_value(body, Type::Int32);
        b.ret(body, Some(value));
        let (graph, liveness) = b.finish();
        (graph, liveness, value, mid, entry, body)
    }

    #[test]
    fn parallel_moves_are_keyed_by_position() {
        let (mut graph, liveness, value, mid, entry, body) = two_block_graph();
        let codegen = TestCodeGenerator::core_only(4);
        let mid_position = graph.lifetime_position(mid);

        // Before the instruction: even position.
        insert_parallel_move_at(
            &mut graph,
            &codegen,
            &liveness,
            mid_position,
            value,
            Location::Register(0),
            Location::Register(1),
        );
        // The same position reuses the same parallel move.
        insert_parallel_move_at(
            &mut graph,
            &codegen,
            &liveness,
            mid_position,
            value,
            Location::Register(2),
            Location::StackSlot(4),
        );
        // After the instruction: odd position, a separate move.
        insert_parallel_move_at(
            &mut graph,
            &codegen,
            &liveness,
            mid_position + 1,
            value,
            Location::Register(0),
            Location::Register(2),
        );
        // Identical source and destination: dropped.
        insert_parallel_move_at(
            &mut graph,
            &codegen,
            &liveness,
            mid_position,
            value,
            Location::Register(3),
            Location::Register(3),
        );
        // Even block boundary: dropped, block connection owns those.
        let body_lifetime_start = graph.lifetime_start(body);
        insert_parallel_move_at(
            &mut graph,
            &codegen,
            &liveness,
            body_lifetime_start,
            value,
            Location::Register(0),
            Location::Register(1),
        );

        assert!(graph.parallel_moves(entry).is_empty());
        {
            let moves = graph.parallel_moves(body);
            assert_eq!(moves.len(), 2);
            assert_eq!(moves[0].position, mid_position);
            assert_eq!(moves[0].moves.len(), 2);
            assert_eq!(moves[1].position, mid_position + 1);
            assert_eq!(moves[1].moves.len(), 1);
        }

        // Odd boundary position: lands ahead of the block's instructions.
        let body_lifetime_start_plus_1 = graph.lifetime_start(body) + 1;
        insert_parallel_move_at(
            &mut graph,
            &codegen,
            &liveness,
            body_lifetime_start_plus_1,
            value,
            Location::Register(0),
            Location::StackSlot(8),
        );
        let moves = graph.parallel_moves(body);
        assert_eq!(moves.len(), 3);
        assert_eq!(moves[0].position, body_lifetime_start_plus_1);
    }

    #[test]
    fn edge_moves_go_to_block_exit_and_entry() {
        let (mut graph, _liveness, value, _mid, entry, body) = two_block_graph();
        let codegen = TestCodeGenerator::core_only(4);

        insert_parallel_move_at_exit_of(
            &mut graph,
            &codegen,
            entry,
            value,
            Location::Register(0),
            Location::Register(1),
        );
        let terminator = *graph.insts(entry).last().unwrap();
        {
            let moves = graph.parallel_moves(entry);
            assert_eq!(moves.len(), 1);
            assert_eq!(moves[0].position, graph.lifetime_position(terminator));
        }

        insert_parallel_move_at_entry_of(
            &mut graph,
            &codegen,
            body,
            value,
            Location::Register(1),
            Location::Register(2),
        );
        let moves = graph.parallel_moves(body);
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].position, graph.lifetime_start(body));
    }

    #[test]
    fn long_moves_split_into_halves() {
        let mut b = GraphBuilder::new();
        let entry = b.block();
        b.set_entry(entry);
        let wide = b.any_value(entry, Type::Int64);
        b.ret(entry, None);
        let (mut graph, liveness) = b.finish();
        let mut codegen = TestCodeGenerator::core_only(4);
        codegen.split_long_moves = true;

        insert_move_after(
            &mut graph,
            &codegen,
            &liveness,
            wide,
            Location::DoubleStackSlot(8),
            Location::RegisterPair(0, 1),
        );

        let moves = graph.parallel_moves(entry);
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].position, graph.lifetime_position(wide) + 1);
        let operands = &moves[0].moves;
        assert_eq!(operands.len(), 2);
        assert_eq!(operands[0].source, Location::StackSlot(8));
        assert_eq!(operands[0].destination, Location::Register(0));
        assert_eq!(operands[0].ty, Type::Int32);
        assert_eq!(operands[1].source, Location::StackSlot(12));
        assert_eq!(operands[1].destination, Location::Register(1));
        assert_eq!(operands[1].ty, Type::Int32);
    }

    #[test]
    fn split_siblings_connect_on_the_predecessor_side() {
        let (mut graph, mut liveness, value, _mid, entry, body) = two_block_graph();
        let codegen = TestCodeGenerator::core_only(4);
        let interval = liveness.interval_of(value).unwrap();

        // Unsplit: nothing to connect.
        connect_split_siblings(&mut graph, &codegen, &liveness, interval, entry, body);
        assert!(graph.parallel_moves(entry).is_empty());
        assert!(graph.parallel_moves(body).is_empty());

        // Split at the block boundary, both halves in registers: a move at
        // the exit of the predecessor, which has a single successor.
        let body_start = graph.lifetime_start(body);
        let sibling = split(liveness.intervals_mut(), interval, body_start);
        liveness.intervals_mut()[interval].set_register(0);
        liveness.intervals_mut()[sibling].set_register(1);
        connect_split_siblings(&mut graph, &codegen, &liveness, interval, entry, body);
        {
            let moves = graph.parallel_moves(entry);
            assert_eq!(moves.len(), 1);
            let terminator = *graph.insts(entry).last().unwrap();
            assert_eq!(moves[0].position, graph.lifetime_position(terminator));
            assert_eq!(moves[0].moves.len(), 1);
            assert_eq!(moves[0].moves[0].source, Location::Register(0));
            assert_eq!(moves[0].moves[0].destination, Location::Register(1));
        }

        // A register-less destination means the value was eagerly spilled:
        // the slot already holds it, no move.
        liveness.intervals_mut()[sibling].clear_register();
        liveness.intervals_mut()[interval].set_spill_slot(16);
        connect_split_siblings(&mut graph, &codegen, &liveness, interval, entry, body);
        assert_eq!(graph.parallel_moves(entry)[0].moves.len(), 1);
        assert!(graph.parallel_moves(body).is_empty());
    }
}
