//! The instruction graph consumed and rewritten by the register allocator.
//!
//! `Graph` is a deliberately narrow model of a method in SSA form: blocks in
//! a control-flow graph, instructions with typed operands and location
//! summaries, phis, try/catch structure, and loop information. The allocator
//! reads all of it and writes back exactly two things: updated location
//! summaries and the parallel moves it inserts.
//!
//! Parallel moves are not threaded through the instruction lists. Each block
//! owns a move buffer keyed by lifetime position; the resolver finds or
//! creates the `ParallelMove` for a position, and the backend flushes the
//! buffer into the emitted code in position order.

use crate::entity::packed_option::PackedOption;
use crate::entity::{PrimaryMap, SecondaryMap};
use crate::ir::entities::{Block, Inst, LoopId};
use crate::ir::locations::{Location, LocationSummary};
use crate::ir::types::Type;
use smallvec::SmallVec;

/// What kind of instruction this is, as far as allocation is concerned.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum InstKind {
    /// A materializable constant.
    Constant,
    /// An incoming method parameter, with its parameter index.
    Parameter(usize),
    /// The pointer to the method being compiled; always spilled at slot 0.
    CurrentMethod,
    /// A phi. The virtual register number is used to recognize equivalent
    /// phis in catch blocks, which share one spill slot.
    Phi {
        /// Virtual register this phi was built for.
        vreg: u32,
    },
    /// An ordinary computation.
    Plain,
    /// A deoptimization point; its environment keeps all operands alive.
    Deoptimize,
    /// A block terminator (goto, branch, return, switch).
    ControlFlow,
}

/// One copy inside a parallel move.
#[derive(Clone, Debug)]
pub struct MoveOperands {
    /// Where the value currently lives.
    pub source: Location,
    /// Where the value must live afterwards.
    pub destination: Location,
    /// The type being moved.
    pub ty: Type,
    /// The instruction this move is for, if any. Used by the backend to
    /// attach metadata; `None` for synthetic halves of split wide moves.
    pub instruction: PackedOption<Inst>,
}

/// A set of copies to be performed atomically at one lifetime position.
#[derive(Clone, Debug)]
pub struct ParallelMove {
    /// The lifetime position this move executes at. Even positions run
    /// before the instruction at that position, odd positions after.
    pub position: usize,
    /// The copies to perform.
    pub moves: SmallVec<[MoveOperands; 2]>,
}

pub(crate) struct InstData {
    pub kind: InstKind,
    pub ty: Type,
    pub block: PackedOption<Block>,
    pub inputs: SmallVec<[Inst; 2]>,
    /// Values observed by the debugger / deoptimization at this instruction.
    pub env_inputs: Vec<Inst>,
    /// Locations of `env_inputs`, filled in by the resolver.
    pub env_locations: Vec<Location>,
    pub locations: Option<LocationSummary>,
    pub lifetime_position: usize,
    pub can_throw: bool,
}

pub(crate) struct BlockData {
    pub preds: Vec<Block>,
    pub succs: Vec<Block>,
    pub phis: Vec<Inst>,
    pub insts: Vec<Inst>,
    pub lifetime_start: usize,
    pub lifetime_end: usize,
    pub is_catch: bool,
    pub is_try: bool,
    /// Header of a loop the control-flow analysis could not reduce.
    pub irreducible_header: bool,
    pub dominator: PackedOption<Block>,
    pub dominated: Vec<Block>,
    pub loop_info: PackedOption<LoopId>,
    pub moves: Vec<ParallelMove>,
}

pub(crate) struct LoopData {
    pub header: Block,
    pub parent: PackedOption<LoopId>,
    pub back_edges: Vec<Block>,
    pub blocks: Vec<Block>,
    pub irreducible: bool,
}

/// A method in SSA form, as seen by the register allocator.
pub struct Graph {
    blocks: PrimaryMap<Block, BlockData>,
    insts: PrimaryMap<Inst, InstData>,
    loops: PrimaryMap<LoopId, LoopData>,
    entry: PackedOption<Block>,
    exit: PackedOption<Block>,
    reverse_post_order: Vec<Block>,
    linear_order: Vec<Block>,
    has_irreducible_loops: bool,
    debuggable: bool,
    max_out_vregs: usize,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            blocks: PrimaryMap::new(),
            insts: PrimaryMap::new(),
            loops: PrimaryMap::new(),
            entry: None.into(),
            exit: None.into(),
            reverse_post_order: Vec::new(),
            linear_order: Vec::new(),
            has_irreducible_loops: false,
            debuggable: false,
            max_out_vregs: 0,
        }
    }

    // ------------------------------------------------------------------
    // Construction.
    // ------------------------------------------------------------------

    /// Add a new, empty block.
    pub fn add_block(&mut self) -> Block {
        self.blocks.push(BlockData {
            preds: Vec::new(),
            succs: Vec::new(),
            phis: Vec::new(),
            insts: Vec::new(),
            lifetime_start: 0,
            lifetime_end: 0,
            is_catch: false,
            is_try: false,
            irreducible_header: false,
            dominator: None.into(),
            dominated: Vec::new(),
            loop_info: None.into(),
            moves: Vec::new(),
        })
    }

    /// Add a control-flow edge. Edges into catch blocks are exceptional;
    /// they still appear here so that orderings cover catch blocks, but are
    /// excluded from [`Graph::normal_successors`].
    pub fn add_edge(&mut self, pred: Block, succ: Block) {
        self.blocks[pred].succs.push(succ);
        self.blocks[succ].preds.push(pred);
    }

    /// Create an instruction and append it to `block`.
    pub fn add_inst(&mut self, block: Block, kind: InstKind, ty: Type, inputs: &[Inst]) -> Inst {
        debug_assert!(
            match kind {
                InstKind::Phi { .. } => false,
                _ => true,
            },
            "phis are added with add_phi"
        );
        let inst = self.make_inst(block, kind, ty, inputs);
        self.blocks[block].insts.push(inst);
        inst
    }

    /// Create a phi and append it to `block`'s phi list. `inputs` correspond
    /// to the block's predecessors, in order.
    pub fn add_phi(&mut self, block: Block, ty: Type, vreg: u32, inputs: &[Inst]) -> Inst {
        let inst = self.make_inst(block, InstKind::Phi { vreg }, ty, inputs);
        self.blocks[block].phis.push(inst);
        inst
    }

    fn make_inst(&mut self, block: Block, kind: InstKind, ty: Type, inputs: &[Inst]) -> Inst {
        self.insts.push(InstData {
            kind,
            ty,
            block: Some(block).into(),
            inputs: SmallVec::from_slice(inputs),
            env_inputs: Vec::new(),
            env_locations: Vec::new(),
            locations: None,
            lifetime_position: 0,
            can_throw: false,
        })
    }

    /// Mark the entry block.
    pub fn set_entry_block(&mut self, block: Block) {
        self.entry = Some(block).into();
    }

    /// Mark the exit block.
    pub fn set_exit_block(&mut self, block: Block) {
        self.exit = Some(block).into();
    }

    /// Mark a block as a catch handler entry.
    pub fn set_catch_block(&mut self, block: Block) {
        self.blocks[block].is_catch = true;
    }

    /// Mark a block as covered by a try region.
    pub fn set_try_block(&mut self, block: Block) {
        self.blocks[block].is_try = true;
    }

    /// Mark the whole graph as debuggable: environment uses then keep their
    /// values alive.
    pub fn set_debuggable(&mut self, debuggable: bool) {
        self.debuggable = debuggable;
    }

    /// Record the maximum number of argument slots any call in the method
    /// needs.
    pub fn set_max_out_vregs(&mut self, max: usize) {
        self.max_out_vregs = max;
    }

    /// Attach the location summary of an instruction.
    pub fn set_locations(&mut self, inst: Inst, locations: LocationSummary) {
        self.insts[inst].locations = Some(locations);
    }

    /// Replace a phi input. Needed to close loops, where the back-edge
    /// value is created after the phi.
    pub fn set_phi_input(&mut self, phi: Inst, index: usize, value: Inst) {
        debug_assert!(self.is_phi(phi));
        self.insts[phi].inputs[index] = value;
    }

    /// Mark an instruction as possibly throwing.
    pub fn set_can_throw(&mut self, inst: Inst) {
        self.insts[inst].can_throw = true;
    }

    /// Attach environment (debug) operands to an instruction.
    pub fn set_environment(&mut self, inst: Inst, values: &[Inst]) {
        self.insts[inst].env_inputs = values.to_vec();
        self.insts[inst].env_locations = vec![Location::Invalid; values.len()];
    }

    // ------------------------------------------------------------------
    // Block queries.
    // ------------------------------------------------------------------

    /// The entry block.
    pub fn entry_block(&self) -> Block {
        self.entry.expand().expect("graph has no entry block")
    }

    /// The exit block, if one was declared.
    pub fn exit_block(&self) -> Option<Block> {
        self.exit.expand()
    }

    /// All blocks, in creation order.
    pub fn blocks<'a>(&'a self) -> impl Iterator<Item = Block> + 'a {
        self.blocks.keys()
    }

    /// Number of blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Predecessors of a block, in edge order.
    pub fn preds(&self, block: Block) -> &[Block] {
        &self.blocks[block].preds
    }

    /// Successors of a block, including exceptional edges to catch blocks.
    pub fn succs(&self, block: Block) -> &[Block] {
        &self.blocks[block].succs
    }

    /// Successors of a block, excluding catch blocks.
    pub fn normal_successors<'a>(&'a self, block: Block) -> impl Iterator<Item = Block> + 'a {
        self.blocks[block]
            .succs
            .iter()
            .cloned()
            .filter(move |&s| !self.blocks[s].is_catch)
    }

    /// Number of non-exceptional successors.
    pub fn num_normal_successors(&self, block: Block) -> usize {
        self.normal_successors(block).count()
    }

    /// The index of `pred` in `block`'s predecessor list.
    pub fn predecessor_index_of(&self, block: Block, pred: Block) -> usize {
        self.blocks[block]
            .preds
            .iter()
            .position(|&p| p == pred)
            .expect("not a predecessor")
    }

    /// Phis of a block.
    pub fn phis(&self, block: Block) -> &[Inst] {
        &self.blocks[block].phis
    }

    /// Non-phi instructions of a block, in program order.
    pub fn insts(&self, block: Block) -> &[Inst] {
        &self.blocks[block].insts
    }

    /// Is this block a catch handler entry?
    pub fn is_catch_block(&self, block: Block) -> bool {
        self.blocks[block].is_catch
    }

    /// Is this block covered by a try region?
    pub fn is_try_block(&self, block: Block) -> bool {
        self.blocks[block].is_try
    }

    /// Does this block contain nothing but its terminator?
    pub fn is_single_jump(&self, block: Block) -> bool {
        let data = &self.blocks[block];
        data.phis.is_empty()
            && data.insts.len() == 1
            && self.insts[data.insts[0]].kind == InstKind::ControlFlow
    }

    /// First lifetime position of the block.
    pub fn lifetime_start(&self, block: Block) -> usize {
        self.blocks[block].lifetime_start
    }

    /// First lifetime position after the block.
    pub fn lifetime_end(&self, block: Block) -> usize {
        self.blocks[block].lifetime_end
    }

    /// Set the lifetime bounds of a block. Called by instruction numbering.
    pub fn set_block_lifetime(&mut self, block: Block, start: usize, end: usize) {
        self.blocks[block].lifetime_start = start;
        self.blocks[block].lifetime_end = end;
    }

    // ------------------------------------------------------------------
    // Instruction queries.
    // ------------------------------------------------------------------

    /// The kind of an instruction.
    pub fn kind(&self, inst: Inst) -> InstKind {
        self.insts[inst].kind
    }

    /// The type of the value an instruction defines.
    pub fn ty(&self, inst: Inst) -> Type {
        self.insts[inst].ty
    }

    /// The block containing an instruction.
    pub fn block_of(&self, inst: Inst) -> Block {
        self.insts[inst].block.expand().expect("detached instruction")
    }

    /// The inputs of an instruction.
    pub fn inputs(&self, inst: Inst) -> &[Inst] {
        &self.insts[inst].inputs
    }

    /// The phi input flowing in from predecessor `pred_index`.
    pub fn phi_input(&self, phi: Inst, pred_index: usize) -> Inst {
        debug_assert!(self.is_phi(phi));
        self.insts[phi].inputs[pred_index]
    }

    /// The environment operands of an instruction.
    pub fn env_inputs(&self, inst: Inst) -> &[Inst] {
        &self.insts[inst].env_inputs
    }

    /// The recorded location of environment operand `index`.
    pub fn env_location(&self, inst: Inst, index: usize) -> Location {
        self.insts[inst].env_locations[index]
    }

    /// Record the location of environment operand `index`.
    pub fn set_env_location(&mut self, inst: Inst, index: usize, location: Location) {
        self.insts[inst].env_locations[index] = location;
    }

    /// The location summary of an instruction, if the backend attached one.
    pub fn locations(&self, inst: Inst) -> Option<&LocationSummary> {
        self.insts[inst].locations.as_ref()
    }

    /// Mutable access to an instruction's location summary.
    pub fn locations_mut(&mut self, inst: Inst) -> &mut LocationSummary {
        self.insts[inst].locations.as_mut().expect("instruction has no locations")
    }

    /// The lifetime position of an instruction.
    pub fn lifetime_position(&self, inst: Inst) -> usize {
        self.insts[inst].lifetime_position
    }

    /// Set the lifetime position of an instruction. Called by numbering.
    pub fn set_lifetime_position(&mut self, inst: Inst, position: usize) {
        self.insts[inst].lifetime_position = position;
    }

    /// Is this instruction a phi?
    pub fn is_phi(&self, inst: Inst) -> bool {
        match self.insts[inst].kind {
            InstKind::Phi { .. } => true,
            _ => false,
        }
    }

    /// Is this instruction a phi in a catch block?
    pub fn is_catch_phi(&self, inst: Inst) -> bool {
        self.is_phi(inst) && self.is_catch_block(self.block_of(inst))
    }

    /// Is this instruction a constant?
    pub fn is_constant(&self, inst: Inst) -> bool {
        self.insts[inst].kind == InstKind::Constant
    }

    /// Is this instruction a method parameter?
    pub fn is_parameter(&self, inst: Inst) -> bool {
        match self.insts[inst].kind {
            InstKind::Parameter(_) => true,
            _ => false,
        }
    }

    /// Is this the current-method value?
    pub fn is_current_method(&self, inst: Inst) -> bool {
        self.insts[inst].kind == InstKind::CurrentMethod
    }

    /// Is this instruction a block terminator?
    pub fn is_control_flow(&self, inst: Inst) -> bool {
        self.insts[inst].kind == InstKind::ControlFlow
    }

    /// May this instruction throw?
    pub fn can_throw(&self, inst: Inst) -> bool {
        self.insts[inst].can_throw
    }

    /// Do the two phis represent the same virtual register? Equivalent catch
    /// phis share one spill slot.
    pub fn is_vreg_equivalent(&self, phi: Inst, other: Inst) -> bool {
        match (self.insts[phi].kind, self.insts[other].kind) {
            (InstKind::Phi { vreg: a }, InstKind::Phi { vreg: b }) => a == b,
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Graph-wide properties.
    // ------------------------------------------------------------------

    /// Does the graph contain a loop that could not be reduced?
    pub fn has_irreducible_loops(&self) -> bool {
        self.has_irreducible_loops
    }

    /// Is the graph compiled for debugging?
    pub fn is_debuggable(&self) -> bool {
        self.debuggable
    }

    /// Maximum number of argument slots any call in the method needs.
    pub fn max_out_vregs(&self) -> usize {
        self.max_out_vregs
    }

    /// Blocks in reverse post order. Available after [`Graph::analyze`].
    pub fn reverse_post_order(&self) -> &[Block] {
        &self.reverse_post_order
    }

    /// Blocks in allocation (linear) order. Available once the linear order
    /// computation has run.
    pub fn linear_order(&self) -> &[Block] {
        &self.linear_order
    }

    /// Install the linear order.
    pub fn set_linear_order(&mut self, order: Vec<Block>) {
        debug_assert_eq!(order.len(), self.blocks.len());
        self.linear_order = order;
    }

    // ------------------------------------------------------------------
    // Dominators and loops.
    // ------------------------------------------------------------------

    /// Compute reverse post order, the dominator tree, and loop information.
    /// Must be called after the CFG is complete and before liveness.
    pub fn analyze(&mut self) {
        self.compute_reverse_post_order();
        self.compute_dominators();
        self.compute_loops();
    }

    fn compute_reverse_post_order(&mut self) {
        let entry = self.entry_block();
        let mut post = Vec::with_capacity(self.blocks.len());
        let mut visited = SecondaryMap::with_default(false);
        // (block, next successor index) pairs make the DFS iterative.
        let mut stack: Vec<(Block, usize)> = vec![(entry, 0)];
        visited[entry] = true;
        while let Some(top) = stack.last_mut() {
            let (block, next) = *top;
            top.1 += 1;
            if next < self.blocks[block].succs.len() {
                let succ = self.blocks[block].succs[next];
                if !visited[succ] {
                    visited[succ] = true;
                    stack.push((succ, 0));
                }
            } else {
                stack.pop();
                post.push(block);
            }
        }
        post.reverse();
        self.reverse_post_order = post;
    }

    fn compute_dominators(&mut self) {
        let entry = self.entry_block();
        let mut rpo_number = SecondaryMap::with_default(usize::max_value());
        for (i, &block) in self.reverse_post_order.iter().enumerate() {
            rpo_number[block] = i;
        }

        let mut idom: SecondaryMap<Block, PackedOption<Block>> = SecondaryMap::new();
        idom[entry] = Some(entry).into();

        let intersect = |idom: &SecondaryMap<Block, PackedOption<Block>>,
                         rpo_number: &SecondaryMap<Block, usize>,
                         mut a: Block,
                         mut b: Block| {
            while a != b {
                while rpo_number[a] > rpo_number[b] {
                    a = idom[a].expand().unwrap();
                }
                while rpo_number[b] > rpo_number[a] {
                    b = idom[b].expand().unwrap();
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &block in self.reverse_post_order.iter().skip(1) {
                let mut new_idom: Option<Block> = None;
                for &pred in &self.blocks[block].preds {
                    if idom[pred].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(cur) => intersect(&idom, &rpo_number, cur, pred),
                    });
                }
                let new_idom = match new_idom {
                    Some(b) => b,
                    None => continue,
                };
                if idom[block].expand() != Some(new_idom) {
                    idom[block] = Some(new_idom).into();
                    changed = true;
                }
            }
        }

        for &block in &self.reverse_post_order {
            self.blocks[block].dominator = idom[block];
            self.blocks[block].dominated.clear();
        }
        for &block in &self.reverse_post_order {
            if block != entry {
                if let Some(dom) = idom[block].expand() {
                    self.blocks[dom].dominated.push(block);
                }
            }
        }
    }

    fn compute_loops(&mut self) {
        self.loops = PrimaryMap::new();
        self.has_irreducible_loops = false;
        let mut rpo_number = SecondaryMap::with_default(usize::max_value());
        for (i, &block) in self.reverse_post_order.iter().enumerate() {
            rpo_number[block] = i;
        }

        // Collect retreating edges, grouped by target. An edge whose target
        // dominates its source is a back edge of a natural loop; otherwise
        // the target is entered from inside a cycle it does not dominate,
        // and the graph is irreducible.
        let mut headers: Vec<(Block, Vec<Block>)> = Vec::new();
        for &block in &self.reverse_post_order {
            for i in 0..self.blocks[block].succs.len() {
                let succ = self.blocks[block].succs[i];
                if rpo_number[succ] <= rpo_number[block] {
                    if !self.dominates(succ, block) {
                        self.has_irreducible_loops = true;
                        self.blocks[succ].irreducible_header = true;
                    }
                    match headers.iter_mut().find(|(h, _)| *h == succ) {
                        Some((_, edges)) => edges.push(block),
                        None => headers.push((succ, vec![block])),
                    }
                }
            }
        }

        // Flood backwards from the back edges to find each loop's blocks.
        for (header, back_edges) in headers {
            let mut members = vec![header];
            let mut work: Vec<Block> = back_edges.clone();
            while let Some(block) = work.pop() {
                if members.contains(&block) {
                    continue;
                }
                members.push(block);
                for &pred in &self.blocks[block].preds {
                    work.push(pred);
                }
            }
            let irreducible = self.blocks[header].irreducible_header;
            self.loops.push(LoopData {
                header,
                parent: None.into(),
                back_edges,
                blocks: members,
                irreducible,
            });
        }

        // Assign each block its innermost loop: visit loops from largest to
        // smallest so inner loops overwrite outer ones.
        let mut by_size: Vec<LoopId> = self.loops.keys().collect();
        by_size.sort_by_key(|&l| core::usize::MAX - self.loops[l].blocks.len());
        for &block in &self.reverse_post_order {
            self.blocks[block].loop_info = None.into();
        }
        for &l in &by_size {
            for i in 0..self.loops[l].blocks.len() {
                let block = self.loops[l].blocks[i];
                self.blocks[block].loop_info = Some(l).into();
            }
        }

        // A loop's parent is the innermost other loop containing its header.
        let keys: Vec<LoopId> = self.loops.keys().collect();
        for &l in &keys {
            let header = self.loops[l].header;
            let mut parent: Option<LoopId> = None;
            for &m in &keys {
                if m != l && self.loops[m].blocks.contains(&header) {
                    let better = match parent {
                        None => true,
                        Some(p) => self.loops[m].blocks.len() < self.loops[p].blocks.len(),
                    };
                    if better {
                        parent = Some(m);
                    }
                }
            }
            self.loops[l].parent = parent.into();
        }
    }

    /// Does `a` dominate `b`? Every block dominates itself.
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.blocks[current].dominator.expand() {
                Some(dom) if dom != current => current = dom,
                _ => return false,
            }
        }
    }

    /// The immediate dominator of a block.
    pub fn dominator(&self, block: Block) -> Option<Block> {
        self.blocks[block].dominator.expand().filter(|&d| d != block)
    }

    /// Blocks immediately dominated by `block`.
    pub fn dominated_blocks(&self, block: Block) -> &[Block] {
        &self.blocks[block].dominated
    }

    /// Does this block dominate the exit block?
    pub fn dominates_exit(&self, block: Block) -> bool {
        match self.exit_block() {
            Some(exit) => self.dominates(block, exit),
            None => false,
        }
    }

    /// The innermost loop containing `block`, if any.
    pub fn loop_of(&self, block: Block) -> Option<LoopId> {
        self.blocks[block].loop_info.expand()
    }

    /// The loop whose header is `block`, if any.
    pub fn loop_headed_by(&self, block: Block) -> Option<LoopId> {
        self.loop_of(block).filter(|&l| self.loops[l].header == block)
    }

    /// Is `block` a loop header (including irreducible ones)?
    pub fn is_loop_header(&self, block: Block) -> bool {
        self.blocks[block].irreducible_header || self.loop_headed_by(block).is_some()
    }

    /// Is `block` the header of an irreducible loop?
    pub fn is_irreducible_header(&self, block: Block) -> bool {
        self.blocks[block].irreducible_header
    }

    /// The header of a loop.
    pub fn loop_header(&self, l: LoopId) -> Block {
        self.loops[l].header
    }

    /// The loop enclosing `l`, if any.
    pub fn loop_parent(&self, l: LoopId) -> Option<LoopId> {
        self.loops[l].parent.expand()
    }

    /// The back edges of a loop.
    pub fn loop_back_edges(&self, l: LoopId) -> &[Block] {
        &self.loops[l].back_edges
    }

    /// Could the loop not be reduced to a single-entry region?
    pub fn loop_is_irreducible(&self, l: LoopId) -> bool {
        self.loops[l].irreducible
    }

    /// Does the loop contain `block`?
    pub fn loop_contains(&self, l: LoopId, block: Block) -> bool {
        self.loops[l].blocks.contains(&block)
    }

    /// Is `block` a back edge of the loop?
    pub fn is_back_edge(&self, l: LoopId, block: Block) -> bool {
        self.loops[l].back_edges.contains(&block)
    }

    /// Number of blocks in the loop.
    pub fn loop_num_blocks(&self, l: LoopId) -> usize {
        self.loops[l].blocks.len()
    }

    /// The last lifetime position covered by the loop: the largest lifetime
    /// end among its back edges.
    pub fn loop_lifetime_end(&self, l: LoopId) -> usize {
        self.loops[l]
            .back_edges
            .iter()
            .map(|&b| self.blocks[b].lifetime_end)
            .max()
            .expect("loop has no back edge")
    }

    /// Loop nesting depth of a block.
    pub fn loop_depth(&self, block: Block) -> usize {
        let mut depth = 0;
        let mut current = self.loop_of(block);
        while let Some(l) = current {
            depth += 1;
            current = self.loop_parent(l);
        }
        depth
    }

    // ------------------------------------------------------------------
    // Parallel moves.
    // ------------------------------------------------------------------

    /// Find or create the parallel move executing at `position` in `block`.
    pub fn parallel_move_at(&mut self, block: Block, position: usize) -> &mut ParallelMove {
        let moves = &mut self.blocks[block].moves;
        let index = match moves.binary_search_by_key(&position, |m| m.position) {
            Ok(index) => index,
            Err(index) => {
                moves.insert(
                    index,
                    ParallelMove {
                        position,
                        moves: SmallVec::new(),
                    },
                );
                index
            }
        };
        &mut moves[index]
    }

    /// The parallel moves of a block, in position order.
    pub fn parallel_moves(&self, block: Block) -> &[ParallelMove] {
        &self.blocks[block].moves
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> (Graph, Block, Block, Block, Block) {
        let mut graph = Graph::new();
        let b0 = graph.add_block();
        let b1 = graph.add_block();
        let b2 = graph.add_block();
        let b3 = graph.add_block();
        graph.add_edge(b0, b1);
        graph.add_edge(b0, b2);
        graph.add_edge(b1, b3);
        graph.add_edge(b2, b3);
        graph.set_entry_block(b0);
        graph.set_exit_block(b3);
        graph.analyze();
        (graph, b0, b1, b2, b3)
    }

    #[test]
    fn diamond_dominators() {
        let (graph, b0, b1, b2, b3) = diamond();
        assert_eq!(graph.dominator(b1), Some(b0));
        assert_eq!(graph.dominator(b2), Some(b0));
        assert_eq!(graph.dominator(b3), Some(b0));
        assert!(graph.dominates(b0, b3));
        assert!(!graph.dominates(b1, b3));
        assert!(graph.dominates_exit(b0));
        assert!(!graph.dominates_exit(b1));
        assert!(!graph.has_irreducible_loops());
        assert_eq!(graph.reverse_post_order()[0], b0);
    }

    #[test]
    fn simple_loop() {
        let mut graph = Graph::new();
        let entry = graph.add_block();
        let header = graph.add_block();
        let body = graph.add_block();
        let exit = graph.add_block();
        graph.add_edge(entry, header);
        graph.add_edge(header, body);
        graph.add_edge(body, header);
        graph.add_edge(header, exit);
        graph.set_entry_block(entry);
        graph.set_exit_block(exit);
        graph.analyze();

        let l = graph.loop_of(body).expect("body should be in a loop");
        assert_eq!(graph.loop_header(l), header);
        assert!(graph.is_loop_header(header));
        assert!(!graph.is_loop_header(body));
        assert!(graph.is_back_edge(l, body));
        assert!(graph.loop_contains(l, header));
        assert!(!graph.loop_contains(l, exit));
        assert_eq!(graph.loop_depth(body), 1);
        assert_eq!(graph.loop_depth(exit), 0);
        assert!(!graph.has_irreducible_loops());
    }

    #[test]
    fn nested_loops() {
        let mut graph = Graph::new();
        let entry = graph.add_block();
        let outer = graph.add_block();
        let inner = graph.add_block();
        let inner_body = graph.add_block();
        let outer_latch = graph.add_block();
        let exit = graph.add_block();
        graph.add_edge(entry, outer);
        graph.add_edge(outer, inner);
        graph.add_edge(inner, inner_body);
        graph.add_edge(inner_body, inner);
        graph.add_edge(inner, outer_latch);
        graph.add_edge(outer_latch, outer);
        graph.add_edge(outer, exit);
        graph.set_entry_block(entry);
        graph.set_exit_block(exit);
        graph.analyze();

        let inner_loop = graph.loop_headed_by(inner).unwrap();
        let outer_loop = graph.loop_headed_by(outer).unwrap();
        assert_eq!(graph.loop_parent(inner_loop), Some(outer_loop));
        assert_eq!(graph.loop_parent(outer_loop), None);
        assert_eq!(graph.loop_depth(inner_body), 2);
        assert_eq!(graph.loop_depth(outer_latch), 1);
    }

    #[test]
    fn irreducible_entry_is_flagged() {
        // Two entries into the same cycle: header does not dominate the
        // second entry point.
        let mut graph = Graph::new();
        let entry = graph.add_block();
        let a = graph.add_block();
        let b = graph.add_block();
        let exit = graph.add_block();
        graph.add_edge(entry, a);
        graph.add_edge(entry, b);
        graph.add_edge(a, b);
        graph.add_edge(b, a);
        graph.add_edge(b, exit);
        graph.set_entry_block(entry);
        graph.set_exit_block(exit);
        graph.analyze();
        assert!(graph.has_irreducible_loops());
    }

    #[test]
    fn parallel_move_buffers() {
        let (mut graph, b0, ..) = diamond();
        graph.parallel_move_at(b0, 6);
        graph.parallel_move_at(b0, 2);
        graph.parallel_move_at(b0, 6);
        let positions: Vec<usize> = graph.parallel_moves(b0).iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![2, 6]);
    }
}
