//! Linearization of the control-flow graph for allocation.
//!
//! Produces an ordering with two properties the allocators rely on: every
//! block comes after its dominator, and the blocks of a loop are contiguous
//! with a back edge last. Neither is guaranteed when the graph has
//! irreducible loops.

use crate::entity::SecondaryMap;
use crate::ir::{Block, Graph, LoopId};

fn same_loop(first: Option<LoopId>, second: Option<LoopId>) -> bool {
    first == second
}

fn is_inner_loop(graph: &Graph, outer: Option<LoopId>, inner: Option<LoopId>) -> bool {
    let (outer, inner) = match (outer, inner) {
        (Some(o), Some(i)) => (o, i),
        _ => return false,
    };
    if outer == inner {
        return false;
    }
    let mut current = graph.loop_parent(inner);
    while let Some(l) = current {
        if l == outer {
            return true;
        }
        current = graph.loop_parent(l);
    }
    false
}

// Insert `block` into the work list so that blocks of the loop being
// processed stay grouped: scan from the back, stopping before the first
// entry that is in the same loop, in no loop at all, or in a loop strictly
// outside `block`'s loop.
fn add_to_list_for_linearization(graph: &Graph, worklist: &mut Vec<Block>, block: Block) {
    let block_loop = graph.loop_of(block);
    let mut insert_at = worklist.len();
    while insert_at > 0 {
        let current = worklist[insert_at - 1];
        let current_loop = graph.loop_of(current);
        if same_loop(block_loop, current_loop)
            || current_loop.is_none()
            || is_inner_loop(graph, current_loop, block_loop)
        {
            // The block can be processed immediately.
            break;
        }
        insert_at -= 1;
    }
    worklist.insert(insert_at, block);
}

// Post-condition of the order: each loop forms a contiguous run starting at
// its header and ending at a back edge.
fn is_linear_order_well_formed(graph: &Graph, order: &[Block]) -> bool {
    for header in graph.blocks() {
        let l = match graph.loop_headed_by(header) {
            Some(l) => l,
            None => continue,
        };
        let num_blocks = graph.loop_num_blocks(l);
        let mut found = 0;
        for &block in order {
            if graph.loop_contains(l, block) {
                found += 1;
                if found == 1 && block != header {
                    // First block is not the header.
                    return false;
                } else if found == num_blocks && !graph.is_back_edge(l, block) {
                    // Last block is not a back edge.
                    return false;
                }
            } else if found != 0 && found != num_blocks {
                // Blocks are not adjacent.
                return false;
            }
        }
        debug_assert_eq!(found, num_blocks);
    }
    true
}

/// Compute the linear order and install it on the graph.
pub fn linearize(graph: &mut Graph) {
    // (1) Record the number of forward predecessors for each block, to
    //     ensure the resulting order is a reverse post order.
    let mut forward_predecessors: SecondaryMap<Block, usize> = SecondaryMap::with_default(0);
    for block in graph.blocks() {
        let mut count = graph.preds(block).len();
        if let Some(l) = graph.loop_headed_by(block) {
            count -= graph.loop_back_edges(l).len();
        }
        forward_predecessors[block] = count;
    }

    // (2) Work list seeded with the entry block. A successor becomes ready
    //     once all its forward predecessors have been emitted; where it goes
    //     in the work list keeps loop blocks together.
    let mut order = Vec::with_capacity(graph.num_blocks());
    let mut worklist = vec![graph.entry_block()];
    while let Some(current) = worklist.pop() {
        order.push(current);
        for i in 0..graph.succs(current).len() {
            let successor = graph.succs(current)[i];
            let remaining = forward_predecessors[successor];
            if remaining == 1 {
                add_to_list_for_linearization(graph, &mut worklist, successor);
            }
            forward_predecessors[successor] = remaining.saturating_sub(1);
        }
    }
    debug_assert_eq!(order.len(), graph.num_blocks());
    debug_assert!(graph.has_irreducible_loops() || is_linear_order_well_formed(graph, &order));

    graph.set_linear_order(order);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diamond_is_topological() {
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
        graph.analyze();
        linearize(&mut graph);

        let order = graph.linear_order();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], b0);
        assert_eq!(order[3], b3);
    }

    #[test]
    fn loop_blocks_are_contiguous() {
        // entry -> pre -> header <-> body, header -> tail -> exit, with a
        // diamond around the loop so the work list has competing blocks.
        let mut graph = Graph::new();
        let entry = graph.add_block();
        let pre = graph.add_block();
        let other = graph.add_block();
        let header = graph.add_block();
        let body = graph.add_block();
        let tail = graph.add_block();
        let exit = graph.add_block();
        graph.add_edge(entry, pre);
        graph.add_edge(entry, other);
        graph.add_edge(pre, header);
        graph.add_edge(header, body);
        graph.add_edge(body, header);
        graph.add_edge(header, tail);
        graph.add_edge(other, exit);
        graph.add_edge(tail, exit);
        graph.set_entry_block(entry);
        graph.set_exit_block(exit);
        graph.analyze();
        linearize(&mut graph);

        let order = graph.linear_order();
        let header_index = order.iter().position(|&b| b == header).unwrap();
        let body_index = order.iter().position(|&b| b == body).unwrap();
        // Header first, back edge immediately after: the loop is one run.
        assert_eq!(body_index, header_index + 1);
        // Every block is ordered after its dominator.
        for (i, &block) in order.iter().enumerate() {
            if let Some(dom) = graph.dominator(block) {
                assert!(order[..i].contains(&dom));
            }
        }
    }
}
