//! The spatial index: a binary tree of octagonal volumes,
//! torn down and rebuilt from every live entity's swept volume
//! once per frame. Two independent instances exist,
//! one for characters and one for particles.

use crate::{entity::EntityRef, volume::OctBB};

//
// Internal types
//

#[derive(Clone, Copy, Debug)]
struct Node {
    volume: OctBB,
    kind: NodeKind,
}

#[derive(Clone, Copy, Debug)]
enum NodeKind {
    Branch { left: usize, right: usize },
    Leaf { entity: EntityRef },
}

/// A "call stack" for efficient recursion through the tree.
#[derive(Clone, Debug, Default)]
struct Stack(Vec<usize>);

//
// The tree itself
//

/// A binary volume tree built by insertion.
///
/// Insertion descends toward the child whose volume would grow the
/// least, so the tree partitions space reasonably well for the
/// mostly-ground-level entity distributions it sees. Rebuilt from
/// scratch every frame; only the storage arenas persist.
#[derive(Clone, Debug, Default)]
pub struct VolumeTree {
    nodes: Vec<Node>,
    /// Single stack that is kept around so that we don't need to
    /// allocate a separate one for every query.
    shared_stack: Stack,
}

impl VolumeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all contents, retaining storage for the next rebuild.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.len() / 2 + usize::from(!self.nodes.is_empty())
    }

    /// Release storage that repeated insert/clear cycles have grown.
    /// Run at a low frequency by the frame driver; purely a memory
    /// optimization, query results are unaffected.
    pub fn prune(&mut self) {
        self.nodes.shrink_to_fit();
        self.shared_stack.0.shrink_to_fit();
    }

    /// Current storage footprint in nodes, for the diagnostic log.
    pub fn capacity(&self) -> usize {
        self.nodes.capacity()
    }

    pub fn insert(&mut self, entity: EntityRef, volume: OctBB) {
        let new_node = Node {
            volume,
            kind: NodeKind::Leaf { entity },
        };

        if self.nodes.is_empty() {
            self.nodes.push(new_node);
            return;
        }

        // walk down and find a spot that grows the tree the least

        let mut curr_node_idx = 0;
        loop {
            let curr_node = self.nodes[curr_node_idx];
            match curr_node.kind {
                NodeKind::Branch { left, right } => {
                    let left_union = volume.union(&self.nodes[left].volume);
                    let right_union = volume.union(&self.nodes[right].volume);

                    self.nodes[curr_node_idx].volume = curr_node.volume.union(&volume);
                    if left_union.measure() <= right_union.measure() {
                        curr_node_idx = left;
                    } else {
                        curr_node_idx = right;
                    }
                }
                NodeKind::Leaf { .. } => {
                    // split this leaf into a branch holding the old leaf
                    // and the new one
                    self.nodes.push(curr_node);
                    self.nodes.push(new_node);
                    self.nodes[curr_node_idx] = Node {
                        volume: curr_node.volume.union(&new_node.volume),
                        kind: NodeKind::Branch {
                            left: self.nodes.len() - 2,
                            right: self.nodes.len() - 1,
                        },
                    };
                    return;
                }
            }
        }
    }

    /// Iterate over every entity whose stored volume overlaps the query
    /// volume. A same-type self-match is possible and must be filtered
    /// by the caller.
    pub fn overlaps(&mut self, volume: &OctBB) -> OverlapIter<'_> {
        OverlapIter {
            volume: *volume,
            stack: &mut self.shared_stack,
            nodes: &self.nodes,
            // the iterator assumes at least two nodes; handle the
            // zero/one node cases here
            next_node: match self.nodes.len() {
                0 => None,
                1 => {
                    if self.nodes[0].volume.overlaps(volume) {
                        Some(0)
                    } else {
                        None
                    }
                }
                _ => Some(0),
            },
        }
    }
}

/// An iterator over every entity whose volume may overlap a query volume.
#[derive(Debug)]
pub struct OverlapIter<'a> {
    volume: OctBB,
    stack: &'a mut Stack,
    nodes: &'a [Node],
    next_node: Option<usize>,
}

impl<'a> Iterator for OverlapIter<'a> {
    type Item = EntityRef;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let next_node = self.next_node?;

            match self.nodes[next_node].kind {
                NodeKind::Branch { left, right } => {
                    match (
                        self.volume.overlaps(&self.nodes[left].volume),
                        self.volume.overlaps(&self.nodes[right].volume),
                    ) {
                        (true, true) => {
                            // visit both children; stack one to return to later
                            self.stack.0.push(right);
                            self.next_node = Some(left);
                        }
                        (true, false) => {
                            self.next_node = Some(left);
                        }
                        (false, true) => {
                            self.next_node = Some(right);
                        }
                        (false, false) => {
                            self.next_node = self.stack.0.pop();
                        }
                    }
                }
                NodeKind::Leaf { entity } => {
                    self.next_node = self.stack.0.pop();
                    if self.nodes[next_node].volume.overlaps(&self.volume) {
                        return Some(entity);
                    }
                }
            }
        }
    }
}

impl<'a> Drop for OverlapIter<'a> {
    fn drop(&mut self) {
        // the stack may not be empty if iteration didn't finish
        self.stack.0.clear();
    }
}
