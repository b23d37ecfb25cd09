//! Basic blocks and control flow over an editable method body.
//!
//! Instrumentation inserts guards in the middle of blocks and retargets branches to the first
//! inserted instruction, so the shape of the graph before and after rewriting is a useful
//! invariant to check: every original block still exists, and every edge still lands on the
//! same original instruction or on the guard placed in front of it.
//!
//! # Key Components
//!
//! - [`ControlFlowGraph`] - Blocks, edges and reachability of one body
//! - [`BasicBlock`] - A maximal straight-line instruction range
//! - [`EdgeKind`] - Classification of the edges between blocks

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::{
    assembly::{FlowType, InstrId},
    metadata::method::MethodBody,
    Result,
};

/// The kind of control flow represented by an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Unconditional branch or fall-through
    Unconditional,
    /// Taken side of a conditional branch
    ConditionalTrue,
    /// Fall-through side of a conditional branch
    ConditionalFalse,
    /// One case of a switch, `None` for the default fall-through
    Switch(Option<u32>),
    /// From a protected region into its handler or filter
    ExceptionHandler,
    /// A `leave` out of a protected region
    Leave,
}

/// A straight-line instruction range with a single entry.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    /// Block index in layout order
    pub index: usize,
    /// Position of the first instruction in the body
    pub start: usize,
    /// Position one past the last instruction
    pub end: usize,
    /// Id of the leading instruction
    pub leader: InstrId,
}

impl BasicBlock {
    /// Number of instructions in the block
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true for blocks without instructions, which the builder never produces
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Control flow graph of a method body.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    blocks: Vec<BasicBlock>,
    edges: Vec<(usize, usize, EdgeKind)>,
    by_leader: HashMap<InstrId, usize>,
}

impl ControlFlowGraph {
    /// Builds the graph of a body.
    ///
    /// # Errors
    /// Returns [`crate::Error::RewriteFailure`] if a branch target or handler boundary names an
    /// instruction that is not part of the body.
    pub fn build(body: &MethodBody) -> Result<Self> {
        let positions: HashMap<InstrId, usize> = body
            .instructions
            .iter()
            .enumerate()
            .map(|(position, i)| (i.id, position))
            .collect();
        let position_of = |id: InstrId| {
            positions
                .get(&id)
                .copied()
                .ok_or_else(|| rewrite_error!("{} is not part of the method body", id))
        };

        let mut leaders = BTreeSet::new();
        if !body.instructions.is_empty() {
            leaders.insert(0);
        }
        for (position, instruction) in body.instructions.iter().enumerate() {
            for target in instruction.targets() {
                leaders.insert(position_of(target)?);
            }
            let ends_block = instruction.is_branch()
                || instruction.opcode.is_terminal()
                || matches!(instruction.opcode.flow(), FlowType::Switch);
            if ends_block && position + 1 < body.instructions.len() {
                leaders.insert(position + 1);
            }
        }
        for handler in &body.exception_handlers {
            for boundary in handler.boundaries() {
                leaders.insert(position_of(boundary)?);
            }
        }

        let starts: Vec<usize> = leaders.into_iter().collect();
        let mut blocks = Vec::with_capacity(starts.len());
        let mut by_leader = HashMap::with_capacity(starts.len());
        for (index, start) in starts.iter().enumerate() {
            let end = starts
                .get(index + 1)
                .copied()
                .unwrap_or(body.instructions.len());
            let leader = body.instructions[*start].id;
            by_leader.insert(leader, index);
            blocks.push(BasicBlock {
                index,
                start: *start,
                end,
                leader,
            });
        }

        let block_of = |id: InstrId| by_leader.get(&id).copied();
        let mut edges = Vec::new();
        for block in &blocks {
            let last = &body.instructions[block.end - 1];
            let next = (block.index + 1 < blocks.len()).then_some(block.index + 1);

            match last.opcode.flow() {
                FlowType::ConditionalBranch => {
                    if let Some(target) = last.targets().first().and_then(|t| block_of(*t)) {
                        edges.push((block.index, target, EdgeKind::ConditionalTrue));
                    }
                    if let Some(next) = next {
                        edges.push((block.index, next, EdgeKind::ConditionalFalse));
                    }
                }
                FlowType::UnconditionalBranch | FlowType::Leave => {
                    let kind = if matches!(last.opcode.flow(), FlowType::Leave) {
                        EdgeKind::Leave
                    } else {
                        EdgeKind::Unconditional
                    };
                    if let Some(target) = last.targets().first().and_then(|t| block_of(*t)) {
                        edges.push((block.index, target, kind));
                    }
                }
                FlowType::Switch => {
                    for (case, target) in last.targets().into_iter().enumerate() {
                        if let Some(target) = block_of(target) {
                            edges.push((block.index, target, EdgeKind::Switch(Some(case as u32))));
                        }
                    }
                    if let Some(next) = next {
                        edges.push((block.index, next, EdgeKind::Switch(None)));
                    }
                }
                _ if last.opcode.is_terminal() => {}
                _ => {
                    if let Some(next) = next {
                        edges.push((block.index, next, EdgeKind::Unconditional));
                    }
                }
            }
        }

        for handler in &body.exception_handlers {
            let Some(try_block) = block_of(handler.try_start) else {
                continue;
            };
            for entry in handler.entries() {
                if let Some(entry) = block_of(entry) {
                    edges.push((try_block, entry, EdgeKind::ExceptionHandler));
                }
            }
        }

        Ok(ControlFlowGraph {
            blocks,
            edges,
            by_leader,
        })
    }

    /// All blocks in layout order
    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Number of blocks
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The block led by an instruction
    #[must_use]
    pub fn block_by_leader(&self, leader: InstrId) -> Option<&BasicBlock> {
        self.by_leader.get(&leader).map(|index| &self.blocks[*index])
    }

    /// Successors of a block with their edge kinds
    pub fn successors(&self, block: usize) -> impl Iterator<Item = (usize, EdgeKind)> + '_ {
        self.edges
            .iter()
            .filter(move |(from, _, _)| *from == block)
            .map(|(_, to, kind)| (*to, *kind))
    }

    /// Predecessors of a block
    pub fn predecessors(&self, block: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges
            .iter()
            .filter(move |(_, to, _)| *to == block)
            .map(|(from, _, _)| *from)
    }

    /// Blocks reachable from the entry, in breadth-first order
    #[must_use]
    pub fn reachable(&self) -> Vec<usize> {
        if self.blocks.is_empty() {
            return Vec::new();
        }

        let mut seen = HashSet::from([0]);
        let mut queue = VecDeque::from([0]);
        let mut order = Vec::new();
        while let Some(block) = queue.pop_front() {
            order.push(block);
            for (next, _) in self.successors(block) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        order
    }

    /// Edges as leader pairs, independent of block numbering
    #[must_use]
    pub fn leader_edges(&self) -> HashSet<(InstrId, InstrId, EdgeKind)> {
        self.edges
            .iter()
            .map(|(from, to, kind)| (self.blocks[*from].leader, self.blocks[*to].leader, *kind))
            .collect()
    }
}
