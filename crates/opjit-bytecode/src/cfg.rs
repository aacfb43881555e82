//! Basic-block discovery and dominators

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::function::OpArray;
use crate::opcode::Opcode;
use crate::ssa::Phi;

/// Block flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFlags {
    /// Reachable from the entry or from a reachable catch arm
    pub reachable: bool,
    /// Target of an explicit jump or a catch entry
    pub target: bool,
    /// Function entry
    pub entry: bool,
    /// First block of a catch arm
    pub catch_entry: bool,
}

/// A maximal straight-line instruction range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    /// First instruction
    pub start: u32,
    /// Number of instructions
    pub len: u32,
    /// Successor blocks (jump target first, fallthrough second)
    pub successors: SmallVec<[u32; 2]>,
    /// Predecessor blocks; phi sources follow this order
    pub predecessors: Vec<u32>,
    /// Immediate dominator
    pub idom: Option<u32>,
    /// Flags
    pub flags: BlockFlags,
    /// Phi nodes at the head of the block
    pub phis: Vec<Phi>,
}

impl BasicBlock {
    /// One past the last instruction
    #[inline]
    pub fn end(&self) -> u32 {
        self.start + self.len
    }

    /// Last instruction
    #[inline]
    pub fn last(&self) -> u32 {
        self.end() - 1
    }

    /// Index of `pred` among the predecessors
    pub fn predecessor_index(&self, pred: u32) -> Option<usize> {
        self.predecessors.iter().position(|p| *p == pred)
    }
}

/// Split `op_array` into basic blocks.
///
/// Returns the blocks in instruction order and the block of every
/// instruction.
pub fn build_blocks(op_array: &OpArray) -> (Vec<BasicBlock>, Vec<u32>) {
    let insns = &op_array.instructions;
    let len = insns.len();
    if len == 0 {
        return (Vec::new(), Vec::new());
    }

    let mut leaders = vec![false; len];
    let mut jump_targets = FxHashSet::default();
    leaders[0] = true;
    for (pc, insn) in insns.iter().enumerate() {
        for target in insn.jump_targets() {
            leaders[target as usize] = true;
            jump_targets.insert(target);
        }
        let ends_block = insn.opcode.is_jump()
            || insn.opcode.is_terminator()
            || insn.opcode == Opcode::Catch;
        if ends_block && pc + 1 < len {
            leaders[pc + 1] = true;
        }
    }
    let mut catch_starts = FxHashSet::default();
    for tc in &op_array.try_catch {
        if tc.catch_op != 0 {
            leaders[tc.catch_op as usize] = true;
            catch_starts.insert(tc.catch_op);
        }
        if tc.finally_op != 0 {
            leaders[tc.finally_op as usize] = true;
        }
    }

    let mut blocks = Vec::new();
    let mut block_of = vec![0u32; len];
    for pc in 0..len {
        if leaders[pc] {
            blocks.push(BasicBlock {
                start: pc as u32,
                ..BasicBlock::default()
            });
        }
        let id = blocks.len() - 1;
        blocks[id].len += 1;
        block_of[pc] = id as u32;
    }

    for id in 0..blocks.len() {
        let last = &insns[blocks[id].last() as usize];
        let next = blocks[id].end() as usize;
        let mut succ: SmallVec<[u32; 2]> = SmallVec::new();
        for target in last.jump_targets() {
            succ.push(block_of[target as usize]);
        }
        if last.falls_through() && next < len {
            succ.push(block_of[next]);
        }
        succ.dedup();
        blocks[id].successors = succ;
        blocks[id].flags.target = jump_targets.contains(&blocks[id].start)
            || catch_starts.contains(&blocks[id].start);
        blocks[id].flags.catch_entry = catch_starts.contains(&blocks[id].start);
    }
    blocks[0].flags.entry = true;

    for id in 0..blocks.len() {
        let succs = blocks[id].successors.clone();
        for s in succs {
            blocks[s as usize].predecessors.push(id as u32);
        }
    }

    mark_reachable(op_array, &mut blocks, &block_of);
    compute_dominators(op_array, &mut blocks, &block_of);
    (blocks, block_of)
}

fn mark_reachable(op_array: &OpArray, blocks: &mut [BasicBlock], block_of: &[u32]) {
    let mut stack = vec![0u32];
    loop {
        while let Some(id) = stack.pop() {
            let block = &mut blocks[id as usize];
            if block.flags.reachable {
                continue;
            }
            block.flags.reachable = true;
            stack.extend(block.successors.iter().rev().copied());
        }
        // A catch arm is live once its protected range is.
        let mut added = false;
        for tc in &op_array.try_catch {
            if tc.catch_op == 0 {
                continue;
            }
            let try_block = block_of[tc.try_op as usize] as usize;
            let catch_block = block_of[tc.catch_op as usize];
            if blocks[try_block].flags.reachable && !blocks[catch_block as usize].flags.reachable {
                stack.push(catch_block);
                added = true;
            }
        }
        if !added {
            break;
        }
    }
}

/// Iterative dominator computation (Cooper, Harvey, Kennedy) over the
/// reachable blocks. A catch entry is treated as a successor of the block
/// holding the start of its protected range.
fn compute_dominators(op_array: &OpArray, blocks: &mut [BasicBlock], block_of: &[u32]) {
    let n = blocks.len();
    let mut succs: Vec<SmallVec<[u32; 2]>> = blocks.iter().map(|b| b.successors.clone()).collect();
    let mut preds: Vec<Vec<u32>> = blocks.iter().map(|b| b.predecessors.clone()).collect();
    for tc in &op_array.try_catch {
        if tc.catch_op != 0 {
            let from = block_of[tc.try_op as usize];
            let to = block_of[tc.catch_op as usize];
            succs[from as usize].push(to);
            preds[to as usize].push(from);
        }
    }

    let mut visited = vec![false; n];
    let mut postorder = Vec::with_capacity(n);
    let mut stack: Vec<(u32, usize)> = vec![(0, 0)];
    visited[0] = true;
    while let Some((node, child)) = stack.pop() {
        if child < succs[node as usize].len() {
            stack.push((node, child + 1));
            let next = succs[node as usize][child];
            if !visited[next as usize] {
                visited[next as usize] = true;
                stack.push((next, 0));
            }
        } else {
            postorder.push(node);
        }
    }

    let mut order = vec![usize::MAX; n];
    for (i, &b) in postorder.iter().enumerate() {
        order[b as usize] = i;
    }
    let mut idom: Vec<Option<u32>> = vec![None; n];
    idom[0] = Some(0);

    let intersect = |idom: &[Option<u32>], mut a: u32, mut b: u32| -> u32 {
        while a != b {
            while order[a as usize] < order[b as usize] {
                a = idom[a as usize].unwrap_or(0);
            }
            while order[b as usize] < order[a as usize] {
                b = idom[b as usize].unwrap_or(0);
            }
        }
        a
    };

    let mut changed = true;
    while changed {
        changed = false;
        for &b in postorder.iter().rev() {
            if b == 0 {
                continue;
            }
            let mut new_idom: Option<u32> = None;
            for &p in &preds[b as usize] {
                if idom[p as usize].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => p,
                    Some(cur) => intersect(&idom, p, cur),
                });
            }
            if new_idom.is_some() && idom[b as usize] != new_idom {
                idom[b as usize] = new_idom;
                changed = true;
            }
        }
    }

    for (b, block) in blocks.iter_mut().enumerate() {
        block.idom = if b == 0 { None } else { idom[b] };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;
    use crate::operand::Operand;

    #[test]
    fn straight_line_is_one_block() {
        let op_array = OpArray::builder()
            .temporaries(1)
            .instruction(Instruction::new(Opcode::Nop))
            .instruction(Instruction::new(Opcode::Return).op1(Operand::tmp(0)))
            .build()
            .expect("valid op array");
        let (blocks, block_of) = build_blocks(&op_array);
        assert_eq!(blocks.len(), 1);
        assert_eq!(block_of, vec![0, 0]);
        assert!(blocks[0].successors.is_empty());
        assert!(blocks[0].flags.reachable && blocks[0].flags.entry);
    }

    #[test]
    fn diamond_dominators() {
        // 0: JMPZ $c -> 3
        // 1: NOP
        // 2: JMP 4
        // 3: NOP
        // 4: RETURN
        let op_array = OpArray::builder()
            .cv("c")
            .instruction(Instruction::branch(Opcode::Jmpz, Operand::cv(0), 3))
            .instruction(Instruction::new(Opcode::Nop))
            .instruction(Instruction::jmp(4))
            .instruction(Instruction::new(Opcode::Nop))
            .instruction(Instruction::new(Opcode::Return).op1(Operand::cv(0)))
            .build()
            .expect("valid op array");
        let (blocks, _) = build_blocks(&op_array);
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].successors.as_slice(), &[2, 1]);
        assert_eq!(blocks[3].predecessors, vec![1, 2]);
        assert_eq!(blocks[3].idom, Some(0));
        assert_eq!(blocks[1].idom, Some(0));
        assert!(blocks[2].flags.target);
        assert!(!blocks[1].flags.target);
    }
}
