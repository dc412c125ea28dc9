//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::analysis::{ControlFlowGraph, DominatorTree};
use crate::arena::SecondaryMap;
use crate::ir::*;
use smallbitvec::{sbvec, SmallBitVec};

#[derive(Debug, Clone)]
struct BlockData {
    // every block that can reach this one
    consumes: SmallBitVec,
    // every block that can reach this one through a suspend point
    kills: SmallBitVec,
    suspend: bool,
}

/// Answers whether a path from one block to another passes through a barrier.
///
/// A value defined before a barrier and used after it doesn't survive the
/// kernel being split into continuations, it has to go through a spill slot.
/// This is the classic coroutine-frame question, answered with two bitsets
/// per block that are propagated forward until nothing changes.
#[derive(Debug, Clone)]
pub struct SuspendCrossingInfo {
    index: SecondaryMap<Block, usize>,
    blocks: Vec<BlockData>,
}

impl SuspendCrossingInfo {
    /// Computes crossing information for `def`, treating every block that
    /// contains one of `barriers` as a suspend point.
    pub fn compute(def: &FunctionDefinition, barriers: &[Inst]) -> Self {
        let cfg = ControlFlowGraph::compute_definition(def);
        let domtree = DominatorTree::compute_definition(def, &cfg);
        let rpo: Vec<Block> = domtree.reverse_postorder().collect();
        let n = rpo.len();
        let mut index = SecondaryMap::new();

        for (i, &block) in rpo.iter().enumerate() {
            index.insert(block, i);
        }

        let mut blocks: Vec<BlockData> = (0..n)
            .map(|i| {
                let mut consumes = sbvec![false; n];

                consumes.set(i, true);

                BlockData {
                    consumes,
                    kills: sbvec![false; n],
                    suspend: false,
                }
            })
            .collect();

        for &barrier in barriers {
            let block = def.layout.inst_block(barrier);

            if let Some(&i) = index.get(block) {
                let data = &mut blocks[i];

                data.suspend = true;
                data.kills = data.consumes.clone();
            }
        }

        let mut rounds = 0;

        loop {
            let mut changed = false;

            for (i, &block) in rpo.iter().enumerate() {
                let mut consumes = blocks[i].consumes.clone();
                let mut kills = blocks[i].kills.clone();

                for pred in cfg.predecessors(block) {
                    if let Some(&p) = index.get(pred) {
                        union(&mut consumes, &blocks[p].consumes);
                        union(&mut kills, &blocks[p].kills);
                    }
                }

                if blocks[i].suspend {
                    union(&mut kills, &consumes);
                } else {
                    // a block doesn't kill itself unless it suspends
                    kills.set(i, false);
                }

                let data = &mut blocks[i];

                if data.consumes != consumes || data.kills != kills {
                    data.consumes = consumes;
                    data.kills = kills;
                    changed = true;
                }
            }

            rounds += 1;

            if !changed {
                break;
            }
        }

        log::trace!(target: "spills", "suspend crossing reached a fixed point after {rounds} rounds");

        Self { index, blocks }
    }

    /// Checks whether any path from `def_block` to `use_block` goes through a
    /// suspend point. Unreachable blocks never cross anything.
    pub fn is_definition_across_suspend(&self, def_block: Block, use_block: Block) -> bool {
        match (self.index.get(def_block), self.index.get(use_block)) {
            (Some(&d), Some(&u)) => self.blocks[u].kills.get(d).unwrap_or(false),
            _ => false,
        }
    }

    /// Checks whether `block` contains a suspend point.
    pub fn is_suspend(&self, block: Block) -> bool {
        self.index
            .get(block)
            .map_or(false, |&i| self.blocks[i].suspend)
    }
}

fn union(dest: &mut SmallBitVec, src: &SmallBitVec) {
    for (i, bit) in src.iter().enumerate() {
        if bit {
            dest.set(i, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::barriers::split_around;

    #[test]
    fn straight_line() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let mut b = module.define_function("k", SigBuilder::new().param(Type::i32()).build());
        let entry = b.create_block("entry");
        let params = b.append_entry_params(entry, DebugInfo::fake());

        b.switch_to(entry);
        let sum = b.append().iadd(params[0], params[0], DebugInfo::fake());
        let barrier = b.append().barrier(DebugInfo::fake());
        b.append().iadd(sum, sum, DebugInfo::fake());
        b.append().ret_void(DebugInfo::fake());

        let f = b.define();
        let def = module.function_mut(f).definition_mut().unwrap();
        let cont = split_around(def, barrier);
        let after = def.layout.block_next(cont).unwrap();
        let info = SuspendCrossingInfo::compute(def, &[barrier]);

        assert!(info.is_suspend(cont));
        assert!(!info.is_suspend(entry));
        assert!(info.is_definition_across_suspend(entry, after));
        assert!(!info.is_definition_across_suspend(entry, entry));
        assert!(!info.is_definition_across_suspend(after, after));
        assert!(!info.is_definition_across_suspend(after, entry));
    }

    #[test]
    fn barrier_inside_loop() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let mut b = module.define_function("k", SigBuilder::new().param(Type::bool()).build());

        // entry:
        //   br loop
        // loop:
        //   barrier
        //   condbr bool %c, loop, exit
        // exit:
        //   ret void
        let entry = b.create_block("entry");
        let header = b.create_block("loop");
        let exit = b.create_block("exit");
        let params = b.append_entry_params(entry, DebugInfo::fake());

        b.switch_to(entry);
        b.append().br(BlockWithParams::to(header), DebugInfo::fake());

        b.switch_to(header);
        let barrier = b.append().barrier(DebugInfo::fake());
        b.append().condbr(
            params[0],
            BlockWithParams::to(header),
            BlockWithParams::to(exit),
            DebugInfo::fake(),
        );

        b.switch_to(exit);
        b.append().ret_void(DebugInfo::fake());

        let f = b.define();
        let def = module.function_mut(f).definition_mut().unwrap();
        let cont = split_around(def, barrier);
        let after = def.layout.block_next(cont).unwrap();
        let info = SuspendCrossingInfo::compute(def, &[barrier]);

        assert!(info.is_definition_across_suspend(entry, header));
        assert!(info.is_definition_across_suspend(header, after));
        assert!(info.is_definition_across_suspend(header, exit));
        assert!(!info.is_definition_across_suspend(header, header));
        assert!(!info.is_definition_across_suspend(after, header));
        assert!(!info.is_definition_across_suspend(after, exit));
        assert!(info.is_definition_across_suspend(after, after) == info.is_suspend(after));
    }
}
