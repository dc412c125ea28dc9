//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::arena::SecondaryMap;
use crate::ir::{Block, Inst};
use crate::utility::PackedOption;
use smallvec::SmallVec;
use std::fmt;
use std::fmt::{Debug, Formatter};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
struct InstNode {
    prev: PackedOption<Inst>,
    next: PackedOption<Inst>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
struct BlockNode {
    prev: PackedOption<Block>,
    next: PackedOption<Block>,
    first: PackedOption<Inst>,
    last: PackedOption<Inst>,
}

/// Allows the blocks in a layout to be iterated over in program-order.
///
/// This isn't necessarily any relationship between this order and the
/// actual execution order of the GIR besides the fact that the first block
/// is the `entry` block.
#[derive(Copy, Clone, Debug)]
pub struct BlockIter<'layout> {
    next: Option<Block>,
    layout: &'layout Layout,
}

impl<'l> Iterator for BlockIter<'l> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        self.next.map(|block| {
            self.next = self.layout.blocks[block].next.expand();

            block
        })
    }
}

/// Allows all of the instructions in a given block to be iterated over.
#[derive(Copy, Clone, Debug)]
pub struct InstIter<'layout> {
    next: Option<Inst>,
    layout: &'layout Layout,
}

impl<'l> Iterator for InstIter<'l> {
    type Item = Inst;

    fn next(&mut self) -> Option<Self::Item> {
        self.next.map(|inst| {
            self.next = self.layout.nodes[inst].next.expand();

            inst
        })
    }
}

/// Models the layout of an entire function and every basic-block in it.
///
/// Each block is modeled as a linked list to allow easy splicing and in-place
/// editing, and the list of blocks is also modeled as a linked list for
/// similar reasons.
#[derive(Default, Clone)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Layout {
    // forms a doubly-linked list of blocks, with `None` at the head/tail
    blocks: SecondaryMap<Block, BlockNode>,
    // forms a doubly-linked list of instructions, with `None` at the head/tail
    nodes: SecondaryMap<Inst, InstNode>,
    // maps instructions -> the blocks that contain them
    inst_blocks: SecondaryMap<Inst, Block>,
    // the first block in the layout, if any exist
    head: PackedOption<Block>,
    // the last block in the layout, if any exist
    tail: PackedOption<Block>,
    block_len: usize,
    inst_len: usize,
}

impl Layout {
    /// Creates a new, empty layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an instruction to the end of the specified block. If this is the final
    /// instruction being appended to the block, it must be a terminator instruction.
    pub fn append_inst(&mut self, inst: Inst, block: Block) {
        debug_assert!(
            !self.nodes.contains(inst),
            "cannot insert same inst multiple times"
        );

        let block_node = &mut self.blocks[block];
        let prev = block_node.last.replace(inst);

        // if the instruction we're inserting after doesn't exist we're the first instruction
        match prev {
            Some(prev) => self.nodes[prev].next = PackedOption::some(inst),
            None => {
                block_node.first.replace(inst);
            }
        }

        self.insert_node(inst, block, prev.into(), PackedOption::none());
    }

    /// Inserts `inst` at the very beginning of `block`.
    pub fn prepend_inst(&mut self, inst: Inst, block: Block) {
        match self.block_first_inst(block) {
            Some(first) => self.insert_inst_before(inst, first),
            None => self.append_inst(inst, block),
        }
    }

    /// Inserts `inst` into the same block as `before`, but directly before `before`.
    pub fn insert_inst_before(&mut self, inst: Inst, before: Inst) {
        debug_assert!(
            !self.nodes.contains(inst),
            "cannot insert same inst multiple times"
        );

        debug_assert!(
            self.nodes.contains(before),
            "cannot insert before instruction that doesn't exist in the layout"
        );

        let after = self.nodes[before].prev.replace(inst);

        // if the instruction we're inserting after doesn't exist, we're at the beginning
        // of the block's instruction list.
        match after {
            Some(after) => self.nodes[after].next = PackedOption::some(inst),
            None => {
                self.block_node_mut(before).first = PackedOption::some(inst);
            }
        }

        self.insert_node(
            inst,
            self.inst_blocks[before],
            after.into(),
            PackedOption::some(before),
        );
    }

    /// Inserts `inst` into the same block as `after`, but directly after `after`.
    pub fn insert_inst_after(&mut self, inst: Inst, after: Inst) {
        debug_assert!(
            !self.nodes.contains(inst),
            "cannot insert same inst multiple times"
        );

        debug_assert!(
            self.nodes.contains(after),
            "cannot insert after instruction that doesn't exist in the layout"
        );

        let before = self.nodes[after].next.replace(inst);

        // if the instruction we're inserting before doesn't exist, we're at the end
        // of the block's instruction list.
        match before {
            Some(before) => self.nodes[before].prev = PackedOption::some(inst),
            None => {
                self.block_node_mut(after).last = PackedOption::some(inst);
            }
        }

        self.insert_node(
            inst,
            self.inst_blocks[after],
            PackedOption::some(after),
            before.into(),
        );
    }

    /// Removes an instruction from the layout. It is expected that the instruction
    /// exists, because removing a non-existent instruction is almost certainly a bug.
    pub fn remove_inst(&mut self, inst: Inst) {
        self.remove_inst_internal(inst, self.nodes[inst]);
    }

    /// In the case that removing an instruction that is possibly not in the layout
    /// is necessary, use this instead of [`Self::remove_inst`].
    ///
    /// Returns `true` an instruction was removed.
    pub fn remove_inst_if_exists(&mut self, inst: Inst) -> bool {
        match self.nodes.get(inst) {
            Some(node) => {
                self.remove_inst_internal(inst, *node);

                true
            }
            None => false,
        }
    }

    /// Appends a block to the layout, putting it at the end of the list of blocks.
    pub fn append_block(&mut self, block: Block) {
        debug_assert!(
            !self.blocks.contains(block),
            "cannot insert block that is already inserted"
        );

        let prev = self.tail.replace(block);

        // if tail exists, we need to mutate it as well. if it doesn't, we need
        // to make sure we also update the head since the list is empty
        match prev {
            Some(bb) => {
                self.blocks[bb].next.replace(block);
            }
            None => {
                self.head.replace(block);
            }
        }

        self.insert_block(block, prev, None);
    }

    /// Inserts a block before another block in the list.
    pub fn insert_block_before(&mut self, block: Block, before: Block) {
        debug_assert!(
            self.blocks.contains(before),
            "cannot insert before a block that doesn't exist in layout"
        );

        debug_assert!(
            !self.blocks.contains(block),
            "cannot insert block that is already inserted"
        );

        let after = self.blocks[before].prev.replace(block);

        match after {
            Some(after) => {
                self.blocks[after].next.replace(block);
            }
            None => {
                self.head.replace(block);
            }
        }

        self.insert_block(block, after, Some(before));
    }

    /// Inserts a basic block after another basic block.
    pub fn insert_block_after(&mut self, block: Block, after: Block) {
        debug_assert!(
            self.blocks.contains(after),
            "cannot insert after a block that doesn't exist in layout"
        );

        debug_assert!(
            !self.blocks.contains(block),
            "cannot insert block that is already inserted"
        );

        let before = self.blocks[after].next.replace(block);

        match before {
            Some(before) => {
                self.blocks[before].prev.replace(block);
            }
            None => {
                self.tail.replace(block);
            }
        }

        self.insert_block(block, Some(after), before);
    }

    /// Removes a block and every instruction inside of it from the layout.
    pub fn remove_block(&mut self, block: Block) {
        let insts: SmallVec<[Inst; 16]> = self.insts_in_block(block).collect();

        for inst in insts {
            self.remove_inst(inst);
        }

        self.unlink_block(block);
        self.blocks.remove(block);
        self.block_len -= 1;
    }

    /// Moves a block (along with all of its instructions) to the front of the
    /// block list, making it the new entry block.
    pub fn move_block_to_front(&mut self, block: Block) {
        if self.head.expand() == Some(block) {
            return;
        }

        self.unlink_block(block);

        let old_head = self.head.replace(block);
        let node = &mut self.blocks[block];

        node.prev = PackedOption::none();
        node.next = old_head.into();

        match old_head {
            Some(head) => {
                self.blocks[head].prev.replace(block);
            }
            None => {
                self.tail.replace(block);
            }
        }
    }

    /// Splits a block in two at `at`: `at` and every instruction after it are
    /// moved (in order) to the end of `new_block`, which must already be
    /// inserted into the layout.
    pub fn split_block(&mut self, new_block: Block, at: Inst) {
        debug_assert!(self.blocks.contains(new_block));

        let mut moving: SmallVec<[Inst; 16]> = SmallVec::new();
        let mut curr = Some(at);

        while let Some(inst) = curr {
            moving.push(inst);
            curr = self.inst_next(inst);
        }

        for inst in moving {
            self.remove_inst(inst);
            self.append_inst(inst, new_block);
        }
    }

    /// Returns the number of blocks in the layout
    pub fn len_blocks(&self) -> usize {
        self.block_len
    }

    /// Returns the number of instructions in the layout
    pub fn len_insts(&self) -> usize {
        self.inst_len
    }

    /// Checks if a block is currently inside the layout
    pub fn is_block_inserted(&self, block: Block) -> bool {
        self.blocks.contains(block)
    }

    /// Checks if an instruction is currently inside the layout
    pub fn is_inst_inserted(&self, inst: Inst) -> bool {
        self.nodes.contains(inst)
    }

    /// Gets an iterator over the blocks of the layout.
    pub fn blocks(&self) -> BlockIter<'_> {
        BlockIter {
            next: self.head.expand(),
            layout: self,
        }
    }

    /// Gets an iterator over every instruction in a given block.
    pub fn insts_in_block(&self, block: Block) -> InstIter<'_> {
        InstIter {
            next: self.blocks[block].first.expand(),
            layout: self,
        }
    }

    /// Gets the entry block for the layout, if it exists.
    pub fn entry_block(&self) -> Option<Block> {
        self.head.expand()
    }

    /// Gets the block that comes after `block`
    pub fn block_next(&self, block: Block) -> Option<Block> {
        self.blocks[block].next.expand()
    }

    /// Gets the block that comes before `block`
    pub fn block_prev(&self, block: Block) -> Option<Block> {
        self.blocks[block].prev.expand()
    }

    /// Gets the first instruction in `block`
    pub fn block_first_inst(&self, block: Block) -> Option<Inst> {
        self.blocks[block].first.expand()
    }

    /// Gets the last instruction in `block`
    pub fn block_last_inst(&self, block: Block) -> Option<Inst> {
        self.blocks[block].last.expand()
    }

    /// Gets the instruction that comes after `inst`
    pub fn inst_next(&self, inst: Inst) -> Option<Inst> {
        self.nodes[inst].next.expand()
    }

    /// Gets the instruction that comes before `inst`
    pub fn inst_prev(&self, inst: Inst) -> Option<Inst> {
        self.nodes[inst].prev.expand()
    }

    /// Gets the block that an instruction is in
    pub fn inst_block(&self, inst: Inst) -> Block {
        self.inst_blocks[inst]
    }

    fn insert_node(
        &mut self,
        inst: Inst,
        block: Block,
        prev: PackedOption<Inst>,
        next: PackedOption<Inst>,
    ) {
        self.nodes.insert(inst, InstNode { prev, next });
        self.inst_blocks.insert(inst, block);
        self.inst_len += 1;
    }

    #[inline(always)]
    fn remove_inst_internal(&mut self, inst: Inst, node: InstNode) {
        // update `node.prev` to point to `node.next` as its own next
        match node.prev.expand() {
            Some(prev) => {
                self.nodes[prev].next = node.next;
            }
            None => {
                self.block_node_mut(inst).first = node.next;
            }
        }

        // update `node.next` to point to `node.prev` as its own prev
        match node.next.expand() {
            Some(next) => {
                self.nodes[next].prev = node.prev;
            }
            None => {
                self.block_node_mut(inst).last = node.prev;
            }
        }

        // make sure there aren't ghost references to that instruction in the layout
        // anymore. we need to make it as-if the inst was never inserted to begin with
        self.nodes.remove(inst);
        self.inst_blocks.remove(inst);
        self.inst_len -= 1;
    }

    fn insert_block(&mut self, block: Block, prev: Option<Block>, next: Option<Block>) {
        self.block_len += 1;
        self.blocks.insert(
            block,
            BlockNode {
                prev: prev.into(),
                next: next.into(),
                first: PackedOption::none(),
                last: PackedOption::none(),
            },
        );
    }

    // links the neighbors of `block` to each other, `block`'s own node is left stale
    fn unlink_block(&mut self, block: Block) {
        let node = self.blocks[block];

        match node.prev.expand() {
            Some(prev) => self.blocks[prev].next = node.next,
            None => self.head = node.next,
        }

        match node.next.expand() {
            Some(next) => self.blocks[next].prev = node.prev,
            None => self.tail = node.prev,
        }
    }

    fn block_node_mut(&mut self, inst: Inst) -> &mut BlockNode {
        &mut self.blocks[self.inst_blocks[inst]]
    }
}

impl Debug for Layout {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_map();

        for block in self.blocks() {
            list.entry(&block, &self.insts_in_block(block).collect::<Vec<_>>());
        }

        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::arena::ArenaKey;
    use crate::ir::*;

    fn bb(i: usize) -> Block {
        Block::key_new(i)
    }

    fn inst(i: usize) -> Inst {
        Inst::key_new(i)
    }

    #[test]
    fn block_order() {
        let mut layout = Layout::new();

        layout.append_block(bb(0));
        layout.append_block(bb(2));
        layout.insert_block_after(bb(3), bb(2));
        layout.insert_block_before(bb(1), bb(2));

        assert_eq!(
            layout.blocks().collect::<Vec<_>>(),
            vec![bb(0), bb(1), bb(2), bb(3)]
        );

        // appending after inserting at the tail must land at the real end
        layout.append_block(bb(4));

        assert_eq!(layout.blocks().last(), Some(bb(4)));

        layout.move_block_to_front(bb(2));

        assert_eq!(
            layout.blocks().collect::<Vec<_>>(),
            vec![bb(2), bb(0), bb(1), bb(3), bb(4)]
        );
        assert_eq!(layout.entry_block(), Some(bb(2)));

        layout.remove_block(bb(4));

        assert_eq!(layout.blocks().last(), Some(bb(3)));
        assert_eq!(layout.len_blocks(), 4);
    }

    #[test]
    fn inst_editing() {
        let mut layout = Layout::new();

        layout.append_block(bb(0));
        layout.append_inst(inst(1), bb(0));
        layout.append_inst(inst(3), bb(0));
        layout.insert_inst_before(inst(2), inst(3));
        layout.prepend_inst(inst(0), bb(0));
        layout.insert_inst_after(inst(4), inst(3));

        assert_eq!(
            layout.insts_in_block(bb(0)).collect::<Vec<_>>(),
            (0..5).map(inst).collect::<Vec<_>>()
        );

        layout.remove_inst(inst(0));
        layout.remove_inst(inst(4));

        assert_eq!(layout.block_first_inst(bb(0)), Some(inst(1)));
        assert_eq!(layout.block_last_inst(bb(0)), Some(inst(3)));
        assert!(!layout.remove_inst_if_exists(inst(4)));
        assert_eq!(layout.len_insts(), 3);
    }

    #[test]
    fn splitting() {
        let mut layout = Layout::new();

        layout.append_block(bb(0));

        for i in 0..4 {
            layout.append_inst(inst(i), bb(0));
        }

        layout.append_block(bb(1));
        layout.split_block(bb(1), inst(2));

        assert_eq!(
            layout.insts_in_block(bb(0)).collect::<Vec<_>>(),
            vec![inst(0), inst(1)]
        );
        assert_eq!(
            layout.insts_in_block(bb(1)).collect::<Vec<_>>(),
            vec![inst(2), inst(3)]
        );
        assert_eq!(layout.inst_block(inst(3)), bb(1));
    }
}
