//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::ir::*;
use smallvec::SmallVec;

/// Models the position that the cursor is "pointing at."
///
/// A cursor can be pointing at some block (either before the first instruction
/// in the block or after the last), at a specific instruction in a specific block,
/// or pointing at nothing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub enum CursorPos {
    /// Pointing at nothing.
    Nothing,
    /// Pointing "before" the first instruction in a given block.
    ///
    /// ```none
    /// entry:
    ///   ; <-- here
    ///   %0 = iconst i32 42
    ///   %1 = iadd i32 %0, %0
    ///   ; ...
    /// ```
    Before(Block),
    /// Pointing at a specific instruction in a given block.
    ///
    /// ```none
    /// entry:
    ///   %0 = iconst i32 42 ; <-- here
    ///   %1 = iadd i32 %0, %0
    ///   ; ...
    /// ```
    At(Block, Inst),
    /// Pointing at the end of a specific block.
    ///
    /// ```none
    /// entry:
    ///   %0 = iconst i32 42
    ///   %1 = iadd i32 %0, %0
    ///   br one
    ///   ; <-- here
    /// ```
    After(Block),
}

#[inline(always)]
fn move_to_block_internal(this: &mut impl Cursor, next: Option<Block>) -> Option<Block> {
    this.set_pos(next.map_or_else(|| CursorPos::Nothing, CursorPos::Before));

    next
}

#[inline(always)]
fn move_to_inst_internal(this: &mut impl Cursor, next: Option<(Block, Inst)>) -> Option<Inst> {
    this.set_pos(next.map_or_else(
        || CursorPos::Nothing,
        |(block, inst)| CursorPos::At(block, inst),
    ));

    next.map(|(_, inst)| inst)
}

/// Models basic cursor operations that **view** a function. None of these operations
/// require mutable access to a given function, so they can be used inside of
/// analyses.
pub trait Cursor: Sized {
    /// Gets the current cursor position
    fn pos(&self) -> CursorPos;

    /// Sets the current cursor position
    fn set_pos(&mut self, pos: CursorPos);

    /// Returns the definition of the function being viewed
    fn def(&self) -> &FunctionDefinition;

    /// Gets the layout associated with the function being viewed
    fn layout(&self) -> &Layout {
        &self.def().layout
    }

    /// Gets the data-flow graph associated with the function being viewed
    fn dfg(&self) -> &DataFlowGraph {
        &self.def().dfg
    }

    /// Gets the current block being viewed by the cursor, if any.
    fn current_block(&self) -> Option<Block> {
        match self.pos() {
            CursorPos::Nothing => None,
            CursorPos::Before(block) | CursorPos::After(block) | CursorPos::At(block, _) => {
                Some(block)
            }
        }
    }

    /// Gets the current instruction being viewed by the cursor, if any.
    fn current_inst(&self) -> Option<Inst> {
        if let CursorPos::At(_, inst) = self.pos() {
            Some(inst)
        } else {
            None
        }
    }

    /// Tries to get the possible branch targets for the terminator of the current block.
    /// If there is no current block or the current block's last instruction is not a
    /// terminator, returns `None`.
    fn current_block_terminator_targets(&self) -> Option<&[BlockWithParams]> {
        let block = self.current_block()?;

        self.layout()
            .block_last_inst(block)
            .and_then(|inst| self.dfg().branch_info(inst))
    }

    /// Moves the position to `Before(block)`.
    fn goto_before(&mut self, block: Block) {
        debug_assert!(self.layout().is_block_inserted(block));

        self.set_pos(CursorPos::Before(block));
    }

    /// Moves the position to `After(block)`.
    fn goto_after(&mut self, block: Block) {
        debug_assert!(self.layout().is_block_inserted(block));

        self.set_pos(CursorPos::After(block));
    }

    /// Moves the position to `At(block, first_inst_in_block)`.
    fn goto_first_inst(&mut self, block: Block) {
        self.goto_before(block);

        self.next_inst();
    }

    /// Moves the position to `At(block, last_inst_in_block)`.
    fn goto_last_inst(&mut self, block: Block) {
        self.goto_after(block);

        self.prev_inst();
    }

    /// Moves to the first point in `block` where new instructions can go. Since
    /// there are no φ instructions in GIR, this is the start of the block.
    fn goto_first_insertion_point(&mut self, block: Block) {
        match self.layout().block_first_inst(block) {
            Some(first) => self.set_pos(CursorPos::At(block, first)),
            None => self.goto_after(block),
        }
    }

    /// Moves the position to `At(containing, inst)`
    fn goto_inst(&mut self, inst: Inst) {
        debug_assert!(self.layout().is_inst_inserted(inst));

        let block = self.layout().inst_block(inst);

        self.set_pos(CursorPos::At(block, inst));
    }

    /// Moves the cursor to the next block in the function. If the cursor is currently
    /// not pointing to anywhere in the function, this moves it to `Before(entry)`. If the
    /// cursor is pointing at the last block in the function, this moves it to `Nothing`.
    fn next_block(&mut self) -> Option<Block> {
        let bb = self.current_block().map_or_else(
            || self.layout().entry_block(),
            |block| self.layout().block_next(block),
        );

        move_to_block_internal(self, bb)
    }

    /// Moves the cursor to the block before the current one. If the cursor is pointing at `Nothing`,
    /// nothing changes. If the cursor is pointing at the first block, its moved to `Nothing`.
    fn prev_block(&mut self) -> Option<Block> {
        let bb = self
            .current_block()
            .and_then(|block| self.layout().block_prev(block));

        move_to_block_internal(self, bb)
    }

    /// Moves the cursor to the next instruction in the function. If the cursor points
    /// before the block, this is the first instruction. If it points after, this does
    /// nothing. If it points at nothing, this does nothing.
    fn next_inst(&mut self) -> Option<Inst> {
        let block_and_inst = match self.pos() {
            CursorPos::Nothing | CursorPos::After(_) => None,
            CursorPos::At(block, inst) => self.layout().inst_next(inst).map(|inst| (block, inst)),
            CursorPos::Before(block) => self
                .layout()
                .block_first_inst(block)
                .map(|inst| (block, inst)),
        };

        move_to_inst_internal(self, block_and_inst)
    }

    /// Moves the cursor to the previous instruction in the function. If the cursor points
    /// after the block, this is the last instruction. If it points before, this does
    /// nothing. If it points at nothing, this does nothing.
    fn prev_inst(&mut self) -> Option<Inst> {
        let block_and_inst = match self.pos() {
            CursorPos::Nothing | CursorPos::Before(_) => None,
            CursorPos::At(block, inst) => self.layout().inst_prev(inst).map(|inst| (block, inst)),
            CursorPos::After(block) => self
                .layout()
                .block_last_inst(block)
                .map(|inst| (block, inst)),
        };

        move_to_inst_internal(self, block_and_inst)
    }
}

/// Effectively a [`FuncCursor`] without any of the operations
/// that mutate the function.
pub struct FuncView<'f> {
    def: &'f FunctionDefinition,
    pos: CursorPos,
}

impl<'f> Cursor for FuncView<'f> {
    fn pos(&self) -> CursorPos {
        self.pos
    }

    fn set_pos(&mut self, pos: CursorPos) {
        self.pos = pos;
    }

    fn def(&self) -> &FunctionDefinition {
        self.def
    }
}

impl<'f> FuncView<'f> {
    /// Creates a [`FuncView`] that allows the given function to be viewed.
    pub fn over(def: &'f FunctionDefinition) -> Self {
        Self {
            def,
            pos: CursorPos::Nothing,
        }
    }
}

/// Similar to [`FuncBuilder`] but for in-place modification of functions.
///
/// Instructions built through [`Self::insert`] go immediately before the
/// current instruction, or at the end of the block when the cursor is at
/// `After(block)`. The cursor does not move, so consecutive inserts end up
/// in program order.
pub struct FuncCursor<'f> {
    def: &'f mut FunctionDefinition,
    pos: CursorPos,
}

impl<'f> Cursor for FuncCursor<'f> {
    fn pos(&self) -> CursorPos {
        self.pos
    }

    fn set_pos(&mut self, pos: CursorPos) {
        self.pos = pos;
    }

    fn def(&self) -> &FunctionDefinition {
        self.def
    }
}

impl<'f> FuncCursor<'f> {
    /// Creates a cursor for editing `def`, pointing at nothing.
    pub fn over(def: &'f mut FunctionDefinition) -> Self {
        Self {
            def,
            pos: CursorPos::Nothing,
        }
    }

    /// Gets mutable access to the definition being edited.
    pub fn def_mut(&mut self) -> &mut FunctionDefinition {
        self.def
    }

    /// Gets mutable access to the data-flow graph being edited.
    pub fn dfg_mut(&mut self) -> &mut DataFlowGraph {
        &mut self.def.dfg
    }

    /// Gets mutable access to the layout being edited.
    pub fn layout_mut(&mut self) -> &mut Layout {
        &mut self.def.layout
    }

    /// Returns a builder that inserts at the current position.
    pub fn insert(&mut self) -> CursorInserter<'_, 'f> {
        debug_assert!(
            !matches!(self.pos, CursorPos::Nothing),
            "cannot insert without a position"
        );

        CursorInserter { cursor: self }
    }

    /// Removes the current instruction from the layout, moving to the
    /// instruction after it (or `After(block)` if it was the last one).
    pub fn remove_inst(&mut self) -> Option<Inst> {
        let (block, inst) = match self.pos {
            CursorPos::At(block, inst) => (block, inst),
            _ => return None,
        };

        self.pos = self
            .layout()
            .inst_next(inst)
            .map_or(CursorPos::After(block), |next| CursorPos::At(block, next));

        self.def.layout.remove_inst(inst);

        Some(inst)
    }

    /// Removes the terminator of `block` and moves the cursor to the end of
    /// the block, ready to insert a new one.
    pub fn remove_terminator(&mut self, block: Block) -> Option<Inst> {
        let term = self
            .layout()
            .block_last_inst(block)
            .filter(|inst| self.dfg().inst_data(*inst).is_terminator());

        if let Some(term) = term {
            self.def.layout.remove_inst(term);
        }

        self.goto_after(block);

        term
    }

    /// Creates a new block at the end of the function.
    pub fn create_block(&mut self, name: &str) -> Block {
        let block = self.def.dfg.create_block(name);

        self.def.layout.append_block(block);

        block
    }

    /// Creates a new block directly after `after`.
    pub fn create_block_after(&mut self, name: &str, after: Block) -> Block {
        let block = self.def.dfg.create_block(name);

        self.def.layout.insert_block_after(block, after);

        block
    }

    /// Replaces every use of `old` inside of the function with `new`. This includes
    /// uses as branch arguments.
    pub fn replace_uses(&mut self, old: Value, new: Value) {
        let insts: SmallVec<[Inst; 32]> = self
            .layout()
            .blocks()
            .flat_map(|bb| self.layout().insts_in_block(bb))
            .filter(|inst| self.dfg().inst_data(*inst).operands().contains(&old))
            .collect();

        for inst in insts {
            self.def.dfg.replace_uses_in(inst, old, new);
        }
    }
}

/// Inserts instructions at the position of a [`FuncCursor`].
pub struct CursorInserter<'c, 'f> {
    cursor: &'c mut FuncCursor<'f>,
}

impl<'c, 'f> InstBuilder<'c> for CursorInserter<'c, 'f> {
    fn dfg(&self) -> &DataFlowGraph {
        &self.cursor.def.dfg
    }

    fn build(self, data: InstData, debug: DebugInfo) -> (Inst, Option<Value>) {
        let (inst, val) = self.cursor.def.dfg.create_inst(data, debug);
        let layout = &mut self.cursor.def.layout;

        match self.cursor.pos {
            CursorPos::At(_, before) => layout.insert_inst_before(inst, before),
            CursorPos::After(block) => layout.append_inst(inst, block),
            CursorPos::Before(block) => {
                // keep later inserts after this one
                let first = layout.block_first_inst(block);

                layout.prepend_inst(inst, block);

                self.cursor.pos = first.map_or(CursorPos::After(block), |first| {
                    CursorPos::At(block, first)
                });
            }
            CursorPos::Nothing => panic!("cannot insert without a position"),
        }

        (inst, val)
    }
}
