//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::arena::{ArenaMap, SecondaryMap};
use crate::dense_arena_key;
use crate::ir::{
    BasicBlock, Block, BlockWithParams, DebugInfo, InstData, Instruction, Sig, Signature, Type,
};
use crate::utility::PackedOption;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

dense_arena_key! {
    /// A basic reference to some value, either the result of some computation
    /// or an argument into a basic block. Since everything is based around
    /// function-scoped values in GIR, this is effectively equivalent to a
    /// `llvm::Value*`.
    ///
    /// These are completely useless without the associated [`DataFlowGraph`] they
    /// come from, as they are just keys into a giant table. The DFG contains all the
    /// information that actually makes these useful.
    pub struct Value;

    /// While [`Value`]s refer to a result of some sort, [`Inst`]s refer to
    /// the instructions themselves. This has a subtly different meaning: an [`Inst`]
    /// may not actually refer to something that produces a *result*.
    ///
    /// Some instructions only perform side effects (e.g. `call void`, `store`,
    /// `barrier`), some model control flow (e.g. `ret`, `br`). These can never be
    /// referred to with [`Value`]s, but they *can* be referred to with [`Inst`]s.
    pub struct Inst;
}

/// Models where a given [`Value`] comes from.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum ValueDef {
    /// The value is the result of an instruction.
    Inst(Inst),
    /// The value is the `n`th parameter of a block.
    Param(Block, u32),
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
struct ValueData {
    def: ValueDef,
    ty: Type,
    debug: DebugInfo,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
struct InstEntry {
    data: InstData,
    debug: DebugInfo,
    result: PackedOption<Value>,
}

/// Owns all of the instructions, basic blocks, values, and everything else
/// in a given function. Also models the def-use information between values
/// and the instructions that define them, although it does not model any
/// ordering (see [`Layout`](crate::ir::Layout) for that).
///
/// Entities are never removed from the DFG. Removing an instruction from a
/// function means removing it from the layout, the DFG entry stays around
/// so that any stale keys can still be resolved.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct DataFlowGraph {
    sigs: ArenaMap<Sig, Signature>,
    blocks: ArenaMap<Block, BasicBlock>,
    insts: ArenaMap<Inst, InstEntry>,
    values: ArenaMap<Value, ValueData>,
    names: SecondaryMap<Value, String>,
}

impl DataFlowGraph {
    /// Creates an empty DFG.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a function's [`Signature`] from a given [`Sig`]. Any [`Sig`]
    /// used by any calls inside the function body can be resolved here.
    pub fn signature(&self, sig: Sig) -> &Signature {
        &self.sigs[sig]
    }

    /// Imports a signature into the DFG, returning a [`Sig`] that refers to it.
    ///
    /// Identical signatures are only stored once.
    pub fn insert_sig(&mut self, sig: &Signature) -> Sig {
        let found = self
            .sigs
            .iter()
            .find(|(_, existing)| *existing == sig)
            .map(|(key, _)| key);
        match found {
            Some(key) => key,
            None => self.sigs.insert(sig.clone()),
        }
    }

    /// Creates a new block with a given name. The block is not inserted into
    /// the layout.
    pub fn create_block(&mut self, name: &str) -> Block {
        self.blocks.insert(BasicBlock::new(name.to_owned()))
    }

    /// Resolves a [`Block`] into its [`BasicBlock`].
    pub fn block(&self, block: Block) -> &BasicBlock {
        &self.blocks[block]
    }

    /// Gets the name of a block.
    pub fn block_name(&self, block: Block) -> &str {
        self.blocks[block].name()
    }

    /// Renames a block.
    pub fn set_block_name(&mut self, block: Block, name: &str) {
        self.blocks[block].set_name(name.to_owned());
    }

    /// Gets the parameters of a block, in order.
    pub fn block_params(&self, block: Block) -> &[Value] {
        self.blocks[block].params()
    }

    /// Gets every block that has been created, whether or not it is in the layout.
    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.blocks.keys()
    }

    /// Appends a new parameter of type `ty` to `block`, returning the value
    /// that refers to it.
    pub fn append_block_param(&mut self, block: Block, ty: Type, debug: DebugInfo) -> Value {
        let index = self.blocks[block].params().len() as u32;
        let value = self.values.insert(ValueData {
            def: ValueDef::Param(block, index),
            ty,
            debug,
        });

        self.blocks[block].append_param(value);

        value
    }

    /// Creates an instruction, and if the instruction yields a result,
    /// a value for that result.
    pub fn create_inst(&mut self, data: InstData, debug: DebugInfo) -> (Inst, Option<Value>) {
        let inst = self.insts.next_key();
        let result = data.result_ty().map(|ty| {
            self.values.insert(ValueData {
                def: ValueDef::Inst(inst),
                ty,
                debug,
            })
        });

        self.insts.insert(InstEntry {
            data,
            debug,
            result: result.into(),
        });

        (inst, result)
    }

    /// Gets a single instruction's [`InstData`] from a given [`Inst`].
    pub fn inst_data(&self, inst: Inst) -> &InstData {
        &self.insts[inst].data
    }

    /// Gets the debug info of an instruction.
    pub fn inst_debug(&self, inst: Inst) -> DebugInfo {
        self.insts[inst].debug
    }

    /// Converts an [`Inst`] into a [`Value`] that refers to the result
    /// of the instruction if possible.
    pub fn inst_to_result(&self, inst: Inst) -> Option<Value> {
        self.insts[inst].result.expand()
    }

    /// Gets the possible branch targets of an instruction, if it is a terminator.
    pub fn branch_info(&self, inst: Inst) -> Option<&[BlockWithParams]> {
        self.inst_data(inst).branch_info()
    }

    /// Applies `f` to every operand of `inst`.
    pub fn map_operands<F: FnMut(Value) -> Value>(&mut self, inst: Inst, f: F) {
        self.insts[inst].data.map_operands(f);
    }

    /// Replaces every use of `old` inside of `inst` with `new`.
    pub fn replace_uses_in(&mut self, inst: Inst, old: Value, new: Value) -> bool {
        debug_assert_eq!(self.ty(old), self.ty(new), "cannot change use types");

        self.insts[inst].data.replace_uses(old, new)
    }

    /// Applies `f` to every branch target of `inst`.
    pub fn map_targets<F: FnMut(Block) -> Block>(&mut self, inst: Inst, f: F) {
        self.insts[inst].data.map_targets(f);
    }

    /// Gets every instruction that has been created, whether or not it is in the layout.
    pub fn insts(&self) -> impl Iterator<Item = Inst> + '_ {
        self.insts.keys()
    }

    /// Gets the type that a given [`Value`] evaluates to.
    pub fn ty(&self, value: Value) -> Type {
        self.values[value].ty
    }

    /// Gets where a [`Value`] is defined.
    pub fn value_def(&self, value: Value) -> ValueDef {
        self.values[value].def
    }

    /// Gets the debug info attached to a value.
    pub fn value_debug(&self, value: Value) -> DebugInfo {
        self.values[value].debug
    }

    /// If `value` is the result of an instruction, returns that instruction.
    pub fn value_to_inst(&self, value: Value) -> Option<Inst> {
        match self.value_def(value) {
            ValueDef::Inst(inst) => Some(inst),
            ValueDef::Param(_, _) => None,
        }
    }

    /// Checks if `value` is a block parameter.
    pub fn is_block_param(&self, value: Value) -> bool {
        matches!(self.value_def(value), ValueDef::Param(_, _))
    }

    /// Gets the block that a parameter belongs to. Instruction results
    /// return `None`, their block is only known by the layout.
    pub fn param_block(&self, value: Value) -> Option<Block> {
        match self.value_def(value) {
            ValueDef::Param(bb, _) => Some(bb),
            ValueDef::Inst(_) => None,
        }
    }

    /// Gets every value that has been created.
    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.values.keys()
    }

    /// Gives a value a debug name, e.g. `%next`.
    pub fn set_value_name(&mut self, value: Value, name: &str) {
        self.names.insert(value, name.to_owned());
    }

    /// Gets the debug name of a value, if it has one.
    pub fn value_name(&self, value: Value) -> Option<&str> {
        self.names.get(value).map(String::as_str)
    }

    /// If `value` comes from a constant instruction, gets the raw
    /// bits of the constant.
    pub fn constant_value(&self, value: Value) -> Option<u64> {
        self.value_to_inst(value)
            .and_then(|inst| self.inst_data(inst).constant_raw())
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::*;

    #[test]
    fn results_and_params() {
        let mut dfg = DataFlowGraph::new();
        let bb = dfg.create_block("entry");
        let p0 = dfg.append_block_param(bb, Type::i32(), DebugInfo::fake());
        let p1 = dfg.append_block_param(bb, Type::bool(), DebugInfo::fake());

        assert_eq!(dfg.block_params(bb), &[p0, p1]);
        assert_eq!(dfg.value_def(p1), ValueDef::Param(bb, 1));

        let (_, none) = dfg.create_inst(
            InstData::Barrier(BarrierInst::new()),
            DebugInfo::fake(),
        );
        let (inst, some) = dfg.create_inst(
            InstData::IConst(IConstInst::new(Type::i32(), 42)),
            DebugInfo::fake(),
        );

        assert!(none.is_none());
        assert_eq!(dfg.inst_to_result(inst), some);
        assert_eq!(dfg.value_to_inst(some.unwrap()), Some(inst));
        assert_eq!(dfg.constant_value(some.unwrap()), Some(42));
        assert_eq!(dfg.constant_value(p0), None);
    }

    #[test]
    fn names() {
        let mut dfg = DataFlowGraph::new();
        let bb = dfg.create_block("entry");
        let p0 = dfg.append_block_param(bb, Type::i32(), DebugInfo::fake());

        assert_eq!(dfg.value_name(p0), None);

        dfg.set_value_name(p0, "next");

        assert_eq!(dfg.value_name(p0), Some("next"));
        assert_eq!(dfg.block_name(bb), "entry");
    }
}
