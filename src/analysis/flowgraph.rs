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
use crate::ir::{Block, Cursor, FuncView, Function, FunctionDefinition};
use crate::pass::{FunctionAnalysisManager, FunctionAnalysisPass};
use smallvec::SmallVec;

#[derive(Debug, Default, Clone)]
struct CFGNodeData {
    // kept in discovery order so that traversals over the graph are deterministic
    predecessors: SmallVec<[Block; 4]>,
    successors: SmallVec<[Block; 2]>,
}

struct CFGComputer<'f> {
    nodes: SecondaryMap<Block, CFGNodeData>,
    cursor: FuncView<'f>,
}

impl<'f> CFGComputer<'f> {
    fn new(def: &'f FunctionDefinition) -> Self {
        Self {
            nodes: SecondaryMap::default(),
            cursor: FuncView::over(def),
        }
    }

    fn compute(mut self) -> SecondaryMap<Block, CFGNodeData> {
        while let Some(block) = self.cursor.next_block() {
            self.compute_block(block);

            // an empty block leaves the cursor at `Nothing`, which would restart at the entry
            self.cursor.goto_before(block);
        }

        self.nodes
    }

    fn compute_block(&mut self, block: Block) {
        self.cursor.goto_last_inst(block);

        {
            // make sure that any block we compute at least gets
            // an empty node, even if we don't do anything else
            let _ = self.node_of(block);
        }

        let curr = match self.cursor.current_inst() {
            Some(inst) => inst,
            _ => return,
        };

        let successors: SmallVec<[Block; 8]> = match self.cursor.dfg().branch_info(curr) {
            Some(targets) => targets.iter().map(|target| target.block()).collect(),
            // the verifier is what complains about missing terminators
            None => return,
        };

        for successor in successors {
            self.add_edge(block, successor);
        }
    }

    fn add_edge(&mut self, from: Block, to: Block) {
        let node = self.node_of(from);

        if !node.successors.contains(&to) {
            node.successors.push(to);
        }

        let node = self.node_of(to);

        if !node.predecessors.contains(&from) {
            node.predecessors.push(from);
        }
    }

    fn node_of(&mut self, block: Block) -> &mut CFGNodeData {
        self.nodes.get_or_insert_with(block, CFGNodeData::default)
    }
}

/// Models successor/predecessor information about the control-flow graph of
/// a given function.
///
/// Edges are deduplicated, a `condbr` with both targets equal produces one edge.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    nodes: SecondaryMap<Block, CFGNodeData>,
}

impl ControlFlowGraph {
    /// Directly computes flowgraph information for a given function. Declarations
    /// have an empty graph.
    ///
    /// This should not be used directly in normal compiler passes, this should be
    /// requested from the [`FunctionAnalysisManager`]
    /// through [`ControlFlowGraphAnalysis`].
    pub fn compute(func: &Function) -> Self {
        match func.definition() {
            Some(def) => Self::compute_definition(def),
            None => Self {
                nodes: SecondaryMap::default(),
            },
        }
    }

    /// Computes the graph of a bare function body. This is what transforms use
    /// while a body is being rewritten and is not yet installed into a module.
    pub fn compute_definition(def: &FunctionDefinition) -> Self {
        Self {
            nodes: CFGComputer::new(def).compute(),
        }
    }

    /// Returns an iterator over the predecessors for a given block.
    pub fn predecessors(&self, block: Block) -> impl Iterator<Item = Block> + '_ {
        self.data_of(block).predecessors.iter().copied()
    }

    /// Returns an iterator over the successors for a given block.
    pub fn successors(&self, block: Block) -> impl Iterator<Item = Block> + '_ {
        self.data_of(block).successors.iter().copied()
    }

    /// Gets the number of distinct successors of `block`.
    pub fn num_successors(&self, block: Block) -> usize {
        self.data_of(block).successors.len()
    }

    /// Checks if a given block `pred` is a predecessor of `block`
    pub fn is_pred_of(&self, block: Block, pred: Block) -> bool {
        self.data_of(block).predecessors.contains(&pred)
    }

    /// Checks if a given block `succ` is a successor of `block`
    pub fn is_succ_of(&self, block: Block, succ: Block) -> bool {
        self.data_of(block).successors.contains(&succ)
    }

    /// Gets every block that has a node in the graph.
    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.nodes.keys()
    }

    fn data_of(&self, block: Block) -> &CFGNodeData {
        &self.nodes[block]
    }
}

/// An analysis pass that wraps up a [`ControlFlowGraph`] into
/// something that can actually be used inside of transform passes.
pub struct ControlFlowGraphAnalysis;

impl FunctionAnalysisPass for ControlFlowGraphAnalysis {
    type Result = ControlFlowGraph;

    fn run(&mut self, func: &Function, _: &FunctionAnalysisManager) -> Self::Result {
        ControlFlowGraph::compute(func)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;
    use std::iter;

    fn void_module() -> Module {
        Module::new("test", ShaderKind::OpenCL)
    }

    #[test]
    fn no_blocks() {
        let mut m = void_module();
        let sig = SigBuilder::new().build();
        let b = m.define_function("main", sig);
        let f = b.define();

        let cfg = ControlFlowGraph::compute(m.function(f));

        assert_eq!(cfg.blocks().next(), None);
    }

    #[test]
    fn merge() {
        let mut m = void_module();
        let sig = SigBuilder::new().param(Type::bool()).build();
        let mut b = m.define_function("main", sig);

        //
        // fn void @main(bool) {
        // entry(bool %0):
        //   condbr bool %0, if.true, otherwise
        //
        // if.true:
        //   br merge
        //
        // otherwise:
        //   br merge
        //
        // merge:
        //   ret void
        // }
        //
        let entry = b.create_block("entry");
        let entry_params = b.append_entry_params(entry, DebugInfo::fake());
        let if_true = b.create_block("if.true");
        let otherwise = b.create_block("otherwise");
        let merge = b.create_block("merge");

        b.switch_to(entry);
        b.append().condbr(
            entry_params[0],
            BlockWithParams::to(if_true),
            BlockWithParams::to(otherwise),
            DebugInfo::fake(),
        );

        b.switch_to(if_true);
        b.append().br(BlockWithParams::to(merge), DebugInfo::fake());

        b.switch_to(otherwise);
        b.append().br(BlockWithParams::to(merge), DebugInfo::fake());

        b.switch_to(merge);
        b.append().ret_void(DebugInfo::fake());

        let f = b.define();
        let cfg = ControlFlowGraph::compute(m.function(f));

        assert_eq!(cfg.predecessors(entry).next(), None);
        assert!(cfg.is_pred_of(if_true, entry));
        assert!(cfg.is_pred_of(otherwise, entry));
        assert!(cfg.is_pred_of(merge, if_true));
        assert!(cfg.is_pred_of(merge, otherwise));
        assert!(cfg.is_succ_of(entry, if_true));
        assert!(cfg.is_succ_of(entry, otherwise));
        assert!(cfg.successors(entry).eq([if_true, otherwise]));
        assert!(cfg.successors(if_true).eq(iter::once(merge)));
        assert!(cfg.successors(otherwise).eq(iter::once(merge)));
        assert_eq!(cfg.successors(merge).next(), None);
    }

    #[test]
    fn switch_and_self_loop() {
        let mut m = void_module();
        let sig = SigBuilder::new().param(Type::i32()).build();
        let mut b = m.define_function("main", sig);

        //
        // fn void @main(i32) {
        // entry(i32 %0):
        //   switch i32 %0, default [0 -> spin, 1 -> exit, 2 -> exit]
        //
        // spin:
        //   br spin
        //
        // default:
        //   unreachable
        //
        // exit:
        //   ret void
        // }
        //
        let entry = b.create_block("entry");
        let params = b.append_entry_params(entry, DebugInfo::fake());
        let spin = b.create_block("spin");
        let default = b.create_block("default");
        let exit = b.create_block("exit");

        b.switch_to(entry);
        b.append().switch(
            params[0],
            default,
            &[(0, spin), (1, exit), (2, exit)],
            DebugInfo::fake(),
        );

        b.switch_to(spin);
        b.append().br(BlockWithParams::to(spin), DebugInfo::fake());

        b.switch_to(default);
        b.append().unreachable(DebugInfo::fake());

        b.switch_to(exit);
        b.append().ret_void(DebugInfo::fake());

        let f = b.define();
        let cfg = ControlFlowGraph::compute(m.function(f));

        assert_eq!(cfg.num_successors(entry), 3);
        assert!(cfg.successors(entry).eq([default, spin, exit]));
        assert!(cfg.predecessors(spin).eq([entry, spin]));
        assert!(cfg.predecessors(exit).eq(iter::once(entry)));
        assert_eq!(cfg.successors(default).next(), None);
    }

    #[test]
    fn unreachable_block() {
        let mut m = void_module();
        let sig = SigBuilder::new().build();
        let mut b = m.define_function("main", sig);

        //
        // fn void @main() {
        // entry:
        //   br entry
        //
        // unreachable.block:
        //   unreachable
        // }
        //
        let entry = b.create_block("entry");
        let unreachable_block = b.create_block("unreachable.block");
        b.switch_to(entry);
        b.append().br(BlockWithParams::to(entry), DebugInfo::fake());

        b.switch_to(unreachable_block);
        b.append().unreachable(DebugInfo::fake());

        let f = b.define();
        let cfg = ControlFlowGraph::compute(m.function(f));

        assert!(cfg.predecessors(entry).eq(iter::once(entry)));
        assert!(cfg.successors(entry).eq(iter::once(entry)));
        assert_eq!(cfg.predecessors(unreachable_block).next(), None);
        assert_eq!(cfg.successors(unreachable_block).next(), None);
    }
}
