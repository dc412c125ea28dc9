//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::analysis::{ControlFlowGraph, ControlFlowGraphAnalysis};
use crate::arena::SecondaryMap;
use crate::ir::{Block, Function, FunctionDefinition};
use crate::pass::{FunctionAnalysisManager, FunctionAnalysisPass};
use smallvec::{smallvec, SmallVec};
use std::any::TypeId;

// sentinel for "no idom has been computed yet"
const UNDEFINED: usize = usize::MAX;

/// Models the dominator tree for a given control-flow graph. This analysis
/// also gives a reverse postorder for the blocks in the CFG (as this is
/// required for calculating dominators, and is useful information for
/// other passes to have as well).
///
/// # Implementation
/// The algorithm used is described in "A Simple, Fast Dominance Algorithm"
/// by Cooper et. al.
///
/// This implementation stores the tree as a `B -> idom(B)` map instead of
/// a direct tree with separately allocated nodes, but the rough
/// "dominator tree" structure still exists.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    // maps B -> idom(B) for given block B. the root and unreachable blocks have no entry
    tree: SecondaryMap<Block, Block>,
    po_numbers: SecondaryMap<Block, usize>,
    // A valid postorder of the reachable basic blocks in the control-flow graph.
    postorder: Vec<Block>,
}

impl DominatorTree {
    /// Computes dominance information for a function.
    pub fn compute(func: &Function, cfg: &ControlFlowGraph) -> Self {
        match func.definition() {
            Some(def) => Self::compute_definition(def, cfg),
            None => Self {
                tree: SecondaryMap::default(),
                po_numbers: SecondaryMap::default(),
                postorder: Vec::default(),
            },
        }
    }

    /// Computes dominance information for a bare function body. `cfg` must have
    /// been computed over `def`.
    pub fn compute_definition(def: &FunctionDefinition, cfg: &ControlFlowGraph) -> Self {
        let graph = IndexedGraph::forward(def, cfg);
        let po = match graph.root {
            Some(root) => postorder_indices(root, graph.len(), |n| graph.succs[n].clone()),
            None => Vec::default(),
        };
        let idoms = compute_idoms(&po, graph.len(), |n| graph.preds[n].clone());

        let mut tree = SecondaryMap::default();
        let mut po_numbers = SecondaryMap::default();

        for (i, node) in po.iter().copied().enumerate() {
            let block = graph.blocks[node];

            po_numbers.insert(block, i);

            if let Some(idom) = idoms[node] {
                tree.insert(block, graph.blocks[idom]);
            }
        }

        Self {
            tree,
            po_numbers,
            postorder: po.into_iter().map(|n| graph.blocks[n]).collect(),
        }
    }

    /// Gets the immediate dominator of `block`, if one exists. The only
    /// reachable block in a given flowgraph that does not have an immediate
    /// dominator is the entry block.
    pub fn idom(&self, block: Block) -> Option<Block> {
        self.tree.get(block).copied()
    }

    /// Checks if `possible_dominator` dominates `block`. Both blocks must actually be in
    /// the given flowgraph.
    ///
    /// This follows the dominance property directly, it returns true if `block` and
    /// `possible_dominator` are the same block. [`Self::strictly_dominates`] does not.
    pub fn dominates(&self, block: Block, possible_dominator: Block) -> bool {
        (block == possible_dominator) || self.strictly_dominates(block, possible_dominator)
    }

    /// Checks if `possible_dominator` strictly dominates `block`. Unreachable blocks
    /// neither dominate nor are dominated by anything.
    pub fn strictly_dominates(&self, block: Block, possible_dominator: Block) -> bool {
        let target = match self.po_numbers.get(possible_dominator) {
            Some(n) => *n,
            None => return false,
        };

        let mut curr = block;

        // dominators always have a higher postorder number than what they dominate
        while let Some(idom) = self.idom(curr) {
            if idom == possible_dominator {
                return true;
            }

            if self.po_numbers[idom] > target {
                return false;
            }

            curr = idom;
        }

        false
    }

    /// Returns the root (entry) node of the CFG, if the function has any blocks.
    pub fn root(&self) -> Option<Block> {
        self.postorder.last().copied()
    }

    /// Returns the list of reachable blocks in a valid postorder for the CFG.
    pub fn postorder(&self) -> &[Block] {
        &self.postorder
    }

    /// Returns an iterator over the reachable blocks in reverse postorder.
    pub fn reverse_postorder(&self) -> impl Iterator<Item = Block> + '_ {
        self.postorder().iter().copied().rev()
    }

    /// Gets the index of `block` in [`Self::postorder`].
    pub fn postorder_number(&self, block: Block) -> Option<usize> {
        self.po_numbers.get(block).copied()
    }

    /// Checks if a block is reachable from the entry node
    pub fn is_reachable(&self, block: Block) -> bool {
        self.po_numbers.contains(block)
    }
}

/// Wrapper analysis that generates a [`DominatorTree`].
pub struct DominatorTreeAnalysis;

impl FunctionAnalysisPass for DominatorTreeAnalysis {
    type Result = DominatorTree;

    fn expects_preserved(&self) -> SmallVec<[TypeId; 2]> {
        smallvec![TypeId::of::<ControlFlowGraphAnalysis>()]
    }

    fn run(&mut self, func: &Function, am: &FunctionAnalysisManager) -> Self::Result {
        let cfg = am.get::<ControlFlowGraphAnalysis>(func);

        DominatorTree::compute(func, &cfg)
    }
}

/// Models post-dominance over a function's control-flow graph.
///
/// Every block without successors (`ret`, `unreachable`) is joined to a single
/// virtual exit node, and dominance is computed over the reversed graph rooted
/// at that exit. Blocks that cannot reach any exit (infinite loops) have no
/// post-dominance information.
#[derive(Debug, Clone)]
pub struct PostDominatorTree {
    // `None` means the immediate post-dominator is the virtual exit
    tree: SecondaryMap<Block, Option<Block>>,
    po_numbers: SecondaryMap<Block, usize>,
}

impl PostDominatorTree {
    /// Computes post-dominance information for a function.
    pub fn compute(func: &Function, cfg: &ControlFlowGraph) -> Self {
        match func.definition() {
            Some(def) => Self::compute_definition(def, cfg),
            None => Self {
                tree: SecondaryMap::default(),
                po_numbers: SecondaryMap::default(),
            },
        }
    }

    /// Computes post-dominance information for a bare function body.
    pub fn compute_definition(def: &FunctionDefinition, cfg: &ControlFlowGraph) -> Self {
        let graph = IndexedGraph::forward(def, cfg);
        let exit = graph.len();

        // reversed graph with the exit node appended at index `exit`
        let rev_succs = |n: usize| -> SmallVec<[usize; 4]> {
            if n == exit {
                (0..graph.len())
                    .filter(|b| graph.succs[*b].is_empty())
                    .collect()
            } else {
                graph.preds[n].clone()
            }
        };

        let rev_preds = |n: usize| -> SmallVec<[usize; 4]> {
            if n == exit {
                SmallVec::default()
            } else if graph.succs[n].is_empty() {
                smallvec![exit]
            } else {
                graph.succs[n].iter().copied().collect()
            }
        };

        let po = postorder_indices(exit, graph.len() + 1, rev_succs);
        let idoms = compute_idoms(&po, graph.len() + 1, rev_preds);

        let mut tree = SecondaryMap::default();
        let mut po_numbers = SecondaryMap::default();

        for (i, node) in po.iter().copied().enumerate() {
            if node == exit {
                continue;
            }

            let block = graph.blocks[node];
            let ipdom = idoms[node].filter(|idom| *idom != exit);

            po_numbers.insert(block, i);
            tree.insert(block, ipdom.map(|idom| graph.blocks[idom]));
        }

        Self { tree, po_numbers }
    }

    /// Gets the immediate post-dominator of `block`. This is `None` when
    /// the immediate post-dominator is the virtual exit, or when `block`
    /// cannot reach an exit at all.
    pub fn ipdom(&self, block: Block) -> Option<Block> {
        self.tree.get(block).copied().flatten()
    }

    /// Checks if `block` can reach any exit of the function.
    pub fn reaches_exit(&self, block: Block) -> bool {
        self.tree.contains(block)
    }

    /// Checks if `possible_post_dominator` post-dominates `block`. A block
    /// post-dominates itself.
    pub fn post_dominates(&self, block: Block, possible_post_dominator: Block) -> bool {
        if block == possible_post_dominator {
            return true;
        }

        let target = match self.po_numbers.get(possible_post_dominator) {
            Some(n) => *n,
            None => return false,
        };

        let mut curr = block;

        while let Some(ipdom) = self.ipdom(curr) {
            if ipdom == possible_post_dominator {
                return true;
            }

            if self.po_numbers[ipdom] > target {
                return false;
            }

            curr = ipdom;
        }

        false
    }
}

/// Wrapper analysis that generates a [`PostDominatorTree`].
pub struct PostDominatorTreeAnalysis;

impl FunctionAnalysisPass for PostDominatorTreeAnalysis {
    type Result = PostDominatorTree;

    fn expects_preserved(&self) -> SmallVec<[TypeId; 2]> {
        smallvec![TypeId::of::<ControlFlowGraphAnalysis>()]
    }

    fn run(&mut self, func: &Function, am: &FunctionAnalysisManager) -> Self::Result {
        let cfg = am.get::<ControlFlowGraphAnalysis>(func);

        PostDominatorTree::compute(func, &cfg)
    }
}

/// Directly computes a valid post-ordering of the blocks in `func`'s
/// control-flow graph. Only the blocks reachable from the entry are included.
///
/// This should not be used directly in most cases, you probably want to
/// get this information through [`DominatorTree`] or [`DominatorTreeAnalysis`].
pub fn compute_postorder(func: &Function) -> Vec<Block> {
    match func.definition() {
        Some(def) => compute_postorder_definition(def, &ControlFlowGraph::compute_definition(def)),
        None => Vec::default(),
    }
}

/// Equivalent to [`compute_postorder`] over a bare function body.
pub fn compute_postorder_definition(def: &FunctionDefinition, cfg: &ControlFlowGraph) -> Vec<Block> {
    let graph = IndexedGraph::forward(def, cfg);

    match graph.root {
        Some(root) => postorder_indices(root, graph.len(), |n| graph.succs[n].clone())
            .into_iter()
            .map(|n| graph.blocks[n])
            .collect(),
        None => Vec::default(),
    }
}

// the CFG with blocks renumbered densely in layout order, the algorithms below
// need to add nodes (the virtual exit) that aren't real blocks
struct IndexedGraph {
    blocks: Vec<Block>,
    succs: Vec<SmallVec<[usize; 4]>>,
    preds: Vec<SmallVec<[usize; 4]>>,
    root: Option<usize>,
}

impl IndexedGraph {
    fn forward(def: &FunctionDefinition, cfg: &ControlFlowGraph) -> Self {
        let blocks: Vec<Block> = def.layout.blocks().collect();
        let mut index = SecondaryMap::default();

        for (i, block) in blocks.iter().copied().enumerate() {
            index.insert(block, i);
        }

        let succs = blocks
            .iter()
            .map(|bb| cfg.successors(*bb).map(|s| index[s]).collect())
            .collect();

        let preds = blocks
            .iter()
            .map(|bb| cfg.predecessors(*bb).map(|p| index[p]).collect())
            .collect();

        Self {
            root: if blocks.is_empty() { None } else { Some(0) },
            blocks,
            succs,
            preds,
        }
    }

    fn len(&self) -> usize {
        self.blocks.len()
    }
}

fn postorder_indices<F>(root: usize, num_nodes: usize, mut succs: F) -> Vec<usize>
where
    F: FnMut(usize) -> SmallVec<[usize; 4]>,
{
    let mut order = Vec::with_capacity(num_nodes);
    let mut seen = vec![false; num_nodes];
    let mut stack: Vec<(usize, SmallVec<[usize; 4]>, usize)> = Vec::new();

    // mark as seen **before** going to any targets, just in case
    // there's any recursive blocks or recursive chains of blocks
    seen[root] = true;
    stack.push((root, succs(root), 0));

    while let Some(top) = stack.last_mut() {
        let next = top.1.get(top.2).copied();

        top.2 += 1;

        match next {
            Some(target) if !seen[target] => {
                seen[target] = true;

                let targets = succs(target);

                stack.push((target, targets, 0));
            }
            Some(_) => {}
            None => {
                if let Some((node, _, _)) = stack.pop() {
                    order.push(node);
                }
            }
        }
    }

    order
}

fn intersect(po_numbers: &[usize], idoms: &[usize], bb1: usize, bb2: usize) -> usize {
    let mut f1 = bb1;
    let mut f2 = bb2;

    while f1 != f2 {
        let f2v = po_numbers[f2];

        while po_numbers[f1] < f2v {
            f1 = idoms[f1];
        }

        let f1v = po_numbers[f1];

        while po_numbers[f2] < f1v {
            f2 = idoms[f2];
        }
    }

    f1
}

//
// this implements the dominator algorithm described in "A Simple, Fast Dominance Algorithm"
// by Cooper et. al. See the paper: http://www.hipersoft.rice.edu/grads/publications/dom14.pdf.
//
// `po` is a postorder of the reachable nodes, the last node is the root. the result maps
// every node to its idom, the root and unreachable nodes map to `None`
//
fn compute_idoms<F>(po: &[usize], num_nodes: usize, mut preds: F) -> Vec<Option<usize>>
where
    F: FnMut(usize) -> SmallVec<[usize; 4]>,
{
    let root = match po.last() {
        Some(root) => *root,
        None => return vec![None; num_nodes],
    };

    // map node -> postorder number. unreachable nodes are never looked up,
    // they are never given an idom and are filtered out of the preds below
    let mut po_numbers = vec![UNDEFINED; num_nodes];

    for (i, node) in po.iter().copied().enumerate() {
        po_numbers[node] = i;
    }

    let mut idoms = vec![UNDEFINED; num_nodes];
    let mut changed = true;

    // for the purposes of the algorithm, the entry node is its own idom
    idoms[root] = root;

    while changed {
        changed = false;

        // root has no predecessors, so we need to make sure we skip the root node.
        for node in po.iter().rev().copied().skip(1) {
            // every processed predecessor. there will always be at least one
            // when we're iterating in reverse postorder
            let mut processed = preds(node).into_iter().filter(|p| idoms[*p] != UNDEFINED);

            let mut idom = match processed.next() {
                Some(first) => first,
                None => continue,
            };

            for pred in processed {
                idom = intersect(&po_numbers, &idoms, pred, idom);
            }

            if idoms[node] != idom {
                idoms[node] = idom;
                changed = true;
            }
        }
    }

    idoms
        .into_iter()
        .enumerate()
        .map(|(node, idom)| (node != root && idom != UNDEFINED).then_some(idom))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;

    fn diamond() -> (Module, Func, [Block; 4]) {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let sig = SigBuilder::new().param(Type::bool()).build();
        let mut b = module.define_function("test", sig);

        //
        // fn void @test(bool) {
        // entry(bool %0):
        //   condbr bool %0, bb1, bb2
        //
        // bb1:
        //   br merge
        //
        // bb2:
        //   br merge
        //
        // merge:
        //   ret void
        // }
        //
        let entry = b.create_block("entry");
        let v0 = b.append_entry_params(entry, DebugInfo::fake())[0];
        let bb1 = b.create_block("bb1");
        let bb2 = b.create_block("bb2");
        let merge = b.create_block("merge");

        b.switch_to(entry);
        b.append().condbr(
            v0,
            BlockWithParams::to(bb1),
            BlockWithParams::to(bb2),
            DebugInfo::fake(),
        );

        b.switch_to(bb1);
        b.append().br(BlockWithParams::to(merge), DebugInfo::fake());

        b.switch_to(bb2);
        b.append().br(BlockWithParams::to(merge), DebugInfo::fake());

        b.switch_to(merge);
        b.append().ret_void(DebugInfo::fake());

        let f = b.define();

        (module, f, [entry, bb1, bb2, merge])
    }

    #[test]
    fn postorder_simple() {
        let (module, f, [entry, bb1, bb2, merge]) = diamond();
        let po = compute_postorder(module.function(f));

        // while there are two valid postorders for this tree, we know which order
        // the tree is traversed, therefore we can rely on it being one of these
        // orderings (in a test).
        assert_eq!(po, [merge, bb1, bb2, entry]);
    }

    #[test]
    fn domtree_diamond() {
        let (module, f, [entry, bb1, bb2, merge]) = diamond();
        let func = module.function(f);
        let cfg = ControlFlowGraph::compute(func);
        let domtree = DominatorTree::compute(func, &cfg);

        assert_eq!(domtree.root(), Some(entry));
        assert_eq!(domtree.idom(entry), None);
        assert_eq!(domtree.idom(bb1), Some(entry));
        assert_eq!(domtree.idom(bb2), Some(entry));
        assert_eq!(domtree.idom(merge), Some(entry));
        assert!(domtree.dominates(merge, entry));
        assert!(domtree.dominates(merge, merge));
        assert!(!domtree.strictly_dominates(merge, merge));
        assert!(!domtree.dominates(merge, bb1));
        assert!(domtree.reverse_postorder().eq([entry, bb2, bb1, merge]));

        let pdom = PostDominatorTree::compute(func, &cfg);

        assert_eq!(pdom.ipdom(entry), Some(merge));
        assert_eq!(pdom.ipdom(bb1), Some(merge));
        assert_eq!(pdom.ipdom(merge), None);
        assert!(pdom.post_dominates(entry, merge));
        assert!(!pdom.post_dominates(entry, bb1));
    }

    #[test]
    fn loops_and_unreachable_blocks() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let sig = SigBuilder::new().param(Type::bool()).build();
        let mut b = module.define_function("test", sig);

        //
        // fn void @test(bool) {
        // entry(bool %0):
        //   br header
        //
        // header:
        //   condbr bool %0, body, exit
        //
        // body:
        //   br header
        //
        // dead:
        //   br body
        //
        // exit:
        //   ret void
        // }
        //
        let entry = b.create_block("entry");
        let v0 = b.append_entry_params(entry, DebugInfo::fake())[0];
        let header = b.create_block("header");
        let body = b.create_block("body");
        let dead = b.create_block("dead");
        let exit = b.create_block("exit");

        b.switch_to(entry);
        b.append().br(BlockWithParams::to(header), DebugInfo::fake());

        b.switch_to(header);
        b.append().condbr(
            v0,
            BlockWithParams::to(body),
            BlockWithParams::to(exit),
            DebugInfo::fake(),
        );

        b.switch_to(body);
        b.append().br(BlockWithParams::to(header), DebugInfo::fake());

        b.switch_to(dead);
        b.append().br(BlockWithParams::to(body), DebugInfo::fake());

        b.switch_to(exit);
        b.append().ret_void(DebugInfo::fake());

        let f = b.define();
        let func = module.function(f);
        let cfg = ControlFlowGraph::compute(func);
        let domtree = DominatorTree::compute(func, &cfg);

        assert!(!domtree.is_reachable(dead));
        assert_eq!(domtree.postorder().len(), 4);
        assert_eq!(domtree.idom(body), Some(header));
        assert_eq!(domtree.idom(exit), Some(header));
        assert!(domtree.dominates(body, entry));
        assert!(!domtree.dominates(dead, entry));

        let pdom = PostDominatorTree::compute(func, &cfg);

        assert_eq!(pdom.ipdom(body), Some(header));
        assert_eq!(pdom.ipdom(header), Some(exit));
        assert_eq!(pdom.ipdom(dead), Some(body));
        assert!(pdom.post_dominates(entry, exit));
    }

    #[test]
    fn infinite_loop_has_no_post_dominator() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let sig = SigBuilder::new().param(Type::bool()).build();
        let mut b = module.define_function("test", sig);

        //
        // fn void @test(bool) {
        // entry(bool %0):
        //   condbr bool %0, spin, exit
        //
        // spin:
        //   br spin
        //
        // exit:
        //   ret void
        // }
        //
        let entry = b.create_block("entry");
        let v0 = b.append_entry_params(entry, DebugInfo::fake())[0];
        let spin = b.create_block("spin");
        let exit = b.create_block("exit");

        b.switch_to(entry);
        b.append().condbr(
            v0,
            BlockWithParams::to(spin),
            BlockWithParams::to(exit),
            DebugInfo::fake(),
        );

        b.switch_to(spin);
        b.append().br(BlockWithParams::to(spin), DebugInfo::fake());

        b.switch_to(exit);
        b.append().ret_void(DebugInfo::fake());

        let f = b.define();
        let func = module.function(f);
        let cfg = ControlFlowGraph::compute(func);
        let pdom = PostDominatorTree::compute(func, &cfg);

        assert!(!pdom.reaches_exit(spin));
        assert_eq!(pdom.ipdom(spin), None);
        assert_eq!(pdom.ipdom(entry), Some(exit));
    }
}
