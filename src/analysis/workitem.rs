//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! Work-item dependence: which values (and which blocks' execution) can differ
//! between the work-items of a workgroup.

use crate::analysis::{
    ControlFlowGraph, ControlFlowGraphAnalysis, DominatorTree, DominatorTreeAnalysis, PostDominatorTree,
    PostDominatorTreeAnalysis,
};
use crate::arena::SecondaryMap;
use crate::ir::*;
use crate::pass::FunctionAnalysisManager;
use crate::utility::GaHashSet;
use log::{debug, trace};
use smallvec::SmallVec;

/// How a value varies across the work-items that compute it, from the most
/// uniform to the least.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Dependence {
    /// The same in every work-item of every workgroup.
    UniformGlobal,
    /// The same in every work-item of one workgroup.
    UniformWorkgroup,
    /// The same in every lane of one hardware thread.
    UniformThread,
    /// Consecutive integers across consecutive lanes.
    Consecutive,
    /// Pointers one element apart across consecutive lanes.
    PtrConsecutive,
    /// No known relationship between lanes.
    Random,
}

impl Dependence {
    /// Checks if the value is identical across at least one hardware thread.
    pub fn is_uniform(self) -> bool {
        self <= Dependence::UniformThread
    }

    /// Maps a uniform dependence onto the tier that spill reloads are tagged with.
    pub fn uniformity(self) -> Option<Uniformity> {
        match self {
            Dependence::UniformGlobal => Some(Uniformity::Global),
            Dependence::UniformWorkgroup => Some(Uniformity::Workgroup),
            Dependence::UniformThread => Some(Uniformity::Thread),
            _ => None,
        }
    }

    // merging two incoming values. lane-dependent values only survive a merge
    // with an identical class
    fn join(self, other: Dependence) -> Dependence {
        if self == other || (self.is_uniform() && other.is_uniform()) {
            self.max(other)
        } else {
            Dependence::Random
        }
    }

    fn general<I: IntoIterator<Item = Dependence>>(operands: I) -> Dependence {
        let max = operands
            .into_iter()
            .max()
            .unwrap_or(Dependence::UniformGlobal);

        if max.is_uniform() {
            max
        } else {
            Dependence::Random
        }
    }
}

/// The question the divergent-barrier transformation asks about each barrier.
pub trait DivergenceOracle {
    /// Checks whether `barrier` (an instruction in `func`) may be reached by
    /// only some of the work-items of a workgroup.
    fn is_workgroup_divergent(&self, func: &Function, barrier: Inst) -> bool;
}

/// A whole-function work-item dependence analysis.
///
/// Every value is classified with a [`Dependence`], and every block with the
/// dependence of the branches it is control dependent on. The analysis is
/// optimistic: values start out [`Dependence::UniformGlobal`] and are raised
/// until a fixed point is reached.
#[derive(Debug, Clone, Default)]
pub struct WorkItemAnalysis {
    values: SecondaryMap<Value, Dependence>,
    blocks: SecondaryMap<Block, Dependence>,
    inst_blocks: SecondaryMap<Inst, Block>,
}

impl WorkItemAnalysis {
    /// Analyzes `func` inside of `module`. Module metadata decides whether
    /// the parameters are kernel arguments and where `LocalSize` arrives.
    pub fn compute(module: &Module, func: Func) -> Self {
        let md = module.metadata();

        Self::compute_function(
            module.function(func),
            md.is_entry(func),
            md.implicit_arg(func, ImplicitArg::LocalSize),
        )
    }

    /// Like [`Self::compute`], except the flow graph and dominator trees come
    /// from (and are left cached in) `am`.
    pub fn compute_cached(module: &Module, func: Func, am: &FunctionAnalysisManager) -> Self {
        let md = module.metadata();
        let function = module.function(func);

        if function.is_decl() {
            return Self::default();
        }

        let cfg = am.get::<ControlFlowGraphAnalysis>(function);
        let domtree = am.get::<DominatorTreeAnalysis>(function);
        let pdom = am.get::<PostDominatorTreeAnalysis>(function);

        Self::compute_with(
            function,
            md.is_entry(func),
            md.implicit_arg(func, ImplicitArg::LocalSize),
            &cfg,
            &domtree,
            &pdom,
        )
    }

    /// Analyzes a function directly. Parameters of a kernel are uniform across the
    /// dispatch (`local_size` names the parameter holding the workgroup size),
    /// parameters of anything else are unknown.
    pub fn compute_function(func: &Function, is_kernel: bool, local_size: Option<u32>) -> Self {
        let def = match func.definition() {
            Some(def) => def,
            None => return Self::default(),
        };

        let cfg = ControlFlowGraph::compute_definition(def);
        let domtree = DominatorTree::compute_definition(def, &cfg);
        let pdom = PostDominatorTree::compute_definition(def, &cfg);

        Self::compute_with(func, is_kernel, local_size, &cfg, &domtree, &pdom)
    }

    /// Analyzes a function given analyses already computed over it.
    pub fn compute_with(
        func: &Function,
        is_kernel: bool,
        local_size: Option<u32>,
        cfg: &ControlFlowGraph,
        domtree: &DominatorTree,
        pdom: &PostDominatorTree,
    ) -> Self {
        let mut analysis = Self::default();
        let def = match func.definition() {
            Some(def) => def,
            None => return analysis,
        };

        for block in def.layout.blocks() {
            for inst in def.layout.insts_in_block(block) {
                analysis.inst_blocks.insert(inst, block);
            }
        }

        let rpo: Vec<Block> = domtree.reverse_postorder().collect();

        if let Some(entry) = def.entry_block() {
            for (i, param) in def.dfg.block_params(entry).iter().enumerate() {
                let dep = match (is_kernel, local_size) {
                    (true, Some(index)) if index as usize == i => Dependence::UniformWorkgroup,
                    (true, _) => Dependence::UniformGlobal,
                    (false, _) => Dependence::Random,
                };

                analysis.values.insert(*param, dep);
            }
        }

        let mut computer = WorkItemComputer {
            def,
            cfg,
            pdom,
            use_blocks: compute_use_blocks(def),
            analysis,
        };

        let mut rounds = 0;

        while computer.round(&rpo) {
            rounds += 1;
        }

        debug!(target: "workitem", "'{}' reached a fixed point after {} rounds", func.name(), rounds + 1);

        computer.analysis
    }

    /// Gets the dependence of a value. Values that were never analyzed (i.e. those
    /// in unreachable blocks) are [`Dependence::Random`].
    pub fn dependence(&self, value: Value) -> Dependence {
        self.values.get(value).copied().unwrap_or(Dependence::Random)
    }

    /// Gets the strongest dependence of any branch that `block` is control dependent on.
    pub fn control_dependence(&self, block: Block) -> Dependence {
        self.blocks
            .get(block)
            .copied()
            .unwrap_or(Dependence::UniformGlobal)
    }

    /// Checks if `inst` may execute in only some of the work-items of a workgroup.
    pub fn inside_workgroup_divergent_cf(&self, inst: Inst) -> bool {
        self.block_dependence_of(inst) > Dependence::UniformWorkgroup
    }

    /// Checks if `inst` may execute in only some of the lanes of a hardware thread.
    pub fn inside_divergent_cf(&self, inst: Inst) -> bool {
        self.block_dependence_of(inst) > Dependence::UniformThread
    }

    fn block_dependence_of(&self, inst: Inst) -> Dependence {
        match self.inst_blocks.get(inst) {
            Some(block) => self.control_dependence(*block),
            None => Dependence::Random,
        }
    }
}

impl DivergenceOracle for WorkItemAnalysis {
    fn is_workgroup_divergent(&self, _: &Function, barrier: Inst) -> bool {
        self.inside_workgroup_divergent_cf(barrier)
    }
}

struct WorkItemComputer<'a> {
    def: &'a FunctionDefinition,
    cfg: &'a ControlFlowGraph,
    pdom: &'a PostDominatorTree,
    use_blocks: SecondaryMap<Value, SmallVec<[Block; 4]>>,
    analysis: WorkItemAnalysis,
}

impl<'a> WorkItemComputer<'a> {
    // one pass over the function, returns whether anything was raised
    fn round(&mut self, rpo: &[Block]) -> bool {
        let def = self.def;
        let mut changed = false;
        let entry = def.entry_block();

        for &block in rpo {
            if Some(block) != entry {
                for (i, param) in def.dfg.block_params(block).iter().enumerate() {
                    let dep = self.incoming(block, i);

                    changed |= self.raise_value(*param, dep);
                }
            }

            for inst in def.layout.insts_in_block(block) {
                if let Some(result) = def.dfg.inst_to_result(inst) {
                    let dep = self.transfer(inst);

                    changed |= self.raise_value(result, dep);
                }
            }
        }

        for &block in rpo {
            changed |= self.control_dependence(block);
        }

        changed
    }

    fn dep(&self, value: Value) -> Dependence {
        self.analysis
            .values
            .get(value)
            .copied()
            .unwrap_or(Dependence::UniformGlobal)
    }

    fn raise_value(&mut self, value: Value, dep: Dependence) -> bool {
        let slot = self
            .analysis
            .values
            .get_or_insert_with(value, || Dependence::UniformGlobal);

        if dep > *slot {
            trace!(target: "workitem", "raising {value:?} from {slot:?} to {dep:?}");

            *slot = dep;

            return true;
        }

        false
    }

    fn raise_block(&mut self, block: Block, dep: Dependence) -> bool {
        let slot = self
            .analysis
            .blocks
            .get_or_insert_with(block, || Dependence::UniformGlobal);

        if dep > *slot {
            *slot = dep;

            return true;
        }

        false
    }

    fn incoming(&self, block: Block, index: usize) -> Dependence {
        let def = self.def;
        let mut result: Option<Dependence> = None;

        for pred in self.cfg.predecessors(block) {
            let term = match def.layout.block_last_inst(pred) {
                Some(term) => term,
                None => continue,
            };

            let targets = def.dfg.branch_info(term).unwrap_or(&[]);

            for target in targets.iter().filter(|t| t.block() == block) {
                if let Some(arg) = target.args().get(index) {
                    let dep = self.dep(*arg);

                    result = Some(result.map_or(dep, |prev| prev.join(dep)));
                }
            }
        }

        result.unwrap_or(Dependence::UniformGlobal)
    }

    fn transfer(&self, inst: Inst) -> Dependence {
        let def = self.def;
        let data = def.dfg.inst_data(inst);

        match data {
            InstData::IConst(_)
            | InstData::FConst(_)
            | InstData::BConst(_)
            | InstData::Undef(_)
            | InstData::GlobalAddr(_) => Dependence::UniformGlobal,
            InstData::GroupId(_) => Dependence::UniformWorkgroup,
            InstData::LocalId(id) if id.dim() == 0 => Dependence::Consecutive,
            InstData::LocalId(_) => Dependence::Random,
            InstData::Alloca(_) => Dependence::UniformThread,
            InstData::ReadFirstLane(rfl) => self.dep(rfl.operand()).min(Dependence::UniformThread),
            InstData::AtomicIAdd(_) | InstData::Call(_) | InstData::Fill(_) => Dependence::Random,
            InstData::Load(load) => {
                let ptr = load.pointer();

                // every work-item has its own private memory
                if def.dfg.ty(ptr).addr_space() == Some(AddrSpace::Private) {
                    return Dependence::Random;
                }

                Dependence::general([self.dep(ptr)])
            }
            InstData::IAdd(arith) => self.stride_preserving(arith.lhs(), arith.rhs(), true),
            InstData::ISub(arith) => self.stride_preserving(arith.lhs(), arith.rhs(), false),
            InstData::Offset(offset) => {
                let base = self.dep(offset.base());
                let index = self.dep(offset.offset());

                match (base, index) {
                    (b, Dependence::Consecutive) if b.is_uniform() => Dependence::PtrConsecutive,
                    (Dependence::PtrConsecutive, i) if i.is_uniform() => Dependence::PtrConsecutive,
                    _ => Dependence::general([base, index]),
                }
            }
            _ => Dependence::general(data.operands().iter().map(|v| self.dep(*v))),
        }
    }

    // `consecutive +/- uniform` keeps the stride, `uniform - consecutive` does not
    fn stride_preserving(&self, lhs: Value, rhs: Value, commutative: bool) -> Dependence {
        let l = self.dep(lhs);
        let r = self.dep(rhs);

        match (l, r) {
            (Dependence::Consecutive, u) if u.is_uniform() => Dependence::Consecutive,
            (u, Dependence::Consecutive) if u.is_uniform() && commutative => Dependence::Consecutive,
            _ => Dependence::general([l, r]),
        }
    }

    fn control_dependence(&mut self, block: Block) -> bool {
        let def = self.def;
        let term = match def.layout.block_last_inst(block) {
            Some(term) => term,
            None => return false,
        };

        let cond = match def.dfg.inst_data(term) {
            InstData::CondBr(condbr) => condbr.condition(),
            InstData::Switch(switch) => switch.scrutinee(),
            _ => return false,
        };

        let dep = self.dep(cond);

        if dep == Dependence::UniformGlobal {
            return false;
        }

        // the influence region: everything reachable from the branch without
        // passing through the point where the paths re-join
        let join = self.pdom.ipdom(block);
        let mut region = GaHashSet::default();
        let mut worklist: SmallVec<[Block; 16]> = self.cfg.successors(block).collect();

        while let Some(bb) = worklist.pop() {
            if Some(bb) == join || !region.insert(bb) {
                continue;
            }

            worklist.extend(self.cfg.successors(bb));
        }

        let mut changed = false;

        for bb in region.iter() {
            changed |= self.raise_block(*bb, dep);
        }

        if let Some(join) = join {
            for param in def.dfg.block_params(join) {
                changed |= self.raise_value(*param, dep);
            }
        }

        // values that escape the region differ depending on which path each work-item took
        let mut escaping: SmallVec<[Value; 8]> = SmallVec::new();

        for bb in region.iter().copied() {
            let defined = def.dfg.block_params(bb).iter().copied().chain(
                self.def
                    .layout
                    .insts_in_block(bb)
                    .filter_map(|inst| def.dfg.inst_to_result(inst)),
            );

            for value in defined {
                let escapes = self
                    .use_blocks
                    .get(value)
                    .map_or(false, |uses| uses.iter().any(|u| !region.contains(u)));

                if escapes {
                    escaping.push(value);
                }
            }
        }

        for value in escaping {
            changed |= self.raise_value(value, dep);
        }

        changed
    }
}

fn compute_use_blocks(def: &FunctionDefinition) -> SecondaryMap<Value, SmallVec<[Block; 4]>> {
    let mut uses: SecondaryMap<Value, SmallVec<[Block; 4]>> = SecondaryMap::default();

    for block in def.layout.blocks() {
        for inst in def.layout.insts_in_block(block) {
            for operand in def.dfg.inst_data(inst).operands() {
                let blocks = uses.get_or_insert_with(*operand, SmallVec::new);

                if !blocks.contains(&block) {
                    blocks.push(block);
                }
            }
        }
    }

    uses
}
