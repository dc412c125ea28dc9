//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::analysis::{Dependence, WorkItemAnalysis};
use crate::ir::*;
use crate::transforms::barriers::{DivergentBarrierOptions, SuspendCrossingInfo};
use crate::utility::{GaHashMap, GaHashSet};
use log::trace;
use smallvec::SmallVec;

/// A single use of a value on the other side of a barrier from its definition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Spill {
    /// The value that needs to survive the barrier.
    pub def: Value,
    /// The instruction using it.
    pub user: Inst,
    /// The offset of the value's slot in the spill area. Every spill of
    /// the same value shares one offset.
    pub offset: u64,
    /// How uniform the value is across work-items.
    pub dependence: Dependence,
}

/// Finds every (definition, user) pair where the use is separated from the
/// definition by a barrier, and gives each spilled definition a slot.
///
/// Parameters of the entry block are never spilled, every continuation
/// receives them directly.
pub fn compute_spills(
    def: &FunctionDefinition,
    crossing: &SuspendCrossingInfo,
    oracle: &WorkItemAnalysis,
) -> Vec<Spill> {
    let entry = def.entry_block();
    let mut spills = Vec::new();
    let mut offsets: GaHashMap<Value, u64> = GaHashMap::default();
    let mut next = 0u64;

    for block in def.layout.blocks() {
        for inst in def.layout.insts_in_block(block) {
            let mut seen: SmallVec<[Value; 4]> = SmallVec::new();

            for &operand in def.dfg.inst_data(inst).operands() {
                if seen.contains(&operand) {
                    continue;
                }

                seen.push(operand);

                let def_block = match def.dfg.value_def(operand) {
                    ValueDef::Inst(i) if def.layout.is_inst_inserted(i) => def.layout.inst_block(i),
                    ValueDef::Param(b, _) if Some(b) != entry => b,
                    _ => continue,
                };

                if !crossing.is_definition_across_suspend(def_block, block) {
                    continue;
                }

                let offset = *offsets.entry(operand).or_insert_with(|| {
                    let size = def.dfg.ty(operand).size_bytes().max(1);
                    let offset = (next + size - 1) / size * size;

                    next = offset + size;

                    offset
                });

                spills.push(Spill {
                    def: operand,
                    user: inst,
                    offset,
                    dependence: oracle.dependence(operand),
                });
            }
        }
    }

    spills
}

/// Inserts the `spill` and `fill` markers for `spills`, returning the number of fills.
///
/// Each spilled value gets a single `spill` directly after its definition. Each block
/// with a crossing use gets a single `fill` at its start, and the crossing uses in
/// that block are rewritten to use the fill.
pub fn insert_spills(def: &mut FunctionDefinition, spills: &[Spill]) -> usize {
    let mut spilled = GaHashSet::default();
    let mut fills: GaHashMap<(Value, Block), Value> = GaHashMap::default();

    for spill in spills {
        let debug = def.dfg.value_debug(spill.def);

        if spilled.insert(spill.def) {
            let mut cursor = FuncCursor::over(def);

            match cursor.dfg().value_def(spill.def) {
                ValueDef::Inst(inst) => match cursor.layout().inst_next(inst) {
                    Some(next) => cursor.goto_inst(next),
                    None => cursor.goto_after(cursor.layout().inst_block(inst)),
                },
                ValueDef::Param(block, _) => cursor.goto_first_insertion_point(block),
            }

            cursor.insert().spill(spill.def, spill.offset, debug);
        }

        let block = def.layout.inst_block(spill.user);
        let fill = match fills.get(&(spill.def, block)) {
            Some(&fill) => fill,
            None => {
                let ty = def.dfg.ty(spill.def);
                let mut cursor = FuncCursor::over(def);

                cursor.goto_first_insertion_point(block);

                let fill = cursor
                    .insert()
                    .fill(ty, spill.offset, spill.dependence.uniformity(), debug);

                if let Some(name) = def.dfg.value_name(spill.def).map(str::to_owned) {
                    def.dfg.set_value_name(fill, &name);
                }

                fills.insert((spill.def, block), fill);

                fill
            }
        };

        def.dfg.replace_uses_in(spill.user, spill.def, fill);
    }

    trace!(target: "spills", "inserted {} spills and {} fills", spilled.len(), fills.len());

    fills.len()
}

/// A `load` that replaced a `fill`, along with how uniform the reloaded value is.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Reload {
    /// The load.
    pub value: Value,
    /// The uniformity recorded on the fill.
    pub uniformity: Option<Uniformity>,
}

/// Gives every spill offset a private `alloca` at the top of the entry block, and
/// turns every `spill` into a `store` and every `fill` into a `load` of its slot.
pub fn lower_spill_fill(def: &mut FunctionDefinition) -> Vec<Reload> {
    let entry = match def.entry_block() {
        Some(entry) => entry,
        None => return Vec::new(),
    };

    let markers: Vec<Inst> = def
        .layout
        .blocks()
        .flat_map(|bb| def.layout.insts_in_block(bb))
        .filter(|inst| matches!(def.dfg.inst_data(*inst), InstData::Spill(_) | InstData::Fill(_)))
        .collect();

    let mut slots: GaHashMap<u64, Value> = GaHashMap::default();
    let mut reloads = Vec::new();

    for marker in markers {
        let data = def.dfg.inst_data(marker).clone();
        let debug = def.dfg.inst_debug(marker);
        let (offset, ty) = match &data {
            InstData::Spill(spill) => (spill.offset(), def.dfg.ty(spill.value())),
            InstData::Fill(fill) => match def.dfg.inst_to_result(marker) {
                Some(result) => (fill.offset(), def.dfg.ty(result)),
                None => continue,
            },
            _ => continue,
        };

        let mut cursor = FuncCursor::over(def);
        let slot = match slots.get(&offset) {
            Some(&slot) => slot,
            None => {
                cursor.goto_first_insertion_point(entry);

                let slot = cursor.insert().alloca(ty, DebugInfo::fake());

                slots.insert(offset, slot);

                slot
            }
        };

        cursor.goto_inst(marker);
        cursor.remove_inst();

        match data {
            InstData::Spill(spill) => {
                cursor.insert().store(spill.value(), slot, debug);
            }
            InstData::Fill(fill) => {
                let old = cursor.dfg().inst_to_result(marker);
                let load = cursor.insert().load(ty, slot, debug);

                if let Some(old) = old {
                    if let Some(name) = cursor.dfg().value_name(old).map(str::to_owned) {
                        cursor.dfg_mut().set_value_name(load, &name);
                    }

                    cursor.replace_uses(old, load);
                }

                reloads.push(Reload {
                    value: load,
                    uniformity: fill.uniformity(),
                });
            }
            _ => {}
        }
    }

    trace!(target: "spills", "lowered spills into {} slots", slots.len());

    reloads
}

/// Makes every reload of a uniform, non-aggregate value read one lane and
/// broadcast it with `readfirstlane`. Returns the number of reloads changed.
///
/// This does nothing unless uniform reloads were asked for and the target
/// can actually broadcast.
pub fn promote_uniform_reloads(
    def: &mut FunctionDefinition,
    reloads: &[Reload],
    options: &DivergentBarrierOptions,
) -> usize {
    if !options.uniform_reload || !options.target.supports_lane_broadcast {
        return 0;
    }

    let mut promoted = 0;

    for reload in reloads {
        let tier = match reload.uniformity {
            Some(tier) if !def.dfg.ty(reload.value).is_aggregate() => tier,
            _ => continue,
        };

        let load = match def.dfg.value_to_inst(reload.value) {
            Some(load) if def.layout.is_inst_inserted(load) => load,
            _ => continue,
        };

        let users: SmallVec<[Inst; 8]> = def
            .layout
            .blocks()
            .flat_map(|bb| def.layout.insts_in_block(bb))
            .filter(|inst| def.dfg.inst_data(*inst).operands().contains(&reload.value))
            .collect();

        let debug = def.dfg.inst_debug(load);
        let mut cursor = FuncCursor::over(def);

        match cursor.layout().inst_next(load) {
            Some(next) => cursor.goto_inst(next),
            None => cursor.goto_after(cursor.layout().inst_block(load)),
        }

        let broadcast = cursor.insert().readfirstlane(reload.value, debug);

        def.dfg
            .set_value_name(broadcast, &format!("fill.uniform.{}", tier.name()));

        for user in users {
            def.dfg.replace_uses_in(user, reload.value, broadcast);
        }

        promoted += 1;
    }

    promoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::barriers::split_around;

    struct Kernel {
        module: Module,
        func: Func,
        barrier: Inst,
        uniform: Value,
        varying: Value,
    }

    // entry(i32 %x):
    //   %lid = workitem.local_id 0
    //   %u = iadd i32 %x, %x
    //   %r = iadd i32 %lid, %x
    //   barrier
    //   %s = iadd i32 %u, %r
    //   ret void
    fn kernel() -> Kernel {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let sig = SigBuilder::new()
            .param(Type::i32())
            .abi(CallConv::Kernel)
            .build();

        let mut b = module.define_function("k", sig);
        let entry = b.create_block("entry");
        let params = b.append_entry_params(entry, DebugInfo::fake());

        b.switch_to(entry);
        let lid = b.append().local_id(0, DebugInfo::fake());
        let uniform = b.append().iadd(params[0], params[0], DebugInfo::fake());
        let varying = b.append().iadd(lid, params[0], DebugInfo::fake());
        let barrier = b.append().barrier(DebugInfo::fake());
        b.append().iadd(uniform, varying, DebugInfo::fake());
        b.append().iadd(params[0], varying, DebugInfo::fake());
        b.append().ret_void(DebugInfo::fake());
        b.set_value_name(uniform, "u");

        let func = b.define();

        module.metadata_mut().set_entry(func);

        Kernel {
            module,
            func,
            barrier,
            uniform,
            varying,
        }
    }

    fn count(def: &FunctionDefinition, f: fn(&InstData) -> bool) -> usize {
        def.layout
            .blocks()
            .flat_map(|bb| def.layout.insts_in_block(bb))
            .filter(|inst| f(def.dfg.inst_data(*inst)))
            .count()
    }

    #[test]
    fn spills_round_trip_through_slots() {
        let mut k = kernel();
        let oracle = WorkItemAnalysis::compute(&k.module, k.func);
        let def = k.module.function_mut(k.func).definition_mut().unwrap();
        let cont = split_around(def, k.barrier);
        let after = def.layout.block_next(cont).unwrap();
        let crossing = SuspendCrossingInfo::compute(def, &[k.barrier]);
        let spills = compute_spills(def, &crossing, &oracle);

        // %u once, %r twice, %x never
        assert_eq!(spills.len(), 3);
        assert!(spills.iter().all(|s| s.user != k.barrier));

        let u = spills.iter().find(|s| s.def == k.uniform).unwrap();
        let r = spills.iter().find(|s| s.def == k.varying).unwrap();

        assert_eq!(u.offset, 0);
        assert_eq!(r.offset, 4);
        assert_eq!(u.dependence, Dependence::UniformGlobal);
        assert!(!r.dependence.is_uniform());

        assert_eq!(insert_spills(def, &spills), 2);
        assert_eq!(count(def, |d| matches!(d, InstData::Spill(_))), 2);
        assert_eq!(count(def, |d| matches!(d, InstData::Fill(_))), 2);

        let first = def.layout.block_first_inst(after).unwrap();

        assert!(matches!(def.dfg.inst_data(first), InstData::Fill(_)));

        let reloads = lower_spill_fill(def);
        let entry = def.entry_block().unwrap();

        assert_eq!(reloads.len(), 2);
        assert_eq!(count(def, |d| matches!(d, InstData::Alloca(_))), 2);
        assert_eq!(count(def, |d| matches!(d, InstData::Store(_))), 2);
        assert_eq!(count(def, |d| matches!(d, InstData::Load(_))), 2);
        assert_eq!(count(def, |d| matches!(d, InstData::Spill(_) | InstData::Fill(_))), 0);

        let top = def.layout.block_first_inst(entry).unwrap();

        assert!(matches!(def.dfg.inst_data(top), InstData::Alloca(_)));

        let named = reloads
            .iter()
            .find(|r| def.dfg.value_name(r.value) == Some("u"))
            .unwrap();

        assert_eq!(named.uniformity, Some(Uniformity::Global));
    }

    #[test]
    fn uniform_reloads_are_broadcast() {
        let mut k = kernel();
        let oracle = WorkItemAnalysis::compute(&k.module, k.func);
        let def = k.module.function_mut(k.func).definition_mut().unwrap();

        split_around(def, k.barrier);

        let crossing = SuspendCrossingInfo::compute(def, &[k.barrier]);
        let spills = compute_spills(def, &crossing, &oracle);

        insert_spills(def, &spills);

        let reloads = lower_spill_fill(def);
        let mut options = DivergentBarrierOptions::default();

        assert_eq!(promote_uniform_reloads(def, &reloads, &options), 0);

        options.uniform_reload = true;
        options.target.supports_lane_broadcast = false;

        assert_eq!(promote_uniform_reloads(def, &reloads, &options), 0);

        options.target.supports_lane_broadcast = true;

        assert_eq!(promote_uniform_reloads(def, &reloads, &options), 1);

        let broadcast = def
            .dfg
            .values()
            .find(|v| def.dfg.value_name(*v) == Some("fill.uniform.global"))
            .unwrap();

        let inst = def.dfg.value_to_inst(broadcast).unwrap();

        assert!(def.layout.is_inst_inserted(inst));
        assert!(matches!(def.dfg.inst_data(inst), InstData::ReadFirstLane(_)));
        assert_eq!(count(def, |d| matches!(d, InstData::ReadFirstLane(_))), 1);
    }
}
