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
use crate::utility::GaHashMap;
use smallvec::SmallVec;

/// Every instruction that uses a value, in layout order.
pub type UseMap = GaHashMap<Value, SmallVec<[Inst; 4]>>;

/// Builds a def-use map for every value used by an instruction in the layout.
///
/// An instruction that uses a value more than once is only listed once.
pub fn compute_uses(def: &FunctionDefinition) -> UseMap {
    let mut uses = UseMap::default();

    for block in def.layout.blocks() {
        for inst in def.layout.insts_in_block(block) {
            for &operand in def.dfg.inst_data(inst).operands() {
                let users = uses.entry(operand).or_default();

                if !users.contains(&inst) {
                    users.push(inst);
                }
            }
        }
    }

    uses
}

/// Replaces every use of `old` in the function with `new`, including uses as
/// branch arguments. Returns the number of instructions that were modified.
pub fn replace_uses(def: &mut FunctionDefinition, old: Value, new: Value) -> usize {
    let users: SmallVec<[Inst; 16]> = def
        .layout
        .blocks()
        .flat_map(|bb| def.layout.insts_in_block(bb))
        .filter(|inst| def.dfg.inst_data(*inst).operands().contains(&old))
        .collect();

    for inst in users.iter().copied() {
        def.dfg.replace_uses_in(inst, old, new);
    }

    users.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_and_replacement() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let sig = SigBuilder::new().param(Type::i32()).param(Type::i32()).build();
        let mut b = module.define_function("f", sig);

        // fn void @f(i32, i32) {
        // entry(i32 %0, i32 %1):
        //   %2 = iadd i32 %0, %0
        //   %3 = imul i32 %2, %0
        //   br exit(i32 %0)
        // exit(i32 %4):
        //   ret void
        // }
        let entry = b.create_block("entry");
        let exit = b.create_block("exit");
        let params = b.append_entry_params(entry, DebugInfo::fake());
        b.append_block_param(exit, Type::i32(), DebugInfo::fake());

        b.switch_to(entry);
        let sum = b.append().iadd(params[0], params[0], DebugInfo::fake());
        b.append().imul(sum, params[0], DebugInfo::fake());
        b.append()
            .br(BlockWithParams::new(exit, &[params[0]]), DebugInfo::fake());
        b.switch_to(exit);
        b.append().ret_void(DebugInfo::fake());

        let f = b.define();
        let def = module.function_mut(f).definition_mut().unwrap();
        let uses = compute_uses(def);

        assert_eq!(uses[&params[0]].len(), 3);
        assert_eq!(uses[&sum].len(), 1);
        assert!(!uses.contains_key(&params[1]));

        assert_eq!(replace_uses(def, params[0], params[1]), 3);

        let uses = compute_uses(def);

        assert!(!uses.contains_key(&params[0]));
        assert_eq!(uses[&params[1]].len(), 3);
    }
}
