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

/// Maps the entities of a body being cloned onto the entities created for
/// them in the destination function.
///
/// Values can be mapped ahead of time with [`Self::map_value`]. A block
/// parameter that is already mapped when the body is cloned is not recreated,
/// every use of it refers to the mapped value instead. This is how an inliner
/// replaces a callee's parameters with the arguments at the call site.
#[derive(Debug, Clone, Default)]
pub struct CloneMap {
    values: GaHashMap<Value, Value>,
    blocks: GaHashMap<Block, Block>,
    insts: GaHashMap<Inst, Inst>,
}

impl CloneMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `from` (in the source body) onto `to` (in the destination).
    pub fn map_value(&mut self, from: Value, to: Value) {
        self.values.insert(from, to);
    }

    /// Gets the clone of `value`. Values that were never mapped are returned
    /// unchanged.
    pub fn value(&self, value: Value) -> Value {
        self.values.get(&value).copied().unwrap_or(value)
    }

    /// Gets the clone of `block`, if it has been cloned.
    pub fn block(&self, block: Block) -> Option<Block> {
        self.blocks.get(&block).copied()
    }

    /// Gets the clone of `inst`, if it has been cloned.
    pub fn inst(&self, inst: Inst) -> Option<Inst> {
        self.insts.get(&inst).copied()
    }
}

/// Clones every block of `src` into `dest`, returning the new blocks in the
/// same order as the source layout.
///
/// If `after` is `Some`, the new blocks are inserted (in order) directly after
/// it. Otherwise they're appended to the end of `dest`. Names and debug info are
/// kept, signatures used by calls are imported into `dest`.
pub fn clone_body(
    src: &FunctionDefinition,
    dest: &mut FunctionDefinition,
    map: &mut CloneMap,
    after: Option<Block>,
) -> SmallVec<[Block; 8]> {
    let mut created = SmallVec::new();
    let mut prev = after;

    for block in src.layout.blocks() {
        let new = dest.dfg.create_block(src.dfg.block_name(block));

        match prev {
            Some(prev) => dest.layout.insert_block_after(new, prev),
            None => dest.layout.append_block(new),
        }

        for &param in src.dfg.block_params(block) {
            if map.values.contains_key(&param) {
                continue;
            }

            let cloned = dest
                .dfg
                .append_block_param(new, src.dfg.ty(param), src.dfg.value_debug(param));

            if let Some(name) = src.dfg.value_name(param) {
                dest.dfg.set_value_name(cloned, name);
            }

            map.values.insert(param, cloned);
        }

        map.blocks.insert(block, new);
        created.push(new);

        if after.is_some() {
            prev = Some(new);
        }
    }

    // operands can refer to values defined later in the layout (e.g. loops),
    // so they're only remapped once every result exists
    let mut cloned_insts: SmallVec<[Inst; 32]> = SmallVec::new();

    for block in src.layout.blocks() {
        let new_block = map.blocks[&block];

        for inst in src.layout.insts_in_block(block) {
            let mut data = src.dfg.inst_data(inst).clone();

            data.map_targets(|bb| map.blocks.get(&bb).copied().unwrap_or(bb));
            data.map_sig(|sig| dest.dfg.insert_sig(src.dfg.signature(sig)));

            let (new, result) = dest.dfg.create_inst(data, src.dfg.inst_debug(inst));

            dest.layout.append_inst(new, new_block);

            if let (Some(old), Some(result)) = (src.dfg.inst_to_result(inst), result) {
                if let Some(name) = src.dfg.value_name(old) {
                    dest.dfg.set_value_name(result, name);
                }

                map.values.insert(old, result);
            }

            map.insts.insert(inst, new);
            cloned_insts.push(new);
        }
    }

    for inst in cloned_insts {
        dest.dfg.map_operands(inst, |v| map.value(v));
    }

    created
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::stringify_module;

    #[test]
    fn clone_loop_into_new_function() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let sig = SigBuilder::new().param(Type::i32()).build();
        let mut b = module.define_function("loop", sig.clone());

        // fn void @loop(i32) {
        // entry(i32 %n):
        //   br header(i32 %n)
        // header(i32 %i):
        //   %next = iadd i32 %i, %n
        //   br header(i32 %next)
        // }
        let entry = b.create_block("entry");
        let header = b.create_block("header");
        let params = b.append_entry_params(entry, DebugInfo::fake());
        let i = b.append_block_param(header, Type::i32(), DebugInfo::fake());

        b.set_value_name(params[0], "n");
        b.set_value_name(i, "i");
        b.switch_to(entry);
        b.append()
            .br(BlockWithParams::new(header, &[params[0]]), DebugInfo::fake());

        b.switch_to(header);
        let next = b.append().iadd(i, params[0], DebugInfo::fake());
        b.set_value_name(next, "next");
        b.append()
            .br(BlockWithParams::new(header, &[next]), DebugInfo::fake());

        let original = b.define();
        let copy = module.declare_function("copy", sig);
        let mut def = FunctionDefinition::default();
        let mut map = CloneMap::new();

        let blocks = clone_body(
            module.function(original).definition().unwrap(),
            &mut def,
            &mut map,
            None,
        );

        assert_eq!(blocks.len(), 2);
        assert_eq!(map.block(header), Some(blocks[1]));

        let mapped = map.value(next);

        assert_eq!(def.dfg.value_name(mapped), Some("next"));

        match def.dfg.value_def(mapped) {
            ValueDef::Inst(inst) => assert_eq!(def.layout.inst_block(inst), blocks[1]),
            ValueDef::Param(..) => panic!("'next' should be an instruction result"),
        }

        module.set_function_definition(copy, def);

        let text = stringify_module(&module);
        let (first, second) = text.split_at(text.find("fn void @copy").unwrap());

        assert_eq!(first.replace("@loop", "@copy"), format!("{second}\n"));
    }

    #[test]
    fn premapped_params_are_not_cloned() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let sig = SigBuilder::new().param(Type::i32()).build();
        let mut b = module.define_function("f", sig);

        let entry = b.create_block("entry");
        let params = b.append_entry_params(entry, DebugInfo::fake());

        b.switch_to(entry);
        b.append().iadd(params[0], params[0], DebugInfo::fake());
        b.append().ret_void(DebugInfo::fake());

        let f = b.define();
        let src = module.function(f).definition().unwrap().clone();
        let mut dest = FunctionDefinition::default();
        let host = dest.dfg.create_block("host");
        dest.layout.append_block(host);
        let replacement = dest.dfg.append_block_param(host, Type::i32(), DebugInfo::fake());
        let mut map = CloneMap::new();

        map.map_value(params[0], replacement);

        let blocks = clone_body(&src, &mut dest, &mut map, Some(host));
        let add = dest.layout.block_first_inst(blocks[0]).unwrap();

        assert!(dest.dfg.block_params(blocks[0]).is_empty());
        assert_eq!(dest.dfg.inst_data(add).operands(), &[replacement, replacement]);
        assert_eq!(dest.layout.block_next(host), Some(blocks[0]));
    }
}
