//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! Splits a kernel into the continuations that run between its barriers.

use crate::ir::*;
use crate::transforms::barriers::InternalError;
use crate::transforms::common::{clone_body, remove_unreachable_blocks, replace_uses, CloneMap};
use log::trace;

/// Value returned by a continuation when the work-item has finished the kernel.
pub const FINISHED: i32 = -1;

/// Isolates `barrier` so that it is the first instruction in its own block
/// (named `Cont`), followed only by a branch to a new block (`AfterCont`)
/// holding whatever came after the barrier.
///
/// ```none
/// entry:                       entry:
///   %0 = iadd i32 %x, %x         %0 = iadd i32 %x, %x
///   barrier                      br Cont
///   ret i32 %0         =>      Cont:
///                                barrier
///                                br AfterCont
///                              AfterCont:
///                                ret i32 %0
/// ```
///
/// Returns the `Cont` block.
pub fn split_around(def: &mut FunctionDefinition, barrier: Inst) -> Block {
    let block = def.layout.inst_block(barrier);
    let debug = def.dfg.inst_debug(barrier);
    let next = def.layout.inst_next(barrier);
    let cont = def.dfg.create_block("Cont");
    let after = def.dfg.create_block("AfterCont");

    def.layout.insert_block_after(cont, block);
    def.layout.split_block(cont, barrier);
    def.layout.insert_block_after(after, cont);

    if let Some(next) = next {
        def.layout.split_block(after, next);
    }

    AppendBuilder::new(def, block).br(BlockWithParams::to(cont), debug);
    AppendBuilder::new(def, cont).br(BlockWithParams::to(after), debug);

    cont
}

/// Replaces every `ret` in the function with `ret i32 -1`, the "this work-item is
/// done" signal for the dispatcher.
///
/// This leaves the function's signature alone, that only changes once the
/// body has been copied into a continuation.
pub fn rewrite_returns(def: &mut FunctionDefinition) -> usize {
    let returns: Vec<Inst> = def
        .layout
        .blocks()
        .filter_map(|bb| def.layout.block_last_inst(bb))
        .filter(|inst| matches!(def.dfg.inst_data(*inst), InstData::Ret(_)))
        .collect();

    for &ret in returns.iter() {
        let debug = def.dfg.inst_debug(ret);
        let mut cursor = FuncCursor::over(def);

        cursor.goto_inst(ret);
        cursor.remove_inst();

        let finished = cursor
            .insert()
            .iconst(Type::i32(), FINISHED as u64, debug);

        cursor.insert().ret_val(finished, debug);
    }

    returns.len()
}

/// Turns every barrier into a return of its ordinal, returning the block that
/// each barrier would have continued into (in the same order as `barriers`).
///
/// Every barrier must have already been isolated with [`split_around`].
pub fn partition(func: &mut Function, barriers: &[Inst]) -> Result<Vec<Block>, InternalError> {
    let name = func.name().to_owned();
    let def = match func.definition_mut() {
        Some(def) => def,
        None => return Ok(Vec::new()),
    };

    let mut resumes = Vec::with_capacity(barriers.len());

    for (ordinal, &barrier) in barriers.iter().enumerate() {
        let block = def.layout.inst_block(barrier);
        let term = def.layout.block_last_inst(block);
        let next = term
            .and_then(|term| def.dfg.branch_info(term))
            .and_then(|targets| match targets {
                [only] if only.args().is_empty() => Some(only.block()),
                _ => None,
            });

        let (term, next) = match (term, next) {
            (Some(term), Some(next)) => (term, next),
            _ => {
                return Err(InternalError::MalformedBarrier {
                    func: name,
                    block: def.dfg.block_name(block).to_owned(),
                })
            }
        };

        let debug = def.dfg.inst_debug(barrier);

        def.layout.remove_inst(term);
        def.layout.remove_inst(barrier);

        let id = AppendBuilder::new(def, block).iconst(Type::i32(), ordinal as u64, debug);

        AppendBuilder::new(def, block).ret_val(id, debug);

        trace!(target: "divergent-barrier", "barrier {ordinal} in '@{name}' resumes at '{}'", def.dfg.block_name(next));

        resumes.push(next);
    }

    Ok(resumes)
}

/// Declares an empty continuation of `kernel` named `name` (or something
/// close to it, if `name` is taken).
///
/// A continuation takes the same parameters as the kernel and has the same
/// linkage, but it returns the `i32` that tells the dispatcher what to run next.
pub fn declare_continuation(module: &mut Module, kernel: Func, name: &str) -> Func {
    let (sig, linkage) = {
        let f = module.function(kernel);
        let sig = SigBuilder::from_sig(f.signature())
            .ret(Some(Type::i32()))
            .abi(CallConv::Device)
            .build();

        (sig, f.linkage())
    };

    let name = module.unique_name(name);
    let func = module.declare_function(&name, sig);

    module.function_mut(func).set_linkage(linkage);

    func
}

/// Fills `cont` with a copy of `kernel`'s body that starts at `entry_block`.
///
/// Anything in the kernel that can't be reached from `entry_block` is dropped, and
/// any use of the kernel's parameters is rewritten to use `cont`'s parameters.
pub fn fill_continuation(module: &mut Module, kernel: Func, cont: Func, entry_block: Block) {
    let mut body = FunctionDefinition::default();

    if let Some(src) = module.function(kernel).definition() {
        debug_assert!(
            src.layout.is_block_inserted(entry_block),
            "continuation entry must be a block of the kernel"
        );

        let mut map = CloneMap::new();

        clone_body(src, &mut body, &mut map, None);

        let old_entry = src.entry_block();
        let new_entry = map.block(entry_block);

        if let (Some(old_entry), Some(new_entry)) = (old_entry, new_entry) {
            if map.block(old_entry) != Some(new_entry) {
                body.layout.move_block_to_front(new_entry);

                for &param in src.dfg.block_params(old_entry) {
                    let fresh =
                        body.dfg
                            .append_block_param(new_entry, src.dfg.ty(param), src.dfg.value_debug(param));

                    if let Some(name) = src.dfg.value_name(param) {
                        body.dfg.set_value_name(fresh, name);
                    }

                    replace_uses(&mut body, map.value(param), fresh);
                }
            }
        }

        remove_unreachable_blocks(&mut body);
    }

    module.set_function_definition(cont, body);
}

/// Creates a continuation of `kernel` that starts at `entry_block`. This is
/// [`declare_continuation`] followed by [`fill_continuation`].
pub fn create_continuation(module: &mut Module, kernel: Func, entry_block: Block, name: &str) -> Func {
    let cont = declare_continuation(module, kernel, name);

    fill_continuation(module, kernel, cont, entry_block);

    cont
}
