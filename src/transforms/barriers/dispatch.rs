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
use crate::transforms::barriers::{InternalError, TransformContext, FINISHED};
use smallvec::SmallVec;

/// What [`synthesize`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatcher {
    /// Every call to a continuation, the entry continuation first.
    pub calls: Vec<Inst>,
    /// The number of cases in the dispatcher's `switch`.
    pub cases: usize,
}

/// Builds the body of `wrapper`, a loop that runs one continuation per
/// iteration until every work-item in the workgroup is done.
///
/// ```none
/// entry:          call the entry continuation, then barrier
/// header:         br switch
/// switch:         switch on %next, one case per continuation in `resumes`
/// case{i}:        %next = call resumes[i]
/// default:        nothing to do, this work-item is done
/// switch.end:     count the work-item if it just finished
/// do.atomic.inc:  atomic.iadd counter, 1
/// atomic.join:    barrier, exit once the counter equals the group size
/// backedge:       barrier, br header
/// exit:           ret
/// ```
///
/// Every work-item executes the same sequence of barriers, regardless of
/// which continuations it runs.
pub fn synthesize(
    ctx: &mut TransformContext,
    module: &mut Module,
    wrapper: Func,
    entry: Func,
    resumes: &[(u32, Func)],
) -> Result<Dispatcher, InternalError> {
    let fake = DebugInfo::fake;
    let sig = module.function(wrapper).signature().clone();
    let mut def = FunctionDefinition::default();
    let mut cursor = FuncCursor::over(&mut def);

    let entry_bb = cursor.create_block("entry");
    let header = cursor.create_block("header");
    let switch = cursor.create_block("switch");
    let cases: SmallVec<[Block; 8]> = (0..resumes.len())
        .map(|i| cursor.create_block(&format!("case{i}")))
        .collect();
    let default = cursor.create_block("default");
    let switch_end = cursor.create_block("switch.end");
    let atomic_inc = cursor.create_block("do.atomic.inc");
    let atomic_join = cursor.create_block("atomic.join");
    let backedge = cursor.create_block("backedge");
    let exit = cursor.create_block("exit");

    let param_names: Vec<Option<String>> = module
        .function(entry)
        .definition()
        .and_then(|def| def.entry_block().map(|bb| (def, bb)))
        .map(|(def, bb)| {
            def.dfg
                .block_params(bb)
                .iter()
                .map(|p| def.dfg.value_name(*p).map(str::to_owned))
                .collect()
        })
        .unwrap_or_default();

    let mut args: SmallVec<[Value; 8]> = SmallVec::new();

    for (i, &ty) in sig.params().iter().enumerate() {
        let param = cursor.dfg_mut().append_block_param(entry_bb, ty, fake());

        if let Some(Some(name)) = param_names.get(i) {
            cursor.dfg_mut().set_value_name(param, name);
        }

        args.push(param);
    }

    // entry
    cursor.goto_after(entry_bb);

    let done_slot = cursor.insert().alloca(Type::bool(), fake());
    let next_slot = cursor.insert().alloca(Type::i32(), fake());

    cursor.dfg_mut().set_value_name(done_slot, "done.addr");
    cursor.dfg_mut().set_value_name(next_slot, "next.addr");

    let (counter, slm_size) = ctx.flavor.allocate_counter_slot(module, &mut cursor, ctx.slm_size);
    let zero = cursor.insert().iconst(Type::i32(), 0, fake());

    ctx.slm_size = slm_size;
    cursor.dfg_mut().set_value_name(counter, "thread.done.cnt.addr");
    cursor.insert().store(zero, counter, fake());

    let group_size = ctx.flavor.group_size(module, &mut cursor, wrapper)?;
    let mut calls = Vec::with_capacity(resumes.len() + 1);

    let first = call(&mut cursor, module, entry, &args);

    calls.push(first.0);
    cursor.insert().store(first.1, next_slot, fake());
    ctx.fence.insert_fence(&mut cursor);
    cursor.insert().barrier(fake());

    let no = cursor.insert().bconst(false, fake());

    cursor.insert().store(no, done_slot, fake());
    cursor.insert().br(BlockWithParams::to(header), fake());

    // header
    cursor.goto_after(header);
    cursor.insert().br(BlockWithParams::to(switch), fake());

    // switch
    cursor.goto_after(switch);

    let next = cursor.insert().load(Type::i32(), next_slot, fake());
    let table: SmallVec<[(i64, Block); 8]> = resumes
        .iter()
        .zip(cases.iter())
        .map(|((ordinal, _), &case)| (*ordinal as i64, case))
        .collect();

    cursor.dfg_mut().set_value_name(next, "next");
    cursor.insert().switch(next, default, &table, fake());

    // case{i}
    for (&(_, cont), &case) in resumes.iter().zip(cases.iter()) {
        cursor.goto_after(case);

        let (inst, result) = call(&mut cursor, module, cont, &args);

        calls.push(inst);
        cursor.insert().store(result, next_slot, fake());
        cursor.insert().br(BlockWithParams::to(switch_end), fake());
    }

    // default
    cursor.goto_after(default);
    cursor.insert().br(BlockWithParams::to(switch_end), fake());

    // switch.end
    cursor.goto_after(switch_end);

    let next = cursor.insert().load(Type::i32(), next_slot, fake());
    let done = cursor.insert().load(Type::bool(), done_slot, fake());
    let finished = cursor.insert().iconst(Type::i32(), FINISHED as u64, fake());
    let is_finished = cursor.insert().icmp_eq(next, finished, fake());
    let yes = cursor.insert().bconst(true, fake());
    let not_done = cursor.insert().xor(done, yes, fake());
    let newly_done = cursor.insert().and(is_finished, not_done, fake());

    cursor.insert().condbr(
        newly_done,
        BlockWithParams::to(atomic_inc),
        BlockWithParams::to(atomic_join),
        fake(),
    );

    // do.atomic.inc
    cursor.goto_after(atomic_inc);

    let one = cursor.insert().iconst(Type::i32(), 1, fake());

    cursor.insert().atomic_iadd(counter, one, fake());
    cursor.insert().br(BlockWithParams::to(atomic_join), fake());

    // atomic.join
    cursor.goto_after(atomic_join);

    let next = cursor.insert().load(Type::i32(), next_slot, fake());
    let finished = cursor.insert().iconst(Type::i32(), FINISHED as u64, fake());
    let is_finished = cursor.insert().icmp_eq(next, finished, fake());

    cursor.insert().store(is_finished, done_slot, fake());
    ctx.fence.insert_fence(&mut cursor);
    cursor.insert().barrier(fake());

    let count = cursor.insert().load(Type::i32(), counter, fake());
    let all_done = cursor.insert().icmp_eq(count, group_size, fake());

    cursor.dfg_mut().set_value_name(count, "thread.done.cnt");
    cursor.insert().condbr(
        all_done,
        BlockWithParams::to(exit),
        BlockWithParams::to(backedge),
        fake(),
    );

    // backedge
    cursor.goto_after(backedge);
    cursor.insert().barrier(fake());
    cursor.insert().br(BlockWithParams::to(header), fake());

    // exit
    cursor.goto_after(exit);

    match sig.return_ty() {
        Some(ty) => {
            let undef = cursor.insert().undef(ty, fake());

            cursor.insert().ret_val(undef, fake());
        }
        None => {
            cursor.insert().ret_void(fake());
        }
    }

    module.set_function_definition(wrapper, def);

    log::debug!(
        target: "divergent-barrier",
        "built dispatcher '@{}' with {} cases",
        module.function(wrapper).name(),
        resumes.len()
    );

    Ok(Dispatcher {
        calls,
        cases: resumes.len(),
    })
}

fn call(cursor: &mut FuncCursor<'_>, module: &Module, callee: Func, args: &[Value]) -> (Inst, Value) {
    let sig = cursor.dfg_mut().insert_sig(module.function(callee).signature());
    let inst = cursor.insert().call(callee, sig, args, DebugInfo::fake());

    match cursor.dfg().inst_to_result(inst) {
        Some(result) => (inst, result),
        None => {
            // continuations always return the next ordinal
            let finished = cursor
                .insert()
                .iconst(Type::i32(), FINISHED as u64, DebugInfo::fake());

            (inst, finished)
        }
    }
}
