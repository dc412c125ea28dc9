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
use crate::transforms::common::{clone_body, replace_uses, CloneMap};
use smallvec::SmallVec;
use thiserror::Error;

/// Reasons that [`inline_call`] can refuse to inline a call site.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InlineError {
    /// The instruction given isn't a `call` inside of the caller's layout.
    #[error("instruction is not a call in '@{0}'")]
    NotACall(String),
    /// The callee has no body to inline.
    #[error("'@{0}' is a declaration and has no body to inline")]
    Declaration(String),
    /// The callee calls itself, inlining would never terminate.
    #[error("'@{0}' is recursive")]
    Recursive(String),
    /// The call passes a different number of arguments than the callee takes.
    #[error("call to '@{callee}' passes {got} arguments, expected {expected}")]
    ArgumentCount {
        /// The callee's name.
        callee: String,
        /// How many parameters the callee has.
        expected: usize,
        /// How many arguments the call passes.
        got: usize,
    },
}

/// Inlines a single direct call inside of `caller`.
///
/// The block containing the call is split after the call, the callee's body is
/// cloned in between with its parameters replaced by the call's arguments,
/// and every `ret` in the clone becomes a branch to the second half of the
/// split. If the call has a result, that half gets a block parameter that
/// replaces every use of the result.
///
/// ```none
/// entry:                          entry:
///   %0 = call i32 @f(i32 %x)        br f.entry
///   ret i32 %0            =>      f.entry:
///                                   br entry.cont(i32 %x)
///                                 entry.cont(i32 %0):
///                                   ret i32 %0
/// ```
pub fn inline_call(module: &mut Module, caller: Func, call: Inst) -> Result<(), InlineError> {
    let caller_name = module.function(caller).name().to_owned();
    let (callee, args) = {
        let data = module
            .function(caller)
            .definition()
            .filter(|def| def.layout.is_inst_inserted(call))
            .map(|def| def.dfg.inst_data(call));

        match data {
            Some(InstData::Call(data)) => (data.callee(), SmallVec::<[Value; 4]>::from_slice(data.args())),
            _ => return Err(InlineError::NotACall(caller_name)),
        }
    };

    let callee_fn = module.function(callee);
    let callee_name = callee_fn.name().to_owned();
    let expected = callee_fn.signature().params().len();

    let body = match callee_fn.definition() {
        Some(def) => def.clone(),
        None => return Err(InlineError::Declaration(callee_name)),
    };

    if callee == caller || calls(&body, callee) {
        return Err(InlineError::Recursive(callee_name));
    }

    let entry = match body.entry_block() {
        Some(bb) => bb,
        None => return Err(InlineError::Declaration(callee_name)),
    };

    let params = body.dfg.block_params(entry);

    if params.len() != args.len() || expected != args.len() {
        return Err(InlineError::ArgumentCount {
            callee: callee_name,
            expected,
            got: args.len(),
        });
    }

    let mut map = CloneMap::new();

    for (&param, &arg) in params.iter().zip(args.iter()) {
        map.map_value(param, arg);
    }

    let def = match module.function_mut(caller).definition_mut() {
        Some(def) => def,
        None => return Err(InlineError::NotACall(caller_name)),
    };

    let block = def.layout.inst_block(call);
    let cont_name = format!("{}.cont", def.dfg.block_name(block));
    let cont = def.dfg.create_block(&cont_name);

    def.layout.insert_block_after(cont, block);

    if let Some(after) = def.layout.inst_next(call) {
        def.layout.split_block(cont, after);
    }

    if let Some(result) = def.dfg.inst_to_result(call) {
        let ty = def.dfg.ty(result);
        let param = def.dfg.append_block_param(cont, ty, def.dfg.inst_debug(call));

        if let Some(name) = def.dfg.value_name(result).map(str::to_owned) {
            def.dfg.set_value_name(param, &name);
        }

        replace_uses(def, result, param);
    }

    let debug = def.dfg.inst_debug(call);

    def.layout.remove_inst(call);

    let blocks = clone_body(&body, def, &mut map, Some(block));

    for &bb in blocks.iter() {
        let name = format!("{callee_name}.{}", def.dfg.block_name(bb));

        def.dfg.set_block_name(bb, &name);
    }

    if let Some(&cloned_entry) = blocks.first() {
        AppendBuilder::new(def, block).br(BlockWithParams::to(cloned_entry), debug);
    }

    for &bb in blocks.iter() {
        let ret = def
            .layout
            .block_last_inst(bb)
            .and_then(|inst| match def.dfg.inst_data(inst) {
                InstData::Ret(ret) => Some((inst, ret.value())),
                _ => None,
            });

        if let Some((ret, value)) = ret {
            let ret_debug = def.dfg.inst_debug(ret);
            let args: SmallVec<[Value; 1]> = value.into_iter().collect();

            def.layout.remove_inst(ret);
            AppendBuilder::new(def, bb).br(BlockWithParams::new(cont, &args), ret_debug);
        }
    }

    log::debug!(
        target: "inline",
        "inlined '@{callee_name}' into '@{caller_name}' ({} blocks)",
        blocks.len()
    );

    Ok(())
}

fn calls(def: &FunctionDefinition, func: Func) -> bool {
    def.layout.blocks().any(|bb| {
        def.layout
            .insts_in_block(bb)
            .any(|inst| matches!(def.dfg.inst_data(inst), InstData::Call(c) if c.callee() == func))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::stringify_module;
    use crate::transforms::verify_module;

    fn callee(module: &mut Module) -> Func {
        let sig = SigBuilder::new()
            .param(Type::bool())
            .param(Type::i32())
            .ret(Some(Type::i32()))
            .build();
        let mut b = module.define_function("pick", sig);

        // fn i32 @pick(bool, i32) {
        // entry(bool %0, i32 %1):
        //   condbr bool %0, yes, no
        // yes:
        //   ret i32 %1
        // no:
        //   %2 = iconst i32 0
        //   ret i32 %2
        // }
        let entry = b.create_block("entry");
        let yes = b.create_block("yes");
        let no = b.create_block("no");
        let params = b.append_entry_params(entry, DebugInfo::fake());

        b.switch_to(entry);
        b.append().condbr(
            params[0],
            BlockWithParams::to(yes),
            BlockWithParams::to(no),
            DebugInfo::fake(),
        );
        b.switch_to(yes);
        b.append().ret_val(params[1], DebugInfo::fake());
        b.switch_to(no);
        let zero = b.append().iconst(Type::i32(), 0, DebugInfo::fake());
        b.append().ret_val(zero, DebugInfo::fake());

        b.define()
    }

    #[test]
    fn inline_with_multiple_returns() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let pick = callee(&mut module);
        let sig = SigBuilder::new()
            .param(Type::bool())
            .ret(Some(Type::i32()))
            .build();
        let mut b = module.define_function("main", sig);

        let entry = b.create_block("entry");
        let params = b.append_entry_params(entry, DebugInfo::fake());
        let callee_sig = b.import_function(pick);

        b.switch_to(entry);
        let five = b.append().iconst(Type::i32(), 5, DebugInfo::fake());
        let call = b
            .append()
            .call(pick, callee_sig, &[params[0], five], DebugInfo::fake());
        let result = b.inst_to_result(call).unwrap();
        let doubled = b.append().iadd(result, result, DebugInfo::fake());
        b.append().ret_val(doubled, DebugInfo::fake());

        let main = b.define();

        inline_call(&mut module, main, call).unwrap();

        assert_eq!(verify_module(&module), Ok(()));

        let text = stringify_module(&module);
        let main_text = &text[text.find("fn i32 @main").unwrap()..];

        assert_eq!(
            main_text,
            "\
fn i32 @main(bool) {
entry(bool %0):
  %1 = iconst i32 5
  br pick.entry
pick.entry:
  condbr bool %0, pick.yes, pick.no
pick.yes:
  br entry.cont(i32 %1)
pick.no:
  %2 = iconst i32 0
  br entry.cont(i32 %2)
entry.cont(i32 %3):
  %4 = iadd i32 %3, %3
  ret i32 %4
}
"
        );
    }

    #[test]
    fn refuses_bad_call_sites() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let decl = module.declare_function("external", SigBuilder::new().build());
        let sig = SigBuilder::new().build();
        let rec = module.declare_function("rec", sig);
        let mut b = module.define_existing_function(rec);

        let entry = b.create_block("entry");
        let decl_sig = b.import_function(decl);
        let rec_sig = b.import_function(rec);

        b.switch_to(entry);
        let to_decl = b.append().call(decl, decl_sig, &[], DebugInfo::fake());
        let to_self = b.append().call(rec, rec_sig, &[], DebugInfo::fake());
        let ret = b.append().ret_void(DebugInfo::fake());
        b.define();

        assert_eq!(
            inline_call(&mut module, rec, to_decl),
            Err(InlineError::Declaration("external".to_owned()))
        );
        assert_eq!(
            inline_call(&mut module, rec, to_self),
            Err(InlineError::Recursive("rec".to_owned()))
        );
        assert_eq!(
            inline_call(&mut module, rec, ret),
            Err(InlineError::NotACall("rec".to_owned()))
        );
    }
}
