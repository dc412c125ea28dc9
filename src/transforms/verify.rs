//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::analysis::{self, ControlFlowGraph, DominatorTree};
use crate::ir::*;
use crate::pass::*;
use crate::utility::{GaHashMap, GaHashSet};
use std::iter;
use thiserror::Error;

/// One problem found by [`verify_module`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}:{}: in '@{func}': {message}", debug.line(), debug.col())]
pub struct VerifyError {
    /// The function the problem was found in.
    pub func: String,
    /// A description of what is wrong.
    pub message: String,
    /// Where the offending IR came from, fake for synthesized code.
    pub debug: DebugInfo,
}

/// An IR validity verification pass.
///
/// This scans the entire module, and will do nothing if the module is valid. If
/// the module isn't valid, it will dump the module and abort with an error.
pub struct VerifyModulePass;

impl ModuleTransformPass for VerifyModulePass {
    fn run(&mut self, module: &mut Module, _: &ModuleAnalysisManager) -> PreservedAnalyses {
        verify_module_panic(module);

        PreservedAnalyses::all()
    }
}

/// Verifies that an entire module is valid GIR.
///
/// This checks that the SSA properties are upheld (dominance mainly), that
/// every block has exactly one terminator, that every call matches its callee,
/// and that the operands of every instruction are well-typed.
///
/// If it isn't, this function returns every problem that was found along with
/// the debug info of the IR that caused it.
pub fn verify_module(module: &Module) -> Result<(), Vec<VerifyError>> {
    let mut verifier = Verifier {
        module,
        errors: Vec::default(),
        func_name: String::default(),
        return_ty: None,
        positions: GaHashMap::default(),
        seen: GaHashSet::default(),
    };

    for func in module.functions() {
        verifier.func(func);
    }

    if verifier.errors.is_empty() {
        Ok(())
    } else {
        Err(verifier.errors)
    }
}

/// This is [`verify_module`], except that it writes out any errors
/// and then panics on failure.
pub fn verify_module_panic(module: &Module) {
    if let Err(errors) = verify_module(module) {
        println!();
        analysis::print_module(module);
        println!();

        for error in errors.iter() {
            println!("{error}");
        }

        panic!("module failed verification with {} errors", errors.len());
    }
}

macro_rules! verify_assert {
    ($self:expr, $info:expr, $cond:expr, $explanation:expr) => {
        if !($cond) {
            $self.error($info, ($explanation).to_string());
        }
    };
}

macro_rules! verify_assert_eq {
    ($self:expr, $info:expr, $lhs:expr, $rhs:expr, $explanation:expr) => {
        verify_assert!($self, $info, $lhs == $rhs, $explanation)
    };
}

macro_rules! verify_binop {
    ($self:expr, $dbg:expr, $name:expr, $data:expr, $def:expr, $check:ident) => {{
        let (lhs, rhs) = ($def.dfg.ty($data.lhs()), $def.dfg.ty($data.rhs()));

        verify_assert!(
            $self,
            $dbg,
            lhs.$check() && rhs.$check(),
            format!("`{}` operands have the wrong type", $name)
        );

        verify_assert_eq!(
            $self,
            $dbg,
            lhs,
            rhs,
            format!("`{}` operands must be the same type", $name)
        );
    }};
}

struct Verifier<'m> {
    module: &'m Module,
    func_name: String,
    return_ty: Option<Type>,
    // position of every inserted instruction inside of its block
    positions: GaHashMap<Inst, usize>,
    seen: GaHashSet<Inst>,
    errors: Vec<VerifyError>,
}

impl<'m> Verifier<'m> {
    fn error(&mut self, debug: DebugInfo, message: String) {
        self.errors.push(VerifyError {
            func: self.func_name.clone(),
            message,
            debug,
        });
    }

    fn func(&mut self, func: Func) {
        let function = self.module.function(func);

        self.func_name = function.name().to_owned();
        self.return_ty = function.return_ty();
        self.positions.clear();
        self.seen.clear();

        let def = match function.definition() {
            Some(def) => def,
            None => return,
        };

        let entry = match def.entry_block() {
            Some(bb) => bb,
            None => {
                self.error(DebugInfo::fake(), "function definition has no blocks".to_owned());

                return;
            }
        };

        let sig = function.signature();
        let bb_params = def.dfg.block_params(entry);

        verify_assert_eq!(
            self,
            DebugInfo::fake(),
            bb_params.len(),
            sig.params().len(),
            "entry block must have same number of parameters as function signature"
        );

        for (&param, &ty) in iter::zip(bb_params.iter(), sig.params().iter()) {
            verify_assert_eq!(
                self,
                def.dfg.value_debug(param),
                def.dfg.ty(param),
                ty,
                "entry block parameter does not match in type to function signature"
            );
        }

        for block in def.layout.blocks() {
            for (i, inst) in def.layout.insts_in_block(block).enumerate() {
                self.positions.insert(inst, i);
            }
        }

        let cfg = ControlFlowGraph::compute(function);
        let domtree = DominatorTree::compute(function, &cfg);

        verify_assert_eq!(
            self,
            DebugInfo::fake(),
            cfg.predecessors(entry).count(),
            0,
            "entry block must not have any predecessors"
        );

        // unreachable blocks still need terminators, but dominance
        // is meaningless inside of them
        for block in def.layout.blocks() {
            self.block(block, def, &domtree);
        }
    }

    fn block(&mut self, block: Block, def: &FunctionDefinition, domtree: &DominatorTree) {
        let last = def.layout.block_last_inst(block);

        match last {
            Some(inst) => verify_assert!(
                self,
                def.dfg.inst_debug(inst),
                def.dfg.inst_data(inst).is_terminator(),
                format!("block '{}' does not end in a terminator", def.dfg.block_name(block))
            ),
            None => self.error(
                DebugInfo::fake(),
                format!("block '{}' is empty", def.dfg.block_name(block)),
            ),
        }

        for inst in def.layout.insts_in_block(block) {
            if Some(inst) != last {
                verify_assert!(
                    self,
                    def.dfg.inst_debug(inst),
                    !def.dfg.inst_data(inst).is_terminator(),
                    "terminator in the middle of a block"
                );
            }

            if domtree.is_reachable(block) {
                self.operands(inst, block, def, domtree);
            }

            self.inst(inst, def);
        }
    }

    fn operands(
        &mut self,
        inst: Inst,
        block: Block,
        def: &FunctionDefinition,
        domtree: &DominatorTree,
    ) {
        let dbg = def.dfg.inst_debug(inst);

        // the same instruction shouldn't ever be seen twice, it should only
        // exist exactly once in a given layout
        verify_assert!(
            self,
            dbg,
            self.seen.insert(inst),
            "cannot have the same `Inst` object twice in a given layout"
        );

        for &operand in def.dfg.inst_data(inst).operands() {
            let defined_in = match def.dfg.value_def(operand) {
                ValueDef::Inst(i) => {
                    if i == inst || !def.layout.is_inst_inserted(i) {
                        self.error(
                            dbg,
                            "instruction uses a value that is not defined in the function"
                                .to_owned(),
                        );

                        continue;
                    }

                    let defined_in = def.layout.inst_block(i);

                    // same block: the definition has to come first in layout order
                    if defined_in == block {
                        verify_assert!(
                            self,
                            dbg,
                            self.positions.get(&i) < self.positions.get(&inst),
                            "definition must be before uses in the same basic block"
                        );
                    }

                    defined_in
                }
                ValueDef::Param(bb, _) => {
                    if !def.layout.is_block_inserted(bb) {
                        self.error(
                            dbg,
                            "instruction uses a parameter of a block outside of the function"
                                .to_owned(),
                        );

                        continue;
                    }

                    bb
                }
            };

            verify_assert!(
                self,
                dbg,
                domtree.dominates(block, defined_in),
                "definition's block must dominate use's block"
            );
        }
    }

    fn branch_target(&mut self, dbg: DebugInfo, target: &BlockWithParams, def: &FunctionDefinition) {
        if !def.layout.is_block_inserted(target.block()) {
            self.error(dbg, "can't branch to block outside of layout".to_owned());

            return;
        }

        let args = target.args();
        let params = def.dfg.block_params(target.block());

        verify_assert_eq!(
            self,
            dbg,
            args.len(),
            params.len(),
            format!(
                "branch to '{}' has wrong number of block arguments",
                def.dfg.block_name(target.block())
            )
        );

        for (arg, param) in args.iter().zip(params) {
            verify_assert_eq!(
                self,
                dbg,
                def.dfg.ty(*arg),
                def.dfg.ty(*param),
                "branch arg and block parameter must have the same type"
            );
        }
    }

    fn inst(&mut self, inst: Inst, def: &FunctionDefinition) {
        let dbg = def.dfg.inst_debug(inst);
        let data = def.dfg.inst_data(inst);
        let ty = |v: Value| def.dfg.ty(v);

        if let Some(targets) = data.branch_info() {
            for target in targets {
                self.branch_target(dbg, target, def);
            }
        }

        match data {
            InstData::Call(call) => self.call(dbg, call, def),
            InstData::ICmp(icmp) => {
                verify_assert!(
                    self,
                    dbg,
                    ty(icmp.lhs()).is_bool_or_int() || ty(icmp.lhs()).is_ptr(),
                    "`icmp` operands must be integers or pointers"
                );
                verify_assert_eq!(
                    self,
                    dbg,
                    ty(icmp.lhs()),
                    ty(icmp.rhs()),
                    "`icmp` operands must be the same type"
                );
            }
            InstData::Sel(sel) => {
                verify_assert!(self, dbg, ty(sel.condition()).is_bool(), "`sel` condition must be `bool`");
                verify_assert_eq!(
                    self,
                    dbg,
                    ty(sel.if_true()),
                    ty(sel.if_false()),
                    "`sel` operands must be the same type"
                );
            }
            InstData::CondBr(condbr) => verify_assert!(
                self,
                dbg,
                ty(condbr.condition()).is_bool(),
                "`condbr` condition must be `bool`"
            ),
            InstData::Switch(switch) => verify_assert!(
                self,
                dbg,
                ty(switch.scrutinee()).is_int(),
                "`switch` scrutinee must be an integer"
            ),
            InstData::Ret(ret) => {
                let returned = ret.value().map(ty);

                verify_assert_eq!(
                    self,
                    dbg,
                    returned,
                    self.return_ty,
                    "`ret` value must match the function's return type"
                );
            }
            InstData::And(a) | InstData::Or(a) | InstData::Xor(a) | InstData::IAdd(a) | InstData::IMul(a) => {
                verify_binop!(self, dbg, data.opcode_name(), a, def, is_bool_or_int)
            }
            InstData::Shl(a) | InstData::LShr(a) | InstData::ISub(a) | InstData::UDiv(a) => {
                verify_binop!(self, dbg, data.opcode_name(), a, def, is_int)
            }
            InstData::FAdd(a) | InstData::FMul(a) => {
                verify_binop!(self, dbg, data.opcode_name(), a, def, is_float)
            }
            InstData::Load(load) => {
                verify_assert!(self, dbg, ty(load.pointer()).is_ptr(), "`load` pointer must be a `ptr`")
            }
            InstData::Store(store) => {
                verify_assert!(self, dbg, ty(store.pointer()).is_ptr(), "`store` pointer must be a `ptr`")
            }
            InstData::Offset(offset) => {
                verify_assert!(self, dbg, ty(offset.base()).is_ptr(), "`offset` base must be a `ptr`");
                verify_assert!(self, dbg, ty(offset.offset()).is_int(), "`offset` amount must be an integer");
            }
            InstData::Extract(extract) => {
                let agg = ty(extract.aggregate());

                verify_assert!(self, dbg, agg.element().is_some(), "`extract` operand must be a vector or array");
                verify_assert!(
                    self,
                    dbg,
                    agg.len().map_or(false, |len| extract.index() < len),
                    "`extract` index out of range"
                );
            }
            InstData::Sext(cast) | InstData::Zext(cast) | InstData::Trunc(cast) => {
                verify_assert!(
                    self,
                    dbg,
                    ty(cast.operand()).is_int() && data.result_ty().map_or(false, Type::is_int),
                    format!("`{}` must convert between integers", data.opcode_name())
                );
            }
            InstData::Fence(fence) => {
                let flags_ok = FenceFlag::ALL.iter().all(|f| ty(fence.flag(*f)).is_bool());

                verify_assert!(self, dbg, flags_ok, "`fence` flags must be `bool`");
                verify_assert!(self, dbg, ty(fence.scope()).is_int(), "`fence` scope must be an integer");
            }
            InstData::AtomicIAdd(atomic) => {
                verify_assert!(self, dbg, ty(atomic.pointer()).is_ptr(), "`atomic.iadd` pointer must be a `ptr`");
                verify_assert!(self, dbg, ty(atomic.value()).is_int(), "`atomic.iadd` operand must be an integer");
                verify_assert_eq!(
                    self,
                    dbg,
                    data.result_ty(),
                    Some(ty(atomic.value())),
                    "`atomic.iadd` result must match its operand"
                );
            }
            InstData::LocalId(wi) | InstData::GroupId(wi) => {
                verify_assert!(self, dbg, wi.dim() < 3, "work-item dimension must be 0, 1 or 2")
            }
            InstData::ReadFirstLane(rfl) => verify_assert_eq!(
                self,
                dbg,
                data.result_ty(),
                Some(ty(rfl.operand())),
                "`readfirstlane` result must match its operand"
            ),
            _ => {}
        }
    }

    fn call(&mut self, dbg: DebugInfo, call: &CallInst, def: &FunctionDefinition) {
        if !self.module.contains_function(call.callee()) {
            self.error(dbg, "`call` to a function that doesn't exist".to_owned());

            return;
        }

        let sig = self.module.function(call.callee()).signature();

        verify_assert_eq!(
            self,
            dbg,
            sig,
            def.dfg.signature(call.sig()),
            "in `call`, signature of callee function must match signature given to inst"
        );

        let params = sig.params();
        let args = call.args();
        let count_ok = if sig.vararg() {
            args.len() >= params.len()
        } else {
            args.len() == params.len()
        };

        verify_assert!(
            self,
            dbg,
            count_ok,
            format!("expected {} arguments but got {}", params.len(), args.len())
        );

        let types_ok = iter::zip(params.iter(), args.iter()).all(|(ty, arg)| *ty == def.dfg.ty(*arg));

        verify_assert!(
            self,
            dbg,
            types_ok,
            "arguments passed must match function parameter's types"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_function() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let sig = SigBuilder::new()
            .param(Type::bool())
            .ret(Some(Type::i32()))
            .build();
        let mut b = module.define_function("pick", sig);

        // fn i32 @pick(bool) {
        // entry(bool %0):
        //   %1 = iconst i32 1
        //   condbr bool %0, yes, merge(i32 %1)
        // yes:
        //   %2 = iconst i32 2
        //   br merge(i32 %2)
        // merge(i32 %3):
        //   ret i32 %3
        // }
        let entry = b.create_block("entry");
        let yes = b.create_block("yes");
        let merge = b.create_block("merge");
        let params = b.append_entry_params(entry, DebugInfo::fake());
        let phi = b.append_block_param(merge, Type::i32(), DebugInfo::fake());

        b.switch_to(entry);
        let one = b.append().iconst(Type::i32(), 1, DebugInfo::fake());
        b.append().condbr(
            params[0],
            BlockWithParams::to(yes),
            BlockWithParams::new(merge, &[one]),
            DebugInfo::fake(),
        );

        b.switch_to(yes);
        let two = b.append().iconst(Type::i32(), 2, DebugInfo::fake());
        b.append()
            .br(BlockWithParams::new(merge, &[two]), DebugInfo::fake());

        b.switch_to(merge);
        b.append().ret_val(phi, DebugInfo::fake());
        b.define();

        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn catches_bad_functions() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let sig = SigBuilder::new().ret(Some(Type::i32())).build();
        let mut b = module.define_function("bad", sig);

        // fn i32 @bad() {
        // entry:
        //   br next
        // next:
        //   %0 = iconst i32 1
        //   br next2(i32 %0)      ; wrong number of args
        // next2:
        //   %1 = iconst i64 5
        //   ret i64 %1            ; wrong return type
        // dangling:
        // }
        let entry = b.create_block("entry");
        let next = b.create_block("next");
        let next2 = b.create_block("next2");
        b.create_block("dangling");

        b.switch_to(entry);
        b.append().br(BlockWithParams::to(next), DebugInfo::new(1, 1));

        b.switch_to(next);
        let one = b.append().iconst(Type::i32(), 1, DebugInfo::new(2, 1));
        b.append()
            .br(BlockWithParams::new(next2, &[one]), DebugInfo::new(3, 1));

        b.switch_to(next2);
        let five = b.append().iconst(Type::i64(), 5, DebugInfo::new(4, 1));
        b.append().ret_val(five, DebugInfo::new(5, 1));
        b.define();

        let errors = verify_module(&module).unwrap_err();
        let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();

        assert_eq!(errors.len(), 3);
        assert!(messages[0].contains("wrong number of block arguments"));
        assert!(messages[1].contains("return type"));
        assert!(messages[2].contains("is empty"));
        assert!(errors.iter().all(|e| e.func == "bad"));
        assert_eq!(errors[1].to_string(), "5:1: in '@bad': `ret` value must match the function's return type");
    }

    #[test]
    fn catches_dominance_violations() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let sig = SigBuilder::new().param(Type::bool()).build();
        let mut b = module.define_function("bad", sig);

        // fn void @bad(bool) {
        // entry(bool %0):
        //   condbr bool %0, left, right
        // left:
        //   %1 = iconst i32 1
        //   br right
        // right:
        //   %2 = iadd i32 %1, %1
        //   ret void
        // }
        let entry = b.create_block("entry");
        let left = b.create_block("left");
        let right = b.create_block("right");
        let params = b.append_entry_params(entry, DebugInfo::fake());

        b.switch_to(entry);
        b.append().condbr(
            params[0],
            BlockWithParams::to(left),
            BlockWithParams::to(right),
            DebugInfo::fake(),
        );

        b.switch_to(left);
        let one = b.append().iconst(Type::i32(), 1, DebugInfo::fake());
        b.append().br(BlockWithParams::to(right), DebugInfo::fake());

        b.switch_to(right);
        b.append().iadd(one, one, DebugInfo::fake());
        b.append().ret_void(DebugInfo::fake());
        b.define();

        let errors = verify_module(&module).unwrap_err();

        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| e.message == "definition's block must dominate use's block"));
    }
}
