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
use crate::ir::*;
use crate::utility::GaHashSet;
use std::fmt::Write;
use std::ops::Range;

/// A simple GIR -> text pass that takes in an entire module, turns it into
/// textual GIR, and then maps each IR entity to a range of text referring to it.
///
/// This can be used for debug/test passes that need to produce human-readable GIR.
/// The output is deterministic: the same module always prints the same way.
#[derive(Debug, Clone)]
pub struct ModuleWriter {
    whole: String,
    val_ranges: SecondaryMap<Value, Range<usize>>,
    inst_ranges: SecondaryMap<Inst, Range<usize>>,
    block_ranges: SecondaryMap<Block, Range<usize>>,
    func_ranges: SecondaryMap<Func, Range<usize>>,
}

impl ModuleWriter {
    /// Stringifies `module`.
    pub fn new(module: &Module) -> Self {
        let mut writer_impl = WriterImpl {
            module,
            state: ModuleWriter {
                whole: String::default(),
                val_ranges: SecondaryMap::default(),
                inst_ranges: SecondaryMap::default(),
                block_ranges: SecondaryMap::default(),
                func_ranges: SecondaryMap::default(),
            },
            values: SecondaryMap::default(),
            taken: GaHashSet::default(),
            next: 0,
        };

        writer_impl.walk();

        writer_impl.state
    }

    /// Provides the name of a value. This is the `%_` syntax. Values in
    /// different functions may share keys, the last function printed wins.
    pub fn val(&self, value: Value) -> &str {
        &self.whole[self.val_ranges[value].clone()]
    }

    /// Stringifies an entire instruction. This includes the result if the
    /// instruction actually has one.
    pub fn inst(&self, inst: Inst) -> &str {
        &self.whole[self.inst_ranges[inst].clone()]
    }

    /// Stringifies a whole block. This includes the block label, any block
    /// parameters, and every instruction in the block.
    pub fn block(&self, bb: Block) -> &str {
        &self.whole[self.block_ranges[bb].clone()]
    }

    /// Stringifies a whole function. This includes every block, and the function prototype.
    pub fn func(&self, func: Func) -> &str {
        &self.whole[self.func_ranges[func].clone()]
    }

    /// Returns the entire module as a string.
    pub fn module(&self) -> &str {
        &self.whole
    }
}

/// Prints an entire module to `stdout`.
///
/// Wrapper for when setting up a pass manager and running the writer
/// pass is too much.
pub fn print_module(module: &Module) {
    println!("{}", ModuleWriter::new(module).module());
}

/// Turns an entire module into its textual form.
pub fn stringify_module(module: &Module) -> String {
    ModuleWriter::new(module).whole
}

struct WriterImpl<'m> {
    module: &'m Module,
    state: ModuleWriter,
    values: SecondaryMap<Value, String>,
    // names already handed out in the current function
    taken: GaHashSet<String>,
    next: u32,
}

impl<'m> WriterImpl<'m> {
    fn walk(&mut self) {
        let module = self.module;
        let globals: Vec<GlobalVar> = module.globals().collect();

        for gv in globals.iter().copied() {
            self.global(gv);
        }

        if !globals.is_empty() {
            self.state.whole += "\n";
        }

        let mut it = module.functions();

        // if we have any functions at all, print first one without leading \n
        if let Some(func) = it.next() {
            self.func(func);
        }

        // for any remaining functions, print a newline to split them up
        // then print the function
        for func in it {
            self.state.whole += "\n";

            self.func(func);
        }
    }

    fn global(&mut self, gv: GlobalVar) {
        let global = self.module.global(gv);
        let linkage = match global.linkage() {
            Linkage::External => "external",
            Linkage::Internal => "internal",
        };

        let init = match global.initializer() {
            None => String::default(),
            Some(Initializer::Undef) => " undef".to_owned(),
            Some(Initializer::Zero) => " zeroinit".to_owned(),
            Some(Initializer::Int(v)) => format!(" {v}"),
        };

        let space = match global.addr_space() {
            AddrSpace::Private => "private",
            AddrSpace::Global => "global",
            AddrSpace::Constant => "constant",
            AddrSpace::Local => "local",
            AddrSpace::Generic => "generic",
        };

        let _ = writeln!(
            self.state.whole,
            "@{} = {linkage} global {space} {}{init}",
            global.name(),
            global.ty(),
        );
    }

    fn func(&mut self, func: Func) {
        let module = self.module;
        let begin = self.state.whole.len();
        let f = module.function(func);
        let sig = f.signature();

        self.values = SecondaryMap::default();
        self.taken.clear();
        self.next = 0;

        let ret = ty_void(sig.return_ty());
        let params = sig
            .params()
            .iter()
            .map(|ty| ty.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        // 'fn T @name(...)'
        let _ = write!(self.state.whole, "fn {ret} @{}({params})", f.name());

        if sig.calling_conv() == CallConv::Kernel {
            self.state.whole += " kernel";
        }

        if f.linkage() == Linkage::Internal {
            self.state.whole += " internal";
        }

        match f.definition() {
            Some(def) => {
                self.state.whole += " {\n";

                for block in def.layout.blocks() {
                    self.block(block, def);
                }

                // blocks print a newline after every inst, including last one
                self.state.whole += "}\n";
            }
            None => self.state.whole += "\n",
        }

        let end = self.state.whole.len();

        self.state.func_ranges.insert(func, begin..end);
    }

    fn block(&mut self, block: Block, def: &FunctionDefinition) {
        let begin = self.state.whole.len();

        self.state.whole += def.dfg.block_name(block);

        let params = def.dfg.block_params(block);

        if !params.is_empty() {
            self.state.whole += "(";

            // these are **new** value names, so they get ranges of their own
            for (i, param) in params.iter().copied().enumerate() {
                if i != 0 {
                    self.state.whole += ", ";
                }

                let _ = write!(self.state.whole, "{} ", def.dfg.ty(param));

                let name = self.name(param, def);
                let begin = self.state.whole.len();

                self.state.whole += &name;
                self.state
                    .val_ranges
                    .insert(param, begin..self.state.whole.len());
            }

            self.state.whole += ")";
        }

        self.state.whole += ":\n";

        for inst in def.layout.insts_in_block(block) {
            self.inst(inst, def);
        }

        let end = self.state.whole.len();

        self.state.block_ranges.insert(block, begin..end);
    }

    fn inst(&mut self, inst: Inst, def: &FunctionDefinition) {
        let begin = self.state.whole.len();

        self.state.whole += "  ";

        if let Some(val) = def.dfg.inst_to_result(inst) {
            let name = self.name(val, def);
            let begin = self.state.whole.len();

            self.state.whole += &name;
            self.state
                .val_ranges
                .insert(val, begin..self.state.whole.len());
            self.state.whole += " = ";
        }

        let body = self.inst_body(def.dfg.inst_data(inst), def);

        self.state.whole += &body;
        self.state.whole += "\n";

        let end = self.state.whole.len();

        self.state.inst_ranges.insert(inst, begin..end);
    }

    fn inst_body(&mut self, data: &InstData, def: &FunctionDefinition) -> String {
        let opcode = data.opcode_name();
        let result = data.result_ty().map(|ty| ty.to_string()).unwrap_or_default();

        match data {
            InstData::Call(call) => {
                let callee = self.module.function(call.callee()).name();
                let args = self.args(call.args(), def);

                format!("call {} @{callee}({args})", ty_void(data.result_ty()))
            }
            InstData::ICmp(icmp) => {
                let ty = def.dfg.ty(icmp.lhs());
                let lhs = self.name(icmp.lhs(), def);
                let rhs = self.name(icmp.rhs(), def);

                format!("icmp {} {ty} {lhs}, {rhs}", icmp.op().name())
            }
            InstData::Sel(sel) => {
                let cond = self.name(sel.condition(), def);
                let a = self.name(sel.if_true(), def);
                let b = self.name(sel.if_false(), def);

                format!("sel {result} bool {cond}, {a}, {b}")
            }
            InstData::Br(br) => format!("br {}", self.target(br.target(), def)),
            InstData::CondBr(condbr) => {
                let cond = self.name(condbr.condition(), def);
                let t = self.target(condbr.true_branch(), def);
                let f = self.target(condbr.false_branch(), def);

                format!("condbr bool {cond}, {t}, {f}")
            }
            InstData::Switch(switch) => {
                let scrutinee = self.name_ty(switch.scrutinee(), def);
                let cases = switch
                    .cases()
                    .map(|(v, bb)| format!("{v} -> {}", def.dfg.block_name(bb)))
                    .collect::<Vec<_>>()
                    .join(", ");

                format!(
                    "switch {scrutinee}, {} [{cases}]",
                    def.dfg.block_name(switch.default_target())
                )
            }
            InstData::Ret(ret) => match ret.value() {
                Some(v) => format!("ret {}", self.name_ty(v, def)),
                None => "ret void".to_owned(),
            },
            InstData::And(a)
            | InstData::Or(a)
            | InstData::Xor(a)
            | InstData::IAdd(a)
            | InstData::IMul(a)
            | InstData::FAdd(a)
            | InstData::FMul(a) => {
                let lhs = self.name(a.lhs(), def);
                let rhs = self.name(a.rhs(), def);

                format!("{opcode} {result} {lhs}, {rhs}")
            }
            InstData::Shl(a) | InstData::LShr(a) | InstData::ISub(a) | InstData::UDiv(a) => {
                let lhs = self.name(a.lhs(), def);
                let rhs = self.name(a.rhs(), def);

                format!("{opcode} {result} {lhs}, {rhs}")
            }
            InstData::Alloca(alloca) => format!("alloca {}", alloca.alloc_ty()),
            InstData::Load(load) => {
                format!("load {result}, {}", self.name_ty(load.pointer(), def))
            }
            InstData::Store(store) => {
                let value = self.name_ty(store.stored(), def);
                let ptr = self.name_ty(store.pointer(), def);

                format!("store {value}, {ptr}")
            }
            InstData::Offset(offset) => {
                let base = self.name_ty(offset.base(), def);
                let bytes = self.name_ty(offset.offset(), def);

                format!("offset {base}, {bytes}")
            }
            InstData::Extract(extract) => {
                let agg = self.name_ty(extract.aggregate(), def);

                format!("extract {agg}, {}", extract.index())
            }
            InstData::Sext(cast)
            | InstData::Zext(cast)
            | InstData::Trunc(cast)
            | InstData::BToI(cast)
            | InstData::IToP(cast)
            | InstData::PToI(cast) => {
                format!("{opcode} {result}, {}", self.name_ty(cast.operand(), def))
            }
            InstData::IConst(i) => format!("iconst {result} {}", i.signed_value()),
            InstData::FConst(f) => match data.result_ty() {
                Some(Type::Float(FloatFormat::Single)) => {
                    format!("fconst f32 {:?}", f32::from_bits(f.bits() as u32))
                }
                _ => format!("fconst f64 {:?}", f64::from_bits(f.bits())),
            },
            InstData::BConst(b) => format!("bconst {}", b.value()),
            InstData::Undef(_) => format!("undef {result}"),
            InstData::GlobalAddr(gv) => {
                format!("globaladdr {result} @{}", self.module.global(gv.global()).name())
            }
            InstData::Fence(fence) => {
                let flags = FenceFlag::ALL
                    .iter()
                    .map(|flag| self.name(fence.flag(*flag), def))
                    .collect::<Vec<_>>()
                    .join(", ");
                let scope = self.name(fence.scope(), def);

                format!("fence [{flags}], {scope}")
            }
            InstData::AtomicIAdd(atomic) => {
                let ptr = self.name_ty(atomic.pointer(), def);
                let value = self.name(atomic.value(), def);

                format!("atomic.iadd {result} {ptr}, {value}")
            }
            InstData::LocalId(wi) | InstData::GroupId(wi) => format!("{opcode} {}", wi.dim()),
            InstData::ReadFirstLane(rfl) => {
                format!("readfirstlane {}", self.name_ty(rfl.operand(), def))
            }
            InstData::Spill(spill) => {
                format!("spill {}, {}", spill.offset(), self.name_ty(spill.value(), def))
            }
            InstData::Fill(fill) => match fill.uniformity() {
                Some(u) => format!("fill {result} {} uniform.{}", fill.offset(), u.name()),
                None => format!("fill {result} {}", fill.offset()),
            },
            InstData::Unreachable(_) | InstData::Barrier(_) => opcode.to_owned(),
        }
    }

    fn args(&mut self, vals: &[Value], def: &FunctionDefinition) -> String {
        vals.iter()
            .map(|v| self.name_ty(*v, def))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn target(&mut self, target: &BlockWithParams, def: &FunctionDefinition) -> String {
        let name = def.dfg.block_name(target.block());

        if target.args().is_empty() {
            name.to_owned()
        } else {
            let args = self.args(target.args(), def);

            format!("{name}({args})")
        }
    }

    fn name_ty(&mut self, val: Value, def: &FunctionDefinition) -> String {
        let ty = def.dfg.ty(val);
        let val = self.name(val, def);

        format!("{ty} {val}")
    }

    fn name(&mut self, val: Value, def: &FunctionDefinition) -> String {
        if let Some(name) = self.values.get(val) {
            return name.clone();
        }

        let name = match def.dfg.value_name(val) {
            Some(base) => {
                let mut candidate = format!("%{base}");
                let mut i = 1;

                while self.taken.contains(&candidate) {
                    candidate = format!("%{base}.{i}");
                    i += 1;
                }

                candidate
            }
            None => {
                self.next += 1;

                format!("%{}", self.next - 1)
            }
        };

        self.taken.insert(name.clone());
        self.values.insert(val, name.clone());

        name
    }
}

fn ty_void(ty: Option<Type>) -> String {
    ty.map_or_else(|| "void".to_owned(), |ty| ty.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_a_function() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let counter = module.declare_global(
            "counter",
            Type::i32(),
            AddrSpace::Local,
            Some(Initializer::Undef),
            Linkage::Internal,
        );
        let sig = SigBuilder::new()
            .param(Type::i32())
            .ret(Some(Type::i32()))
            .abi(CallConv::Kernel)
            .build();
        let mut b = module.define_function("main", sig);

        let entry = b.create_block("entry");
        let exit = b.create_block("exit");
        let params = b.append_entry_params(entry, DebugInfo::fake());
        let merged = b.append_block_param(exit, Type::i32(), DebugInfo::fake());

        b.switch_to(entry);
        let ptr = b.append().globaladdr(counter, AddrSpace::Local, DebugInfo::fake());
        let one = b.append().iconst(Type::i32(), 1, DebugInfo::fake());
        let old = b.append().atomic_iadd(ptr, one, DebugInfo::fake());
        let sum = b.append().iadd(old, params[0], DebugInfo::fake());
        b.set_value_name(sum, "sum");
        b.append().barrier(DebugInfo::fake());
        b.append()
            .br(BlockWithParams::new(exit, &[sum]), DebugInfo::fake());

        b.switch_to(exit);
        b.set_value_name(merged, "sum");
        b.append().ret_val(merged, DebugInfo::fake());

        let func = b.define();
        let writer = ModuleWriter::new(&module);

        let expected = "\
@counter = internal global local i32 undef

fn i32 @main(i32) kernel {
entry(i32 %0):
  %1 = globaladdr ptr.local @counter
  %2 = iconst i32 1
  %3 = atomic.iadd i32 ptr.local %1, %2
  %sum = iadd i32 %3, %0
  barrier
  br exit(i32 %sum)
exit(i32 %sum.1):
  ret i32 %sum.1
}
";

        assert_eq!(writer.module(), expected);
        assert_eq!(writer.val(sum), "%sum");
        assert_eq!(writer.func(func), &expected[44..]);
        assert_eq!(writer.block(exit), "exit(i32 %sum.1):\n  ret i32 %sum.1\n");
        assert_eq!(stringify_module(&module), expected);
    }
}
