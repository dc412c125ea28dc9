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
use smallvec::SmallVec;

/// Helper type for building a [`Signature`].
#[derive(Debug, Clone)]
pub struct SigBuilder {
    vararg: bool,
    abi: CallConv,
    ret: Option<Type>,
    params: SmallVec<[Type; 4]>,
}

impl SigBuilder {
    /// Creates a [`SigBuilder`] for the signature `void ()`
    pub fn new() -> Self {
        Self {
            vararg: false,
            abi: CallConv::Device,
            ret: None,
            params: SmallVec::default(),
        }
    }

    /// Starts from an existing signature.
    pub fn from_sig(sig: &Signature) -> Self {
        Self {
            vararg: sig.vararg(),
            abi: sig.calling_conv(),
            ret: sig.return_ty(),
            params: SmallVec::from_slice(sig.params()),
        }
    }

    /// Marks the signature as having a variable number of arguments.
    pub fn vararg(self, value: bool) -> Self {
        Self {
            vararg: value,
            ..self
        }
    }

    /// Marks the function as having a specified ABI.
    pub fn abi(self, abi: CallConv) -> Self {
        Self { abi, ..self }
    }

    /// Marks the signature as having a given return type.
    pub fn ret(self, ret: Option<Type>) -> Self {
        Self { ret, ..self }
    }

    /// Appends a parameter to the signature
    pub fn param(mut self, param: Type) -> Self {
        self.params.push(param);

        self
    }

    /// Appends a list of parameters to the signature
    pub fn params(mut self, params: &[Type]) -> Self {
        self.params.extend_from_slice(params);

        self
    }

    /// Builds the signature
    pub fn build(self) -> Signature {
        Signature::new(self.params, self.ret, self.abi, self.vararg)
    }
}

impl Default for SigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper type that appends to a function. Implements the [`InstBuilder`]
/// trait to allow easy instruction creation.
pub struct AppendBuilder<'b> {
    def: &'b mut FunctionDefinition,
    curr: Block,
}

impl<'b> AppendBuilder<'b> {
    /// Creates a builder that appends to `block` inside of `def`.
    pub fn new(def: &'b mut FunctionDefinition, block: Block) -> Self {
        debug_assert!(def.layout.is_block_inserted(block));

        Self { def, curr: block }
    }
}

impl<'b> InstBuilder<'b> for AppendBuilder<'b> {
    fn dfg(&self) -> &DataFlowGraph {
        &self.def.dfg
    }

    fn build(self, data: InstData, debug: DebugInfo) -> (Inst, Option<Value>) {
        let (inst, val) = self.def.dfg.create_inst(data, debug);

        self.def.layout.append_inst(inst, self.curr);

        (inst, val)
    }
}

/// Helper type for building a GIR function.
///
/// ```
/// # use garnet::ir::*;
/// let mut module = Module::new("test", ShaderKind::OpenCL);
/// let sig = SigBuilder::new().param(Type::i32()).ret(Some(Type::i32())).build();
/// let mut b = module.define_function("double", sig);
///
/// // fn i32 @double(i32) {
/// // entry(i32 %0):
/// //   %1 = iadd i32 %0, %0
/// //   ret i32 %1
/// // }
/// let entry = b.create_block("entry");
/// let params = b.append_entry_params(entry, DebugInfo::fake());
///
/// b.switch_to(entry);
///
/// let doubled = b.append().iadd(params[0], params[0], DebugInfo::fake());
///
/// b.append().ret_val(doubled, DebugInfo::fake());
///
/// let func = b.define();
///
/// assert!(!module.function(func).is_decl());
/// ```
#[derive(Debug)]
pub struct FuncBuilder<'m> {
    module: &'m mut Module,
    func: Func,
    def: FunctionDefinition,
    current: Option<Block>,
}

impl<'m> FuncBuilder<'m> {
    pub(in crate::ir) fn new(module: &'m mut Module, func: Func) -> Self {
        Self {
            module,
            func,
            def: FunctionDefinition::default(),
            current: None,
        }
    }

    /// Finishes defining the function, and actually generates a full definition
    /// and inserts it into the module. Until this method is called, the function
    /// is not actually defined in the module.
    pub fn define(self) -> Func {
        self.module.set_function_definition(self.func, self.def);

        self.func
    }

    /// Finds a block by its name, returning it if it's inserted into the current function.
    pub fn find_block(&self, name: &str) -> Option<Block> {
        self.def
            .layout
            .blocks()
            .find(|bb| self.def.dfg.block_name(*bb) == name)
    }

    /// Gets the name of a block that has been inserted into the function
    pub fn block_name(&self, block: Block) -> &str {
        debug_assert!(self.def.layout.is_block_inserted(block));

        self.def.dfg.block_name(block)
    }

    /// Gets the block parameters of a given block.
    pub fn block_params(&self, block: Block) -> &[Value] {
        debug_assert!(self.def.layout.is_block_inserted(block));

        self.def.dfg.block_params(block)
    }

    /// Creates a single basic block and returns it. This block is appended to
    /// the end of the block list.
    ///
    /// Note that this does not switch the builder to operate on that block,
    /// you still need to call [`Self::switch_to`].
    pub fn create_block(&mut self, name: &str) -> Block {
        let block = self.def.dfg.create_block(name);

        self.def.layout.append_block(block);

        block
    }

    /// Equivalent to [`Self::create_block`], except it inserts the block after `after`
    /// instead of appending it.
    pub fn create_block_after(&mut self, name: &str, after: Block) -> Block {
        let block = self.def.dfg.create_block(name);

        self.def.layout.insert_block_after(block, after);

        block
    }

    /// Switches to inserting at a specific block.
    pub fn switch_to(&mut self, block: Block) {
        debug_assert!(self.def.layout.is_block_inserted(block));

        self.current = Some(block);
    }

    /// Gets the block currently being appended to.
    pub fn current_block(&self) -> Option<Block> {
        self.current
    }

    /// Adds a single block parameter of `ty` to `block` and returns a value
    /// that refers to it.
    pub fn append_block_param(&mut self, block: Block, ty: Type, debug: DebugInfo) -> Value {
        self.def.dfg.append_block_param(block, ty, debug)
    }

    /// Appends all the block parameters necessary for the parameters of the current function.
    /// This is meant to be used for creating a function's entry block, as the block parameters
    /// to the entry block get their value from the parameters.
    ///
    /// This is equivalent to calling [`Self::append_block_param`] once for each parameter
    /// type in the function signature.
    pub fn append_entry_params(&mut self, block: Block, debug: DebugInfo) -> SmallVec<[Value; 4]> {
        let tys: SmallVec<[Type; 4]> =
            SmallVec::from_slice(self.module.function(self.func).signature().params());

        tys.into_iter()
            .map(|ty| self.append_block_param(block, ty, debug))
            .collect()
    }

    /// Gives a value a debug name.
    pub fn set_value_name(&mut self, value: Value, name: &str) {
        self.def.dfg.set_value_name(value, name);
    }

    /// Gets the type of a value that was previously emitted by the builder.
    pub fn ty(&self, value: Value) -> Type {
        self.def.dfg.ty(value)
    }

    /// Returns a builder that can be used to append an instruction to
    /// the current block.
    ///
    /// If there is no current block, this will panic.
    pub fn append(&mut self) -> AppendBuilder<'_> {
        match self.current {
            Some(curr) => AppendBuilder {
                def: &mut self.def,
                curr,
            },
            None => panic!("cannot append without a current block"),
        }
    }

    /// Imports a signature into the function and returns a [`Sig`]
    /// that refers to it.
    ///
    /// This is intended to be used for calling other functions, where the
    /// signature needs to be known inside of the call instruction
    pub fn import_signature(&mut self, signature: &Signature) -> Sig {
        self.def.dfg.insert_sig(signature)
    }

    /// Imports the signature of `func` and returns a [`Sig`] for calling it.
    pub fn import_function(&mut self, func: Func) -> Sig {
        let sig = self.module.function(func).signature().clone();

        self.import_signature(&sig)
    }

    /// Converts an [`Inst`] into a [`Value`] that refers to the result
    /// of the instruction if possible.
    ///
    /// Not all instructions actually yield results, those will return `None`
    pub fn inst_to_result(&self, inst: Inst) -> Option<Value> {
        self.def.dfg.inst_to_result(inst)
    }

    /// Resolves a [`Func`] into a real function object.
    pub fn function(&self, func: Func) -> &Function {
        self.module.function(func)
    }

    /// Gives access to the module the function lives in, e.g. to declare globals.
    pub fn module_mut(&mut self) -> &mut Module {
        self.module
    }

    /// Gets the entry block of the function. Unless no blocks have been
    /// appended to the function, this will be `Some`.
    pub fn entry_block(&self) -> Option<Block> {
        self.def.layout.entry_block()
    }

    /// Gets a [`Func`] referring to the function being built.
    pub fn current_func(&self) -> Func {
        self.func
    }

    /// Returns the data-flow graph for the function
    pub fn dfg(&self) -> &DataFlowGraph {
        &self.def.dfg
    }

    /// Returns the layout for the function
    pub fn layout(&self) -> &Layout {
        &self.def.layout
    }
}
