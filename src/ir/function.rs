//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::dense_arena_key;
use crate::ir::{Block, DataFlowGraph, Layout, Type};
use smallvec::SmallVec;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// Models which calling convention a given function follows.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum CallConv {
    /// An ordinary device function, callable from other device code.
    Device,
    /// A kernel entry point, launched by the host.
    Kernel,
}

/// Models whether a function is visible outside of its module.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Linkage {
    /// Visible to other modules and the runtime.
    External,
    /// Only visible within the module.
    Internal,
}

dense_arena_key! {
    /// The reference type for [`Signature`]s. They are keys into a table
    /// stored inside the [`DataFlowGraph`] of the function that they are used in.
    ///
    /// Note that this means that a `Sig` is only valid in its own function.
    pub struct Sig;
}

/// Holds all of the information necessary to call a function.
///
/// These are held in the [`DataFlowGraph`] alongside everything else
/// in a function, and are referenced through [`Sig`]s.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Signature {
    params: SmallVec<[Type; 4]>,
    ret: Option<Type>,
    call_conv: CallConv,
    vararg: bool,
}

impl Signature {
    pub(crate) fn new(
        params: SmallVec<[Type; 4]>,
        ret: Option<Type>,
        call_conv: CallConv,
        vararg: bool,
    ) -> Self {
        Self {
            params,
            ret,
            call_conv,
            vararg,
        }
    }

    /// Gets the return type of the function signature.
    ///
    /// Note that `None` represents `void`, i.e. a function that doesn't
    /// actually return anything.
    #[inline]
    pub fn return_ty(&self) -> Option<Type> {
        self.ret
    }

    /// Gets the list of parameter types for the function.
    #[inline]
    pub fn params(&self) -> &[Type] {
        &self.params
    }

    /// Gets the function's calling convention
    #[inline]
    pub fn calling_conv(&self) -> CallConv {
        self.call_conv
    }

    /// Checks if the signature is for a vararg (`...`) function.
    #[inline]
    pub fn vararg(&self) -> bool {
        self.vararg
    }

    /// Checks if the signature refers to a `void` function.
    #[inline]
    pub fn is_void(&self) -> bool {
        self.return_ty().is_none()
    }
}

dense_arena_key! {
    /// The reference type for a [`Function`]. These can be looked up
    /// at the [`Module`](crate::ir::Module) level.
    pub struct Func;
}

/// The definition of a function.
///
/// This provides the storage for data in the function, and the
/// layout information that actually makes up a meaningful chunk of IR.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct FunctionDefinition {
    /// The "data-flow graph" (DFG) of the function. This is effectively
    /// the storage for every entity (instruction, value, block, etc.) that
    /// is used inside the function.
    pub dfg: DataFlowGraph,
    /// The layout of a function. This maps all the data in the DFG into
    /// a structure that actually makes up a function, it models the relationships
    /// *between* entities from the DFG.
    ///
    /// This contains the lists that make up basic blocks, and the block ordering.
    pub layout: Layout,
}

impl FunctionDefinition {
    /// Gets the entry block of the definition.
    ///
    /// Every definition installed into a module has one, so this only returns
    /// `None` for a definition that is currently being assembled.
    pub fn entry_block(&self) -> Option<Block> {
        self.layout.entry_block()
    }
}

/// Models a single function in the IR.
///
/// Contains a list of basic blocks and a list of parameters (included
/// in the signature), and a name.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Function {
    name: String,
    sig: Signature,
    linkage: Linkage,
    func: Func,
    definition: Option<FunctionDefinition>,
}

impl Function {
    /// Creates an empty function with a given name and signature.
    ///
    /// This is equivalent to "declaring" a function, as a declared function is
    /// just a function without a body.
    pub fn new(name: String, sig: Signature, linkage: Linkage, func: Func) -> Self {
        Self {
            name,
            sig,
            linkage,
            func,
            definition: None,
        }
    }

    /// Gets the signature of the function.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.sig
    }

    /// Gets the return type of the function. If the function
    /// is a `void` function, [`None`] is returned.
    #[inline]
    pub fn return_ty(&self) -> Option<Type> {
        self.signature().return_ty()
    }

    /// Checks if the function is a declaration, i.e. whether or not
    /// it actually has a definition
    #[inline]
    pub fn is_decl(&self) -> bool {
        self.definition.is_none()
    }

    /// Gets the function definition if it exists.
    #[inline]
    pub fn definition(&self) -> Option<&FunctionDefinition> {
        self.definition.as_ref()
    }

    /// Gets the function definition if it exists.
    #[inline]
    pub fn definition_mut(&mut self) -> Option<&mut FunctionDefinition> {
        self.definition.as_mut()
    }

    /// Gets the name of the function without `@`.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the linkage of the function.
    #[inline]
    pub fn linkage(&self) -> Linkage {
        self.linkage
    }

    /// Changes the linkage of the function.
    #[inline]
    pub fn set_linkage(&mut self, linkage: Linkage) {
        self.linkage = linkage;
    }

    /// Gets a [`Func`] that refers to `self`. This can be used when a [`Module`]
    /// is not available to get [`Func`]s from.
    ///
    /// [`Module`]: crate::ir::Module
    #[inline]
    pub fn func(&self) -> Func {
        self.func
    }

    pub(in crate::ir) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub(in crate::ir) fn replace_definition(&mut self, def: FunctionDefinition) {
        self.definition.replace(def);
    }
}
