//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::arena::ArenaMap;
use crate::dense_arena_key;
use crate::ir::{
    AddrSpace, Func, FuncBuilder, Function, FunctionDefinition, Linkage, ModuleMetadata,
    ShaderKind, Signature, Type,
};
use crate::utility::GaHashMap;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

dense_arena_key! {
    /// The reference type for a [`GlobalVariable`] in a [`Module`].
    pub struct GlobalVar;
}

/// The initial contents of a global variable.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Initializer {
    /// Left uninitialized.
    Undef,
    /// Every byte is zero.
    Zero,
    /// An integer, zero-extended to 64 bits.
    Int(u64),
}

/// Models a single global variable.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct GlobalVariable {
    name: String,
    ty: Type,
    space: AddrSpace,
    init: Option<Initializer>,
    linkage: Linkage,
}

impl GlobalVariable {
    /// Gets the name of the global without `@`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the type of the object the global holds.
    pub fn ty(&self) -> Type {
        self.ty
    }

    /// Gets the address space the global lives in.
    pub fn addr_space(&self) -> AddrSpace {
        self.space
    }

    /// Gets the initializer of the global. Declarations have none.
    pub fn initializer(&self) -> Option<Initializer> {
        self.init
    }

    /// Gets the linkage of the global.
    pub fn linkage(&self) -> Linkage {
        self.linkage
    }

    /// If the global has an integer initializer, gets it.
    pub fn int_initializer(&self) -> Option<u64> {
        match self.init {
            Some(Initializer::Int(v)) => Some(v),
            Some(Initializer::Zero) => Some(0),
            _ => None,
        }
    }
}

/// Contains all the data necessary for a single module of GIR.
///
/// This models all of the information that would be represented inside of
/// a textual module of GIR.
///
/// Functions that are removed leave an empty slot behind, so a [`Func`] is
/// never reused for a different function.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Module {
    name: String,
    functions: ArenaMap<Func, Option<Function>>,
    names: GaHashMap<String, Func>,
    globals: ArenaMap<GlobalVar, GlobalVariable>,
    global_names: GaHashMap<String, GlobalVar>,
    metadata: ModuleMetadata,
}

impl Module {
    /// Creates a new, empty module with a given name and kind.
    pub fn new(name: &str, kind: ShaderKind) -> Self {
        Self {
            name: name.to_owned(),
            functions: ArenaMap::default(),
            names: GaHashMap::default(),
            globals: ArenaMap::default(),
            global_names: GaHashMap::default(),
            metadata: ModuleMetadata::new(kind),
        }
    }

    /// Gets the name of the module.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves a [`Func`] into a real function object.
    ///
    /// Panics if the function has been removed.
    pub fn function(&self, func: Func) -> &Function {
        match &self.functions[func] {
            Some(f) => f,
            None => panic!("{func:?} was removed from the module"),
        }
    }

    /// Resolves a [`Func`] into a real function object.
    ///
    /// Panics if the function has been removed.
    pub fn function_mut(&mut self, func: Func) -> &mut Function {
        match &mut self.functions[func] {
            Some(f) => f,
            None => panic!("{func:?} was removed from the module"),
        }
    }

    /// Checks if `func` still refers to a function in the module.
    pub fn contains_function(&self, func: Func) -> bool {
        self.functions.contains(func) && self.functions[func].is_some()
    }

    /// Finds a [`Func`] with a given name. If the function has not been added to
    /// the module, `None` is returned.
    pub fn find_function_by_name(&self, func: &str) -> Option<Func> {
        self.names.get(func).copied()
    }

    /// Declares and then defines a new function.
    pub fn define_function(&mut self, name: &str, sig: Signature) -> FuncBuilder<'_> {
        let f = self.declare_function(name, sig);

        self.define_existing_function(f)
    }

    /// Declares a function without providing it a definition. It can be defined
    /// later with [`Self::define_existing_function`], or it can be left
    /// as-is if the function is opaque.
    ///
    /// New functions have external linkage.
    pub fn declare_function(&mut self, name: &str, sig: Signature) -> Func {
        debug_assert!(
            self.find_function_by_name(name).is_none(),
            "function names must be unique"
        );

        let name = name.to_owned();
        let new = Function::new(name.clone(), sig, Linkage::External, self.functions.next_key());
        let func = self.functions.insert(Some(new));

        self.names.insert(name, func);

        func
    }

    /// Returns a [`FuncBuilder`] that will create a body for a previously-declared
    /// function.
    ///
    /// If the function already has a body, using the builder will completely
    /// replace the previous body.
    pub fn define_existing_function(&mut self, func: Func) -> FuncBuilder<'_> {
        FuncBuilder::new(self, func)
    }

    /// Replaces the body of a function with `def`.
    pub fn set_function_definition(&mut self, func: Func, def: FunctionDefinition) {
        self.function_mut(func).replace_definition(def);
    }

    /// Returns an iterator over all of the functions in the module, in the
    /// order they were declared.
    pub fn functions(&self) -> impl Iterator<Item = Func> + '_ {
        self.functions
            .iter()
            .filter_map(|(func, slot)| slot.as_ref().map(|_| func))
    }

    /// Produces a function name based on `base` that is not used by any
    /// function in the module. `base` itself is returned if it is free,
    /// otherwise `base.1`, `base.2` and so on are tried.
    pub fn unique_name(&self, base: &str) -> String {
        if !self.names.contains_key(base) {
            return base.to_owned();
        }

        (1..)
            .map(|n| format!("{base}.{n}"))
            .find(|name| !self.names.contains_key(name))
            .unwrap_or_else(|| base.to_owned())
    }

    /// Renames a function. `name` must not be used by any other function.
    pub fn rename_function(&mut self, func: Func, name: &str) {
        debug_assert!(
            self.find_function_by_name(name).is_none(),
            "function names must be unique"
        );

        let old = self.function(func).name().to_owned();

        self.names.remove(&old);
        self.names.insert(name.to_owned(), func);
        self.function_mut(func).set_name(name.to_owned());
    }

    /// Removes a function from the module, along with its metadata, returning it.
    ///
    /// Any calls to the function that remain are left dangling, it is up to
    /// the caller to make sure none exist.
    pub fn remove_function(&mut self, func: Func) -> Function {
        let removed = match self.functions[func].take() {
            Some(f) => f,
            None => panic!("{func:?} was removed from the module twice"),
        };

        self.names.remove(removed.name());
        self.metadata.remove_function(func);

        removed
    }

    /// Declares a new global variable.
    pub fn declare_global(
        &mut self,
        name: &str,
        ty: Type,
        space: AddrSpace,
        init: Option<Initializer>,
        linkage: Linkage,
    ) -> GlobalVar {
        debug_assert!(
            self.find_global_by_name(name).is_none(),
            "global names must be unique"
        );

        let gv = self.globals.insert(GlobalVariable {
            name: name.to_owned(),
            ty,
            space,
            init,
            linkage,
        });

        self.global_names.insert(name.to_owned(), gv);

        gv
    }

    /// Resolves a [`GlobalVar`].
    pub fn global(&self, gv: GlobalVar) -> &GlobalVariable {
        &self.globals[gv]
    }

    /// Finds a global with a given name.
    pub fn find_global_by_name(&self, name: &str) -> Option<GlobalVar> {
        self.global_names.get(name).copied()
    }

    /// Returns an iterator over every global in the module.
    pub fn globals(&self) -> impl Iterator<Item = GlobalVar> + '_ {
        self.globals.keys()
    }

    /// Gets the module metadata.
    pub fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    /// Gets the module metadata.
    pub fn metadata_mut(&mut self) -> &mut ModuleMetadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::*;

    #[test]
    fn unique_names() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let sig = SigBuilder::new().build();

        assert_eq!(module.unique_name("kernel"), "kernel");

        module.declare_function("kernel", sig.clone());
        module.declare_function("kernel.1", sig);

        assert_eq!(module.unique_name("kernel"), "kernel.2");
    }

    #[test]
    fn removal_keeps_keys_stable() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let sig = SigBuilder::new().build();
        let f = module.declare_function("f", sig.clone());
        let g = module.declare_function("g", sig);

        module.metadata_mut().set_entry(f);

        let removed = module.remove_function(f);

        assert_eq!(removed.name(), "f");
        assert!(!module.contains_function(f));
        assert!(module.contains_function(g));
        assert_eq!(module.functions().collect::<Vec<_>>(), vec![g]);
        assert_eq!(module.find_function_by_name("f"), None);
        assert!(!module.metadata().is_entry(f));

        module.rename_function(g, "f");

        assert_eq!(module.find_function_by_name("f"), Some(g));
        assert_eq!(module.function(g).name(), "f");
    }

    #[test]
    fn globals() {
        let mut module = Module::new("test", ShaderKind::Compute);
        let gv = module.declare_global(
            "ThreadGroupSize_X",
            Type::i32(),
            AddrSpace::Constant,
            Some(Initializer::Int(8)),
            Linkage::Internal,
        );

        assert_eq!(module.find_global_by_name("ThreadGroupSize_X"), Some(gv));
        assert_eq!(module.global(gv).int_initializer(), Some(8));
        assert_eq!(module.global(gv).addr_space(), AddrSpace::Constant);
    }
}
