//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::ir::Func;
use crate::utility::GaHashMap;
use smallvec::SmallVec;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// The source language flavor that a module was compiled from. This decides
/// how workgroup-shared state is allocated and how the group size is found.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum ShaderKind {
    /// OpenCL C kernels.
    OpenCL,
    /// Compute shaders from a graphics API.
    Compute,
}

/// Arguments that the runtime passes to a kernel without them appearing
/// in the kernel's source.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum ImplicitArg {
    /// A `<3 x i32>` holding the workgroup size in each dimension.
    LocalSize,
}

/// Per-function metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct FunctionMetadata {
    /// Whether the function is a kernel entry point.
    pub is_entry: bool,
    /// Implicit arguments, paired with the parameter index they arrive at.
    pub implicit_args: SmallVec<[(ImplicitArg, u32); 2]>,
    /// The work-group size the function must be launched with, if fixed.
    pub required_group_size: Option<[u32; 3]>,
}

impl FunctionMetadata {
    /// Gets the parameter index of an implicit argument, if the function has it.
    pub fn implicit_arg(&self, arg: ImplicitArg) -> Option<u32> {
        self.implicit_args
            .iter()
            .find(|(kind, _)| *kind == arg)
            .map(|(_, index)| *index)
    }
}

/// Module-level metadata: entry points, implicit arguments and the amount
/// of shared local memory (SLM) already claimed by the module.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ModuleMetadata {
    shader_kind: ShaderKind,
    functions: GaHashMap<Func, FunctionMetadata>,
    slm_size: u32,
}

impl ModuleMetadata {
    /// Creates empty metadata for a module of a given kind.
    pub fn new(shader_kind: ShaderKind) -> Self {
        Self {
            shader_kind,
            functions: GaHashMap::default(),
            slm_size: 0,
        }
    }

    /// Gets the kind of module this is.
    pub fn shader_kind(&self) -> ShaderKind {
        self.shader_kind
    }

    /// Gets the metadata of a function, if it has any.
    pub fn function(&self, func: Func) -> Option<&FunctionMetadata> {
        self.functions.get(&func)
    }

    /// Gets the metadata of a function, creating empty metadata if none existed.
    pub fn function_mut(&mut self, func: Func) -> &mut FunctionMetadata {
        self.functions.entry(func).or_default()
    }

    /// Marks a function as a kernel entry point.
    pub fn set_entry(&mut self, func: Func) {
        self.function_mut(func).is_entry = true;
    }

    /// Checks if a function is a kernel entry point.
    pub fn is_entry(&self, func: Func) -> bool {
        self.function(func).map_or(false, |md| md.is_entry)
    }

    /// Gets every entry point, in key order.
    pub fn entry_points(&self) -> Vec<Func> {
        let mut entries: Vec<Func> = self
            .functions
            .iter()
            .filter(|(_, md)| md.is_entry)
            .map(|(func, _)| *func)
            .collect();

        entries.sort();

        entries
    }

    /// Records that `func` receives `arg` at parameter `index`.
    pub fn add_implicit_arg(&mut self, func: Func, arg: ImplicitArg, index: u32) {
        self.function_mut(func).implicit_args.push((arg, index));
    }

    /// Shorthand for looking up an implicit argument of a function.
    pub fn implicit_arg(&self, func: Func, arg: ImplicitArg) -> Option<u32> {
        self.function(func).and_then(|md| md.implicit_arg(arg))
    }

    /// Gets the required work-group size of a function, if it has one.
    pub fn required_group_size(&self, func: Func) -> Option<[u32; 3]> {
        self.function(func).and_then(|md| md.required_group_size)
    }

    /// Sets the required work-group size of a function.
    pub fn set_required_group_size(&mut self, func: Func, size: [u32; 3]) {
        self.function_mut(func).required_group_size = Some(size);
    }

    /// Gets the number of bytes of SLM already claimed.
    pub fn slm_size(&self) -> u32 {
        self.slm_size
    }

    /// Updates the number of bytes of SLM claimed.
    pub fn set_slm_size(&mut self, size: u32) {
        self.slm_size = size;
    }

    /// Transfers everything recorded about `from` over to `to`, replacing
    /// anything `to` had. `from` is left without metadata.
    pub fn move_function(&mut self, from: Func, to: Func) {
        match self.functions.remove(&from) {
            Some(md) => {
                self.functions.insert(to, md);
            }
            None => {
                self.functions.remove(&to);
            }
        }
    }

    /// Drops all metadata for a function.
    pub fn remove_function(&mut self, func: Func) {
        self.functions.remove(&func);
    }
}

#[cfg(test)]
mod tests {
    use crate::arena::ArenaKey;
    use crate::ir::*;

    #[test]
    fn move_function_transfers_everything() {
        let (kernel, wrapper) = (Func::key_new(0), Func::key_new(1));
        let mut md = ModuleMetadata::new(ShaderKind::OpenCL);

        md.set_entry(kernel);
        md.add_implicit_arg(kernel, ImplicitArg::LocalSize, 2);
        md.set_required_group_size(kernel, [4, 1, 1]);
        md.move_function(kernel, wrapper);

        assert!(!md.is_entry(kernel));
        assert!(md.is_entry(wrapper));
        assert_eq!(md.implicit_arg(wrapper, ImplicitArg::LocalSize), Some(2));
        assert_eq!(md.required_group_size(wrapper), Some([4, 1, 1]));
        assert_eq!(md.entry_points(), vec![wrapper]);
    }
}
