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
use crate::transforms::barriers::InternalError;

/// Name of the workgroup-shared counter that OpenCL kernels count finished work-items in.
pub const DONE_COUNTER: &str = "__ThreadDoneCnt";

/// Names of the globals that a compute shader's group size is read from.
pub const THREAD_GROUP_SIZE: [&str; 3] = ["ThreadGroupSize_X", "ThreadGroupSize_Y", "ThreadGroupSize_Z"];

/// The parts of the transformation that depend on which frontend produced a kernel.
///
/// This is resolved once per kernel from the module metadata.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ShaderFlavor {
    /// OpenCL C. The group size arrives as an implicit argument, shared
    /// state is declared as `local` globals.
    OpenCLKernel,
    /// Compute shaders. The group size is known statically, shared state is
    /// carved out of the module's SLM directly.
    ComputeShaderKernel,
}

impl ShaderFlavor {
    /// Picks the flavor of every kernel in `module`.
    pub fn of(module: &Module) -> Self {
        match module.metadata().shader_kind() {
            ShaderKind::OpenCL => Self::OpenCLKernel,
            ShaderKind::Compute => Self::ComputeShaderKernel,
        }
    }

    /// Allocates the workgroup-shared `i32` that counts finished work-items,
    /// emitting whatever is needed to get a pointer to it at the cursor.
    ///
    /// Returns the pointer and the new SLM size of the module.
    pub fn allocate_counter_slot(
        self,
        module: &mut Module,
        cursor: &mut FuncCursor<'_>,
        slm_size: u32,
    ) -> (Value, u32) {
        match self {
            Self::OpenCLKernel => {
                let gv = match module.find_global_by_name(DONE_COUNTER) {
                    Some(gv) => gv,
                    None => module.declare_global(
                        DONE_COUNTER,
                        Type::i32(),
                        AddrSpace::Local,
                        Some(Initializer::Undef),
                        Linkage::Internal,
                    ),
                };

                let ptr = cursor
                    .insert()
                    .globaladdr(gv, AddrSpace::Local, DebugInfo::fake());

                (ptr, slm_size)
            }
            Self::ComputeShaderKernel => {
                let offset = align_to(slm_size, 4);
                let raw = cursor
                    .insert()
                    .iconst(Type::i64(), offset as u64, DebugInfo::fake());
                let ptr = cursor
                    .insert()
                    .itop(Type::ptr(AddrSpace::Local), raw, DebugInfo::fake());

                (ptr, offset + 4)
            }
        }
    }

    /// Emits the number of work-items in a workgroup of `func` at the cursor, as an `i32`.
    pub fn group_size(
        self,
        module: &Module,
        cursor: &mut FuncCursor<'_>,
        func: Func,
    ) -> Result<Value, InternalError> {
        match self {
            Self::OpenCLKernel => {
                let missing = || InternalError::MissingLocalSize {
                    func: module.function(func).name().to_owned(),
                };

                let index = module
                    .metadata()
                    .implicit_arg(func, ImplicitArg::LocalSize)
                    .ok_or_else(missing)?;

                let local_size = cursor
                    .layout()
                    .entry_block()
                    .and_then(|entry| cursor.dfg().block_params(entry).get(index as usize).copied())
                    .ok_or_else(missing)?;

                let ty = cursor.dfg().ty(local_size);
                let lanes = ty.len().unwrap_or(1);
                let mut total = if ty.is_vector() {
                    cursor.insert().extract(local_size, 0, DebugInfo::fake())
                } else {
                    local_size
                };

                for lane in 1..lanes {
                    let dim = cursor.insert().extract(local_size, lane, DebugInfo::fake());

                    total = cursor.insert().imul(total, dim, DebugInfo::fake());
                }

                cursor.dfg_mut().set_value_name(total, "totalGroupSize");

                Ok(total)
            }
            Self::ComputeShaderKernel => {
                let size = thread_group_size(module, func)?;

                Ok(cursor
                    .insert()
                    .iconst(Type::i32(), size as u64, DebugInfo::fake()))
            }
        }
    }

    /// Gets the group size of `func` if it can be known without running it.
    pub fn static_group_size(self, module: &Module, func: Func) -> Option<u32> {
        match self {
            Self::OpenCLKernel => module
                .metadata()
                .required_group_size(func)
                .and_then(|[x, y, z]| x.checked_mul(y)?.checked_mul(z)),
            Self::ComputeShaderKernel => thread_group_size(module, func).ok(),
        }
    }
}

fn thread_group_size(module: &Module, func: Func) -> Result<u32, InternalError> {
    THREAD_GROUP_SIZE.iter().try_fold(1u32, |total, name| {
        module
            .find_global_by_name(name)
            .and_then(|gv| module.global(gv).int_initializer())
            .and_then(|dim| u32::try_from(dim).ok())
            .and_then(|dim| total.checked_mul(dim))
            .ok_or_else(|| InternalError::MissingGroupSize {
                func: module.function(func).name().to_owned(),
                global: (*name).to_owned(),
            })
    })
}

fn align_to(value: u32, align: u32) -> u32 {
    (value + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel(kind: ShaderKind) -> (Module, Func) {
        let mut module = Module::new("test", kind);
        let sig = SigBuilder::new()
            .param(Type::ptr(AddrSpace::Global))
            .param(Type::vector(Type::i32(), 3))
            .abi(CallConv::Kernel)
            .build();

        let mut b = module.define_function("k", sig);
        let entry = b.create_block("entry");

        b.append_entry_params(entry, DebugInfo::fake());
        b.switch_to(entry);
        b.append().ret_void(DebugInfo::fake());

        let f = b.define();

        module.metadata_mut().set_entry(f);

        (module, f)
    }

    #[test]
    fn opencl_counter_is_a_local_global() {
        let (mut module, f) = kernel(ShaderKind::OpenCL);
        let mut def = module.function(f).definition().cloned().unwrap_or_default();
        let entry = def.entry_block().unwrap();
        let mut cursor = FuncCursor::over(&mut def);

        cursor.goto_before(entry);

        let flavor = ShaderFlavor::of(&module);
        let (ptr, slm) = flavor.allocate_counter_slot(&mut module, &mut cursor, 12);

        assert_eq!(flavor, ShaderFlavor::OpenCLKernel);
        assert_eq!(slm, 12);
        assert_eq!(cursor.dfg().ty(ptr), Type::ptr(AddrSpace::Local));

        let gv = module.find_global_by_name(DONE_COUNTER).unwrap();

        assert_eq!(module.global(gv).addr_space(), AddrSpace::Local);
        assert_eq!(module.global(gv).initializer(), Some(Initializer::Undef));

        // a second kernel shares the counter
        let (_, slm) = flavor.allocate_counter_slot(&mut module, &mut cursor, slm);

        assert_eq!(slm, 12);
        assert_eq!(module.globals().count(), 1);
    }

    #[test]
    fn opencl_group_size_multiplies_lanes() {
        let (mut module, f) = kernel(ShaderKind::OpenCL);
        let mut def = module.function(f).definition().cloned().unwrap_or_default();
        let entry = def.entry_block().unwrap();
        let mut cursor = FuncCursor::over(&mut def);

        cursor.goto_before(entry);

        assert!(matches!(
            ShaderFlavor::OpenCLKernel.group_size(&module, &mut cursor, f),
            Err(InternalError::MissingLocalSize { .. })
        ));

        module
            .metadata_mut()
            .add_implicit_arg(f, ImplicitArg::LocalSize, 1);

        let total = ShaderFlavor::OpenCLKernel
            .group_size(&module, &mut cursor, f)
            .unwrap();

        assert_eq!(cursor.dfg().value_name(total), Some("totalGroupSize"));
        assert!(matches!(cursor.dfg().inst_data(cursor.dfg().value_to_inst(total).unwrap()), InstData::IMul(_)));

        // extract, extract, imul, extract, imul, ret
        assert_eq!(def.layout.insts_in_block(entry).count(), 6);
    }

    #[test]
    fn compute_counter_is_carved_from_slm() {
        let (mut module, f) = kernel(ShaderKind::Compute);
        let mut def = module.function(f).definition().cloned().unwrap_or_default();
        let entry = def.entry_block().unwrap();
        let mut cursor = FuncCursor::over(&mut def);

        cursor.goto_before(entry);

        let flavor = ShaderFlavor::of(&module);
        let (ptr, slm) = flavor.allocate_counter_slot(&mut module, &mut cursor, 6);

        assert_eq!(slm, 12);
        assert_eq!(cursor.dfg().ty(ptr), Type::ptr(AddrSpace::Local));
        assert_eq!(module.globals().count(), 0);

        assert!(matches!(
            flavor.group_size(&module, &mut cursor, f),
            Err(InternalError::MissingGroupSize { .. })
        ));

        for (name, dim) in THREAD_GROUP_SIZE.iter().zip([4, 2, 1]) {
            module.declare_global(name, Type::i32(), AddrSpace::Constant, Some(Initializer::Int(dim)), Linkage::Internal);
        }

        let size = flavor.group_size(&module, &mut cursor, f).unwrap();

        assert_eq!(cursor.dfg().constant_value(size), Some(8));
        assert_eq!(flavor.static_group_size(&module, f), Some(8));
    }

    #[test]
    fn oversized_group_sizes_are_rejected() {
        let (mut module, f) = kernel(ShaderKind::Compute);
        let mut def = module.function(f).definition().cloned().unwrap_or_default();
        let entry = def.entry_block().unwrap();
        let mut cursor = FuncCursor::over(&mut def);

        cursor.goto_before(entry);

        // x * y overflows a u32, z doesn't fit in one
        for (name, dim) in THREAD_GROUP_SIZE.iter().zip([1 << 20, 1 << 20, 1 << 33]) {
            module.declare_global(name, Type::i64(), AddrSpace::Constant, Some(Initializer::Int(dim)), Linkage::Internal);
        }

        let flavor = ShaderFlavor::of(&module);

        assert!(matches!(
            flavor.group_size(&module, &mut cursor, f),
            Err(InternalError::MissingGroupSize { global, .. }) if global == THREAD_GROUP_SIZE[1]
        ));

        assert_eq!(flavor.static_group_size(&module, f), None);

        module.metadata_mut().set_required_group_size(f, [u32::MAX, 2, 1]);

        assert_eq!(ShaderFlavor::OpenCLKernel.static_group_size(&module, f), None);
    }
}
