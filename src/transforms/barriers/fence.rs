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

/// The conservative union of every `fence` in a kernel, used to re-create
/// the fences around the barriers in the dispatcher loop.
///
/// Flags only ever turn on. An operand that isn't a compile-time constant
/// turns its flag on, and a scope that isn't a constant becomes [`FenceScope::Gpu`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FenceArgs {
    flags: [bool; 8],
    scope: Option<FenceScope>,
}

impl FenceArgs {
    /// Creates a descriptor that hasn't seen any fences.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one fence into the descriptor.
    ///
    /// The scope is whatever the last fence specified, there's no attempt to
    /// widen it across fences with different constant scopes.
    pub fn accumulate(&mut self, dfg: &DataFlowGraph, fence: &FenceInst) {
        for (i, flag) in FenceFlag::ALL.iter().enumerate() {
            self.flags[i] |= dfg
                .constant_value(fence.flag(*flag))
                .map_or(true, |raw| raw != 0);
        }

        let scope = dfg
            .constant_value(fence.scope())
            .and_then(FenceScope::from_raw)
            .unwrap_or(FenceScope::Gpu);

        self.scope = Some(scope);
    }

    /// Folds every fence in `fences` into the descriptor, in order.
    pub fn accumulate_all(&mut self, def: &FunctionDefinition, fences: &[Inst]) {
        for &inst in fences {
            if let InstData::Fence(fence) = def.dfg.inst_data(inst) {
                self.accumulate(&def.dfg, fence);
            }
        }
    }

    /// Gets the value of one flag.
    pub fn flag(&self, flag: FenceFlag) -> bool {
        self.flags[flag as usize]
    }

    /// Gets the scope, or [`FenceScope::Gpu`] if no fence has been seen.
    pub fn scope(&self) -> FenceScope {
        self.scope.unwrap_or(FenceScope::Gpu)
    }

    /// Emits the descriptor as a `fence` with constant operands at the
    /// cursor's position.
    pub fn insert_fence(&self, cursor: &mut FuncCursor<'_>) -> Inst {
        let flags = FenceFlag::ALL.map(|flag| cursor.insert().bconst(self.flag(flag), DebugInfo::fake()));
        let scope = cursor
            .insert()
            .iconst(Type::i32(), self.scope() as u64, DebugInfo::fake());

        cursor.insert().fence(flags, scope, DebugInfo::fake())
    }
}

/// Folds every fence into one descriptor, then deletes each fence that is
/// immediately followed by a `barrier`. The dispatcher re-creates those in
/// front of its own barriers.
pub fn collect_and_absorb_fences(def: &mut FunctionDefinition, fences: &[Inst]) -> FenceArgs {
    let mut args = FenceArgs::new();

    args.accumulate_all(def, fences);

    for &fence in fences {
        let followed_by_barrier = def
            .layout
            .inst_next(fence)
            .map_or(false, |next| matches!(def.dfg.inst_data(next), InstData::Barrier(_)));

        if followed_by_barrier {
            log::trace!(target: "divergent-barrier", "absorbing fence {fence:?}");

            def.layout.remove_inst(fence);
        }
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fence(b: &mut FuncBuilder<'_>, set: &[FenceFlag], scope: Option<u64>, dynamic: Value) -> Inst {
        let mut flags = [dynamic; 8];

        for (i, flag) in FenceFlag::ALL.iter().enumerate() {
            flags[i] = b.append().bconst(set.contains(flag), DebugInfo::fake());
        }

        let scope = match scope {
            Some(raw) => b.append().iconst(Type::i32(), raw, DebugInfo::fake()),
            None => dynamic,
        };

        b.append().fence(flags, scope, DebugInfo::fake())
    }

    #[test]
    fn flags_are_ored_and_dynamic_scope_is_broadest() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let sig = SigBuilder::new().param(Type::i32()).build();
        let mut b = module.define_function("fences", sig);

        let entry = b.create_block("entry");
        let params = b.append_entry_params(entry, DebugInfo::fake());

        b.switch_to(entry);
        let first = fence(&mut b, &[FenceFlag::Global], Some(FenceScope::Group as u64), params[0]);
        let second = fence(&mut b, &[FenceFlag::L1Invalidate], None, params[0]);
        let third = fence(&mut b, &[], Some(FenceScope::Local as u64), params[0]);
        b.append().barrier(DebugInfo::fake());
        b.append().ret_void(DebugInfo::fake());

        let f = b.define();
        let def = module.function_mut(f).definition_mut().unwrap();

        let mut args = FenceArgs::new();
        args.accumulate_all(def, &[first, second]);

        assert!(args.flag(FenceFlag::Global));
        assert!(args.flag(FenceFlag::L1Invalidate));
        assert!(!args.flag(FenceFlag::L1Evict));
        assert_eq!(args.scope(), FenceScope::Gpu);

        // last write wins
        let args = collect_and_absorb_fences(def, &[first, second, third]);

        assert_eq!(args.scope(), FenceScope::Local);
        assert!(args.flag(FenceFlag::Global) && args.flag(FenceFlag::L1Invalidate));
        assert!(def.layout.is_inst_inserted(first));
        assert!(def.layout.is_inst_inserted(second));
        assert!(!def.layout.is_inst_inserted(third));
    }

    #[test]
    fn dynamic_flags_turn_on() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let sig = SigBuilder::new().param(Type::bool()).build();
        let mut b = module.define_function("fences", sig);

        let entry = b.create_block("entry");
        let params = b.append_entry_params(entry, DebugInfo::fake());

        b.switch_to(entry);
        let scope = b.append().iconst(Type::i32(), 0, DebugInfo::fake());
        let fence = b.append().fence([params[0]; 8], scope, DebugInfo::fake());
        b.append().ret_void(DebugInfo::fake());

        let f = b.define();
        let def = module.function(f).definition().unwrap();
        let mut args = FenceArgs::new();

        args.accumulate_all(def, &[fence]);

        assert!(FenceFlag::ALL.iter().all(|flag| args.flag(*flag)));
        assert_eq!(args.scope(), FenceScope::Group);
        assert_eq!(FenceArgs::new().scope(), FenceScope::Gpu);
    }
}
