//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::analysis::DivergenceOracle;
use crate::ir::*;
use crate::pass::{ModuleAnalysisManager, ModuleTransformPass, PreservedAnalyses};
use crate::transforms::barriers::*;
use crate::transforms::common::inline_call;
use crate::transforms::verify_module;
use log::{debug, error, info};

/// The message attached to every remark.
pub const REMARK_MESSAGE: &str = "Divergent Barriers detected and transformed";

/// An optimization remark, emitted for each kernel that was transformed
/// when remarks are enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remark {
    /// The kernel's name.
    pub function: String,
    /// What happened.
    pub message: String,
}

/// A summary of one transformed kernel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TransformedKernel {
    /// The dispatcher that replaced the kernel. It has the kernel's name.
    pub dispatcher: Func,
    /// How many continuations the kernel was split into, one more than the
    /// number of barriers.
    pub continuations: usize,
    /// The number of (definition, use) pairs that cross a barrier.
    pub spills: usize,
    /// The number of cases in the dispatcher's `switch`, one per barrier.
    pub switch_cases: usize,
}

/// Everything [`transform_module`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOutcome {
    /// Whether any function in the module changed.
    pub changed: bool,
    /// Each kernel that was transformed, in the order they were processed.
    pub transformed: Vec<TransformedKernel>,
    /// Remarks, empty unless [`DivergentBarrierOptions::enable_remarks`] is set.
    pub remarks: Vec<Remark>,
}

/// Checks whether any of `barriers` may be reached by only part of a workgroup.
pub fn has_divergent_barrier(ctx: &TransformContext, func: &Function, barriers: &[Inst]) -> bool {
    !barriers.is_empty()
        && barriers
            .iter()
            .any(|&barrier| ctx.oracle.is_workgroup_divergent(func, barrier))
}

fn collect_sync(def: &FunctionDefinition) -> (Vec<Inst>, Vec<Inst>) {
    let mut barriers = Vec::new();
    let mut fences = Vec::new();

    for block in def.layout.blocks() {
        for inst in def.layout.insts_in_block(block) {
            match def.dfg.inst_data(inst) {
                InstData::Barrier(_) => barriers.push(inst),
                InstData::Fence(_) => fences.push(inst),
                _ => {}
            }
        }
    }

    (barriers, fences)
}

/// Transforms a single kernel if it has a divergent barrier, replacing it with
/// a dispatcher of the same name. Returns `None` if the kernel was left alone.
///
/// `ctx` must have been created for `func` before anything in it was changed.
pub fn process_shader(
    ctx: &mut TransformContext,
    module: &mut Module,
    func: Func,
) -> Result<Option<TransformedKernel>, InternalError> {
    let (barriers, fences) = match module.function(func).definition() {
        Some(def) => collect_sync(def),
        None => return Ok(None),
    };

    if !has_divergent_barrier(ctx, module.function(func), &barriers) {
        return Ok(None);
    }

    let name = module.function(func).name().to_owned();

    debug!(
        target: "divergent-barrier",
        "'@{name}' has {} barriers and {} fences, transforming",
        barriers.len(),
        fences.len()
    );

    let spills = {
        let def = match module.function_mut(func).definition_mut() {
            Some(def) => def,
            None => return Ok(None),
        };

        ctx.fence = collect_and_absorb_fences(def, &fences);

        for &barrier in barriers.iter() {
            split_around(def, barrier);
        }

        let crossing = SuspendCrossingInfo::compute(def, &barriers);
        let spills = compute_spills(def, &crossing, &ctx.oracle);

        insert_spills(def, &spills);
        rewrite_returns(def);

        spills
    };

    let resumes = partition(module.function_mut(func), &barriers)?;
    let kernel_entry = match module.function(func).definition().and_then(|def| def.entry_block()) {
        Some(entry) => entry,
        None => return Ok(None),
    };

    // declare everything first, bodies refer to continuations only through the arena
    let mut arena = ContinuationArena::new();

    arena.push(Continuation {
        func: declare_continuation(module, func, &format!("{name}.entry")),
        entry: kernel_entry,
        ordinal: None,
    });

    for (ordinal, &block) in resumes.iter().enumerate() {
        arena.push(Continuation {
            func: declare_continuation(module, func, &format!("{name}.cont{ordinal}")),
            entry: block,
            ordinal: Some(ordinal as u32),
        });
    }

    let wrapper = {
        let kernel = module.function(func);
        let (sig, linkage) = (kernel.signature().clone(), kernel.linkage());
        let wrapper_name = module.unique_name(&format!("{name}.dispatch"));
        let wrapper = module.declare_function(&wrapper_name, sig);

        module.function_mut(wrapper).set_linkage(linkage);

        wrapper
    };

    for (_, cont) in arena.iter() {
        fill_continuation(module, func, cont.func, cont.entry);
    }

    module.metadata_mut().move_function(func, wrapper);
    module.remove_function(func);
    module.rename_function(wrapper, &name);

    let entry = match arena.entry() {
        Some(id) => arena[id].func,
        None => return Ok(None),
    };

    let table: Vec<(u32, Func)> = arena
        .resumes()
        .filter_map(|(_, cont)| cont.ordinal.map(|ordinal| (ordinal, cont.func)))
        .collect();

    let dispatcher = synthesize(ctx, module, wrapper, entry, &table)?;

    for &call in dispatcher.calls.iter() {
        inline_call(module, wrapper, call).map_err(|source| InternalError::Inline {
            func: name.clone(),
            source,
        })?;
    }

    for (_, cont) in arena.iter() {
        module.remove_function(cont.func);
    }

    if let Some(def) = module.function_mut(wrapper).definition_mut() {
        let reloads = lower_spill_fill(def);
        let promoted = promote_uniform_reloads(def, &reloads, &ctx.options);

        debug!(
            target: "divergent-barrier",
            "'@{name}' reloads {} spilled values, {promoted} broadcast",
            reloads.len()
        );
    }

    Ok(Some(TransformedKernel {
        dispatcher: wrapper,
        continuations: arena.len(),
        spills: spills.len(),
        switch_cases: dispatcher.cases,
    }))
}

/// Runs the divergent-barrier transformation over every kernel defined in `module`.
///
/// The whole module is verified afterwards, whether or not anything changed. On
/// error, the module is left in an unspecified (but memory-safe) state and shouldn't be used.
pub fn transform_module(
    module: &mut Module,
    options: &DivergentBarrierOptions,
) -> Result<TransformOutcome, InternalError> {
    transform_module_with(module, options, &ModuleAnalysisManager::new())
}

/// [`transform_module`], taking the flow graph and dominator trees of each kernel
/// from `am`. Results for kernels that get replaced are invalidated, kernels that
/// are left alone keep theirs.
pub fn transform_module_with(
    module: &mut Module,
    options: &DivergentBarrierOptions,
    am: &ModuleAnalysisManager,
) -> Result<TransformOutcome, InternalError> {
    let fam = am.function_analyses();
    let kernels: Vec<Func> = module
        .metadata()
        .entry_points()
        .into_iter()
        .filter(|&f| module.contains_function(f) && !module.function(f).is_decl())
        .collect();

    let mut outcome = TransformOutcome::default();
    let mut slm_size = module.metadata().slm_size();
    let flavor = ShaderFlavor::of(module);

    for func in kernels {
        let name = module.function(func).name().to_owned();

        if let Some(width) = options.forced_simd_width {
            if flavor.static_group_size(module, func) == Some(width) {
                debug!(
                    target: "divergent-barrier",
                    "skipping '@{name}', its group fits in one SIMD{width} thread"
                );

                continue;
            }
        }

        let mut ctx = TransformContext::with_analyses(*options, module, func, slm_size, fam);

        if let Some(kernel) = process_shader(&mut ctx, module, func)? {
            // the kernel was edited in place before being replaced, nothing cached for it holds
            fam.invalidate(func, &PreservedAnalyses::none());

            outcome.changed = true;
            outcome.transformed.push(kernel);

            if options.enable_remarks {
                info!(target: "remarks", "'@{name}': {REMARK_MESSAGE}");

                outcome.remarks.push(Remark {
                    function: name,
                    message: REMARK_MESSAGE.to_owned(),
                });
            }
        }

        slm_size = ctx.slm_size;
    }

    module.metadata_mut().set_slm_size(slm_size);

    verify_module(module).map_err(InternalError::Verify)?;

    Ok(outcome)
}

/// The divergent-barrier transformation as a module pass.
///
/// Any [`InternalError`] is fatal, the pass logs it and panics.
#[derive(Debug, Default)]
pub struct DivergentBarrierPass {
    options: DivergentBarrierOptions,
    last: Option<TransformOutcome>,
}

impl DivergentBarrierPass {
    /// Creates the pass with the given options.
    pub fn new(options: DivergentBarrierOptions) -> Self {
        Self { options, last: None }
    }

    /// Creates the pass with options read from the environment, see
    /// [`DivergentBarrierOptions::from_env`].
    pub fn from_env() -> Self {
        Self::new(DivergentBarrierOptions::from_env())
    }

    /// Gets what the most recent run of the pass did.
    pub fn last_outcome(&self) -> Option<&TransformOutcome> {
        self.last.as_ref()
    }
}

impl ModuleTransformPass for DivergentBarrierPass {
    fn run(&mut self, module: &mut Module, am: &ModuleAnalysisManager) -> PreservedAnalyses {
        match transform_module_with(module, &self.options, am) {
            Ok(outcome) => {
                let preserved = if outcome.changed {
                    PreservedAnalyses::none()
                } else {
                    PreservedAnalyses::all()
                };

                self.last = Some(outcome);

                preserved
            }
            Err(e) => {
                if let InternalError::Verify(errors) = &e {
                    for err in errors {
                        error!(target: "divergent-barrier", "{err}");
                    }
                }

                error!(target: "divergent-barrier", "{} failed: {e}", e.phase());

                panic!("divergent barrier transformation failed in '{}': {e}", module.name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::stringify_module;
    use crate::vm::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const WIDTH: u32 = 4;

    fn kernel_sig(kind: ShaderKind, extra: &[Type]) -> Signature {
        let mut params = vec![Type::ptr(AddrSpace::Global)];

        params.extend_from_slice(extra);

        if kind == ShaderKind::OpenCL {
            params.push(Type::vector(Type::i32(), 3));
        }

        SigBuilder::new().params(&params).abi(CallConv::Kernel).build()
    }

    fn finish(module: &mut Module, kind: ShaderKind, k: Func, params: usize) {
        module.metadata_mut().set_entry(k);

        match kind {
            ShaderKind::OpenCL => {
                module
                    .metadata_mut()
                    .add_implicit_arg(k, ImplicitArg::LocalSize, params as u32 - 1);
            }
            ShaderKind::Compute => {
                for (name, dim) in THREAD_GROUP_SIZE.iter().zip([WIDTH as u64, 1, 1]) {
                    module.declare_global(
                        name,
                        Type::i32(),
                        AddrSpace::Constant,
                        Some(Initializer::Int(dim)),
                        Linkage::Internal,
                    );
                }
            }
        }
    }

    // k(ptr.global %out, ...):
    //   %lid = workitem.local_id 0
    //   %v = imul i32 %lid, 3
    //   %u = iadd i32 (workitem.group_id 0), 7
    //   %c = icmp eq i32 %lid, 0
    //   condbr bool %c, first, join
    // first:
    //   barrier
    //   br join
    // join:
    //   barrier
    //   store i32 (iadd %v, %u), ptr (offset %out, %lid * 4)
    //   ret void
    fn two_barriers(kind: ShaderKind) -> (Module, Func) {
        let mut module = Module::new("test", kind);
        let mut b = module.define_function("k", kernel_sig(kind, &[]));
        let entry = b.create_block("entry");
        let first = b.create_block("first");
        let join = b.create_block("join");
        let params = b.append_entry_params(entry, DebugInfo::fake());

        b.switch_to(entry);
        let lid = b.append().local_id(0, DebugInfo::fake());
        let three = b.append().iconst(Type::i32(), 3, DebugInfo::fake());
        let v = b.append().imul(lid, three, DebugInfo::fake());
        let gid = b.append().group_id(0, DebugInfo::fake());
        let seven = b.append().iconst(Type::i32(), 7, DebugInfo::fake());
        let u = b.append().iadd(gid, seven, DebugInfo::fake());
        let zero = b.append().iconst(Type::i32(), 0, DebugInfo::fake());
        let c = b.append().icmp_eq(lid, zero, DebugInfo::fake());
        b.append().condbr(
            c,
            BlockWithParams::to(first),
            BlockWithParams::to(join),
            DebugInfo::fake(),
        );

        b.switch_to(first);
        b.append().barrier(DebugInfo::fake());
        b.append().br(BlockWithParams::to(join), DebugInfo::fake());

        b.switch_to(join);
        b.append().barrier(DebugInfo::fake());
        let sum = b.append().iadd(v, u, DebugInfo::fake());
        let four = b.append().iconst(Type::i32(), 4, DebugInfo::fake());
        let off = b.append().imul(lid, four, DebugInfo::fake());
        let p = b.append().offset(params[0], off, DebugInfo::fake());
        b.append().store(sum, p, DebugInfo::fake());
        b.append().ret_void(DebugInfo::fake());

        let k = b.define();
        let count = module.function(k).signature().params().len();

        finish(&mut module, kind, k, count);

        (module, k)
    }

    // k(ptr.global %out, ...):
    //   %lid = workitem.local_id 0
    //   %c = icmp ult i32 %lid, 2
    //   condbr bool %c, sync, exit
    // sync:
    //   barrier
    //   br exit
    // exit:
    //   store i32 %lid, ptr (offset %out, %lid * 4)
    //   ret void
    fn early_exit(kind: ShaderKind) -> (Module, Func) {
        let mut module = Module::new("test", kind);
        let mut b = module.define_function("k", kernel_sig(kind, &[]));
        let entry = b.create_block("entry");
        let sync = b.create_block("sync");
        let exit = b.create_block("exit");
        let params = b.append_entry_params(entry, DebugInfo::fake());

        b.switch_to(entry);
        let lid = b.append().local_id(0, DebugInfo::fake());
        let two = b.append().iconst(Type::i32(), 2, DebugInfo::fake());
        let c = b.append().icmp(ICmpOp::ULT, lid, two, DebugInfo::fake());
        b.append().condbr(
            c,
            BlockWithParams::to(sync),
            BlockWithParams::to(exit),
            DebugInfo::fake(),
        );

        b.switch_to(sync);
        b.append().barrier(DebugInfo::fake());
        b.append().br(BlockWithParams::to(exit), DebugInfo::fake());

        b.switch_to(exit);
        let four = b.append().iconst(Type::i32(), 4, DebugInfo::fake());
        let off = b.append().imul(lid, four, DebugInfo::fake());
        let p = b.append().offset(params[0], off, DebugInfo::fake());
        b.append().store(lid, p, DebugInfo::fake());
        b.append().ret_void(DebugInfo::fake());

        let k = b.define();
        let count = module.function(k).signature().params().len();

        finish(&mut module, kind, k, count);

        (module, k)
    }

    fn transform(module: &mut Module, options: &DivergentBarrierOptions) -> Func {
        transform_module(module, options).unwrap();

        module.find_function_by_name("k").unwrap()
    }

    fn run(module: &Module, kernel: Func, args: &[SimArg]) -> Result<ExecutionTrace, SimError> {
        Simulator::new(module).run(kernel, &WorkgroupConfig::linear(WIDTH), args)
    }

    fn output() -> SimArg {
        SimArg::Buffer(vec![0; WIDTH as usize * 4])
    }

    fn done_counter(module: &Module, trace: &ExecutionTrace) -> Option<u32> {
        match ShaderFlavor::of(module) {
            ShaderFlavor::OpenCLKernel => {
                let gv = module.find_global_by_name(DONE_COUNTER)?;
                let offset = Simulator::new(module).slm_offset(gv)?;

                trace.slm_u32(offset as usize)
            }
            ShaderFlavor::ComputeShaderKernel => trace.slm_u32(0),
        }
    }

    fn count_insts(module: &Module, f: Func, pred: fn(&InstData) -> bool) -> usize {
        let def = module.function(f).definition().unwrap();

        def.layout
            .blocks()
            .flat_map(|bb| def.layout.insts_in_block(bb))
            .filter(|&inst| pred(def.dfg.inst_data(inst)))
            .count()
    }

    #[test]
    fn uniform_kernels_are_untouched() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let mut b = module.define_function("k", kernel_sig(ShaderKind::OpenCL, &[]));
        let entry = b.create_block("entry");
        let params = b.append_entry_params(entry, DebugInfo::fake());

        b.switch_to(entry);
        let lid = b.append().local_id(0, DebugInfo::fake());
        b.append().barrier(DebugInfo::fake());
        b.append().store(lid, params[0], DebugInfo::fake());
        b.append().ret_void(DebugInfo::fake());

        let k = b.define();

        finish(&mut module, ShaderKind::OpenCL, k, 2);

        let before = stringify_module(&module);
        let outcome = transform_module(&mut module, &DivergentBarrierOptions::default()).unwrap();

        assert!(!outcome.changed);
        assert!(outcome.transformed.is_empty());
        assert_eq!(stringify_module(&module), before);
    }

    #[test]
    fn malformed_modules_are_rejected_even_when_unchanged() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let mut b = module.define_function("k", kernel_sig(ShaderKind::OpenCL, &[]));
        let entry = b.create_block("entry");

        b.append_entry_params(entry, DebugInfo::fake());
        b.switch_to(entry);
        let lid = b.append().local_id(0, DebugInfo::fake());
        b.append().barrier(DebugInfo::fake());

        // `k` returns void
        b.append().ret_val(lid, DebugInfo::fake());

        let k = b.define();

        finish(&mut module, ShaderKind::OpenCL, k, 2);

        assert!(matches!(
            transform_module(&mut module, &DivergentBarrierOptions::default()),
            Err(InternalError::Verify(_))
        ));
    }

    #[test]
    fn original_kernel_diverges() {
        let (module, k) = two_barriers(ShaderKind::OpenCL);

        assert_eq!(
            run(&module, k, &[output()]),
            Err(SimError::BarrierDivergence {
                round: 1,
                waiting: 1,
                finished: 3
            })
        );

        let (module, k) = early_exit(ShaderKind::OpenCL);

        assert_eq!(
            run(&module, k, &[output()]),
            Err(SimError::BarrierDivergence {
                round: 0,
                waiting: 2,
                finished: 2
            })
        );
    }

    #[test]
    fn dispatcher_replaces_the_kernel() {
        let (mut module, _) = two_barriers(ShaderKind::OpenCL);
        let outcome = transform_module(&mut module, &DivergentBarrierOptions::default()).unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.transformed.len(), 1);

        let kernel = outcome.transformed[0];

        assert_eq!(kernel.continuations, 3);
        assert_eq!(kernel.switch_cases, 2);
        assert_eq!(module.function(kernel.dispatcher).name(), "k");
        assert_eq!(module.metadata().entry_points(), vec![kernel.dispatcher]);
        assert_eq!(
            module.functions().count(),
            1,
            "continuations should be inlined and removed"
        );

        let def = module.function(kernel.dispatcher).definition().unwrap();

        assert!(def.layout.blocks().any(|bb| def.dfg.block_name(bb) == "switch"));
        assert_eq!(
            count_insts(&module, kernel.dispatcher, |d| matches!(d, InstData::Spill(_) | InstData::Fill(_))),
            0
        );
    }

    #[test]
    fn transformed_kernel_matches_uniform_semantics() {
        for kind in [ShaderKind::OpenCL, ShaderKind::Compute] {
            let (mut module, _) = two_barriers(kind);
            let k = transform(&mut module, &DivergentBarrierOptions::default());

            let trace = run(&module, k, &[output()]).unwrap();

            for lid in 0..WIDTH {
                assert_eq!(trace.buffer_u32(0, lid as usize), Some(lid * 3 + 7), "{kind:?}");
            }
        }
    }

    #[test]
    fn every_work_item_finishes_exactly_once() {
        let (mut module, _) = two_barriers(ShaderKind::OpenCL);
        let k = transform(&mut module, &DivergentBarrierOptions::default());

        let trace = run(&module, k, &[output()]).unwrap();

        assert_eq!(done_counter(&module, &trace), Some(WIDTH));

        for item in 0..WIDTH as usize {
            assert_eq!(trace.atomic_increments(item), 1);
        }
    }

    #[test]
    fn dispatch_loop_is_bounded_by_barrier_count() {
        let (mut module, _) = two_barriers(ShaderKind::OpenCL);
        let k = transform(&mut module, &DivergentBarrierOptions::default());

        let trace = run(&module, k, &[output()]).unwrap();
        let iterations = trace.switch_iterations[0];

        // 2 barriers in the kernel, item 0 needs both of them
        assert_eq!(iterations, 2);
        assert!(trace.switch_iterations.iter().all(|&n| n == iterations && n <= 3));
        assert_eq!(trace.barrier_rounds, 2 * iterations);
    }

    #[test]
    fn early_exits_no_longer_diverge() {
        for kind in [ShaderKind::OpenCL, ShaderKind::Compute] {
            let (mut module, _) = early_exit(kind);
            let k = transform(&mut module, &DivergentBarrierOptions::default());

            let trace = run(&module, k, &[output()]).unwrap();

            assert_eq!(trace.barrier_rounds, 2, "{kind:?}");
            assert_eq!(done_counter(&module, &trace), Some(WIDTH), "{kind:?}");

            for lid in 0..WIDTH {
                assert_eq!(trace.buffer_u32(0, lid as usize), Some(lid));
            }
        }
    }

    #[test]
    fn compute_shaders_reserve_slm() {
        let (mut module, _) = two_barriers(ShaderKind::Compute);

        module.metadata_mut().set_slm_size(2);
        transform_module(&mut module, &DivergentBarrierOptions::default()).unwrap();

        assert_eq!(module.metadata().slm_size(), 8);
        assert!(module.find_global_by_name(DONE_COUNTER).is_none());
    }

    #[test]
    fn uniform_reloads_keep_results() {
        let (mut plain, _) = two_barriers(ShaderKind::OpenCL);
        let (mut broadcast, _) = two_barriers(ShaderKind::OpenCL);
        let options = DivergentBarrierOptions {
            uniform_reload: true,
            ..DivergentBarrierOptions::default()
        };

        let k = transform(&mut plain, &DivergentBarrierOptions::default());
        let k2 = transform(&mut broadcast, &options);

        let is_rfl = |d: &InstData| matches!(d, InstData::ReadFirstLane(_));

        assert_eq!(count_insts(&plain, k, is_rfl), 0);
        assert!(count_insts(&broadcast, k2, is_rfl) > 0);

        let config = WorkgroupConfig {
            group_id: [3, 0, 0],
            ..WorkgroupConfig::linear(WIDTH)
        };

        let lhs = Simulator::new(&plain).run(k, &config, &[output()]).unwrap();
        let rhs = Simulator::new(&broadcast).run(k2, &config, &[output()]).unwrap();

        assert_eq!(lhs.buffers, rhs.buffers);

        // a broadcast of `%v` would hand every work-item the value of work-item 0
        for lid in 0..WIDTH {
            assert_eq!(rhs.buffer_u32(0, lid as usize), Some(lid * 3 + 10));
        }
    }

    #[test]
    fn uniform_reloads_need_lane_broadcast() {
        let (mut module, _) = two_barriers(ShaderKind::OpenCL);
        let options = DivergentBarrierOptions {
            uniform_reload: true,
            target: TargetCaps {
                supports_lane_broadcast: false,
            },
            ..DivergentBarrierOptions::default()
        };

        let k = transform(&mut module, &options);

        assert_eq!(
            count_insts(&module, k, |d| matches!(d, InstData::ReadFirstLane(_))),
            0
        );
    }

    // k(ptr.global %out, i32 %scope, <3 x i32> %size):
    //   %c = icmp eq i32 (workitem.local_id 0), 0
    //   condbr bool %c, first, join
    // first:
    //   fence <first>, %scope
    //   barrier
    //   br join
    // join:
    //   fence <second>, <second scope>
    //   barrier
    //   ret void
    fn fenced(first: [bool; 8], second: [bool; 8], scope: Option<FenceScope>) -> Module {
        let kind = ShaderKind::OpenCL;
        let mut module = Module::new("test", kind);
        let mut b = module.define_function("k", kernel_sig(kind, &[Type::i32()]));
        let entry = b.create_block("entry");
        let then = b.create_block("first");
        let join = b.create_block("join");
        let params = b.append_entry_params(entry, DebugInfo::fake());

        b.switch_to(entry);
        let lid = b.append().local_id(0, DebugInfo::fake());
        let zero = b.append().iconst(Type::i32(), 0, DebugInfo::fake());
        let c = b.append().icmp_eq(lid, zero, DebugInfo::fake());
        b.append().condbr(
            c,
            BlockWithParams::to(then),
            BlockWithParams::to(join),
            DebugInfo::fake(),
        );

        b.switch_to(then);
        let flags = first.map(|set| b.append().bconst(set, DebugInfo::fake()));
        b.append().fence(flags, params[1], DebugInfo::fake());
        b.append().barrier(DebugInfo::fake());
        b.append().br(BlockWithParams::to(join), DebugInfo::fake());

        b.switch_to(join);
        let flags = second.map(|set| b.append().bconst(set, DebugInfo::fake()));
        let scope = match scope {
            Some(scope) => b.append().iconst(Type::i32(), scope as u64, DebugInfo::fake()),
            None => params[1],
        };

        b.append().fence(flags, scope, DebugInfo::fake());
        b.append().barrier(DebugInfo::fake());
        b.append().ret_void(DebugInfo::fake());

        let k = b.define();

        finish(&mut module, kind, k, 3);

        module
    }

    fn flags(set: &[FenceFlag]) -> [bool; 8] {
        FenceFlag::ALL.map(|flag| set.contains(&flag))
    }

    #[test]
    fn fences_are_merged_into_the_dispatcher() {
        let first = flags(&[FenceFlag::CommitEnable, FenceFlag::Global]);
        let second = flags(&[FenceFlag::L1Invalidate]);
        let mut module = fenced(first, second, Some(FenceScope::Local));
        let k = transform(&mut module, &DivergentBarrierOptions::default());

        // one before the first barrier, one at the end of every round
        assert_eq!(count_insts(&module, k, |d| matches!(d, InstData::Fence(_))), 2);

        let args = [output(), SimArg::Int32(FenceScope::Group as u32)];
        let trace = run(&module, k, &args).unwrap();
        let expected = flags(&[
            FenceFlag::CommitEnable,
            FenceFlag::Global,
            FenceFlag::L1Invalidate,
        ]);

        assert!(!trace.fences.is_empty());

        for fence in trace.fences.iter() {
            assert_eq!(fence.flags, expected);
            assert_eq!(fence.scope, FenceScope::Local as u64);
        }
    }

    #[test]
    fn dynamic_fence_scopes_become_gpu() {
        let mut module = fenced([true; 8], [false; 8], None);
        let k = transform(&mut module, &DivergentBarrierOptions::default());
        let trace = run(&module, k, &[output(), SimArg::Int32(0)]).unwrap();

        assert!(!trace.fences.is_empty());
        assert!(trace
            .fences
            .iter()
            .all(|fence| fence.scope == FenceScope::Gpu as u64 && fence.flags == [true; 8]));
    }

    #[test]
    fn forced_simd_width_skips_fitting_groups() {
        let (mut module, k) = early_exit(ShaderKind::OpenCL);

        module.metadata_mut().set_required_group_size(k, [WIDTH, 1, 1]);

        let fits = DivergentBarrierOptions {
            forced_simd_width: Some(WIDTH),
            ..DivergentBarrierOptions::default()
        };

        assert!(!transform_module(&mut module, &fits).unwrap().changed);

        let wider = DivergentBarrierOptions {
            forced_simd_width: Some(WIDTH * 2),
            ..DivergentBarrierOptions::default()
        };

        assert!(transform_module(&mut module, &wider).unwrap().changed);
    }

    #[test]
    fn remarks_name_the_kernel() {
        let (mut module, _) = early_exit(ShaderKind::OpenCL);
        let options = DivergentBarrierOptions {
            enable_remarks: true,
            ..DivergentBarrierOptions::default()
        };

        let outcome = transform_module(&mut module, &options).unwrap();

        assert_eq!(
            outcome.remarks,
            vec![Remark {
                function: "k".to_owned(),
                message: REMARK_MESSAGE.to_owned(),
            }]
        );

        let (mut module, _) = early_exit(ShaderKind::OpenCL);
        let outcome = transform_module(&mut module, &DivergentBarrierOptions::default()).unwrap();

        assert!(outcome.remarks.is_empty());
    }

    #[test]
    fn pass_reports_preserved_analyses() {
        let mam = ModuleAnalysisManager::new();
        let mut pass = DivergentBarrierPass::default();
        let (mut module, _) = early_exit(ShaderKind::OpenCL);

        assert!(!pass.run(&mut module, &mam).preserves_all());
        assert_eq!(pass.last_outcome().map(|o| o.transformed.len()), Some(1));

        let (mut module, _) = two_barriers(ShaderKind::OpenCL);
        let mut pass = DivergentBarrierPass::new(DivergentBarrierOptions {
            forced_simd_width: Some(WIDTH),
            ..DivergentBarrierOptions::default()
        });

        // no required group size, so nothing can be skipped
        assert!(!pass.run(&mut module, &mam).preserves_all());
    }

    #[test]
    fn kernel_analyses_come_from_the_manager() {
        let mam = ModuleAnalysisManager::new();
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let mut b = module.define_function("k", kernel_sig(ShaderKind::OpenCL, &[]));
        let entry = b.create_block("entry");
        let _params = b.append_entry_params(entry, DebugInfo::fake());

        b.switch_to(entry);
        b.append().barrier(DebugInfo::fake());
        b.append().ret_void(DebugInfo::fake());

        let k = b.define();

        finish(&mut module, ShaderKind::OpenCL, k, 2);

        let options = DivergentBarrierOptions::default();
        let outcome = transform_module_with(&mut module, &options, &mam).unwrap();

        // flow graph plus both dominator trees, kept since the kernel wasn't touched
        assert!(!outcome.changed);
        assert_eq!(mam.function_analyses().cached_results(), 3);

        transform_module_with(&mut module, &options, &mam).unwrap();

        assert_eq!(mam.function_analyses().cached_results(), 3);

        let mam = ModuleAnalysisManager::new();
        let (mut module, _) = early_exit(ShaderKind::OpenCL);
        let outcome = transform_module_with(&mut module, &options, &mam).unwrap();

        assert!(outcome.changed);
        assert_eq!(mam.function_analyses().cached_results(), 0);
    }

    // k(ptr.global %out, <3 x i32> %size):
    //   %lid = workitem.local_id 0
    //   %x = iadd i32 %lid, <addend>
    //   %c = icmp ult i32 %lid, <threshold>
    //   condbr bool %c, sync, exit
    // sync:
    //   barrier
    //   br exit
    // exit:
    //   store i32 %x, ptr (offset %out, %lid * 4)
    //   ret void
    fn threshold(limit: u32, addend: u32) -> Module {
        let kind = ShaderKind::OpenCL;
        let mut module = Module::new("test", kind);
        let mut b = module.define_function("k", kernel_sig(kind, &[]));
        let entry = b.create_block("entry");
        let sync = b.create_block("sync");
        let exit = b.create_block("exit");
        let params = b.append_entry_params(entry, DebugInfo::fake());

        b.switch_to(entry);
        let lid = b.append().local_id(0, DebugInfo::fake());
        let addend = b.append().iconst(Type::i32(), addend as u64, DebugInfo::fake());
        let x = b.append().iadd(lid, addend, DebugInfo::fake());
        let limit = b.append().iconst(Type::i32(), limit as u64, DebugInfo::fake());
        let c = b.append().icmp(ICmpOp::ULT, lid, limit, DebugInfo::fake());
        b.append().condbr(
            c,
            BlockWithParams::to(sync),
            BlockWithParams::to(exit),
            DebugInfo::fake(),
        );

        b.switch_to(sync);
        b.append().barrier(DebugInfo::fake());
        b.append().br(BlockWithParams::to(exit), DebugInfo::fake());

        b.switch_to(exit);
        let four = b.append().iconst(Type::i32(), 4, DebugInfo::fake());
        let off = b.append().imul(lid, four, DebugInfo::fake());
        let p = b.append().offset(params[0], off, DebugInfo::fake());
        b.append().store(x, p, DebugInfo::fake());
        b.append().ret_void(DebugInfo::fake());

        let k = b.define();

        finish(&mut module, kind, k, 2);

        module
    }

    #[test]
    fn random_thresholds_never_diverge() {
        let mut rng = StdRng::seed_from_u64(0x6172_6e65);

        for _ in 0..16 {
            let limit = rng.gen_range(0..=WIDTH);
            let addend = rng.gen_range(0..1000);
            let mut module = threshold(limit, addend);
            let original = module.find_function_by_name("k").unwrap();
            let before = run(&module, original, &[output()]);

            if limit != 0 && limit != WIDTH {
                assert!(matches!(before, Err(SimError::BarrierDivergence { .. })));
            }

            let k = transform(&mut module, &DivergentBarrierOptions::default());
            let trace = run(&module, k, &[output()]).unwrap();

            assert_eq!(done_counter(&module, &trace), Some(WIDTH), "limit {limit}");

            for lid in 0..WIDTH {
                assert_eq!(trace.buffer_u32(0, lid as usize), Some(lid + addend));
            }
        }
    }
}
