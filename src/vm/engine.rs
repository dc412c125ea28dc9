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
use crate::utility::GaHashMap;
use crate::vm::memory::{Memory, Val, SLM};
use crate::vm::runtime::{FirstLanes, Machine, Status, WorkItem};
use crate::vm::ExecutionTrace;
use log::{debug, trace};
use smallvec::SmallVec;
use thiserror::Error;

/// A value passed from the host into a kernel parameter.
///
/// Scalars mirror the GIR scalar types. A buffer becomes its own region of
/// memory, and its final contents are reported back in [`ExecutionTrace::buffers`]
/// in the order the buffers were passed.
#[derive(Debug, Clone, PartialEq)]
pub enum SimArg {
    /// A `bool` value
    Bool(bool),
    /// An `i8` value
    Int8(u8),
    /// An `i16` value
    Int16(u16),
    /// An `i32` value
    Int32(u32),
    /// An `i64` value
    Int64(u64),
    /// An `f32` value
    Float32(f32),
    /// An `f64` value
    Float64(f64),
    /// The initial bytes of a buffer, passed as a pointer
    Buffer(Vec<u8>),
}

/// Describes the single workgroup that [`Simulator::run`] executes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WorkgroupConfig {
    /// The size of the workgroup in each dimension.
    pub local_size: [u32; 3],
    /// The value `workitem.group_id` yields in each dimension.
    pub group_id: [u32; 3],
    /// The number of instructions a single work-item may execute before the
    /// run is abandoned.
    pub step_limit: u64,
}

impl WorkgroupConfig {
    /// A one-dimensional workgroup of `size` work-items.
    pub fn linear(size: u32) -> Self {
        Self {
            local_size: [size, 1, 1],
            ..Self::default()
        }
    }

    /// The total number of work-items in the group.
    pub fn items(&self) -> usize {
        self.local_size.iter().map(|&n| n as usize).product()
    }
}

impl Default for WorkgroupConfig {
    fn default() -> Self {
        Self {
            local_size: [1, 1, 1],
            group_id: [0, 0, 0],
            step_limit: 1_000_000,
        }
    }
}

/// The ways a simulated workgroup can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    /// Some work-items are waiting at a barrier that the finished ones will never reach.
    #[error("barrier divergence in round {round}: {waiting} work-items waiting, {finished} finished")]
    BarrierDivergence {
        /// The number of barrier rounds completed before the divergence.
        round: u32,
        /// Work-items blocked on a barrier.
        waiting: usize,
        /// Work-items that already returned.
        finished: usize,
    },
    /// A work-item ran for too long, usually a loop that never exits.
    #[error("work-item {item} exceeded the limit of {limit} steps")]
    StepLimit {
        /// The work-item's linear index.
        item: usize,
        /// The limit that was exceeded.
        limit: u64,
    },
    /// A load, store or atomic touched memory outside of any region.
    #[error("work-item {item} accessed {size} bytes at invalid address {address:#x}")]
    BadMemoryAccess {
        /// The work-item's linear index.
        item: usize,
        /// The pointer that was dereferenced.
        address: u64,
        /// The size of the access in bytes.
        size: u64,
    },
    /// The module uses something the simulator cannot execute.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Executes a single workgroup of a kernel in lockstep-free SIMT fashion.
///
/// Every work-item runs until it either reaches a `barrier` or returns. Once
/// no work-item can make progress, either every work-item has finished, or every
/// unfinished one is waiting and the group is released into the next barrier
/// round. A mix of waiting and finished work-items is barrier divergence.
///
/// ```
/// # use garnet::ir::*;
/// # use garnet::vm::*;
/// let mut module = Module::new("test", ShaderKind::OpenCL);
/// let sig = SigBuilder::new().abi(CallConv::Kernel).build();
/// let mut b = module.define_function("k", sig);
/// let entry = b.create_block("entry");
///
/// b.switch_to(entry);
/// b.append().barrier(DebugInfo::fake());
/// b.append().ret_void(DebugInfo::fake());
///
/// let k = b.define();
/// let sim = Simulator::new(&module);
/// let trace = sim.run(k, &WorkgroupConfig::linear(4), &[]).unwrap();
///
/// assert_eq!(trace.barrier_rounds, 1);
/// ```
pub struct Simulator<'m> {
    module: &'m Module,
    slm_size: u32,
    locals: GaHashMap<GlobalVar, u32>,
}

impl<'m> Simulator<'m> {
    /// Prepares to run kernels from `module`. Workgroup-local globals are
    /// placed in SLM after the bytes the module has already reserved.
    pub fn new(module: &'m Module) -> Self {
        let mut slm_size = module.metadata().slm_size();
        let mut locals = GaHashMap::default();

        for gv in module.globals() {
            let global = module.global(gv);

            if global.addr_space() != AddrSpace::Local {
                continue;
            }

            let align = global.ty().align_bytes().max(1) as u32;
            let offset = (slm_size + align - 1) / align * align;

            locals.insert(gv, offset);
            slm_size = offset + global.ty().size_bytes() as u32;
        }

        Self {
            module,
            slm_size,
            locals,
        }
    }

    /// Gets the SLM byte offset that a workgroup-local global was placed at.
    pub fn slm_offset(&self, gv: GlobalVar) -> Option<u32> {
        self.locals.get(&gv).copied()
    }

    /// The total amount of SLM one workgroup uses.
    pub fn slm_size(&self) -> u32 {
        self.slm_size
    }

    /// Runs one workgroup of `kernel`. The `LocalSize` implicit argument is
    /// filled in from `config`, every other parameter takes the next value
    /// of `args`.
    pub fn run(
        &self,
        kernel: Func,
        config: &WorkgroupConfig,
        args: &[SimArg],
    ) -> Result<ExecutionTrace, SimError> {
        let count = config.items();

        if count == 0 {
            return Err(SimError::Unsupported("empty workgroup".to_owned()));
        }

        let mut m = Machine {
            module: self.module,
            memory: Memory::new(self.slm_size),
            globals: GaHashMap::default(),
            trace: ExecutionTrace {
                switch_iterations: vec![0; count],
                ..ExecutionTrace::default()
            },
            group_id: config.group_id,
            step_limit: config.step_limit,
            lanes: FirstLanes::default(),
        };

        self.place_globals(&mut m);

        let (params, buffers) = self.bind_args(&mut m.memory, kernel, config, args)?;
        let [lx, ly, _] = config.local_size;
        let mut items = Vec::with_capacity(count);

        for i in 0..count {
            let (lx, ly) = (lx as usize, ly as usize);
            let id = [i % lx, (i / lx) % ly, i / (lx * ly)].map(|n| n as u32);

            items.push(WorkItem::new(i, id, &mut m, kernel, params.clone())?);
        }

        debug!(
            target: "simt",
            "running '@{}' with {count} work-items",
            self.module.function(kernel).name()
        );

        loop {
            for item in items.iter_mut().filter(|item| item.status != Status::Finished) {
                item.run(&mut m)?;
            }

            let finished = items
                .iter()
                .filter(|item| item.status == Status::Finished)
                .count();

            if finished == count {
                break;
            }

            if finished != 0 {
                return Err(SimError::BarrierDivergence {
                    round: m.trace.barrier_rounds,
                    waiting: count - finished,
                    finished,
                });
            }

            m.trace.barrier_rounds += 1;

            trace!(target: "simt", "releasing barrier round {}", m.trace.barrier_rounds);
        }

        m.trace.buffers = buffers
            .iter()
            .map(|&region| m.memory.region(region).to_vec())
            .collect();

        m.trace.slm = m.memory.region(SLM).to_vec();

        Ok(m.trace)
    }

    fn place_globals(&self, m: &mut Machine<'_>) {
        for gv in self.module.globals() {
            let ptr = match self.locals.get(&gv) {
                Some(&offset) => Memory::pointer(SLM, offset as u64),
                None => {
                    let global = self.module.global(gv);
                    let size = global.ty().size_bytes() as usize;
                    let mut bytes = vec![0; size];

                    if let Some(Initializer::Int(v)) = global.initializer() {
                        let le = v.to_le_bytes();
                        let n = size.min(le.len());

                        bytes[..n].copy_from_slice(&le[..n]);
                    }

                    m.memory.allocate(bytes)
                }
            };

            m.globals.insert(gv, ptr);
        }
    }

    fn bind_args(
        &self,
        memory: &mut Memory,
        kernel: Func,
        config: &WorkgroupConfig,
        args: &[SimArg],
    ) -> Result<(SmallVec<[Val; 4]>, Vec<usize>), SimError> {
        let func = self.module.function(kernel);
        let local_size = self
            .module
            .metadata()
            .implicit_arg(kernel, ImplicitArg::LocalSize);

        let mut supplied = args.iter();
        let mut params = SmallVec::new();
        let mut buffers = Vec::new();

        for (i, &ty) in func.signature().params().iter().enumerate() {
            if local_size == Some(i as u32) {
                params.push(Val::Agg(config.local_size.iter().map(|&n| n as u64).collect()));

                continue;
            }

            let arg = supplied.next().ok_or_else(|| {
                SimError::Unsupported(format!("'@{}' expects more arguments", func.name()))
            })?;

            let value = match (arg, ty) {
                (SimArg::Bool(b), Type::Bool) => Val::Scalar(*b as u64),
                (SimArg::Int8(v), Type::Int(i)) if i.width() == 8 => Val::Scalar(*v as u64),
                (SimArg::Int16(v), Type::Int(i)) if i.width() == 16 => Val::Scalar(*v as u64),
                (SimArg::Int32(v), Type::Int(i)) if i.width() == 32 => Val::Scalar(*v as u64),
                (SimArg::Int64(v), Type::Int(i)) if i.width() == 64 => Val::Scalar(*v),
                (SimArg::Float32(v), Type::Float(FloatFormat::Single)) => {
                    Val::Scalar(v.to_bits() as u64)
                }
                (SimArg::Float64(v), Type::Float(FloatFormat::Double)) => Val::Scalar(v.to_bits()),
                (SimArg::Buffer(bytes), Type::Ptr(_)) => {
                    let ptr = memory.allocate(bytes.clone());

                    if let Some((region, _)) = Memory::decode(ptr) {
                        buffers.push(region);
                    }

                    Val::Scalar(ptr)
                }
                (arg, ty) => {
                    return Err(SimError::Unsupported(format!(
                        "cannot pass {arg:?} as parameter {i} of type '{ty}'"
                    )))
                }
            };

            params.push(value);
        }

        if supplied.next().is_some() {
            return Err(SimError::Unsupported(format!(
                "too many arguments for '@{}'",
                func.name()
            )));
        }

        Ok((params, buffers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel_sig(params: &[Type]) -> Signature {
        SigBuilder::new().params(params).abi(CallConv::Kernel).build()
    }

    // k(ptr.global %out):
    //   %lid = workitem.local_id 0
    //   %v = imul i32 %lid, 10
    //   %off = imul i32 %lid, 4
    //   %p = offset ptr.global %out, i32 %off
    //   store i32 %v, ptr %p
    //   ret void
    #[test]
    fn stores_reach_buffers() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let mut b = module.define_function("k", kernel_sig(&[Type::ptr(AddrSpace::Global)]));
        let entry = b.create_block("entry");
        let params = b.append_entry_params(entry, DebugInfo::fake());

        b.switch_to(entry);
        let lid = b.append().local_id(0, DebugInfo::fake());
        let ten = b.append().iconst(Type::i32(), 10, DebugInfo::fake());
        let four = b.append().iconst(Type::i32(), 4, DebugInfo::fake());
        let v = b.append().imul(lid, ten, DebugInfo::fake());
        let off = b.append().imul(lid, four, DebugInfo::fake());
        let p = b.append().offset(params[0], off, DebugInfo::fake());
        b.append().store(v, p, DebugInfo::fake());
        b.append().ret_void(DebugInfo::fake());

        let k = b.define();
        let sim = Simulator::new(&module);
        let trace = sim
            .run(k, &WorkgroupConfig::linear(4), &[SimArg::Buffer(vec![0; 16])])
            .unwrap();

        assert_eq!(trace.barrier_rounds, 0);

        for i in 0..4 {
            assert_eq!(trace.buffer_u32(0, i), Some(i as u32 * 10));
        }
    }

    // k():
    //   %lid = workitem.local_id 0
    //   %c = icmp ult i32 %lid, 2
    //   condbr bool %c, then, exit
    // then:
    //   barrier
    //   br exit
    // exit:
    //   ret void
    #[test]
    fn divergent_barriers_are_detected() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let mut b = module.define_function("k", kernel_sig(&[]));
        let entry = b.create_block("entry");
        let then = b.create_block("then");
        let exit = b.create_block("exit");

        b.switch_to(entry);
        let lid = b.append().local_id(0, DebugInfo::fake());
        let two = b.append().iconst(Type::i32(), 2, DebugInfo::fake());
        let c = b.append().icmp(ICmpOp::ULT, lid, two, DebugInfo::fake());
        b.append().condbr(
            c,
            BlockWithParams::to(then),
            BlockWithParams::to(exit),
            DebugInfo::fake(),
        );

        b.switch_to(then);
        b.append().barrier(DebugInfo::fake());
        b.append().br(BlockWithParams::to(exit), DebugInfo::fake());

        b.switch_to(exit);
        b.append().ret_void(DebugInfo::fake());

        let k = b.define();
        let sim = Simulator::new(&module);
        let err = sim.run(k, &WorkgroupConfig::linear(4), &[]).unwrap_err();

        assert_eq!(
            err,
            SimError::BarrierDivergence {
                round: 0,
                waiting: 2,
                finished: 2
            }
        );
    }

    // k(ptr.global %out):
    //   %lid = workitem.local_id 0
    //   %x = iadd i32 %lid, 10
    //   %r = readfirstlane i32 %x
    //   store i32 %r, ptr (offset %out, %lid * 4)
    //   ret void
    #[test]
    fn readfirstlane_broadcasts_the_first_work_item() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let mut b = module.define_function("k", kernel_sig(&[Type::ptr(AddrSpace::Global)]));
        let entry = b.create_block("entry");
        let params = b.append_entry_params(entry, DebugInfo::fake());

        b.switch_to(entry);
        let lid = b.append().local_id(0, DebugInfo::fake());
        let ten = b.append().iconst(Type::i32(), 10, DebugInfo::fake());
        let four = b.append().iconst(Type::i32(), 4, DebugInfo::fake());
        let x = b.append().iadd(lid, ten, DebugInfo::fake());
        let r = b.append().readfirstlane(x, DebugInfo::fake());
        let off = b.append().imul(lid, four, DebugInfo::fake());
        let p = b.append().offset(params[0], off, DebugInfo::fake());
        b.append().store(r, p, DebugInfo::fake());
        b.append().ret_void(DebugInfo::fake());

        let k = b.define();
        let sim = Simulator::new(&module);
        let trace = sim
            .run(k, &WorkgroupConfig::linear(4), &[SimArg::Buffer(vec![0; 16])])
            .unwrap();

        for i in 0..4 {
            assert_eq!(trace.buffer_u32(0, i), Some(10));
        }
    }

    // work-items 0 and 1 read before the barrier, 2 and 3 after it
    //
    // k(ptr.global %out):
    //   %lid = workitem.local_id 0
    //   %x = iadd i32 %lid, 10
    //   %c = icmp ult i32 %lid, 2
    //   condbr bool %c, read(0), sync
    // read(i32 %phase):
    //   %r = readfirstlane i32 %x
    //   store i32 %r, ptr (offset %out, (%lid * 2 + %phase) * 4)
    //   %first = icmp eq i32 %phase, 0
    //   condbr bool %first, sync, exit
    // sync:
    //   barrier
    //   condbr bool %c, exit, read(1)
    // exit:
    //   ret void
    #[test]
    fn readfirstlane_is_scoped_to_a_barrier_round() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let mut b = module.define_function("k", kernel_sig(&[Type::ptr(AddrSpace::Global)]));
        let entry = b.create_block("entry");
        let read = b.create_block("read");
        let sync = b.create_block("sync");
        let exit = b.create_block("exit");
        let params = b.append_entry_params(entry, DebugInfo::fake());
        let phase = b.append_block_param(read, Type::i32(), DebugInfo::fake());

        b.switch_to(entry);
        let lid = b.append().local_id(0, DebugInfo::fake());
        let zero = b.append().iconst(Type::i32(), 0, DebugInfo::fake());
        let one = b.append().iconst(Type::i32(), 1, DebugInfo::fake());
        let two = b.append().iconst(Type::i32(), 2, DebugInfo::fake());
        let four = b.append().iconst(Type::i32(), 4, DebugInfo::fake());
        let ten = b.append().iconst(Type::i32(), 10, DebugInfo::fake());
        let x = b.append().iadd(lid, ten, DebugInfo::fake());
        let c = b.append().icmp(ICmpOp::ULT, lid, two, DebugInfo::fake());
        b.append().condbr(
            c,
            BlockWithParams::new(read, &[zero]),
            BlockWithParams::to(sync),
            DebugInfo::fake(),
        );

        b.switch_to(read);
        let r = b.append().readfirstlane(x, DebugInfo::fake());
        let base = b.append().imul(lid, two, DebugInfo::fake());
        let slot = b.append().iadd(base, phase, DebugInfo::fake());
        let off = b.append().imul(slot, four, DebugInfo::fake());
        let p = b.append().offset(params[0], off, DebugInfo::fake());
        b.append().store(r, p, DebugInfo::fake());
        let first = b.append().icmp(ICmpOp::EQ, phase, zero, DebugInfo::fake());
        b.append().condbr(
            first,
            BlockWithParams::to(sync),
            BlockWithParams::to(exit),
            DebugInfo::fake(),
        );

        b.switch_to(sync);
        b.append().barrier(DebugInfo::fake());
        b.append().condbr(
            c,
            BlockWithParams::to(exit),
            BlockWithParams::new(read, &[one]),
            DebugInfo::fake(),
        );

        b.switch_to(exit);
        b.append().ret_void(DebugInfo::fake());

        let k = b.define();
        let sim = Simulator::new(&module);
        let trace = sim
            .run(k, &WorkgroupConfig::linear(4), &[SimArg::Buffer(vec![0; 32])])
            .unwrap();

        assert_eq!(trace.barrier_rounds, 1);

        // round 0 is led by work-item 0, round 1 by work-item 2
        assert_eq!(trace.buffer_u32(0, 0), Some(10));
        assert_eq!(trace.buffer_u32(0, 2), Some(10));
        assert_eq!(trace.buffer_u32(0, 5), Some(12));
        assert_eq!(trace.buffer_u32(0, 7), Some(12));
    }

    #[test]
    fn infinite_loops_hit_the_step_limit() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let mut b = module.define_function("k", kernel_sig(&[]));
        let entry = b.create_block("entry");
        let spin = b.create_block("spin");

        b.switch_to(entry);
        b.append().br(BlockWithParams::to(spin), DebugInfo::fake());

        b.switch_to(spin);
        b.append().br(BlockWithParams::to(spin), DebugInfo::fake());

        let k = b.define();
        let sim = Simulator::new(&module);
        let config = WorkgroupConfig {
            step_limit: 100,
            ..WorkgroupConfig::linear(2)
        };

        assert_eq!(
            sim.run(k, &config, &[]),
            Err(SimError::StepLimit {
                item: 0,
                limit: 100
            })
        );
    }

    // add(i32 %a, i32 %b) -> i32 { ret (iadd %a, %b) }
    //
    // k(ptr.global %out, i32 %x):
    //   %lid = workitem.local_id 0
    //   %r = call i32 @add(%lid, %x)
    //   barrier
    //   %off = imul i32 %lid, 4
    //   %p = offset ptr.global %out, i32 %off
    //   store i32 %r, ptr %p
    //   ret void
    #[test]
    fn calls_and_uniform_barriers() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let add_sig = SigBuilder::new()
            .params(&[Type::i32(), Type::i32()])
            .ret(Some(Type::i32()))
            .build();

        let mut b = module.define_function("add", add_sig);
        let entry = b.create_block("entry");
        let params = b.append_entry_params(entry, DebugInfo::fake());

        b.switch_to(entry);
        let sum = b.append().iadd(params[0], params[1], DebugInfo::fake());
        b.append().ret_val(sum, DebugInfo::fake());

        let add = b.define();
        let mut b = module.define_function(
            "k",
            kernel_sig(&[Type::ptr(AddrSpace::Global), Type::i32()]),
        );

        let entry = b.create_block("entry");
        let params = b.append_entry_params(entry, DebugInfo::fake());
        let sig = b.import_function(add);

        b.switch_to(entry);
        let lid = b.append().local_id(0, DebugInfo::fake());
        let call = b.append().call(add, sig, &[lid, params[1]], DebugInfo::fake());
        let r = b.inst_to_result(call).unwrap();
        b.append().barrier(DebugInfo::fake());
        let four = b.append().iconst(Type::i32(), 4, DebugInfo::fake());
        let off = b.append().imul(lid, four, DebugInfo::fake());
        let p = b.append().offset(params[0], off, DebugInfo::fake());
        b.append().store(r, p, DebugInfo::fake());
        b.append().ret_void(DebugInfo::fake());

        let k = b.define();
        let sim = Simulator::new(&module);
        let args = [SimArg::Buffer(vec![0; 12]), SimArg::Int32(100)];
        let trace = sim.run(k, &WorkgroupConfig::linear(3), &args).unwrap();

        assert_eq!(trace.barrier_rounds, 1);
        assert_eq!(trace.buffer_u32(0, 0), Some(100));
        assert_eq!(trace.buffer_u32(0, 2), Some(102));
    }

    #[test]
    fn local_globals_follow_reserved_slm() {
        let mut module = Module::new("test", ShaderKind::OpenCL);

        module.metadata_mut().set_slm_size(6);

        let gv = module.declare_global(
            "counter",
            Type::i32(),
            AddrSpace::Local,
            Some(Initializer::Undef),
            Linkage::Internal,
        );

        let sim = Simulator::new(&module);

        assert_eq!(sim.slm_offset(gv), Some(8));
        assert_eq!(sim.slm_size(), 12);
    }

    #[test]
    fn mismatched_arguments_are_rejected() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let mut b = module.define_function("k", kernel_sig(&[Type::i32()]));
        let entry = b.create_block("entry");

        b.append_entry_params(entry, DebugInfo::fake());
        b.switch_to(entry);
        b.append().ret_void(DebugInfo::fake());

        let k = b.define();
        let sim = Simulator::new(&module);

        assert!(matches!(
            sim.run(k, &WorkgroupConfig::linear(1), &[SimArg::Bool(true)]),
            Err(SimError::Unsupported(_))
        ));
    }
}
