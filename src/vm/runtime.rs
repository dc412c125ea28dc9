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
use crate::vm::memory::{truncate, Memory, Val, SLM};
use crate::vm::{AtomicRecord, ExecutionTrace, FenceRecord, SimError};
use smallvec::SmallVec;

/// State shared by every work-item in the workgroup.
pub(in crate::vm) struct Machine<'m> {
    pub(in crate::vm) module: &'m Module,
    pub(in crate::vm) memory: Memory,
    pub(in crate::vm) globals: GaHashMap<GlobalVar, u64>,
    pub(in crate::vm) trace: ExecutionTrace,
    pub(in crate::vm) group_id: [u32; 3],
    pub(in crate::vm) step_limit: u64,
    pub(in crate::vm) lanes: FirstLanes,
}

/// The values `readfirstlane` broadcasts. Within one barrier round the n-th
/// execution of an instruction by any work-item sees whatever the first
/// work-item to get there computed for its own n-th execution.
#[derive(Debug, Default)]
pub(in crate::vm) struct FirstLanes {
    // (func, inst, round, n) -> value
    values: GaHashMap<(Func, Inst, u32, u32), Val>,
    // (item, func, inst, round) -> executions so far
    seen: GaHashMap<(usize, Func, Inst, u32), u32>,
}

impl FirstLanes {
    fn broadcast(&mut self, item: usize, func: Func, inst: Inst, round: u32, own: Val) -> Val {
        let count = self.seen.entry((item, func, inst, round)).or_insert(0);
        let nth = *count;

        *count += 1;

        self.values.entry((func, inst, round, nth)).or_insert(own).clone()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(in crate::vm) enum Status {
    Running,
    Waiting,
    Finished,
}

struct Frame {
    func: Func,
    next: Option<Inst>,
    values: GaHashMap<Value, Val>,
    // where the caller wants the result
    result: Option<Value>,
}

enum Flow {
    Continue,
    Barrier,
    Jump(Block, SmallVec<[Val; 4]>),
    Call(Func, SmallVec<[Val; 4]>, Option<Value>),
    Return(Option<Val>),
}

/// A single work-item, interpreting one call stack.
pub(in crate::vm) struct WorkItem {
    pub(in crate::vm) index: usize,
    pub(in crate::vm) local_id: [u32; 3],
    pub(in crate::vm) status: Status,
    frames: Vec<Frame>,
    steps: u64,
}

impl WorkItem {
    pub(in crate::vm) fn new(
        index: usize,
        local_id: [u32; 3],
        m: &mut Machine<'_>,
        kernel: Func,
        args: SmallVec<[Val; 4]>,
    ) -> Result<Self, SimError> {
        let mut item = Self {
            index,
            local_id,
            status: Status::Running,
            frames: Vec::new(),
            steps: 0,
        };

        item.call(m, kernel, args, None)?;

        Ok(item)
    }

    /// Runs until the work-item reaches a barrier or returns from the kernel.
    pub(in crate::vm) fn run(&mut self, m: &mut Machine<'_>) -> Result<Status, SimError> {
        self.status = Status::Running;

        while self.status == Status::Running {
            if self.steps >= m.step_limit {
                return Err(SimError::StepLimit {
                    item: self.index,
                    limit: m.step_limit,
                });
            }

            self.steps += 1;

            match self.step(m)? {
                Flow::Continue => {}
                Flow::Barrier => self.status = Status::Waiting,
                Flow::Jump(block, args) => self.enter(m, block, &args)?,
                Flow::Call(callee, args, result) => self.call(m, callee, args, result)?,
                Flow::Return(value) => self.ret(value),
            }
        }

        Ok(self.status)
    }

    fn frame(&mut self) -> Result<&mut Frame, SimError> {
        self.frames
            .last_mut()
            .ok_or_else(|| SimError::Unsupported("work-item has no frame".to_owned()))
    }

    fn def<'m>(m: &Machine<'m>, func: Func) -> Result<&'m FunctionDefinition, SimError> {
        let module = m.module;
        let f = module.function(func);

        f.definition()
            .ok_or_else(|| SimError::Unsupported(format!("call to declaration '@{}'", f.name())))
    }

    fn call(
        &mut self,
        m: &mut Machine<'_>,
        callee: Func,
        args: SmallVec<[Val; 4]>,
        result: Option<Value>,
    ) -> Result<(), SimError> {
        let def = Self::def(m, callee)?;
        let entry = def
            .entry_block()
            .ok_or_else(|| SimError::Unsupported("function without an entry block".to_owned()))?;

        self.frames.push(Frame {
            func: callee,
            next: None,
            values: GaHashMap::default(),
            result,
        });

        self.enter(m, entry, &args)
    }

    fn ret(&mut self, value: Option<Val>) {
        let finished = match self.frames.pop() {
            Some(frame) => frame,
            None => {
                self.status = Status::Finished;

                return;
            }
        };

        match self.frames.last_mut() {
            Some(caller) => {
                if let (Some(result), Some(value)) = (finished.result, value) {
                    caller.values.insert(result, value);
                }
            }
            None => self.status = Status::Finished,
        }
    }

    fn enter(&mut self, m: &mut Machine<'_>, block: Block, args: &[Val]) -> Result<(), SimError> {
        let func = self.frame()?.func;
        let def = Self::def(m, func)?;
        let params = def.dfg.block_params(block);

        if params.len() != args.len() {
            return Err(SimError::Unsupported(format!(
                "'{}' expects {} arguments, got {}",
                def.dfg.block_name(block),
                params.len(),
                args.len()
            )));
        }

        if def.dfg.block_name(block) == "switch" {
            if let Some(count) = m.trace.switch_iterations.get_mut(self.index) {
                *count += 1;
            }
        }

        let frame = self.frame()?;

        for (&param, arg) in params.iter().zip(args.iter()) {
            frame.values.insert(param, arg.clone());
        }

        frame.next = def.layout.block_first_inst(block);

        Ok(())
    }

    fn step(&mut self, m: &mut Machine<'_>) -> Result<Flow, SimError> {
        let index = self.index;
        let local_id = self.local_id;
        let frame = self.frame()?;
        let def = Self::def(m, frame.func)?;
        let inst = frame
            .next
            .ok_or_else(|| SimError::Unsupported("fell off the end of a block".to_owned()))?;

        frame.next = def.layout.inst_next(inst);

        let data = def.dfg.inst_data(inst);
        let result_ty = data.result_ty();
        let get = |v: Value| -> Result<Val, SimError> {
            frame
                .values
                .get(&v)
                .cloned()
                .ok_or_else(|| SimError::Unsupported(format!("use of undefined {v:?}")))
        };

        let scalar = |v: Value| -> Result<u64, SimError> {
            get(v)?
                .scalar()
                .ok_or_else(|| SimError::Unsupported(format!("{v:?} is not a scalar")))
        };

        let bad_access = |address: u64, size: u64| SimError::BadMemoryAccess {
            item: index,
            address,
            size,
        };

        let value: Option<Val> = match data {
            InstData::Call(call) => {
                let args = call
                    .args()
                    .iter()
                    .map(|&arg| get(arg))
                    .collect::<Result<SmallVec<[Val; 4]>, SimError>>()?;

                return Ok(Flow::Call(call.callee(), args, def.dfg.inst_to_result(inst)));
            }
            InstData::ICmp(icmp) => {
                let ty = def.dfg.ty(icmp.lhs());
                let (a, b) = (scalar(icmp.lhs())?, scalar(icmp.rhs())?);
                let (sa, sb) = match ty {
                    Type::Int(i) => (i.sign_extend(a), i.sign_extend(b)),
                    _ => (a as i64, b as i64),
                };

                let out = match icmp.op() {
                    ICmpOp::EQ => a == b,
                    ICmpOp::NE => a != b,
                    ICmpOp::SGT => sa > sb,
                    ICmpOp::SLT => sa < sb,
                    ICmpOp::SGE => sa >= sb,
                    ICmpOp::SLE => sa <= sb,
                    ICmpOp::UGT => a > b,
                    ICmpOp::ULT => a < b,
                    ICmpOp::UGE => a >= b,
                    ICmpOp::ULE => a <= b,
                };

                Some(Val::Scalar(out as u64))
            }
            InstData::Sel(sel) => {
                let picked = if scalar(sel.condition())? != 0 {
                    sel.if_true()
                } else {
                    sel.if_false()
                };

                Some(get(picked)?)
            }
            InstData::Br(br) => return jump(br.target(), &get),
            InstData::CondBr(condbr) => {
                let target = if scalar(condbr.condition())? != 0 {
                    condbr.true_branch()
                } else {
                    condbr.false_branch()
                };

                return jump(target, &get);
            }
            InstData::Switch(switch) => {
                let raw = scalar(switch.scrutinee())?;
                let value = match def.dfg.ty(switch.scrutinee()) {
                    Type::Int(i) => i.sign_extend(raw),
                    _ => raw as i64,
                };

                return Ok(Flow::Jump(switch.target_for(value), SmallVec::new()));
            }
            InstData::Unreachable(_) => {
                return Err(SimError::Unsupported("executed `unreachable`".to_owned()))
            }
            InstData::Ret(ret) => {
                let value = ret.value().map(&get).transpose()?;

                return Ok(Flow::Return(value));
            }
            InstData::And(a) | InstData::Or(a) | InstData::Xor(a) | InstData::IAdd(a) | InstData::IMul(a) => {
                let (lhs, rhs) = (scalar(a.lhs())?, scalar(a.rhs())?);
                let out = match data {
                    InstData::And(_) => lhs & rhs,
                    InstData::Or(_) => lhs | rhs,
                    InstData::Xor(_) => lhs ^ rhs,
                    InstData::IAdd(_) => lhs.wrapping_add(rhs),
                    _ => lhs.wrapping_mul(rhs),
                };

                Some(Val::Scalar(out))
            }
            InstData::Shl(a) | InstData::LShr(a) | InstData::ISub(a) | InstData::UDiv(a) => {
                let (lhs, rhs) = (scalar(a.lhs())?, scalar(a.rhs())?);
                let width = result_ty.map_or(64, |ty| ty.size_bytes() * 8);
                let out = match data {
                    InstData::Shl(_) => lhs.wrapping_shl((rhs % width) as u32),
                    InstData::LShr(_) => lhs.wrapping_shr((rhs % width) as u32),
                    InstData::ISub(_) => lhs.wrapping_sub(rhs),
                    _ => match lhs.checked_div(rhs) {
                        Some(out) => out,
                        None => return Err(SimError::Unsupported("division by zero".to_owned())),
                    },
                };

                Some(Val::Scalar(out))
            }
            InstData::FAdd(a) | InstData::FMul(a) => {
                let (lhs, rhs) = (scalar(a.lhs())?, scalar(a.rhs())?);
                let add = matches!(data, InstData::FAdd(_));
                let out = match result_ty {
                    Some(Type::Float(FloatFormat::Single)) => {
                        let (x, y) = (f32::from_bits(lhs as u32), f32::from_bits(rhs as u32));

                        (if add { x + y } else { x * y }).to_bits() as u64
                    }
                    _ => {
                        let (x, y) = (f64::from_bits(lhs), f64::from_bits(rhs));

                        (if add { x + y } else { x * y }).to_bits()
                    }
                };

                Some(Val::Scalar(out))
            }
            InstData::Alloca(alloca) => {
                let size = alloca.alloc_ty().size_bytes() as usize;

                Some(Val::Scalar(m.memory.allocate(vec![0; size])))
            }
            InstData::Load(load) => {
                let ty = result_ty.unwrap_or(Type::i32());
                let ptr = scalar(load.pointer())?;

                Some(
                    m.memory
                        .load(ty, ptr)
                        .ok_or_else(|| bad_access(ptr, ty.size_bytes()))?,
                )
            }
            InstData::Store(store) => {
                let ty = def.dfg.ty(store.stored());
                let ptr = scalar(store.pointer())?;
                let value = get(store.stored())?;

                m.memory
                    .store(ty, ptr, &value)
                    .ok_or_else(|| bad_access(ptr, ty.size_bytes()))?;

                None
            }
            InstData::Offset(offset) => {
                let base = scalar(offset.base())?;
                let raw = scalar(offset.offset())?;
                let bytes = match def.dfg.ty(offset.offset()) {
                    Type::Int(i) => i.sign_extend(raw),
                    _ => raw as i64,
                };

                Some(Val::Scalar(base.wrapping_add(bytes as u64)))
            }
            InstData::Extract(extract) => {
                let lane = match get(extract.aggregate())? {
                    Val::Agg(lanes) => lanes.get(extract.index() as usize).copied(),
                    Val::Scalar(_) => None,
                };

                Some(Val::Scalar(lane.ok_or_else(|| {
                    SimError::Unsupported(format!("lane {} is out of range", extract.index()))
                })?))
            }
            InstData::Sext(cast) => {
                let raw = scalar(cast.operand())?;
                let extended = match def.dfg.ty(cast.operand()) {
                    Type::Int(i) => i.sign_extend(raw) as u64,
                    _ => raw,
                };

                Some(Val::Scalar(extended))
            }
            InstData::Zext(cast) | InstData::Trunc(cast) | InstData::BToI(cast) => {
                Some(Val::Scalar(scalar(cast.operand())?))
            }
            InstData::IToP(cast) => {
                let raw = scalar(cast.operand())?;

                match result_ty {
                    Some(Type::Ptr(AddrSpace::Local)) => Some(Val::Scalar(Memory::pointer(SLM, raw))),
                    _ => Some(Val::Scalar(raw)),
                }
            }
            InstData::PToI(cast) => {
                let raw = scalar(cast.operand())?;

                match Memory::decode(raw) {
                    Some((SLM, offset)) => Some(Val::Scalar(offset)),
                    _ => Some(Val::Scalar(raw)),
                }
            }
            InstData::IConst(c) => Some(Val::Scalar(c.value())),
            InstData::FConst(c) => Some(Val::Scalar(c.bits())),
            InstData::BConst(c) => Some(Val::Scalar(c.value() as u64)),
            InstData::Undef(_) => result_ty.map(Val::zero),
            InstData::GlobalAddr(addr) => {
                let ptr = m.globals.get(&addr.global()).copied().ok_or_else(|| {
                    SimError::Unsupported(format!("no storage for {:?}", addr.global()))
                })?;

                Some(Val::Scalar(ptr))
            }
            InstData::Barrier(_) => return Ok(Flow::Barrier),
            InstData::Fence(fence) => {
                let mut flags = [false; 8];

                for (i, flag) in FenceFlag::ALL.iter().enumerate() {
                    flags[i] = scalar(fence.flag(*flag))? != 0;
                }

                m.trace.fences.push(FenceRecord {
                    item: index,
                    flags,
                    scope: scalar(fence.scope())?,
                });

                None
            }
            InstData::AtomicIAdd(atomic) => {
                let ty = result_ty.unwrap_or(Type::i32());
                let ptr = scalar(atomic.pointer())?;
                let amount = scalar(atomic.value())?;
                let old = m
                    .memory
                    .load(ty, ptr)
                    .and_then(|v| v.scalar())
                    .ok_or_else(|| bad_access(ptr, ty.size_bytes()))?;

                m.memory
                    .store(ty, ptr, &Val::Scalar(truncate(ty, old.wrapping_add(amount))))
                    .ok_or_else(|| bad_access(ptr, ty.size_bytes()))?;

                m.trace.atomics.push(AtomicRecord {
                    item: index,
                    address: ptr,
                    amount,
                });

                Some(Val::Scalar(old))
            }
            InstData::LocalId(wi) => Some(Val::Scalar(local_id[wi.dim() as usize % 3] as u64)),
            InstData::GroupId(wi) => Some(Val::Scalar(m.group_id[wi.dim() as usize % 3] as u64)),
            InstData::ReadFirstLane(rfl) => {
                let own = get(rfl.operand())?;
                let round = m.trace.barrier_rounds;

                Some(m.lanes.broadcast(index, frame.func, inst, round, own))
            }
            InstData::Spill(_) | InstData::Fill(_) => {
                return Err(SimError::Unsupported(format!(
                    "`{}` markers must be lowered before execution",
                    data.opcode_name()
                )))
            }
        };

        if let (Some(result), Some(value)) = (def.dfg.inst_to_result(inst), value) {
            let ty = def.dfg.ty(result);
            let value = match value {
                Val::Scalar(raw) => Val::Scalar(truncate(ty, raw)),
                agg => agg,
            };

            frame.values.insert(result, value);
        }

        Ok(Flow::Continue)
    }
}

fn jump<F>(target: &BlockWithParams, get: F) -> Result<Flow, SimError>
where
    F: Fn(Value) -> Result<Val, SimError>,
{
    let args = target
        .args()
        .iter()
        .map(|&arg| get(arg))
        .collect::<Result<SmallVec<[Val; 4]>, SimError>>()?;

    Ok(Flow::Jump(target.block(), args))
}
