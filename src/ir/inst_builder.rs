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

macro_rules! cast {
    ($var:ident, $self:expr, $into:expr, $from:expr, $debug:expr) => {{
        let inst = CastInst::new($into, $from);

        $self.build_result(InstData::$var(inst), $debug)
    }};
}

macro_rules! integer_cast {
    ($var:ident, $self:expr, $into:expr, $from:expr, from_width $op:tt into_width, $debug:expr) => {{
        let from = $self.dfg().ty($from);

        debug_assert!($into.is_int(), "result must be integer");
        debug_assert!(from.is_int(), "operand must be integer");
        debug_assert!((from.unwrap_int().width() $op $into.unwrap_int().width()),
            concat!("operand width must be ", stringify!($op), " output width"));

        cast!($var, $self, $into, $from, $debug)
    }}
}

macro_rules! base_binary_inst {
    ($t:ident, $var:ident, $self:expr, operands: (lhs: $lhs:expr, rhs: $rhs:expr, check: $check:ident), $debug:expr) => {{
        let lhs_ty = $self.dfg().ty($lhs);

        debug_assert_eq!(
            $self.dfg().ty($lhs),
            $self.dfg().ty($rhs),
            "operands must be same type"
        );
        debug_assert!(lhs_ty.$check());

        let inst = $t::new(lhs_ty, $lhs, $rhs);

        $self.build_result(InstData::$var(inst), $debug)
    }};
}

/// Helper trait that allows easy creation of instruction builders. This trait
/// provides a variety of helper methods that build instructions and inserts them
/// in whatever way the trait implementor defines.
///
/// This is used for the append and cursor builders, along with any
/// other more situational ones scattered around the codebase.
pub trait InstBuilder<'dfg>: Sized {
    /// Gets the data-flow graph in use for the inserter
    fn dfg(&self) -> &DataFlowGraph;

    /// "Builds" a single instruction and inserts it in whatever way
    /// the particular [`InstBuilder`] sees fit.
    ///
    /// This returns a reference to the instruction and possibly a
    /// reference to the result of that instruction.
    fn build(self, data: InstData, debug: DebugInfo) -> (Inst, Option<Value>);

    /// Builds an instruction and returns its result.
    fn build_result(self, data: InstData, debug: DebugInfo) -> Value {
        self.build(data, debug)
            .1
            .expect("expected a result for instruction")
    }

    /// Builds an instruction and returns the instruction
    fn build_inst(self, data: InstData, debug: DebugInfo) -> Inst {
        self.build(data, debug).0
    }

    /// Builds a `call` instruction to a statically-known function.
    fn call(self, callee: Func, sig: Sig, args: &[Value], debug: DebugInfo) -> Inst {
        let output = self.dfg().signature(sig).return_ty();
        let call = CallInst::new(output, sig, callee, args);

        self.build_inst(InstData::Call(call), debug)
    }

    /// Builds an `icmp` instruction
    fn icmp(self, cmp: ICmpOp, lhs: Value, rhs: Value, debug: DebugInfo) -> Value {
        debug_assert_eq!(self.dfg().ty(lhs), self.dfg().ty(rhs));
        debug_assert!(self.dfg().ty(lhs).is_bool_or_int() || self.dfg().ty(lhs).is_ptr());

        let icmp = ICmpInst::new(cmp, lhs, rhs);

        self.build_result(InstData::ICmp(icmp), debug)
    }

    /// Builds an `icmp eq` instruction
    fn icmp_eq(self, lhs: Value, rhs: Value, debug: DebugInfo) -> Value {
        self.icmp(ICmpOp::EQ, lhs, rhs, debug)
    }

    /// Builds an `icmp ne` instruction
    fn icmp_ne(self, lhs: Value, rhs: Value, debug: DebugInfo) -> Value {
        self.icmp(ICmpOp::NE, lhs, rhs, debug)
    }

    /// Builds a `sel` instruction
    fn sel(self, cond: Value, lhs: Value, rhs: Value, debug: DebugInfo) -> Value {
        debug_assert_eq!(self.dfg().ty(lhs), self.dfg().ty(rhs));
        debug_assert_eq!(self.dfg().ty(cond), Type::bool());

        let sel = SelInst::new(self.dfg().ty(lhs), cond, lhs, rhs);

        self.build_result(InstData::Sel(sel), debug)
    }

    /// Builds a `br` instruction
    fn br(self, target: BlockWithParams, debug: DebugInfo) -> Inst {
        self.build_inst(InstData::Br(BrInst::new(target)), debug)
    }

    /// Builds a `condbr` instruction
    fn condbr(
        self,
        cond: Value,
        if_true: BlockWithParams,
        if_false: BlockWithParams,
        debug: DebugInfo,
    ) -> Inst {
        debug_assert_eq!(self.dfg().ty(cond), Type::bool());

        let cbr = CondBrInst::new(cond, if_true, if_false);

        self.build_inst(InstData::CondBr(cbr), debug)
    }

    /// Builds a `switch` instruction
    fn switch(
        self,
        scrutinee: Value,
        default: Block,
        cases: &[(i64, Block)],
        debug: DebugInfo,
    ) -> Inst {
        debug_assert!(self.dfg().ty(scrutinee).is_int());

        let switch = SwitchInst::new(scrutinee, default, cases);

        self.build_inst(InstData::Switch(switch), debug)
    }

    /// Builds an `unreachable` instruction
    fn unreachable(self, debug: DebugInfo) -> Inst {
        self.build_inst(InstData::Unreachable(UnreachableInst::new()), debug)
    }

    /// Builds a `ret` instruction
    fn ret(self, value: Option<Value>, debug: DebugInfo) -> Inst {
        self.build_inst(InstData::Ret(RetInst::new(value)), debug)
    }

    /// Builds a `ret T %val` instruction
    fn ret_val(self, value: Value, debug: DebugInfo) -> Inst {
        self.ret(Some(value), debug)
    }

    /// Builds a `ret void` instruction
    fn ret_void(self, debug: DebugInfo) -> Inst {
        self.ret(None, debug)
    }

    /// Builds an `and` instruction
    fn and(self, lhs: Value, rhs: Value, debug: DebugInfo) -> Value {
        base_binary_inst!(CommutativeArithInst, And, self, operands: (lhs: lhs, rhs: rhs, check: is_bool_or_int), debug)
    }

    /// Builds an `or` instruction
    fn or(self, lhs: Value, rhs: Value, debug: DebugInfo) -> Value {
        base_binary_inst!(CommutativeArithInst, Or, self, operands: (lhs: lhs, rhs: rhs, check: is_bool_or_int), debug)
    }

    /// Builds a `xor` instruction
    fn xor(self, lhs: Value, rhs: Value, debug: DebugInfo) -> Value {
        base_binary_inst!(CommutativeArithInst, Xor, self, operands: (lhs: lhs, rhs: rhs, check: is_bool_or_int), debug)
    }

    /// Builds a `shl` instruction
    fn shl(self, lhs: Value, rhs: Value, debug: DebugInfo) -> Value {
        base_binary_inst!(ArithInst, Shl, self, operands: (lhs: lhs, rhs: rhs, check: is_int), debug)
    }

    /// Builds a `lshr` instruction
    fn lshr(self, lhs: Value, rhs: Value, debug: DebugInfo) -> Value {
        base_binary_inst!(ArithInst, LShr, self, operands: (lhs: lhs, rhs: rhs, check: is_int), debug)
    }

    /// Builds an `iadd` instruction
    fn iadd(self, lhs: Value, rhs: Value, debug: DebugInfo) -> Value {
        base_binary_inst!(CommutativeArithInst, IAdd, self, operands: (lhs: lhs, rhs: rhs, check: is_int), debug)
    }

    /// Builds an `isub` instruction
    fn isub(self, lhs: Value, rhs: Value, debug: DebugInfo) -> Value {
        base_binary_inst!(ArithInst, ISub, self, operands: (lhs: lhs, rhs: rhs, check: is_int), debug)
    }

    /// Builds an `imul` instruction
    fn imul(self, lhs: Value, rhs: Value, debug: DebugInfo) -> Value {
        base_binary_inst!(CommutativeArithInst, IMul, self, operands: (lhs: lhs, rhs: rhs, check: is_int), debug)
    }

    /// Builds a `udiv` instruction
    fn udiv(self, lhs: Value, rhs: Value, debug: DebugInfo) -> Value {
        base_binary_inst!(ArithInst, UDiv, self, operands: (lhs: lhs, rhs: rhs, check: is_int), debug)
    }

    /// Builds an `fadd` instruction
    fn fadd(self, lhs: Value, rhs: Value, debug: DebugInfo) -> Value {
        base_binary_inst!(CommutativeArithInst, FAdd, self, operands: (lhs: lhs, rhs: rhs, check: is_float), debug)
    }

    /// Builds an `fmul` instruction
    fn fmul(self, lhs: Value, rhs: Value, debug: DebugInfo) -> Value {
        base_binary_inst!(CommutativeArithInst, FMul, self, operands: (lhs: lhs, rhs: rhs, check: is_float), debug)
    }

    /// Builds an `alloca` instruction
    fn alloca(self, ty: Type, debug: DebugInfo) -> Value {
        self.build_result(InstData::Alloca(AllocaInst::new(ty)), debug)
    }

    /// Builds a `load` instruction
    fn load(self, ty: Type, ptr: Value, debug: DebugInfo) -> Value {
        debug_assert!(self.dfg().ty(ptr).is_ptr());

        self.build_result(InstData::Load(LoadInst::new(ty, ptr)), debug)
    }

    /// Builds a `store` instruction
    fn store(self, val: Value, ptr: Value, debug: DebugInfo) -> Inst {
        debug_assert!(self.dfg().ty(ptr).is_ptr());

        self.build_inst(InstData::Store(StoreInst::new(val, ptr)), debug)
    }

    /// Builds an `offset` instruction
    fn offset(self, ptr: Value, bytes: Value, debug: DebugInfo) -> Value {
        let ty = self.dfg().ty(ptr);

        debug_assert!(ty.is_ptr());
        debug_assert!(self.dfg().ty(bytes).is_int());

        self.build_result(InstData::Offset(OffsetInst::new(ty, ptr, bytes)), debug)
    }

    /// Builds an `extract` instruction
    fn extract(self, agg: Value, index: u32, debug: DebugInfo) -> Value {
        let ty = self.dfg().ty(agg);
        let output = match ty.element() {
            Some(elem) => elem,
            None => panic!("cannot extract from non-vector/array type `{ty}`"),
        };

        debug_assert!(ty.len().map_or(false, |len| index < len));

        self.build_result(
            InstData::Extract(ExtractInst::new(output, agg, index)),
            debug,
        )
    }

    /// Builds a `sext` instruction
    fn sext(self, into: Type, from: Value, debug: DebugInfo) -> Value {
        integer_cast!(Sext, self, into, from, from_width < into_width, debug)
    }

    /// Builds a `zext` instruction
    fn zext(self, into: Type, from: Value, debug: DebugInfo) -> Value {
        integer_cast!(Zext, self, into, from, from_width < into_width, debug)
    }

    /// Builds a `trunc` instruction
    fn trunc(self, into: Type, from: Value, debug: DebugInfo) -> Value {
        integer_cast!(Trunc, self, into, from, from_width > into_width, debug)
    }

    /// Builds a `btoi` instruction
    fn btoi(self, into: Type, from: Value, debug: DebugInfo) -> Value {
        debug_assert!(into.is_int());
        debug_assert!(self.dfg().ty(from).is_bool());

        cast!(BToI, self, into, from, debug)
    }

    /// Builds an `itop` instruction
    fn itop(self, into: Type, from: Value, debug: DebugInfo) -> Value {
        debug_assert!(into.is_ptr());
        debug_assert!(self.dfg().ty(from).is_int());

        cast!(IToP, self, into, from, debug)
    }

    /// Builds a `ptoi` instruction
    fn ptoi(self, into: Type, from: Value, debug: DebugInfo) -> Value {
        debug_assert!(into.is_int());
        debug_assert!(self.dfg().ty(from).is_ptr());

        cast!(PToI, self, into, from, debug)
    }

    /// Builds an `iconst` instruction
    fn iconst(self, into: Type, from: u64, debug: DebugInfo) -> Value {
        debug_assert!(into.is_int());

        self.build_result(InstData::IConst(IConstInst::new(into, from)), debug)
    }

    /// Builds an `fconst` instruction
    fn fconst(self, into: Type, from: f64, debug: DebugInfo) -> Value {
        let raw = match into {
            Type::Float(FloatFormat::Single) => (from as f32).to_bits() as u64,
            _ => from.to_bits(),
        };

        self.build_result(InstData::FConst(FConstInst::new(into, raw)), debug)
    }

    /// Builds a `bconst` instruction
    fn bconst(self, value: bool, debug: DebugInfo) -> Value {
        self.build_result(InstData::BConst(BConstInst::new(value)), debug)
    }

    /// Builds an `undef` instruction
    fn undef(self, into: Type, debug: DebugInfo) -> Value {
        self.build_result(InstData::Undef(UndefConstInst::new(into)), debug)
    }

    /// Builds a `globaladdr` instruction, yielding a pointer into `space`.
    fn globaladdr(self, global: GlobalVar, space: AddrSpace, debug: DebugInfo) -> Value {
        let inst = GlobalAddrInst::new(Type::ptr(space), global);

        self.build_result(InstData::GlobalAddr(inst), debug)
    }

    /// Builds a `barrier` instruction
    fn barrier(self, debug: DebugInfo) -> Inst {
        self.build_inst(InstData::Barrier(BarrierInst::new()), debug)
    }

    /// Builds a `fence` instruction
    fn fence(self, flags: [Value; 8], scope: Value, debug: DebugInfo) -> Inst {
        debug_assert!(flags.iter().all(|f| self.dfg().ty(*f).is_bool()));
        debug_assert!(self.dfg().ty(scope).is_int_of_width(32));

        self.build_inst(InstData::Fence(FenceInst::new(flags, scope)), debug)
    }

    /// Builds an `atomic.iadd` instruction
    fn atomic_iadd(self, ptr: Value, value: Value, debug: DebugInfo) -> Value {
        let ty = self.dfg().ty(value);

        debug_assert!(self.dfg().ty(ptr).is_ptr());
        debug_assert!(ty.is_int());

        self.build_result(
            InstData::AtomicIAdd(AtomicInst::new(ty, ptr, value)),
            debug,
        )
    }

    /// Builds a `workitem.local_id` instruction
    fn local_id(self, dim: u8, debug: DebugInfo) -> Value {
        self.build_result(InstData::LocalId(WorkItemInst::new(dim)), debug)
    }

    /// Builds a `workitem.group_id` instruction
    fn group_id(self, dim: u8, debug: DebugInfo) -> Value {
        self.build_result(InstData::GroupId(WorkItemInst::new(dim)), debug)
    }

    /// Builds a `readfirstlane` instruction
    fn readfirstlane(self, value: Value, debug: DebugInfo) -> Value {
        let ty = self.dfg().ty(value);

        self.build_result(
            InstData::ReadFirstLane(ReadFirstLaneInst::new(ty, value)),
            debug,
        )
    }

    /// Builds a `spill` marker
    fn spill(self, value: Value, offset: u64, debug: DebugInfo) -> Inst {
        self.build_inst(InstData::Spill(SpillInst::new(value, offset)), debug)
    }

    /// Builds a `fill` marker
    fn fill(
        self,
        ty: Type,
        offset: u64,
        uniformity: Option<Uniformity>,
        debug: DebugInfo,
    ) -> Value {
        self.build_result(
            InstData::Fill(FillInst::new(ty, offset, uniformity)),
            debug,
        )
    }
}
