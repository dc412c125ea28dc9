//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::ir::{AddrSpace, Block, Func, GlobalVar, Sig, Type, Value};
use smallvec::{smallvec, SmallVec};
use std::slice;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// This holds both the opcode of a given instruction and all the state
/// that makes up that specific instruction.
///
/// Most of these are ordinary SSA operations. The GPU primitives at the end
/// (`barrier`, `fence`, `atomic.iadd`, the work-item queries,
/// `readfirstlane`, `spill` and `fill`) are treated as opaque operations by
/// everything except the analyses that need to understand them. Each one
/// documents its side-effect class, see [`InstData::side_effect`].
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum InstData {
    /// `call T @function(args...)`, models a direct call to a known function.
    Call(CallInst),
    /// `icmp op T %a, %b`, models an integer comparison
    ICmp(ICmpInst),
    /// `sel T, bool %cond, %a, %b`, models a ternary-like instruction
    Sel(SelInst),
    /// `br block(args...)`, models an unconditional branch
    Br(BrInst),
    /// `condbr bool %cond, block1(args...), block2(args...)`
    CondBr(CondBrInst),
    /// `switch iN %v, default block, [N: block, ...]`
    Switch(SwitchInst),
    /// `unreachable`, a terminator that can never be executed
    Unreachable(UnreachableInst),
    /// `ret T %val`, returns from the current function
    Ret(RetInst),
    /// `and T %a, %b`, performs bitwise AND
    And(CommutativeArithInst),
    /// `or T %a, %b`, performs bitwise OR
    Or(CommutativeArithInst),
    /// `xor T %a, %b`, performs bitwise XOR
    Xor(CommutativeArithInst),
    /// `shl T %a, %b`, performs bitwise left-shift
    Shl(ArithInst),
    /// `lshr T %a, %b`, performs bitwise logical right-shift
    LShr(ArithInst),
    /// `iadd T %a, %b`, performs two's complement addition
    IAdd(CommutativeArithInst),
    /// `isub T %a, %b`, performs two's complement subtraction
    ISub(ArithInst),
    /// `imul T %a, %b`, performs two's complement multiplication
    IMul(CommutativeArithInst),
    /// `udiv T %a, %b`, performs unsigned division
    UDiv(ArithInst),
    /// `fadd T %a, %b`, performs floating-point addition
    FAdd(CommutativeArithInst),
    /// `fmul T %a, %b`, performs floating-point multiplication
    FMul(CommutativeArithInst),
    /// `alloca T`, performs private (per work-item) stack allocation
    Alloca(AllocaInst),
    /// `load T, ptr %p`, loads from a pointer
    Load(LoadInst),
    /// `store T %a, ptr %p`, stores a value to a pointer
    Store(StoreInst),
    /// `offset ptr %p, iN %bytes`, performs byte-wise pointer arithmetic
    Offset(OffsetInst),
    /// `extract T, U %v, N`, extracts a lane from a vector or an element from an array
    Extract(ExtractInst),
    /// `sext T, U %b`, performs sign-extension
    Sext(CastInst),
    /// `zext T, U %b`, performs zero-extension
    Zext(CastInst),
    /// `trunc T, U %b`, performs truncation
    Trunc(CastInst),
    /// `btoi T, bool %b`, converts a `bool` into an integer
    BToI(CastInst),
    /// `itop T, U %b`, converts an integer into a pointer
    IToP(CastInst),
    /// `ptoi T, U %b`, converts a pointer into an integer
    PToI(CastInst),
    /// `iconst T N`, materializes an integer constant
    IConst(IConstInst),
    /// `fconst T N`, materializes a floating-point constant
    FConst(FConstInst),
    /// `bconst N`, materializes a bool constant
    BConst(BConstInst),
    /// `undef T`, materializes an uninitialized value
    Undef(UndefConstInst),
    /// `globaladdr @name`, materializes a pointer to a global variable
    GlobalAddr(GlobalAddrInst),
    /// `barrier`, the workgroup control barrier
    Barrier(BarrierInst),
    /// `fence bool..., i32 %scope`, a memory fence
    Fence(FenceInst),
    /// `atomic.iadd T, ptr %p, T %v`, atomically adds to memory and yields the old value
    AtomicIAdd(AtomicInst),
    /// `workitem.local_id N`, the work-item's id inside of its workgroup
    LocalId(WorkItemInst),
    /// `workitem.group_id N`, the id of the workgroup
    GroupId(WorkItemInst),
    /// `readfirstlane T %v`, broadcasts the first active lane's value
    ReadFirstLane(ReadFirstLaneInst),
    /// `spill N, T %v`, marks a value as saved to scratch slot `N`
    Spill(SpillInst),
    /// `fill T, N`, marks a value as reloaded from scratch slot `N`
    Fill(FillInst),
}

/// Models the side-effect class of an instruction.
///
/// Instructions with [`SideEffect::None`] can be freely removed if their result
/// is unused. Stronger classes pin the instruction in place relative to others
/// of a stronger or equal class.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum SideEffect {
    /// Pure computation, or control flow.
    None,
    /// Reads memory, but does not write it.
    ReadsMemory,
    /// Writes (and possibly reads) memory.
    WritesMemory,
    /// Synchronizes every work-item in the workgroup.
    Barrier,
}

macro_rules! for_each_inst {
    ($self:expr, $e:ident => $body:expr) => {
        match $self {
            InstData::Call($e) => $body,
            InstData::ICmp($e) => $body,
            InstData::Sel($e) => $body,
            InstData::Br($e) => $body,
            InstData::CondBr($e) => $body,
            InstData::Switch($e) => $body,
            InstData::Unreachable($e) => $body,
            InstData::Ret($e) => $body,
            InstData::And($e) => $body,
            InstData::Or($e) => $body,
            InstData::Xor($e) => $body,
            InstData::Shl($e) => $body,
            InstData::LShr($e) => $body,
            InstData::IAdd($e) => $body,
            InstData::ISub($e) => $body,
            InstData::IMul($e) => $body,
            InstData::UDiv($e) => $body,
            InstData::FAdd($e) => $body,
            InstData::FMul($e) => $body,
            InstData::Alloca($e) => $body,
            InstData::Load($e) => $body,
            InstData::Store($e) => $body,
            InstData::Offset($e) => $body,
            InstData::Extract($e) => $body,
            InstData::Sext($e) => $body,
            InstData::Zext($e) => $body,
            InstData::Trunc($e) => $body,
            InstData::BToI($e) => $body,
            InstData::IToP($e) => $body,
            InstData::PToI($e) => $body,
            InstData::IConst($e) => $body,
            InstData::FConst($e) => $body,
            InstData::BConst($e) => $body,
            InstData::Undef($e) => $body,
            InstData::GlobalAddr($e) => $body,
            InstData::Barrier($e) => $body,
            InstData::Fence($e) => $body,
            InstData::AtomicIAdd($e) => $body,
            InstData::LocalId($e) => $body,
            InstData::GroupId($e) => $body,
            InstData::ReadFirstLane($e) => $body,
            InstData::Spill($e) => $body,
            InstData::Fill($e) => $body,
        }
    };
}

impl InstData {
    /// Gets the mnemonic of the instruction, as it appears in textual GIR.
    pub fn opcode_name(&self) -> &'static str {
        match self {
            InstData::Call(_) => "call",
            InstData::ICmp(_) => "icmp",
            InstData::Sel(_) => "sel",
            InstData::Br(_) => "br",
            InstData::CondBr(_) => "condbr",
            InstData::Switch(_) => "switch",
            InstData::Unreachable(_) => "unreachable",
            InstData::Ret(_) => "ret",
            InstData::And(_) => "and",
            InstData::Or(_) => "or",
            InstData::Xor(_) => "xor",
            InstData::Shl(_) => "shl",
            InstData::LShr(_) => "lshr",
            InstData::IAdd(_) => "iadd",
            InstData::ISub(_) => "isub",
            InstData::IMul(_) => "imul",
            InstData::UDiv(_) => "udiv",
            InstData::FAdd(_) => "fadd",
            InstData::FMul(_) => "fmul",
            InstData::Alloca(_) => "alloca",
            InstData::Load(_) => "load",
            InstData::Store(_) => "store",
            InstData::Offset(_) => "offset",
            InstData::Extract(_) => "extract",
            InstData::Sext(_) => "sext",
            InstData::Zext(_) => "zext",
            InstData::Trunc(_) => "trunc",
            InstData::BToI(_) => "btoi",
            InstData::IToP(_) => "itop",
            InstData::PToI(_) => "ptoi",
            InstData::IConst(_) => "iconst",
            InstData::FConst(_) => "fconst",
            InstData::BConst(_) => "bconst",
            InstData::Undef(_) => "undef",
            InstData::GlobalAddr(_) => "globaladdr",
            InstData::Barrier(_) => "barrier",
            InstData::Fence(_) => "fence",
            InstData::AtomicIAdd(_) => "atomic.iadd",
            InstData::LocalId(_) => "workitem.local_id",
            InstData::GroupId(_) => "workitem.group_id",
            InstData::ReadFirstLane(_) => "readfirstlane",
            InstData::Spill(_) => "spill",
            InstData::Fill(_) => "fill",
        }
    }

    /// Checks if the instruction is a terminator, i.e. whether it is one of the
    /// only instructions allowed at the end of a block.
    pub fn is_terminator(&self) -> bool {
        self.as_terminator().is_some()
    }

    /// Gets `self` as a terminator if it is one.
    pub fn as_terminator(&self) -> Option<&dyn Terminator> {
        match self {
            InstData::Br(e) => Some(e),
            InstData::CondBr(e) => Some(e),
            InstData::Switch(e) => Some(e),
            InstData::Unreachable(e) => Some(e),
            InstData::Ret(e) => Some(e),
            _ => None,
        }
    }

    /// If the instruction is a terminator, gets the possible branch targets.
    pub fn branch_info(&self) -> Option<&[BlockWithParams]> {
        self.as_terminator().map(|term| term.targets())
    }

    /// Gets the side-effect class of the instruction.
    pub fn side_effect(&self) -> SideEffect {
        match self {
            InstData::Barrier(_) => SideEffect::Barrier,
            InstData::Call(_)
            | InstData::Store(_)
            | InstData::Fence(_)
            | InstData::AtomicIAdd(_)
            | InstData::Spill(_) => SideEffect::WritesMemory,
            InstData::Load(_) | InstData::Fill(_) => SideEffect::ReadsMemory,
            _ => SideEffect::None,
        }
    }

    /// Checks if `self` is a constant materialization instruction. `undef` and
    /// `globaladdr` are not included, neither produce values known at compile time.
    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            InstData::BConst(_) | InstData::IConst(_) | InstData::FConst(_)
        )
    }

    /// Gets the raw bits of a constant materialization instruction, if `self` is one.
    pub fn constant_raw(&self) -> Option<u64> {
        match self {
            InstData::BConst(b) => Some(b.value() as u64),
            InstData::IConst(i) => Some(i.value()),
            InstData::FConst(f) => Some(f.bits()),
            _ => None,
        }
    }

    /// Applies `f` to every value operand of the instruction, replacing each
    /// operand with the value that `f` returns.
    pub fn map_operands<F: FnMut(Value) -> Value>(&mut self, mut f: F) {
        for_each_inst!(self, e => {
            for op in e.operands_mut() {
                *op = f(*op);
            }
        });

        if let InstData::CondBr(condbr) = self {
            condbr.sync_branches();
        }
    }

    /// Replaces every use of `old` in the operands with `new`. Returns whether
    /// anything was replaced.
    pub fn replace_uses(&mut self, old: Value, new: Value) -> bool {
        if !self.operands().contains(&old) {
            return false;
        }

        self.map_operands(|v| if v == old { new } else { v });

        true
    }

    /// Applies `f` to every block that the instruction can branch to.
    pub fn map_targets<F: FnMut(Block) -> Block>(&mut self, mut f: F) {
        match self {
            InstData::Br(br) => br.target.block = f(br.target.block),
            InstData::CondBr(condbr) => {
                for target in condbr.branches.iter_mut() {
                    target.block = f(target.block);
                }
            }
            InstData::Switch(switch) => {
                for target in switch.targets.iter_mut() {
                    target.block = f(target.block);
                }
            }
            _ => {}
        }
    }

    /// Applies `f` to the signature of a `call`. Signatures are local to a
    /// function, so this is needed when moving a call between functions.
    pub fn map_sig<F: FnOnce(Sig) -> Sig>(&mut self, f: F) {
        if let InstData::Call(call) = self {
            call.sig = f(call.sig);
        }
    }
}

impl Instruction for InstData {
    fn operands(&self) -> &[Value] {
        for_each_inst!(self, e => e.operands())
    }

    fn result_ty(&self) -> Option<Type> {
        for_each_inst!(self, e => e.result_ty())
    }
}

/// These are the properties that any transform or analysis pass needs to be
/// able to observe for any given instruction in any block.
pub trait Instruction {
    /// Gets any operands that the instruction operates on.
    ///
    /// Note that this may be an empty array, it is not safe to assume that
    /// there will be at least one operand.
    fn operands(&self) -> &[Value];

    /// Gets the type of the instruction's result after it has been evaluated.
    ///
    /// Not all instructions will have one of these, e.g. terminators, `call void`s
    /// and `store`s do not evaluate to anything.
    fn result_ty(&self) -> Option<Type>;

    /// Checks if the instruction yields a result.
    fn has_result(&self) -> bool {
        self.result_ty().is_some()
    }
}

// mutable operand access is kept crate-private, mutation goes through
// `InstData::map_operands` so that cached operand lists stay in sync
trait OperandsMut {
    fn operands_mut(&mut self) -> &mut [Value];
}

/// Models a terminator, i.e. the only instructions that are allowed at the end
/// of a basic block.
pub trait Terminator: Instruction {
    /// Gets the possible blocks where control could be transferred to
    /// once this instruction is executed.
    ///
    /// Note that this might be empty, see `unreachable` or `ret`.
    fn targets(&self) -> &[BlockWithParams];
}

/// Models a branch target, along with any arguments being passed into that block.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct BlockWithParams {
    block: Block,
    args: SmallVec<[Value; 2]>,
}

impl BlockWithParams {
    /// Creates a branch target that passes `args` to the block's parameters.
    pub fn new(target: Block, args: &[Value]) -> Self {
        Self {
            block: target,
            args: SmallVec::from_slice(args),
        }
    }

    /// Shorthand for `Self::new(target, &[])`.
    #[inline]
    pub fn to(target: Block) -> Self {
        Self::new(target, &[])
    }

    /// Gets the block target by itself.
    #[inline]
    pub fn block(&self) -> Block {
        self.block
    }

    /// Gets the block arguments being passed, if any.
    #[inline]
    pub fn args(&self) -> &[Value] {
        &self.args
    }
}

/// Models the different ways that integers values can be compared in GIR
/// using the `icmp` instruction.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum ICmpOp {
    /// `eq`, checks if the integers are (bitwise) equivalent
    EQ,
    /// `ne`, checks if the integers are (bitwise) not-equal
    NE,
    /// `sgt`, treats both integers as signed and checks if `a > b`
    SGT,
    /// `slt`, treats both integers as signed and checks if `a < b`
    SLT,
    /// `sge`, treats both integers as signed and checks if `a >= b`
    SGE,
    /// `sle`, treats both integers as signed and checks if `a <= b`
    SLE,
    /// `ugt`, treats both integers as unsigned and checks if `a > b`
    UGT,
    /// `ult`, treats both integers as unsigned and checks if `a < b`
    ULT,
    /// `uge`, treats both integers as unsigned and checks if `a >= b`
    UGE,
    /// `ule`, treats both integers as unsigned and checks if `a <= b`
    ULE,
}

impl ICmpOp {
    /// Gets the name of the comparison in textual GIR.
    pub fn name(self) -> &'static str {
        match self {
            ICmpOp::EQ => "eq",
            ICmpOp::NE => "ne",
            ICmpOp::SGT => "sgt",
            ICmpOp::SLT => "slt",
            ICmpOp::SGE => "sge",
            ICmpOp::SLE => "sle",
            ICmpOp::UGT => "ugt",
            ICmpOp::ULT => "ult",
            ICmpOp::UGE => "uge",
            ICmpOp::ULE => "ule",
        }
    }
}

macro_rules! fixed_operands {
    ($t:ty, $field:ident, $($output:tt)*) => {
        impl Instruction for $t {
            fn operands(&self) -> &[Value] {
                &self.$field
            }

            fn result_ty(&self) -> Option<Type> {
                ($($output)*)(self)
            }
        }

        impl OperandsMut for $t {
            fn operands_mut(&mut self) -> &mut [Value] {
                &mut self.$field
            }
        }
    };
}

macro_rules! no_operands {
    ($t:ty, $($output:tt)*) => {
        impl Instruction for $t {
            fn operands(&self) -> &[Value] {
                &[]
            }

            fn result_ty(&self) -> Option<Type> {
                ($($output)*)(self)
            }
        }

        impl OperandsMut for $t {
            fn operands_mut(&mut self) -> &mut [Value] {
                &mut []
            }
        }
    };
}

/// Models a single `icmp` instruction.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ICmpInst {
    comparison: ICmpOp,
    operands: [Value; 2],
}

impl ICmpInst {
    pub(in crate::ir) fn new(cmp: ICmpOp, lhs: Value, rhs: Value) -> Self {
        Self {
            comparison: cmp,
            operands: [lhs, rhs],
        }
    }

    /// Gets the comparison being performed between the two operands.
    pub fn op(&self) -> ICmpOp {
        self.comparison
    }

    /// Gets the left-hand operand.
    pub fn lhs(&self) -> Value {
        self.operands[0]
    }

    /// Gets the right-hand operand.
    pub fn rhs(&self) -> Value {
        self.operands[1]
    }
}

fixed_operands!(ICmpInst, operands, |_: &ICmpInst| Some(Type::bool()));

/// Models a `sel` instruction, `sel T, bool %c, %a, %b`
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct SelInst {
    output: Type,
    operands: [Value; 3],
}

impl SelInst {
    pub(in crate::ir) fn new(output: Type, cond: Value, if_true: Value, otherwise: Value) -> Self {
        Self {
            output,
            operands: [cond, if_true, otherwise],
        }
    }

    /// Gets the condition being selected on.
    pub fn condition(&self) -> Value {
        self.operands[0]
    }

    /// Gets the value yielded when the condition is true.
    pub fn if_true(&self) -> Value {
        self.operands[1]
    }

    /// Gets the value yielded when the condition is false.
    pub fn if_false(&self) -> Value {
        self.operands[2]
    }
}

fixed_operands!(SelInst, operands, |s: &SelInst| Some(s.output));

/// Models an unconditional branch
///
/// ```raw
/// br block(i32 %0)
/// ```
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct BrInst {
    target: BlockWithParams,
}

impl BrInst {
    pub(in crate::ir) fn new(target: BlockWithParams) -> Self {
        Self { target }
    }

    /// Gets the target branch being jumped to
    pub fn target(&self) -> &BlockWithParams {
        &self.target
    }
}

impl Instruction for BrInst {
    fn operands(&self) -> &[Value] {
        self.target.args()
    }

    fn result_ty(&self) -> Option<Type> {
        None
    }
}

impl OperandsMut for BrInst {
    fn operands_mut(&mut self) -> &mut [Value] {
        &mut self.target.args
    }
}

impl Terminator for BrInst {
    fn targets(&self) -> &[BlockWithParams] {
        slice::from_ref(&self.target)
    }
}

/// Models a conditional branch
///
/// ```raw
/// condbr bool %0, block1, block2
/// ```
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct CondBrInst {
    branches: [BlockWithParams; 2],
    // [cond, true args..., false args...], kept so `operands` can be a slice
    operands_copy: SmallVec<[Value; 4]>,
}

impl CondBrInst {
    pub(in crate::ir) fn new(
        cond: Value,
        if_true: BlockWithParams,
        otherwise: BlockWithParams,
    ) -> Self {
        let mut operands_copy = SmallVec::new();

        operands_copy.push(cond);
        operands_copy.extend_from_slice(if_true.args());
        operands_copy.extend_from_slice(otherwise.args());

        Self {
            branches: [if_true, otherwise],
            operands_copy,
        }
    }

    /// Gets the condition being checked in the `condbr`
    pub fn condition(&self) -> Value {
        self.operands_copy[0]
    }

    /// Gets the branch being jumped to if the condition is `true`
    pub fn true_branch(&self) -> &BlockWithParams {
        &self.branches[0]
    }

    /// Gets the branch being jumped to if the condition is `false`
    pub fn false_branch(&self) -> &BlockWithParams {
        &self.branches[1]
    }

    // the operand copy is the one that gets mutated, push the changes back
    // into the branch targets
    fn sync_branches(&mut self) {
        let true_len = self.branches[0].args.len();
        let (true_args, false_args) = self.operands_copy[1..].split_at(true_len);

        self.branches[0].args.copy_from_slice(true_args);
        self.branches[1].args.copy_from_slice(false_args);
    }
}

impl Instruction for CondBrInst {
    fn operands(&self) -> &[Value] {
        &self.operands_copy
    }

    fn result_ty(&self) -> Option<Type> {
        None
    }
}

impl OperandsMut for CondBrInst {
    fn operands_mut(&mut self) -> &mut [Value] {
        &mut self.operands_copy
    }
}

impl Terminator for CondBrInst {
    fn targets(&self) -> &[BlockWithParams] {
        &self.branches
    }
}

/// Models a multi-way branch on an integer.
///
/// ```raw
/// switch i32 %next, default switch.end, [0: case0, 1: case1]
/// ```
///
/// Switch targets never take block arguments.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct SwitchInst {
    scrutinee: [Value; 1],
    // targets[0] is the default, targets[i + 1] is the target for cases[i]
    targets: SmallVec<[BlockWithParams; 4]>,
    cases: SmallVec<[i64; 4]>,
}

impl SwitchInst {
    pub(in crate::ir) fn new(scrutinee: Value, default: Block, cases: &[(i64, Block)]) -> Self {
        let mut targets = smallvec![BlockWithParams::to(default)];

        targets.extend(cases.iter().map(|(_, bb)| BlockWithParams::to(*bb)));

        Self {
            scrutinee: [scrutinee],
            targets,
            cases: cases.iter().map(|(v, _)| *v).collect(),
        }
    }

    /// Gets the value being switched on.
    pub fn scrutinee(&self) -> Value {
        self.scrutinee[0]
    }

    /// Gets the block jumped to when no case matches.
    pub fn default_target(&self) -> Block {
        self.targets[0].block()
    }

    /// Gets every `(case value, target)` pair, in order.
    pub fn cases(&self) -> impl ExactSizeIterator<Item = (i64, Block)> + '_ {
        self.cases
            .iter()
            .zip(self.targets[1..].iter())
            .map(|(v, target)| (*v, target.block()))
    }

    /// Finds the target that would be taken for a given scrutinee value.
    pub fn target_for(&self, value: i64) -> Block {
        self.cases()
            .find(|(case, _)| *case == value)
            .map_or_else(|| self.default_target(), |(_, bb)| bb)
    }
}

fixed_operands!(SwitchInst, scrutinee, |_: &SwitchInst| None);

impl Terminator for SwitchInst {
    fn targets(&self) -> &[BlockWithParams] {
        &self.targets
    }
}

/// Gets an `unreachable` instruction
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct UnreachableInst(());

impl UnreachableInst {
    pub(in crate::ir) fn new() -> Self {
        Self(())
    }
}

no_operands!(UnreachableInst, |_: &UnreachableInst| None);

impl Terminator for UnreachableInst {
    fn targets(&self) -> &[BlockWithParams] {
        &[]
    }
}

/// Models a return from a function
///
/// ```raw
/// ret i64 %0
/// ```
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct RetInst {
    value: Option<Value>,
}

impl RetInst {
    pub(in crate::ir) fn new(val: Option<Value>) -> Self {
        Self { value: val }
    }

    /// Gets the value being returned, if any.
    pub fn value(&self) -> Option<Value> {
        self.value
    }
}

impl Instruction for RetInst {
    fn operands(&self) -> &[Value] {
        match &self.value {
            Some(val) => slice::from_ref(val),
            None => &[],
        }
    }

    fn result_ty(&self) -> Option<Type> {
        None
    }
}

impl OperandsMut for RetInst {
    fn operands_mut(&mut self) -> &mut [Value] {
        match &mut self.value {
            Some(val) => slice::from_mut(val),
            None => &mut [],
        }
    }
}

impl Terminator for RetInst {
    fn targets(&self) -> &[BlockWithParams] {
        &[]
    }
}

/// Models a general arithmetic instruction
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ArithmeticInst<const COMMUTATIVE: bool> {
    output: Type,
    operands: [Value; 2],
}

impl<const C: bool> ArithmeticInst<C> {
    pub(in crate::ir) fn new(output: Type, lhs: Value, rhs: Value) -> Self {
        Self {
            output,
            operands: [lhs, rhs],
        }
    }

    /// Gets the left-hand operand of the instruction.
    pub fn lhs(&self) -> Value {
        self.operands[0]
    }

    /// Gets the right-hand operand of the instruction.
    pub fn rhs(&self) -> Value {
        self.operands[1]
    }

    /// Checks if it is safe to swap the operands while preserving the behavior.
    pub fn is_commutative(&self) -> bool {
        C
    }
}

impl<const C: bool> Instruction for ArithmeticInst<C> {
    fn operands(&self) -> &[Value] {
        &self.operands
    }

    fn result_ty(&self) -> Option<Type> {
        Some(self.output)
    }
}

impl<const C: bool> OperandsMut for ArithmeticInst<C> {
    fn operands_mut(&mut self) -> &mut [Value] {
        &mut self.operands
    }
}

/// Models a general arithmetic instruction that is commutative (e.g. `iadd`, `imul`)
pub type CommutativeArithInst = ArithmeticInst<true>;

/// Models a general arithmetic instruction that isn't commutative (e.g. `isub`, `udiv`)
pub type ArithInst = ArithmeticInst<false>;

/// Models a generalized cast instruction
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct CastInst {
    output: Type,
    operand: [Value; 1],
}

impl CastInst {
    pub(in crate::ir) fn new(output: Type, operand: Value) -> Self {
        Self {
            output,
            operand: [operand],
        }
    }

    /// Gets the value being converted.
    pub fn operand(&self) -> Value {
        self.operand[0]
    }
}

fixed_operands!(CastInst, operand, |c: &CastInst| Some(c.output));

/// Models a direct function call to a known function
///
/// ```raw
/// %1 = call i32 @continuation(ptr.global %0)
/// ```
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct CallInst {
    output: Option<Type>,
    sig: Sig,
    callee: Func,
    args: SmallVec<[Value; 4]>,
}

impl CallInst {
    pub(in crate::ir) fn new(output: Option<Type>, sig: Sig, callee: Func, args: &[Value]) -> Self {
        Self {
            output,
            sig,
            callee,
            args: SmallVec::from_slice(args),
        }
    }

    /// Gets the function signature, which is local to the calling function
    pub fn sig(&self) -> Sig {
        self.sig
    }

    /// Gets the function being called
    pub fn callee(&self) -> Func {
        self.callee
    }

    /// Gets the arguments being passed into the function
    pub fn args(&self) -> &[Value] {
        &self.args
    }
}

fixed_operands!(CallInst, args, |c: &CallInst| c.output);

/// Models an `alloca`, a private allocation of one object of a type.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct AllocaInst {
    alloc_ty: Type,
}

impl AllocaInst {
    pub(in crate::ir) fn new(alloc_ty: Type) -> Self {
        Self { alloc_ty }
    }

    /// Gets the type being allocated.
    pub fn alloc_ty(&self) -> Type {
        self.alloc_ty
    }
}

no_operands!(AllocaInst, |_: &AllocaInst| Some(Type::ptr(AddrSpace::Private)));

/// Models a `load`.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct LoadInst {
    output: Type,
    pointer: [Value; 1],
}

impl LoadInst {
    pub(in crate::ir) fn new(output: Type, pointer: Value) -> Self {
        Self {
            output,
            pointer: [pointer],
        }
    }

    /// Gets the pointer being loaded from.
    pub fn pointer(&self) -> Value {
        self.pointer[0]
    }
}

fixed_operands!(LoadInst, pointer, |l: &LoadInst| Some(l.output));

/// Models a `store`.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct StoreInst {
    operands: [Value; 2],
}

impl StoreInst {
    pub(in crate::ir) fn new(value: Value, pointer: Value) -> Self {
        Self {
            operands: [value, pointer],
        }
    }

    /// Gets the value being stored.
    pub fn stored(&self) -> Value {
        self.operands[0]
    }

    /// Gets the pointer being stored to.
    pub fn pointer(&self) -> Value {
        self.operands[1]
    }
}

fixed_operands!(StoreInst, operands, |_: &StoreInst| None);

/// Models an `offset`, i.e. `ptr + bytes`.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct OffsetInst {
    output: Type,
    operands: [Value; 2],
}

impl OffsetInst {
    pub(in crate::ir) fn new(output: Type, base: Value, bytes: Value) -> Self {
        Self {
            output,
            operands: [base, bytes],
        }
    }

    /// Gets the base pointer.
    pub fn base(&self) -> Value {
        self.operands[0]
    }

    /// Gets the byte offset being added.
    pub fn offset(&self) -> Value {
        self.operands[1]
    }
}

fixed_operands!(OffsetInst, operands, |o: &OffsetInst| Some(o.output));

/// Models an `extract`, getting one lane out of a vector or array.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ExtractInst {
    output: Type,
    aggregate: [Value; 1],
    index: u32,
}

impl ExtractInst {
    pub(in crate::ir) fn new(output: Type, aggregate: Value, index: u32) -> Self {
        Self {
            output,
            aggregate: [aggregate],
            index,
        }
    }

    /// Gets the vector or array being extracted from.
    pub fn aggregate(&self) -> Value {
        self.aggregate[0]
    }

    /// Gets the lane index being extracted.
    pub fn index(&self) -> u32 {
        self.index
    }
}

fixed_operands!(ExtractInst, aggregate, |e: &ExtractInst| Some(e.output));

/// Models an integer constant. The value is stored zero-extended to 64 bits.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct IConstInst {
    output: Type,
    value: u64,
}

impl IConstInst {
    pub(in crate::ir) fn new(output: Type, value: u64) -> Self {
        Self {
            output,
            value: value & output.unwrap_int().mask(),
        }
    }

    /// Gets the raw (zero-extended) value of the constant.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Gets the value of the constant, sign-extended to 64 bits.
    pub fn signed_value(&self) -> i64 {
        self.output.unwrap_int().sign_extend(self.value)
    }
}

no_operands!(IConstInst, |i: &IConstInst| Some(i.output));

/// Models a floating-point constant, stored as the raw bits of an `f64`
/// (or the raw bits of an `f32` in the low 32 bits).
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct FConstInst {
    output: Type,
    bits: u64,
}

impl FConstInst {
    pub(in crate::ir) fn new(output: Type, bits: u64) -> Self {
        Self { output, bits }
    }

    /// Gets the raw bits of the constant.
    pub fn bits(&self) -> u64 {
        self.bits
    }
}

no_operands!(FConstInst, |f: &FConstInst| Some(f.output));

/// Models a `bool` constant.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct BConstInst {
    value: bool,
}

impl BConstInst {
    pub(in crate::ir) fn new(value: bool) -> Self {
        Self { value }
    }

    /// Gets the value of the constant.
    pub fn value(&self) -> bool {
        self.value
    }
}

no_operands!(BConstInst, |_: &BConstInst| Some(Type::bool()));

/// Models an `undef` of some type.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct UndefConstInst {
    output: Type,
}

impl UndefConstInst {
    pub(in crate::ir) fn new(output: Type) -> Self {
        Self { output }
    }
}

no_operands!(UndefConstInst, |u: &UndefConstInst| Some(u.output));

/// Models taking the address of a global variable.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct GlobalAddrInst {
    output: Type,
    global: GlobalVar,
}

impl GlobalAddrInst {
    pub(in crate::ir) fn new(output: Type, global: GlobalVar) -> Self {
        Self { output, global }
    }

    /// Gets the global whose address is being taken.
    pub fn global(&self) -> GlobalVar {
        self.global
    }
}

no_operands!(GlobalAddrInst, |g: &GlobalAddrInst| Some(g.output));

/// Models the workgroup barrier. Every work-item in the workgroup must reach
/// the same barrier before any of them continue past it.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct BarrierInst(());

impl BarrierInst {
    pub(in crate::ir) fn new() -> Self {
        Self(())
    }
}

no_operands!(BarrierInst, |_: &BarrierInst| None);

/// The boolean flag operands of a `fence`, in operand order.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum FenceFlag {
    /// Waits for the fence to be committed before continuing.
    CommitEnable,
    /// Flushes read-write data out of L3.
    L3FlushRwData,
    /// Flushes constant data out of L3.
    L3FlushConstantData,
    /// Flushes texture data out of L3.
    L3FlushTextureData,
    /// Flushes instructions out of L3.
    L3FlushInstructions,
    /// Makes the fence apply to global memory, not just SLM.
    Global,
    /// Invalidates L1.
    L1Invalidate,
    /// Evicts L1.
    L1Evict,
}

impl FenceFlag {
    /// Every flag, in operand order.
    pub const ALL: [FenceFlag; 8] = [
        FenceFlag::CommitEnable,
        FenceFlag::L3FlushRwData,
        FenceFlag::L3FlushConstantData,
        FenceFlag::L3FlushTextureData,
        FenceFlag::L3FlushInstructions,
        FenceFlag::Global,
        FenceFlag::L1Invalidate,
        FenceFlag::L1Evict,
    ];
}

/// The memory scopes that a `fence` can order, from narrowest to broadest.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum FenceScope {
    /// The work-items of one workgroup.
    Group = 0,
    /// One execution unit.
    Local = 1,
    /// One tile of the device.
    Tile = 2,
    /// The whole GPU.
    Gpu = 3,
    /// The GPU and the host.
    System = 4,
}

impl FenceScope {
    /// Converts the integer encoding used by the `fence` scope operand.
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(FenceScope::Group),
            1 => Some(FenceScope::Local),
            2 => Some(FenceScope::Tile),
            3 => Some(FenceScope::Gpu),
            4 => Some(FenceScope::System),
            _ => None,
        }
    }
}

/// Models a memory fence with its 8 `bool` flags and `i32` scope.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct FenceInst {
    operands: [Value; 9],
}

impl FenceInst {
    pub(in crate::ir) fn new(flags: [Value; 8], scope: Value) -> Self {
        let mut operands = [scope; 9];

        operands[..8].copy_from_slice(&flags);

        Self { operands }
    }

    /// Gets the operand for a given flag.
    pub fn flag(&self, flag: FenceFlag) -> Value {
        self.operands[flag as usize]
    }

    /// Gets the scope operand.
    pub fn scope(&self) -> Value {
        self.operands[8]
    }
}

fixed_operands!(FenceInst, operands, |_: &FenceInst| None);

/// Models an atomic read-modify-write. Yields the value in memory before the update.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct AtomicInst {
    output: Type,
    operands: [Value; 2],
}

impl AtomicInst {
    pub(in crate::ir) fn new(output: Type, pointer: Value, value: Value) -> Self {
        Self {
            output,
            operands: [pointer, value],
        }
    }

    /// Gets the pointer being updated.
    pub fn pointer(&self) -> Value {
        self.operands[0]
    }

    /// Gets the operand of the update.
    pub fn value(&self) -> Value {
        self.operands[1]
    }
}

fixed_operands!(AtomicInst, operands, |a: &AtomicInst| Some(a.output));

/// Models a query of the current work-item's position along one dimension.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct WorkItemInst {
    dim: u8,
}

impl WorkItemInst {
    pub(in crate::ir) fn new(dim: u8) -> Self {
        debug_assert!(dim < 3, "only dimensions 0, 1 and 2 exist");

        Self { dim }
    }

    /// Gets the dimension being queried.
    pub fn dim(&self) -> u8 {
        self.dim
    }
}

no_operands!(WorkItemInst, |_: &WorkItemInst| Some(Type::i32()));

/// Models `readfirstlane`, a cross-lane broadcast of lane 0's value.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ReadFirstLaneInst {
    output: Type,
    operand: [Value; 1],
}

impl ReadFirstLaneInst {
    pub(in crate::ir) fn new(output: Type, operand: Value) -> Self {
        Self {
            output,
            operand: [operand],
        }
    }

    /// Gets the value being broadcast.
    pub fn operand(&self) -> Value {
        self.operand[0]
    }
}

fixed_operands!(ReadFirstLaneInst, operand, |r: &ReadFirstLaneInst| Some(
    r.output
));

/// The uniform tiers that a reloaded value can be tagged with.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Uniformity {
    /// Identical across every work-item of every workgroup.
    Global,
    /// Identical across every work-item of one workgroup.
    Workgroup,
    /// Identical across every lane of one hardware thread.
    Thread,
}

impl Uniformity {
    /// Gets the name of the tier, as it appears in textual GIR.
    pub fn name(self) -> &'static str {
        match self {
            Uniformity::Global => "global",
            Uniformity::Workgroup => "workgroup",
            Uniformity::Thread => "thread",
        }
    }
}

/// Marks a value as saved into a scratch slot identified by an offset.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct SpillInst {
    value: [Value; 1],
    offset: u64,
}

impl SpillInst {
    pub(in crate::ir) fn new(value: Value, offset: u64) -> Self {
        Self {
            value: [value],
            offset,
        }
    }

    /// Gets the value being spilled.
    pub fn value(&self) -> Value {
        self.value[0]
    }

    /// Gets the scratch offset being spilled to.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

fixed_operands!(SpillInst, value, |_: &SpillInst| None);

/// Marks a value as reloaded from a scratch slot identified by an offset.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct FillInst {
    output: Type,
    offset: u64,
    uniformity: Option<Uniformity>,
}

impl FillInst {
    pub(in crate::ir) fn new(output: Type, offset: u64, uniformity: Option<Uniformity>) -> Self {
        Self {
            output,
            offset,
            uniformity,
        }
    }

    /// Gets the scratch offset being reloaded from.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Gets the uniform tier of the spilled value, if it had one.
    pub fn uniformity(&self) -> Option<Uniformity> {
        self.uniformity
    }
}

no_operands!(FillInst, |f: &FillInst| Some(f.output));
