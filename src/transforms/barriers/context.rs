//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::analysis::WorkItemAnalysis;
use crate::arena::ArenaMap;
use crate::dense_arena_key;
use crate::ir::*;
use crate::pass::FunctionAnalysisManager;
use crate::transforms::barriers::{DivergentBarrierOptions, FenceArgs, ShaderFlavor};
use crate::transforms::common::InlineError;
use crate::transforms::VerifyError;
use thiserror::Error;

/// Failures that leave the module in a state that can't be used further.
///
/// These all indicate a bug in the transformation (or malformed input that
/// slipped past the verifier), they are never expected on valid IR.
#[derive(Debug, Error)]
pub enum InternalError {
    /// A barrier's block didn't end up with exactly one successor after splitting.
    #[error("barrier block '{block}' in '@{func}' does not have a unique successor")]
    MalformedBarrier {
        /// The function being transformed.
        func: String,
        /// The name of the offending block.
        block: String,
    },
    /// A continuation call in the dispatcher couldn't be inlined.
    #[error("unable to inline continuation into '@{func}': {source}")]
    Inline {
        /// The dispatcher.
        func: String,
        /// Why the inliner refused.
        source: InlineError,
    },
    /// An OpenCL kernel has no `LocalSize` implicit argument to compute the group size from.
    #[error("'@{func}' has no local size argument")]
    MissingLocalSize {
        /// The kernel.
        func: String,
    },
    /// A compute shader is missing one of the `ThreadGroupSize_*` globals, or it
    /// has no constant initializer.
    #[error("'@{func}' needs a constant '@{global}' to compute its group size")]
    MissingGroupSize {
        /// The kernel.
        func: String,
        /// The global that was expected.
        global: String,
    },
    /// The transformed module failed verification.
    #[error("transformed module is malformed ({} errors)", .0.len())]
    Verify(Vec<VerifyError>),
}

impl InternalError {
    /// A short name for the part of the transformation that failed.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::MalformedBarrier { .. } => "partition",
            Self::Inline { .. } => "inline",
            Self::MissingLocalSize { .. } | Self::MissingGroupSize { .. } => "dispatch",
            Self::Verify(_) => "verify",
        }
    }
}

/// Everything that is decided once per kernel and then threaded through
/// every step of the transformation.
#[derive(Debug)]
pub struct TransformContext {
    /// The options the pass was created with.
    pub options: DivergentBarrierOptions,
    /// How shared state and the group size are obtained.
    pub flavor: ShaderFlavor,
    /// The divergence oracle, computed over the kernel before anything is changed.
    pub oracle: WorkItemAnalysis,
    /// The union of every fence in the kernel.
    pub fence: FenceArgs,
    /// The running SLM size of the module. Allocating the done counter may grow it.
    pub slm_size: u32,
}

impl TransformContext {
    /// Creates the context for transforming `func`.
    pub fn new(options: DivergentBarrierOptions, module: &Module, func: Func, slm_size: u32) -> Self {
        Self::with_oracle(options, module, WorkItemAnalysis::compute(module, func), slm_size)
    }

    /// Creates the context for transforming `func`, with the oracle built on
    /// analyses cached in `am`.
    pub fn with_analyses(
        options: DivergentBarrierOptions,
        module: &Module,
        func: Func,
        slm_size: u32,
        am: &FunctionAnalysisManager,
    ) -> Self {
        let oracle = WorkItemAnalysis::compute_cached(module, func, am);

        Self::with_oracle(options, module, oracle, slm_size)
    }

    fn with_oracle(
        options: DivergentBarrierOptions,
        module: &Module,
        oracle: WorkItemAnalysis,
        slm_size: u32,
    ) -> Self {
        Self {
            options,
            flavor: ShaderFlavor::of(module),
            oracle,
            fence: FenceArgs::new(),
            slm_size,
        }
    }
}

dense_arena_key! {
    /// Refers to a single continuation of a kernel being transformed.
    pub struct ContId;
}

/// One piece of a kernel, starting at either the entry or directly after a barrier.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Continuation {
    /// The (initially empty) function the piece becomes.
    pub func: Func,
    /// The block in the kernel where it starts.
    pub entry: Block,
    /// The value the dispatcher sees when this continuation is next, `None`
    /// for the entry continuation.
    pub ordinal: Option<u32>,
}

/// Every continuation of one kernel, declared up front so that
/// bodies can be filled in later without holding onto references.
#[derive(Debug, Default)]
pub struct ContinuationArena {
    conts: ArenaMap<ContId, Continuation>,
    entry: Option<ContId>,
}

impl ContinuationArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a continuation. The first one recorded without an ordinal is the entry.
    pub fn push(&mut self, cont: Continuation) -> ContId {
        let id = self.conts.insert(cont);

        if cont.ordinal.is_none() && self.entry.is_none() {
            self.entry = Some(id);
        }

        id
    }

    /// Gets the entry continuation.
    pub fn entry(&self) -> Option<ContId> {
        self.entry
    }

    /// Gets the continuations that run after a barrier, in ordinal order.
    pub fn resumes(&self) -> impl Iterator<Item = (ContId, &Continuation)> + '_ {
        self.conts.iter().filter(|(_, cont)| cont.ordinal.is_some())
    }

    /// Iterates over every continuation.
    pub fn iter(&self) -> impl Iterator<Item = (ContId, &Continuation)> + '_ {
        self.conts.iter()
    }

    /// Gets the number of continuations.
    pub fn len(&self) -> usize {
        self.conts.len()
    }

    /// Checks if there are no continuations.
    pub fn is_empty(&self) -> bool {
        self.conts.is_empty()
    }
}

impl std::ops::Index<ContId> for ContinuationArena {
    type Output = Continuation;

    fn index(&self, id: ContId) -> &Continuation {
        &self.conts[id]
    }
}
