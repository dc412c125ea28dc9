//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::dense_arena_key;
use crate::ir::Value;
use smallvec::SmallVec;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

dense_arena_key! {
    /// References a single basic block in the program.
    ///
    /// Must be resolved with a [`DataFlowGraph`](crate::ir::DataFlowGraph) into an actual
    /// [`BasicBlock`] object.
    pub struct Block;
}

/// Models a single basic block in a function within the IR.
///
/// These are made up of two key things:
///
///   1. A linear sequence of instructions, ending in a terminator.
///   2. Zero or more basic-block parameters modeling the φs that the block has as input.
///
/// ```other
/// switch.end(i32 %next):
///   %0 = iconst i32 -1
///   %1 = icmp eq i32 %next, %0
///   condbr bool %1, do.atomic.inc, atomic.join
/// ```
///
/// The instructions themselves are owned by the [`Layout`](crate::ir::Layout),
/// this only holds the name and the parameters.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct BasicBlock {
    name: String,
    params: SmallVec<[Value; 4]>,
}

impl BasicBlock {
    pub(in crate::ir) fn new(name: String) -> Self {
        Self {
            name,
            params: SmallVec::new(),
        }
    }

    /// Gets the name of the block.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the parameters of the block.
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub(in crate::ir) fn append_param(&mut self, val: Value) {
        self.params.push(val);
    }

    pub(in crate::ir) fn set_name(&mut self, name: String) {
        self.name = name;
    }
}
