//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use static_assertions::assert_eq_size;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// Holds the "debug info" for an instruction, i.e. where it came from.
///
/// This is required for every instruction and block parameter. It is carried
/// through cloning and inlining unchanged, so an instruction in a dispatcher
/// still points at the kernel source line it was originally compiled from.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Default)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct DebugInfo {
    line: u32,
    col: u32,
}

impl DebugInfo {
    /// Creates a new [`DebugInfo`] pointing at a given line and column.
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }

    /// Creates debug info for code that does not map to any source location,
    /// e.g. code synthesized by a transform or written in a test.
    pub fn fake() -> Self {
        Self { line: 0, col: 0 }
    }

    /// Returns the line in the original file that the entity came from.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Returns the column in the original file that the entity came from.
    pub fn col(&self) -> u32 {
        self.col
    }

    /// Checks if this is [`Self::fake`] debug info.
    pub fn is_fake(&self) -> bool {
        self.line == 0 && self.col == 0
    }
}

assert_eq_size!(DebugInfo, u64);
