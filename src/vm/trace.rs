//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

/// One `fence` executed by one work-item.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FenceRecord {
    /// The work-item that executed it.
    pub item: usize,
    /// The value of each flag, in [`FenceFlag`](crate::ir::FenceFlag) order.
    pub flags: [bool; 8],
    /// The raw scope operand.
    pub scope: u64,
}

/// One `atomic.iadd` executed by one work-item.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AtomicRecord {
    /// The work-item that executed it.
    pub item: usize,
    /// The address that was incremented.
    pub address: u64,
    /// The amount it was incremented by.
    pub amount: u64,
}

/// Everything observable about a single workgroup's execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionTrace {
    /// How many times every live work-item was released from a barrier.
    pub barrier_rounds: u32,
    /// Every fence, in execution order.
    pub fences: Vec<FenceRecord>,
    /// Every atomic increment, in execution order.
    pub atomics: Vec<AtomicRecord>,
    /// For each work-item, how many times it entered a block named `switch`.
    pub switch_iterations: Vec<u32>,
    /// The final contents of each buffer argument, in argument order.
    pub buffers: Vec<Vec<u8>>,
    /// The final contents of the workgroup's shared local memory.
    pub slm: Vec<u8>,
}

impl ExecutionTrace {
    /// Counts the atomic increments performed by one work-item.
    pub fn atomic_increments(&self, item: usize) -> usize {
        self.atomics.iter().filter(|a| a.item == item).count()
    }

    /// Reads the `index`th little-endian `u32` of a buffer.
    pub fn buffer_u32(&self, buffer: usize, index: usize) -> Option<u32> {
        self.buffers
            .get(buffer)
            .and_then(|bytes| read_u32(bytes, index * 4))
    }

    /// Reads a little-endian `u32` at byte `offset` in SLM.
    pub fn slm_u32(&self, offset: usize) -> Option<u32> {
        read_u32(&self.slm, offset)
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;

    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}
