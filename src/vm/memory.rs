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
use smallvec::SmallVec;

/// A value as the simulator sees it. Scalars are kept as raw bits (floats
/// included), masked to the width of their type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(in crate::vm) enum Val {
    Scalar(u64),
    Agg(SmallVec<[u64; 4]>),
}

impl Val {
    pub(in crate::vm) fn zero(ty: Type) -> Self {
        match ty.len() {
            Some(n) => Val::Agg(SmallVec::from_elem(0, n as usize)),
            None => Val::Scalar(0),
        }
    }

    pub(in crate::vm) fn scalar(&self) -> Option<u64> {
        match self {
            Val::Scalar(raw) => Some(*raw),
            Val::Agg(_) => None,
        }
    }
}

/// Masks raw bits down to what a scalar of type `ty` can hold.
pub(in crate::vm) fn truncate(ty: Type, raw: u64) -> u64 {
    match ty {
        Type::Bool => raw & 1,
        Type::Int(i) => raw & i.mask(),
        Type::Float(FloatFormat::Single) => raw & 0xFFFF_FFFF,
        _ => raw,
    }
}

/// The region that workgroup-shared memory lives in.
pub(in crate::vm) const SLM: usize = 0;

/// Byte-addressed memory, split into independent regions. A pointer is the
/// region number (plus one, so that zero is never a valid pointer) in the top 32
/// bits and a byte offset into the region in the bottom 32 bits.
#[derive(Debug, Clone)]
pub(in crate::vm) struct Memory {
    regions: Vec<Vec<u8>>,
}

impl Memory {
    /// Creates memory with only an SLM region of `slm_size` bytes.
    pub(in crate::vm) fn new(slm_size: u32) -> Self {
        Self {
            regions: vec![vec![0; slm_size as usize]],
        }
    }

    pub(in crate::vm) fn pointer(region: usize, offset: u64) -> u64 {
        ((region as u64 + 1) << 32) | (offset & 0xFFFF_FFFF)
    }

    pub(in crate::vm) fn decode(ptr: u64) -> Option<(usize, u64)> {
        match ptr >> 32 {
            0 => None,
            region => Some((region as usize - 1, ptr & 0xFFFF_FFFF)),
        }
    }

    /// Creates a new region holding `bytes`, returning a pointer to its start.
    pub(in crate::vm) fn allocate(&mut self, bytes: Vec<u8>) -> u64 {
        self.regions.push(bytes);

        Self::pointer(self.regions.len() - 1, 0)
    }

    pub(in crate::vm) fn region(&self, region: usize) -> &[u8] {
        self.regions.get(region).map(Vec::as_slice).unwrap_or(&[])
    }

    fn bytes(&self, ptr: u64, size: u64) -> Option<&[u8]> {
        let (region, offset) = Self::decode(ptr)?;
        let bytes = self.regions.get(region)?;
        let end = offset.checked_add(size)?;

        bytes.get(offset as usize..end as usize)
    }

    fn bytes_mut(&mut self, ptr: u64, size: u64) -> Option<&mut [u8]> {
        let (region, offset) = Self::decode(ptr)?;
        let bytes = self.regions.get_mut(region)?;
        let end = offset.checked_add(size)?;

        bytes.get_mut(offset as usize..end as usize)
    }

    /// Reads a value of type `ty`, returning `None` if any byte is out of bounds.
    pub(in crate::vm) fn load(&self, ty: Type, ptr: u64) -> Option<Val> {
        match (ty.element(), ty.len()) {
            (Some(elem), Some(n)) => {
                let size = elem.size_bytes();
                let mut lanes = SmallVec::new();

                for i in 0..n as u64 {
                    lanes.push(read_le(self.bytes(ptr + i * size, size)?));
                }

                Some(Val::Agg(lanes))
            }
            _ => self
                .bytes(ptr, ty.size_bytes())
                .map(|bytes| truncate(ty, read_le(bytes)))
                .map(Val::Scalar),
        }
    }

    /// Writes a value of type `ty`, returning `None` if any byte is out of bounds.
    pub(in crate::vm) fn store(&mut self, ty: Type, ptr: u64, value: &Val) -> Option<()> {
        match value {
            Val::Scalar(raw) => {
                write_le(self.bytes_mut(ptr, ty.size_bytes())?, *raw);
            }
            Val::Agg(lanes) => {
                let size = ty.element().map_or(0, Type::size_bytes);

                for (i, lane) in lanes.iter().enumerate() {
                    write_le(self.bytes_mut(ptr + i as u64 * size, size)?, *lane);
                }
            }
        }

        Some(())
    }
}

fn read_le(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, byte| (acc << 8) | *byte as u64)
}

fn write_le(bytes: &mut [u8], raw: u64) {
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = (raw >> (i * 8)) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_independent() {
        let mut memory = Memory::new(8);
        let buffer = memory.allocate(vec![0; 4]);
        let slm = Memory::pointer(SLM, 4);

        memory
            .store(Type::i32(), buffer, &Val::Scalar(0xDEAD_BEEF))
            .unwrap();
        memory.store(Type::i16(), slm, &Val::Scalar(0x1234)).unwrap();

        assert_eq!(memory.load(Type::i32(), buffer), Some(Val::Scalar(0xDEAD_BEEF)));
        assert_eq!(memory.load(Type::i8(), buffer), Some(Val::Scalar(0xEF)));
        assert_eq!(memory.region(SLM), [0, 0, 0, 0, 0x34, 0x12, 0, 0]);

        // crossing the end of a region
        assert_eq!(memory.load(Type::i64(), buffer), None);
        assert_eq!(memory.store(Type::i32(), Memory::pointer(SLM, 6), &Val::Scalar(1)), None);
        assert_eq!(memory.load(Type::i32(), 0), None);
    }

    #[test]
    fn vectors_are_laid_out_by_lane() {
        let mut memory = Memory::new(0);
        let ty = Type::vector(Type::i16(), 3);
        let ptr = memory.allocate(vec![0; ty.size_bytes() as usize]);
        let value = Val::Agg(SmallVec::from_slice(&[1, 2, 3]));

        memory.store(ty, ptr, &value).unwrap();

        assert_eq!(memory.load(ty, ptr), Some(value));
        assert_eq!(memory.region(1), [1, 0, 2, 0, 3, 0]);
        assert_eq!(Val::zero(ty), Val::Agg(SmallVec::from_elem(0, 3)));
    }
}
