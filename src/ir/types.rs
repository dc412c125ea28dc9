//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use paste::paste;
use static_assertions::assert_eq_size;
use std::fmt;
use std::fmt::{Display, Formatter};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// The address spaces that GIR pointers can point into.
///
/// These mirror the memory regions of a GPU work-item: `private` memory is
/// per-work-item scratch, `local` memory is shared between every work-item in a
/// workgroup (SLM) and `global`/`constant` memory is visible to the whole device.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum AddrSpace {
    /// Per-work-item memory, this is where `alloca`s live.
    Private,
    /// Device-wide memory.
    Global,
    /// Device-wide read-only memory.
    Constant,
    /// Workgroup-shared memory.
    Local,
    /// A pointer that can point into any of the above.
    Generic,
}

impl AddrSpace {
    /// Gets the suffix used when printing a pointer in this address space.
    pub fn suffix(self) -> &'static str {
        match self {
            AddrSpace::Private => "",
            AddrSpace::Global => ".global",
            AddrSpace::Constant => ".constant",
            AddrSpace::Local => ".local",
            AddrSpace::Generic => ".generic",
        }
    }
}

/// Models the different floating-point formats that GIR supports.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum FloatFormat {
    /// IEEE-754 single precision, `f32`.
    Single,
    /// IEEE-754 double precision, `f64`.
    Double,
}

/// Models an integer type, i.e. `iN` where `N` is one of 8, 16, 32 or 64.
///
/// ```
/// # use garnet::ir::Int;
/// let t1 = Int::i32();
/// let t2 = Int::new(32).unwrap();
/// assert_eq!(t1, t2);
/// assert_eq!(t1.mask(), 0xFFFF_FFFF);
/// ```
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Int {
    width: u8,
}

macro_rules! int_const_shorthand {
    ($($n:tt),*) => {
        paste! {
            $(
                #[doc = concat!("Shorthand for creating an integer of width `", stringify!($n), "`.")]
                pub const fn [<i $n>]() -> Self {
                    Self { width: $n }
                }
            )*
        }
    };
}

impl Int {
    /// Creates an `Int` with a given width, if the width is one GIR supports.
    #[inline]
    pub fn new(bit_width: u32) -> Option<Self> {
        match bit_width {
            8 | 16 | 32 | 64 => Some(Self {
                width: bit_width as u8,
            }),
            _ => None,
        }
    }

    int_const_shorthand!(8, 16, 32, 64);

    /// Gets the width of the integer in bits.
    #[inline]
    pub fn width(self) -> u32 {
        self.width as u32
    }

    /// Returns a mask with every bit of the integer set.
    #[inline]
    pub fn mask(self) -> u64 {
        if self.width == 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    /// Returns a mask with only the sign bit (the MSB in 2's complement) set.
    #[inline]
    pub fn sign_bit(self) -> u64 {
        1u64 << (self.width - 1)
    }

    /// Sign-extends a value of this width (stored in the low bits) to 64 bits.
    #[inline]
    pub fn sign_extend(self, value: u64) -> i64 {
        let value = value & self.mask();

        if value & self.sign_bit() != 0 {
            (value | !self.mask()) as i64
        } else {
            value as i64
        }
    }
}

/// A non-aggregate type that can be the element of a vector or array.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Scalar {
    /// `bool`
    Bool,
    /// `iN`
    Int(Int),
    /// `f32` / `f64`
    Float(FloatFormat),
    /// `ptr` in some address space
    Ptr(AddrSpace),
}

impl Scalar {
    /// Converts the scalar into a full [`Type`].
    pub fn ty(self) -> Type {
        match self {
            Scalar::Bool => Type::Bool,
            Scalar::Int(i) => Type::Int(i),
            Scalar::Float(f) => Type::Float(f),
            Scalar::Ptr(space) => Type::Ptr(space),
        }
    }
}

/// Models a type in GIR.
///
/// Types are small and `Copy`: compound types are restricted to a fixed-length
/// vector or array of scalars, so nothing needs to be interned.
///
/// ```
/// # use garnet::ir::*;
/// let t1 = Type::i32();
/// let t2 = Type::vector(Type::i32(), 3);
/// assert_eq!(t2.element(), Some(t1));
/// assert_eq!(t2.size_bytes(), 12);
/// assert_eq!(format!("{t2}"), "<3 x i32>");
/// ```
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Type {
    /// A `bool` in the IR.
    Bool,
    /// An `iN` in the IR.
    Int(Int),
    /// An `f32` or `f64` in the IR.
    Float(FloatFormat),
    /// A `ptr` in the IR, in a given address space.
    Ptr(AddrSpace),
    /// A `<N x T>` in the IR.
    Vector(Scalar, u32),
    /// A `[N x T]` in the IR, the only aggregate.
    Array(Scalar, u32),
}

assert_eq_size!(Type, u64);

macro_rules! int_type_shorthand {
    ($($n:tt),*) => {
        paste! {
            $(
                #[doc = concat!("Creates the `i", stringify!($n), "` type.")]
                pub const fn [<i $n>]() -> Self {
                    Self::Int(Int::[<i $n>]())
                }
            )*
        }
    };
}

impl Type {
    /// Creates a boolean type (the `bool` type in the IR).
    pub const fn bool() -> Self {
        Self::Bool
    }

    int_type_shorthand!(8, 16, 32, 64);

    /// Creates an integer type with a given width. `width` must be 8, 16, 32 or 64.
    pub fn int(width: u32) -> Self {
        match Int::new(width) {
            Some(i) => Self::Int(i),
            None => panic!("`i{width}` is not a valid integer type"),
        }
    }

    /// Creates the `f32` type.
    pub const fn f32() -> Self {
        Self::Float(FloatFormat::Single)
    }

    /// Creates the `f64` type.
    pub const fn f64() -> Self {
        Self::Float(FloatFormat::Double)
    }

    /// Creates a pointer type into the given address space.
    pub const fn ptr(space: AddrSpace) -> Self {
        Self::Ptr(space)
    }

    /// Creates a vector of `lanes` elements of `elem`. `elem` must be a scalar.
    pub fn vector(elem: Type, lanes: u32) -> Self {
        debug_assert!(lanes > 0, "vectors cannot be empty");

        Self::Vector(elem.unwrap_scalar(), lanes)
    }

    /// Creates an array of `len` elements of `elem`. `elem` must be a scalar.
    pub fn array(elem: Type, len: u32) -> Self {
        Self::Array(elem.unwrap_scalar(), len)
    }

    /// Checks if the type is `bool`.
    pub fn is_bool(self) -> bool {
        matches!(self, Type::Bool)
    }

    /// Checks if the type is any integer type.
    pub fn is_int(self) -> bool {
        matches!(self, Type::Int(_))
    }

    /// Checks if the type is a `bool` or an integer, i.e. a valid operand for bitwise ops.
    pub fn is_bool_or_int(self) -> bool {
        self.is_bool() || self.is_int()
    }

    /// Checks if the type is an integer of exactly `width` bits.
    pub fn is_int_of_width(self, width: u32) -> bool {
        matches!(self, Type::Int(i) if i.width() == width)
    }

    /// Checks if the type is a floating-point type.
    pub fn is_float(self) -> bool {
        matches!(self, Type::Float(_))
    }

    /// Checks if the type is a pointer in any address space.
    pub fn is_ptr(self) -> bool {
        matches!(self, Type::Ptr(_))
    }

    /// Checks if the type is a vector.
    pub fn is_vector(self) -> bool {
        matches!(self, Type::Vector(..))
    }

    /// Checks if the type is an array.
    pub fn is_array(self) -> bool {
        matches!(self, Type::Array(..))
    }

    /// Checks if the type is an aggregate. Vectors are not aggregates, they are
    /// register values with lanes.
    pub fn is_aggregate(self) -> bool {
        self.is_array()
    }

    /// Checks if the type is a scalar, i.e. neither a vector nor an array.
    pub fn is_scalar(self) -> bool {
        self.as_scalar().is_some()
    }

    /// Converts the type into a [`Scalar`] if it is one.
    pub fn as_scalar(self) -> Option<Scalar> {
        match self {
            Type::Bool => Some(Scalar::Bool),
            Type::Int(i) => Some(Scalar::Int(i)),
            Type::Float(f) => Some(Scalar::Float(f)),
            Type::Ptr(space) => Some(Scalar::Ptr(space)),
            Type::Vector(..) | Type::Array(..) => None,
        }
    }

    /// Converts the type into a [`Scalar`], panicking if it is compound.
    pub fn unwrap_scalar(self) -> Scalar {
        match self.as_scalar() {
            Some(s) => s,
            None => panic!("`{self}` is not a scalar type"),
        }
    }

    /// Gets the integer type out of `self`, panicking if it isn't an integer.
    pub fn unwrap_int(self) -> Int {
        match self {
            Type::Int(i) => i,
            _ => panic!("`{self}` is not an integer type"),
        }
    }

    /// Gets the address space of a pointer type.
    pub fn addr_space(self) -> Option<AddrSpace> {
        match self {
            Type::Ptr(space) => Some(space),
            _ => None,
        }
    }

    /// Gets the element type of a vector or array.
    pub fn element(self) -> Option<Type> {
        match self {
            Type::Vector(elem, _) | Type::Array(elem, _) => Some(elem.ty()),
            _ => None,
        }
    }

    /// Gets the number of lanes in a vector, or elements in an array.
    pub fn len(self) -> Option<u32> {
        match self {
            Type::Vector(_, n) | Type::Array(_, n) => Some(n),
            _ => None,
        }
    }

    /// Gets the size of the type in bytes, as laid out in memory.
    pub fn size_bytes(self) -> u64 {
        match self {
            Type::Bool => 1,
            Type::Int(i) => (i.width() / 8) as u64,
            Type::Float(FloatFormat::Single) => 4,
            Type::Float(FloatFormat::Double) => 8,
            Type::Ptr(_) => 8,
            Type::Vector(elem, n) | Type::Array(elem, n) => elem.ty().size_bytes() * n as u64,
        }
    }

    /// Gets the alignment of the type in bytes.
    pub fn align_bytes(self) -> u64 {
        match self.element() {
            Some(elem) => elem.size_bytes(),
            None => self.size_bytes(),
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            Type::Bool => write!(f, "bool"),
            Type::Int(i) => write!(f, "i{}", i.width()),
            Type::Float(FloatFormat::Single) => write!(f, "f32"),
            Type::Float(FloatFormat::Double) => write!(f, "f64"),
            Type::Ptr(space) => write!(f, "ptr{}", space.suffix()),
            Type::Vector(elem, n) => write!(f, "<{n} x {}>", elem.ty()),
            Type::Array(elem, n) => write!(f, "[{n} x {}]", elem.ty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::*;

    #[test]
    fn int_helpers() {
        let i8 = Int::i8();

        assert_eq!(i8.mask(), 0xFF);
        assert_eq!(i8.sign_bit(), 0x80);
        assert_eq!(i8.sign_extend(0xFF), -1);
        assert_eq!(Int::i64().mask(), u64::MAX);
        assert_eq!(Int::new(12), None);
    }

    #[test]
    fn sizes() {
        assert_eq!(Type::bool().size_bytes(), 1);
        assert_eq!(Type::i16().size_bytes(), 2);
        assert_eq!(Type::ptr(AddrSpace::Local).size_bytes(), 8);
        assert_eq!(Type::array(Type::f32(), 4).size_bytes(), 16);
        assert_eq!(Type::vector(Type::i64(), 2).align_bytes(), 8);
    }

    #[test]
    fn classification() {
        let vec = Type::vector(Type::i32(), 3);
        let arr = Type::array(Type::i32(), 3);

        assert!(!vec.is_aggregate());
        assert!(arr.is_aggregate());
        assert!(!vec.is_scalar());
        assert!(Type::ptr(AddrSpace::Global).is_scalar());
        assert_eq!(arr.len(), Some(3));
    }

    #[test]
    fn display() {
        assert_eq!(Type::ptr(AddrSpace::Private).to_string(), "ptr");
        assert_eq!(Type::ptr(AddrSpace::Local).to_string(), "ptr.local");
        assert_eq!(Type::array(Type::bool(), 2).to_string(), "[2 x bool]");
    }
}
