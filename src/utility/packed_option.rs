//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use std::fmt::{Debug, Formatter, Result};
use std::mem;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// Helper trait for a type that can be packed into a [`PackedOption`].
///
/// These types need to have some null-ish value that they can reserve,
/// that value will be used to distinguish between `None` and `Some`.
/// Every [`dense_arena_key`](crate::dense_arena_key) implements this.
///
/// ```
/// # use garnet::utility::*;
/// #[derive(Copy, Clone)]
/// struct NonZero(i32);
///
/// impl Packable for NonZero {
///     fn reserved() -> Self {
///         NonZero(0)
///     }
///
///     fn is_reserved(&self) -> bool {
///         self.0 == 0
///     }
/// }
///
/// let opt = PackedOption::some(NonZero(15));
///
/// assert_eq!(opt.is_some(), true);
/// ```
pub trait Packable: Copy {
    /// Gets the value reserved to mean "none".
    fn reserved() -> Self;

    /// Checks if `self` is the reserved "none" value.
    fn is_reserved(&self) -> bool;
}

/// An [`Option`]-like type for [`Packable`] values that takes up exactly as
/// much space as the value would on its own. Used for the links inside of
/// the function [`Layout`](crate::ir::Layout).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct PackedOption<T: Packable>(T);

impl<T: Packable> PackedOption<T> {
    /// Creates a `None` instance of `PackedOption`.
    #[inline]
    pub fn none() -> Self {
        Self(T::reserved())
    }

    /// Creates a `Some` instance of `PackedOption`. The value must not be the
    /// reserved value of `T`.
    #[inline]
    pub fn some(value: T) -> Self {
        debug_assert!(!value.is_reserved(), "cannot pack the reserved value");

        Self(value)
    }

    /// Returns `true` if the packed option is a `None` value.
    #[inline]
    pub fn is_none(&self) -> bool {
        self.0.is_reserved()
    }

    /// Returns `true` if the packed option is a `Some` value.
    #[inline]
    pub fn is_some(&self) -> bool {
        !self.is_none()
    }

    /// Expands the packed option into a normal `Option` that can be pattern-matched on.
    #[inline]
    pub fn expand(self) -> Option<T> {
        if self.is_none() {
            None
        } else {
            Some(self.0)
        }
    }

    /// Replaces the packed value with `value`, returning the old contents.
    #[inline]
    pub fn replace(&mut self, value: T) -> Option<T> {
        mem::replace(self, Self::some(value)).expand()
    }

    /// Takes the value out of the packed option, leaving a `None` in its place.
    #[inline]
    pub fn take(&mut self) -> Option<T> {
        mem::replace(self, Self::none()).expand()
    }
}

impl<T: Packable> Default for PackedOption<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T: Packable> From<Option<T>> for PackedOption<T> {
    fn from(opt: Option<T>) -> Self {
        match opt {
            None => Self::none(),
            Some(t) => Self::some(t),
        }
    }
}

impl<T: Packable> From<PackedOption<T>> for Option<T> {
    fn from(packed: PackedOption<T>) -> Self {
        packed.expand()
    }
}

impl<T> Debug for PackedOption<T>
where
    T: Packable + Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        self.expand().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use crate::dense_arena_key;
    use crate::utility::PackedOption;
    use static_assertions::assert_eq_size;

    dense_arena_key! { struct Key; }

    assert_eq_size!(PackedOption<Key>, Key);

    #[test]
    fn observer_methods() {
        let none = PackedOption::<Key>::default();
        let mut some = PackedOption::some(Key(3));

        assert!(none.is_none());
        assert!(!none.is_some());
        assert_eq!(some.expand(), Some(Key(3)));

        some = none;

        assert!(some.is_none());
    }

    #[test]
    fn replace_and_take() {
        let mut opt = PackedOption::<Key>::none();

        assert_eq!(opt.replace(Key(1)), None);
        assert_eq!(opt.replace(Key(2)), Some(Key(1)));
        assert_eq!(opt.take(), Some(Key(2)));
        assert_eq!(opt.take(), None);
    }
}
