//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022 Evan Cox <evanacox00@gmail.com>. All rights reserved.      //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use std::fmt::Debug;
use std::hash::Hash;

/// Models a type that can act as a key for the arena map types.
///
/// Keys are only meaningful for the arena that produced them, using a key
/// from one arena to index another is not checked.
///
/// In most cases this trait should not be implemented directly, prefer the
/// [`arena_key`](crate::arena_key) or [`dense_arena_key`](crate::dense_arena_key)
/// macros that provide the implementation for you.
pub trait ArenaKey: Copy + Eq + Ord + Hash + Debug {
    /// Creates a new key from a given arena index. Panics if the index
    /// cannot be represented by the underlying storage type.
    fn key_new(index: usize) -> Self;

    /// Converts the key back into the arena index it was made from.
    fn key_index(self) -> usize;
}

/// Creates a type-safe key for a [`ArenaMap`](crate::arena::ArenaMap) and associated data structures.
///
/// ```
/// # use garnet::arena_key;
/// # use garnet::arena::ArenaMap;
/// arena_key! {
///     /// We can have doc comments! This one uses the default data type.
///     pub struct EntityRef;
///
///     // this one is private, and uses u8 as the key type.
///     struct ExtremelyDenseRef(u8);
/// }
///
/// type EntityMap<V> = ArenaMap<EntityRef, V>;
/// type ExtremelyDenseMap<V> = ArenaMap<ExtremelyDenseRef, V>;
/// ```
#[macro_export(local_inner_macros)]
macro_rules! arena_key {
    ( $(#[$outer:meta])* $vis:vis struct $name:ident($ty:ty); $($rest:tt)* ) => {
        $(#[$outer])*
        #[repr(transparent)]
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
        $vis struct $name($ty);

        impl $crate::arena::ArenaKey for $name {
            #[inline]
            fn key_new(index: usize) -> Self {
                use std::convert::TryInto;

                Self(index.try_into().expect("index is not representable with key type"))
            }

            #[inline]
            fn key_index(self) -> usize {
                self.0 as usize
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
                std::write!(f, "{}({})", std::stringify!($name), self.0)
            }
        }

        arena_key!($($rest)*);
    };

    ( $(#[$outer:meta])* $vis:vis struct $name:ident; $($rest:tt)* ) => {
        arena_key! { $(#[$outer])* $vis struct $name(usize); $($rest)* }
    };

    () => {}
}

/// Creates a type-safe key with [`u32`] as the underlying data type. Acts just
/// like [`arena_key`] but with [`u32`] storage instead of [`usize`].
///
/// This also implements [`Packable`](crate::utility::Packable) with `u32::MAX`
/// reserved, so these keys can live inside a [`PackedOption`](crate::utility::PackedOption).
///
/// ```
/// # use garnet::dense_arena_key;
/// # use garnet::arena::ArenaMap;
/// dense_arena_key! {
///     pub struct DenseRef;
/// }
///
/// type DenseMapping = ArenaMap<DenseRef, String>;
/// ```
#[macro_export(local_inner_macros)]
macro_rules! dense_arena_key {
    ( $(#[$outer:meta])* $vis:vis struct $name:ident; $($rest:tt)* ) => {
        arena_key! { $(#[$outer])* $vis struct $name(u32); }

        impl $crate::utility::Packable for $name {
            #[inline]
            fn reserved() -> Self {
                Self(u32::MAX)
            }

            #[inline]
            fn is_reserved(&self) -> bool {
                self.0 == u32::MAX
            }
        }

        dense_arena_key!($($rest)*);
    };

    () => {}
}

#[cfg(test)]
mod tests {
    use crate::arena::*;
    use crate::utility::Packable;
    use static_assertions::assert_eq_size;

    #[test]
    fn reserved_key_works() {
        dense_arena_key! { struct K; }

        let mut map = ArenaMap::<K, i32>::default();

        let k1 = map.insert(15);
        let k2 = map.insert(32);
        let k3 = K::reserved();

        assert!(k3.is_reserved());
        assert!(!k2.is_reserved());
        assert!(!k1.is_reserved());
    }

    #[test]
    fn arena_key_default_is_usize() {
        arena_key! { struct Key; }

        assert_eq_size!(Key, usize);
    }

    #[test]
    fn dense_arena_key_is_u32() {
        dense_arena_key! { struct Key; }

        assert_eq_size!(Key, u32);
    }

    #[test]
    fn keys_round_trip_through_index() {
        dense_arena_key! { struct Key; }

        let mut map = ArenaMap::new();
        let k1: Key = map.insert(1);
        let k2: Key = map.insert(2);

        assert_eq!(k1.key_index(), 0);
        assert_eq!(Key::key_new(1), k2);
        assert_eq!(map[Key::key_new(1)], 2);
    }

    #[test]
    #[should_panic(expected = "index is not representable with key type")]
    fn arena_key_bounds_causes_panic() {
        arena_key! { struct Key(u8); }

        let mut map = ArenaMap::new();

        // 1 past what u8 can represent
        for i in 0..=256 {
            let k: Key = map.insert(i);

            assert_eq!(map[k], i);
        }
    }
}
