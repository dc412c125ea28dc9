//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::arena;
use crate::arena::ArenaKey;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};
use std::{fmt, slice};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// A primary mapping of `K -> V`, where `K` is some key type and `V` is the
/// value being stored. Other mappings that use the same key as an existing
/// [`ArenaMap`] should use [`SecondaryMap`](super::SecondaryMap) instead.
///
/// This is effectively a typed wrapper around `Vec<T>` that only allows
/// indexing with the correct key type. Slots are never removed, so a key
/// handed out by [`Self::insert`] stays valid forever.
///
/// ```
/// # use garnet::arena_key;
/// # use garnet::arena::ArenaMap;
/// arena_key! {
///     struct Name;
/// }
///
/// let mut blocks = ArenaMap::new();
/// let bb: Name = blocks.insert("Hello!");
///
/// assert_eq!(blocks[bb], "Hello!");
/// ```
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct ArenaMap<K: ArenaKey, V> {
    slots: Vec<V>,
    _unused: PhantomData<fn() -> K>,
}

impl<K: ArenaKey, V> ArenaMap<K, V> {
    /// Creates a new, empty arena.
    #[inline]
    pub fn new() -> Self {
        Self {
            slots: Vec::default(),
            _unused: PhantomData,
        }
    }

    /// Creates an empty arena with an initial capacity.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            _unused: PhantomData,
        }
    }

    /// Checks if the arena contains a given key, i.e. whether a given key
    /// has been returned from [`Self::insert`] at some point.
    ///
    /// ```
    /// # use garnet::arena_key;
    /// # use garnet::arena::*;
    /// # arena_key! { struct Key; }
    /// let mut map = ArenaMap::default();
    /// let k1: Key = map.insert(true);
    /// let k2 = map.next_key();
    /// assert_eq!(map.contains(k1), true);
    /// assert_eq!(map.contains(k2), false);
    /// ```
    #[inline]
    pub fn contains(&self, key: K) -> bool {
        key.key_index() < self.slots.len()
    }

    /// Gets the value associated with a given key, or `None` if the key
    /// was never handed out by this arena.
    #[inline]
    pub fn get(&self, key: K) -> Option<&V> {
        self.slots.get(key.key_index())
    }

    /// Gets the value associated with a given key, or `None` if the key
    /// was never handed out by this arena.
    #[inline]
    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        self.slots.get_mut(key.key_index())
    }

    /// Adds an item into the arena, and returns a key that can be used to
    /// access that data later.
    #[inline]
    pub fn insert(&mut self, value: V) -> K {
        self.slots.push(value);

        K::key_new(self.slots.len() - 1)
    }

    /// Gets the key that *will be* returned by [`Self::insert`] when it's
    /// called next. This key is not valid until that [`Self::insert`] call occurs.
    #[inline]
    pub fn next_key(&self) -> K {
        K::key_new(self.slots.len())
    }

    /// Gets the number of elements that have been pushed into the arena.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Checks if the arena has had any elements pushed into it.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Reserves capacity for at least `additional` more elements.
    #[inline]
    pub fn reserve(&mut self, additional: usize) {
        self.slots.reserve(additional)
    }

    /// Returns an iterator over the keys of the arena, in increasing order.
    #[inline]
    pub fn keys(&self) -> impl DoubleEndedIterator<Item = K> + ExactSizeIterator {
        (0..self.slots.len()).map(K::key_new)
    }

    /// Returns an iterator over the values of the arena, in key order.
    #[inline]
    pub fn values(&self) -> slice::Iter<'_, V> {
        self.slots.iter()
    }

    /// Returns an iterator over the values of the arena, in key order.
    #[inline]
    pub fn values_mut(&mut self) -> slice::IterMut<'_, V> {
        self.slots.iter_mut()
    }

    /// Returns an iterator over every `(key, &value)` pair in the arena.
    ///
    /// ```
    /// # use garnet::arena_key;
    /// # use garnet::arena::*;
    /// arena_key! { struct Key; }
    /// let mut map = ArenaMap::default();
    /// let k1: Key = map.insert(15);
    /// let k2: Key = map.insert(16);
    /// let pairs: Vec<_> = map.iter().collect();
    /// assert_eq!(pairs, vec![(k1, &15), (k2, &16)]);
    /// ```
    #[inline]
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (K, &V)> + ExactSizeIterator {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, v)| (K::key_new(i), v))
    }

    /// Returns an iterator over every `(key, &mut value)` pair in the arena.
    #[inline]
    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = (K, &mut V)> + ExactSizeIterator {
        self.slots
            .iter_mut()
            .enumerate()
            .map(|(i, v)| (K::key_new(i), v))
    }
}

impl<K: ArenaKey, V> Default for ArenaMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ArenaKey, V> Index<K> for ArenaMap<K, V> {
    type Output = V;

    #[inline]
    fn index(&self, key: K) -> &Self::Output {
        &self.slots[key.key_index()]
    }
}

impl<K: ArenaKey, V> IndexMut<K> for ArenaMap<K, V> {
    #[inline]
    fn index_mut(&mut self, key: K) -> &mut Self::Output {
        &mut self.slots[key.key_index()]
    }
}

impl<K: ArenaKey, V: Debug> Debug for ArenaMap<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        arena::debug_write_map(f, "ArenaMap", self.iter())
    }
}
