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
use crate::arena::{ArenaKey, ArenaMap};
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// A dense secondary mapping `K -> V` for keys from a primary [`ArenaMap`]. This
/// associates extra data with most (ideally *all*) keys from a given primary map.
///
/// Unlike the primary map, keys can be inserted in any order and removed again.
/// Storage is allocated for every index up to the largest inserted key.
///
/// ```
/// # use garnet::arena_key;
/// # use garnet::arena::*;
/// arena_key! { struct Player; }
///
/// let mut players = ArenaMap::new();
/// let p1: Player = players.insert("John");
/// let p2 = players.insert("Bob");
///
/// let mut health = SecondaryMap::map_all_keys(&players, |_, _| 200);
/// let mut ammo = SecondaryMap::with_primary(&players);
///
/// for k in players.keys() {
///   ammo.insert(k, 50);
/// }
///
/// assert_eq!(health[p2], 200);
/// assert_eq!(ammo[p1], 50);
/// ```
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct SecondaryMap<K: ArenaKey, V> {
    slots: Vec<Option<V>>,
    len: usize,
    _unused: PhantomData<fn() -> K>,
}

impl<K: ArenaKey, V> SecondaryMap<K, V> {
    /// Creates an empty map with `0` as the capacity.
    #[inline]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
            _unused: PhantomData,
        }
    }

    /// Creates an empty map with enough room for every key in `primary`.
    pub fn with_primary<T>(primary: &ArenaMap<K, T>) -> Self {
        let mut slots = Vec::with_capacity(primary.len());

        slots.resize_with(primary.len(), || None);

        Self {
            slots,
            len: 0,
            _unused: PhantomData,
        }
    }

    /// Creates a map that has a value for every key in `primary`, computed by `f`.
    pub fn map_all_keys<T, F>(primary: &ArenaMap<K, T>, mut f: F) -> Self
    where
        F: FnMut(K, &T) -> V,
    {
        let slots: Vec<Option<V>> = primary.iter().map(|(k, v)| Some(f(k, v))).collect();

        Self {
            len: slots.len(),
            slots,
            _unused: PhantomData,
        }
    }

    /// Creates a map that has a value for some keys in `primary`, namely the
    /// keys that `f` returns `Some` for.
    pub fn map_some_keys<T, F>(primary: &ArenaMap<K, T>, mut f: F) -> Self
    where
        F: FnMut(K, &T) -> Option<V>,
    {
        let slots: Vec<Option<V>> = primary.iter().map(|(k, v)| f(k, v)).collect();

        Self {
            len: slots.iter().filter(|slot| slot.is_some()).count(),
            slots,
            _unused: PhantomData,
        }
    }

    /// Checks if a key has a value in the map.
    #[inline]
    pub fn contains(&self, key: K) -> bool {
        matches!(self.slots.get(key.key_index()), Some(Some(_)))
    }

    /// Inserts a value for `key`, returning the old value if one was present.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let index = key.key_index();

        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }

        let old = self.slots[index].replace(value);

        if old.is_none() {
            self.len += 1;
        }

        old
    }

    /// Removes the value for `key`, returning it if one was present.
    pub fn remove(&mut self, key: K) -> Option<V> {
        let old = self.slots.get_mut(key.key_index()).and_then(Option::take);

        if old.is_some() {
            self.len -= 1;
        }

        old
    }

    /// Gets the value for `key`, if one is present.
    #[inline]
    pub fn get(&self, key: K) -> Option<&V> {
        self.slots.get(key.key_index()).and_then(Option::as_ref)
    }

    /// Gets the value for `key`, if one is present.
    #[inline]
    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        self.slots.get_mut(key.key_index()).and_then(Option::as_mut)
    }

    /// Gets the value for `key`, inserting one made by `f` if none is present.
    pub fn get_or_insert_with<F: FnOnce() -> V>(&mut self, key: K, f: F) -> &mut V {
        if !self.contains(key) {
            self.insert(key, f());
        }

        &mut self[key]
    }

    /// Gets the number of keys that have values in the map.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks if no keys have values in the map.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Removes every value from the map, keeping the allocation.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.len = 0;
    }

    /// Returns an iterator over the keys that have values, in increasing order.
    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    /// Returns an iterator over the values in the map, in key order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Returns an iterator over every `(key, &value)` pair in the map, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (K::key_new(i), v)))
    }

    /// Returns an iterator over every `(key, &mut value)` pair in the map, in key order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut V)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|v| (K::key_new(i), v)))
    }
}

impl<K: ArenaKey, V> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ArenaKey, V> Index<K> for SecondaryMap<K, V> {
    type Output = V;

    #[inline]
    fn index(&self, key: K) -> &Self::Output {
        match self.get(key) {
            Some(v) => v,
            None => panic!("key {key:?} is not present in secondary map"),
        }
    }
}

impl<K: ArenaKey, V> IndexMut<K> for SecondaryMap<K, V> {
    #[inline]
    fn index_mut(&mut self, key: K) -> &mut Self::Output {
        match self.get_mut(key) {
            Some(v) => v,
            None => panic!("key {key:?} is not present in secondary map"),
        }
    }
}

impl<K: ArenaKey, V: Debug> Debug for SecondaryMap<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        arena::debug_write_map(f, "SecondaryMap", self.iter())
    }
}

#[cfg(test)]
mod tests {
    use crate::arena::*;
    use crate::dense_arena_key;

    dense_arena_key! { struct Key; }

    #[test]
    #[should_panic]
    fn out_of_bounds() {
        let map = SecondaryMap::<Key, i32>::new();

        let _ = map[Key::key_new(3)];
    }

    #[test]
    fn insert_random() {
        let mut map = SecondaryMap::new();

        assert_eq!(map.insert(Key::key_new(7), "seven"), None);
        assert_eq!(map.insert(Key::key_new(2), "two"), None);
        assert_eq!(map.insert(Key::key_new(7), "SEVEN"), Some("seven"));

        assert_eq!(map.len(), 2);
        assert!(!map.contains(Key::key_new(3)));
        assert_eq!(
            map.iter().collect::<Vec<_>>(),
            vec![(Key::key_new(2), &"two"), (Key::key_new(7), &"SEVEN")]
        );
    }

    #[test]
    fn remove_clears_slot() {
        let mut map = SecondaryMap::new();
        let k = Key::key_new(1);

        map.insert(k, 10);

        assert_eq!(map.remove(k), Some(10));
        assert_eq!(map.remove(k), None);
        assert!(map.is_empty());
    }

    #[test]
    fn map_some_keys_skips() {
        let mut primary = ArenaMap::new();
        let keys: Vec<Key> = (0..5).map(|i| primary.insert(i)).collect();
        let evens = SecondaryMap::map_some_keys(&primary, |_, v| (v % 2 == 0).then_some(*v));

        assert_eq!(evens.len(), 3);
        assert!(evens.contains(keys[4]));
        assert!(!evens.contains(keys[1]));
    }
}
