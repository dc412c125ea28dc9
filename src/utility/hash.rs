//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use std::collections::{HashMap, HashSet};

/// Hash map keyed by small integer entities (values, blocks, offsets).
/// Uses `ahash` instead of SipHash, the keys never come from untrusted input.
pub type GaHashMap<K, V> = HashMap<K, V, ahash::RandomState>;

/// Hash set counterpart of [`GaHashMap`].
pub type GaHashSet<V> = HashSet<V, ahash::RandomState>;
