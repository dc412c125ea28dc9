//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! A simple typed arena module.
//!
//! Every entity in GIR (functions, blocks, instructions, values, globals) is
//! a small integer key into one of these arenas. Primary arenas never move or
//! reuse a slot, so a key stays valid for the lifetime of the arena that
//! produced it. Extra per-entity data lives in a [`SecondaryMap`] keyed by the
//! same key type.
//!
//! ```
//! # use garnet::arena_key;
//! # use garnet::arena::*;
//! arena_key! {
//!     pub struct Node;
//! }
//!
//! enum AstNode {
//!     Immediate(u64),
//!     Add(Node, Node),
//!     Mul(Node, Node)
//! }
//!
//! let mut arena = ArenaMap::new();
//!
//! // (16 + 3) * 3
//! let e1: Node = arena.insert(AstNode::Immediate(16));
//! let e2 = arena.insert(AstNode::Immediate(3));
//! let e3 = arena.insert(AstNode::Add(e1, e2));
//! let e4 = arena.insert(AstNode::Mul(e2, e3));
//! ```

mod key;
mod map;
mod secondary_map;

pub use key::ArenaKey;
pub use map::ArenaMap;
pub use secondary_map::SecondaryMap;

use std::fmt;
use std::fmt::{Debug, Formatter};

pub(in crate::arena) fn debug_write_map<'a, K, V>(
    f: &mut Formatter<'_>,
    name: &'static str,
    it: impl Iterator<Item = (K, &'a V)>,
) -> fmt::Result
where
    K: ArenaKey,
    V: Debug + 'a,
{
    write!(f, "{name} ")?;

    f.debug_map().entries(it).finish()
}
