//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! Generic helpers for transforms that restructure whole bodies: cloning a
//! body into another function, inlining, and cleaning up the CFG afterwards.

mod clone;
mod inline;
mod unreachable;
mod uses;

pub use clone::*;
pub use inline::*;
pub use unreachable::*;
pub use uses::*;
