//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! Defines the "transform" passes in GIR's infrastructure.
//!
//! These are the passes that can (potentially) modify GIR, and don't
//! actually logically yield a result.
//!
//! Some of these "transforms" are not actually transformations (e.g.
//! the verify pass is a "transform pass" even though it manipulates no IR),
//! but most of them are. The main transformation is in [`barriers`], the
//! building blocks it (and anything else) can reuse are in [`common`].

pub mod barriers;
pub mod common;

mod printers;
mod verify;

pub use barriers::{transform_module, DivergentBarrierOptions, DivergentBarrierPass};
pub use printers::*;
pub use verify::*;
