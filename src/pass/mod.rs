//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! Defines the pass infrastructure used by the compiler.
//!
//! Passes are broken down into two categories:
//!
//! 1. Transformations
//! 2. Analyses
//!
//! Passes at their core are just objects that take in IR and possibly
//! return results:
//!
//! ```
//! # use garnet::ir::Module;
//! struct Pass { /* ... */ }
//!
//! impl Pass {
//!     fn run(&mut self, ir: &mut Module) { /* ... */ }
//! }
//! ```
//!
//! # Transform Passes
//! Transform passes operate over an entire module. They are allowed to take
//! `&mut self` to manipulate internal state, but they should always act as-if
//! they were pure functions of the IR.
//!
//! Analyses can be invalidated by transformations, so every transform returns
//! the set of analyses that it preserves through [`PreservedAnalyses`].
//!
//! # Analysis Passes
//! Analyses are computed lazily per function and cached inside of a
//! [`FunctionAnalysisManager`] until a transform invalidates them.

mod analysis;
mod manager;
mod transform;

pub use analysis::*;
pub use manager::*;
pub use transform::*;
