//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! Contains the analyses that the transforms in [`crate::transforms`] rely on.
//!
//! Most of these model [`FunctionAnalysisPass`] so they can be cached by a
//! [`FunctionAnalysisManager`]. The work-item analysis needs module metadata
//! on top of the function, so it isn't cached itself, but it can pull the
//! flow graph and dominator trees it is built on out of a manager.
//!
//! [`FunctionAnalysisPass`]: crate::pass::FunctionAnalysisPass
//! [`FunctionAnalysisManager`]: crate::pass::FunctionAnalysisManager

mod dominators;
mod flowgraph;
mod workitem;
mod writer;

pub use dominators::*;
pub use flowgraph::*;
pub use workitem::*;
pub use writer::*;
