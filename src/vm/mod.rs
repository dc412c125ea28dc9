//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! A SIMT simulator for GIR kernels.
//!
//! This executes a single workgroup of a kernel, with each work-item interpreting
//! its own call stack and the workgroup synchronizing at `barrier`s. Anything
//! that differs between a kernel before and after a transform (memory contents,
//! barrier rounds, fences and atomics) is collected into an [`ExecutionTrace`].

mod engine;
mod memory;
mod runtime;
mod trace;

pub use engine::*;
pub use trace::*;
