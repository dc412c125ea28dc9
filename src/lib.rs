//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

#![deny(
    unreachable_pub,
    missing_docs,
    missing_abi,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links
)]

//! # Garnet
//!
//! These are the basic APIs for building and manipulating GIR, a GPU kernel IR,
//! along with the divergent-barrier transformation that makes barriers reached
//! under work-item divergent control flow safe to execute.
//!
//! The [`vm`] module contains a SIMT simulator that executes one workgroup of
//! a kernel, which is how the behavior of the transformation is checked.

pub mod analysis;
pub mod arena;
pub mod ir;
pub mod pass;
pub mod transforms;
pub mod utility;
pub mod vm;
