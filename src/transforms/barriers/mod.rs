//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! The divergent-barrier transformation.
//!
//! A `barrier` that only some work-items of a workgroup reach will hang on
//! hardware where every work-item must arrive. Kernels with such a barrier
//! are split at every barrier into continuations, each running from one
//! barrier (or the entry) to the next, and are then replaced with a
//! dispatcher loop that calls whichever continuation each work-item needs
//! next. Every work-item in the loop executes the same barriers, and the
//! loop only exits once a shared counter says every work-item has finished.
//!
//! Values that live across a barrier are spilled to private slots, since
//! each continuation is a separate function until they're all inlined back
//! into the dispatcher.
//!
//! ```
//! # use garnet::ir::*;
//! # use garnet::transforms::barriers::*;
//! let mut module = Module::new("example", ShaderKind::OpenCL);
//! let sig = SigBuilder::new().abi(CallConv::Kernel).build();
//! let mut b = module.define_function("k", sig);
//! let entry = b.create_block("entry");
//!
//! b.switch_to(entry);
//! b.append().barrier(DebugInfo::fake());
//! b.append().ret_void(DebugInfo::fake());
//!
//! let k = b.define();
//! module.metadata_mut().set_entry(k);
//!
//! // every work-item reaches the barrier, nothing to do
//! let outcome = transform_module(&mut module, &DivergentBarrierOptions::default()).unwrap();
//!
//! assert!(!outcome.changed);
//! ```

mod context;
mod crossing;
mod dispatch;
mod driver;
mod fence;
mod flavor;
mod options;
mod spill;
mod split;

pub use context::*;
pub use crossing::*;
pub use dispatch::*;
pub use driver::*;
pub use fence::*;
pub use flavor::*;
pub use options::*;
pub use spill::*;
pub use split::*;
