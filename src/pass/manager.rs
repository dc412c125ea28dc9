//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::ir::Module;
use crate::pass::*;

/// Manages running a set of passes over IR.
///
/// An important note is that this is actually a module pass itself, it's a pass
/// that simply runs other passes.
#[derive(Default)]
pub struct ModulePassManager {
    passes: Vec<Box<dyn ModuleTransformPass>>,
}

impl ModulePassManager {
    /// Creates a new, empty, module pass manager.
    pub fn new() -> Self {
        Self {
            passes: Vec::default(),
        }
    }

    /// Adds a transformation pass to the pass manager. This pass's order is defined
    /// relative to other calls to [`Self::add_pass`].
    pub fn add_pass<T: ModuleTransformPass + 'static>(&mut self, pass: T) {
        self.passes.push(Box::new(pass));
    }

    /// Gets the number of passes that have been added.
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Checks if no passes have been added.
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

impl ModuleTransformPass for ModulePassManager {
    fn run(&mut self, module: &mut Module, am: &ModuleAnalysisManager) -> PreservedAnalyses {
        let mut preserved = PreservedAnalyses::all();

        for pass in self.passes.iter_mut() {
            let other = pass.run(module, am);

            // anything cached for the module that the pass didn't keep is stale now
            am.invalidate(&other);

            preserved = preserved.intersect(other)
        }

        preserved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ControlFlowGraphAnalysis;
    use crate::ir::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Counting(Rc<Cell<u32>>, PreservedAnalyses);

    impl ModuleTransformPass for Counting {
        fn run(&mut self, _: &mut Module, _: &ModuleAnalysisManager) -> PreservedAnalyses {
            self.0.set(self.0.get() + 1);

            let mut preserved = PreservedAnalyses::none();

            if self.1.is_preserved(std::any::TypeId::of::<ControlFlowGraphAnalysis>()) {
                preserved.preserve::<ControlFlowGraphAnalysis>();
            }

            preserved
        }
    }

    #[test]
    fn runs_in_order_and_intersects() {
        let count = Rc::new(Cell::new(0));
        let mut keeps_cfg = PreservedAnalyses::none();

        keeps_cfg.preserve::<ControlFlowGraphAnalysis>();

        let mut mpm = ModulePassManager::new();
        mpm.add_pass(Counting(count.clone(), keeps_cfg));
        mpm.add_pass(Counting(count.clone(), PreservedAnalyses::none()));

        let mut module = Module::new("test", ShaderKind::OpenCL);
        let am = ModuleAnalysisManager::new();
        let preserved = mpm.run(&mut module, &am);

        assert_eq!(count.get(), 2);
        assert_eq!(mpm.len(), 2);
        assert!(!preserved.is_preserved(std::any::TypeId::of::<ControlFlowGraphAnalysis>()));
    }
}
