//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::analysis::{ControlFlowGraphAnalysis, DominatorTreeAnalysis, PostDominatorTreeAnalysis};
use crate::ir::{Func, Function};
use crate::utility::GaHashMap;
use smallvec::{smallvec, SmallVec};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

struct All;

/// Models the set of analyses that a given transformation pass
/// preserves.
///
/// This is not a contract that is checked, it is expected the the transform knows what
/// analyses it can preserve. If it reports incorrectly, this can lead to mis-compilations
/// or panics inside the compiler.
#[derive(Debug)]
pub struct PreservedAnalyses {
    // sorted so we can binary_search for `contains`
    preserved: SmallVec<[TypeId; 2]>,
}

impl PreservedAnalyses {
    /// Returns a [`PreservedAnalyses`] that marks every analysis as preserved.
    pub fn all() -> Self {
        Self {
            preserved: smallvec![TypeId::of::<All>()],
        }
    }

    /// Returns a [`PreservedAnalyses`] that marks every analysis as invalidated.
    pub fn none() -> Self {
        Self {
            preserved: smallvec![],
        }
    }

    /// Checks if *all* analyses are preserved by a given transformation. If this
    /// is true, the transformation effectively reports to have not changed
    /// *anything* in the IR.
    ///
    /// This cannot be obtained in any way except [`Self::all`].
    pub fn preserves_all(&self) -> bool {
        self.preserved.len() == 1 && self.preserved[0] == TypeId::of::<All>()
    }

    /// Reports that an analysis is preserved by the current transformation.
    pub fn preserve<T: Any>(&mut self) {
        self.insert(TypeId::of::<T>())
    }

    /// Gets the intersection of two sets of preserved analyses, returning
    /// the analyses that are preserved both by `self` and by `other`.
    pub fn intersect(self, other: PreservedAnalyses) -> PreservedAnalyses {
        if self.preserves_all() {
            return other;
        }

        if other.preserves_all() {
            return self;
        }

        let mut new = PreservedAnalyses::none();
        let intersection = self.preserved.into_iter().filter(|id| other.contains(*id));

        for id in intersection {
            new.insert(id)
        }

        new
    }

    /// Checks if an analysis is preserved. If all are preserved
    /// or an analysis with an equivalent [`TypeId`] has been preserved
    /// with [`Self::preserve`], this returns `true`.
    pub fn is_preserved(&self, id: TypeId) -> bool {
        self.preserves_all() || self.contains(id)
    }

    fn contains(&self, id: TypeId) -> bool {
        self.preserved.binary_search(&id).is_ok()
    }

    fn insert(&mut self, id: TypeId) {
        if let Err(pos) = self.preserved.binary_search(&id) {
            self.preserved.insert(pos, id);
        }
    }
}

/// An analysis that runs over an entire function.
pub trait FunctionAnalysisPass: Any {
    /// The result type of a given analysis.
    type Result: Any;

    /// Allows analyses to declare dependence on other analyses.
    ///
    /// This directly implies that if T is preserved, all analyses referred
    /// to by T::expects_preserved are also assumed to be preserved.
    ///
    /// This is checked in debug mode.
    fn expects_preserved(&self) -> SmallVec<[TypeId; 2]> {
        SmallVec::new()
    }

    /// Performs the analysis and returns a computed result. This should not be an impure
    /// operation, running the analysis twice on the same input should produce the same result.
    fn run(&mut self, func: &Function, am: &FunctionAnalysisManager) -> Self::Result;
}

trait ErasedFunctionPass {
    fn expects_preserved(&self) -> SmallVec<[TypeId; 2]>;

    fn run(&mut self, func: &Function, am: &FunctionAnalysisManager) -> Rc<dyn Any>;
}

struct FunctionPassWrapper<T> {
    inner: T,
}

impl<T: FunctionAnalysisPass> ErasedFunctionPass for FunctionPassWrapper<T> {
    fn expects_preserved(&self) -> SmallVec<[TypeId; 2]> {
        self.inner.expects_preserved()
    }

    fn run(&mut self, func: &Function, am: &FunctionAnalysisManager) -> Rc<dyn Any> {
        Rc::new(self.inner.run(func, am))
    }
}

/// Lazily runs function analyses and caches their results until they are
/// invalidated by a transform.
///
/// Results are keyed by the [`Func`] of the function they were computed over,
/// so a transform that edits a function must report what it failed to
/// preserve or stale results will be handed out.
#[derive(Default)]
pub struct FunctionAnalysisManager {
    passes: GaHashMap<TypeId, RefCell<Box<dyn ErasedFunctionPass>>>,
    results: RefCell<GaHashMap<(Func, TypeId), Rc<dyn Any>>>,
}

impl FunctionAnalysisManager {
    /// Creates a manager with no analyses registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manager with every function analysis in [`crate::analysis`] registered.
    pub fn with_default_analyses() -> Self {
        let mut fam = Self::new();

        fam.add_analysis(ControlFlowGraphAnalysis);
        fam.add_analysis(DominatorTreeAnalysis);
        fam.add_analysis(PostDominatorTreeAnalysis);

        fam
    }

    /// Registers an analysis pass with the manager. The pass is not run until it is
    /// later requested through [`Self::get`].
    pub fn add_analysis<T: FunctionAnalysisPass>(&mut self, pass: T) {
        let id = TypeId::of::<T>();

        self.passes
            .insert(id, RefCell::new(Box::new(FunctionPassWrapper { inner: pass })));
    }

    /// Checks if an analysis has been registered.
    pub fn is_registered<T: FunctionAnalysisPass>(&self) -> bool {
        self.passes.contains_key(&TypeId::of::<T>())
    }

    /// Lazily gets the result of an analysis. If the analysis has been invalidated
    /// (or was never run), the result is computed, cached, and then returned.
    ///
    /// Panics if `T` has not been registered.
    pub fn get<T: FunctionAnalysisPass>(&self, func: &Function) -> Rc<T::Result> {
        let id = TypeId::of::<T>();
        let key = (func.func(), id);
        let cached = self.results.borrow().get(&key).cloned();

        let result = match cached {
            Some(result) => result,
            None => {
                let pass = match self.passes.get(&id) {
                    Some(pass) => pass,
                    None => panic!("trying to get analysis that hasn't been registered"),
                };

                // the pass may request the results of other analyses while it runs,
                // so `results` must not be borrowed here
                let result = pass.borrow_mut().run(func, self);

                self.results.borrow_mut().insert(key, result.clone());

                result
            }
        };

        match result.downcast::<T::Result>() {
            Ok(result) => result,
            Err(_) => panic!("cached analysis result had the wrong type"),
        }
    }

    /// Invalidates every cached result for `func` that was not preserved.
    pub fn invalidate(&self, func: Func, preserved: &PreservedAnalyses) {
        self.invalidate_where(preserved, |f| f == func);
    }

    /// Invalidates every cached result for every function that was not preserved.
    pub fn invalidate_all(&self, preserved: &PreservedAnalyses) {
        self.invalidate_where(preserved, |_| true);
    }

    fn invalidate_where<F: Fn(Func) -> bool>(&self, preserved: &PreservedAnalyses, pred: F) {
        if preserved.preserves_all() {
            return;
        }

        #[cfg(debug_assertions)]
        for (id, pass) in self.passes.iter() {
            if preserved.is_preserved(*id) {
                for dep in pass.borrow().expects_preserved() {
                    debug_assert!(
                        preserved.is_preserved(dep),
                        "analysis was preserved without the analyses it depends on"
                    );
                }
            }
        }

        self.results
            .borrow_mut()
            .retain(|(func, id), _| !pred(*func) || preserved.is_preserved(*id));
    }

    /// Gets the number of results currently cached.
    pub fn cached_results(&self) -> usize {
        self.results.borrow().len()
    }
}

impl Debug for FunctionAnalysisManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionAnalysisManager")
            .field("passes", &self.passes.len())
            .field("cached", &self.cached_results())
            .finish()
    }
}

/// The analysis manager handed to module passes. It owns the
/// [`FunctionAnalysisManager`] used for per-function analyses inside of
/// those passes.
#[derive(Debug)]
pub struct ModuleAnalysisManager {
    fam: FunctionAnalysisManager,
}

impl ModuleAnalysisManager {
    /// Creates a manager whose function manager has the default analyses registered.
    pub fn new() -> Self {
        Self::with_function_manager(FunctionAnalysisManager::with_default_analyses())
    }

    /// Wraps an existing function analysis manager.
    pub fn with_function_manager(fam: FunctionAnalysisManager) -> Self {
        Self { fam }
    }

    /// Gets the function analysis manager.
    pub fn function_analyses(&self) -> &FunctionAnalysisManager {
        &self.fam
    }

    /// Invalidates everything cached that `preserved` does not cover.
    pub fn invalidate(&self, preserved: &PreservedAnalyses) {
        self.fam.invalidate_all(preserved);
    }
}

impl Default for ModuleAnalysisManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ControlFlowGraph;
    use crate::ir::*;
    use std::cell::Cell;

    struct CountingAnalysis(Rc<Cell<u32>>);

    impl FunctionAnalysisPass for CountingAnalysis {
        type Result = usize;

        fn expects_preserved(&self) -> SmallVec<[TypeId; 2]> {
            smallvec![TypeId::of::<ControlFlowGraphAnalysis>()]
        }

        fn run(&mut self, func: &Function, am: &FunctionAnalysisManager) -> usize {
            self.0.set(self.0.get() + 1);

            let cfg: Rc<ControlFlowGraph> = am.get::<ControlFlowGraphAnalysis>(func);

            cfg.blocks().count()
        }
    }

    fn module() -> (Module, Func) {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let mut b = module.define_function("f", SigBuilder::new().build());

        // fn void @f() {
        // entry:
        //   br exit
        // exit:
        //   ret void
        // }
        let entry = b.create_block("entry");
        let exit = b.create_block("exit");

        b.switch_to(entry);
        b.append().br(BlockWithParams::to(exit), DebugInfo::fake());
        b.switch_to(exit);
        b.append().ret_void(DebugInfo::fake());

        let func = b.define();

        (module, func)
    }

    #[test]
    fn preserved_intersection() {
        let mut a = PreservedAnalyses::none();
        a.preserve::<ControlFlowGraphAnalysis>();
        a.preserve::<DominatorTreeAnalysis>();

        let mut b = PreservedAnalyses::none();
        b.preserve::<DominatorTreeAnalysis>();

        let both = a.intersect(b);

        assert!(both.is_preserved(TypeId::of::<DominatorTreeAnalysis>()));
        assert!(!both.is_preserved(TypeId::of::<ControlFlowGraphAnalysis>()));
        assert!(PreservedAnalyses::all().preserves_all());
        assert!(!PreservedAnalyses::none().is_preserved(TypeId::of::<All>()));
    }

    #[test]
    fn results_are_cached_until_invalidated() {
        let (module, func) = module();
        let count = Rc::new(Cell::new(0));
        let mut fam = FunctionAnalysisManager::with_default_analyses();

        fam.add_analysis(CountingAnalysis(count.clone()));

        let f = module.function(func);

        assert_eq!(*fam.get::<CountingAnalysis>(f), 2);
        assert_eq!(*fam.get::<CountingAnalysis>(f), 2);
        assert_eq!(count.get(), 1);

        let mut keep = PreservedAnalyses::none();
        keep.preserve::<ControlFlowGraphAnalysis>();
        keep.preserve::<CountingAnalysis>();
        fam.invalidate(func, &keep);

        assert_eq!(*fam.get::<CountingAnalysis>(f), 2);
        assert_eq!(count.get(), 1);

        fam.invalidate_all(&PreservedAnalyses::none());

        assert_eq!(fam.cached_results(), 0);
        assert_eq!(*fam.get::<CountingAnalysis>(f), 2);
        assert_eq!(count.get(), 2);
    }
}
