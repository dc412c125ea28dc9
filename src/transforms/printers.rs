//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::analysis::ModuleWriter;
use crate::ir::Module;
use crate::pass::{ModuleAnalysisManager, ModuleTransformPass, PreservedAnalyses};
use std::io;

/// This is a pass that writes out a textual representation of a module
/// to a given stream.
pub struct ModuleWriterPass {
    out: Box<dyn io::Write>,
}

impl ModuleWriterPass {
    /// Shorthand for a writer that prints to [`std::io::stdout`].
    pub fn stdout() -> Self {
        Self::with_writer(io::stdout())
    }

    /// Shorthand for a writer that prints to [`std::io::stderr`].
    pub fn stderr() -> Self {
        Self::with_writer(io::stderr())
    }

    /// Creates an instance of the pass with a given writer.
    ///
    /// This writer will be where the module is printed out when the pass
    /// is run over the IR.
    pub fn with_writer<T: io::Write + 'static>(writer: T) -> Self {
        Self {
            out: Box::new(writer),
        }
    }
}

impl ModuleTransformPass for ModuleWriterPass {
    fn run(&mut self, module: &mut Module, _: &ModuleAnalysisManager) -> PreservedAnalyses {
        let writer = ModuleWriter::new(module);

        if let Err(e) = self.out.write_all(writer.module().as_bytes()) {
            log::warn!("unable to write module '{}': {e}", module.name());
        }

        PreservedAnalyses::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::stringify_module;
    use crate::ir::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Shared(Rc<RefCell<Vec<u8>>>);

    impl io::Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);

            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writes_whole_module() {
        let mut module = Module::new("test", ShaderKind::OpenCL);
        let mut b = module.define_function("empty", SigBuilder::new().build());
        let entry = b.create_block("entry");

        b.switch_to(entry);
        b.append().ret_void(DebugInfo::fake());
        b.define();

        let out = Shared::default();
        let mut pass = ModuleWriterPass::with_writer(out.clone());
        let preserved = pass.run(&mut module, &ModuleAnalysisManager::new());

        assert!(preserved.preserves_all());
        assert_eq!(
            String::from_utf8_lossy(&out.0.borrow()),
            stringify_module(&module)
        );
        assert_eq!(stringify_module(&module), "fn void @empty() {\nentry:\n  ret void\n}\n");
    }
}
