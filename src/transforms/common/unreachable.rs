//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::ir::*;
use crate::utility::GaHashSet;
use smallvec::SmallVec;

/// Removes every block that can't be reached from the entry block,
/// returning how many blocks were removed.
///
/// Values defined in unreachable blocks can't dominate any reachable use,
/// so nothing reachable refers to what gets removed.
pub fn remove_unreachable_blocks(def: &mut FunctionDefinition) -> usize {
    let entry = match def.entry_block() {
        Some(bb) => bb,
        None => return 0,
    };

    let mut reachable = GaHashSet::default();
    let mut worklist: SmallVec<[Block; 16]> = SmallVec::new();

    reachable.insert(entry);
    worklist.push(entry);

    while let Some(block) = worklist.pop() {
        let targets = def
            .layout
            .block_last_inst(block)
            .and_then(|inst| def.dfg.branch_info(inst));

        for target in targets.into_iter().flatten() {
            if reachable.insert(target.block()) {
                worklist.push(target.block());
            }
        }
    }

    let dead: SmallVec<[Block; 16]> = def
        .layout
        .blocks()
        .filter(|bb| !reachable.contains(bb))
        .collect();

    for block in dead.iter().copied() {
        log::trace!(
            target: "cleanup",
            "removing unreachable block '{}'",
            def.dfg.block_name(block)
        );

        def.layout.remove_block(block);
    }

    dead.len()
}
