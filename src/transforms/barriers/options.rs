//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// What the target can express, as far as the transformation cares.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct TargetCaps {
    /// Whether the target can broadcast one lane's value to every other lane
    /// in a hardware thread (i.e. whether `readfirstlane` can be selected).
    pub supports_lane_broadcast: bool,
}

#[allow(clippy::derivable_impls)]
impl Default for TargetCaps {
    fn default() -> Self {
        Self {
            supports_lane_broadcast: true,
        }
    }
}

/// Knobs for the divergent-barrier transformation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct DivergentBarrierOptions {
    /// Whether to emit an optimization remark for each transformed kernel.
    pub enable_remarks: bool,
    /// Whether reloads of uniform spilled values should read a single lane
    /// and broadcast it, instead of loading in every lane.
    pub uniform_reload: bool,
    /// A SIMD width that the compiler has already committed to. Kernels whose
    /// group size is exactly this width are skipped, their barriers are
    /// trivially uniform.
    pub forced_simd_width: Option<u32>,
    /// Target capabilities.
    pub target: TargetCaps,
}

#[allow(clippy::derivable_impls)]
impl Default for DivergentBarrierOptions {
    fn default() -> Self {
        Self {
            enable_remarks: false,
            uniform_reload: false,
            forced_simd_width: None,
            target: TargetCaps::default(),
        }
    }
}

/// Environment variable that enables remarks.
pub const REMARKS_VAR: &str = "GARNET_DIVERGENT_BARRIER_REMARKS";

/// Environment variable that enables uniform reloads.
pub const UNIFORM_LOAD_VAR: &str = "GARNET_DIVERGENT_BARRIER_UNIFORM_LOAD";

/// Environment variable that forces a SIMD width.
pub const FORCED_SIMD_WIDTH_VAR: &str = "GARNET_FORCED_SIMD_WIDTH";

impl DivergentBarrierOptions {
    /// Reads the defaults, overriding them with any of [`REMARKS_VAR`],
    /// [`UNIFORM_LOAD_VAR`] or [`FORCED_SIMD_WIDTH_VAR`] that are set.
    ///
    /// Values that can't be parsed are ignored (with a warning).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`], except variables are resolved with `lookup`.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let mut options = Self::default();

        if let Some(value) = lookup(REMARKS_VAR).and_then(|v| parse_flag(REMARKS_VAR, &v)) {
            options.enable_remarks = value;
        }

        if let Some(value) = lookup(UNIFORM_LOAD_VAR).and_then(|v| parse_flag(UNIFORM_LOAD_VAR, &v)) {
            options.uniform_reload = value;
        }

        if let Some(raw) = lookup(FORCED_SIMD_WIDTH_VAR) {
            match raw.trim().parse::<u32>() {
                Ok(0) => options.forced_simd_width = None,
                Ok(width) => options.forced_simd_width = Some(width),
                Err(_) => log::warn!("ignoring {FORCED_SIMD_WIDTH_VAR}={raw:?}, expected an integer"),
            }
        }

        options
    }
}

fn parse_flag(var: &str, raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => {
            log::warn!("ignoring {var}={raw:?}, expected one of 1, 0, true or false");

            None
        }
    }
}
