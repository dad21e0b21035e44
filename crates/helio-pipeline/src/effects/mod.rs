//! Per-object effects
//!
//! An effect is a set of per-pass shader templates plus option flags. The
//! [`EffectCompiler`] merges options, rejects conflicting combinations and
//! caches the resulting programs so identical requests never compile twice.

mod compiler;
mod library;

pub use compiler::{CompiledEffect, EffectCompiler, EffectId};
pub use library::{EffectDescription, EffectLibrary, PassShaders};

use crate::{Error, Result};
use bitflags::bitflags;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Sort value of a pass before the caller's sort is added
pub const BASE_SORT: i32 = 25;

/// Sort distance between consecutive passes
pub const SORT_STRIDE: i32 = 10;

/// Sort used by `set_effect` when the caller gives none
pub const DEFAULT_SORT: i32 = 30;

/// Render passes an object can take part in, in fixed order
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    Gbuffer,
    Shadow,
    Voxelize,
    Envmap,
    Forward,
    ForwardPrepass,
}

impl Pass {
    pub const ALL: [Pass; 6] = [
        Pass::Gbuffer,
        Pass::Shadow,
        Pass::Voxelize,
        Pass::Envmap,
        Pass::Forward,
        Pass::ForwardPrepass,
    ];

    /// Position in the fixed pass order
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Pass::Gbuffer => "gbuffer",
            Pass::Shadow => "shadow",
            Pass::Voxelize => "voxelize",
            Pass::Envmap => "envmap",
            Pass::Forward => "forward",
            Pass::ForwardPrepass => "forward_prepass",
        }
    }

    /// Shader constant identifying the pass a program was compiled for
    pub fn define(self) -> &'static str {
        match self {
            Pass::Gbuffer => "IS_GBUFFER_SHADER",
            Pass::Shadow => "IS_SHADOW_SHADER",
            Pass::Voxelize => "IS_VOXELIZE_SHADER",
            Pass::Envmap => "IS_ENVMAP_SHADER",
            Pass::Forward => "IS_FORWARD_SHADER",
            Pass::ForwardPrepass => "IS_FORWARD_PREPASS_SHADER",
        }
    }

    /// Option flag that enables this pass
    pub fn flag(self) -> EffectFlags {
        match self {
            Pass::Gbuffer => EffectFlags::RENDER_GBUFFER,
            Pass::Shadow => EffectFlags::RENDER_SHADOW,
            Pass::Voxelize => EffectFlags::RENDER_VOXELIZE,
            Pass::Envmap => EffectFlags::RENDER_ENVMAP,
            Pass::Forward => EffectFlags::RENDER_FORWARD,
            Pass::ForwardPrepass => EffectFlags::RENDER_FORWARD_PREPASS,
        }
    }

    /// Sort of this pass before the caller's sort is added
    pub fn base_sort(self) -> i32 {
        BASE_SORT + SORT_STRIDE * self.index() as i32
    }

    /// Sort at which a binding is recorded for this pass
    ///
    /// GBuffer bindings ignore the caller's sort.
    pub fn binding_sort(self, sort: i32) -> i32 {
        match self {
            Pass::Gbuffer => BASE_SORT,
            _ => self.base_sort() + sort,
        }
    }
}

bitflags! {
    /// Effect options after merging
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EffectFlags: u32 {
        const RENDER_GBUFFER = 1 << 0;
        const RENDER_SHADOW = 1 << 1;
        const RENDER_VOXELIZE = 1 << 2;
        const RENDER_ENVMAP = 1 << 3;
        const RENDER_FORWARD = 1 << 4;
        const RENDER_FORWARD_PREPASS = 1 << 5;
        const ALPHA_TESTING = 1 << 6;
        const NORMAL_MAPPING = 1 << 7;
        const PARALLAX_MAPPING = 1 << 8;
    }
}

impl EffectFlags {
    /// Built-in defaults every effect starts from
    pub fn defaults() -> Self {
        Self::RENDER_GBUFFER
            | Self::RENDER_SHADOW
            | Self::RENDER_VOXELIZE
            | Self::RENDER_ENVMAP
            | Self::ALPHA_TESTING
            | Self::NORMAL_MAPPING
    }

    /// Look up a flag by its option name, e.g. `render_gbuffer`
    pub fn from_option_name(name: &str) -> Option<Self> {
        let flag = match name {
            "render_gbuffer" => Self::RENDER_GBUFFER,
            "render_shadow" => Self::RENDER_SHADOW,
            "render_voxelize" => Self::RENDER_VOXELIZE,
            "render_envmap" => Self::RENDER_ENVMAP,
            "render_forward" => Self::RENDER_FORWARD,
            "render_forward_prepass" => Self::RENDER_FORWARD_PREPASS,
            "alpha_testing" => Self::ALPHA_TESTING,
            "normal_mapping" => Self::NORMAL_MAPPING,
            "parallax_mapping" => Self::PARALLAX_MAPPING,
            _ => return None,
        };
        Some(flag)
    }

    /// Whether the given pass is enabled
    pub fn renders(self, pass: Pass) -> bool {
        self.contains(pass.flag())
    }
}

impl Default for EffectFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// A partial override of effect options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EffectOptions {
    set: EffectFlags,
    clear: EffectFlags,
}

impl EffectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one option by name
    pub fn with(mut self, name: &str, value: bool) -> Result<Self> {
        let flag = EffectFlags::from_option_name(name)
            .ok_or_else(|| Error::Effect(format!("Unknown effect option '{}'", name)))?;
        self.set_flag(flag, value);
        Ok(self)
    }

    /// Parse a JSON-style option map
    pub fn from_map(options: &BTreeMap<String, bool>) -> Result<Self> {
        options
            .iter()
            .try_fold(Self::new(), |acc, (name, &value)| acc.with(name, value))
    }

    pub fn enable(mut self, flags: EffectFlags) -> Self {
        self.set_flag(flags, true);
        self
    }

    pub fn disable(mut self, flags: EffectFlags) -> Self {
        self.set_flag(flags, false);
        self
    }

    fn set_flag(&mut self, flag: EffectFlags, value: bool) {
        if value {
            self.set |= flag;
            self.clear -= flag;
        } else {
            self.clear |= flag;
            self.set -= flag;
        }
    }

    /// Apply this override on top of `flags`
    pub fn apply(&self, flags: EffectFlags) -> EffectFlags {
        (flags | self.set) - self.clear
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.clear.is_empty()
    }
}
