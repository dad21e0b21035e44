//! Effect compiler with effect and program caches

use super::{EffectFlags, EffectLibrary, EffectOptions, Pass};
use crate::backend::{RenderBackend, ShaderDefine, ShaderDefines, ShaderHandle, ShaderRequest};
use crate::Result;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identity of a compiled effect, derived from its source and merged flags
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EffectId(pub u64);

impl EffectId {
    fn new(source: &str, flags: EffectFlags) -> Self {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        flags.bits().hash(&mut hasher);
        Self(hasher.finish())
    }
}

/// An effect ready to be bound to scene nodes
#[derive(Debug)]
pub struct CompiledEffect {
    pub id: EffectId,
    pub source: String,
    pub flags: EffectFlags,
    shaders: [Option<ShaderHandle>; 6],
    /// Conflicts resolved while merging options
    pub diagnostics: Vec<String>,
}

impl CompiledEffect {
    /// Program for a pass, `None` if the effect does not render in it
    pub fn shader(&self, pass: Pass) -> Option<ShaderHandle> {
        self.shaders[pass.index()]
    }

    pub fn renders(&self, pass: Pass) -> bool {
        self.flags.renders(pass)
    }
}

#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct EffectKey {
    source: String,
    options: EffectOptions,
}

#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct ProgramKey {
    source: String,
    flags: EffectFlags,
    pass: Pass,
}

/// Compiles effects into per-pass programs
pub struct EffectCompiler {
    effects: HashMap<EffectKey, Arc<CompiledEffect>>,
    programs: HashMap<ProgramKey, ShaderHandle>,
    common_defines: ShaderDefines,
    compiled_programs: usize,
}

impl EffectCompiler {
    pub fn new() -> Self {
        Self {
            effects: HashMap::new(),
            programs: HashMap::new(),
            common_defines: ShaderDefines::new(),
            compiled_programs: 0,
        }
    }

    /// Defines added to every program, e.g. `REFERENCE_MODE`
    pub fn set_common_defines(&mut self, defines: ShaderDefines) {
        self.common_defines = defines;
    }

    /// Merge defaults, the description's options and the caller's options
    ///
    /// Returns the flags and any conflicts that had to be resolved.
    pub fn merge_options(
        library: &EffectLibrary,
        source: &str,
        options: &EffectOptions,
    ) -> Result<(EffectFlags, Vec<String>)> {
        let description = library.get(source)?;
        let own = EffectOptions::from_map(&description.options)?;
        let mut flags = options.apply(own.apply(EffectFlags::defaults()));
        let mut diagnostics = Vec::new();

        if flags.contains(EffectFlags::RENDER_GBUFFER | EffectFlags::RENDER_FORWARD) {
            let msg = format!(
                "Effect '{}' enables both render_gbuffer and render_forward, using deferred only",
                source
            );
            log::error!("{}", msg);
            diagnostics.push(msg);
            flags -= EffectFlags::RENDER_FORWARD;
        }
        if flags.contains(EffectFlags::RENDER_FORWARD_PREPASS)
            && !flags.contains(EffectFlags::RENDER_FORWARD)
        {
            let msg = format!(
                "Effect '{}' enables render_forward_prepass without render_forward",
                source
            );
            log::error!("{}", msg);
            diagnostics.push(msg);
            flags -= EffectFlags::RENDER_FORWARD_PREPASS;
        }

        Ok((flags, diagnostics))
    }

    /// Compile an effect, reusing cached effects and programs
    pub fn compile(
        &mut self,
        library: &EffectLibrary,
        backend: &mut dyn RenderBackend,
        source: &str,
        options: &EffectOptions,
    ) -> Result<Arc<CompiledEffect>> {
        let key = EffectKey {
            source: source.to_string(),
            options: *options,
        };
        if let Some(effect) = self.effects.get(&key) {
            log::trace!("Using cached effect '{}'", source);
            return Ok(effect.clone());
        }

        let (flags, diagnostics) = Self::merge_options(library, source, options)?;
        let description = library.get(source)?;
        let mut shaders = [None; 6];

        for pass in Pass::ALL.into_iter().filter(|&p| flags.renders(p)) {
            let program_key = ProgramKey {
                source: source.to_string(),
                flags,
                pass,
            };
            if let Some(&handle) = self.programs.get(&program_key) {
                shaders[pass.index()] = Some(handle);
                continue;
            }

            let templates = description.shaders(pass);
            let request = ShaderRequest {
                label: format!("{}:{}", source, pass.name()),
                vertex: templates.vertex,
                fragment: templates.fragment,
                defines: self.program_defines(flags, pass),
            };
            log::debug!("Compiling effect program {}", request.label);
            let handle = backend.create_shader(&request)?;
            self.compiled_programs += 1;
            self.programs.insert(program_key, handle);
            shaders[pass.index()] = Some(handle);
        }

        let effect = Arc::new(CompiledEffect {
            id: EffectId::new(source, flags),
            source: source.to_string(),
            flags,
            shaders,
            diagnostics,
        });
        self.effects.insert(key, effect.clone());
        Ok(effect)
    }

    fn program_defines(&self, flags: EffectFlags, pass: Pass) -> ShaderDefines {
        let mut defines = self.common_defines.clone();
        for (name, flag) in [
            ("ALPHA_TESTING", EffectFlags::ALPHA_TESTING),
            ("NORMAL_MAPPING", EffectFlags::NORMAL_MAPPING),
            ("PARALLAX_MAPPING", EffectFlags::PARALLAX_MAPPING),
        ] {
            defines.insert(name.to_string(), ShaderDefine::Bool(flags.contains(flag)));
        }
        for other in Pass::ALL {
            defines.insert(other.define().to_string(), ShaderDefine::Bool(other == pass));
        }
        defines
    }

    /// Drop both caches and release every cached program
    pub fn invalidate(&mut self, backend: &mut dyn RenderBackend) {
        log::debug!(
            "Invalidating {} cached effects and {} programs",
            self.effects.len(),
            self.programs.len()
        );
        self.effects.clear();
        for (_, handle) in self.programs.drain() {
            backend.release_shader(handle);
        }
    }

    /// Forget everything compiled from one source, e.g. after its description changed
    pub fn invalidate_source(&mut self, source: &str, backend: &mut dyn RenderBackend) {
        self.effects.retain(|key, _| key.source != source);
        let stale: Vec<ProgramKey> = self
            .programs
            .keys()
            .filter(|key| key.source == source)
            .cloned()
            .collect();
        log::debug!("Invalidating {} programs of effect '{}'", stale.len(), source);
        for key in stale {
            if let Some(handle) = self.programs.remove(&key) {
                backend.release_shader(handle);
            }
        }
    }

    pub fn cached_effects(&self) -> usize {
        self.effects.len()
    }

    pub fn cached_programs(&self) -> usize {
        self.programs.len()
    }

    /// Programs sent to the backend since creation
    pub fn compiled_programs(&self) -> usize {
        self.compiled_programs
    }
}

impl Default for EffectCompiler {
    fn default() -> Self {
        Self::new()
    }
}
