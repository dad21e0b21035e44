//! Effect descriptions and where they come from

use super::Pass;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Vertex template used when a pass does not name one
pub const DEFAULT_VERTEX_TEMPLATE: &str = "effects/templates/vertex.wgsl";

/// Shader templates for one pass
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PassShaders {
    #[serde(default)]
    pub vertex: Option<String>,
    pub fragment: String,
}

/// Declarative effect, as stored in an effect JSON file
///
/// ```json
/// {
///     "name": "foliage",
///     "options": { "render_shadow": false },
///     "passes": { "gbuffer": { "fragment": "effects/foliage.wgsl" } }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EffectDescription {
    pub name: String,
    #[serde(default)]
    pub options: BTreeMap<String, bool>,
    #[serde(default)]
    pub passes: BTreeMap<Pass, PassShaders>,
}

impl EffectDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: BTreeMap::new(),
            passes: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, name: &str, value: bool) -> Self {
        self.options.insert(name.to_string(), value);
        self
    }

    pub fn with_pass(mut self, pass: Pass, fragment: impl Into<String>) -> Self {
        self.passes.insert(
            pass,
            PassShaders {
                vertex: None,
                fragment: fragment.into(),
            },
        );
        self
    }

    /// Templates for a pass, falling back to the stock template of that pass
    pub fn shaders(&self, pass: Pass) -> PassShaders {
        let mut shaders = self.passes.get(&pass).cloned().unwrap_or_else(|| PassShaders {
            vertex: None,
            fragment: format!("effects/templates/{}.wgsl", pass.name()),
        });
        if shaders.vertex.is_none() {
            shaders.vertex = Some(DEFAULT_VERTEX_TEMPLATE.to_string());
        }
        shaders
    }
}

/// Effect descriptions addressable by source id
#[derive(Debug, Default)]
pub struct EffectLibrary {
    effects: HashMap<String, EffectDescription>,
}

impl EffectLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Library holding the `default` and `skybox` effects
    pub fn with_builtins() -> Self {
        let mut library = Self::new();
        library.insert("default", EffectDescription::new("default"));
        library.insert(
            "skybox",
            EffectDescription::new("skybox").with_pass(Pass::Gbuffer, "effects/skybox.wgsl"),
        );
        library
    }

    pub fn insert(&mut self, id: impl Into<String>, description: EffectDescription) {
        let id = id.into();
        if self.effects.insert(id.clone(), description).is_some() {
            log::debug!("Replaced effect description '{}'", id);
        }
    }

    pub fn get(&self, id: &str) -> Result<&EffectDescription> {
        self.effects
            .get(id)
            .ok_or_else(|| Error::Effect(format!("Unknown effect source '{}'", id)))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.effects.contains_key(id)
    }

    /// Load one description, registered under the file stem
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::Effect(format!("Invalid effect path '{}'", path.display())))?
            .to_string();
        let text = std::fs::read_to_string(path)?;
        let description: EffectDescription = serde_json::from_str(&text)
            .map_err(|e| Error::Effect(format!("{}: {}", path.display(), e)))?;
        self.insert(id.clone(), description);
        Ok(id)
    }

    /// Load every `*.json` file of a directory, returning how many were read
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let mut paths: Vec<_> = std::fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in &paths {
            self.load_file(path)?;
        }
        log::info!(
            "Loaded {} effect descriptions from {}",
            paths.len(),
            dir.as_ref().display()
        );
        Ok(paths.len())
    }

    /// Consume the library, yielding descriptions sorted by id
    pub fn into_descriptions(self) -> Vec<(String, EffectDescription)> {
        let mut descriptions: Vec<_> = self.effects.into_iter().collect();
        descriptions.sort_by(|a, b| a.0.cmp(&b.0));
        descriptions
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}
