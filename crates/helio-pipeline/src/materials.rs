//! Material export and live updates
//!
//! Materials are written one per line as 11 whitespace separated fields:
//! serialized name, base color (3), roughness, index of refraction,
//! metallic, then the four emission channels (shading model, normal
//! strength and two arbitrary values).

use crate::{Error, Result};
use glam::{Vec3, Vec4};
use std::fmt::Write as _;
use std::path::Path;

/// Number of fields in one serialized material line
pub const FIELD_COUNT: usize = 11;

#[derive(Debug, Clone, PartialEq)]
pub struct PbrMaterial {
    pub name: String,
    pub base_color: Vec3,
    pub roughness: f32,
    pub ior: f32,
    pub metallic: f32,
    /// x: shading model, y: normal strength, z/w: arbitrary
    pub emission: Vec4,
}

impl PbrMaterial {
    pub fn new(name: impl Into<String>, base_color: Vec3) -> Self {
        Self {
            name: name.into(),
            base_color,
            roughness: 0.5,
            ior: 1.5,
            metallic: 0.0,
            emission: Vec4::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Material {
    Pbr(PbrMaterial),
    /// Anything without the PBR inputs, skipped by export
    Legacy { name: String },
}

impl Material {
    pub fn name(&self) -> &str {
        match self {
            Material::Pbr(m) => &m.name,
            Material::Legacy { name } => name,
        }
    }
}

/// `"{index}-{name}"` with spaces removed, or `unnamed` if nothing is left
pub fn serialized_name(index: usize, name: &str) -> String {
    let compact = name.replace(' ', "");
    let compact = compact.trim();
    if compact.is_empty() {
        format!("{}-unnamed", index)
    } else {
        format!("{}-{}", index, compact)
    }
}

/// One parsed material line
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedMaterial {
    pub name: String,
    pub base_color: Vec3,
    pub roughness: f32,
    pub ior: f32,
    pub metallic: f32,
    pub emission: Vec4,
}

impl SerializedMaterial {
    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != FIELD_COUNT {
            return Err(Error::Material(format!(
                "Expected {} fields, got {}: '{}'",
                FIELD_COUNT,
                fields.len(),
                line
            )));
        }

        let mut values = [0.0f32; FIELD_COUNT - 1];
        for (value, field) in values.iter_mut().zip(&fields[1..]) {
            *value = field
                .parse()
                .map_err(|_| Error::Material(format!("Invalid number '{}' in '{}'", field, line)))?;
        }

        Ok(Self {
            name: fields[0].to_string(),
            base_color: Vec3::new(values[0], values[1], values[2]),
            roughness: values[3],
            ior: values[4],
            metallic: values[5],
            emission: Vec4::new(values[6], values[7], values[8], values[9]),
        })
    }

    fn write_into(&self, material: &mut PbrMaterial) {
        material.base_color = self.base_color;
        material.roughness = self.roughness;
        material.ior = self.ior;
        material.metallic = self.metallic;
        material.emission = self.emission;
    }
}

/// Serialize every PBR material, skipping the rest with a warning
pub fn export(materials: &[Material]) -> String {
    let mut out = String::new();
    for (i, material) in materials.iter().enumerate() {
        let Material::Pbr(m) = material else {
            log::warn!("Skipping non-pbr material '{}'", material.name());
            continue;
        };
        // writing into a String cannot fail
        let _ = writeln!(
            out,
            "{} {:?} {:?} {:?} {:?} {:?} {:?} {:?} {:?} {:?} {:?}",
            serialized_name(i, &m.name),
            m.base_color.x,
            m.base_color.y,
            m.base_color.z,
            m.roughness,
            m.ior,
            m.metallic,
            m.emission.x,
            m.emission.y,
            m.emission.z,
            m.emission.w,
        );
    }
    out
}

pub fn export_to_file(materials: &[Material], path: impl AsRef<Path>) -> Result<()> {
    std::fs::write(path.as_ref(), export(materials))?;
    log::info!("Exported materials to {}", path.as_ref().display());
    Ok(())
}

/// Apply an update to the material with the matching serialized name
///
/// Returns `false` and leaves everything untouched if nothing matches.
pub fn apply_update(materials: &mut [Material], update: &SerializedMaterial) -> bool {
    for (i, material) in materials.iter_mut().enumerate() {
        if let Material::Pbr(m) = material {
            if serialized_name(i, &m.name) == update.name {
                update.write_into(m);
                return true;
            }
        }
    }
    log::warn!(
        "Got material update for material '{}' but material was not found!",
        update.name
    );
    false
}
