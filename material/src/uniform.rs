use anyhow::{Result, bail};
use derive_more::Display;

/// Uniforms the generated program provides on its own.
pub const BUILTIN_UNIFORMS: [&str; 4] = ["uResolution", "uTimeDelta", "uGlobalTime", "uPlayTime"];

/// Function and binding names of the generated program that materials can't shadow.
const GENERATED_NAMES: [&str; 15] = [
    "main_image",
    "sample_text",
    "text_at",
    "vs_main",
    "fs_main",
    "globals",
    "atlas_texture",
    "atlas_sampler",
    "text_bounds",
    "text_uniforms",
    "TEXT_COUNT",
    "SLOTS_PER_TEXT",
    "NO_TEXT",
    "Globals",
    "VertexOutput",
];

const KEYWORDS: [&str; 16] = [
    "fn", "let", "var", "const", "if", "else", "loop", "for", "while", "return", "struct", "true",
    "false", "switch", "break", "continue",
];

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    #[display("float")]
    Float,
    #[display("vec2")]
    Vec2,
    #[display("vec3")]
    Vec3,
    #[display("vec4")]
    Vec4,
}

impl UniformKind {
    /// The WGSL type.
    pub fn wgsl_type(&self) -> &'static str {
        match self {
            UniformKind::Float => "f32",
            UniformKind::Vec2 => "vec2<f32>",
            UniformKind::Vec3 => "vec3<f32>",
            UniformKind::Vec4 => "vec4<f32>",
        }
    }

    /// The swizzle that extracts a value of this kind from a `vec4<f32>` slot.
    pub fn swizzle(&self) -> &'static str {
        match self {
            UniformKind::Float => ".x",
            UniformKind::Vec2 => ".xy",
            UniformKind::Vec3 => ".xyz",
            UniformKind::Vec4 => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Vec2(_) => UniformKind::Vec2,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
        }
    }

    /// The value padded to a `vec4<f32>` slot.
    pub fn to_slot(&self) -> [f32; 4] {
        match *self {
            UniformValue::Float(x) => [x, 0.0, 0.0, 0.0],
            UniformValue::Vec2([x, y]) => [x, y, 0.0, 0.0],
            UniformValue::Vec3([x, y, z]) => [x, y, z, 0.0],
            UniformValue::Vec4(v) => v,
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(v: [f32; 2]) -> Self {
        Self::Vec2(v)
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(v: [f32; 3]) -> Self {
        Self::Vec3(v)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(v: [f32; 4]) -> Self {
        Self::Vec4(v)
    }
}

// Unsuffixed float literals fall back to f64.

impl From<f64> for UniformValue {
    fn from(v: f64) -> Self {
        Self::Float(v as f32)
    }
}

impl From<[f64; 2]> for UniformValue {
    fn from(v: [f64; 2]) -> Self {
        Self::Vec2(v.map(|c| c as f32))
    }
}

impl From<[f64; 3]> for UniformValue {
    fn from(v: [f64; 3]) -> Self {
        Self::Vec3(v.map(|c| c as f32))
    }
}

impl From<[f64; 4]> for UniformValue {
    fn from(v: [f64; 4]) -> Self {
        Self::Vec4(v.map(|c| c as f32))
    }
}

/// A uniform declaration with its default value.
#[derive(Debug, Clone, PartialEq)]
pub struct Uniform {
    pub name: String,
    pub value: UniformValue,
}

impl Uniform {
    pub fn new(name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn kind(&self) -> UniformKind {
        self.value.kind()
    }
}

/// Checks that `name` can be declared by a material.
pub fn validate_uniform_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("Uniform name `{name}` is not a valid identifier");
    }
    if name.starts_with("__") {
        bail!("Uniform name `{name}` must not start with `__`");
    }
    if BUILTIN_UNIFORMS.contains(&name) || GENERATED_NAMES.contains(&name) {
        bail!("Uniform name `{name}` is reserved");
    }
    if KEYWORDS.contains(&name) {
        bail!("Uniform name `{name}` is a keyword");
    }
    Ok(())
}
