use std::{fmt::Write, rc::Rc};

use anyhow::Result;
use derive_more::Display;
use futures::future::LocalBoxFuture;
use smudge_atlas::Mapping;

use crate::UniformSchema;

/// Identifies a compiled program inside a [`ProgramCompiler`].
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("program#{_0}")]
pub struct ProgramId(pub u64);

/// Everything a backend needs to create a program: the generated WGSL, the mapping whose atlas
/// is sampled and the layout of the buffers.
#[derive(Debug, Clone)]
pub struct ProgramSource {
    pub wgsl: String,
    pub mapping: Rc<Mapping>,
    /// Per text: origin and size of its placement in normalized atlas coordinates. Contains at
    /// least one entry.
    pub bounds: Vec<[f32; 4]>,
    /// Number of `vec4<f32>` slots of the per-text uniform buffer.
    pub uniform_slots: usize,
}

impl ProgramSource {
    pub fn new(wgsl: String, mapping: Rc<Mapping>, schema: &UniformSchema) -> Self {
        let (width, height) = (mapping.width() as f32, mapping.height() as f32);
        let mut bounds: Vec<[f32; 4]> = mapping
            .placements()
            .map(|(_, b)| {
                [
                    b.min.x as f32 / width,
                    b.min.y as f32 / height,
                    b.width() as f32 / width,
                    b.height() as f32 / height,
                ]
            })
            .collect();
        if bounds.is_empty() {
            bounds.push([0.0; 4]);
        }
        Self {
            wgsl,
            mapping,
            bounds,
            uniform_slots: schema.buffer_len(),
        }
    }
}

/// Compiles generated programs.
pub trait ProgramCompiler {
    fn compile<'a>(&'a self, source: &'a ProgramSource) -> LocalBoxFuture<'a, Result<ProgramId>>;
}

const PRELUDE: &str = r#"struct Globals {
    resolution: vec2<f32>,
    time_delta: f32,
    global_time: f32,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var<uniform> globals: Globals;
@group(0) @binding(1) var atlas_texture: texture_2d<f32>;
@group(0) @binding(2) var atlas_sampler: sampler;
@group(0) @binding(3) var<storage, read> text_bounds: array<vec4<f32>>;
@group(0) @binding(4) var<storage, read> text_uniforms: array<vec4<f32>>;

const NO_TEXT: u32 = 0xffffffffu;
"#;

const FUNCTIONS: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var output: VertexOutput;
    output.position = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 0.0, 1.0);
    output.uv = uv;
    return output;
}

fn text_at(uv: vec2<f32>) -> u32 {
    for (var i = 0u; i < TEXT_COUNT; i = i + 1u) {
        let b = text_bounds[i];
        if (all(uv >= b.xy) && all(uv < b.xy + b.zw)) {
            return i;
        }
    }
    return NO_TEXT;
}

fn sample_text(text: u32, uv: vec2<f32>) -> vec4<f32> {
    if (any(uv < vec2<f32>(0.0)) || any(uv > vec2<f32>(1.0))) {
        return vec4<f32>(0.0);
    }
    let b = text_bounds[text];
    return textureSampleLevel(atlas_texture, atlas_sampler, b.xy + uv * b.zw, 0.0);
}

fn uResolution() -> vec2<f32> {
    return globals.resolution;
}

fn uTimeDelta() -> f32 {
    return globals.time_delta;
}

fn uGlobalTime() -> f32 {
    return globals.global_time;
}

fn uPlayTime(text: u32) -> f32 {
    return text_uniforms[text * SLOTS_PER_TEXT].x;
}
"#;

const FRAGMENT: &str = r#"
@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let text = text_at(input.uv);
    if (text == NO_TEXT) {
        return vec4<f32>(0.0);
    }
    let b = text_bounds[text];
    return main_image(text, (input.uv - b.xy) / b.zw);
}
"#;

/// Generates the complete program around a material's `main_image`.
///
/// The program covers the whole atlas. Every fragment that lies within a text's placement calls
/// `main_image` with the text's index and the fragment's position relative to the placement.
pub fn generate_wgsl(main_image: &str, schema: &UniformSchema) -> String {
    let mut wgsl = String::from(PRELUDE);
    let _ = writeln!(wgsl, "const TEXT_COUNT: u32 = {}u;", schema.text_count());
    let _ = writeln!(
        wgsl,
        "const SLOTS_PER_TEXT: u32 = {}u;",
        schema.slots_per_text()
    );
    wgsl.push_str(FUNCTIONS);

    for uniform in schema.uniforms() {
        let _ = write!(
            wgsl,
            "\nfn {}(text: u32) -> {} {{\n    return text_uniforms[text * SLOTS_PER_TEXT + {}u]{};\n}}\n",
            uniform.name,
            uniform.kind.wgsl_type(),
            uniform.offset,
            uniform.kind.swizzle()
        );
    }

    wgsl.push('\n');
    wgsl.push_str(main_image);
    wgsl.push_str(FRAGMENT);
    wgsl
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Uniform;

    const MAIN_IMAGE: &str = "fn main_image(text: u32, uv: vec2<f32>) -> vec4<f32> {\n    return sample_text(text, uv) * uTint(text);\n}\n";

    #[test]
    fn accessors_are_generated_per_uniform() {
        let uniforms = [
            Uniform::new("uSpeed", 1.0),
            Uniform::new("uTint", [1.0, 1.0, 1.0, 1.0]),
        ];
        let schema = UniformSchema::new(&uniforms, 2).unwrap();
        let wgsl = generate_wgsl(MAIN_IMAGE, &schema);

        assert!(wgsl.contains("const TEXT_COUNT: u32 = 2u;"));
        assert!(wgsl.contains("const SLOTS_PER_TEXT: u32 = 3u;"));
        assert!(wgsl.contains(
            "fn uSpeed(text: u32) -> f32 {\n    return text_uniforms[text * SLOTS_PER_TEXT + 1u].x;"
        ));
        assert!(wgsl.contains(
            "fn uTint(text: u32) -> vec4<f32> {\n    return text_uniforms[text * SLOTS_PER_TEXT + 2u];"
        ));
        assert!(wgsl.contains(MAIN_IMAGE));
    }

    #[test]
    fn main_image_precedes_the_fragment_stage() {
        let schema = UniformSchema::new(&[], 0).unwrap();
        let wgsl = generate_wgsl(MAIN_IMAGE, &schema);
        let main_image = wgsl.find("fn main_image(").unwrap();
        let fragment = wgsl.find("fn fs_main(").unwrap();
        assert!(main_image < fragment);
        assert!(wgsl.contains("const TEXT_COUNT: u32 = 0u;"));
    }
}
