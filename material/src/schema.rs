use std::ops::Range;

use anyhow::{Result, bail};

use crate::{Uniform, UniformKind, UniformValue, validate_uniform_name};

/// A slot is one `vec4<f32>` in the per-text uniform buffer.
pub type Slot = [f32; 4];

/// A declared uniform and where it lives inside a text's block of slots.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformSlot {
    pub name: String,
    pub kind: UniformKind,
    /// Offset inside the text's block.
    pub offset: usize,
    pub default: UniformValue,
}

/// The layout of the shared per-text uniform buffer.
///
/// Every text owns a contiguous block of `slots_per_text` slots, ordered like the texts in the
/// mapping. The first slot of a block holds the built-ins: `x` is the text's play time in
/// seconds, `y` is 1.0 while the text is playing.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformSchema {
    uniforms: Vec<UniformSlot>,
    text_count: usize,
}

impl UniformSchema {
    pub const BUILTIN_SLOTS: usize = 1;

    pub fn new(uniforms: &[Uniform], text_count: usize) -> Result<Self> {
        let mut slots: Vec<UniformSlot> = Vec::with_capacity(uniforms.len());
        for (i, uniform) in uniforms.iter().enumerate() {
            validate_uniform_name(&uniform.name)?;
            if slots.iter().any(|s| s.name == uniform.name) {
                bail!("Uniform `{}` is declared more than once", uniform.name);
            }
            slots.push(UniformSlot {
                name: uniform.name.clone(),
                kind: uniform.kind(),
                offset: Self::BUILTIN_SLOTS + i,
                default: uniform.value,
            });
        }
        Ok(Self {
            uniforms: slots,
            text_count,
        })
    }

    pub fn uniforms(&self) -> &[UniformSlot] {
        &self.uniforms
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformSlot> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn text_count(&self) -> usize {
        self.text_count
    }

    pub fn slots_per_text(&self) -> usize {
        Self::BUILTIN_SLOTS + self.uniforms.len()
    }

    /// The number of slots the buffer has. Never zero, so that it can always be bound.
    pub fn buffer_len(&self) -> usize {
        (self.text_count * self.slots_per_text()).max(1)
    }

    /// The range of slots owned by the text at `index`.
    pub fn text_block(&self, index: usize) -> Option<Range<usize>> {
        (index < self.text_count).then(|| {
            let start = index * self.slots_per_text();
            start..start + self.slots_per_text()
        })
    }

    /// A buffer where every text has its uniforms set to their defaults.
    pub fn default_buffer(&self) -> Vec<Slot> {
        let mut buffer = vec![[0.0; 4]; self.buffer_len()];
        for index in 0..self.text_count {
            let start = index * self.slots_per_text();
            for uniform in &self.uniforms {
                buffer[start + uniform.offset] = uniform.default.to_slot();
            }
        }
        buffer
    }
}
