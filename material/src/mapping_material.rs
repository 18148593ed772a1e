use std::{
    cell::{Ref, RefCell},
    fmt,
    rc::Rc,
};

use anyhow::{Result, bail};
use smudge_atlas::{Mapping, TextId};
use smudge_geometry::Rect;

use crate::{ProgramId, ProgramSource, Slot, Uniform, UniformSchema, UniformValue};

/// A material compiled for one specific [`Mapping`].
///
/// Holds the per-text uniform buffer the scopes write into and the renderer uploads every frame.
pub struct MappingMaterial {
    program: ProgramId,
    source: ProgramSource,
    schema: UniformSchema,
    defaults: RefCell<Vec<UniformValue>>,
    text_uniforms: RefCell<Vec<Slot>>,
}

impl fmt::Debug for MappingMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingMaterial")
            .field("program", &self.program)
            .field("texts", &self.schema.text_count())
            .field("slots_per_text", &self.schema.slots_per_text())
            .finish()
    }
}

impl MappingMaterial {
    pub fn new(program: ProgramId, source: ProgramSource, schema: UniformSchema) -> Self {
        let defaults: Vec<UniformValue> = schema.uniforms().iter().map(|u| u.default).collect();
        let text_uniforms = schema.default_buffer();
        Self {
            program,
            source,
            schema,
            defaults: defaults.into(),
            text_uniforms: text_uniforms.into(),
        }
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn source(&self) -> &ProgramSource {
        &self.source
    }

    pub fn wgsl(&self) -> &str {
        &self.source.wgsl
    }

    pub fn mapping(&self) -> &Rc<Mapping> {
        &self.source.mapping
    }

    pub fn schema(&self) -> &UniformSchema {
        &self.schema
    }

    pub fn text_index(&self, id: &TextId) -> Option<usize> {
        self.source.mapping.index_of(id)
    }

    /// The text's placement in render space.
    pub fn bounds_for_text(&self, id: &TextId) -> Option<Rect> {
        self.source.mapping.bounds_for_text(id)
    }

    /// The current default of a declared uniform.
    pub fn default_value(&self, name: &str) -> Option<UniformValue> {
        let slot = self.schema.uniforms().iter().position(|u| u.name == name)?;
        self.defaults.borrow().get(slot).copied()
    }

    /// Takes over new default values from the material's declarations.
    ///
    /// Only values whose name and kind match the compiled schema are taken over, structural
    /// changes need a rebuild.
    pub fn refresh_defaults(&self, uniforms: &[Uniform]) {
        let mut defaults = self.defaults.borrow_mut();
        for (slot, declared) in self.schema.uniforms().iter().enumerate() {
            if let Some(uniform) = uniforms
                .iter()
                .find(|u| u.name == declared.name && u.kind() == declared.kind)
            {
                defaults[slot] = uniform.value;
            }
        }
    }

    /// Writes the block of slots owned by a text.
    pub fn write_text_slots(&self, id: &TextId, slots: &[Slot]) -> Result<()> {
        let Some(index) = self.text_index(id) else {
            bail!("Text {id} is not part of the mapping");
        };
        let Some(block) = self.schema.text_block(index) else {
            bail!("Text {id} has no uniform block");
        };
        if slots.len() != block.len() {
            bail!(
                "Text {id} owns {} slots, but {} were written",
                block.len(),
                slots.len()
            );
        }
        self.text_uniforms.borrow_mut()[block].copy_from_slice(slots);
        Ok(())
    }

    /// The per-text uniform buffer, ready to be uploaded.
    pub fn text_uniforms(&self) -> Ref<'_, [Slot]> {
        Ref::map(self.text_uniforms.borrow(), |v| v.as_slice())
    }
}
