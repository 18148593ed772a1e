use std::rc::Rc;

use anyhow::{Context, Result};
use smudge_atlas::Mapping;
use tracing::instrument;

use crate::{
    Material, MappingMaterial, ProgramCompiler, ProgramSource, UniformSchema, generate_wgsl,
    validate_definition,
};

/// Turns a material and a finished mapping into a [`MappingMaterial`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MaterialCompiler;

impl MaterialCompiler {
    /// The material is read once at the start, later changes to it don't affect the result.
    #[instrument(skip_all, fields(texts = mapping.len()))]
    pub async fn build<C: ProgramCompiler + ?Sized>(
        &self,
        compiler: &C,
        mapping: Rc<Mapping>,
        material: &dyn Material,
    ) -> Result<MappingMaterial> {
        validate_definition(material).context("Invalid material definition")?;
        let main_image = material.main_image();
        let uniforms = material.uniforms();

        let schema = UniformSchema::new(&uniforms, mapping.len())?;
        let wgsl = generate_wgsl(&main_image, &schema);
        let source = ProgramSource::new(wgsl, mapping, &schema);

        let program = compiler
            .compile(&source)
            .await
            .context("Compiling the material's program")?;
        log::debug!(
            "Compiled {program} for {} texts with {} uniforms",
            schema.text_count(),
            schema.uniforms().len()
        );

        Ok(MappingMaterial::new(program, source, schema))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use anyhow::bail;
    use futures::{FutureExt, future::LocalBoxFuture};
    use smudge_atlas::{MappingBuilder, RgbaImage, Text, TextRasterizer, TextSnapshot};
    use smudge_geometry::SizePx;

    use super::*;
    use crate::{ProgramId, ShaderMaterial, UniformValue};

    struct BlockRasterizer;

    impl TextRasterizer for BlockRasterizer {
        fn rasterize(&self, text: &TextSnapshot, _ratio: f64) -> Result<RgbaImage> {
            Ok(RgbaImage::new(SizePx::new(
                8 * text.value.chars().count().max(1) as u32,
                16,
            )))
        }
    }

    #[derive(Default)]
    struct FakeCompiler {
        next: Cell<u64>,
        sources: RefCell<Vec<String>>,
        fail: bool,
    }

    impl ProgramCompiler for FakeCompiler {
        fn compile<'a>(
            &'a self,
            source: &'a ProgramSource,
        ) -> LocalBoxFuture<'a, Result<ProgramId>> {
            async move {
                if self.fail {
                    bail!("Shader error");
                }
                self.sources.borrow_mut().push(source.wgsl.clone());
                let id = self.next.get() + 1;
                self.next.set(id);
                Ok(ProgramId(id))
            }
            .boxed_local()
        }
    }

    async fn mapping(values: &[&str]) -> Rc<Mapping> {
        let texts: Vec<TextSnapshot> = values
            .iter()
            .enumerate()
            .map(|(i, v)| Text::new(format!("t{i}"), *v).snapshot())
            .collect();
        Rc::new(
            MappingBuilder::new(BlockRasterizer)
                .build(&texts, 1.0, 4096)
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn builds_a_material_for_the_mapping() {
        let mapping = mapping(&["hello", "world!"]).await;
        let material = ShaderMaterial::passthrough().with_uniform("uSpeed", 2.0);
        let compiler = FakeCompiler::default();

        let built = MaterialCompiler
            .build(&compiler, mapping.clone(), &material)
            .await
            .unwrap();

        assert_eq!(built.program(), ProgramId(1));
        assert_eq!(built.schema().text_count(), 2);
        assert_eq!(built.source().bounds.len(), 2);
        assert_eq!(built.text_uniforms().len(), 4);
        assert_eq!(
            built.default_value("uSpeed"),
            Some(UniformValue::Float(2.0))
        );
        assert_eq!(
            built.bounds_for_text(&"t1".into()),
            mapping.bounds_for_text(&"t1".into())
        );
        assert_eq!(compiler.sources.borrow().len(), 1);
    }

    #[tokio::test]
    async fn text_slots_are_written_into_their_block() {
        let mapping = mapping(&["a", "b"]).await;
        let material = ShaderMaterial::passthrough().with_uniform("uSpeed", 1.0);
        let built = MaterialCompiler
            .build(&FakeCompiler::default(), mapping, &material)
            .await
            .unwrap();

        built
            .write_text_slots(&"t1".into(), &[[0.5, 1.0, 0.0, 0.0], [3.0, 0.0, 0.0, 0.0]])
            .unwrap();
        assert_eq!(built.text_uniforms()[2], [0.5, 1.0, 0.0, 0.0]);
        assert_eq!(built.text_uniforms()[3], [3.0, 0.0, 0.0, 0.0]);
        assert_eq!(built.text_uniforms()[1], [1.0, 0.0, 0.0, 0.0]);

        assert!(built.write_text_slots(&"t1".into(), &[[0.0; 4]]).is_err());
        assert!(built.write_text_slots(&"missing".into(), &[[0.0; 4]; 2]).is_err());
    }

    #[tokio::test]
    async fn defaults_follow_value_changes_of_the_material() {
        let mapping = mapping(&["a"]).await;
        let material = ShaderMaterial::passthrough().with_uniform("uSpeed", 1.0);
        let built = MaterialCompiler
            .build(&FakeCompiler::default(), mapping, &material)
            .await
            .unwrap();

        material.set_uniform_value("uSpeed", 4.0).unwrap();
        built.refresh_defaults(&material.uniforms());
        assert_eq!(
            built.default_value("uSpeed"),
            Some(UniformValue::Float(4.0))
        );
    }

    #[tokio::test]
    async fn invalid_materials_and_compile_errors_fail_the_build() {
        let mapping = mapping(&["a"]).await;
        let invalid = ShaderMaterial::new("fn something_else() {}");
        assert!(
            MaterialCompiler
                .build(&FakeCompiler::default(), mapping.clone(), &invalid)
                .await
                .is_err()
        );

        let failing = FakeCompiler {
            fail: true,
            ..Default::default()
        };
        assert!(
            MaterialCompiler
                .build(&failing, mapping, &ShaderMaterial::passthrough())
                .await
                .is_err()
        );
    }
}
