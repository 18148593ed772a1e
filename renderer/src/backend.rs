use anyhow::{Result, bail};
use bytemuck::{Pod, Zeroable};
use futures::future::LocalBoxFuture;
use smudge_atlas::RgbaImage;
use smudge_material::{ProgramCompiler, ProgramId, Slot};

/// The smallest texture dimension an atlas may be limited to.
pub const MIN_TEXTURE_DIMENSION: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub max_texture_dimension: u32,
    /// Read-only storage buffers can be bound to the fragment stage.
    pub fragment_storage_buffers: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            max_texture_dimension: 8192,
            fragment_storage_buffers: true,
        }
    }
}

impl Capabilities {
    /// Fails if generated programs can't run with these capabilities.
    pub fn check(&self) -> Result<()> {
        if self.max_texture_dimension < MIN_TEXTURE_DIMENSION {
            bail!(
                "Maximum texture dimension {} is below the required {MIN_TEXTURE_DIMENSION}",
                self.max_texture_dimension
            );
        }
        if !self.fragment_storage_buffers {
            bail!("Storage buffers are not supported in fragment shaders");
        }
        Ok(())
    }
}

/// The layout of the `Globals` uniform of generated programs.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Globals {
    pub resolution: [f32; 2],
    pub time_delta: f32,
    pub global_time: f32,
}

/// The device a [`Renderer`](crate::Renderer) draws with.
///
/// Every program renders into its own target, which has the size of the program's atlas.
pub trait GpuBackend: ProgramCompiler {
    fn capabilities(&self) -> Capabilities;

    fn write_uniforms(
        &self,
        program: ProgramId,
        globals: &Globals,
        text_uniforms: &[Slot],
    ) -> Result<()>;

    fn draw(&self, program: ProgramId) -> Result<()>;

    /// Reads back what was last drawn with the program.
    fn read_pixels(&self, program: ProgramId) -> LocalBoxFuture<'_, Result<RgbaImage>>;

    fn release_program(&self, program: ProgramId);

    /// Releases all resources. Called when the last lease of the context is dropped.
    fn release(&self);
}
