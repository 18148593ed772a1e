use std::{
    borrow::Cow,
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt,
};

use anyhow::{Context, Result, anyhow, bail};
use futures::{FutureExt, channel::oneshot, future::LocalBoxFuture};
use log::info;
use smudge_atlas::RgbaImage;
use smudge_geometry::SizePx;
use smudge_material::{ProgramCompiler, ProgramId, ProgramSource, Slot};
use wgpu::util::DeviceExt;

use crate::{
    Capabilities, GpuBackend, Globals,
    program_layout::{ProgramLayout, ProgramResources, TARGET_FORMAT},
};
const BYTES_PER_PIXEL: u32 = 4;

/// Renders offscreen with wgpu.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    layout: ProgramLayout,
    next_program: Cell<u64>,
    programs: RefCell<HashMap<ProgramId, GpuProgram>>,
}

struct GpuProgram {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    globals: wgpu::Buffer,
    text_uniforms: wgpu::Buffer,
    target: wgpu::Texture,
    size: SizePx,
}

impl fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("programs", &self.programs.borrow().len())
            .finish()
    }
}

impl WgpuBackend {
    /// Creates a backend on the default adapter without a surface.
    pub async fn headless() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::None,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("GPU Adapter not found")?;
        info!("GPU Adapter backend: {:?}", adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Smudge Device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: Default::default(),
                trace: Default::default(),
            })
            .await
            .context("Requesting device")?;

        info!(
            "- Max texture dimension: {}",
            device.limits().max_texture_dimension_2d
        );

        Ok(Self::new(device, queue))
    }

    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let layout = ProgramLayout::new(&device);
        Self {
            device,
            queue,
            layout,
            next_program: 0.into(),
            programs: HashMap::new().into(),
        }
    }

    fn create_program(&self, source: &ProgramSource) -> GpuProgram {
        let device = &self.device;
        let size = source.mapping.size();

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Program Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&source.wgsl)),
        });
        let pipeline = self.layout.create_pipeline(device, &shader);

        let atlas = self.upload_atlas(source.mapping.atlas());
        let atlas_view = atlas.create_view(&wgpu::TextureViewDescriptor::default());

        let globals = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Globals"),
            size: size_of::<Globals>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let text_bounds = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Text Bounds"),
            contents: bytemuck::cast_slice(&source.bounds),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let text_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Text Uniforms"),
            size: (source.uniform_slots.max(1) * size_of::<Slot>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.layout.create_bind_group(
            device,
            &ProgramResources {
                globals: &globals,
                atlas: &atlas_view,
                text_bounds: &text_bounds,
                text_uniforms: &text_uniforms,
            },
        );

        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Program Target"),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        GpuProgram {
            pipeline,
            bind_group,
            globals,
            text_uniforms,
            target,
            size,
        }
    }

    fn upload_atlas(&self, atlas: &RgbaImage) -> wgpu::Texture {
        let size = atlas.size();
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Atlas Texture"),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            atlas.pixels(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(size.width * BYTES_PER_PIXEL),
                rows_per_image: None,
            },
            extent(size),
        );
        texture
    }

    async fn read_target(&self, program: ProgramId) -> Result<RgbaImage> {
        let (buffer, size, padded_row) = {
            let programs = self.programs.borrow();
            let Some(gpu_program) = programs.get(&program) else {
                bail!("Unknown program {program}");
            };
            let size = gpu_program.size;
            let row = size.width * BYTES_PER_PIXEL;
            let padded_row = row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
                * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

            let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Readback Buffer"),
                size: padded_row as u64 * size.height as u64,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            });

            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Readback Encoder"),
                });
            encoder.copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture: &gpu_program.target,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: &buffer,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(padded_row),
                        rows_per_image: Some(size.height),
                    },
                },
                extent(size),
            );
            self.queue.submit([encoder.finish()]);
            (buffer, size, padded_row)
        };

        let slice = buffer.slice(..);
        let (sender, receiver) = oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .context("Waiting for the readback")?;
        receiver
            .await
            .map_err(|_| anyhow!("Readback was cancelled"))?
            .context("Mapping the readback buffer")?;

        let row = (size.width * BYTES_PER_PIXEL) as usize;
        let mut pixels = Vec::with_capacity(row * size.height as usize);
        {
            let mapped = slice.get_mapped_range();
            for padded in mapped.chunks(padded_row as usize) {
                pixels.extend_from_slice(&padded[..row]);
            }
        }
        buffer.unmap();

        RgbaImage::from_pixels(size, pixels)
    }
}

impl ProgramCompiler for WgpuBackend {
    fn compile<'a>(&'a self, source: &'a ProgramSource) -> LocalBoxFuture<'a, Result<ProgramId>> {
        async move {
            self.device.push_error_scope(wgpu::ErrorFilter::Validation);
            let gpu_program = self.create_program(source);
            if let Some(error) = self.device.pop_error_scope().await {
                bail!("Program is invalid: {error}");
            }

            let program = ProgramId(self.next_program.get() + 1);
            self.next_program.set(program.0);
            self.programs.borrow_mut().insert(program, gpu_program);
            Ok(program)
        }
        .boxed_local()
    }
}

impl GpuBackend for WgpuBackend {
    fn capabilities(&self) -> Capabilities {
        let limits = self.device.limits();
        Capabilities {
            max_texture_dimension: limits.max_texture_dimension_2d,
            fragment_storage_buffers: limits.max_storage_buffers_per_shader_stage >= 2,
        }
    }

    fn write_uniforms(
        &self,
        program: ProgramId,
        globals: &Globals,
        text_uniforms: &[Slot],
    ) -> Result<()> {
        let programs = self.programs.borrow();
        let Some(gpu_program) = programs.get(&program) else {
            bail!("Unknown program {program}");
        };
        self.queue
            .write_buffer(&gpu_program.globals, 0, bytemuck::bytes_of(globals));
        if !text_uniforms.is_empty() {
            self.queue.write_buffer(
                &gpu_program.text_uniforms,
                0,
                bytemuck::cast_slice(text_uniforms),
            );
        }
        Ok(())
    }

    fn draw(&self, program: ProgramId) -> Result<()> {
        let programs = self.programs.borrow();
        let Some(gpu_program) = programs.get(&program) else {
            bail!("Unknown program {program}");
        };
        let view = gpu_program
            .target
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(&gpu_program.pipeline);
            render_pass.set_bind_group(0, &gpu_program.bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }
        self.queue.submit([encoder.finish()]);
        Ok(())
    }

    fn read_pixels(&self, program: ProgramId) -> LocalBoxFuture<'_, Result<RgbaImage>> {
        self.read_target(program).boxed_local()
    }

    fn release_program(&self, program: ProgramId) {
        self.programs.borrow_mut().remove(&program);
    }

    fn release(&self) {
        self.programs.borrow_mut().clear();
    }
}

fn extent(size: SizePx) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width,
        height: size.height,
        depth_or_array_layers: 1,
    }
}
