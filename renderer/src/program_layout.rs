//! The GPU side of the generated programs' binding layout.
//!
//! Every program shares one layout. The binding numbers must match the declarations of the
//! generated WGSL prelude.

use derive_more::Display;

pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const VERTEX_SHADER_ENTRY: &str = "vs_main";
const FRAGMENT_SHADER_ENTRY: &str = "fs_main";

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum Binding {
    Globals = 0,
    Atlas = 1,
    Sampler = 2,
    TextBounds = 3,
    TextUniforms = 4,
}

impl Binding {
    const ALL: [Binding; 5] = [
        Binding::Globals,
        Binding::Atlas,
        Binding::Sampler,
        Binding::TextBounds,
        Binding::TextUniforms,
    ];

    fn ty(self) -> wgpu::BindingType {
        let buffer = |ty| wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        };
        match self {
            Binding::Globals => buffer(wgpu::BufferBindingType::Uniform),
            Binding::Atlas => wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
            },
            Binding::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            Binding::TextBounds | Binding::TextUniforms => {
                buffer(wgpu::BufferBindingType::Storage { read_only: true })
            }
        }
    }

    fn layout_entry(self) -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding: self as u32,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: self.ty(),
            count: None,
        }
    }
}

/// The per program resources bound to a [`ProgramLayout`].
pub struct ProgramResources<'a> {
    pub globals: &'a wgpu::Buffer,
    pub atlas: &'a wgpu::TextureView,
    pub text_bounds: &'a wgpu::Buffer,
    pub text_uniforms: &'a wgpu::Buffer,
}

pub struct ProgramLayout {
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
}

impl ProgramLayout {
    pub fn new(device: &wgpu::Device) -> Self {
        let entries = Binding::ALL.map(Binding::layout_entry);
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Program Bind Group Layout"),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Program Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        // Texts are packed without gaps, filtering would bleed neighbours into each other.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Nearest / Clamping Atlas Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            bind_group_layout,
            pipeline_layout,
            sampler,
        }
    }

    /// Creates the pipeline of a generated program.
    ///
    /// Programs draw a single full-screen triangle without vertex buffers, nothing is culled.
    pub fn create_pipeline(
        &self,
        device: &wgpu::Device,
        shader: &wgpu::ShaderModule,
    ) -> wgpu::RenderPipeline {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Program Pipeline"),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: shader,
                entry_point: Some(VERTEX_SHADER_ENTRY),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: shader,
                entry_point: Some(FRAGMENT_SHADER_ENTRY),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                cull_mode: None,
                ..wgpu::PrimitiveState::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }

    pub fn create_bind_group(
        &self,
        device: &wgpu::Device,
        resources: &ProgramResources<'_>,
    ) -> wgpu::BindGroup {
        let resource = |binding: Binding| match binding {
            Binding::Globals => resources.globals.as_entire_binding(),
            Binding::Atlas => wgpu::BindingResource::TextureView(resources.atlas),
            Binding::Sampler => wgpu::BindingResource::Sampler(&self.sampler),
            Binding::TextBounds => resources.text_bounds.as_entire_binding(),
            Binding::TextUniforms => resources.text_uniforms.as_entire_binding(),
        };
        let entries = Binding::ALL.map(|binding| wgpu::BindGroupEntry {
            binding: binding as u32,
            resource: resource(binding),
        });
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Program Bind Group"),
            layout: &self.bind_group_layout,
            entries: &entries,
        })
    }
}
