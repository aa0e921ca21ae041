use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use wgpu::util::DeviceExt;

use crate::camera3d::Camera3D;
use crate::mesh::{Material, Mesh, MeshVertex};
use crate::scene::Light;

use super::DEPTH_FORMAT;

pub(super) const MAX_LIGHTS: usize = 8;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub(super) struct GpuLight {
    /// xyz: direction towards the light (w = 0) or world position (w = 1).
    pub position: [f32; 4],
    /// rgb colour, a: intensity.
    pub color: [f32; 4],
    /// x: range of point lights (0 = unbounded).
    pub params: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(super) struct MeshFrameData {
    pub view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 4],
    pub ambient: [f32; 4],
    pub light_counts: [u32; 4],
    pub lights: [GpuLight; MAX_LIGHTS],
}

impl MeshFrameData {
    pub fn new(camera: &Camera3D, lights: &[Light]) -> Self {
        let mut ambient = Vec3::ZERO;
        let mut packed = [GpuLight::default(); MAX_LIGHTS];
        let mut count = 0;
        for light in lights {
            let gpu = match *light {
                Light::Ambient { color, intensity } => {
                    ambient += color * intensity;
                    continue;
                }
                Light::Directional { color, intensity, position } => GpuLight {
                    position: direction_towards(position).extend(0.0).to_array(),
                    color: color.extend(intensity).to_array(),
                    params: [0.0; 4],
                },
                Light::Point { color, intensity, position, range } => GpuLight {
                    position: position.extend(1.0).to_array(),
                    color: color.extend(intensity).to_array(),
                    params: [range, 0.0, 0.0, 0.0],
                },
            };
            if count == MAX_LIGHTS {
                log::warn!("More than {MAX_LIGHTS} direct lights in scene; extra lights ignored");
                break;
            }
            packed[count] = gpu;
            count += 1;
        }
        Self {
            view_proj: camera.view_projection().to_cols_array_2d(),
            camera_pos: camera.position.extend(1.0).to_array(),
            ambient: ambient.extend(1.0).to_array(),
            light_counts: [count as u32, 0, 0, 0],
            lights: packed,
        }
    }
}

/// Directional lights shine from their position towards the origin.
fn direction_towards(position: Vec3) -> Vec3 {
    let direction = position.normalize_or_zero();
    if direction == Vec3::ZERO {
        Vec3::Y
    } else {
        direction
    }
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(super) struct MeshDrawData {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 4],
}

impl MeshDrawData {
    pub fn new(world: Mat4) -> Self {
        Self { model: world.to_cols_array_2d(), normal: world.inverse().transpose().to_cols_array_2d() }
    }
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(super) struct MaterialParams {
    pub base_color: [f32; 4],
    /// rgb emissive, a: shininess.
    pub emissive_shininess: [f32; 4],
}

impl From<&Material> for MaterialParams {
    fn from(material: &Material) -> Self {
        let [r, g, b] = material.emissive;
        Self { base_color: material.base_color, emissive_shininess: [r, g, b, material.shininess] }
    }
}

pub(super) struct GpuGeometry {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
}

impl GpuGeometry {
    pub fn upload(device: &wgpu::Device, mesh: &Mesh) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mesh Vertex Buffer"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mesh Index Buffer"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self { vertex_buffer, index_buffer, index_count: mesh.indices.len() as u32 }
    }

    pub fn destroy(self) {
        self.vertex_buffer.destroy();
        self.index_buffer.destroy();
    }
}

pub(super) struct GpuMaterial {
    pub params: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
}

/// One mesh draw queued for this frame.
pub(super) struct DrawItem<'a> {
    pub geometry: &'a GpuGeometry,
    pub material: &'a GpuMaterial,
    pub world: Mat4,
}

/// Blinn-Phong lit pipeline plus the per-frame and per-draw uniform buffers.
pub(super) struct MeshPass {
    pipeline: wgpu::RenderPipeline,
    frame_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    draw_bgl: wgpu::BindGroupLayout,
    draw_buffer: wgpu::Buffer,
    draw_bind_group: wgpu::BindGroup,
    draw_capacity: usize,
    draw_stride: u64,
    pub material_bgl: wgpu::BindGroupLayout,
    pub sampler: wgpu::Sampler,
    pub white_view: wgpu::TextureView,
}

impl MeshPass {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, color_format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Mesh Lit Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../assets/shaders/mesh_lit.wgsl").into()),
        });

        let frame_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Mesh Frame BGL"),
            entries: &[uniform_entry(0, wgpu::ShaderStages::VERTEX_FRAGMENT, false)],
        });
        let draw_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Mesh Draw BGL"),
            entries: &[uniform_entry(0, wgpu::ShaderStages::VERTEX, true)],
        });
        let material_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Mesh Material BGL"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::FRAGMENT, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Mesh Frame Buffer"),
            size: std::mem::size_of::<MeshFrameData>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Mesh Frame BG"),
            layout: &frame_bgl,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: frame_buffer.as_entire_binding() }],
        });

        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let draw_stride = (std::mem::size_of::<MeshDrawData>() as u64).div_ceil(alignment) * alignment;
        let draw_capacity = 64;
        let (draw_buffer, draw_bind_group) = create_draw_buffer(device, &draw_bgl, draw_stride, draw_capacity);

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mesh Pipeline Layout"),
            bind_group_layouts: &[&frame_bgl, &draw_bgl, &material_bgl],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Mesh Lit Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[MeshVertex::layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: color_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Material Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let white = super::upload_rgba(device, queue, "Material White Texture", 1, 1, &[255; 4], true);
        let white_view = white.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            pipeline,
            frame_buffer,
            frame_bind_group,
            draw_bgl,
            draw_buffer,
            draw_bind_group,
            draw_capacity,
            draw_stride,
            material_bgl,
            sampler,
            white_view,
        }
    }

    pub fn create_material(
        &self,
        device: &wgpu::Device,
        material: &Material,
        texture: Option<&wgpu::TextureView>,
    ) -> GpuMaterial {
        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Material Params"),
            contents: bytemuck::bytes_of(&MaterialParams::from(material)),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let view = texture.unwrap_or(&self.white_view);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Material BG"),
            layout: &self.material_bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(view) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::Sampler(&self.sampler) },
            ],
        });
        GpuMaterial { params, bind_group }
    }

    /// Uploads frame and draw uniforms. Must run before the render pass that uses them.
    pub fn prepare(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        frame: &MeshFrameData,
        draws: &[DrawItem<'_>],
    ) -> Result<()> {
        queue.write_buffer(&self.frame_buffer, 0, bytemuck::bytes_of(frame));
        if draws.len() > self.draw_capacity {
            let mut capacity = self.draw_capacity.max(1);
            while capacity < draws.len() {
                capacity = capacity.checked_mul(2).context("Draw buffer capacity overflow")?;
            }
            let (buffer, bind_group) = create_draw_buffer(device, &self.draw_bgl, self.draw_stride, capacity);
            self.draw_buffer.destroy();
            self.draw_buffer = buffer;
            self.draw_bind_group = bind_group;
            self.draw_capacity = capacity;
        }
        let stride = self.draw_stride as usize;
        let mut staging = vec![0u8; stride * draws.len()];
        for (index, draw) in draws.iter().enumerate() {
            let data = MeshDrawData::new(draw.world);
            let bytes = bytemuck::bytes_of(&data);
            staging[index * stride..index * stride + bytes.len()].copy_from_slice(bytes);
        }
        if !staging.is_empty() {
            queue.write_buffer(&self.draw_buffer, 0, &staging);
        }
        Ok(())
    }

    pub fn record(&self, pass: &mut wgpu::RenderPass<'_>, draws: &[DrawItem<'_>]) {
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.frame_bind_group, &[]);
        for (index, draw) in draws.iter().enumerate() {
            let offset = (index as u64 * self.draw_stride) as u32;
            pass.set_bind_group(1, &self.draw_bind_group, &[offset]);
            pass.set_bind_group(2, &draw.material.bind_group, &[]);
            pass.set_vertex_buffer(0, draw.geometry.vertex_buffer.slice(..));
            pass.set_index_buffer(draw.geometry.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..draw.geometry.index_count, 0, 0..1);
        }
    }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages, dynamic: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: None,
        },
        count: None,
    }
}

fn create_draw_buffer(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    stride: u64,
    capacity: usize,
) -> (wgpu::Buffer, wgpu::BindGroup) {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Mesh Draw Buffer"),
        size: stride * capacity as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Mesh Draw BG"),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer,
                offset: 0,
                size: wgpu::BufferSize::new(std::mem::size_of::<MeshDrawData>() as u64),
            }),
        }],
    });
    (buffer, bind_group)
}
