mod background_pass;
mod mesh_pass;
mod window_surface;

use anyhow::{anyhow, bail, Context, Result};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use winit::window::Window;

use crate::camera3d::Camera3D;
use crate::mesh::{Material, Mesh, TextureImage};
use crate::resources::{GeometryId, MaterialId, ResourceId, ResourceReleaser, TextureId};
use crate::responsive::ViewportSize;
use crate::scene::{Background, NodeKind, SceneGraph};
use crate::viewport::{MountTarget, RenderEngine};

use background_pass::BackgroundPass;
use mesh_pass::{DrawItem, GpuGeometry, GpuMaterial, MeshFrameData, MeshPass};
pub use window_surface::{SurfaceFrame, WindowSurface};

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const DEFAULT_CLEAR: wgpu::Color = wgpu::Color { r: 0.53, g: 0.81, b: 0.92, a: 1.0 };

impl MountTarget for Arc<Window> {
    fn viewport_size(&self) -> ViewportSize {
        ViewportSize::new(self.inner_size(), self.scale_factor())
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct Pipelines {
    mesh: MeshPass,
    background: BackgroundPass,
}

/// [`RenderEngine`] drawing into a winit window through wgpu.
pub struct WgpuEngine {
    surface: WindowSurface,
    pipelines: Option<Pipelines>,
    geometries: HashMap<GeometryId, GpuGeometry>,
    materials: HashMap<MaterialId, GpuMaterial>,
    textures: HashMap<TextureId, GpuTexture>,
    background_binding: Option<(TextureId, wgpu::BindGroup)>,
    next_id: u32,
}

impl WgpuEngine {
    pub fn new(vsync: bool) -> Self {
        Self {
            surface: WindowSurface::new(vsync),
            pipelines: None,
            geometries: HashMap::new(),
            materials: HashMap::new(),
            textures: HashMap::new(),
            background_binding: None,
            next_id: 1,
        }
    }

    pub fn surface(&self) -> &WindowSurface {
        &self.surface
    }

    pub fn live_resources(&self) -> usize {
        self.geometries.len() + self.materials.len() + self.textures.len()
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl ResourceReleaser for WgpuEngine {
    fn release(&mut self, resource: ResourceId) -> Result<()> {
        match resource {
            ResourceId::Geometry(id) => {
                let geometry = self.geometries.remove(&id).ok_or_else(|| anyhow!("Unknown geometry {id:?}"))?;
                geometry.destroy();
            }
            ResourceId::Material(id) => {
                let material = self.materials.remove(&id).ok_or_else(|| anyhow!("Unknown material {id:?}"))?;
                material.params.destroy();
            }
            ResourceId::Texture(id) => {
                let texture = self.textures.remove(&id).ok_or_else(|| anyhow!("Unknown texture {id:?}"))?;
                if matches!(self.background_binding, Some((bound, _)) if bound == id) {
                    self.background_binding = None;
                }
                texture.texture.destroy();
            }
        }
        Ok(())
    }
}

impl RenderEngine for WgpuEngine {
    type Mount = Arc<Window>;

    fn attach_surface(&mut self, mount: &Arc<Window>, size: ViewportSize) -> Result<()> {
        self.surface.attach(mount.clone(), size.physical)?;
        let (device, queue) = self.surface.device_and_queue()?;
        let format = self.surface.surface_format()?;
        self.pipelines =
            Some(Pipelines { mesh: MeshPass::new(device, queue, format), background: BackgroundPass::new(device, format) });
        Ok(())
    }

    fn resize(&mut self, size: ViewportSize) {
        self.surface.resize(size.physical);
    }

    fn create_geometry(&mut self, mesh: &Mesh) -> Result<GeometryId> {
        if mesh.indices.is_empty() || mesh.vertices.is_empty() {
            bail!("Cannot upload an empty mesh");
        }
        let geometry = GpuGeometry::upload(self.surface.device()?, mesh);
        let id = GeometryId(self.allocate_id());
        self.geometries.insert(id, geometry);
        Ok(id)
    }

    fn create_material(&mut self, material: &Material) -> Result<MaterialId> {
        let pipelines = self.pipelines.as_ref().context("Render pipelines not initialized")?;
        let texture = material
            .base_color_texture
            .map(|id| self.textures.get(&id).map(|tex| &tex.view).ok_or_else(|| anyhow!("Unknown texture {id:?}")))
            .transpose()?;
        let gpu = pipelines.mesh.create_material(self.surface.device()?, material, texture);
        let id = MaterialId(self.allocate_id());
        self.materials.insert(id, gpu);
        Ok(id)
    }

    fn create_texture(&mut self, image: &TextureImage) -> Result<TextureId> {
        let expected = image.width as usize * image.height as usize * 4;
        if image.width == 0 || image.height == 0 || image.rgba.len() != expected {
            bail!(
                "Texture '{}' has {} bytes, expected {expected} for {}x{} RGBA",
                image.label,
                image.rgba.len(),
                image.width,
                image.height
            );
        }
        let (device, queue) = self.surface.device_and_queue()?;
        let texture = upload_rgba(device, queue, &image.label, image.width, image.height, &image.rgba, image.srgb);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = TextureId(self.allocate_id());
        self.textures.insert(id, GpuTexture { texture, view });
        Ok(id)
    }

    fn draw(&mut self, scene: &SceneGraph, camera: &Camera3D) -> Result<()> {
        let Some(frame) = self.surface.acquire_surface_frame()? else {
            return Ok(());
        };
        let Self { surface, pipelines, geometries, materials, textures, background_binding, .. } = self;
        let pipelines = pipelines.as_mut().context("Render pipelines not initialized")?;
        let (device, queue) = surface.device_and_queue()?;

        let mut clear = DEFAULT_CLEAR;
        match scene.background() {
            Some(Background::Color(color)) => {
                clear = wgpu::Color { r: color.x as f64, g: color.y as f64, b: color.z as f64, a: 1.0 };
                *background_binding = None;
            }
            Some(Background::Texture(id)) => {
                if !matches!(background_binding, Some((bound, _)) if *bound == id) {
                    let texture = textures.get(&id).ok_or_else(|| anyhow!("Unknown background texture {id:?}"))?;
                    *background_binding = Some((id, pipelines.background.bind_texture(device, &texture.view)));
                }
            }
            None => *background_binding = None,
        }

        let mut draws = Vec::new();
        scene.traverse_world(|node, world| {
            if let NodeKind::Mesh(mesh) = node.kind {
                match (geometries.get(&mesh.geometry), materials.get(&mesh.material)) {
                    (Some(geometry), Some(material)) => draws.push(DrawItem { geometry, material, world }),
                    _ => log::debug!("Skipping mesh node '{}' with released resources", node.name),
                }
            }
        });
        let frame_data = MeshFrameData::new(camera, &scene.lights());
        pipelines.mesh.prepare(device, queue, &frame_data, &draws)?;

        let depth_view = surface.depth_view()?;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Viewport Encoder") });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Viewport Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: frame.view(),
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations { load: wgpu::LoadOp::Clear(clear), store: wgpu::StoreOp::Store },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Store }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            if let Some((_, bind_group)) = background_binding.as_ref() {
                pipelines.background.record(&mut pass, bind_group);
            }
            pipelines.mesh.record(&mut pass, &draws);
        }
        queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }

    fn detach_surface(&mut self) {
        self.background_binding = None;
        self.pipelines = None;
        self.surface.detach();
    }

    fn dispose(&mut self) {
        let leaked = self.live_resources();
        if leaked > 0 {
            log::warn!("Render engine disposed with {leaked} unreleased resources");
        }
        self.geometries.clear();
        self.materials.clear();
        self.textures.clear();
        self.background_binding = None;
        self.pipelines = None;
    }
}

pub(crate) fn upload_rgba(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    width: u32,
    height: u32,
    rgba: &[u8],
    srgb: bool,
) -> wgpu::Texture {
    let format = if srgb { wgpu::TextureFormat::Rgba8UnormSrgb } else { wgpu::TextureFormat::Rgba8Unorm };
    let size = wgpu::Extent3d { width, height, depth_or_array_layers: 1 };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let (pixel_data, padded_row_bytes) = prepare_texture_upload(rgba, width, height);
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        pixel_data.as_ref(),
        wgpu::TexelCopyBufferLayout { offset: 0, bytes_per_row: Some(padded_row_bytes), rows_per_image: Some(height) },
        size,
    );
    texture
}

fn padded_bytes_per_row(width: u32) -> u32 {
    let row_bytes = width.saturating_mul(4);
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    row_bytes.div_ceil(align) * align
}

fn prepare_texture_upload(data: &[u8], width: u32, height: u32) -> (Cow<'_, [u8]>, u32) {
    let row_bytes = width.saturating_mul(4);
    let padded_row_bytes = padded_bytes_per_row(width);
    if padded_row_bytes == row_bytes {
        return (Cow::Borrowed(data), row_bytes);
    }
    let mut padded = vec![0u8; (padded_row_bytes.saturating_mul(height)) as usize];
    for row in 0..height {
        let src_start = (row_bytes * row) as usize;
        let dst_start = (padded_row_bytes * row) as usize;
        let src_end = src_start + row_bytes as usize;
        if src_end <= data.len() {
            padded[dst_start..dst_start + row_bytes as usize].copy_from_slice(&data[src_start..src_end]);
        }
    }
    (Cow::Owned(padded), padded_row_bytes)
}
