use anyhow::{anyhow, bail, Context, Result};
use glam::{Mat4, Vec2, Vec3};
use gltf::mesh::Mode;
use std::path::Path;

use crate::resources::TextureId;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl MeshVertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self { position: position.to_array(), normal: normal.to_array(), uv: uv.to_array() }
    }

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute { offset: 0, shader_location: 0, format: wgpu::VertexFormat::Float32x3 },
                wgpu::VertexAttribute { offset: 12, shader_location: 1, format: wgpu::VertexFormat::Float32x3 },
                wgpu::VertexAttribute { offset: 24, shader_location: 2, format: wgpu::VertexFormat::Float32x2 },
            ],
        }
    }
}

#[derive(Clone, Debug)]
pub struct Mesh {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
    pub bounds: MeshBounds,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshBounds {
    pub min: Vec3,
    pub max: Vec3,
    pub center: Vec3,
    pub radius: f32,
}

/// Surface parameters for the lit mesh shader, with textures already uploaded.
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub label: String,
    pub base_color: [f32; 4],
    pub emissive: [f32; 3],
    pub shininess: f32,
    pub base_color_texture: Option<TextureId>,
}

impl Material {
    pub fn phong(label: impl Into<String>, color: [f32; 3], shininess: f32) -> Self {
        Self {
            label: label.into(),
            base_color: [color[0], color[1], color[2], 1.0],
            emissive: [0.0; 3],
            shininess,
            base_color_texture: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureImage {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    pub srgb: bool,
}

/// Material as read from a model file; textures are indices into [`ModelTemplate::textures`].
#[derive(Clone, Debug, PartialEq)]
pub struct ImportedMaterial {
    pub label: String,
    pub base_color: [f32; 4],
    pub emissive: [f32; 3],
    pub shininess: f32,
    pub base_color_texture: Option<usize>,
}

impl ImportedMaterial {
    pub fn resolve(&self, textures: &[TextureId]) -> Material {
        Material {
            label: self.label.clone(),
            base_color: self.base_color,
            emissive: self.emissive,
            shininess: self.shininess,
            base_color_texture: self.base_color_texture.and_then(|index| textures.get(index).copied()),
        }
    }

    fn default_for(label: &str) -> Self {
        Self {
            label: format!("{label}::default"),
            base_color: [1.0; 4],
            emissive: [0.0; 3],
            shininess: 30.0,
            base_color_texture: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ModelPart {
    pub name: String,
    pub mesh: Mesh,
    pub material: usize,
    pub transform: Mat4,
}

/// Parsed model, ready to be uploaded and turned into scene nodes.
#[derive(Clone, Debug)]
pub struct ModelTemplate {
    pub label: String,
    pub parts: Vec<ModelPart>,
    pub materials: Vec<ImportedMaterial>,
    pub textures: Vec<TextureImage>,
}

impl ModelTemplate {
    /// Parses a glTF or GLB document held in memory. Every triangle primitive reachable from
    /// the default scene becomes one part with its node transform baked in.
    ///
    /// External buffer and image URIs resolve against `base` (the model's directory); without
    /// one only GLB and data-URI resources load.
    pub fn from_gltf_slice(label: &str, bytes: &[u8], base: Option<&Path>) -> Result<Self> {
        let gltf::Gltf { document, blob } =
            gltf::Gltf::from_slice(bytes).with_context(|| format!("Failed to import glTF from {label}"))?;
        let buffers = gltf::import_buffers(&document, base, blob)
            .with_context(|| format!("Failed to load buffers for {label}"))?;
        let images = gltf::import_images(&document, base, &buffers)
            .with_context(|| format!("Failed to load images for {label}"))?;

        let mut textures = Vec::new();
        let mut texture_slots = vec![None; document.textures().count()];
        for texture in document.textures() {
            let source = texture.source();
            let image = images
                .get(source.index())
                .ok_or_else(|| anyhow!("Image index {} missing in {label}", source.index()))?;
            match convert_image_to_rgba(image) {
                Ok(rgba) => {
                    texture_slots[texture.index()] = Some(textures.len());
                    textures.push(TextureImage {
                        label: format!("{label}::tex{}", texture.index()),
                        width: image.width,
                        height: image.height,
                        rgba,
                        srgb: true,
                    });
                }
                Err(err) => log::warn!("Skipping texture {} in {label}: {err:?}", texture.index()),
            }
        }

        let mut materials: Vec<ImportedMaterial> = document
            .materials()
            .enumerate()
            .map(|(index, material)| {
                let pbr = material.pbr_metallic_roughness();
                let base_color_texture = pbr
                    .base_color_texture()
                    .and_then(|info| texture_slots.get(info.texture().index()).copied().flatten());
                ImportedMaterial {
                    label: material.name().map(str::to_string).unwrap_or_else(|| format!("material_{index}")),
                    base_color: pbr.base_color_factor(),
                    emissive: material.emissive_factor(),
                    shininess: roughness_to_shininess(pbr.roughness_factor()),
                    base_color_texture,
                }
            })
            .collect();
        let default_material = materials.len();
        materials.push(ImportedMaterial::default_for(label));

        let scene = document
            .default_scene()
            .or_else(|| document.scenes().next())
            .ok_or_else(|| anyhow!("No scenes found in {label}"))?;
        let mut parts = Vec::new();
        for node in scene.nodes() {
            collect_parts(&node, Mat4::IDENTITY, &buffers, default_material, &mut parts)?;
        }
        if parts.is_empty() {
            bail!("Model {label} contains no triangle primitives");
        }

        Ok(Self { label: label.to_string(), parts, materials, textures })
    }

    /// Bounds of all parts in model space.
    pub fn bounds(&self) -> MeshBounds {
        let points: Vec<Vec3> = self
            .parts
            .iter()
            .flat_map(|part| {
                part.mesh.vertices.iter().map(move |v| part.transform.transform_point3(Vec3::from_array(v.position)))
            })
            .collect();
        MeshBounds::from_points(&points)
    }
}

fn collect_parts(
    node: &gltf::Node<'_>,
    parent: Mat4,
    buffers: &[gltf::buffer::Data],
    default_material: usize,
    parts: &mut Vec<ModelPart>,
) -> Result<()> {
    let world = parent * Mat4::from_cols_array_2d(&node.transform().matrix());
    if let Some(mesh) = node.mesh() {
        for (primitive_index, primitive) in mesh.primitives().enumerate() {
            if primitive.mode() != Mode::Triangles {
                continue;
            }
            let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| &data[..]));
            let Some(positions_iter) = reader.read_positions() else {
                bail!("POSITION attribute missing on primitive {primitive_index}");
            };
            let positions: Vec<Vec3> = positions_iter.map(Vec3::from_array).collect();
            if positions.is_empty() {
                continue;
            }
            let indices: Vec<u32> = reader
                .read_indices()
                .map(|read| read.into_u32().collect())
                .unwrap_or_else(|| (0..positions.len() as u32).collect());
            let mut normals: Vec<Vec3> =
                reader.read_normals().map(|it| it.map(Vec3::from_array).collect()).unwrap_or_default();
            if normals.len() != positions.len() || normals.iter().all(|n| n.length_squared() == 0.0) {
                normals = compute_normals(&positions, &indices);
            }
            let mut uvs: Vec<Vec2> = reader
                .read_tex_coords(0)
                .map(|coords| coords.into_f32().map(Vec2::from_array).collect())
                .unwrap_or_default();
            uvs.resize(positions.len(), Vec2::ZERO);

            let vertices = positions
                .iter()
                .zip(normals.iter().zip(uvs.iter()))
                .map(|(pos, (normal, uv))| MeshVertex::new(*pos, normal.normalize_or_zero(), *uv))
                .collect();
            let name = mesh
                .name()
                .map(|mesh_name| format!("{mesh_name}::{primitive_index}"))
                .unwrap_or_else(|| format!("primitive_{}_{primitive_index}", mesh.index()));
            parts.push(ModelPart {
                name,
                mesh: Mesh::new(vertices, indices),
                material: primitive.material().index().unwrap_or(default_material),
                transform: world,
            });
        }
    }
    for child in node.children() {
        collect_parts(&child, world, buffers, default_material, parts)?;
    }
    Ok(())
}

impl Mesh {
    pub fn new(vertices: Vec<MeshVertex>, indices: Vec<u32>) -> Self {
        let bounds = MeshBounds::from_vertices(&vertices);
        Self { vertices, indices, bounds }
    }

    /// Axis-aligned cube centred on the origin with edge length `size`.
    pub fn cube(size: f32) -> Self {
        let hs = size * 0.5;
        let positions = [
            Vec3::new(-hs, -hs, -hs),
            Vec3::new(hs, -hs, -hs),
            Vec3::new(hs, hs, -hs),
            Vec3::new(-hs, hs, -hs),
            Vec3::new(-hs, -hs, hs),
            Vec3::new(hs, -hs, hs),
            Vec3::new(hs, hs, hs),
            Vec3::new(-hs, hs, hs),
        ];
        let uv_quad = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)];
        let mut vertices = Vec::with_capacity(24);
        let mut write_face = |corners: [usize; 4], normal: Vec3| {
            for (i, &corner) in corners.iter().enumerate() {
                vertices.push(MeshVertex::new(positions[corner], normal, uv_quad[i]));
            }
        };

        write_face([0, 3, 2, 1], Vec3::NEG_Z); // back
        write_face([4, 5, 6, 7], Vec3::Z); // front
        write_face([0, 4, 7, 3], Vec3::NEG_X); // left
        write_face([1, 2, 6, 5], Vec3::X); // right
        write_face([3, 7, 6, 2], Vec3::Y); // top
        write_face([0, 1, 5, 4], Vec3::NEG_Y); // bottom

        let mut indices = Vec::with_capacity(36);
        for face in 0..6 {
            let base = face * 4;
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self::new(vertices, indices)
    }
}

impl MeshBounds {
    pub fn from_vertices(vertices: &[MeshVertex]) -> Self {
        let points: Vec<Vec3> = vertices.iter().map(|v| Vec3::from_array(v.position)).collect();
        Self::from_points(&points)
    }

    pub fn from_points(points: &[Vec3]) -> Self {
        if points.is_empty() {
            return MeshBounds { min: Vec3::ZERO, max: Vec3::ZERO, center: Vec3::ZERO, radius: 0.0 };
        }
        let (min, max) = points
            .iter()
            .fold((Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)), |(min, max), p| {
                (min.min(*p), max.max(*p))
            });
        let center = (min + max) * 0.5;
        let radius = points.iter().map(|p| (*p - center).length()).fold(0.0_f32, f32::max);
        MeshBounds { min, max, center, radius }
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

/// Approximates a Blinn-Phong exponent for a PBR roughness value.
fn roughness_to_shininess(roughness: f32) -> f32 {
    let r = roughness.clamp(0.05, 1.0);
    (2.0 / (r * r * r * r) - 2.0).clamp(1.0, 256.0)
}

fn convert_image_to_rgba(image: &gltf::image::Data) -> Result<Vec<u8>> {
    match image.format {
        gltf::image::Format::R8 => Ok(image.pixels.iter().flat_map(|&v| [v, v, v, 255]).collect()),
        gltf::image::Format::R8G8 => {
            Ok(image.pixels.chunks_exact(2).flat_map(|c| [c[0], c[1], 0, 255]).collect())
        }
        gltf::image::Format::R8G8B8 => {
            Ok(image.pixels.chunks_exact(3).flat_map(|c| [c[0], c[1], c[2], 255]).collect())
        }
        gltf::image::Format::R8G8B8A8 => Ok(image.pixels.clone()),
        other => bail!("Unsupported image format {:?}", other),
    }
}

fn compute_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let (i0, i1, i2) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
        if i0 >= positions.len() || i1 >= positions.len() || i2 >= positions.len() {
            continue;
        }
        let normal = (positions[i1] - positions[i0]).cross(positions[i2] - positions[i0]);
        normals[i0] += normal;
        normals[i1] += normal;
        normals[i2] += normal;
    }
    normals.into_iter().map(|n| if n.length_squared() > 0.0 { n.normalize() } else { Vec3::Y }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_has_requested_extent() {
        let cube = Mesh::cube(2.0);
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert_eq!(cube.bounds.size(), Vec3::splat(2.0));
        assert_eq!(cube.bounds.center, Vec3::ZERO);
    }

    #[test]
    fn cube_faces_wind_outwards() {
        let cube = Mesh::cube(1.0);
        for tri in cube.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from_array(cube.vertices[i as usize].position));
            let face_normal = (b - a).cross(c - a).normalize();
            let stored = Vec3::from_array(cube.vertices[tri[0] as usize].normal);
            assert!(face_normal.dot(stored) > 0.99, "triangle normal {face_normal} vs {stored}");
        }
    }

    #[test]
    fn computed_normals_follow_winding() {
        let positions = [Vec3::ZERO, Vec3::X, Vec3::Y];
        let normals = compute_normals(&positions, &[0, 1, 2]);
        assert!(normals.iter().all(|n| (*n - Vec3::Z).length() < 1e-6));
    }

    #[test]
    fn rough_materials_get_low_shininess() {
        assert!(roughness_to_shininess(1.0) < roughness_to_shininess(0.2));
        assert_eq!(roughness_to_shininess(0.0), 256.0);
    }

    #[test]
    fn garbage_bytes_fail_to_import() {
        let err = ModelTemplate::from_gltf_slice("garbage", b"definitely not a model", None).unwrap_err();
        assert!(err.to_string().contains("garbage"));
    }
}
