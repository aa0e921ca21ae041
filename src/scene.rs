use anyhow::{bail, Result};
use glam::{Mat4, Quat, Vec3};
use image::{Rgba, RgbaImage};

use crate::config::{rgb_from_hex, GradientStopConfig, LightConfig};
use crate::resources::{GeometryId, MaterialId, TextureId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Self = Self { translation: Vec3::ZERO, rotation: Quat::IDENTITY, scale: Vec3::ONE };

    pub fn from_translation(translation: Vec3) -> Self {
        Self { translation, ..Self::IDENTITY }
    }

    pub fn with_uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        Self { translation, rotation, scale }
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Light {
    Ambient { color: Vec3, intensity: f32 },
    /// Shines from `position` towards the origin.
    Directional { color: Vec3, intensity: f32, position: Vec3 },
    Point { color: Vec3, intensity: f32, position: Vec3, range: f32 },
}

impl From<LightConfig> for Light {
    fn from(cfg: LightConfig) -> Self {
        match cfg {
            LightConfig::Ambient { color, intensity } => {
                Light::Ambient { color: Vec3::from_array(rgb_from_hex(color)), intensity }
            }
            LightConfig::Directional { color, intensity, position } => Light::Directional {
                color: Vec3::from_array(rgb_from_hex(color)),
                intensity,
                position: Vec3::from_array(position),
            },
            LightConfig::Point { color, intensity, position, range } => Light::Point {
                color: Vec3::from_array(rgb_from_hex(color)),
                intensity,
                position: Vec3::from_array(position),
                range,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshNode {
    pub geometry: GeometryId,
    pub material: MaterialId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind {
    Group,
    Light(Light),
    Mesh(MeshNode),
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    id: NodeId,
    pub name: String,
    pub transform: Transform,
    pub kind: NodeKind,
    children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn children(&self) -> &[SceneNode] {
        &self.children
    }

    pub fn add_child(&mut self, child: SceneNode) {
        self.children.push(child);
    }

    /// Depth-first visit of this node and all descendants.
    pub fn traverse<'a>(&'a self, visit: &mut impl FnMut(&'a SceneNode)) {
        visit(self);
        for child in &self.children {
            child.traverse(visit);
        }
    }

    /// Like [`SceneNode::traverse`] but also hands out each node's world matrix.
    pub fn traverse_world<'a>(&'a self, parent: Mat4, visit: &mut impl FnMut(&'a SceneNode, Mat4)) {
        let world = parent * self.transform.to_matrix();
        visit(self, world);
        for child in &self.children {
            child.traverse_world(world, visit);
        }
    }

    pub fn mesh_nodes(&self) -> Vec<MeshNode> {
        let mut meshes = Vec::new();
        self.traverse(&mut |node| {
            if let NodeKind::Mesh(mesh) = node.kind {
                meshes.push(mesh);
            }
        });
        meshes
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Background {
    Color(Vec3),
    Texture(TextureId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    /// The model the viewer was asked to show.
    Model,
    /// Stand-in primitive shown when the model could not be loaded.
    Fallback,
}

impl SubjectKind {
    pub fn label(self) -> &'static str {
        match self {
            SubjectKind::Model => "model",
            SubjectKind::Fallback => "fallback",
        }
    }
}

/// Root of everything drawn in a viewport.
///
/// The graph holds at most one subject node (either the loaded model or the fallback).
#[derive(Debug, Default)]
pub struct SceneGraph {
    next_id: u32,
    background: Option<Background>,
    children: Vec<SceneNode>,
    subject: Option<(NodeId, SubjectKind)>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_node(&mut self, name: impl Into<String>, kind: NodeKind) -> SceneNode {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        SceneNode { id, name: name.into(), transform: Transform::IDENTITY, kind, children: Vec::new() }
    }

    pub fn add(&mut self, node: SceneNode) -> NodeId {
        let id = node.id;
        self.children.push(node);
        id
    }

    pub fn remove(&mut self, id: NodeId) -> Option<SceneNode> {
        let index = self.children.iter().position(|node| node.id == id)?;
        if matches!(self.subject, Some((subject, _)) if subject == id) {
            self.subject = None;
        }
        Some(self.children.remove(index))
    }

    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        self.children.iter().find(|node| node.id == id)
    }

    pub fn children(&self) -> &[SceneNode] {
        &self.children
    }

    pub fn background(&self) -> Option<Background> {
        self.background
    }

    pub fn set_background(&mut self, background: Option<Background>) {
        self.background = background;
    }

    /// Attaches the model-or-fallback node. Fails if a subject is already attached.
    pub fn attach_subject(&mut self, node: SceneNode, kind: SubjectKind) -> Result<NodeId> {
        if let Some((existing, existing_kind)) = self.subject {
            bail!(
                "Scene already shows a {} subject ({existing:?}); refusing to attach a {}",
                existing_kind.label(),
                kind.label()
            );
        }
        let id = self.add(node);
        self.subject = Some((id, kind));
        Ok(id)
    }

    pub fn subject(&self) -> Option<(&SceneNode, SubjectKind)> {
        let (id, kind) = self.subject?;
        self.get(id).map(|node| (node, kind))
    }

    pub fn subject_kind(&self) -> Option<SubjectKind> {
        self.subject.map(|(_, kind)| kind)
    }

    pub fn detach_subject(&mut self) -> Option<(SceneNode, SubjectKind)> {
        let (id, kind) = self.subject?;
        self.remove(id).map(|node| (node, kind))
    }

    pub fn traverse<'a>(&'a self, mut visit: impl FnMut(&'a SceneNode)) {
        for child in &self.children {
            child.traverse(&mut visit);
        }
    }

    pub fn traverse_world<'a>(&'a self, mut visit: impl FnMut(&'a SceneNode, Mat4)) {
        for child in &self.children {
            child.traverse_world(Mat4::IDENTITY, &mut visit);
        }
    }

    pub fn lights(&self) -> Vec<Light> {
        let mut lights = Vec::new();
        self.traverse(|node| {
            if let NodeKind::Light(light) = node.kind {
                lights.push(light);
            }
        });
        lights
    }

    pub fn clear(&mut self) {
        self.children.clear();
        self.subject = None;
        self.background = None;
    }
}

/// Renders a vertical gradient (top to bottom) into an image `width` x `height` pixels.
///
/// Stops are sorted by offset; pixels outside the first/last stop take that stop's colour.
pub fn render_gradient(stops: &[GradientStopConfig], width: u32, height: u32) -> RgbaImage {
    let mut sorted: Vec<GradientStopConfig> = stops.to_vec();
    sorted.sort_by(|a, b| a.offset.total_cmp(&b.offset));
    let width = width.max(1);
    let height = height.max(1);
    let mut image = RgbaImage::new(width, height);
    for y in 0..height {
        let t = if height == 1 { 0.0 } else { y as f32 / (height - 1) as f32 };
        let color = sample_gradient(&sorted, t);
        let pixel = Rgba([
            (color.x * 255.0).round() as u8,
            (color.y * 255.0).round() as u8,
            (color.z * 255.0).round() as u8,
            255,
        ]);
        for x in 0..width {
            image.put_pixel(x, y, pixel);
        }
    }
    image
}

fn sample_gradient(stops: &[GradientStopConfig], t: f32) -> Vec3 {
    let Some(first) = stops.first() else {
        return Vec3::ONE;
    };
    if t <= first.offset {
        return Vec3::from_array(rgb_from_hex(first.color));
    }
    for pair in stops.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if t <= b.offset {
            let span = (b.offset - a.offset).max(f32::EPSILON);
            let local = ((t - a.offset) / span).clamp(0.0, 1.0);
            let ca = Vec3::from_array(rgb_from_hex(a.color));
            let cb = Vec3::from_array(rgb_from_hex(b.color));
            return ca.lerp(cb, local);
        }
    }
    let last = stops[stops.len() - 1];
    Vec3::from_array(rgb_from_hex(last.color))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackgroundConfig;

    fn mesh(geometry: u32, material: u32) -> NodeKind {
        NodeKind::Mesh(MeshNode { geometry: GeometryId(geometry), material: MaterialId(material) })
    }

    #[test]
    fn subject_slot_is_exclusive() {
        let mut scene = SceneGraph::new();
        let model = scene.create_node("model", NodeKind::Group);
        scene.attach_subject(model, SubjectKind::Model).expect("first subject attaches");
        let fallback = scene.create_node("fallback", mesh(1, 1));
        let err = scene.attach_subject(fallback, SubjectKind::Fallback).unwrap_err();
        assert!(err.to_string().contains("already shows a model"));
        assert_eq!(scene.subject_kind(), Some(SubjectKind::Model));
        assert_eq!(scene.children().len(), 1);
    }

    #[test]
    fn detach_subject_frees_slot() {
        let mut scene = SceneGraph::new();
        let node = scene.create_node("fallback", mesh(1, 1));
        let id = scene.attach_subject(node, SubjectKind::Fallback).unwrap();
        let (removed, kind) = scene.detach_subject().expect("subject present");
        assert_eq!(removed.id(), id);
        assert_eq!(kind, SubjectKind::Fallback);
        assert!(scene.subject().is_none());
        assert!(scene.children().is_empty());
    }

    #[test]
    fn traversal_composes_world_transforms() {
        let mut scene = SceneGraph::new();
        let mut root = scene.create_node("root", NodeKind::Group);
        root.transform = Transform::IDENTITY.with_uniform_scale(2.0);
        let mut child = scene.create_node("child", mesh(3, 4));
        child.transform = Transform::from_translation(Vec3::new(1.0, 0.0, 0.0));
        root.add_child(child);
        scene.add(root);

        let mut seen = Vec::new();
        scene.traverse_world(|node, world| seen.push((node.name.clone(), world.transform_point3(Vec3::ZERO))));
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].0, "child");
        assert!((seen[1].1 - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-6);
        assert_eq!(scene.children()[0].mesh_nodes().len(), 1);
    }

    #[test]
    fn gradient_runs_white_to_sky_blue() {
        let cfg = BackgroundConfig::default();
        let image = render_gradient(&cfg.stops, 2, 512);
        assert_eq!(image.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
        assert_eq!(image.get_pixel(1, 511), &Rgba([0x87, 0xce, 0xeb, 255]));
    }

    #[test]
    fn light_config_converts_colors() {
        let light = Light::from(LightConfig::Point { color: 0xff0000, intensity: 2.0, position: [0.0, 10.0, 0.0], range: 50.0 });
        match light {
            Light::Point { color, range, .. } => {
                assert_eq!(color, Vec3::new(1.0, 0.0, 0.0));
                assert_eq!(range, 50.0);
            }
            other => panic!("unexpected light {other:?}"),
        }
    }
}
