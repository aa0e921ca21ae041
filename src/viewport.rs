//! Viewport session: owns the scene, camera, controls and render engine for one mounted
//! viewport and drives them through `Idle -> Initializing -> Running -> Disposed`.
//!
//! The session never renders on its own. The host asks a [`FrameScheduler`] for frames and
//! hands each callback back through [`ViewportSession::run_frame`]; disposal cancels the one
//! outstanding handle so nothing runs afterwards.

use anyhow::{anyhow, bail, Context, Result};
use glam::Vec3;

use crate::camera3d::Camera3D;
use crate::config::{rgb_from_hex, AppConfig};
use crate::input::{Listeners, PointerEvent};
use crate::loader::{AssetLoader, LoadEvent, LoadInbox, LoadProgress, Liveness};
use crate::mesh::{Material, Mesh, ModelTemplate, TextureImage};
use crate::orbit_controls::OrbitControls;
use crate::resources::{GeometryId, MaterialId, ResourceLedger, ResourceOwner, ResourceReleaser, TextureId};
use crate::responsive::{Framing, ResponsivePolicy, ViewportSize};
use crate::scene::{render_gradient, Background, Light, MeshNode, NodeId, NodeKind, SceneGraph, SceneNode};
use crate::scene::{SubjectKind, Transform};

const BACKGROUND_TEXTURE_WIDTH: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Initializing,
    Running,
    Disposed,
}

impl LifecycleState {
    pub fn label(self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Running => "running",
            LifecycleState::Disposed => "disposed",
        }
    }
}

/// Identifies one scheduled frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(pub u64);

/// Host animation-frame primitive.
pub trait FrameScheduler {
    fn request_frame(&mut self) -> FrameHandle;
    fn cancel_frame(&mut self, handle: FrameHandle);
}

/// Where a viewport is mounted (a window in the desktop host).
pub trait MountTarget {
    fn viewport_size(&self) -> ViewportSize;
}

/// Draws a [`SceneGraph`] and owns the GPU side of every resource the session registers.
pub trait RenderEngine: ResourceReleaser {
    type Mount: MountTarget;

    fn attach_surface(&mut self, mount: &Self::Mount, size: ViewportSize) -> Result<()>;
    fn resize(&mut self, size: ViewportSize);
    fn create_geometry(&mut self, mesh: &Mesh) -> Result<GeometryId>;
    fn create_material(&mut self, material: &Material) -> Result<MaterialId>;
    fn create_texture(&mut self, image: &TextureImage) -> Result<TextureId>;
    fn draw(&mut self, scene: &SceneGraph, camera: &Camera3D) -> Result<()>;
    fn detach_surface(&mut self);
    /// Frees engine-wide state (pipelines, device). Called once, after every registered
    /// resource has been released.
    fn dispose(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered,
    /// Stale or foreign handle, or the session is not running.
    Ignored,
    DrawFailed,
}

/// What a call to [`ViewportSession::dispose`] tore down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisposalReport {
    pub frame_cancelled: bool,
    pub controls_released: bool,
    pub subject: Option<SubjectKind>,
    pub subject_meshes: usize,
    pub subject_resources_released: usize,
    pub scene_resources_released: usize,
    pub surface_detached: bool,
}

impl DisposalReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct ViewportSession<E: RenderEngine, S: FrameScheduler> {
    config: AppConfig,
    state: LifecycleState,
    engine: E,
    scheduler: S,
    mount: Option<E::Mount>,
    scene: SceneGraph,
    camera: Camera3D,
    policy: ResponsivePolicy,
    controls: Option<OrbitControls>,
    listeners: Listeners,
    ledger: ResourceLedger,
    pending_frame: Option<FrameHandle>,
    viewport: Option<ViewportSize>,
    framing: Option<Framing>,
    inbox: LoadInbox,
    load_progress: Option<LoadProgress>,
    frames_rendered: u64,
}

impl<E: RenderEngine, S: FrameScheduler> ViewportSession<E, S> {
    pub fn new(config: AppConfig, engine: E, scheduler: S) -> Self {
        let camera = Camera3D::new(
            Vec3::from_array(config.camera.desktop_position),
            Vec3::from_array(config.controls.target),
            config.camera.fov_degrees.to_radians(),
            1.0,
            config.camera.near,
            config.camera.far,
        );
        let policy = ResponsivePolicy::from_config(&config.camera);
        Self {
            config,
            state: LifecycleState::Idle,
            engine,
            scheduler,
            mount: None,
            scene: SceneGraph::new(),
            camera,
            policy,
            controls: None,
            listeners: Listeners::empty(),
            ledger: ResourceLedger::new(),
            pending_frame: None,
            viewport: None,
            framing: None,
            inbox: LoadInbox::new(Liveness::new()),
            load_progress: None,
            frames_rendered: 0,
        }
    }

    /// Builds the scene on `mount`, starts loading the model and schedules the first frame.
    ///
    /// A missing mount point is fatal: nothing is built and the session stays idle. Errors
    /// during initialization tear down whatever was already created.
    pub fn mount(&mut self, mount: Option<E::Mount>, loader: &mut dyn AssetLoader) -> Result<()> {
        if self.state != LifecycleState::Idle {
            bail!("Viewport cannot be mounted while {}", self.state.label());
        }
        let Some(mount) = mount else {
            bail!("Viewport mount point is missing; nothing will be rendered");
        };
        self.state = LifecycleState::Initializing;
        if let Err(err) = self.initialize(mount, loader) {
            self.dispose();
            return Err(err);
        }
        self.state = LifecycleState::Running;
        log::info!(
            "Viewport running ({} lights, loading {})",
            self.scene.lights().len(),
            self.config.model.path.display()
        );
        Ok(())
    }

    fn initialize(&mut self, mount: E::Mount, loader: &mut dyn AssetLoader) -> Result<()> {
        let size = mount.viewport_size();
        self.engine.attach_surface(&mount, size).context("Failed to attach render surface")?;
        self.mount = Some(mount);

        let gradient = render_gradient(
            &self.config.background.stops,
            BACKGROUND_TEXTURE_WIDTH,
            self.config.background.height,
        );
        let background = TextureImage {
            label: "background gradient".to_string(),
            width: gradient.width(),
            height: gradient.height(),
            rgba: gradient.into_raw(),
            srgb: true,
        };
        let texture = self.engine.create_texture(&background).context("Failed to upload background")?;
        self.ledger.register(texture, ResourceOwner::Scene);
        self.scene.set_background(Some(Background::Texture(texture)));

        for (index, light) in self.config.lights.iter().enumerate() {
            let light = Light::from(*light);
            let name = match light {
                Light::Ambient { .. } => format!("ambient light {index}"),
                Light::Directional { .. } => format!("directional light {index}"),
                Light::Point { .. } => format!("point light {index}"),
            };
            let node = self.scene.create_node(name, NodeKind::Light(light));
            self.scene.add(node);
        }

        self.apply_viewport(size);
        self.controls = Some(OrbitControls::attach(&mut self.camera, &self.config.controls));
        self.listeners = Listeners::all();

        loader.load(&self.config.model.path, self.inbox.callbacks());
        self.pending_frame = Some(self.scheduler.request_frame());
        Ok(())
    }

    /// Runs one frame if `handle` is the outstanding one: applies settled load results,
    /// integrates the controls once, draws, then schedules the next frame.
    pub fn run_frame(&mut self, handle: FrameHandle) -> FrameOutcome {
        if self.state != LifecycleState::Running || self.pending_frame != Some(handle) {
            return FrameOutcome::Ignored;
        }
        self.pending_frame = None;
        self.poll_load_events();
        if let Some(controls) = self.controls.as_mut() {
            controls.update(&mut self.camera);
        }
        let outcome = match self.engine.draw(&self.scene, &self.camera) {
            Ok(()) => {
                self.frames_rendered += 1;
                FrameOutcome::Rendered
            }
            Err(err) => {
                log::error!("Frame draw failed: {err:?}");
                FrameOutcome::DrawFailed
            }
        };
        self.pending_frame = Some(self.scheduler.request_frame());
        outcome
    }

    pub fn handle_resize(&mut self, size: ViewportSize) -> Option<Framing> {
        if self.state != LifecycleState::Running || !self.listeners.contains(Listeners::RESIZE) {
            return None;
        }
        Some(self.apply_viewport(size))
    }

    /// Forwards a gesture to the controls. Returns whether a listener accepted it.
    pub fn handle_pointer(&mut self, event: &PointerEvent) -> bool {
        if self.state != LifecycleState::Running || !self.listeners.contains(event.listener()) {
            return false;
        }
        let (Some(controls), Some(viewport)) = (self.controls.as_mut(), self.viewport) else {
            return false;
        };
        controls.handle_pointer(event, &self.camera, viewport);
        true
    }

    fn apply_viewport(&mut self, size: ViewportSize) -> Framing {
        let framing = self.policy.apply(size, &mut self.camera);
        self.engine.resize(size);
        if self.framing.map(|previous| previous.device_class) != Some(framing.device_class) {
            log::info!(
                "Viewport {}x{} classified as {}; camera at {:?}",
                size.physical.width,
                size.physical.height,
                framing.device_class.label(),
                framing.camera_position
            );
        }
        self.viewport = Some(size);
        self.framing = Some(framing);
        framing
    }

    /// Applies load results queued by the loader. Returns the number of events handled.
    pub fn poll_load_events(&mut self) -> usize {
        if self.state == LifecycleState::Disposed {
            return 0;
        }
        let mut handled = 0;
        while let Some(event) = self.inbox.try_next() {
            handled += 1;
            match event {
                LoadEvent::Progress(progress) => {
                    self.load_progress = Some(progress);
                    match progress.percent() {
                        Some(percent) => log::info!("Loading model: {percent}%"),
                        None => log::info!("Loading model: {} bytes", progress.loaded),
                    }
                }
                LoadEvent::Loaded(model) => {
                    let label = model.label.clone();
                    if let Err(err) = self.attach_model(model) {
                        log::warn!("Could not show model {label}: {err:?}; using fallback cube");
                        self.attach_fallback_logged();
                    }
                }
                LoadEvent::Failed(err) => {
                    log::warn!("Model load failed: {err:?}; using fallback cube");
                    self.attach_fallback_logged();
                }
            }
        }
        handled
    }

    fn attach_model(&mut self, model: ModelTemplate) -> Result<NodeId> {
        if let Some(kind) = self.scene.subject_kind() {
            bail!("a {} subject is already attached", kind.label());
        }
        let mut group = self.scene.create_node(model.label.clone(), NodeKind::Group);
        group.transform = Transform::from_translation(Vec3::ZERO).with_uniform_scale(self.config.model.scale);
        let owner = ResourceOwner::Node(group.id());
        if let Err(err) = self.upload_model(&model, &mut group, owner) {
            self.ledger.release_owned_by(owner, &mut self.engine);
            return Err(err);
        }
        let meshes = group.mesh_nodes().len();
        let id = self.scene.attach_subject(group, SubjectKind::Model)?;
        log::info!("Model {} attached ({meshes} meshes, {} resources)", model.label, self.ledger.count_owned_by(owner));
        Ok(id)
    }

    fn upload_model(&mut self, model: &ModelTemplate, group: &mut SceneNode, owner: ResourceOwner) -> Result<()> {
        let mut textures = Vec::with_capacity(model.textures.len());
        for image in &model.textures {
            let id = self.engine.create_texture(image).with_context(|| format!("texture {}", image.label))?;
            self.ledger.register(id, owner);
            textures.push(id);
        }
        let mut materials = Vec::with_capacity(model.materials.len());
        for imported in &model.materials {
            let material = imported.resolve(&textures);
            let id =
                self.engine.create_material(&material).with_context(|| format!("material {}", material.label))?;
            self.ledger.register(id, owner);
            materials.push(id);
        }
        for part in &model.parts {
            let material = materials
                .get(part.material)
                .copied()
                .ok_or_else(|| anyhow!("part {} references missing material {}", part.name, part.material))?;
            let geometry = self.engine.create_geometry(&part.mesh).with_context(|| format!("mesh {}", part.name))?;
            self.ledger.register(geometry, owner);
            let mut node = self.scene.create_node(part.name.clone(), NodeKind::Mesh(MeshNode { geometry, material }));
            node.transform = Transform::from_matrix(part.transform);
            group.add_child(node);
        }
        Ok(())
    }

    fn attach_fallback(&mut self) -> Result<NodeId> {
        if let Some(kind) = self.scene.subject_kind() {
            bail!("a {} subject is already attached", kind.label());
        }
        let fallback = self.config.model.fallback.clone();
        let mut node = self.scene.create_node("fallback cube", NodeKind::Group);
        let owner = ResourceOwner::Node(node.id());
        let geometry = self.engine.create_geometry(&Mesh::cube(fallback.size))?;
        self.ledger.register(geometry, owner);
        let material = Material::phong("fallback cube", rgb_from_hex(fallback.color), fallback.shininess);
        let material = match self.engine.create_material(&material) {
            Ok(id) => id,
            Err(err) => {
                self.ledger.release_owned_by(owner, &mut self.engine);
                return Err(err);
            }
        };
        self.ledger.register(material, owner);
        node.kind = NodeKind::Mesh(MeshNode { geometry, material });
        self.scene.attach_subject(node, SubjectKind::Fallback)
    }

    fn attach_fallback_logged(&mut self) {
        match self.attach_fallback() {
            Ok(_) => log::info!("Fallback cube attached"),
            Err(err) => log::error!("Failed to attach fallback cube: {err:?}"),
        }
    }

    /// Tears the viewport down. Safe in any state; only the first call does any work.
    pub fn dispose(&mut self) -> DisposalReport {
        let mut report = DisposalReport::default();
        if self.state == LifecycleState::Disposed {
            return report;
        }
        self.inbox.liveness().mark_dead();
        if let Some(handle) = self.pending_frame.take() {
            self.scheduler.cancel_frame(handle);
            report.frame_cancelled = true;
        }
        self.listeners = Listeners::empty();
        if let Some(controls) = self.controls.as_mut() {
            controls.dispose();
            report.controls_released = true;
        }
        if let Some((subject, kind)) = self.scene.detach_subject() {
            report.subject = Some(kind);
            report.subject_meshes = subject.mesh_nodes().len();
            report.subject_resources_released =
                self.ledger.release_owned_by(ResourceOwner::Node(subject.id()), &mut self.engine);
        }
        report.scene_resources_released = self.ledger.release_all(&mut self.engine);
        self.scene.clear();
        if self.mount.take().is_some() {
            self.engine.detach_surface();
            report.surface_detached = true;
        }
        self.engine.dispose();
        let previous = self.state;
        self.state = LifecycleState::Disposed;
        log::info!("Viewport disposed from {} after {} frames: {report:?}", previous.label(), self.frames_rendered);
        report
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    pub fn camera(&self) -> &Camera3D {
        &self.camera
    }

    pub fn controls(&self) -> Option<&OrbitControls> {
        self.controls.as_ref()
    }

    pub fn listeners(&self) -> Listeners {
        self.listeners
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn pending_frame(&self) -> Option<FrameHandle> {
        self.pending_frame
    }

    pub fn framing(&self) -> Option<Framing> {
        self.framing
    }

    pub fn load_progress(&self) -> Option<LoadProgress> {
        self.load_progress
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }
}

impl<E: RenderEngine, S: FrameScheduler> Drop for ViewportSession<E, S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_means_nothing_happened() {
        assert!(DisposalReport::default().is_empty());
        let report = DisposalReport { frame_cancelled: true, ..Default::default() };
        assert!(!report.is_empty());
    }

    #[test]
    fn state_labels_are_lowercase() {
        for state in
            [LifecycleState::Idle, LifecycleState::Initializing, LifecycleState::Running, LifecycleState::Disposed]
        {
            assert_eq!(state.label(), state.label().to_lowercase());
        }
    }
}
