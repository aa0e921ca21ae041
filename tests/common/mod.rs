#![allow(dead_code)]

use anyhow::{bail, Result};
use glam::{Mat4, Vec3};
use scene_viewport::camera3d::Camera3D;
use scene_viewport::config::AppConfig;
use scene_viewport::loader::{AssetLoader, LoadCallbacks};
use scene_viewport::mesh::{ImportedMaterial, Material, Mesh, ModelPart, ModelTemplate, TextureImage};
use scene_viewport::resources::{GeometryId, MaterialId, ResourceId, ResourceReleaser, TextureId};
use scene_viewport::responsive::ViewportSize;
use scene_viewport::scene::{SceneGraph, SubjectKind};
use scene_viewport::viewport::{FrameHandle, FrameScheduler, MountTarget, RenderEngine, ViewportSession};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub type TestSession = ViewportSession<RecordingEngine, ManualScheduler>;

pub struct TestMount {
    pub size: ViewportSize,
}

impl TestMount {
    pub fn logical(width: f64, height: f64) -> Self {
        Self { size: ViewportSize::from_logical(width, height, 1.0) }
    }
}

impl MountTarget for TestMount {
    fn viewport_size(&self) -> ViewportSize {
        self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawRecord {
    pub camera_position: Vec3,
    pub subject: Option<SubjectKind>,
    pub lights: usize,
}

/// Engine double that keeps every uploaded resource in memory and records draws.
#[derive(Default)]
pub struct RecordingEngine {
    pub attached: bool,
    pub detached: bool,
    pub dispose_calls: u32,
    pub fail_attach: bool,
    pub fail_draw: bool,
    /// Zero-based `create_geometry` call that returns an error.
    pub fail_geometry_call: Option<usize>,
    pub resizes: Vec<ViewportSize>,
    pub geometries: HashMap<GeometryId, Mesh>,
    pub materials: HashMap<MaterialId, Material>,
    pub textures: HashMap<TextureId, (u32, u32)>,
    pub released: Vec<ResourceId>,
    pub draws: Vec<DrawRecord>,
    geometry_calls: usize,
    next_id: u32,
}

impl RecordingEngine {
    pub fn failing_attach() -> Self {
        Self { fail_attach: true, ..Self::default() }
    }

    pub fn failing_draw() -> Self {
        Self { fail_draw: true, ..Self::default() }
    }

    pub fn failing_geometry_call(call: usize) -> Self {
        Self { fail_geometry_call: Some(call), ..Self::default() }
    }

    pub fn live_resources(&self) -> usize {
        self.geometries.len() + self.materials.len() + self.textures.len()
    }

    fn allocate(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

impl ResourceReleaser for RecordingEngine {
    fn release(&mut self, resource: ResourceId) -> Result<()> {
        let known = match resource {
            ResourceId::Geometry(id) => self.geometries.remove(&id).is_some(),
            ResourceId::Material(id) => self.materials.remove(&id).is_some(),
            ResourceId::Texture(id) => self.textures.remove(&id).is_some(),
        };
        if !known {
            bail!("unknown resource {resource:?}");
        }
        self.released.push(resource);
        Ok(())
    }
}

impl RenderEngine for RecordingEngine {
    type Mount = TestMount;

    fn attach_surface(&mut self, _mount: &TestMount, size: ViewportSize) -> Result<()> {
        if self.fail_attach {
            bail!("no adapter available");
        }
        self.attached = true;
        self.resizes.push(size);
        Ok(())
    }

    fn resize(&mut self, size: ViewportSize) {
        self.resizes.push(size);
    }

    fn create_geometry(&mut self, mesh: &Mesh) -> Result<GeometryId> {
        let call = self.geometry_calls;
        self.geometry_calls += 1;
        if self.fail_geometry_call == Some(call) {
            bail!("out of vertex memory");
        }
        let id = GeometryId(self.allocate());
        self.geometries.insert(id, mesh.clone());
        Ok(id)
    }

    fn create_material(&mut self, material: &Material) -> Result<MaterialId> {
        let id = MaterialId(self.allocate());
        self.materials.insert(id, material.clone());
        Ok(id)
    }

    fn create_texture(&mut self, image: &TextureImage) -> Result<TextureId> {
        let id = TextureId(self.allocate());
        self.textures.insert(id, (image.width, image.height));
        Ok(id)
    }

    fn draw(&mut self, scene: &SceneGraph, camera: &Camera3D) -> Result<()> {
        if self.fail_draw {
            bail!("device lost");
        }
        self.draws.push(DrawRecord {
            camera_position: camera.position,
            subject: scene.subject_kind(),
            lights: scene.lights().len(),
        });
        Ok(())
    }

    fn detach_surface(&mut self) {
        self.detached = true;
    }

    fn dispose(&mut self) {
        self.dispose_calls += 1;
    }
}

#[derive(Debug, Default)]
pub struct SchedulerLog {
    pub requested: Vec<FrameHandle>,
    pub cancelled: Vec<FrameHandle>,
}

/// Scheduler double; frames only run when the test calls [`run_frames`].
#[derive(Clone, Default)]
pub struct ManualScheduler {
    pub log: Rc<RefCell<SchedulerLog>>,
}

impl FrameScheduler for ManualScheduler {
    fn request_frame(&mut self) -> FrameHandle {
        let mut log = self.log.borrow_mut();
        let handle = FrameHandle(log.requested.len() as u64 + 1);
        log.requested.push(handle);
        handle
    }

    fn cancel_frame(&mut self, handle: FrameHandle) {
        self.log.borrow_mut().cancelled.push(handle);
    }
}

/// Loader double that parks callbacks until the test settles them.
#[derive(Default)]
pub struct ManualLoader {
    pub requests: Vec<(PathBuf, LoadCallbacks)>,
}

impl ManualLoader {
    pub fn take(&mut self) -> LoadCallbacks {
        assert_eq!(self.requests.len(), 1, "expected exactly one pending load");
        self.requests.remove(0).1
    }
}

impl AssetLoader for ManualLoader {
    fn load(&mut self, locator: &Path, callbacks: LoadCallbacks) {
        self.requests.push((locator.to_path_buf(), callbacks));
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn new_session() -> TestSession {
    init_logging();
    ViewportSession::new(AppConfig::default(), RecordingEngine::default(), ManualScheduler::default())
}

pub fn mounted_session(width: f64, height: f64) -> (TestSession, ManualLoader) {
    mounted_with_engine(RecordingEngine::default(), width, height)
}

pub fn mounted_with_engine(engine: RecordingEngine, width: f64, height: f64) -> (TestSession, ManualLoader) {
    init_logging();
    let mut session = ViewportSession::new(AppConfig::default(), engine, ManualScheduler::default());
    let mut loader = ManualLoader::default();
    session.mount(Some(TestMount::logical(width, height)), &mut loader).expect("mount succeeds");
    (session, loader)
}

/// Runs the outstanding frame `count` times.
pub fn run_frames(session: &mut TestSession, count: usize) {
    for _ in 0..count {
        let handle = session.pending_frame().expect("a frame should be pending");
        session.run_frame(handle);
    }
}

/// Model of two unit cubes side by side with one material.
pub fn two_cube_model() -> ModelTemplate {
    let part = |name: &str, x: f32| ModelPart {
        name: name.to_string(),
        mesh: Mesh::cube(1.0),
        material: 0,
        transform: Mat4::from_translation(Vec3::new(x, 0.0, 0.0)),
    };
    ModelTemplate {
        label: "two-cubes".to_string(),
        parts: vec![part("left", -1.0), part("right", 1.0)],
        materials: vec![ImportedMaterial {
            label: "painted".to_string(),
            base_color: [0.8, 0.2, 0.2, 1.0],
            emissive: [0.0; 3],
            shininess: 30.0,
            base_color_texture: None,
        }],
        textures: Vec::new(),
    }
}
