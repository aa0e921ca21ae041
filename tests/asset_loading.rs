mod common;

use common::{init_logging, run_frames, ManualScheduler, RecordingEngine, TestMount};
use glam::Vec3;
use scene_viewport::config::AppConfig;
use scene_viewport::loader::{AssetLoader, GltfFileLoader, LoadEvent, LoadInbox, Liveness};
use scene_viewport::scene::SubjectKind;
use scene_viewport::viewport::ViewportSession;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// One triangle at (0,0,0), (1,0,0), (0,1,0) with its vertex buffer embedded as base64.
const TRIANGLE_GLTF: &str = r#"{
  "asset": { "version": "2.0" },
  "scene": 0,
  "scenes": [{ "nodes": [0] }],
  "nodes": [{ "mesh": 0, "name": "triangle" }],
  "meshes": [{ "name": "triangle", "primitives": [{ "attributes": { "POSITION": 0 } }] }],
  "buffers": [{
    "byteLength": 36,
    "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAA"
  }],
  "bufferViews": [{ "buffer": 0, "byteOffset": 0, "byteLength": 36 }],
  "accessors": [{
    "bufferView": 0,
    "componentType": 5126,
    "count": 3,
    "type": "VEC3",
    "min": [0.0, 0.0, 0.0],
    "max": [1.0, 1.0, 0.0]
  }]
}"#;

fn write_temp(contents: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents).expect("write temp file");
    file.flush().expect("flush temp file");
    file
}

fn load_events(path: &Path) -> Vec<LoadEvent> {
    init_logging();
    let inbox = LoadInbox::new(Liveness::new());
    let mut loader = GltfFileLoader::with_chunk_size(64);
    loader.load(path, inbox.callbacks());
    loader.wait_idle();
    std::iter::from_fn(|| inbox.try_next()).collect()
}

fn session_for(path: &Path) -> (ViewportSession<RecordingEngine, ManualScheduler>, GltfFileLoader) {
    init_logging();
    let mut config = AppConfig::default();
    config.model.path = path.to_path_buf();
    let mut session = ViewportSession::new(config, RecordingEngine::default(), ManualScheduler::default());
    let mut loader = GltfFileLoader::new();
    session.mount(Some(TestMount::logical(1280.0, 720.0)), &mut loader).expect("mount succeeds");
    (session, loader)
}

#[test]
fn embedded_triangle_loads_with_progress() {
    let file = write_temp(TRIANGLE_GLTF.as_bytes());
    let events = load_events(file.path());

    let kinds: Vec<&str> = events.iter().map(LoadEvent::kind).collect();
    assert!(kinds.len() >= 2, "expected progress then success, got {kinds:?}");
    assert_eq!(kinds.last(), Some(&"success"));
    assert!(kinds[..kinds.len() - 1].iter().all(|kind| *kind == "progress"));

    let Some(LoadEvent::Progress(last_progress)) = events.iter().rev().nth(1) else {
        panic!("expected a progress event before success");
    };
    assert_eq!(last_progress.percent(), Some(100));

    let Some(LoadEvent::Loaded(model)) = events.last() else {
        panic!("expected a loaded model");
    };
    assert_eq!(model.parts.len(), 1);
    assert_eq!(model.parts[0].mesh.vertices.len(), 3);
    assert_eq!(model.parts[0].mesh.indices, vec![0, 1, 2]);
    let bounds = model.bounds();
    assert_eq!(bounds.min, Vec3::ZERO);
    assert_eq!(bounds.max, Vec3::new(1.0, 1.0, 0.0));
    let normal = Vec3::from_array(model.parts[0].mesh.vertices[0].normal);
    assert!((normal - Vec3::Z).length() < 1e-5, "computed normal {normal:?}");
}

#[test]
fn sidecar_buffer_resolves_next_to_model() {
    let dir = tempfile::tempdir().expect("temp dir");
    let positions: Vec<u8> =
        [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0].iter().flat_map(|v| v.to_le_bytes()).collect();
    std::fs::write(dir.path().join("triangle.bin"), &positions).expect("write buffer");
    let gltf = TRIANGLE_GLTF.replace(
        "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAA",
        "triangle.bin",
    );
    let model_path = dir.path().join("triangle.gltf");
    std::fs::write(&model_path, gltf).expect("write model");

    let events = load_events(&model_path);
    let Some(LoadEvent::Loaded(model)) = events.last() else {
        panic!("expected a loaded model, got {:?}", events.iter().map(LoadEvent::kind).collect::<Vec<_>>());
    };
    assert_eq!(model.parts.len(), 1);
    assert_eq!(model.bounds().max, Vec3::new(1.0, 1.0, 0.0));
}

#[test]
fn missing_file_reports_single_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let events = load_events(&dir.path().join("absent.glb"));
    assert_eq!(events.len(), 1);
    let LoadEvent::Failed(err) = &events[0] else {
        panic!("expected an error event, got {}", events[0].kind());
    };
    assert!(err.to_string().contains("Failed to open model"), "unexpected error: {err}");
}

#[test]
fn garbage_bytes_fail_to_parse() {
    let file = write_temp(b"definitely not a gltf document");
    let events = load_events(file.path());
    assert_eq!(events.last().map(LoadEvent::kind), Some("error"));
    assert_eq!(events.iter().filter(|event| event.kind() != "progress").count(), 1);
}

#[test]
fn empty_file_is_an_error() {
    let file = write_temp(&[]);
    let events = load_events(file.path());
    assert_eq!(events.len(), 1);
    let LoadEvent::Failed(err) = &events[0] else {
        panic!("expected an error event");
    };
    assert!(err.to_string().contains("is empty"));
}

#[test]
fn session_falls_back_when_model_is_missing() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (mut session, mut loader) = session_for(&dir.path().join("helmet.glb"));
    loader.wait_idle();
    run_frames(&mut session, 1);
    assert_eq!(session.scene().subject_kind(), Some(SubjectKind::Fallback));
    assert_eq!(session.engine().draws[0].subject, Some(SubjectKind::Fallback));
}

#[test]
fn session_shows_loaded_model_at_configured_scale() {
    let file = write_temp(TRIANGLE_GLTF.as_bytes());
    let (mut session, mut loader) = session_for(file.path());
    loader.wait_idle();
    run_frames(&mut session, 1);

    let (node, kind) = session.scene().subject().expect("model attached");
    assert_eq!(kind, SubjectKind::Model);
    assert_eq!(node.transform.scale, Vec3::splat(2.0));
    assert_eq!(node.mesh_nodes().len(), 1);
    assert_eq!(session.load_progress().and_then(|p| p.percent()), Some(100));
}

#[test]
fn late_result_after_dispose_is_dropped() {
    let file = write_temp(TRIANGLE_GLTF.as_bytes());
    let (mut session, mut loader) = session_for(file.path());
    session.dispose();
    loader.wait_idle();
    assert_eq!(session.poll_load_events(), 0);
    assert!(session.scene().subject().is_none());
    assert_eq!(session.engine().live_resources(), 0);
}
