mod common;

use anyhow::anyhow;
use common::{mounted_session, new_session, run_frames, two_cube_model, ManualLoader, RecordingEngine, TestMount};
use common::{mounted_with_engine, ManualScheduler, TestSession};
use glam::{Vec2, Vec3};
use scene_viewport::config::AppConfig;
use scene_viewport::input::{Listeners, PointerButton, PointerEvent};
use scene_viewport::loader::LoadProgress;
use scene_viewport::resources::{ResourceId, ResourceOwner};
use scene_viewport::scene::{NodeKind, SubjectKind, Transform};
use scene_viewport::viewport::{FrameOutcome, LifecycleState, ViewportSession};

fn subject_kinds(session: &TestSession) -> Vec<SubjectKind> {
    session.scene().subject().map(|(_, kind)| kind).into_iter().collect()
}

#[test]
fn mount_builds_scene_and_schedules_first_frame() {
    let (session, loader) = mounted_session(1280.0, 720.0);
    assert_eq!(session.state(), LifecycleState::Running);
    assert!(session.engine().attached);
    assert_eq!(session.listeners(), Listeners::all());
    assert_eq!(session.scene().lights().len(), 6);
    assert!(session.scene().background().is_some());
    assert_eq!(session.engine().textures.len(), 1, "background gradient uploaded");
    assert!(session.scene().subject().is_none());
    assert_eq!(loader.requests.len(), 1);
    assert_eq!(loader.requests[0].0, session.config().model.path);
    assert_eq!(session.scheduler().log.borrow().requested.len(), 1);
    assert!(session.pending_frame().is_some());
}

#[test]
fn frames_stop_after_dispose() {
    let (mut session, _loader) = mounted_session(1280.0, 720.0);
    run_frames(&mut session, 3);
    assert_eq!(session.frames_rendered(), 3);
    assert_eq!(session.engine().draws.len(), 3);

    let stale = session.pending_frame().expect("next frame requested");
    let report = session.dispose();
    assert!(report.frame_cancelled);
    assert_eq!(session.scheduler().log.borrow().cancelled, vec![stale]);
    assert_eq!(session.pending_frame(), None);

    assert_eq!(session.run_frame(stale), FrameOutcome::Ignored);
    assert_eq!(session.frames_rendered(), 3);
    assert_eq!(session.engine().draws.len(), 3);
}

#[test]
fn foreign_handle_is_ignored() {
    let (mut session, _loader) = mounted_session(1280.0, 720.0);
    let pending = session.pending_frame().expect("first frame requested");
    let foreign = scene_viewport::viewport::FrameHandle(pending.0 + 100);
    assert_eq!(session.run_frame(foreign), FrameOutcome::Ignored);
    assert_eq!(session.pending_frame(), Some(pending));
    assert_eq!(session.run_frame(pending), FrameOutcome::Rendered);
}

#[test]
fn controls_update_once_per_frame_before_draw() {
    let (mut session, _loader) = mounted_session(1280.0, 720.0);
    assert!(session.handle_pointer(&PointerEvent::ButtonDown {
        button: PointerButton::Left,
        position: Vec2::new(600.0, 300.0),
    }));
    assert!(session.handle_pointer(&PointerEvent::Moved { position: Vec2::new(720.0, 300.0) }));
    assert!(session.handle_pointer(&PointerEvent::ButtonUp {
        button: PointerButton::Left,
        position: Vec2::new(720.0, 300.0),
    }));

    run_frames(&mut session, 2);
    let draws = &session.engine().draws;
    assert!(draws[0].camera_position.distance(Vec3::new(0.0, 1.0, 5.0)) > 0.01, "drag applied before first draw");
    let controls = session.controls().expect("controls attached");
    assert_eq!(controls.update_count(), session.frames_rendered());
}

#[test]
fn loaded_model_becomes_the_subject() {
    let (mut session, mut loader) = mounted_session(1280.0, 720.0);
    loader.take().succeed(two_cube_model());
    run_frames(&mut session, 1);

    assert_eq!(subject_kinds(&session), vec![SubjectKind::Model]);
    let (node, _) = session.scene().subject().expect("model attached");
    assert_eq!(node.name, "two-cubes");
    assert!(matches!(node.kind, NodeKind::Group));
    assert_eq!(node.transform.translation, Vec3::ZERO);
    assert_eq!(node.transform.scale, Vec3::splat(2.0));
    assert_eq!(node.children().len(), 2);
    assert_eq!(node.mesh_nodes().len(), 2);
    assert_eq!(session.engine().draws[0].subject, Some(SubjectKind::Model));
}

#[test]
fn load_failure_shows_fallback_cube() {
    let (mut session, mut loader) = mounted_session(1280.0, 720.0);
    loader.take().fail(anyhow!("404 not found"));
    run_frames(&mut session, 1);

    assert_eq!(subject_kinds(&session), vec![SubjectKind::Fallback]);
    let (node, _) = session.scene().subject().expect("fallback attached");
    assert_eq!(node.transform, Transform::IDENTITY);
    let mesh = match node.kind {
        NodeKind::Mesh(mesh) => mesh,
        other => panic!("fallback should be a mesh node, got {other:?}"),
    };
    let geometry = session.engine().geometries.get(&mesh.geometry).expect("fallback geometry uploaded");
    assert_eq!(geometry.bounds.size(), Vec3::splat(2.0));
    let material = session.engine().materials.get(&mesh.material).expect("fallback material uploaded");
    assert_eq!(material.shininess, 50.0);
    assert!((material.base_color[0] - 1.0).abs() < 1e-6);
}

#[test]
fn only_one_subject_ever_attaches() {
    let (mut session, mut loader) = mounted_session(1280.0, 720.0);
    let mut callbacks = loader.take();
    callbacks.progress(LoadProgress { loaded: 10, total: Some(100) });
    callbacks.succeed(two_cube_model());
    run_frames(&mut session, 5);
    assert_eq!(subject_kinds(&session), vec![SubjectKind::Model]);
    assert_eq!(session.engine().geometries.len(), 2);
}

#[test]
fn dispose_releases_subject_and_scene_resources() {
    let (mut session, mut loader) = mounted_session(1280.0, 720.0);
    loader.take().succeed(two_cube_model());
    run_frames(&mut session, 1);
    assert_eq!(session.engine().live_resources(), 4);

    let report = session.dispose();
    assert_eq!(report.subject, Some(SubjectKind::Model));
    assert_eq!(report.subject_meshes, 2);
    assert_eq!(report.subject_resources_released, 3);
    assert_eq!(report.scene_resources_released, 1);
    assert!(report.controls_released);
    assert!(report.surface_detached);

    let engine = session.engine();
    assert_eq!(engine.live_resources(), 0);
    assert_eq!(engine.released.len(), 4);
    assert!(engine.detached);
    assert_eq!(engine.dispose_calls, 1);
    assert!(session.ledger().is_empty());
    assert!(session.scene().children().is_empty());
    assert!(session.controls().expect("controls kept for inspection").is_disposed());
    assert_eq!(session.listeners(), Listeners::empty());
    assert_eq!(session.state(), LifecycleState::Disposed);
}

#[test]
fn dispose_after_fallback_releases_cube() {
    let (mut session, mut loader) = mounted_session(1280.0, 720.0);
    loader.take().fail(anyhow!("corrupt file"));
    run_frames(&mut session, 1);
    let report = session.dispose();
    assert_eq!(report.subject, Some(SubjectKind::Fallback));
    assert_eq!(report.subject_meshes, 1);
    assert_eq!(report.subject_resources_released, 2);
    assert_eq!(session.engine().live_resources(), 0);
}

#[test]
fn dispose_before_load_completes_ignores_late_result() {
    let (mut session, mut loader) = mounted_session(1280.0, 720.0);
    run_frames(&mut session, 1);
    let callbacks = loader.take();

    let report = session.dispose();
    assert_eq!(report.subject, None);
    assert_eq!(report.subject_resources_released, 0);
    assert_eq!(report.scene_resources_released, 1);

    callbacks.succeed(two_cube_model());
    assert_eq!(session.poll_load_events(), 0);
    assert!(session.scene().subject().is_none());
    assert!(session.engine().geometries.is_empty());
}

#[test]
fn second_dispose_is_a_no_op() {
    let (mut session, _loader) = mounted_session(1280.0, 720.0);
    assert!(!session.dispose().is_empty());
    let again = session.dispose();
    assert!(again.is_empty());
    assert_eq!(session.engine().dispose_calls, 1);
    assert_eq!(session.scheduler().log.borrow().cancelled.len(), 1);
}

#[test]
fn dispose_of_idle_session_is_harmless() {
    let mut session = new_session();
    let report = session.dispose();
    assert!(!report.frame_cancelled);
    assert!(!report.surface_detached);
    assert_eq!(session.state(), LifecycleState::Disposed);
}

#[test]
fn missing_mount_point_leaves_session_idle() {
    let mut session = new_session();
    let mut loader = ManualLoader::default();
    let err = session.mount(None, &mut loader).expect_err("mount without a target must fail");
    assert!(err.to_string().contains("mount point is missing"), "unexpected error: {err}");
    assert_eq!(session.state(), LifecycleState::Idle);
    assert!(loader.requests.is_empty());
    assert!(session.scheduler().log.borrow().requested.is_empty());
    assert!(!session.engine().attached);
}

#[test]
fn mount_twice_is_rejected() {
    let (mut session, _loader) = mounted_session(1280.0, 720.0);
    let mut loader = ManualLoader::default();
    let err = session.mount(Some(TestMount::logical(800.0, 600.0)), &mut loader).expect_err("already running");
    assert!(err.to_string().contains("running"), "unexpected error: {err}");
    assert!(loader.requests.is_empty());
}

#[test]
fn failed_surface_attach_disposes_session() {
    let mut session =
        ViewportSession::new(AppConfig::default(), RecordingEngine::failing_attach(), ManualScheduler::default());
    let mut loader = ManualLoader::default();
    let err = session.mount(Some(TestMount::logical(1280.0, 720.0)), &mut loader).expect_err("attach fails");
    assert!(format!("{err:#}").contains("no adapter available"));
    assert_eq!(session.state(), LifecycleState::Disposed);
    assert!(loader.requests.is_empty());
    assert_eq!(session.pending_frame(), None);
    assert_eq!(session.engine().dispose_calls, 1);
}

#[test]
fn progress_is_reported_without_blocking_frames() {
    let (mut session, mut loader) = mounted_session(1280.0, 720.0);
    let mut callbacks = loader.take();
    callbacks.progress(LoadProgress { loaded: 512, total: Some(2048) });
    run_frames(&mut session, 1);

    let progress = session.load_progress().expect("progress recorded");
    assert_eq!(progress.percent(), Some(25));
    assert_eq!(session.frames_rendered(), 1);
    assert!(session.scene().subject().is_none());

    callbacks.progress(LoadProgress { loaded: 4096, total: None });
    run_frames(&mut session, 1);
    assert_eq!(session.load_progress().and_then(|p| p.percent()), None);
    assert_eq!(session.frames_rendered(), 2);
}

#[test]
fn dropping_session_disposes_it() {
    let scheduler = ManualScheduler::default();
    let log = scheduler.log.clone();
    {
        let mut session = ViewportSession::new(AppConfig::default(), RecordingEngine::default(), scheduler);
        let mut loader = ManualLoader::default();
        session.mount(Some(TestMount::logical(1280.0, 720.0)), &mut loader).expect("mount succeeds");
    }
    let log = log.borrow();
    assert_eq!(log.requested.len(), 1);
    assert_eq!(log.cancelled, log.requested);
}

#[test]
fn pointer_input_ignored_after_dispose() {
    let (mut session, _loader) = mounted_session(1280.0, 720.0);
    session.dispose();
    let accepted = session.handle_pointer(&PointerEvent::Wheel { delta_y: 1.0 });
    assert!(!accepted);
    let camera_before = session.camera().position;
    assert!(!session.handle_pointer(&PointerEvent::ButtonDown {
        button: PointerButton::Left,
        position: Vec2::ZERO,
    }));
    assert_eq!(session.camera().position, camera_before);
}

#[test]
fn wheel_zoom_moves_camera_towards_target() {
    let (mut session, _loader) = mounted_session(1280.0, 720.0);
    run_frames(&mut session, 1);
    let before = session.camera().position.distance(Vec3::ZERO);
    assert!(session.handle_pointer(&PointerEvent::Wheel { delta_y: -1.0 }));
    run_frames(&mut session, 1);
    let after = session.camera().position.distance(Vec3::ZERO);
    assert!(after < before, "expected {after} < {before}");
}

#[test]
fn abandoned_load_falls_back_to_cube() {
    let (mut session, mut loader) = mounted_session(1280.0, 720.0);
    drop(loader.take());
    run_frames(&mut session, 1);
    assert_eq!(session.scene().subject_kind(), Some(SubjectKind::Fallback));
    assert_eq!(session.engine().draws[0].subject, Some(SubjectKind::Fallback));
}

#[test]
fn failed_draw_keeps_the_loop_alive() {
    let (mut session, _loader) = mounted_with_engine(RecordingEngine::failing_draw(), 1280.0, 720.0);
    let first = session.pending_frame().expect("first frame scheduled");

    assert_eq!(session.run_frame(first), FrameOutcome::DrawFailed);
    assert_eq!(session.frames_rendered(), 0);
    assert!(session.engine().draws.is_empty());
    assert_eq!(session.controls().map(|controls| controls.update_count()), Some(1));
    let next = session.pending_frame().expect("next frame scheduled after failure");
    assert_ne!(next, first);
    assert_eq!(session.scheduler().log.borrow().requested.len(), 2);
    assert_eq!(session.state(), LifecycleState::Running);
}

#[test]
fn model_upload_failure_releases_partial_model_and_falls_back() {
    // Second geometry of the two-cube model fails; the fallback cube's upload succeeds.
    let (mut session, mut loader) = mounted_with_engine(RecordingEngine::failing_geometry_call(1), 1280.0, 720.0);
    loader.take().succeed(two_cube_model());
    run_frames(&mut session, 1);

    let (subject, kind) = session.scene().subject().expect("fallback attached");
    assert_eq!(kind, SubjectKind::Fallback);
    let ledger = session.ledger();
    assert_eq!(ledger.count_owned_by(ResourceOwner::Scene), 1);
    assert_eq!(ledger.count_owned_by(ResourceOwner::Node(subject.id())), 2);
    assert_eq!(ledger.len(), 3, "no model-owned entries survive");

    let engine = session.engine();
    assert_eq!(engine.live_resources(), 3);
    assert_eq!(engine.released.len(), 2);
    assert!(engine.released.iter().any(|id| matches!(id, ResourceId::Material(_))));
    assert!(engine.released.iter().any(|id| matches!(id, ResourceId::Geometry(_))));
}
