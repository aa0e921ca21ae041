//! Interactive 3D model viewport: a winit/wgpu host around a [`viewport::ViewportSession`]
//! that loads a glTF model (or a fallback cube), lights it and orbits a camera around it.

pub mod app;
pub mod camera3d;
pub mod cli;
pub mod config;
pub mod input;
pub mod loader;
pub mod mesh;
pub mod orbit_controls;
pub mod renderer;
pub mod resources;
pub mod responsive;
pub mod scene;
pub mod viewport;

pub use app::{run, run_with_overrides, App};
pub use viewport::{LifecycleState, ViewportSession};
