//! Motus Scene - Host-agnostic motion model viewer pipeline
//!
//! This crate turns a motion file into something on screen without knowing
//! which graphics API draws it:
//! - glTF loading into CPU-side assets, with throttled progress
//! - A scene graph arena plus camera, orbit controls, ground and key light
//! - Model mounting, animation playback, and frame scheduling
//! - Resource tracking and a disposal walker, driven by the viewer coordinator
//!
//! Hosts implement [`gpu::Renderer`] and [`gpu::MountPoint`].

pub mod animation;
pub mod builder;
pub mod controls;
pub mod dispose;
pub mod gpu;
pub mod graph;
pub mod loader;
pub mod mount;
pub mod render_loop;
pub mod viewer;

#[cfg(test)]
mod test_support;

pub use animation::{AnimationClip, AnimationMixer};
pub use builder::{build_scene, PerspectiveCamera};
pub use controls::OrbitControls;
pub use dispose::{dispose, DisposalReport, ReleaseSink};
pub use gpu::{FrameSnapshot, GpuHandle, MountPoint, RenderError, Renderer, ResourceLedger, Viewport};
pub use graph::{NodeId, SceneGraph};
pub use loader::{AssetFetcher, AssetLoader, FetchError, LoadError, LoadedAsset, ProgressThrottle};
pub use mount::{ModelSlot, MountOutcome};
pub use render_loop::{FrameOutcome, FrameTicket, RenderLoop};
pub use viewer::{LoadOutcome, LoadRequest, ViewerCoordinator, ViewerStats, ViewerStatus};
