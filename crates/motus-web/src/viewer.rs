//! Drives the viewer coordinator from Bevy
//!
//! Selection changes start background loads, load results come back through
//! [`PendingLoads`], and every `Update` runs one scheduled frame. Pointer input
//! feeds the orbit controls unless egui owns the pointer.

use bevy::input::mouse::{MouseMotion, MouseScrollUnit, MouseWheel};
use bevy::prelude::*;
use bevy::window::{PrimaryWindow, WindowClosing, WindowResized};
use bevy_egui::EguiContexts;
use motus_core::preferences::UiPreferences;
use motus_scene::gpu::Viewport;
use motus_scene::loader::{LoadError, LoadedAsset};
use motus_scene::render_loop::FrameOutcome;
use motus_scene::viewer::{LoadOutcome, LoadRequest, ViewerCoordinator, ViewerStatus};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, trace, warn};
use tokio::sync::watch;

use crate::app::{Catalog, NoticeLevel, Notices, PortalSettings, Preferences, StorageToken};
use crate::network::{request_storage_token, ApiClient, PendingApi};
use crate::render::{ApplyRenderCommands, CanvasMount, RenderQueue};

/// Wheel pixels per scroll line (trackpads report pixels)
const PIXELS_PER_LINE: f32 = 40.0;
/// Pan distance per dragged pixel, relative to the orbit distance
const PAN_SPEED: f32 = 0.002;

pub struct ViewerPlugin;

impl Plugin for ViewerPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<PendingLoads>()
            .add_systems(Startup, setup_viewer)
            .add_systems(
                Update,
                (
                    track_canvas,
                    orbit_input,
                    apply_preference_changes,
                    drive_selection,
                    process_loads,
                    run_frame,
                )
                    .chain()
                    .before(ApplyRenderCommands),
            );
    }
}

#[derive(Resource)]
pub struct Viewer(pub ViewerCoordinator<CanvasMount>);

pub enum LoadMessage {
    Progress {
        generation: u64,
        percent: u8,
    },
    Done {
        generation: u64,
        result: Result<LoadedAsset, LoadError>,
    },
}

/// Messages from in-flight model loads
#[derive(Resource, Default, Clone)]
pub struct PendingLoads(pub Arc<Mutex<Vec<LoadMessage>>>);

impl PendingLoads {
    fn push(&self, message: LoadMessage) {
        if let Ok(mut queue) = self.0.lock() {
            queue.push(message);
        }
    }

    fn take(&self) -> Vec<LoadMessage> {
        self.0
            .lock()
            .map(|mut queue| std::mem::take(&mut *queue))
            .unwrap_or_default()
    }
}

fn window_viewport(window: &Window) -> Viewport {
    Viewport::new(window.physical_width(), window.physical_height())
}

fn setup_viewer(
    mut commands: Commands,
    queue: Res<RenderQueue>,
    settings: Res<PortalSettings>,
    prefs: Res<Preferences>,
    windows: Query<&Window, With<PrimaryWindow>>,
) {
    let viewport = windows
        .single()
        .map(window_viewport)
        .unwrap_or(Viewport::new(1280, 720));
    let mount = CanvasMount::new(queue.clone(), viewport);
    commands.insert_resource(Viewer(ViewerCoordinator::new(
        mount,
        settings.0.viewer.clone(),
        prefs.0.current(),
    )));
}

/// Fetch and parse the model for `request` in the background
fn spawn_load(request: LoadRequest, progress_step: u8, pending: &PendingLoads) {
    #[cfg(target_arch = "wasm32")]
    {
        use motus_scene::loader::AssetLoader;

        use crate::network::GlooFetcher;

        let pending = pending.clone();
        wasm_bindgen_futures::spawn_local(async move {
            let generation = request.generation;
            let loader = AssetLoader::new(GlooFetcher).with_progress_step(progress_step);
            let progress = pending.clone();
            let mut report = move |percent: u8| {
                progress.push(LoadMessage::Progress { generation, percent });
            };
            let result = loader
                .load(&request.file.url, &request.token, &mut report)
                .await;
            pending.push(LoadMessage::Done { generation, result });
        });
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        let _ = progress_step;
        info!(file = %request.file.id, "Model loading not available in native mode");
        pending.push(LoadMessage::Done {
            generation: request.generation,
            result: Err(LoadError::Invalid("model loading requires a browser".to_string())),
        });
    }
}

fn track_canvas(
    mut viewer: ResMut<Viewer>,
    mut resized: MessageReader<WindowResized>,
    mut closing: MessageReader<WindowClosing>,
    windows: Query<&Window, With<PrimaryWindow>>,
) {
    if closing.read().count() > 0 {
        viewer.0.mount_mut().set_attached(false);
        viewer.0.detach_mount();
        return;
    }
    if resized.read().count() == 0 {
        return;
    }
    let Ok(window) = windows.single() else {
        return;
    };
    let viewport = window_viewport(window);
    viewer.0.mount_mut().set_viewport(viewport);
    if viewer.0.mount().has_resize_listener() {
        viewer.0.resize(viewport);
    }
}

fn orbit_input(
    mut viewer: ResMut<Viewer>,
    mut mouse_motion: MessageReader<MouseMotion>,
    mut mouse_wheel: MessageReader<MouseWheel>,
    mouse_button: Res<ButtonInput<MouseButton>>,
    touches: Res<Touches>,
    mut contexts: EguiContexts,
) {
    // Check if egui wants the mouse - if so, don't process camera controls
    let egui_wants_pointer = contexts
        .ctx_mut()
        .map(|ctx| ctx.wants_pointer_input())
        .unwrap_or(false);

    // Always drain, so input does not pile up while egui has the pointer
    let motion: Vec2 = mouse_motion.read().map(|m| m.delta).sum();
    let scroll: f32 = mouse_wheel
        .read()
        .map(|wheel| match wheel.unit {
            MouseScrollUnit::Line => wheel.y,
            MouseScrollUnit::Pixel => wheel.y / PIXELS_PER_LINE,
        })
        .sum();

    if egui_wants_pointer {
        return;
    }
    let Some(controls) = viewer.0.controls_mut() else {
        return;
    };

    if mouse_button.pressed(MouseButton::Left) {
        controls.rotate(motion.x, motion.y);
    }
    if mouse_button.pressed(MouseButton::Right) && motion != Vec2::ZERO {
        // Camera right, projected onto the ground plane
        let azimuth = controls.azimuth();
        let right = Vec3::new(azimuth.cos(), 0.0, -azimuth.sin());
        let pan_speed = controls.distance() * PAN_SPEED;
        controls.pan((-right * motion.x + Vec3::Y * motion.y) * pan_speed);
    }
    if scroll != 0.0 {
        controls.zoom(scroll);
    }

    // Touch support for mobile
    if touches.iter().count() == 1 {
        for touch in touches.iter() {
            let delta = touch.delta();
            if delta != Vec2::ZERO {
                controls.rotate(delta.x, delta.y);
            }
        }
    }
}

fn apply_preference_changes(
    mut viewer: ResMut<Viewer>,
    prefs: Res<Preferences>,
    mut notices: ResMut<Notices>,
    mut receiver: Local<Option<watch::Receiver<UiPreferences>>>,
) {
    let receiver = receiver.get_or_insert_with(|| prefs.0.subscribe());
    if !receiver.has_changed().unwrap_or(false) {
        return;
    }
    let current = *receiver.borrow_and_update();
    if let Err(e) = viewer.0.apply_preferences(current) {
        warn!(error = %e, "Failed to apply preferences to the viewer");
        notices.push(NoticeLevel::Warning, format!("Could not update viewer colours: {}", e));
    }
}

fn drive_selection(
    mut viewer: ResMut<Viewer>,
    catalog: Res<Catalog>,
    token: Res<StorageToken>,
    settings: Res<PortalSettings>,
    pending: Res<PendingLoads>,
) {
    if !catalog.is_changed() && !token.is_changed() {
        return;
    }
    if let Some(request) = viewer.0.select(catalog.0.selected(), token.0.as_ref()) {
        spawn_load(request, settings.0.viewer.progress_step_percent, &pending);
    }
}

fn process_loads(
    mut viewer: ResMut<Viewer>,
    pending: Res<PendingLoads>,
    mut notices: ResMut<Notices>,
    api: Res<ApiClient>,
    settings: Res<PortalSettings>,
    pending_api: Res<PendingApi>,
    mut token_refreshed: Local<bool>,
) {
    for message in pending.take() {
        match message {
            LoadMessage::Progress { generation, percent } => {
                viewer.0.report_progress(generation, percent);
            }
            LoadMessage::Done { generation, result } => {
                let unauthorized = matches!(result, Err(LoadError::Unauthorized { .. }));
                match viewer.0.complete_load(generation, result) {
                    LoadOutcome::Failed if unauthorized && !*token_refreshed => {
                        // One automatic refresh; the new token re-drives selection
                        info!(generation, "Storage token rejected, requesting a new one");
                        *token_refreshed = true;
                        request_storage_token(&api, &settings.0.backend.motion_container, &pending_api);
                    }
                    LoadOutcome::Failed => {
                        if let ViewerStatus::Failed { message, .. } = viewer.0.status() {
                            notices.push(NoticeLevel::Error, format!("Model failed to load: {}", message));
                        }
                    }
                    LoadOutcome::Stale => debug!(generation, "Ignored load for a previous selection"),
                    LoadOutcome::Attached => *token_refreshed = false,
                    LoadOutcome::AlreadyAttached => {}
                }
            }
        }
    }
}

fn run_frame(mut viewer: ResMut<Viewer>) {
    let Some(ticket) = viewer.0.schedule_frame() else {
        return;
    };
    if viewer.0.frame(&ticket) == FrameOutcome::Skipped {
        trace!(frame = ticket.frame(), "Frame skipped");
    }
}
