//! Viewer lifecycle: one session per mount point, torn down synchronously
//!
//! ```text
//! Idle --select--> Loading --complete_load--> Active
//!   ^                 |                          |
//!   |                 +---- unmount / detach ----+--> TornDown --attach--> Idle
//! ```
//!
//! Every session gets a generation number. Load results and progress reports
//! carry the generation they were issued for, and anything addressed to an
//! older generation is dropped.

use motus_core::config::ViewerSettings;
use motus_core::identity::AccessToken;
use motus_core::motion_file::{MotionFile, MotionFileId};
use motus_core::preferences::UiPreferences;
use tracing::{debug, error, info, warn};

use crate::animation::AnimationMixer;
use crate::builder::{build_scene, clear_color, ground_material, PerspectiveCamera};
use crate::controls::OrbitControls;
use crate::dispose::{dispose, DisposalReport, ReleaseSink};
use crate::gpu::{FrameSnapshot, ListenerId, MountPoint, RenderError, Renderer, ResourceLedger, TextureMaps, Viewport};
use crate::graph::{MaterialBinding, MaterialSlot, NodeId, NodeKind, SceneGraph};
use crate::loader::{LoadError, LoadedAsset};
use crate::mount::{ModelSlot, MountOutcome};
use crate::render_loop::{FrameOutcome, FrameTicket, LoopState, RenderLoop};

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerStatus {
    Idle,
    Loading {
        file: MotionFileId,
        progress: Option<u8>,
    },
    Active {
        file: MotionFileId,
    },
    /// The session is still up (ground and light keep rendering) but holds no model
    Failed {
        file: Option<MotionFileId>,
        message: String,
    },
    TornDown,
}

/// Work the host must perform: load `file` with `token`, then report back with `generation`
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub generation: u64,
    pub file: MotionFile,
    pub token: AccessToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Attached,
    AlreadyAttached,
    /// The result belongs to a superseded session and was discarded
    Stale,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewerStats {
    pub loads_started: usize,
    pub models_mounted: usize,
    /// Every session torn down, whatever state it was in
    pub disposals: usize,
    /// Sessions torn down while `Active`
    pub active_teardowns: usize,
    pub draws: u64,
}

/// Everything owned by one viewing of one file
pub struct ViewerSession<R: Renderer> {
    generation: u64,
    file: MotionFile,
    graph: SceneGraph,
    camera: PerspectiveCamera,
    controls: OrbitControls,
    ground: NodeId,
    clear_color: [f32; 3],
    ledger: ResourceLedger<R>,
    slot: ModelSlot,
    mixer: Option<AnimationMixer>,
    render_loop: RenderLoop,
    listener: Option<ListenerId>,
}

impl<R: Renderer> ViewerSession<R> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn file(&self) -> &MotionFile {
        &self.file
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    pub fn camera(&self) -> &PerspectiveCamera {
        &self.camera
    }

    pub fn controls(&self) -> &OrbitControls {
        &self.controls
    }

    pub fn ledger(&self) -> &ResourceLedger<R> {
        &self.ledger
    }

    pub fn mixer(&self) -> Option<&AnimationMixer> {
        self.mixer.as_ref()
    }

    pub fn model_root(&self) -> Option<NodeId> {
        self.slot.root()
    }

    pub fn loop_state(&self) -> LoopState {
        self.render_loop.state()
    }

    pub fn clear_color(&self) -> [f32; 3] {
        self.clear_color
    }
}

pub struct ViewerCoordinator<M: MountPoint> {
    mount: M,
    settings: ViewerSettings,
    prefs: UiPreferences,
    session: Option<ViewerSession<M::Renderer>>,
    status: ViewerStatus,
    generation: u64,
    stats: ViewerStats,
}

impl<M: MountPoint> ViewerCoordinator<M> {
    pub fn new(mount: M, settings: ViewerSettings, prefs: UiPreferences) -> Self {
        Self {
            mount,
            settings,
            prefs,
            session: None,
            status: ViewerStatus::Idle,
            generation: 0,
            stats: ViewerStats::default(),
        }
    }

    pub fn status(&self) -> &ViewerStatus {
        &self.status
    }

    pub fn stats(&self) -> ViewerStats {
        self.stats
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn settings(&self) -> &ViewerSettings {
        &self.settings
    }

    pub fn mount(&self) -> &M {
        &self.mount
    }

    pub fn mount_mut(&mut self) -> &mut M {
        &mut self.mount
    }

    pub fn session(&self) -> Option<&ViewerSession<M::Renderer>> {
        self.session.as_ref()
    }

    pub fn current_file(&self) -> Option<&MotionFile> {
        self.session.as_ref().map(|s| &s.file)
    }

    /// Pointer input goes here; `None` without a live session
    pub fn controls_mut(&mut self) -> Option<&mut OrbitControls> {
        self.session.as_mut().map(|s| &mut s.controls)
    }

    /// Switch to `file`. Selecting the file already on screen does nothing,
    /// unless its session failed; then it is rebuilt, typically with a fresh token.
    /// Otherwise the current session is torn down first, and a new one starts
    /// when the mount point is attached and both file and token are present.
    pub fn select(
        &mut self,
        file: Option<&MotionFile>,
        token: Option<&AccessToken>,
    ) -> Option<LoadRequest> {
        let failed = matches!(self.status, ViewerStatus::Failed { .. });
        if let (Some(file), Some(current), false) = (file, self.current_file(), failed) {
            if file.id == current.id {
                debug!(file = %file.id, "File already selected");
                return None;
            }
        }

        self.teardown();

        let (Some(file), Some(token)) = (file, token.filter(|t| !t.is_empty())) else {
            debug!(
                has_file = file.is_some(),
                has_token = token.is_some(),
                "Nothing to load"
            );
            self.status = ViewerStatus::Idle;
            return None;
        };
        if !self.mount.is_attached() {
            warn!(file = %file.id, "Mount point detached, not starting a viewer session");
            self.status = ViewerStatus::TornDown;
            return None;
        }

        self.generation += 1;
        let generation = self.generation;
        match self.start_session(file.clone(), generation) {
            Ok(session) => {
                self.session = Some(session);
                self.stats.loads_started += 1;
                self.status = ViewerStatus::Loading {
                    file: file.id,
                    progress: None,
                };
                info!(file = %file.id, generation, "Viewer session started");
                Some(LoadRequest {
                    generation,
                    file: file.clone(),
                    token: token.clone(),
                })
            }
            Err(e) => {
                error!(file = %file.id, error = %e, "Failed to start viewer session");
                self.status = ViewerStatus::Failed {
                    file: Some(file.id),
                    message: e.to_string(),
                };
                None
            }
        }
    }

    fn start_session(
        &mut self,
        file: MotionFile,
        generation: u64,
    ) -> Result<ViewerSession<M::Renderer>, RenderError> {
        let viewport = self.mount.viewport();
        let mut renderer = self.mount.create_renderer()?;
        renderer.set_size(viewport);
        let mut ledger = ResourceLedger::new(renderer);

        let scene = match build_scene(&self.settings, self.prefs, viewport, &mut ledger) {
            Ok(scene) => scene,
            Err(e) => {
                ledger.shutdown();
                return Err(e);
            }
        };
        if let Err(e) = self.mount.attach_output(ledger.renderer_mut()) {
            dispose(&scene.graph, scene.graph.root(), &mut ledger);
            ledger.shutdown();
            return Err(e);
        }
        let listener = self.mount.add_resize_listener();

        Ok(ViewerSession {
            generation,
            file,
            graph: scene.graph,
            camera: scene.camera,
            controls: scene.controls,
            ground: scene.ground,
            clear_color: scene.clear_color,
            ledger,
            slot: ModelSlot::new(),
            mixer: None,
            render_loop: RenderLoop::start(),
            listener: Some(listener),
        })
    }

    /// Hand back the result of a [`LoadRequest`]
    pub fn complete_load(
        &mut self,
        generation: u64,
        result: Result<LoadedAsset, LoadError>,
    ) -> LoadOutcome {
        let Some(session) = self.session.as_mut().filter(|s| s.generation == generation) else {
            debug!(
                generation,
                current = self.generation,
                "Discarding load result for a superseded session"
            );
            return LoadOutcome::Stale;
        };
        let file = session.file.id;

        let asset = match result {
            Ok(asset) => asset,
            Err(e) => {
                warn!(file = %file, generation, error = %e, "Model failed to load");
                self.status = ViewerStatus::Failed {
                    file: Some(file),
                    message: e.to_string(),
                };
                return LoadOutcome::Failed;
            }
        };

        let mounted = session.slot.mount(
            generation,
            &asset,
            &self.settings.model,
            &mut session.graph,
            &mut session.ledger,
        );
        match mounted {
            Ok(MountOutcome::Mounted(model)) => {
                let mut mixer =
                    AnimationMixer::new(asset.clips, model.bindings, self.settings.frame_delta_secs);
                mixer.play_all();
                session.mixer = Some(mixer);
                self.stats.models_mounted += 1;
                self.status = ViewerStatus::Active { file };
                LoadOutcome::Attached
            }
            Ok(MountOutcome::AlreadyMounted) => LoadOutcome::AlreadyAttached,
            Err(e) => {
                error!(file = %file, generation, error = %e, "Failed to upload model");
                self.status = ViewerStatus::Failed {
                    file: Some(file),
                    message: e.to_string(),
                };
                LoadOutcome::Failed
            }
        }
    }

    /// Record load progress. Returns false for reports addressed to another session.
    pub fn report_progress(&mut self, generation: u64, percent: u8) -> bool {
        if self.session.as_ref().is_none_or(|s| s.generation != generation) {
            return false;
        }
        if let ViewerStatus::Loading { progress, .. } = &mut self.status {
            debug!(generation, percent, "Model loading");
            *progress = Some(percent);
            true
        } else {
            false
        }
    }

    /// Ticket for the next frame; `None` when no session is running
    pub fn schedule_frame(&mut self) -> Option<FrameTicket> {
        self.session.as_mut()?.render_loop.schedule()
    }

    /// Run one frame for `ticket`. Tickets issued before a stop, or by an
    /// earlier session, do nothing.
    pub fn frame(&mut self, ticket: &FrameTicket) -> FrameOutcome {
        if ticket.is_cancelled() {
            return FrameOutcome::Skipped;
        }
        let Some(session) = self.session.as_mut() else {
            return FrameOutcome::Skipped;
        };
        if !session.render_loop.owns(ticket) {
            return FrameOutcome::Skipped;
        }

        session.controls.update();
        session.controls.apply(&mut session.camera);
        if let Some(mixer) = session.mixer.as_mut() {
            mixer.advance();
            mixer.apply(&mut session.graph);
        }
        let snapshot = FrameSnapshot::capture(&session.graph, &session.camera, session.clear_color);
        session.ledger.renderer_mut().draw(&snapshot);
        self.stats.draws += 1;
        FrameOutcome::Drawn
    }

    /// Mount point resized. Ignored (and logged) once the session's listener is gone.
    pub fn resize(&mut self, viewport: Viewport) -> bool {
        let Some(session) = self.session.as_mut().filter(|s| s.listener.is_some()) else {
            error!(
                width = viewport.width,
                height = viewport.height,
                "Resize received with no live viewer session"
            );
            return false;
        };
        session.camera.set_viewport(viewport);
        session.ledger.renderer_mut().set_size(viewport);
        true
    }

    /// Re-derive theme-dependent colours for the live session
    pub fn apply_preferences(&mut self, prefs: UiPreferences) -> Result<(), RenderError> {
        if prefs == self.prefs {
            return Ok(());
        }
        self.prefs = prefs;
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        session.clear_color = clear_color(&self.settings, prefs);
        let material = ground_material(&self.settings.ground, &self.settings, prefs);
        let replacement = session.ledger.create_material(&material, &TextureMaps::default())?;
        let previous = match session.graph.get_mut(session.ground).map(|n| &mut n.kind) {
            Some(NodeKind::Mesh(mesh)) => {
                let previous = mesh.material.bindings().first().map(|b| b.material);
                mesh.material = MaterialSlot::Single(MaterialBinding::plain(replacement));
                previous
            }
            _ => None,
        };
        if let Some(previous) = previous {
            session.ledger.release(previous);
        }
        debug!(high_contrast = prefs.high_contrast(), "Viewer colours updated");
        Ok(())
    }

    /// The host removed the mount point
    pub fn detach_mount(&mut self) {
        self.teardown();
        self.status = ViewerStatus::TornDown;
    }

    /// The mount point is available again
    pub fn attach_mount(&mut self) {
        if self.status == ViewerStatus::TornDown {
            self.status = ViewerStatus::Idle;
        }
    }

    /// Tear down the current session, if any
    pub fn unmount(&mut self) {
        self.teardown();
        self.status = ViewerStatus::TornDown;
    }

    fn teardown(&mut self) -> Option<DisposalReport> {
        let mut session = self.session.take()?;
        let was_active = matches!(self.status, ViewerStatus::Active { .. });

        session.render_loop.stop();
        if let Some(listener) = session.listener.take() {
            self.mount.remove_resize_listener(listener);
        }
        self.mount.detach_output(session.ledger.renderer_mut());
        let report = dispose(&session.graph, session.graph.root(), &mut session.ledger);
        let leftovers = session.ledger.shutdown();
        let stopped = session.mixer.as_mut().map_or(0, AnimationMixer::stop_all);

        self.stats.disposals += 1;
        if was_active {
            self.stats.active_teardowns += 1;
        }
        info!(
            file = %session.file.id,
            generation = session.generation,
            released = report.released,
            leftovers,
            actions_stopped = stopped,
            "Viewer session torn down"
        );
        Some(report)
    }
}

impl<M: MountPoint> Drop for ViewerCoordinator<M> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::ResourceKind;
    use crate::test_support::{sample_asset, Event, RecordingMount};
    use chrono::Utc;
    use motus_core::preferences::ColorTheme;

    fn motion_file(id: i64) -> MotionFile {
        MotionFile {
            id: MotionFileId(id),
            name: format!("squat-{}.glb", id),
            url: format!("https://store.example.net/motion-files/squat-{}.glb", id),
            kind: "glb".into(),
            created_at: Utc::now(),
            patient_id: None,
        }
    }

    fn token() -> AccessToken {
        AccessToken::new("sv=2024&sig=abc")
    }

    fn coordinator() -> ViewerCoordinator<RecordingMount> {
        ViewerCoordinator::new(
            RecordingMount::new(Viewport::new(800, 600)),
            ViewerSettings::default(),
            UiPreferences::default(),
        )
    }

    fn open(viewer: &mut ViewerCoordinator<RecordingMount>, id: i64, meshes: usize) -> u64 {
        let request = viewer.select(Some(&motion_file(id)), Some(&token())).unwrap();
        assert_eq!(
            viewer.complete_load(request.generation, Ok(sample_asset(meshes))),
            LoadOutcome::Attached
        );
        request.generation
    }

    fn count(events: &[Event], wanted: fn(&Event) -> bool) -> usize {
        events.iter().filter(|e| wanted(e)).count()
    }

    #[test]
    fn test_select_starts_loading_session() {
        let mut viewer = coordinator();
        let request = viewer.select(Some(&motion_file(1)), Some(&token())).unwrap();

        assert_eq!(request.generation, 1);
        assert_eq!(request.token, token());
        assert_eq!(
            viewer.status(),
            &ViewerStatus::Loading {
                file: MotionFileId(1),
                progress: None
            }
        );
        assert_eq!(
            viewer.mount().events(),
            vec![
                Event::CreateRenderer,
                Event::SetSize(Viewport::new(800, 600)),
                Event::AttachOutput,
                Event::AddListener(ListenerId(1)),
            ]
        );
        let session = viewer.session().unwrap();
        assert_eq!(session.loop_state(), LoopState::Running);
        assert!(session.model_root().is_none());
    }

    #[test]
    fn test_missing_token_or_file_stays_idle() {
        let mut viewer = coordinator();
        assert!(viewer.select(Some(&motion_file(1)), None).is_none());
        assert!(viewer
            .select(Some(&motion_file(1)), Some(&AccessToken::new("")))
            .is_none());
        assert!(viewer.select(None, Some(&token())).is_none());
        assert_eq!(viewer.status(), &ViewerStatus::Idle);
        assert_eq!(viewer.mount().renderers_created, 0);
    }

    #[test]
    fn test_detached_mount_starts_nothing() {
        let mut viewer = coordinator();
        viewer.mount_mut().attached = false;
        assert!(viewer.select(Some(&motion_file(1)), Some(&token())).is_none());
        assert_eq!(viewer.mount().renderers_created, 0);
        assert_eq!(viewer.stats().loads_started, 0);
    }

    #[test]
    fn test_load_attaches_model_and_plays() {
        let mut viewer = coordinator();
        open(&mut viewer, 1, 3);

        assert_eq!(viewer.status(), &ViewerStatus::Active { file: MotionFileId(1) });
        let session = viewer.session().unwrap();
        let root = session.model_root().unwrap();
        let meshes = session
            .graph()
            .descendants(root)
            .into_iter()
            .filter(|id| session.graph().get(*id).is_some_and(|n| n.is_mesh()))
            .count();
        assert_eq!(meshes, 3);
        assert!(session.mixer().unwrap().is_playing());
        assert_eq!(viewer.stats().models_mounted, 1);
    }

    #[test]
    fn test_same_file_twice_is_noop() {
        let mut viewer = coordinator();
        open(&mut viewer, 1, 2);
        let before = viewer.stats();

        assert!(viewer.select(Some(&motion_file(1)), Some(&token())).is_none());
        assert_eq!(viewer.stats(), before);
        assert_eq!(viewer.mount().renderers_created, 1);
        assert_eq!(viewer.status(), &ViewerStatus::Active { file: MotionFileId(1) });
    }

    #[test]
    fn test_disposals_match_sessions_torn_down() {
        let mut viewer = coordinator();
        for id in 1..=4 {
            open(&mut viewer, id, 2);
            // only ever one model in the scene
            let session = viewer.session().unwrap();
            assert_eq!(session.file().id, MotionFileId(id));
            let models = session
                .graph()
                .iter()
                .filter(|(_, n)| n.name.as_deref() == Some(crate::mount::MODEL_ROOT_NODE))
                .count();
            assert_eq!(models, 1);
        }
        assert_eq!(viewer.stats().disposals, 3);
        assert_eq!(viewer.stats().active_teardowns, 3);

        viewer.unmount();
        viewer.unmount();
        let stats = viewer.stats();
        assert_eq!(stats.loads_started, 4);
        assert_eq!(stats.disposals, 4);
        assert_eq!(stats.active_teardowns, 4);

        let events = viewer.mount().events();
        assert_eq!(count(&events, |e| matches!(e, Event::Shutdown)), 4);
        assert!(viewer.mount().listeners.is_empty());
    }

    #[test]
    fn test_stale_load_never_attaches() {
        let mut viewer = coordinator();
        let first = viewer.select(Some(&motion_file(1)), Some(&token())).unwrap();
        let second = viewer.select(Some(&motion_file(2)), Some(&token())).unwrap();

        assert_eq!(
            viewer.complete_load(first.generation, Ok(sample_asset(2))),
            LoadOutcome::Stale
        );
        assert!(!viewer.report_progress(first.generation, 50));
        let session = viewer.session().unwrap();
        assert!(session.model_root().is_none());
        assert_eq!(session.file().id, MotionFileId(2));

        assert!(viewer.report_progress(second.generation, 50));
        assert_eq!(
            viewer.status(),
            &ViewerStatus::Loading {
                file: MotionFileId(2),
                progress: Some(50)
            }
        );
        assert_eq!(
            viewer.complete_load(second.generation, Ok(sample_asset(2))),
            LoadOutcome::Attached
        );
        assert_eq!(
            viewer.complete_load(second.generation, Ok(sample_asset(2))),
            LoadOutcome::AlreadyAttached
        );
    }

    #[test]
    fn test_teardown_order() {
        let mut viewer = coordinator();
        open(&mut viewer, 1, 2);
        viewer.mount().clear_events();

        viewer.unmount();
        let events = viewer.mount().events();
        assert_eq!(events[0], Event::RemoveListener(ListenerId(1)));
        assert_eq!(events[1], Event::DetachOutput);
        assert_eq!(events.last(), Some(&Event::Shutdown));
        let releases = &events[2..events.len() - 1];
        assert!(releases.iter().all(|e| matches!(e, Event::Release(_))));
        // ground (geometry + material), shadow map, texture, material, two geometries
        assert_eq!(releases.len(), 7);
        assert_eq!(viewer.status(), &ViewerStatus::TornDown);
    }

    #[test]
    fn test_in_flight_frame_after_stop_draws_nothing() {
        let mut viewer = coordinator();
        open(&mut viewer, 1, 1);
        let drawn = viewer.schedule_frame().unwrap();
        assert_eq!(viewer.frame(&drawn), FrameOutcome::Drawn);

        let in_flight = viewer.schedule_frame().unwrap();
        viewer.unmount();
        assert_eq!(viewer.frame(&in_flight), FrameOutcome::Skipped);
        assert!(viewer.schedule_frame().is_none());

        let draws = count(&viewer.mount().events(), |e| matches!(e, Event::Draw));
        assert_eq!(draws, 1);
        assert_eq!(viewer.stats().draws, 1);
    }

    #[test]
    fn test_ticket_from_previous_session_skipped() {
        let mut viewer = coordinator();
        open(&mut viewer, 1, 1);
        let old = viewer.schedule_frame().unwrap();
        open(&mut viewer, 2, 1);
        assert_eq!(viewer.frame(&old), FrameOutcome::Skipped);
        assert_eq!(viewer.stats().draws, 0);
    }

    #[test]
    fn test_frame_animates_and_draws_scene() {
        let mut viewer = coordinator();
        open(&mut viewer, 1, 2);
        for _ in 0..15 {
            let ticket = viewer.schedule_frame().unwrap();
            viewer.frame(&ticket);
        }
        let session = viewer.session().unwrap();
        let frame = session.ledger().renderer().last_frame.clone().unwrap();
        // ground plus two model meshes, one spotlight
        assert_eq!(frame.draws.len(), 3);
        assert_eq!(frame.lights.len(), 1);
        assert_eq!(frame.clear_color, [0.0, 0.0, 0.0]);

        let action = session.mixer().unwrap().actions()[0];
        assert!((action.time - 0.25).abs() < 1e-4);
        let hips = session.graph().find_by_name("hips").unwrap();
        let y = session.graph().get(hips).unwrap().transform.translation.y;
        assert!((y - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_resize_updates_camera_and_renderer() {
        let mut viewer = coordinator();
        open(&mut viewer, 1, 1);
        assert!(viewer.resize(Viewport::new(1000, 500)));
        let session = viewer.session().unwrap();
        assert_eq!(session.camera().aspect, 2.0);
        assert_eq!(
            session.ledger().renderer().sizes.last(),
            Some(&Viewport::new(1000, 500))
        );
    }

    #[test]
    fn test_resize_after_teardown_ignored() {
        let mut viewer = coordinator();
        open(&mut viewer, 1, 1);
        viewer.unmount();
        viewer.mount().clear_events();
        assert!(!viewer.resize(Viewport::new(1000, 500)));
        assert!(viewer.mount().events().is_empty());
    }

    #[test]
    fn test_failed_load_keeps_scene() {
        let mut viewer = coordinator();
        let request = viewer.select(Some(&motion_file(1)), Some(&token())).unwrap();
        let outcome = viewer.complete_load(
            request.generation,
            Err(LoadError::Unauthorized { status: 403 }),
        );
        assert_eq!(outcome, LoadOutcome::Failed);
        match viewer.status() {
            ViewerStatus::Failed { file, message } => {
                assert_eq!(*file, Some(MotionFileId(1)));
                assert!(message.contains("403"));
            }
            other => panic!("unexpected status {:?}", other),
        }
        let ticket = viewer.schedule_frame().unwrap();
        assert_eq!(viewer.frame(&ticket), FrameOutcome::Drawn);
    }

    #[test]
    fn test_only_active_sessions_count_as_active_teardowns() {
        let mut viewer = coordinator();
        open(&mut viewer, 1, 1);
        // still loading when replaced
        viewer.select(Some(&motion_file(2)), Some(&token())).unwrap();
        let request = viewer.select(Some(&motion_file(3)), Some(&token())).unwrap();
        viewer.complete_load(request.generation, Err(LoadError::Invalid("truncated".into())));
        viewer.unmount();

        let stats = viewer.stats();
        assert_eq!(stats.disposals, 3);
        assert_eq!(stats.active_teardowns, 1);
    }

    #[test]
    fn test_reselect_after_unauthorized_with_fresh_token() {
        let mut viewer = coordinator();
        let expired = viewer.select(Some(&motion_file(1)), Some(&token())).unwrap();
        viewer.complete_load(
            expired.generation,
            Err(LoadError::Unauthorized { status: 403 }),
        );

        let fresh = AccessToken::new("sv=2024&sig=fresh");
        let request = viewer
            .select(Some(&motion_file(1)), Some(&fresh))
            .expect("failed session is rebuilt");
        assert_eq!(request.token, fresh);
        assert!(request.generation > expired.generation);
        assert_eq!(
            viewer.status(),
            &ViewerStatus::Loading {
                file: MotionFileId(1),
                progress: None
            }
        );

        assert_eq!(
            viewer.complete_load(request.generation, Ok(sample_asset(1))),
            LoadOutcome::Attached
        );
        // healthy again, so the same file is a no-op once more
        assert!(viewer.select(Some(&motion_file(1)), Some(&fresh)).is_none());
        assert_eq!(viewer.stats().loads_started, 2);
    }

    #[test]
    fn test_upload_failure_rolls_back_model_only() {
        let mut viewer = coordinator();
        // ground geometry, ground material, shadow map, then the model's texture
        viewer.mount_mut().fail_uploads_after = Some(4);
        let request = viewer.select(Some(&motion_file(1)), Some(&token())).unwrap();
        assert_eq!(
            viewer.complete_load(request.generation, Ok(sample_asset(2))),
            LoadOutcome::Failed
        );
        let session = viewer.session().unwrap();
        assert_eq!(session.ledger().live_count(), 3);
        assert!(session.model_root().is_none());
    }

    #[test]
    fn test_renderer_failure_reported() {
        let mut viewer = coordinator();
        viewer.mount_mut().fail_renderer = true;
        assert!(viewer.select(Some(&motion_file(1)), Some(&token())).is_none());
        assert!(matches!(viewer.status(), ViewerStatus::Failed { .. }));
        assert!(viewer.session().is_none());
    }

    #[test]
    fn test_detach_and_reattach() {
        let mut viewer = coordinator();
        open(&mut viewer, 1, 1);
        viewer.mount_mut().attached = false;
        viewer.detach_mount();
        assert_eq!(viewer.status(), &ViewerStatus::TornDown);
        assert!(viewer.select(Some(&motion_file(2)), Some(&token())).is_none());

        viewer.mount_mut().attached = true;
        viewer.attach_mount();
        assert_eq!(viewer.status(), &ViewerStatus::Idle);
        // the same file loads again once the old session is gone
        assert!(viewer.select(Some(&motion_file(1)), Some(&token())).is_some());
        assert_eq!(viewer.stats().loads_started, 2);
    }

    #[test]
    fn test_high_contrast_recolours_ground() {
        let mut viewer = coordinator();
        open(&mut viewer, 1, 1);
        let before = viewer.session().unwrap().ledger().live_count();

        viewer
            .apply_preferences(UiPreferences {
                color_theme: ColorTheme::HighContrast,
                ..Default::default()
            })
            .unwrap();
        let session = viewer.session().unwrap();
        assert_eq!(session.ledger().live_count(), before);
        let released = &session.ledger().renderer().released;
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].kind, ResourceKind::Material);
    }
}
