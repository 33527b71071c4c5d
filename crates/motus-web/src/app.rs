//! Bevy application setup

use bevy::prelude::*;
use bevy_egui::EguiPlugin;
use bevy_picking::{prelude::MeshPickingPlugin, DefaultPickingPlugins};
use motus_core::catalog::MotionCatalog;
use motus_core::config::PortalConfig;
use motus_core::identity::{AccessToken, Identity, Role, UserId};
use motus_core::inbox::{Inbox, UnreadCount};
use motus_core::message::ConversationId;
use motus_core::motion_file::MotionFileId;
use motus_core::preferences::PreferenceHub;
use motus_core::store::KeyValueStore;
use tokio::sync::watch;

use crate::network::{backend_from_browser, parse_query_param, ApiClient, NetworkPlugin, WebSocketTransport};
use crate::render::RenderPlugin;
use crate::storage::{LocalStorageStore, API_TOKEN_KEY};
use crate::ui::UiPlugin;
use crate::viewer::ViewerPlugin;

/// Notices kept on screen at once
const MAX_NOTICES: usize = 5;

/// Portal configuration, with the backend resolved against the page location
#[derive(Debug, Clone, Resource)]
pub struct PortalSettings(pub PortalConfig);

/// Who is using the portal and what the page was opened for.
///
/// The auth flow outside this app puts `user`, `role`, and the counterpart
/// (`patient` or `physician`) into the query string and the bearer token into
/// `localStorage`.
#[derive(Debug, Clone, Default, Resource)]
pub struct PortalSession {
    pub identity: Option<Identity>,
    /// Patient whose motion files are listed
    pub patient: Option<UserId>,
    pub conversation: Option<ConversationId>,
    /// Preselected motion file (`?file=`)
    pub initial_file: Option<MotionFileId>,
}

impl PortalSession {
    pub fn from_query(search: &str) -> Self {
        let id_param = |name: &str| {
            parse_query_param(search, name)
                .and_then(|raw| raw.parse::<i64>().ok())
                .map(UserId)
        };
        let role = parse_query_param(search, "role").and_then(|raw| match raw.as_str() {
            "patient" => Some(Role::Patient),
            "physician" => Some(Role::Physician),
            "admin" => Some(Role::Admin),
            _ => None,
        });
        let identity = match (id_param("user"), role) {
            (Some(user_id), Some(role)) => Some(Identity::new(user_id, role)),
            _ => None,
        };

        let (patient, physician) = match identity {
            Some(Identity {
                user_id,
                role: Role::Patient,
            }) => (Some(user_id), id_param("physician")),
            Some(Identity {
                user_id,
                role: Role::Physician,
            }) => (id_param("patient"), Some(user_id)),
            _ => (id_param("patient"), id_param("physician")),
        };

        Self {
            identity,
            patient,
            conversation: patient.zip(physician).map(|(p, d)| ConversationId::new(p, d)),
            initial_file: parse_query_param(search, "file")
                .and_then(|raw| raw.parse::<i64>().ok())
                .map(MotionFileId),
        }
    }

    #[cfg(target_arch = "wasm32")]
    pub fn from_browser() -> Self {
        let search = web_sys::window()
            .and_then(|w| w.location().search().ok())
            .unwrap_or_default();
        Self::from_query(&search)
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_browser() -> Self {
        Self::default()
    }
}

/// Motion files shown next to the viewer
#[derive(Debug, Default, Resource)]
pub struct Catalog(pub MotionCatalog);

/// Storage access token appended to motion file URLs
#[derive(Debug, Clone, Default, Resource)]
pub struct StorageToken(pub Option<AccessToken>);

/// Persisted accessibility preferences
#[derive(Resource)]
pub struct Preferences(pub PreferenceHub<LocalStorageStore>);

/// Inbox for the open conversation. Non-send: it owns the browser WebSocket.
pub struct PortalInbox(pub Inbox<WebSocketTransport, LocalStorageStore>);

/// Unread badge updates published by the inbox
#[derive(Resource)]
pub struct UnreadBadge(pub watch::Receiver<UnreadCount>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

/// Messages for the status bar, newest last
#[derive(Debug, Default, Resource)]
pub struct Notices {
    pub items: Vec<Notice>,
}

impl Notices {
    pub fn push(&mut self, level: NoticeLevel, text: impl Into<String>) {
        let text = text.into();
        if self.items.last().is_some_and(|n| n.text == text) {
            return;
        }
        self.items.push(Notice { level, text });
        if self.items.len() > MAX_NOTICES {
            let excess = self.items.len() - MAX_NOTICES;
            self.items.drain(..excess);
        }
    }

    pub fn dismiss(&mut self, index: usize) {
        if index < self.items.len() {
            self.items.remove(index);
        }
    }
}

/// Run the Bevy application
pub fn run() {
    let mut config = PortalConfig::default();
    config.backend = backend_from_browser(&config.backend);
    let session = PortalSession::from_browser();

    let api_token = match LocalStorageStore.get(API_TOKEN_KEY) {
        Ok(Some(token)) => AccessToken::new(token),
        Ok(None) => {
            tracing::warn!("No API token in storage, backend requests will be rejected");
            AccessToken::new("")
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read API token");
            AccessToken::new("")
        }
    };
    let api = ApiClient::new(&config.backend.http_url, api_token);

    App::new()
        .add_plugins(
            DefaultPlugins
                .set(WindowPlugin {
                    primary_window: Some(Window {
                        title: "Motus - Motion Viewer".to_string(),
                        canvas: Some("#motus-canvas".to_string()),
                        fit_canvas_to_parent: true,
                        prevent_default_event_handling: false,
                        ..default()
                    }),
                    ..default()
                })
                .set(AssetPlugin {
                    // Nothing is loaded through the asset server; models arrive as bytes
                    meta_check: bevy::asset::AssetMetaCheck::Never,
                    ..default()
                }),
        )
        // These must be added BEFORE EguiPlugin so it can detect PickingPlugin
        .add_plugins(DefaultPickingPlugins)
        .add_plugins(MeshPickingPlugin)
        .add_plugins(EguiPlugin::default())
        .insert_resource(Preferences(PreferenceHub::load(LocalStorageStore)))
        .insert_resource(PortalSettings(config))
        .insert_resource(session)
        .insert_resource(api)
        .init_resource::<Catalog>()
        .init_resource::<StorageToken>()
        .init_resource::<Notices>()
        .add_plugins(NetworkPlugin)
        .add_plugins(RenderPlugin)
        .add_plugins(ViewerPlugin)
        .add_plugins(UiPlugin)
        .run();
}
