//! Backend communication: REST over gloo-net, realtime events over a WebSocket
//!
//! Browser callbacks never touch the ECS. They push into shared queues
//! ([`PendingApi`], [`PendingServerEvents`]) that systems drain every frame.

use bevy::prelude::*;
use chrono::{NaiveDate, Utc};
use motus_core::config::BackendSettings;
use motus_core::identity::{AccessToken, UserId};
use motus_core::inbox::Inbox;
use motus_core::message::{ClientEvent, ConversationId, Message, ServerEvent};
use motus_core::motion_file::{MotionFile, MotionFileId};
use motus_core::sync::{HistoryOutcome, HistoryTicket, RealtimeTransport, TransportError};
use motus_scene::loader::{AssetFetcher, FetchError};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::app::{Catalog, NoticeLevel, Notices, PortalInbox, PortalSession, PortalSettings, StorageToken, UnreadBadge};
use crate::storage::LocalStorageStore;

pub struct NetworkPlugin;

impl Plugin for NetworkPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<PendingApi>()
            .init_resource::<PendingServerEvents>()
            .add_systems(Startup, (request_initial_data, connect_realtime))
            .add_systems(Update, (process_api_events, process_server_events));
    }
}

/// Resolve the backend: `?backend=` query parameter, else the page's own origin
#[cfg(target_arch = "wasm32")]
pub fn backend_from_browser(defaults: &BackendSettings) -> BackendSettings {
    let Some(window) = web_sys::window() else {
        return defaults.clone();
    };
    let location = window.location();

    let origin = match location.search().ok().and_then(|s| parse_query_param(&s, "backend")) {
        Some(backend) => {
            tracing::info!(backend = %backend, "Using backend from URL parameter");
            if backend.starts_with("http://") || backend.starts_with("https://") {
                backend
            } else {
                format!("http://{}", backend)
            }
        }
        None => match location.origin() {
            Ok(origin) => origin,
            Err(_) => return defaults.clone(),
        },
    };

    BackendSettings {
        motion_container: defaults.motion_container.clone(),
        ..BackendSettings::from_origin(&origin)
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub fn backend_from_browser(defaults: &BackendSettings) -> BackendSettings {
    defaults.clone()
}

/// Parse a query parameter from a search string
pub fn parse_query_param(search: &str, param: &str) -> Option<String> {
    let search = search.trim_start_matches('?');
    for pair in search.split('&') {
        let mut parts = pair.splitn(2, '=');
        if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
            if key == param {
                return Some(value.replace("%3A", ":").replace("%2F", "/"));
            }
        }
    }
    None
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("request failed: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    Decode(String),
}

/// REST client for the portal backend. Every request carries the bearer token.
#[derive(Debug, Clone, Resource)]
pub struct ApiClient {
    base_url: String,
    token: AccessToken,
}

impl ApiClient {
    pub fn new(base_url: &str, token: AccessToken) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn motion_files_url(&self, patient: UserId) -> String {
        format!("{}/motion_files/patient/{}", self.base_url, patient)
    }

    pub fn motion_files_after_url(&self, patient: UserId, day: NaiveDate) -> String {
        format!(
            "{}/motion_files/patient/{}/after/{}",
            self.base_url,
            patient,
            day.format("%Y-%m-%d")
        )
    }

    pub fn motion_file_url(&self, id: MotionFileId) -> String {
        format!("{}/motion_files/{}", self.base_url, id)
    }

    pub fn chat_messages_url(&self, conversation: ConversationId) -> String {
        format!(
            "{}/chat_messages/{}/{}",
            self.base_url, conversation.patient_id, conversation.physician_id
        )
    }

    pub fn storage_token_url(&self, container: &str) -> String {
        format!("{}/sas_token/{}", self.base_url, container)
    }

    #[cfg(target_arch = "wasm32")]
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let response = gloo_net::http::Request::get(url)
            .header("Authorization", &self.token.bearer())
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        if !response.ok() {
            return Err(ApiError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct StorageTokenResponse {
    token: String,
}

/// Results of REST calls, queued for [`process_api_events`]
#[derive(Debug)]
pub enum ApiEvent {
    MotionFiles(Vec<MotionFile>),
    /// Files created after a date; merged into the list
    NewerMotionFiles(Vec<MotionFile>),
    MotionFile(MotionFile),
    StorageToken(AccessToken),
    History {
        ticket: HistoryTicket,
        messages: Vec<Message>,
    },
    Failed {
        what: &'static str,
        error: ApiError,
    },
}

#[derive(Resource, Default, Clone)]
pub struct PendingApi(pub Arc<Mutex<Vec<ApiEvent>>>);

impl PendingApi {
    fn push(&self, event: ApiEvent) {
        if let Ok(mut queue) = self.0.lock() {
            queue.push(event);
        }
    }

    fn take(&self) -> Vec<ApiEvent> {
        self.0
            .lock()
            .map(|mut queue| std::mem::take(&mut *queue))
            .unwrap_or_default()
    }
}

/// Decoded realtime frames waiting for [`process_server_events`]
#[derive(Resource, Default, Clone)]
pub struct PendingServerEvents(pub Arc<Mutex<Vec<ServerEvent>>>);

/// Fetch `url` in the background and queue the result
fn spawn_get<T, F>(api: &ApiClient, url: String, pending: &PendingApi, what: &'static str, wrap: F)
where
    T: serde::de::DeserializeOwned + 'static,
    F: FnOnce(T) -> ApiEvent + 'static,
{
    #[cfg(target_arch = "wasm32")]
    {
        let api = api.clone();
        let pending = pending.clone();
        wasm_bindgen_futures::spawn_local(async move {
            tracing::debug!(url = %url, what, "Fetching");
            let event = match api.get_json::<T>(&url).await {
                Ok(value) => wrap(value),
                Err(error) => {
                    tracing::warn!(url = %url, error = %error, "Failed to fetch {}", what);
                    ApiEvent::Failed { what, error }
                }
            };
            pending.push(event);
        });
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        let _ = (api, pending, wrap);
        tracing::info!(url = %url, what, "REST not available in native mode");
    }
}

pub fn request_motion_files(api: &ApiClient, patient: UserId, pending: &PendingApi) {
    spawn_get(api, api.motion_files_url(patient), pending, "motion files", ApiEvent::MotionFiles);
}

pub fn request_motion_files_after(api: &ApiClient, patient: UserId, day: NaiveDate, pending: &PendingApi) {
    spawn_get(
        api,
        api.motion_files_after_url(patient, day),
        pending,
        "new motion files",
        ApiEvent::NewerMotionFiles,
    );
}

pub fn request_motion_file(api: &ApiClient, id: MotionFileId, pending: &PendingApi) {
    spawn_get(api, api.motion_file_url(id), pending, "motion file", ApiEvent::MotionFile);
}

pub fn request_storage_token(api: &ApiClient, container: &str, pending: &PendingApi) {
    spawn_get(
        api,
        api.storage_token_url(container),
        pending,
        "storage token",
        |response: StorageTokenResponse| ApiEvent::StorageToken(AccessToken::new(response.token)),
    );
}

pub fn request_history(api: &ApiClient, ticket: HistoryTicket, pending: &PendingApi) {
    spawn_get(
        api,
        api.chat_messages_url(ticket.conversation),
        pending,
        "chat history",
        move |messages| ApiEvent::History { ticket, messages },
    );
}

/// Model bytes over gloo-net. Storage URLs carry their own token, so no auth header.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlooFetcher;

impl AssetFetcher for GlooFetcher {
    #[cfg(target_arch = "wasm32")]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = gloo_net::http::Request::get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        if !response.ok() {
            return Err(FetchError::Status {
                status: response.status(),
            });
        }
        response
            .binary()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))
    }

    #[cfg(not(target_arch = "wasm32"))]
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::Network("fetch not available in native mode".to_string()))
    }
}

/// Outbound half of the realtime channel on a browser WebSocket.
///
/// Events emitted while the socket is still connecting are held and flushed
/// from `onopen`.
pub struct WebSocketTransport {
    #[cfg(target_arch = "wasm32")]
    socket: web_sys::WebSocket,
    #[cfg(target_arch = "wasm32")]
    outbox: std::rc::Rc<std::cell::RefCell<Vec<String>>>,
}

impl WebSocketTransport {
    #[cfg(target_arch = "wasm32")]
    pub fn connect(url: &str, inbound: PendingServerEvents) -> Result<Self, TransportError> {
        use std::cell::RefCell;
        use std::rc::Rc;
        use wasm_bindgen::prelude::*;
        use web_sys::{CloseEvent, MessageEvent, WebSocket};

        tracing::info!(url = %url, "Connecting realtime channel");
        let socket = WebSocket::new(url).map_err(|e| TransportError::Send(format!("{:?}", e)))?;
        let outbox: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

        let onopen = {
            let socket = socket.clone();
            let outbox = outbox.clone();
            Closure::wrap(Box::new(move |_| {
                let queued = std::mem::take(&mut *outbox.borrow_mut());
                tracing::info!(queued = queued.len(), "Realtime channel connected");
                for frame in queued {
                    if let Err(e) = socket.send_with_str(&frame) {
                        tracing::warn!("Failed to flush realtime event: {:?}", e);
                    }
                }
            }) as Box<dyn FnMut(JsValue)>)
        };
        socket.set_onopen(Some(onopen.as_ref().unchecked_ref()));
        onopen.forget();

        let onmessage = Closure::wrap(Box::new(move |e: MessageEvent| {
            if let Ok(text) = e.data().dyn_into::<js_sys::JsString>() {
                let text: String = text.into();
                if let Some(event) = decode_server_event(&text) {
                    if let Ok(mut queue) = inbound.0.lock() {
                        queue.push(event);
                    }
                }
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        socket.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
        onmessage.forget();

        let onclose = Closure::wrap(Box::new(move |e: CloseEvent| {
            tracing::warn!(code = e.code(), reason = %e.reason(), "Realtime channel closed");
        }) as Box<dyn FnMut(CloseEvent)>);
        socket.set_onclose(Some(onclose.as_ref().unchecked_ref()));
        onclose.forget();

        Ok(Self { socket, outbox })
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn connect(url: &str, _inbound: PendingServerEvents) -> Result<Self, TransportError> {
        tracing::info!(url = %url, "WebSocket not available in native mode");
        Err(TransportError::Disconnected)
    }
}

impl RealtimeTransport for WebSocketTransport {
    fn emit(&mut self, event: ClientEvent) -> Result<(), TransportError> {
        let frame = encode_event(&event)?;

        #[cfg(target_arch = "wasm32")]
        {
            use web_sys::WebSocket;
            match self.socket.ready_state() {
                WebSocket::CONNECTING => {
                    self.outbox.borrow_mut().push(frame);
                    Ok(())
                }
                WebSocket::OPEN => self
                    .socket
                    .send_with_str(&frame)
                    .map_err(|e| TransportError::Send(format!("{:?}", e))),
                _ => Err(TransportError::Disconnected),
            }
        }

        #[cfg(not(target_arch = "wasm32"))]
        {
            let _ = frame;
            Err(TransportError::Disconnected)
        }
    }
}

#[cfg(target_arch = "wasm32")]
impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        let _ = self.socket.close();
    }
}

pub fn encode_event(event: &ClientEvent) -> Result<String, TransportError> {
    Ok(serde_json::to_string(event)?)
}

/// Decode one realtime frame; unknown events are ignored
pub fn decode_server_event(text: &str) -> Option<ServerEvent> {
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unrecognised realtime frame");
            None
        }
    }
}

fn request_initial_data(
    api: Res<ApiClient>,
    session: Res<PortalSession>,
    settings: Res<PortalSettings>,
    pending: Res<PendingApi>,
) {
    request_storage_token(&api, &settings.0.backend.motion_container, &pending);
    if let Some(patient) = session.patient {
        request_motion_files(&api, patient, &pending);
    }
    if let Some(file) = session.initial_file {
        request_motion_file(&api, file, &pending);
    }
}

/// Open the realtime channel and the inbox for the session's conversation
fn connect_realtime(world: &mut World) {
    let Some(session) = world.get_resource::<PortalSession>().cloned() else {
        return;
    };
    let (Some(identity), Some(conversation)) = (session.identity, session.conversation) else {
        tracing::info!("No conversation for this session, messaging disabled");
        return;
    };
    let Some(config) = world.get_resource::<PortalSettings>().map(|s| s.0.clone()) else {
        return;
    };
    let inbound = world.resource::<PendingServerEvents>().clone();

    let transport = match WebSocketTransport::connect(&config.backend.ws_url, inbound) {
        Ok(transport) => transport,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open realtime channel");
            world
                .resource_mut::<Notices>()
                .push(NoticeLevel::Error, "Messaging is unavailable");
            return;
        }
    };

    let mut inbox = Inbox::new(
        identity,
        transport,
        LocalStorageStore,
        config.messaging.retention_policy(),
    );
    inbox.prune_read_state(Utc::now());
    let badge = inbox.subscribe_unread();
    if let Some(ticket) = inbox.open(conversation) {
        let api = world.resource::<ApiClient>().clone();
        let pending = world.resource::<PendingApi>().clone();
        request_history(&api, ticket, &pending);
    }

    world.insert_resource(UnreadBadge(badge));
    world.insert_non_send_resource(PortalInbox(inbox));
}

fn process_api_events(
    pending: Res<PendingApi>,
    mut catalog: ResMut<Catalog>,
    mut storage_token: ResMut<StorageToken>,
    mut notices: ResMut<Notices>,
    mut inbox: Option<NonSendMut<PortalInbox>>,
) {
    let events = pending.take();
    if events.is_empty() {
        return;
    }

    for event in events {
        match event {
            ApiEvent::MotionFiles(files) => {
                tracing::info!(count = files.len(), "Motion files loaded");
                catalog.0.replace(files);
            }
            ApiEvent::NewerMotionFiles(files) => {
                let added = files.into_iter().filter(|f| catalog.0.insert(f.clone())).count();
                if added > 0 {
                    notices.push(NoticeLevel::Info, format!("{} new motion file(s)", added));
                }
            }
            ApiEvent::MotionFile(file) => {
                let id = file.id;
                catalog.0.insert(file);
                if let Err(e) = catalog.0.select(id) {
                    tracing::warn!(error = %e, "Failed to preselect motion file");
                }
            }
            ApiEvent::StorageToken(token) => {
                tracing::debug!("Storage token received");
                storage_token.0 = Some(token);
            }
            ApiEvent::History { ticket, messages } => {
                let Some(inbox) = inbox.as_mut() else {
                    continue;
                };
                let count = messages.len();
                match inbox.0.apply_history(ticket, messages) {
                    HistoryOutcome::Applied { reappended } => {
                        tracing::info!(count, reappended, "Chat history loaded")
                    }
                    HistoryOutcome::Stale => {
                        tracing::debug!(conversation = %ticket.conversation, "Dropped stale chat history")
                    }
                }
            }
            ApiEvent::Failed { what, error } => {
                let level = match &error {
                    ApiError::Status { status: 401 | 403, .. } => NoticeLevel::Error,
                    _ => NoticeLevel::Warning,
                };
                notices.push(level, format!("Could not load {}: {}", what, error));
            }
        }
    }
}

fn process_server_events(
    pending: Res<PendingServerEvents>,
    session: Res<PortalSession>,
    mut catalog: ResMut<Catalog>,
    mut notices: ResMut<Notices>,
    mut inbox: Option<NonSendMut<PortalInbox>>,
) {
    let events = pending
        .0
        .lock()
        .map(|mut queue| std::mem::take(&mut *queue))
        .unwrap_or_default();
    if events.is_empty() {
        return;
    }

    for event in events {
        match event {
            ServerEvent::Message(pushed) => {
                if let Some(inbox) = inbox.as_mut() {
                    let id = pushed.id;
                    let delivery = inbox.0.receive(pushed);
                    tracing::debug!(message = %id, ?delivery, "Realtime message");
                }
            }
            ServerEvent::NewFile(file) => {
                let ours = match (file.patient_id, session.patient) {
                    (Some(owner), Some(patient)) => owner == patient,
                    _ => true,
                };
                if ours && catalog.0.insert(file.clone()) {
                    notices.push(NoticeLevel::Info, format!("New motion file: {}", file.name));
                }
            }
            ServerEvent::Wait { message } => notices.push(NoticeLevel::Warning, message),
            ServerEvent::Relogin { message } => notices.push(NoticeLevel::Error, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motus_core::message::OutgoingMessage;

    fn client() -> ApiClient {
        ApiClient::new("https://portal.example/", AccessToken::new("secret"))
    }

    #[test]
    fn test_parse_query_param() {
        assert_eq!(
            parse_query_param("?backend=https%3A%2F%2Fapi.example&user=4", "backend"),
            Some("https://api.example".to_string())
        );
        assert_eq!(parse_query_param("?user=4", "user"), Some("4".to_string()));
        assert_eq!(parse_query_param("?user=4", "role"), None);
        assert_eq!(parse_query_param("", "user"), None);
    }

    #[test]
    fn test_rest_routes() {
        let api = client();
        let conversation = ConversationId::new(UserId(7), UserId(3));
        assert_eq!(
            api.motion_files_url(UserId(7)),
            "https://portal.example/motion_files/patient/7"
        );
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(
            api.motion_files_after_url(UserId(7), day),
            "https://portal.example/motion_files/patient/7/after/2024-05-01"
        );
        assert_eq!(api.motion_file_url(MotionFileId(12)), "https://portal.example/motion_files/12");
        assert_eq!(
            api.chat_messages_url(conversation),
            "https://portal.example/chat_messages/7/3"
        );
        assert_eq!(
            api.storage_token_url("motion-files"),
            "https://portal.example/sas_token/motion-files"
        );
    }

    #[test]
    fn test_encode_client_events() {
        let conversation = ConversationId::new(UserId(7), UserId(3));
        let join: serde_json::Value =
            serde_json::from_str(&encode_event(&ClientEvent::Join(conversation)).unwrap()).unwrap();
        assert_eq!(join["event"], "join");
        assert_eq!(join["data"]["patient_id"], 7);
        assert_eq!(join["data"]["physician_id"], 3);

        let message = ClientEvent::Message(OutgoingMessage::new(conversation, UserId(7), "hello"));
        let sent: serde_json::Value = serde_json::from_str(&encode_event(&message).unwrap()).unwrap();
        assert_eq!(sent["event"], "message");
        assert_eq!(sent["data"]["content"], "hello");
        assert_eq!(sent["data"]["sender"], 7);
    }

    #[test]
    fn test_decode_server_events() {
        let pushed = decode_server_event(
            r#"{"event":"message","data":{"patient_id":7,"physician_id":3,"id":41,"sender":3,"content":"hi","timestamp":"2024-05-01T10:00:00Z"}}"#,
        );
        match pushed {
            Some(ServerEvent::Message(message)) => {
                assert_eq!(message.conversation(), ConversationId::new(UserId(7), UserId(3)));
                assert_eq!(message.content, "hi");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let file = decode_server_event(
            r#"{"event":"new_file","data":{"id":12,"name":"walk.glb","url":"https://blob.example/walk.glb","type":"gltf","createdAt":"2024-05-01T10:00:00Z","patient_id":7}}"#,
        );
        assert!(matches!(file, Some(ServerEvent::NewFile(f)) if f.id == MotionFileId(12)));

        assert!(decode_server_event(r#"{"event":"typing","data":{}}"#).is_none());
        assert!(decode_server_event("not json").is_none());
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_native_transport_is_disconnected() {
        let result = WebSocketTransport::connect("ws://localhost/ws", PendingServerEvents::default());
        assert!(matches!(result, Err(TransportError::Disconnected)));
    }

    #[test]
    fn test_pending_api_drains_in_order() {
        let pending = PendingApi::default();
        pending.push(ApiEvent::StorageToken(AccessToken::new("a")));
        pending.push(ApiEvent::MotionFiles(Vec::new()));
        let events = pending.take();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ApiEvent::StorageToken(_)));
        assert!(pending.take().is_empty());
    }
}
