//! Motus Core - Domain types, messaging synchronization, and read-state tracking
//!
//! This crate provides the host-independent parts of the Motus portal:
//! - Motion file descriptors and the catalog shown next to the viewer
//! - Chat messages and the realtime wire events that carry them
//! - Conversation timeline synchronization and unread tracking
//! - Key-value persistence, UI preferences, and configuration

pub mod catalog;
pub mod config;
pub mod identity;
pub mod inbox;
pub mod message;
pub mod motion_file;
pub mod preferences;
pub mod read_state;
pub mod store;
pub mod sync;

pub use catalog::{CatalogError, MotionCatalog, SortOrder};
pub use config::{load_config, ConfigError, PortalConfig, Rgb, ViewerSettings};
pub use identity::{AccessToken, Identity, Role, UserId};
pub use inbox::{Inbox, UnreadCount};
pub use message::{ClientEvent, ConversationId, Message, MessageId, PushedMessage, ServerEvent};
pub use motion_file::{MotionFile, MotionFileId};
pub use preferences::{ColorTheme, FontSize, PreferenceHub, UiPreferences};
pub use read_state::{ReadStateTracker, RetentionPolicy};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, StoreError};
pub use sync::{Delivery, HistoryTicket, MessageSynchronizer, RealtimeTransport, SyncError, TransportError};
