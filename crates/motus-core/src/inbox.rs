//! Messages tab state: the synchronizer, the read-state tracker and the unread badge

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::identity::Identity;
use crate::message::{ConversationId, Message, PushedMessage};
use crate::read_state::{ReadStateTracker, RetentionPolicy};
use crate::store::KeyValueStore;
use crate::sync::{Delivery, HistoryOutcome, HistoryTicket, MessageSynchronizer, RealtimeTransport, SyncError};

/// Unread messages in the open conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnreadCount {
    pub conversation: Option<ConversationId>,
    pub count: usize,
}

pub struct Inbox<T: RealtimeTransport, S: KeyValueStore> {
    identity: Identity,
    sync: MessageSynchronizer<T>,
    read_state: ReadStateTracker<S>,
    tab_active: bool,
    unread_tx: watch::Sender<UnreadCount>,
}

impl<T: RealtimeTransport, S: KeyValueStore> Inbox<T, S> {
    pub fn new(identity: Identity, transport: T, store: S, policy: RetentionPolicy) -> Self {
        let (unread_tx, _) = watch::channel(UnreadCount::default());
        Self {
            identity,
            sync: MessageSynchronizer::new(transport),
            read_state: ReadStateTracker::load(store, identity, policy),
            tab_active: false,
            unread_tx,
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn synchronizer(&self) -> &MessageSynchronizer<T> {
        &self.sync
    }

    pub fn synchronizer_mut(&mut self) -> &mut MessageSynchronizer<T> {
        &mut self.sync
    }

    pub fn timeline(&self) -> &[Message] {
        self.sync.timeline()
    }

    pub fn is_unread(&self, message: &Message) -> bool {
        self.read_state.is_unread(message)
    }

    pub fn unread_count(&self) -> usize {
        self.read_state.unread_count(self.sync.timeline())
    }

    pub fn is_messages_tab_active(&self) -> bool {
        self.tab_active
    }

    /// Observe the unread badge
    pub fn subscribe_unread(&self) -> watch::Receiver<UnreadCount> {
        self.unread_tx.subscribe()
    }

    pub fn open(&mut self, conversation: ConversationId) -> Option<HistoryTicket> {
        let ticket = self.sync.open(conversation);
        if ticket.is_some() {
            self.publish();
        }
        ticket
    }

    pub fn close(&mut self) {
        self.sync.close();
        self.publish();
    }

    /// Merge fetched history; marks it read only if the messages tab is showing
    pub fn apply_history(
        &mut self,
        ticket: HistoryTicket,
        history: Vec<Message>,
    ) -> HistoryOutcome {
        let outcome = self.sync.apply_history(ticket, history);
        if matches!(outcome, HistoryOutcome::Applied { .. }) {
            if self.tab_active {
                self.mark_all_read();
            }
            self.publish();
        }
        outcome
    }

    pub fn receive(&mut self, pushed: PushedMessage) -> Delivery {
        let (conversation, message) = pushed.into_parts();
        let delivery = self.sync.receive(conversation, message);
        if delivery == Delivery::Appended {
            if self.tab_active {
                self.mark_latest_read();
            }
            self.publish();
        }
        delivery
    }

    /// Switching to the messages tab marks everything loaded as read
    pub fn set_messages_tab_active(&mut self, active: bool) {
        if self.tab_active == active {
            return;
        }
        self.tab_active = active;
        debug!(active, "Messages tab toggled");
        if active {
            self.mark_all_read();
            self.publish();
        }
    }

    pub fn send(&mut self, content: &str) -> Result<(), SyncError> {
        self.sync.send(self.identity.user_id, content)
    }

    /// Apply the read-state retention policy
    pub fn prune_read_state(&mut self, now: DateTime<Utc>) {
        if let Err(e) = self.read_state.prune(now) {
            warn!(error = %e, "Failed to persist pruned read-state");
        }
    }

    fn mark_all_read(&mut self) {
        if let Err(e) = self.read_state.mark_read(self.sync.timeline()) {
            warn!(error = %e, "Failed to persist read-state");
        }
    }

    /// The message just appended is last in arrival order
    fn mark_latest_read(&mut self) {
        if let Err(e) = self.read_state.mark_read(self.sync.timeline().last()) {
            warn!(error = %e, "Failed to persist read-state");
        }
    }

    fn publish(&self) {
        let next = UnreadCount {
            conversation: self.sync.active(),
            count: self.unread_count(),
        };
        self.unread_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
