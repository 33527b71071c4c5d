//! Keeps the local timeline of one conversation in step with the realtime channel
//!
//! History (REST) and live pushes (realtime) race each other. The synchronizer
//! stamps every `open` with a generation so late history for a previous
//! conversation is dropped, and keeps the live messages that arrived before the
//! history so they survive the merge.

use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::identity::UserId;
use crate::message::{ClientEvent, ConversationId, Message, MessageId, OutgoingMessage};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("realtime channel is not connected")]
    Disconnected,
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("send failed: {0}")]
    Send(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("no conversation is open")]
    NoConversation,
    #[error("message content is empty")]
    EmptyMessage,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Outbound half of the realtime channel
pub trait RealtimeTransport {
    fn emit(&mut self, event: ClientEvent) -> Result<(), TransportError>;
}

/// Handed out by [`MessageSynchronizer::open`]; history fetched for it is only
/// applied if no other conversation was opened in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryTicket {
    pub conversation: ConversationId,
    pub generation: u64,
}

/// What happened to a live message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Appended,
    Duplicate,
    OtherConversation,
    NoConversation,
}

/// What happened to a history response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// Timeline replaced; `reappended` live messages were kept on top
    Applied { reappended: usize },
    Stale,
}

pub struct MessageSynchronizer<T: RealtimeTransport> {
    transport: T,
    active: Option<ConversationId>,
    generation: u64,
    timeline: Vec<Message>,
    ids: HashSet<MessageId>,
    /// Live messages received between `open` and `apply_history`
    early: Vec<Message>,
    history_loaded: bool,
}

impl<T: RealtimeTransport> MessageSynchronizer<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            active: None,
            generation: 0,
            timeline: Vec::new(),
            ids: HashSet::new(),
            early: Vec::new(),
            history_loaded: false,
        }
    }

    pub fn active(&self) -> Option<ConversationId> {
        self.active
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Messages of the active conversation in arrival order
    pub fn timeline(&self) -> &[Message] {
        &self.timeline
    }

    pub fn history_loaded(&self) -> bool {
        self.history_loaded
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Switch to `conversation`. Leaves the previous one before joining.
    /// Returns `None` when it is already the active conversation.
    pub fn open(&mut self, conversation: ConversationId) -> Option<HistoryTicket> {
        if self.active == Some(conversation) {
            return None;
        }

        if let Some(previous) = self.active.take() {
            self.emit(ClientEvent::Leave(previous));
        }
        self.reset_timeline();
        self.generation += 1;
        self.active = Some(conversation);
        self.emit(ClientEvent::Join(conversation));

        info!(conversation = %conversation, generation = self.generation, "Opened conversation");
        Some(HistoryTicket {
            conversation,
            generation: self.generation,
        })
    }

    /// Leave the active conversation, if any
    pub fn close(&mut self) {
        if let Some(previous) = self.active.take() {
            self.emit(ClientEvent::Leave(previous));
            self.reset_timeline();
            self.generation += 1;
            info!(conversation = %previous, "Closed conversation");
        }
    }

    /// Merge fetched history. Live messages that arrived after `open` and are
    /// missing from the history are appended after it, in arrival order.
    pub fn apply_history(&mut self, ticket: HistoryTicket, history: Vec<Message>) -> HistoryOutcome {
        if ticket.generation != self.generation || self.active != Some(ticket.conversation) {
            debug!(
                conversation = %ticket.conversation,
                generation = ticket.generation,
                current = self.generation,
                "Dropping stale history"
            );
            return HistoryOutcome::Stale;
        }

        self.timeline.clear();
        self.ids.clear();
        for message in history {
            if self.ids.insert(message.id) {
                self.timeline.push(message);
            }
        }

        let mut reappended = 0;
        for message in std::mem::take(&mut self.early) {
            if self.ids.insert(message.id) {
                self.timeline.push(message);
                reappended += 1;
            }
        }
        self.history_loaded = true;

        debug!(
            conversation = %ticket.conversation,
            messages = self.timeline.len(),
            reappended,
            "Applied history"
        );
        HistoryOutcome::Applied { reappended }
    }

    /// Accept a live message pushed for `conversation`
    pub fn receive(&mut self, conversation: ConversationId, message: Message) -> Delivery {
        let Some(active) = self.active else {
            return Delivery::NoConversation;
        };
        if active != conversation {
            debug!(conversation = %conversation, active = %active, "Ignoring message for another conversation");
            return Delivery::OtherConversation;
        }
        if !self.ids.insert(message.id) {
            return Delivery::Duplicate;
        }

        if !self.history_loaded {
            self.early.push(message.clone());
        }
        self.timeline.push(message);
        Delivery::Appended
    }

    /// Post `content` to the active conversation. The message shows up in the
    /// timeline once the backend echoes it back.
    pub fn send(&mut self, sender: UserId, content: &str) -> Result<(), SyncError> {
        let conversation = self.active.ok_or(SyncError::NoConversation)?;
        let content = content.trim();
        if content.is_empty() {
            return Err(SyncError::EmptyMessage);
        }

        self.transport
            .emit(ClientEvent::Message(OutgoingMessage::new(conversation, sender, content)))?;
        Ok(())
    }

    fn reset_timeline(&mut self) {
        self.timeline.clear();
        self.ids.clear();
        self.early.clear();
        self.history_loaded = false;
    }

    fn emit(&mut self, event: ClientEvent) {
        if let Err(e) = self.transport.emit(event) {
            warn!(error = %e, "Realtime emit failed");
        }
    }
}
