//! Push channel seam. One subscription per chat room; inbound `ChannelEvent`s
//! fan into the app actor, outbound `ClientSignal`s are fire-and-forget.
//!
//! Reconnect/backoff is the adapter's own concern; the core re-primes its
//! state when the UI re-dispatches `OpenChat`.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::rest::{CallSessionInfo, MessageRecord};
use crate::state::{CallMode, ReactionRecord, UserProfile};

/// Inbound events on a chat room channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChannelEvent {
    MessageNew {
        message: MessageRecord,
    },
    MessageDeleted {
        message_id: String,
    },
    /// Authoritative reaction list for one message after any toggle. Replaces
    /// whatever the client derived optimistically.
    MessageReaction {
        message_id: String,
        reactions: Vec<ReactionRecord>,
    },
    TypingStart {
        user: UserProfile,
    },
    TypingStop {
        user_id: String,
    },
    CallStarted {
        session: CallSessionInfo,
    },
    CallJoined {
        call_id: String,
        participant: UserProfile,
    },
    CallLeft {
        call_id: String,
        user_id: String,
    },
    CallEnded {
        call_id: String,
    },
    CallModeChanged {
        call_id: String,
        user_id: String,
        mode: CallMode,
    },
}

/// Outbound emits. Message sends and reaction toggles go over REST; the
/// channel only carries ephemeral signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientSignal {
    TypingStart,
    TypingStop,
    CallStart { call_id: String },
    CallJoin { call_id: String },
    CallLeave { call_id: String },
    CallMode { call_id: String, mode: CallMode },
}

pub trait ChatTransport: Send + Sync + 'static {
    /// Subscribes to a chat room. The returned receiver closes when the room
    /// is unsubscribed or the transport shuts down.
    fn subscribe(&self, chat_id: &str) -> anyhow::Result<flume::Receiver<ChannelEvent>>;

    fn unsubscribe(&self, chat_id: &str);

    /// Fire-and-forget; delivery is best-effort by design (a lost typing
    /// signal just expires on the receiving side).
    fn emit(&self, chat_id: &str, signal: ClientSignal) -> anyhow::Result<()>;
}

/// In-process transport: rooms are flume channels. Production builds wire a
/// websocket adapter from the shell; tests and the synthetic backend publish
/// into rooms directly.
#[derive(Default)]
pub struct InMemoryTransport {
    rooms: Mutex<HashMap<String, flume::Sender<ChannelEvent>>>,
    emitted: Mutex<Vec<(String, ClientSignal)>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server-side helper: deliver an event to a room's subscriber, if any.
    pub fn publish(&self, chat_id: &str, event: ChannelEvent) {
        let sender = self
            .rooms
            .lock()
            .expect("rooms lock")
            .get(chat_id)
            .cloned();
        if let Some(tx) = sender {
            let _ = tx.send(event);
        }
    }

    pub fn is_subscribed(&self, chat_id: &str) -> bool {
        self.rooms.lock().expect("rooms lock").contains_key(chat_id)
    }

    /// Outbound signals recorded in emit order.
    pub fn emitted(&self) -> Vec<(String, ClientSignal)> {
        self.emitted.lock().expect("emitted lock").clone()
    }
}

impl ChatTransport for InMemoryTransport {
    fn subscribe(&self, chat_id: &str) -> anyhow::Result<flume::Receiver<ChannelEvent>> {
        let (tx, rx) = flume::unbounded();
        // Re-subscribing replaces the previous room sender, closing the old
        // receiver's stream.
        self.rooms
            .lock()
            .expect("rooms lock")
            .insert(chat_id.to_string(), tx);
        Ok(rx)
    }

    fn unsubscribe(&self, chat_id: &str) {
        self.rooms.lock().expect("rooms lock").remove(chat_id);
    }

    fn emit(&self, chat_id: &str, signal: ClientSignal) -> anyhow::Result<()> {
        self.emitted
            .lock()
            .expect("emitted lock")
            .push((chat_id.to_string(), signal));
        Ok(())
    }
}
