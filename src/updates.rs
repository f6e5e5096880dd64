use crate::media::MediaEvent;
use crate::rest::{CallSessionInfo, ChatRecord, MessageRecord};
use crate::state::{AppState, ReactionRecord, UserProfile};
use crate::transport::ChannelEvent;
use crate::AppAction;

#[derive(Clone, Debug)]
pub enum AppUpdate {
    /// Primary update stream: always a full state snapshot. Simplest possible
    /// reconciliation story for the shells; granular diffs can come later.
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

/// Async completions and timer ticks, marshaled back onto the actor queue.
/// Anything epoch/token-tagged is dropped when stale.
#[derive(Debug)]
pub enum InternalEvent {
    // Transport receive path
    ChannelEvent {
        chat_id: String,
        epoch: u64,
        event: ChannelEvent,
    },

    // REST completions
    ChatsFetched {
        chats: Vec<ChatRecord>,
        error: Option<String>,
    },
    HistoryFetched {
        chat_id: String,
        epoch: u64,
        messages: Vec<MessageRecord>,
        error: Option<String>,
    },
    OlderHistoryFetched {
        chat_id: String,
        epoch: u64,
        messages: Vec<MessageRecord>,
        error: Option<String>,
    },
    SendMessageResult {
        chat_id: String,
        client_temp_id: String,
        message: Option<MessageRecord>,
        error: Option<String>,
    },
    ReactionResult {
        chat_id: String,
        message_id: String,
        reactions: Option<Vec<ReactionRecord>>,
        error: Option<String>,
    },
    DeleteMessageResult {
        chat_id: String,
        message_id: String,
        error: Option<String>,
    },
    ProfilesFetched {
        message_id: String,
        profiles: Vec<UserProfile>,
    },

    // Timers
    TypingExpiryTick {
        chat_id: String,
        epoch: u64,
    },
    ToastAutoDismiss {
        token: u64,
    },
    CallDurationTick {
        token: u64,
    },
    CallConnectTimeout {
        token: u64,
    },

    // Call setup path
    MicPermission {
        granted: bool,
        token: u64,
    },
    CallSessionReady {
        token: u64,
        session: Option<CallSessionInfo>,
        error: Option<String>,
    },
    MediaEngineEvent {
        call_id: String,
        event: MediaEvent,
    },
}
