use crate::state::{CallMode, MessageKind};

/// User intents. The UI dispatches these; all state changes happen on the app
/// actor thread.
#[derive(Debug, Clone)]
pub enum AppAction {
    // Lifecycle
    Start,
    Foregrounded,

    // Chat session
    OpenChat {
        chat_id: String,
    },
    CloseChat,
    SendMessage {
        chat_id: String,
        content: String,
        kind: MessageKind,
    },
    ResendMessage {
        chat_id: String,
        message_id: String,
    },
    ToggleReaction {
        chat_id: String,
        message_id: String,
        emoji: String,
    },
    LoadReactionDetails {
        chat_id: String,
        message_id: String,
    },
    DeleteMessage {
        chat_id: String,
        message_id: String,
    },
    SetReplyTo {
        chat_id: String,
        message_id: String,
    },
    ClearReply,
    TypingStarted {
        chat_id: String,
    },
    LoadOlderMessages {
        chat_id: String,
        limit: u32,
    },

    // Calls
    StartCall {
        chat_id: String,
    },
    JoinCall {
        chat_id: String,
    },
    AcceptCall,
    RejectCall,
    EndCall,
    ToggleMute,
    ToggleSpeakerphone,
    SetCallMode {
        mode: CallMode,
    },

    // Chat list prefs
    SetChatPinned {
        chat_id: String,
        pinned: bool,
    },
    SetChatHidden {
        chat_id: String,
        hidden: bool,
    },

    // UI
    ClearToast,
}

impl AppAction {
    /// Log-safe action tag (message contents never hit the logs).
    pub fn tag(&self) -> &'static str {
        match self {
            AppAction::Start => "Start",
            AppAction::Foregrounded => "Foregrounded",
            AppAction::OpenChat { .. } => "OpenChat",
            AppAction::CloseChat => "CloseChat",
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::ResendMessage { .. } => "ResendMessage",
            AppAction::ToggleReaction { .. } => "ToggleReaction",
            AppAction::LoadReactionDetails { .. } => "LoadReactionDetails",
            AppAction::DeleteMessage { .. } => "DeleteMessage",
            AppAction::SetReplyTo { .. } => "SetReplyTo",
            AppAction::ClearReply => "ClearReply",
            AppAction::TypingStarted { .. } => "TypingStarted",
            AppAction::LoadOlderMessages { .. } => "LoadOlderMessages",
            AppAction::StartCall { .. } => "StartCall",
            AppAction::JoinCall { .. } => "JoinCall",
            AppAction::AcceptCall => "AcceptCall",
            AppAction::RejectCall => "RejectCall",
            AppAction::EndCall => "EndCall",
            AppAction::ToggleMute => "ToggleMute",
            AppAction::ToggleSpeakerphone => "ToggleSpeakerphone",
            AppAction::SetCallMode { .. } => "SetCallMode",
            AppAction::SetChatPinned { .. } => "SetChatPinned",
            AppAction::SetChatHidden { .. } => "SetChatHidden",
            AppAction::ClearToast => "ClearToast",
        }
    }
}
