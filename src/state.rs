//! Published state snapshots. Everything here is immutable from the UI's point
//! of view: the app actor owns the authoritative copy and replaces the shared
//! snapshot wholesale on every emit.

use serde::{Deserialize, Serialize};

pub fn now_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Voice,
    Gif,
    SystemEvent,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageDeliveryState {
    Pending,
    Sent,
    Failed,
}

/// A single raw reaction as stored on a message. The (message, user, emoji)
/// triple is unique; re-sending the same emoji by the same user toggles it off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRecord {
    pub user_id: String,
    pub emoji: String,
    pub created_at: i64,
}

/// Shallow reference to the message being replied to. Carries just enough for
/// the quoted bubble; the full target message may not even be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub message_id: String,
    pub sender_name: String,
    pub kind: MessageKind,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub name: Option<String>,
    pub picture_url: Option<String>,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.user_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub content: String,
    pub kind: MessageKind,
    /// Server `created_at` once confirmed; local enqueue time while Pending.
    pub timestamp: i64,
    /// Present only while the message is unconfirmed.
    pub client_temp_id: Option<String>,
    pub delivery: MessageDeliveryState,
    pub edited: bool,
    pub reply_to: Option<ReplyPreview>,
    pub reactions: Vec<ReactionRecord>,
    /// Emoji-grouped view of `reactions`, first-occurrence order.
    pub reaction_groups: Vec<crate::reactions::ReactionGroup>,
    pub is_mine: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingMember {
    pub user_id: String,
    pub name: Option<String>,
    pub picture_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSummary {
    pub call_id: String,
    pub chat_id: String,
    pub started_by: String,
    pub participant_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_id: String,
    pub is_group: bool,
    pub display_name: String,
    pub member_ids: Vec<String>,
    pub last_message_preview: Option<String>,
    pub last_message_at: Option<i64>,
    pub unread_count: u32,
    pub active_call: Option<CallSummary>,
    pub pinned: bool,
    pub hidden: bool,
}

/// Reaction detail listing for one message: per-emoji, per-user attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionDetails {
    pub message_id: String,
    pub groups: Vec<crate::reactions::ReactionDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatViewState {
    pub chat_id: String,
    pub is_group: bool,
    pub display_name: String,
    pub members: Vec<UserProfile>,
    pub messages: Vec<ChatMessage>,
    pub typing_members: Vec<TypingMember>,
    /// Pre-formatted "{A} is typing..." line; empty when nobody is typing.
    pub typing_text: String,
    pub reply_to: Option<ReplyPreview>,
    pub reaction_details: Option<ReactionDetails>,
    pub can_load_older: bool,
    /// Set when the initial history load failed; cleared by a successful
    /// re-open. The UI retries by dispatching `OpenChat` again.
    pub load_error: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMode {
    Speaker,
    Listener,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    /// We started the call and are waiting for signaling to settle.
    Outgoing,
    /// Someone else started a call in a chat we are not viewing.
    Incoming,
    /// Attaching to an already-active session, skipping the ring phase.
    Joining,
    /// Media engine is establishing the audio path.
    Connecting,
    Connected,
    /// Terminal per call instance; the controller resets to Idle
    /// (`active_call = None`) after teardown.
    Ended { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallState {
    /// Channel token shared by all participants of this call instance.
    pub call_id: String,
    pub chat_id: String,
    pub started_by: String,
    pub participants: Vec<UserProfile>,
    pub mode: CallMode,
    pub status: CallStatus,
    pub started_at: Option<i64>,
    pub connected_at: Option<i64>,
    pub duration_secs: u32,
    pub muted: bool,
    pub speakerphone: bool,
}

impl CallState {
    pub fn set_status(&mut self, status: CallStatus) {
        self.status = status;
    }

    pub fn is_live(&self) -> bool {
        !matches!(self.status, CallStatus::Ended { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    /// Monotonic snapshot revision; lets reconcilers drop out-of-order updates.
    pub rev: u64,
    pub me: UserProfile,
    pub chat_list: Vec<ChatSummary>,
    pub current_chat: Option<ChatViewState>,
    /// `None` is the Idle state of the call machine.
    pub active_call: Option<CallState>,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty(me: UserProfile) -> Self {
        Self {
            rev: 0,
            me,
            chat_list: vec![],
            current_chat: None,
            active_call: None,
            toast: None,
        }
    }
}

/// Formats the typing indicator line.
///
/// Contract (names in insertion order):
///   0 -> ""
///   1 -> "{A} is typing..."
///   2 -> "{A} and {B} are typing..."
///   3 -> "{A}, {B}, and {C} are typing..."
///   4+ -> "{A}, {B}, and {N-2} others are typing..."
pub fn typing_text(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [a] => format!("{a} is typing..."),
        [a, b] => format!("{a} and {b} are typing..."),
        [a, b, c] => format!("{a}, {b}, and {c} are typing..."),
        [a, b, rest @ ..] => {
            format!("{a}, {b}, and {} others are typing...", rest.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::typing_text;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn typing_text_empty() {
        assert_eq!(typing_text(&[]), "");
    }

    #[test]
    fn typing_text_one() {
        assert_eq!(typing_text(&names(&["Ada"])), "Ada is typing...");
    }

    #[test]
    fn typing_text_two() {
        assert_eq!(
            typing_text(&names(&["Ada", "Brin"])),
            "Ada and Brin are typing..."
        );
    }

    #[test]
    fn typing_text_three() {
        assert_eq!(
            typing_text(&names(&["Ada", "Brin", "Cory"])),
            "Ada, Brin, and Cory are typing..."
        );
    }

    #[test]
    fn typing_text_five_collapses_to_others() {
        assert_eq!(
            typing_text(&names(&["A", "B", "C", "D", "E"])),
            "A, B, and 3 others are typing..."
        );
    }
}
