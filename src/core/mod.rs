mod call_control;
mod config;
mod session;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use flume::Sender;
use serde::{Deserialize, Serialize};

use crate::actions::AppAction;
use crate::rest::ChatRecord;
use crate::state::{now_seconds, AppState, ChatSummary, TypingMember, UserProfile};
use crate::transport::ChannelEvent;
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};
use crate::Collaborators;

const TOAST_AUTO_DISMISS: Duration = Duration::from_secs(4);

/// One user currently typing in a chat. Entries keep insertion order so the
/// formatted indicator line is stable while people keep typing.
#[derive(Debug, Clone)]
struct TypingEntry {
    user_id: String,
    expires_at: i64,
}

/// Pinned/hidden chat id sets, persisted alongside the rest of the app data.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ChatListPrefs {
    pinned: HashSet<String>,
    hidden: HashSet<String>,
}

pub struct AppCore {
    pub state: AppState,
    rev: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    data_dir: String,
    config: config::CoreConfig,
    runtime: tokio::runtime::Runtime,

    collab: Collaborators,

    // Server chat index; `state.chat_list` is derived from it.
    chats: HashMap<String, ChatRecord>,
    unread_counts: HashMap<String, u32>,
    pinned_chats: HashSet<String>,
    hidden_chats: HashSet<String>,

    // Room subscriptions are app-wide (list-level signals need every room);
    // the attached chat session layers full ingestion on top.
    transport_epoch: u64,
    session: Option<session::ChatSession>,
    chat_epoch: u64,

    // chat_id -> ordered typing entries. Purely in-memory.
    typing_state: HashMap<String, Vec<TypingEntry>>,
    // Timestamp of the last typing signal *we* emitted per chat, to debounce.
    last_typing_sent: HashMap<String, i64>,

    // user_id -> profile, filled from chat members and typing events.
    profiles: HashMap<String, UserProfile>,

    // Call machine bookkeeping (see call_control).
    pending_call_action: Option<call_control::PendingCallAction>,
    mic_permission_token: u64,
    call_setup_token: u64,
    call_connect_timeout_token: u64,
    call_duration_tick_token: u64,
    media_pump_started: bool,

    toast_dismiss_token: u64,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        me: UserProfile,
        collab: Collaborators,
        shared_state: Arc<RwLock<AppState>>,
    ) -> Self {
        let config = config::load_core_config(&data_dir);
        let state = AppState::empty(me);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let mut this = Self {
            state,
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            data_dir,
            config,
            runtime,
            collab,
            chats: HashMap::new(),
            unread_counts: HashMap::new(),
            pinned_chats: HashSet::new(),
            hidden_chats: HashSet::new(),
            transport_epoch: 0,
            session: None,
            chat_epoch: 0,
            typing_state: HashMap::new(),
            last_typing_sent: HashMap::new(),
            profiles: HashMap::new(),
            pending_call_action: None,
            mic_permission_token: 0,
            call_setup_token: 0,
            call_connect_timeout_token: 0,
            call_duration_tick_token: 0,
            media_pump_started: false,
            toast_dismiss_token: 0,
        };

        // Ensure the facade has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                // Never log `?action` directly: message contents stay out of logs.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            AppAction::Start => {
                self.load_prefs();
                self.fetch_chats();
            }
            AppAction::Foregrounded => {
                self.fetch_chats();
            }
            AppAction::OpenChat { chat_id } => self.open_chat(&chat_id),
            AppAction::CloseChat => self.close_chat(),
            AppAction::SendMessage {
                chat_id,
                content,
                kind,
            } => self.send_message(&chat_id, content, kind),
            AppAction::ResendMessage {
                chat_id,
                message_id,
            } => self.resend_message(&chat_id, &message_id),
            AppAction::ToggleReaction {
                chat_id,
                message_id,
                emoji,
            } => self.toggle_reaction(&chat_id, &message_id, &emoji),
            AppAction::LoadReactionDetails {
                chat_id,
                message_id,
            } => self.load_reaction_details(&chat_id, &message_id),
            AppAction::DeleteMessage {
                chat_id,
                message_id,
            } => self.delete_message(&chat_id, &message_id),
            AppAction::SetReplyTo {
                chat_id,
                message_id,
            } => self.set_reply_to(&chat_id, &message_id),
            AppAction::ClearReply => self.clear_reply(),
            AppAction::TypingStarted { chat_id } => self.typing_started(&chat_id),
            AppAction::LoadOlderMessages { chat_id, limit } => {
                self.load_older_messages(&chat_id, limit as usize)
            }
            AppAction::StartCall { chat_id } => self.handle_start_call_action(&chat_id),
            AppAction::JoinCall { chat_id } => self.handle_join_call_action(&chat_id),
            AppAction::AcceptCall => self.handle_accept_call_action(),
            AppAction::RejectCall => self.handle_reject_call_action(),
            AppAction::EndCall => self.handle_end_call_action(),
            AppAction::ToggleMute => self.handle_toggle_mute_action(),
            AppAction::ToggleSpeakerphone => self.handle_toggle_speakerphone_action(),
            AppAction::SetCallMode { mode } => self.handle_set_call_mode_action(mode),
            AppAction::SetChatPinned { chat_id, pinned } => {
                if pinned {
                    self.pinned_chats.insert(chat_id);
                } else {
                    self.pinned_chats.remove(&chat_id);
                }
                self.save_prefs();
                self.refresh_chat_list();
            }
            AppAction::SetChatHidden { chat_id, hidden } => {
                if hidden {
                    self.hidden_chats.insert(chat_id);
                } else {
                    self.hidden_chats.remove(&chat_id);
                }
                self.save_prefs();
                self.refresh_chat_list();
            }
            AppAction::ClearToast => {
                if self.state.toast.is_some() {
                    self.state.toast = None;
                    self.emit_state();
                }
            }
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::ChannelEvent {
                chat_id,
                epoch,
                event,
            } => self.handle_channel_event(&chat_id, epoch, event),
            InternalEvent::ChatsFetched { chats, error } => {
                self.handle_chats_fetched(chats, error)
            }
            InternalEvent::HistoryFetched {
                chat_id,
                epoch,
                messages,
                error,
            } => self.handle_history_fetched(&chat_id, epoch, messages, error),
            InternalEvent::OlderHistoryFetched {
                chat_id,
                epoch,
                messages,
                error,
            } => self.handle_older_history_fetched(&chat_id, epoch, messages, error),
            InternalEvent::SendMessageResult {
                chat_id,
                client_temp_id,
                message,
                error,
            } => self.handle_send_message_result(&chat_id, &client_temp_id, message, error),
            InternalEvent::ReactionResult {
                chat_id,
                message_id,
                reactions,
                error,
            } => self.handle_reaction_result(&chat_id, &message_id, reactions, error),
            InternalEvent::DeleteMessageResult {
                chat_id,
                message_id,
                error,
            } => self.handle_delete_message_result(&chat_id, &message_id, error),
            InternalEvent::ProfilesFetched {
                message_id,
                profiles,
            } => self.handle_profiles_fetched(&message_id, profiles),
            InternalEvent::TypingExpiryTick { chat_id, epoch } => {
                self.handle_typing_expiry_tick(&chat_id, epoch)
            }
            InternalEvent::ToastAutoDismiss { token } => self.handle_toast_auto_dismiss(token),
            InternalEvent::CallDurationTick { token } => self.handle_call_duration_tick(token),
            InternalEvent::CallConnectTimeout { token } => self.handle_call_connect_timeout(token),
            InternalEvent::MicPermission { granted, token } => {
                self.handle_mic_permission(granted, token)
            }
            InternalEvent::CallSessionReady {
                token,
                session,
                error,
            } => self.handle_call_session_ready(token, session, error),
            InternalEvent::MediaEngineEvent { call_id, event } => {
                self.handle_media_engine_event(&call_id, event)
            }
        }
    }

    // ---- Transport routing ----------------------------------------------

    fn handle_channel_event(&mut self, chat_id: &str, epoch: u64, event: ChannelEvent) {
        // Stale subscription generation (resubscribe raced the event).
        if epoch != self.transport_epoch {
            return;
        }
        match event {
            ChannelEvent::MessageNew { message } => self.handle_message_new(chat_id, message),
            ChannelEvent::MessageDeleted { message_id } => {
                self.handle_message_deleted_event(chat_id, &message_id)
            }
            ChannelEvent::MessageReaction {
                message_id,
                reactions,
            } => self.handle_reaction_echo(chat_id, &message_id, reactions),
            ChannelEvent::TypingStart { user } => self.handle_typing_start_event(chat_id, user),
            ChannelEvent::TypingStop { user_id } => {
                self.handle_typing_stop_event(chat_id, &user_id)
            }
            ChannelEvent::CallStarted { session } => {
                self.handle_call_started_event(chat_id, session)
            }
            ChannelEvent::CallJoined {
                call_id,
                participant,
            } => self.handle_call_joined_event(chat_id, &call_id, participant),
            ChannelEvent::CallLeft { call_id, user_id } => {
                self.handle_call_left_event(chat_id, &call_id, &user_id)
            }
            ChannelEvent::CallEnded { call_id } => self.handle_call_ended_event(chat_id, &call_id),
            ChannelEvent::CallModeChanged {
                call_id,
                user_id,
                mode,
            } => {
                tracing::debug!(%call_id, %user_id, ?mode, "participant mode changed");
            }
        }
    }

    // ---- Chat list ------------------------------------------------------

    fn fetch_chats(&mut self) {
        let rest = self.collab.rest.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let (chats, error) = match rest.fetch_chats().await {
                Ok(chats) => (chats, None),
                Err(e) => (vec![], Some(e.user_message())),
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ChatsFetched {
                chats,
                error,
            })));
        });
    }

    fn handle_chats_fetched(&mut self, chats: Vec<ChatRecord>, error: Option<String>) {
        if let Some(err) = error {
            tracing::warn!(%err, "chat list fetch failed");
            self.toast(err);
            return;
        }
        let previous: HashSet<String> = self.chats.keys().cloned().collect();
        self.chats.clear();
        for chat in chats {
            for member in &chat.members {
                self.remember_profile(member.clone());
            }
            if chat.unread_count > 0 {
                self.unread_counts
                    .entry(chat.id.clone())
                    .or_insert(chat.unread_count);
            }
            self.chats.insert(chat.id.clone(), chat);
        }
        // Rooms for chats the server no longer lists are released at the
        // adapter; their transient state goes with them.
        for stale in previous {
            if !self.chats.contains_key(&stale) {
                self.collab.transport.unsubscribe(&stale);
                self.typing_state.remove(&stale);
                self.unread_counts.remove(&stale);
            }
        }
        self.resubscribe_all();
        self.refresh_chat_list();
    }

    fn refresh_chat_list(&mut self) {
        let me = self.state.me.user_id.clone();
        let mut list: Vec<ChatSummary> = self
            .chats
            .values()
            .map(|c| {
                let display_name = chat_display_name(c, &me);
                ChatSummary {
                    chat_id: c.id.clone(),
                    is_group: c.is_group,
                    display_name,
                    member_ids: c.members.iter().map(|m| m.user_id.clone()).collect(),
                    last_message_preview: c.last_message_preview.clone(),
                    last_message_at: c.last_message_at,
                    unread_count: *self.unread_counts.get(&c.id).unwrap_or(&0),
                    active_call: c.active_call.as_ref().map(|s| s.summary()),
                    pinned: self.pinned_chats.contains(&c.id),
                    hidden: self.hidden_chats.contains(&c.id),
                }
            })
            .collect();
        list.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then_with(|| b.last_message_at.unwrap_or(0).cmp(&a.last_message_at.unwrap_or(0)))
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        self.state.chat_list = list;
        self.emit_state();
    }

    /// Re-subscribes every known chat room under a fresh epoch. Events tagged
    /// with an older epoch are dropped when they trickle in afterwards.
    fn resubscribe_all(&mut self) {
        self.transport_epoch = self.transport_epoch.wrapping_add(1);
        let epoch = self.transport_epoch;
        let chat_ids: Vec<String> = self.chats.keys().cloned().collect();
        for chat_id in chat_ids {
            self.subscribe_room(&chat_id, epoch);
        }
    }

    fn subscribe_room(&mut self, chat_id: &str, epoch: u64) {
        let rx = match self.collab.transport.subscribe(chat_id) {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(%chat_id, %e, "room subscribe failed");
                return;
            }
        };
        let tx = self.core_sender.clone();
        let chat = chat_id.to_string();
        self.runtime.spawn(async move {
            // Ends when the transport drops the room sender (unsubscribe,
            // resubscribe, or shutdown).
            while let Ok(event) = rx.recv_async().await {
                let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ChannelEvent {
                    chat_id: chat.clone(),
                    epoch,
                    event,
                })));
            }
        });
    }

    // ---- Typing liveness ------------------------------------------------

    fn handle_typing_start_event(&mut self, chat_id: &str, user: UserProfile) {
        if user.user_id == self.state.me.user_id {
            return;
        }
        let expires_at = now_seconds() + self.config.typing_expiry_secs;
        self.remember_profile(user.clone());
        self.update_typing(chat_id, &user.user_id, expires_at);
        self.schedule_typing_expiry(chat_id);
        self.refresh_typing_view(chat_id);
    }

    fn handle_typing_stop_event(&mut self, chat_id: &str, user_id: &str) {
        self.update_typing(chat_id, user_id, 0);
        self.refresh_typing_view(chat_id);
    }

    /// Record that `user_id` is typing in `chat_id` until `expires_at`.
    /// `expires_at <= now` clears the entry (explicit stop, or a real message
    /// from that sender).
    fn update_typing(&mut self, chat_id: &str, user_id: &str, expires_at: i64) {
        let entries = self.typing_state.entry(chat_id.to_string()).or_default();
        if expires_at <= now_seconds() {
            entries.retain(|e| e.user_id != user_id);
            return;
        }
        match entries.iter_mut().find(|e| e.user_id == user_id) {
            // Heartbeat refresh keeps the original position.
            Some(entry) => entry.expires_at = expires_at,
            None => entries.push(TypingEntry {
                user_id: user_id.to_string(),
                expires_at,
            }),
        }
    }

    /// Members currently typing in `chat_id`, pruning expired entries.
    fn get_active_typers(&mut self, chat_id: &str) -> Vec<TypingMember> {
        let now = now_seconds();
        let Some(entries) = self.typing_state.get_mut(chat_id) else {
            return vec![];
        };
        entries.retain(|e| e.expires_at > now);
        entries
            .iter()
            .map(|e| {
                let profile = self.profiles.get(&e.user_id);
                TypingMember {
                    user_id: e.user_id.clone(),
                    name: profile.and_then(|p| p.name.clone()),
                    picture_url: profile.and_then(|p| p.picture_url.clone()),
                }
            })
            .collect()
    }

    /// Liveness, not just event-driven cleanup: a typist whose heartbeats stop
    /// is dropped without an explicit typing:stop.
    fn schedule_typing_expiry(&mut self, chat_id: &str) {
        let epoch = self.transport_epoch;
        let tx = self.core_sender.clone();
        let chat = chat_id.to_string();
        let delay = Duration::from_secs(self.config.typing_expiry_secs.max(1) as u64 + 1);
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::TypingExpiryTick {
                    chat_id: chat,
                    epoch,
                },
            )));
        });
    }

    fn handle_typing_expiry_tick(&mut self, chat_id: &str, epoch: u64) {
        if epoch != self.transport_epoch {
            return;
        }
        self.refresh_typing_view(chat_id);
    }

    fn refresh_typing_view(&mut self, chat_id: &str) {
        let is_open = self
            .state
            .current_chat
            .as_ref()
            .map(|c| c.chat_id == chat_id)
            .unwrap_or(false);
        if !is_open {
            return;
        }
        let typers = self.get_active_typers(chat_id);
        let names: Vec<String> = typers
            .iter()
            .map(|t| {
                t.name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| t.user_id.clone())
            })
            .collect();
        if let Some(cur) = self.state.current_chat.as_mut() {
            cur.typing_text = crate::state::typing_text(&names);
            cur.typing_members = typers;
        }
        self.emit_state();
    }

    // ---- Profiles -------------------------------------------------------

    fn remember_profile(&mut self, profile: UserProfile) {
        self.profiles.insert(profile.user_id.clone(), profile);
    }

    // ---- Prefs (pinned/hidden chats) ------------------------------------

    fn prefs_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("chat_prefs.json")
    }

    fn load_prefs(&mut self) {
        if let Ok(raw) = std::fs::read_to_string(self.prefs_path()) {
            if let Ok(prefs) = serde_json::from_str::<ChatListPrefs>(&raw) {
                self.pinned_chats = prefs.pinned;
                self.hidden_chats = prefs.hidden;
            }
        }
    }

    fn save_prefs(&self) {
        let prefs = ChatListPrefs {
            pinned: self.pinned_chats.clone(),
            hidden: self.hidden_chats.clone(),
        };
        if let Ok(json) = serde_json::to_string(&prefs) {
            let _ = std::fs::write(self.prefs_path(), json);
        }
    }

    // ---- Emit plumbing --------------------------------------------------

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn toast(&mut self, msg: impl Into<String>) {
        self.state.toast = Some(msg.into());
        self.toast_dismiss_token = self.toast_dismiss_token.wrapping_add(1);
        self.schedule_toast_auto_dismiss(self.toast_dismiss_token);
        self.emit_state();
    }

    fn schedule_toast_auto_dismiss(&self, token: u64) {
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(TOAST_AUTO_DISMISS).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ToastAutoDismiss { token },
            )));
        });
    }

    fn handle_toast_auto_dismiss(&mut self, token: u64) {
        if token != self.toast_dismiss_token {
            return;
        }
        if self.state.toast.is_some() {
            self.state.toast = None;
            self.emit_state();
        }
    }
}

fn chat_display_name(chat: &ChatRecord, my_user_id: &str) -> String {
    if chat.is_group {
        return chat
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Group ({})", chat.members.len()));
    }
    chat.members
        .iter()
        .find(|m| m.user_id != my_user_id)
        .map(|m| m.display_name())
        .unwrap_or_else(|| "Chat".to_string())
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use crate::state::UserProfile;
    use crate::transport::ChannelEvent;
    use crate::AppAction;

    #[test]
    fn start_loads_chat_list_and_subscribes_rooms() {
        let rest = FakeRest::new()
            .with_chat(direct_chat("c1", profile("u1", "Ada")))
            .with_chat(direct_chat("c2", profile("u2", "Brin")));
        let mut h = make_harness(rest);

        h.dispatch(AppAction::Start);

        assert_eq!(h.state().chat_list.len(), 2);
        assert!(h.transport.is_subscribed("c1"));
        assert!(h.transport.is_subscribed("c2"));
    }

    #[test]
    fn refetch_drops_rooms_for_chats_the_server_no_longer_lists() {
        let rest = FakeRest::new()
            .with_chat(direct_chat("c1", profile("u1", "Ada")))
            .with_chat(direct_chat("c2", profile("u2", "Brin")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        assert!(h.transport.is_subscribed("c2"));

        h.rest.chats.lock().unwrap().retain(|c| c.id == "c1");
        h.dispatch(AppAction::Foregrounded);

        assert!(h.transport.is_subscribed("c1"));
        assert!(!h.transport.is_subscribed("c2"));
        assert_eq!(h.state().chat_list.len(), 1);
        assert_eq!(h.state().chat_list[0].chat_id, "c1");
    }

    #[test]
    fn direct_chat_display_name_is_peer_name() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        assert_eq!(h.state().chat_list[0].display_name, "Ada");
    }

    #[test]
    fn message_on_closed_chat_increments_unread_and_preview() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);

        h.publish(
            "c1",
            ChannelEvent::MessageNew {
                message: record("c1", "m1", "u1", "hello", 1_700_000_000),
            },
        );

        let summary = &h.state().chat_list[0];
        assert_eq!(summary.unread_count, 1);
        assert_eq!(summary.last_message_preview.as_deref(), Some("hello"));
    }

    #[test]
    fn opening_chat_clears_unread() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.publish(
            "c1",
            ChannelEvent::MessageNew {
                message: record("c1", "m1", "u1", "hello", 1_700_000_000),
            },
        );
        assert_eq!(h.state().chat_list[0].unread_count, 1);

        h.dispatch(AppAction::OpenChat {
            chat_id: "c1".into(),
        });
        assert_eq!(h.state().chat_list[0].unread_count, 0);
    }

    #[test]
    fn pinned_chats_sort_first_and_persist() {
        let rest = FakeRest::new()
            .with_chat(direct_chat("c1", profile("u1", "Ada")))
            .with_chat(direct_chat("c2", profile("u2", "Brin")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::SetChatPinned {
            chat_id: "c2".into(),
            pinned: true,
        });

        assert_eq!(h.state().chat_list[0].chat_id, "c2");
        assert!(h.state().chat_list[0].pinned);

        // Prefs survive a core restart on the same data dir.
        let raw =
            std::fs::read_to_string(h.data_dir.path().join("chat_prefs.json")).expect("prefs file");
        assert!(raw.contains("c2"));
    }

    #[test]
    fn hidden_flag_is_exposed_on_summary() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::SetChatHidden {
            chat_id: "c1".into(),
            hidden: true,
        });
        assert!(h.state().chat_list[0].hidden);
    }

    #[test]
    fn typing_two_members_formats_pair_text() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::OpenChat {
            chat_id: "c1".into(),
        });

        h.publish(
            "c1",
            ChannelEvent::TypingStart {
                user: profile("u1", "A"),
            },
        );
        h.publish(
            "c1",
            ChannelEvent::TypingStart {
                user: profile("u2", "B"),
            },
        );

        let cur = h.state().current_chat.as_ref().unwrap();
        assert_eq!(cur.typing_text, "A and B are typing...");
        assert_eq!(cur.typing_members.len(), 2);
    }

    #[test]
    fn typing_stop_event_removes_member() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::OpenChat {
            chat_id: "c1".into(),
        });
        h.publish(
            "c1",
            ChannelEvent::TypingStart {
                user: profile("u1", "Ada"),
            },
        );
        assert_eq!(
            h.state().current_chat.as_ref().unwrap().typing_text,
            "Ada is typing..."
        );

        h.publish(
            "c1",
            ChannelEvent::TypingStop {
                user_id: "u1".into(),
            },
        );
        assert_eq!(h.state().current_chat.as_ref().unwrap().typing_text, "");
    }

    #[test]
    fn typing_from_self_is_ignored() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::OpenChat {
            chat_id: "c1".into(),
        });
        h.publish(
            "c1",
            ChannelEvent::TypingStart {
                user: me(),
            },
        );
        assert_eq!(h.state().current_chat.as_ref().unwrap().typing_text, "");
    }

    #[test]
    fn expired_typing_entry_is_dropped_without_stop_event() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::OpenChat {
            chat_id: "c1".into(),
        });

        // Inject an already-expired entry; the next refresh must prune it.
        h.core.update_typing("c1", "u1", crate::state::now_seconds() + 1);
        if let Some(entries) = h.core.typing_state.get_mut("c1") {
            entries[0].expires_at = crate::state::now_seconds() - 1;
        }
        h.core.refresh_typing_view("c1");
        assert_eq!(h.state().current_chat.as_ref().unwrap().typing_text, "");
    }

    #[test]
    fn typing_heartbeat_keeps_position() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::OpenChat {
            chat_id: "c1".into(),
        });
        h.publish(
            "c1",
            ChannelEvent::TypingStart {
                user: profile("u1", "A"),
            },
        );
        h.publish(
            "c1",
            ChannelEvent::TypingStart {
                user: profile("u2", "B"),
            },
        );
        // A's heartbeat refresh must not move A behind B.
        h.publish(
            "c1",
            ChannelEvent::TypingStart {
                user: profile("u1", "A"),
            },
        );
        assert_eq!(
            h.state().current_chat.as_ref().unwrap().typing_text,
            "A and B are typing..."
        );
    }

    #[test]
    fn toast_clears_on_action() {
        let rest = FakeRest::new();
        let mut h = make_harness(rest);
        h.core.toast("something went wrong");
        assert!(h.state().toast.is_some());
        h.dispatch(AppAction::ClearToast);
        assert!(h.state().toast.is_none());
    }

    #[test]
    fn group_chat_without_name_gets_member_count_name() {
        let mut chat = direct_chat("g1", profile("u1", "Ada"));
        chat.is_group = true;
        chat.members.push(UserProfile {
            user_id: "u2".into(),
            name: Some("Brin".into()),
            picture_url: None,
        });
        let rest = FakeRest::new().with_chat(chat);
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        assert_eq!(h.state().chat_list[0].display_name, "Group (3)");
    }
}
