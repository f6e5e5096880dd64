//! Open-chat session: history, optimistic sends, reactions, deletes, replies.
//!
//! The session exists while one chat is open. Everything in it is addressed by
//! an epoch; `CloseChat` bumps the epoch so in-flight completions for the old
//! session fall on the floor.

use std::collections::HashMap;

use uuid::Uuid;

use crate::reactions;
use crate::rest::{MessageRecord, OutgoingMessage};
use crate::state::{
    now_seconds, ChatMessage, ChatViewState, MessageDeliveryState, MessageKind, ReactionDetails,
    ReactionRecord, ReplyPreview, UserProfile,
};
use crate::transport::ClientSignal;
use crate::updates::{CoreMsg, InternalEvent};

use super::AppCore;

/// Window for matching a transport echo to a pending send when the echo lost
/// its client temp id.
const ECHO_MATCH_WINDOW_SECS: i64 = 5;

const REPLY_SNIPPET_MAX: usize = 80;

#[derive(Debug, Clone)]
struct ConfirmedSend {
    server_id: String,
    confirmed_at: i64,
}

/// Per-open-chat bookkeeping that never leaves the core.
pub(crate) struct ChatSession {
    pub chat_id: String,
    pub epoch: u64,
    /// client_temp_id -> request, kept until confirmed for resend and dedup.
    pending_sends: HashMap<String, OutgoingMessage>,
    /// Temp ids already matched to a server message. Whichever of the HTTP
    /// ack and the transport echo arrives second is dropped against this map.
    confirmed_temp_ids: HashMap<String, ConfirmedSend>,
    /// message_id -> pre-toggle reaction snapshot, for rollback.
    pending_reactions: HashMap<String, Vec<ReactionRecord>>,
    /// message_id -> removed message, restored if the server delete fails.
    pending_deletes: HashMap<String, ChatMessage>,
    oldest_loaded_id: Option<String>,
    loading_older: bool,
    /// True after we emitted typing:start without a matching stop.
    typing_signaled: bool,
}

impl ChatSession {
    fn new(chat_id: &str, epoch: u64) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            epoch,
            pending_sends: HashMap::new(),
            confirmed_temp_ids: HashMap::new(),
            pending_reactions: HashMap::new(),
            pending_deletes: HashMap::new(),
            oldest_loaded_id: None,
            loading_older: false,
            typing_signaled: false,
        }
    }

    fn evict_stale_confirmations(&mut self, ttl_secs: i64) {
        let cutoff = now_seconds() - ttl_secs;
        self.confirmed_temp_ids
            .retain(|_, c| c.confirmed_at >= cutoff);
    }
}

impl AppCore {
    // ---- Open / close ---------------------------------------------------

    pub(super) fn open_chat(&mut self, chat_id: &str) {
        let Some(chat) = self.chats.get(chat_id).cloned() else {
            tracing::warn!(%chat_id, "open for unknown chat");
            self.toast("Chat not found");
            return;
        };

        // Re-opening the same chat is a refresh; either way the old session's
        // in-flight completions become stale.
        self.chat_epoch = self.chat_epoch.wrapping_add(1);
        let epoch = self.chat_epoch;
        self.session = Some(ChatSession::new(chat_id, epoch));

        self.unread_counts.remove(chat_id);

        let me = self.state.me.user_id.clone();
        self.state.current_chat = Some(ChatViewState {
            chat_id: chat_id.to_string(),
            is_group: chat.is_group,
            display_name: super::chat_display_name(&chat, &me),
            members: chat.members.clone(),
            messages: vec![],
            typing_members: vec![],
            typing_text: String::new(),
            reply_to: None,
            reaction_details: None,
            can_load_older: false,
            load_error: None,
        });
        self.refresh_chat_list();
        self.refresh_typing_view(chat_id);

        self.fetch_history(chat_id, epoch);

        // A chat with a live call the user opens into joins it directly.
        if let Some(session) = chat.active_call {
            self.maybe_auto_join(&session);
        }
    }

    pub(super) fn close_chat(&mut self) {
        if let Some(session) = self.session.take() {
            if session.typing_signaled {
                let _ = self
                    .collab
                    .transport
                    .emit(&session.chat_id, ClientSignal::TypingStop);
            }
        }
        self.chat_epoch = self.chat_epoch.wrapping_add(1);
        self.state.current_chat = None;
        self.emit_state();
    }

    // ---- History --------------------------------------------------------

    fn fetch_history(&mut self, chat_id: &str, epoch: u64) {
        let rest = self.collab.rest.clone();
        let tx = self.core_sender.clone();
        let chat = chat_id.to_string();
        let limit = self.config.history_page_size;
        self.runtime.spawn(async move {
            let (messages, error) = match rest.fetch_history(&chat, None, limit).await {
                Ok(messages) => (messages, None),
                Err(e) => (vec![], Some(e.user_message())),
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::HistoryFetched {
                chat_id: chat,
                epoch,
                messages,
                error,
            })));
        });
    }

    pub(super) fn handle_history_fetched(
        &mut self,
        chat_id: &str,
        epoch: u64,
        records: Vec<MessageRecord>,
        error: Option<String>,
    ) {
        if epoch != self.chat_epoch || !self.is_session_chat(chat_id) {
            return;
        }
        if let Some(err) = error {
            if let Some(cur) = self.state.current_chat.as_mut() {
                cur.load_error = Some(err);
            }
            self.emit_state();
            return;
        }

        let page_size = self.config.history_page_size;
        let full_page = records.len() >= page_size;
        // Wire order is newest-first; the view is oldest-first.
        let messages: Vec<ChatMessage> = records
            .into_iter()
            .rev()
            .map(|r| self.to_chat_message(r))
            .collect();
        let oldest = messages.first().map(|m| m.id.clone());

        if let Some(session) = self.session.as_mut() {
            session.oldest_loaded_id = oldest;
        }
        if let Some(cur) = self.state.current_chat.as_mut() {
            cur.messages = messages;
            cur.can_load_older = full_page;
            cur.load_error = None;
        }
        self.emit_state();
    }

    pub(super) fn load_older_messages(&mut self, chat_id: &str, limit: usize) {
        if !self.is_session_chat(chat_id) {
            return;
        }
        let can_load = self
            .state
            .current_chat
            .as_ref()
            .map(|c| c.can_load_older)
            .unwrap_or(false);
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !can_load || session.loading_older {
            return;
        }
        let Some(before_id) = session.oldest_loaded_id.clone() else {
            return;
        };
        session.loading_older = true;
        let epoch = session.epoch;

        let rest = self.collab.rest.clone();
        let tx = self.core_sender.clone();
        let chat = chat_id.to_string();
        let limit = if limit == 0 {
            self.config.history_page_size
        } else {
            limit
        };
        self.runtime.spawn(async move {
            let (messages, error) = match rest.fetch_history(&chat, Some(&before_id), limit).await {
                Ok(messages) => (messages, None),
                Err(e) => (vec![], Some(e.user_message())),
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::OlderHistoryFetched {
                    chat_id: chat,
                    epoch,
                    messages,
                    error,
                },
            )));
        });
    }

    pub(super) fn handle_older_history_fetched(
        &mut self,
        chat_id: &str,
        epoch: u64,
        records: Vec<MessageRecord>,
        error: Option<String>,
    ) {
        if epoch != self.chat_epoch || !self.is_session_chat(chat_id) {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.loading_older = false;
        }
        if let Some(err) = error {
            self.toast(err);
            return;
        }

        let got = records.len();
        let page_size = self.config.history_page_size;
        let older: Vec<ChatMessage> = records
            .into_iter()
            .rev()
            .map(|r| self.to_chat_message(r))
            .collect();
        let new_oldest = older.first().map(|m| m.id.clone());

        if let Some(session) = self.session.as_mut() {
            if new_oldest.is_some() {
                session.oldest_loaded_id = new_oldest;
            }
        }
        if let Some(cur) = self.state.current_chat.as_mut() {
            let mut merged = older;
            merged.extend(cur.messages.drain(..));
            cur.messages = merged;
            // A short page means the top of history was reached.
            cur.can_load_older = got >= page_size;
        }
        self.emit_state();
    }

    // ---- Sending --------------------------------------------------------

    pub(super) fn send_message(&mut self, chat_id: &str, content: String, kind: MessageKind) {
        if content.trim().is_empty() {
            return;
        }
        if !self.is_session_chat(chat_id) {
            tracing::warn!(%chat_id, "send without open session");
            return;
        }

        let reply_to = self
            .state
            .current_chat
            .as_mut()
            .and_then(|cur| cur.reply_to.take());

        let temp_id = Uuid::new_v4().to_string();
        let outgoing = OutgoingMessage {
            chat_id: chat_id.to_string(),
            client_temp_id: temp_id.clone(),
            content: content.clone(),
            kind,
            reply_to_message_id: reply_to.as_ref().map(|r| r.message_id.clone()),
        };

        let me = self.state.me.clone();
        let local = ChatMessage {
            id: temp_id.clone(),
            chat_id: chat_id.to_string(),
            sender_id: me.user_id.clone(),
            sender_name: Some(me.display_name()),
            content,
            kind,
            timestamp: now_seconds(),
            client_temp_id: Some(temp_id.clone()),
            delivery: MessageDeliveryState::Pending,
            edited: false,
            reply_to,
            reactions: vec![],
            reaction_groups: vec![],
            is_mine: true,
        };
        if let Some(cur) = self.state.current_chat.as_mut() {
            insert_sorted(&mut cur.messages, local);
        }
        if let Some(session) = self.session.as_mut() {
            session.pending_sends.insert(temp_id.clone(), outgoing.clone());
        }

        // Sending a message is an implicit typing stop.
        self.emit_typing_stop(chat_id);
        self.emit_state();
        self.dispatch_send(outgoing);
    }

    pub(super) fn resend_message(&mut self, chat_id: &str, message_id: &str) {
        if !self.is_session_chat(chat_id) {
            return;
        }
        let temp_id = match self.state.current_chat.as_mut().and_then(|cur| {
            cur.messages
                .iter_mut()
                .find(|m| m.id == message_id && m.delivery == MessageDeliveryState::Failed)
        }) {
            Some(msg) => {
                msg.delivery = MessageDeliveryState::Pending;
                msg.client_temp_id.clone()
            }
            None => return,
        };
        let Some(temp_id) = temp_id else { return };
        // Same temp id as the original attempt keeps the dedup key stable.
        let outgoing = self
            .session
            .as_ref()
            .and_then(|s| s.pending_sends.get(&temp_id).cloned());
        let Some(outgoing) = outgoing else { return };
        self.emit_state();
        self.dispatch_send(outgoing);
    }

    fn dispatch_send(&mut self, outgoing: OutgoingMessage) {
        let rest = self.collab.rest.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let chat_id = outgoing.chat_id.clone();
            let temp_id = outgoing.client_temp_id.clone();
            let (message, error) = match rest.send_message(&outgoing).await {
                Ok(record) => (Some(record), None),
                Err(e) => (None, Some(e.user_message())),
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::SendMessageResult {
                    chat_id,
                    client_temp_id: temp_id,
                    message,
                    error,
                },
            )));
        });
    }

    pub(super) fn handle_send_message_result(
        &mut self,
        chat_id: &str,
        client_temp_id: &str,
        record: Option<MessageRecord>,
        error: Option<String>,
    ) {
        if !self.is_session_chat(chat_id) {
            return;
        }
        match (record, error) {
            (Some(record), _) => {
                self.confirm_pending_send(chat_id, client_temp_id, record);
            }
            (None, error) => {
                // Only flip to Failed while still pending; a transport echo
                // may have confirmed the message before the HTTP error came
                // back.
                let still_pending = self
                    .session
                    .as_ref()
                    .map(|s| s.pending_sends.contains_key(client_temp_id))
                    .unwrap_or(false);
                if !still_pending {
                    return;
                }
                if let Some(msg) = self.state.current_chat.as_mut().and_then(|cur| {
                    cur.messages
                        .iter_mut()
                        .find(|m| m.client_temp_id.as_deref() == Some(client_temp_id))
                }) {
                    msg.delivery = MessageDeliveryState::Failed;
                }
                if let Some(err) = error {
                    tracing::warn!(%err, "message send failed");
                }
                self.emit_state();
            }
        }
    }

    /// First confirmation wins: whichever of HTTP ack and transport echo gets
    /// here first swaps the placeholder for the server message; the second is
    /// recognized via `confirmed_temp_ids` and dropped.
    fn confirm_pending_send(&mut self, chat_id: &str, temp_id: &str, record: MessageRecord) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(confirmed) = session.confirmed_temp_ids.get(temp_id) {
            tracing::debug!(
                server_id = %confirmed.server_id,
                "duplicate confirmation dropped"
            );
            return;
        }
        if session.pending_sends.remove(temp_id).is_none() {
            // Unknown temp id (other device, or session restarted): treat as a
            // plain incoming message.
            self.ingest_incoming(chat_id, record);
            return;
        }
        session.confirmed_temp_ids.insert(
            temp_id.to_string(),
            ConfirmedSend {
                server_id: record.id.clone(),
                confirmed_at: now_seconds(),
            },
        );
        let ttl = self.config.temp_id_ttl_secs;
        if let Some(session) = self.session.as_mut() {
            session.evict_stale_confirmations(ttl);
        }

        let confirmed = self.to_chat_message(record);
        if let Some(cur) = self.state.current_chat.as_mut() {
            cur.messages
                .retain(|m| m.client_temp_id.as_deref() != Some(temp_id));
            insert_sorted(&mut cur.messages, confirmed);
        }
        self.emit_state();
    }

    // ---- Transport message events ---------------------------------------

    pub(super) fn handle_message_new(&mut self, chat_id: &str, record: MessageRecord) {
        // A real message from a member supersedes their typing indicator.
        self.update_typing(chat_id, &record.sender_id, 0);

        if let Some(chat) = self.chats.get_mut(chat_id) {
            chat.last_message_preview = Some(preview_text(&record));
            chat.last_message_at = Some(record.created_at);
        }

        let is_mine = record.sender_id == self.state.me.user_id;
        if self.is_session_chat(chat_id) {
            if is_mine {
                self.reconcile_own_echo(chat_id, record);
            } else {
                self.ingest_incoming(chat_id, record);
            }
            self.refresh_typing_view(chat_id);
        } else if !is_mine {
            *self.unread_counts.entry(chat_id.to_string()).or_insert(0) += 1;
        }
        self.refresh_chat_list();
    }

    fn reconcile_own_echo(&mut self, chat_id: &str, record: MessageRecord) {
        if let Some(temp_id) = record.client_temp_id.clone() {
            self.confirm_pending_send(chat_id, &temp_id, record);
            return;
        }
        // Echo without a temp id: match a pending send by content and time.
        let matched = self.session.as_ref().and_then(|session| {
            self.state.current_chat.as_ref().and_then(|cur| {
                cur.messages
                    .iter()
                    .find(|m| {
                        m.delivery != MessageDeliveryState::Sent
                            && m.is_mine
                            && m.content == record.content
                            && (m.timestamp - record.created_at).abs() <= ECHO_MATCH_WINDOW_SECS
                            && m.client_temp_id
                                .as_ref()
                                .map(|t| session.pending_sends.contains_key(t))
                                .unwrap_or(false)
                    })
                    .and_then(|m| m.client_temp_id.clone())
            })
        });
        match matched {
            Some(temp_id) => self.confirm_pending_send(chat_id, &temp_id, record),
            None => self.ingest_incoming(chat_id, record),
        }
    }

    fn ingest_incoming(&mut self, _chat_id: &str, record: MessageRecord) {
        let msg = self.to_chat_message(record);
        if let Some(cur) = self.state.current_chat.as_mut() {
            insert_sorted(&mut cur.messages, msg);
        }
        self.emit_state();
    }

    // ---- Reactions ------------------------------------------------------

    pub(super) fn toggle_reaction(&mut self, chat_id: &str, message_id: &str, emoji: &str) {
        if !self.is_session_chat(chat_id) {
            return;
        }
        let me = self.state.me.user_id.clone();
        let now = now_seconds();

        let snapshot = {
            let Some(msg) = self
                .state
                .current_chat
                .as_mut()
                .and_then(|cur| cur.messages.iter_mut().find(|m| m.id == message_id))
            else {
                return;
            };
            // Unconfirmed messages have no server id to react against.
            if msg.delivery != MessageDeliveryState::Sent {
                return;
            }
            let snapshot = msg.reactions.clone();
            reactions::toggle(&mut msg.reactions, &me, emoji, now);
            msg.reaction_groups = reactions::aggregate(&msg.reactions, &me);
            snapshot
        };
        if let Some(session) = self.session.as_mut() {
            // Keep the oldest snapshot across rapid toggles so a rollback
            // lands on the last server-confirmed list.
            session
                .pending_reactions
                .entry(message_id.to_string())
                .or_insert(snapshot);
        }
        self.refresh_reaction_details(message_id);
        self.emit_state();

        let rest = self.collab.rest.clone();
        let tx = self.core_sender.clone();
        let chat = chat_id.to_string();
        let msg_id = message_id.to_string();
        let emoji = emoji.to_string();
        self.runtime.spawn(async move {
            let (reactions, error) = match rest.toggle_reaction(&chat, &msg_id, &emoji).await {
                Ok(list) => (Some(list), None),
                Err(e) => (None, Some(e.user_message())),
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ReactionResult {
                chat_id: chat,
                message_id: msg_id,
                reactions,
                error,
            })));
        });
    }

    pub(super) fn handle_reaction_result(
        &mut self,
        chat_id: &str,
        message_id: &str,
        result: Option<Vec<ReactionRecord>>,
        error: Option<String>,
    ) {
        if !self.is_session_chat(chat_id) {
            return;
        }
        match (result, error) {
            (Some(list), _) => {
                // First confirmation wins, same as the send path: once the
                // authoritative echo has landed (clearing the pending entry),
                // a slower HTTP response is stale and must not override it.
                let still_pending = self
                    .session
                    .as_ref()
                    .map(|s| s.pending_reactions.contains_key(message_id))
                    .unwrap_or(false);
                if still_pending {
                    self.apply_reaction_list(message_id, list);
                }
            }
            (None, error) => {
                let snapshot = self
                    .session
                    .as_mut()
                    .and_then(|s| s.pending_reactions.remove(message_id));
                if let Some(snapshot) = snapshot {
                    self.apply_reaction_list(message_id, snapshot);
                }
                if let Some(err) = error {
                    self.toast(err);
                }
            }
        }
    }

    /// Transport echo carries the authoritative list; it replaces whatever we
    /// derived optimistically.
    pub(super) fn handle_reaction_echo(
        &mut self,
        chat_id: &str,
        message_id: &str,
        list: Vec<ReactionRecord>,
    ) {
        if !self.is_session_chat(chat_id) {
            return;
        }
        self.apply_reaction_list(message_id, list);
    }

    fn apply_reaction_list(&mut self, message_id: &str, list: Vec<ReactionRecord>) {
        if let Some(session) = self.session.as_mut() {
            session.pending_reactions.remove(message_id);
        }
        let me = self.state.me.user_id.clone();
        if let Some(msg) = self
            .state
            .current_chat
            .as_mut()
            .and_then(|cur| cur.messages.iter_mut().find(|m| m.id == message_id))
        {
            msg.reaction_groups = reactions::aggregate(&list, &me);
            msg.reactions = list;
        }
        self.refresh_reaction_details(message_id);
        self.emit_state();
    }

    pub(super) fn load_reaction_details(&mut self, chat_id: &str, message_id: &str) {
        if !self.is_session_chat(chat_id) {
            return;
        }
        let Some(reaction_list) = self
            .state
            .current_chat
            .as_ref()
            .and_then(|cur| cur.messages.iter().find(|m| m.id == message_id))
            .map(|m| m.reactions.clone())
        else {
            return;
        };

        let groups = reactions::detailed(&reaction_list, |id| self.profiles.get(id).cloned());
        if let Some(cur) = self.state.current_chat.as_mut() {
            cur.reaction_details = Some(ReactionDetails {
                message_id: message_id.to_string(),
                groups,
            });
        }
        self.emit_state();

        // Resolve reactors we have no cached profile for.
        let unknown: Vec<String> = reaction_list
            .iter()
            .map(|r| r.user_id.clone())
            .filter(|id| !self.profiles.contains_key(id))
            .collect();
        if unknown.is_empty() {
            return;
        }
        let rest = self.collab.rest.clone();
        let tx = self.core_sender.clone();
        let msg_id = message_id.to_string();
        self.runtime.spawn(async move {
            let mut profiles = Vec::new();
            for id in unknown {
                if let Ok(profile) = rest.fetch_profile(&id).await {
                    profiles.push(profile);
                }
            }
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ProfilesFetched {
                    message_id: msg_id,
                    profiles,
                },
            )));
        });
    }

    pub(super) fn handle_profiles_fetched(&mut self, message_id: &str, profiles: Vec<UserProfile>) {
        for profile in profiles {
            self.remember_profile(profile);
        }
        let details_open = self
            .state
            .current_chat
            .as_ref()
            .and_then(|cur| cur.reaction_details.as_ref())
            .map(|d| d.message_id == message_id)
            .unwrap_or(false);
        if details_open {
            self.refresh_reaction_details(message_id);
            self.emit_state();
        }
    }

    fn refresh_reaction_details(&mut self, message_id: &str) {
        let open = self
            .state
            .current_chat
            .as_ref()
            .and_then(|cur| cur.reaction_details.as_ref())
            .map(|d| d.message_id == message_id)
            .unwrap_or(false);
        if !open {
            return;
        }
        let list = self
            .state
            .current_chat
            .as_ref()
            .and_then(|cur| cur.messages.iter().find(|m| m.id == message_id))
            .map(|m| m.reactions.clone());
        if let Some(list) = list {
            let groups = reactions::detailed(&list, |id| self.profiles.get(id).cloned());
            if let Some(cur) = self.state.current_chat.as_mut() {
                cur.reaction_details = Some(ReactionDetails {
                    message_id: message_id.to_string(),
                    groups,
                });
            }
        } else if let Some(cur) = self.state.current_chat.as_mut() {
            // Message deleted out from under the open sheet.
            cur.reaction_details = None;
        }
    }

    // ---- Deletes --------------------------------------------------------

    pub(super) fn delete_message(&mut self, chat_id: &str, message_id: &str) {
        if !self.is_session_chat(chat_id) {
            return;
        }
        let removed = {
            let Some(cur) = self.state.current_chat.as_mut() else {
                return;
            };
            let Some(pos) = cur.messages.iter().position(|m| m.id == message_id) else {
                return;
            };
            cur.messages.remove(pos)
        };

        if removed.delivery != MessageDeliveryState::Sent {
            // Never reached the server; removing locally is the whole job.
            if let Some(temp_id) = removed.client_temp_id.as_ref() {
                if let Some(session) = self.session.as_mut() {
                    session.pending_sends.remove(temp_id);
                }
            }
            self.refresh_reaction_details(message_id);
            self.emit_state();
            return;
        }

        if let Some(session) = self.session.as_mut() {
            session
                .pending_deletes
                .insert(message_id.to_string(), removed);
        }
        self.refresh_reaction_details(message_id);
        self.emit_state();

        let rest = self.collab.rest.clone();
        let tx = self.core_sender.clone();
        let chat = chat_id.to_string();
        let msg_id = message_id.to_string();
        self.runtime.spawn(async move {
            let error = rest
                .delete_message(&chat, &msg_id)
                .await
                .err()
                .map(|e| e.user_message());
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::DeleteMessageResult {
                    chat_id: chat,
                    message_id: msg_id,
                    error,
                },
            )));
        });
    }

    pub(super) fn handle_delete_message_result(
        &mut self,
        chat_id: &str,
        message_id: &str,
        error: Option<String>,
    ) {
        if !self.is_session_chat(chat_id) {
            return;
        }
        let pending = self
            .session
            .as_mut()
            .and_then(|s| s.pending_deletes.remove(message_id));
        let Some(err) = error else {
            return;
        };
        // Server refused: the message comes back where it was.
        if let Some(msg) = pending {
            if let Some(cur) = self.state.current_chat.as_mut() {
                insert_sorted(&mut cur.messages, msg);
            }
        }
        self.toast(err);
    }

    pub(super) fn handle_message_deleted_event(&mut self, chat_id: &str, message_id: &str) {
        if self.is_session_chat(chat_id) {
            if let Some(session) = self.session.as_mut() {
                session.pending_deletes.remove(message_id);
            }
            let removed = self
                .state
                .current_chat
                .as_mut()
                .map(|cur| {
                    let before = cur.messages.len();
                    cur.messages.retain(|m| m.id != message_id);
                    before != cur.messages.len()
                })
                .unwrap_or(false);
            if removed {
                self.refresh_reaction_details(message_id);
                self.emit_state();
            }
        }
    }

    // ---- Replies --------------------------------------------------------

    pub(super) fn set_reply_to(&mut self, chat_id: &str, message_id: &str) {
        if !self.is_session_chat(chat_id) {
            return;
        }
        let preview = self
            .state
            .current_chat
            .as_ref()
            .and_then(|cur| cur.messages.iter().find(|m| m.id == message_id))
            .map(reply_preview);
        if let Some(preview) = preview {
            if let Some(cur) = self.state.current_chat.as_mut() {
                cur.reply_to = Some(preview);
            }
            self.emit_state();
        }
    }

    pub(super) fn clear_reply(&mut self) {
        if let Some(cur) = self.state.current_chat.as_mut() {
            if cur.reply_to.take().is_some() {
                self.emit_state();
            }
        }
    }

    // ---- Outbound typing ------------------------------------------------

    pub(super) fn typing_started(&mut self, chat_id: &str) {
        if !self.is_session_chat(chat_id) {
            return;
        }
        let now = now_seconds();
        let last = self.last_typing_sent.get(chat_id).copied().unwrap_or(0);
        if now - last < self.config.typing_debounce_secs {
            return;
        }
        self.last_typing_sent.insert(chat_id.to_string(), now);
        if let Err(e) = self.collab.transport.emit(chat_id, ClientSignal::TypingStart) {
            tracing::debug!(%e, "typing signal dropped");
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.typing_signaled = true;
        }
    }

    fn emit_typing_stop(&mut self, chat_id: &str) {
        let signaled = self
            .session
            .as_ref()
            .map(|s| s.typing_signaled)
            .unwrap_or(false);
        if !signaled {
            return;
        }
        let _ = self.collab.transport.emit(chat_id, ClientSignal::TypingStop);
        self.last_typing_sent.remove(chat_id);
        if let Some(session) = self.session.as_mut() {
            session.typing_signaled = false;
        }
    }

    // ---- Shared helpers -------------------------------------------------

    pub(super) fn is_session_chat(&self, chat_id: &str) -> bool {
        self.session
            .as_ref()
            .map(|s| s.chat_id == chat_id)
            .unwrap_or(false)
    }

    pub(super) fn to_chat_message(&self, r: MessageRecord) -> ChatMessage {
        let me = &self.state.me;
        let is_mine = r.sender_id == me.user_id;
        let sender_name = if is_mine {
            Some(me.display_name())
        } else {
            self.profiles.get(&r.sender_id).map(|p| p.display_name())
        };
        let reaction_groups = reactions::aggregate(&r.reactions, &me.user_id);
        ChatMessage {
            id: r.id,
            chat_id: r.chat_id,
            sender_id: r.sender_id,
            sender_name,
            content: r.content,
            kind: r.kind,
            timestamp: r.created_at,
            client_temp_id: None,
            delivery: MessageDeliveryState::Sent,
            edited: r.edited,
            reply_to: r.reply_to,
            reactions: r.reactions,
            reaction_groups,
            is_mine,
        }
    }
}

/// Keeps the view ordered by `(timestamp, id)` and drops exact id duplicates.
fn insert_sorted(messages: &mut Vec<ChatMessage>, msg: ChatMessage) {
    if messages.iter().any(|m| m.id == msg.id) {
        return;
    }
    let key = (msg.timestamp, msg.id.clone());
    let pos = messages
        .iter()
        .position(|m| (m.timestamp, m.id.as_str()) > (key.0, key.1.as_str()))
        .unwrap_or(messages.len());
    messages.insert(pos, msg);
}

fn reply_preview(msg: &ChatMessage) -> ReplyPreview {
    let snippet: String = match msg.kind {
        MessageKind::Text | MessageKind::SystemEvent => {
            msg.content.chars().take(REPLY_SNIPPET_MAX).collect()
        }
        MessageKind::Image => "Photo".into(),
        MessageKind::Voice => "Voice message".into(),
        MessageKind::Gif => "GIF".into(),
    };
    ReplyPreview {
        message_id: msg.id.clone(),
        sender_name: msg
            .sender_name
            .clone()
            .unwrap_or_else(|| msg.sender_id.clone()),
        kind: msg.kind,
        snippet,
    }
}

fn preview_text(record: &MessageRecord) -> String {
    match record.kind {
        MessageKind::Text | MessageKind::SystemEvent => {
            record.content.chars().take(120).collect()
        }
        MessageKind::Image => "Photo".into(),
        MessageKind::Voice => "Voice message".into(),
        MessageKind::Gif => "GIF".into(),
    }
}
