//! Call machine. `AppState.active_call == None` is Idle; at most one call
//! instance exists at a time. Setup runs through a microphone permission gate
//! and call session signaling before the media engine is asked to connect;
//! every async completion is token-guarded so a torn-down call cannot be
//! resurrected by a late reply.

use std::time::Duration;

use crate::error::CoreError;
use crate::media::MediaEvent;
use crate::rest::CallSessionInfo;
use crate::state::{now_seconds, CallMode, CallState, CallStatus, UserProfile};
use crate::transport::ClientSignal;
use crate::updates::{CoreMsg, InternalEvent};

use super::AppCore;

const DURATION_TICK: Duration = Duration::from_secs(1);

/// What to do once the microphone permission prompt resolves.
#[derive(Debug, Clone)]
pub(crate) enum PendingCallAction {
    Start { chat_id: String },
    Join { chat_id: String, call_id: String },
}

impl PendingCallAction {
    fn call_id(&self) -> Option<&str> {
        match self {
            PendingCallAction::Start { .. } => None,
            PendingCallAction::Join { call_id, .. } => Some(call_id),
        }
    }
}

impl AppCore {
    // ---- User intents ---------------------------------------------------

    pub(super) fn handle_start_call_action(&mut self, chat_id: &str) {
        if self.call_in_progress() {
            self.toast("Already in a call");
            return;
        }
        if !self.chats.contains_key(chat_id) {
            return;
        }
        self.state.active_call = Some(CallState {
            call_id: String::new(),
            chat_id: chat_id.to_string(),
            started_by: self.state.me.user_id.clone(),
            participants: vec![self.state.me.clone()],
            mode: CallMode::Speaker,
            status: CallStatus::Outgoing,
            started_at: None,
            connected_at: None,
            duration_secs: 0,
            muted: false,
            speakerphone: false,
        });
        self.pending_call_action = Some(PendingCallAction::Start {
            chat_id: chat_id.to_string(),
        });
        self.emit_state();
        self.request_mic_permission();
    }

    pub(super) fn handle_join_call_action(&mut self, chat_id: &str) {
        if self.call_in_progress() {
            self.toast("Already in a call");
            return;
        }
        let Some(session) = self
            .chats
            .get(chat_id)
            .and_then(|c| c.active_call.clone())
        else {
            self.toast("Call has ended");
            return;
        };
        self.begin_join(&session);
    }

    /// Opening a chat that already has a live call attaches directly, skipping
    /// the ring. Idempotent against the call we are already in or joining.
    pub(super) fn maybe_auto_join(&mut self, session: &CallSessionInfo) {
        let already_this_call = self
            .state
            .active_call
            .as_ref()
            .map(|c| c.call_id == session.call_id)
            .unwrap_or(false)
            || self
                .pending_call_action
                .as_ref()
                .and_then(|p| p.call_id())
                .map(|id| id == session.call_id)
                .unwrap_or(false);
        if already_this_call || self.call_in_progress() {
            return;
        }
        self.begin_join(session);
    }

    fn begin_join(&mut self, session: &CallSessionInfo) {
        self.state.active_call = Some(call_state_from(session, CallStatus::Joining));
        self.pending_call_action = Some(PendingCallAction::Join {
            chat_id: session.chat_id.clone(),
            call_id: session.call_id.clone(),
        });
        self.emit_state();
        self.request_mic_permission();
    }

    pub(super) fn handle_accept_call_action(&mut self) {
        let Some(call) = self.state.active_call.as_mut() else {
            return;
        };
        if call.status != CallStatus::Incoming {
            return;
        }
        call.set_status(CallStatus::Joining);
        self.pending_call_action = Some(PendingCallAction::Join {
            chat_id: call.chat_id.clone(),
            call_id: call.call_id.clone(),
        });
        self.emit_state();
        self.request_mic_permission();
    }

    pub(super) fn handle_reject_call_action(&mut self) {
        let is_incoming = self
            .state
            .active_call
            .as_ref()
            .map(|c| c.status == CallStatus::Incoming)
            .unwrap_or(false);
        if !is_incoming {
            return;
        }
        // Declining is local; other participants keep ringing or talking.
        self.state.active_call = None;
        self.emit_state();
    }

    pub(super) fn handle_end_call_action(&mut self) {
        if self.state.active_call.is_some() {
            self.finish_call("ended", true);
        } else if self.pending_call_action.take().is_some() {
            // Cancelled while the permission prompt was still up.
            self.mic_permission_token = self.mic_permission_token.wrapping_add(1);
            self.emit_state();
        }
    }

    pub(super) fn handle_toggle_mute_action(&mut self) {
        let Some(call) = self.state.active_call.as_mut() else {
            return;
        };
        if !call.is_live() {
            return;
        }
        call.muted = !call.muted;
        let muted = call.muted;
        self.collab.media.set_muted(muted);
        self.emit_state();
    }

    pub(super) fn handle_toggle_speakerphone_action(&mut self) {
        let Some(call) = self.state.active_call.as_mut() else {
            return;
        };
        if !call.is_live() {
            return;
        }
        call.speakerphone = !call.speakerphone;
        let enabled = call.speakerphone;
        self.collab.media.set_speakerphone(enabled);
        self.emit_state();
    }

    /// Speaker/listener switch happens in place on the connected session; no
    /// leave and rejoin.
    pub(super) fn handle_set_call_mode_action(&mut self, mode: CallMode) {
        let Some(call) = self.state.active_call.as_mut() else {
            return;
        };
        if call.status != CallStatus::Connected || call.mode == mode {
            return;
        }
        call.mode = mode;
        let chat_id = call.chat_id.clone();
        let call_id = call.call_id.clone();
        self.collab.media.set_mode(mode);
        if let Err(e) = self
            .collab
            .transport
            .emit(&chat_id, ClientSignal::CallMode { call_id, mode })
        {
            tracing::debug!(%e, "mode signal dropped");
        }
        self.emit_state();
    }

    // ---- Setup pipeline -------------------------------------------------

    fn request_mic_permission(&mut self) {
        self.mic_permission_token = self.mic_permission_token.wrapping_add(1);
        let token = self.mic_permission_token;
        let gate = self.collab.mic_gate.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let granted = gate.request().await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::MicPermission {
                granted,
                token,
            })));
        });
    }

    pub(super) fn handle_mic_permission(&mut self, granted: bool, token: u64) {
        if token != self.mic_permission_token {
            return;
        }
        let Some(pending) = self.pending_call_action.take() else {
            return;
        };
        if !granted {
            self.state.active_call = None;
            self.toast(CoreError::PermissionDenied.user_message());
            return;
        }

        self.call_setup_token = self.call_setup_token.wrapping_add(1);
        let token = self.call_setup_token;
        let rest = self.collab.rest.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = match &pending {
                PendingCallAction::Start { chat_id } => rest.create_call_session(chat_id).await,
                PendingCallAction::Join { chat_id, call_id } => {
                    rest.join_call_session(chat_id, call_id).await
                }
            };
            let (session, error) = match result {
                Ok(session) => (Some(session), None),
                Err(e) => (None, Some(e.user_message())),
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::CallSessionReady {
                    token,
                    session,
                    error,
                },
            )));
        });
    }

    pub(super) fn handle_call_session_ready(
        &mut self,
        token: u64,
        session: Option<CallSessionInfo>,
        error: Option<String>,
    ) {
        if token != self.call_setup_token {
            return;
        }
        let Some(session) = session else {
            self.state.active_call = None;
            self.toast(error.unwrap_or_else(|| "Call setup failed".into()));
            return;
        };
        let Some(call) = self.state.active_call.as_mut() else {
            return;
        };
        let announce = match call.status {
            CallStatus::Outgoing => ClientSignal::CallStart {
                call_id: session.call_id.clone(),
            },
            _ => ClientSignal::CallJoin {
                call_id: session.call_id.clone(),
            },
        };
        call.call_id = session.call_id.clone();
        call.started_by = session.started_by.clone();
        call.participants = session.participants.clone();
        call.started_at = Some(session.started_at);
        call.set_status(CallStatus::Connecting);
        let mode = call.mode;

        if let Err(e) = self.collab.transport.emit(&session.chat_id, announce) {
            tracing::debug!(%e, "call announce dropped");
        }

        if let Some(chat) = self.chats.get_mut(&session.chat_id) {
            chat.active_call = Some(session.clone());
        }
        self.refresh_chat_list();

        self.ensure_media_pump();
        let media = self.collab.media.clone();
        let tx = self.core_sender.clone();
        let call_id = session.call_id.clone();
        self.runtime.spawn(async move {
            if let Err(e) = media.connect(&call_id, mode).await {
                let _ = tx.send(CoreMsg::Internal(Box::new(
                    InternalEvent::MediaEngineEvent {
                        call_id,
                        event: MediaEvent::Error {
                            message: e.user_message(),
                        },
                    },
                )));
            }
        });

        self.schedule_connect_timeout();
        self.emit_state();
    }

    fn ensure_media_pump(&mut self) {
        if self.media_pump_started {
            return;
        }
        self.media_pump_started = true;
        let rx = self.collab.media.events();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            while let Ok((call_id, event)) = rx.recv_async().await {
                let _ = tx.send(CoreMsg::Internal(Box::new(
                    InternalEvent::MediaEngineEvent { call_id, event },
                )));
            }
        });
    }

    fn schedule_connect_timeout(&mut self) {
        self.call_connect_timeout_token = self.call_connect_timeout_token.wrapping_add(1);
        let token = self.call_connect_timeout_token;
        let delay = Duration::from_secs(self.config.call_connect_timeout_secs);
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::CallConnectTimeout { token },
            )));
        });
    }

    pub(super) fn handle_call_connect_timeout(&mut self, token: u64) {
        if token != self.call_connect_timeout_token {
            return;
        }
        let still_connecting = self
            .state
            .active_call
            .as_ref()
            .map(|c| c.status == CallStatus::Connecting)
            .unwrap_or(false);
        if still_connecting {
            self.finish_call("connect timeout", true);
        }
    }

    // ---- Media lifecycle ------------------------------------------------

    pub(super) fn handle_media_engine_event(&mut self, call_id: &str, event: MediaEvent) {
        let matches = self
            .state
            .active_call
            .as_ref()
            .map(|c| c.call_id == call_id && c.is_live())
            .unwrap_or(false);
        if !matches {
            // Teardown stragglers from a finished call.
            return;
        }
        match event {
            MediaEvent::Connected => {
                // Stale connect timeout must not kill the live call.
                self.call_connect_timeout_token =
                    self.call_connect_timeout_token.wrapping_add(1);
                if let Some(call) = self.state.active_call.as_mut() {
                    call.set_status(CallStatus::Connected);
                    call.connected_at = Some(now_seconds());
                    call.duration_secs = 0;
                }
                self.call_duration_tick_token = self.call_duration_tick_token.wrapping_add(1);
                self.schedule_duration_tick(self.call_duration_tick_token);
                self.emit_state();
            }
            MediaEvent::Disconnected { reason } => {
                self.finish_call(&reason, true);
            }
            MediaEvent::Error { message } => {
                tracing::warn!(%message, "media engine error");
                self.finish_call(&message, true);
            }
        }
    }

    fn schedule_duration_tick(&self, token: u64) {
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(DURATION_TICK).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::CallDurationTick { token },
            )));
        });
    }

    pub(super) fn handle_call_duration_tick(&mut self, token: u64) {
        if token != self.call_duration_tick_token {
            return;
        }
        let Some(call) = self.state.active_call.as_mut() else {
            return;
        };
        if call.status != CallStatus::Connected {
            return;
        }
        if let Some(connected_at) = call.connected_at {
            call.duration_secs = (now_seconds() - connected_at).max(0) as u32;
        }
        self.schedule_duration_tick(token);
        self.emit_state();
    }

    // ---- Transport call events ------------------------------------------

    pub(super) fn handle_call_started_event(&mut self, chat_id: &str, session: CallSessionInfo) {
        if let Some(chat) = self.chats.get_mut(chat_id) {
            chat.active_call = Some(session.clone());
        }
        self.refresh_chat_list();

        if session.started_by == self.state.me.user_id {
            return;
        }
        let viewing = self
            .state
            .current_chat
            .as_ref()
            .map(|c| c.chat_id == chat_id)
            .unwrap_or(false);
        if viewing {
            // A call starting in the chat being viewed attaches without a ring.
            self.maybe_auto_join(&session);
            return;
        }
        if self.call_in_progress() {
            return;
        }
        self.state.active_call = Some(call_state_from(&session, CallStatus::Incoming));
        self.emit_state();
    }

    pub(super) fn handle_call_joined_event(
        &mut self,
        chat_id: &str,
        call_id: &str,
        participant: UserProfile,
    ) {
        if let Some(session) = self
            .chats
            .get_mut(chat_id)
            .and_then(|c| c.active_call.as_mut())
            .filter(|s| s.call_id == call_id)
        {
            if !session.participants.iter().any(|p| p.user_id == participant.user_id) {
                session.participants.push(participant.clone());
            }
        }
        self.refresh_chat_list();

        let mut changed = false;
        if let Some(call) = self
            .state
            .active_call
            .as_mut()
            .filter(|c| c.call_id == call_id)
        {
            if !call.participants.iter().any(|p| p.user_id == participant.user_id) {
                call.participants.push(participant);
                changed = true;
            }
        }
        if changed {
            self.emit_state();
        }
    }

    pub(super) fn handle_call_left_event(&mut self, chat_id: &str, call_id: &str, user_id: &str) {
        if let Some(session) = self
            .chats
            .get_mut(chat_id)
            .and_then(|c| c.active_call.as_mut())
            .filter(|s| s.call_id == call_id)
        {
            session.participants.retain(|p| p.user_id != user_id);
        }
        self.refresh_chat_list();

        let mut changed = false;
        if let Some(call) = self
            .state
            .active_call
            .as_mut()
            .filter(|c| c.call_id == call_id)
        {
            let before = call.participants.len();
            call.participants.retain(|p| p.user_id != user_id);
            changed = call.participants.len() != before;
        }
        if changed {
            self.emit_state();
        }
    }

    pub(super) fn handle_call_ended_event(&mut self, chat_id: &str, call_id: &str) {
        if let Some(chat) = self.chats.get_mut(chat_id) {
            if chat
                .active_call
                .as_ref()
                .map(|s| s.call_id == call_id)
                .unwrap_or(false)
            {
                chat.active_call = None;
            }
        }
        self.refresh_chat_list();

        let ours = self
            .state
            .active_call
            .as_ref()
            .map(|c| c.call_id == call_id && c.is_live())
            .unwrap_or(false);
        if !ours {
            return;
        }
        if self
            .state
            .active_call
            .as_ref()
            .map(|c| c.status == CallStatus::Incoming)
            .unwrap_or(false)
        {
            // Ring cancelled before we answered.
            self.state.active_call = None;
            self.emit_state();
            return;
        }
        // Everyone is already gone; no leave signal to send.
        self.finish_call("call ended", false);
    }

    // ---- Teardown -------------------------------------------------------

    /// Tears the call down: media disconnect (spawned, never blocking the
    /// actor), optional leave signal, a terminal Ended snapshot, then Idle.
    pub(super) fn finish_call(&mut self, reason: &str, send_leave: bool) {
        let Some(mut call) = self.state.active_call.take() else {
            return;
        };
        self.pending_call_action = None;
        // Invalidate every timer and in-flight completion for this call.
        self.mic_permission_token = self.mic_permission_token.wrapping_add(1);
        self.call_setup_token = self.call_setup_token.wrapping_add(1);
        self.call_connect_timeout_token = self.call_connect_timeout_token.wrapping_add(1);
        self.call_duration_tick_token = self.call_duration_tick_token.wrapping_add(1);

        if !call.call_id.is_empty() {
            let media = self.collab.media.clone();
            let call_id = call.call_id.clone();
            self.runtime.spawn(async move {
                media.disconnect(&call_id).await;
            });
            if send_leave {
                if let Err(e) = self.collab.transport.emit(
                    &call.chat_id,
                    ClientSignal::CallLeave {
                        call_id: call.call_id.clone(),
                    },
                ) {
                    tracing::debug!(%e, "leave signal dropped");
                }
            }
        }

        tracing::info!(call_id = %call.call_id, %reason, "call finished");
        call.set_status(CallStatus::Ended {
            reason: reason.to_string(),
        });
        self.state.active_call = Some(call);
        self.emit_state();

        self.state.active_call = None;
        self.emit_state();
    }

    fn call_in_progress(&self) -> bool {
        self.state.active_call.is_some() || self.pending_call_action.is_some()
    }
}

fn call_state_from(session: &CallSessionInfo, status: CallStatus) -> CallState {
    CallState {
        call_id: session.call_id.clone(),
        chat_id: session.chat_id.clone(),
        started_by: session.started_by.clone(),
        participants: session.participants.clone(),
        mode: CallMode::Speaker,
        status,
        started_at: Some(session.started_at),
        connected_at: None,
        duration_secs: 0,
        muted: false,
        speakerphone: false,
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::media::SyntheticMediaEngine;
    use crate::rest::CallSessionInfo;
    use crate::state::{CallMode, CallStatus};
    use crate::transport::{ChannelEvent, ClientSignal};
    use crate::updates::{CoreMsg, InternalEvent};
    use crate::AppAction;

    fn session(chat_id: &str, call_id: &str, started_by: &str) -> CallSessionInfo {
        CallSessionInfo {
            call_id: call_id.into(),
            chat_id: chat_id.into(),
            started_by: started_by.into(),
            participants: vec![profile(started_by, "Ada")],
            started_at: crate::state::now_seconds(),
        }
    }

    fn status(h: &Harness) -> Option<CallStatus> {
        h.state().active_call.as_ref().map(|c| c.status.clone())
    }

    #[test]
    fn start_call_connects_through_the_pipeline() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::StartCall {
            chat_id: "c1".into(),
        });

        assert_eq!(status(&h), Some(CallStatus::Connected));
        let call = h.state().active_call.as_ref().unwrap();
        assert_eq!(call.call_id, "call-c1");
        assert!(call.connected_at.is_some());
        assert_eq!(h.media.connect_history(), vec!["call-c1".to_string()]);
        assert!(h
            .transport
            .emitted()
            .iter()
            .any(|(_, s)| matches!(s, ClientSignal::CallStart { call_id } if call_id == "call-c1")));
    }

    #[test]
    fn denied_mic_permission_blocks_the_call() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness_with(rest, SyntheticMediaEngine::new(), false);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::StartCall {
            chat_id: "c1".into(),
        });

        assert!(h.state().active_call.is_none());
        assert_eq!(
            h.state().toast.as_deref(),
            Some("Microphone access is required for calls")
        );
        assert_eq!(h.rest.create_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(h.media.connect_history().is_empty());
    }

    #[test]
    fn second_start_is_rejected_while_in_a_call() {
        let rest = FakeRest::new()
            .with_chat(direct_chat("c1", profile("u1", "Ada")))
            .with_chat(direct_chat("c2", profile("u2", "Brin")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::StartCall {
            chat_id: "c1".into(),
        });
        assert_eq!(status(&h), Some(CallStatus::Connected));

        h.dispatch(AppAction::StartCall {
            chat_id: "c2".into(),
        });
        assert_eq!(h.state().toast.as_deref(), Some("Already in a call"));
        assert_eq!(h.rest.create_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(h.state().active_call.as_ref().unwrap().chat_id, "c1");
    }

    #[test]
    fn opening_chat_with_live_call_auto_joins() {
        let mut chat = direct_chat("c1", profile("u1", "Ada"));
        chat.active_call = Some(session("c1", "k1", "u1"));
        let rest = FakeRest::new().with_chat(chat);
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::OpenChat {
            chat_id: "c1".into(),
        });

        assert_eq!(status(&h), Some(CallStatus::Connected));
        assert_eq!(h.rest.join_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(h
            .transport
            .emitted()
            .iter()
            .any(|(_, s)| matches!(s, ClientSignal::CallJoin { call_id } if call_id == "k1")));
    }

    #[test]
    fn auto_join_is_idempotent_for_the_same_call() {
        let mut chat = direct_chat("c1", profile("u1", "Ada"));
        chat.active_call = Some(session("c1", "k1", "u1"));
        let rest = FakeRest::new().with_chat(chat);
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::OpenChat {
            chat_id: "c1".into(),
        });
        assert_eq!(h.rest.join_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        // Re-observing the same call must not join again.
        h.publish(
            "c1",
            ChannelEvent::CallStarted {
                session: session("c1", "k1", "u1"),
            },
        );
        h.dispatch(AppAction::OpenChat {
            chat_id: "c1".into(),
        });
        assert_eq!(h.rest.join_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(status(&h), Some(CallStatus::Connected));
    }

    #[test]
    fn call_started_elsewhere_rings_incoming_and_accept_joins() {
        let rest = FakeRest::new()
            .with_chat(direct_chat("c1", profile("u1", "Ada")))
            .with_chat(direct_chat("c2", profile("u2", "Brin")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);

        h.publish(
            "c2",
            ChannelEvent::CallStarted {
                session: session("c2", "k2", "u2"),
            },
        );
        assert_eq!(status(&h), Some(CallStatus::Incoming));

        h.dispatch(AppAction::AcceptCall);
        assert_eq!(status(&h), Some(CallStatus::Connected));
        assert_eq!(h.rest.join_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn reject_call_returns_to_idle_without_leave() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.publish(
            "c1",
            ChannelEvent::CallStarted {
                session: session("c1", "k1", "u1"),
            },
        );
        assert_eq!(status(&h), Some(CallStatus::Incoming));

        h.dispatch(AppAction::RejectCall);
        assert!(h.state().active_call.is_none());
        assert!(!h
            .transport
            .emitted()
            .iter()
            .any(|(_, s)| matches!(s, ClientSignal::CallLeave { .. })));
    }

    #[test]
    fn call_started_in_the_open_chat_auto_joins_without_ring() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::OpenChat {
            chat_id: "c1".into(),
        });

        h.publish(
            "c1",
            ChannelEvent::CallStarted {
                session: session("c1", "k1", "u1"),
            },
        );
        assert_eq!(status(&h), Some(CallStatus::Connected));
        assert_eq!(h.rest.join_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(h.state().chat_list[0].active_call.is_some());
    }

    #[test]
    fn end_call_sends_leave_and_resets_to_idle() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::StartCall {
            chat_id: "c1".into(),
        });
        assert_eq!(status(&h), Some(CallStatus::Connected));

        h.dispatch(AppAction::EndCall);
        assert!(h.state().active_call.is_none());
        assert!(h
            .transport
            .emitted()
            .iter()
            .any(|(_, s)| matches!(s, ClientSignal::CallLeave { call_id } if call_id == "call-c1")));
    }

    #[test]
    fn remote_call_ended_finishes_local_call_without_leave() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::StartCall {
            chat_id: "c1".into(),
        });
        let leaves_before = h
            .transport
            .emitted()
            .iter()
            .filter(|(_, s)| matches!(s, ClientSignal::CallLeave { .. }))
            .count();

        h.publish(
            "c1",
            ChannelEvent::CallEnded {
                call_id: "call-c1".into(),
            },
        );
        assert!(h.state().active_call.is_none());
        assert!(h.state().chat_list[0].active_call.is_none());
        let leaves_after = h
            .transport
            .emitted()
            .iter()
            .filter(|(_, s)| matches!(s, ClientSignal::CallLeave { .. }))
            .count();
        assert_eq!(leaves_before, leaves_after);
    }

    #[test]
    fn mode_switch_stays_on_the_same_session() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::StartCall {
            chat_id: "c1".into(),
        });

        h.dispatch(AppAction::SetCallMode {
            mode: CallMode::Listener,
        });
        assert_eq!(status(&h), Some(CallStatus::Connected));
        assert_eq!(h.media.mode(), CallMode::Listener);
        assert_eq!(h.state().active_call.as_ref().unwrap().mode, CallMode::Listener);
        // One connect total: no rejoin happened.
        assert_eq!(h.media.connect_history().len(), 1);
        assert!(h
            .transport
            .emitted()
            .iter()
            .any(|(_, s)| matches!(s, ClientSignal::CallMode { mode, .. } if *mode == CallMode::Listener)));
    }

    #[test]
    fn mute_and_speakerphone_are_local_only() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::StartCall {
            chat_id: "c1".into(),
        });
        let signals_before = h.transport.emitted().len();

        h.dispatch(AppAction::ToggleMute);
        h.dispatch(AppAction::ToggleSpeakerphone);

        let call = h.state().active_call.as_ref().unwrap();
        assert!(call.muted);
        assert!(call.speakerphone);
        assert!(h.media.muted());
        assert!(h.media.speakerphone());
        assert_eq!(h.transport.emitted().len(), signals_before);
    }

    #[test]
    fn media_connect_failure_tears_the_call_down() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let media = SyntheticMediaEngine::new();
        media.set_connect_failure(true);
        let mut h = make_harness_with(rest, media, true);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::StartCall {
            chat_id: "c1".into(),
        });

        // Connect refused: the machine must land back in Idle, not stay stuck
        // in Connecting.
        assert!(h.state().active_call.is_none());
        assert!(h.media.connect_history().is_empty());
    }

    #[test]
    fn connect_timeout_ends_a_stuck_call() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness_with(rest, SyntheticMediaEngine::with_auto_connect(false), true);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::StartCall {
            chat_id: "c1".into(),
        });
        assert_eq!(status(&h), Some(CallStatus::Connecting));

        let token = h.core.call_connect_timeout_token;
        h.core
            .handle_message(CoreMsg::Internal(Box::new(
                InternalEvent::CallConnectTimeout { token },
            )));
        h.settle();
        assert!(h.state().active_call.is_none());
    }

    #[test]
    fn stale_connect_timeout_is_ignored_after_connect() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::StartCall {
            chat_id: "c1".into(),
        });
        assert_eq!(status(&h), Some(CallStatus::Connected));

        // The token was bumped when the media path connected.
        let token = h.core.call_connect_timeout_token.wrapping_sub(1);
        h.core
            .handle_message(CoreMsg::Internal(Box::new(
                InternalEvent::CallConnectTimeout { token },
            )));
        assert_eq!(status(&h), Some(CallStatus::Connected));
    }

    #[test]
    fn call_started_elsewhere_does_not_disturb_an_active_call() {
        let rest = FakeRest::new()
            .with_chat(direct_chat("c1", profile("u1", "Ada")))
            .with_chat(direct_chat("c2", profile("u2", "Brin")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::StartCall {
            chat_id: "c1".into(),
        });

        h.publish(
            "c2",
            ChannelEvent::CallStarted {
                session: session("c2", "k2", "u2"),
            },
        );
        let call = h.state().active_call.as_ref().unwrap();
        assert_eq!(call.chat_id, "c1");
        assert_eq!(call.status, CallStatus::Connected);
        // The other chat still advertises its call in the list.
        let c2 = h
            .state()
            .chat_list
            .iter()
            .find(|c| c.chat_id == "c2")
            .unwrap();
        assert!(c2.active_call.is_some());
    }

    #[test]
    fn participant_join_and_leave_update_the_roster() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.dispatch(AppAction::StartCall {
            chat_id: "c1".into(),
        });

        h.publish(
            "c1",
            ChannelEvent::CallJoined {
                call_id: "call-c1".into(),
                participant: profile("u2", "Brin"),
            },
        );
        let call = h.state().active_call.as_ref().unwrap();
        assert!(call.participants.iter().any(|p| p.user_id == "u2"));

        h.publish(
            "c1",
            ChannelEvent::CallLeft {
                call_id: "call-c1".into(),
                user_id: "u2".into(),
            },
        );
        let call = h.state().active_call.as_ref().unwrap();
        assert!(!call.participants.iter().any(|p| p.user_id == "u2"));
    }

    #[test]
    fn ring_cancelled_by_call_ended_clears_incoming() {
        let rest = FakeRest::new().with_chat(direct_chat("c1", profile("u1", "Ada")));
        let mut h = make_harness(rest);
        h.dispatch(AppAction::Start);
        h.publish(
            "c1",
            ChannelEvent::CallStarted {
                session: session("c1", "k1", "u1"),
            },
        );
        assert_eq!(status(&h), Some(CallStatus::Incoming));

        h.publish(
            "c1",
            ChannelEvent::CallEnded {
                call_id: "k1".into(),
            },
        );
        assert!(h.state().active_call.is_none());
        assert!(h.media.connect_history().is_empty());
    }
}
