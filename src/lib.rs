//! Live chat session core. Owns all conversation, typing, reaction, and call
//! state behind a single app actor; platform shells dispatch [`AppAction`]s
//! and render [`AppState`] snapshots from the update stream.
//!
//! Architecture: one dedicated actor thread drains a message queue of user
//! actions and internal events. Async side effects (REST calls, transport
//! receive loops, timers) run on an embedded tokio runtime and marshal their
//! completions back onto the queue. The actor is the only writer of state.

pub mod actions;
pub mod error;
pub mod media;
pub mod reactions;
pub mod rest;
pub mod state;
pub mod transport;
pub mod updates;

mod core;
mod logging;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

pub use actions::AppAction;
pub use error::CoreError;
pub use state::{AppState, CallMode, CallStatus, MessageKind, UserProfile};
pub use updates::AppUpdate;

use media::{MediaEngine, MicPermissionGate};
use rest::RestApi;
use transport::ChatTransport;
use updates::CoreMsg;

/// External seams the core drives. Shells wire platform implementations;
/// tests wire in-process fakes.
#[derive(Clone)]
pub struct Collaborators {
    pub rest: Arc<dyn RestApi>,
    pub transport: Arc<dyn ChatTransport>,
    pub media: Arc<dyn MediaEngine>,
    pub mic_gate: Arc<dyn MicPermissionGate>,
}

/// Receives every state snapshot the core emits, in order.
pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

/// Handle the shell holds. Cheap to clone via `Arc`; all methods are safe to
/// call from any thread.
pub struct ChatApp {
    core_sender: flume::Sender<CoreMsg>,
    update_receiver: flume::Receiver<AppUpdate>,
    shared_state: Arc<RwLock<AppState>>,
    listening: AtomicBool,
}

impl ChatApp {
    pub fn new(data_dir: String, me: UserProfile, collab: Collaborators) -> Arc<Self> {
        logging::init_logging(&data_dir);

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty(me.clone())));

        let core_sender = core_tx.clone();
        let shared = shared_state.clone();
        std::thread::spawn(move || {
            let mut core = core::AppCore::new(update_tx, core_tx, data_dir, me, collab, shared);
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
            tracing::info!("app actor stopped");
        });

        Arc::new(Self {
            core_sender,
            update_receiver: update_rx,
            shared_state,
            listening: AtomicBool::new(false),
        })
    }

    pub fn dispatch(&self, action: AppAction) {
        let _ = self.core_sender.send(CoreMsg::Action(action));
    }

    /// Latest committed snapshot. Poisoning cannot happen from the actor side
    /// (it never panics while holding the lock), but a poisoned lock still
    /// yields the last snapshot rather than panicking the shell.
    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    /// Starts forwarding updates to `reconciler` on a dedicated thread. Only
    /// the first caller wins; later calls are no-ops.
    pub fn listen_for_updates(&self, reconciler: Arc<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("update listener already attached");
            return;
        }
        let rx = self.update_receiver.clone();
        std::thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }
}
