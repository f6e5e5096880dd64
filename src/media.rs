//! Media engine and microphone permission seams. The engine encapsulates
//! capture/playback and peer routing for an established call; the core only
//! drives connect/teardown and local toggles, and reacts to lifecycle events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::state::CallMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// Audio path established; the call machine moves Connecting -> Connected.
    Connected,
    Disconnected { reason: String },
    Error { message: String },
}

#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    /// Begins establishing the audio path for `call_id`. Completion is
    /// reported on the event stream, not by this future.
    async fn connect(&self, call_id: &str, mode: CallMode) -> Result<(), CoreError>;

    /// Local teardown. Must not block on the network.
    async fn disconnect(&self, call_id: &str);

    fn set_muted(&self, muted: bool);

    fn set_mode(&self, mode: CallMode);

    fn set_speakerphone(&self, enabled: bool);

    /// Lifecycle events, tagged with the call id they belong to.
    fn events(&self) -> flume::Receiver<(String, MediaEvent)>;
}

/// One-shot microphone capability prompt. The platform shell implements this
/// against the OS permission dialog.
#[async_trait]
pub trait MicPermissionGate: Send + Sync + 'static {
    async fn request(&self) -> bool;
}

/// Gate with a fixed answer; the default for desktop shells and tests.
pub struct StaticPermissionGate {
    granted: bool,
}

impl StaticPermissionGate {
    pub fn granted() -> Self {
        Self { granted: true }
    }

    pub fn denied() -> Self {
        Self { granted: false }
    }
}

#[async_trait]
impl MicPermissionGate for StaticPermissionGate {
    async fn request(&self) -> bool {
        self.granted
    }
}

/// Synthetic engine: no audio hardware, emits `Connected` immediately on
/// connect. Used by tests and the `synthetic` audio backend configuration.
pub struct SyntheticMediaEngine {
    event_tx: flume::Sender<(String, MediaEvent)>,
    event_rx: flume::Receiver<(String, MediaEvent)>,
    auto_connect: bool,
    fail_connect: AtomicBool,
    muted: AtomicBool,
    speakerphone: AtomicBool,
    mode: Mutex<CallMode>,
    connected_calls: Mutex<Vec<String>>,
}

impl SyntheticMediaEngine {
    pub fn new() -> Self {
        Self::with_auto_connect(true)
    }

    /// `auto_connect = false` keeps calls in Connecting until the test pushes
    /// an event itself.
    pub fn with_auto_connect(auto_connect: bool) -> Self {
        let (event_tx, event_rx) = flume::unbounded();
        Self {
            event_tx,
            event_rx,
            auto_connect,
            fail_connect: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            speakerphone: AtomicBool::new(false),
            mode: Mutex::new(CallMode::Speaker),
            connected_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_event(&self, call_id: &str, event: MediaEvent) {
        let _ = self.event_tx.send((call_id.to_string(), event));
    }

    /// Makes subsequent `connect` calls fail, simulating a device that cannot
    /// open the audio path.
    pub fn set_connect_failure(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn speakerphone(&self) -> bool {
        self.speakerphone.load(Ordering::SeqCst)
    }

    pub fn mode(&self) -> CallMode {
        *self.mode.lock().expect("mode lock")
    }

    pub fn connect_history(&self) -> Vec<String> {
        self.connected_calls.lock().expect("calls lock").clone()
    }
}

impl Default for SyntheticMediaEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEngine for SyntheticMediaEngine {
    async fn connect(&self, call_id: &str, mode: CallMode) -> Result<(), CoreError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(CoreError::Media("audio device unavailable".into()));
        }
        *self.mode.lock().expect("mode lock") = mode;
        self.connected_calls
            .lock()
            .expect("calls lock")
            .push(call_id.to_string());
        if self.auto_connect {
            let _ = self.event_tx.send((call_id.to_string(), MediaEvent::Connected));
        }
        Ok(())
    }

    async fn disconnect(&self, call_id: &str) {
        let _ = self.event_tx.send((
            call_id.to_string(),
            MediaEvent::Disconnected {
                reason: "local teardown".into(),
            },
        ));
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn set_mode(&self, mode: CallMode) {
        *self.mode.lock().expect("mode lock") = mode;
    }

    fn set_speakerphone(&self, enabled: bool) {
        self.speakerphone.store(enabled, Ordering::SeqCst);
    }

    fn events(&self) -> flume::Receiver<(String, MediaEvent)> {
        self.event_rx.clone()
    }
}
