//! Session lifecycle orchestration.
//!
//! The controller owns every native resource of a session: the microphone
//! capture thread, the playback sink, the volume monitor task, and the
//! backend adapter. All shared mutable state lives in one `SessionShared`
//! struct mutated only by the controller and its pump tasks; nothing is
//! captured loose in callbacks.
//!
//! `stop()` is the single cancellation primitive. It cancels the pump and
//! monitor tasks, joins the capture thread, drops the output sink and closes
//! the backend session; every step is a no-op when the resource is already
//! gone, so it is idempotent and safe from any state, including the error
//! paths of `start()` which run the same release.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::audio::volume::{run_volume_monitor, volume_channel, VolumeMonitor};
use crate::audio::{
    decode_pcm16_base64, encode_pcm16_base64, resample, CpalSink, MicCapture, PlaybackScheduler,
    SEND_SAMPLE_RATE,
};
use crate::config::{system_instruction, ContextSource, OutputMode, SessionConfig, OPENING_LINE};
use crate::transcript::{Message, Transcript};

use super::adapter::SessionAdapter;
use super::state::{transition, ConnectionState, StateInput};
use super::{SessionError, SessionEvent};

/// State observed by the UI layer, shared with the pump tasks.
struct SessionShared {
    state: Mutex<ConnectionState>,
    transcript: Mutex<Transcript>,
    error: Mutex<Option<String>>,
    volume: VolumeMonitor,
}

impl SessionShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ConnectionState::Disconnected),
            transcript: Mutex::new(Transcript::new()),
            error: Mutex::new(None),
            volume: VolumeMonitor::new(),
        })
    }

    fn apply(&self, input: StateInput) {
        let mut state = self.state.lock().unwrap();
        let next = transition(*state, input);
        if next != *state {
            log::debug!("Connection state: {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    fn record_error(&self, message: String) {
        *self.error.lock().unwrap() = Some(message);
    }
}

/// Native resources of the active session, shared with the pump tasks so a
/// remote close can tear down locally without going through the controller.
struct Resources {
    adapter: tokio::sync::Mutex<Option<SessionAdapter>>,
    capture: Mutex<Option<MicCapture>>,
    cancel: CancellationToken,
}

/// Release everything, in an order-independent but complete fashion.
/// Every step tolerates an already-released resource.
async fn release(resources: &Resources) {
    resources.cancel.cancel();

    let capture = resources.capture.lock().unwrap().take();
    drop(capture); // joins the capture thread

    let adapter = resources.adapter.lock().await.take();
    if let Some(adapter) = adapter {
        adapter.close().await;
    }
}

struct ActiveSession {
    resources: Arc<Resources>,
    event_pump: tokio::task::JoinHandle<()>,
    send_pump: Option<tokio::task::JoinHandle<()>>,
    volume_task: Option<tokio::task::JoinHandle<()>>,
}

/// Orchestrates one interview session at a time and exposes the external
/// contract to the UI layer.
pub struct SessionController {
    shared: Arc<SessionShared>,
    active: Option<ActiveSession>,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionController {
    pub fn new() -> Self {
        Self {
            shared: SessionShared::new(),
            active: None,
        }
    }

    /// Start a session with the given configuration and context snapshot.
    ///
    /// Fails fast with [`SessionError::AlreadyActive`] while a session is
    /// running (the running session is untouched). Any open-time failure
    /// records the error, moves the indicator to `Error` and runs the same
    /// resource release as `stop()`.
    pub async fn start(
        &mut self,
        config: SessionConfig,
        context: ContextSource,
    ) -> Result<(), SessionError> {
        if self.active.is_some() {
            return Err(SessionError::AlreadyActive);
        }

        self.shared.transcript.lock().unwrap().clear();
        *self.shared.error.lock().unwrap() = None;
        self.shared.apply(StateInput::StartRequested);

        match self.try_start(&config, &context).await {
            Ok(active) => {
                self.active = Some(active);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to start session: {}", e);
                self.shared.record_error(e.to_string());
                self.shared.apply(StateInput::Failed);
                Err(e)
            }
        }
    }

    async fn try_start(
        &self,
        config: &SessionConfig,
        context: &ContextSource,
    ) -> Result<ActiveSession, SessionError> {
        // Fail fast before any resource is acquired.
        if config.api_key.is_empty() {
            return Err(SessionError::Configuration(
                "An API key is required for the chosen provider".to_string(),
            ));
        }

        let instruction = system_instruction(config.interview_mode, context);

        let (adapter, events_rx) = SessionAdapter::open(config, &instruction).await?;
        self.shared.apply(StateInput::OpenSucceeded);

        let needs_audio = adapter.supports_audio_input();
        let cancel = CancellationToken::new();
        let resources = Arc::new(Resources {
            adapter: tokio::sync::Mutex::new(Some(adapter)),
            capture: Mutex::new(None),
            cancel: cancel.clone(),
        });

        let mut send_pump = None;
        let mut volume_task = None;
        let mut scheduler = None;

        if needs_audio {
            let (frames_tx, frames_rx) = mpsc::channel(100);
            let (volume_tx, volume_rx) = volume_channel();

            let capture = match MicCapture::start(frames_tx, Some(volume_tx)) {
                Ok(capture) => capture,
                Err(e) => {
                    release(&resources).await;
                    return Err(SessionError::PermissionDenied(e.to_string()));
                }
            };
            let capture_rate = capture.sample_rate();
            *resources.capture.lock().unwrap() = Some(capture);

            volume_task = Some(tokio::spawn(run_volume_monitor(
                volume_rx,
                self.shared.volume.clone(),
                cancel.child_token(),
            )));

            if config.output_mode == OutputMode::Voice {
                match CpalSink::open() {
                    Ok(sink) => scheduler = Some(PlaybackScheduler::new(sink)),
                    Err(e) => {
                        release(&resources).await;
                        return Err(SessionError::Transport(e.to_string()));
                    }
                }
            }

            send_pump = Some(tokio::spawn(run_send_pump(
                frames_rx,
                capture_rate,
                resources.clone(),
                cancel.child_token(),
            )));

            // Scripted opening line so the AI speaks first.
            let opening = {
                let mut guard = resources.adapter.lock().await;
                match guard.as_mut() {
                    Some(adapter) => adapter.send_text(OPENING_LINE, &[]).await,
                    None => Ok(()),
                }
            };
            if let Err(e) = opening {
                release(&resources).await;
                return Err(e);
            }
        }

        let event_pump = tokio::spawn(run_event_pump(
            events_rx,
            self.shared.clone(),
            resources.clone(),
            scheduler,
            cancel.child_token(),
        ));

        Ok(ActiveSession {
            resources,
            event_pump,
            send_pump,
            volume_task,
        })
    }

    /// Stop the session and release all resources. Idempotent; safe to call
    /// from any state. Stopping from `Error` keeps the error indicator.
    pub async fn stop(&mut self) {
        self.shared.apply(StateInput::StopRequested);

        if let Some(active) = self.active.take() {
            log::info!("Stopping session");
            release(&active.resources).await;

            let _ = active.event_pump.await;
            if let Some(task) = active.send_pump {
                let _ = task.await;
            }
            if let Some(task) = active.volume_task {
                let _ = task.await;
            }
        }
    }

    /// Send a user text turn.
    ///
    /// The user message is appended to the transcript immediately,
    /// independent of backend latency for the reply.
    pub async fn send_text_message(&mut self, text: &str) -> Result<(), SessionError> {
        let Some(active) = self.active.as_ref() else {
            return Err(SessionError::Transport(
                "No active session; call start() first".to_string(),
            ));
        };

        let history: Vec<Message> = {
            let mut transcript = self.shared.transcript.lock().unwrap();
            transcript.append_user_message(text);
            transcript.messages().to_vec()
        };

        let mut guard = active.resources.adapter.lock().await;
        match guard.as_mut() {
            Some(adapter) => adapter.send_text(text, &history).await,
            None => Err(SessionError::Transport("Session is closing".to_string())),
        }
    }

    /// Current connection indicator.
    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state.lock().unwrap()
    }

    /// Snapshot of the transcript, in insertion order.
    pub fn messages(&self) -> Vec<Message> {
        self.shared.transcript.lock().unwrap().messages().to_vec()
    }

    /// Latest input loudness in [0, 1].
    pub fn volume(&self) -> f32 {
        self.shared.volume.level()
    }

    /// Latest session error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.shared.error.lock().unwrap().clone()
    }

    /// Whether a session currently holds resources. Callers serialize
    /// `start()` on this.
    pub fn is_listening(&self) -> bool {
        self.active.is_some()
    }
}

/// Forward captured frames to the backend: resample to the send rate,
/// encode as PCM16 base64, push as soon as encoded.
async fn run_send_pump(
    mut frames_rx: mpsc::Receiver<Vec<f32>>,
    capture_rate: u32,
    resources: Arc<Resources>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames_rx.recv() => {
                let Some(frame) = frame else { break };

                let samples = resample(&frame, capture_rate, SEND_SAMPLE_RATE);
                let encoded = encode_pcm16_base64(&samples);

                let mut guard = resources.adapter.lock().await;
                let Some(adapter) = guard.as_mut() else { break };
                if let Err(e) = adapter.send_audio_frame(&encoded).await {
                    // The receiver task surfaces the transport failure; the
                    // pump just drops the frame.
                    log::warn!("Failed to send audio frame: {}", e);
                }
            }
        }
    }
    log::debug!("Audio send pump exiting");
}

/// Route inbound events in arrival order. Decode and schedule happen here,
/// back to back, so per-chunk ordering is preserved.
async fn run_event_pump(
    mut events_rx: mpsc::Receiver<SessionEvent>,
    shared: Arc<SessionShared>,
    resources: Arc<Resources>,
    mut scheduler: Option<PlaybackScheduler<CpalSink>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events_rx.recv() => {
                let Some(event) = event else { break };

                match event {
                    SessionEvent::AudioChunk(data) => {
                        if let Some(scheduler) = scheduler.as_mut() {
                            match decode_pcm16_base64(&data) {
                                Ok(samples) => scheduler.enqueue(samples),
                                Err(e) => {
                                    // Recovered locally; the stream continues.
                                    log::warn!("Dropping malformed audio chunk: {}", e);
                                }
                            }
                        }
                    }
                    SessionEvent::TextFragment(text) => {
                        shared.transcript.lock().unwrap().append_ai_fragment(&text);
                    }
                    SessionEvent::UserTranscript(text) => {
                        shared.transcript.lock().unwrap().append_user_message(&text);
                    }
                    SessionEvent::Interrupted => {
                        if let Some(scheduler) = scheduler.as_mut() {
                            scheduler.interrupt();
                        }
                        shared.transcript.lock().unwrap().note_interruption();
                    }
                    SessionEvent::Closed => {
                        log::info!("Backend closed the session");
                        shared.apply(StateInput::RemoteClosed);
                        release(&resources).await;
                        break;
                    }
                    SessionEvent::TransportError(message) => {
                        log::error!("Session transport error: {}", message);
                        shared.record_error(message);
                        shared.apply(StateInput::Failed);
                        release(&resources).await;
                        break;
                    }
                }
            }
        }
    }
    log::debug!("Event pump exiting");
}
