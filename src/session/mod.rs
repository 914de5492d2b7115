//! Per-call state machine and pipeline orchestration.
//!
//! One [`CallSession`] exists per active call and owns all of its
//! state. Three event sources drive it — inbound audio frames, the
//! periodic silence-check task, and completion of the in-flight
//! pipeline — and every mutation happens under one mutex, with gateway
//! awaits kept outside the lock. No error from this module terminates
//! the call: every failure path ends back in LISTENING.

pub mod state;
pub mod utterance;

use crate::audio::{codec, vad};
use crate::config::CallConfig;
use crate::error::Result;
use crate::gateway::{AiGateway, ConversationTurn, Role, language_name};
use crate::transport::{AudioOutputTransport, MediaSink, StreamOutcome};
use state::CallState;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utterance::UtteranceBuffer;

/// Handle to one call's state machine. Cheap to clone via the inner
/// `Arc`; all methods serialize through the session mutex.
pub struct CallSession {
    shared: Arc<SessionShared>,
}

struct SessionShared {
    config: Arc<CallConfig>,
    gateway: Arc<dyn AiGateway>,
    transport: AudioOutputTransport,
    vad: vad::VoiceActivityDetector,
    /// Short call identifier for log correlation.
    call_id: String,
    started_at: Instant,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    state: CallState,
    utterance: UtteranceBuffer,
    speech_started_at: Option<Instant>,
    silence_started_at: Option<Instant>,
    /// Set on the first completed utterance, immutable afterwards.
    locked_language: Option<String>,
    history: Vec<ConversationTurn>,
    turn_count: u32,
    interrupt_requested: bool,
    /// Live only while SPEAKING; taken (at most once) on barge-in.
    speak_cancel: Option<CancellationToken>,
    /// Cancels the silence-check task when leaving RECORDING.
    silence_poll: Option<CancellationToken>,
}

impl CallSession {
    /// Create a session for a freshly connected call.
    pub fn new(
        config: Arc<CallConfig>,
        gateway: Arc<dyn AiGateway>,
        sink: Arc<dyn MediaSink>,
        stream_sid: String,
        call_sid: &str,
    ) -> Self {
        let cap = config
            .turn
            .max_utterance_bytes(config.audio.telephony_sample_rate);
        // Last six characters of the call SID, enough to correlate logs.
        let tail = call_sid.len().saturating_sub(6);
        let call_id = call_sid.get(tail..).unwrap_or(call_sid).to_owned();
        let shared = Arc::new(SessionShared {
            transport: AudioOutputTransport::new(sink, stream_sid, &config.audio),
            vad: vad::VoiceActivityDetector::new(&config.vad),
            call_id,
            started_at: Instant::now(),
            inner: Mutex::new(SessionInner {
                state: CallState::Idle,
                utterance: UtteranceBuffer::new(cap),
                speech_started_at: None,
                silence_started_at: None,
                locked_language: None,
                history: Vec::new(),
                turn_count: 0,
                interrupt_requested: false,
                speak_cancel: None,
                silence_poll: None,
            }),
            config,
            gateway,
        });
        info!(call = %shared.call_id, "session created");
        Self { shared }
    }

    /// Speak the greeting and start listening.
    pub async fn start(&self) {
        {
            let mut inner = self.shared.lock();
            self.shared.transition(&mut inner, CallState::Greeting);
        }
        let greeting = self.shared.config.language.greeting.clone();
        self.shared.speak(&greeting).await;

        let mut inner = self.shared.lock();
        // A barge-in during the greeting already moved us to RECORDING.
        if matches!(inner.state, CallState::Speaking | CallState::Greeting) {
            self.shared.transition(&mut inner, CallState::Listening);
        }
    }

    /// Handle one inbound companded audio chunk.
    ///
    /// Never blocks on the pipeline: while PROCESSING, caller speech is
    /// stashed in the pending buffer instead.
    pub fn handle_media(&self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        let energy = vad::rms_energy(&chunk);
        let shared = &self.shared;
        let mut inner = shared.lock();

        match inner.state {
            CallState::Idle | CallState::Greeting => {}

            CallState::Speaking => {
                if shared.vad.is_barge_in(energy) {
                    info!(call = %shared.call_id, energy, "caller interrupted agent");
                    inner.interrupt_requested = true;
                    shared.transport.flush();
                    // Taking the token makes repeated interrupts cancel
                    // at most once.
                    if let Some(token) = inner.speak_cancel.take() {
                        token.cancel();
                    }
                    shared.transition(&mut inner, CallState::Recording);
                    inner.utterance.reset_with(chunk);
                    inner.speech_started_at = Some(Instant::now());
                    inner.silence_started_at = None;
                    shared.start_silence_poll(&mut inner);
                }
            }

            CallState::Processing => {
                // Stash overflow speech for the next turn. No forced
                // turn-end is possible here, so the cap holds strictly.
                if shared.vad.is_speech(energy) && inner.utterance.fits(chunk.len()) {
                    inner.utterance.push(chunk);
                }
            }

            CallState::Listening | CallState::Recording => {
                if shared.vad.is_speech(energy) {
                    if inner.state == CallState::Listening {
                        shared.transition(&mut inner, CallState::Recording);
                        inner.utterance.clear();
                        inner.speech_started_at = Some(Instant::now());
                        shared.start_silence_poll(&mut inner);
                        debug!(call = %shared.call_id, energy, "speech start");
                    }
                    inner.silence_started_at = None;
                    if inner.utterance.push(chunk) {
                        info!(call = %shared.call_id, "utterance cap reached, forcing turn end");
                        shared.begin_processing(&mut inner);
                    }
                } else if inner.state == CallState::Recording {
                    // Trailing silence is part of the utterance.
                    inner.utterance.push(chunk);
                    if inner.silence_started_at.is_none() {
                        inner.silence_started_at = Some(Instant::now());
                    }
                }
            }
        }
    }

    /// Handle the far end's playback-finished echo. This is how the
    /// session learns that audio it already transmitted was actually
    /// heard, decoupling "sent" from "played".
    pub fn handle_mark(&self, name: &str) {
        let mut inner = self.shared.lock();
        debug!(call = %self.shared.call_id, mark = name, "mark echo");
        if inner.state == CallState::Speaking && !inner.interrupt_requested {
            self.shared.transition(&mut inner, CallState::Listening);
            debug!(call = %self.shared.call_id, "playback done, listening");
        }
    }

    /// Tear the session down. All buffers and history are released;
    /// nothing persists to the next call.
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        self.shared.stop_silence_poll(&mut inner);
        if let Some(token) = inner.speak_cancel.take() {
            token.cancel();
        }
        self.shared.transition(&mut inner, CallState::Idle);
        inner.utterance.clear();
        inner.history.clear();
        inner.speech_started_at = None;
        inner.silence_started_at = None;
        info!(
            call = %self.shared.call_id,
            turns = inner.turn_count,
            duration_secs = self.shared.started_at.elapsed().as_secs_f32(),
            "session ended"
        );
    }

    /// Current state.
    pub fn state(&self) -> CallState {
        self.shared.lock().state
    }

    /// Completed agent replies so far.
    pub fn turn_count(&self) -> u32 {
        self.shared.lock().turn_count
    }

    /// Language locked on the first completed utterance, if any.
    pub fn locked_language(&self) -> Option<String> {
        self.shared.lock().locked_language.clone()
    }

    /// Bytes accumulated for the in-progress utterance.
    pub fn utterance_bytes(&self) -> usize {
        self.shared.lock().utterance.len()
    }

    /// Conversation turns currently held as reasoning context.
    pub fn history_len(&self) -> usize {
        self.shared.lock().history.len()
    }
}

impl Clone for CallSession {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl SessionShared {
    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Move to `next` if the edge exists; log and refuse otherwise.
    fn transition(&self, inner: &mut SessionInner, next: CallState) {
        if inner.state == next {
            return;
        }
        if !inner.state.can_transition(next) {
            warn!(
                call = %self.call_id,
                from = ?inner.state,
                to = ?next,
                "rejected illegal state transition"
            );
            return;
        }
        debug!(call = %self.call_id, from = ?inner.state, to = ?next, "state transition");
        inner.state = next;
    }

    /// Spawn the recurring silence check for the current RECORDING run.
    /// Any previous poll task is cancelled first.
    fn start_silence_poll(self: &Arc<Self>, inner: &mut SessionInner) {
        self.stop_silence_poll(inner);
        let token = CancellationToken::new();
        inner.silence_poll = Some(token.clone());

        let shared = Arc::clone(self);
        let trigger = Duration::from_millis(shared.config.turn.silence_trigger_ms);
        let min_speech = Duration::from_millis(shared.config.turn.min_speech_ms);
        let poll = Duration::from_millis(shared.config.turn.silence_check_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let mut inner = shared.lock();
                if inner.state != CallState::Recording {
                    break;
                }
                let Some(silence_at) = inner.silence_started_at else {
                    continue;
                };
                let silence = silence_at.elapsed();
                let speech = inner
                    .speech_started_at
                    .map_or(Duration::ZERO, |at| at.elapsed());
                // Dual condition: enough silence to call the turn over,
                // enough speech to rule out a short noise burst.
                if silence >= trigger && speech >= min_speech {
                    info!(
                        call = %shared.call_id,
                        speech_ms = speech.as_millis() as u64,
                        silence_ms = silence.as_millis() as u64,
                        "turn end"
                    );
                    shared.begin_processing(&mut inner);
                    break;
                }
            }
        });
    }

    fn stop_silence_poll(&self, inner: &mut SessionInner) {
        if let Some(token) = inner.silence_poll.take() {
            token.cancel();
        }
    }

    /// Enter PROCESSING, drain the utterance buffer, and kick off the
    /// pipeline. PROCESSING doubles as the mutex that keeps at most one
    /// pipeline invocation in flight.
    fn begin_processing(self: &Arc<Self>, inner: &mut SessionInner) {
        if inner.state == CallState::Processing {
            return;
        }
        self.stop_silence_poll(inner);
        self.transition(inner, CallState::Processing);
        let raw = inner.utterance.take();
        inner.silence_started_at = None;
        inner.speech_started_at = None;

        if raw.len() < self.config.turn.min_utterance_bytes {
            debug!(call = %self.call_id, bytes = raw.len(), "utterance too short, skipping");
            self.transition(inner, CallState::Listening);
            return;
        }

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = shared.process_utterance(&raw).await {
                warn!(call = %shared.call_id, error = %e, "pipeline failure, recovering");
                shared.recover_gracefully().await;
            }
        });
    }

    /// The language pipeline: transcribe → lock language → translate →
    /// reason → translate back → speak. Short-circuits to LISTENING on
    /// any empty result.
    async fn process_utterance(self: &Arc<Self>, raw: &[u8]) -> Result<()> {
        let working = self.config.language.working_language.clone();

        info!(call = %self.call_id, bytes = raw.len(), "transcribing utterance");
        let transcription = self.gateway.transcribe(raw).await?;
        let text = transcription.text.trim().to_owned();
        if text.is_empty() {
            debug!(call = %self.call_id, "empty transcription, skipping");
            self.return_to_listening();
            return Ok(());
        }
        debug!(call = %self.call_id, text = %text, "transcribed");

        // Lock the caller's language on the first completed utterance.
        let (lang, just_locked) = {
            let mut inner = self.lock();
            match inner.locked_language.clone() {
                Some(lang) => (lang, false),
                None => {
                    let lang = transcription
                        .language
                        .clone()
                        .unwrap_or_else(|| self.config.language.fallback_language.clone());
                    inner.locked_language = Some(lang.clone());
                    (lang, true)
                }
            }
        };
        if just_locked {
            info!(call = %self.call_id, language = %lang, "language locked");
            if lang != working {
                // Confirm the language to the caller, but keep their
                // question: the pipeline continues with the original
                // transcribed text afterwards.
                let confirm = format!(
                    "I will be speaking with you in {}. Let me answer your question.",
                    language_name(&lang)
                );
                let confirm_local = self.gateway.translate(&confirm, &working, &lang).await?;
                self.speak(&confirm_local).await;
            }
        }

        let query = if lang != working {
            let translated = self.gateway.translate(&text, &lang, &working).await?;
            debug!(call = %self.call_id, query = %translated, "translated query");
            translated
        } else {
            text
        };

        // History is supplied as a read-only snapshot; the gateway
        // cannot mutate the session's copy.
        let history: Vec<ConversationTurn> = self.lock().history.clone();
        let reply = self.gateway.reason(&query, &history).await?;
        debug!(call = %self.call_id, reply = %reply, "reasoned");

        {
            let mut inner = self.lock();
            inner.history.push(ConversationTurn {
                role: Role::Caller,
                text: query,
            });
            inner.history.push(ConversationTurn {
                role: Role::Agent,
                text: reply.clone(),
            });
            let max = self.config.language.max_history_turns;
            if inner.history.len() > max {
                let excess = inner.history.len() - max;
                inner.history.drain(..excess);
            }
        }

        let reply_local = if lang != working {
            self.gateway.translate(&reply, &working, &lang).await?
        } else {
            reply
        };

        self.lock().turn_count += 1;
        self.speak(&reply_local).await;

        // Not interrupted during the reply: resume listening.
        self.return_to_listening();
        Ok(())
    }

    /// Speak `text` to the caller: SPEAKING entry, silence pre-roll,
    /// synthesis, paced streaming, completion mark. Errors are
    /// contained here — state reverts to LISTENING and nothing
    /// propagates.
    async fn speak(self: &Arc<Self>, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        let cancel = {
            let mut inner = self.lock();
            if inner.state != CallState::Speaking && !inner.state.can_transition(CallState::Speaking)
            {
                // Torn down, or the caller took the floor mid-pipeline.
                debug!(call = %self.call_id, state = ?inner.state, "skipping speak");
                return;
            }
            self.transition(&mut inner, CallState::Speaking);
            inner.interrupt_requested = false;
            let token = CancellationToken::new();
            inner.speak_cancel = Some(token.clone());
            token
        };

        let result = self.speak_audio(text, &cancel).await;

        let mut inner = self.lock();
        inner.speak_cancel = None;
        if let Err(e) = result {
            warn!(call = %self.call_id, error = %e, "speak failed");
            if inner.state == CallState::Speaking {
                self.transition(&mut inner, CallState::Listening);
            }
        }
    }

    async fn speak_audio(&self, text: &str, cancel: &CancellationToken) -> Result<()> {
        // Brief thinking pause before the reply; masks synthesis
        // latency and reads as more natural on the phone.
        let pre_roll = codec::silence(
            self.config.turn.thinking_pause_ms,
            self.config.audio.telephony_sample_rate,
        );
        self.transport.stream(&pre_roll, cancel).await;
        if cancel.is_cancelled() {
            debug!(call = %self.call_id, "speak cancelled during pre-roll");
            return Ok(());
        }

        let language = self
            .lock()
            .locked_language
            .clone()
            .unwrap_or_else(|| self.config.language.working_language.clone());
        let audio = self.gateway.synthesize(text, &language).await?;

        if cancel.is_cancelled() || self.lock().interrupt_requested {
            debug!(call = %self.call_id, "speak aborted before send");
            return Ok(());
        }
        if audio.is_empty() {
            debug!(call = %self.call_id, "synthesizer returned no audio");
            return Ok(());
        }

        let outcome = self.transport.stream(&audio, cancel).await;
        if outcome == StreamOutcome::Completed && !self.lock().interrupt_requested {
            let mark = format!("end-{}", uuid::Uuid::new_v4());
            self.transport.send_mark(&mark);
            info!(call = %self.call_id, bytes = audio.len(), mark = %mark, "reply audio sent");
        }
        Ok(())
    }

    /// Best-effort "please repeat that" in the caller's language, then
    /// an unconditional return to LISTENING.
    async fn recover_gracefully(self: &Arc<Self>) {
        let working = self.config.language.working_language.clone();
        let message = self.config.language.recovery_message.clone();
        let locked = self.lock().locked_language.clone();

        let spoken = match locked {
            Some(lang) if lang != working => {
                match self.gateway.translate(&message, &working, &lang).await {
                    Ok(translated) => translated,
                    Err(e) => {
                        warn!(call = %self.call_id, error = %e, "recovery translation failed");
                        message
                    }
                }
            }
            _ => message,
        };
        self.speak(&spoken).await;

        let mut inner = self.lock();
        if !matches!(inner.state, CallState::Idle | CallState::Recording) {
            self.transition(&mut inner, CallState::Listening);
        }
    }

    fn return_to_listening(self: &Arc<Self>) {
        let mut inner = self.lock();
        if matches!(inner.state, CallState::Processing | CallState::Speaking) {
            self.transition(&mut inner, CallState::Listening);
        }
    }
}
