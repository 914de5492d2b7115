//! End-to-end call session scenarios against a scripted gateway.
//!
//! Time is virtual (`start_paused`): inbound frames are fed 20 ms
//! apart and the silence-check task, frame pacing, and pre-roll all
//! run on the paused clock.

use lilt::audio::codec;
use lilt::config::CallConfig;
use lilt::session::CallSession;
use lilt::transport::MediaSink;
use lilt::transport::protocol::{OutboundEvent, decode_payload};
use lilt::{AiGateway, CallError, CallState, ConversationTurn, Result, Transcription};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, advance, sleep};

// ── Test doubles ─────────────────────────────────────────────────────

struct MockGateway {
    transcriptions: Mutex<VecDeque<Transcription>>,
    /// Virtual-clock latency injected into `transcribe`, to hold the
    /// session in PROCESSING long enough to observe it.
    transcribe_delay_ms: AtomicUsize,
    reason_fails: AtomicBool,
    synth_empty: AtomicBool,
    /// Length of the synthesized audio in companded bytes.
    synth_len: AtomicUsize,
    transcribe_calls: AtomicUsize,
    translate_calls: AtomicUsize,
    reason_calls: AtomicUsize,
    synthesize_calls: AtomicUsize,
}

impl MockGateway {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            transcriptions: Mutex::new(VecDeque::new()),
            transcribe_delay_ms: AtomicUsize::new(0),
            reason_fails: AtomicBool::new(false),
            synth_empty: AtomicBool::new(false),
            synth_len: AtomicUsize::new(1_600), // 200 ms at 8 kHz
            transcribe_calls: AtomicUsize::new(0),
            translate_calls: AtomicUsize::new(0),
            reason_calls: AtomicUsize::new(0),
            synthesize_calls: AtomicUsize::new(0),
        })
    }

    fn script_transcription(&self, text: &str, language: Option<&str>) {
        self.transcriptions
            .lock()
            .expect("script lock")
            .push_back(Transcription {
                text: text.to_owned(),
                language: language.map(str::to_owned),
            });
    }

    fn reset_counts(&self) {
        self.transcribe_calls.store(0, Ordering::Relaxed);
        self.translate_calls.store(0, Ordering::Relaxed);
        self.reason_calls.store(0, Ordering::Relaxed);
        self.synthesize_calls.store(0, Ordering::Relaxed);
    }
}

#[async_trait]
impl AiGateway for MockGateway {
    async fn transcribe(&self, _audio: &[u8]) -> Result<Transcription> {
        self.transcribe_calls.fetch_add(1, Ordering::Relaxed);
        let delay = self.transcribe_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            sleep(Duration::from_millis(delay as u64)).await;
        }
        Ok(self
            .transcriptions
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Transcription {
                text: "what is the recommended dosage".to_owned(),
                language: Some("en".to_owned()),
            }))
    }

    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String> {
        self.translate_calls.fetch_add(1, Ordering::Relaxed);
        if from == to {
            return Ok(text.to_owned());
        }
        Ok(format!("{text} ({from}>{to})"))
    }

    async fn reason(&self, _query: &str, _history: &[ConversationTurn]) -> Result<String> {
        self.reason_calls.fetch_add(1, Ordering::Relaxed);
        if self.reason_fails.load(Ordering::Relaxed) {
            return Err(CallError::Gateway("reasoning backend unavailable".to_owned()));
        }
        Ok("ten milligrams once daily".to_owned())
    }

    async fn synthesize(&self, _text: &str, _language: &str) -> Result<Vec<u8>> {
        self.synthesize_calls.fetch_add(1, Ordering::Relaxed);
        if self.synth_empty.load(Ordering::Relaxed) {
            return Ok(Vec::new());
        }
        Ok(vec![0x7f; self.synth_len.load(Ordering::Relaxed)])
    }
}

struct CollectingSink {
    events: Mutex<Vec<OutboundEvent>>,
    open: AtomicBool,
}

impl CollectingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
        })
    }

    fn events(&self) -> Vec<OutboundEvent> {
        self.events.lock().expect("sink lock").clone()
    }

    fn clear(&self) {
        self.events.lock().expect("sink lock").clear();
    }

    fn count_marks(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, OutboundEvent::Mark { .. }))
            .count()
    }

    fn count_clears(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, OutboundEvent::Clear { .. }))
            .count()
    }
}

impl MediaSink for CollectingSink {
    fn send(&self, event: OutboundEvent) {
        self.events.lock().expect("sink lock").push(event);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn build_session(
    config: CallConfig,
    gateway: &Arc<MockGateway>,
) -> (CallSession, Arc<CollectingSink>) {
    let sink = CollectingSink::new();
    let session = CallSession::new(
        Arc::new(config),
        Arc::clone(gateway) as Arc<dyn AiGateway>,
        Arc::clone(&sink) as Arc<dyn MediaSink>,
        "MZ-test-stream".to_owned(),
        "CA123456",
    );
    (session, sink)
}

/// Run the greeting and discard its traffic so scenarios start clean
/// in LISTENING.
async fn start_listening(session: &CallSession, sink: &CollectingSink, gateway: &MockGateway) {
    session.start().await;
    assert_eq!(session.state(), CallState::Listening);
    sink.clear();
    gateway.reset_counts();
}

/// One 20 ms companded frame of a constant-amplitude tone.
fn tone_chunk(amplitude: i16) -> Vec<u8> {
    codec::encode(&vec![amplitude; 160])
}

fn speech_chunk() -> Vec<u8> {
    tone_chunk(4_000)
}

fn silence_chunk() -> Vec<u8> {
    codec::silence(20, 8_000)
}

/// Feed `n` copies of a chunk, 20 ms apart on the virtual clock.
async fn feed(session: &CallSession, chunk: &[u8], n: usize) {
    for _ in 0..n {
        session.handle_media(chunk.to_vec());
        advance(Duration::from_millis(20)).await;
    }
}

async fn wait_for_state(session: &CallSession, state: CallState) {
    for _ in 0..1_000 {
        if session.state() == state {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {state:?}, stuck in {:?}", session.state());
}

/// Let the in-flight pipeline and any paced audio drain.
async fn settle() {
    sleep(Duration::from_secs(5)).await;
}

// ── Scenarios ────────────────────────────────────────────────────────

/// Scenario A: sub-threshold audio never starts a recording.
#[tokio::test(start_paused = true)]
async fn quiet_audio_never_enters_recording() {
    let gateway = MockGateway::new();
    let (session, sink) = build_session(CallConfig::default(), &gateway);
    start_listening(&session, &sink, &gateway).await;

    feed(&session, &tone_chunk(100), 100).await; // 2 s of quiet noise
    settle().await;

    assert_eq!(session.state(), CallState::Listening);
    assert_eq!(session.utterance_bytes(), 0);
    assert_eq!(gateway.transcribe_calls.load(Ordering::Relaxed), 0);
}

/// Scenario B: 600 ms of speech then 1600 ms of silence ends the turn
/// and runs the pipeline exactly once.
#[tokio::test(start_paused = true)]
async fn speech_then_silence_processes_exactly_once() {
    let gateway = MockGateway::new();
    let (session, sink) = build_session(CallConfig::default(), &gateway);
    start_listening(&session, &sink, &gateway).await;

    feed(&session, &speech_chunk(), 30).await; // 600 ms speech
    assert_eq!(session.state(), CallState::Recording);
    feed(&session, &silence_chunk(), 80).await; // 1600 ms silence
    settle().await;

    assert_eq!(gateway.transcribe_calls.load(Ordering::Relaxed), 1);
    assert_eq!(gateway.reason_calls.load(Ordering::Relaxed), 1);
    assert_eq!(session.turn_count(), 1);
    assert_eq!(session.state(), CallState::Listening);
    // The reply went out as paced media frames followed by one mark.
    assert_eq!(sink.count_marks(), 1);
    assert!(matches!(
        sink.events().last(),
        Some(OutboundEvent::Mark { .. })
    ));
}

/// Scenario C: while speaking, 1.4× the energy threshold is ignored
/// and 1.6× interrupts.
#[tokio::test(start_paused = true)]
async fn barge_in_requires_the_raised_threshold() {
    let gateway = MockGateway::new();
    gateway.synth_len.store(16_000, Ordering::Relaxed); // 2 s reply
    let (session, sink) = build_session(CallConfig::default(), &gateway);
    start_listening(&session, &sink, &gateway).await;

    feed(&session, &speech_chunk(), 30).await;
    feed(&session, &silence_chunk(), 80).await;
    wait_for_state(&session, CallState::Speaking).await;
    sink.clear();

    // 1.4× threshold: ordinary loud background, not barge-in.
    session.handle_media(tone_chunk(490));
    assert_eq!(session.state(), CallState::Speaking);
    assert_eq!(sink.count_clears(), 0);

    // 1.6× threshold: deliberate interruption.
    session.handle_media(tone_chunk(560));
    assert_eq!(session.state(), CallState::Recording);
    assert_eq!(sink.count_clears(), 1);
    // The interrupting chunk seeds the new utterance.
    assert_eq!(session.utterance_bytes(), 160);
}

/// Scenario D: empty synthesis emits no reply audio and no mark.
#[tokio::test(start_paused = true)]
async fn empty_synthesis_is_a_noop() {
    let gateway = MockGateway::new();
    let (session, sink) = build_session(CallConfig::default(), &gateway);
    start_listening(&session, &sink, &gateway).await;
    gateway.synth_empty.store(true, Ordering::Relaxed);

    feed(&session, &speech_chunk(), 30).await;
    feed(&session, &silence_chunk(), 80).await;
    settle().await;

    assert_eq!(session.state(), CallState::Listening);
    assert_eq!(sink.count_marks(), 0);
    // Only the silence pre-roll went out, no synthesized audio.
    for event in sink.events() {
        match event {
            OutboundEvent::Media { media, .. } => {
                assert!(decode_payload(&media).iter().all(|&b| b == 0xff));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}

/// Scenario E: a reasoning failure speaks one recovery message and
/// always lands back in LISTENING.
#[tokio::test(start_paused = true)]
async fn reasoning_failure_recovers_to_listening() {
    let gateway = MockGateway::new();
    let (session, sink) = build_session(CallConfig::default(), &gateway);
    start_listening(&session, &sink, &gateway).await;
    gateway.reason_fails.store(true, Ordering::Relaxed);

    feed(&session, &speech_chunk(), 30).await;
    feed(&session, &silence_chunk(), 80).await;
    settle().await;

    assert_eq!(gateway.reason_calls.load(Ordering::Relaxed), 1);
    // Exactly one speak attempt: the recovery message.
    assert_eq!(gateway.synthesize_calls.load(Ordering::Relaxed), 1);
    assert_eq!(session.state(), CallState::Listening);
    assert_eq!(session.turn_count(), 0);
}

// ── Invariants ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn language_locks_on_first_utterance_and_never_changes() {
    let gateway = MockGateway::new();
    gateway.script_transcription("mujhe khuraak bataiye", Some("hi"));
    gateway.script_transcription("dhanyavaad", Some("es")); // detection noise
    let (session, sink) = build_session(CallConfig::default(), &gateway);
    start_listening(&session, &sink, &gateway).await;

    feed(&session, &speech_chunk(), 30).await;
    feed(&session, &silence_chunk(), 80).await;
    settle().await;

    assert_eq!(session.locked_language().as_deref(), Some("hi"));
    assert_eq!(session.turn_count(), 1);
    // First turn in a non-working language: acknowledgement + reply,
    // so two synthesis calls.
    assert_eq!(gateway.synthesize_calls.load(Ordering::Relaxed), 2);

    // Second turn reports a different detection; the lock must hold.
    feed(&session, &speech_chunk(), 30).await;
    feed(&session, &silence_chunk(), 80).await;
    settle().await;

    assert_eq!(session.locked_language().as_deref(), Some("hi"));
    assert_eq!(session.turn_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn missing_detection_falls_back_to_configured_language() {
    let gateway = MockGateway::new();
    gateway.script_transcription("hello there", None);
    let (session, sink) = build_session(CallConfig::default(), &gateway);
    start_listening(&session, &sink, &gateway).await;

    feed(&session, &speech_chunk(), 30).await;
    feed(&session, &silence_chunk(), 80).await;
    settle().await;

    assert_eq!(session.locked_language().as_deref(), Some("en"));
    // Working language equals locked language: no translation at all.
    assert_eq!(gateway.translate_calls.load(Ordering::Relaxed), 0);
}

#[tokio::test(start_paused = true)]
async fn repeated_interrupts_cancel_at_most_once() {
    let gateway = MockGateway::new();
    gateway.synth_len.store(16_000, Ordering::Relaxed);
    let (session, sink) = build_session(CallConfig::default(), &gateway);
    start_listening(&session, &sink, &gateway).await;

    feed(&session, &speech_chunk(), 30).await;
    feed(&session, &silence_chunk(), 80).await;
    wait_for_state(&session, CallState::Speaking).await;
    sink.clear();

    // Hammer the interruption path.
    session.handle_media(tone_chunk(2_000));
    session.handle_media(tone_chunk(2_000));
    session.handle_media(tone_chunk(2_000));

    assert_eq!(session.state(), CallState::Recording);
    // One flush for the one real interruption; the later chunks were
    // ordinary recording appends.
    assert_eq!(sink.count_clears(), 1);
    assert_eq!(session.utterance_bytes(), 480);

    settle().await;
    // The cancelled reply never completed, so no mark was sent.
    assert_eq!(sink.count_marks(), 0);
}

#[tokio::test(start_paused = true)]
async fn utterance_cap_forces_turn_end() {
    let gateway = MockGateway::new();
    let mut config = CallConfig::default();
    config.turn.max_utterance_secs = 1; // 8 000 byte cap
    let (session, sink) = build_session(config, &gateway);
    start_listening(&session, &sink, &gateway).await;

    // A caller who never pauses: 2 s of continuous speech.
    for _ in 0..100 {
        session.handle_media(speech_chunk());
        assert!(session.utterance_bytes() <= 8_000);
        advance(Duration::from_millis(20)).await;
    }
    settle().await;

    assert_eq!(gateway.transcribe_calls.load(Ordering::Relaxed), 1);
    assert_eq!(session.turn_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn short_utterances_are_discarded_without_the_pipeline() {
    let gateway = MockGateway::new();
    let mut config = CallConfig::default();
    config.turn.min_utterance_bytes = 50_000; // larger than the burst
    let (session, sink) = build_session(config, &gateway);
    start_listening(&session, &sink, &gateway).await;

    feed(&session, &speech_chunk(), 30).await;
    feed(&session, &silence_chunk(), 80).await;
    settle().await;

    assert_eq!(session.state(), CallState::Listening);
    assert_eq!(gateway.transcribe_calls.load(Ordering::Relaxed), 0);
    assert_eq!(session.utterance_bytes(), 0);
}

#[tokio::test(start_paused = true)]
async fn history_is_a_sliding_window() {
    let gateway = MockGateway::new();
    let mut config = CallConfig::default();
    config.language.max_history_turns = 4;
    let (session, sink) = build_session(config, &gateway);
    start_listening(&session, &sink, &gateway).await;

    for _ in 0..3 {
        feed(&session, &speech_chunk(), 30).await;
        feed(&session, &silence_chunk(), 80).await;
        settle().await;
    }

    assert_eq!(session.turn_count(), 3);
    // Three turns added six entries; the window holds the last four.
    assert_eq!(session.history_len(), 4);
}

#[tokio::test(start_paused = true)]
async fn mark_echo_while_speaking_returns_to_listening() {
    let gateway = MockGateway::new();
    gateway.synth_len.store(16_000, Ordering::Relaxed);
    let (session, sink) = build_session(CallConfig::default(), &gateway);
    start_listening(&session, &sink, &gateway).await;

    feed(&session, &speech_chunk(), 30).await;
    feed(&session, &silence_chunk(), 80).await;
    wait_for_state(&session, CallState::Speaking).await;

    session.handle_mark("end-greeting");
    assert_eq!(session.state(), CallState::Listening);
}

#[tokio::test(start_paused = true)]
async fn speech_during_processing_is_stashed_not_dropped() {
    let gateway = MockGateway::new();
    gateway.transcribe_delay_ms.store(2_000, Ordering::Relaxed);
    let (session, sink) = build_session(CallConfig::default(), &gateway);
    start_listening(&session, &sink, &gateway).await;

    feed(&session, &speech_chunk(), 30).await;
    feed(&session, &silence_chunk(), 80).await;
    wait_for_state(&session, CallState::Processing).await;

    session.handle_media(speech_chunk());
    session.handle_media(speech_chunk());
    assert_eq!(session.utterance_bytes(), 320);

    settle().await;
    assert_eq!(session.state(), CallState::Listening);
}

#[tokio::test(start_paused = true)]
async fn teardown_mid_recording_cancels_the_silence_timer() {
    let gateway = MockGateway::new();
    let (session, sink) = build_session(CallConfig::default(), &gateway);
    start_listening(&session, &sink, &gateway).await;

    feed(&session, &speech_chunk(), 30).await;
    assert_eq!(session.state(), CallState::Recording);

    session.stop();
    assert_eq!(session.state(), CallState::Idle);

    // Nothing fires after the call is gone.
    settle().await;
    assert_eq!(gateway.transcribe_calls.load(Ordering::Relaxed), 0);
    assert_eq!(session.state(), CallState::Idle);
    assert_eq!(session.utterance_bytes(), 0);
    assert_eq!(session.history_len(), 0);
}
