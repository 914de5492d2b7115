//! Lilt: real-time call core for a telephone conversational voice
//! agent.
//!
//! For each active call the core ingests a stream of companded audio,
//! decides when the caller has finished speaking, drives the language
//! pipeline (speech recognition → language locking → translation →
//! reasoning → translation back → synthesis), and streams the reply
//! back as timed frames — while staying responsive to the caller
//! interrupting mid-reply.
//!
//! # Architecture
//!
//! - **audio**: companding codec, anti-aliased resampler, energy VAD
//! - **session**: the per-call state machine and pipeline orchestration
//! - **transport**: frame pacing and the JSON media stream protocol
//! - **gateway**: the remote AI collaborator boundary
//! - **server**: WebSocket endpoint, one connection per call

pub mod audio;
pub mod config;
pub mod error;
pub mod gateway;
pub mod server;
pub mod session;
pub mod transport;

pub use config::CallConfig;
pub use error::{CallError, Result};
pub use gateway::{AiGateway, ConversationTurn, Role, Transcription};
pub use session::CallSession;
pub use session::state::CallState;
pub use transport::{AudioOutputTransport, MediaSink, StreamOutcome};
