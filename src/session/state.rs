//! Closed state type for the per-call state machine.

/// Lifecycle state of one call session. Exactly one value at a time;
/// mutated only through [`CallState::can_transition`]-checked edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// No call in progress, or the call has been torn down.
    Idle,
    /// Speaking the opening greeting.
    Greeting,
    /// Waiting for the caller to start speaking.
    Listening,
    /// Accumulating the caller's utterance.
    Recording,
    /// Running the language pipeline; acts as a mutex so only one
    /// pipeline invocation is in flight per session.
    Processing,
    /// Streaming a synthesized reply to the caller.
    Speaking,
}

impl CallState {
    /// Whether the edge `self → next` is part of the state machine.
    ///
    /// `Idle` is the terminal teardown state and is reachable from
    /// everywhere. `Listening → Speaking` exists only for the
    /// first-turn acknowledgement window: a playback-finished echo can
    /// move the session to `Listening` between the acknowledgement and
    /// the final reply of the same pipeline run.
    pub fn can_transition(self, next: CallState) -> bool {
        use CallState::{Greeting, Idle, Listening, Processing, Recording, Speaking};
        if next == Idle {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Greeting)
                | (Greeting, Speaking)
                | (Greeting, Listening)
                | (Listening, Recording)
                | (Listening, Speaking)
                | (Recording, Processing)
                | (Recording, Listening)
                | (Processing, Speaking)
                | (Processing, Listening)
                | (Speaking, Listening)
                | (Speaking, Recording)
        )
    }
}
