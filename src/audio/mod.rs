//! Signal-processing primitives for the telephony leg.
//!
//! Everything in here is a pure transform with no awareness of call
//! state: the companding codec, the anti-aliased downsampler, and the
//! energy-based voice activity detector.

pub mod codec;
pub mod resample;
pub mod vad;
