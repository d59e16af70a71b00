//! Networked karaoke game core: pitch detection, UltraStar chart
//! scoring, and peer-to-peer session synchronization.
//!
//! The crate is transport-agnostic. Audio capture, the signaling
//! socket, and the peer transport are provided by the embedder; this
//! library turns captured samples into scored notes and keeps a party
//! of peers playing the same track at the same time.

pub mod chart;
pub mod clock;
pub mod config;
pub mod dsp;
pub mod message;
pub mod party;
pub mod peer;
pub mod pitch;
pub mod player;
pub mod score;
pub mod session;
pub mod singing;
