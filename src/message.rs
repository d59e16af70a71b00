//! Wire formats: JSON messages tagged by an `action` field.
//!
//! Three vocabularies share the tag convention: messages exchanged with
//! the signaling relay, connection-negotiation payloads it relays opaquely
//! between two peers, and messages sent directly peer-to-peer once a data
//! channel is up.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::singing::SungNote;

/// Identity info the relay holds for each member.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub nick: String,
    pub colour: String,
    #[serde(default)]
    pub id: Option<u64>,
}

/// Messages from the signaling relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ServerMessage {
    /// Our own connection acknowledgment, assigning our channel id.
    #[serde(rename = "hello")]
    Hello { channel: String },
    /// The relay rejected or dropped us.
    #[serde(rename = "goodbye")]
    Goodbye { message: String },
    #[serde(rename = "new_member")]
    NewMember {
        channel: String,
        nick: String,
        colour: String,
        #[serde(default)]
        id: Option<u64>,
    },
    #[serde(rename = "member_list")]
    MemberList { members: BTreeMap<String, MemberInfo> },
    #[serde(rename = "member_left")]
    MemberLeft { channel: String, nick: String },
    /// Opaque envelope from another peer, carrying negotiation payload.
    #[serde(rename = "relay")]
    Relay { origin: String, message: NegotiationMessage },
    #[serde(rename = "playlist")]
    Playlist { playlist: Vec<u32> },
}

/// Messages to the signaling relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ClientMessage {
    #[serde(rename = "hello")]
    Hello { nick: String },
    #[serde(rename = "relay")]
    Relay { target: String, message: NegotiationMessage },
    #[serde(rename = "addToQueue")]
    AddToQueue { song: u32 },
    #[serde(rename = "removeFromQueue")]
    RemoveFromQueue { song: u32 },
}

/// Connection-negotiation payloads relayed between two peers. Session
/// descriptions and candidates are opaque to this protocol; only the
/// transport interprets them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum NegotiationMessage {
    /// Offer from the connection initiator.
    #[serde(rename = "rtc-start")]
    Start { sdp: serde_json::Value },
    /// Answer from the accepting side.
    #[serde(rename = "rtc-response")]
    Response { sdp: serde_json::Value },
    #[serde(rename = "new-ice-candidate")]
    NewIceCandidate { candidate: serde_json::Value },
}

/// Messages exchanged directly between peers over a data channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum PeerMessage {
    /// Latency probe. `time` is echoed back in the pong.
    #[serde(rename = "ping")]
    Ping { time: i64 },
    #[serde(rename = "pong")]
    Pong { time: i64 },
    /// Ready for the next round, singing the given part.
    #[serde(rename = "readyToGo")]
    ReadyToGo { part: usize },
    /// Master's track selection for the round.
    #[serde(rename = "loadTrack")]
    LoadTrack { track: u32 },
    #[serde(rename = "trackLoaded")]
    TrackLoaded,
    /// Master's synchronized start time, on the shared clock.
    #[serde(rename = "startGame")]
    StartGame { time: i64 },
    /// Notes committed since the last broadcast, plus the current score.
    #[serde(rename = "sangNotes")]
    SangNotes { notes: Vec<SungNote>, score: u32 },
}
