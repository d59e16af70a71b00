//! Per-peer connection state machine.
//!
//! Drives an externally provided transport (in the browser original, an
//! RTCPeerConnection) through offer/answer negotiation relayed over the
//! signaling channel, then carries JSON game messages over the data
//! channel. ICE candidates that arrive before the remote description is
//! set are queued and flushed once it is; dropping early candidates
//! silently breaks connectivity.

use log::{debug, warn};
use serde_json::Value;
use thiserror::Error;

use crate::message::{NegotiationMessage, PeerMessage};

/// How long a latency probe waits for its pong.
pub const PING_TIMEOUT_MS: i64 = 5000;

#[derive(Debug, Error)]
#[error("transport: {0}")]
pub struct TransportError(pub String);

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("data channel to {0} not available yet")]
    NotConnected(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("bad peer message: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The connection-negotiation primitive this protocol drives. One
/// transport per peer pair; methods mirror the negotiation steps the
/// relay's payloads describe.
pub trait PeerTransport {
    /// Produces a local offer, beginning negotiation.
    fn create_offer(&mut self) -> Result<Value, TransportError>;
    /// Accepts a remote offer, producing the local answer.
    fn accept_offer(&mut self, sdp: &Value) -> Result<Value, TransportError>;
    /// Applies the remote answer to our earlier offer.
    fn accept_answer(&mut self, sdp: &Value) -> Result<(), TransportError>;
    /// Applies a remote ICE candidate. Only called once a remote
    /// description is in place.
    fn add_candidate(&mut self, candidate: &Value) -> Result<(), TransportError>;
    /// Sends one frame over the data channel.
    fn send(&mut self, frame: &str) -> Result<(), TransportError>;
}

impl<T: PeerTransport + ?Sized> PeerTransport for Box<T> {
    fn create_offer(&mut self) -> Result<Value, TransportError> {
        (**self).create_offer()
    }

    fn accept_offer(&mut self, sdp: &Value) -> Result<Value, TransportError> {
        (**self).accept_offer(sdp)
    }

    fn accept_answer(&mut self, sdp: &Value) -> Result<(), TransportError> {
        (**self).accept_answer(sdp)
    }

    fn add_candidate(&mut self, candidate: &Value) -> Result<(), TransportError> {
        (**self).add_candidate(candidate)
    }

    fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        (**self).send(frame)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    Idle,
    Negotiating,
    Connected,
    Closed,
}

/// Things a connection wants its owner to act on, drained after every
/// handler call.
#[derive(Clone, Debug, PartialEq)]
pub enum PeerEvent {
    /// Relay this payload to the peer through the signaling channel.
    Relay(NegotiationMessage),
    /// The data channel opened; game traffic can flow.
    ChannelOpen,
    /// A decoded message arrived from the peer.
    Message(PeerMessage),
    /// A latency probe completed.
    Latency(i64),
    /// The connection is gone; drop the peer from round bookkeeping.
    Closed,
}

struct Probe {
    deadline: i64,
}

pub struct PeerConnection<T> {
    peer: String,
    transport: T,
    state: PeerState,
    /// `Some` while candidates must still be queued (no remote
    /// description yet); `None` once flushed.
    pending_candidates: Option<Vec<Value>>,
    channel_open: bool,
    probe: Option<Probe>,
    events: Vec<PeerEvent>,
}

impl<T: PeerTransport> PeerConnection<T> {
    pub fn new(peer: &str, transport: T) -> Self {
        Self {
            peer: peer.into(),
            transport,
            state: PeerState::Idle,
            pending_candidates: Some(Vec::new()),
            channel_open: false,
            probe: None,
            events: Vec::new(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn channel_available(&self) -> bool {
        self.channel_open
    }

    /// Takes all accumulated events.
    pub fn drain_events(&mut self) -> Vec<PeerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Initiates negotiation (we are the offering side).
    pub fn connect(&mut self) {
        match self.transport.create_offer() {
            Ok(sdp) => {
                self.state = PeerState::Negotiating;
                self.events.push(PeerEvent::Relay(NegotiationMessage::Start { sdp }));
            }
            Err(e) => self.establishment_error(e),
        }
    }

    /// Handles a negotiation payload relayed from this peer.
    pub fn handle_relay(&mut self, message: NegotiationMessage) {
        if self.state == PeerState::Closed {
            debug!("dropping relay for closed connection to {}", self.peer);
            return;
        }
        match message {
            NegotiationMessage::Start { sdp } => {
                debug!("got connection invitation from {}", self.peer);
                match self.transport.accept_offer(&sdp) {
                    Ok(answer) => {
                        self.state = PeerState::Negotiating;
                        self.events.push(PeerEvent::Relay(
                            NegotiationMessage::Response { sdp: answer }));
                        self.flush_candidates();
                    }
                    Err(e) => self.establishment_error(e),
                }
            }
            NegotiationMessage::Response { sdp } => {
                debug!("got connection response from {}", self.peer);
                match self.transport.accept_answer(&sdp) {
                    Ok(()) => self.flush_candidates(),
                    Err(e) => self.establishment_error(e),
                }
            }
            NegotiationMessage::NewIceCandidate { candidate } => {
                if let Some(pending) = &mut self.pending_candidates {
                    // no remote description yet
                    pending.push(candidate);
                } else if let Err(e) = self.transport.add_candidate(&candidate) {
                    self.establishment_error(e);
                }
            }
        }
    }

    /// The transport surfaced a local ICE candidate to pass along.
    pub fn local_candidate(&mut self, candidate: Value) {
        self.events.push(PeerEvent::Relay(
            NegotiationMessage::NewIceCandidate { candidate }));
    }

    /// The transport's data channel opened.
    pub fn channel_opened(&mut self) {
        debug!("data channel to {} available", self.peer);
        self.channel_open = true;
        self.state = PeerState::Connected;
        self.events.push(PeerEvent::ChannelOpen);
    }

    /// A frame arrived on the data channel.
    pub fn channel_message(&mut self, frame: &str, now: i64) {
        let message: PeerMessage = match serde_json::from_str(frame) {
            Ok(m) => m,
            Err(e) => {
                warn!("undecodable frame from {}: {}", self.peer, e);
                return;
            }
        };
        match message {
            PeerMessage::Ping { time } => {
                if let Err(e) = self.send(&PeerMessage::Pong { time }) {
                    warn!("failed to answer ping from {}: {}", self.peer, e);
                }
            }
            PeerMessage::Pong { time } => {
                if self.probe.take().is_some() {
                    self.events.push(PeerEvent::Latency(now - time));
                } else {
                    debug!("unsolicited pong from {}", self.peer);
                }
            }
            other => self.events.push(PeerEvent::Message(other)),
        }
    }

    /// The transport reports the connection failed or closed.
    pub fn channel_closed(&mut self) {
        self.close();
    }

    pub fn close(&mut self) {
        if self.state != PeerState::Closed {
            self.state = PeerState::Closed;
            self.channel_open = false;
            self.events.push(PeerEvent::Closed);
        }
    }

    /// Measures round-trip latency once. The result (or nothing, if the
    /// pong never arrives) surfaces as [`PeerEvent::Latency`].
    pub fn probe_latency(&mut self, now: i64) -> Result<(), PeerError> {
        self.send(&PeerMessage::Ping { time: now })?;
        self.probe = Some(Probe { deadline: now + PING_TIMEOUT_MS });
        Ok(())
    }

    /// Expires timed-out probes.
    pub fn tick(&mut self, now: i64) {
        if self.probe.as_ref().is_some_and(|p| now >= p.deadline) {
            debug!("latency probe to {} timed out", self.peer);
            self.probe = None;
        }
    }

    pub fn send(&mut self, message: &PeerMessage) -> Result<(), PeerError> {
        if !self.channel_open {
            return Err(PeerError::NotConnected(self.peer.clone()));
        }
        let frame = serde_json::to_string(message)?;
        self.transport.send(&frame)?;
        Ok(())
    }

    /// Applies candidates queued before the remote description existed.
    fn flush_candidates(&mut self) {
        let Some(pending) = self.pending_candidates.take() else {
            return;
        };
        for candidate in pending {
            if let Err(e) = self.transport.add_candidate(&candidate) {
                self.establishment_error(e);
                return;
            }
        }
    }

    fn establishment_error(&mut self, e: TransportError) {
        warn!("connection to {} failed: {}", self.peer, e);
        self.close();
    }
}
