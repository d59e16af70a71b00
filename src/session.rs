//! Signaling-relay session: membership events, relay routing, and the
//! table of peer connections.
//!
//! The relay socket itself is external. The embedder decodes incoming
//! frames into [`ServerMessage`]s and feeds them in, ships everything in
//! the outbox back to the relay, and forwards data-channel events from
//! the transports.

use std::collections::{BTreeMap, HashMap};

use log::{debug, info, warn};

use crate::message::{ClientMessage, MemberInfo, PeerMessage, ServerMessage};
use crate::peer::{PeerConnection, PeerError, PeerEvent, PeerTransport};

/// Creates transports toward newly discovered peers.
pub trait TransportFactory {
    type Transport: PeerTransport;
    fn transport(&mut self, peer: &str) -> Self::Transport;
}

impl<T: PeerTransport, F: FnMut(&str) -> T> TransportFactory for F {
    type Transport = T;

    fn transport(&mut self, peer: &str) -> T {
        self(peer)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// The relay acknowledged us; our channel id is known.
    Connected,
    /// The relay rejected or dropped us.
    Disconnected { reason: String },
    MemberList(BTreeMap<String, MemberInfo>),
    NewMember { channel: String, info: MemberInfo },
    MemberLeft { channel: String, nick: String },
    PlaylistUpdated(Vec<u32>),
    /// The data channel to a peer opened.
    ChannelEstablished(String),
    /// A game message arrived from a peer.
    Peer { peer: String, message: PeerMessage },
    /// A latency probe to a peer completed.
    Latency { peer: String, ms: i64 },
    /// A peer's connection failed or closed.
    ConnectionLost(String),
}

pub struct NetworkSession<F: TransportFactory> {
    nick: String,
    channel_name: Option<String>,
    members: BTreeMap<String, MemberInfo>,
    connections: HashMap<String, PeerConnection<F::Transport>>,
    factory: F,
    outbox: Vec<ClientMessage>,
    events: Vec<SessionEvent>,
}

impl<F: TransportFactory> NetworkSession<F> {
    pub fn new(nick: &str, factory: F) -> Self {
        Self {
            nick: nick.into(),
            channel_name: None,
            members: BTreeMap::new(),
            connections: HashMap::new(),
            factory,
            outbox: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Our channel id, once the relay has said hello.
    pub fn channel_name(&self) -> Option<&str> {
        self.channel_name.as_deref()
    }

    pub fn members(&self) -> &BTreeMap<String, MemberInfo> {
        &self.members
    }

    /// Messages waiting to be shipped to the relay.
    pub fn drain_outbox(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.outbox)
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Queues a message to the relay.
    pub fn send_to_server(&mut self, message: ClientMessage) {
        self.outbox.push(message);
    }

    /// Handles one decoded frame from the relay.
    pub fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Hello { channel } => {
                self.channel_name = Some(channel);
                self.outbox.push(ClientMessage::Hello { nick: self.nick.clone() });
                self.events.push(SessionEvent::Connected);
            }
            ServerMessage::Goodbye { message } => {
                info!("relay said goodbye: {}", message);
                self.events.push(SessionEvent::Disconnected { reason: message });
            }
            ServerMessage::NewMember { channel, nick, colour, id } => {
                let info = MemberInfo { nick, colour, id };
                if self.channel_name.as_deref() == Some(channel.as_str()) {
                    debug!("we're in");
                } else {
                    info!("new member {} ({}), connecting", info.nick, channel);
                    self.connection(&channel).connect();
                    self.pump(&channel);
                }
                self.members.insert(channel.clone(), info.clone());
                self.events.push(SessionEvent::NewMember { channel, info });
            }
            ServerMessage::MemberList { members } => {
                debug!("got member list ({} members)", members.len());
                self.members = members.clone();
                self.events.push(SessionEvent::MemberList(members));
            }
            ServerMessage::MemberLeft { channel, nick } => {
                if self.channel_name.as_deref() == Some(channel.as_str()) {
                    warn!("apparently we left?");
                } else {
                    info!("member left: {} ({})", nick, channel);
                }
                if let Some(conn) = self.connections.get_mut(&channel) {
                    conn.close();
                    self.pump(&channel);
                }
                self.members.remove(&channel);
                self.events.push(SessionEvent::MemberLeft { channel, nick });
            }
            ServerMessage::Relay { origin, message } => {
                // ensure a connection exists; for inbound offers this is
                // how the answering side comes to life
                self.connection(&origin).handle_relay(message);
                self.pump(&origin);
            }
            ServerMessage::Playlist { playlist } => {
                self.events.push(SessionEvent::PlaylistUpdated(playlist));
            }
        }
    }

    /// The transport's data channel to `peer` opened.
    pub fn channel_opened(&mut self, peer: &str) {
        self.connection(peer).channel_opened();
        self.pump(peer);
    }

    /// A frame arrived on the data channel from `peer`.
    pub fn channel_message(&mut self, peer: &str, frame: &str, now: i64) {
        self.connection(peer).channel_message(frame, now);
        self.pump(peer);
    }

    /// The transport reports the connection to `peer` closed or failed.
    pub fn channel_closed(&mut self, peer: &str) {
        if let Some(conn) = self.connections.get_mut(peer) {
            conn.channel_closed();
            self.pump(peer);
        }
    }

    /// The transport surfaced a local ICE candidate for `peer`.
    pub fn local_candidate(&mut self, peer: &str, candidate: serde_json::Value) {
        self.connection(peer).local_candidate(candidate);
        self.pump(peer);
    }

    /// Measures round-trip latency to `peer` once.
    pub fn probe_latency(&mut self, peer: &str, now: i64) -> Result<(), PeerError> {
        let result = self.connection(peer).probe_latency(now);
        self.pump(peer);
        result
    }

    /// Sends a game message to every peer whose channel is up.
    pub fn broadcast(&mut self, message: &PeerMessage) {
        let peers: Vec<String> = self.connections.keys().cloned().collect();
        for peer in peers {
            let Some(conn) = self.connections.get_mut(&peer) else {
                continue;
            };
            if !conn.channel_available() {
                continue;
            }
            if let Err(e) = conn.send(message) {
                warn!("broadcast to {} failed: {}", peer, e);
            }
            self.pump(&peer);
        }
    }

    pub fn send_to(&mut self, peer: &str, message: &PeerMessage) -> Result<(), PeerError> {
        let result = self.connection(peer).send(message);
        self.pump(peer);
        result
    }

    /// Advances timers (probe timeouts) on every connection.
    pub fn tick(&mut self, now: i64) {
        let peers: Vec<String> = self.connections.keys().cloned().collect();
        for peer in peers {
            if let Some(conn) = self.connections.get_mut(&peer) {
                conn.tick(now);
                self.pump(&peer);
            }
        }
    }

    /// Returns the connection to `peer`, creating it if necessary.
    fn connection(&mut self, peer: &str) -> &mut PeerConnection<F::Transport> {
        self.connections.entry(peer.to_string()).or_insert_with(|| {
            PeerConnection::new(peer, self.factory.transport(peer))
        })
    }

    /// Drains a connection's events into session events and the outbox.
    fn pump(&mut self, peer: &str) {
        let Some(conn) = self.connections.get_mut(peer) else {
            return;
        };
        let mut lost = false;
        for event in conn.drain_events() {
            match event {
                PeerEvent::Relay(message) => {
                    self.outbox.push(ClientMessage::Relay {
                        target: peer.into(),
                        message,
                    });
                }
                PeerEvent::ChannelOpen => {
                    self.events.push(SessionEvent::ChannelEstablished(peer.into()));
                }
                PeerEvent::Message(message) => {
                    self.events.push(SessionEvent::Peer {
                        peer: peer.into(),
                        message,
                    });
                }
                PeerEvent::Latency(ms) => {
                    self.events.push(SessionEvent::Latency { peer: peer.into(), ms });
                }
                PeerEvent::Closed => lost = true,
            }
        }
        if lost {
            self.connections.remove(peer);
            self.events.push(SessionEvent::ConnectionLost(peer.into()));
        }
    }
}
